use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::MotionStyle;
use crate::particles::{Particle, Tumble};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    FadeIn,
    Show,
    FadeOut,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Self::FadeIn => "fade_in",
            Self::Show => "show",
            Self::FadeOut => "fade_out",
        }
    }

    pub fn is_fade(self) -> bool {
        matches!(self, Self::FadeIn | Self::FadeOut)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Phase and elapsed-time progress. Transitions only happen through
/// [`AnimationState::start`] and [`AnimationState::set_phase`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnimationState {
    phase: Phase,
    progress: f32,
    started_at_ms: f64,
    animating: bool,
}

impl Default for AnimationState {
    fn default() -> Self {
        Self {
            phase: Phase::FadeIn,
            progress: 0.0,
            started_at_ms: 0.0,
            animating: false,
        }
    }
}

impl AnimationState {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn is_animating(&self) -> bool {
        self.animating
    }

    pub fn start(&mut self, phase: Phase, now_ms: f64) {
        self.phase = phase;
        if phase.is_fade() {
            self.animating = true;
            self.started_at_ms = now_ms;
            self.progress = 0.0;
        } else {
            self.animating = false;
            self.progress = 1.0;
        }
    }

    pub fn advance(&mut self, now_ms: f64, duration_ms: f64) {
        if !self.animating || self.progress >= 1.0 {
            return;
        }
        let elapsed = (now_ms - self.started_at_ms) / duration_ms.max(f64::MIN_POSITIVE);
        let next = elapsed.clamp(0.0, 1.0) as f32;
        self.progress = self.progress.max(next);
    }

    pub fn is_complete(&self) -> bool {
        self.phase.is_fade() && self.progress >= 1.0
    }

    /// Forces the phase without touching progress. `Show` also stops animating.
    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        if phase == Phase::Show {
            self.animating = false;
        }
    }
}

pub fn ease_in_out_cubic(t: f32) -> f32 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

/// `clamp((progress - delay) / (1 - delay), 0, 1)`.
pub fn particle_progress(progress: f32, delay: f32) -> f32 {
    let span = 1.0 - delay;
    if span <= f32::EPSILON {
        return if progress >= 1.0 { 1.0 } else { 0.0 };
    }
    ((progress - delay) / span).clamp(0.0, 1.0)
}

/// One particle resolved for the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleFrame<'a> {
    pub particle: &'a Particle,
    pub x: f32,
    pub y: f32,
    pub opacity: f32,
    pub transform: Tumble,
}

/// Resolves `particle` at `progress` for a fade phase. `Show` pins it at its
/// final position.
pub fn resolve_particle(
    particle: &Particle,
    phase: Phase,
    progress: f32,
    motion: MotionStyle,
) -> ParticleFrame<'_> {
    let local = particle_progress(progress, particle.delay);
    let eased = ease_in_out_cubic(local);

    let (from, to, opacity, settled) = match phase {
        Phase::FadeIn => (
            (particle.start_x, particle.start_y),
            (particle.final_x, particle.final_y),
            (local * 2.0).min(1.0),
            eased,
        ),
        Phase::FadeOut => (
            (particle.final_x, particle.final_y),
            (particle.start_x, particle.start_y),
            (1.0 - local * 2.0).max(0.0),
            1.0 - eased,
        ),
        Phase::Show => (
            (particle.final_x, particle.final_y),
            (particle.final_x, particle.final_y),
            1.0,
            1.0,
        ),
    };

    let transform = match motion {
        MotionStyle::Linear => Tumble::IDENTITY,
        MotionStyle::Tumble => particle.tumble.settle(settled),
    };

    ParticleFrame {
        particle,
        x: from.0 + (to.0 - from.0) * eased,
        y: from.1 + (to.1 - from.1) * eased,
        opacity,
        transform,
    }
}

/// Owns the animation state and the particle layout for the active fade.
#[derive(Debug, Clone)]
pub struct AnimationController {
    state: AnimationState,
    duration_ms: f64,
    motion: MotionStyle,
    particles: Option<Vec<Particle>>,
}

impl AnimationController {
    pub fn new(duration_ms: f64, motion: MotionStyle) -> Self {
        Self {
            state: AnimationState::default(),
            duration_ms,
            motion,
            particles: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn progress(&self) -> f32 {
        self.state.progress()
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    pub fn start(&mut self, phase: Phase, now_ms: f64) {
        self.state.start(phase, now_ms);
        if phase.is_fade() {
            self.particles = None;
        }
        log::debug!("animation phase {} started at {now_ms:.1}ms", phase);
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.state.set_phase(phase);
        log::debug!("animation phase forced to {}", phase);
    }

    pub fn advance(&mut self, now_ms: f64) {
        self.state.advance(now_ms, self.duration_ms);
    }

    /// Drops the layout; the next animating frame rebuilds it.
    pub fn invalidate_layout(&mut self) {
        if self.particles.take().is_some() {
            log::debug!("particle layout invalidated");
        }
    }

    pub fn needs_layout(&self) -> bool {
        self.state.is_animating() && self.particles.is_none()
    }

    pub fn install_layout(&mut self, particles: Vec<Particle>) {
        self.particles = Some(particles);
    }

    pub fn particles(&self) -> Option<&[Particle]> {
        self.particles.as_deref()
    }

    /// Particle positions for this frame, or `None` when the static grid
    /// should be drawn instead.
    pub fn frame(&self) -> Option<Vec<ParticleFrame<'_>>> {
        if !self.state.is_animating() {
            return None;
        }
        let particles = self.particles.as_deref().filter(|list| !list.is_empty())?;
        let phase = self.state.phase();
        let progress = self.state.progress();
        Some(
            particles
                .iter()
                .map(|particle| resolve_particle(particle, phase, progress, self.motion))
                .collect(),
        )
    }
}
