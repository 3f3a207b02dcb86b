use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::Value;

pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
pub const OUTPUT_SIZE_INVALID: &str = "OUTPUT_SIZE_INVALID";
pub const FRAMEBUFFER_INVALID: &str = "FRAMEBUFFER_INVALID";
pub const FRAME_SAMPLE_FAILED: &str = "FRAME_SAMPLE_FAILED";
pub const NOT_SIZED: &str = "NOT_SIZED";
pub const FONT_LOAD_FAILED: &str = "FONT_LOAD_FAILED";

/// Which side of the engine boundary produced the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodedErrorKind {
    /// Rejected while building or resizing the engine.
    Config,
    /// Raised during a single render tick.
    Tick,
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn config(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Config,
        }
    }

    pub fn tick(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Tick,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                kind: self.kind,
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub kind: CodedErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Finds the outermost [`CodedError`], whether attached as context or as a cause.
pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error.downcast_ref::<CodedError>().or_else(|| {
        error
            .chain()
            .find_map(|cause| cause.downcast_ref::<CodedError>())
    })
}

/// Envelope for any error; uncoded failures are reported as `INTERNAL`.
pub fn envelope_for(error: &Error) -> ErrorEnvelope {
    match find_coded_error(error) {
        Some(coded) => {
            let mut envelope = coded.envelope();
            envelope.error.message = format!("{error:#}");
            envelope
        }
        None => ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: "INTERNAL".to_owned(),
                kind: CodedErrorKind::Tick,
                message: format!("{error:#}"),
                details: None,
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Context};
    use serde_json::json;

    use super::{envelope_for, find_coded_error, CodedError, CodedErrorKind, NOT_SIZED};

    #[test]
    fn coded_error_survives_added_context() {
        let error = Err::<(), _>(anyhow!(CodedError::tick(NOT_SIZED, "no size")))
            .context("render tick failed")
            .expect_err("should fail");
        let coded = find_coded_error(&error).expect("coded error in chain");
        assert_eq!(coded.code, NOT_SIZED);
        assert_eq!(coded.kind, CodedErrorKind::Tick);
    }

    #[test]
    fn coded_error_attached_as_context_is_found() {
        let error = anyhow!("socket closed").context(CodedError::tick(
            super::FRAME_SAMPLE_FAILED,
            "framebuffer sample failed",
        ));
        let coded = find_coded_error(&error).expect("coded context");
        assert_eq!(coded.code, super::FRAME_SAMPLE_FAILED);
    }

    #[test]
    fn envelope_serializes_code_and_details() {
        let error = anyhow!(CodedError::config("CONFIG_INVALID", "bad colors")
            .with_details(json!({ "field": "colors" })));
        let value = serde_json::to_value(envelope_for(&error)).expect("serialize");
        assert_eq!(value["ok"], json!(false));
        assert_eq!(value["error"]["code"], json!("CONFIG_INVALID"));
        assert_eq!(value["error"]["kind"], json!("config"));
        assert_eq!(value["error"]["details"]["field"], json!("colors"));
    }

    #[test]
    fn uncoded_errors_use_internal_code() {
        let value = serde_json::to_value(envelope_for(&anyhow!("boom"))).expect("serialize");
        assert_eq!(value["error"]["code"], json!("INTERNAL"));
        assert_eq!(value["error"]["message"], json!("boom"));
    }
}
