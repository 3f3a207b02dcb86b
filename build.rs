// Stamps the short git revision into GLYPHSCATTER_BUILD_REV for `--version`.
// Builds outside a checkout fall back to "unknown".
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");

    let revision = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|rev| rev.trim().to_owned())
        .filter(|rev| !rev.is_empty())
        .unwrap_or_else(|| "unknown".to_owned());

    println!("cargo:rustc-env=GLYPHSCATTER_BUILD_REV={revision}");
}
