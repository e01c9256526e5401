//! Preflight checks for build validation.
//!
//! Validates that the host has the external tools a build will invoke before
//! any of them run, so operators get one consolidated error instead of a
//! failure halfway through a pipeline.

use anyhow::{bail, Result};

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Tools every image build invokes. Each tuple is (command, package).
pub const BUILD_TOOLS: &[(&str, &str)] = &[
    ("git", "git"),
    ("make", "make"),
    ("curl", "curl"),
    ("xorriso", "xorriso"),
];

/// Additional tools the emulator target needs.
pub const RUN_TOOLS: &[(&str, &str)] = &[("qemu-system-x86_64", "qemu-system-x86")];

/// Check that specific tools are available.
///
/// Returns an error listing every missing tool and its package.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let mut missing = Vec::new();

    for (tool, package) in tools {
        if !command_exists(tool) {
            missing.push((*tool, *package));
        }
    }

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}
