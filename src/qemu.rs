//! QEMU launcher.
//!
//! Terminal consumer of the pipeline: boots the finished image under UEFI
//! firmware with console I/O attached to the operator's terminal. Unlike
//! every other step, a non-zero VM exit is not treated as a failure, since
//! sessions get closed however the operator likes.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::BuildConfig;

/// Builder for the `qemu-system-x86_64` command line.
#[derive(Debug)]
pub struct QemuBuilder {
    image: PathBuf,
    firmware_code: PathBuf,
    firmware_vars: PathBuf,
    memory_mb: u32,
    display_none: bool,
    extra_args: Vec<String>,
}

impl QemuBuilder {
    pub fn new(image: &Path, firmware_code: &Path, firmware_vars: &Path) -> Self {
        Self {
            image: image.to_path_buf(),
            firmware_code: firmware_code.to_path_buf(),
            firmware_vars: firmware_vars.to_path_buf(),
            memory_mb: 512,
            display_none: false,
            extra_args: Vec::new(),
        }
    }

    pub fn memory_mb(mut self, memory_mb: u32) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    /// Headless mode, for exit-code-driven kernel test runs.
    pub fn display_none(mut self) -> Self {
        self.display_none = true;
        self
    }

    pub fn extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Command {
        let mut cmd = Command::new("qemu-system-x86_64");

        cmd.args(["-m", &format!("{}M", self.memory_mb)]);

        // UEFI firmware: the code store stays read-only, the variable store
        // must remain writable so firmware settings survive across runs.
        cmd.args([
            "-drive",
            &format!(
                "if=pflash,format=raw,readonly=on,file={}",
                self.firmware_code.display()
            ),
            "-drive",
            &format!("if=pflash,format=raw,file={}", self.firmware_vars.display()),
        ]);

        cmd.arg("-cdrom");
        cmd.arg(&self.image);

        if self.display_none {
            cmd.args(["-display", "none"]);
        }

        // Passthrough args go last so operators can override anything above.
        cmd.args(&self.extra_args);

        cmd
    }
}

/// Launch the VM interactively against the finished image.
pub fn launch(cfg: &BuildConfig, extra_args: &[String]) -> Result<()> {
    let mut cmd = QemuBuilder::new(
        &cfg.image_path(),
        &cfg.firmware_code_path(),
        &cfg.firmware_vars_path(),
    )
    .memory_mb(cfg.qemu_memory_mb)
    .extra_args(cfg.qemu_extra_args.iter().cloned())
    .extra_args(extra_args.iter().cloned())
    .build();

    println!("[run] booting {}", cfg.image_path().display());
    let status = cmd.status()?;
    if !status.success() {
        // Operator-terminated sessions land here; report, don't fail.
        println!("[run] qemu exited with {}", status);
    }
    Ok(())
}
