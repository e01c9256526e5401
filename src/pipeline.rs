//! Pipeline wiring and execution.
//!
//! Ties the target graph to concrete actions. A requested artifact resolves
//! to a plan (unsatisfied targets in dependency order); each planned target
//! runs under its advisory output lock and is re-checked afterwards, so a
//! tool that "succeeds" without producing its artifact still fails the run.
//! Execution is strictly sequential and fail-fast: the first error stops the
//! walk with no further steps started.

use anyhow::{bail, Context, Result};
use std::fs;

use crate::config::BuildConfig;
use crate::fetch;
use crate::graph::{self, Target, TargetId};
use crate::image;
use crate::qemu;
use crate::staging::StagingTree;

pub struct Pipeline {
    cfg: BuildConfig,
}

impl Pipeline {
    pub fn new(cfg: BuildConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.cfg
    }

    /// The full target graph for this configuration.
    pub fn targets(&self) -> Vec<Target> {
        let cfg = &self.cfg;
        vec![
            Target {
                id: TargetId::Bootloader,
                prereqs: vec![],
                // The version stamp makes a clone from a different pin stale;
                // the installer and boot files are what downstream consumes.
                outputs: vec![
                    cfg.bootloader_stamp(),
                    cfg.limine_exe(),
                    cfg.bootloader_dir().join("limine-bios.sys"),
                    cfg.bootloader_dir().join("limine-bios-cd.bin"),
                    cfg.bootloader_dir().join("limine-uefi-cd.bin"),
                    cfg.bootloader_dir().join("BOOTX64.EFI"),
                    cfg.bootloader_dir().join("BOOTIA32.EFI"),
                ],
            },
            Target {
                id: TargetId::FirmwareCode,
                prereqs: vec![],
                outputs: vec![cfg.firmware_code_path()],
            },
            Target {
                id: TargetId::FirmwareVars,
                prereqs: vec![],
                outputs: vec![cfg.firmware_vars_path()],
            },
            Target {
                id: TargetId::Kernel,
                prereqs: vec![],
                outputs: vec![cfg.kernel_binary.clone()],
            },
            Target {
                id: TargetId::Iso,
                prereqs: vec![TargetId::Bootloader, TargetId::Kernel],
                outputs: vec![cfg.image_path()],
            },
        ]
    }

    /// Build the final image, running whatever prerequisites are stale.
    pub fn build_image(&self) -> Result<()> {
        self.ensure(&[TargetId::Iso])?;
        println!("[build] image ready at {}", self.cfg.image_path().display());
        Ok(())
    }

    /// Boot the image in the emulator, after making sure the image and both
    /// firmware blobs exist.
    pub fn run_emulator(&self, extra_args: &[String]) -> Result<()> {
        self.ensure(&[
            TargetId::Iso,
            TargetId::FirmwareCode,
            TargetId::FirmwareVars,
        ])?;
        qemu::launch(&self.cfg, extra_args)
    }

    /// Resolve and execute the plan for the requested targets.
    fn ensure(&self, requested: &[TargetId]) -> Result<()> {
        let targets = self.targets();
        let plan = graph::resolve_all(&targets, requested)?;
        if plan.is_empty() {
            println!("[build] everything up to date; nothing to do");
            return Ok(());
        }

        for id in plan {
            println!("[build] {}", id.slug());
            let _lock = graph::lock_output(&self.cfg.locks_dir(), id)?;
            self.run_action(id)
                .with_context(|| format!("building target '{}'", id.slug()))?;

            let target = targets
                .iter()
                .find(|target| target.id == id)
                .expect("planned targets come from this graph");
            for output in &target.outputs {
                if !graph::output_present(output) {
                    bail!(
                        "target '{}' finished but its output '{}' is missing",
                        id.slug(),
                        output.display()
                    );
                }
            }
        }
        Ok(())
    }

    fn run_action(&self, id: TargetId) -> Result<()> {
        match id {
            TargetId::Bootloader => {
                fetch::fetch_bootloader(&self.cfg)?;
            }
            TargetId::FirmwareCode => {
                fetch::fetch_firmware(
                    "code",
                    &self.cfg.firmware_code_url,
                    &self.cfg.firmware_code_path(),
                    self.cfg.firmware_code_sha256.as_deref(),
                )?;
            }
            TargetId::FirmwareVars => {
                fetch::fetch_firmware(
                    "vars",
                    &self.cfg.firmware_vars_url,
                    &self.cfg.firmware_vars_path(),
                    self.cfg.firmware_vars_sha256.as_deref(),
                )?;
            }
            TargetId::Kernel => {
                // External input: compiled outside this pipeline.
                bail!(
                    "kernel binary '{}' not found; build the kernel first, then re-run \
                     (after rebuilding an existing kernel, `clean` forces a fresh image)",
                    self.cfg.kernel_binary.display()
                );
            }
            TargetId::Iso => {
                let staging = StagingTree::assemble(&self.cfg)?;
                image::produce_image(staging, &self.cfg)?;
            }
        }
        Ok(())
    }

    /// Remove every ephemeral artifact. The kernel binary is an external
    /// input and is never touched. Succeeds when artifacts are already gone.
    pub fn clean(&self) -> Result<()> {
        let cfg = &self.cfg;
        for dir in [cfg.staging_root(), cfg.bootloader_dir(), cfg.firmware_dir()] {
            if dir.exists() {
                fs::remove_dir_all(&dir)
                    .with_context(|| format!("removing '{}'", dir.display()))?;
                println!("[clean] removed {}", dir.display());
            }
        }
        let image = cfg.image_path();
        for file in [crate::image::scratch_image_path(&image), image] {
            if file.exists() {
                fs::remove_file(&file)
                    .with_context(|| format!("removing '{}'", file.display()))?;
                println!("[clean] removed {}", file.display());
            }
        }
        Ok(())
    }
}
