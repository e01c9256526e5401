//! The staging tree.
//!
//! An ephemeral directory mirroring the final image's filesystem layout:
//!
//! ```text
//! iso_root/
//!   boot/
//!     kernel              # the kernel ELF, verbatim
//!     kernel.symbols      # derived symbol table (see symbols.rs)
//!     limine/
//!       limine.conf
//!       limine-bios.sys
//!       limine-bios-cd.bin
//!       limine-uefi-cd.bin
//!   EFI/BOOT/
//!     BOOTX64.EFI
//!     BOOTIA32.EFI
//! ```
//!
//! The tree is rebuilt from scratch for every image and removed when the
//! owning [`StagingTree`] drops, on success and failure alike. It is never
//! reused across builds; a leftover entry from a previous layout would be
//! mastered straight into the image.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::BuildConfig;
use crate::symbols;

/// Boot files the bootloader clone must provide for the BIOS/UEFI catalog,
/// staged under `boot/limine/`.
const LIMINE_BOOT_FILES: &[&str] = &["limine-bios.sys", "limine-bios-cd.bin", "limine-uefi-cd.bin"];

/// EFI application stubs staged under `EFI/BOOT/`.
const EFI_BOOT_FILES: &[&str] = &["BOOTX64.EFI", "BOOTIA32.EFI"];

/// Path of the BIOS boot record inside the tree, as xorriso needs it.
pub const BIOS_CD_RELATIVE: &str = "boot/limine/limine-bios-cd.bin";

/// Path of the UEFI boot record inside the tree, as xorriso needs it.
pub const UEFI_CD_RELATIVE: &str = "boot/limine/limine-uefi-cd.bin";

/// Exclusive owner of one build's staging directory.
///
/// Dropping the value removes the directory recursively.
#[derive(Debug)]
pub struct StagingTree {
    root: PathBuf,
}

impl StagingTree {
    /// Build a fresh staging tree from the configured inputs.
    ///
    /// Any pre-existing tree at the staging root is deleted first. If
    /// population fails partway, the partially built tree is removed before
    /// the error reaches the caller.
    pub fn assemble(cfg: &BuildConfig) -> Result<StagingTree> {
        let root = cfg.staging_root();
        if root.exists() {
            fs::remove_dir_all(&root).with_context(|| {
                format!("removing previous staging tree '{}'", root.display())
            })?;
        }
        fs::create_dir_all(root.join("boot/limine"))
            .with_context(|| format!("creating staging tree under '{}'", root.display()))?;
        fs::create_dir_all(root.join("EFI/BOOT"))
            .with_context(|| format!("creating staging tree under '{}'", root.display()))?;

        let tree = StagingTree { root };
        tree.populate(cfg)?;
        tree.report();
        Ok(tree)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn populate(&self, cfg: &BuildConfig) -> Result<()> {
        let kernel_dest = self.root.join("boot/kernel");
        fs::copy(&cfg.kernel_binary, &kernel_dest).with_context(|| {
            format!(
                "copying kernel binary '{}' into the staging tree",
                cfg.kernel_binary.display()
            )
        })?;

        let count =
            symbols::write_symbol_table(&cfg.kernel_binary, &self.root.join("boot/kernel.symbols"))?;
        println!("  wrote kernel.symbols ({} symbols)", count);

        let conf_dest = self.root.join("boot/limine/limine.conf");
        fs::copy(&cfg.boot_config, &conf_dest).with_context(|| {
            format!(
                "copying boot configuration '{}' into the staging tree",
                cfg.boot_config.display()
            )
        })?;

        let bootloader_dir = cfg.bootloader_dir();
        for name in LIMINE_BOOT_FILES {
            self.copy_bootloader_file(&bootloader_dir, name, &self.root.join("boot/limine"))?;
        }
        for name in EFI_BOOT_FILES {
            self.copy_bootloader_file(&bootloader_dir, name, &self.root.join("EFI/BOOT"))?;
        }

        Ok(())
    }

    fn copy_bootloader_file(&self, bootloader_dir: &Path, name: &str, dest_dir: &Path) -> Result<()> {
        let src = bootloader_dir.join(name);
        if !src.is_file() {
            bail!(
                "required bootloader binary '{}' missing from '{}'; the limine fetch should have produced it",
                name,
                bootloader_dir.display()
            );
        }
        fs::copy(&src, dest_dir.join(name))
            .with_context(|| format!("staging bootloader binary '{}'", src.display()))?;
        Ok(())
    }

    fn report(&self) {
        let mut files = 0usize;
        let mut bytes = 0u64;
        for entry in WalkDir::new(&self.root).into_iter().flatten() {
            if entry.file_type().is_file() {
                files += 1;
                bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        println!(
            "  staged {} files ({:.1} MiB) in {}",
            files,
            bytes as f64 / 1024.0 / 1024.0,
            self.root.display()
        );
    }
}

impl Drop for StagingTree {
    fn drop(&mut self) {
        if self.root.exists() {
            if let Err(err) = fs::remove_dir_all(&self.root) {
                eprintln!(
                    "warning: failed to remove staging tree '{}': {}",
                    self.root.display(),
                    err
                );
            }
        }
    }
}
