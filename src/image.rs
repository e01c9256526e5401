//! Image mastering and boot-sector installation.
//!
//! Two external steps, strictly ordered: `xorriso` masters the staging tree
//! into a hybrid-boot ISO-9660 image, then the `limine` installer patches the
//! finished file with the legacy boot sector. The installer modifies an
//! existing image; it cannot run first.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::BuildConfig;
use crate::process::Cmd;
use crate::staging::{StagingTree, BIOS_CD_RELATIVE, UEFI_CD_RELATIVE};

/// The xorriso invocation for a hybrid BIOS/UEFI image.
///
/// BIOS side: an El Torito no-emulation catalog entry with a 4-sector boot
/// load and the boot-info-table patch. UEFI side: an EFI boot partition entry
/// referencing the UEFI boot record. The protective MBR keeps legacy
/// partition tools from seeing garbage.
pub fn xorriso_args(staging_root: &Path, output: &Path) -> Vec<String> {
    [
        "-as",
        "mkisofs",
        "-b",
        BIOS_CD_RELATIVE,
        "-no-emul-boot",
        "-boot-load-size",
        "4",
        "-boot-info-table",
        "--efi-boot",
        UEFI_CD_RELATIVE,
        "-efi-boot-part",
        "--efi-boot-image",
        "--protective-msdos-label",
    ]
    .into_iter()
    .map(str::to_string)
    .chain([
        staging_root.to_string_lossy().into_owned(),
        "-o".to_string(),
        output.to_string_lossy().into_owned(),
    ])
    .collect()
}

fn master_iso(staging_root: &Path, output: &Path) -> Result<()> {
    Cmd::new("xorriso")
        .args(xorriso_args(staging_root, output))
        .error_msg("mastering the ISO image (is xorriso installed?)")
        .run()?;
    Ok(())
}

fn install_boot_sector(limine_exe: &Path, image: &Path) -> Result<()> {
    Cmd::new(limine_exe.to_string_lossy().into_owned())
        .arg("bios-install")
        .arg_path(image)
        .error_msg("installing the legacy boot sector")
        .run()?;
    Ok(())
}

/// Scratch path the image is mastered to before the final rename.
pub fn scratch_image_path(image: &Path) -> PathBuf {
    match image.extension() {
        Some(ext) => {
            let mut ext = ext.to_os_string();
            ext.push(".part");
            image.with_extension(ext)
        }
        None => image.with_extension("part"),
    }
}

/// Master `staging` into the configured image and patch its boot sector.
///
/// Both steps run against a scratch file that is renamed to the final image
/// path only after they succeed, so the final path never holds a half-built
/// image. The staging tree is consumed and removed on every path out of this
/// function. On failure the scratch file stays on disk for inspection; the
/// error names it.
pub fn produce_image(staging: StagingTree, cfg: &BuildConfig) -> Result<PathBuf> {
    let image = cfg.image_path();
    let scratch = scratch_image_path(&image);

    let result = master_iso(staging.root(), &scratch)
        .and_then(|()| install_boot_sector(&cfg.limine_exe(), &scratch));
    drop(staging);

    finalize_image(result, &scratch, &image)
}

/// Rename the scratch file into place on success; on failure report where
/// the scratch file was left, if the tool got far enough to create one.
fn finalize_image(result: Result<()>, scratch: &Path, image: &Path) -> Result<PathBuf> {
    if let Err(err) = result {
        if scratch.exists() {
            return Err(err.context(format!(
                "image build failed; partial image left at '{}' for inspection",
                scratch.display()
            )));
        }
        return Err(err.context("image build failed"));
    }

    fs::rename(scratch, image).with_context(|| {
        format!(
            "moving finished image '{}' into place at '{}'",
            scratch.display(),
            image.display()
        )
    })?;
    Ok(image.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use tempfile::TempDir;

    #[test]
    fn bios_catalog_comes_before_efi_partition() {
        let args = xorriso_args(Path::new("build/iso_root"), Path::new("build/os.iso"));
        let bios = args.iter().position(|a| a == BIOS_CD_RELATIVE).unwrap();
        let efi = args.iter().position(|a| a == UEFI_CD_RELATIVE).unwrap();
        assert!(bios < efi);
        assert_eq!(args[bios - 1], "-b");
        assert_eq!(args[efi - 1], "--efi-boot");
    }

    #[test]
    fn hybrid_flags_are_present() {
        let args = xorriso_args(Path::new("root"), Path::new("out.iso"));
        for flag in [
            "-no-emul-boot",
            "-boot-info-table",
            "-efi-boot-part",
            "--efi-boot-image",
            "--protective-msdos-label",
        ] {
            assert!(args.iter().any(|a| a == flag), "missing {}", flag);
        }
        assert_eq!(args[args.len() - 2], "-o");
        assert_eq!(args.last().unwrap(), "out.iso");
    }

    #[test]
    fn boot_load_size_is_fixed_at_four_sectors() {
        let args = xorriso_args(Path::new("root"), Path::new("out.iso"));
        let pos = args.iter().position(|a| a == "-boot-load-size").unwrap();
        assert_eq!(args[pos + 1], "4");
    }

    #[test]
    fn scratch_path_keeps_the_image_extension() {
        assert_eq!(
            scratch_image_path(Path::new("build/os.iso")),
            Path::new("build/os.iso.part")
        );
        assert_eq!(scratch_image_path(Path::new("build/os")), Path::new("build/os.part"));
    }

    #[test]
    fn failed_build_never_puts_a_file_at_the_final_path() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("os.iso");
        let scratch = scratch_image_path(&image);
        fs::write(&scratch, b"half an image").unwrap();

        let err = finalize_image(Err(anyhow!("xorriso exploded")), &scratch, &image).unwrap_err();

        assert!(!image.exists());
        assert!(!crate::graph::output_present(&image));
        assert!(scratch.exists(), "scratch file kept for inspection");
        assert!(format!("{:#}", err).contains(&scratch.display().to_string()));
    }

    #[test]
    fn failure_before_any_output_names_no_partial_file() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("os.iso");
        let scratch = scratch_image_path(&image);

        let err = finalize_image(Err(anyhow!("spawn failed")), &scratch, &image).unwrap_err();
        assert!(!format!("{:#}", err).contains("partial image"));
    }

    #[test]
    fn successful_build_renames_the_scratch_file_into_place() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("os.iso");
        let scratch = scratch_image_path(&image);
        fs::write(&scratch, b"finished image").unwrap();

        let out = finalize_image(Ok(()), &scratch, &image).unwrap();
        assert_eq!(out, image);
        assert!(!scratch.exists());
        assert_eq!(fs::read(&image).unwrap(), b"finished image");
    }
}
