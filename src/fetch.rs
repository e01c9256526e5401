//! Fetching the bootloader and firmware blobs.
//!
//! Two very different freshness rules live here. The bootloader clone is
//! never trusted: whatever is on disk gets deleted and re-cloned at the
//! pinned version, so a stale clone from an older pin can never leak its
//! binaries into an image. Firmware blobs are the opposite: immutable,
//! unversioned downloads where existence alone means fresh.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::config::BuildConfig;
use crate::process::Cmd;

/// Delete any existing clone, shallow-clone the pinned version, and build the
/// bootloader's own installer binary.
pub fn fetch_bootloader(cfg: &BuildConfig) -> Result<PathBuf> {
    let dir = cfg.bootloader_dir();
    if dir.exists() {
        fs::remove_dir_all(&dir)
            .with_context(|| format!("removing stale bootloader clone '{}'", dir.display()))?;
    }
    if let Some(parent) = dir.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating build directory '{}'", parent.display()))?;
    }

    Cmd::new("git")
        .args(["clone", "--branch", &cfg.bootloader_version, "--depth", "1"])
        .arg(&cfg.bootloader_url)
        .arg_path(&dir)
        .error_msg(format!(
            "cloning limine '{}' from {}",
            cfg.bootloader_version, cfg.bootloader_url
        ))
        .run()?;

    // The binary branch ships prebuilt boot files; `make` only assembles the
    // host-side `limine` installer used for bios-install.
    Cmd::new("make")
        .arg("-C")
        .arg_path(&dir)
        .error_msg("building the limine installer")
        .run()?;

    let stamp = cfg.bootloader_stamp();
    fs::write(&stamp, format!("{}\n", cfg.bootloader_version))
        .with_context(|| format!("writing bootloader version stamp '{}'", stamp.display()))?;

    Ok(dir)
}

/// Download one firmware blob to `dest` unless it is already there.
///
/// The download goes to a temporary sibling path and is renamed into place
/// only after it completes (and, when a checksum is configured, verifies), so
/// an interrupted transfer never leaves a truncated file at the final path.
pub fn fetch_firmware(name: &str, url: &str, dest: &Path, sha256: Option<&str>) -> Result<()> {
    if dest.exists() {
        return Ok(());
    }

    let parent = dest
        .parent()
        .with_context(|| format!("firmware path '{}' has no parent directory", dest.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("creating firmware directory '{}'", parent.display()))?;

    let tmp = dest.with_extension("part");
    if tmp.exists() {
        fs::remove_file(&tmp)
            .with_context(|| format!("removing leftover download '{}'", tmp.display()))?;
    }

    Cmd::new("curl")
        .args(["-L", "-f", "-o"])
        .arg_path(&tmp)
        .arg(url)
        .error_msg(format!("downloading {} firmware from {}", name, url))
        .run()?;

    if let Some(expected) = sha256 {
        if let Err(err) = verify_sha256(&tmp, expected) {
            let _ = fs::remove_file(&tmp);
            return Err(err.context(format!("verifying {} firmware download", name)));
        }
    }

    fs::rename(&tmp, dest).with_context(|| {
        format!(
            "moving downloaded firmware '{}' into place at '{}'",
            tmp.display(),
            dest.display()
        )
    })?;

    Ok(())
}

/// Compare a file's sha256 digest against an expected hex string.
pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(path)?;
    let expected = expected.trim();
    if !actual.eq_ignore_ascii_case(expected) {
        bail!(
            "checksum mismatch for '{}': expected {}, got {}",
            path.display(),
            expected,
            actual
        );
    }
    Ok(())
}

fn sha256_file(path: &Path) -> Result<String> {
    let file =
        File::open(path).with_context(|| format!("opening '{}' for hashing", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("reading '{}' for hashing", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn existing_firmware_is_not_refetched() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("firmware/code");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, b"blob").unwrap();

        // The URL is unreachable; reaching curl would fail the call.
        fetch_firmware("code", "https://example.invalid/code.fd", &dest, None).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"blob");
    }

    #[test]
    fn stale_bootloader_clone_is_deleted_even_when_the_clone_fails() {
        let temp = TempDir::new().unwrap();
        let mut cfg = BuildConfig::default();
        cfg.build_dir = temp.path().join("build");
        cfg.bootloader_url = temp.path().join("no-such-repo").display().to_string();

        let stale = cfg.bootloader_dir();
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("limine-bios.sys"), b"from an older pin").unwrap();

        fetch_bootloader(&cfg).unwrap_err();
        assert!(
            !stale.join("limine-bios.sys").exists(),
            "stale clone must be gone before the clone is attempted"
        );
    }

    #[test]
    fn sha256_of_known_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("blob");
        fs::write(&path, b"hello world").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn verify_accepts_matching_digest_case_insensitively() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("blob");
        fs::write(&path, b"hello world").unwrap();
        verify_sha256(&path, &HELLO_SHA256.to_uppercase()).unwrap();
    }

    #[test]
    fn verify_rejects_mismatched_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("blob");
        fs::write(&path, b"tampered").unwrap();
        let err = verify_sha256(&path, HELLO_SHA256).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }
}
