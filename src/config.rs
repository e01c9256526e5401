//! Build configuration.
//!
//! Everything an operator can vary lives in one TOML file (`builder.toml` by
//! default): kernel binary path, pinned bootloader version, firmware URLs and
//! optional checksums, build directory, and emulator arguments. Every section
//! and field is optional; unknown fields are rejected.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "builder.toml";

const DEFAULT_KERNEL_BINARY: &str = "target/x86_64-unknown-none/debug/os";
const DEFAULT_BOOTLOADER_VERSION: &str = "v8.x-binary";
const DEFAULT_BOOTLOADER_URL: &str = "https://github.com/limine-bootloader/limine.git";
const DEFAULT_BOOT_CONFIG: &str = "limine.conf";
const DEFAULT_CODE_URL: &str =
    "https://retrage.github.io/edk2-nightly/bin/RELEASEX64_OVMF_CODE.fd";
const DEFAULT_VARS_URL: &str =
    "https://retrage.github.io/edk2-nightly/bin/RELEASEX64_OVMF_VARS.fd";
const DEFAULT_BUILD_DIR: &str = "build";
const DEFAULT_IMAGE_NAME: &str = "os.iso";
const DEFAULT_MEMORY_MB: u32 = 512;

/// Resolved build configuration with all defaults applied.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Kernel ELF produced by the kernel's own build. Never touched by `clean`.
    pub kernel_binary: PathBuf,
    /// Pinned Limine binary-branch name; clone and boot binaries come from it.
    pub bootloader_version: String,
    pub bootloader_url: String,
    /// Repo-provided static boot configuration, staged as `limine.conf`.
    pub boot_config: PathBuf,
    pub firmware_code_url: String,
    pub firmware_vars_url: String,
    pub firmware_code_sha256: Option<String>,
    pub firmware_vars_sha256: Option<String>,
    /// Root for every ephemeral artifact the pipeline produces.
    pub build_dir: PathBuf,
    pub image_name: String,
    pub qemu_memory_mb: u32,
    pub qemu_extra_args: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            kernel_binary: PathBuf::from(DEFAULT_KERNEL_BINARY),
            bootloader_version: DEFAULT_BOOTLOADER_VERSION.to_string(),
            bootloader_url: DEFAULT_BOOTLOADER_URL.to_string(),
            boot_config: PathBuf::from(DEFAULT_BOOT_CONFIG),
            firmware_code_url: DEFAULT_CODE_URL.to_string(),
            firmware_vars_url: DEFAULT_VARS_URL.to_string(),
            firmware_code_sha256: None,
            firmware_vars_sha256: None,
            build_dir: PathBuf::from(DEFAULT_BUILD_DIR),
            image_name: DEFAULT_IMAGE_NAME.to_string(),
            qemu_memory_mb: DEFAULT_MEMORY_MB,
            qemu_extra_args: Vec::new(),
        }
    }
}

impl BuildConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading build config '{}'", path.display()))?;
        let parsed: BuilderToml = toml::from_str(&raw)
            .with_context(|| format!("parsing build config '{}'", path.display()))?;
        parsed.into_config(path)
    }

    // Derived paths. Everything ephemeral lives under the build directory.

    pub fn bootloader_dir(&self) -> PathBuf {
        self.build_dir.join("limine")
    }

    /// The bootloader's installer binary, produced by its own `make`.
    pub fn limine_exe(&self) -> PathBuf {
        self.bootloader_dir().join("limine")
    }

    /// Stamp recording which pinned version the clone came from. Its name
    /// embeds the version so changing the pin makes the bootloader target
    /// stale under the existence-only oracle.
    pub fn bootloader_stamp(&self) -> PathBuf {
        let slug: String = self
            .bootloader_version
            .chars()
            .map(|c| if c == '/' { '-' } else { c })
            .collect();
        self.bootloader_dir().join(format!(".cloned-{}", slug))
    }

    pub fn firmware_dir(&self) -> PathBuf {
        self.build_dir.join("firmware")
    }

    pub fn firmware_code_path(&self) -> PathBuf {
        self.firmware_dir().join("code")
    }

    pub fn firmware_vars_path(&self) -> PathBuf {
        self.firmware_dir().join("vars")
    }

    pub fn staging_root(&self) -> PathBuf {
        self.build_dir.join("iso_root")
    }

    pub fn image_path(&self) -> PathBuf {
        self.build_dir.join(&self.image_name)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.build_dir.join(".locks")
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuilderToml {
    kernel: Option<KernelToml>,
    bootloader: Option<BootloaderToml>,
    firmware: Option<FirmwareToml>,
    image: Option<ImageToml>,
    qemu: Option<QemuToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct KernelToml {
    binary: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BootloaderToml {
    version: Option<String>,
    url: Option<String>,
    config: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FirmwareToml {
    code_url: Option<String>,
    vars_url: Option<String>,
    code_sha256: Option<String>,
    vars_sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImageToml {
    build_dir: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QemuToml {
    memory_mb: Option<u32>,
    extra_args: Option<Vec<String>>,
}

impl BuilderToml {
    fn into_config(self, config_path: &Path) -> Result<BuildConfig> {
        let mut cfg = BuildConfig::default();

        if let Some(kernel) = self.kernel {
            if let Some(binary) = kernel.binary {
                cfg.kernel_binary = PathBuf::from(binary);
            }
        }
        if let Some(bootloader) = self.bootloader {
            if let Some(version) = bootloader.version {
                let version = version.trim().to_string();
                if version.is_empty() {
                    bail!(
                        "invalid build config '{}': bootloader.version must not be empty",
                        config_path.display()
                    );
                }
                cfg.bootloader_version = version;
            }
            if let Some(url) = bootloader.url {
                cfg.bootloader_url = url;
            }
            if let Some(config) = bootloader.config {
                cfg.boot_config = PathBuf::from(config);
            }
        }
        if let Some(firmware) = self.firmware {
            if let Some(url) = firmware.code_url {
                cfg.firmware_code_url = url;
            }
            if let Some(url) = firmware.vars_url {
                cfg.firmware_vars_url = url;
            }
            cfg.firmware_code_sha256 = firmware.code_sha256;
            cfg.firmware_vars_sha256 = firmware.vars_sha256;
        }
        if let Some(image) = self.image {
            if let Some(build_dir) = image.build_dir {
                cfg.build_dir = PathBuf::from(build_dir);
            }
            if let Some(name) = image.name {
                let name = name.trim().to_string();
                if name.is_empty() {
                    bail!(
                        "invalid build config '{}': image.name must not be empty",
                        config_path.display()
                    );
                }
                cfg.image_name = name;
            }
        }
        if let Some(qemu) = self.qemu {
            if let Some(memory_mb) = qemu.memory_mb {
                cfg.qemu_memory_mb = memory_mb;
            }
            if let Some(extra_args) = qemu.extra_args {
                cfg.qemu_extra_args = extra_args;
            }
        }

        Ok(cfg)
    }
}
