//! Incremental build pipeline for a hybrid BIOS/UEFI kernel ISO.
//!
//! Given a compiled kernel ELF, this crate fetches the Limine bootloader at a
//! pinned version and the OVMF firmware blobs, stages everything into an
//! ephemeral tree mirroring the disc layout, masters the tree into an
//! ISO-9660 image bootable under both BIOS and UEFI, and can boot the result
//! in QEMU.
//!
//! # Architecture
//!
//! ```text
//! graph      - explicit target DAG + existence-only freshness oracle
//! pipeline   - wires targets to actions, executes plans, clean
//!     │
//!     ├── fetch    - bootloader clone+build, firmware downloads
//!     ├── staging  - ephemeral tree assembly (kernel, symbols, boot files)
//!     │     └── symbols - nm-style symbol table from the kernel ELF
//!     ├── image    - xorriso mastering + limine bios-install
//!     └── qemu     - emulator launcher (terminal consumer)
//!
//! process    - external tool invocation, fail-fast
//! config     - TOML build configuration
//! preflight  - host tool validation
//! ```
//!
//! # Freshness model
//!
//! A target is satisfied iff its declared outputs exist; content is never
//! re-checked once built. Re-running against a fully satisfied graph invokes no
//! external tool. The one twist is the bootloader's version stamp: its file
//! name embeds the pinned version, so changing the pin makes the clone stale
//! and forces a delete-and-re-clone.

pub mod config;
pub mod fetch;
pub mod graph;
pub mod image;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod qemu;
pub mod staging;
pub mod symbols;

pub use config::BuildConfig;
pub use graph::{Target, TargetId};
pub use pipeline::Pipeline;
pub use process::{Cmd, ToolFailure};
