//! The build-target graph and its freshness oracle.
//!
//! Each pipeline step is a [`Target`] with declared prerequisite targets and
//! output paths. Freshness is existence-only: a target is satisfied iff every
//! declared output exists on disk. No content hashes, no timestamps; once an
//! output exists the target stays fresh until `clean` removes it.

use anyhow::{anyhow, bail, Context, Result};
use fs2::FileExt;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Identity of a pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TargetId {
    /// Limine clone plus its installer build.
    Bootloader,
    /// OVMF code firmware blob.
    FirmwareCode,
    /// OVMF variable-store firmware blob.
    FirmwareVars,
    /// The kernel ELF. External input: the pipeline checks it, never builds it.
    Kernel,
    /// The final hybrid-boot image.
    Iso,
}

impl TargetId {
    pub fn slug(self) -> &'static str {
        match self {
            TargetId::Bootloader => "bootloader",
            TargetId::FirmwareCode => "firmware-code",
            TargetId::FirmwareVars => "firmware-vars",
            TargetId::Kernel => "kernel",
            TargetId::Iso => "iso",
        }
    }
}

/// A named build step: prerequisites plus the outputs its action produces.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: TargetId,
    pub prereqs: Vec<TargetId>,
    pub outputs: Vec<PathBuf>,
}

impl Target {
    /// True iff every declared output exists.
    pub fn is_satisfied(&self) -> bool {
        self.outputs.iter().all(|path| output_present(path))
    }
}

/// Existence check for a single output path.
///
/// A directory only counts when it has at least one entry; an interrupted
/// clone can leave an empty directory behind and that must not read as fresh.
pub fn output_present(path: &Path) -> bool {
    if path.is_dir() {
        match fs::read_dir(path) {
            Ok(mut entries) => entries.next().is_some(),
            Err(_) => false,
        }
    } else {
        path.exists()
    }
}

/// Resolve the list of targets that must run to satisfy `requested`.
///
/// Depth-first post-order walk: prerequisites come before their dependents,
/// each target is visited once, and satisfied targets are skipped. A fully
/// satisfied graph resolves to an empty plan.
pub fn resolve(targets: &[Target], requested: TargetId) -> Result<Vec<TargetId>> {
    resolve_all(targets, &[requested])
}

/// [`resolve`] over several requested targets sharing one visited set.
pub fn resolve_all(targets: &[Target], requested: &[TargetId]) -> Result<Vec<TargetId>> {
    let mut plan = Vec::new();
    let mut visited = BTreeSet::new();
    for id in requested {
        visit(targets, *id, &mut visited, &mut plan)?;
    }
    Ok(plan)
}

fn visit(
    targets: &[Target],
    id: TargetId,
    visited: &mut BTreeSet<TargetId>,
    plan: &mut Vec<TargetId>,
) -> Result<()> {
    if !visited.insert(id) {
        return Ok(());
    }
    let target = targets
        .iter()
        .find(|target| target.id == id)
        .ok_or_else(|| anyhow!("target '{}' is not wired into the graph", id.slug()))?;
    for prereq in &target.prereqs {
        visit(targets, *prereq, visited, plan)?;
    }
    if !target.is_satisfied() {
        plan.push(id);
    }
    Ok(())
}

/// RAII guard holding an exclusive advisory lock for one target's outputs.
///
/// Dropping the guard releases the lock. The lock file itself is never
/// unlinked: removing a still-locked file would let a second process create a
/// fresh file at the same path and lock that instead, defeating exclusion.
pub struct OutputLock {
    _file: File,
}

/// Acquire the advisory lock for `id` under `locks_dir`, without blocking.
pub fn lock_output(locks_dir: &Path, id: TargetId) -> Result<OutputLock> {
    fs::create_dir_all(locks_dir)
        .with_context(|| format!("creating lock directory '{}'", locks_dir.display()))?;
    let lock_path = locks_dir.join(format!("{}.lock", id.slug()));

    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("creating lock file '{}'", lock_path.display()))?;

    if lock_file.try_lock_exclusive().is_err() {
        drop(lock_file);
        bail!(
            "target '{}' is being built by another process (lock '{}')",
            id.slug(),
            lock_path.display()
        );
    }

    Ok(OutputLock { _file: lock_file })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn target(id: TargetId, prereqs: &[TargetId], outputs: &[PathBuf]) -> Target {
        Target {
            id,
            prereqs: prereqs.to_vec(),
            outputs: outputs.to_vec(),
        }
    }

    fn graph(dir: &Path) -> Vec<Target> {
        vec![
            target(TargetId::Bootloader, &[], &[dir.join("limine/limine")]),
            target(TargetId::Kernel, &[], &[dir.join("kernel")]),
            target(
                TargetId::Iso,
                &[TargetId::Bootloader, TargetId::Kernel],
                &[dir.join("os.iso")],
            ),
        ]
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn file_output_presence() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("artifact");
        assert!(!output_present(&file));
        touch(&file);
        assert!(output_present(&file));
    }

    #[test]
    fn empty_directory_is_not_present() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("clone");
        fs::create_dir_all(&dir).unwrap();
        assert!(!output_present(&dir));
        touch(&dir.join("file"));
        assert!(output_present(&dir));
    }

    #[test]
    fn fresh_tree_plans_everything_in_dependency_order() {
        let temp = TempDir::new().unwrap();
        let plan = resolve(&graph(temp.path()), TargetId::Iso).unwrap();
        assert_eq!(
            plan,
            vec![TargetId::Bootloader, TargetId::Kernel, TargetId::Iso]
        );
    }

    #[test]
    fn satisfied_graph_resolves_to_empty_plan() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("limine/limine"));
        touch(&temp.path().join("kernel"));
        touch(&temp.path().join("os.iso"));
        let plan = resolve(&graph(temp.path()), TargetId::Iso).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn deleting_only_the_image_replans_only_the_image() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("limine/limine"));
        touch(&temp.path().join("kernel"));
        let plan = resolve(&graph(temp.path()), TargetId::Iso).unwrap();
        assert_eq!(plan, vec![TargetId::Iso]);
    }

    #[test]
    fn missing_prereq_is_planned_even_when_dependent_exists() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("kernel"));
        touch(&temp.path().join("os.iso"));
        let plan = resolve(&graph(temp.path()), TargetId::Iso).unwrap();
        assert_eq!(plan, vec![TargetId::Bootloader]);
    }

    #[test]
    fn shared_prereqs_are_planned_once() {
        let temp = TempDir::new().unwrap();
        let plan = resolve_all(
            &graph(temp.path()),
            &[TargetId::Iso, TargetId::Bootloader, TargetId::Kernel],
        )
        .unwrap();
        assert_eq!(
            plan,
            vec![TargetId::Bootloader, TargetId::Kernel, TargetId::Iso]
        );
    }

    #[test]
    fn second_lock_on_same_target_fails() {
        let temp = TempDir::new().unwrap();
        let locks = temp.path().join(".locks");
        let _held = lock_output(&locks, TargetId::Iso).unwrap();
        assert!(lock_output(&locks, TargetId::Iso).is_err());
    }

    #[test]
    fn lock_is_released_on_drop() {
        let temp = TempDir::new().unwrap();
        let locks = temp.path().join(".locks");
        drop(lock_output(&locks, TargetId::Iso).unwrap());
        assert!(lock_output(&locks, TargetId::Iso).is_ok());
    }
}
