//! Where compilation happens: in the canonical tree or in a scratch copy.
//!
//! A scratch workspace lives under a volatile mount (usually tmpfs) at
//! `<scratch root>/<system>/<tree name>`. The canonical tree is only ever
//! read; teardown deletes the scratch copy alone.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use filetime::FileTime;
use walkdir::WalkDir;

use crate::config::Layout;
use crate::kernel::KernelSelection;
use crate::mount;
use crate::process::CommandRunner;

/// Active work directory for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workspace {
    /// Build inside the canonical source directory.
    InPlace { dir: PathBuf },
    /// Build inside a disposable copy.
    Scratch {
        /// Scratch parent (the mount point).
        parent: PathBuf,
        /// Per-version copy of the source tree.
        dir: PathBuf,
        /// Whether this run mounted `parent` and must unmount it.
        mounted_here: bool,
    },
}

impl Workspace {
    pub fn work_dir(&self) -> &Path {
        match self {
            Workspace::InPlace { dir } | Workspace::Scratch { dir, .. } => dir,
        }
    }

    pub fn is_scratch(&self) -> bool {
        matches!(self, Workspace::Scratch { .. })
    }
}

/// Set up the work directory for `selection`.
///
/// In-place mode returns the canonical directory without touching anything.
/// Scratch mode mounts the scratch parent (unless disabled or already
/// mounted) and copies the source tree into it. If the copy fails the
/// partial copy is removed and the parent unmounted before returning.
pub fn prepare(
    runner: &mut dyn CommandRunner,
    layout: &Layout,
    system: &str,
    selection: &KernelSelection,
    use_scratch: bool,
) -> Result<Workspace> {
    let source = selection.source_dir();
    if !use_scratch {
        return Ok(Workspace::InPlace {
            dir: source.to_path_buf(),
        });
    }

    let parent = layout.scratch_dir(system);
    let dir = parent.join(selection.dir_name());
    if dir.starts_with(source) || source.starts_with(&dir) {
        bail!(
            "scratch directory {} overlaps the kernel source {}",
            dir.display(),
            source.display()
        );
    }

    fs::create_dir_all(&parent)
        .with_context(|| format!("creating scratch directory '{}'", parent.display()))?;

    let mounted_here = layout.scratch_mount && !mount::is_mounted(&parent);
    if mounted_here {
        mount::mount(runner, &layout.tools, &parent)?;
    }

    let workspace = Workspace::Scratch {
        parent,
        dir,
        mounted_here,
    };

    if let Err(e) = populate(source, workspace.work_dir()) {
        tracing::error!("copy into scratch workspace failed, cleaning up");
        if let Err(cleanup) = teardown(runner, layout, &workspace) {
            tracing::error!("{cleanup:#}");
        }
        return Err(e);
    }

    tracing::info!(
        version = selection.version(),
        dir = %workspace.work_dir().display(),
        "copied kernel source to scratch workspace"
    );
    Ok(workspace)
}

fn populate(source: &Path, dir: &Path) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(dir) {
        tracing::warn!(dir = %dir.display(), "removing stale scratch copy");
        let removed = if meta.is_dir() {
            fs::remove_dir_all(dir)
        } else {
            fs::remove_file(dir)
        };
        removed.with_context(|| format!("removing stale scratch copy '{}'", dir.display()))?;
    }
    copy_tree(source, dir)
        .with_context(|| format!("copying {} to {}", source.display(), dir.display()))
}

/// Remove the scratch copy and unmount its parent.
///
/// In-place workspaces are left alone. Unmount is attempted even when the
/// delete failed; the first error is returned.
pub fn teardown(runner: &mut dyn CommandRunner, layout: &Layout, workspace: &Workspace) -> Result<()> {
    let Workspace::Scratch {
        parent,
        dir,
        mounted_here,
    } = workspace
    else {
        return Ok(());
    };

    let removed = if dir.exists() {
        fs::remove_dir_all(dir)
            .with_context(|| format!("removing scratch work directory '{}'", dir.display()))
    } else {
        Ok(())
    };
    if removed.is_ok() {
        tracing::info!(dir = %dir.display(), "removed scratch work directory");
    }

    let unmounted = if *mounted_here {
        mount::unmount(runner, &layout.tools, parent)
    } else {
        Ok(())
    };

    removed.and(unmounted)
}

/// Recursively copy a directory tree, preserving symlinks, file modes and
/// timestamps.
///
/// Kbuild compares mtimes to decide what to rebuild, so every entry keeps
/// the source's atime and mtime. Directory times are applied after their
/// contents are written.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let mut dir_times = Vec::new();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("walking {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("{} escaped {}", entry.path().display(), src.display()))?;
        let target = dst.join(rel);
        let meta = entry
            .metadata()
            .with_context(|| format!("Failed to stat: {}", entry.path().display()))?;
        let atime = FileTime::from_last_access_time(&meta);
        let mtime = FileTime::from_last_modification_time(&meta);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create directory: {}", target.display()))?;
            dir_times.push((target, atime, mtime));
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(&link, &target)
                .with_context(|| format!("Failed to create symlink: {}", target.display()))?;
            filetime::set_symlink_file_times(&target, atime, mtime)
                .with_context(|| format!("Failed to set symlink times on {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy file: {}", entry.path().display()))?;
            filetime::set_file_times(&target, atime, mtime)
                .with_context(|| format!("Failed to set times on {}", target.display()))?;
        }
    }

    for (dir, atime, mtime) in dir_times {
        filetime::set_file_times(&dir, atime, mtime)
            .with_context(|| format!("Failed to set times on {}", dir.display()))?;
    }
    Ok(())
}
