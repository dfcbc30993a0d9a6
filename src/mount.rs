//! Mounting through fstab entries.
//!
//! Mount points are mounted by path alone (`mount /boot`), so the host's
//! `/etc/fstab` decides the device and filesystem type.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::Tools;
use crate::process::{Cmd, CommandRunner};

const MOUNTS_TABLE: &str = "/proc/self/mounts";

/// Whether `dir` is currently a mount point.
///
/// Reads the kernel's mount table; an unreadable table counts as "not
/// mounted" so the caller falls back to mounting explicitly.
pub fn is_mounted(dir: &Path) -> bool {
    let Ok(table) = fs::read_to_string(MOUNTS_TABLE) else {
        return false;
    };
    is_listed(&table, dir)
}

fn is_listed(table: &str, dir: &Path) -> bool {
    let target = dir.to_string_lossy();
    let target = target.trim_end_matches('/');
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| field.replace("\\040", " "))
        .any(|mount_point| mount_point.trim_end_matches('/') == target)
}

pub fn mount(runner: &mut dyn CommandRunner, tools: &Tools, dir: &Path) -> Result<()> {
    runner
        .run(
            &Cmd::new(&tools.mount)
                .arg(dir)
                .error_msg(format!("Failed to mount {}", dir.display())),
        )
        .with_context(|| format!("mounting {}", dir.display()))?;
    tracing::info!(dir = %dir.display(), "mounted");
    Ok(())
}

pub fn unmount(runner: &mut dyn CommandRunner, tools: &Tools, dir: &Path) -> Result<()> {
    runner
        .run(
            &Cmd::new(&tools.umount)
                .arg(dir)
                .error_msg(format!("Failed to unmount {}", dir.display())),
        )
        .with_context(|| format!("unmounting {}", dir.display()))?;
    tracing::info!(dir = %dir.display(), "unmounted");
    Ok(())
}

/// Mount `dir`, run `body`, then unmount whatever `body` returned.
///
/// A failed unmount is logged, never returned. The body's result is.
pub fn with_mounted<T>(
    runner: &mut dyn CommandRunner,
    tools: &Tools,
    dir: &Path,
    body: impl FnOnce(&mut dyn CommandRunner) -> Result<T>,
) -> Result<T> {
    mount(runner, tools, dir)?;
    let result = body(&mut *runner);
    if let Err(e) = unmount(runner, tools, dir) {
        tracing::error!(dir = %dir.display(), "{e:#}");
    }
    result
}
