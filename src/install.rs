//! Installing the published image as the boot loader entry.
//!
//! Overwrites `<boot>/efi/boot/bootx64.efi`. No backup is taken here. A boot
//! partition mounted by this step is unmounted again whatever happens to the
//! copy.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::Layout;
use crate::mount;
use crate::process::CommandRunner;
use crate::publish::copy_then_rename;

/// Copy `artifact` to the boot loader entry path. Returns that path.
///
/// The boot partition is mounted for the copy unless it already is, in
/// which case it is left mounted.
pub fn install(runner: &mut dyn CommandRunner, layout: &Layout, artifact: &Path) -> Result<PathBuf> {
    let boot_dir = &layout.boot_dir;
    fs::create_dir_all(boot_dir)
        .with_context(|| format!("creating boot mount point '{}'", boot_dir.display()))?;

    install_entry(runner, layout, artifact, mount::is_mounted(boot_dir))
}

fn install_entry(
    runner: &mut dyn CommandRunner,
    layout: &Layout,
    artifact: &Path,
    already_mounted: bool,
) -> Result<PathBuf> {
    let entry = layout.boot_entry_path();
    let copy = |_: &mut dyn CommandRunner| -> Result<()> {
        if let Some(dir) = entry.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating boot loader directory '{}'", dir.display()))?;
        }
        copy_then_rename(artifact, &entry)
            .with_context(|| format!("copying {} to boot", artifact.display()))?;
        tracing::info!(entry = %entry.display(), "copied kernel to boot");
        Ok(())
    };

    if already_mounted {
        tracing::debug!(dir = %layout.boot_dir.display(), "boot partition already mounted");
        copy(runner)?;
    } else {
        mount::with_mounted(runner, &layout.tools, &layout.boot_dir, copy)?;
    }

    Ok(entry)
}
