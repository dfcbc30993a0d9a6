//! The `/usr/src/linux` pointer.
//!
//! Out-of-tree module builds and in-tree scripts dereference this link to
//! find "the kernel currently being built". While a build runs it points at
//! the work directory; before and after, at the canonical source tree.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Symlink at a fixed well-known path.
#[derive(Debug, Clone)]
pub struct SourcePointer {
    link: PathBuf,
}

impl SourcePointer {
    pub fn new(link: impl Into<PathBuf>) -> Self {
        Self { link: link.into() }
    }

    pub fn path(&self) -> &Path {
        &self.link
    }

    /// Current link target, if the link exists.
    pub fn target(&self) -> Option<PathBuf> {
        fs::read_link(&self.link).ok()
    }

    /// Point the link at the active work directory.
    pub fn redirect(&self, target: &Path) -> Result<()> {
        self.replace(target)?;
        tracing::info!(link = %self.link.display(), target = %target.display(), "redirected source link");
        Ok(())
    }

    /// Point the link back at the canonical source directory.
    pub fn restore(&self, canonical: &Path) -> Result<()> {
        self.replace(canonical)?;
        tracing::info!(link = %self.link.display(), target = %canonical.display(), "restored source link");
        Ok(())
    }

    // Delete then recreate. Nothing reads the link mid-redirect.
    fn replace(&self, target: &Path) -> Result<()> {
        match fs::symlink_metadata(&self.link) {
            Ok(meta) if meta.file_type().is_symlink() => {
                fs::remove_file(&self.link).with_context(|| {
                    format!("removing symlink '{}'", self.link.display())
                })?;
            }
            Ok(_) => bail!(
                "{} exists and is not a symlink; refusing to replace it",
                self.link.display()
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("inspecting '{}'", self.link.display()))
            }
        }

        if let Some(parent) = self.link.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory '{}'", parent.display()))?;
        }
        std::os::unix::fs::symlink(target, &self.link).with_context(|| {
            format!(
                "creating symlink '{}' -> '{}'",
                self.link.display(),
                target.display()
            )
        })
    }
}
