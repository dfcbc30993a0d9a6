//! Publishing the compiled boot image.
//!
//! The image lands at `<system root>/vmlinuz/vmlinuz-<version>.efi`, or under
//! `uki/` for unified kernel images. Unsigned images are copied to a hidden
//! temp file in the destination directory and renamed into place, so the
//! final name never holds a half-written file. Signed images are written
//! by the signer straight to the destination.

pub mod signer;

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};

use crate::config::Layout;
use crate::preflight::Locator;
use crate::process::CommandRunner;

pub use signer::{Signer, SigningMaterial};

/// The published artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub path: PathBuf,
    pub signed: bool,
    pub sha256: String,
    pub size_bytes: u64,
}

/// Final path for a kernel `version`.
pub fn destination(layout: &Layout, system: &str, version: &str, unified: bool) -> PathBuf {
    layout
        .output_dir(system, unified)
        .join(format!("vmlinuz-{version}.efi"))
}

pub struct Publisher<'a> {
    layout: &'a Layout,
    locator: &'a Locator,
    system: &'a str,
}

impl<'a> Publisher<'a> {
    pub fn new(layout: &'a Layout, locator: &'a Locator, system: &'a str) -> Self {
        Self {
            layout,
            locator,
            system,
        }
    }

    /// Publish `image` for `version`, signing it first if `sign` is set.
    pub fn publish(
        &self,
        runner: &mut dyn CommandRunner,
        image: &Path,
        version: &str,
        unified: bool,
        sign: bool,
    ) -> Result<Published> {
        if !image.is_file() {
            bail!("compiled boot image not found at {}", image.display());
        }

        let dest = destination(self.layout, self.system, version, unified);
        if let Some(dir) = dest.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating output directory '{}'", dir.display()))?;
        }

        if sign {
            Signer::new(self.layout, self.locator).sign(runner, image, &dest)?;
            if !dest.is_file() {
                bail!("signer finished but {} was not written", dest.display());
            }
        } else {
            copy_then_rename(image, &dest)?;
            tracing::info!(dest = %dest.display(), "copied boot image to local source directory");
        }

        let (sha256, size_bytes) = sha256_file(&dest)?;
        tracing::info!(
            path = %dest.display(),
            signed = sign,
            sha256 = %sha256,
            size_bytes,
            "published kernel {version}"
        );

        Ok(Published {
            path: dest,
            signed: sign,
            sha256,
            size_bytes,
        })
    }
}

/// Copy `src` to `dst` through a temp file in `dst`'s directory.
///
/// On failure the temp file is removed and `dst` is untouched.
pub fn copy_then_rename(src: &Path, dst: &Path) -> Result<()> {
    let name = dst
        .file_name()
        .with_context(|| format!("destination has no file name: {}", dst.display()))?;
    let tmp = dst.with_file_name(format!(
        ".{}.tmp-{}",
        name.to_string_lossy(),
        std::process::id()
    ));

    let result = fs::copy(src, &tmp)
        .with_context(|| format!("copying {} to {}", src.display(), tmp.display()))
        .and_then(|_| {
            File::open(&tmp)
                .and_then(|f| f.sync_all())
                .with_context(|| format!("syncing {}", tmp.display()))
        })
        .and_then(|_| {
            fs::rename(&tmp, dst)
                .with_context(|| format!("renaming {} to {}", tmp.display(), dst.display()))
        });

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}
