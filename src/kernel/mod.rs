//! Kernel source tree discovery and version derivation.
//!
//! A system keeps one directory per kernel version under
//! `<source root>/<system>/linux/`, e.g. `linux-6.9.1`. The full version used
//! to name every artifact combines the upstream version from the directory
//! name with the `CONFIG_LOCALVERSION` suffix of that tree's `.config`.

pub mod prompt;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::Layout;
use crate::error::PreflightError;

/// Kernel build configuration file inside a source tree.
pub const KCONFIG_FILENAME: &str = ".config";

const LOCALVERSION_KEY: &str = "CONFIG_LOCALVERSION";

/// One chosen kernel source tree. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSelection {
    dir_name: String,
    source_dir: PathBuf,
    version: String,
}

impl KernelSelection {
    /// Select the tree named `dir_name` under the system's kernel directory.
    pub fn select(layout: &Layout, system: &str, dir_name: &str) -> Result<Self> {
        let kernels_dir = layout.kernels_dir(system);
        let source_dir = kernels_dir.join(dir_name);
        if !source_dir.is_dir() {
            return Err(PreflightError::UnknownKernel {
                name: dir_name.to_string(),
                dir: kernels_dir,
            }
            .into());
        }
        Self::from_source_dir(source_dir)
    }

    /// Build a selection from a kernel source directory.
    pub fn from_source_dir(source_dir: PathBuf) -> Result<Self> {
        let dir_name = source_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("kernel source path has no name: {}", source_dir.display()))?;

        let config_path = source_dir.join(KCONFIG_FILENAME);
        if !config_path.is_file() {
            return Err(PreflightError::ConfigMissing(config_path).into());
        }
        let kconfig = fs::read_to_string(&config_path)
            .with_context(|| format!("reading kernel config '{}'", config_path.display()))?;
        let local = parse_local_version(&kconfig)
            .ok_or_else(|| PreflightError::LocalVersionMissing(config_path.clone()))?;

        let version = full_version(&dir_name, &local);
        tracing::debug!(dir = %dir_name, version = %version, "derived kernel version");

        Ok(Self {
            dir_name,
            source_dir,
            version,
        })
    }

    /// Directory name, e.g. `linux-6.9.1`.
    pub fn dir_name(&self) -> &str {
        &self.dir_name
    }

    /// Canonical source directory. Never deleted by the pipeline.
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Full kernel version, e.g. `6.9.1-myhost-1.2.3`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Published artifact name, e.g. `vmlinuz-6.9.1-myhost-1.2.3.efi`.
    pub fn artifact_name(&self) -> String {
        format!("vmlinuz-{}.efi", self.version)
    }
}

/// Kernel source directories for `system`, newest name first.
pub fn list_kernels(layout: &Layout, system: &str) -> Result<Vec<String>> {
    let system_dir = layout.system_dir(system);
    if !system_dir.is_dir() {
        return Err(PreflightError::SourceDirMissing(system_dir).into());
    }

    let kernels_dir = layout.kernels_dir(system);
    let mut kernels = Vec::new();
    if kernels_dir.is_dir() {
        for entry in fs::read_dir(&kernels_dir)
            .with_context(|| format!("reading kernel directory '{}'", kernels_dir.display()))?
        {
            let entry = entry.with_context(|| {
                format!("reading entry under '{}'", kernels_dir.display())
            })?;
            if !entry.path().is_dir() {
                continue;
            }
            kernels.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    if kernels.is_empty() {
        return Err(PreflightError::NoKernels(kernels_dir).into());
    }

    kernels.sort_by(|a, b| b.cmp(a));
    Ok(kernels)
}

/// Value of `CONFIG_LOCALVERSION` with quotes and the leading `-` removed.
///
/// `CONFIG_LOCALVERSION="-myhost-1.2.3"` yields `myhost-1.2.3`, so the full
/// version matches the release name `make` gives the kernel and its modules.
/// Returns `None` if the key is absent; the last assignment wins.
pub fn parse_local_version(kconfig: &str) -> Option<String> {
    kconfig
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .filter(|(key, _)| key.trim() == LOCALVERSION_KEY)
        .map(|(_, value)| {
            let value = value.trim().replace('"', "");
            value.strip_prefix('-').unwrap_or(&value).to_string()
        })
        .last()
}

/// Combine an upstream tree name and a local-version suffix.
pub fn full_version(dir_name: &str, local: &str) -> String {
    let upstream = dir_name.strip_prefix("linux-").unwrap_or(dir_name);
    if local.is_empty() {
        upstream.to_string()
    } else {
        format!("{upstream}-{local}")
    }
}
