//! Preflight checks run before any stage touches the system.
//!
//! Validates that optional tools are present before the pipeline relies on
//! them, so a missing `dracut` is reported as such rather than as a cryptic
//! spawn failure halfway through a build.
//!
//! # Example
//!
//! ```rust
//! use kernel_builder::preflight::Locator;
//!
//! let locator = Locator::from_env();
//! if !locator.command_exists("sbsign") {
//!     println!("sbsign not installed");
//! }
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::PreflightError;

/// Executable locator over a fixed search path.
///
/// The search path is captured once (normally from `PATH`) so every lookup
/// in a run sees the same directories.
#[derive(Debug, Clone)]
pub struct Locator {
    search_path: OsString,
}

impl Locator {
    /// Locator over the process's `PATH`.
    pub fn from_env() -> Self {
        Self {
            search_path: std::env::var_os("PATH").unwrap_or_default(),
        }
    }

    /// Locator over an explicit list of directories.
    pub fn with_dirs<I, P>(dirs: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let search_path = std::env::join_paths(dirs.into_iter().map(|d| d.as_ref().to_path_buf()))?;
        Ok(Self { search_path })
    }

    /// Full path of `name` if it is found in one of the search directories.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        if self.search_path.is_empty() {
            return None;
        }
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        which::which_in(name, Some(&self.search_path), cwd).ok()
    }

    /// Check if a command exists in the search path.
    pub fn command_exists(&self, name: &str) -> bool {
        self.locate(name).is_some()
    }

    /// Fail with [`PreflightError::ToolMissing`] unless `name` is present.
    ///
    /// `purpose` completes the sentence "it is needed ...".
    pub fn require(&self, name: &str, purpose: &'static str) -> Result<PathBuf> {
        match self.locate(name) {
            Some(path) => {
                tracing::debug!(tool = name, path = %path.display(), "found tool");
                Ok(path)
            }
            None => Err(PreflightError::ToolMissing {
                tool: name.to_string(),
                purpose,
            }
            .into()),
        }
    }
}

/// Refuse to continue unless running as root.
///
/// Mounting, module installation and rewriting `/usr/src/linux` all need it.
pub fn check_superuser() -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        let program = std::env::args()
            .next()
            .and_then(|arg0| {
                Path::new(&arg0)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "kernel-builder".to_string());
        return Err(PreflightError::NotSuperuser(program).into());
    }
    Ok(())
}

/// Host name of the running system, used as the default system identifier.
pub fn local_hostname() -> Result<String> {
    let name = nix::unistd::gethostname().context("reading host name")?;
    let name = name.to_string_lossy().trim().to_string();
    if name.is_empty() {
        anyhow::bail!("host name is empty; pass --hostname explicitly");
    }
    Ok(name)
}
