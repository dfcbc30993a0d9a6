//! Typed errors for failures callers need to tell apart.
//!
//! Everything else travels as `anyhow::Error` with context attached. These
//! variants are wrapped in that same `anyhow::Error` and can be recovered
//! with `downcast_ref`.

use std::path::PathBuf;

/// A precondition was not met before a stage could start.
#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    /// Required external tool is not on the search path.
    #[error("{tool} was not found in PATH; it is needed {purpose}")]
    ToolMissing { tool: String, purpose: &'static str },

    /// Signing key file is absent.
    #[error("can't find the signing key, which is needed for signing the kernel; expected it at {0}")]
    KeyMissing(PathBuf),

    /// Signing certificate file is absent.
    #[error("can't find the signing certificate, which is needed for signing the kernel; expected it at {0}")]
    CertificateMissing(PathBuf),

    /// The per-system source directory does not exist.
    #[error("{0} does not exist")]
    SourceDirMissing(PathBuf),

    /// No kernel source trees under the system's `linux/` directory.
    #[error("no kernels were found in {0}")]
    NoKernels(PathBuf),

    /// Named kernel source tree does not exist.
    #[error("kernel source tree '{name}' not found in {dir}")]
    UnknownKernel { name: String, dir: PathBuf },

    /// Kernel build configuration file is absent.
    #[error("kernel build configuration not found at {0}")]
    ConfigMissing(PathBuf),

    /// Kernel build configuration has no `CONFIG_LOCALVERSION` line.
    #[error("CONFIG_LOCALVERSION is not set in {0}")]
    LocalVersionMissing(PathBuf),

    /// Process is not running with root privileges.
    #[error("{0}: must be superuser")]
    NotSuperuser(String),
}

/// An external command could not be run or exited unsuccessfully.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The program could not be spawned at all.
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited with a non-zero status.
    #[error("{message}: {program} exited with {status}{detail}")]
    Failed {
        message: String,
        program: String,
        status: String,
        detail: String,
    },
}
