//! External command execution.
//!
//! Every tool the pipeline shells out to is described by a [`Cmd`] and run
//! through a [`CommandRunner`]. The runner returns a [`CommandOutput`] so a
//! stage's outcome is a value, not a panic or an exit buried in a helper.
//!
//! # Example
//!
//! ```rust,ignore
//! use kernel_builder::process::{Cmd, CommandRunner, SystemRunner};
//!
//! let mut runner = SystemRunner;
//! runner.run(
//!     &Cmd::new("make")
//!         .arg("-j6")
//!         .current_dir("/usr/src/linux")
//!         .error_msg("Kernel build failed")
//!         .interactive(),
//! )?;
//! ```

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::Result;

use crate::error::CommandError;

/// Description of one external command invocation.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    error_msg: Option<String>,
    allow_fail: bool,
    interactive: bool,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            error_msg: None,
            allow_fail: false,
            interactive: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Run the command from `dir` instead of the current directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Message prefixed to the error when the command exits non-zero.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Return a non-zero exit as a normal [`CommandOutput`] instead of an error.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Inherit stdio so the operator sees the tool's progress.
    ///
    /// Output is not captured in this mode.
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Program followed by its arguments, lossily converted to strings.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect()
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            ..Self::default()
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.code == Some(0)
    }

    fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {code}"),
            None => "a signal".to_string(),
        }
    }
}

/// Executes [`Cmd`]s.
///
/// Implementations only report spawn failures from [`execute`](Self::execute);
/// exit status handling lives in [`run`](Self::run) so every runner treats a
/// non-zero exit the same way.
pub trait CommandRunner {
    /// Run the command to completion and report how it exited.
    fn execute(&mut self, cmd: &Cmd) -> std::result::Result<CommandOutput, CommandError>;

    /// Run the command, turning a non-zero exit into [`CommandError::Failed`]
    /// unless the command was marked [`Cmd::allow_fail`].
    fn run(&mut self, cmd: &Cmd) -> Result<CommandOutput> {
        tracing::debug!(command = %cmd, "running");
        let output = self.execute(cmd)?;

        if output.succeeded() || cmd.allow_fail {
            return Ok(output);
        }

        let stderr = output.stderr.trim();
        let detail = if stderr.is_empty() {
            String::new()
        } else {
            format!("\n{stderr}")
        };
        Err(CommandError::Failed {
            message: cmd
                .error_msg
                .clone()
                .unwrap_or_else(|| format!("{} failed", cmd.program)),
            program: cmd.program.clone(),
            status: output.status_text(),
            detail,
        }
        .into())
    }
}

/// Runs commands on the host with [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn execute(&mut self, cmd: &Cmd) -> std::result::Result<CommandOutput, CommandError> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }

        let spawn_err = |source| CommandError::Spawn {
            program: cmd.program.clone(),
            source,
        };

        if cmd.interactive {
            let status = command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .map_err(spawn_err)?;
            return Ok(CommandOutput {
                code: status.code(),
                ..CommandOutput::default()
            });
        }

        let output = command.output().map_err(spawn_err)?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
