//! Kernel compilation, module installation and initramfs generation.
//!
//! Stages run strictly in order and stop at the first failure. A unified
//! kernel image embeds the initramfs, so when one is requested the kernel is
//! compiled a second time after the initramfs exists:
//!
//! ```text
//! plain:    compile -> modules_install
//! unified:  compile -> modules_install -> initramfs -> compile
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::Layout;
use crate::preflight::Locator;
use crate::process::{Cmd, CommandRunner};

/// What to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    /// Parallel jobs passed to `make -j`.
    pub jobs: usize,
    /// Produce a unified kernel image with an embedded initramfs.
    pub unified: bool,
    /// Full kernel version, e.g. `6.9.1-myhost-1.2.3`.
    pub version: String,
    /// Where the initramfs archive is written.
    pub initramfs: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Compile,
    InstallModules,
    Initramfs,
    /// Second compile that embeds the fresh initramfs.
    Recompile,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Compile => "compile",
            Stage::InstallModules => "modules_install",
            Stage::Initramfs => "initramfs",
            Stage::Recompile => "recompile",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Stage::Compile => "compiling kernel",
            Stage::InstallModules => "installing kernel modules",
            Stage::Initramfs => "building initramfs",
            Stage::Recompile => "compiling kernel with the newly built initramfs",
        }
    }

    /// Stage sequence for a plain image or a unified kernel image.
    pub fn sequence(unified: bool) -> &'static [Stage] {
        if unified {
            &[
                Stage::Compile,
                Stage::InstallModules,
                Stage::Initramfs,
                Stage::Recompile,
            ]
        } else {
            &[Stage::Compile, Stage::InstallModules]
        }
    }
}

/// Runs build stages inside one work directory.
pub struct StageRunner<'a> {
    runner: &'a mut dyn CommandRunner,
    layout: &'a Layout,
    locator: &'a Locator,
    work_dir: &'a Path,
}

impl<'a> StageRunner<'a> {
    pub fn new(
        runner: &'a mut dyn CommandRunner,
        layout: &'a Layout,
        locator: &'a Locator,
        work_dir: &'a Path,
    ) -> Self {
        Self {
            runner,
            layout,
            locator,
            work_dir,
        }
    }

    /// Run every stage of `plan` in order, stopping at the first failure.
    pub fn run(&mut self, plan: &BuildPlan) -> Result<()> {
        for stage in Stage::sequence(plan.unified) {
            tracing::info!(version = %plan.version, "{}", stage.describe());
            let outcome = match stage {
                Stage::Compile | Stage::Recompile => self.compile(plan.jobs),
                Stage::InstallModules => self.install_modules(),
                Stage::Initramfs => self.build_initramfs(&plan.version, &plan.initramfs),
            };
            outcome.with_context(|| {
                format!("{} stage failed for kernel {}", stage.name(), plan.version)
            })?;
        }
        Ok(())
    }

    /// `make -j<jobs>` in the work directory.
    pub fn compile(&mut self, jobs: usize) -> Result<()> {
        self.runner.run(
            &Cmd::new(&self.layout.tools.make)
                .arg(format!("-j{}", jobs.max(1)))
                .current_dir(self.work_dir)
                .error_msg("Kernel build failed")
                .interactive(),
        )?;
        Ok(())
    }

    /// `make modules_install` into the live module tree.
    pub fn install_modules(&mut self) -> Result<()> {
        self.runner.run(
            &Cmd::new(&self.layout.tools.make)
                .arg("modules_install")
                .current_dir(self.work_dir)
                .error_msg("Module install failed")
                .interactive(),
        )?;
        Ok(())
    }

    /// Generate the initramfs archive for `version` at `output`.
    pub fn build_initramfs(&mut self, version: &str, output: &Path) -> Result<()> {
        let tool = &self.layout.tools.initramfs;
        self.locator.require(tool, "to generate an initramfs")?;

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating initramfs directory '{}'", parent.display()))?;
        }

        self.runner.run(
            &Cmd::new(tool)
                .arg("-f")
                .arg(format!("--kver={version}"))
                .arg(output)
                .current_dir(self.work_dir)
                .error_msg(format!("Error building initramfs for {version}"))
                .interactive(),
        )?;
        Ok(())
    }
}
