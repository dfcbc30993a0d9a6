//! The build-sign-install pipeline.
//!
//! ```text
//! preflight ─► workspace::prepare ─► pointer.redirect(work dir)
//!     ─► stages (compile, modules_install[, initramfs, compile])
//!     ─► publish (copy or sign)
//!     ─► pointer.restore(canonical) ─► workspace::teardown
//!     ─► install (optional)
//! ```
//!
//! Once the workspace exists, restore and teardown run on every path,
//! restore first so the pointer never references a deleted scratch copy.
//! Failures in that cleanup are logged and never replace the error that
//! stopped the build.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::build::{BuildPlan, StageRunner};
use crate::config::Layout;
use crate::install;
use crate::kernel::KernelSelection;
use crate::preflight::Locator;
use crate::process::CommandRunner;
use crate::publish::{Published, Publisher, Signer};
use crate::source_link::SourcePointer;
use crate::workspace::{self, Workspace};

/// Operator-selected switches for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub jobs: usize,
    /// Build a unified kernel image.
    pub unified: bool,
    pub sign: bool,
    pub install: bool,
    /// Compile in a scratch copy instead of the canonical tree.
    pub scratch: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            jobs: 6,
            unified: false,
            sign: false,
            install: false,
            scratch: false,
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub version: String,
    pub published: Published,
    /// Boot loader entry, if the image was installed.
    pub installed: Option<PathBuf>,
}

pub struct Pipeline<'a> {
    runner: &'a mut dyn CommandRunner,
    layout: &'a Layout,
    locator: &'a Locator,
    system: &'a str,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        runner: &'a mut dyn CommandRunner,
        layout: &'a Layout,
        locator: &'a Locator,
        system: &'a str,
    ) -> Self {
        Self {
            runner,
            layout,
            locator,
            system,
        }
    }

    pub fn run(&mut self, selection: &KernelSelection, options: &BuildOptions) -> Result<PipelineReport> {
        self.preflight(options)?;

        let workspace = workspace::prepare(
            &mut *self.runner,
            self.layout,
            self.system,
            selection,
            options.scratch,
        )?;

        let pointer = SourcePointer::new(&self.layout.source_link);
        let outcome = self.build_and_publish(&pointer, selection, &workspace, options);

        let restored = pointer
            .restore(selection.source_dir())
            .context("restoring kernel source symlink");
        let torn_down = workspace::teardown(&mut *self.runner, self.layout, &workspace)
            .context("tearing down scratch workspace");

        let published = match outcome {
            Ok(published) => published,
            Err(e) => {
                for cleanup in [restored, torn_down] {
                    if let Err(cleanup) = cleanup {
                        tracing::error!("{cleanup:#}");
                    }
                }
                return Err(e);
            }
        };

        // Restore failure fails the run; teardown failure is only logged.
        restored?;
        if let Err(e) = torn_down {
            tracing::error!("{e:#}");
        }

        let installed = if options.install {
            let entry = install::install(&mut *self.runner, self.layout, &published.path)
                .with_context(|| format!("installing kernel {}", selection.version()))?;
            tracing::info!(
                version = selection.version(),
                system = self.system,
                "installed kernel"
            );
            Some(entry)
        } else {
            None
        };

        Ok(PipelineReport {
            version: selection.version().to_string(),
            published,
            installed,
        })
    }

    /// Fail before anything changes if a requested stage cannot run.
    fn preflight(&self, options: &BuildOptions) -> Result<()> {
        let tools = &self.layout.tools;
        self.locator.require(&tools.make, "to build the kernel")?;
        if options.unified {
            self.locator
                .require(&tools.initramfs, "to generate an initramfs")?;
        }
        if options.sign {
            Signer::new(self.layout, self.locator).check()?;
        }
        if (options.scratch && self.layout.scratch_mount) || options.install {
            self.locator.require(&tools.mount, "to mount filesystems")?;
            self.locator.require(&tools.umount, "to unmount filesystems")?;
        }
        Ok(())
    }

    fn build_and_publish(
        &mut self,
        pointer: &SourcePointer,
        selection: &KernelSelection,
        workspace: &Workspace,
        options: &BuildOptions,
    ) -> Result<Published> {
        let work_dir = workspace.work_dir();
        pointer.redirect(work_dir)?;

        let plan = BuildPlan {
            jobs: options.jobs,
            unified: options.unified,
            version: selection.version().to_string(),
            initramfs: self.layout.initramfs_path(self.system),
        };
        StageRunner::new(&mut *self.runner, self.layout, self.locator, work_dir).run(&plan)?;

        let image = work_dir.join(&self.layout.boot_image);
        Publisher::new(self.layout, self.locator, self.system).publish(
            &mut *self.runner,
            &image,
            selection.version(),
            options.unified,
            options.sign,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CommandError, PreflightError};
    use crate::kernel::KCONFIG_FILENAME;
    use crate::process::testing::RecordingRunner;
    use crate::process::CommandOutput;
    use std::cell::RefCell;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::rc::Rc;
    use tempfile::TempDir;

    struct Host {
        _temp: TempDir,
        layout: Layout,
        locator: Locator,
        selection: KernelSelection,
    }

    fn host() -> Host {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        let bin = root.join("bin");
        fs::create_dir_all(&bin).unwrap();
        for tool in ["make", "dracut", "sbsign", "mount", "umount"] {
            let path = bin.join(tool);
            fs::write(&path, "#!/bin/sh\n").unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let keys = root.join("etc/keys/efikeys");
        fs::create_dir_all(&keys).unwrap();
        fs::write(keys.join("db.key"), "key").unwrap();
        fs::write(keys.join("db.crt"), "crt").unwrap();

        let layout = Layout {
            source_root: root.join("usr/local/src"),
            scratch_root: root.join("var/tmp/linux"),
            source_link: root.join("usr/src/linux"),
            signing_key: keys.join("db.key"),
            signing_cert: keys.join("db.crt"),
            boot_dir: root.join("boot"),
            ..Layout::default()
        };

        // The recording runner does not compile, so the tree already holds
        // the image `make` would produce.
        let tree = layout.kernels_dir("myhost").join("linux-6.9.1");
        fs::create_dir_all(tree.join("arch/x86/boot")).unwrap();
        fs::write(
            tree.join(KCONFIG_FILENAME),
            "CONFIG_LOCALVERSION=\"-myhost-1.2.3\"\n",
        )
        .unwrap();
        fs::write(tree.join("arch/x86/boot/bzImage"), "unsigned image").unwrap();

        let selection = KernelSelection::select(&layout, "myhost", "linux-6.9.1").unwrap();
        Host {
            locator: Locator::with_dirs([bin]).unwrap(),
            _temp: temp,
            layout,
            selection,
        }
    }

    fn run(host: &Host, runner: &mut RecordingRunner, options: &BuildOptions) -> Result<PipelineReport> {
        Pipeline::new(runner, &host.layout, &host.locator, "myhost").run(&host.selection, options)
    }

    fn link_target(host: &Host) -> PathBuf {
        fs::read_link(&host.layout.source_link).unwrap()
    }

    #[test]
    fn test_plain_in_place_build() {
        let host = host();
        let mut runner = RecordingRunner::new();

        let report = run(&host, &mut runner, &BuildOptions::default()).unwrap();

        assert_eq!(report.version, "6.9.1-myhost-1.2.3");
        assert_eq!(
            runner.calls,
            vec![vec!["make", "-j6"], vec!["make", "modules_install"]]
        );
        assert_eq!(
            report.published.path,
            host.layout
                .system_dir("myhost")
                .join("vmlinuz/vmlinuz-6.9.1-myhost-1.2.3.efi")
        );
        assert_eq!(fs::read_to_string(&report.published.path).unwrap(), "unsigned image");
        assert!(!report.published.signed);
        assert!(report.installed.is_none());
        assert_eq!(link_target(&host), host.selection.source_dir());
    }

    #[test]
    fn test_signed_build_publishes_signer_output() {
        let host = host();
        let mut runner = RecordingRunner::new().with_hook(|cmd| {
            if cmd.program() != "sbsign" {
                return None;
            }
            let args = cmd.argv();
            let pos = args.iter().position(|a| a == "--output")?;
            fs::write(&args[pos + 1], "signed image").unwrap();
            Some(CommandOutput::success())
        });
        let options = BuildOptions {
            sign: true,
            ..BuildOptions::default()
        };

        let report = run(&host, &mut runner, &options).unwrap();

        let sign_call = runner.calls.iter().find(|c| c[0] == "sbsign").unwrap();
        let image = host.selection.source_dir().join("arch/x86/boot/bzImage");
        assert_eq!(sign_call[6], report.published.path.to_string_lossy());
        assert_eq!(sign_call[7], image.to_string_lossy());
        assert_eq!(fs::read_to_string(&report.published.path).unwrap(), "signed image");
        assert!(report.published.signed);
    }

    #[test]
    fn test_missing_key_never_invokes_signer() {
        let host = host();
        fs::remove_file(&host.layout.signing_key).unwrap();
        let mut runner = RecordingRunner::new();
        let options = BuildOptions {
            sign: true,
            ..BuildOptions::default()
        };

        let err = run(&host, &mut runner, &options).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PreflightError>(),
            Some(PreflightError::KeyMissing(_))
        ));
        assert!(runner.calls.is_empty());
        assert!(!host.layout.source_link.is_symlink());
    }

    #[test]
    fn test_missing_certificate_never_invokes_signer() {
        let host = host();
        fs::remove_file(&host.layout.signing_cert).unwrap();
        let mut runner = RecordingRunner::new();
        let options = BuildOptions {
            sign: true,
            ..BuildOptions::default()
        };

        let err = run(&host, &mut runner, &options).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PreflightError>(),
            Some(PreflightError::CertificateMissing(_))
        ));
        assert!(!runner.programs().contains(&"sbsign".to_string()));
    }

    #[test]
    fn test_unified_build_goes_to_uki_dir() {
        let host = host();
        let mut runner = RecordingRunner::new();
        let options = BuildOptions {
            unified: true,
            jobs: 12,
            ..BuildOptions::default()
        };

        let report = run(&host, &mut runner, &options).unwrap();

        assert_eq!(runner.programs(), vec!["make", "make", "dracut", "make"]);
        assert_eq!(runner.count(&["make", "-j12"]), 2);
        assert_eq!(
            report.published.path,
            host.layout
                .output_dir("myhost", true)
                .join("vmlinuz-6.9.1-myhost-1.2.3.efi")
        );
    }

    #[test]
    fn test_scratch_build_redirects_then_restores() {
        let host = host();
        let link = host.layout.source_link.clone();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_in_hook = Rc::clone(&seen);
        let mut runner = RecordingRunner::new().with_hook(move |cmd| {
            if cmd.program() == "make" {
                seen_in_hook.borrow_mut().push((
                    fs::read_link(&link).unwrap(),
                    cmd.get_current_dir().map(Path::to_path_buf),
                ));
            }
            None
        });
        let options = BuildOptions {
            scratch: true,
            ..BuildOptions::default()
        };

        let report = run(&host, &mut runner, &options).unwrap();

        let scratch = host.layout.scratch_dir("myhost").join("linux-6.9.1");
        for (target, cwd) in seen.borrow().iter() {
            assert_eq!(target, &scratch);
            assert_eq!(cwd.as_deref(), Some(scratch.as_path()));
        }
        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(runner.programs(), vec!["mount", "make", "make", "umount"]);
        assert_eq!(link_target(&host), host.selection.source_dir());
        assert!(!scratch.exists());
        assert!(host.selection.source_dir().join("arch/x86/boot/bzImage").is_file());
        assert_eq!(fs::read_to_string(&report.published.path).unwrap(), "unsigned image");
    }

    #[test]
    fn test_failed_compile_still_restores_and_tears_down() {
        let host = host();
        let mut runner = RecordingRunner::new().fail_on("make", 1);
        let options = BuildOptions {
            scratch: true,
            install: true,
            ..BuildOptions::default()
        };

        let err = run(&host, &mut runner, &options).unwrap_err();

        assert!(format!("{err:#}").contains("Kernel build failed"));
        assert_eq!(runner.programs(), vec!["mount", "make", "umount"]);
        assert_eq!(link_target(&host), host.selection.source_dir());
        assert!(!host.layout.scratch_dir("myhost").join("linux-6.9.1").exists());
        assert!(!host.layout.output_dir("myhost", false).exists());
    }

    #[test]
    fn test_unmount_failure_does_not_mask_build_failure() {
        let host = host();
        let mut runner = RecordingRunner::new()
            .fail_on("make", 1)
            .fail_on("umount", 1);
        let options = BuildOptions {
            scratch: true,
            ..BuildOptions::default()
        };

        let err = run(&host, &mut runner, &options).unwrap_err();

        let message = format!("{err:#}");
        assert!(message.contains("Kernel build failed"), "{message}");
        assert!(!message.contains("unmount"), "{message}");
        match err.downcast_ref::<CommandError>() {
            Some(CommandError::Failed { program, .. }) => assert_eq!(program, "make"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runner.programs(), vec!["mount", "make", "umount"]);
        assert_eq!(link_target(&host), host.selection.source_dir());
    }

    #[test]
    fn test_teardown_failure_does_not_mask_success() {
        let host = host();
        let mut runner = RecordingRunner::new().fail_on("umount", 1);
        let options = BuildOptions {
            scratch: true,
            ..BuildOptions::default()
        };

        let report = run(&host, &mut runner, &options).unwrap();

        assert!(report.published.path.is_file());
        assert_eq!(link_target(&host), host.selection.source_dir());
    }

    #[test]
    fn test_install_after_publish() {
        let host = host();
        let mut runner = RecordingRunner::new();
        let options = BuildOptions {
            install: true,
            ..BuildOptions::default()
        };

        let report = run(&host, &mut runner, &options).unwrap();

        let entry = report.installed.unwrap();
        assert_eq!(entry, host.layout.boot_entry_path());
        assert_eq!(fs::read_to_string(&entry).unwrap(), "unsigned image");
        assert_eq!(
            runner.programs(),
            vec!["make", "make", "mount", "umount"]
        );
    }

    #[test]
    fn test_missing_initramfs_tool_fails_before_compile() {
        let host = host();
        let only_make = host.layout.source_root.join("only-make");
        fs::create_dir_all(&only_make).unwrap();
        fs::write(only_make.join("make"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(only_make.join("make"), fs::Permissions::from_mode(0o755)).unwrap();
        let locator = Locator::with_dirs([only_make]).unwrap();
        let mut runner = RecordingRunner::new();
        let options = BuildOptions {
            unified: true,
            ..BuildOptions::default()
        };

        let err = Pipeline::new(&mut runner, &host.layout, &locator, "myhost")
            .run(&host.selection, &options)
            .unwrap_err();

        match err.downcast_ref::<PreflightError>() {
            Some(PreflightError::ToolMissing { tool, .. }) => assert_eq!(tool, "dracut"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(runner.calls.is_empty());
    }
}
