//! Secure boot signing with `sbsign`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::config::Layout;
use crate::error::PreflightError;
use crate::preflight::Locator;
use crate::process::{Cmd, CommandRunner};

/// Key and certificate pair. Read-only inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningMaterial {
    pub key: PathBuf,
    pub cert: PathBuf,
}

pub struct Signer<'a> {
    layout: &'a Layout,
    locator: &'a Locator,
}

impl<'a> Signer<'a> {
    pub fn new(layout: &'a Layout, locator: &'a Locator) -> Self {
        Self { layout, locator }
    }

    /// Verify the signing tool, key and certificate, in that order.
    pub fn check(&self) -> Result<SigningMaterial> {
        self.locator.require(
            &self.layout.tools.signer,
            "to sign the efi executable to be used with secure boot",
        )?;

        let key = self.layout.signing_key.clone();
        if !key.is_file() {
            return Err(PreflightError::KeyMissing(key).into());
        }
        let cert = self.layout.signing_cert.clone();
        if !cert.is_file() {
            return Err(PreflightError::CertificateMissing(cert).into());
        }

        Ok(SigningMaterial { key, cert })
    }

    /// Sign `input`, writing the signed image to `output`.
    pub fn sign(&self, runner: &mut dyn CommandRunner, input: &Path, output: &Path) -> Result<()> {
        let material = self.check()?;
        runner.run(
            &Cmd::new(&self.layout.tools.signer)
                .arg("--key")
                .arg(&material.key)
                .arg("--cert")
                .arg(&material.cert)
                .arg("--output")
                .arg(output)
                .arg(input)
                .error_msg("Error signing kernel"),
        )?;
        tracing::info!(output = %output.display(), "signed kernel image");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::RecordingRunner;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        layout: Layout,
        locator: Locator,
    }

    fn fixture(with_tool: bool, with_key: bool, with_cert: bool) -> Fixture {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        if with_tool {
            let tool = bin.join("sbsign");
            fs::write(&tool, "#!/bin/sh\n").unwrap();
            fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        }
        let keys = temp.path().join("keys");
        fs::create_dir_all(&keys).unwrap();
        if with_key {
            fs::write(keys.join("db.key"), "key").unwrap();
        }
        if with_cert {
            fs::write(keys.join("db.crt"), "crt").unwrap();
        }
        let layout = Layout {
            signing_key: keys.join("db.key"),
            signing_cert: keys.join("db.crt"),
            ..Layout::default()
        };
        let locator = Locator::with_dirs([bin]).unwrap();
        Fixture {
            temp,
            layout,
            locator,
        }
    }

    fn sign_err(fx: &Fixture) -> (anyhow::Error, RecordingRunner) {
        let mut runner = RecordingRunner::new();
        let err = Signer::new(&fx.layout, &fx.locator)
            .sign(&mut runner, Path::new("bzImage"), &fx.temp.path().join("out.efi"))
            .unwrap_err();
        (err, runner)
    }

    #[test]
    fn test_missing_tool() {
        let (err, runner) = sign_err(&fixture(false, true, true));
        assert!(matches!(
            err.downcast_ref::<PreflightError>(),
            Some(PreflightError::ToolMissing { .. })
        ));
        assert!(runner.calls.is_empty());
    }

    #[test]
    fn test_missing_key() {
        let (err, runner) = sign_err(&fixture(true, false, true));
        assert!(matches!(
            err.downcast_ref::<PreflightError>(),
            Some(PreflightError::KeyMissing(_))
        ));
        assert!(runner.calls.is_empty());
    }

    #[test]
    fn test_missing_certificate() {
        let (err, runner) = sign_err(&fixture(true, true, false));
        assert!(matches!(
            err.downcast_ref::<PreflightError>(),
            Some(PreflightError::CertificateMissing(_))
        ));
        assert!(runner.calls.is_empty());
    }

    #[test]
    fn test_sign_invocation() {
        let fx = fixture(true, true, true);
        let mut runner = RecordingRunner::new();
        let output = fx.temp.path().join("out.efi");

        Signer::new(&fx.layout, &fx.locator)
            .sign(&mut runner, Path::new("/work/arch/x86/boot/bzImage"), &output)
            .unwrap();

        let key = fx.layout.signing_key.to_string_lossy().into_owned();
        let cert = fx.layout.signing_cert.to_string_lossy().into_owned();
        let output = output.to_string_lossy().into_owned();
        assert_eq!(
            runner.calls,
            vec![vec![
                "sbsign",
                "--key",
                key.as_str(),
                "--cert",
                cert.as_str(),
                "--output",
                output.as_str(),
                "/work/arch/x86/boot/bzImage",
            ]]
        );
    }

    #[test]
    fn test_signer_failure_is_error() {
        let fx = fixture(true, true, true);
        let mut runner = RecordingRunner::new().fail_on("sbsign", 1);

        let err = Signer::new(&fx.layout, &fx.locator)
            .sign(&mut runner, Path::new("bzImage"), &fx.temp.path().join("out.efi"))
            .unwrap_err();

        assert!(format!("{err:#}").contains("Error signing kernel"));
    }
}
