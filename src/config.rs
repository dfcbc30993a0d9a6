//! Host layout: every fixed path and tool name the pipeline touches.
//!
//! Defaults describe a host where kernel trees live under
//! `/usr/local/src/<system>/linux/`. Any of them can be overridden from a
//! TOML file:
//!
//! ```toml
//! source_root = "/srv/kernels"
//! scratch_root = "/mnt/ramdisk/linux"
//! scratch_mount = false
//!
//! [tools]
//! signer = "/usr/local/bin/sbsign"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default location of the optional configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/kernel-builder.toml";

/// Names (or paths) of the external tools the pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tools {
    pub make: String,
    pub initramfs: String,
    pub signer: String,
    pub mount: String,
    pub umount: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            make: "make".into(),
            initramfs: "dracut".into(),
            signer: "sbsign".into(),
            mount: "mount".into(),
            umount: "umount".into(),
        }
    }
}

/// Filesystem layout for one host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Layout {
    /// Parent of the per-system source roots.
    pub source_root: PathBuf,
    /// Parent of the per-system scratch directories.
    pub scratch_root: PathBuf,
    /// Mount the scratch parent before copying (needs an fstab entry).
    pub scratch_mount: bool,
    /// Symlink other tooling reads to find the kernel being built.
    pub source_link: PathBuf,
    /// Secure boot signing key.
    pub signing_key: PathBuf,
    /// Secure boot signing certificate.
    pub signing_cert: PathBuf,
    /// Boot partition mount point.
    pub boot_dir: PathBuf,
    /// Boot loader entry, relative to `boot_dir`.
    pub boot_entry: PathBuf,
    /// Compiled boot image, relative to the work directory.
    pub boot_image: PathBuf,
    pub tools: Tools,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from("/usr/local/src"),
            scratch_root: PathBuf::from("/var/tmp/linux"),
            scratch_mount: true,
            source_link: PathBuf::from("/usr/src/linux"),
            signing_key: PathBuf::from("/etc/keys/efikeys/db.key"),
            signing_cert: PathBuf::from("/etc/keys/efikeys/db.crt"),
            boot_dir: PathBuf::from("/boot"),
            boot_entry: PathBuf::from("efi/boot/bootx64.efi"),
            boot_image: PathBuf::from("arch/x86/boot/bzImage"),
            tools: Tools::default(),
        }
    }
}

impl Layout {
    /// Load overrides from `path`, falling back to defaults for unset keys.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading configuration '{}'", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("parsing configuration '{}'", path.display()))
    }

    /// Load `path` if given; otherwise the default file if it exists.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.is_file() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// `/usr/local/src/<system>`
    pub fn system_dir(&self, system: &str) -> PathBuf {
        self.source_root.join(system)
    }

    /// `/usr/local/src/<system>/linux`
    pub fn kernels_dir(&self, system: &str) -> PathBuf {
        self.system_dir(system).join("linux")
    }

    /// Output directory for plain images or unified kernel images.
    pub fn output_dir(&self, system: &str, unified: bool) -> PathBuf {
        self.system_dir(system)
            .join(if unified { "uki" } else { "vmlinuz" })
    }

    /// `/usr/local/src/<system>/initramfs/initramfs-<system>.cpio`
    pub fn initramfs_path(&self, system: &str) -> PathBuf {
        self.system_dir(system)
            .join("initramfs")
            .join(format!("initramfs-{system}.cpio"))
    }

    /// `/var/tmp/linux/<system>`
    pub fn scratch_dir(&self, system: &str) -> PathBuf {
        self.scratch_root.join(system)
    }

    /// Absolute path of the boot loader entry.
    pub fn boot_entry_path(&self) -> PathBuf {
        self.boot_dir.join(&self.boot_entry)
    }

    /// Advisory lock file serializing runs on this host.
    pub fn lock_path(&self) -> PathBuf {
        self.scratch_root.join(".kernel-builder.lock")
    }
}
