//! Build, sign and install a bootable kernel image on a single host.
//!
//! The crate drives one pipeline over a kernel source tree kept under
//! `/usr/local/src/<system>/linux/`:
//!
//! - **Preflight** - Executable lookup and privilege checks before anything changes
//! - **Workspace** - Build in place or in a scratch (tmpfs) copy of the tree
//! - **Source pointer** - Keep `/usr/src/linux` aimed at the kernel being built
//! - **Build stages** - `make`, `make modules_install`, initramfs for unified images
//! - **Publish** - Copy or sign the boot image into the per-system output directory
//! - **Install** - Copy the published image to the boot loader entry
//!
//! # Architecture
//!
//! ```text
//! kernel-builder (binary)
//!     │
//!     ├── Parses flags, picks the kernel tree, holds the host lock
//!     └── Runs: pipeline::Pipeline
//!                 │
//!                 ├── workspace ── mount
//!                 ├── source_link
//!                 ├── build::stages ── preflight::Locator
//!                 ├── publish ── publish::signer
//!                 └── install ── mount
//!
//! every external tool goes through process::CommandRunner
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use kernel_builder::{BuildOptions, KernelSelection, Layout, Locator, Pipeline, SystemRunner};
//!
//! let layout = Layout::default();
//! let locator = Locator::from_env();
//! let selection = KernelSelection::select(&layout, "myhost", "linux-6.9.1")?;
//! let options = BuildOptions { sign: true, ..BuildOptions::default() };
//!
//! let mut runner = SystemRunner;
//! let report = Pipeline::new(&mut runner, &layout, &locator, "myhost").run(&selection, &options)?;
//! println!("published {}", report.published.path.display());
//! ```

pub mod build;
pub mod config;
pub mod error;
pub mod install;
pub mod kernel;
pub mod mount;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod publish;
pub mod source_link;
pub mod workspace;

pub use config::Layout;
pub use error::{CommandError, PreflightError};
pub use kernel::KernelSelection;
pub use pipeline::{BuildOptions, Pipeline, PipelineReport};
pub use preflight::Locator;
pub use process::{Cmd, CommandOutput, CommandRunner, SystemRunner};
