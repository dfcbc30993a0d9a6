//! Build stages run against the active work directory.
//!
//! - [`stages`] - compile, module install and initramfs generation

pub mod stages;

pub use stages::{BuildPlan, Stage, StageRunner};
