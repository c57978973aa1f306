//! jarlock-cli: license gate injection for compiled plugin jars.
//!
//! The library half of the `jarlock` binary: the jar container codec, the
//! plugin descriptor, target planning, prologue injection, the synthesized
//! gate class and the pipeline that runs them in order.

pub mod container;
pub mod patcher;
pub mod plugin;
pub mod transform;

pub use container::{ContainerError, Package};
pub use patcher::{analyze, patch, Analysis, PatchError, PatchOptions, PatchSummary};
pub use plugin::{DescriptorError, PluginDescriptor};
