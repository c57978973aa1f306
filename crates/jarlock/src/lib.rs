//! jarlock: inject a license check into compiled plugin jars.
//!
//! Re-exports the three halves of the system:
//! - [`codec`]: class file codec and license policy
//! - [`patch`]: jar container, planner, prologue injector and pipeline
//! - [`runtime`]: gate, license client, validation protocol and authority
//!
//! ```ignore
//! use jarlock::prelude::*;
//!
//! let policy = LicensePolicy::new("https://license.example.com", "shop");
//! let (jar, summary) = jarlock::patch::patch(input, &PatchOptions {
//!     policy,
//!     callback_classes: Vec::new(),
//! })?;
//! ```

pub use jarlock_cli as patch;
pub use jarlock_core as codec;
pub use jarlock_runtime as runtime;

pub mod prelude {
    pub use jarlock_cli::{Package, PatchError, PatchOptions, PatchSummary, PluginDescriptor};
    pub use jarlock_core::{ClassError, ClassFile, FailureMode, LicensePolicy};
    pub use jarlock_runtime::{Authority, LicenseClient, LicenseGate, Transport, ValidationRequest};
}
