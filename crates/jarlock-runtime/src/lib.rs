//! Runtime side of jarlock.
//!
//! Everything a patched plugin needs after the patcher is done: the gate
//! injected entry points call, the license client behind it, the JSON
//! validation protocol, and an in-memory authority that answers it.

pub mod authority;
pub mod client;
pub mod error;
pub mod fingerprint;
pub mod gate;
pub mod protocol;
pub mod transport;

pub use authority::{Authority, License, Product, Tier, ValidationLog};
pub use client::LicenseClient;
pub use error::{AuthorityError, ClientError, TransportError};
pub use gate::LicenseGate;
pub use protocol::{ValidationRequest, ValidationResponse, ValidationResult};
pub use transport::{HttpTransport, Transport};
