//! jarlock-core: class file codec and license policy types.
//!
//! The codec reads and writes JVM class files at the byte level: constant
//! pool, member tables and the `Code` attribute with its instruction stream,
//! exception table and verification frames.  It is the piece every other
//! jarlock crate builds on: the patcher decodes plugin classes with it,
//! rewrites method prologues and encodes them again, and synthesizes the
//! runtime gate class from scratch.

pub mod classfile;
pub mod error;
pub mod policy;

pub use classfile::ClassFile;
pub use error::{ClassError, PolicyError};
pub use policy::{FailureMode, LicensePolicy, PrologueShape};
