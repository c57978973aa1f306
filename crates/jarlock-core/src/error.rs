//! Class file codec errors.

/// Errors raised while decoding or encoding a class file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassError {
    /// The major version is newer than the codec understands.
    #[error("unsupported class file version {major}.{minor} (newest supported major is {max})")]
    UnsupportedFormatVersion { major: u16, minor: u16, max: u16 },

    /// The class is structurally inconsistent.
    #[error("malformed class file: {0}")]
    MalformedUnit(String),

    /// A value no longer fits its encoding after rewriting.
    #[error("encoding overflow: {0}")]
    EncodingOverflow(String),
}

impl ClassError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ClassError::MalformedUnit(msg.into())
    }

    pub(crate) fn overflow(msg: impl Into<String>) -> Self {
        ClassError::EncodingOverflow(msg.into())
    }
}

/// Shorthand used across the codec.
pub type Result<T> = std::result::Result<T, ClassError>;

/// Errors raised while reading a `license.properties` policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("missing required property `{0}`")]
    MissingKey(&'static str),

    #[error("invalid value {value:?} for `{key}`")]
    InvalidValue { key: &'static str, value: String },

    #[error("unknown failure mode {0:?}")]
    UnknownMode(String),
}
