//! Reversible encoding of credentials stored at rest.
//!
//! The registry never writes a device password as plaintext; it passes it
//! through a [`SecretCodec`] first.  The trait keeps the registry independent
//! of the scheme, so a real secret-management backend can replace the default
//! fixed-key obfuscation without touching registry code.

use thiserror::Error;

/// Errors raised when a stored secret cannot be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretCodecError {
    /// The stored text is not in the codec's encoding.
    #[error("stored secret is not validly encoded: {0}")]
    Encoding(String),

    /// The decoded bytes are not UTF-8.
    #[error("decoded secret is not valid UTF-8")]
    Utf8,
}

/// Reversible secret encoding.
///
/// Implementations must satisfy `decode(&encode(s)) == Ok(s)` for every `s`.
pub trait SecretCodec: Send + Sync {
    fn encode(&self, plaintext: &str) -> String;

    fn decode(&self, encoded: &str) -> Result<String, SecretCodecError>;
}
