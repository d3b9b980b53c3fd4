//! Fixed-key obfuscation for passwords stored in the settings file.
//!
//! Each byte of the UTF-8 plaintext is XOR-ed with a repeating key and the
//! result is written as standard base64.  This keeps passwords from being
//! readable at a glance in the settings file; it is not encryption, and anyone
//! with the binary can recover the key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::application::secret::{SecretCodec, SecretCodecError};

const DEFAULT_KEY: &[u8] = b"outlet-plugin/credential-mask/v1";

/// Repeating-key XOR + base64 [`SecretCodec`].
#[derive(Debug, Clone)]
pub struct FixedKeyCodec {
    key: Vec<u8>,
}

impl FixedKeyCodec {
    /// Creates a codec with a custom key.  An empty key falls back to the
    /// built-in one.
    pub fn with_key(key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        if key.is_empty() {
            Self::default()
        } else {
            Self { key }
        }
    }

    fn mask(&self, bytes: &mut [u8]) {
        for (byte, k) in bytes.iter_mut().zip(self.key.iter().cycle()) {
            *byte ^= k;
        }
    }
}

impl Default for FixedKeyCodec {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY.to_vec(),
        }
    }
}

impl SecretCodec for FixedKeyCodec {
    fn encode(&self, plaintext: &str) -> String {
        let mut bytes = plaintext.as_bytes().to_vec();
        self.mask(&mut bytes);
        STANDARD.encode(bytes)
    }

    fn decode(&self, encoded: &str) -> Result<String, SecretCodecError> {
        let mut bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SecretCodecError::Encoding(e.to_string()))?;
        self.mask(&mut bytes);
        String::from_utf8(bytes).map_err(|_| SecretCodecError::Utf8)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
