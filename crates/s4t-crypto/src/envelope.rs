//! Envelope wire format.
//!
//! ```text
//! token = base64( json {
//!     "enc_msg":  base64(ciphertext),
//!     "enc_key":  base64(wrapped_key),
//!     "enc_hash": base64(tag),
//! })
//! ```
//!
//! The outer base64 turns the envelope into a single opaque string that fits
//! any text RPC argument. Standard alphabet with padding on both layers.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

/// The three parts of one sealed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// One-time symmetric key, encrypted to the recipient.
    pub wrapped_key: Vec<u8>,
    /// The serialized reading under the one-time key.
    pub ciphertext: Vec<u8>,
    /// Integrity tag made with the sender's private key.
    pub tag: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireEnvelope {
    enc_msg: String,
    enc_key: String,
    enc_hash: String,
}

/// Transport-safe text form of an [`Envelope`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({} chars)", self.0.len())
    }
}

impl Envelope {
    pub fn encode(&self) -> Token {
        let wire = WireEnvelope {
            enc_msg: STANDARD.encode(&self.ciphertext),
            enc_key: STANDARD.encode(&self.wrapped_key),
            enc_hash: STANDARD.encode(&self.tag),
        };
        // Three string fields cannot fail to serialize.
        let json = serde_json::to_vec(&wire).unwrap_or_default();
        Token(STANDARD.encode(json))
    }

    pub fn decode(token: &str) -> Result<Self, CryptoError> {
        let json = STANDARD
            .decode(token.trim())
            .map_err(|e| CryptoError::EnvelopeMalformed(format!("outer base64: {e}")))?;

        let wire: WireEnvelope = serde_json::from_slice(&json)
            .map_err(|e| CryptoError::EnvelopeMalformed(format!("envelope shape: {e}")))?;

        Ok(Self {
            ciphertext: decode_field("enc_msg", &wire.enc_msg)?,
            wrapped_key: decode_field("enc_key", &wire.enc_key)?,
            tag: decode_field("enc_hash", &wire.enc_hash)?,
        })
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(value)
        .map_err(|e| CryptoError::EnvelopeMalformed(format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope {
            wrapped_key: vec![1, 2, 3, 4],
            ciphertext: b"sixteen byte blk".to_vec(),
            tag: vec![0xff; 8],
        }
    }

    fn wrap(json: &str) -> String {
        STANDARD.encode(json)
    }

    #[test]
    fn test_inner_layout() {
        let token = sample().encode();
        let json = STANDARD.decode(token.as_str()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();

        assert_eq!(value["enc_msg"], STANDARD.encode(b"sixteen byte blk"));
        assert_eq!(value["enc_key"], "AQIDBA==");
        assert_eq!(value["enc_hash"], STANDARD.encode([0xffu8; 8]));
        assert_eq!(value.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_decode_spaced_token() {
        // Boards emit ", " and ": " separators
        let token = wrap(r#"{"enc_msg": "AAEC", "enc_key": "AwQF", "enc_hash": "Bgc="}"#);
        let envelope = Envelope::decode(&token).unwrap();

        assert_eq!(envelope.ciphertext, vec![0, 1, 2]);
        assert_eq!(envelope.wrapped_key, vec![3, 4, 5]);
        assert_eq!(envelope.tag, vec![6, 7]);
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let token = wrap(r#"{"enc_msg": "AAEC", "enc_key": "AwQF"}"#);
        assert!(matches!(
            Envelope::decode(&token),
            Err(CryptoError::EnvelopeMalformed(_))
        ));
    }

    #[test]
    fn test_extra_field_is_malformed() {
        let token = wrap(r#"{"enc_msg": "", "enc_key": "", "enc_hash": "", "iv": ""}"#);
        assert!(matches!(
            Envelope::decode(&token),
            Err(CryptoError::EnvelopeMalformed(_))
        ));
    }

    #[test]
    fn test_non_base64_is_malformed() {
        assert!(matches!(
            Envelope::decode("this is not base64!"),
            Err(CryptoError::EnvelopeMalformed(_))
        ));

        let token = wrap(r#"{"enc_msg": "%%%", "enc_key": "", "enc_hash": ""}"#);
        assert!(matches!(
            Envelope::decode(&token),
            Err(CryptoError::EnvelopeMalformed(_))
        ));
    }

    #[test]
    fn test_non_object_is_malformed() {
        for json in ["[1, 2, 3]", "\"enc_msg\"", "null", "{not json"] {
            assert!(matches!(
                Envelope::decode(&wrap(json)),
                Err(CryptoError::EnvelopeMalformed(_))
            ));
        }
    }
}
