use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Realm every board and gateway joins.
pub const DEFAULT_REALM: &str = "s4t";

/// Prefix of every registered procedure URI.
pub const DEFAULT_NAMESPACE: &str = "iotronic";

/// Name of the time series readings are written to.
pub const READING_SERIES: &str = "value";

/// A single sensor sample and the identity that produced it.
///
/// The origin travels inside the plaintext, so after a secure transfer it is
/// the name the sender claimed, checked against that sender's public key.
///
/// The value keeps the text it was sampled or received as (`"042"`), so a
/// reading is written back exactly as it arrived. Equality ignores that text.
#[derive(Debug, Clone)]
pub struct Reading {
    pub value: f64,
    pub origin: String,
    text: String,
}

impl PartialEq for Reading {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.origin == other.origin
    }
}

/// On-the-wire shape: `{"0": "<value>", "1": "<origin>"}`.
#[derive(Deserialize)]
struct WireReading {
    #[serde(rename = "0")]
    value: WireValue,
    #[serde(rename = "1")]
    origin: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireValue {
    Text(String),
    Number(f64),
}

impl Reading {
    pub fn new(value: f64, origin: impl Into<String>) -> Self {
        Self {
            value,
            origin: origin.into(),
            text: value.to_string(),
        }
    }

    /// A reading from the sensor's textual sample, e.g. `"042"`.
    pub fn from_sample(sample: &str, origin: impl Into<String>) -> Result<Self> {
        let text = sample.trim();
        let value = parse_value(text)?;
        Self::checked(value, text.to_string(), origin.into())
    }

    /// The value as sampled or received.
    pub fn value_text(&self) -> &str {
        &self.text
    }

    /// Canonical text form, with the `", "` and `": "` separators deployed
    /// boards use. This exact string is what gets hashed and encrypted on the
    /// secure path, and what is sent on the clear path.
    pub fn to_plaintext(&self) -> String {
        format!(
            "{{\"0\": {}, \"1\": {}}}",
            Value::from(self.text.as_str()),
            Value::from(self.origin.as_str())
        )
    }

    /// Parse the canonical text form. The value may be a JSON string or number.
    pub fn from_plaintext(text: &str) -> Result<Self> {
        let wire: WireReading =
            serde_json::from_str(text).map_err(Error::invalid_reading)?;

        let (value, text) = match wire.value {
            WireValue::Number(n) => (n, n.to_string()),
            WireValue::Text(s) => {
                let s = s.trim().to_string();
                (parse_value(&s)?, s)
            }
        };
        Self::checked(value, text, wire.origin)
    }

    fn checked(value: f64, text: String, origin: String) -> Result<Self> {
        if !value.is_finite() {
            return Err(Error::invalid_reading("value is not finite"));
        }
        if origin.is_empty() {
            return Err(Error::invalid_reading("empty origin"));
        }
        Ok(Self {
            value,
            origin,
            text,
        })
    }
}

fn parse_value(text: &str) -> Result<f64> {
    text.parse::<f64>()
        .map_err(|e| Error::invalid_reading(format!("value {text:?}: {e}")))
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.origin, self.value)
    }
}

/// Procedures every node registers under `{namespace}.{identity}.{short}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Procedure {
    GetData,
    ClearWriteToDb,
    SecureWriteToDb,
}

impl Procedure {
    pub const ALL: [Procedure; 3] = [
        Procedure::GetData,
        Procedure::ClearWriteToDb,
        Procedure::SecureWriteToDb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Procedure::GetData => "get_data",
            Procedure::ClearWriteToDb => "clear_write_to_db",
            Procedure::SecureWriteToDb => "secure_write_to_db",
        }
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Procedure {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Procedure::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::config(format!("unknown procedure: {s}")))
    }
}

/// Fully-qualified procedure URI: `{namespace}.{identity}.{short}`.
pub fn procedure_uri(namespace: &str, identity: &str, short: &str) -> String {
    format!("{namespace}.{identity}.{short}")
}

/// Best-effort error payload returned to a remote caller instead of a fault.
pub fn error_payload(detail: impl fmt::Display) -> Value {
    serde_json::json!({
        "status": "error",
        "detail": detail.to_string(),
    })
}
