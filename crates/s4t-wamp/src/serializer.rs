use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use crate::error::WampError;
use crate::message::WampMessage;

/// Wire encodings offered to the router, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serializer {
    Json,
    MsgPack,
}

impl Serializer {
    pub fn subprotocol(self) -> &'static str {
        match self {
            Serializer::Json => "wamp.2.json",
            Serializer::MsgPack => "wamp.2.msgpack",
        }
    }

    pub fn from_subprotocol(name: &str) -> Option<Self> {
        match name.trim() {
            "wamp.2.json" => Some(Serializer::Json),
            "wamp.2.msgpack" => Some(Serializer::MsgPack),
            _ => None,
        }
    }

    pub fn encode(self, msg: &WampMessage) -> Result<Message, WampError> {
        let value = msg.to_value();
        match self {
            Serializer::Json => serde_json::to_string(&value)
                .map(|text| Message::Text(text.into()))
                .map_err(|e| WampError::Serialization(e.to_string())),
            Serializer::MsgPack => rmp_serde::to_vec(&value)
                .map(|bytes| Message::Binary(bytes.into()))
                .map_err(|e| WampError::Serialization(e.to_string())),
        }
    }

    pub fn decode(self, payload: &[u8]) -> Result<WampMessage, WampError> {
        let value: Value = match self {
            Serializer::Json => serde_json::from_slice(payload)
                .map_err(|e| WampError::Serialization(e.to_string()))?,
            Serializer::MsgPack => rmp_serde::from_slice(payload)
                .map_err(|e| WampError::Serialization(e.to_string()))?,
        };
        WampMessage::from_value(value)
    }
}

impl fmt::Display for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Serializer::Json => f.write_str("json"),
            Serializer::MsgPack => f.write_str("msgpack"),
        }
    }
}

impl FromStr for Serializer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Serializer::Json),
            "msgpack" => Ok(Serializer::MsgPack),
            other => Self::from_subprotocol(other).ok_or(format!("unknown serializer: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Dict;
    use serde_json::json;

    fn call() -> WampMessage {
        WampMessage::Call {
            request: 1,
            options: Dict::new(),
            procedure: "iotronic.Board_2.get_data".into(),
            args: vec![json!("Board_1_GT"), json!(1.5)],
            kwargs: Dict::new(),
        }
    }

    #[test]
    fn test_json_is_text_frame() {
        let frame = Serializer::Json.encode(&call()).unwrap();
        let Message::Text(text) = frame else {
            panic!("expected text frame");
        };
        assert_eq!(
            Serializer::Json.decode(text.as_str().as_bytes()).unwrap(),
            call()
        );
    }

    #[test]
    fn test_msgpack_is_binary_frame() {
        let frame = Serializer::MsgPack.encode(&call()).unwrap();
        let Message::Binary(bytes) = frame else {
            panic!("expected binary frame");
        };
        assert_eq!(Serializer::MsgPack.decode(&bytes).unwrap(), call());
    }

    #[test]
    fn test_subprotocol_names() {
        for s in [Serializer::Json, Serializer::MsgPack] {
            assert_eq!(Serializer::from_subprotocol(s.subprotocol()), Some(s));
        }
        assert_eq!(Serializer::from_subprotocol("wamp.2.cbor"), None);
        assert_eq!("msgpack".parse::<Serializer>().unwrap(), Serializer::MsgPack);
    }
}
