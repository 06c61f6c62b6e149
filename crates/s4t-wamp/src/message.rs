//! WAMP v2 basic-profile messages for the caller and callee roles.
//!
//! On the wire every message is an array whose first element is the type
//! code. Trailing `args` / `kwargs` are omitted when empty.

use serde_json::{Map, Value};

use crate::error::WampError;

pub type Dict = Map<String, Value>;

pub const HELLO: u64 = 1;
pub const WELCOME: u64 = 2;
pub const ABORT: u64 = 3;
pub const GOODBYE: u64 = 6;
pub const ERROR: u64 = 8;
pub const CALL: u64 = 48;
pub const RESULT: u64 = 50;
pub const REGISTER: u64 = 64;
pub const REGISTERED: u64 = 65;
pub const UNREGISTER: u64 = 66;
pub const UNREGISTERED: u64 = 67;
pub const INVOCATION: u64 = 68;
pub const YIELD: u64 = 70;

/// Close and error URIs used by this crate.
pub mod uri {
    pub const CLOSE_NORMAL: &str = "wamp.close.normal";
    pub const CLOSE_SYSTEM_SHUTDOWN: &str = "wamp.close.system_shutdown";
    pub const CLOSE_GOODBYE_AND_OUT: &str = "wamp.close.goodbye_and_out";
    pub const NO_SUCH_REALM: &str = "wamp.error.no_such_realm";
    pub const NO_SUCH_PROCEDURE: &str = "wamp.error.no_such_procedure";
    pub const NO_SUCH_REGISTRATION: &str = "wamp.error.no_such_registration";
    pub const PROCEDURE_ALREADY_EXISTS: &str = "wamp.error.procedure_already_exists";
    pub const INVALID_ARGUMENT: &str = "wamp.error.invalid_argument";
    pub const RUNTIME_ERROR: &str = "wamp.error.runtime_error";
    pub const CANCELED: &str = "wamp.error.canceled";
}

#[derive(Debug, Clone, PartialEq)]
pub enum WampMessage {
    Hello {
        realm: String,
        details: Dict,
    },
    Welcome {
        session: u64,
        details: Dict,
    },
    Abort {
        details: Dict,
        reason: String,
    },
    Goodbye {
        details: Dict,
        reason: String,
    },
    Error {
        request_type: u64,
        request: u64,
        details: Dict,
        error: String,
        args: Vec<Value>,
        kwargs: Dict,
    },
    Call {
        request: u64,
        options: Dict,
        procedure: String,
        args: Vec<Value>,
        kwargs: Dict,
    },
    Result {
        request: u64,
        details: Dict,
        args: Vec<Value>,
        kwargs: Dict,
    },
    Register {
        request: u64,
        options: Dict,
        procedure: String,
    },
    Registered {
        request: u64,
        registration: u64,
    },
    Unregister {
        request: u64,
        registration: u64,
    },
    Unregistered {
        request: u64,
    },
    Invocation {
        request: u64,
        registration: u64,
        details: Dict,
        args: Vec<Value>,
        kwargs: Dict,
    },
    Yield {
        request: u64,
        options: Dict,
        args: Vec<Value>,
        kwargs: Dict,
    },
}

impl WampMessage {
    pub fn code(&self) -> u64 {
        match self {
            WampMessage::Hello { .. } => HELLO,
            WampMessage::Welcome { .. } => WELCOME,
            WampMessage::Abort { .. } => ABORT,
            WampMessage::Goodbye { .. } => GOODBYE,
            WampMessage::Error { .. } => ERROR,
            WampMessage::Call { .. } => CALL,
            WampMessage::Result { .. } => RESULT,
            WampMessage::Register { .. } => REGISTER,
            WampMessage::Registered { .. } => REGISTERED,
            WampMessage::Unregister { .. } => UNREGISTER,
            WampMessage::Unregistered { .. } => UNREGISTERED,
            WampMessage::Invocation { .. } => INVOCATION,
            WampMessage::Yield { .. } => YIELD,
        }
    }

    pub fn goodbye(reason: &str) -> Self {
        WampMessage::Goodbye {
            details: Dict::new(),
            reason: reason.to_string(),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut out = vec![Value::from(self.code())];
        match self {
            WampMessage::Hello { realm, details } => {
                out.push(realm.as_str().into());
                out.push(Value::Object(details.clone()));
            }
            WampMessage::Welcome { session, details } => {
                out.push((*session).into());
                out.push(Value::Object(details.clone()));
            }
            WampMessage::Abort { details, reason } | WampMessage::Goodbye { details, reason } => {
                out.push(Value::Object(details.clone()));
                out.push(reason.as_str().into());
            }
            WampMessage::Error {
                request_type,
                request,
                details,
                error,
                args,
                kwargs,
            } => {
                out.push((*request_type).into());
                out.push((*request).into());
                out.push(Value::Object(details.clone()));
                out.push(error.as_str().into());
                push_payload(&mut out, args, kwargs);
            }
            WampMessage::Call {
                request,
                options,
                procedure,
                args,
                kwargs,
            } => {
                out.push((*request).into());
                out.push(Value::Object(options.clone()));
                out.push(procedure.as_str().into());
                push_payload(&mut out, args, kwargs);
            }
            WampMessage::Result {
                request,
                details,
                args,
                kwargs,
            } => {
                out.push((*request).into());
                out.push(Value::Object(details.clone()));
                push_payload(&mut out, args, kwargs);
            }
            WampMessage::Register {
                request,
                options,
                procedure,
            } => {
                out.push((*request).into());
                out.push(Value::Object(options.clone()));
                out.push(procedure.as_str().into());
            }
            WampMessage::Registered {
                request,
                registration,
            }
            | WampMessage::Unregister {
                request,
                registration,
            } => {
                out.push((*request).into());
                out.push((*registration).into());
            }
            WampMessage::Unregistered { request } => {
                out.push((*request).into());
            }
            WampMessage::Invocation {
                request,
                registration,
                details,
                args,
                kwargs,
            } => {
                out.push((*request).into());
                out.push((*registration).into());
                out.push(Value::Object(details.clone()));
                push_payload(&mut out, args, kwargs);
            }
            WampMessage::Yield {
                request,
                options,
                args,
                kwargs,
            } => {
                out.push((*request).into());
                out.push(Value::Object(options.clone()));
                push_payload(&mut out, args, kwargs);
            }
        }
        Value::Array(out)
    }

    pub fn from_value(value: Value) -> Result<Self, WampError> {
        let Value::Array(items) = value else {
            return Err(WampError::protocol("message is not an array"));
        };
        let fields = Fields(items);
        let code = fields.id(0)?;

        let msg = match code {
            HELLO => WampMessage::Hello {
                realm: fields.string(1)?,
                details: fields.dict(2)?,
            },
            WELCOME => WampMessage::Welcome {
                session: fields.id(1)?,
                details: fields.dict(2)?,
            },
            ABORT => WampMessage::Abort {
                details: fields.dict(1)?,
                reason: fields.string(2)?,
            },
            GOODBYE => WampMessage::Goodbye {
                details: fields.dict(1)?,
                reason: fields.string(2)?,
            },
            ERROR => WampMessage::Error {
                request_type: fields.id(1)?,
                request: fields.id(2)?,
                details: fields.dict(3)?,
                error: fields.string(4)?,
                args: fields.args(5)?,
                kwargs: fields.kwargs(6)?,
            },
            CALL => WampMessage::Call {
                request: fields.id(1)?,
                options: fields.dict(2)?,
                procedure: fields.string(3)?,
                args: fields.args(4)?,
                kwargs: fields.kwargs(5)?,
            },
            RESULT => WampMessage::Result {
                request: fields.id(1)?,
                details: fields.dict(2)?,
                args: fields.args(3)?,
                kwargs: fields.kwargs(4)?,
            },
            REGISTER => WampMessage::Register {
                request: fields.id(1)?,
                options: fields.dict(2)?,
                procedure: fields.string(3)?,
            },
            REGISTERED => WampMessage::Registered {
                request: fields.id(1)?,
                registration: fields.id(2)?,
            },
            UNREGISTER => WampMessage::Unregister {
                request: fields.id(1)?,
                registration: fields.id(2)?,
            },
            UNREGISTERED => WampMessage::Unregistered {
                request: fields.id(1)?,
            },
            INVOCATION => WampMessage::Invocation {
                request: fields.id(1)?,
                registration: fields.id(2)?,
                details: fields.dict(3)?,
                args: fields.args(4)?,
                kwargs: fields.kwargs(5)?,
            },
            YIELD => WampMessage::Yield {
                request: fields.id(1)?,
                options: fields.dict(2)?,
                args: fields.args(3)?,
                kwargs: fields.kwargs(4)?,
            },
            other => return Err(WampError::protocol(format!("unsupported message type {other}"))),
        };
        Ok(msg)
    }
}

fn push_payload(out: &mut Vec<Value>, args: &[Value], kwargs: &Dict) {
    if args.is_empty() && kwargs.is_empty() {
        return;
    }
    out.push(Value::Array(args.to_vec()));
    if !kwargs.is_empty() {
        out.push(Value::Object(kwargs.clone()));
    }
}

struct Fields(Vec<Value>);

impl Fields {
    fn get(&self, idx: usize) -> Result<&Value, WampError> {
        self.0
            .get(idx)
            .ok_or_else(|| WampError::protocol(format!("missing field {idx}")))
    }

    fn id(&self, idx: usize) -> Result<u64, WampError> {
        self.get(idx)?
            .as_u64()
            .ok_or_else(|| WampError::protocol(format!("field {idx} is not an id")))
    }

    fn string(&self, idx: usize) -> Result<String, WampError> {
        self.get(idx)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WampError::protocol(format!("field {idx} is not a string")))
    }

    fn dict(&self, idx: usize) -> Result<Dict, WampError> {
        match self.get(idx)? {
            Value::Object(map) => Ok(map.clone()),
            _ => Err(WampError::protocol(format!("field {idx} is not a dict"))),
        }
    }

    fn args(&self, idx: usize) -> Result<Vec<Value>, WampError> {
        match self.0.get(idx) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(_) => Err(WampError::protocol(format!("field {idx} is not a list"))),
        }
    }

    fn kwargs(&self, idx: usize) -> Result<Dict, WampError> {
        match self.0.get(idx) {
            None => Ok(Dict::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(WampError::protocol(format!("field {idx} is not a dict"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_layout() {
        let msg = WampMessage::Call {
            request: 7,
            options: Dict::new(),
            procedure: "iotronic.Board_1_GT.secure_write_to_db".into(),
            args: vec![json!("token")],
            kwargs: Dict::new(),
        };
        assert_eq!(
            msg.to_value(),
            json!([48, 7, {}, "iotronic.Board_1_GT.secure_write_to_db", ["token"]])
        );
    }

    #[test]
    fn test_empty_payload_is_omitted() {
        let msg = WampMessage::Yield {
            request: 3,
            options: Dict::new(),
            args: vec![],
            kwargs: Dict::new(),
        };
        assert_eq!(msg.to_value(), json!([70, 3, {}]));
    }

    #[test]
    fn test_kwargs_forces_args() {
        let mut kwargs = Dict::new();
        kwargs.insert("k".into(), json!(1));
        let msg = WampMessage::Result {
            request: 1,
            details: Dict::new(),
            args: vec![],
            kwargs,
        };
        assert_eq!(msg.to_value(), json!([50, 1, {}, [], {"k": 1}]));
    }

    #[test]
    fn test_parse_router_messages() {
        let welcome = WampMessage::from_value(json!([2, 9129137332u64, {"roles": {"dealer": {}}}])).unwrap();
        assert!(matches!(welcome, WampMessage::Welcome { session: 9129137332, .. }));

        let invocation =
            WampMessage::from_value(json!([68, 6131533, 9823526, {}, ["a"]])).unwrap();
        match invocation {
            WampMessage::Invocation {
                request,
                registration,
                args,
                kwargs,
                ..
            } => {
                assert_eq!(request, 6131533);
                assert_eq!(registration, 9823526);
                assert_eq!(args, vec![json!("a")]);
                assert!(kwargs.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(WampMessage::from_value(json!({"type": 1})).is_err());
        assert!(WampMessage::from_value(json!([])).is_err());
        assert!(WampMessage::from_value(json!([999, 1])).is_err());
        assert!(WampMessage::from_value(json!([48, "x", {}, "p"])).is_err());
        assert!(WampMessage::from_value(json!([50, 1, {}, "not-a-list"])).is_err());
    }
}
