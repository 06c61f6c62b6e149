//! WAMP v2 client for S4T boards and gateways.
//!
//! This crate provides:
//! - The basic-profile message set used by callers and callees
//! - JSON and MessagePack serializers negotiated as WebSocket subprotocols
//! - A session driver that registers procedures, dispatches invocations
//!   and issues calls
//! - A [`Supervisor`] that keeps one session joined on a dedicated thread,
//!   reconnecting with exponential backoff for as long as it runs
//! - A [`LocalRouter`] implementing the dealer role in-process
//!
//! # Procedure naming
//!
//! Handlers are registered as `{namespace}.{identity}.{short_name}` and peers
//! are called the same way; there is no discovery beyond knowing the peer name.

#![forbid(unsafe_code)]

pub mod backoff;
pub mod error;
pub mod handler;
pub mod local;
pub mod message;
pub mod serializer;
pub mod session;
pub mod supervisor;
pub mod tls;
pub mod transport;
pub mod websocket;

pub use backoff::{Backoff, BackoffConfig};
pub use error::WampError;
pub use handler::{handler_fn, Handler, HandlerError, HandlerResult, Invocation, ProcedureMap};
pub use local::LocalRouter;
pub use message::WampMessage;
pub use serializer::Serializer;
pub use session::SessionHandle;
pub use supervisor::{SessionState, Supervisor, SupervisorConfig};
pub use tls::TlsPolicy;
pub use transport::{Connector, Transport};
pub use websocket::{TransportConfig, WebSocketConnector};
