use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::message::{uri, Dict};
use crate::session::SessionHandle;

/// Failure reported back to the caller as a WAMP ERROR.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn uri(&self) -> &'static str {
        match self {
            HandlerError::InvalidArgument(_) => uri::INVALID_ARGUMENT,
            HandlerError::Failed(_) => uri::RUNTIME_ERROR,
        }
    }
}

pub type HandlerResult = Result<Value, HandlerError>;

/// One incoming call to a registered procedure.
pub struct Invocation {
    /// Full URI the handler was registered under.
    pub procedure: String,
    pub args: Vec<Value>,
    pub kwargs: Dict,
    /// The session the call arrived on, for calling other peers.
    pub session: SessionHandle,
}

impl Invocation {
    pub fn arg(&self, idx: usize) -> Option<&Value> {
        self.args.get(idx)
    }

    pub fn str_arg(&self, idx: usize) -> Result<&str, HandlerError> {
        match self.args.get(idx) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(HandlerError::InvalidArgument(format!(
                "argument {idx} must be a string, got {other}"
            ))),
            None => Err(HandlerError::InvalidArgument(format!(
                "missing argument {idx}"
            ))),
        }
    }
}

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, invocation: Invocation) -> HandlerResult;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn call(&self, invocation: Invocation) -> HandlerResult {
        (self.0)(invocation).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Short procedure name (`get_data`) to handler.
pub type ProcedureMap = BTreeMap<String, Arc<dyn Handler>>;
