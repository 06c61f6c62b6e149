use thiserror::Error;

/// Errors from the routing-fabric connection and RPC calls.
#[derive(Debug, Error)]
pub enum WampError {
    /// The connection could not be made or was lost. Ends the current session.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// An outbound call did not produce a result.
    #[error("call failed: {detail}")]
    CallFailed { detail: String },

    /// The router refused or ended the session.
    #[error("session aborted by router: {reason}")]
    Aborted { reason: String },

    /// A message arrived that makes no sense in the current state.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("registration of {procedure} failed: {reason}")]
    Registration { procedure: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

impl WampError {
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::TransportFailure(msg.to_string())
    }

    pub fn call_failed(detail: impl std::fmt::Display) -> Self {
        Self::CallFailed {
            detail: detail.to_string(),
        }
    }

    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }
}
