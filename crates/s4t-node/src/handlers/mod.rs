//! RPC handlers hosted by the board and gateway supervisors.
//!
//! Seal and open are CPU-bound RSA work, so they run on the blocking pool
//! and never stall the session's event loop.

mod board;
mod gateway;

pub use board::Board;
pub use gateway::{Buckets, Gateway};

use s4t_wamp::HandlerError;

async fn run_blocking<T, F>(f: F) -> Result<T, HandlerError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| HandlerError::Failed(format!("crypto worker failed: {e}")))
}
