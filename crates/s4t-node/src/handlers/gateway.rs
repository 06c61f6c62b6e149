use std::sync::Arc;

use s4t_common::{error_payload, Procedure, Reading};
use s4t_crypto::{CryptoEngine, CryptoError, Identity};
use s4t_wamp::{handler_fn, HandlerError, HandlerResult, Invocation, ProcedureMap};
use serde_json::Value;
use tracing::{error, info, warn};

use super::run_blocking;
use crate::sink::{Point, Sink};

/// Bucket names for each channel.
#[derive(Debug, Clone)]
pub struct Buckets {
    pub clear: String,
    pub secure: String,
}

impl Default for Buckets {
    fn default() -> Self {
        Self {
            clear: "clear_communication".to_string(),
            secure: "secure_communication".to_string(),
        }
    }
}

/// Receives readings from boards and stores the ones it accepts.
pub struct Gateway {
    identity: Arc<Identity>,
    engine: Arc<CryptoEngine>,
    sink: Arc<dyn Sink>,
    buckets: Buckets,
}

impl Gateway {
    pub fn new(
        identity: Arc<Identity>,
        engine: Arc<CryptoEngine>,
        sink: Arc<dyn Sink>,
        buckets: Buckets,
    ) -> Self {
        Self {
            identity,
            engine,
            sink,
            buckets,
        }
    }

    pub fn name(&self) -> &str {
        self.identity.name()
    }

    /// `clear_write_to_db` and `secure_write_to_db`.
    pub fn procedures(self: Arc<Self>) -> ProcedureMap {
        let mut map = ProcedureMap::new();

        let gateway = self.clone();
        map.insert(
            Procedure::ClearWriteToDb.to_string(),
            handler_fn(move |inv: Invocation| {
                let gateway = gateway.clone();
                async move { gateway.clear_write(&inv).await }
            }),
        );

        let gateway = self;
        map.insert(
            Procedure::SecureWriteToDb.to_string(),
            handler_fn(move |inv: Invocation| {
                let gateway = gateway.clone();
                async move { gateway.secure_write(&inv).await }
            }),
        );

        map
    }

    /// Store a clear reading and echo it back.
    pub async fn clear_write(&self, inv: &Invocation) -> HandlerResult {
        let data = inv.str_arg(0)?;
        info!(gateway = self.name(), "clear_write_to_db called with {data}");

        let reading = Reading::from_plaintext(data)
            .map_err(|e| HandlerError::InvalidArgument(e.to_string()))?;
        self.store(&self.buckets.clear, &reading).await?;

        Ok(Value::String(data.to_string()))
    }

    /// Open a sealed reading, store it, and return its plaintext.
    ///
    /// A message that fails verification is dropped: nothing is stored and
    /// the caller gets `null`.
    pub async fn secure_write(&self, inv: &Invocation) -> HandlerResult {
        let token = inv.str_arg(0)?.to_string();
        info!(gateway = self.name(), "secure_write_to_db called ({} chars)", token.len());

        let engine = self.engine.clone();
        let identity = self.identity.clone();
        let opened = run_blocking(move || engine.open(&token, &identity)).await?;

        let reading = match opened {
            Ok(reading) => reading,
            Err(CryptoError::IntegrityViolation(_)) => {
                warn!(gateway = self.name(), "dropping reading that failed verification");
                return Ok(Value::Null);
            }
            Err(e) => {
                error!(gateway = self.name(), "failed to open reading: {e}");
                return Ok(error_payload(e));
            }
        };

        self.store(&self.buckets.secure, &reading).await?;
        Ok(Value::String(reading.to_plaintext()))
    }

    async fn store(&self, bucket: &str, reading: &Reading) -> Result<(), HandlerError> {
        self.sink
            .store_point(bucket, &Point::from_reading(reading))
            .await
            .map_err(|e| {
                error!(gateway = self.name(), bucket, "failed to store {reading}: {e}");
                HandlerError::Failed(e.to_string())
            })?;
        info!(gateway = self.name(), bucket, "stored {reading}");
        Ok(())
    }
}
