use std::sync::Arc;

use s4t_common::{error_payload, Procedure, Reading};
use s4t_crypto::{CryptoEngine, Identity};
use s4t_wamp::{handler_fn, HandlerError, HandlerResult, Invocation, ProcedureMap, SessionHandle};
use serde_json::Value;
use tracing::{error, info};

use super::run_blocking;
use crate::sensor::Sensor;

/// A sensor board. Samples on demand and pushes readings to its gateway,
/// either in clear or sealed.
pub struct Board {
    identity: Arc<Identity>,
    engine: Arc<CryptoEngine>,
    gateway: String,
    sensor: Arc<dyn Sensor>,
}

impl Board {
    pub fn new(
        identity: Arc<Identity>,
        engine: Arc<CryptoEngine>,
        gateway: impl Into<String>,
        sensor: Arc<dyn Sensor>,
    ) -> Self {
        Self {
            identity,
            engine,
            gateway: gateway.into(),
            sensor,
        }
    }

    pub fn name(&self) -> &str {
        self.identity.name()
    }

    /// `get_data`, `clear_write_to_db` and `secure_write_to_db`.
    pub fn procedures(self: Arc<Self>) -> ProcedureMap {
        let mut map = ProcedureMap::new();

        let board = self.clone();
        map.insert(
            Procedure::GetData.to_string(),
            handler_fn(move |_inv: Invocation| {
                let board = board.clone();
                async move { board.get_data() }
            }),
        );

        let board = self.clone();
        map.insert(
            Procedure::ClearWriteToDb.to_string(),
            handler_fn(move |inv: Invocation| {
                let board = board.clone();
                async move { board.clear_write(&inv.session).await }
            }),
        );

        let board = self;
        map.insert(
            Procedure::SecureWriteToDb.to_string(),
            handler_fn(move |inv: Invocation| {
                let board = board.clone();
                async move { board.secure_write(&inv.session).await }
            }),
        );

        map
    }

    fn sample(&self) -> Result<Reading, HandlerError> {
        let sample = self.sensor.sample();
        Reading::from_sample(&sample, self.identity.name()).map_err(|e| {
            error!(board = self.name(), "unusable sensor sample {sample:?}: {e}");
            HandlerError::Failed(e.to_string())
        })
    }

    fn get_data(&self) -> HandlerResult {
        let reading = self.sample()?;
        info!(board = self.name(), value = reading.value_text(), "get_data");
        Ok(Value::String(reading.value_text().to_string()))
    }

    async fn clear_write(&self, session: &SessionHandle) -> HandlerResult {
        let plaintext = self.sample()?.to_plaintext();
        Ok(self
            .push(session, Procedure::ClearWriteToDb, plaintext)
            .await)
    }

    async fn secure_write(&self, session: &SessionHandle) -> HandlerResult {
        let reading = self.sample()?;
        let engine = self.engine.clone();
        let identity = self.identity.clone();
        let gateway = self.gateway.clone();

        let token = run_blocking(move || engine.seal(&reading, &identity, &gateway))
            .await?
            .map_err(|e| {
                error!(board = self.name(), "failed to seal reading: {e}");
                HandlerError::Failed(e.to_string())
            })?;

        Ok(self
            .push(session, Procedure::SecureWriteToDb, token.into_string())
            .await)
    }

    /// Call the gateway. A failed call becomes an error payload, never a fault.
    async fn push(&self, session: &SessionHandle, procedure: Procedure, payload: String) -> Value {
        match session
            .call(&self.gateway, procedure.as_str(), vec![Value::String(payload)])
            .await
        {
            Ok(result) => {
                info!(board = self.name(), gateway = %self.gateway, %procedure, "sent reading");
                result
            }
            Err(e) => {
                error!(board = self.name(), gateway = %self.gateway, %procedure, "failed to send reading: {e}");
                error_payload(e)
            }
        }
    }
}
