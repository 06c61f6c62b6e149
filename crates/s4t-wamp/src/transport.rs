use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::WampError;
use crate::message::WampMessage;

pub(crate) const CHANNEL_CAPACITY: usize = 64;

/// A bidirectional message pipe to the router.
///
/// Framing and serialization live in background tasks; the session only
/// sees [`WampMessage`]s. `recv` is cancel-safe so it can sit in a `select!`.
/// Dropping the transport stops its tasks and closes the connection.
pub struct Transport {
    outbound: mpsc::Sender<WampMessage>,
    inbound: mpsc::Receiver<WampMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl Transport {
    pub(crate) fn from_parts(
        outbound: mpsc::Sender<WampMessage>,
        inbound: mpsc::Receiver<WampMessage>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            tasks,
        }
    }

    /// Two transports wired back to back.
    pub fn pair(capacity: usize) -> (Transport, Transport) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        (
            Transport::from_parts(a_tx, b_rx, Vec::new()),
            Transport::from_parts(b_tx, a_rx, Vec::new()),
        )
    }

    pub async fn send(&self, msg: WampMessage) -> Result<(), WampError> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| WampError::transport("connection closed"))
    }

    pub async fn recv(&mut self) -> Result<WampMessage, WampError> {
        self.inbound
            .recv()
            .await
            .ok_or_else(|| WampError::transport("connection closed"))
    }

    /// A handle that can push messages to the peer without owning the transport.
    pub(crate) fn sender(&self) -> mpsc::Sender<WampMessage> {
        self.outbound.clone()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Opens fresh transports to a router. Called once per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Transport, WampError>;

    /// Where this connector points, for logs.
    fn endpoint(&self) -> String;
}
