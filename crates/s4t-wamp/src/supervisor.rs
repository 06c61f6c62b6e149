//! Keeps one WAMP session joined for a node, for as long as the node runs.
//!
//! The supervisor owns a dedicated thread with its own single-threaded
//! runtime, so every node in a process has an isolated event loop. The loop
//! is:
//!
//! ```text
//! Disconnected -> Connecting -> (join + register all) -> Joined
//!       ^                                                  |
//!       +------------- transport lost / join failed -------+
//! ```
//!
//! Failures are logged and retried after an exponential backoff that never
//! gives up. The only way out is [`Supervisor::shutdown`], which leaves the
//! session with GOODBYE and ends in [`SessionState::Stopped`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use s4t_common::helpers::is_valid_identity_name;
use s4t_common::protocol::{procedure_uri, DEFAULT_NAMESPACE, DEFAULT_REALM};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::backoff::{Backoff, BackoffConfig};
use crate::error::WampError;
use crate::handler::{Handler, ProcedureMap};
use crate::session::{Session, SessionHandle};
use crate::transport::Connector;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub realm: String,
    pub namespace: String,
    pub backoff: BackoffConfig,
    /// Bound on HELLO/WELCOME and on each registration round trip.
    pub join_timeout: Duration,
    pub call_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            realm: DEFAULT_REALM.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            backoff: BackoffConfig::default(),
            join_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Joined,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Joined => "joined",
            SessionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

struct Published {
    state: watch::Sender<SessionState>,
    session: watch::Sender<Option<SessionHandle>>,
}

impl Published {
    fn set(&self, state: SessionState, session: Option<SessionHandle>) {
        // Handle first, so anyone woken by Joined can already call.
        self.session.send_replace(session);
        self.state.send_replace(state);
    }
}

/// Handle to a running supervised session.
pub struct Supervisor {
    identity: String,
    namespace: String,
    state: watch::Receiver<SessionState>,
    session: watch::Receiver<Option<SessionHandle>>,
    shutdown: watch::Sender<bool>,
    joins: Arc<AtomicU64>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Supervisor {
    /// Start supervising. Each entry of `procedures` is registered as
    /// `{namespace}.{identity}.{short_name}` on every join.
    pub fn start<C: Connector>(
        config: SupervisorConfig,
        identity: &str,
        procedures: ProcedureMap,
        connector: C,
    ) -> Result<Self, WampError> {
        if !is_valid_identity_name(identity) {
            return Err(WampError::Registration {
                procedure: identity.to_string(),
                reason: "invalid identity name".into(),
            });
        }

        let registrations: Vec<(String, Arc<dyn Handler>)> = procedures
            .into_iter()
            .map(|(short, handler)| (procedure_uri(&config.namespace, identity, &short), handler))
            .collect();

        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (session_tx, session_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let joins = Arc::new(AtomicU64::new(0));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| WampError::transport(format!("runtime: {e}")))?;

        let worker = Worker {
            identity: identity.to_string(),
            config: config.clone(),
            registrations,
            connector,
            published: Published {
                state: state_tx,
                session: session_tx,
            },
            joins: joins.clone(),
        };

        let thread = thread::Builder::new()
            .name(format!("wamp-{identity}"))
            .spawn(move || runtime.block_on(worker.run(shutdown_rx)))
            .map_err(|e| WampError::transport(format!("spawn supervisor thread: {e}")))?;

        Ok(Self {
            identity: identity.to_string(),
            namespace: config.namespace,
            state: state_rx,
            session: session_rx,
            shutdown: shutdown_tx,
            joins,
            thread: Some(thread),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Follow state changes, including the final `Stopped`.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// How many times a session has been joined (and fully registered).
    pub fn joins(&self) -> u64 {
        self.joins.load(Ordering::Relaxed)
    }

    /// Current session, if joined.
    pub fn session(&self) -> Option<SessionHandle> {
        self.session.borrow().clone()
    }

    /// Wait until the session reaches `wanted`. Returns `false` on timeout
    /// or if the supervisor stopped first.
    pub async fn wait_for_state(&self, wanted: SessionState, timeout: Duration) -> bool {
        let mut rx = self.state.clone();
        let wait = rx.wait_for(|s| *s == wanted || *s == SessionState::Stopped);
        let reached = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(state)) => *state == wanted,
            _ => false,
        };
        reached
    }

    /// Call `{namespace}.{peer}.{short_name}` on the current session.
    pub async fn call(
        &self,
        peer: &str,
        short_name: &str,
        args: Vec<Value>,
    ) -> Result<Value, WampError> {
        let Some(session) = self.session() else {
            return Err(WampError::call_failed(format!(
                "{} is not joined (state: {})",
                self.identity,
                self.state()
            )));
        };
        session.call(peer, short_name, args).await
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Leave the session and stop reconnecting. Blocks until the
    /// supervisor thread has exited.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(identity = %self.identity, "supervisor thread panicked");
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker<C> {
    identity: String,
    config: SupervisorConfig,
    registrations: Vec<(String, Arc<dyn Handler>)>,
    connector: C,
    published: Published,
    joins: Arc<AtomicU64>,
}

impl<C: Connector> Worker<C> {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.config.backoff.clone());

        'outer: loop {
            if *shutdown.borrow() {
                break;
            }

            self.published.set(SessionState::Connecting, None);
            info!(
                identity = %self.identity,
                endpoint = %self.connector.endpoint(),
                "connecting to router"
            );

            let established = tokio::select! {
                res = self.establish() => res,
                _ = shutdown.changed() => break 'outer,
            };

            match established {
                Ok(mut session) => {
                    backoff.reset();
                    self.joins.fetch_add(1, Ordering::Relaxed);
                    info!(
                        identity = %self.identity,
                        session = session.id(),
                        procedures = self.registrations.len(),
                        "session joined"
                    );
                    self.published
                        .set(SessionState::Joined, Some(session.handle()));

                    let stop = tokio::select! {
                        reason = session.serve() => {
                            error!(identity = %self.identity, "session lost: {reason}");
                            false
                        }
                        _ = shutdown.changed() => true,
                    };
                    self.published.set(SessionState::Disconnected, None);
                    if stop {
                        session.leave().await;
                        break 'outer;
                    }
                }
                Err(e) => {
                    error!(identity = %self.identity, "could not join: {e}");
                    self.published.set(SessionState::Disconnected, None);
                }
            }

            let delay = backoff.next_delay();
            warn!(
                identity = %self.identity,
                attempt = backoff.attempts(),
                "reconnecting in {delay:?}"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break 'outer,
            }
        }

        info!(identity = %self.identity, "supervisor stopped");
        self.published.set(SessionState::Stopped, None);
    }

    async fn establish(&self) -> Result<Session, WampError> {
        let transport = self.connector.connect().await?;
        let mut session = Session::join(
            transport,
            &self.config.realm,
            &self.config.namespace,
            self.config.join_timeout,
            self.config.call_timeout,
        )
        .await?;

        for (procedure, handler) in &self.registrations {
            session.register(procedure, handler.clone()).await?;
            info!(identity = %self.identity, %procedure, "registered");
        }
        Ok(session)
    }
}
