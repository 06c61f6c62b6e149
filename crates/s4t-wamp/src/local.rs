//! In-process WAMP dealer.
//!
//! Implements enough of the router side (sessions, registrations, call
//! routing) to run boards and gateways in one process, and lets tests cut
//! connections or refuse new ones to exercise reconnects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::WampError;
use crate::message::{self, uri, Dict, WampMessage};
use crate::transport::{Connector, Transport, CHANNEL_CAPACITY};

#[derive(Clone)]
pub struct LocalRouter {
    realm: Arc<str>,
    state: Arc<Mutex<RouterState>>,
}

struct Peer {
    outbound: mpsc::Sender<WampMessage>,
    // Dropping this ends the connection task.
    _kill: oneshot::Sender<()>,
}

struct PendingInvocation {
    caller: u64,
    caller_request: u64,
    callee: u64,
}

struct RouterState {
    reachable: bool,
    next_id: u64,
    peers: HashMap<u64, Peer>,
    procedures: HashMap<String, (u64, u64)>,
    registrations: HashMap<u64, (u64, String)>,
    invocations: HashMap<u64, PendingInvocation>,
}

type Outbox = Vec<(mpsc::Sender<WampMessage>, WampMessage)>;

impl LocalRouter {
    pub fn new(realm: &str) -> Self {
        Self {
            realm: Arc::from(realm),
            state: Arc::new(Mutex::new(RouterState {
                reachable: true,
                next_id: 0,
                peers: HashMap::new(),
                procedures: HashMap::new(),
                registrations: HashMap::new(),
                invocations: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// When unreachable, new connection attempts fail. Existing sessions
    /// are not affected.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Drop every connection, as if the router restarted.
    pub fn sever_all(&self) {
        let mut state = self.lock();
        state.peers.clear();
        state.procedures.clear();
        state.registrations.clear();
        state.invocations.clear();
    }

    /// Sorted URIs of every registered procedure.
    pub fn registered_procedures(&self) -> Vec<String> {
        let mut procedures: Vec<_> = self.lock().procedures.keys().cloned().collect();
        procedures.sort();
        procedures
    }

    pub fn session_count(&self) -> usize {
        self.lock().peers.len()
    }

    async fn serve(self, id: u64, mut transport: Transport, mut kill: oneshot::Receiver<()>) {
        // Detach even when the task is dropped with its runtime.
        let _attached = Attached {
            router: self.clone(),
            id,
        };

        let joined = tokio::select! {
            msg = transport.recv() => match msg {
                Ok(WampMessage::Hello { realm, .. }) if *realm == *self.realm => true,
                Ok(WampMessage::Hello { realm, .. }) => {
                    debug!(%realm, "refusing unknown realm");
                    let _ = transport
                        .send(WampMessage::Abort {
                            details: Dict::new(),
                            reason: uri::NO_SUCH_REALM.into(),
                        })
                        .await;
                    false
                }
                _ => false,
            },
            _ = &mut kill => false,
        };

        if joined
            && transport
                .send(WampMessage::Welcome {
                    session: id,
                    details: Dict::new(),
                })
                .await
                .is_ok()
        {
            loop {
                tokio::select! {
                    msg = transport.recv() => {
                        let Ok(msg) = msg else { break };
                        if let WampMessage::Goodbye { .. } = msg {
                            let _ = transport
                                .send(WampMessage::goodbye(uri::CLOSE_GOODBYE_AND_OUT))
                                .await;
                            break;
                        }
                        for (peer, msg) in self.route(id, msg) {
                            let _ = peer.send(msg).await;
                        }
                    }
                    _ = &mut kill => break,
                }
            }
        }
    }

    fn route(&self, from: u64, msg: WampMessage) -> Outbox {
        let mut state = self.lock();
        let Some(sender) = state.peers.get(&from).map(|p| p.outbound.clone()) else {
            return Vec::new();
        };
        let mut out = Outbox::new();

        match msg {
            WampMessage::Register {
                request, procedure, ..
            } => {
                if state.procedures.contains_key(&procedure) {
                    out.push((
                        sender,
                        error(message::REGISTER, request, uri::PROCEDURE_ALREADY_EXISTS),
                    ));
                } else {
                    let registration = state.next_id();
                    state
                        .procedures
                        .insert(procedure.clone(), (from, registration));
                    state.registrations.insert(registration, (from, procedure));
                    out.push((
                        sender,
                        WampMessage::Registered {
                            request,
                            registration,
                        },
                    ));
                }
            }
            WampMessage::Unregister {
                request,
                registration,
            } => match state.registrations.remove(&registration) {
                Some((_, procedure)) => {
                    state.procedures.remove(&procedure);
                    out.push((sender, WampMessage::Unregistered { request }));
                }
                None => out.push((
                    sender,
                    error(message::UNREGISTER, request, uri::NO_SUCH_REGISTRATION),
                )),
            },
            WampMessage::Call {
                request,
                procedure,
                args,
                kwargs,
                ..
            } => {
                let target = state.procedures.get(&procedure).copied().and_then(
                    |(callee, registration)| {
                        state
                            .peers
                            .get(&callee)
                            .map(|p| (callee, registration, p.outbound.clone()))
                    },
                );
                match target {
                    Some((callee, registration, callee_tx)) => {
                        let invocation = state.next_id();
                        state.invocations.insert(
                            invocation,
                            PendingInvocation {
                                caller: from,
                                caller_request: request,
                                callee,
                            },
                        );
                        out.push((
                            callee_tx,
                            WampMessage::Invocation {
                                request: invocation,
                                registration,
                                details: Dict::new(),
                                args,
                                kwargs,
                            },
                        ));
                    }
                    None => out.push((
                        sender,
                        error(message::CALL, request, uri::NO_SUCH_PROCEDURE),
                    )),
                }
            }
            WampMessage::Yield {
                request,
                args,
                kwargs,
                ..
            } => {
                if let Some((caller_tx, pending)) = state.take_invocation(request) {
                    out.push((
                        caller_tx,
                        WampMessage::Result {
                            request: pending.caller_request,
                            details: Dict::new(),
                            args,
                            kwargs,
                        },
                    ));
                }
            }
            WampMessage::Error {
                request_type: message::INVOCATION,
                request,
                error: reason,
                args,
                kwargs,
                ..
            } => {
                if let Some((caller_tx, pending)) = state.take_invocation(request) {
                    out.push((
                        caller_tx,
                        WampMessage::Error {
                            request_type: message::CALL,
                            request: pending.caller_request,
                            details: Dict::new(),
                            error: reason,
                            args,
                            kwargs,
                        },
                    ));
                }
            }
            other => debug!(session = from, code = other.code(), "router ignoring message"),
        }
        out
    }

    /// Forget a connection and fail the calls that were waiting on it.
    fn detach(&self, id: u64) -> Outbox {
        let mut state = self.lock();
        state.peers.remove(&id);
        state.registrations.retain(|_, (owner, _)| *owner != id);
        state.procedures.retain(|_, (owner, _)| *owner != id);

        let dead: Vec<u64> = state
            .invocations
            .iter()
            .filter(|(_, p)| p.callee == id || p.caller == id)
            .map(|(k, _)| *k)
            .collect();

        let mut out = Outbox::new();
        for invocation in dead {
            if let Some((caller_tx, pending)) = state.take_invocation(invocation) {
                out.push((
                    caller_tx,
                    error(message::CALL, pending.caller_request, uri::CANCELED),
                ));
            }
        }
        out
    }
}

struct Attached {
    router: LocalRouter,
    id: u64,
}

impl Drop for Attached {
    fn drop(&mut self) {
        for (peer, msg) in self.router.detach(self.id) {
            let _ = peer.try_send(msg);
        }
    }
}

impl RouterState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_invocation(
        &mut self,
        invocation: u64,
    ) -> Option<(mpsc::Sender<WampMessage>, PendingInvocation)> {
        let pending = self.invocations.remove(&invocation)?;
        let caller_tx = self.peers.get(&pending.caller)?.outbound.clone();
        Some((caller_tx, pending))
    }
}

fn error(request_type: u64, request: u64, reason: &str) -> WampMessage {
    WampMessage::Error {
        request_type,
        request,
        details: Dict::new(),
        error: reason.to_string(),
        args: vec![],
        kwargs: Dict::new(),
    }
}

#[async_trait]
impl Connector for LocalRouter {
    async fn connect(&self) -> Result<Transport, WampError> {
        let (client, server, id, kill) = {
            let mut state = self.lock();
            if !state.reachable {
                return Err(WampError::transport("router unreachable"));
            }
            let (client, server) = Transport::pair(CHANNEL_CAPACITY);
            let (kill_tx, kill_rx) = oneshot::channel();
            let id = state.next_id();
            state.peers.insert(
                id,
                Peer {
                    outbound: server.sender(),
                    _kill: kill_tx,
                },
            );
            (client, server, id, kill_rx)
        };

        tokio::spawn(self.clone().serve(id, server, kill));
        Ok(client)
    }

    fn endpoint(&self) -> String {
        format!("local://{}", self.realm)
    }
}
