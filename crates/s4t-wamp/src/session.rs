//! One joined WAMP session: join, register, then serve until the
//! transport goes away.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use s4t_common::protocol::procedure_uri;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, warn};

use crate::error::WampError;
use crate::handler::{Handler, HandlerError, HandlerResult, Invocation};
use crate::message::{self, uri, Dict, WampMessage};
use crate::transport::{Transport, CHANNEL_CAPACITY};

pub(crate) enum Command {
    Call {
        procedure: String,
        args: Vec<Value>,
        reply: oneshot::Sender<Result<Value, WampError>>,
    },
    /// Forget calls whose caller stopped waiting.
    Sweep,
}

/// Issues calls on a joined session. Cheap to clone.
///
/// Becomes useless once its session ends; calls then fail with
/// [`WampError::CallFailed`].
#[derive(Clone)]
pub struct SessionHandle {
    id: u64,
    namespace: Arc<str>,
    call_timeout: Duration,
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

impl SessionHandle {
    /// Router-assigned session id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Call `{namespace}.{peer}.{short_name}`.
    pub async fn call(&self, peer: &str, short_name: &str, args: Vec<Value>) -> Result<Value, WampError> {
        self.call_uri(&procedure_uri(&self.namespace, peer, short_name), args)
            .await
    }

    /// Call a procedure by full URI and return its first result argument
    /// (`null` when the callee yields nothing).
    pub async fn call_uri(&self, procedure: &str, args: Vec<Value>) -> Result<Value, WampError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Call {
                procedure: procedure.to_string(),
                args,
                reply,
            })
            .await
            .map_err(|_| WampError::call_failed("session closed"))?;

        let outcome = tokio::time::timeout(self.call_timeout, rx).await;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WampError::call_failed(format!(
                "session closed before {procedure} returned"
            ))),
            Err(_) => {
                // The receiver is gone by now, so the sweep drops this call.
                let _ = self.commands.try_send(Command::Sweep);
                Err(WampError::call_failed(format!(
                    "{procedure} timed out after {:?}",
                    self.call_timeout
                )))
            }
        }
    }
}

struct Registration {
    procedure: String,
    handler: Arc<dyn Handler>,
}

pub(crate) struct Session {
    id: u64,
    transport: Transport,
    next_request: u64,
    timeout: Duration,
    handle: SessionHandle,
    commands: mpsc::Receiver<Command>,
    registrations: HashMap<u64, Registration>,
    pending_calls: HashMap<u64, oneshot::Sender<Result<Value, WampError>>>,
    invocations: JoinSet<(u64, HandlerResult)>,
    /// Messages that arrived while a registration was in flight.
    deferred: VecDeque<WampMessage>,
}

impl Session {
    /// Send HELLO and wait for WELCOME.
    pub(crate) async fn join(
        mut transport: Transport,
        realm: &str,
        namespace: &str,
        timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Session, WampError> {
        let mut details = Dict::new();
        details.insert(
            "roles".into(),
            json!({ "caller": { "features": {} }, "callee": { "features": {} } }),
        );
        transport
            .send(WampMessage::Hello {
                realm: realm.to_string(),
                details,
            })
            .await?;

        let reply = tokio::time::timeout(timeout, transport.recv())
            .await
            .map_err(|_| WampError::transport(format!("no WELCOME within {timeout:?}")))??;

        let id = match reply {
            WampMessage::Welcome { session, .. } => session,
            WampMessage::Abort { reason, .. } => return Err(WampError::Aborted { reason }),
            other => {
                return Err(WampError::protocol(format!(
                    "expected WELCOME, got message type {}",
                    other.code()
                )))
            }
        };

        let (commands_tx, commands) = mpsc::channel(CHANNEL_CAPACITY);
        Ok(Session {
            id,
            transport,
            next_request: 0,
            timeout,
            handle: SessionHandle {
                id,
                namespace: Arc::from(namespace),
                call_timeout,
                commands: commands_tx,
            },
            commands,
            registrations: HashMap::new(),
            pending_calls: HashMap::new(),
            invocations: JoinSet::new(),
            deferred: VecDeque::new(),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    fn next_request(&mut self) -> u64 {
        self.next_request += 1;
        self.next_request
    }

    /// Register one procedure and wait for the router to confirm it.
    pub(crate) async fn register(
        &mut self,
        procedure: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<(), WampError> {
        let request = self.next_request();
        self.transport
            .send(WampMessage::Register {
                request,
                options: Dict::new(),
                procedure: procedure.to_string(),
            })
            .await?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let msg = tokio::time::timeout_at(deadline, self.transport.recv())
                .await
                .map_err(|_| WampError::Registration {
                    procedure: procedure.to_string(),
                    reason: "router did not answer".into(),
                })??;

            match msg {
                WampMessage::Registered {
                    request: r,
                    registration,
                } if r == request => {
                    self.registrations.insert(
                        registration,
                        Registration {
                            procedure: procedure.to_string(),
                            handler,
                        },
                    );
                    return Ok(());
                }
                WampMessage::Error {
                    request_type: message::REGISTER,
                    request: r,
                    error,
                    ..
                } if r == request => {
                    return Err(WampError::Registration {
                        procedure: procedure.to_string(),
                        reason: error,
                    })
                }
                WampMessage::Abort { reason, .. } | WampMessage::Goodbye { reason, .. } => {
                    return Err(WampError::Aborted { reason })
                }
                other => {
                    debug!(code = other.code(), "deferring message until registration completes");
                    self.deferred.push_back(other);
                }
            }
        }
    }

    /// Run until the session ends. Always returns the reason it ended.
    pub(crate) async fn serve(&mut self) -> WampError {
        while let Some(msg) = self.deferred.pop_front() {
            if let Err(e) = self.on_message(msg).await {
                return e;
            }
        }
        loop {
            let step = tokio::select! {
                inbound = self.transport.recv() => match inbound {
                    Ok(msg) => self.on_message(msg).await,
                    Err(e) => Err(e),
                },
                Some(command) = self.commands.recv() => self.on_command(command).await,
                Some(done) = self.invocations.join_next(), if !self.invocations.is_empty() => {
                    self.on_invocation_done(done).await
                }
            };
            if let Err(e) = step {
                return e;
            }
        }
    }

    /// Say GOODBYE and give the router a moment to answer.
    pub(crate) async fn leave(mut self) {
        if self
            .transport
            .send(WampMessage::goodbye(uri::CLOSE_SYSTEM_SHUTDOWN))
            .await
            .is_err()
        {
            return;
        }
        let _ = tokio::time::timeout(Duration::from_secs(1), async {
            while let Ok(msg) = self.transport.recv().await {
                if matches!(msg, WampMessage::Goodbye { .. }) {
                    break;
                }
            }
        })
        .await;
    }

    async fn on_message(&mut self, msg: WampMessage) -> Result<(), WampError> {
        match msg {
            WampMessage::Invocation {
                request,
                registration,
                args,
                kwargs,
                ..
            } => {
                let Some(reg) = self.registrations.get(&registration) else {
                    warn!(registration, "invocation for unknown registration");
                    return self
                        .transport
                        .send(error_reply(
                            request,
                            uri::NO_SUCH_REGISTRATION,
                            "unknown registration".into(),
                        ))
                        .await;
                };

                let handler = reg.handler.clone();
                let invocation = Invocation {
                    procedure: reg.procedure.clone(),
                    args,
                    kwargs,
                    session: self.handle.clone(),
                };
                self.invocations.spawn(async move {
                    let result = AssertUnwindSafe(handler.call(invocation))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Err(HandlerError::Failed("handler panicked".into())));
                    (request, result)
                });
                Ok(())
            }
            WampMessage::Result { request, args, .. } => {
                match self.pending_calls.remove(&request) {
                    Some(reply) => {
                        let _ = reply.send(Ok(args.into_iter().next().unwrap_or(Value::Null)));
                    }
                    None => debug!(request, "result for unknown call"),
                }
                Ok(())
            }
            WampMessage::Error {
                request_type: message::CALL,
                request,
                error,
                args,
                ..
            } => {
                if let Some(reply) = self.pending_calls.remove(&request) {
                    let detail = match args.first() {
                        Some(Value::String(s)) => format!("{error}: {s}"),
                        Some(other) => format!("{error}: {other}"),
                        None => error,
                    };
                    let _ = reply.send(Err(WampError::CallFailed { detail }));
                }
                Ok(())
            }
            WampMessage::Goodbye { reason, .. } => {
                let _ = self
                    .transport
                    .send(WampMessage::goodbye(uri::CLOSE_GOODBYE_AND_OUT))
                    .await;
                Err(WampError::transport(format!("router closed the session: {reason}")))
            }
            WampMessage::Abort { reason, .. } => Err(WampError::Aborted { reason }),
            unexpected @ (WampMessage::Hello { .. }
            | WampMessage::Welcome { .. }
            | WampMessage::Call { .. }
            | WampMessage::Register { .. }
            | WampMessage::Unregister { .. }
            | WampMessage::Yield { .. }) => Err(WampError::protocol(format!(
                "unexpected message type {} on an established session",
                unexpected.code()
            ))),
            other => {
                debug!(code = other.code(), "ignoring message");
                Ok(())
            }
        }
    }

    async fn on_command(&mut self, command: Command) -> Result<(), WampError> {
        match command {
            Command::Call {
                procedure,
                args,
                reply,
            } => {
                let request = self.next_request();
                self.pending_calls.insert(request, reply);
                self.transport
                    .send(WampMessage::Call {
                        request,
                        options: Dict::new(),
                        procedure,
                        args,
                        kwargs: Dict::new(),
                    })
                    .await
            }
            Command::Sweep => {
                self.pending_calls.retain(|_, reply| !reply.is_closed());
                Ok(())
            }
        }
    }

    async fn on_invocation_done(
        &mut self,
        done: Result<(u64, HandlerResult), JoinError>,
    ) -> Result<(), WampError> {
        let (request, result) = match done {
            Ok(done) => done,
            Err(e) => {
                error!("invocation task failed: {e}");
                return Ok(());
            }
        };

        let reply = match result {
            Ok(Value::Null) => WampMessage::Yield {
                request,
                options: Dict::new(),
                args: vec![],
                kwargs: Dict::new(),
            },
            Ok(value) => WampMessage::Yield {
                request,
                options: Dict::new(),
                args: vec![value],
                kwargs: Dict::new(),
            },
            Err(e) => {
                warn!(request, "handler failed: {e}");
                error_reply(request, e.uri(), e.to_string())
            }
        };
        self.transport.send(reply).await
    }
}

fn error_reply(request: u64, error: &str, detail: String) -> WampMessage {
    WampMessage::Error {
        request_type: message::INVOCATION,
        request,
        details: Dict::new(),
        error: error.to_string(),
        args: vec![Value::String(detail)],
        kwargs: Dict::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    const T: Duration = Duration::from_secs(5);

    async fn welcome(router: &mut Transport) {
        let hello = router.recv().await.unwrap();
        assert!(matches!(hello, WampMessage::Hello { ref realm, .. } if realm == "s4t"));
        router
            .send(WampMessage::Welcome {
                session: 42,
                details: Dict::new(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_join_and_abort() {
        let (client, mut router) = Transport::pair(8);
        let join = tokio::spawn(Session::join(client, "s4t", "iotronic", T, T));
        welcome(&mut router).await;
        assert_eq!(join.await.unwrap().unwrap().id(), 42);

        let (client, mut router) = Transport::pair(8);
        let join = tokio::spawn(Session::join(client, "nope", "iotronic", T, T));
        router.recv().await.unwrap();
        router
            .send(WampMessage::Abort {
                details: Dict::new(),
                reason: uri::NO_SUCH_REALM.into(),
            })
            .await
            .unwrap();
        assert!(matches!(
            join.await.unwrap(),
            Err(WampError::Aborted { .. })
        ));
    }

    #[tokio::test]
    async fn test_invocation_yields_handler_result() {
        let (client, mut router) = Transport::pair(8);
        let join = tokio::spawn(Session::join(client, "s4t", "iotronic", T, T));
        welcome(&mut router).await;
        let mut session = join.await.unwrap().unwrap();

        let register = tokio::spawn(async move {
            session
                .register(
                    "iotronic.Board_2.echo",
                    handler_fn(|inv: Invocation| async move {
                        Ok::<_, HandlerError>(inv.args[0].clone())
                    }),
                )
                .await
                .unwrap();
            session
        });
        let WampMessage::Register { request, .. } = router.recv().await.unwrap() else {
            panic!("expected REGISTER");
        };
        router
            .send(WampMessage::Registered {
                request,
                registration: 7,
            })
            .await
            .unwrap();
        let mut session = register.await.unwrap();
        let serve = tokio::spawn(async move { session.serve().await });

        router
            .send(WampMessage::Invocation {
                request: 1,
                registration: 7,
                details: Dict::new(),
                args: vec![json!("ping")],
                kwargs: Dict::new(),
            })
            .await
            .unwrap();
        match router.recv().await.unwrap() {
            WampMessage::Yield { request, args, .. } => {
                assert_eq!(request, 1);
                assert_eq!(args, vec![json!("ping")]);
            }
            other => panic!("unexpected {other:?}"),
        }

        // Unknown registration gets an ERROR, not a dropped session.
        router
            .send(WampMessage::Invocation {
                request: 2,
                registration: 99,
                details: Dict::new(),
                args: vec![],
                kwargs: Dict::new(),
            })
            .await
            .unwrap();
        assert!(matches!(
            router.recv().await.unwrap(),
            WampMessage::Error { request: 2, .. }
        ));

        drop(router);
        assert!(matches!(
            serve.await.unwrap(),
            WampError::TransportFailure(_)
        ));
    }

    #[tokio::test]
    async fn test_outbound_call_error_is_call_failed() {
        let (client, mut router) = Transport::pair(8);
        let join = tokio::spawn(Session::join(client, "s4t", "iotronic", T, T));
        welcome(&mut router).await;
        let mut session = join.await.unwrap().unwrap();
        let handle = session.handle();
        tokio::spawn(async move { session.serve().await });

        let call = tokio::spawn(async move {
            handle
                .call("Board_1_GT", "secure_write_to_db", vec![json!("tok")])
                .await
        });
        let WampMessage::Call {
            request, procedure, ..
        } = router.recv().await.unwrap()
        else {
            panic!("expected CALL");
        };
        assert_eq!(procedure, "iotronic.Board_1_GT.secure_write_to_db");
        router
            .send(WampMessage::Error {
                request_type: message::CALL,
                request,
                details: Dict::new(),
                error: uri::NO_SUCH_PROCEDURE.into(),
                args: vec![],
                kwargs: Dict::new(),
            })
            .await
            .unwrap();

        match call.await.unwrap() {
            Err(WampError::CallFailed { detail }) => assert!(detail.contains("no_such_procedure")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let (client, mut router) = Transport::pair(8);
        let join = tokio::spawn(Session::join(
            client,
            "s4t",
            "iotronic",
            T,
            Duration::from_millis(50),
        ));
        welcome(&mut router).await;
        let mut session = join.await.unwrap().unwrap();
        let handle = session.handle();
        tokio::spawn(async move { session.serve().await });

        let result = handle.call("Board_1_GT", "get_data", vec![]).await;
        assert!(matches!(result, Err(WampError::CallFailed { .. })));
        // Keep the router end alive until the call has given up.
        drop(router);
    }

    #[tokio::test]
    async fn test_timed_out_calls_are_forgotten() {
        let (client, mut router) = Transport::pair(64);
        let join = tokio::spawn(Session::join(
            client,
            "s4t",
            "iotronic",
            T,
            Duration::from_millis(20),
        ));
        welcome(&mut router).await;
        let mut session = join.await.unwrap().unwrap();
        let handle = session.handle();

        // The router reads nothing, so every call times out.
        let calls = async {
            for _ in 0..10 {
                let result = handle.call("Board_1_GT", "get_data", vec![]).await;
                assert!(matches!(result, Err(WampError::CallFailed { .. })));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        };
        tokio::select! {
            reason = session.serve() => panic!("session ended: {reason}"),
            _ = calls => {}
        }

        assert!(session.pending_calls.is_empty());
        drop(router);
    }

    #[tokio::test]
    async fn test_invocation_during_registration_is_answered() {
        let (client, mut router) = Transport::pair(8);
        let join = tokio::spawn(Session::join(client, "s4t", "iotronic", T, T));
        welcome(&mut router).await;
        let mut session = join.await.unwrap().unwrap();

        let echo = || {
            handler_fn(|inv: Invocation| async move {
                Ok::<_, HandlerError>(inv.args[0].clone())
            })
        };
        let register = tokio::spawn(async move {
            session.register("iotronic.Board_2.a", echo()).await.unwrap();
            session.register("iotronic.Board_2.b", echo()).await.unwrap();
            session
        });

        let WampMessage::Register { request, .. } = router.recv().await.unwrap() else {
            panic!("expected REGISTER for a");
        };
        router
            .send(WampMessage::Registered {
                request,
                registration: 1,
            })
            .await
            .unwrap();

        let WampMessage::Register { request, .. } = router.recv().await.unwrap() else {
            panic!("expected REGISTER for b");
        };
        // A caller reaches `a` before `b` is confirmed.
        router
            .send(WampMessage::Invocation {
                request: 77,
                registration: 1,
                details: Dict::new(),
                args: vec![json!("early")],
                kwargs: Dict::new(),
            })
            .await
            .unwrap();
        router
            .send(WampMessage::Registered {
                request,
                registration: 2,
            })
            .await
            .unwrap();

        let mut session = register.await.unwrap();
        tokio::spawn(async move { session.serve().await });

        match tokio::time::timeout(T, router.recv()).await.unwrap().unwrap() {
            WampMessage::Yield { request, args, .. } => {
                assert_eq!(request, 77);
                assert_eq!(args, vec![json!("early")]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
