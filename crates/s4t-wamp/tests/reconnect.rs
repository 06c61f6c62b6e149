//! Supervisor behaviour against the in-process router.

use std::time::Duration;

use s4t_wamp::{
    handler_fn, BackoffConfig, HandlerError, Invocation, LocalRouter, ProcedureMap, SessionState,
    Supervisor, SupervisorConfig, WampError,
};
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(5);

fn config() -> SupervisorConfig {
    SupervisorConfig {
        backoff: BackoffConfig {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(100),
            jitter: true,
        },
        join_timeout: Duration::from_secs(2),
        call_timeout: Duration::from_secs(2),
        ..SupervisorConfig::default()
    }
}

fn echo_procedures() -> ProcedureMap {
    let mut procedures = ProcedureMap::new();
    procedures.insert(
        "echo".into(),
        handler_fn(|inv: Invocation| async move {
            Ok::<_, HandlerError>(inv.arg(0).cloned().unwrap_or(Value::Null))
        }),
    );
    procedures.insert(
        "fail".into(),
        handler_fn(|_inv: Invocation| async move {
            Err::<Value, _>(HandlerError::Failed("boom".into()))
        }),
    );
    procedures
}

#[tokio::test]
async fn test_joins_and_registers_under_identity() {
    let router = LocalRouter::new("s4t");
    let sup = Supervisor::start(config(), "Board_2", echo_procedures(), router.clone()).unwrap();

    assert!(sup.wait_for_state(SessionState::Joined, WAIT).await);
    assert_eq!(sup.joins(), 1);
    assert_eq!(
        router.registered_procedures(),
        vec!["iotronic.Board_2.echo", "iotronic.Board_2.fail"]
    );
}

#[tokio::test]
async fn test_peers_call_each_other() {
    let router = LocalRouter::new("s4t");
    let board = Supervisor::start(config(), "Board_2", echo_procedures(), router.clone()).unwrap();
    let gateway =
        Supervisor::start(config(), "Board_1_GT", ProcedureMap::new(), router.clone()).unwrap();

    assert!(board.wait_for_state(SessionState::Joined, WAIT).await);
    assert!(gateway.wait_for_state(SessionState::Joined, WAIT).await);

    let reply = gateway.call("Board_2", "echo", vec![json!("7")]).await.unwrap();
    assert_eq!(reply, json!("7"));

    match gateway.call("Board_2", "fail", vec![]).await {
        Err(WampError::CallFailed { detail }) => assert!(detail.contains("boom")),
        other => panic!("unexpected {other:?}"),
    }

    // Remote failure does not cost either side its session.
    assert_eq!(board.state(), SessionState::Joined);
    assert_eq!(gateway.state(), SessionState::Joined);
}

#[tokio::test]
async fn test_handler_panic_becomes_error() {
    let router = LocalRouter::new("s4t");
    let mut procedures = ProcedureMap::new();
    procedures.insert(
        "explode".into(),
        handler_fn(|_inv: Invocation| async move {
            if true {
                panic!("sensor on fire");
            }
            Ok::<_, HandlerError>(Value::Null)
        }),
    );
    let board = Supervisor::start(config(), "Board_2", procedures, router.clone()).unwrap();
    let caller = Supervisor::start(config(), "Board_1_GT", ProcedureMap::new(), router).unwrap();
    assert!(board.wait_for_state(SessionState::Joined, WAIT).await);
    assert!(caller.wait_for_state(SessionState::Joined, WAIT).await);

    assert!(matches!(
        caller.call("Board_2", "explode", vec![]).await,
        Err(WampError::CallFailed { .. })
    ));
    assert_eq!(board.joins(), 1);
    assert_eq!(board.state(), SessionState::Joined);
}

#[tokio::test]
async fn test_reconnects_after_router_loss_without_double_registration() {
    let router = LocalRouter::new("s4t");
    let sup = Supervisor::start(config(), "Board_2", echo_procedures(), router.clone()).unwrap();
    assert!(sup.wait_for_state(SessionState::Joined, WAIT).await);

    for round in 2..=4 {
        router.sever_all();
        tokio::time::timeout(WAIT, async {
            while sup.joins() < round {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("supervisor did not rejoin");
        assert!(sup.wait_for_state(SessionState::Joined, WAIT).await);
        assert_eq!(
            router.registered_procedures(),
            vec!["iotronic.Board_2.echo", "iotronic.Board_2.fail"]
        );
    }
}

#[tokio::test]
async fn test_keeps_retrying_while_router_is_down() {
    let router = LocalRouter::new("s4t");
    router.set_reachable(false);
    let sup = Supervisor::start(config(), "Board_2", echo_procedures(), router.clone()).unwrap();

    // Nothing is joined, so waits time out and calls fail fast.
    assert!(
        !sup.wait_for_state(SessionState::Joined, Duration::from_millis(200))
            .await
    );
    assert_ne!(sup.state(), SessionState::Joined);
    assert!(matches!(
        sup.call("Board_1_GT", "get_data", vec![]).await,
        Err(WampError::CallFailed { .. })
    ));

    router.set_reachable(true);
    assert!(sup.wait_for_state(SessionState::Joined, WAIT).await);
    assert_eq!(sup.joins(), 1);
}

#[tokio::test]
async fn test_shutdown_leaves_and_stops() {
    let router = LocalRouter::new("s4t");
    let sup = Supervisor::start(config(), "Board_2", echo_procedures(), router.clone()).unwrap();
    assert!(sup.wait_for_state(SessionState::Joined, WAIT).await);

    let states = sup.subscribe();
    sup.shutdown();

    assert_eq!(*states.borrow(), SessionState::Stopped);
    assert!(router.registered_procedures().is_empty());
    assert_eq!(router.session_count(), 0);
}

#[test]
fn test_rejects_invalid_identity() {
    let router = LocalRouter::new("s4t");
    assert!(Supervisor::start(config(), "../Board", ProcedureMap::new(), router).is_err());
}
