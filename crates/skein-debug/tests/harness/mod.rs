//! Shared plumbing for the integration suites: opens sessions against the
//! mock interpreter and waits on asynchronous state transitions.

#![allow(dead_code)]

use std::{path::PathBuf, time::Duration};

use tokio::{
    sync::broadcast,
    time::{sleep, timeout},
};

use skein_debug::{
    wire::mock::MockInterpreter, BreakpointRegistry, Session, SessionConfig, SessionNotice,
};

/// Program path every suite debugs; breakpoints must use the same path to be
/// considered part of the session.
pub const PROGRAM: &str = "demo/flock.sk";

pub async fn open_session(mock: &MockInterpreter) -> (Session, BreakpointRegistry) {
    let registry = BreakpointRegistry::new();
    let session = open_session_with_registry(mock, registry.clone()).await;
    (session, registry)
}

pub async fn open_session_with_registry(
    mock: &MockInterpreter,
    registry: BreakpointRegistry,
) -> Session {
    init_tracing();
    Session::open(
        SessionConfig {
            wire: mock.wire_config(),
            program: PathBuf::from(PROGRAM),
        },
        registry,
        None,
    )
    .await
    .expect("session should open against the mock interpreter")
}

/// Routes client tracing to the test output; filtered by `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `predicate` until it holds; panics after five seconds.
pub async fn wait_until(what: &str, mut predicate: impl FnMut() -> bool) {
    let outcome = timeout(Duration::from_secs(5), async {
        while !predicate() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(outcome.is_ok(), "timed out waiting until {what}");
}

pub async fn next_notice(notices: &mut broadcast::Receiver<SessionNotice>) -> SessionNotice {
    timeout(Duration::from_secs(5), notices.recv())
        .await
        .expect("timed out waiting for a session notice")
        .expect("session notice channel closed")
}

/// Collects notices in order up to and including [`SessionNotice::Terminated`].
///
/// Emitting `terminated` and draining with this gives a deterministic cut-off
/// for asserting that some notice did NOT occur: events are processed in
/// order, so everything caused by earlier events is in the returned list.
pub async fn notices_until_terminated(
    notices: &mut broadcast::Receiver<SessionNotice>,
) -> Vec<SessionNotice> {
    let mut seen = Vec::new();
    loop {
        let notice = next_notice(notices).await;
        let done = notice == SessionNotice::Terminated;
        seen.push(notice);
        if done {
            return seen;
        }
    }
}
