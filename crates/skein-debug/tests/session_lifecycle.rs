//! End-to-end coverage of the session state machine against the mock
//! interpreter: startup, suspension snapshots, stepping, termination, and
//! connection failures.

mod harness;

use std::{path::PathBuf, sync::Arc};

use harness::{next_notice, notices_until_terminated, open_session, wait_until, PROGRAM};

use skein_debug::{
    wire::{
        mock::{MockInterpreter, MockInterpreterConfig},
        WireError,
    },
    BreakpointRegistry, ProcessHandle, Session, SessionConfig, SessionNotice, StopReason,
    ThreadStatus,
};

#[tokio::test]
async fn started_event_announces_the_session_and_resumes() {
    let mock = MockInterpreter::spawn().await.unwrap();
    let (session, _registry) = open_session(&mock).await;
    let mut notices = session.subscribe();

    mock.emit("started").await.unwrap();

    assert_eq!(next_notice(&mut notices).await, SessionNotice::Created);
    mock.wait_for_request("resume").await;
    assert!(!session.is_terminated());
    assert!(!session.is_suspended());
}

#[tokio::test]
async fn suspension_rebuilds_the_target_snapshot() {
    let mut config = MockInterpreterConfig::default();
    config.source_reply = "demo/flock.sk|3".to_string();
    config.threads_reply = "12|0#7|2".to_string();
    config.stack_replies.insert(12, "tick|14#main|3".to_string());
    config.stack_replies.insert(7, "wait|9".to_string());
    let mock = MockInterpreter::spawn_with_config(config).await.unwrap();
    let (session, _registry) = open_session(&mock).await;
    let mut notices = session.subscribe();

    mock.emit("suspended breakpoint 14").await.unwrap();
    wait_until("the thread snapshot is rebuilt", || session.has_threads()).await;

    assert!(session.is_suspended());
    assert_eq!(session.target_source_file(), "flock.sk");
    assert_eq!(session.current_node(), 3);

    let threads = session.threads();
    assert_eq!(threads.len(), 2);
    assert_eq!(threads[0].handle(), 12);
    assert_eq!(threads[0].status(), ThreadStatus::Running);
    assert_eq!(threads[0].frames()[0].function(), "tick");
    assert_eq!(threads[0].frames()[0].line(), 14);
    assert!(threads[0].can_step_return());
    assert_eq!(threads[1].handle(), 7);
    assert_eq!(threads[1].status(), ThreadStatus::Delaying);
    assert!(!threads[1].can_step_return());
    assert!(session.can_step_return());

    // The focus thread is the first of the snapshot.
    assert_eq!(
        next_notice(&mut notices).await,
        SessionNotice::ThreadSuspended {
            handle: 12,
            reason: StopReason::Breakpoint,
        }
    );
}

#[tokio::test]
async fn malformed_source_replies_are_discarded() {
    // Wrong field count: the update is dropped wholesale, no partial state.
    let mut config = MockInterpreterConfig::default();
    config.source_reply = "a|b|c".to_string();
    let mock = MockInterpreter::spawn_with_config(config).await.unwrap();
    let (session, _registry) = open_session(&mock).await;

    mock.emit("suspended breakpoint 5").await.unwrap();
    wait_until("the thread snapshot is rebuilt", || session.has_threads()).await;
    assert!(session.is_suspended());
    assert_eq!(session.target_source_file(), "");
    assert_eq!(session.current_node(), 0);

    // Unparseable node index: the file segment is discarded along with it.
    let mut config = MockInterpreterConfig::default();
    config.source_reply = "demo/flock.sk|notanumber".to_string();
    let mock = MockInterpreter::spawn_with_config(config).await.unwrap();
    let (session, _registry) = open_session(&mock).await;

    mock.emit("suspended breakpoint 5").await.unwrap();
    wait_until("the thread snapshot is rebuilt", || session.has_threads()).await;
    assert_eq!(session.target_source_file(), "");
    assert_eq!(session.current_node(), 0);
}

#[tokio::test]
async fn breakpoint_resume_notifies_the_focus_thread() {
    let mock = MockInterpreter::spawn().await.unwrap();
    let (session, _registry) = open_session(&mock).await;
    let mut notices = session.subscribe();

    mock.emit("suspended breakpoint 5").await.unwrap();
    wait_until("the thread snapshot is rebuilt", || session.has_threads()).await;
    assert_eq!(
        next_notice(&mut notices).await,
        SessionNotice::ThreadSuspended {
            handle: 1,
            reason: StopReason::Breakpoint,
        }
    );

    mock.emit("resumed breakpoint").await.unwrap();
    assert_eq!(
        next_notice(&mut notices).await,
        SessionNotice::ThreadResumed {
            handle: 1,
            reason: StopReason::Breakpoint,
        }
    );
    assert!(!session.is_stepping());
    assert!(!session.is_suspended());
}

#[tokio::test]
async fn step_resume_marks_stepping_and_keeps_the_snapshot() {
    let mock = MockInterpreter::spawn().await.unwrap();
    let (session, _registry) = open_session(&mock).await;
    let mut notices = session.subscribe();

    mock.emit("suspended step").await.unwrap();
    wait_until("the thread snapshot is rebuilt", || session.has_threads()).await;
    assert_eq!(
        next_notice(&mut notices).await,
        SessionNotice::ThreadSuspended {
            handle: 1,
            reason: StopReason::Step,
        }
    );

    mock.emit("resumed step").await.unwrap();
    assert_eq!(
        next_notice(&mut notices).await,
        SessionNotice::ThreadResumed {
            handle: 1,
            reason: StopReason::Step,
        }
    );
    assert!(session.is_stepping());
    assert!(!session.is_suspended());
    // The snapshot is only rebuilt on suspension, never dropped on resume.
    assert!(session.has_threads());
}

#[tokio::test]
async fn plain_resume_clears_stepping_without_a_notice() {
    let mock = MockInterpreter::spawn().await.unwrap();
    let (session, _registry) = open_session(&mock).await;
    let mut notices = session.subscribe();

    mock.emit("suspended step").await.unwrap();
    wait_until("the thread snapshot is rebuilt", || session.has_threads()).await;
    mock.emit("resumed").await.unwrap();
    wait_until("the session resumes", || !session.is_suspended()).await;
    assert!(!session.is_stepping());

    mock.emit("terminated").await.unwrap();
    let seen = notices_until_terminated(&mut notices).await;
    assert_eq!(
        seen,
        vec![
            SessionNotice::ThreadSuspended {
                handle: 1,
                reason: StopReason::Step,
            },
            SessionNotice::Terminated,
        ]
    );
}

#[tokio::test]
async fn termination_is_absorbing() {
    let mock = MockInterpreter::spawn().await.unwrap();
    let (session, _registry) = open_session(&mock).await;
    let mut notices = session.subscribe();

    mock.emit("suspended breakpoint 5").await.unwrap();
    wait_until("the thread snapshot is rebuilt", || session.has_threads()).await;
    mock.emit("terminated").await.unwrap();
    wait_until("the session terminates", || session.is_terminated()).await;

    assert!(!session.is_suspended());
    assert!(!session.can_resume());
    assert!(!session.can_suspend());
    assert!(session.threads().is_empty());
    assert!(session.causing_breakpoint().is_none());

    // Anything arriving after termination is ignored. The client may have
    // dropped its end already, so the writes are allowed to fail.
    let _ = mock.emit("started").await;
    let _ = mock.emit("suspended breakpoint 5").await;

    let seen = notices_until_terminated(&mut notices).await;
    assert_eq!(
        seen,
        vec![
            SessionNotice::ThreadSuspended {
                handle: 1,
                reason: StopReason::Breakpoint,
            },
            SessionNotice::Terminated,
        ]
    );
    assert!(notices.try_recv().is_err());
    assert!(session.is_terminated());
    assert!(!session.has_threads());
}

#[tokio::test]
async fn event_channel_closure_terminates_the_session() {
    let mock = MockInterpreter::spawn().await.unwrap();
    let (session, _registry) = open_session(&mock).await;
    let mut notices = session.subscribe();

    mock.emit("started").await.unwrap();
    assert_eq!(next_notice(&mut notices).await, SessionNotice::Created);

    mock.close_event_channel().await;
    wait_until("the session terminates", || session.is_terminated()).await;
    assert_eq!(next_notice(&mut notices).await, SessionNotice::Terminated);
    assert!(notices.try_recv().is_err());
}

#[tokio::test]
async fn refused_connection_yields_an_inert_session() {
    let mock = MockInterpreter::refusing_both_ports().await.unwrap();
    let (session, _registry) = open_session(&mock).await;

    assert!(!session.is_connected());
    assert!(!session.is_terminated());
    assert!(!session.is_suspended());
    assert!(matches!(
        session.send_request("resume").await,
        Err(WireError::NotConnected)
    ));
}

#[tokio::test]
async fn refused_event_port_also_yields_an_inert_session() {
    let mock = MockInterpreter::spawn_request_only().await.unwrap();
    let (session, _registry) = open_session(&mock).await;

    assert!(!session.is_connected());
    assert!(matches!(
        session.resume().await,
        Err(WireError::NotConnected)
    ));
}

#[tokio::test]
async fn a_failed_request_does_not_terminate_the_session() {
    let mut config = MockInterpreterConfig::default();
    config.fail_request = Some("suspend".to_string());
    let mock = MockInterpreter::spawn_with_config(config).await.unwrap();
    let (session, _registry) = open_session(&mock).await;

    assert!(session.suspend().await.is_err());
    assert!(!session.is_terminated());
}

#[tokio::test]
async fn control_requests_use_the_wire_verbs() {
    let mock = MockInterpreter::spawn().await.unwrap();
    let (session, _registry) = open_session(&mock).await;

    session.resume().await.unwrap();
    session.step_into().await.unwrap();
    session.step_over().await.unwrap();
    session.step_out().await.unwrap();
    session.terminate().await.unwrap();

    assert_eq!(
        mock.requests(),
        vec!["resume", "step into", "step over", "step out", "exit"]
    );
}

struct FinishedProcess;

impl ProcessHandle for FinishedProcess {
    fn is_terminated(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn a_dead_process_marks_the_session_terminated() {
    let mock = MockInterpreter::spawn().await.unwrap();
    let session = Session::open(
        SessionConfig {
            wire: mock.wire_config(),
            program: PathBuf::from(PROGRAM),
        },
        BreakpointRegistry::new(),
        Some(Arc::new(FinishedProcess)),
    )
    .await
    .unwrap();

    assert!(session.is_terminated());
    assert!(!session.can_terminate());
    assert!(!session.can_resume());
}
