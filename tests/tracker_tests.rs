//! Scan status tracking against a scripted server.

mod common;

use std::time::Duration;

use common::*;
use sastbridge::client::submit::ScanRunHandle;
use sastbridge::client::transport::TransportError;
use sastbridge::client::tracker::{ScanTracker, TrackOutcome};
use sastbridge::client::{ClientError, ServiceClient};
use sastbridge::signal::ShutdownHandler;

fn handle() -> ScanRunHandle {
    ScanRunHandle {
        run_id: "run-1".to_string(),
    }
}

fn track(transport: &ScriptedTransport) -> Result<TrackOutcome, ClientError> {
    let client = client(transport);
    let mut session = logged_in(&client);
    ScanTracker::new(&client).track(&mut session, &handle())
}

#[test]
fn test_tracks_until_finished() {
    let transport = ScriptedTransport::new([
        logged_in_as("token-1"),
        status("Queued", "<QueuePosition>3</QueuePosition>"),
        status(
            "Working",
            "<StageMessage>Parsing</StageMessage><TotalPercent>20</TotalPercent><LOC>15230</LOC>",
        ),
        status(
            "Working",
            "<StageMessage>Querying</StageMessage><TotalPercent>70</TotalPercent><LOC>15230</LOC>",
        ),
        finished(42),
    ]);

    let outcome = track(&transport).unwrap();
    assert_eq!(outcome, TrackOutcome::Completed { scan_id: 42 });
    assert_eq!(
        transport.operations(),
        [
            "Login",
            "GetStatusOfSingleScan",
            "GetStatusOfSingleScan",
            "GetStatusOfSingleScan",
            "GetStatusOfSingleScan"
        ]
    );
    assert!(transport.requests()[1]
        .body_text()
        .contains("<RunId>run-1</RunId>"));
}

#[test]
fn test_abnormal_states_end_tracking() {
    for state in ["Failed", "Deleted", "Unknown", "Canceled"] {
        let transport = ScriptedTransport::new([
            logged_in_as("token-1"),
            status("Working", "<StageMessage>Parsing</StageMessage>"),
            status(state, "<StageMessage>Engine stopped</StageMessage>"),
            finished(1),
        ]);

        let err = track(&transport).unwrap_err();
        match err {
            ClientError::ScanTerminatedAbnormally {
                state: reported,
                stage_message,
                run_id,
                scan_id,
            } => {
                assert_eq!(reported, state);
                assert_eq!(stage_message, "Engine stopped");
                assert_eq!(run_id, "run-1");
                assert_eq!(scan_id, None);
            }
            other => panic!("expected ScanTerminatedAbnormally for {state}, got {other:?}"),
        }
        // Polling stopped at the terminal state
        assert_eq!(transport.remaining(), 1);
    }
}

#[test]
fn test_stage_name_is_reported_as_state() {
    let transport = ScriptedTransport::new([
        logged_in_as("token-1"),
        status(
            "Failed",
            "<StageName>Failed</StageName><StageMessage>Out of memory</StageMessage><ScanId>77</ScanId>",
        ),
    ]);
    let err = track(&transport).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Scan Failed (run id run-1, scan id 77): Out of memory"
    );
}

#[test]
fn test_failed_polls_draw_from_shared_credits() {
    let transport = ScriptedTransport::new([
        logged_in_as("token-1"),
        connection_refused(),
        status("Working", ""),
        connection_refused(),
        status("Exploding", ""),
        finished(5),
    ]);
    assert_eq!(track(&transport).unwrap(), TrackOutcome::Completed { scan_id: 5 });
}

#[test]
fn test_credits_run_out() {
    let transport = ScriptedTransport::new([
        logged_in_as("token-1"),
        connection_refused(),
        status("Working", ""),
        connection_refused(),
        connection_refused(),
        connection_refused(),
        finished(5),
    ]);

    let err = track(&transport).unwrap_err();
    match err {
        ClientError::RetriesExhausted {
            operation,
            attempts,
            last,
        } => {
            assert_eq!(operation, "Scan status polling");
            assert_eq!(attempts, 5);
            assert!(last.to_string().contains("connection refused"));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[test]
fn test_proxy_challenge_ends_tracking_at_once() {
    let transport = ScriptedTransport::new([
        logged_in_as("token-1"),
        Reply::Fail(TransportError::AuthenticationRequired {
            endpoint: SERVICE_URL.to_string(),
            status: 407,
        }),
        status("Working", ""),
        finished(5),
    ]);

    let err = track(&transport).unwrap_err();
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::AuthenticationRequired { status: 407, .. })
    ));
    assert_eq!(transport.remaining(), 2);
}

#[test]
fn test_server_refusals_draw_credits() {
    let transport = ScriptedTransport::new([
        logged_in_as("token-1"),
        failure("Scan run not found yet"),
        finished(6),
    ]);
    assert_eq!(track(&transport).unwrap(), TrackOutcome::Completed { scan_id: 6 });
}

#[test]
fn test_expired_session_does_not_use_credits() {
    let mut settings = fast_settings();
    settings.poll_retries = 0;
    let transport = ScriptedTransport::new([
        logged_in_as("token-1"),
        failure("Invalid session"),
        logged_in_as("token-2"),
        finished(9),
    ]);
    let client = ServiceClient::new(&transport, settings, ShutdownHandler::new());
    let mut session = logged_in(&client);

    let outcome = ScanTracker::new(&client).track(&mut session, &handle()).unwrap();
    assert_eq!(outcome, TrackOutcome::Completed { scan_id: 9 });
    assert_eq!(session.token().unwrap(), "token-2");
}

#[test]
fn test_timeout_leaves_scan_running() {
    let mut settings = fast_settings();
    settings.scan_poll_interval = Duration::from_millis(20);
    settings.scan_timeout = Some(Duration::from_millis(1));
    let transport = ScriptedTransport::new([logged_in_as("token-1")]);
    let client = ServiceClient::new(&transport, settings, ShutdownHandler::new());
    let mut session = logged_in(&client);

    let outcome = ScanTracker::new(&client).track(&mut session, &handle()).unwrap();
    assert!(matches!(outcome, TrackOutcome::TimedOut { .. }));
    // No status call and no cancel request
    assert_eq!(transport.operations(), ["Login"]);
}

#[test]
fn test_interruption_cancels_scan() {
    let shutdown = ShutdownHandler::new();
    let transport = ScriptedTransport::new([
        logged_in_as("token-1"),
        Reply::InterruptThen(shutdown.clone(), status("Working", "").into_body()),
        success(""),
    ]);
    let client = ServiceClient::new(&transport, fast_settings(), shutdown);
    let mut session = logged_in(&client);

    let err = ScanTracker::new(&client)
        .track(&mut session, &handle())
        .unwrap_err();
    assert!(err.is_interrupted());
    assert_eq!(
        transport.operations(),
        ["Login", "GetStatusOfSingleScan", "CancelScan"]
    );
    assert!(transport.requests()[2]
        .body_text()
        .contains("<RunId>run-1</RunId>"));
}
