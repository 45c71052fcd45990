//! Session handling and streaming scan submission against a scripted server.

mod common;

use std::fs;

use common::*;
use sastbridge::client::envelope::ProjectSettings;
use sastbridge::client::submit::{ArchivePayload, ScanOptions};
use sastbridge::client::ClientError;
use tempfile::TempDir;

const PAYLOAD: &str = "UEsDBBQACAAIAAAAIQAAAAAAAAAAAAAAAAAIAAAAYS9iLmphdmE=";

fn project() -> ProjectSettings {
    ProjectSettings {
        project_name: "Payments & Billing".to_string(),
        preset_id: 36,
        team_id: "00000000-1111-1111-b111-989c9070eb11".to_string(),
        scan_configuration_id: 1,
        description: String::new(),
    }
}

fn payload_file(dir: &TempDir) -> ArchivePayload {
    let path = dir.path().join("src.zip.b64");
    fs::write(&path, PAYLOAD).unwrap();
    ArchivePayload::new(path, PAYLOAD.len() as u64)
}

#[test]
fn test_resolve_and_login() {
    let transport = ScriptedTransport::new([resolved(), logged_in_as("token-1")]);
    let client = client(&transport);

    let endpoint = client.resolve(SERVER_URL).unwrap();
    assert_eq!(endpoint.as_str(), SERVICE_URL);
    let session = client.login(endpoint, credentials()).unwrap();
    assert_eq!(session.token().unwrap(), "token-1");

    let requests = transport.requests();
    assert_eq!(
        requests[0].endpoint,
        "https://sast.example.com/cxwebinterface/cxwsresolver.asmx"
    );
    assert_eq!(requests[0].soap_action, "http://Checkmarx.com/GetWebServiceUrl");
    assert_eq!(requests[1].soap_action, "http://Checkmarx.com/v7/Login");
    assert!(requests[1].body_text().contains("<User>builder</User>"));
    assert!(requests[1].body_text().contains("<lcid>1033</lcid>"));
}

#[test]
fn test_login_refused() {
    let transport = ScriptedTransport::new([failure("Invalid user name or password")]);
    let err = client(&transport)
        .login(service_url(), credentials())
        .unwrap_err();
    match err {
        ClientError::AuthenticationFailed { server_message } => {
            assert_eq!(server_message, "Invalid user name or password");
        }
        other => panic!("expected AuthenticationFailed, got {other:?}"),
    }
}

#[test]
fn test_resolver_failure_is_reported() {
    let transport = ScriptedTransport::new([failure("Unsupported client version")]);
    let err = client(&transport).resolve(SERVER_URL).unwrap_err();
    assert!(err.to_string().contains("Unsupported client version"));
}

#[test]
fn test_submit_streams_archive_inside_envelope() {
    let dir = TempDir::new().unwrap();
    let payload = payload_file(&dir);
    let transport = ScriptedTransport::new([logged_in_as("token-1"), scan_started("run-7")]);
    let client = client(&transport);
    let mut session = logged_in(&client);

    let options = ScanOptions {
        is_incremental: true,
        is_private: false,
        comment: "nightly <main>".to_string(),
    };
    let handle = client.submit(&mut session, &project(), &options, &payload).unwrap();
    assert_eq!(handle.run_id, "run-7");

    let scan = &transport.requests()[1];
    assert_eq!(scan.operation(), "Scan");
    assert_eq!(scan.declared_length, scan.body.len() as u64);

    let body = scan.body_text();
    assert!(body.contains(&format!("<ZippedFile>{PAYLOAD}</ZippedFile>")));
    assert!(body.contains("<sessionId>token-1</sessionId>"));
    assert!(body.contains("<ProjectName>Payments &amp; Billing</ProjectName>"));
    assert!(body.contains("<Comment>nightly &lt;main&gt;</Comment>"));
    assert!(body.contains("<IsIncremental>true</IsIncremental>"));
    assert!(body.contains("<FileName>src.zip</FileName>"));
    assert!(body.ends_with("</soap:Envelope>"));
}

#[test]
fn test_submit_retries_transport_failures() {
    let dir = TempDir::new().unwrap();
    let payload = payload_file(&dir);
    let transport = ScriptedTransport::new([
        logged_in_as("token-1"),
        connection_refused(),
        scan_started("run-8"),
    ]);
    let client = client(&transport);
    let mut session = logged_in(&client);

    let handle = client
        .submit(&mut session, &project(), &ScanOptions::default(), &payload)
        .unwrap();
    assert_eq!(handle.run_id, "run-8");

    // The whole archive is sent again on the second attempt
    let requests = transport.requests();
    assert_eq!(requests[1].body, requests[2].body);
}

#[test]
fn test_submit_exhaustion_keeps_last_failure() {
    let dir = TempDir::new().unwrap();
    let payload = payload_file(&dir);
    let transport = ScriptedTransport::new([
        logged_in_as("token-1"),
        connection_refused(),
        connection_refused(),
        connection_refused(),
    ]);
    let client = client(&transport);
    let mut session = logged_in(&client);

    let err = client
        .submit(&mut session, &project(), &ScanOptions::default(), &payload)
        .unwrap_err();
    match err {
        ClientError::RetriesExhausted { attempts, last, .. } => {
            assert_eq!(attempts, 3);
            assert!(last.to_string().contains("connection refused"));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(transport.operations(), ["Login", "Scan", "Scan", "Scan"]);
}

#[test]
fn test_submit_rejection_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let payload = payload_file(&dir);
    let transport = ScriptedTransport::new([
        logged_in_as("token-1"),
        failure("Project name is not valid"),
    ]);
    let client = client(&transport);
    let mut session = logged_in(&client);

    let err = client
        .submit(&mut session, &project(), &ScanOptions::default(), &payload)
        .unwrap_err();
    assert!(matches!(err, ClientError::Rejected { .. }));
    assert!(err.to_string().contains("Project name is not valid"));
    assert_eq!(transport.operations(), ["Login", "Scan"]);
}

#[test]
fn test_expired_session_is_renewed_once() {
    let dir = TempDir::new().unwrap();
    let payload = payload_file(&dir);
    let transport = ScriptedTransport::new([
        logged_in_as("token-1"),
        failure("Unauthorized"),
        logged_in_as("token-2"),
        scan_started("run-9"),
    ]);
    let client = client(&transport);
    let mut session = logged_in(&client);

    let handle = client
        .submit(&mut session, &project(), &ScanOptions::default(), &payload)
        .unwrap();
    assert_eq!(handle.run_id, "run-9");
    assert_eq!(session.token().unwrap(), "token-2");

    let requests = transport.requests();
    assert_eq!(transport.operations(), ["Login", "Scan", "Login", "Scan"]);
    assert!(requests[3].body_text().contains("<sessionId>token-2</sessionId>"));
}

#[test]
fn test_expired_session_fault_is_recognized() {
    let dir = TempDir::new().unwrap();
    let payload = payload_file(&dir);
    let transport = ScriptedTransport::new([
        logged_in_as("token-1"),
        fault("Session expired"),
        logged_in_as("token-2"),
        scan_started("run-10"),
    ]);
    let client = client(&transport);
    let mut session = logged_in(&client);

    let handle = client
        .submit(&mut session, &project(), &ScanOptions::default(), &payload)
        .unwrap();
    assert_eq!(handle.run_id, "run-10");
}

#[test]
fn test_missing_archive_file() {
    let dir = TempDir::new().unwrap();
    let payload = ArchivePayload::new(dir.path().join("missing.b64"), 10);
    let transport = ScriptedTransport::new([logged_in_as("token-1")]);
    let client = client(&transport);
    let mut session = logged_in(&client);

    let err = client
        .submit(&mut session, &project(), &ScanOptions::default(), &payload)
        .unwrap_err();
    assert!(matches!(err, ClientError::ArchiveRead { .. }));
    assert_eq!(transport.operations(), ["Login"]);
}
