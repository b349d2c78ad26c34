//! Drives real helper processes written as small shell scripts.
#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use pl_bridge::{BridgeError, HelperProcess, StdioProvider};
use pl_domain::config::BridgeConfig;
use pl_sessions::{EventSink, HandleEvent, HandleSpec, SessionProvider};

fn shell(script: &str, timeout_secs: u64) -> BridgeConfig {
    BridgeConfig {
        command: "sh".into(),
        args: vec!["-c".into(), script.into(), "helper".into()],
        request_timeout_secs: timeout_secs,
        ..Default::default()
    }
}

#[tokio::test]
async fn events_are_forwarded_and_exit_reports_disconnect() {
    let script = r#"
echo 'starting up'
echo '{"event":{"kind":"pairing_challenge","data":"qr-1"}}'
echo '{"event":{"kind":"authenticated"}}'
"#;
    let (sink, mut rx) = EventSink::channel("alpha", 1);
    let _process = HelperProcess::spawn(&shell(script, 5), "alpha", Path::new("/tmp"), sink).unwrap();

    let mut seen = Vec::new();
    while let Ok(Some(envelope)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        assert_eq!(envelope.session_key, "alpha");
        assert_eq!(envelope.instance, 1);
        let done = matches!(envelope.event, HandleEvent::Disconnected(_));
        seen.push(envelope.event);
        if done {
            break;
        }
    }

    assert_eq!(seen[0], HandleEvent::PairingChallenge("qr-1".into()));
    assert_eq!(seen[1], HandleEvent::Authenticated);
    assert!(matches!(seen[2], HandleEvent::Disconnected(_)));
}

#[tokio::test]
async fn requests_are_matched_by_id() {
    // Answers every request with its own id, reporting the op it saw.
    let script = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  echo "{\"id\":$id,\"result\":{\"canonical\":\"peer@c.us\"}}"
done
"#;
    let (sink, _rx) = EventSink::channel("alpha", 1);
    let process = HelperProcess::spawn(&shell(script, 5), "alpha", Path::new("/tmp"), sink).unwrap();

    let value = process
        .request(pl_bridge::protocol::BridgeOp::ResolveTarget {
            address: "1555".into(),
        })
        .await
        .unwrap();
    assert_eq!(value["canonical"], "peer@c.us");
    assert!(process.is_alive());
}

#[tokio::test]
async fn helper_errors_are_surfaced() {
    let script = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  echo "{\"id\":$id,\"error\":\"not logged in\"}"
done
"#;
    let (sink, _rx) = EventSink::channel("alpha", 1);
    let process = HelperProcess::spawn(&shell(script, 5), "alpha", Path::new("/tmp"), sink).unwrap();

    let err = process
        .request(pl_bridge::protocol::BridgeOp::Initialize)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Remote { op: "initialize", ref message } if message == "not logged in"));
}

#[tokio::test]
async fn silent_helper_times_out() {
    let (sink, _rx) = EventSink::channel("alpha", 1);
    let process =
        HelperProcess::spawn(&shell("sleep 30", 1), "alpha", Path::new("/tmp"), sink).unwrap();
    let err = process
        .request(pl_bridge::protocol::BridgeOp::ConnectionState)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Timeout("connection_state")));
}

#[tokio::test]
async fn unconfigured_provider_fails_to_connect() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = StdioProvider::new(BridgeConfig::default());
    let (sink, _rx) = EventSink::channel("alpha", 1);
    let spec = HandleSpec {
        session_key: "alpha".into(),
        data_dir: tmp.path().join("session-alpha"),
    };
    let err = match provider.connect(spec, sink).await {
        Ok(_) => panic!("connect should fail without a command"),
        Err(e) => e,
    };
    assert!(err.message.contains("no bridge command"));
    assert!(tmp.path().join("session-alpha").is_dir());
}
