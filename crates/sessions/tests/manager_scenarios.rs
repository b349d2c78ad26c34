mod support;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;

use pl_sessions::{
    mint_session_key, HandleEvent, MessageContent, OutboundMessage, PairingOutcome,
    SessionError, SessionState, StatusKind, MAX_BULK_MESSAGES,
};
use support::{config, make_ready, settle, start, RecordingNotifier, ScriptedProvider, Script};

fn challenge_in(secs: u64) -> Script {
    Script {
        challenge_after: Some(Duration::from_secs(secs)),
        ..Default::default()
    }
}

// ── Initialization ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn concurrent_acquires_share_one_creation() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script {
        connect_delay: Duration::from_millis(200),
        ..Default::default()
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(4, tmp.path()), &provider, &notifier);

    let leases = join_all((0..5).map(|_| manager.acquire("alpha"))).await;
    let instances: Vec<_> = leases.into_iter().map(|l| l.unwrap().instance()).collect();

    assert!(instances.iter().all(|i| *i == instances[0]));
    assert_eq!(provider.connects("alpha"), 1);
    assert_eq!(manager.status("alpha").state, Some(SessionState::PairingPending));
}

#[tokio::test(start_paused = true)]
async fn failed_creation_is_shared_then_retried_after_grace() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script {
        fail_connect: true,
        connect_delay: Duration::from_millis(50),
        ..Default::default()
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(4, tmp.path()), &provider, &notifier);

    let (a, b) = tokio::join!(manager.acquire("alpha"), manager.acquire("alpha"));
    assert!(matches!(a, Err(SessionError::Provider { .. })));
    assert!(matches!(b, Err(SessionError::Provider { .. })));
    assert_eq!(provider.attempts(), 1);
    assert_eq!(manager.status("alpha").status, StatusKind::NotInitialized);

    // Inside the grace window the cached failure is served again.
    assert!(manager.acquire("alpha").await.is_err());
    assert_eq!(provider.attempts(), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    provider.set_script(|s| s.fail_connect = false);
    manager.acquire("alpha").await.unwrap();
    assert_eq!(provider.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_initialize_leaves_no_entry_and_destroys_handle() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script {
        fail_initialize: true,
        ..Default::default()
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(1, tmp.path()), &provider, &notifier);

    let err = manager.acquire("alpha").await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(provider.destroyed_keys(), ["alpha"]);
    let stats = manager.stats();
    assert_eq!(stats.live_sessions, 0);
    assert_eq!(stats.available_slots, 1);
}

#[tokio::test(start_paused = true)]
async fn invalid_keys_are_rejected_before_the_provider() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(1, tmp.path()), &provider, &notifier);

    let err = manager.acquire("../escape").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidKey { .. }));
    assert_eq!(provider.attempts(), 0);
}

// ── Capacity ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn third_session_evicts_least_recent_at_capacity_two() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    manager.acquire("a").await.unwrap();
    make_ready(&provider, "a").await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    manager.acquire("b").await.unwrap();
    make_ready(&provider, "b").await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    manager.acquire("c").await.unwrap();

    assert_eq!(provider.destroyed_keys(), ["a"]);
    assert_eq!(manager.status("a").status, StatusKind::NotInitialized);
    let live: Vec<_> = manager.list_sessions().into_iter().map(|s| s.session_key).collect();
    assert_eq!(live, ["c", "b"]);
    assert_eq!(manager.stats().available_slots, 0);

    let err = manager
        .send("a", "1555", &OutboundMessage::text("still there?"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::SessionNotFound(ref key) if key == "a"));
    manager
        .send("b", "1555", &OutboundMessage::text("hello"))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn recent_activity_protects_from_eviction() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    manager.acquire("a").await.unwrap();
    make_ready(&provider, "a").await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    manager.acquire("b").await.unwrap();
    make_ready(&provider, "b").await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    manager
        .send("a", "15550001", &OutboundMessage::text("ping"))
        .await
        .unwrap();
    manager.acquire("c").await.unwrap();

    assert_eq!(provider.destroyed_keys(), ["b"]);
    assert!(manager.status("a").ready);
}

#[tokio::test(start_paused = true)]
async fn live_handles_never_exceed_capacity() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script {
        connect_delay: Duration::from_millis(30),
        init_delay: Duration::from_millis(30),
        ..Default::default()
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(3, tmp.path()), &provider, &notifier);

    let keys: Vec<String> = (0..10).map(|i| format!("k{i}")).collect();
    join_all(keys.iter().map(|k| manager.acquire(k))).await;

    assert!(provider.peak_live() <= 3, "peak {}", provider.peak_live());
    let stats = manager.stats();
    assert!(stats.live_sessions <= 3);
    assert_eq!(stats.live_sessions, stats.recency_len);
    assert_eq!(
        provider.total_connects() - provider.destroyed().len(),
        stats.live_sessions
    );
}

#[tokio::test(start_paused = true)]
async fn destroy_failure_still_frees_the_slot() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script {
        fail_destroy: true,
        ..Default::default()
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(1, tmp.path()), &provider, &notifier);

    manager.acquire("a").await.unwrap();
    manager.acquire("b").await.unwrap();

    assert_eq!(provider.destroyed_keys(), ["a"]);
    assert_eq!(manager.stats().live_sessions, 1);
    assert_eq!(manager.status("b").state, Some(SessionState::PairingPending));
}

// ── Pairing ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn concurrent_pairing_requests_get_the_same_challenge() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(challenge_in(5));
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    let (a, b) = tokio::join!(
        manager.request_pairing("alpha", None),
        manager.request_pairing("alpha", None)
    );
    let expected = PairingOutcome::Challenge {
        session_key: "alpha".into(),
        challenge: "qr:alpha:1".into(),
    };
    assert_eq!(a.unwrap(), expected);
    assert_eq!(b.unwrap(), expected);
    assert_eq!(provider.connects("alpha"), 1);
    assert_eq!(manager.status("alpha").status, StatusKind::ChallengeReady);
}

#[tokio::test(start_paused = true)]
async fn pairing_times_out_and_late_challenge_is_served_next_time() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(challenge_in(31));
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    let started = Instant::now();
    let err = manager.request_pairing("alpha", None).await.unwrap_err();
    assert!(matches!(err, SessionError::HandshakeTimeout { waited_secs: 30, .. }));
    assert!(err.is_retryable());
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(30) && waited < Duration::from_secs(31));

    tokio::time::sleep(Duration::from_secs(2)).await;
    let outcome = manager.request_pairing("alpha", None).await.unwrap();
    assert!(matches!(outcome, PairingOutcome::Challenge { ref challenge, .. } if challenge == "qr:alpha:1"));
    assert_eq!(provider.connects("alpha"), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_after_timeout_keeps_waiting_on_the_same_handle() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(challenge_in(40));
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    assert!(manager.request_pairing("alpha", None).await.is_err());
    let outcome = manager.request_pairing("alpha", None).await.unwrap();
    assert_eq!(outcome.session_key(), "alpha");
    assert_eq!(provider.connects("alpha"), 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_challenge_on_one_handle_is_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(challenge_in(1));
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    manager.request_pairing("alpha", None).await.unwrap();
    provider.emit("alpha", HandleEvent::PairingChallenge("qr:second".into()));
    settle().await;

    let outcome = manager.request_pairing("alpha", None).await.unwrap();
    assert!(matches!(outcome, PairingOutcome::Challenge { ref challenge, .. } if challenge == "qr:alpha:1"));
}

#[tokio::test(start_paused = true)]
async fn auth_failure_resets_for_a_fresh_challenge() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(challenge_in(1));
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    manager.request_pairing("alpha", None).await.unwrap();
    provider.emit("alpha", HandleEvent::AuthFailure("scan rejected".into()));
    settle().await;
    let status = manager.status("alpha");
    assert_eq!(status.status, StatusKind::Waiting);
    assert!(!status.has_challenge);

    provider.emit("alpha", HandleEvent::PairingChallenge("qr:retry".into()));
    settle().await;
    let outcome = manager.request_pairing("alpha", None).await.unwrap();
    assert!(matches!(outcome, PairingOutcome::Challenge { ref challenge, .. } if challenge == "qr:retry"));
    assert_eq!(provider.connects("alpha"), 1);
}

#[tokio::test(start_paused = true)]
async fn eviction_aborts_a_pending_pairing_wait() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(1, tmp.path()), &provider, &notifier);

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.request_pairing("alpha", None).await })
    };
    settle().await;
    manager.acquire("beta").await.unwrap();

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::PairingAborted(ref k) if k == "alpha"));
    assert_eq!(provider.destroyed_keys(), ["alpha"]);
}

// ── Authentication, notification and sending ───────────────────────

#[tokio::test(start_paused = true)]
async fn consumed_challenge_notifies_and_enables_sending() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(challenge_in(1));
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    manager.request_pairing("alpha", Some("owner-1")).await.unwrap();
    settle().await;
    assert_eq!(
        *notifier.associations.lock(),
        vec![("owner-1".to_string(), "alpha".to_string())]
    );

    provider.emit("alpha", HandleEvent::Authenticated);
    settle().await;
    assert_eq!(
        *notifier.connected.lock(),
        vec![("alpha".to_string(), Some("owner-1".to_string()))]
    );
    assert!(manager.status("alpha").authenticated);
    assert!(!manager.status("alpha").ready);

    provider.emit("alpha", HandleEvent::Ready);
    settle().await;
    assert_eq!(
        manager.request_pairing("alpha", None).await.unwrap(),
        PairingOutcome::AlreadyReady {
            session_key: "alpha".into()
        }
    );
    assert_eq!(manager.connected_senders(), ["alpha"]);

    let report = manager
        .send("alpha", "15550001", &OutboundMessage::text("hello"))
        .await
        .unwrap();
    assert_eq!(report.resolved_target, "15550001@c.us");
    assert_eq!(report.deliveries.len(), 1);
    let sent = provider.sent();
    assert_eq!(sent[0].1, "15550001@c.us");
    assert_eq!(sent[0].2, MessageContent::Text("hello".into()));
    assert_eq!(notifier.connected.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn restored_session_is_not_billed() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    manager.acquire("alpha").await.unwrap();
    make_ready(&provider, "alpha").await;
    assert!(manager.status("alpha").ready);
    assert!(notifier.connected.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn notifier_failure_does_not_affect_the_session() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(challenge_in(1));
    let notifier = RecordingNotifier::failing();
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    manager.request_pairing("alpha", Some("owner-1")).await.unwrap();
    make_ready(&provider, "alpha").await;

    assert_eq!(notifier.connected.lock().len(), 1);
    assert!(manager.status("alpha").ready);
    assert_eq!(manager.status("alpha").owner_id.as_deref(), Some("owner-1"));
}

#[tokio::test(start_paused = true)]
async fn send_needs_a_ready_session() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);
    let msg = OutboundMessage::text("hi");

    let err = manager.send("alpha", "1555", &msg).await.unwrap_err();
    assert!(matches!(err, SessionError::SessionNotFound(_)));
    assert_eq!(provider.attempts(), 0);

    manager.acquire("alpha").await.unwrap();
    let err = manager.send("alpha", "1555", &msg).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::NotAuthenticated {
            state: SessionState::PairingPending,
            ..
        }
    ));
    assert!(!err.is_retryable());
    assert!(provider.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unregistered_target_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script {
        unregistered: vec!["000".into()],
        ..Default::default()
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);
    manager.acquire("alpha").await.unwrap();
    make_ready(&provider, "alpha").await;

    let err = manager
        .send("alpha", "000", &OutboundMessage::text("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::TargetNotRegistered(ref t) if t == "000"));
    assert!(provider.sent().is_empty());

    let err = manager
        .send("alpha", "1555", &OutboundMessage::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::EmptyMessage));
}

#[tokio::test(start_paused = true)]
async fn queued_sends_for_one_owner_all_complete() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);
    manager.acquire("alpha").await.unwrap();
    make_ready(&provider, "alpha").await;

    let sends: Vec<_> = (0..5)
        .map(|i| {
            manager.send_queued(
                "owner-1",
                "alpha",
                "1555",
                OutboundMessage::text(format!("msg {i}")),
            )
        })
        .collect();
    for report in join_all(sends).await {
        report.unwrap();
    }
    assert_eq!(provider.sent().len(), 5);
    settle().await;
    assert_eq!(manager.stats().active_owner_queues, 0);
}

#[tokio::test(start_paused = true)]
async fn bulk_send_reports_each_message() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script {
        unregistered: vec!["000".into()],
        ..Default::default()
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);
    manager.acquire("alpha").await.unwrap();
    make_ready(&provider, "alpha").await;

    let messages = vec![
        ("1555".to_string(), OutboundMessage::text("one")),
        ("000".to_string(), OutboundMessage::text("two")),
        ("1666".to_string(), OutboundMessage::text("three")),
        ("1777".to_string(), OutboundMessage::default()),
    ];
    let report = manager.send_bulk("owner-1", "alpha", messages).await.unwrap();

    assert_eq!(report.total, 4);
    assert_eq!(report.successful, 2);
    assert_eq!(report.failed, 2);
    let targets: Vec<_> = report.results.iter().map(|r| r.target.as_str()).collect();
    assert_eq!(targets, ["1555", "000", "1666", "1777"]);
    assert!(report.results[0].is_sent());
    assert!(matches!(
        report.results[1].result,
        Err(SessionError::TargetNotRegistered(ref t)) if t == "000"
    ));
    assert!(matches!(
        report.results[3].result,
        Err(SessionError::EmptyMessage)
    ));

    let mut delivered: Vec<_> = provider.sent().into_iter().map(|(_, to, _, _)| to).collect();
    delivered.sort();
    assert_eq!(delivered, ["1555@c.us", "1666@c.us"]);
}

#[tokio::test(start_paused = true)]
async fn bulk_send_rejects_empty_and_oversized_batches() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    let err = manager.send_bulk("owner-1", "alpha", Vec::new()).await.unwrap_err();
    assert!(matches!(err, SessionError::EmptyBatch));

    let too_many: Vec<_> = (0..=MAX_BULK_MESSAGES)
        .map(|i| (format!("1{i:04}"), OutboundMessage::text("hi")))
        .collect();
    let err = manager.send_bulk("owner-1", "alpha", too_many).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::BatchTooLarge { count, max } if count == MAX_BULK_MESSAGES + 1 && max == MAX_BULK_MESSAGES
    ));
    assert!(provider.sent().is_empty());
    assert_eq!(manager.stats().active_owner_queues, 0);
}

#[tokio::test(start_paused = true)]
async fn owner_queue_stats_show_waiting_work() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);
    let key = mint_session_key("42").unwrap();
    manager.acquire(&key).await.unwrap();

    let (gates, ops): (Vec<_>, Vec<_>) = (0..5)
        .map(|_| {
            let (tx, rx) = tokio::sync::oneshot::channel::<()>();
            (tx, manager.run_for_owner("42", async move { rx.await.is_ok() }))
        })
        .unzip();
    settle().await;

    let stats = manager.owner_queue_stats("42");
    assert_eq!(stats.owner_id, "42");
    assert_eq!(stats.pending, 2);
    let keys: Vec<_> = stats.sessions.iter().map(|s| s.session_key.as_str()).collect();
    assert_eq!(keys, [key.as_str()]);
    assert_eq!(manager.owner_queue_stats("7").pending, 0);

    for gate in gates {
        gate.send(()).unwrap();
    }
    assert!(join_all(ops).await.into_iter().all(|r| r.unwrap()));
    settle().await;
    assert_eq!(manager.owner_queue_stats("42").pending, 0);
}

// ── Disconnects and replacement ─────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn disconnected_session_is_replaced_and_old_events_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    let first = manager.acquire("alpha").await.unwrap();
    make_ready(&provider, "alpha").await;
    provider.emit("alpha", HandleEvent::Disconnected("logged out".into()));
    settle().await;
    assert_eq!(manager.status("alpha").status, StatusKind::Disconnected);
    assert!(manager.connected_senders().is_empty());

    // Past the init grace window, so the shared result is gone.
    tokio::time::sleep(Duration::from_secs(3)).await;
    let second = manager.acquire("alpha").await.unwrap();
    assert_ne!(first.instance(), second.instance());
    assert_eq!(provider.connects("alpha"), 2);
    assert_eq!(provider.destroyed(), vec![("alpha".to_string(), first.instance())]);

    provider.emit_from("alpha", first.instance(), HandleEvent::Ready);
    settle().await;
    assert_eq!(manager.status("alpha").state, Some(SessionState::PairingPending));
}

#[tokio::test(start_paused = true)]
async fn explicit_disconnect_removes_the_session() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    manager.acquire("alpha").await.unwrap();
    assert!(manager.disconnect("alpha").await);
    assert!(!manager.disconnect("alpha").await);
    assert_eq!(provider.destroyed_keys(), ["alpha"]);

    // The grace marker went with it, so a new acquire opens a new handle.
    manager.acquire("alpha").await.unwrap();
    assert_eq!(provider.connects("alpha"), 2);
}

#[tokio::test(start_paused = true)]
async fn watchers_follow_the_handshake_until_the_handle_leaves() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    assert!(manager.watch("alpha").is_none());
    manager.acquire("alpha").await.unwrap();
    let mut rx = manager.watch("alpha").unwrap();

    make_ready(&provider, "alpha").await;
    let view = rx
        .wait_for(|v| v.state == SessionState::Ready)
        .await
        .unwrap()
        .clone();
    assert_eq!(view.challenge, None);

    assert!(manager.disconnect("alpha").await);
    assert!(rx.changed().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn disconnect_right_after_creation_is_not_served_from_the_grace_window() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    let first = manager.acquire("alpha").await.unwrap();
    assert!(provider.emit("alpha", HandleEvent::Disconnected("conflict".into())));
    settle().await;

    // Well inside the init grace window.
    let second = manager.acquire("alpha").await.unwrap();
    assert_ne!(first.instance(), second.instance());
    assert_eq!(provider.connects("alpha"), 2);
    assert_eq!(provider.destroyed(), [("alpha".to_string(), first.instance())]);
    assert_eq!(manager.status("alpha").state, Some(SessionState::PairingPending));
}

#[tokio::test(start_paused = true)]
async fn grace_window_still_shares_a_healthy_creation() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    let first = manager.acquire("alpha").await.unwrap();
    settle().await;
    let second = manager.acquire("alpha").await.unwrap();
    assert_eq!(first.instance(), second.instance());
    assert_eq!(provider.connects("alpha"), 1);
}

// ── Health sweeper ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn idle_sessions_are_swept() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut cfg = config(4, tmp.path());
    cfg.sessions.staleness_secs = 60;
    cfg.sessions.sweep_interval_secs = 10;
    let manager = start(&cfg, &provider, &notifier);

    manager.acquire("old").await.unwrap();
    make_ready(&provider, "old").await;
    tokio::time::sleep(Duration::from_secs(40)).await;
    manager.acquire("fresh").await.unwrap();
    tokio::time::sleep(Duration::from_secs(35)).await;

    assert_eq!(provider.destroyed_keys(), ["old"]);
    assert_eq!(manager.status("old").status, StatusKind::NotInitialized);
    assert_eq!(manager.status("fresh").status, StatusKind::Waiting);
    assert_eq!(manager.stats().recency_len, 1);
}

#[tokio::test(start_paused = true)]
async fn stale_entry_is_replaced_on_acquire() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut cfg = config(4, tmp.path());
    cfg.sessions.staleness_secs = 60;
    cfg.sessions.sweep_interval_secs = 3600;
    let manager = start(&cfg, &provider, &notifier);

    manager.acquire("alpha").await.unwrap();
    make_ready(&provider, "alpha").await;
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(manager.stats().healthy_sessions, 0);

    manager.acquire("alpha").await.unwrap();
    assert_eq!(provider.connects("alpha"), 2);
    assert_eq!(provider.destroyed_keys(), ["alpha"]);
}

// ── Persisted sessions, owners and shutdown ─────────────────────────

#[tokio::test(start_paused = true)]
async fn load_session_requires_persisted_material() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    let err = manager.load_session("user_7_1700000000000").await.unwrap_err();
    assert!(matches!(err, SessionError::PersistedSessionMissing(_)));
    assert!(!manager.has_persisted("user_7_1700000000000"));

    std::fs::create_dir(tmp.path().join("session-user_7_1700000000000")).unwrap();
    std::fs::create_dir(tmp.path().join("session-idle")).unwrap();
    assert!(manager.has_persisted("user_7_1700000000000"));
    manager.load_session("user_7_1700000000000").await.unwrap();

    let persisted = manager.persisted_sessions().unwrap();
    assert_eq!(persisted.len(), 2);
    assert_eq!(persisted[0].session_key, "idle");
    assert!(!persisted[0].exists_in_memory);
    assert_eq!(persisted[0].status, StatusKind::NotInitialized);
    assert_eq!(persisted[1].owner_id.as_deref(), Some("7"));
    assert!(persisted[1].exists_in_memory);
    assert_eq!(persisted[1].status, StatusKind::Waiting);
}

#[tokio::test(start_paused = true)]
async fn sessions_are_listed_per_owner() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(4, tmp.path()), &provider, &notifier);

    let minted = mint_session_key("42").unwrap();
    manager.acquire(&minted).await.unwrap();
    manager.acquire("support-desk").await.unwrap();
    manager.acquire("other").await.unwrap();
    assert!(manager.associate_owner("support-desk", "42"));
    assert!(!manager.associate_owner("missing", "42"));

    let keys: Vec<_> = manager
        .sessions_for_owner("42")
        .into_iter()
        .map(|s| s.session_key)
        .collect();
    assert_eq!(keys, vec!["support-desk".to_string(), minted]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_disconnects_everything() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(4, tmp.path()), &provider, &notifier);

    manager.acquire("a").await.unwrap();
    manager.acquire("b").await.unwrap();
    manager.shutdown().await;

    let mut destroyed = provider.destroyed_keys();
    destroyed.sort();
    assert_eq!(destroyed, ["a", "b"]);
    assert_eq!(manager.stats().live_sessions, 0);
    assert!(matches!(
        manager.acquire("c").await,
        Err(SessionError::ShuttingDown)
    ));
    assert!(matches!(
        manager.request_pairing("a", None).await,
        Err(SessionError::ShuttingDown)
    ));
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_connect_destroys_the_late_handle() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script {
        connect_delay: Duration::from_millis(100),
        ..Default::default()
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = start(&config(2, tmp.path()), &provider, &notifier);

    let pending = tokio::spawn({
        let manager = manager.clone();
        async move { manager.acquire("alpha").await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    manager.shutdown().await;

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::ShuttingDown));
    assert_eq!(provider.total_connects(), 1);
    assert_eq!(provider.destroyed_keys(), ["alpha"]);
    assert_eq!(manager.stats().live_sessions, 0);
    assert_eq!(manager.status("alpha").status, StatusKind::NotInitialized);
}
