use call_coordinator::calls::Tone;
use call_coordinator::config::CallManagerConfig;
use call_coordinator::loopback::LoopbackRelay;
use call_coordinator::test_utils::TestPeer;
use callcore::{CallOutcome, CallState, EndReason, MediaKind, ParticipantId, RejectCode};
use std::time::Duration;

fn pair(relay: &LoopbackRelay) -> (TestPeer, TestPeer) {
    let alice = TestPeer::on_relay(relay, "alice", CallManagerConfig::default());
    let bob = TestPeer::on_relay(relay, "bob", CallManagerConfig::default());
    (alice, bob)
}

#[tokio::test]
async fn test_answered_call_end_to_end() {
    let relay = LoopbackRelay::new();
    let (mut alice, mut bob) = pair(&relay);

    let call_id = alice
        .manager
        .start_call(ParticipantId::new("bob"), MediaKind::Video)
        .await
        .unwrap();
    let ringing = bob.expect_state(CallState::IncomingRinging).await;
    assert_eq!(ringing.session_id, call_id);

    bob.manager.accept_incoming().await.unwrap();
    bob.wait_for_state(CallState::Active).await;
    alice.wait_for_state(CallState::Active).await;

    bob.manager.end_active().await.unwrap();
    let ended = alice
        .expect_state(CallState::Ended(EndReason::Completed))
        .await;
    assert_eq!(ended.session_id, call_id);
    alice.expect_state(CallState::Idle).await;
    bob.wait_for_state(CallState::Idle).await;

    assert_eq!(alice.signaling.sent_events(), vec!["call-user"]);
    assert_eq!(bob.signaling.sent_events(), vec!["accept-call", "call-ended"]);
    assert_eq!(relay.tracked_calls(), 0);
    for peer in [&alice, &bob] {
        assert_eq!(peer.media.acquire_count(), 1);
        assert_eq!(peer.media.release_count(), 1);
        assert_eq!(peer.history.len(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_call_is_missed_on_one_side_and_no_answer_on_the_other() {
    let relay = LoopbackRelay::new();
    let (mut alice, mut bob) = pair(&relay);

    alice
        .manager
        .start_call(ParticipantId::new("bob"), MediaKind::Video)
        .await
        .unwrap();
    alice.expect_state(CallState::OutgoingRinging).await;
    bob.expect_state(CallState::IncomingRinging).await;

    // The callee gives up first and tells the caller why.
    let missed = bob.expect_state(CallState::Ended(EndReason::Missed)).await;
    assert_eq!(missed.outcome, Some(CallOutcome::Missed));
    let no_answer = alice
        .expect_state(CallState::Ended(EndReason::Cancelled))
        .await;
    assert_eq!(no_answer.outcome, Some(CallOutcome::NoAnswer));
    alice.expect_state(CallState::Idle).await;
    bob.expect_state(CallState::Idle).await;

    assert_eq!(alice.signaling.sent_events(), vec!["call-user"]);
    assert_eq!(bob.signaling.sent_events(), vec!["reject-call"]);
    assert_eq!(alice.tones.playing(), None);
    assert_eq!(bob.tones.playing(), None);
    assert_eq!(alice.media.acquire_count(), 0);
    assert_eq!(bob.media.acquire_count(), 0);
    assert_eq!(relay.tracked_calls(), 0);

    // Nothing else fires once both sides are idle.
    tokio::time::sleep(Duration::from_secs(60)).await;
    alice.assert_quiet();
    bob.assert_quiet();
}

#[tokio::test]
async fn test_blocked_camera_reaches_caller_as_unavailable() {
    let relay = LoopbackRelay::new();
    let (mut alice, mut bob) = pair(&relay);
    bob.media.deny_permission();

    alice
        .manager
        .start_call(ParticipantId::new("bob"), MediaKind::Video)
        .await
        .unwrap();
    bob.expect_state(CallState::IncomingRinging).await;
    bob.manager.accept_incoming().await.unwrap();

    bob.wait_for_state(CallState::Ended(EndReason::MediaDenied))
        .await;
    let ended = alice
        .wait_for_state(CallState::Ended(EndReason::Rejected))
        .await;
    assert_eq!(ended.outcome, Some(CallOutcome::Unavailable));

    match &bob.signaling.sent()[..] {
        [callcore::OutboundSignal::RejectCall { reason_code, .. }] => {
            assert_eq!(*reason_code, RejectCode::MediaDenied);
        }
        other => panic!("unexpected signals: {other:?}"),
    }
}

#[tokio::test]
async fn test_simultaneous_calls_settle_on_one_session() {
    let relay = LoopbackRelay::new();
    let (mut alice, mut bob) = pair(&relay);

    relay.hold();
    let alice_id = alice
        .manager
        .start_call(ParticipantId::new("bob"), MediaKind::Audio)
        .await
        .unwrap();
    let bob_id = bob
        .manager
        .start_call(ParticipantId::new("alice"), MediaKind::Audio)
        .await
        .unwrap();
    alice.expect_state(CallState::OutgoingRinging).await;
    bob.expect_state(CallState::OutgoingRinging).await;
    relay.flush();

    let (winner, loser, kept) = if alice_id < bob_id {
        (&mut alice, &mut bob, alice_id)
    } else {
        (&mut bob, &mut alice, bob_id)
    };

    // The loser drops its own attempt and answers the surviving one.
    let cancelled = loser
        .expect_state(CallState::Ended(EndReason::Cancelled))
        .await;
    assert_ne!(cancelled.session_id, kept);
    assert_eq!(cancelled.outcome, Some(CallOutcome::Cancelled));
    loser.expect_state(CallState::Idle).await;
    let answered = loser.expect_state(CallState::IncomingRinging).await;
    assert_eq!(answered.session_id, kept);
    loser.expect_state(CallState::Connecting).await;
    loser.expect_state(CallState::Active).await;

    winner.expect_state(CallState::Connecting).await;
    let active = winner.expect_state(CallState::Active).await;
    assert_eq!(active.session_id, kept);

    assert_eq!(loser.tones.played(), vec![Tone::RingOut]);
    assert_eq!(
        loser.signaling.sent_events(),
        vec!["call-user", "call-ended", "accept-call"]
    );
    assert_eq!(winner.signaling.sent_events(), vec!["call-user"]);

    winner.manager.end_active().await.unwrap();
    winner.wait_for_state(CallState::Idle).await;
    loser
        .expect_state(CallState::Ended(EndReason::Completed))
        .await;
    loser.expect_state(CallState::Idle).await;

    assert_eq!(winner.history.len(), 1);
    assert_eq!(loser.history.len(), 2);
    assert_eq!(loser.media.acquire_count(), loser.media.release_count());
    assert_eq!(winner.media.acquire_count(), winner.media.release_count());
}

#[tokio::test]
async fn test_dropped_socket_ends_call_locally() {
    let relay = LoopbackRelay::new();
    let (mut alice, mut bob) = pair(&relay);

    alice
        .manager
        .start_call(ParticipantId::new("bob"), MediaKind::Audio)
        .await
        .unwrap();
    bob.expect_state(CallState::IncomingRinging).await;
    bob.manager.accept_incoming().await.unwrap();
    bob.wait_for_state(CallState::Active).await;
    alice.wait_for_state(CallState::Active).await;

    relay.disconnect(&ParticipantId::new("bob"));
    let lost = bob
        .expect_state(CallState::Ended(EndReason::NetworkLost))
        .await;
    assert_eq!(lost.outcome, Some(CallOutcome::Disconnected));
    bob.expect_state(CallState::Idle).await;
    assert_eq!(bob.media.live_handles(), 0);

    // The caller only notices when it hangs up; bob never hears about it.
    alice.manager.end_active().await.unwrap();
    alice.wait_for_state(CallState::Idle).await;
    bob.assert_quiet();

    relay.reconnect(&ParticipantId::new("bob"));
    alice
        .manager
        .start_call(ParticipantId::new("bob"), MediaKind::Audio)
        .await
        .unwrap();
    bob.expect_state(CallState::IncomingRinging).await;
}

/// Alice calls bob; bob answers locally but his device takes `grant` to come up.
async fn answered_slowly(relay: &LoopbackRelay, grant: Duration) -> (TestPeer, TestPeer) {
    let (mut alice, mut bob) = pair(relay);
    bob.media.set_acquire_delay(grant);

    alice
        .manager
        .start_call(ParticipantId::new("bob"), MediaKind::Video)
        .await
        .unwrap();
    alice.expect_state(CallState::OutgoingRinging).await;
    bob.expect_state(CallState::IncomingRinging).await;
    bob.manager.accept_incoming().await.unwrap();
    bob.expect_state(CallState::Connecting).await;
    (alice, bob)
}

#[tokio::test(start_paused = true)]
async fn test_callee_hang_up_before_grant_ends_caller() {
    let relay = LoopbackRelay::new();
    let (mut alice, mut bob) = answered_slowly(&relay, Duration::from_secs(5)).await;
    let started = tokio::time::Instant::now();

    bob.manager.end_active().await.unwrap();
    let bob_end = bob
        .expect_state(CallState::Ended(EndReason::Rejected))
        .await;
    let alice_end = alice
        .expect_state(CallState::Ended(EndReason::Rejected))
        .await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(alice_end.outcome, bob_end.outcome);
    assert_eq!(alice.tones.playing(), None);
    assert_eq!(bob.signaling.sent_events(), vec!["reject-call"]);

    alice.expect_state(CallState::Idle).await;
    bob.expect_state(CallState::Idle).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(bob.media.live_handles(), 0);
    assert_eq!(relay.tracked_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_callee_connect_timeout_before_grant_ends_caller() {
    let relay = LoopbackRelay::new();
    let (mut alice, mut bob) = answered_slowly(&relay, Duration::from_secs(120)).await;
    let started = tokio::time::Instant::now();

    let bob_end = bob
        .expect_state(CallState::Ended(EndReason::MediaDenied))
        .await;
    let alice_end = alice
        .expect_state(CallState::Ended(EndReason::Rejected))
        .await;

    // Decided by the callee's 30s connect window, not the caller's ring window.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(30));
    assert!(elapsed < Duration::from_secs(45));
    assert_eq!(bob_end.outcome, Some(CallOutcome::MediaDenied));
    assert_eq!(alice_end.outcome, Some(CallOutcome::Unavailable));
    assert_eq!(bob.signaling.sent_events(), vec!["reject-call"]);
}

#[tokio::test(start_paused = true)]
async fn test_callee_shutdown_before_grant_ends_caller() {
    let relay = LoopbackRelay::new();
    let (mut alice, mut bob) = answered_slowly(&relay, Duration::from_secs(5)).await;

    bob.manager.shutdown().await.unwrap();
    bob.expect_state(CallState::Ended(EndReason::Rejected))
        .await;
    let alice_end = alice
        .expect_state(CallState::Ended(EndReason::Rejected))
        .await;
    assert_eq!(alice_end.outcome, Some(CallOutcome::Rejected));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(bob.media.acquire_count(), bob.media.release_count());
}
