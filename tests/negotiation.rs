mod common;

use common::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wein_lib::config::EngineConfig;
use wein_lib::connection::{ConnectionController, ConnectionOptions, EventHandlers, SignalingEvents};
use wein_lib::media_engine::{DeviceError, EngineEvent, SimulatedBehavior};
use wein_lib::negotiation::{
    IceCandidate, IceConnectionState, NegotiationError, NegotiationErrorKind, SdpKind,
    SessionDescription, SignalingState, TrackKind,
};
use wein_lib::signaling::{spawn_bridge, BridgeOptions, InMemorySignaling};

fn candidate(n: u32) -> IceCandidate {
    IceCandidate::new("0", 0, format!("candidate:{n} 1 udp 2122260223 10.1.0.{n} 6000{n} typ host"))
}

// ============================================================================
// FULL SCENARIO
// ============================================================================

#[tokio::test]
async fn test_two_peers_negotiate_over_in_memory_signaling() {
    let (engine, factory) = simulated_engine(SimulatedBehavior::default());
    let (a_end, b_end) = InMemorySignaling::pair();
    let rec_a = Recorder::forwarding(a_end.sender);
    let rec_b = Recorder::forwarding(b_end.sender);

    let a = open(&engine, &rec_a).await;
    let b = open(&engine, &rec_b).await;
    let engine_a = factory.control(0).unwrap();
    let engine_b = factory.control(1).unwrap();

    spawn_bridge(a.clone(), a_end.receiver, BridgeOptions::default());
    spawn_bridge(b.clone(), b_end.receiver, BridgeOptions { auto_answer: true });

    let offer = within(a.create_offer()).await.unwrap();
    assert_eq!(offer.kind(), SdpKind::Offer);

    within(a.wait_for_state(SignalingState::Stable)).await.unwrap();
    assert!(wait_until(|| b.signaling_state() == SignalingState::Stable).await);

    assert_eq!(
        rec_a.states(),
        vec![SignalingState::HaveLocalOffer, SignalingState::Stable]
    );
    assert_eq!(
        rec_b.states(),
        vec![SignalingState::HaveRemoteOffer, SignalingState::Stable]
    );
    assert_eq!(rec_a.count(|e| matches!(e, Event::LocalOffer(_))), 1);
    assert_eq!(rec_b.count(|e| matches!(e, Event::LocalAnswer(_))), 1);

    // Zwei Tracks mit je zwei Host-Candidates pro Seite
    assert!(wait_until(|| engine_b.added_candidates().len() == 4).await);
    assert!(wait_until(|| engine_a.added_candidates().len() == 4).await);
    assert_eq!(engine_b.added_candidates(), rec_a.candidates());
    assert_eq!(engine_a.added_candidates(), rec_b.candidates());

    // Jede Seite sieht Audio und Video der Gegenseite genau einmal
    for (recorder, remote) in [(&rec_a, &b), (&rec_b, &a)] {
        let tracks = recorder.remote_tracks();
        let mut ids: Vec<_> = tracks.iter().map(|t| t.id.clone()).collect();
        ids.sort();
        let mut expected: Vec<_> = remote.local_tracks().into_iter().map(|t| t.id).collect();
        expected.sort();
        assert_eq!(ids, expected);
        assert!(tracks.iter().all(|t| t.enabled));
    }

    assert!(rec_a.errors().is_empty());
    assert!(rec_b.errors().is_empty());

    a.close();
    b.close();
}

#[tokio::test]
async fn test_offer_callback_fires_before_remote_apply_completion() {
    let (engine, _factory) = simulated_engine(SimulatedBehavior::default());
    let rec_a = Recorder::new();
    let rec_b = Recorder::new();
    let a = open(&engine, &rec_a).await;
    let b = open(&engine, &rec_b).await;

    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();

    let log = Arc::clone(&order);
    a.create_offer_with(move |result| {
        log.lock().push("offer");
        let _ = done_tx.send(result);
    })
    .unwrap();
    let offer = within(done_rx).await.unwrap().unwrap();

    b.apply_remote_description(offer).await.unwrap();
    let answer = b.create_answer().await.unwrap();

    let log = Arc::clone(&order);
    let (applied_tx, applied_rx) = tokio::sync::oneshot::channel();
    a.apply_remote_description_with(answer, move |result| {
        log.lock().push("applied");
        let _ = applied_tx.send(result);
    })
    .unwrap();
    within(applied_rx).await.unwrap().unwrap();

    assert_eq!(*order.lock(), vec!["offer", "applied"]);
    assert_eq!(a.signaling_state(), SignalingState::Stable);
    assert_eq!(b.signaling_state(), SignalingState::Stable);
}

#[tokio::test]
async fn test_callbacks_drive_negotiation_inline() {
    let (engine, _factory) = simulated_engine(SimulatedBehavior::default());
    let rec_a = Recorder::new();
    let rec_b = Recorder::new();
    let a = open(&engine, &rec_a).await;
    let b = open(&engine, &rec_b).await;

    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();

    // Jeder Schritt startet den nächsten direkt im Callback, ohne await
    let (log, answerer, offerer) = (Arc::clone(&order), b.clone(), a.clone());
    a.create_offer_with(move |offer| {
        log.lock().push("offer");
        let for_answer = answerer.clone();
        answerer
            .apply_remote_description_with(offer.unwrap(), move |applied| {
                log.lock().push("remote offer applied");
                applied.unwrap();
                for_answer
                    .create_answer_with(move |answer| {
                        log.lock().push("answer");
                        offerer
                            .apply_remote_description_with(answer.unwrap(), move |applied| {
                                log.lock().push("remote answer applied");
                                let _ = done_tx.send(applied);
                            })
                            .unwrap();
                    })
                    .unwrap();
            })
            .unwrap();
    })
    .unwrap();

    within(done_rx).await.unwrap().unwrap();

    assert_eq!(
        *order.lock(),
        vec!["offer", "remote offer applied", "answer", "remote answer applied"]
    );
    assert_eq!(a.signaling_state(), SignalingState::Stable);
    assert_eq!(b.signaling_state(), SignalingState::Stable);
    assert_eq!(rec_a.count(|e| matches!(e, Event::LocalOffer(_))), 1);
    assert_eq!(rec_b.count(|e| matches!(e, Event::LocalAnswer(_))), 1);
    assert_eq!(
        rec_a.states(),
        vec![SignalingState::HaveLocalOffer, SignalingState::Stable]
    );
    assert_eq!(
        rec_b.states(),
        vec![SignalingState::HaveRemoteOffer, SignalingState::Stable]
    );
}

// ============================================================================
// STATE VALIDATION
// ============================================================================

#[tokio::test]
async fn test_second_create_offer_rejected_while_pending() {
    let (engine, factory) = simulated_engine(SimulatedBehavior {
        hold_completions: true,
        ..Default::default()
    });
    let rec = Recorder::new();
    let a = open(&engine, &rec).await;

    let (first_tx, first_rx) = tokio::sync::oneshot::channel();
    a.create_offer_with(move |result| {
        let _ = first_tx.send(result);
    })
    .unwrap();

    let second = within(a.create_offer()).await;
    assert!(matches!(
        second,
        Err(NegotiationError::InvalidStateTransition { .. })
    ));
    assert_eq!(a.signaling_state(), SignalingState::Stable);

    factory.control(0).unwrap().release();
    let first = within(first_rx).await.unwrap().unwrap();
    assert_eq!(first.kind(), SdpKind::Offer);

    assert_eq!(a.signaling_state(), SignalingState::HaveLocalOffer);
    assert_eq!(rec.states(), vec![SignalingState::HaveLocalOffer]);
    assert_eq!(rec.errors(), vec![NegotiationErrorKind::InvalidStateTransition]);
}

#[tokio::test]
async fn test_remote_answer_in_stable_is_invalid_description() {
    let (engine, factory) = simulated_engine(SimulatedBehavior::default());
    let rec = Recorder::new();
    let a = open(&engine, &rec).await;

    let result = a
        .apply_remote_description(SessionDescription::answer("v=0\r\ns=-\r\n"))
        .await;

    assert!(matches!(result, Err(NegotiationError::InvalidDescription(_))));
    assert_eq!(a.signaling_state(), SignalingState::Stable);
    assert!(factory.control(0).unwrap().remote_description().is_none());
    assert!(rec.states().is_empty());
    assert_eq!(rec.errors(), vec![NegotiationErrorKind::InvalidDescription]);
}

#[tokio::test]
async fn test_malformed_remote_offer_is_rejected() {
    let (engine, _factory) = simulated_engine(SimulatedBehavior::default());
    let rec = Recorder::new();
    let a = open(&engine, &rec).await;

    let result = a
        .apply_remote_description(SessionDescription::offer("hello"))
        .await;

    assert!(matches!(result, Err(NegotiationError::InvalidDescription(_))));
    assert_eq!(a.signaling_state(), SignalingState::Stable);
}

#[tokio::test]
async fn test_create_answer_requires_remote_offer() {
    let (engine, _factory) = simulated_engine(SimulatedBehavior::default());
    let rec = Recorder::new();
    let a = open(&engine, &rec).await;

    assert!(matches!(
        a.create_answer().await,
        Err(NegotiationError::InvalidStateTransition { .. })
    ));
    assert_eq!(a.signaling_state(), SignalingState::Stable);
}

// ============================================================================
// CANDIDATES
// ============================================================================

#[tokio::test]
async fn test_local_candidates_follow_offer_in_order_without_duplicates() {
    let (engine, _factory) = simulated_engine(SimulatedBehavior {
        duplicate_candidates: true,
        ..Default::default()
    });
    let rec = Recorder::new();
    let a = open(&engine, &rec).await;

    a.create_offer().await.unwrap();
    assert!(wait_until(|| rec.candidates().len() == 4).await);
    settle().await;

    let candidates = rec.candidates();
    assert_eq!(candidates.len(), 4);
    let unique: HashSet<_> = candidates.iter().cloned().collect();
    assert_eq!(unique.len(), candidates.len());

    // Erzeugungsreihenfolge: candidate:1 .. candidate:4
    for (i, c) in candidates.iter().enumerate() {
        assert!(c.candidate.starts_with(&format!("candidate:{} ", i + 1)));
    }

    let offer_at = rec.position(|e| matches!(e, Event::LocalOffer(_))).unwrap();
    let first_candidate_at = rec.position(|e| matches!(e, Event::IceCandidate(_))).unwrap();
    assert!(offer_at < first_candidate_at);
}

#[tokio::test]
async fn test_remote_candidates_buffered_until_remote_description() {
    let (engine, factory) = simulated_engine(SimulatedBehavior::default());
    let a = open(&engine, &Recorder::new()).await;
    let rec_b = Recorder::new();
    let b = open(&engine, &rec_b).await;
    let engine_b = factory.control(1).unwrap();

    let offer = a.create_offer().await.unwrap();

    // Trickle vor dem Offer
    for n in [3, 1, 2] {
        b.add_ice_candidate(candidate(n)).unwrap();
    }
    settle().await;
    assert!(engine_b.added_candidates().is_empty());
    assert!(rec_b.errors().is_empty());

    b.apply_remote_description(offer).await.unwrap();
    assert!(wait_until(|| engine_b.added_candidates().len() == 3).await);
    assert_eq!(
        engine_b.added_candidates(),
        vec![candidate(3), candidate(1), candidate(2)]
    );

    // Danach direkt an die Engine
    b.add_ice_candidate(candidate(4)).unwrap();
    assert!(wait_until(|| engine_b.added_candidates().len() == 4).await);
}

#[tokio::test]
async fn test_rejected_remote_candidate_is_reported() {
    let (engine, _factory) = simulated_engine(SimulatedBehavior::default());
    let a = open(&engine, &Recorder::new()).await;
    let rec_b = Recorder::new();
    let b = open(&engine, &rec_b).await;

    let offer = a.create_offer().await.unwrap();
    b.apply_remote_description(offer).await.unwrap();

    b.add_ice_candidate(IceCandidate::new("0", 0, "garbage")).unwrap();
    assert!(wait_until(|| !rec_b.errors().is_empty()).await);
    assert_eq!(rec_b.errors(), vec![NegotiationErrorKind::InvalidDescription]);
    assert_eq!(b.signaling_state(), SignalingState::HaveRemoteOffer);
}

// ============================================================================
// CLOSE
// ============================================================================

#[tokio::test]
async fn test_close_discards_pending_completion() {
    let (engine, factory) = simulated_engine(SimulatedBehavior {
        hold_completions: true,
        ..Default::default()
    });
    let rec = Recorder::new();
    let a = open(&engine, &rec).await;
    let tracks = a.local_tracks();
    let control = factory.control(0).unwrap();

    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    a.create_offer_with(move |_| flag.store(true, Ordering::SeqCst))
        .unwrap();

    // Die Kamera läuft, sobald der Actor das Offer angefangen hat
    assert!(wait_until(|| engine.is_capturing()).await);

    a.close();
    a.close();
    assert_eq!(a.signaling_state(), SignalingState::Closed);
    assert!(!engine.is_capturing());
    assert!(tracks.iter().all(|t| !engine.is_track_live(t)));

    control.release();
    assert!(wait_until(|| control.is_closed()).await);
    settle().await;

    assert!(!fired.load(Ordering::SeqCst));
    assert!(rec.events().is_empty());

    assert_eq!(a.create_offer().await, Err(NegotiationError::ConnectionClosed));
    assert_eq!(
        a.apply_remote_description(SessionDescription::offer("v=0")).await,
        Err(NegotiationError::ConnectionClosed)
    );
    assert_eq!(
        a.add_ice_candidate(candidate(1)),
        Err(NegotiationError::ConnectionClosed)
    );
    assert_eq!(
        a.wait_for_state(SignalingState::Stable).await,
        Err(NegotiationError::ConnectionClosed)
    );
}

#[tokio::test]
async fn test_close_from_inside_callback_stops_delivery() {
    let (engine, _factory) = simulated_engine(SimulatedBehavior::default());
    let rec = Recorder::new();
    let a = open(&engine, &rec).await;

    let handle = a.clone();
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    a.create_offer_with(move |result| {
        handle.close();
        let _ = done_tx.send(result.is_ok());
    })
    .unwrap();

    assert!(within(done_rx).await.unwrap());
    settle().await;

    assert_eq!(a.signaling_state(), SignalingState::Closed);
    // Der Zustandswechsel kam vor dem Callback, danach nichts mehr
    assert_eq!(rec.events(), vec![Event::StateChange(SignalingState::HaveLocalOffer)]);
}

/// Schließt beim eigenen Offer die jeweils andere Verbindung
struct ClosesPeer {
    peer: parking_lot::Mutex<Option<ConnectionController>>,
    arrived: Arc<(parking_lot::Mutex<usize>, parking_lot::Condvar)>,
}

impl SignalingEvents for ClosesPeer {
    fn on_local_offer(&self, _description: &SessionDescription) {
        // Beide Callbacks sollen gleichzeitig laufen
        let (count, both) = &*self.arrived;
        let mut count = count.lock();
        *count += 1;
        both.notify_all();
        while *count < 2 {
            if both.wait_for(&mut count, Duration::from_secs(2)).timed_out() {
                break;
            }
        }
        drop(count);

        if let Some(peer) = self.peer.lock().take() {
            peer.close();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connections_close_each_other_from_callbacks() {
    let (engine, _factory) = simulated_engine(SimulatedBehavior::default());
    let arrived = Arc::new((parking_lot::Mutex::new(0), parking_lot::Condvar::new()));
    let handler_a = Arc::new(ClosesPeer {
        peer: parking_lot::Mutex::new(None),
        arrived: Arc::clone(&arrived),
    });
    let handler_b = Arc::new(ClosesPeer {
        peer: parking_lot::Mutex::new(None),
        arrived,
    });

    let a = ConnectionController::open(
        &engine,
        ConnectionOptions::default(),
        EventHandlers::new().with_signaling(handler_a.clone()),
    )
    .await
    .unwrap();
    let b = ConnectionController::open(
        &engine,
        ConnectionOptions::default(),
        EventHandlers::new().with_signaling(handler_b.clone()),
    )
    .await
    .unwrap();
    *handler_a.peer.lock() = Some(b.clone());
    *handler_b.peer.lock() = Some(a.clone());

    a.create_offer_with(|_| {}).unwrap();
    b.create_offer_with(|_| {}).unwrap();

    within(a.wait_for_state(SignalingState::Closed)).await.unwrap();
    within(b.wait_for_state(SignalingState::Closed)).await.unwrap();
    assert!(a.is_closed());
    assert!(b.is_closed());
    assert!(!engine.is_capturing());
}

#[tokio::test]
async fn test_dropping_last_handle_closes_connection() {
    let (engine, factory) = simulated_engine(SimulatedBehavior::default());
    let a = open(&engine, &Recorder::new()).await;
    let tracks = a.local_tracks();
    let mut states = a.state_changes();
    let control = factory.control(0).unwrap();

    drop(a);

    assert_eq!(*states.borrow_and_update(), SignalingState::Closed);
    assert!(tracks.iter().all(|t| !engine.is_track_live(t)));
    assert!(wait_until(|| control.is_closed()).await);
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn test_engine_failure_rolls_back_state() {
    let (engine, factory) = simulated_engine(SimulatedBehavior::default());
    let rec = Recorder::new();
    let a = open(&engine, &rec).await;
    let control = factory.control(0).unwrap();

    control.update_behavior(|b| b.fail_create_offer = true);
    assert!(matches!(
        a.create_offer().await,
        Err(NegotiationError::NegotiationFailure(_))
    ));
    assert_eq!(a.signaling_state(), SignalingState::Stable);

    control.update_behavior(|b| {
        b.fail_create_offer = false;
        b.fail_set_local = true;
    });
    assert!(matches!(
        a.create_offer().await,
        Err(NegotiationError::NegotiationFailure(_))
    ));
    assert_eq!(a.signaling_state(), SignalingState::Stable);
    assert!(rec.states().is_empty());
    assert_eq!(
        rec.errors(),
        vec![
            NegotiationErrorKind::NegotiationFailure,
            NegotiationErrorKind::NegotiationFailure
        ]
    );

    // Nach dem Rollback klappt ein neuer Versuch
    control.update_behavior(|b| b.fail_set_local = false);
    a.create_offer().await.unwrap();
    assert_eq!(a.signaling_state(), SignalingState::HaveLocalOffer);
}

#[tokio::test]
async fn test_failed_answer_keeps_remote_offer() {
    let (engine, factory) = simulated_engine(SimulatedBehavior::default());
    let a = open(&engine, &Recorder::new()).await;
    let b = open(&engine, &Recorder::new()).await;

    let offer = a.create_offer().await.unwrap();
    b.apply_remote_description(offer).await.unwrap();

    factory
        .control(1)
        .unwrap()
        .update_behavior(|b| b.fail_create_answer = true);
    assert!(matches!(
        b.create_answer().await,
        Err(NegotiationError::NegotiationFailure(_))
    ));
    assert_eq!(b.signaling_state(), SignalingState::HaveRemoteOffer);
}

#[tokio::test]
async fn test_failed_remote_apply_keeps_state() {
    let (engine, factory) = simulated_engine(SimulatedBehavior::default());
    let a = open(&engine, &Recorder::new()).await;
    let b = open(&engine, &Recorder::new()).await;

    let offer = a.create_offer().await.unwrap();
    factory
        .control(1)
        .unwrap()
        .update_behavior(|b| b.fail_set_remote = true);

    assert!(matches!(
        b.apply_remote_description(offer).await,
        Err(NegotiationError::NegotiationFailure(_))
    ));
    assert_eq!(b.signaling_state(), SignalingState::Stable);
}

#[tokio::test]
async fn test_device_error_does_not_block_negotiation() {
    let mut config = EngineConfig::simulated();
    config.capture.permission_granted = false;
    let (engine, _factory) = simulated_engine_with(config, SimulatedBehavior::default());
    let rec = Recorder::new();
    let a = open(&engine, &rec).await;

    a.create_offer().await.unwrap();

    assert_eq!(a.signaling_state(), SignalingState::HaveLocalOffer);
    assert!(!engine.is_capturing());
    assert_eq!(rec.count(|e| *e == Event::DeviceError(DeviceError::PermissionDenied)), 1);
    assert!(rec.errors().is_empty());
}

#[tokio::test]
async fn test_audio_only_connection_does_not_start_camera() {
    let (engine, _factory) = simulated_engine(SimulatedBehavior::default());
    let rec = Recorder::new();
    let a = ConnectionController::open(&engine, ConnectionOptions::audio_only(), rec.handlers())
        .await
        .unwrap();

    a.create_offer().await.unwrap();
    assert!(!engine.is_capturing());
    assert_eq!(a.local_tracks().len(), 1);
}

#[tokio::test]
async fn test_rejected_local_tracks_are_released() {
    let (engine, factory) = simulated_engine(SimulatedBehavior::default());
    let a = open(&engine, &Recorder::new()).await;
    assert_eq!(engine.live_track_count(), 2);

    factory
        .control(0)
        .unwrap()
        .update_behavior(|b| b.fail_add_track = true);
    assert!(matches!(
        a.add_local_track(TrackKind::Video).await,
        Err(NegotiationError::NegotiationFailure(_))
    ));
    assert_eq!(a.local_tracks().len(), 2);
    assert_eq!(engine.live_track_count(), 2);

    // Schon beim Öffnen abgelehnt: nichts bleibt liegen
    let (engine, _factory) = simulated_engine(SimulatedBehavior {
        fail_add_track: true,
        ..Default::default()
    });
    let err = ConnectionController::open(&engine, ConnectionOptions::default(), Recorder::new().handlers())
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiationError::Initialization(_)));
    assert_eq!(engine.live_track_count(), 0);
}

// ============================================================================
// ENGINE EVENTS
// ============================================================================

#[tokio::test]
async fn test_renegotiation_queued_until_stable() {
    let (engine, _factory) = simulated_engine(SimulatedBehavior::default());
    let rec_a = Recorder::new();
    let rec_b = Recorder::new();
    let a = open(&engine, &rec_a).await;
    let b = open(&engine, &rec_b).await;

    let offer = a.create_offer().await.unwrap();
    b.apply_remote_description(offer).await.unwrap();
    let answer = b.create_answer().await.unwrap();

    // HaveLocalOffer: die Meldung wird vorgemerkt
    let track = a.add_local_track(TrackKind::Video).await.unwrap();
    assert_eq!(track.kind, TrackKind::Video);
    assert_eq!(rec_a.count(|e| *e == Event::RenegotiationNeeded), 0);

    a.apply_remote_description(answer).await.unwrap();
    assert!(wait_until(|| rec_a.count(|e| *e == Event::RenegotiationNeeded) == 1).await);

    let stable_at = rec_a
        .position(|e| *e == Event::StateChange(SignalingState::Stable))
        .unwrap();
    let renegotiate_at = rec_a.position(|e| *e == Event::RenegotiationNeeded).unwrap();
    assert!(stable_at < renegotiate_at);

    // Stable: sofort
    b.add_local_track(TrackKind::Audio).await.unwrap();
    assert!(wait_until(|| rec_b.count(|e| *e == Event::RenegotiationNeeded) == 1).await);
}

#[tokio::test]
async fn test_remote_track_reported_once_across_renegotiation() {
    let (engine, _factory) = simulated_engine(SimulatedBehavior::default());
    let a = open(&engine, &Recorder::new()).await;
    let rec_b = Recorder::new();
    let b = open(&engine, &rec_b).await;

    negotiate(&a, &b).await;
    assert!(wait_until(|| rec_b.remote_tracks().len() == 2).await);

    negotiate(&a, &b).await;
    settle().await;
    assert_eq!(rec_b.remote_tracks().len(), 2);
}

#[tokio::test]
async fn test_ice_connection_state_is_forwarded() {
    let (engine, factory) = simulated_engine(SimulatedBehavior::default());
    let rec = Recorder::new();
    let _a = open(&engine, &rec).await;

    let control = factory.control(0).unwrap();
    control.emit(EngineEvent::IceConnectionStateChanged(IceConnectionState::Checking));
    control.emit(EngineEvent::IceConnectionStateChanged(IceConnectionState::Connected));

    assert!(wait_until(|| rec.events().len() == 2).await);
    assert_eq!(
        rec.events(),
        vec![
            Event::IceState(IceConnectionState::Checking),
            Event::IceState(IceConnectionState::Connected)
        ]
    );
}

// ============================================================================
// MULTIPLE CONNECTIONS
// ============================================================================

#[tokio::test]
async fn test_connections_share_capture_but_close_independently() {
    let (engine, _factory) = simulated_engine(SimulatedBehavior::default());
    let a = open(&engine, &Recorder::new()).await;
    let rec_b = Recorder::new();
    let b = open(&engine, &rec_b).await;

    a.create_offer().await.unwrap();
    b.create_offer().await.unwrap();
    assert!(engine.is_capturing());

    a.close();
    assert!(engine.is_capturing());
    assert_eq!(b.signaling_state(), SignalingState::HaveLocalOffer);

    b.close();
    assert!(!engine.is_capturing());
}

#[tokio::test]
async fn test_open_fails_after_engine_shutdown() {
    let (engine, _factory) = simulated_engine(SimulatedBehavior::default());
    engine.shutdown();

    let result =
        ConnectionController::open(&engine, ConnectionOptions::default(), Recorder::new().handlers())
            .await;
    assert!(matches!(result, Err(NegotiationError::Initialization(_))));
}
