//! Wein - Aushandlung von WebRTC-Verbindungen
//!
//! Pro Verbindung ein Actor, der Offer/Answer, ICE Candidates und Remote
//! Tracks in einer festen Reihenfolge abarbeitet:
//! - Media-Engine mit einmaliger Initialisierung (webrtc-rs oder simuliert)
//! - Signaling State Machine und Candidate-Puffer
//! - ConnectionController mit Callbacks und async API
//! - In-Memory Signaling für Tests und den Loopback

pub mod config;
pub mod connection;
pub mod media_engine;
pub mod negotiation;
pub mod signaling;

use anyhow::Context;
use config::EngineConfig;
use connection::{
    CandidateEvents, ConnectionController, ConnectionOptions, EventHandlers, SignalingEvents,
    TrackEvents,
};
use media_engine::DeviceError;
use negotiation::{
    IceCandidate, IceConnectionState, MediaTrackHandle, NegotiationErrorKind, SessionDescription,
    SignalingState,
};
use signaling::{spawn_bridge, BridgeOptions, InMemorySignaling, SignalingForwarder, SignalingSender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// LOGGING
// ============================================================================

/// Installiert den Log-Subscriber (`RUST_LOG` überschreibt die Defaults)
pub fn init_logging() {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in ["wein_lib=debug", "webrtc=warn"] {
        match directive.parse::<tracing_subscriber::filter::Directive>() {
            Ok(d) => filter = filter.add_directive(d),
            Err(e) => eprintln!("Invalid log directive {directive}: {e}"),
        }
    }

    // Ein zweiter Aufruf (z.B. aus Tests) ist kein Fehler
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// LOOPBACK DEMO
// ============================================================================

/// Beobachter einer Demo-Verbindung, leitet Signaling an die Gegenseite weiter
struct LoopbackPeer {
    name: &'static str,
    forwarder: SignalingForwarder<SignalingSender>,
    remote_tracks: AtomicUsize,
}

impl LoopbackPeer {
    fn new(name: &'static str, sender: SignalingSender) -> Arc<Self> {
        Arc::new(Self {
            name,
            forwarder: SignalingForwarder::new(sender),
            remote_tracks: AtomicUsize::new(0),
        })
    }
}

impl SignalingEvents for LoopbackPeer {
    fn on_local_offer(&self, description: &SessionDescription) {
        self.forwarder.on_local_offer(description);
    }

    fn on_local_answer(&self, description: &SessionDescription) {
        self.forwarder.on_local_answer(description);
    }

    fn on_signaling_state_change(&self, state: SignalingState) {
        tracing::info!("{}: signaling state {}", self.name, state);
    }

    fn on_negotiation_error(&self, kind: NegotiationErrorKind, detail: &str) {
        tracing::error!("{}: {} - {}", self.name, kind, detail);
    }
}

impl CandidateEvents for LoopbackPeer {
    fn on_ice_candidate(&self, candidate: &IceCandidate) {
        self.forwarder.on_ice_candidate(candidate);
    }

    fn on_ice_connection_state_change(&self, state: IceConnectionState) {
        tracing::info!("{}: ICE {:?}", self.name, state);
    }
}

impl TrackEvents for LoopbackPeer {
    fn on_remote_track(&self, track: &MediaTrackHandle) {
        self.remote_tracks.fetch_add(1, Ordering::SeqCst);
        tracing::info!("{}: remote {} track {}", self.name, track.kind, track.id);
    }

    fn on_device_error(&self, error: &DeviceError) {
        tracing::warn!("{}: camera unavailable ({})", self.name, error);
    }
}

/// Zwei Verbindungen im selben Prozess handeln über In-Memory Signaling aus
pub async fn run() -> anyhow::Result<()> {
    init_logging();

    let config = EngineConfig::load().context("Failed to load engine config")?;
    tracing::info!("Starting loopback with {:?} backend", config.backend);
    let engine = media_engine::initialize_once(config).context("Failed to initialize media engine")?;

    let (caller_end, callee_end) = InMemorySignaling::pair();
    let caller_peer = LoopbackPeer::new("caller", caller_end.sender);
    let callee_peer = LoopbackPeer::new("callee", callee_end.sender);

    let caller = ConnectionController::open(
        &engine,
        ConnectionOptions::default(),
        EventHandlers::all(Arc::clone(&caller_peer)),
    )
    .await?;
    let callee = ConnectionController::open(
        &engine,
        ConnectionOptions::default(),
        EventHandlers::all(Arc::clone(&callee_peer)),
    )
    .await?;

    let caller_bridge = spawn_bridge(caller.clone(), caller_end.receiver, BridgeOptions::default());
    let callee_bridge = spawn_bridge(
        callee.clone(),
        callee_end.receiver,
        BridgeOptions { auto_answer: true },
    );

    let offer = caller.create_offer().await?;
    tracing::info!("Offer created ({} bytes)", offer.sdp().len());

    tokio::time::timeout(
        Duration::from_secs(10),
        caller.wait_for_state(SignalingState::Stable),
    )
    .await
    .context("Negotiation timed out")??;

    // Trickle-Candidates und Tracks laufen noch durch die Queues
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!(
        "caller: {} ({} remote tracks), callee: {} ({} remote tracks)",
        caller.signaling_state(),
        caller_peer.remote_tracks.load(Ordering::SeqCst),
        callee.signaling_state(),
        callee_peer.remote_tracks.load(Ordering::SeqCst),
    );

    caller.close();
    callee.close();
    caller_bridge.abort();
    callee_bridge.abort();
    engine.shutdown();

    Ok(())
}
