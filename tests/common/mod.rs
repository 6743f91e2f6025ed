//! Gemeinsame Helfer für die Integrationstests
#![allow(dead_code)]

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use wein_lib::config::EngineConfig;
use wein_lib::connection::{
    CandidateEvents, ConnectionController, ConnectionOptions, EventHandlers, SignalingEvents,
    TrackEvents,
};
use wein_lib::media_engine::{
    DeviceError, EngineHandle, MediaEngineFacade, SimulatedBehavior, SimulatedEngineFactory,
    VirtualCapture,
};
use wein_lib::negotiation::{
    IceCandidate, IceConnectionState, MediaTrackHandle, NegotiationErrorKind, SessionDescription,
    SignalingState,
};
use wein_lib::signaling::{SignalingForwarder, SignalingSender};

/// Ein aufgezeichneter Callback
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    LocalOffer(SessionDescription),
    LocalAnswer(SessionDescription),
    StateChange(SignalingState),
    RenegotiationNeeded,
    NegotiationError(NegotiationErrorKind, String),
    IceCandidate(IceCandidate),
    IceState(IceConnectionState),
    RemoteTrack(MediaTrackHandle),
    DeviceError(DeviceError),
}

/// Zeichnet alle Callbacks in Reihenfolge auf, optional mit Weiterleitung
pub struct Recorder {
    events: Mutex<Vec<Event>>,
    forwarder: Option<SignalingForwarder<SignalingSender>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            forwarder: None,
        })
    }

    pub fn forwarding(sender: SignalingSender) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            forwarder: Some(SignalingForwarder::new(sender)),
        })
    }

    pub fn handlers(self: &Arc<Self>) -> EventHandlers {
        EventHandlers::all(Arc::clone(self))
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Position des ersten passenden Events
    pub fn position(&self, predicate: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events.lock().iter().position(|e| predicate(e))
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::IceCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn remote_tracks(&self) -> Vec<MediaTrackHandle> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::RemoteTrack(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<SignalingState> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::StateChange(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<NegotiationErrorKind> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::NegotiationError(kind, _) => Some(*kind),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }
}

impl SignalingEvents for Recorder {
    fn on_local_offer(&self, description: &SessionDescription) {
        self.push(Event::LocalOffer(description.clone()));
        if let Some(f) = &self.forwarder {
            f.on_local_offer(description);
        }
    }

    fn on_local_answer(&self, description: &SessionDescription) {
        self.push(Event::LocalAnswer(description.clone()));
        if let Some(f) = &self.forwarder {
            f.on_local_answer(description);
        }
    }

    fn on_signaling_state_change(&self, state: SignalingState) {
        self.push(Event::StateChange(state));
    }

    fn on_renegotiation_needed(&self) {
        self.push(Event::RenegotiationNeeded);
    }

    fn on_negotiation_error(&self, kind: NegotiationErrorKind, detail: &str) {
        self.push(Event::NegotiationError(kind, detail.to_string()));
    }
}

impl CandidateEvents for Recorder {
    fn on_ice_candidate(&self, candidate: &IceCandidate) {
        self.push(Event::IceCandidate(candidate.clone()));
        if let Some(f) = &self.forwarder {
            f.on_ice_candidate(candidate);
        }
    }

    fn on_ice_connection_state_change(&self, state: IceConnectionState) {
        self.push(Event::IceState(state));
    }
}

impl TrackEvents for Recorder {
    fn on_remote_track(&self, track: &MediaTrackHandle) {
        self.push(Event::RemoteTrack(track.clone()));
    }

    fn on_device_error(&self, error: &DeviceError) {
        self.push(Event::DeviceError(error.clone()));
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Simulierte Engine, deren Peers sich über die Factory steuern lassen
pub fn simulated_engine(behavior: SimulatedBehavior) -> (EngineHandle, Arc<SimulatedEngineFactory>) {
    simulated_engine_with(EngineConfig::simulated(), behavior)
}

pub fn simulated_engine_with(
    config: EngineConfig,
    behavior: SimulatedBehavior,
) -> (EngineHandle, Arc<SimulatedEngineFactory>) {
    let factory = Arc::new(SimulatedEngineFactory::new(behavior));
    let capture = Arc::new(VirtualCapture::new(
        config.capture.devices.clone(),
        config.capture.permission_granted,
    ));
    let engine = Arc::new(MediaEngineFacade::with_components(
        config,
        factory.clone(),
        capture,
    ));
    (engine, factory)
}

pub async fn open(engine: &EngineHandle, recorder: &Arc<Recorder>) -> ConnectionController {
    ConnectionController::open(engine, ConnectionOptions::default(), recorder.handlers())
        .await
        .unwrap()
}

/// Offer/Answer von Hand, ohne Candidates auszutauschen
pub async fn negotiate(offerer: &ConnectionController, answerer: &ConnectionController) {
    let offer = offerer.create_offer().await.unwrap();
    answerer.apply_remote_description(offer).await.unwrap();
    let answer = answerer.create_answer().await.unwrap();
    offerer.apply_remote_description(answer).await.unwrap();
}

// ============================================================================
// WAITING
// ============================================================================

/// Wartet bis zu fünf Sekunden auf eine Bedingung
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), poll).await.is_ok()
}

/// Lässt alle bereitstehenden Tasks laufen
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}
