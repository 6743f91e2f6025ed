//! Event-Schnittstellen einer Verbindung
//!
//! Statt eines großen Observer-Traits gibt es drei kleine Gruppen. Jede
//! Methode hat einen leeren Default, implementiert wird nur, was gebraucht
//! wird. Alle Aufrufe kommen aus der Queue der Verbindung, nie parallel und
//! nie nach `close()`.

use crate::media_engine::DeviceError;
use crate::negotiation::{
    IceCandidate, IceConnectionState, MediaTrackHandle, NegotiationErrorKind, SessionDescription,
    SignalingState,
};
use std::sync::Arc;

/// Offer/Answer und Zustandswechsel
pub trait SignalingEvents: Send + Sync {
    fn on_local_offer(&self, _description: &SessionDescription) {}

    fn on_local_answer(&self, _description: &SessionDescription) {}

    fn on_signaling_state_change(&self, _state: SignalingState) {}

    /// Die Engine möchte neu verhandeln und der Zustand ist `Stable`
    fn on_renegotiation_needed(&self) {}

    fn on_negotiation_error(&self, _kind: NegotiationErrorKind, _detail: &str) {}
}

/// Lokale ICE Candidates und Verbindungszustand
pub trait CandidateEvents: Send + Sync {
    fn on_ice_candidate(&self, _candidate: &IceCandidate) {}

    fn on_ice_connection_state_change(&self, _state: IceConnectionState) {}
}

/// Remote Tracks und Kamera
pub trait TrackEvents: Send + Sync {
    /// Genau einmal pro Remote Track
    fn on_remote_track(&self, _track: &MediaTrackHandle) {}

    /// Kamera konnte nicht gestartet werden, die Aushandlung läuft weiter
    fn on_device_error(&self, _error: &DeviceError) {}
}

/// Registrierte Handler einer Verbindung
#[derive(Clone, Default)]
pub struct EventHandlers {
    signaling: Option<Arc<dyn SignalingEvents>>,
    candidates: Option<Arc<dyn CandidateEvents>>,
    tracks: Option<Arc<dyn TrackEvents>>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ein Objekt für alle drei Gruppen
    pub fn all<T>(handler: Arc<T>) -> Self
    where
        T: SignalingEvents + CandidateEvents + TrackEvents + 'static,
    {
        Self {
            signaling: Some(handler.clone()),
            candidates: Some(handler.clone()),
            tracks: Some(handler),
        }
    }

    pub fn with_signaling(mut self, handler: Arc<dyn SignalingEvents>) -> Self {
        self.signaling = Some(handler);
        self
    }

    pub fn with_candidates(mut self, handler: Arc<dyn CandidateEvents>) -> Self {
        self.candidates = Some(handler);
        self
    }

    pub fn with_tracks(mut self, handler: Arc<dyn TrackEvents>) -> Self {
        self.tracks = Some(handler);
        self
    }

    pub(crate) fn signaling(&self) -> Option<&Arc<dyn SignalingEvents>> {
        self.signaling.as_ref()
    }

    pub(crate) fn candidates(&self) -> Option<&Arc<dyn CandidateEvents>> {
        self.candidates.as_ref()
    }

    pub(crate) fn tracks(&self) -> Option<&Arc<dyn TrackEvents>> {
        self.tracks.as_ref()
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("signaling", &self.signaling.is_some())
            .field("candidates", &self.candidates.is_some())
            .field("tracks", &self.tracks.is_some())
            .finish()
    }
}
