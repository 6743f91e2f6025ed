//! Schnittstelle zur Peer-Engine einer einzelnen Verbindung
//!
//! Alle Engine-Aufrufe sind asynchron und liefern ihr Ergebnis aus dem
//! Ausführungskontext der Engine. Spontane Engine-Events (Candidates, Tracks,
//! Renegotiation) laufen über einen [`EngineEventSender`] in die Queue der
//! jeweiligen Verbindung.

use crate::config::IceServer;
use crate::negotiation::{
    IceCandidate, IceConnectionState, MediaTrackHandle, SessionDescription,
};
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Rohe Fehler der Engine, werden vor der Anwendung klassifiziert
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerEngineError {
    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Rejected by engine: {0}")]
    Rejected(String),

    #[error("Peer connection is closed")]
    Closed,

    #[error("Engine error: {0}")]
    Backend(String),
}

pub type EngineFuture<T> = BoxFuture<'static, Result<T, PeerEngineError>>;

// ============================================================================
// ENGINE EVENTS
// ============================================================================

/// Events, die die Engine von sich aus auslöst
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    CandidateGenerated(IceCandidate),
    TrackAdded(MediaTrackHandle),
    RenegotiationNeeded,
    IceConnectionStateChanged(IceConnectionState),
}

/// Zustellung von Engine-Events in die Queue einer Verbindung
#[derive(Clone)]
pub struct EngineEventSender {
    forward: Arc<dyn Fn(EngineEvent) -> bool + Send + Sync>,
}

impl EngineEventSender {
    pub fn new<F>(forward: F) -> Self
    where
        F: Fn(EngineEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            forward: Arc::new(forward),
        }
    }

    /// Sender mit eigenem Kanal
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(move |event| tx.send(event).is_ok()), rx)
    }

    /// Gibt `false` zurück, wenn niemand mehr zuhört
    pub fn emit(&self, event: EngineEvent) -> bool {
        (self.forward)(event)
    }
}

impl std::fmt::Debug for EngineEventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEventSender").finish_non_exhaustive()
    }
}

// ============================================================================
// PEER ENGINE
// ============================================================================

/// Die Peer-Connection der Engine
pub trait PeerEngine: Send + Sync {
    fn add_track(&self, track: &MediaTrackHandle) -> EngineFuture<()>;

    fn create_offer(&self) -> EngineFuture<SessionDescription>;

    fn create_answer(&self) -> EngineFuture<SessionDescription>;

    fn set_local_description(&self, description: SessionDescription) -> EngineFuture<()>;

    fn set_remote_description(&self, description: SessionDescription) -> EngineFuture<()>;

    fn add_ice_candidate(&self, candidate: IceCandidate) -> EngineFuture<()>;

    fn close(&self) -> EngineFuture<()>;
}

/// Erzeugt Peer-Engines, eine pro Verbindung
pub trait PeerEngineFactory: Send + Sync {
    fn create_peer(
        &self,
        ice_servers: &[IceServer],
        events: EngineEventSender,
    ) -> EngineFuture<Arc<dyn PeerEngine>>;
}

// ============================================================================
// TESTS
// ============================================================================
