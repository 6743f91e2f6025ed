//! In-Process Media-Engine ohne Netzwerk
//!
//! Verhält sich an der Schnittstelle wie eine echte Engine:
//! - Offer/Answer als SDP-Text mit einer `m=`-Sektion pro lokalem Track
//! - Host-Candidates, sobald die lokale Description angewendet ist
//! - `TrackAdded` für jeden Track, den eine Remote Description ankündigt
//! - `RenegotiationNeeded`, wenn nach dem ersten Handshake ein Track dazukommt
//!
//! Über [`SimulatedControl`] lassen sich Fehler einspeisen und Completions
//! zurückhalten, um Abläufe deterministisch zu testen.

use super::peer::{
    EngineEvent, EngineEventSender, EngineFuture, PeerEngine, PeerEngineError, PeerEngineFactory,
};
use crate::config::IceServer;
use crate::negotiation::{IceCandidate, MediaTrackHandle, SdpKind, SessionDescription, TrackKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

// ============================================================================
// BEHAVIOR
// ============================================================================

/// Stellschrauben der simulierten Engine
#[derive(Debug, Clone)]
pub struct SimulatedBehavior {
    /// Host-Candidates pro `m=`-Sektion
    pub candidates_per_section: usize,
    /// Jeden Candidate doppelt melden
    pub duplicate_candidates: bool,
    pub fail_create_offer: bool,
    pub fail_create_answer: bool,
    pub fail_set_local: bool,
    pub fail_set_remote: bool,
    pub fail_add_track: bool,
    /// Completions zurückhalten, bis [`SimulatedControl::release`] aufgerufen wird
    pub hold_completions: bool,
}

impl Default for SimulatedBehavior {
    fn default() -> Self {
        Self {
            candidates_per_section: 2,
            duplicate_candidates: false,
            fail_create_offer: false,
            fail_create_answer: false,
            fail_set_local: false,
            fail_set_remote: false,
            fail_add_track: false,
            hold_completions: false,
        }
    }
}

// ============================================================================
// FACTORY
// ============================================================================

/// Erzeugt simulierte Peers und merkt sich deren Steuerung
#[derive(Default)]
pub struct SimulatedEngineFactory {
    behavior: SimulatedBehavior,
    /// Erzeugungsindex und Peer; die Factory hält Peers nicht am Leben
    peers: Mutex<Vec<(usize, Weak<SimShared>)>>,
    next_peer: AtomicU32,
}

impl SimulatedEngineFactory {
    pub fn new(behavior: SimulatedBehavior) -> Self {
        Self {
            behavior,
            ..Default::default()
        }
    }

    /// Steuerung aller noch lebenden Peers, in Erzeugungsreihenfolge
    pub fn controls(&self) -> Vec<SimulatedControl> {
        self.peers
            .lock()
            .iter()
            .filter_map(|(_, peer)| peer.upgrade())
            .map(|shared| SimulatedControl { shared })
            .collect()
    }

    /// Steuerung des `index`-ten erzeugten Peers, solange er lebt
    pub fn control(&self, index: usize) -> Option<SimulatedControl> {
        self.peers
            .lock()
            .iter()
            .find(|(i, _)| *i == index)
            .and_then(|(_, peer)| peer.upgrade())
            .map(|shared| SimulatedControl { shared })
    }
}

impl PeerEngineFactory for SimulatedEngineFactory {
    fn create_peer(
        &self,
        ice_servers: &[IceServer],
        events: EngineEventSender,
    ) -> EngineFuture<Arc<dyn PeerEngine>> {
        let peer_index = self.next_peer.fetch_add(1, Ordering::SeqCst) + 1;
        let (gate, _) = watch::channel(!self.behavior.hold_completions);

        let shared = Arc::new(SimShared {
            peer_index,
            behavior: Mutex::new(self.behavior.clone()),
            state: Mutex::new(SimState::default()),
            events,
            gate,
        });

        tracing::debug!(
            "Simulated peer {} created ({} ICE servers ignored)",
            peer_index,
            ice_servers.len()
        );
        {
            let mut peers = self.peers.lock();
            peers.retain(|(_, peer)| peer.strong_count() > 0);
            peers.push((peer_index as usize - 1, Arc::downgrade(&shared)));
        }

        let peer: Arc<dyn PeerEngine> = Arc::new(SimulatedPeer { shared });
        Box::pin(async move { Ok(peer) })
    }
}

// ============================================================================
// SHARED STATE
// ============================================================================

#[derive(Default)]
struct SimState {
    tracks: Vec<MediaTrackHandle>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    added_candidates: Vec<IceCandidate>,
    gathered: bool,
    version: u64,
    closed: bool,
}

struct SimShared {
    peer_index: u32,
    behavior: Mutex<SimulatedBehavior>,
    state: Mutex<SimState>,
    events: EngineEventSender,
    /// `true` = Completions dürfen durch
    gate: watch::Sender<bool>,
}

impl SimShared {
    async fn wait_gate(&self) {
        let mut rx = self.gate.subscribe();
        loop {
            let open = *rx.borrow_and_update();
            if open {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn ensure_open(&self) -> Result<(), PeerEngineError> {
        if self.state.lock().closed {
            Err(PeerEngineError::Closed)
        } else {
            Ok(())
        }
    }

    fn render_sdp(&self, kind: SdpKind) -> SessionDescription {
        let mut state = self.state.lock();
        state.version += 1;

        let mut sdp = format!(
            "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.peer_index, state.version
        );
        for (index, track) in state.tracks.iter().enumerate() {
            let payload_type = match track.kind {
                TrackKind::Audio => 111,
                TrackKind::Video => 96,
            };
            sdp.push_str(&format!(
                "m={} 9 UDP/TLS/RTP/SAVPF {}\r\nc=IN IP4 0.0.0.0\r\na=mid:{}\r\na=sendrecv\r\na=msid:wein {}\r\n",
                track.kind, payload_type, index, track.id
            ));
        }

        SessionDescription::new(kind, sdp)
    }

    /// Host-Candidates für jede Sektion, einmal pro Peer
    fn gather_candidates(&self) -> Vec<IceCandidate> {
        let behavior = self.behavior.lock().clone();
        let mut state = self.state.lock();
        if state.gathered {
            return Vec::new();
        }
        state.gathered = true;

        let sections = state.tracks.len().max(1);
        let mut candidates = Vec::new();
        let mut serial = 0u32;
        for section in 0..sections {
            for _ in 0..behavior.candidates_per_section {
                serial += 1;
                let candidate = IceCandidate::new(
                    section.to_string(),
                    section as u16,
                    format!(
                        "candidate:{} 1 udp {} 127.0.0.{} {} typ host",
                        serial,
                        2_122_260_223u32 - serial,
                        self.peer_index,
                        50_000 + serial
                    ),
                );
                if behavior.duplicate_candidates {
                    candidates.push(candidate.clone());
                }
                candidates.push(candidate);
            }
        }
        candidates
    }
}

/// Tracks, die eine SDP-Beschreibung über `a=msid` ankündigt
fn announced_tracks(sdp: &str) -> Vec<MediaTrackHandle> {
    let mut tracks = Vec::new();
    let mut kind = None;

    for line in sdp.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("m=") {
            kind = match rest.split_whitespace().next() {
                Some("audio") => Some(TrackKind::Audio),
                Some("video") => Some(TrackKind::Video),
                _ => None,
            };
        } else if let Some(rest) = line.strip_prefix("a=msid:") {
            if let (Some(kind), Some(id)) = (kind, rest.split_whitespace().nth(1)) {
                tracks.push(MediaTrackHandle::new(kind, id));
            }
        }
    }
    tracks
}

// ============================================================================
// CONTROL
// ============================================================================

/// Steuerung und Einblick in einen simulierten Peer
#[derive(Clone)]
pub struct SimulatedControl {
    shared: Arc<SimShared>,
}

impl SimulatedControl {
    /// Completions ab jetzt zurückhalten
    pub fn hold(&self) {
        self.shared.gate.send_replace(false);
    }

    /// Zurückgehaltene Completions freigeben
    pub fn release(&self) {
        self.shared.gate.send_replace(true);
    }

    pub fn update_behavior(&self, update: impl FnOnce(&mut SimulatedBehavior)) {
        update(&mut self.shared.behavior.lock());
    }

    /// Löst ein Engine-Event von außen aus
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.shared.events.emit(event)
    }

    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        self.shared.state.lock().added_candidates.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.shared.state.lock().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.shared.state.lock().remote.clone()
    }

    pub fn tracks(&self) -> Vec<MediaTrackHandle> {
        self.shared.state.lock().tracks.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

impl std::fmt::Debug for SimulatedControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedControl")
            .field("peer", &self.shared.peer_index)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// PEER
// ============================================================================

struct SimulatedPeer {
    shared: Arc<SimShared>,
}

impl PeerEngine for SimulatedPeer {
    fn add_track(&self, track: &MediaTrackHandle) -> EngineFuture<()> {
        let shared = Arc::clone(&self.shared);
        let track = track.clone();
        Box::pin(async move {
            shared.ensure_open()?;
            if shared.behavior.lock().fail_add_track {
                return Err(PeerEngineError::Rejected("track rejected".to_string()));
            }
            let renegotiate = {
                let mut state = shared.state.lock();
                state.tracks.push(track);
                state.local.is_some()
            };
            if renegotiate {
                shared.events.emit(EngineEvent::RenegotiationNeeded);
            }
            Ok(())
        })
    }

    fn create_offer(&self) -> EngineFuture<SessionDescription> {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            shared.wait_gate().await;
            shared.ensure_open()?;
            if shared.behavior.lock().fail_create_offer {
                return Err(PeerEngineError::Rejected("offer creation failed".to_string()));
            }
            Ok(shared.render_sdp(SdpKind::Offer))
        })
    }

    fn create_answer(&self) -> EngineFuture<SessionDescription> {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            shared.wait_gate().await;
            shared.ensure_open()?;
            if shared.behavior.lock().fail_create_answer {
                return Err(PeerEngineError::Rejected("answer creation failed".to_string()));
            }
            let has_offer = matches!(
                shared.state.lock().remote.as_ref().map(|d| d.kind()),
                Some(SdpKind::Offer)
            );
            if !has_offer {
                return Err(PeerEngineError::Rejected("no remote offer".to_string()));
            }
            Ok(shared.render_sdp(SdpKind::Answer))
        })
    }

    fn set_local_description(&self, description: SessionDescription) -> EngineFuture<()> {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            shared.wait_gate().await;
            shared.ensure_open()?;
            if shared.behavior.lock().fail_set_local {
                return Err(PeerEngineError::Rejected("local description rejected".to_string()));
            }
            if !description.is_well_formed() {
                return Err(PeerEngineError::InvalidSdp("missing version line".to_string()));
            }
            shared.state.lock().local = Some(description);

            // Candidates kommen vor der Completion in der Queue an
            for candidate in shared.gather_candidates() {
                shared.events.emit(EngineEvent::CandidateGenerated(candidate));
            }
            Ok(())
        })
    }

    fn set_remote_description(&self, description: SessionDescription) -> EngineFuture<()> {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            shared.wait_gate().await;
            shared.ensure_open()?;
            if shared.behavior.lock().fail_set_remote {
                return Err(PeerEngineError::Rejected("remote description rejected".to_string()));
            }
            if !description.is_well_formed() {
                return Err(PeerEngineError::InvalidSdp("missing version line".to_string()));
            }

            let tracks = announced_tracks(description.sdp());
            shared.state.lock().remote = Some(description);
            for track in tracks {
                shared.events.emit(EngineEvent::TrackAdded(track));
            }
            Ok(())
        })
    }

    fn add_ice_candidate(&self, candidate: IceCandidate) -> EngineFuture<()> {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            shared.ensure_open()?;
            if !candidate.candidate.starts_with("candidate:") {
                return Err(PeerEngineError::InvalidSdp(format!(
                    "malformed candidate: {}",
                    candidate.candidate
                )));
            }
            let mut state = shared.state.lock();
            if state.remote.is_none() {
                return Err(PeerEngineError::Rejected(
                    "remote description not set".to_string(),
                ));
            }
            state.added_candidates.push(candidate);
            Ok(())
        })
    }

    fn close(&self) -> EngineFuture<()> {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            shared.state.lock().closed = true;
            Ok(())
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
