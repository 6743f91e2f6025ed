//! Candidate Collector
//!
//! Puffert lokale ICE Candidates, bis die lokale Description angewendet ist,
//! und Remote Candidates, bis eine Remote Description existiert.
//! Die Reihenfolge bleibt in beiden Richtungen erhalten.

use super::error::NegotiationError;
use super::types::IceCandidate;
use std::collections::HashSet;

/// Puffer für lokale und entfernte Candidates einer Verbindung
#[derive(Debug, Default)]
pub struct CandidateCollector {
    local_applied: bool,
    local_queue: Vec<IceCandidate>,
    local_seen: HashSet<IceCandidate>,

    remote_ready: bool,
    remote_queue: Vec<IceCandidate>,

    closed: bool,
}

impl CandidateCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lokaler Candidate von der Engine
    ///
    /// `Some` bedeutet: sofort weiterleiten. `None`: gepuffert oder Duplikat.
    pub fn on_local_candidate_generated(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.closed || !self.local_seen.insert(candidate.clone()) {
            return None;
        }
        if self.local_applied {
            Some(candidate)
        } else {
            self.local_queue.push(candidate);
            None
        }
    }

    /// Lokale Description ist angewendet: Puffer in Erzeugungsreihenfolge leeren
    ///
    /// Danach wird jeder neue Candidate direkt weitergereicht.
    pub fn on_local_description_applied(&mut self) -> Vec<IceCandidate> {
        if self.closed {
            return Vec::new();
        }
        self.local_applied = true;
        std::mem::take(&mut self.local_queue)
    }

    /// Candidate vom Remote-Peer
    ///
    /// `Ok(Some)` heißt: direkt an die Engine geben. Vor der ersten Remote
    /// Description wird gepuffert (Trickle vor dem Answer).
    pub fn on_remote_candidate_received(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<Option<IceCandidate>, NegotiationError> {
        if self.closed {
            return Err(NegotiationError::ConnectionClosed);
        }
        if self.remote_ready {
            Ok(Some(candidate))
        } else {
            self.remote_queue.push(candidate);
            Ok(None)
        }
    }

    /// Remote Description ist angewendet: gepufferte Remote Candidates in Empfangsreihenfolge
    pub fn on_remote_description_applied(&mut self) -> Vec<IceCandidate> {
        if self.closed {
            return Vec::new();
        }
        self.remote_ready = true;
        std::mem::take(&mut self.remote_queue)
    }

    pub fn pending_local(&self) -> usize {
        self.local_queue.len()
    }

    pub fn pending_remote(&self) -> usize {
        self.remote_queue.len()
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.local_queue.clear();
        self.remote_queue.clear();
    }
}

// ============================================================================
// TESTS
// ============================================================================
