//! Negotiation Module - Offer/Answer und Trickle ICE
//!
//! Dieses Modul enthält den I/O-freien Kern:
//! - Datenmodell (Descriptions, Candidates, Signaling-State)
//! - Übergangstabelle des Signaling-States
//! - Candidate-Pufferung
//! - Fehler-Taxonomie

mod candidates;
mod error;
mod state_machine;
mod types;

pub use candidates::CandidateCollector;
pub use error::{NegotiationError, NegotiationErrorKind};
pub use state_machine::{NegotiationStateMachine, Operation, Transition};
pub use types::{
    IceCandidate, IceConnectionState, MediaTrackHandle, SdpKind, SessionDescription,
    SignalingState, TrackKind,
};
