//! Message Types für den Austausch zwischen zwei Peers
//!
//! Description: `{"type": "offer"|"answer", "sdp": "..."}`
//! Candidate:   `{"candidate": "...", "sdpMid": "0", "sdpMLineIndex": 0}`

use super::transport::SignalingError;
use crate::negotiation::{IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};

/// Eine Signaling-Nachricht auf der Leitung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalMessage {
    Description(SessionDescription),
    Candidate(IceCandidate),
}

impl SignalMessage {
    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self).map_err(|e| SignalingError::Malformed(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text).map_err(|e| SignalingError::Malformed(e.to_string()))
    }
}

impl From<SessionDescription> for SignalMessage {
    fn from(description: SessionDescription) -> Self {
        SignalMessage::Description(description)
    }
}

impl From<IceCandidate> for SignalMessage {
    fn from(candidate: IceCandidate) -> Self {
        SignalMessage::Candidate(candidate)
    }
}

// ============================================================================
// TESTS
// ============================================================================
