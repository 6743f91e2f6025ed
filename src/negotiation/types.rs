//! Datenmodell der Aushandlung
//!
//! Session Descriptions, ICE Candidates, Signaling-State und Track-Handles.
//! Die Serde-Darstellung entspricht dem Wire-Format des Signalings.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// SESSION DESCRIPTION
// ============================================================================

/// Typ einer Session Description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => write!(f, "offer"),
            SdpKind::Answer => write!(f, "answer"),
        }
    }
}

/// Unveränderliche Session Description (Offer oder Answer)
///
/// Das SDP selbst ist für den Core opak. Geprüft wird nur, ob der Text
/// überhaupt wie eine SDP-Beschreibung aussieht (siehe [`SessionDescription::is_well_formed`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    kind: SdpKind,
    sdp: String,
}

impl SessionDescription {
    pub fn new(kind: SdpKind, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        Self::new(SdpKind::Offer, sdp)
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self::new(SdpKind::Answer, sdp)
    }

    pub fn kind(&self) -> SdpKind {
        self.kind
    }

    pub fn sdp(&self) -> &str {
        &self.sdp
    }

    /// Jede SDP-Beschreibung beginnt mit der Protokoll-Version `v=`
    pub fn is_well_formed(&self) -> bool {
        self.sdp.trim_start().starts_with("v=")
    }
}

// ============================================================================
// ICE CANDIDATE
// ============================================================================

/// Ein ICE Candidate im Trickle-Format
///
/// Gleichheit über das komplette Tripel `{media_id, media_line_index, candidate}`
/// wird für die Duplikat-Erkennung verwendet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IceCandidate {
    #[serde(rename = "sdpMid")]
    pub media_id: String,
    #[serde(rename = "sdpMLineIndex")]
    pub media_line_index: u16,
    pub candidate: String,
}

impl IceCandidate {
    pub fn new(
        media_id: impl Into<String>,
        media_line_index: u16,
        candidate: impl Into<String>,
    ) -> Self {
        Self {
            media_id: media_id.into(),
            media_line_index,
            candidate: candidate.into(),
        }
    }
}

// ============================================================================
// SIGNALING STATE
// ============================================================================

/// Signaling-Phase einer Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SignalingState {
    #[default]
    Stable,
    HaveLocalOffer,
    /// Nur der Vollständigkeit halber, wird nie betreten
    HaveLocalAnswer,
    HaveRemoteOffer,
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveLocalAnswer => "have-local-answer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// ICE-Verbindungsstatus wie von der Engine gemeldet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

// ============================================================================
// TRACKS
// ============================================================================

/// Art eines Media-Tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Referenz auf einen Track
///
/// Lokale Tracks gehören der `MediaEngineFacade`, Remote-Tracks der Peer-Engine.
/// Der Handle selbst besitzt nichts; ob er noch gültig ist, weiß nur der Besitzer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaTrackHandle {
    pub kind: TrackKind,
    pub id: String,
    pub enabled: bool,
}

impl MediaTrackHandle {
    pub fn new(kind: TrackKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            enabled: true,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
