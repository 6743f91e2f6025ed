//! Fehler-Taxonomie der Aushandlung
//!
//! Alle Engine-Fehler werden hier klassifiziert, bevor sie die Anwendung erreichen.

use super::state_machine::Operation;
use super::types::SignalingState;
use crate::media_engine::{DeviceError, PeerEngineError};
use std::fmt;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Operation {operation} not allowed in state {state}")]
    InvalidStateTransition {
        operation: Operation,
        state: SignalingState,
    },

    #[error("Invalid description: {0}")]
    InvalidDescription(String),

    #[error("Negotiation failed: {0}")]
    NegotiationFailure(String),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Connection is closed")]
    ConnectionClosed,
}

/// Kategorie eines Fehlers, wie sie an `on_negotiation_error` gemeldet wird
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationErrorKind {
    Initialization,
    InvalidStateTransition,
    InvalidDescription,
    NegotiationFailure,
    Device,
    ConnectionClosed,
}

impl fmt::Display for NegotiationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl NegotiationError {
    pub fn kind(&self) -> NegotiationErrorKind {
        match self {
            NegotiationError::Initialization(_) => NegotiationErrorKind::Initialization,
            NegotiationError::InvalidStateTransition { .. } => {
                NegotiationErrorKind::InvalidStateTransition
            }
            NegotiationError::InvalidDescription(_) => NegotiationErrorKind::InvalidDescription,
            NegotiationError::NegotiationFailure(_) => NegotiationErrorKind::NegotiationFailure,
            NegotiationError::Device(_) => NegotiationErrorKind::Device,
            NegotiationError::ConnectionClosed => NegotiationErrorKind::ConnectionClosed,
        }
    }

    /// Ordnet einen rohen Engine-Fehler in die Taxonomie ein
    pub fn classify(error: PeerEngineError) -> Self {
        match error {
            PeerEngineError::InvalidSdp(detail) => NegotiationError::InvalidDescription(detail),
            PeerEngineError::Rejected(detail) | PeerEngineError::Backend(detail) => {
                NegotiationError::NegotiationFailure(detail)
            }
            PeerEngineError::Closed => NegotiationError::ConnectionClosed,
        }
    }
}

impl From<PeerEngineError> for NegotiationError {
    fn from(error: PeerEngineError) -> Self {
        Self::classify(error)
    }
}

// ============================================================================
// TESTS
// ============================================================================
