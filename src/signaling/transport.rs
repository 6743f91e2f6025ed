//! Signaling Transport
//!
//! Der eigentliche Transport (WebSocket, Server, ...) liegt außerhalb. Für
//! Tests und den Loopback gibt es eine In-Memory-Variante: zwei JSON-Kanäle
//! über `mpsc`, sodass jede Nachricht als eigener Schritt zugestellt wird
//! und nie synchron beim Empfänger landet.

use super::messages::SignalMessage;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Not connected to remote peer")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Sendeseite eines Signaling-Transports
pub trait SignalingTransport: Send + Sync {
    fn send(&self, message: &SignalMessage) -> Result<(), SignalingError>;
}

// ============================================================================
// IN-MEMORY TRANSPORT
// ============================================================================

/// Sendet JSON-Nachrichten an die Gegenseite
#[derive(Debug, Clone)]
pub struct SignalingSender {
    tx: mpsc::UnboundedSender<String>,
}

impl SignalingTransport for SignalingSender {
    fn send(&self, message: &SignalMessage) -> Result<(), SignalingError> {
        let text = message.to_json()?;
        self.tx
            .send(text)
            .map_err(|_| SignalingError::NotConnected)
    }
}

/// Empfängt die Nachrichten der Gegenseite
#[derive(Debug)]
pub struct SignalingReceiver {
    rx: mpsc::UnboundedReceiver<String>,
}

impl SignalingReceiver {
    /// `None`, sobald die Gegenseite weg ist
    pub async fn recv(&mut self) -> Option<Result<SignalMessage, SignalingError>> {
        let text = self.rx.recv().await?;
        Some(SignalMessage::from_json(&text))
    }
}

/// Ein Ende der In-Memory-Leitung
#[derive(Debug)]
pub struct InMemoryEndpoint {
    pub sender: SignalingSender,
    pub receiver: SignalingReceiver,
}

pub struct InMemorySignaling;

impl InMemorySignaling {
    /// Zwei verbundene Enden
    pub fn pair() -> (InMemoryEndpoint, InMemoryEndpoint) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();

        (
            InMemoryEndpoint {
                sender: SignalingSender { tx: a_tx },
                receiver: SignalingReceiver { rx: a_rx },
            },
            InMemoryEndpoint {
                sender: SignalingSender { tx: b_tx },
                receiver: SignalingReceiver { rx: b_rx },
            },
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
