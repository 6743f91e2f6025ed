//! Verbindet einen ConnectionController mit einem Signaling-Transport
//!
//! - [`SignalingForwarder`] schickt lokale Offers, Answers und Candidates raus
//! - [`spawn_bridge`] wendet eingehende Nachrichten auf den Controller an
//!
//! Die Bridge ruft den Controller nur über dessen Queue auf. Ein Offer, das
//! über den Loopback ankommt, löst die Answer also nie im Callback des
//! Senders aus.

use super::messages::SignalMessage;
use super::transport::{SignalingReceiver, SignalingTransport};
use crate::connection::{CandidateEvents, ConnectionController, SignalingEvents};
use crate::negotiation::{
    IceCandidate, NegotiationError, NegotiationErrorKind, SdpKind, SessionDescription,
    SignalingState,
};
use tokio::task::JoinHandle;

// ============================================================================
// OUTGOING
// ============================================================================

/// Leitet lokale Descriptions und Candidates an den Transport weiter
pub struct SignalingForwarder<T: SignalingTransport> {
    transport: T,
}

impl<T: SignalingTransport> SignalingForwarder<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    fn forward(&self, message: SignalMessage) {
        if let Err(e) = self.transport.send(&message) {
            tracing::warn!("Failed to forward signaling message: {}", e);
        }
    }
}

impl<T: SignalingTransport> SignalingEvents for SignalingForwarder<T> {
    fn on_local_offer(&self, description: &SessionDescription) {
        tracing::debug!("Sending offer ({} bytes)", description.sdp().len());
        self.forward(description.clone().into());
    }

    fn on_local_answer(&self, description: &SessionDescription) {
        tracing::debug!("Sending answer ({} bytes)", description.sdp().len());
        self.forward(description.clone().into());
    }

    fn on_negotiation_error(&self, kind: NegotiationErrorKind, detail: &str) {
        tracing::warn!("Negotiation error ({}): {}", kind, detail);
    }
}

impl<T: SignalingTransport> CandidateEvents for SignalingForwarder<T> {
    fn on_ice_candidate(&self, candidate: &IceCandidate) {
        self.forward(candidate.clone().into());
    }
}

// ============================================================================
// INCOMING
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeOptions {
    /// Auf ein eingehendes Offer automatisch antworten
    pub auto_answer: bool,
}

/// Pumpt eingehende Nachrichten in den Controller
///
/// Endet, wenn die Gegenseite den Transport schließt oder die Verbindung
/// geschlossen wird. Nachrichten werden streng in Empfangsreihenfolge
/// verarbeitet. Die Bridge hält die Verbindung nicht offen: wird der letzte
/// Handle verworfen, endet sie ebenfalls.
pub fn spawn_bridge(
    controller: ConnectionController,
    mut receiver: SignalingReceiver,
    options: BridgeOptions,
) -> JoinHandle<()> {
    let id = controller.id();
    let mut states = controller.state_changes();
    let connection = controller.downgrade();
    drop(controller);

    tokio::spawn(async move {
        let closed = async move {
            // Ein Fehler heißt: der Zustand ist schon verworfen
            let _ = states
                .wait_for(|state| *state == SignalingState::Closed)
                .await;
        };
        tokio::pin!(closed);

        loop {
            let message = tokio::select! {
                _ = &mut closed => break,
                message = receiver.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            let Some(controller) = connection.upgrade() else {
                break;
            };

            let result = match message {
                Ok(SignalMessage::Description(description)) => {
                    handle_description(&controller, description, options).await
                }
                Ok(SignalMessage::Candidate(candidate)) => controller.add_ice_candidate(candidate),
                Err(e) => {
                    tracing::warn!("[{}] Ignoring signaling message: {}", id, e);
                    Ok(())
                }
            };

            match result {
                Err(NegotiationError::ConnectionClosed) => break,
                // Bereits über on_negotiation_error gemeldet
                Err(e) => tracing::debug!("[{}] {}", id, e),
                Ok(()) => {}
            }
        }
        tracing::debug!("[{}] Signaling bridge stopped", id);
    })
}

async fn handle_description(
    controller: &ConnectionController,
    description: SessionDescription,
    options: BridgeOptions,
) -> Result<(), NegotiationError> {
    let is_offer = description.kind() == SdpKind::Offer;
    controller.apply_remote_description(description).await?;

    if is_offer && options.auto_answer {
        controller.create_answer().await?;
    }
    Ok(())
}
