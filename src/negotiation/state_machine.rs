//! Signaling State Machine
//!
//! Reine Übergangstabelle ohne I/O. Jede Operation wird zuerst mit
//! [`NegotiationStateMachine::begin`] geprüft und als "in flight" markiert,
//! danach entweder mit [`NegotiationStateMachine::complete`] übernommen oder
//! mit [`NegotiationStateMachine::abort`] verworfen.
//!
//! | Zustand         | Operation         | Folgezustand    |
//! |-----------------|-------------------|-----------------|
//! | Stable          | CreateOffer       | HaveLocalOffer  |
//! | Stable          | ApplyRemoteOffer  | HaveRemoteOffer |
//! | HaveRemoteOffer | CreateAnswer      | Stable          |
//! | HaveLocalOffer  | ApplyRemoteAnswer | Stable          |
//! | nicht Closed    | close             | Closed          |

use super::error::NegotiationError;
use super::types::{SdpKind, SignalingState};
use std::fmt;

// ============================================================================
// OPERATIONS
// ============================================================================

/// Zustandsverändernde Operationen einer Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateOffer,
    CreateAnswer,
    ApplyRemoteOffer,
    ApplyRemoteAnswer,
}

impl Operation {
    /// Die Operation, die eine Remote Description dieses Typs anwendet
    pub fn apply_remote(kind: SdpKind) -> Self {
        match kind {
            SdpKind::Offer => Operation::ApplyRemoteOffer,
            SdpKind::Answer => Operation::ApplyRemoteAnswer,
        }
    }

    /// Typ der lokal erzeugten Description (nur für Create-Operationen)
    pub fn local_kind(self) -> Option<SdpKind> {
        match self {
            Operation::CreateOffer => Some(SdpKind::Offer),
            Operation::CreateAnswer => Some(SdpKind::Answer),
            _ => None,
        }
    }

    fn required_state(self) -> SignalingState {
        match self {
            Operation::CreateOffer | Operation::ApplyRemoteOffer => SignalingState::Stable,
            Operation::CreateAnswer => SignalingState::HaveRemoteOffer,
            Operation::ApplyRemoteAnswer => SignalingState::HaveLocalOffer,
        }
    }

    fn next_state(self) -> SignalingState {
        match self {
            Operation::CreateOffer => SignalingState::HaveLocalOffer,
            Operation::ApplyRemoteOffer => SignalingState::HaveRemoteOffer,
            Operation::CreateAnswer | Operation::ApplyRemoteAnswer => SignalingState::Stable,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::CreateOffer => "create-offer",
            Operation::CreateAnswer => "create-answer",
            Operation::ApplyRemoteOffer => "apply-remote-offer",
            Operation::ApplyRemoteAnswer => "apply-remote-answer",
        };
        f.write_str(name)
    }
}

/// Ein vollzogener Zustandswechsel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub operation: Operation,
    pub from: SignalingState,
    pub to: SignalingState,
}

// ============================================================================
// STATE MACHINE
// ============================================================================

/// Signaling-Zustand einer einzelnen Verbindung
#[derive(Debug, Default)]
pub struct NegotiationStateMachine {
    state: SignalingState,
    in_flight: Option<Operation>,
    renegotiation_queued: bool,
}

impl NegotiationStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SignalingState {
        self.state
    }

    pub fn in_flight(&self) -> Option<Operation> {
        self.in_flight
    }

    pub fn is_closed(&self) -> bool {
        self.state == SignalingState::Closed
    }

    /// Prüft eine Operation gegen den aktuellen Zustand und markiert sie als laufend
    ///
    /// Create-Operationen scheitern mit `InvalidStateTransition`, eine Remote
    /// Description vom falschen Typ mit `InvalidDescription`. Der Zustand bleibt
    /// in beiden Fällen unverändert.
    pub fn begin(&mut self, operation: Operation) -> Result<(), NegotiationError> {
        if self.is_closed() {
            return Err(NegotiationError::ConnectionClosed);
        }

        match operation {
            Operation::CreateOffer | Operation::CreateAnswer => {
                if self.in_flight.is_some() || self.state != operation.required_state() {
                    return Err(self.invalid_transition(operation));
                }
            }
            Operation::ApplyRemoteOffer | Operation::ApplyRemoteAnswer => {
                if self.state != operation.required_state() {
                    return Err(NegotiationError::InvalidDescription(format!(
                        "cannot apply remote {} in state {}",
                        if operation == Operation::ApplyRemoteOffer {
                            SdpKind::Offer
                        } else {
                            SdpKind::Answer
                        },
                        self.state
                    )));
                }
                if self.in_flight.is_some() {
                    return Err(self.invalid_transition(operation));
                }
            }
        }

        self.in_flight = Some(operation);
        Ok(())
    }

    /// Übernimmt die laufende Operation in den Folgezustand
    pub fn complete(&mut self) -> Option<Transition> {
        if self.is_closed() {
            return None;
        }
        let operation = self.in_flight.take()?;
        let from = self.state;
        self.state = operation.next_state();
        Some(Transition {
            operation,
            from,
            to: self.state,
        })
    }

    /// Verwirft die laufende Operation, der Zustand bleibt wie vor dem Versuch
    pub fn abort(&mut self) -> Option<Operation> {
        self.in_flight.take()
    }

    /// Schließt die Verbindung. Gibt `false` zurück, wenn sie schon geschlossen war.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = SignalingState::Closed;
        self.in_flight = None;
        self.renegotiation_queued = false;
        true
    }

    /// Die Engine meldet "renegotiation needed"
    ///
    /// Gibt `true` zurück, wenn die Meldung sofort weitergereicht werden darf.
    /// Andernfalls wird sie vorgemerkt und beim nächsten Übergang nach `Stable`
    /// erneut geprüft.
    pub fn request_renegotiation(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.is_idle_stable() {
            true
        } else {
            self.renegotiation_queued = true;
            false
        }
    }

    /// Liefert eine vorgemerkte Renegotiation, sobald der Zustand es erlaubt
    pub fn take_queued_renegotiation(&mut self) -> bool {
        if self.renegotiation_queued && self.is_idle_stable() {
            self.renegotiation_queued = false;
            true
        } else {
            false
        }
    }

    fn is_idle_stable(&self) -> bool {
        self.state == SignalingState::Stable && self.in_flight.is_none()
    }

    fn invalid_transition(&self, operation: Operation) -> NegotiationError {
        NegotiationError::InvalidStateTransition {
            operation,
            state: self.state,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
