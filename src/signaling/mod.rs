//! Signaling Module - Austausch von Descriptions und Candidates
//!
//! Dieses Modul verwaltet:
//! - Das Wire-Format der Nachrichten
//! - Den Transport zwischen zwei Peers (In-Memory für Tests und Loopback)
//! - Die Bridge zwischen Transport und ConnectionController

mod bridge;
mod messages;
mod transport;

pub use bridge::{spawn_bridge, BridgeOptions, SignalingForwarder};
pub use messages::SignalMessage;
pub use transport::{
    InMemoryEndpoint, InMemorySignaling, SignalingError, SignalingReceiver, SignalingSender,
    SignalingTransport,
};
