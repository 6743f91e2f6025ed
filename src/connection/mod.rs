//! Connection Module - Aushandlung einer einzelnen Peer-Verbindung
//!
//! Dieses Modul verwaltet:
//! - Den Actor pro Verbindung (eine Queue für Befehle, Events und Completions)
//! - Offer/Answer, Candidates und Remote Tracks
//! - Die Event-Schnittstellen zur Anwendung

mod actor;
mod controller;
mod events;

pub use controller::{ConnectionController, ConnectionOptions, WeakConnectionController};
pub use events::{CandidateEvents, EventHandlers, SignalingEvents, TrackEvents};
