//! Media Engine Module - Zugang zur WebRTC-Engine
//!
//! Dieses Modul verwaltet:
//! - Die prozessweite Media-Engine (einmalige Initialisierung)
//! - Lokale Tracks, Sinks und Kamera-Capture
//! - Peer-Engines pro Verbindung (webrtc-rs oder simuliert)

mod capture;
mod facade;
mod peer;
mod rtc;
mod simulated;

pub use capture::{
    CaptureBackend, CaptureDevice, CaptureMode, DeviceError, DeviceSelector, Facing, VirtualCapture,
};
pub use facade::{
    initialize_once, EngineCell, EngineHandle, FacadeError, InitializationError, MediaEngineFacade,
    MediaFrame, MediaSink, SinkId,
};
pub use peer::{
    EngineEvent, EngineEventSender, EngineFuture, PeerEngine, PeerEngineError, PeerEngineFactory,
};
pub use rtc::RtcEngineFactory;
pub use simulated::{SimulatedBehavior, SimulatedControl, SimulatedEngineFactory};
