//! Media Engine Facade
//!
//! Prozessweiter Zugang zur Media-Engine:
//! - Einmalige Initialisierung über [`initialize_once`] bzw. [`EngineCell`]
//! - Lokale Tracks und deren Sinks (Renderer)
//! - Kamera-Capture mit Referenzzählung
//! - Erzeugung der Peer-Engines für einzelne Verbindungen
//!
//! Nach [`MediaEngineFacade::shutdown`] schlägt jeder weitere Aufruf mit
//! `EngineClosed` fehl.

use super::capture::{CaptureBackend, CaptureDevice, CaptureMode, DeviceError, DeviceSelector, VirtualCapture};
use super::peer::{EngineEventSender, PeerEngine, PeerEngineFactory};
use super::rtc::RtcEngineFactory;
use super::simulated::SimulatedEngineFactory;
use crate::config::{EngineBackend, EngineConfig, IceServer};
use crate::negotiation::{MediaTrackHandle, TrackKind};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitializationError {
    #[error("Invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("Engine backend failed: {0}")]
    Backend(String),

    #[error("Media engine is shut down")]
    EngineClosed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FacadeError {
    #[error("Media engine is shut down")]
    EngineClosed,

    #[error("Unknown track: {0}")]
    UnknownTrack(String),
}

// ============================================================================
// SINKS
// ============================================================================

/// Ein Frame eines lokalen Tracks
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub track_id: String,
    pub kind: TrackKind,
    pub data: Vec<u8>,
}

/// Renderer oder sonstiger Abnehmer eines Tracks
pub trait MediaSink: Send + Sync {
    fn on_frame(&self, frame: &MediaFrame);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

struct TrackEntry {
    kind: TrackKind,
    enabled: bool,
    sinks: Vec<(SinkId, Arc<dyn MediaSink>)>,
}

struct CaptureSession {
    device: CaptureDevice,
    mode: CaptureMode,
    users: usize,
}

// ============================================================================
// FACADE
// ============================================================================

pub type EngineHandle = Arc<MediaEngineFacade>;

pub struct MediaEngineFacade {
    config: EngineConfig,
    factory: Arc<dyn PeerEngineFactory>,
    capture: Arc<dyn CaptureBackend>,
    tracks: Mutex<HashMap<String, TrackEntry>>,
    capture_session: Mutex<Option<CaptureSession>>,
    next_sink_id: AtomicU64,
    closed: AtomicBool,
}

impl MediaEngineFacade {
    /// Erstellt die Facade mit dem konfigurierten Backend
    pub fn new(config: EngineConfig) -> Result<Self, InitializationError> {
        validate_ice_servers(&config.ice_servers)?;

        let factory: Arc<dyn PeerEngineFactory> = match config.backend {
            EngineBackend::Rtc => Arc::new(RtcEngineFactory::new()),
            EngineBackend::Simulated => Arc::new(SimulatedEngineFactory::default()),
        };
        let capture = Arc::new(VirtualCapture::new(
            config.capture.devices.clone(),
            config.capture.permission_granted,
        ));

        tracing::info!("Media engine initialized ({:?} backend)", config.backend);
        Ok(Self::with_components(config, factory, capture))
    }

    /// Erstellt die Facade mit expliziten Komponenten
    pub fn with_components(
        config: EngineConfig,
        factory: Arc<dyn PeerEngineFactory>,
        capture: Arc<dyn CaptureBackend>,
    ) -> Self {
        Self {
            config,
            factory,
            capture,
            tracks: Mutex::new(HashMap::new()),
            capture_session: Mutex::new(None),
            next_sink_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Erstellt die Peer-Engine für eine neue Verbindung
    pub async fn create_peer(
        &self,
        ice_servers: &[IceServer],
        events: EngineEventSender,
    ) -> Result<Arc<dyn PeerEngine>, InitializationError> {
        if self.is_shut_down() {
            return Err(InitializationError::EngineClosed);
        }
        validate_ice_servers(ice_servers)?;

        self.factory
            .create_peer(ice_servers, events)
            .await
            .map_err(|e| InitializationError::Backend(e.to_string()))
    }

    // ========================================================================
    // TRACKS
    // ========================================================================

    /// Erstellt einen lokalen Track, der bis `release_track` der Facade gehört
    pub fn create_local_track(&self, kind: TrackKind) -> Result<MediaTrackHandle, FacadeError> {
        self.ensure_open()?;

        let track = MediaTrackHandle::new(kind, format!("{}-{}", kind, Uuid::new_v4()));
        self.tracks.lock().insert(
            track.id.clone(),
            TrackEntry {
                kind,
                enabled: true,
                sinks: Vec::new(),
            },
        );

        tracing::debug!("Created local {} track {}", kind, track.id);
        Ok(track)
    }

    /// Gibt einen Track frei. Danach ist der Handle ungültig.
    pub fn release_track(&self, track: &MediaTrackHandle) -> Result<(), FacadeError> {
        self.ensure_open()?;
        self.tracks
            .lock()
            .remove(&track.id)
            .map(|_| tracing::debug!("Released track {}", track.id))
            .ok_or_else(|| FacadeError::UnknownTrack(track.id.clone()))
    }

    pub fn is_track_live(&self, track: &MediaTrackHandle) -> bool {
        !self.is_shut_down() && self.tracks.lock().contains_key(&track.id)
    }

    /// Anzahl der noch nicht freigegebenen lokalen Tracks
    pub fn live_track_count(&self) -> usize {
        self.tracks.lock().len()
    }

    /// Aktiviert/deaktiviert einen Track und gibt den aktualisierten Handle zurück
    pub fn set_track_enabled(
        &self,
        track: &MediaTrackHandle,
        enabled: bool,
    ) -> Result<MediaTrackHandle, FacadeError> {
        self.ensure_open()?;
        let mut tracks = self.tracks.lock();
        let entry = tracks
            .get_mut(&track.id)
            .ok_or_else(|| FacadeError::UnknownTrack(track.id.clone()))?;
        entry.enabled = enabled;

        Ok(MediaTrackHandle {
            kind: entry.kind,
            id: track.id.clone(),
            enabled,
        })
    }

    pub fn attach_sink(
        &self,
        track: &MediaTrackHandle,
        sink: Arc<dyn MediaSink>,
    ) -> Result<SinkId, FacadeError> {
        self.ensure_open()?;
        let mut tracks = self.tracks.lock();
        let entry = tracks
            .get_mut(&track.id)
            .ok_or_else(|| FacadeError::UnknownTrack(track.id.clone()))?;

        let id = SinkId(self.next_sink_id.fetch_add(1, Ordering::Relaxed));
        entry.sinks.push((id, sink));
        Ok(id)
    }

    /// Entfernt einen Sink. `Ok(false)`, wenn er nicht (mehr) angehängt war.
    pub fn detach_sink(&self, track: &MediaTrackHandle, sink: SinkId) -> Result<bool, FacadeError> {
        self.ensure_open()?;
        let mut tracks = self.tracks.lock();
        let entry = tracks
            .get_mut(&track.id)
            .ok_or_else(|| FacadeError::UnknownTrack(track.id.clone()))?;

        let before = entry.sinks.len();
        entry.sinks.retain(|(id, _)| *id != sink);
        Ok(entry.sinks.len() != before)
    }

    /// Entfernt alle Sinks eines Tracks und gibt ihre Anzahl zurück
    pub fn detach_all_sinks(&self, track: &MediaTrackHandle) -> Result<usize, FacadeError> {
        self.ensure_open()?;
        let mut tracks = self.tracks.lock();
        let entry = tracks
            .get_mut(&track.id)
            .ok_or_else(|| FacadeError::UnknownTrack(track.id.clone()))?;
        Ok(entry.sinks.drain(..).count())
    }

    /// Reicht einen Frame an alle Sinks eines aktiven Tracks weiter
    ///
    /// Gibt die Anzahl der erreichten Sinks zurück.
    pub fn deliver_frame(&self, track: &MediaTrackHandle, data: &[u8]) -> Result<usize, FacadeError> {
        self.ensure_open()?;

        // Sinks außerhalb des Locks aufrufen
        let (frame, sinks) = {
            let tracks = self.tracks.lock();
            let entry = tracks
                .get(&track.id)
                .ok_or_else(|| FacadeError::UnknownTrack(track.id.clone()))?;
            if !entry.enabled {
                return Ok(0);
            }
            let frame = MediaFrame {
                track_id: track.id.clone(),
                kind: entry.kind,
                data: data.to_vec(),
            };
            let sinks: Vec<_> = entry.sinks.iter().map(|(_, s)| Arc::clone(s)).collect();
            (frame, sinks)
        };

        for sink in &sinks {
            sink.on_frame(&frame);
        }
        Ok(sinks.len())
    }

    // ========================================================================
    // CAPTURE
    // ========================================================================

    /// Startet die Kamera
    ///
    /// Läuft die Kamera bereits, muss die Anfrage zum aktiven Gerät und
    /// Modus passen; dann wird nur der Nutzerzähler erhöht.
    pub fn start_capture(&self, selector: &DeviceSelector, mode: CaptureMode) -> Result<(), DeviceError> {
        if self.is_shut_down() {
            return Err(DeviceError::EngineClosed);
        }

        let mut session = self.capture_session.lock();
        if let Some(active) = session.as_mut() {
            if selector.select(std::slice::from_ref(&active.device)).is_none() {
                let devices = self.capture.devices();
                return Err(match selector.select(&devices) {
                    Some(_) => DeviceError::DeviceBusy(active.device.name.clone()),
                    None => DeviceError::NoMatchingDevice(selector.clone()),
                });
            }
            if active.mode != mode {
                return Err(DeviceError::UnsupportedMode(format!(
                    "{}x{}@{} while {} runs at {}x{}@{}",
                    mode.width,
                    mode.height,
                    mode.fps,
                    active.device.name,
                    active.mode.width,
                    active.mode.height,
                    active.mode.fps
                )));
            }

            active.users += 1;
            tracing::debug!(
                "Capture already running on {} ({} users)",
                active.device.name,
                active.users
            );
            return Ok(());
        }

        let devices = self.capture.devices();
        let device = selector
            .select(&devices)
            .cloned()
            .ok_or_else(|| DeviceError::NoMatchingDevice(selector.clone()))?;

        self.capture.open(&device, mode)?;
        *session = Some(CaptureSession {
            device,
            mode,
            users: 1,
        });
        Ok(())
    }

    /// Gibt einen Capture-Nutzer frei, beim letzten wird das Gerät geschlossen
    pub fn stop_capture(&self) -> Result<(), DeviceError> {
        if self.is_shut_down() {
            return Err(DeviceError::EngineClosed);
        }

        let mut session = self.capture_session.lock();
        let Some(active) = session.as_mut() else {
            return Ok(());
        };

        active.users -= 1;
        if active.users == 0 {
            self.capture.close(&active.device);
            *session = None;
        }
        Ok(())
    }

    pub fn is_capturing(&self) -> bool {
        self.capture_session.lock().is_some()
    }

    /// Aktueller Capture-Modus, falls die Kamera läuft
    pub fn capture_mode(&self) -> Option<CaptureMode> {
        self.capture_session.lock().as_ref().map(|s| s.mode)
    }

    // ========================================================================
    // SHUTDOWN
    // ========================================================================

    /// Gibt alle Ressourcen der Engine frei
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(active) = self.capture_session.lock().take() {
            self.capture.close(&active.device);
        }
        self.tracks.lock().clear();

        tracing::info!("Media engine shut down");
    }

    fn ensure_open(&self) -> Result<(), FacadeError> {
        if self.is_shut_down() {
            Err(FacadeError::EngineClosed)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for MediaEngineFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaEngineFacade")
            .field("backend", &self.config.backend)
            .field("tracks", &self.tracks.lock().len())
            .field("capturing", &self.is_capturing())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn validate_ice_servers(servers: &[IceServer]) -> Result<(), InitializationError> {
    for server in servers {
        if server.urls.is_empty() {
            return Err(InitializationError::InvalidConfig(
                "ICE server without URL".to_string(),
            ));
        }
        for url in &server.urls {
            let known = ["stun:", "stuns:", "turn:", "turns:"]
                .iter()
                .any(|scheme| url.starts_with(scheme));
            if !known {
                return Err(InitializationError::InvalidConfig(format!(
                    "unsupported ICE server URL: {url}"
                )));
            }
        }
    }
    Ok(())
}

// ============================================================================
// ONE-TIME INITIALIZATION
// ============================================================================

/// Einmal belegbarer Platz für die Engine
///
/// Der erste erfolgreiche Aufruf legt die Engine an, alle weiteren geben
/// dieselbe Instanz zurück (die übergebene Konfiguration wird dann ignoriert).
pub struct EngineCell {
    cell: OnceCell<EngineHandle>,
}

impl EngineCell {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    pub fn initialize_once(&self, config: EngineConfig) -> Result<EngineHandle, InitializationError> {
        self.initialize_with(|| MediaEngineFacade::new(config))
    }

    pub fn initialize_with<F>(&self, init: F) -> Result<EngineHandle, InitializationError>
    where
        F: FnOnce() -> Result<MediaEngineFacade, InitializationError>,
    {
        if let Some(existing) = self.cell.get() {
            tracing::debug!("Media engine already initialized");
            return Ok(Arc::clone(existing));
        }
        self.cell.get_or_try_init(|| init().map(Arc::new)).cloned()
    }

    pub fn get(&self) -> Option<EngineHandle> {
        self.cell.get().cloned()
    }
}

impl Default for EngineCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Prozessweite Engine
static ENGINE: EngineCell = EngineCell::new();

/// Initialisiert die prozessweite Engine (idempotent)
pub fn initialize_once(config: EngineConfig) -> Result<EngineHandle, InitializationError> {
    ENGINE.initialize_once(config)
}

// ============================================================================
// TESTS
// ============================================================================
