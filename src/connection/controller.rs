//! Connection Controller
//!
//! Öffentlicher Handle einer Verbindung. Jede Operation wird nur in die
//! Queue der Verbindung gestellt und kehrt sofort zurück; das Ergebnis kommt
//! als Callback (`*_with`) oder als Future.
//!
//! `close()` wirkt dagegen sofort: Kamera, Sinks und Tracks werden noch im
//! Aufruf freigegeben, danach feuert kein Callback mehr.

use super::actor::{Actor, CaptureRequest, Command, Envelope};
use super::events::EventHandlers;
use crate::config::IceServer;
use crate::media_engine::{
    CaptureMode, DeviceSelector, EngineEventSender, EngineHandle, PeerEngine,
};
use crate::negotiation::{
    IceCandidate, MediaTrackHandle, NegotiationError, SessionDescription, SignalingState,
    TrackKind,
};
use parking_lot::{Mutex, RwLock};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

// ============================================================================
// OPTIONS
// ============================================================================

/// Einstellungen für eine neue Verbindung
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Überschreibt die ICE Server aus der Engine-Konfiguration
    pub ice_servers: Option<Vec<IceServer>>,
    pub audio: bool,
    pub video: bool,
    pub capture_device: Option<DeviceSelector>,
    pub capture_mode: Option<CaptureMode>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            ice_servers: None,
            audio: true,
            video: true,
            capture_device: None,
            capture_mode: None,
        }
    }
}

impl ConnectionOptions {
    pub fn audio_only() -> Self {
        Self {
            video: false,
            ..Default::default()
        }
    }

    pub fn with_ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.ice_servers = Some(servers);
        self
    }

    fn track_kinds(&self) -> Vec<TrackKind> {
        let mut kinds = Vec::new();
        if self.audio {
            kinds.push(TrackKind::Audio);
        }
        if self.video {
            kinds.push(TrackKind::Video);
        }
        kinds
    }
}

// ============================================================================
// SHARED STATE
// ============================================================================

/// Lokale Medien einer Verbindung, gehören der Facade
#[derive(Debug, Default)]
pub(super) struct LocalMedia {
    pub(super) tracks: Vec<MediaTrackHandle>,
    pub(super) capture_started: bool,
}

/// Zustand, den Handle und Actor gemeinsam sehen
pub(super) struct Shared {
    pub(super) id: Uuid,
    pub(super) engine: EngineHandle,
    pub(super) local: Mutex<LocalMedia>,
    closed: AtomicBool,
    /// Lesend während jedes Callbacks gehalten; `close()` wartet schreibend
    /// auf laufende Callbacks, außer es wird selbst aus einem aufgerufen
    callbacks: RwLock<()>,
    state_tx: watch::Sender<SignalingState>,
}

thread_local! {
    /// Tiefe der Callbacks (aller Verbindungen) auf diesem Thread
    static CALLBACK_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct CallbackScope;

impl CallbackScope {
    fn enter() -> Self {
        CALLBACK_DEPTH.with(|depth| depth.set(depth.get() + 1));
        CallbackScope
    }

    fn active() -> bool {
        CALLBACK_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        CALLBACK_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

impl Shared {
    pub(super) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Führt einen Callback aus, solange die Verbindung offen ist
    pub(super) fn deliver(&self, callback: impl FnOnce()) -> bool {
        if self.is_closed() {
            return false;
        }
        let _guard = self.callbacks.read_recursive();
        // `close()` kann zwischen den beiden Prüfungen gelaufen sein
        if self.is_closed() {
            return false;
        }
        let _scope = CallbackScope::enter();
        callback();
        true
    }

    /// Veröffentlicht einen neuen Zustand; `Closed` wird nie überschrieben
    pub(super) fn publish_state(&self, state: SignalingState) -> bool {
        self.state_tx.send_if_modified(|current| {
            if *current == SignalingState::Closed || *current == state {
                false
            } else {
                *current = state;
                true
            }
        })
    }

    /// Gibt `false` zurück, wenn schon geschlossen
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        // Aus einem Callback heraus (egal welcher Verbindung) wird nicht
        // gewartet, sonst blockieren sich zwei Verbindungen gegenseitig
        if !CallbackScope::active() {
            drop(self.callbacks.write());
        }
        self.release_local_media();
        self.state_tx.send_replace(SignalingState::Closed);
        true
    }

    fn release_local_media(&self) {
        let (tracks, capture_started) = {
            let mut local = self.local.lock();
            (
                std::mem::take(&mut local.tracks),
                std::mem::replace(&mut local.capture_started, false),
            )
        };

        if capture_started {
            if let Err(e) = self.engine.stop_capture() {
                tracing::debug!("[{}] Failed to stop capture: {}", self.id, e);
            }
        }

        for track in &tracks {
            match self.engine.detach_all_sinks(track) {
                Ok(0) => {}
                Ok(n) => tracing::debug!("[{}] Detached {} sinks from {}", self.id, n, track.id),
                Err(e) => tracing::debug!("[{}] Failed to detach sinks: {}", self.id, e),
            }
            if let Err(e) = self.engine.release_track(track) {
                tracing::debug!("[{}] Failed to release track: {}", self.id, e);
            }
        }
    }
}

// ============================================================================
// CONTROLLER
// ============================================================================

type Reply<T> = Box<dyn FnOnce(Result<T, NegotiationError>) + Send>;

struct Inner {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Envelope>,
    state_rx: watch::Receiver<SignalingState>,
}

impl Inner {
    fn close(&self) {
        if self.shared.close() {
            // Weckt den Actor, damit er Handler und Peer freigibt
            let _ = self.tx.send(Envelope::Close);
            tracing::info!("[{}] Connection closed", self.shared.id);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle einer Verbindung
///
/// Klone teilen dieselbe Verbindung. Wird der letzte Klon verworfen, wird
/// die Verbindung geschlossen.
#[derive(Clone)]
pub struct ConnectionController {
    inner: Arc<Inner>,
}

impl ConnectionController {
    /// Erstellt die Peer-Engine, legt die lokalen Tracks an und startet den Actor
    pub async fn open(
        engine: &EngineHandle,
        options: ConnectionOptions,
        handlers: EventHandlers,
    ) -> Result<Self, NegotiationError> {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let events_tx = tx.clone();
        let events =
            EngineEventSender::new(move |event| events_tx.send(Envelope::Engine(event)).is_ok());

        let ice_servers = options
            .ice_servers
            .clone()
            .unwrap_or_else(|| engine.config().ice_servers.clone());
        let peer = engine
            .create_peer(&ice_servers, events)
            .await
            .map_err(|e| NegotiationError::Initialization(e.to_string()))?;

        let tracks = match add_local_tracks(id, engine, peer.as_ref(), &options).await {
            Ok(tracks) => tracks,
            Err(e) => {
                if let Err(close_err) = peer.close().await {
                    tracing::debug!("[{}] Failed to close peer: {}", id, close_err);
                }
                return Err(e);
            }
        };

        let capture_config = &engine.config().capture;
        let capture = CaptureRequest {
            selector: options
                .capture_device
                .clone()
                .unwrap_or_else(|| capture_config.device.clone()),
            mode: options.capture_mode.unwrap_or_else(|| {
                CaptureMode::new(capture_config.width, capture_config.height, capture_config.fps)
            }),
        };

        tracing::info!(
            "[{}] Connection opened ({} local tracks, {} ICE servers)",
            id,
            tracks.len(),
            ice_servers.len()
        );

        let (state_tx, state_rx) = watch::channel(SignalingState::Stable);
        let shared = Arc::new(Shared {
            id,
            engine: Arc::clone(engine),
            local: Mutex::new(LocalMedia {
                tracks,
                capture_started: false,
            }),
            closed: AtomicBool::new(false),
            callbacks: RwLock::new(()),
            state_tx,
        });

        Actor::spawn(Arc::clone(&shared), peer, handlers, capture, tx.clone(), rx);

        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                tx,
                state_rx,
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.inner.shared.id
    }

    pub fn signaling_state(&self) -> SignalingState {
        *self.inner.state_rx.borrow()
    }

    /// Beobachtet den Signaling-Zustand
    pub fn state_changes(&self) -> watch::Receiver<SignalingState> {
        self.inner.state_rx.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.is_closed()
    }

    pub fn local_tracks(&self) -> Vec<MediaTrackHandle> {
        self.inner.shared.local.lock().tracks.clone()
    }

    // ========================================================================
    // OPERATIONS (CALLBACK)
    // ========================================================================

    /// Erstellt ein Offer und wendet es lokal an
    ///
    /// `on_offer` bekommt die angewendete Description oder den Fehler.
    pub fn create_offer_with<F>(&self, on_offer: F) -> Result<(), NegotiationError>
    where
        F: FnOnce(Result<SessionDescription, NegotiationError>) + Send + 'static,
    {
        self.submit(Command::CreateOffer(Box::new(on_offer)))
    }

    /// Erstellt die Answer auf ein angewendetes Remote Offer
    pub fn create_answer_with<F>(&self, on_answer: F) -> Result<(), NegotiationError>
    where
        F: FnOnce(Result<SessionDescription, NegotiationError>) + Send + 'static,
    {
        self.submit(Command::CreateAnswer(Box::new(on_answer)))
    }

    pub fn apply_remote_description_with<F>(
        &self,
        description: SessionDescription,
        on_applied: F,
    ) -> Result<(), NegotiationError>
    where
        F: FnOnce(Result<(), NegotiationError>) + Send + 'static,
    {
        self.submit(Command::ApplyRemote(description, Box::new(on_applied)))
    }

    /// Fügt nachträglich einen lokalen Track hinzu
    ///
    /// Die Engine meldet danach in der Regel "renegotiation needed".
    pub fn add_local_track_with<F>(&self, kind: TrackKind, on_added: F) -> Result<(), NegotiationError>
    where
        F: FnOnce(Result<MediaTrackHandle, NegotiationError>) + Send + 'static,
    {
        self.submit(Command::AddLocalTrack(kind, Box::new(on_added)))
    }

    /// Candidate vom Remote-Peer, wird bis zur Remote Description gepuffert
    pub fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.submit(Command::AddIceCandidate(candidate))
    }

    // ========================================================================
    // OPERATIONS (ASYNC)
    // ========================================================================

    pub async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.request(|reply| self.create_offer_with(reply)).await
    }

    pub async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        self.request(|reply| self.create_answer_with(reply)).await
    }

    pub async fn apply_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.request(|reply| self.apply_remote_description_with(description, reply))
            .await
    }

    pub async fn add_local_track(&self, kind: TrackKind) -> Result<MediaTrackHandle, NegotiationError> {
        self.request(|reply| self.add_local_track_with(kind, reply)).await
    }

    /// Wartet, bis die Verbindung `target` erreicht
    ///
    /// Schlägt mit `ConnectionClosed` fehl, wenn sie vorher geschlossen wird.
    pub async fn wait_for_state(&self, target: SignalingState) -> Result<(), NegotiationError> {
        let mut rx = self.inner.state_rx.clone();
        let reached = rx
            .wait_for(|state| *state == target || *state == SignalingState::Closed)
            .await
            .map(|state| *state);

        match reached {
            Ok(state) if state == target => Ok(()),
            _ => Err(NegotiationError::ConnectionClosed),
        }
    }

    /// Schließt die Verbindung. Mehrfaches Schließen ist erlaubt.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Handle, der die Verbindung nicht offen hält
    pub fn downgrade(&self) -> WeakConnectionController {
        WeakConnectionController {
            id: self.id(),
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn submit(&self, command: Command) -> Result<(), NegotiationError> {
        if self.is_closed() {
            return Err(NegotiationError::ConnectionClosed);
        }
        self.inner
            .tx
            .send(Envelope::Command(command))
            .map_err(|_| NegotiationError::ConnectionClosed)
    }

    async fn request<T, S>(&self, submit: S) -> Result<T, NegotiationError>
    where
        T: Send + 'static,
        S: FnOnce(Reply<T>) -> Result<(), NegotiationError>,
    {
        let (tx, rx) = oneshot::channel();
        submit(Box::new(move |result: Result<T, NegotiationError>| {
            let _ = tx.send(result);
        }))?;
        // Ein verworfener Callback heißt: geschlossen
        rx.await.unwrap_or(Err(NegotiationError::ConnectionClosed))
    }
}

/// Schwacher Handle, z.B. für Hintergrund-Tasks
#[derive(Clone)]
pub struct WeakConnectionController {
    id: Uuid,
    inner: Weak<Inner>,
}

impl WeakConnectionController {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// `None`, sobald der letzte starke Handle verworfen wurde
    pub fn upgrade(&self) -> Option<ConnectionController> {
        self.inner.upgrade().map(|inner| ConnectionController { inner })
    }
}

impl std::fmt::Debug for ConnectionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionController")
            .field("id", &self.id())
            .field("state", &self.signaling_state())
            .finish()
    }
}

async fn add_local_tracks(
    id: Uuid,
    engine: &EngineHandle,
    peer: &dyn PeerEngine,
    options: &ConnectionOptions,
) -> Result<Vec<MediaTrackHandle>, NegotiationError> {
    let mut tracks = Vec::new();

    for kind in options.track_kinds() {
        let result = match engine.create_local_track(kind) {
            Ok(track) => {
                let added = peer
                    .add_track(&track)
                    .await
                    .map_err(|e| NegotiationError::Initialization(e.to_string()));
                tracks.push(track);
                added
            }
            Err(e) => Err(NegotiationError::Initialization(e.to_string())),
        };

        if let Err(e) = result {
            for track in &tracks {
                if let Err(release_err) = engine.release_track(track) {
                    tracing::debug!("[{}] Failed to release track: {}", id, release_err);
                }
            }
            return Err(e);
        }
    }

    Ok(tracks)
}
