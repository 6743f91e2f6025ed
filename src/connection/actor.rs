//! Actor einer Verbindung
//!
//! Eine einzige Queue nimmt Befehle der Anwendung, Engine-Events und die
//! Ergebnisse der Engine-Aufrufe auf. Engine-Aufrufe laufen als eigene Tasks
//! und stellen ihr Ergebnis zurück in die Queue, damit kein Callback je
//! innerhalb eines anderen ausgeführt wird.

use super::controller::Shared;
use super::events::{CandidateEvents, EventHandlers, SignalingEvents, TrackEvents};
use crate::media_engine::{CaptureMode, DeviceSelector, EngineEvent, PeerEngine, PeerEngineError};
use crate::negotiation::{
    CandidateCollector, IceCandidate, MediaTrackHandle, NegotiationError, NegotiationStateMachine,
    Operation, SdpKind, SessionDescription, TrackKind, Transition,
};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

pub(super) type DescriptionReply =
    Box<dyn FnOnce(Result<SessionDescription, NegotiationError>) + Send>;
pub(super) type AppliedReply = Box<dyn FnOnce(Result<(), NegotiationError>) + Send>;
pub(super) type TrackReply = Box<dyn FnOnce(Result<MediaTrackHandle, NegotiationError>) + Send>;

// ============================================================================
// QUEUE
// ============================================================================

pub(super) enum Envelope {
    Command(Command),
    Engine(EngineEvent),
    Completion(Completion),
    Close,
}

pub(super) enum Command {
    CreateOffer(DescriptionReply),
    CreateAnswer(DescriptionReply),
    ApplyRemote(SessionDescription, AppliedReply),
    AddIceCandidate(IceCandidate),
    AddLocalTrack(TrackKind, TrackReply),
}

/// Ergebnis eines Engine-Aufrufs
pub(super) enum Completion {
    Created(Result<SessionDescription, PeerEngineError>),
    LocalApplied(Result<(), PeerEngineError>),
    RemoteApplied(Result<(), PeerEngineError>),
    TrackAttached {
        track: MediaTrackHandle,
        result: Result<(), PeerEngineError>,
        reply: TrackReply,
    },
    CandidateRejected {
        candidate: IceCandidate,
        error: PeerEngineError,
    },
}

/// Kamera-Einstellungen der Verbindung
#[derive(Debug, Clone)]
pub(super) struct CaptureRequest {
    pub(super) selector: DeviceSelector,
    pub(super) mode: CaptureMode,
}

/// Die laufende Operation (höchstens eine)
enum Pending {
    Local {
        operation: Operation,
        /// Erzeugte, noch nicht angewendete Description
        description: Option<SessionDescription>,
        reply: DescriptionReply,
    },
    Remote {
        reply: AppliedReply,
    },
}

// ============================================================================
// ACTOR
// ============================================================================

pub(super) struct Actor {
    shared: Arc<Shared>,
    peer: Arc<dyn PeerEngine>,
    handlers: EventHandlers,
    capture: CaptureRequest,
    tx: mpsc::UnboundedSender<Envelope>,
    ice_tx: mpsc::UnboundedSender<IceCandidate>,

    machine: NegotiationStateMachine,
    collector: CandidateCollector,
    pending: Option<Pending>,
    remote_tracks: HashSet<String>,
}

impl Actor {
    pub(super) fn spawn(
        shared: Arc<Shared>,
        peer: Arc<dyn PeerEngine>,
        handlers: EventHandlers,
        capture: CaptureRequest,
        tx: mpsc::UnboundedSender<Envelope>,
        rx: mpsc::UnboundedReceiver<Envelope>,
    ) {
        let ice_tx = spawn_ice_worker(Arc::clone(&peer), tx.clone());
        let actor = Self {
            shared,
            peer,
            handlers,
            capture,
            tx,
            ice_tx,
            machine: NegotiationStateMachine::new(),
            collector: CandidateCollector::new(),
            pending: None,
            remote_tracks: HashSet::new(),
        };
        tokio::spawn(actor.run(rx));
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(envelope) = rx.recv().await {
            if self.shared.is_closed() {
                break;
            }
            match envelope {
                Envelope::Command(command) => self.handle_command(command),
                Envelope::Engine(event) => self.handle_engine_event(event),
                Envelope::Completion(completion) => self.handle_completion(completion),
                Envelope::Close => break,
            }
        }
        self.finish().await;
    }

    /// Verwirft alles Offene und schließt die Peer-Engine
    async fn finish(self) {
        let Self {
            shared,
            peer,
            handlers,
            ice_tx,
            mut machine,
            mut collector,
            pending,
            ..
        } = self;

        machine.close();
        collector.close();
        drop(pending);
        drop(handlers);
        drop(ice_tx);

        if let Err(e) = peer.close().await {
            tracing::debug!("[{}] Failed to close peer: {}", shared.id, e);
        }
        tracing::debug!("[{}] Actor stopped", shared.id);
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::CreateOffer(reply) => self.start_local(Operation::CreateOffer, reply),
            Command::CreateAnswer(reply) => self.start_local(Operation::CreateAnswer, reply),
            Command::ApplyRemote(description, reply) => self.start_remote(description, reply),
            Command::AddIceCandidate(candidate) => self.add_remote_candidate(candidate),
            Command::AddLocalTrack(kind, reply) => self.add_local_track(kind, reply),
        }
    }

    fn start_local(&mut self, operation: Operation, reply: DescriptionReply) {
        if let Err(e) = self.machine.begin(operation) {
            self.fail(reply, e);
            return;
        }
        tracing::debug!("[{}] {} started", self.shared.id, operation);

        self.ensure_capture();

        let future = match operation {
            Operation::CreateOffer => self.peer.create_offer(),
            _ => self.peer.create_answer(),
        };
        self.pending = Some(Pending::Local {
            operation,
            description: None,
            reply,
        });
        self.spawn_completion(async move { Completion::Created(future.await) });
    }

    fn start_remote(&mut self, description: SessionDescription, reply: AppliedReply) {
        if !description.is_well_formed() {
            self.fail(
                reply,
                NegotiationError::InvalidDescription(format!(
                    "remote {} is not a session description",
                    description.kind()
                )),
            );
            return;
        }

        let operation = Operation::apply_remote(description.kind());
        if let Err(e) = self.machine.begin(operation) {
            self.fail(reply, e);
            return;
        }
        tracing::debug!("[{}] {} started", self.shared.id, operation);

        let future = self.peer.set_remote_description(description);
        self.pending = Some(Pending::Remote { reply });
        self.spawn_completion(async move { Completion::RemoteApplied(future.await) });
    }

    fn add_remote_candidate(&mut self, candidate: IceCandidate) {
        match self.collector.on_remote_candidate_received(candidate) {
            Ok(Some(candidate)) => self.forward_to_engine(candidate),
            Ok(None) => tracing::debug!(
                "[{}] Buffered remote candidate ({} pending)",
                self.shared.id,
                self.collector.pending_remote()
            ),
            Err(e) => tracing::debug!("[{}] Dropped remote candidate: {}", self.shared.id, e),
        }
    }

    fn add_local_track(&mut self, kind: TrackKind, reply: TrackReply) {
        let track = match self.shared.engine.create_local_track(kind) {
            Ok(track) => track,
            Err(e) => {
                self.fail(reply, NegotiationError::Initialization(e.to_string()));
                return;
            }
        };

        {
            let mut local = self.shared.local.lock();
            if self.shared.is_closed() {
                drop(local);
                if let Err(e) = self.shared.engine.release_track(&track) {
                    tracing::debug!("[{}] Failed to release track: {}", self.shared.id, e);
                }
                return;
            }
            local.tracks.push(track.clone());
        }

        let future = self.peer.add_track(&track);
        self.spawn_completion(async move {
            Completion::TrackAttached {
                track,
                result: future.await,
                reply,
            }
        });
    }

    /// Startet die Kamera beim ersten Offer/Answer, sofern ein Video-Track existiert
    fn ensure_capture(&self) {
        let result = {
            let mut local = self.shared.local.lock();
            let has_video = local.tracks.iter().any(|t| t.kind == TrackKind::Video);
            if self.shared.is_closed() || local.capture_started || !has_video {
                return;
            }
            let result = self
                .shared
                .engine
                .start_capture(&self.capture.selector, self.capture.mode);
            local.capture_started = result.is_ok();
            result
        };

        match result {
            Ok(()) => tracing::info!(
                "[{}] Capture started ({}x{} @ {} fps)",
                self.shared.id,
                self.capture.mode.width,
                self.capture.mode.height,
                self.capture.mode.fps
            ),
            Err(e) => {
                tracing::warn!("[{}] Capture failed: {}", self.shared.id, e);
                self.notify_tracks(|h| h.on_device_error(&e));
            }
        }
    }

    // ========================================================================
    // ENGINE EVENTS
    // ========================================================================

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::CandidateGenerated(candidate) => {
                if let Some(candidate) = self.collector.on_local_candidate_generated(candidate) {
                    self.notify_candidates(|h| h.on_ice_candidate(&candidate));
                }
            }
            EngineEvent::TrackAdded(track) => {
                if !self.remote_tracks.insert(track.id.clone()) {
                    return;
                }
                let track = MediaTrackHandle {
                    enabled: true,
                    ..track
                };
                tracing::info!("[{}] Remote {} track {}", self.shared.id, track.kind, track.id);
                self.notify_tracks(|h| h.on_remote_track(&track));
            }
            EngineEvent::RenegotiationNeeded => {
                if self.machine.request_renegotiation() {
                    self.notify_signaling(|h| h.on_renegotiation_needed());
                } else {
                    tracing::debug!("[{}] Renegotiation queued", self.shared.id);
                }
            }
            EngineEvent::IceConnectionStateChanged(state) => {
                tracing::debug!("[{}] ICE connection state: {:?}", self.shared.id, state);
                self.notify_candidates(|h| h.on_ice_connection_state_change(state));
            }
        }
    }

    // ========================================================================
    // COMPLETIONS
    // ========================================================================

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Created(result) => self.on_created(result),
            Completion::LocalApplied(result) => self.on_local_applied(result),
            Completion::RemoteApplied(result) => self.on_remote_applied(result),
            Completion::TrackAttached {
                track,
                result,
                reply,
            } => self.on_track_attached(track, result, reply),
            Completion::CandidateRejected { candidate, error } => {
                tracing::warn!(
                    "[{}] Engine rejected candidate {}: {}",
                    self.shared.id,
                    candidate.candidate,
                    error
                );
                self.report(&NegotiationError::classify(error));
            }
        }
    }

    fn on_created(&mut self, result: Result<SessionDescription, PeerEngineError>) {
        let Some(Pending::Local {
            operation,
            description,
            ..
        }) = self.pending.as_mut()
        else {
            return;
        };

        let created = result.map_err(NegotiationError::classify).and_then(|created| {
            if Some(created.kind()) == operation.local_kind() {
                Ok(created)
            } else {
                Err(NegotiationError::NegotiationFailure(format!(
                    "engine produced {} for {}",
                    created.kind(),
                    operation
                )))
            }
        });

        match created {
            Ok(created) => {
                *description = Some(created.clone());
                let future = self.peer.set_local_description(created);
                self.spawn_completion(async move { Completion::LocalApplied(future.await) });
            }
            Err(e) => self.fail_pending(e),
        }
    }

    fn on_local_applied(&mut self, result: Result<(), PeerEngineError>) {
        if let Err(e) = result {
            self.fail_pending(NegotiationError::classify(e));
            return;
        }
        let Some(Pending::Local {
            description: Some(description),
            reply,
            ..
        }) = self.pending.take()
        else {
            return;
        };

        if let Some(transition) = self.machine.complete() {
            self.publish(transition);
        }

        let kind = description.kind();
        let for_reply = description.clone();
        self.shared.deliver(move || reply(Ok(for_reply)));
        self.notify_signaling(|h| match kind {
            SdpKind::Offer => h.on_local_offer(&description),
            SdpKind::Answer => h.on_local_answer(&description),
        });

        // Erst nach dem Apply-Callback: gepufferte Candidates in Erzeugungsreihenfolge
        let buffered = self.collector.on_local_description_applied();
        if !buffered.is_empty() {
            tracing::debug!(
                "[{}] Flushing {} local candidates",
                self.shared.id,
                buffered.len()
            );
        }
        for candidate in buffered {
            self.notify_candidates(|h| h.on_ice_candidate(&candidate));
        }

        self.check_queued_renegotiation();
    }

    fn on_remote_applied(&mut self, result: Result<(), PeerEngineError>) {
        if let Err(e) = result {
            self.fail_pending(NegotiationError::classify(e));
            return;
        }
        let Some(Pending::Remote { reply }) = self.pending.take() else {
            return;
        };

        if let Some(transition) = self.machine.complete() {
            self.publish(transition);
        }

        for candidate in self.collector.on_remote_description_applied() {
            self.forward_to_engine(candidate);
        }

        self.shared.deliver(move || reply(Ok(())));
        self.check_queued_renegotiation();
    }

    fn on_track_attached(
        &mut self,
        track: MediaTrackHandle,
        result: Result<(), PeerEngineError>,
        reply: TrackReply,
    ) {
        match result {
            Ok(()) => {
                tracing::info!("[{}] Added local {} track {}", self.shared.id, track.kind, track.id);
                self.shared.deliver(move || reply(Ok(track)));
            }
            Err(e) => {
                self.shared.local.lock().tracks.retain(|t| t.id != track.id);
                if let Err(release_err) = self.shared.engine.release_track(&track) {
                    tracing::debug!("[{}] Failed to release track: {}", self.shared.id, release_err);
                }
                self.fail(reply, NegotiationError::classify(e));
            }
        }
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn publish(&self, transition: Transition) {
        tracing::info!(
            "[{}] {}: {} -> {}",
            self.shared.id,
            transition.operation,
            transition.from,
            transition.to
        );
        if self.shared.publish_state(transition.to) {
            self.notify_signaling(|h| h.on_signaling_state_change(transition.to));
        }
    }

    fn check_queued_renegotiation(&mut self) {
        if self.machine.take_queued_renegotiation() {
            tracing::debug!("[{}] Delivering queued renegotiation", self.shared.id);
            self.notify_signaling(|h| h.on_renegotiation_needed());
        }
    }

    fn forward_to_engine(&self, candidate: IceCandidate) {
        if self.ice_tx.send(candidate).is_err() {
            tracing::debug!("[{}] ICE worker is gone", self.shared.id);
        }
    }

    /// Rollt die laufende Operation zurück und meldet den Fehler
    fn fail_pending(&mut self, error: NegotiationError) {
        if let Some(operation) = self.machine.abort() {
            tracing::warn!(
                "[{}] {} failed, state stays {}",
                self.shared.id,
                operation,
                self.machine.state()
            );
        }
        match self.pending.take() {
            Some(Pending::Local { reply, .. }) => self.fail(reply, error),
            Some(Pending::Remote { reply }) => self.fail(reply, error),
            None => self.report(&error),
        }
    }

    fn fail<T: 'static>(
        &self,
        reply: Box<dyn FnOnce(Result<T, NegotiationError>) + Send>,
        error: NegotiationError,
    ) {
        let for_reply = error.clone();
        self.shared.deliver(move || reply(Err(for_reply)));
        self.report(&error);
    }

    fn report(&self, error: &NegotiationError) {
        tracing::warn!("[{}] {}", self.shared.id, error);
        let detail = error.to_string();
        self.notify_signaling(|h| h.on_negotiation_error(error.kind(), &detail));
    }

    fn notify_signaling(&self, callback: impl FnOnce(&dyn SignalingEvents)) {
        if let Some(handler) = self.handlers.signaling() {
            self.shared.deliver(|| callback(handler.as_ref()));
        }
    }

    fn notify_candidates(&self, callback: impl FnOnce(&dyn CandidateEvents)) {
        if let Some(handler) = self.handlers.candidates() {
            self.shared.deliver(|| callback(handler.as_ref()));
        }
    }

    fn notify_tracks(&self, callback: impl FnOnce(&dyn TrackEvents)) {
        if let Some(handler) = self.handlers.tracks() {
            self.shared.deliver(|| callback(handler.as_ref()));
        }
    }

    fn spawn_completion<F>(&self, future: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let completion = future.await;
            // Nach dem Schließen hört niemand mehr zu
            let _ = tx.send(Envelope::Completion(completion));
        });
    }
}

/// Gibt Remote Candidates nacheinander an die Engine, in Empfangsreihenfolge
fn spawn_ice_worker(
    peer: Arc<dyn PeerEngine>,
    tx: mpsc::UnboundedSender<Envelope>,
) -> mpsc::UnboundedSender<IceCandidate> {
    let (ice_tx, mut ice_rx) = mpsc::unbounded_channel::<IceCandidate>();

    tokio::spawn(async move {
        while let Some(candidate) = ice_rx.recv().await {
            if let Err(error) = peer.add_ice_candidate(candidate.clone()).await {
                let rejected = Completion::CandidateRejected { candidate, error };
                if tx.send(Envelope::Completion(rejected)).is_err() {
                    break;
                }
            }
        }
    });

    ice_tx
}
