//! WebRTC Peer-Engine auf Basis von webrtc-rs
//!
//! Pro Verbindung wird eine eigene API mit Default-Codecs und Interceptors
//! gebaut. Die Callbacks der Peer Connection werden in [`EngineEvent`]s
//! übersetzt und in die Queue der Verbindung gestellt.

use super::peer::{
    EngineEvent, EngineEventSender, EngineFuture, PeerEngine, PeerEngineError, PeerEngineFactory,
};
use crate::config::IceServer;
use crate::negotiation::{
    IceCandidate, IceConnectionState, MediaTrackHandle, SdpKind, SessionDescription, TrackKind,
};
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

/// Stream-ID aller lokalen Tracks
const STREAM_ID: &str = "wein";

// ============================================================================
// FACTORY
// ============================================================================

#[derive(Debug, Default)]
pub struct RtcEngineFactory;

impl RtcEngineFactory {
    pub fn new() -> Self {
        Self
    }
}

impl PeerEngineFactory for RtcEngineFactory {
    fn create_peer(
        &self,
        ice_servers: &[IceServer],
        events: EngineEventSender,
    ) -> EngineFuture<Arc<dyn PeerEngine>> {
        let ice_servers: Vec<RTCIceServer> = ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
                ..Default::default()
            })
            .collect();

        Box::pin(async move {
            let pc = Arc::new(create_peer_connection(ice_servers).await?);
            setup_peer_connection_handlers(&pc, events);
            let peer: Arc<dyn PeerEngine> = Arc::new(RtcPeer { pc });
            Ok(peer)
        })
    }
}

/// Erstellt eine neue Peer Connection
async fn create_peer_connection(
    ice_servers: Vec<RTCIceServer>,
) -> Result<RTCPeerConnection, PeerEngineError> {
    // Media Engine mit Default-Codecs (Opus, VP8, ...)
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(backend_error)?;

    // Interceptors für RTCP, NACK etc.
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine).map_err(backend_error)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };

    api.new_peer_connection(config).await.map_err(backend_error)
}

/// Registriert Event Handler für die Peer Connection
fn setup_peer_connection_handlers(pc: &Arc<RTCPeerConnection>, events: EngineEventSender) {
    // ICE Candidate Handler
    let events_clone = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        if let Some(c) = candidate {
            match c.to_json() {
                Ok(init) => {
                    let candidate = IceCandidate::new(
                        init.sdp_mid.unwrap_or_default(),
                        init.sdp_mline_index.unwrap_or_default(),
                        init.candidate,
                    );
                    events_clone.emit(EngineEvent::CandidateGenerated(candidate));
                }
                Err(e) => tracing::warn!("Failed to serialize ICE candidate: {}", e),
            }
        }
        Box::pin(async {})
    }));

    // Track Handler (eingehende Medien)
    let events_clone = events.clone();
    pc.on_track(Box::new(move |track, _, _| {
        let kind = match track.kind() {
            RTPCodecType::Video => TrackKind::Video,
            _ => TrackKind::Audio,
        };
        let handle = MediaTrackHandle::new(kind, track.id().to_string());
        tracing::info!("Received {} track {}", kind, handle.id);
        events_clone.emit(EngineEvent::TrackAdded(handle));
        Box::pin(async {})
    }));

    let events_clone = events.clone();
    pc.on_negotiation_needed(Box::new(move || {
        events_clone.emit(EngineEvent::RenegotiationNeeded);
        Box::pin(async {})
    }));

    pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
        tracing::info!("ICE connection state: {}", s);
        let state = match s {
            RTCIceConnectionState::Checking => IceConnectionState::Checking,
            RTCIceConnectionState::Connected => IceConnectionState::Connected,
            RTCIceConnectionState::Completed => IceConnectionState::Completed,
            RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
            RTCIceConnectionState::Failed => IceConnectionState::Failed,
            RTCIceConnectionState::Closed => IceConnectionState::Closed,
            _ => IceConnectionState::New,
        };
        events.emit(EngineEvent::IceConnectionStateChanged(state));
        Box::pin(async {})
    }));
}

fn backend_error(e: webrtc::Error) -> PeerEngineError {
    PeerEngineError::Backend(e.to_string())
}

fn rejected(e: webrtc::Error) -> PeerEngineError {
    PeerEngineError::Rejected(e.to_string())
}

fn to_rtc(description: &SessionDescription) -> Result<RTCSessionDescription, PeerEngineError> {
    if !description.is_well_formed() {
        return Err(PeerEngineError::InvalidSdp("missing version line".to_string()));
    }
    let sdp = description.sdp().to_string();
    let parsed = match description.kind() {
        SdpKind::Offer => RTCSessionDescription::offer(sdp),
        SdpKind::Answer => RTCSessionDescription::answer(sdp),
    };
    parsed.map_err(|e| PeerEngineError::InvalidSdp(e.to_string()))
}

fn from_rtc(description: RTCSessionDescription) -> Result<SessionDescription, PeerEngineError> {
    match description.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(description.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(description.sdp)),
        other => Err(PeerEngineError::Backend(format!(
            "unexpected description type {other}"
        ))),
    }
}

// ============================================================================
// PEER
// ============================================================================

struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
}

impl PeerEngine for RtcPeer {
    fn add_track(&self, track: &MediaTrackHandle) -> EngineFuture<()> {
        let pc = Arc::clone(&self.pc);
        let capability = match track.kind {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
        };
        let local = Arc::new(TrackLocalStaticRTP::new(
            capability,
            track.id.clone(),
            STREAM_ID.to_string(),
        ));

        Box::pin(async move {
            pc.add_track(local as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(backend_error)?;
            Ok(())
        })
    }

    fn create_offer(&self) -> EngineFuture<SessionDescription> {
        let pc = Arc::clone(&self.pc);
        Box::pin(async move { from_rtc(pc.create_offer(None).await.map_err(rejected)?) })
    }

    fn create_answer(&self) -> EngineFuture<SessionDescription> {
        let pc = Arc::clone(&self.pc);
        Box::pin(async move { from_rtc(pc.create_answer(None).await.map_err(rejected)?) })
    }

    fn set_local_description(&self, description: SessionDescription) -> EngineFuture<()> {
        let pc = Arc::clone(&self.pc);
        Box::pin(async move {
            let description = to_rtc(&description)?;
            pc.set_local_description(description).await.map_err(rejected)
        })
    }

    fn set_remote_description(&self, description: SessionDescription) -> EngineFuture<()> {
        let pc = Arc::clone(&self.pc);
        Box::pin(async move {
            let description = to_rtc(&description)?;
            pc.set_remote_description(description)
                .await
                .map_err(rejected)
        })
    }

    fn add_ice_candidate(&self, candidate: IceCandidate) -> EngineFuture<()> {
        let pc = Arc::clone(&self.pc);
        Box::pin(async move {
            let init = RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: Some(candidate.media_id),
                sdp_mline_index: Some(candidate.media_line_index),
                ..Default::default()
            };
            pc.add_ice_candidate(init).await.map_err(rejected)
        })
    }

    fn close(&self) -> EngineFuture<()> {
        let pc = Arc::clone(&self.pc);
        Box::pin(async move { pc.close().await.map_err(backend_error) })
    }
}

// ============================================================================
// TESTS
// ============================================================================
