//! WebRTC Backend
//!
//! Production implementation of the backend seam on the `webrtc` crate.
//!
//! Device capture itself (microphone, camera, screen grabbing) belongs to
//! the embedding client; it wraps the sample tracks it feeds into
//! [`WebRtcLocalTrack`] and hands them to the core through a
//! [`MediaDevices`](super::MediaDevices) implementation.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use glossa_common::{IceCandidate, ParticipantId, SessionDescription};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTCRtpHeaderExtensionCapability, RTPCodecType,
};
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::{
    DataChannelHandle, MediaTrack, PeerConnector, PeerHandle, RemoteTrack, TrackKind,
};
use crate::config::RtcConfig;
use crate::error::RtcError;

/// RFC 6464 one-byte audio-level header extension.
const AUDIO_LEVEL_URI: &str = "urn:ietf:params:rtp-hdrext:ssrc-audio-level";

type Slot<T> = Arc<RwLock<Option<T>>>;

fn slot<T>() -> Slot<T> {
    Arc::new(RwLock::new(None))
}

/// Creates peer connections backed by the `webrtc` crate.
pub struct WebRtcConnector {
    api: Arc<API>,
    config: RtcConfig,
}

impl WebRtcConnector {
    /// Build the WebRTC API with the codecs and interceptors the platform
    /// negotiates.
    pub fn new(config: RtcConfig) -> Result<Self, RtcError> {
        let mut media_engine = MediaEngine::default();

        media_engine
            .register_codec(opus_codec(), RTPCodecType::Audio)
            .map_err(|e| RtcError::Backend(e.to_string()))?;

        for params in video_codecs() {
            media_engine
                .register_codec(params, RTPCodecType::Video)
                .map_err(|e| RtcError::Backend(e.to_string()))?;
        }

        // Negotiate per-packet audio levels so speaker detection has input.
        media_engine
            .register_header_extension(
                RTCRtpHeaderExtensionCapability {
                    uri: AUDIO_LEVEL_URI.to_owned(),
                },
                RTPCodecType::Audio,
                None,
            )
            .map_err(|e| RtcError::Backend(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| RtcError::Backend(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        info!("WebRTC connector initialized");

        Ok(Self {
            api: Arc::new(api),
            config,
        })
    }

    /// `RTCConfiguration` with ICE servers from config.
    #[must_use]
    fn rtc_config(&self) -> RTCConfiguration {
        let ice_servers = self
            .config
            .ice_servers()
            .into_iter()
            .map(|server| RTCIceServer {
                urls: server.urls,
                username: server.username.unwrap_or_default(),
                credential: server.credential.unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self, peer_id: ParticipantId) -> Result<Arc<dyn PeerHandle>, RtcError> {
        let pc = self.api.new_peer_connection(self.rtc_config()).await?;
        debug!(peer_id = %peer_id, "Created peer connection");
        Ok(WebRtcPeer::new(Arc::new(pc)))
    }
}

fn opus_codec() -> RTCRtpCodecParameters {
    RTCRtpCodecParameters {
        capability: RTCRtpCodecCapability {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
            rtcp_feedback: vec![],
        },
        payload_type: 111,
        ..Default::default()
    }
}

fn video_rtcp_feedback() -> Vec<RTCPFeedback> {
    [("goog-remb", ""), ("ccm", "fir"), ("nack", ""), ("nack", "pli")]
        .into_iter()
        .map(|(typ, parameter)| RTCPFeedback {
            typ: typ.to_string(),
            parameter: parameter.to_string(),
        })
        .collect()
}

fn video_codecs() -> Vec<RTCRtpCodecParameters> {
    // VP9 preferred, VP8 fallback, H.264 for clients with hardware encoders.
    let table: [(&str, u8, &str); 3] = [
        ("video/VP9", 98, "profile-id=0"),
        ("video/VP8", 96, ""),
        (
            "video/H264",
            102,
            "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
        ),
    ];

    table
        .into_iter()
        .map(|(mime_type, payload_type, fmtp)| RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: mime_type.to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: fmtp.to_string(),
                rtcp_feedback: video_rtcp_feedback(),
            },
            payload_type,
            ..Default::default()
        })
        .collect()
}

/// One peer connection wrapped for the core.
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    ice_cb: Slot<Box<dyn Fn(IceCandidate) + Send + Sync>>,
    track_cb: Slot<Box<dyn Fn(RemoteTrack) + Send + Sync>>,
    data_cb: Slot<Box<dyn Fn(Arc<dyn DataChannelHandle>) + Send + Sync>>,
    level_cb: Slot<Box<dyn Fn(f32) + Send + Sync>>,
}

impl WebRtcPeer {
    fn new(pc: Arc<RTCPeerConnection>) -> Arc<Self> {
        let peer = Arc::new(Self {
            pc: pc.clone(),
            ice_cb: slot(),
            track_cb: slot(),
            data_cb: slot(),
            level_cb: slot(),
        });

        let ice_cb = peer.ice_cb.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => {
                        if let Some(cb) = ice_cb.read().as_ref() {
                            cb(candidate_from_init(init));
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize ICE candidate"),
                }
            }
            Box::pin(async {})
        }));

        let track_cb = peer.track_cb.clone();
        let level_cb = peer.level_cb.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                RTPCodecType::Video => TrackKind::Video,
                RTPCodecType::Unspecified => {
                    warn!(track_id = %track.id(), "Ignoring track of unspecified kind");
                    return Box::pin(async {});
                }
            };

            let remote = RemoteTrack {
                id: track.id(),
                kind,
            };

            if kind == TrackKind::Audio {
                spawn_audio_level_reader(track, level_cb.clone());
            }

            if let Some(cb) = track_cb.read().as_ref() {
                cb(remote);
            }
            Box::pin(async {})
        }));

        let data_cb = peer.data_cb.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            debug!(label = %dc.label(), "Remote data channel announced");
            if let Some(cb) = data_cb.read().as_ref() {
                cb(Arc::new(WebRtcDataChannel { dc }) as Arc<dyn DataChannelHandle>);
            }
            Box::pin(async {})
        }));

        peer
    }
}

#[async_trait::async_trait]
impl PeerHandle for WebRtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription, RtcError> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, RtcError> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), RtcError> {
        let description = to_rtc_description(&description)?;
        self.pc.set_remote_description(description).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), RtcError> {
        self.pc.add_ice_candidate(init_from_candidate(candidate)).await?;
        Ok(())
    }

    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), RtcError> {
        let local = track
            .as_any()
            .downcast_ref::<WebRtcLocalTrack>()
            .ok_or_else(|| {
                RtcError::Backend("track was not created by the WebRTC backend".to_string())
            })?;

        let _sender = self.pc.add_track(local.local()).await?;
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannelHandle>, RtcError> {
        let dc = self.pc.create_data_channel(label, None).await?;
        Ok(Arc::new(WebRtcDataChannel { dc }))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "Error closing peer connection");
        }
    }

    fn on_ice_candidate(&self, callback: Box<dyn Fn(IceCandidate) + Send + Sync>) {
        *self.ice_cb.write() = Some(callback);
    }

    fn on_track(&self, callback: Box<dyn Fn(RemoteTrack) + Send + Sync>) {
        *self.track_cb.write() = Some(callback);
    }

    fn on_data_channel(&self, callback: Box<dyn Fn(Arc<dyn DataChannelHandle>) + Send + Sync>) {
        *self.data_cb.write() = Some(callback);
    }

    fn on_audio_level(&self, callback: Box<dyn Fn(f32) + Send + Sync>) {
        *self.level_cb.write() = Some(callback);
    }
}

/// Read RTP from a remote audio track and surface RFC 6464 levels.
fn spawn_audio_level_reader(
    track: Arc<TrackRemote>,
    level_cb: Slot<Box<dyn Fn(f32) + Send + Sync>>,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];

        loop {
            match track.read(&mut buf).await {
                Ok((packet, _attributes)) => {
                    // One-byte extension: bit 7 is the voice flag, bits 0-6
                    // carry the level as -dBov.
                    let level = packet
                        .header
                        .extensions
                        .iter()
                        .find(|ext| ext.payload.len() == 1)
                        .map(|ext| level_from_dbov(ext.payload[0] & 0x7F));

                    if let Some(level) = level {
                        if let Some(cb) = level_cb.read().as_ref() {
                            cb(level);
                        }
                    }
                }
                Err(e) => {
                    debug!(track_id = %track.id(), error = %e, "Remote audio track ended");
                    break;
                }
            }
        }

        // Final silence report so the speaker estimator releases the floor.
        if let Some(cb) = level_cb.read().as_ref() {
            cb(0.0);
        }
    });
}

/// Convert a -dBov byte to a linear 0.0-1.0 level. 127 means digital silence.
fn level_from_dbov(dbov: u8) -> f32 {
    if dbov >= 127 {
        0.0
    } else {
        10f32.powf(-f32::from(dbov) / 20.0)
    }
}

/// Ordered reliable data channel wrapped for the core.
pub struct WebRtcDataChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait::async_trait]
impl DataChannelHandle for WebRtcDataChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send(&self, payload: Bytes) -> Result<(), RtcError> {
        self.dc.send(&payload).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            warn!(label = %self.dc.label(), error = %e, "Error closing data channel");
        }
    }

    fn on_open(&self, callback: Box<dyn Fn() + Send + Sync>) {
        self.dc.on_open(Box::new(move || {
            callback();
            Box::pin(async {})
        }));
    }

    fn on_message(&self, callback: Box<dyn Fn(Bytes) + Send + Sync>) {
        self.dc.on_message(Box::new(move |message: DataChannelMessage| {
            callback(message.data);
            Box::pin(async {})
        }));
    }
}

/// Local track adapter around a webrtc-rs `TrackLocal`.
///
/// Capture pipelines construct these around the tracks they feed. The
/// enabled flag gates what the pipeline writes; disabling transmits
/// silence/black without detaching the track from peers.
pub struct WebRtcLocalTrack {
    id: String,
    kind: TrackKind,
    local: Arc<dyn TrackLocal + Send + Sync>,
    enabled: AtomicBool,
    ended: AtomicBool,
    ended_cbs: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
    level_cb: Slot<Box<dyn Fn(f32) + Send + Sync>>,
}

impl WebRtcLocalTrack {
    /// Wrap an audio track.
    #[must_use]
    pub fn audio(id: impl Into<String>, local: Arc<dyn TrackLocal + Send + Sync>) -> Arc<Self> {
        Self::new(id, TrackKind::Audio, local)
    }

    /// Wrap a video track.
    #[must_use]
    pub fn video(id: impl Into<String>, local: Arc<dyn TrackLocal + Send + Sync>) -> Arc<Self> {
        Self::new(id, TrackKind::Video, local)
    }

    fn new(
        id: impl Into<String>,
        kind: TrackKind,
        local: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            local,
            enabled: AtomicBool::new(true),
            ended: AtomicBool::new(false),
            ended_cbs: Mutex::new(Vec::new()),
            level_cb: slot(),
        })
    }

    /// The underlying webrtc-rs track, for attachment to a connection.
    #[must_use]
    pub fn local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.local.clone()
    }

    /// Capture pipelines report their measured RMS level here.
    ///
    /// Reports from a disabled or ended track are dropped so a muted
    /// microphone cannot hold the speaker floor.
    pub fn report_audio_level(&self, level: f32) {
        if !self.is_enabled() || self.is_ended() {
            return;
        }
        if let Some(cb) = self.level_cb.read().as_ref() {
            cb(level);
        }
    }
}

impl MediaTrack for WebRtcLocalTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn stop(&self) {
        if self.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        let callbacks = std::mem::take(&mut *self.ended_cbs.lock());
        for cb in callbacks {
            cb();
        }
    }

    fn on_ended(&self, callback: Box<dyn Fn() + Send + Sync>) {
        if self.is_ended() {
            callback();
            return;
        }
        self.ended_cbs.lock().push(callback);
    }

    fn on_audio_level(&self, callback: Box<dyn Fn(f32) + Send + Sync>) {
        *self.level_cb.write() = Some(callback);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn to_rtc_description(description: &SessionDescription) -> Result<RTCSessionDescription, RtcError> {
    use glossa_common::SdpKind;

    match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp.clone()),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp.clone()),
    }
    .map_err(|e| RtcError::Signaling(e.to_string()))
}

fn candidate_from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
    }
}

fn init_from_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        ..Default::default()
    }
}
