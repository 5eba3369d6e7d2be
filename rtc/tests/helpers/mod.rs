//! Shared test fixtures: an in-memory backend double driving the session
//! core, plus event-wait helpers.

#![allow(dead_code)]

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use glossa_common::{IceCandidate, ParticipantId, RoomId, SessionDescription};
use glossa_rtc::backend::{
    DataChannelHandle, MediaConstraints, MediaDevices, MediaHandle, MediaTrack, PeerConnector,
    PeerHandle, RemoteTrack, TrackKind,
};
use glossa_rtc::{MeetingSession, RtcConfig, RtcError, SessionEvent, SessionSnapshot};
use parking_lot::Mutex;
use tokio::sync::broadcast;

type Callback<T> = Box<dyn Fn(T) + Send + Sync>;
type VoidCallback = Box<dyn Fn() + Send + Sync>;

/// A capture track double. Tests flip its enabled flag through the core and
/// drive platform-side events (track end, level reports) directly.
pub struct MockTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    ended: AtomicBool,
    ended_cbs: Mutex<Vec<VoidCallback>>,
    level_cb: Mutex<Option<Callback<f32>>>,
}

impl MockTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
            ended: AtomicBool::new(false),
            ended_cbs: Mutex::new(Vec::new()),
            level_cb: Mutex::new(None),
        })
    }

    /// Simulate a capture-side RMS level report.
    pub fn report_level(&self, level: f32) {
        if let Some(cb) = self.level_cb.lock().as_ref() {
            cb(level);
        }
    }
}

impl MediaTrack for MockTrack {
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

    fn on_ended(&self, callback: VoidCallback) {
        if self.is_ended() {
            callback();
            return;
        }
        self.ended_cbs.lock().push(callback);
    }

    fn on_audio_level(&self, callback: Callback<f32>) {
        *self.level_cb.lock() = Some(callback);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Capture backend double. Tests can arm the next acquisition to fail and
/// inspect every track handed out.
#[derive(Default)]
pub struct MockDevices {
    counter: AtomicUsize,
    pub fail_acquire: Mutex<Option<RtcError>>,
    pub fail_display: Mutex<Option<RtcError>>,
    /// Camera/mic tracks handed out, in order.
    pub local_tracks: Mutex<Vec<Arc<MockTrack>>>,
    /// Screen tracks handed out, in order.
    pub screen_tracks: Mutex<Vec<Arc<MockTrack>>>,
}

#[async_trait]
impl MediaDevices for MockDevices {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaHandle, RtcError> {
        if let Some(error) = self.fail_acquire.lock().take() {
            return Err(error);
        }

        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();

        if constraints.audio {
            let track = MockTrack::new(format!("audio-{n}"), TrackKind::Audio);
            self.local_tracks.lock().push(track.clone());
            tracks.push(track);
        }
        if constraints.video {
            let track = MockTrack::new(format!("video-{n}"), TrackKind::Video);
            self.local_tracks.lock().push(track.clone());
            tracks.push(track);
        }

        Ok(MediaHandle::new(format!("local-{n}"), tracks))
    }

    async fn acquire_display(&self) -> Result<MediaHandle, RtcError> {
        if let Some(error) = self.fail_display.lock().take() {
            return Err(error);
        }

        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let track = MockTrack::new(format!("screen-video-{n}"), TrackKind::Video);
        self.screen_tracks.lock().push(track.clone());

        Ok(MediaHandle::new(
            format!("screen-{n}"),
            vec![track as Arc<dyn MediaTrack>],
        ))
    }
}

/// Data channel double. Tests flip the open state and inject inbound
/// messages.
pub struct MockChannel {
    label: String,
    open: AtomicBool,
    pub sent: Mutex<Vec<Bytes>>,
    open_cbs: Mutex<Vec<VoidCallback>>,
    message_cbs: Mutex<Vec<Callback<Bytes>>>,
}

impl MockChannel {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            open: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            open_cbs: Mutex::new(Vec::new()),
            message_cbs: Mutex::new(Vec::new()),
        })
    }

    /// Transition the channel's open state, firing hooks on open.
    pub fn set_open(&self, open: bool) {
        let was_open = self.open.swap(open, Ordering::AcqRel);
        if open && !was_open {
            for cb in self.open_cbs.lock().iter() {
                cb();
            }
        }
    }

    /// Inject an inbound message.
    pub fn receive(&self, payload: Bytes) {
        for cb in self.message_cbs.lock().iter() {
            cb(payload.clone());
        }
    }
}

#[async_trait]
impl DataChannelHandle for MockChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn send(&self, payload: Bytes) -> Result<(), RtcError> {
        if !self.is_open() {
            return Err(RtcError::Backend("channel not open".to_string()));
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn on_open(&self, callback: VoidCallback) {
        self.open_cbs.lock().push(callback);
    }

    fn on_message(&self, callback: Callback<Bytes>) {
        self.message_cbs.lock().push(callback);
    }
}

/// Peer connection double recording every operation in order.
pub struct MockPeer {
    pub peer_id: ParticipantId,
    offer_counter: AtomicUsize,
    pub remote_descriptions: Mutex<Vec<SessionDescription>>,
    pub applied_candidates: Mutex<Vec<IceCandidate>>,
    pub added_tracks: Mutex<Vec<Arc<dyn MediaTrack>>>,
    pub channels: Mutex<Vec<Arc<MockChannel>>>,
    pub closed: AtomicBool,
    /// When set, `set_remote_description` rejects (malformed SDP).
    pub fail_remote_description: AtomicBool,

    ice_cb: Mutex<Option<Callback<IceCandidate>>>,
    track_cb: Mutex<Option<Callback<RemoteTrack>>>,
    data_cb: Mutex<Option<Callback<Arc<dyn DataChannelHandle>>>>,
    level_cb: Mutex<Option<Callback<f32>>>,
}

impl MockPeer {
    pub fn new(peer_id: ParticipantId) -> Arc<Self> {
        Arc::new(Self {
            peer_id,
            offer_counter: AtomicUsize::new(0),
            remote_descriptions: Mutex::new(Vec::new()),
            applied_candidates: Mutex::new(Vec::new()),
            added_tracks: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_remote_description: AtomicBool::new(false),
            ice_cb: Mutex::new(None),
            track_cb: Mutex::new(None),
            data_cb: Mutex::new(None),
            level_cb: Mutex::new(None),
        })
    }

    /// The locally created (outbound) message channel.
    pub fn out_channel(&self) -> Arc<MockChannel> {
        self.channels.lock().first().cloned().expect("channel not created")
    }

    /// Drive the local ICE agent producing a candidate.
    pub fn emit_ice(&self, candidate: IceCandidate) {
        if let Some(cb) = self.ice_cb.lock().as_ref() {
            cb(candidate);
        }
    }

    /// Drive a remote track arriving.
    pub fn emit_track(&self, track: RemoteTrack) {
        if let Some(cb) = self.track_cb.lock().as_ref() {
            cb(track);
        }
    }

    /// Drive a remote-announced data channel.
    pub fn announce_remote_channel(&self, channel: Arc<MockChannel>) {
        if let Some(cb) = self.data_cb.lock().as_ref() {
            cb(channel);
        }
    }

    /// Drive an audio-level report from this peer.
    pub fn emit_level(&self, level: f32) {
        if let Some(cb) = self.level_cb.lock().as_ref() {
            cb(level);
        }
    }
}

#[async_trait]
impl PeerHandle for MockPeer {
    async fn create_offer(&self) -> Result<SessionDescription, RtcError> {
        let n = self.offer_counter.fetch_add(1, Ordering::Relaxed);
        Ok(SessionDescription::offer(format!(
            "v=0 offer-{n} from {}",
            self.peer_id
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, RtcError> {
        Ok(SessionDescription::answer(format!(
            "v=0 answer from {}",
            self.peer_id
        )))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), RtcError> {
        if self.fail_remote_description.load(Ordering::Acquire) {
            return Err(RtcError::Signaling("malformed SDP".to_string()));
        }
        self.remote_descriptions.lock().push(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), RtcError> {
        self.applied_candidates.lock().push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), RtcError> {
        self.added_tracks.lock().push(track);
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannelHandle>, RtcError> {
        let channel = MockChannel::new(label);
        self.channels.lock().push(channel.clone());
        Ok(channel)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn on_ice_candidate(&self, callback: Callback<IceCandidate>) {
        *self.ice_cb.lock() = Some(callback);
    }

    fn on_track(&self, callback: Callback<RemoteTrack>) {
        *self.track_cb.lock() = Some(callback);
    }

    fn on_data_channel(&self, callback: Callback<Arc<dyn DataChannelHandle>>) {
        *self.data_cb.lock() = Some(callback);
    }

    fn on_audio_level(&self, callback: Callback<f32>) {
        *self.level_cb.lock() = Some(callback);
    }
}

/// Connection backend double. Keeps every handle it created so tests can
/// drive peer-side events.
#[derive(Default)]
pub struct MockConnector {
    peers: Mutex<HashMap<ParticipantId, Vec<Arc<MockPeer>>>>,
}

impl MockConnector {
    /// The most recent handle created for `peer_id`.
    pub fn peer(&self, peer_id: ParticipantId) -> Arc<MockPeer> {
        self.peers
            .lock()
            .get(&peer_id)
            .and_then(|handles| handles.last().cloned())
            .expect("peer not connected")
    }

    /// How many handles were created for `peer_id`.
    pub fn connection_count(&self, peer_id: ParticipantId) -> usize {
        self.peers.lock().get(&peer_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn connect(&self, peer_id: ParticipantId) -> Result<Arc<dyn PeerHandle>, RtcError> {
        let peer = MockPeer::new(peer_id);
        self.peers.lock().entry(peer_id).or_default().push(peer.clone());
        Ok(peer)
    }
}

/// A session wired to mock backends.
pub struct TestHarness {
    pub session: MeetingSession,
    pub devices: Arc<MockDevices>,
    pub connector: Arc<MockConnector>,
}

/// Initialize test logging once, driven by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn harness() -> TestHarness {
    harness_with_config(RtcConfig::default_for_test())
}

pub fn harness_with_config(config: RtcConfig) -> TestHarness {
    init_tracing();
    let devices = Arc::new(MockDevices::default());
    let connector = Arc::new(MockConnector::default());
    let session = MeetingSession::new(
        ParticipantId::new(),
        RoomId::new(),
        config,
        devices.clone(),
        connector.clone(),
    );
    TestHarness {
        session,
        devices,
        connector,
    }
}

/// Await a published snapshot matching the predicate.
pub async fn wait_for_snapshot(
    rx: &mut broadcast::Receiver<SessionEvent>,
    predicate: impl Fn(&SessionSnapshot) -> bool,
) -> Arc<SessionSnapshot> {
    let deadline = Duration::from_secs(2);
    tokio::time::timeout(deadline, async {
        loop {
            match rx.recv().await {
                Ok(SessionEvent::StateChanged(snapshot)) if predicate(&snapshot) => {
                    return snapshot;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for matching snapshot")
}

/// Await the next non-snapshot event matching the predicate.
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<SessionEvent>,
    predicate: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    let deadline = Duration::from_secs(2);
    tokio::time::timeout(deadline, async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for matching event")
}
