//! Scriptable collaborators for tests and the demo binary.

use crate::calls::{
    CallDependencies, CallManager, InMemoryCallHistory, MediaDeviceController, MediaError,
    MediaHandle, NegotiationEngine, NegotiationError, NegotiationObserver, RemoteDescriptor,
    SignalingChannel, SignalingError, Tone, TonePlayer,
};
use crate::config::CallManagerConfig;
use crate::loopback::LoopbackRelay;
use async_trait::async_trait;
use callcore::{
    CallState, CameraFacing, MediaKind, OutboundSignal, ParticipantId, SessionId, StateChange,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Camera/microphone stand-in that counts every acquire and release.
#[derive(Debug, Default)]
pub struct MockMediaDevices {
    next_id: AtomicU64,
    acquired: AtomicUsize,
    released: AtomicUsize,
    reservations: AtomicUsize,
    cancelled_reservations: AtomicUsize,
    live: Mutex<HashMap<u64, MediaHandle>>,
    muted: Mutex<HashMap<u64, bool>>,
    video_enabled: Mutex<HashMap<u64, bool>>,
    deny_permission: AtomicBool,
    fail_switch: AtomicBool,
    acquire_delay: Mutex<Option<Duration>>,
}

impl MockMediaDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every later acquire fails with [`MediaError::PermissionDenied`].
    pub fn deny_permission(&self) {
        self.deny_permission.store(true, Ordering::SeqCst);
    }

    pub fn fail_switch(&self) {
        self.fail_switch.store(true, Ordering::SeqCst);
    }

    /// Make acquisition take `delay` before answering.
    pub fn set_acquire_delay(&self, delay: Duration) {
        *self.acquire_delay.lock().unwrap() = Some(delay);
    }

    pub fn acquire_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.load(Ordering::SeqCst)
    }

    pub fn cancelled_reservation_count(&self) -> usize {
        self.cancelled_reservations.load(Ordering::SeqCst)
    }

    pub fn live_handles(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// The most recently opened handle that is still live.
    pub fn live_handle(&self) -> Option<MediaHandle> {
        self.live
            .lock()
            .unwrap()
            .values()
            .max_by_key(|handle| handle.id)
            .cloned()
    }

    pub fn is_muted(&self, handle: &MediaHandle) -> bool {
        self.muted
            .lock()
            .unwrap()
            .get(&handle.id)
            .copied()
            .unwrap_or(false)
    }

    pub fn is_video_enabled(&self, handle: &MediaHandle) -> bool {
        self.video_enabled
            .lock()
            .unwrap()
            .get(&handle.id)
            .copied()
            .unwrap_or(handle.kind.is_video())
    }

    fn open(&self, kind: MediaKind, facing: CameraFacing) -> MediaHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = MediaHandle { id, kind, facing };
        self.live.lock().unwrap().insert(id, handle.clone());
        self.acquired.fetch_add(1, Ordering::SeqCst);
        handle
    }

    fn check_live(&self, handle: &MediaHandle) -> Result<(), MediaError> {
        if self.live.lock().unwrap().contains_key(&handle.id) {
            Ok(())
        } else {
            Err(MediaError::DeviceUnavailable(format!(
                "handle {} is not live",
                handle.id
            )))
        }
    }
}

#[async_trait]
impl MediaDeviceController for MockMediaDevices {
    fn reserve(&self, _kind: MediaKind) {
        self.reservations.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel_reservation(&self) {
        self.cancelled_reservations.fetch_add(1, Ordering::SeqCst);
    }

    async fn acquire(
        &self,
        kind: MediaKind,
        facing: CameraFacing,
    ) -> Result<MediaHandle, MediaError> {
        let delay = *self.acquire_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.deny_permission.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }
        Ok(self.open(kind, facing))
    }

    fn release(&self, handle: &MediaHandle) {
        if self.live.lock().unwrap().remove(&handle.id).is_some() {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn set_muted(&self, handle: &MediaHandle, muted: bool) -> Result<(), MediaError> {
        self.check_live(handle)?;
        self.muted.lock().unwrap().insert(handle.id, muted);
        Ok(())
    }

    fn set_video_enabled(&self, handle: &MediaHandle, enabled: bool) -> Result<(), MediaError> {
        self.check_live(handle)?;
        self.video_enabled.lock().unwrap().insert(handle.id, enabled);
        Ok(())
    }

    async fn switch_facing(&self, handle: &MediaHandle) -> Result<MediaHandle, MediaError> {
        self.check_live(handle)?;
        if self.fail_switch.load(Ordering::SeqCst) {
            return Err(MediaError::DeviceUnavailable("no other camera".into()));
        }
        self.release(handle);
        Ok(self.open(handle.kind, handle.facing.opposite()))
    }
}

/// Negotiation engine driven by the test.
#[derive(Debug, Default)]
pub struct MockNegotiationEngine {
    auto_connect: AtomicBool,
    fail_start: AtomicBool,
    observers: Mutex<HashMap<SessionId, NegotiationObserver>>,
    started: Mutex<Vec<RemoteDescriptor>>,
    stopped: Mutex<Vec<SessionId>>,
    replaced: AtomicUsize,
}

impl MockNegotiationEngine {
    /// Reports `connected` as soon as it is started.
    pub fn auto_connecting() -> Arc<Self> {
        let engine = Self::default();
        engine.auto_connect.store(true, Ordering::SeqCst);
        Arc::new(engine)
    }

    /// Waits for [`connect`](Self::connect) / [`fail`](Self::fail).
    pub fn manual() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn connect(&self, call_id: &SessionId) {
        if let Some(observer) = self.observer(call_id) {
            observer.connected();
        }
    }

    pub fn fail(&self, call_id: &SessionId, reason: &str) {
        if let Some(observer) = self.observer(call_id) {
            observer.failed(NegotiationError::Failed(reason.to_string()));
        }
    }

    pub fn drop_connection(&self, call_id: &SessionId) {
        if let Some(observer) = self.observer(call_id) {
            observer.connection_lost();
        }
    }

    pub fn started(&self) -> Vec<RemoteDescriptor> {
        self.started.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<SessionId> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn replaced_count(&self) -> usize {
        self.replaced.load(Ordering::SeqCst)
    }

    fn observer(&self, call_id: &SessionId) -> Option<NegotiationObserver> {
        self.observers.lock().unwrap().get(call_id).cloned()
    }
}

#[async_trait]
impl NegotiationEngine for MockNegotiationEngine {
    async fn start(
        &self,
        _local: &MediaHandle,
        remote: &RemoteDescriptor,
        observer: NegotiationObserver,
    ) -> Result<(), NegotiationError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(NegotiationError::Failed("engine refused to start".into()));
        }
        self.started.lock().unwrap().push(remote.clone());
        if self.auto_connect.load(Ordering::SeqCst) {
            observer.connected();
        }
        self.observers
            .lock()
            .unwrap()
            .insert(remote.call_id.clone(), observer);
        Ok(())
    }

    fn replace_local(&self, _call_id: &SessionId, _local: &MediaHandle) {
        self.replaced.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self, call_id: &SessionId) {
        self.observers.lock().unwrap().remove(call_id);
        self.stopped.lock().unwrap().push(call_id.clone());
    }
}

/// Signaling channel that records what was sent, optionally passing it on.
#[derive(Default)]
pub struct RecordingSignaling {
    sent: Mutex<Vec<OutboundSignal>>,
    disconnected: AtomicBool,
    forward: Option<Arc<dyn SignalingChannel>>,
}

impl RecordingSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn forwarding(inner: Arc<dyn SignalingChannel>) -> Arc<Self> {
        Arc::new(Self {
            forward: Some(inner),
            ..Self::default()
        })
    }

    /// Every later send fails with [`SignalingError::ChannelDisconnected`].
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundSignal> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_events(&self) -> Vec<&'static str> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(OutboundSignal::event_name)
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl SignalingChannel for RecordingSignaling {
    async fn send(&self, signal: OutboundSignal) -> Result<(), SignalingError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(SignalingError::ChannelDisconnected);
        }
        self.sent.lock().unwrap().push(signal.clone());
        match &self.forward {
            Some(inner) => inner.send(signal).await,
            None => Ok(()),
        }
    }
}

/// Tone player that records play/silence calls.
#[derive(Debug, Default)]
pub struct RecordingTonePlayer {
    events: Mutex<Vec<Option<Tone>>>,
    playing: Mutex<Option<Tone>>,
}

impl RecordingTonePlayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn playing(&self) -> Option<Tone> {
        *self.playing.lock().unwrap()
    }

    /// Tones started so far, in order.
    pub fn played(&self) -> Vec<Tone> {
        self.events.lock().unwrap().iter().flatten().copied().collect()
    }
}

impl TonePlayer for RecordingTonePlayer {
    fn play(&self, tone: Tone) {
        self.events.lock().unwrap().push(Some(tone));
        *self.playing.lock().unwrap() = Some(tone);
    }

    fn silence(&self) {
        self.events.lock().unwrap().push(None);
        *self.playing.lock().unwrap() = None;
    }
}

/// Long enough for any configured timer to fire under paused time.
const WAIT: Duration = Duration::from_secs(120);

/// A manager wired to mocks, plus its notification stream.
pub struct TestPeer {
    pub manager: CallManager,
    pub media: Arc<MockMediaDevices>,
    pub engine: Arc<MockNegotiationEngine>,
    pub signaling: Arc<RecordingSignaling>,
    pub tones: Arc<RecordingTonePlayer>,
    pub history: InMemoryCallHistory,
    pub changes: mpsc::UnboundedReceiver<StateChange>,
}

impl TestPeer {
    pub fn spawn(local: &str) -> Self {
        Self::with_config(local, CallManagerConfig::default())
    }

    pub fn with_config(local: &str, config: CallManagerConfig) -> Self {
        Self::with_engine(local, config, MockNegotiationEngine::auto_connecting())
    }

    pub fn with_engine(
        local: &str,
        config: CallManagerConfig,
        engine: Arc<MockNegotiationEngine>,
    ) -> Self {
        Self::build(local, config, engine, RecordingSignaling::new())
    }

    /// A peer whose signals go through `relay`.
    pub fn on_relay(relay: &LoopbackRelay, local: &str, config: CallManagerConfig) -> Self {
        let channel = Arc::new(relay.channel_for(ParticipantId::new(local)));
        let peer = Self::build(
            local,
            config,
            MockNegotiationEngine::auto_connecting(),
            RecordingSignaling::forwarding(channel),
        );
        relay.attach(peer.manager.clone());
        peer
    }

    fn build(
        local: &str,
        config: CallManagerConfig,
        engine: Arc<MockNegotiationEngine>,
        signaling: Arc<RecordingSignaling>,
    ) -> Self {
        let media = MockMediaDevices::new();
        let tones = RecordingTonePlayer::new();
        let history = InMemoryCallHistory::new();
        let manager = CallManager::spawn(
            ParticipantId::new(local),
            config,
            CallDependencies {
                signaling: signaling.clone(),
                media: media.clone(),
                engine: engine.clone(),
                tones: tones.clone(),
                history: Arc::new(history.clone()),
            },
        );
        let changes = manager.subscribe();
        Self {
            manager,
            media,
            engine,
            signaling,
            tones,
            history,
            changes,
        }
    }

    /// Next notification; panics if none arrives.
    pub async fn next_change(&mut self) -> StateChange {
        tokio::time::timeout(WAIT, self.changes.recv())
            .await
            .expect("timed out waiting for a state change")
            .expect("notification stream closed")
    }

    /// Assert the next notification is `expected`.
    pub async fn expect_state(&mut self, expected: CallState) -> StateChange {
        let change = self.next_change().await;
        assert_eq!(change.state, expected, "unexpected transition: {change:?}");
        change
    }

    /// Skip notifications until one reaches `expected`.
    pub async fn wait_for_state(&mut self, expected: CallState) -> StateChange {
        loop {
            let change = self.next_change().await;
            if change.state == expected {
                return change;
            }
        }
    }

    /// Assert no notification is pending.
    pub fn assert_quiet(&mut self) {
        if let Ok(change) = self.changes.try_recv() {
            panic!("unexpected state change: {change:?}");
        }
    }
}
