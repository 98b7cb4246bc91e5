//! Call manager for orchestrating the call lifecycle.
//!
//! [`CallManager`] is a cloneable handle. The work happens on one actor task
//! that owns the [`CallSession`]. Local intents, inbound signals, device
//! completions, negotiation reports and timer expiries are all queued into
//! that task and applied one at a time, so no two events ever race on the
//! session.

use super::error::{CallError, MediaError, SignalingError};
use super::history::CallHistoryRecorder;
use super::media::{LocalMedia, MediaDeviceController, MediaHandle};
use super::messages::{InternalEvent, ManagerCommand};
use super::negotiation::{
    NegotiationEngine, NegotiationEvent, NegotiationObserver, RemoteDescriptor,
};
use super::ring::{RingFeedback, TonePlayer};
use super::signaling::SignalingChannel;
use crate::config::CallManagerConfig;
use callcore::{
    CallHistoryRecord, CallSession, CallState, CallTransition, CameraFacing, InboundSignal,
    MediaKind, NotificationBus, NotificationHandler, OutboundSignal, ParticipantId, RejectCode,
    SessionId, StateChange,
};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Collaborators the manager drives.
#[derive(Clone)]
pub struct CallDependencies {
    pub signaling: Arc<dyn SignalingChannel>,
    pub media: Arc<dyn MediaDeviceController>,
    pub engine: Arc<dyn NegotiationEngine>,
    pub tones: Arc<dyn TonePlayer>,
    pub history: Arc<dyn CallHistoryRecorder>,
}

/// Handle to a running call manager.
///
/// Dropping every handle stops the actor; anything still live is torn down
/// without further signaling.
#[derive(Clone)]
pub struct CallManager {
    commands: mpsc::UnboundedSender<ManagerCommand>,
    notifications: NotificationBus,
    local: ParticipantId,
}

impl std::fmt::Debug for CallManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallManager")
            .field("local", &self.local)
            .field("running", &!self.commands.is_closed())
            .finish()
    }
}

impl CallManager {
    /// Spawn the actor on the current tokio runtime.
    pub fn spawn(
        local: ParticipantId,
        config: CallManagerConfig,
        deps: CallDependencies,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let notifications = NotificationBus::new();

        let actor = CallActor {
            local: local.clone(),
            config,
            signaling: deps.signaling,
            media: deps.media,
            engine: deps.engine,
            history: deps.history,
            ring: RingFeedback::new(deps.tones),
            notifications: notifications.clone(),
            internal_tx,
            session: None,
            local_media: None,
            negotiating: false,
            accept_sent: false,
            channel_up: true,
            ring_timer: Timer::default(),
            connect_timer: Timer::default(),
        };
        tokio::spawn(actor.run(command_rx, internal_rx));

        Self {
            commands,
            notifications,
            local,
        }
    }

    pub fn local_participant(&self) -> &ParticipantId {
        &self.local
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Place a call. Fails only with [`CallError::SessionBusy`] (or
    /// [`CallError::ManagerStopped`]); everything after that is reported
    /// through state-change notifications.
    pub async fn start_call(
        &self,
        remote: ParticipantId,
        media_kind: MediaKind,
    ) -> Result<SessionId, CallError> {
        self.request(|reply| ManagerCommand::StartCall {
            remote,
            media_kind,
            reply,
        })
        .await?
    }

    pub async fn accept_incoming(&self) -> Result<(), CallError> {
        self.request(|reply| ManagerCommand::AcceptIncoming { reply })
            .await
    }

    pub async fn reject_incoming(&self) -> Result<(), CallError> {
        self.request(|reply| ManagerCommand::RejectIncoming { reply })
            .await
    }

    pub async fn cancel_outgoing(&self) -> Result<(), CallError> {
        self.request(|reply| ManagerCommand::CancelOutgoing { reply })
            .await
    }

    pub async fn end_active(&self) -> Result<(), CallError> {
        self.request(|reply| ManagerCommand::EndActive { reply })
            .await
    }

    /// Returns whether the microphone is now muted.
    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        self.request(|reply| ManagerCommand::ToggleMute { reply })
            .await?
    }

    /// Returns whether the camera is now sending.
    pub async fn toggle_video(&self) -> Result<bool, CallError> {
        self.request(|reply| ManagerCommand::ToggleVideo { reply })
            .await?
    }

    /// Returns the facing now in use.
    pub async fn switch_camera(&self) -> Result<CameraFacing, CallError> {
        self.request(|reply| ManagerCommand::SwitchCamera { reply })
            .await?
    }

    /// Queue an inbound signaling message.
    pub fn deliver(&self, signal: InboundSignal) -> Result<(), CallError> {
        self.post(ManagerCommand::Inbound(signal))
    }

    pub fn channel_disconnected(&self) -> Result<(), CallError> {
        self.post(ManagerCommand::ChannelDisconnected)
    }

    pub fn channel_connected(&self) -> Result<(), CallError> {
        self.post(ManagerCommand::ChannelConnected)
    }

    /// Ordered stream of state changes from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StateChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.notifications
            .add_handler(Arc::new(ChannelSubscriber(tx)));
        rx
    }

    pub fn add_handler(&self, handler: Arc<dyn NotificationHandler>) {
        self.notifications.add_handler(handler);
    }

    /// Snapshot of the live session, if any.
    pub async fn session(&self) -> Result<Option<CallSession>, CallError> {
        self.request(|reply| ManagerCommand::Snapshot { reply })
            .await
    }

    /// Hang up whatever is in progress, then stop the actor.
    pub async fn shutdown(&self) -> Result<(), CallError> {
        self.request(|reply| ManagerCommand::Shutdown { reply })
            .await
    }

    fn post(&self, command: ManagerCommand) -> Result<(), CallError> {
        self.commands
            .send(command)
            .map_err(|_| CallError::ManagerStopped)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> Result<T, CallError> {
        let (reply, response) = oneshot::channel();
        self.post(command(reply))?;
        response.await.map_err(|_| CallError::ManagerStopped)
    }
}

struct ChannelSubscriber(mpsc::UnboundedSender<StateChange>);

impl NotificationHandler for ChannelSubscriber {
    fn handle_state_change(&self, change: &StateChange) {
        // A dropped receiver just stops listening.
        let _ = self.0.send(change.clone());
    }
}

/// One-shot timer that posts an event back into the actor's queue.
#[derive(Default)]
struct Timer(Option<JoinHandle<()>>);

impl Timer {
    fn arm(
        &mut self,
        after: Duration,
        events: &mpsc::UnboundedSender<InternalEvent>,
        event: InternalEvent,
    ) {
        self.disarm();
        let events = events.clone();
        self.0 = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(event);
        }));
    }

    fn disarm(&mut self) {
        if let Some(task) = self.0.take() {
            task.abort();
        }
    }
}

struct CallActor {
    local: ParticipantId,
    config: CallManagerConfig,
    signaling: Arc<dyn SignalingChannel>,
    media: Arc<dyn MediaDeviceController>,
    engine: Arc<dyn NegotiationEngine>,
    history: Arc<dyn CallHistoryRecorder>,
    ring: RingFeedback,
    notifications: NotificationBus,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,

    session: Option<CallSession>,
    local_media: Option<LocalMedia>,
    negotiating: bool,
    /// Whether the caller has been told we answered. Until then it is still
    /// ringing out, so backing out has to be a rejection.
    accept_sent: bool,
    channel_up: bool,
    ring_timer: Timer,
    connect_timer: Timer,
}

impl CallActor {
    async fn run(
        self,
        mut commands: mpsc::UnboundedReceiver<ManagerCommand>,
        mut internal: mpsc::UnboundedReceiver<InternalEvent>,
    ) {
        info!(target: "Calls/Manager", "Call manager for {} started", self.local);
        let mut actor = scopeguard::guard(self, |mut actor| actor.teardown());

        loop {
            tokio::select! {
                Some(event) = internal.recv() => actor.handle_internal(event).await,
                command = commands.recv() => match command {
                    Some(command) => {
                        if !actor.handle_command(command).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        // Acquisitions finishing after this point release their own handle.
        internal.close();
        while let Ok(event) = internal.try_recv() {
            if let InternalEvent::MediaAcquired {
                result: Ok(handle), ..
            } = event
            {
                actor.media.release(&handle);
            }
        }

        info!(target: "Calls/Manager", "Call manager for {} stopped", actor.local);
    }

    /// Returns false once the actor should stop.
    async fn handle_command(&mut self, command: ManagerCommand) -> bool {
        match command {
            ManagerCommand::StartCall {
                remote,
                media_kind,
                reply,
            } => {
                let result = self.start_call(remote, media_kind).await;
                let _ = reply.send(result);
            }
            ManagerCommand::AcceptIncoming { reply } => {
                self.accept_incoming();
                let _ = reply.send(());
            }
            ManagerCommand::RejectIncoming { reply } => {
                self.reject_incoming().await;
                let _ = reply.send(());
            }
            ManagerCommand::CancelOutgoing { reply } => {
                self.cancel_outgoing().await;
                let _ = reply.send(());
            }
            ManagerCommand::EndActive { reply } => {
                self.end_active().await;
                let _ = reply.send(());
            }
            ManagerCommand::ToggleMute { reply } => {
                let _ = reply.send(self.toggle_mute());
            }
            ManagerCommand::ToggleVideo { reply } => {
                let _ = reply.send(self.toggle_video());
            }
            ManagerCommand::SwitchCamera { reply } => {
                let result = self.switch_camera().await;
                let _ = reply.send(result);
            }
            ManagerCommand::Inbound(signal) => self.handle_signal(signal).await,
            ManagerCommand::ChannelDisconnected => self.on_channel_disconnected(),
            ManagerCommand::ChannelConnected => {
                if !self.channel_up {
                    info!(target: "Calls/Signaling", "Signaling channel reconnected");
                }
                self.channel_up = true;
            }
            ManagerCommand::Snapshot { reply } => {
                let _ = reply.send(self.session.clone());
            }
            ManagerCommand::Shutdown { reply } => {
                self.hang_up().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::MediaAcquired { session_id, result } => {
                self.on_media_acquired(session_id, result).await
            }
            InternalEvent::Negotiation { session_id, event } => {
                self.on_negotiation(session_id, event).await
            }
            InternalEvent::RingTimeout { session_id } => self.on_ring_timeout(session_id).await,
            InternalEvent::ConnectTimeout { session_id } => {
                self.on_connect_timeout(session_id).await
            }
        }
    }

    // --- Local intents ---

    async fn start_call(
        &mut self,
        remote: ParticipantId,
        media_kind: MediaKind,
    ) -> Result<SessionId, CallError> {
        if let Some(session) = &self.session {
            debug!(target: "Calls/Manager", "Refusing to call {remote}: {} is {}", session.id, session.state);
            return Err(CallError::SessionBusy(session.id.clone()));
        }

        let call_id = SessionId::generate();
        info!(target: "Calls/Manager", "Calling {remote} ({media_kind}) as {call_id}");
        self.media.reserve(media_kind);
        self.session = Some(CallSession::new_outgoing(
            call_id.clone(),
            self.local.clone(),
            remote.clone(),
            media_kind,
        ));
        self.transition(CallTransition::LocalStart);

        let sent = self
            .send_signal(OutboundSignal::CallUser {
                to: remote,
                from: self.local.clone(),
                call_id: call_id.clone(),
                media_kind,
            })
            .await;
        if sent {
            self.ring.start_ring_out();
        } else {
            self.transition(CallTransition::ChannelDisconnected);
        }
        Ok(call_id)
    }

    fn accept_incoming(&mut self) {
        if self.session_in(&[CallState::IncomingRinging]).is_none() {
            return self.ignore_intent("accept");
        }
        // Entering connecting requests the local media; accept-call goes
        // out once the device has actually been granted.
        self.transition(CallTransition::LocalAccepted);
    }

    async fn reject_incoming(&mut self) {
        let Some(call_id) = self.session_in(&[CallState::IncomingRinging]) else {
            return self.ignore_intent("reject");
        };
        self.reject_with(call_id, RejectCode::Declined, CallTransition::LocalRejected)
            .await;
    }

    async fn cancel_outgoing(&mut self) {
        if self.session_in(&[CallState::OutgoingRinging]).is_none() {
            return self.ignore_intent("cancel");
        }
        self.hang_up_with(CallTransition::LocalCancelled).await;
    }

    async fn end_active(&mut self) {
        if self
            .session_in(&[CallState::Connecting, CallState::Active])
            .is_none()
        {
            return self.ignore_intent("end");
        }
        if let Some(call_id) = self.unanswered_on_wire() {
            info!(target: "Calls/Manager", "Backing out of {call_id} before answering");
            return self
                .reject_with(call_id, RejectCode::Declined, CallTransition::LocalRejected)
                .await;
        }
        self.hang_up_with(CallTransition::LocalEnded).await;
    }

    fn toggle_mute(&mut self) -> Result<bool, CallError> {
        let local = self.local_media.as_mut().ok_or(CallError::NoLocalMedia)?;
        let muted = !local.muted;
        self.media.set_muted(&local.handle, muted)?;
        local.muted = muted;
        debug!(target: "Calls/Manager", "Microphone muted: {muted}");
        Ok(muted)
    }

    fn toggle_video(&mut self) -> Result<bool, CallError> {
        let local = self.local_media.as_mut().ok_or(CallError::NoLocalMedia)?;
        if !local.handle.kind.is_video() {
            return Err(MediaError::DeviceUnavailable("audio-only call".into()).into());
        }
        let enabled = !local.video_enabled;
        self.media.set_video_enabled(&local.handle, enabled)?;
        local.video_enabled = enabled;
        debug!(target: "Calls/Manager", "Camera enabled: {enabled}");
        Ok(enabled)
    }

    async fn switch_camera(&mut self) -> Result<CameraFacing, CallError> {
        let current = self
            .local_media
            .clone()
            .ok_or(CallError::NoLocalMedia)?;
        if !current.handle.kind.is_video() {
            return Err(MediaError::DeviceUnavailable("audio-only call".into()).into());
        }

        let handle = self.media.switch_facing(&current.handle).await?;
        if current.muted
            && let Err(e) = self.media.set_muted(&handle, true)
        {
            warn!(target: "Calls/Manager", "Could not keep microphone muted after camera switch: {e}");
        }
        if !current.video_enabled
            && let Err(e) = self.media.set_video_enabled(&handle, false)
        {
            warn!(target: "Calls/Manager", "Could not keep camera off after camera switch: {e}");
        }
        if self.negotiating
            && let Some(session) = &self.session
        {
            self.engine.replace_local(&session.id, &handle);
        }

        let facing = handle.facing;
        info!(target: "Calls/Manager", "Switched camera to {facing:?}");
        self.local_media = Some(LocalMedia {
            handle,
            muted: current.muted,
            video_enabled: current.video_enabled,
        });
        Ok(facing)
    }

    /// Graceful exit: leave whatever state we are in the way the user would.
    async fn hang_up(&mut self) {
        match self.session.as_ref().map(|session| session.state) {
            Some(CallState::OutgoingRinging) => self.cancel_outgoing().await,
            Some(CallState::IncomingRinging) => self.reject_incoming().await,
            Some(CallState::Connecting | CallState::Active) => self.end_active().await,
            _ => {}
        }
    }

    // --- Inbound signaling ---

    async fn handle_signal(&mut self, signal: InboundSignal) {
        match signal {
            InboundSignal::IncomingCall {
                from,
                call_id,
                media_kind,
            } => self.on_incoming_call(from, call_id, media_kind).await,
            InboundSignal::CallAccepted { call_id } => {
                if self.state_for(&call_id, "call-accepted").is_some() {
                    self.transition(CallTransition::RemoteAccepted);
                }
            }
            InboundSignal::CallRejected {
                call_id,
                reason_code,
            } => {
                if self.state_for(&call_id, "call-rejected").is_some() {
                    info!(target: "Calls/Manager", "Call {call_id} rejected by remote ({reason_code})");
                    self.transition(CallTransition::RemoteRejected { code: reason_code });
                }
            }
            InboundSignal::CallEnded { call_id } => match self.state_for(&call_id, "call-ended") {
                Some(CallState::IncomingRinging) => {
                    self.transition(CallTransition::RemoteCancelled);
                }
                Some(_) => {
                    self.transition(CallTransition::RemoteEnded);
                }
                None => {}
            },
        }
    }

    async fn on_incoming_call(
        &mut self,
        from: ParticipantId,
        call_id: SessionId,
        media_kind: MediaKind,
    ) {
        let Some(session) = &self.session else {
            info!(target: "Calls/Manager", "Incoming {media_kind} call {call_id} from {from}");
            self.open_incoming(from, call_id, media_kind);
            self.ring.start_ring_in();
            return;
        };

        if session.id == call_id {
            debug!(target: "Calls/Manager", "Duplicate incoming-call for {call_id}");
            return;
        }

        let glare =
            session.state == CallState::OutgoingRinging && session.remote_participant == from;
        if !glare {
            info!(target: "Calls/Manager", "Busy with {}, rejecting {call_id} from {from}", session.id);
            self.send_signal(OutboundSignal::RejectCall {
                call_id,
                from: self.local.clone(),
                reason_code: RejectCode::Busy,
            })
            .await;
            return;
        }

        // Both sides called each other. The smaller session id survives.
        if session.id < call_id {
            info!(target: "Calls/Manager", "Glare with {from}: keeping {} over {call_id}", session.id);
            return;
        }
        info!(target: "Calls/Manager", "Glare with {from}: yielding {} to {call_id}", session.id);
        self.hang_up_with(CallTransition::LocalCancelled).await;
        self.open_incoming(from, call_id, media_kind);
        self.transition(CallTransition::LocalAccepted);
    }

    fn open_incoming(&mut self, from: ParticipantId, call_id: SessionId, media_kind: MediaKind) {
        self.session = Some(CallSession::new_incoming(
            call_id,
            self.local.clone(),
            from,
            media_kind,
        ));
        self.transition(CallTransition::IncomingOffer);
    }

    fn on_channel_disconnected(&mut self) {
        warn!(target: "Calls/Signaling", "Signaling channel disconnected");
        self.channel_up = false;
        if self.session.is_some() {
            self.transition(CallTransition::ChannelDisconnected);
        }
    }

    // --- Completions ---

    async fn on_media_acquired(
        &mut self,
        session_id: SessionId,
        result: Result<MediaHandle, MediaError>,
    ) {
        let waiting = self.local_media.is_none()
            && self.session.as_ref().is_some_and(|session| {
                session.id == session_id && session.state == CallState::Connecting
            });
        let session = match (&self.session, waiting) {
            (Some(session), true) => session.clone(),
            _ => {
                debug!(target: "Calls/Manager", "Discarding late media acquisition for {session_id}");
                if let Ok(handle) = result {
                    self.media.release(&handle);
                }
                return;
            }
        };

        match result {
            Ok(handle) => {
                info!(target: "Calls/Manager", "Local media ready for {session_id}");
                self.local_media = Some(LocalMedia::new(handle.clone()));
                if !session.is_initiator() {
                    let sent = self
                        .send_signal(OutboundSignal::AcceptCall {
                            call_id: session.id.clone(),
                            from: self.local.clone(),
                        })
                        .await;
                    if !sent {
                        self.transition(CallTransition::ChannelDisconnected);
                        return;
                    }
                    self.accept_sent = true;
                }
                self.start_negotiation(&session, &handle).await;
            }
            Err(e) => {
                warn!(target: "Calls/Manager", "Local media for {session_id} unavailable: {e}");
                let signal = if session.is_initiator() {
                    OutboundSignal::CallEnded {
                        call_id: session.id,
                        from: self.local.clone(),
                    }
                } else {
                    OutboundSignal::RejectCall {
                        call_id: session.id,
                        from: self.local.clone(),
                        reason_code: RejectCode::MediaDenied,
                    }
                };
                self.send_signal(signal).await;
                self.transition(CallTransition::MediaDenied);
            }
        }
    }

    async fn start_negotiation(&mut self, session: &CallSession, handle: &MediaHandle) {
        let remote = RemoteDescriptor {
            call_id: session.id.clone(),
            remote: session.remote_participant.clone(),
            media_kind: session.media_kind,
            initiator: session.is_initiator(),
        };
        let observer = NegotiationObserver::new(session.id.clone(), self.internal_tx.clone());
        self.negotiating = true;
        if let Err(e) = self.engine.start(handle, &remote, observer).await {
            warn!(target: "Calls/Manager", "Could not start negotiation for {}: {e}", session.id);
            self.hang_up_with(CallTransition::NegotiationFailed).await;
        }
    }

    async fn on_negotiation(&mut self, session_id: SessionId, event: NegotiationEvent) {
        let Some(state) = self.state_for(&session_id, "negotiation report") else {
            return;
        };
        match (state, event) {
            (CallState::Connecting, NegotiationEvent::Connected) => {
                self.transition(CallTransition::NegotiationConnected);
            }
            (CallState::Connecting, NegotiationEvent::Failed(e)) => {
                warn!(target: "Calls/Manager", "Negotiation for {session_id} failed: {e}");
                self.hang_up_with(CallTransition::NegotiationFailed).await;
            }
            (CallState::Connecting, NegotiationEvent::ConnectionLost) => {
                warn!(target: "Calls/Manager", "Connection for {session_id} dropped while connecting");
                self.hang_up_with(CallTransition::NegotiationFailed).await;
            }
            (CallState::Active, NegotiationEvent::ConnectionLost | NegotiationEvent::Failed(_)) => {
                warn!(target: "Calls/Manager", "Connection for {session_id} lost");
                self.hang_up_with(CallTransition::ConnectionLost).await;
            }
            (state, event) => {
                warn!(target: "Calls/Manager", "Ignoring negotiation {event:?} for {session_id} in state {state}");
            }
        }
    }

    async fn on_ring_timeout(&mut self, session_id: SessionId) {
        match self.state_for(&session_id, "ring timeout") {
            Some(CallState::IncomingRinging) => {
                info!(target: "Calls/Manager", "Missed call {session_id}");
                self.reject_with(session_id, RejectCode::Timeout, CallTransition::RingTimeout)
                    .await;
            }
            Some(CallState::OutgoingRinging) => {
                info!(target: "Calls/Manager", "No answer for {session_id}");
                self.hang_up_with(CallTransition::RingTimeout).await;
            }
            Some(state) => {
                debug!(target: "Calls/Manager", "Stale ring timeout for {session_id} in state {state}");
            }
            None => {}
        }
    }

    async fn on_connect_timeout(&mut self, session_id: SessionId) {
        match self.state_for(&session_id, "connect timeout") {
            Some(CallState::Connecting) => match self.unanswered_on_wire() {
                Some(call_id) => {
                    warn!(target: "Calls/Manager", "Local media for {call_id} not granted in time");
                    self.reject_with(call_id, RejectCode::MediaDenied, CallTransition::MediaDenied)
                        .await;
                }
                None => {
                    warn!(target: "Calls/Manager", "Call {session_id} did not connect in time");
                    self.hang_up_with(CallTransition::NegotiationFailed).await;
                }
            },
            Some(state) => {
                debug!(target: "Calls/Manager", "Stale connect timeout for {session_id} in state {state}");
            }
            None => {}
        }
    }

    // --- Plumbing ---

    /// Apply `transition` to the live session and run the side effects of
    /// leaving the old state and entering the new one. Invalid transitions
    /// are logged and leave everything untouched.
    fn transition(&mut self, transition: CallTransition) -> bool {
        let Some(session) = self.session.as_mut() else {
            debug!(target: "Calls/Manager", "No session for {transition:?}");
            return false;
        };
        let previous = session.state;
        let next = match session.apply_transition(transition) {
            Ok(next) => next,
            Err(e) => {
                warn!(target: "Calls/Manager", "Protocol anomaly on {}: {e}", session.id);
                return false;
            }
        };
        let change = StateChange::from_session(session);
        let direction = session.direction;
        let media_kind = session.media_kind;
        info!(target: "Calls/Manager", "Call {}: {previous} -> {next}", change.session_id);

        if previous.is_ringing() {
            self.ring_timer.disarm();
            self.ring.stop();
        }
        if previous == CallState::Connecting {
            self.connect_timer.disarm();
        }
        self.notifications.dispatch(&change);

        let session_id = change.session_id;
        match next {
            CallState::OutgoingRinging | CallState::IncomingRinging => {
                self.ring_timer.arm(
                    self.config.ring_window(direction),
                    &self.internal_tx,
                    InternalEvent::RingTimeout { session_id },
                );
            }
            CallState::Connecting => {
                self.connect_timer.arm(
                    self.config.connect_window(),
                    &self.internal_tx,
                    InternalEvent::ConnectTimeout {
                        session_id: session_id.clone(),
                    },
                );
                self.request_media(session_id, media_kind);
            }
            CallState::Ended(_) => self.finish_session(),
            CallState::Idle | CallState::Active => {}
        }
        true
    }

    /// Release everything the ended session held, hand it to the history
    /// recorder and return to idle.
    fn finish_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.accept_sent = false;
        if std::mem::take(&mut self.negotiating) {
            self.engine.stop(&session.id);
        }
        if let Some(local) = self.local_media.take() {
            self.media.release(&local.handle);
        }
        self.media.cancel_reservation();

        if let Some(record) = CallHistoryRecord::from_session(&session) {
            self.history.record(record);
        }
        match session.apply_transition(CallTransition::CleanupDone) {
            Ok(_) => self
                .notifications
                .dispatch(&StateChange::from_session(&session)),
            Err(e) => warn!(target: "Calls/Manager", "Cleanup of {} failed: {e}", session.id),
        }
    }

    /// Forced exit: nothing is signaled, but nothing is left playing or
    /// capturing either.
    fn teardown(&mut self) {
        self.ring_timer.disarm();
        self.connect_timer.disarm();
        self.ring.stop();
        self.accept_sent = false;
        let Some(session) = self.session.take() else {
            return;
        };
        warn!(target: "Calls/Manager", "Tearing down call {} in state {}", session.id, session.state);
        if std::mem::take(&mut self.negotiating) {
            self.engine.stop(&session.id);
        }
        if let Some(local) = self.local_media.take() {
            self.media.release(&local.handle);
        }
        self.media.cancel_reservation();
    }

    fn request_media(&self, session_id: SessionId, kind: MediaKind) {
        let media = Arc::clone(&self.media);
        let events = self.internal_tx.clone();
        let facing = self.config.default_facing;
        tokio::spawn(async move {
            let result = media.acquire(kind, facing).await;
            // Nobody left to hand the device to.
            if let Err(mpsc::error::SendError(InternalEvent::MediaAcquired {
                result: Ok(handle),
                ..
            })) = events.send(InternalEvent::MediaAcquired { session_id, result })
            {
                media.release(&handle);
            }
        });
    }

    /// Send reject-call for `call_id` with `reason_code`, then apply `transition`.
    async fn reject_with(
        &mut self,
        call_id: SessionId,
        reason_code: RejectCode,
        transition: CallTransition,
    ) {
        self.send_signal(OutboundSignal::RejectCall {
            call_id,
            from: self.local.clone(),
            reason_code,
        })
        .await;
        self.transition(transition);
    }

    /// The live session's id if we accepted it locally but the caller has
    /// not heard so yet.
    fn unanswered_on_wire(&self) -> Option<SessionId> {
        self.session
            .as_ref()
            .filter(|session| {
                !session.is_initiator() && session.state == CallState::Connecting
            })
            .filter(|_| !self.accept_sent)
            .map(|session| session.id.clone())
    }

    /// Send call-ended for the live session, then apply `transition`.
    async fn hang_up_with(&mut self, transition: CallTransition) {
        if let Some(call_id) = self.session.as_ref().map(|session| session.id.clone()) {
            self.send_signal(OutboundSignal::CallEnded {
                call_id,
                from: self.local.clone(),
            })
            .await;
        }
        self.transition(transition);
    }

    /// Returns whether the channel accepted the signal.
    async fn send_signal(&mut self, signal: OutboundSignal) -> bool {
        let event = signal.event_name();
        let call_id = signal.call_id().clone();
        if !self.channel_up {
            debug!(target: "Calls/Signaling", "Channel down, not sending {event} for {call_id}");
            return false;
        }
        match self.signaling.send(signal).await {
            Ok(()) => {
                debug!(target: "Calls/Signaling", "Sent {event} for {call_id}");
                true
            }
            Err(SignalingError::ChannelDisconnected) => {
                warn!(target: "Calls/Signaling", "Channel dropped while sending {event} for {call_id}");
                self.channel_up = false;
                false
            }
            Err(e) => {
                warn!(target: "Calls/Signaling", "Failed to send {event} for {call_id}: {e}");
                false
            }
        }
    }

    /// The live session's id, if it is in one of `states`.
    fn session_in(&self, states: &[CallState]) -> Option<SessionId> {
        self.session
            .as_ref()
            .filter(|session| states.contains(&session.state))
            .map(|session| session.id.clone())
    }

    /// The live session's state, if `call_id` names it.
    fn state_for(&self, call_id: &SessionId, event: &str) -> Option<CallState> {
        match &self.session {
            Some(session) if &session.id == call_id => Some(session.state),
            _ => {
                debug!(target: "Calls/Manager", "Discarding {event} for unrelated call {call_id}");
                None
            }
        }
    }

    fn ignore_intent(&self, intent: &str) {
        match &self.session {
            Some(session) => {
                warn!(target: "Calls/Manager", "Ignoring {intent} for {} in state {}", session.id, session.state);
            }
            None => debug!(target: "Calls/Manager", "No call to {intent}"),
        }
    }
}
