//! Audible ring feedback.

use log::{debug, info};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tone {
    /// Played to the caller while the callee's phone rings.
    RingOut,
    RingIn,
}

/// Audio output for ringtones.
pub trait TonePlayer: Send + Sync {
    /// Start looping `tone` from the beginning.
    fn play(&self, tone: Tone);

    /// Stop playback and rewind. Must be safe when nothing is playing.
    fn silence(&self);
}

/// Tone player that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTonePlayer;

impl TonePlayer for LogTonePlayer {
    fn play(&self, tone: Tone) {
        info!(target: "Calls/Ring", "Playing {tone:?}");
    }

    fn silence(&self) {
        debug!(target: "Calls/Ring", "Silenced");
    }
}

/// Keeps at most one ringtone playing.
pub struct RingFeedback {
    player: Arc<dyn TonePlayer>,
    active: Option<Tone>,
}

impl RingFeedback {
    pub fn new(player: Arc<dyn TonePlayer>) -> Self {
        Self {
            player,
            active: None,
        }
    }

    pub fn start_ring_out(&mut self) {
        self.start(Tone::RingOut);
    }

    pub fn start_ring_in(&mut self) {
        self.start(Tone::RingIn);
    }

    /// Always silences, whatever was playing before.
    pub fn stop(&mut self) {
        self.player.silence();
        self.active = None;
    }

    pub fn active(&self) -> Option<Tone> {
        self.active
    }

    fn start(&mut self, tone: Tone) {
        if self.active == Some(tone) {
            return;
        }
        self.stop();
        self.player.play(tone);
        self.active = Some(tone);
    }
}
