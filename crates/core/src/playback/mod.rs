use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::PlaybackClock;

/// Commands the playlist controller sends to whatever actually decodes and
/// renders audio.
pub trait PlaybackBinding {
    /// Replaces the current source. Playback does not start by itself.
    fn load(&mut self, src: &str, title: Option<&str>);
    fn play(&mut self);
    fn pause(&mut self);
    /// Moves the playback head to an absolute position.
    fn seek(&mut self, seconds: f64);
}

/// Notifications a playback unit sends back to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "notification", rename_all = "kebab-case")]
pub enum PlaybackNotification {
    PlaybackEnded { src: String },
    /// Something other than the controller changed the source.
    SourceChanged { src: String },
}

#[derive(Debug, Default)]
struct UnitState {
    src: Option<String>,
    title: Option<String>,
    playing: bool,
    clock: PlaybackClock,
    durations: HashMap<String, f64>,
    default_duration: Option<f64>,
    loads: usize,
    pending: Vec<PlaybackNotification>,
}

impl UnitState {
    fn load(&mut self, src: &str, title: Option<&str>) {
        let duration = self
            .durations
            .get(src)
            .copied()
            .or(self.default_duration);
        self.src = Some(src.to_string());
        self.title = title.map(str::to_string);
        self.playing = false;
        self.clock = PlaybackClock::new(duration);
        self.loads += 1;
    }
}

/// In-memory playback unit driven by an explicit clock.
///
/// Clones share state, so one handle can be bound to the controller while
/// the host keeps another to advance time and collect notifications.
#[derive(Clone, Default)]
pub struct SimulatedPlayer {
    shared: Arc<Mutex<UnitState>>,
}

impl SimulatedPlayer {
    /// Creates a unit where every track lasts `default_duration` seconds
    /// unless registered otherwise.
    pub fn new(default_duration: Option<f64>) -> Self {
        let player = Self::default();
        player.lock().default_duration = default_duration;
        player
    }

    pub fn set_duration(&self, src: impl Into<String>, seconds: f64) {
        self.lock().durations.insert(src.into(), seconds);
    }

    pub fn current_src(&self) -> Option<String> {
        self.lock().src.clone()
    }

    pub fn current_title(&self) -> Option<String> {
        self.lock().title.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    pub fn clock(&self) -> PlaybackClock {
        self.lock().clock.clone()
    }

    /// Number of `load` calls received so far.
    pub fn load_count(&self) -> usize {
        self.lock().loads
    }

    /// Seek slider input in `0..=1000`.
    pub fn seek_permille(&self, permille: f64) {
        self.lock().clock.seek_permille(permille);
    }

    /// Lets `delta` seconds of playback elapse. Reaching the end of the
    /// track stops the unit and queues `playback-ended`.
    pub fn advance(&self, delta: f64) {
        let mut state = self.lock();
        if !state.playing {
            return;
        }

        state.clock.advance(delta);
        if state.clock.finished() {
            state.playing = false;
            if let Some(src) = state.src.clone() {
                debug!(%src, "playback ended");
                state.pending.push(PlaybackNotification::PlaybackEnded { src });
            }
        }
    }

    /// Simulates another component switching the source behind the
    /// controller's back.
    pub fn change_source_externally(&self, src: &str) {
        let mut state = self.lock();
        state.load(src, None);
        state.pending.push(PlaybackNotification::SourceChanged {
            src: src.to_string(),
        });
    }

    pub fn drain_notifications(&self) -> Vec<PlaybackNotification> {
        std::mem::take(&mut self.lock().pending)
    }

    fn lock(&self) -> MutexGuard<'_, UnitState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PlaybackBinding for SimulatedPlayer {
    fn load(&mut self, src: &str, title: Option<&str>) {
        self.lock().load(src, title);
    }

    fn play(&mut self) {
        let mut state = self.lock();
        if state.src.is_some() {
            if state.clock.finished() {
                state.clock.reset();
            }
            state.playing = true;
        }
    }

    fn pause(&mut self) {
        self.lock().playing = false;
    }

    fn seek(&mut self, seconds: f64) {
        self.lock().clock.seek(seconds);
    }
}

impl fmt::Debug for SimulatedPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("SimulatedPlayer")
            .field("src", &state.src)
            .field("playing", &state.playing)
            .field("clock", &state.clock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_end_of_track_once() {
        let mut player = SimulatedPlayer::new(Some(2.0));
        player.load("a.mp3", Some("A"));
        player.play();

        player.advance(1.0);
        assert!(player.drain_notifications().is_empty());

        player.advance(1.5);
        player.advance(1.0);
        assert!(!player.is_playing());
        assert_eq!(
            player.drain_notifications(),
            vec![PlaybackNotification::PlaybackEnded {
                src: "a.mp3".to_string()
            }]
        );
    }

    #[test]
    fn loading_does_not_start_playback() {
        let mut player = SimulatedPlayer::new(None);
        player.load("b.mp3", None);

        assert!(!player.is_playing());
        assert_eq!(player.current_src().as_deref(), Some("b.mp3"));
        assert_eq!(player.load_count(), 1);
    }

    #[test]
    fn shared_handles_see_the_same_unit() {
        let host = SimulatedPlayer::new(None);
        host.set_duration("c.mp3", 100.0);
        let mut bound = host.clone();
        bound.load("c.mp3", None);
        bound.seek(30.0);
        host.seek_permille(500.0);

        assert_eq!(bound.clock().position_seconds, 50.0);
    }

    #[test]
    fn external_source_change_is_announced() {
        let player = SimulatedPlayer::new(None);
        player.change_source_externally("elsewhere.mp3");

        assert_eq!(
            player.drain_notifications(),
            vec![PlaybackNotification::SourceChanged {
                src: "elsewhere.mp3".to_string()
            }]
        );
    }
}
