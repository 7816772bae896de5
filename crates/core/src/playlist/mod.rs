use std::fmt;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    EventBus, PlaybackBinding, PlaybackNotification, PlayerError, PlayerEvent, PlaylistConfig,
    Result,
};

/// One playlist entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Locator of the media. A track without one is listed but cannot play.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
}

impl Track {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            title: None,
            src: Some(src.into()),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Title shown for the track at `index`, generated when missing.
    pub fn display_title(&self, index: usize) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| format!("Track {}", index + 1))
    }

    /// Parses a single JSON track record.
    pub fn from_value(value: &Value) -> Result<Self> {
        let record = value
            .as_object()
            .ok_or_else(|| PlayerError::malformed(format!("track record must be an object, got {value}")))?;

        Ok(Self {
            title: optional_string(record.get("title"), "title")?,
            src: optional_string(record.get("src"), "src")?,
        })
    }
}

fn optional_string(value: Option<&Value>, field: &str) -> Result<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(other) => Err(PlayerError::malformed(format!(
            "track `{field}` must be a string, got {other}"
        ))),
    }
}

/// Parses a JSON array of track records, skipping malformed entries.
///
/// Anything other than an array (or `null`, read as empty) is rejected as a
/// whole.
pub fn parse_tracks(value: &Value) -> Result<Vec<Track>> {
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Null => return Ok(Vec::new()),
        other => {
            return Err(PlayerError::malformed(format!(
                "track list must be a JSON array, got {other}"
            )))
        }
    };

    Ok(entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| match Track::from_value(entry) {
            Ok(track) => Some(track),
            Err(err) => {
                warn!(index, %err, "skipping malformed track entry");
                None
            }
        })
        .collect())
}

/// Observable state of a playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistState {
    Empty,
    Idle,
    Selected(usize),
}

/// Owns the track list and the only authoritative cursor into it.
///
/// Navigation that has nowhere to go yields `None` and leaves the cursor
/// where it was.
pub struct PlaylistController {
    tracks: Vec<Track>,
    current: Option<usize>,
    shuffle: bool,
    looping: bool,
    rng: StdRng,
    events: EventBus,
    binding: Option<Box<dyn PlaybackBinding>>,
}

impl PlaylistController {
    pub fn new(events: EventBus) -> Self {
        Self::with_rng(events, StdRng::from_entropy())
    }

    /// Controller whose shuffle order is reproducible.
    pub fn with_seed(events: EventBus, seed: u64) -> Self {
        Self::with_rng(events, StdRng::seed_from_u64(seed))
    }

    fn with_rng(events: EventBus, rng: StdRng) -> Self {
        Self {
            tracks: Vec::new(),
            current: None,
            shuffle: false,
            looping: false,
            rng,
            events,
            binding: None,
        }
    }

    /// Applies playlist configuration. A track list that is not an array is
    /// reported and ignored so the controller still comes up empty.
    pub fn from_config(config: &PlaylistConfig, events: EventBus) -> Self {
        let mut controller = Self::new(events);
        controller.shuffle = config.shuffle;
        controller.looping = config.looping;
        if let Err(err) = controller.load_tracks_value(&config.tracks) {
            warn!(%err, "ignoring configured track list");
        }
        controller
    }

    /// Publishes future selections on `events` instead.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn bind(&mut self, binding: Box<dyn PlaybackBinding>) {
        self.binding = Some(binding);
    }

    /// Detaches the playback unit, returning it.
    pub fn unbind(&mut self) -> Option<Box<dyn PlaybackBinding>> {
        self.binding.take()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Index of the selected track, `None` while idle.
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current.and_then(|index| self.tracks.get(index))
    }

    /// Where the controller sits in the Empty / Idle / Selected cycle.
    pub fn state(&self) -> PlaylistState {
        match (self.tracks.is_empty(), self.current) {
            (true, _) => PlaylistState::Empty,
            (false, Some(index)) => PlaylistState::Selected(index),
            (false, None) => PlaylistState::Idle,
        }
    }

    pub fn shuffle_enabled(&self) -> bool {
        self.shuffle
    }

    pub fn loop_enabled(&self) -> bool {
        self.looping
    }

    /// Turns random next/previous picks on or off.
    pub fn set_shuffle(&mut self, enabled: bool) {
        self.shuffle = enabled;
    }

    /// Turns wrap-around at either end of the list on or off.
    pub fn set_loop(&mut self, enabled: bool) {
        self.looping = enabled;
    }

    /// Flips shuffle and returns the new setting.
    pub fn toggle_shuffle(&mut self) -> bool {
        self.shuffle = !self.shuffle;
        self.shuffle
    }

    /// Flips loop and returns the new setting.
    pub fn toggle_loop(&mut self) -> bool {
        self.looping = !self.looping;
        self.looping
    }

    /// Replaces the track list. The cursor is kept only while it still
    /// points inside the new list.
    pub fn set_tracks(&mut self, tracks: Vec<Track>) {
        self.tracks = tracks;
        if self.current.is_some_and(|index| index >= self.tracks.len()) {
            self.current = None;
        }
        info!(tracks = self.tracks.len(), "playlist replaced");
    }

    pub fn load_tracks_value(&mut self, value: &Value) -> Result<usize> {
        let tracks = parse_tracks(value)?;
        let count = tracks.len();
        self.set_tracks(tracks);
        Ok(count)
    }

    /// Replaces the tracks from a JSON array. On error the playlist is left
    /// untouched.
    pub fn load_tracks_json(&mut self, raw: &str) -> Result<usize> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| PlayerError::malformed(format!("track list is not valid JSON: {err}")))?;
        self.load_tracks_value(&value)
    }

    /// Moves the cursor to `index`, publishes `track-selected` and forwards
    /// the track to the bound playback unit. Out-of-range indices are
    /// ignored. Repeated selections of the same index are not deduplicated.
    pub fn select_index(&mut self, index: usize, autoplay: bool) -> bool {
        self.select(index, autoplay, true)
    }

    fn select(&mut self, index: usize, autoplay: bool, load: bool) -> bool {
        let Some(track) = self.tracks.get(index).cloned() else {
            warn!(index, tracks = self.tracks.len(), "rejecting out of range selection");
            return false;
        };

        self.current = Some(index);
        info!(index, title = %track.display_title(index), autoplay, "track selected");
        self.events.publish(PlayerEvent::TrackSelected {
            index,
            track: track.clone(),
        });

        if !load {
            return true;
        }
        if let Some(binding) = self.binding.as_mut() {
            match track.src.as_deref() {
                Some(src) => {
                    binding.load(src, track.title.as_deref());
                    if autoplay {
                        binding.play();
                    }
                }
                None => warn!(index, "selected track has no source"),
            }
        }
        true
    }

    /// Index that follows the cursor under the current policy.
    ///
    /// Shuffle only avoids repeating the current track; earlier tracks may
    /// come back at any time.
    pub fn pick_next(&mut self) -> Option<usize> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }
        if self.shuffle {
            return Some(self.pick_random());
        }

        let next = self.current.map_or(0, |index| index + 1);
        if next < len {
            Some(next)
        } else if self.looping {
            Some(0)
        } else {
            None
        }
    }

    /// Index that precedes the cursor. Under shuffle this is another random
    /// pick, like [`pick_next`](Self::pick_next).
    pub fn pick_previous(&mut self) -> Option<usize> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }
        if self.shuffle {
            return Some(self.pick_random());
        }

        match self.current {
            Some(index) if index > 0 => Some(index - 1),
            _ if self.looping => Some(len - 1),
            _ => None,
        }
    }

    fn pick_random(&mut self) -> usize {
        let len = self.tracks.len();
        if len == 1 {
            return 0;
        }
        match self.current {
            Some(current) => {
                let pick = self.rng.gen_range(0..len - 1);
                if pick >= current {
                    pick + 1
                } else {
                    pick
                }
            }
            None => self.rng.gen_range(0..len),
        }
    }

    /// Skips forward and starts playing.
    pub fn next(&mut self) -> Option<usize> {
        let next = self.pick_next()?;
        self.select_index(next, true).then_some(next)
    }

    /// Skips backward and starts playing.
    pub fn previous(&mut self) -> Option<usize> {
        let previous = self.pick_previous()?;
        self.select_index(previous, true).then_some(previous)
    }

    /// Reacts to a notification from the playback unit. Returns the newly
    /// selected index, if any.
    pub fn handle_notification(&mut self, notification: &PlaybackNotification) -> Option<usize> {
        match notification {
            PlaybackNotification::PlaybackEnded { src } => {
                debug!(%src, "playback ended");
                let advanced = self.next();
                if advanced.is_none() {
                    info!("end of playlist reached");
                }
                advanced
            }
            PlaybackNotification::SourceChanged { src } => self.resync(src),
        }
    }

    /// Points the cursor at the track whose source the playback unit now
    /// holds. The unit already has that source, so nothing is reloaded.
    fn resync(&mut self, src: &str) -> Option<usize> {
        let matches = |track: &Track| track.src.as_deref() == Some(src);

        let found = self
            .current_track()
            .filter(|track| matches(*track))
            .and(self.current)
            .or_else(|| self.tracks.iter().position(matches));

        match found {
            Some(index) => self.select(index, false, false).then_some(index),
            None => {
                debug!(%src, "source is not part of the playlist");
                None
            }
        }
    }
}

impl fmt::Debug for PlaylistController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaylistController")
            .field("tracks", &self.tracks.len())
            .field("current", &self.current)
            .field("shuffle", &self.shuffle)
            .field("looping", &self.looping)
            .field("bound", &self.binding.is_some())
            .finish()
    }
}
