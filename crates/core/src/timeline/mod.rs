use serde::{Deserialize, Serialize};

/// Resolution of the seek slider: positions are expressed in 1/1000 of the
/// track duration.
pub const SEEK_RESOLUTION: f64 = 1_000.0;

/// Position of the playback head within the current track.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackClock {
    pub position_seconds: f64,
    /// Unknown until the media reports its metadata.
    pub duration_seconds: Option<f64>,
}

impl PlaybackClock {
    pub fn new(duration_seconds: Option<f64>) -> Self {
        Self {
            position_seconds: 0.0,
            duration_seconds: duration_seconds.filter(|d| d.is_finite() && *d > 0.0),
        }
    }

    pub fn reset(&mut self) {
        self.position_seconds = 0.0;
    }

    /// Moves the head forward, stopping at the end of the track.
    pub fn advance(&mut self, delta: f64) {
        self.seek(self.position_seconds + delta.max(0.0));
    }

    pub fn seek(&mut self, seconds: f64) {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        self.position_seconds = match self.duration_seconds {
            Some(duration) => seconds.min(duration),
            None => seconds,
        };
    }

    /// Seeks to a slider position in `0..=1000`. Ignored while the duration
    /// is unknown.
    pub fn seek_permille(&mut self, permille: f64) {
        if let Some(duration) = self.duration_seconds {
            let fraction = (permille / SEEK_RESOLUTION).clamp(0.0, 1.0);
            self.seek(fraction * duration);
        }
    }

    /// Slider position in `0..=1000` matching the current head.
    pub fn permille(&self) -> Option<u32> {
        self.progress()
            .map(|fraction| (fraction * SEEK_RESOLUTION).floor() as u32)
    }

    pub fn progress(&self) -> Option<f64> {
        self.duration_seconds
            .map(|duration| (self.position_seconds / duration).min(1.0))
    }

    pub fn finished(&self) -> bool {
        self.duration_seconds
            .map(|duration| self.position_seconds >= duration)
            .unwrap_or(false)
    }
}

/// Formats seconds as `m:ss`. Negative or non-finite input reads `0:00`.
pub fn format_clock(seconds: f64) -> String {
    let seconds = if seconds.is_finite() && seconds >= 0.0 {
        seconds
    } else {
        0.0
    };
    let minutes = (seconds / 60.0).floor() as u64;
    let rest = (seconds % 60.0).floor() as u64;
    format!("{minutes}:{rest:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_stops_at_duration() {
        let mut clock = PlaybackClock::new(Some(10.0));
        clock.advance(4.0);
        assert!(!clock.finished());
        clock.advance(20.0);
        assert_eq!(clock.position_seconds, 10.0);
        assert!(clock.finished());
    }

    #[test]
    fn permille_seek_needs_a_duration() {
        let mut unknown = PlaybackClock::new(None);
        unknown.seek_permille(500.0);
        assert_eq!(unknown.position_seconds, 0.0);
        assert_eq!(unknown.permille(), None);

        let mut known = PlaybackClock::new(Some(200.0));
        known.seek_permille(250.0);
        assert_eq!(known.position_seconds, 50.0);
        assert_eq!(known.permille(), Some(250));
    }

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_clock(0.0), "0:00");
        assert_eq!(format_clock(65.9), "1:05");
        assert_eq!(format_clock(-3.0), "0:00");
        assert_eq!(format_clock(f64::NAN), "0:00");
    }
}
