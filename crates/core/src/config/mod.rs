use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{PlayerError, Result};

/// Sampler refresh rates accepted by [`AnalysisConfig::validate`], in Hz.
pub const REFRESH_HZ_RANGE: std::ops::RangeInclusive<f32> = 0.1..=1_000.0;

/// Ten-band layout used by the graphic equaliser when nothing else is configured.
pub const DEFAULT_EQ_FREQUENCIES: [f32; 10] = [
    60.0, 170.0, 310.0, 600.0, 1_000.0, 3_000.0, 6_000.0, 12_000.0, 14_000.0, 16_000.0,
];

/// Top-level configuration structure for the application.
///
/// Every section is optional in the JSON form; missing sections fall back to
/// their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub analysis: AnalysisConfig,
    pub graph: GraphConfig,
    pub playlist: PlaylistConfig,
}

impl AppConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Rejects sections whose values cannot drive a player session.
    pub fn validate(&self) -> Result<()> {
        self.analysis.validate()?;
        self.graph.validate()
    }
}

/// Configuration of the audio session the routing graph runs in.
///
/// These values are not validated here: a session that cannot honour them
/// fails to open with [`PlayerError::ResourceUnavailable`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            block_size: 512,
        }
    }
}

/// Settings of the analysis tap and the sampler that polls it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    pub refresh_hz: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
            refresh_hz: 60.0,
        }
    }
}

impl AnalysisConfig {
    /// Number of frequency bins in every snapshot.
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Time between two sampler ticks.
    pub fn refresh_interval(&self) -> Result<Duration> {
        Duration::try_from_secs_f32(1.0 / self.refresh_hz).map_err(|err| {
            PlayerError::malformed(format!("refresh_hz {} is unusable: {err}", self.refresh_hz))
        })
    }

    /// Checks the FFT size, smoothing factor, decibel window and refresh rate.
    pub fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two() || !(32..=32_768).contains(&self.fft_size) {
            return Err(PlayerError::malformed(format!(
                "fft_size must be a power of two between 32 and 32768, got {}",
                self.fft_size
            )));
        }
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(PlayerError::malformed(format!(
                "smoothing must lie in [0, 1], got {}",
                self.smoothing
            )));
        }
        if !self.min_decibels.is_finite()
            || !self.max_decibels.is_finite()
            || self.min_decibels >= self.max_decibels
        {
            return Err(PlayerError::malformed(format!(
                "decibel window [{}, {}] is empty",
                self.min_decibels, self.max_decibels
            )));
        }
        if !REFRESH_HZ_RANGE.contains(&self.refresh_hz) {
            return Err(PlayerError::malformed(format!(
                "refresh_hz must lie in [{}, {}], got {}",
                REFRESH_HZ_RANGE.start(),
                REFRESH_HZ_RANGE.end(),
                self.refresh_hz
            )));
        }
        Ok(())
    }
}

/// Layout and initial values of the processing chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub eq_frequencies: Vec<f32>,
    pub filter_q: f32,
    pub initial_gain: f32,
    pub initial_pan: f32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            eq_frequencies: DEFAULT_EQ_FREQUENCIES.to_vec(),
            filter_q: 1.0,
            initial_gain: 0.5,
            initial_pan: 0.0,
        }
    }
}

impl GraphConfig {
    /// Checks band frequencies, filter Q and the initial gain and pan.
    pub fn validate(&self) -> Result<()> {
        if let Some(bad) = self
            .eq_frequencies
            .iter()
            .find(|freq| !freq.is_finite() || **freq <= 0.0)
        {
            return Err(PlayerError::malformed(format!(
                "equaliser frequencies must be positive, got {bad}"
            )));
        }
        if !self.filter_q.is_finite() || self.filter_q <= 0.0 {
            return Err(PlayerError::malformed(format!(
                "filter_q must be positive, got {}",
                self.filter_q
            )));
        }
        if !self.initial_gain.is_finite() || !self.initial_pan.is_finite() {
            return Err(PlayerError::malformed("initial gain and pan must be finite"));
        }
        Ok(())
    }
}

/// Initial playlist policy and track records.
///
/// Tracks are kept as raw JSON so a single malformed record can be skipped
/// when the playlist is populated instead of rejecting the whole file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistConfig {
    pub shuffle: bool,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub tracks: serde_json::Value,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            shuffle: false,
            looping: false,
            tracks: serde_json::Value::Array(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AppConfig::from_json_str("{}").unwrap();

        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.analysis.bin_count(), 1024);
        assert_eq!(config.graph.eq_frequencies, DEFAULT_EQ_FREQUENCIES.to_vec());
        assert_eq!(config.graph.initial_gain, 0.5);
        assert!(!config.playlist.shuffle);
        assert!(!config.playlist.looping);
    }

    #[test]
    fn reads_partial_sections() {
        let raw = r#"{
            "graph": { "eq_frequencies": [100, 1000] },
            "playlist": { "loop": true, "tracks": [{ "src": "a.mp3" }] }
        }"#;
        let config = AppConfig::from_json_str(raw).unwrap();

        assert_eq!(config.graph.eq_frequencies, vec![100.0, 1000.0]);
        assert_eq!(config.graph.filter_q, 1.0);
        assert!(config.playlist.looping);
        assert!(config.playlist.tracks.is_array());
    }

    #[test]
    fn rejects_non_positive_frequencies() {
        let raw = r#"{ "graph": { "eq_frequencies": [60, 0] } }"#;
        let err = AppConfig::from_json_str(raw).unwrap_err();

        assert!(matches!(err, PlayerError::MalformedConfiguration(_)));
    }

    #[test]
    fn rejects_bad_fft_size() {
        let raw = r#"{ "analysis": { "fft_size": 1000 } }"#;
        let err = AppConfig::from_json_str(raw).unwrap_err();

        assert!(format!("{err}").contains("fft_size"));
    }

    #[test]
    fn rejects_refresh_rates_outside_the_supported_range() {
        for raw in [
            r#"{ "analysis": { "refresh_hz": 1e-30 } }"#,
            r#"{ "analysis": { "refresh_hz": 1e-45 } }"#,
            r#"{ "analysis": { "refresh_hz": 0 } }"#,
            r#"{ "analysis": { "refresh_hz": 5000 } }"#,
        ] {
            let err = AppConfig::from_json_str(raw).unwrap_err();
            assert!(matches!(err, PlayerError::MalformedConfiguration(_)), "{raw}");
        }

        let config = AppConfig::from_json_str(r#"{ "analysis": { "refresh_hz": 0.1 } }"#).unwrap();
        let interval = config.analysis.refresh_interval().unwrap();
        assert!((interval.as_secs_f32() - 10.0).abs() < 1e-3);
    }

    #[test]
    fn unvalidated_refresh_rate_does_not_panic() {
        let analysis = AnalysisConfig {
            refresh_hz: 1e-30,
            ..Default::default()
        };
        assert!(matches!(
            analysis.refresh_interval(),
            Err(PlayerError::MalformedConfiguration(_))
        ));
    }

    #[test]
    fn surfaces_json_errors() {
        let err = AppConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, PlayerError::Json(_)));
    }
}
