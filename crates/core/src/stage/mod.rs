use std::{f32::consts::FRAC_PI_2, fmt, ops::RangeInclusive, str::FromStr};

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use serde::{Deserialize, Serialize};

use crate::{PlayerError, Result};

/// The closed set of processing units the routing graph is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    PeakingFilter,
    Gain,
    StereoPan,
}

/// Parameters that can be changed while the graph is live.
///
/// Each parameter belongs to exactly one [`StageKind`] and carries its own
/// valid range, so validation never depends on a lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    /// Boost or cut of a peaking filter, in dB.
    FilterGain,
    /// Linear master level.
    Level,
    /// Stereo position, -1 is hard left.
    Pan,
}

impl Parameter {
    /// Values the parameter can take; anything outside is clamped.
    pub fn range(self) -> RangeInclusive<f32> {
        match self {
            Parameter::FilterGain => -12.0..=12.0,
            Parameter::Level => 0.0..=1.0,
            Parameter::Pan => -1.0..=1.0,
        }
    }

    /// Pulls `value` into [`range`](Self::range).
    pub fn clamp(self, value: f32) -> f32 {
        let range = self.range();
        value.clamp(*range.start(), *range.end())
    }

    /// The stage kind that declares this parameter.
    pub fn kind(self) -> StageKind {
        match self {
            Parameter::FilterGain => StageKind::PeakingFilter,
            Parameter::Level => StageKind::Gain,
            Parameter::Pan => StageKind::StereoPan,
        }
    }

    /// Name used in events and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Parameter::FilterGain => "filter_gain",
            Parameter::Level => "level",
            Parameter::Pan => "pan",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Parameter {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "filter_gain" => Ok(Parameter::FilterGain),
            "level" => Ok(Parameter::Level),
            "pan" => Ok(Parameter::Pan),
            other => Err(PlayerError::invalid(format!("unknown parameter `{other}`"))),
        }
    }
}

/// Current parameter values of a stage, tagged by kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageParams {
    PeakingFilter { frequency: f32, q: f32, gain_db: f32 },
    Gain { level: f32 },
    StereoPan { pan: f32 },
}

impl StageParams {
    pub fn kind(&self) -> StageKind {
        match self {
            StageParams::PeakingFilter { .. } => StageKind::PeakingFilter,
            StageParams::Gain { .. } => StageKind::Gain,
            StageParams::StereoPan { .. } => StageKind::StereoPan,
        }
    }

    /// Returns the value of `parameter`, or `None` when this kind does not
    /// declare it.
    pub fn get(&self, parameter: Parameter) -> Option<f32> {
        match (self, parameter) {
            (StageParams::PeakingFilter { gain_db, .. }, Parameter::FilterGain) => Some(*gain_db),
            (StageParams::Gain { level }, Parameter::Level) => Some(*level),
            (StageParams::StereoPan { pan }, Parameter::Pan) => Some(*pan),
            _ => None,
        }
    }

    fn slot_mut(&mut self, parameter: Parameter) -> Option<&mut f32> {
        match (self, parameter) {
            (StageParams::PeakingFilter { gain_db, .. }, Parameter::FilterGain) => Some(gain_db),
            (StageParams::Gain { level }, Parameter::Level) => Some(level),
            (StageParams::StereoPan { pan }, Parameter::Pan) => Some(pan),
            _ => None,
        }
    }
}

enum StageDsp {
    Filter {
        sample_rate: f32,
        filters: Vec<DirectForm2Transposed<f32>>,
    },
    Scalar,
}

/// One addressable unit of the processing chain.
pub struct Stage {
    params: StageParams,
    dsp: StageDsp,
}

impl Stage {
    /// Builds a peaking filter with 0 dB gain. The centre frequency is kept
    /// just below Nyquist for the given sample rate.
    pub fn peaking_filter(sample_rate: u32, channels: usize, frequency: f32, q: f32) -> Result<Self> {
        let sample_rate = sample_rate as f32;
        let frequency = frequency.min(sample_rate * 0.5 * 0.99).max(1.0);
        let coeffs = peaking_coefficients(sample_rate, frequency, q, 0.0)?;
        let filters = (0..channels.max(1))
            .map(|_| DirectForm2Transposed::<f32>::new(coeffs))
            .collect();

        Ok(Self {
            params: StageParams::PeakingFilter {
                frequency,
                q,
                gain_db: 0.0,
            },
            dsp: StageDsp::Filter {
                sample_rate,
                filters,
            },
        })
    }

    pub fn gain(level: f32) -> Self {
        Self {
            params: StageParams::Gain {
                level: Parameter::Level.clamp(level),
            },
            dsp: StageDsp::Scalar,
        }
    }

    pub fn stereo_pan(pan: f32) -> Self {
        Self {
            params: StageParams::StereoPan {
                pan: Parameter::Pan.clamp(pan),
            },
            dsp: StageDsp::Scalar,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.params.kind()
    }

    pub fn params(&self) -> StageParams {
        self.params
    }

    pub fn value(&self, parameter: Parameter) -> Option<f32> {
        self.params.get(parameter)
    }

    /// Human readable label; filters are named after their centre frequency.
    pub fn label(&self) -> String {
        match self.params {
            StageParams::PeakingFilter { frequency, .. } => band_label(frequency),
            StageParams::Gain { .. } => "gain".to_string(),
            StageParams::StereoPan { .. } => "pan".to_string(),
        }
    }

    /// Clamps `value` to the parameter's range and applies it. Returns the
    /// value actually stored.
    pub fn set(&mut self, parameter: Parameter, value: f32) -> Result<f32> {
        if !value.is_finite() {
            return Err(PlayerError::invalid(format!(
                "{parameter} requires a finite value, got {value}"
            )));
        }
        if self.params.get(parameter).is_none() {
            return Err(PlayerError::invalid(format!(
                "{parameter} is not a parameter of a {:?} stage",
                self.kind()
            )));
        }

        let clamped = parameter.clamp(value);

        // Filter state is kept so the signal stays continuous across updates.
        if let (
            StageParams::PeakingFilter { frequency, q, .. },
            StageDsp::Filter {
                sample_rate,
                filters,
            },
        ) = (&self.params, &mut self.dsp)
        {
            let coeffs = peaking_coefficients(*sample_rate, *frequency, *q, clamped)?;
            for filter in filters.iter_mut() {
                filter.update_coefficients(coeffs);
            }
        }

        if let Some(slot) = self.params.slot_mut(parameter) {
            *slot = clamped;
        }
        Ok(clamped)
    }

    /// Processes an interleaved block in place. `buffer` must hold whole
    /// frames; [`RoutingGraph::process`](crate::RoutingGraph::process) checks that.
    pub fn process(&mut self, buffer: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }

        match (&self.params, &mut self.dsp) {
            (StageParams::PeakingFilter { .. }, StageDsp::Filter { filters, .. }) => {
                for frame in buffer.chunks_exact_mut(channels) {
                    for (sample, filter) in frame.iter_mut().zip(filters.iter_mut()) {
                        let out = filter.run(*sample);
                        // Flush denormals.
                        *sample = if out.abs() < 1e-20 { 0.0 } else { out };
                    }
                }
            }
            (StageParams::Gain { level }, _) => {
                for sample in buffer.iter_mut() {
                    *sample *= *level;
                }
            }
            (StageParams::StereoPan { pan }, _) => {
                if channels >= 2 {
                    for frame in buffer.chunks_exact_mut(channels) {
                        let (left, right) = pan_frame(*pan, frame[0], frame[1]);
                        frame[0] = left;
                        frame[1] = right;
                    }
                }
            }
            _ => {}
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("params", &self.params)
            .finish()
    }
}

/// Formats a centre frequency the way the equaliser panel labels its bands.
pub fn band_label(frequency: f32) -> String {
    if frequency < 1_000.0 {
        format!("{frequency}Hz")
    } else {
        format!("{}kHz", frequency / 1_000.0)
    }
}

fn peaking_coefficients(sample_rate: f32, frequency: f32, q: f32, gain_db: f32) -> Result<Coefficients<f32>> {
    Coefficients::<f32>::from_params(Type::PeakingEQ(gain_db), sample_rate.hz(), frequency.hz(), q)
        .map_err(|err| {
            PlayerError::invalid(format!(
                "cannot build peaking filter at {frequency} Hz (q {q}): {err:?}"
            ))
        })
}

/// Equal-power stereo panning of a stereo frame.
fn pan_frame(pan: f32, left: f32, right: f32) -> (f32, f32) {
    let x = if pan <= 0.0 { pan + 1.0 } else { pan };
    let gain_l = (x * FRAC_PI_2).cos();
    let gain_r = (x * FRAC_PI_2).sin();

    if pan <= 0.0 {
        (left + right * gain_l, right * gain_r)
    } else {
        (left * gain_l, right + left * gain_r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f32, sample_rate: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn stored_value_is_clamped_to_range() {
        let mut gain = Stage::gain(0.5);
        let mut pan = Stage::stereo_pan(0.0);
        let mut band = Stage::peaking_filter(48_000, 2, 1_000.0, 1.0).unwrap();

        for value in [-40.0, -1.5, -0.3, 0.0, 0.7, 1.5, 40.0] {
            assert_eq!(gain.set(Parameter::Level, value).unwrap(), value.clamp(0.0, 1.0));
            assert_eq!(gain.value(Parameter::Level), Some(value.clamp(0.0, 1.0)));
            assert_eq!(pan.set(Parameter::Pan, value).unwrap(), value.clamp(-1.0, 1.0));
            assert_eq!(
                band.set(Parameter::FilterGain, value).unwrap(),
                value.clamp(-12.0, 12.0)
            );
        }
    }

    #[test]
    fn rejects_parameters_of_other_kinds() {
        let mut gain = Stage::gain(0.5);
        let err = gain.set(Parameter::Pan, 0.2).unwrap_err();

        assert!(matches!(err, PlayerError::InvalidParameter(_)));
        assert_eq!(gain.value(Parameter::Level), Some(0.5));
    }

    #[test]
    fn rejects_non_finite_values() {
        let mut pan = Stage::stereo_pan(0.25);
        assert!(pan.set(Parameter::Pan, f32::NAN).is_err());
        assert_eq!(pan.value(Parameter::Pan), Some(0.25));
    }

    #[test]
    fn parses_parameter_names() {
        assert_eq!("level".parse::<Parameter>().unwrap(), Parameter::Level);
        assert!("volume".parse::<Parameter>().is_err());
    }

    #[test]
    fn flat_filter_passes_signal_through() {
        let mut band = Stage::peaking_filter(48_000, 1, 1_000.0, 1.0).unwrap();
        let input = sine(440.0, 48_000.0, 512);
        let mut output = input.clone();
        band.process(&mut output, 1);

        for (a, b) in input.iter().zip(&output) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn boosted_band_raises_level_at_centre() {
        let mut band = Stage::peaking_filter(48_000, 1, 1_000.0, 1.0).unwrap();
        band.set(Parameter::FilterGain, 12.0).unwrap();

        let input = sine(1_000.0, 48_000.0, 9_600);
        let mut output = input.clone();
        band.process(&mut output, 1);

        let ratio = rms(&output[4_800..]) / rms(&input[4_800..]);
        assert!(ratio > 3.0, "ratio was {ratio}");
    }

    #[test]
    fn gain_scales_samples() {
        let mut gain = Stage::gain(0.5);
        let mut block = vec![1.0, -1.0, 0.5, -0.5];
        gain.process(&mut block, 2);
        assert_eq!(block, vec![0.5, -0.5, 0.25, -0.25]);
    }

    #[test]
    fn centred_pan_is_transparent() {
        let mut pan = Stage::stereo_pan(0.0);
        let mut block = vec![0.3, -0.6];
        pan.process(&mut block, 2);
        assert!((block[0] - 0.3).abs() < 1e-6);
        assert!((block[1] + 0.6).abs() < 1e-6);
    }

    #[test]
    fn hard_left_folds_right_channel_into_left() {
        let mut pan = Stage::stereo_pan(-1.0);
        let mut block = vec![0.25, 0.5];
        pan.process(&mut block, 2);
        assert!((block[0] - 0.75).abs() < 1e-6);
        assert!(block[1].abs() < 1e-6);
    }

    #[test]
    fn filter_frequency_is_kept_below_nyquist() {
        let band = Stage::peaking_filter(22_050, 2, 16_000.0, 1.0).unwrap();
        match band.params() {
            StageParams::PeakingFilter { frequency, .. } => assert!(frequency < 11_025.0),
            other => panic!("unexpected params {other:?}"),
        }
    }

    #[test]
    fn labels_bands_like_the_equaliser_panel() {
        assert_eq!(band_label(60.0), "60Hz");
        assert_eq!(band_label(1_000.0), "1kHz");
        assert_eq!(band_label(12_000.0), "12kHz");
    }
}
