use std::{
    collections::VecDeque,
    f32::consts::PI,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{AnalysisConfig, EventBus, PlayerError, PlayerEvent, Result};

/// One sampling tick worth of spectral and level data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    /// Normalised [0, 1] magnitudes, lowest frequency first.
    pub frequency_bins: Vec<f32>,
    /// Most recent samples in [-1, 1], oldest first.
    pub waveform_samples: Vec<f32>,
    /// Mean of `frequency_bins`.
    pub average_level: f32,
}

impl AnalysisSnapshot {
    /// Neutral snapshot reported while nothing is playing.
    pub fn silence(bin_count: usize) -> Self {
        Self {
            frequency_bins: vec![0.0; bin_count],
            waveform_samples: vec![0.0; bin_count],
            average_level: 0.0,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.average_level == 0.0 && self.waveform_samples.iter().all(|s| *s == 0.0)
    }
}

/// Non-destructive observation point at the end of the routing graph.
///
/// The tap keeps the last `fft_size` samples of a mono downmix and turns them
/// into snapshots on demand. Magnitudes are smoothed over time and mapped
/// into a decibel window before normalisation.
pub struct AnalysisTap {
    fft_size: usize,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
    history: VecDeque<f32>,
    has_media: bool,
    smoothed: Vec<f32>,
    fft: FftResources,
}

impl AnalysisTap {
    pub fn new(config: &AnalysisConfig) -> Self {
        let fft_size = config.fft_size;
        Self {
            fft_size,
            smoothing: config.smoothing,
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,
            history: VecDeque::with_capacity(fft_size),
            has_media: false,
            smoothed: vec![0.0; config.bin_count()],
            fft: FftResources::new(fft_size),
        }
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Returns whether any signal has reached the tap since the last clear.
    pub fn has_media(&self) -> bool {
        self.has_media
    }

    /// Copies an interleaved block into the history. The block itself is
    /// never modified. A trailing partial frame is ignored.
    pub fn observe(&mut self, block: &[f32], channels: usize) {
        if channels == 0 || block.is_empty() {
            return;
        }

        for frame in block.chunks_exact(channels) {
            let mono = frame.iter().sum::<f32>() / channels as f32;
            if self.history.len() == self.fft_size {
                self.history.pop_front();
            }
            self.history.push_back(mono);
        }
        self.has_media = true;
    }

    /// Forgets the buffered signal, e.g. when the media source is unloaded.
    pub fn clear(&mut self) {
        self.history.clear();
        self.smoothed.iter_mut().for_each(|value| *value = 0.0);
        self.has_media = false;
    }

    /// Computes a snapshot of the buffered signal.
    pub fn snapshot(&mut self) -> Result<AnalysisSnapshot> {
        let bin_count = self.bin_count();
        if !self.has_media {
            return Ok(AnalysisSnapshot::silence(bin_count));
        }

        let len = self.fft_size;
        let padding = len - self.history.len();
        for (index, slot) in self.fft.input.iter_mut().enumerate() {
            let sample = if index < padding {
                0.0
            } else {
                self.history[index - padding]
            };
            *slot = sample * blackman_value(index, len);
        }

        self.fft.plan.process_with_scratch(
            &mut self.fft.input,
            &mut self.fft.spectrum,
            &mut self.fft.scratch,
        )?;

        let range = self.max_decibels - self.min_decibels;
        let mut frequency_bins = Vec::with_capacity(bin_count);
        for (bin, smoothed) in self.fft.spectrum.iter().zip(self.smoothed.iter_mut()) {
            let magnitude = bin.norm() / len as f32;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
            let normalised = if *smoothed <= f32::EPSILON * f32::EPSILON {
                0.0
            } else {
                let decibels = 20.0 * smoothed.log10();
                ((decibels - self.min_decibels) / range).clamp(0.0, 1.0)
            };
            frequency_bins.push(normalised);
        }

        let mut waveform_samples = vec![0.0; bin_count];
        let available = self.history.len().min(bin_count);
        let offset = bin_count - available;
        let start = self.history.len() - available;
        for (slot, sample) in waveform_samples[offset..]
            .iter_mut()
            .zip(self.history.range(start..))
        {
            *slot = sample.clamp(-1.0, 1.0);
        }

        let average_level = if bin_count == 0 {
            0.0
        } else {
            frequency_bins.iter().sum::<f32>() / bin_count as f32
        };

        Ok(AnalysisSnapshot {
            frequency_bins,
            waveform_samples,
            average_level,
        })
    }
}

impl fmt::Debug for AnalysisTap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisTap")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .field("min_decibels", &self.min_decibels)
            .field("max_decibels", &self.max_decibels)
            .field("buffered", &self.history.len())
            .field("has_media", &self.has_media)
            .field("fft", &self.fft)
            .finish()
    }
}

/// Shared, thread-safe view over an [`AnalysisTap`]. The routing graph writes
/// through one clone while visualisers read through another.
#[derive(Clone)]
pub struct TapHandle {
    shared: Arc<Mutex<AnalysisTap>>,
}

impl TapHandle {
    pub fn new(tap: AnalysisTap) -> Self {
        Self {
            shared: Arc::new(Mutex::new(tap)),
        }
    }

    pub fn snapshot(&self) -> Result<AnalysisSnapshot> {
        self.lock()?.snapshot()
    }

    pub fn bin_count(&self) -> Result<usize> {
        Ok(self.lock()?.bin_count())
    }

    pub fn has_media(&self) -> Result<bool> {
        Ok(self.lock()?.has_media())
    }

    pub(crate) fn observe(&self, block: &[f32], channels: usize) -> Result<()> {
        self.lock()?.observe(block, channels);
        Ok(())
    }

    pub(crate) fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, AnalysisTap>> {
        self.shared
            .lock()
            .map_err(|_| PlayerError::msg("analysis tap has been poisoned"))
    }
}

impl fmt::Debug for TapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TapHandle").finish()
    }
}

/// Periodic puller that turns tap contents into `analysis-snapshot` events.
///
/// The host drives it from its refresh callback by calling [`tick`]. Ticks
/// closer together than the configured interval are skipped; a late tick
/// simply samples whatever the tap holds at that point. A stopped sampler
/// never reads the tap again until [`start`] is called.
///
/// [`tick`]: AnalysisSampler::tick
/// [`start`]: AnalysisSampler::start
#[derive(Debug)]
pub struct AnalysisSampler {
    tap: TapHandle,
    events: EventBus,
    interval: Duration,
    last_tick: Option<Duration>,
    running: bool,
}

impl AnalysisSampler {
    pub fn new(tap: TapHandle, events: EventBus, interval: Duration) -> Self {
        Self {
            tap,
            events,
            interval,
            last_tick: None,
            running: true,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self) {
        self.running = true;
        self.last_tick = None;
    }

    /// Detaches the sampler from the refresh cadence.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Host refresh callback. `now` is the host's monotonic time.
    pub fn tick(&mut self, now: Duration) -> Result<Option<AnalysisSnapshot>> {
        if !self.running {
            return Ok(None);
        }
        if let Some(last) = self.last_tick {
            if now.saturating_sub(last) < self.interval {
                return Ok(None);
            }
        }

        self.last_tick = Some(now);
        let snapshot = self.tap.snapshot()?;
        self.events
            .publish(PlayerEvent::AnalysisSnapshot(snapshot.clone()));
        Ok(Some(snapshot))
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl FftResources {
    fn new(size: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);
        let scratch = plan.make_scratch_vec();
        let spectrum = plan.make_output_vec();
        let input = plan.make_input_vec();
        Self {
            size,
            plan,
            scratch,
            spectrum,
            input,
        }
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn blackman_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    let phase = 2.0 * PI * index as f32 / len as f32;
    0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> AnalysisConfig {
        AnalysisConfig {
            fft_size: 256,
            smoothing: 0.0,
            max_decibels: 0.0,
            ..Default::default()
        }
    }

    fn sine_block(frequency: f32, sample_rate: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| 0.8 * (2.0 * PI * frequency * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn reports_silence_without_media() {
        let mut tap = AnalysisTap::new(&small_config());
        let snapshot = tap.snapshot().unwrap();

        assert_eq!(snapshot.frequency_bins.len(), 128);
        assert_eq!(snapshot.waveform_samples.len(), 128);
        assert!(snapshot.is_silent());
    }

    #[test]
    fn observing_does_not_touch_the_block() {
        let mut tap = AnalysisTap::new(&small_config());
        let block = vec![0.1, 0.2, 0.3, 0.4];
        let copy = block.clone();
        tap.observe(&block, 2);

        assert_eq!(block, copy);
        assert!(tap.has_media());
    }

    #[test]
    fn tone_peaks_in_its_bin() {
        let mut tap = AnalysisTap::new(&small_config());
        // 1 kHz at 8 kHz with 256 points lands exactly in bin 32.
        tap.observe(&sine_block(1_000.0, 8_000.0, 256), 1);
        let snapshot = tap.snapshot().unwrap();

        let (peak, _) = snapshot
            .frequency_bins
            .iter()
            .enumerate()
            .fold((0, 0.0_f32), |best, (i, v)| if *v > best.1 { (i, *v) } else { best });
        assert_eq!(peak, 32);
        assert!(snapshot.average_level > 0.0);
        assert!(snapshot.frequency_bins.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn waveform_holds_latest_samples() {
        let mut tap = AnalysisTap::new(&small_config());
        tap.observe(&[0.5, -0.5, 2.0], 1);
        let snapshot = tap.snapshot().unwrap();

        let tail = &snapshot.waveform_samples[125..];
        assert_eq!(tail, &[0.5, -0.5, 1.0]);
        assert!(snapshot.waveform_samples[..125].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn clearing_returns_to_silence() {
        let mut tap = AnalysisTap::new(&small_config());
        tap.observe(&sine_block(440.0, 8_000.0, 256), 1);
        tap.clear();

        assert!(tap.snapshot().unwrap().is_silent());
    }

    #[test]
    fn sampler_respects_interval_and_stop() {
        let tap = TapHandle::new(AnalysisTap::new(&small_config()));
        let bus = EventBus::new();
        let events = bus.subscribe();
        let mut sampler = AnalysisSampler::new(tap, bus, Duration::from_millis(16));

        assert!(sampler.tick(Duration::from_millis(0)).unwrap().is_some());
        assert!(sampler.tick(Duration::from_millis(5)).unwrap().is_none());
        assert!(sampler.tick(Duration::from_millis(40)).unwrap().is_some());

        sampler.stop();
        assert!(sampler.tick(Duration::from_millis(100)).unwrap().is_none());

        let published: Vec<_> = events.try_iter().collect();
        assert_eq!(published.len(), 2);
        assert!(matches!(published[0], PlayerEvent::AnalysisSnapshot(_)));
    }
}
