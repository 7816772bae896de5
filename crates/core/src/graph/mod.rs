use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    AnalysisConfig, AnalysisSnapshot, AnalysisTap, AudioConfig, EventBus, GraphConfig, Parameter,
    PlayerError, PlayerEvent, Result, Stage, StageKind, StageParams, TapHandle,
};

const SUPPORTED_SAMPLE_RATES: std::ops::RangeInclusive<u32> = 3_000..=768_000;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Audio context the routing graph runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSession {
    id: u64,
    sample_rate: u32,
    channels: usize,
}

impl AudioSession {
    /// Opens a session for the requested format.
    ///
    /// Formats the engine cannot run are refused with
    /// [`PlayerError::ResourceUnavailable`].
    pub fn open(config: &AudioConfig) -> Result<Self> {
        if !SUPPORTED_SAMPLE_RATES.contains(&config.sample_rate) {
            return Err(PlayerError::ResourceUnavailable(format!(
                "sample rate {} Hz is not supported",
                config.sample_rate
            )));
        }
        if !(1..=2).contains(&config.channels) {
            return Err(PlayerError::ResourceUnavailable(format!(
                "{} channels requested, only mono and stereo are available",
                config.channels
            )));
        }
        if config.block_size == 0 {
            return Err(PlayerError::ResourceUnavailable(
                "block size must be at least one frame".to_string(),
            ));
        }

        Ok(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            sample_rate: config.sample_rate,
            channels: usize::from(config.channels),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

/// Handle addressing one stage of one particular graph build.
///
/// A reference obtained before a rebuild does not address the rebuilt graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageRef {
    pub session: u64,
    pub index: usize,
}

impl fmt::Display for StageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage #{} of session {}", self.index, self.session)
    }
}

/// Serializable description of one stage, used by inspection tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageInfo {
    pub stage: StageRef,
    pub label: String,
    pub params: StageParams,
}

struct Chain {
    session: AudioSession,
    stages: Vec<Stage>,
}

/// Fixed-topology processing chain:
/// source → filters → gain → pan → {sink, tap}.
///
/// Until [`build`](RoutingGraph::build) succeeds the graph is unconstructed
/// and every operation is a no-op: parameter updates are not applied, audio
/// passes through untouched and sampling reports silence.
pub struct RoutingGraph {
    config: GraphConfig,
    bin_count: usize,
    events: EventBus,
    chain: Option<Chain>,
    tap: TapHandle,
}

impl RoutingGraph {
    pub fn new(config: GraphConfig, analysis: &AnalysisConfig, events: EventBus) -> Self {
        Self {
            config,
            bin_count: analysis.bin_count(),
            events,
            chain: None,
            tap: TapHandle::new(AnalysisTap::new(analysis)),
        }
    }

    /// Creates a graph and builds it in one go.
    pub fn construct(
        config: GraphConfig,
        analysis: &AnalysisConfig,
        audio: &AudioConfig,
        events: EventBus,
    ) -> Result<Self> {
        let mut graph = Self::new(config, analysis, events);
        graph.build(audio)?;
        Ok(graph)
    }

    /// Opens a fresh audio session and assembles the chain, replacing any
    /// previous build. On failure the graph is left unconstructed.
    pub fn build(&mut self, audio: &AudioConfig) -> Result<()> {
        self.chain = None;
        self.tap.clear()?;

        let session = match AudioSession::open(audio) {
            Ok(session) => session,
            Err(err) => {
                warn!(%err, "routing graph left unconstructed");
                return Err(err);
            }
        };

        let channels = session.channels();
        let mut stages = Vec::with_capacity(self.config.eq_frequencies.len() + 2);
        for frequency in &self.config.eq_frequencies {
            stages.push(Stage::peaking_filter(
                session.sample_rate(),
                channels,
                *frequency,
                self.config.filter_q,
            )?);
        }
        stages.push(Stage::gain(self.config.initial_gain));
        stages.push(Stage::stereo_pan(self.config.initial_pan));

        info!(
            session = session.id(),
            sample_rate = session.sample_rate(),
            channels,
            stages = stages.len(),
            "routing graph constructed"
        );
        self.chain = Some(Chain { session, stages });
        Ok(())
    }

    /// Drops the chain. The graph behaves as unconstructed afterwards.
    pub fn teardown(&mut self) -> Result<()> {
        if let Some(chain) = self.chain.take() {
            info!(session = chain.session.id(), "routing graph torn down");
        }
        self.tap.clear()
    }

    /// Whether an audio session is open and the chain is built.
    pub fn is_constructed(&self) -> bool {
        self.chain.is_some()
    }

    /// The audio session of the current build.
    pub fn session(&self) -> Option<&AudioSession> {
        self.chain.as_ref().map(|chain| &chain.session)
    }

    /// References to every stage in signal-flow order.
    pub fn stage_refs(&self) -> Vec<StageRef> {
        self.chain
            .as_ref()
            .map(|chain| {
                (0..chain.stages.len())
                    .map(|index| StageRef {
                        session: chain.session.id(),
                        index,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Equaliser bands, lowest frequency first.
    pub fn filter_refs(&self) -> Vec<StageRef> {
        self.refs_of_kind(StageKind::PeakingFilter)
    }

    /// The master gain stage, if the graph is constructed.
    pub fn gain_ref(&self) -> Option<StageRef> {
        self.refs_of_kind(StageKind::Gain).into_iter().next()
    }

    /// The stereo pan stage, if the graph is constructed.
    pub fn pan_ref(&self) -> Option<StageRef> {
        self.refs_of_kind(StageKind::StereoPan).into_iter().next()
    }

    /// Looks up a stage of the current build.
    pub fn stage(&self, stage: StageRef) -> Option<&Stage> {
        let chain = self.chain.as_ref()?;
        if stage.session != chain.session.id() {
            return None;
        }
        chain.stages.get(stage.index)
    }

    /// Every stage in processing order with its label and parameters.
    pub fn layout(&self) -> Vec<StageInfo> {
        self.stage_refs()
            .into_iter()
            .filter_map(|stage| {
                self.stage(stage).map(|s| StageInfo {
                    stage,
                    label: s.label(),
                    params: s.params(),
                })
            })
            .collect()
    }

    /// Clamps and applies a parameter value, then publishes
    /// `parameter-changed`.
    ///
    /// Returns the stored value, or `None` when the graph is unconstructed.
    /// References to stages outside this build and parameters the stage does
    /// not declare are rejected with [`PlayerError::InvalidParameter`].
    pub fn set_parameter(
        &mut self,
        stage: StageRef,
        parameter: Parameter,
        value: f32,
    ) -> Result<Option<f32>> {
        let Some(chain) = self.chain.as_mut() else {
            debug!(%stage, %parameter, "ignoring parameter update on unconstructed graph");
            return Ok(None);
        };

        if stage.session != chain.session.id() {
            return Err(PlayerError::invalid(format!("{stage} is not part of this graph")));
        }
        let target = chain
            .stages
            .get_mut(stage.index)
            .ok_or_else(|| PlayerError::invalid(format!("{stage} does not exist")))?;

        let stored = target.set(parameter, value)?;
        debug!(%stage, %parameter, requested = value, stored, "parameter changed");
        self.events.publish(PlayerEvent::ParameterChanged {
            stage,
            parameter,
            value: stored,
        });
        Ok(Some(stored))
    }

    /// Runs an interleaved block through every stage in order and feeds the
    /// result to the tap. The block holds what the sink receives.
    ///
    /// Blocks that do not hold whole frames are rejected untouched.
    pub fn process(&mut self, block: &mut [f32]) -> Result<()> {
        let Some(chain) = self.chain.as_mut() else {
            return Ok(());
        };

        let channels = chain.session.channels();
        if block.len() % channels != 0 {
            return Err(PlayerError::invalid(format!(
                "block of {} samples is not a whole number of {channels}-channel frames",
                block.len()
            )));
        }
        for stage in chain.stages.iter_mut() {
            stage.process(block, channels);
        }
        self.tap.observe(block, channels)
    }

    /// Snapshot of what the tap currently holds.
    pub fn sample(&self) -> Result<AnalysisSnapshot> {
        if self.chain.is_none() {
            return Ok(AnalysisSnapshot::silence(self.bin_count));
        }
        self.tap.snapshot()
    }

    /// Forgets buffered signal after the media source went away.
    pub fn unload_media(&self) -> Result<()> {
        self.tap.clear()
    }

    /// Handle for external visualisers.
    pub fn tap(&self) -> TapHandle {
        self.tap.clone()
    }

    fn refs_of_kind(&self, kind: StageKind) -> Vec<StageRef> {
        self.stage_refs()
            .into_iter()
            .filter(|stage| self.stage(*stage).map(Stage::kind) == Some(kind))
            .collect()
    }
}

impl fmt::Debug for RoutingGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingGraph")
            .field("constructed", &self.is_constructed())
            .field("session", &self.session())
            .field("stages", &self.chain.as_ref().map(|chain| chain.stages.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_EQ_FREQUENCIES;

    fn build_graph(events: EventBus) -> RoutingGraph {
        RoutingGraph::construct(
            GraphConfig::default(),
            &AnalysisConfig::default(),
            &AudioConfig::default(),
            events,
        )
        .unwrap()
    }

    #[test]
    fn assembles_filters_then_gain_then_pan() {
        let graph = build_graph(EventBus::new());
        let layout = graph.layout();

        assert_eq!(layout.len(), DEFAULT_EQ_FREQUENCIES.len() + 2);
        for (info, frequency) in layout.iter().zip(DEFAULT_EQ_FREQUENCIES) {
            match info.params {
                StageParams::PeakingFilter { frequency: f, q, gain_db } => {
                    assert_eq!(f, frequency);
                    assert_eq!(q, 1.0);
                    assert_eq!(gain_db, 0.0);
                }
                other => panic!("expected a filter, got {other:?}"),
            }
        }
        assert_eq!(layout[10].params, StageParams::Gain { level: 0.5 });
        assert_eq!(layout[11].params, StageParams::StereoPan { pan: 0.0 });
        assert_eq!(layout[0].label, "60Hz");
        assert_eq!(layout[9].label, "16kHz");
    }

    #[test]
    fn gain_above_range_is_clamped() {
        let bus = EventBus::new();
        let events = bus.subscribe();
        let mut graph = build_graph(bus);
        let gain = graph.gain_ref().unwrap();

        let stored = graph.set_parameter(gain, Parameter::Level, 1.5).unwrap();

        assert_eq!(stored, Some(1.0));
        assert_eq!(graph.stage(gain).unwrap().value(Parameter::Level), Some(1.0));
        assert_eq!(
            events.try_recv().unwrap(),
            PlayerEvent::ParameterChanged {
                stage: gain,
                parameter: Parameter::Level,
                value: 1.0,
            }
        );
    }

    #[test]
    fn rejects_stage_of_another_graph() {
        let mut graph = build_graph(EventBus::new());
        let other = build_graph(EventBus::new());
        let foreign = other.pan_ref().unwrap();

        let err = graph.set_parameter(foreign, Parameter::Pan, 0.3).unwrap_err();
        assert!(matches!(err, PlayerError::InvalidParameter(_)));
        assert_eq!(
            graph.stage(graph.pan_ref().unwrap()).unwrap().value(Parameter::Pan),
            Some(0.0)
        );
    }

    #[test]
    fn rebuild_invalidates_old_references() {
        let mut graph = build_graph(EventBus::new());
        let stale = graph.gain_ref().unwrap();
        graph.build(&AudioConfig::default()).unwrap();

        assert!(graph.set_parameter(stale, Parameter::Level, 0.2).is_err());
        assert!(graph.stage(stale).is_none());
    }

    #[test]
    fn rejects_parameter_the_stage_lacks() {
        let bus = EventBus::new();
        let events = bus.subscribe();
        let mut graph = build_graph(bus);
        let band = graph.filter_refs()[0];

        assert!(graph.set_parameter(band, Parameter::Pan, 0.3).is_err());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn failed_session_leaves_graph_inert() {
        let audio = AudioConfig {
            sample_rate: 0,
            ..Default::default()
        };
        let mut graph = RoutingGraph::new(
            GraphConfig::default(),
            &AnalysisConfig::default(),
            EventBus::new(),
        );

        let err = graph.build(&audio).unwrap_err();
        assert!(matches!(err, PlayerError::ResourceUnavailable(_)));
        assert!(!graph.is_constructed());
        assert!(graph.stage_refs().is_empty());

        let stale = StageRef {
            session: 0,
            index: 0,
        };
        assert_eq!(graph.set_parameter(stale, Parameter::Level, 0.3).unwrap(), None);

        let mut block = vec![0.4, -0.4];
        graph.process(&mut block).unwrap();
        assert_eq!(block, vec![0.4, -0.4]);
        assert!(graph.sample().unwrap().is_silent());

        graph.build(&AudioConfig::default()).unwrap();
        assert!(graph.is_constructed());
    }

    #[test]
    fn tap_sees_what_the_sink_gets() {
        let mut graph = build_graph(EventBus::new());
        assert!(graph.sample().unwrap().is_silent());

        let mut block = vec![0.8_f32; 512];
        graph.process(&mut block).unwrap();

        // Flat EQ, gain 0.5, centred pan.
        assert!(block.iter().all(|s| (s - 0.4).abs() < 1e-3));
        let snapshot = graph.sample().unwrap();
        let last = *snapshot.waveform_samples.last().unwrap();
        assert!((last - block[block.len() - 1]).abs() < 1e-6);
        assert!(snapshot.average_level > 0.0);

        graph.unload_media().unwrap();
        assert!(graph.sample().unwrap().is_silent());
    }

    #[test]
    fn pan_update_moves_signal_between_channels() {
        let mut graph = build_graph(EventBus::new());
        let pan = graph.pan_ref().unwrap();
        graph.set_parameter(pan, Parameter::Pan, 1.0).unwrap();

        let mut block = vec![0.6_f32, 0.0].repeat(64);
        graph.process(&mut block).unwrap();

        let (left, right) = (block[126], block[127]);
        assert!(left.abs() < 1e-3);
        assert!(right > 0.25);
    }

    #[test]
    fn partial_frames_are_rejected_untouched() {
        let mut graph = build_graph(EventBus::new());

        let mut block = vec![0.8_f32, 0.8, 0.8];
        let err = graph.process(&mut block).unwrap_err();

        assert!(matches!(err, PlayerError::InvalidParameter(_)));
        assert_eq!(block, vec![0.8, 0.8, 0.8]);
        assert!(!graph.tap().has_media().unwrap());
    }
}
