use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::info;

use crate::{
    AnalysisSampler, AnalysisSnapshot, AppConfig, EventBus, Parameter, PlaybackBinding,
    PlaybackNotification, PlayerError, PlayerEvent, PlaylistController, Result, RoutingGraph,
};

/// Everything one player instance owns: the routing graph, the playlist
/// cursor, the analysis sampler and the event bus they publish on.
#[derive(Debug)]
pub struct PlayerSession {
    config: AppConfig,
    events: EventBus,
    graph: RoutingGraph,
    playlist: PlaylistController,
    sampler: AnalysisSampler,
}

impl PlayerSession {
    /// Builds the routing graph and the playlist from `config`. Fails when
    /// the audio session cannot be opened.
    pub fn new(config: AppConfig) -> Result<Self> {
        let playlist = PlaylistController::from_config(&config.playlist, EventBus::new());
        Self::with_playlist(config, playlist)
    }

    /// Like [`new`](Self::new) but with a pre-built playlist controller,
    /// e.g. one with a fixed shuffle seed.
    pub fn with_playlist(config: AppConfig, playlist: PlaylistController) -> Result<Self> {
        config.validate()?;
        let events = EventBus::new();
        let graph = RoutingGraph::construct(
            config.graph.clone(),
            &config.analysis,
            &config.audio,
            events.clone(),
        )?;
        let sampler = AnalysisSampler::new(
            graph.tap(),
            events.clone(),
            config.analysis.refresh_interval()?,
        );
        let playlist = playlist.with_events(events.clone());

        info!(tracks = playlist.len(), "player session ready");
        Ok(Self {
            config,
            events,
            graph,
            playlist,
            sampler,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// New receiver for every event the session publishes.
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn graph(&self) -> &RoutingGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut RoutingGraph {
        &mut self.graph
    }

    pub fn playlist(&self) -> &PlaylistController {
        &self.playlist
    }

    pub fn playlist_mut(&mut self) -> &mut PlaylistController {
        &mut self.playlist
    }

    pub fn sampler_mut(&mut self) -> &mut AnalysisSampler {
        &mut self.sampler
    }

    /// Attaches the playback unit the playlist drives.
    pub fn bind_player(&mut self, binding: Box<dyn PlaybackBinding>) {
        self.playlist.bind(binding);
    }

    /// Tears the graph down and builds it again, e.g. after the audio device
    /// was reset. Stage references taken before are invalidated.
    pub fn rebuild(&mut self) -> Result<()> {
        info!("rebuilding routing graph");
        self.graph.build(&self.config.audio)
    }

    /// Sets the gain of equaliser band `band`, counted from the lowest
    /// frequency.
    pub fn set_eq_band(&mut self, band: usize, gain_db: f32) -> Result<Option<f32>> {
        if !self.graph.is_constructed() {
            return Ok(None);
        }
        let stage = self
            .graph
            .filter_refs()
            .get(band)
            .copied()
            .ok_or_else(|| PlayerError::invalid(format!("no equaliser band {band}")))?;
        self.graph.set_parameter(stage, Parameter::FilterGain, gain_db)
    }

    /// Sets the master level, clamped to [0, 1].
    pub fn set_volume(&mut self, level: f32) -> Result<Option<f32>> {
        match self.graph.gain_ref() {
            Some(stage) => self.graph.set_parameter(stage, Parameter::Level, level),
            None => Ok(None),
        }
    }

    /// Sets the stereo position, clamped to [-1, 1].
    pub fn set_balance(&mut self, pan: f32) -> Result<Option<f32>> {
        match self.graph.pan_ref() {
            Some(stage) => self.graph.set_parameter(stage, Parameter::Pan, pan),
            None => Ok(None),
        }
    }

    /// Pushes one block of source audio through the graph.
    pub fn render(&mut self, block: &mut [f32]) -> Result<()> {
        self.graph.process(block)
    }

    /// Host refresh callback for the analysis sampler.
    pub fn tick(&mut self, now: Duration) -> Result<Option<AnalysisSnapshot>> {
        self.sampler.tick(now)
    }

    /// Forwards a playback-unit notification to the playlist. When the end of
    /// the list is reached the tap is cleared so visualisers fall silent.
    pub fn handle_notification(&mut self, notification: &PlaybackNotification) -> Result<Option<usize>> {
        let selected = self.playlist.handle_notification(notification);
        if selected.is_none() && matches!(notification, PlaybackNotification::PlaybackEnded { .. }) {
            self.graph.unload_media()?;
        }
        Ok(selected)
    }
}
