//! Core library for eqdeck.
//!
//! Two subsystems live here. The routing graph runs audio through a fixed
//! chain of equaliser bands, master gain and stereo pan, and exposes an
//! analysis tap that a sampler polls for spectrum and level snapshots. The
//! playlist controller owns the track cursor and decides what plays next
//! under shuffle and loop policy, talking to an external playback unit
//! through [`PlaybackBinding`]. Both report to the presentation layer through
//! an [`EventBus`].

pub mod analysis;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod playback;
pub mod playlist;
pub mod session;
pub mod stage;
pub mod timeline;

pub use analysis::{AnalysisSampler, AnalysisSnapshot, AnalysisTap, TapHandle};
pub use config::{AnalysisConfig, AppConfig, AudioConfig, GraphConfig, PlaylistConfig};
pub use error::{PlayerError, Result};
pub use events::{EventBus, PlayerEvent};
pub use graph::{AudioSession, RoutingGraph, StageInfo, StageRef};
pub use playback::{PlaybackBinding, PlaybackNotification, SimulatedPlayer};
pub use playlist::{parse_tracks, PlaylistController, PlaylistState, Track};
pub use session::PlayerSession;
pub use stage::{Parameter, Stage, StageKind, StageParams};
pub use timeline::{format_clock, PlaybackClock};
