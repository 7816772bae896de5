use std::{f32::consts::PI, path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use eqdeck_core::{
    format_clock, AppConfig, PlaybackNotification, PlayerEvent, PlayerSession, SimulatedPlayer,
};
use tracing_subscriber::EnvFilter;

fn main() -> eqdeck_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            config,
            shuffle,
            looping,
            seconds,
            track_seconds,
            volume,
            balance,
            eq,
        } => {
            let mut config = load_config(config.as_deref())?;
            config.playlist.shuffle |= shuffle;
            config.playlist.looping |= looping;
            let controls = Controls {
                volume,
                balance,
                eq,
            };
            run_play(config, &controls, seconds, track_seconds)
        }
        Commands::Inspect { config } => run_inspect(load_config(config.as_deref())?),
    }
}

struct Controls {
    volume: Option<f32>,
    balance: Option<f32>,
    eq: Vec<(usize, f32)>,
}

fn load_config(path: Option<&std::path::Path>) -> eqdeck_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            AppConfig::load(path)
        }
        None => Ok(AppConfig::default()),
    }
}

fn run_play(
    config: AppConfig,
    controls: &Controls,
    seconds: f32,
    track_seconds: f64,
) -> eqdeck_core::Result<()> {
    let sample_rate = config.audio.sample_rate;
    let channels = usize::from(config.audio.channels);
    let block_frames = config.audio.block_size;

    let mut session = PlayerSession::new(config)?;
    let events = session.subscribe();
    let player = SimulatedPlayer::new(Some(track_seconds));
    session.bind_player(Box::new(player.clone()));

    if let Some(volume) = controls.volume {
        session.set_volume(volume)?;
    }
    if let Some(balance) = controls.balance {
        session.set_balance(balance)?;
    }
    for (band, gain_db) in &controls.eq {
        session.set_eq_band(*band, *gain_db)?;
    }

    if session.playlist_mut().next().is_none() {
        tracing::warn!("playlist is empty, nothing to play");
        return Ok(());
    }
    tracing::info!(
        shuffle = session.playlist().shuffle_enabled(),
        looping = session.playlist().loop_enabled(),
        "starting playback"
    );

    let block_seconds = block_frames as f64 / sample_rate as f64;
    let mut block = vec![0.0_f32; block_frames * channels];
    let mut rendered_frames = 0_u64;
    let mut elapsed = 0.0_f64;

    while elapsed < f64::from(seconds) {
        let tone = session
            .playlist()
            .current_index()
            .map(|index| 220.0 * 2f32.powf(index as f32 / 12.0));
        match (player.is_playing(), tone) {
            (true, Some(frequency)) => {
                fill_tone(&mut block, channels, frequency, sample_rate, rendered_frames)
            }
            _ => block.iter_mut().for_each(|sample| *sample = 0.0),
        }

        session.render(&mut block)?;
        rendered_frames += block_frames as u64;
        elapsed += block_seconds;

        player.advance(block_seconds);
        let notifications = player.drain_notifications();
        for notification in &notifications {
            session.handle_notification(notification)?;
        }
        let finished = !player.is_playing()
            && notifications
                .iter()
                .any(|n| matches!(n, PlaybackNotification::PlaybackEnded { .. }));

        session.tick(Duration::from_secs_f64(elapsed))?;
        for event in events.try_iter() {
            print_event(&event, elapsed)?;
        }

        if finished {
            tracing::info!(at = %format_clock(elapsed), "end of playlist");
            break;
        }
    }

    Ok(())
}

fn run_inspect(config: AppConfig) -> eqdeck_core::Result<()> {
    let session = PlayerSession::new(config)?;
    let report = serde_json::json!({
        "config": session.config(),
        "stages": session.graph().layout(),
        "tracks": session.playlist().tracks(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_event(event: &PlayerEvent, elapsed: f64) -> eqdeck_core::Result<()> {
    let line = match event {
        // Full spectra are far too noisy for a terminal.
        PlayerEvent::AnalysisSnapshot(snapshot) => serde_json::json!({
            "event": "analysis-snapshot",
            "at": format_clock(elapsed),
            "average_level": snapshot.average_level,
        }),
        other => serde_json::to_value(other)?,
    };
    println!("{line}");
    Ok(())
}

fn fill_tone(block: &mut [f32], channels: usize, frequency: f32, sample_rate: u32, start: u64) {
    for (offset, frame) in block.chunks_exact_mut(channels).enumerate() {
        let t = (start + offset as u64) as f32 / sample_rate as f32;
        let value = 0.5 * (2.0 * PI * frequency * t).sin();
        frame.iter_mut().for_each(|sample| *sample = value);
    }
}

fn parse_band(raw: &str) -> Result<(usize, f32), String> {
    let (band, gain) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected BAND=DB, got `{raw}`"))?;
    let band = band
        .trim()
        .parse::<usize>()
        .map_err(|err| format!("invalid band `{band}`: {err}"))?;
    let gain = gain
        .trim()
        .parse::<f32>()
        .map_err(|err| format!("invalid gain `{gain}`: {err}"))?;
    Ok((band, gain))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Equalised playlist player with live spectrum feedback", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play the configured playlist through a simulated playback unit and
    /// print events as JSON lines.
    Play {
        /// JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Enable shuffle regardless of the configuration.
        #[arg(long)]
        shuffle: bool,
        /// Wrap around at the end of the playlist.
        #[arg(long = "loop")]
        looping: bool,
        /// Stop after this many seconds of audio.
        #[arg(long, default_value_t = 10.0)]
        seconds: f32,
        /// Length of every simulated track.
        #[arg(long, default_value_t = 2.0)]
        track_seconds: f64,
        /// Master level in 0..1.
        #[arg(long)]
        volume: Option<f32>,
        /// Stereo balance in -1..1.
        #[arg(long)]
        balance: Option<f32>,
        /// Equaliser band gain as BAND=DB, repeatable.
        #[arg(long, value_parser = parse_band)]
        eq: Vec<(usize, f32)>,
    },
    /// Print the resolved configuration and the graph layout.
    Inspect {
        /// JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
