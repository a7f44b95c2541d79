use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aulos::{
    Config, EngineHooks, FfmpegOpener, PlayOptions, PlaybackEngine, PlayerEvent, SubprocessSink,
    TrackRef,
};

#[derive(Parser)]
#[command(name = "test_playback")]
#[command(about = "Plays the library (or the given files/URLs) through the engine")]
struct Args {
    /// Files or stream URLs to play; the whole library when omitted
    items: Vec<String>,

    /// Search pattern instead of explicit items (regex, '#recent', or a URL)
    #[arg(long)]
    search: Option<String>,

    /// Fade the volume in over the configured duration
    #[arg(long)]
    fade_in: bool,

    /// Keep the playlist order instead of shuffling
    #[arg(long)]
    no_shuffle: bool,

    /// Seconds to play before stopping (0 = until the playlist ends)
    #[arg(long, default_value_t = 0)]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::load()?;
    info!("music dir: {}", config.music_dir.display());

    let opener = Arc::new(FfmpegOpener::new(
        config.playback.mono,
        config.playback.sample_rate,
    ));
    let sink = Box::new(SubprocessSink::new());
    let mut engine = PlaybackEngine::new(config, opener, sink);

    engine.set_hooks(EngineHooks {
        on_progress: Some(Box::new(|p| {
            info!("position: {}% of {:?}s", p.percent, p.duration_secs);
        })),
        ..EngineHooks::default()
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.set_event_sender(tx);

    if let Some(pattern) = &args.search {
        engine.search_and_play(pattern)?;
    } else if args.items.is_empty() {
        engine.play(
            None,
            PlayOptions {
                shuffle: !args.no_shuffle,
                fade_in: args.fade_in,
            },
        )?;
    } else {
        let items = args
            .items
            .iter()
            .map(|item| {
                if aulos::source::is_stream(item) {
                    TrackRef::stream(item.clone())
                } else {
                    TrackRef::file(item)
                }
            })
            .collect();
        engine.play(
            Some(items),
            PlayOptions {
                shuffle: !args.no_shuffle,
                fade_in: args.fade_in,
            },
        )?;
    }

    let deadline = (args.duration > 0).then(|| tokio::time::Instant::now() + Duration::from_secs(args.duration));
    loop {
        let event = match deadline {
            Some(at) => match tokio::time::timeout_at(at, rx.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    info!("time is up, stopping");
                    break;
                }
            },
            None => rx.recv().await,
        };
        match event {
            Some(PlayerEvent::TrackStarted(track)) => info!("started: {}", track.location()),
            Some(PlayerEvent::TrackFinished(track)) => info!("finished: {}", track.location()),
            Some(PlayerEvent::PlaylistEnded) => {
                info!("playlist ended");
                break;
            }
            Some(PlayerEvent::TrackStopped) => {
                info!("stopped");
                break;
            }
            Some(PlayerEvent::Error(msg)) => warn!("engine error: {}", msg),
            Some(event) => info!("event: {:?}", event),
            None => break,
        }
    }

    engine.stop();
    Ok(())
}
