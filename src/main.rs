use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use lecture_player::config::Config;
use lecture_player::track::format_clock;
use lecture_player::{
    JsonSettingsStore, Lesson, LessonSession, PlaybackController, PlaybackPhase, ProgressReporter,
    ProgressStore, RodioDevice,
};
use rusqlite::Connection;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Used when `RUST_LOG` is not set, so checkpoints show up in the log.
const DEFAULT_LOG_FILTER: &str = "info";

fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(log_filter()).init();

    let mut args = std::env::args().skip(1);
    let Some(source) = args.next() else {
        bail!("usage: lecture-player <audio-url-or-path> [lesson-id]");
    };
    let lesson_id = args.next().unwrap_or_else(|| source.clone());

    let config = match Config::new() {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(err) => {
            error!("Failed to load configuration: {err}");
            warn!("Using default configuration");
            Config::default()
        }
    };

    let tokio_rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    let connection = Connection::open(&config.progress.database)
        .with_context(|| format!("Failed to open {}", config.progress.database))?;
    let store = Arc::new(ProgressStore::new(connection, &config.progress.user_id));
    store.init().context("Failed to initialize progress store")?;

    let device = RodioDevice::new(tokio_rt.handle().clone())?;
    let settings = JsonSettingsStore::new(&config.audio.settings_path);
    let controller =
        PlaybackController::with_default_volume(device, settings, config.audio.default_volume);
    let reporter = ProgressReporter::with_policy(store.clone(), config.checkpoint_policy());
    let mut session = LessonSession::new(controller, reporter);

    let lesson = Lesson {
        id: lesson_id,
        course_id: String::new(),
        title: Path::new(&source)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.clone()),
        content_url: source.clone(),
        order: 0,
        duration_hint: None,
    };

    match store.lesson_progress(&lesson.id) {
        Ok(Some(progress)) => info!(
            "Lesson {} was heard to {}s before, completed={}",
            lesson.id, progress.listened_seconds, progress.is_completed
        ),
        Ok(None) => {}
        Err(err) => warn!("Failed to read lesson progress: {err}"),
    }

    session.play_or_toggle(&lesson, "");

    let mut last_logged_second = None;
    loop {
        std::thread::sleep(TICK_INTERVAL);
        for checkpoint in session.tick() {
            info!(
                "Checkpoint {}: {}s, completed={}",
                checkpoint.lesson_id, checkpoint.listened_seconds, checkpoint.is_completed
            );
        }

        let state = session.controller().state();
        if state.current_track.is_none() || state.phase == PlaybackPhase::Ended {
            break;
        }
        if state.phase == PlaybackPhase::Paused && !state.is_playing {
            warn!("Playback stopped");
            break;
        }

        let second = state.current_time_seconds as u64;
        if state.is_playing && last_logged_second != Some(second) && second % 10 == 0 {
            last_logged_second = Some(second);
            info!(
                "{} / {}",
                format_clock(state.current_time_seconds),
                format_clock(state.duration_seconds)
            );
        }
    }

    session.controller_mut().shutdown();

    if let Some(progress) = store.lesson_progress(&lesson.id)? {
        info!(
            "Progress of lesson {}: {}s, completed={}",
            progress.lesson_id, progress.listened_seconds, progress.is_completed
        );
    }
    Ok(())
}
