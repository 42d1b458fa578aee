use std::{path::PathBuf, sync::Mutex};

use tokio::sync::RwLock;
use tracing::Level;
use tracing::{debug, info, metadata::LevelFilter, trace};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::prelude::*;

/// Name of the log file, before the rolling date suffix.
pub const LOG_FILE_NAME: &str = "bwt-emulator.log";

// Lines still queued for the log file are written out when this is dropped.
static FILE_WRITER_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

fn do_init(stdout_level: Level, file_level: Option<(Level, PathBuf)>) -> Option<WorkerGuard> {
    let mut message = String::from("Logging with: stdout");

    let stdout_layer =
        tracing_subscriber::fmt::layer().with_filter(LevelFilter::from(stdout_level));

    let registry = tracing_subscriber::registry().with(stdout_layer);

    let (maybe_file_layer, guard) = if let Some((level, output_dir)) = file_level {
        message += &format!(", file (in dir {output_dir:?})");

        let file_appender = RollingFileAppender::new(Rotation::DAILY, output_dir, LOG_FILE_NAME);
        let (writer, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(LevelFilter::from(level));
        (Some(file_layer), Some(guard))
    } else {
        (None, None)
    };

    registry.with(maybe_file_layer).init();

    debug!(message);

    guard
}

/// Initialize tracing.
///
/// Will only initialize once, so tests may call this.
pub async fn init(stdout_level: Level, file_logging: Option<(Level, PathBuf)>) {
    static TRACING_IS_INITIALIZED: RwLock<bool> = RwLock::const_new(false);

    let initialized = { *TRACING_IS_INITIALIZED.read().await };

    if !initialized {
        let mut initialized = TRACING_IS_INITIALIZED.write().await;

        // Someone else may have won the race to the write lock.
        if *initialized {
            return;
        }

        let guard = do_init(stdout_level, file_logging);
        if let Ok(mut slot) = FILE_WRITER_GUARD.lock() {
            *slot = guard;
        }

        *initialized = true;
    }

    info!("Logging initialized");
}

/// Write out log lines still queued for the log file.
///
/// File logging stops here, later events only reach stdout.
pub fn shutdown() {
    trace!("Shutting down");

    let guard = FILE_WRITER_GUARD
        .lock()
        .ok()
        .and_then(|mut slot| slot.take());
    drop(guard);
}
