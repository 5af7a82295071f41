use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{
    non_blocking,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_log::LogTracer;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time},
    layer::SubscriberExt,
    EnvFilter,
};

const LOG_FILE_PREFIX: &str = "elfport.log";

// 保持文件写入线程存活
static GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// 日志目录路径
pub fn log_dir_path() -> PathBuf {
    match dirs::data_dir() {
        Some(data_dir) => data_dir.join("elfport").join("logs"),
        None => std::env::temp_dir().join("elfport").join("logs"),
    }
}

/// 最新的日志文件路径
pub fn log_file_path() -> PathBuf {
    let log_dir = log_dir_path();
    let latest = fs::read_dir(&log_dir).ok().and_then(|entries| {
        entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX)
                    && e.metadata().map(|m| m.is_file()).unwrap_or(false)
            })
            .max_by_key(|e| {
                e.metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
            })
    });

    match latest {
        Some(entry) => entry.path(),
        None => log_dir.join(LOG_FILE_PREFIX),
    }
}

fn parse_level(log_level: &str) -> Level {
    match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize the logging system. Later calls are no-ops.
pub fn init_logger(log_level: &str, to_file: bool) -> Result<()> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::from_default_env().add_directive(parse_level(log_level).into());

    let terminal_layer = fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_timer(time::SystemTime)
        .with_file(true)
        .with_line_number(true)
        .with_target(false);

    let guard = if to_file {
        let log_dir = log_dir_path();
        fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

        let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
        let (writer, guard) = non_blocking(file_appender);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(time::SystemTime)
            .with_file(true)
            .with_line_number(true)
            .with_target(false);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(terminal_layer)
            .with(file_layer);
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| anyhow!("Failed to set global tracing subscriber: {}", e))?;
        Some(guard)
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(terminal_layer);
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| anyhow!("Failed to set global tracing subscriber: {}", e))?;
        None
    };

    // Forward events from the log crate
    LogTracer::init().map_err(|e| anyhow!("Failed to initialize log tracer: {}", e))?;
    let _ = GUARD.set(guard);

    if to_file {
        tracing::info!(
            "Logging system initialized, output to file: {}",
            log_file_path().display()
        );
    } else {
        tracing::info!("Logging system initialized, output to console");
    }
    Ok(())
}
