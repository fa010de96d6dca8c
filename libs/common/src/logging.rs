//! Logging setup for gateway services
//!
//! Console output plus a daily rolling log file, both in the bracketed
//! `timestamp [LEVEL] message` format. Old log files are gzip-compressed by a
//! background task.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment variable overriding the log root directory
pub const LOG_DIR_ENV: &str = "NIBESRV_LOG_DIR";

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809Z [INFO] Poll cycle 12 published`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.3fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking writer thread alive for the process lifetime
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

// ============================================================================
// Log Root Directory Configuration
// ============================================================================

static LOG_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Initialize log root directory from config or environment
///
/// Priority:
/// 1. `NIBESRV_LOG_DIR` environment variable (highest)
/// 2. `config_dir` parameter (from the YAML config)
/// 3. Default value "logs" (lowest)
pub fn init_log_root(config_dir: Option<&str>) {
    LOG_ROOT.get_or_init(|| resolve_log_root(std::env::var(LOG_DIR_ENV).ok(), config_dir));
}

/// Get log root directory, falling back to the environment or "logs"
pub fn get_log_root() -> PathBuf {
    LOG_ROOT
        .get()
        .cloned()
        .unwrap_or_else(|| resolve_log_root(std::env::var(LOG_DIR_ENV).ok(), None))
}

fn resolve_log_root(env_dir: Option<String>, config_dir: Option<&str>) -> PathBuf {
    env_dir
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| config_dir.map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Default max file size: 50MB
const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Daily rolling file writer: `{YYYYMMDD}_{service}.log`
///
/// Rolls over when the date changes and, within a day, when the file grows
/// past `max_file_size` (`{YYYYMMDD}_{service}.N.log`).
struct DailyRollingWriter {
    service_name: String,
    log_dir: PathBuf,
    current_date: Arc<Mutex<String>>,
    current_file: Arc<Mutex<Option<File>>>,
    current_size: Arc<AtomicU64>,
    max_file_size: u64,
    rotation_count: Arc<AtomicU32>,
}

impl DailyRollingWriter {
    fn new(service_name: String, log_dir: PathBuf, max_file_size: u64) -> std::io::Result<Self> {
        let current_date = chrono::Local::now().format("%Y%m%d").to_string();
        fs::create_dir_all(&log_dir)?;

        let file = open_append(&log_file_name(&log_dir, &current_date, &service_name, 0))?;
        let initial_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            service_name,
            log_dir,
            current_date: Arc::new(Mutex::new(current_date)),
            current_file: Arc::new(Mutex::new(Some(file))),
            current_size: Arc::new(AtomicU64::new(initial_size)),
            max_file_size,
            rotation_count: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Switch to a new file if the date changed or the size limit is hit
    fn roll_if_needed(&self, incoming: usize) -> std::io::Result<()> {
        let today = chrono::Local::now().format("%Y%m%d").to_string();
        let mut current_date = self
            .current_date
            .lock()
            .map_err(|e| std::io::Error::other(format!("Mutex poisoned: {}", e)))?;

        let date_changed = *current_date != today;
        let too_large =
            self.current_size.load(Ordering::Relaxed) + incoming as u64 > self.max_file_size;

        if !date_changed && !too_large {
            return Ok(());
        }

        let rotation = if date_changed {
            *current_date = today;
            self.rotation_count.store(0, Ordering::SeqCst);
            0
        } else {
            self.rotation_count.fetch_add(1, Ordering::SeqCst) + 1
        };

        fs::create_dir_all(&self.log_dir)?;
        let file = open_append(&log_file_name(
            &self.log_dir,
            &current_date,
            &self.service_name,
            rotation,
        ))?;
        let initial_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.current_size.store(initial_size, Ordering::SeqCst);

        let mut current_file = self
            .current_file
            .lock()
            .map_err(|e| std::io::Error::other(format!("Mutex poisoned: {}", e)))?;
        *current_file = Some(file);
        Ok(())
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn log_file_name(log_dir: &Path, date: &str, service_name: &str, rotation: u32) -> PathBuf {
    if rotation == 0 {
        log_dir.join(format!("{}_{}.log", date, service_name))
    } else {
        log_dir.join(format!("{}_{}.{}.log", date, service_name, rotation))
    }
}

impl Write for DailyRollingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.roll_if_needed(buf.len())?;

        let mut guard = self
            .current_file
            .lock()
            .map_err(|e| std::io::Error::other(format!("Mutex poisoned: {}", e)))?;
        match guard.as_mut() {
            Some(file) => {
                let written = file.write(buf)?;
                self.current_size
                    .fetch_add(written as u64, Ordering::Relaxed);
                Ok(written)
            },
            None => Ok(0),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut guard = self
            .current_file
            .lock()
            .map_err(|e| std::io::Error::other(format!("Mutex poisoned: {}", e)))?;
        match guard.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name (e.g., "nibesrv")
    pub service_name: String,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Level used when RUST_LOG is not set
    pub console_level: Level,
    /// Write JSON lines to the log file instead of the bracketed format
    pub enable_json: bool,
    /// Colored console output
    pub ansi: bool,
    /// Size limit of one log file before rotating within a day
    pub max_file_size: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: get_log_root(),
            console_level: Level::INFO,
            enable_json: false,
            ansi: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Build the filter directive used when `RUST_LOG` is absent
fn default_filter(config: &LogConfig) -> String {
    let level = config.console_level.as_str().to_lowercase();
    format!("warn,{}={},common={}", config.service_name, level, level)
}

/// Initialize logging system with configuration
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(&config.log_dir)?;

    let writer = DailyRollingWriter::new(
        config.service_name.clone(),
        config.log_dir.clone(),
        config.max_file_size,
    )?;
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);

    let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
    match guards.lock() {
        Ok(mut guards) => guards.push(guard),
        Err(poisoned) => poisoned.into_inner().push(guard),
    }

    // RUST_LOG wins over the configured level
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(env_str) if !env_str.is_empty() => EnvFilter::new(env_str),
        _ => EnvFilter::new(default_filter(&config)),
    };

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = if config.enable_json {
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_level(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .event_format(BracketedLevelFormat)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);

    start_log_compression_task(config.log_dir, config.service_name);

    Ok(())
}

// ==================== Log Compression Support ====================

use tokio::time::{interval, Duration};

/// Start background log compression task
pub fn start_log_compression_task(log_dir: PathBuf, service_name: String) {
    // Logging may be initialized before a runtime exists (e.g. --validate)
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };

    handle.spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;

        let mut interval = interval(Duration::from_secs(86400));
        loop {
            interval.tick().await;
            if let Err(e) = compress_old_logs(&log_dir, &service_name).await {
                tracing::error!("Log compression error for {}: {}", service_name, e);
            }
        }
    });
}

/// Whether a file in the log directory belongs to this service's plain logs
fn is_service_log(file_name: &str, service_name: &str) -> bool {
    file_name.ends_with(".log") && file_name.contains(&format!("_{}", service_name))
}

/// Compress log files older than 7 days, delete compressed logs older than 90 days
async fn compress_old_logs(
    log_dir: &Path,
    service_name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    use std::time::SystemTime;

    let mut entries = tokio::fs::read_dir(log_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => continue,
        };

        let compressed = file_name.ends_with(".log.gz");
        if !compressed && !is_service_log(&file_name, service_name) {
            continue;
        }

        let modified = tokio::fs::metadata(&path).await?.modified()?;
        let age = SystemTime::now().duration_since(modified)?;

        if !compressed && age > Duration::from_secs(7 * 86400) {
            compress_file(&path).await?;
            tokio::fs::remove_file(&path).await?;
            tracing::debug!("Compressed: {}", file_name);
        } else if compressed && age > Duration::from_secs(90 * 86400) {
            tokio::fs::remove_file(&path).await?;
            tracing::debug!("Deleted: {}", file_name);
        }
    }

    Ok(())
}

/// Compress a single file next to the original as `<name>.gz`
async fn compress_file(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let buffer = tokio::fs::read(path).await?;

    let output = File::create(format!("{}.gz", path.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::best());
    encoder.write_all(&buffer)?;
    encoder.finish()?;

    Ok(())
}
