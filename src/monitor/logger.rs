use once_cell::sync::OnceCell;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use time::{format_description::well_known::Rfc3339, UtcOffset};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_log::LogTracer;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

// Hold the non-blocking writer guard to keep the background logging thread alive
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

const DEFAULT_APP_LOG_LEVEL: &str = "info,lattice=debug,h2=warn,hyper=warn";

/// Logger configuration structure.
#[derive(Debug)]
pub struct LoggerConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Optional file path for rolling log output
    pub file_path: Option<PathBuf>,
    /// Whether to enable console output
    pub enable_console: bool,
    /// Whether to use JSON format for logs
    pub json_format: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "error".to_string(),
            file_path: Some(PathBuf::from("./logs/app.log")),
            enable_console: true,
            json_format: false,
        }
    }
}

impl LoggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: impl AsRef<str>) -> Self {
        self.level = level.as_ref().into();
        self
    }

    pub fn with_file_path(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_console(mut self, enable: bool) -> Self {
        self.enable_console = enable;
        self
    }

    pub fn with_json(mut self, enable: bool) -> Self {
        self.json_format = enable;
        self
    }

    /// Practical app config using namespace-based file naming.
    pub fn for_app(namespace: &str) -> Self {
        Self {
            level: DEFAULT_APP_LOG_LEVEL.to_string(),
            file_path: Some(PathBuf::from("logs").join(format!("lattice.{namespace}"))),
            enable_console: true,
            json_format: false,
        }
    }

    /// Builds a config from the optional `[logger]` section.
    pub fn from_section(section: &crate::config::LoggerSection, namespace: &str) -> Self {
        let mut config = Self::for_app(namespace);
        if let Some(level) = &section.level {
            config.level = level.clone();
        }
        if let Some(path) = &section.file_path {
            config.file_path = Some(PathBuf::from(path));
        }
        if let Some(console) = section.console {
            config.enable_console = console;
        }
        if let Some(json) = section.json {
            config.json_format = json;
        }
        config
    }

    pub fn init(self) -> Result<(), Box<dyn std::error::Error>> {
        init_logger(self)
    }
}

/// Logging can be turned off wholesale from the environment.
pub fn is_logging_disabled() -> bool {
    let value = std::env::var("DISABLE_LOGS")
        .or_else(|_| std::env::var("LATTICE_DISABLE_LOGS"))
        .unwrap_or_default();
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Initialize logger with sensible defaults and env overrides.
/// Returns Ok(true) if enabled, Ok(false) if disabled by env.
pub fn init_app_logger(namespace: &str) -> Result<bool, Box<dyn std::error::Error>> {
    if is_logging_disabled() {
        return Ok(false);
    }
    init_logger(LoggerConfig::for_app(namespace))?;
    Ok(true)
}

/// Initialize and configure the tracing logger.
pub fn init_logger(config: LoggerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if is_logging_disabled() {
        // Mark initialized to avoid repeated attempts when logging is disabled.
        let _ = LOGGER_INITIALIZED.swap(true, Ordering::SeqCst);
        return Ok(());
    }
    if LOGGER_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::warn!("Logger already initialized, skipping re-initialization");
        return Ok(());
    }

    // bridge log crate
    let _ = LogTracer::builder()
        .with_max_level(log::LevelFilter::Trace)
        .init();

    let default_level = config.level.to_lowercase();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(local_offset, Rfc3339);

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.enable_console {
        if config.json_format {
            layers.push(fmt::layer().json().with_timer(timer.clone()).boxed());
        } else {
            layers.push(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_timer(timer.clone())
                    .boxed(),
            );
        }
    }

    if let Some(file_path) = config.file_path {
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file_path_prefix = file_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "app".to_string());
        let file_appender = tracing_appender::rolling::Builder::new()
            .rotation(Rotation::DAILY)
            .filename_prefix(file_path_prefix)
            .filename_suffix("log")
            .build(
                file_path
                    .parent()
                    .unwrap_or_else(|| std::path::Path::new(".")),
            )?;

        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
        let _ = FILE_GUARD.set(guard);

        let layer = if config.json_format {
            fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_timer(timer.clone())
                .boxed()
        } else {
            fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer)
                .with_timer(timer.clone())
                .boxed()
        };
        layers.push(layer);
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_logger_config_builder() {
        let config = LoggerConfig::new()
            .with_level("debug")
            .with_file_path(PathBuf::from("./test.log"))
            .with_console(false);

        assert_eq!(config.level, "debug");
        assert_eq!(config.file_path, Some(PathBuf::from("./test.log")));
        assert!(!config.enable_console);
    }

    #[test]
    fn test_logger_config_from_section() {
        let section = crate::config::LoggerSection {
            level: Some("warn".to_string()),
            file_path: None,
            console: Some(false),
            json: Some(true),
        };
        let config = LoggerConfig::from_section(&section, "test");
        assert_eq!(config.level, "warn");
        assert!(!config.enable_console);
        assert!(config.json_format);
        assert_eq!(
            config.file_path,
            Some(PathBuf::from("logs").join("lattice.test"))
        );
    }

    #[test]
    fn test_simple_logger_init() {
        let config = LoggerConfig::new().with_level("info").with_console(false);
        // This should not panic, even when called twice.
        let _ = init_logger(config);
        let _ = init_logger(LoggerConfig::new());
    }
}
