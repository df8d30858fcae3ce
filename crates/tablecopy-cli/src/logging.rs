//! Logging setup for the `tablecopy` binary
//!
//! Console output goes to stderr so the result summary on stdout stays
//! clean. An optional JSON file layer rolls daily under `log_dir`.

use std::path::PathBuf;

use serde::Deserialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for JSON log files
    pub log_dir: PathBuf,

    pub enable_json_logs: bool,

    pub enable_console_logs: bool,

    /// Multi-line console output instead of one line per event
    pub pretty_console: bool,

    pub include_location: bool,

    /// Log span open/close (per-job timing)
    pub enable_spans: bool,

    /// Used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: log_directory(),
            enable_json_logs: false,
            enable_console_logs: true,
            pretty_console: false,
            include_location: cfg!(debug_assertions),
            enable_spans: cfg!(debug_assertions),
            default_filter: "info,tablecopy_engine=debug,tablecopy_sqlite=debug".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Quiet console, JSON file for later inspection
    pub fn production() -> Self {
        Self {
            log_dir: log_directory(),
            enable_json_logs: true,
            enable_console_logs: true,
            pretty_console: false,
            include_location: false,
            enable_spans: false,
            default_filter: "warn,tablecopy=info,tablecopy_engine=info,tablecopy_sqlite=warn"
                .to_string(),
        }
    }

    pub fn development() -> Self {
        Self {
            pretty_console: true,
            ..Self::default()
        }
    }

    /// Console only, everything at debug
    #[allow(dead_code)]
    pub fn testing() -> Self {
        Self {
            log_dir: std::env::temp_dir().join("tablecopy-tests"),
            enable_json_logs: false,
            enable_console_logs: true,
            pretty_console: false,
            include_location: true,
            enable_spans: true,
            default_filter: "debug".to_string(),
        }
    }

    /// Layer the `[logging]` section of a job file over this preset.
    pub fn with_settings(mut self, settings: &LogSettings) -> Self {
        if let Some(level) = &settings.level {
            self.default_filter = level.clone();
        }
        if let Some(dir) = &settings.dir {
            self.log_dir = dir.clone();
        }
        if let Some(json) = settings.json {
            self.enable_json_logs = json;
        }
        match settings.format {
            Some(ConsoleFormat::Pretty) => self.pretty_console = true,
            Some(ConsoleFormat::Compact) => self.pretty_console = false,
            Some(ConsoleFormat::Off) => self.enable_console_logs = false,
            None => {}
        }
        self
    }
}

/// `[logging]` section of a job file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    /// Filter directive, e.g. `info` or `warn,tablecopy_engine=debug`
    pub level: Option<String>,
    pub dir: Option<PathBuf>,
    pub json: Option<bool>,
    pub format: Option<ConsoleFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFormat {
    Pretty,
    Compact,
    Off,
}

/// Install the global subscriber. Keep the returned guard alive until exit
/// or buffered JSON lines are lost.
pub fn init(config: LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    // RUST_LOG takes precedence over the configured filter
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_filter))
    };

    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let mut layers = Vec::new();

    if config.enable_console_logs {
        let console = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events.clone());
        let console_layer = if config.pretty_console {
            console.pretty().with_filter(filter()).boxed()
        } else {
            console.compact().with_filter(filter()).boxed()
        };
        layers.push(console_layer);
    }

    let mut guard = None;
    if config.enable_json_logs {
        std::fs::create_dir_all(&config.log_dir)?;
        let file_appender = tracing_appender::rolling::daily(&config.log_dir, "tablecopy.log");
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        let json_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(filter())
            .boxed();
        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::debug!(
        log_dir = %config.log_dir.display(),
        json_enabled = config.enable_json_logs,
        console_enabled = config.enable_console_logs,
        "logging initialized"
    );
    Ok(guard)
}

/// Default directory for JSON logs
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tablecopy")
        .join("logs")
}
