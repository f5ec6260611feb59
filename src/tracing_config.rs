//! Tracing configuration for structured logging
//!
//! Only the binary installs a subscriber. Library code emits `log` records and
//! `tracing` spans; `tracing-subscriber`'s `tracing-log` bridge (enabled through
//! its default features) forwards the former to the same output.

#[cfg(feature = "cli")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors and emojis (default for CLI)
    Console,
    /// Compact console output without colors, for CI logs
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Configuration for tracing output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracingOutput {
    /// Output to stderr (default)
    Console,
    /// Output to a file
    #[cfg(feature = "tracing-files")]
    File(std::path::PathBuf),
    /// Output to both stderr and a file
    #[cfg(feature = "tracing-files")]
    Both(std::path::PathBuf),
}

/// Keeps background log writers alive; drop it only when the program exits
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file_writer: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    /// Output format
    pub format: TracingFormat,
    /// Output destination
    pub output: TracingOutput,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
    /// Session ID logged when the subscriber starts
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            output: TracingOutput::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-2+)
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    /// Set custom environment filter
    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    ///
    /// The HTTP stack is kept at `warn` below `-vv` so connection chatter does not
    /// drown the per-category output.
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info,hyper=warn,reqwest=warn",
            1 => "debug,hyper=warn,reqwest=warn",
            _ => "trace",
        }
    }

    /// Initialize the global subscriber
    ///
    /// # Errors
    /// - The filter string is invalid
    /// - A global subscriber is already installed
    #[cfg(feature = "cli")]
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        use tracing_subscriber::fmt;

        let filter = match &self.env_filter {
            Some(env_filter) => EnvFilter::try_new(env_filter)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };

        let registry = Registry::default().with(filter);
        #[allow(unused_mut)]
        let mut guard = TracingGuard::default();

        match (&self.format, &self.output) {
            (TracingFormat::Console, TracingOutput::Console) => {
                let fmt_layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();

                registry.with(fmt_layer).try_init()?;
            },

            (TracingFormat::Compact, TracingOutput::Console) => {
                let fmt_layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(false)
                    .compact();

                registry.with(fmt_layer).try_init()?;
            },

            #[cfg(feature = "tracing-json")]
            (TracingFormat::Json, TracingOutput::Console) => {
                let fmt_layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .with_current_span(true)
                    .with_span_list(true);

                registry.with(fmt_layer).try_init()?;
            },

            #[cfg(feature = "tracing-files")]
            (_, TracingOutput::File(path)) => {
                let (file_writer, worker) = file_writer(path);
                guard._file_writer = Some(worker);

                let fmt_layer = fmt::layer()
                    .with_ansi(false)
                    .with_writer(file_writer)
                    .compact();

                registry.with(fmt_layer).try_init()?;
            },

            #[cfg(feature = "tracing-files")]
            (format, TracingOutput::Both(path)) => {
                let (file_writer, worker) = file_writer(path);
                guard._file_writer = Some(worker);

                let console_layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(*format == TracingFormat::Console)
                    .with_target(false)
                    .compact();
                let file_layer = fmt::layer()
                    .with_ansi(false)
                    .with_writer(file_writer)
                    .compact();

                registry.with(console_layer).with(file_layer).try_init()?;
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::debug!(session_id = %session_id, "🚀 Classification session started");
        }

        Ok(guard)
    }
}

#[cfg(all(feature = "cli", feature = "tracing-files"))]
fn file_writer(
    path: &std::path::Path,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    let appender = tracing_appender::rolling::never(
        path.parent().unwrap_or_else(|| std::path::Path::new(".")),
        path.file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("imgly-classify.log")),
    );
    tracing_appender::non_blocking(appender)
}

/// Initialize tracing with CLI-friendly defaults and a fresh session id
///
/// `RUST_LOG` overrides the verbosity-derived filter. Colors are disabled when
/// stderr is not a terminal.
///
/// # Errors
/// - See [`TracingConfig::init`]
#[cfg(feature = "cli")]
pub fn init_cli_tracing(verbosity: u8, output: TracingOutput) -> anyhow::Result<TracingGuard> {
    use std::io::IsTerminal;

    let format = if std::io::stderr().is_terminal() {
        TracingFormat::Console
    } else {
        TracingFormat::Compact
    };

    let mut config = TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(format)
        .with_output(output)
        .with_session_id(uuid::Uuid::new_v4().to_string());
    if let Ok(filter) = std::env::var("RUST_LOG") {
        config = config.with_env_filter(filter);
    }
    config.init()
}

/// Span creation helpers for pipeline operations
pub mod spans {
    use tracing::{Level, Span};

    /// Span covering one pipeline stage
    pub fn stage(name: &'static str) -> Span {
        tracing::span!(Level::INFO, "stage", name = name)
    }

    /// Span covering acquisition of one category
    pub fn category(category: &str) -> Span {
        tracing::span!(Level::INFO, "category", category = %category)
    }

    /// Span for a single download
    pub fn download(url: &str, destination: &std::path::Path) -> Span {
        tracing::span!(
            Level::DEBUG,
            "download",
            url = %url,
            destination = %destination.display()
        )
    }

    /// Span for a fine-tuning run
    pub fn training(backbone: &str, train_size: usize, valid_size: usize, passes: usize) -> Span {
        tracing::span!(
            Level::INFO,
            "training",
            backbone = %backbone,
            train_size = train_size,
            valid_size = valid_size,
            passes = passes
        )
    }
}

/// Event helpers for common logging patterns
pub mod events {
    use tracing::{debug, info, warn};

    /// Log a warning with a recommendation
    pub fn warning_with_recommendation(message: &str, recommendation: &str) {
        warn!(recommendation = %recommendation, "⚠️  {}", message);
    }

    /// Log how long an operation took
    pub fn performance_metric(operation: &str, duration_ms: u64) {
        debug!(operation = %operation, duration_ms = duration_ms, "⏱️  Performance metric");
    }

    /// Log metrics of one training pass
    pub fn epoch_metrics(
        epoch: usize,
        train_loss: f32,
        valid_loss: Option<f32>,
        error_rate: Option<f32>,
    ) {
        match (valid_loss, error_rate) {
            (Some(valid_loss), Some(error_rate)) => info!(
                epoch = epoch,
                train_loss = train_loss,
                valid_loss = valid_loss,
                error_rate = error_rate,
                "📈 Epoch {}: train_loss {:.4}, valid_loss {:.4}, error_rate {:.4}",
                epoch,
                train_loss,
                valid_loss,
                error_rate
            ),
            _ => info!(
                epoch = epoch,
                train_loss = train_loss,
                "📈 Epoch {}: train_loss {:.4} (no validation set)",
                epoch,
                train_loss
            ),
        }
    }
}
