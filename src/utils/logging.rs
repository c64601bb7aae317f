//! Logging Module
//!
//! Provides structured logging utilities using the `tracing` crate.
//! The library only emits events; installing a subscriber is left to the
//! binary (or to a test that wants to see output).

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include timestamps
    pub timestamps: bool,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            timestamps: true,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Create a verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            timestamps: true,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Create a quiet logging config (errors only)
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            timestamps: false,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }

    /// Create a plain-text config for log files and CI output
    pub fn production() -> Self {
        Self {
            level: LogLevel::Info,
            timestamps: true,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: false,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogConfig {
    /// Override the level of this preset
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Create from string, falling back to `Info`
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Initialize logging with the given configuration
///
/// Returns an error message if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let builder = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact();

    let result = if config.timestamps {
        tracing::subscriber::set_global_default(builder.finish())
    } else {
        tracing::subscriber::set_global_default(builder.without_time().finish())
    };

    result.map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Logs the duration of each named phase of a multi-step operation
pub struct PhaseLogger {
    /// Operation name
    operation: String,
    /// Start of the current phase
    phase_start: Instant,
    /// Start of the whole operation
    start_time: Instant,
    /// Completed phases with their durations in milliseconds
    phases: Vec<(String, f64)>,
}

impl PhaseLogger {
    /// Start timing an operation
    pub fn new(operation: &str) -> Self {
        let now = Instant::now();
        Self {
            operation: operation.to_string(),
            phase_start: now,
            start_time: now,
            phases: Vec::new(),
        }
    }

    /// Close the current phase under `name` and start the next one
    pub fn phase(&mut self, name: &str) {
        let elapsed_ms = self.phase_start.elapsed().as_secs_f64() * 1000.0;
        tracing::debug!(
            "{}: {} finished in {:.1} ms",
            self.operation,
            name,
            elapsed_ms
        );
        self.phases.push((name.to_string(), elapsed_ms));
        self.phase_start = Instant::now();
    }

    /// Completed phases so far
    pub fn phases(&self) -> &[(String, f64)] {
        &self.phases
    }

    /// Log completion of the whole operation
    pub fn finish(&self) {
        tracing::info!(
            "{}: completed {} phases in {:.2}s",
            self.operation,
            self.phases.len(),
            self.start_time.elapsed().as_secs_f64()
        );
    }
}
