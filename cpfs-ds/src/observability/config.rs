//! Log output configuration.

use std::env;
use std::str::FromStr;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line output.
    #[default]
    Compact,
}

impl LogFormat {
    /// Format used when none is configured: pretty for a terminal, JSON for
    /// anything else.
    pub fn for_output(is_terminal: bool) -> Self {
        if is_terminal { Self::Pretty } else { Self::Json }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// How the data server writes its logs.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    service_name: String,
    log_format: LogFormat,
    /// `EnvFilter` directives, e.g. `"info,cpfs_ds::control=debug"`.
    log_filter: String,
    include_location: bool,
    include_target: bool,
    include_thread_names: bool,
    include_thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "cpfs-ds".to_string(),
            log_format: LogFormat::default(),
            log_filter: "info".to_string(),
            include_location: false,
            include_target: true,
            include_thread_names: false,
            include_thread_ids: false,
        }
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

impl TracingConfig {
    /// Create a new builder.
    pub fn builder() -> TracingConfigBuilder {
        TracingConfigBuilder::default()
    }

    /// Read the configuration from the environment.
    ///
    /// - `CPFS_LOG_FORMAT`: `json`, `pretty` or `compact`; when unset, pretty
    ///   on a terminal and JSON otherwise
    /// - `CPFS_LOG_LEVEL`, else `RUST_LOG`: filter directives
    /// - `CPFS_LOG_LOCATION`, `CPFS_LOG_THREAD_NAMES`, `CPFS_LOG_THREAD_IDS`:
    ///   `1` or `true` to include
    pub fn from_env() -> Self {
        let log_format = env::var("CPFS_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| {
                LogFormat::for_output(std::io::IsTerminal::is_terminal(&std::io::stdout()))
            });
        let log_filter = env::var("CPFS_LOG_LEVEL")
            .or_else(|_| env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());

        Self {
            log_format,
            log_filter,
            include_location: env_flag("CPFS_LOG_LOCATION"),
            include_thread_names: env_flag("CPFS_LOG_THREAD_NAMES"),
            include_thread_ids: env_flag("CPFS_LOG_THREAD_IDS"),
            ..Self::default()
        }
    }

    /// Service name attached to log output.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Output format.
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Filter directives.
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Whether file and line are included.
    pub fn include_location(&self) -> bool {
        self.include_location
    }

    /// Whether the event target is included.
    pub fn include_target(&self) -> bool {
        self.include_target
    }

    /// Whether thread names are included.
    pub fn include_thread_names(&self) -> bool {
        self.include_thread_names
    }

    /// Whether thread IDs are included.
    pub fn include_thread_ids(&self) -> bool {
        self.include_thread_ids
    }
}

/// Builder for TracingConfig.
#[derive(Debug, Clone, Default)]
pub struct TracingConfigBuilder {
    config: TracingConfig,
}

impl TracingConfigBuilder {
    /// Set the service name.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self
    }

    /// Set the output format.
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log_format = format;
        self
    }

    /// Set the filter directives.
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.log_filter = filter.into();
        self
    }

    /// Include file and line.
    pub fn include_location(mut self, include: bool) -> Self {
        self.config.include_location = include;
        self
    }

    /// Include the event target.
    pub fn include_target(mut self, include: bool) -> Self {
        self.config.include_target = include;
        self
    }

    /// Include thread names.
    pub fn include_thread_names(mut self, include: bool) -> Self {
        self.config.include_thread_names = include;
        self
    }

    /// Include thread IDs.
    pub fn include_thread_ids(mut self, include: bool) -> Self {
        self.config.include_thread_ids = include;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> TracingConfig {
        self.config
    }
}
