//! Structured logging for the gameplay simulation.
//!
//! Everything logs through `tracing`. State machines emit transitions at
//! DEBUG and contract violations at WARN; the subscriber is installed once
//! per process from a [`TracingConfig`] (usually taken from `GameplayConfig`).

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Installs the subscriber from the config resource if present, defaults otherwise.
pub struct LoggingPlugin;

impl Plugin for LoggingPlugin {
    fn build(&self, app: &mut App) {
        match app.world().get_resource::<crate::config::GameplayConfig>() {
            Some(config) => init_tracing(&config.tracing),
            None => init_tracing_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Case-insensitive lookup by the names `as_str` produces.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all_levels()
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(name))
    }

    pub fn all_levels() -> Vec<LogLevel> {
        vec![
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ]
    }
}

/// Subscriber settings. Per-module filters are joined into an `EnvFilter`
/// directive; `RUST_LOG` overrides them when set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracingConfig {
    pub default_level: LogLevel,
    pub module_filters: Vec<(String, LogLevel)>,
    pub show_targets: bool,
    pub show_thread_ids: bool,
    pub show_file_line: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: LogLevel::Info,
            module_filters: vec![
                ("gameplay_core::equipment".to_string(), LogLevel::Info),
                ("gameplay_core::weapon".to_string(), LogLevel::Info),
                ("gameplay_core::locomotion".to_string(), LogLevel::Info),
                ("gameplay_core::movement".to_string(), LogLevel::Warn),
                ("gameplay_core::net".to_string(), LogLevel::Warn),
            ],
            show_targets: true,
            show_thread_ids: false,
            show_file_line: false,
        }
    }
}

impl TracingConfig {
    pub fn to_env_filter_string(&self) -> String {
        let mut parts = vec![self.default_level.as_str().to_string()];
        for (module, level) in &self.module_filters {
            parts.push(format!("{}={}", module, level.as_str()));
        }
        parts.join(",")
    }

    /// Same config with every module raised to `level`, used by the demo's `--verbose` and `--log-level`.
    pub fn with_all_modules_at(mut self, level: LogLevel) -> Self {
        self.default_level = level;
        for (_, module_level) in &mut self.module_filters {
            *module_level = level;
        }
        self
    }
}

static TRACING_INIT: Once = Once::new();

pub fn init_tracing_default() {
    init_tracing(&TracingConfig::default());
}

/// Install the global subscriber. First call wins.
pub fn init_tracing(config: &TracingConfig) {
    let filter_str = config.to_env_filter_string();
    let config = config.clone();
    TRACING_INIT.call_once(move || {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(config.show_targets)
            .with_thread_ids(config.show_thread_ids)
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .compact();

        // A global subscriber may already be installed by the host
        let _ = subscriber.try_init();
    });
}

/// Entered INFO span around a block; timing shows up when the span closes.
pub struct TimingSpan {
    _span: tracing::span::EnteredSpan,
}

impl TimingSpan {
    pub fn new(name: &str) -> Self {
        let span = tracing::info_span!("timed", name = name);
        Self {
            _span: span.entered(),
        }
    }
}
