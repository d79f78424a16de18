//! Structured logging for the comms core.
//!
//! Every subsystem logs under its own `tracing` target so chat spam can be
//! silenced without losing ping or authority warnings:
//! - `squad_comms::chat`
//! - `squad_comms::ping`
//! - `squad_comms::net`
//! - `squad_comms::roster`
//!
//! `init_tracing` is idempotent and yields to a subscriber that is already
//! installed (Bevy's `LogPlugin`, a test harness, the host game).

use serde::{Deserialize, Serialize};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

pub const CHAT: &str = "squad_comms::chat";
pub const PING: &str = "squad_comms::ping";
pub const NET: &str = "squad_comms::net";
pub const ROSTER: &str = "squad_comms::roster";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
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
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    pub default_level: LogLevel,
    pub target_filters: Vec<(String, LogLevel)>,
    pub show_targets: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: LogLevel::Info,
            target_filters: vec![
                (CHAT.to_string(), LogLevel::Info),
                (PING.to_string(), LogLevel::Info),
                (NET.to_string(), LogLevel::Warn),
                (ROSTER.to_string(), LogLevel::Info),
            ],
            show_targets: true,
        }
    }
}

impl TracingConfig {
    pub fn to_env_filter_string(&self) -> String {
        let mut parts = vec![self.default_level.as_str().to_string()];
        for (target, level) in &self.target_filters {
            parts.push(format!("{}={}", target, level.as_str()));
        }
        parts.join(",")
    }
}

static TRACING_INIT: Once = Once::new();

pub fn init_tracing_default() {
    init_tracing(&TracingConfig::default());
}

/// First call wins. `RUST_LOG` overrides the configured filter.
pub fn init_tracing(config: &TracingConfig) {
    let filter_str = config.to_env_filter_string();
    let show_targets = config.show_targets;
    TRACING_INIT.call_once(move || {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(show_targets)
            .with_thread_ids(false)
            .compact();

        let _ = subscriber.try_init();
    });
}
