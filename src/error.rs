//! Error taxonomy for the comms core.
//!
//! Nothing here is fatal. A [`Rejection`] means a request was dropped: the
//! calling system logs it and moves on. Only a ban produces anything visible
//! to the actor (the ban announcement), and that is sent before the
//! rejection is returned.

use std::path::PathBuf;

use crate::logging;

/// Why a chat, ping or roster request was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("message body is empty")]
    EmptyBody,
    #[error("sender has no player name")]
    MissingName,
    #[error("{0} is banned from chat and ping")]
    Banned(String),
    #[error("ping cooldown still running")]
    RateLimited,
    #[error("authority required: {0}")]
    AuthorityViolation(&'static str),
    #[error("connection {0} is not in the roster")]
    UnknownParticipant(u64),
    #[error("unknown ping class '{0}'")]
    UnknownPingClass(String),
    #[error("unknown marker {0}")]
    UnknownMarker(u64),
    #[error("team index {0} is out of range (1-254, 255 = no team)")]
    InvalidTeam(u8),
}

macro_rules! log_rejection {
    ($target:expr, $rejection:expr) => {{
        let rejection = $rejection;
        match rejection {
            Rejection::AuthorityViolation(_) => tracing::warn!(target: $target, "{}", rejection),
            Rejection::RateLimited => tracing::trace!(target: $target, "{}", rejection),
            _ if rejection.is_policy() => tracing::debug!(target: $target, "{}", rejection),
            _ => tracing::info!(target: $target, "{}", rejection),
        }
    }};
}

impl Rejection {
    /// Log under the subsystem target. Authority violations warn, policy
    /// drops are debug, rate limiting is trace, malformed requests are info.
    pub fn log(&self, target: &'static str) {
        match target {
            logging::CHAT => log_rejection!(logging::CHAT, self),
            logging::PING => log_rejection!(logging::PING, self),
            logging::ROSTER => log_rejection!(logging::ROSTER, self),
            _ => log_rejection!(logging::NET, self),
        }
    }

    /// Dropped by chat policy rather than by a bad or unauthorized request.
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            Rejection::EmptyBody | Rejection::MissingName | Rejection::Banned(_)
        )
    }
}

/// Failures while loading [`crate::config::CommsConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    #[test]
    fn test_policy_classification() {
        assert!(Rejection::EmptyBody.is_policy());
        assert!(Rejection::MissingName.is_policy());
        assert!(Rejection::Banned("Bob".into()).is_policy());
        assert!(!Rejection::RateLimited.is_policy());
        assert!(!Rejection::AuthorityViolation("ban").is_policy());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Rejection::InvalidTeam(0).to_string(),
            "team index 0 is out of range (1-254, 255 = no team)"
        );
        assert_eq!(
            Rejection::UnknownPingClass("Danger".into()).to_string(),
            "unknown ping class 'Danger'"
        );
    }

    #[derive(Clone, Default)]
    struct Seen(Arc<Mutex<Vec<(String, tracing::Level)>>>);

    impl<S: tracing::Subscriber> Layer<S> for Seen {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let meta = event.metadata();
            self.0
                .lock()
                .unwrap()
                .push((meta.target().to_string(), *meta.level()));
        }
    }

    #[test]
    fn test_log_uses_subsystem_target() {
        let seen = Seen::default();
        let subscriber = tracing_subscriber::registry().with(seen.clone());
        tracing::subscriber::with_default(subscriber, || {
            Rejection::AuthorityViolation("ban").log(logging::CHAT);
            Rejection::UnknownMarker(3).log(logging::PING);
            Rejection::InvalidTeam(0).log(logging::ROSTER);
            Rejection::UnknownParticipant(9).log(logging::NET);
        });

        let seen = seen.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (logging::CHAT.to_string(), tracing::Level::WARN),
                (logging::PING.to_string(), tracing::Level::INFO),
                (logging::ROSTER.to_string(), tracing::Level::INFO),
                (logging::NET.to_string(), tracing::Level::INFO),
            ]
        );
    }
}
