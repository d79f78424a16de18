use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::ConfigError;
use crate::ping::PingClass;

/// Default cooldown between two pings of the same participant (seconds).
pub const DEFAULT_MIN_TIME_BETWEEN_PINGS: f32 = 0.2;

/// Default text of the ban announcement.
pub const DEFAULT_BAN_MESSAGE: &str = "</> <Error> You don't have permission to send messages";

/// Static, per-deployment settings. Host and clients should load the same
/// file; the ping class table in particular must agree on both sides.
#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommsConfig {
    pub min_time_between_pings: f32,
    /// Drop chat from participants whose name is unset
    pub reject_messages_with_no_player_name: bool,
    /// Let clients rename themselves (the host still validates)
    pub allow_client_to_change_name: bool,
    pub ban_message: String,
    pub server_message_sender_name: String,
    /// Input hint for the presentation layer, the core does not read it
    pub must_hold_shift_for_all_chat_key: bool,
    pub ping_classes: Vec<PingClass>,
}

impl Default for CommsConfig {
    fn default() -> Self {
        Self {
            min_time_between_pings: DEFAULT_MIN_TIME_BETWEEN_PINGS,
            reject_messages_with_no_player_name: false,
            allow_client_to_change_name: false,
            ban_message: DEFAULT_BAN_MESSAGE.to_string(),
            server_message_sender_name: String::new(),
            must_hold_shift_for_all_chat_key: true,
            ping_classes: vec![
                PingClass::new("Location"),
                PingClass::new("Danger"),
                PingClass {
                    max_pings: 3,
                    lifetime_secs: 0.0,
                    is_global: true,
                    ..PingClass::new("Objective")
                },
            ],
        }
    }
}

impl CommsConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: CommsConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&content)?;
        info!(
            "Loaded comms config from {:?} ({} ping classes)",
            path,
            config.ping_classes.len()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.min_time_between_pings.is_finite() || self.min_time_between_pings < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "min_time_between_pings must be >= 0, got {}",
                self.min_time_between_pings
            )));
        }

        let mut seen = HashSet::new();
        for class in &self.ping_classes {
            if class.id.is_empty() {
                return Err(ConfigError::Invalid("ping class with empty id".into()));
            }
            if !seen.insert(class.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate ping class '{}'",
                    class.id
                )));
            }
            if class.max_pings == 0 {
                return Err(ConfigError::Invalid(format!(
                    "ping class '{}' must allow at least one ping",
                    class.id
                )));
            }
            if !class.lifetime_secs.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "ping class '{}' has a non-finite lifetime",
                    class.id
                )));
            }
            if !class.destroy_delay_secs.is_finite() || class.destroy_delay_secs < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "ping class '{}' has a negative destroy delay",
                    class.id
                )));
            }
        }
        Ok(())
    }

    pub fn ping_class(&self, id: &str) -> Option<&PingClass> {
        self.ping_classes.iter().find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CommsConfig::default();
        assert!((config.min_time_between_pings - 0.2).abs() < f32::EPSILON);
        assert!(!config.reject_messages_with_no_player_name);
        assert!(!config.allow_client_to_change_name);
        assert!(config.must_hold_shift_for_all_chat_key);
        assert!(config.validate().is_ok());
        assert_eq!(config.ping_class("Danger").unwrap().max_pings, 1);
        assert!(config.ping_class("Objective").unwrap().is_global);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CommsConfig::from_json(r#"{ "allow_client_to_change_name": true }"#).unwrap();
        assert!(config.allow_client_to_change_name);
        assert_eq!(config.ban_message, DEFAULT_BAN_MESSAGE);
        assert_eq!(config.ping_classes.len(), 3);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = CommsConfig {
            server_message_sender_name: "Server".into(),
            ..Default::default()
        };
        let restored = CommsConfig::from_json(&config.to_json()).unwrap();
        assert_eq!(restored.server_message_sender_name, "Server");
        assert_eq!(restored.ping_classes.len(), config.ping_classes.len());
    }

    #[test]
    fn test_rejects_negative_cooldown() {
        let err = CommsConfig::from_json(r#"{ "min_time_between_pings": -1.0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_duplicate_class() {
        let json = r#"{ "ping_classes": [ { "id": "Danger" }, { "id": "Danger" } ] }"#;
        let err = CommsConfig::from_json(json).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let json = r#"{ "ping_classes": [ { "id": "Danger", "max_pings": 0 } ] }"#;
        assert!(CommsConfig::from_json(json).is_err());
    }

    #[test]
    fn test_parse_error() {
        let err = CommsConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "ban_message": "nope", "ping_classes": [ {{ "id": "Enemy", "max_pings": 2 }} ] }}"#
        )
        .unwrap();
        let config = CommsConfig::load(file.path()).unwrap();
        assert_eq!(config.ban_message, "nope");
        assert_eq!(config.ping_class("Enemy").unwrap().max_pings, 2);
        assert!(config.ping_class("Danger").is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let err = CommsConfig::load("definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
