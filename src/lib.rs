//! Squad Comms - networked chat and ping core for Bevy
//!
//! Routes team/all chat and world-space ping markers between participants of
//! a session under one authoritative host:
//! - Chat distribution (team, all, host announcements, ban list)
//! - Ping lifecycle (cooldown, per-class capacity, TTL, staged destroy)
//! - Visibility filter shared by local suppression and host relevance
//! - Authority seam (local dispatch vs forward-to-host) over `bevy_replicon` events
//!
//! Presentation (widgets, marker meshes, input) lives in the game and only
//! consumes the events emitted here. Add [`CommsPlugin`] after
//! `RepliconPlugins` and a replicon transport backend.

pub mod chat;
pub mod config;
pub mod error;
pub mod logging;
pub mod net;
pub mod ping;
pub mod plugin;
pub mod roster;
pub mod visibility;

pub use config::CommsConfig;
pub use error::{ConfigError, Rejection};
pub use net::NetRole;
pub use plugin::{CommsCommand, CommsPlugin, CommsRejected, CommsSet};
pub use roster::{ConnectionId, Participant, Roster, TeamIndex};
