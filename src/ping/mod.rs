//! Ping markers.
//!
//! - [`cooldown`]: per-participant rate limiting
//! - [`lifecycle`]: host-owned live markers (spawn, eviction, TTL, destroy)
//! - [`mirror`]: what a local instance knows and shows
//!
//! A marker goes `Active → PendingDestroy → Destroyed`. The pending phase
//! lasts until the class readiness gate passes, which gives the presentation
//! layer time to play a fade-out.

pub mod cooldown;
pub mod lifecycle;
pub mod mirror;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::config::CommsConfig;
use crate::roster::TeamIndex;

pub use cooldown::PingCooldowns;
pub use lifecycle::{LiveMarkers, PingHost, PingMarker};
pub use mirror::{KnownMarker, KnownMarkers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarkerId(pub u64);

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ping#{}", self.0)
    }
}

fn default_max_pings() -> usize {
    1
}

fn default_lifetime_secs() -> f32 {
    3.0
}

/// Per-class marker behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingClass {
    pub id: String,
    /// Live markers of this class one participant may own; the oldest is
    /// evicted on overflow
    #[serde(default = "default_max_pings")]
    pub max_pings: usize,
    /// Seconds before the host destroys the marker. `<= 0` means manual only
    #[serde(default = "default_lifetime_secs")]
    pub lifetime_secs: f32,
    /// Shown to every participant regardless of team or ping mutes
    #[serde(default)]
    pub is_global: bool,
    /// Time a destroyed marker stays around for its exit animation
    #[serde(default)]
    pub destroy_delay_secs: f32,
}

impl PingClass {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            max_pings: default_max_pings(),
            lifetime_secs: default_lifetime_secs(),
            is_global: false,
            destroy_delay_secs: 0.0,
        }
    }
}

/// The replicated part of a marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerView {
    pub id: MarkerId,
    pub class_id: String,
    pub owner_name: String,
    pub team: TeamIndex,
    pub location: [f32; 3],
    /// Host clock, seconds
    pub spawn_time: f64,
    pub ttl: f32,
    pub is_global: bool,
}

impl MarkerView {
    pub fn location(&self) -> Vec3 {
        Vec3::from_array(self.location)
    }

    pub fn is_expired(&self, now: f64) -> bool {
        self.ttl > 0.0 && now - self.spawn_time >= self.ttl as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarkerState {
    Active,
    PendingDestroy { since: f64 },
    Destroyed,
}

/// Decides whether a pending marker may go. Receives the marker and the
/// seconds it has spent pending.
pub type ReadinessGate = fn(&MarkerView, f64) -> bool;

/// Custom readiness gates by class id. Classes without one wait for their
/// `destroy_delay_secs`.
#[derive(Resource, Default)]
pub struct PingGates {
    gates: HashMap<String, ReadinessGate>,
}

impl PingGates {
    pub fn register(&mut self, class_id: impl Into<String>, gate: ReadinessGate) {
        self.gates.insert(class_id.into(), gate);
    }

    pub fn is_ready(&self, config: &CommsConfig, marker: &MarkerView, pending_secs: f64) -> bool {
        if let Some(gate) = self.gates.get(&marker.class_id) {
            return gate(marker, pending_secs);
        }
        config
            .ping_class(&marker.class_id)
            .map_or(true, |class| pending_secs >= class.destroy_delay_secs as f64)
    }
}

/// Presentation event: a marker appeared for or disappeared from the local
/// participant.
#[derive(Event, Debug, Clone, PartialEq)]
pub struct MarkerVisibilityChanged {
    pub marker: MarkerView,
    pub visible: bool,
}

/// Presentation event: a marker finished its destroy phase locally.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerDestroyed {
    pub marker: MarkerId,
}
