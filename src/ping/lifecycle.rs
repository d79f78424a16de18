//! Host-owned marker lifecycle.
//!
//! Markers live in spawn order. Only `Active` markers count toward the
//! per-owner class capacity and are replicated to late joiners; a
//! `PendingDestroy` marker stays on the host until its readiness gate opens
//! and is then dropped.

use bevy::prelude::*;

use super::{MarkerId, MarkerState, MarkerView, PingCooldowns, PingGates};
use crate::chat::{BanList, Routed};
use crate::config::CommsConfig;
use crate::error::Rejection;
use crate::logging;
use crate::net::{ClientNotify, Dispatch, NetRole, Outbox, ServerRequest};
use crate::roster::{ConnectionId, NameSet, Roster};
use crate::visibility::{ping_visible, ObserverView};

#[derive(Debug, Clone, PartialEq)]
pub struct PingMarker {
    pub view: MarkerView,
    pub owner: ConnectionId,
    pub state: MarkerState,
    /// Connections this marker is currently replicated to
    pub relevant_to: Vec<ConnectionId>,
}

impl PingMarker {
    pub fn is_active(&self) -> bool {
        self.state == MarkerState::Active
    }
}

/// Everything host-side marker decisions read, plus the queue they write.
pub struct PingHost<'a> {
    pub config: &'a CommsConfig,
    pub roster: &'a Roster,
    pub bans: &'a BanList,
    /// Listen-server local participant and its ping mutes. Remote ping
    /// mutes never reach the host.
    pub local: Option<(ConnectionId, &'a NameSet)>,
    pub outbox: &'a mut Outbox,
}

/// Connections a marker should be replicated to.
pub fn relevant_connections(
    view: &MarkerView,
    roster: &Roster,
    local: Option<(ConnectionId, &NameSet)>,
) -> Vec<ConnectionId> {
    let nobody = NameSet::default();
    roster
        .iter()
        .filter(|p| {
            let ping_muted = match local {
                Some((conn, muted)) if conn == p.conn => muted,
                _ => &nobody,
            };
            let observer = ObserverView {
                team: p.team,
                muted: &nobody,
                ping_muted,
                mute_enemies: false,
            };
            ping_visible(view, &observer)
        })
        .map(|p| p.conn)
        .collect()
}

#[derive(Resource, Debug, Default)]
pub struct LiveMarkers {
    markers: Vec<PingMarker>,
    last_id: u64,
}

impl LiveMarkers {
    pub fn get(&self, id: MarkerId) -> Option<&PingMarker> {
        self.markers.iter().find(|m| m.view.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PingMarker> {
        self.markers.iter()
    }

    pub fn active(&self) -> impl Iterator<Item = &PingMarker> {
        self.markers.iter().filter(|m| m.is_active())
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Active markers of one class owned by one participant.
    pub fn count(&self, owner: ConnectionId, class_id: &str) -> usize {
        self.active()
            .filter(|m| m.owner == owner && m.view.class_id == class_id)
            .count()
    }

    /// Spawn a marker on behalf of `owner`. Banned owners are refused here
    /// as well so the listen-server local path is covered. Cooldown is the
    /// caller's business.
    pub fn spawn(
        &mut self,
        host: &mut PingHost,
        owner: ConnectionId,
        location: [f32; 3],
        class_id: &str,
        now: f64,
    ) -> Result<MarkerId, Rejection> {
        let roster = host.roster;
        let config = host.config;
        let participant = roster
            .get(owner)
            .ok_or(Rejection::UnknownParticipant(owner.0))?;
        if host.bans.is_banned(&participant.display_name) {
            return Err(Rejection::Banned(participant.display_name.clone()));
        }
        let class = config
            .ping_class(class_id)
            .ok_or_else(|| Rejection::UnknownPingClass(class_id.to_string()))?;

        while self.count(owner, class_id) >= class.max_pings {
            let Some(oldest) = self
                .active()
                .find(|m| m.owner == owner && m.view.class_id == class_id)
                .map(|m| m.view.id)
            else {
                break;
            };
            debug!(
                target: logging::PING,
                "{} over capacity for {}, evicting {}", participant.display_name, class_id, oldest
            );
            self.begin_destroy(oldest, now, host.outbox)?;
        }

        self.last_id += 1;
        let view = MarkerView {
            id: MarkerId(self.last_id),
            class_id: class.id.clone(),
            owner_name: participant.display_name.clone(),
            team: participant.team,
            location,
            spawn_time: now,
            ttl: class.lifetime_secs,
            is_global: class.is_global,
        };
        let relevant_to = relevant_connections(&view, roster, host.local);
        for conn in &relevant_to {
            host.outbox.notify(*conn, ClientNotify::PingSpawned(view.clone()));
        }
        info!(
            target: logging::PING,
            "{} pinged {} at {:?} ({} receivers)",
            participant.display_name,
            view.id,
            location,
            relevant_to.len()
        );

        let id = view.id;
        self.markers.push(PingMarker {
            view,
            owner,
            state: MarkerState::Active,
            relevant_to,
        });
        Ok(id)
    }

    /// Move an active marker into its destroy phase and tear it off every
    /// connection it was replicated to.
    pub fn begin_destroy(
        &mut self,
        id: MarkerId,
        now: f64,
        outbox: &mut Outbox,
    ) -> Result<(), Rejection> {
        let marker = self
            .markers
            .iter_mut()
            .find(|m| m.view.id == id && m.is_active())
            .ok_or(Rejection::UnknownMarker(id.0))?;
        marker.state = MarkerState::PendingDestroy { since: now };
        for conn in &marker.relevant_to {
            outbox.notify(*conn, ClientNotify::PingTornOff { marker: id });
        }
        debug!(target: logging::PING, "{} pending destroy", id);
        Ok(())
    }

    /// Destroy requested by a participant. Only the owner may do this.
    pub fn destroy_requested(
        &mut self,
        from: ConnectionId,
        id: MarkerId,
        now: f64,
        outbox: &mut Outbox,
    ) -> Result<(), Rejection> {
        let owner = self
            .get(id)
            .filter(|m| m.is_active())
            .map(|m| m.owner)
            .ok_or(Rejection::UnknownMarker(id.0))?;
        if owner != from {
            return Err(Rejection::AuthorityViolation(
                "only the owner may destroy a ping",
            ));
        }
        self.begin_destroy(id, now, outbox)
    }

    /// Start destroying every active marker past its lifetime.
    pub fn expire(&mut self, now: f64, outbox: &mut Outbox) -> Vec<MarkerId> {
        let expired: Vec<MarkerId> = self
            .active()
            .filter(|m| m.view.is_expired(now))
            .map(|m| m.view.id)
            .collect();
        for id in &expired {
            // ids were just collected from active markers
            let _ = self.begin_destroy(*id, now, outbox);
        }
        expired
    }

    /// Drop pending markers whose readiness gate has opened.
    pub fn poll_pending(
        &mut self,
        now: f64,
        config: &CommsConfig,
        gates: &PingGates,
    ) -> Vec<MarkerId> {
        let mut destroyed = Vec::new();
        self.markers.retain_mut(|m| {
            let MarkerState::PendingDestroy { since } = m.state else {
                return true;
            };
            if gates.is_ready(config, &m.view, now - since) {
                m.state = MarkerState::Destroyed;
                destroyed.push(m.view.id);
                false
            } else {
                true
            }
        });
        for id in &destroyed {
            trace!(target: logging::PING, "{} destroyed", id);
        }
        destroyed
    }

    /// Re-derive relevance after the roster or the local ping mutes changed.
    /// Newly relevant connections get the marker, the rest have it withdrawn.
    pub fn refresh_relevance(&mut self, host: &mut PingHost) {
        for marker in self.markers.iter_mut().filter(|m| m.is_active()) {
            let now_relevant = relevant_connections(&marker.view, host.roster, host.local);
            for conn in &now_relevant {
                if !marker.relevant_to.contains(conn) {
                    host.outbox
                        .notify(*conn, ClientNotify::PingSpawned(marker.view.clone()));
                }
            }
            for conn in &marker.relevant_to {
                if !now_relevant.contains(conn) && host.roster.get(*conn).is_some() {
                    host.outbox.notify(
                        *conn,
                        ClientNotify::PingWithdrawn {
                            marker: marker.view.id,
                        },
                    );
                }
            }
            marker.relevant_to = now_relevant;
        }
    }

    /// Stop treating `conn` as holding any marker. The next relevance
    /// refresh sends everything relevant to it again.
    pub fn forget_receiver(&mut self, conn: ConnectionId) {
        for marker in &mut self.markers {
            marker.relevant_to.retain(|c| *c != conn);
        }
    }

    /// A participant left: its markers go, and it stops being a receiver.
    pub fn remove_participant(
        &mut self,
        conn: ConnectionId,
        now: f64,
        outbox: &mut Outbox,
    ) -> Vec<MarkerId> {
        self.forget_receiver(conn);
        let owned: Vec<MarkerId> = self
            .active()
            .filter(|m| m.owner == conn)
            .map(|m| m.view.id)
            .collect();
        for id in &owned {
            let _ = self.begin_destroy(*id, now, outbox);
        }
        owned
    }
}

/// `spawnPing` for the local participant. The cooldown is consumed before
/// dispatch on every role.
pub fn request_spawn(
    role: &NetRole,
    host: &mut PingHost,
    markers: &mut LiveMarkers,
    cooldowns: &mut PingCooldowns,
    location: [f32; 3],
    class_id: &str,
    now: f64,
) -> Result<Routed, Rejection> {
    let local = role
        .local()
        .ok_or(Rejection::UnknownParticipant(ConnectionId::HOST.0))?;
    if host.config.ping_class(class_id).is_none() {
        return Err(Rejection::UnknownPingClass(class_id.to_string()));
    }
    cooldowns.try_consume(local, host.config.min_time_between_pings)?;

    match role.dispatch() {
        Dispatch::Forward => {
            host.outbox.request(ServerRequest::SpawnPing {
                location,
                class_id: class_id.to_string(),
            });
            Ok(Routed::Forwarded)
        }
        Dispatch::Local => {
            let id = markers.spawn(host, local, location, class_id, now)?;
            Ok(Routed::Local(
                markers.get(id).map_or(0, |m| m.relevant_to.len()),
            ))
        }
    }
}

/// `destroyPing` for the local participant. The host itself may destroy
/// any marker.
pub fn request_destroy(
    role: &NetRole,
    outbox: &mut Outbox,
    markers: &mut LiveMarkers,
    marker: MarkerId,
    now: f64,
) -> Result<Routed, Rejection> {
    match role.dispatch() {
        Dispatch::Forward => {
            outbox.request(ServerRequest::DestroyPing { marker });
            Ok(Routed::Forwarded)
        }
        Dispatch::Local => {
            markers.begin_destroy(marker, now, outbox)?;
            Ok(Routed::Local(1))
        }
    }
}

/// Host handling of forwarded ping requests. Chat and roster requests yield
/// `None`.
pub fn handle_request(
    host: &mut PingHost,
    markers: &mut LiveMarkers,
    cooldowns: &mut PingCooldowns,
    from: ConnectionId,
    request: &ServerRequest,
    now: f64,
) -> Option<Result<MarkerId, Rejection>> {
    let result = match request {
        ServerRequest::SpawnPing { location, class_id } => {
            handle_spawn_request(host, markers, cooldowns, from, *location, class_id, now)
        }
        ServerRequest::DestroyPing { marker } => markers
            .destroy_requested(from, *marker, now, host.outbox)
            .map(|_| *marker),
        _ => return None,
    };
    Some(result)
}

fn handle_spawn_request(
    host: &mut PingHost,
    markers: &mut LiveMarkers,
    cooldowns: &mut PingCooldowns,
    from: ConnectionId,
    location: [f32; 3],
    class_id: &str,
    now: f64,
) -> Result<MarkerId, Rejection> {
    let requester = host
        .roster
        .get(from)
        .ok_or(Rejection::UnknownParticipant(from.0))?;
    if host.bans.is_banned(&requester.display_name) {
        info!(
            target: logging::PING,
            "Ping from banned player {} will be ignored", requester.display_name
        );
        return Err(Rejection::Banned(requester.display_name.clone()));
    }
    cooldowns.try_consume(from, host.config.min_time_between_pings)?;
    markers.spawn(host, from, location, class_id, now)
}
