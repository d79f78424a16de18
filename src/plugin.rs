//! Bevy wiring.
//!
//! One plugin, the same on every role. What actually runs depends on the
//! [`NetRole`] resource: host-only systems are gated on authority, mirror
//! systems on having a local participant.
//!
//! Frame order: `Tick → Ingest → Commands → Lifecycle → Flush`.
//!
//! Requests and notifications ride replicon events, so `RepliconPlugins` has
//! to be added first.

use bevy::prelude::*;
use bevy_replicon::prelude::*;

use crate::chat::{self, AnnouncementTarget, BanList, ChatMessageReceived, ChatScope};
use crate::config::CommsConfig;
use crate::error::Rejection;
use crate::logging;
use crate::net::{self, ClientNotify, NetRole, Outbox, ServerRequest};
use crate::ping::{
    self, KnownMarkers, LiveMarkers, MarkerDestroyed, MarkerId, MarkerVisibilityChanged,
    PingCooldowns, PingGates, PingHost,
};
use crate::roster::{ConnectionId, Participant, ParticipantJoined, ParticipantLeft, Roster, TeamIndex};
use crate::visibility::LocalFilters;

#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommsSet {
    /// Cooldown timers
    Tick,
    /// Connection changes, forwarded requests and host notifications
    Ingest,
    /// Local [`CommsCommand`]s
    Commands,
    /// Marker expiry and destroy gates
    Lifecycle,
    /// Outbox handed to replicon
    Flush,
}

/// Everything game code can ask for. Sent as an event; handled in
/// [`CommsSet::Commands`].
#[derive(Event, Debug, Clone, PartialEq)]
pub enum CommsCommand {
    SendChat { body: String, scope: ChatScope },
    SetPlayerName { name: String },
    SetTeam { team: u8 },
    SpawnPing { location: Vec3, class_id: String },
    DestroyPing { marker: MarkerId },
    MutePlayer { name: String },
    UnmutePlayer { name: String },
    MutePlayerPings { name: String },
    UnmutePlayerPings { name: String },
    SetMuteEnemies(bool),
    // Authority only
    AssignName { conn: ConnectionId, name: String },
    AssignTeam { conn: ConnectionId, team: u8 },
    Announce { body: String, target: AnnouncementTarget },
    BanPlayer { name: String },
    UnbanPlayer { name: String },
}

impl CommsCommand {
    fn authority_only(&self) -> Option<&'static str> {
        match self {
            CommsCommand::AssignName { .. } => Some("renaming others is host only"),
            CommsCommand::AssignTeam { .. } => Some("assigning teams is host only"),
            CommsCommand::Announce { .. } => Some("announcements are host only"),
            CommsCommand::BanPlayer { .. } | CommsCommand::UnbanPlayer { .. } => {
                Some("ban list is host only")
            }
            _ => None,
        }
    }
}

/// A command or forwarded request that was dropped.
#[derive(Event, Debug, Clone, PartialEq)]
pub struct CommsRejected {
    /// Local for commands, the requester for forwarded requests
    pub from: Option<ConnectionId>,
    pub rejection: Rejection,
}

pub struct CommsPlugin {
    pub role: NetRole,
    pub config: CommsConfig,
}

impl CommsPlugin {
    pub fn new(role: NetRole) -> Self {
        Self {
            role,
            config: CommsConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CommsConfig) -> Self {
        self.config = config;
        self
    }
}

impl Plugin for CommsPlugin {
    fn build(&self, app: &mut App) {
        let config = match self.config.validate() {
            Ok(()) => self.config.clone(),
            Err(e) => {
                error!(target: logging::NET, "Comms config is invalid, using defaults: {}", e);
                CommsConfig::default()
            }
        };

        net::register_channels(app);
        app.insert_resource(self.role)
            .insert_resource(config)
            .init_resource::<Roster>()
            .init_resource::<BanList>()
            .init_resource::<LocalFilters>()
            .init_resource::<Outbox>()
            .init_resource::<LiveMarkers>()
            .init_resource::<KnownMarkers>()
            .init_resource::<PingCooldowns>()
            .init_resource::<PingGates>()
            .add_event::<CommsCommand>()
            .add_event::<CommsRejected>()
            .add_event::<ParticipantJoined>()
            .add_event::<ParticipantLeft>()
            .add_event::<ChatMessageReceived>()
            .add_event::<MarkerVisibilityChanged>()
            .add_event::<MarkerDestroyed>()
            .configure_sets(
                Update,
                (
                    CommsSet::Tick,
                    CommsSet::Ingest,
                    CommsSet::Commands,
                    CommsSet::Lifecycle,
                    CommsSet::Flush,
                )
                    .chain(),
            )
            .add_systems(Update, tick_cooldowns.in_set(CommsSet::Tick))
            .add_systems(
                Update,
                (
                    track_connections.run_if(has_authority),
                    ingest_requests.run_if(has_authority),
                    ingest_notifications.run_if(has_local_participant),
                )
                    .chain()
                    .in_set(CommsSet::Ingest),
            )
            .add_systems(Update, process_commands.in_set(CommsSet::Commands))
            .add_systems(
                Update,
                (
                    host_marker_lifecycle.run_if(has_authority),
                    mirror_marker_lifecycle.run_if(has_local_participant),
                )
                    .in_set(CommsSet::Lifecycle),
            )
            .add_systems(Update, net::flush_outbox.in_set(CommsSet::Flush));

        info!(target: logging::NET, "Comms plugin initialized as {:?}", self.role);
    }
}

fn has_authority(role: Res<NetRole>) -> bool {
    role.has_authority()
}

fn has_local_participant(role: Res<NetRole>) -> bool {
    role.local().is_some()
}

fn ping_host<'a>(
    role: &NetRole,
    config: &'a CommsConfig,
    roster: &'a Roster,
    bans: &'a BanList,
    filters: &'a LocalFilters,
    outbox: &'a mut Outbox,
) -> PingHost<'a> {
    PingHost {
        config,
        roster,
        bans,
        local: role.local().map(|conn| (conn, filters.ping_muted_players())),
        outbox,
    }
}

fn local_team(role: &NetRole, roster: &Roster) -> TeamIndex {
    role.local()
        .and_then(|conn| roster.get(conn))
        .map_or(TeamIndex::NONE, |p| p.team)
}

fn tick_cooldowns(time: Res<Time>, mut cooldowns: ResMut<PingCooldowns>) {
    cooldowns.tick(time.delta_secs());
}

/// Host: apply joins and leaves reported by the session layer. A replicon
/// disconnect counts as a leave.
#[allow(clippy::too_many_arguments)]
fn track_connections(
    role: Res<NetRole>,
    config: Res<CommsConfig>,
    bans: Res<BanList>,
    filters: Res<LocalFilters>,
    time: Res<Time>,
    mut joined: EventReader<ParticipantJoined>,
    mut left: EventReader<ParticipantLeft>,
    mut server_events: EventReader<ServerEvent>,
    mut roster: ResMut<Roster>,
    mut outbox: ResMut<Outbox>,
    mut markers: ResMut<LiveMarkers>,
    mut cooldowns: ResMut<PingCooldowns>,
) {
    let now = time.elapsed_secs_f64();
    let mut changed = false;

    for event in joined.read() {
        let participant = Participant::new(event.conn, event.name.clone(), event.team);
        info!(
            target: logging::ROSTER,
            "{} joined as {} on {}", event.conn, participant.display_name, participant.team
        );
        roster.upsert(participant.clone());
        // a fresh snapshot restarts the joiner's view, markers included
        markers.forget_receiver(event.conn);
        outbox.notify(
            event.conn,
            ClientNotify::RosterSnapshot {
                participants: roster.snapshot(),
            },
        );
        for other in roster.iter().filter(|p| p.conn != event.conn) {
            outbox.notify(other.conn, ClientNotify::ParticipantUpdated(participant.clone()));
        }
        changed = true;
    }

    let disconnected = server_events.read().filter_map(|event| match event {
        ServerEvent::ClientDisconnected { client_id, .. } => role.connection(*client_id),
        _ => None,
    });
    let leaving: Vec<ConnectionId> = left.read().map(|event| event.conn).chain(disconnected).collect();

    for conn in leaving {
        let Some(gone) = roster.remove(conn) else {
            continue;
        };
        info!(target: logging::ROSTER, "{} ({}) left", gone.display_name, conn);
        markers.remove_participant(conn, now, &mut outbox);
        cooldowns.forget(conn);
        outbox.broadcast(ClientNotify::ParticipantLeft { conn });
        changed = true;
    }

    if changed {
        // late joiners pick up the markers already live
        let mut host = ping_host(&role, &config, &roster, &bans, &filters, &mut outbox);
        markers.refresh_relevance(&mut host);
    }
}

/// Host: run requests forwarded by clients, in arrival order.
#[allow(clippy::too_many_arguments)]
fn ingest_requests(
    role: Res<NetRole>,
    config: Res<CommsConfig>,
    bans: Res<BanList>,
    filters: Res<LocalFilters>,
    time: Res<Time>,
    mut requests: EventReader<FromClient<ServerRequest>>,
    mut roster: ResMut<Roster>,
    mut outbox: ResMut<Outbox>,
    mut markers: ResMut<LiveMarkers>,
    mut cooldowns: ResMut<PingCooldowns>,
    mut rejected: EventWriter<CommsRejected>,
) {
    let now = time.elapsed_secs_f64();

    for FromClient { client_id, event: request } in requests.read() {
        // the listen-server participant goes through Commands, never here
        if *client_id == ClientId::SERVER {
            continue;
        }
        let from = ConnectionId(client_id.get());
        trace!(target: logging::NET, "Request from {}: {:?}", from, request);

        let result = match chat::handle_request(&config, &mut roster, &bans, &mut outbox, from, request) {
            Some(result) => {
                if result.is_ok() && matches!(request, ServerRequest::SetTeam { .. }) {
                    let mut host = ping_host(&role, &config, &roster, &bans, &filters, &mut outbox);
                    markers.refresh_relevance(&mut host);
                }
                result.map(|_| ())
            }
            None => {
                let mut host = ping_host(&role, &config, &roster, &bans, &filters, &mut outbox);
                ping::lifecycle::handle_request(&mut host, &mut markers, &mut cooldowns, from, request, now)
                    .map_or(Ok(()), |result| result.map(|_| ()))
            }
        };

        if let Err(rejection) = result {
            rejection.log(logging::NET);
            rejected.send(CommsRejected {
                from: Some(from),
                rejection,
            });
        }
    }
}

/// Local participant: apply what the host pushed.
#[allow(clippy::too_many_arguments)]
fn ingest_notifications(
    role: Res<NetRole>,
    time: Res<Time>,
    filters: Res<LocalFilters>,
    mut notifications: EventReader<ClientNotify>,
    mut roster: ResMut<Roster>,
    mut known: ResMut<KnownMarkers>,
    mut received: EventWriter<ChatMessageReceived>,
    mut visibility: EventWriter<MarkerVisibilityChanged>,
    mut destroyed: EventWriter<MarkerDestroyed>,
) {
    let now = time.elapsed_secs_f64();
    let mirror_roster = !role.has_authority();
    let local = role.local();

    for notify in notifications.read() {
        match notify {
            ClientNotify::RosterSnapshot { participants } => {
                if mirror_roster {
                    roster.replace_all(participants.clone());
                }
                let (gone, hidden) = known.clear();
                visibility.send_batch(hidden);
                destroyed.send_batch(gone);
            }
            ClientNotify::ParticipantUpdated(participant) => {
                if mirror_roster {
                    roster.upsert(participant.clone());
                }
                if Some(participant.conn) == local {
                    let observer = filters.observer(local_team(&role, &roster));
                    visibility.send_batch(known.refresh(&observer));
                }
            }
            ClientNotify::ParticipantLeft { conn } => {
                if mirror_roster {
                    roster.remove(*conn);
                }
            }
            ClientNotify::Message {
                message,
                ban_notice,
            } => {
                let observer = filters.observer(local_team(&role, &roster));
                if let Some(event) = chat::receive(message, *ban_notice, &observer) {
                    received.send(event);
                }
            }
            ClientNotify::PingSpawned(view) => {
                let observer = filters.observer(local_team(&role, &roster));
                if let Some(event) = known.on_spawned(view.clone(), &observer) {
                    visibility.send(event);
                }
            }
            ClientNotify::PingTornOff { marker } => {
                known.on_torn_off(*marker, now);
            }
            ClientNotify::PingWithdrawn { marker } => {
                if let Some(event) = known.on_withdrawn(*marker) {
                    visibility.send(event);
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn process_commands(
    role: Res<NetRole>,
    config: Res<CommsConfig>,
    time: Res<Time>,
    mut commands: EventReader<CommsCommand>,
    mut roster: ResMut<Roster>,
    mut bans: ResMut<BanList>,
    mut filters: ResMut<LocalFilters>,
    mut outbox: ResMut<Outbox>,
    mut markers: ResMut<LiveMarkers>,
    mut cooldowns: ResMut<PingCooldowns>,
    mut known: ResMut<KnownMarkers>,
    mut visibility: EventWriter<MarkerVisibilityChanged>,
    mut rejected: EventWriter<CommsRejected>,
) {
    let now = time.elapsed_secs_f64();

    for command in commands.read() {
        if let Some(reason) = command.authority_only() {
            if !role.has_authority() {
                let rejection = Rejection::AuthorityViolation(reason);
                rejection.log(logging::NET);
                rejected.send(CommsRejected {
                    from: role.local(),
                    rejection,
                });
                continue;
            }
        }

        let mut relevance_changed = false;
        let mut filters_changed = false;

        let result: Result<(), Rejection> = match command {
            CommsCommand::SendChat { body, scope } => {
                chat::request_send(&role, &config, &roster, &bans, &mut outbox, body, *scope)
                    .map(|_| ())
            }
            CommsCommand::SetPlayerName { name } => {
                chat::request_set_name(&role, &config, &mut roster, &mut outbox, name).map(|_| ())
            }
            CommsCommand::SetTeam { team } => {
                chat::request_set_team(&role, &mut roster, &mut outbox, *team).map(|routed| {
                    relevance_changed = routed != chat::Routed::Forwarded;
                    filters_changed = relevance_changed;
                })
            }
            CommsCommand::SpawnPing { location, class_id } => {
                let mut host = ping_host(&role, &config, &roster, &bans, &filters, &mut outbox);
                ping::lifecycle::request_spawn(
                    &role,
                    &mut host,
                    &mut markers,
                    &mut cooldowns,
                    location.to_array(),
                    class_id,
                    now,
                )
                .map(|_| ())
            }
            CommsCommand::DestroyPing { marker } => {
                ping::lifecycle::request_destroy(&role, &mut outbox, &mut markers, *marker, now)
                    .map(|_| ())
            }
            CommsCommand::MutePlayer { name } => {
                filters.mute_player(name);
                Ok(())
            }
            CommsCommand::UnmutePlayer { name } => {
                filters.unmute_player(name);
                Ok(())
            }
            CommsCommand::MutePlayerPings { name } => {
                filters_changed = filters.mute_player_pings(name);
                relevance_changed = filters_changed && role.has_authority();
                Ok(())
            }
            CommsCommand::UnmutePlayerPings { name } => {
                filters_changed = filters.unmute_player_pings(name);
                relevance_changed = filters_changed && role.has_authority();
                Ok(())
            }
            CommsCommand::SetMuteEnemies(mute) => {
                filters.set_mute_enemies(*mute);
                Ok(())
            }
            CommsCommand::AssignName { conn, name } => {
                chat::assign_name(&mut roster, &mut outbox, *conn, name)
            }
            CommsCommand::AssignTeam { conn, team } => {
                chat::assign_team(&mut roster, &mut outbox, *conn, *team).map(|_| {
                    relevance_changed = true;
                    filters_changed = role.local() == Some(*conn);
                })
            }
            CommsCommand::Announce { body, target } => {
                chat::announce(&config, &roster, &mut outbox, body, target);
                Ok(())
            }
            CommsCommand::BanPlayer { name } => {
                bans.ban(name);
                Ok(())
            }
            CommsCommand::UnbanPlayer { name } => {
                bans.unban(name);
                Ok(())
            }
        };

        if let Err(rejection) = result {
            rejection.log(logging::CHAT);
            rejected.send(CommsRejected {
                from: role.local(),
                rejection,
            });
            continue;
        }

        if relevance_changed {
            let mut host = ping_host(&role, &config, &roster, &bans, &filters, &mut outbox);
            markers.refresh_relevance(&mut host);
        }
        if filters_changed {
            let observer = filters.observer(local_team(&role, &roster));
            visibility.send_batch(known.refresh(&observer));
        }
    }
}

fn host_marker_lifecycle(
    config: Res<CommsConfig>,
    gates: Res<PingGates>,
    time: Res<Time>,
    mut markers: ResMut<LiveMarkers>,
    mut outbox: ResMut<Outbox>,
) {
    let now = time.elapsed_secs_f64();
    for id in markers.expire(now, &mut outbox) {
        debug!(target: logging::PING, "{} expired", id);
    }
    markers.poll_pending(now, &config, &gates);
}

fn mirror_marker_lifecycle(
    config: Res<CommsConfig>,
    gates: Res<PingGates>,
    time: Res<Time>,
    mut known: ResMut<KnownMarkers>,
    mut visibility: EventWriter<MarkerVisibilityChanged>,
    mut destroyed: EventWriter<MarkerDestroyed>,
) {
    let (gone, hidden) = known.poll_pending(time.elapsed_secs_f64(), &config, &gates);
    visibility.send_batch(hidden);
    destroyed.send_batch(gone);
}
