//! In-process network of comms apps for integration tests.
//!
//! Every request and notification crosses replicon's channels: the host and
//! each client exchange messages through `ServerTestAppExt` once per frame.

#![allow(dead_code)]

use bevy::ecs::event::Events;
use bevy::prelude::*;
use bevy_replicon::prelude::*;
use bevy_replicon::test_app::ServerTestAppExt;
use std::collections::HashMap;
use std::time::Duration;

use squad_comms::chat::ChatMessageReceived;
use squad_comms::ping::{KnownMarkers, LiveMarkers, MarkerDestroyed, MarkerVisibilityChanged};
use squad_comms::roster::{ParticipantJoined, ParticipantLeft};
use squad_comms::{
    CommsCommand, CommsConfig, CommsPlugin, CommsRejected, ConnectionId, NetRole, TeamIndex,
};

pub const FRAME: Duration = Duration::from_millis(50);

pub fn team(i: u8) -> TeamIndex {
    TeamIndex::new(i).unwrap()
}

pub fn comms_app(role: NetRole, config: &CommsConfig) -> App {
    let mut app = App::new();
    app.insert_resource(Time::<()>::default()).add_plugins((
        RepliconPlugins.set(ServerPlugin {
            tick_policy: TickPolicy::EveryFrame,
            ..Default::default()
        }),
        CommsPlugin::new(role).with_config(config.clone()),
    ));
    app.finish();
    app.cleanup();
    app
}

/// Presentation output of one app, collected every frame.
#[derive(Default)]
pub struct Collected {
    pub chat: Vec<ChatMessageReceived>,
    pub visibility: Vec<MarkerVisibilityChanged>,
    pub destroyed: Vec<MarkerDestroyed>,
    pub rejected: Vec<CommsRejected>,
}

impl Collected {
    fn collect_from(&mut self, app: &mut App) {
        self.chat.extend(drain::<ChatMessageReceived>(app));
        self.visibility.extend(drain::<MarkerVisibilityChanged>(app));
        self.destroyed.extend(drain::<MarkerDestroyed>(app));
        self.rejected.extend(drain::<CommsRejected>(app));
    }
}

/// Key of the host app in the collected output.
pub const HOST: u64 = 0;

pub struct TestNetwork {
    pub host: App,
    pub host_local: Option<ConnectionId>,
    pub clients: Vec<(ConnectionId, App)>,
    collected: HashMap<u64, Collected>,
}

impl TestNetwork {
    /// Replicon hands out client ids from 1 in connection order, so
    /// `clients` has to be `1..=n`.
    fn connect(role: NetRole, config: &CommsConfig, clients: &[u64]) -> Self {
        let mut host = comms_app(role, config);
        let clients = clients
            .iter()
            .map(|id| {
                let conn = ConnectionId(*id);
                let mut app = comms_app(NetRole::client(conn), config);
                host.connect_client(&mut app);
                assert_eq!(
                    app.world().resource::<RepliconClient>().id(),
                    Some(ClientId::new(*id)),
                    "clients must be listed in connection order"
                );
                (conn, app)
            })
            .collect();
        Self {
            host,
            host_local: role.local(),
            clients,
            collected: HashMap::new(),
        }
    }

    /// Dedicated host with one remote client per id.
    pub fn dedicated(config: &CommsConfig, clients: &[u64]) -> Self {
        Self::connect(NetRole::dedicated_host(), config, clients)
    }

    /// Listen server whose local participant is `local`.
    pub fn listen(config: &CommsConfig, local: u64, clients: &[u64]) -> Self {
        Self::connect(NetRole::listen_server(ConnectionId(local)), config, clients)
    }

    pub fn app(&mut self, conn: u64) -> &mut App {
        let conn = ConnectionId(conn);
        if self.host_local == Some(conn) {
            return &mut self.host;
        }
        &mut self
            .clients
            .iter_mut()
            .find(|(c, _)| *c == conn)
            .expect("no such participant")
            .1
    }

    pub fn join(&mut self, conn: u64, name: &str, t: u8) {
        self.host.world_mut().send_event(ParticipantJoined {
            conn: ConnectionId(conn),
            name: name.to_string(),
            team: team(t),
        });
    }

    pub fn leave(&mut self, conn: u64) {
        self.host.world_mut().send_event(ParticipantLeft {
            conn: ConnectionId(conn),
        });
    }

    /// Drop the client's transport connection instead of reporting a leave.
    /// The client app leaves the network with it.
    pub fn disconnect(&mut self, conn: u64) {
        let conn = ConnectionId(conn);
        let index = self
            .clients
            .iter()
            .position(|(c, _)| *c == conn)
            .expect("no such client");
        let (_, mut app) = self.clients.remove(index);
        self.host.disconnect_client(&mut app);
    }

    pub fn command(&mut self, conn: u64, command: CommsCommand) {
        self.app(conn).world_mut().send_event(command);
    }

    pub fn host_command(&mut self, command: CommsCommand) {
        self.host.world_mut().send_event(command);
    }

    pub fn step(&mut self) {
        self.host.world_mut().resource_mut::<Time>().advance_by(FRAME);
        self.host.update();
        let host_key = self.host_local.map_or(HOST, |c| c.0);
        self.collected
            .entry(host_key)
            .or_default()
            .collect_from(&mut self.host);
        for (conn, app) in &mut self.clients {
            app.world_mut().resource_mut::<Time>().advance_by(FRAME);
            app.update();
            self.collected.entry(conn.0).or_default().collect_from(app);
        }

        for (_, app) in &mut self.clients {
            self.host.exchange_with_client(app);
        }
    }

    /// Enough frames for a request to reach the host and the result to come
    /// back and be applied.
    pub fn settle(&mut self) {
        for _ in 0..4 {
            self.step();
        }
    }

    pub fn run_for(&mut self, secs: f32) {
        let frames = (secs / FRAME.as_secs_f32()).ceil() as usize;
        for _ in 0..frames {
            self.step();
        }
    }

    fn take(&mut self, conn: u64) -> Collected {
        self.collected.remove(&conn).unwrap_or_default()
    }

    /// Chat shown to `conn` since the last call.
    pub fn chat(&mut self, conn: u64) -> Vec<ChatMessageReceived> {
        let mut collected = self.take(conn);
        let chat = std::mem::take(&mut collected.chat);
        self.collected.insert(conn, collected);
        chat
    }

    pub fn visibility(&mut self, conn: u64) -> Vec<MarkerVisibilityChanged> {
        let mut collected = self.take(conn);
        let visibility = std::mem::take(&mut collected.visibility);
        self.collected.insert(conn, collected);
        visibility
    }

    pub fn destroyed(&mut self, conn: u64) -> Vec<MarkerDestroyed> {
        let mut collected = self.take(conn);
        let destroyed = std::mem::take(&mut collected.destroyed);
        self.collected.insert(conn, collected);
        destroyed
    }

    /// Pass [`HOST`] for a dedicated host.
    pub fn rejections(&mut self, conn: u64) -> Vec<CommsRejected> {
        let mut collected = self.take(conn);
        let rejected = std::mem::take(&mut collected.rejected);
        self.collected.insert(conn, collected);
        rejected
    }

    pub fn live_markers(&self) -> &LiveMarkers {
        self.host.world().resource::<LiveMarkers>()
    }

    pub fn known_markers(&mut self, conn: u64) -> &KnownMarkers {
        self.app(conn).world().resource::<KnownMarkers>()
    }
}

pub fn drain<E: Event>(app: &mut App) -> Vec<E> {
    app.world_mut().resource_mut::<Events<E>>().drain().collect()
}
