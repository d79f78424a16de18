//! Headless demo: a listen server and two clients talking over renet on
//! localhost.
//!
//! Usage: `squad-comms [config.json]`

use anyhow::{anyhow, bail, Context, Result};
use bevy::ecs::event::Events;
use bevy::prelude::*;
use bevy_replicon::prelude::*;
use bevy_replicon_renet::{
    netcode::{
        ClientAuthentication, NetcodeClientTransport, NetcodeServerTransport,
        ServerAuthentication, ServerConfig as NetcodeServerConfig,
    },
    renet::{ConnectionConfig, RenetClient, RenetServer},
    RenetChannelsExt, RepliconRenetPlugins,
};
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use squad_comms::chat::{AnnouncementTarget, ChatMessageReceived, ChatScope};
use squad_comms::logging::{self, TracingConfig};
use squad_comms::ping::{MarkerDestroyed, MarkerVisibilityChanged};
use squad_comms::roster::ParticipantJoined;
use squad_comms::{CommsCommand, CommsConfig, CommsPlugin, ConnectionId, NetRole, TeamIndex};

const FRAME: Duration = Duration::from_millis(16);
const HOST_ADDR: &str = "127.0.0.1:5000";
const PROTOCOL_ID: u64 = 0x5eed;
const CONNECT_FRAMES: usize = 300;
const HOST_PLAYER: ConnectionId = ConnectionId(1);
const ALICE: ConnectionId = ConnectionId(2);
const BOB: ConnectionId = ConnectionId(3);

fn comms_app(role: NetRole, config: &CommsConfig) -> App {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins)
        .add_plugins(RepliconPlugins)
        .add_plugins(RepliconRenetPlugins)
        .add_plugins(CommsPlugin::new(role).with_config(config.clone()));
    app.finish();
    app.cleanup();
    app
}

/// Renet channels matching everything registered with replicon.
fn connection_config(app: &App) -> ConnectionConfig {
    let channels = app.world().resource::<RepliconChannels>();
    ConnectionConfig {
        server_channels_config: channels.get_server_configs(),
        client_channels_config: channels.get_client_configs(),
        ..Default::default()
    }
}

fn start_host(app: &mut App, addr: SocketAddr) -> Result<()> {
    let socket = UdpSocket::bind(addr).with_context(|| format!("binding {}", addr))?;
    let netcode_config = NetcodeServerConfig {
        current_time: SystemTime::now().duration_since(UNIX_EPOCH)?,
        max_clients: 16,
        protocol_id: PROTOCOL_ID,
        public_addresses: vec![addr],
        authentication: ServerAuthentication::Unsecure,
    };
    let transport =
        NetcodeServerTransport::new(netcode_config, socket).context("creating host transport")?;
    let server = RenetServer::new(connection_config(app));
    app.insert_resource(server).insert_resource(transport);
    info!(target: logging::NET, "Hosting on {} (UDP/renet)", addr);
    Ok(())
}

fn start_client(app: &mut App, server_addr: SocketAddr, conn: ConnectionId) -> Result<()> {
    let socket = UdpSocket::bind("127.0.0.1:0").context("binding client socket")?;
    let authentication = ClientAuthentication::Unsecure {
        server_addr,
        client_id: conn.0,
        user_data: None,
        protocol_id: PROTOCOL_ID,
    };
    let current_time = SystemTime::now().duration_since(UNIX_EPOCH)?;
    let transport = NetcodeClientTransport::new(current_time, authentication, socket)
        .map_err(|e| anyhow!("creating client transport for {}: {}", conn, e))?;
    let client = RenetClient::new(connection_config(app));
    app.insert_resource(client).insert_resource(transport);
    Ok(())
}

struct Session {
    host: App,
    clients: Vec<(ConnectionId, App)>,
}

impl Session {
    fn new(config: &CommsConfig) -> Result<Self> {
        let addr: SocketAddr = HOST_ADDR.parse()?;
        let mut host = comms_app(NetRole::listen_server(HOST_PLAYER), config);
        start_host(&mut host, addr)?;

        let mut clients = Vec::new();
        for conn in [ALICE, BOB] {
            let mut app = comms_app(NetRole::client(conn), config);
            start_client(&mut app, addr, conn)?;
            clients.push((conn, app));
        }
        Ok(Self { host, clients })
    }

    /// Pump frames until every client's handshake is through.
    fn connect(&mut self) -> Result<()> {
        for _ in 0..CONNECT_FRAMES {
            self.step();
            let connected = self
                .clients
                .iter()
                .all(|(_, app)| app.world().resource::<RepliconClient>().is_connected());
            if connected {
                info!(target: logging::NET, "{} clients connected", self.clients.len());
                return Ok(());
            }
        }
        bail!("clients did not connect within {} frames", CONNECT_FRAMES)
    }

    fn app_mut(&mut self, conn: ConnectionId) -> &mut App {
        if conn == HOST_PLAYER {
            return &mut self.host;
        }
        self.clients
            .iter_mut()
            .find(|(c, _)| *c == conn)
            .map(|(_, app)| app)
            .unwrap_or(&mut self.host)
    }

    fn command(&mut self, conn: ConnectionId, command: CommsCommand) {
        self.app_mut(conn).world_mut().send_event(command);
    }

    /// One frame everywhere. Renet moves the packets in between.
    fn step(&mut self) {
        self.host.update();
        for (_, app) in &mut self.clients {
            app.update();
        }
        std::thread::sleep(FRAME);
    }

    fn run(&mut self, frames: usize) {
        for _ in 0..frames {
            self.step();
            self.report();
        }
    }

    fn report(&mut self) {
        let mut views: Vec<(&str, &mut App)> = vec![("host", &mut self.host)];
        for (conn, app) in &mut self.clients {
            views.push((if *conn == ALICE { "alice" } else { "bob" }, app));
        }
        for (who, app) in views {
            let world = app.world_mut();
            for msg in world.resource_mut::<Events<ChatMessageReceived>>().drain() {
                info!(
                    target: logging::CHAT,
                    "[{}] {:?} {} ({}): {}", who, msg.scope, msg.sender, msg.sender_team, msg.body
                );
            }
            for change in world.resource_mut::<Events<MarkerVisibilityChanged>>().drain() {
                info!(
                    target: logging::PING,
                    "[{}] {} {} at {}",
                    who,
                    change.marker.id,
                    if change.visible { "shown" } else { "hidden" },
                    change.marker.location()
                );
            }
            for gone in world.resource_mut::<Events<MarkerDestroyed>>().drain() {
                info!(target: logging::PING, "[{}] {} destroyed", who, gone.marker);
            }
        }
    }
}

fn main() -> Result<()> {
    logging::init_tracing(&TracingConfig::default());

    let config = match std::env::args().nth(1) {
        Some(path) => CommsConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => CommsConfig::default(),
    };

    let mut session = Session::new(&config)?;
    session.connect()?;

    let team = |i: u8| TeamIndex::new(i).context("team index");
    for (conn, name, t) in [(HOST_PLAYER, "Host", 1), (ALICE, "Alice", 1), (BOB, "Bob", 2)] {
        session.host.world_mut().send_event(ParticipantJoined {
            conn,
            name: name.to_string(),
            team: team(t)?,
        });
    }
    session.run(10);

    session.command(
        ALICE,
        CommsCommand::SendChat {
            body: "push B with me".into(),
            scope: ChatScope::Team,
        },
    );
    session.command(
        BOB,
        CommsCommand::SendChat {
            body: "glhf".into(),
            scope: ChatScope::All,
        },
    );
    session.run(10);

    session.command(
        ALICE,
        CommsCommand::SpawnPing {
            location: Vec3::new(10.0, 0.0, 4.0),
            class_id: "Danger".into(),
        },
    );
    session.run(60);
    // second Danger ping evicts the first
    session.command(
        ALICE,
        CommsCommand::SpawnPing {
            location: Vec3::new(12.0, 0.0, 6.0),
            class_id: "Danger".into(),
        },
    );
    session.run(10);

    session.command(HOST_PLAYER, CommsCommand::BanPlayer { name: "Bob".into() });
    session.run(5);
    session.command(
        BOB,
        CommsCommand::SendChat {
            body: "why can't I talk".into(),
            scope: ChatScope::All,
        },
    );
    session.command(
        HOST_PLAYER,
        CommsCommand::Announce {
            body: "Round ends in 60 seconds".into(),
            target: AnnouncementTarget::All,
        },
    );
    session.run(10);

    // let the remaining markers expire
    session.run(200);
    info!(target: logging::NET, "Scripted session finished");
    Ok(())
}
