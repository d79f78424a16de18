//! Authority seam and replicon channels.
//!
//! Every action has two sides: a [`ServerRequest`] a client forwards to the
//! host, and a [`ClientNotify`] the host pushes back out. Both are replicon
//! events on ordered channels.
//!
//! ```text
//! CommsCommand (any role)
//!       │ NetRole::dispatch()
//!       ├── Local ───► host policy ──► Outbox ─► ToClients<ClientNotify>
//!       └── Forward ─► Outbox ─► ServerRequest ─► FromClient (host) ─► host policy
//! ```
//!
//! Policy code never touches ECS events directly. It addresses envelopes
//! into the [`Outbox`] and [`flush_outbox`] hands them to replicon at the end
//! of the frame. A listen server's own participant is replicon's server
//! client, so its notifications are resent locally by replicon.

use bevy::prelude::*;
use bevy_replicon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::chat::{ChatMessage, ChatScope};
use crate::logging;
use crate::ping::{MarkerId, MarkerView};
use crate::roster::{ConnectionId, Participant};

/// Role of this process in the session.
#[derive(Resource, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetRole {
    /// Authoritative host. `local` is set on a listen server.
    Host { local: Option<ConnectionId> },
    /// Remote client with its own connection id.
    Client { local: ConnectionId },
}

/// Where a request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Local,
    Forward,
}

impl NetRole {
    pub fn dedicated_host() -> Self {
        NetRole::Host { local: None }
    }

    pub fn listen_server(local: ConnectionId) -> Self {
        NetRole::Host { local: Some(local) }
    }

    pub fn client(local: ConnectionId) -> Self {
        NetRole::Client { local }
    }

    pub fn has_authority(&self) -> bool {
        matches!(self, NetRole::Host { .. })
    }

    pub fn local(&self) -> Option<ConnectionId> {
        match *self {
            NetRole::Host { local } => local,
            NetRole::Client { local } => Some(local),
        }
    }

    pub fn dispatch(&self) -> Dispatch {
        if self.has_authority() {
            Dispatch::Local
        } else {
            Dispatch::Forward
        }
    }

    /// Replicon client id a participant is reached through. The listen
    /// server's own participant is the server client.
    pub fn client_id(&self, conn: ConnectionId) -> ClientId {
        match *self {
            NetRole::Host { local: Some(local) } if local == conn => ClientId::SERVER,
            _ => ClientId::new(conn.0),
        }
    }

    /// Inverse of [`NetRole::client_id`]. `None` for the server client of a
    /// dedicated host.
    pub fn connection(&self, client_id: ClientId) -> Option<ConnectionId> {
        if client_id == ClientId::SERVER {
            self.local()
        } else {
            Some(ConnectionId(client_id.get()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetScope {
    Host,
    Client(ConnectionId),
    BroadcastAll,
}

/// Client → host.
#[derive(Event, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerRequest {
    SendChat { body: String, scope: ChatScope },
    SetPlayerName { name: String },
    /// Raw index so the host can reject out-of-range values itself
    SetTeam { team: u8 },
    SpawnPing { location: [f32; 3], class_id: String },
    DestroyPing { marker: MarkerId },
}

/// Host → client.
#[derive(Event, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientNotify {
    RosterSnapshot { participants: Vec<Participant> },
    ParticipantUpdated(Participant),
    ParticipantLeft { conn: ConnectionId },
    Message { message: ChatMessage, ban_notice: bool },
    PingSpawned(MarkerView),
    /// Marker entered its destroy phase; the client plays it out locally
    PingTornOff { marker: MarkerId },
    /// Marker stopped being relevant to this client; drop it now
    PingWithdrawn { marker: MarkerId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Request(ServerRequest),
    Notify(ClientNotify),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub target: TargetScope,
    pub payload: Payload,
}

/// Envelopes addressed this frame, in send order.
#[derive(Resource, Debug, Default)]
pub struct Outbox {
    queue: Vec<Envelope>,
}

impl Outbox {
    pub fn send_reliable(&mut self, target: TargetScope, payload: Payload) {
        self.queue.push(Envelope { target, payload });
    }

    pub fn request(&mut self, request: ServerRequest) {
        self.send_reliable(TargetScope::Host, Payload::Request(request));
    }

    pub fn notify(&mut self, conn: ConnectionId, notify: ClientNotify) {
        self.send_reliable(TargetScope::Client(conn), Payload::Notify(notify));
    }

    pub fn broadcast(&mut self, notify: ClientNotify) {
        self.send_reliable(TargetScope::BroadcastAll, Payload::Notify(notify));
    }

    pub fn drain(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.queue)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Envelope> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Register both directions on ordered channels. Needs `RepliconPlugins`.
pub(crate) fn register_channels(app: &mut App) {
    app.add_client_event::<ServerRequest>(ChannelKind::Ordered)
        .add_server_event::<ClientNotify>(ChannelKind::Ordered);
}

/// Hand this frame's envelopes to replicon.
pub fn flush_outbox(
    role: Res<NetRole>,
    mut outbox: ResMut<Outbox>,
    mut requests: EventWriter<ServerRequest>,
    mut notifications: EventWriter<ToClients<ClientNotify>>,
) {
    for Envelope { target, payload } in outbox.drain() {
        match (target, payload) {
            (TargetScope::Host, Payload::Request(request)) => {
                requests.send(request);
            }
            (TargetScope::Client(conn), Payload::Notify(event)) => {
                notifications.send(ToClients {
                    mode: SendMode::Direct(role.client_id(conn)),
                    event,
                });
            }
            (TargetScope::BroadcastAll, Payload::Notify(event)) => {
                notifications.send(ToClients {
                    mode: SendMode::Broadcast,
                    event,
                });
            }
            (target, payload) => {
                error!(target: logging::NET, "Dropping {:?} addressed to {:?}", payload, target);
            }
        }
    }
}
