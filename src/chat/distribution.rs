//! Chat routing.
//!
//! `request_*` functions are callable from any role: without authority they
//! forward the request untouched, with authority they run the host path.
//! The host path re-validates everything because forwarded requests come
//! from clients it does not trust.

use bevy::prelude::*;

use super::{BanList, ChatMessage, ChatScope};
use crate::config::CommsConfig;
use crate::error::Rejection;
use crate::logging;
use crate::net::{ClientNotify, Dispatch, NetRole, Outbox, ServerRequest};
use crate::roster::{
    is_placeholder_name, ConnectionId, Participant, Roster, TeamIndex, PLACEHOLDER_NAME,
};

/// Outcome of a request that was not rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Sent to the host, nothing happened locally
    Forwarded,
    /// Handled here; number of notifications queued
    Local(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnouncementTarget {
    All,
    Player(String),
    Team(TeamIndex),
}

fn local_participant(role: &NetRole, roster: &Roster) -> Result<Participant, Rejection> {
    let conn = role
        .local()
        .ok_or(Rejection::UnknownParticipant(ConnectionId::HOST.0))?;
    // A client may not have received its roster snapshot yet
    Ok(roster
        .get(conn)
        .cloned()
        .unwrap_or_else(|| Participant::new(conn, PLACEHOLDER_NAME, TeamIndex::NONE)))
}

fn check_sender(config: &CommsConfig, sender: &Participant, body: &str) -> Result<(), Rejection> {
    if body.is_empty() {
        return Err(Rejection::EmptyBody);
    }
    if !sender.has_name() {
        error!(target: logging::CHAT, "No player name on {}", sender.conn);
        if config.reject_messages_with_no_player_name {
            return Err(Rejection::MissingName);
        }
    }
    Ok(())
}

/// `sendMessage` for the local participant.
pub fn request_send(
    role: &NetRole,
    config: &CommsConfig,
    roster: &Roster,
    bans: &BanList,
    outbox: &mut Outbox,
    body: &str,
    scope: ChatScope,
) -> Result<Routed, Rejection> {
    let sender = local_participant(role, roster)?;
    info!(
        target: logging::CHAT,
        "Sending {:?} message from {}: {}", scope, sender.display_name, body
    );
    check_sender(config, &sender, body)?;

    if scope == ChatScope::Announcement {
        if !role.has_authority() {
            return Err(Rejection::AuthorityViolation("announcements are host only"));
        }
        return Ok(Routed::Local(announce(
            config,
            roster,
            outbox,
            body,
            &AnnouncementTarget::All,
        )));
    }

    match role.dispatch() {
        Dispatch::Forward => {
            outbox.request(ServerRequest::SendChat {
                body: body.to_string(),
                scope,
            });
            Ok(Routed::Forwarded)
        }
        Dispatch::Local => {
            distribute(config, roster, bans, outbox, sender.conn, body, scope).map(Routed::Local)
        }
    }
}

/// Host side of `sendMessage`. Returns how many participants were sent the
/// message. A banned sender gets exactly one ban notice and nobody else
/// hears anything.
pub fn distribute(
    config: &CommsConfig,
    roster: &Roster,
    bans: &BanList,
    outbox: &mut Outbox,
    sender: ConnectionId,
    body: &str,
    scope: ChatScope,
) -> Result<usize, Rejection> {
    let sender = roster
        .get(sender)
        .ok_or(Rejection::UnknownParticipant(sender.0))?;
    check_sender(config, sender, body)?;

    if scope == ChatScope::Announcement {
        return Err(Rejection::AuthorityViolation("announcements are host only"));
    }

    if bans.is_banned(&sender.display_name) {
        info!(
            target: logging::CHAT,
            "Message from banned player {} will be ignored: {}", sender.display_name, body
        );
        outbox.notify(
            sender.conn,
            ClientNotify::Message {
                message: ChatMessage {
                    sender_name: config.server_message_sender_name.clone(),
                    sender_team: TeamIndex::NONE,
                    body: config.ban_message.clone(),
                    scope: ChatScope::Announcement,
                },
                ban_notice: true,
            },
        );
        return Err(Rejection::Banned(sender.display_name.clone()));
    }

    let message = ChatMessage {
        sender_name: sender.display_name.clone(),
        sender_team: sender.team,
        body: body.to_string(),
        scope,
    };

    let mut delivered = 0;
    for receiver in roster.iter() {
        if scope == ChatScope::All || receiver.team == sender.team {
            outbox.notify(
                receiver.conn,
                ClientNotify::Message {
                    message: message.clone(),
                    ban_notice: false,
                },
            );
            delivered += 1;
        }
    }
    Ok(delivered)
}

/// Host-only announcement. The caller is responsible for the authority
/// check. Returns how many participants were addressed.
pub fn announce(
    config: &CommsConfig,
    roster: &Roster,
    outbox: &mut Outbox,
    body: &str,
    target: &AnnouncementTarget,
) -> usize {
    if body.is_empty() {
        return 0;
    }
    let message = ChatMessage {
        sender_name: config.server_message_sender_name.clone(),
        sender_team: TeamIndex::NONE,
        body: body.to_string(),
        scope: ChatScope::Announcement,
    };

    let mut delivered = 0;
    for receiver in roster.iter() {
        let matches = match target {
            AnnouncementTarget::All => true,
            AnnouncementTarget::Player(name) => receiver.display_name == *name,
            AnnouncementTarget::Team(team) => receiver.team == *team,
        };
        if matches {
            outbox.notify(
                receiver.conn,
                ClientNotify::Message {
                    message: message.clone(),
                    ban_notice: false,
                },
            );
            delivered += 1;
        }
    }
    debug!(
        target: logging::CHAT,
        "Announcement to {:?} reached {} participants", target, delivered
    );
    delivered
}

/// Authoritative rename, replicated to everyone.
pub fn assign_name(
    roster: &mut Roster,
    outbox: &mut Outbox,
    conn: ConnectionId,
    name: &str,
) -> Result<(), Rejection> {
    let participant = roster
        .get_mut(conn)
        .ok_or(Rejection::UnknownParticipant(conn.0))?;
    participant.display_name = if name.is_empty() {
        PLACEHOLDER_NAME.to_string()
    } else {
        name.to_string()
    };
    info!(target: logging::ROSTER, "{} is now named {}", conn, participant.display_name);
    outbox.broadcast(ClientNotify::ParticipantUpdated(participant.clone()));
    Ok(())
}

/// `setPlayerName` for the local participant.
pub fn request_set_name(
    role: &NetRole,
    config: &CommsConfig,
    roster: &mut Roster,
    outbox: &mut Outbox,
    name: &str,
) -> Result<Routed, Rejection> {
    match role.dispatch() {
        Dispatch::Forward => {
            if !config.allow_client_to_change_name {
                info!(
                    target: logging::CHAT,
                    "Client attempted to set name; ignoring because client renames are disabled"
                );
                return Err(Rejection::AuthorityViolation("client renames are disabled"));
            }
            outbox.request(ServerRequest::SetPlayerName {
                name: name.to_string(),
            });
            Ok(Routed::Forwarded)
        }
        Dispatch::Local => {
            let conn = role
                .local()
                .ok_or(Rejection::UnknownParticipant(ConnectionId::HOST.0))?;
            assign_name(roster, outbox, conn, name)?;
            Ok(Routed::Local(1))
        }
    }
}

/// Host handling of a forwarded rename.
pub fn handle_set_name_request(
    config: &CommsConfig,
    roster: &mut Roster,
    outbox: &mut Outbox,
    from: ConnectionId,
    name: &str,
) -> Result<(), Rejection> {
    if !config.allow_client_to_change_name {
        return Err(Rejection::AuthorityViolation("client renames are disabled"));
    }
    if is_placeholder_name(name) {
        return Err(Rejection::MissingName);
    }
    assign_name(roster, outbox, from, name)
}

/// Authoritative team change, replicated to everyone.
pub fn assign_team(
    roster: &mut Roster,
    outbox: &mut Outbox,
    conn: ConnectionId,
    team: u8,
) -> Result<TeamIndex, Rejection> {
    let team = TeamIndex::new(team)?;
    let participant = roster
        .get_mut(conn)
        .ok_or(Rejection::UnknownParticipant(conn.0))?;
    participant.team = team;
    info!(
        target: logging::ROSTER,
        "Player {} joined {}", participant.display_name, team
    );
    outbox.broadcast(ClientNotify::ParticipantUpdated(participant.clone()));
    Ok(team)
}

/// Team change for the local participant. Clients may always pick their
/// own team; the host validates the index.
pub fn request_set_team(
    role: &NetRole,
    roster: &mut Roster,
    outbox: &mut Outbox,
    team: u8,
) -> Result<Routed, Rejection> {
    TeamIndex::new(team)?;
    match role.dispatch() {
        Dispatch::Forward => {
            outbox.request(ServerRequest::SetTeam { team });
            Ok(Routed::Forwarded)
        }
        Dispatch::Local => {
            let conn = role
                .local()
                .ok_or(Rejection::UnknownParticipant(ConnectionId::HOST.0))?;
            assign_team(roster, outbox, conn, team)?;
            Ok(Routed::Local(1))
        }
    }
}

/// Dispatch the chat and roster requests a client forwarded. Ping requests
/// are handled by the ping lifecycle and yield `None` here.
pub fn handle_request(
    config: &CommsConfig,
    roster: &mut Roster,
    bans: &BanList,
    outbox: &mut Outbox,
    from: ConnectionId,
    request: &ServerRequest,
) -> Option<Result<usize, Rejection>> {
    let result = match request {
        ServerRequest::SendChat { body, scope } => {
            distribute(config, roster, bans, outbox, from, body, *scope)
        }
        ServerRequest::SetPlayerName { name } => {
            handle_set_name_request(config, roster, outbox, from, name).map(|_| 1)
        }
        ServerRequest::SetTeam { team } => assign_team(roster, outbox, from, *team).map(|_| 1),
        ServerRequest::SpawnPing { .. } | ServerRequest::DestroyPing { .. } => return None,
    };
    Some(result)
}
