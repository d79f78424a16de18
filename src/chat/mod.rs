//! Chat: message types, the host ban list, and the receive side.
//!
//! Routing lives in [`distribution`]. What a receiver finally shows is
//! decided by [`crate::visibility::chat_visible`].

pub mod distribution;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::logging;
use crate::roster::{NameSet, TeamIndex};
use crate::visibility::{chat_visible, ObserverView};

pub use distribution::{
    announce, assign_name, assign_team, distribute, handle_request, request_send,
    request_set_name, request_set_team, AnnouncementTarget, Routed,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatScope {
    /// Sender's team only
    Team,
    /// Every connected participant
    All,
    /// Host-originated, sender team is the 255 sentinel
    Announcement,
}

/// Lives only for one distribution pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender_name: String,
    pub sender_team: TeamIndex,
    pub body: String,
    pub scope: ChatScope,
}

/// Names denied chat and ping for the rest of the session. Host only.
#[derive(Resource, Debug, Clone, Default)]
pub struct BanList {
    names: NameSet,
}

impl BanList {
    pub fn ban(&mut self, name: &str) -> bool {
        let added = self.names.insert(name);
        if added {
            info!(target: logging::CHAT, "Banning {}", name);
        }
        added
    }

    pub fn unban(&mut self, name: &str) -> bool {
        let removed = self.names.remove(name);
        if removed {
            info!(target: logging::CHAT, "Unbanning {}", name);
        }
        removed
    }

    pub fn is_banned(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn banned_players(&self) -> &NameSet {
        &self.names
    }
}

/// Presentation event: a message the local participant should see.
#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub struct ChatMessageReceived {
    pub sender: String,
    pub sender_team: TeamIndex,
    pub receiver_team: TeamIndex,
    pub body: String,
    pub scope: ChatScope,
    pub ban_notice: bool,
}

/// Apply the local filter to a pushed message.
pub fn receive(
    message: &ChatMessage,
    ban_notice: bool,
    observer: &ObserverView,
) -> Option<ChatMessageReceived> {
    if !chat_visible(message, ban_notice, observer) {
        debug!(
            target: logging::CHAT,
            "Dropping message from muted player {}", message.sender_name
        );
        return None;
    }
    Some(ChatMessageReceived {
        sender: message.sender_name.clone(),
        sender_team: message.sender_team,
        receiver_team: observer.team,
        body: message.body.clone(),
        scope: message.scope,
        ban_notice,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visibility::LocalFilters;

    #[test]
    fn test_ban_list_idempotent() {
        let mut bans = BanList::default();
        assert!(bans.ban("Griefer"));
        assert!(!bans.ban("Griefer"));
        assert_eq!(bans.banned_players().len(), 1);
        assert!(bans.is_banned("Griefer"));
        assert!(bans.unban("Griefer"));
        assert!(!bans.unban("Griefer"));
        assert!(!bans.is_banned("Griefer"));
    }

    #[test]
    fn test_receive_reports_both_teams() {
        let filters = LocalFilters::default();
        let team1 = TeamIndex::new(1).unwrap();
        let message = ChatMessage {
            sender_name: "Alice".into(),
            sender_team: TeamIndex::new(2).unwrap(),
            body: "gg".into(),
            scope: ChatScope::All,
        };
        let received = receive(&message, false, &filters.observer(team1)).unwrap();
        assert_eq!(received.sender, "Alice");
        assert_eq!(received.sender_team.get(), 2);
        assert_eq!(received.receiver_team, team1);
        assert!(!received.ban_notice);
    }

    #[test]
    fn test_receive_drops_muted() {
        let mut filters = LocalFilters::default();
        filters.mute_player("Alice");
        let message = ChatMessage {
            sender_name: "Alice".into(),
            sender_team: TeamIndex::NONE,
            body: "spam".into(),
            scope: ChatScope::All,
        };
        assert!(receive(&message, false, &filters.observer(TeamIndex::NONE)).is_none());
    }
}
