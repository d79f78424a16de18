//! Visibility filter shared by chat and pings.
//!
//! The same two predicates run in two places: on every local instance when a
//! notification arrives, and on the host when it picks which connections a
//! marker is replicated to. The host only knows the ping mutes of its own
//! local participant, so relevance there is a superset of what a remote
//! observer finally shows.

use bevy::prelude::*;

use crate::chat::ChatMessage;
use crate::ping::MarkerView;
use crate::roster::{NameSet, TeamIndex};

/// What the filter needs to know about the observing participant.
#[derive(Debug, Clone, Copy)]
pub struct ObserverView<'a> {
    pub team: TeamIndex,
    pub muted: &'a NameSet,
    pub ping_muted: &'a NameSet,
    pub mute_enemies: bool,
}

/// Ban notices always get through. Everything else is dropped if the sender
/// is muted, or if the observer mutes enemies and the sender is on another
/// team (the 255 sentinel is never an enemy).
pub fn chat_visible(message: &ChatMessage, ban_notice: bool, observer: &ObserverView) -> bool {
    if ban_notice {
        return true;
    }
    if observer.muted.contains(&message.sender_name) {
        return false;
    }
    if observer.mute_enemies
        && message.sender_team != observer.team
        && !message.sender_team.is_none()
    {
        return false;
    }
    true
}

pub fn ping_visible(marker: &MarkerView, observer: &ObserverView) -> bool {
    if marker.is_global {
        return true;
    }
    observer.team == marker.team && !observer.ping_muted.contains(&marker.owner_name)
}

/// Mute state of the local participant. Client-authoritative and never
/// replicated.
#[derive(Resource, Debug, Clone, Default)]
pub struct LocalFilters {
    muted: NameSet,
    ping_muted: NameSet,
    mute_enemies: bool,
}

impl LocalFilters {
    pub fn mute_player(&mut self, name: &str) -> bool {
        self.muted.insert(name)
    }

    pub fn unmute_player(&mut self, name: &str) -> bool {
        self.muted.remove(name)
    }

    pub fn muted_players(&self) -> &NameSet {
        &self.muted
    }

    pub fn mute_player_pings(&mut self, name: &str) -> bool {
        self.ping_muted.insert(name)
    }

    pub fn unmute_player_pings(&mut self, name: &str) -> bool {
        self.ping_muted.remove(name)
    }

    pub fn ping_muted_players(&self) -> &NameSet {
        &self.ping_muted
    }

    pub fn set_mute_enemies(&mut self, mute: bool) {
        self.mute_enemies = mute;
    }

    pub fn mute_enemies(&self) -> bool {
        self.mute_enemies
    }

    pub fn observer(&self, team: TeamIndex) -> ObserverView<'_> {
        ObserverView {
            team,
            muted: &self.muted,
            ping_muted: &self.ping_muted,
            mute_enemies: self.mute_enemies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatScope;
    use crate::ping::MarkerId;

    fn team(i: u8) -> TeamIndex {
        TeamIndex::new(i).unwrap()
    }

    fn msg(sender: &str, sender_team: TeamIndex) -> ChatMessage {
        ChatMessage {
            sender_name: sender.into(),
            sender_team,
            body: "hi".into(),
            scope: ChatScope::All,
        }
    }

    fn marker(owner: &str, t: u8, is_global: bool) -> MarkerView {
        MarkerView {
            id: MarkerId(1),
            class_id: "Danger".into(),
            owner_name: owner.into(),
            team: team(t),
            location: [0.0; 3],
            spawn_time: 0.0,
            ttl: 3.0,
            is_global,
        }
    }

    #[test]
    fn test_chat_muted_sender_hidden() {
        let mut filters = LocalFilters::default();
        filters.mute_player("Troll");
        let obs = filters.observer(team(1));
        assert!(!chat_visible(&msg("Troll", team(1)), false, &obs));
        assert!(chat_visible(&msg("Friend", team(1)), false, &obs));
    }

    #[test]
    fn test_chat_mute_enemies() {
        let mut filters = LocalFilters::default();
        filters.set_mute_enemies(true);
        let obs = filters.observer(team(1));
        assert!(!chat_visible(&msg("Enemy", team(2)), false, &obs));
        assert!(chat_visible(&msg("Ally", team(1)), false, &obs));
        // announcements carry the sentinel and are never enemies
        assert!(chat_visible(&msg("Server", TeamIndex::NONE), false, &obs));
    }

    #[test]
    fn test_chat_mute_enemies_off_shows_everyone() {
        let filters = LocalFilters::default();
        let obs = filters.observer(team(1));
        assert!(chat_visible(&msg("Enemy", team(2)), false, &obs));
    }

    #[test]
    fn test_ban_notice_exempt_from_mutes() {
        let mut filters = LocalFilters::default();
        filters.mute_player("Server");
        let obs = filters.observer(team(1));
        let notice = msg("Server", TeamIndex::NONE);
        assert!(chat_visible(&notice, true, &obs));
        assert!(!chat_visible(&notice, false, &obs));
    }

    #[test]
    fn test_ping_team_gate() {
        let filters = LocalFilters::default();
        let obs = filters.observer(team(1));
        assert!(ping_visible(&marker("Ally", 1, false), &obs));
        assert!(!ping_visible(&marker("Enemy", 2, false), &obs));
        assert!(ping_visible(&marker("Enemy", 2, true), &obs));
    }

    #[test]
    fn test_ping_mute_gate() {
        let mut filters = LocalFilters::default();
        filters.mute_player_pings("Spammer");
        let obs = filters.observer(team(1));
        assert!(!ping_visible(&marker("Spammer", 1, false), &obs));
        // global markers ignore ping mutes
        assert!(ping_visible(&marker("Spammer", 1, true), &obs));
    }

    #[test]
    fn test_chat_mute_does_not_hide_pings() {
        let mut filters = LocalFilters::default();
        filters.mute_player("Bob");
        let obs = filters.observer(team(1));
        assert!(ping_visible(&marker("Bob", 1, false), &obs));
    }
}
