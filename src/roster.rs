//! Roster / identity resolution.
//!
//! The session layer (whatever owns connections) reports joins and leaves
//! through [`ParticipantJoined`] / [`ParticipantLeft`]. The host keeps the
//! authoritative [`Roster`]; clients keep a mirror fed by
//! `ClientNotify::RosterSnapshot` and `ClientNotify::ParticipantUpdated`.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Rejection;

/// Name a participant has until the session layer or the host assigns one.
pub const PLACEHOLDER_NAME: &str = "None";

/// Connection handle; the same number as the replicon client id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// The host process itself (replicon's server client)
    pub const HOST: ConnectionId = ConnectionId(0);
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Team assignment: 1-254 is a team, 255 is "no team" and doubles as the
/// broadcast sentinel on announcements. 0 is never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct TeamIndex(u8);

impl TeamIndex {
    pub const NONE: TeamIndex = TeamIndex(255);

    pub fn new(index: u8) -> Result<Self, Rejection> {
        if index == 0 {
            return Err(Rejection::InvalidTeam(index));
        }
        Ok(Self(index))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl Default for TeamIndex {
    fn default() -> Self {
        Self::NONE
    }
}

impl TryFrom<u8> for TeamIndex {
    type Error = Rejection;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        TeamIndex::new(value)
    }
}

impl From<TeamIndex> for u8 {
    fn from(team: TeamIndex) -> Self {
        team.0
    }
}

impl fmt::Display for TeamIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "no-team")
        } else {
            write!(f, "team {}", self.0)
        }
    }
}

/// True for the empty string and the placeholder name.
pub fn is_placeholder_name(name: &str) -> bool {
    name.is_empty() || name == PLACEHOLDER_NAME
}

/// Ordered set of display names. Insertion order is kept so lists shown to
/// the player do not reshuffle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameSet(Vec<String>);

impl NameSet {
    /// Returns false if the name was already present.
    pub fn insert(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.0.push(name.to_string());
        true
    }

    /// Returns false if the name was absent.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|n| n != name);
        self.0.len() < before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub conn: ConnectionId,
    pub display_name: String,
    pub team: TeamIndex,
}

impl Participant {
    pub fn new(conn: ConnectionId, display_name: impl Into<String>, team: TeamIndex) -> Self {
        let display_name = display_name.into();
        Self {
            conn,
            display_name: if display_name.is_empty() {
                PLACEHOLDER_NAME.to_string()
            } else {
                display_name
            },
            team,
        }
    }

    pub fn has_name(&self) -> bool {
        !is_placeholder_name(&self.display_name)
    }
}

/// Connected participants in join order. Exactly one entry per connection.
#[derive(Resource, Debug, Clone, Default)]
pub struct Roster {
    participants: Vec<Participant>,
}

impl Roster {
    /// Insert or replace the record for `participant.conn`.
    pub fn upsert(&mut self, participant: Participant) {
        match self
            .participants
            .iter_mut()
            .find(|p| p.conn == participant.conn)
        {
            Some(existing) => *existing = participant,
            None => self.participants.push(participant),
        }
    }

    pub fn remove(&mut self, conn: ConnectionId) -> Option<Participant> {
        let idx = self.participants.iter().position(|p| p.conn == conn)?;
        Some(self.participants.remove(idx))
    }

    pub fn get(&self, conn: ConnectionId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.conn == conn)
    }

    pub fn get_mut(&mut self, conn: ConnectionId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.conn == conn)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.display_name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn replace_all(&mut self, participants: Vec<Participant>) {
        self.participants = participants;
    }

    pub fn snapshot(&self) -> Vec<Participant> {
        self.participants.clone()
    }
}

/// Reported by the session layer on the host when a player connects.
#[derive(Event, Debug, Clone)]
pub struct ParticipantJoined {
    pub conn: ConnectionId,
    pub name: String,
    pub team: TeamIndex,
}

/// Reported by the session layer on the host when a player disconnects.
#[derive(Event, Debug, Clone)]
pub struct ParticipantLeft {
    pub conn: ConnectionId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: u64, name: &str, team: u8) -> Participant {
        Participant::new(ConnectionId(id), name, TeamIndex::new(team).unwrap())
    }

    #[test]
    fn test_team_index_range() {
        assert!(TeamIndex::new(0).is_err());
        assert_eq!(TeamIndex::new(1).unwrap().get(), 1);
        assert_eq!(TeamIndex::new(254).unwrap().get(), 254);
        assert!(TeamIndex::new(255).unwrap().is_none());
        assert_eq!(TeamIndex::default(), TeamIndex::NONE);
    }

    #[test]
    fn test_team_index_deserialize_rejects_zero() {
        assert!(serde_json::from_str::<TeamIndex>("0").is_err());
        let team: TeamIndex = serde_json::from_str("7").unwrap();
        assert_eq!(team.get(), 7);
        assert_eq!(serde_json::to_string(&team).unwrap(), "7");
    }

    #[test]
    fn test_placeholder_names() {
        assert!(is_placeholder_name(""));
        assert!(is_placeholder_name("None"));
        assert!(!is_placeholder_name("Alice"));
        let anon = Participant::new(ConnectionId(1), "", TeamIndex::NONE);
        assert_eq!(anon.display_name, PLACEHOLDER_NAME);
        assert!(!anon.has_name());
    }

    #[test]
    fn test_name_set_idempotent() {
        let mut set = NameSet::default();
        assert!(set.insert("Bob"));
        assert!(!set.insert("Bob"));
        assert_eq!(set.len(), 1);
        assert!(!set.remove("Carol"));
        assert_eq!(set.len(), 1);
        assert!(set.remove("Bob"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_name_set_keeps_order() {
        let mut set = NameSet::default();
        set.insert("b");
        set.insert("a");
        set.insert("c");
        assert_eq!(set.as_slice(), &["b", "a", "c"]);
    }

    #[test]
    fn test_roster_upsert_and_order() {
        let mut roster = Roster::default();
        roster.upsert(p(1, "Alice", 1));
        roster.upsert(p(2, "Bob", 2));
        roster.upsert(p(1, "Alice2", 3));
        assert_eq!(roster.len(), 2);
        let names: Vec<_> = roster.iter().map(|p| p.display_name.as_str()).collect();
        assert_eq!(names, vec!["Alice2", "Bob"]);
        assert_eq!(roster.get(ConnectionId(1)).unwrap().team.get(), 3);
    }

    #[test]
    fn test_roster_remove_and_lookup() {
        let mut roster = Roster::default();
        roster.upsert(p(1, "Alice", 1));
        roster.upsert(p(2, "Bob", 2));
        assert_eq!(roster.find_by_name("Bob").unwrap().conn, ConnectionId(2));
        assert!(roster.remove(ConnectionId(2)).is_some());
        assert!(roster.remove(ConnectionId(2)).is_none());
        assert!(roster.find_by_name("Bob").is_none());
    }
}
