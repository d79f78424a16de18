use bevy::prelude::*;
use std::collections::HashMap;

use crate::error::Rejection;
use crate::roster::ConnectionId;

/// Per-participant ping cooldown timers, counted down once per tick.
///
/// Clients keep one for themselves; the host keeps one per requester so a
/// modified client cannot flood it.
#[derive(Resource, Debug, Default)]
pub struct PingCooldowns {
    timers: HashMap<ConnectionId, f32>,
}

impl PingCooldowns {
    pub fn tick(&mut self, dt: f32) {
        for timer in self.timers.values_mut() {
            *timer = (*timer - dt).max(0.0);
        }
    }

    pub fn remaining(&self, conn: ConnectionId) -> f32 {
        self.timers.get(&conn).copied().unwrap_or(0.0)
    }

    /// Rejected requests leave the timer untouched.
    pub fn try_consume(&mut self, conn: ConnectionId, cooldown: f32) -> Result<(), Rejection> {
        let timer = self.timers.entry(conn).or_insert(0.0);
        if *timer > 0.0 {
            return Err(Rejection::RateLimited);
        }
        *timer = cooldown;
        Ok(())
    }

    pub fn forget(&mut self, conn: ConnectionId) {
        self.timers.remove(&conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ME: ConnectionId = ConnectionId(1);

    #[test]
    fn test_first_request_allowed() {
        let mut cd = PingCooldowns::default();
        assert!(cd.try_consume(ME, 0.2).is_ok());
        assert!((cd.remaining(ME) - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_second_request_within_cooldown_rejected() {
        let mut cd = PingCooldowns::default();
        cd.try_consume(ME, 0.2).unwrap();
        cd.tick(0.1);
        assert_eq!(cd.try_consume(ME, 0.2), Err(Rejection::RateLimited));
        // rejection does not reset the timer
        assert!((cd.remaining(ME) - 0.1).abs() < 1e-6);
        cd.tick(0.1);
        assert!(cd.try_consume(ME, 0.2).is_ok());
    }

    #[test]
    fn test_timers_are_per_participant() {
        let mut cd = PingCooldowns::default();
        cd.try_consume(ME, 0.2).unwrap();
        assert!(cd.try_consume(ConnectionId(2), 0.2).is_ok());
    }

    #[test]
    fn test_zero_cooldown_never_limits() {
        let mut cd = PingCooldowns::default();
        for _ in 0..5 {
            assert!(cd.try_consume(ME, 0.0).is_ok());
        }
    }

    #[test]
    fn test_forget() {
        let mut cd = PingCooldowns::default();
        cd.try_consume(ME, 5.0).unwrap();
        cd.forget(ME);
        assert_eq!(cd.remaining(ME), 0.0);
    }
}
