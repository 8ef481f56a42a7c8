//! Elimination gate - when the killer is allowed to strike
//!
//! `Locked` until the killer first asks for the timer, then alternates between
//! `CountingDown` and `Ready` for the rest of the match.

use std::time::Duration;

use tokio::time::Instant;

use crate::util::time::minutes_seconds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EliminationGate {
    /// Match started, cooldown clock not running yet
    Locked,
    /// Cooldown running
    CountingDown { ready_at: Instant },
    /// Killer may eliminate once
    Ready,
}

/// Cooldown readout sent to the killer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerReadout {
    pub minutes: u64,
    pub seconds: u64,
    pub can_eliminate: bool,
}

impl EliminationGate {
    pub fn can_eliminate(&self) -> bool {
        matches!(self, EliminationGate::Ready)
    }

    /// Start the cooldown on first use. Returns true if the clock was started.
    pub fn arm(&mut self, now: Instant, cooldown: Duration) -> bool {
        if *self == EliminationGate::Locked {
            *self = EliminationGate::CountingDown {
                ready_at: now + cooldown,
            };
            true
        } else {
            false
        }
    }

    /// Move to `Ready` once the cooldown has elapsed. Returns true on the transition.
    pub fn poll(&mut self, now: Instant) -> bool {
        match *self {
            EliminationGate::CountingDown { ready_at } if now >= ready_at => {
                *self = EliminationGate::Ready;
                true
            }
            _ => false,
        }
    }

    /// Spend the ready state and restart the cooldown. Returns false if not ready.
    pub fn consume(&mut self, now: Instant, cooldown: Duration) -> bool {
        if self.can_eliminate() {
            *self = EliminationGate::CountingDown {
                ready_at: now + cooldown,
            };
            true
        } else {
            false
        }
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        match *self {
            EliminationGate::CountingDown { ready_at } => ready_at.saturating_duration_since(now),
            EliminationGate::Locked | EliminationGate::Ready => Duration::ZERO,
        }
    }

    pub fn readout(&self, now: Instant) -> TimerReadout {
        let (minutes, seconds) = minutes_seconds(self.remaining(now));
        TimerReadout {
            minutes,
            seconds,
            can_eliminate: self.can_eliminate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(60);

    #[test]
    fn arms_only_from_locked() {
        let now = Instant::now();
        let mut gate = EliminationGate::Locked;
        assert!(gate.arm(now, COOLDOWN));
        assert_eq!(
            gate,
            EliminationGate::CountingDown {
                ready_at: now + COOLDOWN
            }
        );
        // A second poll must not push the deadline back
        assert!(!gate.arm(now + Duration::from_secs(5), COOLDOWN));
        assert_eq!(gate.remaining(now + Duration::from_secs(5)), Duration::from_secs(55));
    }

    #[test]
    fn becomes_ready_exactly_at_deadline() {
        let now = Instant::now();
        let mut gate = EliminationGate::Locked;
        gate.arm(now, COOLDOWN);

        assert!(!gate.poll(now + Duration::from_millis(59_999)));
        assert!(!gate.can_eliminate());
        assert!(gate.poll(now + COOLDOWN));
        assert!(gate.can_eliminate());
        // Already ready, no second transition
        assert!(!gate.poll(now + COOLDOWN * 2));
    }

    #[test]
    fn locked_gate_never_becomes_ready_on_its_own() {
        let now = Instant::now();
        let mut gate = EliminationGate::Locked;
        assert!(!gate.poll(now + Duration::from_secs(3600)));
        assert!(!gate.can_eliminate());
    }

    #[test]
    fn consume_rearms_cooldown() {
        let now = Instant::now();
        let mut gate = EliminationGate::Ready;
        assert!(gate.consume(now, COOLDOWN));
        assert!(!gate.can_eliminate());
        assert!(!gate.consume(now, COOLDOWN));
        assert_eq!(gate.remaining(now), COOLDOWN);
    }

    #[test]
    fn readout_splits_minutes_and_seconds() {
        let now = Instant::now();
        let gate = EliminationGate::CountingDown {
            ready_at: now + Duration::from_millis(61_500),
        };
        assert_eq!(
            gate.readout(now),
            TimerReadout {
                minutes: 1,
                seconds: 1,
                can_eliminate: false
            }
        );
        assert_eq!(
            EliminationGate::Ready.readout(now),
            TimerReadout {
                minutes: 0,
                seconds: 0,
                can_eliminate: true
            }
        );
    }
}
