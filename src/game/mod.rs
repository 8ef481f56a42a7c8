//! Match coordination modules

pub mod clues;
pub mod coordinator;
pub mod elimination;
pub mod r#match;
pub mod scheduler;

pub use coordinator::{Coordinator, CoordinatorHandle};
pub use r#match::Match;

use std::time::Duration;

use crate::ws::protocol::{ConnId, ServerMsg};

/// Addressing for an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    One(ConnId),
    All,
    AllExcept(ConnId),
}

/// A message and who should receive it
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub to: Recipient,
    pub msg: ServerMsg,
}

/// Recurring 1 Hz timers owned by the match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    CountdownTick,
    EliminationCheck,
}

/// Scheduler instructions emitted by match handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerCommand {
    Start(TimerKind),
    Stop(TimerKind),
    /// One-shot private notice to an eliminated participant. Connection scoped,
    /// so it survives a match reset.
    ReturnToLobby { conn_id: ConnId, after: Duration },
    /// Cancel every match-scoped timer
    ClearAll,
}

/// Everything a handler wants done, applied in order by the coordinator
#[derive(Debug, Default)]
pub struct Effects {
    pub messages: Vec<Envelope>,
    pub timers: Vec<TimerCommand>,
}

impl Effects {
    pub fn to_one(&mut self, conn_id: ConnId, msg: ServerMsg) {
        self.messages.push(Envelope {
            to: Recipient::One(conn_id),
            msg,
        });
    }

    pub fn broadcast(&mut self, msg: ServerMsg) {
        self.messages.push(Envelope {
            to: Recipient::All,
            msg,
        });
    }

    pub fn broadcast_except(&mut self, sender: ConnId, msg: ServerMsg) {
        self.messages.push(Envelope {
            to: Recipient::AllExcept(sender),
            msg,
        });
    }

    pub fn timer(&mut self, command: TimerCommand) {
        self.timers.push(command);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.timers.is_empty()
    }
}
