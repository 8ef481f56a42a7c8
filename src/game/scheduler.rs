//! Cancellable recurring timers for the coordinator
//!
//! Each started timer gets a fresh ticket. A tick is only honored if its
//! ticket is still the live one for that kind, so ticks already queued when a
//! timer was stopped or cleared are discarded on arrival.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::coordinator::Command;
use super::TimerKind;

struct RunningTimer {
    ticket: u64,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    /// Weak so pending timers never keep the coordinator alive
    commands: mpsc::WeakSender<Command>,
    period: Duration,
    running: HashMap<TimerKind, RunningTimer>,
    next_ticket: u64,
}

impl Scheduler {
    pub fn new(commands: mpsc::WeakSender<Command>, period: Duration) -> Self {
        Self {
            commands,
            period,
            running: HashMap::new(),
            next_ticket: 0,
        }
    }

    /// Start a recurring timer. A timer that is already running keeps its phase.
    pub fn start(&mut self, kind: TimerKind) {
        if self.is_running(kind) {
            return;
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let commands = self.commands.clone();
        let period = self.period;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(tx) = commands.upgrade() else {
                    break;
                };
                if tx.send(Command::Timer { kind, ticket }).await.is_err() {
                    break;
                }
            }
        });

        debug!(?kind, ticket, "Timer started");
        self.running.insert(kind, RunningTimer { ticket, handle });
    }

    pub fn stop(&mut self, kind: TimerKind) {
        if let Some(timer) = self.running.remove(&kind) {
            timer.handle.abort();
            debug!(?kind, ticket = timer.ticket, "Timer stopped");
        }
    }

    /// Abort every running timer
    pub fn clear_all(&mut self) {
        for (kind, timer) in self.running.drain() {
            timer.handle.abort();
            debug!(?kind, ticket = timer.ticket, "Timer cleared");
        }
    }

    pub fn is_running(&self, kind: TimerKind) -> bool {
        self.running.contains_key(&kind)
    }

    /// Whether a fired tick belongs to the live timer of its kind
    pub fn is_current(&self, kind: TimerKind, ticket: u64) -> bool {
        self.running
            .get(&kind)
            .is_some_and(|timer| timer.ticket == ticket)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.clear_all();
    }
}
