//! Match coordinator - single-writer task owning the match
//!
//! Client events, disconnects and timer ticks all arrive on one channel and
//! are handled to completion in order, so match state needs no lock.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::MatchSettings;
use crate::ws::hub::ConnectionHub;
use crate::ws::protocol::{ClientMsg, ConnId, ServerMsg};

use super::Match;
use super::scheduler::Scheduler;
use super::{Effects, TimerCommand, TimerKind};

const COMMAND_BUFFER: usize = 1024;
const TIMER_PERIOD: Duration = Duration::from_secs(1);

/// Inputs to the coordinator
pub enum Command {
    Client { conn_id: ConnId, msg: ClientMsg },
    Disconnected { conn_id: ConnId },
    Timer { kind: TimerKind, ticket: u64 },
    Status { reply: oneshot::Sender<MatchSummary> },
    Shutdown,
}

/// Public snapshot for the health endpoint. Contains no roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub phase: &'static str,
    pub players: usize,
    pub connections: usize,
}

/// Cheap handle for sending commands to the coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    /// Forward a client event. Returns false once the coordinator has stopped.
    pub async fn client_event(&self, conn_id: ConnId, msg: ClientMsg) -> bool {
        self.tx
            .send(Command::Client { conn_id, msg })
            .await
            .is_ok()
    }

    pub async fn disconnected(&self, conn_id: ConnId) {
        if self
            .tx
            .send(Command::Disconnected { conn_id })
            .await
            .is_err()
        {
            debug!(conn_id = %conn_id, "Coordinator gone, disconnect not delivered");
        }
    }

    pub async fn status(&self) -> Option<MatchSummary> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Status { reply }).await.ok()?;
        rx.await.ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }

    /// Handle backed by a bare channel, for observing what callers send
    #[cfg(test)]
    pub fn detached(capacity: usize) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

pub struct Coordinator {
    game: Match,
    hub: ConnectionHub,
    scheduler: Scheduler,
    rx: mpsc::Receiver<Command>,
}

impl Coordinator {
    pub fn new(settings: MatchSettings, hub: ConnectionHub) -> (Self, CoordinatorHandle) {
        Self::with_match(Match::new(settings), hub)
    }

    pub fn with_match(game: Match, hub: ConnectionHub) -> (Self, CoordinatorHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let coordinator = Self {
            game,
            hub,
            scheduler: Scheduler::new(tx.downgrade(), TIMER_PERIOD),
            rx,
        };
        (coordinator, CoordinatorHandle { tx })
    }

    /// Process commands until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!(
            min_players = self.game.settings().min_players,
            max_players = self.game.settings().max_players,
            "Match coordinator started"
        );

        while let Some(command) = self.rx.recv().await {
            let now = Instant::now();
            let effects = match command {
                Command::Client { conn_id, msg } => {
                    debug!(conn_id = %conn_id, event = msg.name(), "Client event");
                    self.game.handle(conn_id, msg, now)
                }
                Command::Disconnected { conn_id } => self.game.disconnect(conn_id),
                Command::Timer { kind, ticket } => {
                    if !self.scheduler.is_current(kind, ticket) {
                        debug!(?kind, ticket, "Discarding stale timer tick");
                        continue;
                    }
                    match kind {
                        TimerKind::CountdownTick => self.game.countdown_tick(),
                        TimerKind::EliminationCheck => self.game.elimination_check(now),
                    }
                }
                Command::Status { reply } => {
                    let _ = reply.send(self.summary());
                    continue;
                }
                Command::Shutdown => break,
            };
            self.apply(effects);
        }

        if !self.hub.is_empty() {
            info!(connections = self.hub.len(), "Stopping with open connections");
        }
        let effects = self.game.reset();
        self.apply(effects);
        info!("Match coordinator stopped");
    }

    fn summary(&self) -> MatchSummary {
        MatchSummary {
            phase: self.game.phase_name(),
            players: self.game.participants().len(),
            connections: self.hub.len(),
        }
    }

    fn apply(&mut self, effects: Effects) {
        if effects.is_empty() {
            return;
        }

        for envelope in effects.messages {
            self.hub.deliver(envelope);
        }

        for command in effects.timers {
            match command {
                TimerCommand::Start(kind) => self.scheduler.start(kind),
                TimerCommand::Stop(kind) => self.scheduler.stop(kind),
                TimerCommand::ReturnToLobby { conn_id, after } => {
                    self.schedule_return_to_lobby(conn_id, after)
                }
                TimerCommand::ClearAll => self.scheduler.clear_all(),
            }
        }
    }

    fn schedule_return_to_lobby(&self, conn_id: ConnId, after: Duration) {
        let hub = self.hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if !hub.send_to(conn_id, ServerMsg::ReturnToLobby) {
                warn!(conn_id = %conn_id, "Return to lobby not delivered");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use uuid::Uuid;

    use super::*;
    use crate::ws::protocol::WinKind;

    struct Harness {
        hub: ConnectionHub,
        handle: CoordinatorHandle,
        task: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        fn start() -> Self {
            let hub = ConnectionHub::new();
            let game = Match::with_rng(MatchSettings::default(), ChaCha8Rng::seed_from_u64(11));
            let (coordinator, handle) = Coordinator::with_match(game, hub.clone());
            let task = tokio::spawn(coordinator.run());
            Self { hub, handle, task }
        }

        async fn connect(&self, names: &[&str]) -> Vec<(ConnId, mpsc::Receiver<ServerMsg>)> {
            let mut clients = Vec::new();
            for name in names {
                let id = Uuid::new_v4();
                let rx = self.hub.register(id);
                self.handle
                    .client_event(id, ClientMsg::JoinGame(name.to_string()))
                    .await;
                clients.push((id, rx));
            }
            clients
        }

        async fn stop(self) {
            self.handle.shutdown().await;
            self.task.await.unwrap();
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn was_told_killer(msgs: &[ServerMsg]) -> bool {
        msgs.iter()
            .any(|m| matches!(m, ServerMsg::GameJoined { is_killer: true, .. }))
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_runs_to_match_start() {
        let harness = Harness::start();
        let mut clients = harness.connect(&["A", "B", "C"]).await;

        tokio::time::sleep(Duration::from_millis(10_500)).await;

        let inboxes: Vec<Vec<ServerMsg>> = clients.iter_mut().map(|(_, rx)| drain(rx)).collect();
        for msgs in &inboxes {
            assert!(msgs.contains(&ServerMsg::CountdownStarted(10)));
            let updates: Vec<u32> = msgs
                .iter()
                .filter_map(|m| match m {
                    ServerMsg::CountdownUpdate(n) => Some(*n),
                    _ => None,
                })
                .collect();
            assert_eq!(updates, (0..10).rev().collect::<Vec<_>>());
            assert!(msgs.contains(&ServerMsg::GameStarting));
        }
        assert_eq!(inboxes.iter().filter(|m| was_told_killer(m)).count(), 1);

        let status = harness.handle.status().await.unwrap();
        assert_eq!(status.phase, "active");
        assert_eq!(status.players, 3);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_countdown_does_not_leak_ticks() {
        let harness = Harness::start();
        let mut clients = harness.connect(&["A", "B", "C"]).await;

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let (leaver, _) = clients.pop().unwrap();
        harness.hub.unregister(leaver);
        harness.handle.disconnected(leaver).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (_, rx) = &mut clients[0];
        assert!(drain(rx).contains(&ServerMsg::CountdownCancelled));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(drain(rx).is_empty());

        let mut newcomer = harness.connect(&["D"]).await;
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        let msgs = drain(&mut newcomer[0].1);
        let updates: Vec<u32> = msgs
            .iter()
            .filter_map(|m| match m {
                ServerMsg::CountdownUpdate(n) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(updates, (0..10).rev().collect::<Vec<_>>());
        assert!(msgs.contains(&ServerMsg::GameStarting));
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn killer_cooldown_elimination_and_return_to_lobby() {
        let harness = Harness::start();
        let mut clients = harness.connect(&["A", "B", "C", "D"]).await;
        tokio::time::sleep(Duration::from_millis(10_500)).await;

        let mut killer = None;
        for (id, rx) in clients.iter_mut() {
            if was_told_killer(&drain(rx)) {
                killer = Some(*id);
            }
        }
        let killer = killer.expect("one killer assigned");
        let spy = clients.iter().map(|(id, _)| *id).find(|id| *id != killer).unwrap();

        harness
            .handle
            .client_event(killer, ClientMsg::RequestTimerStatus)
            .await;
        // Not ready yet: elimination is ignored
        harness
            .handle
            .client_event(killer, ClientMsg::KillerEliminate(spy))
            .await;
        tokio::time::sleep(Duration::from_secs(61)).await;

        let killer_rx = &mut clients.iter_mut().find(|(id, _)| *id == killer).unwrap().1;
        let msgs = drain(killer_rx);
        assert!(matches!(
            msgs[0],
            ServerMsg::TimerStatus {
                minutes: 1,
                seconds: 0,
                can_eliminate: false
            }
        ));
        assert!(msgs.contains(&ServerMsg::EliminationReady));
        assert!(!msgs
            .iter()
            .any(|m| matches!(m, ServerMsg::PlayerEliminated(_))));

        harness
            .handle
            .client_event(killer, ClientMsg::KillerEliminate(spy))
            .await;
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        let spy_rx = &mut clients.iter_mut().find(|(id, _)| *id == spy).unwrap().1;
        let msgs = drain(spy_rx);
        assert!(matches!(msgs[0], ServerMsg::PlayerEliminatedMessage(_)));
        assert!(msgs.contains(&ServerMsg::PlayerEliminated(spy)));
        assert_eq!(msgs.last(), Some(&ServerMsg::ReturnToLobby));

        let killer_rx = &mut clients.iter_mut().find(|(id, _)| *id == killer).unwrap().1;
        assert!(drain(killer_rx).contains(&ServerMsg::EliminationUsed));
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn killer_disconnect_resets_and_silences_timers() {
        let harness = Harness::start();
        let mut clients = harness.connect(&["A", "B", "C", "D"]).await;
        tokio::time::sleep(Duration::from_millis(10_500)).await;

        let mut killer = None;
        for (id, rx) in clients.iter_mut() {
            if was_told_killer(&drain(rx)) {
                killer = Some(*id);
            }
        }
        let killer = killer.unwrap();
        harness
            .handle
            .client_event(killer, ClientMsg::RequestTimerStatus)
            .await;
        harness.hub.unregister(killer);
        harness.handle.disconnected(killer).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let (_, rx) = clients.iter_mut().find(|(id, _)| *id != killer).unwrap();
        let msgs = drain(rx);
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMsg::GameWon {
                kind: WinKind::Spy,
                ..
            }
        )));

        // Nothing scheduled survives the reset
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(drain(rx).is_empty());

        let status = harness.handle.status().await.unwrap();
        assert_eq!(status.phase, "lobby");
        assert_eq!(status.players, 0);
        harness.stop().await;
    }

    #[tokio::test]
    async fn stops_when_handles_drop() {
        let hub = ConnectionHub::new();
        let (coordinator, handle) = Coordinator::new(MatchSettings::default(), hub);
        let task = tokio::spawn(coordinator.run());
        drop(handle);
        task.await.unwrap();
    }
}
