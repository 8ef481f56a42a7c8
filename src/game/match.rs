//! Match state and authoritative event handlers
//!
//! `Match` is plain data plus synchronous handlers. Each handler takes the
//! current time where it matters and returns the [`Effects`] to apply; it
//! never touches the network or spawns timers itself. Failed authorization
//! and precondition checks produce no effects at all so response timing
//! cannot reveal who the killer is.

use std::collections::BTreeSet;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::MatchSettings;
use crate::ws::protocol::{ClientMsg, ConnId, PlayerPublic, ServerMsg, Vec3, WinKind};

use super::clues;
use super::elimination::EliminationGate;
use super::{Effects, TimerCommand, TimerKind};

const ELIMINATED_NOTICE: &str = "You have been eliminated! Returning to lobby...";

/// Match phase. Killer identity and the elimination gate only exist while
/// the match is active, so neither can leak into the lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for players
    Lobby,
    /// Countdown before start
    Countdown { remaining: u32 },
    /// Match in progress
    Active(ActiveState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveState {
    pub killer_id: ConnId,
    pub gate: EliminationGate,
}

/// A connected group (authoritative)
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: ConnId,
    pub name: String,
    pub eliminated: bool,
    /// Last client-reported position, relayed as-is
    pub position: Vec3,
    pub solved_clues: BTreeSet<u32>,
}

impl Participant {
    fn new(id: ConnId, name: String) -> Self {
        Self {
            id,
            name,
            eliminated: false,
            position: Vec3::default(),
            solved_clues: BTreeSet::new(),
        }
    }

    fn public(&self) -> PlayerPublic {
        PlayerPublic {
            id: self.id,
            name: self.name.clone(),
            eliminated: self.eliminated,
            position: self.position,
        }
    }
}

/// Why a join request was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Game already in progress. Please wait for the current game to finish.")]
    InProgress,

    #[error("Game is full")]
    Full,

    #[error("Display name must be between 1 and {0} characters")]
    InvalidName(usize),

    #[error("Already joined the game")]
    AlreadyJoined,
}

impl JoinError {
    fn into_msg(self) -> ServerMsg {
        match self {
            JoinError::InProgress | JoinError::Full => ServerMsg::GameFull(self.to_string()),
            JoinError::InvalidName(_) => ServerMsg::Error {
                code: "invalid_name".to_string(),
                message: self.to_string(),
            },
            JoinError::AlreadyJoined => ServerMsg::Error {
                code: "already_joined".to_string(),
                message: self.to_string(),
            },
        }
    }
}

/// The single process-wide match
pub struct Match {
    settings: MatchSettings,
    /// Join order
    groups: Vec<Participant>,
    phase: Phase,
    rng: ChaCha8Rng,
}

impl Match {
    pub fn new(settings: MatchSettings) -> Self {
        Self::with_rng(settings, ChaCha8Rng::from_entropy())
    }

    pub fn with_rng(settings: MatchSettings, rng: ChaCha8Rng) -> Self {
        Self {
            settings,
            groups: Vec::new(),
            phase: Phase::Lobby,
            rng,
        }
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    pub fn phase_name(&self) -> &'static str {
        match self.phase {
            Phase::Lobby => "lobby",
            Phase::Countdown { .. } => "countdown",
            Phase::Active(_) => "active",
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self.phase, Phase::Active(_))
    }

    pub fn participants(&self) -> &[Participant] {
        &self.groups
    }

    pub fn participant(&self, id: ConnId) -> Option<&Participant> {
        self.groups.iter().find(|p| p.id == id)
    }

    pub fn killer_id(&self) -> Option<ConnId> {
        match &self.phase {
            Phase::Active(active) => Some(active.killer_id),
            _ => None,
        }
    }

    pub fn is_killer(&self, id: ConnId) -> bool {
        self.killer_id() == Some(id)
    }

    /// Route a validated client event to its handler
    pub fn handle(&mut self, conn_id: ConnId, msg: ClientMsg, now: Instant) -> Effects {
        match msg {
            ClientMsg::JoinGame(name) => self.join(conn_id, &name),
            ClientMsg::PlayerMove(position) => self.player_move(conn_id, position),
            ClientMsg::InteractClue(clue_id) => self.interact_clue(conn_id, clue_id),
            ClientMsg::SolveClue { clue_id, solution } => {
                self.solve_clue(conn_id, clue_id, &solution)
            }
            ClientMsg::KillerEliminate(target_id) => self.eliminate(conn_id, target_id, now),
            ClientMsg::RequestTimerStatus => self.timer_status(conn_id, now),
            ClientMsg::DoorStateChange {
                door_name,
                is_open,
                position,
            } => self.door_state_change(conn_id, door_name, is_open, position),
            ClientMsg::FlashlightToggle {
                is_on,
                position,
                direction,
            } => self.flashlight_toggle(conn_id, is_on, position, direction),
            ClientMsg::FlashlightUpdate {
                position,
                direction,
                is_on,
            } => self.flashlight_update(conn_id, position, direction, is_on),
        }
    }

    pub fn join(&mut self, conn_id: ConnId, name: &str) -> Effects {
        let mut effects = Effects::default();

        let name = match self.admit(conn_id, name) {
            Ok(name) => name,
            Err(e) => {
                info!(conn_id = %conn_id, reason = %e, "Join refused");
                effects.to_one(conn_id, e.into_msg());
                return effects;
            }
        };

        info!(
            conn_id = %conn_id,
            player = %name,
            player_count = self.groups.len() + 1,
            "Player joined lobby"
        );
        self.groups.push(Participant::new(conn_id, name));
        effects.broadcast(self.waiting_room_update());

        if self.phase == Phase::Lobby && self.groups.len() >= self.settings.min_players {
            self.begin_countdown(&mut effects);
        }

        effects
    }

    fn admit(&self, conn_id: ConnId, name: &str) -> Result<String, JoinError> {
        if self.is_started() {
            return Err(JoinError::InProgress);
        }
        if self.participant(conn_id).is_some() {
            return Err(JoinError::AlreadyJoined);
        }

        let name = name.trim();
        let max_len = self.settings.max_name_len;
        if name.is_empty() || name.chars().count() > max_len {
            return Err(JoinError::InvalidName(max_len));
        }

        if self.groups.len() >= self.settings.max_players {
            return Err(JoinError::Full);
        }

        Ok(name.to_string())
    }

    fn waiting_room_update(&self) -> ServerMsg {
        ServerMsg::WaitingRoomUpdate {
            players: self.groups.iter().map(|p| p.name.clone()).collect(),
            players_needed: self.settings.min_players.saturating_sub(self.groups.len()),
        }
    }

    fn roster(&self) -> Vec<PlayerPublic> {
        self.groups.iter().map(Participant::public).collect()
    }

    fn begin_countdown(&mut self, effects: &mut Effects) {
        let seconds = self.settings.countdown_secs;
        if seconds == 0 {
            self.start_match(effects);
            return;
        }

        info!(seconds, "Countdown started");
        self.phase = Phase::Countdown { remaining: seconds };
        effects.broadcast(ServerMsg::CountdownStarted(seconds));
        effects.timer(TimerCommand::Start(TimerKind::CountdownTick));
    }

    /// One second of countdown elapsed
    pub fn countdown_tick(&mut self) -> Effects {
        let mut effects = Effects::default();

        let Phase::Countdown { remaining } = &mut self.phase else {
            effects.timer(TimerCommand::Stop(TimerKind::CountdownTick));
            return effects;
        };

        *remaining = remaining.saturating_sub(1);
        let left = *remaining;
        effects.broadcast(ServerMsg::CountdownUpdate(left));

        if left == 0 {
            effects.timer(TimerCommand::Stop(TimerKind::CountdownTick));
            if self.groups.len() >= self.settings.min_players {
                self.start_match(&mut effects);
            } else {
                info!(
                    player_count = self.groups.len(),
                    "Not enough players to start match"
                );
                self.phase = Phase::Lobby;
            }
        }

        effects
    }

    fn start_match(&mut self, effects: &mut Effects) {
        if self.groups.is_empty() {
            self.phase = Phase::Lobby;
            return;
        }

        let killer_index = self.rng.gen_range(0..self.groups.len());
        let killer_id = self.groups[killer_index].id;
        self.phase = Phase::Active(ActiveState {
            killer_id,
            gate: EliminationGate::Locked,
        });

        let cipher_key = clues::cipher_key();
        for group in &self.groups {
            effects.to_one(
                group.id,
                ServerMsg::GameJoined {
                    is_killer: group.id == killer_id,
                    group_id: group.id,
                    cipher_key: cipher_key.clone(),
                },
            );
        }

        effects.broadcast(ServerMsg::UpdatePlayers(self.roster()));
        effects.broadcast(ServerMsg::GameStarting);

        info!(player_count = self.groups.len(), "Match started");
        debug!(killer_id = %killer_id, "Killer assigned");
    }

    /// Killer-only cooldown poll. The first poll starts the cooldown clock.
    pub fn timer_status(&mut self, conn_id: ConnId, now: Instant) -> Effects {
        let mut effects = Effects::default();
        let cooldown = self.settings.elimination_cooldown;

        let Phase::Active(active) = &mut self.phase else {
            debug!(conn_id = %conn_id, "Timer status requested before match start");
            return effects;
        };
        if conn_id != active.killer_id {
            debug!(conn_id = %conn_id, "Ignoring timer status request");
            return effects;
        }

        if active.gate.arm(now, cooldown) {
            info!("Elimination cooldown started");
            effects.timer(TimerCommand::Start(TimerKind::EliminationCheck));
        }
        if active.gate.poll(now) {
            effects.timer(TimerCommand::Stop(TimerKind::EliminationCheck));
            effects.to_one(conn_id, ServerMsg::EliminationReady);
        }

        let readout = active.gate.readout(now);
        effects.to_one(
            conn_id,
            ServerMsg::TimerStatus {
                minutes: readout.minutes,
                seconds: readout.seconds,
                can_eliminate: readout.can_eliminate,
            },
        );

        effects
    }

    /// 1 Hz readiness check while the cooldown runs
    pub fn elimination_check(&mut self, now: Instant) -> Effects {
        let mut effects = Effects::default();

        let Phase::Active(active) = &mut self.phase else {
            effects.timer(TimerCommand::Stop(TimerKind::EliminationCheck));
            return effects;
        };

        match active.gate {
            EliminationGate::CountingDown { .. } => {
                if active.gate.poll(now) {
                    info!("Elimination ready");
                    effects.timer(TimerCommand::Stop(TimerKind::EliminationCheck));
                    effects.to_one(active.killer_id, ServerMsg::EliminationReady);
                }
            }
            EliminationGate::Locked | EliminationGate::Ready => {
                effects.timer(TimerCommand::Stop(TimerKind::EliminationCheck));
            }
        }

        effects
    }

    pub fn eliminate(&mut self, conn_id: ConnId, target_id: ConnId, now: Instant) -> Effects {
        let mut effects = Effects::default();
        let cooldown = self.settings.elimination_cooldown;

        let Phase::Active(active) = &mut self.phase else {
            return effects;
        };
        if conn_id != active.killer_id || !active.gate.can_eliminate() {
            debug!(conn_id = %conn_id, target_id = %target_id, "Elimination refused");
            return effects;
        }
        if target_id == active.killer_id {
            return effects;
        }
        let Some(target) = self
            .groups
            .iter_mut()
            .find(|p| p.id == target_id && !p.eliminated)
        else {
            debug!(target_id = %target_id, "Elimination target not available");
            return effects;
        };

        target.eliminated = true;
        active.gate.consume(now, cooldown);
        let killer_id = active.killer_id;
        info!(target_id = %target_id, player = %target.name, "Player eliminated");

        effects.to_one(
            target_id,
            ServerMsg::PlayerEliminatedMessage(ELIMINATED_NOTICE.to_string()),
        );
        effects.broadcast(ServerMsg::PlayerEliminated(target_id));
        effects.broadcast(ServerMsg::UpdatePlayers(self.roster()));
        effects.to_one(killer_id, ServerMsg::EliminationUsed);
        effects.timer(TimerCommand::Start(TimerKind::EliminationCheck));
        effects.timer(TimerCommand::ReturnToLobby {
            conn_id: target_id,
            after: self.settings.return_to_lobby_delay,
        });

        if self.surviving_spies() == 0 {
            info!("All spies eliminated, killer wins");
            effects.broadcast(ServerMsg::GameWon {
                winner: "Killer".to_string(),
                kind: WinKind::Killer,
                reason: None,
            });
            self.reset_into(&mut effects);
        }

        effects
    }

    fn surviving_spies(&self) -> usize {
        self.spies().filter(|p| !p.eliminated).count()
    }

    /// Send a clue's ciphertext to a living spy
    pub fn interact_clue(&mut self, conn_id: ConnId, clue_id: u32) -> Effects {
        let mut effects = Effects::default();

        if !self.is_started() || self.is_killer(conn_id) {
            return effects;
        }
        let Some(clue) = clues::find(clue_id) else {
            return effects;
        };
        if self.participant(conn_id).is_some_and(|p| !p.eliminated) {
            effects.to_one(conn_id, ServerMsg::ClueData(clue.public_view()));
        }

        effects
    }

    pub fn solve_clue(&mut self, conn_id: ConnId, clue_id: u32, solution: &str) -> Effects {
        let mut effects = Effects::default();

        let Some(killer_id) = self.killer_id() else {
            return effects;
        };
        if conn_id == killer_id {
            debug!("Killer attempted to solve a clue");
            return effects;
        }
        let Some(clue) = clues::find(clue_id) else {
            return effects;
        };
        let Some(player) = self
            .groups
            .iter_mut()
            .find(|p| p.id == conn_id && !p.eliminated)
        else {
            return effects;
        };

        if !clue.is_solved_by(solution) {
            debug!(conn_id = %conn_id, clue_id, "Incorrect clue solution");
            effects.to_one(conn_id, ServerMsg::ClueFailed);
            return effects;
        }
        if !player.solved_clues.insert(clue_id) {
            debug!(conn_id = %conn_id, clue_id, "Clue already solved");
            return effects;
        }

        let player_name = player.name.clone();
        let player_clues_count = player.solved_clues.len();
        info!(player = %player_name, clue_id, player_clues_count, "Clue solved");

        effects.to_one(conn_id, ServerMsg::ClueCorrect(clue_id));
        effects.to_one(
            killer_id,
            self.clue_progress(player_name.clone(), clue_id, player_clues_count),
        );

        if player_clues_count >= self.settings.clues_to_win {
            info!(player = %player_name, "Spy solved enough clues, spies win");
            effects.broadcast(ServerMsg::GameWon {
                winner: player_name,
                kind: WinKind::Spy,
                reason: None,
            });
            self.reset_into(&mut effects);
        }

        effects
    }

    /// Aggregate spy progress, for the killer's eyes only
    fn clue_progress(
        &self,
        player_name: String,
        clue_id: u32,
        player_clues_count: usize,
    ) -> ServerMsg {
        ServerMsg::ClueProgress {
            player_name,
            clue_id,
            player_clues_count,
            total_solved_clues: self.spies().map(|p| p.solved_clues.len()).sum(),
            players_with_clues: self.spies().filter(|p| !p.solved_clues.is_empty()).count(),
            total_players: self.spies().filter(|p| !p.eliminated).count(),
        }
    }

    fn spies(&self) -> impl Iterator<Item = &Participant> + '_ {
        let killer_id = self.killer_id();
        self.groups.iter().filter(move |p| Some(p.id) != killer_id)
    }

    /// Sender of a relay, if relaying is allowed for them
    fn relay_sender(&mut self, conn_id: ConnId) -> Option<&mut Participant> {
        if !self.is_started() {
            return None;
        }
        self.groups
            .iter_mut()
            .find(|p| p.id == conn_id && !p.eliminated)
    }

    pub fn player_move(&mut self, conn_id: ConnId, position: Vec3) -> Effects {
        let mut effects = Effects::default();
        if let Some(player) = self.relay_sender(conn_id) {
            player.position = position;
            effects.broadcast_except(conn_id, ServerMsg::PlayerMoved { id: conn_id, position });
        }
        effects
    }

    pub fn door_state_change(
        &mut self,
        conn_id: ConnId,
        door_name: String,
        is_open: bool,
        position: Vec3,
    ) -> Effects {
        let mut effects = Effects::default();
        if let Some(player) = self.relay_sender(conn_id) {
            debug!(player = %player.name, door = %door_name, is_open, "Door state change");
            let player_name = player.name.clone();
            effects.broadcast_except(
                conn_id,
                ServerMsg::DoorStateChange {
                    door_name,
                    is_open,
                    position,
                    player_name,
                },
            );
        }
        effects
    }

    pub fn flashlight_toggle(
        &mut self,
        conn_id: ConnId,
        is_on: bool,
        position: Vec3,
        direction: Vec3,
    ) -> Effects {
        let mut effects = Effects::default();
        if let Some(player) = self.relay_sender(conn_id) {
            let player_name = player.name.clone();
            effects.broadcast_except(
                conn_id,
                ServerMsg::FlashlightToggle {
                    player_id: conn_id,
                    is_on,
                    position,
                    direction,
                    player_name,
                },
            );
        }
        effects
    }

    pub fn flashlight_update(
        &mut self,
        conn_id: ConnId,
        position: Vec3,
        direction: Vec3,
        is_on: bool,
    ) -> Effects {
        let mut effects = Effects::default();
        if self.relay_sender(conn_id).is_some() {
            effects.broadcast_except(
                conn_id,
                ServerMsg::FlashlightUpdate {
                    player_id: conn_id,
                    position,
                    direction,
                    is_on,
                },
            );
        }
        effects
    }

    pub fn disconnect(&mut self, conn_id: ConnId) -> Effects {
        let mut effects = Effects::default();

        let Some(index) = self.groups.iter().position(|p| p.id == conn_id) else {
            return effects;
        };
        let was_started = self.is_started();
        let was_killer = self.is_killer(conn_id);

        if was_started || self.groups.len() > 1 {
            effects.broadcast(ServerMsg::PlayerDisconnected {
                id: conn_id,
                name: self.groups[index].name.clone(),
                was_killer,
            });
        }

        let player = self.groups.remove(index);
        info!(
            conn_id = %conn_id,
            player = %player.name,
            remaining = self.groups.len(),
            "Player left"
        );

        if self.groups.is_empty() {
            if was_started {
                effects.broadcast(ServerMsg::GameTerminated {
                    reason: "All players left the game".to_string(),
                });
            }
            self.reset_into(&mut effects);
            return effects;
        }

        if was_started {
            if was_killer {
                info!("Killer left the game, spies win");
                effects.broadcast(ServerMsg::GameWon {
                    winner: "Spies".to_string(),
                    kind: WinKind::Spy,
                    reason: Some("Killer left the game".to_string()),
                });
                self.reset_into(&mut effects);
            } else if self.groups.len() < self.settings.min_players {
                info!(remaining = self.groups.len(), "Not enough players, terminating match");
                effects.broadcast(ServerMsg::GameTerminated {
                    reason: format!(
                        "Not enough players to continue (minimum {} required)",
                        self.settings.min_players
                    ),
                });
                self.reset_into(&mut effects);
            } else if self.surviving_spies() == 0 {
                info!("Last living spy left, killer wins");
                effects.broadcast(ServerMsg::GameWon {
                    winner: "Killer".to_string(),
                    kind: WinKind::Killer,
                    reason: None,
                });
                self.reset_into(&mut effects);
            } else {
                effects.broadcast(ServerMsg::UpdatePlayers(self.roster()));
            }
            return effects;
        }

        if matches!(self.phase, Phase::Countdown { .. })
            && self.groups.len() < self.settings.min_players
        {
            info!("Countdown cancelled");
            self.phase = Phase::Lobby;
            effects.timer(TimerCommand::Stop(TimerKind::CountdownTick));
            effects.broadcast(ServerMsg::CountdownCancelled);
        }
        effects.broadcast(self.waiting_room_update());

        effects
    }

    /// Drop every participant and timer and return to an empty lobby
    pub fn reset(&mut self) -> Effects {
        let mut effects = Effects::default();
        self.reset_into(&mut effects);
        effects
    }

    fn reset_into(&mut self, effects: &mut Effects) {
        self.groups.clear();
        self.phase = Phase::Lobby;
        effects.timer(TimerCommand::ClearAll);
        info!("Match reset");
    }
}
