//! WebSocket protocol message definitions
//! These are the wire types for client-server communication.
//!
//! Every frame is a named event: `{"event": "joinGame", "data": "Alice"}`.
//! Events without a payload omit `data`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::clues::ClueView;

/// Transport-assigned participant identifier, one per connection
pub type ConnId = Uuid;

/// A point or direction in world space, as reported by a client
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMsg {
    /// Enter the lobby under a display name
    JoinGame(String),

    /// Last known position of the sender
    PlayerMove(Vec3),

    /// Request the ciphertext of a clue
    InteractClue(u32),

    /// Submit a decrypted clue
    SolveClue { clue_id: u32, solution: String },

    /// Killer removes a spy
    KillerEliminate(ConnId),

    /// Killer asks for the elimination cooldown
    RequestTimerStatus,

    DoorStateChange {
        door_name: String,
        is_open: bool,
        /// Position the door should animate toward
        position: Vec3,
    },

    FlashlightToggle {
        is_on: bool,
        position: Vec3,
        direction: Vec3,
    },

    FlashlightUpdate {
        position: Vec3,
        direction: Vec3,
        is_on: bool,
    },
}

impl ClientMsg {
    /// Event name, for logs
    pub fn name(&self) -> &'static str {
        match self {
            ClientMsg::JoinGame(_) => "joinGame",
            ClientMsg::PlayerMove(_) => "playerMove",
            ClientMsg::InteractClue(_) => "interactClue",
            ClientMsg::SolveClue { .. } => "solveClue",
            ClientMsg::KillerEliminate(_) => "killerEliminate",
            ClientMsg::RequestTimerStatus => "requestTimerStatus",
            ClientMsg::DoorStateChange { .. } => "doorStateChange",
            ClientMsg::FlashlightToggle { .. } => "flashlightToggle",
            ClientMsg::FlashlightUpdate { .. } => "flashlightUpdate",
        }
    }

    /// Boundary validation beyond what the types enforce
    pub fn is_well_formed(&self) -> bool {
        match self {
            ClientMsg::PlayerMove(position) => position.is_finite(),
            ClientMsg::DoorStateChange { position, .. } => position.is_finite(),
            ClientMsg::FlashlightToggle {
                position,
                direction,
                ..
            }
            | ClientMsg::FlashlightUpdate {
                position,
                direction,
                ..
            } => position.is_finite() && direction.is_finite(),
            _ => true,
        }
    }
}

/// Who won a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WinKind {
    Spy,
    Killer,
}

/// Roster entry visible to everyone. Never carries a role.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerPublic {
    pub id: ConnId,
    pub name: String,
    pub eliminated: bool,
    pub position: Vec3,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMsg {
    /// First message on every connection
    Connected { id: ConnId },

    WaitingRoomUpdate {
        players: Vec<String>,
        players_needed: usize,
    },

    CountdownStarted(u32),

    CountdownUpdate(u32),

    CountdownCancelled,

    GameStarting,

    /// Private role assignment
    GameJoined {
        is_killer: bool,
        group_id: ConnId,
        cipher_key: BTreeMap<char, char>,
    },

    /// Admission refused: lobby full or match running
    GameFull(String),

    /// Request rejected at the boundary
    Error { code: String, message: String },

    UpdatePlayers(Vec<PlayerPublic>),

    PlayerMoved { id: ConnId, position: Vec3 },

    ClueData(ClueView),

    ClueCorrect(u32),

    ClueFailed,

    /// Killer-only aggregate of spy progress
    ClueProgress {
        player_name: String,
        clue_id: u32,
        player_clues_count: usize,
        total_solved_clues: usize,
        players_with_clues: usize,
        total_players: usize,
    },

    PlayerEliminated(ConnId),

    PlayerEliminatedMessage(String),

    ReturnToLobby,

    EliminationReady,

    EliminationUsed,

    TimerStatus {
        minutes: u64,
        seconds: u64,
        can_eliminate: bool,
    },

    GameWon {
        winner: String,
        #[serde(rename = "type")]
        kind: WinKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    GameTerminated { reason: String },

    PlayerDisconnected {
        id: ConnId,
        name: String,
        was_killer: bool,
    },

    DoorStateChange {
        door_name: String,
        is_open: bool,
        position: Vec3,
        player_name: String,
    },

    FlashlightToggle {
        player_id: ConnId,
        is_on: bool,
        position: Vec3,
        direction: Vec3,
        player_name: String,
    },

    FlashlightUpdate {
        player_id: ConnId,
        position: Vec3,
        direction: Vec3,
        is_on: bool,
    },
}
