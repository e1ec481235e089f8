use serde::{Deserialize, Serialize};
use shakmaty::Color;
use std::fmt;
use std::time::Duration;

/// Slack added on top of the movetime when no explicit hard timeout is set,
/// so a healthy engine that slightly overshoots its budget is not killed.
const TIMEOUT_SLACK_MS: u64 = 5_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }
}

impl From<Color> for Side {
    fn from(color: Color) -> Side {
        match color {
            Color::White => Side::White,
            Color::Black => Side::Black,
        }
    }
}

impl From<Side> for Color {
    fn from(side: Side) -> Color {
        match side {
            Side::White => Color::White,
            Side::Black => Color::Black,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::White => write!(f, "White"),
            Side::Black => write!(f, "Black"),
        }
    }
}

/// How a session is played. Fixed for the lifetime of a session; switching
/// modes goes through `Session::start`, which begins a fresh game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    HumanVsHuman,
    HumanVsEngine { engine_side: Side, skill: u8 },
}

impl SessionMode {
    pub fn engine_side(&self) -> Option<Side> {
        match self {
            SessionMode::HumanVsHuman => None,
            SessionMode::HumanVsEngine { engine_side, .. } => Some(*engine_side),
        }
    }
}

/// Per-search budget handed to the engine. The go command uses `depth` when
/// set, otherwise `movetime_ms`. The hard timeout is the client-side guard
/// against a hung process and is always longer than the engine's own budget.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SearchLimits {
    pub movetime_ms: u64,
    pub depth: Option<u32>,
    pub hard_timeout_ms: Option<u64>,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self { movetime_ms: 500, depth: None, hard_timeout_ms: None }
    }
}

impl SearchLimits {
    pub fn go_command(&self) -> String {
        match self.depth {
            Some(d) => format!("go depth {d}"),
            None => format!("go movetime {}", self.movetime_ms),
        }
    }

    pub fn hard_timeout(&self) -> Duration {
        Duration::from_millis(
            self.hard_timeout_ms
                .unwrap_or(self.movetime_ms + TIMEOUT_SLACK_MS),
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawReason {
    Stalemate,
    InsufficientMaterial,
    MoveLimit,
    Repetition,
}

impl fmt::Display for DrawReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrawReason::Stalemate => write!(f, "by stalemate"),
            DrawReason::InsufficientMaterial => write!(f, "by insufficient material"),
            DrawReason::MoveLimit => write!(f, "by move limit"),
            DrawReason::Repetition => write!(f, "by repetition"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOutcome {
    Ongoing,
    Decisive { winner: Side },
    Drawn(DrawReason),
}

impl fmt::Display for GameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameOutcome::Ongoing => write!(f, "ongoing"),
            GameOutcome::Decisive { winner } => write!(f, "{winner} wins by checkmate"),
            GameOutcome::Drawn(reason) => write!(f, "Draw {reason}"),
        }
    }
}

/// Read-only view of the session handed to input/render adapters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub fen: String,
    pub last_move: Option<String>,
    pub side_to_move: Side,
    pub fullmove_number: u32,
    pub outcome: GameOutcome,
    pub engine_thinking: bool,
}
