pub mod board;
pub mod session;
pub mod types;
pub mod uci;

pub use board::{Board, START_FEN};
pub use session::{EngineReply, MoveRejected, Session};
pub use types::{DrawReason, GameOutcome, SearchLimits, SessionMode, Side, Snapshot};
pub use uci::{EngineError, UciEngine, SKILL_MAX};

#[cfg(test)]
mod test_session;
