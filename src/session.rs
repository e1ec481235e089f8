use log::{debug, error, info, warn};
use shakmaty::uci::Uci;
use shakmaty::{CastlingMode, Move, Rank, Role, Square};
use tokio::sync::mpsc;

use crate::board::{Board, START_FEN};
use crate::types::{GameOutcome, SearchLimits, SessionMode, Side, Snapshot};
use crate::uci::{self, EngineError, UciEngine};

/// Completed engine search, delivered back to the session by the driver.
/// The generation identifies the position the search was requested for; a
/// reply whose generation no longer matches is stale and gets discarded.
#[derive(Debug)]
pub struct EngineReply {
    pub generation: u64,
    pub result: Result<Option<Uci>, EngineError>,
}

/// Why a candidate human move was not committed. All of these are normal
/// outcomes the caller may silently ignore; nothing changes on rejection.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum MoveRejected {
    #[error("the game is over")]
    GameOver,
    #[error("the engine is thinking")]
    EngineThinking,
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("illegal move")]
    Illegal,
}

/// One interactive game: the canonical position, the move history, the side
/// assignment and the single in-flight engine request.
pub struct Session {
    board: Board,
    history: Vec<Move>,
    // UCI wire form of `history`, fed to the engine's position command.
    uci_history: Vec<String>,
    mode: SessionMode,
    limits: SearchLimits,
    engine: Option<UciEngine>,
    engine_available: bool,
    in_flight: bool,
    generation: u64,
    reply_tx: mpsc::Sender<EngineReply>,
}

impl Session {
    pub fn new(
        engine: Option<UciEngine>,
        limits: SearchLimits,
        reply_tx: mpsc::Sender<EngineReply>,
    ) -> Self {
        let engine_available = engine.is_some();
        Self {
            board: Board::new(),
            history: Vec::new(),
            uci_history: Vec::new(),
            mode: SessionMode::HumanVsHuman,
            limits,
            engine,
            engine_available,
            in_flight: false,
            generation: 0,
            reply_tx,
        }
    }

    /// Begins a fresh game in the given mode. Any search in flight is
    /// abandoned; its reply will arrive with a stale generation. Fails
    /// without touching the session when the skill level is out of range or
    /// engine play is requested with no live engine.
    pub async fn start(&mut self, mode: SessionMode) -> Result<(), EngineError> {
        if let SessionMode::HumanVsEngine { skill, .. } = mode {
            uci::validate_skill(skill)?;
            if self.engine.is_none() || !self.engine_available {
                return Err(EngineError::Exited);
            }
        }
        if self.in_flight {
            if let Some(engine) = &self.engine {
                let _ = engine.stop().await;
            }
            self.in_flight = false;
        }
        self.generation += 1;
        self.board = Board::new();
        self.history.clear();
        self.uci_history.clear();
        self.mode = mode;
        if let SessionMode::HumanVsEngine { skill, .. } = mode {
            if let Some(engine) = &self.engine {
                if let Err(e) = engine.configure(skill).await {
                    self.engine_available = false;
                    return Err(e);
                }
                if let Err(e) = engine.new_game().await {
                    self.engine_available = false;
                    return Err(e);
                }
            }
        }
        info!("started session: {mode:?}");
        Ok(())
    }

    /// Validates and commits a human candidate move. A pawn arriving on the
    /// farthest rank always promotes to a queen; there is no under-promotion
    /// input.
    pub fn attempt_human_move(
        &mut self,
        from: Square,
        to: Square,
    ) -> Result<Move, MoveRejected> {
        if self.terminal_outcome() != GameOutcome::Ongoing {
            return Err(MoveRejected::GameOver);
        }
        if self.in_flight {
            return Err(MoveRejected::EngineThinking);
        }
        if self.mode.engine_side() == Some(self.side_to_move()) {
            return Err(MoveRejected::NotYourTurn);
        }
        let promotion = if self.board.role_at(from) == Some(Role::Pawn)
            && (to.rank() == Rank::First || to.rank() == Rank::Eighth)
        {
            Some(Role::Queen)
        } else {
            None
        };
        let candidate = Uci::Normal { from, to, promotion };
        let m = self.board.legal_from_uci(&candidate).ok_or(MoveRejected::Illegal)?;
        self.commit(m.clone());
        debug!("human plays {candidate}");
        Ok(m)
    }

    /// Issues one search to the engine if it is the engine's turn and the
    /// game is still on. Idempotent while a request is in flight. Returns
    /// whether a request was issued.
    pub fn maybe_request_engine_move(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        let SessionMode::HumanVsEngine { engine_side, .. } = self.mode else {
            return false;
        };
        if self.side_to_move() != engine_side
            || self.terminal_outcome() != GameOutcome::Ongoing
            || !self.engine_available
        {
            return false;
        }
        let Some(engine) = self.engine.clone() else {
            return false;
        };
        let generation = self.generation;
        let moves = self.uci_history.clone();
        let limits = self.limits;
        let tx = self.reply_tx.clone();
        self.in_flight = true;
        debug!("requesting engine move for {engine_side} after {} plies", moves.len());
        tokio::spawn(async move {
            let result = engine.request_best_move(START_FEN, &moves, &limits).await;
            let _ = tx.send(EngineReply { generation, result }).await;
        });
        true
    }

    /// Feeds a completed search back in. Returns the committed move, or
    /// `None` when the engine's turn was skipped (no move, timeout, protocol
    /// fault) or the reply was stale.
    pub fn on_engine_reply(&mut self, reply: EngineReply) -> Option<Move> {
        if reply.generation != self.generation {
            warn!(
                "discarding stale engine reply (generation {}, current {})",
                reply.generation, self.generation
            );
            return None;
        }
        if !self.in_flight {
            warn!("ignoring engine reply with no request in flight");
            return None;
        }
        self.in_flight = false;
        match reply.result {
            Ok(Some(uci)) => match self.board.legal_from_uci(&uci) {
                Some(m) => {
                    self.commit(m.clone());
                    debug!("engine plays {uci}");
                    Some(m)
                }
                None => {
                    warn!("engine move {uci} is not legal here, skipping its turn");
                    None
                }
            },
            Ok(None) => {
                warn!("engine returned no move, skipping its turn");
                None
            }
            Err(EngineError::Exited) | Err(EngineError::ChannelClosed) => {
                error!("engine process is gone, engine play disabled");
                self.engine_available = false;
                None
            }
            Err(e) => {
                warn!("engine search failed ({e}), skipping its turn");
                None
            }
        }
    }

    /// Takes back moves from the tail of the history. In engine mode a
    /// completed human+engine pair comes off together so the human is back
    /// on turn; a human move the engine has not answered comes off alone.
    /// Returns the number of plies removed; 0 means nothing to undo or a
    /// search in flight.
    pub fn undo(&mut self) -> usize {
        if self.in_flight || self.history.is_empty() {
            return 0;
        }
        let plies = match self.mode {
            SessionMode::HumanVsHuman => 1,
            SessionMode::HumanVsEngine { engine_side, .. } => {
                if self.side_to_move() != engine_side && self.history.len() >= 2 {
                    2
                } else {
                    1
                }
            }
        };
        for _ in 0..plies {
            self.board.undo();
            self.history.pop();
            self.uci_history.pop();
        }
        self.generation += 1;
        debug!("undid {plies} plies, {} remain", self.history.len());
        plies
    }

    pub fn terminal_outcome(&self) -> GameOutcome {
        self.board.outcome()
    }

    /// Side to move, derived from history length parity. White always moves
    /// first from the standard initial position.
    pub fn side_to_move(&self) -> Side {
        if self.history.len() % 2 == 0 {
            Side::White
        } else {
            Side::Black
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            fen: self.board.fen(),
            last_move: self.uci_history.last().cloned(),
            side_to_move: self.side_to_move(),
            fullmove_number: self.board.fullmove_number(),
            outcome: self.terminal_outcome(),
            engine_thinking: self.in_flight,
        }
    }

    /// Move hints for the square a piece is being picked up from. Empty once
    /// the game is over.
    pub fn legal_destinations(&self, from: Square) -> Vec<Square> {
        if self.terminal_outcome() != GameOutcome::Ongoing {
            return Vec::new();
        }
        self.board.legal_destinations(from)
    }

    pub fn engine_thinking(&self) -> bool {
        self.in_flight
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn history(&self) -> &[Move] {
        &self.history
    }

    pub fn engine(&self) -> Option<&UciEngine> {
        self.engine.as_ref()
    }

    /// Installs a freshly spawned engine process, re-enabling engine play
    /// after the previous process died.
    pub fn set_engine(&mut self, engine: UciEngine) {
        self.engine = Some(engine);
        self.engine_available = true;
    }

    /// Abandons any search in flight and quits the engine process. Safe to
    /// call on every exit path.
    pub async fn shutdown(&mut self) {
        self.generation += 1;
        self.in_flight = false;
        if let Some(engine) = self.engine.take() {
            engine.shutdown().await;
        }
        self.engine_available = false;
    }

    fn commit(&mut self, m: Move) {
        let uci = m.to_uci(CastlingMode::Standard).to_string();
        self.board.apply(&m);
        self.history.push(m);
        self.uci_history.push(uci);
        debug_assert_eq!(self.side_to_move(), Side::from(self.board.side_to_move()));
        debug_assert_eq!(self.history.len(), self.board.moves_played());
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}
