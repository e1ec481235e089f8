use std::collections::HashMap;

use anyhow::Context;
use shakmaty::fen::Fen;
use shakmaty::uci::Uci;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, Position, Role, Square};

use crate::types::{DrawReason, GameOutcome};

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Rules oracle around a `shakmaty` position. The session never mutates the
/// position directly; everything goes through `apply`/`undo` here so the undo
/// stack and repetition table stay consistent with it.
pub struct Board {
    pos: Chess,
    undo_stack: Vec<Chess>,
    // Occurrence counts keyed by the repetition-relevant FEN fields.
    repetition: HashMap<String, u32>,
}

impl Board {
    pub fn new() -> Self {
        let mut board = Self {
            pos: Chess::default(),
            undo_stack: Vec::new(),
            repetition: HashMap::new(),
        };
        board.repetition.insert(board.repetition_key(), 1);
        board
    }

    pub fn from_fen(fen: &str) -> anyhow::Result<Self> {
        let setup = Fen::from_ascii(fen.as_bytes()).context("invalid FEN")?;
        let pos: Chess = setup
            .into_position(CastlingMode::Standard)
            .context("FEN is not a legal position")?;
        let mut board = Self { pos, undo_stack: Vec::new(), repetition: HashMap::new() };
        board.repetition.insert(board.repetition_key(), 1);
        Ok(board)
    }

    pub fn side_to_move(&self) -> Color {
        self.pos.turn()
    }

    pub fn role_at(&self, sq: Square) -> Option<Role> {
        self.pos.board().role_at(sq)
    }

    /// Converts a UCI candidate into a `Move`, which succeeds only if the
    /// move is legal in the current position. This is the legality proof
    /// required before any commit.
    pub fn legal_from_uci(&self, uci: &Uci) -> Option<Move> {
        uci.to_move(&self.pos).ok()
    }

    pub fn apply(&mut self, m: &Move) {
        self.undo_stack.push(self.pos.clone());
        self.pos.play_unchecked(m);
        *self.repetition.entry(self.repetition_key()).or_insert(0) += 1;
    }

    /// Reverts the most recent `apply`. Returns false with nothing to revert.
    pub fn undo(&mut self) -> bool {
        match self.undo_stack.pop() {
            Some(prev) => {
                if let Some(n) = self.repetition.get_mut(&self.repetition_key()) {
                    *n = n.saturating_sub(1);
                }
                self.pos = prev;
                true
            }
            None => false,
        }
    }

    pub fn moves_played(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn fen(&self) -> String {
        Fen::from_position(self.pos.clone(), EnPassantMode::Legal).to_string()
    }

    pub fn fullmove_number(&self) -> u32 {
        self.pos.fullmoves().get()
    }

    /// Destination squares of all legal moves from `from`. Castling is shown
    /// as the king's two-square hop, matching how a board UI expects it.
    pub fn legal_destinations(&self, from: Square) -> Vec<Square> {
        let turn = self.pos.turn();
        let mut squares: Vec<Square> = self
            .pos
            .legal_moves()
            .iter()
            .filter(|m| m.from() == Some(from))
            .map(|m| match m.castling_side() {
                Some(side) => side.king_to(turn),
                None => m.to(),
            })
            .collect();
        squares.sort_unstable();
        squares.dedup();
        squares
    }

    pub fn outcome(&self) -> GameOutcome {
        if self.pos.is_checkmate() {
            return GameOutcome::Decisive { winner: (!self.pos.turn()).into() };
        }
        if self.pos.is_stalemate() {
            return GameOutcome::Drawn(DrawReason::Stalemate);
        }
        if self.pos.is_insufficient_material() {
            return GameOutcome::Drawn(DrawReason::InsufficientMaterial);
        }
        // 75-move rule: 150 halfmoves without capture or pawn move.
        if self.pos.halfmoves() >= 150 {
            return GameOutcome::Drawn(DrawReason::MoveLimit);
        }
        if self.repetition.get(&self.repetition_key()).copied().unwrap_or(0) >= 5 {
            return GameOutcome::Drawn(DrawReason::Repetition);
        }
        GameOutcome::Ongoing
    }

    // Placement, side to move, castling rights and en-passant square; the
    // clocks are excluded. EnPassantMode::Legal filters the ep square down to
    // actually capturable ones, as repetition detection requires.
    fn repetition_key(&self) -> String {
        self.fen().split_whitespace().take(4).collect::<Vec<_>>().join(" ")
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}
