use rand::Rng;
use shakmaty::{Role, Square};
use tokio::sync::{broadcast, mpsc};

use crate::session::{EngineReply, MoveRejected, Session};
use crate::types::{GameOutcome, SearchLimits, SessionMode, Side};
use crate::uci::{EngineError, UciEngine};

fn human_session() -> (Session, mpsc::Receiver<EngineReply>) {
    let (tx, rx) = mpsc::channel(8);
    (Session::new(None, SearchLimits::default(), tx), rx)
}

// Engine backed by raw channels; searches issued against it never complete,
// which is exactly what the in-flight tests need. Replies are injected by
// hand with the session's current generation.
fn stubbed_session() -> (
    Session,
    mpsc::Receiver<EngineReply>,
    mpsc::Receiver<String>,
    broadcast::Sender<String>,
) {
    let (engine, stdin_rx, stdout_tx) = UciEngine::stub();
    let (tx, rx) = mpsc::channel(8);
    (Session::new(Some(engine), SearchLimits::default(), tx), rx, stdin_rx, stdout_tx)
}

fn reply(session: &Session, result: Result<Option<shakmaty::uci::Uci>, EngineError>) -> EngineReply {
    EngineReply { generation: session.generation(), result }
}

fn uci(s: &str) -> shakmaty::uci::Uci {
    s.parse().expect("valid uci")
}

#[tokio::test]
async fn side_to_move_follows_history_parity() {
    let (mut session, _rx) = human_session();
    session.start(SessionMode::HumanVsHuman).await.unwrap();
    assert_eq!(session.snapshot().side_to_move, Side::White);

    session.attempt_human_move(Square::E2, Square::E4).unwrap();
    assert_eq!(session.history().len(), 1);
    assert_eq!(session.snapshot().side_to_move, Side::Black);

    session.attempt_human_move(Square::E7, Square::E5).unwrap();
    assert_eq!(session.history().len(), 2);
    assert_eq!(session.snapshot().side_to_move, Side::White);
}

#[tokio::test]
async fn undo_is_the_inverse_of_a_human_commit() {
    let (mut session, _rx) = human_session();
    session.start(SessionMode::HumanVsHuman).await.unwrap();
    let before = session.snapshot().fen;

    session.attempt_human_move(Square::E2, Square::E4).unwrap();
    assert_eq!(session.undo(), 1);
    assert_eq!(session.snapshot().fen, before);
    assert!(session.history().is_empty());
    assert_eq!(session.snapshot().side_to_move, Side::White);
}

#[tokio::test]
async fn undo_on_empty_history_is_a_noop() {
    let (mut session, _rx) = human_session();
    session.start(SessionMode::HumanVsHuman).await.unwrap();
    let before = session.snapshot().fen;
    assert_eq!(session.undo(), 0);
    assert_eq!(session.snapshot().fen, before);
}

#[tokio::test]
async fn pawn_on_the_last_rank_auto_promotes_to_queen() {
    let (mut session, _rx) = human_session();
    session.start(SessionMode::HumanVsHuman).await.unwrap();
    for (from, to) in [
        (Square::A2, Square::A4),
        (Square::B7, Square::B5),
        (Square::A4, Square::B5),
        (Square::A7, Square::A6),
        (Square::B5, Square::A6),
        (Square::C7, Square::C6),
        (Square::A6, Square::A7),
        (Square::C6, Square::C5),
    ] {
        session.attempt_human_move(from, to).unwrap();
    }
    let m = session.attempt_human_move(Square::A7, Square::B8).unwrap();
    assert_eq!(m.promotion(), Some(Role::Queen));
}

#[tokio::test]
async fn illegal_moves_are_rejected_without_state_change() {
    let (mut session, _rx) = human_session();
    session.start(SessionMode::HumanVsHuman).await.unwrap();
    let before = session.snapshot().fen;
    assert_eq!(
        session.attempt_human_move(Square::E2, Square::E5),
        Err(MoveRejected::Illegal)
    );
    assert_eq!(session.snapshot().fen, before);
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn no_moves_are_accepted_after_checkmate() {
    let (mut session, _rx) = human_session();
    session.start(SessionMode::HumanVsHuman).await.unwrap();
    for (from, to) in [
        (Square::F2, Square::F3),
        (Square::E7, Square::E5),
        (Square::G2, Square::G4),
        (Square::D8, Square::H4),
    ] {
        session.attempt_human_move(from, to).unwrap();
    }
    assert_eq!(
        session.terminal_outcome(),
        GameOutcome::Decisive { winner: Side::Black }
    );
    assert_eq!(
        session.attempt_human_move(Square::A2, Square::A3),
        Err(MoveRejected::GameOver)
    );
    assert!(session.legal_destinations(Square::A2).is_empty());

    // Undo leaves the terminal state and play resumes.
    assert_eq!(session.undo(), 1);
    assert_eq!(session.terminal_outcome(), GameOutcome::Ongoing);
    session.attempt_human_move(Square::A7, Square::A6).unwrap();
}

#[tokio::test]
async fn human_cannot_move_for_the_engine_side() {
    let (mut session, _rx, _stdin, _stdout) = stubbed_session();
    session
        .start(SessionMode::HumanVsEngine { engine_side: Side::Black, skill: 3 })
        .await
        .unwrap();
    session.attempt_human_move(Square::E2, Square::E4).unwrap();
    assert_eq!(
        session.attempt_human_move(Square::E7, Square::E5),
        Err(MoveRejected::NotYourTurn)
    );
}

#[tokio::test]
async fn in_flight_request_locks_moves_and_undo() {
    let (mut session, _rx, _stdin, _stdout) = stubbed_session();
    session
        .start(SessionMode::HumanVsEngine { engine_side: Side::Black, skill: 3 })
        .await
        .unwrap();
    session.attempt_human_move(Square::E2, Square::E4).unwrap();

    assert!(session.maybe_request_engine_move());
    assert!(session.engine_thinking());
    // Idempotent while in flight.
    assert!(!session.maybe_request_engine_move());

    assert_eq!(
        session.attempt_human_move(Square::E7, Square::E5),
        Err(MoveRejected::EngineThinking)
    );
    assert_eq!(session.undo(), 0);
}

#[tokio::test]
async fn engine_reply_commits_and_hands_the_turn_back() {
    let (mut session, _rx, _stdin, _stdout) = stubbed_session();
    session
        .start(SessionMode::HumanVsEngine { engine_side: Side::Black, skill: 3 })
        .await
        .unwrap();
    session.attempt_human_move(Square::E2, Square::E4).unwrap();
    assert!(session.maybe_request_engine_move());

    let committed = session.on_engine_reply(reply(&session, Ok(Some(uci("e7e5")))));
    assert!(committed.is_some());
    assert_eq!(session.history().len(), 2);
    assert_eq!(session.snapshot().side_to_move, Side::White);
    assert!(!session.engine_thinking());
}

#[tokio::test]
async fn stale_generation_replies_are_discarded() {
    let (mut session, _rx, _stdin, _stdout) = stubbed_session();
    session
        .start(SessionMode::HumanVsEngine { engine_side: Side::Black, skill: 3 })
        .await
        .unwrap();
    session.attempt_human_move(Square::E2, Square::E4).unwrap();
    assert!(session.maybe_request_engine_move());

    let stale = EngineReply {
        generation: session.generation().wrapping_sub(1),
        result: Ok(Some(uci("e7e5"))),
    };
    assert!(session.on_engine_reply(stale).is_none());
    // The real request is still outstanding.
    assert!(session.engine_thinking());
    assert_eq!(session.history().len(), 1);
}

#[tokio::test]
async fn undo_after_a_completed_pair_removes_two_plies() {
    let (mut session, _rx, _stdin, _stdout) = stubbed_session();
    session
        .start(SessionMode::HumanVsEngine { engine_side: Side::Black, skill: 3 })
        .await
        .unwrap();
    let start = session.snapshot().fen;
    session.attempt_human_move(Square::E2, Square::E4).unwrap();
    assert!(session.maybe_request_engine_move());
    session.on_engine_reply(reply(&session, Ok(Some(uci("e7e5")))));
    assert_eq!(session.history().len(), 2);

    assert_eq!(session.undo(), 2);
    assert!(session.history().is_empty());
    assert_eq!(session.snapshot().fen, start);
    assert_eq!(session.snapshot().side_to_move, Side::White);
}

#[tokio::test]
async fn undo_of_an_unanswered_human_move_removes_one_ply() {
    let (mut session, _rx, _stdin, _stdout) = stubbed_session();
    session
        .start(SessionMode::HumanVsEngine { engine_side: Side::Black, skill: 3 })
        .await
        .unwrap();
    session.attempt_human_move(Square::E2, Square::E4).unwrap();
    // No request issued; the engine never answered this move.
    assert_eq!(session.undo(), 1);
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn failed_searches_skip_the_turn_without_history_changes() {
    let (mut session, _rx, _stdin, _stdout) = stubbed_session();
    session
        .start(SessionMode::HumanVsEngine { engine_side: Side::Black, skill: 3 })
        .await
        .unwrap();
    session.attempt_human_move(Square::E2, Square::E4).unwrap();

    assert!(session.maybe_request_engine_move());
    let timeout = reply(&session, Err(EngineError::Timeout(std::time::Duration::from_millis(200))));
    assert!(session.on_engine_reply(timeout).is_none());
    assert_eq!(session.history().len(), 1);
    assert!(!session.engine_thinking());

    // A retry is allowed after a skipped turn.
    assert!(session.maybe_request_engine_move());
    assert!(session.on_engine_reply(reply(&session, Ok(None))).is_none());
    assert_eq!(session.history().len(), 1);
}

#[tokio::test]
async fn a_dead_engine_disables_further_requests() {
    let (mut session, _rx, _stdin, _stdout) = stubbed_session();
    session
        .start(SessionMode::HumanVsEngine { engine_side: Side::Black, skill: 3 })
        .await
        .unwrap();
    session.attempt_human_move(Square::E2, Square::E4).unwrap();
    assert!(session.maybe_request_engine_move());
    assert!(session.on_engine_reply(reply(&session, Err(EngineError::Exited))).is_none());

    assert!(!session.maybe_request_engine_move());
    // A fresh process restores engine play.
    let (engine, _stdin2, _stdout2) = UciEngine::stub();
    session.set_engine(engine);
    assert!(session.maybe_request_engine_move());
}

#[tokio::test]
async fn engine_as_white_is_asked_for_the_first_move() {
    let (mut session, _rx, _stdin, _stdout) = stubbed_session();
    session
        .start(SessionMode::HumanVsEngine { engine_side: Side::White, skill: 0 })
        .await
        .unwrap();
    assert!(session.maybe_request_engine_move());
    let committed = session.on_engine_reply(reply(&session, Ok(Some(uci("e2e4")))));
    assert!(committed.is_some());
    assert_eq!(session.snapshot().side_to_move, Side::Black);
}

#[tokio::test]
async fn out_of_range_skill_leaves_the_session_untouched() {
    let (mut session, _rx, _stdin, _stdout) = stubbed_session();
    session.start(SessionMode::HumanVsHuman).await.unwrap();
    session.attempt_human_move(Square::E2, Square::E4).unwrap();

    let result = session
        .start(SessionMode::HumanVsEngine { engine_side: Side::Black, skill: 42 })
        .await;
    assert!(matches!(result, Err(EngineError::InvalidSkillLevel(42))));
    assert_eq!(session.history().len(), 1);
    assert_eq!(session.mode(), SessionMode::HumanVsHuman);
}

#[tokio::test]
async fn engine_mode_requires_a_live_engine() {
    let (mut session, _rx) = human_session();
    let result = session
        .start(SessionMode::HumanVsEngine { engine_side: Side::Black, skill: 3 })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn random_probes_only_ever_commit_legal_moves() {
    let (mut session, _rx) = human_session();
    session.start(SessionMode::HumanVsHuman).await.unwrap();
    let mut rng = rand::rng();

    for _ in 0..2000 {
        if session.terminal_outcome() != GameOutcome::Ongoing {
            break;
        }
        let from = Square::new(rng.random_range(0..64));
        let to = Square::new(rng.random_range(0..64));
        let before_len = session.history().len();
        let before_fen = session.snapshot().fen;
        match session.attempt_human_move(from, to) {
            Ok(_) => {
                assert_eq!(session.history().len(), before_len + 1);
                assert_ne!(session.snapshot().fen, before_fen);
            }
            Err(_) => {
                assert_eq!(session.history().len(), before_len);
                assert_eq!(session.snapshot().fen, before_fen);
            }
        }
        let expected = if session.history().len() % 2 == 0 { Side::White } else { Side::Black };
        assert_eq!(session.snapshot().side_to_move, expected);
    }
}
