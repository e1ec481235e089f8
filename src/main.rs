//! Line-oriented console driver for the session core. Reads commands from
//! stdin and multiplexes them with engine replies so the prompt stays live
//! while a search is running.
//!
//! Commands: a move in UCI form (`e2e4`), `hints <square>`, `undo`, `new`,
//! `show`, `quit`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{info, warn};
use shakmaty::{CastlingMode, Square};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use chess_session::{
    EngineReply, GameOutcome, SearchLimits, Session, SessionMode, Side, UciEngine,
};

struct Args {
    engine_path: Option<String>,
    skill: u8,
    movetime_ms: u64,
    engine_side: Side,
    human_vs_human: bool,
    json: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        engine_path: None,
        skill: 0,
        movetime_ms: 500,
        engine_side: Side::Black,
        human_vs_human: false,
        json: false,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--skill" => {
                args.skill = it.next().context("--skill needs a value")?.parse()?;
            }
            "--movetime" => {
                args.movetime_ms = it.next().context("--movetime needs a value")?.parse()?;
            }
            // Play as black; the engine takes white and moves first.
            "--black" => args.engine_side = Side::White,
            "--hvh" => args.human_vs_human = true,
            "--json" => args.json = true,
            path => args.engine_path = Some(path.to_string()),
        }
    }
    Ok(args)
}

/// An explicit path wins; otherwise the first entry of an `engine/` directory
/// next to the working directory is used.
fn discover_engine(cli: Option<String>) -> Option<PathBuf> {
    if let Some(path) = cli {
        return Some(PathBuf::from(path));
    }
    std::fs::read_dir("engine")
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .next()
}

fn print_state(session: &Session, json: bool) {
    let snapshot = session.snapshot();
    if json {
        match serde_json::to_string(&snapshot) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("failed to serialize snapshot: {e}"),
        }
        return;
    }
    println!("{}  {} to move", snapshot.fen, snapshot.side_to_move);
    if snapshot.outcome != GameOutcome::Ongoing {
        println!("{}", snapshot.outcome);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = parse_args()?;

    let engine = if args.human_vs_human {
        None
    } else {
        match discover_engine(args.engine_path.clone()) {
            Some(path) => {
                let path = path.to_string_lossy().into_owned();
                Some(
                    UciEngine::spawn(&path)
                        .await
                        .with_context(|| format!("failed to launch engine {path}"))?,
                )
            }
            None => {
                info!("no engine found, falling back to pass-and-play");
                None
            }
        }
    };

    let mode = match &engine {
        Some(_) => SessionMode::HumanVsEngine { engine_side: args.engine_side, skill: args.skill },
        None => SessionMode::HumanVsHuman,
    };

    let (reply_tx, mut reply_rx) = mpsc::channel::<EngineReply>(16);
    let limits = SearchLimits { movetime_ms: args.movetime_ms, ..Default::default() };
    let mut session = Session::new(engine, limits, reply_tx);
    session.start(mode).await?;
    print_state(&session, args.json);
    // Covers the engine-plays-white case.
    session.maybe_request_engine_move();

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else { break };
                if !handle_command(&mut session, line.trim(), args.json).await? {
                    break;
                }
            }
            Some(reply) = reply_rx.recv() => {
                match session.on_engine_reply(reply) {
                    Some(m) => println!("engine plays {}", m.to_uci(CastlingMode::Standard)),
                    None => println!("engine turn skipped"),
                }
                print_state(&session, args.json);
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

async fn handle_command(session: &mut Session, line: &str, json: bool) -> Result<bool> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        None => {}
        Some("quit") => return Ok(false),
        Some("show") => print_state(session, json),
        Some("new") => {
            session.start(session.mode()).await?;
            print_state(session, json);
            session.maybe_request_engine_move();
        }
        Some("undo") => {
            let plies = session.undo();
            println!("took back {plies} plies");
            print_state(session, json);
            // After an undo in front of the engine's own move, it is the
            // engine's turn again.
            session.maybe_request_engine_move();
        }
        Some("hints") => match parts.next().map(str::parse::<Square>) {
            Some(Ok(from)) => {
                let squares: Vec<String> = session
                    .legal_destinations(from)
                    .iter()
                    .map(|sq| sq.to_string())
                    .collect();
                println!("{}", squares.join(" "));
            }
            _ => println!("usage: hints <square>"),
        },
        Some(token) if token.len() == 4 && token.is_ascii() => {
            match (token[0..2].parse::<Square>(), token[2..4].parse::<Square>()) {
                (Ok(from), Ok(to)) => match session.attempt_human_move(from, to) {
                    Ok(m) => {
                        println!("you play {}", m.to_uci(CastlingMode::Standard));
                        print_state(session, json);
                        session.maybe_request_engine_move();
                    }
                    Err(rejection) => println!("rejected: {rejection}"),
                },
                _ => println!("unrecognized command: {token}"),
            }
        }
        Some(other) => println!("unrecognized command: {other}"),
    }
    Ok(true)
}
