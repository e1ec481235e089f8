//! Deterministic UCI engine for the test suite. Always answers with the
//! lexicographically smallest legal move. Fault injection happens in-protocol
//! via `setoption`: `Delay` (milliseconds slept before answering a go) and
//! `Mode` (`normal`, `garbage`, `nomove`, `exit`).

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use shakmaty::fen::Fen;
use shakmaty::uci::Uci;
use shakmaty::{CastlingMode, Chess, Position};

fn main() -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    let mut pos = Chess::default();
    let mut delay_ms: u64 = 0;
    let mut mode = String::from("normal");

    for line in stdin.lock().lines() {
        let line = line?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        match parts[0] {
            "uci" => {
                println!("id name MockEngine");
                println!("id author chess-session tests");
                println!("uciok");
            }
            "isready" => println!("readyok"),
            "ucinewgame" => pos = Chess::default(),
            "setoption" => {
                if let (Some(name), Some(value)) = parse_setoption(&parts) {
                    match name.as_str() {
                        "Delay" => delay_ms = value.parse().unwrap_or(0),
                        "Mode" => mode = value,
                        _ => {}
                    }
                }
            }
            "position" => pos = parse_position(&parts)?,
            "go" => {
                if delay_ms > 0 {
                    thread::sleep(Duration::from_millis(delay_ms));
                }
                match mode.as_str() {
                    "garbage" => println!("bestmove zzzzz"),
                    "nomove" => println!("bestmove (none)"),
                    "exit" => std::process::exit(0),
                    _ => match first_move(&pos) {
                        Some(uci) => println!("bestmove {uci}"),
                        None => println!("bestmove (none)"),
                    },
                }
            }
            "stop" => {}
            "quit" => break,
            _ => {}
        }
        stdout.flush()?;
    }
    Ok(())
}

// setoption name <Name...> value <Value...>
fn parse_setoption(parts: &[&str]) -> (Option<String>, Option<String>) {
    let name_idx = parts.iter().position(|&p| p == "name");
    let value_idx = parts.iter().position(|&p| p == "value");
    match (name_idx, value_idx) {
        (Some(n), Some(v)) if n < v => {
            (Some(parts[n + 1..v].join(" ")), Some(parts[v + 1..].join(" ")))
        }
        _ => (None, None),
    }
}

// position fen <fields...> [moves ...] | position startpos [moves ...]
fn parse_position(parts: &[&str]) -> anyhow::Result<Chess> {
    let moves_idx = parts.iter().position(|&p| p == "moves");
    let mut pos: Chess = if parts.get(1) == Some(&"fen") {
        let end = moves_idx.unwrap_or(parts.len());
        let fen = parts[2..end].join(" ");
        Fen::from_ascii(fen.as_bytes())?.into_position(CastlingMode::Standard)?
    } else {
        Chess::default()
    };
    if let Some(idx) = moves_idx {
        for token in &parts[idx + 1..] {
            let uci: Uci = token.parse()?;
            let m = uci.to_move(&pos)?;
            pos.play_unchecked(&m);
        }
    }
    Ok(pos)
}

fn first_move(pos: &Chess) -> Option<String> {
    pos.legal_moves()
        .iter()
        .map(|m| m.to_uci(CastlingMode::Standard).to_string())
        .min()
}
