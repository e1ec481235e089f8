use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use shakmaty::uci::Uci;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{timeout, timeout_at, Instant};

use crate::types::SearchLimits;

pub const SKILL_MAX: u8 = 20;

const INIT_TIMEOUT: Duration = Duration::from_secs(5);
const READY_TIMEOUT: Duration = Duration::from_secs(2);
const QUIT_GRACE: Duration = Duration::from_secs(1);

// Sentinel the reader task emits when the engine's stdout closes. Real UCI
// output is printable, so this cannot collide with a protocol line.
const EOF_MARKER: &str = "\u{4}";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to spawn engine process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),
    #[error("unparseable engine reply: {0:?}")]
    Protocol(String),
    #[error("engine process is not running")]
    Exited,
    #[error("skill level {0} is outside 0-{max}", max = SKILL_MAX)]
    InvalidSkillLevel(u8),
    #[error("engine command channel closed")]
    ChannelClosed,
}

pub fn validate_skill(skill: u8) -> Result<(), EngineError> {
    if skill > SKILL_MAX {
        Err(EngineError::InvalidSkillLevel(skill))
    } else {
        Ok(())
    }
}

/// Handle to one spawned UCI engine process. Cheap to clone; all clones share
/// the same child process and its pipes.
#[derive(Clone)]
pub struct UciEngine {
    stdin_tx: mpsc::Sender<String>,
    // Broadcast so a search in flight and a shutdown path can both listen.
    stdout: broadcast::Sender<String>,
    alive: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
    pub name: String,
    pub author: String,
}

impl UciEngine {
    pub async fn spawn(path: &str) -> Result<Self, EngineError> {
        let mut cmd = Command::new(path);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().expect("child stdin is piped");
        let stdout = child.stdout.take().expect("child stdout is piped");

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(100);
        let (stdout_tx, _) = broadcast::channel::<String>(100);
        let alive = Arc::new(AtomicBool::new(true));

        // Writer task
        tokio::spawn(async move {
            let mut writer = BufWriter::new(stdin);
            while let Some(cmd) = stdin_rx.recv().await {
                if writer.write_all(cmd.as_bytes()).await.is_err() {
                    break;
                }
                if !cmd.ends_with('\n') && writer.write_all(b"\n").await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        // Reader task
        let reader_tx = stdout_tx.clone();
        let reader_alive = alive.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = reader_tx.send(line);
            }
            reader_alive.store(false, Ordering::SeqCst);
            let _ = reader_tx.send(EOF_MARKER.to_string());
        });

        let mut engine = Self {
            stdin_tx,
            stdout: stdout_tx,
            alive,
            child: Arc::new(Mutex::new(Some(child))),
            name: String::new(),
            author: String::new(),
        };
        engine.handshake().await?;
        debug!("spawned engine {:?} by {:?} ({path})", engine.name, engine.author);
        Ok(engine)
    }

    async fn handshake(&mut self) -> Result<(), EngineError> {
        let mut rx = self.stdout.subscribe();
        self.send("uci".into()).await?;
        let deadline = Instant::now() + INIT_TIMEOUT;
        loop {
            let line = await_line(&mut rx, deadline, INIT_TIMEOUT).await?;
            if let Some(rest) = line.strip_prefix("id name ") {
                self.name = rest.to_string();
            } else if let Some(rest) = line.strip_prefix("id author ") {
                self.author = rest.to_string();
            } else if line.trim() == "uciok" {
                return Ok(());
            }
        }
    }

    pub async fn send(&self, cmd: String) -> Result<(), EngineError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(EngineError::Exited);
        }
        self.stdin_tx.send(cmd).await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Sets the engine's strength. Out-of-range values are rejected without
    /// sending anything, so the previously configured level stays in force.
    pub async fn configure(&self, skill: u8) -> Result<(), EngineError> {
        validate_skill(skill)?;
        self.send(format!("setoption name Skill Level value {skill}")).await
    }

    pub async fn new_game(&self) -> Result<(), EngineError> {
        self.send("ucinewgame".into()).await
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.send("stop".into()).await
    }

    /// Runs one search and waits for the bestmove line. Blocks the calling
    /// task until the engine answers or the hard timeout expires; the session
    /// runs this on a detached task so the UI side stays responsive.
    pub async fn request_best_move(
        &self,
        fen: &str,
        moves: &[String],
        limits: &SearchLimits,
    ) -> Result<Option<Uci>, EngineError> {
        let mut rx = self.stdout.subscribe();

        // The isready/readyok exchange also drains the bestmove of any
        // search abandoned by a session reset.
        self.send("isready".into()).await?;
        let ready_deadline = Instant::now() + READY_TIMEOUT;
        loop {
            let line = await_line(&mut rx, ready_deadline, READY_TIMEOUT).await?;
            if line.trim() == "readyok" {
                break;
            }
        }

        let mut pos_cmd = format!("position fen {fen} moves");
        for m in moves {
            pos_cmd.push(' ');
            pos_cmd.push_str(m);
        }
        self.send(pos_cmd).await?;
        self.send(limits.go_command()).await?;

        let budget = limits.hard_timeout();
        let deadline = Instant::now() + budget;
        loop {
            let line = match await_line(&mut rx, deadline, budget).await {
                Err(EngineError::Timeout(d)) => {
                    // Ask the engine to give up; the late bestmove will be
                    // drained by the next request's isready exchange.
                    let _ = self.send("stop".into()).await;
                    return Err(EngineError::Timeout(d));
                }
                other => other?,
            };
            if line.starts_with("bestmove") {
                return parse_bestmove(&line);
            }
        }
    }

    /// Graceful quit, then force-kill after a short grace period. Idempotent;
    /// the `kill_on_drop` flag set at spawn backstops every other exit path.
    pub async fn shutdown(&self) {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else { return };
        let _ = self.send("quit".into()).await;
        if timeout(QUIT_GRACE, child.wait()).await.is_err() {
            warn!("engine {:?} did not quit in time, killing it", self.name);
            let _ = child.kill().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn stub() -> (Self, mpsc::Receiver<String>, broadcast::Sender<String>) {
        let (stdin_tx, stdin_rx) = mpsc::channel(100);
        let (stdout_tx, _) = broadcast::channel(100);
        let engine = Self {
            stdin_tx,
            stdout: stdout_tx.clone(),
            alive: Arc::new(AtomicBool::new(true)),
            child: Arc::new(Mutex::new(None)),
            name: "stub".into(),
            author: String::new(),
        };
        (engine, stdin_rx, stdout_tx)
    }
}

async fn await_line(
    rx: &mut broadcast::Receiver<String>,
    deadline: Instant,
    budget: Duration,
) -> Result<String, EngineError> {
    loop {
        match timeout_at(deadline, rx.recv()).await {
            Err(_) => return Err(EngineError::Timeout(budget)),
            Ok(Err(broadcast::error::RecvError::Closed)) => return Err(EngineError::Exited),
            Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                warn!("dropped {n} engine output lines");
            }
            Ok(Ok(line)) if line == EOF_MARKER => return Err(EngineError::Exited),
            Ok(Ok(line)) => return Ok(line),
        }
    }
}

fn parse_bestmove(line: &str) -> Result<Option<Uci>, EngineError> {
    let mut parts = line.split_whitespace();
    parts.next(); // "bestmove"
    match parts.next() {
        None => Err(EngineError::Protocol(line.to_string())),
        Some("(none)") | Some("0000") => Ok(None),
        Some(token) => token
            .parse::<Uci>()
            .map(Some)
            .map_err(|_| EngineError::Protocol(line.to_string())),
    }
}
