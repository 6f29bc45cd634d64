//! External engine process management.
//!
//! [`EngineSession`] owns one UCI engine for the duration of a script run
//! and walks the lifecycle `Uninitialized → Starting → Ready → (Busy →
//! Ready)* → Stopped`. The transport is a trait seam so the state machine
//! can be exercised against a scripted peer; the production transport pipes
//! a spawned engine binary's stdin/stdout.
//!
//! There is no retry policy: a transport failure mid-call tears the session
//! down and propagates, and a stopped session is never restarted.

use std::fmt;
use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

pub mod protocol;

pub use protocol::{Analysis, Score};

/// How long to wait for the engine to exit after `quit` before killing it.
const QUIT_GRACE_MS: u64 = 500;
const QUIT_POLL_MS: u64 = 10;

/// Errors from engine lifecycle and communication.
#[derive(Debug)]
pub enum EngineError {
    /// The engine binary could not be spawned. Fatal to the run.
    Config { path: String, source: io::Error },
    /// The transport failed mid-session.
    Io(io::Error),
    /// The engine violated the expected conversation (e.g. closed the pipe
    /// before answering).
    Protocol(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Config { path, source } => {
                write!(f, "cannot start engine '{path}': {source}")
            }
            EngineError::Io(e) => write!(f, "engine communication failed: {e}"),
            EngineError::Protocol(msg) => write!(f, "engine protocol error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Config { source, .. } => Some(source),
            EngineError::Io(e) => Some(e),
            EngineError::Protocol(_) => None,
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(e: io::Error) -> Self {
        EngineError::Io(e)
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Starting,
    Ready,
    Busy,
    Stopped,
}

/// Line-oriented channel to the engine process.
pub trait EngineTransport: Send {
    /// Send one request line (without trailing newline).
    fn send(&mut self, line: &str) -> io::Result<()>;

    /// Receive the next response line, `None` at end of stream.
    fn recv(&mut self) -> io::Result<Option<String>>;

    /// Best-effort teardown after `quit` has been sent.
    fn shutdown(&mut self) {}
}

type Launcher = Box<dyn FnMut() -> Result<Box<dyn EngineTransport>, EngineError> + Send>;

/// Lifecycle wrapper around one external engine process.
pub struct EngineSession {
    state: SessionState,
    transport: Option<Box<dyn EngineTransport>>,
    launcher: Launcher,
}

impl EngineSession {
    /// A session that will spawn `path` as a UCI engine on first start.
    #[must_use]
    pub fn spawn_uci(path: impl Into<String>) -> EngineSession {
        let path = path.into();
        EngineSession::with_launcher(Box::new(move || {
            ProcessTransport::spawn(&path).map(|t| Box::new(t) as Box<dyn EngineTransport>)
        }))
    }

    /// A session over an arbitrary transport factory. This is the seam the
    /// tests use to run the state machine against a scripted peer.
    #[must_use]
    pub fn with_launcher(launcher: Launcher) -> EngineSession {
        EngineSession { state: SessionState::Uninitialized, transport: None, launcher }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True when requests can be issued without further setup.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Launch the engine and perform the `uci`/`isready` handshake.
    ///
    /// Idempotent while the session is live; an error once the session has
    /// been stopped (it is never restarted within a run).
    pub fn start(&mut self) -> Result<(), EngineError> {
        match self.state {
            SessionState::Ready | SessionState::Busy => return Ok(()),
            SessionState::Stopped => {
                return Err(EngineError::Protocol("session already stopped".to_string()));
            }
            SessionState::Uninitialized | SessionState::Starting => {}
        }

        self.state = SessionState::Starting;
        let transport = (self.launcher)().map_err(|e| {
            self.state = SessionState::Uninitialized;
            e
        })?;
        self.transport = Some(transport);

        if let Err(e) = self.handshake() {
            warn!(%e, "engine handshake failed");
            self.teardown();
            return Err(e);
        }
        self.state = SessionState::Ready;
        debug!("engine session ready");
        Ok(())
    }

    fn handshake(&mut self) -> Result<(), EngineError> {
        self.send("uci")?;
        self.recv_until(|line| line == "uciok")?;
        self.send("isready")?;
        self.recv_until(|line| line == "readyok")?;
        Ok(())
    }

    /// Depth-bounded analysis of `fen`. Blocks until the engine reports
    /// `bestmove`; the returned [`Analysis`] carries the last score and PV
    /// seen on the way.
    pub fn analyze(&mut self, fen: &str, depth: u32) -> Result<Analysis, EngineError> {
        self.request(fen, &format!("go depth {depth}")).map(|(analysis, _)| analysis)
    }

    /// Time-bounded best-move request for `fen`. `None` is the engine's
    /// explicit no-legal-move signal.
    pub fn best_move(&mut self, fen: &str, movetime_ms: u64) -> Result<Option<String>, EngineError> {
        self.request(fen, &format!("go movetime {movetime_ms}")).map(|(_, best)| best)
    }

    fn request(&mut self, fen: &str, go: &str) -> Result<(Analysis, Option<String>), EngineError> {
        if self.state != SessionState::Ready {
            return Err(EngineError::Protocol(format!(
                "request issued in state {:?}",
                self.state
            )));
        }
        self.state = SessionState::Busy;
        let outcome = self.converse(fen, go);
        match outcome {
            Ok(result) => {
                self.state = SessionState::Ready;
                Ok(result)
            }
            Err(e) => {
                // A failed exchange leaves the conversation in an unknown
                // state; the session is unusable from here on.
                self.teardown();
                Err(e)
            }
        }
    }

    fn converse(&mut self, fen: &str, go: &str) -> Result<(Analysis, Option<String>), EngineError> {
        self.send(&format!("position fen {fen}"))?;
        self.send(go)?;
        let mut analysis = Analysis::default();
        loop {
            let line = self.recv_line()?;
            if let Some(best) = protocol::parse_bestmove(&line) {
                return Ok((analysis, best));
            }
            if let Some(info) = protocol::parse_info(&line) {
                analysis.absorb(info);
            }
        }
    }

    /// Graceful shutdown. Callable from any state, swallows every failure,
    /// always leaves the session `Stopped`.
    pub fn stop(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        if self.transport.is_some() {
            if let Err(e) = self.send("quit") {
                debug!(%e, "quit not delivered");
            }
        }
        self.teardown();
        debug!("engine session stopped");
    }

    fn teardown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown();
        }
        self.state = SessionState::Stopped;
    }

    fn send(&mut self, line: &str) -> Result<(), EngineError> {
        debug!(request = line, "-> engine");
        self.active()?.send(line)?;
        Ok(())
    }

    fn recv_line(&mut self) -> Result<String, EngineError> {
        match self.active()?.recv()? {
            Some(line) => {
                debug!(response = %line, "<- engine");
                Ok(line)
            }
            None => Err(EngineError::Protocol("engine closed the pipe".to_string())),
        }
    }

    fn recv_until(&mut self, done: impl Fn(&str) -> bool) -> Result<(), EngineError> {
        loop {
            if done(self.recv_line()?.trim()) {
                return Ok(());
            }
        }
    }

    fn active(&mut self) -> Result<&mut dyn EngineTransport, EngineError> {
        match self.transport.as_deref_mut() {
            Some(t) => Ok(t),
            None => Err(EngineError::Protocol("no live engine process".to_string())),
        }
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        // Normal runs stop explicitly; this covers early-exit paths.
        self.stop();
    }
}

/// Transport over a spawned engine process's standard streams.
pub struct ProcessTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ProcessTransport {
    /// Spawn `path` with piped stdin/stdout. A spawn failure is a
    /// configuration error (binary missing or not executable).
    pub fn spawn(path: &str) -> Result<ProcessTransport, EngineError> {
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| EngineError::Config { path: path.to_string(), source })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stdout unavailable".to_string()))?;
        debug!(path, "spawned engine process");
        Ok(ProcessTransport { child, stdin, stdout: BufReader::new(stdout) })
    }
}

impl EngineTransport for ProcessTransport {
    fn send(&mut self, line: &str) -> io::Result<()> {
        self.stdin.write_all(line.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()
    }

    fn recv(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end().to_string()))
    }

    fn shutdown(&mut self) {
        let mut waited = 0;
        while waited < QUIT_GRACE_MS {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => {
                    thread::sleep(Duration::from_millis(QUIT_POLL_MS));
                    waited += QUIT_POLL_MS;
                }
                Err(_) => break,
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Transport that replays canned engine output and records requests.
    struct ScriptedTransport {
        replies: VecDeque<String>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl EngineTransport for ScriptedTransport {
        fn send(&mut self, line: &str) -> io::Result<()> {
            self.sent.lock().unwrap().push(line.to_string());
            Ok(())
        }

        fn recv(&mut self) -> io::Result<Option<String>> {
            Ok(self.replies.pop_front())
        }
    }

    fn scripted(replies: &[&str]) -> (EngineSession, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent_handle = Arc::clone(&sent);
        let mut replies: Option<VecDeque<String>> =
            Some(replies.iter().map(|s| (*s).to_string()).collect());
        let session = EngineSession::with_launcher(Box::new(move || {
            let replies = replies.take().expect("launcher called twice");
            Ok(Box::new(ScriptedTransport { replies, sent: Arc::clone(&sent_handle) }))
        }));
        (session, sent)
    }

    const HANDSHAKE: [&str; 3] = ["id name Scripted", "uciok", "readyok"];

    #[test]
    fn start_performs_handshake() {
        let (mut session, sent) = scripted(&HANDSHAKE);
        assert_eq!(session.state(), SessionState::Uninitialized);
        session.start().expect("handshake");
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(*sent.lock().unwrap(), vec!["uci", "isready"]);
    }

    #[test]
    fn start_is_idempotent_when_ready() {
        let (mut session, sent) = scripted(&HANDSHAKE);
        session.start().expect("handshake");
        session.start().expect("no-op");
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn start_after_stop_is_an_error() {
        let (mut session, _) = scripted(&HANDSHAKE);
        session.start().expect("handshake");
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.start().is_err());
    }

    #[test]
    fn analyze_collects_last_score_and_pv() {
        let mut replies: Vec<&str> = HANDSHAKE.to_vec();
        replies.extend([
            "info depth 1 score cp 20 pv e2e4",
            "info depth 2 score cp 31 pv e2e4 e7e5",
            "bestmove e2e4",
        ]);
        let (mut session, sent) = scripted(&replies);
        session.start().expect("handshake");
        let analysis = session
            .analyze("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1", 2)
            .expect("analysis");
        assert_eq!(analysis.score, Some(Score::Cp(31)));
        assert_eq!(analysis.pv, vec!["e2e4", "e7e5"]);
        let sent = sent.lock().unwrap();
        assert!(sent[2].starts_with("position fen rnbqkbnr"));
        assert_eq!(sent[3], "go depth 2");
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn best_move_none_is_reported() {
        let mut replies: Vec<&str> = HANDSHAKE.to_vec();
        replies.push("bestmove (none)");
        let (mut session, _) = scripted(&replies);
        session.start().expect("handshake");
        let best = session.best_move("8/8/8/8/8/8/8/k1K5 b - - 0 1", 50).expect("reply");
        assert_eq!(best, None);
    }

    #[test]
    fn pipe_close_mid_request_is_a_protocol_error_and_stops_session() {
        let mut replies: Vec<&str> = HANDSHAKE.to_vec();
        replies.push("info depth 1 score cp 0 pv e2e4");
        // No bestmove: the stream ends here.
        let (mut session, _) = scripted(&replies);
        session.start().expect("handshake");
        let err = session.analyze("fen", 4).expect_err("pipe closed");
        assert!(matches!(err, EngineError::Protocol(_)));
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[test]
    fn request_without_start_is_an_error() {
        let (mut session, _) = scripted(&HANDSHAKE);
        assert!(session.best_move("fen", 10).is_err());
    }

    #[test]
    fn stop_from_uninitialized_is_safe_and_final() {
        let (mut session, sent) = scripted(&HANDSHAKE);
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(sent.lock().unwrap().is_empty());
        // Second stop stays silent.
        session.stop();
    }

    #[test]
    fn launcher_failure_is_a_config_error() {
        let mut session = EngineSession::with_launcher(Box::new(|| {
            Err(EngineError::Config {
                path: "missing".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
            })
        }));
        let err = session.start().expect_err("spawn fails");
        assert!(matches!(err, EngineError::Config { .. }));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }
}
