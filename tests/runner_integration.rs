//! End-to-end runner tests against a scripted engine transport.
//!
//! No live engine binary is involved: the transport seam replays canned
//! UCI output and records every request, which lets the tests pin down the
//! exact conversation each script produces.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chess_script::engine::{EngineError, EngineSession, EngineTransport, SessionState};
use chess_script::runner::{RunError, RunEvent, Runner};
use chess_script::pgn::GameRecord;
use chess_script::Script;

const HANDSHAKE: [&str; 3] = ["id name Scripted", "uciok", "readyok"];

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

fn scripted_session(
    replies: &[&str],
) -> (EngineSession, Arc<Mutex<Vec<String>>>, Arc<AtomicUsize>) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let launches = Arc::new(AtomicUsize::new(0));
    let sent_handle = Arc::clone(&sent);
    let launches_handle = Arc::clone(&launches);
    let mut replies: Option<VecDeque<String>> =
        Some(replies.iter().map(|s| (*s).to_string()).collect());
    let session = EngineSession::with_launcher(Box::new(move || {
        launches_handle.fetch_add(1, Ordering::SeqCst);
        let replies = replies.take().expect("engine launched twice");
        Ok(Box::new(ScriptedTransport { replies, sent: Arc::clone(&sent_handle) })
            as Box<dyn EngineTransport>)
    }));
    (session, sent, launches)
}

/// Harness around a runner wired to a scripted engine.
struct Fixture {
    sent: Arc<Mutex<Vec<String>>>,
    launches: Arc<AtomicUsize>,
    runner: Runner,
}

impl Fixture {
    fn new(replies: &[&str]) -> Fixture {
        let (session, sent, launches) = scripted_session(replies);
        Fixture { sent, launches, runner: Runner::new(session) }
    }

    fn run(&mut self, text: &str) -> Result<(), RunError> {
        self.runner.run(&Script::parse(text))
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn go_requests(&self) -> Vec<String> {
        self.sent().into_iter().filter(|l| l.starts_with("go ")).collect()
    }
}

fn temp_pgn_path(tag: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("chess-script-{tag}-{}.pgn", std::process::id()));
    path
}

#[test]
fn empty_script_never_starts_a_session() {
    let mut fx = Fixture::new(&[]);
    fx.run("").expect("empty run succeeds");
    assert_eq!(fx.launches.load(Ordering::SeqCst), 0);
}

#[test]
fn non_engine_content_never_starts_a_session() {
    let mut fx = Fixture::new(&[]);
    let text = "<<PGN>>\n1. e4 *\n<</PGN>>\n<<PY>>\npush e7e5\nfen\n<</PY>>\n";
    fx.run(text).expect("run succeeds");
    assert_eq!(fx.launches.load(Ordering::SeqCst), 0);
    assert_eq!(fx.runner.board().history().len(), 1);
}

#[test]
fn commands_execute_in_textual_order() {
    let mut replies: Vec<&str> = HANDSHAKE.to_vec();
    replies.extend([
        "bestmove e2e4",
        "info depth 3 score cp 20 pv e7e5",
        "bestmove e7e5",
        "bestmove e7e5",
    ]);
    let mut fx = Fixture::new(&replies);
    fx.run("play side=white time=0.05\nanalyze depth=3\nplay side=black time=0.05\n")
        .expect("run succeeds");
    assert_eq!(fx.go_requests(), vec!["go movetime 50", "go depth 3", "go movetime 50"]);
    assert_eq!(fx.runner.board().history().len(), 2);
}

#[test]
fn session_is_started_lazily_and_once() {
    let mut replies: Vec<&str> = HANDSHAKE.to_vec();
    replies.extend(["bestmove e2e4", "bestmove e7e5"]);
    let mut fx = Fixture::new(&replies);
    fx.run("play side=both\nplay side=both\n").expect("run succeeds");
    assert_eq!(fx.launches.load(Ordering::SeqCst), 1);
    assert_eq!(fx.runner.session().state(), SessionState::Stopped);
}

#[test]
fn play_both_applies_exactly_one_move() {
    let mut replies: Vec<&str> = HANDSHAKE.to_vec();
    replies.push("bestmove g1f3");
    let mut fx = Fixture::new(&replies);
    fx.run("play side=both time=0.05\n").expect("run succeeds");
    assert_eq!(fx.runner.board().history().len(), 1);
}

#[test]
fn play_for_the_wrong_side_skips_without_mutation() {
    let mut fx = Fixture::new(&HANDSHAKE);
    fx.run("play side=black time=0.05\n").expect("run succeeds");
    // The session comes up, but no search request is ever issued.
    assert_eq!(fx.launches.load(Ordering::SeqCst), 1);
    assert!(fx.go_requests().is_empty());
    assert!(fx.runner.board().history().is_empty());
}

#[test]
fn analyze_on_a_checkmate_position_skips_the_engine_call() {
    // Fool's mate: white is already mated when the commands run.
    let text = "<<PGN>>\n1. f3 e5 2. g4 Qh4# 0-1\n<</PGN>>\nanalyze depth=1\n";
    let mut fx = Fixture::new(&HANDSHAKE);
    fx.run(text).expect("run succeeds");
    assert!(fx.go_requests().is_empty());
}

#[test]
fn play_on_a_terminal_position_returns_no_move() {
    let text = "<<PGN>>\n1. f3 e5 2. g4 Qh4# 0-1\n<</PGN>>\nplay side=both\n";
    let mut fx = Fixture::new(&HANDSHAKE);
    fx.run(text).expect("run succeeds");
    assert!(fx.go_requests().is_empty());
    assert!(fx.runner.board().history().is_empty());
}

#[test]
fn engine_no_move_reply_is_reported_not_fatal() {
    let mut replies: Vec<&str> = HANDSHAKE.to_vec();
    replies.push("bestmove (none)");
    let mut fx = Fixture::new(&replies);
    fx.run("play side=both\n").expect("run succeeds");
    assert!(fx.runner.board().history().is_empty());
}

#[test]
fn undecodable_pgn_block_is_skipped() {
    let text = "<<PGN>>\n1. e9 xx *\n<</PGN>>\n<<PGN>>\n1. d4 d5 *\n<</PGN>>\n";
    let mut fx = Fixture::new(&[]);
    fx.run(text).expect("run succeeds");
    // Only the second block loads; the board sits at its final position.
    assert!(fx.runner.board().fen().starts_with("rnbqkbnr/ppp1pppp/8/3p4/3P4/8"));
}

#[test]
fn last_pgn_block_wins() {
    let text = "<<PGN>>\n1. e4 *\n<</PGN>>\n<<PGN>>\n1. d4 *\n<</PGN>>\n";
    let mut fx = Fixture::new(&[]);
    fx.run(text).expect("run succeeds");
    assert!(fx.runner.board().fen().contains("3P4"));
}

#[test]
fn export_without_records_synthesizes_from_history() {
    let mut replies: Vec<&str> = HANDSHAKE.to_vec();
    replies.extend(["bestmove e2e4", "bestmove e7e5"]);
    let path = temp_pgn_path("synth");
    let text = format!("play side=both\nplay side=both\nexport filename={}\n", path.display());
    let mut fx = Fixture::new(&replies);
    fx.run(&text).expect("run succeeds");

    let exported = std::fs::read_to_string(&path).expect("export written");
    std::fs::remove_file(&path).ok();
    let record = GameRecord::decode(&exported).expect("exported record decodes");
    assert_eq!(record.moves().len(), 2);
    // Round trip: the re-decoded principal line replays to the live position.
    let replayed = record.final_position();
    assert_eq!(
        shakmaty::fen::Fen::from_position(replayed, shakmaty::EnPassantMode::Legal).to_string(),
        fx.runner.board().fen()
    );
}

#[test]
fn export_with_loaded_records_writes_them_in_load_order() {
    let path = temp_pgn_path("records");
    let text = format!(
        "<<PGN>>\n[Event \"First\"]\n\n1. e4 *\n<</PGN>>\n<<PGN>>\n[Event \"Second\"]\n\n1. d4 *\n<</PGN>>\nexport filename={}\n",
        path.display()
    );
    let mut fx = Fixture::new(&[]);
    fx.run(&text).expect("run succeeds");

    let exported = std::fs::read_to_string(&path).expect("export written");
    std::fs::remove_file(&path).ok();
    let first = exported.find("[Event \"First\"]").expect("first record present");
    let second = exported.find("[Event \"Second\"]").expect("second record present");
    assert!(first < second);
}

#[test]
fn scenario_analyze_play_export_single_ply() {
    let mut replies: Vec<&str> = HANDSHAKE.to_vec();
    replies.extend(["info depth 10 score cp 31 pv e2e4 e7e5", "bestmove e2e4", "bestmove e2e4"]);
    let path = temp_pgn_path("scenario");
    let text = format!(
        "analyze depth=10\nplay side=white time=0.1\nexport filename={}\n",
        path.display()
    );
    let mut fx = Fixture::new(&replies);
    fx.run(&text).expect("run succeeds");

    assert_eq!(fx.go_requests(), vec!["go depth 10", "go movetime 100"]);
    let exported = std::fs::read_to_string(&path).expect("export written");
    std::fs::remove_file(&path).ok();
    let record = GameRecord::decode(&exported).expect("one decodable unit");
    assert_eq!(record.moves().len(), 1);
}

#[test]
fn unknown_commands_do_not_stop_the_run() {
    let mut replies: Vec<&str> = HANDSHAKE.to_vec();
    replies.push("bestmove e2e4");
    let mut fx = Fixture::new(&replies);
    fx.run("frobnicate depth=9\nplay side=both\n").expect("run succeeds");
    assert_eq!(fx.runner.board().history().len(), 1);
}

#[test]
fn code_block_failure_does_not_stop_later_blocks() {
    let text = "<<PY>>\npush e2e4\nexplode\n<</PY>>\n<<PY>>\npush e7e5\n<</PY>>\n";
    let mut fx = Fixture::new(&[]);
    fx.run(text).expect("run succeeds");
    // First block's applied move survives its failure; second block ran.
    assert_eq!(fx.runner.board().history().len(), 2);
}

#[test]
fn transport_failure_mid_run_aborts_and_stops_the_session() {
    // One bestmove, then the stream ends: the second play hits a closed pipe.
    let mut replies: Vec<&str> = HANDSHAKE.to_vec();
    replies.push("bestmove e2e4");
    let mut fx = Fixture::new(&replies);
    let err = fx.run("play side=both\nplay side=both\n").expect_err("run aborts");
    assert!(matches!(err, RunError::Engine(_)));
    assert_eq!(fx.runner.session().state(), SessionState::Stopped);
    // The first command's board mutation is kept.
    assert_eq!(fx.runner.board().history().len(), 1);
}

#[test]
fn missing_engine_binary_is_a_config_error() {
    let session = EngineSession::with_launcher(Box::new(|| {
        Err(EngineError::Config {
            path: "/nonexistent/stockfish".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        })
    }));
    let mut runner = Runner::new(session);
    let err = runner.run(&Script::parse("analyze depth=1\n")).expect_err("fatal");
    assert!(matches!(err, RunError::Engine(EngineError::Config { .. })));
}

#[test]
fn observer_receives_analysis_events() {
    let mut replies: Vec<&str> = HANDSHAKE.to_vec();
    replies.extend(["info depth 2 score cp 15 pv d2d4", "bestmove d2d4"]);
    let (tx, rx) = crossbeam_channel::unbounded();
    let (session, _, _) = scripted_session(&replies);
    let mut runner = Runner::new(session).with_observer(tx);
    runner.run(&Script::parse("analyze depth=2\n")).expect("run succeeds");
    let RunEvent::Analysis { depth, score, pv } = rx.try_recv().expect("event forwarded");
    assert_eq!(depth, 2);
    assert!(score.is_some());
    assert_eq!(pv, vec!["d2d4"]);
}

#[test]
fn dead_observer_is_tolerated() {
    let mut replies: Vec<&str> = HANDSHAKE.to_vec();
    replies.extend(["info depth 2 score cp 15 pv d2d4", "bestmove d2d4"]);
    let (tx, rx) = crossbeam_channel::unbounded();
    drop(rx);
    let (session, _, _) = scripted_session(&replies);
    let mut runner = Runner::new(session).with_observer(tx);
    runner
        .run(&Script::parse("analyze depth=2\n"))
        .expect("run succeeds despite dead observer");
}

#[test]
fn analyze_side_option_is_inert() {
    // `side` is accepted but must not change the request: the engine is
    // asked about the position as-is in both cases.
    for side in ["white", "black"] {
        let mut replies: Vec<&str> = HANDSHAKE.to_vec();
        replies.extend(["info depth 1 score cp 0 pv e2e4", "bestmove e2e4"]);
        let mut fx = Fixture::new(&replies);
        fx.run(&format!("analyze depth=1 side={side}\n")).expect("run succeeds");
        assert_eq!(fx.go_requests(), vec!["go depth 1"]);
    }
}
