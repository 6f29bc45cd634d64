use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use clap::{CommandFactory, Parser};
use crossbeam_channel::{unbounded, Receiver};
use tracing::debug;

use chess_script::engine::{EngineError, EngineSession};
use chess_script::runner::{RunError, RunEvent, Runner};
use chess_script::Script;

#[derive(Parser, Debug)]
#[command(name = "chess-script", about = "Run .chess scripts against a UCI engine", version)]
struct Args {
    /// Run a script headless
    #[arg(long, value_name = "FILE")]
    run: Option<PathBuf>,

    /// Run a script with the console presentation loop attached
    #[arg(long, value_name = "FILE")]
    gui: Option<PathBuf>,

    /// Enable verbose trace logging
    #[arg(long)]
    debug: bool,

    /// Path to the UCI engine binary
    #[arg(long, value_name = "PATH", default_value = "stockfish")]
    stockfish: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);

    let (path, gui_mode) = match (&args.run, &args.gui) {
        (Some(path), _) => (path.clone(), false),
        (None, Some(path)) => (path.clone(), true),
        (None, None) => {
            let _ = Args::command().print_help();
            return ExitCode::SUCCESS;
        }
    };

    if !path.exists() {
        eprintln!("File not found: {}", path.display());
        return ExitCode::FAILURE;
    }
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Cannot read {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };

    let script = Script::parse(&text);
    debug!(
        commands = script.commands.len(),
        pgn_blocks = script.pgn_blocks.len(),
        code_blocks = script.code_blocks.len(),
        "script parsed"
    );

    let session = EngineSession::spawn_uci(args.stockfish);
    let result = if gui_mode {
        run_with_presentation(session, &script)
    } else {
        Runner::new(session).run(&script)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Run failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) {
    let level = if debug { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Run the script on a worker thread with the console presentation loop on
/// this one, joined at completion. Presentation-init failure falls back to
/// a headless run.
fn run_with_presentation(session: EngineSession, script: &Script) -> Result<(), RunError> {
    let presentation = match Presentation::init() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Presentation unavailable: {e}");
            eprintln!("Falling back to headless run.");
            return Runner::new(session).run(script);
        }
    };

    let (tx, rx) = unbounded();
    let mut runner = Runner::new(session).with_observer(tx);
    let script = script.clone();
    let worker = thread::spawn(move || runner.run(&script));

    // The channel disconnects when the runner (and its sender) is dropped.
    presentation.pump(&rx);

    match worker.join() {
        Ok(result) => result,
        Err(_) => Err(RunError::Engine(EngineError::Protocol(
            "script thread panicked".to_string(),
        ))),
    }
}

/// Minimal console presentation: renders analysis events as they arrive.
struct Presentation;

impl Presentation {
    fn init() -> io::Result<Presentation> {
        if io::stdout().is_terminal() {
            Ok(Presentation)
        } else {
            Err(io::Error::new(io::ErrorKind::Unsupported, "stdout is not a terminal"))
        }
    }

    fn pump(&self, events: &Receiver<RunEvent>) {
        for event in events {
            match event {
                RunEvent::Analysis { depth, score, pv } => {
                    let score = score.map_or_else(|| "-".to_string(), |s| s.to_string());
                    println!("[analysis] depth {depth} | {score} | pv {}", pv.join(" "));
                }
            }
        }
    }
}
