//! Script execution.
//!
//! [`Runner`] owns the board state and the engine session for one script
//! run. It loads PGN blocks, dispatches commands in textual order, evaluates
//! code blocks in a restricted context, and stops the session exactly once
//! at the end regardless of how the run went.

use std::fmt;
use std::fs::File;
use std::io;

use crossbeam_channel::Sender;
use shakmaty::fen::Fen;
use shakmaty::uci::Uci;
use shakmaty::{Chess, Color, EnPassantMode, Move, Position};
use tracing::{debug, warn};

use crate::engine::{EngineError, EngineSession, Score};
use crate::outcome;
use crate::pgn::GameRecord;
use crate::script::{Command, Script};

pub mod eval;

/// Errors that abort a run. Everything else is reported and skipped.
#[derive(Debug)]
pub enum RunError {
    Engine(EngineError),
    Export { filename: String, source: io::Error },
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Engine(e) => write!(f, "{e}"),
            RunError::Export { filename, source } => {
                write!(f, "cannot export to '{filename}': {source}")
            }
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Engine(e) => Some(e),
            RunError::Export { source, .. } => Some(source),
        }
    }
}

impl From<EngineError> for RunError {
    fn from(e: EngineError) -> Self {
        RunError::Engine(e)
    }
}

/// Failed attempt to apply a move to the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveError {
    Unparseable(String),
    Illegal(String),
}

impl fmt::Display for MoveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveError::Unparseable(mv) => write!(f, "unparseable move '{mv}'"),
            MoveError::Illegal(mv) => write!(f, "illegal move '{mv}'"),
        }
    }
}

impl std::error::Error for MoveError {}

/// Side selector for the `play` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    White,
    Black,
    Both,
}

impl Side {
    /// Parse a side option value; anything unrecognized falls back to
    /// `default` with a warning.
    #[must_use]
    pub fn parse_or(raw: &str, default: Side) -> Side {
        match raw.to_ascii_lowercase().as_str() {
            "white" => Side::White,
            "black" => Side::Black,
            "both" => Side::Both,
            _ => {
                warn!(value = raw, "unknown side, using {default}");
                default
            }
        }
    }

    fn matches(self, color: Color) -> bool {
        match self {
            Side::White => color == Color::White,
            Side::Black => color == Color::Black,
            Side::Both => true,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::White => "white",
            Side::Black => "black",
            Side::Both => "both",
        })
    }
}

/// Event stream from the runner to an optional presentation loop.
///
/// The channel is strictly one-directional and send failures are ignored, so
/// a dead or broken presentation side can never affect the run.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Analysis { depth: u32, score: Option<Score>, pv: Vec<String> },
}

/// The live position plus the moves applied to it since it was seeded.
#[derive(Debug, Clone)]
pub struct BoardState {
    initial: Chess,
    position: Chess,
    history: Vec<Move>,
}

impl Default for BoardState {
    fn default() -> Self {
        BoardState::new()
    }
}

impl BoardState {
    /// Standard initial position, empty history.
    #[must_use]
    pub fn new() -> BoardState {
        BoardState { initial: Chess::default(), position: Chess::default(), history: Vec::new() }
    }

    /// Re-seed the board; the previous history is discarded.
    pub fn set_position(&mut self, pos: Chess) {
        self.initial = pos.clone();
        self.position = pos;
        self.history.clear();
    }

    #[must_use]
    pub fn position(&self) -> &Chess {
        &self.position
    }

    #[must_use]
    pub fn initial(&self) -> &Chess {
        &self.initial
    }

    #[must_use]
    pub fn history(&self) -> &[Move] {
        &self.history
    }

    #[must_use]
    pub fn fen(&self) -> String {
        Fen::from_position(self.position.clone(), EnPassantMode::Legal).to_string()
    }

    #[must_use]
    pub fn side_to_move(&self) -> Color {
        self.position.turn()
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        outcome::is_terminal(&self.position)
    }

    /// Current result token (`*` while the game is open).
    #[must_use]
    pub fn result(&self) -> &'static str {
        outcome::result_token(&self.position)
    }

    /// Apply a move given in UCI notation, checking legality.
    pub fn push_uci(&mut self, uci: &str) -> Result<Move, MoveError> {
        let parsed: Uci =
            uci.parse().map_err(|_| MoveError::Unparseable(uci.to_string()))?;
        let mv = parsed
            .to_move(&self.position)
            .map_err(|_| MoveError::Illegal(uci.to_string()))?;
        self.position.play_unchecked(&mv);
        self.history.push(mv.clone());
        Ok(mv)
    }

    /// Undo the most recently applied move by replaying the history from
    /// the seed position. `None` if there is nothing to undo.
    pub fn pop(&mut self) -> Option<Move> {
        let undone = self.history.pop()?;
        let mut pos = self.initial.clone();
        for mv in &self.history {
            pos.play_unchecked(mv);
        }
        self.position = pos;
        Some(undone)
    }
}

/// Executes one parsed script against one engine session.
pub struct Runner {
    session: EngineSession,
    observer: Option<Sender<RunEvent>>,
    board: BoardState,
    records: Vec<GameRecord>,
}

impl Runner {
    #[must_use]
    pub fn new(session: EngineSession) -> Runner {
        Runner { session, observer: None, board: BoardState::new(), records: Vec::new() }
    }

    /// Attach a presentation channel.
    #[must_use]
    pub fn with_observer(mut self, observer: Sender<RunEvent>) -> Runner {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn board(&self) -> &BoardState {
        &self.board
    }

    #[must_use]
    pub fn session(&self) -> &EngineSession {
        &self.session
    }

    /// Execute the script: PGN blocks, then commands, then code blocks.
    /// The engine session is stopped on every path out of here.
    pub fn run(&mut self, script: &Script) -> Result<(), RunError> {
        let outcome = self.run_inner(script);
        self.session.stop();
        outcome
    }

    fn run_inner(&mut self, script: &Script) -> Result<(), RunError> {
        for block in &script.pgn_blocks {
            match GameRecord::decode(block) {
                Some(record) => {
                    self.board.set_position(record.final_position());
                    self.records.push(record);
                }
                None => warn!("skipping undecodable PGN block"),
            }
        }
        debug!(fen = %self.board.fen(), "board seeded");

        for command in &script.commands {
            self.dispatch(command)?;
        }

        for (index, block) in script.code_blocks.iter().enumerate() {
            if let Err(e) = eval::eval_block(block, &mut self.board, &mut self.session) {
                println!("Error in code block {}: {e}", index + 1);
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, command: &Command) -> Result<(), RunError> {
        debug!(%command, "dispatching");
        match command.name.as_str() {
            "analyze" => self.cmd_analyze(command),
            "play" => self.cmd_play(command),
            "export" => self.cmd_export(command),
            other => {
                println!("Unknown command: {other}");
                Ok(())
            }
        }
    }

    fn cmd_analyze(&mut self, command: &Command) -> Result<(), RunError> {
        let depth = command.int_or("depth", 12);
        // Accepted for forward compatibility; the engine is always asked
        // about the side to move.
        let side = Side::parse_or(command.text_or("side", "both"), Side::Both);
        debug!(%side, "analyze side option is inert");
        let output = command.text_or("output", "console");
        if output != "console" {
            debug!(output, "unsupported analyze output, writing to console");
        }

        self.session.start()?;
        if self.board.is_terminal() {
            println!("Game over detected: {}", self.board.result());
            return Ok(());
        }

        let analysis = self.session.analyze(&self.board.fen(), depth)?;
        match analysis.score {
            Some(score) => println!("Analysis (depth {depth}): {score}"),
            None => println!("Analysis (depth {depth}): no score reported"),
        }
        if !analysis.pv.is_empty() {
            println!("PV: {}", analysis.pv.join(" "));
        }
        if let Some(observer) = &self.observer {
            // A gone presentation side must not affect the run.
            let _ = observer.send(RunEvent::Analysis {
                depth,
                score: analysis.score,
                pv: analysis.pv,
            });
        }
        Ok(())
    }

    fn cmd_play(&mut self, command: &Command) -> Result<(), RunError> {
        let side = Side::parse_or(command.text_or("side", "white"), Side::White);
        let seconds = command.float_or("time", 0.1).max(0.0);
        let movetime_ms = (seconds * 1000.0) as u64;

        self.session.start()?;
        if self.board.is_terminal() {
            println!("Game over detected: {}", self.board.result());
            return Ok(());
        }
        if !side.matches(self.board.side_to_move()) {
            println!("Not {side}'s turn. Skipping move.");
            return Ok(());
        }

        match self.session.best_move(&self.board.fen(), movetime_ms)? {
            Some(uci) => {
                self.board.push_uci(&uci).map_err(|e| {
                    RunError::Engine(EngineError::Protocol(format!(
                        "engine returned unplayable move: {e}"
                    )))
                })?;
                println!("Played move: {uci}");
            }
            None => println!("No legal move available. Game over."),
        }
        Ok(())
    }

    fn cmd_export(&mut self, command: &Command) -> Result<(), RunError> {
        let filename = command.text_or("filename", "export.pgn");
        let export = |source| RunError::Export { filename: filename.to_string(), source };

        let mut file = File::create(filename).map_err(export)?;
        if self.records.is_empty() {
            let record =
                GameRecord::from_moves(self.board.initial().clone(), self.board.history().to_vec());
            record.encode(&mut file).map_err(export)?;
        } else {
            for record in &self.records {
                record.encode(&mut file).map_err(export)?;
            }
        }
        println!("Exported {filename}");
        Ok(())
    }
}
