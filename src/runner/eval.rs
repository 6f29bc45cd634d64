//! Restricted evaluator for embedded code blocks.
//!
//! A block is a sequence of statements, one per line, evaluated against an
//! enumerated capability set: board queries and mutations, and queries
//! through the engine session if one is live. There is deliberately no
//! general expression language here.
//!
//! | statement | effect |
//! |---|---|
//! | `print <args…>` | echo the arguments |
//! | `fen` | print the current position's FEN |
//! | `turn` | print the side to move |
//! | `moves` | print the legal moves in UCI notation |
//! | `push <uci>…` | apply one or more moves |
//! | `pop` | undo the most recent applied move |
//! | `analyze [depth=n]` | depth-bound engine query (live session only) |
//! | `bestmove [time=secs]` | time-bound engine query (live session only) |
//!
//! The first failing statement aborts its block; moves already applied stay
//! applied.

use std::fmt;

use shakmaty::{CastlingMode, Color, Position};

use crate::engine::EngineSession;
use crate::script::lexer;

use super::BoardState;

/// Failure inside a code block, reported with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for EvalError {}

/// Evaluate one block against the live board and session.
pub fn eval_block(
    source: &str,
    board: &mut BoardState,
    session: &mut EngineSession,
) -> Result<(), EvalError> {
    for (index, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fail = |message: String| EvalError { line: index + 1, message };
        let tokens = lexer::split_words(line).map_err(|e| fail(e.to_string()))?;
        let Some((statement, args)) = tokens.split_first() else {
            continue;
        };
        eval_statement(statement, args, board, session).map_err(fail)?;
    }
    Ok(())
}

fn eval_statement(
    statement: &str,
    args: &[String],
    board: &mut BoardState,
    session: &mut EngineSession,
) -> Result<(), String> {
    match statement {
        "print" => {
            println!("{}", args.join(" "));
            Ok(())
        }
        "fen" => {
            println!("{}", board.fen());
            Ok(())
        }
        "turn" => {
            println!(
                "{}",
                match board.side_to_move() {
                    Color::White => "white",
                    Color::Black => "black",
                }
            );
            Ok(())
        }
        "moves" => {
            let moves: Vec<String> = board
                .position()
                .legal_moves()
                .iter()
                .map(|mv| mv.to_uci(CastlingMode::Standard).to_string())
                .collect();
            println!("{}", moves.join(" "));
            Ok(())
        }
        "push" => {
            if args.is_empty() {
                return Err("push needs at least one move".to_string());
            }
            for uci in args {
                board.push_uci(uci).map_err(|e| e.to_string())?;
            }
            Ok(())
        }
        "pop" => match board.pop() {
            Some(_) => Ok(()),
            None => Err("nothing to pop".to_string()),
        },
        "analyze" => {
            let depth = keyword_arg(args, "depth")?.unwrap_or(12.0) as u32;
            let session = live(session)?;
            let analysis =
                session.analyze(&board.fen(), depth).map_err(|e| e.to_string())?;
            match analysis.score {
                Some(score) => println!("Analysis (depth {depth}): {score}"),
                None => println!("Analysis (depth {depth}): no score reported"),
            }
            if !analysis.pv.is_empty() {
                println!("PV: {}", analysis.pv.join(" "));
            }
            Ok(())
        }
        "bestmove" => {
            let seconds = keyword_arg(args, "time")?.unwrap_or(0.1).max(0.0);
            let session = live(session)?;
            let best = session
                .best_move(&board.fen(), (seconds * 1000.0) as u64)
                .map_err(|e| e.to_string())?;
            match best {
                Some(uci) => println!("Best move: {uci}"),
                None => println!("No legal move available."),
            }
            Ok(())
        }
        other => Err(format!("unknown statement '{other}'")),
    }
}

/// The engine capability is an inert placeholder unless the command phase
/// started a session.
fn live(session: &mut EngineSession) -> Result<&mut EngineSession, String> {
    if session.is_ready() {
        Ok(session)
    } else {
        Err("engine session is not running".to_string())
    }
}

/// Parse a single optional `key=value` numeric argument.
fn keyword_arg(args: &[String], key: &str) -> Result<Option<f64>, String> {
    let Some(arg) = args.first() else {
        return Ok(None);
    };
    match arg.split_once('=') {
        Some((k, v)) if k == key => v
            .parse()
            .map(Some)
            .map_err(|_| format!("malformed value for '{key}': {v}")),
        _ => Err(format!("expected {key}=<value>, got '{arg}'")),
    }
}
