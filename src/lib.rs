//! Interpreter for `.chess` scripts.
//!
//! A script mixes declarative commands (`analyze`, `play`, `export`),
//! embedded PGN blocks that seed the board, and embedded code blocks with a
//! small restricted statement set. The [`runner::Runner`] executes a parsed
//! [`script::Script`] against a lazily started UCI engine process managed by
//! [`engine::EngineSession`].

pub mod engine;
pub mod outcome;
pub mod pgn;
pub mod runner;
pub mod script;

pub use engine::{EngineError, EngineSession, SessionState};
pub use runner::{RunError, RunEvent, Runner};
pub use script::Script;
