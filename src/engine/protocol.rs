//! Parsing for the engine side of the UCI conversation.
//!
//! The adapter only ever needs three shapes out of the engine's output:
//! handshake acknowledgements (`uciok`, `readyok`), `info` lines carrying a
//! score and principal variation, and the final `bestmove` line.

use std::fmt;

/// Engine evaluation, from the point of view of the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    /// Centipawns.
    Cp(i32),
    /// Moves until forced mate (negative: engine is getting mated).
    Mate(i32),
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Cp(cp) => write!(f, "cp {cp}"),
            Score::Mate(n) => write!(f, "mate {n}"),
        }
    }
}

/// Payload of one `info` line, as far as the adapter cares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoLine {
    pub depth: Option<u32>,
    pub score: Option<Score>,
    pub pv: Option<Vec<String>>,
}

/// Completed analysis: the last score and PV reported before `bestmove`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    pub depth: Option<u32>,
    pub score: Option<Score>,
    pub pv: Vec<String>,
}

impl Analysis {
    pub(crate) fn absorb(&mut self, info: InfoLine) {
        if info.depth.is_some() {
            self.depth = info.depth;
        }
        if info.score.is_some() {
            self.score = info.score;
        }
        if let Some(pv) = info.pv {
            self.pv = pv;
        }
    }
}

/// Parse an `info` line. Returns `None` for any other line, and an empty
/// payload for info lines without score or PV (e.g. `info string …`).
#[must_use]
pub fn parse_info(line: &str) -> Option<InfoLine> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "info" {
        return None;
    }
    let mut info = InfoLine::default();
    while let Some(token) = tokens.next() {
        match token {
            "depth" => info.depth = tokens.next().and_then(|t| t.parse().ok()),
            "score" => {
                info.score = match (tokens.next(), tokens.next()) {
                    (Some("cp"), Some(v)) => v.parse().ok().map(Score::Cp),
                    (Some("mate"), Some(v)) => v.parse().ok().map(Score::Mate),
                    _ => None,
                };
            }
            "pv" => {
                info.pv = Some(tokens.by_ref().map(str::to_string).collect());
            }
            "string" => break,
            _ => {}
        }
    }
    Some(info)
}

/// Parse a `bestmove` line. The outer `None` means this was not a bestmove
/// line; the inner `None` is the engine's explicit no-legal-move signal.
#[must_use]
pub fn parse_bestmove(line: &str) -> Option<Option<String>> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "bestmove" {
        return None;
    }
    match tokens.next() {
        None | Some("(none)" | "0000") => Some(None),
        Some(mv) => Some(Some(mv.to_string())),
    }
}
