//! PGN game-record codec.
//!
//! [`GameRecord::decode`] reads one game from text: tag-pair headers, then
//! the principal line of the movetext (comments, variations, NAGs and move
//! numbers are skipped). It returns `None` for structurally invalid input
//! instead of erroring. [`GameRecord::encode`] writes headers and the
//! principal line back out; writing several records to one sink in sequence
//! concatenates them.

use std::io::{self, Write};

use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Move, Position};
use tracing::debug;

use crate::outcome;

/// Seven-tag-roster keys written for synthesized records, in order.
const ROSTER: [(&str, &str); 6] = [
    ("Event", "?"),
    ("Site", "?"),
    ("Date", "????.??.??"),
    ("Round", "?"),
    ("White", "?"),
    ("Black", "?"),
];

/// Column after which the movetext line is wrapped.
const WRAP_COLUMN: usize = 80;

/// One game: header tag pairs plus the principal line of moves from an
/// initial position.
#[derive(Debug, Clone)]
pub struct GameRecord {
    headers: Vec<(String, String)>,
    initial: Chess,
    moves: Vec<Move>,
    result: Option<String>,
}

impl GameRecord {
    /// Parse one game-record unit. Returns `None` on structurally invalid
    /// input: empty text, a malformed tag pair, a bad FEN header, or an
    /// unparseable/illegal move on the principal line.
    #[must_use]
    pub fn decode(text: &str) -> Option<GameRecord> {
        if text.trim().is_empty() {
            return None;
        }

        let mut headers: Vec<(String, String)> = Vec::new();
        let mut movetext = String::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if movetext.is_empty() && trimmed.starts_with('[') {
                headers.push(parse_tag_pair(trimmed)?);
            } else if !trimmed.is_empty() {
                movetext.push_str(line);
                movetext.push('\n');
            }
        }

        let initial = match headers.iter().find(|(k, _)| k == "FEN") {
            Some((_, fen)) => fen
                .parse::<Fen>()
                .ok()?
                .into_position(CastlingMode::Standard)
                .ok()?,
            None => Chess::default(),
        };

        let mut pos = initial.clone();
        let mut moves = Vec::new();
        let mut result = None;
        for token in MovetextTokens::new(&movetext) {
            if let Some(res) = result_token(token) {
                result = Some(res.to_string());
                break;
            }
            let Some(san) = strip_move_number(token) else {
                continue;
            };
            let san: SanPlus = san.parse().ok()?;
            let mv = san.san.to_move(&pos).ok()?;
            pos.play_unchecked(&mv);
            moves.push(mv);
        }

        debug!(moves = moves.len(), headers = headers.len(), "decoded game record");
        Some(GameRecord { headers, initial, moves, result })
    }

    /// Synthesize a record from a move history, with a default tag roster
    /// and the result taken from the final position.
    #[must_use]
    pub fn from_moves(initial: Chess, moves: Vec<Move>) -> GameRecord {
        let mut headers: Vec<(String, String)> =
            ROSTER.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        let mut pos = initial.clone();
        for mv in &moves {
            pos.play_unchecked(mv);
        }
        let result = outcome::result_token(&pos).to_string();
        headers.push(("Result".to_string(), result.clone()));
        let fen = Fen::from_position(initial.clone(), EnPassantMode::Legal).to_string();
        let startpos = Fen::from_position(Chess::default(), EnPassantMode::Legal).to_string();
        if fen != startpos {
            headers.push(("SetUp".to_string(), "1".to_string()));
            headers.push(("FEN".to_string(), fen));
        }
        GameRecord { headers, initial, moves, result: Some(result) }
    }

    /// Serialize the record: tag pairs, blank line, numbered movetext ending
    /// in the result token, then a blank separator line.
    pub fn encode<W: Write>(&self, sink: &mut W) -> io::Result<()> {
        if self.headers.is_empty() {
            for (key, value) in ROSTER {
                writeln!(sink, "[{key} \"{value}\"]")?;
            }
            writeln!(sink, "[Result \"{}\"]", self.result_str())?;
        } else {
            for (key, value) in &self.headers {
                writeln!(sink, "[{key} \"{value}\"]")?;
            }
            if !self.headers.iter().any(|(k, _)| k == "Result") {
                writeln!(sink, "[Result \"{}\"]", self.result_str())?;
            }
        }
        writeln!(sink)?;

        let mut line = String::new();
        let mut pos = self.initial.clone();
        for (i, mv) in self.moves.iter().enumerate() {
            let number = match (pos.turn(), i) {
                (shakmaty::Color::White, _) => format!("{}. ", pos.fullmoves()),
                (shakmaty::Color::Black, 0) => format!("{}... ", pos.fullmoves()),
                _ => String::new(),
            };
            let san = SanPlus::from_move_and_play_unchecked(&mut pos, mv);
            push_token(sink, &mut line, &format!("{number}{san}"))?;
        }
        push_token(sink, &mut line, self.result_str())?;
        if !line.is_empty() {
            writeln!(sink, "{line}")?;
        }
        writeln!(sink)
    }

    /// Position reached by walking the principal line to its end.
    #[must_use]
    pub fn final_position(&self) -> Chess {
        let mut pos = self.initial.clone();
        for mv in &self.moves {
            pos.play_unchecked(mv);
        }
        pos
    }

    #[must_use]
    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn result_str(&self) -> &str {
        match (&self.result, self.header("Result")) {
            (_, Some(res)) => res,
            (Some(res), None) => res,
            (None, None) => "*",
        }
    }
}

/// Append a movetext token to the pending line, flushing at the wrap column.
fn push_token<W: Write>(sink: &mut W, line: &mut String, token: &str) -> io::Result<()> {
    if !line.is_empty() && line.len() + 1 + token.len() > WRAP_COLUMN {
        writeln!(sink, "{line}")?;
        line.clear();
    }
    if !line.is_empty() {
        line.push(' ');
    }
    line.push_str(token);
    Ok(())
}

/// Parse `[Key "Value"]`. Escapes inside the value are not interpreted.
fn parse_tag_pair(line: &str) -> Option<(String, String)> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    let (key, rest) = inner.split_once(char::is_whitespace)?;
    let value = rest.trim().strip_prefix('"')?.strip_suffix('"')?;
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

fn result_token(token: &str) -> Option<&'static str> {
    match token {
        "1-0" => Some("1-0"),
        "0-1" => Some("0-1"),
        "1/2-1/2" => Some("1/2-1/2"),
        "*" => Some("*"),
        _ => None,
    }
}

/// Strip a leading move number (`3.`, `3...`, also attached as in `3.e4`)
/// from a token. `None` means the token was only a number or a NAG.
fn strip_move_number(token: &str) -> Option<&str> {
    if token.starts_with('$') {
        // Numeric annotation glyph.
        return None;
    }
    let rest = token.trim_start_matches(|c: char| c.is_ascii_digit());
    let rest = if rest.len() < token.len() { rest.trim_start_matches('.') } else { rest };
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

/// Iterator over movetext tokens with `{…}` comments, `;` line comments and
/// parenthesized variations (arbitrarily nested) removed.
struct MovetextTokens<'a> {
    rest: &'a str,
}

impl<'a> MovetextTokens<'a> {
    fn new(movetext: &'a str) -> Self {
        MovetextTokens { rest: movetext }
    }
}

impl<'a> Iterator for MovetextTokens<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        loop {
            self.rest = self.rest.trim_start();
            let mut chars = self.rest.char_indices();
            let (_, first) = chars.next()?;
            match first {
                '{' => {
                    // Brace comments do not nest.
                    self.rest = match self.rest.find('}') {
                        Some(end) => &self.rest[end + 1..],
                        None => "",
                    };
                }
                ';' => {
                    self.rest = match self.rest.find('\n') {
                        Some(end) => &self.rest[end + 1..],
                        None => "",
                    };
                }
                '(' => {
                    let mut depth = 0usize;
                    let mut cut = self.rest.len();
                    for (idx, c) in self.rest.char_indices() {
                        match c {
                            '(' => depth += 1,
                            ')' => {
                                depth -= 1;
                                if depth == 0 {
                                    cut = idx + 1;
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                    self.rest = &self.rest[cut..];
                }
                _ => {
                    let end = self
                        .rest
                        .find(|c: char| c.is_whitespace() || matches!(c, '{' | '(' | ';'))
                        .unwrap_or(self.rest.len());
                    let token = &self.rest[..end];
                    self.rest = &self.rest[end..];
                    return Some(token);
                }
            }
        }
    }
}
