//! Script parsing for the `.chess` format.
//!
//! A script interleaves three kinds of content:
//!
//! - command lines (`analyze depth=12`, `play side=white time=0.1`, …),
//! - PGN blocks between `<<PGN>>` and `<</PGN>>` lines,
//! - code blocks between `<<PY>>` and `<</PY>>` lines.
//!
//! Parsing is total: malformed lines are dropped and an unterminated block
//! swallows the rest of the file. Blank lines and `#` comments are skipped.

use std::fmt;

use tracing::warn;

pub mod lexer;

const PGN_OPEN: &str = "<<PGN>>";
const PGN_CLOSE: &str = "<</PGN>>";
const CODE_OPEN: &str = "<<PY>>";
const CODE_CLOSE: &str = "<</PY>>";

/// Value of a single command option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// `key=value` form; the value is kept as written.
    Text(String),
    /// Bare `key` form, a boolean-true flag.
    Flag,
}

/// One parsed command line: a name plus its options.
///
/// Option keys are unique (the first occurrence wins); insertion order is
/// kept only so `Debug` output matches the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    options: Vec<(String, OptionValue)>,
}

impl Command {
    fn from_tokens(mut tokens: Vec<String>) -> Command {
        let name = tokens.remove(0);
        let mut options: Vec<(String, OptionValue)> = Vec::new();
        for token in tokens {
            let (key, value) = match token.split_once('=') {
                Some((k, v)) => (k.to_string(), OptionValue::Text(v.to_string())),
                None => (token, OptionValue::Flag),
            };
            if options.iter().any(|(k, _)| *k == key) {
                warn!(command = %name, key = %key, "duplicate option ignored");
                continue;
            }
            options.push((key, value));
        }
        Command { name, options }
    }

    /// Look up an option by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.options.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// The option's text value, if present and not a bare flag.
    #[must_use]
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(OptionValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// The option as a string, falling back to `default` when absent.
    #[must_use]
    pub fn text_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.text(key).unwrap_or(default)
    }

    /// The option parsed as an integer; malformed values fall back to
    /// `default` with a warning rather than aborting the run.
    #[must_use]
    pub fn int_or(&self, key: &str, default: u32) -> u32 {
        self.parsed_or(key, default)
    }

    /// The option parsed as a float, same fallback policy as [`Self::int_or`].
    #[must_use]
    pub fn float_or(&self, key: &str, default: f64) -> f64 {
        self.parsed_or(key, default)
    }

    fn parsed_or<T: std::str::FromStr + Copy>(&self, key: &str, default: T) -> T {
        match self.text(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(command = %self.name, key = %key, value = %raw, "malformed option value, using default");
                default
            }),
        }
    }

    /// True when the option was given as a bare flag.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some(OptionValue::Flag))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (key, value) in &self.options {
            match value {
                OptionValue::Text(v) => write!(f, " {key}={v}")?,
                OptionValue::Flag => write!(f, " {key}")?,
            }
        }
        Ok(())
    }
}

/// A parsed script: commands plus raw PGN and code blocks, all in
/// appearance order. Immutable once parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub commands: Vec<Command>,
    pub pgn_blocks: Vec<String>,
    pub code_blocks: Vec<String>,
}

impl Script {
    /// Parse script text. Never fails: unparseable lines are dropped.
    #[must_use]
    pub fn parse(text: &str) -> Script {
        let mut script = Script::default();
        let mut lines = text.lines();

        while let Some(line) = lines.next() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if trimmed == PGN_OPEN {
                script.pgn_blocks.push(capture_block(&mut lines, PGN_CLOSE));
                continue;
            }
            if trimmed == CODE_OPEN {
                script.code_blocks.push(capture_block(&mut lines, CODE_CLOSE));
                continue;
            }
            match lexer::split_words(trimmed) {
                Ok(tokens) if !tokens.is_empty() => {
                    script.commands.push(Command::from_tokens(tokens));
                }
                Ok(_) => {}
                Err(err) => warn!(line = %trimmed, %err, "dropping unparseable line"),
            }
        }
        script
    }

    /// True when the script contains nothing to execute.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.pgn_blocks.is_empty() && self.code_blocks.is_empty()
    }
}

/// Capture lines verbatim until `close` (trimmed match) or end of input.
/// The close delimiter is consumed; a missing one swallows the remainder.
fn capture_block<'a, I: Iterator<Item = &'a str>>(lines: &mut I, close: &str) -> String {
    let mut captured: Vec<&str> = Vec::new();
    for line in lines {
        if line.trim() == close {
            return captured.join("\n");
        }
        captured.push(line);
    }
    warn!(delimiter = close, "block not terminated, capturing to end of input");
    captured.join("\n")
}
