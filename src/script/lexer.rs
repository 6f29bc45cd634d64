//! Shell-style tokenizer for command lines.
//!
//! Splits a line into words honoring single quotes, double quotes and
//! backslash escapes, so option values may contain spaces
//! (`export filename="my game.pgn"`).

use std::fmt;

/// Error raised when a line cannot be tokenized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    /// A quote was opened but never closed.
    UnterminatedQuote(char),
    /// The line ended immediately after a backslash.
    DanglingEscape,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::UnterminatedQuote(q) => write!(f, "unterminated {q} quote"),
            LexError::DanglingEscape => write!(f, "dangling backslash at end of line"),
        }
    }
}

impl std::error::Error for LexError {}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    Single,
    Double,
}

/// Split `line` into shell-style words.
///
/// Rules follow POSIX word splitting closely enough for script use:
/// whitespace separates words; `'…'` is taken verbatim; inside `"…"` a
/// backslash escapes only `"` and `\`; outside quotes a backslash escapes
/// the next character.
pub fn split_words(line: &str) -> Result<Vec<String>, LexError> {
    let mut words = Vec::new();
    let mut current = String::new();
    // Distinguishes an empty pending word ('' or "") from no word at all.
    let mut has_word = false;
    let mut state = State::Normal;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match state {
            State::Normal => match c {
                c if c.is_whitespace() => {
                    if has_word {
                        words.push(std::mem::take(&mut current));
                        has_word = false;
                    }
                }
                '\'' => {
                    state = State::Single;
                    has_word = true;
                }
                '"' => {
                    state = State::Double;
                    has_word = true;
                }
                '\\' => {
                    let escaped = chars.next().ok_or(LexError::DanglingEscape)?;
                    current.push(escaped);
                    has_word = true;
                }
                _ => {
                    current.push(c);
                    has_word = true;
                }
            },
            State::Single => match c {
                '\'' => state = State::Normal,
                _ => current.push(c),
            },
            State::Double => match c {
                '"' => state = State::Normal,
                '\\' => match chars.next() {
                    Some(e @ ('"' | '\\')) => current.push(e),
                    Some(other) => {
                        current.push('\\');
                        current.push(other);
                    }
                    None => return Err(LexError::DanglingEscape),
                },
                _ => current.push(c),
            },
        }
    }

    match state {
        State::Single => return Err(LexError::UnterminatedQuote('\'')),
        State::Double => return Err(LexError::UnterminatedQuote('"')),
        State::Normal => {}
    }

    if has_word {
        words.push(current);
    }
    Ok(words)
}
