//! Error taxonomy for grammar construction, table building and parsing.

use std::fmt;

use crate::location::{line_context, pos_to_line_col, position_context, Location};

pub type Result<T> = std::result::Result<T, Error>;

/// Which kind of LR conflict a residual-conflict error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    ShiftReduce,
    ReduceReduce,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::ShiftReduce => write!(f, "Shift/Reduce"),
            ConflictKind::ReduceReduce => write!(f, "Reduce/Reduce"),
        }
    }
}

/// Details of a syntax error: where parsing stopped and what was expected.
#[derive(Debug, Clone)]
pub struct SyntaxError {
    pub position: usize,
    pub line: usize,
    pub column: usize,
    pub file_name: Option<String>,
    /// Caret-style line excerpt.
    pub context: String,
    pub expected: Vec<String>,
    pub tokens_ahead: Vec<String>,
}

impl SyntaxError {
    pub fn new(
        input: &str,
        position: usize,
        file_name: Option<&str>,
        expected: Vec<String>,
        tokens_ahead: Vec<String>,
    ) -> Self {
        let (line, column) = pos_to_line_col(input, position);
        Self {
            position,
            line,
            column,
            file_name: file_name.map(|f| f.to_owned()),
            context: line_context(input, position, file_name),
            expected,
            tokens_ahead,
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tokens_ahead.is_empty() {
            writeln!(f, "syntax error: unexpected input")?;
        } else {
            let mut ahead = self.tokens_ahead.clone();
            ahead.sort();
            writeln!(f, "syntax error: unexpected {}", ahead.join(", "))?;
        }
        writeln!(f, "{}", self.context)?;
        let mut expected = self.expected.clone();
        expected.sort();
        write!(f, "expected: {}", expected.join(" "))
    }
}

/// An error recorded during error recovery.
///
/// With recovery enabled, the parse collects one record per recovered error
/// instead of failing at the first one.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    /// Span of the input skipped or patched over by the recovery.
    pub location: Location,
    pub expected: Vec<String>,
    pub tokens_ahead: Vec<String>,
    pub message: String,
}

#[derive(Debug)]
pub enum Error {
    /// Malformed grammar: unresolved references, duplicate terminals,
    /// reserved-name misuse, unsupported combinations.
    Grammar {
        message: String,
        location: Option<Location>,
    },
    /// Parser-construction problems: action list length mismatch, action
    /// given for the wrong symbol kind, missing start state actions.
    ParserInit(String),
    /// Residual LR conflicts left after all resolution policies.
    Conflicts {
        kind: ConflictKind,
        states: Vec<usize>,
        report: String,
    },
    /// Multiple tokens recognized at one position and every tie-breaker
    /// failed. Fatal for LR; the GLR driver forks instead.
    Disambiguation {
        position: usize,
        context: String,
        tokens: Vec<String>,
    },
    /// The dynamic disambiguation filter left more than one shift or
    /// non-empty reduction.
    DynamicDisambiguation(String),
    /// No action for the current lookahead.
    Syntax(Box<SyntaxError>),
    /// A cycle was found while traversing a parse forest.
    Loop(String),
    Io(std::io::Error),
    Serde(serde_json::Error),
}

impl Error {
    pub fn grammar(message: impl Into<String>) -> Self {
        Error::Grammar { message: message.into(), location: None }
    }

    pub fn grammar_at(message: impl Into<String>, location: Location) -> Self {
        Error::Grammar { message: message.into(), location: Some(location) }
    }

    pub fn disambiguation(input: &str, position: usize, tokens: Vec<String>) -> Self {
        Error::Disambiguation {
            position,
            context: position_context(input, position),
            tokens,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Grammar { message, location } => match location {
                Some(location) => {
                    write!(f, "grammar error at {location}: {message}")
                }
                None => write!(f, "grammar error: {message}"),
            },
            Error::ParserInit(message) => {
                write!(f, "parser init error: {message}")
            }
            Error::Conflicts { kind, states, report } => {
                write!(
                    f,
                    "parser init error: {kind} conflicts in states {states:?}\n{report}"
                )
            }
            Error::Disambiguation { position, context, tokens } => {
                let mut tokens = tokens.clone();
                tokens.sort();
                write!(
                    f,
                    "disambiguation error at position {position} ({context}): \
                     can't disambiguate between: {}",
                    tokens.join(", ")
                )
            }
            Error::DynamicDisambiguation(message) => {
                write!(f, "disambiguation error: {message}")
            }
            Error::Syntax(err) => write!(f, "{err}"),
            Error::Loop(message) => write!(f, "loop error: {message}"),
            Error::Io(err) => write!(f, "{err}"),
            Error::Serde(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err)
    }
}
