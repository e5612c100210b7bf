//! Terminal recognizers.
//!
//! A recognizer matches a terminal at a given input position and reports the
//! matched length. Recognizers must match exactly at the position and never
//! look past their match.

use regex::Regex;

use crate::error::{Error, Result};

/// Host-supplied recognizer. Must be a pure function of `(input, position)`
/// and return the length of the match rooted at `position`, if any.
pub type CustomRecognizer = fn(&str, usize) -> Option<usize>;

#[derive(Debug, Clone)]
pub enum Recognizer {
    StrConst {
        value: String,
        ignore_case: bool,
    },
    Regex {
        pattern: String,
        regex: Regex,
    },
    Custom(CustomRecognizer),
    /// Matches the empty string at end of input only.
    Stop,
    /// Never matches anything; used by the EMPTY sentinel.
    Empty,
}

impl Recognizer {
    pub fn str_const(value: impl Into<String>, ignore_case: bool) -> Self {
        Recognizer::StrConst { value: value.into(), ignore_case }
    }

    /// Compiles `pattern` anchored at the match position. The pattern gets
    /// multi-line semantics for `^`/`$` and, when `ignore_case` is set,
    /// case-insensitive matching.
    pub fn regex(pattern: &str, ignore_case: bool) -> Result<Self> {
        let flags = if ignore_case { "im" } else { "m" };
        let anchored = format!(r"\A(?{flags}:{pattern})");
        let regex = Regex::new(&anchored).map_err(|err| {
            Error::grammar(format!("regex compile error in /{pattern}/: {err}"))
        })?;
        Ok(Recognizer::Regex { pattern: pattern.to_owned(), regex })
    }

    /// Tries to match at `position`, returning the matched length.
    /// Empty matches are not reported.
    pub fn recognize(&self, input: &str, position: usize) -> Option<usize> {
        match self {
            Recognizer::StrConst { value, ignore_case } => {
                let rest = input.get(position..)?;
                // Compare bytes: slicing by the value's byte length could
                // land inside a multibyte char of the input.
                let matched = if *ignore_case {
                    rest.as_bytes()
                        .get(..value.len())
                        .is_some_and(|bytes| {
                            bytes.eq_ignore_ascii_case(value.as_bytes())
                        })
                } else {
                    rest.starts_with(value.as_str())
                };
                if matched && !value.is_empty() {
                    Some(value.len())
                } else {
                    None
                }
            }
            Recognizer::Regex { regex, .. } => {
                let m = regex.find(input.get(position..)?)?;
                if m.is_empty() {
                    None
                } else {
                    Some(m.len())
                }
            }
            Recognizer::Custom(f) => {
                f(input, position).filter(|&len| len > 0)
            }
            Recognizer::Stop => {
                if position == input.len() {
                    Some(0)
                } else {
                    None
                }
            }
            Recognizer::Empty => None,
        }
    }

    pub fn is_str_const(&self) -> bool {
        matches!(self, Recognizer::StrConst { .. })
    }

    pub fn as_str_const(&self) -> Option<(&str, bool)> {
        match self {
            Recognizer::StrConst { value, ignore_case } => {
                Some((value.as_str(), *ignore_case))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_const() {
        let rec = Recognizer::str_const("for", false);
        assert_eq!(rec.recognize("for x", 0), Some(3));
        assert_eq!(rec.recognize("x for", 2), Some(3));
        assert_eq!(rec.recognize("fo", 0), None);
    }

    #[test]
    fn str_const_ignore_case() {
        let rec = Recognizer::str_const("begin", true);
        assert_eq!(rec.recognize("BEGIN end", 0), Some(5));
        assert_eq!(rec.recognize("Begin", 0), Some(5));
    }

    #[test]
    fn str_const_ignore_case_multibyte_input() {
        // The value's byte length may land inside a multibyte char of the
        // input; that is a non-match, not a panic.
        let rec = Recognizer::str_const("for", true);
        assert_eq!(rec.recognize("naïve", 0), None);
        assert_eq!(rec.recognize("FÖR", 0), None);
        assert_eq!(rec.recognize("FORêt", 0), Some(3));
    }

    #[test]
    fn regex_anchored() {
        let rec = Recognizer::regex(r"\d+(\.\d+)?", false).unwrap();
        assert_eq!(rec.recognize("42 + 1", 0), Some(2));
        assert_eq!(rec.recognize("42 + 1.5", 5), Some(3));
        // Must not skip ahead to a later match.
        assert_eq!(rec.recognize("x42", 0), None);
    }

    #[test]
    fn regex_empty_match_rejected() {
        let rec = Recognizer::regex(r"\d*", false).unwrap();
        assert_eq!(rec.recognize("abc", 0), None);
    }

    #[test]
    fn stop_at_end_only() {
        assert_eq!(Recognizer::Stop.recognize("ab", 2), Some(0));
        assert_eq!(Recognizer::Stop.recognize("ab", 1), None);
    }
}
