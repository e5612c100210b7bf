//! Scannerless tokenization.
//!
//! There is no separate lexing pass: the driver asks for the next token at
//! the current position using only the terminals the current LR state
//! expects, in ACTION-table order (descending priority), with the
//! finish-flag short-circuit and the lexical disambiguation pipeline.

use crate::{
    grammar::{Grammar, STOP},
    index::TermIndex,
    table::LRState,
};

/// A token matched from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'i> {
    pub symbol: TermIndex,
    pub value: &'i str,
    pub position: usize,
    pub length: usize,
}

impl<'i> Token<'i> {
    pub fn new(symbol: TermIndex, value: &'i str, position: usize) -> Self {
        Token { symbol, value, position, length: value.len() }
    }

    pub fn stop(position: usize) -> Self {
        Token { symbol: STOP, value: "", position, length: 0 }
    }

    pub fn end_position(&self) -> usize {
        self.position + self.length
    }

    pub fn is_stop(&self) -> bool {
        self.symbol == STOP
    }
}

/// Outcome of a lexing attempt for the deterministic driver.
#[derive(Debug)]
pub enum LexResult<'i> {
    NoMatch,
    Single(Token<'i>),
    /// All tie-breakers failed; fatal for LR, a fork point for GLR.
    Ambiguous(Vec<Token<'i>>),
}

/// Lexes for the deterministic driver: exactly one token, nothing, or the
/// set of candidates no tie-breaker could separate.
pub fn next_token<'i>(
    grammar: &Grammar,
    state: &LRState,
    input: &'i str,
    position: usize,
    partial_parse: bool,
    lexical_disambiguation: bool,
) -> LexResult<'i> {
    let mut tokens = next_tokens(
        grammar,
        state,
        input,
        position,
        partial_parse,
        lexical_disambiguation,
    );
    match tokens.len() {
        0 => LexResult::NoMatch,
        1 => LexResult::Single(tokens.remove(0)),
        _ => LexResult::Ambiguous(tokens),
    }
}

/// Recognizes tokens expected by `state` at `position`.
///
/// Terminals are tried in ACTION order; once a match exists and the
/// priority drops, or a finish flag fires, remaining candidates are
/// skipped. A STOP token is produced at end of input, or anywhere under
/// partial parse.
pub fn next_tokens<'i>(
    grammar: &Grammar,
    state: &LRState,
    input: &'i str,
    position: usize,
    partial_parse: bool,
    lexical_disambiguation: bool,
) -> Vec<Token<'i>> {
    let mut tokens = vec![];

    if state.actions.contains_key(&STOP) && (position == input.len() || partial_parse)
    {
        tokens.push(Token::stop(position));
    }

    if position < input.len() {
        let mut matched: Vec<Token<'i>> = vec![];
        let mut last_prior = None;
        for (idx, &term) in state.actions.keys().enumerate() {
            if term == STOP {
                continue;
            }
            let terminal = &grammar.terminals[term];
            if let Some(prior) = last_prior {
                if terminal.prior < prior && !matched.is_empty() {
                    break;
                }
            }
            last_prior = Some(terminal.prior);
            if let Some(len) = terminal.recognizer.recognize(input, position) {
                matched.push(Token::new(
                    term,
                    &input[position..position + len],
                    position,
                ));
                if state.finish_flags[idx] {
                    break;
                }
            }
        }
        if lexical_disambiguation {
            matched = disambiguate(grammar, matched);
        }
        tokens.extend(matched);
    }

    // A zero-length STOP never survives next to a real match.
    if tokens.len() > 1 {
        tokens.retain(|t| !t.is_stop());
    }
    tokens
}

/// Applies the lexical disambiguation pipeline: priority, longest match,
/// string/keyword specificity, then the `prefer` flag. Whatever remains is
/// returned as-is.
fn disambiguate<'i>(grammar: &Grammar, mut tokens: Vec<Token<'i>>) -> Vec<Token<'i>> {
    if tokens.len() <= 1 {
        return tokens;
    }

    let max_prior = tokens
        .iter()
        .map(|t| grammar.terminals[t.symbol].prior)
        .max()
        .unwrap_or_default();
    tokens.retain(|t| grammar.terminals[t.symbol].prior == max_prior);
    if tokens.len() == 1 {
        return tokens;
    }

    let max_len = tokens.iter().map(|t| t.length).max().unwrap_or_default();
    tokens.retain(|t| t.length == max_len);
    if tokens.len() == 1 {
        return tokens;
    }

    // String and keyword matches win over regex matches of equal length.
    let is_str = |t: &Token| {
        let terminal = &grammar.terminals[t.symbol];
        terminal.recognizer.is_str_const() || terminal.keyword
    };
    if tokens.iter().any(|t| is_str(t)) {
        tokens.retain(|t| is_str(t));
        if tokens.len() == 1 {
            return tokens;
        }
    }

    if tokens.iter().any(|t| grammar.terminals[t.symbol].prefer) {
        tokens.retain(|t| grammar.terminals[t.symbol].prefer);
    }
    tokens
}

/// Recognizes with every terminal of the grammar, no matter the state.
/// Used for error reporting only.
pub fn tokens_ahead<'i>(
    grammar: &Grammar,
    input: &'i str,
    position: usize,
) -> Vec<Token<'i>> {
    let mut tokens = vec![];
    if position >= input.len() {
        return tokens;
    }
    for terminal in &grammar.terminals {
        if let Some(len) = terminal.recognizer.recognize(input, position) {
            tokens.push(Token::new(
                terminal.idx,
                &input[position..position + len],
                position,
            ));
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        grammar::Grammar,
        index::StateIndex,
        table::{LRTable, TableSettings},
    };

    fn lex<'i>(
        grammar: &Grammar,
        table: &LRTable,
        input: &'i str,
        position: usize,
    ) -> Vec<Token<'i>> {
        next_tokens(
            grammar,
            &table.states[StateIndex(0)],
            input,
            position,
            false,
            true,
        )
    }

    #[test]
    fn priority_wins() {
        // Third has the highest priority and wins over both the more
        // specific string match and the float regex.
        let grammar = Grammar::from_string(
            r#"
            S: First | Second | Third;
            terminals
            First: /\d+\.\d+/;
            Second: "14";
            Third: /\d+/ {15};
            "#,
        )
        .unwrap();
        let table = LRTable::new(&grammar, &TableSettings::default()).unwrap();
        let tokens = lex(&grammar, &table, "14", 0);
        assert_eq!(tokens.len(), 1);
        assert_eq!(grammar.terminals[tokens[0].symbol].name, "Third");
    }

    #[test]
    fn longest_match_wins() {
        let grammar = Grammar::from_string(
            r#"
            S: Int | Float;
            terminals
            Int: /\d+/;
            Float: /\d+\.\d+/;
            "#,
        )
        .unwrap();
        let table = LRTable::new(&grammar, &TableSettings::default()).unwrap();
        let tokens = lex(&grammar, &table, "14.75", 0);
        assert_eq!(tokens.len(), 1);
        assert_eq!(grammar.terminals[tokens[0].symbol].name, "Float");
        assert_eq!(tokens[0].value, "14.75");
    }

    #[test]
    fn str_match_wins_over_regex_of_equal_length() {
        let grammar = Grammar::from_string(
            r#"
            S: Name | For;
            terminals
            Name: /\w+/;
            For: "for";
            "#,
        )
        .unwrap();
        let table = LRTable::new(&grammar, &TableSettings::default()).unwrap();
        let tokens = lex(&grammar, &table, "for", 0);
        assert_eq!(tokens.len(), 1);
        assert_eq!(grammar.terminals[tokens[0].symbol].name, "For");
    }

    #[test]
    fn prefer_flag_breaks_ties() {
        let grammar = Grammar::from_string(
            r#"
            S: A | B;
            terminals
            A: /\d+/;
            B: /\d\d/ {prefer};
            "#,
        )
        .unwrap();
        let table = LRTable::new(&grammar, &TableSettings::default()).unwrap();
        let tokens = lex(&grammar, &table, "42", 0);
        assert_eq!(tokens.len(), 1);
        assert_eq!(grammar.terminals[tokens[0].symbol].name, "B");
    }

    #[test]
    fn stop_produced_at_end_only() {
        let grammar = Grammar::from_string(
            r#"S: "a";"#,
        )
        .unwrap();
        let table = LRTable::new(&grammar, &TableSettings::default()).unwrap();
        // State 0 has no STOP action; no tokens at end of input.
        assert!(lex(&grammar, &table, "a", 1).is_empty());
    }
}
