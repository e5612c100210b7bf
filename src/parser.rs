//! Deterministic LR driver.
//!
//! The parser keeps a stack of frames (state, positions, captured layout)
//! and runs the shift/reduce loop over the LR table. Results go through a
//! builder seam: the default [`TreeBuilder`] produces [`TreeNode`] parse
//! trees, while the internal slice builder backs the layout sub-parser.

#[cfg(debug_assertions)]
use colored::Colorize;
use std::rc::Rc;

use crate::{
    error::{Error, ErrorRecord, Result, SyntaxError},
    grammar::{Grammar, STOP},
    index::{ProdIndex, StateIndex, TermIndex},
    lexer::{next_token, tokens_ahead, LexResult, Token},
    location::{pos_to_line_col, position_context, Location},
    log,
    table::{Action, LRTable, TableSettings, TableType},
    tree::TreeNode,
};

/// Error recovery strategy.
#[derive(Clone, Default)]
pub enum Recovery {
    /// No recovery: the first syntax error fails the parse.
    #[default]
    None,
    /// Advance the position one character at a time until a token the
    /// current state accepts matches.
    Default,
    /// User-supplied recovery: may advance the position and/or inject a
    /// lookahead token. Returns false to give up.
    Custom(Rc<dyn Fn(&mut RecoveryContext) -> bool>),
}

impl std::fmt::Debug for Recovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recovery::None => write!(f, "None"),
            Recovery::Default => write!(f, "Default"),
            Recovery::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Context handed to a custom recovery callable.
pub struct RecoveryContext<'a, 'i> {
    pub input: &'i str,
    /// Position of the error; the recovery may move it forward.
    pub position: usize,
    /// Lookahead to resume with; the recovery may inject one.
    pub token_ahead: Option<Token<'i>>,
    /// Terminals the current state accepts.
    pub expected: &'a [TermIndex],
}

/// Context handed to the dynamic disambiguation filter for every
/// `dynamic`-marked candidate action.
pub struct DynamicContext<'a, 'i> {
    pub grammar: &'a Grammar,
    pub action: Action,
    pub token: &'a Token<'i>,
    /// Set for reduce actions.
    pub production: Option<ProdIndex>,
    pub position: usize,
}

pub type DynamicFilter = Rc<dyn Fn(&DynamicContext) -> bool>;

#[derive(Clone)]
pub struct ParserSettings {
    pub table_type: TableType,
    /// Default: on for LR, off for GLR.
    pub prefer_shifts: Option<bool>,
    /// Default: on for LR, off for GLR.
    pub prefer_shifts_over_empty: Option<bool>,
    /// When false, the parse may succeed without consuming the whole
    /// input (tried through the STOP action of the current state).
    pub consume_input: bool,
    /// Whitespace characters skipped between tokens when the grammar has
    /// no LAYOUT rule. `None` disables skipping (non-textual input).
    pub ws: Option<String>,
    pub recovery: Recovery,
    pub lexical_disambiguation: bool,
    pub dynamic_filter: Option<DynamicFilter>,
    /// Used in error reporting.
    pub file_name: Option<String>,
}

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            table_type: TableType::Lalr,
            prefer_shifts: None,
            prefer_shifts_over_empty: None,
            consume_input: true,
            ws: Some("\n\r\t ".to_owned()),
            recovery: Recovery::None,
            lexical_disambiguation: true,
            dynamic_filter: None,
            file_name: None,
        }
    }
}

impl std::fmt::Debug for ParserSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserSettings")
            .field("table_type", &self.table_type)
            .field("prefer_shifts", &self.prefer_shifts)
            .field("prefer_shifts_over_empty", &self.prefer_shifts_over_empty)
            .field("consume_input", &self.consume_input)
            .field("ws", &self.ws)
            .field("recovery", &self.recovery)
            .field("lexical_disambiguation", &self.lexical_disambiguation)
            .field("dynamic_filter", &self.dynamic_filter.as_ref().map(|_| "..").unwrap_or("None"))
            .field("file_name", &self.file_name)
            .finish()
    }
}

struct Frame<'i> {
    state: StateIndex,
    /// Input position after this frame's content and any skipped layout.
    position: usize,
    start_position: usize,
    end_position: usize,
    token_ahead: Option<Token<'i>>,
    layout_ahead: &'i str,
}

/// Builder seam: receives shift/reduce events in LR order and assembles
/// the parse result.
pub(crate) trait LRBuilder<'i> {
    type Output;
    fn shift(&mut self, token: &Token<'i>, layout: &'i str);
    fn reduce(&mut self, prod: ProdIndex, arity: usize, span: (usize, usize));
    fn result(&mut self) -> Self::Output;
}

/// Default builder producing a parse tree.
pub(crate) struct TreeBuilder<'i> {
    stack: Vec<TreeNode<'i>>,
}

impl<'i> TreeBuilder<'i> {
    pub(crate) fn new() -> Self {
        TreeBuilder { stack: vec![] }
    }
}

impl<'i> LRBuilder<'i> for TreeBuilder<'i> {
    type Output = TreeNode<'i>;

    fn shift(&mut self, token: &Token<'i>, layout: &'i str) {
        self.stack.push(TreeNode::Term { token: token.clone(), layout });
    }

    fn reduce(&mut self, prod: ProdIndex, arity: usize, span: (usize, usize)) {
        let children = self.stack.split_off(self.stack.len() - arity);
        let layout = children.first().map(|c| c.layout()).unwrap_or("");
        self.stack.push(TreeNode::NonTerm {
            prod,
            start: span.0,
            end: span.1,
            layout,
            children,
        });
    }

    fn result(&mut self) -> TreeNode<'i> {
        self.stack.pop().expect("accepted parse leaves a result")
    }
}

/// Builder for the layout sub-parser: only the consumed span matters.
pub(crate) struct SliceBuilder;

impl<'i> LRBuilder<'i> for SliceBuilder {
    type Output = ();

    fn shift(&mut self, _token: &Token<'i>, _layout: &'i str) {}
    fn reduce(&mut self, _prod: ProdIndex, _arity: usize, _span: (usize, usize)) {}
    fn result(&mut self) {}
}

/// The LR parser. Immutable and shareable once constructed; all parse
/// state lives on the stack of a parse call.
pub struct Parser<'g> {
    pub grammar: &'g Grammar,
    pub table: LRTable,
    settings: ParserSettings,
    layout_parser: Option<Box<Parser<'g>>>,
    in_layout: bool,
}

impl<'g> std::fmt::Debug for Parser<'g> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parser")
            .field("grammar", &self.grammar)
            .field("table", &self.table)
            .field("settings", &self.settings)
            .field("layout_parser", &self.layout_parser.is_some())
            .field("in_layout", &self.in_layout)
            .finish()
    }
}

impl<'g> Parser<'g> {
    pub fn new(grammar: &'g Grammar) -> Result<Self> {
        Self::with_settings(grammar, ParserSettings::default())
    }

    pub fn with_settings(grammar: &'g Grammar, settings: ParserSettings) -> Result<Self> {
        Self::build(grammar, settings, false)
    }

    /// Builds a parser over a precomputed table, skipping table
    /// construction. The table must come from the same grammar.
    pub fn with_table(
        grammar: &'g Grammar,
        table: LRTable,
        settings: ParserSettings,
    ) -> Result<Self> {
        Self::check_conflicts(&table, grammar, settings.dynamic_filter.is_some())?;
        let layout_parser = Self::build_layout(grammar, &settings)?;
        Ok(Parser { grammar, table, settings, layout_parser, in_layout: false })
    }

    fn build(grammar: &'g Grammar, settings: ParserSettings, in_layout: bool) -> Result<Self> {
        let start_production = if in_layout {
            grammar.layout_production.ok_or_else(|| {
                Error::ParserInit("grammar has no LAYOUT rule".into())
            })?
        } else {
            ProdIndex(0)
        };
        let table_settings = TableSettings {
            table_type: settings.table_type,
            prefer_shifts: settings.prefer_shifts.unwrap_or(true),
            prefer_shifts_over_empty: settings
                .prefer_shifts_over_empty
                .unwrap_or(true),
            start_production,
        };
        let table = LRTable::new(grammar, &table_settings)?;
        Self::check_conflicts(&table, grammar, settings.dynamic_filter.is_some())?;

        let layout_parser = if in_layout {
            None
        } else {
            Self::build_layout(grammar, &settings)?
        };
        Ok(Parser { grammar, table, settings, layout_parser, in_layout })
    }

    pub(crate) fn build_layout(
        grammar: &'g Grammar,
        settings: &ParserSettings,
    ) -> Result<Option<Box<Parser<'g>>>> {
        if grammar.layout_production.is_none() {
            return Ok(None);
        }
        let layout_settings = ParserSettings {
            table_type: settings.table_type,
            prefer_shifts: Some(true),
            prefer_shifts_over_empty: Some(true),
            consume_input: false,
            ws: None,
            recovery: Recovery::None,
            lexical_disambiguation: settings.lexical_disambiguation,
            dynamic_filter: None,
            file_name: None,
        };
        Ok(Some(Box::new(Self::build(grammar, layout_settings, true)?)))
    }

    /// Residual conflicts are fatal for the deterministic driver, except
    /// those deferred to a configured dynamic filter.
    fn check_conflicts(table: &LRTable, grammar: &Grammar, has_filter: bool) -> Result<()> {
        for (conflicts, kind) in [
            (&table.sr_conflicts, crate::error::ConflictKind::ShiftReduce),
            (&table.rr_conflicts, crate::error::ConflictKind::ReduceReduce),
        ] {
            let fatal: Vec<usize> = conflicts
                .iter()
                .filter(|c| !(has_filter && c.dynamic))
                .map(|c| c.state.0)
                .collect();
            if !fatal.is_empty() {
                return Err(Error::Conflicts {
                    kind,
                    states: fatal,
                    report: table.conflicts_report(grammar),
                });
            }
        }
        Ok(())
    }

    /// Parses the input into a parse tree.
    pub fn parse<'i>(&self, input: &'i str) -> Result<TreeNode<'i>> {
        Ok(self.parse_with_errors(input)?.0)
    }

    /// Parses the input, returning the tree together with errors recovered
    /// from when error recovery is enabled.
    pub fn parse_with_errors<'i>(
        &self,
        input: &'i str,
    ) -> Result<(TreeNode<'i>, Vec<ErrorRecord>)> {
        let mut builder = TreeBuilder::new();
        let (_, errors) = self.drive(input, 0, &mut builder)?;
        Ok((builder.result(), errors))
    }

    /// Parses the LAYOUT rule at `position`, returning the end of the
    /// consumed layout. Failures mean "no layout here".
    pub(crate) fn parse_layout(&self, input: &str, position: usize) -> Option<usize> {
        let mut builder = SliceBuilder;
        match self.drive(input, position, &mut builder) {
            Ok((end, _)) => Some(end),
            Err(_) => None,
        }
    }

    /// Skips layout at `position`: through the LAYOUT sub-parser when the
    /// grammar has one, otherwise over the whitespace set.
    pub(crate) fn skip_layout<'i>(
        &self,
        input: &'i str,
        position: usize,
    ) -> (usize, &'i str) {
        if let Some(layout_parser) = &self.layout_parser {
            if let Some(end) = layout_parser.parse_layout(input, position) {
                if end > position {
                    return (end, &input[position..end]);
                }
            }
            (position, "")
        } else if let Some(ws) = &self.settings.ws {
            let mut end = position;
            for ch in input[position..].chars() {
                if !ws.contains(ch) {
                    break;
                }
                end += ch.len_utf8();
            }
            (end, &input[position..end])
        } else {
            (position, "")
        }
    }

    /// The shift/reduce loop. Returns the end position of the accepted
    /// content and errors recovered from.
    fn drive<'i, B: LRBuilder<'i>>(
        &self,
        input: &'i str,
        start: usize,
        builder: &mut B,
    ) -> Result<(usize, Vec<ErrorRecord>)> {
        let grammar = self.grammar;
        let mut errors: Vec<ErrorRecord> = vec![];
        let mut stack: Vec<Frame<'i>> = vec![Frame {
            state: StateIndex(0),
            position: start,
            start_position: start,
            end_position: start,
            token_ahead: None,
            layout_ahead: "",
        }];

        let end_position = loop {
            // Fetch the lookahead unless one is cached on the top frame.
            {
                let top = stack.last_mut().expect("stack is never empty");
                if top.token_ahead.is_none() {
                    if !self.in_layout {
                        let (position, layout) =
                            self.skip_layout(input, top.position);
                        top.position = position;
                        top.layout_ahead = layout;
                    }
                    let state = &self.table.states[top.state];
                    match next_token(
                        grammar,
                        state,
                        input,
                        top.position,
                        !self.settings.consume_input,
                        self.settings.lexical_disambiguation,
                    ) {
                        LexResult::NoMatch => {}
                        LexResult::Single(token) => {
                            top.token_ahead = Some(token)
                        }
                        LexResult::Ambiguous(tokens) => {
                            return Err(Error::disambiguation(
                                input,
                                top.position,
                                tokens
                                    .iter()
                                    .map(|t| token_str(grammar, t))
                                    .collect(),
                            ))
                        }
                    }
                    log!(
                        "State {:?}, position {}, token ahead {:?}",
                        top.state,
                        top.position,
                        top.token_ahead
                    );
                }
            }

            let top_state = stack.last().expect("nonempty").state;
            let position = stack.last().expect("nonempty").position;
            let token = stack.last().expect("nonempty").token_ahead.clone();
            let state = &self.table.states[top_state];

            let mut acts: Option<Vec<Action>> = token
                .as_ref()
                .and_then(|t| state.actions.get(&t.symbol))
                .cloned();
            // With consume_input off, try to finish without consuming the
            // whole input.
            if acts.is_none() && !self.settings.consume_input {
                acts = state.actions.get(&STOP).cloned();
            }

            let Some(acts) = acts.filter(|a| !a.is_empty()) else {
                self.record_error(input, &mut stack, &mut errors);
                if self.recover(input, &mut stack, &mut errors) {
                    continue;
                }
                let record = errors.last().expect("error just recorded");
                return Err(Error::Syntax(Box::new(SyntaxError::new(
                    input,
                    record.location.start,
                    self.settings.file_name.as_deref(),
                    record.expected.clone(),
                    record.tokens_ahead.clone(),
                ))));
            };

            // The dynamic filter arbitrates only where a conflict exists.
            let effective_token =
                token.clone().unwrap_or_else(|| Token::stop(position));
            let acts = match &self.settings.dynamic_filter {
                Some(_) if acts.len() > 1 => {
                    self.filter_actions(acts, &effective_token, position)?
                }
                _ => acts,
            };

            // Without dynamic disambiguation the first action applies: a
            // shift if one exists, else the (single) reduction.
            match acts[0] {
                Action::Shift(next_state) => {
                    let top = stack.last_mut().expect("nonempty");
                    let token =
                        top.token_ahead.take().expect("shift needs a token");
                    let layout = top.layout_ahead;
                    let new_position = token.position + token.length;
                    log!(
                        "{} {:?} \"{}\" at {:?}",
                        "Shift:".green(),
                        next_state,
                        token.value,
                        pos_to_line_col(input, token.position)
                    );
                    builder.shift(&token, layout);
                    stack.push(Frame {
                        state: next_state,
                        position: new_position,
                        start_position: token.position,
                        end_position: new_position,
                        token_ahead: None,
                        layout_ahead: "",
                    });
                }
                Action::Reduce(first_prod) => {
                    // An empty reduction yields to a non-empty alternative
                    // when one is available.
                    let mut prod = first_prod;
                    if grammar.productions[prod].rhs.is_empty() && acts.len() > 1 {
                        if let Action::Reduce(other) = acts[1] {
                            prod = other;
                        }
                    }
                    log!(
                        "{} {}",
                        "Reducing by:".green(),
                        grammar.production_str(prod)
                    );
                    let arity = grammar.productions[prod].rhs.len();

                    let (head_position, head_end, token_ahead, layout_ahead) = {
                        let top = stack.last_mut().expect("nonempty");
                        (
                            top.position,
                            top.end_position,
                            top.token_ahead.take(),
                            top.layout_ahead,
                        )
                    };
                    let (span_start, span_end) = if arity > 0 {
                        let first = &stack[stack.len() - arity];
                        (first.start_position, head_end)
                    } else {
                        (head_end, head_end)
                    };
                    stack.truncate(stack.len() - arity);

                    let under = stack.last().expect("reduce keeps the base frame");
                    let goto_state = self.table.states[under.state]
                        .gotos
                        .get(&grammar.productions[prod].nonterminal)
                        .copied()
                        .expect("GOTO exists for every reduced non-terminal");

                    builder.reduce(prod, arity, (span_start, span_end));
                    stack.push(Frame {
                        state: goto_state,
                        position: head_position,
                        start_position: span_start,
                        end_position: span_end,
                        token_ahead,
                        layout_ahead,
                    });
                }
                Action::Accept => {
                    log!("{}", "Accepting.".red());
                    break stack[1].position;
                }
            }
        };

        Ok((end_position, errors))
    }

    fn record_error<'i>(
        &self,
        input: &'i str,
        stack: &mut [Frame<'i>],
        errors: &mut Vec<ErrorRecord>,
    ) {
        let grammar = self.grammar;
        let top = stack.last().expect("nonempty");
        let state = &self.table.states[top.state];
        let expected: Vec<String> = state
            .actions
            .keys()
            .map(|&t| grammar.terminals[t].name.clone())
            .collect();
        let ahead: Vec<String> = tokens_ahead(grammar, input, top.position)
            .iter()
            .map(|t| token_str(grammar, t))
            .collect();
        let (line, column) = pos_to_line_col(input, top.position);
        let message = format!(
            "Error at {line}:{column}:\"{}\" => expected: {}",
            position_context(input, top.position),
            {
                let mut sorted = expected.clone();
                sorted.sort();
                sorted.join(" ")
            }
        );
        log!("{message}");
        errors.push(ErrorRecord {
            location: Location::point(top.position),
            expected,
            tokens_ahead: ahead,
            message,
        });
    }

    /// Tries to resume after an error. On success the recovered span is
    /// recorded on the last error and the loop continues.
    fn recover<'i>(
        &self,
        input: &'i str,
        stack: &mut [Frame<'i>],
        errors: &mut [ErrorRecord],
    ) -> bool {
        let grammar = self.grammar;
        let top = stack.last_mut().expect("nonempty");
        let state = &self.table.states[top.state];

        let recovered = match &self.settings.recovery {
            Recovery::None => false,
            Recovery::Default => {
                let mut found = false;
                while top.position < input.len() {
                    top.position += 1;
                    while !input.is_char_boundary(top.position) {
                        top.position += 1;
                    }
                    if let LexResult::Single(token) = next_token(
                        grammar,
                        state,
                        input,
                        top.position,
                        !self.settings.consume_input,
                        self.settings.lexical_disambiguation,
                    ) {
                        top.token_ahead = Some(token);
                        found = true;
                        break;
                    }
                }
                found
            }
            Recovery::Custom(f) => {
                let expected: Vec<TermIndex> =
                    state.actions.keys().copied().collect();
                let mut ctx = RecoveryContext {
                    input,
                    position: top.position,
                    token_ahead: top.token_ahead.clone(),
                    expected: &expected,
                };
                if f(&mut ctx) {
                    top.position = ctx.position;
                    top.token_ahead = ctx.token_ahead;
                    true
                } else {
                    false
                }
            }
        };

        if recovered {
            if let Some(record) = errors.last_mut() {
                record.location.end = top.position;
            }
            log!(
                "Recovery succeeded; resuming at {} with {:?}",
                top.position,
                top.token_ahead
            );
        }
        recovered
    }

    /// Applies the dynamic disambiguation filter to `dynamic`-marked
    /// candidates. At most one shift or non-empty reduction may remain.
    fn filter_actions(
        &self,
        acts: Vec<Action>,
        token: &Token,
        position: usize,
    ) -> Result<Vec<Action>> {
        let grammar = self.grammar;
        let filter = self
            .settings
            .dynamic_filter
            .as_ref()
            .expect("called with a filter configured");

        let filtered: Vec<Action> = acts
            .into_iter()
            .filter(|&action| match action {
                Action::Shift(_) => {
                    !grammar.terminals[token.symbol].dynamic
                        || filter(&DynamicContext {
                            grammar,
                            action,
                            token,
                            production: None,
                            position,
                        })
                }
                Action::Reduce(prod) => {
                    !grammar.productions[prod].dynamic
                        || filter(&DynamicContext {
                            grammar,
                            action,
                            token,
                            production: Some(prod),
                            position,
                        })
                }
                Action::Accept => true,
            })
            .collect();

        if filtered.is_empty() {
            return Err(Error::DynamicDisambiguation(format!(
                "dynamic disambiguation rejected every action at position \
                 {position}"
            )));
        }
        let significant = filtered
            .iter()
            .filter(|action| match action {
                Action::Shift(_) => true,
                Action::Reduce(prod) => {
                    !grammar.productions[*prod].rhs.is_empty()
                }
                Action::Accept => false,
            })
            .count();
        if significant > 1 {
            return Err(Error::DynamicDisambiguation(format!(
                "dynamic disambiguation left more than one shift or \
                 non-empty reduction at position {position}"
            )));
        }
        Ok(filtered)
    }
}

pub(crate) fn token_str(grammar: &Grammar, token: &Token) -> String {
    format!(
        "{}(\"{}\")",
        grammar.terminals[token.symbol].name, token.value
    )
}
