//! Tomita-style GLR driver over a Graph-Structured Stack.
//!
//! The single LR stack becomes a DAG of nodes labeled with LR states;
//! parent links carry shared packed parse forest handles. Conflicting
//! actions fork heads instead of failing, lexical ambiguities fork one
//! head per candidate token, and all surviving derivations are packed
//! into a [`Forest`].

pub mod forest;

pub use forest::{Forest, Possibility};

#[cfg(debug_assertions)]
use colored::Colorize;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::{
    error::{Error, Result, SyntaxError},
    grammar::Grammar,
    index::{ProdIndex, StateIndex, TermIndex},
    lexer::{next_tokens, tokens_ahead, Token},
    log,
    parser::{token_str, DynamicContext, Parser, ParserSettings},
    table::{Action, LRTable, TableSettings},
};

use forest::{ParentIdx, SppfArena};

/// A GSS node. Identity for merging is `(state, start_position, token
/// ahead)`; merging unions parent links, with non-empty derivations
/// dominating empty ones.
struct GssNode<'i> {
    state: StateIndex,
    start_position: usize,
    end_position: usize,
    /// This node's derivation is purely epsilon-derived.
    empty: bool,
    parents: Vec<GssParent>,
    token_ahead: Option<Token<'i>>,
    /// Position after this node's content and any skipped layout.
    next_position: usize,
    next_layout: &'i str,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct GssParent {
    node: usize,
    sppf: ParentIdx,
}

impl<'i> GssNode<'i> {
    fn new(state: StateIndex, start: usize, end: usize, empty: bool) -> Self {
        GssNode {
            state,
            start_position: start,
            end_position: end,
            empty,
            parents: vec![],
            token_ahead: None,
            next_position: end,
            next_layout: "",
        }
    }

    fn same_head(&self, other: &GssNode<'i>) -> bool {
        self.state == other.state
            && self.start_position == other.start_position
            && token_key(&self.token_ahead) == token_key(&other.token_ahead)
    }
}

fn token_key<'i>(token: &Option<Token<'i>>) -> Option<(TermIndex, usize, usize)> {
    token.as_ref().map(|t| (t.symbol, t.position, t.length))
}

/// The GLR parser. Accepts tables with conflicts; the prefer-shifts
/// policies default to off so every derivation survives into the forest.
pub struct GlrParser<'g> {
    pub grammar: &'g Grammar,
    pub table: LRTable,
    settings: ParserSettings,
    layout_parser: Option<Box<Parser<'g>>>,
}

impl<'g> GlrParser<'g> {
    pub fn new(grammar: &'g Grammar) -> Result<Self> {
        Self::with_settings(grammar, ParserSettings::default())
    }

    pub fn with_settings(grammar: &'g Grammar, settings: ParserSettings) -> Result<Self> {
        let table_settings = TableSettings {
            table_type: settings.table_type,
            prefer_shifts: settings.prefer_shifts.unwrap_or(false),
            prefer_shifts_over_empty: settings
                .prefer_shifts_over_empty
                .unwrap_or(false),
            start_production: ProdIndex(0),
        };
        let table = LRTable::new(grammar, &table_settings)?;
        let layout_parser = Parser::build_layout(grammar, &settings)?;
        Ok(GlrParser { grammar, table, settings, layout_parser })
    }

    /// Parses the input into a forest of all successful derivations.
    pub fn parse<'i>(&self, input: &'i str) -> Result<Forest<'i, 'g>> {
        GlrSession::new(self, input).run()
    }

    fn skip_layout<'i>(&self, input: &'i str, position: usize) -> (usize, &'i str) {
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
}

struct GlrSession<'i, 'g, 'p> {
    parser: &'p GlrParser<'g>,
    grammar: &'g Grammar,
    input: &'i str,
    gss: Vec<GssNode<'i>>,
    arena: SppfArena<'i>,
    heads_for_reduce: Vec<usize>,
    heads_for_shift: Vec<usize>,
    finish_heads: Vec<usize>,
    /// Guards against re-running an empty reduction on the same head.
    empty_reductions: HashSet<(usize, ProdIndex)>,
    /// Furthest position reached, for error reporting.
    last_position: usize,
    expected: BTreeSet<TermIndex>,
}

impl<'i, 'g, 'p> GlrSession<'i, 'g, 'p> {
    fn new(parser: &'p GlrParser<'g>, input: &'i str) -> Self {
        GlrSession {
            parser,
            grammar: parser.grammar,
            input,
            gss: vec![],
            arena: SppfArena::new(),
            heads_for_reduce: vec![],
            heads_for_shift: vec![],
            finish_heads: vec![],
            empty_reductions: HashSet::new(),
            last_position: 0,
            expected: BTreeSet::new(),
        }
    }

    fn run(mut self) -> Result<Forest<'i, 'g>> {
        // Leading layout is skipped when the start head finds its first
        // lookahead.
        let start = GssNode::new(StateIndex(0), 0, 0, false);
        self.gss.push(start);
        self.heads_for_reduce.push(0);

        while !self.heads_for_reduce.is_empty() {
            self.reducer()?;
            if !self.heads_for_shift.is_empty() {
                self.shifter();
            }
        }

        if self.finish_heads.is_empty() {
            let expected: Vec<String> = self
                .expected
                .iter()
                .map(|&t| self.grammar.terminals[t].name.clone())
                .collect();
            let ahead: Vec<String> =
                tokens_ahead(self.grammar, self.input, self.last_position)
                    .iter()
                    .map(|t| token_str(self.grammar, t))
                    .collect();
            return Err(Error::Syntax(Box::new(SyntaxError::new(
                self.input,
                self.last_position,
                None,
                expected,
                ahead,
            ))));
        }

        let results: Vec<ParentIdx> = {
            let mut seen = vec![];
            for &head in &self.finish_heads {
                for parent in &self.gss[head].parents {
                    if !seen.contains(&parent.sppf) {
                        seen.push(parent.sppf);
                    }
                }
            }
            seen
        };
        log!("GLR finished: {} accepted head(s).", self.finish_heads.len());
        Ok(Forest::build(self.grammar, self.arena, results))
    }

    /// Reduces active heads until no more reductions can be done,
    /// collecting heads that can shift.
    fn reducer(&mut self) -> Result<()> {
        while let Some(head_idx) = self.heads_for_reduce.pop() {
            let tokens = self.lookaheads(head_idx);
            if tokens.is_empty() {
                log!("No lookaheads for head {head_idx}; killing it.");
                continue;
            }

            for token in tokens {
                let reduce_head = self.head_for_token(head_idx, token.clone());
                let state = self.gss[reduce_head].state;
                let actions = match self.parser.table.states[state]
                    .actions
                    .get(&token.symbol)
                {
                    Some(actions) => self.filter_dynamic(actions, &token),
                    None => continue,
                };

                if token.is_stop()
                    && actions.contains(&Action::Accept)
                    && !self.finish_heads.contains(&reduce_head)
                {
                    log!("{} {reduce_head}.", "Accepting head".red());
                    self.finish_heads.push(reduce_head);
                }

                for action in &actions {
                    if let Action::Reduce(prod) = action {
                        self.reduce(reduce_head, *prod, &token);
                    }
                }
                if matches!(actions.first(), Some(Action::Shift(_))) {
                    if !self.heads_for_shift.contains(&reduce_head) {
                        self.heads_for_shift.push(reduce_head);
                    }
                }
            }
        }
        Ok(())
    }

    /// Lookahead tokens for a head: the cached token, or fresh lexing at
    /// the head's position. Several tokens mean lexical ambiguity and the
    /// head will fork.
    fn lookaheads(&mut self, head_idx: usize) -> Vec<Token<'i>> {
        if let Some(token) = &self.gss[head_idx].token_ahead {
            return vec![token.clone()];
        }
        let position = self.gss[head_idx].end_position;
        let (position, layout) = self.parser.skip_layout(self.input, position);
        {
            let head = &mut self.gss[head_idx];
            head.next_position = position;
            head.next_layout = layout;
        }

        let state = self.gss[head_idx].state;
        let state = &self.parser.table.states[state];
        if position > self.last_position {
            self.last_position = position;
            self.expected.clear();
        }
        if position >= self.last_position {
            self.expected.extend(state.actions.keys().copied());
        }

        next_tokens(
            self.grammar,
            state,
            self.input,
            position,
            !self.parser.settings.consume_input,
            self.parser.settings.lexical_disambiguation,
        )
    }

    /// Returns a head bound to the given lookahead, cloning the node when
    /// it already carries a different one (lexical ambiguity fork).
    fn head_for_token(&mut self, head_idx: usize, token: Token<'i>) -> usize {
        let head = &self.gss[head_idx];
        match &head.token_ahead {
            None => {
                self.gss[head_idx].token_ahead = Some(token);
                head_idx
            }
            Some(existing)
                if token_key(&Some(existing.clone()))
                    == token_key(&Some(token.clone())) =>
            {
                head_idx
            }
            Some(_) => {
                let head = &self.gss[head_idx];
                let mut clone = GssNode::new(
                    head.state,
                    head.start_position,
                    head.end_position,
                    head.empty,
                );
                clone.parents = head.parents.clone();
                clone.token_ahead = Some(token);
                clone.next_position = head.next_position;
                clone.next_layout = head.next_layout;
                self.gss.push(clone);
                self.gss.len() - 1
            }
        }
    }

    /// Executes a reduction for the given head and production: enumerates
    /// all stack paths of the production's length backwards through the
    /// GSS and creates (or merges into) a head per path.
    fn reduce(&mut self, head_idx: usize, prod: ProdIndex, token: &Token<'i>) {
        let production = &self.grammar.productions[prod];
        let arity = production.rhs.len();
        let lhs = production.nonterminal;
        let lhs_symbol = self.grammar.nonterm_to_symbol(lhs);
        log!(
            "{} {head_idx} by '{}'.",
            "Reducing head".green(),
            self.grammar.production_str(prod)
        );

        if arity == 0 {
            // Empty reduction: guarded per (head, production) to terminate
            // epsilon cycles; the arena shares the epsilon derivation.
            if !self.empty_reductions.insert((head_idx, prod)) {
                return;
            }
            let position = self.gss[head_idx].end_position;
            let parent = self.arena.add_possibility(
                lhs_symbol, position, position, prod, vec![],
            );
            let state = self.gss[head_idx].state;
            let Some(&goto) =
                self.parser.table.states[state].gotos.get(&lhs)
            else {
                return;
            };
            if goto == state {
                // Looping automaton transition.
                let link = GssParent { node: head_idx, sppf: parent };
                if !self.gss[head_idx].parents.contains(&link) {
                    self.gss[head_idx].parents.push(link);
                }
            } else {
                let head = &self.gss[head_idx];
                let mut new_head = GssNode::new(
                    goto,
                    position,
                    position,
                    true,
                );
                new_head.token_ahead = Some(token.clone());
                new_head.next_position = head.next_position;
                new_head.next_layout = head.next_layout;
                self.merge_create_head(new_head, head_idx, parent);
            }
            return;
        }

        // Enumerate paths of length `arity` backwards through the GSS,
        // collecting forest handles along each path.
        struct PendingPath {
            current_root: usize,
            left_to_go: usize,
            children: Vec<ParentIdx>,
            all_empty: bool,
        }
        let mut pending = vec![PendingPath {
            current_root: head_idx,
            left_to_go: arity,
            children: vec![],
            all_empty: self.gss[head_idx].empty,
        }];
        let mut paths: Vec<(usize, Vec<ParentIdx>, bool)> = vec![];
        while let Some(path) = pending.pop() {
            for link in self.gss[path.current_root].parents.clone() {
                let mut children = Vec::with_capacity(arity);
                children.push(link.sppf);
                children.extend(path.children.iter().copied());
                let all_empty = path.all_empty && self.gss[link.node].empty;
                if path.left_to_go > 1 {
                    pending.push(PendingPath {
                        current_root: link.node,
                        left_to_go: path.left_to_go - 1,
                        children,
                        all_empty,
                    });
                } else {
                    paths.push((link.node, children, all_empty));
                }
            }
        }

        // Prefer paths with at least one non-empty link; all-empty paths
        // are used only when nothing else exists.
        if paths.iter().any(|(_, _, all_empty)| !all_empty) {
            paths.retain(|(_, _, all_empty)| !all_empty);
        }

        for (root_idx, children, all_empty) in paths {
            let start = self.gss[root_idx].next_position;
            let end = self.gss[head_idx].end_position;
            let parent = self
                .arena
                .add_possibility(lhs_symbol, start, end, prod, children);
            let root_state = self.gss[root_idx].state;
            let Some(&goto) =
                self.parser.table.states[root_state].gotos.get(&lhs)
            else {
                continue;
            };
            let head = &self.gss[head_idx];
            let mut new_head = GssNode::new(goto, start, end, all_empty);
            new_head.token_ahead = Some(token.clone());
            new_head.next_position = head.next_position;
            new_head.next_layout = head.next_layout;
            self.merge_create_head(new_head, root_idx, parent);
        }
    }

    /// Creates a reduced head or merges it into an equal existing one,
    /// linking it to `root_idx` carrying the derivation `sppf`. A head
    /// that already left the worklist is re-queued when a genuinely new
    /// link arrives, so reductions over the new path are not lost; links
    /// are deduplicated, which bounds the re-queuing.
    fn merge_create_head(
        &mut self,
        new_head: GssNode<'i>,
        root_idx: usize,
        sppf: ParentIdx,
    ) {
        let existing =
            (0..self.gss.len()).find(|&idx| self.gss[idx].same_head(&new_head));

        match existing {
            Some(idx) => {
                log!("Merging into existing head {idx}.");
                let added = self.create_link(idx, root_idx, sppf, new_head.empty);
                if added && !self.heads_for_reduce.contains(&idx) {
                    self.heads_for_reduce.push(idx);
                }
            }
            None => {
                let empty = new_head.empty;
                self.gss.push(new_head);
                let idx = self.gss.len() - 1;
                log!("Created reduced head {idx}.");
                self.create_link(idx, root_idx, sppf, empty);
                self.heads_for_reduce.push(idx);
            }
        }
    }

    /// Adds a parent link, enforcing the domination rule: a non-empty
    /// derivation on a head drops purely-empty ones and vice versa.
    /// Returns true when a new link was actually added.
    fn create_link(
        &mut self,
        head_idx: usize,
        parent_idx: usize,
        sppf: ParentIdx,
        link_empty: bool,
    ) -> bool {
        let head = &mut self.gss[head_idx];
        if !head.parents.is_empty() {
            if link_empty && !head.empty {
                log!("Rejected linking an empty derivation to head {head_idx}.");
                return false;
            }
            if !link_empty && head.empty {
                log!("Dropping empty parents of head {head_idx}.");
                head.parents.clear();
                head.empty = false;
            }
        } else if !link_empty {
            head.empty = false;
        }
        let link = GssParent { node: parent_idx, sppf };
        if head.parents.contains(&link) {
            false
        } else {
            head.parents.push(link);
            true
        }
    }

    /// Performs all pending shifts, in order of end position. Heads
    /// shifting the same token into the same state collapse into one
    /// shifted head with merged parent links.
    fn shifter(&mut self) {
        let mut heads = std::mem::take(&mut self.heads_for_shift);
        heads.sort_by_key(|&idx| self.gss[idx].end_position);

        let mut last_shifts: HashMap<
            (StateIndex, usize, TermIndex),
            (usize, ParentIdx),
        > = HashMap::new();

        for head_idx in heads {
            let Some(token) = self.gss[head_idx].token_ahead.clone() else {
                continue;
            };
            let state = self.gss[head_idx].state;
            let Some(actions) =
                self.parser.table.states[state].actions.get(&token.symbol)
            else {
                continue;
            };
            let Some(&Action::Shift(next_state)) = actions.first() else {
                log!("Head {head_idx} can't shift; killing it.");
                continue;
            };

            let key = (next_state, token.position, token.symbol);
            match last_shifts.get(&key) {
                Some(&(shifted_idx, term_parent)) => {
                    log!("Merging shift into head {shifted_idx}.");
                    self.create_link(shifted_idx, head_idx, term_parent, false);
                }
                None => {
                    let layout = self.gss[head_idx].next_layout;
                    let term_parent = self.arena.term_parent(
                        token.symbol.to_symbol_index(),
                        token.clone(),
                        layout,
                    );
                    let new_head = GssNode::new(
                        next_state,
                        token.position,
                        token.end_position(),
                        false,
                    );
                    self.gss.push(new_head);
                    let idx = self.gss.len() - 1;
                    log!(
                        "{} {idx}: state {next_state:?} \"{}\".",
                        "Shifted head".green(),
                        token.value
                    );
                    self.create_link(idx, head_idx, term_parent, false);
                    last_shifts.insert(key, (idx, term_parent));
                    self.heads_for_reduce.push(idx);
                }
            }
        }
    }

    /// Applies the dynamic disambiguation filter to `dynamic`-marked
    /// actions; in GLR surviving alternatives all proceed.
    fn filter_dynamic(&self, actions: &[Action], token: &Token<'i>) -> Vec<Action> {
        let Some(filter) = &self.parser.settings.dynamic_filter else {
            return actions.to_vec();
        };
        // Only actual conflict points are arbitrated.
        if actions.len() <= 1 {
            return actions.to_vec();
        }
        let grammar = self.grammar;
        actions
            .iter()
            .copied()
            .filter(|&action| match action {
                Action::Shift(_) => {
                    !grammar.terminals[token.symbol].dynamic
                        || filter(&DynamicContext {
                            grammar,
                            action,
                            token,
                            production: None,
                            position: token.position,
                        })
                }
                Action::Reduce(prod) => {
                    !grammar.productions[prod].dynamic
                        || filter(&DynamicContext {
                            grammar,
                            action,
                            token,
                            production: Some(prod),
                            position: token.position,
                        })
                }
                Action::Accept => true,
            })
            .collect()
    }
}
