//! LR automaton construction: FIRST/FOLLOW analysis, item set closure,
//! state generation with LALR merging, conflict resolution and the
//! scanning optimization flags.

use std::collections::{BTreeSet, VecDeque};

use indexmap::IndexMap;

use crate::{
    error::{ConflictKind, Error, Result},
    grammar::{Associativity, Grammar, EMPTY, STOP},
    index::{
        NonTermIndex, ProdIndex, StateIndex, StateVec, SymbolIndex, SymbolVec, TermIndex,
    },
    log,
};

pub type Follow = BTreeSet<TermIndex>;
pub type FirstSets = SymbolVec<Follow>;
pub type FollowSets = SymbolVec<Follow>;

/// Flavor of item sets used for table construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableType {
    /// LR(1) items with same-kernel state merging.
    #[default]
    Lalr,
    /// LR(0) items; reductions use FOLLOW sets.
    Slr,
}

#[derive(Debug, Clone)]
pub struct TableSettings {
    pub table_type: TableType,
    /// Resolve shift/reduce conflicts in favor of shift.
    pub prefer_shifts: bool,
    /// Resolve shift/reduce conflicts against empty reductions.
    pub prefer_shifts_over_empty: bool,
    /// Production the start state is built from; production 0 unless a
    /// layout table is being built.
    pub start_production: ProdIndex,
}

impl Default for TableSettings {
    fn default() -> Self {
        TableSettings {
            table_type: TableType::Lalr,
            prefer_shifts: true,
            prefer_shifts_over_empty: true,
            start_production: ProdIndex(0),
        }
    }
}

impl TableSettings {
    /// Defaults for the GLR driver: conflicts are kept in the table.
    pub fn glr() -> Self {
        TableSettings {
            prefer_shifts: false,
            prefer_shifts_over_empty: false,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Shift(StateIndex),
    Reduce(ProdIndex),
    Accept,
}

/// A residual LR conflict left unresolved by all policies.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub state: StateIndex,
    pub term: TermIndex,
    /// Reductions involved in the conflict.
    pub productions: Vec<ProdIndex>,
    /// Deferred to the dynamic disambiguation filter at parse time.
    pub dynamic: bool,
}

/// An LR item: a production with a dot position and, for LR(1) item sets,
/// a follow set. Items are identified by (production, position); follows
/// are unioned when items meet.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LRItem {
    prod: ProdIndex,
    position: usize,
    follow: Follow,
}

impl LRItem {
    fn with_follow(prod: ProdIndex, follow: Follow) -> Self {
        LRItem { prod, position: 0, follow }
    }

    fn symbol_at_position(&self, grammar: &Grammar) -> Option<SymbolIndex> {
        grammar.productions[self.prod].rhs.get(self.position).copied()
    }

    fn is_at_end(&self, grammar: &Grammar) -> bool {
        self.position >= grammar.productions[self.prod].rhs.len()
    }

    fn pos_inc(&self) -> Self {
        LRItem {
            prod: self.prod,
            position: self.position + 1,
            follow: self.follow.clone(),
        }
    }
}

#[derive(Debug)]
pub struct LRState {
    pub idx: StateIndex,
    /// The symbol this state is accessed with.
    pub symbol: SymbolIndex,
    /// Items; the first `kernel_size` are the kernel.
    items: Vec<LRItem>,
    kernel_size: usize,
    /// ACTION table, ordered by descending terminal priority after
    /// finalization.
    pub actions: IndexMap<TermIndex, Vec<Action>>,
    pub gotos: IndexMap<NonTermIndex, StateIndex>,
    /// Parallel to `actions`: true when a match of that terminal is
    /// exclusive and remaining candidates need not be tried.
    pub finish_flags: Vec<bool>,
    /// All outgoing transitions, used for follow propagation.
    transitions: IndexMap<SymbolIndex, StateIndex>,
    /// Max priority over productions responsible for a shift per symbol.
    max_prior_per_symbol: IndexMap<SymbolIndex, u32>,
}

impl LRState {
    fn new(idx: StateIndex, symbol: SymbolIndex, kernel: Vec<LRItem>) -> Self {
        LRState {
            idx,
            symbol,
            kernel_size: kernel.len(),
            items: kernel,
            actions: IndexMap::new(),
            gotos: IndexMap::new(),
            finish_flags: vec![],
            transitions: IndexMap::new(),
            max_prior_per_symbol: IndexMap::new(),
        }
    }

    /// Rebuilds a state from persisted tables; items are not restored.
    pub(crate) fn from_persisted(
        idx: StateIndex,
        symbol: SymbolIndex,
        actions: IndexMap<TermIndex, Vec<Action>>,
        gotos: IndexMap<NonTermIndex, StateIndex>,
        finish_flags: Vec<bool>,
    ) -> Self {
        LRState {
            idx,
            symbol,
            kernel_size: 0,
            items: vec![],
            actions,
            gotos,
            finish_flags,
            transitions: IndexMap::new(),
            max_prior_per_symbol: IndexMap::new(),
        }
    }

    fn kernel(&self) -> &[LRItem] {
        &self.items[..self.kernel_size]
    }

    /// Kernel equality ignoring follows, as used for LALR merging.
    fn same_kernel(&self, kernel: &[LRItem]) -> bool {
        self.kernel_size == kernel.len()
            && kernel.iter().all(|item| {
                self.kernel()
                    .iter()
                    .any(|k| k.prod == item.prod && k.position == item.position)
            })
    }

    /// Renders the state's items for conflict reports.
    pub fn describe(&self, grammar: &Grammar) -> String {
        let mut out = format!(
            "State {}:{}\n",
            self.idx,
            grammar.symbol_name(self.symbol)
        );
        for item in &self.items {
            let production = &grammar.productions[item.prod];
            let mut rhs: Vec<String> = production
                .rhs
                .iter()
                .map(|&s| grammar.symbol_name(s).to_owned())
                .collect();
            rhs.insert(item.position, ".".into());
            let follows: Vec<&str> = item
                .follow
                .iter()
                .map(|&t| grammar.terminals[t].name.as_str())
                .collect();
            out.push_str(&format!(
                "\t{}: {} {{{}}}\n",
                grammar.nonterminals[production.nonterminal].name,
                rhs.join(" "),
                follows.join(", ")
            ));
        }
        out
    }
}

#[derive(Debug)]
pub struct LRTable {
    pub states: StateVec<LRState>,
    pub sr_conflicts: Vec<Conflict>,
    pub rr_conflicts: Vec<Conflict>,
}

impl LRTable {
    /// Calculates the LR table (all states with GOTOs and ACTIONs) for the
    /// given grammar. Residual conflicts are recorded, not fatal; the
    /// caller decides (fatal for LR, tolerated for GLR).
    pub fn new(grammar: &Grammar, settings: &TableSettings) -> Result<LRTable> {
        let first_sets = first_sets(grammar);
        check_empty_sets(grammar, &first_sets)?;
        let follow_sets = follow_sets(grammar, &first_sets);

        let mut builder = TableBuilder {
            grammar,
            settings,
            first_sets,
            follow_sets,
            states: vec![],
            sr_conflicts: vec![],
            rr_conflicts: vec![],
        };
        builder.build_states();
        if builder.settings.table_type == TableType::Lalr {
            builder.propagate_follows();
        }
        builder.generate_reductions();
        builder.finish_flags();

        let table = LRTable {
            states: builder.states.into_iter().collect(),
            sr_conflicts: builder.sr_conflicts,
            rr_conflicts: builder.rr_conflicts,
        };

        // The start state must offer at least one shift, otherwise no
        // input could ever be accepted.
        if table.states[StateIndex(0)].actions.is_empty() {
            return Err(Error::ParserInit(
                "no SHIFT actions in the start state; the grammar cannot \
                 derive any input"
                    .into(),
            ));
        }
        Ok(table)
    }

    /// Renders all residual conflicts, parser-construction style.
    pub fn conflicts_report(&self, grammar: &Grammar) -> String {
        let mut out = String::new();
        for conflict in self.sr_conflicts.iter().chain(&self.rr_conflicts) {
            let state = &self.states[conflict.state];
            out.push_str(&state.describe(grammar));
            let prods: Vec<String> = conflict
                .productions
                .iter()
                .map(|&p| format!("'{}'", grammar.production_str(p)))
                .collect();
            let dynamic = if conflict.dynamic {
                " Dynamic disambiguation strategy will be called."
            } else {
                ""
            };
            match conflict.kind {
                ConflictKind::ShiftReduce => out.push_str(&format!(
                    "In state {}:{} and input symbol '{}' can't decide \
                     whether to shift or reduce by production(s) {}.{}\n",
                    conflict.state,
                    grammar.symbol_name(state.symbol),
                    grammar.terminals[conflict.term].name,
                    prods.join(" or "),
                    dynamic,
                )),
                ConflictKind::ReduceReduce => out.push_str(&format!(
                    "In state {}:{} and input symbol '{}' can't decide \
                     which reduction to perform: {}.{}\n",
                    conflict.state,
                    grammar.symbol_name(state.symbol),
                    grammar.terminals[conflict.term].name,
                    prods.join(" or "),
                    dynamic,
                )),
            }
        }
        out
    }
}

struct TableBuilder<'g> {
    grammar: &'g Grammar,
    settings: &'g TableSettings,
    first_sets: FirstSets,
    follow_sets: FollowSets,
    states: Vec<LRState>,
    sr_conflicts: Vec<Conflict>,
    rr_conflicts: Vec<Conflict>,
}

impl<'g> TableBuilder<'g> {
    fn build_states(&mut self) {
        let grammar = self.grammar;
        let start_prod = self.settings.start_production;
        let start_kernel =
            LRItem::with_follow(start_prod, Follow::from([STOP]));

        let start = LRState::new(
            StateIndex(0),
            grammar.nonterm_to_symbol(crate::grammar::AUG),
            vec![start_kernel],
        );

        let mut queue: VecDeque<LRState> = VecDeque::from([start]);
        let mut next_id = 1usize;

        while let Some(mut state) = queue.pop_front() {
            // Expand kernel items to the full closure, then group items by
            // the grammar symbol right of the dot.
            self.closure(&mut state.items);

            let mut per_next_symbol: IndexMap<SymbolIndex, Vec<usize>> =
                IndexMap::new();
            for (idx, item) in state.items.iter().enumerate() {
                if let Some(symbol) = item.symbol_at_position(grammar) {
                    per_next_symbol.entry(symbol).or_default().push(idx);

                    // Productions are grouped by the symbol ahead; the max
                    // priority of the group drives shift/reduce resolution.
                    let prior = grammar.productions[item.prod].prior;
                    let entry =
                        state.max_prior_per_symbol.entry(symbol).or_insert(prior);
                    *entry = (*entry).max(prior);
                }
            }

            for (&symbol, item_idxs) in &per_next_symbol {
                let kernel: Vec<LRItem> =
                    item_idxs.iter().map(|&i| state.items[i].pos_inc()).collect();

                let target = self.find_or_create_state(
                    &mut queue,
                    &mut next_id,
                    symbol,
                    kernel,
                );

                state.transitions.insert(symbol, target);
                if grammar.is_nonterm(symbol) {
                    state.gotos.insert(grammar.symbol_to_nonterm(symbol), target);
                } else if symbol == grammar.stop_symbol() {
                    state.actions.insert(STOP, vec![Action::Accept]);
                } else {
                    state.actions.insert(
                        grammar.symbol_to_term(symbol),
                        vec![Action::Shift(target)],
                    );
                }
            }

            log!(
                "Processed state {} with {} items.",
                state.idx,
                state.items.len()
            );
            self.states.push(state);
        }
    }

    /// Finds an existing state with the same kernel, merging follows for
    /// LALR construction. A merge that would introduce a new reduce/reduce
    /// collision is rejected and the candidate becomes a distinct state.
    fn find_or_create_state(
        &mut self,
        queue: &mut VecDeque<LRState>,
        next_id: &mut usize,
        symbol: SymbolIndex,
        kernel: Vec<LRItem>,
    ) -> StateIndex {
        let lalr = self.settings.table_type == TableType::Lalr;
        let grammar = self.grammar;

        for existing in self.states.iter_mut().chain(queue.iter_mut()) {
            if existing.symbol != symbol || !existing.same_kernel(&kernel) {
                continue;
            }
            if !lalr {
                // LR(0) kernels have no follows; same kernel is the state.
                return existing.idx;
            }
            if merge_kernels(grammar, &mut existing.items, &kernel) {
                return existing.idx;
            }
        }

        let idx = StateIndex(*next_id);
        *next_id += 1;
        queue.push_back(LRState::new(idx, symbol, kernel));
        idx
    }

    /// LR(0)/LR(1) item set closure over `items`.
    ///
    /// Starting from the kernel items, for each item with a non-terminal
    /// right of the dot, adds items for all of its productions with the dot
    /// at the beginning. Follows of existing items are widened as new paths
    /// to them are found. Fixed point.
    fn closure(&self, items: &mut Vec<LRItem>) {
        let grammar = self.grammar;
        let lr1 = self.settings.table_type == TableType::Lalr;

        loop {
            let mut changed = false;
            let mut idx = 0;
            while idx < items.len() {
                let item = items[idx].clone();
                idx += 1;
                let Some(symbol) = item.symbol_at_position(grammar) else {
                    continue;
                };
                if !grammar.is_nonterm(symbol) {
                    continue;
                }

                // The follow of a closure item is FIRST of what comes after
                // the non-terminal; if that can derive EMPTY the source
                // item's follow is inherited.
                let new_follow = if lr1 {
                    let production = &grammar.productions[item.prod];
                    let rest = &production.rhs[item.position + 1..];
                    let mut follow = firsts(&self.first_sets, rest);
                    if follow.remove(&EMPTY) {
                        follow.extend(item.follow.iter().copied());
                    }
                    follow
                } else {
                    Follow::new()
                };

                let nonterm = grammar.symbol_to_nonterm(symbol);
                for &prod in &grammar.nonterminals[nonterm].productions {
                    match items
                        .iter()
                        .position(|i| i.prod == prod && i.position == 0)
                    {
                        Some(existing) => {
                            if lr1
                                && !new_follow.is_subset(&items[existing].follow)
                            {
                                items[existing]
                                    .follow
                                    .extend(new_follow.iter().copied());
                                changed = true;
                            }
                        }
                        None => {
                            items.push(LRItem::with_follow(
                                prod,
                                new_follow.clone(),
                            ));
                            changed = true;
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// LALR merging can widen kernel follows of already-processed states.
    /// Propagate those updates through transitions and refresh closures
    /// until stable.
    fn propagate_follows(&mut self) {
        loop {
            let mut changed = false;

            for idx in 0..self.states.len() {
                let mut items = std::mem::take(&mut self.states[idx].items);
                let before: Vec<usize> =
                    items.iter().map(|i| i.follow.len()).collect();
                self.closure(&mut items);
                if items.len() != before.len()
                    || items
                        .iter()
                        .zip(&before)
                        .any(|(item, &len)| item.follow.len() != len)
                {
                    changed = true;
                }
                self.states[idx].items = items;
            }

            // Push follows of advanced items into successor kernels.
            let mut updates: Vec<(usize, ProdIndex, usize, Follow)> = vec![];
            for state in &self.states {
                for (&symbol, &target) in &state.transitions {
                    for item in &state.items {
                        if item.symbol_at_position(self.grammar) == Some(symbol) {
                            updates.push((
                                target.0,
                                item.prod,
                                item.position + 1,
                                item.follow.clone(),
                            ));
                        }
                    }
                }
            }
            for (state_idx, prod, position, follow) in updates {
                let state = &mut self.states[state_idx];
                let kernel_size = state.kernel_size;
                for item in &mut state.items[..kernel_size] {
                    if item.prod == prod
                        && item.position == position
                        && !follow.is_subset(&item.follow)
                    {
                        item.follow.extend(follow.iter().copied());
                        changed = true;
                    }
                }
            }

            if !changed {
                break;
            }
        }
    }

    /// Adds Reduce actions for at-end items and resolves collisions with
    /// priorities, associativities and the prefer-shifts policies.
    fn generate_reductions(&mut self) {
        let grammar = self.grammar;
        let lr1 = self.settings.table_type == TableType::Lalr;

        for state_idx in 0..self.states.len() {
            for item_idx in 0..self.states[state_idx].items.len() {
                let item = self.states[state_idx].items[item_idx].clone();
                if !item.is_at_end(grammar) {
                    continue;
                }
                // The augmented production completes through Accept.
                if grammar.productions[item.prod].nonterminal
                    == crate::grammar::AUG
                {
                    continue;
                }
                let follow = if lr1 {
                    item.follow
                } else {
                    let lhs = grammar.lhs_symbol(item.prod);
                    self.follow_sets[lhs].clone()
                };
                for &term in &follow {
                    if term == EMPTY {
                        continue;
                    }
                    self.add_reduction(state_idx, term, item.prod);
                }
            }
        }
    }

    fn add_reduction(&mut self, state_idx: usize, term: TermIndex, prod: ProdIndex) {
        let grammar = self.grammar;
        let production = &grammar.productions[prod];
        let state = &mut self.states[state_idx];
        let actions = state.actions.entry(term).or_default();

        let Some(&first) = actions.first() else {
            actions.push(Action::Reduce(prod));
            return;
        };
        if actions.contains(&Action::Reduce(prod)) {
            return;
        }

        match first {
            Action::Shift(_) => {
                // Shift/Reduce: the higher priority wins; on a tie the
                // reduction's associativity decides, then the global
                // prefer-shifts policies.
                let shift_prior = state
                    .max_prior_per_symbol
                    .get(&term.to_symbol_index())
                    .copied()
                    .unwrap_or(crate::grammar::DEFAULT_PRIORITY);
                if production.prior > shift_prior {
                    *actions = vec![Action::Reduce(prod)];
                } else if production.prior < shift_prior {
                    // Keep the shift.
                } else {
                    match production.assoc {
                        Associativity::Left => {
                            *actions = vec![Action::Reduce(prod)];
                        }
                        Associativity::Right => {}
                        Associativity::None => {
                            // A dynamic production or terminal defers the
                            // conflict to the parse-time filter; the
                            // prefer-shifts policies do not touch it.
                            let dynamic = production.dynamic
                                || grammar.terminals[term].dynamic;
                            let empty_rhs = production.rhs.is_empty();
                            let suppressed = !dynamic
                                && if empty_rhs {
                                    (self.settings.prefer_shifts_over_empty
                                        && !production.nopse)
                                        || (self.settings.prefer_shifts
                                            && !production.nops)
                                } else {
                                    self.settings.prefer_shifts
                                        && !production.nops
                                };
                            if !suppressed {
                                actions.push(Action::Reduce(prod));
                                self.sr_conflicts.push(Conflict {
                                    kind: ConflictKind::ShiftReduce,
                                    state: StateIndex(state_idx),
                                    term,
                                    productions: vec![prod],
                                    dynamic,
                                });
                            }
                        }
                    }
                }
            }
            Action::Reduce(other) => {
                let other_prior = grammar.productions[other].prior;
                if production.prior > other_prior {
                    *actions = vec![Action::Reduce(prod)];
                } else if production.prior < other_prior {
                    // Keep the existing reduction.
                } else {
                    actions.push(Action::Reduce(prod));
                    let dynamic = production.dynamic
                        || grammar.productions[other].dynamic
                        || grammar.terminals[term].dynamic;
                    self.rr_conflicts.push(Conflict {
                        kind: ConflictKind::ReduceReduce,
                        state: StateIndex(state_idx),
                        term,
                        productions: vec![other, prod],
                        dynamic,
                    });
                }
            }
            Action::Accept => {
                // Reductions on STOP coexist with Accept; the GLR driver
                // may need them while LR accepts first.
                actions.push(Action::Reduce(prod));
            }
        }
    }

    /// Orders each state's actions by descending terminal priority and
    /// computes the finish flags: a flag is set when a match of that
    /// terminal is exclusive so remaining candidates need not be tried.
    fn finish_flags(&mut self) {
        let grammar = self.grammar;
        for state in &mut self.states {
            let mut entries: Vec<(TermIndex, Vec<Action>)> =
                state.actions.drain(..).collect();
            entries.sort_by_key(|(term, _)| {
                std::cmp::Reverse(grammar.terminals[*term].prior)
            });
            state.actions = entries.into_iter().collect();

            let terms: Vec<TermIndex> = state.actions.keys().copied().collect();
            state.finish_flags = terms
                .iter()
                .enumerate()
                .map(|(idx, &term)| {
                    let terminal = &grammar.terminals[term];
                    terminal.finish.unwrap_or_else(|| {
                        // Implicit rule: a string or keyword match is
                        // exclusive when no later candidate could win
                        // disambiguation through priority.
                        (terminal.recognizer.is_str_const() || terminal.keyword)
                            && terms[idx + 1..].iter().all(|&later| {
                                grammar.terminals[later].prior < terminal.prior
                            })
                    })
                })
                .collect();
        }
    }
}

/// Tries to merge a candidate kernel into an existing state's kernel by
/// unioning follows item-wise. Rejected when the union would introduce a
/// reduce/reduce collision that neither state has on its own.
fn merge_kernels(
    grammar: &Grammar,
    existing_items: &mut [LRItem],
    kernel: &[LRItem],
) -> bool {
    let pairs: Vec<(usize, &LRItem)> = kernel
        .iter()
        .map(|item| {
            let existing = existing_items
                .iter()
                .position(|e| e.prod == item.prod && e.position == item.position)
                .expect("kernels already compared equal");
            (existing, item)
        })
        .collect();

    let at_end: Vec<&(usize, &LRItem)> = pairs
        .iter()
        .filter(|(_, item)| item.is_at_end(grammar))
        .collect();
    for (i, a) in at_end.iter().enumerate() {
        for (j, b) in at_end.iter().enumerate() {
            if i == j {
                continue;
            }
            let old_a = &existing_items[a.0].follow;
            let old_b = &existing_items[b.0].follow;
            let cross = !old_a.is_disjoint(&b.1.follow)
                || !a.1.follow.is_disjoint(old_b);
            let pre_existing = !old_a.is_disjoint(old_b)
                || !a.1.follow.is_disjoint(&b.1.follow);
            if cross && !pre_existing {
                return false;
            }
        }
    }

    for (existing, item) in pairs {
        existing_items[existing]
            .follow
            .extend(item.follow.iter().copied());
    }
    true
}

/// Checks that no grammar symbol has an empty FIRST set, which would mean
/// an infinite recursion on the symbol.
fn check_empty_sets(grammar: &Grammar, first_sets: &FirstSets) -> Result<()> {
    for (idx, set) in first_sets.iter().enumerate() {
        if set.is_empty() {
            return Err(Error::grammar(format!(
                "first set empty for grammar symbol \"{}\": an infinite \
                 recursion on the grammar symbol",
                grammar.symbol_name(SymbolIndex(idx))
            )));
        }
    }
    Ok(())
}

/// Calculates the sets of terminals that can start sentences derived from
/// each grammar symbol.
///
/// The Dragon book p. 221.
pub fn first_sets(grammar: &Grammar) -> FirstSets {
    let mut first_sets = SymbolVec::new();

    for terminal in &grammar.terminals {
        first_sets.push(Follow::from([terminal.idx]));
    }
    for _ in &grammar.nonterminals {
        first_sets.push(Follow::new());
    }

    let mut additions = true;
    while additions {
        additions = false;
        for production in &grammar.productions {
            let lhs = grammar.nonterm_to_symbol(production.nonterminal);
            let before = first_sets[lhs].len();
            let rhs_firsts = firsts(&first_sets, &production.rhs);
            first_sets[lhs].extend(rhs_firsts);
            if first_sets[lhs].len() > before {
                additions = true;
            }
        }
    }
    first_sets
}

/// FIRST terminals of a sequence of symbols. EMPTY is included iff every
/// symbol of the sequence can derive EMPTY.
pub fn firsts(
    first_sets: &FirstSets,
    symbols: &[SymbolIndex],
) -> Follow {
    let mut result = Follow::new();
    for &symbol in symbols {
        let symbol_firsts = &first_sets[symbol];
        let empty = symbol_firsts.contains(&EMPTY);
        result.extend(symbol_firsts.iter().filter(|&&t| t != EMPTY));
        // Proceed to the next symbol only if this one can derive EMPTY.
        if !empty {
            return result;
        }
    }
    result.insert(EMPTY);
    result
}

/// Calculates the sets of terminals that can follow each non-terminal.
///
/// The Dragon book p. 221.
pub fn follow_sets(grammar: &Grammar, first_sets: &FirstSets) -> FollowSets {
    let mut follow_sets: FollowSets =
        (0..first_sets.len()).map(|_| Follow::new()).collect();

    // Rule 1: STOP follows the start symbol.
    follow_sets[grammar.start_symbol].insert(STOP);

    let mut additions = true;
    while additions {
        additions = false;
        for production in &grammar.productions {
            let lhs = grammar.nonterm_to_symbol(production.nonterminal);
            for idx in 0..production.rhs.len() {
                let rhs_symbol = production.rhs[idx];
                let before = follow_sets[rhs_symbol].len();

                // Rule 2: for A -> α B β, FIRST(β) \ {EMPTY} is in
                // FOLLOW(B); rule 3: if β derives EMPTY, FOLLOW(A) too.
                let rest_firsts =
                    firsts(first_sets, &production.rhs[idx + 1..]);
                let rest_derives_empty = rest_firsts.contains(&EMPTY);
                follow_sets[rhs_symbol]
                    .extend(rest_firsts.into_iter().filter(|&t| t != EMPTY));
                if rest_derives_empty {
                    let lhs_follows = follow_sets[lhs].clone();
                    follow_sets[rhs_symbol].extend(lhs_follows);
                }

                if follow_sets[rhs_symbol].len() > before {
                    additions = true;
                }
            }
        }
    }
    follow_sets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Grammar;
    use std::collections::BTreeSet;

    fn test_grammar() -> Grammar {
        Grammar::from_string(
            r#"
            E: T Ep;
            Ep: "+" T Ep | EMPTY;
            T: F Tp;
            Tp: "*" F Tp | EMPTY;
            F: "(" E ")" | "id";
            "#,
        )
        .unwrap()
    }

    fn set_of(grammar: &Grammar, sets: &SymbolVec<Follow>, name: &str) -> BTreeSet<String> {
        sets[grammar.symbol_index(name).unwrap()]
            .iter()
            .map(|&t| grammar.terminals[t].name.clone())
            .collect()
    }

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_sets() {
        let grammar = test_grammar();
        let first_sets = first_sets(&grammar);

        // First of a terminal is the terminal itself.
        assert_eq!(set_of(&grammar, &first_sets, "id"), names(&["id"]));
        assert_eq!(set_of(&grammar, &first_sets, "F"), names(&["(", "id"]));
        assert_eq!(set_of(&grammar, &first_sets, "T"), names(&["(", "id"]));
        assert_eq!(set_of(&grammar, &first_sets, "E"), names(&["(", "id"]));
        assert_eq!(set_of(&grammar, &first_sets, "Ep"), names(&["+", "EMPTY"]));
        assert_eq!(set_of(&grammar, &first_sets, "Tp"), names(&["*", "EMPTY"]));
    }

    #[test]
    fn first_contains_empty_iff_derives_empty() {
        let grammar = test_grammar();
        let first_sets = first_sets(&grammar);
        for name in ["E", "T", "F"] {
            assert!(!set_of(&grammar, &first_sets, name).contains("EMPTY"));
        }
        for name in ["Ep", "Tp"] {
            assert!(set_of(&grammar, &first_sets, name).contains("EMPTY"));
        }
    }

    #[test]
    fn test_follow_sets() {
        let grammar = test_grammar();
        let follow_sets = follow_sets(&grammar, &first_sets(&grammar));

        assert_eq!(set_of(&grammar, &follow_sets, "E"), names(&[")", "STOP"]));
        assert_eq!(set_of(&grammar, &follow_sets, "Ep"), names(&[")", "STOP"]));
        assert_eq!(
            set_of(&grammar, &follow_sets, "T"),
            names(&["+", ")", "STOP"])
        );
        assert_eq!(
            set_of(&grammar, &follow_sets, "Tp"),
            names(&["+", ")", "STOP"])
        );
    }

    #[test]
    fn infinite_recursion_detected() {
        let grammar = Grammar::from_string("S: S;").unwrap();
        let err = LRTable::new(&grammar, &TableSettings::default()).unwrap_err();
        assert!(err.to_string().contains("infinite recursion"));
    }

    #[test]
    fn lr_table_for_expression_grammar() {
        let grammar = test_grammar();
        let table = LRTable::new(&grammar, &TableSettings::default()).unwrap();
        assert!(table.sr_conflicts.is_empty());
        assert!(table.rr_conflicts.is_empty());
        // The start state shifts the FIRST terminals of E.
        let start = &table.states[StateIndex(0)];
        let shift_terms: Vec<&str> = start
            .actions
            .keys()
            .map(|&t| grammar.terminals[t].name.as_str())
            .collect();
        assert!(shift_terms.contains(&"("));
        assert!(shift_terms.contains(&"id"));
    }

    #[test]
    fn at_most_one_shift_per_terminal() {
        let grammar = Grammar::from_string(
            r#"
            E: E "+" E | E "*" E | "(" E ")" | Number;
            terminals
            Number: /\d+/;
            "#,
        )
        .unwrap();
        let table = LRTable::new(&grammar, &TableSettings::glr()).unwrap();
        for state in &table.states {
            for actions in state.actions.values() {
                let shifts = actions
                    .iter()
                    .filter(|a| matches!(a, Action::Shift(_)))
                    .count();
                assert!(shifts <= 1);
                // A shift, when present, comes first.
                if shifts == 1 {
                    assert!(matches!(actions[0], Action::Shift(_)));
                }
            }
        }
    }

    #[test]
    fn ambiguous_grammar_conflicts_recorded() {
        let grammar = Grammar::from_string(
            r#"
            E: E "+" E | E "*" E | "(" E ")" | Number;
            terminals
            Number: /\d+/;
            "#,
        )
        .unwrap();
        let table = LRTable::new(&grammar, &TableSettings::glr()).unwrap();
        assert!(!table.sr_conflicts.is_empty());
        // prefer_shifts resolves all of them.
        let table = LRTable::new(&grammar, &TableSettings::default()).unwrap();
        assert!(table.sr_conflicts.is_empty());
    }

    #[test]
    fn associativity_resolves_conflicts() {
        let grammar = Grammar::from_string(
            r#"
            E: E "+" E {left, 1} | E "*" E {left, 2} | "(" E ")" | Number;
            terminals
            Number: /\d+(\.\d+)?/;
            "#,
        )
        .unwrap();
        let settings = TableSettings {
            prefer_shifts: false,
            prefer_shifts_over_empty: false,
            ..Default::default()
        };
        let table = LRTable::new(&grammar, &settings).unwrap();
        assert!(table.sr_conflicts.is_empty());
        assert!(table.rr_conflicts.is_empty());
    }

    #[test]
    fn finish_flags_parallel_actions() {
        let grammar = test_grammar();
        let table = LRTable::new(&grammar, &TableSettings::default()).unwrap();
        for state in &table.states {
            assert_eq!(state.actions.len(), state.finish_flags.len());
        }
    }
}
