//! Grammar model: symbols, productions, BNF-extension desugaring.
//!
//! A [`Grammar`] is built either from the grammar DSL
//! ([`Grammar::from_string`]) or through the structural
//! [`GrammarBuilder`](builder::GrammarBuilder). After construction it is
//! immutable: desugaring, production enumeration, keyword fix-up and
//! recognizer binding all happen in [`Grammar::from_parts`].

pub mod builder;
pub mod dsl;

use indexmap::IndexMap;

use crate::{
    error::{Error, Result},
    index::{NonTermIndex, NonTermVec, ProdIndex, ProdVec, SymbolIndex, TermIndex, TermVec},
    location::Location,
    recognizer::{CustomRecognizer, Recognizer},
};

pub const DEFAULT_PRIORITY: u32 = 10;

/// Terminal index of the EMPTY sentinel (matches nothing, always succeeds
/// in reduction scheduling).
pub const EMPTY: TermIndex = TermIndex(0);
/// Terminal index of the end-of-input sentinel.
pub const STOP: TermIndex = TermIndex(1);
/// Non-terminal index of the augmented start symbol `S'`.
pub const AUG: NonTermIndex = NonTermIndex(0);

const RESERVED_SYMBOL_NAMES: [&str; 2] = ["STOP", "EMPTY"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Associativity {
    #[default]
    None,
    Left,
    Right,
}

/// Value of a user meta-data entry (`{name: value}` in the DSL).
#[derive(Debug, Clone, PartialEq)]
pub enum ConstVal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

pub type UserMeta = IndexMap<String, ConstVal>;

/// Assignment operator in named matches: `name = X` or `name ?= X`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Plain,
    Bool,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub name: String,
    pub op: AssignOp,
    /// Index of the assigned symbol in the production RHS.
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct Terminal {
    pub idx: TermIndex,
    /// Fully qualified name.
    pub name: String,
    pub location: Option<Location>,
    pub recognizer: Recognizer,
    /// Priority used for lexical disambiguation and conflict resolution.
    pub prior: u32,
    /// Scanning optimization: if this terminal matches no other recognizers
    /// are checked. Implicit rules apply when not given in the grammar.
    pub finish: Option<bool>,
    /// Prefer this terminal when lexical disambiguation leaves several.
    pub prefer: bool,
    /// Set for string terminals converted to word-bounded regexes by the
    /// KEYWORD rule.
    pub keyword: bool,
    /// Conflicts involving this terminal are resolved by the dynamic
    /// disambiguation filter.
    pub dynamic: bool,
    pub action_name: Option<String>,
    pub user_meta: UserMeta,
}

#[derive(Debug, Clone)]
pub struct NonTerminal {
    pub idx: NonTermIndex,
    /// Fully qualified name.
    pub name: String,
    pub location: Option<Location>,
    /// Productions of this non-terminal, in grammar order.
    pub productions: Vec<ProdIndex>,
    pub action_name: Option<String>,
    pub user_meta: UserMeta,
}

#[derive(Debug, Clone)]
pub struct Production {
    pub idx: ProdIndex,
    pub nonterminal: NonTermIndex,
    /// RHS symbol references. EMPTY references are elided, so an empty
    /// production has an empty RHS.
    pub rhs: Vec<SymbolIndex>,
    pub assoc: Associativity,
    pub prior: u32,
    pub dynamic: bool,
    /// Disable the prefer-shifts strategy for this production.
    pub nops: bool,
    /// Disable prefer-shifts-over-empty for this production.
    pub nopse: bool,
    pub assignments: Vec<Assignment>,
    pub user_meta: UserMeta,
    /// Zero-based ordinal of this production among the alternatives of its
    /// non-terminal.
    pub ntidx: usize,
}

// ---------------------------------------------------------------------------
// Raw (pre-finalization) grammar description produced by the DSL parser and
// the structural builder.
// ---------------------------------------------------------------------------

/// Multiplicity of an RHS reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mult {
    #[default]
    One,
    Optional,
    ZeroOrMore,
    OneOrMore,
}

#[derive(Debug, Clone)]
pub enum RefTarget {
    /// Reference to a rule or terminal by name.
    Name(String),
    /// Inline string terminal (quoted literal in a production body).
    StrTerm(String),
    /// Inline group `( ... )`; becomes an anonymous `{rule}_g{n}` rule.
    Group(Vec<RawProduction>),
}

#[derive(Debug, Clone)]
pub struct RawRef {
    pub target: RefTarget,
    pub mult: Mult,
    /// Greedy repetition (`*!`, `+!`, `?!`).
    pub greedy: bool,
    pub separator: Option<String>,
    pub location: Option<Location>,
}

impl RawRef {
    pub fn name(name: impl Into<String>) -> Self {
        RawRef {
            target: RefTarget::Name(name.into()),
            mult: Mult::One,
            greedy: false,
            separator: None,
            location: None,
        }
    }

    pub fn str_term(value: impl Into<String>) -> Self {
        RawRef {
            target: RefTarget::StrTerm(value.into()),
            mult: Mult::One,
            greedy: false,
            separator: None,
            location: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawRhsElem {
    pub reference: RawRef,
    pub assign: Option<(String, AssignOp)>,
}

#[derive(Debug, Clone, Default)]
pub struct ProdMeta {
    pub assoc: Option<Associativity>,
    pub prior: Option<u32>,
    pub dynamic: bool,
    pub nops: bool,
    pub nopse: bool,
    pub user_meta: UserMeta,
}

#[derive(Debug, Clone)]
pub struct RawProduction {
    pub rhs: Vec<RawRhsElem>,
    pub meta: ProdMeta,
    pub location: Option<Location>,
}

#[derive(Debug, Clone)]
pub struct RawRule {
    pub name: String,
    pub action_name: Option<String>,
    /// Rule-level meta applied to all productions unless overridden.
    pub meta: ProdMeta,
    pub productions: Vec<RawProduction>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone)]
pub enum RecognizerDef {
    StrConst(String),
    Regex(String),
    Custom(CustomRecognizer),
    /// Empty terminal body; the recognizer must be supplied externally.
    Missing,
}

#[derive(Debug, Clone)]
pub struct RawTerminal {
    pub name: String,
    pub recognizer: RecognizerDef,
    pub action_name: Option<String>,
    pub prior: Option<u32>,
    pub prefer: bool,
    pub finish: Option<bool>,
    pub dynamic: bool,
    pub user_meta: UserMeta,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Default)]
pub struct GrammarParts {
    pub rules: Vec<RawRule>,
    pub terminals: Vec<RawTerminal>,
    pub start: Option<String>,
}

/// Options applied during grammar finalization.
#[derive(Default)]
pub struct GrammarOptions {
    /// Case-insensitive string and regex recognizers.
    pub ignore_case: bool,
    /// Recognizers for terminals declared without a body in the grammar.
    pub recognizers: IndexMap<String, CustomRecognizer>,
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Grammar {
    pub terminals: TermVec<Terminal>,
    pub nonterminals: NonTermVec<NonTerminal>,
    pub productions: ProdVec<Production>,
    symbols_by_name: IndexMap<String, SymbolIndex>,
    /// Symbol index of the start non-terminal.
    pub start_symbol: SymbolIndex,
    /// Augmented production for the LAYOUT rule, if the grammar has one.
    pub layout_production: Option<ProdIndex>,
    pub ignore_case: bool,
}

impl Grammar {
    pub fn from_string(source: &str) -> Result<Grammar> {
        dsl::parse_grammar(source, GrammarOptions::default())
    }

    pub fn from_string_with(source: &str, options: GrammarOptions) -> Result<Grammar> {
        dsl::parse_grammar(source, options)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Grammar> {
        let source = std::fs::read_to_string(path)?;
        Grammar::from_string(&source)
    }

    pub fn term_len(&self) -> usize {
        self.terminals.len()
    }

    pub fn nonterm_len(&self) -> usize {
        self.nonterminals.len()
    }

    pub fn is_term(&self, symbol: SymbolIndex) -> bool {
        symbol.0 < self.term_len()
    }

    pub fn is_nonterm(&self, symbol: SymbolIndex) -> bool {
        !self.is_term(symbol)
    }

    pub fn symbol_to_term(&self, symbol: SymbolIndex) -> TermIndex {
        debug_assert!(self.is_term(symbol));
        TermIndex(symbol.0)
    }

    pub fn symbol_to_nonterm(&self, symbol: SymbolIndex) -> NonTermIndex {
        debug_assert!(self.is_nonterm(symbol));
        NonTermIndex(symbol.0 - self.term_len())
    }

    pub fn nonterm_to_symbol(&self, nonterm: NonTermIndex) -> SymbolIndex {
        nonterm.to_symbol_index(self.term_len())
    }

    pub fn empty_symbol(&self) -> SymbolIndex {
        EMPTY.to_symbol_index()
    }

    pub fn stop_symbol(&self) -> SymbolIndex {
        STOP.to_symbol_index()
    }

    pub fn symbol_name(&self, symbol: SymbolIndex) -> &str {
        if self.is_term(symbol) {
            &self.terminals[self.symbol_to_term(symbol)].name
        } else {
            &self.nonterminals[self.symbol_to_nonterm(symbol)].name
        }
    }

    pub fn symbol_index(&self, name: &str) -> Option<SymbolIndex> {
        self.symbols_by_name.get(name).copied()
    }

    /// Symbol indices for the given names. Unknown names are skipped;
    /// intended for tests and diagnostics.
    pub fn symbol_indexes(&self, names: &[&str]) -> Vec<SymbolIndex> {
        names.iter().filter_map(|n| self.symbol_index(n)).collect()
    }

    pub fn symbol_names<'a>(
        &'a self,
        symbols: impl IntoIterator<Item = &'a SymbolIndex>,
    ) -> Vec<&'a str> {
        symbols.into_iter().map(|&s| self.symbol_name(s)).collect()
    }

    pub fn term_by_name(&self, name: &str) -> Option<&Terminal> {
        let symbol = self.symbol_index(name)?;
        if self.is_term(symbol) {
            Some(&self.terminals[self.symbol_to_term(symbol)])
        } else {
            None
        }
    }

    pub fn nonterm_by_name(&self, name: &str) -> Option<&NonTerminal> {
        let symbol = self.symbol_index(name)?;
        if self.is_nonterm(symbol) {
            Some(&self.nonterminals[self.symbol_to_nonterm(symbol)])
        } else {
            None
        }
    }

    /// The LHS symbol index of the given production.
    pub fn lhs_symbol(&self, prod: ProdIndex) -> SymbolIndex {
        self.nonterm_to_symbol(self.productions[prod].nonterminal)
    }

    /// Human-readable form of a production, e.g. `E: E "+" E`.
    pub fn production_str(&self, prod: ProdIndex) -> String {
        let production = &self.productions[prod];
        let lhs = &self.nonterminals[production.nonterminal].name;
        let rhs: Vec<&str> =
            production.rhs.iter().map(|&s| self.symbol_name(s)).collect();
        if rhs.is_empty() {
            format!("{lhs}: EMPTY")
        } else {
            format!("{lhs}: {}", rhs.join(" "))
        }
    }

    // -----------------------------------------------------------------------
    // Finalization
    // -----------------------------------------------------------------------

    /// Builds a finalized grammar from a raw description: registers symbols,
    /// resolves references, desugars BNF extensions, enumerates productions,
    /// applies the KEYWORD fix-up and binds recognizers.
    pub fn from_parts(parts: GrammarParts, options: GrammarOptions) -> Result<Grammar> {
        Finalizer::new(options).run(parts)
    }
}

/// Two-part symbol reference used while the terminal count can still grow
/// (inline terminals are discovered during resolution). Flattened to
/// [`SymbolIndex`] once finalization completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sym {
    T(TermIndex),
    N(NonTermIndex),
}

struct Finalizer {
    options: GrammarOptions,
    terminals: TermVec<Terminal>,
    nonterminals: NonTermVec<NonTerminal>,
    productions: Vec<PendingProduction>,
    symbols_by_name: IndexMap<String, Sym>,
    str_terminals: IndexMap<String, TermIndex>,
    group_counters: IndexMap<String, usize>,
}

/// A production with resolved RHS, not yet enumerated.
struct PendingProduction {
    nonterminal: NonTermIndex,
    rhs: Vec<Sym>,
    assoc: Associativity,
    prior: u32,
    dynamic: bool,
    nops: bool,
    nopse: bool,
    assignments: Vec<Assignment>,
    user_meta: UserMeta,
}

impl PendingProduction {
    fn plain(nonterminal: NonTermIndex, rhs: Vec<Sym>) -> Self {
        PendingProduction {
            nonterminal,
            rhs,
            assoc: Associativity::None,
            prior: DEFAULT_PRIORITY,
            dynamic: false,
            nops: false,
            nopse: false,
            assignments: vec![],
            user_meta: UserMeta::new(),
        }
    }
}

impl Finalizer {
    fn new(options: GrammarOptions) -> Self {
        Finalizer {
            options,
            terminals: TermVec::new(),
            nonterminals: NonTermVec::new(),
            productions: vec![],
            symbols_by_name: IndexMap::new(),
            str_terminals: IndexMap::new(),
            group_counters: IndexMap::new(),
        }
    }

    fn run(mut self, parts: GrammarParts) -> Result<Grammar> {
        self.add_special_terminals();
        self.add_terminals(&parts.terminals)?;
        let rules = merge_rules(parts.rules)?;
        self.register_nonterminals(&rules)?;

        let start_symbol = self.resolve_start(&parts.start, &rules)?;

        // Production 0 is the augmented production S' -> S STOP.
        self.productions.push(PendingProduction::plain(
            AUG,
            vec![Sym::N(start_symbol), Sym::T(STOP)],
        ));

        for rule in &rules {
            let nonterm = self.nonterm_index(&rule.name);
            for raw in &rule.productions {
                let pending =
                    self.convert_production(nonterm, &rule.name, raw, &rule.meta)?;
                self.productions.push(pending);
            }
        }

        // Augmented production for the layout sub-parser, sharing the S' LHS.
        let layout_production = match self.symbols_by_name.get("LAYOUT").copied() {
            Some(Sym::N(layout)) => {
                self.productions.push(PendingProduction::plain(
                    AUG,
                    vec![Sym::N(layout), Sym::T(STOP)],
                ));
                Some(ProdIndex(self.productions.len() - 1))
            }
            _ => None,
        };

        self.fix_keyword_terminals()?;
        self.apply_obj_actions();

        // The terminal count is now fixed; flatten the symbol space.
        let term_len = self.terminals.len();
        let flat = |sym: Sym| match sym {
            Sym::T(t) => t.to_symbol_index(),
            Sym::N(n) => n.to_symbol_index(term_len),
        };
        let symbols_by_name = self
            .symbols_by_name
            .iter()
            .map(|(name, &sym)| (name.clone(), flat(sym)))
            .collect();

        let mut grammar = Grammar {
            terminals: self.terminals,
            nonterminals: self.nonterminals,
            productions: ProdVec::new(),
            symbols_by_name,
            start_symbol: start_symbol.to_symbol_index(term_len),
            layout_production,
            ignore_case: self.options.ignore_case,
        };

        // Enumerate productions: prod_id is the position, ntidx counts
        // alternatives per non-terminal.
        let mut per_symbol: NonTermVec<usize> =
            grammar.nonterminals.iter().map(|_| 0usize).collect();
        for (idx, pending) in self.productions.into_iter().enumerate() {
            let idx = ProdIndex(idx);
            let ntidx = per_symbol[pending.nonterminal];
            per_symbol[pending.nonterminal] += 1;
            grammar.nonterminals[pending.nonterminal].productions.push(idx);
            grammar.productions.push(Production {
                idx,
                nonterminal: pending.nonterminal,
                rhs: pending.rhs.into_iter().map(flat).collect(),
                assoc: pending.assoc,
                prior: pending.prior,
                dynamic: pending.dynamic,
                nops: pending.nops,
                nopse: pending.nopse,
                assignments: pending.assignments,
                user_meta: pending.user_meta,
                ntidx,
            });
        }

        Ok(grammar)
    }

    fn add_special_terminals(&mut self) {
        for (name, recognizer) in
            [("EMPTY", Recognizer::Empty), ("STOP", Recognizer::Stop)]
        {
            let idx = TermIndex(self.terminals.len());
            self.symbols_by_name.insert(name.into(), Sym::T(idx));
            self.terminals.push(Terminal {
                idx,
                name: name.into(),
                location: None,
                recognizer,
                prior: DEFAULT_PRIORITY,
                finish: None,
                prefer: false,
                keyword: false,
                dynamic: false,
                action_name: None,
                user_meta: UserMeta::new(),
            });
        }
    }

    fn add_terminals(&mut self, terminals: &[RawTerminal]) -> Result<()> {
        for raw in terminals {
            if RESERVED_SYMBOL_NAMES.contains(&raw.name.as_str()) {
                return Err(Error::grammar(format!(
                    "rule name \"{}\" is reserved",
                    raw.name
                )));
            }
            if self.symbols_by_name.contains_key(&raw.name) {
                return Err(Error::grammar(format!(
                    "multiple definitions of terminal rule \"{}\"",
                    raw.name
                )));
            }
            let recognizer = self.compile_recognizer(raw)?;
            if let Some((value, _)) = recognizer.as_str_const() {
                if let Some(&other) = self.str_terminals.get(value) {
                    return Err(Error::grammar(format!(
                        "terminals \"{}\" and \"{}\" match the same string",
                        raw.name, self.terminals[other].name
                    )));
                }
                self.str_terminals.insert(value.to_owned(), TermIndex(self.terminals.len()));
            }
            let idx = TermIndex(self.terminals.len());
            self.symbols_by_name.insert(raw.name.clone(), Sym::T(idx));
            self.terminals.push(Terminal {
                idx,
                name: raw.name.clone(),
                location: raw.location,
                recognizer,
                prior: raw.prior.unwrap_or(DEFAULT_PRIORITY),
                finish: raw.finish,
                prefer: raw.prefer,
                keyword: false,
                dynamic: raw.dynamic,
                action_name: raw.action_name.clone(),
                user_meta: raw.user_meta.clone(),
            });
        }
        Ok(())
    }

    fn compile_recognizer(&self, raw: &RawTerminal) -> Result<Recognizer> {
        match &raw.recognizer {
            RecognizerDef::StrConst(value) => {
                Ok(Recognizer::str_const(value.clone(), self.options.ignore_case))
            }
            RecognizerDef::Regex(pattern) => {
                Recognizer::regex(pattern, self.options.ignore_case)
            }
            RecognizerDef::Custom(f) => Ok(Recognizer::Custom(*f)),
            RecognizerDef::Missing => {
                match self.options.recognizers.get(&raw.name) {
                    Some(f) => Ok(Recognizer::Custom(*f)),
                    None => Err(Error::grammar(format!(
                        "terminal \"{}\" has no recognizer defined and no \
                         recognizer is given during grammar construction",
                        raw.name
                    ))),
                }
            }
        }
    }

    fn register_nonterminals(&mut self, rules: &[RawRule]) -> Result<()> {
        self.add_nonterminal("S'".into(), None);
        for rule in rules {
            if RESERVED_SYMBOL_NAMES.contains(&rule.name.as_str()) {
                return Err(Error::grammar(format!(
                    "rule name \"{}\" is reserved",
                    rule.name
                )));
            }
            if let Some(&symbol) = self.symbols_by_name.get(&rule.name) {
                if matches!(symbol, Sym::T(_)) {
                    return Err(Error::grammar(format!(
                        "rule \"{}\" already defined as terminal",
                        rule.name
                    )));
                }
                // Merged earlier; nothing to register.
                continue;
            }
            let idx = self.add_nonterminal(rule.name.clone(), rule.location);
            self.nonterminals[idx].action_name = rule.action_name.clone();
            self.nonterminals[idx].user_meta = rule.meta.user_meta.clone();
        }
        Ok(())
    }

    fn add_nonterminal(&mut self, name: String, location: Option<Location>) -> NonTermIndex {
        let idx = NonTermIndex(self.nonterminals.len());
        self.symbols_by_name.insert(name.clone(), Sym::N(idx));
        self.nonterminals.push(NonTerminal {
            idx,
            name,
            location,
            productions: vec![],
            action_name: None,
            user_meta: UserMeta::new(),
        });
        idx
    }

    fn nonterm_index(&self, name: &str) -> NonTermIndex {
        NonTermIndex(
            self.nonterminals
                .iter()
                .position(|n| n.name == name)
                .expect("non-terminal registered"),
        )
    }

    fn resolve_start(
        &self,
        start: &Option<String>,
        rules: &[RawRule],
    ) -> Result<NonTermIndex> {
        let name = match start {
            Some(name) => name.clone(),
            None => match rules.first() {
                Some(rule) => rule.name.clone(),
                None => {
                    return Err(Error::grammar("grammar has no production rules"))
                }
            },
        };
        let nonterm = self
            .nonterminals
            .iter()
            .position(|n| n.name == name)
            .ok_or_else(|| {
                Error::grammar(format!("unknown start symbol \"{name}\""))
            })?;
        Ok(NonTermIndex(nonterm))
    }

    fn convert_production(
        &mut self,
        nonterminal: NonTermIndex,
        rule_name: &str,
        raw: &RawProduction,
        rule_meta: &ProdMeta,
    ) -> Result<PendingProduction> {
        let mut rhs = vec![];
        let mut assignments = vec![];
        for elem in &raw.rhs {
            // Explicit EMPTY references are elided: an empty production has
            // an empty RHS.
            if matches!(&elem.reference.target,
                        RefTarget::Name(name) if name == "EMPTY")
            {
                continue;
            }
            let symbol = self.resolve_ref(rule_name, &elem.reference, rule_meta)?;
            if let Some((name, op)) = &elem.assign {
                assignments.push(Assignment {
                    name: name.clone(),
                    op: *op,
                    index: rhs.len(),
                });
            }
            rhs.push(symbol);
        }
        let mut user_meta = rule_meta.user_meta.clone();
        user_meta.extend(
            raw.meta.user_meta.iter().map(|(k, v)| (k.clone(), v.clone())),
        );
        Ok(PendingProduction {
            nonterminal,
            rhs,
            assoc: raw.meta.assoc.or(rule_meta.assoc).unwrap_or_default(),
            prior: raw
                .meta
                .prior
                .or(rule_meta.prior)
                .unwrap_or(DEFAULT_PRIORITY),
            dynamic: raw.meta.dynamic || rule_meta.dynamic,
            nops: raw.meta.nops || rule_meta.nops,
            nopse: raw.meta.nopse || rule_meta.nopse,
            assignments,
            user_meta,
        })
    }

    /// Resolves an RHS reference into a canonical symbol, synthesizing
    /// auxiliary rules for groups and multiplicities on first use.
    fn resolve_ref(
        &mut self,
        rule_name: &str,
        reference: &RawRef,
        rule_meta: &ProdMeta,
    ) -> Result<Sym> {
        let base = match &reference.target {
            RefTarget::Name(name) => {
                self.lookup(name).ok_or_else(|| Error::Grammar {
                    message: format!("unknown symbol \"{name}\""),
                    location: reference.location,
                })?
            }
            RefTarget::StrTerm(value) => self.inline_str_terminal(value),
            RefTarget::Group(productions) => {
                self.make_group_symbol(rule_name, productions, rule_meta)?
            }
        };

        if reference.mult == Mult::One {
            return Ok(base);
        }
        self.make_multiplicity_symbol(base, reference)
    }

    fn lookup(&self, name: &str) -> Option<Sym> {
        self.symbols_by_name.get(name).copied()
    }

    fn inline_str_terminal(&mut self, value: &str) -> Sym {
        if let Some(&idx) = self.str_terminals.get(value) {
            return Sym::T(idx);
        }
        let name = escape(value);
        if let Some(&symbol) = self.symbols_by_name.get(&name) {
            if matches!(symbol, Sym::T(_)) {
                return symbol;
            }
        }
        let idx = TermIndex(self.terminals.len());
        self.symbols_by_name.insert(name.clone(), Sym::T(idx));
        self.str_terminals.insert(value.to_owned(), idx);
        self.terminals.push(Terminal {
            idx,
            name,
            location: None,
            recognizer: Recognizer::str_const(value, self.options.ignore_case),
            prior: DEFAULT_PRIORITY,
            finish: None,
            prefer: false,
            keyword: false,
            dynamic: false,
            action_name: None,
            user_meta: UserMeta::new(),
        });
        Sym::T(idx)
    }

    fn make_group_symbol(
        &mut self,
        rule_name: &str,
        productions: &[RawProduction],
        rule_meta: &ProdMeta,
    ) -> Result<Sym> {
        let counter = self.group_counters.entry(rule_name.to_owned()).or_insert(0);
        *counter += 1;
        let name = format!("{rule_name}_g{counter}");
        let nonterm = self.add_nonterminal(name.clone(), None);
        for raw in productions {
            let pending = self.convert_production(nonterm, &name, raw, rule_meta)?;
            self.productions.push(pending);
        }
        Ok(Sym::N(nonterm))
    }

    /// Synthesizes the auxiliary rules for `X*`, `X+`, `X?` with optional
    /// separator and greedy variants:
    ///
    /// ```text
    /// X+      X_1: X_1 X | X;                      (collect)
    /// X+[S]   X_1_S: X_1_S S X | X;                (collect_sep)
    /// X*      X_0: X_1 | EMPTY;                    (optional_list)
    /// X*[S]   X_0_S: X_1_S | EMPTY;                (optional_list)
    /// X?      X_opt: X | EMPTY;                    (optional)
    /// ```
    fn make_multiplicity_symbol(
        &mut self,
        base: Sym,
        reference: &RawRef,
    ) -> Result<Sym> {
        let base_name = self.symbol_name_of(base);
        let separator = match &reference.separator {
            Some(name) => {
                if reference.mult == Mult::Optional {
                    return Err(Error::Grammar {
                        message: format!(
                            "repetition modifier not allowed for optional (?) \
                             for symbol \"{base_name}\""
                        ),
                        location: reference.location,
                    });
                }
                Some((
                    name.clone(),
                    self.lookup(name).ok_or_else(|| Error::Grammar {
                        message: format!("unknown symbol \"{name}\""),
                        location: reference.location,
                    })?,
                ))
            }
            None => None,
        };
        let assoc = if reference.greedy {
            Associativity::Right
        } else {
            Associativity::None
        };

        if reference.mult == Mult::Optional {
            let name = format!("{base_name}_opt");
            if let Some(existing) = self.lookup(&name) {
                return Ok(existing);
            }
            let nonterm = self.add_nonterminal(name.clone(), None);
            self.nonterminals[nonterm].action_name = Some("optional".into());
            let mut one = PendingProduction::plain(nonterm, vec![base]);
            one.assoc = assoc;
            let mut empty = PendingProduction::plain(nonterm, vec![]);
            empty.assoc = assoc;
            self.productions.push(one);
            self.productions.push(empty);
            return Ok(Sym::N(nonterm));
        }

        // One-or-more base used by both + and *.
        let sep_suffix = separator
            .as_ref()
            .map(|(name, _)| format!("_{name}"))
            .unwrap_or_default();
        let one_name = format!("{base_name}_1{sep_suffix}");
        let one_symbol = match self.lookup(&one_name) {
            Some(symbol) => symbol,
            None => {
                let nonterm = self.add_nonterminal(one_name.clone(), None);
                let one_symbol = Sym::N(nonterm);
                match &separator {
                    Some((_, sep_symbol)) => {
                        self.nonterminals[nonterm].action_name =
                            Some("collect_sep".into());
                        self.productions.push(PendingProduction::plain(
                            nonterm,
                            vec![one_symbol, *sep_symbol, base],
                        ));
                    }
                    None => {
                        self.nonterminals[nonterm].action_name =
                            Some("collect".into());
                        self.productions.push(PendingProduction::plain(
                            nonterm,
                            vec![one_symbol, base],
                        ));
                    }
                }
                self.productions
                    .push(PendingProduction::plain(nonterm, vec![base]));
                one_symbol
            }
        };

        match reference.mult {
            Mult::OneOrMore => {
                if !reference.greedy {
                    return Ok(one_symbol);
                }
                // Greedy wrapper forcing shift-preference by associativity.
                let name = format!("{one_name}_g");
                if let Some(existing) = self.lookup(&name) {
                    return Ok(existing);
                }
                let nonterm = self.add_nonterminal(name.clone(), None);
                self.nonterminals[nonterm].action_name = Some("pass_single".into());
                let mut prod = PendingProduction::plain(nonterm, vec![one_symbol]);
                prod.assoc = Associativity::Right;
                self.productions.push(prod);
                Ok(Sym::N(nonterm))
            }
            Mult::ZeroOrMore => {
                let name = format!("{base_name}_0{sep_suffix}");
                if let Some(existing) = self.lookup(&name) {
                    return Ok(existing);
                }
                let nonterm = self.add_nonterminal(name.clone(), None);
                self.nonterminals[nonterm].action_name =
                    Some("optional_list".into());
                let mut one = PendingProduction::plain(nonterm, vec![one_symbol]);
                one.assoc = assoc;
                one.nops = true;
                let mut empty = PendingProduction::plain(nonterm, vec![]);
                empty.assoc = assoc;
                self.productions.push(one);
                self.productions.push(empty);
                Ok(Sym::N(nonterm))
            }
            _ => unreachable!("handled above"),
        }
    }

    fn symbol_name_of(&self, symbol: Sym) -> String {
        match symbol {
            Sym::T(t) => self.terminals[t].name.clone(),
            Sym::N(n) => self.nonterminals[n].name.clone(),
        }
    }

    /// If a KEYWORD terminal exists, converts every string terminal fully
    /// matched by the KEYWORD regex into a word-bounded regex terminal so
    /// that e.g. `for` does not match inside `forward`.
    fn fix_keyword_terminals(&mut self) -> Result<()> {
        let keyword = match self.symbols_by_name.get("KEYWORD") {
            Some(&Sym::T(idx)) => idx,
            _ => return Ok(()),
        };
        let keyword_rec = self.terminals[keyword].recognizer.clone();
        if !matches!(keyword_rec, Recognizer::Regex { .. }) {
            return Err(Error::grammar(
                "KEYWORD rule must have a regex recognizer defined",
            ));
        }
        for terminal in self.terminals.iter_mut() {
            let Some((value, ignore_case)) = terminal.recognizer.as_str_const()
            else {
                continue;
            };
            if keyword_rec.recognize(value, 0) == Some(value.len()) {
                let pattern = format!(r"\b{}\b", regex::escape(value));
                terminal.recognizer = Recognizer::regex(&pattern, ignore_case)?;
                terminal.keyword = true;
            }
        }
        Ok(())
    }

    /// Rules using named matches default to object construction.
    fn apply_obj_actions(&mut self) {
        let mut with_assignments = vec![false; self.nonterminals.len()];
        for production in &self.productions {
            if !production.assignments.is_empty() {
                with_assignments[production.nonterminal.0] = true;
            }
        }
        for (idx, nonterminal) in self.nonterminals.iter_mut().enumerate() {
            if with_assignments[idx] && nonterminal.action_name.is_none() {
                nonterminal.action_name = Some("obj".into());
            }
        }
    }
}

/// Merges multiple rule definitions with the same name into one, appending
/// productions. Conflicting grammar actions are an error.
fn merge_rules(rules: Vec<RawRule>) -> Result<Vec<RawRule>> {
    let mut merged: Vec<RawRule> = vec![];
    for rule in rules {
        match merged.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => {
                if let Some(action) = &rule.action_name {
                    if existing
                        .action_name
                        .as_ref()
                        .is_some_and(|a| a != action)
                    {
                        return Err(Error::grammar(format!(
                            "multiple different grammar actions for rule \"{}\"",
                            rule.name
                        )));
                    }
                    existing.action_name = Some(action.clone());
                }
                existing.productions.extend(rule.productions);
            }
            None => merged.push(rule),
        }
    }
    Ok(merged)
}

fn escape(value: &str) -> String {
    value.replace('\n', "\\n").replace('\t', "\\t")
}

#[cfg(test)]
mod tests {
    use super::builder::{re, st, GrammarBuilder};
    use super::*;

    fn list_grammar() -> Grammar {
        let mut b = GrammarBuilder::new();
        b.rule("S").production([re("a").some().sep("comma")]);
        b.terminal_str("a", "a");
        b.terminal_str("comma", ",");
        b.build().unwrap()
    }

    #[test]
    fn augmented_production_is_first() {
        let grammar = list_grammar();
        let aug = &grammar.productions[ProdIndex(0)];
        assert_eq!(aug.nonterminal, AUG);
        assert_eq!(aug.rhs[1], grammar.stop_symbol());
    }

    #[test]
    fn one_or_more_with_separator_desugars() {
        let grammar = list_grammar();
        let aux = grammar.nonterm_by_name("a_1_comma").unwrap();
        assert_eq!(aux.productions.len(), 2);
        assert_eq!(aux.action_name.as_deref(), Some("collect_sep"));
        let first = &grammar.productions[aux.productions[0]];
        assert_eq!(first.rhs.len(), 3);
        assert_eq!(grammar.production_str(first.idx), "a_1_comma: a_1_comma , a");
    }

    #[test]
    fn zero_or_more_desugars_to_two_rules() {
        let mut b = GrammarBuilder::new();
        b.rule("S").production([re("x").many()]);
        b.terminal_str("x", "x");
        let grammar = b.build().unwrap();

        let zero = grammar.nonterm_by_name("x_0").unwrap();
        assert_eq!(zero.action_name.as_deref(), Some("optional_list"));
        assert_eq!(zero.productions.len(), 2);
        // The empty alternative has an empty RHS.
        let empty = &grammar.productions[zero.productions[1]];
        assert!(empty.rhs.is_empty());
        assert!(grammar.nonterm_by_name("x_1").is_some());
    }

    #[test]
    fn optional_desugars() {
        let mut b = GrammarBuilder::new();
        b.rule("S").production([st("b"), re("x").opt()]);
        b.terminal_str("x", "x");
        let grammar = b.build().unwrap();
        let opt = grammar.nonterm_by_name("x_opt").unwrap();
        assert_eq!(opt.action_name.as_deref(), Some("optional"));
        assert_eq!(opt.productions.len(), 2);
    }

    #[test]
    fn optional_with_separator_is_rejected() {
        let mut b = GrammarBuilder::new();
        b.rule("S").production([re("x").opt().sep("comma")]);
        b.terminal_str("x", "x");
        b.terminal_str("comma", ",");
        let err = b.build().unwrap_err();
        assert!(err.to_string().contains("not allowed for optional"));
    }

    #[test]
    fn greedy_repetition_is_right_associative() {
        let mut b = GrammarBuilder::new();
        b.rule("S").production([re("x").many().greedy()]);
        b.terminal_str("x", "x");
        let grammar = b.build().unwrap();
        let zero = grammar.nonterm_by_name("x_0").unwrap();
        for &prod in &zero.productions {
            assert_eq!(grammar.productions[prod].assoc, Associativity::Right);
        }
    }

    #[test]
    fn duplicate_terminal_is_rejected() {
        let mut b = GrammarBuilder::new();
        b.rule("S").production([re("a")]);
        b.terminal_str("a", "a");
        b.terminal_str("a", "b");
        assert!(matches!(b.build(), Err(Error::Grammar { .. })));
    }

    #[test]
    fn same_string_terminals_rejected() {
        let mut b = GrammarBuilder::new();
        b.rule("S").production([re("a"), re("b")]);
        b.terminal_str("a", "x");
        b.terminal_str("b", "x");
        let err = b.build().unwrap_err();
        assert!(err.to_string().contains("match the same string"));
    }

    #[test]
    fn reserved_names_rejected() {
        let mut b = GrammarBuilder::new();
        b.rule("EMPTY").production([st("x")]);
        assert!(matches!(b.build(), Err(Error::Grammar { .. })));
    }

    #[test]
    fn unknown_reference_rejected() {
        let mut b = GrammarBuilder::new();
        b.rule("S").production([re("Missing")]);
        let err = b.build().unwrap_err();
        assert!(err.to_string().contains("unknown symbol"));
    }

    #[test]
    fn group_becomes_anonymous_rule() {
        let mut b = GrammarBuilder::new();
        b.rule("S").production([
            st("a"),
            re_group(vec![vec![st("b")], vec![st("c")]]),
        ]);
        let grammar = b.build().unwrap();
        let group = grammar.nonterm_by_name("S_g1").unwrap();
        assert_eq!(group.productions.len(), 2);
    }

    fn re_group(alternatives: Vec<Vec<super::builder::RefSpec>>) -> super::builder::RefSpec {
        super::builder::group(alternatives)
    }

    #[test]
    fn keyword_fixup_converts_matching_literals() {
        let mut b = GrammarBuilder::new();
        b.rule("S").production([st("for"), re("Id")]);
        b.terminal_regex("Id", r"\w+");
        b.terminal_regex("KEYWORD", r"\w+");
        let grammar = b.build().unwrap();
        let term = grammar.term_by_name("for").unwrap();
        assert!(term.keyword);
        assert!(matches!(term.recognizer, Recognizer::Regex { .. }));
        // Word-bounded: matches `for` but not the prefix of `forward`.
        assert_eq!(term.recognizer.recognize("for x", 0), Some(3));
        assert_eq!(term.recognizer.recognize("forward", 0), None);
    }

    #[test]
    fn assignments_switch_default_action_to_obj() {
        let mut b = GrammarBuilder::new();
        b.rule("S").production([re("a").assign("first"), re("a").assign_bool("second")]);
        b.terminal_str("a", "a");
        let grammar = b.build().unwrap();
        let rule = grammar.nonterm_by_name("S").unwrap();
        assert_eq!(rule.action_name.as_deref(), Some("obj"));
        let prod = &grammar.productions[rule.productions[0]];
        assert_eq!(prod.assignments.len(), 2);
        assert_eq!(prod.assignments[1].op, AssignOp::Bool);
        assert_eq!(prod.assignments[1].index, 1);
    }
}
