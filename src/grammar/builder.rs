//! Structural grammar construction.
//!
//! [`GrammarBuilder`] assembles the same raw description the DSL parser
//! produces, so grammars can be written directly in host code. The grammar
//! DSL parser itself is bootstrapped through this builder.
//!
//! ```
//! use lariat::grammar::builder::{re, st, GrammarBuilder};
//!
//! let mut b = GrammarBuilder::new();
//! b.rule("E")
//!     .production([re("E"), st("+"), re("E")]).prod_left().prod_prior(1)
//!     .production([re("E"), st("*"), re("E")]).prod_left().prod_prior(2)
//!     .production([st("("), re("E"), st(")")])
//!     .production([re("Number")]);
//! b.terminal_regex("Number", r"\d+");
//! let grammar = b.build().unwrap();
//! ```

use super::{
    AssignOp, Associativity, ConstVal, Grammar, GrammarOptions, GrammarParts, Mult,
    ProdMeta, RawProduction, RawRef, RawRhsElem, RawRule, RawTerminal, RecognizerDef,
};
use crate::{
    error::{Error, Result},
    recognizer::CustomRecognizer,
};

/// One RHS item under construction: a reference with optional multiplicity,
/// separator and assignment.
#[derive(Debug, Clone)]
pub struct RefSpec {
    reference: RawRef,
    assign: Option<(String, AssignOp)>,
}

/// Reference to a rule or terminal by name.
pub fn re(name: &str) -> RefSpec {
    RefSpec { reference: RawRef::name(name), assign: None }
}

/// Inline string terminal.
pub fn st(value: &str) -> RefSpec {
    RefSpec { reference: RawRef::str_term(value), assign: None }
}

/// Inline group `( alt | alt | ... )`.
pub fn group(alternatives: Vec<Vec<RefSpec>>) -> RefSpec {
    let productions = alternatives
        .into_iter()
        .map(|rhs| RawProduction {
            rhs: rhs.into_iter().map(RefSpec::into_elem).collect(),
            meta: ProdMeta::default(),
            location: None,
        })
        .collect();
    RefSpec {
        reference: RawRef {
            target: super::RefTarget::Group(productions),
            mult: Mult::One,
            greedy: false,
            separator: None,
            location: None,
        },
        assign: None,
    }
}

impl RefSpec {
    /// `X?`
    pub fn opt(mut self) -> Self {
        self.reference.mult = Mult::Optional;
        self
    }

    /// `X*`
    pub fn many(mut self) -> Self {
        self.reference.mult = Mult::ZeroOrMore;
        self
    }

    /// `X+`
    pub fn some(mut self) -> Self {
        self.reference.mult = Mult::OneOrMore;
        self
    }

    /// Greedy variant (`*!`, `+!`, `?!`).
    pub fn greedy(mut self) -> Self {
        self.reference.greedy = true;
        self
    }

    /// Separator for `+`/`*` repetitions (`X+[sep]`).
    pub fn sep(mut self, name: &str) -> Self {
        self.reference.separator = Some(name.to_owned());
        self
    }

    /// Named match `name = X`.
    pub fn assign(mut self, name: &str) -> Self {
        self.assign = Some((name.to_owned(), AssignOp::Plain));
        self
    }

    /// Boolean match `name ?= X`.
    pub fn assign_bool(mut self, name: &str) -> Self {
        self.assign = Some((name.to_owned(), AssignOp::Bool));
        self
    }

    fn into_elem(self) -> RawRhsElem {
        RawRhsElem { reference: self.reference, assign: self.assign }
    }
}

#[derive(Default)]
pub struct GrammarBuilder {
    rules: Vec<RawRule>,
    terminals: Vec<RawTerminal>,
    start: Option<String>,
    options: GrammarOptions,
    error: Option<String>,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignore_case(&mut self, yes: bool) -> &mut Self {
        self.options.ignore_case = yes;
        self
    }

    /// Opens a new rule. Subsequent `production` calls add alternatives to it.
    pub fn rule(&mut self, name: &str) -> &mut Self {
        self.rules.push(RawRule {
            name: name.to_owned(),
            action_name: None,
            meta: ProdMeta::default(),
            productions: vec![],
            location: None,
        });
        self
    }

    /// Sets the action name (`@action`) for the current rule.
    pub fn action(&mut self, name: &str) -> &mut Self {
        self.with_rule(|rule| rule.action_name = Some(name.to_owned()))
    }

    pub fn left(&mut self) -> &mut Self {
        self.with_rule(|rule| rule.meta.assoc = Some(Associativity::Left))
    }

    pub fn right(&mut self) -> &mut Self {
        self.with_rule(|rule| rule.meta.assoc = Some(Associativity::Right))
    }

    pub fn prior(&mut self, prior: u32) -> &mut Self {
        self.with_rule(|rule| rule.meta.prior = Some(prior))
    }

    pub fn dynamic(&mut self) -> &mut Self {
        self.with_rule(|rule| rule.meta.dynamic = true)
    }

    pub fn nops(&mut self) -> &mut Self {
        self.with_rule(|rule| rule.meta.nops = true)
    }

    pub fn nopse(&mut self) -> &mut Self {
        self.with_rule(|rule| rule.meta.nopse = true)
    }

    pub fn meta(&mut self, name: &str, value: ConstVal) -> &mut Self {
        self.with_rule(|rule| {
            rule.meta.user_meta.insert(name.to_owned(), value);
        })
    }

    /// Adds a production (an alternative) to the current rule.
    pub fn production<I>(&mut self, rhs: I) -> &mut Self
    where
        I: IntoIterator<Item = RefSpec>,
    {
        let rhs = rhs.into_iter().map(RefSpec::into_elem).collect();
        self.with_rule(|rule| {
            rule.productions.push(RawProduction {
                rhs,
                meta: ProdMeta::default(),
                location: None,
            })
        })
    }

    /// An empty production (`EMPTY` alternative).
    pub fn empty_production(&mut self) -> &mut Self {
        self.production([])
    }

    pub fn prod_left(&mut self) -> &mut Self {
        self.with_prod(|meta| meta.assoc = Some(Associativity::Left))
    }

    pub fn prod_right(&mut self) -> &mut Self {
        self.with_prod(|meta| meta.assoc = Some(Associativity::Right))
    }

    pub fn prod_prior(&mut self, prior: u32) -> &mut Self {
        self.with_prod(|meta| meta.prior = Some(prior))
    }

    pub fn prod_dynamic(&mut self) -> &mut Self {
        self.with_prod(|meta| meta.dynamic = true)
    }

    pub fn prod_nops(&mut self) -> &mut Self {
        self.with_prod(|meta| meta.nops = true)
    }

    pub fn prod_nopse(&mut self) -> &mut Self {
        self.with_prod(|meta| meta.nopse = true)
    }

    pub fn prod_meta(&mut self, name: &str, value: ConstVal) -> &mut Self {
        self.with_prod(|meta| {
            meta.user_meta.insert(name.to_owned(), value);
        })
    }

    pub fn terminal_str(&mut self, name: &str, value: &str) -> &mut Self {
        self.add_terminal(name, RecognizerDef::StrConst(value.to_owned()))
    }

    pub fn terminal_regex(&mut self, name: &str, pattern: &str) -> &mut Self {
        self.add_terminal(name, RecognizerDef::Regex(pattern.to_owned()))
    }

    pub fn terminal_fn(&mut self, name: &str, f: CustomRecognizer) -> &mut Self {
        self.add_terminal(name, RecognizerDef::Custom(f))
    }

    /// A terminal without a body; its recognizer must be supplied with
    /// [`GrammarBuilder::recognizer`].
    pub fn terminal_empty(&mut self, name: &str) -> &mut Self {
        self.add_terminal(name, RecognizerDef::Missing)
    }

    pub fn term_prior(&mut self, prior: u32) -> &mut Self {
        self.with_term(|term| term.prior = Some(prior))
    }

    pub fn term_prefer(&mut self) -> &mut Self {
        self.with_term(|term| term.prefer = true)
    }

    pub fn term_finish(&mut self, finish: bool) -> &mut Self {
        self.with_term(|term| term.finish = Some(finish))
    }

    pub fn term_dynamic(&mut self) -> &mut Self {
        self.with_term(|term| term.dynamic = true)
    }

    pub fn term_action(&mut self, name: &str) -> &mut Self {
        self.with_term(|term| term.action_name = Some(name.to_owned()))
    }

    pub fn term_meta(&mut self, name: &str, value: ConstVal) -> &mut Self {
        self.with_term(|term| {
            term.user_meta.insert(name.to_owned(), value);
        })
    }

    /// Supplies a recognizer for a terminal declared without a body.
    pub fn recognizer(&mut self, name: &str, f: CustomRecognizer) -> &mut Self {
        self.options.recognizers.insert(name.to_owned(), f);
        self
    }

    /// Sets the start symbol. Defaults to the first rule.
    pub fn start(&mut self, name: &str) -> &mut Self {
        self.start = Some(name.to_owned());
        self
    }

    pub fn build(self) -> Result<Grammar> {
        if let Some(message) = self.error {
            return Err(Error::grammar(message));
        }
        Grammar::from_parts(
            GrammarParts {
                rules: self.rules,
                terminals: self.terminals,
                start: self.start,
            },
            self.options,
        )
    }

    fn add_terminal(&mut self, name: &str, recognizer: RecognizerDef) -> &mut Self {
        self.terminals.push(RawTerminal {
            name: name.to_owned(),
            recognizer,
            action_name: None,
            prior: None,
            prefer: false,
            finish: None,
            dynamic: false,
            user_meta: Default::default(),
            location: None,
        });
        self
    }

    fn with_rule(&mut self, f: impl FnOnce(&mut RawRule)) -> &mut Self {
        match self.rules.last_mut() {
            Some(rule) => f(rule),
            None => self.misuse("rule property set before any rule is opened"),
        }
        self
    }

    fn with_prod(&mut self, f: impl FnOnce(&mut ProdMeta)) -> &mut Self {
        match self.rules.last_mut().and_then(|r| r.productions.last_mut()) {
            Some(production) => f(&mut production.meta),
            None => self.misuse("production property set before any production"),
        }
        self
    }

    fn with_term(&mut self, f: impl FnOnce(&mut RawTerminal)) -> &mut Self {
        match self.terminals.last_mut() {
            Some(terminal) => f(terminal),
            None => self.misuse("terminal property set before any terminal"),
        }
        self
    }

    fn misuse(&mut self, message: &str) {
        if self.error.is_none() {
            self.error = Some(message.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_misuse_reported_at_build() {
        let mut b = GrammarBuilder::new();
        b.production([re("X")]);
        assert!(b.build().is_err());
    }

    #[test]
    fn start_symbol_defaults_to_first_rule() {
        let mut b = GrammarBuilder::new();
        b.rule("A").production([st("a")]);
        b.rule("B").production([st("b")]);
        let grammar = b.build().unwrap();
        assert_eq!(grammar.symbol_name(grammar.start_symbol), "A");
    }

    #[test]
    fn explicit_start_symbol() {
        let mut b = GrammarBuilder::new();
        b.rule("A").production([st("a")]);
        b.rule("B").production([st("b")]);
        b.start("B");
        let grammar = b.build().unwrap();
        assert_eq!(grammar.symbol_name(grammar.start_symbol), "B");
    }
}
