//! Semantic actions: the action registry, built-in actions and tree
//! evaluation.
//!
//! Actions are resolved against a grammar once, into per-symbol slots
//! (a single callable, or one callable per alternative chosen by the
//! production's ordinal). Evaluation walks a parse tree bottom-up, left to
//! right, firing actions in the order LR reductions would.

use std::{any::Any, cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    error::{Error, Result},
    grammar::{AssignOp, Grammar, Terminal, AUG},
    index::{NonTermVec, ProdIndex, SymbolIndex, TermVec},
    lexer::Token,
    tree::TreeNode,
};

/// Parse-scoped user state carried by the context. Only the owning parse
/// call touches it.
pub type Extra = RefCell<Box<dyn Any>>;

/// Context passed to semantic actions.
pub struct Context<'i, 'c> {
    pub grammar: &'c Grammar,
    pub input: &'i str,
    pub start_position: usize,
    pub end_position: usize,
    /// Layout content preceding the matched span.
    pub layout: &'i str,
    /// Production being reduced; `None` for terminal actions.
    pub production: Option<ProdIndex>,
    pub symbol: SymbolIndex,
    pub extra: &'c Extra,
}

/// Values semantic evaluation produces.
///
/// The constructors cover the default behaviors: a terminal with no action
/// yields its matched slice, a production with no action yields its single
/// sub-result or the list of sub-results, desugared repetitions collect
/// into lists, and rules with named matches build objects.
pub trait SemanticValue<'i>: Clone {
    fn from_match(value: &'i str) -> Self;
    fn from_list(items: Vec<Self>) -> Self;
    fn none() -> Self;
    fn from_presence(present: bool) -> Self;
    /// List append used by the collect actions.
    fn append(list: Self, item: Self) -> Self;

    /// True unless the value marks an absent/empty match. Drives `?=`
    /// assignments.
    fn is_present(&self) -> bool {
        true
    }

    /// True only for the dedicated "nothing" value. Collect actions skip
    /// such items.
    fn is_none(&self) -> bool {
        false
    }

    fn from_object(type_name: &str, fields: Vec<(String, Self)>) -> Self {
        let _ = type_name;
        Self::from_list(fields.into_iter().map(|(_, value)| value).collect())
    }
}

/// Dynamically-typed value used when no custom value type is needed.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue<'i> {
    None,
    Str(&'i str),
    Bool(bool),
    List(Vec<DefaultValue<'i>>),
    Object {
        type_name: String,
        fields: Vec<(String, DefaultValue<'i>)>,
    },
}

impl<'i> DefaultValue<'i> {
    pub fn as_str(&self) -> Option<&'i str> {
        match self {
            DefaultValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[DefaultValue<'i>]> {
        match self {
            DefaultValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&DefaultValue<'i>> {
        match self {
            DefaultValue::Object { fields, .. } => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }
}

impl<'i> SemanticValue<'i> for DefaultValue<'i> {
    fn from_match(value: &'i str) -> Self {
        DefaultValue::Str(value)
    }

    fn from_list(items: Vec<Self>) -> Self {
        DefaultValue::List(items)
    }

    fn none() -> Self {
        DefaultValue::None
    }

    fn from_presence(present: bool) -> Self {
        DefaultValue::Bool(present)
    }

    fn append(list: Self, item: Self) -> Self {
        match list {
            DefaultValue::List(mut items) => {
                items.push(item);
                DefaultValue::List(items)
            }
            other => DefaultValue::List(vec![other, item]),
        }
    }

    fn is_present(&self) -> bool {
        match self {
            DefaultValue::None => false,
            DefaultValue::Bool(b) => *b,
            DefaultValue::Str(s) => !s.is_empty(),
            DefaultValue::List(items) => !items.is_empty(),
            DefaultValue::Object { .. } => true,
        }
    }

    fn is_none(&self) -> bool {
        matches!(self, DefaultValue::None)
    }

    fn from_object(type_name: &str, fields: Vec<(String, Self)>) -> Self {
        DefaultValue::Object { type_name: type_name.to_owned(), fields }
    }
}

pub type TermAction<'i, V> =
    Rc<dyn for<'c> Fn(&Context<'i, 'c>, &Token<'i>) -> V + 'i>;
pub type ProdAction<'i, V> =
    Rc<dyn for<'c> Fn(&Context<'i, 'c>, Vec<V>) -> V + 'i>;

/// Wraps a closure as a production action for
/// [`ActionRegistry::alternatives`].
pub fn prod_action<'i, V>(
    f: impl for<'c> Fn(&Context<'i, 'c>, Vec<V>) -> V + 'i,
) -> ProdAction<'i, V> {
    Rc::new(f)
}

enum ActionDef<'i, V> {
    Terminal(TermAction<'i, V>),
    Production(ProdAction<'i, V>),
    Alternatives(Vec<ProdAction<'i, V>>),
}

/// Named actions supplied by the user, keyed by symbol name or by the
/// `@action` name declared in the grammar.
pub struct ActionRegistry<'i, V> {
    actions: IndexMap<String, ActionDef<'i, V>>,
}

impl<'i, V: SemanticValue<'i> + 'i> Default for ActionRegistry<'i, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'i, V: SemanticValue<'i> + 'i> ActionRegistry<'i, V> {
    pub fn new() -> Self {
        ActionRegistry { actions: IndexMap::new() }
    }

    pub fn terminal(
        mut self,
        name: &str,
        f: impl for<'c> Fn(&Context<'i, 'c>, &Token<'i>) -> V + 'i,
    ) -> Self {
        self.actions
            .insert(name.to_owned(), ActionDef::Terminal(Rc::new(f)));
        self
    }

    pub fn production(
        mut self,
        name: &str,
        f: impl for<'c> Fn(&Context<'i, 'c>, Vec<V>) -> V + 'i,
    ) -> Self {
        self.actions
            .insert(name.to_owned(), ActionDef::Production(Rc::new(f)));
        self
    }

    /// One action per alternative, chosen by the production's ordinal
    /// within its rule. The list length must match the number of
    /// alternatives.
    pub fn alternatives(
        mut self,
        name: &str,
        actions: Vec<ProdAction<'i, V>>,
    ) -> Self {
        self.actions
            .insert(name.to_owned(), ActionDef::Alternatives(actions));
        self
    }

    /// Resolves the registry against a grammar into per-symbol action
    /// slots. Resolution order, most specific first: by symbol name, by
    /// declared action name, then the built-in actions.
    pub fn resolve(&self, grammar: &Grammar) -> Result<ResolvedActions<'i, V>> {
        let mut terms: TermVec<Option<TermAction<'i, V>>> = TermVec::new();
        for terminal in &grammar.terminals {
            terms.push(self.resolve_terminal(terminal)?);
        }

        let mut nonterms: NonTermVec<Option<NonTermActions<'i, V>>> =
            NonTermVec::new();
        for nonterminal in &grammar.nonterminals {
            if nonterminal.idx == AUG {
                nonterms.push(None);
                continue;
            }
            let slot = self.resolve_nonterminal(grammar, nonterminal)?;
            nonterms.push(slot);
        }

        Ok(ResolvedActions { terms, nonterms })
    }

    fn resolve_terminal(
        &self,
        terminal: &Terminal,
    ) -> Result<Option<TermAction<'i, V>>> {
        let def = self.actions.get(&terminal.name).or_else(|| {
            terminal
                .action_name
                .as_ref()
                .and_then(|name| self.actions.get(name))
        });
        match def {
            Some(ActionDef::Terminal(f)) => Ok(Some(Rc::clone(f))),
            Some(_) => Err(Error::ParserInit(format!(
                "cannot use a production action for terminal \"{}\"",
                terminal.name
            ))),
            None => Ok(None),
        }
    }

    fn resolve_nonterminal(
        &self,
        grammar: &Grammar,
        nonterminal: &crate::grammar::NonTerminal,
    ) -> Result<Option<NonTermActions<'i, V>>> {
        let def = self.actions.get(&nonterminal.name).or_else(|| {
            nonterminal
                .action_name
                .as_ref()
                .and_then(|name| self.actions.get(name))
        });

        let slot = match def {
            Some(ActionDef::Terminal(_)) => {
                return Err(Error::ParserInit(format!(
                    "cannot use a terminal action for rule \"{}\"",
                    nonterminal.name
                )))
            }
            Some(ActionDef::Production(f)) => {
                Some(NonTermActions::Single(Rc::clone(f)))
            }
            Some(ActionDef::Alternatives(fs)) => {
                Some(NonTermActions::PerAlternative(fs.clone()))
            }
            None => match &nonterminal.action_name {
                Some(name) => match builtin_action::<V>(name) {
                    Some(slot) => Some(slot),
                    None => {
                        return Err(Error::ParserInit(format!(
                            "action \"{name}\" given for rule \"{}\" doesn't \
                             exist in the built-in actions and is not \
                             provided in the registry",
                            nonterminal.name
                        )))
                    }
                },
                None => None,
            },
        };

        if let Some(NonTermActions::PerAlternative(fs)) = &slot {
            if fs.len() != nonterminal.productions.len() {
                return Err(Error::ParserInit(format!(
                    "length of list of actions must match the number of \
                     productions for non-terminal \"{}\"",
                    nonterminal.name
                )));
            }
        }
        Ok(slot)
    }
}

enum NonTermActions<'i, V> {
    Single(ProdAction<'i, V>),
    PerAlternative(Vec<ProdAction<'i, V>>),
}

/// Registry resolved against a grammar: one slot per terminal and per
/// non-terminal.
pub struct ResolvedActions<'i, V> {
    terms: TermVec<Option<TermAction<'i, V>>>,
    nonterms: NonTermVec<Option<NonTermActions<'i, V>>>,
}

impl<'i, V: SemanticValue<'i> + 'i> ResolvedActions<'i, V> {
    /// Resolves an empty registry: defaults and grammar-declared built-ins
    /// only.
    pub fn defaults(grammar: &Grammar) -> Result<Self> {
        ActionRegistry::new().resolve(grammar)
    }
}

// ---------------------------------------------------------------------------
// Built-in actions referenced by desugared rules and `@action` names.
// ---------------------------------------------------------------------------

fn builtin_action<'i, V: SemanticValue<'i> + 'i>(
    name: &str,
) -> Option<NonTermActions<'i, V>> {
    use NonTermActions::*;
    Some(match name {
        // One-or-more: X_1: X_1 X | X;
        "collect" => PerAlternative(vec![collect_first(), pass_nochange()]),
        // One-or-more with separator: X_1_S: X_1_S S X | X;
        "collect_sep" => {
            PerAlternative(vec![collect_first_sep(), pass_nochange()])
        }
        // Optional: X_opt: X | EMPTY;
        "optional" => PerAlternative(vec![pass_single(), pass_none()]),
        // Zero-or-more: X_0: X_1 | EMPTY; empty gives an empty list.
        "optional_list" => Single(optional_list()),
        "pass_single" => Single(pass_single()),
        "pass_inner" => Single(pass_inner()),
        "pass_none" => Single(pass_none()),
        "pass_nochange" => Single(pass_nochange()),
        "obj" => Single(obj()),
        _ => return None,
    })
}

fn collect_first<'i, V: SemanticValue<'i> + 'i>() -> ProdAction<'i, V> {
    Rc::new(|_, mut nodes: Vec<V>| {
        if nodes.len() == 2 {
            let item = nodes.remove(1);
            let list = nodes.remove(0);
            if item.is_none() {
                list
            } else {
                V::append(list, item)
            }
        } else {
            V::from_list(nodes)
        }
    })
}

fn collect_first_sep<'i, V: SemanticValue<'i> + 'i>() -> ProdAction<'i, V> {
    Rc::new(|_, mut nodes: Vec<V>| {
        if nodes.len() == 3 {
            let item = nodes.remove(2);
            let list = nodes.remove(0);
            if item.is_none() {
                list
            } else {
                V::append(list, item)
            }
        } else {
            V::from_list(nodes)
        }
    })
}

fn pass_single<'i, V: SemanticValue<'i> + 'i>() -> ProdAction<'i, V> {
    Rc::new(|_, nodes: Vec<V>| match nodes.into_iter().next() {
        Some(node) => node,
        None => V::none(),
    })
}

fn pass_inner<'i, V: SemanticValue<'i> + 'i>() -> ProdAction<'i, V> {
    Rc::new(|_, nodes: Vec<V>| match nodes.into_iter().nth(1) {
        Some(node) => node,
        None => V::none(),
    })
}

fn pass_none<'i, V: SemanticValue<'i> + 'i>() -> ProdAction<'i, V> {
    Rc::new(|_, _| V::none())
}

fn pass_nochange<'i, V: SemanticValue<'i> + 'i>() -> ProdAction<'i, V> {
    Rc::new(|_, nodes: Vec<V>| V::from_list(nodes))
}

fn optional_list<'i, V: SemanticValue<'i> + 'i>() -> ProdAction<'i, V> {
    Rc::new(|_, nodes: Vec<V>| match nodes.into_iter().next() {
        Some(node) => node,
        None => V::from_list(vec![]),
    })
}

/// Default action for rules with named matches: builds an object with
/// fields from the assignments; `?=` fields hold presence booleans.
fn obj<'i, V: SemanticValue<'i> + 'i>() -> ProdAction<'i, V> {
    Rc::new(|ctx, nodes: Vec<V>| {
        let Some(prod) = ctx.production else {
            return V::from_list(nodes);
        };
        let production = &ctx.grammar.productions[prod];
        let type_name =
            &ctx.grammar.nonterminals[production.nonterminal].name;
        let fields = production
            .assignments
            .iter()
            .map(|assignment| {
                let value = nodes
                    .get(assignment.index)
                    .cloned()
                    .unwrap_or_else(V::none);
                let value = match assignment.op {
                    AssignOp::Plain => value,
                    AssignOp::Bool => V::from_presence(value.is_present()),
                };
                (assignment.name.clone(), value)
            })
            .collect();
        V::from_object(type_name, fields)
    })
}

// ---------------------------------------------------------------------------
// Tree evaluation
// ---------------------------------------------------------------------------

/// Evaluates a parse tree with the resolved actions, firing them bottom-up
/// and left to right (the LR reduction order).
pub fn call_actions<'i, V: SemanticValue<'i> + 'i>(
    tree: &TreeNode<'i>,
    grammar: &Grammar,
    actions: &ResolvedActions<'i, V>,
    input: &'i str,
) -> V {
    let extra: Extra = RefCell::new(Box::new(()));
    call_actions_with_extra(tree, grammar, actions, input, &extra)
}

/// Same as [`call_actions`] with caller-provided parse-scoped state
/// available to actions through `ctx.extra`.
pub fn call_actions_with_extra<'i, V: SemanticValue<'i> + 'i>(
    tree: &TreeNode<'i>,
    grammar: &Grammar,
    actions: &ResolvedActions<'i, V>,
    input: &'i str,
    extra: &Extra,
) -> V {
    match tree {
        TreeNode::Term { token, layout } => {
            let ctx = Context {
                grammar,
                input,
                start_position: token.position,
                end_position: token.end_position(),
                layout,
                production: None,
                symbol: token.symbol.to_symbol_index(),
                extra,
            };
            match &actions.terms[token.symbol] {
                Some(f) => f(&ctx, token),
                None => V::from_match(token.value),
            }
        }
        TreeNode::NonTerm { prod, start, end, layout, children } => {
            let subresults: Vec<V> = children
                .iter()
                .map(|child| {
                    call_actions_with_extra(child, grammar, actions, input, extra)
                })
                .collect();
            let production = &grammar.productions[*prod];
            let ctx = Context {
                grammar,
                input,
                start_position: *start,
                end_position: *end,
                layout,
                production: Some(*prod),
                symbol: grammar.lhs_symbol(*prod),
                extra,
            };
            match &actions.nonterms[production.nonterminal] {
                Some(NonTermActions::Single(f)) => f(&ctx, subresults),
                Some(NonTermActions::PerAlternative(fs)) => {
                    fs[production.ntidx](&ctx, subresults)
                }
                None => {
                    let mut subresults = subresults;
                    if subresults.len() == 1 {
                        subresults.remove(0)
                    } else {
                        V::from_list(subresults)
                    }
                }
            }
        }
    }
}
