//! The grammar DSL, bootstrapped with the engine itself.
//!
//! The DSL grammar is described through the structural builder and parsed
//! by the regular LR driver; semantic actions assemble the raw grammar
//! description that [`Grammar::from_parts`] finalizes. Rules are
//! `NAME [{meta}] : body ;`, terminal rules follow the `terminals`
//! keyword, RHS items take `*`/`+`/`?` (optionally greedy `!`, optionally
//! `[Separator]`), assignments `name = X` / `name ?= X`, groups `( ... )`,
//! `@action` annotations, `//` line comments and nestable `/* */` block
//! comments.

use once_cell::sync::Lazy;

use crate::{
    actions::{
        call_actions, prod_action, ActionRegistry, Context, ProdAction,
        SemanticValue,
    },
    error::{Error, Result},
    grammar::{
        builder::{re, st, GrammarBuilder},
        AssignOp, Associativity, ConstVal, Grammar, GrammarOptions, GrammarParts,
        Mult, ProdMeta, RawProduction, RawRef, RawRhsElem, RawRule, RawTerminal,
        RecognizerDef, RefTarget, UserMeta,
    },
    parser::{Parser, ParserSettings},
};

static DSL_GRAMMAR: Lazy<Grammar> = Lazy::new(|| {
    build_dsl_grammar().expect("the bootstrap grammar is well-formed")
});

thread_local! {
    static DSL_PARSER: Parser<'static> = Parser::with_settings(&DSL_GRAMMAR, ParserSettings::default())
        .expect("the bootstrap grammar is deterministic");
}

/// Parses grammar DSL text into a finalized [`Grammar`].
pub(crate) fn parse_grammar(source: &str, options: GrammarOptions) -> Result<Grammar> {
    let tree = DSL_PARSER.with(|p| p.parse(source))?;
    let registry = dsl_actions();
    let resolved = registry.resolve(&DSL_GRAMMAR)?;
    let value = call_actions(&tree, &DSL_GRAMMAR, &resolved, source);
    let (parts, has_imports) = match value {
        DslValue::Parts(boxed) => *boxed,
        other => {
            return Err(Error::grammar(format!(
                "internal: grammar parse produced {other:?}"
            )))
        }
    };
    if has_imports {
        return Err(Error::grammar(
            "import is not supported; grammars must be self-contained",
        ));
    }
    Grammar::from_parts(parts, options)
}

/// The grammar of grammars.
fn build_dsl_grammar() -> Result<Grammar> {
    let mut b = GrammarBuilder::new();

    b.rule("PGFile")
        .production([re("ProductionRules")])
        .production([re("Imports"), re("ProductionRules")])
        .production([re("ProductionRules"), st("terminals"), re("TerminalRules")])
        .production([
            re("Imports"),
            re("ProductionRules"),
            st("terminals"),
            re("TerminalRules"),
        ])
        .production([st("terminals"), re("TerminalRules")]);

    b.rule("Imports")
        .action("collect")
        .production([re("Imports"), re("Import")])
        .production([re("Import")]);
    b.rule("Import")
        .production([st("import"), re("StrConst"), st(";")])
        .production([st("import"), re("StrConst"), st("as"), re("Name"), st(";")]);

    b.rule("ProductionRules")
        .action("collect")
        .production([re("ProductionRules"), re("ProductionRuleWithAction")])
        .production([re("ProductionRuleWithAction")]);
    b.rule("ProductionRuleWithAction")
        .production([re("Action"), re("ProductionRule")])
        .production([re("ProductionRule")]);
    b.rule("ProductionRule")
        .production([re("Name"), st(":"), re("ProductionRuleRHS"), st(";")])
        .production([
            re("Name"),
            st("{"),
            re("ProdMetaDatas"),
            st("}"),
            st(":"),
            re("ProductionRuleRHS"),
            st(";"),
        ]);
    b.rule("ProductionRuleRHS")
        .left()
        .prior(5)
        .action("collect_sep")
        .production([re("ProductionRuleRHS"), st("|"), re("Production")])
        .production([re("Production")]);
    b.rule("Production")
        .production([re("Assignments")])
        .production([re("Assignments"), st("{"), re("ProdMetaDatas"), st("}")]);

    b.rule("TerminalRules")
        .action("collect")
        .production([re("TerminalRules"), re("TerminalRuleWithAction")])
        .production([re("TerminalRuleWithAction")]);
    b.rule("TerminalRuleWithAction")
        .production([re("Action"), re("TerminalRule")])
        .production([re("TerminalRule")]);
    b.rule("TerminalRule")
        .left()
        .prior(15)
        .production([re("Name"), st(":"), re("Recognizer"), st(";")])
        .production([re("Name"), st(":"), st(";")])
        .production([
            re("Name"),
            st(":"),
            re("Recognizer"),
            st("{"),
            re("TermMetaDatas"),
            st("}"),
            st(";"),
        ])
        .production([
            re("Name"),
            st(":"),
            st("{"),
            re("TermMetaDatas"),
            st("}"),
            st(";"),
        ]);

    b.rule("ProdMetaData")
        .production([st("left")])
        .production([st("reduce")])
        .production([st("right")])
        .production([st("shift")])
        .production([st("dynamic")])
        .production([st("nops")])
        .production([st("nopse")])
        .production([re("IntConst")])
        .production([re("UserMetaData")]);
    b.rule("ProdMetaDatas")
        .left()
        .action("collect_sep")
        .production([re("ProdMetaDatas"), st(","), re("ProdMetaData")])
        .production([re("ProdMetaData")]);

    b.rule("TermMetaData")
        .production([st("prefer")])
        .production([st("finish")])
        .production([st("nofinish")])
        .production([st("dynamic")])
        .production([re("IntConst")])
        .production([re("UserMetaData")]);
    b.rule("TermMetaDatas")
        .left()
        .action("collect_sep")
        .production([re("TermMetaDatas"), st(","), re("TermMetaData")])
        .production([re("TermMetaData")]);

    b.rule("UserMetaData")
        .production([re("Name"), st(":"), re("Const")]);
    b.rule("Const")
        .production([re("IntConst")])
        .production([re("FloatConst")])
        .production([re("BoolConst")])
        .production([re("StrConst")]);

    b.rule("Assignment")
        .production([re("PlainAssignment")])
        .production([re("BoolAssignment")])
        .production([re("GrammarSymbolReference")]);
    b.rule("Assignments")
        .action("collect")
        .production([re("Assignments"), re("Assignment")])
        .production([re("Assignment")]);
    b.rule("PlainAssignment")
        .production([re("Name"), st("="), re("GrammarSymbolReference")]);
    b.rule("BoolAssignment")
        .production([re("Name"), st("?="), re("GrammarSymbolReference")]);

    b.rule("ProductionGroup")
        .production([st("("), re("ProductionRuleRHS"), st(")")]);

    b.rule("GrammarSymbolReference")
        .production([re("GrammarSymbol"), re("OptRepeatOperator")])
        .production([re("ProductionGroup"), re("OptRepeatOperator")]);
    b.rule("OptRepeatOperator")
        .production([re("RepeatOperator")])
        .production([re("EMPTY")]);
    b.rule("RepeatOperator")
        .production([st("*"), re("OptRepeatModifiersExp")])
        .production([st("*!"), re("OptRepeatModifiersExp")])
        .production([st("+"), re("OptRepeatModifiersExp")])
        .production([st("+!"), re("OptRepeatModifiersExp")])
        .production([st("?"), re("OptRepeatModifiersExp")])
        .production([st("?!"), re("OptRepeatModifiersExp")]);
    b.rule("OptRepeatModifiersExp")
        .production([st("["), re("OptRepeatModifiers"), st("]")])
        .production([re("EMPTY")]);
    b.rule("OptRepeatModifiers")
        .action("collect_sep")
        .production([re("OptRepeatModifiers"), st(","), re("OptRepeatModifier")])
        .production([re("OptRepeatModifier")]);
    b.rule("OptRepeatModifier").production([re("Name")]);

    b.rule("GrammarSymbol")
        .production([re("Name")])
        .production([re("StrConst")]);
    b.rule("Recognizer")
        .production([re("StrConst")])
        .production([re("RegExTerm")]);

    // Layout: whitespace, line comments and nestable block comments.
    b.rule("LAYOUT")
        .production([re("LAYOUT_ITEM")])
        .production([re("LAYOUT"), re("LAYOUT_ITEM")])
        .production([re("EMPTY")]);
    b.rule("LAYOUT_ITEM")
        .production([re("WS")])
        .production([re("Comment")]);
    b.rule("Comment")
        .production([st("/*"), re("CORNCS"), st("*/")])
        .production([re("CommentLine")]);
    b.rule("CORNCS")
        .production([re("CORNC")])
        .production([re("CORNCS"), re("CORNC")])
        .production([re("EMPTY")]);
    b.rule("CORNC")
        .production([re("Comment")])
        .production([re("NotComment")])
        .production([re("WS")]);

    b.terminal_regex("Name", r"[a-zA-Z_][a-zA-Z0-9_\.]*");
    b.terminal_regex("RegExTerm", r"/(\\.|[^/\\])*/");
    b.terminal_regex("IntConst", r"\d+");
    b.terminal_regex("FloatConst", r"[+-]?(\d+\.\d*|\.\d+)([eE][+-]?\d+)?");
    b.terminal_regex("BoolConst", r"true|false");
    b.terminal_regex(
        "StrConst",
        r#"(?s)('[^'\\]*(?:\\.[^'\\]*)*')|("[^"\\]*(?:\\.[^"\\]*)*")"#,
    );
    b.terminal_regex("Action", r"@[a-zA-Z0-9_]+");
    b.terminal_regex("WS", r"\s+");
    b.terminal_regex("CommentLine", r"//.*");
    b.terminal_regex("NotComment", r"((\*[^/])|[^\s*/]|/[^*])+");

    b.start("PGFile");
    b.build()
}

/// Values produced by the bootstrap actions.
#[derive(Debug, Clone)]
enum DslValue {
    None,
    Bool(bool),
    Str(String),
    Int(u32),
    Float(f64),
    List(Vec<DslValue>),
    Reference(Box<RawRef>),
    Element(Box<RawRhsElem>),
    Repeat {
        mult: Mult,
        greedy: bool,
        separator: Option<String>,
    },
    Meta(MetaItem),
    Production(Box<RawProduction>),
    Rule(Box<RawRule>),
    Terminal(Box<RawTerminal>),
    RecognizerDef(Box<RecognizerDef>),
    ImportFound,
    Parts(Box<(GrammarParts, bool)>),
}

#[derive(Debug, Clone)]
enum MetaItem {
    Assoc(Associativity),
    Prior(u32),
    Dynamic,
    Nops,
    Nopse,
    Prefer,
    Finish(bool),
    User(String, ConstVal),
}

impl<'i> SemanticValue<'i> for DslValue {
    fn from_match(value: &'i str) -> Self {
        DslValue::Str(value.to_owned())
    }

    fn from_list(items: Vec<Self>) -> Self {
        DslValue::List(items)
    }

    fn none() -> Self {
        DslValue::None
    }

    fn from_presence(present: bool) -> Self {
        DslValue::Bool(present)
    }

    fn append(list: Self, item: Self) -> Self {
        match list {
            DslValue::List(mut items) => {
                items.push(item);
                DslValue::List(items)
            }
            other => DslValue::List(vec![other, item]),
        }
    }

    fn is_none(&self) -> bool {
        matches!(self, DslValue::None)
    }
}

impl DslValue {
    fn into_str(self) -> String {
        match self {
            DslValue::Str(s) => s,
            other => panic!("expected string value, got {other:?}"),
        }
    }

    fn into_list(self) -> Vec<DslValue> {
        match self {
            DslValue::List(items) => items,
            other => panic!("expected list value, got {other:?}"),
        }
    }

    fn into_metas(self) -> Vec<MetaItem> {
        self.into_list()
            .into_iter()
            .map(|v| match v {
                DslValue::Meta(item) => item,
                other => panic!("expected meta item, got {other:?}"),
            })
            .collect()
    }

    fn into_reference(self) -> RawRef {
        match self {
            DslValue::Reference(r) => *r,
            other => panic!("expected symbol reference, got {other:?}"),
        }
    }

    fn into_element(self) -> RawRhsElem {
        match self {
            DslValue::Element(e) => *e,
            DslValue::Reference(r) => RawRhsElem { reference: *r, assign: None },
            other => panic!("expected RHS element, got {other:?}"),
        }
    }

    fn into_const(self) -> ConstVal {
        match self {
            DslValue::Int(v) => ConstVal::Int(v as i64),
            DslValue::Float(v) => ConstVal::Float(v),
            DslValue::Bool(v) => ConstVal::Bool(v),
            DslValue::Str(v) => ConstVal::Str(v),
            other => panic!("expected constant, got {other:?}"),
        }
    }
}

fn fold_prod_meta(meta: &mut ProdMeta, items: Vec<MetaItem>) {
    for item in items {
        match item {
            MetaItem::Assoc(assoc) => meta.assoc = Some(assoc),
            MetaItem::Prior(prior) => meta.prior = Some(prior),
            MetaItem::Dynamic => meta.dynamic = true,
            MetaItem::Nops => meta.nops = true,
            MetaItem::Nopse => meta.nopse = true,
            MetaItem::User(name, value) => {
                meta.user_meta.insert(name, value);
            }
            // Terminal-only entries are unreachable in production meta.
            MetaItem::Prefer | MetaItem::Finish(_) => {}
        }
    }
}

fn fold_term_meta(terminal: &mut RawTerminal, items: Vec<MetaItem>) {
    for item in items {
        match item {
            MetaItem::Prior(prior) => terminal.prior = Some(prior),
            MetaItem::Prefer => terminal.prefer = true,
            MetaItem::Finish(finish) => terminal.finish = Some(finish),
            MetaItem::Dynamic => terminal.dynamic = true,
            MetaItem::User(name, value) => {
                terminal.user_meta.insert(name, value);
            }
            MetaItem::Assoc(_) | MetaItem::Nops | MetaItem::Nopse => {}
        }
    }
}

/// Strips quotes and unescapes a string constant.
fn unquote(value: &str) -> String {
    let inner = &value[1..value.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn dsl_actions<'i>() -> ActionRegistry<'i, DslValue> {
    ActionRegistry::new()
        .terminal("StrConst", |_, token| {
            DslValue::Str(unquote(token.value))
        })
        .terminal("RegExTerm", |_, token| {
            DslValue::Str(token.value[1..token.value.len() - 1].to_owned())
        })
        .terminal("IntConst", |_, token| {
            DslValue::Int(token.value.parse().unwrap_or(0))
        })
        .terminal("FloatConst", |_, token| {
            DslValue::Float(token.value.parse().unwrap_or(0.0))
        })
        .terminal("BoolConst", |_, token| {
            DslValue::Bool(token.value == "true")
        })
        .terminal("Action", |_, token| {
            // Strip the @ prefix.
            DslValue::Str(token.value[1..].to_owned())
        })
        .production("PGFile", act_pgfile)
        .production("Import", |_, _| DslValue::ImportFound)
        .production("ProductionRuleWithAction", act_rule_with_action)
        .production("ProductionRule", act_production_rule)
        .production("Production", act_production)
        .production("Assignment", |_, nodes| {
            DslValue::Element(Box::new(take_first(nodes).into_element()))
        })
        .production("PlainAssignment", act_plain_assignment)
        .production("BoolAssignment", act_bool_assignment)
        .production("ProductionGroup", act_production_group)
        .production("GrammarSymbolReference", act_gsymbol_reference)
        .alternatives(
            "RepeatOperator",
            vec![
                rep_op(Mult::ZeroOrMore, false),
                rep_op(Mult::ZeroOrMore, true),
                rep_op(Mult::OneOrMore, false),
                rep_op(Mult::OneOrMore, true),
                rep_op(Mult::Optional, false),
                rep_op(Mult::Optional, true),
            ],
        )
        .production("OptRepeatModifiersExp", |_, nodes| {
            match nodes.into_iter().nth(1) {
                Some(mods) => mods,
                None => DslValue::None,
            }
        })
        .alternatives(
            "GrammarSymbol",
            vec![
                prod_action(|_, nodes: Vec<DslValue>| {
                    DslValue::Reference(Box::new(RawRef::name(
                        take_first(nodes).into_str(),
                    )))
                }),
                prod_action(|_, nodes: Vec<DslValue>| {
                    DslValue::Reference(Box::new(RawRef::str_term(
                        take_first(nodes).into_str(),
                    )))
                }),
            ],
        )
        .alternatives(
            "Recognizer",
            vec![
                prod_action(|_, nodes: Vec<DslValue>| {
                    DslValue::RecognizerDef(Box::new(RecognizerDef::StrConst(
                        take_first(nodes).into_str(),
                    )))
                }),
                prod_action(|_, nodes: Vec<DslValue>| {
                    DslValue::RecognizerDef(Box::new(RecognizerDef::Regex(
                        take_first(nodes).into_str(),
                    )))
                }),
            ],
        )
        .production("TerminalRuleWithAction", act_rule_with_action)
        .production("TerminalRule", act_terminal_rule)
        .alternatives(
            "ProdMetaData",
            vec![
                meta_const(MetaItem::Assoc(Associativity::Left)),
                meta_const(MetaItem::Assoc(Associativity::Left)),
                meta_const(MetaItem::Assoc(Associativity::Right)),
                meta_const(MetaItem::Assoc(Associativity::Right)),
                meta_const(MetaItem::Dynamic),
                meta_const(MetaItem::Nops),
                meta_const(MetaItem::Nopse),
                prod_action(|_, nodes: Vec<DslValue>| match take_first(nodes) {
                    DslValue::Int(prior) => DslValue::Meta(MetaItem::Prior(prior)),
                    other => other,
                }),
                prod_action(|_, nodes: Vec<DslValue>| take_first(nodes)),
            ],
        )
        .alternatives(
            "TermMetaData",
            vec![
                meta_const(MetaItem::Prefer),
                meta_const(MetaItem::Finish(true)),
                meta_const(MetaItem::Finish(false)),
                meta_const(MetaItem::Dynamic),
                prod_action(|_, nodes: Vec<DslValue>| match take_first(nodes) {
                    DslValue::Int(prior) => DslValue::Meta(MetaItem::Prior(prior)),
                    other => other,
                }),
                prod_action(|_, nodes: Vec<DslValue>| take_first(nodes)),
            ],
        )
        .production("UserMetaData", |_, mut nodes| {
            let value = nodes.pop().expect("constant value").into_const();
            let name = take_first(nodes).into_str();
            DslValue::Meta(MetaItem::User(name, value))
        })
}

fn take_first(nodes: Vec<DslValue>) -> DslValue {
    nodes.into_iter().next().unwrap_or(DslValue::None)
}

fn rep_op<'i>(mult: Mult, greedy: bool) -> ProdAction<'i, DslValue> {
    prod_action(move |_, nodes: Vec<DslValue>| {
        let separator = match nodes.into_iter().nth(1) {
            Some(DslValue::List(mods)) => mods
                .into_iter()
                .next()
                .map(|m| m.into_str()),
            _ => None,
        };
        DslValue::Repeat { mult, greedy, separator }
    })
}

fn meta_const<'i>(item: MetaItem) -> ProdAction<'i, DslValue> {
    prod_action(move |_, _| DslValue::Meta(item.clone()))
}

/// Collects rules, terminals and import markers of the file.
fn act_pgfile(_: &Context<'_, '_>, nodes: Vec<DslValue>) -> DslValue {
    let mut parts = GrammarParts::default();
    let mut has_imports = false;
    for node in nodes {
        match node {
            DslValue::List(items) => {
                for item in items {
                    match item {
                        DslValue::Rule(rule) => parts.rules.push(*rule),
                        DslValue::Terminal(terminal) => {
                            parts.terminals.push(*terminal)
                        }
                        DslValue::ImportFound => has_imports = true,
                        _ => {}
                    }
                }
            }
            DslValue::Rule(rule) => parts.rules.push(*rule),
            DslValue::Terminal(terminal) => parts.terminals.push(*terminal),
            DslValue::ImportFound => has_imports = true,
            _ => {}
        }
    }
    DslValue::Parts(Box::new((parts, has_imports)))
}

/// `@action` before a rule names the action for all of its productions.
fn act_rule_with_action(_: &Context<'_, '_>, mut nodes: Vec<DslValue>) -> DslValue {
    if nodes.len() == 1 {
        return take_first(nodes);
    }
    let rule = nodes.pop().expect("rule after action");
    let action_name = take_first(nodes).into_str();
    match rule {
        DslValue::Rule(mut rule) => {
            rule.action_name = Some(action_name);
            DslValue::Rule(rule)
        }
        DslValue::Terminal(mut terminal) => {
            terminal.action_name = Some(action_name);
            DslValue::Terminal(terminal)
        }
        other => other,
    }
}

fn act_production_rule(_: &Context<'_, '_>, mut nodes: Vec<DslValue>) -> DslValue {
    let mut meta = ProdMeta::default();
    let (name, productions) = if nodes.len() == 4 {
        // NAME : RHS ;
        let rhs = nodes.remove(2);
        let name = take_first(nodes).into_str();
        (name, rhs)
    } else {
        // NAME { metas } : RHS ;
        let rhs = nodes.remove(5);
        let metas = nodes.remove(2).into_metas();
        fold_prod_meta(&mut meta, metas);
        let name = take_first(nodes).into_str();
        (name, rhs)
    };
    let productions = productions
        .into_list()
        .into_iter()
        .map(|p| match p {
            DslValue::Production(production) => *production,
            other => panic!("expected production, got {other:?}"),
        })
        .collect();
    DslValue::Rule(Box::new(RawRule {
        name,
        action_name: None,
        meta,
        productions,
        location: None,
    }))
}

fn act_production(_: &Context<'_, '_>, mut nodes: Vec<DslValue>) -> DslValue {
    let mut meta = ProdMeta::default();
    if nodes.len() > 1 {
        let metas = nodes.remove(2).into_metas();
        fold_prod_meta(&mut meta, metas);
    }
    let rhs = take_first(nodes)
        .into_list()
        .into_iter()
        .map(DslValue::into_element)
        .collect();
    DslValue::Production(Box::new(RawProduction { rhs, meta, location: None }))
}

fn act_plain_assignment(_: &Context<'_, '_>, mut nodes: Vec<DslValue>) -> DslValue {
    let reference = nodes.pop().expect("assignment target").into_reference();
    let name = take_first(nodes).into_str();
    DslValue::Element(Box::new(RawRhsElem {
        reference,
        assign: Some((name, AssignOp::Plain)),
    }))
}

fn act_bool_assignment(_: &Context<'_, '_>, mut nodes: Vec<DslValue>) -> DslValue {
    let reference = nodes.pop().expect("assignment target").into_reference();
    let name = take_first(nodes).into_str();
    DslValue::Element(Box::new(RawRhsElem {
        reference,
        assign: Some((name, AssignOp::Bool)),
    }))
}

/// Inline group: its alternatives become an anonymous rule during
/// finalization.
fn act_production_group(_: &Context<'_, '_>, mut nodes: Vec<DslValue>) -> DslValue {
    let productions = nodes
        .remove(1)
        .into_list()
        .into_iter()
        .map(|p| match p {
            DslValue::Production(production) => *production,
            other => panic!("expected production, got {other:?}"),
        })
        .collect();
    DslValue::Reference(Box::new(RawRef {
        target: RefTarget::Group(productions),
        mult: Mult::One,
        greedy: false,
        separator: None,
        location: None,
    }))
}

/// Applies a repeat operator to the referenced symbol or group.
fn act_gsymbol_reference(_: &Context<'_, '_>, mut nodes: Vec<DslValue>) -> DslValue {
    let repeat = nodes.pop().unwrap_or(DslValue::None);
    let mut reference = take_first(nodes).into_reference();
    if let DslValue::Repeat { mult, greedy, separator } = repeat {
        reference.mult = mult;
        reference.greedy = greedy;
        reference.separator = separator;
    }
    DslValue::Reference(Box::new(reference))
}

fn act_terminal_rule(_: &Context<'_, '_>, mut nodes: Vec<DslValue>) -> DslValue {
    let mut terminal = RawTerminal {
        name: String::new(),
        recognizer: RecognizerDef::Missing,
        action_name: None,
        prior: None,
        prefer: false,
        finish: None,
        dynamic: false,
        user_meta: UserMeta::new(),
        location: None,
    };
    // Alternatives: NAME : Recognizer ;  |  NAME : ;
    //             | NAME : Recognizer { metas } ;  |  NAME : { metas } ;
    match nodes.len() {
        4 => {
            terminal.recognizer = match nodes.remove(2) {
                DslValue::RecognizerDef(def) => *def,
                other => panic!("expected recognizer, got {other:?}"),
            };
        }
        7 => {
            fold_term_meta(&mut terminal, nodes.remove(4).into_metas());
            terminal.recognizer = match nodes.remove(2) {
                DslValue::RecognizerDef(def) => *def,
                other => panic!("expected recognizer, got {other:?}"),
            };
        }
        6 => {
            fold_term_meta(&mut terminal, nodes.remove(3).into_metas());
        }
        _ => {}
    }
    terminal.name = take_first(nodes).into_str();
    DslValue::Terminal(Box::new(terminal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_grammar_builds() {
        let grammar = &*DSL_GRAMMAR;
        assert!(grammar.nonterm_by_name("PGFile").is_some());
        assert!(grammar.nonterm_by_name("LAYOUT").is_some());
        assert!(grammar.layout_production.is_some());
    }

    #[test]
    fn simple_grammar_parses() {
        let grammar = Grammar::from_string(
            r#"
            S: A | B;
            A: "a" S;
            B: "b";
            "#,
        )
        .unwrap();
        assert!(grammar.nonterm_by_name("S").is_some());
        assert!(grammar.nonterm_by_name("A").is_some());
        assert!(grammar.term_by_name("a").is_some());
        assert_eq!(grammar.symbol_name(grammar.start_symbol), "S");
    }

    #[test]
    fn terminals_section() {
        let grammar = Grammar::from_string(
            r#"
            S: Number "+" Number;
            terminals
            Number: /\d+/ {15, prefer};
            "#,
        )
        .unwrap();
        let number = grammar.term_by_name("Number").unwrap();
        assert_eq!(number.prior, 15);
        assert!(number.prefer);
        assert!(grammar.term_by_name("+").is_some());
    }

    #[test]
    fn production_meta_data() {
        let grammar = Grammar::from_string(
            r#"
            E: E "+" E {left, 1}
             | E "*" E {left, 2}
             | Number;
            terminals
            Number: /\d+/;
            "#,
        )
        .unwrap();
        let e = grammar.nonterm_by_name("E").unwrap();
        let plus = &grammar.productions[e.productions[0]];
        assert_eq!(plus.assoc, Associativity::Left);
        assert_eq!(plus.prior, 1);
        let times = &grammar.productions[e.productions[1]];
        assert_eq!(times.prior, 2);
        let number = &grammar.productions[e.productions[2]];
        assert_eq!(number.prior, crate::grammar::DEFAULT_PRIORITY);
    }

    #[test]
    fn rule_level_meta_applies_to_all_productions() {
        let grammar = Grammar::from_string(
            r#"
            E {left}: E "+" E | E "-" E | Number;
            terminals
            Number: /\d+/;
            "#,
        )
        .unwrap();
        let e = grammar.nonterm_by_name("E").unwrap();
        for &prod in &e.productions[..2] {
            assert_eq!(grammar.productions[prod].assoc, Associativity::Left);
        }
    }

    #[test]
    fn repetitions_with_separator() {
        let grammar = Grammar::from_string(
            r#"
            S: "2" b+[comma] "3";
            terminals
            b: "1";
            comma: ",";
            "#,
        )
        .unwrap();
        assert!(grammar.nonterm_by_name("b_1_comma").is_some());
    }

    #[test]
    fn greedy_and_plain_repetitions() {
        let grammar = Grammar::from_string(
            r#"
            S: "a"* "b"+ "c"?;
            "#,
        )
        .unwrap();
        assert!(grammar.nonterm_by_name("a_0").is_some());
        assert!(grammar.nonterm_by_name("b_1").is_some());
        assert!(grammar.nonterm_by_name("c_opt").is_some());
    }

    #[test]
    fn user_meta_data() {
        let grammar = Grammar::from_string(
            r#"
            S {label: "start"}: "a";
            "#,
        )
        .unwrap();
        let s = grammar.nonterm_by_name("S").unwrap();
        assert_eq!(
            s.user_meta.get("label"),
            Some(&ConstVal::Str("start".into()))
        );
    }

    #[test]
    fn assignments_parse() {
        let grammar = Grammar::from_string(
            r#"
            S: first=A second?=B;
            A: "a";
            B: "b";
            "#,
        )
        .unwrap();
        let s = grammar.nonterm_by_name("S").unwrap();
        let prod = &grammar.productions[s.productions[0]];
        assert_eq!(prod.assignments.len(), 2);
        assert_eq!(prod.assignments[0].name, "first");
        assert_eq!(prod.assignments[1].op, AssignOp::Bool);
    }

    #[test]
    fn groups_parse() {
        let grammar = Grammar::from_string(
            r#"
            S: "a" ("b" | "c")+ "d";
            "#,
        )
        .unwrap();
        assert!(grammar.nonterm_by_name("S_g1").is_some());
        assert!(grammar.nonterm_by_name("S_g1_1").is_some());
    }

    #[test]
    fn comments_are_layout() {
        let grammar = Grammar::from_string(
            r#"
            // line comment
            S: "a"; /* block /* nested */ comment */
            "#,
        )
        .unwrap();
        assert!(grammar.nonterm_by_name("S").is_some());
    }

    #[test]
    fn import_is_rejected() {
        let err = Grammar::from_string(
            r#"
            import "other.pg";
            S: "a";
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("import is not supported"));
    }

    #[test]
    fn action_annotation() {
        let grammar = Grammar::from_string(
            r#"
            @myaction
            S: "a";
            "#,
        )
        .unwrap();
        let s = grammar.nonterm_by_name("S").unwrap();
        assert_eq!(s.action_name.as_deref(), Some("myaction"));
    }

    #[test]
    fn multiplicity_reference_resolution() {
        // The same `_1` rule is shared by `+` and `*` over the same base.
        let grammar = Grammar::from_string(
            r#"
            S: A+ B;
            B: A*;
            A: "a";
            "#,
        )
        .unwrap();
        let one = grammar.nonterm_by_name("A_1").unwrap();
        assert_eq!(one.productions.len(), 2);
        assert_eq!(
            grammar
                .nonterm_by_name("A_0")
                .map(|n| n.productions.len()),
            Some(2)
        );
    }
}
