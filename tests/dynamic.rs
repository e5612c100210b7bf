//! Dynamic disambiguation: conflicts marked `dynamic` are deferred to a
//! parse-time filter.

use std::rc::Rc;

use lariat::{
    actions::prod_action, call_actions, table::Action, ActionRegistry, Error,
    Grammar, Parser, ParserSettings, SemanticValue,
};

#[derive(Debug, Clone)]
enum Val {
    Num(f64),
    Text(String),
    List(Vec<Val>),
    Bool(bool),
    Missing,
}

impl Val {
    fn num(&self) -> f64 {
        match self {
            Val::Num(n) => *n,
            other => panic!("expected number, got {other:?}"),
        }
    }
}

impl<'i> SemanticValue<'i> for Val {
    fn from_match(value: &'i str) -> Self {
        match value.parse() {
            Ok(num) => Val::Num(num),
            Err(_) => Val::Text(value.to_owned()),
        }
    }

    fn from_list(items: Vec<Self>) -> Self {
        Val::List(items)
    }

    fn none() -> Self {
        Val::Missing
    }

    fn from_presence(present: bool) -> Self {
        Val::Bool(present)
    }

    fn append(list: Self, item: Self) -> Self {
        match list {
            Val::List(mut items) => {
                items.push(item);
                Val::List(items)
            }
            other => Val::List(vec![other, item]),
        }
    }

    fn is_none(&self) -> bool {
        matches!(self, Val::Missing)
    }
}

const GRAMMAR: &str = r#"
E: E op_sum E {dynamic}
 | E op_mul E {dynamic}
 | number;
terminals
number: /\d+/;
op_sum: "+" {dynamic};
op_mul: "*" {dynamic};
"#;

/// Shift `*`, reduce on `+`: multiplication binds tighter.
fn precedence_settings() -> ParserSettings {
    ParserSettings {
        prefer_shifts: Some(false),
        prefer_shifts_over_empty: Some(false),
        dynamic_filter: Some(Rc::new(|ctx| match ctx.action {
            Action::Shift(_) => ctx.token.value == "*",
            Action::Reduce(_) => ctx.token.value == "+",
            Action::Accept => true,
        })),
        ..Default::default()
    }
}

fn actions<'i>() -> ActionRegistry<'i, Val> {
    ActionRegistry::new().alternatives(
        "E",
        vec![
            prod_action(|_, nodes: Vec<Val>| {
                Val::Num(nodes[0].num() + nodes[2].num())
            }),
            prod_action(|_, nodes: Vec<Val>| {
                Val::Num(nodes[0].num() * nodes[2].num())
            }),
            prod_action(|_, mut nodes: Vec<Val>| nodes.remove(0)),
        ],
    )
}

#[test]
fn conflicts_without_filter_are_fatal() {
    let grammar = Grammar::from_string(GRAMMAR).unwrap();
    let settings = ParserSettings {
        prefer_shifts: Some(false),
        prefer_shifts_over_empty: Some(false),
        ..Default::default()
    };
    let err = Parser::with_settings(&grammar, settings).unwrap_err();
    assert!(matches!(err, Error::Conflicts { .. }));
}

#[test]
fn dynamic_conflicts_are_deferred_to_the_filter() {
    let grammar = Grammar::from_string(GRAMMAR).unwrap();
    let parser = Parser::with_settings(&grammar, precedence_settings()).unwrap();

    let resolved = actions().resolve(&grammar).unwrap();

    let input = "1 + 2 * 3";
    let tree = parser.parse(input).unwrap();
    assert_eq!(call_actions(&tree, &grammar, &resolved, input).num(), 7.0);

    let input = "1 * 2 + 3";
    let tree = parser.parse(input).unwrap();
    assert_eq!(call_actions(&tree, &grammar, &resolved, input).num(), 5.0);
}

#[test]
fn filter_rejecting_everything_is_an_error() {
    let grammar = Grammar::from_string(GRAMMAR).unwrap();
    let settings = ParserSettings {
        dynamic_filter: Some(Rc::new(|ctx| {
            // Reject every dynamic action once operators appear.
            !matches!(ctx.action, Action::Shift(_) | Action::Reduce(_))
        })),
        prefer_shifts: Some(false),
        prefer_shifts_over_empty: Some(false),
        ..Default::default()
    };
    let parser = Parser::with_settings(&grammar, settings).unwrap();
    let err = parser.parse("1 + 2 + 3").unwrap_err();
    assert!(matches!(err, Error::DynamicDisambiguation(_)));
}
