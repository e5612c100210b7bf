//! Error recovery: default skip-ahead recovery, custom recovery
//! callables and error records.

use std::rc::Rc;

use lariat::{
    actions::prod_action, call_actions, ActionRegistry, Grammar, Parser,
    ParserSettings, Recovery, SemanticValue,
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

const EXPR_GRAMMAR: &str = r#"
E: E "+" E {left, 1}
 | E "*" E {left, 2}
 | "(" E ")"
 | number;
terminals
number: /\d+(\.\d+)?/;
"#;

fn expr_actions<'i>() -> ActionRegistry<'i, Val> {
    ActionRegistry::new().alternatives(
        "E",
        vec![
            prod_action(|_, nodes: Vec<Val>| {
                Val::Num(nodes[0].num() + nodes[2].num())
            }),
            prod_action(|_, nodes: Vec<Val>| {
                Val::Num(nodes[0].num() * nodes[2].num())
            }),
            prod_action(|_, mut nodes: Vec<Val>| nodes.remove(1)),
            prod_action(|_, mut nodes: Vec<Val>| nodes.remove(0)),
        ],
    )
}

#[test]
fn default_recovery_skips_garbage_and_finishes_early() {
    let grammar = Grammar::from_string(EXPR_GRAMMAR).unwrap();
    let settings = ParserSettings {
        recovery: Recovery::Default,
        consume_input: false,
        ..Default::default()
    };
    let parser = Parser::with_settings(&grammar, settings).unwrap();

    let input = "1 + 2 + * 3 & 89 - 5";
    let (tree, errors) = parser.parse_with_errors(input).unwrap();

    // Exactly one error, at the stray `*`.
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].location.start, 8);
    assert!(errors[0].location.end > 8);

    // The effective parse is `1 + 2 + 3`.
    let resolved = expr_actions().resolve(&grammar).unwrap();
    let result = call_actions(&tree, &grammar, &resolved, input);
    assert_eq!(result.num(), 6.0);
}

#[test]
fn without_recovery_the_first_error_fails() {
    let grammar = Grammar::from_string(EXPR_GRAMMAR).unwrap();
    let parser = Parser::new(&grammar).unwrap();
    assert!(parser.parse("1 + 2 + * 3").is_err());
}

#[test]
fn error_record_carries_expected_symbols() {
    let grammar = Grammar::from_string(EXPR_GRAMMAR).unwrap();
    let settings = ParserSettings {
        recovery: Recovery::Default,
        consume_input: false,
        ..Default::default()
    };
    let parser = Parser::with_settings(&grammar, settings).unwrap();
    let (_, errors) = parser.parse_with_errors("1 + * 2").unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].expected.iter().any(|s| s == "number"));
    assert!(errors[0].message.contains("expected:"));
}

#[test]
fn custom_recovery_can_skip_input() {
    let grammar = Grammar::from_string(EXPR_GRAMMAR).unwrap();
    let settings = ParserSettings {
        // Skip over the offending character and let the parser resume.
        recovery: Recovery::Custom(Rc::new(|ctx| {
            let rest = &ctx.input[ctx.position..];
            match rest.char_indices().nth(1) {
                Some((offset, _)) => {
                    ctx.position += offset;
                    true
                }
                None => false,
            }
        })),
        consume_input: false,
        ..Default::default()
    };
    let parser = Parser::with_settings(&grammar, settings).unwrap();

    let input = "1 + 2 + * 3";
    let (tree, errors) = parser.parse_with_errors(input).unwrap();
    assert_eq!(errors.len(), 1);

    let resolved = expr_actions().resolve(&grammar).unwrap();
    let result = call_actions(&tree, &grammar, &resolved, input);
    assert_eq!(result.num(), 6.0);
}

#[test]
fn unrecoverable_input_reports_the_last_error() {
    let grammar = Grammar::from_string(EXPR_GRAMMAR).unwrap();
    let settings = ParserSettings {
        recovery: Recovery::Default,
        // The whole input must be consumed, so trailing garbage is fatal
        // even with recovery on.
        consume_input: true,
        ..Default::default()
    };
    let parser = Parser::with_settings(&grammar, settings).unwrap();
    assert!(parser.parse_with_errors("1 + &&&").is_err());
}
