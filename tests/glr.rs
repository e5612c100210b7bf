//! GLR parsing: ambiguity counting, forest enumeration, lexical
//! ambiguity forking, nondeterministic grammars and cyclic grammars.

use lariat::{Error, GlrParser, Grammar, Parser};

fn ambiguous_expressions() -> Grammar {
    Grammar::from_string(
        r#"
        E: E "+" E | E "*" E | "(" E ")" | Number;
        terminals
        Number: /\d+/;
        "#,
    )
    .unwrap()
}

#[test]
fn solutions_follow_catalan_numbers() {
    let grammar = ambiguous_expressions();
    let parser = GlrParser::new(&grammar).unwrap();

    let forest = parser.parse("2 + 3 * 5").unwrap();
    assert_eq!(forest.solutions().unwrap(), 2);

    let forest = parser.parse("2 + 3 * 5 + 4").unwrap();
    assert_eq!(forest.solutions().unwrap(), 5);

    let forest = parser.parse("2 + 3 * 5 + 4 * 1").unwrap();
    assert_eq!(forest.solutions().unwrap(), 14);

    let forest = parser.parse("2 + 3 * 5 + 4 * 1 * 7").unwrap();
    assert_eq!(forest.solutions().unwrap(), 42);
}

#[test]
fn ambiguities_count_ambiguous_nodes() {
    let grammar = ambiguous_expressions();
    let parser = GlrParser::new(&grammar).unwrap();

    assert_eq!(parser.parse("2 + 3 * 5").unwrap().ambiguities(), 1);
    assert_eq!(parser.parse("2 + 3 * 5 + 4").unwrap().ambiguities(), 3);
    assert_eq!(parser.parse("2 + 3 * 5 + 4 * 1").unwrap().ambiguities(), 6);
}

#[test]
fn unambiguous_input_has_single_solution() {
    let grammar = ambiguous_expressions();
    let parser = GlrParser::new(&grammar).unwrap();
    let forest = parser.parse("(2 + 3) * 5").unwrap();
    assert_eq!(forest.solutions().unwrap(), 1);
    assert_eq!(forest.ambiguities(), 0);
}

#[test]
fn every_tree_is_distinct_and_covers_the_input() {
    let grammar = ambiguous_expressions();
    let parser = GlrParser::new(&grammar).unwrap();
    let input = "2 + 3 * 5 + 4 * 1";
    let forest = parser.parse(input).unwrap();

    let expected_leaves: String =
        input.chars().filter(|c| !c.is_whitespace()).collect();
    let mut rendered = std::collections::HashSet::new();
    for tree in forest.trees() {
        let tree = tree.unwrap();
        let leaves: String = tree
            .terminals()
            .iter()
            .map(|t| t.value)
            .collect::<Vec<_>>()
            .concat();
        assert_eq!(leaves, expected_leaves);
        assert!(rendered.insert(tree.to_str(&grammar)));
    }
    assert_eq!(rendered.len(), 14);
}

#[test]
fn tree_index_out_of_range_is_an_error() {
    let grammar = ambiguous_expressions();
    let parser = GlrParser::new(&grammar).unwrap();
    let forest = parser.parse("2 + 3 * 5").unwrap();
    assert!(forest.get_tree(1).is_ok());
    assert!(forest.get_tree(2).is_err());
}

#[test]
fn palindrome_parses_once_under_glr() {
    let grammar = Grammar::from_string(
        r#"
        S: A | B | EMPTY;
        A: "1" S "1";
        B: "0" S "0";
        "#,
    )
    .unwrap();
    let parser = GlrParser::new(&grammar).unwrap();
    let forest = parser.parse("0101000110001010").unwrap();
    assert_eq!(forest.solutions().unwrap(), 1);

    // The deterministic driver cannot handle this grammar: the
    // prefer-shifts policies starve the inner empty reduction.
    let lr = Parser::new(&grammar).unwrap();
    assert!(lr.parse("0101000110001010").is_err());
}

#[test]
fn non_palindrome_is_rejected() {
    let grammar = Grammar::from_string(
        r#"
        S: A | B | EMPTY;
        A: "1" S "1";
        B: "0" S "0";
        "#,
    )
    .unwrap();
    let parser = GlrParser::new(&grammar).unwrap();
    assert!(parser.parse("0101").is_err());
}

#[test]
fn cyclic_grammar_parses_but_traversal_loops() {
    let grammar = Grammar::from_string(
        r#"
        S: S;
        S: "x";
        "#,
    )
    .unwrap();
    let parser = GlrParser::new(&grammar).unwrap();
    let forest = parser.parse("x").unwrap();
    assert!(matches!(forest.solutions(), Err(Error::Loop(_))));
}

#[test]
fn lexical_ambiguity_forks_heads() {
    let grammar = Grammar::from_string(
        r#"
        S: A | B;
        A: Ta;
        B: Tb;
        terminals
        Ta: /\d+/;
        Tb: /\d\d/;
        "#,
    )
    .unwrap();

    // LR fails: all tie-breakers leave two candidate tokens.
    let lr = Parser::new(&grammar).unwrap();
    assert!(matches!(
        lr.parse("42"),
        Err(Error::Disambiguation { .. })
    ));

    // GLR forks a head per token and parses both ways.
    let parser = GlrParser::new(&grammar).unwrap();
    let forest = parser.parse("42").unwrap();
    assert_eq!(forest.solutions().unwrap(), 2);
}

#[test]
fn greedy_repetition_absorbs_maximum() {
    let greedy = Grammar::from_string(
        r#"
        S: A+! A+;
        A: "a";
        "#,
    )
    .unwrap();
    let parser = GlrParser::new(&greedy).unwrap();
    let forest = parser.parse("a a a a").unwrap();
    // The greedy first repetition takes three; one is left for the second.
    assert_eq!(forest.solutions().unwrap(), 1);

    let plain = Grammar::from_string(
        r#"
        S: A+ A+;
        A: "a";
        "#,
    )
    .unwrap();
    let parser = GlrParser::new(&plain).unwrap();
    let forest = parser.parse("a a a a").unwrap();
    assert_eq!(forest.solutions().unwrap(), 3);
}

#[test]
fn forest_disambiguation_prunes_possibilities() {
    let grammar = ambiguous_expressions();
    let parser = GlrParser::new(&grammar).unwrap();
    let mut forest = parser.parse("2 + 3 * 5").unwrap();
    assert_eq!(forest.solutions().unwrap(), 2);

    // Keep only the first possibility of every ambiguous node.
    forest.disambiguate(|_, _| vec![0]);
    assert_eq!(forest.solutions().unwrap(), 1);
    assert_eq!(forest.ambiguities(), 0);
}

#[test]
fn glr_agrees_with_lr_on_deterministic_grammars() {
    let grammar = Grammar::from_string(
        r#"
        E: E "+" T | T;
        T: T "*" F | F;
        F: "(" E ")" | Number;
        terminals
        Number: /\d+/;
        "#,
    )
    .unwrap();
    let input = "1 + 2 * 3";

    let lr_tree = Parser::new(&grammar).unwrap().parse(input).unwrap();
    let forest = GlrParser::new(&grammar).unwrap().parse(input).unwrap();
    assert_eq!(forest.solutions().unwrap(), 1);
    assert_eq!(forest.get_first_tree().unwrap(), lr_tree);
}
