//! KEYWORD handling: string terminals matching the KEYWORD pattern become
//! word-bounded matches.

use lariat::{Grammar, GrammarOptions, Parser};

const GRAMMAR: &str = r#"
S: "for" Name "in" Name;
terminals
Name: /[a-zA-Z_][a-zA-Z_0-9]*/;
KEYWORD: /\w+/;
"#;

#[test]
fn keyword_matches_at_word_boundary() {
    let grammar = Grammar::from_string(GRAMMAR).unwrap();
    let parser = Parser::new(&grammar).unwrap();
    assert!(parser.parse("for x in xs").is_ok());
}

#[test]
fn keyword_does_not_match_inside_identifier() {
    let grammar = Grammar::from_string(GRAMMAR).unwrap();
    let parser = Parser::new(&grammar).unwrap();
    // `forward` must not lex as `for` + `ward`.
    assert!(parser.parse("forward x in xs").is_err());
}

#[test]
fn only_matching_literals_become_keywords() {
    let grammar = Grammar::from_string(
        r#"
        S: "for" "(" Name ")";
        terminals
        Name: /\w+/;
        KEYWORD: /\w+/;
        "#,
    )
    .unwrap();
    assert!(grammar.term_by_name("for").unwrap().keyword);
    // Punctuation does not match the KEYWORD pattern and stays a plain
    // string terminal.
    assert!(!grammar.term_by_name("(").unwrap().keyword);

    let parser = Parser::new(&grammar).unwrap();
    assert!(parser.parse("for ( x )").is_ok());
}

#[test]
fn keyword_must_be_regex() {
    let err = Grammar::from_string(
        r#"
        S: "a";
        terminals
        KEYWORD: "kw";
        "#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("KEYWORD"));
}

#[test]
fn ignore_case_preserved_by_keyword_fixup() {
    let grammar = Grammar::from_string_with(
        GRAMMAR,
        GrammarOptions { ignore_case: true, ..Default::default() },
    )
    .unwrap();
    let parser = Parser::new(&grammar).unwrap();
    assert!(parser.parse("FOR x IN xs").is_ok());
}
