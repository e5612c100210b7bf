//! Layout handling: the whitespace set and user-defined LAYOUT grammars.

use lariat::{Grammar, Parser, ParserSettings};

#[test]
fn default_whitespace_skipping() {
    let grammar = Grammar::from_string(r#"S: "a" "b";"#).unwrap();
    let parser = Parser::new(&grammar).unwrap();
    assert!(parser.parse("a b").is_ok());
    assert!(parser.parse("a\n\t b").is_ok());
    assert!(parser.parse("ab").is_ok());
}

#[test]
fn whitespace_skipping_disabled() {
    let grammar = Grammar::from_string(r#"S: "a" "b";"#).unwrap();
    let settings = ParserSettings { ws: None, ..Default::default() };
    let parser = Parser::with_settings(&grammar, settings).unwrap();
    assert!(parser.parse("ab").is_ok());
    assert!(parser.parse("a b").is_err());
}

#[test]
fn layout_rule_skips_comments() {
    let grammar = Grammar::from_string(
        r#"
        S: "a"+;
        LAYOUT: LayoutItem | LAYOUT LayoutItem;
        LayoutItem: WS | Comment;
        Comment: CommentLine;
        terminals
        WS: /\s+/;
        CommentLine: /\/\/.*/;
        "#,
    )
    .unwrap();
    let parser = Parser::new(&grammar).unwrap();

    let input = "a a // comment to the end of line\na";
    let tree = parser.parse(input).unwrap();
    assert_eq!(tree.terminals().len(), 3);
}

#[test]
fn layout_content_is_captured() {
    let grammar = Grammar::from_string(
        r#"
        S: "a" "b";
        LAYOUT: LayoutItem | LAYOUT LayoutItem;
        LayoutItem: WS | Comment;
        Comment: CommentLine;
        terminals
        WS: /\s+/;
        CommentLine: /\/\/.*/;
        "#,
    )
    .unwrap();
    let parser = Parser::new(&grammar).unwrap();

    let input = "a // note\nb";
    let tree = parser.parse(input).unwrap();
    let children = tree.children();
    // The layout preceding `b` carries the comment.
    assert!(children[1].layout().contains("// note"));
}

#[test]
fn grammar_dsl_supports_nested_comments() {
    let grammar = Grammar::from_string(
        r#"
        /* outer /* inner */ still a comment */
        S: "a"; // trailing
        "#,
    )
    .unwrap();
    let parser = Parser::new(&grammar).unwrap();
    assert!(parser.parse("a").is_ok());
}
