//! Parse table persistence: round-tripping a table yields an
//! operationally identical parser.

use lariat::{
    persist::{load_table, save_table, table_from_json, table_to_json},
    Grammar, Parser, ParserSettings, TableSettings,
};

const GRAMMAR: &str = r#"
E: E "+" T | T;
T: T "*" F | F;
F: "(" E ")" | Number;
terminals
Number: /\d+/;
"#;

#[test]
fn json_round_trip_is_operationally_identical() {
    let grammar = Grammar::from_string(GRAMMAR).unwrap();
    let table = lariat::LRTable::new(&grammar, &TableSettings::default()).unwrap();
    let json = table_to_json(&table, &grammar).unwrap();
    let loaded = table_from_json(&json, &grammar).unwrap();

    let original =
        Parser::with_table(&grammar, table, ParserSettings::default()).unwrap();
    let restored =
        Parser::with_table(&grammar, loaded, ParserSettings::default()).unwrap();

    for input in ["1", "1 + 2 * 3", "(1 + 2) * 3", "1 * (2 + 3) * 4"] {
        assert_eq!(
            original.parse(input).unwrap(),
            restored.parse(input).unwrap()
        );
    }
    assert!(restored.parse("1 +").is_err());
}

#[test]
fn file_round_trip() {
    let grammar = Grammar::from_string(GRAMMAR).unwrap();
    let table = lariat::LRTable::new(&grammar, &TableSettings::default()).unwrap();

    let path = std::env::temp_dir().join("lariat_table_round_trip.json");
    save_table(&path, &table, &grammar).unwrap();
    let loaded = load_table(&path, &grammar).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(table.states.len(), loaded.states.len());
    let parser =
        Parser::with_table(&grammar, loaded, ParserSettings::default()).unwrap();
    assert!(parser.parse("1 + 2").is_ok());
}

#[test]
fn loading_against_a_different_grammar_fails() {
    let grammar = Grammar::from_string(GRAMMAR).unwrap();
    let table = lariat::LRTable::new(&grammar, &TableSettings::default()).unwrap();
    let json = table_to_json(&table, &grammar).unwrap();

    let other = Grammar::from_string(r#"S: "a";"#).unwrap();
    assert!(table_from_json(&json, &other).is_err());
}
