//! Parse table serialization.
//!
//! Tables are saved as a language-agnostic sequence of state records: per
//! state the accessing symbol FQN, the finish-flags vector, the actions as
//! `(terminal FQN, [{kind, state_id?, prod_id?}])` and the GOTOs as
//! `(non-terminal FQN, state_id)`. Action kinds: 1 = Shift, 2 = Reduce,
//! 3 = Accept. Loading validates every name against the grammar; a table
//! loaded against the same grammar drives an operationally identical
//! parser.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    grammar::Grammar,
    index::{ProdIndex, StateIndex},
    table::{Action, LRState, LRTable},
};

const KIND_SHIFT: u8 = 1;
const KIND_REDUCE: u8 = 2;
const KIND_ACCEPT: u8 = 3;

#[derive(Serialize, Deserialize)]
struct StateRecord {
    state_id: usize,
    symbol: String,
    finish_flags: Vec<bool>,
    actions: Vec<(String, Vec<ActionRecord>)>,
    gotos: Vec<(String, usize)>,
}

#[derive(Serialize, Deserialize)]
struct ActionRecord {
    action: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_id: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prod_id: Option<usize>,
}

/// Serializes a table to its on-disk JSON form.
pub fn table_to_json(table: &LRTable, grammar: &Grammar) -> Result<String> {
    let records: Vec<StateRecord> = table
        .states
        .iter()
        .map(|state| StateRecord {
            state_id: state.idx.0,
            symbol: grammar.symbol_name(state.symbol).to_owned(),
            finish_flags: state.finish_flags.clone(),
            actions: state
                .actions
                .iter()
                .map(|(&term, actions)| {
                    (
                        grammar.terminals[term].name.clone(),
                        actions.iter().map(dump_action).collect(),
                    )
                })
                .collect(),
            gotos: state
                .gotos
                .iter()
                .map(|(&nonterm, &target)| {
                    (grammar.nonterminals[nonterm].name.clone(), target.0)
                })
                .collect(),
        })
        .collect();
    Ok(serde_json::to_string(&records)?)
}

/// Restores a table from its on-disk form, resolving symbol names against
/// the given grammar.
pub fn table_from_json(json: &str, grammar: &Grammar) -> Result<LRTable> {
    let records: Vec<StateRecord> = serde_json::from_str(json)?;
    let mut states = crate::index::StateVec::new();

    for record in records {
        let symbol = grammar.symbol_index(&record.symbol).ok_or_else(|| {
            Error::grammar(format!(
                "persisted table references unknown symbol \"{}\"",
                record.symbol
            ))
        })?;

        let mut actions = IndexMap::new();
        for (term_name, action_records) in record.actions {
            let term_symbol =
                grammar.symbol_index(&term_name).ok_or_else(|| {
                    Error::grammar(format!(
                        "persisted table references unknown terminal \
                         \"{term_name}\""
                    ))
                })?;
            if !grammar.is_term(term_symbol) {
                return Err(Error::grammar(format!(
                    "persisted table action on non-terminal \"{term_name}\""
                )));
            }
            let acts = action_records
                .iter()
                .map(load_action)
                .collect::<Result<Vec<Action>>>()?;
            actions.insert(grammar.symbol_to_term(term_symbol), acts);
        }

        let mut gotos = IndexMap::new();
        for (nonterm_name, target) in record.gotos {
            let nonterm_symbol =
                grammar.symbol_index(&nonterm_name).ok_or_else(|| {
                    Error::grammar(format!(
                        "persisted table references unknown non-terminal \
                         \"{nonterm_name}\""
                    ))
                })?;
            if !grammar.is_nonterm(nonterm_symbol) {
                return Err(Error::grammar(format!(
                    "persisted table GOTO on terminal \"{nonterm_name}\""
                )));
            }
            gotos.insert(
                grammar.symbol_to_nonterm(nonterm_symbol),
                StateIndex(target),
            );
        }

        states.push(LRState::from_persisted(
            StateIndex(record.state_id),
            symbol,
            actions,
            gotos,
            record.finish_flags,
        ));
    }

    Ok(LRTable { states, sr_conflicts: vec![], rr_conflicts: vec![] })
}

pub fn save_table(path: impl AsRef<Path>, table: &LRTable, grammar: &Grammar) -> Result<()> {
    let json = table_to_json(table, grammar)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn load_table(path: impl AsRef<Path>, grammar: &Grammar) -> Result<LRTable> {
    let json = std::fs::read_to_string(path)?;
    table_from_json(&json, grammar)
}

fn dump_action(action: &Action) -> ActionRecord {
    match action {
        Action::Shift(state) => ActionRecord {
            action: KIND_SHIFT,
            state_id: Some(state.0),
            prod_id: None,
        },
        Action::Reduce(prod) => ActionRecord {
            action: KIND_REDUCE,
            state_id: None,
            prod_id: Some(prod.0),
        },
        Action::Accept => {
            ActionRecord { action: KIND_ACCEPT, state_id: None, prod_id: None }
        }
    }
}

fn load_action(record: &ActionRecord) -> Result<Action> {
    match record.action {
        KIND_SHIFT => {
            let state = record.state_id.ok_or_else(|| {
                Error::grammar("persisted Shift action without a state id")
            })?;
            Ok(Action::Shift(StateIndex(state)))
        }
        KIND_REDUCE => {
            let prod = record.prod_id.ok_or_else(|| {
                Error::grammar("persisted Reduce action without a production id")
            })?;
            Ok(Action::Reduce(ProdIndex(prod)))
        }
        KIND_ACCEPT => Ok(Action::Accept),
        other => Err(Error::grammar(format!(
            "unknown persisted action kind {other}"
        ))),
    }
}
