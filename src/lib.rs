//! lariat is a scannerless LR/LALR/GLR parsing toolkit.
//!
//! Grammars are written in a BNF-like DSL (or assembled through
//! [`grammar::builder::GrammarBuilder`]) and compiled to LR tables at run
//! time. The deterministic [`parser::Parser`] drives LALR(1)/SLR tables
//! with declarative conflict resolution; the [`glr::GlrParser`] handles
//! any context-free grammar, packing every derivation into a shared
//! forest. There is no separate lexer: terminals are recognized on demand
//! using only the tokens the current state expects.
//!
//! ```
//! use lariat::{Grammar, Parser};
//!
//! let grammar = Grammar::from_string(
//!     r#"
//!     E: E "+" E {left, 1}
//!      | E "*" E {left, 2}
//!      | "(" E ")"
//!      | Number;
//!     terminals
//!     Number: /\d+(\.\d+)?/;
//!     "#,
//! ).unwrap();
//! let parser = Parser::new(&grammar).unwrap();
//! let tree = parser.parse("1 + 2 * 3").unwrap();
//! assert_eq!(tree.terminals().len(), 5);
//! ```

pub mod actions;
pub mod debug;
pub mod error;
pub mod glr;
pub mod grammar;
pub mod index;
pub mod lexer;
pub mod location;
pub mod parser;
pub mod persist;
pub mod recognizer;
pub mod table;
pub mod tree;

pub use actions::{
    call_actions, call_actions_with_extra, ActionRegistry, Context,
    DefaultValue, ResolvedActions, SemanticValue,
};
pub use error::{Error, ErrorRecord, Result};
pub use glr::{Forest, GlrParser};
pub use grammar::{builder::GrammarBuilder, Grammar, GrammarOptions};
pub use lexer::Token;
pub use parser::{Parser, ParserSettings, Recovery};
pub use recognizer::Recognizer;
pub use table::{LRTable, TableSettings, TableType};
pub use tree::TreeNode;
