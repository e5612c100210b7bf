//! Parse trees.
//!
//! Both drivers can produce [`TreeNode`] trees: the LR driver builds them
//! directly, the GLR driver materializes them from the forest. Semantic
//! evaluation walks a tree bottom-up, left to right, firing actions in the
//! same order LR reductions would (see [`crate::actions::call_actions`]).

use crate::{
    grammar::Grammar,
    index::{ProdIndex, SymbolIndex},
    lexer::Token,
};

#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode<'i> {
    Term {
        token: Token<'i>,
        /// Layout content preceding the token.
        layout: &'i str,
    },
    NonTerm {
        prod: ProdIndex,
        start: usize,
        end: usize,
        /// Layout content preceding the node.
        layout: &'i str,
        children: Vec<TreeNode<'i>>,
    },
}

impl<'i> TreeNode<'i> {
    pub fn is_term(&self) -> bool {
        matches!(self, TreeNode::Term { .. })
    }

    pub fn is_nonterm(&self) -> bool {
        matches!(self, TreeNode::NonTerm { .. })
    }

    pub fn start_position(&self) -> usize {
        match self {
            TreeNode::Term { token, .. } => token.position,
            TreeNode::NonTerm { start, .. } => *start,
        }
    }

    pub fn end_position(&self) -> usize {
        match self {
            TreeNode::Term { token, .. } => token.end_position(),
            TreeNode::NonTerm { end, .. } => *end,
        }
    }

    pub fn layout(&self) -> &'i str {
        match self {
            TreeNode::Term { layout, .. } | TreeNode::NonTerm { layout, .. } => layout,
        }
    }

    pub fn children(&self) -> &[TreeNode<'i>] {
        match self {
            TreeNode::Term { .. } => &[],
            TreeNode::NonTerm { children, .. } => children,
        }
    }

    pub fn symbol(&self, grammar: &Grammar) -> SymbolIndex {
        match self {
            TreeNode::Term { token, .. } => token.symbol.to_symbol_index(),
            TreeNode::NonTerm { prod, .. } => grammar.lhs_symbol(*prod),
        }
    }

    /// Terminal tokens of the tree, left to right.
    pub fn terminals(&self) -> Vec<&Token<'i>> {
        let mut out = vec![];
        self.collect_terminals(&mut out);
        out
    }

    fn collect_terminals<'a>(&'a self, out: &mut Vec<&'a Token<'i>>) {
        match self {
            TreeNode::Term { token, .. } => out.push(token),
            TreeNode::NonTerm { children, .. } => {
                for child in children {
                    child.collect_terminals(out);
                }
            }
        }
    }

    /// Indented textual rendering of the tree.
    pub fn to_str(&self, grammar: &Grammar) -> String {
        let mut out = String::new();
        self.write_str(grammar, 0, &mut out);
        out
    }

    fn write_str(&self, grammar: &Grammar, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        match self {
            TreeNode::Term { token, .. } => {
                out.push_str(&format!(
                    "{indent}{}[{}->{}, \"{}\"]\n",
                    grammar.terminals[token.symbol].name,
                    token.position,
                    token.end_position(),
                    token.value,
                ));
            }
            TreeNode::NonTerm { prod, start, end, children, .. } => {
                let symbol = grammar.lhs_symbol(*prod);
                out.push_str(&format!(
                    "{indent}{}[{start}->{end}]\n",
                    grammar.symbol_name(symbol)
                ));
                for child in children {
                    child.write_str(grammar, depth + 1, out);
                }
            }
        }
    }
}
