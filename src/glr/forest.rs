//! Shared packed parse forest (SPPF).
//!
//! Every distinct `(symbol, start, end)` triple maps to a single
//! [`SppfParent`] grouping one or more possibilities (alternative
//! derivations of that symbol over that span). Nodes are arena-allocated
//! and referenced by integer handles, which keeps cyclic forests
//! representable; traversals carry a visiting set and report a loop
//! instead of hanging.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::{
    error::{Error, Result},
    grammar::Grammar,
    index::{ProdIndex, SymbolIndex},
    lexer::Token,
    tree::TreeNode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParentIdx(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeIdx(pub(crate) usize);

#[derive(Debug)]
pub(crate) enum SppfNode<'i> {
    Term {
        token: Token<'i>,
        layout: &'i str,
    },
    NonTerm {
        prod: ProdIndex,
        start: usize,
        end: usize,
        children: Vec<ParentIdx>,
    },
}

#[derive(Debug)]
pub(crate) struct SppfParent {
    pub symbol: SymbolIndex,
    pub start: usize,
    pub end: usize,
    pub possibilities: Vec<NodeIdx>,
}

/// Arena the GLR driver builds the forest in.
#[derive(Debug, Default)]
pub(crate) struct SppfArena<'i> {
    pub nodes: Vec<SppfNode<'i>>,
    pub parents: Vec<SppfParent>,
    by_span: IndexMap<(SymbolIndex, usize, usize), ParentIdx>,
}

impl<'i> SppfArena<'i> {
    pub fn new() -> Self {
        Self::default()
    }

    fn parent_for(&mut self, symbol: SymbolIndex, start: usize, end: usize) -> ParentIdx {
        if let Some(&idx) = self.by_span.get(&(symbol, start, end)) {
            return idx;
        }
        let idx = ParentIdx(self.parents.len());
        self.parents.push(SppfParent {
            symbol,
            start,
            end,
            possibilities: vec![],
        });
        self.by_span.insert((symbol, start, end), idx);
        idx
    }

    /// Terminal leaf wrapped in its span parent.
    pub fn term_parent(
        &mut self,
        symbol: SymbolIndex,
        token: Token<'i>,
        layout: &'i str,
    ) -> ParentIdx {
        let parent =
            self.parent_for(symbol, token.position, token.end_position());
        if self.parents[parent.0].possibilities.is_empty() {
            let node = NodeIdx(self.nodes.len());
            self.nodes.push(SppfNode::Term { token, layout });
            self.parents[parent.0].possibilities.push(node);
        }
        parent
    }

    /// Adds a derivation of `symbol` over `(start, end)`. A second distinct
    /// derivation for the same span becomes a new possibility, that is, an
    /// ambiguity. Identical derivations are shared, not duplicated.
    pub fn add_possibility(
        &mut self,
        symbol: SymbolIndex,
        start: usize,
        end: usize,
        prod: ProdIndex,
        children: Vec<ParentIdx>,
    ) -> ParentIdx {
        let parent = self.parent_for(symbol, start, end);
        let exists = self.parents[parent.0].possibilities.iter().any(|&n| {
            match &self.nodes[n.0] {
                SppfNode::NonTerm { prod: p, children: c, .. } => {
                    *p == prod && *c == children
                }
                SppfNode::Term { .. } => false,
            }
        });
        if !exists {
            let node = NodeIdx(self.nodes.len());
            self.nodes.push(SppfNode::NonTerm { prod, start, end, children });
            self.parents[parent.0].possibilities.push(node);
        }
        parent
    }
}

/// A possibility of an ambiguous forest node, as shown to disambiguation
/// callbacks.
#[derive(Debug, Clone, Copy)]
pub struct Possibility {
    /// Production of the derivation; `None` for terminal leaves.
    pub production: Option<ProdIndex>,
    pub start: usize,
    pub end: usize,
}

/// The forest returned by the GLR parser: all parse trees with shared
/// subderivations, plus lazy indexed enumeration of individual trees.
pub struct Forest<'i, 'g> {
    pub grammar: &'g Grammar,
    nodes: Vec<SppfNode<'i>>,
    parents: Vec<SppfParent>,
    root: Option<ParentIdx>,
}

impl<'i, 'g> Forest<'i, 'g> {
    pub(crate) fn build(
        grammar: &'g Grammar,
        mut arena: SppfArena<'i>,
        results: Vec<ParentIdx>,
    ) -> Self {
        // Merge the results of all accepted heads into a single root.
        let mut possibilities: Vec<NodeIdx> = vec![];
        for result in &results {
            for &node in &arena.parents[result.0].possibilities {
                if !possibilities.contains(&node) {
                    possibilities.push(node);
                }
            }
        }
        let root = if possibilities.is_empty() {
            None
        } else {
            let symbol = arena.parents[results[0].0].symbol;
            let start = arena.parents[results[0].0].start;
            let end = results
                .iter()
                .map(|r| arena.parents[r.0].end)
                .max()
                .unwrap_or(start);
            let idx = ParentIdx(arena.parents.len());
            arena.parents.push(SppfParent { symbol, start, end, possibilities });
            Some(idx)
        };
        Forest { grammar, nodes: arena.nodes, parents: arena.parents, root }
    }

    /// The number of distinct derivation trees. Fails with a loop error on
    /// cyclic forests.
    pub fn solutions(&self) -> Result<usize> {
        match self.root {
            Some(root) => {
                let mut cache = HashMap::new();
                let mut visiting = HashSet::new();
                self.parent_solutions(root, &mut cache, &mut visiting)
            }
            None => Ok(0),
        }
    }

    /// The number of ambiguous nodes (parents with more than one
    /// possibility) reachable from the root.
    pub fn ambiguities(&self) -> usize {
        let Some(root) = self.root else { return 0 };
        let mut visited = HashSet::new();
        let mut stack = vec![root];
        let mut count = 0;
        while let Some(parent) = stack.pop() {
            if !visited.insert(parent) {
                continue;
            }
            let parent = &self.parents[parent.0];
            if parent.possibilities.len() > 1 {
                count += 1;
            }
            for &node in &parent.possibilities {
                if let SppfNode::NonTerm { children, .. } = &self.nodes[node.0] {
                    stack.extend(children.iter().copied());
                }
            }
        }
        count
    }

    /// Materializes the tree with the given index in `0..solutions()`.
    ///
    /// The index selects a unique derivation by weighted-numbering
    /// decomposition: the possibility whose count range contains the index
    /// is taken, and the remainder is distributed over children by the
    /// product of the subsequent siblings' counts.
    pub fn get_tree(&self, index: usize) -> Result<TreeNode<'i>> {
        let solutions = self.solutions()?;
        if index >= solutions {
            return Err(Error::ParserInit(format!(
                "tree index {index} out of range for forest with {solutions} \
                 solution(s)"
            )));
        }
        let root = self.root.expect("solutions > 0 implies a root");
        let mut cache = HashMap::new();
        let mut visiting = HashSet::new();
        self.build_tree(root, index, &mut cache, &mut visiting)
    }

    /// The first tree. Handy when any derivation will do.
    pub fn get_first_tree(&self) -> Result<TreeNode<'i>> {
        self.get_tree(0)
    }

    /// Iterates all trees in index order. Trees are materialized lazily,
    /// one per step.
    pub fn trees(&self) -> impl Iterator<Item = Result<TreeNode<'i>>> + '_ {
        let solutions = self.solutions().unwrap_or(0);
        (0..solutions).map(|i| self.get_tree(i))
    }

    /// Visits every parent with more than one possibility; the callback
    /// returns the indices of possibilities to keep.
    pub fn disambiguate(
        &mut self,
        f: impl Fn(SymbolIndex, &[Possibility]) -> Vec<usize>,
    ) {
        for parent_idx in 0..self.parents.len() {
            if self.parents[parent_idx].possibilities.len() <= 1 {
                continue;
            }
            let infos: Vec<Possibility> = self.parents[parent_idx]
                .possibilities
                .iter()
                .map(|&n| match &self.nodes[n.0] {
                    SppfNode::Term { token, .. } => Possibility {
                        production: None,
                        start: token.position,
                        end: token.end_position(),
                    },
                    SppfNode::NonTerm { prod, start, end, .. } => Possibility {
                        production: Some(*prod),
                        start: *start,
                        end: *end,
                    },
                })
                .collect();
            let keep = f(self.parents[parent_idx].symbol, &infos);
            if keep.is_empty() {
                continue;
            }
            let retained: Vec<NodeIdx> = keep
                .into_iter()
                .filter_map(|i| {
                    self.parents[parent_idx].possibilities.get(i).copied()
                })
                .collect();
            self.parents[parent_idx].possibilities = retained;
        }
    }

    fn parent_solutions(
        &self,
        parent: ParentIdx,
        cache: &mut HashMap<ParentIdx, usize>,
        visiting: &mut HashSet<ParentIdx>,
    ) -> Result<usize> {
        if let Some(&count) = cache.get(&parent) {
            return Ok(count);
        }
        if !visiting.insert(parent) {
            return Err(Error::Loop(format!(
                "cycle detected in the parse forest at symbol \"{}\"",
                self.grammar.symbol_name(self.parents[parent.0].symbol)
            )));
        }
        let mut total = 0usize;
        for &node in &self.parents[parent.0].possibilities {
            total += self.node_solutions(node, cache, visiting)?;
        }
        visiting.remove(&parent);
        cache.insert(parent, total);
        Ok(total)
    }

    fn node_solutions(
        &self,
        node: NodeIdx,
        cache: &mut HashMap<ParentIdx, usize>,
        visiting: &mut HashSet<ParentIdx>,
    ) -> Result<usize> {
        match &self.nodes[node.0] {
            SppfNode::Term { .. } => Ok(1),
            SppfNode::NonTerm { children, .. } => {
                let mut product = 1usize;
                for &child in children {
                    product = product
                        .saturating_mul(self.parent_solutions(
                            child, cache, visiting,
                        )?);
                }
                Ok(product)
            }
        }
    }

    fn build_tree(
        &self,
        parent: ParentIdx,
        mut counter: usize,
        cache: &mut HashMap<ParentIdx, usize>,
        visiting: &mut HashSet<ParentIdx>,
    ) -> Result<TreeNode<'i>> {
        // Find the possibility bucket the counter falls into.
        let possibilities = &self.parents[parent.0].possibilities;
        let mut chosen = possibilities[0];
        for &node in possibilities {
            let count = self.node_solutions(node, cache, visiting)?;
            if counter < count {
                chosen = node;
                break;
            }
            counter -= count;
        }

        match &self.nodes[chosen.0] {
            SppfNode::Term { token, layout } => Ok(TreeNode::Term {
                token: token.clone(),
                layout,
            }),
            SppfNode::NonTerm { prod, start, end, children } => {
                let weights: Vec<usize> = children
                    .iter()
                    .map(|&c| self.parent_solutions(c, cache, visiting))
                    .collect::<Result<_>>()?;
                let mut built = Vec::with_capacity(children.len());
                for (idx, &child) in children.iter().enumerate() {
                    let factor: usize =
                        weights[idx + 1..].iter().product();
                    let child_counter = counter / factor;
                    counter %= factor;
                    built.push(self.build_tree(
                        child,
                        child_counter,
                        cache,
                        visiting,
                    )?);
                }
                let layout = built.first().map(|c| c.layout()).unwrap_or("");
                Ok(TreeNode::NonTerm {
                    prod: *prod,
                    start: *start,
                    end: *end,
                    layout,
                    children: built,
                })
            }
        }
    }
}
