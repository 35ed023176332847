//! Per-function control flow graph and dominator tree.
use super::{BlockId, FuncId, Program};

use petgraph::{
    algo::dominators::simple_fast,
    graph::{DiGraph, NodeIndex},
};
use rustc_hash::FxHashMap;

/// Adjacency of one function, built once on first query.
///
/// Only the shape of the graph is kept here. Anything depending on coverage
/// is computed by walking it again.
#[derive(Debug)]
pub(crate) struct FunctionCfg {
    graph: DiGraph<BlockId, ()>,
    nodes: FxHashMap<BlockId, NodeIndex>,
    idom: Vec<Option<NodeIndex>>,
    dom_children: Vec<Vec<NodeIndex>>,
}

impl FunctionCfg {
    pub(crate) fn build(p: &Program, f: FuncId) -> Self {
        let func = p.function(f);
        let mut graph = DiGraph::with_capacity(func.blocks.len(), func.blocks.len() * 2);
        let mut nodes = FxHashMap::default();
        for &b in func.blocks.iter() {
            nodes.insert(b, graph.add_node(b));
        }
        for &b in func.blocks.iter() {
            let from = nodes[&b];
            for s in p.block(b).successors.iter() {
                // calls and tail jumps into other functions are not part of this cfg.
                if let Some(&to) = nodes.get(s) {
                    graph.update_edge(from, to, ());
                }
            }
        }

        let n = graph.node_count();
        let mut idom = vec![None; n];
        let mut dom_children = vec![Vec::new(); n];
        if let Some(entry) = func.entry().and_then(|b| nodes.get(&b).copied()) {
            let doms = simple_fast(&graph, entry);
            for node in graph.node_indices() {
                if let Some(d) = doms.immediate_dominator(node) {
                    idom[node.index()] = Some(d);
                    dom_children[d.index()].push(node);
                }
            }
        }

        Self {
            graph,
            nodes,
            idom,
            dom_children,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub(crate) fn node(&self, b: BlockId) -> Option<NodeIndex> {
        self.nodes.get(&b).copied()
    }

    pub(crate) fn block(&self, n: NodeIndex) -> BlockId {
        self.graph[n]
    }

    pub(crate) fn successors(&self, n: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors(n)
    }

    /// `n` and every node it dominates, in preorder of the dominator tree.
    pub(crate) fn dominated(&self, n: NodeIndex) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        let mut stack = vec![n];
        while let Some(cur) = stack.pop() {
            out.push(cur);
            stack.extend(self.dom_children[cur.index()].iter().rev().copied());
        }
        out
    }

    pub(crate) fn dominates(&self, a: NodeIndex, b: NodeIndex) -> bool {
        let mut cur = Some(b);
        while let Some(c) = cur {
            if c == a {
                return true;
            }
            cur = self.idom[c.index()];
        }
        false
    }
}

impl Program {
    /// Whether every path from the entry of their function to `b` goes through `a`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let fa = self.block(a).function;
        if fa != self.block(b).function {
            return false;
        }
        let cfg = self.cfg(fa);
        match (cfg.node(a), cfg.node(b)) {
            (Some(na), Some(nb)) => cfg.dominates(na, nb),
            _ => false,
        }
    }
}
