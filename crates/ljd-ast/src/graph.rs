// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Control flow graph analyses over the block arena: reachability, dominance,
//! post-dominance, back edges and natural loops.

use crate::error::FailureReason;
use crate::nodes::BlockId;
use crate::warped::WarpedFunction;
use log::debug;
use petgraph::algo::dominators::{simple_fast, Dominators};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::BTreeSet;

/// Immutable view of a function's control flow.
///
/// Nodes of the petgraph graph are added in arena order, so `NodeIndex::new(b)`
/// is block `b`. Only edges leaving reachable blocks are recorded.
pub struct FlowGraph {
    successors: Vec<Vec<BlockId>>,
    predecessors: Vec<Vec<BlockId>>,
    reachable: Vec<bool>,
    /// Reachable blocks in reverse postorder of a depth-first walk that
    /// explores true targets before false targets.
    rpo: Vec<BlockId>,
    rpo_index: Vec<Option<usize>>,
    dominators: Dominators<NodeIndex>,
}

/// A natural loop: its header, the sources of its back edges and every block
/// that reaches a back edge without passing through the header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NaturalLoop {
    pub header: BlockId,
    pub latches: Vec<BlockId>,
    pub body: BTreeSet<BlockId>,
}

impl NaturalLoop {
    pub fn contains(&self, block: BlockId) -> bool {
        self.body.contains(&block)
    }

    /// Edges leaving the loop, as `(source, target)` pairs.
    pub fn exits(&self, graph: &FlowGraph) -> Vec<(BlockId, BlockId)> {
        self.body
            .iter()
            .flat_map(|&block| {
                graph
                    .successors(block)
                    .iter()
                    .filter(move |target| !self.contains(**target))
                    .map(move |&target| (block, target))
            })
            .collect()
    }
}

impl FlowGraph {
    pub fn new(function: &WarpedFunction) -> Self {
        let count = function.blocks.len();
        let mut successors = vec![vec![]; count];
        for block in &function.blocks {
            if block.id < count {
                successors[block.id] = block
                    .warp
                    .targets()
                    .into_iter()
                    .filter(|target| *target < count)
                    .collect();
            }
        }

        let (rpo, reachable) = reverse_postorder(&successors, function.entry());
        let mut rpo_index = vec![None; count];
        for (index, block) in rpo.iter().enumerate() {
            rpo_index[*block] = Some(index);
        }

        let mut predecessors = vec![vec![]; count];
        let mut graph = DiGraph::<BlockId, ()>::with_capacity(count, count * 2);
        for block in 0..count {
            graph.add_node(block);
        }
        for &block in &rpo {
            for &target in &successors[block] {
                if !predecessors[target].contains(&block) {
                    predecessors[target].push(block);
                }
                graph.add_edge(NodeIndex::new(block), NodeIndex::new(target), ());
            }
        }
        let dominators = simple_fast(&graph, NodeIndex::new(function.entry()));

        FlowGraph {
            successors,
            predecessors,
            reachable,
            rpo,
            rpo_index,
            dominators,
        }
    }

    pub fn len(&self) -> usize {
        self.successors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.successors.is_empty()
    }

    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        self.successors.get(block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distinct reachable predecessors.
    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        self.predecessors.get(block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.reachable.get(block).copied().unwrap_or(false)
    }

    pub fn reverse_postorder(&self) -> &[BlockId] {
        &self.rpo
    }

    pub fn rpo_index(&self, block: BlockId) -> Option<usize> {
        self.rpo_index.get(block).copied().flatten()
    }

    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.dominators
            .immediate_dominator(NodeIndex::new(block))
            .map(NodeIndex::index)
    }

    /// Whether every path from the entry to `block` passes through `dominator`.
    pub fn dominates(&self, dominator: BlockId, block: BlockId) -> bool {
        if !self.is_reachable(block) {
            return false;
        }
        let mut current = Some(block);
        while let Some(node) = current {
            if node == dominator {
                return true;
            }
            current = self.immediate_dominator(node);
        }
        false
    }

    /// Edges whose target dominates their source.
    pub fn back_edges(&self) -> Vec<(BlockId, BlockId)> {
        self.rpo
            .iter()
            .flat_map(|&source| {
                self.successors(source)
                    .iter()
                    .filter(move |&&target| self.dominates(target, source))
                    .map(move |&target| (source, target))
            })
            .collect()
    }

    pub fn is_back_edge(&self, source: BlockId, target: BlockId) -> bool {
        self.successors(source).contains(&target) && self.dominates(target, source)
    }

    /// A graph is reducible when every edge that closes a cycle in a
    /// depth-first walk is a back edge.
    pub fn check_reducible(&self) -> Result<(), FailureReason> {
        for (source, target) in retreating_edges(&self.successors, self.rpo.first().copied()) {
            if !self.dominates(target, source) {
                debug!("[graph] retreating edge {source} -> {target} enters a loop from the side");
                return Err(FailureReason::irreducible(
                    target,
                    format!("cycle entered from block {source} without passing its header"),
                ));
            }
        }
        Ok(())
    }

    /// Natural loops, one per header, innermost (smallest) first.
    pub fn natural_loops(&self) -> Vec<NaturalLoop> {
        let mut loops: Vec<NaturalLoop> = vec![];
        for (latch, header) in self.back_edges() {
            let body = self.loop_body(header, latch);
            match loops.iter_mut().find(|l| l.header == header) {
                Some(existing) => {
                    existing.latches.push(latch);
                    existing.body.extend(body);
                }
                None => loops.push(NaturalLoop {
                    header,
                    latches: vec![latch],
                    body,
                }),
            }
        }
        loops.sort_by_key(|l| (l.body.len(), self.rpo_index(l.header)));
        loops
    }

    fn loop_body(&self, header: BlockId, latch: BlockId) -> BTreeSet<BlockId> {
        let mut body = BTreeSet::from([header]);
        let mut worklist = vec![latch];
        while let Some(block) = worklist.pop() {
            if body.insert(block) {
                worklist.extend(self.predecessors(block).iter().copied());
            }
        }
        body
    }

    /// Immediate post-dominators over the graph with back edges removed.
    ///
    /// Blocks without remaining successors, and sources of back edges, flow
    /// into a virtual exit. A block whose immediate post-dominator is that
    /// exit has no merge point.
    pub fn post_dominators(&self) -> PostDominators {
        let count = self.len();
        let exit = count;
        let mut reversed = DiGraph::<usize, ()>::with_capacity(count + 1, count * 2);
        for node in 0..=count {
            reversed.add_node(node);
        }
        for &block in &self.rpo {
            let forward: Vec<BlockId> = self
                .successors(block)
                .iter()
                .copied()
                .filter(|&target| !self.dominates(target, block))
                .collect();
            // Back edges end an iteration, so their sources also reach the exit.
            if forward.is_empty() || forward.len() != self.successors(block).len() {
                reversed.add_edge(NodeIndex::new(exit), NodeIndex::new(block), ());
            }
            for target in forward {
                reversed.add_edge(NodeIndex::new(target), NodeIndex::new(block), ());
            }
        }
        let dominators = simple_fast(&reversed, NodeIndex::new(exit));
        let immediate = (0..count)
            .map(|block| {
                if !self.is_reachable(block) {
                    return None;
                }
                dominators
                    .immediate_dominator(NodeIndex::new(block))
                    .map(NodeIndex::index)
                    .filter(|&node| node != exit)
            })
            .collect();
        PostDominators { immediate }
    }
}

pub struct PostDominators {
    immediate: Vec<Option<BlockId>>,
}

impl PostDominators {
    /// The block where both arms of a branch at `block` meet again, if any.
    pub fn merge_point(&self, block: BlockId) -> Option<BlockId> {
        self.immediate.get(block).copied().flatten()
    }
}

fn reverse_postorder(successors: &[Vec<BlockId>], entry: BlockId) -> (Vec<BlockId>, Vec<bool>) {
    let mut visited = vec![false; successors.len()];
    let mut postorder = vec![];
    if entry >= successors.len() {
        return (postorder, visited);
    }
    let mut stack = vec![(entry, 0usize)];
    visited[entry] = true;
    while let Some((block, next)) = stack.pop() {
        if let Some(&target) = successors[block].get(next) {
            stack.push((block, next + 1));
            if !visited[target] {
                visited[target] = true;
                stack.push((target, 0));
            }
        } else {
            postorder.push(block);
        }
    }
    postorder.reverse();
    (postorder, visited)
}

fn retreating_edges(successors: &[Vec<BlockId>], entry: Option<BlockId>) -> Vec<(BlockId, BlockId)> {
    let Some(entry) = entry else {
        return vec![];
    };
    let mut visited = vec![false; successors.len()];
    let mut on_stack = vec![false; successors.len()];
    let mut result = vec![];
    let mut stack = vec![(entry, 0usize)];
    visited[entry] = true;
    on_stack[entry] = true;
    while let Some((block, next)) = stack.pop() {
        if let Some(&target) = successors[block].get(next) {
            stack.push((block, next + 1));
            if on_stack[target] {
                result.push((block, target));
            } else if !visited[target] {
                visited[target] = true;
                on_stack[target] = true;
                stack.push((target, 0));
            }
        } else {
            on_stack[block] = false;
        }
    }
    result
}
