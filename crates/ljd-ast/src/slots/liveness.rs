// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Backward liveness over the block graph.
//!
//! The analysis is generic over the variable key so the same solver serves raw
//! slots before resolution and resolved locals afterwards.

use crate::error::FailureReason;
use crate::graph::FlowGraph;
use crate::nodes::{BlockId, LocalId, SlotIndex, Statement};
use crate::warped::{Block, WarpedFunction};
use log::debug;
use std::collections::BTreeSet;

/// Reads and writes of one variable kind.
pub trait VariableKey: Ord + Copy {
    fn reads(statement: &Statement) -> Vec<Self>;
    fn writes(statement: &Statement) -> Vec<Self>;
    fn warp_reads(block: &Block) -> Vec<Self>;
}

impl VariableKey for SlotIndex {
    fn reads(statement: &Statement) -> Vec<Self> {
        statement.read_slots()
    }

    fn writes(statement: &Statement) -> Vec<Self> {
        statement.written_slots()
    }

    fn warp_reads(block: &Block) -> Vec<Self> {
        block.warp_reads()
    }
}

impl VariableKey for LocalId {
    fn reads(statement: &Statement) -> Vec<Self> {
        statement.read_locals()
    }

    fn writes(statement: &Statement) -> Vec<Self> {
        match statement {
            Statement::Declare { .. } => vec![],
            _ => statement.written_locals(),
        }
    }

    fn warp_reads(block: &Block) -> Vec<Self> {
        block
            .warp
            .condition()
            .map(|condition| condition.locals().collect())
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug)]
pub struct Liveness<K: VariableKey = SlotIndex> {
    live_in: Vec<BTreeSet<K>>,
    live_out: Vec<BTreeSet<K>>,
}

struct Summary<K> {
    uses: BTreeSet<K>,
    defs: BTreeSet<K>,
}

fn summarize<K: VariableKey>(block: &Block) -> Summary<K> {
    let mut uses = BTreeSet::new();
    let mut defs = BTreeSet::new();
    for statement in &block.contents {
        for read in K::reads(statement) {
            if !defs.contains(&read) {
                uses.insert(read);
            }
        }
        defs.extend(K::writes(statement));
    }
    for read in K::warp_reads(block) {
        if !defs.contains(&read) {
            uses.insert(read);
        }
    }
    Summary { uses, defs }
}

impl Liveness<SlotIndex> {
    pub fn compute(function: &WarpedFunction, max_rounds: usize) -> Result<Self, FailureReason> {
        Self::solve(function, max_rounds)
    }
}

impl<K: VariableKey> Liveness<K> {
    /// Iterate to a fixed point, sweeping blocks in postorder. Fails when
    /// `max_rounds` full sweeps still change some live set.
    pub fn solve(function: &WarpedFunction, max_rounds: usize) -> Result<Self, FailureReason> {
        let graph = FlowGraph::new(function);
        let count = function.blocks.len();
        let summaries: Vec<Summary<K>> = function.blocks.iter().map(summarize).collect();
        let mut live_in = vec![BTreeSet::new(); count];
        let mut live_out = vec![BTreeSet::new(); count];

        for round in 1..=max_rounds {
            let mut changed = false;
            for &block in graph.reverse_postorder().iter().rev() {
                let out: BTreeSet<K> = graph
                    .successors(block)
                    .iter()
                    .flat_map(|&successor| live_in[successor].iter().copied())
                    .collect();
                let summary = &summaries[block];
                let mut entry: BTreeSet<K> = out.difference(&summary.defs).copied().collect();
                entry.extend(summary.uses.iter().copied());
                if entry != live_in[block] || out != live_out[block] {
                    live_in[block] = entry;
                    live_out[block] = out;
                    changed = true;
                }
            }
            if !changed {
                debug!("[liveness] function {} settled after {round} rounds", function.id);
                return Ok(Liveness { live_in, live_out });
            }
        }
        Err(FailureReason::LivenessDivergence { rounds: max_rounds })
    }

    pub fn live_in(&self, block: BlockId) -> &BTreeSet<K> {
        &self.live_in[block]
    }

    pub fn live_out(&self, block: BlockId) -> &BTreeSet<K> {
        &self.live_out[block]
    }

    /// Live sets before each statement of `block`. The final entry is the set
    /// before the warp, which includes the warp condition's reads.
    pub fn live_before(&self, function: &WarpedFunction, block: BlockId) -> Vec<BTreeSet<K>> {
        let data = &function.blocks[block];
        let mut current = self.live_out[block].clone();
        current.extend(K::warp_reads(data));
        let mut result = vec![current.clone()];
        for statement in data.contents.iter().rev() {
            for write in K::writes(statement) {
                current.remove(&write);
            }
            current.extend(K::reads(statement));
            result.push(current.clone());
        }
        result.reverse();
        result
    }
}
