// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Temporary elimination.
//!
//! A slot write is a compiler temporary when it is a plain `slot = value`,
//! is read exactly once by the statement (or warp) right after it, and is
//! dead afterwards. Such writes are folded into their use. Runs of
//! temporaries feeding one statement are absorbed back to front, so a
//! statement first takes the write just before it, then the one before that.
//! A value reading fields, globals or upvalues never moves past a call.

use crate::graph::FlowGraph;
use crate::nodes::{BlockId, Expression, SlotIndex, Statement};
use crate::slots::liveness::Liveness;
use crate::unwarper::loops;
use crate::warped::{Block, Warp, WarpedFunction};
use log::debug;
use std::collections::BTreeSet;
use std::mem;

/// Slots whose writes hold source-level locals within a block.
#[derive(Clone, Debug, Default)]
pub struct ProtectedSlots {
    everywhere: BTreeSet<SlotIndex>,
    per_block: BTreeSet<(BlockId, SlotIndex)>,
}

impl ProtectedSlots {
    /// Mark parameters, debug locals, closure captures and the visible
    /// variable of counted loops.
    pub fn collect(function: &WarpedFunction, graph: &FlowGraph) -> Self {
        let mut protected = ProtectedSlots::default();
        protected.everywhere.extend(0..function.parameters);
        for block in &function.blocks {
            for local in function.debug_locals.iter().filter(|l| l.covers(block)) {
                protected.protect(block.id, local.slot);
            }
            for statement in &block.contents {
                for operand in statement.operands() {
                    for slot in operand.captured_slots() {
                        protected.protect(block.id, slot);
                    }
                }
            }
        }
        for (block, slot) in loops::loop_variable_copies(function, graph) {
            protected.protect(block, slot);
        }
        protected
    }

    pub fn protect(&mut self, block: BlockId, slot: SlotIndex) {
        self.per_block.insert((block, slot));
    }

    pub fn is_protected(&self, block: BlockId, slot: SlotIndex) -> bool {
        self.everywhere.contains(&slot) || self.per_block.contains(&(block, slot))
    }
}

/// Fold temporaries into their single use. Returns the number of writes removed.
pub fn eliminate(
    function: &mut WarpedFunction,
    liveness: &Liveness,
    protected: &ProtectedSlots,
) -> usize {
    let graph = FlowGraph::new(function);
    let mut eliminated = 0;
    for block in function.blocks.iter_mut() {
        if !graph.is_reachable(block.id) {
            continue;
        }
        eliminated += eliminate_in_block(block, liveness.live_out(block.id), protected);
    }
    debug!("[slotworks] function {}: {eliminated} temporaries inlined", function.id);
    eliminated
}

/// Where the single read of a candidate temporary sits.
enum Consumer<'a> {
    Statement(&'a Statement),
    Warp(&'a Warp),
}

impl Consumer<'_> {
    fn operands(&self) -> Vec<&Expression> {
        match self {
            Consumer::Statement(statement) => statement.operands(),
            Consumer::Warp(warp) => warp.condition().into_iter().collect(),
        }
    }
}

fn eliminate_in_block(
    block: &mut Block,
    live_out: &BTreeSet<SlotIndex>,
    protected: &ProtectedSlots,
) -> usize {
    let mut contents = mem::take(&mut block.contents);
    let mut eliminated = 0;
    let mut consumer = 0;
    while consumer <= contents.len() {
        while consumer > 0 {
            let candidate = consumer - 1;
            let Some((slot, value)) = contents[candidate].as_single_slot_assignment() else {
                break;
            };
            if protected.is_protected(block.id, slot) {
                break;
            }
            let target = match contents.get(consumer) {
                Some(statement) => Consumer::Statement(statement),
                None => Consumer::Warp(&block.warp),
            };
            let rest = contents.get(consumer + 1..).unwrap_or(&[]);
            if !can_inline(slot, value, &target, rest, &block.warp, live_out) {
                break;
            }

            let removed = contents.remove(candidate);
            let Statement::Assignment(mut assignment) = removed else {
                break;
            };
            let mut replacement = assignment.expressions.pop();
            consumer = candidate;
            match contents.get_mut(consumer) {
                Some(statement) => {
                    for operand in statement.operands_mut() {
                        operand.substitute_slot(slot, &mut replacement);
                    }
                }
                None => {
                    if let Some(condition) = block.warp.condition_mut() {
                        condition.substitute_slot(slot, &mut replacement);
                    }
                }
            }
            eliminated += 1;
        }
        consumer += 1;
    }
    block.contents = contents;
    eliminated
}

fn can_inline(
    slot: SlotIndex,
    value: &Expression,
    consumer: &Consumer,
    rest: &[Statement],
    warp: &Warp,
    live_out: &BTreeSet<SlotIndex>,
) -> bool {
    let operands = consumer.operands();
    let reads: usize = operands.iter().map(|operand| operand.count_slot(slot)).sum();
    if reads != 1 {
        return false;
    }
    if operands
        .iter()
        .any(|operand| operand.captured_slots().contains(&slot))
    {
        return false;
    }
    let consumer_writes = match consumer {
        Consumer::Statement(statement) => statement.written_slots().contains(&slot),
        Consumer::Warp(_) => false,
    };
    if !consumer_writes && !dead_after(slot, rest, warp, consumer, live_out) {
        return false;
    }
    if value.reads_mutable_state() && effect_precedes_read(&operands, slot) {
        return false;
    }
    if value.is_multi_value() && read_at_list_tail(consumer, slot) {
        return false;
    }
    true
}

/// The slot is overwritten or never read again after the consumer.
fn dead_after(
    slot: SlotIndex,
    rest: &[Statement],
    warp: &Warp,
    consumer: &Consumer,
    live_out: &BTreeSet<SlotIndex>,
) -> bool {
    if let Consumer::Warp(_) = consumer {
        return !live_out.contains(&slot);
    }
    for statement in rest {
        if statement.read_slots().contains(&slot) {
            return false;
        }
        if statement.written_slots().contains(&slot) {
            return true;
        }
    }
    let warp_reads = warp
        .condition()
        .is_some_and(|condition| condition.count_slot(slot) > 0);
    !warp_reads && !live_out.contains(&slot)
}

/// Whether a call completes before `slot` is read when evaluating `operands`.
fn effect_precedes_read(operands: &[&Expression], slot: SlotIndex) -> bool {
    fn walk(expression: &Expression, slot: SlotIndex, effect: &mut bool) -> bool {
        match expression {
            Expression::Slot(read) => *read == slot,
            Expression::Closure { .. } => false,
            _ => {
                for child in expression.children() {
                    if walk(child, slot, effect) {
                        return true;
                    }
                }
                if matches!(expression, Expression::Call { .. }) {
                    *effect = true;
                }
                false
            }
        }
    }
    let mut effect = false;
    for operand in operands {
        if walk(operand, slot, &mut effect) {
            return effect;
        }
    }
    effect
}

/// A call or vararg placed last in a value list would expand to every result.
fn read_at_list_tail(consumer: &Consumer, slot: SlotIndex) -> bool {
    let is_slot = |expression: Option<&Expression>| expression == Some(&Expression::Slot(slot));
    let statement_tail = match consumer {
        Consumer::Statement(Statement::Call { arguments, .. }) => is_slot(arguments.last()),
        Consumer::Statement(Statement::Return { values, .. }) => is_slot(values.last()),
        Consumer::Statement(Statement::Assignment(assignment)) => {
            assignment.destinations.len() > assignment.expressions.len()
                && is_slot(assignment.expressions.last())
        }
        _ => false,
    };
    statement_tail
        || consumer.operands().iter().any(|operand| {
            operand.iter().any(|node| match node {
                Expression::Call { arguments, .. } => is_slot(arguments.last()),
                Expression::Table { array, .. } => is_slot(array.last()),
                _ => false,
            })
        })
}
