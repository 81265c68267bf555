// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Folding of chained conditional jumps into `and` / `or` conditions.
//!
//! A test block that is empty, reached only from one other test, and shares a
//! target with it is the second operand of a short-circuit operator. Folding
//! it into its predecessor leaves the test block unreachable.

use crate::graph::FlowGraph;
use crate::nodes::{BinOp, BlockId, Expression};
use crate::warped::{Warp, WarpedFunction};
use log::debug;

struct Chain {
    head: BlockId,
    condition: Expression,
    true_target: BlockId,
    false_target: BlockId,
}

/// Fold every foldable chain until none is left. Returns the number of folds.
pub fn fold(function: &mut WarpedFunction) -> usize {
    let mut folds = 0;
    while let Some(chain) = find_chain(function) {
        debug!(
            "[short-circuit] function {}: folding into block {}",
            function.id, chain.head
        );
        function.blocks[chain.head].warp = Warp::Conditional {
            condition: chain.condition,
            true_target: chain.true_target,
            false_target: chain.false_target,
        };
        folds += 1;
    }
    folds
}

fn find_chain(function: &WarpedFunction) -> Option<Chain> {
    let graph = FlowGraph::new(function);
    let entry = function.entry();
    for &head in graph.reverse_postorder() {
        let Warp::Conditional {
            condition: first,
            true_target,
            false_target,
        } = &function.blocks[head].warp
        else {
            continue;
        };
        let (t, f) = (*true_target, *false_target);
        if t == f {
            continue;
        }
        for (inner, on_true) in [(t, true), (f, false)] {
            if inner == head || inner == entry || graph.predecessors(inner) != [head] {
                continue;
            }
            let block = &function.blocks[inner];
            let Warp::Conditional {
                condition: second,
                true_target: bt,
                false_target: bf,
            } = &block.warp
            else {
                continue;
            };
            let (bt, bf) = (*bt, *bf);
            if !block.contents.is_empty() || bt == inner || bf == inner || bt == bf {
                continue;
            }
            let a = first.clone();
            let b = second.clone();
            let folded = match (on_true, bt == f, bf == f, bt == t, bf == t) {
                // a and b
                (true, _, true, _, _) => Some((and(a, b), bt, f)),
                // a and not b
                (true, true, _, _, _) => Some((and(a, b.negate()), bf, f)),
                // a or b
                (false, _, _, true, _) => Some((or(a, b), t, bf)),
                // a or not b
                (false, _, _, _, true) => Some((or(a, b.negate()), t, bt)),
                _ => None,
            };
            if let Some((condition, true_target, false_target)) = folded {
                return Some(Chain {
                    head,
                    condition,
                    true_target,
                    false_target,
                });
            }
        }
    }
    None
}

fn and(a: Expression, b: Expression) -> Expression {
    Expression::binary(BinOp::And, a, b)
}

fn or(a: Expression, b: Expression) -> Expression {
    Expression::binary(BinOp::Or, a, b)
}

/// Strip the statements of blocks no longer reachable from the entry.
pub fn clear_unreachable(function: &mut WarpedFunction) {
    let graph = FlowGraph::new(function);
    for block in function.blocks.iter_mut() {
        if !graph.is_reachable(block.id) {
            block.contents.clear();
            block.warp = Warp::End;
        }
    }
}
