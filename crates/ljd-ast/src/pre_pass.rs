// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Graph normalization ahead of slot analysis.
//!
//! Jumps through empty blocks are threaded, tests of constants become plain
//! jumps, straight-line chains are merged into one block, and unreachable
//! blocks are dropped with the arena renumbered so the entry stays block 0.

use crate::graph::FlowGraph;
use crate::nodes::BlockId;
use crate::warped::{Warp, WarpedFunction};
use log::debug;
use std::mem;

/// Normalize `function` in place. Returns the number of rewrites applied.
pub fn run(function: &mut WarpedFunction) -> usize {
    let mut rewrites = 0;
    loop {
        let step = fold_constant_tests(function) + thread_empty_jumps(function) + merge_chains(function);
        if step == 0 {
            break;
        }
        rewrites += step;
    }
    rewrites += compact(function);
    debug!("[pre-pass] function {}: {rewrites} rewrites", function.id);
    rewrites
}

fn fold_constant_tests(function: &mut WarpedFunction) -> usize {
    let mut folded = 0;
    for block in function.blocks.iter_mut() {
        if let Warp::Conditional {
            condition,
            true_target,
            false_target,
        } = &block.warp
        {
            if let Some(constant) = condition.constant() {
                let target = if constant.is_truthy() {
                    *true_target
                } else {
                    *false_target
                };
                block.warp = Warp::Unconditional(target);
                folded += 1;
            }
        }
    }
    folded
}

/// Point edges into an empty unconditional block straight at its target.
fn thread_empty_jumps(function: &mut WarpedFunction) -> usize {
    let entry = function.entry();
    let forwarding: Vec<Option<BlockId>> = function
        .blocks
        .iter()
        .map(|block| match block.warp {
            Warp::Unconditional(target)
                if block.contents.is_empty() && block.id != entry && target != block.id =>
            {
                Some(target)
            }
            _ => None,
        })
        .collect();

    // Follow a chain of empty blocks to its end. Cycles of empty blocks are left alone.
    let resolve = |start: BlockId| {
        let mut current = start;
        for _ in 0..=forwarding.len() {
            match forwarding.get(current) {
                Some(Some(next)) => current = *next,
                _ => return Some(current),
            }
        }
        None
    };

    let mut threaded = 0;
    for block in function.blocks.iter_mut() {
        for target in block.warp.targets() {
            if let Some(destination) = resolve(target).filter(|d| *d != target) {
                block.warp.retarget(target, destination);
                threaded += 1;
            }
        }
    }
    threaded
}

/// Append a block to its only predecessor when that predecessor jumps straight to it.
fn merge_chains(function: &mut WarpedFunction) -> usize {
    let graph = FlowGraph::new(function);
    let entry = function.entry();
    for &block in graph.reverse_postorder() {
        let Warp::Unconditional(next) = function.blocks[block].warp else {
            continue;
        };
        if next == block || next == entry || graph.predecessors(next) != [block] {
            continue;
        }
        let absorbed = mem::take(&mut function.blocks[next].contents);
        let warp = mem::replace(&mut function.blocks[next].warp, Warp::End);
        let last_address = function.blocks[next].last_address;
        let target = &mut function.blocks[block];
        target.contents.extend(absorbed);
        target.warp = warp;
        target.last_address = target.last_address.max(last_address);
        return 1;
    }
    0
}

/// Drop unreachable blocks and renumber the rest in arena order.
fn compact(function: &mut WarpedFunction) -> usize {
    let graph = FlowGraph::new(function);
    let mut mapping = vec![None; function.blocks.len()];
    let mut next = 0;
    for (index, slot) in mapping.iter_mut().enumerate() {
        if graph.is_reachable(index) {
            *slot = Some(next);
            next += 1;
        }
    }
    let removed = function.blocks.len() - next;
    if removed == 0 {
        return 0;
    }
    let blocks = mem::take(&mut function.blocks);
    function.blocks = blocks
        .into_iter()
        .filter_map(|mut block| {
            let id = mapping[block.id]?;
            block.id = id;
            block.warp.remap(|target| mapping[target].unwrap_or(target));
            Some(block)
        })
        .collect();
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{Expression, Statement};
    use crate::warped::Block;

    fn call(name: &str) -> Statement {
        Statement::Call {
            function: Expression::global(name),
            arguments: vec![],
            line: 0,
        }
    }

    #[test]
    fn test_straight_line_chain_collapses_to_one_block() {
        let mut function = WarpedFunction::new(
            0,
            0,
            vec![
                Block::new(0, vec![call("a")], Warp::Unconditional(1)),
                Block::new(1, vec![], Warp::Unconditional(2)),
                Block::new(2, vec![call("b")], Warp::End),
            ],
        );
        run(&mut function);
        assert_eq!(function.blocks.len(), 1);
        assert_eq!(function.blocks[0].contents, vec![call("a"), call("b")]);
        assert_eq!(function.blocks[0].warp, Warp::End);
    }

    #[test]
    fn test_constant_test_is_folded_and_dead_arm_removed() {
        let mut function = WarpedFunction::new(
            0,
            0,
            vec![
                Block::new(
                    0,
                    vec![call("a")],
                    Warp::Conditional {
                        condition: Expression::boolean(false),
                        true_target: 1,
                        false_target: 2,
                    },
                ),
                Block::new(1, vec![call("dead")], Warp::End),
                Block::new(2, vec![call("b")], Warp::End),
            ],
        );
        run(&mut function);
        assert_eq!(function.blocks.len(), 1);
        assert_eq!(function.blocks[0].contents, vec![call("a"), call("b")]);
    }

    #[test]
    fn test_branch_targets_are_renumbered() {
        // Block 1 is unreachable; 2 and 3 become 1 and 2.
        let mut function = WarpedFunction::new(
            0,
            0,
            vec![
                Block::new(
                    0,
                    vec![],
                    Warp::Conditional {
                        condition: Expression::global("c"),
                        true_target: 2,
                        false_target: 3,
                    },
                ),
                Block::new(1, vec![call("dead")], Warp::End),
                Block::new(2, vec![call("a")], Warp::End),
                Block::new(3, vec![call("b")], Warp::End),
            ],
        );
        run(&mut function);
        assert_eq!(function.blocks.len(), 3);
        assert_eq!(
            function.blocks[0].warp.targets(),
            vec![1, 2]
        );
        assert!(function.blocks.iter().enumerate().all(|(i, b)| b.id == i));
    }

    #[test]
    fn test_loop_is_left_intact() {
        let mut function = WarpedFunction::new(
            0,
            0,
            vec![
                Block::new(0, vec![], Warp::Unconditional(1)),
                Block::new(
                    1,
                    vec![],
                    Warp::Conditional {
                        condition: Expression::global("c"),
                        true_target: 2,
                        false_target: 3,
                    },
                ),
                Block::new(2, vec![call("f")], Warp::Unconditional(1)),
                Block::new(3, vec![], Warp::End),
            ],
        );
        run(&mut function);
        let graph = FlowGraph::new(&function);
        assert_eq!(graph.natural_loops().len(), 1);
    }
}
