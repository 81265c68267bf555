// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::*;
use ljd_ast::graph::FlowGraph;
use ljd_ast::slots::{self, Liveness, ProtectedSlots};
use ljd_ast::{outline, Block, Expression, PipelineOptions, SlotIndex, Warp, WarpedFunction};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SLOTS: SlotIndex = 3;

/// A random graph over a few registers, each written and read many times.
///
/// The entry writes every register first so that every read has a definition.
fn slot_reuse_graph(rng: &mut StdRng) -> WarpedFunction {
    let count = rng.gen_range(3..9);
    let mut blocks = vec![];
    for id in 0..count {
        let mut contents = vec![];
        if id == 0 {
            for index in 0..SLOTS {
                contents.push(set(index, Expression::call(global("g"), vec![])));
            }
        }
        for _ in 0..rng.gen_range(0..4) {
            let index = rng.gen_range(0..SLOTS);
            if rng.gen_bool(0.5) {
                contents.push(set(index, Expression::call(global("g"), vec![])));
            } else {
                contents.push(call("h", vec![slot(index), slot(index)]));
            }
        }
        let warp = if id + 1 == count {
            Warp::End
        } else {
            match rng.gen_range(0..3) {
                0 => Warp::Unconditional(id + 1),
                1 => Warp::Conditional {
                    condition: global("c"),
                    true_target: id + 1,
                    false_target: rng.gen_range(id + 1..count),
                },
                _ => Warp::Conditional {
                    condition: global("c"),
                    true_target: rng.gen_range(0..=id),
                    false_target: id + 1,
                },
            }
        };
        blocks.push(Block::new(id, contents, warp));
    }
    WarpedFunction::new(0, 0, blocks)
}

#[test]
fn locals_sharing_a_slot_have_disjoint_live_ranges() {
    let options = PipelineOptions::default();
    let mut split_slots = 0;
    for seed in 0..200 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut function = slot_reuse_graph(&mut rng);
        let table = slots::resolve(&mut function, &options).unwrap();
        let ranges = slots::live_ranges(&function, options.max_liveness_rounds).unwrap();

        let graph = FlowGraph::new(&function);
        for block in function.blocks.iter().filter(|block| graph.is_reachable(block.id)) {
            for statement in &block.contents {
                assert!(
                    statement.operands().iter().all(|operand| operand.slots().next().is_none()),
                    "seed {seed}: raw slot left in block {}",
                    block.id
                );
            }
        }

        for index in 0..SLOTS {
            let locals = table.by_slot(index);
            if locals.len() > 1 {
                split_slots += 1;
            }
            for (position, first) in locals.iter().enumerate() {
                for second in &locals[position + 1..] {
                    let (Some(a), Some(b)) = (ranges.get(first), ranges.get(second)) else {
                        continue;
                    };
                    assert!(
                        !a.interferes(b),
                        "seed {seed}: {} and {} interfere",
                        table.name(*first),
                        table.name(*second)
                    );
                }
            }
        }
    }
    assert!(split_slots > 0, "no generated graph reused a register");
}

#[test]
fn temporary_elimination_is_idempotent() {
    // s0 = g(); s1 = s0 + 1; f(s1)
    let mut function = WarpedFunction::new(
        0,
        0,
        vec![end(
            0,
            vec![
                set(0, Expression::call(global("g"), vec![])),
                set(
                    1,
                    Expression::binary(ljd_ast::BinOp::Add, slot(0), Expression::number(1.0)),
                ),
                call("f", vec![slot(1)]),
            ],
        )],
    );
    let eliminate = |function: &mut WarpedFunction| {
        let liveness = Liveness::compute(function, 100).unwrap();
        let protected = ProtectedSlots::collect(function, &FlowGraph::new(function));
        slots::eliminate(function, &liveness, &protected)
    };
    assert_eq!(eliminate(&mut function), 2);
    let once = function.clone();
    assert_eq!(eliminate(&mut function), 0);
    assert_eq!(function, once);

    slots::resolve(&mut function, &PipelineOptions::default()).unwrap();
    let resolved = function.clone();
    assert_eq!(eliminate(&mut function), 0);
    assert_eq!(function, resolved);
}

/// Two loops in sequence, with the second loop's blocks placed either after
/// or before the first loop's blocks in the arena.
fn sibling_loops(second_first: bool) -> WarpedFunction {
    let (a, b) = if second_first { (3, 1) } else { (1, 3) };
    WarpedFunction::new(
        0,
        0,
        vec![
            jump(0, vec![], a),
            branch(a, vec![], global("a"), a + 1, b),
            jump(a + 1, vec![call("f", vec![])], a),
            branch(b, vec![], global("b"), b + 1, 5),
            jump(b + 1, vec![call("g", vec![])], b),
            end(5, vec![]),
        ]
        .into_iter()
        .map(|block| (block.id, block))
        .collect::<std::collections::BTreeMap<_, _>>()
        .into_values()
        .collect(),
    )
}

#[test]
fn loop_classification_is_deterministic_and_order_independent() {
    let in_order = decompile(sibling_loops(false)).unwrap();
    let again = decompile(sibling_loops(false)).unwrap();
    assert_eq!(in_order, again);

    let reordered = decompile(sibling_loops(true)).unwrap();
    assert_eq!(outline(&in_order), outline(&reordered));
}

#[test]
fn structured_trees_never_mention_raw_slots() {
    for seed in 0..50 {
        let mut rng = StdRng::seed_from_u64(seed);
        let function = slot_reuse_graph(&mut rng);
        // Random back edges may well be irreducible; only successes are checked.
        let Ok(structured) = decompile(function) else {
            continue;
        };
        for node in structured.nodes() {
            for expression in node.expressions() {
                assert!(expression.slots().next().is_none(), "seed {seed}: {node:?}");
            }
        }
    }
}
