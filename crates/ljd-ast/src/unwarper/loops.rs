// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Loop classification.
//!
//! Counted loops are lowered by the builder into ordinary blocks: hidden
//! registers hold the counter (or the iterator triple), the header tests them
//! and the latch advances them. Recognizing those shapes turns them back into
//! `for` statements. Everything else becomes `repeat`, `while` or `while true`.

use crate::graph::{FlowGraph, NaturalLoop};
use crate::nodes::{BinOp, BlockId, Constant, Expression, LocalId, SlotIndex, Statement, UnOp};
use crate::structured::{LocalKind, LocalTable, Note};
use crate::warped::{Block, Warp, WarpedFunction};
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq)]
pub enum LoopShape {
    /// Header holds only the test. `condition` keeps the loop running.
    While {
        condition: Expression,
        body_entry: BlockId,
        follow: BlockId,
    },
    /// The single latch tests the exit condition.
    Repeat { latch: BlockId, follow: BlockId },
    NumericFor {
        variable: LocalId,
        start: Expression,
        stop: Expression,
        step: Expression,
        body_entry: BlockId,
        follow: BlockId,
    },
    GenericFor {
        variables: Vec<LocalId>,
        iterators: Vec<Expression>,
        body_entry: BlockId,
        follow: BlockId,
    },
    /// `while true do ... end`, left only by `break` or `return`.
    Endless { follow: Option<BlockId> },
}

impl LoopShape {
    pub fn follow(&self) -> Option<BlockId> {
        match self {
            LoopShape::While { follow, .. }
            | LoopShape::Repeat { follow, .. }
            | LoopShape::NumericFor { follow, .. }
            | LoopShape::GenericFor { follow, .. } => Some(*follow),
            LoopShape::Endless { follow } => *follow,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoopInfo {
    pub header: BlockId,
    pub body: BTreeSet<BlockId>,
    pub shape: LoopShape,
}

enum Match<T> {
    No,
    Partial(String),
    Full(T),
}

/// Statement positions of a recognized counted loop, removed once accepted.
struct Idiom {
    preheader: BlockId,
    preheader_defs: usize,
    body_entry: BlockId,
    follow: BlockId,
    /// Statement at the start of the body entry that copies the counter.
    entry_copy: bool,
    /// The header's own statement (the iterator call).
    header_call: bool,
}

struct Numeric {
    idiom: Idiom,
    variable: Expression,
    start: Expression,
    stop: Expression,
    step: Expression,
}

struct Generic {
    idiom: Idiom,
    variables: Vec<Expression>,
    iterators: Vec<Expression>,
}

type SlotOf<'a> = &'a dyn Fn(&Expression) -> Option<SlotIndex>;

fn is_variable(expression: &Expression) -> bool {
    matches!(expression, Expression::Slot(_) | Expression::Local(_))
}

fn single_assignment(statement: &Statement) -> Option<(&Expression, &Expression)> {
    match statement {
        Statement::Assignment(assignment)
            if assignment.destinations.len() == 1 && assignment.expressions.len() == 1 =>
        {
            Some((&assignment.destinations[0], &assignment.expressions[0]))
        }
        _ => None,
    }
}

/// Number of reads of `variable` anywhere in the function.
fn reads_of(function: &WarpedFunction, variable: &Expression) -> usize {
    let count = |expression: &Expression| expression.iter().filter(|e| *e == variable).count();
    function
        .blocks
        .iter()
        .map(|block| {
            block
                .contents
                .iter()
                .flat_map(Statement::operands)
                .chain(block.warp.condition())
                .map(count)
                .sum::<usize>()
        })
        .sum()
}

fn adjacent(slot_of: SlotOf, base: &Expression, other: &Expression, offset: SlotIndex) -> bool {
    match (slot_of(base), slot_of(other)) {
        (Some(base), Some(other)) => base.checked_add(offset) == Some(other),
        _ => false,
    }
}

fn single_latch(lp: &NaturalLoop) -> Option<BlockId> {
    match lp.latches.as_slice() {
        [latch] => Some(*latch),
        _ => None,
    }
}

/// The loop-side and exit-side targets of the header's test.
fn split_targets(lp: &NaturalLoop, warp: &Warp) -> Option<(BlockId, BlockId, bool)> {
    let Warp::Conditional {
        true_target,
        false_target,
        ..
    } = warp
    else {
        return None;
    };
    match (lp.contains(*true_target), lp.contains(*false_target)) {
        (true, false) => Some((*true_target, *false_target, true)),
        (false, true) => Some((*false_target, *true_target, false)),
        _ => None,
    }
}

/// The one block entering the header from outside, if it falls straight in.
fn preheader(function: &WarpedFunction, graph: &FlowGraph, lp: &NaturalLoop) -> Option<BlockId> {
    let outside: Vec<BlockId> = graph
        .predecessors(lp.header)
        .iter()
        .copied()
        .filter(|block| !lp.contains(*block))
        .collect();
    match outside.as_slice() {
        [block] if function.blocks[*block].warp == Warp::Unconditional(lp.header) => Some(*block),
        _ => None,
    }
}

/// `counter = counter + step` closing the latch.
fn latch_increment(block: &Block) -> Option<(&Expression, &Expression)> {
    let (destination, value) = single_assignment(block.contents.last()?)?;
    match value {
        Expression::Binary {
            op: BinOp::Add,
            lhs,
            rhs,
        } if lhs.as_ref() == destination && is_variable(destination) && is_variable(rhs) => {
            Some((destination, rhs.as_ref()))
        }
        _ => None,
    }
}

fn mirrored(op: BinOp) -> BinOp {
    match op {
        BinOp::Le => BinOp::Ge,
        BinOp::Ge => BinOp::Le,
        BinOp::Lt => BinOp::Gt,
        BinOp::Gt => BinOp::Lt,
        other => other,
    }
}

/// The header test compared against `counter`: the limit, the comparison
/// with the counter on the left, and whether the comparison is negated.
fn counter_test<'a>(condition: &'a Expression, counter: &Expression) -> Option<(&'a Expression, BinOp, bool)> {
    match condition {
        Expression::Unary {
            op: UnOp::Not,
            operand,
        } => {
            let (limit, comparison, negated) = counter_test(operand, counter)?;
            Some((limit, comparison, !negated))
        }
        Expression::Binary { op, lhs, rhs } if matches!(op, BinOp::Le | BinOp::Ge | BinOp::Lt | BinOp::Gt) => {
            if lhs.as_ref() == counter && is_variable(rhs) {
                Some((rhs.as_ref(), *op, false))
            } else if rhs.as_ref() == counter && is_variable(lhs) {
                Some((lhs.as_ref(), mirrored(*op), false))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn numeric_value(expression: &Expression) -> Option<f64> {
    match expression {
        Expression::Constant(Constant::Number(value)) => Some(*value),
        Expression::Unary {
            op: UnOp::Minus,
            operand,
        } => numeric_value(operand).map(|value| -value),
        _ => None,
    }
}

/// A counted loop runs upwards for a non-negative step and downwards otherwise.
fn direction_matches(comparison: BinOp, step: &Expression) -> bool {
    match comparison {
        BinOp::Le => numeric_value(step).map_or(true, |value| value >= 0.0),
        BinOp::Ge => numeric_value(step).is_some_and(|value| value < 0.0),
        _ => false,
    }
}

/// Initial values written by the final statements of the preheader, one per variable in order.
fn trailing_definitions(block: &Block, variables: &[&Expression]) -> Option<(Vec<Expression>, usize)> {
    let contents = &block.contents;
    if let Some(Statement::Assignment(assignment)) = contents.last() {
        if assignment.destinations.len() == variables.len()
            && assignment
                .destinations
                .iter()
                .zip(variables)
                .all(|(destination, variable)| destination == *variable)
            && variables.len() > 1
        {
            return Some((assignment.expressions.clone(), 1));
        }
    }
    let start = contents.len().checked_sub(variables.len())?;
    let mut values = vec![];
    for (statement, variable) in contents[start..].iter().zip(variables) {
        let (destination, value) = single_assignment(statement)?;
        if destination != *variable || value.iter().any(|e| e == *variable) {
            return None;
        }
        values.push(value.clone());
    }
    Some((values, variables.len()))
}

fn match_numeric(
    function: &WarpedFunction,
    graph: &FlowGraph,
    lp: &NaturalLoop,
    slot_of: SlotOf,
    check_uses: bool,
) -> Match<Numeric> {
    let Some(latch) = single_latch(lp) else {
        return Match::No;
    };
    let latch_block = &function.blocks[latch];
    let header = &function.blocks[lp.header];
    if latch_block.warp != Warp::Unconditional(lp.header) || !header.contents.is_empty() {
        return Match::No;
    }
    let Some((counter, step)) = latch_increment(latch_block) else {
        return Match::No;
    };
    let Some((limit, comparison, negated)) = header.warp.condition().and_then(|c| counter_test(c, counter)) else {
        return Match::No;
    };
    if !adjacent(slot_of, counter, limit, 1) || !adjacent(slot_of, counter, step, 2) {
        return Match::No;
    }

    let Some((body_entry, follow, loop_on_true)) = split_targets(lp, &header.warp) else {
        return Match::Partial("counter test does not leave the loop".into());
    };
    if !matches!(comparison, BinOp::Le | BinOp::Ge) {
        return Match::Partial("counter test is a strict comparison".into());
    }
    // The loop must keep running exactly while the comparison holds.
    if loop_on_true == negated {
        return Match::Partial("counter test leaves the loop while the comparison holds".into());
    }
    let variable = match function.blocks[body_entry].contents.first().and_then(single_assignment) {
        Some((variable, value)) if value == counter && adjacent(slot_of, counter, variable, 3) => {
            variable.clone()
        }
        _ => return Match::Partial("body does not start by copying the counter".into()),
    };
    let Some(preheader) = preheader(function, graph, lp) else {
        return Match::Partial("loop has no single preheader".into());
    };
    let Some((values, preheader_defs)) =
        trailing_definitions(&function.blocks[preheader], &[counter, limit, step])
    else {
        return Match::Partial("counter, limit and step are not initialized before the loop".into());
    };
    if values.len() != 3 {
        return Match::Partial("initializer count does not match".into());
    }
    if check_uses
        && (reads_of(function, counter) != 3 || reads_of(function, limit) != 1 || reads_of(function, step) != 1)
    {
        return Match::Partial("hidden loop registers are read elsewhere".into());
    }

    let mut values = values.into_iter();
    let (Some(start), Some(stop), Some(step)) = (values.next(), values.next(), values.next()) else {
        return Match::No;
    };
    if !direction_matches(comparison, &step) {
        return Match::Partial("counter test does not match the sign of the step".into());
    }
    Match::Full(Numeric {
        idiom: Idiom {
            preheader,
            preheader_defs,
            body_entry,
            follow,
            entry_copy: true,
            header_call: false,
        },
        variable,
        start,
        stop,
        step,
    })
}

/// `v1 ~= nil` or `v1 == nil` in either operand order, possibly negated.
/// Returns the variable and whether the test holds for a non-nil value.
fn nil_test(condition: &Expression) -> Option<(&Expression, bool)> {
    match condition {
        Expression::Unary {
            op: UnOp::Not,
            operand,
        } => nil_test(operand).map(|(variable, holds)| (variable, !holds)),
        Expression::Binary {
            op: op @ (BinOp::Neq | BinOp::Eq),
            lhs,
            rhs,
        } => match (lhs.as_ref(), rhs.as_ref()) {
            (variable, Expression::Constant(Constant::Nil))
            | (Expression::Constant(Constant::Nil), variable)
                if is_variable(variable) =>
            {
                Some((variable, *op == BinOp::Neq))
            }
            _ => None,
        },
        _ => None,
    }
}

fn match_generic(
    function: &WarpedFunction,
    graph: &FlowGraph,
    lp: &NaturalLoop,
    slot_of: SlotOf,
) -> Match<Generic> {
    let Some(latch) = single_latch(lp) else {
        return Match::No;
    };
    let latch_block = &function.blocks[latch];
    let header = &function.blocks[lp.header];
    if latch_block.warp != Warp::Unconditional(lp.header) {
        return Match::No;
    }
    let Some((control, copied)) = latch_block.contents.last().and_then(single_assignment) else {
        return Match::No;
    };
    let [Statement::Assignment(call)] = header.contents.as_slice() else {
        return Match::No;
    };
    let (generator, state) = match call.expressions.as_slice() {
        [Expression::Call {
            function: generator,
            arguments,
        }] => match arguments.as_slice() {
            [state, argument] if argument == control && is_variable(state) && is_variable(generator) => {
                (generator.as_ref(), state)
            }
            _ => return Match::No,
        },
        _ => return Match::No,
    };
    let variables = &call.destinations;
    let first_matches = variables.first() == Some(copied);
    let Some((tested, holds_for_value)) = header.warp.condition().and_then(nil_test) else {
        return Match::No;
    };
    if !first_matches || tested != copied || !variables.iter().all(is_variable) {
        return Match::No;
    }
    let layout = adjacent(slot_of, generator, state, 1)
        && adjacent(slot_of, generator, control, 2)
        && variables
            .iter()
            .zip(3..)
            .all(|(variable, offset)| adjacent(slot_of, generator, variable, offset));
    if !layout {
        return Match::No;
    }

    let Some((body_entry, follow, loop_on_true)) = split_targets(lp, &header.warp) else {
        return Match::Partial("iterator test does not leave the loop".into());
    };
    if loop_on_true != holds_for_value {
        return Match::Partial("iterator test keeps looping on nil".into());
    }
    let Some(preheader) = preheader(function, graph, lp) else {
        return Match::Partial("loop has no single preheader".into());
    };
    let Some((iterators, preheader_defs)) =
        trailing_definitions(&function.blocks[preheader], &[generator, state, control])
    else {
        return Match::Partial("iterator triple is not initialized before the loop".into());
    };
    if reads_of(function, generator) != 1 || reads_of(function, state) != 1 || reads_of(function, control) != 1 {
        return Match::Partial("hidden iterator registers are read elsewhere".into());
    }

    Match::Full(Generic {
        idiom: Idiom {
            preheader,
            preheader_defs,
            body_entry,
            follow,
            entry_copy: false,
            header_call: true,
        },
        variables: variables.clone(),
        iterators,
    })
}

/// Slots holding the visible variable of a counted loop, with the block where it is copied.
///
/// Runs before slot resolution, so reuse of the hidden registers elsewhere is not checked.
pub fn loop_variable_copies(function: &WarpedFunction, graph: &FlowGraph) -> Vec<(BlockId, SlotIndex)> {
    let slot_of = |expression: &Expression| match expression {
        Expression::Slot(slot) => Some(*slot),
        _ => None,
    };
    graph
        .natural_loops()
        .iter()
        .filter_map(|lp| match match_numeric(function, graph, lp, &slot_of, false) {
            Match::Full(numeric) => Some((numeric.idiom.body_entry, slot_of(&numeric.variable)?)),
            _ => None,
        })
        .collect()
}

fn as_local(expression: &Expression) -> Option<LocalId> {
    match expression {
        Expression::Local(id) => Some(*id),
        _ => None,
    }
}

/// Remove the statements a recognized counted loop is made of.
fn strip_idiom(function: &mut WarpedFunction, lp: &NaturalLoop, idiom: &Idiom) {
    for latch in &lp.latches {
        function.blocks[*latch].contents.pop();
    }
    if idiom.header_call {
        function.blocks[lp.header].contents.clear();
    }
    if idiom.entry_copy {
        let entry = &mut function.blocks[idiom.body_entry].contents;
        if !entry.is_empty() {
            entry.remove(0);
        }
    }
    let preheader = &mut function.blocks[idiom.preheader].contents;
    let keep = preheader.len().saturating_sub(idiom.preheader_defs);
    preheader.truncate(keep);
}

/// Decide the shape of every loop, innermost first, stripping the statements
/// of recognized counted loops from the blocks.
pub fn classify(
    function: &mut WarpedFunction,
    graph: &FlowGraph,
    locals: &mut LocalTable,
    recognize_for: bool,
    notes: &mut Vec<Note>,
) -> BTreeMap<BlockId, LoopInfo> {
    let mut result = BTreeMap::new();
    for lp in graph.natural_loops() {
        let shape = classify_one(function, graph, &lp, locals, recognize_for, notes);
        debug!("[loops] function {}: loop at block {} is {:?}", function.id, lp.header, shape);
        result.insert(
            lp.header,
            LoopInfo {
                header: lp.header,
                body: lp.body.clone(),
                shape,
            },
        );
    }
    result
}

fn classify_one(
    function: &mut WarpedFunction,
    graph: &FlowGraph,
    lp: &NaturalLoop,
    locals: &mut LocalTable,
    recognize_for: bool,
    notes: &mut Vec<Note>,
) -> LoopShape {
    if recognize_for {
        let table = &*locals;
        let slot_of = |expression: &Expression| match expression {
            Expression::Local(id) => table.slot(*id),
            Expression::Slot(slot) => Some(*slot),
            _ => None,
        };
        let numeric = match_numeric(function, graph, lp, &slot_of, true);
        let generic = match_generic(function, graph, lp, &slot_of);
        match (numeric, generic) {
            (Match::Full(numeric), _) => {
                if let Some(variable) = as_local(&numeric.variable) {
                    strip_idiom(function, lp, &numeric.idiom);
                    mark_loop_variables(locals, &[variable]);
                    return LoopShape::NumericFor {
                        variable,
                        start: numeric.start,
                        stop: numeric.stop,
                        step: numeric.step,
                        body_entry: numeric.idiom.body_entry,
                        follow: numeric.idiom.follow,
                    };
                }
            }
            (_, Match::Full(generic)) => {
                let variables: Option<Vec<LocalId>> = generic.variables.iter().map(as_local).collect();
                if let Some(variables) = variables {
                    strip_idiom(function, lp, &generic.idiom);
                    mark_loop_variables(locals, &variables);
                    return LoopShape::GenericFor {
                        variables,
                        iterators: generic.iterators,
                        body_entry: generic.idiom.body_entry,
                        follow: generic.idiom.follow,
                    };
                }
            }
            (Match::Partial(detail), _) | (_, Match::Partial(detail)) => {
                warn!(
                    "function {}: loop at block {} resembles a for loop but {detail}",
                    function.id, lp.header
                );
                notes.push(Note::PartialLoopIdiom {
                    header: lp.header,
                    detail,
                });
            }
            (Match::No, Match::No) => {}
        }
    }

    // A header that only tests an exit is a pre-test loop, whatever the latch does.
    let header = &function.blocks[lp.header];
    if header.contents.is_empty() {
        if let Some((body_entry, follow, loop_on_true)) = split_targets(lp, &header.warp) {
            let condition = header.warp.condition().cloned().unwrap_or_default();
            let condition = if loop_on_true {
                condition
            } else {
                condition.negate()
            };
            return LoopShape::While {
                condition,
                body_entry,
                follow,
            };
        }
    }

    if let [latch] = lp.latches.as_slice() {
        if let Some((_, follow, _)) = split_targets(lp, &function.blocks[*latch].warp) {
            return LoopShape::Repeat {
                latch: *latch,
                follow,
            };
        }
    }

    let follow = lp
        .exits(graph)
        .into_iter()
        .map(|(_, target)| target)
        .min_by_key(|target| {
            (
                function.blocks[*target].warp == Warp::End,
                graph.rpo_index(*target),
            )
        });
    LoopShape::Endless { follow }
}

fn mark_loop_variables(locals: &mut LocalTable, variables: &[LocalId]) {
    for variable in variables {
        if let Some(info) = locals.get_mut(*variable) {
            info.kind = LocalKind::LoopVariable;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::Assignment;

    fn assign(destination: Expression, value: Expression) -> Statement {
        Statement::assign(destination, value)
    }

    fn local(id: usize) -> Expression {
        Expression::Local(LocalId(id))
    }

    /// for i = 1, 10 do g(i) end, with locals 0..=3 in slots 0..=3.
    fn counted_loop() -> (WarpedFunction, LocalTable) {
        counted_loop_with(Expression::binary(BinOp::Le, local(0), local(1)), true, 1.0)
    }

    /// A counted loop whose header runs `test`, entering the body when the
    /// test is `enter_on` and stepping by `step`.
    fn counted_loop_with(test: Expression, enter_on: bool, step: f64) -> (WarpedFunction, LocalTable) {
        let mut table = LocalTable::default();
        for (slot, name) in ["slot0", "slot1", "slot2", "i"].iter().enumerate() {
            table.push(slot as SlotIndex, name.to_string(), LocalKind::Variable);
        }
        let (true_target, false_target) = if enter_on { (2, 3) } else { (3, 2) };
        let function = WarpedFunction::new(
            0,
            0,
            vec![
                Block::new(
                    0,
                    vec![
                        assign(local(0), Expression::number(1.0)),
                        assign(local(1), Expression::number(10.0)),
                        assign(local(2), Expression::number(step)),
                    ],
                    Warp::Unconditional(1),
                ),
                Block::new(
                    1,
                    vec![],
                    Warp::Conditional {
                        condition: test,
                        true_target,
                        false_target,
                    },
                ),
                Block::new(
                    2,
                    vec![
                        assign(local(3), local(0)),
                        Statement::Call {
                            function: Expression::global("g"),
                            arguments: vec![local(3)],
                            line: 0,
                        },
                        assign(local(0), Expression::binary(BinOp::Add, local(0), local(2))),
                    ],
                    Warp::Unconditional(1),
                ),
                Block::new(3, vec![], Warp::End),
            ],
        );
        (function, table)
    }

    #[test]
    fn test_numeric_for_is_recognized_and_stripped() {
        let (mut function, mut table) = counted_loop();
        let graph = FlowGraph::new(&function);
        let mut notes = vec![];
        let loops = classify(&mut function, &graph, &mut table, true, &mut notes);
        let LoopShape::NumericFor {
            variable,
            start,
            stop,
            body_entry,
            follow,
            ..
        } = &loops[&1].shape
        else {
            panic!("expected a numeric for, got {:?}", loops[&1].shape);
        };
        assert_eq!(*variable, LocalId(3));
        assert_eq!(start, &Expression::number(1.0));
        assert_eq!(stop, &Expression::number(10.0));
        assert_eq!((*body_entry, *follow), (2, 3));
        assert!(function.blocks[0].contents.is_empty());
        assert_eq!(function.blocks[2].contents.len(), 1);
        assert_eq!(table.get(LocalId(3)).map(|l| l.kind), Some(LocalKind::LoopVariable));
        assert!(notes.is_empty());
    }

    #[test]
    fn test_disabled_recognition_yields_while() {
        let (mut function, mut table) = counted_loop();
        let graph = FlowGraph::new(&function);
        let loops = classify(&mut function, &graph, &mut table, false, &mut vec![]);
        assert!(matches!(loops[&1].shape, LoopShape::While { body_entry: 2, follow: 3, .. }));
        assert_eq!(function.blocks[2].contents.len(), 3);
    }

    #[test]
    fn test_counter_read_elsewhere_is_partial() {
        let (mut function, mut table) = counted_loop();
        function.blocks[3].contents.push(Statement::Return {
            values: vec![local(0)],
            line: 0,
        });
        let graph = FlowGraph::new(&function);
        let mut notes = vec![];
        let loops = classify(&mut function, &graph, &mut table, true, &mut notes);
        assert!(matches!(loops[&1].shape, LoopShape::While { .. }));
        assert!(matches!(notes.as_slice(), [Note::PartialLoopIdiom { header: 1, .. }]));
    }

    fn classify_counted(test: Expression, enter_on: bool, step: f64) -> (LoopShape, Vec<Note>) {
        let (mut function, mut table) = counted_loop_with(test, enter_on, step);
        let graph = FlowGraph::new(&function);
        let mut notes = vec![];
        let mut loops = classify(&mut function, &graph, &mut table, true, &mut notes);
        let shape = loops.remove(&1).map(|info| info.shape);
        (shape.unwrap(), notes)
    }

    #[test]
    fn test_strict_counter_test_is_partial() {
        // while i < l do ... end runs one iteration less than for i = 1, l
        let (shape, notes) = classify_counted(Expression::binary(BinOp::Lt, local(0), local(1)), true, 1.0);
        assert!(matches!(shape, LoopShape::While { body_entry: 2, follow: 3, .. }));
        assert!(matches!(
            notes.as_slice(),
            [Note::PartialLoopIdiom { header: 1, detail }] if detail.contains("strict")
        ));
    }

    #[test]
    fn test_test_that_exits_while_it_holds_is_partial() {
        // if i <= l then leave: the body runs only once the counter has passed the limit
        let test = Expression::binary(BinOp::Le, local(0), local(1));
        let (shape, notes) = classify_counted(test.clone(), false, 1.0);
        let LoopShape::While { condition, .. } = &shape else {
            panic!("expected a while loop, got {shape:?}");
        };
        assert_eq!(condition, &test.negate());
        assert!(matches!(notes.as_slice(), [Note::PartialLoopIdiom { header: 1, .. }]));
    }

    #[test]
    fn test_negated_exit_test_is_a_numeric_for() {
        let test = Expression::binary(BinOp::Le, local(0), local(1)).negate();
        let (shape, notes) = classify_counted(test, false, 1.0);
        assert!(matches!(shape, LoopShape::NumericFor { body_entry: 2, follow: 3, .. }));
        assert!(notes.is_empty());
    }

    #[test]
    fn test_mirrored_comparison_is_a_numeric_for() {
        // l >= i
        let (shape, notes) = classify_counted(Expression::binary(BinOp::Ge, local(1), local(0)), true, 1.0);
        assert!(matches!(shape, LoopShape::NumericFor { .. }));
        assert!(notes.is_empty());
    }

    #[test]
    fn test_descending_loop_needs_a_negative_step() {
        let descending = Expression::binary(BinOp::Ge, local(0), local(1));
        let (shape, notes) = classify_counted(descending.clone(), true, -1.0);
        let LoopShape::NumericFor { step, .. } = &shape else {
            panic!("expected a numeric for, got {shape:?}");
        };
        assert_eq!(step, &Expression::number(-1.0));
        assert!(notes.is_empty());

        let (shape, notes) = classify_counted(descending, true, 1.0);
        assert!(matches!(shape, LoopShape::While { .. }));
        assert!(matches!(notes.as_slice(), [Note::PartialLoopIdiom { header: 1, .. }]));

        let ascending = Expression::binary(BinOp::Le, local(0), local(1));
        let (shape, _) = classify_counted(ascending, true, -1.0);
        assert!(matches!(shape, LoopShape::While { .. }));
    }

    /// for k, v in pairs(t) do g(k, v) end over locals 0..=4 in slots 0..=4,
    /// with the header testing `test` and entering the body when it is `enter_on`.
    fn iterator_loop(test: Expression, enter_on: bool) -> (WarpedFunction, LocalTable) {
        let mut table = LocalTable::default();
        for (slot, name) in ["slot0", "slot1", "slot2", "k", "v"].iter().enumerate() {
            table.push(slot as SlotIndex, name.to_string(), LocalKind::Variable);
        }
        let (true_target, false_target) = if enter_on { (2, 3) } else { (3, 2) };
        let function = WarpedFunction::new(
            0,
            0,
            vec![
                Block::new(
                    0,
                    vec![Statement::Assignment(Assignment {
                        destinations: vec![local(0), local(1), local(2)],
                        expressions: vec![Expression::call(
                            Expression::global("pairs"),
                            vec![Expression::global("t")],
                        )],
                        declares: false,
                        line: 0,
                    })],
                    Warp::Unconditional(1),
                ),
                Block::new(
                    1,
                    vec![Statement::Assignment(Assignment {
                        destinations: vec![local(3), local(4)],
                        expressions: vec![Expression::call(local(0), vec![local(1), local(2)])],
                        declares: false,
                        line: 0,
                    })],
                    Warp::Conditional {
                        condition: test,
                        true_target,
                        false_target,
                    },
                ),
                Block::new(
                    2,
                    vec![
                        Statement::Call {
                            function: Expression::global("g"),
                            arguments: vec![local(3), local(4)],
                            line: 0,
                        },
                        assign(local(2), local(3)),
                    ],
                    Warp::Unconditional(1),
                ),
                Block::new(3, vec![], Warp::End),
            ],
        );
        (function, table)
    }

    fn nil() -> Expression {
        Expression::Constant(Constant::Nil)
    }

    #[test]
    fn test_generic_for_with_either_nil_test() {
        for (test, enter_on) in [
            (Expression::binary(BinOp::Neq, local(3), nil()), true),
            (Expression::binary(BinOp::Eq, local(3), nil()), false),
            (Expression::binary(BinOp::Eq, nil(), local(3)).negate(), true),
        ] {
            let (mut function, mut table) = iterator_loop(test.clone(), enter_on);
            let graph = FlowGraph::new(&function);
            let mut notes = vec![];
            let loops = classify(&mut function, &graph, &mut table, true, &mut notes);
            let LoopShape::GenericFor {
                variables,
                iterators,
                body_entry,
                follow,
            } = &loops[&1].shape
            else {
                panic!("{test:?}: expected a generic for, got {:?}", loops[&1].shape);
            };
            assert_eq!(variables, &vec![LocalId(3), LocalId(4)]);
            assert_eq!(iterators.len(), 1);
            assert_eq!((*body_entry, *follow), (2, 3));
            assert!(function.blocks[1].contents.is_empty());
            assert!(notes.is_empty());
        }
    }

    #[test]
    fn test_iterator_test_that_loops_on_nil_is_partial() {
        // if k == nil then enter the body
        let (mut function, mut table) = iterator_loop(Expression::binary(BinOp::Eq, local(3), nil()), true);
        let graph = FlowGraph::new(&function);
        let mut notes = vec![];
        let loops = classify(&mut function, &graph, &mut table, true, &mut notes);
        assert!(!matches!(loops[&1].shape, LoopShape::GenericFor { .. }));
        assert_eq!(function.blocks[1].contents.len(), 1);
        assert!(matches!(
            notes.as_slice(),
            [Note::PartialLoopIdiom { header: 1, detail }] if detail.contains("nil")
        ));
    }

    #[test]
    fn test_exit_test_in_header_wins_over_conditional_latch() {
        // while c do f() if d then break end end
        let mut table = LocalTable::default();
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
                Block::new(
                    2,
                    vec![Statement::Call {
                        function: Expression::global("f"),
                        arguments: vec![],
                        line: 0,
                    }],
                    Warp::Conditional {
                        condition: Expression::global("d"),
                        true_target: 3,
                        false_target: 1,
                    },
                ),
                Block::new(3, vec![], Warp::End),
            ],
        );
        let graph = FlowGraph::new(&function);
        let loops = classify(&mut function, &graph, &mut table, true, &mut vec![]);
        assert_eq!(
            loops[&1].shape,
            LoopShape::While {
                condition: Expression::global("c"),
                body_entry: 2,
                follow: 3,
            }
        );
    }

    #[test]
    fn test_slot_level_copy_is_reported() {
        let (function, table) = counted_loop();
        let mut function = function;
        for block in function.blocks.iter_mut() {
            for statement in block.contents.iter_mut() {
                for operand in statement.operands_mut() {
                    operand.visit_mut(&mut |e| {
                        if let Expression::Local(id) = e {
                            *e = Expression::Slot(table.slot(*id).unwrap_or_default());
                        }
                    });
                }
                if let Statement::Assignment(Assignment { destinations, .. }) = statement {
                    for destination in destinations.iter_mut() {
                        if let Expression::Local(id) = destination {
                            *destination = Expression::Slot(table.slot(*id).unwrap_or_default());
                        }
                    }
                }
            }
            if let Some(condition) = block.warp.condition_mut() {
                condition.visit_mut(&mut |e| {
                    if let Expression::Local(id) = e {
                        *e = Expression::Slot(table.slot(*id).unwrap_or_default());
                    }
                });
            }
        }
        let graph = FlowGraph::new(&function);
        assert_eq!(loop_variable_copies(&function, &graph), vec![(2, 3)]);
    }

    #[test]
    fn test_repeat_and_endless_loops() {
        // 0 -> 1; 1: body, until c -> 2 else 1
        let mut table = LocalTable::default();
        let mut function = WarpedFunction::new(
            0,
            0,
            vec![
                Block::new(0, vec![], Warp::Unconditional(1)),
                Block::new(
                    1,
                    vec![Statement::Call {
                        function: Expression::global("f"),
                        arguments: vec![],
                        line: 0,
                    }],
                    Warp::Conditional {
                        condition: Expression::global("c"),
                        true_target: 2,
                        false_target: 1,
                    },
                ),
                Block::new(2, vec![], Warp::End),
            ],
        );
        let graph = FlowGraph::new(&function);
        let loops = classify(&mut function, &graph, &mut table, true, &mut vec![]);
        assert_eq!(loops[&1].shape, LoopShape::Repeat { latch: 1, follow: 2 });

        let mut endless = WarpedFunction::new(
            1,
            0,
            vec![
                Block::new(0, vec![], Warp::Unconditional(1)),
                Block::new(
                    1,
                    vec![Statement::Call {
                        function: Expression::global("f"),
                        arguments: vec![],
                        line: 0,
                    }],
                    Warp::Unconditional(1),
                ),
            ],
        );
        let graph = FlowGraph::new(&endless);
        let loops = classify(&mut endless, &graph, &mut table, true, &mut vec![]);
        assert_eq!(loops[&1].shape, LoopShape::Endless { follow: None });
    }
}
