// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Cleanups on the structured tree.
//!
//! - `x = a; if not x then x = b end` becomes `x = a or b` (and the `and` form),
//!   with the folded value inlined into the next statement when `x` has no other use.
//! - `if c then <exit> else REST end` becomes `if c then <exit> end REST`.
//! - Double negations and negated equalities in tests are folded, negated tests
//!   with an `else` are flipped and empty `else` arms dropped.

use crate::nodes::{BinOp, Expression, LocalId, Statement, UnOp};
use crate::structured::{ends_in_exit, Node, StructuredFunction};
use log::debug;
use std::collections::BTreeMap;

/// Apply all cleanups to a fixed point. Returns the number of rewrites.
pub fn run(function: &mut StructuredFunction) -> usize {
    let mut total = 0;
    loop {
        let mut rewrites = 0;
        let uses = count_occurrences(&function.body);
        rewrites += fold_value_short_circuits(&mut function.body, &uses);
        rewrites += hoist_guards(&mut function.body);
        rewrites += simplify_ifs(&mut function.body);
        if rewrites == 0 {
            break;
        }
        total += rewrites;
    }
    debug!("[finalizer] function {}: {total} rewrites", function.id);
    total
}

/// Occurrences of each local anywhere in the tree, declarations included.
fn count_occurrences(body: &[Node]) -> BTreeMap<LocalId, usize> {
    let mut uses = BTreeMap::new();
    let mut add = |local: LocalId| *uses.entry(local).or_default() += 1;
    crate::structured::walk(body, &mut |node| {
        for local in node.defined_locals() {
            add(local);
        }
        for expression in node.expressions() {
            expression.locals().for_each(&mut add);
        }
    });
    uses
}

/// `x` or `not x`, returning `x` and whether it is negated.
fn tested_local(condition: &Expression) -> Option<(LocalId, bool)> {
    match condition {
        Expression::Local(local) => Some((*local, false)),
        Expression::Unary {
            op: UnOp::Not,
            operand,
        } => match operand.as_ref() {
            Expression::Local(local) => Some((*local, true)),
            _ => None,
        },
        _ => None,
    }
}

fn assigned_value(node: &Node, local: LocalId) -> Option<&Expression> {
    match node {
        Node::Statement(Statement::Assignment(assignment))
            if assignment.destinations == [Expression::Local(local)]
                && assignment.expressions.len() == 1 =>
        {
            Some(&assignment.expressions[0])
        }
        _ => None,
    }
}

fn fold_value_short_circuits(body: &mut Vec<Node>, uses: &BTreeMap<LocalId, usize>) -> usize {
    let mut rewrites = 0;
    for node in body.iter_mut() {
        for nested in node.bodies_mut() {
            rewrites += fold_value_short_circuits(nested, uses);
        }
    }

    let mut index = 1;
    while index < body.len() {
        if let Some(folded) = value_short_circuit(&body[index - 1], &body[index]) {
            if let Node::Statement(Statement::Assignment(assignment)) = &mut body[index - 1] {
                assignment.expressions = vec![folded];
            }
            body.remove(index);
            rewrites += 1;
            if inline_single_use(body, index - 1, uses) {
                rewrites += 1;
            }
            continue;
        }
        index += 1;
    }
    rewrites
}

fn value_short_circuit(first: &Node, second: &Node) -> Option<Expression> {
    let Node::If {
        condition,
        then_body,
        else_body: None,
    } = second
    else {
        return None;
    };
    let (local, negated) = tested_local(condition)?;
    let a = assigned_value(first, local)?;
    let [then_node] = then_body.as_slice() else {
        return None;
    };
    let b = assigned_value(then_node, local)?;
    if let Node::Statement(Statement::Assignment(assignment)) = then_node {
        if assignment.declares {
            return None;
        }
    }
    if a.count_local(local) > 0 || b.count_local(local) > 0 {
        return None;
    }
    let op = if negated { BinOp::Or } else { BinOp::And };
    Some(Expression::binary(op, a.clone(), b.clone()))
}

/// Move a freshly folded `local x = a or b` into the statement right after it
/// when that statement is the only reader of `x`.
fn inline_single_use(body: &mut Vec<Node>, index: usize, uses: &BTreeMap<LocalId, usize>) -> bool {
    let Some(Node::Statement(Statement::Assignment(assignment))) = body.get(index) else {
        return false;
    };
    let [Expression::Local(local)] = assignment.destinations.as_slice() else {
        return false;
    };
    let local = *local;
    let value = assignment.expressions[0].clone();
    // Before folding: the definition, the test, the second write and one read.
    if value.has_call() || uses.get(&local).copied() != Some(4) {
        return false;
    }
    let Some(Node::Statement(next)) = body.get_mut(index + 1) else {
        return false;
    };
    if next.read_locals().iter().filter(|l| **l == local).count() != 1
        || next.written_locals().contains(&local)
    {
        return false;
    }
    let mut replacement = Some(value);
    for operand in next.operands_mut() {
        substitute_local(operand, local, &mut replacement);
    }
    if replacement.is_some() {
        return false;
    }
    body.remove(index);
    true
}

fn substitute_local(expression: &mut Expression, local: LocalId, replacement: &mut Option<Expression>) {
    if *expression == Expression::Local(local) {
        if let Some(value) = replacement.take() {
            *expression = value;
        }
        return;
    }
    if matches!(expression, Expression::Closure { .. }) {
        return;
    }
    for child in expression.children_mut() {
        substitute_local(child, local, replacement);
    }
}

/// `if c then <exit> else REST end` → `if c then <exit> end REST`.
fn hoist_guards(body: &mut Vec<Node>) -> usize {
    let mut rewrites = 0;
    for node in body.iter_mut() {
        for nested in node.bodies_mut() {
            rewrites += hoist_guards(nested);
        }
    }
    let mut index = 0;
    while index < body.len() {
        if let Node::If {
            then_body,
            else_body,
            ..
        } = &mut body[index]
        {
            if ends_in_exit(then_body) && else_body.is_some() {
                let rest = else_body.take().unwrap_or_default();
                let count = rest.len();
                let tail = body.split_off(index + 1);
                body.extend(rest);
                body.extend(tail);
                rewrites += 1;
                index += count;
            }
        }
        index += 1;
    }
    rewrites
}

fn is_negation(condition: &Expression) -> bool {
    matches!(
        condition,
        Expression::Unary {
            op: UnOp::Not,
            ..
        } | Expression::Binary {
            op: BinOp::Neq,
            ..
        }
    )
}

/// `not not c` → `c` and `not (a == b)` → `a ~= b`.
fn normalize_condition(condition: &mut Expression) -> bool {
    let Expression::Unary {
        op: UnOp::Not,
        operand,
    } = condition
    else {
        return false;
    };
    if !matches!(
        operand.as_ref(),
        Expression::Unary { op: UnOp::Not, .. }
            | Expression::Binary {
                op: BinOp::Eq | BinOp::Neq,
                ..
            }
    ) {
        return false;
    }
    let inner = std::mem::take(operand.as_mut());
    *condition = inner.negate();
    true
}

/// Normalize negated tests, drop empty else arms and flip `if not c then A else B end`.
fn simplify_ifs(body: &mut [Node]) -> usize {
    let mut rewrites = 0;
    for node in body.iter_mut() {
        for nested in node.bodies_mut() {
            rewrites += simplify_ifs(nested);
        }
        if let Node::If { condition, .. }
        | Node::While { condition, .. }
        | Node::RepeatUntil { condition, .. } = node
        {
            if normalize_condition(condition) {
                rewrites += 1;
            }
        }
        if let Node::If {
            condition,
            then_body,
            else_body,
        } = node
        {
            if else_body.as_ref().is_some_and(Vec::is_empty) {
                *else_body = None;
                rewrites += 1;
            }
            if let Some(other) = else_body {
                if is_negation(condition) && !other.is_empty() {
                    *condition = std::mem::take(condition).negate();
                    std::mem::swap(then_body, other);
                    rewrites += 1;
                }
            }
        }
    }
    rewrites
}
