// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Structural checks on both tree forms.
//!
//! The warped check guards the pipeline input and, when enabled, the output of
//! every graph pass. The unwarped check runs on every final tree: no raw slot
//! survives, every local is declared exactly once before use in an enclosing
//! scope, `break` sits inside a loop and exits close their block.

use crate::graph::FlowGraph;
use crate::nodes::{BlockId, Expression, LocalId, SlotIndex, Statement};
use crate::structured::{LocalTable, Node, StructuredFunction};
use crate::warped::WarpedFunction;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("function has no blocks")]
    EmptyFunction,
    #[error("block at index {index} carries id {id}")]
    BlockIdMismatch { index: usize, id: BlockId },
    #[error("block {block} jumps to missing block {target}")]
    DanglingTarget { block: BlockId, target: BlockId },
    #[error("block {block} has statements after a return")]
    MisplacedReturn { block: BlockId },
    #[error("block {block} returns but still jumps to a successor")]
    ReturnWithSuccessor { block: BlockId },
    #[error("block {block} reads slot {slot} which no path defines")]
    UndefinedSlot { block: BlockId, slot: SlotIndex },
    #[error("block {block} instantiates missing child prototype {prototype}")]
    MissingPrototype { block: BlockId, prototype: usize },
    #[error("block {block} holds a declaration before structuring")]
    UnexpectedDeclaration { block: BlockId },
    #[error("slot {slot} was never resolved to a local")]
    UnresolvedSlot { slot: SlotIndex },
    #[error("break outside of any loop")]
    BreakOutsideLoop,
    #[error("{statement} is not the last statement of its block")]
    ExitNotLast { statement: &'static str },
    #[error("local {local} is used outside the scope of its declaration")]
    UndeclaredLocal { local: LocalId },
    #[error("local {local} is declared more than once")]
    DuplicateDeclaration { local: LocalId },
    #[error("local {local} is not in the local table")]
    UnknownLocal { local: LocalId },
}

/// Check a jump graph. Slot reads are checked only while slots are present.
pub fn validate_warped(function: &WarpedFunction) -> Result<(), Violation> {
    if function.blocks.is_empty() {
        return Err(Violation::EmptyFunction);
    }
    let count = function.blocks.len();
    for (index, block) in function.blocks.iter().enumerate() {
        if block.id != index {
            return Err(Violation::BlockIdMismatch {
                index,
                id: block.id,
            });
        }
        if let Some(target) = block.warp.targets().into_iter().find(|target| *target >= count) {
            return Err(Violation::DanglingTarget {
                block: index,
                target,
            });
        }
        if let Some(position) = block.contents.iter().position(Statement::is_return) {
            if position + 1 != block.contents.len() {
                return Err(Violation::MisplacedReturn { block: index });
            }
            if !block.warp.targets().is_empty() {
                return Err(Violation::ReturnWithSuccessor { block: index });
            }
        }
        for statement in &block.contents {
            let declares = match statement {
                Statement::Declare { .. } => true,
                Statement::Assignment(assignment) => assignment.declares,
                _ => false,
            };
            if declares {
                return Err(Violation::UnexpectedDeclaration { block: index });
            }
        }
    }
    check_defined_slots(function)
}

/// Every closure must instantiate one of the function's own children.
pub fn validate_prototypes(function: &WarpedFunction) -> Result<(), Violation> {
    for block in &function.blocks {
        for operand in block.contents.iter().flat_map(Statement::operands) {
            for node in operand.iter() {
                if let Expression::Closure { prototype, .. } = node {
                    if *prototype >= function.children.len() {
                        return Err(Violation::MissingPrototype {
                            block: block.id,
                            prototype: *prototype,
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

/// Forward may-be-defined analysis: a read of a slot that no path has
/// written cannot come from the source program.
fn check_defined_slots(function: &WarpedFunction) -> Result<(), Violation> {
    let graph = FlowGraph::new(function);
    let count = function.blocks.len();
    let mut defined_out: Vec<BTreeSet<SlotIndex>> = vec![BTreeSet::new(); count];
    let entry_state: BTreeSet<SlotIndex> = (0..function.parameters).collect();
    let entry_of = |block: BlockId, defined_out: &[BTreeSet<SlotIndex>]| {
        let mut state = if block == function.entry() {
            entry_state.clone()
        } else {
            BTreeSet::new()
        };
        for &predecessor in graph.predecessors(block) {
            state.extend(defined_out[predecessor].iter().copied());
        }
        state
    };

    let mut changed = true;
    while changed {
        changed = false;
        for &block in graph.reverse_postorder() {
            let mut state = entry_of(block, &defined_out);
            for statement in &function.blocks[block].contents {
                state.extend(statement.written_slots());
            }
            if state != defined_out[block] {
                defined_out[block] = state;
                changed = true;
            }
        }
    }

    for &block in graph.reverse_postorder() {
        let data = &function.blocks[block];
        let mut state = entry_of(block, &defined_out);
        for statement in &data.contents {
            if let Some(slot) = statement.read_slots().into_iter().find(|s| !state.contains(s)) {
                return Err(Violation::UndefinedSlot { block, slot });
            }
            state.extend(statement.written_slots());
        }
        if let Some(slot) = data.warp_reads().into_iter().find(|s| !state.contains(s)) {
            return Err(Violation::UndefinedSlot { block, slot });
        }
    }
    Ok(())
}

struct ScopeChecker<'a> {
    locals: &'a LocalTable,
    scopes: Vec<BTreeSet<LocalId>>,
    declared: BTreeSet<LocalId>,
    loop_depth: usize,
}

impl ScopeChecker<'_> {
    fn known(&self, local: LocalId) -> Result<(), Violation> {
        match self.locals.get(local) {
            Some(_) => Ok(()),
            None => Err(Violation::UnknownLocal { local }),
        }
    }

    fn declare(&mut self, local: LocalId) -> Result<(), Violation> {
        self.known(local)?;
        if !self.declared.insert(local) {
            return Err(Violation::DuplicateDeclaration { local });
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(local);
        }
        Ok(())
    }

    fn in_scope(&self, local: LocalId) -> Result<(), Violation> {
        self.known(local)?;
        if self.scopes.iter().any(|scope| scope.contains(&local)) {
            Ok(())
        } else {
            Err(Violation::UndeclaredLocal { local })
        }
    }

    fn expression(&self, expression: &Expression) -> Result<(), Violation> {
        for node in expression.iter() {
            match node {
                Expression::Slot(slot) => return Err(Violation::UnresolvedSlot { slot: *slot }),
                Expression::Local(local) => self.in_scope(*local)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn statement(&mut self, statement: &Statement) -> Result<(), Violation> {
        for operand in statement.operands() {
            self.expression(operand)?;
        }
        match statement {
            Statement::Declare { locals } => {
                for local in locals {
                    self.declare(*local)?;
                }
            }
            Statement::Assignment(assignment) => {
                for destination in &assignment.destinations {
                    match destination {
                        Expression::Slot(slot) => {
                            return Err(Violation::UnresolvedSlot { slot: *slot })
                        }
                        Expression::Local(local) if assignment.declares => self.declare(*local)?,
                        Expression::Local(local) => self.in_scope(*local)?,
                        _ => {}
                    }
                }
            }
            Statement::Call { .. } | Statement::Return { .. } => {}
        }
        Ok(())
    }

    fn scoped(&mut self, body: &[Node], extra: &[LocalId]) -> Result<(), Violation> {
        self.scopes.push(BTreeSet::new());
        for local in extra {
            self.declare(*local)?;
        }
        let result = self.body(body);
        self.scopes.pop();
        result
    }

    fn body(&mut self, body: &[Node]) -> Result<(), Violation> {
        for (index, node) in body.iter().enumerate() {
            let last = index + 1 == body.len();
            match node {
                Node::Statement(statement) => {
                    if statement.is_return() && !last {
                        return Err(Violation::ExitNotLast { statement: "return" });
                    }
                    self.statement(statement)?;
                }
                Node::Break => {
                    if self.loop_depth == 0 {
                        return Err(Violation::BreakOutsideLoop);
                    }
                    if !last {
                        return Err(Violation::ExitNotLast { statement: "break" });
                    }
                }
                Node::Block(nested) => self.scoped(nested, &[])?,
                Node::If {
                    condition,
                    then_body,
                    else_body,
                } => {
                    self.expression(condition)?;
                    self.scoped(then_body, &[])?;
                    if let Some(else_body) = else_body {
                        self.scoped(else_body, &[])?;
                    }
                }
                Node::While { condition, body } => {
                    self.expression(condition)?;
                    self.looped(body, &[])?;
                }
                Node::RepeatUntil { body, condition } => {
                    // The condition sees the body's locals.
                    self.loop_depth += 1;
                    self.scopes.push(BTreeSet::new());
                    let result = self.body(body).and_then(|_| self.expression(condition));
                    self.scopes.pop();
                    self.loop_depth -= 1;
                    result?;
                }
                Node::NumericFor {
                    variable,
                    start,
                    stop,
                    step,
                    body,
                } => {
                    for expression in [start, stop, step] {
                        self.expression(expression)?;
                    }
                    self.looped(body, &[*variable])?;
                }
                Node::GenericFor {
                    variables,
                    iterators,
                    body,
                } => {
                    for expression in iterators {
                        self.expression(expression)?;
                    }
                    self.looped(body, variables)?;
                }
            }
        }
        Ok(())
    }

    fn looped(&mut self, body: &[Node], variables: &[LocalId]) -> Result<(), Violation> {
        self.loop_depth += 1;
        let result = self.scoped(body, variables);
        self.loop_depth -= 1;
        result
    }
}

/// Check a structured tree. Nested prototypes are checked when they are produced.
pub fn validate_unwarped(function: &StructuredFunction) -> Result<(), Violation> {
    let mut checker = ScopeChecker {
        locals: &function.locals,
        scopes: vec![BTreeSet::new()],
        declared: BTreeSet::new(),
        loop_depth: 0,
    };
    for parameter in &function.parameters {
        checker.declare(*parameter)?;
    }
    checker.body(&function.body)
}
