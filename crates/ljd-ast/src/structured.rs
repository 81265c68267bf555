// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! The structured tree produced by unwarping, and the local name table handed to the emitter.

use crate::error::AnalysisFailure;
use crate::nodes::{BlockId, Expression, LocalId, PrototypeId, SlotIndex, Statement};
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Statement(Statement),
    /// An explicit `do ... end` scope.
    Block(Vec<Node>),
    If {
        condition: Expression,
        then_body: Vec<Node>,
        else_body: Option<Vec<Node>>,
    },
    While {
        condition: Expression,
        body: Vec<Node>,
    },
    RepeatUntil {
        body: Vec<Node>,
        condition: Expression,
    },
    NumericFor {
        variable: LocalId,
        start: Expression,
        stop: Expression,
        step: Expression,
        body: Vec<Node>,
    },
    GenericFor {
        variables: Vec<LocalId>,
        iterators: Vec<Expression>,
        body: Vec<Node>,
    },
    Break,
}

impl Node {
    pub fn is_loop(&self) -> bool {
        matches!(
            self,
            Node::While { .. }
                | Node::RepeatUntil { .. }
                | Node::NumericFor { .. }
                | Node::GenericFor { .. }
        )
    }

    /// Nested statement lists, in source order.
    pub fn bodies(&self) -> Vec<&Vec<Node>> {
        match self {
            Node::Statement(_) | Node::Break => vec![],
            Node::Block(body)
            | Node::While { body, .. }
            | Node::RepeatUntil { body, .. }
            | Node::NumericFor { body, .. }
            | Node::GenericFor { body, .. } => vec![body],
            Node::If {
                then_body,
                else_body,
                ..
            } => std::iter::once(then_body).chain(else_body.iter()).collect(),
        }
    }

    pub fn bodies_mut(&mut self) -> Vec<&mut Vec<Node>> {
        match self {
            Node::Statement(_) | Node::Break => vec![],
            Node::Block(body)
            | Node::While { body, .. }
            | Node::RepeatUntil { body, .. }
            | Node::NumericFor { body, .. }
            | Node::GenericFor { body, .. } => vec![body],
            Node::If {
                then_body,
                else_body,
                ..
            } => std::iter::once(then_body)
                .chain(else_body.iter_mut())
                .collect(),
        }
    }

    /// Expressions owned by this node itself, excluding nested bodies.
    pub fn expressions(&self) -> Vec<&Expression> {
        match self {
            Node::Statement(statement) => statement.operands(),
            Node::Block(_) | Node::Break => vec![],
            Node::If { condition, .. }
            | Node::While { condition, .. }
            | Node::RepeatUntil { condition, .. } => vec![condition],
            Node::NumericFor {
                start, stop, step, ..
            } => vec![start, stop, step],
            Node::GenericFor { iterators, .. } => iterators.iter().collect(),
        }
    }

    /// True when control never falls through to the next sibling.
    pub fn terminates(&self) -> bool {
        match self {
            Node::Break => true,
            Node::Statement(statement) => statement.is_return(),
            Node::Block(body) => ends_in_exit(body),
            Node::If {
                then_body,
                else_body: Some(else_body),
                ..
            } => ends_in_exit(then_body) && ends_in_exit(else_body),
            _ => false,
        }
    }

    /// Locals this node writes or declares at its own level.
    pub fn defined_locals(&self) -> Vec<LocalId> {
        match self {
            Node::Statement(statement) => statement.written_locals(),
            Node::NumericFor { variable, .. } => vec![*variable],
            Node::GenericFor { variables, .. } => variables.clone(),
            _ => vec![],
        }
    }
}

pub fn ends_in_exit(body: &[Node]) -> bool {
    body.last().is_some_and(Node::terminates)
}

/// Visit every node of a body in pre-order.
pub fn walk<'a>(body: &'a [Node], f: &mut impl FnMut(&'a Node)) {
    for node in body {
        f(node);
        for nested in node.bodies() {
            walk(nested, f);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalKind {
    Parameter,
    Variable,
    /// Declared by the header of a numeric or generic `for`.
    LoopVariable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalInfo {
    pub id: LocalId,
    /// The register the variable lived in.
    pub slot: SlotIndex,
    pub name: String,
    pub kind: LocalKind,
}

/// Resolved locals of one function, indexed by [`LocalId`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalTable {
    locals: Vec<LocalInfo>,
}

impl LocalTable {
    pub fn push(&mut self, slot: SlotIndex, name: String, kind: LocalKind) -> LocalId {
        let id = LocalId(self.locals.len());
        self.locals.push(LocalInfo {
            id,
            slot,
            name,
            kind,
        });
        id
    }

    pub fn get(&self, id: LocalId) -> Option<&LocalInfo> {
        self.locals.get(id.0)
    }

    pub fn get_mut(&mut self, id: LocalId) -> Option<&mut LocalInfo> {
        self.locals.get_mut(id.0)
    }

    pub fn slot(&self, id: LocalId) -> Option<SlotIndex> {
        self.get(id).map(|info| info.slot)
    }

    pub fn name(&self, id: LocalId) -> String {
        self.get(id)
            .map(|info| info.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocalInfo> {
        self.locals.iter()
    }

    pub fn len(&self) -> usize {
        self.locals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    /// Locals that share `slot`, in creation order.
    pub fn by_slot(&self, slot: SlotIndex) -> Vec<LocalId> {
        self.locals
            .iter()
            .filter(|info| info.slot == slot)
            .map(|info| info.id)
            .collect()
    }
}

/// A non-fatal observation recorded while structuring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Note {
    /// A loop carried part of a counted-loop idiom and was rendered as a plain loop.
    PartialLoopIdiom { header: BlockId, detail: String },
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Note::PartialLoopIdiom { header, detail } => {
                write!(f, "partial for-loop idiom at block {header}: {detail}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructuredFunction {
    pub id: PrototypeId,
    pub parameters: Vec<LocalId>,
    pub is_variadic: bool,
    pub body: Vec<Node>,
    pub locals: LocalTable,
    pub notes: Vec<Note>,
    /// Results for nested prototypes, in prototype order.
    pub children: Vec<Result<StructuredFunction, AnalysisFailure>>,
}

impl StructuredFunction {
    /// Every node in pre-order.
    pub fn nodes(&self) -> Vec<&Node> {
        let mut result = vec![];
        walk(&self.body, &mut |node| result.push(node));
        result
    }
}
