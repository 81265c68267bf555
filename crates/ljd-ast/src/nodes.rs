// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Expression and statement nodes shared by the warped and the structured trees.
//!
//! Both trees use the same leaf vocabulary. They differ only in how control
//! flow is expressed: warps between blocks in one, nested constructs in the other.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem;

/// Index of a virtual register slot.
pub type SlotIndex = u16;

/// Index of a block in a function's block arena.
pub type BlockId = usize;

/// Identity of a resolved local variable, an index into the function's [`LocalTable`].
///
/// [`LocalTable`]: crate::structured::LocalTable
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub usize);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Identity of a function prototype, assigned by the builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrototypeId(pub usize);

impl fmt::Display for PrototypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Number(f64),
    String(String),
}

impl Constant {
    /// Lua truthiness: only `nil` and `false` are false.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Constant::Nil | Constant::Boolean(false))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Not,
    Minus,
    Length,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
            BinOp::Concat => "..",
            BinOp::Eq => "==",
            BinOp::Neq => "~=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Raw register read or write target, present until slot resolution.
    Slot(SlotIndex),
    Local(LocalId),
    Upvalue(u16),
    Global(String),
    Constant(Constant),
    Vararg,
    Index {
        table: Box<Expression>,
        key: Box<Expression>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Call {
        function: Box<Expression>,
        #[serde(default)]
        arguments: Vec<Expression>,
    },
    /// Instantiation of a child prototype. `captures` are the enclosing
    /// function's variables bound as the child's upvalues, in upvalue order.
    Closure {
        prototype: usize,
        #[serde(default)]
        captures: Vec<Expression>,
    },
    Table {
        #[serde(default)]
        array: Vec<Expression>,
        #[serde(default)]
        records: Vec<(Expression, Expression)>,
    },
}

impl Default for Expression {
    fn default() -> Self {
        Expression::Constant(Constant::Nil)
    }
}

/// Visit the direct children of an expression in evaluation order.
/// Pass `as_expr_ref` for immutable access, `as_expr_mut` for mutable access.
macro_rules! traverse_expression {
    ($target:expr, $deref:ident, |$value:ident| $action:expr) => {
        match $target {
            Expression::Slot(_)
            | Expression::Local(_)
            | Expression::Upvalue(_)
            | Expression::Global(_)
            | Expression::Constant(_)
            | Expression::Vararg => {}
            Expression::Index { table, key } => {
                let $value = table.$deref();
                $action;
                let $value = key.$deref();
                $action;
            }
            Expression::Unary { operand, .. } => {
                let $value = operand.$deref();
                $action;
            }
            Expression::Binary { lhs, rhs, .. } => {
                let $value = lhs.$deref();
                $action;
                let $value = rhs.$deref();
                $action;
            }
            Expression::Call {
                function,
                arguments,
            } => {
                let $value = function.$deref();
                $action;
                for $value in arguments {
                    $action;
                }
            }
            Expression::Closure { captures, .. } => {
                for $value in captures {
                    $action;
                }
            }
            Expression::Table { array, records } => {
                for $value in array {
                    $action;
                }
                for (record_key, record_value) in records {
                    let $value = record_key.$deref();
                    $action;
                    let $value = record_value.$deref();
                    $action;
                }
            }
        }
    };
}

impl Expression {
    pub fn slot(slot: SlotIndex) -> Expression {
        Expression::Slot(slot)
    }

    pub fn local(id: LocalId) -> Expression {
        Expression::Local(id)
    }

    pub fn boolean(value: bool) -> Expression {
        Expression::Constant(Constant::Boolean(value))
    }

    pub fn number(value: f64) -> Expression {
        Expression::Constant(Constant::Number(value))
    }

    pub fn global(name: &str) -> Expression {
        Expression::Global(name.to_string())
    }

    pub fn binary(op: BinOp, lhs: Expression, rhs: Expression) -> Expression {
        Expression::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn call(function: Expression, arguments: Vec<Expression>) -> Expression {
        Expression::Call {
            function: Box::new(function),
            arguments,
        }
    }

    pub fn index(table: Expression, key: Expression) -> Expression {
        Expression::Index {
            table: Box::new(table),
            key: Box::new(key),
        }
    }

    /// Logical negation, folding double negation, `==`/`~=` and constants.
    ///
    /// Ordering comparisons are wrapped rather than inverted: `not (a < b)`
    /// differs from `a >= b` when either side is NaN.
    pub fn negate(self) -> Expression {
        match self {
            Expression::Unary {
                op: UnOp::Not,
                operand,
            } => *operand,
            Expression::Binary {
                op: BinOp::Eq,
                lhs,
                rhs,
            } => Expression::Binary {
                op: BinOp::Neq,
                lhs,
                rhs,
            },
            Expression::Binary {
                op: BinOp::Neq,
                lhs,
                rhs,
            } => Expression::Binary {
                op: BinOp::Eq,
                lhs,
                rhs,
            },
            Expression::Constant(constant) => Expression::boolean(!constant.is_truthy()),
            other => Expression::Unary {
                op: UnOp::Not,
                operand: Box::new(other),
            },
        }
    }

    /// All nodes of this expression in pre-order, which is evaluation order for leaves.
    pub fn iter(&self) -> impl Iterator<Item = &Expression> {
        fn collect<'a>(node: &'a Expression, result: &mut Vec<&'a Expression>) {
            result.push(node);
            traverse_expression!(node, as_expr_ref, |child| collect(child, result));
        }
        let mut result = Vec::new();
        collect(self, &mut result);
        result.into_iter()
    }

    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<&Expression> {
        let mut result = Vec::new();
        traverse_expression!(self, as_expr_ref, |child| result.push(child));
        result
    }

    pub fn children_mut(&mut self) -> Vec<&mut Expression> {
        let mut result = Vec::new();
        traverse_expression!(self, as_expr_mut, |child| result.push(child));
        result
    }

    /// Transform recursively, children first.
    pub fn map<F: FnMut(Expression) -> Expression>(mut self, f: &mut F) -> Expression {
        traverse_expression!(&mut self, as_expr_mut, |value| {
            let child = mem::take(value);
            *value = child.map(f);
        });
        f(self)
    }

    /// Apply `f` to every node in place, children first.
    pub fn visit_mut<F: FnMut(&mut Expression)>(&mut self, f: &mut F) {
        traverse_expression!(&mut *self, as_expr_mut, |value| value.visit_mut(f));
        f(self)
    }

    /// Slots read by this expression, in evaluation order.
    pub fn slots(&self) -> impl Iterator<Item = SlotIndex> + '_ {
        self.iter().filter_map(|node| match node {
            Expression::Slot(slot) => Some(*slot),
            _ => None,
        })
    }

    pub fn locals(&self) -> impl Iterator<Item = LocalId> + '_ {
        self.iter().filter_map(|node| match node {
            Expression::Local(id) => Some(*id),
            _ => None,
        })
    }

    /// Slots bound as upvalues by closures inside this expression.
    pub fn captured_slots(&self) -> Vec<SlotIndex> {
        self.iter()
            .flat_map(|node| match node {
                Expression::Closure { captures, .. } => captures
                    .iter()
                    .filter_map(|capture| match capture {
                        Expression::Slot(slot) => Some(*slot),
                        _ => None,
                    })
                    .collect::<Vec<_>>(),
                _ => vec![],
            })
            .collect()
    }

    pub fn has_call(&self) -> bool {
        self.iter().any(|node| matches!(node, Expression::Call { .. }))
    }

    /// True when a call evaluated earlier could change the value: the
    /// expression reads a table field, a global or an upvalue, or calls.
    pub fn reads_mutable_state(&self) -> bool {
        self.iter().any(|node| {
            matches!(
                node,
                Expression::Index { .. }
                    | Expression::Global(_)
                    | Expression::Upvalue(_)
                    | Expression::Call { .. }
            )
        })
    }

    /// True when the expression may produce more than one value in a list tail.
    pub fn is_multi_value(&self) -> bool {
        matches!(self, Expression::Call { .. } | Expression::Vararg)
    }

    pub fn count_slot(&self, slot: SlotIndex) -> usize {
        self.slots().filter(|s| *s == slot).count()
    }

    pub fn count_local(&self, id: LocalId) -> usize {
        self.locals().filter(|l| *l == id).count()
    }

    /// Replace the first substitutable read of `slot` with `replacement`.
    ///
    /// Closure captures bind the variable itself and are never substituted.
    pub fn substitute_slot(&mut self, slot: SlotIndex, replacement: &mut Option<Expression>) {
        if replacement.is_none() {
            return;
        }
        if *self == Expression::Slot(slot) {
            if let Some(value) = replacement.take() {
                *self = value;
            }
            return;
        }
        if matches!(self, Expression::Closure { .. }) {
            return;
        }
        traverse_expression!(&mut *self, as_expr_mut, |value| value
            .substitute_slot(slot, replacement));
    }

    /// Replace every slot leaf, in evaluation order, with the result of `rename`.
    pub fn rename_slots<F: FnMut(SlotIndex) -> Expression>(&mut self, rename: &mut F) {
        if let Expression::Slot(slot) = *self {
            *self = rename(slot);
            return;
        }
        traverse_expression!(&mut *self, as_expr_mut, |value| value.rename_slots(rename));
    }

    pub fn constant(&self) -> Option<&Constant> {
        match self {
            Expression::Constant(constant) => Some(constant),
            _ => None,
        }
    }
}

trait AsExprRef<'a> {
    fn as_expr_ref(&'a self) -> &'a Expression;
}

impl<'a> AsExprRef<'a> for Box<Expression> {
    fn as_expr_ref(&'a self) -> &'a Expression {
        self.as_ref()
    }
}

impl<'a> AsExprRef<'a> for Expression {
    fn as_expr_ref(&'a self) -> &'a Expression {
        self
    }
}

trait AsExprMut<'a> {
    fn as_expr_mut(&'a mut self) -> &'a mut Expression;
}

impl<'a> AsExprMut<'a> for Box<Expression> {
    fn as_expr_mut(&'a mut self) -> &'a mut Expression {
        self.as_mut()
    }
}

impl<'a> AsExprMut<'a> for Expression {
    fn as_expr_mut(&'a mut self) -> &'a mut Expression {
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub destinations: Vec<Expression>,
    pub expressions: Vec<Expression>,
    /// Set by declaration placement when this assignment introduces its destinations.
    #[serde(default)]
    pub declares: bool,
    #[serde(default)]
    pub line: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Assignment(Assignment),
    Call {
        function: Expression,
        #[serde(default)]
        arguments: Vec<Expression>,
        #[serde(default)]
        line: u32,
    },
    Return {
        #[serde(default)]
        values: Vec<Expression>,
        #[serde(default)]
        line: u32,
    },
    /// `local a, b` without initializers.
    Declare { locals: Vec<LocalId> },
}

impl Statement {
    pub fn assign(destination: Expression, expression: Expression) -> Statement {
        Statement::Assignment(Assignment {
            destinations: vec![destination],
            expressions: vec![expression],
            declares: false,
            line: 0,
        })
    }

    pub fn line(&self) -> u32 {
        match self {
            Statement::Assignment(assignment) => assignment.line,
            Statement::Call { line, .. } | Statement::Return { line, .. } => *line,
            Statement::Declare { .. } => 0,
        }
    }

    /// Expressions evaluated by this statement, in evaluation order.
    ///
    /// For assignments the prefixes of indexed destinations come first, then
    /// the right-hand side. Plain variable destinations are not evaluated.
    pub fn operands(&self) -> Vec<&Expression> {
        match self {
            Statement::Assignment(assignment) => {
                let mut result = vec![];
                for destination in &assignment.destinations {
                    if let Expression::Index { table, key } = destination {
                        result.push(table.as_ref());
                        result.push(key.as_ref());
                    }
                }
                result.extend(assignment.expressions.iter());
                result
            }
            Statement::Call {
                function,
                arguments,
                ..
            } => std::iter::once(function).chain(arguments.iter()).collect(),
            Statement::Return { values, .. } => values.iter().collect(),
            Statement::Declare { .. } => vec![],
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Expression> {
        match self {
            Statement::Assignment(assignment) => {
                let mut result = vec![];
                for destination in assignment.destinations.iter_mut() {
                    if let Expression::Index { table, key } = destination {
                        result.push(table.as_mut());
                        result.push(key.as_mut());
                    }
                }
                result.extend(assignment.expressions.iter_mut());
                result
            }
            Statement::Call {
                function,
                arguments,
                ..
            } => std::iter::once(function)
                .chain(arguments.iter_mut())
                .collect(),
            Statement::Return { values, .. } => values.iter_mut().collect(),
            Statement::Declare { .. } => vec![],
        }
    }

    /// Slots read by this statement, in evaluation order.
    pub fn read_slots(&self) -> Vec<SlotIndex> {
        self.operands().into_iter().flat_map(|e| e.slots()).collect()
    }

    /// Slots written directly by this statement.
    pub fn written_slots(&self) -> Vec<SlotIndex> {
        match self {
            Statement::Assignment(assignment) => assignment
                .destinations
                .iter()
                .filter_map(|destination| match destination {
                    Expression::Slot(slot) => Some(*slot),
                    _ => None,
                })
                .collect(),
            _ => vec![],
        }
    }

    pub fn read_locals(&self) -> Vec<LocalId> {
        self.operands().into_iter().flat_map(|e| e.locals()).collect()
    }

    pub fn written_locals(&self) -> Vec<LocalId> {
        match self {
            Statement::Assignment(assignment) => assignment
                .destinations
                .iter()
                .filter_map(|destination| match destination {
                    Expression::Local(id) => Some(*id),
                    _ => None,
                })
                .collect(),
            Statement::Declare { locals } => locals.clone(),
            _ => vec![],
        }
    }

    /// The single `slot = expression` pair of a simple assignment.
    pub fn as_single_slot_assignment(&self) -> Option<(SlotIndex, &Expression)> {
        match self {
            Statement::Assignment(Assignment {
                destinations,
                expressions,
                ..
            }) if destinations.len() == 1 && expressions.len() == 1 => match &destinations[0] {
                Expression::Slot(slot) => Some((*slot, &expressions[0])),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Statement::Return { .. })
    }
}
