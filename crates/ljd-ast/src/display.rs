// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Lua-like outline of a structured function, for logs, snapshots and the CLI.
//!
//! This is a debugging view. It parenthesizes every nested binary operation
//! and does not attempt to reproduce source formatting.

use crate::nodes::{BinOp, Constant, Expression, Statement, UnOp};
use crate::structured::{LocalTable, Node, StructuredFunction};
use std::fmt::{self, Write};

const INDENT: &str = "  ";

/// Render `function` and its nested prototypes.
pub fn outline(function: &StructuredFunction) -> String {
    Outline(function).to_string()
}

pub struct Outline<'a>(pub &'a StructuredFunction);

impl fmt::Display for Outline<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_function(f, self.0, 0)
    }
}

/// An expression paired with the table naming its locals.
pub struct ExpressionDisplay<'a> {
    pub expression: &'a Expression,
    pub locals: &'a LocalTable,
}

impl fmt::Display for ExpressionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_expression(f, self.expression, self.locals)
    }
}

fn indent(f: &mut impl Write, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        f.write_str(INDENT)?;
    }
    Ok(())
}

fn write_function(f: &mut impl Write, function: &StructuredFunction, depth: usize) -> fmt::Result {
    let locals = &function.locals;
    let mut parameters: Vec<String> = function.parameters.iter().map(|p| locals.name(*p)).collect();
    if function.is_variadic {
        parameters.push("...".to_string());
    }
    indent(f, depth)?;
    writeln!(f, "function {} ({})", function.id, parameters.join(", "))?;
    for note in &function.notes {
        indent(f, depth + 1)?;
        writeln!(f, "-- {note}")?;
    }
    write_body(f, &function.body, locals, depth + 1)?;
    for child in &function.children {
        match child {
            Ok(child) => write_function(f, child, depth + 1)?,
            Err(failure) => {
                indent(f, depth + 1)?;
                writeln!(f, "-- {failure}")?;
            }
        }
    }
    indent(f, depth)?;
    writeln!(f, "end")
}

fn write_body(f: &mut impl Write, body: &[Node], locals: &LocalTable, depth: usize) -> fmt::Result {
    for node in body {
        write_node(f, node, locals, depth)?;
    }
    Ok(())
}

fn write_node(f: &mut impl Write, node: &Node, locals: &LocalTable, depth: usize) -> fmt::Result {
    indent(f, depth)?;
    match node {
        Node::Statement(statement) => {
            write_statement(f, statement, locals)?;
            writeln!(f)
        }
        Node::Break => writeln!(f, "break"),
        Node::Block(body) => {
            writeln!(f, "do")?;
            write_body(f, body, locals, depth + 1)?;
            indent(f, depth)?;
            writeln!(f, "end")
        }
        Node::If {
            condition,
            then_body,
            else_body,
        } => {
            f.write_str("if ")?;
            write_expression(f, condition, locals)?;
            writeln!(f, " then")?;
            write_body(f, then_body, locals, depth + 1)?;
            let mut else_body = else_body.as_deref();
            // A lone nested `if` in the else arm prints as `elseif`.
            while let Some(
                [Node::If {
                    condition,
                    then_body,
                    else_body: nested,
                }],
            ) = else_body
            {
                indent(f, depth)?;
                f.write_str("elseif ")?;
                write_expression(f, condition, locals)?;
                writeln!(f, " then")?;
                write_body(f, then_body, locals, depth + 1)?;
                else_body = nested.as_deref();
            }
            if let Some(body) = else_body {
                indent(f, depth)?;
                writeln!(f, "else")?;
                write_body(f, body, locals, depth + 1)?;
            }
            indent(f, depth)?;
            writeln!(f, "end")
        }
        Node::While { condition, body } => {
            f.write_str("while ")?;
            write_expression(f, condition, locals)?;
            writeln!(f, " do")?;
            write_body(f, body, locals, depth + 1)?;
            indent(f, depth)?;
            writeln!(f, "end")
        }
        Node::RepeatUntil { body, condition } => {
            writeln!(f, "repeat")?;
            write_body(f, body, locals, depth + 1)?;
            indent(f, depth)?;
            f.write_str("until ")?;
            write_expression(f, condition, locals)?;
            writeln!(f)
        }
        Node::NumericFor {
            variable,
            start,
            stop,
            step,
            body,
        } => {
            write!(f, "for {} = ", locals.name(*variable))?;
            write_expression(f, start, locals)?;
            f.write_str(", ")?;
            write_expression(f, stop, locals)?;
            if *step != Expression::number(1.0) {
                f.write_str(", ")?;
                write_expression(f, step, locals)?;
            }
            writeln!(f, " do")?;
            write_body(f, body, locals, depth + 1)?;
            indent(f, depth)?;
            writeln!(f, "end")
        }
        Node::GenericFor {
            variables,
            iterators,
            body,
        } => {
            let names: Vec<String> = variables.iter().map(|v| locals.name(*v)).collect();
            write!(f, "for {} in ", names.join(", "))?;
            write_list(f, iterators, locals)?;
            writeln!(f, " do")?;
            write_body(f, body, locals, depth + 1)?;
            indent(f, depth)?;
            writeln!(f, "end")
        }
    }
}

fn write_statement(f: &mut impl Write, statement: &Statement, locals: &LocalTable) -> fmt::Result {
    match statement {
        Statement::Assignment(assignment) => {
            if assignment.declares {
                f.write_str("local ")?;
            }
            write_list(f, &assignment.destinations, locals)?;
            f.write_str(" = ")?;
            write_list(f, &assignment.expressions, locals)
        }
        Statement::Call {
            function,
            arguments,
            ..
        } => write_call(f, function, arguments, locals),
        Statement::Return { values, .. } => {
            f.write_str("return")?;
            if !values.is_empty() {
                f.write_char(' ')?;
                write_list(f, values, locals)?;
            }
            Ok(())
        }
        Statement::Declare { locals: declared } => {
            let names: Vec<String> = declared.iter().map(|l| locals.name(*l)).collect();
            write!(f, "local {}", names.join(", "))
        }
    }
}

fn write_list(f: &mut impl Write, expressions: &[Expression], locals: &LocalTable) -> fmt::Result {
    for (index, expression) in expressions.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write_expression(f, expression, locals)?;
    }
    Ok(())
}

fn write_call(
    f: &mut impl Write,
    function: &Expression,
    arguments: &[Expression],
    locals: &LocalTable,
) -> fmt::Result {
    write_operand(f, function, locals)?;
    f.write_char('(')?;
    write_list(f, arguments, locals)?;
    f.write_char(')')
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Binary operands and closures are parenthesized.
fn write_operand(f: &mut impl Write, expression: &Expression, locals: &LocalTable) -> fmt::Result {
    if matches!(expression, Expression::Binary { .. } | Expression::Closure { .. }) {
        f.write_char('(')?;
        write_expression(f, expression, locals)?;
        f.write_char(')')
    } else {
        write_expression(f, expression, locals)
    }
}

fn write_expression(f: &mut impl Write, expression: &Expression, locals: &LocalTable) -> fmt::Result {
    match expression {
        Expression::Slot(slot) => write!(f, "@{slot}"),
        Expression::Local(local) => f.write_str(&locals.name(*local)),
        Expression::Upvalue(index) => write!(f, "upvalue{index}"),
        Expression::Global(name) => f.write_str(name),
        Expression::Constant(Constant::Nil) => f.write_str("nil"),
        Expression::Constant(Constant::Boolean(value)) => write!(f, "{value}"),
        Expression::Constant(Constant::Number(value)) => write!(f, "{value}"),
        Expression::Constant(Constant::String(value)) => write!(f, "{value:?}"),
        Expression::Vararg => f.write_str("..."),
        Expression::Index { table, key } => {
            write_operand(f, table, locals)?;
            match key.as_ref() {
                Expression::Constant(Constant::String(name)) if is_identifier(name) => {
                    write!(f, ".{name}")
                }
                key => {
                    f.write_char('[')?;
                    write_expression(f, key, locals)?;
                    f.write_char(']')
                }
            }
        }
        Expression::Unary { op, operand } => {
            f.write_str(match op {
                UnOp::Not => "not ",
                UnOp::Minus => "-",
                UnOp::Length => "#",
            })?;
            write_operand(f, operand, locals)
        }
        Expression::Binary { op, lhs, rhs } => {
            // Unary operators bind looser than `^` only.
            if *op == BinOp::Pow && matches!(lhs.as_ref(), Expression::Unary { .. }) {
                f.write_char('(')?;
                write_expression(f, lhs, locals)?;
                f.write_char(')')?;
            } else {
                write_operand(f, lhs, locals)?;
            }
            write!(f, " {} ", BinOp::symbol(*op))?;
            write_operand(f, rhs, locals)
        }
        Expression::Call {
            function,
            arguments,
        } => write_call(f, function, arguments, locals),
        Expression::Closure {
            prototype,
            captures,
        } => {
            write!(f, "closure {prototype}")?;
            if !captures.is_empty() {
                f.write_str(" [")?;
                write_list(f, captures, locals)?;
                f.write_char(']')?;
            }
            Ok(())
        }
        Expression::Table { array, records } => {
            f.write_char('{')?;
            write_list(f, array, locals)?;
            for (index, (key, value)) in records.iter().enumerate() {
                if index > 0 || !array.is_empty() {
                    f.write_str(", ")?;
                }
                f.write_char('[')?;
                write_expression(f, key, locals)?;
                f.write_str("] = ")?;
                write_expression(f, value, locals)?;
            }
            f.write_char('}')
        }
    }
}
