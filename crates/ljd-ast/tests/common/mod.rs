// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use ljd_ast::{
    process, AnalysisFailure, Block, BlockId, Expression, PipelineOptions, SlotIndex, Statement,
    StructuredFunction, Warp, WarpedFunction,
};

pub fn slot(index: SlotIndex) -> Expression {
    Expression::slot(index)
}

pub fn global(name: &str) -> Expression {
    Expression::global(name)
}

pub fn set(index: SlotIndex, value: Expression) -> Statement {
    Statement::assign(slot(index), value)
}

pub fn call(name: &str, arguments: Vec<Expression>) -> Statement {
    Statement::Call {
        function: global(name),
        arguments,
        line: 0,
    }
}

pub fn ret(values: Vec<Expression>) -> Statement {
    Statement::Return { values, line: 0 }
}

pub fn jump(id: BlockId, contents: Vec<Statement>, target: BlockId) -> Block {
    Block::new(id, contents, Warp::Unconditional(target))
}

pub fn branch(
    id: BlockId,
    contents: Vec<Statement>,
    condition: Expression,
    true_target: BlockId,
    false_target: BlockId,
) -> Block {
    Block::new(
        id,
        contents,
        Warp::Conditional {
            condition,
            true_target,
            false_target,
        },
    )
}

pub fn end(id: BlockId, contents: Vec<Statement>) -> Block {
    Block::new(id, contents, Warp::End)
}

/// Run the whole pipeline with every validation gate enabled.
pub fn decompile(function: WarpedFunction) -> Result<StructuredFunction, AnalysisFailure> {
    let options = PipelineOptions {
        validate_each_pass: true,
        ..Default::default()
    };
    process(function, &options)
}
