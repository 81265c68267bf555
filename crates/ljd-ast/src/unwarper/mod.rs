// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Control flow structuring: turns a slot-resolved jump graph into a tree of
//! `if`, loops and `break`.

pub mod loops;
pub mod reconstructor;
pub mod short_circuit;

use crate::error::FailureReason;
use crate::graph::FlowGraph;
use crate::options::PipelineOptions;
use crate::structured::{LocalKind, LocalTable, StructuredFunction};
use crate::warped::WarpedFunction;
use log::debug;
use reconstructor::Reconstructor;

/// Structure one function whose slots have already been resolved to locals.
///
/// Nested prototypes are not visited; `children` of the result is empty.
pub fn unwarp(
    mut function: WarpedFunction,
    mut locals: LocalTable,
    options: &PipelineOptions,
) -> Result<StructuredFunction, FailureReason> {
    if !options.skip_short_circuit_folding {
        let folds = short_circuit::fold(&mut function);
        if folds > 0 {
            short_circuit::clear_unreachable(&mut function);
        }
    }

    let graph = FlowGraph::new(&function);
    graph.check_reducible()?;

    let mut notes = vec![];
    let loops = loops::classify(
        &mut function,
        &graph,
        &mut locals,
        !options.skip_for_loop_recognition,
        &mut notes,
    );
    let body = Reconstructor::new(&function, &graph, &loops).build()?;
    debug!(
        "[unwarp] function {}: {} loops, {} top-level nodes",
        function.id,
        loops.len(),
        body.len()
    );

    let parameters = locals
        .iter()
        .filter(|info| info.kind == LocalKind::Parameter)
        .map(|info| info.id)
        .collect();
    Ok(StructuredFunction {
        id: function.id,
        parameters,
        is_variadic: function.is_variadic,
        body,
        locals,
        notes,
        children: vec![],
    })
}
