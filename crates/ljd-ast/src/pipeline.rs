// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! The per-function pipeline: validate, normalize, resolve slots, structure,
//! declare, clean up, validate again.

use crate::error::{AnalysisFailure, FailureReason, Stage};
use crate::finalizer;
use crate::graph::FlowGraph;
use crate::options::PipelineOptions;
use crate::pre_pass;
use crate::slots::{self, Liveness, ProtectedSlots};
use crate::structured::StructuredFunction;
use crate::unwarper;
use crate::validator::{self, Violation};
use crate::warped::WarpedFunction;
use log::{debug, error, warn};
use std::mem;

/// Decompile one prototype and, independently, each of its nested prototypes.
pub fn process(
    mut function: WarpedFunction,
    options: &PipelineOptions,
) -> Result<StructuredFunction, AnalysisFailure> {
    let prototype = function.id;
    // Closure operands are checked against the children before they are split off.
    let checked = validator::validate_warped(&function)
        .and_then(|()| validator::validate_prototypes(&function));
    if let Err(violation) = checked {
        return Err(fail(AnalysisFailure {
            prototype,
            reason: FailureReason::MalformedGraph(violation),
        }));
    }
    let children = mem::take(&mut function.children);

    let mut structured = run_stages(function, options).map_err(|reason| {
        fail(AnalysisFailure { prototype, reason })
    })?;
    structured.children = children
        .into_iter()
        .map(|child| process(child, options))
        .collect();
    Ok(structured)
}

fn fail(failure: AnalysisFailure) -> AnalysisFailure {
    if failure.is_internal() {
        error!("[pipeline] {failure}");
    } else {
        warn!("[pipeline] skipping {failure}");
    }
    failure
}

fn gate(
    options: &PipelineOptions,
    stage: Stage,
    check: impl FnOnce() -> Result<(), Violation>,
) -> Result<(), FailureReason> {
    if !options.validate_each_pass {
        return Ok(());
    }
    check().map_err(|violation| FailureReason::InvariantViolation { stage, violation })
}

fn run_stages(
    mut function: WarpedFunction,
    options: &PipelineOptions,
) -> Result<StructuredFunction, FailureReason> {
    let id = function.id;

    let rewrites = pre_pass::run(&mut function);
    debug!("[pipeline] function {id}: pre-pass applied {rewrites} rewrites");
    gate(options, Stage::PrePass, || validator::validate_warped(&function))?;

    if !options.skip_temporary_elimination {
        let liveness = Liveness::compute(&function, options.max_liveness_rounds)?;
        let protected = ProtectedSlots::collect(&function, &FlowGraph::new(&function));
        slots::eliminate(&mut function, &liveness, &protected);
        gate(options, Stage::TemporaryElimination, || {
            validator::validate_warped(&function)
        })?;
    }

    let locals = slots::resolve(&mut function, options)?;
    debug!("[pipeline] function {id}: {} locals", locals.len());
    gate(options, Stage::SlotResolution, || validator::validate_warped(&function))?;

    let mut structured = unwarper::unwarp(function, locals, options)?;

    slots::place_declarations(&mut structured);
    gate(options, Stage::DeclarationPlacement, || {
        validator::validate_unwarped(&structured)
    })?;

    finalizer::run(&mut structured);
    validator::validate_unwarped(&structured).map_err(|violation| {
        FailureReason::InvariantViolation {
            stage: Stage::Finalize,
            violation,
        }
    })?;
    debug!("[pipeline] function {id}: done");
    Ok(structured)
}
