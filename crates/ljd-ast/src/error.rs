// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

use crate::nodes::{BlockId, PrototypeId};
use crate::validator::Violation;
use std::fmt;
use thiserror::Error;

/// Pipeline stage after which a validation gate ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    PrePass,
    TemporaryElimination,
    SlotResolution,
    DeclarationPlacement,
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::PrePass => "pre-pass",
            Stage::TemporaryElimination => "temporary elimination",
            Stage::SlotResolution => "slot resolution",
            Stage::DeclarationPlacement => "declaration placement",
            Stage::Finalize => "finalizer",
        };
        f.write_str(name)
    }
}

/// Why a function could not be decompiled.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureReason {
    /// The input graph is not well formed: dangling jump targets, a
    /// misnumbered arena or a guaranteed read of an undefined register.
    #[error("malformed control flow graph: {0}")]
    MalformedGraph(Violation),

    /// Slot liveness did not settle within the configured number of rounds.
    #[error("slot liveness did not reach a fixed point within {rounds} rounds")]
    LivenessDivergence { rounds: usize },

    /// A region could not be assigned to exactly one structured construct.
    #[error("irreducible control flow at block {block}: {detail}")]
    IrreducibleControlFlow { block: BlockId, detail: String },

    /// The validator rejected the output of a pipeline stage.
    #[error("invariant violated after {stage}: {violation}")]
    InvariantViolation { stage: Stage, violation: Violation },
}

impl FailureReason {
    pub fn irreducible(block: BlockId, detail: impl Into<String>) -> Self {
        FailureReason::IrreducibleControlFlow {
            block,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::MalformedGraph(_) => "MalformedGraph",
            FailureReason::LivenessDivergence { .. } => "LivenessDivergence",
            FailureReason::IrreducibleControlFlow { .. } => "IrreducibleControlFlow",
            FailureReason::InvariantViolation { .. } => "InvariantViolation",
        }
    }
}

/// A function-scoped analysis failure. Sibling functions are unaffected.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("function {prototype}: {reason}")]
pub struct AnalysisFailure {
    pub prototype: PrototypeId,
    pub reason: FailureReason,
}

impl AnalysisFailure {
    /// Invariant violations point at a defect in the analyses themselves
    /// rather than at unsupported input.
    pub fn is_internal(&self) -> bool {
        matches!(self.reason, FailureReason::InvariantViolation { .. })
    }
}
