// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! LuaJIT decompiler core.
//!
//! Takes a function as a graph of basic blocks over virtual registers (the
//! warped tree) and produces a tree of nested Lua constructs over named local
//! variables (the structured tree). Bytecode decoding and source emission live
//! outside this crate.

pub mod display;
pub mod error;
pub mod finalizer;
pub mod graph;
pub mod nodes;
pub mod options;
pub mod pipeline;
pub mod pre_pass;
pub mod slots;
pub mod structured;
pub mod unwarper;
pub mod validator;
pub mod warped;

// Entry points
pub use pipeline::process;
pub use display::outline;

// Failures and options
pub use error::{AnalysisFailure, FailureReason, Stage};
pub use options::{OptionsError, PipelineOptions};
pub use validator::Violation;

// Tree types
pub use nodes::{Assignment, BinOp, BlockId, Constant, Expression, LocalId, PrototypeId, SlotIndex, Statement, UnOp};
pub use structured::{LocalKind, LocalTable, Node, Note, StructuredFunction};
pub use warped::{Block, DebugLocal, Listing, Warp, WarpedFunction};
