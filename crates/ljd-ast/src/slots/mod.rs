// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Slot lifetime resolution: liveness, temporary elimination, local identity
//! and declaration placement.

pub mod liveness;
pub mod locals;
pub mod temporaries;

pub use liveness::Liveness;
pub use locals::{live_ranges, place_declarations, resolve, LiveRange};
pub use temporaries::{eliminate, ProtectedSlots};
