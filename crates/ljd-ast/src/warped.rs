// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! The warped tree: a function body as an arena of blocks joined by explicit jumps.

use crate::nodes::{BlockId, Expression, PrototypeId, SlotIndex, Statement};
use serde::{Deserialize, Serialize};

/// A function prototype as produced by the builder, before structuring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WarpedFunction {
    pub id: PrototypeId,
    /// Parameters occupy slots `0..parameters` on entry.
    #[serde(default)]
    pub parameters: u16,
    #[serde(default)]
    pub is_variadic: bool,
    /// Block 0 is the entry. Warp targets index into this arena.
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub debug_locals: Vec<DebugLocal>,
    #[serde(default)]
    pub children: Vec<WarpedFunction>,
}

/// A batch of serialized prototypes, as read by the driver and the fixture tests.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    #[serde(default)]
    pub functions: Vec<WarpedFunction>,
}

impl Listing {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    #[serde(default)]
    pub first_address: u32,
    #[serde(default)]
    pub last_address: u32,
    #[serde(default)]
    pub contents: Vec<Statement>,
    pub warp: Warp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Warp {
    Unconditional(BlockId),
    Conditional {
        condition: Expression,
        true_target: BlockId,
        false_target: BlockId,
    },
    /// The block leaves the function, by a return in its contents or by falling off the end.
    End,
}

/// Variable info carried by prototypes compiled with debug information.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DebugLocal {
    pub slot: SlotIndex,
    pub name: String,
    pub start_address: u32,
    pub end_address: u32,
}

impl DebugLocal {
    pub fn covers(&self, block: &Block) -> bool {
        block.first_address < self.end_address && block.last_address >= self.start_address
    }
}

impl Warp {
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            Warp::Unconditional(target) => vec![*target],
            Warp::Conditional {
                true_target,
                false_target,
                ..
            } => vec![*true_target, *false_target],
            Warp::End => vec![],
        }
    }

    pub fn condition(&self) -> Option<&Expression> {
        match self {
            Warp::Conditional { condition, .. } => Some(condition),
            _ => None,
        }
    }

    pub fn condition_mut(&mut self) -> Option<&mut Expression> {
        match self {
            Warp::Conditional { condition, .. } => Some(condition),
            _ => None,
        }
    }

    /// Redirect every edge to `from` so that it lands on `to`.
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        match self {
            Warp::Unconditional(target) => {
                if *target == from {
                    *target = to;
                }
            }
            Warp::Conditional {
                true_target,
                false_target,
                ..
            } => {
                if *true_target == from {
                    *true_target = to;
                }
                if *false_target == from {
                    *false_target = to;
                }
            }
            Warp::End => {}
        }
    }

    /// Apply `f` to every target.
    pub fn remap(&mut self, f: impl Fn(BlockId) -> BlockId) {
        match self {
            Warp::Unconditional(target) => *target = f(*target),
            Warp::Conditional {
                true_target,
                false_target,
                ..
            } => {
                *true_target = f(*true_target);
                *false_target = f(*false_target);
            }
            Warp::End => {}
        }
    }
}

impl Block {
    pub fn new(id: BlockId, contents: Vec<Statement>, warp: Warp) -> Self {
        Block {
            id,
            first_address: 0,
            last_address: 0,
            contents,
            warp,
        }
    }

    /// Slots read by the warp condition.
    pub fn warp_reads(&self) -> Vec<SlotIndex> {
        self.warp
            .condition()
            .map(|condition| condition.slots().collect())
            .unwrap_or_default()
    }
}

impl WarpedFunction {
    pub fn new(id: usize, parameters: u16, blocks: Vec<Block>) -> Self {
        WarpedFunction {
            id: PrototypeId(id),
            parameters,
            is_variadic: false,
            blocks,
            debug_locals: vec![],
            children: vec![],
        }
    }

    pub fn entry(&self) -> BlockId {
        0
    }

    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.blocks
            .get(block)
            .map(|b| b.warp.targets())
            .unwrap_or_default()
    }

    /// Predecessor lists for every block, counting each edge once per target.
    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![vec![]; self.blocks.len()];
        for block in &self.blocks {
            for target in block.warp.targets() {
                if let Some(list) = preds.get_mut(target) {
                    list.push(block.id);
                }
            }
        }
        preds
    }

    pub fn debug_name(&self, slot: SlotIndex, block: &Block) -> Option<&str> {
        self.debug_locals
            .iter()
            .find(|local| local.slot == slot && local.covers(block))
            .map(|local| local.name.as_str())
    }
}
