// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Region walker producing the structured tree.
//!
//! A region is the chain of blocks from a start block up to a stop block. A
//! conditional warp opens an `if` whose arms are the regions between each
//! target and the branch's merge point. Loop headers open the construct chosen
//! by classification. Inside a loop, reaching the header ends the region and
//! reaching the follow becomes `break`.

use crate::error::FailureReason;
use crate::graph::{FlowGraph, PostDominators};
use crate::nodes::{BlockId, Expression};
use crate::structured::Node;
use crate::unwarper::loops::{LoopInfo, LoopShape};
use crate::warped::{Warp, WarpedFunction};
use std::collections::{BTreeMap, BTreeSet};

struct LoopContext {
    header: BlockId,
    follow: Option<BlockId>,
    /// The latch closing a `repeat`, whose test is the loop's own condition.
    until_latch: Option<BlockId>,
    /// Blocks that belong to the loop or only leave it: its body plus exit
    /// paths that cannot reach the follow.
    owned: BTreeSet<BlockId>,
}

pub struct Reconstructor<'a> {
    function: &'a WarpedFunction,
    graph: &'a FlowGraph,
    post: PostDominators,
    loops: &'a BTreeMap<BlockId, LoopInfo>,
    contexts: Vec<LoopContext>,
    emitted: BTreeSet<BlockId>,
}

impl<'a> Reconstructor<'a> {
    pub fn new(
        function: &'a WarpedFunction,
        graph: &'a FlowGraph,
        loops: &'a BTreeMap<BlockId, LoopInfo>,
    ) -> Self {
        Reconstructor {
            function,
            graph,
            post: graph.post_dominators(),
            loops,
            contexts: vec![],
            emitted: BTreeSet::new(),
        }
    }

    /// Structure the whole function, checking that every reachable block is used once.
    pub fn build(mut self) -> Result<Vec<Node>, FailureReason> {
        if self.function.blocks.is_empty() {
            return Ok(vec![]);
        }
        let body = self.region(self.function.entry(), None, false)?;
        if let Some(missing) = self
            .graph
            .reverse_postorder()
            .iter()
            .find(|block| !self.emitted.contains(*block))
        {
            return Err(FailureReason::irreducible(
                *missing,
                "block is not covered by any structured construct",
            ));
        }
        Ok(body)
    }

    fn mark(&mut self, block: BlockId) -> Result<(), FailureReason> {
        if self.emitted.insert(block) {
            Ok(())
        } else {
            Err(FailureReason::irreducible(
                block,
                "block is reached from more than one structured position",
            ))
        }
    }

    fn reachable_from(&self, start: BlockId) -> BTreeSet<BlockId> {
        let mut seen = BTreeSet::new();
        let mut worklist = vec![start];
        while let Some(block) = worklist.pop() {
            if seen.insert(block) {
                worklist.extend(self.graph.successors(block).iter().copied());
            }
        }
        seen
    }

    /// The merge point of a branch at `block`, if the arms may rejoin there.
    fn merge_point(&self, block: BlockId) -> Option<BlockId> {
        let merge = self.post.merge_point(block)?;
        match self.contexts.last() {
            Some(context) if !context.owned.contains(&merge) => None,
            _ => Some(merge),
        }
    }

    fn region(
        &mut self,
        start: BlockId,
        stop: Option<BlockId>,
        mut entering: bool,
    ) -> Result<Vec<Node>, FailureReason> {
        let mut nodes = vec![];
        let mut current = Some(start);
        while let Some(block) = current {
            if Some(block) == stop {
                break;
            }
            if !entering {
                if let Some(context) = self.contexts.last() {
                    if block == context.header {
                        break;
                    }
                    if Some(block) == context.follow {
                        nodes.push(Node::Break);
                        break;
                    }
                }
                let depth = self.contexts.len();
                if let Some(outer) = self
                    .contexts
                    .iter()
                    .take(depth.saturating_sub(1))
                    .find(|outer| block == outer.header || Some(block) == outer.follow)
                {
                    return Err(FailureReason::irreducible(
                        block,
                        format!("jump leaves the loop at block {} for an enclosing loop", outer.header),
                    ));
                }
                let loops = self.loops;
                if let Some(info) = loops.get(&block) {
                    nodes.push(self.loop_node(info)?);
                    current = info.shape.follow();
                    continue;
                }
            }
            entering = false;

            self.mark(block)?;
            let function = self.function;
            let data = &function.blocks[block];
            nodes.extend(data.contents.iter().cloned().map(Node::Statement));
            if self
                .contexts
                .last()
                .is_some_and(|context| context.until_latch == Some(block))
            {
                break;
            }
            current = match &data.warp {
                Warp::End => None,
                Warp::Unconditional(target) => Some(*target),
                Warp::Conditional {
                    condition,
                    true_target,
                    false_target,
                } => {
                    let merge = self.merge_point(block);
                    let then_body = self.region(*true_target, merge, false)?;
                    let else_body = self.region(*false_target, merge, false)?;
                    nodes.push(if_node(condition.clone(), then_body, else_body));
                    merge
                }
            };
        }
        Ok(nodes)
    }

    fn loop_node(&mut self, info: &LoopInfo) -> Result<Node, FailureReason> {
        let header = info.header;
        let follow = info.shape.follow();
        let mut owned = info.body.clone();
        if let Some(follow) = follow {
            let after = self.reachable_from(follow);
            for block in self.reachable_from(header) {
                if !after.contains(&block) && block != follow {
                    owned.insert(block);
                }
            }
        }
        let until_latch = match &info.shape {
            LoopShape::Repeat { latch, .. } => Some(*latch),
            _ => None,
        };
        self.contexts.push(LoopContext {
            header,
            follow,
            until_latch,
            owned,
        });
        let node = self.loop_body(info);
        self.contexts.pop();
        node
    }

    fn loop_body(&mut self, info: &LoopInfo) -> Result<Node, FailureReason> {
        let header = info.header;
        Ok(match &info.shape {
            LoopShape::While {
                condition,
                body_entry,
                ..
            } => {
                self.mark(header)?;
                Node::While {
                    condition: condition.clone(),
                    body: self.region(*body_entry, None, false)?,
                }
            }
            LoopShape::NumericFor {
                variable,
                start,
                stop,
                step,
                body_entry,
                ..
            } => {
                self.mark(header)?;
                Node::NumericFor {
                    variable: *variable,
                    start: start.clone(),
                    stop: stop.clone(),
                    step: step.clone(),
                    body: self.region(*body_entry, None, false)?,
                }
            }
            LoopShape::GenericFor {
                variables,
                iterators,
                body_entry,
                ..
            } => {
                self.mark(header)?;
                Node::GenericFor {
                    variables: variables.clone(),
                    iterators: iterators.clone(),
                    body: self.region(*body_entry, None, false)?,
                }
            }
            LoopShape::Repeat { latch, .. } => {
                let body = self.region(header, None, true)?;
                let condition = match &self.function.blocks[*latch].warp {
                    Warp::Conditional {
                        condition,
                        true_target,
                        ..
                    } if *true_target == header => condition.clone().negate(),
                    Warp::Conditional { condition, .. } => condition.clone(),
                    _ => return Err(FailureReason::irreducible(*latch, "repeat latch has no test")),
                };
                Node::RepeatUntil { body, condition }
            }
            LoopShape::Endless { .. } => Node::While {
                condition: Expression::boolean(true),
                body: self.region(header, None, true)?,
            },
        })
    }
}

/// An `if` with its arms normalized: an empty then-arm swaps with the else-arm.
fn if_node(condition: Expression, then_body: Vec<Node>, else_body: Vec<Node>) -> Node {
    if then_body.is_empty() && !else_body.is_empty() {
        return Node::If {
            condition: condition.negate(),
            then_body: else_body,
            else_body: None,
        };
    }
    Node::If {
        condition,
        then_body,
        else_body: (!else_body.is_empty()).then_some(else_body),
    }
}
