// Copyright (c) Asymptotic
// SPDX-License-Identifier: Apache-2.0

//! Local variable identity and declaration placement.
//!
//! Before structuring, every slot write is tied to the reads it reaches. Writes
//! that meet at a common read form one web, and every web becomes a distinct
//! local, so a register reused for unrelated values yields unrelated locals.
//! Webs that debug info attributes to the same source variable are merged when
//! their live ranges do not intersect.
//!
//! After structuring, each local gets a declaration at the start of the
//! innermost body that holds all of its occurrences, hoisted outwards while
//! some read could observe a value from before that point.

use crate::error::FailureReason;
use crate::graph::FlowGraph;
use crate::nodes::{BlockId, Expression, LocalId, SlotIndex, Statement};
use crate::options::PipelineOptions;
use crate::slots::liveness::Liveness;
use crate::structured::{ends_in_exit, LocalKind, LocalTable, Node, StructuredFunction};
use crate::validator::Violation;
use crate::warped::WarpedFunction;
use itertools::Itertools;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// A program point: a block and the index of the statement it precedes.
/// Index `contents.len()` is the point before the warp.
pub type ProgramPoint = (BlockId, usize);

/// Points at which a variable holds a value that is read later.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiveRange {
    pub points: BTreeSet<ProgramPoint>,
}

impl LiveRange {
    pub fn interferes(&self, other: &LiveRange) -> bool {
        !self.points.is_disjoint(&other.points)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum DefSite {
    Parameter(SlotIndex),
    Write {
        block: BlockId,
        statement: usize,
        position: usize,
    },
}

/// Every slot definition of a function, numbered.
struct Definitions {
    sites: Vec<(DefSite, SlotIndex)>,
    by_site: BTreeMap<DefSite, usize>,
}

type ReachingSet = BTreeMap<SlotIndex, BTreeSet<usize>>;

impl Definitions {
    fn collect(function: &WarpedFunction, graph: &FlowGraph) -> Self {
        let mut sites = vec![];
        for slot in 0..function.parameters {
            sites.push((DefSite::Parameter(slot), slot));
        }
        for &block in graph.reverse_postorder() {
            for (statement, node) in function.blocks[block].contents.iter().enumerate() {
                if let Statement::Assignment(assignment) = node {
                    for (position, destination) in assignment.destinations.iter().enumerate() {
                        if let Expression::Slot(slot) = destination {
                            let site = DefSite::Write {
                                block,
                                statement,
                                position,
                            };
                            sites.push((site, *slot));
                        }
                    }
                }
            }
        }
        let by_site = sites
            .iter()
            .enumerate()
            .map(|(index, (site, _))| (*site, index))
            .collect();
        Definitions { sites, by_site }
    }

    fn len(&self) -> usize {
        self.sites.len()
    }

    fn slot(&self, def: usize) -> SlotIndex {
        self.sites[def].1
    }

    fn write(&self, block: BlockId, statement: usize, position: usize) -> Option<usize> {
        self.by_site
            .get(&DefSite::Write {
                block,
                statement,
                position,
            })
            .copied()
    }

    fn is_parameter(&self, def: usize) -> bool {
        matches!(self.sites[def].0, DefSite::Parameter(_))
    }

    fn block(&self, def: usize) -> Option<BlockId> {
        match self.sites[def].0 {
            DefSite::Parameter(_) => None,
            DefSite::Write { block, .. } => Some(block),
        }
    }

    /// Apply the writes of one statement to a reaching set.
    fn transfer(&self, state: &mut ReachingSet, block: BlockId, index: usize, statement: &Statement) {
        if let Statement::Assignment(assignment) = statement {
            for (position, destination) in assignment.destinations.iter().enumerate() {
                if let (Expression::Slot(slot), Some(def)) =
                    (destination, self.write(block, index, position))
                {
                    state.insert(*slot, BTreeSet::from([def]));
                }
            }
        }
    }

    /// Forward reaching definitions, as the set reaching each block's entry.
    fn reaching(
        &self,
        function: &WarpedFunction,
        graph: &FlowGraph,
        max_rounds: usize,
    ) -> Result<Vec<ReachingSet>, FailureReason> {
        let count = function.blocks.len();
        let mut entry_sets = vec![ReachingSet::new(); count];
        let mut exit_sets = vec![ReachingSet::new(); count];
        let mut parameters = ReachingSet::new();
        for def in 0..self.len() {
            if self.is_parameter(def) {
                parameters.entry(self.slot(def)).or_default().insert(def);
            }
        }

        for _ in 0..max_rounds {
            let mut changed = false;
            for &block in graph.reverse_postorder() {
                let mut state = if block == function.entry() {
                    parameters.clone()
                } else {
                    ReachingSet::new()
                };
                for &predecessor in graph.predecessors(block) {
                    for (slot, defs) in &exit_sets[predecessor] {
                        state.entry(*slot).or_default().extend(defs.iter().copied());
                    }
                }
                let mut exit = state.clone();
                for (index, statement) in function.blocks[block].contents.iter().enumerate() {
                    self.transfer(&mut exit, block, index, statement);
                }
                if state != entry_sets[block] || exit != exit_sets[block] {
                    entry_sets[block] = state;
                    exit_sets[block] = exit;
                    changed = true;
                }
            }
            if !changed {
                return Ok(entry_sets);
            }
        }
        Err(FailureReason::LivenessDivergence { rounds: max_rounds })
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        UnionFind {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, node: usize) -> usize {
        let mut root = node;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = node;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Join two sets, keeping the smaller root so webs are named after their first definition.
    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            let (keep, drop) = if a < b { (a, b) } else { (b, a) };
            self.parent[drop] = keep;
        }
    }
}

fn defs_reaching(
    state: &ReachingSet,
    slot: SlotIndex,
    block: BlockId,
) -> Result<&BTreeSet<usize>, FailureReason> {
    state
        .get(&slot)
        .filter(|defs| !defs.is_empty())
        .ok_or(FailureReason::MalformedGraph(Violation::UndefinedSlot { block, slot }))
}

/// Assign a local to every slot web and rewrite all slot references.
pub fn resolve(
    function: &mut WarpedFunction,
    options: &PipelineOptions,
) -> Result<LocalTable, FailureReason> {
    let graph = FlowGraph::new(function);
    let liveness = Liveness::compute(function, options.max_liveness_rounds)?;
    let definitions = Definitions::collect(function, &graph);
    let reaching = definitions.reaching(function, &graph, options.max_liveness_rounds)?;
    let mut webs = UnionFind::new(definitions.len());

    // Writes reaching the same read belong to the same variable.
    for &block in graph.reverse_postorder() {
        let data = &function.blocks[block];
        let mut state = reaching[block].clone();
        for (index, statement) in data.contents.iter().enumerate() {
            for slot in statement.read_slots() {
                let defs = defs_reaching(&state, slot, block)?;
                for (a, b) in defs.iter().tuple_windows() {
                    webs.union(*a, *b);
                }
            }
            definitions.transfer(&mut state, block, index, statement);
        }
        for slot in data.warp_reads() {
            let defs = defs_reaching(&state, slot, block)?;
            for (a, b) in defs.iter().tuple_windows() {
                webs.union(*a, *b);
            }
        }
    }

    merge_debug_webs(function, &graph, &liveness, &definitions, &reaching, &mut webs);

    // One local per web, numbered by first definition.
    let mut table = LocalTable::default();
    let mut local_of_root: BTreeMap<usize, LocalId> = BTreeMap::new();
    let mut per_slot: BTreeMap<SlotIndex, usize> = BTreeMap::new();
    for def in 0..definitions.len() {
        let root = webs.find(def);
        if local_of_root.contains_key(&root) {
            continue;
        }
        let slot = definitions.slot(def);
        let debug_name = definitions.block(def).and_then(|block| {
            function
                .debug_name(slot, &function.blocks[block])
                .map(str::to_string)
        });
        let (kind, base) = if definitions.is_parameter(root) {
            let name = function
                .blocks
                .first()
                .and_then(|entry| function.debug_name(slot, entry))
                .map(str::to_string)
                .unwrap_or_else(|| format!("arg{slot}"));
            (LocalKind::Parameter, name)
        } else {
            (
                LocalKind::Variable,
                debug_name.unwrap_or_else(|| format!("slot{slot}")),
            )
        };
        let seen = per_slot.entry(slot).or_default();
        let name = if *seen == 0 || kind == LocalKind::Parameter {
            base
        } else {
            format!("{base}_{seen}")
        };
        *seen += 1;
        local_of_root.insert(root, table.push(slot, name, kind));
    }

    // Rewrite reads and writes.
    for &block in graph.reverse_postorder() {
        let mut state = reaching[block].clone();
        let data = &mut function.blocks[block];
        for index in 0..data.contents.len() {
            let reads = data.contents[index].read_slots();
            let mut locals = vec![];
            for slot in reads {
                let defs = defs_reaching(&state, slot, block)?;
                let first = defs.iter().next().copied().unwrap_or_default();
                locals.push(local_of_root[&webs.find(first)]);
            }
            definitions.transfer(&mut state, block, index, &data.contents[index]);

            let statement = &mut data.contents[index];
            let mut next = locals.into_iter();
            for operand in statement.operands_mut() {
                operand.rename_slots(&mut |slot| {
                    next.next()
                        .map(Expression::Local)
                        .unwrap_or(Expression::Slot(slot))
                });
            }
            if let Statement::Assignment(assignment) = statement {
                for (position, destination) in assignment.destinations.iter_mut().enumerate() {
                    if let Some(def) = definitions.write(block, index, position) {
                        *destination = Expression::Local(local_of_root[&webs.find(def)]);
                    }
                }
            }
        }
        let mut locals = vec![];
        for slot in data.warp_reads() {
            let defs = defs_reaching(&state, slot, block)?;
            let first = defs.iter().next().copied().unwrap_or_default();
            locals.push(local_of_root[&webs.find(first)]);
        }
        if let Some(condition) = data.warp.condition_mut() {
            let mut next = locals.into_iter();
            condition.rename_slots(&mut |slot| {
                next.next()
                    .map(Expression::Local)
                    .unwrap_or(Expression::Slot(slot))
            });
        }
    }

    debug!(
        "[locals] function {}: {} locals from {} definitions",
        function.id,
        table.len(),
        definitions.len()
    );
    Ok(table)
}

/// Merge webs attributed to one debug variable unless their ranges intersect.
fn merge_debug_webs(
    function: &WarpedFunction,
    graph: &FlowGraph,
    liveness: &Liveness,
    definitions: &Definitions,
    reaching: &[ReachingSet],
    webs: &mut UnionFind,
) {
    if function.debug_locals.is_empty() {
        return;
    }
    let mut ranges: BTreeMap<usize, LiveRange> = BTreeMap::new();
    for &block in graph.reverse_postorder() {
        let live = liveness.live_before(function, block);
        let mut state = reaching[block].clone();
        for (point, live_slots) in live.iter().enumerate() {
            for slot in live_slots {
                if let Some(&def) = state.get(slot).and_then(|defs| defs.iter().next()) {
                    let root = webs.find(def);
                    ranges.entry(root).or_default().points.insert((block, point));
                }
            }
            if let Some(statement) = function.blocks[block].contents.get(point) {
                definitions.transfer(&mut state, block, point, statement);
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for def in 0..definitions.len() {
        let Some(block) = definitions.block(def) else {
            continue;
        };
        let slot = definitions.slot(def);
        let data = &function.blocks[block];
        if let Some(variable) = function
            .debug_locals
            .iter()
            .position(|local| local.slot == slot && local.covers(data))
        {
            let root = webs.find(def);
            let group = groups.entry(variable).or_default();
            if !group.contains(&root) {
                group.push(root);
            }
        }
    }

    for roots in groups.values() {
        let mut merged = roots[0];
        let mut range = ranges.get(&merged).cloned().unwrap_or_default();
        for &root in &roots[1..] {
            let other = ranges.get(&root).cloned().unwrap_or_default();
            if range.interferes(&other) {
                debug!("[locals] debug variable split: webs {merged} and {root} interfere");
                continue;
            }
            webs.union(merged, root);
            merged = webs.find(merged);
            range.points.extend(other.points);
        }
    }
}

/// Live ranges of resolved locals, for interference checks.
pub fn live_ranges(
    function: &WarpedFunction,
    max_rounds: usize,
) -> Result<BTreeMap<LocalId, LiveRange>, FailureReason> {
    let graph = FlowGraph::new(function);
    let liveness = Liveness::<LocalId>::solve(function, max_rounds)?;
    let mut ranges: BTreeMap<LocalId, LiveRange> = BTreeMap::new();
    for &block in graph.reverse_postorder() {
        for (point, live) in liveness.live_before(function, block).iter().enumerate() {
            for local in live {
                ranges.entry(*local).or_default().points.insert((block, point));
            }
        }
    }
    Ok(ranges)
}

/// A step into a nested body: the node index, then which of its bodies.
type Descent = (usize, usize);

/// Where a local occurs: the descent into its body and the index of the node there.
#[derive(Clone, Debug)]
struct Occurrence {
    descent: Vec<Descent>,
    index: usize,
}

fn collect_occurrences(
    body: &[Node],
    path: &mut Vec<Descent>,
    out: &mut BTreeMap<LocalId, Vec<Occurrence>>,
) {
    for (index, node) in body.iter().enumerate() {
        let mut here: Vec<LocalId> = node.defined_locals();
        if !matches!(node, Node::RepeatUntil { .. }) {
            here.extend(node.expressions().into_iter().flat_map(|e| e.locals()));
        }
        for local in here {
            out.entry(local).or_default().push(Occurrence {
                descent: path.clone(),
                index,
            });
        }
        for (which, nested) in node.bodies().into_iter().enumerate() {
            path.push((index, which));
            collect_occurrences(nested, path, out);
            path.pop();
        }
        if let Node::RepeatUntil { body, condition } = node {
            path.push((index, 0));
            for local in condition.locals() {
                out.entry(local).or_default().push(Occurrence {
                    descent: path.clone(),
                    index: body.len(),
                });
            }
            path.pop();
        }
    }
}

/// The innermost body enclosing all occurrences and the first index there.
fn common_position(occurrences: &[Occurrence]) -> Option<(Vec<Descent>, usize)> {
    let first = occurrences.first()?;
    let mut descent = vec![];
    for (depth, step) in first.descent.iter().enumerate() {
        if occurrences.iter().all(|o| o.descent.get(depth) == Some(step)) {
            descent.push(*step);
        } else {
            break;
        }
    }
    let depth = descent.len();
    let index = occurrences
        .iter()
        .map(|o| o.descent.get(depth).map(|step| step.0).unwrap_or(o.index))
        .min()?;
    Some((descent, index))
}

fn body_at<'a>(root: &'a [Node], descent: &[Descent]) -> Option<&'a [Node]> {
    let mut body = root;
    for &(index, which) in descent {
        body = body.get(index)?.bodies().into_iter().nth(which)?.as_slice();
    }
    Some(body)
}

fn body_at_mut<'a>(root: &'a mut Vec<Node>, descent: &[Descent]) -> Option<&'a mut Vec<Node>> {
    let mut body = root;
    for &(index, which) in descent {
        body = body.get_mut(index)?.bodies_mut().into_iter().nth(which)?;
    }
    Some(body)
}

/// Whether `local` may be read before it is assigned when running `body`,
/// then evaluating `tail` (the `until` condition of an enclosing repeat).
fn read_before_assignment(body: &[Node], tail: Option<&Expression>, local: LocalId) -> bool {
    let mut assigned = false;
    if scan(body, local, &mut assigned) {
        return true;
    }
    tail.is_some_and(|condition| !assigned && condition.count_local(local) > 0)
}

fn scan(body: &[Node], local: LocalId, assigned: &mut bool) -> bool {
    body.iter().any(|node| visit(node, local, assigned))
}

fn reads(expressions: &[&Expression], local: LocalId) -> bool {
    expressions.iter().any(|e| e.count_local(local) > 0)
}

fn visit(node: &Node, local: LocalId, assigned: &mut bool) -> bool {
    match node {
        Node::Statement(statement) => {
            if !*assigned && statement.read_locals().contains(&local) {
                return true;
            }
            if !matches!(statement, Statement::Declare { .. })
                && statement.written_locals().contains(&local)
            {
                *assigned = true;
            }
            false
        }
        Node::Block(body) => scan(body, local, assigned),
        Node::Break => false,
        Node::If {
            condition,
            then_body,
            else_body,
        } => {
            if !*assigned && condition.count_local(local) > 0 {
                return true;
            }
            let mut then_assigned = *assigned;
            if scan(then_body, local, &mut then_assigned) {
                return true;
            }
            let mut else_assigned = *assigned;
            if let Some(else_body) = else_body {
                if scan(else_body, local, &mut else_assigned) {
                    return true;
                }
            }
            let then_done = then_assigned || ends_in_exit(then_body);
            let else_done = else_assigned || else_body.as_deref().is_some_and(ends_in_exit);
            *assigned = then_done && else_done;
            false
        }
        Node::While { condition, body } => {
            if !*assigned && condition.count_local(local) > 0 {
                return true;
            }
            let mut inner = *assigned;
            scan(body, local, &mut inner)
        }
        Node::RepeatUntil { body, condition } => {
            if scan(body, local, assigned) {
                return true;
            }
            !*assigned && condition.count_local(local) > 0
        }
        Node::NumericFor {
            start,
            stop,
            step,
            body,
            ..
        } => {
            if !*assigned && reads(&[start, stop, step], local) {
                return true;
            }
            let mut inner = *assigned;
            scan(body, local, &mut inner)
        }
        Node::GenericFor {
            iterators, body, ..
        } => {
            if !*assigned && reads(&iterators.iter().collect::<Vec<_>>(), local) {
                return true;
            }
            let mut inner = *assigned;
            scan(body, local, &mut inner)
        }
    }
}

/// Give every local variable a declaration point in the structured tree.
///
/// Locals first assigned by a plain assignment are declared there (`local x = ...`);
/// otherwise a bare `local x` is inserted where the declaration has to go.
pub fn place_declarations(function: &mut StructuredFunction) {
    let mut occurrences = BTreeMap::new();
    collect_occurrences(&function.body, &mut vec![], &mut occurrences);

    let mut placements: BTreeMap<(Vec<Descent>, usize), Vec<LocalId>> = BTreeMap::new();
    for info in function.locals.iter() {
        if info.kind != LocalKind::Variable {
            continue;
        }
        let Some((mut descent, mut index)) = occurrences
            .get(&info.id)
            .and_then(|found| common_position(found))
        else {
            continue;
        };
        loop {
            let Some(body) = body_at(&function.body, &descent) else {
                break;
            };
            let tail = match descent.split_last() {
                Some((&(parent_index, _), parent_descent)) => body_at(&function.body, parent_descent)
                    .and_then(|parent| match parent.get(parent_index) {
                        Some(Node::RepeatUntil { condition, .. }) => Some(condition),
                        _ => None,
                    }),
                None => None,
            };
            if !read_before_assignment(&body[index.min(body.len())..], tail, info.id) {
                break;
            }
            let Some((parent_index, _)) = descent.pop() else {
                break;
            };
            index = parent_index;
            let enclosing_loop = body_at(&function.body, &descent)
                .and_then(|parent| parent.get(parent_index))
                .is_some_and(Node::is_loop);
            if enclosing_loop {
                break;
            }
        }
        placements.entry((descent, index)).or_default().push(info.id);
    }

    // Later positions first so earlier insertions do not shift pending ones.
    let ordered = placements
        .into_iter()
        .sorted_by(|(a, _), (b, _)| declaration_order(b).cmp(&declaration_order(a)))
        .collect::<Vec<_>>();
    for ((descent, index), locals) in ordered {
        let Some(body) = body_at_mut(&mut function.body, &descent) else {
            continue;
        };
        let remaining = mark_declaring_assignment(body.get_mut(index), &locals);
        if !remaining.is_empty() {
            body.insert(
                index.min(body.len()),
                Node::Statement(Statement::Declare { locals: remaining }),
            );
        }
    }
}

/// Order key placing a position after every position nested inside its node.
fn declaration_order((descent, index): &(Vec<Descent>, usize)) -> Vec<Descent> {
    let mut key = descent.clone();
    key.push((*index, 0));
    key
}

/// Turn `node` into a `local` assignment when it first assigns exactly these
/// locals, returning the locals still needing a bare declaration.
fn mark_declaring_assignment(node: Option<&mut Node>, locals: &[LocalId]) -> Vec<LocalId> {
    if let Some(Node::Statement(Statement::Assignment(assignment))) = node {
        let destinations: Option<Vec<LocalId>> = assignment
            .destinations
            .iter()
            .map(|destination| match destination {
                Expression::Local(id) if locals.contains(id) => Some(*id),
                _ => None,
            })
            .collect();
        let self_reference = assignment
            .expressions
            .iter()
            .any(|e| e.locals().any(|id| locals.contains(&id)));
        if let Some(destinations) = destinations {
            if !assignment.declares && !self_reference {
                assignment.declares = true;
                return locals
                    .iter()
                    .filter(|id| !destinations.contains(id))
                    .copied()
                    .collect();
            }
        }
    }
    locals.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{BinOp, PrototypeId};
    use crate::warped::{Block, Warp};

    fn assign(slot: SlotIndex, value: Expression) -> Statement {
        Statement::assign(Expression::slot(slot), value)
    }

    fn call(function: &str, arguments: Vec<Expression>) -> Statement {
        Statement::Call {
            function: Expression::global(function),
            arguments,
            line: 0,
        }
    }

    #[test]
    fn test_reused_slot_gets_two_locals() {
        // s1 = 1; f(s1); s1 = 2; f(s1)
        let mut function = WarpedFunction::new(
            0,
            0,
            vec![Block::new(
                0,
                vec![
                    assign(1, Expression::number(1.0)),
                    call("f", vec![Expression::slot(1)]),
                    assign(1, Expression::number(2.0)),
                    call("f", vec![Expression::slot(1)]),
                ],
                Warp::End,
            )],
        );
        let table = resolve(&mut function, &PipelineOptions::default()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.name(LocalId(0)), "slot1");
        assert_eq!(table.name(LocalId(1)), "slot1_1");
        assert!(matches!(
            &function.blocks[0].contents[3],
            Statement::Call { arguments, .. } if arguments == &vec![Expression::Local(LocalId(1))]
        ));
    }

    #[test]
    fn test_branch_writes_meeting_at_a_read_share_a_local() {
        // if s0 then s1 = 1 else s1 = 2 end; return s1
        let mut function = WarpedFunction::new(
            0,
            1,
            vec![
                Block::new(
                    0,
                    vec![],
                    Warp::Conditional {
                        condition: Expression::slot(0),
                        true_target: 1,
                        false_target: 2,
                    },
                ),
                Block::new(1, vec![assign(1, Expression::number(1.0))], Warp::Unconditional(3)),
                Block::new(2, vec![assign(1, Expression::number(2.0))], Warp::Unconditional(3)),
                Block::new(
                    3,
                    vec![Statement::Return {
                        values: vec![Expression::slot(1)],
                        line: 0,
                    }],
                    Warp::End,
                ),
            ],
        );
        let table = resolve(&mut function, &PipelineOptions::default()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(LocalId(0)).map(|l| l.kind), Some(LocalKind::Parameter));
        let ranges = live_ranges(&function, 100).unwrap();
        assert!(ranges[&LocalId(1)].points.contains(&(3, 0)));
    }

    #[test]
    fn test_undefined_read_is_malformed() {
        let mut function = WarpedFunction::new(
            0,
            0,
            vec![Block::new(0, vec![call("f", vec![Expression::slot(4)])], Warp::End)],
        );
        assert!(matches!(
            resolve(&mut function, &PipelineOptions::default()),
            Err(FailureReason::MalformedGraph(Violation::UndefinedSlot { slot: 4, .. }))
        ));
    }

    fn structured(body: Vec<Node>, locals: LocalTable) -> StructuredFunction {
        StructuredFunction {
            id: PrototypeId(0),
            parameters: vec![],
            is_variadic: false,
            body,
            locals,
            notes: vec![],
            children: vec![],
        }
    }

    fn set(local: LocalId, value: Expression) -> Node {
        Node::Statement(Statement::assign(Expression::Local(local), value))
    }

    #[test]
    fn test_declaration_is_attached_to_first_assignment() {
        let mut locals = LocalTable::default();
        let x = locals.push(1, "x".into(), LocalKind::Variable);
        let mut function = structured(
            vec![
                set(x, Expression::number(1.0)),
                Node::Statement(Statement::Return {
                    values: vec![Expression::Local(x)],
                    line: 0,
                }),
            ],
            locals,
        );
        place_declarations(&mut function);
        assert!(matches!(
            &function.body[0],
            Node::Statement(Statement::Assignment(a)) if a.declares
        ));
        assert_eq!(function.body.len(), 2);
    }

    #[test]
    fn test_branch_assigned_local_is_declared_before_the_if() {
        let mut locals = LocalTable::default();
        let x = locals.push(1, "x".into(), LocalKind::Variable);
        let mut function = structured(
            vec![
                Node::If {
                    condition: Expression::global("c"),
                    then_body: vec![set(x, Expression::number(1.0))],
                    else_body: Some(vec![set(x, Expression::number(2.0))]),
                },
                Node::Statement(Statement::Return {
                    values: vec![Expression::Local(x)],
                    line: 0,
                }),
            ],
            locals,
        );
        place_declarations(&mut function);
        assert_eq!(
            function.body[0],
            Node::Statement(Statement::Declare { locals: vec![x] })
        );
        assert_eq!(function.body.len(), 3);
    }

    #[test]
    fn test_loop_local_is_declared_inside_the_loop() {
        let mut locals = LocalTable::default();
        let x = locals.push(2, "x".into(), LocalKind::Variable);
        let mut function = structured(
            vec![Node::While {
                condition: Expression::global("c"),
                body: vec![
                    set(x, Expression::call(Expression::global("f"), vec![])),
                    Node::Statement(Statement::Call {
                        function: Expression::global("g"),
                        arguments: vec![Expression::Local(x)],
                        line: 0,
                    }),
                ],
            }],
            locals,
        );
        place_declarations(&mut function);
        let Node::While { body, .. } = &function.body[0] else {
            panic!("expected a while loop");
        };
        assert!(matches!(&body[0], Node::Statement(Statement::Assignment(a)) if a.declares));
    }

    #[test]
    fn test_value_carried_between_iterations_is_declared_before_the_loop() {
        // while c do if first then x = 1 else g(x) end end
        let mut locals = LocalTable::default();
        let x = locals.push(2, "x".into(), LocalKind::Variable);
        let mut function = structured(
            vec![Node::While {
                condition: Expression::global("c"),
                body: vec![Node::If {
                    condition: Expression::global("first"),
                    then_body: vec![set(x, Expression::number(1.0))],
                    else_body: Some(vec![Node::Statement(Statement::Call {
                        function: Expression::global("g"),
                        arguments: vec![Expression::Local(x)],
                        line: 0,
                    })]),
                }],
            }],
            locals,
        );
        place_declarations(&mut function);
        assert_eq!(
            function.body[0],
            Node::Statement(Statement::Declare { locals: vec![x] })
        );
        assert!(matches!(function.body[1], Node::While { .. }));
    }

    #[test]
    fn test_self_referencing_first_assignment_gets_bare_declaration() {
        // x = x + 1 cannot become `local x = x + 1`
        let mut locals = LocalTable::default();
        let x = locals.push(0, "x".into(), LocalKind::Variable);
        let mut function = structured(
            vec![set(
                x,
                Expression::binary(BinOp::Add, Expression::Local(x), Expression::number(1.0)),
            )],
            locals,
        );
        place_declarations(&mut function);
        assert_eq!(
            function.body[0],
            Node::Statement(Statement::Declare { locals: vec![x] })
        );
    }
}
