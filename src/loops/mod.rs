//! Loop discovery and loop-based transformations.
//!
//! Loops are identified by their header ([`OpKind::LoopBegin`]) and the
//! back edges pointing at it ([`OpKind::LoopEnd`]). The body is computed
//! in two steps: fixed nodes by a backward control walk from the back
//! edges, floating nodes by forward closure over data edges from the
//! loop phis. A floating node is loop-variant exactly when some input
//! chain reaches a value defined in the loop.

pub mod induction;
pub mod peel;

use crate::ir::arena::BitSet;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::ops::OpKind;

/// Index of a loop within [`LoopsData`].
pub type LoopIndex = usize;

/// One natural loop.
pub struct LoopInfo {
    pub header: NodeId,
    /// Back edges; at least one, or the header would not be a loop.
    pub ends: Vec<NodeId>,
    /// All nodes belonging to the loop, header and back edges included.
    pub body: BitSet,
    /// Immediate enclosing loop.
    pub parent: Option<LoopIndex>,
    pub depth: usize,
}

impl LoopInfo {
    #[inline]
    pub fn contains(&self, node: NodeId) -> bool {
        self.body.contains(node.as_usize())
    }

    pub fn body_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.body.iter().map(|i| NodeId::new(i as u32))
    }
}

/// All loops of a graph, with nesting resolved.
pub struct LoopsData {
    loops: Vec<LoopInfo>,
}

impl LoopsData {
    pub fn compute(graph: &Graph) -> Self {
        let headers: Vec<NodeId> = graph
            .iter()
            .filter(|(_, n)| matches!(n.op, OpKind::LoopBegin))
            .map(|(id, _)| id)
            .collect();

        let mut loops: Vec<LoopInfo> = headers
            .into_iter()
            .map(|header| {
                let ends: Vec<NodeId> = graph.loop_ends(header).into_vec();
                let body = loop_body(graph, header, &ends);
                LoopInfo {
                    header,
                    ends,
                    body,
                    parent: None,
                    depth: 0,
                }
            })
            .collect();

        // The immediate parent of a loop is the smallest other loop whose
        // body contains its header.
        for i in 0..loops.len() {
            let header = loops[i].header;
            let mut best: Option<LoopIndex> = None;
            for (j, outer) in loops.iter().enumerate() {
                if j == i || !outer.contains(header) {
                    continue;
                }
                if best.map_or(true, |b| outer.body.count() < loops[b].body.count()) {
                    best = Some(j);
                }
            }
            loops[i].parent = best;
        }
        for i in 0..loops.len() {
            let mut depth = 0;
            let mut cursor = loops[i].parent;
            while let Some(p) = cursor {
                depth += 1;
                cursor = loops[p].parent;
            }
            loops[i].depth = depth;
        }

        LoopsData { loops }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    #[inline]
    pub fn loop_info(&self, index: LoopIndex) -> &LoopInfo {
        &self.loops[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = (LoopIndex, &LoopInfo)> {
        self.loops.iter().enumerate()
    }

    /// The smallest loop containing `node`, if any.
    pub fn innermost_containing(&self, node: NodeId) -> Option<LoopIndex> {
        self.loops
            .iter()
            .enumerate()
            .filter(|(_, l)| l.contains(node))
            .min_by_key(|(_, l)| l.body.count())
            .map(|(i, _)| i)
    }

    /// All loops containing `node`, outermost first.
    pub fn loops_containing(&self, node: NodeId) -> Vec<LoopIndex> {
        let mut found: Vec<LoopIndex> = self
            .loops
            .iter()
            .enumerate()
            .filter(|(_, l)| l.contains(node))
            .map(|(i, _)| i)
            .collect();
        found.sort_by_key(|&i| self.loops[i].depth);
        found
    }

    /// Whether `node`'s value does not change across iterations of the
    /// loop. Anything outside the body is invariant by construction.
    #[inline]
    pub fn is_invariant(&self, index: LoopIndex, node: NodeId) -> bool {
        !self.loops[index].contains(node)
    }
}

/// Compute the body of one loop.
fn loop_body(graph: &Graph, header: NodeId, ends: &[NodeId]) -> BitSet {
    let mut body = BitSet::with_capacity(graph.id_bound());
    body.insert(header.as_usize());

    // Fixed part: backward control walk from each back edge until the
    // header stops it.
    let mut stack: Vec<NodeId> = ends.to_vec();
    while let Some(node) = stack.pop() {
        if body.contains(node.as_usize()) {
            continue;
        }
        body.insert(node.as_usize());
        match graph.node(node).op {
            OpKind::Merge => {
                // All predecessors of a merge are inside.
                stack.extend(graph.node(node).inputs());
            }
            OpKind::LoopBegin => {
                // Inner loop header: continue through its forward entry
                // and pull in its own back edges.
                if let Some(entry) = graph.input(node, 0) {
                    stack.push(entry);
                }
                stack.extend(graph.loop_ends(node));
            }
            _ => {
                if let Some(pred) = graph.input(node, 0) {
                    stack.push(pred);
                }
            }
        }
    }

    // Floating part: anything data-dependent on a loop phi (or on a fixed
    // node of the body) varies per iteration and belongs to the loop.
    let mut worklist: Vec<NodeId> = body.iter().map(|i| NodeId::new(i as u32)).collect();
    while let Some(node) = worklist.pop() {
        for &user in graph.usages(node) {
            if graph.node(user).op.is_floating() && !body.contains(user.as_usize()) {
                // Phis of other merges outside the loop consume escaping
                // values; they are not part of this loop.
                if graph.node(user).is_phi()
                    && graph
                        .node(user)
                        .input(0)
                        .map_or(false, |m| !body.contains(m.as_usize()))
                {
                    continue;
                }
                body.insert(user.as_usize());
                worklist.push(user);
            }
        }
    }

    body
}

// =============================================================================
// Tests
// =============================================================================
