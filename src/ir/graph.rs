//! The sea-of-nodes graph.
//!
//! Owns all nodes of one compilation unit in a dense arena and maintains
//! every edge in both directions: inputs are owned references stored on the
//! node, usages are back-pointers stored here. Every mutating operation
//! updates both directions, preserving the symmetry invariant
//! `A has B as input ⇔ B lists A as usage` without cyclic ownership.
//!
//! Node ids are allocated monotonically and never reused within a graph.
//! Traversal marks are issued from a per-graph counter so a pass gets O(1)
//! "visited in this pass" checks without allocating a set.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::arena::{Arena, SecondaryMap};
use super::node::{InputList, Node, NodeId};
use super::ops::{self, ConstantValue, InputType, OpKind};
use super::stamp::Stamp;

/// Snapshot of a usage list, taken before any operation that mutates it.
pub type UsageSnapshot = SmallVec<[NodeId; 8]>;

/// Token for one traversal's visited-marks. Obtain via [`Graph::next_mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeMark(u32);

/// Value-numbering key for pure floating nodes.
#[derive(PartialEq, Eq, Hash)]
struct VnKey {
    op: OpKind,
    inputs: SmallVec<[NodeId; 4]>,
}

// =============================================================================
// Graph
// =============================================================================

pub struct Graph {
    nodes: Arena<Node>,
    usages: SecondaryMap<Node, Vec<NodeId>>,
    start: NodeId,
    end: NodeId,
    /// Monotonic per-graph traversal mark counter.
    mark_counter: u32,
    marks: SecondaryMap<Node, u32>,
    /// Hash-consing cache for `unique`. Entries are validated on lookup,
    /// so stale keys left behind by input rewrites are harmless.
    vn_cache: FxHashMap<VnKey, NodeId>,
}

impl Graph {
    /// Create a graph containing a start node and an (initially empty)
    /// end node.
    pub fn new() -> Self {
        let mut nodes = Arena::with_capacity(64);
        let start = nodes.alloc(Node::new(OpKind::Start, Stamp::Control, InputList::empty()));
        let end = nodes.alloc(Node::new(OpKind::End, Stamp::Control, InputList::empty()));

        Graph {
            nodes,
            usages: SecondaryMap::new(),
            start,
            end,
            mark_counter: 0,
            marks: SecondaryMap::new(),
            vn_cache: FxHashMap::default(),
        }
    }

    #[inline]
    pub fn start(&self) -> NodeId {
        self.start
    }

    #[inline]
    pub fn end(&self) -> NodeId {
        self.end
    }

    /// Redirect the distinguished entry, e.g. after splicing an OsrStart.
    pub fn set_start(&mut self, start: NodeId) {
        debug_assert!(matches!(
            self.node(start).op,
            OpKind::Start | OpKind::OsrStart
        ));
        self.start = start;
    }

    // =========================================================================
    // Access
    // =========================================================================

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn try_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    #[inline]
    pub fn stamp(&self, id: NodeId) -> Stamp {
        self.nodes[id].stamp
    }

    pub fn set_stamp(&mut self, id: NodeId, stamp: Stamp) {
        self.nodes[id].stamp = stamp;
    }

    /// Refine a stamp: the node keeps the stronger of the two. Stamps are
    /// never widened through this path.
    pub fn refine_stamp(&mut self, id: NodeId, other: Stamp) {
        let joined = self.nodes[id].stamp.join(&other);
        self.nodes[id].stamp = joined;
    }

    /// Number of live nodes.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.nodes.live_count()
    }

    /// Exclusive upper bound on node ids; sizes secondary maps/bit sets.
    #[inline]
    pub fn id_bound(&self) -> usize {
        self.nodes.id_bound()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.ids()
    }

    #[inline]
    pub fn input(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.nodes[id].input(index)
    }

    /// Control predecessor of a fixed node (slot 0).
    pub fn control_pred(&self, id: NodeId) -> Option<NodeId> {
        let node = &self.nodes[id];
        if node.op.is_fixed() && !matches!(node.op, OpKind::Start | OpKind::OsrStart) {
            node.input(0)
        } else {
            None
        }
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Add a fresh node. Never hash-conses; see [`Graph::unique`] for that.
    pub fn add(&mut self, op: OpKind, inputs: &[NodeId]) -> NodeId {
        let stamps: SmallVec<[Stamp; 4]> =
            inputs.iter().map(|&i| self.nodes[i].stamp).collect();
        let stamp = ops::default_stamp(&op, &stamps);
        self.add_with_stamp(op, inputs, stamp)
    }

    /// Add a fresh node with an explicit stamp.
    pub fn add_with_stamp(&mut self, op: OpKind, inputs: &[NodeId], stamp: Stamp) -> NodeId {
        let id = self
            .nodes
            .alloc(Node::new(op, stamp, InputList::from_slice(inputs)));
        for &input in inputs {
            self.add_usage(input, id);
        }
        id
    }

    /// Add or reuse: pure floating nodes are hash-consed on (kind, inputs).
    /// Returns the existing equal node when there is one.
    pub fn unique(&mut self, op: OpKind, inputs: &[NodeId]) -> NodeId {
        if !op.is_pure() {
            return self.add(op, inputs);
        }
        let key = VnKey {
            op: op.clone(),
            inputs: SmallVec::from_slice(inputs),
        };
        if let Some(&cand) = self.vn_cache.get(&key) {
            // Validate: the cached node may have been deleted or rewritten
            // since it was cached.
            if let Some(node) = self.nodes.get(cand) {
                if node.op == key.op && node.inputs().eq(inputs.iter().copied()) {
                    return cand;
                }
            }
            self.vn_cache.remove(&key);
        }
        let id = self.add(op, inputs);
        self.vn_cache.insert(key, id);
        id
    }

    /// Interned integer constant.
    pub fn int_constant(&mut self, value: i64) -> NodeId {
        self.unique(OpKind::Constant(ConstantValue::Int(value)), &[])
    }

    /// Interned boolean constant.
    pub fn bool_constant(&mut self, value: bool) -> NodeId {
        self.unique(OpKind::Constant(ConstantValue::Bool(value)), &[])
    }

    /// Interned null constant.
    pub fn null_constant(&mut self) -> NodeId {
        self.unique(OpKind::Constant(ConstantValue::Null), &[])
    }

    // =========================================================================
    // Usage Lists
    // =========================================================================

    /// Usage back-references: one entry per input edge pointing at `id`
    /// (a user appears once per slot), plus state edges.
    pub fn usages(&self, id: NodeId) -> &[NodeId] {
        self.usages.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    #[inline]
    pub fn usage_count(&self, id: NodeId) -> usize {
        self.usages.get(id).map(|v| v.len()).unwrap_or(0)
    }

    /// Snapshot a usage list before mutating it. Required by every
    /// traversal that rewrites edges while iterating.
    pub fn snapshot_usages(&self, id: NodeId) -> UsageSnapshot {
        SmallVec::from_slice(self.usages(id))
    }

    fn add_usage(&mut self, def: NodeId, user: NodeId) {
        self.usages.grow(def.as_usize() + 1);
        self.usages
            .get_mut(def)
            .expect("usage map sized")
            .push(user);
    }

    fn remove_usage(&mut self, def: NodeId, user: NodeId) {
        let list = self.usages.get_mut(def).expect("usage list");
        let pos = list
            .iter()
            .position(|&u| u == user)
            .expect("edge symmetry: missing usage back-reference");
        list.swap_remove(pos);
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Rewrite one input slot, keeping back-references symmetric.
    pub fn set_input(&mut self, user: NodeId, index: usize, new_input: NodeId) {
        let old = self.nodes[user].input(index).expect("input slot");
        if old == new_input {
            return;
        }
        self.remove_usage(old, user);
        self.nodes[user].inputs.set(index, new_input);
        self.add_usage(new_input, user);
    }

    /// Append an input slot (merge predecessors, phi values).
    pub fn append_input(&mut self, user: NodeId, input: NodeId) {
        self.nodes[user].inputs.push(input);
        self.add_usage(input, user);
    }

    /// Remove an input slot, shifting later slots down.
    pub fn remove_input(&mut self, user: NodeId, index: usize) {
        let old = self.nodes[user].input(index).expect("input slot");
        self.remove_usage(old, user);
        self.nodes[user].inputs.remove(index);
    }

    /// Attach, replace, or detach the frame-state edge.
    pub fn set_state(&mut self, user: NodeId, state: Option<NodeId>) {
        debug_assert!(state.is_none() || self.nodes[user].op.has_state_edge());
        if let Some(old) = self.nodes[user].state {
            self.remove_usage(old, user);
        }
        self.nodes[user].state = state;
        if let Some(new) = state {
            self.add_usage(new, user);
        }
    }

    /// Rewire every usage of `old` to `new`. With a filter, only edges of
    /// that category are rewritten (the state edge matches
    /// `InputType::State`).
    pub fn replace_at_usages(&mut self, old: NodeId, new: NodeId, filter: Option<InputType>) {
        if old == new {
            return;
        }
        let users = self.snapshot_usages(old);
        for user in users {
            // The snapshot can hold one entry per edge; slots are
            // re-checked so each is rewritten exactly once.
            let count = self.nodes[user].input_count();
            for slot in 0..count {
                if self.nodes[user].input(slot) != Some(old) {
                    continue;
                }
                let ty = ops::input_type(&self.nodes[user].op, slot);
                if filter.map_or(true, |f| f == ty) {
                    self.set_input(user, slot, new);
                }
            }
            if self.nodes.contains(user)
                && self.nodes[user].state == Some(old)
                && filter.map_or(true, |f| f == InputType::State)
            {
                self.set_state(user, Some(new));
            }
        }
    }

    /// Rewire all usages of `old` to `new`, then delete `old`.
    pub fn replace_and_delete(&mut self, old: NodeId, new: NodeId) {
        assert_ne!(old, new, "node replaced by itself");
        self.replace_at_usages(old, new, None);
        self.delete(old);
    }

    /// Delete a node. Fails fatally if any usage remains: a delete must
    /// never silently detach users.
    pub fn delete(&mut self, id: NodeId) {
        let remaining = self.usage_count(id);
        assert!(
            remaining == 0,
            "node {} still has {} usages: {:?}",
            id,
            remaining,
            self.usages(id)
        );
        self.clear_inputs(id);
        self.uncache(id);
        self.nodes.remove(id);
    }

    /// Drop all input and state edges of `id`, updating back-references.
    /// Used to break edges among a group of dead nodes before deletion.
    pub fn clear_inputs(&mut self, id: NodeId) {
        let inputs: SmallVec<[NodeId; 4]> = self.nodes[id].inputs().collect();
        for input in inputs {
            self.remove_usage(input, id);
        }
        self.nodes[id].inputs = InputList::empty();
        if let Some(state) = self.nodes[id].state {
            self.remove_usage(state, id);
            self.nodes[id].state = None;
        }
    }

    fn uncache(&mut self, id: NodeId) {
        let node = &self.nodes[id];
        if !node.op.is_pure() {
            return;
        }
        let key = VnKey {
            op: node.op.clone(),
            inputs: node.inputs().collect(),
        };
        if self.vn_cache.get(&key) == Some(&id) {
            self.vn_cache.remove(&key);
        }
    }

    // =========================================================================
    // Fixed-Chain Splicing
    // =========================================================================

    /// Create a fixed node and splice it into the control chain directly
    /// before `before`. Extra inputs follow the control slot.
    pub fn add_before(&mut self, op: OpKind, extra_inputs: &[NodeId], before: NodeId) -> NodeId {
        debug_assert!(op.is_fixed());
        let pred = self.control_pred(before).expect("spliced before a chained node");
        let mut inputs: SmallVec<[NodeId; 4]> = SmallVec::new();
        inputs.push(pred);
        inputs.extend_from_slice(extra_inputs);
        let id = self.add(op, &inputs);
        self.set_input(before, 0, id);
        id
    }

    /// Create a fixed node and splice it directly after `after`: control
    /// usages of `after` move to the new node. Only valid after
    /// straight-line fixed nodes (not merges, not branches).
    pub fn add_after(&mut self, op: OpKind, extra_inputs: &[NodeId], after: NodeId) -> NodeId {
        debug_assert!(op.is_fixed());
        debug_assert!(!self.nodes[after].op.is_merge() && !matches!(self.nodes[after].op, OpKind::If));
        let users = self.snapshot_usages(after);
        let mut inputs: SmallVec<[NodeId; 4]> = SmallVec::new();
        inputs.push(after);
        inputs.extend_from_slice(extra_inputs);
        let id = self.add(op, &inputs);
        for user in users {
            if user == id {
                continue;
            }
            let count = self.nodes[user].input_count();
            for slot in 0..count {
                if self.nodes[user].input(slot) == Some(after)
                    && ops::input_type(&self.nodes[user].op, slot) == InputType::Control
                {
                    self.set_input(user, slot, id);
                }
            }
        }
        id
    }

    /// Unlink a straight-line fixed node from the control chain and delete
    /// it. Non-control usages must already be gone.
    pub fn remove_fixed(&mut self, id: NodeId) {
        let pred = self.control_pred(id).expect("chained fixed node");
        self.replace_at_usages(id, pred, Some(InputType::Control));
        if self.nodes[id].state.is_some() {
            self.set_state(id, None);
        }
        self.delete(id);
    }

    // =========================================================================
    // Merges and Phis
    // =========================================================================

    /// Phis attached to a merge-like node.
    pub fn phis(&self, merge: NodeId) -> SmallVec<[NodeId; 4]> {
        self.usages(merge)
            .iter()
            .copied()
            .filter(|&u| self.nodes[u].is_phi() && self.nodes[u].input(0) == Some(merge))
            .collect()
    }

    /// Loop ends attached to a loop header, i.e. its back edges.
    pub fn loop_ends(&self, loop_begin: NodeId) -> SmallVec<[NodeId; 2]> {
        self.usages(loop_begin)
            .iter()
            .copied()
            .filter(|&u| {
                matches!(self.nodes[u].op, OpKind::LoopEnd)
                    && self.nodes[u].input(1) == Some(loop_begin)
            })
            .collect()
    }

    /// Control predecessor count of a merge-like node. For a loop header
    /// this is the forward entry plus one per back edge.
    pub fn merge_pred_count(&self, merge: NodeId) -> usize {
        match self.nodes[merge].op {
            OpKind::Merge => self.nodes[merge].input_count(),
            OpKind::LoopBegin => 1 + self.loop_ends(merge).len(),
            _ => 0,
        }
    }

    // =========================================================================
    // Traversal Marks
    // =========================================================================

    /// Issue a fresh mark for one traversal. Marks from earlier traversals
    /// become stale automatically; nothing is cleared.
    pub fn next_mark(&mut self) -> NodeMark {
        self.mark_counter += 1;
        NodeMark(self.mark_counter)
    }

    #[inline]
    pub fn mark(&mut self, mark: NodeMark, id: NodeId) {
        self.marks.set(id, mark.0);
    }

    #[inline]
    pub fn is_marked(&self, mark: NodeMark, id: NodeId) -> bool {
        self.marks.get(id).copied() == Some(mark.0)
    }

    // =========================================================================
    // Dump
    // =========================================================================

    /// Textual dump for trace events and verification errors.
    pub fn dump(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let _ = writeln!(out, "graph: {} live nodes, start={}", self.live_count(), self.start);
        for (id, node) in self.iter() {
            let _ = writeln!(out, "  {}: {:?}", id, node);
        }
        out
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dump())
    }
}

// =============================================================================
// Tests
// =============================================================================
