//! Node representation.
//!
//! A node is an operation kind, a stamp, a compact input list, and an
//! optional frame-state edge. Usage back-references live in the graph,
//! not here, so the node stays small and the graph can maintain edge
//! symmetry in one place.

use super::arena::Id;
use super::ops::OpKind;
use super::stamp::Stamp;

/// Identifier of a node within its graph.
pub type NodeId = Id<Node>;

// =============================================================================
// Input List
// =============================================================================

/// Inputs stored inline up to this arity.
const INLINE_INPUTS: usize = 4;

/// Compact input list. Most nodes have at most four inputs; phis and
/// merges with many predecessors spill to a heap vector.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum InputList {
    Empty,
    One(NodeId),
    Two(NodeId, NodeId),
    Three(NodeId, NodeId, NodeId),
    Four(NodeId, NodeId, NodeId, NodeId),
    Spilled(Vec<NodeId>),
}

impl InputList {
    pub const fn empty() -> Self {
        InputList::Empty
    }

    pub fn from_slice(inputs: &[NodeId]) -> Self {
        match *inputs {
            [] => InputList::Empty,
            [a] => InputList::One(a),
            [a, b] => InputList::Two(a, b),
            [a, b, c] => InputList::Three(a, b, c),
            [a, b, c, d] => InputList::Four(a, b, c, d),
            _ => InputList::Spilled(inputs.to_vec()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            InputList::Empty => 0,
            InputList::One(_) => 1,
            InputList::Two(..) => 2,
            InputList::Three(..) => 3,
            InputList::Four(..) => 4,
            InputList::Spilled(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, InputList::Empty)
    }

    pub fn get(&self, index: usize) -> Option<NodeId> {
        match self {
            InputList::Empty => None,
            InputList::One(a) => [*a].get(index).copied(),
            InputList::Two(a, b) => [*a, *b].get(index).copied(),
            InputList::Three(a, b, c) => [*a, *b, *c].get(index).copied(),
            InputList::Four(a, b, c, d) => [*a, *b, *c, *d].get(index).copied(),
            InputList::Spilled(v) => v.get(index).copied(),
        }
    }

    /// Overwrite the slot at `index`. Out-of-range indices are a bug.
    pub fn set(&mut self, index: usize, value: NodeId) {
        debug_assert!(index < self.len(), "input slot {} out of range", index);
        match (self, index) {
            (InputList::One(a), 0) => *a = value,
            (InputList::Two(a, _), 0) => *a = value,
            (InputList::Two(_, b), 1) => *b = value,
            (InputList::Three(a, _, _), 0) => *a = value,
            (InputList::Three(_, b, _), 1) => *b = value,
            (InputList::Three(_, _, c), 2) => *c = value,
            (InputList::Four(a, _, _, _), 0) => *a = value,
            (InputList::Four(_, b, _, _), 1) => *b = value,
            (InputList::Four(_, _, c, _), 2) => *c = value,
            (InputList::Four(_, _, _, d), 3) => *d = value,
            (InputList::Spilled(v), i) => v[i] = value,
            _ => {}
        }
    }

    pub fn push(&mut self, value: NodeId) {
        *self = match std::mem::replace(self, InputList::Empty) {
            InputList::Empty => InputList::One(value),
            InputList::One(a) => InputList::Two(a, value),
            InputList::Two(a, b) => InputList::Three(a, b, value),
            InputList::Three(a, b, c) => InputList::Four(a, b, c, value),
            InputList::Four(a, b, c, d) => InputList::Spilled(vec![a, b, c, d, value]),
            InputList::Spilled(mut v) => {
                v.push(value);
                InputList::Spilled(v)
            }
        };
    }

    /// Remove the slot at `index`, shifting later slots down.
    pub fn remove(&mut self, index: usize) {
        debug_assert!(index < self.len());
        let mut v: Vec<NodeId> = self.iter().collect();
        v.remove(index);
        *self = InputList::from_slice(&v);
    }

    pub fn iter(&self) -> InputIter<'_> {
        InputIter {
            list: self,
            index: 0,
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.iter().any(|x| x == id)
    }
}

impl Default for InputList {
    fn default() -> Self {
        InputList::Empty
    }
}

impl std::fmt::Debug for InputList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over input slots.
pub struct InputIter<'a> {
    list: &'a InputList,
    index: usize,
}

impl<'a> Iterator for InputIter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.list.get(self.index);
        self.index += 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.list.len().saturating_sub(self.index);
        (rest, Some(rest))
    }
}

impl ExactSizeIterator for InputIter<'_> {}

// =============================================================================
// Node
// =============================================================================

/// A node in the graph. Construction and mutation go through [`Graph`]
/// so that usage lists stay symmetric with inputs.
///
/// [`Graph`]: super::graph::Graph
#[derive(Clone)]
pub struct Node {
    pub op: OpKind,
    pub stamp: Stamp,
    pub(super) inputs: InputList,
    /// Frame-state edge of state splits, distinct from input slots.
    pub(super) state: Option<NodeId>,
}

impl Node {
    pub(super) fn new(op: OpKind, stamp: Stamp, inputs: InputList) -> Self {
        Node {
            op,
            stamp,
            inputs,
            state: None,
        }
    }

    #[inline]
    pub fn inputs(&self) -> InputIter<'_> {
        self.inputs.iter()
    }

    #[inline]
    pub fn input(&self, index: usize) -> Option<NodeId> {
        self.inputs.get(index)
    }

    #[inline]
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    #[inline]
    pub fn state(&self) -> Option<NodeId> {
        self.state
    }

    #[inline]
    pub fn is_phi(&self) -> bool {
        matches!(self.op, OpKind::Phi)
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        matches!(self.op, OpKind::Constant(_))
    }

    pub fn as_int_constant(&self) -> Option<i64> {
        match &self.op {
            OpKind::Constant(c) => c.as_int(),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.op.name())?;
        if let OpKind::Constant(c) = &self.op {
            write!(f, "({:?})", c)?;
        }
        if !self.inputs.is_empty() {
            write!(f, " {:?}", self.inputs)?;
        }
        if let Some(s) = self.state {
            write!(f, " state={:?}", s)?;
        }
        write!(f, " : {}", self.stamp)
    }
}

// Keep the inline limit honest if variants change.
const _: () = assert!(INLINE_INPUTS == 4);

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> NodeId {
        NodeId::new(n)
    }

    #[test]
    fn test_input_list_shapes() {
        let list = InputList::from_slice(&[id(0), id(1), id(2)]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.get(1), Some(id(1)));
        assert_eq!(list.get(3), None);
    }

    #[test]
    fn test_input_list_push_spills() {
        let mut list = InputList::empty();
        for i in 0..6 {
            list.push(id(i));
        }
        assert_eq!(list.len(), 6);
        assert!(matches!(list, InputList::Spilled(_)));
        assert_eq!(list.iter().collect::<Vec<_>>(), (0..6).map(id).collect::<Vec<_>>());
    }

    #[test]
    fn test_input_list_set_and_remove() {
        let mut list = InputList::from_slice(&[id(0), id(1), id(2)]);
        list.set(2, id(9));
        assert_eq!(list.get(2), Some(id(9)));

        list.remove(1);
        assert_eq!(list.len(), 2);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![id(0), id(9)]);
    }

    #[test]
    fn test_node_predicates() {
        use crate::ir::ops::ConstantValue;
        let n = Node::new(
            OpKind::Constant(ConstantValue::Int(3)),
            Stamp::int_constant(3),
            InputList::empty(),
        );
        assert!(n.is_constant());
        assert_eq!(n.as_int_constant(), Some(3));
        assert!(!n.is_phi());
    }
}
