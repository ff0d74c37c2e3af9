//! Graph ordering and structural verification.
//!
//! Computes a topological order of all live nodes and checks that every
//! data dependency is schedulable, i.e. that the graph contains no cycles
//! other than the two permitted ones:
//! - the loop-phi back edge (phi input slots 2 and up on a loop header),
//! - frame states referencing values defined after their state split.
//!
//! The traversal is an iterative depth-first search with explicit frames,
//! so deep graphs cannot overflow the thread stack. Back-edge and
//! frame-state edges are "soft": a soft edge into a node currently on the
//! DFS path is skipped instead of reported as a cycle.

use super::arena::{BitSet, SecondaryMap};
use super::graph::Graph;
use super::node::{Node, NodeId};
use super::ops::OpKind;
use crate::error::VerificationError;

/// A schedulable order of all live nodes.
#[derive(Debug)]
pub struct GraphOrder {
    /// Nodes in emit order; every hard input precedes its user.
    pub sequence: Vec<NodeId>,
    positions: SecondaryMap<Node, u32>,
}

impl GraphOrder {
    /// Position of a node in the order. Unordered nodes (none, once the
    /// order is computed over a live graph) report `u32::MAX`.
    pub fn position(&self, id: NodeId) -> u32 {
        self.positions.get(id).copied().unwrap_or(u32::MAX)
    }
}

enum Frame {
    /// Visit a node reached over an edge from `parent`. Soft edges
    /// tolerate targets already on the DFS path.
    Enter {
        node: NodeId,
        parent: Option<NodeId>,
        soft: bool,
    },
    /// All children done; append the node to the order.
    Emit(NodeId),
}

/// Compute a topological order over all live nodes, or report the first
/// impermissible cycle.
pub fn compute_order(graph: &Graph) -> Result<GraphOrder, VerificationError> {
    let bound = graph.id_bound();
    let mut on_path = BitSet::with_capacity(bound);
    let mut done = BitSet::with_capacity(bound);
    let mut sequence = Vec::with_capacity(graph.live_count());
    let mut positions: SecondaryMap<Node, u32> = SecondaryMap::with_capacity(bound);
    let mut stack: Vec<Frame> = Vec::new();

    // Every live node is a root: loop ends and other pure sinks are not
    // reachable over input edges from the end node.
    let roots = std::iter::once(graph.start()).chain(graph.ids());
    for root in roots {
        if done.contains(root.as_usize()) {
            continue;
        }
        stack.push(Frame::Enter {
            node: root,
            parent: None,
            soft: false,
        });

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter { node, parent, soft } => {
                    let idx = node.as_usize();
                    if done.contains(idx) {
                        continue;
                    }
                    if on_path.contains(idx) {
                        if soft {
                            continue;
                        }
                        let parent = parent.expect("roots are never on the path");
                        return Err(cycle_error(graph, parent, node));
                    }
                    on_path.insert(idx);

                    // Phis of this merge come right behind it in the
                    // order, so push them below the emit frame.
                    if graph.node(node).op.is_merge() {
                        for phi in graph.phis(node) {
                            stack.push(Frame::Enter {
                                node: phi,
                                parent: Some(node),
                                soft: true,
                            });
                        }
                    }

                    stack.push(Frame::Emit(node));
                    push_children(graph, node, &mut stack);
                }
                Frame::Emit(node) => {
                    let idx = node.as_usize();
                    on_path.remove(idx);
                    done.insert(idx);
                    positions.set(node, sequence.len() as u32);
                    sequence.push(node);
                }
            }
        }
    }

    Ok(GraphOrder {
        sequence,
        positions,
    })
}

fn push_children(graph: &Graph, node: NodeId, stack: &mut Vec<Frame>) {
    let n = graph.node(node);

    // Frame-state edges into values later in the schedule are permitted,
    // so all inputs of a frame state are soft.
    let soft_inputs = matches!(n.op, OpKind::FrameState { .. });

    // Loop-phi back edges are the loop-carried cycle; they are not
    // traversed at all.
    let is_loop_phi = n.is_phi()
        && n.input(0)
            .map_or(false, |m| matches!(graph.node(m).op, OpKind::LoopBegin));
    let traversed = if is_loop_phi { 2.min(n.input_count()) } else { n.input_count() };

    for slot in 0..traversed {
        if let Some(input) = n.input(slot) {
            stack.push(Frame::Enter {
                node: input,
                parent: Some(node),
                soft: soft_inputs,
            });
        }
    }
    if let Some(state) = n.state() {
        stack.push(Frame::Enter {
            node: state,
            parent: Some(node),
            soft: false,
        });
    }
}

fn cycle_error(graph: &Graph, user: NodeId, input: NodeId) -> VerificationError {
    VerificationError::new(
        format!(
            "impermissible cycle: {} ({}) depends on {} ({}) which is on the path back to it",
            user,
            graph.node(user).op.name(),
            input,
            graph.node(input).op.name()
        ),
        graph.dump(),
    )
}

/// Verify the graph is schedulable: compute an order and check that every
/// hard input edge points backwards in it.
pub fn assert_non_cyclic_graph(graph: &Graph) -> Result<(), VerificationError> {
    let order = compute_order(graph)?;

    for &id in &order.sequence {
        let node = graph.node(id);
        // Frame states may reference values ordered after them.
        if matches!(node.op, OpKind::FrameState { .. }) {
            continue;
        }
        let is_loop_phi = node.is_phi()
            && node
                .input(0)
                .map_or(false, |m| matches!(graph.node(m).op, OpKind::LoopBegin));
        let pos = order.position(id);
        for (slot, input) in node.inputs().enumerate() {
            // Loop-carried values flow backwards by construction.
            if is_loop_phi && slot >= 2 {
                continue;
            }
            if order.position(input) >= pos {
                return Err(VerificationError::new(
                    format!(
                        "order violation: input {} of {} ({}) is not scheduled before it",
                        input,
                        id,
                        node.op.name()
                    ),
                    graph.dump(),
                ));
            }
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
