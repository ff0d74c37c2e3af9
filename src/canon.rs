//! Canonicalization: local rewriting to fixpoint.
//!
//! Each node is inspected in isolation and rewritten to a simpler
//! equivalent form when one exists. Constant folding is always preferred
//! over any other rewrite. The worklist re-enqueues neighbours of every
//! change, so the pass terminates at a fixpoint where no node has a
//! simpler form. Running it twice in a row leaves the graph isomorphic.

use smallvec::SmallVec;
use tracing::trace;

use crate::error::CompileError;
use crate::ir::arena::BitSet;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::ops::{ArithKind, ConstantValue, OpKind};
use crate::ir::stamp::Stamp;
use crate::phase::{Phase, PhaseContext};

/// Outcome of inspecting one node.
enum Canonical {
    /// Already in simplest form.
    Unchanged,
    /// Equal to an existing node; rewire usages to it.
    Replace(NodeId),
    /// Equal to a node of this shape; created (or found) via `unique`.
    New(OpKind, SmallVec<[NodeId; 2]>),
    /// The node has no effect and its guard edges can be dropped.
    Dead,
}

pub struct Canonicalizer;

impl Canonicalizer {
    /// Canonicalize every live node to fixpoint.
    pub fn run(graph: &mut Graph) -> usize {
        let seeds: Vec<NodeId> = graph.ids().collect();
        Self::run_incremental(graph, seeds)
    }

    /// Canonicalize starting from the given seeds, spreading only to
    /// nodes affected by actual changes. Returns the rewrite count.
    pub fn run_incremental(graph: &mut Graph, seeds: impl IntoIterator<Item = NodeId>) -> usize {
        let mut worklist: Vec<NodeId> = seeds.into_iter().collect();
        let mut on_list = BitSet::with_capacity(graph.id_bound());
        for &id in &worklist {
            on_list.insert(id.as_usize());
        }

        let mut rewrites = 0;
        while let Some(id) = worklist.pop() {
            on_list.remove(id.as_usize());
            if !graph.contains(id) {
                continue;
            }
            match canonical(graph, id) {
                Canonical::Unchanged => {}
                Canonical::Replace(to) => {
                    replace(graph, id, to, &mut worklist, &mut on_list);
                    rewrites += 1;
                }
                Canonical::New(op, inputs) => {
                    let to = graph.unique(op, &inputs);
                    if to != id {
                        replace(graph, id, to, &mut worklist, &mut on_list);
                        rewrites += 1;
                    }
                }
                Canonical::Dead => {
                    kill_guard(graph, id, &mut worklist, &mut on_list);
                    rewrites += 1;
                }
            }
        }
        if rewrites > 0 {
            trace!(rewrites, "canonicalizer fixpoint");
        }
        rewrites
    }
}

/// Rewire all usages of `id` to `to`, keep the stronger stamp on the
/// survivor, delete `id`, and cascade-delete pure inputs that lost their
/// last usage. Neighbours whose shape changed go back on the worklist.
fn replace(
    graph: &mut Graph,
    id: NodeId,
    to: NodeId,
    worklist: &mut Vec<NodeId>,
    on_list: &mut BitSet,
) {
    debug_assert_ne!(id, to);
    // Both nodes compute the same value, so the survivor admits only
    // values both stamps admit.
    let old_stamp = graph.stamp(id);
    graph.refine_stamp(to, old_stamp);

    let users = graph.snapshot_usages(id);
    let inputs: SmallVec<[NodeId; 4]> = graph.node(id).inputs().collect();

    graph.replace_at_usages(id, to, None);
    graph.delete(id);

    for user in users {
        enqueue(graph, user, worklist, on_list);
    }
    enqueue(graph, to, worklist, on_list);
    for input in inputs {
        cascade_delete(graph, input);
        enqueue(graph, input, worklist, on_list);
    }
}

/// Remove an always-succeeding guard: detach its guard edges, then delete
/// it together with newly dead pure inputs.
fn kill_guard(graph: &mut Graph, id: NodeId, worklist: &mut Vec<NodeId>, on_list: &mut BitSet) {
    let users = graph.snapshot_usages(id);
    for user in users {
        // Walk slots backwards so removal does not shift pending ones.
        for slot in (0..graph.node(user).input_count()).rev() {
            if graph.node(user).input(slot) == Some(id)
                && crate::ir::ops::input_type(&graph.node(user).op, slot)
                    == crate::ir::ops::InputType::Guard
            {
                graph.remove_input(user, slot);
            }
        }
        enqueue(graph, user, worklist, on_list);
    }
    if graph.usage_count(id) == 0 {
        let inputs: SmallVec<[NodeId; 4]> = graph.node(id).inputs().collect();
        graph.delete(id);
        for input in inputs {
            cascade_delete(graph, input);
        }
    }
}

/// Delete a pure floating node whose last usage just went away, then its
/// own inputs transitively.
pub(crate) fn cascade_delete(graph: &mut Graph, id: NodeId) {
    let mut stack = vec![id];
    while let Some(n) = stack.pop() {
        if !graph.contains(n) || !graph.node(n).op.is_pure() || graph.usage_count(n) > 0 {
            continue;
        }
        let inputs: SmallVec<[NodeId; 4]> = graph.node(n).inputs().collect();
        graph.delete(n);
        stack.extend(inputs);
    }
}

fn enqueue(graph: &Graph, id: NodeId, worklist: &mut Vec<NodeId>, on_list: &mut BitSet) {
    if graph.contains(id) && !on_list.contains(id.as_usize()) {
        on_list.insert(id.as_usize());
        worklist.push(id);
    }
}

// =============================================================================
// Local Rules
// =============================================================================

fn canonical(graph: &Graph, id: NodeId) -> Canonical {
    let node = graph.node(id);
    match &node.op {
        OpKind::Arith(kind) => canonical_arith(graph, id, *kind),
        OpKind::Cmp(kind) => canonical_cmp(graph, id, *kind),
        OpKind::Phi => canonical_phi(graph, id),
        OpKind::Guard => {
            // Inputs are [anchor, condition].
            let cond = match node.input(1) {
                Some(c) => c,
                None => return Canonical::Unchanged,
            };
            if graph.node(cond).op == OpKind::Constant(ConstantValue::Bool(true)) {
                Canonical::Dead
            } else {
                Canonical::Unchanged
            }
        }
        _ => Canonical::Unchanged,
    }
}

fn int_const(graph: &Graph, id: NodeId) -> Option<i64> {
    graph.node(id).as_int_constant()
}

fn canonical_arith(graph: &Graph, id: NodeId, kind: ArithKind) -> Canonical {
    let node = graph.node(id);

    if kind.is_unary() {
        let x = match node.input(0) {
            Some(x) => x,
            None => return Canonical::Unchanged,
        };
        // Neg(const) and Neg(Neg(x)).
        if let Some(v) = int_const(graph, x) {
            return new_int(v.wrapping_neg());
        }
        if graph.node(x).op == OpKind::Arith(ArithKind::Neg) {
            if let Some(inner) = graph.node(x).input(0) {
                return Canonical::Replace(inner);
            }
        }
        return Canonical::Unchanged;
    }

    let (a, b) = match (node.input(0), node.input(1)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Canonical::Unchanged,
    };
    let ca = int_const(graph, a);
    let cb = int_const(graph, b);

    // Constant folding wins over every structural rewrite.
    if let (Some(va), Some(vb)) = (ca, cb) {
        if let Some(v) = kind.fold(va, vb) {
            return new_int(v);
        }
    }

    // x op identity == x; identity op x == x for commutative kinds.
    if let Some(identity) = kind.identity() {
        if cb == Some(identity) {
            return Canonical::Replace(a);
        }
        if kind.is_commutative() && ca == Some(identity) {
            return Canonical::Replace(b);
        }
    }

    match kind {
        ArithKind::Mul if ca == Some(0) || cb == Some(0) => new_int(0),
        ArithKind::Sub if a == b => new_int(0),
        _ => Canonical::Unchanged,
    }
}

fn canonical_cmp(graph: &Graph, id: NodeId, kind: crate::ir::ops::CmpKind) -> Canonical {
    use crate::ir::ops::CmpKind;

    let node = graph.node(id);
    let (a, b) = match (node.input(0), node.input(1)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Canonical::Unchanged,
    };

    if let (Some(va), Some(vb)) = (int_const(graph, a), int_const(graph, b)) {
        return new_bool(kind.fold(va, vb));
    }

    // Same-operand comparisons fold only for integers; reflexive object
    // equality would need an alias analysis to be safe here.
    if a == b && matches!(graph.stamp(a), Stamp::Int(_)) {
        return match kind {
            CmpKind::Eq | CmpKind::Le => new_bool(true),
            CmpKind::Lt => new_bool(false),
        };
    }

    Canonical::Unchanged
}

fn canonical_phi(graph: &Graph, id: NodeId) -> Canonical {
    let node = graph.node(id);
    if node.input_count() < 2 {
        return Canonical::Unchanged;
    }
    // One distinct value among the inputs (ignoring the phi's own
    // loop-carried self-reference) means the phi is redundant.
    let mut unique_value: Option<NodeId> = None;
    for value in node.inputs().skip(1) {
        if value == id {
            continue;
        }
        match unique_value {
            None => unique_value = Some(value),
            Some(v) if v == value => {}
            Some(_) => return Canonical::Unchanged,
        }
    }
    match unique_value {
        Some(v) => Canonical::Replace(v),
        None => Canonical::Unchanged,
    }
}

fn new_int(v: i64) -> Canonical {
    Canonical::New(OpKind::Constant(ConstantValue::Int(v)), SmallVec::new())
}

fn new_bool(v: bool) -> Canonical {
    Canonical::New(OpKind::Constant(ConstantValue::Bool(v)), SmallVec::new())
}

// =============================================================================
// Phase Wrapper
// =============================================================================

pub struct CanonicalizerPhase;

impl Phase for CanonicalizerPhase {
    fn name(&self) -> &'static str {
        "canonicalize"
    }

    fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext<'_>) -> Result<(), CompileError> {
        ctx.budget.charge(graph.live_count() as u64)?;
        Canonicalizer::run(graph);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
