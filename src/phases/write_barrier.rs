//! Write barrier insertion.
//!
//! Lowers heap writes to the barrier sequence the configured collector
//! requires:
//! - `Simple` (card-marking): one post-write barrier per write.
//! - `Generational`: a pre-write barrier before and a post-write barrier
//!   after every write.
//!
//! Post barriers are skipped when the stored value is statically null; a
//! null store can never create an old-to-young edge. Pre barriers are
//! never skipped, the collector needs the previous value regardless of
//! the new one. Field writes mark imprecisely (object base), array
//! element writes precisely (element address). Bulk array writes get the
//! range variants covering the touched card span.
//!
//! All insertions are staged first and committed only after the whole
//! graph has been scanned, so a budget bailout mid-phase cannot leave a
//! half-lowered graph behind.

use tracing::debug;

use crate::error::CompileError;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::ops::{ConstantValue, OpKind};
use crate::phase::{Phase, PhaseContext};
use crate::providers::CollectorPolicy;

pub struct WriteBarrierPhase;

/// One staged barrier insertion.
struct Insertion {
    write: NodeId,
    op: OpKind,
    extra_inputs: Vec<NodeId>,
    before: bool,
}

impl WriteBarrierPhase {
    pub fn apply(
        graph: &mut Graph,
        policy: CollectorPolicy,
        ctx: &mut PhaseContext<'_>,
    ) -> Result<usize, CompileError> {
        let writes: Vec<NodeId> = graph
            .ids()
            .filter(|&id| {
                graph.node(id).op.is_heap_write()
                    || matches!(graph.node(id).op, OpKind::ArrayRangeWrite)
            })
            .collect();

        let mut staged: Vec<Insertion> = Vec::new();
        for write in writes {
            ctx.budget.charge(1)?;
            stage_for_write(graph, policy, write, &mut staged);
        }

        let count = staged.len();
        for ins in staged {
            if ins.before {
                graph.add_before(ins.op, &ins.extra_inputs, ins.write);
            } else {
                graph.add_after(ins.op, &ins.extra_inputs, ins.write);
            }
        }
        if count > 0 {
            debug!(barriers = count, policy = ?policy, "write barriers inserted");
        }
        Ok(count)
    }
}

fn stage_for_write(
    graph: &Graph,
    policy: CollectorPolicy,
    write: NodeId,
    staged: &mut Vec<Insertion>,
) {
    let node = graph.node(write);

    // Bulk writes cover a card span instead of a single slot.
    if matches!(node.op, OpKind::ArrayRangeWrite) {
        let array = node.input(1).expect("range write array");
        let start = node.input(2).expect("range write start");
        let len = node.input(3).expect("range write length");
        match policy {
            CollectorPolicy::Simple => {
                stage_post(graph, write, OpKind::SerialRangeBarrier, &[array, start, len], staged);
            }
            CollectorPolicy::Generational => {
                stage_pre(graph, write, OpKind::GenPreRangeBarrier, &[array, start, len], staged);
                stage_post(graph, write, OpKind::GenPostRangeBarrier, &[array, start, len], staged);
            }
        }
        return;
    }

    let (object, value, precise) = match node.op {
        // [control, object, value]
        OpKind::StoreField { .. } => (
            node.input(1).expect("store object"),
            node.input(2).expect("store value"),
            false,
        ),
        // [control, array, index, value]
        OpKind::StoreIndexed => (
            node.input(1).expect("store array"),
            node.input(3).expect("store value"),
            true,
        ),
        // [control, object, expected, new]
        OpKind::CompareAndSwap { .. } => (
            node.input(1).expect("cas object"),
            node.input(3).expect("cas new value"),
            false,
        ),
        _ => return,
    };

    match policy {
        CollectorPolicy::Simple => {
            if !statically_null(graph, value) {
                stage_post(
                    graph,
                    write,
                    OpKind::SerialPostBarrier { precise },
                    &[object, value],
                    staged,
                );
            }
        }
        CollectorPolicy::Generational => {
            stage_pre(graph, write, OpKind::GenPreBarrier, &[object], staged);
            if !statically_null(graph, value) {
                stage_post(
                    graph,
                    write,
                    OpKind::GenPostBarrier { precise },
                    &[object, value],
                    staged,
                );
            }
        }
    }
}

fn stage_pre(
    graph: &Graph,
    write: NodeId,
    op: OpKind,
    extra_inputs: &[NodeId],
    staged: &mut Vec<Insertion>,
) {
    // Re-running the phase must not double-insert.
    if let Some(pred) = graph.control_pred(write) {
        if graph.node(pred).op == op && graph.node(pred).input(1) == extra_inputs.first().copied()
        {
            return;
        }
    }
    staged.push(Insertion {
        write,
        op,
        extra_inputs: extra_inputs.to_vec(),
        before: true,
    });
}

fn stage_post(
    graph: &Graph,
    write: NodeId,
    op: OpKind,
    extra_inputs: &[NodeId],
    staged: &mut Vec<Insertion>,
) {
    let already = graph.usages(write).iter().any(|&u| {
        graph.node(u).op == op
            && graph.node(u).input(0) == Some(write)
            && graph.node(u).input(1) == extra_inputs.first().copied()
    });
    if already {
        return;
    }
    staged.push(Insertion {
        write,
        op,
        extra_inputs: extra_inputs.to_vec(),
        before: false,
    });
}

/// A value the compiler knows to be the null reference.
fn statically_null(graph: &Graph, value: NodeId) -> bool {
    matches!(graph.node(value).op, OpKind::Constant(ConstantValue::Null))
        || graph.stamp(value).is_always_null()
}

impl Phase for WriteBarrierPhase {
    fn name(&self) -> &'static str {
        "write-barriers"
    }

    fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext<'_>) -> Result<(), CompileError> {
        let policy = ctx.providers.collector.policy;
        Self::apply(graph, policy, ctx)?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseContext;
    use crate::providers::Providers;

    fn store_graph(g: &mut Graph, value_null: bool) -> NodeId {
        let obj = g.add(OpKind::Param(0), &[]);
        let value = if value_null {
            g.null_constant()
        } else {
            g.add(OpKind::Param(1), &[])
        };
        let store = g.add(OpKind::StoreField { offset: 16 }, &[g.start(), obj, value]);
        let ret = g.add(OpKind::Return, &[store]);
        g.append_input(g.end(), ret);
        store
    }

    fn barrier_count(g: &Graph) -> usize {
        g.iter().filter(|(_, n)| n.op.is_barrier()).count()
    }

    #[test]
    fn test_simple_policy_post_only() {
        let providers = Providers::new();
        let mut ctx = PhaseContext::new(&providers);
        let mut g = Graph::new();
        let store = store_graph(&mut g, false);

        WriteBarrierPhase::apply(&mut g, CollectorPolicy::Simple, &mut ctx).unwrap();
        assert_eq!(barrier_count(&g), 1);

        // The barrier directly follows the write.
        let post = *g
            .usages(store)
            .iter()
            .find(|&&u| g.node(u).op.is_barrier())
            .unwrap();
        assert_eq!(
            g.node(post).op,
            OpKind::SerialPostBarrier { precise: false }
        );
        assert_eq!(g.input(post, 0), Some(store));
    }

    #[test]
    fn test_generational_policy_pre_and_post() {
        let providers = Providers::new();
        let mut ctx = PhaseContext::new(&providers);
        let mut g = Graph::new();
        let store = store_graph(&mut g, false);

        WriteBarrierPhase::apply(&mut g, CollectorPolicy::Generational, &mut ctx).unwrap();
        assert_eq!(barrier_count(&g), 2);

        let pre = g.control_pred(store).unwrap();
        assert_eq!(g.node(pre).op, OpKind::GenPreBarrier);
        let post = *g
            .usages(store)
            .iter()
            .find(|&&u| g.node(u).op.is_barrier())
            .unwrap();
        assert_eq!(g.node(post).op, OpKind::GenPostBarrier { precise: false });
    }

    #[test]
    fn test_null_store_skips_post_barrier() {
        let providers = Providers::new();
        let mut ctx = PhaseContext::new(&providers);
        let mut g = Graph::new();
        store_graph(&mut g, true);

        WriteBarrierPhase::apply(&mut g, CollectorPolicy::Simple, &mut ctx).unwrap();
        assert_eq!(barrier_count(&g), 0);

        // Generational still needs the pre barrier.
        WriteBarrierPhase::apply(&mut g, CollectorPolicy::Generational, &mut ctx).unwrap();
        assert_eq!(barrier_count(&g), 1);
    }

    #[test]
    fn test_indexed_store_is_precise() {
        let providers = Providers::new();
        let mut ctx = PhaseContext::new(&providers);
        let mut g = Graph::new();
        let arr = g.add(OpKind::Param(0), &[]);
        let idx = g.int_constant(3);
        let val = g.add(OpKind::Param(1), &[]);
        let store = g.add(OpKind::StoreIndexed, &[g.start(), arr, idx, val]);
        let ret = g.add(OpKind::Return, &[store]);
        g.append_input(g.end(), ret);

        WriteBarrierPhase::apply(&mut g, CollectorPolicy::Simple, &mut ctx).unwrap();
        let post = *g
            .usages(store)
            .iter()
            .find(|&&u| g.node(u).op.is_barrier())
            .unwrap();
        assert_eq!(g.node(post).op, OpKind::SerialPostBarrier { precise: true });
    }

    #[test]
    fn test_range_write_gets_range_barriers() {
        let providers = Providers::new();
        let mut ctx = PhaseContext::new(&providers);
        let mut g = Graph::new();
        let arr = g.add(OpKind::Param(0), &[]);
        let start = g.int_constant(0);
        let len = g.int_constant(128);
        let write = g.add(OpKind::ArrayRangeWrite, &[g.start(), arr, start, len]);
        let ret = g.add(OpKind::Return, &[write]);
        g.append_input(g.end(), ret);

        WriteBarrierPhase::apply(&mut g, CollectorPolicy::Generational, &mut ctx).unwrap();
        assert_eq!(g.node(g.control_pred(write).unwrap()).op, OpKind::GenPreRangeBarrier);
        assert!(g
            .usages(write)
            .iter()
            .any(|&u| g.node(u).op == OpKind::GenPostRangeBarrier));
    }

    #[test]
    fn test_idempotent() {
        let providers = Providers::new();
        let mut ctx = PhaseContext::new(&providers);
        let mut g = Graph::new();
        store_graph(&mut g, false);

        WriteBarrierPhase::apply(&mut g, CollectorPolicy::Generational, &mut ctx).unwrap();
        let after_first = barrier_count(&g);
        WriteBarrierPhase::apply(&mut g, CollectorPolicy::Generational, &mut ctx).unwrap();
        assert_eq!(barrier_count(&g), after_first);
    }
}
