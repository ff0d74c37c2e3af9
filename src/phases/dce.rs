//! Dead code elimination.
//!
//! Marks everything reachable from the end node over input and state
//! edges, then deletes the rest. Guards are roots of their own: an
//! unused guard still protects the code after it. Back edges are pulled
//! in when their loop header is live, since nothing references a LoopEnd
//! through input edges.
//!
//! Unmarked nodes are first stripped of their inputs and only then
//! deleted, so groups of dead nodes keeping each other alive (dead phi
//! cycles) come apart cleanly.

use tracing::debug;

use crate::error::CompileError;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::ops::OpKind;
use crate::phase::{Phase, PhaseContext};

pub struct DeadCodeEliminationPhase;

impl DeadCodeEliminationPhase {
    /// Delete every node not reachable from the end. Returns the number
    /// of deleted nodes.
    pub fn apply(graph: &mut Graph) -> usize {
        let live = graph.next_mark();
        let mut worklist: Vec<NodeId> = vec![graph.end(), graph.start()];
        worklist.extend(
            graph
                .iter()
                .filter(|(_, n)| matches!(n.op, OpKind::Guard))
                .map(|(id, _)| id),
        );

        while let Some(id) = worklist.pop() {
            if graph.is_marked(live, id) {
                continue;
            }
            graph.mark(live, id);
            worklist.extend(graph.node(id).inputs());
            if let Some(state) = graph.node(id).state() {
                worklist.push(state);
            }
            if matches!(graph.node(id).op, OpKind::LoopBegin) {
                worklist.extend(graph.loop_ends(id));
            }
        }

        let dead: Vec<NodeId> = graph
            .ids()
            .filter(|&id| !graph.is_marked(live, id))
            .collect();
        for &id in &dead {
            graph.clear_inputs(id);
        }
        for &id in &dead {
            graph.delete(id);
        }
        if !dead.is_empty() {
            debug!(deleted = dead.len(), "dead code eliminated");
        }
        dead.len()
    }
}

impl Phase for DeadCodeEliminationPhase {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext<'_>) -> Result<(), CompileError> {
        ctx.budget.charge(graph.live_count() as u64)?;
        Self::apply(graph);
        Ok(())
    }
}
