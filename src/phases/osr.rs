//! On-stack-replacement entry construction.
//!
//! The frontend marks the bytecode position where execution will enter
//! mid-method with an [`OpKind::EntryMarker`]. That position sits inside
//! a loop; entering there directly would bypass the loop header and its
//! phis. The transform peels one iteration off every enclosing loop,
//! outermost first, until a copy of the marker exists outside all loops.
//! The in-loop marker copies dissolve: their entry proxies become the
//! plain values they wrap. The surviving marker is then replaced by an
//! [`OpKind::OsrStart`], its proxies by [`OpKind::OsrLocal`] reads of the
//! interpreter frame, and the original method entry dies with everything
//! only it reached.
//!
//! Entry state restrictions: exactly one marker, and its frame state must
//! carry no expression stack entries and no held locks. Anything else is
//! a permanent bailout, the method then only runs at lower tiers.

use tracing::info;

use crate::error::{Bailout, CompileError, VerificationError};
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::ops::{InputType, OpKind};
use crate::ir::stamp::Stamp;
use crate::loops::{peel, LoopsData};
use crate::phase::{Phase, PhaseContext};
use crate::phases::dce::DeadCodeEliminationPhase;

pub struct OsrEntryPhase;

impl OsrEntryPhase {
    pub fn apply(graph: &mut Graph) -> Result<(), CompileError> {
        let markers: Vec<NodeId> = find_markers(graph);
        let mut marker = match markers.as_slice() {
            [one] => *one,
            [] => {
                return Err(Bailout::Permanent("no entry marker in graph".into()).into());
            }
            many => {
                return Err(Bailout::Permanent(format!(
                    "{} entry markers in graph, expected one",
                    many.len()
                ))
                .into());
            }
        };
        check_entry_state(graph, marker)?;

        let initial_depth = LoopsData::compute(graph).loops_containing(marker).len();
        info!(marker = %marker, depth = initial_depth, "building OSR entry");

        let mut peels = 0usize;
        loop {
            let loops = LoopsData::compute(graph);
            let containing = loops.loops_containing(marker);
            let Some(&outermost) = containing.first() else {
                break;
            };
            peel::peel(graph, &loops, outermost)?;
            peels += 1;
            if peels > initial_depth {
                return Err(VerificationError::new(
                    format!(
                        "OSR peeling did not terminate after {} peels for depth {}",
                        peels, initial_depth
                    ),
                    graph.dump(),
                )
                .into());
            }

            // The peeled copy carries the marker that matters; the one
            // still inside the loop dissolves into plain values.
            dissolve_marker(graph, marker);
            let remaining = find_markers(graph);
            marker = match remaining.as_slice() {
                [one] => *one,
                _ => {
                    return Err(VerificationError::new(
                        format!(
                            "expected exactly one entry marker after peel, found {}",
                            remaining.len()
                        ),
                        graph.dump(),
                    )
                    .into());
                }
            };
        }
        if peels != initial_depth {
            return Err(VerificationError::new(
                format!(
                    "peeled {} times for nesting depth {}",
                    peels, initial_depth
                ),
                graph.dump(),
            )
            .into());
        }

        // Proxies become reads of the interpreter frame. Their observed
        // value stamps must not be trusted at an OSR entry.
        for proxy in proxies_of(graph, marker) {
            let OpKind::EntryProxy(slot) = graph.node(proxy).op else {
                continue;
            };
            let local = graph.unique(OpKind::OsrLocal(slot), &[]);
            debug_assert_eq!(graph.stamp(local), Stamp::Unrestricted);
            graph.replace_and_delete(proxy, local);
        }

        // Splice the OSR start into the marker's control position, then
        // kill the control flow of the original entry. Exit merges the
        // peeling introduced still list dead predecessors as inputs, so
        // input-driven elimination alone would keep the old entry alive;
        // the forward walk trims those merge slots first.
        let old_start = graph.start();
        let osr_start = graph.add(OpKind::OsrStart, &[]);
        graph.replace_at_usages(marker, osr_start, Some(InputType::Control));
        graph.set_state(marker, None);
        graph.delete(marker);
        graph.set_start(osr_start);
        kill_dead_entry(graph, old_start);
        DeadCodeEliminationPhase::apply(graph);

        check_postconditions(graph)?;
        Ok(())
    }
}

fn find_markers(graph: &Graph) -> Vec<NodeId> {
    graph
        .iter()
        .filter(|(_, n)| matches!(n.op, OpKind::EntryMarker))
        .map(|(id, _)| id)
        .collect()
}

fn proxies_of(graph: &Graph, marker: NodeId) -> Vec<NodeId> {
    graph
        .usages(marker)
        .iter()
        .copied()
        .filter(|&u| matches!(graph.node(u).op, OpKind::EntryProxy(_)))
        .collect()
}

/// Replace a marker's proxies with the values they wrap and unlink the
/// marker from the control chain.
fn dissolve_marker(graph: &mut Graph, marker: NodeId) {
    for proxy in proxies_of(graph, marker) {
        let value = graph
            .node(proxy)
            .input(1)
            .expect("entry proxy wraps a value");
        graph.replace_and_delete(proxy, value);
    }
    graph.remove_fixed(marker);
}

/// Delete the control-flow region only reachable from the abandoned
/// method entry. The walk follows control successors; where a dead branch
/// feeds a live merge, the merge loses that predecessor slot and its phis
/// the matching value.
fn kill_dead_entry(graph: &mut Graph, entry: NodeId) {
    let dead_mark = graph.next_mark();
    let mut dead: Vec<NodeId> = Vec::new();
    let mut stack = vec![entry];
    while let Some(n) = stack.pop() {
        if !graph.contains(n) || graph.is_marked(dead_mark, n) {
            continue;
        }
        graph.mark(dead_mark, n);
        dead.push(n);
        for user in graph.snapshot_usages(n) {
            let op = &graph.node(user).op;
            // Merges and loop headers survive while another predecessor
            // lives; phis die with their merge, not with one input.
            if matches!(op, OpKind::Merge | OpKind::LoopBegin | OpKind::Phi) {
                continue;
            }
            let is_control_user = (0..graph.node(user).input_count()).any(|slot| {
                graph.node(user).input(slot) == Some(n)
                    && crate::ir::ops::input_type(&graph.node(user).op, slot)
                        == InputType::Control
            });
            if is_control_user && graph.node(user).op.is_fixed() {
                stack.push(user);
            }
        }
    }

    // Trim dead predecessors out of live merges before breaking edges.
    let mut idx = 0;
    while idx < dead.len() {
        let n = dead[idx];
        idx += 1;
        for user in graph.snapshot_usages(n) {
            if !matches!(graph.node(user).op, OpKind::Merge)
                || graph.is_marked(dead_mark, user)
            {
                continue;
            }
            while let Some(slot) = graph.node(user).inputs().position(|i| i == n) {
                for phi in graph.phis(user) {
                    graph.remove_input(phi, slot + 1);
                }
                graph.remove_input(user, slot);
            }
            if graph.node(user).input_count() == 0 {
                // The merge lost its last predecessor: the whole region
                // behind it is dead as well.
                graph.mark(dead_mark, user);
                for phi in graph.phis(user) {
                    graph.mark(dead_mark, phi);
                    dead.push(phi);
                }
                dead.push(user);
                stack.push(user);
                while let Some(m) = stack.pop() {
                    for succ in graph.snapshot_usages(m) {
                        if graph.node(succ).op.is_fixed()
                            && !graph.is_marked(dead_mark, succ)
                        {
                            graph.mark(dead_mark, succ);
                            dead.push(succ);
                            stack.push(succ);
                        }
                    }
                }
            }
        }
    }

    for &n in &dead {
        graph.clear_inputs(n);
    }
    for &n in &dead {
        graph.delete(n);
    }
}

fn check_entry_state(graph: &Graph, marker: NodeId) -> Result<(), CompileError> {
    let Some(state) = graph.node(marker).state() else {
        return Err(Bailout::Permanent("entry marker carries no frame state".into()).into());
    };
    let OpKind::FrameState { stack, locks, .. } = graph.node(state).op else {
        return Err(Bailout::Permanent("entry marker state is not a frame state".into()).into());
    };
    if stack != 0 {
        return Err(Bailout::Permanent(format!(
            "OSR entry with {} expression stack entries",
            stack
        ))
        .into());
    }
    if locks != 0 {
        return Err(Bailout::Permanent(format!("OSR entry with {} held locks", locks)).into());
    }
    Ok(())
}

fn check_postconditions(graph: &Graph) -> Result<(), CompileError> {
    let mut osr_starts = 0usize;
    for (id, node) in graph.iter() {
        match node.op {
            OpKind::EntryMarker | OpKind::EntryProxy(_) => {
                return Err(VerificationError::new(
                    format!("entry node {} survived the OSR transform", id),
                    graph.dump(),
                )
                .into());
            }
            OpKind::Start => {
                return Err(VerificationError::new(
                    format!("original entry {} survived the OSR transform", id),
                    graph.dump(),
                )
                .into());
            }
            OpKind::OsrStart => osr_starts += 1,
            _ => {}
        }
    }
    if osr_starts != 1 {
        return Err(VerificationError::new(
            format!("{} OSR entries after transform, expected one", osr_starts),
            graph.dump(),
        )
        .into());
    }
    Ok(())
}

impl Phase for OsrEntryPhase {
    fn name(&self) -> &'static str {
        "osr-entry"
    }

    /// Every enclosing loop is peeled once, duplicating its body.
    fn code_size_increase(&self) -> f32 {
        2.0
    }

    fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext<'_>) -> Result<(), CompileError> {
        ctx.budget.charge(graph.live_count() as u64)?;
        Self::apply(graph)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::order;
    use crate::ir::ops::{ArithKind, CmpKind};

    /// `Start -> loop { marker; if (i < 10) { i++ } else return i }`,
    /// entering at the marker with local 0 = i.
    fn osr_loop(g: &mut Graph) -> (NodeId, NodeId) {
        let lb = g.add(OpKind::LoopBegin, &[g.start()]);
        let zero = g.int_constant(0);
        let phi = g.add_with_stamp(OpKind::Phi, &[lb, zero], Stamp::full_int());

        let marker = g.add(OpKind::EntryMarker, &[lb]);
        let fs = g.add(
            OpKind::FrameState {
                locals: 1,
                stack: 0,
                locks: 0,
            },
            &[phi],
        );
        g.set_state(marker, Some(fs));
        let proxy = g.add(OpKind::EntryProxy(0), &[marker, phi]);

        let ten = g.int_constant(10);
        let cond = g.unique(OpKind::Cmp(CmpKind::Lt), &[proxy, ten]);
        let iff = g.add(OpKind::If, &[marker, cond]);
        let body = g.add(OpKind::IfTrue, &[iff]);
        let exit = g.add(OpKind::IfFalse, &[iff]);
        let one = g.int_constant(1);
        let next = g.add(OpKind::Arith(ArithKind::Add), &[proxy, one]);
        g.append_input(phi, next);
        let _le = g.add(OpKind::LoopEnd, &[body, lb]);
        let ret = g.add(OpKind::Return, &[exit, proxy]);
        g.append_input(g.end(), ret);
        (marker, phi)
    }

    #[test]
    fn test_osr_transform_single_loop() {
        let mut g = Graph::new();
        osr_loop(&mut g);

        OsrEntryPhase::apply(&mut g).unwrap();

        // Postconditions: one OsrStart as the graph entry, no trace of the
        // original entry or the markers.
        assert!(matches!(g.node(g.start()).op, OpKind::OsrStart));
        assert!(!g.iter().any(|(_, n)| matches!(
            n.op,
            OpKind::EntryMarker | OpKind::EntryProxy(_) | OpKind::Start
        )));

        // The interpreter frame read exists and is untyped.
        let local = g
            .iter()
            .find(|(_, n)| matches!(n.op, OpKind::OsrLocal(0)))
            .map(|(id, _)| id)
            .expect("OSR local for slot 0");
        assert_eq!(g.stamp(local), Stamp::Unrestricted);

        // One loop remains and the graph is schedulable.
        assert_eq!(LoopsData::compute(&g).len(), 1);
        order::assert_non_cyclic_graph(&g).unwrap();
    }

    #[test]
    fn test_osr_rejects_nonempty_stack() {
        let mut g = Graph::new();
        let marker = g.add(OpKind::EntryMarker, &[g.start()]);
        let v = g.int_constant(1);
        let fs = g.add(
            OpKind::FrameState {
                locals: 0,
                stack: 1,
                locks: 0,
            },
            &[v],
        );
        g.set_state(marker, Some(fs));
        let ret = g.add(OpKind::Return, &[marker]);
        g.append_input(g.end(), ret);

        let err = OsrEntryPhase::apply(&mut g).unwrap_err();
        match err {
            CompileError::Bailout(b) => assert!(!b.is_retryable()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_osr_rejects_multiple_markers() {
        let mut g = Graph::new();
        let m1 = g.add(OpKind::EntryMarker, &[g.start()]);
        let _m2 = g.add(OpKind::EntryMarker, &[m1]);

        let err = OsrEntryPhase::apply(&mut g).unwrap_err();
        assert!(matches!(err, CompileError::Bailout(Bailout::Permanent(_))));
    }

    #[test]
    fn test_osr_marker_outside_any_loop() {
        let mut g = Graph::new();
        let marker = g.add(OpKind::EntryMarker, &[g.start()]);
        let x = g.int_constant(5);
        let fs = g.add(
            OpKind::FrameState {
                locals: 1,
                stack: 0,
                locks: 0,
            },
            &[x],
        );
        g.set_state(marker, Some(fs));
        let proxy = g.add(OpKind::EntryProxy(0), &[marker, x]);
        let ret = g.add(OpKind::Return, &[marker, proxy]);
        g.append_input(g.end(), ret);

        OsrEntryPhase::apply(&mut g).unwrap();
        assert!(matches!(g.node(g.start()).op, OpKind::OsrStart));
        let local = g.input(ret, 1).unwrap();
        assert!(matches!(g.node(local).op, OpKind::OsrLocal(0)));
    }

    #[test]
    fn test_osr_nested_loops_peel_to_depth() {
        let mut g = Graph::new();
        // outer { inner { marker } }
        let outer = g.add(OpKind::LoopBegin, &[g.start()]);
        let c = g.bool_constant(true);
        let oif = g.add(OpKind::If, &[outer, c]);
        let obody = g.add(OpKind::IfTrue, &[oif]);
        let oexit = g.add(OpKind::IfFalse, &[oif]);

        let inner = g.add(OpKind::LoopBegin, &[obody]);
        let marker = g.add(OpKind::EntryMarker, &[inner]);
        let zero = g.int_constant(0);
        let fs = g.add(
            OpKind::FrameState {
                locals: 1,
                stack: 0,
                locks: 0,
            },
            &[zero],
        );
        g.set_state(marker, Some(fs));
        let iif = g.add(OpKind::If, &[marker, c]);
        let ibody = g.add(OpKind::IfTrue, &[iif]);
        let iexit = g.add(OpKind::IfFalse, &[iif]);
        let _ile = g.add(OpKind::LoopEnd, &[ibody, inner]);

        let _ole = g.add(OpKind::LoopEnd, &[iexit, outer]);
        let ret = g.add(OpKind::Return, &[oexit]);
        g.append_input(g.end(), ret);

        OsrEntryPhase::apply(&mut g).unwrap();

        assert!(matches!(g.node(g.start()).op, OpKind::OsrStart));
        assert!(!g
            .iter()
            .any(|(_, n)| matches!(n.op, OpKind::EntryMarker | OpKind::Start)));
        order::assert_non_cyclic_graph(&g).unwrap();
    }
}
