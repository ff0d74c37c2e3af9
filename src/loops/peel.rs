//! Loop peeling: hoist one iteration of a loop in front of it.
//!
//! The loop body is cloned once and spliced between the old forward entry
//! and the header. Loop phis keep their shape; only their initial value
//! changes to the cloned back-edge value, so the loop itself runs one
//! iteration less. Every loop exit gains a merge joining the original
//! exit with the cloned copy's exit, with phis for values that escape the
//! loop. Inner loops are cloned wholesale, headers and back edges
//! included, so nesting survives a peel of the enclosing loop.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::error::Bailout;
use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::ops::OpKind;

use super::{LoopIndex, LoopsData};

/// Peel one iteration off the front of the loop. The loops data is stale
/// afterwards and must be recomputed.
pub fn peel(graph: &mut Graph, loops: &LoopsData, loop_index: LoopIndex) -> Result<(), Bailout> {
    let info = loops.loop_info(loop_index);
    let header = info.header;
    if info.ends.len() != 1 {
        return Err(Bailout::Permanent(format!(
            "cannot peel loop at {}: {} back edges",
            header,
            info.ends.len()
        )));
    }
    let loop_end = info.ends[0];
    let phis = graph.phis(header);

    // Snapshot everything the rewiring below will touch.
    let forward_entry = graph
        .input(header, 0)
        .ok_or_else(|| Bailout::Permanent(format!("loop header {} has no entry", header)))?;
    let inits: Vec<(NodeId, NodeId, NodeId)> = phis
        .iter()
        .map(|&phi| {
            let init = graph.input(phi, 1).expect("loop phi init");
            let back = graph.input(phi, 2).expect("loop phi back value");
            (phi, init, back)
        })
        .collect();

    // Exit projections: branch targets leaving the body.
    let exits: Vec<NodeId> = info
        .body_nodes()
        .filter(|&n| matches!(graph.node(n).op, OpKind::If))
        .flat_map(|iff| graph.snapshot_usages(iff))
        .filter(|&u| {
            matches!(graph.node(u).op, OpKind::IfTrue | OpKind::IfFalse) && !info.contains(u)
        })
        .collect();

    // Everything cloned: the body minus the header, its phis and its back
    // edge, plus the exit projections.
    let mut clonees: Vec<NodeId> = info
        .body_nodes()
        .filter(|&n| n != header && n != loop_end && !phis.contains(&n))
        .collect();
    clonees.extend(&exits);

    // Phase one: allocate empty clones so the map is total before any
    // input is patched.
    let mut map: FxHashMap<NodeId, NodeId> = FxHashMap::default();
    map.insert(header, forward_entry);
    for &(phi, init, _) in &inits {
        map.insert(phi, init);
    }
    for &orig in &clonees {
        let node = graph.node(orig);
        let clone = graph.add_with_stamp(node.op.clone(), &[], node.stamp);
        map.insert(orig, clone);
    }

    // Phase two: patch inputs and state edges through the map.
    for &orig in &clonees {
        let clone = map[&orig];
        let inputs: SmallVec<[NodeId; 4]> = graph.node(orig).inputs().collect();
        for input in inputs {
            let mapped = map.get(&input).copied().unwrap_or(input);
            graph.append_input(clone, mapped);
        }
        if let Some(state) = graph.node(orig).state() {
            let mapped = map.get(&state).copied().unwrap_or(state);
            graph.set_state(clone, Some(mapped));
        }
    }

    // The peeled copy now feeds the loop: its tail becomes the header's
    // entry, its per-value results become the phi initials.
    let back_pred = graph.input(loop_end, 0).expect("back edge predecessor");
    let new_entry = map.get(&back_pred).copied().unwrap_or(back_pred);
    graph.set_input(header, 0, new_entry);
    for &(phi, _, back) in &inits {
        let new_init = map.get(&back).copied().unwrap_or(back);
        graph.set_input(phi, 1, new_init);
    }

    // Escaping values: defined in the body, used beyond it. Their outside
    // uses must see a merge of the loop's value and the peeled copy's.
    let escaping: Vec<NodeId> = info
        .body_nodes()
        .filter(|&v| graph.stamp(v).is_value())
        .filter(|&v| {
            graph
                .usages(v)
                .iter()
                .any(|&u| !info.contains(u) && !map.values().any(|&c| c == u))
        })
        .collect();
    if !escaping.is_empty() && exits.len() != 1 {
        return Err(Bailout::Permanent(format!(
            "cannot peel loop at {}: values escape through {} exits",
            header,
            exits.len()
        )));
    }

    for &exit in &exits {
        let exit_clone = map[&exit];
        let users = graph.snapshot_usages(exit);
        let merge = graph.add(OpKind::Merge, &[exit, exit_clone]);
        for user in users {
            let count = graph.node(user).input_count();
            for slot in 0..count {
                if graph.node(user).input(slot) == Some(exit) {
                    graph.set_input(user, slot, merge);
                }
            }
        }

        for &value in &escaping {
            let peeled_value = map.get(&value).copied().unwrap_or(value);
            let users = graph.snapshot_usages(value);
            let phi = graph.add(OpKind::Phi, &[merge, value, peeled_value]);
            for user in users {
                if user == phi || info.contains(user) || map.values().any(|&c| c == user) {
                    continue;
                }
                let count = graph.node(user).input_count();
                for slot in 0..count {
                    if graph.node(user).input(slot) == Some(value) {
                        graph.set_input(user, slot, phi);
                    }
                }
                if graph.node(user).state() == Some(value) {
                    graph.set_state(user, Some(phi));
                }
            }
        }
    }

    debug!(
        header = %header,
        cloned = clonees.len(),
        exits = exits.len(),
        "peeled one iteration"
    );
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
