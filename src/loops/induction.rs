//! Induction variable analysis.
//!
//! A basic induction variable is a loop phi whose loop-carried value is
//! `phi + stride` or `phi - stride` with a loop-invariant stride. Derived
//! induction variables are built on top of other ones by multiplying with
//! or adding a loop-invariant amount, forming a DAG rooted at the basic
//! variables.
//!
//! Range queries (`min_value`/`max_value`) combine the initial value with
//! loop-exit conditions found by walking control flow upwards from a
//! given point towards the loop header. A condition is only trusted in
//! the direction the variable actually moves (`i < n` bounds an upward
//! counter, not a downward one) and only when the bound operand is
//! loop-invariant; a check against a value computed inside the loop
//! proves nothing about later iterations.

use rustc_hash::FxHashMap;

use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::ops::{ArithKind, CmpKind, OpKind};
use crate::ir::stamp::Stamp;

use super::{LoopIndex, LoopsData};

/// Which way an induction variable moves per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// A loop phi with a recognized `phi ± stride` update.
#[derive(Debug, Clone)]
pub struct BasicInductionVariable {
    pub phi: NodeId,
    pub init: NodeId,
    pub stride: NodeId,
    /// `Add` or `Sub`: how the stride is applied each iteration.
    pub op: ArithKind,
}

/// A value moving in lockstep with a basic induction variable.
#[derive(Debug, Clone)]
pub enum InductionVariable {
    Basic(BasicInductionVariable),
    /// `node = base * scale`, scale loop-invariant.
    Scaled {
        base: NodeId,
        node: NodeId,
        scale: NodeId,
    },
    /// `node = base + offset` or `base - offset`, offset loop-invariant.
    Offset {
        base: NodeId,
        node: NodeId,
        offset: NodeId,
        op: ArithKind,
    },
}

impl InductionVariable {
    pub fn value_node(&self) -> NodeId {
        match self {
            InductionVariable::Basic(b) => b.phi,
            InductionVariable::Scaled { node, .. } => *node,
            InductionVariable::Offset { node, .. } => *node,
        }
    }
}

/// One endpoint of an induction variable's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundBase {
    Constant(i64),
    Node(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bound {
    pub base: BoundBase,
    /// Added to the base; turns a strict comparison into an inclusive
    /// endpoint.
    pub adjustment: i64,
}

impl Bound {
    fn of(graph: &Graph, node: NodeId, adjustment: i64) -> Bound {
        match graph.node(node).as_int_constant() {
            Some(c) => Bound {
                base: BoundBase::Constant(c),
                adjustment,
            },
            None => Bound {
                base: BoundBase::Node(node),
                adjustment,
            },
        }
    }

    pub fn as_constant(&self) -> Option<i64> {
        match self.base {
            BoundBase::Constant(c) => Some(c + self.adjustment),
            BoundBase::Node(_) => None,
        }
    }
}

// =============================================================================
// Detection
// =============================================================================

/// All induction variables of one loop, keyed by their value node.
pub struct InductionVariables {
    loop_index: LoopIndex,
    ivs: FxHashMap<NodeId, InductionVariable>,
}

impl InductionVariables {
    pub fn find(graph: &Graph, loops: &LoopsData, loop_index: LoopIndex) -> Self {
        let header = loops.loop_info(loop_index).header;
        let mut ivs: FxHashMap<NodeId, InductionVariable> = FxHashMap::default();

        // Basic variables: loop phis updated by a loop-invariant stride.
        for phi in graph.phis(header) {
            if !matches!(graph.stamp(phi), Stamp::Int(_) | Stamp::Unrestricted) {
                continue;
            }
            if let Some(basic) = match_basic(graph, loops, loop_index, phi) {
                ivs.insert(phi, InductionVariable::Basic(basic));
            }
        }

        // Derived variables: close over usages of known variables.
        let mut worklist: Vec<NodeId> = ivs.keys().copied().collect();
        while let Some(base) = worklist.pop() {
            for &user in graph.usages(base) {
                if ivs.contains_key(&user) || !graph.contains(user) {
                    continue;
                }
                if let Some(derived) = match_derived(graph, loops, loop_index, base, user) {
                    ivs.insert(user, derived);
                    worklist.push(user);
                }
            }
        }

        InductionVariables { loop_index, ivs }
    }

    #[inline]
    pub fn get(&self, node: NodeId) -> Option<&InductionVariable> {
        self.ivs.get(&node)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InductionVariable> {
        self.ivs.values()
    }

    /// The basic variable a derived one is rooted at.
    pub fn root(&self, node: NodeId) -> Option<&BasicInductionVariable> {
        let mut cursor = node;
        loop {
            match self.ivs.get(&cursor)? {
                InductionVariable::Basic(b) => return Some(b),
                InductionVariable::Scaled { base, .. }
                | InductionVariable::Offset { base, .. } => cursor = *base,
            }
        }
    }

    /// Per-iteration change when it is a compile-time constant, with sign.
    pub fn constant_stride(&self, graph: &Graph, node: NodeId) -> Option<i64> {
        match self.ivs.get(&node)? {
            InductionVariable::Basic(b) => {
                let s = graph.node(b.stride).as_int_constant()?;
                Some(match b.op {
                    ArithKind::Sub => s.wrapping_neg(),
                    _ => s,
                })
            }
            InductionVariable::Scaled { base, scale, .. } => {
                let k = graph.node(*scale).as_int_constant()?;
                Some(self.constant_stride(graph, *base)?.wrapping_mul(k))
            }
            InductionVariable::Offset { base, .. } => self.constant_stride(graph, *base),
        }
    }

    /// Which way the variable moves, when the stride's sign is known.
    pub fn direction(&self, graph: &Graph, node: NodeId) -> Option<Direction> {
        match self.ivs.get(&node)? {
            InductionVariable::Basic(b) => {
                let s = graph.node(b.stride).as_int_constant()?;
                if s == 0 {
                    return None;
                }
                let up = (s > 0) ^ (b.op == ArithKind::Sub);
                Some(if up { Direction::Up } else { Direction::Down })
            }
            InductionVariable::Scaled { base, scale, .. } => {
                let k = graph.node(*scale).as_int_constant()?;
                if k == 0 {
                    return None;
                }
                let d = self.direction(graph, *base)?;
                Some(if k > 0 { d } else { d.opposite() })
            }
            InductionVariable::Offset { base, .. } => self.direction(graph, *base),
        }
    }

    /// Express `node` as `scale * root_phi + offset` with constant scale
    /// and offset.
    fn flatten(&self, graph: &Graph, node: NodeId) -> Option<(NodeId, i64, i64)> {
        match self.ivs.get(&node)? {
            InductionVariable::Basic(b) => Some((b.phi, 1, 0)),
            InductionVariable::Scaled { base, scale, .. } => {
                let k = graph.node(*scale).as_int_constant()?;
                let (root, s, o) = self.flatten(graph, *base)?;
                Some((root, s.wrapping_mul(k), o.wrapping_mul(k)))
            }
            InductionVariable::Offset {
                base, offset, op, ..
            } => {
                let c = graph.node(*offset).as_int_constant()?;
                let (root, s, o) = self.flatten(graph, *base)?;
                let o = match op {
                    ArithKind::Sub => o.wrapping_sub(c),
                    _ => o.wrapping_add(c),
                };
                Some((root, s, o))
            }
        }
    }

    /// Whether `b` in iteration `n` equals `a` in iteration `n + 1`.
    /// Both must be rooted at the same basic variable with a constant
    /// stride.
    pub fn is_next_iteration(&self, graph: &Graph, a: NodeId, b: NodeId) -> bool {
        let (Some((ra, sa, oa)), Some((rb, sb, ob))) =
            (self.flatten(graph, a), self.flatten(graph, b))
        else {
            return false;
        };
        if ra != rb || sa != sb {
            return false;
        }
        let Some(stride) = self.constant_stride(graph, ra) else {
            return false;
        };
        ob == oa.wrapping_add(sa.wrapping_mul(stride))
    }

    /// Smallest value the variable can hold at `point`, as far as the
    /// initial value and dominating exit checks prove.
    pub fn min_value(
        &self,
        graph: &Graph,
        loops: &LoopsData,
        node: NodeId,
        point: NodeId,
    ) -> Option<Bound> {
        self.extremum(graph, loops, node, point, Direction::Down)
    }

    /// Largest value the variable can hold at `point`.
    pub fn max_value(
        &self,
        graph: &Graph,
        loops: &LoopsData,
        node: NodeId,
        point: NodeId,
    ) -> Option<Bound> {
        self.extremum(graph, loops, node, point, Direction::Up)
    }

    fn extremum(
        &self,
        graph: &Graph,
        loops: &LoopsData,
        node: NodeId,
        point: NodeId,
        end: Direction,
    ) -> Option<Bound> {
        let basic = match self.ivs.get(&node)? {
            InductionVariable::Basic(b) => b.clone(),
            // Derived variables answer through their root when the whole
            // chain is constant-foldable.
            _ => {
                let (root, scale, offset) = self.flatten(graph, node)?;
                // A negative scale swaps which endpoint of the root we need.
                let root_end = if scale >= 0 { end } else { end.opposite() };
                let b = self.extremum(graph, loops, root, point, root_end)?;
                let c = b.as_constant()?;
                return Some(Bound {
                    base: BoundBase::Constant(c.wrapping_mul(scale).wrapping_add(offset)),
                    adjustment: 0,
                });
            }
        };
        let direction = self.direction(graph, node)?;

        // The endpoint the variable starts from is its initial value; the
        // endpoint it moves towards needs a dominating check.
        if direction == end.opposite() {
            return Some(Bound::of(graph, basic.init, 0));
        }
        self.walk_for_check(graph, loops, &basic, point, direction)
    }

    /// Walk control flow upwards from `point` to the loop header, looking
    /// for the first branch condition that bounds the variable in its
    /// movement direction.
    fn walk_for_check(
        &self,
        graph: &Graph,
        loops: &LoopsData,
        basic: &BasicInductionVariable,
        point: NodeId,
        direction: Direction,
    ) -> Option<Bound> {
        let header = loops.loop_info(self.loop_index).header;
        let mut cursor = point;
        loop {
            if cursor == header {
                return None;
            }
            let node = graph.node(cursor);
            match node.op {
                OpKind::IfTrue | OpKind::IfFalse => {
                    let iff = node.input(0)?;
                    let taken_true = matches!(node.op, OpKind::IfTrue);
                    if let Some(cond) = graph.node(iff).input(1) {
                        if let Some(bound) =
                            self.match_check(graph, loops, basic, cond, taken_true, direction)
                        {
                            return Some(bound);
                        }
                    }
                    cursor = graph.input(iff, 0)?;
                }
                // A merge joins paths with different facts; stop rather
                // than trust either side.
                OpKind::Merge | OpKind::LoopBegin | OpKind::Start | OpKind::OsrStart => {
                    return None;
                }
                _ => cursor = node.input(0)?,
            }
        }
    }

    fn match_check(
        &self,
        graph: &Graph,
        loops: &LoopsData,
        basic: &BasicInductionVariable,
        cond: NodeId,
        taken_true: bool,
        direction: Direction,
    ) -> Option<Bound> {
        let OpKind::Cmp(kind) = graph.node(cond).op else {
            return None;
        };
        let a = graph.node(cond).input(0)?;
        let b = graph.node(cond).input(1)?;

        // Normalize to the fact that holds on the taken branch.
        let (kind, a, b) = if taken_true {
            (kind, a, b)
        } else {
            match kind {
                CmpKind::Lt => (CmpKind::Le, b, a),
                CmpKind::Le => (CmpKind::Lt, b, a),
                CmpKind::Eq => return None,
            }
        };

        let invariant = |n: NodeId| loops.is_invariant(self.loop_index, n);

        match kind {
            // phi < y bounds an upward counter from above.
            CmpKind::Lt if a == basic.phi && direction == Direction::Up && invariant(b) => {
                Some(Bound::of(graph, b, -1))
            }
            CmpKind::Le if a == basic.phi && direction == Direction::Up && invariant(b) => {
                Some(Bound::of(graph, b, 0))
            }
            // y < phi bounds a downward counter from below.
            CmpKind::Lt if b == basic.phi && direction == Direction::Down && invariant(a) => {
                Some(Bound::of(graph, a, 1))
            }
            CmpKind::Le if b == basic.phi && direction == Direction::Down && invariant(a) => {
                Some(Bound::of(graph, a, 0))
            }
            _ => None,
        }
    }

    /// Advance the variable's initial value by one stride, as done when a
    /// single iteration has been peeled off the loop.
    pub fn peel_one_iteration(&self, graph: &mut Graph, node: NodeId) -> Option<NodeId> {
        let InductionVariable::Basic(b) = self.ivs.get(&node)? else {
            return None;
        };
        let (phi, init, stride, op) = (b.phi, b.init, b.stride, b.op);
        let new_init = graph.unique(OpKind::Arith(op), &[init, stride]);
        graph.set_input(phi, 1, new_init);
        Some(new_init)
    }

    /// Rewrite a derived variable as a fresh basic one: a new loop phi
    /// starting at the chain's first-iteration value and stepping by its
    /// per-iteration change. Usages of the derived node move to the phi
    /// and the multiply/add chain dies with them, trading arithmetic in
    /// the loop body for one more live value across it. The analysis is
    /// stale afterwards and must be recomputed.
    pub fn to_basic_induction_variable(
        &self,
        graph: &mut Graph,
        loops: &LoopsData,
        node: NodeId,
    ) -> Option<NodeId> {
        if let InductionVariable::Basic(b) = self.ivs.get(&node)? {
            return Some(b.phi);
        }
        let (init, stride, op) = self.materialize_step(graph, node)?;
        let header = loops.loop_info(self.loop_index).header;
        let stamp = graph.stamp(node);
        let phi = graph.add_with_stamp(OpKind::Phi, &[header, init], stamp);
        let back = graph.unique(OpKind::Arith(op), &[phi, stride]);
        graph.append_input(phi, back);

        graph.replace_at_usages(node, phi, None);
        crate::canon::cascade_delete(graph, node);
        Some(phi)
    }

    /// The opposite trade: rewrite one basic variable as `scale * base +
    /// offset` over another basic variable of the same loop, dropping the
    /// phi in favour of arithmetic on `base`. Strides and initial values
    /// must be compile-time constants so scale and offset are checkable.
    /// The analysis is stale afterwards and must be recomputed.
    pub fn to_derived_induction_variable(
        &self,
        graph: &mut Graph,
        node: NodeId,
        base: NodeId,
    ) -> Option<NodeId> {
        if node == base {
            return None;
        }
        let InductionVariable::Basic(b) = self.ivs.get(&node)? else {
            return None;
        };
        let InductionVariable::Basic(root) = self.ivs.get(&base)? else {
            return None;
        };
        let s_base = self.constant_stride(graph, base)?;
        let s_node = self.constant_stride(graph, node)?;
        if s_base == 0 || s_node % s_base != 0 {
            return None;
        }
        let scale = s_node / s_base;
        let i_base = graph.node(root.init).as_int_constant()?;
        let i_node = graph.node(b.init).as_int_constant()?;
        let offset = i_node.wrapping_sub(scale.wrapping_mul(i_base));

        let (phi, init, root_phi) = (b.phi, b.init, root.phi);
        let scaled = if scale == 1 {
            root_phi
        } else {
            let k = graph.int_constant(scale);
            graph.unique(OpKind::Arith(ArithKind::Mul), &[root_phi, k])
        };
        let replacement = if offset == 0 {
            scaled
        } else {
            let c = graph.int_constant(offset);
            graph.unique(OpKind::Arith(ArithKind::Add), &[scaled, c])
        };

        // The back-edge update loses its only user with the phi and is
        // cleaned up together with a now-unused initial value.
        let back = graph.node(phi).input(2)?;
        graph.replace_at_usages(phi, replacement, None);
        graph.delete(phi);
        crate::canon::cascade_delete(graph, back);
        crate::canon::cascade_delete(graph, init);
        Some(replacement)
    }

    /// First-iteration value and per-iteration step of a derived chain,
    /// built as loop-invariant nodes.
    fn materialize_step(
        &self,
        graph: &mut Graph,
        node: NodeId,
    ) -> Option<(NodeId, NodeId, ArithKind)> {
        match self.ivs.get(&node)? {
            InductionVariable::Basic(b) => Some((b.init, b.stride, b.op)),
            InductionVariable::Scaled { base, scale, .. } => {
                let (base, scale) = (*base, *scale);
                let (init, stride, op) = self.materialize_step(graph, base)?;
                let init = graph.unique(OpKind::Arith(ArithKind::Mul), &[init, scale]);
                let stride = graph.unique(OpKind::Arith(ArithKind::Mul), &[stride, scale]);
                Some((init, stride, op))
            }
            InductionVariable::Offset {
                base,
                offset,
                op: offset_op,
                ..
            } => {
                let (base, offset, offset_op) = (*base, *offset, *offset_op);
                let (init, stride, op) = self.materialize_step(graph, base)?;
                let init = graph.unique(OpKind::Arith(offset_op), &[init, offset]);
                Some((init, stride, op))
            }
        }
    }
}

fn match_basic(
    graph: &Graph,
    loops: &LoopsData,
    loop_index: LoopIndex,
    phi: NodeId,
) -> Option<BasicInductionVariable> {
    let node = graph.node(phi);
    // Multiple back edges would need all updates to agree; not handled.
    if node.input_count() != 3 {
        return None;
    }
    let init = node.input(1)?;
    let back = node.input(2)?;

    let OpKind::Arith(op) = graph.node(back).op else {
        return None;
    };
    if !matches!(op, ArithKind::Add | ArithKind::Sub) {
        return None;
    }
    let x = graph.node(back).input(0)?;
    let y = graph.node(back).input(1)?;

    let stride = if x == phi && loops.is_invariant(loop_index, y) {
        y
    } else if op == ArithKind::Add && y == phi && loops.is_invariant(loop_index, x) {
        // stride + phi; subtraction is not symmetric.
        x
    } else {
        return None;
    };

    Some(BasicInductionVariable {
        phi,
        init,
        stride,
        op,
    })
}

fn match_derived(
    graph: &Graph,
    loops: &LoopsData,
    loop_index: LoopIndex,
    base: NodeId,
    user: NodeId,
) -> Option<InductionVariable> {
    let OpKind::Arith(op) = graph.node(user).op else {
        return None;
    };
    let a = graph.node(user).input(0)?;
    let b = graph.node(user).input(1)?;
    let other = if a == base {
        b
    } else if b == base && op != ArithKind::Sub {
        a
    } else {
        return None;
    };
    if !loops.is_invariant(loop_index, other) {
        return None;
    }

    match op {
        ArithKind::Mul => Some(InductionVariable::Scaled {
            base,
            node: user,
            scale: other,
        }),
        ArithKind::Add | ArithKind::Sub => Some(InductionVariable::Offset {
            base,
            node: user,
            offset: other,
            op,
        }),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::graph::Graph;
    use crate::ir::order;
    use crate::loops::tests::counted_loop;
    use crate::loops::LoopsData;

    fn body_point(g: &Graph, header: NodeId) -> NodeId {
        // The IfTrue projection inside the loop.
        let iff = *g
            .usages(header)
            .iter()
            .find(|&&u| matches!(g.node(u).op, OpKind::If))
            .unwrap();
        *g.usages(iff)
            .iter()
            .find(|&&u| matches!(g.node(u).op, OpKind::IfTrue))
            .unwrap()
    }

    #[test]
    fn test_basic_detection() {
        let mut g = Graph::new();
        let (lb, phi, _) = counted_loop(&mut g);
        let loops = LoopsData::compute(&g);
        let ivs = InductionVariables::find(&g, &loops, 0);

        let iv = ivs.get(phi).expect("loop counter recognized");
        assert!(matches!(iv, InductionVariable::Basic(_)));
        assert_eq!(ivs.direction(&g, phi), Some(Direction::Up));
        assert_eq!(ivs.constant_stride(&g, phi), Some(1));
        assert_eq!(ivs.root(phi).unwrap().phi, phi);
        let _ = lb;
    }

    #[test]
    fn test_derived_detection() {
        let mut g = Graph::new();
        let (_, phi, exit) = counted_loop(&mut g);
        let four = g.int_constant(4);
        let scaled = g.add(OpKind::Arith(ArithKind::Mul), &[phi, four]);
        let eight = g.int_constant(8);
        let offset = g.add(OpKind::Arith(ArithKind::Add), &[scaled, eight]);
        // Anchor the values so they are used.
        let ret2 = g.add(OpKind::Return, &[exit, offset]);
        g.append_input(g.end(), ret2);

        let loops = LoopsData::compute(&g);
        let ivs = InductionVariables::find(&g, &loops, 0);

        assert!(matches!(
            ivs.get(scaled),
            Some(InductionVariable::Scaled { .. })
        ));
        assert!(matches!(
            ivs.get(offset),
            Some(InductionVariable::Offset { .. })
        ));
        assert_eq!(ivs.constant_stride(&g, scaled), Some(4));
        assert_eq!(ivs.constant_stride(&g, offset), Some(4));
        assert_eq!(ivs.direction(&g, offset), Some(Direction::Up));
        assert_eq!(ivs.root(offset).unwrap().phi, phi);
    }

    #[test]
    fn test_bounds_strict_and_inclusive() {
        // for (i = 0; i < 10; i++): min 0, max 9 inside the body.
        let mut g = Graph::new();
        let (lb, phi, _) = counted_loop(&mut g);
        let loops = LoopsData::compute(&g);
        let ivs = InductionVariables::find(&g, &loops, 0);
        let point = body_point(&g, lb);

        let min = ivs.min_value(&g, &loops, phi, point).unwrap();
        assert_eq!(min.as_constant(), Some(0));
        let max = ivs.max_value(&g, &loops, phi, point).unwrap();
        assert_eq!(max.as_constant(), Some(9));
    }

    #[test]
    fn test_bounds_inclusive_comparison() {
        // for (i = 0; i <= 10; i++): max 10 inside the body.
        let mut g = Graph::new();
        let lb = g.add(OpKind::LoopBegin, &[g.start()]);
        let zero = g.int_constant(0);
        let phi = g.add_with_stamp(OpKind::Phi, &[lb, zero], Stamp::full_int());
        let ten = g.int_constant(10);
        let cond = g.unique(OpKind::Cmp(CmpKind::Le), &[phi, ten]);
        let iff = g.add(OpKind::If, &[lb, cond]);
        let body = g.add(OpKind::IfTrue, &[iff]);
        let exit = g.add(OpKind::IfFalse, &[iff]);
        let one = g.int_constant(1);
        let next = g.add(OpKind::Arith(ArithKind::Add), &[phi, one]);
        g.append_input(phi, next);
        let _le = g.add(OpKind::LoopEnd, &[body, lb]);
        let ret = g.add(OpKind::Return, &[exit, phi]);
        g.append_input(g.end(), ret);

        let loops = LoopsData::compute(&g);
        let ivs = InductionVariables::find(&g, &loops, 0);
        let max = ivs.max_value(&g, &loops, phi, body).unwrap();
        assert_eq!(max.as_constant(), Some(10));
    }

    #[test]
    fn test_downward_counter() {
        // for (i = 10; 0 < i; i--): direction Down, max 10, min 1.
        let mut g = Graph::new();
        let lb = g.add(OpKind::LoopBegin, &[g.start()]);
        let ten = g.int_constant(10);
        let phi = g.add_with_stamp(OpKind::Phi, &[lb, ten], Stamp::full_int());
        let zero = g.int_constant(0);
        let cond = g.unique(OpKind::Cmp(CmpKind::Lt), &[zero, phi]);
        let iff = g.add(OpKind::If, &[lb, cond]);
        let body = g.add(OpKind::IfTrue, &[iff]);
        let exit = g.add(OpKind::IfFalse, &[iff]);
        let one = g.int_constant(1);
        let next = g.add(OpKind::Arith(ArithKind::Sub), &[phi, one]);
        g.append_input(phi, next);
        let _le = g.add(OpKind::LoopEnd, &[body, lb]);
        let ret = g.add(OpKind::Return, &[exit, phi]);
        g.append_input(g.end(), ret);

        let loops = LoopsData::compute(&g);
        let ivs = InductionVariables::find(&g, &loops, 0);

        assert_eq!(ivs.direction(&g, phi), Some(Direction::Down));
        assert_eq!(ivs.constant_stride(&g, phi), Some(-1));
        let max = ivs.max_value(&g, &loops, phi, body).unwrap();
        assert_eq!(max.as_constant(), Some(10));
        let min = ivs.min_value(&g, &loops, phi, body).unwrap();
        assert_eq!(min.as_constant(), Some(1));
    }

    #[test]
    fn test_upward_counter_distrusts_upper_check_when_down() {
        // A downward counter guarded by `i < n` gets no max from it.
        let mut g = Graph::new();
        let lb = g.add(OpKind::LoopBegin, &[g.start()]);
        let ten = g.int_constant(10);
        let phi = g.add_with_stamp(OpKind::Phi, &[lb, ten], Stamp::full_int());
        let hundred = g.int_constant(100);
        let cond = g.unique(OpKind::Cmp(CmpKind::Lt), &[phi, hundred]);
        let iff = g.add(OpKind::If, &[lb, cond]);
        let body = g.add(OpKind::IfTrue, &[iff]);
        let exit = g.add(OpKind::IfFalse, &[iff]);
        let one = g.int_constant(1);
        let next = g.add(OpKind::Arith(ArithKind::Sub), &[phi, one]);
        g.append_input(phi, next);
        let _le = g.add(OpKind::LoopEnd, &[body, lb]);
        let ret = g.add(OpKind::Return, &[exit, phi]);
        g.append_input(g.end(), ret);

        let loops = LoopsData::compute(&g);
        let ivs = InductionVariables::find(&g, &loops, 0);

        // Downward: the max comes from init, not from the distrusted check.
        let max = ivs.max_value(&g, &loops, phi, body).unwrap();
        assert_eq!(max.as_constant(), Some(10));
        // No lower-bound check exists, so min is unknown.
        assert!(ivs.min_value(&g, &loops, phi, body).is_none());
    }

    #[test]
    fn test_is_next_iteration() {
        let mut g = Graph::new();
        let (_, phi, exit) = counted_loop(&mut g);
        let one = g.int_constant(1);
        let plus_one = g.unique(OpKind::Arith(ArithKind::Add), &[phi, one]);
        let two = g.int_constant(2);
        let plus_two = g.add(OpKind::Arith(ArithKind::Add), &[phi, two]);
        let ret2 = g.add(OpKind::Return, &[exit, plus_two]);
        g.append_input(g.end(), ret2);

        let loops = LoopsData::compute(&g);
        let ivs = InductionVariables::find(&g, &loops, 0);

        // i+1 this iteration equals i next iteration (stride 1).
        assert!(ivs.is_next_iteration(&g, phi, plus_one));
        assert!(!ivs.is_next_iteration(&g, phi, plus_two));
        // i+2 is the next iteration's i+1.
        assert!(ivs.is_next_iteration(&g, plus_one, plus_two));
    }

    #[test]
    fn test_bound_from_loop_varying_operand_is_ignored() {
        // for (i = 0; i < i + 1; i++): the check's bound is computed in
        // the loop, so it proves no maximum.
        let mut g = Graph::new();
        let lb = g.add(OpKind::LoopBegin, &[g.start()]);
        let zero = g.int_constant(0);
        let phi = g.add_with_stamp(OpKind::Phi, &[lb, zero], Stamp::full_int());
        let one = g.int_constant(1);
        let varying = g.add(OpKind::Arith(ArithKind::Add), &[phi, one]);
        let cond = g.unique(OpKind::Cmp(CmpKind::Lt), &[phi, varying]);
        let iff = g.add(OpKind::If, &[lb, cond]);
        let body = g.add(OpKind::IfTrue, &[iff]);
        let exit = g.add(OpKind::IfFalse, &[iff]);
        let next = g.add(OpKind::Arith(ArithKind::Add), &[phi, one]);
        g.append_input(phi, next);
        let _le = g.add(OpKind::LoopEnd, &[body, lb]);
        let ret = g.add(OpKind::Return, &[exit, phi]);
        g.append_input(g.end(), ret);

        let loops = LoopsData::compute(&g);
        let ivs = InductionVariables::find(&g, &loops, 0);

        assert!(ivs.max_value(&g, &loops, phi, body).is_none());
        // The start side still comes from the initial value.
        let min = ivs.min_value(&g, &loops, phi, body).unwrap();
        assert_eq!(min.as_constant(), Some(0));
    }

    #[test]
    fn test_to_basic_materializes_derived_chain() {
        // 4 * i + 8 becomes its own counter: starts at 8, steps by 4.
        let mut g = Graph::new();
        let (lb, phi, exit) = counted_loop(&mut g);
        let four = g.int_constant(4);
        let scaled = g.add(OpKind::Arith(ArithKind::Mul), &[phi, four]);
        let eight = g.int_constant(8);
        let offset = g.add(OpKind::Arith(ArithKind::Add), &[scaled, eight]);
        let ret2 = g.add(OpKind::Return, &[exit, offset]);
        g.append_input(g.end(), ret2);

        let loops = LoopsData::compute(&g);
        let ivs = InductionVariables::find(&g, &loops, 0);
        assert_eq!(ivs.to_basic_induction_variable(&mut g, &loops, phi), Some(phi));

        let new_phi = ivs
            .to_basic_induction_variable(&mut g, &loops, offset)
            .unwrap();

        // The user sees the new phi; the arithmetic chain is gone.
        assert_eq!(g.input(ret2, 1), Some(new_phi));
        assert!(!g.contains(offset));
        assert!(!g.contains(scaled));
        assert!(g.node(new_phi).is_phi());
        assert_eq!(g.input(new_phi, 0), Some(lb));
        order::assert_non_cyclic_graph(&g).unwrap();

        // After folding the invariant setup arithmetic, the new variable
        // is a recognized counter with stride 4 from 8.
        crate::canon::Canonicalizer::run(&mut g);
        let loops = LoopsData::compute(&g);
        let ivs = InductionVariables::find(&g, &loops, 0);
        assert!(matches!(
            ivs.get(new_phi),
            Some(InductionVariable::Basic(_))
        ));
        assert_eq!(ivs.constant_stride(&g, new_phi), Some(4));
        assert_eq!(
            g.node(g.input(new_phi, 1).unwrap()).as_int_constant(),
            Some(8)
        );
    }

    #[test]
    fn test_to_derived_drops_the_second_phi() {
        // i = 0, 1, 2, ... and j = 5, 7, 9, ... so j == 2 * i + 5.
        let mut g = Graph::new();
        let lb = g.add(OpKind::LoopBegin, &[g.start()]);
        let zero = g.int_constant(0);
        let phi_i = g.add_with_stamp(OpKind::Phi, &[lb, zero], Stamp::full_int());
        let five = g.int_constant(5);
        let phi_j = g.add_with_stamp(OpKind::Phi, &[lb, five], Stamp::full_int());
        let ten = g.int_constant(10);
        let cond = g.unique(OpKind::Cmp(CmpKind::Lt), &[phi_i, ten]);
        let iff = g.add(OpKind::If, &[lb, cond]);
        let body = g.add(OpKind::IfTrue, &[iff]);
        let exit = g.add(OpKind::IfFalse, &[iff]);
        let one = g.int_constant(1);
        let next_i = g.add(OpKind::Arith(ArithKind::Add), &[phi_i, one]);
        g.append_input(phi_i, next_i);
        let two = g.int_constant(2);
        let next_j = g.add(OpKind::Arith(ArithKind::Add), &[phi_j, two]);
        g.append_input(phi_j, next_j);
        let _le = g.add(OpKind::LoopEnd, &[body, lb]);
        let ret = g.add(OpKind::Return, &[exit, phi_j]);
        g.append_input(g.end(), ret);

        let loops = LoopsData::compute(&g);
        let ivs = InductionVariables::find(&g, &loops, 0);
        let replacement = ivs
            .to_derived_induction_variable(&mut g, phi_j, phi_i)
            .unwrap();

        // j's phi and update are gone; its user reads 2 * i + 5.
        assert_eq!(g.input(ret, 1), Some(replacement));
        assert!(!g.contains(phi_j));
        assert!(!g.contains(next_j));
        assert_eq!(g.node(replacement).op, OpKind::Arith(ArithKind::Add));
        let scaled = g.input(replacement, 0).unwrap();
        assert_eq!(g.node(scaled).op, OpKind::Arith(ArithKind::Mul));
        assert_eq!(g.input(scaled, 0), Some(phi_i));
        assert_eq!(
            g.node(g.input(replacement, 1).unwrap()).as_int_constant(),
            Some(5)
        );
        order::assert_non_cyclic_graph(&g).unwrap();

        // The replacement is recognized as derived from i.
        let loops = LoopsData::compute(&g);
        let ivs = InductionVariables::find(&g, &loops, 0);
        assert!(matches!(
            ivs.get(replacement),
            Some(InductionVariable::Offset { .. })
        ));
        assert_eq!(ivs.constant_stride(&g, replacement), Some(2));
        assert_eq!(ivs.root(replacement).unwrap().phi, phi_i);
    }

    #[test]
    fn test_to_derived_requires_divisible_strides() {
        // i steps by 2, j steps by 3: no integer scale relates them.
        let mut g = Graph::new();
        let lb = g.add(OpKind::LoopBegin, &[g.start()]);
        let zero = g.int_constant(0);
        let phi_i = g.add_with_stamp(OpKind::Phi, &[lb, zero], Stamp::full_int());
        let phi_j = g.add_with_stamp(OpKind::Phi, &[lb, zero], Stamp::full_int());
        let ten = g.int_constant(10);
        let cond = g.unique(OpKind::Cmp(CmpKind::Lt), &[phi_i, ten]);
        let iff = g.add(OpKind::If, &[lb, cond]);
        let body = g.add(OpKind::IfTrue, &[iff]);
        let exit = g.add(OpKind::IfFalse, &[iff]);
        let two = g.int_constant(2);
        let next_i = g.add(OpKind::Arith(ArithKind::Add), &[phi_i, two]);
        g.append_input(phi_i, next_i);
        let three = g.int_constant(3);
        let next_j = g.add(OpKind::Arith(ArithKind::Add), &[phi_j, three]);
        g.append_input(phi_j, next_j);
        let _le = g.add(OpKind::LoopEnd, &[body, lb]);
        let ret = g.add(OpKind::Return, &[exit, phi_j]);
        g.append_input(g.end(), ret);

        let loops = LoopsData::compute(&g);
        let ivs = InductionVariables::find(&g, &loops, 0);
        assert!(ivs
            .to_derived_induction_variable(&mut g, phi_j, phi_i)
            .is_none());
        assert!(g.contains(phi_j));
    }

    #[test]
    fn test_peel_one_iteration_advances_init() {
        let mut g = Graph::new();
        let (_, phi, _) = counted_loop(&mut g);
        let loops = LoopsData::compute(&g);
        let ivs = InductionVariables::find(&g, &loops, 0);

        let new_init = ivs.peel_one_iteration(&mut g, phi).unwrap();
        assert_eq!(g.node(phi).input(1), Some(new_init));
        // 0 + 1 folds to the constant 1 under canonicalization.
        crate::canon::Canonicalizer::run_incremental(&mut g, [new_init]);
        assert_eq!(g.node(g.node(phi).input(1).unwrap()).as_int_constant(), Some(1));
    }
}
