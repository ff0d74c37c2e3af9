//! Operation kinds for the sea-of-nodes IR.
//!
//! The node universe is a closed tagged enum with per-kind payload and
//! match-based dispatch. Each kind fixes its input signature: slot 0 of a
//! fixed node is its control predecessor, the remaining slots are values
//! (with a few exceptions spelled out in [`input_type`]).
//!
//! Categories:
//! - **Control**: Start, OsrStart, End, Return, Merge, LoopBegin, LoopEnd,
//!   If and its projections, EntryMarker.
//! - **Values**: constants, parameters, arithmetic, comparisons, phis,
//!   guards, OSR locals and entry proxies.
//! - **Memory**: field/array loads and stores, compare-and-swap, array
//!   range writes, and the write-barrier node family.
//! - **Meta**: frame states.

use super::stamp::{ClassId, IntStamp, Nullness, ObjectStamp, Stamp};

// =============================================================================
// Edge Categories
// =============================================================================

/// Category of an input edge, derived from the user's kind and slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputType {
    Value,
    Condition,
    State,
    Memory,
    Guard,
    Control,
}

// =============================================================================
// Sub-Operators
// =============================================================================

/// Arithmetic operator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithKind {
    Add,
    Sub,
    Mul,
    Div,
    Shl,
    Neg,
}

impl ArithKind {
    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(self, ArithKind::Add | ArithKind::Mul)
    }

    #[inline]
    pub const fn is_unary(self) -> bool {
        matches!(self, ArithKind::Neg)
    }

    /// `x op identity == x`.
    pub const fn identity(self) -> Option<i64> {
        match self {
            ArithKind::Add | ArithKind::Sub | ArithKind::Shl => Some(0),
            ArithKind::Mul | ArithKind::Div => Some(1),
            ArithKind::Neg => None,
        }
    }

    /// Fold two integer constants; `None` where the result is undefined.
    pub fn fold(self, a: i64, b: i64) -> Option<i64> {
        match self {
            ArithKind::Add => Some(a.wrapping_add(b)),
            ArithKind::Sub => Some(a.wrapping_sub(b)),
            ArithKind::Mul => Some(a.wrapping_mul(b)),
            ArithKind::Div => {
                if b == 0 {
                    None
                } else {
                    Some(a.wrapping_div(b))
                }
            }
            ArithKind::Shl => Some(a.wrapping_shl((b & 63) as u32)),
            ArithKind::Neg => None,
        }
    }
}

/// Comparison operator kind. Gt/Ge are expressed by mirroring operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpKind {
    Eq,
    Lt,
    Le,
}

impl CmpKind {
    pub fn fold(self, a: i64, b: i64) -> bool {
        match self {
            CmpKind::Eq => a == b,
            CmpKind::Lt => a < b,
            CmpKind::Le => a <= b,
        }
    }
}

// =============================================================================
// Constants
// =============================================================================

/// A heap object embedded as a compile-time constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectConstant {
    pub class: ClassId,
    /// Distinguishes instances of the same class.
    pub instance: u32,
    /// Whether this is an interned string (always embeddable).
    pub interned_string: bool,
}

/// Constant payload. Floats are stored as raw bits so the kind stays
/// `Eq + Hash` for value numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstantValue {
    Int(i64),
    Float(u64),
    Bool(bool),
    Null,
    Object(ObjectConstant),
}

impl ConstantValue {
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConstantValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, ConstantValue::Null)
    }
}

// =============================================================================
// OpKind
// =============================================================================

/// The operation a node performs. Input signatures are listed per kind;
/// `[state]` denotes the frame-state edge, not an input slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpKind {
    // --- control ---
    /// Method entry. Inputs: none.
    Start,
    /// On-stack-replacement entry, spliced by the OSR transform.
    OsrStart,
    /// Control sink. Inputs: the Return nodes.
    End,
    /// Inputs: [control, value?].
    Return,
    /// Control merge. Inputs: one control predecessor per slot.
    Merge,
    /// Loop header. Inputs: [forward entry]. Back edges arrive as LoopEnd
    /// usages, keeping input edges acyclic through the header.
    LoopBegin,
    /// Loop back edge. Inputs: [control, loop begin].
    LoopEnd,
    /// Inputs: [control, condition].
    If,
    /// Taken projection of an If. Inputs: [if].
    IfTrue,
    /// Untaken projection of an If. Inputs: [if].
    IfFalse,
    /// OSR entry marker left by the front end. Inputs: [control]; [state]
    /// captures locals/stack/locks at the marker.
    EntryMarker,

    // --- values ---
    Param(u16),
    Constant(ConstantValue),
    /// Inputs: [a, b], or [a] for unary kinds.
    Arith(ArithKind),
    /// Inputs: [a, b]. Produces a condition.
    Cmp(CmpKind),
    /// Inputs: [merge, one value per predecessor].
    Phi,
    /// Floating guard: deoptimizes if the condition is false at the anchor.
    /// Inputs: [anchor, condition].
    Guard,
    /// Local-slot read crossing an OSR entry marker.
    /// Inputs: [marker, value].
    EntryProxy(u16),
    /// Local slot at an OSR entry. Stamp is always unrestricted.
    OsrLocal(u16),

    // --- meta ---
    /// Deoptimization snapshot. Inputs: locals ++ stack ++ locks values.
    FrameState {
        locals: u16,
        stack: u16,
        locks: u16,
    },

    // --- memory ---
    /// Inputs: [control, object].
    LoadField { offset: u32 },
    /// Inputs: [control, object, value]; [state].
    StoreField { offset: u32 },
    /// Inputs: [control, array, index].
    LoadIndexed,
    /// Inputs: [control, array, index, value]; [state].
    StoreIndexed,
    /// Inputs: [control, object, expected, new]; [state]. Produces 0/1.
    CompareAndSwap { offset: u32 },
    /// Bulk write into [from, from+length) of an array.
    /// Inputs: [control, array, from, length]; [state].
    ArrayRangeWrite,

    // --- write barriers ---
    /// Single-barrier collector policy, card-mark style.
    /// Inputs: [control, object].
    SerialPostBarrier { precise: bool },
    /// Two-generation policy, snapshot barrier before the write.
    /// Inputs: [control, object].
    GenPreBarrier,
    /// Two-generation policy, remembered-set barrier after the write.
    /// Inputs: [control, object, value].
    GenPostBarrier { precise: bool },
    /// Inputs: [control, array, from, length].
    SerialRangeBarrier,
    /// Inputs: [control, array, from, length].
    GenPreRangeBarrier,
    /// Inputs: [control, array, from, length].
    GenPostRangeBarrier,
}

impl OpKind {
    /// Fixed nodes are pinned to a control-flow position; slot 0 is their
    /// control predecessor (except Start/OsrStart, which begin the chain).
    pub fn is_fixed(&self) -> bool {
        matches!(
            self,
            OpKind::Start
                | OpKind::OsrStart
                | OpKind::End
                | OpKind::Return
                | OpKind::Merge
                | OpKind::LoopBegin
                | OpKind::LoopEnd
                | OpKind::If
                | OpKind::IfTrue
                | OpKind::IfFalse
                | OpKind::EntryMarker
                | OpKind::LoadField { .. }
                | OpKind::StoreField { .. }
                | OpKind::LoadIndexed
                | OpKind::StoreIndexed
                | OpKind::CompareAndSwap { .. }
                | OpKind::ArrayRangeWrite
                | OpKind::SerialPostBarrier { .. }
                | OpKind::GenPreBarrier
                | OpKind::GenPostBarrier { .. }
                | OpKind::SerialRangeBarrier
                | OpKind::GenPreRangeBarrier
                | OpKind::GenPostRangeBarrier
        )
    }

    /// Floating nodes are placed by the scheduler.
    #[inline]
    pub fn is_floating(&self) -> bool {
        !self.is_fixed()
    }

    /// Pure floating value nodes are value-numberable: `Graph::unique`
    /// hash-conses them.
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            OpKind::Constant(_)
                | OpKind::Param(_)
                | OpKind::Arith(_)
                | OpKind::Cmp(_)
                | OpKind::OsrLocal(_)
        )
    }

    /// Whether this kind carries a frame-state edge (state splits).
    pub fn has_state_edge(&self) -> bool {
        matches!(
            self,
            OpKind::EntryMarker
                | OpKind::StoreField { .. }
                | OpKind::StoreIndexed
                | OpKind::CompareAndSwap { .. }
                | OpKind::ArrayRangeWrite
        )
    }

    /// Heap writes that the write-barrier phase must cover.
    pub fn is_heap_write(&self) -> bool {
        matches!(
            self,
            OpKind::StoreField { .. } | OpKind::StoreIndexed | OpKind::CompareAndSwap { .. }
        )
    }

    pub fn is_barrier(&self) -> bool {
        matches!(
            self,
            OpKind::SerialPostBarrier { .. }
                | OpKind::GenPreBarrier
                | OpKind::GenPostBarrier { .. }
                | OpKind::SerialRangeBarrier
                | OpKind::GenPreRangeBarrier
                | OpKind::GenPostRangeBarrier
        )
    }

    /// Merge-like nodes that phis attach to.
    #[inline]
    pub fn is_merge(&self) -> bool {
        matches!(self, OpKind::Merge | OpKind::LoopBegin)
    }

    /// Short name for dumps and trace events.
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Start => "Start",
            OpKind::OsrStart => "OsrStart",
            OpKind::End => "End",
            OpKind::Return => "Return",
            OpKind::Merge => "Merge",
            OpKind::LoopBegin => "LoopBegin",
            OpKind::LoopEnd => "LoopEnd",
            OpKind::If => "If",
            OpKind::IfTrue => "IfTrue",
            OpKind::IfFalse => "IfFalse",
            OpKind::EntryMarker => "EntryMarker",
            OpKind::Param(_) => "Param",
            OpKind::Constant(_) => "Constant",
            OpKind::Arith(ArithKind::Add) => "Add",
            OpKind::Arith(ArithKind::Sub) => "Sub",
            OpKind::Arith(ArithKind::Mul) => "Mul",
            OpKind::Arith(ArithKind::Div) => "Div",
            OpKind::Arith(ArithKind::Shl) => "Shl",
            OpKind::Arith(ArithKind::Neg) => "Neg",
            OpKind::Cmp(CmpKind::Eq) => "CmpEq",
            OpKind::Cmp(CmpKind::Lt) => "CmpLt",
            OpKind::Cmp(CmpKind::Le) => "CmpLe",
            OpKind::Phi => "Phi",
            OpKind::Guard => "Guard",
            OpKind::EntryProxy(_) => "EntryProxy",
            OpKind::OsrLocal(_) => "OsrLocal",
            OpKind::FrameState { .. } => "FrameState",
            OpKind::LoadField { .. } => "LoadField",
            OpKind::StoreField { .. } => "StoreField",
            OpKind::LoadIndexed => "LoadIndexed",
            OpKind::StoreIndexed => "StoreIndexed",
            OpKind::CompareAndSwap { .. } => "CompareAndSwap",
            OpKind::ArrayRangeWrite => "ArrayRangeWrite",
            OpKind::SerialPostBarrier { .. } => "SerialPostBarrier",
            OpKind::GenPreBarrier => "GenPreBarrier",
            OpKind::GenPostBarrier { .. } => "GenPostBarrier",
            OpKind::SerialRangeBarrier => "SerialRangeBarrier",
            OpKind::GenPreRangeBarrier => "GenPreRangeBarrier",
            OpKind::GenPostRangeBarrier => "GenPostRangeBarrier",
        }
    }
}

/// Category of the input edge at `index` of a node with kind `op`.
pub fn input_type(op: &OpKind, index: usize) -> InputType {
    match op {
        OpKind::Merge | OpKind::LoopBegin | OpKind::End | OpKind::LoopEnd => InputType::Control,
        OpKind::IfTrue | OpKind::IfFalse => InputType::Control,
        OpKind::If => {
            if index == 0 {
                InputType::Control
            } else {
                InputType::Condition
            }
        }
        OpKind::Guard => {
            if index == 0 {
                InputType::Guard
            } else {
                InputType::Condition
            }
        }
        OpKind::EntryProxy(_) => {
            if index == 0 {
                InputType::Guard
            } else {
                InputType::Value
            }
        }
        OpKind::Phi => {
            if index == 0 {
                InputType::Control
            } else {
                InputType::Value
            }
        }
        OpKind::FrameState { .. } => InputType::Value,
        op if op.is_fixed() => {
            if index == 0 {
                InputType::Control
            } else {
                InputType::Value
            }
        }
        _ => InputType::Value,
    }
}

/// Default stamp of a node with kind `op` given its input stamps.
pub fn default_stamp(op: &OpKind, inputs: &[Stamp]) -> Stamp {
    match op {
        OpKind::Start
        | OpKind::OsrStart
        | OpKind::End
        | OpKind::Return
        | OpKind::Merge
        | OpKind::LoopBegin
        | OpKind::LoopEnd
        | OpKind::If
        | OpKind::IfTrue
        | OpKind::IfFalse
        | OpKind::EntryMarker => Stamp::Control,

        OpKind::Constant(c) => match c {
            ConstantValue::Int(v) => Stamp::int_constant(*v),
            ConstantValue::Float(_) => Stamp::Float,
            ConstantValue::Bool(_) => Stamp::Condition,
            ConstantValue::Null => Stamp::null(),
            ConstantValue::Object(oc) => Stamp::Object(ObjectStamp {
                nullness: Nullness::NonNull,
                exact_class: Some(oc.class),
            }),
        },

        OpKind::Param(_) | OpKind::OsrLocal(_) => Stamp::Unrestricted,

        OpKind::Arith(_) => {
            if inputs.iter().all(|s| matches!(s, Stamp::Int(_))) {
                Stamp::Int(IntStamp::FULL)
            } else if inputs.iter().any(|s| matches!(s, Stamp::Float)) {
                Stamp::Float
            } else {
                Stamp::Unrestricted
            }
        }

        OpKind::Cmp(_) => Stamp::Condition,

        // Merge-point value: union of the per-predecessor inputs.
        OpKind::Phi => inputs
            .iter()
            .skip(1)
            .copied()
            .reduce(|a, b| a.meet(&b))
            .unwrap_or(Stamp::Unrestricted),

        OpKind::Guard => Stamp::Void,
        OpKind::EntryProxy(_) => inputs.get(1).copied().unwrap_or(Stamp::Unrestricted),
        OpKind::FrameState { .. } => Stamp::Void,

        OpKind::LoadField { .. } | OpKind::LoadIndexed => Stamp::Unrestricted,
        OpKind::CompareAndSwap { .. } => Stamp::Int(IntStamp::range(0, 1)),

        OpKind::StoreField { .. }
        | OpKind::StoreIndexed
        | OpKind::ArrayRangeWrite
        | OpKind::SerialPostBarrier { .. }
        | OpKind::GenPreBarrier
        | OpKind::GenPostBarrier { .. }
        | OpKind::SerialRangeBarrier
        | OpKind::GenPreRangeBarrier
        | OpKind::GenPostRangeBarrier => Stamp::Void,
    }
}
