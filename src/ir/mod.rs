//! Intermediate representation: a mutable sea-of-nodes graph.
//!
//! Control and data dependencies are both edges between nodes. Fixed nodes
//! form the control-flow skeleton through their slot-0 input; floating
//! nodes hang off it by data edges alone and are placed by a scheduler
//! later. The [`Graph`] owns all nodes and keeps input and usage edges
//! symmetric through every mutation.

pub mod arena;
pub mod graph;
pub mod node;
pub mod ops;
pub mod order;
pub mod stamp;

pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use graph::{Graph, NodeMark};
pub use node::{Node, NodeId};
pub use ops::{ArithKind, CmpKind, ConstantValue, InputType, ObjectConstant, OpKind};
pub use stamp::{ClassId, IntStamp, Nullness, ObjectStamp, Stamp};
