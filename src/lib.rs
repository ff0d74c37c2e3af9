//! Mid-tier optimizer for a method JIT.
//!
//! Methods arrive as a sea-of-nodes graph ([`ir::Graph`]) in which control
//! flow and data flow are both just edges. A [`phase::PhasePipeline`]
//! runs a fixed sequence of transformations over the graph:
//!
//! - **Canonicalization** ([`canon`]): local rewriting (constant folding,
//!   identities, redundant phis) to fixpoint.
//! - **Loop work** ([`loops`]): loop discovery, induction variable
//!   analysis, peeling.
//! - **Lowering and entry construction** ([`phases`]): write barrier
//!   insertion for the configured collector, on-stack-replacement entry
//!   building, ahead-of-time constant checks, dead code elimination.
//!
//! Structural invariants (edge symmetry, schedulability) are enforced by
//! the mutation primitives and re-checked between phases in debug builds
//! ([`ir::order`]). Failures split into bailouts the runtime acts on and
//! verification errors that are always compiler defects ([`error`]).

pub mod canon;
pub mod error;
pub mod ir;
pub mod loops;
pub mod phase;
pub mod phases;
pub mod providers;

pub use canon::{Canonicalizer, CanonicalizerPhase};
pub use error::{Bailout, CompileError, VerificationError};
pub use ir::{Graph, NodeId, OpKind, Stamp};
pub use phase::{CompileBudget, Phase, PhaseContext, PhasePipeline};
pub use providers::{CollectorPolicy, Providers};
