//! Concrete optimization and lowering phases.

pub mod aot_verify;
pub mod dce;
pub mod osr;
pub mod write_barrier;

pub use aot_verify::AotConstantVerificationPhase;
pub use dce::DeadCodeEliminationPhase;
pub use osr::OsrEntryPhase;
pub use write_barrier::WriteBarrierPhase;
