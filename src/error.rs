//! Compilation error taxonomy.
//!
//! Three tiers, matching how failures propagate out of phase execution:
//! - **Permanent bailout**: this compilation cannot succeed as requested;
//!   the caller falls back to interpreted/lower-tier execution.
//! - **Retryable bailout**: a resource budget ran out; the caller may
//!   requeue the unit, possibly at different settings.
//! - **Verification error**: a structural invariant of the graph was
//!   violated. Always a compiler defect, always fatal to the current
//!   compilation, always carries a graph dump.
//!
//! Invariant violations inside the mutation primitives themselves (e.g.
//! deleting a node that still has usages) panic instead: they indicate
//! corruption that no caller can meaningfully recover from.

use thiserror::Error;

/// A signal to stop compiling the current unit.
#[derive(Debug, Clone, Error)]
pub enum Bailout {
    /// The unit cannot be compiled as requested at this tier.
    /// Not retried; the caller runs the method in fallback mode.
    #[error("permanent bailout: {0}")]
    Permanent(String),

    /// A time or size budget was exhausted. The caller may retry,
    /// possibly with different settings.
    #[error("retryable bailout: {0}")]
    Retryable(String),
}

impl Bailout {
    /// Whether the caller is allowed to requeue this compilation.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Bailout::Retryable(_))
    }
}

/// A violated structural invariant of the graph.
///
/// Carries a textual graph dump captured at the point of failure so the
/// defect can be diagnosed without re-running the compilation.
#[derive(Debug, Clone, Error)]
#[error("graph verification failed: {reason}")]
pub struct VerificationError {
    /// What was violated, naming the offending node(s).
    pub reason: String,
    /// Dump of the graph at the point of failure.
    pub graph_dump: String,
}

impl VerificationError {
    pub fn new(reason: impl Into<String>, graph_dump: String) -> Self {
        VerificationError {
            reason: reason.into(),
            graph_dump,
        }
    }
}

/// Any failure that can propagate out of phase execution.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error(transparent)]
    Bailout(#[from] Bailout),

    #[error(transparent)]
    Verification(#[from] VerificationError),
}

impl CompileError {
    /// Permanent-bailout convenience constructor.
    pub fn permanent(msg: impl Into<String>) -> Self {
        CompileError::Bailout(Bailout::Permanent(msg.into()))
    }

    /// Retryable-bailout convenience constructor.
    pub fn retryable(msg: impl Into<String>) -> Self {
        CompileError::Bailout(Bailout::Retryable(msg.into()))
    }

    /// Only bailouts surface externally; verification errors are compiler
    /// defects and must be logged with their graph dump.
    #[inline]
    pub fn is_bailout(&self) -> bool {
        matches!(self, CompileError::Bailout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bailout_retryable() {
        assert!(Bailout::Retryable("budget".into()).is_retryable());
        assert!(!Bailout::Permanent("shape".into()).is_retryable());
    }

    #[test]
    fn test_compile_error_classification() {
        let e = CompileError::permanent("unsupported OSR shape");
        assert!(e.is_bailout());

        let v: CompileError = VerificationError::new("cycle", String::new()).into();
        assert!(!v.is_bailout());
    }

    #[test]
    fn test_error_display() {
        let e = CompileError::retryable("node budget exceeded");
        assert_eq!(e.to_string(), "retryable bailout: node budget exceeded");
    }
}
