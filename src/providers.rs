//! Runtime-provided context for a compilation.
//!
//! Phases never talk to the runtime directly; everything they may ask
//! about (class metadata, collector policy, ahead-of-time constraints,
//! resource limits) is bundled into [`Providers`] and handed to the
//! pipeline up front.

use std::time::Duration;

use crate::ir::stamp::ClassId;

// =============================================================================
// Class Registry
// =============================================================================

/// Interned class metadata. Class identity is positional; names are kept
/// for diagnostics and ahead-of-time allow-listing.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    names: Vec<String>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        ClassRegistry { names: Vec::new() }
    }

    /// Intern a class by name, returning its id. Idempotent.
    pub fn intern(&mut self, name: &str) -> ClassId {
        if let Some(idx) = self.names.iter().position(|n| n == name) {
            return ClassId(idx as u32);
        }
        self.names.push(name.to_owned());
        ClassId((self.names.len() - 1) as u32)
    }

    pub fn name(&self, class: ClassId) -> &str {
        self.names
            .get(class.0 as usize)
            .map(String::as_str)
            .unwrap_or("<unknown class>")
    }
}

// =============================================================================
// Collector Policy
// =============================================================================

/// Which barrier set the target garbage collector requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorPolicy {
    /// Single-generation collector with a card table: post-write barriers
    /// only.
    Simple,
    /// Generational collector with a snapshot-at-the-beginning component:
    /// pre-write and post-write barriers.
    Generational,
}

#[derive(Debug, Clone, Copy)]
pub struct CollectorConfig {
    pub policy: CollectorPolicy,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            policy: CollectorPolicy::Simple,
        }
    }
}

// =============================================================================
// Ahead-of-Time Constraints
// =============================================================================

/// Constraints applying when compiling for an ahead-of-time image. Object
/// constants may only be embedded when the loader can reconstruct them.
#[derive(Debug, Default)]
pub struct AotConfig {
    /// Class names whose instances may be embedded as constants.
    pub allowed_classes: Vec<String>,
}

impl AotConfig {
    pub fn is_allowed(&self, class_name: &str) -> bool {
        self.allowed_classes.iter().any(|c| c == class_name)
    }
}

// =============================================================================
// Budget
// =============================================================================

/// Resource limits for one compilation. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetConfig {
    /// Upper bound on live graph nodes.
    pub node_limit: Option<usize>,
    /// Wall-clock limit for the whole pipeline.
    pub time_limit: Option<Duration>,
}

// =============================================================================
// Providers
// =============================================================================

/// Everything the runtime supplies for one compilation.
#[derive(Debug, Default)]
pub struct Providers {
    pub classes: ClassRegistry,
    pub collector: CollectorConfig,
    pub aot: AotConfig,
    pub budget: BudgetConfig,
}

impl Providers {
    pub fn new() -> Self {
        Providers::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_interning() {
        let mut reg = ClassRegistry::new();
        let a = reg.intern("java/lang/String");
        let b = reg.intern("java/lang/Class");
        let again = reg.intern("java/lang/String");
        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(reg.name(b), "java/lang/Class");
    }

    #[test]
    fn test_aot_allowlist() {
        let aot = AotConfig {
            allowed_classes: vec!["java/lang/Class".into()],
        };
        assert!(aot.is_allowed("java/lang/Class"));
        assert!(!aot.is_allowed("java/util/HashMap"));
    }
}
