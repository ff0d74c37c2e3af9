//! Ahead-of-time constant verification.
//!
//! Code compiled into an ahead-of-time image cannot embed arbitrary heap
//! objects: the loader can only reconstruct null, interned strings, and
//! instances of explicitly allow-listed classes. Every other object
//! constant in the graph is a compiler defect at this point, not a
//! bailout, so it surfaces as a verification error naming the constant
//! and its class.

use crate::error::{CompileError, VerificationError};
use crate::ir::graph::Graph;
use crate::ir::ops::{ConstantValue, OpKind};
use crate::phase::{Phase, PhaseContext};
use crate::providers::{AotConfig, ClassRegistry};

pub struct AotConstantVerificationPhase;

impl AotConstantVerificationPhase {
    pub fn apply(
        graph: &Graph,
        classes: &ClassRegistry,
        aot: &AotConfig,
    ) -> Result<(), CompileError> {
        for (id, node) in graph.iter() {
            let OpKind::Constant(ConstantValue::Object(oc)) = &node.op else {
                continue;
            };
            if oc.interned_string {
                continue;
            }
            let class_name = classes.name(oc.class);
            if aot.is_allowed(class_name) {
                continue;
            }
            return Err(VerificationError::new(
                format!(
                    "object constant {} of class {} cannot be embedded in an AOT image",
                    id, class_name
                ),
                graph.dump(),
            )
            .into());
        }
        Ok(())
    }
}

impl Phase for AotConstantVerificationPhase {
    fn name(&self) -> &'static str {
        "aot-constant-verification"
    }

    fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext<'_>) -> Result<(), CompileError> {
        Self::apply(graph, &ctx.providers.classes, &ctx.providers.aot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::NodeId;
    use crate::ir::ops::ObjectConstant;
    use crate::ir::stamp::ClassId;

    fn object_constant(g: &mut Graph, class: ClassId, interned: bool) -> NodeId {
        let c = g.unique(
            OpKind::Constant(ConstantValue::Object(ObjectConstant {
                class,
                instance: 0,
                interned_string: interned,
            })),
            &[],
        );
        let ret = g.add(OpKind::Return, &[g.start(), c]);
        g.append_input(g.end(), ret);
        c
    }

    #[test]
    fn test_null_and_interned_strings_pass() {
        let mut classes = ClassRegistry::new();
        let string = classes.intern("java/lang/String");
        let aot = AotConfig::default();

        let mut g = Graph::new();
        let null = g.null_constant();
        let ret = g.add(OpKind::Return, &[g.start(), null]);
        g.append_input(g.end(), ret);
        object_constant(&mut g, string, true);

        AotConstantVerificationPhase::apply(&g, &classes, &aot).unwrap();
    }

    #[test]
    fn test_allowlisted_class_passes() {
        let mut classes = ClassRegistry::new();
        let class = classes.intern("java/lang/Class");
        let aot = AotConfig {
            allowed_classes: vec!["java/lang/Class".into()],
        };

        let mut g = Graph::new();
        object_constant(&mut g, class, false);
        AotConstantVerificationPhase::apply(&g, &classes, &aot).unwrap();
    }

    #[test]
    fn test_arbitrary_object_is_rejected() {
        let mut classes = ClassRegistry::new();
        let class = classes.intern("com/example/Cache");
        let aot = AotConfig::default();

        let mut g = Graph::new();
        let c = object_constant(&mut g, class, false);
        let err = AotConstantVerificationPhase::apply(&g, &classes, &aot).unwrap_err();
        let CompileError::Verification(v) = err else {
            panic!("expected a verification error");
        };
        assert!(v.reason.contains("com/example/Cache"));
        assert!(v.reason.contains(&c.to_string()));
    }
}
