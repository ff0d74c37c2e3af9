//! Phase engine.
//!
//! An optimization phase is a named graph-to-graph transformation. The
//! pipeline runs a fixed sequence of phases over one graph, charges their
//! work against a shared budget, and (in debug builds) re-verifies the
//! graph after every phase that opts into checking.

use std::time::{Duration, Instant};

use tracing::{debug, info_span, warn};

use crate::error::{Bailout, CompileError};
use crate::ir::graph::Graph;
use crate::ir::order;
use crate::providers::{BudgetConfig, Providers};

// =============================================================================
// Budget
// =============================================================================

/// Tracks resource consumption across all phases of one compilation.
/// Exhaustion surfaces as a retryable bailout; the caller may requeue the
/// unit with a larger budget or at a lower tier.
pub struct CompileBudget {
    node_limit: Option<usize>,
    deadline: Option<Instant>,
    /// Work units charged so far, for diagnostics.
    charged: u64,
}

impl CompileBudget {
    pub fn new(config: &BudgetConfig) -> Self {
        CompileBudget {
            node_limit: config.node_limit,
            deadline: config.time_limit.map(|d| Instant::now() + d),
            charged: 0,
        }
    }

    /// Unlimited budget, for tests and standalone phase runs.
    pub fn unlimited() -> Self {
        CompileBudget {
            node_limit: None,
            deadline: None,
            charged: 0,
        }
    }

    /// Charge `units` of work and check the deadline. Call before each
    /// unit of graph growth, never after: a failed charge must leave the
    /// graph untouched.
    pub fn charge(&mut self, units: u64) -> Result<(), Bailout> {
        self.charged += units;
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(Bailout::Retryable(format!(
                    "compile time budget exhausted after {} work units",
                    self.charged
                )));
            }
        }
        Ok(())
    }

    /// Check a phase's projected growth against the node limit before the
    /// phase runs, so a size-doubling phase fails with the graph untouched.
    pub fn check_growth(&self, nodes: usize, factor: f32) -> Result<(), Bailout> {
        if let Some(limit) = self.node_limit {
            let projected = (nodes as f32 * factor) as usize;
            if projected > limit {
                return Err(Bailout::Retryable(format!(
                    "projected graph size {} exceeds node limit {}",
                    projected, limit
                )));
            }
        }
        Ok(())
    }

    /// Check the node limit against the current graph size.
    pub fn check_size(&self, graph: &Graph) -> Result<(), Bailout> {
        if let Some(limit) = self.node_limit {
            if graph.live_count() > limit {
                return Err(Bailout::Retryable(format!(
                    "graph size {} exceeds node limit {}",
                    graph.live_count(),
                    limit
                )));
            }
        }
        Ok(())
    }

    pub fn charged(&self) -> u64 {
        self.charged
    }
}

// =============================================================================
// Phase
// =============================================================================

/// Per-compilation context handed to every phase.
pub struct PhaseContext<'a> {
    pub providers: &'a Providers,
    pub budget: CompileBudget,
}

impl<'a> PhaseContext<'a> {
    pub fn new(providers: &'a Providers) -> Self {
        let budget = CompileBudget::new(&providers.budget);
        PhaseContext { providers, budget }
    }
}

/// One graph transformation in the pipeline.
pub trait Phase {
    /// Stable name, used in trace events and statistics.
    fn name(&self) -> &'static str;

    /// Expected code-size growth factor, used by tiering heuristics.
    /// 1.0 means size-neutral.
    fn code_size_increase(&self) -> f32 {
        1.0
    }

    /// Whether the verifier runs after this phase in debug builds. Only
    /// phases that deliberately leave the graph in an intermediate state
    /// opt out.
    fn checked(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext<'_>) -> Result<(), CompileError>;
}

// =============================================================================
// Pipeline
// =============================================================================

/// Timing record of one executed phase.
#[derive(Debug, Clone)]
pub struct PhaseStat {
    pub name: &'static str,
    pub duration: Duration,
    pub nodes_before: usize,
    pub nodes_after: usize,
}

/// Runs a fixed sequence of phases over one graph.
pub struct PhasePipeline {
    phases: Vec<Box<dyn Phase>>,
    stats: Vec<PhaseStat>,
}

impl PhasePipeline {
    pub fn new() -> Self {
        PhasePipeline {
            phases: Vec::new(),
            stats: Vec::new(),
        }
    }

    pub fn with_phase(mut self, phase: impl Phase + 'static) -> Self {
        self.phases.push(Box::new(phase));
        self
    }

    pub fn push(&mut self, phase: impl Phase + 'static) {
        self.phases.push(Box::new(phase));
    }

    /// Run every phase in order. Stops at the first failure; the graph is
    /// then in the failed phase's intermediate state and must be
    /// discarded by the caller.
    pub fn run(
        &mut self,
        graph: &mut Graph,
        ctx: &mut PhaseContext<'_>,
    ) -> Result<(), CompileError> {
        for phase in &self.phases {
            let span = info_span!("phase", name = phase.name());
            let _enter = span.enter();

            let nodes_before = graph.live_count();
            ctx.budget
                .check_growth(nodes_before, phase.code_size_increase())?;
            let start = Instant::now();

            phase.run(graph, ctx)?;

            ctx.budget.check_size(graph)?;
            if cfg!(debug_assertions) && phase.checked() {
                order::assert_non_cyclic_graph(graph)?;
            }

            let duration = start.elapsed();
            let nodes_after = graph.live_count();
            debug!(
                nodes_before,
                nodes_after,
                micros = duration.as_micros() as u64,
                "phase done"
            );
            if nodes_after > nodes_before * 2 && nodes_before > 0 {
                warn!(
                    phase = phase.name(),
                    nodes_before, nodes_after, "phase more than doubled the graph"
                );
            }

            self.stats.push(PhaseStat {
                name: phase.name(),
                duration,
                nodes_before,
                nodes_after,
            });
        }
        Ok(())
    }

    pub fn stats(&self) -> &[PhaseStat] {
        &self.stats
    }
}

impl Default for PhasePipeline {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ops::{ArithKind, OpKind};

    struct CountingPhase;

    impl Phase for CountingPhase {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn run(&self, graph: &mut Graph, ctx: &mut PhaseContext<'_>) -> Result<(), CompileError> {
            ctx.budget.charge(graph.live_count() as u64)?;
            Ok(())
        }
    }

    struct GrowingPhase;

    impl Phase for GrowingPhase {
        fn name(&self) -> &'static str {
            "growing"
        }

        fn run(&self, graph: &mut Graph, _ctx: &mut PhaseContext<'_>) -> Result<(), CompileError> {
            let a = graph.int_constant(1);
            let b = graph.int_constant(2);
            let add = graph.add(OpKind::Arith(ArithKind::Add), &[a, b]);
            let ret = graph.add(OpKind::Return, &[graph.start(), add]);
            graph.append_input(graph.end(), ret);
            Ok(())
        }
    }

    #[test]
    fn test_pipeline_runs_phases_in_order() {
        let providers = Providers::new();
        let mut ctx = PhaseContext::new(&providers);
        let mut graph = Graph::new();

        let mut pipeline = PhasePipeline::new()
            .with_phase(GrowingPhase)
            .with_phase(CountingPhase);
        pipeline.run(&mut graph, &mut ctx).unwrap();

        let stats = pipeline.stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].name, "growing");
        assert!(stats[0].nodes_after > stats[0].nodes_before);
        assert!(ctx.budget.charged() > 0);
    }

    struct DoublingPhase;

    impl Phase for DoublingPhase {
        fn name(&self) -> &'static str {
            "doubling"
        }

        fn code_size_increase(&self) -> f32 {
            2.0
        }

        fn run(&self, graph: &mut Graph, _ctx: &mut PhaseContext<'_>) -> Result<(), CompileError> {
            graph.int_constant(1);
            Ok(())
        }
    }

    #[test]
    fn test_projected_growth_bails_before_the_phase_runs() {
        let mut providers = Providers::new();
        providers.budget.node_limit = Some(3);
        let mut ctx = PhaseContext::new(&providers);
        let mut graph = Graph::new();
        let before = graph.live_count();

        let mut pipeline = PhasePipeline::new().with_phase(DoublingPhase);
        let err = pipeline.run(&mut graph, &mut ctx).unwrap_err();
        match err {
            CompileError::Bailout(b) => assert!(b.is_retryable()),
            other => panic!("unexpected error: {other}"),
        }
        // The phase never ran.
        assert_eq!(graph.live_count(), before);
    }

    #[test]
    fn test_node_limit_bails_out() {
        let mut providers = Providers::new();
        providers.budget.node_limit = Some(3);
        let mut ctx = PhaseContext::new(&providers);
        let mut graph = Graph::new();

        let mut pipeline = PhasePipeline::new().with_phase(GrowingPhase);
        let err = pipeline.run(&mut graph, &mut ctx).unwrap_err();
        match err {
            CompileError::Bailout(b) => assert!(b.is_retryable()),
            other => panic!("unexpected error: {other}"),
        }
    }
}
