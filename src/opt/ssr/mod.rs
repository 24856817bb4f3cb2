//! SSR stream inference pass.
//!
//! Replaces affine loads/stores in profitable loops with hardware stream
//! pops/pushes, configured once in the loop preheader and bracketed by
//! enable/disable intrinsics at runtime.
//!
//! # Algorithm
//!
//! 1. Build CFG, dominators, loop forest, and the affine-access analysis.
//! 2. Mark loops already containing SSR activity as invalid.
//! 3. Per top-level loop nest: collect up to [`NUM_STREAMS`] candidates per
//!    loop, estimate the gain, and populate a conflict tree.
//! 4. Select the non-overlapping loop set with the highest combined gain.
//! 5. Expand setup data and runtime checks in each chosen preheader.
//! 6. Only then mutate control flow: clone each chosen region into guarded
//!    fast/slow versions and emit the stream intrinsics into the fast one.
//! 7. Tag the function `ssr` (and optionally `no_inline`).
//!
//! The phase split between 5 and 6 is load-bearing: region cloning makes
//! every cached analysis stale, so no analysis query runs after the first
//! clone — the mutation phase only consumes data captured earlier.

pub mod candidates;
pub mod clone;
pub mod conflict_tree;
pub mod emit;
pub mod expand;
pub mod gain;
pub mod poison;

pub use clone::{clone_region, split_at, ClonedRegion};
pub use conflict_tree::ConflictTree;

use std::collections::VecDeque;

use log::debug;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::analysis::affine::{AccessId, AffineAccessAnalysis, ExpandedAccess};
use crate::ir::cfg::{Cfg, DominatorTree, LoopForest};
use crate::ir::{Function, InstId, ValueId};
use crate::opt::FunctionPass;

use self::candidates::candidate_set;
use self::emit::{generate_barrier, generate_enable_disable, generate_stream_setup};
use self::expand::expand_in_loop;
use self::gain::estimate_gain;
use self::poison::find_ssr_invalid_loops;

// =============================================================================
// Hardware contract
// =============================================================================

/// Number of data movers: at most this many simultaneous streams per loop.
pub const NUM_STREAMS: usize = 3;

/// Maximum affine dimensions one stream engine can drive.
pub const MAX_DIM: u8 = 4;

/// Inclusive scratchpad (TCDM) address range the hardware can stream from.
pub const SCRATCHPAD_BEGIN: u64 = 0x10_0000;
pub const SCRATCHPAD_END: u64 = 0x12_0000;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration flags for the inference pass.
#[derive(Debug, Clone, Default)]
pub struct SsrConfig {
    /// Master enable; the pass is a no-op without it.
    pub enabled: bool,

    /// Elide runtime non-overlap checks between conflicting accesses
    /// (unsafe; prefer `restrict`-style guarantees at the source level).
    pub no_intersect_check: bool,

    /// Assume all streamed data is inside the scratchpad.
    pub no_tcdm_check: bool,

    /// Elide the checks that each streamed loop executes at least once.
    pub no_bound_check: bool,

    /// Only infer streams with no conflicts at all.
    pub conflict_free_only: bool,

    /// Emit a spinning barrier per stream before the disable.
    pub barrier: bool,

    /// Tag transformed functions `no_inline`.
    pub no_inline: bool,

    /// Report inferred streams on standard error.
    pub verbose: bool,
}

impl SsrConfig {
    /// Enabled, with every runtime check in place.
    pub fn enabled() -> Self {
        SsrConfig {
            enabled: true,
            ..SsrConfig::default()
        }
    }

    /// Enabled, with every runtime check elided: the guard becomes constant
    /// `true` and no slow path is kept.
    pub fn unchecked() -> Self {
        SsrConfig {
            enabled: true,
            no_intersect_check: true,
            no_tcdm_check: true,
            no_bound_check: true,
            ..SsrConfig::default()
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters from the last pass run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SsrStats {
    pub loops_visited: usize,
    pub loops_selected: usize,
    pub streams_installed: usize,
    pub loads_replaced: usize,
    pub stores_replaced: usize,
    pub regions_cloned: usize,
}

// =============================================================================
// Pass
// =============================================================================

/// The stream inference pass.
#[derive(Debug, Default)]
pub struct SsrInference {
    config: SsrConfig,
    stats: SsrStats,
}

impl SsrInference {
    /// Create the pass with default (disabled) configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the pass with the given configuration.
    pub fn with_config(config: SsrConfig) -> Self {
        SsrInference {
            config,
            stats: SsrStats::default(),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &SsrConfig {
        &self.config
    }

    /// Statistics from the last run.
    pub fn stats(&self) -> &SsrStats {
        &self.stats
    }

    /// Run stream inference over one function.
    pub fn run_ssr(&mut self, func: &mut Function) -> bool {
        self.stats = SsrStats::default();

        if !self.config.enabled || func.attrs.ssr {
            return false;
        }

        debug!("ssr inference on function {}", func.name);

        let cfg = Cfg::build(func);
        let dom = DominatorTree::build(&cfg);
        let forest = LoopForest::compute(func, &cfg, &dom);
        let analysis = AffineAccessAnalysis::compute(func, &cfg, &forest);
        let ssr_invalid = find_ssr_invalid_loops(func, &forest);

        let mut changed = false;
        let mut possible: FxHashMap<usize, SmallVec<[AccessId; NUM_STREAMS]>> =
            FxHashMap::default();
        let mut conds: FxHashMap<usize, ValueId> = FxHashMap::default();
        let mut exps: FxHashMap<usize, Vec<ExpandedAccess>> = FxHashMap::default();
        let mut selections: Vec<Vec<usize>> = Vec::new();

        for &top in &forest.top_level {
            let mut tree = ConflictTree::new();
            let mut worklist: VecDeque<usize> = VecDeque::from([top]);
            while let Some(l) = worklist.pop_front() {
                self.stats.loops_visited += 1;

                let cands =
                    candidate_set(func, &forest, &analysis, l, &ssr_invalid, &self.config);
                let gain = estimate_gain(func, &forest, &analysis, &cands, l, &self.config);
                debug!(
                    "loop {:?} (depth {}): {} candidate(s), est. gain {}",
                    forest.loops[l].header,
                    forest.loops[l].depth,
                    cands.len(),
                    gain
                );
                if self.config.verbose && !cands.is_empty() {
                    for &a in &cands {
                        eprintln!(
                            "potential {} stream of dimension {} in loop {:?}",
                            if analysis.accesses[a].is_write { "write" } else { "read" },
                            analysis.dim_at(&forest, a, l).expect("candidate has a dim"),
                            forest.loops[l].header,
                        );
                    }
                    eprintln!("with est. gain = {gain}");
                }

                let parent = if l == top { None } else { forest.loops[l].parent };
                tree.insert_node(l, gain.max(0), parent);
                possible.insert(l, cands);

                worklist.extend(forest.loops[l].children.iter().copied());
            }

            let best = tree.find_best(|a, b| a + b);
            for &l in &best {
                let cands = &possible[&l];
                if cands.is_empty() {
                    continue;
                }
                let (exp, cond) =
                    expand_in_loop(func, &analysis, &forest, cands, l, &self.config);
                conds.insert(l, cond);
                exps.insert(l, exp);
                changed = true;
            }
            selections.push(best);
        }

        // From here on the IR gets restructured, which invalidates every
        // cached analysis. Nothing below issues a fresh analysis query; the
        // emitters only read classification data captured above.
        for best in &selections {
            for &l in best {
                let Some(&cond) = conds.get(&l) else {
                    continue;
                };
                self.stats.loops_selected += 1;
                if self.config.verbose {
                    eprintln!(
                        "> function {}: installing streams with {} containing loop(s), setup in preheader of loop {:?}",
                        func.name,
                        forest.loops[l].depth - 1,
                        forest.loops[l].header,
                    );
                }
                let ph = forest.loops[l].preheader.expect("canonical loop");
                let ph_term = func.terminator(ph).expect("preheader terminator");
                let exit = forest.loops[l].exit.expect("canonical loop");
                let ex_point = func.first_insertion_point(exit);
                self.clone_and_setup(func, &analysis, ph_term, ex_point, cond, &exps[&l]);
            }
        }

        if !changed {
            return false;
        }
        func.attrs.ssr = true;
        if self.config.no_inline {
            func.attrs.no_inline = true;
        }
        true
    }

    /// Version the region if the guard is a runtime value, then emit the
    /// stream setup into the fast path.
    fn clone_and_setup(
        &mut self,
        func: &mut Function,
        analysis: &AffineAccessAnalysis,
        ph_term: InstId,
        mut ex_point: InstId,
        cond: ValueId,
        exps: &[ExpandedAccess],
    ) {
        assert!(exps.len() <= NUM_STREAMS);
        if exps.is_empty() {
            return;
        }

        match func.value_as_const_int(cond) {
            // The checks collapsed to compile-time false: silently decline.
            Some(0) => return,
            // Compile-time safe: install streams without versioning.
            Some(_) => {}
            None => {
                let region = clone::clone_region(func, ph_term, ex_point, cond);
                ex_point = region.fast_exit_branch;
                self.stats.regions_cloned += 1;
            }
        }

        for (dmid, e) in exps.iter().enumerate() {
            let counts = generate_stream_setup(
                func,
                analysis,
                e,
                dmid as u32,
                ph_term,
                self.config.verbose,
            );
            self.stats.loads_replaced += counts.loads_replaced;
            self.stats.stores_replaced += counts.stores_replaced;
            if self.config.barrier {
                generate_barrier(func, ex_point, dmid as u32);
            }
            self.stats.streams_installed += 1;
        }

        generate_enable_disable(func, ph_term, ex_point);
    }
}

impl FunctionPass for SsrInference {
    fn name(&self) -> &'static str {
        "ssr-infer"
    }

    fn run(&mut self, func: &mut Function) -> bool {
        self.run_ssr(func)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Type};

    #[test]
    fn pass_name() {
        assert_eq!(SsrInference::new().name(), "ssr-infer");
    }

    #[test]
    fn disabled_pass_is_a_no_op() {
        let mut b = FunctionBuilder::new("f", &[Type::I32]);
        let x = b.param(0);
        b.ret(Some(x));
        let mut func = b.finish();

        let mut pass = SsrInference::new();
        assert!(!pass.run(&mut func));
        assert!(!func.attrs.ssr);
    }

    #[test]
    fn tagged_function_is_skipped() {
        let mut b = FunctionBuilder::new("f", &[Type::I32]);
        let x = b.param(0);
        b.ret(Some(x));
        let mut func = b.finish();
        func.attrs.ssr = true;

        let mut pass = SsrInference::with_config(SsrConfig::enabled());
        assert!(!pass.run(&mut func));
        assert_eq!(pass.stats().loops_visited, 0);
    }

    #[test]
    fn loop_free_function_is_unchanged() {
        let mut b = FunctionBuilder::new("f", &[Type::Ptr]);
        let p = b.param(0);
        let v = b.load(p, Type::F64);
        let _ = v;
        b.ret(None);
        let mut func = b.finish();

        let mut pass = SsrInference::with_config(SsrConfig::enabled());
        assert!(!pass.run(&mut func));
        assert!(!func.attrs.ssr);
    }

    #[test]
    fn default_config_is_all_off() {
        let config = SsrConfig::default();
        assert!(!config.enabled);
        assert!(!config.no_intersect_check);
        assert!(!config.no_tcdm_check);
        assert!(!config.no_bound_check);
        assert!(!config.conflict_free_only);
        assert!(!config.barrier);
        assert!(!config.no_inline);
        assert!(!config.verbose);
    }

    #[test]
    fn unchecked_config_elides_all_checks() {
        let config = SsrConfig::unchecked();
        assert!(config.enabled);
        assert!(config.no_intersect_check);
        assert!(config.no_tcdm_check);
        assert!(config.no_bound_check);
    }
}
