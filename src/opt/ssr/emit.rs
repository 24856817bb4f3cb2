//! Ordered intrinsic emission.
//!
//! The hardware state machine constrains the setup sequence: per-dimension
//! bound/stride registers and the repetition register must be programmed
//! before the base-address setup (which starts prefetching), and the whole
//! group must precede `Enable`. `Disable` closes the bracket at the exit.
//! Strides for dimensions above the first are corrected by the cumulative
//! span already covered by the lower dimensions.

use log::debug;

use crate::analysis::affine::{AffineAccessAnalysis, ExpandedAccess};
use crate::ir::{Function, InstBuilder, InstId, InstKind, SsrOp};

use super::MAX_DIM;

/// Site-rewrite counters, reported into the pass statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmitCounts {
    pub loads_replaced: usize,
    pub stores_replaced: usize,
}

/// Emit the full setup for one expanded access on data mover `dmid` and
/// rewrite its access sites to stream pops/pushes.
///
/// `point` must be the (fast-path) preheader terminator; every setup call
/// lands immediately before it, in emission order.
pub fn generate_stream_setup(
    func: &mut Function,
    analysis: &AffineAccessAnalysis,
    e: &ExpandedAccess,
    dmid: u32,
    point: InstId,
    verbose: bool,
) -> EmitCounts {
    let access = &analysis.accesses[e.access];
    let dim = e.dim;
    assert!((1..=MAX_DIM).contains(&dim));
    debug!("stream setup: dm{dmid}, dim {dim}, {} site(s)", access.sites.len());
    if verbose {
        eprintln!(
            "inferring {} stream of dimension {} over {} site(s)",
            if access.is_write { "write" } else { "read" },
            dim,
            access.sites.len(),
        );
    }

    let mut counts = EmitCounts::default();

    // Bound/stride setup per dimension, innermost first.
    let mut b = InstBuilder::before(func, point);
    let dm = b.const_i32(i64::from(dmid));
    for d in 0..dim as usize {
        let mut stride = e.steps[d];
        if d > 0 {
            stride = b.isub(stride, e.prefix_ranges[d - 1]);
        }
        let bound = e.reps[d];
        b.ssr(SsrOp::SetupBoundStride { dim: d as u8 + 1 }, &[dm, bound, stride]);
    }

    // Rewrite the access sites. Each site contributes one repetition.
    let mut n_sites = 0u32;
    for &site in &access.sites {
        if access.is_write {
            let value = match &func.inst(site).kind {
                InstKind::Store { value, .. } => *value,
                _ => unreachable!("write access site is a store"),
            };
            let mut at = InstBuilder::before(func, site);
            at.ssr(SsrOp::Push, &[dm, value]);
            func.erase_inst(site);
            counts.stores_replaced += 1;
        } else {
            let result = func.inst(site).result.expect("load has a result");
            let mut at = InstBuilder::before(func, site);
            let popped = at.ssr(SsrOp::Pop, &[dm]).expect("pop yields a value");
            func.replace_all_uses(result, popped);
            func.erase_inst(site);
            counts.loads_replaced += 1;
        }
        n_sites += 1;
    }

    // Repetition, then the prefetch-starting base-address setup. This one
    // must come after every bound/stride and repetition write.
    let mut b = InstBuilder::before(func, point);
    let rep = b.const_i32(i64::from(n_sites) - 1);
    b.ssr(SsrOp::SetupRepetition, &[dm, rep]);

    let dim_imm = b.const_i32(i64::from(dim) - 1);
    let op = if access.is_write {
        SsrOp::SetupWriteImm
    } else {
        SsrOp::SetupReadImm
    };
    b.ssr(op, &[dm, dim_imm, e.addr]);

    counts
}

/// Emit `Enable` before the preheader terminator and `Disable` before the
/// exit point. Returns both intrinsic instructions.
pub fn generate_enable_disable(
    func: &mut Function,
    ph_point: InstId,
    ex_point: InstId,
) -> (InstId, InstId) {
    let enable = InstBuilder::before(func, ph_point).ssr_inst(SsrOp::Enable, &[]);
    let disable = InstBuilder::before(func, ex_point).ssr_inst(SsrOp::Disable, &[]);
    debug!("stream enable/disable bracket installed");
    (enable, disable)
}

/// Emit a spinning barrier for `dmid` before `point`.
pub fn generate_barrier(func: &mut Function, point: InstId, dmid: u32) {
    let mut b = InstBuilder::before(func, point);
    let dm = b.const_i32(i64::from(dmid));
    b.ssr(SsrOp::Barrier, &[dm]);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::affine::AffineAccessAnalysis;
    use crate::ir::cfg::{Cfg, DominatorTree, LoopForest};
    use crate::ir::{CmpPred, FunctionBuilder, Type};

    fn fixture(write: bool) -> (Function, LoopForest, AffineAccessAnalysis) {
        let mut b = FunctionBuilder::new("f", &[Type::Ptr, Type::F64]);
        let a_ptr = b.param(0);
        let val = b.param(1);
        let body = b.create_block("body");
        let exit = b.create_block("exit");
        let zero = b.const_i32(0);
        let entry = b.func().entry;
        b.br(body);
        b.switch_to(body);
        let i = b.phi(Type::I32, &[(zero, entry)]);
        let eight = b.const_i32(8);
        let off = b.imul(i, eight);
        let addr = b.ptr_add(a_ptr, off);
        if write {
            b.store(addr, val);
        } else {
            b.load(addr, Type::F64);
        }
        let one = b.const_i32(1);
        let i_next = b.iadd(i, one);
        let n = b.const_i32(100);
        let c = b.icmp(CmpPred::Slt, i_next, n);
        b.cond_br(c, body, exit);
        b.add_phi_incoming(i, i_next, body);
        b.switch_to(exit);
        b.ret(None);

        let func = b.finish();
        let cfg = Cfg::build(&func);
        let dom = DominatorTree::build(&cfg);
        let forest = LoopForest::compute(&func, &cfg, &dom);
        let analysis = AffineAccessAnalysis::compute(&func, &cfg, &forest);
        (func, forest, analysis)
    }

    fn ssr_ops_in(func: &Function, block: crate::ir::BlockId) -> Vec<SsrOp> {
        func.block(block)
            .insts
            .iter()
            .filter_map(|&i| match &func.inst(i).kind {
                InstKind::SsrIntrinsic { op, .. } => Some(*op),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn setup_order_is_bound_stride_then_rep_then_read() {
        let (mut func, forest, analysis) = fixture(false);
        let ph = forest.loops[0].preheader.unwrap();
        let point = func.terminator(ph).unwrap();
        let (exp, _) = analysis.expand_all_at(&mut func, &forest, &[0], 0, point, false, false);

        generate_stream_setup(&mut func, &analysis, &exp[0], 0, point, false);

        let ops = ssr_ops_in(&func, ph);
        assert_eq!(
            ops,
            vec![
                SsrOp::SetupBoundStride { dim: 1 },
                SsrOp::SetupRepetition,
                SsrOp::SetupReadImm,
            ]
        );
    }

    #[test]
    fn load_site_becomes_pop() {
        let (mut func, forest, analysis) = fixture(false);
        let ph = forest.loops[0].preheader.unwrap();
        let point = func.terminator(ph).unwrap();
        let (exp, _) = analysis.expand_all_at(&mut func, &forest, &[0], 0, point, false, false);

        let counts = generate_stream_setup(&mut func, &analysis, &exp[0], 0, point, false);
        assert_eq!(counts.loads_replaced, 1);
        assert_eq!(counts.stores_replaced, 0);

        let body = forest.loops[0].header;
        assert!(ssr_ops_in(&func, body).contains(&SsrOp::Pop));
        assert!(!func
            .block(body)
            .insts
            .iter()
            .any(|&i| matches!(func.inst(i).kind, InstKind::Load { .. })));
    }

    #[test]
    fn store_site_becomes_push() {
        let (mut func, forest, analysis) = fixture(true);
        let ph = forest.loops[0].preheader.unwrap();
        let point = func.terminator(ph).unwrap();
        let (exp, _) = analysis.expand_all_at(&mut func, &forest, &[0], 0, point, false, false);

        let counts = generate_stream_setup(&mut func, &analysis, &exp[0], 0, point, false);
        assert_eq!(counts.stores_replaced, 1);

        let body = forest.loops[0].header;
        let ops = ssr_ops_in(&func, body);
        assert!(ops.contains(&SsrOp::Push));
        let ph_ops = ssr_ops_in(&func, ph);
        assert!(ph_ops.contains(&SsrOp::SetupWriteImm));
    }

    #[test]
    fn enable_disable_bracket() {
        let (mut func, forest, _) = fixture(false);
        let ph = forest.loops[0].preheader.unwrap();
        let point = func.terminator(ph).unwrap();
        let exit = forest.loops[0].exit.unwrap();
        let ex_point = func.first_insertion_point(exit);

        let (enable, disable) = generate_enable_disable(&mut func, point, ex_point);
        assert_eq!(func.inst(enable).block, ph);
        assert_eq!(func.inst(disable).block, exit);
        assert!(matches!(
            func.inst(enable).kind,
            InstKind::SsrIntrinsic { op: SsrOp::Enable, .. }
        ));
        assert!(matches!(
            func.inst(disable).kind,
            InstKind::SsrIntrinsic { op: SsrOp::Disable, .. }
        ));
    }
}
