//! Symbolic trip-count computation.
//!
//! The hardware encodes per-dimension bounds as `trips - 1`, so the analysis
//! computes how many times a loop body executes. Only the rotated,
//! bottom-tested shape produced by loop canonicalization is recognized: a
//! single exiting block whose terminator compares the incremented induction
//! variable against a loop-invariant bound and branches back on success.
//!
//! For `i_next < bound` with init `a` and positive constant step `s`:
//! `trips = ceil((bound - a) / s)`; `<=` adds one to the numerator.
//! Symbolic bounds are supported at unit step. Everything else is unknown,
//! which makes the surrounding access not well-formed rather than wrong.

use crate::analysis::expr::Expr;
use crate::analysis::induction::{is_invariant_in, InductionVar};
use crate::ir::cfg::LoopForest;
use crate::ir::{CmpPred, Function, InstKind};

/// The computed trip count of a loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TripCount {
    /// The body executes exactly this many times.
    Constant(i64),
    /// The body executes a runtime-dependent number of times.
    Symbolic(Expr),
    /// Cannot be determined.
    Unknown,
}

impl TripCount {
    /// The hardware repetition encoding, `trips - 1`.
    pub fn rep(&self) -> Option<Expr> {
        match self {
            TripCount::Constant(n) => Some(Expr::Const(n - 1)),
            TripCount::Symbolic(e) => Some(Expr::sub(e.clone(), Expr::Const(1))),
            TripCount::Unknown => None,
        }
    }

    /// Constant trips, if known.
    pub fn as_const(&self) -> Option<i64> {
        match self {
            TripCount::Constant(n) => Some(*n),
            TripCount::Symbolic(e) => e.as_const(),
            TripCount::Unknown => None,
        }
    }
}

/// Compute the trip count of loop `idx` given its induction variables.
pub fn loop_trip_count(
    func: &Function,
    forest: &LoopForest,
    idx: usize,
    ivs: &[InductionVar],
) -> TripCount {
    // Exactly one exiting block.
    let mut exiting = None;
    for &b in &forest.loops[idx].blocks {
        let leaves = func
            .successors(b)
            .iter()
            .any(|&s| !forest.contains(idx, s));
        if leaves {
            if exiting.is_some() {
                return TripCount::Unknown;
            }
            exiting = Some(b);
        }
    }
    let Some(exiting) = exiting else {
        return TripCount::Unknown;
    };

    let Some(term) = func.terminator(exiting) else {
        return TripCount::Unknown;
    };
    let (cond, then_dest, else_dest) = match &func.inst(term).kind {
        InstKind::CondBr {
            cond,
            then_dest,
            else_dest,
        } => (*cond, *then_dest, *else_dest),
        _ => return TripCount::Unknown,
    };
    // Continue on true, exit on false.
    if !forest.contains(idx, then_dest) || forest.contains(idx, else_dest) {
        return TripCount::Unknown;
    }

    let Some(cmp) = func.value_def_inst(cond) else {
        return TripCount::Unknown;
    };
    let (pred, lhs, rhs) = match &func.inst(cmp).kind {
        InstKind::Cmp { pred, lhs, rhs } => (*pred, *lhs, *rhs),
        _ => return TripCount::Unknown,
    };
    let Some(iv) = ivs.iter().find(|iv| iv.value == lhs || iv.next == lhs) else {
        return TripCount::Unknown;
    };
    if iv.next != lhs || !is_invariant_in(func, forest, idx, rhs) {
        return TripCount::Unknown;
    }

    let le_adjust = match pred {
        CmpPred::Slt | CmpPred::Ult => 0,
        CmpPred::Sle | CmpPred::Ule => 1,
        _ => return TripCount::Unknown,
    };

    let bound = match func.value_as_const_int(rhs) {
        Some(c) => Expr::Const(c),
        None => Expr::Value(rhs),
    };
    let span = Expr::add(Expr::sub(bound, iv.init.clone()), Expr::Const(le_adjust));

    match iv.step.as_const() {
        Some(s) if s > 0 => match span.as_const() {
            Some(n) => TripCount::Constant((n.max(0) + s - 1) / s),
            None if s == 1 => TripCount::Symbolic(span),
            None => TripCount::Unknown,
        },
        _ => TripCount::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::cfg::{Cfg, DominatorTree};
    use crate::ir::{FunctionBuilder, Type, ValueId};

    fn loop_with_bound(bound: Option<i64>) -> (Function, ValueId) {
        let mut b = FunctionBuilder::new("f", &[Type::I32]);
        let n = b.param(0);
        let body = b.create_block("body");
        let exit = b.create_block("exit");
        let zero = b.const_i32(0);
        let entry = b.func().entry;
        b.br(body);
        b.switch_to(body);
        let i = b.phi(Type::I32, &[(zero, entry)]);
        let one = b.const_i32(1);
        let i_next = b.iadd(i, one);
        let limit = match bound {
            Some(c) => b.const_i32(c),
            None => n,
        };
        let c = b.icmp(CmpPred::Slt, i_next, limit);
        b.cond_br(c, body, exit);
        b.add_phi_incoming(i, i_next, body);
        b.switch_to(exit);
        b.ret(None);
        (b.finish(), n)
    }

    fn analyze(func: &Function) -> TripCount {
        let cfg = Cfg::build(func);
        let dom = DominatorTree::build(&cfg);
        let forest = LoopForest::compute(func, &cfg, &dom);
        let ivs = crate::analysis::induction::find_induction_vars(func, &forest, 0);
        loop_trip_count(func, &forest, 0, &ivs)
    }

    #[test]
    fn constant_bound() {
        let (func, _) = loop_with_bound(Some(100));
        let tc = analyze(&func);
        assert_eq!(tc, TripCount::Constant(100));
        assert_eq!(tc.rep(), Some(Expr::Const(99)));
    }

    #[test]
    fn symbolic_bound_at_unit_step() {
        let (func, n) = loop_with_bound(None);
        let tc = analyze(&func);
        assert_eq!(tc, TripCount::Symbolic(Expr::Value(n)));
    }
}
