//! Induction-variable detection.
//!
//! An induction variable is a header phi with exactly two incoming values:
//! an initial value arriving from outside the loop and `phi + step` arriving
//! from a latch, with a loop-invariant step. This is the canonical shape
//! loop-simplify leaves behind and the only one the stream inference needs.

use crate::analysis::expr::Expr;
use crate::ir::cfg::LoopForest;
use crate::ir::{BinOp, Function, InstId, InstKind, Type, ValueId};

/// A detected induction variable.
#[derive(Debug, Clone)]
pub struct InductionVar {
    /// The header phi instruction.
    pub phi: InstId,
    /// The phi's result (the IV's value within an iteration).
    pub value: ValueId,
    /// The incremented value from the latch (`value + step`).
    pub next: ValueId,
    /// Initial value on loop entry.
    pub init: Expr,
    /// Loop-invariant step per iteration.
    pub step: Expr,
}

/// Check that a value is invariant with respect to loop `idx`: constants,
/// parameters, and anything defined outside the loop.
pub fn is_invariant_in(func: &Function, forest: &LoopForest, idx: usize, v: ValueId) -> bool {
    match func.value_def_inst(v) {
        None => true,
        Some(inst) => !forest.contains(idx, func.inst(inst).block),
    }
}

fn value_to_expr(func: &Function, v: ValueId) -> Expr {
    match func.value_as_const_int(v) {
        Some(c) => Expr::Const(c),
        None => Expr::Value(v),
    }
}

/// Find the induction variables of loop `idx`.
pub fn find_induction_vars(func: &Function, forest: &LoopForest, idx: usize) -> Vec<InductionVar> {
    let header = forest.loops[idx].header;
    let mut ivs = Vec::new();

    for phi in func.phis(header) {
        let result = match func.inst(phi).result {
            Some(v) if matches!(func.value_ty(v), Type::I32 | Type::I64) => v,
            _ => continue,
        };
        let incoming = match &func.inst(phi).kind {
            InstKind::Phi { incoming } => incoming.clone(),
            _ => unreachable!(),
        };
        if incoming.len() != 2 {
            continue;
        }

        let mut init = None;
        let mut next = None;
        for (v, from) in incoming {
            if forest.contains(idx, from) {
                next = Some(v);
            } else {
                init = Some(v);
            }
        }
        let (Some(init_v), Some(next_v)) = (init, next) else {
            continue;
        };

        // The latch value must be `phi + invariant`.
        let Some(next_inst) = func.value_def_inst(next_v) else {
            continue;
        };
        let step = match &func.inst(next_inst).kind {
            InstKind::Binary {
                op: BinOp::Add,
                lhs,
                rhs,
            } => {
                if *lhs == result && is_invariant_in(func, forest, idx, *rhs) {
                    Some(*rhs)
                } else if *rhs == result && is_invariant_in(func, forest, idx, *lhs) {
                    Some(*lhs)
                } else {
                    None
                }
            }
            _ => None,
        };
        let Some(step_v) = step else {
            continue;
        };

        ivs.push(InductionVar {
            phi,
            value: result,
            next: next_v,
            init: value_to_expr(func, init_v),
            step: value_to_expr(func, step_v),
        });
    }

    ivs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::cfg::{Cfg, DominatorTree};
    use crate::ir::{CmpPred, FunctionBuilder};

    #[test]
    fn detects_canonical_iv() {
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
        let c = b.icmp(CmpPred::Slt, i_next, n);
        b.cond_br(c, body, exit);
        b.add_phi_incoming(i, i_next, body);
        b.switch_to(exit);
        b.ret(None);

        let func = b.finish();
        let cfg = Cfg::build(&func);
        let dom = DominatorTree::build(&cfg);
        let forest = LoopForest::compute(&func, &cfg, &dom);

        let ivs = find_induction_vars(&func, &forest, 0);
        assert_eq!(ivs.len(), 1);
        assert_eq!(ivs[0].value, i);
        assert_eq!(ivs[0].next, i_next);
        assert_eq!(ivs[0].init, Expr::Const(0));
        assert_eq!(ivs[0].step, Expr::Const(1));
    }

    #[test]
    fn non_additive_phi_is_not_an_iv() {
        let mut b = FunctionBuilder::new("f", &[Type::I32]);
        let n = b.param(0);
        let body = b.create_block("body");
        let exit = b.create_block("exit");
        let one = b.const_i32(1);
        let entry = b.func().entry;
        b.br(body);
        b.switch_to(body);
        let i = b.phi(Type::I32, &[(one, entry)]);
        let two = b.const_i32(2);
        let i_next = b.imul(i, two);
        let c = b.icmp(CmpPred::Slt, i_next, n);
        b.cond_br(c, body, exit);
        b.add_phi_incoming(i, i_next, body);
        b.switch_to(exit);
        b.ret(None);

        let func = b.finish();
        let cfg = Cfg::build(&func);
        let dom = DominatorTree::build(&cfg);
        let forest = LoopForest::compute(&func, &cfg, &dom);

        assert!(find_induction_vars(&func, &forest, 0).is_empty());
    }
}
