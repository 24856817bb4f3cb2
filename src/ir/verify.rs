//! Structural IR verifier.
//!
//! Checks the invariants the rest of the crate assumes: every reachable
//! block ends in exactly one terminator, phi nodes sit at the top of their
//! block with one incoming value per predecessor, and the entry block has
//! no predecessors. Value dominance is not checked; fixtures are built in
//! LCSSA form by construction.

use thiserror::Error;

use super::cfg::Cfg;
use super::function::{Function, InstKind};

/// A structural well-formedness violation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("block {block} has no terminator")]
    MissingTerminator { block: u32 },

    #[error("block {block} has a terminator before its last instruction")]
    TerminatorNotLast { block: u32 },

    #[error("block {block} has a phi after a non-phi instruction")]
    PhiNotAtTop { block: u32 },

    #[error("phi in block {block} has {got} incoming values for {expected} predecessors")]
    PhiArityMismatch { block: u32, expected: usize, got: usize },

    #[error("phi in block {block} has an incoming edge from non-predecessor block {from}")]
    PhiFromNonPred { block: u32, from: u32 },

    #[error("the entry block has predecessors")]
    EntryHasPreds,
}

/// Verify the structural invariants of a function. Only reachable blocks
/// are checked.
pub fn verify(func: &Function) -> Result<(), VerifyError> {
    let cfg = Cfg::build(func);

    if !cfg.preds(func.entry).is_empty() {
        return Err(VerifyError::EntryHasPreds);
    }

    for &block in &cfg.rpo {
        let insts = &func.block(block).insts;
        let Some(&last) = insts.last() else {
            return Err(VerifyError::MissingTerminator {
                block: block.index(),
            });
        };
        if !func.inst(last).kind.is_terminator() {
            return Err(VerifyError::MissingTerminator {
                block: block.index(),
            });
        }

        let mut seen_non_phi = false;
        for (i, &inst) in insts.iter().enumerate() {
            let kind = &func.inst(inst).kind;
            if kind.is_terminator() && i + 1 != insts.len() {
                return Err(VerifyError::TerminatorNotLast {
                    block: block.index(),
                });
            }
            if kind.is_phi() {
                if seen_non_phi {
                    return Err(VerifyError::PhiNotAtTop {
                        block: block.index(),
                    });
                }
                if let InstKind::Phi { incoming } = kind {
                    let preds = cfg.preds(block);
                    if incoming.len() != preds.len() {
                        return Err(VerifyError::PhiArityMismatch {
                            block: block.index(),
                            expected: preds.len(),
                            got: incoming.len(),
                        });
                    }
                    for &(_, from) in incoming {
                        if !preds.contains(&from) {
                            return Err(VerifyError::PhiFromNonPred {
                                block: block.index(),
                                from: from.index(),
                            });
                        }
                    }
                }
            } else {
                seen_non_phi = true;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::FunctionBuilder;
    use crate::ir::function::Type;

    #[test]
    fn accepts_well_formed() {
        let mut b = FunctionBuilder::new("ok", &[Type::I32]);
        let x = b.param(0);
        b.ret(Some(x));
        assert_eq!(verify(&b.finish()), Ok(()));
    }

    #[test]
    fn rejects_missing_terminator() {
        let mut b = FunctionBuilder::new("bad", &[Type::Ptr]);
        let p = b.param(0);
        b.load(p, Type::F64);
        let func = b.finish();
        assert!(matches!(
            verify(&func),
            Err(VerifyError::MissingTerminator { .. })
        ));
    }

    #[test]
    fn rejects_phi_arity_mismatch() {
        let mut b = FunctionBuilder::new("bad", &[Type::I32]);
        let x = b.param(0);
        let next = b.create_block("next");
        b.br(next);
        b.switch_to(next);
        let entry = b.func().entry;
        let phi = b.phi(Type::I32, &[(x, entry), (x, entry)]);
        b.ret(Some(phi));
        assert!(matches!(
            verify(&b.finish()),
            Err(VerifyError::PhiArityMismatch { .. })
        ));
    }
}
