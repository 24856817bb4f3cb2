//! IR data model: values, instructions, blocks, functions.
//!
//! # Structure
//!
//! ```text
//! Function
//!   values: Arena<Value>          constants, parameters, instruction results
//!   insts:  Arena<Instruction>    owned records; live iff listed in a block
//!   blocks: Arena<Block>          ordered instruction lists, terminator last
//! ```
//!
//! Phi nodes are ordinary instructions constrained to the front of a block.
//! Control flow is explicit through the `Br`/`CondBr`/`Ret` terminators;
//! successor edges are derived from them on demand.
//!
//! The SSR hardware intrinsics are first-class instructions (`SsrIntrinsic`)
//! rather than calls, so the stream inference pass and the invalid-loop
//! detector can match on them directly. The data-mover ID travels as a
//! constant `I32` first argument, matching the wire-level intrinsic shapes.

use smallvec::SmallVec;

use super::arena::{Arena, Id};

// =============================================================================
// Types
// =============================================================================

/// Value types. Pointers compare as unsigned machine addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// 64-bit float; the only element type the stream hardware supports.
    F64,
    /// 32-bit float (present so type filtering has something to reject).
    F32,
    I32,
    I64,
    /// Boolean / 1-bit integer.
    I1,
    /// Machine pointer.
    Ptr,
}

impl Type {
    /// Byte size of a value of this type.
    pub fn size(self) -> u32 {
        match self {
            Type::F64 | Type::I64 | Type::Ptr => 8,
            Type::F32 | Type::I32 => 4,
            Type::I1 => 1,
        }
    }
}

// =============================================================================
// Values
// =============================================================================

/// An SSA value: constant, parameter, or instruction result.
#[derive(Debug, Clone)]
pub struct Value {
    pub ty: Type,
    pub def: ValueDef,
}

/// What defines a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueDef {
    /// Function parameter by position.
    Param(u32),
    /// Compile-time constant.
    Const(Const),
    /// Result of an instruction.
    Inst(InstId),
}

/// Constant payloads. The type lives on the [`Value`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Const {
    Int(i64),
    Float(f64),
    Bool(bool),
}

pub type ValueId = Id<Value>;

// =============================================================================
// Instructions
// =============================================================================

/// Integer binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
}

/// Floating-point binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FBinOp {
    FAdd,
    FSub,
    FMul,
}

/// Comparison predicates. `U*` compare unsigned (and pointers), `S*` signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpPred {
    Eq,
    Ne,
    Ult,
    Ule,
    Slt,
    Sle,
}

/// SSR hardware intrinsic operations.
///
/// Argument shapes (all value operands; `dmid` is a constant `I32`):
///
/// | op | arguments | result |
/// |---|---|---|
/// | `SetupBoundStride { dim }` | `dmid, bound, stride` | — |
/// | `SetupRepetition` | `dmid, rep` | — |
/// | `SetupReadImm` / `SetupWriteImm` | `dmid, dim, addr` | — |
/// | `Push` | `dmid, value` | — |
/// | `Pop` | `dmid` | `F64` |
/// | `Enable` / `Disable` | — | — |
/// | `Barrier` | `dmid` | — |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsrOp {
    SetupBoundStride { dim: u8 },
    SetupRepetition,
    SetupReadImm,
    SetupWriteImm,
    Push,
    Pop,
    Enable,
    Disable,
    Barrier,
}

impl SsrOp {
    /// Wire-level intrinsic name as the assembler/backend expects it.
    pub fn name(self) -> &'static str {
        match self {
            SsrOp::SetupBoundStride { dim: 1 } => "setup_bound_stride_1d",
            SsrOp::SetupBoundStride { dim: 2 } => "setup_bound_stride_2d",
            SsrOp::SetupBoundStride { dim: 3 } => "setup_bound_stride_3d",
            SsrOp::SetupBoundStride { dim: 4 } => "setup_bound_stride_4d",
            SsrOp::SetupBoundStride { .. } => "setup_bound_stride_bad",
            SsrOp::SetupRepetition => "setup_repetition",
            SsrOp::SetupReadImm => "setup_read_imm",
            SsrOp::SetupWriteImm => "setup_write_imm",
            SsrOp::Push => "stream_push",
            SsrOp::Pop => "stream_pop",
            SsrOp::Enable => "stream_enable",
            SsrOp::Disable => "stream_disable",
            SsrOp::Barrier => "stream_barrier",
        }
    }
}

/// Instruction payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Binary {
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    FBinary {
        op: FBinOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Cmp {
        pred: CmpPred,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Pointer plus byte offset.
    PtrAdd {
        base: ValueId,
        offset: ValueId,
    },
    Load {
        addr: ValueId,
    },
    Store {
        addr: ValueId,
        value: ValueId,
    },
    Call {
        callee: Box<str>,
        args: SmallVec<[ValueId; 4]>,
        /// Call-site `ssr` attribute: the callee is known to contain streams.
        callee_ssr: bool,
    },
    /// Opaque inline assembly; may conceal raw SSR instructions.
    InlineAsm {
        asm: Box<str>,
    },
    SsrIntrinsic {
        op: SsrOp,
        args: SmallVec<[ValueId; 3]>,
    },
    Phi {
        incoming: SmallVec<[(ValueId, BlockId); 2]>,
    },
    Br {
        target: BlockId,
    },
    CondBr {
        cond: ValueId,
        then_dest: BlockId,
        else_dest: BlockId,
    },
    Ret {
        value: Option<ValueId>,
    },
}

impl InstKind {
    /// Check whether this kind ends a block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Br { .. } | InstKind::CondBr { .. } | InstKind::Ret { .. }
        )
    }

    /// Check whether this kind is a phi node.
    pub fn is_phi(&self) -> bool {
        matches!(self, InstKind::Phi { .. })
    }

    /// Visit every value operand.
    pub fn for_each_operand(&self, mut f: impl FnMut(ValueId)) {
        match self {
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::FBinary { lhs, rhs, .. }
            | InstKind::Cmp { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            InstKind::PtrAdd { base, offset } => {
                f(*base);
                f(*offset);
            }
            InstKind::Load { addr } => f(*addr),
            InstKind::Store { addr, value } => {
                f(*addr);
                f(*value);
            }
            InstKind::Call { args, .. } => args.iter().copied().for_each(f),
            InstKind::SsrIntrinsic { args, .. } => args.iter().copied().for_each(f),
            InstKind::Phi { incoming } => incoming.iter().for_each(|(v, _)| f(*v)),
            InstKind::CondBr { cond, .. } => f(*cond),
            InstKind::Ret { value } => {
                if let Some(v) = value {
                    f(*v);
                }
            }
            InstKind::InlineAsm { .. } | InstKind::Br { .. } => {}
        }
    }

    /// Visit every value operand mutably.
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut ValueId)) {
        match self {
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::FBinary { lhs, rhs, .. }
            | InstKind::Cmp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstKind::PtrAdd { base, offset } => {
                f(base);
                f(offset);
            }
            InstKind::Load { addr } => f(addr),
            InstKind::Store { addr, value } => {
                f(addr);
                f(value);
            }
            InstKind::Call { args, .. } => args.iter_mut().for_each(f),
            InstKind::SsrIntrinsic { args, .. } => args.iter_mut().for_each(f),
            InstKind::Phi { incoming } => incoming.iter_mut().for_each(|(v, _)| f(v)),
            InstKind::CondBr { cond, .. } => f(cond),
            InstKind::Ret { value } => {
                if let Some(v) = value {
                    f(v);
                }
            }
            InstKind::InlineAsm { .. } | InstKind::Br { .. } => {}
        }
    }

    /// Successor blocks of a terminator (empty for non-terminators and `Ret`).
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        match self {
            InstKind::Br { target } => SmallVec::from_slice(&[*target]),
            InstKind::CondBr {
                then_dest,
                else_dest,
                ..
            } => SmallVec::from_slice(&[*then_dest, *else_dest]),
            _ => SmallVec::new(),
        }
    }

    /// Visit every block target of a terminator mutably.
    pub fn for_each_target_mut(&mut self, mut f: impl FnMut(&mut BlockId)) {
        match self {
            InstKind::Br { target } => f(target),
            InstKind::CondBr {
                then_dest,
                else_dest,
                ..
            } => {
                f(then_dest);
                f(else_dest);
            }
            _ => {}
        }
    }
}

/// An instruction record. Live iff it appears in its block's list.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub kind: InstKind,
    /// Result value, if the instruction produces one.
    pub result: Option<ValueId>,
    /// Containing block; maintained by insertion and splitting.
    pub block: BlockId,
}

pub type InstId = Id<Instruction>;

// =============================================================================
// Blocks
// =============================================================================

/// A basic block: phi nodes first, terminator last.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub name: String,
    pub insts: Vec<InstId>,
}

pub type BlockId = Id<Block>;

// =============================================================================
// Function
// =============================================================================

/// Function-level attributes the pass reads and writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FnAttrs {
    /// The function contains SSR streams.
    pub ssr: bool,
    /// The function must not be inlined.
    pub no_inline: bool,
}

/// A function: arenas plus an entry block.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub entry: BlockId,
    pub params: Vec<ValueId>,
    pub attrs: FnAttrs,
    values: Arena<Value>,
    insts: Arena<Instruction>,
    blocks: Arena<Block>,
}

impl Function {
    /// Create an empty function. The entry block is set by the builder.
    pub fn new(name: impl Into<String>) -> Self {
        Function {
            name: name.into(),
            entry: BlockId::INVALID,
            params: Vec::new(),
            attrs: FnAttrs::default(),
            values: Arena::new(),
            insts: Arena::new(),
            blocks: Arena::new(),
        }
    }

    // --- values -------------------------------------------------------------

    /// Get a value by ID.
    #[inline]
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id]
    }

    /// Get the type of a value.
    #[inline]
    pub fn value_ty(&self, id: ValueId) -> Type {
        self.values[id].ty
    }

    /// Allocate a new value.
    pub fn add_value(&mut self, ty: Type, def: ValueDef) -> ValueId {
        self.values.alloc(Value { ty, def })
    }

    /// Number of values allocated so far.
    #[inline]
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    /// Get the constant payload of a value, if it is a constant.
    pub fn value_as_const(&self, id: ValueId) -> Option<Const> {
        match self.values[id].def {
            ValueDef::Const(c) => Some(c),
            _ => None,
        }
    }

    /// Get the integer payload of a constant value.
    pub fn value_as_const_int(&self, id: ValueId) -> Option<i64> {
        match self.value_as_const(id)? {
            Const::Int(v) => Some(v),
            Const::Bool(b) => Some(b as i64),
            Const::Float(_) => None,
        }
    }

    /// Get the defining instruction of a value, if it has one.
    pub fn value_def_inst(&self, id: ValueId) -> Option<InstId> {
        match self.values[id].def {
            ValueDef::Inst(i) => Some(i),
            _ => None,
        }
    }

    // --- instructions -------------------------------------------------------

    /// Get an instruction by ID.
    #[inline]
    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id]
    }

    /// Get a mutable instruction by ID.
    #[inline]
    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id]
    }

    /// Allocate an instruction record (not yet inserted into a block).
    pub(crate) fn alloc_inst(&mut self, kind: InstKind, result_ty: Option<Type>) -> InstId {
        let id = self.insts.alloc(Instruction {
            kind,
            result: None,
            block: BlockId::INVALID,
        });
        if let Some(ty) = result_ty {
            let v = self.values.alloc(Value {
                ty,
                def: ValueDef::Inst(id),
            });
            self.insts[id].result = Some(v);
        }
        id
    }

    /// Position of an instruction within its block.
    pub fn position(&self, id: InstId) -> (BlockId, usize) {
        let block = self.insts[id].block;
        let idx = self.blocks[block]
            .insts
            .iter()
            .position(|&i| i == id)
            .expect("instruction not in its block");
        (block, idx)
    }

    /// Remove an instruction from its block. The record stays allocated but
    /// becomes dead.
    pub fn erase_inst(&mut self, id: InstId) {
        let (block, idx) = self.position(id);
        self.blocks[block].insts.remove(idx);
        self.insts[id].block = BlockId::INVALID;
    }

    // --- blocks -------------------------------------------------------------

    /// Get a block by ID.
    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    /// Get a mutable block by ID.
    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id]
    }

    /// Create a new empty block.
    pub fn new_block(&mut self, name: impl Into<String>) -> BlockId {
        self.blocks.alloc(Block {
            name: name.into(),
            insts: Vec::new(),
        })
    }

    /// Number of blocks.
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Iterate over all blocks.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks.iter()
    }

    /// Terminator of a block, if the block is non-empty and properly ended.
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let last = *self.blocks[block].insts.last()?;
        self.insts[last].kind.is_terminator().then_some(last)
    }

    /// Successor blocks.
    pub fn successors(&self, block: BlockId) -> SmallVec<[BlockId; 2]> {
        match self.terminator(block) {
            Some(t) => self.insts[t].kind.successors(),
            None => SmallVec::new(),
        }
    }

    /// Predecessor blocks, by scanning all terminators.
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        let mut preds = Vec::new();
        for (b, _) in self.blocks.iter() {
            if self.successors(b).contains(&block) {
                preds.push(b);
            }
        }
        preds
    }

    /// First non-phi instruction of a block (the block's insertion point).
    pub fn first_insertion_point(&self, block: BlockId) -> InstId {
        *self.blocks[block]
            .insts
            .iter()
            .find(|&&i| !self.insts[i].kind.is_phi())
            .expect("block has a non-phi instruction")
    }

    /// Iterate over the phi instructions at the top of a block.
    pub fn phis(&self, block: BlockId) -> impl Iterator<Item = InstId> + '_ {
        self.blocks[block]
            .insts
            .iter()
            .copied()
            .take_while(|&i| self.insts[i].kind.is_phi())
    }

    // --- rewriting ----------------------------------------------------------

    /// Replace all uses of `from` with `to` across the whole function.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) {
        for id in self.insts.ids().collect::<Vec<_>>() {
            self.insts[id].kind.for_each_operand_mut(|v| {
                if *v == from {
                    *v = to;
                }
            });
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::FunctionBuilder;

    #[test]
    fn operand_visiting() {
        let mut b = FunctionBuilder::new("f", &[Type::I32, Type::I32]);
        let x = b.param(0);
        let y = b.param(1);
        let sum = b.iadd(x, y);
        b.ret(Some(sum));

        let func = b.finish();
        let (inst, _) = func
            .blocks()
            .flat_map(|(_, blk)| blk.insts.iter().copied())
            .map(|i| (i, func.inst(i)))
            .find(|(_, i)| matches!(i.kind, InstKind::Binary { .. }))
            .unwrap();

        let mut seen = Vec::new();
        func.inst(inst).kind.for_each_operand(|v| seen.push(v));
        assert_eq!(seen, vec![x, y]);
    }

    #[test]
    fn successors_of_cond_br() {
        let mut b = FunctionBuilder::new("f", &[Type::I1]);
        let c = b.param(0);
        let t = b.create_block("then");
        let e = b.create_block("else");
        b.cond_br(c, t, e);
        b.switch_to(t);
        b.ret(None);
        b.switch_to(e);
        b.ret(None);

        let func = b.finish();
        let succs = func.successors(func.entry);
        assert_eq!(succs.as_slice(), &[t, e]);
        assert!(func.successors(t).is_empty());
        assert_eq!(func.predecessors(t), vec![func.entry]);
    }

    #[test]
    fn replace_all_uses_rewrites_phis() {
        let mut b = FunctionBuilder::new("f", &[Type::I32]);
        let x = b.param(0);
        let next = b.create_block("next");
        b.br(next);
        b.switch_to(next);
        let entry = b.func().entry;
        let phi = b.phi(Type::I32, &[(x, entry)]);
        b.ret(Some(phi));

        let mut func = b.finish();
        let replacement = func.add_value(Type::I32, ValueDef::Const(Const::Int(7)));
        func.replace_all_uses(x, replacement);

        let phi_inst = func.phis(next).next().unwrap();
        match &func.inst(phi_inst).kind {
            InstKind::Phi { incoming } => assert_eq!(incoming[0].0, replacement),
            _ => unreachable!(),
        }
    }

    #[test]
    fn ssr_op_names() {
        assert_eq!(SsrOp::SetupBoundStride { dim: 2 }.name(), "setup_bound_stride_2d");
        assert_eq!(SsrOp::Pop.name(), "stream_pop");
        assert_eq!(SsrOp::Enable.name(), "stream_enable");
    }

    #[test]
    fn erase_inst_removes_from_block() {
        let mut b = FunctionBuilder::new("f", &[Type::Ptr]);
        let p = b.param(0);
        let v = b.load(p, Type::F64);
        let _ = v;
        b.ret(None);

        let mut func = b.finish();
        let load = func
            .blocks()
            .flat_map(|(_, blk)| blk.insts.iter().copied())
            .find(|&i| matches!(func.inst(i).kind, InstKind::Load { .. }))
            .unwrap();
        let entry = func.entry;
        let before = func.block(entry).insts.len();
        func.erase_inst(load);
        assert_eq!(func.block(entry).insts.len(), before - 1);
    }
}
