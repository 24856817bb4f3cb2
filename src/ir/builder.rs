//! IR construction.
//!
//! [`FunctionBuilder`] owns a function under construction and appends to a
//! current block; tests and fixtures use it. [`InstBuilder`] is a borrowing
//! insertion cursor positioned before an arbitrary instruction; the stream
//! inference pass uses it to materialize setup code in preheaders.

use smallvec::SmallVec;

use super::function::{
    BinOp, BlockId, CmpPred, Const, FBinOp, Function, InstId, InstKind, SsrOp, Type, ValueDef,
    ValueId,
};

// =============================================================================
// Insertion Cursor
// =============================================================================

/// An insertion cursor into a block of an existing function.
///
/// Each insertion goes at the cursor position and advances the cursor, so a
/// sequence of insertions appears in program order before the anchor point.
pub struct InstBuilder<'f> {
    func: &'f mut Function,
    block: BlockId,
    idx: usize,
}

impl<'f> InstBuilder<'f> {
    /// Position the cursor immediately before `inst`.
    pub fn before(func: &'f mut Function, inst: InstId) -> Self {
        let (block, idx) = func.position(inst);
        InstBuilder { func, block, idx }
    }

    /// Position the cursor at the end of `block`.
    pub fn at_end(func: &'f mut Function, block: BlockId) -> Self {
        let idx = func.block(block).insts.len();
        InstBuilder { func, block, idx }
    }

    /// The function being edited.
    #[inline]
    pub fn func(&mut self) -> &mut Function {
        self.func
    }

    /// The block the cursor is in.
    #[inline]
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Insert an instruction at the cursor and advance.
    pub fn insert(&mut self, kind: InstKind, result_ty: Option<Type>) -> Option<ValueId> {
        let id = self.func.alloc_inst(kind, result_ty);
        self.func.inst_mut(id).block = self.block;
        let block = self.func.block_mut(self.block);
        block.insts.insert(self.idx, id);
        self.idx += 1;
        self.func.inst(id).result
    }

    // --- constants (no insertion) -------------------------------------------

    /// Integer constant of the given type.
    pub fn const_int(&mut self, ty: Type, v: i64) -> ValueId {
        self.func.add_value(ty, ValueDef::Const(Const::Int(v)))
    }

    /// `I32` constant.
    pub fn const_i32(&mut self, v: i64) -> ValueId {
        self.const_int(Type::I32, v)
    }

    /// Pointer constant (a raw machine address).
    pub fn const_ptr(&mut self, addr: u64) -> ValueId {
        self.const_int(Type::Ptr, addr as i64)
    }

    /// Boolean constant.
    pub fn const_bool(&mut self, v: bool) -> ValueId {
        self.func.add_value(Type::I1, ValueDef::Const(Const::Bool(v)))
    }

    /// `F64` constant.
    pub fn const_f64(&mut self, v: f64) -> ValueId {
        self.func.add_value(Type::F64, ValueDef::Const(Const::Float(v)))
    }

    // --- arithmetic ---------------------------------------------------------

    fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.func.value_ty(lhs);
        self.insert(InstKind::Binary { op, lhs, rhs }, Some(ty))
            .expect("binary produces a value")
    }

    pub fn iadd(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Add, lhs, rhs)
    }

    pub fn isub(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Sub, lhs, rhs)
    }

    pub fn imul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Mul, lhs, rhs)
    }

    pub fn and_(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::And, lhs, rhs)
    }

    pub fn or_(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinOp::Or, lhs, rhs)
    }

    pub fn icmp(&mut self, pred: CmpPred, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.insert(InstKind::Cmp { pred, lhs, rhs }, Some(Type::I1))
            .expect("cmp produces a value")
    }

    fn fbinary(&mut self, op: FBinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.func.value_ty(lhs);
        self.insert(InstKind::FBinary { op, lhs, rhs }, Some(ty))
            .expect("fbinary produces a value")
    }

    pub fn fadd(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.fbinary(FBinOp::FAdd, lhs, rhs)
    }

    pub fn fmul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.fbinary(FBinOp::FMul, lhs, rhs)
    }

    // --- memory -------------------------------------------------------------

    pub fn ptr_add(&mut self, base: ValueId, offset: ValueId) -> ValueId {
        self.insert(InstKind::PtrAdd { base, offset }, Some(Type::Ptr))
            .expect("ptradd produces a value")
    }

    pub fn load(&mut self, addr: ValueId, ty: Type) -> ValueId {
        self.insert(InstKind::Load { addr }, Some(ty))
            .expect("load produces a value")
    }

    pub fn store(&mut self, addr: ValueId, value: ValueId) {
        self.insert(InstKind::Store { addr, value }, None);
    }

    // --- calls, asm, intrinsics ---------------------------------------------

    pub fn call(
        &mut self,
        callee: &str,
        args: &[ValueId],
        ret_ty: Option<Type>,
        callee_ssr: bool,
    ) -> Option<ValueId> {
        self.insert(
            InstKind::Call {
                callee: callee.into(),
                args: SmallVec::from_slice(args),
                callee_ssr,
            },
            ret_ty,
        )
    }

    pub fn inline_asm(&mut self, asm: &str) {
        self.insert(InstKind::InlineAsm { asm: asm.into() }, None);
    }

    /// Emit an SSR intrinsic. Only `Pop` produces a result.
    pub fn ssr(&mut self, op: SsrOp, args: &[ValueId]) -> Option<ValueId> {
        let inst = self.ssr_inst(op, args);
        self.func.inst(inst).result
    }

    /// Emit an SSR intrinsic and return the instruction itself.
    pub fn ssr_inst(&mut self, op: SsrOp, args: &[ValueId]) -> InstId {
        let result_ty = matches!(op, SsrOp::Pop).then_some(Type::F64);
        self.insert(
            InstKind::SsrIntrinsic {
                op,
                args: SmallVec::from_slice(args),
            },
            result_ty,
        );
        self.last_inserted()
    }

    /// The most recently inserted instruction.
    fn last_inserted(&self) -> InstId {
        self.func.block(self.block).insts[self.idx - 1]
    }

    // --- control flow -------------------------------------------------------

    pub fn phi(&mut self, ty: Type, incoming: &[(ValueId, BlockId)]) -> ValueId {
        self.insert(
            InstKind::Phi {
                incoming: SmallVec::from_slice(incoming),
            },
            Some(ty),
        )
        .expect("phi produces a value")
    }

    /// Add an incoming edge to an existing phi; used to close loop phis
    /// after the latch value becomes available.
    pub fn add_phi_incoming(&mut self, phi: ValueId, value: ValueId, block: BlockId) {
        let inst = self.func.value_def_inst(phi).expect("phi value");
        match &mut self.func.inst_mut(inst).kind {
            InstKind::Phi { incoming } => incoming.push((value, block)),
            _ => panic!("value is not a phi"),
        }
    }

    pub fn br(&mut self, target: BlockId) {
        self.insert(InstKind::Br { target }, None);
    }

    pub fn cond_br(&mut self, cond: ValueId, then_dest: BlockId, else_dest: BlockId) {
        self.insert(
            InstKind::CondBr {
                cond,
                then_dest,
                else_dest,
            },
            None,
        );
    }

    pub fn ret(&mut self, value: Option<ValueId>) {
        self.insert(InstKind::Ret { value }, None);
    }
}

// =============================================================================
// Function Builder
// =============================================================================

/// Builds a function from scratch, appending to a current block.
pub struct FunctionBuilder {
    func: Function,
    current: BlockId,
}

impl FunctionBuilder {
    /// Create a function with the given parameter types and an `entry` block.
    pub fn new(name: impl Into<String>, params: &[Type]) -> Self {
        let mut func = Function::new(name);
        for (i, &ty) in params.iter().enumerate() {
            let v = func.add_value(ty, ValueDef::Param(i as u32));
            func.params.push(v);
        }
        let entry = func.new_block("entry");
        func.entry = entry;
        FunctionBuilder {
            func,
            current: entry,
        }
    }

    /// Get the `i`-th parameter value.
    pub fn param(&self, i: usize) -> ValueId {
        self.func.params[i]
    }

    /// Create a new (empty, unpositioned) block.
    pub fn create_block(&mut self, name: impl Into<String>) -> BlockId {
        self.func.new_block(name)
    }

    /// Make `block` the current insertion block.
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    /// The block currently being appended to.
    pub fn current_block(&self) -> BlockId {
        self.current
    }

    /// Access the function under construction.
    pub fn func(&self) -> &Function {
        &self.func
    }

    /// Finish construction.
    pub fn finish(self) -> Function {
        self.func
    }

    /// Cursor at the end of the current block.
    pub fn cursor(&mut self) -> InstBuilder<'_> {
        InstBuilder::at_end(&mut self.func, self.current)
    }

    // Appending conveniences; all delegate to the cursor.

    pub fn const_int(&mut self, ty: Type, v: i64) -> ValueId {
        self.cursor().const_int(ty, v)
    }

    pub fn const_i32(&mut self, v: i64) -> ValueId {
        self.cursor().const_i32(v)
    }

    pub fn const_ptr(&mut self, addr: u64) -> ValueId {
        self.cursor().const_ptr(addr)
    }

    pub fn const_bool(&mut self, v: bool) -> ValueId {
        self.cursor().const_bool(v)
    }

    pub fn const_f64(&mut self, v: f64) -> ValueId {
        self.cursor().const_f64(v)
    }

    pub fn iadd(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.cursor().iadd(lhs, rhs)
    }

    pub fn isub(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.cursor().isub(lhs, rhs)
    }

    pub fn imul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.cursor().imul(lhs, rhs)
    }

    pub fn icmp(&mut self, pred: CmpPred, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.cursor().icmp(pred, lhs, rhs)
    }

    pub fn fadd(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.cursor().fadd(lhs, rhs)
    }

    pub fn fmul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.cursor().fmul(lhs, rhs)
    }

    pub fn ptr_add(&mut self, base: ValueId, offset: ValueId) -> ValueId {
        self.cursor().ptr_add(base, offset)
    }

    pub fn load(&mut self, addr: ValueId, ty: Type) -> ValueId {
        self.cursor().load(addr, ty)
    }

    pub fn store(&mut self, addr: ValueId, value: ValueId) {
        self.cursor().store(addr, value)
    }

    pub fn call(
        &mut self,
        callee: &str,
        args: &[ValueId],
        ret_ty: Option<Type>,
        callee_ssr: bool,
    ) -> Option<ValueId> {
        self.cursor().call(callee, args, ret_ty, callee_ssr)
    }

    pub fn inline_asm(&mut self, asm: &str) {
        self.cursor().inline_asm(asm)
    }

    pub fn ssr(&mut self, op: SsrOp, args: &[ValueId]) -> Option<ValueId> {
        self.cursor().ssr(op, args)
    }

    pub fn phi(&mut self, ty: Type, incoming: &[(ValueId, BlockId)]) -> ValueId {
        self.cursor().phi(ty, incoming)
    }

    pub fn add_phi_incoming(&mut self, phi: ValueId, value: ValueId, block: BlockId) {
        self.cursor().add_phi_incoming(phi, value, block)
    }

    pub fn br(&mut self, target: BlockId) {
        self.cursor().br(target)
    }

    pub fn cond_br(&mut self, cond: ValueId, then_dest: BlockId, else_dest: BlockId) {
        self.cursor().cond_br(cond, then_dest, else_dest)
    }

    pub fn ret(&mut self, value: Option<ValueId>) {
        self.cursor().ret(value)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_straight_line() {
        let mut b = FunctionBuilder::new("f", &[Type::I32]);
        let x = b.param(0);
        let one = b.const_i32(1);
        let y = b.iadd(x, one);
        b.ret(Some(y));

        let func = b.finish();
        let entry = func.entry;
        // const values do not occupy instruction slots
        assert_eq!(func.block(entry).insts.len(), 2);
        assert!(func.terminator(entry).is_some());
    }

    #[test]
    fn cursor_inserts_before_anchor() {
        let mut b = FunctionBuilder::new("f", &[Type::I32]);
        let x = b.param(0);
        b.ret(Some(x));
        let mut func = b.finish();

        let term = func.terminator(func.entry).unwrap();
        let mut cur = InstBuilder::before(&mut func, term);
        let c = cur.const_i32(3);
        let s = cur.iadd(x, c);
        let s2 = cur.iadd(s, c);
        let _ = s2;

        let entry = func.entry;
        let insts = &func.block(entry).insts;
        assert_eq!(insts.len(), 3);
        // terminator is still last
        assert!(func.inst(*insts.last().unwrap()).kind.is_terminator());
    }

    #[test]
    fn pop_yields_f64() {
        let mut b = FunctionBuilder::new("f", &[]);
        let dm = b.const_i32(0);
        let v = b.ssr(SsrOp::Pop, &[dm]).unwrap();
        b.ret(None);
        assert_eq!(b.func().value_ty(v), Type::F64);
    }

    #[test]
    fn enable_has_no_result() {
        let mut b = FunctionBuilder::new("f", &[]);
        assert!(b.ssr(SsrOp::Enable, &[]).is_none());
        b.ret(None);
    }
}
