//! Convenience builder for constructing function bodies.

use crate::ty::Ty;

use super::{
    BinOp, BlockId, Body, Callee, CastOp, Constant, FuncId, GlobalId, IcmpPred, Inst, InstKind,
    Module, Phi, SwitchTarget, Terminator, ValueData, ValueId, ValueKind,
};

/// Builds a body for a previously declared function, one block at a time.
///
/// Emit methods append to the current block and allocate typed result
/// values; `finish` installs the body on the function.
pub struct FunctionBuilder<'a> {
    module: &'a mut Module,
    func: FuncId,
    body: Body,
    current: BlockId,
}

impl<'a> FunctionBuilder<'a> {
    pub fn new(module: &'a mut Module, func: FuncId) -> Self {
        let mut body = Body::new(&module.function(func).sig);
        let entry = body.make_block();
        Self {
            module,
            func,
            body,
            current: entry,
        }
    }

    pub fn module(&self) -> &Module {
        self.module
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn make_block(&mut self) -> BlockId {
        self.body.make_block()
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn param(&self, index: usize) -> ValueId {
        self.body.param(index)
    }

    //
    // Constants
    //

    pub fn int_const(&mut self, value: u64, width: u8) -> ValueId {
        self.body.int_const(value, width)
    }

    pub fn null_ptr(&mut self, pointee: Ty) -> ValueId {
        self.body.const_value(Constant::NullPtr, pointee.ptr_to())
    }

    pub fn global_addr(&mut self, global: GlobalId) -> ValueId {
        let ty = self.module.global(global).ty.clone().ptr_to();
        self.body.const_value(Constant::Global(global), ty)
    }

    pub fn func_addr(&mut self, func: FuncId) -> ValueId {
        let sig = &self.module.function(func).sig;
        let ty = Ty::Func {
            params: sig.params.clone(),
            ret: Box::new(sig.ret.clone()),
        }
        .ptr_to();
        self.body.const_value(Constant::Function(func), ty)
    }

    /// Constant address computation; the constant-expression form of `gep`.
    pub fn elem_ptr_const(&mut self, base: ValueId, indices: Vec<ValueId>) -> ValueId {
        let ty = self.body.gep_result_ty(base, &indices);
        self.body.const_value(Constant::ElemPtr { base, indices }, ty)
    }

    /// Constant pointer bit cast; the constant-expression form of `bitcast`.
    pub fn ptr_cast_const(&mut self, operand: ValueId, to: Ty) -> ValueId {
        debug_assert!(self.body.value_ty(operand).is_ptr() && to.is_ptr());
        self.body.const_value(Constant::PtrCast { operand }, to)
    }

    //
    // Instructions
    //

    fn push(&mut self, inst: Inst) {
        self.body.block_mut(self.current).insts.push(inst);
    }

    fn emit(&mut self, ty: Ty, kind: InstKind) -> ValueId {
        let result = self.body.alloc_value(ValueData {
            ty,
            kind: ValueKind::Inst,
        });
        self.push(Inst {
            result: Some(result),
            kind,
        });
        result
    }

    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.body.value_ty(lhs).clone();
        self.emit(ty, InstKind::Binary { op, lhs, rhs })
    }

    pub fn icmp(&mut self, pred: IcmpPred, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.emit(Ty::Int(1), InstKind::Icmp { pred, lhs, rhs })
    }

    pub fn select(&mut self, cond: ValueId, then_val: ValueId, else_val: ValueId) -> ValueId {
        let ty = self.body.value_ty(then_val).clone();
        self.emit(
            ty,
            InstKind::Select {
                cond,
                then_val,
                else_val,
            },
        )
    }

    /// Stack slot for a single object of type `ty`.
    pub fn alloca(&mut self, ty: Ty) -> ValueId {
        let count = self.int_const(1, 32);
        self.alloca_array(ty, count)
    }

    pub fn alloca_array(&mut self, ty: Ty, count: ValueId) -> ValueId {
        self.emit(ty.clone().ptr_to(), InstKind::Alloca { ty, count })
    }

    pub fn load(&mut self, ptr: ValueId) -> ValueId {
        let ty = self
            .body
            .value_ty(ptr)
            .pointee()
            .expect("load requires a pointer operand")
            .clone();
        self.emit(ty, InstKind::Load { ptr })
    }

    pub fn store(&mut self, value: ValueId, ptr: ValueId) {
        self.push(Inst {
            result: None,
            kind: InstKind::Store { value, ptr },
        });
    }

    pub fn gep(&mut self, base: ValueId, indices: Vec<ValueId>) -> ValueId {
        let ty = self.body.gep_result_ty(base, &indices);
        self.emit(ty, InstKind::Gep { base, indices })
    }

    pub fn cast(&mut self, op: CastOp, operand: ValueId, to: Ty) -> ValueId {
        self.emit(
            to.clone(),
            InstKind::Cast {
                op,
                operand,
                to,
            },
        )
    }

    pub fn call(&mut self, callee: FuncId, args: Vec<ValueId>) -> Option<ValueId> {
        let ret = self.module.function(callee).sig.ret.clone();
        let kind = InstKind::Call {
            callee: Callee::Direct(callee),
            args,
        };
        if ret == Ty::Void {
            self.push(Inst { result: None, kind });
            None
        } else {
            Some(self.emit(ret, kind))
        }
    }

    pub fn call_indirect(&mut self, callee: ValueId, args: Vec<ValueId>, ret: Ty) -> Option<ValueId> {
        let kind = InstKind::Call {
            callee: Callee::Indirect(callee),
            args,
        };
        if ret == Ty::Void {
            self.push(Inst { result: None, kind });
            None
        } else {
            Some(self.emit(ret, kind))
        }
    }

    pub fn extract_value(&mut self, agg: ValueId, index: u32) -> ValueId {
        let ty = match self.body.value_ty(agg) {
            Ty::Struct(fields) => fields[index as usize].clone(),
            Ty::Array(elem, _) => (**elem).clone(),
            other => panic!("cannot extract from {other}"),
        };
        self.emit(ty, InstKind::ExtractValue { agg, index })
    }

    pub fn phi(&mut self, ty: Ty, incoming: Vec<(ValueId, BlockId)>) -> ValueId {
        let result = self.body.alloc_value(ValueData {
            ty,
            kind: ValueKind::Phi,
        });
        self.body
            .block_mut(self.current)
            .phis
            .push(Phi { result, incoming });
        result
    }

    //
    // Terminators
    //

    fn terminate(&mut self, terminator: Terminator) {
        self.body.block_mut(self.current).terminator = terminator;
    }

    pub fn ret(&mut self, value: Option<ValueId>) {
        self.terminate(Terminator::Return { value });
    }

    pub fn goto(&mut self, target: BlockId) {
        self.terminate(Terminator::Goto { target });
    }

    pub fn branch(&mut self, cond: ValueId, then_bb: BlockId, else_bb: BlockId) {
        self.terminate(Terminator::Branch {
            cond,
            then_bb,
            else_bb,
        });
    }

    pub fn switch(&mut self, discr: ValueId, targets: Vec<SwitchTarget>, default: BlockId) {
        self.terminate(Terminator::Switch {
            discr,
            targets,
            default,
        });
    }

    pub fn unreachable(&mut self) {
        self.terminate(Terminator::Unreachable);
    }

    /// Installs the built body on the function.
    pub fn finish(self) {
        self.module.function_mut(self.func).body = Some(self.body);
    }
}
