//! The per-function expression builder.
//!
//! Walks a function in program order and surrounds every supported
//! instruction with the runtime calls that compute the symbolic expression
//! of its result. The concrete instructions are never moved or changed;
//! everything here only inserts.

use mir::{
    BinOp, BlockId, Body, Callee, CastOp, Constant, FuncId, GlobalId, Inst, InstKind, Intrinsic,
    Module, Phi, Terminator, Ty, ValueData, ValueId, ValueKind,
};
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::expr_ty::expression_ty;
use crate::runtime::{BUILD_VARIABLE, RUNTIME_PREFIX, RuntimeFunctions};

/// Position in a body; insertions go in front of `insts[index]` and advance
/// the point past the inserted instruction.
#[derive(Debug, Clone, Copy)]
struct InsertPt {
    block: BlockId,
    index: usize,
}

/// A shadow φ whose incoming expressions are filled in after the block walk,
/// once every incoming value has had a chance to be defined.
struct PendingPhi {
    block: BlockId,
    /// Index of the shadow φ in its block's φ list.
    shadow: usize,
    incoming: Vec<(ValueId, BlockId)>,
}

pub(crate) struct Symbolizer<'a> {
    module: &'a Module,
    runtime: &'a RuntimeFunctions,
    /// Module globals to their expression siblings.
    global_exprs: &'a FxHashMap<GlobalId, GlobalId>,
    body: &'a mut Body,
    func_name: &'a str,
    /// Values to the values holding their symbolic expressions.
    ///
    /// For pointers obtained from stack slots or globals the stored value is
    /// not an expression handle but a pointer into expression memory.
    exprs: FxHashMap<ValueId, ValueId>,
    /// Expression builders hoisted to the top of the entry block.
    entry_prelude: Vec<Inst>,
    pending_phis: Vec<PendingPhi>,
}

impl<'a> Symbolizer<'a> {
    pub(crate) fn new(
        module: &'a Module,
        runtime: &'a RuntimeFunctions,
        global_exprs: &'a FxHashMap<GlobalId, GlobalId>,
        body: &'a mut Body,
        func_name: &'a str,
    ) -> Self {
        Self {
            module,
            runtime,
            global_exprs,
            body,
            func_name,
            exprs: FxHashMap::default(),
            entry_prelude: Vec::new(),
            pending_phis: Vec::new(),
        }
    }

    pub(crate) fn run(mut self) {
        // Shadow φs are created up front with empty edges so that values
        // merged across back edges resolve while their defining blocks are
        // still being walked; the edges are filled in afterwards.
        for idx in 0..self.body.blocks.len() {
            self.create_shadow_phis(BlockId(idx as u32));
        }
        for idx in 0..self.body.blocks.len() {
            let block = BlockId(idx as u32);
            self.process_insts(block);
            self.process_terminator(block);
        }
        self.fill_pending_phis();

        // Hoisted constant builders go in front of everything else in the
        // entry block, where they dominate all their uses.
        if !self.entry_prelude.is_empty() {
            let entry = self.body.entry;
            let insts = &mut self.body.block_mut(entry).insts;
            let mut spliced = std::mem::take(&mut self.entry_prelude);
            spliced.extend(std::mem::take(insts));
            *insts = spliced;
        }
    }

    fn create_shadow_phis(&mut self, block: BlockId) {
        let original = self.body.block(block).phis.len();
        for phi_idx in 0..original {
            let phi = &self.body.block(block).phis[phi_idx];
            let (result, incoming) = (phi.result, phi.incoming.clone());
            let shadow_result = self.body.alloc_value(ValueData {
                ty: Ty::byte_ptr(),
                kind: ValueKind::Phi,
            });
            let shadow = self.body.block(block).phis.len();
            self.body.block_mut(block).phis.push(Phi {
                result: shadow_result,
                incoming: Vec::new(),
            });
            self.exprs.insert(result, shadow_result);
            self.pending_phis.push(PendingPhi {
                block,
                shadow,
                incoming,
            });
        }
    }

    fn fill_pending_phis(&mut self) {
        let pending = std::mem::take(&mut self.pending_phis);
        for phi in pending {
            for (value, pred) in phi.incoming {
                // Whatever code the expression needs has to live in the
                // predecessor: φs cannot be preceded by ordinary code.
                let mut at = self.block_end(pred);
                let expr = self.resolve(value, &mut at);
                self.body.block_mut(phi.block).phis[phi.shadow]
                    .incoming
                    .push((expr, pred));
            }
        }
    }

    fn process_insts(&mut self, block: BlockId) {
        let mut at = InsertPt { block, index: 0 };
        while at.index < self.body.block(block).insts.len() {
            let inst = self.body.block(block).insts[at.index].clone();
            self.visit_inst(&inst, &mut at);
            at.index += 1;
        }
    }

    fn process_terminator(&mut self, block: BlockId) {
        let terminator = self.body.block(block).terminator.clone();
        let mut at = self.block_end(block);
        match terminator {
            Terminator::Return { value: Some(value) } => {
                let expr = self.resolve(value, &mut at);
                self.emit_call_void(&mut at, self.runtime.set_return_expression, vec![expr]);
            }
            Terminator::Branch { cond, .. } => {
                // Record which way the branch goes; the runtime pairs the
                // expression with the concrete outcome.
                let expr = self.resolve(cond, &mut at);
                self.emit_call_void(
                    &mut at,
                    self.runtime.push_path_constraint,
                    vec![expr, cond],
                );
            }
            Terminator::Switch { .. } => {
                warn!("unknown terminator in `{}`: switch", self.func_name);
            }
            Terminator::Return { value: None }
            | Terminator::Goto { .. }
            | Terminator::Unreachable => {}
        }
    }

    fn visit_inst(&mut self, inst: &Inst, at: &mut InsertPt) {
        match &inst.kind {
            InstKind::Binary { op, lhs, rhs } => {
                let handler = self.runtime.binary_op_handler(*op);
                let lhs = self.resolve(*lhs, at);
                let rhs = self.resolve(*rhs, at);
                let expr = self.emit_call(at, handler, vec![lhs, rhs]);
                self.exprs.insert(def(inst), expr);
            }
            InstKind::Icmp { pred, lhs, rhs } => {
                let handler = self.runtime.comparison_handler(*pred);
                let lhs = self.resolve(*lhs, at);
                let rhs = self.resolve(*rhs, at);
                let expr = self.emit_call(at, handler, vec![lhs, rhs]);
                self.exprs.insert(def(inst), expr);
            }
            InstKind::Select {
                cond,
                then_val,
                else_val,
            } => {
                // A select realizes a control decision even without a
                // branch, so its condition goes on the path first; the
                // expression then mirrors the concrete choice.
                let cond_expr = self.resolve(*cond, at);
                self.emit_call_void(
                    at,
                    self.runtime.push_path_constraint,
                    vec![cond_expr, *cond],
                );
                let then_expr = self.resolve(*then_val, at);
                let else_expr = self.resolve(*else_val, at);
                let ty = self.body.value_ty(then_expr).clone();
                let expr = self.emit(
                    at,
                    ty,
                    InstKind::Select {
                        cond: *cond,
                        then_val: then_expr,
                        else_val: else_expr,
                    },
                );
                self.exprs.insert(def(inst), expr);
            }
            InstKind::Alloca { ty, count } => {
                if self.body.const_int_value(*count) != Some(1) {
                    warn!(
                        "stack-allocated arrays are not supported in `{}`",
                        self.func_name
                    );
                    return;
                }
                let Some(expr_ty) = expression_ty(ty) else {
                    warn!(
                        "cannot determine the expression type for {ty} in `{}`",
                        self.func_name
                    );
                    return;
                };
                // A sibling slot holds the expressions for whatever the
                // original slot holds.
                let expr = self.emit(
                    at,
                    expr_ty.clone().ptr_to(),
                    InstKind::Alloca {
                        ty: expr_ty,
                        count: *count,
                    },
                );
                self.exprs.insert(def(inst), expr);
            }
            InstKind::Load { ptr } => {
                let ptr_expr = self.resolve(*ptr, at);
                let pointee = self
                    .body
                    .value_ty(ptr_expr)
                    .pointee()
                    .expect("expression for a load address must be a pointer")
                    .clone();
                let expr = self.emit(at, pointee, InstKind::Load { ptr: ptr_expr });
                self.exprs.insert(def(inst), expr);
            }
            InstKind::Store { value, ptr } => {
                let value_expr = self.resolve(*value, at);
                let ptr_expr = self.resolve(*ptr, at);
                self.insert(
                    at,
                    Inst {
                        result: None,
                        kind: InstKind::Store {
                            value: value_expr,
                            ptr: ptr_expr,
                        },
                    },
                );
            }
            InstKind::Gep { base, indices } => {
                let expr = self.handle_gep(*base, indices, at);
                self.exprs.insert(def(inst), expr);
            }
            InstKind::Cast { op, operand, to } => self.visit_cast(inst, *op, *operand, to, at),
            InstKind::Call { callee, args } => self.visit_call(inst, callee, args, at),
            other => {
                warn!("unknown instruction in `{}`: {other:?}", self.func_name);
            }
        }
    }

    fn visit_cast(&mut self, inst: &Inst, op: CastOp, operand: ValueId, to: &Ty, at: &mut InsertPt) {
        match op {
            CastOp::Bitcast => {
                // Pointer-to-pointer casts don't change the pointer value,
                // so the expression carries over unchanged.
                assert!(
                    self.body.value_ty(operand).is_ptr() && to.is_ptr(),
                    "unhandled non-pointer bit cast"
                );
                let expr = self.resolve(operand, at);
                self.exprs.insert(def(inst), expr);
            }
            CastOp::Trunc => {
                let bits = to.int_width().expect("trunc target must be an integer");
                let expr = self.resolve(operand, at);
                let bits = self.body.int_const(bits as u64, 8);
                let expr = self.emit_call(at, self.runtime.build_trunc, vec![expr, bits]);
                self.exprs.insert(def(inst), expr);
            }
            CastOp::Sext | CastOp::Zext => {
                let src_bits = self
                    .body
                    .value_ty(operand)
                    .int_width()
                    .expect("extend source must be an integer");
                if src_bits == 1 {
                    // i1 is a Boolean, not a one-bit vector; the solver keeps
                    // Booleans as such, so no widening call is needed.
                    let expr = self.resolve(operand, at);
                    self.exprs.insert(def(inst), expr);
                    return;
                }
                let dest_bits = to.int_width().expect("extend target must be an integer");
                let handler = match op {
                    CastOp::Sext => self.runtime.build_sext,
                    CastOp::Zext => self.runtime.build_zext,
                    _ => unreachable!("checked above"),
                };
                let expr = self.resolve(operand, at);
                let added = self.body.int_const((dest_bits - src_bits) as u64, 8);
                let expr = self.emit_call(at, handler, vec![expr, added]);
                self.exprs.insert(def(inst), expr);
            }
            CastOp::PtrToInt | CastOp::IntToPtr => {
                warn!(
                    "unhandled cast instruction in `{}`: {}",
                    self.func_name,
                    op.name()
                );
            }
        }
    }

    fn visit_call(&mut self, inst: &Inst, callee: &Callee, args: &[ValueId], at: &mut InsertPt) {
        let callee = match callee {
            Callee::Indirect(_) => {
                warn!(
                    "losing track of symbolic expressions at indirect call in `{}`",
                    self.func_name
                );
                return;
            }
            Callee::Direct(func) => *func,
        };
        let data = self.module.function(callee);

        if data.name.starts_with(RUNTIME_PREFIX) && data.name != BUILD_VARIABLE {
            return;
        }

        if let Some(intrinsic) = data.intrinsic {
            match intrinsic {
                Intrinsic::LifetimeStart | Intrinsic::LifetimeEnd => {}
                Intrinsic::Memcpy => {
                    // Both regions must have expression state before the
                    // runtime copies it; args are (dst, src, len).
                    self.resolve(args[0], at);
                    self.resolve(args[1], at);
                    self.emit_call_void(
                        at,
                        self.runtime.memcpy,
                        vec![args[0], args[1], args[2]],
                    );
                }
                _ => {
                    warn!(
                        "unhandled intrinsic `{}` in `{}`",
                        data.name, self.func_name
                    );
                }
            }
            return;
        }

        for (index, &arg) in args.iter().enumerate() {
            let expr = self.resolve(arg, at);
            let expr = self.cast_to_handle(expr, at);
            let index = self.body.int_const(index as u64, 8);
            self.emit_call_void(
                at,
                self.runtime.set_parameter_expression,
                vec![index, expr],
            );
        }
        if let Some(result) = inst.result {
            // The pickup goes right after the call; the callee will have
            // stored the return expression by then (or cleared it).
            let mut after = InsertPt {
                block: at.block,
                index: at.index + 1,
            };
            let expr = self.emit_call(&mut after, self.runtime.get_return_expression, vec![]);
            self.exprs.insert(result, expr);
        }
    }

    /// Address computations mirror the pointer arithmetic on the expression
    /// side: struct fields contribute their constant offsets, array and
    /// pointer steps multiply a possibly-symbolic index by the element size.
    fn handle_gep(&mut self, base: ValueId, indices: &[ValueId], at: &mut InsertPt) -> ValueId {
        let layout = self.module.layout;
        let ptr_bits = layout.ptr_bits as u64;
        let mut expr = self.resolve(base, at);
        let mut cur = self
            .body
            .value_ty(base)
            .pointee()
            .expect("address computation requires a pointer base")
            .clone();

        for (step, &index) in indices.iter().enumerate() {
            if step > 0 && let Ty::Struct(fields) = &cur {
                let fields = fields.clone();
                // Struct members can only be addressed with constants.
                let member = self
                    .body
                    .const_int_value(index)
                    .expect("struct fields are indexed by constant integers")
                    as usize;
                let offset = layout.field_offset(&fields, member);
                let offset_const = self.body.int_const(offset, 64);
                let bits = self.body.int_const(ptr_bits, 8);
                let offset_expr = self.emit_call(
                    at,
                    self.runtime.build_integer,
                    vec![offset_const, bits],
                );
                expr = self.emit_call(
                    at,
                    self.runtime.binary_op_handler(BinOp::Add),
                    vec![expr, offset_expr],
                );
                cur = fields[member].clone();
                continue;
            }

            let elem = if step == 0 {
                // The first index steps over the base pointer itself.
                cur.clone()
            } else {
                match &cur {
                    Ty::Array(elem, _) => (**elem).clone(),
                    other => panic!("cannot compute an element offset into {other}"),
                }
            };
            if step > 0 {
                cur = elem.clone();
            }
            if self.body.const_int_value(index) == Some(0) {
                // An index of zero performs no calculation.
                continue;
            }
            let elem_size = layout.alloc_size(&elem);
            let size_const = self.body.int_const(elem_size, 64);
            let bits = self.body.int_const(ptr_bits, 8);
            let size_expr =
                self.emit_call(at, self.runtime.build_integer, vec![size_const, bits]);
            let index_expr = self.resolve(index, at);
            let offset = self.emit_call(
                at,
                self.runtime.binary_op_handler(BinOp::Mul),
                vec![index_expr, size_expr],
            );
            expr = self.emit_call(
                at,
                self.runtime.binary_op_handler(BinOp::Add),
                vec![expr, offset],
            );
        }
        expr
    }

    /// Loads or creates the expression value for `value`, inserting any
    /// needed code at `at`. First matching rule wins.
    fn resolve(&mut self, value: ValueId, at: &mut InsertPt) -> ValueId {
        if let Some(&expr) = self.exprs.get(&value) {
            return expr;
        }
        let kind = self.body.value(value).kind.clone();
        let expr = match kind {
            ValueKind::Const(Constant::Int { value: int, width }) => {
                // A constant may be referenced anywhere in the function, so
                // its expression is built once at the top of the entry block.
                let wide = self.body.int_const(int, 64);
                let bits = self.body.int_const(width as u64, 8);
                self.emit_entry_call(self.runtime.build_integer, vec![wide, bits])
            }
            ValueKind::Const(Constant::NullPtr) => {
                // Never cached: the null pointer shows up in unrelated
                // corners of a function, and a fresh call per use is simpler
                // than a function-wide live range.
                return self.emit_call(at, self.runtime.build_null_pointer, vec![]);
            }
            ValueKind::Param { index } => {
                let index = self.body.int_const(index as u64, 8);
                self.emit_call(at, self.runtime.get_parameter_expression, vec![index])
            }
            ValueKind::Const(Constant::Global(global)) => {
                // Memory accesses through the global must see the expression
                // slots the module constructor filled in.
                let shadow = *self
                    .global_exprs
                    .get(&global)
                    .expect("every module global has an expression sibling");
                let ty = self.module.global(shadow).ty.clone().ptr_to();
                self.body.const_value(Constant::Global(shadow), ty)
            }
            ValueKind::Const(Constant::Function(_)) => {
                let int_ptr = self.module.layout.int_ptr_ty();
                let addr = self.emit(
                    at,
                    int_ptr.clone(),
                    InstKind::Cast {
                        op: CastOp::PtrToInt,
                        operand: value,
                        to: int_ptr,
                    },
                );
                let bits = self.body.int_const(self.module.layout.ptr_bits as u64, 8);
                self.emit_call(at, self.runtime.build_integer, vec![addr, bits])
            }
            ValueKind::Const(Constant::ElemPtr { base, indices }) => {
                self.handle_gep(base, &indices, at)
            }
            ValueKind::Const(Constant::PtrCast { operand }) => self.resolve(operand, at),
            ValueKind::Inst | ValueKind::Phi => {
                panic!(
                    "no symbolic expression for value {value:?} in `{}`",
                    self.func_name
                );
            }
        };
        self.exprs.insert(value, expr);
        expr
    }

    /// Expressions passed through the call ABI travel as opaque handles.
    fn cast_to_handle(&mut self, expr: ValueId, at: &mut InsertPt) -> ValueId {
        let ty = self.body.value_ty(expr);
        if *ty == Ty::byte_ptr() || !ty.is_ptr() {
            return expr;
        }
        self.emit(
            at,
            Ty::byte_ptr(),
            InstKind::Cast {
                op: CastOp::Bitcast,
                operand: expr,
                to: Ty::byte_ptr(),
            },
        )
    }

    //
    // Insertion helpers
    //

    fn block_end(&self, block: BlockId) -> InsertPt {
        InsertPt {
            block,
            index: self.body.block(block).insts.len(),
        }
    }

    fn insert(&mut self, at: &mut InsertPt, inst: Inst) {
        self.body.block_mut(at.block).insts.insert(at.index, inst);
        at.index += 1;
    }

    fn emit(&mut self, at: &mut InsertPt, ty: Ty, kind: InstKind) -> ValueId {
        let result = self.body.alloc_value(ValueData {
            ty,
            kind: ValueKind::Inst,
        });
        self.insert(
            at,
            Inst {
                result: Some(result),
                kind,
            },
        );
        result
    }

    fn emit_call(&mut self, at: &mut InsertPt, callee: FuncId, args: Vec<ValueId>) -> ValueId {
        let ret = self.module.function(callee).sig.ret.clone();
        self.emit(
            at,
            ret,
            InstKind::Call {
                callee: Callee::Direct(callee),
                args,
            },
        )
    }

    fn emit_call_void(&mut self, at: &mut InsertPt, callee: FuncId, args: Vec<ValueId>) {
        self.insert(
            at,
            Inst {
                result: None,
                kind: InstKind::Call {
                    callee: Callee::Direct(callee),
                    args,
                },
            },
        );
    }

    fn emit_entry_call(&mut self, callee: FuncId, args: Vec<ValueId>) -> ValueId {
        let ret = self.module.function(callee).sig.ret.clone();
        let result = self.body.alloc_value(ValueData {
            ty: ret,
            kind: ValueKind::Inst,
        });
        self.entry_prelude.push(Inst {
            result: Some(result),
            kind: InstKind::Call {
                callee: Callee::Direct(callee),
                args,
            },
        });
        result
    }
}

fn def(inst: &Inst) -> ValueId {
    inst.result.expect("instruction defines a value")
}
