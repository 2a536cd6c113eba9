//! Declarations of the symbolic runtime the instrumented program links
//! against.
//!
//! The names and signatures here are a fixed ABI: the final executable must
//! link an object that provides these symbols.

use mir::{BinOp, FuncId, IcmpPred, Module, Signature, Ty};

/// Reserved prefix of the runtime. Calls to functions with this prefix are
/// the instrumentation itself and must not be re-instrumented.
pub const RUNTIME_PREFIX: &str = "_sym_";

/// The one runtime function whose calls mark symbolic inputs; they are
/// preserved and treated like user calls.
pub const BUILD_VARIABLE: &str = "_sym_build_variable";

/// Handles to the runtime functions, declared once per module.
#[derive(Debug, Clone)]
pub struct RuntimeFunctions {
    pub initialize: FuncId,
    pub build_integer: FuncId,
    pub build_null_pointer: FuncId,
    pub build_neg: FuncId,
    pub build_sext: FuncId,
    pub build_zext: FuncId,
    pub build_trunc: FuncId,
    pub push_path_constraint: FuncId,
    pub get_parameter_expression: FuncId,
    pub set_parameter_expression: FuncId,
    pub set_return_expression: FuncId,
    pub get_return_expression: FuncId,
    pub initialize_array_8: FuncId,
    pub initialize_array_16: FuncId,
    pub initialize_array_32: FuncId,
    pub initialize_array_64: FuncId,
    pub memcpy: FuncId,
    /// Expression builders per binary operator, indexed by `BinOp as usize`.
    binary_op_handlers: [FuncId; BinOp::COUNT],
    /// Expression builders per comparison predicate, indexed by
    /// `IcmpPred as usize`.
    comparison_handlers: [FuncId; IcmpPred::COUNT],
}

impl RuntimeFunctions {
    /// Declares the whole runtime ABI on `module` and builds the operator
    /// dispatch tables.
    pub fn declare(module: &mut Module) -> Self {
        let ptr = Ty::byte_ptr();
        let i1 = Ty::Int(1);
        let i8t = Ty::Int(8);
        let i64t = Ty::Int(64);
        let int_ptr = module.layout.int_ptr_ty();

        let binary_op_handlers = BinOp::ALL.map(|op| {
            declare(
                module,
                &format!("_sym_build_{}", bin_op_suffix(op)),
                vec![ptr.clone(), ptr.clone()],
                ptr.clone(),
            )
        });
        let comparison_handlers = IcmpPred::ALL.map(|pred| {
            declare(
                module,
                &format!("_sym_build_{}", icmp_suffix(pred)),
                vec![ptr.clone(), ptr.clone()],
                ptr.clone(),
            )
        });

        Self {
            initialize: declare(module, "_sym_initialize", vec![], Ty::Void),
            build_integer: declare(
                module,
                "_sym_build_integer",
                vec![i64t.clone(), i8t.clone()],
                ptr.clone(),
            ),
            build_null_pointer: declare(module, "_sym_build_null_pointer", vec![], ptr.clone()),
            build_neg: declare(module, "_sym_build_neg", vec![ptr.clone()], ptr.clone()),
            build_sext: declare(
                module,
                "_sym_build_sext",
                vec![ptr.clone(), i8t.clone()],
                ptr.clone(),
            ),
            build_zext: declare(
                module,
                "_sym_build_zext",
                vec![ptr.clone(), i8t.clone()],
                ptr.clone(),
            ),
            build_trunc: declare(
                module,
                "_sym_build_trunc",
                vec![ptr.clone(), i8t.clone()],
                ptr.clone(),
            ),
            push_path_constraint: declare(
                module,
                "_sym_push_path_constraint",
                vec![ptr.clone(), i1],
                Ty::Void,
            ),
            get_parameter_expression: declare(
                module,
                "_sym_get_parameter_expression",
                vec![i8t.clone()],
                ptr.clone(),
            ),
            set_parameter_expression: declare(
                module,
                "_sym_set_parameter_expression",
                vec![i8t, ptr.clone()],
                Ty::Void,
            ),
            set_return_expression: declare(
                module,
                "_sym_set_return_expression",
                vec![ptr.clone()],
                Ty::Void,
            ),
            get_return_expression: declare(
                module,
                "_sym_get_return_expression",
                vec![],
                ptr.clone(),
            ),
            initialize_array_8: declare_array_initializer(module, 8),
            initialize_array_16: declare_array_initializer(module, 16),
            initialize_array_32: declare_array_initializer(module, 32),
            initialize_array_64: declare_array_initializer(module, 64),
            memcpy: declare(
                module,
                "_sym_memcpy",
                vec![ptr.clone(), ptr, int_ptr],
                Ty::Void,
            ),
            binary_op_handlers,
            comparison_handlers,
        }
    }

    pub fn binary_op_handler(&self, op: BinOp) -> FuncId {
        self.binary_op_handlers[op as usize]
    }

    pub fn comparison_handler(&self, pred: IcmpPred) -> FuncId {
        self.comparison_handlers[pred as usize]
    }

    /// The bulk initializer for arrays with the given element width, if one
    /// exists.
    pub fn array_initializer(&self, elem_bits: u8) -> Option<FuncId> {
        match elem_bits {
            8 => Some(self.initialize_array_8),
            16 => Some(self.initialize_array_16),
            32 => Some(self.initialize_array_32),
            64 => Some(self.initialize_array_64),
            _ => None,
        }
    }
}

fn declare(module: &mut Module, name: &str, params: Vec<Ty>, ret: Ty) -> FuncId {
    module.get_or_declare_function(name, Signature::new(params, ret))
}

fn declare_array_initializer(module: &mut Module, elem_bits: u8) -> FuncId {
    declare(
        module,
        &format!("_sym_initialize_array_{elem_bits}"),
        vec![
            Ty::byte_ptr().ptr_to(),
            Ty::Int(elem_bits).ptr_to(),
            Ty::Int(64),
        ],
        Ty::Void,
    )
}

fn bin_op_suffix(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::Udiv => "unsigned_div",
        BinOp::Sdiv => "signed_div",
        BinOp::Urem => "unsigned_rem",
        BinOp::Srem => "signed_rem",
        BinOp::Shl => "shift_left",
        BinOp::Lshr => "logical_shift_right",
        BinOp::Ashr => "arithmetic_shift_right",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Xor => "xor",
    }
}

fn icmp_suffix(pred: IcmpPred) -> &'static str {
    match pred {
        IcmpPred::Eq => "equal",
        IcmpPred::Ne => "not_equal",
        IcmpPred::Ugt => "unsigned_greater_than",
        IcmpPred::Uge => "unsigned_greater_equal",
        IcmpPred::Ult => "unsigned_less_than",
        IcmpPred::Ule => "unsigned_less_equal",
        IcmpPred::Sgt => "signed_greater_than",
        IcmpPred::Sge => "signed_greater_equal",
        IcmpPred::Slt => "signed_less_than",
        IcmpPred::Sle => "signed_less_equal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mir::DataLayout;

    #[test]
    fn declarations_are_idempotent() {
        let mut module = Module::new("test", DataLayout::default());
        let first = RuntimeFunctions::declare(&mut module);
        let count = module.functions.len();
        let second = RuntimeFunctions::declare(&mut module);
        assert_eq!(module.functions.len(), count);
        assert_eq!(first.build_integer, second.build_integer);
        assert_eq!(
            first.binary_op_handler(BinOp::Ashr),
            second.binary_op_handler(BinOp::Ashr)
        );
    }

    #[test]
    fn handler_tables_use_the_documented_names() {
        let mut module = Module::new("test", DataLayout::default());
        let runtime = RuntimeFunctions::declare(&mut module);
        let name = |id| module.function(id).name.as_str().to_owned();
        assert_eq!(
            name(runtime.binary_op_handler(BinOp::Lshr)),
            "_sym_build_logical_shift_right"
        );
        assert_eq!(
            name(runtime.comparison_handler(IcmpPred::Sle)),
            "_sym_build_signed_less_equal"
        );
        assert_eq!(name(runtime.memcpy), "_sym_memcpy");
        assert!(name(runtime.initialize_array_32).ends_with("_32"));
    }

    #[test]
    fn the_runtime_is_fully_external() {
        let mut module = Module::new("test", DataLayout::default());
        RuntimeFunctions::declare(&mut module);
        assert!(module.functions.iter().all(|f| f.is_declaration()));
        assert!(
            module
                .functions
                .iter()
                .all(|f| f.name.starts_with(RUNTIME_PREFIX))
        );
    }
}
