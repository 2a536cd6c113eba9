//! Compile-time instrumentation that gives every computed value a symbolic
//! shadow.
//!
//! The pass rewrites a MIR module in place so that, at run time, each value
//! `v` has an associated expression handle produced and propagated in lock
//! step with `v` by an external runtime (the `_sym_*` ABI declared in
//! [`runtime`]). A downstream concolic engine consumes those calls to build
//! SMT formulas and derive diverging inputs; none of that machinery lives
//! here.
//!
//! The concrete program is left intact: instrumentation only inserts
//! instructions, globals and one startup constructor.

pub mod expr_ty;
pub mod runtime;

mod symbolizer;

pub use expr_ty::expression_ty;
pub use runtime::{BUILD_VARIABLE, RUNTIME_PREFIX, RuntimeFunctions};

use mir::{
    CastOp, FuncId, FunctionBuilder, GlobalId, Initializer, Linkage, Module, Signature, Ty,
    ValueId,
};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use symbolizer::Symbolizer;

/// Name under which the pass registers itself with the host driver. It runs
/// as early as possible, before transformations that obscure source-level
/// structure.
pub const PASS_NAME: &str = "symbolize";

/// Reserved name of the generated module constructor; the constructor is
/// never itself instrumented.
pub const CTOR_NAME: &str = "__sym_ctor";

#[derive(Debug)]
pub enum SymbolizeError {
    /// A module global whose expression shadow cannot be initialized.
    UnsupportedGlobal { global: SmolStr, ty: Ty },
}

impl std::fmt::Display for SymbolizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolizeError::UnsupportedGlobal { global, ty } => write!(
                f,
                "cannot initialize the symbolic expression for global `{global}` of type {ty}"
            ),
        }
    }
}

impl std::error::Error for SymbolizeError {}

/// Instruments `module` in place. Convenience wrapper around
/// [`SymbolizePass`].
pub fn symbolize_module(module: &mut Module) -> Result<(), SymbolizeError> {
    SymbolizePass::new().run(module)
}

/// The module-level driver: declares the runtime, creates expression
/// globals and the startup constructor, then rewrites every defined
/// function.
pub struct SymbolizePass {
    runtime: Option<RuntimeFunctions>,
    /// Module globals to their expression siblings.
    global_exprs: FxHashMap<GlobalId, GlobalId>,
}

impl SymbolizePass {
    pub fn new() -> Self {
        Self {
            runtime: None,
            global_exprs: FxHashMap::default(),
        }
    }

    pub fn run(&mut self, module: &mut Module) -> Result<(), SymbolizeError> {
        self.initialize(module)?;
        for idx in 0..module.functions.len() {
            self.run_on_function(module, FuncId(idx as u32));
        }
        Ok(())
    }

    fn initialize(&mut self, module: &mut Module) -> Result<(), SymbolizeError> {
        tracing::debug!("symbolizer module init for `{}`", module.name);
        let runtime = RuntimeFunctions::declare(module);

        // Each global gets a sibling holding the expressions for its scalar
        // slots. The sibling can never be constant, even when the original
        // is: it is filled at process start.
        let global_count = module.globals.len();
        for idx in 0..global_count {
            let global = GlobalId(idx as u32);
            let data = module.global(global);
            let Some(expr_ty) = expression_ty(&data.ty) else {
                return Err(SymbolizeError::UnsupportedGlobal {
                    global: data.name.clone(),
                    ty: data.ty.clone(),
                });
            };
            let name = SmolStr::from(format!("{}.sym_expr", data.name));
            let linkage = data.linkage;
            let shadow = module.add_global(name, expr_ty, linkage, Initializer::Zeroed);
            self.global_exprs.insert(global, shadow);
        }

        let ctor = self.build_ctor(module, &runtime, global_count)?;
        module.add_ctor(0, ctor);
        self.runtime = Some(runtime);
        Ok(())
    }

    /// Builds the constructor that initializes the runtime and seeds every
    /// expression global from its concrete counterpart.
    fn build_ctor(
        &self,
        module: &mut Module,
        runtime: &RuntimeFunctions,
        global_count: usize,
    ) -> Result<FuncId, SymbolizeError> {
        let ctor = module.declare_function(
            CTOR_NAME,
            Signature::new(vec![], Ty::Void),
            Linkage::Private,
        );
        let mut b = FunctionBuilder::new(module, ctor);
        b.call(runtime.initialize, vec![]);
        for idx in 0..global_count {
            let global = GlobalId(idx as u32);
            let shadow = self.global_exprs[&global];
            let data = b.module().global(global);
            let (name, ty) = (data.name.clone(), data.ty.clone());
            let value_ptr = b.global_addr(global);
            let expr_ptr = b.global_addr(shadow);
            build_global_init(&mut b, runtime, expr_ptr, value_ptr, &ty, &name)?;
        }
        b.ret(None);
        b.finish();
        Ok(ctor)
    }

    fn run_on_function(&self, module: &mut Module, func: FuncId) {
        let name = module.function(func).name.clone();
        if name == CTOR_NAME {
            return;
        }
        let Some(mut body) = module.function_mut(func).body.take() else {
            return;
        };
        tracing::debug!("symbolizing function `{name}`");
        let runtime = self
            .runtime
            .as_ref()
            .expect("module init runs before any function");
        Symbolizer::new(module, runtime, &self.global_exprs, &mut body, &name).run();
        module.function_mut(func).body = Some(body);
    }
}

impl Default for SymbolizePass {
    fn default() -> Self {
        Self::new()
    }
}

/// Emits code into the constructor that stores the expression for the value
/// behind `value_ptr` into the slot behind `expr_ptr`, descending through
/// aggregates.
fn build_global_init(
    b: &mut FunctionBuilder<'_>,
    runtime: &RuntimeFunctions,
    expr_ptr: ValueId,
    value_ptr: ValueId,
    ty: &Ty,
    global_name: &SmolStr,
) -> Result<(), SymbolizeError> {
    match ty {
        Ty::Int(width) => {
            let value = b.load(value_ptr);
            let wide = if *width < 64 {
                b.cast(CastOp::Zext, value, Ty::Int(64))
            } else {
                value
            };
            let bits = b.int_const(*width as u64, 8);
            let expr = b
                .call(runtime.build_integer, vec![wide, bits])
                .expect("build_integer returns a handle");
            b.store(expr, expr_ptr);
        }
        Ty::Array(elem, len) => {
            let initializer = elem
                .int_width()
                .and_then(|bits| runtime.array_initializer(bits))
                .ok_or_else(|| SymbolizeError::UnsupportedGlobal {
                    global: global_name.clone(),
                    ty: ty.clone(),
                })?;
            let dst = b.cast(CastOp::Bitcast, expr_ptr, Ty::byte_ptr().ptr_to());
            let src = b.cast(
                CastOp::Bitcast,
                value_ptr,
                Ty::Int(elem.int_width().expect("checked above")).ptr_to(),
            );
            let len = b.int_const(*len, 64);
            b.call(initializer, vec![dst, src, len]);
        }
        Ty::Struct(fields) => {
            for (member, field) in fields.iter().enumerate() {
                let zero = b.int_const(0, 32);
                let index = b.int_const(member as u64, 32);
                let member_expr = b.gep(expr_ptr, vec![zero, index]);
                let member_value = b.gep(value_ptr, vec![zero, index]);
                build_global_init(b, runtime, member_expr, member_value, field, global_name)?;
            }
        }
        other => {
            return Err(SymbolizeError::UnsupportedGlobal {
                global: global_name.clone(),
                ty: other.clone(),
            });
        }
    }
    Ok(())
}
