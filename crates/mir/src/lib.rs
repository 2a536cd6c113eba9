//! A typed, C-like SSA intermediate representation.
//!
//! The crate provides the data model (modules, functions, basic blocks,
//! instructions, values), a data-layout oracle for sizes and struct offsets,
//! a builder for constructing function bodies, a printer, and the analyses
//! transformation passes rely on (dominator tree, IR verifier).

pub mod analysis;
pub mod fmt;
pub mod ir;
pub mod layout;
pub mod ty;

pub use ir::{
    BinOp, BlockData, BlockId, Body, Callee, CastOp, Constant, Ctor, FuncId, FunctionBuilder,
    FunctionData, GlobalData, GlobalId, IcmpPred, Initializer, Inst, InstKind, Intrinsic, Linkage,
    Module, Phi, Signature, SwitchTarget, Terminator, ValueData, ValueId, ValueKind,
};
pub use layout::DataLayout;
pub use ty::{FloatKind, Ty};
