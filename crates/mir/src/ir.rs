//! Core IR: modules, functions, basic blocks, instructions and values.

mod builder;

pub use builder::FunctionBuilder;

use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::layout::DataLayout;
use crate::ty::Ty;

/// Identifier for a function (dense index into [`Module::functions`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

impl FuncId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier for a module global (dense index into [`Module::globals`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub u32);

impl GlobalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier for a basic block (dense index into [`Body::blocks`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier for an SSA value (dense index into [`Body::values`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A compilation unit: functions, globals and startup constructors that
/// share one data layout.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: SmolStr,
    pub layout: DataLayout,
    pub functions: Vec<FunctionData>,
    pub globals: Vec<GlobalData>,
    /// Functions run at program startup, lowest priority first.
    pub ctors: Vec<Ctor>,
}

impl Module {
    pub fn new(name: impl Into<SmolStr>, layout: DataLayout) -> Self {
        Self {
            name: name.into(),
            layout,
            functions: Vec::new(),
            globals: Vec::new(),
            ctors: Vec::new(),
        }
    }

    pub fn function(&self, id: FuncId) -> &FunctionData {
        &self.functions[id.index()]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut FunctionData {
        &mut self.functions[id.index()]
    }

    pub fn global(&self, id: GlobalId) -> &GlobalData {
        &self.globals[id.index()]
    }

    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|idx| FuncId(idx as u32))
    }

    /// Adds an external declaration. Bodies are attached separately, through
    /// [`FunctionBuilder`].
    pub fn declare_function(
        &mut self,
        name: impl Into<SmolStr>,
        sig: Signature,
        linkage: Linkage,
    ) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(FunctionData {
            name: name.into(),
            sig,
            linkage,
            intrinsic: None,
            body: None,
        });
        id
    }

    /// Returns the function with the given name, declaring it if absent.
    pub fn get_or_declare_function(&mut self, name: &str, sig: Signature) -> FuncId {
        if let Some(id) = self.function_by_name(name) {
            return id;
        }
        self.declare_function(name, sig, Linkage::External)
    }

    pub fn declare_intrinsic(&mut self, intrinsic: Intrinsic) -> FuncId {
        let id = self.get_or_declare_function(intrinsic.name(), intrinsic.signature());
        self.functions[id.index()].intrinsic = Some(intrinsic);
        id
    }

    pub fn add_global(
        &mut self,
        name: impl Into<SmolStr>,
        ty: Ty,
        linkage: Linkage,
        init: Initializer,
    ) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(GlobalData {
            name: name.into(),
            ty,
            linkage,
            init,
        });
        id
    }

    pub fn add_ctor(&mut self, priority: u16, func: FuncId) {
        self.ctors.push(Ctor { priority, func });
    }
}

/// An entry in the module's startup-constructor list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ctor {
    pub priority: u16,
    pub func: FuncId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    Public,
    Private,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Ty>,
    pub ret: Ty,
}

impl Signature {
    pub fn new(params: Vec<Ty>, ret: Ty) -> Self {
        Self { params, ret }
    }

    pub fn returns_value(&self) -> bool {
        self.ret != Ty::Void
    }
}

#[derive(Debug, Clone)]
pub struct FunctionData {
    pub name: SmolStr,
    pub sig: Signature,
    pub linkage: Linkage,
    pub intrinsic: Option<Intrinsic>,
    /// `None` for external declarations.
    pub body: Option<Body>,
}

impl FunctionData {
    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }
}

/// Well-known functions with fixed semantics, recognized by passes rather
/// than linked from user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    LifetimeStart,
    LifetimeEnd,
    Memcpy,
    Memmove,
    Memset,
}

impl Intrinsic {
    pub fn name(self) -> &'static str {
        match self {
            Intrinsic::LifetimeStart => "lifetime.start",
            Intrinsic::LifetimeEnd => "lifetime.end",
            Intrinsic::Memcpy => "memcpy",
            Intrinsic::Memmove => "memmove",
            Intrinsic::Memset => "memset",
        }
    }

    pub fn signature(self) -> Signature {
        let ptr = Ty::byte_ptr();
        match self {
            Intrinsic::LifetimeStart | Intrinsic::LifetimeEnd => {
                Signature::new(vec![Ty::Int(64), ptr], Ty::Void)
            }
            Intrinsic::Memcpy | Intrinsic::Memmove => {
                Signature::new(vec![ptr.clone(), ptr, Ty::Int(64)], Ty::Void)
            }
            Intrinsic::Memset => Signature::new(vec![ptr, Ty::Int(8), Ty::Int(64)], Ty::Void),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlobalData {
    pub name: SmolStr,
    pub ty: Ty,
    pub linkage: Linkage,
    pub init: Initializer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Initializer {
    Zeroed,
    Int(u64),
    Array(Vec<Initializer>),
    Struct(Vec<Initializer>),
}

/// A function body expressed as basic blocks over a value arena.
#[derive(Debug, Clone)]
pub struct Body {
    pub entry: BlockId,
    pub blocks: Vec<BlockData>,
    pub values: Vec<ValueData>,
    /// Values of the function parameters, in signature order.
    pub param_values: Vec<ValueId>,
    /// Interning table so each constant is a single value per body.
    consts: FxHashMap<(Constant, Ty), ValueId>,
}

impl Body {
    pub fn new(sig: &Signature) -> Self {
        let mut body = Self {
            entry: BlockId(0),
            blocks: Vec::new(),
            values: Vec::new(),
            param_values: Vec::new(),
            consts: FxHashMap::default(),
        };
        for (index, ty) in sig.params.iter().enumerate() {
            let value = body.alloc_value(ValueData {
                ty: ty.clone(),
                kind: ValueKind::Param { index: index as u8 },
            });
            body.param_values.push(value);
        }
        body
    }

    pub fn alloc_value(&mut self, data: ValueData) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(data);
        id
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.index()]
    }

    pub fn value_ty(&self, id: ValueId) -> &Ty {
        &self.values[id.index()].ty
    }

    pub fn make_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData::new());
        id
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BlockData {
        &mut self.blocks[id.index()]
    }

    pub fn param(&self, index: usize) -> ValueId {
        self.param_values[index]
    }

    /// Returns the value for a constant, interning it so repeated requests
    /// yield the same `ValueId`.
    pub fn const_value(&mut self, constant: Constant, ty: Ty) -> ValueId {
        if let Some(&id) = self.consts.get(&(constant.clone(), ty.clone())) {
            return id;
        }
        let id = self.alloc_value(ValueData {
            ty: ty.clone(),
            kind: ValueKind::Const(constant.clone()),
        });
        self.consts.insert((constant, ty), id);
        id
    }

    /// An integer constant, masked to its declared width.
    pub fn int_const(&mut self, value: u64, width: u8) -> ValueId {
        let masked = if width >= 64 {
            value
        } else {
            value & ((1u64 << width) - 1)
        };
        self.const_value(
            Constant::Int {
                value: masked,
                width,
            },
            Ty::Int(width),
        )
    }

    /// The concrete value of a constant integer, if `id` is one.
    pub fn const_int_value(&self, id: ValueId) -> Option<u64> {
        match &self.value(id).kind {
            ValueKind::Const(Constant::Int { value, .. }) => Some(*value),
            _ => None,
        }
    }

    /// Result type of an address computation over `base` with `indices`.
    ///
    /// The first index steps over the base pointer and leaves the walked
    /// type unchanged; later indices descend into arrays and structs.
    pub fn gep_result_ty(&self, base: ValueId, indices: &[ValueId]) -> Ty {
        let mut cur = self
            .value_ty(base)
            .pointee()
            .expect("address computation requires a pointer base")
            .clone();
        for &index in indices.iter().skip(1) {
            cur = match cur {
                Ty::Array(elem, _) => *elem,
                Ty::Struct(fields) => {
                    let field = self
                        .const_int_value(index)
                        .expect("struct fields are indexed by constant integers");
                    fields[field as usize].clone()
                }
                other => panic!("cannot index into {other}"),
            };
        }
        cur.ptr_to()
    }
}

/// A linear sequence of instructions preceded by φ-nodes and terminated by a
/// control-flow edge.
#[derive(Debug, Clone)]
pub struct BlockData {
    /// φ-nodes at the block head. Keeping them out of `insts` makes the
    /// "φs precede all ordinary code" rule structural.
    pub phis: Vec<Phi>,
    pub insts: Vec<Inst>,
    pub terminator: Terminator,
}

impl BlockData {
    pub fn new() -> Self {
        Self {
            phis: Vec::new(),
            insts: Vec::new(),
            terminator: Terminator::Unreachable,
        }
    }
}

impl Default for BlockData {
    fn default() -> Self {
        Self::new()
    }
}

/// SSA merge point selecting a value based on the incoming predecessor.
#[derive(Debug, Clone, PartialEq)]
pub struct Phi {
    pub result: ValueId,
    pub incoming: Vec<(ValueId, BlockId)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub result: Option<ValueId>,
    pub kind: InstKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Binary {
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Icmp {
        pred: IcmpPred,
        lhs: ValueId,
        rhs: ValueId,
    },
    Select {
        cond: ValueId,
        then_val: ValueId,
        else_val: ValueId,
    },
    /// Stack allocation of `count` objects of type `ty`.
    Alloca {
        ty: Ty,
        count: ValueId,
    },
    Load {
        ptr: ValueId,
    },
    Store {
        value: ValueId,
        ptr: ValueId,
    },
    /// Address computation within an aggregate; never touches memory.
    Gep {
        base: ValueId,
        indices: Vec<ValueId>,
    },
    Cast {
        op: CastOp,
        operand: ValueId,
        to: Ty,
    },
    Call {
        callee: Callee,
        args: Vec<ValueId>,
    },
    /// Extracts a field from an aggregate SSA value.
    ExtractValue {
        agg: ValueId,
        index: u32,
    },
}

impl InstKind {
    /// Invokes `f` on every value operand of the instruction.
    pub fn for_each_operand(&self, mut f: impl FnMut(ValueId)) {
        match self {
            InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            InstKind::Select {
                cond,
                then_val,
                else_val,
            } => {
                f(*cond);
                f(*then_val);
                f(*else_val);
            }
            InstKind::Alloca { count, .. } => f(*count),
            InstKind::Load { ptr } => f(*ptr),
            InstKind::Store { value, ptr } => {
                f(*value);
                f(*ptr);
            }
            InstKind::Gep { base, indices } => {
                f(*base);
                for &index in indices {
                    f(index);
                }
            }
            InstKind::Cast { operand, .. } => f(*operand),
            InstKind::Call { callee, args } => {
                if let Callee::Indirect(target) = callee {
                    f(*target);
                }
                for &arg in args {
                    f(arg);
                }
            }
            InstKind::ExtractValue { agg, .. } => f(*agg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Udiv,
    Sdiv,
    Urem,
    Srem,
    Shl,
    Lshr,
    Ashr,
    And,
    Or,
    Xor,
}

impl BinOp {
    pub const COUNT: usize = 13;

    pub const ALL: [BinOp; Self::COUNT] = [
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::Udiv,
        BinOp::Sdiv,
        BinOp::Urem,
        BinOp::Srem,
        BinOp::Shl,
        BinOp::Lshr,
        BinOp::Ashr,
        BinOp::And,
        BinOp::Or,
        BinOp::Xor,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Udiv => "udiv",
            BinOp::Sdiv => "sdiv",
            BinOp::Urem => "urem",
            BinOp::Srem => "srem",
            BinOp::Shl => "shl",
            BinOp::Lshr => "lshr",
            BinOp::Ashr => "ashr",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IcmpPred {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

impl IcmpPred {
    pub const COUNT: usize = 10;

    pub const ALL: [IcmpPred; Self::COUNT] = [
        IcmpPred::Eq,
        IcmpPred::Ne,
        IcmpPred::Ugt,
        IcmpPred::Uge,
        IcmpPred::Ult,
        IcmpPred::Ule,
        IcmpPred::Sgt,
        IcmpPred::Sge,
        IcmpPred::Slt,
        IcmpPred::Sle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            IcmpPred::Eq => "eq",
            IcmpPred::Ne => "ne",
            IcmpPred::Ugt => "ugt",
            IcmpPred::Uge => "uge",
            IcmpPred::Ult => "ult",
            IcmpPred::Ule => "ule",
            IcmpPred::Sgt => "sgt",
            IcmpPred::Sge => "sge",
            IcmpPred::Slt => "slt",
            IcmpPred::Sle => "sle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    Trunc,
    Zext,
    Sext,
    Bitcast,
    PtrToInt,
    IntToPtr,
}

impl CastOp {
    pub fn name(self) -> &'static str {
        match self {
            CastOp::Trunc => "trunc",
            CastOp::Zext => "zext",
            CastOp::Sext => "sext",
            CastOp::Bitcast => "bitcast",
            CastOp::PtrToInt => "ptr_to_int",
            CastOp::IntToPtr => "int_to_ptr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    Direct(FuncId),
    Indirect(ValueId),
}

/// Control-flow terminating instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Return {
        value: Option<ValueId>,
    },
    /// Unconditional jump.
    Goto {
        target: BlockId,
    },
    /// Conditional branch on a Boolean value.
    Branch {
        cond: ValueId,
        then_bb: BlockId,
        else_bb: BlockId,
    },
    /// Multi-way branch on an integer discriminant.
    Switch {
        discr: ValueId,
        targets: Vec<SwitchTarget>,
        default: BlockId,
    },
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchTarget {
    pub value: u64,
    pub block: BlockId,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Return { .. } | Terminator::Unreachable => Vec::new(),
            Terminator::Goto { target } => vec![*target],
            Terminator::Branch {
                then_bb, else_bb, ..
            } => vec![*then_bb, *else_bb],
            Terminator::Switch {
                targets, default, ..
            } => {
                let mut succs: Vec<_> = targets.iter().map(|t| t.block).collect();
                succs.push(*default);
                succs
            }
        }
    }

    pub fn for_each_operand(&self, mut f: impl FnMut(ValueId)) {
        match self {
            Terminator::Return { value: Some(value) } => f(*value),
            Terminator::Branch { cond, .. } => f(*cond),
            Terminator::Switch { discr, .. } => f(*discr),
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValueData {
    pub ty: Ty,
    pub kind: ValueKind,
}

#[derive(Debug, Clone)]
pub enum ValueKind {
    /// Function parameter at the given signature index.
    Param { index: u8 },
    /// Defined by an instruction (the instruction records its result).
    Inst,
    /// Defined by a φ-node.
    Phi,
    Const(Constant),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Int { value: u64, width: u8 },
    NullPtr,
    /// Address of a module global.
    Global(GlobalId),
    /// Address of a function.
    Function(FuncId),
    /// Constant address computation over another constant pointer.
    ElemPtr { base: ValueId, indices: Vec<ValueId> },
    /// Constant pointer bit cast of another constant pointer.
    PtrCast { operand: ValueId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_interned_per_body() {
        let sig = Signature::new(vec![], Ty::Void);
        let mut body = Body::new(&sig);
        let a = body.int_const(7, 32);
        let b = body.int_const(7, 32);
        let c = body.int_const(7, 64);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn int_consts_are_masked_to_their_width() {
        let sig = Signature::new(vec![], Ty::Void);
        let mut body = Body::new(&sig);
        let id = body.int_const(0x1ff, 8);
        assert_eq!(body.const_int_value(id), Some(0xff));
    }

    #[test]
    fn gep_result_walks_aggregates() {
        let sig = Signature::new(
            vec![Ty::Struct(vec![Ty::Int(8), Ty::Array(Box::new(Ty::Int(32)), 4)]).ptr_to()],
            Ty::Void,
        );
        let mut body = Body::new(&sig);
        let zero = body.int_const(0, 32);
        let one = body.int_const(1, 32);
        let base = body.param(0);
        assert_eq!(
            body.gep_result_ty(base, &[zero, one, zero]),
            Ty::Int(32).ptr_to()
        );
    }
}
