//! Human-readable listings of modules and functions.

use std::fmt;

use crate::ir::{
    Body, Callee, Constant, FuncId, Initializer, Inst, InstKind, Module, Terminator, ValueId,
    ValueKind,
};

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        for global in &self.globals {
            writeln!(f, "global @{}: {} = {}", global.name, global.ty, global.init)?;
        }
        for ctor in &self.ctors {
            writeln!(
                f,
                "ctor[{}] @{}",
                ctor.priority,
                self.function(ctor.func).name
            )?;
        }
        for idx in 0..self.functions.len() {
            write_function(f, self, FuncId(idx as u32))?;
        }
        Ok(())
    }
}

impl fmt::Display for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Initializer::Zeroed => write!(f, "zeroed"),
            Initializer::Int(value) => write!(f, "{value}"),
            Initializer::Array(elems) => {
                write!(f, "[")?;
                for (idx, elem) in elems.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, "]")
            }
            Initializer::Struct(fields) => {
                write!(f, "{{")?;
                for (idx, field) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn write_function(f: &mut fmt::Formatter<'_>, module: &Module, func: FuncId) -> fmt::Result {
    let data = module.function(func);
    let params: Vec<String> = data.sig.params.iter().map(|p| p.to_string()).collect();
    let header = format!("@{}({}) -> {}", data.name, params.join(", "), data.sig.ret);
    let Some(body) = &data.body else {
        return writeln!(f, "declare {header}");
    };
    writeln!(f, "fn {header} {{")?;
    for (idx, block) in body.blocks.iter().enumerate() {
        writeln!(f, "bb{idx}:")?;
        for phi in &block.phis {
            write!(f, "  v{} = phi ", phi.result.0)?;
            for (edge, (value, pred)) in phi.incoming.iter().enumerate() {
                if edge > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "[")?;
                write_operand(f, module, body, *value)?;
                write!(f, ", bb{}]", pred.index())?;
            }
            writeln!(f)?;
        }
        for inst in &block.insts {
            write!(f, "  ")?;
            write_inst(f, module, body, inst)?;
            writeln!(f)?;
        }
        write!(f, "  ")?;
        write_terminator(f, module, body, &block.terminator)?;
        writeln!(f)?;
    }
    writeln!(f, "}}")
}

fn write_inst(f: &mut fmt::Formatter<'_>, module: &Module, body: &Body, inst: &Inst) -> fmt::Result {
    if let Some(result) = inst.result {
        write!(f, "v{} = ", result.0)?;
    }
    match &inst.kind {
        InstKind::Binary { op, lhs, rhs } => {
            write!(f, "{} ", op.name())?;
            write_operand(f, module, body, *lhs)?;
            write!(f, ", ")?;
            write_operand(f, module, body, *rhs)
        }
        InstKind::Icmp { pred, lhs, rhs } => {
            write!(f, "icmp {} ", pred.name())?;
            write_operand(f, module, body, *lhs)?;
            write!(f, ", ")?;
            write_operand(f, module, body, *rhs)
        }
        InstKind::Select {
            cond,
            then_val,
            else_val,
        } => {
            write!(f, "select ")?;
            write_operand(f, module, body, *cond)?;
            write!(f, ", ")?;
            write_operand(f, module, body, *then_val)?;
            write!(f, ", ")?;
            write_operand(f, module, body, *else_val)
        }
        InstKind::Alloca { ty, count } => {
            write!(f, "alloca {ty}, ")?;
            write_operand(f, module, body, *count)
        }
        InstKind::Load { ptr } => {
            write!(f, "load ")?;
            write_operand(f, module, body, *ptr)
        }
        InstKind::Store { value, ptr } => {
            write!(f, "store ")?;
            write_operand(f, module, body, *value)?;
            write!(f, ", ")?;
            write_operand(f, module, body, *ptr)
        }
        InstKind::Gep { base, indices } => {
            write!(f, "gep ")?;
            write_operand(f, module, body, *base)?;
            for &index in indices {
                write!(f, ", ")?;
                write_operand(f, module, body, index)?;
            }
            Ok(())
        }
        InstKind::Cast { op, operand, to } => {
            write!(f, "{} ", op.name())?;
            write_operand(f, module, body, *operand)?;
            write!(f, " to {to}")
        }
        InstKind::Call { callee, args } => {
            write!(f, "call ")?;
            match callee {
                Callee::Direct(func) => write!(f, "@{}", module.function(*func).name)?,
                Callee::Indirect(target) => write_operand(f, module, body, *target)?,
            }
            write!(f, "(")?;
            for (idx, &arg) in args.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write_operand(f, module, body, arg)?;
            }
            write!(f, ")")
        }
        InstKind::ExtractValue { agg, index } => {
            write!(f, "extract_value ")?;
            write_operand(f, module, body, *agg)?;
            write!(f, ", {index}")
        }
    }
}

fn write_terminator(
    f: &mut fmt::Formatter<'_>,
    module: &Module,
    body: &Body,
    terminator: &Terminator,
) -> fmt::Result {
    match terminator {
        Terminator::Return { value: None } => write!(f, "ret"),
        Terminator::Return { value: Some(value) } => {
            write!(f, "ret ")?;
            write_operand(f, module, body, *value)
        }
        Terminator::Goto { target } => write!(f, "goto bb{}", target.index()),
        Terminator::Branch {
            cond,
            then_bb,
            else_bb,
        } => {
            write!(f, "br ")?;
            write_operand(f, module, body, *cond)?;
            write!(f, ", bb{}, bb{}", then_bb.index(), else_bb.index())
        }
        Terminator::Switch {
            discr,
            targets,
            default,
        } => {
            write!(f, "switch ")?;
            write_operand(f, module, body, *discr)?;
            for target in targets {
                write!(f, ", {} -> bb{}", target.value, target.block.index())?;
            }
            write!(f, ", default bb{}", default.index())
        }
        Terminator::Unreachable => write!(f, "unreachable"),
    }
}

fn write_operand(
    f: &mut fmt::Formatter<'_>,
    module: &Module,
    body: &Body,
    value: ValueId,
) -> fmt::Result {
    match &body.value(value).kind {
        ValueKind::Param { .. } | ValueKind::Inst | ValueKind::Phi => write!(f, "v{}", value.0),
        ValueKind::Const(constant) => write_constant(f, module, body, constant),
    }
}

fn write_constant(
    f: &mut fmt::Formatter<'_>,
    module: &Module,
    body: &Body,
    constant: &Constant,
) -> fmt::Result {
    match constant {
        Constant::Int { value, width } => write!(f, "{value}:i{width}"),
        Constant::NullPtr => write!(f, "null"),
        Constant::Global(global) => write!(f, "@{}", module.global(*global).name),
        Constant::Function(func) => write!(f, "@{}", module.function(*func).name),
        Constant::ElemPtr { base, indices } => {
            write!(f, "elem_ptr(")?;
            write_operand(f, module, body, *base)?;
            for &index in indices {
                write!(f, ", ")?;
                write_operand(f, module, body, index)?;
            }
            write!(f, ")")
        }
        Constant::PtrCast { operand } => {
            write!(f, "ptr_cast(")?;
            write_operand(f, module, body, *operand)?;
            write!(f, ")")
        }
    }
}
