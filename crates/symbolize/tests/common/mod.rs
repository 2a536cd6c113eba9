#![allow(dead_code)]

use mir::{Body, Callee, Inst, InstKind, Module, ValueId};

/// Returns the function body for `name`, panicking if it does not exist.
pub fn body_of<'a>(module: &'a Module, name: &str) -> &'a Body {
    let func = module
        .function_by_name(name)
        .unwrap_or_else(|| panic!("no function named `{name}`"));
    module
        .function(func)
        .body
        .as_ref()
        .unwrap_or_else(|| panic!("`{name}` has no body"))
}

/// Names of directly called functions, in block and instruction order.
pub fn called_names(module: &Module, body: &Body) -> Vec<String> {
    let mut names = Vec::new();
    for block in &body.blocks {
        for inst in &block.insts {
            if let InstKind::Call {
                callee: Callee::Direct(func),
                ..
            } = &inst.kind
            {
                names.push(module.function(*func).name.to_string());
            }
        }
    }
    names
}

/// The first call to `name`, if any.
pub fn find_call<'a>(module: &Module, body: &'a Body, name: &str) -> Option<&'a Inst> {
    body.blocks.iter().flat_map(|b| b.insts.iter()).find(|inst| {
        matches!(
            &inst.kind,
            InstKind::Call { callee: Callee::Direct(func), .. }
                if module.function(*func).name == name
        )
    })
}

pub fn count_calls(module: &Module, body: &Body, name: &str) -> usize {
    body.blocks
        .iter()
        .flat_map(|b| b.insts.iter())
        .filter(|inst| {
            matches!(
                &inst.kind,
                InstKind::Call { callee: Callee::Direct(func), .. }
                    if module.function(*func).name == name
            )
        })
        .count()
}

/// The argument list of a call instruction.
pub fn call_args(inst: &Inst) -> &[ValueId] {
    match &inst.kind {
        InstKind::Call { args, .. } => args,
        other => panic!("expected a call, got {other:?}"),
    }
}
