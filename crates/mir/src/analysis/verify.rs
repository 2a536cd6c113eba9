//! IR sanity checking: SSA dominance, CFG consistency and call arity.

use smol_str::SmolStr;

use crate::ir::{BlockId, Body, Callee, FuncId, InstKind, Module, ValueId, ValueKind};

use super::domtree::{DomTree, predecessors};

#[derive(Debug)]
pub enum VerifyError {
    /// A value is used where its definition does not dominate the use.
    UseNotDominated {
        func: SmolStr,
        value: ValueId,
        block: BlockId,
    },
    /// A value with instruction or φ kind is used but never defined.
    UndefinedValue { func: SmolStr, value: ValueId },
    /// A φ-node's incoming blocks disagree with the CFG predecessors.
    PhiPredecessorMismatch { func: SmolStr, block: BlockId },
    /// A terminator names a block outside the body.
    BadBlockTarget { func: SmolStr, block: BlockId },
    /// A direct call passes the wrong number of arguments.
    ArityMismatch { func: SmolStr, callee: SmolStr },
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::UseNotDominated { func, value, block } => write!(
                f,
                "in `{func}`: use of {value:?} in {block:?} is not dominated by its definition"
            ),
            VerifyError::UndefinedValue { func, value } => {
                write!(f, "in `{func}`: {value:?} is used but never defined")
            }
            VerifyError::PhiPredecessorMismatch { func, block } => write!(
                f,
                "in `{func}`: φ in {block:?} does not match the block's predecessors"
            ),
            VerifyError::BadBlockTarget { func, block } => {
                write!(f, "in `{func}`: terminator targets invalid {block:?}")
            }
            VerifyError::ArityMismatch { func, callee } => {
                write!(f, "in `{func}`: call to `{callee}` has wrong arity")
            }
        }
    }
}

impl std::error::Error for VerifyError {}

/// Where a value is defined, for dominance checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefSite {
    /// Parameters and constants dominate every use.
    Everywhere,
    /// Defined by a φ at the head of a block.
    Phi(BlockId),
    /// Defined by the instruction at the given position.
    Inst(BlockId, usize),
}

pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    for idx in 0..module.functions.len() {
        let func = FuncId(idx as u32);
        if module.function(func).body.is_some() {
            verify_function(module, func)?;
        }
    }
    Ok(())
}

pub fn verify_function(module: &Module, func: FuncId) -> Result<(), VerifyError> {
    let data = module.function(func);
    let name = &data.name;
    let body = data.body.as_ref().expect("verified function must have a body");

    let domtree = DomTree::compute(body);
    let preds = predecessors(body);
    let defs = collect_defs(body);

    for (idx, block_data) in body.blocks.iter().enumerate() {
        let block = BlockId(idx as u32);
        for target in block_data.terminator.successors() {
            if target.index() >= body.blocks.len() {
                return Err(VerifyError::BadBlockTarget {
                    func: name.clone(),
                    block: target,
                });
            }
        }
        if !domtree.is_reachable(block) {
            continue;
        }

        for phi in &block_data.phis {
            let mut incoming: Vec<BlockId> = phi.incoming.iter().map(|&(_, pred)| pred).collect();
            incoming.sort_by_key(|b| b.0);
            let mut expected = preds[block.index()].clone();
            expected.sort_by_key(|b| b.0);
            if incoming != expected {
                return Err(VerifyError::PhiPredecessorMismatch {
                    func: name.clone(),
                    block,
                });
            }
            for &(value, pred) in &phi.incoming {
                // The incoming value only needs to be available at the end
                // of the corresponding predecessor.
                check_use_at_block_end(name, &defs, &domtree, value, pred)?;
            }
        }

        for (inst_idx, inst) in block_data.insts.iter().enumerate() {
            let mut result = Ok(());
            inst.kind.for_each_operand(|value| {
                if result.is_ok() {
                    result = check_use(name, &defs, &domtree, value, block, inst_idx);
                }
            });
            result?;

            if let InstKind::Call {
                callee: Callee::Direct(callee),
                args,
            } = &inst.kind
            {
                let callee_data = module.function(*callee);
                if callee_data.sig.params.len() != args.len() {
                    return Err(VerifyError::ArityMismatch {
                        func: name.clone(),
                        callee: callee_data.name.clone(),
                    });
                }
            }
        }

        let mut result = Ok(());
        let term_idx = block_data.insts.len();
        block_data.terminator.for_each_operand(|value| {
            if result.is_ok() {
                result = check_use(name, &defs, &domtree, value, block, term_idx);
            }
        });
        result?;
    }

    Ok(())
}

fn collect_defs(body: &Body) -> Vec<Option<DefSite>> {
    let mut defs = vec![None; body.values.len()];
    for (value_idx, value) in body.values.iter().enumerate() {
        if matches!(value.kind, ValueKind::Param { .. } | ValueKind::Const(_)) {
            defs[value_idx] = Some(DefSite::Everywhere);
        }
    }
    for (block_idx, block) in body.blocks.iter().enumerate() {
        let block_id = BlockId(block_idx as u32);
        for phi in &block.phis {
            defs[phi.result.index()] = Some(DefSite::Phi(block_id));
        }
        for (inst_idx, inst) in block.insts.iter().enumerate() {
            if let Some(result) = inst.result {
                defs[result.index()] = Some(DefSite::Inst(block_id, inst_idx));
            }
        }
    }
    defs
}

fn check_use(
    func: &SmolStr,
    defs: &[Option<DefSite>],
    domtree: &DomTree,
    value: ValueId,
    block: BlockId,
    position: usize,
) -> Result<(), VerifyError> {
    let dominated = match lookup_def(func, defs, value)? {
        DefSite::Everywhere => true,
        DefSite::Phi(def_block) => def_block == block || domtree.dominates(def_block, block),
        DefSite::Inst(def_block, def_idx) => {
            if def_block == block {
                def_idx < position
            } else {
                domtree.dominates(def_block, block)
            }
        }
    };
    if dominated {
        Ok(())
    } else {
        Err(VerifyError::UseNotDominated {
            func: func.clone(),
            value,
            block,
        })
    }
}

fn check_use_at_block_end(
    func: &SmolStr,
    defs: &[Option<DefSite>],
    domtree: &DomTree,
    value: ValueId,
    block: BlockId,
) -> Result<(), VerifyError> {
    let dominated = match lookup_def(func, defs, value)? {
        DefSite::Everywhere => true,
        DefSite::Phi(def_block) | DefSite::Inst(def_block, _) => {
            def_block == block || domtree.dominates(def_block, block)
        }
    };
    if dominated {
        Ok(())
    } else {
        Err(VerifyError::UseNotDominated {
            func: func.clone(),
            value,
            block,
        })
    }
}

fn lookup_def(
    func: &SmolStr,
    defs: &[Option<DefSite>],
    value: ValueId,
) -> Result<DefSite, VerifyError> {
    defs[value.index()].ok_or_else(|| VerifyError::UndefinedValue {
        func: func.clone(),
        value,
    })
}
