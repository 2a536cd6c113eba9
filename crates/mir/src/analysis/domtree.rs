//! Dominator computation over the block graph.

use crate::ir::{BlockId, Body};

/// Immediate-dominator tree for the reachable blocks of a body.
///
/// Built with the classic iterative algorithm: walk blocks in reverse
/// postorder, intersecting the dominator sets of processed predecessors
/// until a fixed point.
#[derive(Debug)]
pub struct DomTree {
    entry: BlockId,
    idom: Vec<Option<BlockId>>,
    /// Postorder number per block; `None` for unreachable blocks.
    postorder: Vec<Option<u32>>,
}

impl DomTree {
    pub fn compute(body: &Body) -> Self {
        let block_count = body.blocks.len();
        let preds = predecessors(body);

        let order = postorder(body);
        let mut postorder_num = vec![None; block_count];
        for (num, &block) in order.iter().enumerate() {
            postorder_num[block.index()] = Some(num as u32);
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; block_count];
        idom[body.entry.index()] = Some(body.entry);

        let rpo: Vec<BlockId> = order.iter().rev().copied().collect();
        let mut changed = true;
        while changed {
            changed = false;
            for &block in &rpo {
                if block == body.entry {
                    continue;
                }
                let mut new_idom: Option<BlockId> = None;
                for &pred in &preds[block.index()] {
                    if idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(other) => intersect(&idom, &postorder_num, pred, other),
                    });
                }
                if new_idom.is_some() && idom[block.index()] != new_idom {
                    idom[block.index()] = new_idom;
                    changed = true;
                }
            }
        }

        Self {
            entry: body.entry,
            idom,
            postorder: postorder_num,
        }
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.postorder[block.index()].is_some()
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom[block.index()]
    }

    /// Whether `a` dominates `b`. Blocks dominate themselves; unreachable
    /// blocks dominate nothing and are dominated by nothing.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        if a == b {
            return true;
        }
        let mut cur = b;
        while cur != self.entry {
            let Some(parent) = self.idom[cur.index()] else {
                return false;
            };
            cur = parent;
            if cur == a {
                return true;
            }
        }
        false
    }
}

fn intersect(
    idom: &[Option<BlockId>],
    postorder: &[Option<u32>],
    a: BlockId,
    b: BlockId,
) -> BlockId {
    let num = |block: BlockId| postorder[block.index()].expect("processed block has a postorder");
    let (mut a, mut b) = (a, b);
    while a != b {
        while num(a) < num(b) {
            a = idom[a.index()].expect("processed block has an idom");
        }
        while num(b) < num(a) {
            b = idom[b.index()].expect("processed block has an idom");
        }
    }
    a
}

fn postorder(body: &Body) -> Vec<BlockId> {
    let mut visited = vec![false; body.blocks.len()];
    let mut order = Vec::with_capacity(body.blocks.len());
    // Iterative DFS; the stack entry tracks the next successor to explore.
    let mut stack = vec![(body.entry, 0usize)];
    visited[body.entry.index()] = true;
    while let Some(&mut (block, next)) = stack.last_mut() {
        let succs = body.block(block).terminator.successors();
        if next < succs.len() {
            stack.last_mut().expect("stack is non-empty").1 += 1;
            let succ = succs[next];
            if !visited[succ.index()] {
                visited[succ.index()] = true;
                stack.push((succ, 0));
            }
        } else {
            order.push(block);
            stack.pop();
        }
    }
    order
}

/// Predecessor lists for every block.
pub fn predecessors(body: &Body) -> Vec<Vec<BlockId>> {
    let mut preds = vec![Vec::new(); body.blocks.len()];
    for (idx, block) in body.blocks.iter().enumerate() {
        let pred = BlockId(idx as u32);
        for succ in block.terminator.successors() {
            preds[succ.index()].push(pred);
        }
    }
    preds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Linkage, Module, Signature};
    use crate::layout::DataLayout;
    use crate::ty::Ty;

    #[test]
    fn diamond_idoms() {
        let mut module = Module::new("test", DataLayout::default());
        let func = module.declare_function(
            "diamond",
            Signature::new(vec![Ty::Int(1)], Ty::Void),
            Linkage::Public,
        );
        let mut b = FunctionBuilder::new(&mut module, func);
        let cond = b.param(0);
        let then_bb = b.make_block();
        let else_bb = b.make_block();
        let join = b.make_block();
        b.branch(cond, then_bb, else_bb);
        b.switch_to(then_bb);
        b.goto(join);
        b.switch_to(else_bb);
        b.goto(join);
        b.switch_to(join);
        b.ret(None);
        b.finish();

        let body = module.function(func).body.as_ref().unwrap();
        let domtree = DomTree::compute(body);
        let entry = body.entry;
        assert!(domtree.dominates(entry, join));
        assert!(!domtree.dominates(then_bb, join));
        assert!(!domtree.dominates(else_bb, join));
        assert_eq!(domtree.idom(join), Some(entry));
    }

    #[test]
    fn unreachable_blocks_are_excluded() {
        let mut module = Module::new("test", DataLayout::default());
        let func = module.declare_function(
            "orphan",
            Signature::new(vec![], Ty::Void),
            Linkage::Public,
        );
        let mut b = FunctionBuilder::new(&mut module, func);
        b.ret(None);
        let orphan = b.make_block();
        b.switch_to(orphan);
        b.ret(None);
        b.finish();

        let body = module.function(func).body.as_ref().unwrap();
        let domtree = DomTree::compute(body);
        assert!(!domtree.is_reachable(orphan));
        assert!(!domtree.dominates(body.entry, orphan));
    }
}
