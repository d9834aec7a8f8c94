//! Removal of blocks which cannot be reached from the entry.
//!
//! Both normal and exceptional edges count for reachability.  A surviving block which is left
//! with a single predecessor has its phis turned into plain copies, since there is nothing left to
//! merge.

use rustc_hash::FxHashSet;

use crate::{
    block::{Block, BlockAttrs},
    context::Context,
    error::IrError,
    function::Function,
    pass_manager::{AnalysisResults, Pass, PassEnv, PassMutability},
    stmt::{Expr, StmtOp},
};

pub const UNREACHABLE_NAME: &str = "unreachable";

pub fn create_unreachable_pass() -> Pass {
    Pass {
        name: UNREACHABLE_NAME,
        descr: "Removal of blocks unreachable from the entry",
        deps: vec![],
        runner: PassMutability::Transform(unreachable),
    }
}

fn unreachable(
    context: &mut Context,
    _: &AnalysisResults,
    function: Function,
    _: &mut PassEnv,
) -> Result<bool, IrError> {
    remove_unreachable_blocks(context, function)
}

/// The blocks reachable from the entry.
pub fn reachable_blocks(context: &Context, function: Function) -> FxHashSet<Block> {
    let entry = function.get_entry_block(context);
    let mut reachable = FxHashSet::default();
    reachable.insert(entry);
    let mut worklist = vec![entry];
    while let Some(block) = worklist.pop() {
        for succ in block.successors(context) {
            if reachable.insert(succ) {
                worklist.push(succ);
            }
        }
    }
    reachable
}

/// Delete every block other than the exit which the entry cannot reach.  Returns whether any
/// block was deleted.
pub fn remove_unreachable_blocks(context: &mut Context, function: Function) -> Result<bool, IrError> {
    let reachable = reachable_blocks(context, function);
    let exit = function.get_exit_block(context);
    let dead: Vec<Block> = function
        .block_iter(context)
        .filter(|block| *block != exit && !reachable.contains(block))
        .collect();
    if dead.is_empty() {
        return Ok(false);
    }
    let dead_set: FxHashSet<Block> = dead.iter().copied().collect();

    // Surviving blocks which lost a predecessor.
    let mut touched = Vec::<Block>::new();
    for block in &dead {
        tracing::debug!(
            "{}: removing unreachable block {}",
            function.get_name(context),
            block.get_label(context)
        );
        if block.has_attr(context, BlockAttrs::TRY_END) {
            move_try_end(context, function, *block, &dead_set);
        }
        for stmt in block.stmt_iter(context) {
            stmt.remove(context);
        }
        for phi in block.phi_iter(context) {
            phi.remove(context);
        }
        for succ in block.successors(context) {
            if dead_set.contains(&succ) {
                continue;
            }
            succ.remove_pred(context, *block)?;
            if !touched.contains(&succ) {
                touched.push(succ);
            }
        }
    }

    for block in &dead {
        let content = &mut context.blocks[block.0];
        content.preds.clear();
        content.succs.clear();
        content.eh_succs.clear();
        function.remove_block(context, *block)?;
    }

    for block in touched {
        if block.num_predecessors(context) == 1 {
            phis_to_copies(context, block);
        }
    }
    Ok(true)
}

// The try region still needs an end marker when its last block goes.
fn move_try_end(context: &mut Context, function: Function, block: Block, dead: &FxHashSet<Block>) {
    let prev = function
        .block_iter(context)
        .take_while(|b| *b != block)
        .filter(|b| !dead.contains(b))
        .last();
    if let Some(prev) = prev {
        if prev.has_attr(context, BlockAttrs::TRY) {
            prev.add_attrs(context, BlockAttrs::TRY_END);
        }
    }
}

/// Replace each phi of a single predecessor block by a copy of its only operand, keeping the
/// phi order at the head of the block.
fn phis_to_copies(context: &mut Context, block: Block) {
    let mut idx = 0;
    for phi in block.phi_iter(context) {
        let Some(operand) = phi.get_operand(context, 0) else {
            continue;
        };
        let result = phi.get_result(context);
        phi.remove(context);
        block.insert_stmt_at(
            context,
            idx,
            StmtOp::Assign {
                dst: result,
                value: Expr::Var(operand),
            },
        );
        idx += 1;
    }
    block.remove_attrs(context, BlockAttrs::JOIN);
}
