//! Collapsing of try regions which HDSE left empty.
//!
//! A try region opens with a block holding nothing but the `Try` statement and, once its body is
//! gone, is directly followed in the layout by its empty `TRY_END` block.  Such a pair protects
//! nothing, so the predecessors of the try block are sent straight to where the try-end block
//! leads.  The handlers usually become unreachable along with the pair and are swept away.
//!
//! Run this after HDSE; before it the try bodies are rarely empty.

use itertools::Itertools;
use rustc_hash::FxHashSet;

use crate::{
    block::{Block, BlockAttrs},
    context::Context,
    error::IrError,
    function::Function,
    optimize::remove_unreachable_blocks,
    pass_manager::{AnalysisResults, Pass, PassEnv, PassMutability},
    stmt::StmtOp,
};

pub const TRY_CLEANUP_NAME: &str = "try-cleanup";

pub fn create_try_cleanup_pass() -> Pass {
    Pass {
        name: TRY_CLEANUP_NAME,
        descr: "Removal of empty try regions",
        deps: vec![],
        runner: PassMutability::Transform(try_cleanup),
    }
}

fn try_cleanup(
    context: &mut Context,
    _: &AnalysisResults,
    function: Function,
    _: &mut PassEnv,
) -> Result<bool, IrError> {
    collapse_empty_try_regions(context, function)
}

/// Bypass every empty try region of `function`.  Returns whether any was found.
///
/// A try block entered through an exceptional edge can't be bypassed yet; this is reported as
/// [`IrError::Unsupported`] before anything is changed.
pub fn collapse_empty_try_regions(context: &mut Context, function: Function) -> Result<bool, IrError> {
    let regions: Vec<(Block, Block)> = function
        .block_iter(context)
        .tuple_windows()
        .filter(|(try_block, try_end)| is_empty_region(context, *try_block, *try_end))
        .collect();
    if regions.is_empty() {
        return Ok(false);
    }

    for (try_block, _) in &regions {
        let entered_exceptionally = try_block
            .preds(context)
            .iter()
            .any(|pred| pred.eh_succs(context).contains(try_block));
        if entered_exceptionally {
            return Err(IrError::Unsupported {
                pass: TRY_CLEANUP_NAME,
                function: function.get_name(context).to_owned(),
                reason: format!(
                    "try block {} is entered through an exceptional edge",
                    try_block.get_label(context)
                ),
            });
        }
    }

    for (try_block, try_end) in regions {
        let target = try_end.succs(context)[0];
        let Some(slot) = target.pred_position(context, try_end) else {
            return Err(IrError::MissingPredecessor {
                block: target.get_label(context),
                pred: try_end.get_label(context),
            });
        };
        // The phis of the target receive what used to arrive through the try-end block.
        let operands = target.phi_operands_at(context, slot);

        let mut seen = FxHashSet::<Block>::default();
        for pred in try_block.pred_iter(context) {
            if seen.insert(pred) {
                pred.redirect_successor(context, try_block, target, &operands)?;
            }
        }
        tracing::debug!(
            "{}: bypassed empty try region {} .. {}",
            function.get_name(context),
            try_block.get_label(context),
            try_end.get_label(context)
        );
    }

    remove_unreachable_blocks(context, function)?;
    Ok(true)
}

fn is_empty_region(context: &Context, try_block: Block, try_end: Block) -> bool {
    let opens_try = try_block.has_attr(context, BlockAttrs::TRY)
        && !try_block.has_attr(context, BlockAttrs::TRY_END)
        && try_block.num_phis(context) == 0
        && matches!(
            try_block.stmts(context),
            [only] if matches!(only.get_op(context), StmtOp::Try { .. })
        );
    opens_try
        && try_end.has_attr(context, BlockAttrs::TRY_END)
        && try_end.is_empty(context)
        && try_end
            .succs(context)
            .first()
            .is_some_and(|target| *target != try_block && *target != try_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Severity, stmt::Expr};

    // entry -> try [handler] -> try_end -> join, handler -> join
    fn empty_try(context: &mut Context) -> (Function, [Block; 4]) {
        let func = Function::new(context, "f");
        let entry = func.get_entry_block(context);
        let try_block = func.create_block(context);
        let try_end = func.create_block(context);
        let handler = func.create_block(context);
        let join = func.create_block(context);

        entry.set_fallthrough(context, try_block);
        try_block.append(context).try_region(vec![handler]);
        try_block.set_fallthrough(context, try_end);
        try_end.add_attrs(context, BlockAttrs::TRY | BlockAttrs::TRY_END);
        try_end.set_fallthrough(context, join);
        handler.append(context).catch();
        handler.append(context).goto(join);
        join.append(context).ret(Some(Expr::Const(0)));
        (func, [try_block, try_end, handler, join])
    }

    #[test]
    fn empty_region_is_bypassed() {
        let mut context = Context::new();
        let (func, [try_block, try_end, handler, join]) = empty_try(&mut context);
        let entry = func.get_entry_block(&context);

        assert!(collapse_empty_try_regions(&mut context, func).unwrap());
        assert_eq!(entry.succs(&context), &[join]);
        assert_eq!(join.preds(&context), &[entry]);
        assert!(try_block.is_deleted(&context));
        assert!(try_end.is_deleted(&context));
        assert!(handler.is_deleted(&context));

        assert!(!collapse_empty_try_regions(&mut context, func).unwrap());
    }

    #[test]
    fn exceptional_entry_is_unsupported() {
        let mut context = Context::new();
        let (func, [try_block, ..]) = empty_try(&mut context);
        let entry = func.get_entry_block(&context);
        // Make the try block a handler of some other region as well.
        entry.add_eh_successor(&mut context, try_block);

        let err = collapse_empty_try_regions(&mut context, func).unwrap_err();
        assert_eq!(err.severity(), Severity::Unsupported);
        assert!(!try_block.is_deleted(&context));
        assert_eq!(try_block.num_predecessors(&context), 2);
    }
}
