//! Phi nodes merge the versions of one variable arriving from each predecessor of a block.
//!
//! A phi has exactly one operand per predecessor of its block, in predecessor order.  The
//! [`Block`] edge helpers keep this true whenever the CFG is edited.

use slotmap::DefaultKey;

use crate::{
    block::Block,
    context::Context,
    variable::{UseSite, Variable, Version, VersionDef},
};

/// A wrapper around an [ECS](https://github.com/orlp/slotmap) handle into the [`Context`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Phi(pub DefaultKey);

#[doc(hidden)]
pub struct PhiContent {
    pub block: Block,
    pub variable: Variable,
    pub(crate) result: Version,
    pub(crate) operands: Vec<Version>,
    pub(crate) live: bool,
    pub(crate) deleted: bool,
}

impl Phi {
    /// Append a new phi for `variable` to `block`.  The result and every operand start as the
    /// zero version; the SSA renamer fills them in.
    pub fn new(context: &mut Context, block: Block, variable: Variable) -> Phi {
        let zero = variable.zero_version(context);
        let num_preds = block.num_predecessors(context);
        let phi = Phi(context.phis.insert(PhiContent {
            block,
            variable,
            result: zero,
            operands: vec![zero; num_preds],
            live: false,
            deleted: false,
        }));
        for _ in 0..num_preds {
            zero.add_use(context, UseSite::Phi(phi));
        }
        context.blocks[block.0].phis.push(phi);
        phi
    }

    pub fn get_block(&self, context: &Context) -> Block {
        context.phis[self.0].block
    }

    pub fn get_variable(&self, context: &Context) -> Variable {
        context.phis[self.0].variable
    }

    pub fn get_result(&self, context: &Context) -> Version {
        context.phis[self.0].result
    }

    pub fn set_result(&self, context: &mut Context, new: Version) {
        let old = std::mem::replace(&mut context.phis[self.0].result, new);
        old.clear_def_if(context, VersionDef::Phi(*self));
        if !new.is_zero(context) {
            new.set_def(context, VersionDef::Phi(*self));
        }
    }

    pub fn operands<'a>(&self, context: &'a Context) -> &'a [Version] {
        &context.phis[self.0].operands
    }

    pub fn get_operand(&self, context: &Context, idx: usize) -> Option<Version> {
        context.phis[self.0].operands.get(idx).copied()
    }

    pub fn num_operands(&self, context: &Context) -> usize {
        context.phis[self.0].operands.len()
    }

    pub fn set_operand(&self, context: &mut Context, idx: usize, new: Version) {
        let old = std::mem::replace(&mut context.phis[self.0].operands[idx], new);
        if old != new {
            old.remove_use(context, UseSite::Phi(*self));
            new.add_use(context, UseSite::Phi(*self));
        }
    }

    pub(crate) fn push_operand(&self, context: &mut Context, version: Version) {
        context.phis[self.0].operands.push(version);
        version.add_use(context, UseSite::Phi(*self));
    }

    pub(crate) fn remove_operand(&self, context: &mut Context, idx: usize) -> Version {
        let old = context.phis[self.0].operands.remove(idx);
        old.remove_use(context, UseSite::Phi(*self));
        old
    }

    /// Set by HDSE on the phis it keeps.
    pub fn is_live(&self, context: &Context) -> bool {
        context.phis[self.0].live
    }

    pub(crate) fn set_live(&self, context: &mut Context, live: bool) {
        context.phis[self.0].live = live;
    }

    pub fn is_deleted(&self, context: &Context) -> bool {
        context.phis[self.0].deleted
    }

    /// Unlink this phi from its block and its operands' use lists.
    pub fn remove(&self, context: &mut Context) {
        if self.is_deleted(context) {
            return;
        }
        let block = self.get_block(context);
        context.blocks[block.0].phis.retain(|phi| phi != self);
        let operands = std::mem::take(&mut context.phis[self.0].operands);
        for operand in operands {
            operand.remove_use(context, UseSite::Phi(*self));
        }
        let result = self.get_result(context);
        result.clear_def_if(context, VersionDef::Phi(*self));
        context.phis[self.0].deleted = true;
    }
}
