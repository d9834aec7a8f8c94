//! A function is a CFG of [`Block`]s between a synthetic entry and exit, plus the table of
//! [`Variable`]s its statements refer to.
//!
//! Block ids, version numbers and the HDSE run count are all kept per function, so functions
//! never share mutable state.

use slotmap::DefaultKey;

use crate::{
    block::{Block, BlockAttrs, BlockKind},
    context::Context,
    error::IrError,
    stmt::Stmt,
    variable::{Variable, VariableKind},
};

/// A wrapper around an [ECS](https://github.com/orlp/slotmap) handle into the [`Context`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Function(pub DefaultKey);

#[doc(hidden)]
pub struct FunctionContent {
    pub name: String,
    /// Layout order.  The entry block is always first and the exit block always last.
    pub(crate) blocks: Vec<Block>,
    pub(crate) entry: Block,
    pub(crate) exit: Block,
    pub(crate) variables: Vec<Variable>,
    pub(crate) in_ssa: bool,
    pub(crate) hdse_runs: u32,

    next_block_id: u32,
}

impl Function {
    /// Create a new function with empty entry and exit blocks.
    pub fn new(context: &mut Context, name: &str) -> Function {
        let func = Function(context.functions.insert(FunctionContent {
            name: name.to_owned(),
            blocks: Vec::new(),
            entry: Block(DefaultKey::default()),
            exit: Block(DefaultKey::default()),
            variables: Vec::new(),
            in_ssa: false,
            hdse_runs: 0,
            next_block_id: 2,
        }));
        context.add_function(func);

        let entry = Block::new(context, func, 0, BlockKind::Entry);
        let exit = Block::new(context, func, 1, BlockKind::Exit);
        entry.add_attrs(context, BlockAttrs::ARTIFICIAL);
        exit.add_attrs(context, BlockAttrs::ARTIFICIAL);

        let content = &mut context.functions[func.0];
        content.entry = entry;
        content.exit = exit;
        content.blocks = vec![entry, exit];
        func
    }

    /// Create a new block, placed last in the layout before the exit.
    pub fn create_block(&self, context: &mut Context) -> Block {
        let block = self.new_block(context);
        let blocks = &mut context.functions[self.0].blocks;
        let exit_idx = blocks.len() - 1;
        blocks.insert(exit_idx, block);
        block
    }

    /// Create a new block placed directly after `other` in the layout.
    pub fn create_block_after(&self, context: &mut Context, other: Block) -> Result<Block, IrError> {
        let idx = self
            .layout_position(context, other)
            .ok_or_else(|| IrError::RemoveMissingBlock(other.get_label(context)))?;
        let block = self.new_block(context);
        let blocks = &mut context.functions[self.0].blocks;
        // Nothing goes after the exit.
        let idx = (idx + 1).min(blocks.len() - 1);
        blocks.insert(idx, block);
        Ok(block)
    }

    fn new_block(&self, context: &mut Context) -> Block {
        let content = &mut context.functions[self.0];
        let id = content.next_block_id;
        content.next_block_id += 1;
        Block::new(context, *self, id, BlockKind::Unknown)
    }

    fn layout_position(&self, context: &Context, block: Block) -> Option<usize> {
        context.functions[self.0]
            .blocks
            .iter()
            .position(|b| *b == block)
    }

    /// Unlink `block` from the layout and mark it deleted.  Its edges, statements and phis must
    /// already be gone.
    pub fn remove_block(&self, context: &mut Context, block: Block) -> Result<(), IrError> {
        let idx = self
            .layout_position(context, block)
            .ok_or_else(|| IrError::RemoveMissingBlock(block.get_label(context)))?;
        context.functions[self.0].blocks.remove(idx);
        context.blocks[block.0].deleted = true;
        Ok(())
    }

    /// The block following `block` in the layout, if any.
    pub fn next_in_layout(&self, context: &Context, block: Block) -> Option<Block> {
        let idx = self.layout_position(context, block)?;
        context.functions[self.0].blocks.get(idx + 1).copied()
    }

    pub fn get_name<'a>(&self, context: &'a Context) -> &'a str {
        &context.functions[self.0].name
    }

    pub fn get_entry_block(&self, context: &Context) -> Block {
        context.functions[self.0].entry
    }

    pub fn get_exit_block(&self, context: &Context) -> Block {
        context.functions[self.0].exit
    }

    /// Return an iterator over a snapshot of the blocks, in layout order.
    pub fn block_iter(&self, context: &Context) -> std::vec::IntoIter<Block> {
        context.functions[self.0].blocks.clone().into_iter()
    }

    pub fn num_blocks(&self, context: &Context) -> usize {
        context.functions[self.0].blocks.len()
    }

    /// Return an iterator over every statement, block by block in layout order.
    pub fn stmt_iter(&self, context: &Context) -> impl Iterator<Item = (Block, Stmt)> {
        self.block_iter(context)
            .flat_map(|block| {
                block
                    .stmts(context)
                    .iter()
                    .map(move |stmt| (block, *stmt))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Declare a new variable in this function.
    pub fn new_variable(
        &self,
        context: &mut Context,
        name: &str,
        kind: VariableKind,
        volatile: bool,
    ) -> Variable {
        let var = Variable::new(context, *self, name.to_owned(), kind, volatile);
        context.functions[self.0].variables.push(var);
        var
    }

    pub fn get_variable(&self, context: &Context, name: &str) -> Option<Variable> {
        self.variables(context)
            .iter()
            .find(|var| var.get_name(context) == name)
            .copied()
    }

    /// The variable table, in declaration order.
    pub fn variables<'a>(&self, context: &'a Context) -> &'a [Variable] {
        &context.functions[self.0].variables
    }

    /// The variables the SSA builder renamed.
    pub fn renamed_variables(&self, context: &Context) -> Vec<Variable> {
        self.variables(context)
            .iter()
            .filter(|var| var.is_renamed(context))
            .copied()
            .collect()
    }

    pub fn is_in_ssa(&self, context: &Context) -> bool {
        context.functions[self.0].in_ssa
    }

    pub(crate) fn set_in_ssa(&self, context: &mut Context) {
        context.functions[self.0].in_ssa = true;
    }

    pub fn hdse_runs(&self, context: &Context) -> u32 {
        context.functions[self.0].hdse_runs
    }

    pub(crate) fn bump_hdse_runs(&self, context: &mut Context) -> u32 {
        let content = &mut context.functions[self.0];
        content.hdse_runs += 1;
        content.hdse_runs
    }
}
