//! Represents a 'basic block' of [`Stmt`]s in a control flow graph.
//!
//! [`Block`]s contain zero or more statements, of which only the last may be a terminator, and
//! an ordered list of [`Phi`]s.  Edges are kept on both sides: the successor list of the source
//! and the predecessor list of the target, duplicates allowed.  Normal successors come first;
//! exceptional edges into catch and finally handlers follow them.
//!
//! All CFG edits go through the edge helpers here, which add and drop phi operands in lockstep
//! with the predecessor list.
//!
//! Every [`Function`] has a synthetic entry block (id 0) and exit block (id 1).

use bitflags::bitflags;
use slotmap::DefaultKey;

use crate::{
    context::Context,
    error::IrError,
    function::Function,
    phi::Phi,
    stmt::{Stmt, StmtInserter, StmtOp},
    variable::Version,
};

/// A wrapper around an [ECS](https://github.com/orlp/slotmap) handle into the [`Context`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Block(pub DefaultKey);

/// How control leaves a block.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum BlockKind {
    /// Not terminated yet.
    Unknown,
    Entry,
    Exit,
    /// Falls into its single successor without a statement.
    Fallthrough,
    Goto,
    CondGoto,
    Switch,
    Return,
    Throw,
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BlockKind::Unknown => "unknown",
            BlockKind::Entry => "entry",
            BlockKind::Exit => "exit",
            BlockKind::Fallthrough => "fallthrough",
            BlockKind::Goto => "goto",
            BlockKind::CondGoto => "condgoto",
            BlockKind::Switch => "switch",
            BlockKind::Return => "return",
            BlockKind::Throw => "throw",
        };
        f.write_str(name)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    /// Structural facts about a block.
    pub struct BlockAttrs: u16 {
        /// The block is inside a try region.
        const TRY = 0x0001;
        /// The block closes a try region.
        const TRY_END = 0x0002;
        /// The block starts a catch handler.
        const CATCH = 0x0004;
        /// The block starts a finally handler.
        const FINALLY = 0x0008;
        const LOOP_HEADER = 0x0010;
        /// The block received phis.
        const JOIN = 0x0020;
        /// No path leads from the block to the exit.
        const WONT_EXIT = 0x0040;
        /// The synthetic entry and exit blocks.
        const ARTIFICIAL = 0x0080;
    }
}

#[doc(hidden)]
pub struct BlockContent {
    pub id: u32,
    pub function: Function,
    pub kind: BlockKind,
    pub attrs: BlockAttrs,
    pub(crate) stmts: Vec<Stmt>,
    pub(crate) phis: Vec<Phi>,
    pub(crate) preds: Vec<Block>,
    pub(crate) succs: Vec<Block>,
    pub(crate) eh_succs: Vec<Block>,
    pub(crate) deleted: bool,
}

impl Block {
    pub(crate) fn new(context: &mut Context, function: Function, id: u32, kind: BlockKind) -> Block {
        Block(context.blocks.insert(BlockContent {
            id,
            function,
            kind,
            attrs: BlockAttrs::empty(),
            stmts: Vec::new(),
            phis: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
            eh_succs: Vec::new(),
            deleted: false,
        }))
    }

    pub fn get_id(&self, context: &Context) -> u32 {
        context.blocks[self.0].id
    }

    /// A printable name, `bb<id>`.
    pub fn get_label(&self, context: &Context) -> String {
        format!("bb{}", self.get_id(context))
    }

    /// Get the parent function for this block.
    pub fn get_function(&self, context: &Context) -> Function {
        context.blocks[self.0].function
    }

    pub fn get_kind(&self, context: &Context) -> BlockKind {
        context.blocks[self.0].kind
    }

    pub fn set_kind(&self, context: &mut Context, kind: BlockKind) {
        context.blocks[self.0].kind = kind;
    }

    pub fn attrs(&self, context: &Context) -> BlockAttrs {
        context.blocks[self.0].attrs
    }

    pub fn has_attr(&self, context: &Context, attr: BlockAttrs) -> bool {
        context.blocks[self.0].attrs.intersects(attr)
    }

    pub fn add_attrs(&self, context: &mut Context, attrs: BlockAttrs) {
        context.blocks[self.0].attrs.insert(attrs);
    }

    pub fn remove_attrs(&self, context: &mut Context, attrs: BlockAttrs) {
        context.blocks[self.0].attrs.remove(attrs);
    }

    pub fn is_deleted(&self, context: &Context) -> bool {
        context.blocks[self.0].deleted
    }

    /// The kind of the entry changes once it is given a successor, so compare against the
    /// function instead.
    pub fn is_entry(&self, context: &Context) -> bool {
        self.get_function(context).get_entry_block(context) == *self
    }

    pub fn is_exit(&self, context: &Context) -> bool {
        self.get_function(context).get_exit_block(context) == *self
    }

    /// Create a new [`StmtInserter`] to more easily append statements to this block.
    pub fn append<'a>(&self, context: &'a mut Context) -> StmtInserter<'a> {
        StmtInserter::new(context, *self)
    }

    /// End this block without a terminator, continuing at `next`.
    pub fn set_fallthrough(&self, context: &mut Context, next: Block) {
        self.set_kind(context, BlockKind::Fallthrough);
        self.add_successor(context, next);
    }

    //
    // Statements and phis.
    //

    pub fn stmts<'a>(&self, context: &'a Context) -> &'a [Stmt] {
        &context.blocks[self.0].stmts
    }

    /// Return an iterator over a snapshot of the statements, so the block may be edited while
    /// iterating.
    pub fn stmt_iter(&self, context: &Context) -> std::vec::IntoIter<Stmt> {
        self.stmts(context).to_vec().into_iter()
    }

    pub fn num_stmts(&self, context: &Context) -> usize {
        context.blocks[self.0].stmts.len()
    }

    pub fn last_stmt(&self, context: &Context) -> Option<Stmt> {
        context.blocks[self.0].stmts.last().copied()
    }

    pub fn get_terminator(&self, context: &Context) -> Option<Stmt> {
        self.last_stmt(context)
            .filter(|stmt| stmt.is_terminator(context))
    }

    /// The statement deciding between several normal successors, if any.
    pub fn get_predicate(&self, context: &Context) -> Option<Stmt> {
        self.get_terminator(context).filter(|stmt| {
            matches!(
                stmt.get_op(context),
                StmtOp::CondGoto { .. } | StmtOp::Switch { .. }
            )
        })
    }

    pub fn phis<'a>(&self, context: &'a Context) -> &'a [Phi] {
        &context.blocks[self.0].phis
    }

    pub fn phi_iter(&self, context: &Context) -> std::vec::IntoIter<Phi> {
        self.phis(context).to_vec().into_iter()
    }

    pub fn num_phis(&self, context: &Context) -> usize {
        context.blocks[self.0].phis.len()
    }

    /// No statements and no phis.
    pub fn is_empty(&self, context: &Context) -> bool {
        let content = &context.blocks[self.0];
        content.stmts.is_empty() && content.phis.is_empty()
    }

    /// Insert a statement built from `op` just before `before`.
    pub fn insert_stmt_before(&self, context: &mut Context, before: Stmt, op: StmtOp) -> Stmt {
        let stmt = Stmt::new(context, *self, op);
        let stmts = &mut context.blocks[self.0].stmts;
        let idx = stmts
            .iter()
            .position(|existing| *existing == before)
            .unwrap_or(stmts.len());
        stmts.insert(idx, stmt);
        stmt
    }

    /// Insert a statement built from `op` at index `idx` of the block.
    pub fn insert_stmt_at(&self, context: &mut Context, idx: usize, op: StmtOp) -> Stmt {
        let stmt = Stmt::new(context, *self, op);
        let stmts = &mut context.blocks[self.0].stmts;
        stmts.insert(idx.min(stmts.len()), stmt);
        stmt
    }

    //
    // Edges.
    //

    pub fn preds<'a>(&self, context: &'a Context) -> &'a [Block] {
        &context.blocks[self.0].preds
    }

    pub fn pred_iter(&self, context: &Context) -> std::vec::IntoIter<Block> {
        self.preds(context).to_vec().into_iter()
    }

    pub fn num_predecessors(&self, context: &Context) -> usize {
        context.blocks[self.0].preds.len()
    }

    pub fn has_pred(&self, context: &Context, pred: Block) -> bool {
        context.blocks[self.0].preds.contains(&pred)
    }

    /// Index of the first predecessor slot held by `pred`.
    pub fn pred_position(&self, context: &Context, pred: Block) -> Option<usize> {
        context.blocks[self.0]
            .preds
            .iter()
            .position(|block| *block == pred)
    }

    /// The normal successors, in the order the terminator implies.
    pub fn succs<'a>(&self, context: &'a Context) -> &'a [Block] {
        &context.blocks[self.0].succs
    }

    /// The exceptional successors, i.e. handlers of the enclosing try region.
    pub fn eh_succs<'a>(&self, context: &'a Context) -> &'a [Block] {
        &context.blocks[self.0].eh_succs
    }

    /// Every successor: normal ones first, then exceptional ones.
    pub fn successors(&self, context: &Context) -> Vec<Block> {
        let content = &context.blocks[self.0];
        content
            .succs
            .iter()
            .chain(content.eh_succs.iter())
            .copied()
            .collect()
    }

    pub fn num_successors(&self, context: &Context) -> usize {
        let content = &context.blocks[self.0];
        content.succs.len() + content.eh_succs.len()
    }

    /// The operand each phi of this block receives through predecessor slot `pos`.
    pub fn phi_operands_at(&self, context: &Context, pos: usize) -> Vec<Version> {
        self.phis(context)
            .iter()
            .filter_map(|phi| phi.get_operand(context, pos))
            .collect()
    }

    /// Add a normal edge to `to`.  Phis of `to` receive the zero version of their variable for
    /// the new slot.
    pub fn add_successor(&self, context: &mut Context, to: Block) {
        context.blocks[self.0].succs.push(to);
        to.push_pred_zero(context, *self);
    }

    /// Add an exceptional edge to the handler `to`.
    pub fn add_eh_successor(&self, context: &mut Context, to: Block) {
        context.blocks[self.0].eh_succs.push(to);
        to.push_pred_zero(context, *self);
    }

    fn push_pred_zero(&self, context: &mut Context, pred: Block) {
        let operands: Vec<Version> = self
            .phis(context)
            .iter()
            .map(|phi| phi.get_variable(context).zero_version(context))
            .collect();
        context.blocks[self.0].preds.push(pred);
        for (phi, operand) in self.phi_iter(context).zip(operands) {
            phi.push_operand(context, operand);
        }
    }

    /// Append `pred` to the predecessor list, giving each phi the matching entry of `operands`.
    pub(crate) fn push_pred(
        &self,
        context: &mut Context,
        pred: Block,
        operands: &[Version],
    ) -> Result<(), IrError> {
        let phis = self.phis(context).to_vec();
        if phis.len() != operands.len() {
            return Err(self.arity_error(context, phis.first().copied(), operands.len()));
        }
        context.blocks[self.0].preds.push(pred);
        for (phi, operand) in phis.into_iter().zip(operands) {
            phi.push_operand(context, *operand);
        }
        Ok(())
    }

    /// Drop the last predecessor slot held by `pred` along with the phi operands for it.  Returns
    /// the position which was removed.
    pub(crate) fn remove_pred(&self, context: &mut Context, pred: Block) -> Result<usize, IrError> {
        let pos = context.blocks[self.0]
            .preds
            .iter()
            .rposition(|block| *block == pred)
            .ok_or_else(|| IrError::MissingPredecessor {
                block: self.get_label(context),
                pred: pred.get_label(context),
            })?;
        for phi in self.phi_iter(context) {
            if phi.num_operands(context) <= pos {
                return Err(self.arity_error(context, Some(phi), phi.num_operands(context)));
            }
            phi.remove_operand(context, pos);
        }
        context.blocks[self.0].preds.remove(pos);
        Ok(pos)
    }

    /// Remove the normal edge at `idx` of the successor list.  The terminator is left alone.
    pub fn remove_successor_at(&self, context: &mut Context, idx: usize) -> Result<Block, IrError> {
        let succ = context.blocks[self.0].succs.remove(idx);
        succ.remove_pred(context, *self)?;
        Ok(succ)
    }

    /// Remove every exceptional edge out of this block.
    pub fn remove_eh_successors(&self, context: &mut Context) -> Result<(), IrError> {
        let handlers = std::mem::take(&mut context.blocks[self.0].eh_succs);
        for handler in handlers {
            handler.remove_pred(context, *self)?;
        }
        Ok(())
    }

    /// Redirect every normal edge to `old_succ` so that it reaches `new_succ` instead, rewriting
    /// embedded branch targets.  Each new predecessor slot of `new_succ` takes `operands`, one per
    /// phi.  Returns the number of edges redirected.
    pub fn redirect_successor(
        &self,
        context: &mut Context,
        old_succ: Block,
        new_succ: Block,
        operands: &[Version],
    ) -> Result<usize, IrError> {
        let mut count = 0;
        for succ in context.blocks[self.0].succs.iter_mut() {
            if *succ == old_succ {
                *succ = new_succ;
                count += 1;
            }
        }
        for _ in 0..count {
            old_succ.remove_pred(context, *self)?;
            new_succ.push_pred(context, *self, operands)?;
        }
        if let Some(term) = self.get_terminator(context) {
            let mut op = term.get_op(context).clone();
            if op.replace_target(old_succ, new_succ) {
                term.replace_op(context, op);
            }
        }
        Ok(count)
    }

    fn arity_error(&self, context: &Context, phi: Option<Phi>, operands: usize) -> IrError {
        IrError::PhiArityMismatch {
            var: phi
                .map(|phi| phi.get_variable(context).get_name(context).to_owned())
                .unwrap_or_default(),
            block: self.get_label(context),
            operands,
            preds: self.num_predecessors(context),
        }
    }
}
