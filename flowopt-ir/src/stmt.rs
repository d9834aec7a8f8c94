//! Statements and the expressions they are built from.
//!
//! A [`Stmt`] is a handle to a [`StmtContent`] which holds a [`StmtOp`], the may-def and may-use
//! annotations added for memory SSA, and the owning [`Block`].  Expressions are plain trees
//! ([`Expr`]) whose leaves refer to [`Version`]s.
//!
//! Every mutation of a statement goes through the methods here so that the use lists of the
//! versions involved always mirror the operands exactly.

use slotmap::DefaultKey;

use crate::{
    block::{Block, BlockKind},
    context::Context,
    variable::{UseSite, Variable, Version, VersionDef},
};

/// A wrapper around an [ECS](https://github.com/orlp/slotmap) handle into the [`Context`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Stmt(pub DefaultKey);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

/// A side effect free expression tree, apart from volatile loads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Const(i64),
    Var(Version),
    AddrOf(Variable),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Load { addr: Box<Expr>, volatile: bool },
}

impl Expr {
    pub fn unary(op: UnaryOp, arg: Expr) -> Expr {
        Expr::Unary(op, Box::new(arg))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn load(addr: Expr) -> Expr {
        Expr::Load {
            addr: Box::new(addr),
            volatile: false,
        }
    }

    pub fn volatile_load(addr: Expr) -> Expr {
        Expr::Load {
            addr: Box::new(addr),
            volatile: true,
        }
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            Expr::Const(value) => Some(*value),
            _ => None,
        }
    }

    /// Call `f` for every version read, once per occurrence, left to right.
    pub fn for_each_version(&self, f: &mut impl FnMut(Version)) {
        match self {
            Expr::Const(_) | Expr::AddrOf(_) => (),
            Expr::Var(version) => f(*version),
            Expr::Unary(_, arg) => arg.for_each_version(f),
            Expr::Binary(_, lhs, rhs) => {
                lhs.for_each_version(f);
                rhs.for_each_version(f);
            }
            Expr::Load { addr, .. } => addr.for_each_version(f),
        }
    }

    pub fn versions(&self) -> Vec<Version> {
        let mut versions = Vec::new();
        self.for_each_version(&mut |version| versions.push(version));
        versions
    }

    /// Replace every occurrence of `old` with `new`, returning how many were replaced.
    pub fn replace_version(&mut self, old: Version, new: Version) -> usize {
        match self {
            Expr::Const(_) | Expr::AddrOf(_) => 0,
            Expr::Var(version) => {
                if *version == old {
                    *version = new;
                    1
                } else {
                    0
                }
            }
            Expr::Unary(_, arg) => arg.replace_version(old, new),
            Expr::Binary(_, lhs, rhs) => {
                lhs.replace_version(old, new) + rhs.replace_version(old, new)
            }
            Expr::Load { addr, .. } => addr.replace_version(old, new),
        }
    }

    pub fn has_load(&self) -> bool {
        match self {
            Expr::Const(_) | Expr::Var(_) | Expr::AddrOf(_) => false,
            Expr::Unary(_, arg) => arg.has_load(),
            Expr::Binary(_, lhs, rhs) => lhs.has_load() || rhs.has_load(),
            Expr::Load { .. } => true,
        }
    }

    pub fn has_volatile_load(&self) -> bool {
        match self {
            Expr::Const(_) | Expr::Var(_) | Expr::AddrOf(_) => false,
            Expr::Unary(_, arg) => arg.has_volatile_load(),
            Expr::Binary(_, lhs, rhs) => lhs.has_volatile_load() || rhs.has_volatile_load(),
            Expr::Load { addr, volatile } => *volatile || addr.has_volatile_load(),
        }
    }

    /// Push the address expression of every load in this tree, outermost first.
    pub fn collect_load_bases(&self, bases: &mut Vec<Expr>) {
        match self {
            Expr::Const(_) | Expr::Var(_) | Expr::AddrOf(_) => (),
            Expr::Unary(_, arg) => arg.collect_load_bases(bases),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_load_bases(bases);
                rhs.collect_load_bases(bases);
            }
            Expr::Load { addr, .. } => {
                bases.push(addr.as_ref().clone());
                addr.collect_load_bases(bases);
            }
        }
    }

    /// Whether any version of `var`, or its address, appears in this tree.
    pub fn mentions(&self, context: &Context, var: Variable) -> bool {
        match self {
            Expr::Const(_) => false,
            Expr::Var(version) => version.get_variable(context) == var,
            Expr::AddrOf(addr_var) => *addr_var == var,
            Expr::Unary(_, arg) => arg.mentions(context, var),
            Expr::Binary(_, lhs, rhs) => lhs.mentions(context, var) || rhs.mentions(context, var),
            Expr::Load { addr, .. } => addr.mentions(context, var),
        }
    }
}

/// The operation performed by a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StmtOp {
    Assign {
        dst: Version,
        value: Expr,
    },
    /// Write `value` through the pointer `addr`.
    Store {
        addr: Expr,
        value: Expr,
        volatile: bool,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
        result: Option<Version>,
    },
    AssertNonNull(Expr),
    /// Jump to `target` when `cond` is non-zero, otherwise fall through.
    CondGoto {
        cond: Expr,
        target: Block,
    },
    Goto {
        target: Block,
    },
    Switch {
        value: Expr,
        default: Block,
        cases: Vec<(i64, Block)>,
    },
    Return(Option<Expr>),
    Throw(Expr),
    /// Opens a try region whose exceptions are delivered to `handlers`.
    Try {
        handlers: Vec<Block>,
    },
    /// The entry of a catch or finally handler.
    Catch,
    Comment(String),
}

impl StmtOp {
    pub fn operands(&self) -> Vec<&Expr> {
        match self {
            StmtOp::Assign { value, .. } => vec![value],
            StmtOp::Store { addr, value, .. } => vec![addr, value],
            StmtOp::Call { args, .. } => args.iter().collect(),
            StmtOp::AssertNonNull(expr) | StmtOp::Throw(expr) => vec![expr],
            StmtOp::CondGoto { cond, .. } => vec![cond],
            StmtOp::Switch { value, .. } => vec![value],
            StmtOp::Return(value) => value.iter().collect(),
            StmtOp::Goto { .. } | StmtOp::Try { .. } | StmtOp::Catch | StmtOp::Comment(_) => {
                vec![]
            }
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            StmtOp::Assign { value, .. } => vec![value],
            StmtOp::Store { addr, value, .. } => vec![addr, value],
            StmtOp::Call { args, .. } => args.iter_mut().collect(),
            StmtOp::AssertNonNull(expr) | StmtOp::Throw(expr) => vec![expr],
            StmtOp::CondGoto { cond, .. } => vec![cond],
            StmtOp::Switch { value, .. } => vec![value],
            StmtOp::Return(value) => value.iter_mut().collect(),
            StmtOp::Goto { .. } | StmtOp::Try { .. } | StmtOp::Catch | StmtOp::Comment(_) => {
                vec![]
            }
        }
    }

    /// Every version read by the operands, once per occurrence.
    pub fn operand_versions(&self) -> Vec<Version> {
        let mut versions = Vec::new();
        for operand in self.operands() {
            operand.for_each_version(&mut |version| versions.push(version));
        }
        versions
    }

    /// The version written directly by this operation.
    pub fn def(&self) -> Option<Version> {
        match self {
            StmtOp::Assign { dst, .. } => Some(*dst),
            StmtOp::Call { result, .. } => *result,
            _ => None,
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            StmtOp::CondGoto { .. }
                | StmtOp::Goto { .. }
                | StmtOp::Switch { .. }
                | StmtOp::Return(_)
                | StmtOp::Throw(_)
        )
    }

    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            StmtOp::CondGoto { .. } | StmtOp::Goto { .. } | StmtOp::Switch { .. }
        )
    }

    /// The block kind implied by this operation when it terminates a block.
    pub fn terminator_kind(&self) -> Option<BlockKind> {
        match self {
            StmtOp::CondGoto { .. } => Some(BlockKind::CondGoto),
            StmtOp::Goto { .. } => Some(BlockKind::Goto),
            StmtOp::Switch { .. } => Some(BlockKind::Switch),
            StmtOp::Return(_) => Some(BlockKind::Return),
            StmtOp::Throw(_) => Some(BlockKind::Throw),
            _ => None,
        }
    }

    /// Rewrite every embedded branch target equal to `old`.  Returns whether anything changed.
    pub fn replace_target(&mut self, old: Block, new: Block) -> bool {
        let mut changed = false;
        let mut swap = |block: &mut Block| {
            if *block == old {
                *block = new;
                changed = true;
            }
        };
        match self {
            StmtOp::CondGoto { target, .. } | StmtOp::Goto { target } => swap(target),
            StmtOp::Switch { default, cases, .. } => {
                swap(default);
                for (_, block) in cases.iter_mut() {
                    swap(block);
                }
            }
            StmtOp::Try { handlers } => {
                for handler in handlers.iter_mut() {
                    swap(handler);
                }
            }
            _ => (),
        }
        changed
    }
}

/// A possible definition of a memory variable as a side effect of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MayDef {
    pub variable: Variable,
    /// The version created here.
    pub result: Version,
    /// The version which reaches the statement and may survive it.
    pub operand: Version,
}

#[doc(hidden)]
pub struct StmtContent {
    pub block: Block,
    pub op: StmtOp,
    pub may_defs: Vec<MayDef>,
    pub may_uses: Vec<Version>,
    pub(crate) deleted: bool,
}

impl Stmt {
    /// Create a statement owned by `block` and record its uses and definition.  The statement is
    /// not yet placed in the block; use the [`Block`] insertion helpers or [`StmtInserter`].
    pub(crate) fn new(context: &mut Context, block: Block, op: StmtOp) -> Stmt {
        let stmt = Stmt(context.stmts.insert(StmtContent {
            block,
            op,
            may_defs: Vec::new(),
            may_uses: Vec::new(),
            deleted: false,
        }));
        stmt.register_op(context);
        stmt
    }

    fn register_op(&self, context: &mut Context) {
        let op = &context.stmts[self.0].op;
        let used = op.operand_versions();
        let def = op.def();
        for version in used {
            version.add_use(context, UseSite::Stmt(*self));
        }
        if let Some(def) = def {
            if !def.is_zero(context) {
                def.set_def(context, VersionDef::Stmt(*self));
            }
        }
    }

    fn unregister_op(&self, context: &mut Context) {
        let op = &context.stmts[self.0].op;
        let used = op.operand_versions();
        let def = op.def();
        for version in used {
            version.remove_use(context, UseSite::Stmt(*self));
        }
        if let Some(def) = def {
            def.clear_def_if(context, VersionDef::Stmt(*self));
        }
    }

    pub fn get_op<'a>(&self, context: &'a Context) -> &'a StmtOp {
        &context.stmts[self.0].op
    }

    pub fn get_block(&self, context: &Context) -> Block {
        context.stmts[self.0].block
    }

    pub fn is_deleted(&self, context: &Context) -> bool {
        context.stmts[self.0].deleted
    }

    pub fn is_terminator(&self, context: &Context) -> bool {
        self.get_op(context).is_terminator()
    }

    pub fn is_branch(&self, context: &Context) -> bool {
        self.get_op(context).is_branch()
    }

    pub fn def(&self, context: &Context) -> Option<Version> {
        self.get_op(context).def()
    }

    pub fn may_defs<'a>(&self, context: &'a Context) -> &'a [MayDef] {
        &context.stmts[self.0].may_defs
    }

    pub fn may_uses<'a>(&self, context: &'a Context) -> &'a [Version] {
        &context.stmts[self.0].may_uses
    }

    /// Versions recorded with a [`UseSite::Stmt`] site: operands, then may-def operands.
    pub fn used_versions(&self, context: &Context) -> Vec<Version> {
        let content = &context.stmts[self.0];
        let mut used = content.op.operand_versions();
        used.extend(content.may_defs.iter().map(|may_def| may_def.operand));
        used
    }

    /// Attach a may-def of `variable`.  Both sides start out as the zero version.
    pub fn add_may_def(&self, context: &mut Context, variable: Variable) {
        let zero = variable.zero_version(context);
        context.stmts[self.0].may_defs.push(MayDef {
            variable,
            result: zero,
            operand: zero,
        });
        zero.add_use(context, UseSite::Stmt(*self));
    }

    /// Attach a may-use of the zero version of `variable`.
    pub fn add_may_use(&self, context: &mut Context, variable: Variable) {
        let zero = variable.zero_version(context);
        context.stmts[self.0].may_uses.push(zero);
        zero.add_use(context, UseSite::MayUse(*self));
    }

    /// Replace every operand occurrence of `old` with `new`.  May-defs and may-uses are left
    /// alone.
    pub fn replace_operand_version(&self, context: &mut Context, old: Version, new: Version) {
        if old == new {
            return;
        }
        let replaced: usize = context.stmts[self.0]
            .op
            .operands_mut()
            .into_iter()
            .map(|operand| operand.replace_version(old, new))
            .sum();
        for _ in 0..replaced {
            old.remove_use(context, UseSite::Stmt(*self));
            new.add_use(context, UseSite::Stmt(*self));
        }
    }

    pub fn set_may_def_operand(&self, context: &mut Context, idx: usize, new: Version) {
        let old = context.stmts[self.0].may_defs[idx].operand;
        if old == new {
            return;
        }
        context.stmts[self.0].may_defs[idx].operand = new;
        old.remove_use(context, UseSite::Stmt(*self));
        new.add_use(context, UseSite::Stmt(*self));
    }

    pub fn set_may_def_result(&self, context: &mut Context, idx: usize, new: Version) {
        let old = context.stmts[self.0].may_defs[idx].result;
        context.stmts[self.0].may_defs[idx].result = new;
        old.clear_def_if(context, VersionDef::MayDef(*self));
        if !new.is_zero(context) {
            new.set_def(context, VersionDef::MayDef(*self));
        }
    }

    pub fn set_may_use(&self, context: &mut Context, idx: usize, new: Version) {
        let old = context.stmts[self.0].may_uses[idx];
        if old == new {
            return;
        }
        context.stmts[self.0].may_uses[idx] = new;
        old.remove_use(context, UseSite::MayUse(*self));
        new.add_use(context, UseSite::MayUse(*self));
    }

    /// Make this statement define `new` in place of its current direct definition.  Does nothing
    /// if the operation has no destination.
    pub fn set_def(&self, context: &mut Context, new: Version) {
        let old = match &mut context.stmts[self.0].op {
            StmtOp::Assign { dst, .. } => std::mem::replace(dst, new),
            StmtOp::Call {
                result: Some(result),
                ..
            } => std::mem::replace(result, new),
            _ => return,
        };
        old.clear_def_if(context, VersionDef::Stmt(*self));
        if !new.is_zero(context) {
            new.set_def(context, VersionDef::Stmt(*self));
        }
    }

    /// Swap the operation for `op`, keeping the may-def and may-use annotations.
    pub fn replace_op(&self, context: &mut Context, op: StmtOp) {
        self.unregister_op(context);
        context.stmts[self.0].op = op;
        self.register_op(context);
    }

    /// Unlink this statement from its block and from every use list, and mark it deleted.
    /// Versions it defined are left without a definition.
    pub fn remove(&self, context: &mut Context) {
        if self.is_deleted(context) {
            return;
        }
        let block = self.get_block(context);
        context.blocks[block.0].stmts.retain(|stmt| stmt != self);

        self.unregister_op(context);
        let content = &context.stmts[self.0];
        let may_defs = content.may_defs.clone();
        let may_uses = content.may_uses.clone();
        for may_def in may_defs {
            may_def.operand.remove_use(context, UseSite::Stmt(*self));
            may_def
                .result
                .clear_def_if(context, VersionDef::MayDef(*self));
        }
        for version in may_uses {
            version.remove_use(context, UseSite::MayUse(*self));
        }
        context.stmts[self.0].deleted = true;
    }
}

/// Provide a context for appending new [`Stmt`]s to a [`Block`].
///
/// Terminators also set the block kind and add the matching successor edges, so a CFG can be
/// built with nothing but an inserter per block.
pub struct StmtInserter<'a> {
    context: &'a mut Context,
    block: Block,
}

impl<'a> StmtInserter<'a> {
    /// Return a new [`StmtInserter`] context for `block`.
    pub fn new(context: &'a mut Context, block: Block) -> StmtInserter<'a> {
        StmtInserter { context, block }
    }

    fn push(&mut self, op: StmtOp) -> Stmt {
        let stmt = Stmt::new(self.context, self.block, op);
        self.context.blocks[self.block.0].stmts.push(stmt);
        stmt
    }

    fn terminate(&mut self, op: StmtOp, succs: Vec<Block>) -> Stmt {
        let kind = op.terminator_kind().unwrap_or(BlockKind::Fallthrough);
        let stmt = self.push(op);
        self.block.set_kind(self.context, kind);
        for succ in succs {
            self.block.add_successor(self.context, succ);
        }
        stmt
    }

    pub fn assign(mut self, dst: Version, value: Expr) -> Stmt {
        self.push(StmtOp::Assign { dst, value })
    }

    pub fn store(mut self, addr: Expr, value: Expr) -> Stmt {
        self.push(StmtOp::Store {
            addr,
            value,
            volatile: false,
        })
    }

    pub fn volatile_store(mut self, addr: Expr, value: Expr) -> Stmt {
        self.push(StmtOp::Store {
            addr,
            value,
            volatile: true,
        })
    }

    pub fn call(mut self, callee: &str, args: Vec<Expr>, result: Option<Version>) -> Stmt {
        self.push(StmtOp::Call {
            callee: callee.to_owned(),
            args,
            result,
        })
    }

    pub fn assert_non_null(mut self, expr: Expr) -> Stmt {
        self.push(StmtOp::AssertNonNull(expr))
    }

    pub fn comment(mut self, text: &str) -> Stmt {
        self.push(StmtOp::Comment(text.to_owned()))
    }

    /// Branch to `target` when `cond` holds, otherwise continue at `fallthrough`.
    pub fn cond_goto(mut self, cond: Expr, target: Block, fallthrough: Block) -> Stmt {
        self.terminate(
            StmtOp::CondGoto { cond, target },
            vec![fallthrough, target],
        )
    }

    pub fn goto(mut self, target: Block) -> Stmt {
        self.terminate(StmtOp::Goto { target }, vec![target])
    }

    pub fn switch(mut self, value: Expr, default: Block, cases: Vec<(i64, Block)>) -> Stmt {
        let succs = std::iter::once(default)
            .chain(cases.iter().map(|(_, block)| *block))
            .collect();
        self.terminate(
            StmtOp::Switch {
                value,
                default,
                cases,
            },
            succs,
        )
    }

    pub fn ret(mut self, value: Option<Expr>) -> Stmt {
        let exit = self.block.get_function(self.context).get_exit_block(self.context);
        self.terminate(StmtOp::Return(value), vec![exit])
    }

    pub fn throw(mut self, value: Expr) -> Stmt {
        let exit = self.block.get_function(self.context).get_exit_block(self.context);
        self.terminate(StmtOp::Throw(value), vec![exit])
    }

    /// Open a try region in this block.  The block gets the `TRY` attribute and an exceptional
    /// edge to each handler.
    pub fn try_region(mut self, handlers: Vec<Block>) -> Stmt {
        let stmt = self.push(StmtOp::Try {
            handlers: handlers.clone(),
        });
        self.block
            .add_attrs(self.context, crate::block::BlockAttrs::TRY);
        for handler in handlers {
            self.block.add_eh_successor(self.context, handler);
        }
        stmt
    }

    pub fn catch(mut self) -> Stmt {
        self.block
            .add_attrs(self.context, crate::block::BlockAttrs::CATCH);
        self.push(StmtOp::Catch)
    }
}
