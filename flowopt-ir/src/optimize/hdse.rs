//! ## Hyperactive Dead Statement Elimination (HDSE)
//!
//! Removes statements and phis whose results can't influence anything observable.  Liveness
//! starts at the statements that are observable by themselves and flows backwards along two kinds
//! of edges:
//!   1. Data dependence: a live statement or phi makes the definitions of everything it reads
//!      live, through the SSA use-def links, may-def operands and may-uses included.
//!   2. Control dependence: once anything in a block is live, the branches deciding whether the
//!      block runs are live too.  These are the terminator of the block itself, those of the
//!      blocks in its post-dominance frontier and those of its predecessors.
//!
//! The CFG is then cleaned up: a dead conditional branch turns its block into a fallthrough,
//! conditional branches on constants are folded and blocks left empty are spliced out.

use flowopt_utils::FxIndexMap;
use rustc_hash::FxHashSet;

use crate::{
    analysis::{
        DomTree, PostDomFronts, PostDomTree, DOMINATORS_NAME, POST_DOMINATORS_NAME,
        POST_DOM_FRONTS_NAME,
    },
    block::{Block, BlockAttrs, BlockKind},
    config::OptimizerConfig,
    context::Context,
    error::{IrError, PassWarning, WarningKind},
    function::Function,
    optimize::remove_unreachable_blocks,
    pass_manager::{AnalysisResults, Diagnostics, Pass, PassEnv, PassMutability},
    phi::Phi,
    printer,
    stmt::{Expr, Stmt, StmtOp},
    variable::{UseSite, Variable, Version, VersionDef},
};

pub const HDSE_NAME: &str = "hdse";

pub fn create_hdse_pass() -> Pass {
    Pass {
        name: HDSE_NAME,
        descr: "Dead statement elimination driven by data and control dependence",
        deps: vec![DOMINATORS_NAME, POST_DOMINATORS_NAME, POST_DOM_FRONTS_NAME],
        runner: PassMutability::Transform(hdse),
    }
}

/// Run HDSE over `function`, which must be in SSA form.  Returns whether anything changed.
pub fn hdse(
    context: &mut Context,
    analyses: &AnalysisResults,
    function: Function,
    env: &mut PassEnv,
) -> Result<bool, IrError> {
    if !function.is_in_ssa(context) {
        return Err(IrError::Unsupported {
            pass: HDSE_NAME,
            function: function.get_name(context).to_owned(),
            reason: "the function is not in SSA form".to_owned(),
        });
    }
    let limit = env.config.hdse_runs_limit;
    if function.hdse_runs(context) >= limit {
        tracing::debug!(
            "{}: HDSE already ran {limit} times, skipping",
            function.get_name(context)
        );
        return Ok(false);
    }
    function.bump_hdse_runs(context);

    let dom_tree: &DomTree = analyses.get_analysis_result(function);
    let post_dom: &PostDomTree = analyses.get_analysis_result(function);
    let post_fronts: &PostDomFronts = analyses.get_analysis_result(function);

    for block in post_dom.non_exiting() {
        block.add_attrs(context, BlockAttrs::WONT_EXIT);
    }

    let mut pass = Hdse::new(env.config);
    pass.mark_required(context, function, post_dom, post_fronts);
    if env.config.remove_redefine {
        pass.remove_redefine(context, function);
    }
    let mut modified = pass.remove_dead(context, function, dom_tree, env.diagnostics)?;
    if env.config.fold_constant_branches {
        pass.fold_constant_branches(context, function)?;
    }
    if pass.cfg_changed {
        remove_unreachable_blocks(context, function)?;
    }
    pass.splice_empty_blocks(context, function)?;
    modified |= pass.cfg_changed;
    if env.config.backward_substitution {
        modified |= backward_substitution(context, function);
    }
    Ok(modified)
}

struct Hdse<'a> {
    config: &'a OptimizerConfig,
    live_stmts: FxHashSet<Stmt>,
    live_phis: FxHashSet<Phi>,
    live_blocks: FxHashSet<Block>,
    pending_versions: Vec<Version>,
    pending_blocks: Vec<Block>,
    /// The pointers each statement dereferences.
    stmt_bases: FxIndexMap<Stmt, Vec<Expr>>,
    /// The statements dereferencing, or asserting, each pointer.
    base_stmts: FxIndexMap<Expr, Vec<Stmt>>,
    cfg_changed: bool,
}

impl<'a> Hdse<'a> {
    fn new(config: &'a OptimizerConfig) -> Self {
        Hdse {
            config,
            live_stmts: FxHashSet::default(),
            live_phis: FxHashSet::default(),
            live_blocks: FxHashSet::default(),
            pending_versions: Vec::new(),
            pending_blocks: Vec::new(),
            stmt_bases: FxIndexMap::default(),
            base_stmts: FxIndexMap::default(),
            cfg_changed: false,
        }
    }

    //
    // Marking.
    //

    fn mark_required(
        &mut self,
        context: &Context,
        function: Function,
        post_dom: &PostDomTree,
        post_fronts: &PostDomFronts,
    ) {
        for (block, stmt) in function.stmt_iter(context) {
            if self.config.insert_null_checks {
                self.collect_not_null_bases(context, stmt);
            }
            if is_must_required(context, block, stmt, post_dom) {
                self.mark_stmt(context, stmt);
            }
        }
        self.propagate(context, post_fronts);
    }

    fn mark_stmt(&mut self, context: &Context, stmt: Stmt) {
        if !self.live_stmts.insert(stmt) {
            return;
        }
        self.pending_versions.extend(stmt.used_versions(context));
        self.pending_versions
            .extend(stmt.may_uses(context).iter().copied());
        self.mark_block(stmt.get_block(context));
    }

    fn mark_phi(&mut self, context: &Context, phi: Phi) {
        if !self.live_phis.insert(phi) {
            return;
        }
        self.pending_versions
            .extend(phi.operands(context).iter().copied());
        self.mark_block(phi.get_block(context));
    }

    fn mark_block(&mut self, block: Block) {
        if self.live_blocks.insert(block) {
            self.pending_blocks.push(block);
        }
    }

    fn propagate(&mut self, context: &Context, post_fronts: &PostDomFronts) {
        loop {
            if let Some(version) = self.pending_versions.pop() {
                match version.get_def(context) {
                    VersionDef::Stmt(stmt) | VersionDef::MayDef(stmt) => {
                        self.mark_stmt(context, stmt)
                    }
                    VersionDef::Phi(phi) => self.mark_phi(context, phi),
                    VersionDef::None => (),
                }
            } else if let Some(block) = self.pending_blocks.pop() {
                self.mark_control_dependence(context, block, post_fronts);
            } else {
                break;
            }
        }
    }

    fn mark_control_dependence(
        &mut self,
        context: &Context,
        block: Block,
        post_fronts: &PostDomFronts,
    ) {
        if let Some(last) = block.last_stmt(context) {
            if last.is_branch(context) {
                self.mark_stmt(context, last);
            }
        }

        // Empty blocks in the frontier can only be try blocks, look through them.
        let mut visited = FxHashSet::<Block>::default();
        visited.insert(block);
        let mut frontier: Vec<Block> = post_fronts.frontier(block).collect();
        while let Some(cd_block) = frontier.pop() {
            if !visited.insert(cd_block) {
                continue;
            }
            match cd_block.last_stmt(context) {
                None => {
                    if cd_block.has_attr(context, BlockAttrs::TRY) {
                        frontier.extend(post_fronts.frontier(cd_block));
                    }
                }
                Some(last) => {
                    if last.is_branch(context) || matches!(last.get_op(context), StmtOp::Throw(_))
                    {
                        self.mark_stmt(context, last);
                    }
                }
            }
        }

        for pred in block.pred_iter(context) {
            if pred == block {
                continue;
            }
            if let Some(last) = pred.last_stmt(context) {
                if last.is_branch(context) {
                    self.mark_stmt(context, last);
                }
            }
        }
    }

    /// Record the pointers `stmt` dereferences.  Their values stay live, since a null check may
    /// need them once the dereference is gone.
    fn collect_not_null_bases(&mut self, context: &Context, stmt: Stmt) {
        let mut bases = Vec::new();
        let op = stmt.get_op(context);
        match op {
            StmtOp::Store { addr, .. } => bases.push(addr.clone()),
            StmtOp::AssertNonNull(expr) => bases.push(expr.clone()),
            _ => (),
        }
        for operand in op.operands() {
            operand.collect_load_bases(&mut bases);
        }
        bases.retain(|base| !matches!(base, Expr::AddrOf(_) | Expr::Const(_)));
        bases.dedup();
        if bases.is_empty() {
            return;
        }

        for base in &bases {
            self.pending_versions.extend(base.versions());
            self.base_stmts.entry(base.clone()).or_default().push(stmt);
        }
        if !matches!(op, StmtOp::AssertNonNull(_)) {
            self.stmt_bases.insert(stmt, bases);
        }
    }

    //
    // Redefinitions.
    //

    /// Kill live definitions which are overwritten later in the same block before anything can
    /// read them.  Only targets outside SSA are considered: unrenamed variables and memory
    /// written through a pointer.
    fn remove_redefine(&mut self, context: &mut Context, function: Function) {
        for block in function.block_iter(context) {
            let stmts = block.stmts(context).to_vec();
            for (idx, later) in stmts.iter().enumerate().rev() {
                if !self.live_stmts.contains(later) {
                    continue;
                }
                let Some(target) = RedefTarget::of(context, *later) else {
                    continue;
                };
                if target.is_read_by(context, *later) {
                    continue;
                }
                for earlier in stmts[..idx].iter().rev() {
                    if !self.live_stmts.contains(earlier) {
                        continue;
                    }
                    if RedefTarget::of(context, *earlier).as_ref() == Some(&target) {
                        if self.kill_redefined(context, *earlier, *later) {
                            tracing::debug!(
                                "{}: {} is overwritten before being read",
                                function.get_name(context),
                                printer::stmt_to_string(context, *earlier)
                            );
                        }
                        break;
                    }
                    if !target.is_transparent(context, *earlier) {
                        break;
                    }
                }
            }
        }
    }

    /// Drop `earlier` from the live set, handing its may-def operands over to `later`.  Refuses
    /// when a may-def result of `earlier` is read by anything but `later`.
    fn kill_redefined(&mut self, context: &mut Context, earlier: Stmt, later: Stmt) -> bool {
        let earlier_defs = earlier.may_defs(context).to_vec();
        let only_read_by_later = earlier_defs.iter().all(|may_def| {
            may_def
                .result
                .uses(context)
                .iter()
                .all(|site| *site == UseSite::Stmt(later))
        });
        if !only_read_by_later {
            return false;
        }
        let later_defs = later.may_defs(context).to_vec();
        for (idx, later_def) in later_defs.iter().enumerate() {
            if let Some(earlier_def) = earlier_defs
                .iter()
                .find(|may_def| may_def.result == later_def.operand)
            {
                later.set_may_def_operand(context, idx, earlier_def.operand);
            }
        }
        self.live_stmts.remove(&earlier);
        true
    }

    //
    // Deletion.
    //

    fn remove_dead(
        &mut self,
        context: &mut Context,
        function: Function,
        dom_tree: &DomTree,
        diagnostics: &mut Diagnostics,
    ) -> Result<bool, IrError> {
        let mut modified = false;
        for block in function.block_iter(context) {
            for stmt in block.stmt_iter(context) {
                if self.live_stmts.contains(&stmt) {
                    continue;
                }
                tracing::debug!(
                    "{}: deleting {} in {}",
                    function.get_name(context),
                    printer::stmt_to_string(context, stmt),
                    block.get_label(context)
                );
                let is_goto = matches!(stmt.get_op(context), StmtOp::Goto { .. });
                if block.get_predicate(context) == Some(stmt) {
                    // Keep the fallthrough or default edge.
                    while block.succs(context).len() > 1 {
                        let last = block.succs(context).len() - 1;
                        block.remove_successor_at(context, last)?;
                    }
                    block.set_kind(context, BlockKind::Fallthrough);
                    self.cfg_changed = true;
                } else if is_goto {
                    block.set_kind(context, BlockKind::Fallthrough);
                }
                if let Some(bases) = self.stmt_bases.get(&stmt).cloned() {
                    for base in bases {
                        self.insert_null_check(context, function, dom_tree, stmt, base, diagnostics);
                    }
                }
                stmt.remove(context);
                modified = true;
            }

            for phi in block.phi_iter(context) {
                if self.live_phis.contains(&phi) {
                    phi.set_live(context, true);
                } else {
                    phi.remove(context);
                    modified = true;
                }
            }
            if block.num_phis(context) == 0 {
                block.remove_attrs(context, BlockAttrs::JOIN);
            }
        }
        Ok(modified)
    }

    /// `dead` dereferenced `base`.  Unless a live statement in a dominating block already proves
    /// `base` non-null, keep the implied check as an explicit assertion.
    fn insert_null_check(
        &mut self,
        context: &mut Context,
        function: Function,
        dom_tree: &DomTree,
        dead: Stmt,
        base: Expr,
        diagnostics: &mut Diagnostics,
    ) {
        let block = dead.get_block(context);
        let proven = self.base_stmts.get(&base).is_some_and(|stmts| {
            stmts.iter().any(|stmt| {
                self.live_stmts.contains(stmt) && dom_tree.dominates(stmt.get_block(context), block)
            })
        });
        if proven {
            return;
        }

        let check = block.insert_stmt_before(context, dead, StmtOp::AssertNonNull(base.clone()));
        self.live_stmts.insert(check);
        diagnostics.warn(PassWarning {
            pass: HDSE_NAME,
            function: function.get_name(context).to_owned(),
            kind: WarningKind::NullCheckInserted {
                block: block.get_label(context),
                base: printer::expr_to_string(context, &base),
            },
        });
        self.base_stmts.entry(base).or_default().push(check);
    }

    //
    // CFG cleanup.
    //

    /// A live conditional branch on a constant becomes an unconditional one, or disappears when
    /// it never jumps.
    fn fold_constant_branches(
        &mut self,
        context: &mut Context,
        function: Function,
    ) -> Result<(), IrError> {
        for block in function.block_iter(context) {
            let Some(term) = block.get_terminator(context) else {
                continue;
            };
            let StmtOp::CondGoto { cond, target } = term.get_op(context) else {
                continue;
            };
            let Some(value) = cond.as_const() else {
                continue;
            };
            let target = *target;
            if value == 0 {
                block.remove_successor_at(context, 1)?;
                term.remove(context);
                block.set_kind(context, BlockKind::Fallthrough);
            } else {
                term.replace_op(context, StmtOp::Goto { target });
                block.remove_successor_at(context, 0)?;
                block.set_kind(context, BlockKind::Goto);
            }
            tracing::debug!(
                "{}: folded the constant branch of {}",
                function.get_name(context),
                block.get_label(context)
            );
            self.cfg_changed = true;
        }
        Ok(())
    }

    /// Bypass blocks left without statements or phis, sending their predecessors straight to
    /// their single successor.
    fn splice_empty_blocks(&mut self, context: &mut Context, function: Function) -> Result<(), IrError> {
        for block in function.block_iter(context) {
            if !is_spliceable(context, block) {
                continue;
            }
            let succ = block.succs(context)[0];
            block.remove_eh_successors(context)?;
            let Some(slot) = succ.pred_position(context, block) else {
                return Err(IrError::MissingPredecessor {
                    block: succ.get_label(context),
                    pred: block.get_label(context),
                });
            };
            let operands = succ.phi_operands_at(context, slot);

            let preds = block.preds(context).to_vec();
            let mut seen = FxHashSet::<Block>::default();
            for pred in preds {
                if seen.insert(pred) {
                    pred.redirect_successor(context, block, succ, &operands)?;
                }
            }
            succ.remove_pred(context, block)?;
            context.blocks[block.0].succs.clear();
            function.remove_block(context, block)?;
            tracing::debug!(
                "{}: spliced out empty block {}",
                function.get_name(context),
                block.get_label(context)
            );
            self.cfg_changed = true;
        }
        Ok(())
    }
}

fn is_must_required(context: &Context, block: Block, stmt: Stmt, post_dom: &PostDomTree) -> bool {
    let op = stmt.get_op(context);
    let reads_volatile = op
        .operand_versions()
        .iter()
        .any(|version| version.get_variable(context).is_volatile(context));
    if reads_volatile {
        return true;
    }
    match op {
        StmtOp::Return(_)
        | StmtOp::Throw(_)
        | StmtOp::Call { .. }
        | StmtOp::AssertNonNull(_)
        | StmtOp::Try { .. }
        | StmtOp::Catch
        | StmtOp::Comment(_) => true,
        StmtOp::Store {
            addr,
            value,
            volatile,
        } => {
            let tracked = matches!(
                addr,
                Expr::AddrOf(var) if var.is_renamed(context) && var.is_memory(context)
            );
            *volatile || !tracked || addr.has_volatile_load() || value.has_volatile_load()
        }
        StmtOp::Assign { dst, value } => {
            let var = dst.get_variable(context);
            var.is_volatile(context) || !var.is_renamed(context) || value.has_volatile_load()
        }
        // Keep the control flow of loops which never exit.
        StmtOp::Goto { .. } | StmtOp::CondGoto { .. } | StmtOp::Switch { .. } => {
            post_dom.is_non_exiting(block)
        }
    }
}

fn is_spliceable(context: &Context, block: Block) -> bool {
    if block.is_entry(context) || block.is_exit(context) || !block.is_empty(context) {
        return false;
    }
    if block.has_attr(
        context,
        BlockAttrs::TRY_END | BlockAttrs::CATCH | BlockAttrs::FINALLY,
    ) {
        return false;
    }
    match block.succs(context) {
        [succ] => *succ != block,
        _ => false,
    }
}

/// What a redefinition overwrites.
#[derive(PartialEq, Eq)]
enum RedefTarget {
    /// A variable left out of SSA.
    Var(Variable),
    /// The memory behind a pointer expression.
    Addr(Expr),
}

impl RedefTarget {
    fn of(context: &Context, stmt: Stmt) -> Option<RedefTarget> {
        match stmt.get_op(context) {
            StmtOp::Assign { dst, value } => {
                let var = dst.get_variable(context);
                (!var.is_renamed(context) && !var.is_volatile(context) && !value.has_volatile_load())
                    .then_some(RedefTarget::Var(var))
            }
            StmtOp::Store {
                addr,
                value,
                volatile: false,
            } => (!addr.has_volatile_load() && !value.has_volatile_load())
                .then(|| RedefTarget::Addr(addr.clone())),
            _ => None,
        }
    }

    /// Does `stmt` read this target?  Any load may read memory behind any pointer.
    fn is_read_by(&self, context: &Context, stmt: Stmt) -> bool {
        let operands = stmt.get_op(context).operands();
        if operands.iter().any(|expr| expr.has_load()) {
            return true;
        }
        let var = match self {
            RedefTarget::Var(var) | RedefTarget::Addr(Expr::AddrOf(var)) => *var,
            RedefTarget::Addr(_) => return false,
        };
        operands.iter().any(|expr| expr.mentions(context, var))
            || stmt
                .may_uses(context)
                .iter()
                .any(|version| version.get_variable(context) == var)
    }

    /// Can `stmt` sit between two writes to this target without reading it or changing where it
    /// points?
    fn is_transparent(&self, context: &Context, stmt: Stmt) -> bool {
        match stmt.get_op(context) {
            StmtOp::Comment(_) => true,
            StmtOp::Assign { dst, value } => {
                let var = dst.get_variable(context);
                if var.is_memory(context) || value.has_load() {
                    return false;
                }
                match self {
                    RedefTarget::Var(target) => *target != var && !value.mentions(context, *target),
                    RedefTarget::Addr(addr) => !addr.mentions(context, var),
                }
            }
            _ => false,
        }
    }
}

/// Turn `y = call(..); x = y` into `x = call(..)` when `y` is read nowhere else and `x` isn't
/// touched in between.
fn backward_substitution(context: &mut Context, function: Function) -> bool {
    let mut modified = false;
    for block in function.block_iter(context) {
        for copy in block.stmt_iter(context) {
            if copy.is_deleted(context) {
                continue;
            }
            let StmtOp::Assign {
                dst,
                value: Expr::Var(src),
            } = copy.get_op(context)
            else {
                continue;
            };
            let (dst, src) = (*dst, *src);
            let x = dst.get_variable(context);
            if x.is_memory(context) || x.is_volatile(context) || !x.is_renamed(context) {
                continue;
            }
            if src.num_uses(context) != 1 {
                continue;
            }
            let VersionDef::Stmt(call) = src.get_def(context) else {
                continue;
            };
            if call.get_block(context) != block
                || !matches!(call.get_op(context), StmtOp::Call { .. })
            {
                continue;
            }

            let stmts = block.stmts(context);
            let (Some(from), Some(to)) = (
                stmts.iter().position(|stmt| *stmt == call),
                stmts.iter().position(|stmt| *stmt == copy),
            ) else {
                continue;
            };
            if from >= to {
                continue;
            }
            let touched = stmts[from + 1..to]
                .iter()
                .any(|stmt| mentions_variable(context, *stmt, x));
            if touched {
                continue;
            }

            copy.remove(context);
            call.set_def(context, dst);
            tracing::debug!(
                "{}: {} now defined by its call",
                function.get_name(context),
                dst.get_name(context)
            );
            modified = true;
        }
    }
    modified
}

fn mentions_variable(context: &Context, stmt: Stmt, var: Variable) -> bool {
    stmt.get_op(context)
        .operands()
        .iter()
        .any(|expr| expr.mentions(context, var))
        || stmt
            .def(context)
            .is_some_and(|def| def.get_variable(context) == var)
        || stmt
            .may_defs(context)
            .iter()
            .any(|may_def| may_def.variable == var)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{OptimizerConfig, SsaLevel},
        optimize::{build_ssa, SSA_NAME},
        pass_manager::{register_known_passes, PassManager, PassManagerConfig},
        stmt::BinaryOp,
        variable::VariableKind,
    };

    fn run(context: &mut Context, config: &OptimizerConfig) -> PassManager {
        let mut pm = PassManager::default();
        register_known_passes(&mut pm);
        let to_run = PassManagerConfig {
            to_run: vec![SSA_NAME.to_owned(), HDSE_NAME.to_owned()],
        };
        pm.run(context, &to_run, config).unwrap();
        pm
    }

    #[test]
    fn overwritten_store_is_removed() {
        let mut context = Context::new();
        let func = Function::new(&mut context, "f");
        let entry = func.get_entry_block(&context);
        let a = func.create_block(&mut context);
        let p = func.new_variable(&mut context, "p", VariableKind::Local, false);
        let p0 = p.zero_version(&context);
        entry.set_fallthrough(&mut context, a);
        let first = a
            .append(&mut context)
            .store(Expr::Var(p0), Expr::Const(1));
        a.append(&mut context).comment("between");
        let second = a
            .append(&mut context)
            .store(Expr::Var(p0), Expr::Const(2));
        a.append(&mut context).ret(None);

        let config = OptimizerConfig {
            remove_redefine: true,
            ..OptimizerConfig::default()
        };
        run(&mut context, &config);
        assert!(first.is_deleted(&context));
        assert!(!second.is_deleted(&context));
        assert_eq!(a.num_stmts(&context), 3);
    }

    #[test]
    fn store_reading_its_own_target_keeps_the_earlier_one() {
        let mut context = Context::new();
        let func = Function::new(&mut context, "f");
        let entry = func.get_entry_block(&context);
        let a = func.create_block(&mut context);
        let p = func.new_variable(&mut context, "p", VariableKind::Local, false);
        let p0 = p.zero_version(&context);
        entry.set_fallthrough(&mut context, a);
        let first = a
            .append(&mut context)
            .store(Expr::Var(p0), Expr::Const(1));
        let second = a.append(&mut context).store(
            Expr::Var(p0),
            Expr::binary(BinaryOp::Add, Expr::load(Expr::Var(p0)), Expr::Const(1)),
        );
        a.append(&mut context).ret(None);

        let config = OptimizerConfig {
            remove_redefine: true,
            ..OptimizerConfig::default()
        };
        run(&mut context, &config);
        assert!(!first.is_deleted(&context));
        assert!(!second.is_deleted(&context));
    }

    #[test]
    fn unrenamed_increment_keeps_its_initializer() {
        let mut context = Context::new();
        let func = Function::new(&mut context, "f");
        let entry = func.get_entry_block(&context);
        let a = func.create_block(&mut context);
        let x = func.new_variable(&mut context, "x", VariableKind::AddrTaken, false);
        let x0 = x.zero_version(&context);
        entry.set_fallthrough(&mut context, a);
        let init = a.append(&mut context).assign(x0, Expr::Const(1));
        let incr = a.append(&mut context).assign(
            x0,
            Expr::binary(BinaryOp::Add, Expr::Var(x0), Expr::Const(1)),
        );
        a.append(&mut context).ret(Some(Expr::Var(x0)));

        let config = OptimizerConfig {
            ssa_level: SsaLevel::TopLevel,
            remove_redefine: true,
            ..OptimizerConfig::default()
        };
        run(&mut context, &config);
        assert!(!x.is_renamed(&context));
        assert!(!init.is_deleted(&context));
        assert!(!incr.is_deleted(&context));
    }

    #[test]
    fn deleted_dereference_leaves_a_null_check() {
        let mut context = Context::new();
        let func = Function::new(&mut context, "f");
        let entry = func.get_entry_block(&context);
        let a = func.create_block(&mut context);
        let p = func.new_variable(&mut context, "p", VariableKind::Local, false);
        let x = func.new_variable(&mut context, "x", VariableKind::Local, false);
        let p0 = p.zero_version(&context);
        let x0 = x.zero_version(&context);
        entry.set_fallthrough(&mut context, a);
        let load = a
            .append(&mut context)
            .assign(x0, Expr::load(Expr::Var(p0)));
        a.append(&mut context).ret(None);

        let config = OptimizerConfig {
            ssa_level: SsaLevel::TopLevel,
            insert_null_checks: true,
            ..OptimizerConfig::default()
        };
        let pm = run(&mut context, &config);
        assert!(load.is_deleted(&context));
        let check = a.stmts(&context)[0];
        assert_eq!(check.get_op(&context), &StmtOp::AssertNonNull(Expr::Var(p0)));
        assert_eq!(pm.diagnostics().warnings().len(), 1);
        assert!(matches!(
            pm.diagnostics().warnings()[0].kind,
            WarningKind::NullCheckInserted { .. }
        ));
    }

    #[test]
    fn call_result_is_substituted_backwards() {
        let mut context = Context::new();
        let func = Function::new(&mut context, "f");
        let entry = func.get_entry_block(&context);
        let a = func.create_block(&mut context);
        let x = func.new_variable(&mut context, "x", VariableKind::Local, false);
        let t = func.new_variable(&mut context, "t", VariableKind::Local, false);
        let (x0, t0) = (x.zero_version(&context), t.zero_version(&context));
        entry.set_fallthrough(&mut context, a);
        let call = a.append(&mut context).call("g", vec![], Some(t0));
        let copy = a.append(&mut context).assign(x0, Expr::Var(t0));
        let ret = a.append(&mut context).ret(Some(Expr::Var(x0)));

        assert!(build_ssa(&mut context, func, SsaLevel::All).unwrap());
        let x1 = copy.def(&context).unwrap();
        run(&mut context, &OptimizerConfig::default());

        assert!(copy.is_deleted(&context));
        assert_eq!(call.def(&context), Some(x1));
        assert_eq!(x1.get_def(&context), VersionDef::Stmt(call));
        assert_eq!(a.stmts(&context), &[call, ret]);
    }

    #[test]
    fn runs_are_capped_per_function() {
        let mut context = Context::new();
        let func = Function::new(&mut context, "f");
        let entry = func.get_entry_block(&context);
        entry.append(&mut context).ret(None);

        let config = OptimizerConfig {
            hdse_runs_limit: 1,
            ..OptimizerConfig::default()
        };
        run(&mut context, &config);
        run(&mut context, &config);
        assert_eq!(func.hdse_runs(&context), 1);
    }
}
