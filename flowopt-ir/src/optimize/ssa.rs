//! Construction of SSA form.
//!
//! Phis are placed at the iterated dominance frontier of the blocks defining each variable, with
//! no liveness pruning; HDSE later drops the ones nobody reads.  Renaming then walks the dominator
//! tree in pre-order keeping a stack of versions per variable.
//!
//! Memory variables (address-taken locals and globals) are renamed through the may-def and may-use
//! annotations added by [`annotate_aliases`], which model the statements that may touch them
//! indirectly.

use flowopt_utils::{FxIndexMap, FxIndexSet, MappedStack};
use rustc_hash::FxHashSet;

use crate::{
    analysis::{
        compute_dom_fronts, compute_dom_tree, compute_post_order, mark_loop_headers,
        verify_cfg_shape, Direction, DomFronts, DomTree,
    },
    block::{Block, BlockAttrs},
    config::SsaLevel,
    context::Context,
    error::IrError,
    function::Function,
    optimize::remove_unreachable_blocks,
    pass_manager::{AnalysisResults, Pass, PassEnv, PassMutability},
    phi::Phi,
    stmt::{Expr, Stmt, StmtOp},
    variable::{Variable, VariableKind, Version},
};

pub const SSA_NAME: &str = "ssa";

pub fn create_ssa_pass() -> Pass {
    Pass {
        name: SSA_NAME,
        descr: "Construction of SSA form with memory may-defs and may-uses",
        // Dominance is computed after the unreachable sweep, so it isn't a dependency.
        deps: vec![],
        runner: PassMutability::Transform(build_ssa_pass),
    }
}

fn build_ssa_pass(
    context: &mut Context,
    _: &AnalysisResults,
    function: Function,
    env: &mut PassEnv,
) -> Result<bool, IrError> {
    build_ssa(context, function, env.config.ssa_level)
}

/// Would `level` rename `var`?  Volatile variables are never renamed.
pub fn is_renamable(context: &Context, var: Variable, level: SsaLevel) -> bool {
    if var.is_volatile(context) {
        return false;
    }
    match level {
        SsaLevel::TopLevel => var.get_kind(context) == VariableKind::Local,
        SsaLevel::AddrTaken => var.is_memory(context),
        SsaLevel::All => true,
    }
}

/// Put `function` into SSA form.  Does nothing if it already is.
pub fn build_ssa(context: &mut Context, function: Function, level: SsaLevel) -> Result<bool, IrError> {
    if function.is_in_ssa(context) {
        return Ok(false);
    }
    remove_unreachable_blocks(context, function)?;
    verify_cfg_shape(context, function)?;

    let po = compute_post_order(context, function, Direction::Forward);
    let dom_tree = compute_dom_tree(context, &po, Direction::Forward)?;
    let dom_fronts = compute_dom_fronts(context, &dom_tree, Direction::Forward);

    let candidates: FxIndexSet<Variable> = function
        .variables(context)
        .iter()
        .copied()
        .filter(|var| is_renamable(context, *var, level))
        .collect();

    annotate_aliases(context, function, &candidates);
    let num_phis = insert_phis(context, function, &dom_fronts, &candidates);
    rename(context, function, &dom_tree, &candidates);

    for var in &candidates {
        var.set_renamed(context, true);
    }
    function.set_in_ssa(context);
    let loops = mark_loop_headers(context, &dom_tree);
    tracing::debug!(
        "{}: renamed {} variables, inserted {num_phis} phis, found {loops} loop headers",
        function.get_name(context),
        candidates.len()
    );
    Ok(true)
}

/// Attach may-defs and may-uses of the memory variables among `candidates` to the statements
/// which may reach them indirectly.
///
/// - A call may read and write every memory variable.
/// - A store through `AddrOf(v)` writes `v`, a store through any other pointer may write every
///   memory variable.
/// - A statement which loads may read every memory variable.
/// - A return or throw reads every global, since the caller can observe them either way.
pub fn annotate_aliases(context: &mut Context, function: Function, candidates: &FxIndexSet<Variable>) {
    let memory: Vec<Variable> = candidates
        .iter()
        .copied()
        .filter(|var| var.is_memory(context))
        .collect();
    if memory.is_empty() {
        return;
    }
    let globals: Vec<Variable> = memory
        .iter()
        .copied()
        .filter(|var| var.get_kind(context) == VariableKind::Global)
        .collect();

    for (_, stmt) in function.stmt_iter(context) {
        let mut may_defs = FxIndexSet::<Variable>::default();
        let mut may_uses = FxIndexSet::<Variable>::default();
        let op = stmt.get_op(context);
        match op {
            StmtOp::Call { .. } => {
                may_defs.extend(memory.iter().copied());
                may_uses.extend(memory.iter().copied());
            }
            StmtOp::Store {
                addr: Expr::AddrOf(var),
                ..
            } => {
                if memory.contains(var) {
                    may_defs.insert(*var);
                }
            }
            StmtOp::Store { .. } => may_defs.extend(memory.iter().copied()),
            StmtOp::Return(_) | StmtOp::Throw(_) => may_uses.extend(globals.iter().copied()),
            _ => (),
        }
        if op.operands().iter().any(|expr| expr.has_load()) {
            may_uses.extend(memory.iter().copied());
        }

        for var in may_defs {
            stmt.add_may_def(context, var);
        }
        for var in may_uses {
            stmt.add_may_use(context, var);
        }
    }
}

/// Blocks holding a definition of each candidate, direct or through a may-def.
fn collect_def_blocks(
    context: &Context,
    function: Function,
    candidates: &FxIndexSet<Variable>,
) -> FxIndexMap<Variable, FxIndexSet<Block>> {
    let mut def_blocks = FxIndexMap::<Variable, FxIndexSet<Block>>::default();
    for (block, stmt) in function.stmt_iter(context) {
        let defined = stmt
            .def(context)
            .map(|version| version.get_variable(context))
            .into_iter()
            .chain(stmt.may_defs(context).iter().map(|may_def| may_def.variable));
        for var in defined {
            if candidates.contains(&var) {
                def_blocks.entry(var).or_default().insert(block);
            }
        }
    }
    def_blocks
}

fn insert_phis(
    context: &mut Context,
    function: Function,
    dom_fronts: &DomFronts,
    candidates: &FxIndexSet<Variable>,
) -> usize {
    let exit = function.get_exit_block(context);
    let def_blocks = collect_def_blocks(context, function, candidates);
    let mut count = 0;
    for (var, blocks) in &def_blocks {
        for join in dom_fronts.iterated(blocks.iter().copied()) {
            if join == exit {
                continue;
            }
            Phi::new(context, join, *var);
            join.add_attrs(context, BlockAttrs::JOIN);
            count += 1;
        }
    }
    count
}

enum RenameStep {
    Enter(Block),
    /// Pop what the block pushed, once per push.
    Leave(Vec<Variable>),
}

fn rename(
    context: &mut Context,
    function: Function,
    dom_tree: &DomTree,
    candidates: &FxIndexSet<Variable>,
) {
    let mut names = MappedStack::<Variable, Version>::default();
    let mut steps = vec![RenameStep::Enter(function.get_entry_block(context))];
    while let Some(step) = steps.pop() {
        match step {
            RenameStep::Enter(block) => {
                let pushed = rename_block(context, block, candidates, &mut names);
                steps.push(RenameStep::Leave(pushed));
                let children: Vec<Block> = dom_tree.children(block).collect();
                steps.extend(children.into_iter().rev().map(RenameStep::Enter));
            }
            RenameStep::Leave(pushed) => {
                for var in pushed {
                    names.pop(&var);
                }
            }
        }
    }
}

fn top(context: &Context, names: &MappedStack<Variable, Version>, var: Variable) -> Version {
    names
        .get(&var)
        .copied()
        .unwrap_or_else(|| var.zero_version(context))
}

fn rename_block(
    context: &mut Context,
    block: Block,
    candidates: &FxIndexSet<Variable>,
    names: &mut MappedStack<Variable, Version>,
) -> Vec<Variable> {
    let mut pushed = Vec::new();

    for phi in block.phi_iter(context) {
        let var = phi.get_variable(context);
        let version = Version::new(context, var);
        phi.set_result(context, version);
        names.push(var, version);
        pushed.push(var);
    }

    for stmt in block.stmt_iter(context) {
        rename_stmt(context, stmt, candidates, names, &mut pushed);
    }

    // Fill in the phi operands for every edge leaving this block.
    let mut seen = FxHashSet::<Block>::default();
    for succ in block.successors(context) {
        if !seen.insert(succ) {
            continue;
        }
        let slots: Vec<usize> = succ
            .preds(context)
            .iter()
            .enumerate()
            .filter_map(|(slot, pred)| (*pred == block).then_some(slot))
            .collect();
        for phi in succ.phi_iter(context) {
            let version = top(context, names, phi.get_variable(context));
            for slot in &slots {
                phi.set_operand(context, *slot, version);
            }
        }
    }

    pushed
}

fn rename_stmt(
    context: &mut Context,
    stmt: Stmt,
    candidates: &FxIndexSet<Variable>,
    names: &mut MappedStack<Variable, Version>,
    pushed: &mut Vec<Variable>,
) {
    // Reads first.
    let mut renamed = FxHashSet::<Version>::default();
    for version in stmt.get_op(context).operand_versions() {
        let var = version.get_variable(context);
        if candidates.contains(&var) && version.is_zero(context) && renamed.insert(version) {
            let new = top(context, names, var);
            stmt.replace_operand_version(context, version, new);
        }
    }
    for idx in 0..stmt.may_uses(context).len() {
        let var = stmt.may_uses(context)[idx].get_variable(context);
        if candidates.contains(&var) {
            let new = top(context, names, var);
            stmt.set_may_use(context, idx, new);
        }
    }

    // Then the writes.
    for idx in 0..stmt.may_defs(context).len() {
        let var = stmt.may_defs(context)[idx].variable;
        if !candidates.contains(&var) {
            continue;
        }
        let reaching = top(context, names, var);
        stmt.set_may_def_operand(context, idx, reaching);
        let version = Version::new(context, var);
        stmt.set_may_def_result(context, idx, version);
        names.push(var, version);
        pushed.push(var);
    }
    if let Some(def) = stmt.def(context) {
        let var = def.get_variable(context);
        if candidates.contains(&var) && def.is_zero(context) {
            let version = Version::new(context, var);
            stmt.set_def(context, version);
            names.push(var, version);
            pushed.push(var);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        stmt::BinaryOp,
        variable::{UseSite, VersionDef},
    };

    // x = 0; loop: if (x < 10) { x = x + 1; goto loop } return x
    #[test]
    fn loop_counter_gets_a_header_phi() {
        let mut context = Context::new();
        let func = Function::new(&mut context, "count");
        let entry = func.get_entry_block(&context);
        let head = func.create_block(&mut context);
        let body = func.create_block(&mut context);
        let done = func.create_block(&mut context);
        let x = func.new_variable(&mut context, "x", VariableKind::Local, false);
        let x0 = x.zero_version(&context);

        let init = entry.append(&mut context).assign(x0, Expr::Const(0));
        entry.set_fallthrough(&mut context, head);
        head.append(&mut context).cond_goto(
            Expr::binary(BinaryOp::Ge, Expr::Var(x0), Expr::Const(10)),
            done,
            body,
        );
        let incr = body.append(&mut context).assign(
            x0,
            Expr::binary(BinaryOp::Add, Expr::Var(x0), Expr::Const(1)),
        );
        body.append(&mut context).goto(head);
        let ret = done.append(&mut context).ret(Some(Expr::Var(x0)));

        assert!(build_ssa(&mut context, func, SsaLevel::All).unwrap());
        assert!(func.is_in_ssa(&context));
        assert!(x.is_renamed(&context));
        assert!(head.has_attr(&context, BlockAttrs::LOOP_HEADER));
        assert!(head.has_attr(&context, BlockAttrs::JOIN));

        let phi = head.phis(&context)[0];
        let x_init = init.def(&context).unwrap();
        let x_incr = incr.def(&context).unwrap();
        let x_phi = phi.get_result(&context);
        assert_eq!(phi.operands(&context), &[x_init, x_incr]);
        assert_eq!(x_phi.get_def(&context), VersionDef::Phi(phi));
        assert_eq!(incr.get_op(&context).operand_versions(), vec![x_phi]);
        assert_eq!(ret.get_op(&context).operand_versions(), vec![x_phi]);
        assert!(x_phi.uses(&context).contains(&UseSite::Stmt(ret)));
        assert_eq!(x0.num_uses(&context), 0);

        // Already in SSA form.
        assert!(!build_ssa(&mut context, func, SsaLevel::All).unwrap());
    }

    #[test]
    fn calls_define_memory_through_may_defs() {
        let mut context = Context::new();
        let func = Function::new(&mut context, "mem");
        let entry = func.get_entry_block(&context);
        let a = func.create_block(&mut context);
        let g = func.new_variable(&mut context, "g", VariableKind::Global, false);
        let v = func.new_variable(&mut context, "v", VariableKind::Global, true);
        let g0 = g.zero_version(&context);

        let store = entry
            .append(&mut context)
            .store(Expr::AddrOf(g), Expr::Const(1));
        entry.set_fallthrough(&mut context, a);
        let call = a.append(&mut context).call("f", vec![], None);
        let ret = a.append(&mut context).ret(None);

        assert!(build_ssa(&mut context, func, SsaLevel::AddrTaken).unwrap());
        assert!(!v.is_renamed(&context));

        let store_def = store.may_defs(&context)[0];
        assert_eq!(store_def.variable, g);
        assert_eq!(store_def.operand, g0);
        assert_eq!(store_def.result.get_def(&context), VersionDef::MayDef(store));

        // The call reads and rewrites g, the volatile global gets nothing.
        assert_eq!(call.may_uses(&context), &[store_def.result]);
        let call_def = call.may_defs(&context)[0];
        assert_eq!(call.may_defs(&context).len(), 1);
        assert_eq!(call_def.operand, store_def.result);
        assert_eq!(ret.may_uses(&context), &[call_def.result]);
    }

    #[test]
    fn throw_reads_every_global() {
        let mut context = Context::new();
        let func = Function::new(&mut context, "raise");
        let entry = func.get_entry_block(&context);
        let g = func.new_variable(&mut context, "g", VariableKind::Global, false);
        let l = func.new_variable(&mut context, "l", VariableKind::AddrTaken, false);
        let g0 = g.zero_version(&context);

        entry.append(&mut context).assign(g0, Expr::Const(5));
        let store = entry
            .append(&mut context)
            .store(Expr::AddrOf(g), Expr::Const(6));
        let throw = entry.append(&mut context).throw(Expr::Const(1));

        assert!(build_ssa(&mut context, func, SsaLevel::All).unwrap());
        assert!(l.is_renamed(&context));
        let store_def = store.may_defs(&context)[0];
        assert_eq!(store_def.variable, g);
        // Locals die with the frame, only the global stays visible.
        assert_eq!(throw.may_uses(&context), &[store_def.result]);
        assert!(store_def
            .result
            .uses(&context)
            .contains(&UseSite::MayUse(throw)));
    }
}
