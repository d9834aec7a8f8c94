use flowopt_ir::{
    build_ssa, compute_dom_tree, compute_post_order, create_default_pipeline, function_to_string,
    reachable_blocks, register_known_passes, verify_ssa_dominance, BinaryOp, Block, BlockAttrs,
    Context, Direction, Expr, Function, IrError, OptimizerConfig, PassManager, PassManagerConfig,
    Severity, SsaLevel, StmtOp, VariableKind, Version, VersionDef, WarningKind, HDSE_NAME,
};
use rustc_hash::FxHashSet;

// -------------------------------------------------------------------------------------------------
// Helpers.

fn optimize(context: &mut Context, config: &OptimizerConfig) -> PassManager {
    let mut pm = PassManager::default();
    register_known_passes(&mut pm);
    pm.run(context, &create_default_pipeline(), config)
        .unwrap();
    pm
}

fn assert_consistent(context: &Context, func: Function) {
    context.verify_function(func).unwrap();
    let po = compute_post_order(context, func, Direction::Forward);
    let dom_tree = compute_dom_tree(context, &po, Direction::Forward).unwrap();
    verify_ssa_dominance(context, func, &dom_tree).unwrap();
}

// Every block still in the layout is reachable from the entry.
fn assert_all_reachable(context: &Context, func: Function) {
    let reachable = reachable_blocks(context, func);
    for block in func.block_iter(context) {
        assert!(
            reachable.contains(&block),
            "{} is unreachable",
            block.get_label(context)
        );
    }
}

// entry -> C: if c goto T else E
// T: x = 1; goto J
// E: x = 2; (fallthrough) J
// J: return x
fn diamond(context: &mut Context) -> (Function, [Block; 4]) {
    let func = Function::new(context, "diamond");
    let entry = func.get_entry_block(context);
    let c_block = func.create_block(context);
    let t_block = func.create_block(context);
    let e_block = func.create_block(context);
    let j_block = func.create_block(context);
    let x = func.new_variable(context, "x", VariableKind::Local, false);
    let c = func.new_variable(context, "c", VariableKind::Local, false);
    let (x0, c0) = (x.zero_version(context), c.zero_version(context));

    entry.set_fallthrough(context, c_block);
    c_block
        .append(context)
        .cond_goto(Expr::Var(c0), t_block, e_block);
    t_block.append(context).assign(x0, Expr::Const(1));
    t_block.append(context).goto(j_block);
    e_block.append(context).assign(x0, Expr::Const(2));
    e_block.set_fallthrough(context, j_block);
    j_block.append(context).ret(Some(Expr::Var(x0)));
    (func, [c_block, t_block, e_block, j_block])
}

// entry: y = 1; if c goto S
// T: try [H]
// B: x = 1                      (inside the try region)
// E: end of the try region
// H: catch; y = 2; goto J
// S: y = 3; goto J
// J: return y
fn try_region(context: &mut Context) -> (Function, [Block; 6]) {
    let func = Function::new(context, "guarded");
    let entry = func.get_entry_block(context);
    let t_block = func.create_block(context);
    let b_block = func.create_block(context);
    let e_block = func.create_block(context);
    let h_block = func.create_block(context);
    let s_block = func.create_block(context);
    let j_block = func.create_block(context);
    let x = func.new_variable(context, "x", VariableKind::Local, false);
    let y = func.new_variable(context, "y", VariableKind::Local, false);
    let c = func.new_variable(context, "c", VariableKind::Local, false);
    let (x0, y0, c0) = (
        x.zero_version(context),
        y.zero_version(context),
        c.zero_version(context),
    );

    entry.append(context).assign(y0, Expr::Const(1));
    entry
        .append(context)
        .cond_goto(Expr::Var(c0), s_block, t_block);
    t_block.append(context).try_region(vec![h_block]);
    t_block.set_fallthrough(context, b_block);
    b_block.add_attrs(context, BlockAttrs::TRY);
    b_block.append(context).assign(x0, Expr::Const(1));
    b_block.set_fallthrough(context, e_block);
    e_block.add_attrs(context, BlockAttrs::TRY | BlockAttrs::TRY_END);
    e_block.set_fallthrough(context, j_block);
    h_block.append(context).catch();
    h_block.append(context).assign(y0, Expr::Const(2));
    h_block.append(context).goto(j_block);
    s_block.append(context).assign(y0, Expr::Const(3));
    s_block.append(context).goto(j_block);
    j_block.append(context).ret(Some(Expr::Var(y0)));
    (func, [t_block, b_block, e_block, h_block, s_block, j_block])
}

// -------------------------------------------------------------------------------------------------
// Whole pipeline.

#[test]
fn diamond_keeps_one_live_phi() {
    let mut context = Context::new();
    let (func, [c_block, t_block, e_block, j_block]) = diamond(&mut context);
    optimize(&mut context, &OptimizerConfig::default());

    assert_eq!(j_block.num_phis(&context), 1);
    let phi = j_block.phis(&context)[0];
    assert!(phi.is_live(&context));
    assert_eq!(phi.num_operands(&context), 2);
    assert!(j_block.has_attr(&context, BlockAttrs::JOIN));

    // Each arm defines the operand arriving from it.
    let from_t = phi.get_operand(&context, 0).unwrap();
    let from_e = phi.get_operand(&context, 1).unwrap();
    assert_eq!(from_t.get_def(&context), VersionDef::Stmt(t_block.stmts(&context)[0]));
    assert_eq!(from_e.get_def(&context), VersionDef::Stmt(e_block.stmts(&context)[0]));

    assert_eq!(c_block.num_stmts(&context), 1);
    assert_eq!(t_block.num_stmts(&context), 2);
    assert_eq!(e_block.num_stmts(&context), 1);
    assert_eq!(
        j_block.stmts(&context)[0].get_op(&context),
        &StmtOp::Return(Some(Expr::Var(phi.get_result(&context))))
    );
    assert_consistent(&context, func);
}

#[test]
fn dead_definition_next_to_a_call_goes_alone() {
    let mut context = Context::new();
    let func = Function::new(&mut context, "f");
    let entry = func.get_entry_block(&context);
    let a = func.create_block(&mut context);
    let b = func.create_block(&mut context);
    let x = func.new_variable(&mut context, "x", VariableKind::Local, false);
    let x0 = x.zero_version(&context);

    entry.set_fallthrough(&mut context, a);
    let call = a.append(&mut context).call("g", vec![], None);
    let dead = a.append(&mut context).assign(x0, Expr::Const(5));
    a.set_fallthrough(&mut context, b);
    b.append(&mut context).ret(Some(Expr::Const(0)));

    optimize(&mut context, &OptimizerConfig::default());
    assert!(dead.is_deleted(&context));
    assert_eq!(a.stmts(&context), &[call]);
    assert!(!a.is_deleted(&context));
    assert_consistent(&context, func);
}

#[test]
fn block_left_empty_is_spliced_out() {
    let mut context = Context::new();
    let func = Function::new(&mut context, "f");
    let entry = func.get_entry_block(&context);
    let a = func.create_block(&mut context);
    let b = func.create_block(&mut context);
    let x = func.new_variable(&mut context, "x", VariableKind::Local, false);
    let x0 = x.zero_version(&context);

    entry.set_fallthrough(&mut context, a);
    a.append(&mut context).assign(x0, Expr::Const(5));
    a.set_fallthrough(&mut context, b);
    b.append(&mut context).ret(Some(Expr::Const(0)));

    optimize(&mut context, &OptimizerConfig::default());
    assert!(a.is_deleted(&context));
    assert_eq!(entry.succs(&context), &[b]);
    assert_eq!(b.preds(&context), &[entry]);
    assert_all_reachable(&context, func);
    assert_consistent(&context, func);
}

#[test]
fn empty_try_region_collapses() {
    let mut context = Context::new();
    let (func, [t_block, b_block, e_block, h_block, s_block, j_block]) =
        try_region(&mut context);
    let entry = func.get_entry_block(&context);
    let y1 = {
        // The version of y defined in the entry, known once SSA is built.
        build_ssa(&mut context, func, SsaLevel::All).unwrap();
        entry.stmts(&context)[0].def(&context).unwrap()
    };
    let y_from_s = s_block.stmts(&context)[0].def(&context).unwrap();

    optimize(&mut context, &OptimizerConfig::default());

    for block in [t_block, b_block, e_block, h_block] {
        assert!(block.is_deleted(&context), "{}", block.get_label(&context));
    }
    assert_eq!(entry.succs(&context), &[j_block, s_block]);
    assert_eq!(j_block.preds(&context), &[s_block, entry]);

    assert_eq!(j_block.num_phis(&context), 1);
    let phi = j_block.phis(&context)[0];
    assert_eq!(phi.operands(&context), &[y_from_s, y1]);

    assert_all_reachable(&context, func);
    assert_consistent(&context, func);
}

#[test]
fn loop_header_branch_survives_a_dead_body() {
    let mut context = Context::new();
    let func = Function::new(&mut context, "spin");
    let entry = func.get_entry_block(&context);
    let header = func.create_block(&mut context);
    let body = func.create_block(&mut context);
    let done = func.create_block(&mut context);
    let i = func.new_variable(&mut context, "i", VariableKind::Local, false);
    let n = func.new_variable(&mut context, "n", VariableKind::Local, false);
    let d = func.new_variable(&mut context, "d", VariableKind::Local, false);
    let (i0, n0, d0) = (
        i.zero_version(&context),
        n.zero_version(&context),
        d.zero_version(&context),
    );

    let init = entry.append(&mut context).assign(i0, Expr::Const(0));
    entry.set_fallthrough(&mut context, header);
    let test = header.append(&mut context).cond_goto(
        Expr::binary(BinaryOp::Ge, Expr::Var(i0), Expr::Var(n0)),
        done,
        body,
    );
    let bump = body.append(&mut context).assign(
        d0,
        Expr::binary(BinaryOp::Add, Expr::Var(d0), Expr::Const(1)),
    );
    let back = body.append(&mut context).goto(header);
    done.append(&mut context).ret(Some(Expr::Const(0)));

    optimize(&mut context, &OptimizerConfig::default());

    assert!(!test.is_deleted(&context));
    assert!(!init.is_deleted(&context));
    assert!(bump.is_deleted(&context));
    assert_eq!(body.stmts(&context), &[back]);
    assert_eq!(header.num_phis(&context), 0);
    assert!(!header.has_attr(&context, BlockAttrs::JOIN));
    assert!(header.has_attr(&context, BlockAttrs::LOOP_HEADER));
    assert_consistent(&context, func);
}

#[test]
fn volatile_writes_are_kept() {
    let mut context = Context::new();
    let func = Function::new(&mut context, "f");
    let entry = func.get_entry_block(&context);
    let a = func.create_block(&mut context);
    let v = func.new_variable(&mut context, "v", VariableKind::Global, true);
    let v0 = v.zero_version(&context);

    entry.set_fallthrough(&mut context, a);
    let write = a.append(&mut context).assign(v0, Expr::Const(7));
    let store = a
        .append(&mut context)
        .volatile_store(Expr::AddrOf(v), Expr::Const(8));
    a.append(&mut context).ret(None);

    optimize(&mut context, &OptimizerConfig::default());
    assert!(!v.is_renamed(&context));
    assert!(!write.is_deleted(&context));
    assert!(!store.is_deleted(&context));
}

#[test]
fn writes_to_a_global_before_a_throw_are_kept() {
    let mut context = Context::new();
    let func = Function::new(&mut context, "raise");
    let entry = func.get_entry_block(&context);
    let a = func.create_block(&mut context);
    let g = func.new_variable(&mut context, "g", VariableKind::Global, false);
    let t = func.new_variable(&mut context, "t", VariableKind::Local, false);
    let (g0, t0) = (g.zero_version(&context), t.zero_version(&context));

    entry.set_fallthrough(&mut context, a);
    let write = a.append(&mut context).assign(g0, Expr::Const(5));
    let store = a
        .append(&mut context)
        .store(Expr::AddrOf(g), Expr::Const(6));
    let scratch = a.append(&mut context).assign(t0, Expr::Const(3));
    a.append(&mut context).throw(Expr::Const(1));

    optimize(&mut context, &OptimizerConfig::default());
    assert!(g.is_renamed(&context));
    assert!(!write.is_deleted(&context));
    assert!(!store.is_deleted(&context));
    assert!(scratch.is_deleted(&context));
    assert_consistent(&context, func);
}

#[test]
fn store_reading_the_overwritten_memory_keeps_the_first_write() {
    let mut context = Context::new();
    let func = Function::new(&mut context, "bump");
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
    optimize(&mut context, &config);
    assert!(!first.is_deleted(&context));
    assert!(!second.is_deleted(&context));
    assert_consistent(&context, func);
}

// entry -> body: call tick; goto body
#[test]
fn function_which_never_returns_is_optimized() {
    let mut context = Context::new();
    let func = Function::new(&mut context, "forever");
    let entry = func.get_entry_block(&context);
    let exit = func.get_exit_block(&context);
    let body = func.create_block(&mut context);
    let x = func.new_variable(&mut context, "x", VariableKind::Local, false);
    let x0 = x.zero_version(&context);

    entry.set_fallthrough(&mut context, body);
    let dead = body.append(&mut context).assign(x0, Expr::Const(1));
    let tick = body.append(&mut context).call("tick", vec![], None);
    let back = body.append(&mut context).goto(body);

    optimize(&mut context, &OptimizerConfig::default());
    assert_eq!(exit.num_predecessors(&context), 0);
    assert!(dead.is_deleted(&context));
    assert_eq!(body.stmts(&context), &[tick, back]);
    assert!(body.has_attr(&context, BlockAttrs::WONT_EXIT));
    assert_consistent(&context, func);
}

// entry -> head: if 1 goto body else out
// body: goto head
// out: return
#[test]
fn exit_cut_off_by_folding_survives_another_run() {
    let mut context = Context::new();
    let func = Function::new(&mut context, "spin");
    let entry = func.get_entry_block(&context);
    let exit = func.get_exit_block(&context);
    let head = func.create_block(&mut context);
    let body = func.create_block(&mut context);
    let out = func.create_block(&mut context);

    entry.set_fallthrough(&mut context, head);
    head.append(&mut context)
        .cond_goto(Expr::Const(1), body, out);
    body.append(&mut context).goto(head);
    out.append(&mut context).ret(None);

    let config = OptimizerConfig::default();
    let mut pm = optimize(&mut context, &config);
    assert_eq!(exit.num_predecessors(&context), 0);
    assert!(out.is_deleted(&context));
    assert_eq!(head.succs(&context), &[body]);

    pm.run_pass(&mut context, HDSE_NAME, func, &config).unwrap();
    assert!(head.has_attr(&context, BlockAttrs::WONT_EXIT));
    assert!(body.has_attr(&context, BlockAttrs::WONT_EXIT));
    assert_eq!(head.succs(&context), &[body]);
    assert_consistent(&context, func);
}

// -------------------------------------------------------------------------------------------------
// Properties.

#[test]
fn every_phi_has_one_operand_per_predecessor() {
    let builders: [fn(&mut Context) -> Function; 2] = [diamond_func, try_func];
    for build in builders {
        let mut context = Context::new();
        let func = build(&mut context);
        build_ssa(&mut context, func, SsaLevel::All).unwrap();
        for block in func.block_iter(&context) {
            for phi in block.phis(&context) {
                assert_eq!(phi.num_operands(&context), block.num_predecessors(&context));
            }
        }
        optimize(&mut context, &OptimizerConfig::default());
        for block in func.block_iter(&context) {
            for phi in block.phis(&context) {
                assert_eq!(phi.num_operands(&context), block.num_predecessors(&context));
            }
        }
    }
}

fn diamond_func(context: &mut Context) -> Function {
    diamond(context).0
}

fn try_func(context: &mut Context) -> Function {
    try_region(context).0
}

#[test]
fn ssa_versions_have_a_single_dominating_definition() {
    let mut context = Context::new();
    let (func, _) = try_region(&mut context);
    build_ssa(&mut context, func, SsaLevel::All).unwrap();

    let mut defined = FxHashSet::<Version>::default();
    for block in func.block_iter(&context) {
        for phi in block.phis(&context) {
            assert!(defined.insert(phi.get_result(&context)));
        }
        for stmt in block.stmts(&context) {
            if let Some(def) = stmt.def(&context) {
                assert!(!def.is_zero(&context));
                assert!(defined.insert(def));
            }
        }
    }
    assert_consistent(&context, func);
}

#[test]
fn second_hdse_run_changes_nothing() {
    let mut context = Context::new();
    let (func, _) = try_region(&mut context);
    let config = OptimizerConfig::default();
    let mut pm = optimize(&mut context, &config);
    let before = function_to_string(&context, func);

    assert!(!pm.run_pass(&mut context, HDSE_NAME, func, &config).unwrap());
    assert_eq!(function_to_string(&context, func), before);
}

// -------------------------------------------------------------------------------------------------
// Failures and degradation.

#[test]
fn verifier_rejects_an_extra_edge() {
    let mut context = Context::new();
    let (func, [_, _, e_block, j_block]) = diamond(&mut context);
    context.verify_function(func).unwrap();

    // A fallthrough block may only have one normal successor.
    e_block.add_successor(&mut context, j_block);
    assert!(matches!(
        context.verify_function(func),
        Err(IrError::TerminatorMismatch { .. })
    ));
}

#[test]
fn unsupported_function_is_skipped_when_partial_builds_are_allowed() {
    let mut context = Context::new();
    let (func, _) = diamond(&mut context);
    let mut pm = PassManager::default();
    register_known_passes(&mut pm);
    let hdse_only = PassManagerConfig {
        to_run: vec![HDSE_NAME.to_owned()],
    };

    // HDSE needs SSA form, which was never built.
    let changed = pm
        .run(&mut context, &hdse_only, &OptimizerConfig::default())
        .unwrap();
    assert!(!changed);
    assert!(!func.is_in_ssa(&context));
    let warnings = pm.take_diagnostics();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].function, "diamond");
    assert!(matches!(
        warnings[0].kind,
        WarningKind::FunctionSkipped { .. }
    ));

    let strict = OptimizerConfig {
        allow_partial: false,
        ..OptimizerConfig::default()
    };
    let err = pm.run(&mut context, &hdse_only, &strict).unwrap_err();
    assert_eq!(err.severity(), Severity::Unsupported);
}

#[test]
fn unknown_pass_is_an_error() {
    let mut context = Context::new();
    diamond(&mut context);
    let mut pm = PassManager::default();
    register_known_passes(&mut pm);
    let config = PassManagerConfig {
        to_run: vec!["peephole".to_owned()],
    };
    assert_eq!(
        pm.run(&mut context, &config, &OptimizerConfig::default()),
        Err(IrError::UnregisteredPass("peephole".to_owned()))
    );
}

#[test]
fn config_survives_a_toml_round_trip() -> anyhow::Result<()> {
    let mut config = OptimizerConfig {
        ssa_level: SsaLevel::AddrTaken,
        hdse_runs_limit: 2,
        insert_null_checks: true,
        ..OptimizerConfig::default()
    };
    config.print.ir_after = vec!["hdse".to_owned()];

    let text = config.to_toml_string()?;
    assert_eq!(OptimizerConfig::from_toml_str(&text)?, config);
    Ok(())
}
