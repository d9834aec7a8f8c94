//! Code to validate the IR in a [`Context`].
//!
//! Before and after optimization the IR should be verified to be in a consistent valid state,
//! using the functions in this module.

use flowopt_utils::FxIndexMap;

use crate::{
    analysis::DomTree,
    block::{Block, BlockAttrs, BlockKind},
    context::Context,
    error::IrError,
    function::Function,
    printer,
    stmt::{Stmt, StmtOp},
    variable::{UseSite, Version, VersionDef},
};

impl Context {
    /// Verify the contents of this [`Context`] is valid.
    pub fn verify(self) -> Result<Self, IrError> {
        for function in self.function_iter() {
            self.verify_function(function)?;
        }
        Ok(self)
    }

    pub fn verify_function(&self, function: Function) -> Result<(), IrError> {
        for block in function.block_iter(self) {
            self.verify_edges(function, block)?;
            self.verify_block(function, block)?;
        }
        self.verify_uses(function)?;
        self.verify_defs(function)
    }

    fn verify_edges(&self, function: Function, block: Block) -> Result<(), IrError> {
        let edge_error = |from: Block, to: Block| IrError::InconsistentEdge {
            from: from.get_label(self),
            to: to.get_label(self),
        };

        if block.is_exit(self) {
            if block.num_successors(self) != 0 {
                return Err(IrError::TerminatorMismatch {
                    block: block.get_label(self),
                    reason: "the exit block has successors".to_owned(),
                });
            }
        } else if block.num_successors(self) == 0 {
            return Err(IrError::BlockWithoutSuccessors(block.get_label(self)));
        }

        let successors = block.successors(self);
        for succ in &successors {
            if succ.is_deleted(self) || succ.get_function(self) != function {
                return Err(edge_error(block, *succ));
            }
            let forward = successors.iter().filter(|s| *s == succ).count();
            let backward = succ.preds(self).iter().filter(|p| **p == block).count();
            if forward != backward {
                return Err(edge_error(block, *succ));
            }
        }
        for pred in block.preds(self) {
            if pred.is_deleted(self) {
                return Err(edge_error(*pred, block));
            }
            let backward = block.preds(self).iter().filter(|p| *p == pred).count();
            let forward = pred
                .successors(self)
                .iter()
                .filter(|s| **s == block)
                .count();
            if forward != backward {
                return Err(edge_error(*pred, block));
            }
        }
        Ok(())
    }

    fn verify_block(&self, function: Function, block: Block) -> Result<(), IrError> {
        let label = || block.get_label(self);

        for phi in block.phis(self) {
            if phi.is_deleted(self) {
                return Err(IrError::DeletedEntityLinked {
                    kind: "phi",
                    block: label(),
                });
            }
            if phi.num_operands(self) != block.num_predecessors(self) {
                return Err(IrError::PhiArityMismatch {
                    var: phi.get_variable(self).get_name(self).to_owned(),
                    block: label(),
                    operands: phi.num_operands(self),
                    preds: block.num_predecessors(self),
                });
            }
        }

        let stmts = block.stmts(self);
        for (idx, stmt) in stmts.iter().enumerate() {
            if stmt.is_deleted(self) {
                return Err(IrError::DeletedEntityLinked {
                    kind: "statement",
                    block: label(),
                });
            }
            if stmt.is_terminator(self) && idx + 1 != stmts.len() {
                return Err(IrError::MisplacedTerminator(label()));
            }
            if let StmtOp::Try { handlers } = stmt.get_op(self) {
                self.verify_try(block, handlers)?;
            }
        }

        let mismatch = |reason: &str| IrError::TerminatorMismatch {
            block: label(),
            reason: reason.to_owned(),
        };
        let terminator = block.get_terminator(self);
        let kind = block.get_kind(self);
        match terminator.map(|stmt| stmt.get_op(self)) {
            Some(op) => {
                if op.terminator_kind() != Some(kind) {
                    return Err(mismatch(&format!("terminator does not end a {kind} block")));
                }
            }
            None => {
                if matches!(
                    kind,
                    BlockKind::Goto
                        | BlockKind::CondGoto
                        | BlockKind::Switch
                        | BlockKind::Return
                        | BlockKind::Throw
                ) {
                    return Err(IrError::MissingTerminator(label(), kind.to_string()));
                }
            }
        }

        let succs = block.succs(self);
        let exit = function.get_exit_block(self);
        let agrees = match terminator.map(|stmt| stmt.get_op(self)) {
            Some(StmtOp::Goto { target }) => succs == [*target],
            Some(StmtOp::CondGoto { target, .. }) => succs.len() == 2 && succs[1] == *target,
            Some(StmtOp::Switch { default, cases, .. }) => {
                succs.len() == cases.len() + 1
                    && succs[0] == *default
                    && cases.iter().zip(&succs[1..]).all(|((_, b), s)| b == s)
            }
            Some(StmtOp::Return(_) | StmtOp::Throw(_)) => succs == [exit],
            _ => match kind {
                BlockKind::Fallthrough => succs.len() == 1,
                BlockKind::Exit => succs.is_empty(),
                _ => true,
            },
        };
        if !agrees {
            return Err(mismatch("successor list does not match the branch targets"));
        }
        Ok(())
    }

    fn verify_try(&self, block: Block, handlers: &[Block]) -> Result<(), IrError> {
        if let Some(handler) = handlers
            .iter()
            .find(|handler| !block.eh_succs(self).contains(handler))
        {
            return Err(IrError::TerminatorMismatch {
                block: block.get_label(self),
                reason: format!(
                    "handler {} has no exceptional edge",
                    handler.get_label(self)
                ),
            });
        }
        let finally_count = handlers
            .iter()
            .filter(|handler| handler.has_attr(self, BlockAttrs::FINALLY))
            .count();
        if finally_count > 1 {
            return Err(IrError::MultipleFinallyHandlers(block.get_label(self)));
        }
        Ok(())
    }

    // The use lists must be the exact inverse of the operand occurrences.
    fn verify_uses(&self, function: Function) -> Result<(), IrError> {
        let mut expected = FxIndexMap::<(Version, UseSite), usize>::default();
        for block in function.block_iter(self) {
            for phi in block.phis(self) {
                for operand in phi.operands(self) {
                    *expected.entry((*operand, UseSite::Phi(*phi))).or_default() += 1;
                }
            }
            for stmt in block.stmts(self) {
                for version in stmt.used_versions(self) {
                    *expected.entry((version, UseSite::Stmt(*stmt))).or_default() += 1;
                }
                for version in stmt.may_uses(self) {
                    *expected
                        .entry((*version, UseSite::MayUse(*stmt)))
                        .or_default() += 1;
                }
            }
        }

        let mut recorded = FxIndexMap::<(Version, UseSite), usize>::default();
        for variable in function.variables(self) {
            for version in variable.versions(self) {
                for site in version.uses(self) {
                    *recorded.entry((*version, *site)).or_default() += 1;
                }
            }
        }

        for ((version, site), count) in &recorded {
            if expected.get(&(*version, *site)) != Some(count) {
                return Err(IrError::DanglingUse {
                    version: version.get_name(self),
                    site: self.site_to_string(*site),
                });
            }
        }
        for ((version, site), count) in &expected {
            if recorded.get(&(*version, *site)) != Some(count) {
                return Err(IrError::UnrecordedUse {
                    version: version.get_name(self),
                    site: self.site_to_string(*site),
                });
            }
        }
        Ok(())
    }

    // Every non-zero version defined by a linked statement or phi must point back at it, and
    // every recorded definition must still be linked.
    fn verify_defs(&self, function: Function) -> Result<(), IrError> {
        let inconsistent = |version: Version| IrError::InconsistentDefinition {
            version: version.get_name(self),
        };
        let check = |version: Version, def: VersionDef| {
            if !version.is_zero(self) && version.get_def(self) != def {
                Err(inconsistent(version))
            } else {
                Ok(())
            }
        };

        for block in function.block_iter(self) {
            for phi in block.phis(self) {
                check(phi.get_result(self), VersionDef::Phi(*phi))?;
            }
            for stmt in block.stmts(self) {
                if let Some(def) = stmt.def(self) {
                    check(def, VersionDef::Stmt(*stmt))?;
                }
                for may_def in stmt.may_defs(self) {
                    check(may_def.result, VersionDef::MayDef(*stmt))?;
                }
            }
        }

        for variable in function.variables(self) {
            for version in variable.versions(self) {
                let linked = match version.get_def(self) {
                    VersionDef::None => true,
                    VersionDef::Stmt(stmt) => {
                        !stmt.is_deleted(self) && stmt.def(self) == Some(*version)
                    }
                    VersionDef::MayDef(stmt) => {
                        !stmt.is_deleted(self)
                            && stmt
                                .may_defs(self)
                                .iter()
                                .any(|may_def| may_def.result == *version)
                    }
                    VersionDef::Phi(phi) => {
                        !phi.is_deleted(self) && phi.get_result(self) == *version
                    }
                };
                if !linked {
                    return Err(inconsistent(*version));
                }
            }
        }
        Ok(())
    }

    fn site_to_string(&self, site: UseSite) -> String {
        match site {
            UseSite::Stmt(stmt) | UseSite::MayUse(stmt) => printer::stmt_to_string(self, stmt),
            UseSite::Phi(phi) => printer::phi_to_string(self, phi),
        }
    }
}

/// Check that every use of a renamed version in `function` is dominated by its definition.  Phi
/// operands are used at the end of the matching predecessor.  Blocks outside the tree are not
/// reachable and are ignored.
pub fn verify_ssa_dominance(
    context: &Context,
    function: Function,
    dom_tree: &DomTree,
) -> Result<(), IrError> {
    let not_dominated = |version: Version, block: Block| IrError::UseNotDominated {
        version: version.get_name(context),
        block: block.get_label(context),
    };

    for block in function.block_iter(context) {
        if !dom_tree.contains(block) {
            continue;
        }
        for phi in block.phis(context) {
            for (operand, pred) in phi.operands(context).iter().zip(block.preds(context)) {
                if !defined_before(context, dom_tree, *operand, *pred, None) {
                    return Err(not_dominated(*operand, *pred));
                }
            }
        }
        for stmt in block.stmts(context) {
            let used = stmt
                .used_versions(context)
                .into_iter()
                .chain(stmt.may_uses(context).iter().copied());
            for version in used {
                if !defined_before(context, dom_tree, version, block, Some(*stmt)) {
                    return Err(not_dominated(version, block));
                }
            }
        }
    }
    Ok(())
}

// Whether `version` is available in `block`, before `at` or at the end of the block when `at` is
// `None`.
fn defined_before(
    context: &Context,
    dom_tree: &DomTree,
    version: Version,
    block: Block,
    at: Option<Stmt>,
) -> bool {
    if version.is_zero(context) {
        return true;
    }
    let (def_block, def_stmt) = match version.get_def(context) {
        VersionDef::None => return false,
        VersionDef::Phi(phi) => (phi.get_block(context), None),
        VersionDef::Stmt(stmt) | VersionDef::MayDef(stmt) => (stmt.get_block(context), Some(stmt)),
    };
    if def_block != block {
        return dom_tree.dominates(def_block, block);
    }
    match (def_stmt, at) {
        (None, _) | (_, None) => true,
        (Some(def_stmt), Some(at)) => {
            let stmts = block.stmts(context);
            let def_idx = stmts.iter().position(|stmt| *stmt == def_stmt);
            let use_idx = stmts.iter().position(|stmt| *stmt == at);
            matches!((def_idx, use_idx), (Some(d), Some(u)) if d < u)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{compute_dom_tree, compute_post_order, Direction},
        phi::Phi,
        stmt::Expr,
        variable::VariableKind,
    };

    // entry -> cond ? left : right -> join
    fn diamond(context: &mut Context) -> (Function, [Block; 4]) {
        let func = Function::new(context, "f");
        let entry = func.get_entry_block(context);
        let cond = func.create_block(context);
        let left = func.create_block(context);
        let right = func.create_block(context);
        let join = func.create_block(context);
        entry.set_fallthrough(context, cond);
        cond.append(context)
            .cond_goto(Expr::Const(1), right, left);
        left.append(context).goto(join);
        right.set_fallthrough(context, join);
        join.append(context).ret(None);
        (func, [cond, left, right, join])
    }

    #[test]
    fn well_formed_function_passes() {
        let mut context = Context::new();
        diamond(&mut context);
        assert!(context.verify().is_ok());
    }

    #[test]
    fn phi_arity_is_checked() {
        let mut context = Context::new();
        let (func, [_, _, _, join]) = diamond(&mut context);
        let x = func.new_variable(&mut context, "x", VariableKind::Local, false);
        let phi = Phi::new(&mut context, join, x);
        phi.remove_operand(&mut context, 1);

        assert!(matches!(
            context.verify_function(func),
            Err(IrError::PhiArityMismatch {
                operands: 1,
                preds: 2,
                ..
            })
        ));
    }

    #[test]
    fn one_sided_edge_is_rejected() {
        let mut context = Context::new();
        let (func, [_, left, _, join]) = diamond(&mut context);
        join.remove_pred(&mut context, left).unwrap();

        assert!(matches!(
            context.verify_function(func),
            Err(IrError::InconsistentEdge { .. })
        ));
    }

    #[test]
    fn terminator_must_come_last() {
        let mut context = Context::new();
        let (func, [_, left, _, _]) = diamond(&mut context);
        left.append(&mut context).comment("after the goto");

        assert_eq!(
            context.verify_function(func),
            Err(IrError::MisplacedTerminator(left.get_label(&context)))
        );
    }

    #[test]
    fn unrecorded_use_is_reported() {
        let mut context = Context::new();
        let (func, [_, left, _, _]) = diamond(&mut context);
        let x = func.new_variable(&mut context, "x", VariableKind::Local, false);
        let x0 = x.zero_version(&context);
        let stmt = left
            .insert_stmt_at(&mut context, 0, StmtOp::AssertNonNull(Expr::Var(x0)));
        x0.remove_use(&mut context, UseSite::Stmt(stmt));

        assert!(matches!(
            context.verify_function(func),
            Err(IrError::UnrecordedUse { .. })
        ));
    }

    #[test]
    fn two_finally_handlers_are_rejected() {
        let mut context = Context::new();
        let func = Function::new(&mut context, "f");
        let entry = func.get_entry_block(&context);
        let body = func.create_block(&mut context);
        let first = func.create_block(&mut context);
        let second = func.create_block(&mut context);
        entry.set_fallthrough(&mut context, body);
        body.append(&mut context).try_region(vec![first, second]);
        body.append(&mut context).ret(None);
        for handler in [first, second] {
            handler.add_attrs(&mut context, BlockAttrs::FINALLY);
            handler.append(&mut context).catch();
            handler.append(&mut context).ret(None);
        }

        assert_eq!(
            context.verify_function(func),
            Err(IrError::MultipleFinallyHandlers(body.get_label(&context)))
        );
    }

    #[test]
    fn use_before_definition_is_not_dominated() {
        let mut context = Context::new();
        let (func, [_, left, right, _]) = diamond(&mut context);
        let x = func.new_variable(&mut context, "x", VariableKind::Local, false);
        let x1 = Version::new(&mut context, x);
        left.insert_stmt_at(
            &mut context,
            0,
            StmtOp::Assign {
                dst: x1,
                value: Expr::Const(1),
            },
        );
        right.append(&mut context).assert_non_null(Expr::Var(x1));

        let po = compute_post_order(&context, func, Direction::Forward);
        let dom_tree = compute_dom_tree(&context, &po, Direction::Forward).unwrap();
        assert_eq!(
            verify_ssa_dominance(&context, func, &dom_tree),
            Err(IrError::UseNotDominated {
                version: "x_1".to_owned(),
                block: right.get_label(&context),
            })
        );
    }
}
