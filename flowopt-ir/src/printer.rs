//! Print IR to human readable text, and CFGs to Graphviz dot.
//!
//! This module implements a small document based pretty-printer.  The text is meant for logs and
//! test expectations; there is no parser reading it back.

use std::fmt::Write;

use crate::{
    block::Block,
    context::Context,
    function::Function,
    phi::Phi,
    stmt::{Expr, Stmt, StmtOp},
    variable::VariableKind,
};

#[derive(Debug)]
pub(crate) enum Doc {
    Empty,
    Space,

    Text(String),
    Line(Box<Doc>),

    Pair(Box<Doc>, Box<Doc>),

    List(Vec<Doc>),
    ListSep(Vec<Doc>, Box<Doc>),

    Indent(i64, Box<Doc>),
}

impl Doc {
    pub(crate) fn text<S: Into<String>>(s: S) -> Self {
        Doc::Text(s.into())
    }

    fn line(doc: Doc) -> Self {
        Doc::Line(Box::new(doc))
    }

    pub(crate) fn text_line<S: Into<String>>(s: S) -> Self {
        Doc::Line(Box::new(Doc::Text(s.into())))
    }

    fn indent(n: i64, doc: Doc) -> Doc {
        Doc::Indent(n, Box::new(doc))
    }

    fn list_sep(docs: Vec<Doc>, sep: Doc) -> Doc {
        Doc::ListSep(docs, Box::new(sep))
    }

    pub(crate) fn append(self, doc: Doc) -> Doc {
        match (&self, &doc) {
            (Doc::Empty, _) => doc,
            (_, Doc::Empty) => self,
            _ => Doc::Pair(Box::new(self), Box::new(doc)),
        }
    }

    fn and(self, doc: Doc) -> Doc {
        match doc {
            Doc::Empty => doc,
            _ => Doc::Pair(Box::new(self), Box::new(doc)),
        }
    }

    pub(crate) fn build(self) -> String {
        build_doc(self, 0)
    }
}

/// Pretty-print every function of a [`Context`] to a string.
pub fn to_string(context: &Context) -> String {
    Doc::list_sep(
        context
            .function_iter()
            .map(|function| function_to_doc(context, function))
            .collect(),
        Doc::line(Doc::Empty),
    )
    .build()
}

pub fn function_to_string(context: &Context, function: Function) -> String {
    function_to_doc(context, function).build()
}

pub fn block_to_string(context: &Context, block: Block) -> String {
    block_to_doc(context, block).build()
}

fn function_to_doc(context: &Context, function: Function) -> Doc {
    let ssa = if function.is_in_ssa(context) {
        " ssa"
    } else {
        ""
    };
    Doc::text_line(format!("fn {}{ssa} {{", function.get_name(context)))
        .append(Doc::indent(
            4,
            Doc::list_sep(
                vec![
                    Doc::List(
                        function
                            .variables(context)
                            .iter()
                            .map(|var| {
                                let kind = match var.get_kind(context) {
                                    VariableKind::Local => "local",
                                    VariableKind::AddrTaken => "addr_taken",
                                    VariableKind::Global => "global",
                                };
                                let volatile = if var.is_volatile(context) {
                                    " volatile"
                                } else {
                                    ""
                                };
                                Doc::text_line(format!(
                                    "var {}: {kind}{volatile}",
                                    var.get_name(context)
                                ))
                            })
                            .collect(),
                    ),
                    Doc::list_sep(
                        function
                            .block_iter(context)
                            .map(|block| block_to_doc(context, block))
                            .collect(),
                        Doc::line(Doc::Empty),
                    ),
                ],
                Doc::line(Doc::Empty),
            ),
        ))
        .append(Doc::text_line("}"))
}

fn block_to_doc(context: &Context, block: Block) -> Doc {
    let preds = block
        .preds(context)
        .iter()
        .map(|pred| pred.get_label(context))
        .collect::<Vec<_>>()
        .join(", ");
    let attrs = block
        .attrs(context)
        .iter_names()
        .map(|(name, _)| name.to_lowercase())
        .collect::<Vec<_>>();
    let attrs = if attrs.is_empty() {
        Doc::Empty
    } else {
        Doc::text(format!("[{}]", attrs.join(", ")))
    };
    let eh_succs = if block.eh_succs(context).is_empty() {
        Doc::Empty
    } else {
        Doc::text(format!(
            "handlers({})",
            block
                .eh_succs(context)
                .iter()
                .map(|succ| succ.get_label(context))
                .collect::<Vec<_>>()
                .join(", ")
        ))
    };
    // A fallthrough has no statement to name its target.
    let fallthrough = match block.get_kind(context) {
        crate::block::BlockKind::Fallthrough => block
            .succs(context)
            .first()
            .map(|succ| Doc::text_line(format!("fallthrough {}", succ.get_label(context))))
            .unwrap_or(Doc::Empty),
        _ => Doc::Empty,
    };

    Doc::line(
        Doc::text(format!(
            "{} ({}) preds({preds})",
            block.get_label(context),
            block.get_kind(context)
        ))
        .append(Doc::Space.and(attrs))
        .append(Doc::Space.and(eh_succs))
        .append(Doc::text(":")),
    )
    .append(Doc::indent(
        4,
        Doc::List(
            block
                .phis(context)
                .iter()
                .map(|phi| Doc::text_line(phi_to_string(context, *phi)))
                .chain(
                    block
                        .stmts(context)
                        .iter()
                        .map(|stmt| Doc::text_line(stmt_to_string(context, *stmt))),
                )
                .collect(),
        )
        .append(fallthrough),
    ))
}

pub fn phi_to_string(context: &Context, phi: Phi) -> String {
    let operands = phi
        .operands(context)
        .iter()
        .map(|operand| operand.get_name(context))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} = phi({operands})", phi.get_result(context).get_name(context))
}

/// Print a single statement, with its may-defs (`chi`) and may-uses (`mu`).
pub fn stmt_to_string(context: &Context, stmt: Stmt) -> String {
    let args = |exprs: &[Expr]| {
        exprs
            .iter()
            .map(|expr| expr_to_string(context, expr))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mut text = match stmt.get_op(context) {
        StmtOp::Assign { dst, value } => format!(
            "{} = {}",
            dst.get_name(context),
            expr_to_string(context, value)
        ),
        StmtOp::Store {
            addr,
            value,
            volatile,
        } => format!(
            "{}*{} = {}",
            if *volatile { "volatile " } else { "" },
            expr_to_string(context, addr),
            expr_to_string(context, value)
        ),
        StmtOp::Call {
            callee,
            args: call_args,
            result,
        } => {
            let dst = result
                .map(|result| format!("{} = ", result.get_name(context)))
                .unwrap_or_default();
            format!("{dst}call {callee}({})", args(call_args))
        }
        StmtOp::AssertNonNull(expr) => {
            format!("assert_non_null {}", expr_to_string(context, expr))
        }
        StmtOp::CondGoto { cond, target } => format!(
            "if {} goto {}",
            expr_to_string(context, cond),
            target.get_label(context)
        ),
        StmtOp::Goto { target } => format!("goto {}", target.get_label(context)),
        StmtOp::Switch {
            value,
            default,
            cases,
        } => format!(
            "switch {} default {} [{}]",
            expr_to_string(context, value),
            default.get_label(context),
            cases
                .iter()
                .map(|(case, block)| format!("{case}: {}", block.get_label(context)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        StmtOp::Return(Some(value)) => format!("ret {}", expr_to_string(context, value)),
        StmtOp::Return(None) => "ret".to_owned(),
        StmtOp::Throw(value) => format!("throw {}", expr_to_string(context, value)),
        StmtOp::Try { handlers } => format!(
            "try [{}]",
            handlers
                .iter()
                .map(|handler| handler.get_label(context))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        StmtOp::Catch => "catch".to_owned(),
        StmtOp::Comment(text) => format!("// {text}"),
    };

    for may_def in stmt.may_defs(context) {
        let _ = write!(
            text,
            " chi({} = {})",
            may_def.result.get_name(context),
            may_def.operand.get_name(context)
        );
    }
    if !stmt.may_uses(context).is_empty() {
        let _ = write!(
            text,
            " mu({})",
            stmt.may_uses(context)
                .iter()
                .map(|version| version.get_name(context))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    text
}

pub fn expr_to_string(context: &Context, expr: &Expr) -> String {
    match expr {
        Expr::Const(value) => value.to_string(),
        Expr::Var(version) => version.get_name(context),
        Expr::AddrOf(var) => format!("&{}", var.get_name(context)),
        Expr::Unary(op, arg) => format!("{}{}", op.symbol(), expr_to_string(context, arg)),
        Expr::Binary(op, lhs, rhs) => format!(
            "({} {} {})",
            expr_to_string(context, lhs),
            op.symbol(),
            expr_to_string(context, rhs)
        ),
        Expr::Load { addr, volatile } => format!(
            "{}*{}",
            if *volatile { "volatile " } else { "" },
            expr_to_string(context, addr)
        ),
    }
}

/// Print the CFG of `function` in the graphviz dot format.  Exceptional edges are dashed.
pub fn cfg_to_dot(context: &Context, function: Function) -> String {
    let mut res = format!("digraph {} {{\n", function.get_name(context));
    for block in function.block_iter(context) {
        let _ = writeln!(
            res,
            "\t{} [label=\"{} ({})\"]",
            block.get_label(context),
            block.get_label(context),
            block.get_kind(context)
        );
        for succ in block.succs(context) {
            let _ = writeln!(
                res,
                "\t{} -> {}",
                block.get_label(context),
                succ.get_label(context)
            );
        }
        for handler in block.eh_succs(context) {
            let _ = writeln!(
                res,
                "\t{} -> {} [style=dashed]",
                block.get_label(context),
                handler.get_label(context)
            );
        }
    }
    res += "}\n";
    res
}

/// There will be a much more efficient way to do this, but for now this will do.
fn build_doc(doc: Doc, indent: i64) -> String {
    match doc {
        Doc::Empty => "".into(),
        Doc::Space => " ".into(),

        Doc::Text(t) => t,
        Doc::Line(d) => {
            if matches!(*d, Doc::Empty) {
                "\n".into()
            } else {
                format!("{}{}\n", " ".repeat(indent as usize), build_doc(*d, indent))
            }
        }

        Doc::Pair(l, r) => [build_doc(*l, indent), build_doc(*r, indent)].concat(),

        Doc::List(v) => v
            .into_iter()
            .map(|d| build_doc(d, indent))
            .collect::<Vec<String>>()
            .concat(),
        Doc::ListSep(v, s) => v
            .into_iter()
            .filter_map(|d| match &d {
                Doc::Empty => None,
                Doc::List(vs) => {
                    if vs.is_empty() {
                        None
                    } else {
                        Some(build_doc(d, indent))
                    }
                }
                _ => Some(build_doc(d, indent)),
            })
            .collect::<Vec<String>>()
            .join(&build_doc(*s, indent)),

        Doc::Indent(n, d) => build_doc(*d, indent + n),
    }
}
