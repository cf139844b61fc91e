//! Checks and rewrites applied to parsed expressions once their role is known:
//! assignment and deletion targets, annotated and augmented assignment, and the
//! ordering rules of call arguments.

use crate::{
    error::{CodeRange, CompileError},
    expressions::{Argument, DictItem, Expr, ExprContext, ExprLoc, Literal, Node},
    intern::StringId,
};

/// Marks `expr` and its nested targets as assigned to.
pub(super) fn as_store(expr: ExprLoc) -> Result<ExprLoc, CompileError> {
    with_context(expr, ExprContext::Store)
}

/// Marks `expr` and its nested targets as deleted.
pub(super) fn as_del(expr: ExprLoc) -> Result<ExprLoc, CompileError> {
    with_context(expr, ExprContext::Del)
}

fn with_context(target: ExprLoc, ctx: ExprContext) -> Result<ExprLoc, CompileError> {
    let ExprLoc { position, expr } = target;
    let expr = match expr {
        Expr::Name { id, .. } => Expr::Name { id, ctx },
        Expr::Attribute { value, attr, .. } => Expr::Attribute { value, attr, ctx },
        Expr::Subscript { value, slice, .. } => Expr::Subscript { value, slice, ctx },
        Expr::Starred { value, .. } => Expr::Starred {
            value: Box::new(with_context(*value, ctx)?),
            ctx,
        },
        Expr::Tuple { elts, .. } => Expr::Tuple {
            elts: with_context_all(elts, ctx)?,
            ctx,
        },
        Expr::List { elts, .. } => Expr::List {
            elts: with_context_all(elts, ctx)?,
            ctx,
        },
        Expr::Dict { items, .. } if ctx == ExprContext::Store => {
            let items = items
                .into_iter()
                .map(|item| match item {
                    DictItem::Pair { key, value } => Ok(DictItem::Pair {
                        key,
                        value: with_context(value, ctx)?,
                    }),
                    DictItem::Unpack(mapping) => Err(CompileError::syntax(
                        "can't use ** in dict destructuring",
                        mapping.position,
                    )),
                })
                .collect::<Result<_, _>>()?;
            Expr::Dict { items, ctx }
        }
        Expr::Literal(Literal::None | Literal::Bool(_)) => {
            return Err(CompileError::syntax(format!("can't {} keyword", verb(ctx)), position));
        }
        other => {
            return Err(CompileError::syntax(
                format!("can't {} {}", verb(ctx), other.describe()),
                position,
            ));
        }
    };
    Ok(ExprLoc::new(position, expr))
}

fn with_context_all(elts: Vec<ExprLoc>, ctx: ExprContext) -> Result<Vec<ExprLoc>, CompileError> {
    elts.into_iter().map(|elt| with_context(elt, ctx)).collect()
}

fn verb(ctx: ExprContext) -> &'static str {
    match ctx {
        ExprContext::Del => "delete",
        ExprContext::Load | ExprContext::Store => "assign to",
    }
}

/// Builds `target: annotation [= value]`.
///
/// Only a bare, unparenthesized name is a simple target.
pub(super) fn annotated_assignment(
    target: ExprLoc,
    annotation: ExprLoc,
    value: Option<ExprLoc>,
    parenthesized: bool,
) -> Result<Node, CompileError> {
    let msg = match &target.expr {
        Expr::Name { .. } | Expr::Attribute { .. } | Expr::Subscript { .. } => None,
        Expr::Tuple { .. } => Some("only single target (not tuple) can be annotated"),
        Expr::List { .. } => Some("only single target (not list) can be annotated"),
        _ => Some("illegal target for annotation"),
    };
    if let Some(msg) = msg {
        return Err(CompileError::syntax(msg, target.position));
    }
    let simple = matches!(target.expr, Expr::Name { .. }) && !parenthesized;
    Ok(Node::AnnAssign {
        target: as_store(target)?,
        annotation,
        value,
        simple,
    })
}

pub(super) fn augmented_target(target: ExprLoc) -> Result<ExprLoc, CompileError> {
    match target.expr {
        Expr::Name { .. } | Expr::Attribute { .. } | Expr::Subscript { .. } => as_store(target),
        _ => Err(CompileError::syntax(
            "illegal expression for augmented assignment",
            target.position,
        )),
    }
}

/// Enforces argument order: positional arguments before keywords, `*args`
/// before `**kwargs`, and each keyword at most once.
///
/// A positional argument after a keyword is reported at `call`, the range of
/// the whole call or class header.
pub(super) fn check_call_args(args: &[Argument], call: CodeRange) -> Result<(), CompileError> {
    let mut seen_keyword = false;
    let mut seen_double_star = false;
    let mut keywords: Vec<StringId> = Vec::new();
    for arg in args {
        match arg {
            Argument::Positional(value) => {
                if seen_double_star {
                    return Err(CompileError::syntax(
                        "positional argument follows keyword argument unpacking",
                        value.position,
                    ));
                }
                if seen_keyword {
                    return Err(CompileError::syntax(
                        "non-keyword argument follows keyword argument",
                        call,
                    ));
                }
            }
            Argument::Starred(value) => {
                if seen_double_star {
                    return Err(CompileError::syntax(
                        "iterable argument unpacking follows keyword argument unpacking",
                        value.position,
                    ));
                }
            }
            Argument::Keyword { name, .. } => {
                if keywords.contains(&name.name) {
                    return Err(CompileError::syntax("keyword argument repeated", name.position));
                }
                keywords.push(name.name);
                seen_keyword = true;
            }
            Argument::DoubleStarred(_) => seen_double_star = true,
        }
    }
    Ok(())
}
