//! Expression lowering, constant folding and conditional jumps.

use super::{Compiler, Op};
use crate::{
    bytecode::{
        code::Constant,
        instr::Label,
        op::{CompareOp, format_value},
    },
    error::CompileError,
    expressions::{
        BoolOperator, CmpOperator, Conversion, DictItem, Expr, ExprContext, ExprLoc, FStringPart, Literal, Operator,
        UnaryOperator,
    },
    intern::{StaticStrings, StringId},
    scope::ScopeKind,
};

/// Most items a single `BUILD_MAP` or `BUILD_CONST_KEY_MAP` takes.
const MAX_SUBDICT_ITEMS: usize = 0xFFFF;

impl Compiler<'_> {
    pub(super) fn visit_expr(&mut self, expr: &ExprLoc) -> Result<(), CompileError> {
        self.guarded(expr.position, |this| {
            this.advance_line(expr.position);
            this.expr_kind(expr)
        })
    }

    fn expr_kind(&mut self, expr: &ExprLoc) -> Result<(), CompileError> {
        if let Some(value) = self.constant_value(expr) {
            self.load_const(value);
            return Ok(());
        }
        match &expr.expr {
            Expr::Literal(literal) => self.load_const(literal_constant(literal)),
            Expr::Name { id, ctx } => self.name_op(*id, *ctx)?,
            Expr::JoinedStr(parts) => self.joined_str(parts)?,
            Expr::BoolOp { op, values } => self.bool_op(*op, values)?,
            Expr::BinOp { left, op, right } => {
                self.visit_expr(left)?;
                self.visit_expr(right)?;
                self.emit(binary_opcode(*op, false));
            }
            Expr::UnaryOp { op, operand } => {
                self.visit_expr(operand)?;
                self.emit(match op {
                    UnaryOperator::Not => Op::UnaryNot,
                    UnaryOperator::Invert => Op::UnaryInvert,
                    UnaryOperator::UAdd => Op::UnaryPositive,
                    UnaryOperator::USub => Op::UnaryNegative,
                });
            }
            Expr::Compare { left, comparisons } => self.compare(left, comparisons)?,
            Expr::Call { func, args } => self.call(func, args)?,
            Expr::Attribute { value, attr, ctx } => {
                self.visit_expr(value)?;
                let op = super::pick(*ctx, Op::LoadAttr, Op::StoreAttr, Op::DeleteAttr);
                let attr = self.name_str(*attr);
                self.emit_name(op, attr);
            }
            Expr::Subscript { value, slice, ctx } => {
                self.visit_expr(value)?;
                self.visit_expr(slice)?;
                self.emit(super::pick(*ctx, Op::BinarySubscr, Op::StoreSubscr, Op::DeleteSubscr));
            }
            Expr::Slice { lower, upper, step } => {
                for bound in [lower, upper] {
                    match bound {
                        Some(bound) => self.visit_expr(bound)?,
                        None => self.load_const(Constant::None),
                    }
                }
                let mut count = 2;
                if let Some(step) = step {
                    self.visit_expr(step)?;
                    count += 1;
                }
                self.emit_arg(Op::BuildSlice, count);
            }
            Expr::Starred { ctx, .. } => {
                let msg = match ctx {
                    ExprContext::Del => "try to delete starred expression.",
                    ExprContext::Store => "starred assignment target must be in a list or tuple",
                    ExprContext::Load => "can't use starred expression here",
                };
                return Err(CompileError::syntax(msg, expr.position));
            }
            Expr::Tuple { elts, ctx } => match ctx {
                ExprContext::Load => self.starunpack(elts, Op::BuildTuple, Op::BuildTuple, Op::BuildTupleUnpack)?,
                ExprContext::Store => self.store_sequence(elts, expr.position)?,
                ExprContext::Del => self.visit_all(elts)?,
            },
            Expr::List { elts, ctx } => match ctx {
                ExprContext::Load => self.starunpack(elts, Op::BuildList, Op::BuildTuple, Op::BuildListUnpack)?,
                ExprContext::Store => self.store_sequence(elts, expr.position)?,
                ExprContext::Del => self.visit_all(elts)?,
            },
            Expr::Set(elts) => self.starunpack(elts, Op::BuildSet, Op::BuildSet, Op::BuildSetUnpack)?,
            Expr::Dict { items, ctx } => match ctx {
                ExprContext::Store => self.store_dict(items)?,
                ExprContext::Load | ExprContext::Del => self.dict(items)?,
            },
            Expr::Comprehension(comp) => self.comprehension(comp, expr.position)?,
            Expr::Lambda(lambda) => self.lambda(lambda, expr.position)?,
            Expr::IfExp { test, body, orelse } => {
                let end = self.new_label();
                let next = self.new_label();
                self.jump_if(test, next, false)?;
                self.visit_expr(body)?;
                self.emit_jump(Op::JumpForward, end);
                self.bind(next)?;
                self.visit_expr(orelse)?;
                self.bind(end)?;
            }
            Expr::Await(value) => {
                let table = self.table();
                if !table.is_function_like() {
                    return Err(CompileError::syntax("'await' outside function", expr.position));
                }
                if !self.in_async_function() && table.kind != ScopeKind::Comprehension {
                    return Err(CompileError::syntax("'await' outside async function", expr.position));
                }
                self.visit_expr(value)?;
                self.emit(Op::GetAwaitable);
                self.load_const(Constant::None);
                self.emit(Op::YieldFrom);
            }
            Expr::Yield(value) => {
                if !self.in_function() {
                    return Err(CompileError::syntax("'yield' outside function", expr.position));
                }
                match value {
                    Some(value) => self.visit_expr(value)?,
                    None => self.load_const(Constant::None),
                }
                self.emit(Op::YieldValue);
            }
            Expr::YieldFrom(value) => {
                if !self.in_function() {
                    return Err(CompileError::syntax("'yield' outside function", expr.position));
                }
                if self.in_async_function() {
                    return Err(CompileError::syntax("yield from in async functions.", expr.position));
                }
                self.visit_expr(value)?;
                self.emit(Op::GetYieldFromIter);
                self.load_const(Constant::None);
                self.emit(Op::YieldFrom);
            }
            Expr::NamedExpr { target, value } => {
                self.visit_expr(value)?;
                self.emit(Op::DupTop);
                self.name_op(target.name, ExprContext::Store)?;
            }
        }
        Ok(())
    }

    pub(super) fn visit_all(&mut self, exprs: &[ExprLoc]) -> Result<(), CompileError> {
        for expr in exprs {
            self.visit_expr(expr)?;
        }
        Ok(())
    }

    /// The value of an expression that folds to a constant: literals, tuple
    /// displays of constants, negated numbers and `__debug__`.
    pub(super) fn constant_value(&self, expr: &ExprLoc) -> Option<Constant> {
        match &expr.expr {
            Expr::Literal(literal) => Some(literal_constant(literal)),
            Expr::Name {
                id,
                ctx: ExprContext::Load,
            } if *id == StringId::from(StaticStrings::DunderDebug) => Some(Constant::Bool(self.options.optimize == 0)),
            Expr::Tuple {
                elts,
                ctx: ExprContext::Load,
            } => elts
                .iter()
                .map(|elt| self.constant_value(elt))
                .collect::<Option<Vec<_>>>()
                .map(Constant::Tuple),
            Expr::UnaryOp {
                op: UnaryOperator::USub,
                operand,
            } => match operand.as_literal()? {
                Literal::Int(value) => Some(Constant::Int(-value)),
                Literal::Float(value) => Some(Constant::Float(-value)),
                Literal::Imaginary(value) => Some(Constant::Complex {
                    real: -0.0,
                    imag: -value,
                }),
                _ => None,
            },
            _ => None,
        }
    }

    /// Truth value of a test known at compile time.
    pub(super) fn constant_truth(&self, expr: &ExprLoc) -> Option<bool> {
        self.constant_value(expr).map(|value| is_truthy(&value))
    }

    /// Emits code that jumps to `target` when `expr` is `cond` and falls
    /// through otherwise.
    pub(super) fn jump_if(&mut self, expr: &ExprLoc, target: Label, cond: bool) -> Result<(), CompileError> {
        self.guarded(expr.position, |this| {
            this.advance_line(expr.position);
            this.jump_if_kind(expr, target, cond)
        })
    }

    fn jump_if_kind(&mut self, expr: &ExprLoc, target: Label, cond: bool) -> Result<(), CompileError> {
        match &expr.expr {
            Expr::UnaryOp {
                op: UnaryOperator::Not,
                operand,
            } => return self.jump_if(operand, target, !cond),
            Expr::BoolOp { op, values } => {
                let Some((last, rest)) = values.split_last() else {
                    return Err(CompileError::internal("boolean operation without operands"));
                };
                let is_or = *op == BoolOperator::Or;
                let short_circuit = if is_or == cond { target } else { self.new_label() };
                for value in rest {
                    self.jump_if(value, short_circuit, is_or)?;
                }
                self.jump_if(last, target, cond)?;
                if short_circuit != target {
                    self.bind(short_circuit)?;
                }
                return Ok(());
            }
            Expr::IfExp { test, body, orelse } => {
                let end = self.new_label();
                let next = self.new_label();
                self.jump_if(test, next, false)?;
                self.jump_if(body, target, cond)?;
                self.emit_jump(Op::JumpForward, end);
                self.bind(next)?;
                self.jump_if(orelse, target, cond)?;
                return self.bind(end);
            }
            Expr::Compare { left, comparisons } if comparisons.len() > 1 => {
                let Some(((last_op, last), rest)) = comparisons.split_last() else {
                    return Err(CompileError::internal("comparison without operands"));
                };
                let cleanup = self.new_label();
                self.visit_expr(left)?;
                for (op, comparator) in rest {
                    self.visit_expr(comparator)?;
                    self.emit(Op::DupTop);
                    self.emit(Op::RotThree);
                    self.emit_arg(Op::CompareOp, compare_arg(*op));
                    self.emit_jump(Op::PopJumpIfFalse, cleanup);
                }
                self.visit_expr(last)?;
                self.emit_arg(Op::CompareOp, compare_arg(*last_op));
                self.emit_jump(if cond { Op::PopJumpIfTrue } else { Op::PopJumpIfFalse }, target);
                let end = self.new_label();
                self.emit_jump(Op::JumpForward, end);
                self.bind(cleanup)?;
                self.emit(Op::PopTop);
                if !cond {
                    self.emit_jump(Op::JumpForward, target);
                }
                return self.bind(end);
            }
            _ => {}
        }
        self.visit_expr(expr)?;
        self.emit_jump(if cond { Op::PopJumpIfTrue } else { Op::PopJumpIfFalse }, target);
        Ok(())
    }

    fn bool_op(&mut self, op: BoolOperator, values: &[ExprLoc]) -> Result<(), CompileError> {
        let Some((last, rest)) = values.split_last() else {
            return Err(CompileError::internal("boolean operation without operands"));
        };
        let jump = match op {
            BoolOperator::And => Op::JumpIfFalseOrPop,
            BoolOperator::Or => Op::JumpIfTrueOrPop,
        };
        let end = self.new_label();
        for value in rest {
            self.visit_expr(value)?;
            self.emit_jump(jump, end);
        }
        self.visit_expr(last)?;
        self.bind(end)
    }

    /// `a < b < c` evaluates `b` once and stops at the first false link.
    fn compare(&mut self, left: &ExprLoc, comparisons: &[(CmpOperator, ExprLoc)]) -> Result<(), CompileError> {
        let Some(((last_op, last), rest)) = comparisons.split_last() else {
            return Err(CompileError::internal("comparison without operands"));
        };
        self.visit_expr(left)?;
        if rest.is_empty() {
            self.visit_expr(last)?;
            self.emit_arg(Op::CompareOp, compare_arg(*last_op));
            return Ok(());
        }
        let cleanup = self.new_label();
        for (op, comparator) in rest {
            self.visit_expr(comparator)?;
            self.emit(Op::DupTop);
            self.emit(Op::RotThree);
            self.emit_arg(Op::CompareOp, compare_arg(*op));
            self.emit_jump(Op::JumpIfFalseOrPop, cleanup);
        }
        self.visit_expr(last)?;
        self.emit_arg(Op::CompareOp, compare_arg(*last_op));
        let end = self.new_label();
        self.emit_jump(Op::JumpForward, end);
        self.bind(cleanup)?;
        self.emit(Op::RotTwo);
        self.emit(Op::PopTop);
        self.bind(end)
    }

    /// Builds a tuple, list or set display, concatenating runs of plain items
    /// and `*iterable` items when any are starred.
    fn starunpack(&mut self, elts: &[ExprLoc], single: Op, inner: Op, outer: Op) -> Result<(), CompileError> {
        let mut seen = 0usize;
        let mut subitems = 0usize;
        for elt in elts {
            if let Expr::Starred { value, .. } = &elt.expr {
                if seen > 0 {
                    self.emit_count(inner, seen);
                    seen = 0;
                    subitems += 1;
                }
                self.visit_expr(value)?;
                subitems += 1;
            } else {
                self.visit_expr(elt)?;
                seen += 1;
            }
        }
        if subitems > 0 {
            if seen > 0 {
                self.emit_count(inner, seen);
                subitems += 1;
            }
            self.emit_count(outer, subitems);
        } else {
            self.emit_count(single, seen);
        }
        Ok(())
    }

    fn dict(&mut self, items: &[DictItem]) -> Result<(), CompileError> {
        let mut containers = 0usize;
        let mut elements = 0usize;
        let mut last_is_unpack = false;
        for (index, item) in items.iter().enumerate() {
            last_is_unpack = matches!(item, DictItem::Unpack(_));
            if elements == MAX_SUBDICT_ITEMS || (elements > 0 && last_is_unpack) {
                self.subdict(&items[index - elements..index])?;
                containers += 1;
                elements = 0;
            }
            match item {
                DictItem::Unpack(mapping) => {
                    self.visit_expr(mapping)?;
                    containers += 1;
                }
                DictItem::Pair { .. } => elements += 1,
            }
        }
        if elements > 0 || containers == 0 {
            self.subdict(&items[items.len() - elements..])?;
            containers += 1;
        }
        if containers > 1 || last_is_unpack {
            self.emit_count(Op::BuildMapUnpack, containers);
        }
        Ok(())
    }

    /// A run of `key: value` pairs; constant keys go into one tuple for
    /// `BUILD_CONST_KEY_MAP`.
    fn subdict(&mut self, items: &[DictItem]) -> Result<(), CompileError> {
        let pairs: Vec<(&ExprLoc, &ExprLoc)> = items
            .iter()
            .filter_map(|item| match item {
                DictItem::Pair { key, value } => Some((key, value)),
                DictItem::Unpack(_) => None,
            })
            .collect();
        let constant_keys = if pairs.len() > 1 {
            pairs
                .iter()
                .map(|(key, _)| self.constant_value(key))
                .collect::<Option<Vec<_>>>()
        } else {
            None
        };
        if let Some(keys) = constant_keys {
            for (_, value) in &pairs {
                self.visit_expr(value)?;
            }
            self.load_const(Constant::Tuple(keys));
            self.emit_count(Op::BuildConstKeyMap, pairs.len());
        } else {
            for (key, value) in &pairs {
                self.visit_expr(key)?;
                self.visit_expr(value)?;
            }
            self.emit_count(Op::BuildMap, pairs.len());
        }
        Ok(())
    }

    fn joined_str(&mut self, parts: &[FStringPart]) -> Result<(), CompileError> {
        for part in parts {
            match part {
                FStringPart::Literal(text) => self.load_const(Constant::Str(text.clone())),
                FStringPart::Formatted {
                    value,
                    conversion,
                    format_spec,
                } => {
                    self.visit_expr(value)?;
                    let mut flags = match conversion {
                        Conversion::None => 0,
                        Conversion::Str => format_value::CONVERSION_STR,
                        Conversion::Repr => format_value::CONVERSION_REPR,
                        Conversion::Ascii => format_value::CONVERSION_ASCII,
                    };
                    if let Some(spec) = format_spec {
                        self.joined_str(spec)?;
                        flags |= format_value::HAS_SPEC;
                    }
                    self.emit_arg(Op::FormatValue, flags);
                }
            }
        }
        match parts.len() {
            0 => self.load_const(Constant::Str(String::new())),
            1 => {}
            count => self.emit_count(Op::BuildString, count),
        }
        Ok(())
    }
}

pub(super) fn literal_constant(literal: &Literal) -> Constant {
    match literal {
        Literal::None => Constant::None,
        Literal::Bool(value) => Constant::Bool(*value),
        Literal::Ellipsis => Constant::Ellipsis,
        Literal::Int(value) => Constant::Int(value.clone()),
        Literal::Float(value) => Constant::Float(*value),
        Literal::Imaginary(value) => Constant::Complex {
            real: 0.0,
            imag: *value,
        },
        Literal::Str(value) => Constant::Str(value.clone()),
        Literal::Bytes(value) => Constant::Bytes(value.clone()),
    }
}

fn is_truthy(value: &Constant) -> bool {
    match value {
        Constant::None => false,
        Constant::Bool(value) => *value,
        Constant::Int(value) => value.sign() != num_bigint::Sign::NoSign,
        Constant::Float(value) => *value != 0.0,
        Constant::Complex { real, imag } => *real != 0.0 || *imag != 0.0,
        Constant::Str(value) => !value.is_empty(),
        Constant::Bytes(value) => !value.is_empty(),
        Constant::Tuple(items) => !items.is_empty(),
        Constant::Ellipsis | Constant::Code(_) => true,
    }
}

pub(super) fn binary_opcode(op: Operator, inplace: bool) -> Op {
    match (op, inplace) {
        (Operator::Add, false) => Op::BinaryAdd,
        (Operator::Add, true) => Op::InplaceAdd,
        (Operator::Sub, false) => Op::BinarySubtract,
        (Operator::Sub, true) => Op::InplaceSubtract,
        (Operator::Mult, false) => Op::BinaryMultiply,
        (Operator::Mult, true) => Op::InplaceMultiply,
        (Operator::MatMult, false) => Op::BinaryMatrixMultiply,
        (Operator::MatMult, true) => Op::InplaceMatrixMultiply,
        (Operator::Div, false) => Op::BinaryTrueDivide,
        (Operator::Div, true) => Op::InplaceTrueDivide,
        (Operator::Mod, false) => Op::BinaryModulo,
        (Operator::Mod, true) => Op::InplaceModulo,
        (Operator::Pow, false) => Op::BinaryPower,
        (Operator::Pow, true) => Op::InplacePower,
        (Operator::LShift, false) => Op::BinaryLshift,
        (Operator::LShift, true) => Op::InplaceLshift,
        (Operator::RShift, false) => Op::BinaryRshift,
        (Operator::RShift, true) => Op::InplaceRshift,
        (Operator::BitOr, false) => Op::BinaryOr,
        (Operator::BitOr, true) => Op::InplaceOr,
        (Operator::BitXor, false) => Op::BinaryXor,
        (Operator::BitXor, true) => Op::InplaceXor,
        (Operator::BitAnd, false) => Op::BinaryAnd,
        (Operator::BitAnd, true) => Op::InplaceAnd,
        (Operator::FloorDiv, false) => Op::BinaryFloorDivide,
        (Operator::FloorDiv, true) => Op::InplaceFloorDivide,
    }
}

fn compare_arg(op: CmpOperator) -> u32 {
    let op = match op {
        CmpOperator::Eq => CompareOp::Eq,
        CmpOperator::NotEq => CompareOp::NotEq,
        CmpOperator::Lt => CompareOp::Lt,
        CmpOperator::LtE => CompareOp::LtE,
        CmpOperator::Gt => CompareOp::Gt,
        CmpOperator::GtE => CompareOp::GtE,
        CmpOperator::Is => CompareOp::Is,
        CmpOperator::IsNot => CompareOp::IsNot,
        CmpOperator::In => CompareOp::In,
        CmpOperator::NotIn => CompareOp::NotIn,
    };
    u32::from(op as u8)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::super::tests::{compile, compile_err, listing};

    fn module_listing(source: &str) -> Vec<String> {
        let mut lines = listing(&compile(source));
        // drop the implicit `return None`
        lines.truncate(lines.len() - 2);
        lines
    }

    #[test]
    fn test_constant_tuple_is_folded() {
        assert_eq!(module_listing("x = (1, (2, 'a'), -3)\n"), vec!["LOAD_CONST (1, (2, 'a'), -3)", "STORE_NAME x"]);
    }

    #[test]
    fn test_negative_imaginary() {
        assert_eq!(module_listing("x = -2j\n"), vec!["LOAD_CONST (-0-2j)", "STORE_NAME x"]);
    }

    #[test]
    fn test_list_display() {
        assert_eq!(
            module_listing("y = [x, 2, 3]\n"),
            vec!["LOAD_NAME x", "LOAD_CONST 2", "LOAD_CONST 3", "BUILD_LIST 3", "STORE_NAME y"]
        );
    }

    #[test]
    fn test_starred_list_display() {
        assert_eq!(
            module_listing("y = [1, *a, 2]\n"),
            vec![
                "LOAD_CONST 1",
                "BUILD_TUPLE 1",
                "LOAD_NAME a",
                "LOAD_CONST 2",
                "BUILD_TUPLE 1",
                "BUILD_LIST_UNPACK 3",
                "STORE_NAME y",
            ]
        );
    }

    #[test]
    fn test_dict_with_constant_keys() {
        assert_eq!(
            module_listing("d = {'a': x, 'b': 2}\n"),
            vec![
                "LOAD_NAME x",
                "LOAD_CONST 2",
                "LOAD_CONST ('a', 'b')",
                "BUILD_CONST_KEY_MAP 2",
                "STORE_NAME d",
            ]
        );
    }

    #[test]
    fn test_dict_with_unpacking() {
        assert_eq!(
            module_listing("d = {k: 1, **m}\n"),
            vec![
                "LOAD_NAME k",
                "LOAD_CONST 1",
                "BUILD_MAP 1",
                "LOAD_NAME m",
                "BUILD_MAP_UNPACK 2",
                "STORE_NAME d",
            ]
        );
    }

    #[test]
    fn test_chained_comparison() {
        assert_eq!(
            module_listing("r = a < b < c\n"),
            vec![
                "LOAD_NAME a",
                "LOAD_NAME b",
                "DUP_TOP",
                "ROT_THREE",
                "COMPARE_OP 0",
                "JUMP_IF_FALSE_OR_POP 18",
                "LOAD_NAME c",
                "COMPARE_OP 0",
                "JUMP_FORWARD 4",
                "ROT_TWO",
                "POP_TOP",
                "STORE_NAME r",
            ]
        );
    }

    #[test]
    fn test_bool_op() {
        assert_eq!(
            module_listing("r = a and b or c\n"),
            vec![
                "LOAD_NAME a",
                "JUMP_IF_FALSE_OR_POP 6",
                "LOAD_NAME b",
                "JUMP_IF_TRUE_OR_POP 10",
                "LOAD_NAME c",
                "STORE_NAME r",
            ]
        );
    }

    #[test]
    fn test_not_in_jump_is_inverted() {
        assert_eq!(
            module_listing("if not a:\n    b()\n"),
            vec!["LOAD_NAME a", "POP_JUMP_IF_TRUE 10", "LOAD_NAME b", "CALL_FUNCTION 0", "POP_TOP"]
        );
    }

    #[test]
    fn test_fstring() {
        assert_eq!(
            module_listing("s = f'x={x!r:>{w}}!'\n"),
            vec![
                "LOAD_CONST 'x='",
                "LOAD_NAME x",
                "LOAD_CONST '>'",
                "LOAD_NAME w",
                "FORMAT_VALUE 0",
                "BUILD_STRING 2",
                "FORMAT_VALUE 6",
                "LOAD_CONST '!'",
                "BUILD_STRING 3",
                "STORE_NAME s",
            ]
        );
    }

    #[test]
    fn test_slices() {
        assert_eq!(
            module_listing("y = x[1:]\nz = x[::2]\n"),
            vec![
                "LOAD_NAME x",
                "LOAD_CONST 1",
                "LOAD_CONST None",
                "BUILD_SLICE 2",
                "BINARY_SUBSCR",
                "STORE_NAME y",
                "LOAD_NAME x",
                "LOAD_CONST None",
                "LOAD_CONST None",
                "LOAD_CONST 2",
                "BUILD_SLICE 3",
                "BINARY_SUBSCR",
                "STORE_NAME z",
            ]
        );
    }

    #[test]
    fn test_walrus() {
        assert_eq!(
            module_listing("print(y := 3)\n"),
            vec![
                "LOAD_NAME print",
                "LOAD_CONST 3",
                "DUP_TOP",
                "STORE_NAME y",
                "CALL_FUNCTION 1",
                "POP_TOP",
            ]
        );
    }

    #[test]
    fn test_context_errors() {
        assert_eq!(compile_err("await x\n"), "'await' outside function");
        assert_eq!(compile_err("def f():\n    await x\n"), "'await' outside async function");
        assert_eq!(compile_err("yield 1\n"), "'yield' outside function");
        assert_eq!(compile_err("class C:\n    yield\n"), "'yield' outside function");
        assert_eq!(
            compile_err("async def f():\n    yield from x\n"),
            "yield from in async functions."
        );
        assert_eq!(compile_err("x = *a\n"), "can't use starred expression here");
        assert_eq!(
            compile_err("*a = x\n"),
            "starred assignment target must be in a list or tuple"
        );
        assert_eq!(
            compile_err("for *a in x:\n    pass\n"),
            "starred assignment target must be in a list or tuple"
        );
    }
}
