//! Assignment targets: plain, destructuring, augmented and annotated.

use super::{Compiler, Op};
use crate::{
    bytecode::code::Constant,
    error::{CodeRange, CompileError},
    expressions::{DictItem, Expr, ExprContext, ExprLoc, Operator},
    intern::StaticStrings,
    scope::ScopeKind,
};

use super::expr::binary_opcode;

/// Largest element count `UNPACK_EX` can encode after the starred target.
const MAX_UNPACK_AFTER_STAR: usize = (i32::MAX >> 8) as usize;

impl Compiler<'_> {
    /// `a = b = value`: the value is evaluated once and stored left to right.
    pub(super) fn assign(&mut self, targets: &[ExprLoc], value: &ExprLoc) -> Result<(), CompileError> {
        self.visit_expr(value)?;
        for (index, target) in targets.iter().enumerate() {
            if index + 1 < targets.len() {
                self.emit(Op::DupTop);
            }
            self.visit_expr(target)?;
        }
        Ok(())
    }

    /// Unpacks the value on the stack into a tuple or list target.
    pub(super) fn store_sequence(&mut self, elts: &[ExprLoc], position: CodeRange) -> Result<(), CompileError> {
        let starred: Vec<usize> = elts
            .iter()
            .enumerate()
            .filter(|(_, elt)| matches!(elt.expr, Expr::Starred { .. }))
            .map(|(index, _)| index)
            .collect();
        match starred.as_slice() {
            [] => self.emit_count(Op::UnpackSequence, elts.len()),
            &[star] => {
                let after = elts.len() - star - 1;
                if star >= 256 || after >= MAX_UNPACK_AFTER_STAR {
                    return Err(CompileError::syntax(
                        "too many expressions in star-unpacking assignment",
                        position,
                    ));
                }
                self.emit_count(Op::UnpackEx, star | (after << 8));
            }
            many => {
                return Err(CompileError::syntax(
                    format!("{} starred expressions in assignment", many.len()),
                    position,
                ));
            }
        }
        for elt in elts {
            match &elt.expr {
                Expr::Starred { value, .. } => self.visit_expr(value)?,
                _ => self.visit_expr(elt)?,
            }
        }
        Ok(())
    }

    /// `{'a': x, 'b': y} = mapping` binds `x = mapping['a']` and `y = mapping['b']`.
    pub(super) fn store_dict(&mut self, items: &[DictItem]) -> Result<(), CompileError> {
        for item in items {
            let DictItem::Pair { key, value } = item else {
                return Err(CompileError::internal("dict unpacking in an assignment target"));
            };
            self.emit(Op::DupTop);
            self.visit_expr(key)?;
            self.emit(Op::BinarySubscr);
            self.visit_expr(value)?;
        }
        self.emit(Op::PopTop);
        Ok(())
    }

    pub(super) fn aug_assign(&mut self, target: &ExprLoc, op: Operator, value: &ExprLoc) -> Result<(), CompileError> {
        let inplace = binary_opcode(op, true);
        match &target.expr {
            Expr::Name { id, .. } => {
                self.name_op(*id, ExprContext::Load)?;
                self.visit_expr(value)?;
                self.emit(inplace);
                self.name_op(*id, ExprContext::Store)?;
            }
            Expr::Attribute { value: object, attr, .. } => {
                let attr = self.name_str(*attr);
                self.visit_expr(object)?;
                self.emit(Op::DupTop);
                self.emit_name(Op::LoadAttr, attr);
                self.visit_expr(value)?;
                self.emit(inplace);
                self.emit(Op::RotTwo);
                self.emit_name(Op::StoreAttr, attr);
            }
            Expr::Subscript { value: object, slice, .. } => {
                self.visit_expr(object)?;
                self.visit_expr(slice)?;
                self.emit(Op::DupTopTwo);
                self.emit(Op::BinarySubscr);
                self.visit_expr(value)?;
                self.emit(inplace);
                self.emit(Op::RotThree);
                self.emit(Op::StoreSubscr);
            }
            _ => {
                return Err(CompileError::syntax(
                    "illegal expression for augmented assignment",
                    target.position,
                ));
            }
        }
        Ok(())
    }

    /// `target: annotation [= value]`.
    ///
    /// Annotations of simple names are recorded in `__annotations__` at module
    /// and class level and never evaluated inside functions.
    pub(super) fn ann_assign(
        &mut self,
        target: &ExprLoc,
        annotation: &ExprLoc,
        value: Option<&ExprLoc>,
        simple: bool,
    ) -> Result<(), CompileError> {
        if let Some(value) = value {
            self.visit_expr(value)?;
            self.visit_expr(target)?;
        }
        let at_top = matches!(self.table().kind, ScopeKind::Module | ScopeKind::Class);
        match &target.expr {
            Expr::Name { id, .. } => {
                if simple && at_top {
                    self.visit_expr(annotation)?;
                    self.emit_name(Op::LoadName, StaticStrings::DunderAnnotations.into());
                    self.load_const(Constant::Str(self.name_str(*id).to_owned()));
                    self.emit(Op::StoreSubscr);
                }
            }
            Expr::Attribute { value: object, .. } => {
                if value.is_none() {
                    self.evaluate_and_drop(object)?;
                }
            }
            Expr::Subscript { value: object, slice, .. } => {
                if value.is_none() {
                    self.evaluate_and_drop(object)?;
                    self.check_annotated_slice(slice)?;
                }
            }
            _ => {
                return Err(CompileError::syntax(
                    "illegal target for annotation",
                    target.position,
                ));
            }
        }
        if !simple && at_top {
            self.evaluate_and_drop(annotation)?;
        }
        Ok(())
    }

    fn evaluate_and_drop(&mut self, expr: &ExprLoc) -> Result<(), CompileError> {
        self.visit_expr(expr)?;
        self.emit(Op::PopTop);
        Ok(())
    }

    /// Evaluates the parts of a subscript that has no value to store.
    fn check_annotated_slice(&mut self, slice: &ExprLoc) -> Result<(), CompileError> {
        match &slice.expr {
            Expr::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.evaluate_and_drop(part)?;
                }
                Ok(())
            }
            Expr::Tuple { elts, .. } if elts.iter().any(|elt| matches!(elt.expr, Expr::Slice { .. })) => {
                for elt in elts {
                    self.check_annotated_slice(elt)?;
                }
                Ok(())
            }
            _ => self.evaluate_and_drop(slice),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::super::tests::{compile, compile_err, find_code, listing};

    fn body_listing(source: &str) -> Vec<String> {
        let mut lines = listing(&compile(source));
        lines.truncate(lines.len() - 2);
        lines
    }

    #[test]
    fn test_chained_assignment() {
        assert_eq!(
            body_listing("a = b.c = 1\n"),
            vec!["LOAD_CONST 1", "DUP_TOP", "STORE_NAME a", "LOAD_NAME b", "STORE_ATTR c"]
        );
    }

    #[test]
    fn test_star_unpacking() {
        assert_eq!(
            body_listing("a, b, *rest, c = x\n"),
            vec![
                "LOAD_NAME x",
                "UNPACK_EX 258",
                "STORE_NAME a",
                "STORE_NAME b",
                "STORE_NAME rest",
                "STORE_NAME c",
            ]
        );
    }

    #[test]
    fn test_nested_unpacking() {
        assert_eq!(
            body_listing("[a, (b, *c)] = x\n"),
            vec![
                "LOAD_NAME x",
                "UNPACK_SEQUENCE 2",
                "STORE_NAME a",
                "UNPACK_EX 1",
                "STORE_NAME b",
                "STORE_NAME c",
            ]
        );
    }

    #[test]
    fn test_two_starred_targets() {
        assert_eq!(compile_err("*a, *b = x\n"), "2 starred expressions in assignment");
        assert_eq!(compile_err("a, (*b, *c, *d) = x\n"), "3 starred expressions in assignment");
    }

    #[test]
    fn test_dict_target() {
        assert_eq!(
            body_listing("{'a': x, 'b': y} = m\n"),
            vec![
                "LOAD_NAME m",
                "DUP_TOP",
                "LOAD_CONST 'a'",
                "BINARY_SUBSCR",
                "STORE_NAME x",
                "DUP_TOP",
                "LOAD_CONST 'b'",
                "BINARY_SUBSCR",
                "STORE_NAME y",
                "POP_TOP",
            ]
        );
    }

    #[test]
    fn test_augmented_assignment() {
        assert_eq!(
            body_listing("x += 1\no.a *= 2\nd[k] -= 3\n"),
            vec![
                "LOAD_NAME x",
                "LOAD_CONST 1",
                "INPLACE_ADD",
                "STORE_NAME x",
                "LOAD_NAME o",
                "DUP_TOP",
                "LOAD_ATTR a",
                "LOAD_CONST 2",
                "INPLACE_MULTIPLY",
                "ROT_TWO",
                "STORE_ATTR a",
                "LOAD_NAME d",
                "LOAD_NAME k",
                "DUP_TOP_TWO",
                "BINARY_SUBSCR",
                "LOAD_CONST 3",
                "INPLACE_SUBTRACT",
                "ROT_THREE",
                "STORE_SUBSCR",
            ]
        );
    }

    #[test]
    fn test_augmented_assignment_of_cell() {
        let code = compile("def f():\n    n = 0\n    def g():\n        nonlocal n\n        n += 1\n    return g\n");
        assert_eq!(
            listing(find_code(&code, "g")),
            vec!["LOAD_DEREF n", "LOAD_CONST 1", "INPLACE_ADD", "STORE_DEREF n", "LOAD_CONST None", "RETURN_VALUE"]
        );
    }

    #[test]
    fn test_annotation_without_value() {
        assert_eq!(
            body_listing("x: int\no.a: str\n"),
            vec![
                "SETUP_ANNOTATIONS",
                "LOAD_NAME int",
                "LOAD_NAME __annotations__",
                "LOAD_CONST 'x'",
                "STORE_SUBSCR",
                "LOAD_NAME o",
                "POP_TOP",
                "LOAD_NAME str",
                "POP_TOP",
            ]
        );
    }

    #[test]
    fn test_annotation_in_function_is_not_evaluated() {
        let code = compile("def f():\n    x: int = 1\n    y: str\n");
        assert_eq!(
            listing(find_code(&code, "f")),
            vec!["LOAD_CONST 1", "STORE_FAST x", "LOAD_CONST None", "RETURN_VALUE"]
        );
    }
}
