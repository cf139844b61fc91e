//! Statement lowering: bodies, control flow, exception handling and imports.

use num_bigint::BigInt;

use super::{Block, Compiler, Op};
use crate::{
    bytecode::{code::Constant, instr::Label, op::CompareOp},
    error::{CodeRange, CompileError},
    expressions::{Alias, ExprContext, ExprLoc, Node, NodeLoc, Try, WithItem, docstring},
    intern::{StaticStrings, StringId},
    options::Mode,
    scope::ScopeKind,
};

impl Compiler<'_> {
    pub(super) fn visit_body(&mut self, body: &[NodeLoc]) -> Result<(), CompileError> {
        for stmt in body {
            self.visit_stmt(stmt)?;
        }
        Ok(())
    }

    /// Body of a module or class: the annotations dict, the docstring as
    /// `__doc__`, then the statements.
    pub(super) fn scope_body(&mut self, body: &[NodeLoc], with_docstring: bool) -> Result<(), CompileError> {
        if self.table().has_annotation {
            self.emit(Op::SetupAnnotations);
        }
        let mut rest = body;
        if with_docstring
            && self.options.optimize < 2
            && docstring(body).is_some()
            && let Some((first, tail)) = body.split_first()
            && let Node::Expr(value) = &first.node
        {
            self.set_line(first.position);
            self.visit_expr(value)?;
            self.static_name_op(StaticStrings::DunderDoc, ExprContext::Store)?;
            rest = tail;
        }
        self.visit_body(rest)
    }

    /// Eval mode: the single expression is the code object's return value.
    pub(super) fn eval_body(&mut self, body: &[NodeLoc]) -> Result<(), CompileError> {
        let [stmt] = body else {
            return Err(CompileError::internal("eval input must be a single expression"));
        };
        let Node::Expr(value) = &stmt.node else {
            return Err(CompileError::syntax("invalid syntax", stmt.position));
        };
        self.set_line(stmt.position);
        self.visit_expr(value)
    }

    pub(super) fn visit_stmt(&mut self, stmt: &NodeLoc) -> Result<(), CompileError> {
        self.guarded(stmt.position, |this| {
            this.set_line(stmt.position);
            this.stmt_kind(stmt)
        })
    }

    fn stmt_kind(&mut self, stmt: &NodeLoc) -> Result<(), CompileError> {
        let position = stmt.position;
        match &stmt.node {
            Node::Expr(value) => self.expr_stmt(value)?,
            Node::Assign { targets, value } => self.assign(targets, value)?,
            Node::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            Node::AnnAssign {
                target,
                annotation,
                value,
                simple,
            } => self.ann_assign(target, annotation, value.as_ref(), *simple)?,
            Node::Delete(targets) => self.visit_all(targets)?,
            Node::Pass | Node::Global(_) | Node::Nonlocal(_) => {}
            Node::Break => {
                if !self.unit.blocks.iter().any(|block| matches!(block, Block::Loop(_))) {
                    return Err(CompileError::syntax("'break' outside loop", position));
                }
                self.emit(Op::BreakLoop);
            }
            Node::Continue => self.continue_stmt(position)?,
            Node::Return(value) => self.return_stmt(value.as_ref(), position)?,
            Node::Raise { exc, cause } => {
                let mut count = 0;
                if let Some(exc) = exc {
                    self.visit_expr(exc)?;
                    count += 1;
                    if let Some(cause) = cause {
                        self.visit_expr(cause)?;
                        count += 1;
                    }
                }
                self.emit_arg(Op::RaiseVarargs, count);
            }
            Node::Assert { test, msg } => self.assert_stmt(test, msg.as_ref())?,
            Node::Import(aliases) => self.import(aliases)?,
            Node::ImportFrom { module, names, level } => self.import_from(*module, names, *level, position)?,
            Node::If { test, body, orelse } => self.if_stmt(test, body, orelse)?,
            Node::While { test, body, orelse } => self.while_stmt(test, body, orelse)?,
            Node::For {
                target,
                iter,
                body,
                orelse,
                is_async: false,
            } => self.for_stmt(target, iter, body, orelse)?,
            Node::For {
                target,
                iter,
                body,
                orelse,
                is_async: true,
            } => self.async_for_stmt(target, iter, body, orelse, position)?,
            Node::With {
                items,
                body,
                is_async: false,
            } => self.with_stmt(items, body)?,
            Node::With {
                items,
                body,
                is_async: true,
            } => {
                if !self.in_async_function() {
                    return Err(CompileError::syntax("'async with' outside async function", position));
                }
                self.async_with_stmt(items, body)?;
            }
            Node::Try(try_stmt) => {
                if try_stmt.finalbody.is_empty() {
                    self.try_except(try_stmt)?;
                } else {
                    self.try_finally(try_stmt)?;
                }
            }
            Node::FunctionDef(def) => self.function_def(def, position)?,
            Node::ClassDef(class) => self.class_def(class, position)?,
        }
        Ok(())
    }

    fn expr_stmt(&mut self, value: &ExprLoc) -> Result<(), CompileError> {
        if self.options.mode == Mode::Interactive && self.parents.is_empty() {
            self.visit_expr(value)?;
            self.emit(Op::PrintExpr);
        } else if self.constant_value(value).is_none() {
            self.visit_expr(value)?;
            self.emit(Op::PopTop);
        }
        Ok(())
    }

    fn continue_stmt(&mut self, position: CodeRange) -> Result<(), CompileError> {
        const NOT_IN_LOOP: &str = "'continue' not properly in loop";
        const IN_FINALLY: &str = "'continue' not supported inside 'finally' clause";

        let Some((top, below)) = self.unit.blocks.split_last() else {
            return Err(CompileError::syntax(NOT_IN_LOOP, position));
        };
        match top {
            Block::Loop(head) => {
                let head = *head;
                self.emit_jump(Op::JumpAbsolute, head);
            }
            Block::Except | Block::FinallyTry => {
                let mut head = None;
                for block in below.iter().rev() {
                    match block {
                        Block::Loop(label) => {
                            head = Some(*label);
                            break;
                        }
                        Block::FinallyEnd => return Err(CompileError::syntax(IN_FINALLY, position)),
                        Block::Except | Block::FinallyTry => {}
                    }
                }
                let Some(head) = head else {
                    return Err(CompileError::syntax(NOT_IN_LOOP, position));
                };
                self.emit_jump(Op::ContinueLoop, head);
            }
            Block::FinallyEnd => return Err(CompileError::syntax(IN_FINALLY, position)),
        }
        Ok(())
    }

    fn return_stmt(&mut self, value: Option<&ExprLoc>, position: CodeRange) -> Result<(), CompileError> {
        let table = self.table();
        if !table.is_function_like() {
            return Err(CompileError::syntax("'return' outside function", position));
        }
        match value {
            Some(value) => {
                if table.is_coroutine && table.is_generator {
                    return Err(CompileError::syntax("'return' with value in async generator", position));
                }
                self.visit_expr(value)?;
            }
            None => self.load_const(Constant::None),
        }
        self.emit(Op::ReturnValue);
        Ok(())
    }

    fn assert_stmt(&mut self, test: &ExprLoc, msg: Option<&ExprLoc>) -> Result<(), CompileError> {
        if self.options.optimize > 0 {
            return Ok(());
        }
        let end = self.new_label();
        self.jump_if(test, end, true)?;
        self.emit_name(Op::LoadGlobal, StaticStrings::AssertionError.into());
        if let Some(msg) = msg {
            self.visit_expr(msg)?;
            self.emit_arg(Op::CallFunction, 1);
        }
        self.emit_arg(Op::RaiseVarargs, 1);
        self.bind(end)
    }

    fn if_stmt(&mut self, test: &ExprLoc, body: &[NodeLoc], orelse: &[NodeLoc]) -> Result<(), CompileError> {
        match self.constant_truth(test) {
            Some(true) => return self.visit_body(body),
            Some(false) => return self.visit_body(orelse),
            None => {}
        }
        let end = self.new_label();
        let next = if orelse.is_empty() { end } else { self.new_label() };
        self.jump_if(test, next, false)?;
        self.visit_body(body)?;
        if !orelse.is_empty() {
            self.emit_jump(Op::JumpForward, end);
            self.bind(next)?;
            self.visit_body(orelse)?;
        }
        self.bind(end)
    }

    fn while_stmt(&mut self, test: &ExprLoc, body: &[NodeLoc], orelse: &[NodeLoc]) -> Result<(), CompileError> {
        let constant = self.constant_truth(test);
        if constant == Some(false) {
            return self.visit_body(orelse);
        }
        let head = self.new_label();
        let end = self.new_label();
        self.emit_jump(Op::SetupLoop, end);
        self.bind(head)?;
        self.push_block(Block::Loop(head));
        let anchor = if constant.is_none() {
            let anchor = self.new_label();
            self.jump_if(test, anchor, false)?;
            Some(anchor)
        } else {
            None
        };
        self.visit_body(body)?;
        self.emit_jump(Op::JumpAbsolute, head);
        if let Some(anchor) = anchor {
            self.bind(anchor)?;
            self.emit(Op::PopBlock);
        }
        self.pop_block(Block::Loop(head))?;
        self.visit_body(orelse)?;
        self.bind(end)
    }

    fn for_stmt(
        &mut self,
        target: &ExprLoc,
        iter: &ExprLoc,
        body: &[NodeLoc],
        orelse: &[NodeLoc],
    ) -> Result<(), CompileError> {
        let head = self.new_label();
        let cleanup = self.new_label();
        let end = self.new_label();
        self.emit_jump(Op::SetupLoop, end);
        self.push_block(Block::Loop(head));
        self.visit_expr(iter)?;
        self.emit(Op::GetIter);
        self.bind(head)?;
        self.emit_jump(Op::ForIter, cleanup);
        self.visit_expr(target)?;
        self.visit_body(body)?;
        self.emit_jump(Op::JumpAbsolute, head);
        self.bind(cleanup)?;
        self.emit(Op::PopBlock);
        self.pop_block(Block::Loop(head))?;
        self.visit_body(orelse)?;
        self.bind(end)
    }

    /// `async for`: each `__anext__` is awaited inside a handler that ends the
    /// loop on `StopAsyncIteration`.
    fn async_for_stmt(
        &mut self,
        target: &ExprLoc,
        iter: &ExprLoc,
        body: &[NodeLoc],
        orelse: &[NodeLoc],
        position: CodeRange,
    ) -> Result<(), CompileError> {
        if !self.in_async_function() {
            return Err(CompileError::syntax("'async for' outside async function", position));
        }
        let head = self.new_label();
        let except = self.new_label();
        let after_try = self.new_label();
        let try_cleanup = self.new_label();
        let end = self.new_label();

        self.emit_jump(Op::SetupLoop, end);
        self.push_block(Block::Loop(head));
        self.visit_expr(iter)?;
        self.emit(Op::GetAiter);

        self.bind(head)?;
        self.emit_jump(Op::SetupExcept, except);
        self.push_block(Block::Except);
        self.emit(Op::GetAnext);
        self.load_const(Constant::None);
        self.emit(Op::YieldFrom);
        self.visit_expr(target)?;
        self.emit(Op::PopBlock);
        self.pop_block(Block::Except)?;
        self.emit_jump(Op::JumpForward, after_try);

        self.bind(except)?;
        self.stop_async_iteration_check(try_cleanup);

        self.bind(after_try)?;
        self.visit_body(body)?;
        self.emit_jump(Op::JumpAbsolute, head);

        self.bind(try_cleanup)?;
        self.async_iteration_cleanup();
        self.emit(Op::PopBlock);
        self.pop_block(Block::Loop(head))?;

        self.visit_body(orelse)?;
        self.bind(end)
    }

    /// Jumps to `done` when the raised exception is `StopAsyncIteration` and
    /// re-raises anything else.
    pub(super) fn stop_async_iteration_check(&mut self, done: Label) {
        self.emit(Op::DupTop);
        self.emit_name(Op::LoadGlobal, StaticStrings::StopAsyncIteration.into());
        self.emit_arg(Op::CompareOp, u32::from(CompareOp::ExceptionMatch as u8));
        self.emit_jump(Op::PopJumpIfTrue, done);
        self.emit(Op::EndFinally);
    }

    /// Drops the exception, the handler block and the exhausted iterator.
    pub(super) fn async_iteration_cleanup(&mut self) {
        self.emit(Op::PopTop);
        self.emit(Op::PopTop);
        self.emit(Op::PopTop);
        self.emit(Op::PopExcept);
        self.emit(Op::PopTop);
    }

    fn try_finally(&mut self, stmt: &Try) -> Result<(), CompileError> {
        let end = self.new_label();
        self.emit_jump(Op::SetupFinally, end);
        self.push_block(Block::FinallyTry);
        if stmt.handlers.is_empty() {
            self.visit_body(&stmt.body)?;
        } else {
            self.try_except(stmt)?;
        }
        self.emit(Op::PopBlock);
        self.pop_block(Block::FinallyTry)?;
        self.load_const(Constant::None);

        self.bind(end)?;
        self.push_block(Block::FinallyEnd);
        self.visit_body(&stmt.finalbody)?;
        self.emit(Op::EndFinally);
        self.pop_block(Block::FinallyEnd)
    }

    /// Handlers are tried in order; each one that names the exception binds it
    /// for the handler body and unbinds it afterwards.
    fn try_except(&mut self, stmt: &Try) -> Result<(), CompileError> {
        let except = self.new_label();
        let orelse = self.new_label();
        let end = self.new_label();

        self.emit_jump(Op::SetupExcept, except);
        self.push_block(Block::Except);
        self.visit_body(&stmt.body)?;
        self.emit(Op::PopBlock);
        self.pop_block(Block::Except)?;
        self.emit_jump(Op::JumpForward, orelse);

        self.bind(except)?;
        for (index, handler) in stmt.handlers.iter().enumerate() {
            if handler.type_.is_none() && index + 1 < stmt.handlers.len() {
                return Err(CompileError::syntax("default 'except:' must be last", handler.position));
            }
            self.set_line(handler.position);
            let next_handler = self.new_label();
            if let Some(type_) = &handler.type_ {
                self.emit(Op::DupTop);
                self.visit_expr(type_)?;
                self.emit_arg(Op::CompareOp, u32::from(CompareOp::ExceptionMatch as u8));
                self.emit_jump(Op::PopJumpIfFalse, next_handler);
            }
            self.emit(Op::PopTop);
            if let Some(name) = &handler.name {
                let cleanup_end = self.new_label();
                self.name_op(name.name, ExprContext::Store)?;
                self.emit(Op::PopTop);

                self.emit_jump(Op::SetupFinally, cleanup_end);
                self.push_block(Block::FinallyTry);
                self.visit_body(&handler.body)?;
                self.emit(Op::PopBlock);
                self.pop_block(Block::FinallyTry)?;
                self.load_const(Constant::None);

                // `name = None; del name`
                self.bind(cleanup_end)?;
                self.push_block(Block::FinallyEnd);
                self.load_const(Constant::None);
                self.name_op(name.name, ExprContext::Store)?;
                self.name_op(name.name, ExprContext::Del)?;
                self.emit(Op::EndFinally);
                self.emit(Op::PopExcept);
                self.pop_block(Block::FinallyEnd)?;
            } else {
                self.emit(Op::PopTop);
                self.emit(Op::PopTop);
                self.push_block(Block::FinallyTry);
                self.visit_body(&handler.body)?;
                self.pop_block(Block::FinallyTry)?;
                self.emit(Op::PopExcept);
            }
            self.emit_jump(Op::JumpForward, end);
            self.bind(next_handler)?;
        }
        self.emit(Op::EndFinally);
        self.bind(orelse)?;
        self.visit_body(&stmt.orelse)?;
        self.bind(end)
    }

    /// `with a, b: body` nests as `with a: with b: body`.
    fn with_stmt(&mut self, items: &[WithItem], body: &[NodeLoc]) -> Result<(), CompileError> {
        let Some((item, rest)) = items.split_first() else {
            return self.visit_body(body);
        };
        let cleanup = self.new_label();
        self.visit_expr(&item.context_expr)?;
        self.emit_jump(Op::SetupWith, cleanup);
        self.push_block(Block::FinallyTry);
        self.with_target(item.optional_vars.as_ref())?;
        self.with_stmt(rest, body)?;
        self.emit(Op::PopBlock);
        self.pop_block(Block::FinallyTry)?;
        self.load_const(Constant::None);

        self.bind(cleanup)?;
        self.push_block(Block::FinallyEnd);
        self.emit(Op::WithCleanupStart);
        self.emit(Op::WithCleanupFinish);
        self.emit(Op::EndFinally);
        self.pop_block(Block::FinallyEnd)
    }

    fn async_with_stmt(&mut self, items: &[WithItem], body: &[NodeLoc]) -> Result<(), CompileError> {
        let Some((item, rest)) = items.split_first() else {
            return self.visit_body(body);
        };
        let cleanup = self.new_label();
        self.visit_expr(&item.context_expr)?;
        self.emit(Op::BeforeAsyncWith);
        self.await_top();
        self.emit_jump(Op::SetupAsyncWith, cleanup);
        self.push_block(Block::FinallyTry);
        self.with_target(item.optional_vars.as_ref())?;
        self.async_with_stmt(rest, body)?;
        self.emit(Op::PopBlock);
        self.pop_block(Block::FinallyTry)?;
        self.load_const(Constant::None);

        self.bind(cleanup)?;
        self.push_block(Block::FinallyEnd);
        self.emit(Op::WithCleanupStart);
        self.await_top();
        self.emit(Op::WithCleanupFinish);
        self.emit(Op::EndFinally);
        self.pop_block(Block::FinallyEnd)
    }

    fn with_target(&mut self, target: Option<&ExprLoc>) -> Result<(), CompileError> {
        match target {
            Some(target) => self.visit_expr(target),
            None => {
                self.emit(Op::PopTop);
                Ok(())
            }
        }
    }

    /// `GET_AWAITABLE; LOAD_CONST None; YIELD_FROM`
    pub(super) fn await_top(&mut self) {
        self.emit(Op::GetAwaitable);
        self.load_const(Constant::None);
        self.emit(Op::YieldFrom);
    }

    fn import(&mut self, aliases: &[Alias]) -> Result<(), CompileError> {
        for alias in aliases {
            self.load_const(Constant::Int(BigInt::from(0)));
            self.load_const(Constant::None);
            let dotted = self.name_str(alias.name);
            self.emit_name(Op::ImportName, dotted);
            match alias.asname {
                Some(asname) => {
                    // `import a.b.c as d` binds the innermost module
                    let mut attrs = dotted.split('.').skip(1).peekable();
                    let nested = attrs.peek().is_some();
                    while let Some(attr) = attrs.next() {
                        self.emit_name(Op::ImportFrom, attr);
                        if attrs.peek().is_some() {
                            self.emit(Op::RotTwo);
                            self.emit(Op::PopTop);
                        }
                    }
                    self.name_op(asname, ExprContext::Store)?;
                    if nested {
                        self.emit(Op::PopTop);
                    }
                }
                None => self.name_op(alias.top_level, ExprContext::Store)?,
            }
        }
        Ok(())
    }

    fn import_from(
        &mut self,
        module: Option<StringId>,
        names: &[Alias],
        level: u32,
        position: CodeRange,
    ) -> Result<(), CompileError> {
        let is_star = names.first().is_some_and(|alias| self.name_str(alias.name) == "*");
        if is_star && self.table().kind != ScopeKind::Module {
            return Err(CompileError::syntax("import * only allowed at module level", position));
        }
        let imported = names
            .iter()
            .map(|alias| Constant::Str(self.name_str(alias.name).to_owned()))
            .collect();
        self.load_const(Constant::Int(BigInt::from(level)));
        self.load_const(Constant::Tuple(imported));
        let module = module.map_or("", |module| self.name_str(module));
        self.emit_name(Op::ImportName, module);
        if is_star {
            self.emit(Op::ImportStar);
            return Ok(());
        }
        for alias in names {
            let name = self.name_str(alias.name);
            self.emit_name(Op::ImportFrom, name);
            self.name_op(alias.asname.unwrap_or(alias.name), ExprContext::Store)?;
        }
        self.emit(Op::PopTop);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::super::tests::{compile, compile_err, compile_with, find_code, listing};
    use crate::options::CompileOptions;

    fn body_listing(source: &str) -> Vec<String> {
        let mut lines = listing(&compile(source));
        lines.truncate(lines.len() - 2);
        lines
    }

    #[test]
    fn test_for_else() {
        assert_eq!(
            body_listing("for x in [1, 2, 3]:\n    pass\nelse:\n    result = 'done'\n"),
            vec![
                "SETUP_LOOP 22",
                "LOAD_CONST 1",
                "LOAD_CONST 2",
                "LOAD_CONST 3",
                "BUILD_LIST 3",
                "GET_ITER",
                "FOR_ITER 4",
                "STORE_NAME x",
                "JUMP_ABSOLUTE 12",
                "POP_BLOCK",
                "LOAD_CONST 'done'",
                "STORE_NAME result",
            ]
        );
    }

    #[test]
    fn test_break_skips_else() {
        let lines = body_listing("for x in y:\n    break\nelse:\n    result = 'done'\n");
        assert_eq!(
            lines,
            vec![
                "SETUP_LOOP 18",
                "LOAD_NAME y",
                "GET_ITER",
                "FOR_ITER 6",
                "STORE_NAME x",
                "BREAK_LOOP",
                "JUMP_ABSOLUTE 6",
                "POP_BLOCK",
                "LOAD_CONST 'done'",
                "STORE_NAME result",
            ]
        );
    }

    #[test]
    fn test_while_true_has_no_test() {
        assert_eq!(
            body_listing("while True:\n    f()\n"),
            vec!["SETUP_LOOP 8", "LOAD_NAME f", "CALL_FUNCTION 0", "POP_TOP", "JUMP_ABSOLUTE 2"]
        );
    }

    #[test]
    fn test_constant_if_drops_dead_branch() {
        assert_eq!(body_listing("if 0:\n    a = 1\nelse:\n    b = 2\n"), vec!["LOAD_CONST 2", "STORE_NAME b"]);
        assert_eq!(body_listing("if __debug__:\n    a = 1\n"), vec!["LOAD_CONST 1", "STORE_NAME a"]);
    }

    #[test]
    fn test_continue_in_try_uses_continue_loop() {
        assert_eq!(
            body_listing("for x in y:\n    try:\n        continue\n    except:\n        pass\n"),
            vec![
                "SETUP_LOOP 32",
                "LOAD_NAME y",
                "GET_ITER",
                "FOR_ITER 24",
                "STORE_NAME x",
                "SETUP_EXCEPT 6",
                "CONTINUE_LOOP 6",
                "POP_BLOCK",
                "JUMP_FORWARD 12",
                "POP_TOP",
                "POP_TOP",
                "POP_TOP",
                "POP_EXCEPT",
                "JUMP_FORWARD 2",
                "END_FINALLY",
                "JUMP_ABSOLUTE 6",
                "POP_BLOCK",
            ]
        );
    }

    #[test]
    fn test_loop_control_errors() {
        assert_eq!(compile_err("break\n"), "'break' outside loop");
        assert_eq!(compile_err("continue\n"), "'continue' not properly in loop");
        assert_eq!(
            compile_err("for x in y:\n    try:\n        pass\n    finally:\n        continue\n"),
            "'continue' not supported inside 'finally' clause"
        );
        assert_eq!(
            compile_err("for x in y:\n    try:\n        pass\n    finally:\n        try:\n            continue\n        except:\n            pass\n"),
            "'continue' not supported inside 'finally' clause"
        );
        assert_eq!(compile_err("return 1\n"), "'return' outside function");
        assert_eq!(
            compile_err("async def f():\n    yield 1\n    return 2\n"),
            "'return' with value in async generator"
        );
        assert_eq!(compile_err("def f():\n    async with a:\n        pass\n"), "'async with' outside async function");
        assert_eq!(compile_err("def f():\n    async for x in y:\n        pass\n"), "'async for' outside async function");
        assert_eq!(compile_err("def f():\n    from m import *\n"), "import * only allowed at module level");
    }

    #[test]
    fn test_try_except_named_handler() {
        let code = compile("try:\n    raise ValueError('v') from NameError('n')\nexcept ValueError as e:\n    pass\n");
        assert_eq!(
            listing(&code),
            vec![
                "SETUP_EXCEPT 18",
                "LOAD_NAME ValueError",
                "LOAD_CONST 'v'",
                "CALL_FUNCTION 1",
                "LOAD_NAME NameError",
                "LOAD_CONST 'n'",
                "CALL_FUNCTION 1",
                "RAISE_VARARGS 2",
                "POP_BLOCK",
                "JUMP_FORWARD 34",
                "DUP_TOP",
                "LOAD_NAME ValueError",
                "COMPARE_OP 10",
                "POP_JUMP_IF_FALSE 52",
                "POP_TOP",
                "STORE_NAME e",
                "POP_TOP",
                "SETUP_FINALLY 4",
                "POP_BLOCK",
                "LOAD_CONST None",
                "LOAD_CONST None",
                "STORE_NAME e",
                "DELETE_NAME e",
                "END_FINALLY",
                "POP_EXCEPT",
                "JUMP_FORWARD 2",
                "END_FINALLY",
                "LOAD_CONST None",
                "RETURN_VALUE",
            ]
        );
        assert_eq!(code.stacksize, 10);
    }

    #[test]
    fn test_try_finally() {
        let code = compile("try:\n    a()\nfinally:\n    b()\n");
        assert_eq!(
            listing(&code),
            vec![
                "SETUP_FINALLY 10",
                "LOAD_NAME a",
                "CALL_FUNCTION 0",
                "POP_TOP",
                "POP_BLOCK",
                "LOAD_CONST None",
                "LOAD_NAME b",
                "CALL_FUNCTION 0",
                "POP_TOP",
                "END_FINALLY",
                "LOAD_CONST None",
                "RETURN_VALUE",
            ]
        );
        assert_eq!(code.stacksize, 7);
    }

    #[test]
    fn test_with_statement() {
        let code = compile("with open(p) as f:\n    f.read()\n");
        assert_eq!(
            listing(&code),
            vec![
                "LOAD_NAME open",
                "LOAD_NAME p",
                "CALL_FUNCTION 1",
                "SETUP_WITH 14",
                "STORE_NAME f",
                "LOAD_NAME f",
                "LOAD_METHOD read",
                "CALL_METHOD 0",
                "POP_TOP",
                "POP_BLOCK",
                "LOAD_CONST None",
                "WITH_CLEANUP_START",
                "WITH_CLEANUP_FINISH",
                "END_FINALLY",
                "LOAD_CONST None",
                "RETURN_VALUE",
            ]
        );
        assert_eq!(code.stacksize, 9);
    }

    #[test]
    fn test_async_for_in_coroutine() {
        let code = compile("async def f():\n    async for x in y:\n        g(x)\n");
        let f = find_code(&code, "f");
        let lines = listing(f);
        assert!(lines.contains(&"GET_AITER".to_owned()), "{lines:?}");
        assert!(lines.contains(&"GET_ANEXT".to_owned()), "{lines:?}");
        assert!(lines.contains(&"LOAD_GLOBAL StopAsyncIteration".to_owned()), "{lines:?}");
        assert!(lines.contains(&"POP_EXCEPT".to_owned()), "{lines:?}");
    }

    #[test]
    fn test_assert() {
        assert_eq!(
            body_listing("assert x, 'msg'\n"),
            vec![
                "LOAD_NAME x",
                "POP_JUMP_IF_TRUE 12",
                "LOAD_GLOBAL AssertionError",
                "LOAD_CONST 'msg'",
                "CALL_FUNCTION 1",
                "RAISE_VARARGS 1",
            ]
        );
        let optimized = compile_with("assert x\n", &CompileOptions::default().with_optimize(1)).unwrap();
        assert_eq!(listing(&optimized), vec!["LOAD_CONST None", "RETURN_VALUE"]);
    }

    #[test]
    fn test_imports() {
        assert_eq!(
            body_listing("import a.b.c as d\nimport os.path\n"),
            vec![
                "LOAD_CONST 0",
                "LOAD_CONST None",
                "IMPORT_NAME a.b.c",
                "IMPORT_FROM b",
                "ROT_TWO",
                "POP_TOP",
                "IMPORT_FROM c",
                "STORE_NAME d",
                "POP_TOP",
                "LOAD_CONST 0",
                "LOAD_CONST None",
                "IMPORT_NAME os.path",
                "STORE_NAME os",
            ]
        );
        assert_eq!(
            body_listing("from . import x as y, z\n"),
            vec![
                "LOAD_CONST 1",
                "LOAD_CONST ('x', 'z')",
                "IMPORT_NAME ",
                "IMPORT_FROM x",
                "STORE_NAME y",
                "IMPORT_FROM z",
                "STORE_NAME z",
                "POP_TOP",
            ]
        );
        assert_eq!(
            body_listing("from m import *\n"),
            vec!["LOAD_CONST 0", "LOAD_CONST ('*',)", "IMPORT_NAME m", "IMPORT_STAR"]
        );
    }

    #[test]
    fn test_module_docstring_and_annotations() {
        assert_eq!(
            body_listing("'''doc'''\nx: int = 1\n"),
            vec![
                "SETUP_ANNOTATIONS",
                "LOAD_CONST 'doc'",
                "STORE_NAME __doc__",
                "LOAD_CONST 1",
                "STORE_NAME x",
                "LOAD_NAME int",
                "LOAD_NAME __annotations__",
                "LOAD_CONST 'x'",
                "STORE_SUBSCR",
            ]
        );
    }
}
