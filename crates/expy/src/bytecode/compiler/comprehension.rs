//! Comprehensions and generator expressions.
//!
//! Each comprehension compiles to a nested function taking the iterator of
//! its outermost iterable as the implicit parameter `.0`. The enclosing scope
//! evaluates that iterable, so names in it resolve there, and calls the
//! function at once.

use super::{Compiler, Op};
use crate::{
    bytecode::{builder::CodeMeta, code::Constant},
    error::{CodeRange, CompileError},
    expressions::{Comprehension, ComprehensionExpr, ComprehensionKind},
    intern::StaticStrings,
};

impl Compiler<'_> {
    pub(super) fn comprehension(&mut self, comp: &ComprehensionExpr, position: CodeRange) -> Result<(), CompileError> {
        let Some(outermost) = comp.generators.first() else {
            return Err(CompileError::internal("comprehension without generators"));
        };
        let (name, build) = match comp.kind {
            ComprehensionKind::List(_) => (StaticStrings::ListComp, Some(Op::BuildList)),
            ComprehensionKind::Set(_) => (StaticStrings::SetComp, Some(Op::BuildSet)),
            ComprehensionKind::Dict { .. } => (StaticStrings::DictComp, Some(Op::BuildMap)),
            ComprehensionKind::Generator(_) => (StaticStrings::GenExpr, None),
        };
        let name = <&str>::from(name);
        let enclosing_async = self.table().is_coroutine;
        let qualname = self.qualname_for(name, None);
        let meta = CodeMeta {
            name: name.to_owned(),
            argcount: 1,
            firstlineno: position.line(),
            ..CodeMeta::default()
        };

        self.enter_scope(comp.scope, meta, qualname)?;
        let is_async = self.table().is_coroutine;
        if is_async && build.is_some() && !enclosing_async {
            return Err(CompileError::syntax(
                "asynchronous comprehension outside of an asynchronous function",
                position,
            ));
        }
        if let Some(build) = build {
            self.emit_arg(build, 0);
        }
        self.comprehension_generator(comp, 0)?;
        if build.is_some() {
            self.emit(Op::ReturnValue);
        }
        let (code, qualname) = self.exit_scope()?;

        self.make_closure(code, 0, qualname)?;
        self.visit_expr(&outermost.iter)?;
        self.emit(if outermost.is_async { Op::GetAiter } else { Op::GetIter });
        self.emit_arg(Op::CallFunction, 1);
        if is_async && build.is_some() {
            self.await_top();
        }
        Ok(())
    }

    fn comprehension_generator(&mut self, comp: &ComprehensionExpr, index: usize) -> Result<(), CompileError> {
        let generator = &comp.generators[index];
        if generator.is_async {
            self.async_comprehension_generator(comp, generator, index)
        } else {
            self.sync_comprehension_generator(comp, generator, index)
        }
    }

    fn sync_comprehension_generator(
        &mut self,
        comp: &ComprehensionExpr,
        generator: &Comprehension,
        index: usize,
    ) -> Result<(), CompileError> {
        let start = self.new_label();
        let if_cleanup = self.new_label();
        let anchor = self.new_label();

        self.comprehension_iter(generator, index, Op::GetIter)?;
        self.bind(start)?;
        self.emit_jump(Op::ForIter, anchor);
        self.visit_expr(&generator.target)?;
        for condition in &generator.ifs {
            self.jump_if(condition, if_cleanup, false)?;
        }
        self.comprehension_element(comp, index)?;
        self.bind(if_cleanup)?;
        self.emit_jump(Op::JumpAbsolute, start);
        self.bind(anchor)
    }

    /// `async for` clause: each `__anext__` is awaited inside a handler that
    /// leaves the loop on `StopAsyncIteration`.
    fn async_comprehension_generator(
        &mut self,
        comp: &ComprehensionExpr,
        generator: &Comprehension,
        index: usize,
    ) -> Result<(), CompileError> {
        let head = self.new_label();
        let except = self.new_label();
        let after_try = self.new_label();
        let if_cleanup = self.new_label();
        let try_cleanup = self.new_label();

        self.comprehension_iter(generator, index, Op::GetAiter)?;
        self.bind(head)?;
        self.emit_jump(Op::SetupExcept, except);
        self.emit(Op::GetAnext);
        self.load_const(Constant::None);
        self.emit(Op::YieldFrom);
        self.visit_expr(&generator.target)?;
        self.emit(Op::PopBlock);
        self.emit_jump(Op::JumpForward, after_try);

        self.bind(except)?;
        self.stop_async_iteration_check(try_cleanup);

        self.bind(after_try)?;
        for condition in &generator.ifs {
            self.jump_if(condition, if_cleanup, false)?;
        }
        self.comprehension_element(comp, index)?;
        self.bind(if_cleanup)?;
        self.emit_jump(Op::JumpAbsolute, head);

        self.bind(try_cleanup)?;
        self.async_iteration_cleanup();
        Ok(())
    }

    /// The outermost iterator arrives as `.0`; inner ones are built in place.
    fn comprehension_iter(&mut self, generator: &Comprehension, index: usize, get_iter: Op) -> Result<(), CompileError> {
        if index == 0 {
            self.unit
                .builder
                .emit_local(Op::LoadFast, StaticStrings::ImplicitArg.into());
        } else {
            self.visit_expr(&generator.iter)?;
            self.emit(get_iter);
        }
        Ok(())
    }

    /// Recurses into the next clause, or adds the element to the result once
    /// every clause is open.
    fn comprehension_element(&mut self, comp: &ComprehensionExpr, index: usize) -> Result<(), CompileError> {
        if index + 1 < comp.generators.len() {
            return self.comprehension_generator(comp, index + 1);
        }
        // the result sits below one iterator per clause
        let depth = u32::try_from(comp.generators.len() + 1).unwrap_or(u32::MAX);
        match &comp.kind {
            ComprehensionKind::Generator(elt) => {
                self.visit_expr(elt)?;
                self.emit(Op::YieldValue);
                self.emit(Op::PopTop);
            }
            ComprehensionKind::List(elt) => {
                self.visit_expr(elt)?;
                self.emit_arg(Op::ListAppend, depth);
            }
            ComprehensionKind::Set(elt) => {
                self.visit_expr(elt)?;
                self.emit_arg(Op::SetAdd, depth);
            }
            ComprehensionKind::Dict { key, value } => {
                // `MAP_ADD` takes the value below the key
                self.visit_expr(value)?;
                self.visit_expr(key)?;
                self.emit_arg(Op::MapAdd, depth);
            }
        }
        Ok(())
    }
}
