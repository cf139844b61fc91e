//! Functions, lambdas and classes, and the closure construction that turns
//! their code objects into runtime objects.

use super::{Compiler, Op};
use crate::{
    bytecode::{
        builder::{CodeMeta, count_arg},
        code::{CodeFlags, CodeObject, Constant},
        op::make_function,
    },
    error::{CodeRange, CompileError},
    expressions::{Arg, Arguments, ClassDef, ExprContext, ExprLoc, FunctionDef, Lambda, docstring},
    intern::StaticStrings,
};

impl Compiler<'_> {
    pub(super) fn function_def(&mut self, def: &FunctionDef, position: CodeRange) -> Result<(), CompileError> {
        self.visit_all(&def.decorators)?;
        let firstlineno = first_line(&def.decorators, position);

        let mut flags = self.default_arguments(&def.args)?;
        if self.annotations(&def.args, def.returns.as_ref())? {
            flags |= make_function::ANNOTATIONS;
        }
        let name = self.name_str(def.name.name);
        let qualname = self.qualname_for(name, Some(def.name.name));
        let meta = CodeMeta {
            name: name.to_owned(),
            firstlineno,
            ..argument_meta(&def.args)
        };

        self.enter_scope(def.scope, meta, qualname)?;
        let doc = docstring(&def.body);
        let first_const = match doc {
            Some(doc) if self.options.optimize < 2 => Constant::Str(doc.to_owned()),
            _ => Constant::None,
        };
        self.unit.builder.add_const(first_const);
        let body = if doc.is_some() { &def.body[1..] } else { &def.body[..] };
        self.visit_body(body)?;
        let (code, qualname) = self.exit_scope()?;

        self.make_closure(code, flags, qualname)?;
        for _ in &def.decorators {
            self.emit_arg(Op::CallFunction, 1);
        }
        self.name_op(def.name.name, ExprContext::Store)
    }

    pub(super) fn lambda(&mut self, lambda: &Lambda, position: CodeRange) -> Result<(), CompileError> {
        let flags = self.default_arguments(&lambda.args)?;
        let name = <&str>::from(StaticStrings::Lambda);
        let qualname = self.qualname_for(name, None);
        let meta = CodeMeta {
            name: name.to_owned(),
            firstlineno: position.line(),
            ..argument_meta(&lambda.args)
        };

        self.enter_scope(lambda.scope, meta, qualname)?;
        // a lambda has no docstring
        self.unit.builder.add_const(Constant::None);
        self.visit_expr(&lambda.body)?;
        self.emit(Op::ReturnValue);
        let (code, qualname) = self.exit_scope()?;

        self.make_closure(code, flags, qualname)
    }

    /// Compiles the class body into a function run by `__build_class__`.
    pub(super) fn class_def(&mut self, class: &ClassDef, position: CodeRange) -> Result<(), CompileError> {
        self.visit_all(&class.decorators)?;
        let name = self.name_str(class.name.name);
        let qualname = self.qualname_for(name, Some(class.name.name));
        let meta = CodeMeta {
            name: name.to_owned(),
            firstlineno: first_line(&class.decorators, position),
            ..CodeMeta::default()
        };

        self.enter_scope(class.scope, meta, qualname)?;
        self.static_name_op(StaticStrings::DunderName, ExprContext::Load)?;
        self.static_name_op(StaticStrings::DunderModule, ExprContext::Store)?;
        self.load_const(Constant::Str(self.unit.qualname.clone()));
        self.static_name_op(StaticStrings::DunderQualname, ExprContext::Store)?;
        self.scope_body(&class.body, true)?;
        // hand the `__class__` cell to `type.__new__` so zero-argument
        // `super()` works in the methods
        match self.unit.builder.cell_index(StaticStrings::DunderClass.into()) {
            Some(index) => {
                self.unit.builder.emit_deref(Op::LoadClosure, index);
                self.emit(Op::DupTop);
                self.static_name_op(StaticStrings::DunderClassCell, ExprContext::Store)?;
            }
            None => self.load_const(Constant::None),
        }
        self.emit(Op::ReturnValue);
        let (code, qualname) = self.exit_scope()?;

        self.emit(Op::LoadBuildClass);
        self.make_closure(code, 0, qualname)?;
        self.load_const(Constant::Str(name.to_owned()));
        self.call_helper(2, &class.args)?;
        for _ in &class.decorators {
            self.emit_arg(Op::CallFunction, 1);
        }
        self.name_op(class.name.name, ExprContext::Store)
    }

    /// Pushes the defaults tuple and keyword-only defaults map, returning the
    /// `MAKE_FUNCTION` flags they need.
    fn default_arguments(&mut self, args: &Arguments) -> Result<u32, CompileError> {
        let mut flags = 0;
        if !args.defaults.is_empty() {
            self.visit_all(&args.defaults)?;
            self.emit_count(Op::BuildTuple, args.defaults.len());
            flags |= make_function::DEFAULTS;
        }
        let mut keys = Vec::new();
        for (arg, default) in args.kwonlyargs.iter().zip(&args.kw_defaults) {
            if let Some(default) = default {
                keys.push(Constant::Str(self.name_str(arg.name.name).to_owned()));
                self.visit_expr(default)?;
            }
        }
        if !keys.is_empty() {
            let count = keys.len();
            self.load_const(Constant::Tuple(keys));
            self.emit_count(Op::BuildConstKeyMap, count);
            flags |= make_function::KW_DEFAULTS;
        }
        Ok(flags)
    }

    /// Pushes the annotations map, if any parameter or the return value is
    /// annotated.
    fn annotations(&mut self, args: &Arguments, returns: Option<&ExprLoc>) -> Result<bool, CompileError> {
        let params = args
            .args
            .iter()
            .chain(args.vararg.iter())
            .chain(args.kwonlyargs.iter())
            .chain(args.kwarg.iter());
        let mut keys = Vec::new();
        for Arg { name, annotation } in params {
            if let Some(annotation) = annotation {
                self.visit_expr(annotation)?;
                keys.push(Constant::Str(self.name_str(name.name).to_owned()));
            }
        }
        if let Some(returns) = returns {
            self.visit_expr(returns)?;
            keys.push(Constant::Str(<&str>::from(StaticStrings::Return).to_owned()));
        }
        if keys.is_empty() {
            return Ok(false);
        }
        let count = keys.len();
        self.load_const(Constant::Tuple(keys));
        self.emit_count(Op::BuildConstKeyMap, count);
        Ok(true)
    }

    /// Emits `MAKE_FUNCTION` for `code`, passing the cells of its free
    /// variables when it has any.
    pub(super) fn make_closure(&mut self, code: CodeObject, mut flags: u32, qualname: String) -> Result<(), CompileError> {
        if !code.freevars.is_empty() {
            for name in &code.freevars {
                let index = self.deref_index(name)?;
                self.unit.builder.emit_deref(Op::LoadClosure, index);
            }
            self.emit_count(Op::BuildTuple, code.freevars.len());
            flags |= make_function::CLOSURE;
        }
        self.load_const(Constant::Code(Box::new(code)));
        self.load_const(Constant::Str(qualname));
        self.emit_arg(Op::MakeFunction, flags);
        Ok(())
    }
}

/// Line a definition's code object starts on: its first decorator, if any.
fn first_line(decorators: &[ExprLoc], position: CodeRange) -> u32 {
    decorators.first().map_or(position, |decorator| decorator.position).line()
}

fn argument_meta(args: &Arguments) -> CodeMeta {
    let mut flags = CodeFlags::empty();
    if args.vararg.is_some() {
        flags |= CodeFlags::VARARGS;
    }
    if args.kwarg.is_some() {
        flags |= CodeFlags::VARKEYWORDS;
    }
    CodeMeta {
        argcount: count_arg(args.args.len()),
        kwonlyargcount: count_arg(args.kwonlyargs.len()),
        flags,
        ..CodeMeta::default()
    }
}
