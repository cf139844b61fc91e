//! Code generation: lowers a resolved module to a tree of [`CodeObject`]s.
//!
//! The compiler walks the AST once, emitting into the [`CodeBuilder`] of the
//! scope being compiled. Entering a function, lambda, class or comprehension
//! pushes a fresh [`CompileUnit`]; leaving it assembles the unit's code object
//! and hands it back to the enclosing unit, which emits the `MAKE_FUNCTION`
//! sequence that turns it into a runtime object.
//!
//! Which instruction a name access compiles to is decided by the scope analysis
//! in [`SymbolTable`]; the compiler never re-derives scoping itself.

mod assign;
mod call;
mod comprehension;
mod expr;
mod function;
mod stmt;

use std::mem;

use tracing::{debug, trace};

use super::{
    builder::{CodeBuilder, CodeMeta},
    code::{CodeFlags, CodeObject, Constant},
    instr::Label,
    op::Opcode as Op,
};
use crate::{
    error::{CodeRange, CompileError},
    expressions::{ExprContext, Module, ScopeKey},
    intern::{Interns, StaticStrings, StringId},
    options::{CompileOptions, Mode},
    scope::{ScopeId, ScopeKind, ScopeTable, SymbolTable},
};

/// Compiles a parsed and resolved module into its code object.
pub fn compile_module(
    module: &Module,
    symbols: &SymbolTable,
    interns: &Interns,
    options: &CompileOptions,
) -> Result<CodeObject, CompileError> {
    let mut compiler = Compiler::new(symbols, interns, options);
    match module.mode {
        Mode::Exec => compiler.scope_body(&module.body, true)?,
        Mode::Interactive => compiler.scope_body(&module.body, false)?,
        Mode::Eval => compiler.eval_body(&module.body)?,
    }
    let code = compiler.finish()?;
    debug!(
        filename = %options.filename,
        nested = code.nested_code().count(),
        bytes = code.code.len(),
        "compiled module"
    );
    Ok(code)
}

/// A control structure open in the unit being compiled, consulted by `break`
/// and `continue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    /// A `for` or `while` loop; `continue` jumps to the label.
    Loop(Label),
    /// The body of a `try` with handlers, or of an unnamed handler.
    Except,
    /// The protected body of a `try`/`finally`, a `with`, or a named handler.
    FinallyTry,
    /// A `finally` clause or a `with` cleanup.
    FinallyEnd,
}

/// Emission state for one scope.
#[derive(Debug)]
struct CompileUnit {
    builder: CodeBuilder,
    scope: ScopeId,
    qualname: String,
    meta: CodeMeta,
    blocks: Vec<Block>,
}

/// How a name is accessed, decided from the scope analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameAccess {
    Fast,
    Deref,
    /// A free variable read from a class body, which checks the class
    /// namespace first.
    ClassDeref,
    Global,
    Name,
}

/// The code generator state.
pub(crate) struct Compiler<'a> {
    symbols: &'a SymbolTable,
    interns: &'a Interns,
    options: &'a CompileOptions,
    /// The unit being emitted into.
    unit: CompileUnit,
    /// Enclosing units, innermost last.
    parents: Vec<CompileUnit>,
    /// Current recursion depth of statement and expression emission.
    depth: u16,
}

impl<'a> Compiler<'a> {
    fn new(symbols: &'a SymbolTable, interns: &'a Interns, options: &'a CompileOptions) -> Self {
        let meta = CodeMeta {
            name: <&str>::from(StaticStrings::Module).to_owned(),
            filename: options.filename.clone(),
            ..CodeMeta::default()
        };
        let unit = CompileUnit {
            builder: CodeBuilder::new(),
            scope: ScopeId::MODULE,
            qualname: String::new(),
            meta,
            blocks: Vec::new(),
        };
        Self {
            symbols,
            interns,
            options,
            unit,
            parents: Vec::new(),
            depth: 0,
        }
    }

    /// Assembles the module unit.
    fn finish(mut self) -> Result<CodeObject, CompileError> {
        if !self.parents.is_empty() {
            return Err(CompileError::internal("unclosed scope at end of module"));
        }
        if self.unit.builder.falls_off_end() {
            if self.options.mode != Mode::Eval {
                self.load_const(Constant::None);
            }
            self.emit(Op::ReturnValue);
        }
        let mut meta = mem::take(&mut self.unit.meta);
        meta.firstlineno = self.unit.builder.first_line().unwrap_or(1);
        self.unit.builder.assemble(meta)
    }

    // scopes

    fn table(&self) -> &'a ScopeTable {
        self.symbols.scope(self.unit.scope)
    }

    fn name_str(&self, name: StringId) -> &'a str {
        self.interns.get_str(name)
    }

    /// Starts compiling the scope attached to `key`.
    ///
    /// Parameters take the first local slots; cell and free variables are
    /// numbered in name order.
    fn enter_scope(&mut self, key: ScopeKey, mut meta: CodeMeta, qualname: String) -> Result<(), CompileError> {
        let scope = self.symbols.id_for(key)?;
        let table = self.symbols.scope(scope);
        let mut builder = CodeBuilder::new();
        if table.is_function_like() {
            for param in &table.parameters {
                builder.add_varname(self.name_str(*param));
            }
        }
        builder.set_cellvars(self.sorted_names(table.analyzed.cellvars.iter()));
        builder.set_freevars(self.sorted_names(table.analyzed.freevars.iter()));
        builder.set_line(meta.firstlineno);
        meta.filename.clone_from(&self.options.filename);
        meta.flags |= self.scope_flags(table);

        let unit = CompileUnit {
            builder,
            scope,
            qualname,
            meta,
            blocks: Vec::new(),
        };
        let parent = mem::replace(&mut self.unit, unit);
        self.parents.push(parent);
        Ok(())
    }

    /// Seals the current unit and returns its code object and qualified name.
    fn exit_scope(&mut self) -> Result<(CodeObject, String), CompileError> {
        let Some(parent) = self.parents.pop() else {
            return Err(CompileError::internal("exit from the module scope"));
        };
        let mut unit = mem::replace(&mut self.unit, parent);
        if unit.builder.falls_off_end() {
            unit.builder.load_const(Constant::None);
            unit.builder.emit(Op::ReturnValue);
        }
        trace!(qualname = %unit.qualname, flags = unit.meta.flags.bits(), "sealing scope");
        let code = unit.builder.assemble(unit.meta)?;
        Ok((code, unit.qualname))
    }

    fn sorted_names<'n>(&self, names: impl Iterator<Item = &'n StringId>) -> Vec<String> {
        let mut names: Vec<String> = names.map(|name| self.name_str(*name).to_owned()).collect();
        names.sort_unstable();
        names
    }

    /// Flags implied by the kind of scope; argument flags are added by the caller.
    fn scope_flags(&self, table: &ScopeTable) -> CodeFlags {
        let mut flags = CodeFlags::empty();
        if table.is_function_like() {
            flags |= CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS;
        }
        if self.is_nested(table) {
            flags |= CodeFlags::NESTED;
        }
        match (table.is_generator, table.is_coroutine) {
            (true, true) => flags |= CodeFlags::ASYNC_GENERATOR,
            (true, false) => flags |= CodeFlags::GENERATOR,
            (false, true) => flags |= CodeFlags::COROUTINE,
            (false, false) => {}
        }
        flags
    }

    /// Whether some enclosing scope is a function, lambda or comprehension.
    fn is_nested(&self, table: &ScopeTable) -> bool {
        let mut parent = table.parent;
        while let Some(id) = parent {
            let scope = self.symbols.scope(id);
            if scope.is_function_like() {
                return true;
            }
            parent = scope.parent;
        }
        false
    }

    /// Qualified name of a scope named `name` defined in the current unit.
    ///
    /// `binding` is the name a `def` or `class` statement binds; a binding
    /// declared `global` makes the qualified name the bare name.
    fn qualname_for(&self, name: &str, binding: Option<StringId>) -> String {
        let table = self.table();
        let declared_global = binding.is_some_and(|binding| table.explicit_globals.contains(&binding));
        match table.kind {
            ScopeKind::Module => name.to_owned(),
            _ if declared_global => name.to_owned(),
            ScopeKind::Class | ScopeKind::Comprehension => format!("{}.{name}", self.unit.qualname),
            ScopeKind::Function | ScopeKind::Lambda => format!("{}.<locals>.{name}", self.unit.qualname),
        }
    }

    /// Whether the current unit is the body of an `async def`.
    fn in_async_function(&self) -> bool {
        let table = self.table();
        table.kind == ScopeKind::Function && table.is_coroutine
    }

    fn in_function(&self) -> bool {
        self.table().is_function_like()
    }

    // names

    fn name_access(&self, name: StringId) -> NameAccess {
        let table = self.table();
        let analyzed = &table.analyzed;
        match table.kind {
            ScopeKind::Function | ScopeKind::Lambda | ScopeKind::Comprehension => {
                if analyzed.cellvars.contains(&name) || analyzed.freevars.contains(&name) {
                    NameAccess::Deref
                } else if table.explicit_globals.contains(&name) {
                    NameAccess::Global
                } else if analyzed.bounds.contains(&name) {
                    NameAccess::Fast
                } else {
                    NameAccess::Global
                }
            }
            ScopeKind::Class => {
                if table.explicit_globals.contains(&name) {
                    NameAccess::Global
                } else if !analyzed.bounds.contains(&name) && analyzed.freevars.contains(&name) {
                    NameAccess::ClassDeref
                } else {
                    NameAccess::Name
                }
            }
            ScopeKind::Module => NameAccess::Name,
        }
    }

    /// Emits the load, store or delete of `name` in the current scope.
    fn name_op(&mut self, name: StringId, ctx: ExprContext) -> Result<(), CompileError> {
        let text = self.name_str(name);
        let access = self.name_access(name);
        match access {
            NameAccess::Fast => {
                let op = pick(ctx, Op::LoadFast, Op::StoreFast, Op::DeleteFast);
                self.unit.builder.emit_local(op, text);
            }
            NameAccess::Deref | NameAccess::ClassDeref => {
                let index = self.deref_index(text)?;
                let load = if access == NameAccess::ClassDeref {
                    Op::LoadClassderef
                } else {
                    Op::LoadDeref
                };
                let op = pick(ctx, load, Op::StoreDeref, Op::DeleteDeref);
                self.unit.builder.emit_deref(op, index);
            }
            NameAccess::Global => {
                let op = pick(ctx, Op::LoadGlobal, Op::StoreGlobal, Op::DeleteGlobal);
                self.unit.builder.emit_name(op, text);
            }
            NameAccess::Name => {
                let op = pick(ctx, Op::LoadName, Op::StoreName, Op::DeleteName);
                self.unit.builder.emit_name(op, text);
            }
        }
        Ok(())
    }

    fn static_name_op(&mut self, name: StaticStrings, ctx: ExprContext) -> Result<(), CompileError> {
        self.name_op(name.into(), ctx)
    }

    /// Index of a cell or free variable of the current unit.
    fn deref_index(&self, name: &str) -> Result<u32, CompileError> {
        self.unit
            .builder
            .cell_index(name)
            .or_else(|| self.unit.builder.free_index(name))
            .ok_or_else(|| CompileError::internal(format!("'{name}' is neither a cell nor a free variable")))
    }

    // emission

    fn emit(&mut self, op: Op) {
        self.unit.builder.emit(op);
    }

    fn emit_arg(&mut self, op: Op, arg: u32) {
        self.unit.builder.emit_arg(op, arg);
    }

    /// Emits an instruction whose operand is an element count.
    fn emit_count(&mut self, op: Op, count: usize) {
        self.unit.builder.emit_build(op, count);
    }

    fn emit_call(&mut self, op: Op, argc: usize) {
        self.unit.builder.emit_call(op, argc);
    }

    fn emit_jump(&mut self, op: Op, label: Label) {
        self.unit.builder.emit_jump(op, label);
    }

    fn emit_name(&mut self, op: Op, name: &str) {
        self.unit.builder.emit_name(op, name);
    }

    fn new_label(&mut self) -> Label {
        self.unit.builder.new_label()
    }

    fn bind(&mut self, label: Label) -> Result<(), CompileError> {
        self.unit.builder.bind_label(label)
    }

    fn load_const(&mut self, value: Constant) {
        self.unit.builder.load_const(value);
    }

    /// Starts a new source line for a statement.
    fn set_line(&mut self, position: CodeRange) {
        self.unit.builder.set_line(position.line());
    }

    /// Moves the line forward for an expression starting on a later line.
    fn advance_line(&mut self, position: CodeRange) {
        if position.line() > self.unit.builder.current_line() {
            self.unit.builder.set_line(position.line());
        }
    }

    fn push_block(&mut self, block: Block) {
        self.unit.blocks.push(block);
    }

    fn pop_block(&mut self, expected: Block) -> Result<(), CompileError> {
        match self.unit.blocks.pop() {
            Some(block) if block == expected => Ok(()),
            other => Err(CompileError::internal(format!(
                "block stack mismatch: expected {expected:?}, found {other:?}"
            ))),
        }
    }

    /// Runs `f` one recursion level deeper, refusing input nested beyond
    /// `max_recursion_depth`.
    fn guarded<T>(
        &mut self,
        position: CodeRange,
        f: impl FnOnce(&mut Self) -> Result<T, CompileError>,
    ) -> Result<T, CompileError> {
        if self.depth >= self.options.max_recursion_depth {
            return Err(CompileError::syntax(
                "maximum recursion depth exceeded during compilation",
                position,
            ));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }
}

fn pick(ctx: ExprContext, load: Op, store: Op, delete: Op) -> Op {
    match ctx {
        ExprContext::Load => load,
        ExprContext::Store => store,
        ExprContext::Del => delete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bytecode::op::Opcode, lexer::tokenize, parse::parse, scope::resolve};

    pub(super) fn compile_with(source: &str, options: &CompileOptions) -> Result<CodeObject, CompileError> {
        let tokens = tokenize(source)?;
        let parsed = parse(&tokens, source, options)?;
        let symbols = resolve(&parsed)?;
        compile_module(&parsed.module, &symbols, &parsed.interns, options)
    }

    pub(super) fn compile(source: &str) -> CodeObject {
        compile_with(source, &CompileOptions::default()).unwrap_or_else(|err| panic!("{err}"))
    }

    pub(super) fn compile_err(source: &str) -> String {
        match compile_with(source, &CompileOptions::default()) {
            Ok(code) => panic!("expected an error, got:\n{}", code.disassemble()),
            Err(err) => err.message().to_owned(),
        }
    }

    /// Opcodes of a code object, `EXTENDED_ARG` folded.
    pub(super) fn ops(code: &CodeObject) -> Vec<Opcode> {
        code.instructions().iter().map(|instr| instr.opcode).collect()
    }

    /// `NAME arg` listing of a code object, with names resolved where useful.
    pub(super) fn listing(code: &CodeObject) -> Vec<String> {
        code.instructions()
            .iter()
            .map(|instr| {
                let name: &'static str = instr.opcode.into();
                match (instr.opcode, instr.arg) {
                    (Opcode::LoadConst, Some(arg)) => {
                        format!("{name} {}", code.consts[arg as usize])
                    }
                    (
                        Opcode::LoadName
                        | Opcode::StoreName
                        | Opcode::DeleteName
                        | Opcode::LoadGlobal
                        | Opcode::StoreGlobal
                        | Opcode::LoadAttr
                        | Opcode::StoreAttr
                        | Opcode::LoadMethod
                        | Opcode::ImportName
                        | Opcode::ImportFrom,
                        Some(arg),
                    ) => format!("{name} {}", code.names[arg as usize]),
                    (Opcode::LoadFast | Opcode::StoreFast | Opcode::DeleteFast, Some(arg)) => {
                        format!("{name} {}", code.varnames[arg as usize])
                    }
                    (
                        Opcode::LoadDeref | Opcode::StoreDeref | Opcode::LoadClosure | Opcode::LoadClassderef,
                        Some(arg),
                    ) => format!("{name} {}", code.deref_name(arg as usize).unwrap_or("?")),
                    (_, Some(arg)) => format!("{name} {arg}"),
                    (_, None) => name.to_owned(),
                }
            })
            .collect()
    }

    /// The first nested code object named `name`, searched depth-first.
    pub(super) fn find_code<'c>(code: &'c CodeObject, name: &str) -> &'c CodeObject {
        fn search<'c>(code: &'c CodeObject, name: &str) -> Option<&'c CodeObject> {
            code.nested_code()
                .find_map(|nested| if nested.name == name { Some(nested) } else { search(nested, name) })
        }
        search(code, name).unwrap_or_else(|| panic!("no code object named {name}"))
    }

    #[test]
    fn test_empty_module() {
        let code = compile("");
        assert_eq!(listing(&code), vec!["LOAD_CONST None", "RETURN_VALUE"]);
        assert_eq!(code.name, "<module>");
        assert_eq!(code.flags, CodeFlags::NOFREE);
    }

    #[test]
    fn test_module_names_use_name_ops() {
        let code = compile("x = 1\ny = x\n");
        assert_eq!(
            listing(&code),
            vec![
                "LOAD_CONST 1",
                "STORE_NAME x",
                "LOAD_NAME x",
                "STORE_NAME y",
                "LOAD_CONST None",
                "RETURN_VALUE",
            ]
        );
        assert_eq!(code.firstlineno, 1);
    }

    #[test]
    fn test_function_names_and_flags() {
        let code = compile("g = 1\ndef f(a, *args, k, **kw):\n    b = a\n    return g\n");
        let f = find_code(&code, "f");
        assert_eq!(f.varnames, vec!["a", "k", "args", "kw", "b"]);
        assert_eq!(f.argcount, 1);
        assert_eq!(f.kwonlyargcount, 1);
        assert_eq!(
            f.flags,
            CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS | CodeFlags::VARARGS | CodeFlags::VARKEYWORDS | CodeFlags::NOFREE
        );
        assert_eq!(
            listing(f),
            vec!["LOAD_FAST a", "STORE_FAST b", "LOAD_GLOBAL g", "RETURN_VALUE"]
        );
        assert_eq!(f.consts[0], Constant::None);
    }

    #[test]
    fn test_closure_uses_deref() {
        let code = compile("def f():\n    x = 1\n    def g():\n        return x\n    return g\n");
        let f = find_code(&code, "f");
        let g = find_code(&code, "g");
        assert_eq!(f.cellvars, vec!["x"]);
        assert_eq!(g.freevars, vec!["x"]);
        assert!(g.flags.contains(CodeFlags::NESTED));
        assert!(!g.flags.contains(CodeFlags::NOFREE));
        assert_eq!(
            listing(f),
            vec![
                "LOAD_CONST 1",
                "STORE_DEREF x",
                "LOAD_CLOSURE x",
                "BUILD_TUPLE 1",
                "LOAD_CONST <code object g, line 3>",
                "LOAD_CONST 'f.<locals>.g'",
                "MAKE_FUNCTION 8",
                "STORE_FAST g",
                "LOAD_FAST g",
                "RETURN_VALUE",
            ]
        );
        assert_eq!(listing(g), vec!["LOAD_DEREF x", "RETURN_VALUE"]);
    }

    #[test]
    fn test_eval_mode_returns_value() {
        let options = CompileOptions::default().with_mode(Mode::Eval);
        let code = compile_with("a + 1", &options).unwrap();
        assert_eq!(
            listing(&code),
            vec!["LOAD_NAME a", "LOAD_CONST 1", "BINARY_ADD", "RETURN_VALUE"]
        );
    }

    #[test]
    fn test_interactive_mode_prints() {
        let options = CompileOptions::default().with_mode(Mode::Interactive);
        let code = compile_with("a + 1\n", &options).unwrap();
        assert_eq!(
            listing(&code),
            vec!["LOAD_NAME a", "LOAD_CONST 1", "BINARY_ADD", "PRINT_EXPR", "LOAD_CONST None", "RETURN_VALUE"]
        );
    }

    #[test]
    fn test_recursion_limit() {
        let source = format!("x = {}1{}\n", "[".repeat(12), "]".repeat(12));
        let options = CompileOptions::default().with_max_recursion_depth(8);
        let err = compile_with(&source, &options).unwrap_err();
        assert_eq!(err.message(), "maximum recursion depth exceeded during compilation");
    }
}
