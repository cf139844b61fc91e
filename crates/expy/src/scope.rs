//! Lexical scope resolution.
//!
//! Resolution runs in two phases over the parsed module:
//!
//! 1. A single top-down traversal creates one [`ScopeTable`] per scope (module,
//!    function, lambda, class, comprehension) in an arena, and records which
//!    names each scope binds (`entered`), reads (`requires`) or declares
//!    `global` / `nonlocal`.
//! 2. An analysis pass partitions the names of every scope into bound, free,
//!    cell and borrowed-cell variables. Scopes are created in pre-order, so the
//!    first sweep visits ancestors before descendants (bounds and free
//!    variables) and a reverse sweep visits descendants before ancestors (cells
//!    and names relayed through intermediate scopes).
//!
//! The AST is not modified: scope-introducing nodes carry a [`ScopeKey`] and the
//! resulting [`SymbolTable`] maps each key to its table.

use ahash::AHashMap;
use indexmap::IndexSet;
use tracing::{debug, trace};

use crate::{
    error::{CodeRange, CompileError},
    expressions::{
        Argument, Arguments, ClassDef, ComprehensionExpr, ComprehensionKind, DictItem, Expr, ExprContext, ExprLoc,
        FStringPart, FunctionDef, Identifier, Lambda, Node, NodeLoc, ScopeKey,
    },
    intern::{Interns, StaticStrings, StringId},
    parse::ParseResult,
};

/// Insertion-ordered set of names.
pub type NameSet = IndexSet<StringId, ahash::RandomState>;

/// Index of a scope in the [`SymbolTable`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u32);

impl ScopeId {
    /// The module scope is always created first.
    pub const MODULE: Self = Self(0);

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ScopeKind {
    Module,
    Function,
    Lambda,
    Class,
    Comprehension,
}

/// The partition of a scope's names computed by the analysis pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analyzed {
    /// Names local to the scope that no nested scope captures.
    pub bounds: NameSet,
    /// Names this scope reads from, or relays to, an enclosing scope's cell.
    pub freevars: NameSet,
    /// Local names captured by nested scopes; stored in cells.
    pub cellvars: NameSet,
    /// Names nested scopes capture that this scope does not bind itself; they
    /// are passed through as free variables.
    pub borrowed_cellvars: NameSet,
}

/// Everything known about one scope.
#[derive(Debug, Clone)]
pub struct ScopeTable {
    pub kind: ScopeKind,
    pub key: ScopeKey,
    /// Function or class name, or the placeholder name of a lambda or comprehension.
    pub name: StringId,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    /// Number of enclosing scopes; `0` for the module.
    pub depth: u32,
    /// Names read in this scope.
    pub requires: NameSet,
    /// Names bound in this scope by assignment, import, definition or deletion.
    pub entered: NameSet,
    pub explicit_nonlocals: NameSet,
    pub explicit_globals: NameSet,
    /// Parameter names in local-slot order.
    pub parameters: NameSet,
    pub is_generator: bool,
    pub is_coroutine: bool,
    pub has_annotation: bool,
    pub uses_await: bool,
    pub analyzed: Analyzed,
    /// Source positions of `nonlocal` declarations, checked during analysis.
    nonlocal_declarations: Vec<(StringId, CodeRange)>,
}

impl ScopeTable {
    fn new(kind: ScopeKind, key: ScopeKey, name: StringId, parent: Option<ScopeId>, depth: u32) -> Self {
        Self {
            kind,
            key,
            name,
            parent,
            children: Vec::new(),
            depth,
            requires: NameSet::default(),
            entered: NameSet::default(),
            explicit_nonlocals: NameSet::default(),
            explicit_globals: NameSet::default(),
            parameters: NameSet::default(),
            is_generator: false,
            is_coroutine: false,
            has_annotation: false,
            uses_await: false,
            analyzed: Analyzed::default(),
            nonlocal_declarations: Vec::new(),
        }
    }

    /// Functions, lambdas and comprehensions: scopes with fast locals.
    #[must_use]
    pub fn is_function_like(&self) -> bool {
        matches!(
            self.kind,
            ScopeKind::Function | ScopeKind::Lambda | ScopeKind::Comprehension
        )
    }

    #[must_use]
    pub fn is_class(&self) -> bool {
        self.kind == ScopeKind::Class
    }
}

/// The resolved scopes of one module.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    scopes: Vec<ScopeTable>,
    by_key: AHashMap<ScopeKey, ScopeId>,
}

impl SymbolTable {
    #[must_use]
    pub fn scope(&self, id: ScopeId) -> &ScopeTable {
        &self.scopes[id.index()]
    }

    #[must_use]
    pub fn module(&self) -> &ScopeTable {
        self.scope(ScopeId::MODULE)
    }

    /// Looks up the scope attached to a scope-introducing node.
    pub fn id_for(&self, key: ScopeKey) -> Result<ScopeId, CompileError> {
        self.by_key
            .get(&key)
            .copied()
            .ok_or_else(|| CompileError::internal(format!("no scope for key {}", key.index())))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScopeId, &ScopeTable)> {
        self.scopes.iter().enumerate().map(|(index, scope)| (scope_id(index), scope))
    }
}

fn scope_id(index: usize) -> ScopeId {
    ScopeId(u32::try_from(index).unwrap_or(u32::MAX))
}

/// Resolves every scope of a parsed module.
pub fn resolve(parsed: &ParseResult) -> Result<SymbolTable, CompileError> {
    let mut resolver = Resolver::new(&parsed.interns, parsed.max_recursion_depth);
    resolver.visit_body(&parsed.module.body)?;
    let Resolver { mut scopes, by_key, .. } = resolver;
    analyze(&mut scopes, &parsed.interns)?;
    debug!(scopes = scopes.len(), "resolved scopes");
    Ok(SymbolTable { scopes, by_key })
}

/// Phase 1: the tagging traversal.
struct Resolver<'i> {
    interns: &'i Interns,
    scopes: Vec<ScopeTable>,
    by_key: AHashMap<ScopeKey, ScopeId>,
    current: ScopeId,
    depth: u16,
    max_depth: u16,
}

impl<'i> Resolver<'i> {
    fn new(interns: &'i Interns, max_depth: u16) -> Self {
        let module = ScopeTable::new(ScopeKind::Module, ScopeKey::MODULE, StaticStrings::Module.into(), None, 0);
        let mut by_key = AHashMap::new();
        by_key.insert(ScopeKey::MODULE, ScopeId::MODULE);
        Self {
            interns,
            scopes: vec![module],
            by_key,
            current: ScopeId::MODULE,
            depth: 0,
            max_depth,
        }
    }

    fn scope(&mut self) -> &mut ScopeTable {
        &mut self.scopes[self.current.index()]
    }

    fn enter(&mut self, name: StringId) {
        self.scope().entered.insert(name);
    }

    fn require(&mut self, name: StringId) {
        self.scope().requires.insert(name);
    }

    /// Creates a child of the current scope and makes it current.
    fn push_scope(&mut self, kind: ScopeKind, key: ScopeKey, name: StringId) -> ScopeId {
        let parent = self.current;
        let depth = self.scopes[parent.index()].depth + 1;
        let id = scope_id(self.scopes.len());
        self.scopes.push(ScopeTable::new(kind, key, name, Some(parent), depth));
        self.scopes[parent.index()].children.push(id);
        self.by_key.insert(key, id);
        self.current = id;
        id
    }

    fn pop_scope(&mut self) {
        if let Some(parent) = self.scopes[self.current.index()].parent {
            self.current = parent;
        }
    }

    fn name_str(&self, name: StringId) -> &str {
        self.interns.get_str(name)
    }

    fn visit_body(&mut self, body: &[NodeLoc]) -> Result<(), CompileError> {
        for stmt in body {
            self.visit_stmt(stmt)?;
        }
        Ok(())
    }

    /// Runs `visit` one level deeper, failing past `max_depth`.
    fn guarded(
        &mut self,
        position: CodeRange,
        visit: impl FnOnce(&mut Self) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        if self.depth >= self.max_depth {
            return Err(CompileError::syntax(
                "maximum recursion depth exceeded during compilation",
                position,
            ));
        }
        self.depth += 1;
        let result = visit(self);
        self.depth -= 1;
        result
    }

    fn visit_stmt(&mut self, stmt: &NodeLoc) -> Result<(), CompileError> {
        self.guarded(stmt.position, |this| this.stmt_kind(stmt))
    }

    fn stmt_kind(&mut self, stmt: &NodeLoc) -> Result<(), CompileError> {
        match &stmt.node {
            Node::Expr(expr) => self.visit_expr(expr)?,
            Node::Assign { targets, value } => {
                self.visit_expr(value)?;
                for target in targets {
                    self.visit_expr(target)?;
                }
            }
            Node::AugAssign { target, value, .. } => {
                if let Expr::Name { id, .. } = &target.expr {
                    self.require(*id);
                }
                self.visit_expr(target)?;
                self.visit_expr(value)?;
            }
            Node::AnnAssign {
                target,
                annotation,
                value,
                ..
            } => {
                self.scope().has_annotation = true;
                if !self.scopes[self.current.index()].is_function_like() {
                    self.visit_expr(annotation)?;
                }
                match (&target.expr, value) {
                    // a bare annotation declares nothing
                    (Expr::Name { .. }, None) => {}
                    _ => self.visit_expr(target)?,
                }
                if let Some(value) = value {
                    self.visit_expr(value)?;
                }
            }
            Node::Delete(targets) => {
                for target in targets {
                    self.visit_expr(target)?;
                }
            }
            Node::Pass | Node::Break | Node::Continue => {}
            Node::Return(value) => {
                if let Some(value) = value {
                    self.visit_expr(value)?;
                }
            }
            Node::Raise { exc, cause } => {
                for expr in exc.iter().chain(cause) {
                    self.visit_expr(expr)?;
                }
            }
            Node::Assert { test, msg } => {
                self.visit_expr(test)?;
                if let Some(msg) = msg {
                    self.visit_expr(msg)?;
                }
            }
            Node::Global(names) => {
                for name in names {
                    self.declare_global(name)?;
                }
            }
            Node::Nonlocal(names) => {
                for name in names {
                    self.declare_nonlocal(name, stmt.position)?;
                }
            }
            Node::Import(aliases) => {
                for alias in aliases {
                    self.enter(alias.bound_name());
                }
            }
            Node::ImportFrom { names, .. } => {
                for alias in names {
                    if self.name_str(alias.name) != "*" {
                        self.enter(alias.bound_name());
                    }
                }
            }
            Node::If { test, body, orelse } | Node::While { test, body, orelse } => {
                self.visit_expr(test)?;
                self.visit_body(body)?;
                self.visit_body(orelse)?;
            }
            Node::For {
                target,
                iter,
                body,
                orelse,
                ..
            } => {
                self.visit_expr(iter)?;
                self.visit_expr(target)?;
                self.visit_body(body)?;
                self.visit_body(orelse)?;
            }
            Node::With { items, body, .. } => {
                for item in items {
                    self.visit_expr(&item.context_expr)?;
                    if let Some(vars) = &item.optional_vars {
                        self.visit_expr(vars)?;
                    }
                }
                self.visit_body(body)?;
            }
            Node::Try(stmt) => {
                self.visit_body(&stmt.body)?;
                for handler in &stmt.handlers {
                    if let Some(type_) = &handler.type_ {
                        self.visit_expr(type_)?;
                    }
                    if let Some(name) = &handler.name {
                        self.enter(name.name);
                    }
                    self.visit_body(&handler.body)?;
                }
                self.visit_body(&stmt.orelse)?;
                self.visit_body(&stmt.finalbody)?;
            }
            Node::FunctionDef(def) => self.visit_function(def)?,
            Node::ClassDef(class) => self.visit_class(class)?,
        }
        Ok(())
    }

    fn declare_global(&mut self, name: &Identifier) -> Result<(), CompileError> {
        let scope = &self.scopes[self.current.index()];
        if scope.parameters.contains(&name.name) {
            return Err(CompileError::syntax(
                format!("name '{}' is parameter and global", self.name_str(name.name)),
                name.position,
            ));
        }
        if scope.explicit_nonlocals.contains(&name.name) {
            return Err(CompileError::syntax(
                format!("name '{}' is nonlocal and global", self.name_str(name.name)),
                name.position,
            ));
        }
        self.scope().explicit_globals.insert(name.name);
        Ok(())
    }

    fn declare_nonlocal(&mut self, name: &Identifier, position: CodeRange) -> Result<(), CompileError> {
        let scope = &self.scopes[self.current.index()];
        if scope.kind == ScopeKind::Module {
            return Err(CompileError::syntax(
                "nonlocal declaration not allowed at module level",
                position,
            ));
        }
        if scope.parameters.contains(&name.name) {
            return Err(CompileError::syntax(
                format!("name '{}' is parameter and nonlocal", self.name_str(name.name)),
                name.position,
            ));
        }
        if scope.explicit_globals.contains(&name.name) {
            return Err(CompileError::syntax(
                format!("name '{}' is nonlocal and global", self.name_str(name.name)),
                name.position,
            ));
        }
        let scope = self.scope();
        scope.explicit_nonlocals.insert(name.name);
        scope.nonlocal_declarations.push((name.name, name.position));
        Ok(())
    }

    /// Visits the parts of a signature evaluated where the function is defined.
    fn visit_signature_defaults(&mut self, args: &Arguments) -> Result<(), CompileError> {
        for default in args.defaults.iter().chain(args.kw_defaults.iter().flatten()) {
            self.visit_expr(default)?;
        }
        Ok(())
    }

    fn enter_parameters(&mut self, args: &Arguments) {
        for param in args.slots() {
            let scope = self.scope();
            scope.parameters.insert(param.name.name);
            scope.entered.insert(param.name.name);
        }
    }

    fn visit_function(&mut self, def: &FunctionDef) -> Result<(), CompileError> {
        for decorator in &def.decorators {
            self.visit_expr(decorator)?;
        }
        self.visit_signature_defaults(&def.args)?;
        for annotation in def.args.slots().filter_map(|param| param.annotation.as_ref()).chain(&def.returns) {
            self.visit_expr(annotation)?;
        }
        self.enter(def.name.name);
        self.push_scope(ScopeKind::Function, def.scope, def.name.name);
        self.scope().is_coroutine = def.is_async;
        self.enter_parameters(&def.args);
        self.visit_body(&def.body)?;
        self.pop_scope();
        Ok(())
    }

    fn visit_lambda(&mut self, lambda: &Lambda) -> Result<(), CompileError> {
        self.visit_signature_defaults(&lambda.args)?;
        self.push_scope(ScopeKind::Lambda, lambda.scope, StaticStrings::Lambda.into());
        self.enter_parameters(&lambda.args);
        self.visit_expr(&lambda.body)?;
        self.pop_scope();
        Ok(())
    }

    fn visit_class(&mut self, class: &ClassDef) -> Result<(), CompileError> {
        self.visit_arguments(&class.args)?;
        for decorator in &class.decorators {
            self.visit_expr(decorator)?;
        }
        self.enter(class.name.name);
        self.push_scope(ScopeKind::Class, class.scope, class.name.name);
        self.enter(StaticStrings::DunderModule.into());
        self.enter(StaticStrings::DunderQualname.into());
        self.visit_body(&class.body)?;
        self.pop_scope();
        Ok(())
    }

    fn visit_comprehension(&mut self, comp: &ComprehensionExpr) -> Result<(), CompileError> {
        let Some((first, rest)) = comp.generators.split_first() else {
            return Err(CompileError::internal("comprehension without generators"));
        };
        // the outermost iterable is evaluated in the enclosing scope
        self.visit_expr(&first.iter)?;
        let name = match comp.kind {
            ComprehensionKind::List(_) => StaticStrings::ListComp,
            ComprehensionKind::Set(_) => StaticStrings::SetComp,
            ComprehensionKind::Dict { .. } => StaticStrings::DictComp,
            ComprehensionKind::Generator(_) => StaticStrings::GenExpr,
        };
        self.push_scope(ScopeKind::Comprehension, comp.scope, name.into());
        {
            let implicit_arg = StaticStrings::ImplicitArg.into();
            let scope = self.scope();
            scope.parameters.insert(implicit_arg);
            scope.entered.insert(implicit_arg);
            scope.is_generator = matches!(comp.kind, ComprehensionKind::Generator(_));
            scope.is_coroutine = comp.generators.iter().any(|generator| generator.is_async);
        }
        self.visit_expr(&first.target)?;
        for condition in &first.ifs {
            self.visit_expr(condition)?;
        }
        for generator in rest {
            self.visit_expr(&generator.iter)?;
            self.visit_expr(&generator.target)?;
            for condition in &generator.ifs {
                self.visit_expr(condition)?;
            }
        }
        match &comp.kind {
            ComprehensionKind::List(elt) | ComprehensionKind::Set(elt) | ComprehensionKind::Generator(elt) => {
                self.visit_expr(elt)?;
            }
            ComprehensionKind::Dict { key, value } => {
                self.visit_expr(key)?;
                self.visit_expr(value)?;
            }
        }
        self.pop_scope();
        Ok(())
    }

    fn visit_arguments(&mut self, args: &[Argument]) -> Result<(), CompileError> {
        for arg in args {
            match arg {
                Argument::Positional(value)
                | Argument::Starred(value)
                | Argument::Keyword { value, .. }
                | Argument::DoubleStarred(value) => self.visit_expr(value)?,
            }
        }
        Ok(())
    }

    fn visit_fstring(&mut self, parts: &[FStringPart]) -> Result<(), CompileError> {
        for part in parts {
            if let FStringPart::Formatted { value, format_spec, .. } = part {
                self.visit_expr(value)?;
                if let Some(spec) = format_spec {
                    self.visit_fstring(spec)?;
                }
            }
        }
        Ok(())
    }

    /// Binds the target of `name := value` in the nearest scope that is not a
    /// comprehension; comprehensions in between see it as a nonlocal (or a
    /// global at module level).
    fn bind_named_expr(&mut self, target: &Identifier) -> Result<(), CompileError> {
        let mut relays = Vec::new();
        let mut owner = self.current;
        while self.scopes[owner.index()].kind == ScopeKind::Comprehension {
            relays.push(owner);
            match self.scopes[owner.index()].parent {
                Some(parent) => owner = parent,
                None => break,
            }
        }
        let owner_kind = self.scopes[owner.index()].kind;
        if !relays.is_empty() && owner_kind == ScopeKind::Class {
            return Err(CompileError::syntax(
                "assignment expression within a comprehension cannot be used in a class body",
                target.position,
            ));
        }
        self.scopes[owner.index()].entered.insert(target.name);
        for relay in relays {
            let scope = &mut self.scopes[relay.index()];
            if owner_kind == ScopeKind::Module {
                scope.explicit_globals.insert(target.name);
            } else {
                scope.explicit_nonlocals.insert(target.name);
            }
        }
        Ok(())
    }

    fn visit_expr(&mut self, expr: &ExprLoc) -> Result<(), CompileError> {
        self.guarded(expr.position, |this| this.expr_kind(expr))
    }

    fn expr_kind(&mut self, expr: &ExprLoc) -> Result<(), CompileError> {
        match &expr.expr {
            Expr::Literal(_) => {}
            Expr::Name { id, ctx } => match ctx {
                ExprContext::Load => {
                    self.require(*id);
                    let implicit_class = *id == StringId::from(StaticStrings::Super)
                        || *id == StringId::from(StaticStrings::DunderClass);
                    if implicit_class && self.scopes[self.current.index()].is_function_like() {
                        self.require(StaticStrings::DunderClass.into());
                    }
                }
                ExprContext::Store | ExprContext::Del => self.enter(*id),
            },
            Expr::JoinedStr(parts) => self.visit_fstring(parts)?,
            Expr::BoolOp { values, .. } => {
                for value in values {
                    self.visit_expr(value)?;
                }
            }
            Expr::BinOp { left, right, .. } => {
                self.visit_expr(left)?;
                self.visit_expr(right)?;
            }
            Expr::UnaryOp { operand, .. } => self.visit_expr(operand)?,
            Expr::Compare { left, comparisons } => {
                self.visit_expr(left)?;
                for (_, right) in comparisons {
                    self.visit_expr(right)?;
                }
            }
            Expr::Call { func, args } => {
                self.visit_expr(func)?;
                self.visit_arguments(args)?;
            }
            Expr::Attribute { value, .. } => self.visit_expr(value)?,
            Expr::Subscript { value, slice, .. } => {
                self.visit_expr(value)?;
                self.visit_expr(slice)?;
            }
            Expr::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.visit_expr(part)?;
                }
            }
            Expr::Starred { value, .. } => self.visit_expr(value)?,
            Expr::Await(value) => {
                let scope = self.scope();
                scope.uses_await = true;
                // a comprehension that awaits is itself asynchronous
                if scope.kind == ScopeKind::Comprehension {
                    scope.is_coroutine = true;
                }
                self.visit_expr(value)?;
            }
            Expr::YieldFrom(value) => {
                self.scope().is_generator = true;
                self.visit_expr(value)?;
            }
            Expr::Yield(value) => {
                self.scope().is_generator = true;
                if let Some(value) = value {
                    self.visit_expr(value)?;
                }
            }
            Expr::Tuple { elts, .. } | Expr::List { elts, .. } | Expr::Set(elts) => {
                for elt in elts {
                    self.visit_expr(elt)?;
                }
            }
            Expr::Dict { items, .. } => {
                for item in items {
                    match item {
                        DictItem::Pair { key, value } => {
                            self.visit_expr(key)?;
                            self.visit_expr(value)?;
                        }
                        DictItem::Unpack(mapping) => self.visit_expr(mapping)?,
                    }
                }
            }
            Expr::Comprehension(comp) => self.visit_comprehension(comp)?,
            Expr::Lambda(lambda) => self.visit_lambda(lambda)?,
            Expr::IfExp { test, body, orelse } => {
                self.visit_expr(test)?;
                self.visit_expr(body)?;
                self.visit_expr(orelse)?;
            }
            Expr::NamedExpr { target, value } => {
                self.visit_expr(value)?;
                self.bind_named_expr(target)?;
            }
        }
        Ok(())
    }
}

/// Phase 2: computes the [`Analyzed`] partition of every scope.
fn analyze(scopes: &mut [ScopeTable], interns: &Interns) -> Result<(), CompileError> {
    for index in 0..scopes.len() {
        resolve_bounds(&mut scopes[index]);
        resolve_freevars(scopes, index, interns)?;
    }
    for index in (0..scopes.len()).rev() {
        resolve_cellvars(scopes, index);
        let scope = &scopes[index];
        trace!(
            scope = interns.get_str(scope.name),
            kind = %scope.kind,
            bounds = scope.analyzed.bounds.len(),
            freevars = scope.analyzed.freevars.len(),
            cellvars = scope.analyzed.cellvars.len(),
            borrowed = scope.analyzed.borrowed_cellvars.len(),
            "analyzed scope"
        );
    }
    Ok(())
}

fn resolve_bounds(scope: &mut ScopeTable) {
    if scope.kind == ScopeKind::Module {
        return;
    }
    scope.analyzed.bounds = scope
        .entered
        .iter()
        .filter(|name| !scope.explicit_nonlocals.contains(*name) && !scope.explicit_globals.contains(*name))
        .copied()
        .collect();
}

fn resolve_freevars(scopes: &mut [ScopeTable], index: usize, interns: &Interns) -> Result<(), CompileError> {
    let scope = &scopes[index];
    if scope.kind == ScopeKind::Module {
        return Ok(());
    }
    for (name, position) in &scope.nonlocal_declarations {
        if !bound_in_enclosing(scopes, scope.parent, *name) {
            return Err(CompileError::syntax(
                format!("no binding for nonlocal '{}' found", interns.get_str(*name)),
                *position,
            ));
        }
    }
    let mut freevars = scope.explicit_nonlocals.clone();
    for name in &scope.requires {
        if scope.entered.contains(name) || scope.explicit_globals.contains(name) {
            continue;
        }
        if bound_in_enclosing(scopes, scope.parent, *name) {
            freevars.insert(*name);
        }
    }
    scopes[index].analyzed.freevars = freevars;
    Ok(())
}

/// Whether `name` resolves to a binding of an enclosing function-like scope.
///
/// Class scopes are skipped, except that they provide the implicit
/// `__class__`; the module ends the search because its names are dynamic.
fn bound_in_enclosing(scopes: &[ScopeTable], mut current: Option<ScopeId>, name: StringId) -> bool {
    while let Some(id) = current {
        let scope = &scopes[id.index()];
        match scope.kind {
            ScopeKind::Module => return false,
            ScopeKind::Class => {
                if name == StaticStrings::DunderClass.into() {
                    return true;
                }
            }
            ScopeKind::Function | ScopeKind::Lambda | ScopeKind::Comprehension => {
                if scope.analyzed.bounds.contains(&name) {
                    return true;
                }
                if scope.explicit_globals.contains(&name) {
                    return false;
                }
            }
        }
        current = scope.parent;
    }
    false
}

fn resolve_cellvars(scopes: &mut [ScopeTable], index: usize) {
    let fetched: NameSet = scopes[index]
        .children
        .iter()
        .flat_map(|child| scopes[child.index()].analyzed.freevars.iter().copied())
        .collect();
    let scope = &mut scopes[index];
    let analyzed = &mut scope.analyzed;
    match scope.kind {
        ScopeKind::Module => {}
        ScopeKind::Class => {
            let class_cell = StringId::from(StaticStrings::DunderClass);
            for name in fetched {
                if name == class_cell {
                    analyzed.cellvars.insert(name);
                } else {
                    analyzed.borrowed_cellvars.insert(name);
                    analyzed.freevars.insert(name);
                }
            }
        }
        ScopeKind::Function | ScopeKind::Lambda | ScopeKind::Comprehension => {
            for name in fetched {
                if analyzed.bounds.shift_remove(&name) {
                    analyzed.cellvars.insert(name);
                } else {
                    analyzed.borrowed_cellvars.insert(name);
                    analyzed.freevars.insert(name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer::tokenize, options::CompileOptions, parse::parse};

    fn resolve_source(source: &str) -> Result<(ParseResult, SymbolTable), CompileError> {
        let tokens = tokenize(source)?;
        let parsed = parse(&tokens, source, &CompileOptions::default())?;
        let table = resolve(&parsed)?;
        Ok((parsed, table))
    }

    fn names(interns: &Interns, set: &NameSet) -> Vec<String> {
        let mut names: Vec<String> = set.iter().map(|id| interns.get_str(*id).to_owned()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_depth_limit() {
        let source = "x = [[[[[[1]]]]]]\n";
        let tokens = tokenize(source).unwrap();
        let mut parsed = parse(&tokens, source, &CompileOptions::default()).unwrap();
        assert!(resolve(&parsed).is_ok());

        parsed.max_recursion_depth = 4;
        let err = resolve(&parsed).unwrap_err();
        assert_eq!(err.message(), "maximum recursion depth exceeded during compilation");
    }

    /// The analysis of the first scope named `name`.
    fn analysis<'t>(parsed: &ParseResult, table: &'t SymbolTable, name: &str) -> &'t ScopeTable {
        table
            .iter()
            .map(|(_, scope)| scope)
            .find(|scope| parsed.interns.get_str(scope.name) == name)
            .unwrap_or_else(|| panic!("no scope named {name}"))
    }

    #[test]
    fn test_simple_closure() {
        let (parsed, table) = resolve_source("def f():\n    x = 1\n    def g():\n        return x\n    return g\n").unwrap();
        let f = analysis(&parsed, &table, "f");
        let g = analysis(&parsed, &table, "g");
        assert_eq!(names(&parsed.interns, &f.analyzed.cellvars), vec!["x"]);
        assert_eq!(names(&parsed.interns, &f.analyzed.bounds), vec!["g"]);
        assert_eq!(names(&parsed.interns, &g.analyzed.freevars), vec!["x"]);
        assert!(g.analyzed.bounds.is_empty());
    }

    #[test]
    fn test_three_level_relay() {
        let source = "def f():\n    x = 1\n    def g():\n        def h():\n            return x\n        return h\n    return g\n";
        let (parsed, table) = resolve_source(source).unwrap();
        let f = analysis(&parsed, &table, "f");
        let g = analysis(&parsed, &table, "g");
        let h = analysis(&parsed, &table, "h");
        assert_eq!(names(&parsed.interns, &h.analyzed.freevars), vec!["x"]);
        assert_eq!(names(&parsed.interns, &g.analyzed.borrowed_cellvars), vec!["x"]);
        assert_eq!(names(&parsed.interns, &g.analyzed.freevars), vec!["x"]);
        assert!(g.analyzed.cellvars.is_empty());
        assert_eq!(names(&parsed.interns, &f.analyzed.cellvars), vec!["x"]);
        assert!(!f.analyzed.bounds.contains(&parsed.interns.lookup("x").unwrap()));
    }

    #[test]
    fn test_module_names_are_never_free() {
        let (parsed, table) = resolve_source("x = 1\ndef f():\n    return x\n").unwrap();
        let f = analysis(&parsed, &table, "f");
        assert!(f.analyzed.freevars.is_empty());
        assert!(table.module().analyzed.cellvars.is_empty());
    }

    #[test]
    fn test_class_scope_is_skipped() {
        let source = "def f():\n    x = 1\n    class C:\n        x = 2\n        def m(self):\n            return x\n";
        let (parsed, table) = resolve_source(source).unwrap();
        let class = analysis(&parsed, &table, "C");
        let method = analysis(&parsed, &table, "m");
        assert_eq!(names(&parsed.interns, &method.analyzed.freevars), vec!["x"]);
        assert_eq!(names(&parsed.interns, &class.analyzed.borrowed_cellvars), vec!["x"]);
        // the class keeps its own binding of x
        assert!(class.analyzed.bounds.contains(&parsed.interns.lookup("x").unwrap()));
        let f = analysis(&parsed, &table, "f");
        assert_eq!(names(&parsed.interns, &f.analyzed.cellvars), vec!["x"]);
    }

    #[test]
    fn test_super_creates_class_cell() {
        let source = "class C(B):\n    def m(self):\n        return super().m()\n";
        let (parsed, table) = resolve_source(source).unwrap();
        let class = analysis(&parsed, &table, "C");
        let method = analysis(&parsed, &table, "m");
        assert_eq!(names(&parsed.interns, &method.analyzed.freevars), vec!["__class__"]);
        assert_eq!(names(&parsed.interns, &class.analyzed.cellvars), vec!["__class__"]);
        assert!(class.analyzed.borrowed_cellvars.is_empty());
    }

    #[test]
    fn test_global_declaration() {
        let (parsed, table) = resolve_source("def f():\n    global x\n    x = 1\n").unwrap();
        let f = analysis(&parsed, &table, "f");
        assert!(f.analyzed.bounds.is_empty());
        assert_eq!(names(&parsed.interns, &f.explicit_globals), vec!["x"]);
    }

    #[test]
    fn test_nonlocal_declaration() {
        let source = "def f():\n    x = 1\n    def g():\n        nonlocal x\n        x = 2\n";
        let (parsed, table) = resolve_source(source).unwrap();
        let g = analysis(&parsed, &table, "g");
        assert_eq!(names(&parsed.interns, &g.analyzed.freevars), vec!["x"]);
        assert!(g.analyzed.bounds.is_empty());
        let f = analysis(&parsed, &table, "f");
        assert_eq!(names(&parsed.interns, &f.analyzed.cellvars), vec!["x"]);
    }

    #[test]
    fn test_declaration_errors() {
        let err = resolve_source("def f(a):\n    global a\n").unwrap_err();
        assert_eq!(err.message(), "name 'a' is parameter and global");
        let err = resolve_source("nonlocal x\n").unwrap_err();
        assert_eq!(err.message(), "nonlocal declaration not allowed at module level");
        let err = resolve_source("def f():\n    nonlocal x\n").unwrap_err();
        assert_eq!(err.message(), "no binding for nonlocal 'x' found");
        let err = resolve_source("def f():\n    x = 1\n    def g():\n        nonlocal x\n        global x\n").unwrap_err();
        assert_eq!(err.message(), "name 'x' is nonlocal and global");
    }

    #[test]
    fn test_comprehension_scope() {
        let (parsed, table) = resolve_source("ys = [y * k for y in src if y]\n").unwrap();
        let comp = analysis(&parsed, &table, "<listcomp>");
        assert_eq!(names(&parsed.interns, &comp.analyzed.bounds), vec![".0", "y"]);
        assert!(comp.analyzed.freevars.is_empty());
        let module = table.module();
        assert!(module.requires.contains(&parsed.interns.lookup("src").unwrap()));
        assert!(!comp.requires.contains(&parsed.interns.lookup("src").unwrap()));
    }

    #[test]
    fn test_comprehension_captures_function_local() {
        let source = "def f(k):\n    return [y * k for y in range(3)]\n";
        let (parsed, table) = resolve_source(source).unwrap();
        let f = analysis(&parsed, &table, "f");
        let comp = analysis(&parsed, &table, "<listcomp>");
        assert_eq!(names(&parsed.interns, &comp.analyzed.freevars), vec!["k"]);
        assert_eq!(names(&parsed.interns, &f.analyzed.cellvars), vec!["k"]);
    }

    #[test]
    fn test_named_expr_in_comprehension_binds_outside() {
        let source = "def f(r):\n    [(n := i) for i in r]\n    return n\n";
        let (parsed, table) = resolve_source(source).unwrap();
        let f = analysis(&parsed, &table, "f");
        let comp = analysis(&parsed, &table, "<listcomp>");
        assert_eq!(names(&parsed.interns, &comp.analyzed.freevars), vec!["n"]);
        assert_eq!(names(&parsed.interns, &f.analyzed.cellvars), vec!["n"]);

        let (parsed, table) = resolve_source("[(m := i) for i in r]\n").unwrap();
        let comp = analysis(&parsed, &table, "<listcomp>");
        assert_eq!(names(&parsed.interns, &comp.explicit_globals), vec!["m"]);
        assert!(comp.analyzed.bounds.iter().all(|name| parsed.interns.get_str(*name) != "m"));
    }

    #[test]
    fn test_generator_and_coroutine_flags() {
        let source = "async def f():\n    await g()\ndef h():\n    yield 1\nv = (x async for x in y)\n";
        let (parsed, table) = resolve_source(source).unwrap();
        let f = analysis(&parsed, &table, "f");
        assert!(f.is_coroutine && f.uses_await && !f.is_generator);
        assert!(analysis(&parsed, &table, "h").is_generator);
        let genexp = analysis(&parsed, &table, "<genexpr>");
        assert!(genexp.is_generator && genexp.is_coroutine);
    }

    #[test]
    fn test_cells_and_bounds_are_disjoint() {
        let source = "def f(a, b):\n    c = a\n    def g():\n        return a + c\n    return lambda: b\n";
        let (_, table) = resolve_source(source).unwrap();
        for (_, scope) in table.iter() {
            assert!(scope.analyzed.bounds.iter().all(|name| !scope.analyzed.cellvars.contains(name)));
            assert!(scope.explicit_nonlocals.iter().all(|name| scope.analyzed.freevars.contains(name)));
        }
    }
}
