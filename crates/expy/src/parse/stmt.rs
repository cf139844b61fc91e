//! Statement rules.

use super::{NESTED_BLOCKS, PResult, Parser, Rule, need, need_kw, need_op, rewrite};
use crate::{
    error::CompileError,
    expressions::{
        Alias, Arg, Arguments, ClassDef, ExceptHandler, ExprLoc, FunctionDef, Identifier, Node, NodeLoc, Operator,
        Try, WithItem,
    },
    intern::StringId,
    token::TokenKind,
};

impl<'a> Parser<'a> {
    pub(super) fn stmt(&mut self) -> PResult<Vec<NodeLoc>> {
        if let Some(node) = self.compound_stmt()? {
            return Ok(Some(vec![node]));
        }
        self.simple_stmt()
    }

    fn compound_stmt(&mut self) -> PResult<NodeLoc> {
        let rules: [Rule<'a, NodeLoc>; 9] = [
            Self::if_stmt,
            Self::while_stmt,
            Self::for_stmt,
            Self::try_stmt,
            Self::with_stmt,
            Self::funcdef,
            Self::classdef,
            Self::decorated,
            Self::async_stmt,
        ];
        self.first_of(&rules)
    }

    /// One line of `;`-separated small statements.
    pub(super) fn simple_stmt(&mut self) -> PResult<Vec<NodeLoc>> {
        let start = self.pos;
        let mut stmts = vec![need!(self, start, self.small_stmt())];
        while self.eat_op(";") {
            if self.peek_kind(TokenKind::Newline) {
                break;
            }
            stmts.push(need!(self, start, self.small_stmt()));
        }
        if !self.eat_kind(TokenKind::Newline) {
            return Ok(self.reset(start));
        }
        Ok(Some(stmts))
    }

    fn small_stmt(&mut self) -> PResult<NodeLoc> {
        let rules: [Rule<'a, NodeLoc>; 13] = [
            Self::del_stmt,
            Self::pass_stmt,
            Self::break_stmt,
            Self::continue_stmt,
            Self::return_stmt,
            Self::raise_stmt,
            Self::yield_stmt,
            Self::import_name,
            Self::import_from,
            Self::global_stmt,
            Self::nonlocal_stmt,
            Self::assert_stmt,
            Self::expr_stmt,
        ];
        self.first_of(&rules)
    }

    /// An indented block, or a simple statement on the same line.
    pub(super) fn suite(&mut self) -> PResult<Vec<NodeLoc>> {
        self.nested(NESTED_BLOCKS, |parser| {
            let start = parser.pos;
            if !parser.eat_kind(TokenKind::Newline) {
                return parser.simple_stmt();
            }
            if !parser.eat_kind(TokenKind::Indent) {
                return Ok(parser.reset(start));
            }
            let mut body = Vec::new();
            while !parser.eat_kind(TokenKind::Dedent) {
                body.extend(need!(parser, start, parser.stmt()));
            }
            Ok(Some(body))
        })
    }

    /// `':' suite`, the tail shared by every compound statement clause.
    fn block(&mut self) -> PResult<Vec<NodeLoc>> {
        let start = self.pos;
        need_op!(self, start, ":");
        self.suite()
    }

    /// An optional `else` clause; an absent clause is an empty body.
    fn else_block(&mut self) -> PResult<Vec<NodeLoc>> {
        if !self.eat_keyword("else") {
            return Ok(Some(Vec::new()));
        }
        self.block()
    }

    // compound statements

    fn if_stmt(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        need_kw!(self, start, "if");
        self.if_clause(start)
    }

    /// The remainder of an `if` or `elif` clause; `elif` becomes a nested `if`.
    fn if_clause(&mut self, start: usize) -> PResult<NodeLoc> {
        let test = need!(self, start, self.namedexpr_test());
        let body = need!(self, start, self.block());
        let orelse = if self.peek_keyword("elif") {
            let elif_start = self.pos;
            self.pos += 1;
            let links = self.links;
            self.extend_chain()?;
            let clause = self.if_clause(elif_start);
            self.links = links;
            vec![need!(self, start, clause)]
        } else {
            need!(self, start, self.else_block())
        };
        Ok(Some(NodeLoc::new(self.range_from(start), Node::If { test, body, orelse })))
    }

    fn while_stmt(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        need_kw!(self, start, "while");
        let test = need!(self, start, self.namedexpr_test());
        let body = need!(self, start, self.block());
        let orelse = need!(self, start, self.else_block());
        Ok(Some(NodeLoc::new(self.range_from(start), Node::While { test, body, orelse })))
    }

    fn for_stmt(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        self.for_clause(start, false)
    }

    fn for_clause(&mut self, start: usize, is_async: bool) -> PResult<NodeLoc> {
        need_kw!(self, start, "for");
        let target = rewrite::as_store(need!(self, start, self.exprlist()))?;
        need_kw!(self, start, "in");
        let iter = need!(self, start, self.testlist());
        let body = need!(self, start, self.block());
        let orelse = need!(self, start, self.else_block());
        let node = Node::For {
            target,
            iter,
            body,
            orelse,
            is_async,
        };
        Ok(Some(NodeLoc::new(self.range_from(start), node)))
    }

    fn try_stmt(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        need_kw!(self, start, "try");
        let body = need!(self, start, self.block());
        let mut handlers: Vec<ExceptHandler> = Vec::new();
        while self.peek_keyword("except") {
            if let Some(bare) = handlers.last().filter(|handler| handler.type_.is_none()) {
                return Err(CompileError::syntax("default 'except:' must be last", bare.position));
            }
            handlers.push(need!(self, start, self.except_clause()));
        }
        let orelse = if handlers.is_empty() {
            Vec::new()
        } else {
            need!(self, start, self.else_block())
        };
        let finalbody = if self.eat_keyword("finally") {
            need!(self, start, self.block())
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Ok(self.reset(start));
        }
        let node = Node::Try(Box::new(Try {
            body,
            handlers,
            orelse,
            finalbody,
        }));
        Ok(Some(NodeLoc::new(self.range_from(start), node)))
    }

    fn except_clause(&mut self) -> PResult<ExceptHandler> {
        let start = self.pos;
        need_kw!(self, start, "except");
        let type_ = self.test()?;
        let name = if type_.is_some() && self.eat_keyword("as") {
            match self.name() {
                Some(name) => Some(name),
                None => return Ok(self.reset(start)),
            }
        } else {
            None
        };
        let position = self.range_from(start);
        let body = need!(self, start, self.block());
        Ok(Some(ExceptHandler {
            position,
            type_,
            name,
            body,
        }))
    }

    fn with_stmt(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        self.with_clause(start, false)
    }

    fn with_clause(&mut self, start: usize, is_async: bool) -> PResult<NodeLoc> {
        need_kw!(self, start, "with");
        let mut items = vec![need!(self, start, self.with_item())];
        while self.eat_op(",") {
            items.push(need!(self, start, self.with_item()));
        }
        let body = need!(self, start, self.block());
        Ok(Some(NodeLoc::new(
            self.range_from(start),
            Node::With { items, body, is_async },
        )))
    }

    fn with_item(&mut self) -> PResult<WithItem> {
        let start = self.pos;
        let context_expr = need!(self, start, self.test());
        let optional_vars = if self.eat_keyword("as") {
            Some(rewrite::as_store(need!(self, start, self.expr()))?)
        } else {
            None
        };
        Ok(Some(WithItem {
            context_expr,
            optional_vars,
        }))
    }

    fn funcdef(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        self.function(start, Vec::new(), false)
    }

    fn function(&mut self, start: usize, decorators: Vec<ExprLoc>, is_async: bool) -> PResult<NodeLoc> {
        need_kw!(self, start, "def");
        let Some(name) = self.name() else {
            return Ok(self.reset(start));
        };
        need_op!(self, start, "(");
        let args = need!(self, start, self.parameter_list(")", true));
        need_op!(self, start, ")");
        let returns = if self.eat_op("->") {
            Some(need!(self, start, self.test()))
        } else {
            None
        };
        let scope = self.next_scope_key();
        let body = need!(self, start, self.block());
        let def = FunctionDef {
            name,
            args,
            body,
            decorators,
            returns,
            is_async,
            scope,
        };
        Ok(Some(NodeLoc::new(self.range_from(start), Node::FunctionDef(Box::new(def)))))
    }

    fn classdef(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        self.class(start, Vec::new())
    }

    fn class(&mut self, start: usize, decorators: Vec<ExprLoc>) -> PResult<NodeLoc> {
        need_kw!(self, start, "class");
        let Some(name) = self.name() else {
            return Ok(self.reset(start));
        };
        let args = if self.eat_op("(") {
            let args = if self.peek_op(")") {
                Vec::new()
            } else {
                need!(self, start, self.arglist())
            };
            need_op!(self, start, ")");
            rewrite::check_call_args(&args, self.range_from(start))?;
            args
        } else {
            Vec::new()
        };
        let scope = self.next_scope_key();
        let body = need!(self, start, self.block());
        let class = ClassDef {
            name,
            args,
            body,
            decorators,
            scope,
        };
        Ok(Some(NodeLoc::new(self.range_from(start), Node::ClassDef(Box::new(class)))))
    }

    fn decorated(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        let mut decorators = Vec::new();
        while self.eat_op("@") {
            decorators.push(need!(self, start, self.namedexpr_test()));
            if !self.eat_kind(TokenKind::Newline) {
                return Ok(self.reset(start));
            }
        }
        if decorators.is_empty() {
            return Ok(None);
        }
        if self.peek_keyword("class") {
            self.class(start, decorators)
        } else if self.eat_keyword("async") {
            self.function(start, decorators, true)
        } else {
            self.function(start, decorators, false)
        }
    }

    fn async_stmt(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        need_kw!(self, start, "async");
        if self.peek_keyword("def") {
            self.function(start, Vec::new(), true)
        } else if self.peek_keyword("with") {
            self.with_clause(start, true)
        } else if self.peek_keyword("for") {
            self.for_clause(start, true)
        } else {
            Ok(self.reset(start))
        }
    }

    /// Parameters of a `def` (closed by `)`, annotations allowed) or a lambda
    /// (closed by `:`).
    pub(super) fn parameter_list(&mut self, closing: &str, annotations: bool) -> PResult<Arguments> {
        let start = self.pos;
        let mut args = Arguments::default();
        let mut keyword_only = false;
        while !self.peek_op(closing) {
            if self.eat_op("**") {
                args.kwarg = Some(need!(self, start, self.parameter(annotations)));
                self.eat_op(",");
                break;
            }
            if self.eat_op("*") {
                if keyword_only {
                    return Ok(self.reset(start));
                }
                keyword_only = true;
                args.vararg = self.parameter(annotations)?;
            } else {
                let param = need!(self, start, self.parameter(annotations));
                let default = if self.eat_op("=") {
                    Some(need!(self, start, self.test()))
                } else {
                    None
                };
                if keyword_only {
                    args.kwonlyargs.push(param);
                    args.kw_defaults.push(default);
                } else {
                    match default {
                        Some(default) => args.defaults.push(default),
                        None if !args.defaults.is_empty() => {
                            return Err(CompileError::syntax(
                                "non-default argument follows default argument",
                                param.name.position,
                            ));
                        }
                        None => {}
                    }
                    args.args.push(param);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        if keyword_only && args.vararg.is_none() && args.kwonlyargs.is_empty() {
            return Err(self.error_here("named arguments must follow bare *"));
        }
        let mut seen: Vec<StringId> = Vec::new();
        for param in args.slots() {
            if seen.contains(&param.name.name) {
                let name = self.state.interns.get_str(param.name.name);
                return Err(CompileError::syntax(
                    format!("duplicate argument '{name}' in function definition"),
                    param.name.position,
                ));
            }
            seen.push(param.name.name);
        }
        Ok(Some(args))
    }

    fn parameter(&mut self, annotations: bool) -> PResult<Arg> {
        let start = self.pos;
        let Some(name) = self.name() else {
            return Ok(None);
        };
        let annotation = if annotations && self.eat_op(":") {
            Some(need!(self, start, self.test()))
        } else {
            None
        };
        Ok(Some(Arg { name, annotation }))
    }

    // small statements

    fn bare_keyword(&mut self, keyword: &str, node: Node) -> PResult<NodeLoc> {
        let start = self.pos;
        need_kw!(self, start, keyword);
        Ok(Some(NodeLoc::new(self.range_from(start), node)))
    }

    fn pass_stmt(&mut self) -> PResult<NodeLoc> {
        self.bare_keyword("pass", Node::Pass)
    }

    fn break_stmt(&mut self) -> PResult<NodeLoc> {
        self.bare_keyword("break", Node::Break)
    }

    fn continue_stmt(&mut self) -> PResult<NodeLoc> {
        self.bare_keyword("continue", Node::Continue)
    }

    fn del_stmt(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        need_kw!(self, start, "del");
        let (items, _) = need!(self, start, self.exprlist_items());
        let targets = items.into_iter().map(rewrite::as_del).collect::<Result<_, _>>()?;
        Ok(Some(NodeLoc::new(self.range_from(start), Node::Delete(targets))))
    }

    fn return_stmt(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        need_kw!(self, start, "return");
        let value = self.testlist_star_expr()?;
        Ok(Some(NodeLoc::new(self.range_from(start), Node::Return(value))))
    }

    fn raise_stmt(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        need_kw!(self, start, "raise");
        let exc = self.test()?;
        let cause = if exc.is_some() && self.eat_keyword("from") {
            Some(need!(self, start, self.test()))
        } else {
            None
        };
        Ok(Some(NodeLoc::new(self.range_from(start), Node::Raise { exc, cause })))
    }

    fn yield_stmt(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        let value = need!(self, start, self.yield_expr());
        Ok(Some(NodeLoc::new(self.range_from(start), Node::Expr(value))))
    }

    fn global_stmt(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        need_kw!(self, start, "global");
        let Some(names) = self.name_list() else {
            return Ok(self.reset(start));
        };
        Ok(Some(NodeLoc::new(self.range_from(start), Node::Global(names))))
    }

    fn nonlocal_stmt(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        need_kw!(self, start, "nonlocal");
        let Some(names) = self.name_list() else {
            return Ok(self.reset(start));
        };
        Ok(Some(NodeLoc::new(self.range_from(start), Node::Nonlocal(names))))
    }

    fn name_list(&mut self) -> Option<Vec<Identifier>> {
        let mut names = vec![self.name()?];
        loop {
            let comma = self.pos;
            if !self.eat_op(",") {
                break;
            }
            match self.name() {
                Some(name) => names.push(name),
                None => {
                    self.pos = comma;
                    break;
                }
            }
        }
        Some(names)
    }

    fn assert_stmt(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        need_kw!(self, start, "assert");
        let test = need!(self, start, self.test());
        let msg = if self.eat_op(",") {
            Some(need!(self, start, self.test()))
        } else {
            None
        };
        Ok(Some(NodeLoc::new(self.range_from(start), Node::Assert { test, msg })))
    }

    fn import_name(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        need_kw!(self, start, "import");
        let mut names = Vec::new();
        loop {
            let Some(alias) = self.dotted_as_name() else {
                return Ok(self.reset(start));
            };
            names.push(alias);
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(Some(NodeLoc::new(self.range_from(start), Node::Import(names))))
    }

    fn dotted_as_name(&mut self) -> Option<Alias> {
        let start = self.pos;
        let (full, top_level) = self.dotted_name()?;
        let asname = if self.eat_keyword("as") {
            let Some(asname) = self.name() else {
                self.pos = start;
                return None;
            };
            Some(asname.name)
        } else {
            None
        };
        Some(Alias {
            name: self.state.interns.intern(&full),
            asname,
            top_level,
            position: self.range_from(start),
        })
    }

    /// `NAME ('.' NAME)*`, returning the joined name and the first component.
    fn dotted_name(&mut self) -> Option<(String, StringId)> {
        let first = self.name()?;
        let mut full = self.state.interns.get_str(first.name).to_owned();
        loop {
            let dot = self.pos;
            if !self.eat_op(".") {
                break;
            }
            match self.name() {
                Some(part) => {
                    full.push('.');
                    full.push_str(self.state.interns.get_str(part.name));
                }
                None => {
                    self.pos = dot;
                    break;
                }
            }
        }
        Some((full, first.name))
    }

    fn import_from(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        need_kw!(self, start, "from");
        let mut level = 0;
        loop {
            if self.eat_op(".") {
                level += 1;
            } else if self.eat_op("...") {
                level += 3;
            } else {
                break;
            }
        }
        let module = self.dotted_name().map(|(full, _)| self.state.interns.intern(&full));
        if module.is_none() && level == 0 {
            return Ok(self.reset(start));
        }
        need_kw!(self, start, "import");
        let names = if self.peek_op("*") {
            let star = self.peek().map(|token| token.range()).unwrap_or_default();
            self.pos += 1;
            let name = self.state.interns.intern("*");
            vec![Alias {
                name,
                asname: None,
                top_level: name,
                position: star,
            }]
        } else if self.eat_op("(") {
            let (names, _) = need!(self, start, self.import_as_names());
            need_op!(self, start, ")");
            names
        } else {
            let (names, trailing_comma) = need!(self, start, self.import_as_names());
            if trailing_comma {
                return Err(CompileError::syntax(
                    "trailing comma not allowed without surrounding parentheses",
                    self.range_from(start),
                ));
            }
            names
        };
        let node = Node::ImportFrom { module, names, level };
        Ok(Some(NodeLoc::new(self.range_from(start), node)))
    }

    fn import_as_names(&mut self) -> PResult<(Vec<Alias>, bool)> {
        let start = self.pos;
        let mut names = Vec::new();
        loop {
            let alias_start = self.pos;
            let Some(name) = self.name() else {
                break;
            };
            let asname = if self.eat_keyword("as") {
                match self.name() {
                    Some(asname) => Some(asname.name),
                    None => return Ok(self.reset(start)),
                }
            } else {
                None
            };
            names.push(Alias {
                name: name.name,
                asname,
                top_level: name.name,
                position: self.range_from(alias_start),
            });
            if !self.eat_op(",") {
                return Ok(Some((names, false)));
            }
        }
        if names.is_empty() {
            return Ok(self.reset(start));
        }
        Ok(Some((names, true)))
    }

    /// Expression statements and every form of assignment.
    fn expr_stmt(&mut self) -> PResult<NodeLoc> {
        let start = self.pos;
        let first = need!(self, start, self.testlist_star_expr());
        if self.eat_op(":") {
            let parenthesized = self.tokens.get(start).is_some_and(|token| token.is_op("("));
            let annotation = need!(self, start, self.test());
            let value = if self.eat_op("=") {
                Some(need!(self, start, self.assignment_value()))
            } else {
                None
            };
            let node = rewrite::annotated_assignment(first, annotation, value, parenthesized)?;
            return Ok(Some(NodeLoc::new(self.range_from(start), node)));
        }
        if let Some(op) = self.augmented_operator() {
            let value = need!(self, start, self.assignment_value());
            let target = rewrite::augmented_target(first)?;
            return Ok(Some(NodeLoc::new(
                self.range_from(start),
                Node::AugAssign { target, op, value },
            )));
        }
        let mut targets = Vec::new();
        let mut value = first;
        while self.eat_op("=") {
            let next = need!(self, start, self.assignment_value());
            targets.push(std::mem::replace(&mut value, next));
        }
        let node = if targets.is_empty() {
            Node::Expr(value)
        } else {
            let targets = targets.into_iter().map(rewrite::as_store).collect::<Result<_, _>>()?;
            Node::Assign { targets, value }
        };
        Ok(Some(NodeLoc::new(self.range_from(start), node)))
    }

    /// Consumes an augmented assignment operator such as `+=`.
    fn augmented_operator(&mut self) -> Option<Operator> {
        let token = self.peek()?;
        if token.kind != TokenKind::Op || token.text.len() < 2 || !token.text.ends_with('=') {
            return None;
        }
        let op = Operator::from_token(&token.text)?;
        self.pos += 1;
        Some(op)
    }
}
