//! Recursive-descent parser over the token stream.
//!
//! Every grammar rule is a method returning [`PResult`]: `Ok(Some(node))` when
//! the rule matched, `Ok(None)` when it did not (with the cursor restored to
//! where the rule started), and `Err` for errors that must abort parsing even
//! though the input matched the grammar, such as an invalid assignment target.
//! Alternatives are tried in order; the furthest token any rule looked at is
//! remembered so a failed parse reports the position where the input stopped
//! making sense.

mod expr;
mod literal;
mod rewrite;
mod stmt;

use std::borrow::Cow;

use tracing::debug;

use crate::{
    error::{CodeRange, CompileError},
    expressions::{Expr, ExprLoc, Identifier, Module, Node, NodeLoc, ScopeKey},
    intern::Interns,
    options::{CompileOptions, Mode},
    token::{Token, TokenKind},
};

/// The output of parsing: the module and the identifier table it refers to.
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub module: Module,
    pub interns: Interns,
    /// How deep the resolver may recurse into the module.
    pub max_recursion_depth: u16,
}

/// Parses `tokens` according to `options.mode`.
///
/// `source` is only used to build the excerpt of a syntax error.
pub fn parse(tokens: &[Token], source: &str, options: &CompileOptions) -> Result<ParseResult, CompileError> {
    let mut parser = Parser::new(tokens, options.max_nesting_depth, options.max_recursion_depth);
    let module = match options.mode {
        Mode::Exec => parser.file_input(Mode::Exec),
        Mode::Interactive => parser.file_input(Mode::Interactive),
        Mode::Eval => parser.eval_input(),
    }
    .map_err(|err| err.with_source(&options.filename, source))?;
    debug!(
        statements = module.body.len(),
        scopes = parser.state.next_scope,
        identifiers = parser.state.interns.len(),
        "parsed module"
    );
    Ok(ParseResult {
        module,
        interns: parser.state.interns,
        max_recursion_depth: options.max_recursion_depth,
    })
}

/// Result of a grammar rule; see the module documentation.
pub(crate) type PResult<T> = Result<Option<T>, CompileError>;

/// A grammar rule usable as an alternative in [`Parser::first_of`].
type Rule<'a, T> = fn(&mut Parser<'a>) -> PResult<T>;

/// Evaluates a sub-rule; when it does not match, restores the cursor to
/// `$start` and fails the enclosing rule.
macro_rules! need {
    ($parser:expr, $start:expr, $rule:expr) => {
        match $rule? {
            Some(value) => value,
            None => return Ok($parser.reset($start)),
        }
    };
}

/// Consumes an operator token or fails the enclosing rule.
macro_rules! need_op {
    ($parser:expr, $start:expr, $op:expr) => {
        if !$parser.eat_op($op) {
            return Ok($parser.reset($start));
        }
    };
}

/// Consumes a keyword token or fails the enclosing rule.
macro_rules! need_kw {
    ($parser:expr, $start:expr, $keyword:expr) => {
        if !$parser.eat_keyword($keyword) {
            return Ok($parser.reset($start));
        }
    };
}

pub(crate) use {need, need_kw, need_op};

/// State that outlives a single token stream: f-string expressions are parsed
/// by a sub-parser that borrows this from the main one.
#[derive(Debug, Default)]
struct ParserState {
    interns: Interns,
    next_scope: u32,
}

pub(crate) struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    /// Furthest token index any rule inspected.
    max_fetched: usize,
    state: ParserState,
    nesting: u16,
    max_nesting: u16,
    /// Links of the operator, trailer and `elif` chains being built.
    links: u16,
    /// Limit on `nesting + links`, the depth later passes recurse to.
    max_depth: u16,
}

const NESTED_EXPRESSIONS: &str = "too many nested parentheses";
const NESTED_BLOCKS: &str = "too many statically nested blocks";
const TOO_DEEP: &str = "maximum recursion depth exceeded during compilation";

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], max_nesting: u16, max_depth: u16) -> Self {
        Self {
            tokens,
            pos: 0,
            max_fetched: 0,
            state: ParserState::default(),
            nesting: 0,
            max_nesting,
            links: 0,
            max_depth,
        }
    }

    fn file_input(&mut self, mode: Mode) -> Result<Module, CompileError> {
        let mut body = Vec::new();
        loop {
            match self.peek().map(|token| token.kind) {
                None | Some(TokenKind::EndMarker) => break,
                Some(TokenKind::Newline) => self.pos += 1,
                Some(_) => match self.stmt()? {
                    Some(stmts) => body.extend(stmts),
                    None => return Err(self.furthest_failure()),
                },
            }
        }
        Ok(Module { body, mode })
    }

    fn eval_input(&mut self) -> Result<Module, CompileError> {
        let Some(expr) = self.testlist()? else {
            return Err(self.furthest_failure());
        };
        while self.eat_kind(TokenKind::Newline) {}
        if !self.at_end() {
            return Err(self.furthest_failure());
        }
        let body = vec![NodeLoc::new(expr.position, Node::Expr(expr))];
        Ok(Module { body, mode: Mode::Eval })
    }

    /// The syntax error for a parse that stopped matching.
    fn furthest_failure(&self) -> CompileError {
        let token = self.tokens.get(self.max_fetched).or_else(|| self.tokens.last());
        let msg = match token.map(|token| token.kind) {
            Some(TokenKind::Indent) => "unexpected indent",
            Some(TokenKind::Dedent) => "unexpected unindent",
            Some(TokenKind::EndMarker) => "unexpected EOF while parsing",
            _ => "invalid syntax",
        };
        let position = token.map_or_else(CodeRange::default, |token| CodeRange::point(token.loc()));
        CompileError::syntax(msg, position)
    }

    // cursor

    /// The current token, recording how far the parse has looked.
    fn peek(&mut self) -> Option<&'a Token> {
        self.max_fetched = self.max_fetched.max(self.pos);
        self.tokens.get(self.pos)
    }

    fn peek_nth(&mut self, ahead: usize) -> Option<&'a Token> {
        self.max_fetched = self.max_fetched.max(self.pos + ahead);
        self.tokens.get(self.pos + ahead)
    }

    fn reset<T>(&mut self, start: usize) -> Option<T> {
        self.pos = start;
        None
    }

    fn at_end(&mut self) -> bool {
        self.peek().is_none_or(|token| token.kind == TokenKind::EndMarker)
    }

    fn peek_op(&mut self, op: &str) -> bool {
        self.peek().is_some_and(|token| token.is_op(op))
    }

    fn peek_keyword(&mut self, keyword: &str) -> bool {
        self.peek().is_some_and(|token| token.is_keyword(keyword))
    }

    fn peek_kind(&mut self, kind: TokenKind) -> bool {
        self.peek().is_some_and(|token| token.kind == kind)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        let matched = self.peek_op(op);
        if matched {
            self.pos += 1;
        }
        matched
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let matched = self.peek_keyword(keyword);
        if matched {
            self.pos += 1;
        }
        matched
    }

    fn eat_kind(&mut self, kind: TokenKind) -> bool {
        let matched = self.peek_kind(kind);
        if matched {
            self.pos += 1;
        }
        matched
    }

    /// Consumes a NAME token.
    fn name(&mut self) -> Option<Identifier> {
        let token = self.peek()?;
        if token.kind != TokenKind::Name {
            return None;
        }
        self.pos += 1;
        Some(Identifier {
            name: self.state.interns.intern(&token.text),
            position: token.range(),
        })
    }

    /// Tries each rule in order from the same position; the first match wins.
    fn first_of<T>(&mut self, alternatives: &[Rule<'a, T>]) -> PResult<T> {
        let start = self.pos;
        for rule in alternatives {
            if let Some(value) = rule(self)? {
                return Ok(Some(value));
            }
            self.pos = start;
        }
        Ok(None)
    }

    /// Runs `rule` one nesting level deeper, failing with `msg` past the limit.
    fn nested<T>(&mut self, msg: &'static str, rule: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.nesting >= self.max_nesting {
            return Err(self.error_here(msg));
        }
        self.nesting += 1;
        let result = rule(self);
        self.nesting -= 1;
        result
    }

    /// Adds one link to the chain being built. Chains nest nodes without
    /// nesting rule calls, so their length counts against the recursion limit.
    ///
    /// Callers save `links` before the chain and restore it after.
    fn extend_chain(&mut self) -> Result<(), CompileError> {
        if self.nesting.saturating_add(self.links) >= self.max_depth {
            return Err(self.error_here(TOO_DEEP));
        }
        self.links += 1;
        Ok(())
    }

    // positions

    /// Range from the token at `start` to the last consumed token.
    fn range_from(&self, start: usize) -> CodeRange {
        let Some(first) = self.tokens.get(start).or_else(|| self.tokens.last()) else {
            return CodeRange::default();
        };
        match self.pos.checked_sub(1).and_then(|last| self.tokens.get(last)) {
            Some(last) if self.pos > start => CodeRange::new(first.loc(), last.end_loc()),
            _ => CodeRange::point(first.loc()),
        }
    }

    fn error_here(&mut self, msg: impl Into<Cow<'static, str>>) -> CompileError {
        let position = self
            .peek()
            .or_else(|| self.tokens.last())
            .map_or_else(CodeRange::default, Token::range);
        CompileError::syntax(msg, position)
    }

    fn next_scope_key(&mut self) -> ScopeKey {
        self.state.next_scope += 1;
        ScopeKey::new(self.state.next_scope)
    }

    fn located(&self, start: usize, expr: Expr) -> ExprLoc {
        ExprLoc::new(self.range_from(start), expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expressions::{Argument, ComprehensionKind, ExprContext, Literal},
        lexer::tokenize,
    };

    fn parse_source(source: &str) -> Result<ParseResult, CompileError> {
        let tokens = tokenize(source)?;
        parse(&tokens, source, &CompileOptions::default())
    }

    fn body(source: &str) -> Vec<NodeLoc> {
        parse_source(source).unwrap().module.body
    }

    fn only_expr(source: &str) -> Expr {
        match body(source).remove(0).node {
            Node::Expr(expr) => expr.expr,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    fn parse_error(source: &str) -> CompileError {
        parse_source(source).unwrap_err()
    }

    #[test]
    fn test_empty_module() {
        assert!(body("").is_empty());
        assert!(body("\n\n# only a comment\n").is_empty());
    }

    #[test]
    fn test_precedence() {
        let Expr::BinOp { left, op, right } = only_expr("1 + 2 * 3\n") else {
            panic!("expected binop");
        };
        assert_eq!(op, crate::expressions::Operator::Add);
        assert!(matches!(left.expr, Expr::Literal(Literal::Int(_))));
        assert!(matches!(right.expr, Expr::BinOp { .. }));
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let Expr::UnaryOp { operand, .. } = only_expr("-2 ** 2\n") else {
            panic!("expected unary op");
        };
        assert!(matches!(operand.expr, Expr::BinOp { .. }));
    }

    #[test]
    fn test_chained_comparison() {
        let Expr::Compare { comparisons, .. } = only_expr("a < b is not c not in d\n") else {
            panic!("expected compare");
        };
        let ops: Vec<_> = comparisons.iter().map(|(op, _)| *op).collect();
        use crate::expressions::CmpOperator::{IsNot, Lt, NotIn};
        assert_eq!(ops, vec![Lt, IsNot, NotIn]);
    }

    #[test]
    fn test_chained_assignment_targets_are_stores() {
        let nodes = body("a = b = 1\n");
        let Node::Assign { targets, .. } = &nodes[0].node else {
            panic!("expected assign");
        };
        assert_eq!(targets.len(), 2);
        for target in targets {
            assert!(matches!(
                target.expr,
                Expr::Name {
                    ctx: ExprContext::Store,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_dict_destructuring_target() {
        let nodes = body("{'a': x, 'b': [y, z]} = m\n");
        let Node::Assign { targets, .. } = &nodes[0].node else {
            panic!("expected assign");
        };
        assert!(matches!(
            targets[0].expr,
            Expr::Dict {
                ctx: ExprContext::Store,
                ..
            }
        ));
    }

    #[test]
    fn test_walrus_in_condition() {
        let nodes = body("if (n := 10) > 5:\n    pass\n");
        let Node::If { test, .. } = &nodes[0].node else {
            panic!("expected if");
        };
        let Expr::Compare { left, .. } = &test.expr else {
            panic!("expected compare");
        };
        assert!(matches!(left.expr, Expr::NamedExpr { .. }));
    }

    #[test]
    fn test_elif_chain_nests() {
        let nodes = body("if a:\n    x\nelif b:\n    y\nelse:\n    z\n");
        let Node::If { orelse, .. } = &nodes[0].node else {
            panic!("expected if");
        };
        assert_eq!(orelse.len(), 1);
        assert!(matches!(&orelse[0].node, Node::If { orelse, .. } if orelse.len() == 1));
    }

    #[test]
    fn test_call_arguments_in_source_order() {
        let Expr::Call { args, .. } = only_expr("f(a, *b, c=1, **d)\n") else {
            panic!("expected call");
        };
        assert!(matches!(args[0], Argument::Positional(_)));
        assert!(matches!(args[1], Argument::Starred(_)));
        assert!(matches!(args[2], Argument::Keyword { .. }));
        assert!(matches!(args[3], Argument::DoubleStarred(_)));
    }

    #[test]
    fn test_bare_generator_argument() {
        let Expr::Call { args, .. } = only_expr("sum(x for x in y)\n") else {
            panic!("expected call");
        };
        let Argument::Positional(ExprLoc {
            expr: Expr::Comprehension(comp),
            ..
        }) = &args[0]
        else {
            panic!("expected generator argument");
        };
        assert!(matches!(comp.kind, ComprehensionKind::Generator(_)));
    }

    #[test]
    fn test_comprehensions() {
        let Expr::Comprehension(comp) = only_expr("{k: v for k, v in items if k async for j in aiter()}\n") else {
            panic!("expected comprehension");
        };
        assert!(matches!(comp.kind, ComprehensionKind::Dict { .. }));
        assert_eq!(comp.generators.len(), 2);
        assert_eq!(comp.generators[0].ifs.len(), 1);
        assert!(comp.generators[1].is_async);
    }

    #[test]
    fn test_set_and_dict_displays() {
        assert!(matches!(only_expr("{1, *a}\n"), Expr::Set(items) if items.len() == 2));
        assert!(matches!(only_expr("{}\n"), Expr::Dict { items, .. } if items.is_empty()));
        assert!(matches!(only_expr("{**a, 'b': 1}\n"), Expr::Dict { items, .. } if items.len() == 2));
    }

    #[test]
    fn test_subscripts_and_slices() {
        let Expr::Subscript { slice, .. } = only_expr("a[1:2, ::3]\n") else {
            panic!("expected subscript");
        };
        let Expr::Tuple { elts, .. } = &slice.expr else {
            panic!("expected tuple of slices");
        };
        assert!(elts.iter().all(|elt| matches!(elt.expr, Expr::Slice { .. })));
    }

    #[test]
    fn test_function_signature() {
        let nodes = body("async def f(a, b=1, *args, c, d=2, **kw) -> int:\n    return a\n");
        let Node::FunctionDef(def) = &nodes[0].node else {
            panic!("expected def");
        };
        assert!(def.is_async);
        assert_eq!(def.args.args.len(), 2);
        assert_eq!(def.args.defaults.len(), 1);
        assert!(def.args.vararg.is_some());
        assert_eq!(def.args.kwonlyargs.len(), 2);
        assert_eq!(def.args.kw_defaults.iter().filter(|d| d.is_some()).count(), 1);
        assert!(def.args.kwarg.is_some());
        assert!(def.returns.is_some());
    }

    #[test]
    fn test_decorated_class() {
        let nodes = body("@dec\nclass C(Base, metaclass=M):\n    x = 1\n");
        let Node::ClassDef(class) = &nodes[0].node else {
            panic!("expected class");
        };
        assert_eq!(class.decorators.len(), 1);
        assert_eq!(class.args.len(), 2);
    }

    #[test]
    fn test_try_statement() {
        let nodes = body("try:\n    a\nexcept E as e:\n    b\nexcept:\n    c\nelse:\n    d\nfinally:\n    e\n");
        let Node::Try(stmt) = &nodes[0].node else {
            panic!("expected try");
        };
        assert_eq!(stmt.handlers.len(), 2);
        assert!(stmt.handlers[0].name.is_some());
        assert_eq!(stmt.orelse.len(), 1);
        assert_eq!(stmt.finalbody.len(), 1);
    }

    #[test]
    fn test_relative_import() {
        let nodes = body("from ...pkg.mod import a as b, c\n");
        let Node::ImportFrom { level, names, module } = &nodes[0].node else {
            panic!("expected import from");
        };
        assert_eq!(*level, 3);
        assert_eq!(names.len(), 2);
        assert!(module.is_some());
    }

    #[test]
    fn test_string_concatenation_and_fstring() {
        assert_eq!(only_expr("'a' \"b\"\n"), Expr::Literal(Literal::Str("ab".to_owned())));
        let Expr::JoinedStr(parts) = only_expr("f'x={x!r:>{width}}' 'tail'\n") else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn test_eval_mode() {
        let tokens = tokenize("a + 1\n").unwrap();
        let options = CompileOptions::default().with_mode(Mode::Eval);
        let result = parse(&tokens, "a + 1\n", &options).unwrap();
        assert_eq!(result.module.mode, Mode::Eval);
        assert_eq!(result.module.body.len(), 1);
    }

    #[test]
    fn test_furthest_failure_position() {
        let err = parse_error("total = 1\nx = (1 + )\n");
        assert_eq!(err.message(), "invalid syntax");
        let position = err.position().unwrap();
        assert_eq!((position.start().line, position.start().column), (2, 9));
        assert!(err.excerpt().is_some_and(|excerpt| excerpt.contains("x = (1 + )")));
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert_eq!(parse_error("f() = 1\n").message(), "can't assign to function call");
        assert_eq!(parse_error("del 1\n").message(), "can't delete literal");
        assert_eq!(parse_error("a + 1 += 2\n").message(), "illegal expression for augmented assignment");
    }

    #[test]
    fn test_call_argument_checks() {
        assert_eq!(
            parse_error("f(a=1, b)\n").message(),
            "non-keyword argument follows keyword argument"
        );
        let err = parse_error("x = f(a=1, b)\n");
        let range = err.position().unwrap();
        assert_eq!((range.start().column, range.end().column), (4, 13));
        let err = parse_error("class C(a=1, B):\n    pass\n");
        assert_eq!(err.message(), "non-keyword argument follows keyword argument");
        assert_eq!(err.position().unwrap().start().column, 0);
        assert_eq!(parse_error("f(a=1, a=2)\n").message(), "keyword argument repeated");
        // a starred argument may follow keywords
        assert!(parse_source("f(a=1, *b)\n").is_ok());
    }

    #[test]
    fn test_mixed_bytes_literals() {
        assert_eq!(parse_error("b'a' 'b'\n").message(), "cannot mix bytes and nonbytes literals");
    }

    #[test]
    fn test_default_except_must_be_last() {
        let err = parse_error("try:\n    a\nexcept:\n    b\nexcept E:\n    c\n");
        assert_eq!(err.message(), "default 'except:' must be last");
    }

    #[test]
    fn test_parameter_checks() {
        assert_eq!(
            parse_error("def f(a=1, b):\n    pass\n").message(),
            "non-default argument follows default argument"
        );
        assert_eq!(
            parse_error("def f(*):\n    pass\n").message(),
            "named arguments must follow bare *"
        );
        assert_eq!(
            parse_error("def f(a, a):\n    pass\n").message(),
            "duplicate argument 'a' in function definition"
        );
    }

    #[test]
    fn test_nesting_limit() {
        let source = format!("x = {}1{}\n", "(".repeat(12), ")".repeat(12));
        let tokens = tokenize(&source).unwrap();
        let options = CompileOptions::default().with_max_nesting_depth(20);
        let err = parse(&tokens, &source, &options).unwrap_err();
        assert_eq!(err.message(), NESTED_EXPRESSIONS);
        assert!(parse(&tokens, &source, &CompileOptions::default()).is_ok());
    }

    #[test]
    fn test_chain_limit() {
        let options = CompileOptions::default().with_max_recursion_depth(10);
        let chains = [
            "x = a + b + c + d + e + f + g + h + i + j + k\n",
            "x = a.b.c.d.e.f.g.h.i.j.k\n",
            "x = 2 ** 2 ** 2 ** 2 ** 2 ** 2 ** 2 ** 2 ** 2 ** 2 ** 2\n",
        ];
        for source in chains {
            let tokens = tokenize(source).unwrap();
            let err = parse(&tokens, source, &options).unwrap_err();
            assert_eq!(err.message(), TOO_DEEP);
            assert!(parse(&tokens, source, &CompileOptions::default()).is_ok());
        }

        // links are released once a chain ends
        let siblings = format!("{}x = [{}]\n", "y = a + b + c\n".repeat(20), ["a + b + c"; 20].join(", "));
        let tokens = tokenize(&siblings).unwrap();
        assert!(parse(&tokens, &siblings, &options).is_ok());
    }

    #[test]
    fn test_scope_keys_are_unique() {
        let nodes = body("def f():\n    g = lambda: [x for x in y]\nclass C:\n    pass\n");
        let Node::FunctionDef(def) = &nodes[0].node else {
            panic!("expected def");
        };
        let Node::ClassDef(class) = &nodes[1].node else {
            panic!("expected class");
        };
        assert_ne!(def.scope, class.scope);
        assert_ne!(def.scope, ScopeKey::MODULE);
    }
}
