//! Expression rules, from `test` down to atoms.

use super::{NESTED_EXPRESSIONS, PResult, Parser, Rule, need, need_kw, need_op, rewrite};
use crate::{
    error::CompileError,
    expressions::{
        Argument, BoolOperator, CmpOperator, Comprehension, ComprehensionExpr, ComprehensionKind, DictItem, Expr,
        ExprContext, ExprLoc, Lambda, Literal, Operator, UnaryOperator,
    },
    token::TokenKind,
};

/// Contents of a parenthesized or bracketed display.
enum Display {
    Single(ExprLoc),
    Items(Vec<ExprLoc>),
    Comprehension(ExprLoc, Vec<Comprehension>),
}

/// First item of a brace display, which decides between dict and set.
enum BraceItem {
    Dict(DictItem),
    Set(ExprLoc),
}

const UNPACKING_IN_COMPREHENSION: &str = "iterable unpacking cannot be used in comprehension";

impl<'a> Parser<'a> {
    pub(super) fn test(&mut self) -> PResult<ExprLoc> {
        self.nested(NESTED_EXPRESSIONS, |parser| {
            if parser.peek_keyword("lambda") {
                return parser.lambdef(false);
            }
            let start = parser.pos;
            let body = need!(parser, start, parser.or_test());
            let condition = parser.pos;
            if !parser.eat_keyword("if") {
                return Ok(Some(body));
            }
            let Some(test) = parser.or_test()? else {
                parser.pos = condition;
                return Ok(Some(body));
            };
            if !parser.eat_keyword("else") {
                parser.pos = condition;
                return Ok(Some(body));
            }
            let Some(orelse) = parser.test()? else {
                parser.pos = condition;
                return Ok(Some(body));
            };
            let expr = Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            };
            Ok(Some(parser.located(start, expr)))
        })
    }

    /// `test` without conditional expressions, used for comprehension filters.
    fn test_nocond(&mut self) -> PResult<ExprLoc> {
        if self.peek_keyword("lambda") {
            return self.lambdef(true);
        }
        self.or_test()
    }

    /// `NAME ':=' test | test`
    pub(super) fn namedexpr_test(&mut self) -> PResult<ExprLoc> {
        let start = self.pos;
        let is_walrus = self.peek().is_some_and(|token| token.kind == TokenKind::Name)
            && self.peek_nth(1).is_some_and(|token| token.is_op(":="));
        if !is_walrus {
            return self.test();
        }
        let Some(target) = self.name() else {
            return Ok(None);
        };
        self.pos += 1;
        let value = need!(self, start, self.test());
        let expr = Expr::NamedExpr {
            target,
            value: Box::new(value),
        };
        Ok(Some(self.located(start, expr)))
    }

    fn lambdef(&mut self, nocond: bool) -> PResult<ExprLoc> {
        let start = self.pos;
        need_kw!(self, start, "lambda");
        let args = need!(self, start, self.parameter_list(":", false));
        need_op!(self, start, ":");
        let scope = self.next_scope_key();
        let body = if nocond {
            need!(self, start, self.test_nocond())
        } else {
            need!(self, start, self.test())
        };
        let lambda = Lambda { args, body, scope };
        Ok(Some(self.located(start, Expr::Lambda(Box::new(lambda)))))
    }

    pub(super) fn or_test(&mut self) -> PResult<ExprLoc> {
        self.bool_chain("or", BoolOperator::Or, Self::and_test)
    }

    fn and_test(&mut self) -> PResult<ExprLoc> {
        self.bool_chain("and", BoolOperator::And, Self::not_test)
    }

    fn bool_chain(&mut self, keyword: &str, op: BoolOperator, operand: Rule<'a, ExprLoc>) -> PResult<ExprLoc> {
        let start = self.pos;
        let mut values = vec![need!(self, start, operand(self))];
        loop {
            let before = self.pos;
            if !self.eat_keyword(keyword) {
                break;
            }
            match operand(self)? {
                Some(value) => values.push(value),
                None => {
                    self.pos = before;
                    break;
                }
            }
        }
        if values.len() == 1 {
            return Ok(values.pop());
        }
        Ok(Some(self.located(start, Expr::BoolOp { op, values })))
    }

    fn not_test(&mut self) -> PResult<ExprLoc> {
        let start = self.pos;
        if !self.eat_keyword("not") {
            return self.comparison();
        }
        let operand = need!(self, start, self.nested(NESTED_EXPRESSIONS, Self::not_test));
        let expr = Expr::UnaryOp {
            op: UnaryOperator::Not,
            operand: Box::new(operand),
        };
        Ok(Some(self.located(start, expr)))
    }

    fn comparison(&mut self) -> PResult<ExprLoc> {
        let start = self.pos;
        let left = need!(self, start, self.expr());
        let mut comparisons = Vec::new();
        loop {
            let before = self.pos;
            let Some(op) = self.comparison_operator() else {
                break;
            };
            match self.expr()? {
                Some(right) => comparisons.push((op, right)),
                None => {
                    self.pos = before;
                    break;
                }
            }
        }
        if comparisons.is_empty() {
            return Ok(Some(left));
        }
        let expr = Expr::Compare {
            left: Box::new(left),
            comparisons,
        };
        Ok(Some(self.located(start, expr)))
    }

    /// Consumes a comparison operator, including `not in` and `is not`.
    fn comparison_operator(&mut self) -> Option<CmpOperator> {
        let token = self.peek()?;
        let (op, width) = match (token.kind, token.text.as_str()) {
            (TokenKind::Op, "<") => (CmpOperator::Lt, 1),
            (TokenKind::Op, ">") => (CmpOperator::Gt, 1),
            (TokenKind::Op, "==") => (CmpOperator::Eq, 1),
            (TokenKind::Op, ">=") => (CmpOperator::GtE, 1),
            (TokenKind::Op, "<=") => (CmpOperator::LtE, 1),
            (TokenKind::Op, "!=") => (CmpOperator::NotEq, 1),
            (TokenKind::Keyword, "in") => (CmpOperator::In, 1),
            (TokenKind::Keyword, "is") => {
                if self.peek_nth(1).is_some_and(|next| next.is_keyword("not")) {
                    (CmpOperator::IsNot, 2)
                } else {
                    (CmpOperator::Is, 1)
                }
            }
            (TokenKind::Keyword, "not") if self.peek_nth(1).is_some_and(|next| next.is_keyword("in")) => {
                (CmpOperator::NotIn, 2)
            }
            _ => return None,
        };
        self.pos += width;
        Some(op)
    }

    fn star_expr(&mut self) -> PResult<ExprLoc> {
        let start = self.pos;
        need_op!(self, start, "*");
        let value = need!(self, start, self.expr());
        let expr = Expr::Starred {
            value: Box::new(value),
            ctx: ExprContext::Load,
        };
        Ok(Some(self.located(start, expr)))
    }

    fn star_or_expr(&mut self) -> PResult<ExprLoc> {
        if self.peek_op("*") { self.star_expr() } else { self.expr() }
    }

    fn star_or_test(&mut self) -> PResult<ExprLoc> {
        if self.peek_op("*") { self.star_expr() } else { self.test() }
    }

    fn star_or_namedexpr(&mut self) -> PResult<ExprLoc> {
        if self.peek_op("*") {
            self.star_expr()
        } else {
            self.namedexpr_test()
        }
    }

    pub(super) fn expr(&mut self) -> PResult<ExprLoc> {
        self.binary_chain(&["|"], Self::xor_expr)
    }

    fn xor_expr(&mut self) -> PResult<ExprLoc> {
        self.binary_chain(&["^"], Self::and_expr)
    }

    fn and_expr(&mut self) -> PResult<ExprLoc> {
        self.binary_chain(&["&"], Self::shift_expr)
    }

    fn shift_expr(&mut self) -> PResult<ExprLoc> {
        self.binary_chain(&["<<", ">>"], Self::arith_expr)
    }

    fn arith_expr(&mut self) -> PResult<ExprLoc> {
        self.binary_chain(&["+", "-"], Self::term)
    }

    fn term(&mut self) -> PResult<ExprLoc> {
        self.binary_chain(&["*", "/", "%", "//", "@"], Self::factor)
    }

    /// Left-associative chain of `operand (op operand)*`.
    fn binary_chain(&mut self, operators: &[&str], operand: Rule<'a, ExprLoc>) -> PResult<ExprLoc> {
        let start = self.pos;
        let mut left = need!(self, start, operand(self));
        let links = self.links;
        loop {
            let before = self.pos;
            let Some(op) = self
                .peek()
                .filter(|token| token.kind == TokenKind::Op && operators.contains(&token.text.as_str()))
                .and_then(|token| Operator::from_token(&token.text))
            else {
                break;
            };
            self.pos += 1;
            self.extend_chain()?;
            let Some(right) = operand(self)? else {
                self.pos = before;
                break;
            };
            let expr = Expr::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
            left = self.located(start, expr);
        }
        self.links = links;
        Ok(Some(left))
    }

    fn factor(&mut self) -> PResult<ExprLoc> {
        let start = self.pos;
        let op = match self.peek() {
            Some(token) if token.is_op("+") => UnaryOperator::UAdd,
            Some(token) if token.is_op("-") => UnaryOperator::USub,
            Some(token) if token.is_op("~") => UnaryOperator::Invert,
            _ => return self.power(),
        };
        self.pos += 1;
        let operand = need!(self, start, self.nested(NESTED_EXPRESSIONS, Self::factor));
        let expr = Expr::UnaryOp {
            op,
            operand: Box::new(operand),
        };
        Ok(Some(self.located(start, expr)))
    }

    fn power(&mut self) -> PResult<ExprLoc> {
        let start = self.pos;
        let base = need!(self, start, self.atom_expr());
        let before = self.pos;
        if !self.eat_op("**") {
            return Ok(Some(base));
        }
        let links = self.links;
        self.extend_chain()?;
        let exponent = self.factor();
        self.links = links;
        let Some(exponent) = exponent? else {
            self.pos = before;
            return Ok(Some(base));
        };
        let expr = Expr::BinOp {
            left: Box::new(base),
            op: Operator::Pow,
            right: Box::new(exponent),
        };
        Ok(Some(self.located(start, expr)))
    }

    /// `['await'] atom trailer*`
    fn atom_expr(&mut self) -> PResult<ExprLoc> {
        let start = self.pos;
        let is_await = self.eat_keyword("await");
        let atom_start = self.pos;
        let mut value = need!(self, start, self.atom());
        let links = self.links;
        loop {
            if self.peek_op("(") {
                self.extend_chain()?;
                let Some(args) = self.call_arguments()? else {
                    break;
                };
                rewrite::check_call_args(&args, self.range_from(atom_start))?;
                let expr = Expr::Call {
                    func: Box::new(value),
                    args,
                };
                value = self.located(atom_start, expr);
            } else if self.peek_op("[") {
                self.extend_chain()?;
                let Some(slice) = self.subscription()? else {
                    break;
                };
                let expr = Expr::Subscript {
                    value: Box::new(value),
                    slice: Box::new(slice),
                    ctx: ExprContext::Load,
                };
                value = self.located(atom_start, expr);
            } else if self.peek_op(".") {
                self.extend_chain()?;
                let dot = self.pos;
                self.pos += 1;
                let Some(attr) = self.name() else {
                    self.pos = dot;
                    break;
                };
                let expr = Expr::Attribute {
                    value: Box::new(value),
                    attr: attr.name,
                    ctx: ExprContext::Load,
                };
                value = self.located(atom_start, expr);
            } else {
                break;
            }
        }
        self.links = links;
        if is_await {
            return Ok(Some(self.located(start, Expr::Await(Box::new(value)))));
        }
        Ok(Some(value))
    }

    fn call_arguments(&mut self) -> PResult<Vec<Argument>> {
        self.nested(NESTED_EXPRESSIONS, |parser| {
            let start = parser.pos;
            need_op!(parser, start, "(");
            let args = if parser.peek_op(")") {
                Vec::new()
            } else {
                need!(parser, start, parser.arglist())
            };
            need_op!(parser, start, ")");
            Ok(Some(args))
        })
    }

    fn subscription(&mut self) -> PResult<ExprLoc> {
        self.nested(NESTED_EXPRESSIONS, |parser| {
            let start = parser.pos;
            need_op!(parser, start, "[");
            let inner = parser.pos;
            let first = need!(parser, start, parser.subscript());
            let mut items = vec![first];
            let trailing_comma = parser.sequence_tail(&mut items, Self::subscript)?;
            need_op!(parser, start, "]");
            if items.len() == 1 && !trailing_comma {
                return Ok(items.pop());
            }
            let elts = Expr::Tuple {
                elts: items,
                ctx: ExprContext::Load,
            };
            Ok(Some(ExprLoc::new(parser.range_from(inner), elts)))
        })
    }

    /// `test | [test] ':' [test] [':' [test]]`
    fn subscript(&mut self) -> PResult<ExprLoc> {
        let start = self.pos;
        let lower = self.test()?;
        if !self.eat_op(":") {
            return Ok(lower);
        }
        let upper = self.test()?;
        let step = if self.eat_op(":") { self.test()? } else { None };
        let expr = Expr::Slice {
            lower: lower.map(Box::new),
            upper: upper.map(Box::new),
            step: step.map(Box::new),
        };
        Ok(Some(self.located(start, expr)))
    }

    fn atom(&mut self) -> PResult<ExprLoc> {
        let rules: [Rule<'a, ExprLoc>; 7] = [
            Self::paren_atom,
            Self::list_atom,
            Self::brace_atom,
            Self::name_atom,
            Self::number_atom,
            Self::string_atom,
            Self::constant_atom,
        ];
        self.first_of(&rules)
    }

    fn name_atom(&mut self) -> PResult<ExprLoc> {
        Ok(self.name().map(|name| {
            ExprLoc::new(
                name.position,
                Expr::Name {
                    id: name.name,
                    ctx: ExprContext::Load,
                },
            )
        }))
    }

    fn constant_atom(&mut self) -> PResult<ExprLoc> {
        let Some(token) = self.peek() else {
            return Ok(None);
        };
        let literal = match (token.kind, token.text.as_str()) {
            (TokenKind::Keyword, "None") => Literal::None,
            (TokenKind::Keyword, "True") => Literal::Bool(true),
            (TokenKind::Keyword, "False") => Literal::Bool(false),
            (TokenKind::Op, "...") => Literal::Ellipsis,
            _ => return Ok(None),
        };
        self.pos += 1;
        Ok(Some(ExprLoc::new(token.range(), Expr::Literal(literal))))
    }

    /// `'(' [yield_expr | testlist_comp] ')'`
    pub(super) fn paren_atom(&mut self) -> PResult<ExprLoc> {
        if !self.peek_op("(") {
            return Ok(None);
        }
        self.nested(NESTED_EXPRESSIONS, |parser| {
            let start = parser.pos;
            parser.pos += 1;
            if parser.eat_op(")") {
                let empty = Expr::Tuple {
                    elts: Vec::new(),
                    ctx: ExprContext::Load,
                };
                return Ok(Some(parser.located(start, empty)));
            }
            if let Some(value) = parser.yield_expr()? {
                need_op!(parser, start, ")");
                return Ok(Some(value));
            }
            let display = need!(parser, start, parser.testlist_comp());
            need_op!(parser, start, ")");
            Ok(Some(match display {
                Display::Single(value) => value,
                Display::Items(elts) => parser.located(
                    start,
                    Expr::Tuple {
                        elts,
                        ctx: ExprContext::Load,
                    },
                ),
                Display::Comprehension(elt, generators) => {
                    parser.comprehension(start, ComprehensionKind::Generator(elt), generators)
                }
            }))
        })
    }

    fn list_atom(&mut self) -> PResult<ExprLoc> {
        if !self.peek_op("[") {
            return Ok(None);
        }
        self.nested(NESTED_EXPRESSIONS, |parser| {
            let start = parser.pos;
            parser.pos += 1;
            let display = if parser.peek_op("]") {
                Display::Items(Vec::new())
            } else {
                need!(parser, start, parser.testlist_comp())
            };
            need_op!(parser, start, "]");
            let elts = match display {
                Display::Single(value) => vec![value],
                Display::Items(elts) => elts,
                Display::Comprehension(elt, generators) => {
                    return Ok(Some(parser.comprehension(start, ComprehensionKind::List(elt), generators)));
                }
            };
            let list = Expr::List {
                elts,
                ctx: ExprContext::Load,
            };
            Ok(Some(parser.located(start, list)))
        })
    }

    fn testlist_comp(&mut self) -> PResult<Display> {
        let start = self.pos;
        let first = need!(self, start, self.star_or_namedexpr());
        if self.at_comp_for() {
            if matches!(first.expr, Expr::Starred { .. }) {
                return Err(CompileError::syntax(UNPACKING_IN_COMPREHENSION, first.position));
            }
            let generators = need!(self, start, self.comp_for());
            return Ok(Some(Display::Comprehension(first, generators)));
        }
        let mut items = vec![first];
        let trailing_comma = self.sequence_tail(&mut items, Self::star_or_namedexpr)?;
        if items.len() == 1 && !trailing_comma {
            return Ok(items.pop().map(Display::Single));
        }
        Ok(Some(Display::Items(items)))
    }

    /// Dict and set displays and comprehensions.
    fn brace_atom(&mut self) -> PResult<ExprLoc> {
        if !self.peek_op("{") {
            return Ok(None);
        }
        self.nested(NESTED_EXPRESSIONS, |parser| {
            let start = parser.pos;
            parser.pos += 1;
            if parser.eat_op("}") {
                let empty = Expr::Dict {
                    items: Vec::new(),
                    ctx: ExprContext::Load,
                };
                return Ok(Some(parser.located(start, empty)));
            }
            let expr = match need!(parser, start, parser.brace_item()) {
                BraceItem::Dict(DictItem::Pair { key, value }) if parser.at_comp_for() => {
                    let generators = need!(parser, start, parser.comp_for());
                    need_op!(parser, start, "}");
                    let kind = ComprehensionKind::Dict { key, value };
                    return Ok(Some(parser.comprehension(start, kind, generators)));
                }
                BraceItem::Dict(first) => {
                    let mut items = vec![first];
                    while parser.eat_op(",") {
                        if parser.peek_op("}") {
                            break;
                        }
                        match need!(parser, start, parser.brace_item()) {
                            BraceItem::Dict(item) => items.push(item),
                            BraceItem::Set(_) => return Ok(parser.reset(start)),
                        }
                    }
                    Expr::Dict {
                        items,
                        ctx: ExprContext::Load,
                    }
                }
                BraceItem::Set(first) if parser.at_comp_for() => {
                    if matches!(first.expr, Expr::Starred { .. }) {
                        return Err(CompileError::syntax(UNPACKING_IN_COMPREHENSION, first.position));
                    }
                    let generators = need!(parser, start, parser.comp_for());
                    need_op!(parser, start, "}");
                    return Ok(Some(parser.comprehension(start, ComprehensionKind::Set(first), generators)));
                }
                BraceItem::Set(first) => {
                    let mut items = vec![first];
                    parser.sequence_tail(&mut items, Self::star_or_test)?;
                    Expr::Set(items)
                }
            };
            need_op!(parser, start, "}");
            Ok(Some(parser.located(start, expr)))
        })
    }

    fn brace_item(&mut self) -> PResult<BraceItem> {
        let start = self.pos;
        if self.eat_op("**") {
            let mapping = need!(self, start, self.expr());
            return Ok(Some(BraceItem::Dict(DictItem::Unpack(mapping))));
        }
        if self.peek_op("*") {
            return Ok(self.star_expr()?.map(BraceItem::Set));
        }
        let key = need!(self, start, self.test());
        if !self.eat_op(":") {
            return Ok(Some(BraceItem::Set(key)));
        }
        let value = need!(self, start, self.test());
        Ok(Some(BraceItem::Dict(DictItem::Pair { key, value })))
    }

    /// Parses `(',' element)*` after the first element, returning whether the
    /// sequence ended with a dangling comma.
    fn sequence_tail(&mut self, items: &mut Vec<ExprLoc>, element: Rule<'a, ExprLoc>) -> Result<bool, CompileError> {
        let mut trailing_comma = false;
        while self.eat_op(",") {
            match element(self)? {
                Some(item) => {
                    items.push(item);
                    trailing_comma = false;
                }
                None => {
                    trailing_comma = true;
                    break;
                }
            }
        }
        Ok(trailing_comma)
    }

    fn sequence(&mut self, element: Rule<'a, ExprLoc>) -> PResult<(Vec<ExprLoc>, bool)> {
        let start = self.pos;
        let mut items = vec![need!(self, start, element(self))];
        let trailing_comma = self.sequence_tail(&mut items, element)?;
        Ok(Some((items, trailing_comma)))
    }

    /// A comma-separated sequence; more than one item or a trailing comma makes a tuple.
    fn sequence_expr(&mut self, element: Rule<'a, ExprLoc>) -> PResult<ExprLoc> {
        let start = self.pos;
        let (mut items, trailing_comma) = need!(self, start, self.sequence(element));
        if items.len() == 1 && !trailing_comma {
            return Ok(items.pop());
        }
        let tuple = Expr::Tuple {
            elts: items,
            ctx: ExprContext::Load,
        };
        Ok(Some(self.located(start, tuple)))
    }

    pub(super) fn exprlist_items(&mut self) -> PResult<(Vec<ExprLoc>, bool)> {
        self.sequence(Self::star_or_expr)
    }

    pub(super) fn exprlist(&mut self) -> PResult<ExprLoc> {
        self.sequence_expr(Self::star_or_expr)
    }

    pub(super) fn testlist(&mut self) -> PResult<ExprLoc> {
        self.sequence_expr(Self::test)
    }

    pub(super) fn testlist_star_expr(&mut self) -> PResult<ExprLoc> {
        self.sequence_expr(Self::star_or_test)
    }

    /// Right-hand side of an assignment: a yield expression or a tuple.
    pub(super) fn assignment_value(&mut self) -> PResult<ExprLoc> {
        if self.peek_keyword("yield") {
            return self.yield_expr();
        }
        self.testlist_star_expr()
    }

    pub(super) fn yield_expr(&mut self) -> PResult<ExprLoc> {
        let start = self.pos;
        need_kw!(self, start, "yield");
        if self.eat_keyword("from") {
            let value = need!(self, start, self.test());
            return Ok(Some(self.located(start, Expr::YieldFrom(Box::new(value)))));
        }
        let value = self.testlist_star_expr()?;
        Ok(Some(self.located(start, Expr::Yield(value.map(Box::new)))))
    }

    /// Call arguments up to, not including, the closing parenthesis.
    pub(super) fn arglist(&mut self) -> PResult<Vec<Argument>> {
        let start = self.pos;
        let mut args = Vec::new();
        let mut bare_generator = None;
        while !self.peek_op(")") {
            let (arg, is_bare_generator) = need!(self, start, self.argument());
            if is_bare_generator && let Argument::Positional(value) = &arg {
                bare_generator = Some(value.position);
            }
            args.push(arg);
            if !self.eat_op(",") {
                break;
            }
        }
        if let Some(position) = bare_generator
            && args.len() > 1
        {
            return Err(CompileError::syntax(
                "Generator expression must be parenthesized",
                position,
            ));
        }
        Ok(Some(args))
    }

    /// One argument, flagged when it is an unparenthesized generator expression.
    fn argument(&mut self) -> PResult<(Argument, bool)> {
        let start = self.pos;
        if self.eat_op("*") {
            let value = need!(self, start, self.test());
            return Ok(Some((Argument::Starred(value), false)));
        }
        if self.eat_op("**") {
            let value = need!(self, start, self.test());
            return Ok(Some((Argument::DoubleStarred(value), false)));
        }
        let is_keyword = self.peek().is_some_and(|token| token.kind == TokenKind::Name)
            && self.peek_nth(1).is_some_and(|token| token.is_op("="));
        if is_keyword {
            let Some(name) = self.name() else {
                return Ok(None);
            };
            self.pos += 1;
            let value = need!(self, start, self.test());
            return Ok(Some((Argument::Keyword { name, value }, false)));
        }
        let value = need!(self, start, self.namedexpr_test());
        if !self.at_comp_for() {
            return Ok(Some((Argument::Positional(value), false)));
        }
        let generators = need!(self, start, self.comp_for());
        let generator = self.comprehension(start, ComprehensionKind::Generator(value), generators);
        Ok(Some((Argument::Positional(generator), true)))
    }

    fn at_comp_for(&mut self) -> bool {
        self.peek_keyword("for")
            || (self.peek_keyword("async") && self.peek_nth(1).is_some_and(|token| token.is_keyword("for")))
    }

    /// One or more `['async'] 'for' exprlist 'in' or_test ('if' test_nocond)*` clauses.
    fn comp_for(&mut self) -> PResult<Vec<Comprehension>> {
        let start = self.pos;
        let mut generators = Vec::new();
        while self.at_comp_for() {
            let is_async = self.eat_keyword("async");
            need_kw!(self, start, "for");
            let target = rewrite::as_store(need!(self, start, self.exprlist()))?;
            need_kw!(self, start, "in");
            let iter = need!(self, start, self.or_test());
            let mut ifs = Vec::new();
            while self.eat_keyword("if") {
                ifs.push(need!(self, start, self.test_nocond()));
            }
            generators.push(Comprehension {
                target,
                iter,
                ifs,
                is_async,
            });
        }
        if generators.is_empty() {
            return Ok(None);
        }
        Ok(Some(generators))
    }

    fn comprehension(&mut self, start: usize, kind: ComprehensionKind, generators: Vec<Comprehension>) -> ExprLoc {
        let scope = self.next_scope_key();
        let comprehension = ComprehensionExpr {
            kind,
            generators,
            scope,
        };
        self.located(start, Expr::Comprehension(Box::new(comprehension)))
    }
}
