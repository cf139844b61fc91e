//! The abstract syntax tree produced by the parser.
//!
//! Expressions are wrapped in [`ExprLoc`] and statements in [`NodeLoc`] so every
//! node carries its [`CodeRange`]. Nodes that introduce a scope (functions,
//! lambdas, classes and comprehensions) carry a [`ScopeKey`] handed out by the
//! parser; the scope resolver builds its symbol table against those keys, which
//! leaves the tree itself untouched.

use num_bigint::BigInt;
use num_traits::Zero;

use crate::{error::CodeRange, intern::StringId, options::Mode};

/// Handle linking a scope-introducing node to its entry in the symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ScopeKey(u32);

impl ScopeKey {
    /// The key of the module scope.
    pub const MODULE: Self = Self(0);

    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum ExprContext {
    #[default]
    Load,
    Store,
    Del,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identifier {
    pub name: StringId,
    pub position: CodeRange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Ellipsis,
    Int(BigInt),
    Float(f64),
    /// An imaginary literal such as `2j`.
    Imaginary(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Literal {
    /// Truth value of the literal as Python would compute it.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(value) => *value,
            Self::Ellipsis => true,
            Self::Int(value) => !value.is_zero(),
            Self::Float(value) | Self::Imaginary(value) => *value != 0.0,
            Self::Str(value) => !value.is_empty(),
            Self::Bytes(value) => !value.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
    FloorDiv,
}

impl Operator {
    /// Parses a binary operator token (`+`) or an augmented assignment token (`+=`).
    #[must_use]
    pub fn from_token(text: &str) -> Option<Self> {
        let text = text.strip_suffix('=').filter(|stripped| !stripped.is_empty()).unwrap_or(text);
        Some(match text {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mult,
            "@" => Self::MatMult,
            "/" => Self::Div,
            "%" => Self::Mod,
            "**" => Self::Pow,
            "<<" => Self::LShift,
            ">>" => Self::RShift,
            "|" => Self::BitOr,
            "^" => Self::BitXor,
            "&" => Self::BitAnd,
            "//" => Self::FloorDiv,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Not,
    Invert,
    UAdd,
    USub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOperator {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

/// Conversion flag of an f-string replacement field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Conversion {
    #[default]
    None,
    Str,
    Repr,
    Ascii,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Literal(String),
    Formatted {
        value: Box<ExprLoc>,
        conversion: Conversion,
        format_spec: Option<Vec<FStringPart>>,
    },
}

/// One argument of a call or class definition, in source order.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Positional(ExprLoc),
    /// `*args`
    Starred(ExprLoc),
    Keyword { name: Identifier, value: ExprLoc },
    /// `**kwargs`
    DoubleStarred(ExprLoc),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DictItem {
    Pair { key: ExprLoc, value: ExprLoc },
    /// `**mapping`
    Unpack(ExprLoc),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: ExprLoc,
    pub iter: ExprLoc,
    pub ifs: Vec<ExprLoc>,
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComprehensionKind {
    List(ExprLoc),
    Set(ExprLoc),
    Dict { key: ExprLoc, value: ExprLoc },
    Generator(ExprLoc),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComprehensionExpr {
    pub kind: ComprehensionKind,
    pub generators: Vec<Comprehension>,
    pub scope: ScopeKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Identifier,
    pub annotation: Option<ExprLoc>,
}

/// A parameter list of a function or lambda.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    pub args: Vec<Arg>,
    /// Defaults of the trailing positional parameters.
    pub defaults: Vec<ExprLoc>,
    pub vararg: Option<Arg>,
    pub kwonlyargs: Vec<Arg>,
    /// One entry per keyword-only parameter.
    pub kw_defaults: Vec<Option<ExprLoc>>,
    pub kwarg: Option<Arg>,
}

impl Arguments {
    /// Parameters in local-slot order: positional, keyword-only, `*args`, `**kwargs`.
    pub fn slots(&self) -> impl Iterator<Item = &Arg> {
        self.args
            .iter()
            .chain(self.kwonlyargs.iter())
            .chain(self.vararg.iter())
            .chain(self.kwarg.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub args: Arguments,
    pub body: ExprLoc,
    pub scope: ScopeKey,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Name {
        id: StringId,
        ctx: ExprContext,
    },
    JoinedStr(Vec<FStringPart>),
    BoolOp {
        op: BoolOperator,
        values: Vec<ExprLoc>,
    },
    BinOp {
        left: Box<ExprLoc>,
        op: Operator,
        right: Box<ExprLoc>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<ExprLoc>,
    },
    Compare {
        left: Box<ExprLoc>,
        comparisons: Vec<(CmpOperator, ExprLoc)>,
    },
    Call {
        func: Box<ExprLoc>,
        args: Vec<Argument>,
    },
    Attribute {
        value: Box<ExprLoc>,
        attr: StringId,
        ctx: ExprContext,
    },
    Subscript {
        value: Box<ExprLoc>,
        slice: Box<ExprLoc>,
        ctx: ExprContext,
    },
    Slice {
        lower: Option<Box<ExprLoc>>,
        upper: Option<Box<ExprLoc>>,
        step: Option<Box<ExprLoc>>,
    },
    Starred {
        value: Box<ExprLoc>,
        ctx: ExprContext,
    },
    Tuple {
        elts: Vec<ExprLoc>,
        ctx: ExprContext,
    },
    List {
        elts: Vec<ExprLoc>,
        ctx: ExprContext,
    },
    Set(Vec<ExprLoc>),
    /// A dict display; in store context it is a destructuring target.
    Dict {
        items: Vec<DictItem>,
        ctx: ExprContext,
    },
    Comprehension(Box<ComprehensionExpr>),
    Lambda(Box<Lambda>),
    IfExp {
        test: Box<ExprLoc>,
        body: Box<ExprLoc>,
        orelse: Box<ExprLoc>,
    },
    Await(Box<ExprLoc>),
    Yield(Option<Box<ExprLoc>>),
    YieldFrom(Box<ExprLoc>),
    /// `target := value`
    NamedExpr {
        target: Identifier,
        value: Box<ExprLoc>,
    },
}

impl Expr {
    /// Short description used in "can't assign to ..." errors.
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Literal(_) | Self::JoinedStr(_) => "literal",
            Self::Name { .. } => "name",
            Self::BoolOp { .. } | Self::BinOp { .. } | Self::UnaryOp { .. } => "operator",
            Self::Compare { .. } => "comparison",
            Self::Call { .. } => "function call",
            Self::Attribute { .. } => "attribute",
            Self::Subscript { .. } | Self::Slice { .. } => "subscript",
            Self::Starred { .. } => "starred",
            Self::Tuple { .. } => "tuple",
            Self::List { .. } => "list",
            Self::Set(_) => "set display",
            Self::Dict { .. } => "dict display",
            Self::Comprehension(comp) => match comp.kind {
                ComprehensionKind::Generator(_) => "generator expression",
                _ => "comprehension",
            },
            Self::Lambda(_) => "lambda",
            Self::IfExp { .. } => "conditional expression",
            Self::Await(_) => "await expression",
            Self::Yield(_) | Self::YieldFrom(_) => "yield expression",
            Self::NamedExpr { .. } => "named expression",
        }
    }
}

/// An expression with its source range.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprLoc {
    pub position: CodeRange,
    pub expr: Expr,
}

impl ExprLoc {
    #[must_use]
    pub fn new(position: CodeRange, expr: Expr) -> Self {
        Self { position, expr }
    }

    /// Returns the literal if this expression is one.
    #[must_use]
    pub fn as_literal(&self) -> Option<&Literal> {
        match &self.expr {
            Expr::Literal(literal) => Some(literal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    /// Full dotted name, or `*`.
    pub name: StringId,
    pub asname: Option<StringId>,
    /// Name bound when there is no `as` clause: the first dotted component.
    pub top_level: StringId,
    pub position: CodeRange,
}

impl Alias {
    /// The name this alias binds in `import` statements.
    #[must_use]
    pub fn bound_name(&self) -> StringId {
        self.asname.unwrap_or(self.top_level)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithItem {
    pub context_expr: ExprLoc,
    pub optional_vars: Option<ExprLoc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub position: CodeRange,
    pub type_: Option<ExprLoc>,
    pub name: Option<Identifier>,
    pub body: Vec<NodeLoc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Try {
    pub body: Vec<NodeLoc>,
    pub handlers: Vec<ExceptHandler>,
    pub orelse: Vec<NodeLoc>,
    pub finalbody: Vec<NodeLoc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Identifier,
    pub args: Arguments,
    pub body: Vec<NodeLoc>,
    pub decorators: Vec<ExprLoc>,
    pub returns: Option<ExprLoc>,
    pub is_async: bool,
    pub scope: ScopeKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: Identifier,
    pub args: Vec<Argument>,
    pub body: Vec<NodeLoc>,
    pub decorators: Vec<ExprLoc>,
    pub scope: ScopeKey,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Expr(ExprLoc),
    Assign {
        targets: Vec<ExprLoc>,
        value: ExprLoc,
    },
    AugAssign {
        target: ExprLoc,
        op: Operator,
        value: ExprLoc,
    },
    AnnAssign {
        target: ExprLoc,
        annotation: ExprLoc,
        value: Option<ExprLoc>,
        /// The target is a bare name.
        simple: bool,
    },
    Delete(Vec<ExprLoc>),
    Pass,
    Break,
    Continue,
    Return(Option<ExprLoc>),
    Raise {
        exc: Option<ExprLoc>,
        cause: Option<ExprLoc>,
    },
    Assert {
        test: ExprLoc,
        msg: Option<ExprLoc>,
    },
    Global(Vec<Identifier>),
    Nonlocal(Vec<Identifier>),
    Import(Vec<Alias>),
    ImportFrom {
        module: Option<StringId>,
        names: Vec<Alias>,
        level: u32,
    },
    If {
        test: ExprLoc,
        body: Vec<NodeLoc>,
        orelse: Vec<NodeLoc>,
    },
    While {
        test: ExprLoc,
        body: Vec<NodeLoc>,
        orelse: Vec<NodeLoc>,
    },
    For {
        target: ExprLoc,
        iter: ExprLoc,
        body: Vec<NodeLoc>,
        orelse: Vec<NodeLoc>,
        is_async: bool,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<NodeLoc>,
        is_async: bool,
    },
    Try(Box<Try>),
    FunctionDef(Box<FunctionDef>),
    ClassDef(Box<ClassDef>),
}

/// A statement with its source range.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLoc {
    pub position: CodeRange,
    pub node: Node,
}

impl NodeLoc {
    #[must_use]
    pub fn new(position: CodeRange, node: Node) -> Self {
        Self { position, node }
    }
}

/// Returns the docstring of a body: a leading string-literal expression statement.
#[must_use]
pub fn docstring(body: &[NodeLoc]) -> Option<&str> {
    match body.first().map(|stmt| &stmt.node) {
        Some(Node::Expr(ExprLoc {
            expr: Expr::Literal(Literal::Str(text)),
            ..
        })) => Some(text),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub body: Vec<NodeLoc>,
    pub mode: Mode,
}
