#![doc = include_str!("../../../README.md")]

pub mod bytecode;
pub mod error;
pub mod expressions;
pub mod intern;
pub mod lexer;
pub mod options;
pub mod parse;
pub mod scope;
pub mod token;

use tracing::debug;

pub use crate::{
    bytecode::{CodeFlags, CodeObject, Constant, Instruction, Opcode, compile_module},
    error::{CodeLoc, CodeRange, CompileError},
    lexer::tokenize,
    options::{CompileOptions, Mode},
    parse::{ParseResult, parse},
    scope::{ScopeKind, SymbolTable, resolve},
    token::{Token, TokenKind},
};

/// Parses, resolves and compiles an already tokenized module.
///
/// `source` is the text the tokens were produced from; it is only read to
/// attach an excerpt to syntax errors.
pub fn compile_tokens(tokens: &[Token], source: &str, options: &CompileOptions) -> Result<CodeObject, CompileError> {
    let parsed = parse(tokens, source, options)?;
    let symbols = resolve(&parsed).map_err(|err| err.with_source(&options.filename, source))?;
    let code = compile_module(&parsed.module, &symbols, &parsed.interns, options)
        .map_err(|err| err.with_source(&options.filename, source))?;
    Ok(code)
}

/// Compiles Python source text to a module code object.
///
/// ```
/// use expy::{CompileOptions, compile};
///
/// let code = compile("x = 1\n", &CompileOptions::default()).unwrap();
/// assert_eq!(code.name, "<module>");
/// assert_eq!(code.names, vec!["x"]);
/// ```
pub fn compile(source: &str, options: &CompileOptions) -> Result<CodeObject, CompileError> {
    let tokens = tokenize(source).map_err(|err| err.with_source(&options.filename, source))?;
    debug!(filename = %options.filename, tokens = tokens.len(), "tokenized source");
    compile_tokens(&tokens, source, options)
}
