//! Binary serialization of compiled code and compile settings with postcard.
//!
//! Hosts cache compiled modules and ship settings between processes, so both
//! must survive a round trip unchanged.

mod common;

use common::{compile_ok, find_code};
use expy::{CodeObject, CompileOptions, Constant, Mode, Token, tokenize};
use pretty_assertions::assert_eq;

#[test]
fn code_object_round_trip() {
    let source = "\
'''Module docstring.'''
import os.path as p
def scale(values, *, factor=2.5, **extra) -> list:
    base = 1j
    return [v * factor + base for v in values if v is not None]
class Point:
    x: int = 0
    def __repr__(self):
        return f'Point({self.x!r})'
data = {b'key': (1, -2, 3.0, ...)}
";
    let code = compile_ok(source);
    let bytes = postcard::to_allocvec(&code).unwrap();
    let loaded: CodeObject = postcard::from_bytes(&bytes).unwrap();
    assert_eq!(loaded, code);
    assert_eq!(loaded.instructions(), code.instructions());
    assert_eq!(loaded.disassemble(), code.disassemble());

    let comp = find_code(&loaded, "<listcomp>");
    assert_eq!(comp.freevars, vec!["base", "factor"]);
}

#[test]
fn nested_constants_round_trip() {
    let code = compile_ok("x = (1, ('a', b'b'), 1267650600228229401496703205376, -0.5, 2j, None, True, ...)\n");
    let bytes = postcard::to_allocvec(&code).unwrap();
    let loaded: CodeObject = postcard::from_bytes(&bytes).unwrap();
    let Some(Constant::Tuple(items)) = loaded.consts.first() else {
        panic!("expected a folded tuple, got {:?}", loaded.consts);
    };
    assert_eq!(items.len(), 8);
    assert_eq!(loaded.consts, code.consts);
}

#[test]
fn options_round_trip() {
    let options = CompileOptions::default()
        .with_filename("cached.py")
        .with_mode(Mode::Eval)
        .with_optimize(2)
        .with_max_nesting_depth(50);
    let bytes = postcard::to_allocvec(&options).unwrap();
    let loaded: CompileOptions = postcard::from_bytes(&bytes).unwrap();
    assert_eq!(loaded, options);
}

#[test]
fn tokens_round_trip() {
    let tokens = tokenize("if a:\n    b = 'x'\n").unwrap();
    let bytes = postcard::to_allocvec(&tokens).unwrap();
    let loaded: Vec<Token> = postcard::from_bytes(&bytes).unwrap();
    assert_eq!(loaded, tokens);
}
