//! Syntax errors from every stage, as a host sees them through `compile`.

use expy::{CompileError, CompileOptions, compile};
use pretty_assertions::assert_eq;

fn compile_error(source: &str, options: &CompileOptions) -> CompileError {
    match compile(source, options) {
        Ok(_) => panic!("expected {source:?} to fail"),
        Err(err) => err,
    }
}

fn named(filename: &str) -> CompileOptions {
    CompileOptions::default().with_filename(filename)
}

/// Line and zero-based column of an error.
fn start(err: &CompileError) -> (u32, u32) {
    let start = err.position().expect("syntax errors are positioned").start();
    (start.line, start.column)
}

#[test]
fn parse_error_carries_position_and_excerpt() {
    let err = compile_error("total = 1\nx = (1 + )\n", &named("calc.py"));
    assert!(err.is_syntax());
    assert_eq!(err.message(), "invalid syntax");
    assert_eq!(start(&err), (2, 9));
    assert!(err.excerpt().is_some_and(|excerpt| excerpt.contains("x = (1 + )")));

    let rendered = err.to_string();
    assert!(rendered.starts_with("SyntaxError: invalid syntax\n"), "got {rendered}");
    assert!(rendered.contains("File \"calc.py\", line 2, column 9"), "got {rendered}");
}

#[test]
fn lexer_error_gets_filename() {
    let err = compile_error("name = 'open\n", &named("strings.py"));
    assert_eq!(err.message(), "EOL while scanning string literal");
    assert_eq!(start(&err), (1, 7));
    assert!(err.to_string().contains("File \"strings.py\", line 1"));
}

#[test]
fn inconsistent_dedent() {
    let err = compile_error("if a:\n        b = 1\n    c = 2\n", &CompileOptions::default());
    assert_eq!(err.message(), "unindent does not match any outer indentation level");
    assert_eq!(start(&err).0, 3);
}

#[test]
fn resolver_error_gets_excerpt() {
    let err = compile_error("def f(a):\n    global a\n", &named("scope.py"));
    assert_eq!(err.message(), "name 'a' is parameter and global");
    assert!(err.excerpt().is_some());
    assert!(err.to_string().contains("File \"scope.py\""));
}

#[test]
fn continue_inside_finally_is_rejected() {
    let source = "for x in y:\n    try:\n        pass\n    finally:\n        continue\n";
    let err = compile_error(source, &named("loop.py"));
    assert_eq!(err.message(), "'continue' not supported inside 'finally' clause");
    assert_eq!(start(&err).0, 5);
    assert!(
        err.to_string()
            .starts_with("SyntaxError: 'continue' not supported inside 'finally' clause")
    );
}

#[test]
fn statements_outside_their_context() {
    let options = CompileOptions::default();
    assert_eq!(compile_error("return 1\n", &options).message(), "'return' outside function");
    assert_eq!(compile_error("break\n", &options).message(), "'break' outside loop");
    assert_eq!(
        compile_error("continue\n", &options).message(),
        "'continue' not properly in loop"
    );
    assert_eq!(compile_error("yield 1\n", &options).message(), "'yield' outside function");
    assert_eq!(
        compile_error("def f():\n    from os import *\n", &options).message(),
        "import * only allowed at module level"
    );
}

#[test]
fn too_many_starred_targets() {
    let err = compile_error("a, *b, *c = d\n", &CompileOptions::default());
    assert_eq!(err.message(), "2 starred expressions in assignment");
}

#[test]
fn nesting_limit_is_configurable() {
    let source = format!("x = {}1{}\n", "(".repeat(12), ")".repeat(12));
    assert!(compile(&source, &CompileOptions::default()).is_ok());

    let err = compile_error(&source, &CompileOptions::default().with_max_nesting_depth(10));
    assert_eq!(err.message(), "too many nested parentheses");
}

#[test]
fn recursion_limit_is_configurable() {
    let source = format!("x = {}1{}\n", "[".repeat(12), "]".repeat(12));
    assert!(compile(&source, &CompileOptions::default()).is_ok());

    let err = compile_error(&source, &CompileOptions::default().with_max_recursion_depth(8));
    assert_eq!(err.message(), "maximum recursion depth exceeded during compilation");
}

/// Compiles on a thread with a 2 MiB stack, the default for spawned threads.
fn compile_on_small_stack(source: String, options: CompileOptions) -> Result<(), CompileError> {
    std::thread::Builder::new()
        .stack_size(2 * 1024 * 1024)
        .spawn(move || compile(&source, &options).map(drop))
        .unwrap()
        .join()
        .unwrap()
}

#[test]
fn deep_parentheses_fail_on_small_stack() {
    let source = format!("x = {}1{}\n", "(".repeat(100), ")".repeat(100));
    let err = compile_on_small_stack(source, CompileOptions::default()).unwrap_err();
    assert_eq!(err.message(), "too many nested parentheses");
}

#[test]
fn long_chains_fail_on_small_stack() {
    let options = CompileOptions::default().with_max_recursion_depth(40);
    let chains = [
        format!("x = 1{}\n", " + 1".repeat(600)),
        format!("x = a{}\n", ".b".repeat(999)),
        format!("x = 2{}\n", " ** 2".repeat(999)),
        format!("x = f{}\n", "(1)".repeat(600)),
        format!("if a:\n    pass\n{}", "elif a:\n    pass\n".repeat(600)),
    ];
    for source in chains {
        let err = compile_on_small_stack(source, options.clone()).unwrap_err();
        assert_eq!(err.message(), "maximum recursion depth exceeded during compilation");
    }
}

/// The default limits stop a 600-term sum before it exhausts the stack of
/// an unoptimized build.
#[cfg(debug_assertions)]
#[test]
fn long_sum_fails_on_small_stack_with_default_limits() {
    let source = format!("x = 1{}\n", " + 1".repeat(600));
    let err = compile_on_small_stack(source, CompileOptions::default()).unwrap_err();
    assert_eq!(err.message(), "maximum recursion depth exceeded during compilation");
    assert_eq!(start(&err).0, 1);
}
