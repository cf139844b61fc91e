//! Call lowering.
//!
//! A call takes one of four shapes, checked in order:
//!
//! 1. `obj.method(a, b)` with only plain positional arguments uses
//!    `LOAD_METHOD` / `CALL_METHOD`, skipping the bound-method allocation.
//! 2. Any `*args` or `**kwargs` packs the positional arguments into one tuple
//!    and the keywords into one mapping for `CALL_FUNCTION_EX`. Runs of plain
//!    arguments become `BUILD_TUPLE` / `BUILD_MAP` fragments that are merged
//!    with the unpacked values.
//! 3. Keywords alone push their values and a constant tuple of their names
//!    for `CALL_FUNCTION_KW`.
//! 4. Otherwise a plain `CALL_FUNCTION`.

use smallvec::SmallVec;

use super::{Compiler, Op};
use crate::{
    bytecode::code::Constant,
    error::CompileError,
    expressions::{Argument, Expr, ExprContext, ExprLoc},
};

/// Arguments of one call, split by kind.
type ArgList<'e> = SmallVec<[&'e Argument; 8]>;

impl Compiler<'_> {
    pub(super) fn call(&mut self, func: &ExprLoc, args: &[Argument]) -> Result<(), CompileError> {
        if let Expr::Attribute {
            value,
            attr,
            ctx: ExprContext::Load,
        } = &func.expr
            && args.iter().all(|arg| matches!(arg, Argument::Positional(_)))
        {
            self.visit_expr(value)?;
            let attr = self.name_str(*attr);
            self.emit_name(Op::LoadMethod, attr);
            for arg in args {
                if let Argument::Positional(arg) = arg {
                    self.visit_expr(arg)?;
                }
            }
            self.emit_call(Op::CallMethod, args.len());
            return Ok(());
        }
        self.visit_expr(func)?;
        self.call_helper(0, args)
    }

    /// Emits the arguments and the call instruction for a callable already on
    /// the stack, preceded by `pushed` positional arguments.
    pub(super) fn call_helper(&mut self, pushed: usize, args: &[Argument]) -> Result<(), CompileError> {
        let (positional, keywords): (ArgList<'_>, ArgList<'_>) = args
            .iter()
            .partition(|arg| matches!(arg, Argument::Positional(_) | Argument::Starred(_)));
        let unpacks_mapping = keywords.iter().any(|arg| matches!(arg, Argument::DoubleStarred(_)));

        // plain positionals stay on the stack until a `*args` forces a tuple
        let mut seen = pushed;
        let mut fragments = 0;
        for arg in &positional {
            match arg {
                Argument::Starred(value) => {
                    if seen > 0 {
                        self.emit_count(Op::BuildTuple, seen);
                        seen = 0;
                        fragments += 1;
                    }
                    self.visit_expr(value)?;
                    fragments += 1;
                }
                Argument::Positional(value) => {
                    self.visit_expr(value)?;
                    seen += 1;
                }
                Argument::Keyword { .. } | Argument::DoubleStarred(_) => {}
            }
        }

        if fragments > 0 || unpacks_mapping {
            if seen > 0 {
                self.emit_count(Op::BuildTuple, seen);
                fragments += 1;
            }
            match fragments {
                0 => self.emit_count(Op::BuildTuple, 0),
                1 => {}
                _ => self.emit_count(Op::BuildTupleUnpackWithCall, fragments),
            }

            let mut run: ArgList<'_> = SmallVec::new();
            let mut mappings = 0;
            for arg in &keywords {
                match arg {
                    Argument::DoubleStarred(value) => {
                        if !run.is_empty() {
                            self.subkwargs(&run)?;
                            run.clear();
                            mappings += 1;
                        }
                        self.visit_expr(value)?;
                        mappings += 1;
                    }
                    _ => run.push(arg),
                }
            }
            if !run.is_empty() {
                self.subkwargs(&run)?;
                mappings += 1;
            }
            if mappings > 1 {
                self.emit_count(Op::BuildMapUnpackWithCall, mappings);
            }
            self.emit_arg(Op::CallFunctionEx, u32::from(mappings > 0));
        } else if !keywords.is_empty() {
            let mut names = Vec::with_capacity(keywords.len());
            for arg in &keywords {
                if let Argument::Keyword { name, value } = arg {
                    self.visit_expr(value)?;
                    names.push(Constant::Str(self.name_str(name.name).to_owned()));
                }
            }
            self.load_const(Constant::Tuple(names));
            self.emit_call(Op::CallFunctionKw, seen + keywords.len());
        } else {
            self.emit_call(Op::CallFunction, seen);
        }
        Ok(())
    }

    /// Packs a run of named keywords into one mapping fragment.
    fn subkwargs(&mut self, run: &[&Argument]) -> Result<(), CompileError> {
        let named = run.iter().filter_map(|arg| match arg {
            Argument::Keyword { name, value } => Some((name.name, value)),
            _ => None,
        });
        if run.len() > 1 {
            let mut keys = Vec::with_capacity(run.len());
            for (name, value) in named {
                self.visit_expr(value)?;
                keys.push(Constant::Str(self.name_str(name).to_owned()));
            }
            self.load_const(Constant::Tuple(keys));
            self.emit_count(Op::BuildConstKeyMap, run.len());
        } else {
            for (name, value) in named {
                self.load_const(Constant::Str(self.name_str(name).to_owned()));
                self.visit_expr(value)?;
            }
            self.emit_count(Op::BuildMap, run.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::super::tests::{compile, listing};

    /// Listing of a single expression statement, without its `POP_TOP` and the
    /// implicit return.
    fn call_listing(source: &str) -> Vec<String> {
        let mut lines = listing(&compile(source));
        lines.truncate(lines.len() - 3);
        lines
    }

    #[test]
    fn test_positional_call() {
        assert_eq!(
            call_listing("f(1, x)\n"),
            vec!["LOAD_NAME f", "LOAD_CONST 1", "LOAD_NAME x", "CALL_FUNCTION 2"]
        );
    }

    #[test]
    fn test_method_call() {
        assert_eq!(
            call_listing("o.m(1)\n"),
            vec!["LOAD_NAME o", "LOAD_METHOD m", "LOAD_CONST 1", "CALL_METHOD 1"]
        );
        // keywords fall back to an attribute load
        assert_eq!(
            call_listing("o.m(k=1)\n"),
            vec!["LOAD_NAME o", "LOAD_ATTR m", "LOAD_CONST 1", "LOAD_CONST ('k',)", "CALL_FUNCTION_KW 1"]
        );
    }

    #[test]
    fn test_keyword_call() {
        assert_eq!(
            call_listing("f(1, a=2, b=3)\n"),
            vec![
                "LOAD_NAME f",
                "LOAD_CONST 1",
                "LOAD_CONST 2",
                "LOAD_CONST 3",
                "LOAD_CONST ('a', 'b')",
                "CALL_FUNCTION_KW 3",
            ]
        );
    }

    #[test]
    fn test_mixed_unpacking_call() {
        assert_eq!(
            call_listing("f(1, *a, 2, *b, **kw)\n"),
            vec![
                "LOAD_NAME f",
                "LOAD_CONST 1",
                "BUILD_TUPLE 1",
                "LOAD_NAME a",
                "LOAD_CONST 2",
                "BUILD_TUPLE 1",
                "LOAD_NAME b",
                "BUILD_TUPLE_UNPACK_WITH_CALL 4",
                "LOAD_NAME kw",
                "CALL_FUNCTION_EX 1",
            ]
        );
    }

    #[test]
    fn test_single_star_call() {
        assert_eq!(
            call_listing("f(*a)\n"),
            vec!["LOAD_NAME f", "LOAD_NAME a", "CALL_FUNCTION_EX 0"]
        );
    }

    #[test]
    fn test_keyword_fragments_around_double_star() {
        assert_eq!(
            call_listing("f(a=1, **m, b=2, c=3)\n"),
            vec![
                "LOAD_NAME f",
                "BUILD_TUPLE 0",
                "LOAD_CONST 'a'",
                "LOAD_CONST 1",
                "BUILD_MAP 1",
                "LOAD_NAME m",
                "LOAD_CONST 2",
                "LOAD_CONST 3",
                "LOAD_CONST ('b', 'c')",
                "BUILD_CONST_KEY_MAP 2",
                "BUILD_MAP_UNPACK_WITH_CALL 3",
                "CALL_FUNCTION_EX 1",
            ]
        );
    }
}
