//! CPython 3.7 bytecode generation.
//!
//! # Module Structure
//!
//! - `op` - the 3.7 opcode table and stack effects
//! - `instr` - symbolic instructions and jump labels
//! - `builder` - `CodeBuilder`, the per-scope emitter and assembler
//! - `code` - the packaged `CodeObject` and its constants
//! - `compiler` - lowering of a resolved module to code objects

pub use builder::{CodeBuilder, CodeMeta};
pub use code::{CodeFlags, CodeObject, Constant, Instruction};
pub use compiler::compile_module;
pub use instr::{Arg, Instr, Label};
pub use op::{CompareOp, Opcode, format_value, make_function};

mod builder;
mod code;
mod compiler;
mod instr;
mod op;
