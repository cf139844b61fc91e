//! Symbolic instructions as emitted by the compiler, before assembly.

use super::op::Opcode;

/// A jump target inside one code builder.
///
/// Labels are created unbound and must be bound exactly once before assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub(crate) u32);

impl Label {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The operand of an instruction.
///
/// Index variants refer to the table of the same name in the code object; they
/// only differ in how they are displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arg {
    None,
    Int(u32),
    Const(u32),
    Name(u32),
    Local(u32),
    Deref(u32),
    Label(Label),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr {
    pub op: Opcode,
    pub arg: Arg,
    /// Source line, `0` when unknown.
    pub line: u32,
}

impl Instr {
    #[must_use]
    pub fn new(op: Opcode) -> Self {
        Self {
            op,
            arg: Arg::None,
            line: 0,
        }
    }

    #[must_use]
    pub fn with_arg(op: Opcode, arg: u32) -> Self {
        Self {
            op,
            arg: Arg::Int(arg),
            line: 0,
        }
    }

    #[must_use]
    pub fn jump(op: Opcode, label: Label) -> Self {
        Self {
            op,
            arg: Arg::Label(label),
            line: 0,
        }
    }

    #[must_use]
    pub fn at_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    /// The numeric operand, or `None` for label operands and argument-less ops.
    #[must_use]
    pub fn raw_arg(&self) -> Option<u32> {
        match self.arg {
            Arg::None | Arg::Label(_) => None,
            Arg::Int(value) | Arg::Const(value) | Arg::Name(value) | Arg::Local(value) | Arg::Deref(value) => {
                Some(value)
            }
        }
    }

    #[must_use]
    pub fn label(&self) -> Option<Label> {
        match self.arg {
            Arg::Label(label) => Some(label),
            _ => None,
        }
    }
}
