//! Code objects: the assembled output of the compiler.

use std::{
    fmt::{self, Write as _},
    ops::{BitOr, BitOrAssign},
};

use num_bigint::BigInt;

use super::op::{CompareOp, HAVE_ARGUMENT, Opcode};

/// `co_flags` bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CodeFlags(u32);

impl CodeFlags {
    pub const OPTIMIZED: Self = Self(0x0001);
    pub const NEWLOCALS: Self = Self(0x0002);
    pub const VARARGS: Self = Self(0x0004);
    pub const VARKEYWORDS: Self = Self(0x0008);
    pub const NESTED: Self = Self(0x0010);
    pub const GENERATOR: Self = Self(0x0020);
    pub const NOFREE: Self = Self(0x0040);
    pub const COROUTINE: Self = Self(0x0080);
    pub const ASYNC_GENERATOR: Self = Self(0x0200);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CodeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CodeFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// An entry of `co_consts`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Constant {
    None,
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Complex { real: f64, imag: f64 },
    Str(String),
    Bytes(Vec<u8>),
    Ellipsis,
    Tuple(Vec<Constant>),
    Code(Box<CodeObject>),
}

impl Constant {
    /// Returns the nested code object, if any.
    #[must_use]
    pub fn as_code(&self) -> Option<&CodeObject> {
        match self {
            Self::Code(code) => Some(code),
            _ => None,
        }
    }
}

/// Python-style `repr` of a constant.
impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write_float(f, *value),
            Self::Complex { real, imag } => {
                if *real == 0.0 && real.is_sign_positive() {
                    write_complex_part(f, *imag)?;
                    f.write_str("j")
                } else {
                    f.write_str("(")?;
                    write_complex_part(f, *real)?;
                    if *imag >= 0.0 || imag.is_nan() {
                        f.write_str("+")?;
                    }
                    write_complex_part(f, *imag)?;
                    f.write_str("j)")
                }
            }
            Self::Str(value) => write_str_repr(f, value),
            Self::Bytes(value) => {
                f.write_str("b'")?;
                for byte in value {
                    match byte {
                        b'\'' => f.write_str("\\'")?,
                        b'\\' => f.write_str("\\\\")?,
                        b'\n' => f.write_str("\\n")?,
                        b'\r' => f.write_str("\\r")?,
                        b'\t' => f.write_str("\\t")?,
                        0x20..=0x7e => f.write_char(char::from(*byte))?,
                        _ => write!(f, "\\x{byte:02x}")?,
                    }
                }
                f.write_str("'")
            }
            Self::Ellipsis => f.write_str("Ellipsis"),
            Self::Tuple(items) => {
                f.write_str("(")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Self::Code(code) => write!(f, "<code object {}, line {}>", code.name, code.firstlineno),
        }
    }
}

fn write_float(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_nan() {
        f.write_str("nan")
    } else if value.is_infinite() {
        f.write_str(if value > 0.0 { "inf" } else { "-inf" })
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        write!(f, "{value:.1}")
    } else {
        write!(f, "{value}")
    }
}

/// Complex components print without a trailing `.0`.
fn write_complex_part(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        write!(f, "{value:.0}")
    } else {
        write_float(f, value)
    }
}

fn write_str_repr(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    let quote = if value.contains('\'') && !value.contains('"') { '"' } else { '\'' };
    f.write_char(quote)?;
    for c in value.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => {
                f.write_char('\\')?;
                f.write_char(c)?;
            }
            c if c.is_control() => write!(f, "\\x{:02x}", u32::from(c))?,
            c => f.write_char(c)?,
        }
    }
    f.write_char(quote)
}

/// A decoded instruction: `EXTENDED_ARG` prefixes are folded into `arg` and
/// `offset` is the position of the first prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: Opcode,
    pub arg: Option<u32>,
}

/// A CPython 3.7 code object.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CodeObject {
    pub argcount: u32,
    pub kwonlyargcount: u32,
    pub nlocals: u32,
    pub stacksize: u32,
    pub flags: CodeFlags,
    pub code: Vec<u8>,
    pub consts: Vec<Constant>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub freevars: Vec<String>,
    pub cellvars: Vec<String>,
    pub filename: String,
    pub name: String,
    pub firstlineno: u32,
    pub lnotab: Vec<u8>,
}

impl CodeObject {
    /// Decodes the wordcode. Unknown opcode bytes are skipped.
    #[must_use]
    pub fn instructions(&self) -> Vec<Instruction> {
        let mut instructions = Vec::with_capacity(self.code.len() / 2);
        let mut extended: u32 = 0;
        let mut start: Option<u32> = None;
        for (index, pair) in self.code.chunks_exact(2).enumerate() {
            let offset = u32::try_from(index * 2).unwrap_or(u32::MAX);
            let Ok(opcode) = Opcode::try_from(pair[0]) else {
                extended = 0;
                start = None;
                continue;
            };
            let arg = (extended << 8) | u32::from(pair[1]);
            if opcode == Opcode::ExtendedArg {
                extended = arg;
                start.get_or_insert(offset);
                continue;
            }
            instructions.push(Instruction {
                offset: start.take().unwrap_or(offset),
                opcode,
                arg: (pair[0] >= HAVE_ARGUMENT).then_some(arg),
            });
            extended = 0;
        }
        instructions
    }

    /// Decodes `co_lnotab` into `(offset, line)` pairs, one per line change.
    #[must_use]
    pub fn line_numbers(&self) -> Vec<(u32, u32)> {
        let mut lines = vec![(0, self.firstlineno)];
        let mut offset: u32 = 0;
        let mut line = i64::from(self.firstlineno);
        for pair in self.lnotab.chunks_exact(2) {
            let line_delta = i64::from(i8::from_ne_bytes([pair[1]]));
            if pair[0] != 0 {
                offset += u32::from(pair[0]);
            }
            line += line_delta;
            if line_delta != 0 {
                let current = u32::try_from(line).unwrap_or(0);
                match lines.last_mut() {
                    Some(last) if last.0 == offset => last.1 = current,
                    _ => lines.push((offset, current)),
                }
            }
        }
        lines
    }

    /// Code objects nested in `co_consts`.
    pub fn nested_code(&self) -> impl Iterator<Item = &Self> {
        self.consts.iter().filter_map(Constant::as_code)
    }

    /// A `dis`-style listing of this code object and every nested one.
    #[must_use]
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out);
        out
    }

    fn disassemble_into(&self, out: &mut String) {
        let lines = self.line_numbers();
        let mut next_line = lines.iter().peekable();
        for instruction in self.instructions() {
            let mut line_column = String::new();
            while let Some((offset, line)) = next_line.peek() {
                if *offset > instruction.offset {
                    break;
                }
                line_column = line.to_string();
                next_line.next();
            }
            if !line_column.is_empty() && instruction.offset > 0 {
                out.push('\n');
            }
            let name: &'static str = instruction.opcode.into();
            let _ = write!(out, "{line_column:>4} {:>6} {name:<28}", instruction.offset);
            if let Some(arg) = instruction.arg {
                let _ = write!(out, "{arg:>4}");
                let detail = self.describe_arg(instruction.opcode, arg, instruction.offset);
                if !detail.is_empty() {
                    let _ = write!(out, " ({detail})");
                }
            }
            out.push('\n');
        }
        for code in self.nested_code() {
            let _ = write!(out, "\nDisassembly of {}:\n", Constant::Code(Box::new(code.clone())));
            code.disassemble_into(out);
        }
    }

    fn describe_arg(&self, opcode: Opcode, arg: u32, offset: u32) -> String {
        let index = arg as usize;
        match opcode {
            Opcode::LoadConst => self.consts.get(index).map(ToString::to_string).unwrap_or_default(),
            Opcode::LoadName
            | Opcode::StoreName
            | Opcode::DeleteName
            | Opcode::LoadGlobal
            | Opcode::StoreGlobal
            | Opcode::DeleteGlobal
            | Opcode::LoadAttr
            | Opcode::StoreAttr
            | Opcode::DeleteAttr
            | Opcode::LoadMethod
            | Opcode::ImportName
            | Opcode::ImportFrom => self.names.get(index).cloned().unwrap_or_default(),
            Opcode::LoadFast | Opcode::StoreFast | Opcode::DeleteFast => {
                self.varnames.get(index).cloned().unwrap_or_default()
            }
            Opcode::LoadClosure
            | Opcode::LoadDeref
            | Opcode::StoreDeref
            | Opcode::DeleteDeref
            | Opcode::LoadClassderef => self.deref_name(index).unwrap_or_default().to_owned(),
            Opcode::CompareOp => u8::try_from(arg)
                .ok()
                .and_then(CompareOp::from_repr)
                .map(|op| op.to_string())
                .unwrap_or_default(),
            op if op.is_relative_jump() => {
                let width = self.instruction_width(offset);
                format!("to {}", offset + width + arg)
            }
            Opcode::FormatValue => match arg & 0x03 {
                1 => "str".to_owned(),
                2 => "repr".to_owned(),
                3 => "ascii".to_owned(),
                _ if arg & 0x04 != 0 => "with format".to_owned(),
                _ => String::new(),
            },
            _ => String::new(),
        }
    }

    /// Name behind a `*_DEREF` / `LOAD_CLOSURE` index: cells first, then frees.
    #[must_use]
    pub fn deref_name(&self, index: usize) -> Option<&str> {
        self.cellvars
            .get(index)
            .or_else(|| self.freevars.get(index.checked_sub(self.cellvars.len())?))
            .map(String::as_str)
    }

    /// Bytes occupied by the instruction starting at `offset`, prefixes included.
    fn instruction_width(&self, offset: u32) -> u32 {
        let mut width = 2;
        let mut cursor = offset as usize;
        while self.code.get(cursor) == Some(&(Opcode::ExtendedArg as u8)) {
            width += 2;
            cursor += 2;
        }
        width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_with(code: Vec<u8>, consts: Vec<Constant>) -> CodeObject {
        CodeObject {
            argcount: 0,
            kwonlyargcount: 0,
            nlocals: 0,
            stacksize: 1,
            flags: CodeFlags::NOFREE,
            code,
            consts,
            names: Vec::new(),
            varnames: Vec::new(),
            freevars: Vec::new(),
            cellvars: Vec::new(),
            filename: "<test>".to_owned(),
            name: "<module>".to_owned(),
            firstlineno: 1,
            lnotab: Vec::new(),
        }
    }

    #[test]
    fn test_instructions_fold_extended_arg() {
        let code = code_with(vec![144, 1, 100, 2, 83, 0], Vec::new());
        let instructions = code.instructions();
        assert_eq!(
            instructions,
            vec![
                Instruction {
                    offset: 0,
                    opcode: Opcode::LoadConst,
                    arg: Some(0x102)
                },
                Instruction {
                    offset: 4,
                    opcode: Opcode::ReturnValue,
                    arg: None
                },
            ]
        );
    }

    #[test]
    fn test_line_numbers() {
        let mut code = code_with(vec![100, 0, 83, 0, 100, 0, 83, 0], vec![Constant::None]);
        code.lnotab = vec![4, 2, 0, 0xff];
        assert_eq!(code.line_numbers(), vec![(0, 1), (4, 2)]);
    }

    #[test]
    fn test_constant_repr() {
        assert_eq!(Constant::Float(1.0).to_string(), "1.0");
        assert_eq!(Constant::Float(0.5).to_string(), "0.5");
        assert_eq!(Constant::Str("it's".to_owned()).to_string(), "\"it's\"");
        assert_eq!(Constant::Bytes(b"a\x00".to_vec()).to_string(), "b'a\\x00'");
        assert_eq!(Constant::Tuple(vec![Constant::Int(1.into())]).to_string(), "(1,)");
        assert_eq!(Constant::Complex { real: 0.0, imag: 2.0 }.to_string(), "2j");
    }

    #[test]
    fn test_disassemble_lists_constants() {
        let code = code_with(vec![100, 0, 83, 0], vec![Constant::None]);
        let listing = code.disassemble();
        assert!(listing.contains("LOAD_CONST"), "{listing}");
        assert!(listing.contains("(None)"), "{listing}");
        assert!(listing.contains("RETURN_VALUE"), "{listing}");
    }

    #[test]
    fn test_flags() {
        let flags = CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS;
        assert!(flags.contains(CodeFlags::NEWLOCALS));
        assert!(!flags.contains(CodeFlags::GENERATOR));
        assert_eq!(flags.bits(), 3);
    }
}
