//! Builder for emitting instructions during compilation and assembling them
//! into a [`CodeObject`].
//!
//! `CodeBuilder` keeps instructions symbolic until the end: jumps refer to
//! [`Label`]s, constants and names are indices into tables owned by the
//! builder. [`CodeBuilder::assemble`] sizes `EXTENDED_ARG` prefixes, resolves
//! labels to byte offsets, builds the line-number table and computes the
//! maximum stack depth.

use ahash::{AHashMap, RandomState};
use indexmap::IndexSet;
use num_bigint::BigInt;
use tracing::trace;

use super::{
    code::{CodeFlags, CodeObject, Constant},
    instr::{Arg, Instr, Label},
    op::Opcode,
};
use crate::error::CompileError;

/// Upper bound on stack-depth walk steps; a well-formed stream never gets near it.
const MAX_DEPTH_WALK_STEPS: usize = 1 << 22;

/// Metadata of the code object being built, supplied at assembly.
#[derive(Debug, Clone, Default)]
pub struct CodeMeta {
    pub name: String,
    pub filename: String,
    pub argcount: u32,
    pub kwonlyargcount: u32,
    pub flags: CodeFlags,
    pub firstlineno: u32,
}

/// Builder for one code object.
///
/// # Usage
///
/// ```ignore
/// let mut builder = CodeBuilder::new();
/// builder.set_line(1);
/// let end = builder.new_label();
/// builder.load_const(Constant::Bool(true));
/// builder.emit_jump(Opcode::PopJumpIfFalse, end);
/// builder.bind_label(end)?;
/// builder.load_const(Constant::None);
/// builder.emit(Opcode::ReturnValue);
/// let code = builder.assemble(meta)?;
/// ```
#[derive(Debug, Default)]
pub struct CodeBuilder {
    instructions: Vec<Instr>,

    /// Instruction index each label is bound to; `len()` binds past the end.
    labels: Vec<Option<usize>>,

    constants: Vec<Constant>,
    constant_index: AHashMap<ConstKey, u32>,

    names: IndexSet<String, RandomState>,
    varnames: IndexSet<String, RandomState>,
    cellvars: Vec<String>,
    freevars: Vec<String>,

    /// Line attached to subsequently emitted instructions.
    current_line: u32,
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_line(&mut self, line: u32) {
        if line > 0 {
            self.current_line = line;
        }
    }

    #[must_use]
    pub fn current_line(&self) -> u32 {
        self.current_line
    }

    pub fn push(&mut self, instr: Instr) {
        let line = if instr.line == 0 { self.current_line } else { instr.line };
        self.instructions.push(instr.at_line(line));
    }

    pub fn emit(&mut self, op: Opcode) {
        self.push(Instr::new(op));
    }

    pub fn emit_arg(&mut self, op: Opcode, arg: u32) {
        self.push(Instr::with_arg(op, arg));
    }

    pub fn emit_jump(&mut self, op: Opcode, label: Label) {
        self.push(Instr::jump(op, label));
    }

    /// Emits a `BUILD_*`-style instruction taking an element count.
    pub fn emit_build(&mut self, op: Opcode, count: usize) {
        self.emit_arg(op, count_arg(count));
    }

    /// Emits a call-family instruction with its argument count.
    pub fn emit_call(&mut self, op: Opcode, argc: usize) {
        self.emit_arg(op, count_arg(argc));
    }

    /// Adds `value` to the constant pool and emits `LOAD_CONST`.
    pub fn load_const(&mut self, value: Constant) {
        let index = self.add_const(value);
        self.push(Instr {
            op: Opcode::LoadConst,
            arg: Arg::Const(index),
            line: 0,
        });
    }

    /// Adds a constant, reusing an equal entry of the same type.
    ///
    /// Code objects are never merged.
    pub fn add_const(&mut self, value: Constant) -> u32 {
        let key = ConstKey::of(&value);
        if let Some(index) = key.as_ref().and_then(|key| self.constant_index.get(key)) {
            return *index;
        }
        let index = count_arg(self.constants.len());
        self.constants.push(value);
        if let Some(key) = key {
            self.constant_index.insert(key, index);
        }
        index
    }

    /// Emits an instruction whose operand indexes `co_names`.
    pub fn emit_name(&mut self, op: Opcode, name: &str) {
        let index = self.add_name(name);
        self.push(Instr {
            op,
            arg: Arg::Name(index),
            line: 0,
        });
    }

    pub fn add_name(&mut self, name: &str) -> u32 {
        count_arg(self.names.insert_full(name.to_owned()).0)
    }

    /// Emits an instruction whose operand indexes `co_varnames`.
    pub fn emit_local(&mut self, op: Opcode, name: &str) {
        let index = self.add_varname(name);
        self.push(Instr {
            op,
            arg: Arg::Local(index),
            line: 0,
        });
    }

    pub fn add_varname(&mut self, name: &str) -> u32 {
        count_arg(self.varnames.insert_full(name.to_owned()).0)
    }

    /// Emits an instruction whose operand indexes cells followed by frees.
    pub fn emit_deref(&mut self, op: Opcode, index: u32) {
        self.push(Instr {
            op,
            arg: Arg::Deref(index),
            line: 0,
        });
    }

    pub fn set_cellvars(&mut self, cellvars: Vec<String>) {
        self.cellvars = cellvars;
    }

    pub fn set_freevars(&mut self, freevars: Vec<String>) {
        self.freevars = freevars;
    }

    /// Deref index of a cell variable.
    #[must_use]
    pub fn cell_index(&self, name: &str) -> Option<u32> {
        self.cellvars.iter().position(|cell| cell == name).map(count_arg)
    }

    /// Deref index of a free variable; frees are numbered after cells.
    #[must_use]
    pub fn free_index(&self, name: &str) -> Option<u32> {
        self.freevars
            .iter()
            .position(|free| free == name)
            .map(|index| count_arg(self.cellvars.len() + index))
    }

    #[must_use]
    pub fn new_label(&mut self) -> Label {
        let label = Label(count_arg(self.labels.len()));
        self.labels.push(None);
        label
    }

    /// Binds `label` to the next instruction to be emitted.
    pub fn bind_label(&mut self, label: Label) -> Result<(), CompileError> {
        let position = self.instructions.len();
        let Some(slot) = self.labels.get_mut(label.index()) else {
            return Err(CompileError::internal(format!("unknown label {}", label.index())));
        };
        if slot.is_some() {
            return Err(CompileError::internal(format!("label {} bound twice", label.index())));
        }
        *slot = Some(position);
        Ok(())
    }

    #[must_use]
    pub fn last_op(&self) -> Option<Opcode> {
        self.instructions.last().map(|instr| instr.op)
    }

    /// Whether control can run past the last instruction: the stream is empty,
    /// does not end in `RETURN_VALUE`, or a label is bound after it.
    #[must_use]
    pub fn falls_off_end(&self) -> bool {
        let end = self.instructions.len();
        self.last_op() != Some(Opcode::ReturnValue) || self.labels.iter().any(|bound| *bound == Some(end))
    }

    /// Line of the first instruction that has one.
    #[must_use]
    pub fn first_line(&self) -> Option<u32> {
        self.instructions.iter().map(|instr| instr.line).find(|line| *line > 0)
    }

    #[must_use]
    pub fn instructions(&self) -> &[Instr] {
        &self.instructions
    }

    /// Resolves labels and encodes the wordcode.
    pub fn assemble(self, meta: CodeMeta) -> Result<CodeObject, CompileError> {
        let targets = self.label_targets()?;
        let layout = self.layout(&targets)?;
        let code = self.encode(&layout);
        let lnotab = self.line_table(&layout.offsets, meta.firstlineno);
        let stacksize = self.max_stack_depth(&targets)?;

        let mut flags = meta.flags;
        if self.cellvars.is_empty() && self.freevars.is_empty() {
            flags |= CodeFlags::NOFREE;
        }
        trace!(
            name = %meta.name,
            instructions = self.instructions.len(),
            bytes = code.len(),
            stacksize,
            "assembled code object"
        );
        Ok(CodeObject {
            argcount: meta.argcount,
            kwonlyargcount: meta.kwonlyargcount,
            nlocals: count_arg(self.varnames.len()),
            stacksize,
            flags,
            code,
            consts: self.constants,
            names: self.names.into_iter().collect(),
            varnames: self.varnames.into_iter().collect(),
            freevars: self.freevars,
            cellvars: self.cellvars,
            filename: meta.filename,
            name: meta.name,
            firstlineno: meta.firstlineno,
            lnotab,
        })
    }

    /// Instruction index of every label referenced by a jump.
    fn label_targets(&self) -> Result<Vec<usize>, CompileError> {
        for instr in &self.instructions {
            if let Some(label) = instr.label() {
                match self.labels.get(label.index()) {
                    Some(Some(_)) => {}
                    _ => {
                        return Err(CompileError::internal(format!(
                            "{} refers to unbound label {}",
                            instr.op,
                            label.index()
                        )));
                    }
                }
            }
        }
        Ok(self.labels.iter().map(|bound| bound.unwrap_or(usize::MAX)).collect())
    }

    /// Iterates `EXTENDED_ARG` sizing until every jump operand fits.
    fn layout(&self, targets: &[usize]) -> Result<Layout, CompileError> {
        let count = self.instructions.len();
        let mut prefixes: Vec<u8> = self
            .instructions
            .iter()
            .map(|instr| instr.raw_arg().map_or(0, extended_arg_count))
            .collect();
        loop {
            let mut offsets = Vec::with_capacity(count + 1);
            let mut offset = 0u32;
            for &extra in &prefixes {
                offsets.push(offset);
                offset += 2 * (1 + u32::from(extra));
            }
            offsets.push(offset);

            let mut args = Vec::with_capacity(count);
            let mut grew = false;
            for (index, instr) in self.instructions.iter().enumerate() {
                let arg = match instr.label() {
                    Some(label) => {
                        let target = offsets[targets[label.index()]];
                        if instr.op.is_relative_jump() {
                            let next = offsets[index + 1];
                            target.checked_sub(next).ok_or_else(|| {
                                CompileError::internal(format!("backward relative jump in {}", instr.op))
                            })?
                        } else {
                            target
                        }
                    }
                    None => instr.raw_arg().unwrap_or(0),
                };
                let needed = extended_arg_count(arg);
                if needed > prefixes[index] {
                    prefixes[index] = needed;
                    grew = true;
                }
                args.push(arg);
            }
            if !grew {
                return Ok(Layout { offsets, prefixes, args });
            }
        }
    }

    fn encode(&self, layout: &Layout) -> Vec<u8> {
        let mut code = Vec::with_capacity(layout.offsets.last().copied().unwrap_or(0) as usize);
        for (index, instr) in self.instructions.iter().enumerate() {
            let arg = layout.args[index];
            for shift in (1..=layout.prefixes[index]).rev() {
                code.push(Opcode::ExtendedArg as u8);
                code.push(((arg >> (8 * u32::from(shift))) & 0xFF) as u8);
            }
            code.push(instr.op as u8);
            code.push(if instr.op.has_arg() { (arg & 0xFF) as u8 } else { 0 });
        }
        code
    }

    /// Builds `co_lnotab`: pairs of unsigned byte increments and signed line increments.
    fn line_table(&self, offsets: &[u32], firstlineno: u32) -> Vec<u8> {
        let mut table = Vec::new();
        let mut last_line = i64::from(firstlineno);
        let mut last_offset = 0u32;
        for (index, instr) in self.instructions.iter().enumerate() {
            let line = i64::from(instr.line);
            if instr.line == 0 || line == last_line {
                continue;
            }
            let mut byte_delta = offsets[index] - last_offset;
            let mut line_delta = line - last_line;
            while byte_delta > 255 {
                table.extend_from_slice(&[255, 0]);
                byte_delta -= 255;
            }
            while line_delta > 127 {
                table.extend_from_slice(&[byte_delta as u8, 127]);
                byte_delta = 0;
                line_delta -= 127;
            }
            while line_delta < -128 {
                table.extend_from_slice(&[byte_delta as u8, (-128i8).to_ne_bytes()[0]]);
                byte_delta = 0;
                line_delta += 128;
            }
            let signed = i8::try_from(line_delta).unwrap_or(0);
            table.extend_from_slice(&[byte_delta as u8, signed.to_ne_bytes()[0]]);
            last_line = line;
            last_offset = offsets[index];
        }
        table
    }

    /// Maximum value-stack depth over every path of the control-flow graph.
    ///
    /// Jump targets split the stream into blocks. A block's entry depth is
    /// recorded when it is first queued and only raised afterwards, so a
    /// handler queued by its `SETUP_*` keeps the deeper exceptional entry
    /// depth when the normal path falls into it.
    fn max_stack_depth(&self, targets: &[usize]) -> Result<u32, CompileError> {
        let count = self.instructions.len();
        let mut block_start = vec![false; count + 1];
        for &target in targets {
            if target <= count {
                block_start[target] = true;
            }
        }
        let mut entry: Vec<Option<i32>> = vec![None; count + 1];
        let mut pending: Vec<usize> = Vec::new();
        queue_block(&mut entry, &mut pending, 0, 0);
        let mut max_depth = 0i32;
        let mut steps = 0usize;

        while let Some(start) = pending.pop() {
            let mut depth = entry[start].unwrap_or(0);
            let mut index = start;
            while index < count {
                if index != start && block_start[index] {
                    queue_block(&mut entry, &mut pending, index, depth);
                    break;
                }
                steps += 1;
                if steps > MAX_DEPTH_WALK_STEPS {
                    return Err(CompileError::internal("stack depth analysis did not converge"));
                }

                let instr = &self.instructions[index];
                let arg = instr.raw_arg().unwrap_or(0);
                if let Some(label) = instr.label() {
                    let target_depth = depth + instr.op.stack_effect(arg, true);
                    if target_depth < 0 {
                        return Err(negative_depth(instr.op, index));
                    }
                    max_depth = max_depth.max(target_depth);
                    // the target of CONTINUE_LOOP is a loop head already walked
                    if instr.op != Opcode::ContinueLoop {
                        queue_block(&mut entry, &mut pending, targets[label.index()], target_depth);
                    }
                }
                depth += instr.op.stack_effect(arg, false);
                if depth < 0 {
                    return Err(negative_depth(instr.op, index));
                }
                max_depth = max_depth.max(depth);
                if instr.op.is_unconditional_transfer() || instr.op == Opcode::ContinueLoop {
                    break;
                }
                index += 1;
            }
        }
        Ok(u32::try_from(max_depth).unwrap_or(0))
    }
}

fn queue_block(entry: &mut [Option<i32>], pending: &mut Vec<usize>, index: usize, depth: i32) {
    let Some(slot) = entry.get_mut(index) else {
        return;
    };
    if slot.is_none_or(|known| known < depth) {
        *slot = Some(depth);
        pending.push(index);
    }
}

fn negative_depth(op: Opcode, index: usize) -> CompileError {
    CompileError::internal(format!("negative stack depth after {op} at instruction {index}"))
}

struct Layout {
    /// Byte offset of each instruction's first prefix, plus the total size.
    offsets: Vec<u32>,
    prefixes: Vec<u8>,
    args: Vec<u32>,
}

fn extended_arg_count(arg: u32) -> u8 {
    match arg {
        0..=0xFF => 0,
        0x100..=0xFFFF => 1,
        0x1_0000..=0xFF_FFFF => 2,
        _ => 3,
    }
}

/// Converts a table length or element count to an operand.
pub(crate) fn count_arg(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Hashable identity of a constant for de-duplication; distinguishes types so
/// that `1`, `1.0` and `True` stay separate entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    None,
    Bool(bool),
    Int(BigInt),
    Float(u64),
    Complex(u64, u64),
    Str(String),
    Bytes(Vec<u8>),
    Ellipsis,
    Tuple(Vec<ConstKey>),
}

impl ConstKey {
    fn of(value: &Constant) -> Option<Self> {
        Some(match value {
            Constant::None => Self::None,
            Constant::Bool(value) => Self::Bool(*value),
            Constant::Int(value) => Self::Int(value.clone()),
            Constant::Float(value) => Self::Float(value.to_bits()),
            Constant::Complex { real, imag } => Self::Complex(real.to_bits(), imag.to_bits()),
            Constant::Str(value) => Self::Str(value.clone()),
            Constant::Bytes(value) => Self::Bytes(value.clone()),
            Constant::Ellipsis => Self::Ellipsis,
            Constant::Tuple(items) => Self::Tuple(items.iter().map(Self::of).collect::<Option<_>>()?),
            Constant::Code(_) => return None,
        })
    }
}
