//! Helpers shared by the integration tests.
#![allow(dead_code)]

use expy::{CodeObject, CompileOptions, Instruction, Opcode, compile};

/// Compiles `source` with default options, panicking on error.
pub fn compile_ok(source: &str) -> CodeObject {
    compile(source, &CompileOptions::default().with_filename("test.py"))
        .unwrap_or_else(|err| panic!("failed to compile {source:?}:\n{err}"))
}

/// `NAME arg` lines for every instruction, with constant, name, local and
/// cell operands resolved.
pub fn listing(code: &CodeObject) -> Vec<String> {
    code.instructions()
        .iter()
        .map(|instr| {
            let name: &'static str = instr.opcode.into();
            let Some(arg) = instr.arg else {
                return name.to_owned();
            };
            let index = arg as usize;
            match instr.opcode {
                Opcode::LoadConst => format!("{name} {}", code.consts[index]),
                Opcode::LoadName
                | Opcode::StoreName
                | Opcode::DeleteName
                | Opcode::LoadGlobal
                | Opcode::StoreGlobal
                | Opcode::LoadAttr
                | Opcode::StoreAttr
                | Opcode::LoadMethod
                | Opcode::ImportName
                | Opcode::ImportFrom => format!("{name} {}", code.names[index]),
                Opcode::LoadFast | Opcode::StoreFast | Opcode::DeleteFast => {
                    format!("{name} {}", code.varnames[index])
                }
                Opcode::LoadDeref | Opcode::StoreDeref | Opcode::LoadClosure | Opcode::LoadClassderef => {
                    format!("{name} {}", code.deref_name(index).unwrap_or("?"))
                }
                _ => format!("{name} {arg}"),
            }
        })
        .collect()
}

/// The first code object named `name` nested anywhere below `code`.
pub fn find_code<'c>(code: &'c CodeObject, name: &str) -> &'c CodeObject {
    fn search<'c>(code: &'c CodeObject, name: &str) -> Option<&'c CodeObject> {
        code.nested_code()
            .find_map(|nested| if nested.name == name { Some(nested) } else { search(nested, name) })
    }
    search(code, name).unwrap_or_else(|| panic!("no code object named {name}"))
}

/// Whether `run` appears as a contiguous slice of `lines`.
pub fn contains_run(lines: &[String], run: &[&str]) -> bool {
    lines.windows(run.len()).any(|window| window.iter().zip(run).all(|(line, want)| line == want))
}

/// Byte offset a jump instruction transfers to, `None` for other instructions.
pub fn jump_target(instructions: &[Instruction], index: usize, code_len: usize) -> Option<u32> {
    let instr = instructions[index];
    let arg = instr.arg?;
    if instr.opcode.is_relative_jump() {
        let next = instructions
            .get(index + 1)
            .map_or(u32::try_from(code_len).unwrap_or(u32::MAX), |next| next.offset);
        Some(next + arg)
    } else if instr.opcode.is_absolute_jump() {
        Some(arg)
    } else {
        None
    }
}
