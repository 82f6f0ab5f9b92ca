//! Bytecode disassembler, enabled by `--mode trace` on the CLI.
//!
//! A banner line, then a fixed-width tabular dump, one row per chunk instruction.

use crate::chunk::Chunk;
use crate::object::Obj;
use crate::opcode::OpCode;
use crate::value::Value;

/// Render every instruction in `chunk` as a human-readable listing, banner included.
pub fn disassemble_chunk(chunk: &Chunk, name: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{:=^70}\n", format!(" {name} ")));
    let mut offset = 0;
    while offset < chunk.len() {
        let (line, next) = disassemble_instruction(chunk, offset);
        out.push_str(&line);
        out.push('\n');
        offset = next;
    }
    out
}

/// Render the single instruction at `offset`, returning the rendered line and the offset of
/// the next instruction.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> (String, usize) {
    let line_marker = if offset > 0 && chunk.line_at(offset) == chunk.line_at(offset - 1) {
        "   |".to_string()
    } else {
        format!("{:4}", chunk.line_at(offset))
    };

    let op = OpCode::decode(chunk.code[offset]);
    let mut next = offset + 1 + op.operand_len();

    let body = match op {
        OpCode::Constant | OpCode::GetGlobal | OpCode::DefineGlobal | OpCode::SetGlobal
        | OpCode::GetProperty | OpCode::SetProperty | OpCode::GetSuper | OpCode::Class
        | OpCode::Method => {
            let idx = chunk.code[offset + 1];
            format!("{:<16} {:4} '{}'", format!("{op:?}"), idx, describe_constant(chunk, idx))
        }
        OpCode::GetLocal | OpCode::SetLocal | OpCode::GetUpvalue | OpCode::SetUpvalue
        | OpCode::Call => {
            let slot = chunk.code[offset + 1];
            format!("{:<16} {:4}", format!("{op:?}"), slot)
        }
        OpCode::Invoke | OpCode::SuperInvoke => {
            let idx = chunk.code[offset + 1];
            let arg_count = chunk.code[offset + 2];
            format!(
                "{:<16} {:4} '{}' ({} args)",
                format!("{op:?}"),
                idx,
                describe_constant(chunk, idx),
                arg_count
            )
        }
        OpCode::Jump | OpCode::JumpIfFalse => {
            let rel = chunk.read_u16(offset + 1);
            format!("{:<16} {:4} -> {}", format!("{op:?}"), rel, offset + 3 + rel as usize)
        }
        OpCode::Loop => {
            let rel = chunk.read_u16(offset + 1);
            format!("{:<16} {:4} -> {}", format!("{op:?}"), rel, (offset + 3).saturating_sub(rel as usize))
        }
        OpCode::Closure => {
            let idx = chunk.code[offset + 1];
            let mut line = format!("{:<16} {:4} '{}'", "Closure", idx, describe_constant(chunk, idx));
            if let Some(Value::Obj(Obj::Function(f))) = chunk.constants.get(idx as usize) {
                let upvalue_count = unsafe { f.as_ref().data.upvalue_count as usize };
                for _ in 0..upvalue_count {
                    let is_local = chunk.code[next];
                    let index = chunk.code[next + 1];
                    line.push_str(&format!(
                        "\n{:4}      |   upvalue {} {}",
                        "",
                        if is_local != 0 { "local" } else { "upvalue" },
                        index
                    ));
                    next += 2;
                }
            }
            line
        }
        _ => format!("{op:?}"),
    };

    (format!("{:04} {} {}", offset, line_marker, body), next)
}

fn describe_constant(chunk: &Chunk, idx: u8) -> String {
    match chunk.constants.get(idx as usize) {
        Some(v) => format!("{v}"),
        None => "<out of range>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::OpCode;

    #[test]
    fn simple_instruction_has_no_operand_column_garbage() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Nil, 1);
        chunk.write_op(OpCode::Return, 1);
        let dump = disassemble_chunk(&chunk, "test");
        assert!(dump.contains("Nil"));
        assert!(dump.contains("Return"));
    }

    #[test]
    fn repeated_line_collapses_to_pipe() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Nil, 5);
        chunk.write_op(OpCode::Pop, 5);
        let dump = disassemble_chunk(&chunk, "test");
        assert!(dump.contains("   |"));
    }

    #[test]
    fn constant_instruction_shows_value() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Value::Number(42.0)).unwrap();
        chunk.write_op(OpCode::Constant, 1);
        chunk.write_byte(idx, 1);
        let dump = disassemble_chunk(&chunk, "test");
        assert!(dump.contains("42"));
    }

    /// Walks a chunk exactly the way `disassemble_chunk` does, but instead of rendering text,
    /// copies each instruction's raw bytes (opcode plus operands) straight out of `chunk.code`.
    /// If `disassemble_instruction`'s offset arithmetic ever skipped or double-counted a byte
    /// for some opcode (including `Closure`'s variable-length upvalue trailer), this would
    /// either drop/duplicate bytes or run past the end of the chunk.
    fn reassemble_opcodes(chunk: &Chunk) -> Vec<u8> {
        let mut out = Vec::with_capacity(chunk.len());
        let mut offset = 0;
        while offset < chunk.len() {
            let (_, next) = disassemble_instruction(chunk, offset);
            out.extend_from_slice(&chunk.code[offset..next]);
            offset = next;
        }
        out
    }

    #[test]
    fn compile_disassemble_reassemble_round_trips_byte_for_byte() {
        let mut heap = crate::gc::Heap::new();
        let source = r#"
            class Counter {
                init(start) { this.n = start; }
                next() { this.n = this.n + 1; return this.n; }
            }
            fun make(n) {
                var c = Counter(n);
                fun bump() { return c.next(); }
                return bump;
            }
            var b = make(10);
            if (b() > 0) { print b(); } else { print 0; }
            while (b() < 100) { print b(); }
        "#;
        let function = crate::compiler::Compiler::compile(source, &mut heap).expect("should compile");
        let chunk = unsafe { &function.as_ref().data.chunk };

        let reassembled = reassemble_opcodes(chunk);
        assert_eq!(reassembled, chunk.code, "opcode-only reassembly must match the original byte stream");
    }
}
