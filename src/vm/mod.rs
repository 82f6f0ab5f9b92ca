//! The stack-based bytecode interpreter.
//!
//! A `run()` loop steps one instruction at a time, checks the GC threshold, and reports a
//! traceback on error. Opcode handlers are split one file per instruction category under
//! `dispatch/`. Trace-mode diagnostics are `log::trace!` calls gated behind the `log_gc`
//! feature rather than a hand-rolled enum the CLI threads through by hand.

pub mod dispatch;

use crate::chunk::Chunk;
use crate::error::{RuntimeError, RuntimeErrorKind, TraceFrame};
use crate::gc::Heap;
use crate::object::{Closure, NativeFn, NativeFnPtr, Obj, StringRef, UpvalueRef};
use crate::opcode::OpCode;
use crate::table::Table;
use crate::value::Value;

const FRAMES_MAX: usize = 256;

pub struct CallFrame {
    pub closure: crate::object::ClosureRef,
    pub ip: usize,
    pub base: usize,
}

impl CallFrame {
    fn chunk(&self) -> &Chunk {
        unsafe { &self.closure.as_ref().data.function.as_ref().data.chunk }
    }
}

pub struct Vm {
    frames: Vec<CallFrame>,
    stack: Vec<Value>,
    globals: Table,
    open_upvalues: Vec<UpvalueRef>,
    heap: Heap,
    init_string: StringRef,
}

impl Vm {
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let init_string = heap.intern("init");
        let mut vm = Vm {
            frames: Vec::new(),
            stack: Vec::with_capacity(256),
            globals: Table::new(),
            open_upvalues: Vec::new(),
            heap,
            init_string,
        };
        crate::native::install(&mut vm);
        vm
    }

    pub fn define_native(&mut self, name: &'static str, arity: u8, func: NativeFnPtr) {
        let interned = self.heap.intern(name);
        let native = self.heap.alloc_native(NativeFn { name, arity, func });
        self.globals.set(interned, Value::Obj(Obj::Native(native)));
    }

    /// Compiles and runs a whole program, top to bottom.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = crate::compiler::Compiler::compile(source, &mut self.heap)
            .map_err(InterpretError::Compile)?;
        self.heap.enabled = true;
        let closure = self.heap.alloc_closure(Closure { function, upvalues: Vec::new() });
        self.push(Value::Obj(Obj::Closure(closure)));
        self.frames.push(CallFrame { closure, ip: 0, base: 0 });
        let result = self.run();
        if result.is_err() {
            // A runtime error aborts mid-chunk with frames/stack still holding whatever was
            // live at the point of failure. The same `Vm` runs the next REPL line, so that
            // residue has to be cleared here rather than left for the next `interpret()` call
            // to push a fresh frame on top of.
            self.frames.clear();
            self.stack.clear();
        }
        result.map_err(InterpretError::Runtime)
    }

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            let instruction = self.read_byte();
            let op = OpCode::decode(instruction);

            if self.heap.should_collect() {
                self.collect_garbage();
            }

            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => self.handle_get_local()?,
                OpCode::SetLocal => self.handle_set_local()?,
                OpCode::GetGlobal => self.handle_get_global()?,
                OpCode::DefineGlobal => self.handle_define_global()?,
                OpCode::SetGlobal => self.handle_set_global()?,
                OpCode::GetUpvalue => self.handle_get_upvalue()?,
                OpCode::SetUpvalue => self.handle_set_upvalue()?,
                OpCode::GetProperty => self.handle_get_property()?,
                OpCode::SetProperty => self.handle_set_property()?,
                OpCode::GetSuper => self.handle_get_super()?,
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.handle_numeric_compare(|a, b| a > b)?,
                OpCode::Less => self.handle_numeric_compare(|a, b| a < b)?,
                OpCode::Add => self.handle_add()?,
                OpCode::Subtract => self.handle_binary_numeric(|a, b| a - b)?,
                OpCode::Multiply => self.handle_binary_numeric(|a, b| a * b)?,
                OpCode::Divide => self.handle_binary_numeric(|a, b| a / b)?,
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::Bool(!v.is_truthy()));
                }
                OpCode::Negate => self.handle_negate()?,
                OpCode::Print => {
                    let v = self.pop();
                    println!("{v}");
                }
                OpCode::Jump => {
                    let offset = self.read_u16();
                    self.current_frame_mut().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if !self.peek(0).is_truthy() {
                        self.current_frame_mut().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16();
                    self.current_frame_mut().ip -= offset as usize;
                }
                OpCode::Call => {
                    let arg_count = self.read_byte() as usize;
                    self.handle_call(arg_count)?;
                }
                OpCode::Invoke => {
                    let name = self.read_string_constant();
                    let arg_count = self.read_byte() as usize;
                    self.handle_invoke(name, arg_count)?;
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string_constant();
                    let arg_count = self.read_byte() as usize;
                    self.handle_super_invoke(name, arg_count)?;
                }
                OpCode::Closure => self.handle_closure()?,
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("Return always has a frame to pop");
                    self.close_upvalues(frame.base);
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.base);
                    self.push(result);
                }
                OpCode::Class => self.handle_class()?,
                OpCode::Inherit => self.handle_inherit()?,
                OpCode::Method => self.handle_method()?,
            }
        }
    }

    // ---- stack / frame plumbing -----------------------------------------

    fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("run() never executes with an empty frame stack")
    }

    fn current_frame(&self) -> &CallFrame {
        self.frames.last().expect("run() never executes with an empty frame stack")
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.current_frame_mut();
        let byte = frame.chunk().code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte();
        self.current_frame().chunk().constants[idx as usize]
    }

    fn read_string_constant(&mut self) -> StringRef {
        match self.read_constant() {
            Value::Obj(Obj::String(s)) => s,
            _ => unreachable!("compiler only ever emits string constants for name operands"),
        }
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> Value {
        self.stack.pop().expect("compiler-emitted bytecode keeps the stack balanced")
    }

    pub(crate) fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    pub(crate) fn intern(&mut self, s: &str) -> StringRef {
        self.heap.intern(s)
    }

    pub(crate) fn runtime_error(&self, kind: RuntimeErrorKind) -> RuntimeError {
        let mut frames = Vec::with_capacity(self.frames.len());
        for frame in self.frames.iter().rev() {
            let chunk = frame.chunk();
            let line = chunk.line_at(frame.ip.saturating_sub(1));
            let name = unsafe {
                match frame.closure.as_ref().data.function.as_ref().data.name {
                    Some(n) => n.as_ref().data.data.clone(),
                    None => String::new(),
                }
            };
            frames.push(TraceFrame { name, line });
        }
        RuntimeError { kind, frames }
    }

    // ---- garbage collection roots ----------------------------------------

    fn collect_garbage(&mut self) {
        let stack_values = self.stack.clone();
        let frame_closures: Vec<_> = self.frames.iter().map(|f| f.closure).collect();
        let open_upvalues = self.open_upvalues.clone();
        let global_entries: Vec<_> = self.globals.iter().collect();
        let init_string = self.init_string;
        self.heap.collect_garbage(|heap| {
            for v in &stack_values {
                heap.mark_value(*v);
            }
            for c in &frame_closures {
                heap.mark_object(Obj::Closure(*c));
            }
            for u in &open_upvalues {
                heap.mark_object(Obj::Upvalue(*u));
            }
            for (k, v) in &global_entries {
                heap.mark_object(Obj::String(*k));
                heap.mark_value(*v);
            }
            heap.mark_object(Obj::String(init_string));
        });
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

#[derive(Debug)]
pub enum InterpretError {
    Compile(Vec<crate::error::CompileError>),
    Runtime(RuntimeError),
}

impl std::fmt::Display for InterpretError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpretError::Compile(errs) => {
                for e in errs {
                    writeln!(f, "{e}")?;
                }
                Ok(())
            }
            InterpretError::Runtime(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for InterpretError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_termination_leaves_stack_and_frames_empty() {
        let mut vm = Vm::new();
        vm.interpret("var a = 1; { var b = 2; print a + b; } fun f(x) { return x; } print f(3);").unwrap();
        assert!(vm.stack.is_empty());
        assert!(vm.frames.is_empty());
    }

    #[test]
    fn call_sequence_restores_stack_depth() {
        let mut vm = Vm::new();
        vm.interpret(
            r#"
            fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }
            var before = 1;
            print fib(10);
            "#,
        )
        .unwrap();
        assert!(vm.stack.is_empty());
        assert!(vm.frames.is_empty());
    }

    #[test]
    fn runtime_error_reports_operand_type_and_line() {
        let mut vm = Vm::new();
        let err = vm.interpret("var a; a + 1;").unwrap_err();
        match err {
            InterpretError::Runtime(e) => {
                assert!(e.kind.to_string().contains("Operands must be"));
                assert_eq!(e.frames.last().map(|f| f.line), Some(1));
            }
            other => panic!("expected a runtime error, got {other:?}"),
        }
    }

    #[test]
    fn compile_error_never_invokes_the_vm() {
        let mut vm = Vm::new();
        let err = vm.interpret("var;").unwrap_err();
        assert!(matches!(err, InterpretError::Compile(_)));
        assert!(vm.stack.is_empty());
        assert!(vm.frames.is_empty());
    }

    #[test]
    fn a_runtime_error_leaves_no_residue_for_the_next_interpret_call() {
        // One Vm lives across a whole REPL session, so a runtime error on one line must not
        // leave stale frames/stack entries for the next line's `interpret()` call to collide
        // with.
        let mut vm = Vm::new();
        assert!(vm.interpret("var a; a + 1;").is_err());
        assert!(vm.stack.is_empty());
        assert!(vm.frames.is_empty());

        vm.interpret("var x = 1; fun f(n) { return n + 1; } print f(x);").unwrap();
        assert!(vm.stack.is_empty());
        assert!(vm.frames.is_empty());
    }
}
