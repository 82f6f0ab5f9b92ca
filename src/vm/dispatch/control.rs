//! Call mechanics: invoking closures, natives, classes (construction), and bound methods,
//! plus closure creation.

use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::object::{Closure, ClosureRef, Obj};
use crate::value::Value;
use crate::vm::{CallFrame, Vm};

const FRAMES_MAX: usize = 256;

impl Vm {
    pub(in crate::vm) fn handle_call(&mut self, arg_count: usize) -> Result<(), RuntimeError> {
        let callee = self.peek(arg_count);
        self.call_value(callee, arg_count)
    }

    pub(in crate::vm) fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<(), RuntimeError> {
        match callee {
            Value::Obj(Obj::Closure(closure)) => self.call_closure(closure, arg_count),
            Value::Obj(Obj::Native(native)) => {
                let (arity, func) = unsafe { (native.as_ref().data.arity as usize, native.as_ref().data.func) };
                if arity != arg_count {
                    return Err(self.runtime_error(RuntimeErrorKind::WrongArity { expected: arity, got: arg_count }));
                }
                let args_start = self.stack.len() - arg_count;
                let args: Vec<Value> = self.stack[args_start..].to_vec();
                let result = func(self, &args).map_err(|k| self.runtime_error(k))?;
                self.stack.truncate(args_start - 1);
                self.push(result);
                Ok(())
            }
            Value::Obj(Obj::Class(class)) => {
                let instance = self.heap.alloc_instance(class);
                let receiver_slot = self.stack.len() - arg_count - 1;
                self.stack[receiver_slot] = Value::Obj(Obj::Instance(instance));
                let init_name = self.init_string;
                let method = unsafe { class.as_ref().data.methods.get(init_name) };
                match method {
                    Some(Value::Obj(Obj::Closure(initializer))) => self.call_closure(initializer, arg_count),
                    Some(_) => unreachable!("methods table only ever stores closures"),
                    None if arg_count != 0 => {
                        Err(self.runtime_error(RuntimeErrorKind::WrongArity { expected: 0, got: arg_count }))
                    }
                    None => Ok(()),
                }
            }
            Value::Obj(Obj::BoundMethod(bound)) => {
                let (receiver, method) = unsafe { (bound.as_ref().data.receiver, bound.as_ref().data.method) };
                let receiver_slot = self.stack.len() - arg_count - 1;
                self.stack[receiver_slot] = receiver;
                self.call_closure(method, arg_count)
            }
            _ => Err(self.runtime_error(RuntimeErrorKind::NotCallable)),
        }
    }

    fn call_closure(&mut self, closure: ClosureRef, arg_count: usize) -> Result<(), RuntimeError> {
        let arity = unsafe { closure.as_ref().data.function.as_ref().data.arity as usize };
        if arity != arg_count {
            return Err(self.runtime_error(RuntimeErrorKind::WrongArity { expected: arity, got: arg_count }));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error(RuntimeErrorKind::StackOverflow));
        }
        let base = self.stack.len() - arg_count - 1;
        self.frames.push(CallFrame { closure, ip: 0, base });
        Ok(())
    }

    pub(in crate::vm) fn handle_closure(&mut self) -> Result<(), RuntimeError> {
        let function = match self.read_constant() {
            Value::Obj(Obj::Function(f)) => f,
            _ => unreachable!("Closure operand is always a function constant"),
        };
        let upvalue_count = unsafe { function.as_ref().data.upvalue_count as usize };
        let base = self.frames.last().expect("handle_closure runs inside a frame").base;
        let enclosing_closure = self.frames.last().expect("handle_closure runs inside a frame").closure;
        let mut upvalues = Vec::with_capacity(upvalue_count);
        for _ in 0..upvalue_count {
            let is_local = self.read_byte() != 0;
            let index = self.read_byte() as usize;
            if is_local {
                upvalues.push(self.capture_upvalue(base + index));
            } else {
                let upvalue = unsafe { enclosing_closure.as_ref().data.upvalues[index] };
                upvalues.push(upvalue);
            }
        }
        let closure = self.heap.alloc_closure(Closure { function, upvalues });
        self.push(Value::Obj(Obj::Closure(closure)));
        Ok(())
    }

    pub(in crate::vm) fn handle_invoke(&mut self, name: crate::object::StringRef, arg_count: usize) -> Result<(), RuntimeError> {
        let receiver = self.peek(arg_count);
        let Value::Obj(Obj::Instance(instance)) = receiver else {
            return Err(self.runtime_error(RuntimeErrorKind::OnlyInstancesHaveProperties));
        };
        if let Some(field) = unsafe { instance.as_ref().data.fields.get(name) } {
            let slot = self.stack.len() - arg_count - 1;
            self.stack[slot] = field;
            return self.call_value(field, arg_count);
        }
        let class = unsafe { instance.as_ref().data.class };
        self.invoke_from_class(class, name, arg_count)
    }

    pub(in crate::vm) fn handle_super_invoke(&mut self, name: crate::object::StringRef, arg_count: usize) -> Result<(), RuntimeError> {
        let superclass = match self.pop() {
            Value::Obj(Obj::Class(c)) => c,
            _ => unreachable!("compiler always pushes the superclass before SuperInvoke"),
        };
        self.invoke_from_class(superclass, name, arg_count)
    }
}
