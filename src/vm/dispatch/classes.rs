//! Classes, instances, fields, methods, and inheritance.

use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::object::{ClassRef, Obj, StringRef};
use crate::value::Value;
use crate::vm::Vm;

impl Vm {
    pub(in crate::vm) fn handle_get_property(&mut self) -> Result<(), RuntimeError> {
        let name = self.read_string_constant();
        let Value::Obj(Obj::Instance(instance)) = self.peek(0) else {
            return Err(self.runtime_error(RuntimeErrorKind::OnlyInstancesHaveProperties));
        };
        if let Some(field) = unsafe { instance.as_ref().data.fields.get(name) } {
            self.pop();
            self.push(field);
            return Ok(());
        }
        let class = unsafe { instance.as_ref().data.class };
        self.bind_method(class, name)
    }

    pub(in crate::vm) fn handle_set_property(&mut self) -> Result<(), RuntimeError> {
        let name = self.read_string_constant();
        let Value::Obj(Obj::Instance(mut instance)) = self.peek(1) else {
            return Err(self.runtime_error(RuntimeErrorKind::OnlyInstancesHaveProperties));
        };
        let value = self.peek(0);
        unsafe {
            instance.as_mut().data.fields.set(name, value);
        }
        self.pop();
        self.pop();
        self.push(value);
        Ok(())
    }

    pub(in crate::vm) fn handle_get_super(&mut self) -> Result<(), RuntimeError> {
        let name = self.read_string_constant();
        let superclass = match self.pop() {
            Value::Obj(Obj::Class(c)) => c,
            _ => unreachable!("compiler always pushes the superclass before GetSuper"),
        };
        self.bind_method(superclass, name)
    }

    pub(in crate::vm) fn handle_class(&mut self) -> Result<(), RuntimeError> {
        let name = self.read_string_constant();
        let class = self.heap.alloc_class(name);
        self.push(Value::Obj(Obj::Class(class)));
        Ok(())
    }

    pub(in crate::vm) fn handle_inherit(&mut self) -> Result<(), RuntimeError> {
        let superclass = match self.peek(1) {
            Value::Obj(Obj::Class(c)) => c,
            _ => return Err(self.runtime_error(RuntimeErrorKind::SuperclassMustBeClass)),
        };
        let mut subclass = match self.peek(0) {
            Value::Obj(Obj::Class(c)) => c,
            _ => unreachable!("compiler only emits Inherit right after a Class"),
        };
        let entries: Vec<_> = unsafe { superclass.as_ref().data.methods.iter().collect() };
        unsafe {
            for (k, v) in entries {
                subclass.as_mut().data.methods.set(k, v);
            }
        }
        self.pop(); // the subclass; the superclass stays bound to its name below the class
        Ok(())
    }

    pub(in crate::vm) fn handle_method(&mut self) -> Result<(), RuntimeError> {
        let name = self.read_string_constant();
        let method = self.peek(0);
        let mut class = match self.peek(1) {
            Value::Obj(Obj::Class(c)) => c,
            _ => unreachable!("compiler only emits Method right after a Class body's first entry"),
        };
        unsafe {
            class.as_mut().data.methods.set(name, method);
        }
        self.pop();
        Ok(())
    }

    pub(in crate::vm) fn invoke_from_class(&mut self, class: ClassRef, name: StringRef, arg_count: usize) -> Result<(), RuntimeError> {
        match unsafe { class.as_ref().data.methods.get(name) } {
            Some(Value::Obj(Obj::Closure(method))) => self.call_value(Value::Obj(Obj::Closure(method)), arg_count),
            Some(_) => unreachable!("methods table only ever stores closures"),
            None => {
                let message = unsafe { name.as_ref().data.data.clone() };
                Err(self.runtime_error(RuntimeErrorKind::UndefinedSuperMethod(message)))
            }
        }
    }

    fn bind_method(&mut self, class: ClassRef, name: StringRef) -> Result<(), RuntimeError> {
        let method = match unsafe { class.as_ref().data.methods.get(name) } {
            Some(Value::Obj(Obj::Closure(m))) => m,
            Some(_) => unreachable!("methods table only ever stores closures"),
            None => {
                let message = unsafe { name.as_ref().data.data.clone() };
                return Err(self.runtime_error(RuntimeErrorKind::UndefinedProperty(message)));
            }
        };
        let receiver = self.peek(0);
        let bound = self.heap.alloc_bound_method(receiver, method);
        self.pop();
        self.push(Value::Obj(Obj::BoundMethod(bound)));
        Ok(())
    }
}
