//! Local slots, globals, and upvalue open/close machinery.

use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::object::UpvalueState;
use crate::value::Value;
use crate::vm::Vm;

impl Vm {
    pub(in crate::vm) fn handle_get_local(&mut self) -> Result<(), RuntimeError> {
        let slot = self.read_byte() as usize;
        let base = self.current_frame().base;
        self.push(self.stack[base + slot]);
        Ok(())
    }

    pub(in crate::vm) fn handle_set_local(&mut self) -> Result<(), RuntimeError> {
        let slot = self.read_byte() as usize;
        let base = self.current_frame().base;
        self.stack[base + slot] = self.peek(0);
        Ok(())
    }

    pub(in crate::vm) fn handle_get_global(&mut self) -> Result<(), RuntimeError> {
        let name = self.read_string_constant();
        match self.globals.get(name) {
            Some(v) => {
                self.push(v);
                Ok(())
            }
            None => {
                let message = unsafe { name.as_ref().data.data.clone() };
                Err(self.runtime_error(RuntimeErrorKind::UndefinedVariable(message)))
            }
        }
    }

    pub(in crate::vm) fn handle_define_global(&mut self) -> Result<(), RuntimeError> {
        let name = self.read_string_constant();
        let value = self.peek(0);
        self.globals.set(name, value);
        self.pop();
        Ok(())
    }

    pub(in crate::vm) fn handle_set_global(&mut self) -> Result<(), RuntimeError> {
        let name = self.read_string_constant();
        let value = self.peek(0);
        if self.globals.get(name).is_none() {
            let message = unsafe { name.as_ref().data.data.clone() };
            return Err(self.runtime_error(RuntimeErrorKind::UndefinedVariable(message)));
        }
        self.globals.set(name, value);
        Ok(())
    }

    pub(in crate::vm) fn handle_get_upvalue(&mut self) -> Result<(), RuntimeError> {
        let slot = self.read_byte() as usize;
        let upvalue = unsafe { self.current_frame().closure.as_ref().data.upvalues[slot] };
        let value = match unsafe { upvalue.as_ref().data.state } {
            UpvalueState::Open(stack_index) => self.stack[stack_index],
            UpvalueState::Closed(v) => v,
        };
        self.push(value);
        Ok(())
    }

    pub(in crate::vm) fn handle_set_upvalue(&mut self) -> Result<(), RuntimeError> {
        let slot = self.read_byte() as usize;
        let mut upvalue = unsafe { self.current_frame().closure.as_ref().data.upvalues[slot] };
        let value = self.peek(0);
        unsafe {
            match upvalue.as_ref().data.state {
                UpvalueState::Open(stack_index) => self.stack[stack_index] = value,
                UpvalueState::Closed(_) => upvalue.as_mut().data.state = UpvalueState::Closed(value),
            }
        }
        Ok(())
    }

    /// Finds (or creates) the open upvalue pointing at stack slot `index`, reusing an
    /// existing one so multiple closures over the same local share state.
    pub(in crate::vm) fn capture_upvalue(&mut self, index: usize) -> crate::object::UpvalueRef {
        if let Some(existing) = self.open_upvalues.iter().find(|u| {
            matches!(unsafe { u.as_ref().data.state }, UpvalueState::Open(i) if i == index)
        }) {
            return *existing;
        }
        let created = self.heap.alloc_upvalue(index);
        self.open_upvalues.push(created);
        created
    }

    /// Closes every open upvalue pointing at or above `from`, copying the stack value into
    /// the upvalue object itself so it survives the frame popping.
    pub(in crate::vm) fn close_upvalues(&mut self, from: usize) {
        let stack = &self.stack;
        let mut still_open = Vec::new();
        for mut upvalue in self.open_upvalues.drain(..) {
            let stack_index = match unsafe { upvalue.as_ref().data.state } {
                UpvalueState::Open(i) => i,
                UpvalueState::Closed(_) => continue,
            };
            if stack_index >= from {
                let value = stack[stack_index];
                unsafe {
                    upvalue.as_mut().data.state = UpvalueState::Closed(value);
                }
            } else {
                still_open.push(upvalue);
            }
        }
        self.open_upvalues = still_open;
    }
}
