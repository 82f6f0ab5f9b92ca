//! Arithmetic, comparison, and unary operators.

use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::object::Obj;
use crate::value::Value;
use crate::vm::Vm;

impl Vm {
    pub(in crate::vm) fn handle_binary_numeric(&mut self, op: fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let (Value::Number(b), Value::Number(a)) = (self.peek(0), self.peek(1)) else {
            return Err(self.runtime_error(RuntimeErrorKind::OperandsMustBeNumbers));
        };
        self.pop();
        self.pop();
        self.push(Value::Number(op(a, b)));
        Ok(())
    }

    pub(in crate::vm) fn handle_numeric_compare(&mut self, op: fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let (Value::Number(b), Value::Number(a)) = (self.peek(0), self.peek(1)) else {
            return Err(self.runtime_error(RuntimeErrorKind::OperandsMustBeNumbers));
        };
        self.pop();
        self.pop();
        self.push(Value::Bool(op(a, b)));
        Ok(())
    }

    pub(in crate::vm) fn handle_add(&mut self) -> Result<(), RuntimeError> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(a + b));
                Ok(())
            }
            (Value::Obj(Obj::String(a)), Value::Obj(Obj::String(b))) => {
                let concatenated = unsafe { format!("{}{}", a.as_ref().data.data, b.as_ref().data.data) };
                self.pop();
                self.pop();
                let interned = self.intern(&concatenated);
                self.push(Value::Obj(Obj::String(interned)));
                Ok(())
            }
            _ => Err(self.runtime_error(RuntimeErrorKind::OperandsMustBeNumbersOrStrings)),
        }
    }

    pub(in crate::vm) fn handle_negate(&mut self) -> Result<(), RuntimeError> {
        match self.peek(0) {
            Value::Number(n) => {
                self.pop();
                self.push(Value::Number(-n));
                Ok(())
            }
            _ => Err(self.runtime_error(RuntimeErrorKind::OperandMustBeNumber)),
        }
    }
}
