//! Native (host-provided) functions installed into the global table at startup.
//!
//! Each native is a plain function taking the running VM and its argument window. Only
//! `clock` is implemented; more natives would register here the same way.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::RuntimeErrorKind;
use crate::value::Value;
use crate::vm::Vm;

pub fn clock(_vm: &mut Vm, _args: &[Value]) -> Result<Value, RuntimeErrorKind> {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    Ok(Value::Number(elapsed.as_secs_f64()))
}

pub fn install(vm: &mut Vm) {
    vm.define_native("clock", 0, clock);
}

/// Same native, wired into the tree-walking evaluator's own value/interpreter types.
pub fn clock_treewalk(
    _interp: &mut crate::treewalk::interpreter::Interpreter,
    _args: &[crate::treewalk::value::Value],
) -> Result<crate::treewalk::value::Value, RuntimeErrorKind> {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    Ok(crate::treewalk::value::Value::Number(elapsed.as_secs_f64()))
}
