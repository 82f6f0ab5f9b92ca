//! Lexical scope chain. Environments form a tree (each has at most one "enclosing" parent,
//! shared by every environment created in a nested scope) so `Rc<RefCell<_>>` is sufficient
//! without risking a cycle — closures keep their defining environment alive exactly the way
//! clox's open upvalues keep a stack slot alive, just via refcounting instead of a GC.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::RuntimeErrorKind;
use crate::treewalk::value::Value;

pub type EnvRef = Rc<RefCell<Environment>>;

pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<EnvRef>,
}

impl Environment {
    pub fn new(enclosing: Option<EnvRef>) -> EnvRef {
        Rc::new(RefCell::new(Environment { values: HashMap::new(), enclosing }))
    }

    pub fn define(env: &EnvRef, name: &str, value: Value) {
        env.borrow_mut().values.insert(name.to_string(), value);
    }

    fn ancestor(env: &EnvRef, distance: usize) -> EnvRef {
        let mut current = env.clone();
        for _ in 0..distance {
            let next = current
                .borrow()
                .enclosing
                .clone()
                .expect("resolver-computed distance always stays within the scope chain");
            current = next;
        }
        current
    }

    pub fn get_at(env: &EnvRef, distance: usize, name: &str) -> Value {
        let target = Self::ancestor(env, distance);
        let value = target.borrow().values.get(name).cloned();
        value.expect("resolver guarantees the name exists at this exact distance")
    }

    pub fn assign_at(env: &EnvRef, distance: usize, name: &str, value: Value) {
        let target = Self::ancestor(env, distance);
        target.borrow_mut().values.insert(name.to_string(), value);
    }

    /// Looks up a name with no resolver distance — used for names the resolver could not
    /// find in any enclosing scope, which are therefore assumed global.
    pub fn get_global(globals: &EnvRef, name: &str) -> Result<Value, RuntimeErrorKind> {
        globals
            .borrow()
            .values
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeErrorKind::UndefinedVariable(name.to_string()))
    }

    pub fn assign_global(globals: &EnvRef, name: &str, value: Value) -> Result<(), RuntimeErrorKind> {
        let mut globals = globals.borrow_mut();
        if !globals.values.contains_key(name) {
            return Err(RuntimeErrorKind::UndefinedVariable(name.to_string()));
        }
        globals.values.insert(name.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_at_reaches_the_correct_ancestor() {
        let outer = Environment::new(None);
        Environment::define(&outer, "x", Value::Number(1.0));
        let middle = Environment::new(Some(outer.clone()));
        Environment::define(&middle, "y", Value::Number(2.0));
        let inner = Environment::new(Some(middle));

        assert_eq!(Environment::get_at(&inner, 2, "x"), Value::Number(1.0));
        assert_eq!(Environment::get_at(&inner, 1, "y"), Value::Number(2.0));
    }

    #[test]
    fn assign_at_mutates_the_defining_scope_not_a_copy() {
        let outer = Environment::new(None);
        Environment::define(&outer, "x", Value::Number(1.0));
        let inner = Environment::new(Some(outer.clone()));

        Environment::assign_at(&inner, 1, "x", Value::Number(9.0));
        assert_eq!(Environment::get_at(&outer, 0, "x"), Value::Number(9.0));
    }

    #[test]
    fn global_lookup_of_an_undefined_name_is_an_error() {
        let globals = Environment::new(None);
        let err = Environment::get_global(&globals, "missing").unwrap_err();
        assert!(matches!(err, RuntimeErrorKind::UndefinedVariable(name) if name == "missing"));
    }

    #[test]
    fn assigning_an_undeclared_global_is_an_error() {
        let globals = Environment::new(None);
        let err = Environment::assign_global(&globals, "missing", Value::Nil).unwrap_err();
        assert!(matches!(err, RuntimeErrorKind::UndefinedVariable(name) if name == "missing"));
    }
}
