//! The tree-walker's own runtime value representation — a parallel design to `value::Value`
//! and `object::Obj`, but `Rc`-based rather than GC-managed, since this evaluator has no
//! heap or collector of its own: every object is kept alive by ordinary reference counting,
//! with environments (not a mark-sweep pass) breaking would-be cycles by being a tree.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::treewalk::ast::{FunctionDecl, Tok};
use crate::treewalk::environment::EnvRef;
use crate::treewalk::interpreter::{Interpreter, Unwind};

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Function(Rc<LoxFunction>),
    Native(Rc<NativeFunction>),
    Class(Rc<LoxClass>),
    Instance(Rc<RefCell<LoxInstance>>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) | Value::Native(_) => "function",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Function(func) => write!(f, "<fn {}>", func.decl.name.lexeme),
            Value::Native(native) => write!(f, "<native fn {}>", native.name),
            Value::Class(class) => write!(f, "{}", class.name),
            Value::Instance(instance) => write!(f, "{} instance", instance.borrow().class.name),
        }
    }
}

/// A closure over a `FunctionDecl`: the declaration plus the environment active when the
/// `fun` statement (or method) ran. `is_initializer` makes a bare `return;` inside `init`
/// implicitly return `this` instead of `nil`.
pub struct LoxFunction {
    pub decl: Rc<FunctionDecl>,
    pub closure: EnvRef,
    pub is_initializer: bool,
}

impl fmt::Debug for LoxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoxFunction({})", self.decl.name.lexeme)
    }
}

impl LoxFunction {
    pub fn arity(&self) -> usize {
        self.decl.params.len()
    }

    pub fn call(&self, interpreter: &mut Interpreter, args: Vec<Value>) -> Result<Value, Unwind> {
        let call_env = crate::treewalk::environment::Environment::new(Some(self.closure.clone()));
        for (param, arg) in self.decl.params.iter().zip(args) {
            crate::treewalk::environment::Environment::define(&call_env, param.lexeme, arg);
        }
        match interpreter.execute_block(&self.decl.body, call_env) {
            Ok(()) => {
                if self.is_initializer {
                    Ok(crate::treewalk::environment::Environment::get_at(&self.closure, 0, "this"))
                } else {
                    Ok(Value::Nil)
                }
            }
            Err(Unwind::Return(value)) => {
                if self.is_initializer {
                    Ok(crate::treewalk::environment::Environment::get_at(&self.closure, 0, "this"))
                } else {
                    Ok(value)
                }
            }
            Err(other) => Err(other),
        }
    }

    /// Returns a new `LoxFunction` whose closure wraps `this` bound to `instance` — how
    /// method lookup on an instance turns an unbound method into a bound one.
    pub fn bind(&self, instance: Rc<RefCell<LoxInstance>>) -> LoxFunction {
        let env = crate::treewalk::environment::Environment::new(Some(self.closure.clone()));
        crate::treewalk::environment::Environment::define(&env, "this", Value::Instance(instance));
        LoxFunction { decl: self.decl.clone(), closure: env, is_initializer: self.is_initializer }
    }
}

pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub func: fn(&mut Interpreter, &[Value]) -> Result<Value, crate::error::RuntimeErrorKind>,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

pub struct LoxClass {
    pub name: String,
    pub superclass: Option<Rc<LoxClass>>,
    pub methods: HashMap<String, Rc<LoxFunction>>,
}

impl fmt::Debug for LoxClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoxClass({})", self.name)
    }
}

impl LoxClass {
    pub fn find_method(&self, name: &str) -> Option<Rc<LoxFunction>> {
        if let Some(method) = self.methods.get(name) {
            return Some(method.clone());
        }
        self.superclass.as_ref().and_then(|sup| sup.find_method(name))
    }
}

pub struct LoxInstance {
    pub class: Rc<LoxClass>,
    pub fields: HashMap<String, Value>,
}

impl fmt::Debug for LoxInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoxInstance({})", self.class.name)
    }
}

impl LoxInstance {
    pub fn get(this: &Rc<RefCell<LoxInstance>>, name: Tok) -> Result<Value, crate::error::RuntimeErrorKind> {
        if let Some(value) = this.borrow().fields.get(name.lexeme) {
            return Ok(value.clone());
        }
        let class = this.borrow().class.clone();
        if let Some(method) = class.find_method(name.lexeme) {
            return Ok(Value::Function(Rc::new(method.bind(this.clone()))));
        }
        Err(crate::error::RuntimeErrorKind::UndefinedProperty(name.lexeme.to_string()))
    }

    pub fn set(this: &Rc<RefCell<LoxInstance>>, name: Tok, value: Value) {
        this.borrow_mut().fields.insert(name.lexeme.to_string(), value);
    }
}
