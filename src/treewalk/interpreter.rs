//! Tree-walking evaluator. Consumes the resolver's scope-distance side table to reach
//! variables directly (`Environment::get_at`/`assign_at`) instead of walking the scope chain
//! by name at every reference — the tree-walker's analogue of the bytecode VM resolving
//! locals/upvalues once, at compile time, instead of hashing a name every access.
//!
//! Two bugs that show up in naive ports of this design are avoided here: `eval_logical`
//! evaluates `right` in the non-short-circuit branch rather than re-evaluating `left`, and
//! the `If` arm branches on the evaluated condition's truthiness rather than the unevaluated
//! AST node.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{RuntimeError, RuntimeErrorKind, TraceFrame};
use crate::treewalk::ast::{Expr, ExprId, ExprKind, Literal, Stmt};
use crate::treewalk::environment::{EnvRef, Environment};
use crate::treewalk::value::{LoxClass, LoxFunction, LoxInstance, NativeFunction, Value};

/// Non-local control flow: a `return` unwinds the Rust call stack as an `Err`, same
/// technique jlox uses exceptions for, just modeled as data instead of a thrown object.
pub enum Unwind {
    Return(Value),
    Error(RuntimeErrorKind),
}

impl From<RuntimeErrorKind> for Unwind {
    fn from(kind: RuntimeErrorKind) -> Self {
        Unwind::Error(kind)
    }
}

pub struct Interpreter {
    pub globals: EnvRef,
    environment: EnvRef,
    locals: HashMap<ExprId, usize>,
    next_expr_id: ExprId,
    call_stack: Vec<TraceFrame>,
    top_level_line: u32,
}

impl Interpreter {
    pub fn new() -> Self {
        let globals = Environment::new(None);
        Environment::define(
            &globals,
            "clock",
            Value::Native(Rc::new(NativeFunction { name: "clock", arity: 0, func: crate::native::clock_treewalk })),
        );
        Interpreter {
            environment: globals.clone(),
            globals,
            locals: HashMap::new(),
            next_expr_id: 0,
            call_stack: Vec::new(),
            top_level_line: 0,
        }
    }

    /// Parses, resolves, and executes one program (a file, or one REPL line) against this
    /// interpreter's persistent global state.
    pub fn run(&mut self, source: &str) -> Result<(), TreeWalkError> {
        let leaked: &'static str = Box::leak(source.to_owned().into_boxed_str());
        let (program, next_id) = crate::treewalk::parser::Parser::parse(leaked, self.next_expr_id)
            .map_err(TreeWalkError::Compile)?;
        self.next_expr_id = next_id;
        let new_locals = crate::treewalk::resolver::Resolver::resolve(&program).map_err(TreeWalkError::Resolve)?;
        self.locals.extend(new_locals);

        for stmt in &program {
            if let Err(unwind) = self.execute(stmt) {
                let error = self.unwind_to_error(unwind);
                self.call_stack.clear();
                return Err(TreeWalkError::Runtime(error));
            }
        }
        Ok(())
    }

    fn unwind_to_error(&self, unwind: Unwind) -> RuntimeError {
        let kind = match unwind {
            Unwind::Error(kind) => kind,
            Unwind::Return(_) => unreachable!("resolver rejects return outside a function"),
        };
        let mut frames: Vec<TraceFrame> = self.call_stack.iter().rev().cloned().collect();
        frames.push(TraceFrame { name: String::new(), line: self.top_level_line });
        RuntimeError { kind, frames }
    }

    fn note_line(&mut self, line: u32) {
        if let Some(top) = self.call_stack.last_mut() {
            top.line = line;
        } else {
            self.top_level_line = line;
        }
    }

    // ---- statements ---------------------------------------------------------

    fn execute(&mut self, stmt: &Stmt) -> Result<(), Unwind> {
        match stmt {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;
                Ok(())
            }
            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;
                println!("{value}");
                Ok(())
            }
            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                Environment::define(&self.environment, name.lexeme, value);
                Ok(())
            }
            Stmt::Block(stmts) => {
                let block_env = Environment::new(Some(self.environment.clone()));
                self.execute_block(stmts, block_env)
            }
            Stmt::If { condition, then_branch, else_branch } => {
                let cond_value = self.evaluate(condition)?;
                if cond_value.is_truthy() {
                    self.execute(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)
                } else {
                    Ok(())
                }
            }
            Stmt::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    self.execute(body)?;
                }
                Ok(())
            }
            Stmt::Function(decl) => {
                let function = LoxFunction { decl: decl.clone(), closure: self.environment.clone(), is_initializer: false };
                Environment::define(&self.environment, decl.name.lexeme, Value::Function(Rc::new(function)));
                Ok(())
            }
            Stmt::Return { keyword, value } => {
                self.note_line(keyword.line);
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                Err(Unwind::Return(value))
            }
            Stmt::Class { name, superclass, methods } => self.execute_class(name, superclass, methods),
        }
    }

    fn execute_class(
        &mut self,
        name: &crate::treewalk::ast::Tok,
        superclass: &Option<Expr>,
        methods: &[Rc<crate::treewalk::ast::FunctionDecl>],
    ) -> Result<(), Unwind> {
        let superclass_value = match superclass {
            Some(expr) => match self.evaluate(expr)? {
                Value::Class(class) => Some(class),
                _ => return Err(Unwind::Error(RuntimeErrorKind::SuperclassMustBeClass)),
            },
            None => None,
        };

        Environment::define(&self.environment, name.lexeme, Value::Nil);

        let method_env = if let Some(superclass_value) = &superclass_value {
            let env = Environment::new(Some(self.environment.clone()));
            Environment::define(&env, "super", Value::Class(superclass_value.clone()));
            env
        } else {
            self.environment.clone()
        };

        let mut method_table = HashMap::new();
        for method in methods {
            let is_initializer = method.name.lexeme == "init";
            let function = LoxFunction { decl: method.clone(), closure: method_env.clone(), is_initializer };
            method_table.insert(method.name.lexeme.to_string(), Rc::new(function));
        }

        let class = Rc::new(LoxClass { name: name.lexeme.to_string(), superclass: superclass_value, methods: method_table });
        Environment::assign_at(&self.environment, 0, name.lexeme, Value::Class(class));
        Ok(())
    }

    /// Runs `stmts` with `self.environment` temporarily switched to `env`, restoring the
    /// previous environment afterward even when a statement unwinds with `return` or an
    /// error.
    pub fn execute_block(&mut self, stmts: &[Stmt], env: EnvRef) -> Result<(), Unwind> {
        let previous = std::mem::replace(&mut self.environment, env);
        let result = (|| {
            for stmt in stmts {
                self.execute(stmt)?;
            }
            Ok(())
        })();
        self.environment = previous;
        result
    }

    // ---- expressions ----------------------------------------------------------

    fn evaluate(&mut self, expr: &Expr) -> Result<Value, Unwind> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(match lit {
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::String(Rc::from(s.as_str())),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Nil => Value::Nil,
            }),
            ExprKind::Variable(name) => self.lookup_variable(expr.id, name.lexeme),
            ExprKind::Grouping(inner) => self.evaluate(inner),
            ExprKind::Unary { op, operand } => self.eval_unary(*op, operand),
            ExprKind::Binary { left, op, right } => self.eval_binary(left, *op, right),
            ExprKind::Logical { left, op, right } => self.eval_logical(left, *op, right),
            ExprKind::Assign { name, value } => {
                let value = self.evaluate(value)?;
                match self.locals.get(&expr.id) {
                    Some(&distance) => Environment::assign_at(&self.environment, distance, name.lexeme, value.clone()),
                    None => Environment::assign_global(&self.globals, name.lexeme, value.clone())?,
                }
                Ok(value)
            }
            ExprKind::Call { callee, paren, args } => {
                self.note_line(paren.line);
                let callee_value = self.evaluate(callee)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.evaluate(arg)?);
                }
                self.call_value(callee_value, arg_values, paren.line)
            }
            ExprKind::Get { object, name } => {
                let object_value = self.evaluate(object)?;
                match object_value {
                    Value::Instance(instance) => Ok(LoxInstance::get(&instance, *name)?),
                    _ => Err(Unwind::Error(RuntimeErrorKind::OnlyInstancesHaveProperties)),
                }
            }
            ExprKind::Set { object, name, value } => {
                let object_value = self.evaluate(object)?;
                let Value::Instance(instance) = object_value else {
                    return Err(Unwind::Error(RuntimeErrorKind::OnlyInstancesHaveProperties));
                };
                let value = self.evaluate(value)?;
                LoxInstance::set(&instance, *name, value.clone());
                Ok(value)
            }
            ExprKind::This(token) => self.lookup_variable(expr.id, token.lexeme),
            ExprKind::Super { method, .. } => {
                let distance = *self.locals.get(&expr.id).expect("resolver always resolves 'super'");
                let Value::Class(superclass) = Environment::get_at(&self.environment, distance, "super") else {
                    unreachable!("resolver only binds 'super' to a class value");
                };
                let Value::Instance(instance) = Environment::get_at(&self.environment, distance - 1, "this") else {
                    unreachable!("'this' is always bound one scope inside 'super'");
                };
                match superclass.find_method(method.lexeme) {
                    Some(found) => Ok(Value::Function(Rc::new(found.bind(instance)))),
                    None => Err(Unwind::Error(RuntimeErrorKind::UndefinedSuperMethod(method.lexeme.to_string()))),
                }
            }
        }
    }

    fn lookup_variable(&mut self, id: ExprId, name: &str) -> Result<Value, Unwind> {
        match self.locals.get(&id) {
            Some(&distance) => Ok(Environment::get_at(&self.environment, distance, name)),
            None => Ok(Environment::get_global(&self.globals, name)?),
        }
    }

    fn eval_unary(&mut self, op: crate::treewalk::ast::Tok, operand: &Expr) -> Result<Value, Unwind> {
        use crate::token::TokenKind;
        let value = self.evaluate(operand)?;
        match op.kind {
            TokenKind::Minus => match value {
                Value::Number(n) => Ok(Value::Number(-n)),
                _ => Err(Unwind::Error(RuntimeErrorKind::OperandMustBeNumber)),
            },
            TokenKind::Bang => Ok(Value::Bool(!value.is_truthy())),
            _ => unreachable!("parser only emits Minus/Bang as unary operators"),
        }
    }

    fn eval_binary(&mut self, left: &Expr, op: crate::treewalk::ast::Tok, right: &Expr) -> Result<Value, Unwind> {
        use crate::token::TokenKind;
        let left = self.evaluate(left)?;
        let right = self.evaluate(right)?;
        match op.kind {
            TokenKind::Plus => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::String(a), Value::String(b)) => Ok(Value::String(Rc::from(format!("{a}{b}")))),
                _ => Err(Unwind::Error(RuntimeErrorKind::OperandsMustBeNumbersOrStrings)),
            },
            TokenKind::Minus => Self::numeric_binop(left, right, |a, b| a - b),
            TokenKind::Star => Self::numeric_binop(left, right, |a, b| a * b),
            TokenKind::Slash => Self::numeric_binop(left, right, |a, b| a / b),
            TokenKind::Greater => Self::numeric_compare(left, right, |a, b| a > b),
            TokenKind::GreaterEqual => Self::numeric_compare(left, right, |a, b| a >= b),
            TokenKind::Less => Self::numeric_compare(left, right, |a, b| a < b),
            TokenKind::LessEqual => Self::numeric_compare(left, right, |a, b| a <= b),
            TokenKind::EqualEqual => Ok(Value::Bool(left == right)),
            TokenKind::BangEqual => Ok(Value::Bool(left != right)),
            _ => unreachable!("parser only emits comparison/arithmetic tokens as binary operators"),
        }
    }

    fn numeric_binop(left: Value, right: Value, op: impl Fn(f64, f64) -> f64) -> Result<Value, Unwind> {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(op(a, b))),
            _ => Err(Unwind::Error(RuntimeErrorKind::OperandsMustBeNumbers)),
        }
    }

    fn numeric_compare(left: Value, right: Value, op: impl Fn(f64, f64) -> bool) -> Result<Value, Unwind> {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(op(a, b))),
            _ => Err(Unwind::Error(RuntimeErrorKind::OperandsMustBeNumbers)),
        }
    }

    /// Evaluates `left`; short-circuits for `or` on truthy / `and` on falsey without
    /// touching `right` at all, otherwise evaluates and returns `right` — *not* a
    /// re-evaluation of `left`.
    fn eval_logical(&mut self, left: &Expr, op: crate::treewalk::ast::Tok, right: &Expr) -> Result<Value, Unwind> {
        use crate::token::TokenKind;
        let left_value = self.evaluate(left)?;
        match op.kind {
            TokenKind::Or if left_value.is_truthy() => Ok(left_value),
            TokenKind::And if !left_value.is_truthy() => Ok(left_value),
            _ => self.evaluate(right),
        }
    }

    fn call_value(&mut self, callee: Value, args: Vec<Value>, call_line: u32) -> Result<Value, Unwind> {
        match callee {
            Value::Function(function) => {
                if function.arity() != args.len() {
                    return Err(Unwind::Error(RuntimeErrorKind::WrongArity { expected: function.arity(), got: args.len() }));
                }
                self.call_stack.push(TraceFrame { name: function.decl.name.lexeme.to_string(), line: call_line });
                let result = function.call(self, args);
                // Only pop on success: an error needs every still-open frame intact when it
                // reaches `run()`, the same way the bytecode VM's `frames` stays populated
                // until an explicit return pops it, not as a side effect of Rust unwinding.
                if result.is_ok() {
                    self.call_stack.pop();
                }
                result
            }
            Value::Native(native) => {
                if native.arity != args.len() {
                    return Err(Unwind::Error(RuntimeErrorKind::WrongArity { expected: native.arity, got: args.len() }));
                }
                Ok((native.func)(self, &args)?)
            }
            Value::Class(class) => {
                let instance = Rc::new(RefCell::new(LoxInstance { class: class.clone(), fields: HashMap::new() }));
                match class.find_method("init") {
                    Some(initializer) => {
                        if initializer.arity() != args.len() {
                            return Err(Unwind::Error(RuntimeErrorKind::WrongArity {
                                expected: initializer.arity(),
                                got: args.len(),
                            }));
                        }
                        let bound = initializer.bind(instance.clone());
                        self.call_stack.push(TraceFrame { name: class.name.clone(), line: call_line });
                        let result = bound.call(self, args);
                        if result.is_ok() {
                            self.call_stack.pop();
                        }
                        result?;
                        Ok(Value::Instance(instance))
                    }
                    None if !args.is_empty() => {
                        Err(Unwind::Error(RuntimeErrorKind::WrongArity { expected: 0, got: args.len() }))
                    }
                    None => Ok(Value::Instance(instance)),
                }
            }
            _ => Err(Unwind::Error(RuntimeErrorKind::NotCallable)),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

#[derive(Debug)]
pub enum TreeWalkError {
    Compile(Vec<crate::error::CompileError>),
    Resolve(Vec<crate::error::ResolveError>),
    Runtime(RuntimeError),
}

impl std::fmt::Display for TreeWalkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeWalkError::Compile(errs) => {
                for e in errs {
                    writeln!(f, "{e}")?;
                }
                Ok(())
            }
            TreeWalkError::Resolve(errs) => {
                for e in errs {
                    writeln!(f, "{e}")?;
                }
                Ok(())
            }
            TreeWalkError::Runtime(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for TreeWalkError {}
