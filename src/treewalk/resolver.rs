//! Static scope-distance analysis, run between parsing and evaluation. Mirrors the bytecode
//! compiler's locals/upvalues resolution (`compiler.rs`'s `resolve_local`/`resolve_upvalue`)
//! but produces a side table keyed by expression identity instead of emitting `GetLocal`/
//! `GetUpvalue` bytes, since the tree-walker has no chunk to emit into.

use std::collections::HashMap;

use crate::error::{ResolveError, ResolveErrorKind};
use crate::treewalk::ast::{Expr, ExprId, ExprKind, FunctionDecl, Stmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    None,
    Function,
    Method,
    Initializer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassType {
    None,
    Class,
    Subclass,
}

pub struct Resolver {
    scopes: Vec<HashMap<String, bool>>,
    locals: HashMap<ExprId, usize>,
    current_function: FunctionType,
    current_class: ClassType,
    errors: Vec<ResolveError>,
}

impl Resolver {
    pub fn resolve(program: &[Stmt]) -> Result<HashMap<ExprId, usize>, Vec<ResolveError>> {
        let mut resolver = Resolver {
            scopes: Vec::new(),
            locals: HashMap::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
            errors: Vec::new(),
        };
        resolver.resolve_stmts(program);
        if resolver.errors.is_empty() { Ok(resolver.locals) } else { Err(resolver.errors) }
    }

    fn error(&mut self, line: u32, kind: ResolveErrorKind) {
        self.errors.push(ResolveError { line, kind });
    }

    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, line: u32) {
        if let Some(scope) = self.scopes.last_mut() {
            if scope.contains_key(name) {
                self.error(line, ResolveErrorKind::DuplicateLocal);
            }
            scope.insert(name.to_string(), false);
        }
    }

    fn define(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), true);
        }
    }

    fn resolve_local(&mut self, expr_id: ExprId, name: &str) {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if scope.contains_key(name) {
                self.locals.insert(expr_id, depth);
                return;
            }
        }
        // not found in any scope: treated as global, resolved at runtime.
    }

    fn resolve_stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.resolve_stmt(stmt);
        }
    }

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expression(expr) | Stmt::Print(expr) => self.resolve_expr(expr),
            Stmt::Var { name, initializer } => {
                self.declare(name.lexeme, name.line);
                if let Some(init) = initializer {
                    self.resolve_expr(init);
                }
                self.define(name.lexeme);
            }
            Stmt::Block(stmts) => {
                self.begin_scope();
                self.resolve_stmts(stmts);
                self.end_scope();
            }
            Stmt::If { condition, then_branch, else_branch } => {
                self.resolve_expr(condition);
                self.resolve_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.resolve_stmt(else_branch);
                }
            }
            Stmt::While { condition, body } => {
                self.resolve_expr(condition);
                self.resolve_stmt(body);
            }
            Stmt::Function(decl) => {
                self.declare(decl.name.lexeme, decl.name.line);
                self.define(decl.name.lexeme);
                self.resolve_function(decl, FunctionType::Function);
            }
            Stmt::Return { keyword, value } => {
                if self.current_function == FunctionType::None {
                    self.error(keyword.line, ResolveErrorKind::ReturnOutsideFunction);
                }
                if let Some(value) = value {
                    if self.current_function == FunctionType::Initializer {
                        self.error(keyword.line, ResolveErrorKind::ReturnValueFromInitializer);
                    }
                    self.resolve_expr(value);
                }
            }
            Stmt::Class { name, superclass, methods } => {
                let enclosing_class = self.current_class;
                self.current_class = ClassType::Class;

                self.declare(name.lexeme, name.line);
                self.define(name.lexeme);

                if let Some(superclass_expr) = superclass {
                    if let ExprKind::Variable(super_name) = &superclass_expr.kind {
                        if super_name.lexeme == name.lexeme {
                            self.error(super_name.line, ResolveErrorKind::ClassInheritsFromItself);
                        }
                    }
                    self.current_class = ClassType::Subclass;
                    self.resolve_expr(superclass_expr);
                    self.begin_scope();
                    self.scopes.last_mut().unwrap().insert("super".to_string(), true);
                }

                self.begin_scope();
                self.scopes.last_mut().unwrap().insert("this".to_string(), true);

                for method in methods {
                    let function_type = if method.name.lexeme == "init" {
                        FunctionType::Initializer
                    } else {
                        FunctionType::Method
                    };
                    self.resolve_function(method, function_type);
                }

                self.end_scope();
                if superclass.is_some() {
                    self.end_scope();
                }
                self.current_class = enclosing_class;
            }
        }
    }

    fn resolve_function(&mut self, decl: &FunctionDecl, function_type: FunctionType) {
        let enclosing_function = self.current_function;
        self.current_function = function_type;
        self.begin_scope();
        for param in &decl.params {
            self.declare(param.lexeme, param.line);
            self.define(param.lexeme);
        }
        self.resolve_stmts(&decl.body);
        self.end_scope();
        self.current_function = enclosing_function;
    }

    fn resolve_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Literal(_) => {}
            ExprKind::Variable(name) => {
                if let Some(scope) = self.scopes.last() {
                    if scope.get(name.lexeme) == Some(&false) {
                        self.error(name.line, ResolveErrorKind::ReadInOwnInitializer);
                    }
                }
                self.resolve_local(expr.id, name.lexeme);
            }
            ExprKind::Grouping(inner) => self.resolve_expr(inner),
            ExprKind::Unary { operand, .. } => self.resolve_expr(operand),
            ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }
            ExprKind::Assign { name, value } => {
                self.resolve_expr(value);
                self.resolve_local(expr.id, name.lexeme);
            }
            ExprKind::Call { callee, args, .. } => {
                self.resolve_expr(callee);
                for arg in args {
                    self.resolve_expr(arg);
                }
            }
            ExprKind::Get { object, .. } => self.resolve_expr(object),
            ExprKind::Set { object, value, .. } => {
                self.resolve_expr(value);
                self.resolve_expr(object);
            }
            ExprKind::This(token) => {
                if self.current_class == ClassType::None {
                    self.error(token.line, ResolveErrorKind::ThisOutsideClass);
                    return;
                }
                self.resolve_local(expr.id, "this");
            }
            ExprKind::Super { keyword, .. } => {
                match self.current_class {
                    ClassType::None => self.error(keyword.line, ResolveErrorKind::SuperOutsideClass),
                    ClassType::Class => self.error(keyword.line, ResolveErrorKind::SuperWithNoSuperclass),
                    ClassType::Subclass => {}
                }
                self.resolve_local(expr.id, "super");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::treewalk::parser::Parser;

    fn resolve_ok(src: &'static str) -> HashMap<ExprId, usize> {
        let (program, _) = Parser::parse(src, 0).expect("should parse");
        Resolver::resolve(&program).expect("should resolve")
    }

    fn resolve_err(src: &'static str) -> Vec<ResolveError> {
        let (program, _) = Parser::parse(src, 0).expect("should parse");
        Resolver::resolve(&program).expect_err("should fail to resolve")
    }

    #[test]
    fn resolves_closure_variable_to_a_nonzero_distance() {
        let locals = resolve_ok("fun mk() { var x = 0; fun inc() { x = x + 1; return x; } return inc; }");
        assert!(locals.values().any(|&d| d > 0));
    }

    #[test]
    fn rejects_reading_local_in_its_own_initializer() {
        let errs = resolve_err("{ var a = a; }");
        assert!(matches!(errs[0].kind, ResolveErrorKind::ReadInOwnInitializer));
    }

    #[test]
    fn rejects_return_outside_function() {
        let errs = resolve_err("return 1;");
        assert!(matches!(errs[0].kind, ResolveErrorKind::ReturnOutsideFunction));
    }

    #[test]
    fn rejects_this_outside_class() {
        let errs = resolve_err("print this;");
        assert!(matches!(errs[0].kind, ResolveErrorKind::ThisOutsideClass));
    }

    #[test]
    fn rejects_class_inheriting_from_itself() {
        let errs = resolve_err("class A < A {}");
        assert!(matches!(errs[0].kind, ResolveErrorKind::ClassInheritsFromItself));
    }

    #[test]
    fn accepts_super_in_a_subclass() {
        let src = "class A { greet() { print \"A\"; } } class B < A { greet() { super.greet(); } }";
        resolve_ok(src);
    }
}
