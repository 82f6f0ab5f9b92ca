//! Recursive-descent parser building the full AST, driving the same `Scanner` the bytecode
//! compiler does. Grammar and panic-mode error recovery mirror `compiler.rs` exactly; the
//! difference is purely output shape — nodes instead of emitted bytes.

use std::rc::Rc;

use crate::error::{CompileError, CompileErrorKind};
use crate::scanner::Scanner;
use crate::token::TokenKind;
use crate::treewalk::ast::{Expr, ExprId, ExprKind, FunctionDecl, Literal, Stmt, Tok};

const MAX_ARGS: usize = 255;

pub struct Parser {
    scanner: Scanner<'static>,
    previous: Tok,
    current: Tok,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    next_expr_id: ExprId,
}

impl Parser {
    /// Parses one whole program (a file, or one REPL line). `start_id` seeds the
    /// expression-id counter: the interpreter threads the final count from one `parse` call
    /// into the next `start_id`, so that across a multi-line REPL session every `Expr` ever
    /// produced has a globally unique id and the resolver's distance side table — which the
    /// interpreter accumulates across lines rather than rebuilding each time — never
    /// collides old entries with new ones.
    pub fn parse(source: &'static str, start_id: ExprId) -> Result<(Vec<Stmt>, ExprId), Vec<CompileError>> {
        let mut parser = Parser {
            scanner: Scanner::new(source),
            previous: Tok { kind: TokenKind::Eof, lexeme: "", line: 0 },
            current: Tok { kind: TokenKind::Eof, lexeme: "", line: 0 },
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            next_expr_id: start_id,
        };
        parser.advance();
        let mut stmts = Vec::new();
        while !parser.match_token(TokenKind::Eof) {
            if let Some(stmt) = parser.declaration() {
                stmts.push(stmt);
            }
        }
        if parser.had_error { Err(parser.errors) } else { Ok((stmts, parser.next_expr_id)) }
    }

    // ---- token stream -----------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            self.error_at_current(self.current.lexeme.to_string());
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Tok {
        if self.current.kind == kind {
            self.advance();
            return self.previous;
        }
        self.error_at_current(message.to_string());
        self.previous
    }

    fn error_at_current(&mut self, message: String) {
        self.emit_error(self.current.line, message);
    }

    fn error(&mut self, message: String) {
        self.emit_error(self.previous.line, message);
    }

    fn error_kind(&mut self, kind: CompileErrorKind) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.errors.push(CompileError { line: self.previous.line, kind });
    }

    fn emit_error(&mut self, line: u32, message: String) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.errors.push(CompileError { line, kind: CompileErrorKind::Other(message) });
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    fn next_id(&mut self) -> ExprId {
        let id = self.next_expr_id;
        self.next_expr_id += 1;
        id
    }

    // ---- declarations and statements ---------------------------------------

    fn declaration(&mut self) -> Option<Stmt> {
        let stmt = if self.match_token(TokenKind::Class) {
            self.class_declaration()
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration().map(Stmt::Function)
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration()
        } else {
            self.statement()
        };
        if self.panic_mode {
            self.synchronize();
        }
        stmt
    }

    fn var_declaration(&mut self) -> Option<Stmt> {
        self.consume(TokenKind::Identifier, "Expect variable name.");
        let name = self.previous;
        let initializer =
            if self.match_token(TokenKind::Equal) { Some(self.expression()) } else { None };
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        Some(Stmt::Var { name, initializer })
    }

    fn class_declaration(&mut self) -> Option<Stmt> {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let name = self.previous;

        let superclass = if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            if self.previous.lexeme == name.lexeme {
                self.error_kind(CompileErrorKind::ClassInheritsFromItself);
            }
            Some(Expr { id: self.next_id(), kind: ExprKind::Variable(self.previous) })
        } else {
            None
        };

        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        let mut methods = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            methods.push(self.function_decl("method"));
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        Some(Stmt::Class { name, superclass, methods })
    }

    fn fun_declaration(&mut self) -> Option<Rc<FunctionDecl>> {
        Some(self.function_decl("function"))
    }

    fn function_decl(&mut self, kind: &str) -> Rc<FunctionDecl> {
        self.consume(TokenKind::Identifier, &format!("Expect {kind} name."));
        let name = self.previous;
        self.consume(TokenKind::LeftParen, &format!("Expect '(' after {kind} name."));
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if params.len() >= MAX_ARGS {
                    self.error_kind(CompileErrorKind::TooManyParameters);
                }
                self.consume(TokenKind::Identifier, "Expect parameter name.");
                params.push(self.previous);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, &format!("Expect '{{' before {kind} body."));
        let body = self.block();
        Rc::new(FunctionDecl { name, params, body })
    }

    fn statement(&mut self) -> Option<Stmt> {
        if self.match_token(TokenKind::Print) {
            self.print_statement()
        } else if self.match_token(TokenKind::If) {
            self.if_statement()
        } else if self.match_token(TokenKind::Return) {
            self.return_statement()
        } else if self.match_token(TokenKind::While) {
            self.while_statement()
        } else if self.match_token(TokenKind::For) {
            self.for_statement()
        } else if self.match_token(TokenKind::LeftBrace) {
            Some(Stmt::Block(self.block()))
        } else {
            self.expression_statement()
        }
    }

    fn block(&mut self) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            if let Some(stmt) = self.declaration() {
                stmts.push(stmt);
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
        stmts
    }

    fn print_statement(&mut self) -> Option<Stmt> {
        let value = self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        Some(Stmt::Print(value))
    }

    fn return_statement(&mut self) -> Option<Stmt> {
        let keyword = self.previous;
        let value = if self.check(TokenKind::Semicolon) { None } else { Some(self.expression()) };
        self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
        Some(Stmt::Return { keyword, value })
    }

    fn if_statement(&mut self) -> Option<Stmt> {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        let condition = self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");
        let then_branch = Box::new(self.statement()?);
        let else_branch =
            if self.match_token(TokenKind::Else) { Some(Box::new(self.statement()?)) } else { None };
        Some(Stmt::If { condition, then_branch, else_branch })
    }

    fn while_statement(&mut self) -> Option<Stmt> {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        let condition = self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");
        let body = Box::new(self.statement()?);
        Some(Stmt::While { condition, body })
    }

    /// Desugars `for (init; cond; update) body` into `{ init while (cond) { body update } }`,
    /// same as the bytecode compiler's `for_statement`.
    fn for_statement(&mut self) -> Option<Stmt> {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        let initializer = if self.match_token(TokenKind::Semicolon) {
            None
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration()
        } else {
            self.expression_statement()
        };

        let condition = if !self.check(TokenKind::Semicolon) {
            Some(self.expression())
        } else {
            None
        };
        self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");

        let increment = if !self.check(TokenKind::RightParen) { Some(self.expression()) } else { None };
        self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

        let mut body = self.statement()?;
        if let Some(increment) = increment {
            body = Stmt::Block(vec![body, Stmt::Expression(increment)]);
        }
        let condition = condition.unwrap_or(Expr { id: self.next_id(), kind: ExprKind::Literal(Literal::Bool(true)) });
        body = Stmt::While { condition, body: Box::new(body) };
        if let Some(initializer) = initializer {
            body = Stmt::Block(vec![initializer, body]);
        }
        Some(body)
    }

    fn expression_statement(&mut self) -> Option<Stmt> {
        let expr = self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        Some(Stmt::Expression(expr))
    }

    // ---- expressions (precedence-climbing recursive descent) --------------

    fn expression(&mut self) -> Expr {
        self.assignment()
    }

    fn assignment(&mut self) -> Expr {
        let expr = self.or_expr();
        if self.match_token(TokenKind::Equal) {
            let value = self.assignment();
            return match expr.kind {
                ExprKind::Variable(name) => {
                    Expr { id: self.next_id(), kind: ExprKind::Assign { name, value: Box::new(value) } }
                }
                ExprKind::Get { object, name } => {
                    Expr { id: self.next_id(), kind: ExprKind::Set { object, name, value: Box::new(value) } }
                }
                _ => {
                    self.error_kind(CompileErrorKind::InvalidAssignmentTarget);
                    expr
                }
            };
        }
        expr
    }

    fn or_expr(&mut self) -> Expr {
        let mut expr = self.and_expr();
        while self.match_token(TokenKind::Or) {
            let op = self.previous;
            let right = self.and_expr();
            expr = Expr { id: self.next_id(), kind: ExprKind::Logical { left: Box::new(expr), op, right: Box::new(right) } };
        }
        expr
    }

    fn and_expr(&mut self) -> Expr {
        let mut expr = self.equality();
        while self.match_token(TokenKind::And) {
            let op = self.previous;
            let right = self.equality();
            expr = Expr { id: self.next_id(), kind: ExprKind::Logical { left: Box::new(expr), op, right: Box::new(right) } };
        }
        expr
    }

    fn equality(&mut self) -> Expr {
        let mut expr = self.comparison();
        while self.match_token(TokenKind::BangEqual) || self.match_token(TokenKind::EqualEqual) {
            let op = self.previous;
            let right = self.comparison();
            expr = self.binary(expr, op, right);
        }
        expr
    }

    fn comparison(&mut self) -> Expr {
        let mut expr = self.term();
        while self.match_token(TokenKind::Greater)
            || self.match_token(TokenKind::GreaterEqual)
            || self.match_token(TokenKind::Less)
            || self.match_token(TokenKind::LessEqual)
        {
            let op = self.previous;
            let right = self.term();
            expr = self.binary(expr, op, right);
        }
        expr
    }

    fn term(&mut self) -> Expr {
        let mut expr = self.factor();
        while self.match_token(TokenKind::Plus) || self.match_token(TokenKind::Minus) {
            let op = self.previous;
            let right = self.factor();
            expr = self.binary(expr, op, right);
        }
        expr
    }

    fn factor(&mut self) -> Expr {
        let mut expr = self.unary();
        while self.match_token(TokenKind::Star) || self.match_token(TokenKind::Slash) {
            let op = self.previous;
            let right = self.unary();
            expr = self.binary(expr, op, right);
        }
        expr
    }

    fn binary(&mut self, left: Expr, op: Tok, right: Expr) -> Expr {
        Expr { id: self.next_id(), kind: ExprKind::Binary { left: Box::new(left), op, right: Box::new(right) } }
    }

    fn unary(&mut self) -> Expr {
        if self.match_token(TokenKind::Bang) || self.match_token(TokenKind::Minus) {
            let op = self.previous;
            let operand = self.unary();
            return Expr { id: self.next_id(), kind: ExprKind::Unary { op, operand: Box::new(operand) } };
        }
        self.call()
    }

    fn call(&mut self) -> Expr {
        let mut expr = self.primary();
        loop {
            if self.match_token(TokenKind::LeftParen) {
                expr = self.finish_call(expr);
            } else if self.match_token(TokenKind::Dot) {
                self.consume(TokenKind::Identifier, "Expect property name after '.'.");
                let name = self.previous;
                expr = Expr { id: self.next_id(), kind: ExprKind::Get { object: Box::new(expr), name } };
            } else {
                break;
            }
        }
        expr
    }

    fn finish_call(&mut self, callee: Expr) -> Expr {
        let mut args = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if args.len() >= MAX_ARGS {
                    self.error_kind(CompileErrorKind::TooManyArguments);
                }
                args.push(self.expression());
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        let paren = self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        Expr { id: self.next_id(), kind: ExprKind::Call { callee: Box::new(callee), paren, args } }
    }

    fn primary(&mut self) -> Expr {
        let id = self.next_id();
        if self.match_token(TokenKind::False) {
            return Expr { id, kind: ExprKind::Literal(Literal::Bool(false)) };
        }
        if self.match_token(TokenKind::True) {
            return Expr { id, kind: ExprKind::Literal(Literal::Bool(true)) };
        }
        if self.match_token(TokenKind::Nil) {
            return Expr { id, kind: ExprKind::Literal(Literal::Nil) };
        }
        if self.match_token(TokenKind::Number) {
            let value: f64 = self.previous.lexeme.parse().expect("scanner only emits valid number lexemes");
            return Expr { id, kind: ExprKind::Literal(Literal::Number(value)) };
        }
        if self.match_token(TokenKind::String) {
            let lexeme = self.previous.lexeme;
            let contents = lexeme[1..lexeme.len() - 1].to_string();
            return Expr { id, kind: ExprKind::Literal(Literal::String(contents)) };
        }
        if self.match_token(TokenKind::This) {
            return Expr { id, kind: ExprKind::This(self.previous) };
        }
        if self.match_token(TokenKind::Super) {
            let keyword = self.previous;
            self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
            self.consume(TokenKind::Identifier, "Expect superclass method name.");
            return Expr { id, kind: ExprKind::Super { keyword, method: self.previous } };
        }
        if self.match_token(TokenKind::Identifier) {
            return Expr { id, kind: ExprKind::Variable(self.previous) };
        }
        if self.match_token(TokenKind::LeftParen) {
            let inner = self.expression();
            self.consume(TokenKind::RightParen, "Expect ')' after expression.");
            return Expr { id, kind: ExprKind::Grouping(Box::new(inner)) };
        }
        self.error("Expect expression.".to_string());
        Expr { id, kind: ExprKind::Literal(Literal::Nil) }
    }
}
