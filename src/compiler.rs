//! Single-pass Pratt compiler: parses and emits bytecode in the same walk, with no
//! intermediate AST or IR. A stack VM wants direct single-pass emission rather than a
//! register-allocated IR, so the locals/scope/upvalue machinery below is built around a
//! `Compiler{locals, upvalues, enclosing}` shape, generalized to this language's full
//! grammar (classes, inheritance, closures) with a `Local`/`UpvalueData`/`resolve_upvalue`
//! pattern.

use crate::chunk::Chunk;
use crate::error::{CompileError, CompileErrorKind};
use crate::gc::Heap;
use crate::object::{FunctionRef, LoxFunction};
use crate::opcode::OpCode;
use crate::scanner::Scanner;
use crate::token::{Token, TokenKind};
use crate::value::Value;

const MAX_LOCALS: usize = u8::MAX as usize + 1;
const MAX_UPVALUES: usize = u8::MAX as usize + 1;
const MAX_ARGS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,
    And,
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src> = fn(&mut Compiler<'src>, bool);

struct ParseRule<'src> {
    prefix: Option<ParseFn<'src>>,
    infix: Option<ParseFn<'src>>,
    precedence: Precedence,
}

fn get_rule<'src>(kind: TokenKind) -> ParseRule<'src> {
    use TokenKind::*;
    match kind {
        LeftParen => ParseRule { prefix: Some(Compiler::grouping), infix: Some(Compiler::call), precedence: Precedence::Call },
        Dot => ParseRule { prefix: None, infix: Some(Compiler::dot), precedence: Precedence::Call },
        Minus => ParseRule { prefix: Some(Compiler::unary), infix: Some(Compiler::binary), precedence: Precedence::Term },
        Plus => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Term },
        Slash => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Factor },
        Star => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Factor },
        Bang => ParseRule { prefix: Some(Compiler::unary), infix: None, precedence: Precedence::None },
        BangEqual => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Equality },
        EqualEqual => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Equality },
        Greater => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Comparison },
        GreaterEqual => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Comparison },
        Less => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Comparison },
        LessEqual => ParseRule { prefix: None, infix: Some(Compiler::binary), precedence: Precedence::Comparison },
        Identifier => ParseRule { prefix: Some(Compiler::variable), infix: None, precedence: Precedence::None },
        String => ParseRule { prefix: Some(Compiler::string), infix: None, precedence: Precedence::None },
        Number => ParseRule { prefix: Some(Compiler::number), infix: None, precedence: Precedence::None },
        And => ParseRule { prefix: None, infix: Some(Compiler::and_), precedence: Precedence::And },
        Or => ParseRule { prefix: None, infix: Some(Compiler::or_), precedence: Precedence::Or },
        False => ParseRule { prefix: Some(Compiler::literal), infix: None, precedence: Precedence::None },
        True => ParseRule { prefix: Some(Compiler::literal), infix: None, precedence: Precedence::None },
        Nil => ParseRule { prefix: Some(Compiler::literal), infix: None, precedence: Precedence::None },
        This => ParseRule { prefix: Some(Compiler::this_), infix: None, precedence: Precedence::None },
        Super => ParseRule { prefix: Some(Compiler::super_), infix: None, precedence: Precedence::None },
        _ => ParseRule { prefix: None, infix: None, precedence: Precedence::None },
    }
}

struct Local<'src> {
    name: Token<'src>,
    depth: Option<usize>,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Function,
    Method,
    Initializer,
}

struct FunctionFrame<'src> {
    function: FunctionRef,
    function_type: FunctionType,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: usize,
}

impl<'src> FunctionFrame<'src> {
    fn new(function: FunctionRef, function_type: FunctionType) -> Self {
        // Slot 0 is reserved: `this` for methods/initializers, the closure itself otherwise.
        let name = if function_type == FunctionType::Function {
            Token { kind: TokenKind::Identifier, lexeme: "", line: 0 }
        } else {
            Token { kind: TokenKind::This, lexeme: "this", line: 0 }
        };
        let reserved = Local { name, depth: Some(0), is_captured: false };
        FunctionFrame { function, function_type, locals: vec![reserved], upvalues: Vec::new(), scope_depth: 0 }
    }
}

struct ClassContext {
    has_superclass: bool,
}

pub struct Compiler<'src> {
    scanner: Scanner<'src>,
    heap: &'src mut Heap,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    frames: Vec<FunctionFrame<'src>>,
    class_stack: Vec<ClassContext>,
}

impl<'src> Compiler<'src> {
    pub fn compile(source: &'src str, heap: &'src mut Heap) -> Result<FunctionRef, Vec<CompileError>> {
        let script = heap.alloc_function();
        let mut compiler = Compiler {
            scanner: Scanner::new(source),
            heap,
            previous: Token { kind: TokenKind::Eof, lexeme: "", line: 0 },
            current: Token { kind: TokenKind::Eof, lexeme: "", line: 0 },
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            frames: vec![FunctionFrame::new(script, FunctionType::Script)],
            class_stack: Vec::new(),
        };
        compiler.advance();
        while !compiler.match_token(TokenKind::Eof) {
            compiler.declaration();
        }
        let (function, _) = compiler.end_function();
        if compiler.had_error {
            Err(compiler.errors)
        } else {
            Ok(function)
        }
    }

    // ---- token stream -------------------------------------------------

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

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message.to_string());
    }

    fn error_at_current(&mut self, message: String) {
        self.emit_error(self.current.line, message);
    }

    fn error(&mut self, message: String) {
        self.emit_error(self.previous.line, message);
    }

    fn emit_error(&mut self, line: u32, message: String) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.errors.push(CompileError { line, kind: CompileErrorKind::Other(message) });
    }

    fn error_kind(&mut self, kind: CompileErrorKind) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.errors.push(CompileError { line: self.previous.line, kind });
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

    // ---- bytecode emission ---------------------------------------------

    fn frame(&mut self) -> &mut FunctionFrame<'src> {
        self.frames.last_mut().expect("at least the script frame is always present")
    }

    fn chunk(&mut self) -> &mut Chunk {
        let func = self.frame().function;
        unsafe { &mut (*func.as_ptr()).data.chunk }
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.chunk().write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        let line = self.previous.line;
        self.chunk().write_op(op, line);
    }

    fn emit_u16(&mut self, value: u16) {
        let line = self.previous.line;
        self.chunk().write_u16(value, line);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.chunk().len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error_kind(CompileErrorKind::JumpTooLarge);
        }
        self.emit_u16(offset as u16);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_u16(0xFFFF);
        self.chunk().len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.chunk().len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error_kind(CompileErrorKind::JumpTooLarge);
        }
        self.chunk().patch_u16(offset, jump as u16);
    }

    fn emit_return(&mut self) {
        if self.frame().function_type == FunctionType::Initializer {
            self.emit_op(OpCode::GetLocal);
            self.emit_byte(0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.chunk().add_constant(value) {
            Some(idx) => idx,
            None => {
                self.error_kind(CompileErrorKind::TooManyConstants);
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_op(OpCode::Constant);
        self.emit_byte(idx);
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let interned = self.heap.intern(name);
        self.make_constant(Value::Obj(crate::object::Obj::String(interned)))
    }

    // ---- scopes, locals, upvalues --------------------------------------

    fn begin_scope(&mut self) {
        self.frame().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.frame().scope_depth -= 1;
        let depth = self.frame().scope_depth;
        while let Some(local) = self.frame().locals.last() {
            if local.depth.map(|d| d > depth).unwrap_or(false) {
                if self.frame().locals.last().unwrap().is_captured {
                    self.emit_op(OpCode::CloseUpvalue);
                } else {
                    self.emit_op(OpCode::Pop);
                }
                self.frame().locals.pop();
            } else {
                break;
            }
        }
    }

    fn declare_variable(&mut self) {
        if self.frame().scope_depth == 0 {
            return;
        }
        let name = self.previous;
        let depth = self.frame().scope_depth;
        for local in self.frame().locals.iter().rev() {
            if let Some(d) = local.depth {
                if d < depth {
                    break;
                }
            }
            if local.name.lexeme == name.lexeme {
                self.error_kind(CompileErrorKind::DuplicateLocal);
                return;
            }
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: Token<'src>) {
        if self.frame().locals.len() >= MAX_LOCALS {
            self.error_kind(CompileErrorKind::TooManyLocals);
            return;
        }
        self.frame().locals.push(Local { name, depth: None, is_captured: false });
    }

    fn mark_initialized(&mut self) {
        if self.frame().scope_depth == 0 {
            return;
        }
        let depth = self.frame().scope_depth;
        if let Some(local) = self.frame().locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.frame().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous.lexeme)
    }

    fn define_variable(&mut self, global: u8) {
        if self.frame().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op(OpCode::DefineGlobal);
        self.emit_byte(global);
    }

    fn resolve_local(frame: &FunctionFrame<'src>, name: &str) -> Result<Option<u8>, ()> {
        for (i, local) in frame.locals.iter().enumerate().rev() {
            if local.name.lexeme == name {
                if local.depth.is_none() {
                    return Err(());
                }
                return Ok(Some(i as u8));
            }
        }
        Ok(None)
    }

    fn resolve_upvalue(frames: &mut [FunctionFrame<'src>], level: usize, name: &str) -> Option<u8> {
        if level == 0 {
            return None;
        }
        let enclosing = level - 1;
        if let Ok(Some(local_idx)) = Self::resolve_local(&frames[enclosing], name) {
            frames[enclosing].locals[local_idx as usize].is_captured = true;
            return Self::add_upvalue(frames, level, local_idx, true);
        }
        if let Some(up_idx) = Self::resolve_upvalue(frames, enclosing, name) {
            return Self::add_upvalue(frames, level, up_idx, false);
        }
        None
    }

    fn add_upvalue(frames: &mut [FunctionFrame<'src>], level: usize, index: u8, is_local: bool) -> Option<u8> {
        let frame = &mut frames[level];
        for (i, uv) in frame.upvalues.iter().enumerate() {
            if uv.index == index && uv.is_local == is_local {
                return Some(i as u8);
            }
        }
        if frame.upvalues.len() >= MAX_UPVALUES {
            return None;
        }
        frame.upvalues.push(UpvalueDesc { index, is_local });
        Some((frame.upvalues.len() - 1) as u8)
    }

    // ---- declarations and statements ------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let name_token = self.previous;
        let name_constant = self.identifier_constant(name_token.lexeme);
        self.declare_variable();

        let interned = self.heap.intern(name_token.lexeme);
        self.emit_op(OpCode::Class);
        self.emit_byte(name_constant);
        self.define_variable(name_constant);
        let _ = interned;

        self.class_stack.push(ClassContext { has_superclass: false });

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable(false);
            if self.previous.lexeme == name_token.lexeme {
                self.error_kind(CompileErrorKind::ClassInheritsFromItself);
            }
            self.begin_scope();
            self.add_local(Token { kind: TokenKind::Super, lexeme: "super", line: 0 });
            self.define_variable(0);
            self.named_variable(name_token, false);
            self.emit_op(OpCode::Inherit);
            self.class_stack.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(name_token, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop); // the class itself, pushed by `named_variable` above

        if self.class_stack.last().unwrap().has_superclass {
            self.end_scope();
        }
        self.class_stack.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme;
        let constant = self.identifier_constant(name);
        let function_type = if name == "init" { FunctionType::Initializer } else { FunctionType::Method };
        self.function(function_type);
        self.emit_op(OpCode::Method);
        self.emit_byte(constant);
    }

    fn function(&mut self, function_type: FunctionType) {
        let name = if function_type == FunctionType::Script {
            None
        } else {
            Some(self.heap.intern(self.previous.lexeme))
        };
        let func = self.heap.alloc_function();
        unsafe {
            (*func.as_ptr()).data.name = name;
        }
        self.frames.push(FunctionFrame::new(func, function_type));

        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let arity = unsafe { (*func.as_ptr()).data.arity as usize };
                if arity >= MAX_ARGS {
                    self.error_kind(CompileErrorKind::TooManyParameters);
                }
                unsafe {
                    (*func.as_ptr()).data.arity += 1;
                }
                let param = self.parse_variable("Expect parameter name.");
                self.define_variable(param);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (compiled, upvalues) = self.end_function();
        let constant = self.make_constant(Value::Obj(crate::object::Obj::Function(compiled)));
        self.emit_op(OpCode::Closure);
        self.emit_byte(constant);
        for uv in upvalues {
            self.emit_byte(if uv.is_local { 1 } else { 0 });
            self.emit_byte(uv.index);
        }
    }

    /// Pops the current function frame, finishing its chunk with an implicit return, and
    /// returns the compiled function together with the upvalue descriptors it captured
    /// (the caller needs these to emit the `Closure` instruction's variable-length tail,
    /// and the frame holding them is gone once this returns).
    fn end_function(&mut self) -> (FunctionRef, Vec<UpvalueDesc>) {
        self.emit_return();
        let frame = self.frames.pop().expect("frame pushed by compile()/function()");
        unsafe {
            (*frame.function.as_ptr()).data.upvalue_count = frame.upvalues.len() as u8;
        }
        (frame.function, frame.upvalues)
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn return_statement(&mut self) {
        if self.frames.len() == 1 {
            self.error_kind(CompileErrorKind::ReturnOutsideFunction);
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.frame().function_type == FunctionType::Initializer {
                self.error_kind(CompileErrorKind::ReturnValueFromInitializer);
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk().len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk().len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    // ---- expressions -----------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = get_rule(self.previous.kind).prefix;
        let Some(prefix_fn) = prefix else {
            self.error("Expect expression.".to_string());
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix_fn(self, can_assign);

        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            let infix = get_rule(self.previous.kind).infix;
            if let Some(infix_fn) = infix {
                infix_fn(self, can_assign);
            }
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error_kind(CompileErrorKind::InvalidAssignmentTarget);
        }
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().expect("scanner only emits valid number lexemes");
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let contents = &lexeme[1..lexeme.len() - 1];
        let interned = self.heap.intern(contents);
        self.emit_constant(Value::Obj(crate::object::Obj::String(interned)));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => unreachable!("literal() only dispatched for false/true/nil"),
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, _can_assign: bool) {
        let op_kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op_kind {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!("unary() only dispatched for -/!"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let op_kind = self.previous.kind;
        let rule = get_rule(op_kind);
        self.parse_precedence(rule.precedence.next());
        match op_kind {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            _ => unreachable!("binary() only dispatched for binary operator tokens"),
        }
    }

    fn and_(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_op(OpCode::Call);
        self.emit_byte(arg_count);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::SetProperty);
            self.emit_byte(name);
        } else if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.emit_op(OpCode::Invoke);
            self.emit_byte(name);
            self.emit_byte(arg_count);
        } else {
            self.emit_op(OpCode::GetProperty);
            self.emit_byte(name);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count >= MAX_ARGS {
                    self.error_kind(CompileErrorKind::TooManyArguments);
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count as u8
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous;
        self.named_variable(name, can_assign);
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let level = self.frames.len() - 1;
        let local = Self::resolve_local(&self.frames[level], name.lexeme);
        let (get_op, set_op, arg) = match local {
            Ok(Some(idx)) => (OpCode::GetLocal, OpCode::SetLocal, idx),
            Ok(None) => match Self::resolve_upvalue(&mut self.frames, level, name.lexeme) {
                Some(idx) => (OpCode::GetUpvalue, OpCode::SetUpvalue, idx),
                None => {
                    let idx = self.identifier_constant(name.lexeme);
                    (OpCode::GetGlobal, OpCode::SetGlobal, idx)
                }
            },
            Err(()) => {
                self.error_kind(CompileErrorKind::ReadInOwnInitializer);
                (OpCode::GetLocal, OpCode::SetLocal, 0)
            }
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(set_op);
        } else {
            self.emit_op(get_op);
        }
        self.emit_byte(arg);
    }

    fn this_(&mut self, _can_assign: bool) {
        if self.class_stack.is_empty() {
            self.error_kind(CompileErrorKind::ThisOutsideClass);
            return;
        }
        self.variable(false);
    }

    fn super_(&mut self, _can_assign: bool) {
        match self.class_stack.last() {
            None => {
                self.error_kind(CompileErrorKind::SuperOutsideClass);
                return;
            }
            Some(ctx) if !ctx.has_superclass => {
                self.error_kind(CompileErrorKind::SuperWithNoSuperclass);
                return;
            }
            _ => {}
        }
        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let method = self.identifier_constant(self.previous.lexeme);

        let this_token = Token { kind: TokenKind::This, lexeme: "this", line: self.previous.line };
        let super_token = Token { kind: TokenKind::Super, lexeme: "super", line: self.previous.line };
        self.named_variable(this_token, false);
        if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable(super_token, false);
            self.emit_op(OpCode::SuperInvoke);
            self.emit_byte(method);
            self.emit_byte(arg_count);
        } else {
            self.named_variable(super_token, false);
            self.emit_op(OpCode::GetSuper);
            self.emit_byte(method);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(src: &str) -> (FunctionRef, Heap) {
        let mut heap = Heap::new();
        let result = Compiler::compile(src, &mut heap);
        match result {
            Ok(f) => (f, heap),
            Err(errs) => panic!("unexpected compile errors: {:?}", errs.iter().map(|e| e.to_string()).collect::<Vec<_>>()),
        }
    }

    #[test]
    fn compiles_arithmetic_expression_statement() {
        let (func, _heap) = compile_ok("1 + 2 * 3;");
        let chunk = unsafe { &(*func.as_ptr()).data.chunk };
        assert!(!chunk.is_empty());
    }

    #[test]
    fn rejects_return_outside_function() {
        let mut heap = Heap::new();
        let err = Compiler::compile("return 1;", &mut heap).unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn rejects_duplicate_local_in_same_scope() {
        let mut heap = Heap::new();
        let err = Compiler::compile("{ var a = 1; var a = 2; }", &mut heap).unwrap_err();
        assert!(matches!(err[0].kind, CompileErrorKind::DuplicateLocal));
    }

    #[test]
    fn rejects_self_read_in_own_initializer() {
        let mut heap = Heap::new();
        let err = Compiler::compile("{ var a = a; }", &mut heap).unwrap_err();
        assert!(matches!(err[0].kind, CompileErrorKind::ReadInOwnInitializer));
    }

    #[test]
    fn compiles_closures_and_classes_without_error() {
        let mut heap = Heap::new();
        let src = r#"
            class Counter {
                init() { this.n = 0; }
                next() {
                    fun bump() { this.n = this.n + 1; return this.n; }
                    return bump();
                }
            }
            var c = Counter();
            print c.next();
        "#;
        Compiler::compile(src, &mut heap).expect("should compile");
    }
}
