//! Error taxonomies: one for compile-time failures, one for the bytecode VM's runtime
//! failures, one for the tree-walker's resolver pass.
//!
//! Each `*Kind` enum is a `thiserror::Error` so every message lives next to the variant
//! that produces it; the outer `CompileError`/`RuntimeError`/`ResolveError` structs add the
//! source-line / stack-trace context around that message.

use std::fmt;

use crate::opcode::OpCode;

/// One diagnostic raised during scanning, parsing, or bytecode compilation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompileErrorKind {
    #[error("{0}")]
    Expected(String),
    #[error("Invalid assignment target.")]
    InvalidAssignmentTarget,
    #[error("Already a variable with this name in this scope.")]
    DuplicateLocal,
    #[error("Can't read local variable in its own initializer.")]
    ReadInOwnInitializer,
    #[error("Too many constants in one chunk.")]
    TooManyConstants,
    #[error("Too many local variables in function.")]
    TooManyLocals,
    #[error("Too many closure variables in function.")]
    TooManyUpvalues,
    #[error("Too many arguments.")]
    TooManyArguments,
    #[error("Too many parameters.")]
    TooManyParameters,
    #[error("Loop body too large.")]
    JumpTooLarge,
    #[error("Can't use 'this' outside of a class.")]
    ThisOutsideClass,
    #[error("Can't use 'super' outside of a class.")]
    SuperOutsideClass,
    #[error("Can't use 'super' in a class with no superclass.")]
    SuperWithNoSuperclass,
    #[error("A class can't inherit from itself.")]
    ClassInheritsFromItself,
    #[error("Can't return a value from an initializer.")]
    ReturnValueFromInitializer,
    #[error("Can't return from top-level code.")]
    ReturnOutsideFunction,
    #[error("Expect property name after '.'.")]
    ExpectPropertyName,
    #[error("{0}")]
    Other(String),
}

/// A compile error with the source line it occurred on. Only the first error in a
/// synchronization window is reported; the parser then syncs to the next statement
/// boundary and keeps scanning for further errors rather than aborting immediately.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub line: u32,
    pub kind: CompileErrorKind,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error: {}", self.line, self.kind)
    }
}

impl std::error::Error for CompileError {}

/// One stack frame in a runtime error's traceback.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub name: String,
    pub line: u32,
}

/// The taxonomy of runtime faults the VM can raise.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeErrorKind {
    #[error("Operand must be a number.")]
    OperandMustBeNumber,
    #[error("Operands must be numbers.")]
    OperandsMustBeNumbers,
    #[error("Operands must be two numbers or two strings.")]
    OperandsMustBeNumbersOrStrings,
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    #[error("Only instances have properties.")]
    OnlyInstancesHaveProperties,
    #[error("Undefined property '{0}'.")]
    UndefinedProperty(String),
    #[error("Can only call functions and classes.")]
    NotCallable,
    #[error("Expected {expected} arguments but got {got}.")]
    WrongArity { expected: usize, got: usize },
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("Superclass must be a class.")]
    SuperclassMustBeClass,
    #[error("Undefined property '{0}'.")]
    UndefinedSuperMethod(String),
    #[error("unsupported opcode {0:?} (internal compiler/VM bug)")]
    UnsupportedOpcode(OpCode),
}

/// A runtime fault, with the call-stack trace captured at the moment it was raised.
/// `frames` is innermost-first, matching the order the VM's call stack unwinds in.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub frames: Vec<TraceFrame>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.kind)?;
        for frame in &self.frames {
            let name = if frame.name.is_empty() { "script" } else { frame.name.as_str() };
            writeln!(f, "[line {}] in {}", frame.line, name)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Static-analysis errors raised by the tree-walker's resolver pass.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveErrorKind {
    #[error("Can't read local variable in its own initializer.")]
    ReadInOwnInitializer,
    #[error("Already a variable with this name in this scope.")]
    DuplicateLocal,
    #[error("Can't return from top-level code.")]
    ReturnOutsideFunction,
    #[error("Can't return a value from an initializer.")]
    ReturnValueFromInitializer,
    #[error("Can't use 'this' outside of a class.")]
    ThisOutsideClass,
    #[error("Can't use 'super' outside of a class.")]
    SuperOutsideClass,
    #[error("Can't use 'super' in a class with no superclass.")]
    SuperWithNoSuperclass,
    #[error("A class can't inherit from itself.")]
    ClassInheritsFromItself,
}

#[derive(Debug, Clone)]
pub struct ResolveError {
    pub line: u32,
    pub kind: ResolveErrorKind,
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error: {}", self.line, self.kind)
    }
}

impl std::error::Error for ResolveError {}
