//! Heap object model. Every object shares a `GCObject<T>` header — `mark`, `kind`, and an
//! intrusive `next` pointer threading it onto the VM's object list — and a cast-to-header-only
//! trick lets the sweeper walk a singly-linked list of differently-typed payloads through one
//! raw pointer type.
//!
//! Object references (`ObjRef<T>`) are non-owning, non-null raw pointers into heap slots
//! the `Heap` allocated; the GC, not Rust's ownership system, is responsible for freeing
//! them. That's unavoidable for a cyclic, precisely-collected object graph.

use std::fmt;
use std::ptr::NonNull;

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;
use crate::vm::Vm;
use crate::error::RuntimeErrorKind;

/// Runtime type tag stored in every object header, used by the sweeper to know which
/// concrete type to reconstruct and drop (see `Heap::sweep`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    String,
    Function,
    Native,
    Closure,
    Upvalue,
    Class,
    Instance,
    BoundMethod,
}

/// Placeholder payload used only when a pointer needs to be handled purely by its header
/// (mark bit, kind, list link) without knowing its real payload type.
pub struct HeaderOnly;

#[repr(C)]
pub struct GCObject<T> {
    pub mark: bool,
    pub kind: ObjKind,
    pub next: *mut GCObject<HeaderOnly>,
    pub data: T,
}

/// Non-owning handle to a heap object of known payload type `T`.
pub type ObjRef<T> = NonNull<GCObject<T>>;

pub type StringRef = ObjRef<LoxString>;
pub type FunctionRef = ObjRef<LoxFunction>;
pub type NativeRef = ObjRef<NativeFn>;
pub type ClosureRef = ObjRef<Closure>;
pub type UpvalueRef = ObjRef<UpvalueObj>;
pub type ClassRef = ObjRef<Class>;
pub type InstanceRef = ObjRef<Instance>;
pub type BoundMethodRef = ObjRef<BoundMethod>;

/// A reference to any heap object, tagged by the concrete pointer type it carries, rather
/// than a single type-erased pointer with a runtime downcast on every access.
#[derive(Debug, Clone, Copy)]
pub enum Obj {
    String(StringRef),
    Function(FunctionRef),
    Native(NativeRef),
    Closure(ClosureRef),
    Upvalue(UpvalueRef),
    Class(ClassRef),
    Instance(InstanceRef),
    BoundMethod(BoundMethodRef),
}

impl Obj {
    pub fn kind(self) -> ObjKind {
        match self {
            Obj::String(_) => ObjKind::String,
            Obj::Function(_) => ObjKind::Function,
            Obj::Native(_) => ObjKind::Native,
            Obj::Closure(_) => ObjKind::Closure,
            Obj::Upvalue(_) => ObjKind::Upvalue,
            Obj::Class(_) => ObjKind::Class,
            Obj::Instance(_) => ObjKind::Instance,
            Obj::BoundMethod(_) => ObjKind::BoundMethod,
        }
    }

    /// Header pointer, valid for any kind — used uniformly by the GC.
    pub fn header(self) -> *mut GCObject<HeaderOnly> {
        match self {
            Obj::String(p) => p.as_ptr() as *mut GCObject<HeaderOnly>,
            Obj::Function(p) => p.as_ptr() as *mut GCObject<HeaderOnly>,
            Obj::Native(p) => p.as_ptr() as *mut GCObject<HeaderOnly>,
            Obj::Closure(p) => p.as_ptr() as *mut GCObject<HeaderOnly>,
            Obj::Upvalue(p) => p.as_ptr() as *mut GCObject<HeaderOnly>,
            Obj::Class(p) => p.as_ptr() as *mut GCObject<HeaderOnly>,
            Obj::Instance(p) => p.as_ptr() as *mut GCObject<HeaderOnly>,
            Obj::BoundMethod(p) => p.as_ptr() as *mut GCObject<HeaderOnly>,
        }
    }

    /// Reference-identity equality. Strings are interned, so this is also correct string
    /// equality without a byte-for-byte comparison.
    pub fn ptr_eq(self, other: Obj) -> bool {
        self.header() == other.header()
    }

    pub fn type_name(self) -> &'static str {
        match self {
            Obj::String(_) => "string",
            Obj::Function(_) => "function",
            Obj::Native(_) => "native function",
            Obj::Closure(_) => "function",
            Obj::Upvalue(_) => "upvalue",
            Obj::Class(_) => "class",
            Obj::Instance(_) => "instance",
            Obj::BoundMethod(_) => "function",
        }
    }
}

impl fmt::Display for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Obj::String(p) => write!(f, "{}", unsafe { &p.as_ref().data.data }),
            Obj::Function(p) => match unsafe { p.as_ref().data.name } {
                Some(name) => write!(f, "<fn {}>", unsafe { &name.as_ref().data.data }),
                None => write!(f, "<script>"),
            },
            Obj::Native(_) => write!(f, "<native fn>"),
            Obj::Closure(p) => {
                let func = unsafe { p.as_ref().data.function };
                write!(f, "{}", Obj::Function(func))
            }
            Obj::Upvalue(_) => write!(f, "<upvalue>"),
            Obj::Class(p) => write!(f, "{}", unsafe { &p.as_ref().data.name.as_ref().data.data }),
            Obj::Instance(p) => {
                let class = unsafe { p.as_ref().data.class };
                write!(f, "{} instance", unsafe { &class.as_ref().data.name.as_ref().data.data })
            }
            Obj::BoundMethod(p) => {
                let method = unsafe { p.as_ref().data.method };
                write!(f, "{}", Obj::Closure(method))
            }
        }
    }
}

/// Immutable UTF-8 payload plus its cached FNV-1a hash. `Heap::intern` guarantees at most
/// one `LoxString` per distinct byte sequence exists at a time.
pub struct LoxString {
    pub data: String,
    pub hash: u32,
}

pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// A compiled function: fixed arity, upvalue count, its own chunk, and an optional name.
/// Top-level script code is compiled as an anonymous `LoxFunction` with arity 0.
pub struct LoxFunction {
    pub arity: u8,
    pub upvalue_count: u8,
    pub chunk: Chunk,
    pub name: Option<StringRef>,
}

impl LoxFunction {
    pub fn new() -> Self {
        LoxFunction { arity: 0, upvalue_count: 0, chunk: Chunk::new(), name: None }
    }
}

pub type NativeFnPtr = fn(&mut Vm, &[Value]) -> Result<Value, RuntimeErrorKind>;

/// An opaque host callable. A slice is the natural Rust equivalent of the base-pointer-plus-
/// count convention native functions traditionally receive their arguments through.
pub struct NativeFn {
    pub name: &'static str,
    pub arity: u8,
    pub func: NativeFnPtr,
}

/// Non-owning handle to a `LoxFunction` plus the upvalues it closed over. The upvalue
/// array's length always equals `function.upvalue_count`, fixed at compile time.
pub struct Closure {
    pub function: FunctionRef,
    pub upvalues: Vec<UpvalueRef>,
}

#[derive(Clone, Copy)]
pub enum UpvalueState {
    /// Points at a live stack slot by absolute index into the VM's value stack.
    Open(usize),
    Closed(Value),
}

pub struct UpvalueObj {
    pub state: UpvalueState,
}

pub struct Class {
    pub name: StringRef,
    pub methods: Table,
}

impl Class {
    pub fn new(name: StringRef) -> Self {
        Class { name, methods: Table::new() }
    }
}

pub struct Instance {
    pub class: ClassRef,
    pub fields: Table,
}

impl Instance {
    pub fn new(class: ClassRef) -> Self {
        Instance { class, fields: Table::new() }
    }
}

/// A receiver bound to a method closure. Calling one installs `receiver` into slot 0 of
/// the new frame in place of the closure that would normally occupy it.
pub struct BoundMethod {
    pub receiver: Value,
    pub method: ClosureRef,
}
