//! Heap object kinds and headers
//!
//! Every heap object is a header plus a kind payload. The header carries the
//! collector's bookkeeping: which generation the object lives in, how many
//! young cycles it has survived, its mark bit, whether it sits in the
//! remembered set, and its accounted size in bytes.
//!
//! Objects exist in exactly one generation at a time; movement is
//! unidirectional, young to old, on survival.

use crate::program::Program;
use crate::vm::NativeFn;
use erkao_core::{Chunk, ObjRef, Table, Value};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Young,
    Old,
}

#[derive(Debug)]
pub struct ObjHeader {
    pub generation: Generation,
    /// Young cycles survived; promotion happens at the configured age.
    pub age: u8,
    pub marked: bool,
    /// True while the object sits in the remembered set (old holder of a
    /// young reference). Keeps the set free of duplicates.
    pub remembered: bool,
    /// Accounted bytes, kept current through `track_resize`.
    pub size: usize,
}

#[derive(Debug)]
pub struct Obj {
    pub header: ObjHeader,
    pub kind: ObjKind,
}

/// Immutable interned string: bytes plus precomputed FNV-1a hash.
#[derive(Debug)]
pub struct StrObj {
    pub bytes: Box<str>,
    pub hash: u32,
}

/// A compiled function. Owns its chunk; a closure clone owns a fresh chunk
/// copy with reset caches.
#[derive(Debug)]
pub struct FunctionObj {
    /// Interned name; `None` for anonymous functions.
    pub name: Option<ObjRef>,
    /// Total declared parameters.
    pub arity: u8,
    /// Index of the first parameter with a default value; equals `arity`
    /// when there are no defaults.
    pub min_arity: u8,
    /// Class initializers return their receiver.
    pub is_initializer: bool,
    /// Interned parameter names, in declaration order.
    pub params: Vec<ObjRef>,
    pub chunk: Chunk,
    /// Captured lexical environment; `None` for prototypes that have not
    /// been closed over an environment yet.
    pub env: Option<ObjRef>,
    /// Owning program, for source locations in error reports.
    pub program: Option<Rc<Program>>,
}

#[derive(Debug)]
pub struct NativeObj {
    pub name: ObjRef,
    /// Declared arity; −1 means variadic.
    pub arity: i8,
    pub function: NativeFn,
}

#[derive(Debug)]
pub struct ClassObj {
    pub name: ObjRef,
    /// Method name → Function.
    pub methods: Table,
}

#[derive(Debug)]
pub struct InstanceObj {
    pub class: ObjRef,
    pub fields: Table,
}

#[derive(Debug)]
pub struct ArrayObj {
    pub items: Vec<Value>,
}

#[derive(Debug)]
pub struct MapObj {
    pub entries: Table,
}

#[derive(Debug)]
pub struct BoundMethodObj {
    pub receiver: Value,
    pub function: ObjRef,
}

/// Constructor for an enum variant with payload (arity > 0). Invoking it
/// builds the variant's `{name, values}` map.
#[derive(Debug)]
pub struct EnumCtorObj {
    pub enum_name: ObjRef,
    pub variant: ObjRef,
    pub arity: u8,
}

/// A lexical environment record. These live on the heap so the tracing
/// collector can handle class ↔ method ↔ environment cycles.
#[derive(Debug)]
pub struct EnvObj {
    pub values: Table,
    /// Interned names declared `const` in this record, sorted for binary
    /// search.
    pub consts: Vec<ObjRef>,
    pub enclosing: Option<ObjRef>,
}

#[derive(Debug)]
pub enum ObjKind {
    Str(StrObj),
    Function(FunctionObj),
    Native(NativeObj),
    Class(ClassObj),
    Instance(InstanceObj),
    Array(ArrayObj),
    Map(MapObj),
    BoundMethod(BoundMethodObj),
    EnumCtor(EnumCtorObj),
    Env(EnvObj),
}

impl ObjKind {
    /// Instances, arrays, maps, bound methods, and environments start young;
    /// strings, functions, natives, and classes start old.
    pub fn starting_generation(&self) -> Generation {
        match self {
            ObjKind::Instance(_)
            | ObjKind::Array(_)
            | ObjKind::Map(_)
            | ObjKind::BoundMethod(_)
            | ObjKind::Env(_) => Generation::Young,
            ObjKind::Str(_)
            | ObjKind::Function(_)
            | ObjKind::Native(_)
            | ObjKind::Class(_)
            | ObjKind::EnumCtor(_) => Generation::Old,
        }
    }

    /// Accounted byte footprint at allocation time.
    pub fn initial_size(&self) -> usize {
        let base = std::mem::size_of::<Obj>();
        base + match self {
            ObjKind::Str(s) => s.bytes.len(),
            ObjKind::Function(f) => {
                f.chunk.allocated_bytes() + f.params.capacity() * std::mem::size_of::<ObjRef>()
            }
            ObjKind::Native(_) => 0,
            ObjKind::Class(c) => c.methods.allocated_bytes(),
            ObjKind::Instance(i) => i.fields.allocated_bytes(),
            ObjKind::Array(a) => a.items.capacity() * std::mem::size_of::<Value>(),
            ObjKind::Map(m) => m.entries.allocated_bytes(),
            ObjKind::BoundMethod(_) => 0,
            ObjKind::EnumCtor(_) => 0,
            ObjKind::Env(e) => {
                e.values.allocated_bytes() + e.consts.capacity() * std::mem::size_of::<ObjRef>()
            }
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ObjKind::Str(_) => "string",
            ObjKind::Function(_) => "function",
            ObjKind::Native(_) => "native",
            ObjKind::Class(_) => "class",
            ObjKind::Instance(_) => "instance",
            ObjKind::Array(_) => "array",
            ObjKind::Map(_) => "map",
            ObjKind::BoundMethod(_) => "bound method",
            ObjKind::EnumCtor(_) => "enum constructor",
            ObjKind::Env(_) => "environment",
        }
    }
}

impl Obj {
    /// Visit every object reference this object holds. This is the single
    /// definition of the heap graph's edges: the collector traces with it,
    /// and allocation/promotion use it to keep the remembered set complete.
    ///
    /// Inline-cache slots count as edges — a cache must never dangle.
    pub fn each_ref(&self, mut f: impl FnMut(ObjRef)) {
        fn visit(value: Value, f: &mut impl FnMut(ObjRef)) {
            if let Value::Obj(r) = value {
                f(r);
            }
        }
        match &self.kind {
            ObjKind::Str(_) => {}
            ObjKind::Function(function) => {
                if let Some(name) = function.name {
                    f(name);
                }
                for param in &function.params {
                    f(*param);
                }
                if let Some(env) = function.env {
                    f(env);
                }
                for constant in function.chunk.constants() {
                    visit(*constant, &mut f);
                }
                for cache in function.chunk.caches() {
                    match *cache {
                        erkao_core::InlineCache::None => {}
                        erkao_core::InlineCache::Field { class, .. } => f(class),
                        erkao_core::InlineCache::Method { class, function } => {
                            f(class);
                            f(function);
                        }
                        erkao_core::InlineCache::Map { map, .. } => f(map),
                    }
                }
            }
            ObjKind::Native(native) => f(native.name),
            ObjKind::Class(class) => {
                f(class.name);
                for (key, value) in class.methods.iter() {
                    f(key);
                    visit(value, &mut f);
                }
            }
            ObjKind::Instance(instance) => {
                f(instance.class);
                for (key, value) in instance.fields.iter() {
                    f(key);
                    visit(value, &mut f);
                }
            }
            ObjKind::Array(array) => {
                for item in &array.items {
                    visit(*item, &mut f);
                }
            }
            ObjKind::Map(map) => {
                for (key, value) in map.entries.iter() {
                    f(key);
                    visit(value, &mut f);
                }
            }
            ObjKind::BoundMethod(bound) => {
                visit(bound.receiver, &mut f);
                f(bound.function);
            }
            ObjKind::EnumCtor(ctor) => {
                f(ctor.enum_name);
                f(ctor.variant);
            }
            ObjKind::Env(env) => {
                for (key, value) in env.values.iter() {
                    f(key);
                    visit(value, &mut f);
                }
                for name in &env.consts {
                    f(*name);
                }
                if let Some(enclosing) = env.enclosing {
                    f(enclosing);
                }
            }
        }
    }

    pub fn new(kind: ObjKind) -> Self {
        let size = kind.initial_size();
        Obj {
            header: ObjHeader {
                generation: kind.starting_generation(),
                age: 0,
                marked: false,
                remembered: false,
                size,
            },
            kind,
        }
    }
}
