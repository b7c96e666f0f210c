//! VM state: the heap's owner and the collector's root set
//!
//! One `Vm` is one single-threaded interpreter instance. The dispatch loop
//! itself lives outside this crate; everything it needs is here — the value
//! stack, call frames, handler frames, deferred calls, the global
//! environment, the module cache, and the interned-string table.

use crate::config::VmConfig;
use crate::error::RuntimeError;
use crate::gc::{self, CollectionKind};
use crate::heap::{GcStats, Heap};
use crate::object::{
    BoundMethodObj, ClassObj, EnumCtorObj, FunctionObj, InstanceObj, NativeObj, ObjKind,
};
use crate::program::Program;
use erkao_core::{Chunk, ObjRef, Value};
use std::collections::HashMap;
use std::rc::Rc;

/// Host-provided callable. Natives must not touch the VM from another
/// thread; they run synchronously inside the interpreter's turn.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, RuntimeError>;

/// One activation of a function.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub function: ObjRef,
    pub ip: usize,
    pub env: ObjRef,
    /// Actual argument count of this invocation; `ArgCount` pushes it.
    pub arg_count: u8,
}

/// Installed by `Try`; records the state to unwind to.
#[derive(Debug, Clone)]
pub struct HandlerFrame {
    pub catch_ip: usize,
    pub frame_depth: usize,
    pub stack_depth: usize,
    pub env: ObjRef,
}

/// A pending `defer`; runs when its scope exits, LIFO per scope.
#[derive(Debug, Clone)]
pub struct DeferRecord {
    pub callee: Value,
    pub scope_depth: usize,
}

pub struct Vm {
    pub heap: Heap,
    pub(crate) strings: HashMap<Box<str>, ObjRef>,
    pub globals: ObjRef,
    /// Module cache keyed by canonicalised path. An entry is inserted only
    /// after the module initialised successfully; re-import returns the
    /// cached exports map.
    pub modules: HashMap<String, ObjRef>,
    pub argv: Vec<Value>,
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    pub handlers: Vec<HandlerFrame>,
    pub defers: Vec<DeferRecord>,
    /// Runtime scope depth, maintained by `BeginScope`/`EndScope`. `EndScope`
    /// runs the deferred calls registered at the closing depth, LIFO.
    pub scope_depth: usize,
    /// Values pinned by native code while it builds multi-object structures.
    temp_roots: Vec<Value>,
    pub had_error: bool,
    programs: Vec<Rc<Program>>,
}

impl Vm {
    pub fn new() -> Self {
        Vm::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let mut heap = Heap::new(config.gc);
        let globals = heap.alloc_env(None);
        let mut vm = Vm {
            heap,
            strings: HashMap::new(),
            globals,
            modules: HashMap::new(),
            argv: Vec::new(),
            stack: Vec::new(),
            frames: Vec::new(),
            handlers: Vec::new(),
            defers: Vec::new(),
            scope_depth: 0,
            temp_roots: Vec::new(),
            had_error: false,
            programs: Vec::new(),
        };
        crate::natives::install_default_natives(&mut vm);
        vm
    }

    // ----- interning -----

    /// Intern a string: equal bytes always yield the same handle, so string
    /// equality at runtime is handle equality. Strings allocate old; the
    /// table entry is weak for major collections.
    pub fn intern(&mut self, text: &str) -> ObjRef {
        if let Some(&r) = self.strings.get(text) {
            return r;
        }
        let r = self.heap.alloc_string(text);
        self.strings.insert(text.into(), r);
        r
    }

    pub fn interned_count(&self) -> usize {
        self.strings.len()
    }

    // ----- allocation conveniences -----

    #[allow(clippy::too_many_arguments)]
    pub fn alloc_function(
        &mut self,
        name: Option<ObjRef>,
        arity: u8,
        min_arity: u8,
        is_initializer: bool,
        params: Vec<ObjRef>,
        chunk: Chunk,
        program: Option<Rc<Program>>,
    ) -> ObjRef {
        self.heap.alloc(ObjKind::Function(FunctionObj {
            name,
            arity,
            min_arity,
            is_initializer,
            params,
            chunk,
            env: None,
            program,
        }))
    }

    /// `Closure` contract: clone the prototype (chunk and all, caches reset)
    /// and bind the given environment.
    pub fn alloc_closure(&mut self, prototype: ObjRef, env: ObjRef) -> ObjRef {
        let (name, arity, min_arity, is_initializer, params, chunk, program) =
            match &self.heap.get(prototype).kind {
                ObjKind::Function(f) => (
                    f.name,
                    f.arity,
                    f.min_arity,
                    f.is_initializer,
                    f.params.clone(),
                    f.chunk.clone_for_closure(),
                    f.program.clone(),
                ),
                other => panic!("expected function, got {}", other.kind_name()),
            };
        self.heap.alloc(ObjKind::Function(FunctionObj {
            name,
            arity,
            min_arity,
            is_initializer,
            params,
            chunk,
            env: Some(env),
            program,
        }))
    }

    pub fn alloc_class(&mut self, name: ObjRef) -> ObjRef {
        self.heap.alloc(ObjKind::Class(ClassObj {
            name,
            methods: erkao_core::Table::new(),
        }))
    }

    pub fn alloc_instance(&mut self, class: ObjRef) -> ObjRef {
        self.heap.alloc(ObjKind::Instance(InstanceObj {
            class,
            fields: erkao_core::Table::new(),
        }))
    }

    pub fn alloc_bound_method(&mut self, receiver: Value, function: ObjRef) -> ObjRef {
        self.heap
            .alloc(ObjKind::BoundMethod(BoundMethodObj { receiver, function }))
    }

    pub fn alloc_enum_ctor(&mut self, enum_name: ObjRef, variant: ObjRef, arity: u8) -> ObjRef {
        self.heap.alloc(ObjKind::EnumCtor(EnumCtorObj {
            enum_name,
            variant,
            arity,
        }))
    }

    pub fn register_program(&mut self, program: Rc<Program>) {
        self.programs.push(program);
    }

    /// Define a native in the global environment.
    pub fn register_native(&mut self, name: &str, arity: i8, function: NativeFn) {
        let name_ref = self.intern(name);
        let native = self.heap.alloc(ObjKind::Native(NativeObj {
            name: name_ref,
            arity,
            function,
        }));
        let globals = self.globals;
        self.heap
            .env_define(globals, name_ref, Value::Obj(native), false)
            .expect("native name cannot collide with a constant at startup");
    }

    // ----- GC interface -----

    /// Pin a value across allocations inside native code. Balance with
    /// `unprotect`.
    pub fn protect(&mut self, value: Value) {
        self.temp_roots.push(value);
    }

    pub fn unprotect(&mut self) {
        self.temp_roots.pop();
    }

    /// Yield-point contract: the interpreter calls this at `Gc` opcodes,
    /// statement boundaries, and loop back-edges. Nothing else may collect.
    pub fn maybe_collect(&mut self) {
        if !self.heap.should_collect() {
            return;
        }
        let kind = if self.heap.force_major {
            CollectionKind::Major
        } else {
            CollectionKind::Minor
        };
        gc::collect(self, kind);
    }

    pub fn collect(&mut self, kind: CollectionKind) {
        gc::collect(self, kind);
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    /// Every value the collector must treat as reachable: the global and
    /// current environment chains (via frames), the value stack, handler
    /// frames, the module table, argv, pinned temporaries, and pending
    /// deferred callees. Environment chains and function chunks are reached
    /// by tracing from these.
    pub fn roots(&self) -> Vec<Value> {
        let mut roots = Vec::with_capacity(
            1 + self.stack.len()
                + self.frames.len() * 2
                + self.handlers.len()
                + self.modules.len()
                + self.argv.len()
                + self.temp_roots.len()
                + self.defers.len(),
        );
        roots.push(Value::Obj(self.globals));
        roots.extend(self.stack.iter().copied());
        for frame in &self.frames {
            roots.push(Value::Obj(frame.function));
            roots.push(Value::Obj(frame.env));
        }
        for handler in &self.handlers {
            roots.push(Value::Obj(handler.env));
        }
        roots.extend(self.modules.values().map(|&r| Value::Obj(r)));
        roots.extend(self.argv.iter().copied());
        roots.extend(self.temp_roots.iter().copied());
        roots.extend(self.defers.iter().map(|d| d.callee));
        roots
    }

    // ----- error propagation -----

    /// A runtime error propagates like a thrown map `{kind, message, line,
    /// column}` unless a handler is in scope.
    pub fn error_to_thrown(&mut self, error: &RuntimeError) -> Value {
        let map = self.heap.alloc_map();
        self.protect(Value::Obj(map));
        let kind_key = self.intern("kind");
        let kind_value = self.intern(error.kind.name());
        self.heap.map_set(map, kind_key, Value::Obj(kind_value));
        let message_key = self.intern("message");
        let message_value = self.intern(&error.message);
        self.heap.map_set(map, message_key, Value::Obj(message_value));
        if let Some(token) = &error.token {
            let (line, column) = (token.line, token.column);
            let line_key = self.intern("line");
            self.heap.map_set(map, line_key, Value::Number((line + 1) as f64));
            let column_key = self.intern("column");
            self.heap
                .map_set(map, column_key, Value::Number((column + 1) as f64));
        }
        self.unprotect();
        Value::Obj(map)
    }

    /// Fatal unhandled error: flag the VM and leave it reusable once the
    /// host clears the flag.
    pub fn report_fatal(&mut self, error: &RuntimeError) {
        eprintln!("{}", error);
        self.had_error = true;
    }

    pub fn clear_error(&mut self) {
        self.had_error = false;
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}
