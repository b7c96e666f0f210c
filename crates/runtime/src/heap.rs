//! The object heap: a non-moving slab with generational bookkeeping
//!
//! Objects live in slots addressed by `ObjRef`; the collector never moves
//! them, so a handle stays valid for the object's lifetime and freed slots
//! are recycled through a free list.
//!
//! All mutation of array/map/instance/environment contents goes through heap
//! methods. That is what makes the write barrier unbypassable: there is no
//! way to store a reference into an object without the heap seeing it.

use crate::config::GcConfig;
use crate::error::{ErrorKind, RuntimeError};
use crate::object::{ArrayObj, EnvObj, Generation, MapObj, Obj, ObjKind, StrObj};
use erkao_core::{ObjRef, Table, Value, hash_bytes};
use tracing::trace;

/// Collector counters, reported through `Vm::gc_stats`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    pub minor_cycles: u64,
    pub major_cycles: u64,
    pub objects_freed: u64,
    pub objects_promoted: u64,
    pub bytes_reclaimed: u64,
}

#[derive(Debug)]
pub struct Heap {
    slots: Vec<Option<Obj>>,
    free: Vec<u32>,
    pub(crate) young: Vec<ObjRef>,
    pub(crate) old: Vec<ObjRef>,
    pub(crate) remembered: Vec<ObjRef>,
    /// Bytes of objects currently live (alloc minus free, resize-adjusted).
    pub(crate) live_bytes: usize,
    /// Bytes allocated since the last completed cycle; the trigger compares
    /// this against `gc_next`.
    pub(crate) bytes_since_gc: usize,
    pub(crate) gc_next: usize,
    /// Set when young promotion exceeded the configured rate; the next
    /// triggered cycle runs major.
    pub(crate) force_major: bool,
    pub(crate) config: GcConfig,
    pub(crate) stats: GcStats,
}

impl Heap {
    pub fn new(config: GcConfig) -> Self {
        let gc_next = config.min_threshold;
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            young: Vec::new(),
            old: Vec::new(),
            remembered: Vec::new(),
            live_bytes: 0,
            bytes_since_gc: 0,
            gc_next,
            force_major: false,
            config,
            stats: GcStats::default(),
        }
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    pub fn object_count(&self) -> usize {
        self.young.len() + self.old.len()
    }

    /// The interpreter checks this at yield points (`Gc` opcodes, statement
    /// boundaries, back-edges) and nowhere else; mutation between yield
    /// points can never race the collector.
    pub fn should_collect(&self) -> bool {
        self.bytes_since_gc >= self.gc_next
    }

    /// True when young promotion exceeded the configured rate and the next
    /// triggered cycle will run major.
    pub fn pending_major(&self) -> bool {
        self.force_major
    }

    /// Current allocation trigger in bytes.
    pub fn next_trigger(&self) -> usize {
        self.gc_next
    }

    pub fn generation_of(&self, r: ObjRef) -> Generation {
        self.get(r).header.generation
    }

    pub fn is_remembered(&self, r: ObjRef) -> bool {
        self.get(r).header.remembered
    }

    /// Allocate an object. New instances, arrays, maps, bound methods, and
    /// environments start young; strings, functions, natives, classes, and
    /// enum constructors start old. An object constructed old with
    /// references to young objects enters the remembered set immediately —
    /// construction is a store like any other.
    pub fn alloc(&mut self, kind: ObjKind) -> ObjRef {
        let obj = Obj::new(kind);
        let size = obj.header.size;
        let generation = obj.header.generation;
        self.live_bytes += size;
        self.bytes_since_gc += size;

        let r = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(obj);
                ObjRef(index)
            }
            None => {
                self.slots.push(Some(obj));
                ObjRef((self.slots.len() - 1) as u32)
            }
        };
        match generation {
            Generation::Young => self.young.push(r),
            Generation::Old => {
                self.old.push(r);
                self.remember_if_pointing_young(r);
            }
        }
        trace!(handle = r.0, bytes = size, since_gc = self.bytes_since_gc, "alloc");
        r
    }

    /// Return an object's slot to the free list. Only the collector calls
    /// this; generation lists are maintained by the sweep that freed it.
    pub(crate) fn free(&mut self, r: ObjRef) {
        if let Some(obj) = self.slots[r.index()].take() {
            self.live_bytes = self.live_bytes.saturating_sub(obj.header.size);
            self.stats.objects_freed += 1;
            self.stats.bytes_reclaimed += obj.header.size as u64;
            self.free.push(r.0);
        }
    }

    pub fn get(&self, r: ObjRef) -> &Obj {
        self.slots[r.index()].as_ref().expect("dangling object handle")
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        self.slots[r.index()].as_mut().expect("dangling object handle")
    }

    pub fn try_get(&self, r: ObjRef) -> Option<&Obj> {
        self.slots.get(r.index()).and_then(|s| s.as_ref())
    }

    /// Resize accounting for any growable payload (array buffer, table
    /// slots). Getting this wrong drifts trigger timing but cannot corrupt
    /// the heap, so the contract is one call per reallocation.
    pub fn track_resize(&mut self, r: ObjRef, old_bytes: usize, new_bytes: usize) {
        let header = &mut self.get_mut(r).header;
        header.size = header.size - old_bytes + new_bytes;
        if new_bytes > old_bytes {
            let growth = new_bytes - old_bytes;
            self.live_bytes += growth;
            self.bytes_since_gc += growth;
        } else {
            self.live_bytes = self.live_bytes.saturating_sub(old_bytes - new_bytes);
        }
    }

    /// The write barrier. Call on every store of `value` into `holder`;
    /// an old holder acquiring a young reference joins the remembered set.
    pub fn write_barrier(&mut self, holder: ObjRef, value: Value) {
        let Value::Obj(target) = value else { return };
        if self.get(holder).header.generation != Generation::Old {
            return;
        }
        if self.get(target).header.generation != Generation::Young {
            return;
        }
        let header = &mut self.get_mut(holder).header;
        if !header.remembered {
            header.remembered = true;
            self.remembered.push(holder);
        }
    }

    /// Scan a (newly old) object's edges; if any points at a young object,
    /// it must sit in the remembered set. Used at old-generation
    /// construction and at promotion.
    pub(crate) fn remember_if_pointing_young(&mut self, r: ObjRef) {
        let mut points_young = false;
        self.get(r).each_ref(|target| {
            if let Some(obj) = self.try_get(target)
                && obj.header.generation == Generation::Young
            {
                points_young = true;
            }
        });
        if points_young {
            let header = &mut self.get_mut(r).header;
            if !header.remembered {
                header.remembered = true;
                self.remembered.push(r);
            }
        }
    }

    // ----- string objects -----

    /// Raw string allocation; interning lives in the VM, which owns the
    /// string table.
    pub(crate) fn alloc_string(&mut self, text: &str) -> ObjRef {
        let hash = hash_bytes(text.as_bytes());
        self.alloc(ObjKind::Str(StrObj { bytes: text.into(), hash }))
    }

    pub fn string_bytes(&self, r: ObjRef) -> &str {
        match &self.get(r).kind {
            ObjKind::Str(s) => &s.bytes,
            other => panic!("expected string, got {}", other.kind_name()),
        }
    }

    pub fn string_hash(&self, r: ObjRef) -> u32 {
        match &self.get(r).kind {
            ObjKind::Str(s) => s.hash,
            other => panic!("expected string, got {}", other.kind_name()),
        }
    }

    // ----- arrays -----

    pub fn alloc_array(&mut self, items: Vec<Value>) -> ObjRef {
        self.alloc(ObjKind::Array(ArrayObj { items }))
    }

    pub fn alloc_array_with_capacity(&mut self, capacity: usize) -> ObjRef {
        self.alloc_array(Vec::with_capacity(capacity))
    }

    pub fn array_len(&self, array: ObjRef) -> usize {
        match &self.get(array).kind {
            ObjKind::Array(a) => a.items.len(),
            other => panic!("expected array, got {}", other.kind_name()),
        }
    }

    pub fn array_items(&self, array: ObjRef) -> &[Value] {
        match &self.get(array).kind {
            ObjKind::Array(a) => &a.items,
            other => panic!("expected array, got {}", other.kind_name()),
        }
    }

    pub fn array_push(&mut self, array: ObjRef, value: Value) {
        let (old_bytes, new_bytes) = {
            let obj = self.get_mut(array);
            let ObjKind::Array(a) = &mut obj.kind else {
                panic!("expected array, got {}", obj.kind.kind_name());
            };
            let old = a.items.capacity() * std::mem::size_of::<Value>();
            a.items.push(value);
            let new = a.items.capacity() * std::mem::size_of::<Value>();
            (old, new)
        };
        if new_bytes != old_bytes {
            self.track_resize(array, old_bytes, new_bytes);
        }
        self.write_barrier(array, value);
    }

    /// Indexed read with the array bounds law: `array[i]` succeeds iff
    /// `0 <= i < len`.
    pub fn array_get(&self, array: ObjRef, index: f64) -> Result<Value, RuntimeError> {
        let items = self.array_items(array);
        match checked_index(index, items.len()) {
            Some(i) => Ok(items[i]),
            None => Err(RuntimeError::new(
                ErrorKind::IndexOutOfBounds,
                format!("Index {} out of bounds for array of length {}", index, items.len()),
            )),
        }
    }

    pub fn array_set(&mut self, array: ObjRef, index: f64, value: Value) -> Result<(), RuntimeError> {
        {
            let obj = self.get_mut(array);
            let ObjKind::Array(a) = &mut obj.kind else {
                panic!("expected array, got {}", obj.kind.kind_name());
            };
            match checked_index(index, a.items.len()) {
                Some(i) => a.items[i] = value,
                None => {
                    let len = a.items.len();
                    return Err(RuntimeError::new(
                        ErrorKind::IndexOutOfBounds,
                        format!("Index {} out of bounds for array of length {}", index, len),
                    ));
                }
            }
        }
        self.write_barrier(array, value);
        Ok(())
    }

    // ----- maps -----

    pub fn alloc_map(&mut self) -> ObjRef {
        self.alloc(ObjKind::Map(MapObj { entries: Table::new() }))
    }

    pub fn map_len(&self, map: ObjRef) -> usize {
        match &self.get(map).kind {
            ObjKind::Map(m) => m.entries.len(),
            other => panic!("expected map, got {}", other.kind_name()),
        }
    }

    /// Absent keys read as null; absence is not an error.
    pub fn map_get(&self, map: ObjRef, key: ObjRef) -> Value {
        let hash = self.string_hash(key);
        match &self.get(map).kind {
            ObjKind::Map(m) => m.entries.get(key, hash).unwrap_or(Value::Null),
            other => panic!("expected map, got {}", other.kind_name()),
        }
    }

    pub fn map_has(&self, map: ObjRef, key: ObjRef) -> bool {
        let hash = self.string_hash(key);
        match &self.get(map).kind {
            ObjKind::Map(m) => m.entries.contains(key, hash),
            other => panic!("expected map, got {}", other.kind_name()),
        }
    }

    pub fn map_set(&mut self, map: ObjRef, key: ObjRef, value: Value) {
        let hash = self.string_hash(key);
        let mut resized = None;
        {
            let obj = self.get_mut(map);
            let ObjKind::Map(m) = &mut obj.kind else {
                panic!("expected map, got {}", obj.kind.kind_name());
            };
            m.entries.set(key, hash, value, &mut resized);
        }
        if let Some((old_bytes, new_bytes)) = resized {
            self.track_resize(map, old_bytes, new_bytes);
        }
        self.write_barrier(map, Value::Obj(key));
        self.write_barrier(map, value);
    }

    pub fn map_delete(&mut self, map: ObjRef, key: ObjRef) -> Option<Value> {
        let hash = self.string_hash(key);
        let obj = self.get_mut(map);
        let ObjKind::Map(m) = &mut obj.kind else {
            panic!("expected map, got {}", obj.kind.kind_name());
        };
        m.entries.delete(key, hash)
    }

    pub fn map_keys(&self, map: ObjRef) -> Vec<ObjRef> {
        match &self.get(map).kind {
            ObjKind::Map(m) => m.entries.keys().collect(),
            other => panic!("expected map, got {}", other.kind_name()),
        }
    }

    // ----- instances and classes -----

    pub fn instance_get(&self, instance: ObjRef, name: ObjRef) -> Option<Value> {
        let hash = self.string_hash(name);
        match &self.get(instance).kind {
            ObjKind::Instance(i) => i.fields.get(name, hash),
            other => panic!("expected instance, got {}", other.kind_name()),
        }
    }

    pub fn instance_set(&mut self, instance: ObjRef, name: ObjRef, value: Value) {
        let hash = self.string_hash(name);
        let mut resized = None;
        {
            let obj = self.get_mut(instance);
            let ObjKind::Instance(i) = &mut obj.kind else {
                panic!("expected instance, got {}", obj.kind.kind_name());
            };
            i.fields.set(name, hash, value, &mut resized);
        }
        if let Some((old_bytes, new_bytes)) = resized {
            self.track_resize(instance, old_bytes, new_bytes);
        }
        self.write_barrier(instance, Value::Obj(name));
        self.write_barrier(instance, value);
    }

    pub fn class_method(&self, class: ObjRef, name: ObjRef) -> Option<Value> {
        let hash = self.string_hash(name);
        match &self.get(class).kind {
            ObjKind::Class(c) => c.methods.get(name, hash),
            other => panic!("expected class, got {}", other.kind_name()),
        }
    }

    pub fn class_add_method(&mut self, class: ObjRef, name: ObjRef, function: Value) {
        let hash = self.string_hash(name);
        let mut resized = None;
        {
            let obj = self.get_mut(class);
            let ObjKind::Class(c) = &mut obj.kind else {
                panic!("expected class, got {}", obj.kind.kind_name());
            };
            c.methods.set(name, hash, function, &mut resized);
        }
        if let Some((old_bytes, new_bytes)) = resized {
            self.track_resize(class, old_bytes, new_bytes);
        }
        self.write_barrier(class, Value::Obj(name));
        self.write_barrier(class, function);
    }

    // ----- environments -----

    pub fn alloc_env(&mut self, enclosing: Option<ObjRef>) -> ObjRef {
        self.alloc(ObjKind::Env(EnvObj {
            values: Table::new(),
            consts: Vec::new(),
            enclosing,
        }))
    }
}

/// Array indices must be non-negative integers within bounds.
fn checked_index(index: f64, len: usize) -> Option<usize> {
    if index.fract() != 0.0 || index < 0.0 || !index.is_finite() {
        return None;
    }
    let i = index as usize;
    if i < len { Some(i) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Heap {
        Heap::new(GcConfig::default())
    }

    #[test]
    fn test_alloc_threads_generation_lists() {
        let mut h = heap();
        let s = h.alloc_string("hi");
        let a = h.alloc_array(vec![]);
        assert!(h.old.contains(&s));
        assert!(h.young.contains(&a));
        assert_eq!(h.object_count(), 2);
    }

    #[test]
    fn test_array_bounds_law() {
        let mut h = heap();
        let a = h.alloc_array(vec![Value::Number(1.0), Value::Number(2.0)]);
        assert_eq!(h.array_get(a, 1.0).unwrap(), Value::Number(2.0));
        assert!(h.array_get(a, 2.0).is_err());
        assert!(h.array_get(a, -1.0).is_err());
        assert!(h.array_get(a, 0.5).is_err());
        h.array_set(a, 0.0, Value::Number(9.0)).unwrap();
        assert_eq!(h.array_items(a), &[Value::Number(9.0), Value::Number(2.0)]);
    }

    #[test]
    fn test_map_absent_key_reads_null() {
        let mut h = heap();
        let m = h.alloc_map();
        let k = h.alloc_string("k");
        let missing = h.alloc_string("missing");
        h.map_set(m, k, Value::Number(1.0));
        assert_eq!(h.map_get(m, k), Value::Number(1.0));
        assert_eq!(h.map_get(m, missing), Value::Null);
        assert!(h.map_has(m, k));
        assert!(!h.map_has(m, missing));
    }

    #[test]
    fn test_write_barrier_remembers_old_holder() {
        let mut h = heap();
        let name = h.alloc_string("m");
        let class_name = h.alloc_string("C");
        let class = h.alloc(ObjKind::Class(crate::object::ClassObj {
            name: class_name,
            methods: Table::new(),
        }));
        // Class is old; storing a young instance value into it must remember it.
        let inst = h.alloc(ObjKind::Instance(crate::object::InstanceObj {
            class,
            fields: Table::new(),
        }));
        h.class_add_method(class, name, Value::Obj(inst));
        assert!(h.get(class).header.remembered);
        assert_eq!(h.remembered, vec![class]);
        // Barrier is idempotent per holder.
        h.class_add_method(class, name, Value::Obj(inst));
        assert_eq!(h.remembered.len(), 1);
    }

    #[test]
    fn test_young_holder_not_remembered() {
        let mut h = heap();
        let a = h.alloc_array(vec![]);
        let b = h.alloc_array(vec![]);
        h.array_push(a, Value::Obj(b));
        assert!(!h.get(a).header.remembered);
        assert!(h.remembered.is_empty());
    }

    #[test]
    fn test_track_resize_adjusts_accounting() {
        let mut h = heap();
        let a = h.alloc_array(vec![]);
        let before = h.live_bytes();
        let size_before = h.get(a).header.size;
        h.track_resize(a, 0, 256);
        assert_eq!(h.live_bytes(), before + 256);
        assert_eq!(h.get(a).header.size, size_before + 256);
        h.track_resize(a, 256, 64);
        assert_eq!(h.get(a).header.size, size_before + 64);
    }

    #[test]
    fn test_freed_slots_are_recycled() {
        let mut h = heap();
        let a = h.alloc_array(vec![]);
        h.young.clear();
        h.free(a);
        let b = h.alloc_array(vec![]);
        assert_eq!(a, b);
    }
}
