//! Integration tests for the generational collector
//!
//! These exercise the collector through the public VM surface the way the
//! interpreter would: allocate, root things on the stack, collect at yield
//! points, and observe survival, promotion, and accounting.

use erkao_core::Value;
use erkao_runtime::{CollectionKind, Generation, GcConfig, Vm, VmConfig};

fn small_heap_vm() -> Vm {
    let config = VmConfig::default().with_gc(GcConfig {
        min_threshold: 512,
        ..GcConfig::default()
    });
    Vm::with_config(config)
}

#[test]
fn test_minor_frees_unreachable_young() {
    let mut vm = Vm::new();
    let reachable = vm.heap.alloc_array(vec![]);
    vm.stack.push(Value::Obj(reachable));
    let garbage = vm.heap.alloc_array(vec![]);

    vm.collect(CollectionKind::Minor);

    assert!(vm.heap.try_get(garbage).is_none());
    let survivor = vm.heap.try_get(reachable).expect("rooted object survives");
    assert!(!survivor.header.marked);
    assert_eq!(survivor.header.age, 1);
}

#[test]
fn test_generation_is_monotonic_young_to_old() {
    let mut vm = Vm::new();
    let arr = vm.heap.alloc_array(vec![]);
    vm.stack.push(Value::Obj(arr));
    assert_eq!(vm.heap.generation_of(arr), Generation::Young);

    vm.collect(CollectionKind::Minor);
    assert_eq!(vm.heap.generation_of(arr), Generation::Young);

    vm.collect(CollectionKind::Minor);
    assert_eq!(vm.heap.generation_of(arr), Generation::Old);

    // Never demoted, not even by a major cycle.
    vm.collect(CollectionKind::Major);
    assert_eq!(vm.heap.generation_of(arr), Generation::Old);
    assert!(vm.gc_stats().objects_promoted >= 1);
}

#[test]
fn test_write_barrier_keeps_young_alive_through_old_holder() {
    let mut vm = Vm::new();
    // An old holder: a class, rooted on the stack.
    let class_name = vm.intern("Holder");
    let class = vm.alloc_class(class_name);
    vm.stack.push(Value::Obj(class));

    // A young object reachable only through the old holder.
    let young = vm.heap.alloc_array(vec![Value::Number(42.0)]);
    let method_name = vm.intern("payload");
    vm.heap.class_add_method(class, method_name, Value::Obj(young));
    assert!(vm.heap.is_remembered(class));

    vm.collect(CollectionKind::Minor);

    let survivor = vm.heap.try_get(young).expect("remembered edge keeps it alive");
    assert_eq!(survivor.header.age, 1);
}

#[test]
fn test_remembered_set_drains_after_promotion() {
    let mut vm = Vm::new();
    let class_name = vm.intern("Holder");
    let class = vm.alloc_class(class_name);
    vm.stack.push(Value::Obj(class));
    let young = vm.heap.alloc_array(vec![]);
    let method_name = vm.intern("payload");
    vm.heap.class_add_method(class, method_name, Value::Obj(young));

    // Two minor cycles promote the target; the holder's old->young edge is
    // gone, so the remembered flag must drop with it.
    vm.collect(CollectionKind::Minor);
    assert!(vm.heap.is_remembered(class));
    vm.collect(CollectionKind::Minor);
    assert_eq!(vm.heap.generation_of(young), Generation::Old);
    assert!(!vm.heap.is_remembered(class));
}

#[test]
fn test_major_reclaims_cyclic_garbage() {
    let mut vm = Vm::new();
    // class <-> instance cycle, unreachable once popped from the stack.
    let class_name = vm.intern("Cyclic");
    let class = vm.alloc_class(class_name);
    vm.stack.push(Value::Obj(class));
    let instance = vm.alloc_instance(class);
    let back = vm.intern("back");
    vm.heap.instance_set(instance, back, Value::Obj(class));
    let selfref = vm.intern("selfRef");
    vm.heap.class_add_method(class, selfref, Value::Obj(instance));

    vm.collect(CollectionKind::Major);
    assert!(vm.heap.try_get(class).is_some());

    vm.stack.pop();
    vm.collect(CollectionKind::Major);
    assert!(vm.heap.try_get(class).is_none());
    assert!(vm.heap.try_get(instance).is_none());
}

#[test]
fn test_interned_strings_are_weak_for_major() {
    let mut vm = Vm::new();
    let before = vm.interned_count();
    let transient = vm.intern("nobody-references-this");
    assert_eq!(vm.interned_count(), before + 1);

    vm.collect(CollectionKind::Major);

    assert_eq!(vm.interned_count(), before);
    assert!(vm.heap.try_get(transient).is_none());

    // A rooted string survives and stays interned.
    let kept = vm.intern("kept");
    vm.stack.push(Value::Obj(kept));
    vm.collect(CollectionKind::Major);
    assert_eq!(vm.intern("kept"), kept);
}

#[test]
fn test_everything_reachable_is_present_and_unmarked_after_cycle() {
    let mut vm = Vm::new();
    let arr = vm.heap.alloc_array(vec![]);
    vm.stack.push(Value::Obj(arr));
    let map = vm.heap.alloc_map();
    let key = vm.intern("k");
    vm.heap.map_set(map, key, Value::Obj(arr));
    vm.stack.push(Value::Obj(map));

    vm.collect(CollectionKind::Minor);
    vm.collect(CollectionKind::Major);

    for value in vm.roots() {
        if let Value::Obj(r) = value {
            let obj = vm.heap.try_get(r).expect("reachable object present");
            assert!(!obj.header.marked);
        }
    }
}

#[test]
fn test_allocation_trigger_and_yield_point_contract() {
    let mut vm = small_heap_vm();
    assert!(!vm.heap.should_collect());

    // Allocate garbage until the trigger trips, as a hot loop would between
    // two Gc opcodes.
    while !vm.heap.should_collect() {
        vm.heap.alloc_array(Vec::with_capacity(8));
    }
    let cycles_before = vm.gc_stats().minor_cycles;
    vm.maybe_collect();
    assert_eq!(vm.gc_stats().minor_cycles, cycles_before + 1);
    assert!(!vm.heap.should_collect());
    assert!(vm.heap.next_trigger() >= 512);
}

#[test]
fn test_heavy_promotion_forces_major() {
    let mut vm = small_heap_vm();
    // Everything allocated here survives, so each minor cycle promotes the
    // whole surviving set once it ages past the threshold.
    let mut kept = Vec::new();
    for _ in 0..64 {
        let arr = vm.heap.alloc_array(Vec::with_capacity(16));
        vm.stack.push(Value::Obj(arr));
        kept.push(arr);
    }
    vm.collect(CollectionKind::Minor);
    vm.collect(CollectionKind::Minor);
    assert!(vm.heap.pending_major());

    while !vm.heap.should_collect() {
        vm.heap.alloc_array(Vec::with_capacity(8));
    }
    let majors_before = vm.gc_stats().major_cycles;
    vm.maybe_collect();
    assert_eq!(vm.gc_stats().major_cycles, majors_before + 1);
    assert!(!vm.heap.pending_major());
}

#[test]
fn test_module_cache_is_idempotent() {
    let mut vm = Vm::new();
    let exports = vm.heap.alloc_map();
    vm.modules.insert("/abs/path/mod.ek".to_string(), exports);

    let first = vm.modules.get("/abs/path/mod.ek").copied();
    let second = vm.modules.get("/abs/path/mod.ek").copied();
    assert_eq!(first, second);
    assert_eq!(first, Some(exports));

    // Cached exports are roots: a collection does not evict them.
    vm.collect(CollectionKind::Major);
    assert!(vm.heap.try_get(exports).is_some());
}
