//! Tri-colour generational collection
//!
//! Two generations, non-moving. Minor cycles look only at young objects,
//! seeded from the roots and the remembered set; major cycles trace the full
//! graph and treat the interned-string table as weak. The collector runs
//! only when the mutator asks (yield points), so no mutation can race a
//! cycle.
//!
//! Colour encoding: white = unmarked, gray = on the worklist, black = marked
//! and scanned. After every cycle all survivors are white again and the
//! remembered set holds exactly the old objects with young references.

use crate::object::Generation;
use crate::vm::Vm;
use erkao_core::{ObjRef, Value};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Minor,
    Major,
}

pub fn collect(vm: &mut Vm, kind: CollectionKind) {
    match kind {
        CollectionKind::Minor => minor(vm),
        CollectionKind::Major => major(vm),
    }
}

/// Mark a young object and queue it for scanning. Old targets are ignored:
/// old-to-young edges are covered by the remembered set, and old objects are
/// not collected in a minor cycle.
fn mark_young(vm: &mut Vm, target: ObjRef, gray: &mut Vec<ObjRef>) {
    let header = &mut vm.heap.get_mut(target).header;
    if header.generation == Generation::Young && !header.marked {
        header.marked = true;
        gray.push(target);
    }
}

fn mark_any(vm: &mut Vm, target: ObjRef, gray: &mut Vec<ObjRef>) {
    let header = &mut vm.heap.get_mut(target).header;
    if !header.marked {
        header.marked = true;
        gray.push(target);
    }
}

/// Drain the gray worklist, marking through each object's edges.
fn trace(vm: &mut Vm, gray: &mut Vec<ObjRef>, young_only: bool) {
    let mut scratch = Vec::new();
    while let Some(r) = gray.pop() {
        scratch.clear();
        vm.heap.get(r).each_ref(|target| scratch.push(target));
        for &target in &scratch {
            if young_only {
                mark_young(vm, target, gray);
            } else {
                mark_any(vm, target, gray);
            }
        }
    }
}

fn minor(vm: &mut Vm) {
    let young_list = std::mem::take(&mut vm.heap.young);
    for &r in &young_list {
        vm.heap.get_mut(r).header.marked = false;
    }

    // Seed: young objects reachable from roots, plus everything young that a
    // remembered old object points at.
    let mut gray = Vec::new();
    for value in vm.roots() {
        if let Value::Obj(r) = value {
            mark_young(vm, r, &mut gray);
        }
    }
    let remembered = std::mem::take(&mut vm.heap.remembered);
    let mut scratch = Vec::new();
    for &holder in &remembered {
        scratch.clear();
        vm.heap.get(holder).each_ref(|target| scratch.push(target));
        for &target in &scratch {
            mark_young(vm, target, &mut gray);
        }
    }

    trace(vm, &mut gray, true);

    // Sweep young: free the white, age the survivors, promote the old-enough.
    let promotion_age = vm.heap.config.promotion_age;
    let mut surviving_bytes = 0usize;
    let mut promoted_bytes = 0usize;
    let mut new_young = Vec::new();
    let mut promoted = Vec::new();
    for r in young_list {
        if !vm.heap.get(r).header.marked {
            vm.heap.free(r);
            continue;
        }
        let header = &mut vm.heap.get_mut(r).header;
        header.marked = false;
        header.age += 1;
        surviving_bytes += header.size;
        if header.age >= promotion_age {
            header.generation = Generation::Old;
            header.remembered = false;
            promoted_bytes += header.size;
            promoted.push(r);
        } else {
            new_young.push(r);
        }
    }
    vm.heap.young = new_young;
    vm.heap.old.extend(&promoted);
    vm.heap.stats.objects_promoted += promoted.len() as u64;

    // A promoted object may still point at objects that stayed young; such
    // edges re-enter the remembered set here, not through the barrier.
    for r in promoted {
        vm.heap.remember_if_pointing_young(r);
    }
    // Refresh the old remembered entries: drop the ones whose young targets
    // died or promoted.
    for r in remembered {
        vm.heap.get_mut(r).header.remembered = false;
        vm.heap.remember_if_pointing_young(r);
    }

    vm.heap.bytes_since_gc = 0;
    let growth = vm.heap.config.growth_factor;
    vm.heap.gc_next = ((surviving_bytes as f64 * growth) as usize).max(vm.heap.config.min_threshold);
    vm.heap.force_major = surviving_bytes > 0
        && promoted_bytes as f64 > surviving_bytes as f64 * vm.heap.config.promotion_rate_limit;
    vm.heap.stats.minor_cycles += 1;
    debug!(
        surviving_bytes,
        promoted_bytes,
        next_trigger = vm.heap.gc_next,
        force_major = vm.heap.force_major,
        "minor collection"
    );
}

fn major(vm: &mut Vm) {
    let young_list = std::mem::take(&mut vm.heap.young);
    let old_list = std::mem::take(&mut vm.heap.old);
    for &r in young_list.iter().chain(&old_list) {
        let header = &mut vm.heap.get_mut(r).header;
        header.marked = false;
        header.remembered = false;
    }
    vm.heap.remembered.clear();

    let mut gray = Vec::new();
    for value in vm.roots() {
        if let Value::Obj(r) = value {
            mark_any(vm, r, &mut gray);
        }
    }
    trace(vm, &mut gray, false);

    // The string table holds its entries weakly: an interned string nobody
    // else references is reclaimed, and its table entry goes first.
    let heap = &vm.heap;
    vm.strings.retain(|_, r| heap.get(*r).header.marked);

    let promotion_age = vm.heap.config.promotion_age;
    let mut new_young = Vec::new();
    let mut new_old = Vec::new();
    for r in young_list {
        if !vm.heap.get(r).header.marked {
            vm.heap.free(r);
            continue;
        }
        let header = &mut vm.heap.get_mut(r).header;
        header.marked = false;
        header.age += 1;
        if header.age >= promotion_age {
            header.generation = Generation::Old;
            vm.heap.stats.objects_promoted += 1;
            new_old.push(r);
        } else {
            new_young.push(r);
        }
    }
    for r in old_list {
        if !vm.heap.get(r).header.marked {
            vm.heap.free(r);
            continue;
        }
        vm.heap.get_mut(r).header.marked = false;
        new_old.push(r);
    }
    vm.heap.young = new_young;
    vm.heap.old = new_old;

    // Rebuild the remembered set from scratch: scan every old survivor for
    // surviving young targets.
    let old_survivors = vm.heap.old.clone();
    for r in old_survivors {
        vm.heap.remember_if_pointing_young(r);
    }

    vm.heap.bytes_since_gc = 0;
    let growth = vm.heap.config.growth_factor;
    vm.heap.gc_next =
        ((vm.heap.live_bytes as f64 * growth) as usize).max(vm.heap.config.min_threshold);
    vm.heap.force_major = false;
    vm.heap.stats.major_cycles += 1;
    debug!(
        live_bytes = vm.heap.live_bytes,
        objects = vm.heap.object_count(),
        next_trigger = vm.heap.gc_next,
        "major collection"
    );
}
