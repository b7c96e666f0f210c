//! Runtime value operations
//!
//! The semantic contracts behind the value-touching opcodes: equality,
//! stringification, `Add` overloading, length, indexing, and the rest
//! helpers the pattern bindings call (`arrayRest`, `mapRest`). The
//! interpreter and the default natives are both thin wrappers over these.

use crate::error::{ErrorKind, RuntimeError};
use crate::heap::Heap;
use crate::object::ObjKind;
use crate::vm::Vm;
use erkao_core::{ObjRef, Value};

/// Equality as `Equal` sees it: immediates by value, objects by identity.
/// Interning makes string identity equal byte equality.
pub fn values_equal(a: Value, b: Value) -> bool {
    a == b
}

/// Render a value the way `Stringify` and `print` do.
pub fn stringify(heap: &Heap, value: Value) -> String {
    let mut visiting = Vec::new();
    stringify_inner(heap, value, &mut visiting)
}

fn stringify_inner(heap: &Heap, value: Value, visiting: &mut Vec<ObjRef>) -> String {
    let Value::Obj(r) = value else {
        return value.to_string();
    };
    if visiting.contains(&r) {
        return "...".to_string();
    }
    match &heap.get(r).kind {
        ObjKind::Str(s) => s.bytes.to_string(),
        ObjKind::Array(a) => {
            visiting.push(r);
            let items: Vec<String> = a
                .items
                .iter()
                .map(|item| quote_if_string(heap, *item, visiting))
                .collect();
            visiting.pop();
            format!("[{}]", items.join(", "))
        }
        ObjKind::Map(m) => {
            visiting.push(r);
            let entries: Vec<String> = m
                .entries
                .iter()
                .map(|(key, val)| {
                    format!(
                        "\"{}\": {}",
                        heap.string_bytes(key),
                        quote_if_string(heap, val, visiting)
                    )
                })
                .collect();
            visiting.pop();
            format!("{{{}}}", entries.join(", "))
        }
        ObjKind::Function(f) => match f.name {
            Some(name) => format!("<fun {}>", heap.string_bytes(name)),
            None => "<fun>".to_string(),
        },
        ObjKind::Native(n) => format!("<native fun {}>", heap.string_bytes(n.name)),
        ObjKind::Class(c) => format!("<class {}>", heap.string_bytes(c.name)),
        ObjKind::Instance(i) => {
            let class_name = match &heap.get(i.class).kind {
                ObjKind::Class(c) => heap.string_bytes(c.name),
                _ => "?",
            };
            format!("<{} instance>", class_name)
        }
        ObjKind::BoundMethod(b) => stringify_inner(heap, Value::Obj(b.function), visiting),
        ObjKind::EnumCtor(e) => format!(
            "{}.{}",
            heap.string_bytes(e.enum_name),
            heap.string_bytes(e.variant)
        ),
        ObjKind::Env(_) => "<environment>".to_string(),
    }
}

/// Inside containers, strings print quoted so `["a"]` and `[a]` differ.
fn quote_if_string(heap: &Heap, value: Value, visiting: &mut Vec<ObjRef>) -> String {
    if let Value::Obj(r) = value
        && let ObjKind::Str(s) = &heap.get(r).kind
    {
        return format!("\"{}\"", s.bytes);
    }
    stringify_inner(heap, value, visiting)
}

/// `Add` overloading: numbers sum, strings concatenate, anything else is a
/// runtime error.
pub fn add(vm: &mut Vm, a: Value, b: Value) -> Result<Value, RuntimeError> {
    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        return Ok(Value::Number(x + y));
    }
    if let (Value::Obj(x), Value::Obj(y)) = (a, b)
        && let (ObjKind::Str(_), ObjKind::Str(_)) = (&vm.heap.get(x).kind, &vm.heap.get(y).kind)
    {
        let joined = format!("{}{}", vm.heap.string_bytes(x), vm.heap.string_bytes(y));
        return Ok(Value::Obj(vm.intern(&joined)));
    }
    Err(RuntimeError::new(
        ErrorKind::OperandType,
        "Operands of '+' must be two numbers or two strings",
    ))
}

/// `Len`: arrays, maps, and strings have one.
pub fn value_len(heap: &Heap, value: Value) -> Result<f64, RuntimeError> {
    match value {
        Value::Obj(r) => match &heap.get(r).kind {
            ObjKind::Array(a) => Ok(a.items.len() as f64),
            ObjKind::Map(m) => Ok(m.entries.len() as f64),
            ObjKind::Str(s) => Ok(s.bytes.chars().count() as f64),
            other => Err(RuntimeError::new(
                ErrorKind::OperandType,
                format!("Value of type {} has no length", other.kind_name()),
            )),
        },
        _ => Err(RuntimeError::new(
            ErrorKind::OperandType,
            "Value has no length",
        )),
    }
}

/// `GetIndex` contract. Arrays index by integer with the bounds law, maps by
/// string key (absent reads null), strings by integer producing a one-char
/// string.
pub fn index_get(vm: &mut Vm, receiver: Value, index: Value) -> Result<Value, RuntimeError> {
    let Value::Obj(r) = receiver else {
        return Err(not_indexable(receiver));
    };
    match &vm.heap.get(r).kind {
        ObjKind::Array(_) => {
            let i = number_index(index)?;
            vm.heap.array_get(r, i)
        }
        ObjKind::Map(_) => {
            let key = string_key(vm, index)?;
            Ok(vm.heap.map_get(r, key))
        }
        ObjKind::Str(s) => {
            let i = number_index(index)?;
            let text = s.bytes.to_string();
            let ch = text
                .chars()
                .nth(i as usize)
                .filter(|_| i.fract() == 0.0 && i >= 0.0)
                .ok_or_else(|| {
                    RuntimeError::new(
                        ErrorKind::IndexOutOfBounds,
                        format!("Index {} out of bounds for string of length {}", i, text.chars().count()),
                    )
                })?;
            Ok(Value::Obj(vm.intern(&ch.to_string())))
        }
        _ => Err(not_indexable(receiver)),
    }
}

/// `SetIndex` contract; strings are immutable.
pub fn index_set(
    vm: &mut Vm,
    receiver: Value,
    index: Value,
    value: Value,
) -> Result<(), RuntimeError> {
    let Value::Obj(r) = receiver else {
        return Err(not_indexable(receiver));
    };
    match &vm.heap.get(r).kind {
        ObjKind::Array(_) => {
            let i = number_index(index)?;
            vm.heap.array_set(r, i, value)
        }
        ObjKind::Map(_) => {
            let key = string_key(vm, index)?;
            vm.heap.map_set(r, key, value);
            Ok(())
        }
        _ => Err(not_indexable(receiver)),
    }
}

/// `arrayRest(arr, start)`: a fresh array of everything from `start` on.
/// Backs `BIND_ARRAY_REST`.
pub fn array_rest(heap: &mut Heap, array: ObjRef, start: usize) -> ObjRef {
    let rest: Vec<Value> = heap.array_items(array).iter().skip(start).copied().collect();
    heap.alloc_array(rest)
}

/// `mapRest(map, excludedKeys)`: a fresh map of every entry whose key is not
/// excluded. Backs `BIND_MAP_REST`.
pub fn map_rest(heap: &mut Heap, map: ObjRef, excluded: &[ObjRef]) -> ObjRef {
    let entries: Vec<(ObjRef, Value)> = match &heap.get(map).kind {
        ObjKind::Map(m) => m
            .entries
            .iter()
            .filter(|(key, _)| !excluded.contains(key))
            .collect(),
        other => panic!("expected map, got {}", other.kind_name()),
    };
    let rest = heap.alloc_map();
    for (key, value) in entries {
        heap.map_set(rest, key, value);
    }
    rest
}

fn number_index(index: Value) -> Result<f64, RuntimeError> {
    index.as_number().ok_or_else(|| {
        RuntimeError::new(ErrorKind::OperandType, "Index must be a number")
    })
}

fn string_key(vm: &mut Vm, index: Value) -> Result<ObjRef, RuntimeError> {
    match index {
        Value::Obj(r) if matches!(vm.heap.get(r).kind, ObjKind::Str(_)) => Ok(r),
        _ => Err(RuntimeError::new(
            ErrorKind::OperandType,
            "Map keys must be strings",
        )),
    }
}

fn not_indexable(receiver: Value) -> RuntimeError {
    RuntimeError::new(
        ErrorKind::OperandType,
        format!("Value {} is not indexable", receiver),
    )
}
