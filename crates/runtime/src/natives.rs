//! Default native functions
//!
//! Installed into every VM's globals at construction. The set is deliberately
//! small: output, timing, length, stringification, and the two rest helpers
//! the pattern compiler's bindings call through the normal call convention.

use crate::error::{ErrorKind, RuntimeError};
use crate::object::ObjKind;
use crate::value_ops;
use crate::vm::Vm;
use erkao_core::Value;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn install_default_natives(vm: &mut Vm) {
    vm.register_native("print", -1, native_print);
    vm.register_native("clock", 0, native_clock);
    vm.register_native("len", 1, native_len);
    vm.register_native("str", 1, native_str);
    vm.register_native("arrayRest", 2, native_array_rest);
    vm.register_native("mapRest", 2, native_map_rest);
    vm.register_native("__defer", 1, native_defer);
}

/// `defer expr;` lowers to a call of this native with the deferred callee.
/// `EndScope` runs the records registered at the closing depth in LIFO
/// order, whether the scope exits normally or by unwinding.
fn native_defer(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    vm.defers.push(crate::vm::DeferRecord {
        callee: args[0],
        scope_depth: vm.scope_depth,
    });
    Ok(Value::Null)
}

fn native_print(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let rendered: Vec<String> = args
        .iter()
        .map(|value| value_ops::stringify(&vm.heap, *value))
        .collect();
    println!("{}", rendered.join(" "));
    Ok(Value::Null)
}

fn native_clock(_vm: &mut Vm, _args: &[Value]) -> Result<Value, RuntimeError> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::Number(seconds))
}

fn native_len(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    value_ops::value_len(&vm.heap, args[0]).map(Value::Number)
}

fn native_str(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let rendered = value_ops::stringify(&vm.heap, args[0]);
    Ok(Value::Obj(vm.intern(&rendered)))
}

fn native_array_rest(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let array = match args[0] {
        Value::Obj(r) if matches!(vm.heap.get(r).kind, ObjKind::Array(_)) => r,
        other => {
            return Err(RuntimeError::new(
                ErrorKind::OperandType,
                format!("arrayRest: expected array, got {}", other),
            ));
        }
    };
    let start = args[1].as_number().unwrap_or(0.0).max(0.0) as usize;
    Ok(Value::Obj(value_ops::array_rest(&mut vm.heap, array, start)))
}

fn native_map_rest(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let map = match args[0] {
        Value::Obj(r) if matches!(vm.heap.get(r).kind, ObjKind::Map(_)) => r,
        other => {
            return Err(RuntimeError::new(
                ErrorKind::OperandType,
                format!("mapRest: expected map, got {}", other),
            ));
        }
    };
    let excluded = match args[1] {
        Value::Obj(r) if matches!(vm.heap.get(r).kind, ObjKind::Array(_)) => {
            let mut keys = Vec::new();
            for item in vm.heap.array_items(r) {
                if let Value::Obj(key) = item {
                    keys.push(*key);
                }
            }
            keys
        }
        _ => Vec::new(),
    };
    Ok(Value::Obj(value_ops::map_rest(&mut vm.heap, map, &excluded)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_installed() {
        let mut vm = Vm::new();
        for name in ["print", "clock", "len", "str", "arrayRest", "mapRest"] {
            let name_ref = vm.intern(name);
            let value = vm.heap.env_get(vm.globals, name_ref);
            assert!(value.is_some(), "missing native {}", name);
        }
    }

    #[test]
    fn test_len_native() {
        let mut vm = Vm::new();
        let arr = vm.heap.alloc_array(vec![Value::Null, Value::Null]);
        let result = native_len(&mut vm, &[Value::Obj(arr)]).unwrap();
        assert_eq!(result, Value::Number(2.0));
    }

    #[test]
    fn test_str_native_interns() {
        let mut vm = Vm::new();
        let result = native_str(&mut vm, &[Value::Number(7.0)]).unwrap();
        let expected = vm.intern("7");
        assert_eq!(result, Value::Obj(expected));
    }
}
