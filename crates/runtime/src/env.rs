//! Environment records: lexical scoping over heap objects
//!
//! An environment is a chained record of `values` (a table keyed by interned
//! names), a `consts` mask, and an enclosing link. Records open and close at
//! scope boundaries (`BeginScope`/`EndScope`) and are captured by closures,
//! so they live on the heap and are traced like everything else.
//!
//! All operations are heap methods so every store fires the write barrier.

use crate::error::{ErrorKind, RuntimeError};
use crate::heap::Heap;
use crate::object::ObjKind;
use erkao_core::{ObjRef, Value};

impl Heap {
    fn env_parts(&self, env: ObjRef) -> &crate::object::EnvObj {
        match &self.get(env).kind {
            ObjKind::Env(e) => e,
            other => panic!("expected environment, got {}", other.kind_name()),
        }
    }

    pub fn env_enclosing(&self, env: ObjRef) -> Option<ObjRef> {
        self.env_parts(env).enclosing
    }

    /// Bind `name` in this record. Rebinding an existing name shadows it in
    /// place, except that a `const` binding cannot be replaced.
    pub fn env_define(
        &mut self,
        env: ObjRef,
        name: ObjRef,
        value: Value,
        is_const: bool,
    ) -> Result<(), RuntimeError> {
        let hash = self.string_hash(name);
        let mut resized = None;
        {
            let obj = self.get_mut(env);
            let ObjKind::Env(e) = &mut obj.kind else {
                panic!("expected environment, got {}", obj.kind.kind_name());
            };
            if e.consts.binary_search(&name).is_ok() {
                return Err(RuntimeError::new(
                    ErrorKind::AssignToConst,
                    "Cannot redeclare a constant",
                ));
            }
            e.values.set(name, hash, value, &mut resized);
            if is_const && let Err(slot) = e.consts.binary_search(&name) {
                e.consts.insert(slot, name);
            }
        }
        if let Some((old_bytes, new_bytes)) = resized {
            self.track_resize(env, old_bytes, new_bytes);
        }
        self.write_barrier(env, Value::Obj(name));
        self.write_barrier(env, value);
        Ok(())
    }

    /// Read a variable, walking the chain outward.
    pub fn env_get(&self, env: ObjRef, name: ObjRef) -> Option<Value> {
        let hash = self.string_hash(name);
        let mut current = Some(env);
        while let Some(record) = current {
            let e = self.env_parts(record);
            if let Some(value) = e.values.get(name, hash) {
                return Some(value);
            }
            current = e.enclosing;
        }
        None
    }

    /// Assign to the nearest existing binding. Undefined names and `const`
    /// bindings are runtime errors.
    pub fn env_assign(&mut self, env: ObjRef, name: ObjRef, value: Value) -> Result<(), RuntimeError> {
        let hash = self.string_hash(name);
        let mut current = Some(env);
        while let Some(record) = current {
            let found = {
                let e = self.env_parts(record);
                if e.consts.binary_search(&name).is_ok() {
                    return Err(RuntimeError::new(
                        ErrorKind::AssignToConst,
                        format!("Cannot assign to constant '{}'", self.string_bytes(name)),
                    ));
                }
                e.values.contains(name, hash)
            };
            if found {
                let mut resized = None;
                {
                    let obj = self.get_mut(record);
                    let ObjKind::Env(e) = &mut obj.kind else { unreachable!() };
                    e.values.set(name, hash, value, &mut resized);
                }
                if let Some((old_bytes, new_bytes)) = resized {
                    self.track_resize(record, old_bytes, new_bytes);
                }
                self.write_barrier(record, value);
                return Ok(());
            }
            current = self.env_parts(record).enclosing;
        }
        Err(RuntimeError::new(
            ErrorKind::UndefinedVariable,
            format!("Undefined variable '{}'", self.string_bytes(name)),
        ))
    }

    pub fn env_is_const(&self, env: ObjRef, name: ObjRef) -> bool {
        let mut current = Some(env);
        while let Some(record) = current {
            let e = self.env_parts(record);
            if e.consts.binary_search(&name).is_ok() {
                return true;
            }
            if e.values.get(name, self.string_hash(name)).is_some() {
                return false;
            }
            current = e.enclosing;
        }
        false
    }
}
