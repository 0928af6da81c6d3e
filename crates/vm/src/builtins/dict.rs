//! `dict`.
//!
//! Storage is split: string keys, which namespaces are made of, live in an
//! insertion-ordered map keyed by the rust string; everything else is an
//! association list probed by hash and rich equality.

use crate::builtins::str::PyStr;
use crate::builtins::type_::PyTypeRef;
use crate::function::FuncArgs;
use crate::object::{PyObjectRef, PyPayload, PyRef, PyResult};
use crate::types::slot::PyComparisonOp;
use crate::vm::{Context, VirtualMachine};
use indexmap::IndexMap;
use itertools::Itertools;
use krait_common::hash::PyHash;
use krait_common::lock::PyRwLock;

pub type PyDictRef = PyRef<PyDict>;

type StrMap = IndexMap<String, PyObjectRef, ahash::RandomState>;

#[derive(Debug, Default)]
struct DictInner {
    str_map: StrMap,
    misc: Vec<(PyHash, PyObjectRef, PyObjectRef)>,
}

#[derive(Debug, Default)]
pub struct PyDict {
    inner: PyRwLock<DictInner>,
}

impl PyPayload for PyDict {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.dict_type
    }
}

impl PyDict {
    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.str_map.len() + inner.misc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // the string fast path used by namespaces

    pub fn get_item_str(&self, key: &str) -> Option<PyObjectRef> {
        self.inner.read().str_map.get(key).cloned()
    }

    pub fn set_item_str(&self, key: &str, value: PyObjectRef) {
        self.inner.write().str_map.insert(key.to_owned(), value);
    }

    pub fn del_item_str(&self, key: &str) -> bool {
        self.inner.write().str_map.shift_remove(key).is_some()
    }

    pub fn contains_key_str(&self, key: &str) -> bool {
        self.inner.read().str_map.contains_key(key)
    }

    fn find_misc(&self, hash: PyHash, key: &PyObjectRef, vm: &VirtualMachine) -> PyResult<Option<usize>> {
        let snapshot: Vec<(PyHash, PyObjectRef)> = self
            .inner
            .read()
            .misc
            .iter()
            .map(|(h, k, _)| (*h, k.clone()))
            .collect();
        for (i, (entry_hash, entry_key)) in snapshot.iter().enumerate() {
            if *entry_hash == hash && entry_key.rich_compare_bool(key, PyComparisonOp::Eq, vm)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    pub fn get_item_opt(&self, key: &PyObjectRef, vm: &VirtualMachine) -> PyResult<Option<PyObjectRef>> {
        if let Some(s) = key.payload::<PyStr>() {
            return Ok(self.get_item_str(s.as_str()));
        }
        let hash = key.hash(vm)?;
        Ok(self
            .find_misc(hash, key, vm)?
            .map(|i| self.inner.read().misc[i].2.clone()))
    }

    pub fn get_item(&self, key: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
        self.get_item_opt(key, vm)?
            .ok_or_else(|| vm.new_key_error(key.clone()))
    }

    pub fn set_item(&self, key: &PyObjectRef, value: PyObjectRef, vm: &VirtualMachine) -> PyResult<()> {
        if let Some(s) = key.payload::<PyStr>() {
            self.set_item_str(s.as_str(), value);
            return Ok(());
        }
        let hash = key.hash(vm)?;
        match self.find_misc(hash, key, vm)? {
            Some(i) => self.inner.write().misc[i].2 = value,
            None => self.inner.write().misc.push((hash, key.clone(), value)),
        }
        Ok(())
    }

    pub fn del_item(&self, key: &PyObjectRef, vm: &VirtualMachine) -> PyResult<()> {
        if let Some(s) = key.payload::<PyStr>() {
            return if self.del_item_str(s.as_str()) {
                Ok(())
            } else {
                Err(vm.new_key_error(key.clone()))
            };
        }
        let hash = key.hash(vm)?;
        match self.find_misc(hash, key, vm)? {
            Some(i) => {
                self.inner.write().misc.remove(i);
                Ok(())
            }
            None => Err(vm.new_key_error(key.clone())),
        }
    }

    pub fn contains(&self, key: &PyObjectRef, vm: &VirtualMachine) -> PyResult<bool> {
        Ok(self.get_item_opt(key, vm)?.is_some())
    }

    /// All entries, string keys first in insertion order.
    pub fn entries(&self, vm: &VirtualMachine) -> Vec<(PyObjectRef, PyObjectRef)> {
        let inner = self.inner.read();
        let mut out = Vec::with_capacity(inner.str_map.len() + inner.misc.len());
        for (key, value) in &inner.str_map {
            out.push((vm.ctx.new_str(key.clone()).into_object(), value.clone()));
        }
        for (_, key, value) in &inner.misc {
            out.push((key.clone(), value.clone()));
        }
        out
    }

    /// Entries of a namespace-shaped dict; non-string keys are an error.
    pub fn str_entries(&self, vm: &VirtualMachine) -> PyResult<Vec<(String, PyObjectRef)>> {
        let inner = self.inner.read();
        if !inner.misc.is_empty() {
            return Err(vm.new_type_error("attribute names must be strings".to_owned()));
        }
        Ok(inner
            .str_map
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    pub fn keys(&self, vm: &VirtualMachine) -> Vec<PyObjectRef> {
        self.entries(vm).into_iter().map(|(key, _)| key).collect()
    }
}

fn expect_dict<'a>(zelf: &'a PyObjectRef, vm: &VirtualMachine) -> PyResult<&'a PyDict> {
    zelf.payload::<PyDict>()
        .ok_or_else(|| vm.new_interpreter_error("dict slot called on non-dict"))
}

pub(crate) fn dict_len(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<usize> {
    Ok(expect_dict(zelf, vm)?.len())
}

pub(crate) fn dict_subscript(zelf: &PyObjectRef, needle: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    expect_dict(zelf, vm)?.get_item(needle, vm)
}

pub(crate) fn dict_ass_subscript(
    zelf: &PyObjectRef,
    needle: &PyObjectRef,
    value: Option<PyObjectRef>,
    vm: &VirtualMachine,
) -> PyResult<()> {
    let dict = expect_dict(zelf, vm)?;
    match value {
        Some(value) => dict.set_item(needle, value, vm),
        None => dict.del_item(needle, vm),
    }
}

pub(crate) fn dict_contains(
    zelf: &PyObjectRef,
    needle: &PyObjectRef,
    vm: &VirtualMachine,
) -> PyResult<bool> {
    expect_dict(zelf, vm)?.contains(needle, vm)
}

pub(crate) fn dict_repr(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    let dict = expect_dict(zelf, vm)?;
    let parts = dict
        .entries(vm)
        .into_iter()
        .map(|(key, value)| {
            let key = key.repr(vm)?;
            let value = value.repr(vm)?;
            Ok(format!("{}: {}", key.as_str(), value.as_str()))
        })
        .collect::<PyResult<Vec<_>>>()?;
    Ok(vm.ctx.new_str(format!("{{{}}}", parts.iter().format(", "))))
}

pub(crate) fn dict_iter(zelf: PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let keys = expect_dict(&zelf, vm)?.keys(vm);
    let list = vm.ctx.new_list(keys).into_object();
    Ok(crate::builtins::iter::PySequenceIterator::new(list)
        .into_ref(&vm.ctx)
        .into_object())
}

pub(crate) fn dict_new(cls: PyTypeRef, _args: FuncArgs, vm: &VirtualMachine) -> PyResult {
    PyDict::default()
        .into_ref_with_type(vm, cls)
        .map(PyRef::into_object)
}

#[cfg(test)]
mod tests {
    use crate::vm::Interpreter;

    #[test]
    fn string_and_numeric_keys_coexist() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let d = vm.ctx.new_dict();
            let sk = vm.ctx.new_str("k").into_object();
            let ik = vm.ctx.new_int(7).into_object();
            d.set_item(&sk, vm.ctx.new_int(1).into_object(), vm).unwrap();
            d.set_item(&ik, vm.ctx.new_int(2).into_object(), vm).unwrap();
            assert_eq!(d.len(), 2);
            assert!(d.contains(&sk, vm).unwrap());
            assert!(d.contains(&ik, vm).unwrap());
            d.del_item(&ik, vm).unwrap();
            let err = d.get_item(&ik, vm).unwrap_err();
            assert!(err.fast_isinstance(&vm.ctx.exceptions.key_error));
        });
    }

    #[test]
    fn equal_keys_replace_rather_than_duplicate() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let d = vm.ctx.new_dict();
            // 3 and 3.0 compare equal and hash equal
            let ik = vm.ctx.new_int(3).into_object();
            let fk = vm.ctx.new_float(3.0).into_object();
            d.set_item(&ik, vm.ctx.new_int(1).into_object(), vm).unwrap();
            d.set_item(&fk, vm.ctx.new_int(2).into_object(), vm).unwrap();
            assert_eq!(d.len(), 1);
        });
    }
}
