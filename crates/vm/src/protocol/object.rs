//! The abstract operation API: language-level operations routed through the
//! slot table, with the fallback and error behavior of each operation in
//! one place.

use crate::builtins::str::PyStr;
use crate::builtins::tuple::PyTuple;
use crate::builtins::type_::{PyType, PyTypeRef};
use crate::function::{FuncArgs, IntoFuncArgs, PySetterValue};
use crate::object::{AsObject, PyObjectRef, PyRef, PyResult};
use crate::protocol::iter::PyIter;
use crate::types::slot::PyComparisonOp;
use crate::vm::VirtualMachine;
use krait_common::hash::PyHash;

impl PyObjectRef {
    /// `repr(o)`; an empty slot falls back to the printable type form.
    pub fn repr(&self, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
        vm.with_recursion("while getting the repr of an object", || {
            match self.class().slots.repr.load() {
                Some(repr) => repr(self, vm),
                None => Ok(vm.ctx.new_str(format!("<{} object>", self.class().name()))),
            }
        })
    }

    /// `str(o)`; an empty slot falls back to `repr`.
    pub fn str(&self, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
        match self.class().slots.str.load() {
            Some(str_slot) => str_slot(self, vm),
            None => self.repr(vm),
        }
    }

    pub fn hash(&self, vm: &VirtualMachine) -> PyResult<PyHash> {
        match self.class().slots.hash.load() {
            Some(hash) => hash(self, vm),
            None => Err(vm.new_type_error(format!(
                "unhashable type: '{}'",
                self.class().name()
            ))),
        }
    }

    /// `bool(o)`: `__bool__`, else nonzero `__len__`, else true.
    pub fn try_to_bool(&self, vm: &VirtualMachine) -> PyResult<bool> {
        if let Some(boolean) = self.class().slots.as_number.boolean.load() {
            return boolean(self, vm);
        }
        if let Some(length) = self.class().slots.length.load() {
            return Ok(length(self, vm)? != 0);
        }
        Ok(true)
    }

    pub fn is_true(&self, vm: &VirtualMachine) -> PyResult<bool> {
        self.try_to_bool(vm)
    }

    pub fn length_opt(&self, vm: &VirtualMachine) -> Option<PyResult<usize>> {
        self.class().slots.length.load().map(|length| length(self, vm))
    }

    pub fn length(&self, vm: &VirtualMachine) -> PyResult<usize> {
        self.length_opt(vm).unwrap_or_else(|| {
            Err(vm.new_type_error(format!(
                "object of type '{}' has no len()",
                self.class().name()
            )))
        })
    }

    pub fn get_item(&self, needle: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
        match self.class().slots.subscript.load() {
            Some(subscript) => subscript(self, needle, vm),
            None => Err(vm.new_type_error(format!(
                "'{:.200}' object is not subscriptable",
                self.class().name()
            ))),
        }
    }

    pub fn set_item(&self, needle: &PyObjectRef, value: PyObjectRef, vm: &VirtualMachine) -> PyResult<()> {
        match self.class().slots.ass_subscript.load() {
            Some(ass_subscript) => ass_subscript(self, needle, Some(value), vm),
            None => Err(vm.new_type_error(format!(
                "'{:.200}' object does not support item assignment",
                self.class().name()
            ))),
        }
    }

    pub fn del_item(&self, needle: &PyObjectRef, vm: &VirtualMachine) -> PyResult<()> {
        match self.class().slots.ass_subscript.load() {
            Some(ass_subscript) => ass_subscript(self, needle, None, vm),
            None => Err(vm.new_type_error(format!(
                "'{:.200}' object does not support item deletion",
                self.class().name()
            ))),
        }
    }

    pub fn get_attr(&self, name: &str, vm: &VirtualMachine) -> PyResult {
        match self.class().slots.getattro.load() {
            Some(getattro) => getattro(self, name, vm),
            None => Err(vm.new_attribute_error(format!(
                "'{:.50}' object has no attribute '{:.50}'",
                self.class().name(),
                name
            ))),
        }
    }

    /// Attribute access with `AttributeError` mapped to `None`; what the
    /// optional protocols use to probe.
    pub fn get_attr_opt(&self, name: &str, vm: &VirtualMachine) -> PyResult<Option<PyObjectRef>> {
        match self.get_attr(name, vm) {
            Ok(attr) => Ok(Some(attr)),
            Err(err) if err.fast_isinstance(&vm.ctx.exceptions.attribute_error) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn set_attr(&self, name: &str, value: PyObjectRef, vm: &VirtualMachine) -> PyResult<()> {
        self.set_attr_value(name, PySetterValue::Assign(value), vm)
    }

    pub fn del_attr(&self, name: &str, vm: &VirtualMachine) -> PyResult<()> {
        self.set_attr_value(name, PySetterValue::Delete, vm)
    }

    fn set_attr_value(&self, name: &str, value: PySetterValue, vm: &VirtualMachine) -> PyResult<()> {
        match self.class().slots.setattro.load() {
            Some(setattro) => setattro(self, name, value, vm),
            None => Err(vm.new_type_error(format!(
                "'{:.200}' object attributes are read-only",
                self.class().name()
            ))),
        }
    }

    /// Rich comparison with the reflected-operand rule: a strict-subtype
    /// right operand is asked first, NotImplemented passes the turn.
    pub fn rich_compare(&self, other: &PyObjectRef, op: PyComparisonOp, vm: &VirtualMachine) -> PyResult {
        let mut checked_reflected = false;
        if !self.class().is(other.class()) && other.class().fast_issubclass(self.class()) {
            if let Some(reflected) = other.class().slots.richcompare.load() {
                checked_reflected = true;
                let res = reflected(other, self, op.swapped(), vm)?;
                if !vm.is_not_implemented(&res) {
                    return Ok(res);
                }
            }
        }
        if let Some(compare) = self.class().slots.richcompare.load() {
            let res = compare(self, other, op, vm)?;
            if !vm.is_not_implemented(&res) {
                return Ok(res);
            }
        }
        if !checked_reflected {
            if let Some(reflected) = other.class().slots.richcompare.load() {
                let res = reflected(other, self, op.swapped(), vm)?;
                if !vm.is_not_implemented(&res) {
                    return Ok(res);
                }
            }
        }
        match op {
            PyComparisonOp::Eq => Ok(vm.ctx.new_bool(self.is(other)).into_object()),
            PyComparisonOp::Ne => Ok(vm.ctx.new_bool(!self.is(other)).into_object()),
            _ => Err(vm.new_type_error(format!(
                "'{}' not supported between instances of '{:.200}' and '{:.200}'",
                op.operator_token(),
                self.class().name(),
                other.class().name()
            ))),
        }
    }

    /// Boolean comparison; identity answers equality before `__eq__` can
    /// run (or raise).
    pub fn rich_compare_bool(
        &self,
        other: &PyObjectRef,
        op: PyComparisonOp,
        vm: &VirtualMachine,
    ) -> PyResult<bool> {
        if let Some(shortcut) = op.identical_optimization(self, other) {
            return Ok(shortcut);
        }
        self.rich_compare(other, op, vm)?.try_to_bool(vm)
    }

    pub fn is_callable(&self) -> bool {
        self.class().slots.call.load().is_some()
    }

    /// `o(args)` through the `call` slot.
    pub fn call(&self, args: impl IntoFuncArgs, vm: &VirtualMachine) -> PyResult {
        let args = args.into_args(vm);
        self.call_with_args(args, vm)
    }

    pub fn call_with_args(&self, args: FuncArgs, vm: &VirtualMachine) -> PyResult {
        let Some(call) = self.class().slots.call.load() else {
            return Err(vm.new_type_error(format!(
                "'{:.200}' object is not callable",
                self.class().name()
            )));
        };
        vm.with_recursion("while calling a python object", || call(self, args, vm))
    }

    pub fn get_iter(&self, vm: &VirtualMachine) -> PyResult {
        match self.class().slots.iter.load() {
            Some(iter) => {
                let iterator = iter(self.clone(), vm)?;
                if iterator.class().slots.iternext.load().is_none() {
                    return Err(vm.new_type_error(format!(
                        "iter() returned non-iterator of type '{:.200}'",
                        iterator.class().name()
                    )));
                }
                Ok(iterator)
            }
            None => Err(vm.new_type_error(format!(
                "'{:.200}' object is not iterable",
                self.class().name()
            ))),
        }
    }

    /// Flatten an iterable into a vec; tuples and lists skip the iterator.
    pub fn extract_elements(&self, vm: &VirtualMachine) -> PyResult<Vec<PyObjectRef>> {
        if let Some(tuple) = self.payload::<PyTuple>() {
            return Ok(tuple.as_slice().to_vec());
        }
        if let Some(list) = self.payload::<crate::builtins::list::PyList>() {
            return Ok(list.borrow_vec());
        }
        PyIter::new(self.get_iter(vm)?).collect(vm)
    }

    /// Identity-based instance test; never calls user code.
    pub fn fast_isinstance(&self, cls: &PyTypeRef) -> bool {
        self.class().fast_issubclass(cls)
    }

    /// `isinstance(self, cls)`: subtype test, `__instancecheck__` hook for
    /// non-type classinfo, tuples of either.
    pub fn is_instance(&self, cls: &PyObjectRef, vm: &VirtualMachine) -> PyResult<bool> {
        if let Some(tuple) = cls.payload::<PyTuple>() {
            for entry in tuple.iter() {
                if vm.with_recursion("in isinstance", || self.is_instance(entry, vm))? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }

        // plain types take the precomputed-MRO road
        if cls.payload::<PyType>().is_some() && cls.class().is(&vm.ctx.types.type_type) {
            let cls_ref: PyTypeRef = cls.clone().downcast().unwrap_or_else(|_| unreachable!());
            return Ok(self.fast_isinstance(&cls_ref));
        }

        if let Some(meth) = vm.get_special_method(cls, "__instancecheck__")? {
            let result = vm.with_recursion("in __instancecheck__", || {
                meth.invoke((self.clone(),), vm)
            })?;
            return result.try_to_bool(vm);
        }

        Err(vm.new_type_error(
            "isinstance() arg 2 must be a type, a tuple of types, or a union".to_owned(),
        ))
    }

    /// `issubclass(self, cls)` with the same shape of hooks.
    pub fn is_subclass(&self, cls: &PyObjectRef, vm: &VirtualMachine) -> PyResult<bool> {
        if let Some(tuple) = cls.payload::<PyTuple>() {
            for entry in tuple.iter() {
                if vm.with_recursion("in issubclass", || self.is_subclass(entry, vm))? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }

        if cls.payload::<PyType>().is_some() && cls.class().is(&vm.ctx.types.type_type) {
            if self.payload::<PyType>().is_some() && self.class().is(&vm.ctx.types.type_type) {
                let derived: PyTypeRef = self.clone().downcast().unwrap_or_else(|_| unreachable!());
                let cls: PyTypeRef = cls.clone().downcast().unwrap_or_else(|_| unreachable!());
                return Ok(derived.fast_issubclass(&cls));
            }
            // dynamically assembled classes fall back to the __bases__ walk
            return is_subclass_helper(self, cls, vm);
        }

        if let Some(meth) = vm.get_special_method(cls, "__subclasscheck__")? {
            let result = vm.with_recursion("in __subclasscheck__", || {
                meth.invoke((self.clone(),), vm)
            })?;
            return result.try_to_bool(vm);
        }

        Err(vm.new_type_error("issubclass() arg 2 must be a class or tuple of classes".to_owned()))
    }
}

/// Recursive `__bases__` walk. Deliberately does not consult
/// `__subclasscheck__` anywhere along the way.
fn is_subclass_helper(derived: &PyObjectRef, cls: &PyObjectRef, vm: &VirtualMachine) -> PyResult<bool> {
    if derived.is(cls) {
        return Ok(true);
    }
    let Some(bases) = derived.get_attr_opt("__bases__", vm)? else {
        return Ok(false);
    };
    let Some(bases) = bases.payload::<PyTuple>().map(|t| t.as_slice().to_vec()) else {
        return Ok(false);
    };
    for base in bases {
        if vm.with_recursion("in __bases__ walk", || is_subclass_helper(&base, cls, vm))? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Interpreter;

    #[test]
    fn identity_implies_equality_even_when_eq_raises() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            // class with __eq__ that raises
            let raises = vm.ctx.new_native_function("boom", |_, vm| {
                Err(vm.new_runtime_error("__eq__ must not run".to_owned()))
            });
            let cls = vm
                .new_class_with_attrs(
                    "Grumpy",
                    vec![vm.ctx.types.object_type.clone()],
                    [("__eq__".to_owned(), raises.into_object())],
                )
                .unwrap();
            let obj = vm.call_type(&cls, vec![]).unwrap();
            assert!(obj.rich_compare_bool(&obj, PyComparisonOp::Eq, vm).unwrap());
            // a distinct object does invoke it
            let other = vm.call_type(&cls, vec![]).unwrap();
            assert!(obj.rich_compare_bool(&other, PyComparisonOp::Eq, vm).is_err());
        });
    }

    #[test]
    fn str_falls_back_to_repr() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let cls = vm
                .new_class("Plain", vec![vm.ctx.types.object_type.clone()])
                .unwrap();
            let obj = vm.call_type(&cls, vec![]).unwrap();
            assert_eq!(obj.str(vm).unwrap().as_str(), "<Plain object>");
        });
    }

    #[test]
    fn ordering_without_slots_is_a_type_error() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let cls = vm
                .new_class("Plain", vec![vm.ctx.types.object_type.clone()])
                .unwrap();
            let a = vm.call_type(&cls, vec![]).unwrap();
            let b = vm.call_type(&cls, vec![]).unwrap();
            let err = a.rich_compare(&b, PyComparisonOp::Lt, vm).unwrap_err();
            assert!(err.fast_isinstance(&vm.ctx.exceptions.type_error));
            // while equality defaults to identity
            assert!(!a.rich_compare_bool(&b, PyComparisonOp::Eq, vm).unwrap());
        });
    }

    #[test]
    fn isinstance_matches_the_type_of_every_value() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let v = vm.ctx.new_int(5).into_object();
            let int_cls = vm.ctx.types.int_type.clone().into_object();
            assert!(v.is_instance(&int_cls, vm).unwrap());
            let ty = v.class().clone().into_object();
            assert!(v.is_instance(&ty, vm).unwrap());
        });
    }
}
