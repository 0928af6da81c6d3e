//! `object`, the root of the type hierarchy, and the generic attribute
//! machinery every ordinary type goes through.

use crate::builtins::str::PyStr;
use crate::builtins::type_::PyType;
use crate::function::{FuncArgs, PySetterValue};
use crate::object::{AsObject, PyObjectRef, PyPayload, PyRef, PyResult};
use crate::types::slot::PyComparisonOp;
use crate::vm::{Context, VirtualMachine};
use krait_common::hash::{hash_pointer, PyHash};

/// Payload of direct `object()` instances; subclasses created in python
/// keep it as well.
#[derive(Debug, Default)]
pub struct PyBaseObject;

impl PyPayload for PyBaseObject {
    fn class(ctx: &Context) -> &crate::builtins::type_::PyTypeRef {
        &ctx.types.object_type
    }
}

/// Default `__getattribute__`: type data descriptors first, then the
/// instance dict, then non-data descriptors and plain class attributes.
pub(crate) fn generic_getattr(obj: &PyObjectRef, name: &str, vm: &VirtualMachine) -> PyResult {
    generic_getattr_opt(obj, name, vm)?.ok_or_else(|| {
        vm.new_attribute_error(format!(
            "'{:.50}' object has no attribute '{:.50}'",
            obj.class().name(),
            name
        ))
    })
}

pub(crate) fn generic_getattr_opt(
    obj: &PyObjectRef,
    name: &str,
    vm: &VirtualMachine,
) -> PyResult<Option<PyObjectRef>> {
    let cls = obj.class().clone();

    let cls_attr = cls.lookup(name);
    if let Some(ref descr) = cls_attr {
        let descr_cls = descr.class().clone();
        let descr_get = descr_cls.slots.descr_get.load();
        if let Some(descr_get) = descr_get {
            if descr_cls.slots.descr_set.load().is_some() {
                // data descriptor shadows the instance dictionary
                return descr_get(
                    descr.clone(),
                    Some(obj.clone()),
                    Some(cls.clone().into_object()),
                    vm,
                )
                .map(Some);
            }
        }
    }

    if let Some(dict) = obj.dict() {
        if let Some(attr) = dict.get_item_opt(&vm.ctx.new_str(name).into_object(), vm)? {
            return Ok(Some(attr));
        }
    }

    if let Some(attr) = cls_attr {
        let descr_get = attr.class().slots.descr_get.load();
        match descr_get {
            Some(descr_get) => descr_get(
                attr,
                Some(obj.clone()),
                Some(cls.into_object()),
                vm,
            )
            .map(Some),
            None => Ok(Some(attr)),
        }
    } else {
        Ok(None)
    }
}

/// Default `__setattr__`/`__delattr__`: honor data descriptors, otherwise
/// the instance dict.
pub(crate) fn generic_setattr(
    obj: &PyObjectRef,
    name: &str,
    value: PySetterValue,
    vm: &VirtualMachine,
) -> PyResult<()> {
    if let Some(attr) = obj.class().lookup(name) {
        let attr_cls = attr.class().clone();
        if let Some(descr_set) = attr_cls.slots.descr_set.load() {
            return descr_set(&attr, obj.clone(), value, vm);
        }
    }

    if let Some(dict) = obj.dict() {
        let key = vm.ctx.new_str(name).into_object();
        match value {
            PySetterValue::Assign(value) => dict.set_item(&key, value, vm),
            PySetterValue::Delete => dict.del_item(&key, vm).map_err(|err| {
                if err.fast_isinstance(&vm.ctx.exceptions.key_error) {
                    vm.new_attribute_error(format!(
                        "'{:.50}' object has no attribute '{:.50}'",
                        obj.class().name(),
                        name
                    ))
                } else {
                    err
                }
            }),
        }
    } else {
        Err(vm.new_attribute_error(format!(
            "'{:.50}' object has no attribute '{:.50}'",
            obj.class().name(),
            name
        )))
    }
}

pub(crate) fn object_repr(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    Ok(vm
        .ctx
        .new_str(format!("<{} object>", zelf.class().name())))
}

pub(crate) fn object_hash(zelf: &PyObjectRef, _vm: &VirtualMachine) -> PyResult<PyHash> {
    Ok(hash_pointer(zelf.get_id()))
}

/// Default rich comparison: identity answers `==`/`!=`, everything else is
/// NotImplemented so the caller applies its fallbacks.
pub(crate) fn object_richcompare(
    zelf: &PyObjectRef,
    other: &PyObjectRef,
    op: PyComparisonOp,
    vm: &VirtualMachine,
) -> PyResult {
    match op {
        PyComparisonOp::Eq if zelf.is(other) => Ok(vm.ctx.new_bool(true).into_object()),
        PyComparisonOp::Ne if zelf.is(other) => Ok(vm.ctx.new_bool(false).into_object()),
        _ => Ok(vm.ctx.not_implemented()),
    }
}

pub(crate) fn object_new(
    cls: crate::builtins::type_::PyTypeRef,
    args: FuncArgs,
    vm: &VirtualMachine,
) -> PyResult {
    // object() itself takes no arguments; subclasses consume them in
    // __init__/__new__ overrides
    if cls.is(&vm.ctx.types.object_type) && !(args.args.is_empty() && args.kwargs.is_empty()) {
        return Err(vm.new_type_error("object() takes no arguments".to_owned()));
    }
    PyBaseObject
        .into_ref_with_type(vm, cls)
        .map(PyRef::into_object)
}

pub(crate) fn object_init(_obj: &PyObjectRef, _args: FuncArgs, _vm: &VirtualMachine) -> PyResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::vm::Interpreter;

    #[test]
    fn default_repr_names_the_type() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let cls = vm
                .new_class("Widget", vec![vm.ctx.types.object_type.clone()])
                .unwrap();
            let obj = vm.call_type(&cls, vec![]).unwrap();
            let repr = obj.repr(vm).unwrap();
            assert_eq!(repr.as_str(), "<Widget object>");
        });
    }

    #[test]
    fn data_descriptors_shadow_the_instance_dict() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            // a descriptor class with __get__ and __set__
            let get = vm.ctx.new_native_function("get", |_, vm| {
                Ok(vm.ctx.new_str("from descriptor").into_object())
            });
            let set = vm.ctx.new_native_function("set", |_, vm| Ok(vm.ctx.none()));
            let descr_cls = vm
                .new_class_with_attrs(
                    "DataDescr",
                    vec![vm.ctx.types.object_type.clone()],
                    [
                        ("__get__".to_owned(), get.into_object()),
                        ("__set__".to_owned(), set.into_object()),
                    ],
                )
                .unwrap();
            let descr = vm.call_type(&descr_cls, vec![]).unwrap();

            let host = vm
                .new_class_with_attrs(
                    "Host",
                    vec![vm.ctx.types.object_type.clone()],
                    [("field".to_owned(), descr)],
                )
                .unwrap();
            let obj = vm.call_type(&host, vec![]).unwrap();

            // shadow in the instance dict; the data descriptor still wins
            obj.dict()
                .unwrap()
                .set_item_str("field", vm.ctx.new_int(0).into_object());
            let got = obj.get_attr("field", vm).unwrap();
            assert_eq!(
                got.payload::<crate::builtins::str::PyStr>().unwrap().as_str(),
                "from descriptor"
            );
        });
    }

    #[test]
    fn non_data_descriptors_lose_to_the_instance_dict() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let get = vm.ctx.new_native_function("get", |_, vm| {
                Ok(vm.ctx.new_str("from descriptor").into_object())
            });
            let descr_cls = vm
                .new_class_with_attrs(
                    "NonDataDescr",
                    vec![vm.ctx.types.object_type.clone()],
                    [("__get__".to_owned(), get.into_object())],
                )
                .unwrap();
            let descr = vm.call_type(&descr_cls, vec![]).unwrap();
            let host = vm
                .new_class_with_attrs(
                    "Host",
                    vec![vm.ctx.types.object_type.clone()],
                    [("field".to_owned(), descr)],
                )
                .unwrap();
            let obj = vm.call_type(&host, vec![]).unwrap();

            // without a shadow the descriptor is consulted
            let got = obj.get_attr("field", vm).unwrap();
            assert_eq!(
                got.payload::<crate::builtins::str::PyStr>().unwrap().as_str(),
                "from descriptor"
            );

            // the instance dict wins over a non-data descriptor
            obj.dict()
                .unwrap()
                .set_item_str("field", vm.ctx.new_int(7).into_object());
            let got = obj.get_attr("field", vm).unwrap();
            assert!(got.payload::<crate::builtins::int::PyInt>().is_some());
        });
    }

    #[test]
    fn attributes_live_in_the_instance_dict() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let cls = vm
                .new_class("Widget", vec![vm.ctx.types.object_type.clone()])
                .unwrap();
            let obj = vm.call_type(&cls, vec![]).unwrap();
            obj.set_attr("size", vm.ctx.new_int(3).into_object(), vm)
                .unwrap();
            let got = obj.get_attr("size", vm).unwrap();
            assert!(got.is(&obj.get_attr("size", vm).unwrap()));
            let err = obj.get_attr("missing", vm).unwrap_err();
            assert!(err.fast_isinstance(&vm.ctx.exceptions.attribute_error));
        });
    }
}
