//! The method-call fast path behind `LOAD_METHOD`/`CALL_METHOD`.
//!
//! For `obj.name()` sequences the interpreter may skip bound-method
//! allocation: when the type goes through the generic attribute machinery
//! and the lookup lands on a method descriptor that the instance dict does
//! not shadow, the callable and the receiver travel as two stack values and
//! are combined at the call site.

use super::VirtualMachine;
use crate::builtins::object::generic_getattr;
use crate::function::FuncArgs;
use crate::object::{AsObject, PyObjectRef, PyResult};
use crate::types::slot::PyTypeFlags;

pub(crate) enum PyMethod {
    /// Unbound callable plus receiver; the deferred-binding shape.
    Function {
        target: PyObjectRef,
        func: PyObjectRef,
    },
    /// An ordinary attribute value (bound method, plain callable, data).
    Attribute(PyObjectRef),
}

impl PyMethod {
    pub fn get(obj: &PyObjectRef, name: &str, vm: &VirtualMachine) -> PyResult<Self> {
        let cls = obj.class().clone();

        // types with a custom __getattribute__ bypass the fast path
        let getattro = cls.slots.getattro.load();
        if getattro.map(|f| f as usize) != Some(generic_getattr as usize) {
            return obj.get_attr(name, vm).map(Self::Attribute);
        }

        if let Some(descr) = cls.lookup(name) {
            let descr_cls = descr.class().clone();
            let descr_get = descr_cls.slots.descr_get.load();

            if descr_cls.slots.flags.has_feature(PyTypeFlags::METHOD_DESCRIPTOR) {
                if let Some(attr) = instance_attr(obj, name) {
                    return Ok(Self::Attribute(attr));
                }
                return Ok(Self::Function {
                    target: obj.clone(),
                    func: descr,
                });
            }

            if let Some(descr_get) = descr_get {
                if descr_cls.slots.descr_set.load().is_some() {
                    // data descriptor: always through __get__
                    return descr_get(
                        descr,
                        Some(obj.clone()),
                        Some(cls.clone().into_object()),
                        vm,
                    )
                    .map(Self::Attribute);
                }
                if let Some(attr) = instance_attr(obj, name) {
                    return Ok(Self::Attribute(attr));
                }
                return descr_get(descr, Some(obj.clone()), Some(cls.into_object()), vm)
                    .map(Self::Attribute);
            }

            if let Some(attr) = instance_attr(obj, name) {
                return Ok(Self::Attribute(attr));
            }
            return Ok(Self::Attribute(descr));
        }

        if let Some(attr) = instance_attr(obj, name) {
            return Ok(Self::Attribute(attr));
        }

        Err(vm.new_attribute_error(format!(
            "'{:.50}' object has no attribute '{:.50}'",
            obj.class().name(),
            name
        )))
    }

    pub fn invoke(self, args: FuncArgs, vm: &VirtualMachine) -> PyResult {
        match self {
            Self::Function { target, func } => {
                let mut args = args;
                args.prepend_arg(target);
                func.call(args, vm)
            }
            Self::Attribute(attr) => attr.call(args, vm),
        }
    }
}

fn instance_attr(obj: &PyObjectRef, name: &str) -> Option<PyObjectRef> {
    obj.dict().and_then(|dict| dict.get_item_str(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Interpreter;

    #[test]
    fn methods_defer_binding_until_the_call() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let func = vm.ctx.new_native_function("report", |args, vm| {
                // called with the receiver prepended
                Ok(vm.ctx.new_int(args.args.len() as i64).into_object())
            });
            let cls = vm
                .new_class_with_attrs(
                    "Host",
                    vec![vm.ctx.types.object_type.clone()],
                    [("report".to_owned(), func.into_object())],
                )
                .unwrap();
            let obj = vm.call_type(&cls, vec![]).unwrap();

            let method = PyMethod::get(&obj, "report", vm).unwrap();
            assert!(matches!(method, PyMethod::Function { .. }));
            let result = method.invoke(FuncArgs::default(), vm).unwrap();
            assert_eq!(
                result
                    .payload::<crate::builtins::int::PyInt>()
                    .unwrap()
                    .as_bigint()
                    .to_string(),
                "1"
            );
        });
    }

    #[test]
    fn instance_dict_shadows_the_descriptor() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let func = vm.ctx.new_native_function("report", |_, vm| Ok(vm.ctx.none()));
            let cls = vm
                .new_class_with_attrs(
                    "Host",
                    vec![vm.ctx.types.object_type.clone()],
                    [("report".to_owned(), func.into_object())],
                )
                .unwrap();
            let obj = vm.call_type(&cls, vec![]).unwrap();
            obj.set_attr("report", vm.ctx.new_int(9).into_object(), vm)
                .unwrap();

            let method = PyMethod::get(&obj, "report", vm).unwrap();
            assert!(matches!(method, PyMethod::Attribute(_)));
        });
    }
}
