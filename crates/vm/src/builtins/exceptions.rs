//! Exception objects and the built-in exception hierarchy.

use crate::builtins::str::PyStr;
use crate::builtins::type_::{PyType, PyTypeRef};
use crate::function::FuncArgs;
use crate::object::{AsObject, PyObjectRef, PyPayload, PyRef, PyResult};
use crate::types::slot::{PyTypeFlags, PyTypeSlots};
use crate::vm::{Context, VirtualMachine};
use itertools::Itertools;
use krait_common::lock::PyRwLock;
use std::any::TypeId;

pub type PyBaseExceptionRef = PyRef<PyBaseException>;

/// Payload of every exception instance, whatever its class.
#[derive(Debug, Default)]
pub struct PyBaseException {
    args: PyRwLock<Vec<PyObjectRef>>,
}

impl PyPayload for PyBaseException {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.exceptions.base_exception_type
    }
}

impl PyBaseException {
    pub fn new(args: Vec<PyObjectRef>) -> Self {
        Self {
            args: PyRwLock::new(args),
        }
    }

    pub fn args(&self) -> Vec<PyObjectRef> {
        self.args.read().clone()
    }

    pub fn set_args(&self, args: Vec<PyObjectRef>) {
        *self.args.write() = args;
    }
}

impl PyRef<PyBaseException> {
    /// Class test against the precomputed MRO; safe on error paths because
    /// it never enters user code.
    pub fn fast_isinstance(&self, cls: &PyTypeRef) -> bool {
        self.as_object().class().fast_issubclass(cls)
    }
}

/// `StopIteration.value`: the first argument, if any.
pub fn stop_iteration_value(exc: &PyBaseExceptionRef) -> Option<PyObjectRef> {
    exc.args().first().cloned()
}

/// The built-in exception types, in hierarchy order.
pub struct ExceptionZoo {
    pub base_exception_type: PyTypeRef,
    pub exception_type: PyTypeRef,
    pub type_error: PyTypeRef,
    pub attribute_error: PyTypeRef,
    pub value_error: PyTypeRef,
    pub lookup_error: PyTypeRef,
    pub index_error: PyTypeRef,
    pub key_error: PyTypeRef,
    pub name_error: PyTypeRef,
    pub unbound_local_error: PyTypeRef,
    pub arithmetic_error: PyTypeRef,
    pub overflow_error: PyTypeRef,
    pub zero_division_error: PyTypeRef,
    pub runtime_error: PyTypeRef,
    pub recursion_error: PyTypeRef,
    pub not_implemented_error: PyTypeRef,
    pub stop_iteration: PyTypeRef,
    /// Internal runtime failures. Python-visible handler dispatch refuses
    /// this type, so it unwinds out of the evaluation loop unchanged.
    pub interpreter_error: PyTypeRef,
}

impl ExceptionZoo {
    pub(crate) fn init(object_type: &PyTypeRef, type_type: &PyTypeRef) -> Self {
        let new_exc_type = |name: &'static str, base: &PyTypeRef| {
            let slots = PyTypeSlots {
                name,
                flags: PyTypeFlags::BASETYPE | PyTypeFlags::HAS_DICT,
                ..PyTypeSlots::default()
            };
            slots.repr.store(Some(exception_repr));
            slots.str.store(Some(exception_str));
            slots.new.store(Some(exception_new));
            slots.init.store(Some(exception_init));
            PyRef::<PyType>::new_static(
                Some(base.clone()),
                vec![TypeId::of::<PyBaseException>()],
                slots,
                type_type.clone(),
            )
        };

        let base_exception_type = {
            let slots = PyTypeSlots {
                name: "BaseException",
                flags: PyTypeFlags::BASETYPE | PyTypeFlags::HAS_DICT,
                ..PyTypeSlots::default()
            };
            slots.repr.store(Some(exception_repr));
            slots.str.store(Some(exception_str));
            slots.new.store(Some(exception_new));
            slots.init.store(Some(exception_init));
            PyRef::<PyType>::new_static(
                Some(object_type.clone()),
                vec![TypeId::of::<PyBaseException>()],
                slots,
                type_type.clone(),
            )
        };

        let exception_type = new_exc_type("Exception", &base_exception_type);
        let type_error = new_exc_type("TypeError", &exception_type);
        let attribute_error = new_exc_type("AttributeError", &exception_type);
        let value_error = new_exc_type("ValueError", &exception_type);
        let lookup_error = new_exc_type("LookupError", &exception_type);
        let index_error = new_exc_type("IndexError", &lookup_error);
        let key_error = new_exc_type("KeyError", &lookup_error);
        let name_error = new_exc_type("NameError", &exception_type);
        let unbound_local_error = new_exc_type("UnboundLocalError", &name_error);
        let arithmetic_error = new_exc_type("ArithmeticError", &exception_type);
        let overflow_error = new_exc_type("OverflowError", &arithmetic_error);
        let zero_division_error = new_exc_type("ZeroDivisionError", &arithmetic_error);
        let runtime_error = new_exc_type("RuntimeError", &exception_type);
        let recursion_error = new_exc_type("RecursionError", &runtime_error);
        let not_implemented_error = new_exc_type("NotImplementedError", &runtime_error);
        let stop_iteration = new_exc_type("StopIteration", &exception_type);
        let interpreter_error = new_exc_type("InterpreterError", &base_exception_type);

        Self {
            base_exception_type,
            exception_type,
            type_error,
            attribute_error,
            value_error,
            lookup_error,
            index_error,
            key_error,
            name_error,
            unbound_local_error,
            arithmetic_error,
            overflow_error,
            zero_division_error,
            runtime_error,
            recursion_error,
            not_implemented_error,
            stop_iteration,
            interpreter_error,
        }
    }
}

pub(crate) fn exception_new(cls: PyTypeRef, args: FuncArgs, vm: &VirtualMachine) -> PyResult {
    if !args.kwargs.is_empty() {
        return Err(vm.new_type_error(format!(
            "{}() takes no keyword arguments",
            cls.name()
        )));
    }
    PyBaseException::new(args.args)
        .into_ref_with_type(vm, cls)
        .map(PyRef::into_object)
}

pub(crate) fn exception_init(zelf: &PyObjectRef, args: FuncArgs, vm: &VirtualMachine) -> PyResult<()> {
    let exc = zelf
        .payload::<PyBaseException>()
        .ok_or_else(|| vm.new_interpreter_error("exception slot on wrong payload"))?;
    exc.set_args(args.args);
    Ok(())
}

pub(crate) fn exception_str(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    let exc = zelf
        .payload::<PyBaseException>()
        .ok_or_else(|| vm.new_interpreter_error("exception slot on wrong payload"))?;
    let args = exc.args();
    let text = match args.len() {
        0 => String::new(),
        1 => args[0].str(vm)?.as_str().to_owned(),
        _ => {
            let parts = args
                .iter()
                .map(|arg| arg.repr(vm).map(|s| s.as_str().to_owned()))
                .collect::<PyResult<Vec<_>>>()?;
            format!("({})", parts.iter().format(", "))
        }
    };
    Ok(vm.ctx.new_str(text))
}

pub(crate) fn exception_repr(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    let exc = zelf
        .payload::<PyBaseException>()
        .ok_or_else(|| vm.new_interpreter_error("exception slot on wrong payload"))?;
    let args = exc.args();
    let parts = args
        .iter()
        .map(|arg| arg.repr(vm).map(|s| s.as_str().to_owned()))
        .collect::<PyResult<Vec<_>>>()?;
    Ok(vm.ctx.new_str(format!(
        "{}({})",
        zelf.class().name(),
        parts.iter().format(", ")
    )))
}

#[cfg(test)]
mod tests {
    use crate::vm::Interpreter;

    #[test]
    fn hierarchy_is_wired() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let exc = &vm.ctx.exceptions;
            assert!(exc.index_error.fast_issubclass(&exc.lookup_error));
            assert!(exc.lookup_error.fast_issubclass(&exc.exception_type));
            assert!(exc.unbound_local_error.fast_issubclass(&exc.name_error));
            assert!(exc.recursion_error.fast_issubclass(&exc.runtime_error));
            // internal errors sit outside Exception
            assert!(!exc.interpreter_error.fast_issubclass(&exc.exception_type));
            assert!(exc
                .interpreter_error
                .fast_issubclass(&exc.base_exception_type));
        });
    }

    #[test]
    fn message_is_carried_in_args() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let err = vm.new_type_error("boom".to_owned());
            let text = err.as_object().str(vm).unwrap();
            assert_eq!(text.as_str(), "boom");
            let repr = err.as_object().repr(vm).unwrap();
            assert_eq!(repr.as_str(), "TypeError('boom')");
        });
    }
}
