//! Functions implemented in rust and exposed to python.

use crate::builtins::str::PyStr;
use crate::builtins::type_::PyTypeRef;
use crate::function::FuncArgs;
use crate::object::{PyObjectRef, PyPayload, PyRef, PyResult};
use crate::vm::{Context, VirtualMachine};
use std::fmt;

pub type PyNativeFn = fn(FuncArgs, &VirtualMachine) -> PyResult;

/// A rust function, optionally bound to a receiver. The type carries the
/// method-descriptor flag so attribute access through instances produces
/// bound variants, and so the method-call fast path may defer binding.
pub struct PyNativeFunction {
    pub name: &'static str,
    pub func: PyNativeFn,
    pub zelf: Option<PyObjectRef>,
}

impl fmt::Debug for PyNativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<built-in function {}>", self.name)
    }
}

impl PyPayload for PyNativeFunction {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.builtin_function_type
    }
}

impl PyNativeFunction {
    pub const fn new(name: &'static str, func: PyNativeFn) -> Self {
        Self {
            name,
            func,
            zelf: None,
        }
    }
}

pub(crate) fn native_func_call(
    zelf: &PyObjectRef,
    mut args: FuncArgs,
    vm: &VirtualMachine,
) -> PyResult {
    let func = zelf
        .payload::<PyNativeFunction>()
        .ok_or_else(|| vm.new_interpreter_error("native function slot on wrong payload"))?;
    if let Some(receiver) = &func.zelf {
        args.prepend_arg(receiver.clone());
    }
    (func.func)(args, vm)
}

/// Binding a native function through the descriptor protocol produces a new
/// function value holding the receiver.
pub(crate) fn native_func_descr_get(
    zelf: PyObjectRef,
    obj: Option<PyObjectRef>,
    _cls: Option<PyObjectRef>,
    vm: &VirtualMachine,
) -> PyResult {
    let func = zelf
        .payload::<PyNativeFunction>()
        .ok_or_else(|| vm.new_interpreter_error("native function slot on wrong payload"))?;
    match obj {
        Some(obj) if func.zelf.is_none() => Ok(PyNativeFunction {
            name: func.name,
            func: func.func,
            zelf: Some(obj),
        }
        .into_ref(&vm.ctx)
        .into_object()),
        _ => Ok(zelf.clone()),
    }
}

pub(crate) fn native_func_repr(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    let func = zelf
        .payload::<PyNativeFunction>()
        .ok_or_else(|| vm.new_interpreter_error("native function slot on wrong payload"))?;
    Ok(vm.ctx.new_str(format!("<built-in function {}>", func.name)))
}
