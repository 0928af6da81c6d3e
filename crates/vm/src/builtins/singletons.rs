//! `None`, `NotImplemented` and `Ellipsis`.

use crate::builtins::str::PyStr;
use crate::builtins::type_::PyTypeRef;
use crate::object::{PyObjectRef, PyPayload, PyRef, PyResult};
use crate::vm::{Context, VirtualMachine};

#[derive(Debug, Default)]
pub struct PyNone;

#[derive(Debug, Default)]
pub struct PyNotImplemented;

#[derive(Debug, Default)]
pub struct PyEllipsis;

impl PyPayload for PyNone {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.none_type
    }
}

impl PyPayload for PyNotImplemented {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.not_implemented_type
    }
}

impl PyPayload for PyEllipsis {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.ellipsis_type
    }
}

pub(crate) fn none_repr(_zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    Ok(vm.ctx.new_str("None"))
}

pub(crate) fn none_bool(_zelf: &PyObjectRef, _vm: &VirtualMachine) -> PyResult<bool> {
    Ok(false)
}

pub(crate) fn not_implemented_repr(
    _zelf: &PyObjectRef,
    vm: &VirtualMachine,
) -> PyResult<PyRef<PyStr>> {
    Ok(vm.ctx.new_str("NotImplemented"))
}

pub(crate) fn ellipsis_repr(_zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    Ok(vm.ctx.new_str("Ellipsis"))
}
