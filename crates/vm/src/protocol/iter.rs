//! The iteration protocol.

use crate::builtins::exceptions;
use crate::object::{AsObject, PyObjectRef, PyResult};
use crate::vm::VirtualMachine;

/// The result of one step of an iterator: a value, or the non-error
/// "exhausted" variant so callers can fall through without matching on
/// exception kinds.
#[derive(Debug)]
pub enum PyIterReturn<T = PyObjectRef> {
    Return(T),
    StopIteration(Option<PyObjectRef>),
}

impl PyIterReturn {
    /// Fold a raised `StopIteration` back into the quiet variant.
    pub fn from_pyresult(result: PyResult, vm: &VirtualMachine) -> PyResult<Self> {
        match result {
            Ok(obj) => Ok(Self::Return(obj)),
            Err(err) if err.fast_isinstance(&vm.ctx.exceptions.stop_iteration) => {
                Ok(Self::StopIteration(exceptions::stop_iteration_value(&err)))
            }
            Err(err) => Err(err),
        }
    }

    pub fn into_result(self, vm: &VirtualMachine) -> PyResult {
        match self {
            Self::Return(obj) => Ok(obj),
            Self::StopIteration(value) => Err(vm.new_stop_iteration(value)),
        }
    }
}

/// A value known to be an iterator: its type has `iternext` filled.
#[derive(Debug, Clone)]
pub struct PyIter(PyObjectRef);

impl PyIter {
    pub fn new(obj: PyObjectRef) -> Self {
        Self(obj)
    }

    pub fn as_object(&self) -> &PyObjectRef {
        &self.0
    }

    pub fn next(&self, vm: &VirtualMachine) -> PyResult<PyIterReturn> {
        let iternext = self
            .0
            .class()
            .slots
            .iternext
            .load()
            .ok_or_else(|| {
                vm.new_type_error(format!(
                    "'{}' object is not an iterator",
                    self.0.class().name()
                ))
            })?;
        iternext(&self.0, vm)
    }

    /// Drain into a vec; the road taken by unpacking and tuple/list builders.
    pub fn collect(&self, vm: &VirtualMachine) -> PyResult<Vec<PyObjectRef>> {
        let mut out = Vec::new();
        loop {
            match self.next(vm)? {
                PyIterReturn::Return(value) => out.push(value),
                PyIterReturn::StopIteration(_) => break Ok(out),
            }
        }
    }
}

impl From<PyIter> for PyObjectRef {
    fn from(value: PyIter) -> Self {
        value.0
    }
}
