//! The iterator returned by the default `__iter__` of the indexable
//! built-ins.

use crate::builtins::list::PyList;
use crate::builtins::str::PyStr;
use crate::builtins::tuple::PyTuple;
use crate::builtins::type_::PyTypeRef;
use crate::object::{PyObjectRef, PyPayload, PyResult};
use crate::protocol::PyIterReturn;
use crate::vm::{Context, VirtualMachine};
use krait_common::lock::PyMutex;

#[derive(Debug)]
pub struct PySequenceIterator {
    internal: PyMutex<IterState>,
}

#[derive(Debug)]
struct IterState {
    position: usize,
    obj: PyObjectRef,
}

impl PySequenceIterator {
    pub fn new(obj: PyObjectRef) -> Self {
        Self {
            internal: PyMutex::new(IterState { position: 0, obj }),
        }
    }
}

impl PyPayload for PySequenceIterator {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.iter_type
    }
}

pub(crate) fn iter_self(zelf: PyObjectRef, _vm: &VirtualMachine) -> PyResult {
    Ok(zelf)
}

pub(crate) fn iter_next(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyIterReturn> {
    let iterator = zelf
        .payload::<PySequenceIterator>()
        .ok_or_else(|| vm.new_interpreter_error("iterator slot called on non-iterator"))?;
    let mut state = iterator.internal.lock();
    let position = state.position;

    let item = if let Some(tuple) = state.obj.payload::<PyTuple>() {
        tuple.as_slice().get(position).cloned()
    } else if let Some(list) = state.obj.payload::<PyList>() {
        list.get(position)
    } else if let Some(s) = state.obj.payload::<PyStr>() {
        s.as_str()
            .chars()
            .nth(position)
            .map(|ch| vm.ctx.new_str(ch.to_string()).into_object())
    } else {
        return Err(vm.new_interpreter_error("sequence iterator over unsupported payload"));
    };

    Ok(match item {
        Some(item) => {
            state.position += 1;
            PyIterReturn::Return(item)
        }
        None => PyIterReturn::StopIteration(None),
    })
}

#[cfg(test)]
mod tests {
    use crate::protocol::PyIter;
    use crate::vm::Interpreter;

    #[test]
    fn drains_a_list_and_stops() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let l = vm
                .ctx
                .new_list(vec![
                    vm.ctx.new_int(1).into_object(),
                    vm.ctx.new_int(2).into_object(),
                ])
                .into_object();
            let iter = PyIter::new(l.get_iter(vm).unwrap());
            let collected = iter.collect(vm).unwrap();
            assert_eq!(collected.len(), 2);
            // exhausted iterators stay exhausted
            assert!(iter.collect(vm).unwrap().is_empty());
        });
    }
}
