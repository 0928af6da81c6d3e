//! `tuple`.

use crate::builtins::int::PyInt;
use crate::builtins::str::PyStr;
use crate::builtins::type_::PyTypeRef;
use crate::function::FuncArgs;
use crate::object::{PyObjectRef, PyPayload, PyRef, PyResult};
use crate::types::slot::PyComparisonOp;
use crate::vm::{Context, VirtualMachine};
use itertools::Itertools;
use krait_common::hash::{hash_iter, PyHash};

pub type PyTupleRef = PyRef<PyTuple>;

#[derive(Debug)]
pub struct PyTuple {
    elements: Box<[PyObjectRef]>,
}

impl From<Vec<PyObjectRef>> for PyTuple {
    fn from(elements: Vec<PyObjectRef>) -> Self {
        Self {
            elements: elements.into_boxed_slice(),
        }
    }
}

impl PyPayload for PyTuple {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.tuple_type
    }
}

impl PyTuple {
    pub fn as_slice(&self) -> &[PyObjectRef] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PyObjectRef> {
        self.elements.iter()
    }
}

fn expect_tuple<'a>(zelf: &'a PyObjectRef, vm: &VirtualMachine) -> PyResult<&'a PyTuple> {
    zelf.payload::<PyTuple>()
        .ok_or_else(|| vm.new_interpreter_error("tuple slot called on non-tuple"))
}

pub(crate) fn tuple_len(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<usize> {
    Ok(expect_tuple(zelf, vm)?.len())
}

pub(crate) fn tuple_hash(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyHash> {
    let tuple = expect_tuple(zelf, vm)?;
    let hashes = tuple
        .iter()
        .map(|element| element.hash(vm))
        .collect::<PyResult<Vec<_>>>()?;
    Ok(hash_iter(hashes.iter()))
}

pub(crate) fn tuple_repr(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    let tuple = expect_tuple(zelf, vm)?;
    let parts = tuple
        .iter()
        .map(|element| element.repr(vm).map(|s| s.as_str().to_owned()))
        .collect::<PyResult<Vec<_>>>()?;
    let text = match parts.len() {
        1 => format!("({},)", parts[0]),
        _ => format!("({})", parts.iter().format(", ")),
    };
    Ok(vm.ctx.new_str(text))
}

pub(crate) fn sequence_index(
    needle: &PyObjectRef,
    len: usize,
    kind: &'static str,
    vm: &VirtualMachine,
) -> PyResult<usize> {
    let index = needle
        .payload::<PyInt>()
        .ok_or_else(|| {
            vm.new_type_error(format!(
                "{kind} indices must be integers, not '{}'",
                needle.class().name()
            ))
        })?
        .try_to_primitive::<isize>(vm)?;
    let len = len as isize;
    let index = if index < 0 { index + len } else { index };
    if index < 0 || index >= len {
        Err(vm.new_index_error(format!("{kind} index out of range")))
    } else {
        Ok(index as usize)
    }
}

pub(crate) fn tuple_getitem(zelf: &PyObjectRef, needle: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let tuple = expect_tuple(zelf, vm)?;
    let index = sequence_index(needle, tuple.len(), "tuple", vm)?;
    Ok(tuple.as_slice()[index].clone())
}

pub(crate) fn tuple_contains(
    zelf: &PyObjectRef,
    needle: &PyObjectRef,
    vm: &VirtualMachine,
) -> PyResult<bool> {
    let tuple = expect_tuple(zelf, vm)?;
    for element in tuple.iter() {
        if element.rich_compare_bool(needle, PyComparisonOp::Eq, vm)? {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) fn tuple_richcompare(
    zelf: &PyObjectRef,
    other: &PyObjectRef,
    op: PyComparisonOp,
    vm: &VirtualMachine,
) -> PyResult {
    let (Some(a), Some(b)) = (zelf.payload::<PyTuple>(), other.payload::<PyTuple>()) else {
        return Ok(vm.ctx.not_implemented());
    };
    match op {
        PyComparisonOp::Eq | PyComparisonOp::Ne => {
            let mut equal = a.len() == b.len();
            if equal {
                for (x, y) in a.iter().zip(b.iter()) {
                    if !x.rich_compare_bool(y, PyComparisonOp::Eq, vm)? {
                        equal = false;
                        break;
                    }
                }
            }
            let result = if op == PyComparisonOp::Eq { equal } else { !equal };
            Ok(vm.ctx.new_bool(result).into_object())
        }
        _ => Ok(vm.ctx.not_implemented()),
    }
}

pub(crate) fn tuple_add(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let (Some(a), Some(b)) = (a.payload::<PyTuple>(), b.payload::<PyTuple>()) else {
        return Ok(vm.ctx.not_implemented());
    };
    let mut elements = Vec::with_capacity(a.len() + b.len());
    elements.extend(a.iter().cloned());
    elements.extend(b.iter().cloned());
    Ok(vm.ctx.new_tuple(elements).into_object())
}

pub(crate) const AS_NUMBER: crate::protocol::number::PyNumberMethods =
    crate::protocol::number::PyNumberMethods {
        add: Some(tuple_add),
        ..crate::protocol::number::PyNumberMethods::NOT_IMPLEMENTED
    };

pub(crate) fn tuple_iter(zelf: PyObjectRef, vm: &VirtualMachine) -> PyResult {
    Ok(crate::builtins::iter::PySequenceIterator::new(zelf)
        .into_ref(&vm.ctx)
        .into_object())
}

pub(crate) fn tuple_new(cls: PyTypeRef, args: FuncArgs, vm: &VirtualMachine) -> PyResult {
    let elements = match args.args.len() {
        0 => vec![],
        1 => args.args[0].extract_elements(vm)?,
        n => {
            return Err(vm.new_type_error(format!(
                "tuple() takes at most 1 argument ({n} given)"
            )))
        }
    };
    PyTuple::from(elements)
        .into_ref_with_type(vm, cls)
        .map(PyRef::into_object)
}

#[cfg(test)]
mod tests {
    use crate::vm::Interpreter;

    #[test]
    fn repr_of_singleton_keeps_the_comma() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let t = vm
                .ctx
                .new_tuple(vec![vm.ctx.new_int(1).into_object()])
                .into_object();
            assert_eq!(t.repr(vm).unwrap().as_str(), "(1,)");
        });
    }

    #[test]
    fn negative_indices_count_from_the_end() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let t = vm
                .ctx
                .new_tuple(vec![
                    vm.ctx.new_int(1).into_object(),
                    vm.ctx.new_int(2).into_object(),
                ])
                .into_object();
            let last = t.get_item(&vm.ctx.new_int(-1).into_object(), vm).unwrap();
            assert_eq!(
                last.payload::<crate::builtins::int::PyInt>()
                    .unwrap()
                    .as_bigint()
                    .to_string(),
                "2"
            );
            let err = t
                .get_item(&vm.ctx.new_int(5).into_object(), vm)
                .unwrap_err();
            assert!(err.fast_isinstance(&vm.ctx.exceptions.index_error));
        });
    }
}
