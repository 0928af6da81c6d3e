//! `list`.

use crate::builtins::str::PyStr;
use crate::builtins::tuple::sequence_index;
use crate::builtins::type_::PyTypeRef;
use crate::function::FuncArgs;
use crate::object::{PyObjectRef, PyPayload, PyRef, PyResult};
use crate::types::slot::PyComparisonOp;
use crate::vm::{Context, VirtualMachine};
use itertools::Itertools;
use krait_common::lock::PyRwLock;

#[derive(Debug, Default)]
pub struct PyList {
    elements: PyRwLock<Vec<PyObjectRef>>,
}

impl From<Vec<PyObjectRef>> for PyList {
    fn from(elements: Vec<PyObjectRef>) -> Self {
        Self {
            elements: PyRwLock::new(elements),
        }
    }
}

impl PyPayload for PyList {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.list_type
    }
}

impl PyList {
    pub fn borrow_vec(&self) -> Vec<PyObjectRef> {
        self.elements.read().clone()
    }

    pub fn len(&self) -> usize {
        self.elements.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.read().is_empty()
    }

    pub fn append(&self, value: PyObjectRef) {
        self.elements.write().push(value);
    }

    pub fn get(&self, index: usize) -> Option<PyObjectRef> {
        self.elements.read().get(index).cloned()
    }
}

fn expect_list<'a>(zelf: &'a PyObjectRef, vm: &VirtualMachine) -> PyResult<&'a PyList> {
    zelf.payload::<PyList>()
        .ok_or_else(|| vm.new_interpreter_error("list slot called on non-list"))
}

pub(crate) fn list_len(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<usize> {
    Ok(expect_list(zelf, vm)?.len())
}

pub(crate) fn list_repr(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    let list = expect_list(zelf, vm)?;
    let elements = list.borrow_vec();
    let parts = elements
        .iter()
        .map(|element| element.repr(vm).map(|s| s.as_str().to_owned()))
        .collect::<PyResult<Vec<_>>>()?;
    Ok(vm.ctx.new_str(format!("[{}]", parts.iter().format(", "))))
}

pub(crate) fn list_getitem(zelf: &PyObjectRef, needle: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let list = expect_list(zelf, vm)?;
    let elements = list.elements.read();
    let index = sequence_index(needle, elements.len(), "list", vm)?;
    Ok(elements[index].clone())
}

pub(crate) fn list_ass_subscript(
    zelf: &PyObjectRef,
    needle: &PyObjectRef,
    value: Option<PyObjectRef>,
    vm: &VirtualMachine,
) -> PyResult<()> {
    let list = expect_list(zelf, vm)?;
    let mut elements = list.elements.write();
    let index = sequence_index(needle, elements.len(), "list", vm)?;
    match value {
        Some(value) => elements[index] = value,
        None => {
            elements.remove(index);
        }
    }
    Ok(())
}

pub(crate) fn list_contains(
    zelf: &PyObjectRef,
    needle: &PyObjectRef,
    vm: &VirtualMachine,
) -> PyResult<bool> {
    let list = expect_list(zelf, vm)?;
    let elements = list.borrow_vec();
    for element in &elements {
        if element.rich_compare_bool(needle, PyComparisonOp::Eq, vm)? {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) fn list_richcompare(
    zelf: &PyObjectRef,
    other: &PyObjectRef,
    op: PyComparisonOp,
    vm: &VirtualMachine,
) -> PyResult {
    let (Some(a), Some(b)) = (zelf.payload::<PyList>(), other.payload::<PyList>()) else {
        return Ok(vm.ctx.not_implemented());
    };
    match op {
        PyComparisonOp::Eq | PyComparisonOp::Ne => {
            let (a, b) = (a.borrow_vec(), b.borrow_vec());
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

pub(crate) fn list_add(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let (Some(a), Some(b)) = (a.payload::<PyList>(), b.payload::<PyList>()) else {
        return Ok(vm.ctx.not_implemented());
    };
    let mut elements = a.borrow_vec();
    elements.extend(b.borrow_vec());
    Ok(vm.ctx.new_list(elements).into_object())
}

pub(crate) const AS_NUMBER: crate::protocol::number::PyNumberMethods =
    crate::protocol::number::PyNumberMethods {
        add: Some(list_add),
        ..crate::protocol::number::PyNumberMethods::NOT_IMPLEMENTED
    };

pub(crate) fn list_iter(zelf: PyObjectRef, vm: &VirtualMachine) -> PyResult {
    Ok(crate::builtins::iter::PySequenceIterator::new(zelf)
        .into_ref(&vm.ctx)
        .into_object())
}

pub(crate) fn list_new(cls: PyTypeRef, args: FuncArgs, vm: &VirtualMachine) -> PyResult {
    let elements = match args.args.len() {
        0 => vec![],
        1 => args.args[0].extract_elements(vm)?,
        n => {
            return Err(vm.new_type_error(format!(
                "list() takes at most 1 argument ({n} given)"
            )))
        }
    };
    PyList::from(elements)
        .into_ref_with_type(vm, cls)
        .map(PyRef::into_object)
}

#[cfg(test)]
mod tests {
    use crate::vm::Interpreter;

    #[test]
    fn item_assignment_and_deletion() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let l = vm
                .ctx
                .new_list(vec![
                    vm.ctx.new_int(1).into_object(),
                    vm.ctx.new_int(2).into_object(),
                ])
                .into_object();
            let key = vm.ctx.new_int(0).into_object();
            l.set_item(&key, vm.ctx.new_int(9).into_object(), vm).unwrap();
            let got = l.get_item(&key, vm).unwrap();
            assert_eq!(
                got.payload::<crate::builtins::int::PyInt>()
                    .unwrap()
                    .as_bigint()
                    .to_string(),
                "9"
            );
            l.del_item(&key, vm).unwrap();
            assert_eq!(l.length(vm).unwrap(), 1);
        });
    }
}
