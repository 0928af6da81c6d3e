//! Call-time argument plumbing.

use crate::builtins::str::PyStr;
use crate::object::{AsObject, PyObjectRef, PyPayload, PyRef};
use crate::vm::VirtualMachine;
use indexmap::IndexMap;

/// The arguments of a call: positional values plus keyword values in
/// insertion order.
#[derive(Clone, Debug, Default)]
pub struct FuncArgs {
    pub args: Vec<PyObjectRef>,
    pub kwargs: IndexMap<String, PyObjectRef>,
}

impl FuncArgs {
    pub fn new(args: Vec<PyObjectRef>, kwarg_names: Vec<String>, kwarg_values: Vec<PyObjectRef>) -> Self {
        let kwargs = kwarg_names.into_iter().zip(kwarg_values).collect();
        Self { args, kwargs }
    }

    pub fn prepend_arg(&mut self, item: PyObjectRef) {
        self.args.insert(0, item);
    }

    pub fn take_positional(&mut self, index: usize) -> Option<PyObjectRef> {
        self.args.get(index).cloned()
    }
}

impl From<Vec<PyObjectRef>> for FuncArgs {
    fn from(args: Vec<PyObjectRef>) -> Self {
        Self {
            args,
            kwargs: IndexMap::default(),
        }
    }
}

/// Anything that can be spread into call arguments; lets rust-level callers
/// write `func.call((a, b), vm)`.
pub trait IntoFuncArgs: Sized {
    fn into_args(self, vm: &VirtualMachine) -> FuncArgs;
}

impl IntoFuncArgs for FuncArgs {
    fn into_args(self, _vm: &VirtualMachine) -> FuncArgs {
        self
    }
}

impl IntoFuncArgs for Vec<PyObjectRef> {
    fn into_args(self, _vm: &VirtualMachine) -> FuncArgs {
        self.into()
    }
}

impl IntoFuncArgs for () {
    fn into_args(self, _vm: &VirtualMachine) -> FuncArgs {
        FuncArgs::default()
    }
}

macro_rules! into_func_args_from_tuple {
    ($(($n:tt, $T:ident)),+) => {
        impl<$($T,)+> IntoFuncArgs for ($($T,)+)
        where
            $($T: Into<PyObjectRef>,)+
        {
            fn into_args(self, _vm: &VirtualMachine) -> FuncArgs {
                vec![$(self.$n.into(),)+].into()
            }
        }
    };
}

into_func_args_from_tuple!((0, A));
into_func_args_from_tuple!((0, A), (1, B));
into_func_args_from_tuple!((0, A), (1, B), (2, C));
into_func_args_from_tuple!((0, A), (1, B), (2, C), (3, D));

/// The value side of an attribute or item store; `Delete` shares the slot
/// with assignment the way `__delattr__`/`__delitem__` share theirs.
#[derive(Clone, Debug)]
pub enum PySetterValue {
    Assign(PyObjectRef),
    Delete,
}

impl PySetterValue {
    pub fn into_option(self) -> Option<PyObjectRef> {
        match self {
            Self::Assign(value) => Some(value),
            Self::Delete => None,
        }
    }
}

impl From<Option<PyObjectRef>> for PySetterValue {
    fn from(value: Option<PyObjectRef>) -> Self {
        match value {
            Some(value) => Self::Assign(value),
            None => Self::Delete,
        }
    }
}

/// Extract the keyword-name tuple of `CALL_FUNCTION_KW` into rust strings.
pub fn kwarg_names_from_tuple(
    names: &PyObjectRef,
    vm: &VirtualMachine,
) -> crate::object::PyResult<Vec<String>> {
    let tuple = names
        .payload::<crate::builtins::tuple::PyTuple>()
        .ok_or_else(|| vm.new_interpreter_error("keyword names are not a tuple"))?;
    tuple
        .as_slice()
        .iter()
        .map(|name| {
            name.payload::<PyStr>()
                .map(|s| s.as_str().to_owned())
                .ok_or_else(|| vm.new_interpreter_error("keyword name is not a string"))
        })
        .collect()
}

/// Ergonomic helper for natives: bind `self` out of the positional args.
pub fn self_receiver<T: PyPayload>(
    args: &FuncArgs,
    vm: &VirtualMachine,
) -> crate::object::PyResult<PyRef<T>> {
    let zelf = args
        .args
        .first()
        .ok_or_else(|| vm.new_type_error("method called without self".to_owned()))?;
    zelf.to_owned_object()
        .downcast::<T>()
        .map_err(|obj| {
            vm.new_type_error(format!(
                "descriptor requires a '{}' object but received a '{}'",
                T::class(&vm.ctx).name(),
                obj.class().name()
            ))
        })
}
