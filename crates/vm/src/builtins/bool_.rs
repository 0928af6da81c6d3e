//! `bool`, a subtype of `int` whose two instances are interned.
//!
//! There is no separate payload: `True` and `False` carry `PyInt` payloads
//! of 1 and 0 under the bool type, the adopted-representation arrangement
//! recorded in the int type's accepted list.

use crate::builtins::int::PyInt;
use crate::builtins::str::PyStr;
use crate::builtins::type_::PyTypeRef;
use crate::function::FuncArgs;
use crate::object::{AsObject, PyObjectRef, PyRef, PyResult};
use crate::vm::VirtualMachine;
use num_traits::Zero;

pub fn get_value(obj: &PyObjectRef) -> bool {
    !obj.payload::<PyInt>()
        .map_or(false, |i| i.as_bigint().is_zero())
}

pub(crate) fn bool_repr(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    Ok(vm
        .ctx
        .new_str(if get_value(zelf) { "True" } else { "False" }))
}

pub(crate) fn bool_new(cls: PyTypeRef, args: FuncArgs, vm: &VirtualMachine) -> PyResult {
    if !cls.is(&vm.ctx.types.bool_type) {
        return Err(vm.new_type_error("type 'bool' is not an acceptable base type".to_owned()));
    }
    let value = match args.args.len() {
        0 => false,
        1 => args.args[0].try_to_bool(vm)?,
        n => {
            return Err(vm.new_type_error(format!(
                "bool() takes at most 1 argument ({n} given)"
            )))
        }
    };
    Ok(vm.ctx.new_bool(value).into_object())
}

#[cfg(test)]
mod tests {
    use crate::vm::Interpreter;
    use crate::object::AsObject;

    #[test]
    fn bool_is_an_int_subtype() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            assert!(vm.ctx.types.bool_type.fast_issubclass(&vm.ctx.types.int_type));
            let t = vm.ctx.new_bool(true);
            assert!(t.as_object().class().is(&vm.ctx.types.bool_type));
            // arithmetic falls through to the int slots
            let res = vm
                ._add(t.as_object(), vm.ctx.new_int(2).as_object())
                .unwrap();
            assert_eq!(
                res.payload::<crate::builtins::int::PyInt>()
                    .unwrap()
                    .as_bigint()
                    .to_string(),
                "3"
            );
        });
    }

    #[test]
    fn truth_singletons_are_interned() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let a = vm.ctx.new_bool(true);
            let b = vm.ctx.new_bool(true);
            assert!(a.is(&b));
        });
    }
}
