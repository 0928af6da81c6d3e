//! The outermost entry point; owns the context and one virtual machine.

use super::{Context, VirtualMachine};
use krait_common::rc::PyRc;

#[derive(Clone, Debug)]
pub struct Settings {
    pub recursion_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recursion_limit: 1000,
        }
    }
}

pub struct Interpreter {
    vm: VirtualMachine,
}

impl Interpreter {
    /// A bare interpreter: the core types and the handful of built-in
    /// functions, nothing else. All tests run through here.
    pub fn without_stdlib(settings: Settings) -> Self {
        let ctx = PyRc::new(Context::new());
        let vm = VirtualMachine::new(ctx);
        vm.recursion_limit.set(settings.recursion_limit);
        Self { vm }
    }

    pub fn enter<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&VirtualMachine) -> R,
    {
        f(&self.vm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::int::PyInt;
    use crate::object::AsObject;
    use malachite_bigint::BigInt;

    #[test]
    fn add_py_integers() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let a = vm.ctx.new_int(33).into_object();
            let b = vm.ctx.new_int(12).into_object();
            let res = vm._add(&a, &b).unwrap();
            let value = res.payload::<PyInt>().unwrap();
            assert_eq!(value.as_bigint(), &BigInt::from(45));
        });
    }

    #[test]
    fn every_value_answers_isinstance_of_its_own_type() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let values = vec![
                vm.ctx.none(),
                vm.ctx.new_int(1).into_object(),
                vm.ctx.new_float(1.5).into_object(),
                vm.ctx.new_str("x").into_object(),
                vm.ctx.new_tuple(vec![]).into_object(),
                vm.ctx.new_list(vec![]).into_object(),
                vm.ctx.new_dict().into_object(),
                vm.ctx.new_bool(true).into_object(),
            ];
            for value in values {
                let cls = value.class().clone().into_object();
                assert!(value.is_instance(&cls, vm).unwrap());
            }
        });
    }
}
