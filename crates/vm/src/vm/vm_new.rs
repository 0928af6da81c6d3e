//! Exception-object creation helpers.

use super::VirtualMachine;
use crate::builtins::exceptions::{PyBaseException, PyBaseExceptionRef};
use crate::builtins::type_::PyTypeRef;
use crate::object::{AsObject, PyObjectRef, PyRef};

macro_rules! define_exception_fn {
    (fn $fn_name:ident, $attr:ident) => {
        pub fn $fn_name(&self, msg: impl Into<String>) -> PyBaseExceptionRef {
            let exc_type = self.ctx.exceptions.$attr.clone();
            self.new_exception_msg(exc_type, msg.into())
        }
    };
}

/// Collection of exception constructors.
impl VirtualMachine {
    pub fn new_exception(&self, exc_type: PyTypeRef, args: Vec<PyObjectRef>) -> PyBaseExceptionRef {
        PyRef::new_ref(
            PyBaseException::new(args),
            exc_type,
            Some(self.ctx.new_dict()),
        )
    }

    pub fn new_exception_msg(&self, exc_type: PyTypeRef, msg: String) -> PyBaseExceptionRef {
        let msg = self.ctx.new_str(msg).into_object();
        self.new_exception(exc_type, vec![msg])
    }

    define_exception_fn!(fn new_type_error, type_error);
    define_exception_fn!(fn new_attribute_error, attribute_error);
    define_exception_fn!(fn new_value_error, value_error);
    define_exception_fn!(fn new_index_error, index_error);
    define_exception_fn!(fn new_overflow_error, overflow_error);
    define_exception_fn!(fn new_zero_division_error, zero_division_error);
    define_exception_fn!(fn new_runtime_error, runtime_error);
    define_exception_fn!(fn new_recursion_error, recursion_error);

    pub fn new_key_error(&self, key: PyObjectRef) -> PyBaseExceptionRef {
        self.new_exception(self.ctx.exceptions.key_error.clone(), vec![key])
    }

    pub fn new_name_error(&self, name: &str) -> PyBaseExceptionRef {
        self.new_exception_msg(
            self.ctx.exceptions.name_error.clone(),
            format!("name '{name}' is not defined"),
        )
    }

    pub fn new_unbound_local_error(&self, name: &str) -> PyBaseExceptionRef {
        self.new_exception_msg(
            self.ctx.exceptions.unbound_local_error.clone(),
            format!("local variable '{name}' referenced before assignment"),
        )
    }

    /// `StopIteration` carries its value as a payload, not a message.
    pub fn new_stop_iteration(&self, value: Option<PyObjectRef>) -> PyBaseExceptionRef {
        let args = match value {
            Some(value) => vec![value],
            None => vec![],
        };
        self.new_exception(self.ctx.exceptions.stop_iteration.clone(), args)
    }

    /// A bug in the runtime, not a python-visible condition. Handler
    /// dispatch refuses this type, so it unwinds out of `eval`.
    pub fn new_interpreter_error(&self, msg: impl Into<String>) -> PyBaseExceptionRef {
        self.new_exception_msg(self.ctx.exceptions.interpreter_error.clone(), msg.into())
    }

    pub fn new_unsupported_bin_op_error(
        &self,
        a: &PyObjectRef,
        b: &PyObjectRef,
        op: &str,
    ) -> PyBaseExceptionRef {
        self.new_type_error(format!(
            "unsupported operand type(s) for {}: '{:.200}' and '{:.200}'",
            op,
            a.class().name(),
            b.class().name()
        ))
    }

    pub fn new_unsupported_unary_error(&self, a: &PyObjectRef, op: &str) -> PyBaseExceptionRef {
        self.new_type_error(format!(
            "bad operand type for {}: '{:.200}'",
            op,
            a.class().name()
        ))
    }
}
