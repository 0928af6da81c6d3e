//! The krait virtual machine.
//!
//! This crate implements the core of a Python 3 runtime: the object and type
//! model, the special-method slot machinery, the abstract operation API, and
//! the evaluation loop that executes CPython-shaped wordcode. Built-in types
//! are provided only as far as the core needs them as stack values.

#[macro_use]
extern crate log;

pub mod builtins;
pub mod frame;
pub mod function;
pub mod object;
pub mod protocol;
pub mod scope;
pub mod types;
pub mod vm;

pub use krait_bytecode as bytecode;
pub use krait_common as common;

pub use builtins::exceptions::PyBaseExceptionRef;
pub use object::{
    AsObject, PyObject, PyObjectRef, PyPayload, PyRef, PyResult, PyWeakObject,
};
pub use vm::{Context, Interpreter, Settings, VirtualMachine};
