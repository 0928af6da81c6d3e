mod core;

pub use core::{
    AsObject, InstanceDict, PyObject, PyObjectRef, PyPayload, PyRef, PyResult, PyWeakObject,
};
