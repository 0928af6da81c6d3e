pub mod bool_;
pub mod builtin_func;
pub mod code;
pub mod dict;
pub mod exceptions;
pub mod float;
pub mod function;
pub mod int;
pub mod iter;
pub mod list;
pub mod object;
pub mod singletons;
pub mod str;
pub mod tuple;
pub mod type_;

pub use code::{PyCode, PyCodeRef};
pub use dict::{PyDict, PyDictRef};
pub use exceptions::{PyBaseException, PyBaseExceptionRef};
pub use float::PyFloat;
pub use function::{PyBoundMethod, PyCell, PyCellRef, PyFunction};
pub use int::PyInt;
pub use list::PyList;
pub use object::PyBaseObject;
pub use singletons::{PyEllipsis, PyNone, PyNotImplemented};
pub use str::{PyStr, PyStrRef};
pub use tuple::{PyTuple, PyTupleRef};
pub use type_::{PyType, PyTypeRef};
