pub mod iter;
pub mod number;
pub mod object;

pub use iter::{PyIter, PyIterReturn};
pub use number::{
    PyNumberBinaryFunc, PyNumberMethods, PyNumberSlots, PyNumberTernaryFunc, PyNumberUnaryFunc,
};
