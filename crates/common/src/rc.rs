use std::sync::Arc;

// type alias instead of a new-type because you can't do `fn method(self: PyRc<Self>)`
// with a newtype; that requires the arbitrary_self_types unstable feature
pub type PyRc<T> = Arc<T>;
