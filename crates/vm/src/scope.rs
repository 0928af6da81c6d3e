//! The name-resolution environment of a frame.

use crate::builtins::dict::PyDictRef;

/// Local and global mappings. `locals` is absent for optimized frames,
/// whose named variables live in the fast-local array instead.
#[derive(Clone)]
pub struct Scope {
    pub locals: Option<PyDictRef>,
    pub globals: PyDictRef,
}

impl Scope {
    pub fn new(locals: Option<PyDictRef>, globals: PyDictRef) -> Self {
        Self { locals, globals }
    }

    pub fn with_globals(globals: PyDictRef) -> Self {
        Self {
            locals: None,
            globals,
        }
    }
}
