//! Essential types of the object model.
//!
//! Every live value is a [`PyObjectRef`]: a reference-counted pointer to a
//! [`PyObject`] that carries its type, an optional instance dictionary, and a
//! Rust payload. [`PyRef<T>`] is the typed counterpart for code that knows
//! the payload statically. The payload is type-erased through `Any`; a
//! type's `accepted` list records which payload representations realize its
//! instances, so resolving `type(v)` stays a single field read.

use crate::builtins::dict::PyDictRef;
use crate::builtins::exceptions::PyBaseExceptionRef;
use crate::builtins::type_::{PyType, PyTypeRef};
use crate::vm::{Context, VirtualMachine};
use krait_common::lock::PyRwLock;
use krait_common::rc::PyRc;
use std::any::Any;
use std::borrow::Borrow;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::OnceLock;

/// The result of any fallible runtime operation: a value or a raised
/// exception. The internal "empty slot" condition never appears here; it is
/// `Option::None` on the slot cells themselves.
pub type PyResult<T = PyObjectRef> = Result<T, PyBaseExceptionRef>;

/// A python object. `typ` is set exactly once; it is a `OnceLock` only so
/// the two self-referential bootstrap types (`object`, `type`) can be wired
/// up after allocation.
pub struct PyObject {
    typ: OnceLock<PyTypeRef>,
    dict: Option<InstanceDict>,
    payload: Box<dyn Any + Send + Sync>,
}

/// A reference-counted handle to a [`PyObject`]; the universal value type of
/// the interpreter.
#[derive(Clone)]
pub struct PyObjectRef {
    inner: PyRc<PyObject>,
}

impl Deref for PyObjectRef {
    type Target = PyObject;

    #[inline(always)]
    fn deref(&self) -> &PyObject {
        &self.inner
    }
}

/// The mutable `__dict__` cell of instances whose type carries `HAS_DICT`.
pub struct InstanceDict {
    d: PyRwLock<PyDictRef>,
}

impl InstanceDict {
    #[inline]
    pub fn new(d: PyDictRef) -> Self {
        Self { d: PyRwLock::new(d) }
    }

    #[inline]
    pub fn get(&self) -> PyDictRef {
        self.d.read().clone()
    }

    #[inline]
    pub fn replace(&self, d: PyDictRef) {
        *self.d.write() = d;
    }
}

impl PyObject {
    pub(crate) fn new_ref(
        payload: impl Any + Send + Sync,
        typ: PyTypeRef,
        dict: Option<PyDictRef>,
    ) -> PyObjectRef {
        let typ_cell = OnceLock::new();
        typ_cell.set(typ).unwrap_or_else(|_| unreachable!());
        PyObjectRef {
            inner: PyRc::new(Self {
                typ: typ_cell,
                dict: dict.map(InstanceDict::new),
                payload: Box::new(payload),
            }),
        }
    }

    /// Allocate an object whose type is patched in later. Only the bootstrap
    /// of `object` and `type` goes through here.
    pub(crate) fn new_cyclic(
        payload: impl Any + Send + Sync,
        dict: Option<PyDictRef>,
    ) -> PyObjectRef {
        PyObjectRef {
            inner: PyRc::new(Self {
                typ: OnceLock::new(),
                dict: dict.map(InstanceDict::new),
                payload: Box::new(payload),
            }),
        }
    }

    pub(crate) fn init_typ(&self, typ: PyTypeRef) {
        self.typ
            .set(typ)
            .unwrap_or_else(|_| panic!("object type initialized twice"));
    }

    /// The python type of this object. A single indirection; never allocates.
    #[inline(always)]
    pub fn class(&self) -> &PyTypeRef {
        match self.typ.get() {
            Some(typ) => typ,
            None => panic!("object used before its type was initialized"),
        }
    }

    /// Borrow the payload if it is a `T`.
    #[inline]
    pub fn payload<T: PyPayload>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }

    /// Payload borrow that also checks the python-level type, for payloads
    /// shared between a type and its subtypes.
    #[inline]
    pub fn payload_if_subclass<'a, T: PyPayload>(
        &'a self,
        vm: &VirtualMachine,
    ) -> Option<&'a T> {
        if self.class().fast_issubclass(T::class(&vm.ctx)) {
            self.payload()
        } else {
            None
        }
    }

    #[inline]
    pub fn payload_is<T: PyPayload>(&self) -> bool {
        self.payload.is::<T>()
    }

    /// Alias kept for symmetry with the typed `PyRef` API.
    #[inline]
    pub fn downcast_ref<T: PyPayload>(&self) -> Option<&T> {
        self.payload()
    }

    #[inline]
    pub fn dict(&self) -> Option<PyDictRef> {
        self.dict.as_ref().map(InstanceDict::get)
    }

    pub fn set_dict(&self, dict: PyDictRef) -> Result<(), PyDictRef> {
        match self.dict {
            Some(ref cell) => {
                cell.replace(dict);
                Ok(())
            }
            None => Err(dict),
        }
    }

    pub fn has_dict(&self) -> bool {
        self.dict.is_some()
    }
}

impl PyObjectRef {
    /// Pointer identity; the `is` operator.
    #[inline]
    pub fn is(&self, other: &Self) -> bool {
        PyRc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable per-object identity.
    #[inline]
    pub fn get_id(&self) -> usize {
        PyRc::as_ptr(&self.inner) as usize
    }

    /// Attempt to turn this into a typed reference, handing the object back
    /// on failure.
    pub fn downcast<T: PyPayload>(self) -> Result<PyRef<T>, Self> {
        if self.payload_is::<T>() {
            Ok(PyRef {
                obj: self,
                _marker: PhantomData,
            })
        } else {
            Err(self)
        }
    }

    /// Typed reference without the payload check.
    ///
    /// Callers must have verified `payload_is::<T>()`; the `Deref` impl of
    /// the returned value panics otherwise.
    pub fn downcast_unchecked<T: PyPayload>(self) -> PyRef<T> {
        debug_assert!(self.payload_is::<T>());
        PyRef {
            obj: self,
            _marker: PhantomData,
        }
    }
}

/// A non-owning handle; used where strong references would pin dead types
/// alive (subclass back-links).
#[derive(Clone)]
pub struct PyWeakObject {
    inner: std::sync::Weak<PyObject>,
}

impl PyWeakObject {
    pub fn upgrade(&self) -> Option<PyObjectRef> {
        self.inner.upgrade().map(|inner| PyObjectRef { inner })
    }
}

impl PyObjectRef {
    pub fn downgrade(&self) -> PyWeakObject {
        PyWeakObject {
            inner: PyRc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for PyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .typ
            .get()
            .map(|t| t.name())
            .unwrap_or_else(|| "<uninitialized>".to_owned());
        write!(f, "<{} object>", name)
    }
}

impl fmt::Debug for PyObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// A reference to an object whose payload type is statically known.
pub struct PyRef<T: PyPayload> {
    obj: PyObjectRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T: PyPayload> Clone for PyRef<T> {
    fn clone(&self) -> Self {
        Self {
            obj: self.obj.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: PyPayload> PyRef<T> {
    /// Wrap a payload into a fresh object of the given type.
    pub fn new_ref(payload: T, typ: PyTypeRef, dict: Option<PyDictRef>) -> Self {
        PyObject::new_ref(payload, typ, dict).downcast_unchecked()
    }

    #[inline]
    pub fn as_object(&self) -> &PyObjectRef {
        &self.obj
    }

    #[inline]
    pub fn into_object(self) -> PyObjectRef {
        self.obj
    }

    #[inline]
    pub fn is(&self, other: &impl AsObject) -> bool {
        self.obj.is(other.as_object())
    }

    #[inline]
    pub fn get_id(&self) -> usize {
        self.obj.get_id()
    }
}

impl<T: PyPayload> Deref for PyRef<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        match self.obj.payload::<T>() {
            Some(payload) => payload,
            None => panic!("PyRef payload invariant violated"),
        }
    }
}

impl<T: PyPayload> From<PyRef<T>> for PyObjectRef {
    fn from(value: PyRef<T>) -> Self {
        value.obj
    }
}

impl<T: PyPayload> fmt::Debug for PyRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.obj, f)
    }
}

impl<T: PyPayload> Borrow<PyObjectRef> for PyRef<T> {
    fn borrow(&self) -> &PyObjectRef {
        &self.obj
    }
}

/// Uniform access to the untyped object behind typed and untyped handles.
pub trait AsObject {
    fn as_object(&self) -> &PyObjectRef;

    #[inline]
    fn to_owned_object(&self) -> PyObjectRef {
        self.as_object().clone()
    }
}

impl AsObject for PyObjectRef {
    #[inline]
    fn as_object(&self) -> &PyObjectRef {
        self
    }
}

impl<T: PyPayload> AsObject for PyRef<T> {
    #[inline]
    fn as_object(&self) -> &PyObjectRef {
        &self.obj
    }
}

/// Rust values that can live as python object payloads.
pub trait PyPayload: Any + Send + Sync + Sized {
    /// The python type realized by this payload.
    fn class(ctx: &Context) -> &PyTypeRef;

    fn into_ref(self, ctx: &Context) -> PyRef<Self> {
        let cls = Self::class(ctx).clone();
        let dict = cls
            .slots
            .flags
            .has_feature(crate::types::slot::PyTypeFlags::HAS_DICT)
            .then(|| ctx.new_dict());
        PyRef::new_ref(self, cls, dict)
    }

    fn into_pyobject(self, vm: &VirtualMachine) -> PyObjectRef {
        self.into_ref(&vm.ctx).into_object()
    }

    /// Wrap into an instance of `cls`, which must be this payload's type or
    /// a subtype of it.
    fn into_ref_with_type(self, vm: &VirtualMachine, cls: PyTypeRef) -> PyResult<PyRef<Self>> {
        let exact_class = Self::class(&vm.ctx);
        if cls.fast_issubclass(exact_class) {
            let dict = cls
                .slots
                .flags
                .has_feature(crate::types::slot::PyTypeFlags::HAS_DICT)
                .then(|| vm.ctx.new_dict());
            Ok(PyRef::new_ref(self, cls, dict))
        } else {
            Err(vm.new_type_error(format!(
                "'{}' is not a subtype of '{}'",
                cls.name(),
                exact_class.name()
            )))
        }
    }
}
