//! The process-wide context: the type and exception zoos, the interned
//! singletons, and the object constructors.

use crate::builtins::builtin_func::{PyNativeFn, PyNativeFunction};
use crate::builtins::code::{PyCode, PyCodeRef};
use crate::builtins::dict::{PyDict, PyDictRef};
use crate::builtins::exceptions::ExceptionZoo;
use crate::builtins::float::PyFloat;
use crate::builtins::function::{PyBoundMethod, PyCell, PyFunction};
use crate::builtins::int::PyInt;
use crate::builtins::iter::PySequenceIterator;
use crate::builtins::list::PyList;
use crate::builtins::object::PyBaseObject;
use crate::builtins::singletons::{PyEllipsis, PyNone, PyNotImplemented};
use crate::builtins::str::PyStr;
use crate::builtins::tuple::{PyTuple, PyTupleRef};
use crate::builtins::type_::{PyAttributes, PyType, PyTypeRef};
use crate::builtins::{
    bool_, builtin_func, code, dict, float, function, int, iter, list, object, singletons,
    str as pystr, tuple, type_,
};
use crate::frame::Frame;
use crate::object::{PyObject, PyObjectRef, PyRef};
use crate::types::slot::{PyTypeFlags, PyTypeSlots};
use krait_bytecode::CodeObject;
use krait_common::hash::HashSecret;
use krait_common::lock::PyRwLock;
use malachite_bigint::BigInt;
use std::any::TypeId;

/// Every built-in type the core carries, created once at context genesis.
pub struct TypeZoo {
    pub object_type: PyTypeRef,
    pub type_type: PyTypeRef,
    pub int_type: PyTypeRef,
    pub bool_type: PyTypeRef,
    pub float_type: PyTypeRef,
    pub str_type: PyTypeRef,
    pub tuple_type: PyTypeRef,
    pub list_type: PyTypeRef,
    pub dict_type: PyTypeRef,
    pub code_type: PyTypeRef,
    pub function_type: PyTypeRef,
    pub bound_method_type: PyTypeRef,
    pub builtin_function_type: PyTypeRef,
    pub cell_type: PyTypeRef,
    pub none_type: PyTypeRef,
    pub not_implemented_type: PyTypeRef,
    pub ellipsis_type: PyTypeRef,
    pub iter_type: PyTypeRef,
    pub frame_type: PyTypeRef,
}

pub struct Context {
    pub types: TypeZoo,
    pub exceptions: ExceptionZoo,
    pub hash_secret: HashSecret,
    none: PyRef<PyNone>,
    not_implemented: PyRef<PyNotImplemented>,
    ellipsis: PyRef<PyEllipsis>,
    true_value: PyRef<PyInt>,
    false_value: PyRef<PyInt>,
    pub empty_tuple: PyTupleRef,
}

impl Context {
    pub fn new() -> Self {
        let types = TypeZoo::init();
        let exceptions = ExceptionZoo::init(&types.object_type, &types.type_type);

        let none = PyRef::new_ref(PyNone, types.none_type.clone(), None);
        let not_implemented =
            PyRef::new_ref(PyNotImplemented, types.not_implemented_type.clone(), None);
        let ellipsis = PyRef::new_ref(PyEllipsis, types.ellipsis_type.clone(), None);
        let true_value = PyRef::new_ref(PyInt::from(1), types.bool_type.clone(), None);
        let false_value = PyRef::new_ref(PyInt::from(0), types.bool_type.clone(), None);
        let empty_tuple = PyRef::new_ref(PyTuple::from(vec![]), types.tuple_type.clone(), None);

        Self {
            types,
            exceptions,
            hash_secret: HashSecret::default(),
            none,
            not_implemented,
            ellipsis,
            true_value,
            false_value,
            empty_tuple,
        }
    }

    #[inline]
    pub fn none(&self) -> PyObjectRef {
        self.none.clone().into_object()
    }

    #[inline]
    pub fn none_ref(&self) -> &PyRef<PyNone> {
        &self.none
    }

    #[inline]
    pub fn not_implemented(&self) -> PyObjectRef {
        self.not_implemented.clone().into_object()
    }

    #[inline]
    pub fn ellipsis(&self) -> PyObjectRef {
        self.ellipsis.clone().into_object()
    }

    /// The interned truth singletons; `bool` adopts the int payload.
    pub fn new_bool(&self, value: bool) -> PyRef<PyInt> {
        if value {
            self.true_value.clone()
        } else {
            self.false_value.clone()
        }
    }

    pub fn new_int<T: Into<BigInt>>(&self, value: T) -> PyRef<PyInt> {
        PyRef::new_ref(PyInt::from(value.into()), self.types.int_type.clone(), None)
    }

    pub fn new_bigint(&self, value: BigInt) -> PyRef<PyInt> {
        PyRef::new_ref(PyInt::from(value), self.types.int_type.clone(), None)
    }

    pub fn new_float(&self, value: f64) -> PyRef<PyFloat> {
        PyRef::new_ref(PyFloat::from(value), self.types.float_type.clone(), None)
    }

    pub fn new_str(&self, value: impl Into<PyStr>) -> PyRef<PyStr> {
        PyRef::new_ref(value.into(), self.types.str_type.clone(), None)
    }

    pub fn new_tuple(&self, elements: Vec<PyObjectRef>) -> PyTupleRef {
        if elements.is_empty() {
            self.empty_tuple.clone()
        } else {
            PyRef::new_ref(PyTuple::from(elements), self.types.tuple_type.clone(), None)
        }
    }

    pub fn new_list(&self, elements: Vec<PyObjectRef>) -> PyRef<PyList> {
        PyRef::new_ref(PyList::from(elements), self.types.list_type.clone(), None)
    }

    pub fn new_dict(&self) -> PyDictRef {
        PyRef::new_ref(PyDict::default(), self.types.dict_type.clone(), None)
    }

    pub fn new_code(&self, code: CodeObject) -> PyCodeRef {
        PyRef::new_ref(PyCode::new(code, self), self.types.code_type.clone(), None)
    }

    pub fn new_cell(&self) -> PyRef<PyCell> {
        PyRef::new_ref(PyCell::default(), self.types.cell_type.clone(), None)
    }

    pub fn new_native_function(&self, name: &'static str, func: PyNativeFn) -> PyRef<PyNativeFunction> {
        PyRef::new_ref(
            PyNativeFunction::new(name, func),
            self.types.builtin_function_type.clone(),
            None,
        )
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeZoo {
    fn init() -> Self {
        // object and type refer to each other; allocate them typ-less and
        // wire the cycle up before anything else observes them
        let object_slots = {
            let slots = PyTypeSlots::new("object", PyTypeFlags::BASETYPE);
            slots.repr.store(Some(object::object_repr));
            slots.hash.store(Some(object::object_hash));
            slots.richcompare.store(Some(object::object_richcompare));
            slots.getattro.store(Some(object::generic_getattr));
            slots.setattro.store(Some(object::generic_setattr));
            slots.init.store(Some(object::object_init));
            slots.new.store(Some(object::object_new));
            slots
        };
        let object_payload = PyType {
            base: None,
            bases: PyRwLock::new(vec![]),
            mro: PyRwLock::new(vec![]),
            subclasses: PyRwLock::new(vec![]),
            attributes: PyRwLock::new(PyAttributes::default()),
            accepted: vec![TypeId::of::<PyBaseObject>()],
            slots: object_slots,
            heaptype_ext: None,
        };
        let object_type: PyTypeRef =
            PyObject::new_cyclic(object_payload, None).downcast_unchecked();

        let type_slots = {
            let slots = PyTypeSlots::new("type", PyTypeFlags::BASETYPE);
            slots.call.store(Some(type_::type_call));
            slots.getattro.store(Some(type_::type_getattro));
            slots.setattro.store(Some(type_::type_setattro));
            slots.repr.store(Some(type_::type_repr));
            slots.new.store(Some(type_::type_new));
            slots.inherit(&object_type.slots);
            slots
        };
        let type_payload = PyType {
            base: Some(object_type.clone()),
            bases: PyRwLock::new(vec![object_type.clone()]),
            mro: PyRwLock::new(vec![object_type.clone()]),
            subclasses: PyRwLock::new(vec![]),
            attributes: PyRwLock::new(PyAttributes::default()),
            accepted: vec![TypeId::of::<PyType>()],
            slots: type_slots,
            heaptype_ext: None,
        };
        let type_type: PyTypeRef = PyObject::new_cyclic(type_payload, None).downcast_unchecked();

        object_type.as_object().init_typ(type_type.clone());
        type_type.as_object().init_typ(type_type.clone());
        type_type.register_subclass_of(&[object_type.clone()]);

        let new_type = |name: &'static str,
                        base: &PyTypeRef,
                        flags: PyTypeFlags,
                        accepted: Vec<TypeId>,
                        fill: &dyn Fn(&PyTypeSlots)| {
            let slots = PyTypeSlots::new(name, flags);
            fill(&slots);
            PyRef::<PyType>::new_static(Some(base.clone()), accepted, slots, type_type.clone())
        };

        let int_type = {
            let slots = PyTypeSlots {
                name: "int",
                flags: PyTypeFlags::BASETYPE,
                as_number: (&int::AS_NUMBER).into(),
                ..PyTypeSlots::default()
            };
            slots.hash.store(Some(int::int_hash));
            slots.repr.store(Some(int::int_repr));
            slots.richcompare.store(Some(int::int_richcompare));
            slots.new.store(Some(int::int_new));
            PyRef::<PyType>::new_static(
                Some(object_type.clone()),
                vec![TypeId::of::<PyInt>()],
                slots,
                type_type.clone(),
            )
        };

        // bool is an int whose instances are the two interned singletons;
        // the int payload is its accepted representation as well
        let bool_type = new_type(
            "bool",
            &int_type,
            PyTypeFlags::DEFAULT,
            vec![TypeId::of::<PyInt>()],
            &|slots| {
                slots.repr.store(Some(bool_::bool_repr));
                slots.new.store(Some(bool_::bool_new));
            },
        );

        let float_type = {
            let slots = PyTypeSlots {
                name: "float",
                flags: PyTypeFlags::BASETYPE,
                as_number: (&float::AS_NUMBER).into(),
                ..PyTypeSlots::default()
            };
            slots.hash.store(Some(float::float_hash));
            slots.repr.store(Some(float::float_repr));
            slots.richcompare.store(Some(float::float_richcompare));
            slots.new.store(Some(float::float_new));
            PyRef::<PyType>::new_static(
                Some(object_type.clone()),
                vec![TypeId::of::<PyFloat>()],
                slots,
                type_type.clone(),
            )
        };

        let str_type = {
            let slots = PyTypeSlots {
                name: "str",
                flags: PyTypeFlags::BASETYPE,
                as_number: (&pystr::AS_NUMBER).into(),
                ..PyTypeSlots::default()
            };
            slots.hash.store(Some(pystr::str_hash));
            slots.repr.store(Some(pystr::str_repr));
            slots.str.store(Some(pystr::str_str));
            slots.length.store(Some(pystr::str_len));
            slots.subscript.store(Some(pystr::str_getitem));
            slots.contains.store(Some(pystr::str_contains));
            slots.richcompare.store(Some(pystr::str_richcompare));
            slots.iter.store(Some(pystr::str_iter));
            slots.new.store(Some(pystr::str_new));
            PyRef::<PyType>::new_static(
                Some(object_type.clone()),
                vec![TypeId::of::<PyStr>()],
                slots,
                type_type.clone(),
            )
        };

        let tuple_type = {
            let slots = PyTypeSlots {
                name: "tuple",
                flags: PyTypeFlags::BASETYPE,
                as_number: (&tuple::AS_NUMBER).into(),
                ..PyTypeSlots::default()
            };
            slots.hash.store(Some(tuple::tuple_hash));
            slots.repr.store(Some(tuple::tuple_repr));
            slots.length.store(Some(tuple::tuple_len));
            slots.subscript.store(Some(tuple::tuple_getitem));
            slots.contains.store(Some(tuple::tuple_contains));
            slots.richcompare.store(Some(tuple::tuple_richcompare));
            slots.iter.store(Some(tuple::tuple_iter));
            slots.new.store(Some(tuple::tuple_new));
            PyRef::<PyType>::new_static(
                Some(object_type.clone()),
                vec![TypeId::of::<PyTuple>()],
                slots,
                type_type.clone(),
            )
        };

        let list_type = {
            let slots = PyTypeSlots {
                name: "list",
                flags: PyTypeFlags::BASETYPE,
                as_number: (&list::AS_NUMBER).into(),
                ..PyTypeSlots::default()
            };
            slots.repr.store(Some(list::list_repr));
            slots.length.store(Some(list::list_len));
            slots.subscript.store(Some(list::list_getitem));
            slots.ass_subscript.store(Some(list::list_ass_subscript));
            slots.contains.store(Some(list::list_contains));
            slots.richcompare.store(Some(list::list_richcompare));
            slots.iter.store(Some(list::list_iter));
            slots.new.store(Some(list::list_new));
            slots
                .hash
                .store(Some(crate::types::slot::hash_not_implemented));
            PyRef::<PyType>::new_static(
                Some(object_type.clone()),
                vec![TypeId::of::<PyList>()],
                slots,
                type_type.clone(),
            )
        };

        let dict_type = new_type(
            "dict",
            &object_type,
            PyTypeFlags::BASETYPE,
            vec![TypeId::of::<PyDict>()],
            &|slots| {
                slots.repr.store(Some(dict::dict_repr));
                slots.length.store(Some(dict::dict_len));
                slots.subscript.store(Some(dict::dict_subscript));
                slots.ass_subscript.store(Some(dict::dict_ass_subscript));
                slots.contains.store(Some(dict::dict_contains));
                slots.iter.store(Some(dict::dict_iter));
                slots.new.store(Some(dict::dict_new));
                slots
                    .hash
                    .store(Some(crate::types::slot::hash_not_implemented));
            },
        );

        let code_type = new_type(
            "code",
            &object_type,
            PyTypeFlags::DEFAULT,
            vec![TypeId::of::<PyCode>()],
            &|slots| {
                slots.repr.store(Some(code::code_repr));
            },
        );

        // the method-descriptor flag lets the method-call fast path defer
        // bound-method creation for these two
        let function_type = new_type(
            "function",
            &object_type,
            PyTypeFlags::METHOD_DESCRIPTOR,
            vec![TypeId::of::<PyFunction>()],
            &|slots| {
                slots.call.store(Some(function::function_call));
                slots.descr_get.store(Some(function::function_descr_get));
                slots.repr.store(Some(function::function_repr));
            },
        );

        let bound_method_type = new_type(
            "method",
            &object_type,
            PyTypeFlags::DEFAULT,
            vec![TypeId::of::<PyBoundMethod>()],
            &|slots| {
                slots.call.store(Some(function::bound_method_call));
                slots.repr.store(Some(function::bound_method_repr));
            },
        );

        let builtin_function_type = new_type(
            "builtin_function_or_method",
            &object_type,
            PyTypeFlags::METHOD_DESCRIPTOR,
            vec![TypeId::of::<PyNativeFunction>()],
            &|slots| {
                slots.call.store(Some(builtin_func::native_func_call));
                slots
                    .descr_get
                    .store(Some(builtin_func::native_func_descr_get));
                slots.repr.store(Some(builtin_func::native_func_repr));
            },
        );

        let cell_type = new_type(
            "cell",
            &object_type,
            PyTypeFlags::DEFAULT,
            vec![TypeId::of::<PyCell>()],
            &|slots| {
                slots.repr.store(Some(function::cell_repr));
            },
        );

        let none_type = {
            let slots = PyTypeSlots::new("NoneType", PyTypeFlags::DEFAULT);
            slots.repr.store(Some(singletons::none_repr));
            slots.as_number.boolean.store(Some(singletons::none_bool));
            PyRef::<PyType>::new_static(
                Some(object_type.clone()),
                vec![TypeId::of::<PyNone>()],
                slots,
                type_type.clone(),
            )
        };

        let not_implemented_type = new_type(
            "NotImplementedType",
            &object_type,
            PyTypeFlags::DEFAULT,
            vec![TypeId::of::<PyNotImplemented>()],
            &|slots| {
                slots.repr.store(Some(singletons::not_implemented_repr));
            },
        );

        let ellipsis_type = new_type(
            "ellipsis",
            &object_type,
            PyTypeFlags::DEFAULT,
            vec![TypeId::of::<PyEllipsis>()],
            &|slots| {
                slots.repr.store(Some(singletons::ellipsis_repr));
            },
        );

        let iter_type = new_type(
            "iterator",
            &object_type,
            PyTypeFlags::DEFAULT,
            vec![TypeId::of::<PySequenceIterator>()],
            &|slots| {
                slots.iter.store(Some(iter::iter_self));
                slots.iternext.store(Some(iter::iter_next));
            },
        );

        let frame_type = new_type(
            "frame",
            &object_type,
            PyTypeFlags::DEFAULT,
            vec![TypeId::of::<Frame>()],
            &|_| {},
        );

        Self {
            object_type,
            type_type,
            int_type,
            bool_type,
            float_type,
            str_type,
            tuple_type,
            list_type,
            dict_type,
            code_type,
            function_type,
            bound_method_type,
            builtin_function_type,
            cell_type,
            none_type,
            not_implemented_type,
            ellipsis_type,
            iter_type,
            frame_type,
        }
    }
}
