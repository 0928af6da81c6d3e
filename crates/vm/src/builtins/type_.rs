//! The python class `type`.

use crate::builtins::dict::PyDict;
use crate::builtins::str::PyStr;
use crate::function::{FuncArgs, PySetterValue};
use crate::object::{
    AsObject, PyObject, PyObjectRef, PyPayload, PyRef, PyResult, PyWeakObject,
};
use crate::types::slot::{PyTypeFlags, PyTypeSlots};
use crate::types::slot_defs::is_dunder_slot_name;
use crate::vm::{Context, VirtualMachine};
use indexmap::IndexMap;
use itertools::Itertools;
use krait_common::lock::PyRwLock;
use std::any::TypeId;
use std::fmt;

pub type PyTypeRef = PyRef<PyType>;

/// For attributes we do not use a python dict but an insertion-ordered
/// IndexMap keyed by name; type attribute keys are always strings.
pub type PyAttributes = IndexMap<String, PyObjectRef, ahash::RandomState>;

pub struct PyType {
    pub base: Option<PyTypeRef>,
    pub bases: PyRwLock<Vec<PyTypeRef>>,
    /// Linearization of the bases, not including this type itself.
    pub mro: PyRwLock<Vec<PyTypeRef>>,
    pub subclasses: PyRwLock<Vec<PyWeakObject>>,
    pub attributes: PyRwLock<PyAttributes>,
    /// Ordered list of host payload types accepted as instances.
    pub accepted: Vec<TypeId>,
    pub slots: PyTypeSlots,
    pub heaptype_ext: Option<Box<HeapTypeExt>>,
}

/// The parts only class statements produce: a mutable spelled name.
pub struct HeapTypeExt {
    pub name: PyRwLock<String>,
    pub qualname: PyRwLock<String>,
}

impl fmt::Debug for PyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[PyType {}]", self.name())
    }
}

impl PyPayload for PyType {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.type_type
    }
}

impl PyType {
    pub fn name(&self) -> String {
        match &self.heaptype_ext {
            Some(ext) => ext.name.read().clone(),
            None => self.slots.name.to_owned(),
        }
    }

    pub fn qualname(&self) -> String {
        match &self.heaptype_ext {
            Some(ext) => ext.qualname.read().clone(),
            None => self.slots.name.to_owned(),
        }
    }

    /// First hit for `name` along `self` + MRO; the mechanism behind both
    /// special-method and ordinary attribute resolution. Never calls user
    /// code.
    pub fn lookup(&self, name: &str) -> Option<PyObjectRef> {
        if let Some(attr) = self.attributes.read().get(name) {
            return Some(attr.clone());
        }
        for cls in self.mro.read().iter() {
            if let Some(attr) = cls.attributes.read().get(name) {
                return Some(attr.clone());
            }
        }
        None
    }

    /// Like [`lookup`], also reporting the defining class.
    pub fn lookup_with_origin(
        &self,
        name: &str,
        zelf: &PyTypeRef,
    ) -> Option<(PyObjectRef, PyTypeRef)> {
        if let Some(attr) = self.attributes.read().get(name) {
            return Some((attr.clone(), zelf.clone()));
        }
        for cls in self.mro.read().iter() {
            if let Some(attr) = cls.attributes.read().get(name) {
                return Some((attr.clone(), cls.clone()));
            }
        }
        None
    }

    pub fn has_attr_in_mro(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn get_direct_attr(&self, name: &str) -> Option<PyObjectRef> {
        self.attributes.read().get(name).cloned()
    }

    /// Whether `payload_type` is an accepted host representation.
    pub fn accepts_payload(&self, payload_type: TypeId) -> bool {
        self.accepted.contains(&payload_type)
    }

    pub(crate) fn subclasses_snapshot(&self) -> Vec<PyTypeRef> {
        self.subclasses
            .read()
            .iter()
            .filter_map(|weak| {
                weak.upgrade()
                    .map(|obj| obj.downcast::<PyType>().unwrap_or_else(|_| unreachable!()))
            })
            .collect()
    }
}

impl PyRef<PyType> {
    /// Subtype test against the precomputed MRO; never invokes user code.
    pub fn fast_issubclass(&self, other: &PyTypeRef) -> bool {
        self.is(other) || self.mro.read().iter().any(|cls| cls.is(other))
    }

    /// `self` followed by its MRO.
    pub fn iter_mro(&self) -> Vec<PyTypeRef> {
        let mut out = vec![self.clone()];
        out.extend(self.mro.read().iter().cloned());
        out
    }

    pub(crate) fn register_subclass_of(&self, bases: &[PyTypeRef]) {
        for base in bases {
            base.subclasses
                .write()
                .push(self.as_object().downgrade());
        }
    }

    /// Create a static (built-in) type. Slots are inherited from the base
    /// where unset; types are created once and sealed afterwards.
    pub fn new_static(
        base: Option<PyTypeRef>,
        accepted: Vec<TypeId>,
        slots: PyTypeSlots,
        type_type: PyTypeRef,
    ) -> PyTypeRef {
        let (bases, mro) = match &base {
            Some(base) => {
                slots.inherit(&base.slots);
                (vec![base.clone()], base.iter_mro())
            }
            None => (vec![], vec![]),
        };
        let typ = PyType {
            base,
            bases: PyRwLock::new(bases.clone()),
            mro: PyRwLock::new(mro),
            subclasses: PyRwLock::new(vec![]),
            attributes: PyRwLock::new(PyAttributes::default()),
            accepted,
            slots,
            heaptype_ext: None,
        };
        let typ: PyTypeRef = PyObject::new_ref(typ, type_type, None).downcast_unchecked();
        typ.register_subclass_of(&bases);
        typ
    }

    /// Create a class the way a `class` statement does: bases, a dict, and
    /// slot population from the dunder names it defines.
    pub fn new_heap(
        name: &str,
        bases: Vec<PyTypeRef>,
        attributes: PyAttributes,
        vm: &VirtualMachine,
    ) -> PyResult<PyTypeRef> {
        let bases = if bases.is_empty() {
            vec![vm.ctx.types.object_type.clone()]
        } else {
            bases
        };

        for base in &bases {
            if !base
                .slots
                .flags
                .has_feature(PyTypeFlags::BASETYPE)
            {
                return Err(vm.new_type_error(format!(
                    "type '{}' is not an acceptable base type",
                    base.name()
                )));
            }
        }

        let mro = linearize_mro(&bases, vm)?;
        let base = bases[0].clone();

        let slots = PyTypeSlots {
            name: base.slots.name,
            ..PyTypeSlots::heap_default()
        };
        slots.inherit(&base.slots);

        let heaptype_ext = HeapTypeExt {
            name: PyRwLock::new(name.to_owned()),
            qualname: PyRwLock::new(name.to_owned()),
        };

        let typ = PyType {
            base: Some(base),
            bases: PyRwLock::new(bases.clone()),
            mro: PyRwLock::new(mro),
            subclasses: PyRwLock::new(vec![]),
            attributes: PyRwLock::new(attributes),
            accepted: vec![],
            slots,
            heaptype_ext: Some(Box::new(heaptype_ext)),
        };

        let typ: PyTypeRef = PyObject::new_ref(typ, vm.ctx.types.type_type.clone(), None)
            .downcast_unchecked();
        typ.register_subclass_of(&bases);

        // populate slots from the dunder names the class dict defines
        let dunder_names: Vec<String> = typ
            .attributes
            .read()
            .keys()
            .filter(|name| is_dunder_slot_name(name))
            .cloned()
            .collect();
        for name in dunder_names {
            typ.update_slot(&name, vm);
        }

        Ok(typ)
    }

    /// Mutate the type dict. Slot cells of affected dunder names are
    /// re-derived and the change propagates to subtypes.
    pub fn set_type_attr(
        &self,
        name: &str,
        value: PySetterValue,
        vm: &VirtualMachine,
    ) -> PyResult<()> {
        if self.slots.flags.has_feature(PyTypeFlags::IMMUTABLETYPE) {
            return Err(vm.new_type_error(format!(
                "cannot set '{}' attribute of immutable type '{}'",
                name,
                self.name()
            )));
        }
        match value {
            PySetterValue::Assign(value) => {
                self.attributes.write().insert(name.to_owned(), value);
            }
            PySetterValue::Delete => {
                let removed = self.attributes.write().shift_remove(name);
                if removed.is_none() {
                    return Err(vm.new_attribute_error(format!(
                        "type object '{}' has no attribute '{}'",
                        self.name(),
                        name
                    )));
                }
            }
        }
        if is_dunder_slot_name(name) {
            self.update_slot(name, vm);
        }
        Ok(())
    }
}

/// C3 linearization of the bases. The result does not include the new type
/// itself.
fn linearize_mro(bases: &[PyTypeRef], vm: &VirtualMachine) -> PyResult<Vec<PyTypeRef>> {
    let mut sequences: Vec<Vec<PyTypeRef>> = bases.iter().map(|base| base.iter_mro()).collect();
    sequences.push(bases.to_vec());
    c3_merge(sequences).ok_or_else(|| {
        vm.new_type_error(format!(
            "Cannot create a consistent method resolution order (MRO) for bases {}",
            bases.iter().map(|base| base.name()).format(", ")
        ))
    })
}

fn c3_merge(mut sequences: Vec<Vec<PyTypeRef>>) -> Option<Vec<PyTypeRef>> {
    let mut result = Vec::new();
    loop {
        sequences.retain(|seq| !seq.is_empty());
        if sequences.is_empty() {
            return Some(result);
        }
        // find a head that appears in no other sequence's tail
        let head = sequences.iter().find_map(|seq| {
            let head = &seq[0];
            let good = sequences
                .iter()
                .all(|other| !other[1..].iter().any(|cls| cls.is(head)));
            good.then(|| head.clone())
        })?;
        result.push(head.clone());
        for seq in &mut sequences {
            if seq[0].is(&head) {
                seq.remove(0);
            }
        }
    }
}

// slot implementations of `type` itself

/// `type.__call__`: `__new__` then, when the result is an instance, `__init__`.
pub(crate) fn type_call(zelf: &PyObjectRef, args: FuncArgs, vm: &VirtualMachine) -> PyResult {
    let cls = zelf
        .clone()
        .downcast::<PyType>()
        .map_err(|_| vm.new_interpreter_error("type slot called on non-type"))?;

    // `type(x)` with a single argument reports the type of x
    if cls.is(&vm.ctx.types.type_type) && args.args.len() == 1 && args.kwargs.is_empty() {
        return Ok(args.args[0].class().clone().into_object());
    }

    let new = cls
        .slots
        .new
        .load()
        .ok_or_else(|| vm.new_type_error(format!("cannot create '{}' instances", cls.name())))?;
    let obj = new(cls.clone(), args.clone(), vm)?;

    if obj.class().fast_issubclass(&cls) {
        if let Some(init) = obj.class().slots.init.load() {
            init(&obj, args, vm)?;
        }
    }
    Ok(obj)
}

/// `type.__new__`: three-argument form creates a new class. Metaclasses
/// other than `type` itself are out of scope.
pub(crate) fn type_new(_cls: PyTypeRef, args: FuncArgs, vm: &VirtualMachine) -> PyResult {
    if !args.kwargs.is_empty() {
        return Err(vm.new_type_error("type() takes no keyword arguments".to_owned()));
    }
    match args.args.len() {
        1 => Ok(args.args[0].class().clone().into_object()),
        3 => {
            let name = args.args[0]
                .payload::<PyStr>()
                .ok_or_else(|| vm.new_type_error("type() argument 1 must be str".to_owned()))?
                .as_str()
                .to_owned();
            let bases: Vec<PyTypeRef> = args.args[1]
                .payload::<crate::builtins::tuple::PyTuple>()
                .ok_or_else(|| vm.new_type_error("type() argument 2 must be tuple".to_owned()))?
                .as_slice()
                .iter()
                .map(|base| {
                    base.clone().downcast::<PyType>().map_err(|obj| {
                        vm.new_type_error(format!(
                            "type() argument 2 entries must be classes, not '{}'",
                            obj.class().name()
                        ))
                    })
                })
                .collect::<PyResult<_>>()?;
            let dict = args.args[2]
                .payload::<PyDict>()
                .ok_or_else(|| vm.new_type_error("type() argument 3 must be dict".to_owned()))?;
            let mut attributes = PyAttributes::default();
            for (key, value) in dict.str_entries(vm)? {
                attributes.insert(key, value);
            }
            PyRef::<PyType>::new_heap(&name, bases, attributes, vm).map(PyRef::into_object)
        }
        n => Err(vm.new_type_error(format!("type() takes 1 or 3 arguments, got {n}"))),
    }
}

/// `type.__getattribute__`: metatype data descriptors first, then the MRO of
/// the type itself with descriptor binding, then metatype non-data.
pub(crate) fn type_getattro(zelf: &PyObjectRef, name: &str, vm: &VirtualMachine) -> PyResult {
    let cls = zelf
        .clone()
        .downcast::<PyType>()
        .map_err(|_| vm.new_interpreter_error("type slot called on non-type"))?;
    let metatype = zelf.class().clone();

    let meta_attr = metatype.lookup(name);
    if let Some(ref attr) = meta_attr {
        let attr_cls = attr.class().clone();
        if let Some(descr_get) = attr_cls.slots.descr_get.load() {
            if attr_cls.slots.descr_set.load().is_some() {
                return descr_get(
                    attr.clone(),
                    Some(zelf.clone()),
                    Some(metatype.into_object()),
                    vm,
                );
            }
        }
    }

    if let Some(attr) = cls.lookup(name) {
        if let Some(descr_get) = attr.class().slots.descr_get.load() {
            return descr_get(attr, None, Some(cls.clone().into_object()), vm);
        }
        return Ok(attr);
    }

    if let Some(attr) = meta_attr {
        if let Some(descr_get) = attr.class().slots.descr_get.load() {
            return descr_get(attr, Some(zelf.clone()), Some(metatype.into_object()), vm);
        }
        return Ok(attr);
    }

    Err(vm.new_attribute_error(format!(
        "type object '{}' has no attribute '{}'",
        cls.name(),
        name
    )))
}

pub(crate) fn type_setattro(
    zelf: &PyObjectRef,
    name: &str,
    value: PySetterValue,
    vm: &VirtualMachine,
) -> PyResult<()> {
    let cls = zelf
        .clone()
        .downcast::<PyType>()
        .map_err(|_| vm.new_interpreter_error("type slot called on non-type"))?;
    cls.set_type_attr(name, value, vm)
}

pub(crate) fn type_repr(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    let cls = zelf
        .payload::<PyType>()
        .ok_or_else(|| vm.new_interpreter_error("type slot called on non-type"))?;
    Ok(vm.ctx.new_str(format!("<class '{}'>", cls.name())))
}

#[cfg(test)]
mod tests {
    use crate::vm::Interpreter;
    use crate::object::AsObject;

    #[test]
    fn mro_is_linearized_in_c3_order() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let object = vm.ctx.types.object_type.clone();
            let a = vm.new_class("A", vec![object.clone()]).unwrap();
            let b = vm.new_class("B", vec![object.clone()]).unwrap();
            let c = vm.new_class("C", vec![a.clone(), b.clone()]).unwrap();
            let mro = c.mro.read().clone();
            let names: Vec<String> = mro.iter().map(|t| t.name()).collect();
            assert_eq!(names, ["A", "B", "object"]);
        });
    }

    #[test]
    fn inconsistent_hierarchy_is_rejected() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let a = vm
                .new_class("A", vec![vm.ctx.types.object_type.clone()])
                .unwrap();
            let b = vm.new_class("B", vec![a.clone()]).unwrap();
            // (A, B) puts A before its own subclass; C3 must fail
            let err = vm.new_class("C", vec![a.clone(), b.clone()]).unwrap_err();
            assert!(err.fast_isinstance(&vm.ctx.exceptions.type_error));
        });
    }

    #[test]
    fn subtype_test_consults_mro_only() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let a = vm
                .new_class("A", vec![vm.ctx.types.object_type.clone()])
                .unwrap();
            let b = vm.new_class("B", vec![a.clone()]).unwrap();
            assert!(b.fast_issubclass(&a));
            assert!(b.fast_issubclass(&vm.ctx.types.object_type));
            assert!(!a.fast_issubclass(&b));
        });
    }

    #[test]
    fn dict_mutation_rederives_slots() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            use crate::function::PySetterValue;
            let cls = vm
                .new_class("Widget", vec![vm.ctx.types.object_type.clone()])
                .unwrap();
            let obj = vm.call_type(&cls, vec![]).unwrap();
            assert_eq!(obj.repr(vm).unwrap().as_str(), "<Widget object>");

            // installing __repr__ swaps the slot to the dispatching wrapper
            let custom = vm.ctx.new_native_function("repr_override", |_, vm| {
                Ok(vm.ctx.new_str("custom!").into_object())
            });
            cls.set_type_attr(
                "__repr__",
                PySetterValue::Assign(custom.into_object()),
                vm,
            )
            .unwrap();
            assert_eq!(obj.repr(vm).unwrap().as_str(), "custom!");

            // removing it re-derives the inherited handle
            cls.set_type_attr("__repr__", PySetterValue::Delete, vm).unwrap();
            assert_eq!(obj.repr(vm).unwrap().as_str(), "<Widget object>");
        });
    }

    #[test]
    fn slot_updates_propagate_to_subtypes() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            use crate::function::PySetterValue;
            let base = vm
                .new_class("Base", vec![vm.ctx.types.object_type.clone()])
                .unwrap();
            let sub = vm.new_class("Sub", vec![base.clone()]).unwrap();
            let obj = vm.call_type(&sub, vec![]).unwrap();

            let custom = vm.ctx.new_native_function("repr_override", |_, vm| {
                Ok(vm.ctx.new_str("from base").into_object())
            });
            base.set_type_attr(
                "__repr__",
                PySetterValue::Assign(custom.into_object()),
                vm,
            )
            .unwrap();
            // the subtype's cell was re-derived along with the base's
            assert_eq!(obj.repr(vm).unwrap().as_str(), "from base");
        });
    }

    #[test]
    fn accepted_payloads_are_recorded_per_type() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            use crate::builtins::int::PyInt;
            use std::any::TypeId;
            // int and bool share the big-integer payload representation
            assert!(vm.ctx.types.int_type.accepts_payload(TypeId::of::<PyInt>()));
            assert!(vm.ctx.types.bool_type.accepts_payload(TypeId::of::<PyInt>()));
            let t = vm.ctx.new_bool(true);
            assert!(t
                .as_object()
                .class()
                .accepts_payload(TypeId::of::<PyInt>()));
        });
    }

    #[test]
    fn every_type_is_an_instance_of_its_type() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let int_obj = vm.ctx.new_int(3).into_object();
            assert!(int_obj.class().is(&vm.ctx.types.int_type));
            let ty = int_obj.class().as_object().clone();
            assert!(ty.class().is(&vm.ctx.types.type_type));
        });
    }
}
