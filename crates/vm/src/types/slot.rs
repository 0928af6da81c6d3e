//! Type slots: one method-handle cell per special method.
//!
//! Reading an empty cell yields `None`; callers fall back per the abstract
//! operation table or surface a `TypeError`. Static types fill their cells
//! from native functions at creation; heap types get generic wrappers that
//! re-dispatch through the special-method lookup, installed by
//! [`PyType::update_slot`] whenever the type dict changes.

use crate::builtins::exceptions::PyBaseExceptionRef;
use crate::builtins::int::PyInt;
use crate::builtins::str::PyStr;
use crate::builtins::type_::{PyType, PyTypeRef};
use crate::function::{FuncArgs, PySetterValue};
use crate::object::{PyObjectRef, PyRef, PyResult};
use crate::protocol::number::PyNumberSlots;
use crate::protocol::PyIterReturn;
use crate::types::slot_defs::{find_slot_defs_by_name, SlotAccessor, SlotDef};
use crate::vm::VirtualMachine;
use bitflags::bitflags;
use crossbeam_utils::atomic::AtomicCell;
use krait_bytecode::ComparisonOperator;
use krait_common::hash::{fix_sentinel, hash_bigint, PyHash};
use num_traits::{Signed, ToPrimitive, Zero};

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct PyTypeFlags: u64 {
        const IMMUTABLETYPE = 1 << 8;
        const HEAPTYPE = 1 << 9;
        const BASETYPE = 1 << 10;
        const METHOD_DESCRIPTOR = 1 << 17;
        const HAS_DICT = 1 << 40;
    }
}

impl PyTypeFlags {
    pub const DEFAULT: Self = Self::empty();

    /// Flags of classes created in python code: subclassable heap types
    /// whose instances carry a `__dict__`.
    pub const fn heap_type_flags() -> Self {
        match Self::from_bits(
            Self::DEFAULT.bits() | Self::HEAPTYPE.bits() | Self::BASETYPE.bits() | Self::HAS_DICT.bits(),
        ) {
            Some(flags) => flags,
            None => unreachable!(),
        }
    }

    pub const fn has_feature(self, flag: Self) -> bool {
        self.contains(flag)
    }
}

impl Default for PyTypeFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

pub type GenericMethod = fn(&PyObjectRef, FuncArgs, &VirtualMachine) -> PyResult;
pub type HashFunc = fn(&PyObjectRef, &VirtualMachine) -> PyResult<PyHash>;
pub type StringifyFunc = fn(&PyObjectRef, &VirtualMachine) -> PyResult<PyRef<PyStr>>;
pub type GetattroFunc = fn(&PyObjectRef, &str, &VirtualMachine) -> PyResult;
pub type SetattroFunc = fn(&PyObjectRef, &str, PySetterValue, &VirtualMachine) -> PyResult<()>;
pub type RichCompareFunc =
    fn(&PyObjectRef, &PyObjectRef, PyComparisonOp, &VirtualMachine) -> PyResult;
pub type IterFunc = fn(PyObjectRef, &VirtualMachine) -> PyResult;
pub type IterNextFunc = fn(&PyObjectRef, &VirtualMachine) -> PyResult<PyIterReturn>;
pub type DescrGetFunc =
    fn(PyObjectRef, Option<PyObjectRef>, Option<PyObjectRef>, &VirtualMachine) -> PyResult;
pub type DescrSetFunc = fn(&PyObjectRef, PyObjectRef, PySetterValue, &VirtualMachine) -> PyResult<()>;
pub type NewFunc = fn(PyTypeRef, FuncArgs, &VirtualMachine) -> PyResult;
pub type InitFunc = fn(&PyObjectRef, FuncArgs, &VirtualMachine) -> PyResult<()>;
pub type LenFunc = fn(&PyObjectRef, &VirtualMachine) -> PyResult<usize>;
pub type SubscriptFunc = fn(&PyObjectRef, &PyObjectRef, &VirtualMachine) -> PyResult;
pub type AssSubscriptFunc =
    fn(&PyObjectRef, &PyObjectRef, Option<PyObjectRef>, &VirtualMachine) -> PyResult<()>;
pub type ContainsFunc = fn(&PyObjectRef, &PyObjectRef, &VirtualMachine) -> PyResult<bool>;

/// The operation-slot table of one type. The corresponding CPython fields
/// are `tp_` prefixed; e.g. `repr` is `tp_repr`.
#[derive(Default)]
pub struct PyTypeSlots {
    /// `tp_name`. Heap types keep their spelled name next to the dict; this
    /// stays the name of the defining static type.
    pub name: &'static str,

    pub flags: PyTypeFlags,

    /// Method suite for the numeric tower, including reflected cells.
    pub as_number: PyNumberSlots,

    // mapping/sequence suite, flattened: the core only distinguishes
    // subscripting and membership
    pub length: AtomicCell<Option<LenFunc>>,
    pub subscript: AtomicCell<Option<SubscriptFunc>>,
    pub ass_subscript: AtomicCell<Option<AssSubscriptFunc>>,
    pub contains: AtomicCell<Option<ContainsFunc>>,

    pub hash: AtomicCell<Option<HashFunc>>,
    pub call: AtomicCell<Option<GenericMethod>>,
    pub str: AtomicCell<Option<StringifyFunc>>,
    pub repr: AtomicCell<Option<StringifyFunc>>,
    pub getattro: AtomicCell<Option<GetattroFunc>>,
    pub setattro: AtomicCell<Option<SetattroFunc>>,
    pub richcompare: AtomicCell<Option<RichCompareFunc>>,
    pub iter: AtomicCell<Option<IterFunc>>,
    pub iternext: AtomicCell<Option<IterNextFunc>>,
    pub descr_get: AtomicCell<Option<DescrGetFunc>>,
    pub descr_set: AtomicCell<Option<DescrSetFunc>>,
    pub init: AtomicCell<Option<InitFunc>>,
    pub new: AtomicCell<Option<NewFunc>>,
}

impl PyTypeSlots {
    pub fn new(name: &'static str, flags: PyTypeFlags) -> Self {
        Self {
            name,
            flags,
            ..Default::default()
        }
    }

    pub fn heap_default() -> Self {
        Self {
            flags: PyTypeFlags::heap_type_flags(),
            ..Default::default()
        }
    }

    /// Fill every empty cell from `base`. Runs once per type at creation;
    /// afterwards each cell is maintained by `update_slot`.
    pub(crate) fn inherit(&self, base: &Self) {
        macro_rules! inherit_cells {
            ($($slot:ident),+ $(,)?) => {$(
                if self.$slot.load().is_none() {
                    self.$slot.store(base.$slot.load());
                }
            )+};
        }
        inherit_cells!(
            length, subscript, ass_subscript, contains, hash, call, str, repr, getattro, setattro,
            richcompare, iter, iternext, descr_get, descr_set, init, new,
        );
        self.as_number.inherit(&base.as_number);
    }
}

impl std::fmt::Debug for PyTypeSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PyTypeSlots")
    }
}

/// A comparison operation, as dispatched through the `richcompare` slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PyComparisonOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl From<ComparisonOperator> for PyComparisonOp {
    fn from(op: ComparisonOperator) -> Self {
        match op {
            ComparisonOperator::Less => Self::Lt,
            ComparisonOperator::LessOrEqual => Self::Le,
            ComparisonOperator::Equal => Self::Eq,
            ComparisonOperator::NotEqual => Self::Ne,
            ComparisonOperator::Greater => Self::Gt,
            ComparisonOperator::GreaterOrEqual => Self::Ge,
        }
    }
}

impl PyComparisonOp {
    pub const fn method_name(self) -> &'static str {
        match self {
            Self::Lt => "__lt__",
            Self::Le => "__le__",
            Self::Eq => "__eq__",
            Self::Ne => "__ne__",
            Self::Gt => "__gt__",
            Self::Ge => "__ge__",
        }
    }

    /// The operation the reflected operand answers: `a < b` asks `b > a`.
    pub const fn swapped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
        }
    }

    pub const fn operator_token(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// Identity implies equality; `v is w` answers `==`/`!=` without
    /// consulting `__eq__`.
    pub fn identical_optimization(self, a: &PyObjectRef, b: &PyObjectRef) -> Option<bool> {
        match self {
            Self::Eq if a.is(b) => Some(true),
            Self::Ne if a.is(b) => Some(false),
            _ => None,
        }
    }
}

// Generic wrappers installed into slots when a heap type defines the dunder
// in python. Each re-dispatches through the special-method lookup so that
// the current attribute wins even after rebinding.

fn repr_wrapper(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    let ret = vm.call_special_method(zelf, "__repr__", ())?;
    ret.downcast::<PyStr>().map_err(|obj| {
        vm.new_type_error(format!(
            "__repr__ returned non-string (type {})",
            obj.class().name()
        ))
    })
}

fn str_wrapper(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    let ret = vm.call_special_method(zelf, "__str__", ())?;
    ret.downcast::<PyStr>().map_err(|obj| {
        vm.new_type_error(format!(
            "__str__ returned non-string (type {})",
            obj.class().name()
        ))
    })
}

fn hash_wrapper(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyHash> {
    let hash_obj = vm.call_special_method(zelf, "__hash__", ())?;
    let py_int = hash_obj
        .payload::<PyInt>()
        .ok_or_else(|| vm.new_type_error("__hash__ method should return an integer".to_owned()))?;
    let big = py_int.as_bigint();
    let hash = big
        .to_i64()
        .map(fix_sentinel)
        .unwrap_or_else(|| hash_bigint(big));
    Ok(hash)
}

/// Marks a type as unhashable; installed for `__hash__ = None`.
pub fn hash_not_implemented(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyHash> {
    Err(vm.new_type_error(format!("unhashable type: '{}'", zelf.class().name())))
}

fn call_wrapper(zelf: &PyObjectRef, args: FuncArgs, vm: &VirtualMachine) -> PyResult {
    vm.call_special_method(zelf, "__call__", args)
}

fn getattro_wrapper(zelf: &PyObjectRef, name: &str, vm: &VirtualMachine) -> PyResult {
    // built-in bases keep their dicts empty, so an inherited default
    // __getattribute__ means the generic machinery
    let primary = if zelf.class().has_attr_in_mro("__getattribute__") {
        vm.call_special_method(zelf, "__getattribute__", (vm.ctx.new_str(name),))
    } else {
        crate::builtins::object::generic_getattr(zelf, name, vm)
    };
    match primary {
        Ok(r) => Ok(r),
        Err(e)
            if e.fast_isinstance(&vm.ctx.exceptions.attribute_error)
                && zelf.class().has_attr_in_mro("__getattr__") =>
        {
            vm.call_special_method(zelf, "__getattr__", (vm.ctx.new_str(name),))
        }
        Err(e) => Err(e),
    }
}

fn setattro_wrapper(
    zelf: &PyObjectRef,
    name: &str,
    value: PySetterValue,
    vm: &VirtualMachine,
) -> PyResult<()> {
    match value {
        PySetterValue::Assign(assigned) => {
            if zelf.class().has_attr_in_mro("__setattr__") {
                vm.call_special_method(
                    zelf,
                    "__setattr__",
                    (vm.ctx.new_str(name), assigned),
                )?;
            } else {
                crate::builtins::object::generic_setattr(
                    zelf,
                    name,
                    PySetterValue::Assign(assigned),
                    vm,
                )?;
            }
        }
        PySetterValue::Delete => {
            if zelf.class().has_attr_in_mro("__delattr__") {
                vm.call_special_method(zelf, "__delattr__", (vm.ctx.new_str(name),))?;
            } else {
                crate::builtins::object::generic_setattr(zelf, name, PySetterValue::Delete, vm)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn richcompare_wrapper(
    zelf: &PyObjectRef,
    other: &PyObjectRef,
    op: PyComparisonOp,
    vm: &VirtualMachine,
) -> PyResult {
    // absence of the specific dunder answers NotImplemented, letting the
    // caller try the reflection rule
    match vm.get_special_method(zelf, op.method_name())? {
        Some(meth) => meth.invoke((other.clone(),), vm),
        None => Ok(vm.ctx.not_implemented()),
    }
}

fn iter_wrapper(zelf: PyObjectRef, vm: &VirtualMachine) -> PyResult {
    vm.call_special_method(&zelf, "__iter__", ())
}

fn iternext_wrapper(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyIterReturn> {
    PyIterReturn::from_pyresult(vm.call_special_method(zelf, "__next__", ()), vm)
}

fn descr_get_wrapper(
    zelf: PyObjectRef,
    obj: Option<PyObjectRef>,
    cls: Option<PyObjectRef>,
    vm: &VirtualMachine,
) -> PyResult {
    let obj = obj.unwrap_or_else(|| vm.ctx.none());
    let cls = cls.unwrap_or_else(|| vm.ctx.none());
    vm.call_special_method(&zelf, "__get__", (obj, cls))
}

fn descr_set_wrapper(
    zelf: &PyObjectRef,
    obj: PyObjectRef,
    value: PySetterValue,
    vm: &VirtualMachine,
) -> PyResult<()> {
    match value {
        PySetterValue::Assign(val) => vm.call_special_method(zelf, "__set__", (obj, val)),
        PySetterValue::Delete => vm.call_special_method(zelf, "__delete__", (obj,)),
    }
    .map(drop)
}

fn init_wrapper(obj: &PyObjectRef, args: FuncArgs, vm: &VirtualMachine) -> PyResult<()> {
    let res = vm.call_special_method(obj, "__init__", args)?;
    if !vm.is_none(&res) {
        return Err(vm.new_type_error(format!(
            "__init__ should return None, not '{:.200}'",
            res.class().name()
        )));
    }
    Ok(())
}

pub(crate) fn new_wrapper(cls: PyTypeRef, mut args: FuncArgs, vm: &VirtualMachine) -> PyResult {
    let new = cls.lookup("__new__").ok_or_else(|| {
        vm.new_type_error(format!("cannot create '{}' instances", cls.name()))
    })?;
    args.prepend_arg(cls.into_object());
    new.call(args, vm)
}

fn len_wrapper(obj: &PyObjectRef, vm: &VirtualMachine) -> PyResult<usize> {
    let ret = vm.call_special_method(obj, "__len__", ())?;
    let len = ret.payload::<PyInt>().ok_or_else(|| {
        vm.new_type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            ret.class().name()
        ))
    })?;
    let len = len.as_bigint();
    if len.is_negative() {
        return Err(vm.new_value_error("__len__() should return >= 0".to_owned()));
    }
    len.to_usize()
        .ok_or_else(|| vm.new_overflow_error("cannot fit 'int' into an index-sized integer".to_owned()))
}

fn subscript_wrapper(obj: &PyObjectRef, needle: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    vm.call_special_method(obj, "__getitem__", (needle.clone(),))
}

fn ass_subscript_wrapper(
    obj: &PyObjectRef,
    needle: &PyObjectRef,
    value: Option<PyObjectRef>,
    vm: &VirtualMachine,
) -> PyResult<()> {
    // __setitem__ and __delitem__ share the slot; report the missing half
    // the way an empty slot would
    match value {
        Some(value) => {
            if !obj.class().has_attr_in_mro("__setitem__") {
                return Err(vm.new_type_error(format!(
                    "'{:.200}' object does not support item assignment",
                    obj.class().name()
                )));
            }
            vm.call_special_method(obj, "__setitem__", (needle.clone(), value))
        }
        None => {
            if !obj.class().has_attr_in_mro("__delitem__") {
                return Err(vm.new_type_error(format!(
                    "'{:.200}' object does not support item deletion",
                    obj.class().name()
                )));
            }
            vm.call_special_method(obj, "__delitem__", (needle.clone(),))
        }
    }
    .map(drop)
}

fn contains_wrapper(obj: &PyObjectRef, needle: &PyObjectRef, vm: &VirtualMachine) -> PyResult<bool> {
    let ret = vm.call_special_method(obj, "__contains__", (needle.clone(),))?;
    ret.try_to_bool(vm)
}

fn bool_wrapper(obj: &PyObjectRef, vm: &VirtualMachine) -> PyResult<bool> {
    let result = vm.call_special_method(obj, "__bool__", ())?;
    if !result.class().is(&vm.ctx.types.bool_type) {
        return Err(vm.new_type_error(format!(
            "__bool__ should return bool, returned {}",
            result.class().name()
        )));
    }
    Ok(!result
        .payload::<PyInt>()
        .map_or(false, |i| i.as_bigint().is_zero()))
}

macro_rules! number_unary_op_wrapper {
    ($name:literal) => {
        |a: &PyObjectRef, vm: &VirtualMachine| vm.call_special_method(a, $name, ())
    };
}

macro_rules! number_binary_op_wrapper {
    ($name:literal) => {
        |a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine| {
            vm.call_special_method(a, $name, (b.clone(),))
        }
    };
}

macro_rules! number_binary_right_op_wrapper {
    ($name:literal) => {
        |a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine| {
            vm.call_special_method(b, $name, (a.clone(),))
        }
    };
}

macro_rules! number_ternary_op_wrapper {
    ($name:literal) => {
        |a: &PyObjectRef, b: &PyObjectRef, c: &PyObjectRef, vm: &VirtualMachine| {
            if vm.is_none(c) {
                vm.call_special_method(a, $name, (b.clone(),))
            } else {
                vm.call_special_method(a, $name, (b.clone(), c.clone()))
            }
        }
    };
}

macro_rules! number_ternary_right_op_wrapper {
    ($name:literal) => {
        |a: &PyObjectRef, b: &PyObjectRef, c: &PyObjectRef, vm: &VirtualMachine| {
            if vm.is_none(c) {
                vm.call_special_method(b, $name, (a.clone(),))
            } else {
                vm.call_special_method(b, $name, (a.clone(), c.clone()))
            }
        }
    };
}

impl PyType {
    /// Re-derive the slots affected by a change of `name` in this type's
    /// dict, then propagate to subtypes whose own dicts do not shadow it.
    pub(crate) fn update_slot(&self, name: &str, vm: &VirtualMachine) {
        debug_assert!(name.starts_with("__") && name.ends_with("__"));
        trace!("updating slot {} on type {}", name, self.name());
        for slot_def in find_slot_defs_by_name(name) {
            self.update_one_slot(slot_def, vm);
        }
        for subclass in self.subclasses_snapshot() {
            // a subtype defining the name itself owns its cell
            if !subclass.attributes.read().contains_key(name) {
                subclass.update_slot(name, vm);
            }
        }
    }

    /// Whether the dunder is visible on this type through the MRO.
    fn dunder_defined(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// The cell value this type would inherit for a slot, i.e. the current
    /// value of the next type in the MRO.
    fn inherited<T: Copy>(&self, read: impl Fn(&PyType) -> Option<T>) -> Option<T> {
        self.mro.read().first().and_then(|base| read(base))
    }

    fn update_one_slot(&self, slot_def: &SlotDef, vm: &VirtualMachine) {
        let name = slot_def.name;
        let defined = self.dunder_defined(name);

        macro_rules! update_main_slot {
            ($slot:ident, $wrapper:expr) => {{
                if defined {
                    self.slots.$slot.store(Some($wrapper));
                } else {
                    self.slots
                        .$slot
                        .store(self.inherited(|base| base.slots.$slot.load()));
                }
            }};
        }

        macro_rules! update_number_slot {
            ($slot:ident, $wrapper:expr) => {{
                if defined {
                    self.slots.as_number.$slot.store(Some($wrapper));
                } else {
                    self.slots
                        .as_number
                        .$slot
                        .store(self.inherited(|base| base.slots.as_number.$slot.load()));
                }
            }};
        }

        macro_rules! update_binary_number_slot {
            ($left:ident, $right:ident, $lname:literal, $rname:literal) => {{
                if slot_def.right {
                    update_number_slot!($right, number_binary_right_op_wrapper!($rname))
                } else {
                    update_number_slot!($left, number_binary_op_wrapper!($lname))
                }
            }};
        }

        match slot_def.accessor {
            SlotAccessor::TpRepr => update_main_slot!(repr, repr_wrapper),
            SlotAccessor::TpStr => update_main_slot!(str, str_wrapper),
            SlotAccessor::TpHash => {
                // `__hash__ = None` marks the type unhashable
                let marked_unhashable = self
                    .lookup(name)
                    .is_some_and(|attr| vm.is_none(&attr));
                if marked_unhashable {
                    self.slots.hash.store(Some(hash_not_implemented));
                } else {
                    update_main_slot!(hash, hash_wrapper)
                }
            }
            SlotAccessor::TpCall => update_main_slot!(call, call_wrapper),
            SlotAccessor::TpGetattro => update_main_slot!(getattro, getattro_wrapper),
            SlotAccessor::TpSetattro => update_main_slot!(setattro, setattro_wrapper),
            SlotAccessor::TpRichcompare => update_main_slot!(richcompare, richcompare_wrapper),
            SlotAccessor::TpIter => update_main_slot!(iter, iter_wrapper),
            SlotAccessor::TpIternext => update_main_slot!(iternext, iternext_wrapper),
            SlotAccessor::TpDescrGet => update_main_slot!(descr_get, descr_get_wrapper),
            SlotAccessor::TpDescrSet => update_main_slot!(descr_set, descr_set_wrapper),
            SlotAccessor::TpInit => update_main_slot!(init, init_wrapper),
            SlotAccessor::TpNew => update_main_slot!(new, new_wrapper),
            SlotAccessor::MpLength => update_main_slot!(length, len_wrapper),
            SlotAccessor::MpSubscript => update_main_slot!(subscript, subscript_wrapper),
            SlotAccessor::MpAssSubscript => {
                update_main_slot!(ass_subscript, ass_subscript_wrapper)
            }
            SlotAccessor::SqContains => update_main_slot!(contains, contains_wrapper),
            SlotAccessor::NbBool => update_number_slot!(boolean, bool_wrapper),
            SlotAccessor::NbNegative => {
                update_number_slot!(negative, number_unary_op_wrapper!("__neg__"))
            }
            SlotAccessor::NbPositive => {
                update_number_slot!(positive, number_unary_op_wrapper!("__pos__"))
            }
            SlotAccessor::NbAbsolute => {
                update_number_slot!(absolute, number_unary_op_wrapper!("__abs__"))
            }
            SlotAccessor::NbInvert => {
                update_number_slot!(invert, number_unary_op_wrapper!("__invert__"))
            }
            SlotAccessor::NbInt => update_number_slot!(int, number_unary_op_wrapper!("__int__")),
            SlotAccessor::NbFloat => {
                update_number_slot!(float, number_unary_op_wrapper!("__float__"))
            }
            SlotAccessor::NbIndex => {
                update_number_slot!(index, number_unary_op_wrapper!("__index__"))
            }
            SlotAccessor::NbAdd => {
                update_binary_number_slot!(add, right_add, "__add__", "__radd__")
            }
            SlotAccessor::NbSubtract => {
                update_binary_number_slot!(subtract, right_subtract, "__sub__", "__rsub__")
            }
            SlotAccessor::NbMultiply => {
                update_binary_number_slot!(multiply, right_multiply, "__mul__", "__rmul__")
            }
            SlotAccessor::NbRemainder => {
                update_binary_number_slot!(remainder, right_remainder, "__mod__", "__rmod__")
            }
            SlotAccessor::NbDivmod => {
                update_binary_number_slot!(divmod, right_divmod, "__divmod__", "__rdivmod__")
            }
            SlotAccessor::NbLshift => {
                update_binary_number_slot!(lshift, right_lshift, "__lshift__", "__rlshift__")
            }
            SlotAccessor::NbRshift => {
                update_binary_number_slot!(rshift, right_rshift, "__rshift__", "__rrshift__")
            }
            SlotAccessor::NbAnd => {
                update_binary_number_slot!(and, right_and, "__and__", "__rand__")
            }
            SlotAccessor::NbXor => {
                update_binary_number_slot!(xor, right_xor, "__xor__", "__rxor__")
            }
            SlotAccessor::NbOr => update_binary_number_slot!(or, right_or, "__or__", "__ror__"),
            SlotAccessor::NbFloorDivide => {
                update_binary_number_slot!(
                    floor_divide,
                    right_floor_divide,
                    "__floordiv__",
                    "__rfloordiv__"
                )
            }
            SlotAccessor::NbTrueDivide => {
                update_binary_number_slot!(
                    true_divide,
                    right_true_divide,
                    "__truediv__",
                    "__rtruediv__"
                )
            }
            SlotAccessor::NbPower => {
                if slot_def.right {
                    update_number_slot!(right_power, number_ternary_right_op_wrapper!("__rpow__"))
                } else {
                    update_number_slot!(power, number_ternary_op_wrapper!("__pow__"))
                }
            }
        }
    }
}

/// Helper shared by `is_true` paths: an exception is also the error type of
/// predicates, keep the alias close to the slot types.
pub type PyPredicateResult = Result<bool, PyBaseExceptionRef>;
