//! The closed table of recognized special-method names.
//!
//! Only names listed here populate type slots; attribute writes of any other
//! dunder are ordinary dict entries with no dispatch effect.

/// Which slot cell a special method occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotAccessor {
    // mapping protocol
    MpLength,
    MpSubscript,
    MpAssSubscript,
    // sequence protocol
    SqContains,
    // number protocol
    NbAdd,
    NbSubtract,
    NbMultiply,
    NbRemainder,
    NbDivmod,
    NbPower,
    NbNegative,
    NbPositive,
    NbAbsolute,
    NbBool,
    NbInvert,
    NbLshift,
    NbRshift,
    NbAnd,
    NbXor,
    NbOr,
    NbInt,
    NbFloat,
    NbIndex,
    NbFloorDivide,
    NbTrueDivide,
    // type slots
    TpRepr,
    TpStr,
    TpHash,
    TpCall,
    TpGetattro,
    TpSetattro,
    TpRichcompare,
    TpIter,
    TpIternext,
    TpDescrGet,
    TpDescrSet,
    TpInit,
    TpNew,
}

/// The invocation shape of a slot; the discriminator for the type-erased
/// method handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotSignature {
    Unary,
    Binary,
    Ternary,
    Predicate,
    BinaryPredicate,
    Len,
    GetAttr,
    SetAttr,
    DelAttr,
    DescrGet,
    DescrSet,
    DescrDelete,
    SetItem,
    DelItem,
    Call,
    Init,
    New,
    RichCompare,
    Iter,
    IterNext,
    Hash,
}

#[derive(Clone, Copy, Debug)]
pub struct SlotDef {
    pub name: &'static str,
    pub accessor: SlotAccessor,
    pub signature: SlotSignature,
    /// Reflected side of a binary operator (`__radd__` and friends).
    pub right: bool,
}

const fn def(name: &'static str, accessor: SlotAccessor, signature: SlotSignature) -> SlotDef {
    SlotDef {
        name,
        accessor,
        signature,
        right: false,
    }
}

const fn rdef(name: &'static str, accessor: SlotAccessor, signature: SlotSignature) -> SlotDef {
    SlotDef {
        name,
        accessor,
        signature,
        right: true,
    }
}

use SlotAccessor::*;
use SlotSignature::*;

pub static SLOT_DEFS: &[SlotDef] = &[
    def("__repr__", TpRepr, Unary),
    def("__str__", TpStr, Unary),
    def("__hash__", TpHash, Hash),
    def("__call__", TpCall, Call),
    def("__getattribute__", TpGetattro, GetAttr),
    def("__getattr__", TpGetattro, GetAttr),
    def("__setattr__", TpSetattro, SetAttr),
    def("__delattr__", TpSetattro, DelAttr),
    def("__lt__", TpRichcompare, RichCompare),
    def("__le__", TpRichcompare, RichCompare),
    def("__eq__", TpRichcompare, RichCompare),
    def("__ne__", TpRichcompare, RichCompare),
    def("__gt__", TpRichcompare, RichCompare),
    def("__ge__", TpRichcompare, RichCompare),
    def("__iter__", TpIter, Iter),
    def("__next__", TpIternext, IterNext),
    def("__get__", TpDescrGet, DescrGet),
    def("__set__", TpDescrSet, DescrSet),
    def("__delete__", TpDescrSet, DescrDelete),
    def("__init__", TpInit, Init),
    def("__new__", TpNew, New),
    def("__len__", MpLength, Len),
    def("__getitem__", MpSubscript, Binary),
    def("__setitem__", MpAssSubscript, SetItem),
    def("__delitem__", MpAssSubscript, DelItem),
    def("__contains__", SqContains, BinaryPredicate),
    def("__bool__", NbBool, Predicate),
    def("__add__", NbAdd, Binary),
    rdef("__radd__", NbAdd, Binary),
    def("__sub__", NbSubtract, Binary),
    rdef("__rsub__", NbSubtract, Binary),
    def("__mul__", NbMultiply, Binary),
    rdef("__rmul__", NbMultiply, Binary),
    def("__mod__", NbRemainder, Binary),
    rdef("__rmod__", NbRemainder, Binary),
    def("__divmod__", NbDivmod, Binary),
    rdef("__rdivmod__", NbDivmod, Binary),
    def("__pow__", NbPower, Ternary),
    rdef("__rpow__", NbPower, Ternary),
    def("__neg__", NbNegative, Unary),
    def("__pos__", NbPositive, Unary),
    def("__abs__", NbAbsolute, Unary),
    def("__invert__", NbInvert, Unary),
    def("__lshift__", NbLshift, Binary),
    rdef("__rlshift__", NbLshift, Binary),
    def("__rshift__", NbRshift, Binary),
    rdef("__rrshift__", NbRshift, Binary),
    def("__and__", NbAnd, Binary),
    rdef("__rand__", NbAnd, Binary),
    def("__xor__", NbXor, Binary),
    rdef("__rxor__", NbXor, Binary),
    def("__or__", NbOr, Binary),
    rdef("__ror__", NbOr, Binary),
    def("__floordiv__", NbFloorDivide, Binary),
    rdef("__rfloordiv__", NbFloorDivide, Binary),
    def("__truediv__", NbTrueDivide, Binary),
    rdef("__rtruediv__", NbTrueDivide, Binary),
    def("__int__", NbInt, Unary),
    def("__float__", NbFloat, Unary),
    def("__index__", NbIndex, Unary),
];

pub fn find_slot_defs_by_name(name: &str) -> impl Iterator<Item = &'static SlotDef> + use<'_> {
    SLOT_DEFS.iter().filter(move |slot_def| slot_def.name == name)
}

/// Whether a name participates in slot dispatch at all.
pub fn is_dunder_slot_name(name: &str) -> bool {
    find_slot_defs_by_name(name).next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_dunder_shaped() {
        for slot_def in SLOT_DEFS {
            assert!(slot_def.name.starts_with("__") && slot_def.name.ends_with("__"));
        }
    }

    #[test]
    fn reflected_entries_pair_with_their_operator() {
        for slot_def in SLOT_DEFS.iter().filter(|d| d.right) {
            let base: Vec<_> = SLOT_DEFS
                .iter()
                .filter(|d| d.accessor == slot_def.accessor && !d.right)
                .collect();
            assert_eq!(base.len(), 1, "{} lacks a left counterpart", slot_def.name);
            assert_eq!(base[0].signature, slot_def.signature);
        }
    }

    #[test]
    fn unknown_names_are_not_slots() {
        assert!(!is_dunder_slot_name("__missing__"));
        assert!(is_dunder_slot_name("__add__"));
    }
}
