//! The code object: the immutable compiled body of a function or module,
//! together with the packed instruction words and the variable layout.

use crate::opcode::Opcode;
use bitflags::bitflags;
use malachite_bigint::BigInt;
use std::fmt;
use std::ops::Deref;

bitflags! {
    /// `co_flags`. The known set is the CPython 3.8 one; anything else in a
    /// marshal stream is rejected (see [`crate::marshal`]).
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct CodeFlags: u32 {
        const OPTIMIZED = 0x0001;
        const NEWLOCALS = 0x0002;
        const VARARGS = 0x0004;
        const VARKEYWORDS = 0x0008;
        const NESTED = 0x0010;
        const GENERATOR = 0x0020;
        const NOFREE = 0x0040;
        const COROUTINE = 0x0080;
        const ITERABLE_COROUTINE = 0x0100;
        const ASYNC_GENERATOR = 0x0200;
    }
}

bitflags! {
    /// Immediate of `MAKE_FUNCTION`, selecting which extras are popped.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct MakeFunctionFlags: u8 {
        const DEFAULTS = 0x01;
        const KW_ONLY_DEFAULTS = 0x02;
        const ANNOTATIONS = 0x04;
        const CLOSURE = 0x08;
    }
}

/// Immediate of `COMPARE_OP`. Numbering matches the CPython `cmp_op` table;
/// the membership/identity entries of 3.8 are served by the dedicated
/// `IS_OP`/`CONTAINS_OP` opcodes instead.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ComparisonOperator {
    Less = 0,
    LessOrEqual = 1,
    Equal = 2,
    NotEqual = 3,
    Greater = 4,
    GreaterOrEqual = 5,
}

impl ComparisonOperator {
    pub const fn from_op_arg(arg: u32) -> Option<Self> {
        Some(match arg {
            0 => Self::Less,
            1 => Self::LessOrEqual,
            2 => Self::Equal,
            3 => Self::NotEqual,
            4 => Self::Greater,
            5 => Self::GreaterOrEqual,
            _ => return None,
        })
    }
}

/// Immediate of `RAISE_VARARGS`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RaiseKind {
    Reraise,
    Raise,
    RaiseCause,
}

impl RaiseKind {
    pub const fn from_op_arg(arg: u32) -> Option<Self> {
        Some(match arg {
            0 => Self::Reraise,
            1 => Self::Raise,
            2 => Self::RaiseCause,
            _ => return None,
        })
    }
}

/// A constant as it appears in a marshal stream, before the runtime has
/// turned it into an object.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstantData {
    None,
    Ellipsis,
    Boolean { value: bool },
    Integer { value: BigInt },
    Float { value: f64 },
    Str { value: String },
    Bytes { value: Vec<u8> },
    Tuple { elements: Vec<ConstantData> },
    Code { code: Box<CodeObject> },
}

/// An opcode argument that may be widened by preceding `EXTENDED_ARG` words.
#[derive(Copy, Clone, PartialEq, Eq)]
#[repr(transparent)]
pub struct OpArgByte(pub u8);

impl OpArgByte {
    pub const fn null() -> Self {
        Self(0)
    }
}

impl From<u8> for OpArgByte {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for OpArgByte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A full 32-bit oparg, including any `EXTENDED_ARG` extension.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct OpArg(pub u32);

impl From<u32> for OpArg {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// The running extended-argument register of the evaluation loop.
///
/// Every opcode that consumes an argument ors the low byte of its word into
/// `state << 8`; `EXTENDED_ARG` leaves the accumulated state in place, any
/// other opcode resets it after use.
#[derive(Default, Copy, Clone)]
#[repr(transparent)]
pub struct OpArgState {
    state: u32,
}

impl OpArgState {
    #[inline(always)]
    pub fn get(&mut self, unit: CodeUnit) -> (Opcode, OpArg) {
        let arg = self.extend(unit.arg);
        if unit.op != Opcode::ExtendedArg {
            self.reset();
        }
        (unit.op, arg)
    }

    #[inline(always)]
    pub fn extend(&mut self, arg: OpArgByte) -> OpArg {
        self.state = (self.state << 8) | u32::from(arg.0);
        OpArg(self.state)
    }

    #[inline(always)]
    pub fn reset(&mut self) {
        self.state = 0;
    }
}

/// One 16-bit instruction word: high byte opcode, low byte immediate.
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(C)]
pub struct CodeUnit {
    pub op: Opcode,
    pub arg: OpArgByte,
}

impl CodeUnit {
    pub const fn new(op: Opcode, arg: OpArgByte) -> Self {
        Self { op, arg }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CodeUnits(Box<[CodeUnit]>);

impl CodeUnits {
    /// Decode a raw `co_code` byte string. Rejects odd lengths and unknown
    /// opcode bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InvalidBytecode> {
        if bytes.len() % 2 != 0 {
            return Err(InvalidBytecode::OddLength(bytes.len()));
        }
        bytes
            .chunks_exact(2)
            .enumerate()
            .map(|(i, chunk)| {
                let op = Opcode::try_from(chunk[0])
                    .map_err(|_| InvalidBytecode::UnknownOpcode { offset: i * 2, byte: chunk[0] })?;
                Ok(CodeUnit::new(op, OpArgByte(chunk[1])))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|units| Self(units.into_boxed_slice()))
    }

    /// Re-encode as a `co_code` byte string.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.0.len() * 2);
        for unit in self.0.iter() {
            out.push(unit.op as u8);
            out.push(unit.arg.0);
        }
        out
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidBytecode {
    #[error("bytecode length {0} is not a multiple of two")]
    OddLength(usize),
    #[error("unknown opcode byte {byte:#04x} at offset {offset}")]
    UnknownOpcode { offset: usize, byte: u8 },
}

impl From<Vec<CodeUnit>> for CodeUnits {
    fn from(value: Vec<CodeUnit>) -> Self {
        Self(value.into_boxed_slice())
    }
}

impl FromIterator<CodeUnit> for CodeUnits {
    fn from_iter<T: IntoIterator<Item = CodeUnit>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Deref for CodeUnits {
    type Target = [CodeUnit];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Storage class of one named variable in a code object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VarKind {
    /// Lives in the fast-local array at its layout index.
    Local,
    /// Allocated as a fresh cell by each frame.
    Cell,
    /// A cell initialized from the fast-local slot `arg_index`.
    CellArg { arg_index: u32 },
    /// Supplied by the closure of the function object.
    Free,
}

/// One entry of the ordered variable layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub kind: VarKind,
}

/// Kind bits of `localspluskinds` in the marshal stream.
pub const KIND_LOCAL: u8 = 0x20;
pub const KIND_CELL: u8 = 0x40;
pub const KIND_FREE: u8 = 0x80;

/// Primary container of a single code object. Each python function has
/// a code object, and so does a module body.
#[derive(Clone, PartialEq)]
pub struct CodeObject {
    pub instructions: CodeUnits,
    pub flags: CodeFlags,
    pub posonlyarg_count: u32,
    pub arg_count: u32,
    pub kwonlyarg_count: u32,
    pub source_path: String,
    /// Name of the object this code was compiled from.
    pub obj_name: String,
    /// Qualified name, as in `co_qualname`.
    pub qualname: String,
    pub first_line_number: u32,
    pub max_stackdepth: u32,
    pub constants: Box<[ConstantData]>,
    pub names: Box<[String]>,
    /// Ordered variable descriptors; the authoritative record of the
    /// fast-local / cell / free split.
    pub layout: Box<[Variable]>,
    pub linetable: Box<[u8]>,
    pub exceptiontable: Box<[u8]>,
}

impl CodeObject {
    pub fn varnames(&self) -> impl Iterator<Item = &str> {
        self.layout.iter().filter_map(|v| match v.kind {
            VarKind::Local | VarKind::CellArg { .. } => Some(v.name.as_str()),
            _ => None,
        })
    }

    pub fn cellvars(&self) -> impl Iterator<Item = &str> {
        self.layout.iter().filter_map(|v| match v.kind {
            VarKind::Cell | VarKind::CellArg { .. } => Some(v.name.as_str()),
            _ => None,
        })
    }

    pub fn freevars(&self) -> impl Iterator<Item = &str> {
        self.layout.iter().filter_map(|v| match v.kind {
            VarKind::Free => Some(v.name.as_str()),
            _ => None,
        })
    }

    pub fn nlocals(&self) -> usize {
        self.varnames().count()
    }

    pub fn ncellvars(&self) -> usize {
        self.cellvars().count()
    }

    pub fn nfreevars(&self) -> usize {
        self.freevars().count()
    }

    /// For each cell variable, the fast-local index it is initialized from,
    /// or -1. `None` when no cell variable is an argument.
    pub fn cell2arg(&self) -> Option<Vec<i32>> {
        let mut any = false;
        let mut map = Vec::with_capacity(self.ncellvars());
        for var in self.layout.iter() {
            match var.kind {
                VarKind::Cell => map.push(-1),
                VarKind::CellArg { arg_index } => {
                    any = true;
                    map.push(arg_index as i32);
                }
                _ => {}
            }
        }
        any.then_some(map)
    }

    /// Regenerate the `localsplusnames` tuple of the marshal stream.
    pub fn localsplusnames(&self) -> Vec<String> {
        self.layout.iter().map(|v| v.name.clone()).collect()
    }

    /// Regenerate the `localspluskinds` byte string of the marshal stream.
    pub fn localspluskinds(&self) -> Vec<u8> {
        self.layout
            .iter()
            .map(|v| match v.kind {
                VarKind::Local => KIND_LOCAL,
                VarKind::Cell => KIND_CELL,
                VarKind::CellArg { .. } => KIND_LOCAL | KIND_CELL,
                VarKind::Free => KIND_FREE,
            })
            .collect()
    }
}

impl fmt::Debug for CodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<code object {} file {:?}, line {}>",
            self.obj_name, self.source_path, self.first_line_number
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oparg_state_extends_and_resets() {
        let mut state = OpArgState::default();
        let (_, arg) = state.get(CodeUnit::new(Opcode::ExtendedArg, OpArgByte(1)));
        assert_eq!(arg, OpArg(1));
        let (_, arg) = state.get(CodeUnit::new(Opcode::LoadConst, OpArgByte(2)));
        assert_eq!(arg, OpArg(0x0102));
        // consumed; next word starts fresh
        let (_, arg) = state.get(CodeUnit::new(Opcode::LoadConst, OpArgByte(3)));
        assert_eq!(arg, OpArg(3));
    }

    #[test]
    fn code_units_roundtrip() {
        let raw = [Opcode::LoadConst as u8, 0, Opcode::ReturnValue as u8, 0];
        let units = CodeUnits::from_bytes(&raw).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units.to_bytes(), raw);
    }

    #[test]
    fn code_units_reject_bad_input() {
        assert_eq!(
            CodeUnits::from_bytes(&[1]).unwrap_err(),
            InvalidBytecode::OddLength(1)
        );
        assert!(matches!(
            CodeUnits::from_bytes(&[0, 0]).unwrap_err(),
            InvalidBytecode::UnknownOpcode { offset: 0, byte: 0 }
        ));
    }
}
