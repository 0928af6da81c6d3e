//! Code objects and the instruction encoding consumed by the krait
//! evaluation loop.
//!
//! The instruction stream is the CPython wordcode format: 16-bit words whose
//! high byte is the opcode and whose low byte is the immediate argument,
//! extended by `EXTENDED_ARG` prefixes. Opcode numbering follows CPython 3.8,
//! with `IS_OP`/`CONTAINS_OP` carried at their CPython 3.9 numbers (which 3.8
//! leaves unallocated).

pub mod code;
pub mod exception_table;
pub mod marshal;
pub mod opcode;

pub use code::{
    CodeFlags, CodeObject, CodeUnit, CodeUnits, ComparisonOperator, ConstantData, InvalidBytecode,
    MakeFunctionFlags, OpArg, OpArgByte, OpArgState, RaiseKind, VarKind, Variable, KIND_CELL,
    KIND_FREE, KIND_LOCAL,
};
pub use exception_table::{find_handler, parse_exception_table, ExceptionTableEntry};
pub use marshal::{CodeArgs, MarshalError};
pub use opcode::Opcode;
