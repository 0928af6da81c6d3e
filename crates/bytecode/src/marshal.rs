//! Construction of a [`CodeObject`] from the argument bundle of a marshaled
//! `code` object.
//!
//! The bundle mirrors the CPython marshal stream field-for-field. All
//! structural validation happens here; the runtime maps [`MarshalError`] to
//! `ValueError("code: ...")`.

use crate::code::{
    CodeFlags, CodeObject, CodeUnits, ConstantData, InvalidBytecode, VarKind, Variable, KIND_CELL,
    KIND_FREE, KIND_LOCAL,
};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum MarshalError {
    #[error("code: {0}")]
    Bytecode(#[from] InvalidBytecode),
    #[error("code: co_flags has unknown bits {0:#x}")]
    UnknownFlags(u32),
    #[error("code: localspluskinds length {kinds} does not match localsplusnames length {names}")]
    KindsMismatch { names: usize, kinds: usize },
    #[error("code: unknown kind byte {0:#04x}")]
    UnknownKind(u8),
    #[error("code: posonlyargcount {posonly} exceeds argcount {args}")]
    PosonlyOutOfRange { posonly: u32, args: u32 },
    #[error("code: argcount {args} exceeds number of plain locals {nlocals}")]
    ArgcountOutOfRange { args: u32, nlocals: usize },
    #[error("code: constant index width exceeded")]
    TooManyConstants,
}

/// The deserialized argument bundle, named after the marshal stream fields.
#[derive(Debug, Default)]
pub struct CodeArgs {
    pub filename: String,
    pub name: String,
    pub qualname: String,
    pub flags: u32,
    pub bytecode: Vec<u8>,
    pub firstlineno: u32,
    pub linetable: Vec<u8>,
    pub consts: Vec<ConstantData>,
    pub names: Vec<String>,
    pub localsplusnames: Vec<String>,
    pub localspluskinds: Vec<u8>,
    pub argcount: u32,
    pub posonlyargcount: u32,
    pub kwonlyargcount: u32,
    pub stacksize: u32,
    pub exceptiontable: Vec<u8>,
}

impl CodeArgs {
    /// Validate the bundle and build the code object, computing the variable
    /// layout from the names/kinds pair.
    pub fn into_code(self) -> Result<CodeObject, MarshalError> {
        let flags =
            CodeFlags::from_bits(self.flags).ok_or_else(|| {
                MarshalError::UnknownFlags(self.flags & !CodeFlags::all().bits())
            })?;

        if self.posonlyargcount > self.argcount {
            return Err(MarshalError::PosonlyOutOfRange {
                posonly: self.posonlyargcount,
                args: self.argcount,
            });
        }

        if self.localsplusnames.len() != self.localspluskinds.len() {
            return Err(MarshalError::KindsMismatch {
                names: self.localsplusnames.len(),
                kinds: self.localspluskinds.len(),
            });
        }

        let instructions = CodeUnits::from_bytes(&self.bytecode)?;
        let layout = compute_layout(&self.localsplusnames, &self.localspluskinds)?;

        let total_args = (self.argcount + self.kwonlyargcount) as usize;
        let nlocals = layout
            .iter()
            .filter(|v| matches!(v.kind, VarKind::Local | VarKind::CellArg { .. }))
            .count();
        if total_args > nlocals {
            return Err(MarshalError::ArgcountOutOfRange {
                args: total_args as u32,
                nlocals,
            });
        }

        // pre-3.11 streams have no qualname; fall back to the plain name
        let qualname = if self.qualname.is_empty() {
            self.name.clone()
        } else {
            self.qualname
        };

        Ok(CodeObject {
            instructions,
            flags,
            posonlyarg_count: self.posonlyargcount,
            arg_count: self.argcount,
            kwonlyarg_count: self.kwonlyargcount,
            source_path: self.filename,
            obj_name: self.name,
            qualname,
            first_line_number: self.firstlineno,
            max_stackdepth: self.stacksize,
            constants: self.consts.into_boxed_slice(),
            names: self.names.into_boxed_slice(),
            layout,
            linetable: self.linetable.into_boxed_slice(),
            exceptiontable: self.exceptiontable.into_boxed_slice(),
        })
    }
}

/// Decompose `localsplusnames`/`localspluskinds` into variable descriptors.
///
/// Plain locals come first in the fast-local numbering; a name carrying both
/// the LOCAL and CELL bits is a cell argument whose `arg_index` is its
/// position among the plain locals.
fn compute_layout(names: &[String], kinds: &[u8]) -> Result<Box<[Variable]>, MarshalError> {
    let mut layout = Vec::with_capacity(names.len());
    let mut local_index: u32 = 0;
    for (name, &kind) in names.iter().zip(kinds) {
        let var_kind = match kind {
            k if k == KIND_LOCAL => {
                local_index += 1;
                VarKind::Local
            }
            k if k == KIND_LOCAL | KIND_CELL => {
                let arg_index = local_index;
                local_index += 1;
                VarKind::CellArg { arg_index }
            }
            k if k == KIND_CELL => VarKind::Cell,
            k if k == KIND_FREE => VarKind::Free,
            other => return Err(MarshalError::UnknownKind(other)),
        };
        layout.push(Variable {
            name: name.clone(),
            kind: var_kind,
        });
    }
    Ok(layout.into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn args_with(names: &[&str], kinds: &[u8]) -> CodeArgs {
        CodeArgs {
            filename: "<test>".to_owned(),
            name: "f".to_owned(),
            flags: (CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS).bits(),
            bytecode: vec![Opcode::LoadConst as u8, 0, Opcode::ReturnValue as u8, 0],
            consts: vec![ConstantData::None],
            localsplusnames: names.iter().map(|s| s.to_string()).collect(),
            localspluskinds: kinds.to_vec(),
            stacksize: 1,
            ..Default::default()
        }
    }

    #[test]
    fn layout_splits_kinds() {
        let mut args = args_with(
            &["a", "b", "box", "outer"],
            &[KIND_LOCAL, KIND_LOCAL | KIND_CELL, KIND_CELL, KIND_FREE],
        );
        args.argcount = 2;
        let code = args.into_code().unwrap();
        assert_eq!(code.varnames().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(code.cellvars().collect::<Vec<_>>(), ["b", "box"]);
        assert_eq!(code.freevars().collect::<Vec<_>>(), ["outer"]);
        assert_eq!(code.cell2arg(), Some(vec![1, -1]));
        // nlocals + ncellvars + nfreevars - overlap == layout length
        assert_eq!(
            code.nlocals() + code.ncellvars() + code.nfreevars() - 1,
            code.layout.len()
        );
    }

    #[test]
    fn kinds_roundtrip_byte_equal() {
        let names = ["x", "y", "c", "f"];
        let kinds = [KIND_LOCAL, KIND_LOCAL | KIND_CELL, KIND_CELL, KIND_FREE];
        let mut args = args_with(&names, &kinds);
        args.argcount = 2;
        let code = args.into_code().unwrap();
        assert_eq!(code.localsplusnames(), names);
        assert_eq!(code.localspluskinds(), kinds);
    }

    #[test]
    fn unknown_flag_bits_are_rejected() {
        let mut args = args_with(&[], &[]);
        args.flags |= 0x4000;
        assert_eq!(args.into_code().unwrap_err(), MarshalError::UnknownFlags(0x4000));
    }

    #[test]
    fn kinds_length_mismatch_is_rejected() {
        let mut args = args_with(&["a"], &[KIND_LOCAL]);
        args.localspluskinds.push(KIND_LOCAL);
        assert!(matches!(
            args.into_code().unwrap_err(),
            MarshalError::KindsMismatch { names: 1, kinds: 2 }
        ));
    }

    #[test]
    fn argcount_beyond_locals_is_rejected() {
        let mut args = args_with(&["a"], &[KIND_LOCAL]);
        args.argcount = 2;
        assert!(matches!(
            args.into_code().unwrap_err(),
            MarshalError::ArgcountOutOfRange { args: 2, nlocals: 1 }
        ));
    }
}
