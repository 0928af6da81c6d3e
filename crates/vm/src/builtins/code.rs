//! The python `code` object: an immutable compiled function body plus the
//! runtime-converted constant and name pools.

use crate::builtins::str::PyStr;
use crate::builtins::type_::PyTypeRef;
use crate::object::{PyObjectRef, PyPayload, PyRef, PyResult};
use crate::vm::{Context, VirtualMachine};
use krait_bytecode::{CodeObject, ConstantData};
use std::fmt;
use std::ops::Deref;

pub type PyCodeRef = PyRef<PyCode>;

pub struct PyCode {
    pub code: CodeObject,
    /// `co_consts`, converted to objects once at construction.
    pub constants: Box<[PyObjectRef]>,
    /// `co_names` as rust strings for name-indexed opcodes.
    pub names: Box<[String]>,
    // derived variable views, cached off the layout
    pub varnames: Box<[String]>,
    pub cellvars: Box<[String]>,
    pub freevars: Box<[String]>,
    pub cell2arg: Option<Box<[i32]>>,
}

impl Deref for PyCode {
    type Target = CodeObject;

    fn deref(&self) -> &CodeObject {
        &self.code
    }
}

impl PyPayload for PyCode {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.code_type
    }
}

impl PyCode {
    pub fn new(code: CodeObject, ctx: &Context) -> Self {
        let constants = code
            .constants
            .iter()
            .map(|constant| constant_to_object(constant, ctx))
            .collect();
        let names = code.names.to_vec().into_boxed_slice();
        let varnames = code.varnames().map(str::to_owned).collect();
        let cellvars = code.cellvars().map(str::to_owned).collect();
        let freevars = code.freevars().map(str::to_owned).collect();
        let cell2arg = code.cell2arg().map(Vec::into_boxed_slice);
        Self {
            code,
            constants,
            names,
            varnames,
            cellvars,
            freevars,
            cell2arg,
        }
    }

    pub fn nlocals(&self) -> usize {
        self.varnames.len()
    }

    pub fn ncellvars(&self) -> usize {
        self.cellvars.len()
    }

    pub fn nfreevars(&self) -> usize {
        self.freevars.len()
    }
}

pub(crate) fn constant_to_object(constant: &ConstantData, ctx: &Context) -> PyObjectRef {
    match constant {
        ConstantData::None => ctx.none(),
        ConstantData::Ellipsis => ctx.ellipsis(),
        ConstantData::Boolean { value } => ctx.new_bool(*value).into_object(),
        ConstantData::Integer { value } => ctx.new_bigint(value.clone()).into_object(),
        ConstantData::Float { value } => ctx.new_float(*value).into_object(),
        ConstantData::Str { value } => ctx.new_str(value.clone()).into_object(),
        ConstantData::Bytes { value } => {
            // bytes objects are out of scope as a full type; constants carry
            // them as str payloads of the latin-1 decoding
            let text: String = value.iter().map(|&b| b as char).collect();
            ctx.new_str(text).into_object()
        }
        ConstantData::Tuple { elements } => {
            let elements = elements
                .iter()
                .map(|element| constant_to_object(element, ctx))
                .collect();
            ctx.new_tuple(elements).into_object()
        }
        ConstantData::Code { code } => ctx.new_code(code.as_ref().clone()).into_object(),
    }
}

impl fmt::Debug for PyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<code object {} file {:?}, line {}>",
            self.code.obj_name, self.code.source_path, self.code.first_line_number
        )
    }
}

pub(crate) fn code_repr(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    let code = zelf
        .payload::<PyCode>()
        .ok_or_else(|| vm.new_interpreter_error("code slot called on non-code"))?;
    Ok(vm.ctx.new_str(format!(
        "<code object {} at {:#x} file {:?}, line {}>",
        code.code.obj_name,
        zelf.get_id(),
        code.code.source_path,
        code.code.first_line_number
    )))
}

#[cfg(test)]
mod tests {
    use crate::vm::Interpreter;
    use krait_bytecode::{CodeArgs, ConstantData, Opcode, KIND_LOCAL};

    #[test]
    fn derived_views_match_the_layout() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let code = CodeArgs {
                filename: "<test>".to_owned(),
                name: "f".to_owned(),
                flags: 0x03, // OPTIMIZED | NEWLOCALS
                bytecode: vec![Opcode::LoadConst as u8, 0, Opcode::ReturnValue as u8, 0],
                consts: vec![ConstantData::None],
                localsplusnames: vec!["a".to_owned()],
                localspluskinds: vec![KIND_LOCAL],
                argcount: 1,
                stacksize: 1,
                ..Default::default()
            }
            .into_code()
            .unwrap();
            let code = vm.ctx.new_code(code);
            assert_eq!(code.nlocals(), 1);
            assert_eq!(code.varnames.as_ref(), ["a".to_owned()]);
            assert!(code.cell2arg.is_none());
        });
    }
}
