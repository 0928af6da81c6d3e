//! `function`, `cell` and bound methods.

use crate::builtins::code::PyCodeRef;
use crate::builtins::dict::PyDictRef;
use crate::builtins::str::PyStr;
use crate::builtins::tuple::PyTupleRef;
use crate::builtins::type_::PyTypeRef;
use crate::frame::Frame;
use crate::function::FuncArgs;
use crate::object::{AsObject, PyObjectRef, PyPayload, PyRef, PyResult};
use crate::scope::Scope;
use crate::vm::{Context, VirtualMachine};
use itertools::Itertools;
use krait_bytecode::CodeFlags;
use krait_common::lock::{PyMutex, PyRwLock};

pub type PyCellRef = PyRef<PyCell>;

/// A mutable box shared between the frame that created it and every closure
/// that captured it. Contents are never copied at capture time.
#[derive(Debug, Default)]
pub struct PyCell {
    contents: PyRwLock<Option<PyObjectRef>>,
}

impl PyPayload for PyCell {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.cell_type
    }
}

impl PyCell {
    pub fn with_value(value: PyObjectRef) -> Self {
        Self {
            contents: PyRwLock::new(Some(value)),
        }
    }

    pub fn get(&self) -> Option<PyObjectRef> {
        self.contents.read().clone()
    }

    pub fn set(&self, value: Option<PyObjectRef>) {
        *self.contents.write() = value;
    }
}

#[derive(Debug)]
pub struct PyFunction {
    code: PyCodeRef,
    globals: PyDictRef,
    builtins: PyDictRef,
    closure: Option<PyTupleRef>,
    defaults_and_kwdefaults: PyMutex<(Option<PyTupleRef>, Option<PyDictRef>)>,
    name: PyMutex<String>,
    qualname: PyMutex<String>,
    annotations: PyMutex<Option<PyDictRef>>,
}

impl PyPayload for PyFunction {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.function_type
    }
}

impl PyFunction {
    pub fn new(
        code: PyCodeRef,
        globals: PyDictRef,
        closure: Option<PyTupleRef>,
        defaults: Option<PyTupleRef>,
        kwdefaults: Option<PyDictRef>,
        annotations: Option<PyDictRef>,
        qualname: String,
        vm: &VirtualMachine,
    ) -> PyResult<Self> {
        let closure_len = closure.as_ref().map_or(0, |cells| cells.len());
        if closure_len != code.nfreevars() {
            // expected count first, the supplied closure's length second
            return Err(vm.new_type_error(format!(
                "{}() requires a code object with {} free vars, not {}",
                code.code.obj_name,
                code.nfreevars(),
                closure_len,
            )));
        }

        // the builtins mapping is derived from globals
        let builtins = match globals.get_item_str("__builtins__") {
            Some(obj) => obj
                .downcast::<crate::builtins::dict::PyDict>()
                .unwrap_or_else(|_| vm.builtins.clone()),
            None => vm.builtins.clone(),
        };

        let name = code.code.obj_name.clone();
        Ok(Self {
            code,
            globals,
            builtins,
            closure,
            defaults_and_kwdefaults: PyMutex::new((defaults, kwdefaults)),
            name: PyMutex::new(name),
            qualname: PyMutex::new(qualname),
            annotations: PyMutex::new(annotations),
        })
    }

    pub fn code(&self) -> &PyCodeRef {
        &self.code
    }

    pub fn globals(&self) -> &PyDictRef {
        &self.globals
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn qualname(&self) -> String {
        self.qualname.lock().clone()
    }

    pub fn defaults(&self) -> Option<PyTupleRef> {
        self.defaults_and_kwdefaults.lock().0.clone()
    }

    pub fn kwdefaults(&self) -> Option<PyDictRef> {
        self.defaults_and_kwdefaults.lock().1.clone()
    }

    pub fn annotations(&self) -> Option<PyDictRef> {
        self.annotations.lock().clone()
    }

    pub fn closure(&self) -> Option<&PyTupleRef> {
        self.closure.as_ref()
    }

    /// The argument parser: distribute call arguments over the fast-local
    /// slots of a fresh frame, consuming defaults and packing varargs.
    fn fill_locals_from_args(
        &self,
        frame: &Frame,
        func_args: FuncArgs,
        vm: &VirtualMachine,
    ) -> PyResult<()> {
        let code = &self.code;
        let nargs = func_args.args.len();
        let n_expected_args = code.code.arg_count as usize;
        let total_args = n_expected_args + code.code.kwonlyarg_count as usize;

        let mut fastlocals = frame.fastlocals.lock();

        let mut args_iter = func_args.args.into_iter();
        for (local, arg) in Iterator::zip(
            fastlocals.iter_mut().take(n_expected_args),
            args_iter.by_ref().take(nargs),
        ) {
            *local = Some(arg);
        }

        let mut vararg_offset = total_args;
        if code.code.flags.contains(CodeFlags::VARARGS) {
            let vararg_value = vm.ctx.new_tuple(args_iter.collect());
            fastlocals[vararg_offset] = Some(vararg_value.into_object());
            vararg_offset += 1;
        } else if nargs > n_expected_args {
            let n_defaults = self.defaults().map_or(0, |d| d.len()).min(n_expected_args);
            let n_required = n_expected_args - n_defaults;
            let takes_msg = if n_defaults > 0 {
                format!("from {n_required} to {n_expected_args}")
            } else {
                n_expected_args.to_string()
            };
            return Err(vm.new_type_error(format!(
                "{}() takes {} positional argument{} but {} {} given",
                self.qualname(),
                takes_msg,
                if n_expected_args == 1 { "" } else { "s" },
                nargs,
                if nargs == 1 { "was" } else { "were" },
            )));
        }

        let kwargs_dict = if code.code.flags.contains(CodeFlags::VARKEYWORDS) {
            let d = vm.ctx.new_dict();
            fastlocals[vararg_offset] = Some(d.clone().into_object());
            Some(d)
        } else {
            None
        };

        let posonly = code.code.posonlyarg_count as usize;
        let arg_pos = |range: std::ops::Range<usize>, name: &str| {
            code.varnames
                .iter()
                .enumerate()
                .skip(range.start)
                .take(range.end.saturating_sub(range.start))
                .find(|(_, n)| n.as_str() == name)
                .map(|(pos, _)| pos)
        };

        let mut posonly_passed_as_kwarg = Vec::new();
        for (name, value) in func_args.kwargs {
            if let Some(pos) = arg_pos(posonly..total_args, &name) {
                let slot = &mut fastlocals[pos];
                if slot.is_some() {
                    return Err(vm.new_type_error(format!(
                        "{}() got multiple values for argument '{}'",
                        self.qualname(),
                        name
                    )));
                }
                *slot = Some(value);
            } else if let Some(kwargs_dict) = kwargs_dict.as_ref() {
                kwargs_dict.set_item_str(&name, value);
            } else if arg_pos(0..posonly, &name).is_some() {
                posonly_passed_as_kwarg.push(name);
            } else {
                return Err(vm.new_type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    self.qualname(),
                    name
                )));
            }
        }
        if !posonly_passed_as_kwarg.is_empty() {
            return Err(vm.new_type_error(format!(
                "{}() got some positional-only arguments passed as keyword arguments: '{}'",
                self.qualname(),
                posonly_passed_as_kwarg.into_iter().format(", "),
            )));
        }

        if nargs < n_expected_args {
            let defaults = self.defaults();
            let defaults = defaults.as_ref().map(|d| d.as_slice());
            let n_defs = defaults.map_or(0, |d| d.len()).min(n_expected_args);
            let n_required = n_expected_args - n_defs;

            let missing: Vec<_> = (nargs..n_required)
                .filter(|&i| fastlocals[i].is_none())
                .map(|i| code.varnames[i].clone())
                .collect();
            if !missing.is_empty() {
                return Err(vm.new_type_error(format!(
                    "{}() missing {} required positional argument{}: '{}'",
                    self.qualname(),
                    missing.len(),
                    if missing.len() == 1 { "" } else { "s" },
                    missing.iter().format("', '"),
                )));
            }

            if let Some(defaults) = defaults {
                // defaults bind to the trailing positional parameters
                let usable = &defaults[defaults.len() - n_defs..];
                for (i, default) in usable.iter().enumerate() {
                    let slot = &mut fastlocals[n_required + i];
                    if slot.is_none() {
                        *slot = Some(default.clone());
                    }
                }
            }
        }

        if code.code.kwonlyarg_count > 0 {
            for (slot, kwarg) in fastlocals
                .iter_mut()
                .zip(code.varnames.iter())
                .skip(n_expected_args)
                .take(code.code.kwonlyarg_count as usize)
                .filter(|(slot, _)| slot.is_none())
            {
                if let Some(defaults) = &self.kwdefaults() {
                    if let Some(default) = defaults.get_item_str(kwarg) {
                        *slot = Some(default);
                        continue;
                    }
                }
                return Err(vm.new_type_error(format!(
                    "{}() missing required keyword-only argument: '{}'",
                    self.qualname(),
                    kwarg
                )));
            }
        }

        // move cell arguments out of their fast-local slots into fresh cells
        if let Some(cell2arg) = code.cell2arg.as_deref() {
            for (cell_index, arg_index) in cell2arg.iter().enumerate().filter(|(_, i)| **i != -1) {
                let value = fastlocals[*arg_index as usize].take();
                frame.cells_frees[cell_index].set(value);
            }
        }

        Ok(())
    }
}

impl PyRef<PyFunction> {
    pub fn invoke_with_locals(
        &self,
        func_args: FuncArgs,
        locals: Option<PyDictRef>,
        vm: &VirtualMachine,
    ) -> PyResult {
        let code = &self.code;
        let flags = code.code.flags;

        if flags.intersects(
            CodeFlags::GENERATOR | CodeFlags::COROUTINE | CodeFlags::ASYNC_GENERATOR,
        ) {
            return Err(vm.new_runtime_error(
                "generator and coroutine functions are not supported by this runtime".to_owned(),
            ));
        }

        // frame creation policy: OPTIMIZED code keeps values in fast locals
        // and carries no mapping at all
        let locals = if flags.contains(CodeFlags::NEWLOCALS) && flags.contains(CodeFlags::OPTIMIZED)
        {
            None
        } else if flags.contains(CodeFlags::NEWLOCALS) {
            Some(vm.ctx.new_dict())
        } else {
            Some(locals.unwrap_or_else(|| self.globals.clone()))
        };

        let closure_cells: Vec<PyCellRef> = self
            .closure
            .as_ref()
            .map(|closure| {
                closure
                    .iter()
                    .map(|cell| {
                        cell.clone().downcast::<PyCell>().map_err(|obj| {
                            vm.new_type_error(format!(
                                "closure entries must be cells, not '{}'",
                                obj.class().name()
                            ))
                        })
                    })
                    .collect::<PyResult<_>>()
            })
            .transpose()?
            .unwrap_or_default();

        let frame = Frame::new(
            code.clone(),
            Scope::new(locals, self.globals.clone()),
            self.builtins.clone(),
            &closure_cells,
            vm,
        )
        .into_ref(&vm.ctx);

        self.fill_locals_from_args(&frame, func_args, vm)?;

        vm.run_frame(frame)
    }

    #[inline]
    pub fn invoke(&self, func_args: FuncArgs, vm: &VirtualMachine) -> PyResult {
        self.invoke_with_locals(func_args, None, vm)
    }
}

pub(crate) fn function_call(zelf: &PyObjectRef, args: FuncArgs, vm: &VirtualMachine) -> PyResult {
    let func = zelf
        .clone()
        .downcast::<PyFunction>()
        .map_err(|_| vm.new_interpreter_error("function slot on wrong payload"))?;
    func.invoke(args, vm)
}

/// Functions are non-data descriptors: instance access binds them.
pub(crate) fn function_descr_get(
    zelf: PyObjectRef,
    obj: Option<PyObjectRef>,
    _cls: Option<PyObjectRef>,
    vm: &VirtualMachine,
) -> PyResult {
    match obj {
        Some(obj) if !vm.is_none(&obj) => Ok(PyBoundMethod::new(obj, zelf)
            .into_ref(&vm.ctx)
            .into_object()),
        _ => Ok(zelf),
    }
}

pub(crate) fn function_repr(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    let func = zelf
        .payload::<PyFunction>()
        .ok_or_else(|| vm.new_interpreter_error("function slot on wrong payload"))?;
    Ok(vm.ctx.new_str(format!(
        "<function {} at {:#x}>",
        func.qualname(),
        zelf.get_id()
    )))
}

/// A method bound to its receiver.
#[derive(Debug)]
pub struct PyBoundMethod {
    pub object: PyObjectRef,
    pub function: PyObjectRef,
}

impl PyBoundMethod {
    pub fn new(object: PyObjectRef, function: PyObjectRef) -> Self {
        Self { object, function }
    }
}

impl PyPayload for PyBoundMethod {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.bound_method_type
    }
}

pub(crate) fn bound_method_call(zelf: &PyObjectRef, mut args: FuncArgs, vm: &VirtualMachine) -> PyResult {
    let method = zelf
        .payload::<PyBoundMethod>()
        .ok_or_else(|| vm.new_interpreter_error("bound method slot on wrong payload"))?;
    args.prepend_arg(method.object.clone());
    method.function.call(args, vm)
}

pub(crate) fn bound_method_repr(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    let method = zelf
        .payload::<PyBoundMethod>()
        .ok_or_else(|| vm.new_interpreter_error("bound method slot on wrong payload"))?;
    let name = method
        .function
        .payload::<PyFunction>()
        .map(|f| f.qualname())
        .unwrap_or_else(|| "?".to_owned());
    let of = method.object.repr(vm)?;
    Ok(vm
        .ctx
        .new_str(format!("<bound method {} of {}>", name, of.as_str())))
}

pub(crate) fn cell_repr(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    let cell = zelf
        .payload::<PyCell>()
        .ok_or_else(|| vm.new_interpreter_error("cell slot on wrong payload"))?;
    let text = match cell.get() {
        Some(value) => format!(
            "<cell at {:#x}: {} object>",
            zelf.get_id(),
            value.class().name()
        ),
        None => format!("<cell at {:#x}: empty>", zelf.get_id()),
    };
    Ok(vm.ctx.new_str(text))
}

#[cfg(test)]
mod tests {
    use crate::vm::Interpreter;
    use krait_bytecode::{CodeArgs, CodeFlags, ConstantData, Opcode, KIND_FREE};

    #[test]
    fn closure_length_mismatch_reports_expected_then_given() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            // one free variable, but no closure supplied
            let code = CodeArgs {
                filename: "<test>".to_owned(),
                name: "inner".to_owned(),
                flags: (CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS | CodeFlags::NESTED).bits(),
                bytecode: vec![
                    Opcode::LoadConst as u8,
                    0,
                    Opcode::ReturnValue as u8,
                    0,
                ],
                consts: vec![ConstantData::None],
                localsplusnames: vec!["x".to_owned()],
                localspluskinds: vec![KIND_FREE],
                stacksize: 1,
                ..Default::default()
            }
            .into_code()
            .unwrap();
            let code = vm.ctx.new_code(code);
            let globals = vm.ctx.new_dict();
            let err = vm.new_function(code, globals).unwrap_err();
            assert!(err.fast_isinstance(&vm.ctx.exceptions.type_error));
            let msg = err.as_object().str(vm).unwrap();
            assert_eq!(
                msg.as_str(),
                "inner() requires a code object with 1 free vars, not 0"
            );
        });
    }
}
