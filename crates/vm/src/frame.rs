//! Frames and the instruction-dispatch loop.
//!
//! Instructions are 16-bit words, high byte opcode, low byte immediate,
//! widened by `EXTENDED_ARG`. Jump targets arrive as byte offsets and are
//! halved into word units. Exceptions raised by the abstract operations are
//! routed to a handler — through the 3.11 exception table when the code
//! object carries one, through the 3.8 block stack otherwise — while
//! internal errors unwind out of the loop unchanged.

use crate::builtins::code::PyCodeRef;
use crate::builtins::dict::{PyDict, PyDictRef};
use crate::builtins::exceptions::PyBaseExceptionRef;
use crate::builtins::function::{PyCellRef, PyFunction};
use crate::builtins::str::PyStr;
use crate::builtins::tuple::PyTuple;
use crate::builtins::type_::PyType;
use crate::function::{kwarg_names_from_tuple, FuncArgs};
use crate::object::{AsObject, PyObjectRef, PyPayload, PyRef, PyResult};
use crate::protocol::{PyIter, PyIterReturn};
use crate::scope::Scope;
use crate::vm::{Context, PyMethod, VirtualMachine};
use krait_bytecode::{
    find_handler, parse_exception_table, CodeUnit, ComparisonOperator, MakeFunctionFlags, OpArg,
    OpArgState, Opcode, RaiseKind,
};
use krait_common::boxvec::BoxVec;
use krait_common::lock::PyMutex;
use std::fmt;

pub type FrameRef = PyRef<Frame>;

/// Why the block stack is being unwound.
#[derive(Clone, Debug)]
enum BlockType {
    /// `SETUP_FINALLY`: a handler address armed for exceptions below it.
    Finally { handler: u32 },
    /// The span between entering an exception handler and `POP_EXCEPT`.
    ExceptHandler,
}

#[derive(Clone, Debug)]
struct Block {
    typ: BlockType,
    /// Value-stack depth to restore when this block unwinds.
    level: usize,
}

struct FrameState {
    /// The main data stack. `None` entries are the NULL marker of the
    /// method-call fast path.
    stack: BoxVec<Option<PyObjectRef>>,
    blocks: Vec<Block>,
    /// Index of the next instruction, in words.
    lasti: u32,
}

pub struct Frame {
    pub code: PyCodeRef,
    pub fastlocals: PyMutex<Box<[Option<PyObjectRef>]>>,
    /// Cell variables first, then the free cells supplied by the closure.
    pub(crate) cells_frees: Box<[PyCellRef]>,
    pub locals: Option<PyDictRef>,
    pub globals: PyDictRef,
    pub builtins: PyDictRef,
    state: PyMutex<FrameState>,
}

impl PyPayload for Frame {
    fn class(ctx: &Context) -> &crate::builtins::type_::PyTypeRef {
        &ctx.types.frame_type
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<frame of {}>", self.code.code.obj_name)
    }
}

impl Frame {
    pub(crate) fn new(
        code: PyCodeRef,
        scope: Scope,
        builtins: PyDictRef,
        closure: &[PyCellRef],
        vm: &VirtualMachine,
    ) -> Self {
        let cells_frees: Box<[PyCellRef]> = std::iter::repeat_with(|| vm.ctx.new_cell())
            .take(code.ncellvars())
            .chain(closure.iter().cloned())
            .collect();

        let state = FrameState {
            stack: BoxVec::new(code.code.max_stackdepth as usize),
            blocks: vec![],
            lasti: 0,
        };

        Self {
            fastlocals: PyMutex::new(vec![None; code.nlocals()].into_boxed_slice()),
            cells_frees,
            locals: scope.locals,
            globals: scope.globals,
            builtins,
            code,
            state: PyMutex::new(state),
        }
    }

    pub fn lasti(&self) -> u32 {
        self.state.lock().lasti
    }
}

impl PyRef<Frame> {
    pub fn run(&self, vm: &VirtualMachine) -> PyResult {
        let mut state = self.state.lock();
        let mut exec = ExecutingFrame {
            code: &self.code,
            fastlocals: &self.fastlocals,
            cells_frees: &self.cells_frees,
            locals: &self.locals,
            globals: &self.globals,
            builtins: &self.builtins,
            state: &mut *state,
        };
        exec.run(vm)
    }
}

/// An executing frame: the immutable parts outside the mutex combined with
/// the mutable state inside it.
struct ExecutingFrame<'a> {
    code: &'a PyCodeRef,
    fastlocals: &'a PyMutex<Box<[Option<PyObjectRef>]>>,
    cells_frees: &'a [PyCellRef],
    locals: &'a Option<PyDictRef>,
    globals: &'a PyDictRef,
    builtins: &'a PyDictRef,
    state: &'a mut FrameState,
}

/// An instruction either falls through, produces the frame's result, or
/// raises.
type FrameResult = PyResult<Option<PyObjectRef>>;

impl ExecutingFrame<'_> {
    fn run(&mut self, vm: &VirtualMachine) -> PyResult {
        let code = self.code;
        let instructions = &code.code.instructions;
        let mut arg_state = OpArgState::default();
        loop {
            let idx = self.state.lasti as usize;
            let unit: CodeUnit = *instructions.get(idx).ok_or_else(|| {
                vm.new_interpreter_error(format!(
                    "instruction pointer {idx} out of range in {}",
                    code.code.obj_name
                ))
            })?;
            self.state.lasti += 1;
            let (op, arg) = arg_state.get(unit);

            trace!("executing {:?} arg={:?} at {}", op, arg, idx);

            match self.execute_instruction(op, arg, vm) {
                Ok(None) => {}
                Ok(Some(value)) => {
                    debug_assert!(
                        self.state.stack.is_empty(),
                        "value stack not empty on return"
                    );
                    break Ok(value);
                }
                Err(exception) => {
                    // internal errors are not python-visible; never offer
                    // them to handlers
                    if exception.fast_isinstance(&vm.ctx.exceptions.interpreter_error) {
                        break Err(exception);
                    }
                    match self.unwind_exception(vm, exception) {
                        Ok(()) => {}
                        Err(exception) => break Err(exception),
                    }
                }
            }
        }
    }

    /// Route a raised exception to the innermost armed handler, restoring
    /// the value stack to the handler's depth; or keep propagating.
    fn unwind_exception(
        &mut self,
        vm: &VirtualMachine,
        exception: PyBaseExceptionRef,
    ) -> Result<(), PyBaseExceptionRef> {
        let raising = self.state.lasti.saturating_sub(1);

        if !self.code.code.exceptiontable.is_empty() {
            let entries = match parse_exception_table(&self.code.code.exceptiontable) {
                Ok(entries) => entries,
                Err(err) => {
                    return Err(vm.new_interpreter_error(format!("bad exception table: {err}")))
                }
            };
            if let Some(entry) = find_handler(&entries, raising) {
                self.state.stack.truncate(entry.depth as usize);
                if entry.push_lasti {
                    self.push_value(vm.ctx.new_int(raising).into_object());
                }
                vm.push_exception(exception.clone());
                self.state
                    .blocks
                    .push(Block {
                        typ: BlockType::ExceptHandler,
                        level: entry.depth as usize,
                    });
                self.push_value(exception.into_object());
                self.state.lasti = entry.target;
                return Ok(());
            }
            return Err(exception);
        }

        while let Some(block) = self.state.blocks.pop() {
            match block.typ {
                BlockType::Finally { handler } => {
                    self.state.stack.truncate(block.level);
                    self.state.blocks.push(Block {
                        typ: BlockType::ExceptHandler,
                        level: block.level,
                    });
                    vm.push_exception(exception.clone());
                    // exception info, type on top
                    self.push_value(vm.ctx.none());
                    self.push_value(exception.clone().into_object());
                    self.push_value(exception.as_object().class().clone().into_object());
                    self.state.lasti = handler;
                    return Ok(());
                }
                BlockType::ExceptHandler => {
                    vm.pop_exception();
                    self.state.stack.truncate(block.level);
                }
            }
        }
        Err(exception)
    }

    fn execute_instruction(&mut self, op: Opcode, arg: OpArg, vm: &VirtualMachine) -> FrameResult {
        let arg = arg.0;
        match op {
            Opcode::Nop => Ok(None),
            Opcode::ExtendedArg => Ok(None),

            // stack shuffling
            Opcode::PopTop => {
                self.pop_value();
                Ok(None)
            }
            Opcode::RotTwo => {
                let top = self.pop_entry();
                let second = self.pop_entry();
                self.state.stack.push(top);
                self.state.stack.push(second);
                Ok(None)
            }
            Opcode::RotThree => {
                let top = self.pop_entry();
                let second = self.pop_entry();
                let third = self.pop_entry();
                self.state.stack.push(top);
                self.state.stack.push(third);
                self.state.stack.push(second);
                Ok(None)
            }
            Opcode::RotFour => {
                let top = self.pop_entry();
                let second = self.pop_entry();
                let third = self.pop_entry();
                let fourth = self.pop_entry();
                self.state.stack.push(top);
                self.state.stack.push(fourth);
                self.state.stack.push(third);
                self.state.stack.push(second);
                Ok(None)
            }
            Opcode::DupTop => {
                let value = self.top_value().clone();
                self.push_value(value);
                Ok(None)
            }
            Opcode::DupTopTwo => {
                let top = self.top_value().clone();
                let second = self.nth_value(1).clone();
                self.push_value(second);
                self.push_value(top);
                Ok(None)
            }

            // loads and stores
            Opcode::LoadConst => {
                let constant = self
                    .code
                    .constants
                    .get(arg as usize)
                    .cloned()
                    .ok_or_else(|| self.internal_error(op, "constant index out of range", vm))?;
                self.push_value(constant);
                Ok(None)
            }
            Opcode::LoadFast => {
                let value = self
                    .fastlocals
                    .lock()
                    .get(arg as usize)
                    .cloned()
                    .ok_or_else(|| self.internal_error(op, "fast-local index out of range", vm))?;
                match value {
                    Some(value) => {
                        self.push_value(value);
                        Ok(None)
                    }
                    None => Err(vm.new_unbound_local_error(&self.code.varnames[arg as usize])),
                }
            }
            Opcode::StoreFast => {
                let value = self.pop_value();
                let mut fastlocals = self.fastlocals.lock();
                let slot = fastlocals
                    .get_mut(arg as usize)
                    .ok_or_else(|| self.internal_error(op, "fast-local index out of range", vm))?;
                *slot = Some(value);
                Ok(None)
            }
            Opcode::DeleteFast => {
                let mut fastlocals = self.fastlocals.lock();
                let slot = fastlocals
                    .get_mut(arg as usize)
                    .ok_or_else(|| self.internal_error(op, "fast-local index out of range", vm))?;
                if slot.take().is_none() {
                    return Err(vm.new_unbound_local_error(&self.code.varnames[arg as usize]));
                }
                Ok(None)
            }
            Opcode::LoadName => {
                let name = self.name(arg, op, vm)?;
                let value = self
                    .name_mapping()
                    .get_item_str(&name)
                    .or_else(|| self.globals.get_item_str(&name))
                    .or_else(|| self.builtins.get_item_str(&name));
                match value {
                    Some(value) => {
                        self.push_value(value);
                        Ok(None)
                    }
                    None => Err(vm.new_name_error(&name)),
                }
            }
            Opcode::StoreName => {
                let name = self.name(arg, op, vm)?;
                let value = self.pop_value();
                self.name_mapping().set_item_str(&name, value);
                Ok(None)
            }
            Opcode::DeleteName => {
                let name = self.name(arg, op, vm)?;
                if !self.name_mapping().del_item_str(&name) {
                    return Err(vm.new_name_error(&name));
                }
                Ok(None)
            }
            Opcode::LoadGlobal => {
                let name = self.name(arg, op, vm)?;
                let value = self
                    .globals
                    .get_item_str(&name)
                    .or_else(|| self.builtins.get_item_str(&name));
                match value {
                    Some(value) => {
                        self.push_value(value);
                        Ok(None)
                    }
                    None => Err(vm.new_name_error(&name)),
                }
            }
            Opcode::StoreGlobal => {
                let name = self.name(arg, op, vm)?;
                let value = self.pop_value();
                self.globals.set_item_str(&name, value);
                Ok(None)
            }
            Opcode::DeleteGlobal => {
                let name = self.name(arg, op, vm)?;
                if !self.globals.del_item_str(&name) {
                    return Err(vm.new_name_error(&name));
                }
                Ok(None)
            }
            Opcode::LoadDeref => {
                let cell = self.cell(arg, op, vm)?;
                match cell.get() {
                    Some(value) => {
                        self.push_value(value);
                        Ok(None)
                    }
                    None => Err(self.unbound_cell_exception(arg as usize, vm)),
                }
            }
            Opcode::StoreDeref => {
                let value = self.pop_value();
                let cell = self.cell(arg, op, vm)?;
                cell.set(Some(value));
                Ok(None)
            }
            Opcode::DeleteDeref => {
                let cell = self.cell(arg, op, vm)?;
                if cell.get().is_none() {
                    return Err(self.unbound_cell_exception(arg as usize, vm));
                }
                cell.set(None);
                Ok(None)
            }
            Opcode::LoadClosure => {
                let cell = self.cell(arg, op, vm)?;
                self.push_value(cell.clone().into_object());
                Ok(None)
            }
            Opcode::LoadAttr => {
                let name = self.name(arg, op, vm)?;
                let obj = self.pop_value();
                let value = obj.get_attr(&name, vm)?;
                self.push_value(value);
                Ok(None)
            }
            Opcode::StoreAttr => {
                let name = self.name(arg, op, vm)?;
                let obj = self.pop_value();
                let value = self.pop_value();
                obj.set_attr(&name, value, vm)?;
                Ok(None)
            }
            Opcode::DeleteAttr => {
                let name = self.name(arg, op, vm)?;
                let obj = self.pop_value();
                obj.del_attr(&name, vm)?;
                Ok(None)
            }

            // unary operators
            Opcode::UnaryPositive => self.execute_unary(vm, VirtualMachine::_pos),
            Opcode::UnaryNegative => self.execute_unary(vm, VirtualMachine::_neg),
            Opcode::UnaryInvert => self.execute_unary(vm, VirtualMachine::_invert),
            Opcode::UnaryNot => {
                let value = self.pop_value();
                let truth = value.is_true(vm)?;
                self.push_value(vm.ctx.new_bool(!truth).into_object());
                Ok(None)
            }

            // binary operators
            Opcode::BinaryAdd => self.execute_binary(vm, VirtualMachine::_add),
            Opcode::BinarySubtract => self.execute_binary(vm, VirtualMachine::_sub),
            Opcode::BinaryMultiply => self.execute_binary(vm, VirtualMachine::_mul),
            Opcode::BinaryModulo => self.execute_binary(vm, VirtualMachine::_mod),
            Opcode::BinaryFloorDivide => self.execute_binary(vm, VirtualMachine::_floordiv),
            Opcode::BinaryTrueDivide => self.execute_binary(vm, VirtualMachine::_truediv),
            Opcode::BinaryLshift => self.execute_binary(vm, VirtualMachine::_lshift),
            Opcode::BinaryRshift => self.execute_binary(vm, VirtualMachine::_rshift),
            Opcode::BinaryAnd => self.execute_binary(vm, VirtualMachine::_and),
            Opcode::BinaryXor => self.execute_binary(vm, VirtualMachine::_xor),
            Opcode::BinaryOr => self.execute_binary(vm, VirtualMachine::_or),
            Opcode::BinaryPower => {
                let b = self.pop_value();
                let a = self.pop_value();
                let result = vm._pow(&a, &b, &vm.ctx.none())?;
                self.push_value(result);
                Ok(None)
            }
            Opcode::InplaceAdd => self.execute_binary(vm, VirtualMachine::_iadd),
            Opcode::InplaceSubtract => self.execute_binary(vm, VirtualMachine::_isub),
            Opcode::InplaceMultiply => self.execute_binary(vm, VirtualMachine::_imul),
            Opcode::InplaceModulo => self.execute_binary(vm, VirtualMachine::_imod),
            Opcode::InplaceFloorDivide => self.execute_binary(vm, VirtualMachine::_ifloordiv),
            Opcode::InplaceTrueDivide => self.execute_binary(vm, VirtualMachine::_itruediv),
            Opcode::InplaceLshift => self.execute_binary(vm, VirtualMachine::_ilshift),
            Opcode::InplaceRshift => self.execute_binary(vm, VirtualMachine::_irshift),
            Opcode::InplaceAnd => self.execute_binary(vm, VirtualMachine::_iand),
            Opcode::InplaceXor => self.execute_binary(vm, VirtualMachine::_ixor),
            Opcode::InplaceOr => self.execute_binary(vm, VirtualMachine::_ior),
            Opcode::InplacePower => {
                let b = self.pop_value();
                let a = self.pop_value();
                let result = vm._ipow(&a, &b, &vm.ctx.none())?;
                self.push_value(result);
                Ok(None)
            }

            // subscripting
            Opcode::BinarySubscr => {
                let key = self.pop_value();
                let container = self.pop_value();
                let result = container.get_item(&key, vm)?;
                self.push_value(result);
                Ok(None)
            }
            Opcode::StoreSubscr => {
                // container[key] = value, value pushed first
                let key = self.pop_value();
                let container = self.pop_value();
                let value = self.pop_value();
                container.set_item(&key, value, vm)?;
                Ok(None)
            }
            Opcode::DeleteSubscr => {
                let key = self.pop_value();
                let container = self.pop_value();
                container.del_item(&key, vm)?;
                Ok(None)
            }

            // comparison and identity
            Opcode::CompareOp => {
                let op_kind = ComparisonOperator::from_op_arg(arg)
                    .ok_or_else(|| self.internal_error(op, "unknown comparison operator", vm))?;
                let b = self.pop_value();
                let a = self.pop_value();
                let result = a.rich_compare(&b, op_kind.into(), vm)?;
                self.push_value(result);
                Ok(None)
            }
            Opcode::IsOp => {
                let b = self.pop_value();
                let a = self.pop_value();
                let mut result = a.is(&b);
                if arg == 1 {
                    result = !result;
                }
                self.push_value(vm.ctx.new_bool(result).into_object());
                Ok(None)
            }
            Opcode::ContainsOp => {
                let container = self.pop_value();
                let needle = self.pop_value();
                let mut result = vm._contains(&container, &needle)?;
                if arg == 1 {
                    result = !result;
                }
                self.push_value(vm.ctx.new_bool(result).into_object());
                Ok(None)
            }

            // control flow
            Opcode::ReturnValue => {
                let value = self.pop_value();
                self.unwind_for_return(vm);
                Ok(Some(value))
            }
            Opcode::JumpAbsolute => {
                self.jump(arg / 2);
                Ok(None)
            }
            Opcode::JumpForward => {
                self.state.lasti += arg / 2;
                Ok(None)
            }
            Opcode::PopJumpIfTrue => self.pop_jump_if(vm, arg / 2, true),
            Opcode::PopJumpIfFalse => self.pop_jump_if(vm, arg / 2, false),
            Opcode::JumpIfTrueOrPop => self.jump_if_or_pop(vm, arg / 2, true),
            Opcode::JumpIfFalseOrPop => self.jump_if_or_pop(vm, arg / 2, false),

            // iteration
            Opcode::GetIter => {
                let iterable = self.pop_value();
                let iterator = iterable.get_iter(vm)?;
                self.push_value(iterator);
                Ok(None)
            }
            Opcode::ForIter => self.execute_for_iter(vm, arg / 2),

            // builders
            Opcode::BuildTuple => {
                let elements = self.pop_multiple(arg as usize);
                self.push_value(vm.ctx.new_tuple(elements).into_object());
                Ok(None)
            }
            Opcode::BuildList => {
                let elements = self.pop_multiple(arg as usize);
                self.push_value(vm.ctx.new_list(elements).into_object());
                Ok(None)
            }
            Opcode::BuildMap => {
                let dict = vm.ctx.new_dict();
                for _ in 0..arg {
                    let value = self.pop_value();
                    let key = self.pop_value();
                    dict.set_item(&key, value, vm)?;
                }
                self.push_value(dict.into_object());
                Ok(None)
            }
            Opcode::BuildConstKeyMap => self.execute_build_const_key_map(vm, arg),
            Opcode::BuildTupleUnpack => {
                let elements = self.flatten_iterables(arg as usize, vm)?;
                self.push_value(vm.ctx.new_tuple(elements).into_object());
                Ok(None)
            }
            Opcode::BuildListUnpack => {
                let elements = self.flatten_iterables(arg as usize, vm)?;
                self.push_value(vm.ctx.new_list(elements).into_object());
                Ok(None)
            }

            // unpacking
            Opcode::UnpackSequence => self.unpack_sequence(arg, vm),
            Opcode::UnpackEx => {
                let before = arg & 0xff;
                let after = arg >> 8;
                self.execute_unpack_ex(vm, before as usize, after as usize)
            }

            // functions and calls
            Opcode::MakeFunction => self.execute_make_function(vm, arg),
            Opcode::CallFunction => {
                let args = FuncArgs::from(self.pop_multiple(arg as usize));
                self.execute_call(args, vm)
            }
            Opcode::CallFunctionKw => self.execute_call_function_kw(vm, arg),
            Opcode::CallFunctionEx => self.execute_call_function_ex(vm, arg),
            Opcode::LoadMethod => {
                let name = self.name(arg, op, vm)?;
                let obj = self.pop_value();
                match PyMethod::get(&obj, &name, vm)? {
                    PyMethod::Function { target, func } => {
                        self.push_value(func);
                        self.push_value(target);
                    }
                    PyMethod::Attribute(attr) => {
                        self.push_null();
                        self.push_value(attr);
                    }
                }
                Ok(None)
            }
            Opcode::CallMethod => {
                let args = self.pop_multiple(arg as usize);
                let target_or_attr = self.pop_value();
                let func_or_null = self.pop_entry();
                let result = match func_or_null {
                    Some(func) => {
                        let mut all_args = vec![target_or_attr];
                        all_args.extend(args);
                        func.call_with_args(all_args.into(), vm)?
                    }
                    None => target_or_attr.call_with_args(args.into(), vm)?,
                };
                self.push_value(result);
                Ok(None)
            }

            // exceptions
            Opcode::RaiseVarargs => {
                let kind = RaiseKind::from_op_arg(arg)
                    .ok_or_else(|| self.internal_error(op, "bad RAISE_VARARGS argument", vm))?;
                self.execute_raise(vm, kind)
            }
            Opcode::SetupFinally => {
                let handler = self.state.lasti + arg / 2;
                let level = self.state.stack.len();
                self.state.blocks.push(Block {
                    typ: BlockType::Finally { handler },
                    level,
                });
                Ok(None)
            }
            Opcode::PopBlock => {
                self.state
                    .blocks
                    .pop()
                    .ok_or_else(|| self.internal_error(op, "block stack underflow", vm))?;
                Ok(None)
            }
            Opcode::BeginFinally => {
                self.push_null();
                Ok(None)
            }
            Opcode::EndFinally => self.execute_end_finally(vm),
            Opcode::PopExcept => {
                match self.state.blocks.pop() {
                    Some(Block {
                        typ: BlockType::ExceptHandler,
                        level,
                    }) => {
                        vm.pop_exception();
                        self.state.stack.truncate(level);
                        Ok(None)
                    }
                    _ => Err(self.internal_error(op, "POP_EXCEPT without active handler", vm)),
                }
            }

            // everything else is outside the supported subset
            _ => Err(self.internal_error(op, "opcode not supported by this runtime", vm)),
        }
    }

    // helpers

    fn internal_error(&self, op: Opcode, msg: &str, vm: &VirtualMachine) -> PyBaseExceptionRef {
        vm.new_interpreter_error(format!(
            "{msg} ({op:?} at instruction {} of {})",
            self.state.lasti.saturating_sub(1),
            self.code.code.obj_name
        ))
    }

    fn name(&self, arg: u32, op: Opcode, vm: &VirtualMachine) -> PyResult<String> {
        self.code
            .names
            .get(arg as usize)
            .cloned()
            .ok_or_else(|| self.internal_error(op, "name index out of range", vm))
    }

    fn cell(&self, arg: u32, op: Opcode, vm: &VirtualMachine) -> PyResult<&PyCellRef> {
        self.cells_frees
            .get(arg as usize)
            .ok_or_else(|| self.internal_error(op, "cell index out of range", vm))
    }

    /// The mapping LOAD_NAME-family opcodes address; globals double as
    /// locals when the frame has no mapping of its own.
    fn name_mapping(&self) -> &PyDictRef {
        self.locals.as_ref().unwrap_or(self.globals)
    }

    fn unbound_cell_exception(&self, index: usize, vm: &VirtualMachine) -> PyBaseExceptionRef {
        if let Some(name) = self.code.cellvars.get(index) {
            vm.new_unbound_local_error(name)
        } else {
            let name = &self.code.freevars[index - self.code.cellvars.len()];
            vm.new_exception_msg(
                vm.ctx.exceptions.name_error.clone(),
                format!("free variable '{name}' referenced before assignment in enclosing scope"),
            )
        }
    }

    fn execute_unary(
        &mut self,
        vm: &VirtualMachine,
        op: fn(&VirtualMachine, &PyObjectRef) -> PyResult,
    ) -> FrameResult {
        let a = self.pop_value();
        let value = op(vm, &a)?;
        self.push_value(value);
        Ok(None)
    }

    fn execute_binary(
        &mut self,
        vm: &VirtualMachine,
        op: fn(&VirtualMachine, &PyObjectRef, &PyObjectRef) -> PyResult,
    ) -> FrameResult {
        let b = self.pop_value();
        let a = self.pop_value();
        let value = op(vm, &a, &b)?;
        self.push_value(value);
        Ok(None)
    }

    #[inline]
    fn jump(&mut self, target: u32) {
        self.state.lasti = target;
    }

    fn pop_jump_if(&mut self, vm: &VirtualMachine, target: u32, flag: bool) -> FrameResult {
        let obj = self.pop_value();
        if obj.is_true(vm)? == flag {
            self.jump(target);
        }
        Ok(None)
    }

    fn jump_if_or_pop(&mut self, vm: &VirtualMachine, target: u32, flag: bool) -> FrameResult {
        let obj = self.top_value().clone();
        if obj.is_true(vm)? == flag {
            self.jump(target);
        } else {
            self.pop_value();
        }
        Ok(None)
    }

    fn execute_for_iter(&mut self, vm: &VirtualMachine, delta: u32) -> FrameResult {
        let iterator = PyIter::new(self.top_value().clone());
        match iterator.next(vm) {
            Ok(PyIterReturn::Return(value)) => {
                self.push_value(value);
                Ok(None)
            }
            Ok(PyIterReturn::StopIteration(_)) => {
                self.pop_value();
                self.state.lasti += delta;
                Ok(None)
            }
            Err(err) => {
                self.pop_value();
                Err(err)
            }
        }
    }

    fn unpack_sequence(&mut self, size: u32, vm: &VirtualMachine) -> FrameResult {
        let value = self.pop_value();
        let elements = value.extract_elements(vm).map_err(|err| {
            if err.fast_isinstance(&vm.ctx.exceptions.type_error) {
                vm.new_type_error(format!(
                    "cannot unpack non-iterable {} object",
                    value.class().name()
                ))
            } else {
                err
            }
        })?;
        match elements.len().cmp(&(size as usize)) {
            std::cmp::Ordering::Equal => {
                // reverse production order, so stores assign left-to-right
                for element in elements.into_iter().rev() {
                    self.push_value(element);
                }
                Ok(None)
            }
            std::cmp::Ordering::Greater => Err(vm.new_value_error(format!(
                "too many values to unpack (expected {size})"
            ))),
            std::cmp::Ordering::Less => Err(vm.new_value_error(format!(
                "not enough values to unpack (expected {}, got {})",
                size,
                elements.len()
            ))),
        }
    }

    fn execute_unpack_ex(&mut self, vm: &VirtualMachine, before: usize, after: usize) -> FrameResult {
        let value = self.pop_value();
        let mut elements = value.extract_elements(vm)?;
        let min_expected = before + after;
        if elements.len() < min_expected {
            return Err(vm.new_value_error(format!(
                "not enough values to unpack (expected at least {}, got {})",
                min_expected,
                elements.len()
            )));
        }
        let middle = elements.len() - min_expected;

        // the tail, reversed
        for element in elements.drain(before + middle..).rev() {
            self.push_value(element);
        }
        // the starred middle becomes a list
        let middle_elements = elements.drain(before..).collect();
        self.push_value(vm.ctx.new_list(middle_elements).into_object());
        // the head, reversed
        for element in elements.into_iter().rev() {
            self.push_value(element);
        }
        Ok(None)
    }

    fn execute_build_const_key_map(&mut self, vm: &VirtualMachine, size: u32) -> FrameResult {
        let keys = self.pop_value();
        let keys = keys
            .payload::<PyTuple>()
            .ok_or_else(|| {
                self.internal_error(Opcode::BuildConstKeyMap, "keys are not a tuple", vm)
            })?
            .as_slice()
            .to_vec();
        if keys.len() != size as usize {
            // a mismatch is a compiler bug, not a user error
            return Err(self.internal_error(
                Opcode::BuildConstKeyMap,
                "key tuple length does not match value count",
                vm,
            ));
        }
        let values = self.pop_multiple(size as usize);
        let dict = vm.ctx.new_dict();
        for (key, value) in keys.into_iter().zip(values) {
            dict.set_item(&key, value, vm)?;
        }
        self.push_value(dict.into_object());
        Ok(None)
    }

    fn flatten_iterables(&mut self, count: usize, vm: &VirtualMachine) -> PyResult<Vec<PyObjectRef>> {
        let iterables = self.pop_multiple(count);
        let mut elements = Vec::new();
        for iterable in iterables {
            elements.extend(iterable.extract_elements(vm)?);
        }
        Ok(elements)
    }

    fn execute_make_function(&mut self, vm: &VirtualMachine, arg: u32) -> FrameResult {
        let flags = MakeFunctionFlags::from_bits(arg as u8)
            .ok_or_else(|| self.internal_error(Opcode::MakeFunction, "bad MAKE_FUNCTION flags", vm))?;

        // qualname is taken from the stack, the pre-3.11 arrangement
        let qualname = self.pop_value();
        let qualname = qualname
            .payload::<PyStr>()
            .ok_or_else(|| self.internal_error(Opcode::MakeFunction, "qualname is not a string", vm))?
            .as_str()
            .to_owned();
        let code = self
            .pop_value()
            .downcast::<crate::builtins::code::PyCode>()
            .map_err(|_| self.internal_error(Opcode::MakeFunction, "expected a code object", vm))?;

        let closure = if flags.contains(MakeFunctionFlags::CLOSURE) {
            Some(
                self.pop_value()
                    .downcast::<PyTuple>()
                    .map_err(|_| {
                        self.internal_error(Opcode::MakeFunction, "closure is not a tuple", vm)
                    })?,
            )
        } else {
            None
        };
        let annotations = if flags.contains(MakeFunctionFlags::ANNOTATIONS) {
            Some(self.pop_value().downcast::<PyDict>().map_err(|_| {
                self.internal_error(Opcode::MakeFunction, "annotations are not a dict", vm)
            })?)
        } else {
            None
        };
        let kwdefaults = if flags.contains(MakeFunctionFlags::KW_ONLY_DEFAULTS) {
            Some(self.pop_value().downcast::<PyDict>().map_err(|_| {
                self.internal_error(Opcode::MakeFunction, "kwdefaults are not a dict", vm)
            })?)
        } else {
            None
        };
        let defaults = if flags.contains(MakeFunctionFlags::DEFAULTS) {
            Some(self.pop_value().downcast::<PyTuple>().map_err(|_| {
                self.internal_error(Opcode::MakeFunction, "defaults are not a tuple", vm)
            })?)
        } else {
            None
        };

        let func = PyFunction::new(
            code,
            self.globals.clone(),
            closure,
            defaults,
            kwdefaults,
            annotations,
            qualname,
            vm,
        )?;
        self.push_value(
            PyRef::new_ref(func, vm.ctx.types.function_type.clone(), None).into_object(),
        );
        Ok(None)
    }

    fn execute_call(&mut self, args: FuncArgs, vm: &VirtualMachine) -> FrameResult {
        let callable = self.pop_value();
        let result = callable.call_with_args(args, vm)?;
        self.push_value(result);
        Ok(None)
    }

    fn execute_call_function_kw(&mut self, vm: &VirtualMachine, total: u32) -> FrameResult {
        let names = self.pop_value();
        let names = kwarg_names_from_tuple(&names, vm)?;
        let mut values = self.pop_multiple(total as usize);
        if names.len() > values.len() {
            return Err(self.internal_error(
                Opcode::CallFunctionKw,
                "more keyword names than arguments",
                vm,
            ));
        }
        let kwarg_values = values.split_off(values.len() - names.len());
        let args = FuncArgs::new(values, names, kwarg_values);
        self.execute_call(args, vm)
    }

    fn execute_call_function_ex(&mut self, vm: &VirtualMachine, flags: u32) -> FrameResult {
        let kwargs = if flags & 0x01 != 0 {
            let kwargs = self.pop_value();
            let dict = kwargs.payload::<PyDict>().ok_or_else(|| {
                vm.new_type_error(format!(
                    "argument after ** must be a mapping, not {}",
                    kwargs.class().name()
                ))
            })?;
            let mut pairs = Vec::new();
            for (key, value) in dict.entries(vm) {
                let key = key.payload::<PyStr>().ok_or_else(|| {
                    vm.new_type_error("keywords must be strings".to_owned())
                })?;
                pairs.push((key.as_str().to_owned(), value));
            }
            pairs
        } else {
            vec![]
        };
        let args = self.pop_value();
        let args = args.extract_elements(vm).map_err(|err| {
            if err.fast_isinstance(&vm.ctx.exceptions.type_error) {
                vm.new_type_error(format!(
                    "argument after * must be an iterable, not {}",
                    args.class().name()
                ))
            } else {
                err
            }
        })?;
        let mut func_args = FuncArgs::from(args);
        for (name, value) in kwargs {
            func_args.kwargs.insert(name, value);
        }
        self.execute_call(func_args, vm)
    }

    fn execute_raise(&mut self, vm: &VirtualMachine, kind: RaiseKind) -> FrameResult {
        let cause = match kind {
            RaiseKind::RaiseCause => {
                let cause = self.pop_value();
                if vm.is_none(&cause) {
                    None
                } else {
                    Some(self.exception_from_object(cause, vm)?)
                }
            }
            _ => None,
        };
        let exception = match kind {
            RaiseKind::Raise | RaiseKind::RaiseCause => {
                let value = self.pop_value();
                self.exception_from_object(value, vm)?
            }
            RaiseKind::Reraise => vm.topmost_exception().ok_or_else(|| {
                vm.new_runtime_error("No active exception to re-raise".to_owned())
            })?,
        };
        if let Some(cause) = cause {
            exception
                .as_object()
                .set_attr("__cause__", cause.into_object(), vm)?;
        }
        Err(exception)
    }

    /// A raised value may be an exception instance or an exception class.
    fn exception_from_object(
        &self,
        value: PyObjectRef,
        vm: &VirtualMachine,
    ) -> PyResult<PyBaseExceptionRef> {
        if value.fast_isinstance(&vm.ctx.exceptions.base_exception_type) {
            value
                .downcast::<crate::builtins::exceptions::PyBaseException>()
                .map_err(|_| vm.new_interpreter_error("exception with foreign payload"))
        } else if value.payload::<PyType>().is_some() {
            let cls: crate::builtins::type_::PyTypeRef =
                value.downcast().unwrap_or_else(|_| unreachable!());
            if !cls.fast_issubclass(&vm.ctx.exceptions.base_exception_type) {
                return Err(vm.new_type_error("exceptions must derive from BaseException".to_owned()));
            }
            let exc = vm.call_type(&cls, vec![])?;
            exc.downcast::<crate::builtins::exceptions::PyBaseException>()
                .map_err(|_| vm.new_interpreter_error("exception with foreign payload"))
        } else {
            Err(vm.new_type_error("exceptions must derive from BaseException".to_owned()))
        }
    }

    fn execute_end_finally(&mut self, vm: &VirtualMachine) -> FrameResult {
        match self.pop_entry() {
            // no exception pending
            None => Ok(None),
            Some(top) if vm.is_none(&top) => Ok(None),
            Some(top) => {
                if top.payload::<PyType>().is_some() {
                    // exception info triple: type on top, then value, tb
                    let value = self.pop_value();
                    let _traceback = self.pop_value();
                    let exception = self.exception_from_object(value, vm)?;
                    Err(exception)
                } else {
                    let exception = self.exception_from_object(top, vm)?;
                    Err(exception)
                }
            }
        }
    }

    /// Leaving the frame via `return`: drop pending blocks, restoring the
    /// handled-exception stack as handlers die.
    fn unwind_for_return(&mut self, vm: &VirtualMachine) {
        while let Some(block) = self.state.blocks.pop() {
            if matches!(block.typ, BlockType::ExceptHandler) {
                vm.pop_exception();
            }
        }
        self.state.stack.clear();
    }

    // stack primitives

    fn push_value(&mut self, obj: PyObjectRef) {
        self.state.stack.push(Some(obj));
    }

    fn push_null(&mut self) {
        self.state.stack.push(None);
    }

    fn pop_entry(&mut self) -> Option<PyObjectRef> {
        self.state
            .stack
            .pop()
            .unwrap_or_else(|| panic!("tried to pop from an empty stack"))
    }

    fn pop_value(&mut self) -> PyObjectRef {
        self.pop_entry()
            .unwrap_or_else(|| panic!("tried to pop a NULL stack entry"))
    }

    fn pop_multiple(&mut self, count: usize) -> Vec<PyObjectRef> {
        let mut values: Vec<PyObjectRef> = (0..count).map(|_| self.pop_value()).collect();
        values.reverse();
        values
    }

    fn top_value(&self) -> &PyObjectRef {
        self.nth_value(0)
    }

    fn nth_value(&self, depth: usize) -> &PyObjectRef {
        let stack = &self.state.stack;
        stack[stack.len() - depth - 1]
            .as_ref()
            .unwrap_or_else(|| panic!("tried to read a NULL stack entry"))
    }
}

#[cfg(test)]
mod tests {
    use crate::builtins::int::PyInt;
    use crate::function::FuncArgs;
    use crate::object::{AsObject, PyObjectRef};
    use crate::vm::{Interpreter, VirtualMachine};
    use krait_bytecode::{
        CodeArgs, CodeFlags, ConstantData, Opcode, KIND_CELL, KIND_FREE, KIND_LOCAL,
    };
    use malachite_bigint::BigInt;

    fn emit(words: &[(Opcode, u8)]) -> Vec<u8> {
        words.iter().flat_map(|&(op, arg)| [op as u8, arg]).collect()
    }

    fn int_of(obj: &PyObjectRef) -> BigInt {
        obj.payload::<PyInt>().unwrap().as_bigint().clone()
    }

    struct CodeSpec {
        consts: Vec<ConstantData>,
        names: Vec<&'static str>,
        locals: Vec<(&'static str, u8)>,
        argcount: u32,
        flags: u32,
        stacksize: u32,
        bytecode: Vec<u8>,
    }

    impl CodeSpec {
        fn function_shaped(bytecode: Vec<u8>) -> Self {
            Self {
                consts: vec![],
                names: vec![],
                locals: vec![],
                argcount: 0,
                flags: (CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS).bits(),
                stacksize: 8,
                bytecode,
            }
        }

        fn build(self, vm: &VirtualMachine) -> crate::builtins::code::PyCodeRef {
            let code = CodeArgs {
                filename: "<test>".to_owned(),
                name: "f".to_owned(),
                flags: self.flags,
                bytecode: self.bytecode,
                consts: self.consts,
                names: self.names.into_iter().map(str::to_owned).collect(),
                localsplusnames: self.locals.iter().map(|(n, _)| n.to_string()).collect(),
                localspluskinds: self.locals.iter().map(|&(_, k)| k).collect(),
                argcount: self.argcount,
                stacksize: self.stacksize,
                ..Default::default()
            }
            .into_code()
            .expect("test bytecode must assemble");
            vm.ctx.new_code(code)
        }
    }

    fn run_function(vm: &VirtualMachine, spec: CodeSpec, args: Vec<PyObjectRef>) -> crate::object::PyResult {
        let code = spec.build(vm);
        let globals = vm.ctx.new_dict();
        let func = vm.new_function(code, globals).unwrap();
        func.invoke(FuncArgs::from(args), vm)
    }

    #[test]
    fn return_a_constant() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let spec = CodeSpec {
                consts: vec![ConstantData::Integer { value: BigInt::from(42) }],
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadConst, 0),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let result = run_function(vm, spec, vec![]).unwrap();
            assert_eq!(int_of(&result), BigInt::from(42));
        });
    }

    #[test]
    fn addition_goes_through_the_slots() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let spec = CodeSpec {
                consts: vec![
                    ConstantData::Integer { value: BigInt::from(2) },
                    ConstantData::Integer { value: BigInt::from(3) },
                ],
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadConst, 0),
                    (Opcode::LoadConst, 1),
                    (Opcode::BinaryAdd, 0),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let result = run_function(vm, spec, vec![]).unwrap();
            assert_eq!(int_of(&result), BigInt::from(5));
        });
    }

    #[test]
    fn extended_arg_widens_the_immediate() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let mut consts: Vec<ConstantData> = (0..300)
                .map(|i| ConstantData::Integer { value: BigInt::from(i) })
                .collect();
            consts.push(ConstantData::Integer { value: BigInt::from(777) });
            // index 300 = 0x12c: EXTENDED_ARG 1, then low byte 0x2c
            let spec = CodeSpec {
                consts,
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::ExtendedArg, 1),
                    (Opcode::LoadConst, 0x2c),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let result = run_function(vm, spec, vec![]).unwrap();
            assert_eq!(int_of(&result), BigInt::from(300));
        });
    }

    #[test]
    fn unpack_mismatch_messages() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let triple = ConstantData::Tuple {
                elements: vec![
                    ConstantData::Integer { value: BigInt::from(1) },
                    ConstantData::Integer { value: BigInt::from(2) },
                    ConstantData::Integer { value: BigInt::from(3) },
                ],
            };
            let spec = CodeSpec {
                consts: vec![triple.clone()],
                locals: vec![("a", KIND_LOCAL), ("b", KIND_LOCAL)],
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadConst, 0),
                    (Opcode::UnpackSequence, 2),
                    (Opcode::StoreFast, 0),
                    (Opcode::StoreFast, 1),
                    (Opcode::LoadFast, 0),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let err = run_function(vm, spec, vec![]).unwrap_err();
            assert!(err.fast_isinstance(&vm.ctx.exceptions.value_error));
            let msg = err.as_object().str(vm).unwrap();
            assert_eq!(msg.as_str(), "too many values to unpack (expected 2)");

            let spec = CodeSpec {
                consts: vec![triple],
                locals: (0..4).map(|i| (["a", "b", "c", "d"][i], KIND_LOCAL)).collect(),
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadConst, 0),
                    (Opcode::UnpackSequence, 4),
                    (Opcode::StoreFast, 0),
                    (Opcode::StoreFast, 1),
                    (Opcode::StoreFast, 2),
                    (Opcode::StoreFast, 3),
                    (Opcode::LoadFast, 0),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let err = run_function(vm, spec, vec![]).unwrap_err();
            let msg = err.as_object().str(vm).unwrap();
            assert_eq!(
                msg.as_str(),
                "not enough values to unpack (expected 4, got 3)"
            );
        });
    }

    #[test]
    fn unpack_sequence_assigns_left_to_right() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let spec = CodeSpec {
                consts: vec![ConstantData::Tuple {
                    elements: vec![
                        ConstantData::Integer { value: BigInt::from(10) },
                        ConstantData::Integer { value: BigInt::from(20) },
                    ],
                }],
                locals: vec![("a", KIND_LOCAL), ("b", KIND_LOCAL)],
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadConst, 0),
                    (Opcode::UnpackSequence, 2),
                    (Opcode::StoreFast, 0),
                    (Opcode::StoreFast, 1),
                    (Opcode::LoadFast, 0),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let result = run_function(vm, spec, vec![]).unwrap();
            assert_eq!(int_of(&result), BigInt::from(10));
        });
    }

    #[test]
    fn unpack_ex_collects_the_middle() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            // a, *b, c = (1, 2, 3, 4); return b[1]
            // one name before the star and one after: low byte 1, high
            // byte 1, the latter spelled with EXTENDED_ARG
            let spec = CodeSpec {
                consts: vec![
                    ConstantData::Tuple {
                        elements: (1..=4)
                            .map(|i| ConstantData::Integer { value: BigInt::from(i) })
                            .collect(),
                    },
                    ConstantData::Integer { value: BigInt::from(1) },
                ],
                locals: vec![("a", KIND_LOCAL), ("b", KIND_LOCAL), ("c", KIND_LOCAL)],
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadConst, 0),
                    (Opcode::ExtendedArg, 1),
                    (Opcode::UnpackEx, 1),
                    (Opcode::StoreFast, 0),
                    (Opcode::StoreFast, 1),
                    (Opcode::StoreFast, 2),
                    (Opcode::LoadFast, 1),
                    (Opcode::LoadConst, 1),
                    (Opcode::BinarySubscr, 0),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let result = run_function(vm, spec, vec![]).unwrap();
            assert_eq!(int_of(&result), BigInt::from(3));
        });
    }

    #[test]
    fn closure_cells_are_shared_not_copied() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let inner_code = CodeArgs {
                filename: "<test>".to_owned(),
                name: "inner".to_owned(),
                flags: (CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS | CodeFlags::NESTED).bits(),
                bytecode: emit(&[(Opcode::LoadDeref, 0), (Opcode::ReturnValue, 0)]),
                localsplusnames: vec!["x".to_owned()],
                localspluskinds: vec![KIND_FREE],
                stacksize: 1,
                ..Default::default()
            }
            .into_code()
            .unwrap();

            // outer: x = 7; f = inner-closure; x = 9; return f()
            let spec = CodeSpec {
                consts: vec![
                    ConstantData::Integer { value: BigInt::from(7) },
                    ConstantData::Code { code: Box::new(inner_code) },
                    ConstantData::Str { value: "inner".to_owned() },
                    ConstantData::Integer { value: BigInt::from(9) },
                ],
                locals: vec![("x", KIND_CELL)],
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadConst, 0),
                    (Opcode::StoreDeref, 0),
                    (Opcode::LoadClosure, 0),
                    (Opcode::BuildTuple, 1),
                    (Opcode::LoadConst, 1),
                    (Opcode::LoadConst, 2),
                    (Opcode::MakeFunction, 0x08),
                    (Opcode::LoadConst, 3),
                    (Opcode::StoreDeref, 0),
                    (Opcode::CallFunction, 0),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            // the mutation after capture is visible through the shared cell
            let result = run_function(vm, spec, vec![]).unwrap();
            assert_eq!(int_of(&result), BigInt::from(9));
        });
    }

    #[test]
    fn cell_arguments_feed_their_cells() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            // f(x): return (lambda: x)()
            let inner_code = CodeArgs {
                filename: "<test>".to_owned(),
                name: "inner".to_owned(),
                flags: (CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS | CodeFlags::NESTED).bits(),
                bytecode: emit(&[(Opcode::LoadDeref, 0), (Opcode::ReturnValue, 0)]),
                localsplusnames: vec!["x".to_owned()],
                localspluskinds: vec![KIND_FREE],
                stacksize: 1,
                ..Default::default()
            }
            .into_code()
            .unwrap();

            let spec = CodeSpec {
                consts: vec![
                    ConstantData::Code { code: Box::new(inner_code) },
                    ConstantData::Str { value: "inner".to_owned() },
                ],
                locals: vec![("x", KIND_LOCAL | KIND_CELL)],
                argcount: 1,
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadClosure, 0),
                    (Opcode::BuildTuple, 1),
                    (Opcode::LoadConst, 0),
                    (Opcode::LoadConst, 1),
                    (Opcode::MakeFunction, 0x08),
                    (Opcode::CallFunction, 0),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let result =
                run_function(vm, spec, vec![vm.ctx.new_int(21).into_object()]).unwrap();
            assert_eq!(int_of(&result), BigInt::from(21));
        });
    }

    #[test]
    fn compare_and_jump() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            // return 1 if 2 < 3 else 0
            let spec = CodeSpec {
                consts: vec![
                    ConstantData::Integer { value: BigInt::from(2) },
                    ConstantData::Integer { value: BigInt::from(3) },
                    ConstantData::Integer { value: BigInt::from(1) },
                    ConstantData::Integer { value: BigInt::from(0) },
                ],
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadConst, 0),
                    (Opcode::LoadConst, 1),
                    (Opcode::CompareOp, 0), // Lt
                    (Opcode::PopJumpIfFalse, 12),
                    (Opcode::LoadConst, 2),
                    (Opcode::ReturnValue, 0),
                    (Opcode::LoadConst, 3), // byte offset 12
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let result = run_function(vm, spec, vec![]).unwrap();
            assert_eq!(int_of(&result), BigInt::from(1));
        });
    }

    #[test]
    fn for_iter_drives_the_iteration_protocol() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            // total = 0; for i in (1, 2, 3): total += i; return total
            let spec = CodeSpec {
                consts: vec![
                    ConstantData::Integer { value: BigInt::from(0) },
                    ConstantData::Tuple {
                        elements: (1..=3)
                            .map(|i| ConstantData::Integer { value: BigInt::from(i) })
                            .collect(),
                    },
                ],
                locals: vec![("total", KIND_LOCAL), ("i", KIND_LOCAL)],
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadConst, 0),
                    (Opcode::StoreFast, 0),
                    (Opcode::LoadConst, 1),
                    (Opcode::GetIter, 0),
                    (Opcode::ForIter, 12), // exhausted -> word 5 + 6
                    (Opcode::StoreFast, 1),
                    (Opcode::LoadFast, 0),
                    (Opcode::LoadFast, 1),
                    (Opcode::InplaceAdd, 0),
                    (Opcode::StoreFast, 0),
                    (Opcode::JumpAbsolute, 8), // back to FOR_ITER (byte 8)
                    (Opcode::LoadFast, 0),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let result = run_function(vm, spec, vec![]).unwrap();
            assert_eq!(int_of(&result), BigInt::from(6));
        });
    }

    #[test]
    fn build_const_key_map_and_subscript() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let spec = CodeSpec {
                consts: vec![
                    ConstantData::Integer { value: BigInt::from(1) },
                    ConstantData::Integer { value: BigInt::from(2) },
                    ConstantData::Tuple {
                        elements: vec![
                            ConstantData::Str { value: "a".to_owned() },
                            ConstantData::Str { value: "b".to_owned() },
                        ],
                    },
                    ConstantData::Str { value: "b".to_owned() },
                ],
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadConst, 0),
                    (Opcode::LoadConst, 1),
                    (Opcode::LoadConst, 2),
                    (Opcode::BuildConstKeyMap, 2),
                    (Opcode::LoadConst, 3),
                    (Opcode::BinarySubscr, 0),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let result = run_function(vm, spec, vec![]).unwrap();
            assert_eq!(int_of(&result), BigInt::from(2));
        });
    }

    #[test]
    fn call_function_kw_splits_names() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            // g(a, b): return a - b; call g(10, b=4) through the kw opcode
            let g_spec = CodeSpec {
                locals: vec![("a", KIND_LOCAL), ("b", KIND_LOCAL)],
                argcount: 2,
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadFast, 0),
                    (Opcode::LoadFast, 1),
                    (Opcode::BinarySubtract, 0),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let g_code = g_spec.build(vm);
            let globals = vm.ctx.new_dict();
            let g = vm.new_function(g_code, globals.clone()).unwrap();
            globals.set_item_str("g", g.into_object());

            let caller = CodeSpec {
                consts: vec![
                    ConstantData::Integer { value: BigInt::from(10) },
                    ConstantData::Integer { value: BigInt::from(4) },
                    ConstantData::Tuple {
                        elements: vec![ConstantData::Str { value: "b".to_owned() }],
                    },
                ],
                names: vec!["g"],
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadGlobal, 0),
                    (Opcode::LoadConst, 0),
                    (Opcode::LoadConst, 1),
                    (Opcode::LoadConst, 2),
                    (Opcode::CallFunctionKw, 2),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let caller_code = caller.build(vm);
            let func = vm.new_function(caller_code, globals).unwrap();
            let result = func.invoke(FuncArgs::default(), vm).unwrap();
            assert_eq!(int_of(&result), BigInt::from(6));
        });
    }

    #[test]
    fn load_method_uses_the_fast_path() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let method = vm.ctx.new_native_function("answer", |args, vm| {
                // receiver plus no explicit arguments
                assert_eq!(args.args.len(), 1);
                Ok(vm.ctx.new_int(42).into_object())
            });
            let cls = vm
                .new_class_with_attrs(
                    "Host",
                    vec![vm.ctx.types.object_type.clone()],
                    [("answer".to_owned(), method.into_object())],
                )
                .unwrap();
            let obj = vm.call_type(&cls, vec![]).unwrap();

            let globals = vm.ctx.new_dict();
            globals.set_item_str("obj", obj);
            let spec = CodeSpec {
                names: vec!["obj", "answer"],
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadGlobal, 0),
                    (Opcode::LoadMethod, 1),
                    (Opcode::CallMethod, 0),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let code = spec.build(vm);
            let func = vm.new_function(code, globals).unwrap();
            let result = func.invoke(FuncArgs::default(), vm).unwrap();
            assert_eq!(int_of(&result), BigInt::from(42));
        });
    }

    #[test]
    fn block_stack_routes_exceptions_to_the_handler() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            // try: raise ValueError() / handler returns 42
            let spec = CodeSpec {
                consts: vec![ConstantData::Integer { value: BigInt::from(42) }],
                names: vec!["ValueError"],
                stacksize: 8,
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::SetupFinally, 6), // handler at word 4
                    (Opcode::LoadGlobal, 0),
                    (Opcode::CallFunction, 0),
                    (Opcode::RaiseVarargs, 1),
                    (Opcode::PopTop, 0), // type
                    (Opcode::PopTop, 0), // value
                    (Opcode::PopTop, 0), // traceback
                    (Opcode::PopExcept, 0),
                    (Opcode::LoadConst, 0),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let result = run_function(vm, spec, vec![]).unwrap();
            assert_eq!(int_of(&result), BigInt::from(42));
        });
    }

    #[test]
    fn exception_table_routes_when_present() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let mut args = CodeArgs {
                filename: "<test>".to_owned(),
                name: "f".to_owned(),
                flags: (CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS).bits(),
                bytecode: emit(&[
                    (Opcode::LoadGlobal, 0),
                    (Opcode::CallFunction, 0),
                    (Opcode::RaiseVarargs, 1),
                    (Opcode::Nop, 0),
                    (Opcode::PopTop, 0), // pushed exception
                    (Opcode::PopExcept, 0),
                    (Opcode::LoadConst, 0),
                    (Opcode::ReturnValue, 0),
                ]),
                consts: vec![ConstantData::Integer { value: BigInt::from(42) }],
                names: vec!["ValueError".to_owned()],
                stacksize: 4,
                ..Default::default()
            };
            // one entry: instructions [0, 4) -> handler 4, depth 0
            args.exceptiontable = vec![0x80, 4, 4, 0];
            let code = vm.ctx.new_code(args.into_code().unwrap());
            let globals = vm.ctx.new_dict();
            let func = vm.new_function(code, globals).unwrap();
            let result = func.invoke(FuncArgs::default(), vm).unwrap();
            assert_eq!(int_of(&result), BigInt::from(42));
        });
    }

    #[test]
    fn uncaught_exceptions_leave_the_loop() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let spec = CodeSpec {
                names: vec!["ValueError"],
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadGlobal, 0),
                    (Opcode::CallFunction, 0),
                    (Opcode::RaiseVarargs, 1),
                ]))
            };
            let err = run_function(vm, spec, vec![]).unwrap_err();
            assert!(err.fast_isinstance(&vm.ctx.exceptions.value_error));
        });
    }

    #[test]
    fn is_and_contains_opcodes() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            // return None is None
            let spec = CodeSpec {
                consts: vec![ConstantData::None, ConstantData::None],
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadConst, 0),
                    (Opcode::LoadConst, 1),
                    (Opcode::IsOp, 0),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let result = run_function(vm, spec, vec![]).unwrap();
            assert!(crate::builtins::bool_::get_value(&result));

            // return 2 in (1, 2)
            let spec = CodeSpec {
                consts: vec![
                    ConstantData::Integer { value: BigInt::from(2) },
                    ConstantData::Tuple {
                        elements: vec![
                            ConstantData::Integer { value: BigInt::from(1) },
                            ConstantData::Integer { value: BigInt::from(2) },
                        ],
                    },
                ],
                ..CodeSpec::function_shaped(emit(&[
                    (Opcode::LoadConst, 0),
                    (Opcode::LoadConst, 1),
                    (Opcode::ContainsOp, 0),
                    (Opcode::ReturnValue, 0),
                ]))
            };
            let result = run_function(vm, spec, vec![]).unwrap();
            assert!(crate::builtins::bool_::get_value(&result));
        });
    }

    #[test]
    fn module_style_code_uses_the_name_mapping() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            // x = 5; return x, through LOAD_NAME/STORE_NAME with flags = 0
            let code = CodeArgs {
                filename: "<test>".to_owned(),
                name: "<module>".to_owned(),
                flags: 0,
                bytecode: emit(&[
                    (Opcode::LoadConst, 0),
                    (Opcode::StoreName, 0),
                    (Opcode::LoadName, 0),
                    (Opcode::ReturnValue, 0),
                ]),
                consts: vec![ConstantData::Integer { value: BigInt::from(5) }],
                names: vec!["x".to_owned()],
                stacksize: 1,
                ..Default::default()
            }
            .into_code()
            .unwrap();
            let globals = vm.ctx.new_dict();
            let result = vm.run_code_object(vm.ctx.new_code(code), globals.clone()).unwrap();
            assert_eq!(int_of(&result), BigInt::from(5));
            // the store went into the module namespace
            assert!(globals.contains_key_str("x"));
        });
    }
}
