//! Top level container of the runtime. One `VirtualMachine` executes frames
//! against the process-wide [`Context`].

mod context;
mod interpreter;
mod method;
mod vm_new;
mod vm_ops;

pub use context::{Context, TypeZoo};
pub use interpreter::{Interpreter, Settings};
pub(crate) use method::PyMethod;

use crate::builtins::dict::PyDictRef;
use crate::builtins::exceptions::PyBaseExceptionRef;
use crate::builtins::function::PyFunction;
use crate::builtins::type_::{PyAttributes, PyType, PyTypeRef};
use crate::frame::{Frame, FrameRef};
use crate::function::{FuncArgs, IntoFuncArgs};
use crate::object::{AsObject, PyObjectRef, PyPayload, PyRef, PyResult};
use krait_common::rc::PyRc;
use std::cell::{Cell, RefCell};

pub struct VirtualMachine {
    pub ctx: PyRc<Context>,
    /// The builtins namespace; functions resolve their own view of it from
    /// their globals, this is the fallback.
    pub builtins: PyDictRef,
    pub frames: RefCell<Vec<FrameRef>>,
    pub recursion_limit: Cell<usize>,
    recursion_depth: Cell<usize>,
    /// Exceptions being handled, innermost last; what a bare `raise`
    /// re-raises.
    exception_stack: RefCell<Vec<PyBaseExceptionRef>>,
}

impl VirtualMachine {
    pub(crate) fn new(ctx: PyRc<Context>) -> Self {
        let builtins = ctx.new_dict();
        let vm = Self {
            ctx,
            builtins,
            frames: RefCell::new(vec![]),
            recursion_limit: Cell::new(if cfg!(debug_assertions) { 256 } else { 1000 }),
            recursion_depth: Cell::new(0),
            exception_stack: RefCell::new(vec![]),
        };
        builtins_module::init(&vm);
        vm
    }

    #[inline]
    pub fn is_none(&self, obj: &PyObjectRef) -> bool {
        obj.is(self.ctx.none_ref().as_object())
    }

    #[inline]
    pub fn is_not_implemented(&self, obj: &PyObjectRef) -> bool {
        obj.is(&self.ctx.not_implemented())
    }

    pub fn unwrap_or_none(&self, obj: Option<PyObjectRef>) -> PyObjectRef {
        obj.unwrap_or_else(|| self.ctx.none())
    }

    // recursion control

    pub fn current_recursion_depth(&self) -> usize {
        self.recursion_depth.get()
    }

    /// Run `f` one level deeper, guarding against runaway re-entrancy the
    /// way user hooks (`__instancecheck__` among them) require.
    pub fn with_recursion<R, F: FnOnce() -> PyResult<R>>(&self, _where: &str, f: F) -> PyResult<R> {
        self.check_recursion(_where)?;
        self.recursion_depth.set(self.recursion_depth.get() + 1);
        let result = f();
        self.recursion_depth.set(self.recursion_depth.get() - 1);
        result
    }

    fn check_recursion(&self, _where: &str) -> PyResult<()> {
        if self.recursion_depth.get() >= self.recursion_limit.get() {
            Err(self.new_recursion_error(format!("maximum recursion depth exceeded {_where}")))
        } else {
            Ok(())
        }
    }

    // frame management

    pub fn run_frame(&self, frame: FrameRef) -> PyResult {
        self.with_recursion("while running a python frame", || {
            self.frames.borrow_mut().push(frame.clone());
            let result = frame.run(self);
            self.frames.borrow_mut().pop();
            result
        })
    }

    pub fn current_frame(&self) -> Option<FrameRef> {
        self.frames.borrow().last().cloned()
    }

    // the exception-in-flight stack backing bare `raise`

    pub(crate) fn push_exception(&self, exc: PyBaseExceptionRef) {
        self.exception_stack.borrow_mut().push(exc);
    }

    pub(crate) fn pop_exception(&self) -> Option<PyBaseExceptionRef> {
        self.exception_stack.borrow_mut().pop()
    }

    pub fn topmost_exception(&self) -> Option<PyBaseExceptionRef> {
        self.exception_stack.borrow().last().cloned()
    }

    // calls

    /// Invoke any callable with rust-side arguments.
    pub fn invoke(&self, callable: &PyObjectRef, args: impl IntoFuncArgs) -> PyResult {
        callable.call(args, self)
    }

    /// Instantiate a class, the `cls(...)` road.
    pub fn call_type(&self, cls: &PyTypeRef, args: Vec<PyObjectRef>) -> PyResult {
        cls.as_object().call_with_args(args.into(), self)
    }

    /// Look up a special method on the type (never the instance dict) and
    /// bind it. `Ok(None)` is the quiet empty-slot answer callers use to
    /// fall back.
    pub fn get_special_method(
        &self,
        obj: &PyObjectRef,
        name: &str,
    ) -> PyResult<Option<BoundSpecialMethod>> {
        let Some(func) = obj.class().lookup(name) else {
            return Ok(None);
        };
        let bound = match func.class().slots.descr_get.load() {
            Some(descr_get) => descr_get(
                func,
                Some(obj.clone()),
                Some(obj.class().clone().into_object()),
                self,
            )?,
            None => func,
        };
        Ok(Some(BoundSpecialMethod(bound)))
    }

    /// Call a special method, erroring with `AttributeError` when the type
    /// does not define it.
    pub fn call_special_method(
        &self,
        obj: &PyObjectRef,
        name: &str,
        args: impl IntoFuncArgs,
    ) -> PyResult {
        match self.get_special_method(obj, name)? {
            Some(meth) => meth.invoke(args, self),
            None => Err(self.new_attribute_error(format!(
                "'{:.50}' object has no attribute '{:.50}'",
                obj.class().name(),
                name
            ))),
        }
    }

    // class construction conveniences used by embedders and tests

    pub fn new_class(&self, name: &str, bases: Vec<PyTypeRef>) -> PyResult<PyTypeRef> {
        PyRef::<PyType>::new_heap(name, bases, PyAttributes::default(), self)
    }

    pub fn new_class_with_attrs(
        &self,
        name: &str,
        bases: Vec<PyTypeRef>,
        attrs: impl IntoIterator<Item = (String, PyObjectRef)>,
    ) -> PyResult<PyTypeRef> {
        let mut attributes = PyAttributes::default();
        for (key, value) in attrs {
            attributes.insert(key, value);
        }
        PyRef::<PyType>::new_heap(name, bases, attributes, self)
    }

    /// Build a function object over a code object with this vm's builtins
    /// visible, ready to invoke.
    pub fn new_function(
        &self,
        code: crate::builtins::code::PyCodeRef,
        globals: PyDictRef,
    ) -> PyResult<PyRef<PyFunction>> {
        let qualname = code.code.qualname.clone();
        let func = PyFunction::new(code, globals, None, None, None, None, qualname, self)?;
        Ok(PyRef::new_ref(
            func,
            self.ctx.types.function_type.clone(),
            None,
        ))
    }

    /// Run a code object the way a module body runs: names in `globals`.
    pub fn run_code_object(&self, code: crate::builtins::code::PyCodeRef, globals: PyDictRef) -> PyResult {
        // module namespaces see the builtins through their globals
        if !globals.contains_key_str("__builtins__") {
            globals.set_item_str("__builtins__", self.builtins.clone().into_object());
        }
        let scope = crate::scope::Scope::new(Some(globals.clone()), globals);
        let frame = Frame::new(code, scope, self.builtins.clone(), &[], self).into_ref(&self.ctx);
        self.run_frame(frame)
    }
}

/// A special method bound to its receiver, ready for invocation.
pub struct BoundSpecialMethod(PyObjectRef);

impl BoundSpecialMethod {
    pub fn invoke(&self, args: impl IntoFuncArgs, vm: &VirtualMachine) -> PyResult {
        self.0.call(args, vm)
    }

    pub fn as_object(&self) -> &PyObjectRef {
        &self.0
    }
}

/// The handful of built-in functions the core itself needs visible from
/// bytecode (`len`, `repr`, type tests).
mod builtins_module {
    use super::*;

    pub(super) fn init(vm: &VirtualMachine) {
        let set = |name: &'static str, func: crate::builtins::builtin_func::PyNativeFn| {
            let obj = vm.ctx.new_native_function(name, func).into_object();
            vm.builtins.set_item_str(name, obj);
        };

        set("len", |args: FuncArgs, vm| {
            let [obj] = take_exact::<1>(args, "len", vm)?;
            let len = obj.length(vm)?;
            Ok(vm.ctx.new_int(len).into_object())
        });
        set("repr", |args, vm| {
            let [obj] = take_exact::<1>(args, "repr", vm)?;
            obj.repr(vm).map(|s| s.into_object())
        });
        set("hash", |args, vm| {
            let [obj] = take_exact::<1>(args, "hash", vm)?;
            let hash = obj.hash(vm)?;
            Ok(vm.ctx.new_int(hash).into_object())
        });
        set("id", |args, vm| {
            let [obj] = take_exact::<1>(args, "id", vm)?;
            Ok(vm.ctx.new_int(obj.get_id() as u64).into_object())
        });
        set("isinstance", |args, vm| {
            let [obj, cls] = take_exact::<2>(args, "isinstance", vm)?;
            let result = obj.is_instance(&cls, vm)?;
            Ok(vm.ctx.new_bool(result).into_object())
        });
        set("issubclass", |args, vm| {
            let [derived, cls] = take_exact::<2>(args, "issubclass", vm)?;
            let result = derived.is_subclass(&cls, vm)?;
            Ok(vm.ctx.new_bool(result).into_object())
        });
        set("iter", |args, vm| {
            let [obj] = take_exact::<1>(args, "iter", vm)?;
            obj.get_iter(vm)
        });

        // the exception types bytecode raises by name
        let exc = &vm.ctx.exceptions;
        for (name, typ) in [
            ("BaseException", &exc.base_exception_type),
            ("Exception", &exc.exception_type),
            ("TypeError", &exc.type_error),
            ("AttributeError", &exc.attribute_error),
            ("ValueError", &exc.value_error),
            ("LookupError", &exc.lookup_error),
            ("IndexError", &exc.index_error),
            ("KeyError", &exc.key_error),
            ("NameError", &exc.name_error),
            ("UnboundLocalError", &exc.unbound_local_error),
            ("ArithmeticError", &exc.arithmetic_error),
            ("OverflowError", &exc.overflow_error),
            ("ZeroDivisionError", &exc.zero_division_error),
            ("RuntimeError", &exc.runtime_error),
            ("RecursionError", &exc.recursion_error),
            ("NotImplementedError", &exc.not_implemented_error),
            ("StopIteration", &exc.stop_iteration),
        ] {
            vm.builtins
                .set_item_str(name, typ.clone().into_object());
        }

        for (name, typ) in [
            ("object", &vm.ctx.types.object_type),
            ("type", &vm.ctx.types.type_type),
            ("int", &vm.ctx.types.int_type),
            ("bool", &vm.ctx.types.bool_type),
            ("float", &vm.ctx.types.float_type),
            ("str", &vm.ctx.types.str_type),
            ("tuple", &vm.ctx.types.tuple_type),
            ("list", &vm.ctx.types.list_type),
            ("dict", &vm.ctx.types.dict_type),
        ] {
            vm.builtins
                .set_item_str(name, typ.clone().into_object());
        }
    }

    fn take_exact<const N: usize>(
        args: FuncArgs,
        name: &str,
        vm: &VirtualMachine,
    ) -> PyResult<[PyObjectRef; N]> {
        if !args.kwargs.is_empty() {
            return Err(vm.new_type_error(format!("{name}() takes no keyword arguments")));
        }
        args.args.try_into().map_err(|args: Vec<PyObjectRef>| {
            vm.new_type_error(format!(
                "{name}() takes exactly {N} argument{} ({} given)",
                if N == 1 { "" } else { "s" },
                args.len()
            ))
        })
    }
}
