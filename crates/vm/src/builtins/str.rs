//! `str`.

use crate::builtins::type_::PyTypeRef;
use crate::function::FuncArgs;
use crate::object::{AsObject, PyObjectRef, PyPayload, PyRef, PyResult};
use crate::types::slot::PyComparisonOp;
use crate::vm::{Context, VirtualMachine};
use krait_common::hash::PyHash;

pub type PyStrRef = PyRef<PyStr>;

#[derive(Debug)]
pub struct PyStr {
    value: Box<str>,
}

impl From<&str> for PyStr {
    fn from(value: &str) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl From<String> for PyStr {
    fn from(value: String) -> Self {
        Self {
            value: value.into_boxed_str(),
        }
    }
}

impl PyPayload for PyStr {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.str_type
    }
}

impl PyStr {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn char_len(&self) -> usize {
        self.value.chars().count()
    }
}

pub(crate) fn str_hash(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyHash> {
    let value = zelf
        .payload::<PyStr>()
        .ok_or_else(|| vm.new_interpreter_error("str slot called on non-str"))?;
    Ok(vm.ctx.hash_secret.hash_str(value.as_str()))
}

pub(crate) fn str_len(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<usize> {
    let value = zelf
        .payload::<PyStr>()
        .ok_or_else(|| vm.new_interpreter_error("str slot called on non-str"))?;
    Ok(value.char_len())
}

pub(crate) fn str_str(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    zelf.clone()
        .downcast::<PyStr>()
        .map_err(|_| vm.new_interpreter_error("str slot called on non-str"))
}

pub(crate) fn str_repr(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    let value = zelf
        .payload::<PyStr>()
        .ok_or_else(|| vm.new_interpreter_error("str slot called on non-str"))?;
    let text = value.as_str();
    // prefer single quotes, switching like python does when they appear in
    // the payload
    let quote = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if ch == quote => {
                out.push('\\');
                out.push(ch);
            }
            ch if ch.is_control() => {
                out.push_str(&format!("\\x{:02x}", ch as u32));
            }
            ch => out.push(ch),
        }
    }
    out.push(quote);
    Ok(vm.ctx.new_str(out))
}

pub(crate) fn str_richcompare(
    zelf: &PyObjectRef,
    other: &PyObjectRef,
    op: PyComparisonOp,
    vm: &VirtualMachine,
) -> PyResult {
    let (Some(a), Some(b)) = (zelf.payload::<PyStr>(), other.payload::<PyStr>()) else {
        return Ok(vm.ctx.not_implemented());
    };
    let ord = a.as_str().cmp(b.as_str());
    let result = match op {
        PyComparisonOp::Lt => ord.is_lt(),
        PyComparisonOp::Le => ord.is_le(),
        PyComparisonOp::Eq => ord.is_eq(),
        PyComparisonOp::Ne => ord.is_ne(),
        PyComparisonOp::Gt => ord.is_gt(),
        PyComparisonOp::Ge => ord.is_ge(),
    };
    Ok(vm.ctx.new_bool(result).into_object())
}

pub(crate) fn str_add(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let (Some(a), Some(b)) = (a.payload::<PyStr>(), b.payload::<PyStr>()) else {
        // let the dispatcher try the reflected side before erroring
        return Ok(vm.ctx.not_implemented());
    };
    let mut out = String::with_capacity(a.as_str().len() + b.as_str().len());
    out.push_str(a.as_str());
    out.push_str(b.as_str());
    Ok(vm.ctx.new_str(out).into_object())
}

// concatenation goes through the number add slot so the reflected dispatch
// rule applies uniformly
pub(crate) const AS_NUMBER: crate::protocol::number::PyNumberMethods =
    crate::protocol::number::PyNumberMethods {
        add: Some(str_add),
        ..crate::protocol::number::PyNumberMethods::NOT_IMPLEMENTED
    };

pub(crate) fn str_contains(
    zelf: &PyObjectRef,
    needle: &PyObjectRef,
    vm: &VirtualMachine,
) -> PyResult<bool> {
    let haystack = zelf
        .payload::<PyStr>()
        .ok_or_else(|| vm.new_interpreter_error("str slot called on non-str"))?;
    let needle = needle.payload::<PyStr>().ok_or_else(|| {
        vm.new_type_error(format!(
            "'in <string>' requires string as left operand, not {}",
            needle.class().name()
        ))
    })?;
    Ok(haystack.as_str().contains(needle.as_str()))
}

pub(crate) fn str_getitem(zelf: &PyObjectRef, needle: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let value = zelf
        .payload::<PyStr>()
        .ok_or_else(|| vm.new_interpreter_error("str slot called on non-str"))?;
    let index = needle
        .payload::<crate::builtins::int::PyInt>()
        .ok_or_else(|| {
            vm.new_type_error(format!(
                "string indices must be integers, not '{}'",
                needle.class().name()
            ))
        })?
        .try_to_primitive::<isize>(vm)?;
    let len = value.char_len() as isize;
    let index = if index < 0 { index + len } else { index };
    if index < 0 || index >= len {
        return Err(vm.new_index_error("string index out of range".to_owned()));
    }
    let ch = value
        .as_str()
        .chars()
        .nth(index as usize)
        .unwrap_or_else(|| unreachable!());
    Ok(vm.ctx.new_str(ch.to_string()).into_object())
}

pub(crate) fn str_iter(zelf: PyObjectRef, vm: &VirtualMachine) -> PyResult {
    Ok(crate::builtins::iter::PySequenceIterator::new(zelf)
        .into_ref(&vm.ctx)
        .into_object())
}

pub(crate) fn str_new(cls: PyTypeRef, args: FuncArgs, vm: &VirtualMachine) -> PyResult {
    let value = match args.args.len() {
        0 => vm.ctx.new_str("").into_object(),
        1 => args.args[0].str(vm)?.into_object(),
        n => {
            return Err(vm.new_type_error(format!(
                "str() takes at most 1 argument ({n} given)"
            )))
        }
    };
    if cls.is(&vm.ctx.types.str_type) {
        Ok(value)
    } else {
        let text = value
            .payload::<PyStr>()
            .map(|s| s.as_str().to_owned())
            .unwrap_or_default();
        PyStr::from(text)
            .into_ref_with_type(vm, cls)
            .map(PyRef::into_object)
    }
}

#[cfg(test)]
mod tests {
    use crate::vm::Interpreter;

    #[test]
    fn repr_quotes_like_python() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let plain = vm.ctx.new_str("spam").into_object();
            assert_eq!(plain.repr(vm).unwrap().as_str(), "'spam'");
            let quoted = vm.ctx.new_str("it's").into_object();
            assert_eq!(quoted.repr(vm).unwrap().as_str(), "\"it's\"");
        });
    }

    #[test]
    fn concatenation_and_membership() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let a = vm.ctx.new_str("sp").into_object();
            let b = vm.ctx.new_str("am").into_object();
            let joined = vm._add(&a, &b).unwrap();
            assert_eq!(
                joined
                    .payload::<crate::builtins::str::PyStr>()
                    .unwrap()
                    .as_str(),
                "spam"
            );
            assert!(vm._contains(&joined, &a).unwrap());
        });
    }
}
