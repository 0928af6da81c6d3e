//! `int`, the arbitrary-precision integer.
//!
//! The payload holds a `BigInt` regardless of magnitude; `bool` is a
//! subtype whose two interned instances reuse this payload, which is why
//! both payload routes appear in the type's accepted list.

use crate::builtins::str::PyStr;
use crate::builtins::type_::PyTypeRef;
use crate::function::FuncArgs;
use crate::object::{AsObject, PyObjectRef, PyPayload, PyRef, PyResult};
use crate::protocol::number::PyNumberMethods;
use crate::types::slot::PyComparisonOp;
use crate::vm::{Context, VirtualMachine};
use krait_common::hash::{hash_bigint, PyHash};
use malachite_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Pow, Signed, ToPrimitive, Zero};

#[derive(Debug)]
pub struct PyInt {
    value: BigInt,
}

impl From<BigInt> for PyInt {
    fn from(value: BigInt) -> Self {
        Self { value }
    }
}

macro_rules! impl_into_pyint {
    ($($t:ty)*) => {$(
        impl From<$t> for PyInt {
            fn from(value: $t) -> Self {
                Self { value: BigInt::from(value) }
            }
        }
    )*};
}
impl_into_pyint!(i8 i16 i32 i64 i128 isize u8 u16 u32 u64 u128 usize);

impl PyPayload for PyInt {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.int_type
    }
}

impl PyInt {
    pub fn as_bigint(&self) -> &BigInt {
        &self.value
    }

    pub fn try_to_primitive<T>(&self, vm: &VirtualMachine) -> PyResult<T>
    where
        T: TryFrom<i64>,
    {
        let as_i64 = self.value.to_i64().ok_or_else(|| {
            vm.new_overflow_error("Python int too large to convert".to_owned())
        })?;
        T::try_from(as_i64)
            .map_err(|_| vm.new_overflow_error("Python int too large to convert".to_owned()))
    }
}

/// `str -> int` for decimal (and other base) literals; the counterpart of
/// the `int -> str` direction in `int_repr`.
pub fn bytes_to_int(lit: &[u8], base: u32) -> Option<BigInt> {
    let text = std::str::from_utf8(lit).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    let (negative, digits) = match text.as_bytes()[0] {
        b'+' => (false, &text[1..]),
        b'-' => (true, &text[1..]),
        _ => (false, text),
    };
    if digits.is_empty()
        || digits.starts_with('_')
        || digits.ends_with('_')
        || digits.contains("__")
    {
        return None;
    }
    let cleaned: String = digits.chars().filter(|&c| c != '_').collect();
    let magnitude = BigInt::parse_bytes(cleaned.as_bytes(), base)?;
    Some(if negative { -magnitude } else { magnitude })
}

fn to_int_value(obj: &PyObjectRef, vm: &VirtualMachine) -> PyResult<BigInt> {
    if let Some(int) = obj.payload::<PyInt>() {
        return Ok(int.as_bigint().clone());
    }
    if let Some(s) = obj.payload::<PyStr>() {
        return bytes_to_int(s.as_str().as_bytes(), 10).ok_or_else(|| {
            vm.new_value_error(format!(
                "invalid literal for int() with base 10: '{:.200}'",
                s.as_str()
            ))
        });
    }
    Err(vm.new_type_error(format!(
        "int() argument must be a string or a number, not '{:.200}'",
        obj.class().name()
    )))
}

// number slot implementations; both operands are checked and a foreign
// operand answers NotImplemented so the dispatcher can reflect

fn int_op<F>(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine, op: F) -> PyResult
where
    F: FnOnce(&BigInt, &BigInt) -> PyResult<BigInt>,
{
    let (Some(a), Some(b)) = (a.payload::<PyInt>(), b.payload::<PyInt>()) else {
        return Ok(vm.ctx.not_implemented());
    };
    op(a.as_bigint(), b.as_bigint()).map(|value| vm.ctx.new_bigint(value).into_object())
}

fn int_add(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    int_op(a, b, vm, |a, b| Ok(a + b))
}

fn int_sub(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    // reflected cells reuse this function, so honor operand order as given
    int_op(a, b, vm, |a, b| Ok(a - b))
}

fn int_mul(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    int_op(a, b, vm, |a, b| Ok(a * b))
}

fn int_mod(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    int_op(a, b, vm, |a, b| {
        if b.is_zero() {
            Err(vm.new_zero_division_error("integer division or modulo by zero".to_owned()))
        } else {
            Ok(a.mod_floor(b))
        }
    })
}

fn int_floordiv(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    int_op(a, b, vm, |a, b| {
        if b.is_zero() {
            Err(vm.new_zero_division_error("integer division or modulo by zero".to_owned()))
        } else {
            Ok(a.div_floor(b))
        }
    })
}

fn int_truediv(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let (Some(a), Some(b)) = (a.payload::<PyInt>(), b.payload::<PyInt>()) else {
        return Ok(vm.ctx.not_implemented());
    };
    let b = b.as_bigint();
    if b.is_zero() {
        return Err(vm.new_zero_division_error("division by zero".to_owned()));
    }
    let quotient = a
        .as_bigint()
        .to_f64()
        .zip(b.to_f64())
        .map(|(a, b)| a / b)
        .ok_or_else(|| vm.new_overflow_error("integer division result too large for a float".to_owned()))?;
    Ok(vm.ctx.new_float(quotient).into_object())
}

fn int_divmod(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let (Some(a), Some(b)) = (a.payload::<PyInt>(), b.payload::<PyInt>()) else {
        return Ok(vm.ctx.not_implemented());
    };
    let b_int = b.as_bigint();
    if b_int.is_zero() {
        return Err(vm.new_zero_division_error("integer division or modulo by zero".to_owned()));
    }
    let a_int = a.as_bigint();
    let div = a_int.div_floor(b_int);
    let rem = a_int.mod_floor(b_int);
    Ok(vm
        .ctx
        .new_tuple(vec![
            vm.ctx.new_bigint(div).into_object(),
            vm.ctx.new_bigint(rem).into_object(),
        ])
        .into_object())
}

fn int_pow(a: &PyObjectRef, b: &PyObjectRef, c: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let (Some(a), Some(b)) = (a.payload::<PyInt>(), b.payload::<PyInt>()) else {
        return Ok(vm.ctx.not_implemented());
    };
    if !vm.is_none(c) {
        return Err(vm.new_type_error(
            "pow() 3rd argument not allowed unless all arguments are integers".to_owned(),
        ));
    }
    let exponent = b.as_bigint();
    if exponent.is_negative() {
        let base = a
            .as_bigint()
            .to_f64()
            .ok_or_else(|| vm.new_overflow_error("int too large to convert to float".to_owned()))?;
        let exp = exponent
            .to_f64()
            .ok_or_else(|| vm.new_overflow_error("int too large to convert to float".to_owned()))?;
        return Ok(vm.ctx.new_float(base.powf(exp)).into_object());
    }
    let exponent = exponent
        .to_u32()
        .ok_or_else(|| vm.new_overflow_error("exponent too large".to_owned()))?;
    Ok(vm
        .ctx
        .new_bigint(Pow::pow(a.as_bigint(), exponent))
        .into_object())
}

fn shift_amount(b: &BigInt, vm: &VirtualMachine) -> PyResult<usize> {
    if b.is_negative() {
        return Err(vm.new_value_error("negative shift count".to_owned()));
    }
    b.to_usize()
        .ok_or_else(|| vm.new_overflow_error("shift count too large".to_owned()))
}

fn int_lshift(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    int_op(a, b, vm, |a, b| Ok(a << shift_amount(b, vm)?))
}

fn int_rshift(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    int_op(a, b, vm, |a, b| Ok(a >> shift_amount(b, vm)?))
}

fn int_and(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    int_op(a, b, vm, |a, b| Ok(a & b))
}

fn int_xor(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    int_op(a, b, vm, |a, b| Ok(a ^ b))
}

fn int_or(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    int_op(a, b, vm, |a, b| Ok(a | b))
}

fn int_neg(a: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let a = a
        .payload::<PyInt>()
        .ok_or_else(|| vm.new_interpreter_error("int slot called on non-int"))?;
    Ok(vm.ctx.new_bigint(-a.as_bigint()).into_object())
}

fn int_pos(a: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let a = a
        .payload::<PyInt>()
        .ok_or_else(|| vm.new_interpreter_error("int slot called on non-int"))?;
    Ok(vm.ctx.new_bigint(a.as_bigint().clone()).into_object())
}

fn int_abs(a: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let a = a
        .payload::<PyInt>()
        .ok_or_else(|| vm.new_interpreter_error("int slot called on non-int"))?;
    Ok(vm.ctx.new_bigint(a.as_bigint().abs()).into_object())
}

fn int_invert(a: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let a = a
        .payload::<PyInt>()
        .ok_or_else(|| vm.new_interpreter_error("int slot called on non-int"))?;
    Ok(vm.ctx.new_bigint(!a.as_bigint()).into_object())
}

fn int_bool(a: &PyObjectRef, vm: &VirtualMachine) -> PyResult<bool> {
    let a = a
        .payload::<PyInt>()
        .ok_or_else(|| vm.new_interpreter_error("int slot called on non-int"))?;
    Ok(!a.as_bigint().is_zero())
}

fn int_identity(a: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let value = a
        .payload::<PyInt>()
        .ok_or_else(|| vm.new_interpreter_error("int slot called on non-int"))?;
    Ok(vm.ctx.new_bigint(value.as_bigint().clone()).into_object())
}

fn int_float(a: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let value = a
        .payload::<PyInt>()
        .ok_or_else(|| vm.new_interpreter_error("int slot called on non-int"))?;
    let float = value
        .as_bigint()
        .to_f64()
        .ok_or_else(|| vm.new_overflow_error("int too large to convert to float".to_owned()))?;
    Ok(vm.ctx.new_float(float).into_object())
}

pub(crate) const AS_NUMBER: PyNumberMethods = PyNumberMethods {
    add: Some(int_add),
    subtract: Some(int_sub),
    multiply: Some(int_mul),
    remainder: Some(int_mod),
    divmod: Some(int_divmod),
    power: Some(int_pow),
    negative: Some(int_neg),
    positive: Some(int_pos),
    absolute: Some(int_abs),
    boolean: Some(int_bool),
    invert: Some(int_invert),
    lshift: Some(int_lshift),
    rshift: Some(int_rshift),
    and: Some(int_and),
    xor: Some(int_xor),
    or: Some(int_or),
    int: Some(int_identity),
    float: Some(int_float),
    floor_divide: Some(int_floordiv),
    true_divide: Some(int_truediv),
    index: Some(int_identity),
};

pub(crate) fn int_hash(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyHash> {
    let value = zelf
        .payload::<PyInt>()
        .ok_or_else(|| vm.new_interpreter_error("int slot called on non-int"))?;
    Ok(hash_bigint(value.as_bigint()))
}

pub(crate) fn int_repr(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    let value = zelf
        .payload::<PyInt>()
        .ok_or_else(|| vm.new_interpreter_error("int slot called on non-int"))?;
    Ok(vm.ctx.new_str(value.as_bigint().to_string()))
}

pub(crate) fn int_richcompare(
    zelf: &PyObjectRef,
    other: &PyObjectRef,
    op: PyComparisonOp,
    vm: &VirtualMachine,
) -> PyResult {
    let (Some(a), Some(b)) = (zelf.payload::<PyInt>(), other.payload::<PyInt>()) else {
        return Ok(vm.ctx.not_implemented());
    };
    let ord = a.as_bigint().cmp(b.as_bigint());
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

pub(crate) fn int_new(cls: PyTypeRef, args: FuncArgs, vm: &VirtualMachine) -> PyResult {
    if !args.kwargs.is_empty() {
        return Err(vm.new_type_error("int() takes no keyword arguments".to_owned()));
    }
    let value = match args.args.len() {
        0 => BigInt::from(0),
        1 => to_int_value(&args.args[0], vm)?,
        n => {
            return Err(vm.new_type_error(format!(
                "int() takes at most 1 argument ({n} given)"
            )))
        }
    };
    PyInt::from(value)
        .into_ref_with_type(vm, cls)
        .map(PyRef::into_object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Interpreter;

    #[test]
    fn str_int_str_roundtrip() {
        for literal in ["0", "7", "-7", "12345678901234567890123456789", "-1"] {
            let value = bytes_to_int(literal.as_bytes(), 10).unwrap();
            assert_eq!(value.to_string(), literal);
        }
    }

    #[test]
    fn bad_literals_are_rejected() {
        assert!(bytes_to_int(b"", 10).is_none());
        assert!(bytes_to_int(b"12x", 10).is_none());
        assert!(bytes_to_int(b"-", 10).is_none());
    }

    #[test]
    fn arithmetic_dispatches_through_slots() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let a = vm.ctx.new_int(33).into_object();
            let b = vm.ctx.new_int(12).into_object();
            let res = vm._add(&a, &b).unwrap();
            assert_eq!(res.payload::<PyInt>().unwrap().as_bigint(), &BigInt::from(45));
        });
    }

    #[test]
    fn division_by_zero_raises() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let a = vm.ctx.new_int(1).into_object();
            let b = vm.ctx.new_int(0).into_object();
            let err = vm._floordiv(&a, &b).unwrap_err();
            assert!(err.fast_isinstance(&vm.ctx.exceptions.zero_division_error));
        });
    }

    #[test]
    fn int_of_string_uses_value_error_for_garbage() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let cls = vm.ctx.types.int_type.clone();
            let bad = vm.ctx.new_str("spam").into_object();
            let err = int_new(cls, vec![bad].into(), vm).unwrap_err();
            assert!(err.fast_isinstance(&vm.ctx.exceptions.value_error));
        });
    }
}
