//! `float`.

use crate::builtins::int::PyInt;
use crate::builtins::str::PyStr;
use crate::builtins::type_::PyTypeRef;
use crate::function::FuncArgs;
use crate::object::{PyObjectRef, PyPayload, PyRef, PyResult};
use crate::protocol::number::PyNumberMethods;
use crate::types::slot::PyComparisonOp;
use crate::vm::{Context, VirtualMachine};
use krait_common::hash::{self, PyHash};
use malachite_bigint::ToBigInt;
use num_traits::ToPrimitive;

#[derive(Debug, Copy, Clone)]
pub struct PyFloat {
    value: f64,
}

impl From<f64> for PyFloat {
    fn from(value: f64) -> Self {
        Self { value }
    }
}

impl PyPayload for PyFloat {
    fn class(ctx: &Context) -> &PyTypeRef {
        &ctx.types.float_type
    }
}

impl PyFloat {
    pub fn to_f64(&self) -> f64 {
        self.value
    }
}

/// Accept a float or an int operand; anything else means NotImplemented.
fn operand_value(obj: &PyObjectRef) -> Option<f64> {
    if let Some(f) = obj.payload::<PyFloat>() {
        Some(f.value)
    } else {
        obj.payload::<PyInt>().and_then(|i| i.as_bigint().to_f64())
    }
}

fn float_op<F>(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine, op: F) -> PyResult
where
    F: FnOnce(f64, f64) -> PyResult<f64>,
{
    // at least one side is a real float when this slot fires
    let (Some(a), Some(b)) = (operand_value(a), operand_value(b)) else {
        return Ok(vm.ctx.not_implemented());
    };
    op(a, b).map(|value| vm.ctx.new_float(value).into_object())
}

fn float_add(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    float_op(a, b, vm, |a, b| Ok(a + b))
}

fn float_sub(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    float_op(a, b, vm, |a, b| Ok(a - b))
}

fn float_mul(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    float_op(a, b, vm, |a, b| Ok(a * b))
}

fn float_truediv(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    float_op(a, b, vm, |a, b| {
        if b == 0.0 {
            Err(vm.new_zero_division_error("float division by zero".to_owned()))
        } else {
            Ok(a / b)
        }
    })
}

fn float_floordiv(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    float_op(a, b, vm, |a, b| {
        if b == 0.0 {
            Err(vm.new_zero_division_error("float floor division by zero".to_owned()))
        } else {
            Ok((a / b).floor())
        }
    })
}

fn float_mod(a: &PyObjectRef, b: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    float_op(a, b, vm, |a, b| {
        if b == 0.0 {
            Err(vm.new_zero_division_error("float modulo".to_owned()))
        } else {
            // python's % keeps the sign of the divisor
            let rem = a % b;
            Ok(if rem != 0.0 && (rem < 0.0) != (b < 0.0) {
                rem + b
            } else {
                rem
            })
        }
    })
}

fn float_pow(a: &PyObjectRef, b: &PyObjectRef, c: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    if !vm.is_none(c) {
        return Err(vm.new_type_error(
            "pow() 3rd argument not allowed unless all arguments are integers".to_owned(),
        ));
    }
    float_op(a, b, vm, |a, b| Ok(a.powf(b)))
}

fn float_neg(a: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let a = a
        .payload::<PyFloat>()
        .ok_or_else(|| vm.new_interpreter_error("float slot called on non-float"))?;
    Ok(vm.ctx.new_float(-a.value).into_object())
}

fn float_pos(a: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let a = a
        .payload::<PyFloat>()
        .ok_or_else(|| vm.new_interpreter_error("float slot called on non-float"))?;
    Ok(vm.ctx.new_float(a.value).into_object())
}

fn float_abs(a: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let a = a
        .payload::<PyFloat>()
        .ok_or_else(|| vm.new_interpreter_error("float slot called on non-float"))?;
    Ok(vm.ctx.new_float(a.value.abs()).into_object())
}

fn float_bool(a: &PyObjectRef, vm: &VirtualMachine) -> PyResult<bool> {
    let a = a
        .payload::<PyFloat>()
        .ok_or_else(|| vm.new_interpreter_error("float slot called on non-float"))?;
    Ok(a.value != 0.0)
}

fn float_float(a: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let a = a
        .payload::<PyFloat>()
        .ok_or_else(|| vm.new_interpreter_error("float slot called on non-float"))?;
    Ok(vm.ctx.new_float(a.value).into_object())
}

fn float_int(a: &PyObjectRef, vm: &VirtualMachine) -> PyResult {
    let a = a
        .payload::<PyFloat>()
        .ok_or_else(|| vm.new_interpreter_error("float slot called on non-float"))?;
    if !a.value.is_finite() {
        return Err(if a.value.is_nan() {
            vm.new_value_error("cannot convert float NaN to integer".to_owned())
        } else {
            vm.new_overflow_error("cannot convert float infinity to integer".to_owned())
        });
    }
    // exact: truncates toward zero without narrowing through a machine word
    let int = a
        .value
        .to_bigint()
        .ok_or_else(|| vm.new_value_error("cannot convert float to integer".to_owned()))?;
    Ok(vm.ctx.new_int(int).into_object())
}

pub(crate) const AS_NUMBER: PyNumberMethods = PyNumberMethods {
    add: Some(float_add),
    subtract: Some(float_sub),
    multiply: Some(float_mul),
    remainder: Some(float_mod),
    divmod: None,
    power: Some(float_pow),
    negative: Some(float_neg),
    positive: Some(float_pos),
    absolute: Some(float_abs),
    boolean: Some(float_bool),
    invert: None,
    lshift: None,
    rshift: None,
    and: None,
    xor: None,
    or: None,
    int: Some(float_int),
    float: Some(float_float),
    floor_divide: Some(float_floordiv),
    true_divide: Some(float_truediv),
    index: None,
};

pub(crate) fn float_hash(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyHash> {
    let value = zelf
        .payload::<PyFloat>()
        .ok_or_else(|| vm.new_interpreter_error("float slot called on non-float"))?;
    hash::hash_float(value.value)
        .ok_or_else(|| vm.new_value_error("cannot hash a NaN value".to_owned()))
}

pub(crate) fn float_repr(zelf: &PyObjectRef, vm: &VirtualMachine) -> PyResult<PyRef<PyStr>> {
    let value = zelf
        .payload::<PyFloat>()
        .ok_or_else(|| vm.new_interpreter_error("float slot called on non-float"))?;
    let mut text = value.value.to_string();
    // python always spells a float with a fractional part or exponent
    if value.value.is_finite() && !text.contains(['.', 'e', 'E']) {
        text.push_str(".0");
    }
    Ok(vm.ctx.new_str(text))
}

pub(crate) fn float_richcompare(
    zelf: &PyObjectRef,
    other: &PyObjectRef,
    op: PyComparisonOp,
    vm: &VirtualMachine,
) -> PyResult {
    let (Some(a), Some(b)) = (operand_value(zelf), operand_value(other)) else {
        return Ok(vm.ctx.not_implemented());
    };
    let result = match op {
        PyComparisonOp::Lt => a < b,
        PyComparisonOp::Le => a <= b,
        PyComparisonOp::Eq => a == b,
        PyComparisonOp::Ne => a != b,
        PyComparisonOp::Gt => a > b,
        PyComparisonOp::Ge => a >= b,
    };
    Ok(vm.ctx.new_bool(result).into_object())
}

pub(crate) fn float_new(cls: PyTypeRef, args: FuncArgs, vm: &VirtualMachine) -> PyResult {
    let value = match args.args.len() {
        0 => 0.0,
        1 => {
            let arg = &args.args[0];
            if let Some(f) = arg.payload::<PyFloat>() {
                f.value
            } else if let Some(i) = arg.payload::<PyInt>() {
                i.as_bigint().to_f64().ok_or_else(|| {
                    vm.new_overflow_error("int too large to convert to float".to_owned())
                })?
            } else if let Some(s) = arg.payload::<PyStr>() {
                s.as_str().trim().parse::<f64>().map_err(|_| {
                    vm.new_value_error(format!(
                        "could not convert string to float: '{:.200}'",
                        s.as_str()
                    ))
                })?
            } else {
                return Err(vm.new_type_error(format!(
                    "float() argument must be a string or a number, not '{:.200}'",
                    arg.class().name()
                )));
            }
        }
        n => {
            return Err(vm.new_type_error(format!(
                "float() takes at most 1 argument ({n} given)"
            )))
        }
    };
    PyFloat::from(value)
        .into_ref_with_type(vm, cls)
        .map(PyRef::into_object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Interpreter;

    #[test]
    fn mixed_int_float_addition() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let a = vm.ctx.new_float(1.5).into_object();
            let b = vm.ctx.new_int(2).into_object();
            // int.__add__ answers NotImplemented, float.__radd__ resolves
            let res = vm._add(&b, &a).unwrap();
            assert_eq!(res.payload::<PyFloat>().unwrap().to_f64(), 3.5);
        });
    }

    #[test]
    fn int_conversion_is_exact_beyond_machine_words() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let big = vm.ctx.new_float(1e20).into_object();
            let res = float_int(&big, vm).unwrap();
            assert_eq!(
                res.payload::<crate::builtins::int::PyInt>()
                    .unwrap()
                    .as_bigint()
                    .to_string(),
                "100000000000000000000"
            );

            let nan = vm.ctx.new_float(f64::NAN).into_object();
            let err = float_int(&nan, vm).unwrap_err();
            assert!(err.fast_isinstance(&vm.ctx.exceptions.value_error));
            let inf = vm.ctx.new_float(f64::INFINITY).into_object();
            let err = float_int(&inf, vm).unwrap_err();
            assert!(err.fast_isinstance(&vm.ctx.exceptions.overflow_error));
        });
    }

    #[test]
    fn equal_int_and_float_hash_alike() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let f = vm.ctx.new_float(3.0).into_object();
            let i = vm.ctx.new_int(3).into_object();
            assert_eq!(f.hash(vm).unwrap(), i.hash(vm).unwrap());
        });
    }
}
