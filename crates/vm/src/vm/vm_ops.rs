//! Operator dispatch: the slot-pair rule behind every binary opcode.

use super::VirtualMachine;
use crate::object::{AsObject, PyObjectRef, PyResult};
use crate::protocol::number::PyNumberBinaryOp;

macro_rules! binary_func {
    ($fn:ident, $op_slot:ident, $op:literal) => {
        pub fn $fn(&self, a: &PyObjectRef, b: &PyObjectRef) -> PyResult {
            self.binary_op(a, b, PyNumberBinaryOp::$op_slot, $op)
        }
    };
}

macro_rules! inplace_binary_func {
    ($fn:ident, $iname:literal, $op_slot:ident, $op:literal) => {
        pub fn $fn(&self, a: &PyObjectRef, b: &PyObjectRef) -> PyResult {
            self.binary_iop(a, b, $iname, PyNumberBinaryOp::$op_slot, $op)
        }
    };
}

/// Collection of operators.
impl VirtualMachine {
    /// Calling scheme used for binary operations.
    ///
    /// Order operations are tried until either a valid result or error:
    ///   `b.rop(b,a)[*], a.op(a,b), b.rop(b,a)`
    ///
    /// `[*]` only when `type(b)` is a strict subclass of `type(a)`.
    pub fn binary_op1(&self, a: &PyObjectRef, b: &PyObjectRef, op_slot: PyNumberBinaryOp) -> PyResult {
        let class_a = a.class().clone();
        let class_b = b.class().clone();

        // slots are inherited at type creation, so access is direct
        let slot_a = class_a.slots.as_number.left_binary_op(op_slot);
        let mut slot_b = None;

        if !class_a.is(&class_b) {
            let slot_bb = class_b.slots.as_number.right_binary_op(op_slot);
            if slot_bb.map(|f| f as usize) != slot_a.map(|f| f as usize) {
                slot_b = slot_bb;
            }
        }

        if let Some(slot_a) = slot_a {
            if let Some(slot_bb) = slot_b {
                if class_b.fast_issubclass(&class_a) {
                    let ret = slot_bb(a, b, self)?;
                    if !self.is_not_implemented(&ret) {
                        return Ok(ret);
                    }
                    slot_b = None;
                }
            }
            let ret = slot_a(a, b, self)?;
            if !self.is_not_implemented(&ret) {
                return Ok(ret);
            }
        }

        if let Some(slot_b) = slot_b {
            let ret = slot_b(a, b, self)?;
            if !self.is_not_implemented(&ret) {
                return Ok(ret);
            }
        }

        Ok(self.ctx.not_implemented())
    }

    pub fn binary_op(
        &self,
        a: &PyObjectRef,
        b: &PyObjectRef,
        op_slot: PyNumberBinaryOp,
        op: &str,
    ) -> PyResult {
        let result = self.binary_op1(a, b, op_slot)?;
        if !self.is_not_implemented(&result) {
            return Ok(result);
        }
        Err(self.new_unsupported_bin_op_error(a, b, op))
    }

    /// In-place operators fall back to the plain operation when the
    /// augmented dunder is absent or passes.
    fn binary_iop(
        &self,
        a: &PyObjectRef,
        b: &PyObjectRef,
        iname: &str,
        op_slot: PyNumberBinaryOp,
        op: &str,
    ) -> PyResult {
        if let Some(meth) = self.get_special_method(a, iname)? {
            let result = meth.invoke((b.clone(),), self)?;
            if !self.is_not_implemented(&result) {
                return Ok(result);
            }
        }
        self.binary_op(a, b, op_slot, op)
    }

    binary_func!(_add, Add, "+");
    binary_func!(_sub, Subtract, "-");
    binary_func!(_mul, Multiply, "*");
    binary_func!(_mod, Remainder, "%");
    binary_func!(_divmod, Divmod, "divmod");
    binary_func!(_lshift, Lshift, "<<");
    binary_func!(_rshift, Rshift, ">>");
    binary_func!(_and, And, "&");
    binary_func!(_xor, Xor, "^");
    binary_func!(_or, Or, "|");
    binary_func!(_floordiv, FloorDivide, "//");
    binary_func!(_truediv, TrueDivide, "/");

    inplace_binary_func!(_iadd, "__iadd__", Add, "+=");
    inplace_binary_func!(_isub, "__isub__", Subtract, "-=");
    inplace_binary_func!(_imul, "__imul__", Multiply, "*=");
    inplace_binary_func!(_imod, "__imod__", Remainder, "%=");
    inplace_binary_func!(_ilshift, "__ilshift__", Lshift, "<<=");
    inplace_binary_func!(_irshift, "__irshift__", Rshift, ">>=");
    inplace_binary_func!(_iand, "__iand__", And, "&=");
    inplace_binary_func!(_ixor, "__ixor__", Xor, "^=");
    inplace_binary_func!(_ior, "__ior__", Or, "|=");
    inplace_binary_func!(_ifloordiv, "__ifloordiv__", FloorDivide, "//=");
    inplace_binary_func!(_itruediv, "__itruediv__", TrueDivide, "/=");

    /// Ternary power, with the same reflected shape as the binary rule.
    pub fn _pow(&self, a: &PyObjectRef, b: &PyObjectRef, c: &PyObjectRef) -> PyResult {
        let class_a = a.class().clone();
        let class_b = b.class().clone();

        let slot_a = class_a.slots.as_number.power.load();
        let mut slot_b = None;
        if !class_a.is(&class_b) {
            let slot_bb = class_b.slots.as_number.right_power.load();
            if slot_bb.map(|f| f as usize) != slot_a.map(|f| f as usize) {
                slot_b = slot_bb;
            }
        }

        if let Some(slot_a) = slot_a {
            if let Some(slot_bb) = slot_b {
                if class_b.fast_issubclass(&class_a) {
                    let ret = slot_bb(a, b, c, self)?;
                    if !self.is_not_implemented(&ret) {
                        return Ok(ret);
                    }
                    slot_b = None;
                }
            }
            let ret = slot_a(a, b, c, self)?;
            if !self.is_not_implemented(&ret) {
                return Ok(ret);
            }
        }
        if let Some(slot_b) = slot_b {
            let ret = slot_b(a, b, c, self)?;
            if !self.is_not_implemented(&ret) {
                return Ok(ret);
            }
        }

        Err(self.new_unsupported_bin_op_error(a, b, "** or pow()"))
    }

    pub fn _ipow(&self, a: &PyObjectRef, b: &PyObjectRef, c: &PyObjectRef) -> PyResult {
        if let Some(meth) = self.get_special_method(a, "__ipow__")? {
            let result = meth.invoke((b.clone(),), self)?;
            if !self.is_not_implemented(&result) {
                return Ok(result);
            }
        }
        self._pow(a, b, c)
    }

    pub fn _neg(&self, a: &PyObjectRef) -> PyResult {
        match a.class().slots.as_number.negative.load() {
            Some(negative) => negative(a, self),
            None => Err(self.new_unsupported_unary_error(a, "unary -")),
        }
    }

    pub fn _pos(&self, a: &PyObjectRef) -> PyResult {
        match a.class().slots.as_number.positive.load() {
            Some(positive) => positive(a, self),
            None => Err(self.new_unsupported_unary_error(a, "unary +")),
        }
    }

    pub fn _invert(&self, a: &PyObjectRef) -> PyResult {
        match a.class().slots.as_number.invert.load() {
            Some(invert) => invert(a, self),
            None => Err(self.new_unsupported_unary_error(a, "unary ~")),
        }
    }

    pub fn _abs(&self, a: &PyObjectRef) -> PyResult {
        match a.class().slots.as_number.absolute.load() {
            Some(absolute) => absolute(a, self),
            None => Err(self.new_unsupported_unary_error(a, "abs()")),
        }
    }

    /// Membership; the slot, else one element at a time.
    pub fn _contains(&self, haystack: &PyObjectRef, needle: &PyObjectRef) -> PyResult<bool> {
        if let Some(contains) = haystack.class().slots.contains.load() {
            return contains(haystack, needle, self);
        }
        let iter = crate::protocol::PyIter::new(haystack.get_iter(self).map_err(|_| {
            self.new_type_error(format!(
                "argument of type '{:.200}' is not iterable",
                haystack.class().name()
            ))
        })?);
        loop {
            match iter.next(self)? {
                crate::protocol::PyIterReturn::Return(value) => {
                    if value.rich_compare_bool(
                        needle,
                        crate::types::slot::PyComparisonOp::Eq,
                        self,
                    )? {
                        break Ok(true);
                    }
                }
                crate::protocol::PyIterReturn::StopIteration(_) => break Ok(false),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::AsObject;
    use crate::vm::Interpreter;

    #[test]
    fn reflected_op_of_a_subclass_wins() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            // Base defines __add__, Sub overrides __radd__; for
            // base + sub the subclass side must be asked first
            let base_add = vm.ctx.new_native_function("add", |args, vm| {
                let _ = args;
                Ok(vm.ctx.new_str("base").into_object())
            });
            let base = vm
                .new_class_with_attrs(
                    "Base",
                    vec![vm.ctx.types.object_type.clone()],
                    [("__add__".to_owned(), base_add.into_object())],
                )
                .unwrap();
            let sub_radd = vm.ctx.new_native_function("radd", |args, vm| {
                let _ = args;
                Ok(vm.ctx.new_str("sub").into_object())
            });
            let sub = vm
                .new_class_with_attrs(
                    "Sub",
                    vec![base.clone()],
                    [("__radd__".to_owned(), sub_radd.into_object())],
                )
                .unwrap();

            let a = vm.call_type(&base, vec![]).unwrap();
            let b = vm.call_type(&sub, vec![]).unwrap();
            let res = vm._add(&a, &b).unwrap();
            let s = res.payload::<crate::builtins::str::PyStr>().unwrap();
            assert_eq!(s.as_str(), "sub");
        });
    }

    #[test]
    fn unsupported_operands_report_both_types() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let a = vm.ctx.new_str("x").into_object();
            let b = vm.ctx.new_int(1).into_object();
            let err = vm._sub(&a, &b).unwrap_err();
            let msg = err.as_object().str(vm).unwrap();
            assert_eq!(
                msg.as_str(),
                "unsupported operand type(s) for -: 'str' and 'int'"
            );
        });
    }

    #[test]
    fn not_implemented_on_both_sides_raises() {
        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let a = vm.ctx.new_str("x").into_object();
            let b = vm.ctx.new_int(1).into_object();
            let err = vm._add(&a, &b).unwrap_err();
            let msg = err.as_object().str(vm).unwrap();
            assert_eq!(
                msg.as_str(),
                "unsupported operand type(s) for +: 'str' and 'int'"
            );
        });
    }
}
