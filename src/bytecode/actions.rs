//! Runtime effects for the standard opcodes
//!
//! Each function here has the [`ActionFn`](super::registry::ActionFn)
//! signature and is bound to its mnemonic in [`opcodes`](super::opcodes).

use super::instruction::Param;
use super::vm::{Value, Vm, VmError, VmResult};

fn param<'a>(params: &'a [Param], index: usize, opcode: &'static str) -> VmResult<&'a Param> {
    params
        .get(index)
        .ok_or(VmError::MissingParam { opcode, index })
}

fn integer_param(params: &[Param], index: usize, opcode: &'static str) -> VmResult<i64> {
    match param(params, index, opcode)? {
        Param::Integer(n) => Ok(*n),
        Param::Symbol(_) => Err(VmError::TypeError {
            expected: "Integer",
            got: "Symbol",
        }),
    }
}

fn symbol_param<'a>(params: &'a [Param], index: usize, opcode: &'static str) -> VmResult<&'a str> {
    match param(params, index, opcode)? {
        Param::Symbol(s) => Ok(s),
        Param::Integer(_) => Err(VmError::TypeError {
            expected: "Symbol",
            got: "Integer",
        }),
    }
}

fn count_param(params: &[Param], index: usize, opcode: &'static str) -> VmResult<usize> {
    let n = integer_param(params, index, opcode)?;
    usize::try_from(n).map_err(|_| VmError::Runtime(format!("{}: negative count {}", opcode, n)))
}

// === Stack ===

pub(crate) fn pop(vm: &mut Vm, _params: &[Param]) -> VmResult<()> {
    vm.pop().map(drop)
}

// === Values ===

pub(crate) fn push(vm: &mut Vm, params: &[Param]) -> VmResult<()> {
    for p in params {
        vm.push(Value::from_param(p))?;
    }
    Ok(())
}

pub(crate) fn put_object(vm: &mut Vm, params: &[Param]) -> VmResult<()> {
    let value = Value::from_param(param(params, 0, "putobject")?);
    vm.push(value)
}

pub(crate) fn put_string(vm: &mut Vm, params: &[Param]) -> VmResult<()> {
    let text = symbol_param(params, 0, "putstring")?;
    vm.push(Value::String(text.to_string()))
}

pub(crate) fn put_self(vm: &mut Vm, _params: &[Param]) -> VmResult<()> {
    let value = vm.current_self()?;
    vm.push(value)
}

pub(crate) fn put_nil(vm: &mut Vm, _params: &[Param]) -> VmResult<()> {
    vm.push(Value::Nil)
}

pub(crate) fn new_array(vm: &mut Vm, params: &[Param]) -> VmResult<()> {
    let count = count_param(params, 0, "newarray")?;
    let items = vm.pop_n(count)?;
    vm.push(Value::Array(items))
}

// === Variables ===

pub(crate) fn get_local(vm: &mut Vm, params: &[Param]) -> VmResult<()> {
    let index = integer_param(params, 0, "getlocal")?;
    let value = vm.local(index)?;
    vm.push(value)
}

pub(crate) fn set_local(vm: &mut Vm, params: &[Param]) -> VmResult<()> {
    let index = integer_param(params, 0, "setlocal")?;
    let value = vm.pop()?;
    vm.set_local(index, value)
}

pub(crate) fn get_constant(vm: &mut Vm, params: &[Param]) -> VmResult<()> {
    let name = symbol_param(params, 0, "getconstant")?;
    let value = vm.constant(name)?;
    vm.push(value)
}

pub(crate) fn set_constant(vm: &mut Vm, params: &[Param]) -> VmResult<()> {
    let name = symbol_param(params, 0, "setconstant")?;
    let value = vm.pop()?;
    vm.set_constant(name, value);
    Ok(())
}

// === Arithmetic ===

fn binary_integers(vm: &mut Vm) -> VmResult<(i64, i64)> {
    let b = vm.pop_integer()?;
    let a = vm.pop_integer()?;
    Ok((a, b))
}

fn overflow(op: &str, a: i64, b: i64) -> VmError {
    VmError::Runtime(format!("integer overflow in {} {} {}", a, op, b))
}

pub(crate) fn add(vm: &mut Vm, _params: &[Param]) -> VmResult<()> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    let sum = match (a, b) {
        (Value::Integer(a), Value::Integer(b)) => {
            Value::Integer(a.checked_add(b).ok_or_else(|| overflow("+", a, b))?)
        }
        (Value::String(mut a), Value::String(b)) => {
            a.push_str(&b);
            Value::String(a)
        }
        (Value::Integer(_), other) | (other, _) => {
            return Err(VmError::TypeError {
                expected: "Integer",
                got: other.type_name(),
            })
        }
    };
    vm.push(sum)
}

pub(crate) fn sub(vm: &mut Vm, _params: &[Param]) -> VmResult<()> {
    let (a, b) = binary_integers(vm)?;
    let diff = a.checked_sub(b).ok_or_else(|| overflow("-", a, b))?;
    vm.push(Value::Integer(diff))
}

pub(crate) fn mul(vm: &mut Vm, _params: &[Param]) -> VmResult<()> {
    let (a, b) = binary_integers(vm)?;
    let product = a.checked_mul(b).ok_or_else(|| overflow("*", a, b))?;
    vm.push(Value::Integer(product))
}

pub(crate) fn div(vm: &mut Vm, _params: &[Param]) -> VmResult<()> {
    let (a, b) = binary_integers(vm)?;
    if b == 0 {
        return Err(VmError::DivisionByZero);
    }
    let quotient = a.checked_div(b).ok_or_else(|| overflow("/", a, b))?;
    vm.push(Value::Integer(quotient))
}

pub(crate) fn lt(vm: &mut Vm, _params: &[Param]) -> VmResult<()> {
    let (a, b) = binary_integers(vm)?;
    vm.push(Value::Bool(a < b))
}

pub(crate) fn gt(vm: &mut Vm, _params: &[Param]) -> VmResult<()> {
    let (a, b) = binary_integers(vm)?;
    vm.push(Value::Bool(a > b))
}

pub(crate) fn eq(vm: &mut Vm, _params: &[Param]) -> VmResult<()> {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(Value::Bool(a == b))
}

// === Control flow ===

pub(crate) fn branch_unless(vm: &mut Vm, params: &[Param]) -> VmResult<()> {
    let line = integer_param(params, 0, "branchunless")?;
    if vm.pop()?.is_truthy() {
        return Ok(());
    }
    vm.jump_to_line(line)
}

pub(crate) fn branch_if(vm: &mut Vm, params: &[Param]) -> VmResult<()> {
    let line = integer_param(params, 0, "branchif")?;
    if !vm.pop()?.is_truthy() {
        return Ok(());
    }
    vm.jump_to_line(line)
}

pub(crate) fn jump(vm: &mut Vm, params: &[Param]) -> VmResult<()> {
    match param(params, 0, "jump")? {
        Param::Integer(line) => vm.jump_to_line(*line),
        Param::Symbol(label) => vm.transfer_to(label),
    }
}

pub(crate) fn leave(vm: &mut Vm, _params: &[Param]) -> VmResult<()> {
    vm.leave_frame()
}

// === Calls ===

pub(crate) fn send(vm: &mut Vm, params: &[Param]) -> VmResult<()> {
    let name = symbol_param(params, 0, "send")?;
    let argc = count_param(params, 1, "send")?;
    vm.send(name, argc)
}
