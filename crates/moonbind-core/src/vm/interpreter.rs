//! Bytecode interpreter
//!
//! Runs one scripted call on the shared value stack. Arguments occupy the
//! bottom of the frame; the operand area sits directly above them and is
//! never popped below its start.

use super::{Opcode, Prototype, Vm};
use crate::{
    object::{FunctionRef, TableRef},
    stack::CallFrame,
    value::{Value, VmString},
    VmError, VmResult,
};

impl Vm {
    /// Execute a scripted closure
    pub(super) fn execute(
        &mut self,
        closure: &FunctionRef,
        proto: &Prototype,
        args: Vec<Value>,
    ) -> VmResult<Vec<Value>> {
        let frame = self.stack.push_frame(args, proto.param_count())?;
        let native_integers = self.options.capabilities.native_integers;
        let code = proto.code();
        let mut ip = 0;

        loop {
            // Fetch opcode
            let opcode_byte = *code.get(ip).ok_or_else(|| {
                VmError::RuntimeError("Instruction pointer out of bounds".to_string())
            })?;
            let opcode = Opcode::from_u8(opcode_byte).ok_or(VmError::InvalidOpcode(opcode_byte))?;

            ip += 1;

            // Dispatch and execute
            match opcode {
                // Stack manipulation & constants
                Opcode::Nop => {}
                Opcode::Pop => {
                    self.pop_operand(&frame)?;
                }
                Opcode::Dup => {
                    let value = self.peek_operand(&frame)?;
                    self.stack.push(value)?;
                }
                Opcode::LoadNil => self.stack.push(Value::Nil)?,
                Opcode::LoadTrue => self.stack.push(Value::Boolean(true))?,
                Opcode::LoadFalse => self.stack.push(Value::Boolean(false))?,
                Opcode::LoadConst => {
                    let index = read_u16(code, &mut ip)? as usize;
                    let value = proto
                        .constant(index)
                        .map(|c| c.to_value(native_integers))
                        .unwrap_or_default();
                    self.stack.push(value)?;
                }

                // Arguments, upvalues & globals
                Opcode::LoadArg => {
                    let index = read_u8(code, &mut ip)? as usize;
                    let value = self.stack.load_arg(index)?;
                    self.stack.push(value)?;
                }
                Opcode::GetUpvalue => {
                    let index = read_u8(code, &mut ip)? as usize;
                    let value = closure.get_upvalue(index + 1).ok_or_else(|| {
                        VmError::RuntimeError(format!("upvalue index {} out of range", index))
                    })?;
                    self.stack.push(value)?;
                }
                Opcode::SetUpvalue => {
                    let index = read_u8(code, &mut ip)? as usize;
                    let value = self.pop_operand(&frame)?;
                    closure.set_upvalue(index + 1, value)?;
                }
                Opcode::GetGlobal => {
                    let name = proto.name_constant(read_u16(code, &mut ip)? as usize)?;
                    let value = self.globals.raw_get(&Value::String(name.clone()));
                    self.stack.push(value)?;
                }
                Opcode::SetGlobal => {
                    let name = proto.name_constant(read_u16(code, &mut ip)? as usize)?;
                    let value = self.pop_operand(&frame)?;
                    self.globals.raw_set(Value::String(name.clone()), value)?;
                }

                // Tables
                Opcode::NewTable => self.stack.push(Value::Table(TableRef::new()))?,
                Opcode::GetField => {
                    let name = proto.name_constant(read_u16(code, &mut ip)? as usize)?;
                    let object = self.pop_operand(&frame)?;
                    let value = self.index(&object, &Value::String(name.clone()))?;
                    self.stack.push(value)?;
                }
                Opcode::SetField => {
                    let name = proto.name_constant(read_u16(code, &mut ip)? as usize)?;
                    let value = self.pop_operand(&frame)?;
                    let object = self.pop_operand(&frame)?;
                    match object {
                        Value::Table(table) => table.raw_set(Value::String(name.clone()), value)?,
                        other => {
                            return Err(VmError::TypeError(format!(
                                "attempt to index a {} value",
                                other.type_name()
                            )))
                        }
                    }
                }

                // Arithmetic, comparison & logical
                Opcode::Add | Opcode::Sub | Opcode::Mul => {
                    let b = self.pop_operand(&frame)?;
                    let a = self.pop_operand(&frame)?;
                    self.stack.push(arith(opcode, &a, &b)?)?;
                }
                Opcode::Concat => {
                    let b = self.pop_operand(&frame)?;
                    let a = self.pop_operand(&frame)?;
                    self.stack.push(concat(&a, &b)?)?;
                }
                Opcode::Eq => {
                    let b = self.pop_operand(&frame)?;
                    let a = self.pop_operand(&frame)?;
                    self.stack.push(Value::Boolean(a == b))?;
                }
                Opcode::Lt => {
                    let b = self.pop_operand(&frame)?;
                    let a = self.pop_operand(&frame)?;
                    self.stack.push(Value::Boolean(less_than(&a, &b)?))?;
                }
                Opcode::Not => {
                    let value = self.pop_operand(&frame)?;
                    self.stack.push(Value::Boolean(!value.is_truthy()))?;
                }

                // Control flow & calls
                Opcode::Jmp => {
                    let delta = read_i16(code, &mut ip)?;
                    ip = jump_target(ip, delta)?;
                }
                Opcode::JmpIfFalse => {
                    let delta = read_i16(code, &mut ip)?;
                    if !self.pop_operand(&frame)?.is_truthy() {
                        ip = jump_target(ip, delta)?;
                    }
                }
                Opcode::Call => {
                    let argc = read_u8(code, &mut ip)? as usize;
                    let args = self.pop_operands(&frame, argc)?;
                    let callee = self.pop_operand(&frame)?;
                    let function = match callee {
                        Value::Function(f) => f,
                        other => {
                            return Err(VmError::TypeError(format!(
                                "attempt to call a {} value",
                                other.type_name()
                            )))
                        }
                    };
                    let result = self.call(&function, args)?.into_iter().next();
                    self.stack.push(result.unwrap_or_default())?;
                }
                Opcode::Return => {
                    let count = read_u8(code, &mut ip)? as usize;
                    let results = self.pop_operands(&frame, count)?;
                    self.stack.pop_frame()?;
                    return Ok(results);
                }
            }
        }
    }

    // ===== Operand access =====

    #[inline]
    fn pop_operand(&mut self, frame: &CallFrame) -> VmResult<Value> {
        if self.stack.depth() <= frame.operands_start() {
            return Err(VmError::StackUnderflow);
        }
        self.stack.pop()
    }

    #[inline]
    fn peek_operand(&self, frame: &CallFrame) -> VmResult<Value> {
        if self.stack.depth() <= frame.operands_start() {
            return Err(VmError::StackUnderflow);
        }
        self.stack.peek().cloned()
    }

    fn pop_operands(&mut self, frame: &CallFrame, count: usize) -> VmResult<Vec<Value>> {
        if self.stack.depth() < frame.operands_start() + count {
            return Err(VmError::StackUnderflow);
        }
        self.stack.pop_n(count)
    }
}

// ===== Operand decoding =====

#[inline]
fn read_u8(code: &[u8], ip: &mut usize) -> VmResult<u8> {
    let value = *code
        .get(*ip)
        .ok_or_else(|| VmError::RuntimeError("Unexpected end of bytecode".to_string()))?;
    *ip += 1;
    Ok(value)
}

#[inline]
fn read_u16(code: &[u8], ip: &mut usize) -> VmResult<u16> {
    let bytes = code
        .get(*ip..*ip + 2)
        .ok_or_else(|| VmError::RuntimeError("Unexpected end of bytecode".to_string()))?;
    *ip += 2;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
fn read_i16(code: &[u8], ip: &mut usize) -> VmResult<i16> {
    read_u16(code, ip).map(|v| v as i16)
}

fn jump_target(ip: usize, delta: i16) -> VmResult<usize> {
    ip.checked_add_signed(delta as isize)
        .ok_or_else(|| VmError::RuntimeError("Jump target out of bounds".to_string()))
}

// ===== Operators =====

fn arith(op: Opcode, a: &Value, b: &Value) -> VmResult<Value> {
    if let (Value::Integer(x), Value::Integer(y)) = (a, b) {
        return Ok(Value::Integer(match op {
            Opcode::Add => x.wrapping_add(*y),
            Opcode::Sub => x.wrapping_sub(*y),
            _ => x.wrapping_mul(*y),
        }));
    }
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => Ok(Value::Number(match op {
            Opcode::Add => x + y,
            Opcode::Sub => x - y,
            _ => x * y,
        })),
        (None, _) => Err(arith_error(a)),
        (_, None) => Err(arith_error(b)),
    }
}

fn arith_error(operand: &Value) -> VmError {
    VmError::TypeError(format!(
        "attempt to perform arithmetic on a {} value",
        operand.type_name()
    ))
}

fn concat_piece(value: &Value) -> VmResult<Vec<u8>> {
    match value {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        Value::Integer(_) | Value::Number(_) => Ok(value.to_string().into_bytes()),
        other => Err(VmError::TypeError(format!(
            "attempt to concatenate a {} value",
            other.type_name()
        ))),
    }
}

fn concat(a: &Value, b: &Value) -> VmResult<Value> {
    let mut bytes = concat_piece(a)?;
    bytes.extend_from_slice(&concat_piece(b)?);
    Ok(Value::String(VmString::from(bytes)))
}

fn less_than(a: &Value, b: &Value) -> VmResult<bool> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Ok(x < y),
        (Value::String(x), Value::String(y)) => Ok(x.as_bytes() < y.as_bytes()),
        _ => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => Ok(x < y),
            _ => Err(VmError::TypeError(format!(
                "attempt to compare {} with {}",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{Capabilities, ProtoBuilder, VmOptions};

    fn run(vm: &mut Vm, builder: ProtoBuilder, args: Vec<Value>) -> VmResult<Vec<Value>> {
        let f = vm.create_closure(builder.build()?, vec![])?;
        vm.call(&f, args)
    }

    #[test]
    fn test_integer_arithmetic_stays_integral() {
        let mut vm = Vm::new();
        let out = run(
            &mut vm,
            ProtoBuilder::new("f").load_int(40).load_int(2).add().ret(1),
            vec![],
        )
        .unwrap();
        assert!(matches!(out[0], Value::Integer(42)));
    }

    #[test]
    fn test_mixed_arithmetic_produces_float() {
        let mut vm = Vm::new();
        let out = run(
            &mut vm,
            ProtoBuilder::new("f").load_int(1).load_number(0.5).add().ret(1),
            vec![],
        )
        .unwrap();
        assert!(matches!(out[0], Value::Number(n) if n == 1.5));
    }

    #[test]
    fn test_integers_become_floats_without_capability() {
        let mut vm = Vm::with_options(VmOptions::default().with_capabilities(Capabilities::minimal()));
        let out = run(
            &mut vm,
            ProtoBuilder::new("f").load_int(2).load_int(3).mul().ret(1),
            vec![],
        )
        .unwrap();
        assert!(matches!(out[0], Value::Number(n) if n == 6.0));
    }

    #[test]
    fn test_arithmetic_type_error() {
        let mut vm = Vm::new();
        let err = run(
            &mut vm,
            ProtoBuilder::new("f").load_int(1).new_table().sub().ret(1),
            vec![],
        )
        .unwrap_err();
        assert!(err.to_string().contains("arithmetic on a table value"));
    }

    #[test]
    fn test_branching() {
        // function(x) if x then return "yes" end return "no" end
        let builder = ProtoBuilder::new("pick")
            .params(1)
            .load_arg(0)
            .jmp_if_false("else")
            .load_str("yes")
            .ret(1)
            .label("else")
            .load_str("no")
            .ret(1);
        let mut vm = Vm::new();
        let f = vm.create_closure(builder.build().unwrap(), vec![]).unwrap();
        assert_eq!(vm.call(&f, vec![Value::Boolean(true)]).unwrap(), vec![Value::from("yes")]);
        assert_eq!(vm.call(&f, vec![Value::Nil]).unwrap(), vec![Value::from("no")]);
    }

    #[test]
    fn test_concat_and_compare() {
        let mut vm = Vm::new();
        let out = run(
            &mut vm,
            ProtoBuilder::new("f")
                .load_str("n=")
                .load_int(7)
                .concat()
                .load_int(1)
                .load_int(2)
                .lt()
                .ret(2),
            vec![],
        )
        .unwrap();
        assert_eq!(out, vec![Value::from("n=7"), Value::Boolean(true)]);
    }

    #[test]
    fn test_operand_underflow_does_not_eat_arguments() {
        let mut vm = Vm::new();
        let err = run(&mut vm, ProtoBuilder::new("f").params(1).pop().ret(0), vec![]).unwrap_err();
        assert!(matches!(err, VmError::StackUnderflow));
        assert_eq!(vm.stack_depth(), 0);
    }

    #[test]
    fn test_globals_and_fields() {
        let mut vm = Vm::new();
        run(
            &mut vm,
            ProtoBuilder::new("f")
                .new_table()
                .dup()
                .load_int(5)
                .set_field("x")
                .set_global("point")
                .ret(0),
            vec![],
        )
        .unwrap();
        let point = vm.get_global("point");
        assert_eq!(point.as_table().unwrap().get_field("x"), Value::Integer(5));

        let out = run(
            &mut vm,
            ProtoBuilder::new("g").get_global("point").get_field("x").ret(1),
            vec![],
        )
        .unwrap();
        assert_eq!(out, vec![Value::Integer(5)]);
    }

    #[test]
    fn test_call_native_from_script() {
        let mut vm = Vm::new();
        let double = vm.create_function("double", |_, args| {
            let n = args.first().and_then(Value::as_integer).unwrap_or(0);
            Ok(vec![Value::Integer(n * 2)])
        });
        vm.set_global("double", double);
        let out = run(
            &mut vm,
            ProtoBuilder::new("f").get_global("double").load_int(21).call(1).ret(1),
            vec![],
        )
        .unwrap();
        assert_eq!(out, vec![Value::Integer(42)]);
    }

    #[test]
    fn test_calling_nil_is_type_error() {
        let mut vm = Vm::new();
        let err = run(
            &mut vm,
            ProtoBuilder::new("f").get_global("missing").call(0).ret(1),
            vec![],
        )
        .unwrap_err();
        assert!(err.to_string().contains("attempt to call a nil value"));
    }
}
