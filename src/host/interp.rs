// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Instruction execution.

use std::rc::Rc;

use tracing::trace;

use crate::error::HostError;
use crate::unit::{ArithOp, Constant, Insn, Label, MemberRef, MethodDescriptor};

use super::value::{ObjRef, ObjectData, Value};
use super::{Host, LoadedClass, PreparedMethod, Trap, MAX_DEPTH};

/// What to do after one instruction.
enum Flow {
    Next,
    Jump(Label),
    Return(Option<Value>),
}

struct Frame<'m> {
    method: &'m PreparedMethod,
    stack: Vec<Value>,
    locals: Vec<Value>,
}

impl Frame<'_> {
    fn fatal(&self, message: impl Into<String>) -> Trap {
        Trap::Fatal(HostError::Execution {
            method: self.method.method.signature(),
            message: message.into(),
        })
    }

    fn pop(&mut self) -> Result<Value, Trap> {
        match self.stack.pop() {
            Some(v) => Ok(v),
            None => Err(self.fatal("operand stack underflow")),
        }
    }

    fn pop_int(&mut self) -> Result<i32, Trap> {
        let v = self.pop()?;
        v.as_int()
            .ok_or_else(|| self.fatal(format!("expected int, found {}", v.kind())))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Trap> {
        if self.stack.len() < n {
            return Err(self.fatal("operand stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn local(&self, slot: u16) -> Result<Value, Trap> {
        self.locals
            .get(usize::from(slot))
            .cloned()
            .ok_or_else(|| self.fatal(format!("local {} out of range", slot)))
    }

    fn set_local(&mut self, slot: u16, value: Value) -> Result<(), Trap> {
        let slot = usize::from(slot);
        if slot >= self.locals.len() {
            return Err(self.fatal(format!("local {} out of range", slot)));
        }
        self.locals[slot] = value;
        Ok(())
    }

    fn target(&self, label: Label) -> Result<usize, Trap> {
        self.method
            .labels
            .get(&label)
            .copied()
            .ok_or_else(|| self.fatal(format!("undefined label {}", label)))
    }
}

fn parse_descriptor(member: &MemberRef) -> Result<MethodDescriptor, Trap> {
    MethodDescriptor::parse(&member.descriptor).map_err(|e| {
        Trap::Fatal(HostError::Execution {
            method: member.to_string(),
            message: e.to_string(),
        })
    })
}

impl Host {
    /// Run one method body to completion.
    pub(super) fn execute(
        &mut self,
        class: &Rc<LoadedClass>,
        method: &Rc<PreparedMethod>,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Trap> {
        if self.depth >= MAX_DEPTH {
            return Err(Trap::Fatal(HostError::StackOverflow(MAX_DEPTH)));
        }
        trace!(class = %class.name, method = %method.method.signature(), "Enter");
        self.depth += 1;
        let result = self.run_frame(method, args);
        self.depth -= 1;
        result
    }

    fn run_frame(&mut self, method: &PreparedMethod, args: Vec<Value>) -> Result<Option<Value>, Trap> {
        let arg_slots: usize = args.iter().map(|a| usize::from(a.kind().width())).sum();
        let mut frame = Frame {
            method,
            stack: Vec::with_capacity(usize::from(method.method.max_stack)),
            locals: vec![Value::Null; usize::from(method.method.max_locals).max(arg_slots)],
        };
        let mut slot = 0usize;
        for arg in args {
            let width = usize::from(arg.kind().width());
            frame.locals[slot] = arg;
            slot += width;
        }

        let code = &method.method.code;
        let mut pc = 0usize;
        loop {
            let Some(insn) = code.get(pc) else {
                return Err(frame.fatal("execution fell off the end of the code"));
            };
            match self.step(insn, &mut frame) {
                Ok(Flow::Next) => pc += 1,
                Ok(Flow::Jump(label)) => pc = frame.target(label)?,
                Ok(Flow::Return(value)) => return Ok(value),
                Err(Trap::Throw(thrown)) => match self.find_handler(method, pc, &thrown) {
                    Some(handler) => {
                        frame.stack.clear();
                        frame.stack.push(Value::Ref(thrown));
                        pc = handler;
                    }
                    None => return Err(Trap::Throw(thrown)),
                },
                Err(fatal) => return Err(fatal),
            }
        }
    }

    /// First region in table order that covers `pc` and accepts `thrown`.
    fn find_handler(&self, method: &PreparedMethod, pc: usize, thrown: &ObjRef) -> Option<usize> {
        let class = thrown.borrow().class.clone();
        method
            .regions
            .iter()
            .find(|r| {
                r.start <= pc
                    && pc < r.end
                    && r
                        .catch_type
                        .as_deref()
                        .map_or(true, |catch| self.is_subclass(&class, catch))
            })
            .map(|r| r.handler)
    }

    fn step(&mut self, insn: &Insn, frame: &mut Frame<'_>) -> Result<Flow, Trap> {
        match insn {
            Insn::Label(_) => {}
            Insn::Const(constant) => {
                let value = match constant {
                    Constant::Null => Value::Null,
                    Constant::Int(v) => Value::Int(*v),
                    Constant::Long(v) => Value::Long(*v),
                    Constant::Float(v) => Value::Float(*v),
                    Constant::Double(v) => Value::Double(*v),
                    Constant::Str(s) => self.new_string(s.clone()),
                };
                frame.stack.push(value);
            }
            Insn::Load(_, slot) => {
                let value = frame.local(*slot)?;
                frame.stack.push(value);
            }
            Insn::Store(_, slot) => {
                let value = frame.pop()?;
                frame.set_local(*slot, value)?;
            }
            Insn::Arith(op, _) => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                let value = self.arith(*op, left, right, frame)?;
                frame.stack.push(value);
            }
            Insn::Dup => {
                let top = frame.pop()?;
                frame.stack.push(top.clone());
                frame.stack.push(top);
            }
            Insn::Pop => {
                frame.pop()?;
            }
            Insn::Swap => {
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.stack.push(a);
                frame.stack.push(b);
            }
            Insn::New(class) => {
                let obj = self.new_instance(class)?;
                frame.stack.push(obj);
            }
            Insn::NewArray(element) => {
                let len = frame.pop_int()?;
                let Ok(len) = usize::try_from(len) else {
                    return Err(self.throw_new(
                        "java/lang/NegativeArraySizeException",
                        len.to_string(),
                    ));
                };
                let array = self.alloc(
                    &format!("[L{};", element),
                    ObjectData::Array(vec![Value::Null; len]),
                );
                frame.stack.push(Value::Ref(array));
            }
            Insn::ArrayStore => {
                let value = frame.pop()?;
                let index = frame.pop_int()?;
                let array = frame.pop()?;
                let array = self.non_null(&array)?;
                let stored = {
                    let mut array = array.borrow_mut();
                    let ObjectData::Array(items) = &mut array.data else {
                        return Err(frame.fatal("aastore on a non-array"));
                    };
                    match usize::try_from(index).ok().and_then(|i| items.get_mut(i)) {
                        Some(item) => {
                            *item = value;
                            Ok(())
                        }
                        None => Err(items.len()),
                    }
                };
                if let Err(len) = stored {
                    return Err(self.index_out_of_bounds(index, len));
                }
            }
            Insn::ArrayLoad => {
                let index = frame.pop_int()?;
                let array = frame.pop()?;
                let array = self.non_null(&array)?;
                let item = {
                    let array = array.borrow();
                    let ObjectData::Array(items) = &array.data else {
                        return Err(frame.fatal("aaload on a non-array"));
                    };
                    usize::try_from(index)
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .ok_or(items.len())
                };
                match item {
                    Ok(value) => frame.stack.push(value),
                    Err(len) => return Err(self.index_out_of_bounds(index, len)),
                }
            }
            Insn::GetStatic(member) => {
                let value = self.read_static(&member.owner, &member.name)?;
                frame.stack.push(value);
            }
            Insn::PutStatic(member) => {
                let value = frame.pop()?;
                self.write_static(&member.owner, &member.name, value)?;
            }
            Insn::GetField(member) => {
                let obj = frame.pop()?;
                let obj = self.non_null(&obj)?;
                let value = obj.borrow().field(&member.name).cloned();
                match value {
                    Some(value) => frame.stack.push(value),
                    None => return Err(field_not_found(member)),
                }
            }
            Insn::PutField(member) => {
                let value = frame.pop()?;
                let obj = frame.pop()?;
                let obj = self.non_null(&obj)?;
                let mut obj = obj.borrow_mut();
                match &mut obj.data {
                    ObjectData::Instance(fields) if fields.contains_key(&member.name) => {
                        fields.insert(member.name.clone(), value);
                    }
                    _ => return Err(field_not_found(member)),
                }
            }
            Insn::InvokeStatic(member) => {
                let count = parse_descriptor(member)?.params.len();
                let args = frame.pop_n(count)?;
                if let Some(value) = self.invoke_static(member, args)? {
                    frame.stack.push(value);
                }
            }
            Insn::InvokeVirtual(member) | Insn::InvokeSpecial(member) => {
                let count = parse_descriptor(member)?.params.len() + 1;
                let args = frame.pop_n(count)?;
                let result = if matches!(insn, Insn::InvokeVirtual(_)) {
                    self.invoke_virtual(member, args)?
                } else {
                    self.invoke_special(member, args)?
                };
                if let Some(value) = result {
                    frame.stack.push(value);
                }
            }
            Insn::If(cond, label) => {
                let value = frame.pop_int()?;
                if cond.test(value, 0) {
                    return Ok(Flow::Jump(*label));
                }
            }
            Insn::IfCmp(cond, label) => {
                let right = frame.pop_int()?;
                let left = frame.pop_int()?;
                if cond.test(left, right) {
                    return Ok(Flow::Jump(*label));
                }
            }
            Insn::Goto(label) => return Ok(Flow::Jump(*label)),
            Insn::Return(None) => return Ok(Flow::Return(None)),
            Insn::Return(Some(_)) => {
                let value = frame.pop()?;
                return Ok(Flow::Return(Some(value)));
            }
            Insn::Throw => {
                let thrown = frame.pop()?;
                let thrown = self.non_null(&thrown)?;
                return Err(Trap::Throw(thrown));
            }
        }
        Ok(Flow::Next)
    }

    fn arith(&mut self, op: ArithOp, left: Value, right: Value, frame: &Frame<'_>) -> Result<Value, Trap> {
        let value = match (left, right) {
            (Value::Int(a), Value::Int(b)) => Value::Int(match op {
                ArithOp::Add => a.wrapping_add(b),
                ArithOp::Sub => a.wrapping_sub(b),
                ArithOp::Mul => a.wrapping_mul(b),
                ArithOp::Div if b == 0 => {
                    return Err(self.throw_new("java/lang/ArithmeticException", "/ by zero"))
                }
                ArithOp::Div => a.wrapping_div(b),
            }),
            (Value::Long(a), Value::Long(b)) => Value::Long(match op {
                ArithOp::Add => a.wrapping_add(b),
                ArithOp::Sub => a.wrapping_sub(b),
                ArithOp::Mul => a.wrapping_mul(b),
                ArithOp::Div if b == 0 => {
                    return Err(self.throw_new("java/lang/ArithmeticException", "/ by zero"))
                }
                ArithOp::Div => a.wrapping_div(b),
            }),
            (Value::Float(a), Value::Float(b)) => Value::Float(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
            }),
            (Value::Double(a), Value::Double(b)) => Value::Double(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
            }),
            (a, b) => {
                return Err(frame.fatal(format!(
                    "arithmetic on mismatched operands {} and {}",
                    a.kind(),
                    b.kind()
                )))
            }
        };
        Ok(value)
    }

    fn non_null(&mut self, value: &Value) -> Result<ObjRef, Trap> {
        match value {
            Value::Ref(obj) => Ok(obj.clone()),
            _ => Err(self.throw_new("java/lang/NullPointerException", "null reference")),
        }
    }

    fn index_out_of_bounds(&mut self, index: i32, len: usize) -> Trap {
        self.throw_new(
            "java/lang/ArrayIndexOutOfBoundsException",
            format!("Index {} out of bounds for length {}", index, len),
        )
    }

    pub(super) fn invoke_static(&mut self, member: &MemberRef, args: Vec<Value>) -> Result<Option<Value>, Trap> {
        self.ensure_initialized(&member.owner)?;
        if let Some(native) = self.native(&member.owner, &member.name, &member.descriptor) {
            return native(self, args);
        }
        match self.find_method(&member.owner, &member.name, &member.descriptor) {
            Some((class, method)) if method.method.has_code() => self.execute(&class, &method, args),
            _ => Err(method_not_found(member)),
        }
    }

    pub(super) fn invoke_special(&mut self, member: &MemberRef, args: Vec<Value>) -> Result<Option<Value>, Trap> {
        if args.first().map_or(true, Value::is_null) {
            return Err(self.throw_new("java/lang/NullPointerException", member.to_string()));
        }
        if let Some(native) = self.native(&member.owner, &member.name, &member.descriptor) {
            return native(self, args);
        }
        match self.find_method(&member.owner, &member.name, &member.descriptor) {
            Some((class, method)) if method.method.has_code() => self.execute(&class, &method, args),
            _ => Err(method_not_found(member)),
        }
    }

    pub(super) fn invoke_virtual(&mut self, member: &MemberRef, args: Vec<Value>) -> Result<Option<Value>, Trap> {
        let Some(runtime_class) = args.first().and_then(Value::class_name) else {
            return Err(self.throw_new("java/lang/NullPointerException", member.to_string()));
        };

        let key = (member.name.clone(), member.descriptor.clone());
        let mut current = Some(runtime_class);
        while let Some(class_name) = current {
            if let Some(class) = self.classes.get(&class_name).cloned() {
                if let Some(method) = class.methods.get(&key).cloned() {
                    if method.method.has_code() {
                        return self.execute(&class, &method, args);
                    }
                }
            }
            if let Some(native) = self.native(&class_name, &member.name, &member.descriptor) {
                return native(self, args);
            }
            current = self.super_of(&class_name);
        }
        Err(method_not_found(member))
    }
}

fn method_not_found(member: &MemberRef) -> Trap {
    Trap::Fatal(HostError::MethodNotFound {
        owner: member.owner.clone(),
        name: member.name.clone(),
        descriptor: member.descriptor.clone(),
    })
}

fn field_not_found(member: &MemberRef) -> Trap {
    Trap::Fatal(HostError::FieldNotFound {
        owner: member.owner.clone(),
        name: member.name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::error::HostError;
    use crate::host::{Host, Value};
    use crate::telemetry::Registry;
    use crate::unit::{
        AccessFlags, ArithOp, ClassBuilder, Cond, Insn, Kind, MethodBuilder, Region, CONSTRUCTOR,
    };

    fn run(mb: MethodBuilder, args: Vec<Value>) -> Result<Option<Value>, HostError> {
        let method = mb.build();
        let (name, desc) = (method.name.clone(), method.descriptor.clone());
        let mut host = Host::new(Arc::new(Registry::new()));
        host.load(ClassBuilder::new("t/T").method(method).build())?;
        host.call_static("t/T", &name, &desc, args)
    }

    #[test]
    fn test_loop_sums_to_n() {
        // sum = 0; while (n > 0) { sum += n; n -= 1 } return sum
        let mut mb = MethodBuilder::new(AccessFlags::STATIC, "sum", "(I)I");
        let (top, done) = (mb.new_label(), mb.new_label());
        mb.locals(2)
            .emit(Insn::iconst(0))
            .emit(Insn::Store(Kind::Int, 1))
            .mark(top)
            .emit(Insn::Load(Kind::Int, 0))
            .emit(Insn::If(Cond::Le, done))
            .emit(Insn::Load(Kind::Int, 1))
            .emit(Insn::Load(Kind::Int, 0))
            .emit(Insn::Arith(ArithOp::Add, Kind::Int))
            .emit(Insn::Store(Kind::Int, 1))
            .emit(Insn::Load(Kind::Int, 0))
            .emit(Insn::iconst(1))
            .emit(Insn::Arith(ArithOp::Sub, Kind::Int))
            .emit(Insn::Store(Kind::Int, 0))
            .emit(Insn::Goto(top))
            .mark(done)
            .emit(Insn::Load(Kind::Int, 1))
            .emit(Insn::Return(Some(Kind::Int)));

        let result = run(mb, vec![Value::Int(4)]).unwrap();
        assert_eq!(result.and_then(|v| v.as_int()), Some(10));
    }

    #[test]
    fn test_long_arguments_take_two_slots() {
        let mut mb = MethodBuilder::new(AccessFlags::STATIC, "add", "(JI)J");
        mb.emit(Insn::Load(Kind::Long, 0))
            .emit(Insn::Const(crate::unit::Constant::Long(1)))
            .emit(Insn::Arith(ArithOp::Add, Kind::Long))
            .emit(Insn::Return(Some(Kind::Long)));
        let result = run(mb, vec![Value::Long(41), Value::Int(9)]).unwrap();
        assert_eq!(result.and_then(|v| v.as_long()), Some(42));
    }

    #[test]
    fn test_division_by_zero_is_catchable() {
        let mut mb = MethodBuilder::new(AccessFlags::STATIC, "safe", "(I)I");
        let (start, end, handler) = (mb.new_label(), mb.new_label(), mb.new_label());
        mb.mark(start)
            .emit(Insn::iconst(10))
            .emit(Insn::Load(Kind::Int, 0))
            .emit(Insn::Arith(ArithOp::Div, Kind::Int))
            .emit(Insn::Return(Some(Kind::Int)))
            .mark(end)
            .mark(handler)
            .emit(Insn::Pop)
            .emit(Insn::iconst(-1))
            .emit(Insn::Return(Some(Kind::Int)))
            .handler(Region {
                start,
                end,
                handler,
                catch_type: Some("java/lang/ArithmeticException".to_string()),
            });
        let result = run(mb, vec![Value::Int(0)]).unwrap();
        assert_eq!(result.and_then(|v| v.as_int()), Some(-1));
    }

    #[test]
    fn test_first_matching_region_wins() {
        let mut mb = MethodBuilder::new(AccessFlags::STATIC, "pick", "()I");
        let (start, end, inner, outer) =
            (mb.new_label(), mb.new_label(), mb.new_label(), mb.new_label());
        mb.mark(start)
            .emit(Insn::New("java/lang/IllegalStateException".to_string()))
            .emit(Insn::Dup)
            .emit(Insn::invoke_special("java/lang/IllegalStateException", CONSTRUCTOR, "()V"))
            .emit(Insn::Throw)
            .mark(end)
            .mark(inner)
            .emit(Insn::Pop)
            .emit(Insn::iconst(1))
            .emit(Insn::Return(Some(Kind::Int)))
            .mark(outer)
            .emit(Insn::Pop)
            .emit(Insn::iconst(2))
            .emit(Insn::Return(Some(Kind::Int)))
            .handler(Region {
                start,
                end,
                handler: inner,
                catch_type: Some("java/lang/IllegalArgumentException".to_string()),
            })
            .handler(Region {
                start,
                end,
                handler: outer,
                catch_type: Some("java/lang/RuntimeException".to_string()),
            });
        let result = run(mb, vec![]).unwrap();
        assert_eq!(result.and_then(|v| v.as_int()), Some(2));
    }

    #[test]
    fn test_uncaught_exception_reports_class_and_message() {
        let mut mb = MethodBuilder::new(AccessFlags::STATIC, "fail", "()V");
        mb.emit(Insn::New("java/lang/IllegalStateException".to_string()))
            .emit(Insn::Dup)
            .emit(Insn::ldc("broken"))
            .emit(Insn::invoke_special(
                "java/lang/IllegalStateException",
                CONSTRUCTOR,
                "(Ljava/lang/String;)V",
            ))
            .emit(Insn::Throw);
        let err = run(mb, vec![]).unwrap_err();
        match err {
            HostError::Uncaught { class, message, .. } => {
                assert_eq!(class, "java/lang/IllegalStateException");
                assert_eq!(message.as_deref(), Some("broken"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unbounded_recursion_is_fatal() {
        let mut mb = MethodBuilder::new(AccessFlags::STATIC, "again", "()V");
        mb.emit(Insn::invoke_static("t/T", "again", "()V"))
            .emit(Insn::Return(None));
        let overflowed = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(move || matches!(run(mb, vec![]), Err(HostError::StackOverflow(_))))
            .unwrap()
            .join()
            .unwrap();
        assert!(overflowed);
    }

    #[test]
    fn test_array_bounds() {
        let mut mb = MethodBuilder::new(AccessFlags::STATIC, "oob", "()V");
        mb.emit(Insn::iconst(1))
            .emit(Insn::NewArray("java/lang/String".to_string()))
            .emit(Insn::iconst(3))
            .emit(Insn::ldc("x"))
            .emit(Insn::ArrayStore)
            .emit(Insn::Return(None));
        let err = run(mb, vec![]).unwrap_err();
        assert!(matches!(
            err,
            HostError::Uncaught { ref class, .. } if class == "java/lang/ArrayIndexOutOfBoundsException"
        ));
    }
}
