//! The bytecode virtual machine.
//!
//! Stack machine with a value stack and a frame stack. Every executed
//! opcode decrements the world's instruction budget; when it runs out the
//! VM returns itself as a suspended value, and the scheduler resumes it on
//! a later tick with a fresh budget. Errors never unwind: failed lookups
//! push null and bump the error register, and the only panics left are
//! genuine interpreter-invariant violations (e.g. popping an empty stack).

use std::rc::Rc;

use log::debug;
use smallvec::SmallVec;

use crate::{
    builtins::{Builtin, BuiltinOutcome},
    bytecode::{Code, Opcode},
    error::ErrorCode,
    handlers::resolve_handler,
    heap::ObjId,
    intern::StringId,
    unit::CompiledConstant,
    value::{BitwiseOp, HandlerRef, Value},
    world::{World, coerce_declared, wrap_bits},
};

/// Maximum call-frame depth (interpreter safety net, not script-visible).
const MAX_FRAMES: usize = 64;

type Args = SmallVec<[Value; 10]>;

#[derive(Debug)]
struct Frame {
    code: Rc<Code>,
    ip: usize,
    this: ObjId,
    args: Args,
    locals: Vec<Value>,
    /// Replaces the frame's return value when set (used by `criar`).
    result_override: Option<Value>,
}

impl Frame {
    fn new(code: Rc<Code>, this: ObjId, args: Args) -> Self {
        let locals = vec![Value::Null; usize::from(code.num_locals())];
        Self {
            code,
            ip: 0,
            this,
            args,
            locals,
            result_override: None,
        }
    }
}

/// Result of driving a VM until it cannot continue.
pub enum Invocation {
    /// The top-level frame returned.
    Done(Value),
    /// Instruction budget exhausted; resume with [`Vm::resume`].
    Suspended(Box<Vm>),
    /// The program requested termination.
    Terminated,
}

/// Invokes `func` on `this`. Returns `None` when the function does not
/// exist anywhere in the receiver's hierarchy (callers dispatching events
/// ignore that case silently).
pub fn invoke(world: &mut World, this: ObjId, func: StringId, args: &[Value]) -> Option<Invocation> {
    let unit = Rc::clone(&world.heap.get(this)?.unit);
    let (_, f) = world.registry.resolve_func(&unit, func)?;
    let mut vm = Vm::new(true);
    vm.frames.push(Frame::new(f.code, this, args.iter().cloned().collect()));
    Some(vm.run(world))
}

/// Runs an expression thunk (initialiser, expression constant) to
/// completion. Thunks never suspend; the budget still counts down.
pub fn run_thunk(world: &mut World, this: ObjId, code: &Rc<Code>, args: &[Value]) -> Value {
    let mut vm = Vm::new(false);
    vm.frames
        .push(Frame::new(Rc::clone(code), this, args.iter().cloned().collect()));
    match vm.run(world) {
        Invocation::Done(value) => value,
        Invocation::Suspended(_) | Invocation::Terminated => Value::Null,
    }
}

#[derive(Debug)]
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<Frame>,
    /// Whether budget exhaustion suspends (top-level invocations) or is
    /// ignored (thunks).
    suspendable: bool,
}

macro_rules! fetch_byte {
    ($frame:expr) => {{
        let byte = $frame.code.bytecode()[$frame.ip];
        $frame.ip += 1;
        byte
    }};
}

macro_rules! fetch_u16 {
    ($frame:expr) => {{
        let lo = $frame.code.bytecode()[$frame.ip];
        let hi = $frame.code.bytecode()[$frame.ip + 1];
        $frame.ip += 2;
        u16::from_le_bytes([lo, hi])
    }};
}

macro_rules! fetch_i16 {
    ($frame:expr) => {{
        let lo = $frame.code.bytecode()[$frame.ip];
        let hi = $frame.code.bytecode()[$frame.ip + 1];
        $frame.ip += 2;
        i16::from_le_bytes([lo, hi])
    }};
}

impl Vm {
    fn new(suspendable: bool) -> Self {
        Self {
            stack: Vec::with_capacity(16),
            frames: Vec::with_capacity(4),
            suspendable,
        }
    }

    /// Continues a suspended invocation.
    pub fn resume(mut self: Box<Self>, world: &mut World) -> Invocation {
        self.run(world)
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack underflow: corrupted bytecode")
    }

    fn pop_args(&mut self, argc: u8) -> Args {
        let at = self.stack.len() - usize::from(argc);
        self.stack.drain(at..).collect()
    }

    fn frame(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("frame stack underflow")
    }

    /// Pops the finished frame, pushing its (possibly overridden) return
    /// value onto the caller's stack. Returns the value when this was the
    /// top-level frame.
    fn finish_frame(&mut self, mut value: Value) -> Option<Value> {
        let frame = self.frames.pop().expect("returning without a frame");
        if let Some(replacement) = frame.result_override {
            value = replacement;
        }
        if self.frames.is_empty() {
            Some(value)
        } else {
            self.push(value);
            None
        }
    }

    fn push_frame(
        &mut self,
        world: &mut World,
        code: Rc<Code>,
        this: ObjId,
        args: Args,
        result_override: Option<Value>,
    ) {
        if self.frames.len() >= MAX_FRAMES {
            debug!("call depth limit reached, call yields null");
            world.note_error(ErrorCode::LookupMiss, this);
            self.push(Value::Null);
            return;
        }
        let mut frame = Frame::new(code, this, args);
        frame.result_override = result_override;
        self.frames.push(frame);
    }

    /// Resolves and calls `func` on `target`'s hierarchy; pushes null on a
    /// miss.
    fn call_on(&mut self, world: &mut World, target: ObjId, func: StringId, args: Args) {
        let resolved = world
            .heap
            .get(target)
            .map(|o| Rc::clone(&o.unit))
            .and_then(|unit| world.registry.resolve_func(&unit, func));
        match resolved {
            Some((_, f)) => self.push_frame(world, f.code, target, args, None),
            None => {
                world.note_error(ErrorCode::LookupMiss, target);
                self.push(Value::Null);
            }
        }
    }

    fn run(&mut self, world: &mut World) -> Invocation {
        loop {
            // cooperative throttle
            if world.budget <= 0 && self.suspendable {
                world.note_error(ErrorCode::BudgetExhausted, self.frame().this);
                return Invocation::Suspended(Box::new(std::mem::replace(
                    self,
                    Vm::new(true),
                )));
            }
            world.budget -= 1;
            world.instructions_executed += 1;

            let frame = self.frames.last_mut().expect("running without a frame");
            if frame.ip >= frame.code.bytecode().len() {
                // fell off the end (defensive; compiled code always returns)
                match self.finish_frame(Value::Null) {
                    Some(value) => return Invocation::Done(value),
                    None => continue,
                }
            }
            let op = Opcode::from_repr(fetch_byte!(frame)).expect("invalid opcode byte");

            match op {
                Opcode::LoadNull => self.push(Value::Null),
                Opcode::LoadZero => self.push(Value::Int(0)),
                Opcode::LoadOne => self.push(Value::Int(1)),
                Opcode::LoadThis => {
                    let this = frame.this;
                    self.push(Value::Obj(this));
                }
                Opcode::LoadArgCount => {
                    let n = frame.args.len() as i64;
                    self.push(Value::Int(n));
                }
                Opcode::LoadConst => {
                    let idx = fetch_u16!(frame);
                    let value = frame.code.consts()[usize::from(idx)].to_value();
                    self.push(value);
                }
                Opcode::LoadArg => {
                    let n = usize::from(fetch_byte!(frame));
                    let value = frame.args.get(n).cloned().unwrap_or(Value::Null);
                    self.push(value);
                }

                Opcode::Pop => {
                    self.pop();
                }
                Opcode::Dup => {
                    let top = self.stack.last().cloned().expect("dup on empty stack");
                    self.push(top);
                }
                Opcode::Swap => {
                    let len = self.stack.len();
                    self.stack.swap(len - 1, len - 2);
                }

                Opcode::LoadLocal => {
                    let slot = usize::from(fetch_byte!(frame));
                    let value = frame.locals[slot].clone();
                    self.push(value);
                }
                Opcode::StoreLocal => {
                    let slot = usize::from(fetch_byte!(frame));
                    let value = self.pop();
                    self.frame().locals[slot] = value;
                }

                Opcode::LoadField => {
                    let name = StringId::from_index(fetch_u16!(frame));
                    let this = frame.this;
                    let args: Args = frame.args.clone();
                    match field_get(world, this, name, &args) {
                        Some(value) => self.push(value),
                        None => {
                            world.note_error(ErrorCode::LookupMiss, this);
                            self.push(Value::Null);
                        }
                    }
                }
                Opcode::StoreField => {
                    let name = StringId::from_index(fetch_u16!(frame));
                    let this = frame.this;
                    let value = self.pop();
                    field_set(world, this, name, value);
                }
                Opcode::LoadMember => {
                    let name = StringId::from_index(fetch_u16!(frame));
                    let flags = fetch_byte!(frame);
                    let args: Args = frame.args.clone();
                    let recv = self.pop();
                    let value = member_get(world, &recv, name, &args, flags & 1 != 0);
                    self.push(value);
                }
                Opcode::StoreMember => {
                    let name = StringId::from_index(fetch_u16!(frame));
                    let value = self.pop();
                    let recv = self.pop();
                    member_set(world, &recv, name, value);
                }
                Opcode::LoadMemberDyn => {
                    let flags = fetch_byte!(frame);
                    let args: Args = frame.args.clone();
                    let name_text = self.pop().to_text();
                    let recv = self.pop();
                    match world.interns.get_name(&name_text) {
                        Some(name) => {
                            let value = member_get(world, &recv, name, &args, flags & 1 != 0);
                            self.push(value);
                        }
                        None => {
                            // a name never interned cannot be declared anywhere
                            world.note_error(ErrorCode::LookupMiss, self.frame().this);
                            self.push(Value::Null);
                        }
                    }
                }
                Opcode::StoreMemberDyn => {
                    let value = self.pop();
                    let name_text = self.pop().to_text();
                    let recv = self.pop();
                    let name = world.interns.name(&name_text);
                    member_set(world, &recv, name, value);
                }
                Opcode::LoadClassMember => {
                    let class = StringId::from_index(fetch_u16!(frame));
                    let member = StringId::from_index(fetch_u16!(frame));
                    let this = frame.this;
                    let args: Args = frame.args.clone();
                    let value = class_member_get(world, this, class, member, &args);
                    self.push(value);
                }
                Opcode::StoreClassMember => {
                    let class = StringId::from_index(fetch_u16!(frame));
                    let member = StringId::from_index(fetch_u16!(frame));
                    let value = self.pop();
                    class_member_set(world, self.frame().this, class, member, value);
                }
                Opcode::LoadClassMemberDyn => {
                    let member = StringId::from_index(fetch_u16!(frame));
                    let this = frame.this;
                    let args: Args = frame.args.clone();
                    let class_text = self.pop().to_text();
                    let value = match world.interns.get_name(&class_text) {
                        Some(class) => class_member_get(world, this, class, member, &args),
                        None => {
                            world.note_error(ErrorCode::LookupMiss, this);
                            Value::Null
                        }
                    };
                    self.push(value);
                }
                Opcode::StoreClassMemberDyn => {
                    let member = StringId::from_index(fetch_u16!(frame));
                    let value = self.pop();
                    let class_text = self.pop().to_text();
                    let this = self.frame().this;
                    match world.interns.get_name(&class_text) {
                        Some(class) => class_member_set(world, this, class, member, value),
                        None => world.note_error(ErrorCode::LookupMiss, this),
                    }
                }
                Opcode::LoadIndexed => {
                    let name = self.pop().to_text();
                    let value = world.index_lookup(&name).map_or(Value::Null, Value::Obj);
                    self.push(value);
                }
                Opcode::BuildName => {
                    let count = usize::from(fetch_byte!(frame));
                    let at = self.stack.len() - count;
                    let mut name = String::new();
                    for piece in self.stack.drain(at..) {
                        name.push_str(&piece.to_text());
                    }
                    self.push(Value::from(name.to_ascii_lowercase()));
                }
                Opcode::BuildArray => {
                    let count = usize::from(fetch_byte!(frame));
                    let at = self.stack.len() - count;
                    let items: Vec<Value> = self.stack.drain(at..).collect();
                    self.push(Value::Array(items));
                }

                Opcode::IndexGet => {
                    let index = self.pop().to_i64();
                    let recv = self.pop();
                    let value = match &recv {
                        Value::Str(s) => usize::try_from(index)
                            .ok()
                            .and_then(|i| s.chars().nth(i))
                            .map_or(Value::Null, |c| Value::from(c.to_string())),
                        _ => recv.index_get(index),
                    };
                    self.push(value);
                }
                Opcode::IndexStore => {
                    let value = self.pop();
                    let index = self.pop().to_i64();
                    let mut container = self.pop();
                    container.index_set(index, value);
                    self.push(container);
                }
                Opcode::SeqLen => {
                    let value = self.pop();
                    let len = value.seq_len().unwrap_or(0) as i64;
                    self.push(Value::Int(len));
                }

                Opcode::Add => self.binary(Value::add),
                Opcode::Sub => self.binary(Value::sub),
                Opcode::Mul => self.binary(Value::mul),
                Opcode::Div => self.binary(Value::div),
                Opcode::Rem => self.binary(Value::rem),
                Opcode::Neg => {
                    let v = self.pop();
                    self.push(v.neg());
                }
                Opcode::Not => {
                    let v = self.pop();
                    self.push(v.not());
                }
                Opcode::BitNot => {
                    let v = self.pop();
                    self.push(v.bit_not());
                }
                Opcode::BitAnd => self.binary(|a, b| a.bitwise(BitwiseOp::And, b)),
                Opcode::BitOr => self.binary(|a, b| a.bitwise(BitwiseOp::Or, b)),
                Opcode::BitXor => self.binary(|a, b| a.bitwise(BitwiseOp::Xor, b)),
                Opcode::Shl => self.binary(Value::shl),
                Opcode::Shr => self.binary(Value::shr),
                Opcode::Eq => self.binary(|a, b| Value::from(a.eq_default(b))),
                Opcode::Ne => self.binary(|a, b| Value::from(!a.eq_default(b))),
                Opcode::EqStrict => self.binary(|a, b| Value::from(a.eq_strict(b))),
                Opcode::NeStrict => self.binary(|a, b| Value::from(!a.eq_strict(b))),
                Opcode::Lt => self.binary(|a, b| Value::from(a.compare(b).is_lt())),
                Opcode::Le => self.binary(|a, b| Value::from(a.compare(b).is_le())),
                Opcode::Gt => self.binary(|a, b| Value::from(a.compare(b).is_gt())),
                Opcode::Ge => self.binary(|a, b| Value::from(a.compare(b).is_ge())),

                Opcode::CoerceInt => {
                    let bits = fetch_byte!(frame);
                    let v = self.pop().to_i64();
                    self.push(Value::Int(wrap_bits(v, bits)));
                }
                Opcode::CoerceReal => {
                    let v = self.pop().to_f64();
                    self.push(Value::Double(v));
                }
                Opcode::CoerceTxt => {
                    let cap = usize::from(fetch_u16!(frame));
                    let text = self.pop().to_text();
                    let value = if text.chars().count() <= cap {
                        Value::Str(text)
                    } else {
                        Value::from(text.chars().take(cap).collect::<String>())
                    };
                    self.push(value);
                }

                Opcode::Jump => {
                    let offset = fetch_i16!(frame);
                    jump(frame, offset);
                }
                Opcode::JumpIfFalse => {
                    let offset = fetch_i16!(frame);
                    if !self.pop().truthy() {
                        jump(self.frame(), offset);
                    }
                }
                Opcode::JumpIfTrue => {
                    let offset = fetch_i16!(frame);
                    if self.pop().truthy() {
                        jump(self.frame(), offset);
                    }
                }
                Opcode::JumpIfFalsePeek => {
                    let offset = fetch_i16!(frame);
                    if !self.stack.last().expect("peek on empty stack").truthy() {
                        jump(self.frame(), offset);
                    }
                }
                Opcode::JumpIfTruePeek => {
                    let offset = fetch_i16!(frame);
                    if self.stack.last().expect("peek on empty stack").truthy() {
                        jump(self.frame(), offset);
                    }
                }
                Opcode::JumpIfNotNullPeek => {
                    let offset = fetch_i16!(frame);
                    let is_null = matches!(self.stack.last(), Some(Value::Null));
                    if !is_null {
                        jump(self.frame(), offset);
                    }
                }

                Opcode::CallVirtual => {
                    let name = StringId::from_index(fetch_u16!(frame));
                    let argc = fetch_byte!(frame);
                    let this = frame.this;
                    let args = self.pop_args(argc);
                    self.call_on(world, this, name, args);
                }
                Opcode::CallMember => {
                    let name = StringId::from_index(fetch_u16!(frame));
                    let argc = fetch_byte!(frame);
                    let flags = fetch_byte!(frame);
                    let args = self.pop_args(argc);
                    let recv = self.pop();
                    self.dispatch_member_call(world, &recv, name, args, flags & 1 != 0);
                }
                Opcode::CallMemberDyn => {
                    let argc = fetch_byte!(frame);
                    let args = self.pop_args(argc);
                    let name_text = self.pop().to_text();
                    let recv = self.pop();
                    let name = world.interns.name(&name_text);
                    self.dispatch_member_call(world, &recv, name, args, false);
                }
                Opcode::CallClass => {
                    let class = StringId::from_index(fetch_u16!(frame));
                    let member = StringId::from_index(fetch_u16!(frame));
                    let argc = fetch_byte!(frame);
                    let this = frame.this;
                    let args = self.pop_args(argc);
                    self.call_class(world, this, class, member, args);
                }
                Opcode::CallClassDyn => {
                    let member = StringId::from_index(fetch_u16!(frame));
                    let argc = fetch_byte!(frame);
                    let this = frame.this;
                    let args = self.pop_args(argc);
                    let class_text = self.pop().to_text();
                    match world.interns.get_name(&class_text) {
                        Some(class) => self.call_class(world, this, class, member, args),
                        None => {
                            world.note_error(ErrorCode::LookupMiss, this);
                            self.push(Value::Null);
                        }
                    }
                }
                Opcode::CallBuiltin => {
                    let id = fetch_u16!(frame);
                    let argc = fetch_byte!(frame);
                    let this = frame.this;
                    let args = self.pop_args(argc);
                    let builtin = Builtin::from_id(id).expect("invalid builtin id in bytecode");
                    match builtin.call(world, this, &args) {
                        BuiltinOutcome::Value(value) => self.push(value),
                        BuiltinOutcome::CallFunc {
                            this: target,
                            name,
                            args,
                            class,
                            result_override,
                        } => {
                            let unit = match class {
                                Some(class) => world.registry.get(class).cloned(),
                                None => world.heap.get(target).map(|o| Rc::clone(&o.unit)),
                            };
                            let resolved =
                                unit.and_then(|unit| world.registry.resolve_func(&unit, name));
                            match resolved {
                                Some((_, f)) => {
                                    self.push_frame(world, f.code, target, args, result_override);
                                }
                                None => {
                                    // no such function: the override (if
                                    // any) is the result
                                    self.push(result_override.unwrap_or(Value::Null));
                                }
                            }
                        }
                        BuiltinOutcome::Terminate => {
                            world.terminate = true;
                            return Invocation::Terminated;
                        }
                    }
                }

                Opcode::Ret => {
                    let value = self.pop();
                    if let Some(out) = self.finish_frame(value) {
                        return Invocation::Done(out);
                    }
                }
                Opcode::RetNull => {
                    if let Some(out) = self.finish_frame(Value::Null) {
                        return Invocation::Done(out);
                    }
                }
                Opcode::RetCond => {
                    let cond = self.pop();
                    let value = self.pop();
                    if cond.truthy() {
                        if let Some(out) = self.finish_frame(value) {
                            return Invocation::Done(out);
                        }
                    }
                }
                Opcode::Terminate => {
                    world.terminate = true;
                    return Invocation::Terminated;
                }
            }
        }
    }

    fn binary(&mut self, apply: impl FnOnce(&Value, &Value) -> Value) {
        let rhs = self.pop();
        let lhs = self.pop();
        self.push(apply(&lhs, &rhs));
    }

    fn dispatch_member_call(
        &mut self,
        world: &mut World,
        recv: &Value,
        name: StringId,
        args: Args,
        countdown: bool,
    ) {
        match recv {
            Value::Obj(id) => {
                // a handler field on the receiver shadows functions;
                // "calling" the field is a property read
                let has_handler = world.heap.get(*id).is_some_and(|o| o.handlers.contains_key(&name));
                if has_handler {
                    let value = member_get(world, recv, name, &[], countdown);
                    self.push(value);
                    return;
                }
                self.call_on(world, *id, name, args);
            }
            Value::Handler(_) => {
                let Some(handler) = resolve_handler(world, recv) else {
                    world.note_error(ErrorCode::LookupMiss, self.frame().this);
                    self.push(Value::Null);
                    return;
                };
                let name_text = world.interns.get(name).to_string();
                match handler.op(world, &name_text, &args, countdown) {
                    Some(value) => self.push(value),
                    None => {
                        let this = self.frame().this;
                        world.note_error(ErrorCode::LookupMiss, this);
                        self.push(Value::Null);
                    }
                }
            }
            _ => {
                let this = self.frame().this;
                world.note_error(ErrorCode::LookupMiss, this);
                self.push(Value::Null);
            }
        }
    }

    fn call_class(
        &mut self,
        world: &mut World,
        this: ObjId,
        class: StringId,
        member: StringId,
        args: Args,
    ) {
        let resolved = world
            .registry
            .get(class)
            .cloned()
            .and_then(|unit| world.registry.resolve_func(&unit, member));
        match resolved {
            Some((_, f)) => self.push_frame(world, f.code, this, args, None),
            None => {
                world.note_error(ErrorCode::LookupMiss, this);
                self.push(Value::Null);
            }
        }
    }
}

fn jump(frame: &mut Frame, offset: i16) {
    let ip = i64::try_from(frame.ip).expect("ip fits i64") + i64::from(offset);
    frame.ip = usize::try_from(ip).expect("jump out of code range");
}

// =========================================================================
// Field / member resolution
// =========================================================================

/// Field lookup on `this`: per-instance fields, handler fields, common
/// variables along the hierarchy, constants along the hierarchy.
pub(crate) fn field_get(
    world: &mut World,
    this: ObjId,
    name: StringId,
    args: &[Value],
) -> Option<Value> {
    let obj = world.heap.get(this)?;
    if let Some(value) = obj.fields.get(&name) {
        return Some(value.clone());
    }
    if let Some(handler) = obj.handlers.get(&name) {
        return Some(handler.read_value().unwrap_or(Value::Handler(HandlerRef {
            owner: this,
            field: name,
        })));
    }
    let unit = Rc::clone(&obj.unit);
    for &cls in &unit.linear {
        if let Some(value) = world.commons.get(&(cls, name)) {
            return Some(value.clone());
        }
    }
    if let Some((_, constant)) = world.registry.resolve_const(&unit, name) {
        return Some(eval_constant(world, this, &constant, args));
    }
    None
}

pub(crate) fn eval_constant(
    world: &mut World,
    this: ObjId,
    constant: &CompiledConstant,
    args: &[Value],
) -> Value {
    match constant {
        CompiledConstant::Int(v) => Value::Int(*v),
        CompiledConstant::Double(v) => Value::Double(*v),
        CompiledConstant::Str(s) => Value::Str(Rc::clone(s)),
        // re-evaluated on every access under the current receiver and args
        CompiledConstant::Expr(code) => run_thunk(world, this, code, args),
    }
}

/// Field store on `this`. Declared variables coerce to their declared
/// type; handler fields route to value assignment or same-kind sharing;
/// stores to unknown names are recorded as lookup misses.
pub(crate) fn field_set(world: &mut World, this: ObjId, name: StringId, value: Value) {
    let Some(obj) = world.heap.get(this) else {
        world.note_error(ErrorCode::LookupMiss, this);
        return;
    };
    if let Some(handler) = obj.handlers.get(&name).cloned() {
        if let Some(source) = resolve_handler(world, &value) {
            if source.kind() == handler.kind() {
                source.rebind(this, name);
                if let Some(obj) = world.heap.get_mut(this) {
                    obj.handlers.insert(name, source);
                }
                return;
            }
        }
        handler.assign(world, value);
        return;
    }
    let unit = Rc::clone(&obj.unit);
    match world.registry.resolve_var(&unit, name) {
        Some((defining, var)) => {
            let coerced = coerce_declared(&var, value);
            if var.common {
                world.commons.insert((defining, name), coerced);
            } else if let Some(obj) = world.heap.get_mut(this) {
                obj.fields.insert(name, coerced);
            }
        }
        None => world.note_error(ErrorCode::LookupMiss, this),
    }
}

/// `recv.name` as a value.
fn member_get(
    world: &mut World,
    recv: &Value,
    name: StringId,
    args: &[Value],
    countdown: bool,
) -> Value {
    match recv {
        Value::Obj(id) => match field_get(world, *id, name, args) {
            Some(value) => value,
            None => {
                world.note_error(ErrorCode::LookupMiss, *id);
                Value::Null
            }
        },
        Value::Handler(href) => {
            let Some(handler) = resolve_handler(world, recv) else {
                world.note_error(ErrorCode::LookupMiss, href.owner);
                return Value::Null;
            };
            let name_text = world.interns.get(name).to_string();
            match handler.op(world, &name_text, &[], countdown) {
                Some(value) => value,
                None => {
                    world.note_error(ErrorCode::LookupMiss, href.owner);
                    Value::Null
                }
            }
        }
        _ => Value::Null,
    }
}

fn member_set(world: &mut World, recv: &Value, name: StringId, value: Value) {
    match recv {
        Value::Obj(id) => field_set(world, *id, name, value),
        Value::Handler(href) => {
            let Some(handler) = resolve_handler(world, recv) else {
                world.note_error(ErrorCode::LookupMiss, href.owner);
                return;
            };
            let name_text = world.interns.get(name).to_string();
            if !handler.member_set(world, &name_text, value) {
                world.note_error(ErrorCode::LookupMiss, href.owner);
            }
        }
        _ => {}
    }
}

/// `Classe:membro` read: constants, then common variables, resolved in
/// the named class's hierarchy, evaluated in the current object's context.
fn class_member_get(
    world: &mut World,
    this: ObjId,
    class: StringId,
    member: StringId,
    args: &[Value],
) -> Value {
    let Some(unit) = world.registry.get(class).cloned() else {
        world.note_error(ErrorCode::LookupMiss, this);
        return Value::Null;
    };
    if let Some((_, constant)) = world.registry.resolve_const(&unit, member) {
        return eval_constant(world, this, &constant, args);
    }
    for &cls in &unit.linear {
        if let Some(value) = world.commons.get(&(cls, member)) {
            return value.clone();
        }
    }
    world.note_error(ErrorCode::LookupMiss, this);
    Value::Null
}

/// `Classe:membro = v` — only common variables are addressable this way.
fn class_member_set(world: &mut World, this: ObjId, class: StringId, member: StringId, value: Value) {
    let Some(unit) = world.registry.get(class).cloned() else {
        world.note_error(ErrorCode::LookupMiss, this);
        return;
    };
    if let Some((defining, var)) = world.registry.resolve_var(&unit, member) {
        if var.common {
            world.commons.insert((defining, member), coerce_declared(&var, value));
            return;
        }
    }
    world.note_error(ErrorCode::LookupMiss, this);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::compile_program, config::Config, parse::parse_source, registry::Registry,
        sink::CollectSink,
    };

    /// Compiles source, installs it, and returns the world.
    fn world_from(src: &str) -> World {
        let classes = parse_source("test.int", src).expect("parse failure");
        let mut world = World::new(Config::default());
        world.sink = Box::new(CollectSink::new());
        let (units, diags) = compile_program(&classes, &mut world.interns);
        assert!(diags.is_clean(), "compile diagnostics: {diags:?}");
        world.install(Registry::new(units));
        world
    }

    fn call(world: &mut World, class: &str, func: &str, args: &[Value]) -> Value {
        let class_id = world.interns.get_name(class).expect("class exists");
        let this = world.create_object(class_id).expect("object created");
        let func_id = world.interns.get_name(func).expect("func exists");
        match invoke(world, this, func_id, args) {
            Some(Invocation::Done(value)) => value,
            other => panic!("unexpected invocation outcome: {:?}", outcome_name(&other)),
        }
    }

    fn outcome_name(o: &Option<Invocation>) -> &'static str {
        match o {
            Some(Invocation::Done(_)) => "done",
            Some(Invocation::Suspended(_)) => "suspended",
            Some(Invocation::Terminated) => "terminated",
            None => "missing function",
        }
    }

    #[test]
    fn arithmetic_and_return() {
        let mut world = world_from("classe m\nfunc f\n  ret arg0 * 2 + 1\n");
        let out = call(&mut world, "m", "f", &[Value::Int(20)]);
        assert!(matches!(out, Value::Int(41)));
    }

    #[test]
    fn conditional_return_continues_when_false() {
        let mut world = world_from("classe m\nfunc f\n  ret arg0, 1\n  ret 2\n");
        assert!(matches!(call(&mut world, "m", "f", &[Value::Int(1)]), Value::Int(1)));
        assert!(matches!(call(&mut world, "m", "f", &[Value::Int(0)]), Value::Int(2)));
    }

    #[test]
    fn fields_persist_between_calls() {
        let src = "classe m\nint32 soma\nfunc add\n  soma += arg0\n  ret soma\n";
        let mut world = world_from(src);
        let class_id = world.interns.get_name("m").unwrap();
        let this = world.create_object(class_id).unwrap();
        let add = world.interns.get_name("add").unwrap();
        for expect in [3, 6] {
            match invoke(&mut world, this, add, &[Value::Int(3)]) {
                Some(Invocation::Done(Value::Int(v))) => assert_eq!(v, expect),
                other => panic!("unexpected: {}", outcome_name(&other)),
            }
        }
    }

    #[test]
    fn int_width_wraps_on_field_store() {
        let src = "classe m\nint8 pequeno\nfunc f\n  pequeno = 200\n  ret pequeno\n";
        let mut world = world_from(src);
        let out = call(&mut world, "m", "f", &[]);
        assert!(matches!(out, Value::Int(-56)));
    }

    #[test]
    fn txt_cap_truncates_on_field_store() {
        let src = "classe m\ntxt3 nome\nfunc f\n  nome = \"abcdef\"\n  ret nome\n";
        let mut world = world_from(src);
        let out = call(&mut world, "m", "f", &[]);
        assert_eq!(&*out.to_text(), "abc");
    }

    #[test]
    fn virtual_dispatch_uses_most_derived() {
        let src = "classe a\nfunc f\n  ret 1\nclasse b\nherda a\nfunc f\n  ret 2\nclasse c\nherda b\nfunc chama\n  ret f()\n";
        let mut world = world_from(src);
        let out = call(&mut world, "c", "chama", &[]);
        assert!(matches!(out, Value::Int(2)));
    }

    #[test]
    fn inherited_function_executes_base_definition() {
        let src = "classe a\nfunc soma\n  ret arg0 + arg1\nclasse b\nherda a\nfunc usa\n  ret soma(2, 3)\n";
        let mut world = world_from(src);
        let out = call(&mut world, "b", "usa", &[]);
        assert!(matches!(out, Value::Int(5)));
    }

    #[test]
    fn while_loop_counts() {
        let src = "classe m\nfunc f\n  int32 i = 0\n  int32 soma = 0\n  enquanto i < 5\n    soma += i\n    i++\n  efim\n  ret soma\n";
        let mut world = world_from(src);
        assert!(matches!(call(&mut world, "m", "f", &[]), Value::Int(10)));
    }

    #[test]
    fn for_loop_with_break_and_continue() {
        let src = "classe m\nfunc f\n  int32 soma = 0\n  int32 i\n  epara i = 0; i < 10; i++\n    continuar , i % 2\n    sair , i > 6\n    soma += i\n  efim\n  ret soma\n";
        let mut world = world_from(src);
        // adds 0,2,4,6 then breaks at 8
        assert!(matches!(call(&mut world, "m", "f", &[]), Value::Int(12)));
    }

    #[test]
    fn foreach_binds_elements() {
        let src = "classe m\nfunc f\n  int32 soma = 0\n  paracada item em [10, 20, 30]\n    soma += item\n  efim\n  ret soma\n";
        let mut world = world_from(src);
        assert!(matches!(call(&mut world, "m", "f", &[]), Value::Int(60)));
    }

    #[test]
    fn switch_selects_matching_arm() {
        let src = "classe m\nfunc f\n  casovar arg0\n  caso 1, 2\n    ret 10\n  caso 3\n    ret 30\n  padrao\n    ret -1\n  efim\n";
        let mut world = world_from(src);
        assert!(matches!(call(&mut world, "m", "f", &[Value::Int(2)]), Value::Int(10)));
        assert!(matches!(call(&mut world, "m", "f", &[Value::Int(3)]), Value::Int(30)));
        assert!(matches!(call(&mut world, "m", "f", &[Value::Int(9)]), Value::Int(-1)));
    }

    #[test]
    fn ternary_and_coalesce() {
        let src = "classe m\nfunc f\n  ret arg0 ? 1 : 2\nfunc g\n  ret arg0 ?? 7\n";
        let mut world = world_from(src);
        assert!(matches!(call(&mut world, "m", "f", &[Value::Int(5)]), Value::Int(1)));
        assert!(matches!(call(&mut world, "m", "f", &[Value::Int(0)]), Value::Int(2)));
        assert!(matches!(call(&mut world, "m", "g", &[Value::Null]), Value::Int(7)));
        assert!(matches!(call(&mut world, "m", "g", &[Value::Int(0)]), Value::Int(0)));
    }

    #[test]
    fn array_literals_and_indexing() {
        let src = "classe m\nfunc f\n  int32 v.4\n  v[2] = 9\n  ret v[2] + v[0]\n";
        let mut world = world_from(src);
        assert!(matches!(call(&mut world, "m", "f", &[]), Value::Int(9)));
    }

    #[test]
    fn expression_constant_sees_current_args() {
        let src = "classe m\nconst dobro = arg0 * 2\nfunc f\n  ret dobro\n";
        let mut world = world_from(src);
        assert!(matches!(call(&mut world, "m", "f", &[Value::Int(21)]), Value::Int(42)));
    }

    #[test]
    fn common_variables_are_shared_per_class() {
        let src = "classe m\ncomum int32 contador\nfunc inc\n  contador += 1\n  ret contador\n";
        let mut world = world_from(src);
        let class_id = world.interns.get_name("m").unwrap();
        let a = world.create_object(class_id).unwrap();
        let b = world.create_object(class_id).unwrap();
        let inc = world.interns.get_name("inc").unwrap();
        assert!(matches!(invoke(&mut world, a, inc, &[]), Some(Invocation::Done(Value::Int(1)))));
        assert!(matches!(invoke(&mut world, b, inc, &[]), Some(Invocation::Done(Value::Int(2)))));
    }

    #[test]
    fn unknown_name_reads_null_and_records_miss() {
        let src = "classe m\nfunc f\n  ret fantasma\n";
        let mut world = world_from(src);
        let out = call(&mut world, "m", "f", &[]);
        assert!(matches!(out, Value::Null));
        assert_eq!(world.last_error, ErrorCode::LookupMiss);
    }

    #[test]
    fn budget_exhaustion_suspends_and_resumes() {
        let src = "classe m\nfunc f\n  int32 i = 0\n  enquanto i < 1000\n    i++\n  efim\n  ret i\n";
        let mut world = world_from(src);
        world.config.int.exec_budget = 500;
        world.reset_budget();
        let class_id = world.interns.get_name("m").unwrap();
        let this = world.create_object(class_id).unwrap();
        let f = world.interns.get_name("f").unwrap();
        let mut outcome = invoke(&mut world, this, f, &[]).expect("function exists");
        let mut resumes = 0;
        loop {
            match outcome {
                Invocation::Done(value) => {
                    assert!(matches!(value, Value::Int(1000)));
                    break;
                }
                Invocation::Suspended(vm) => {
                    resumes += 1;
                    assert!(resumes < 100, "runaway suspension");
                    world.reset_budget();
                    outcome = vm.resume(&mut world);
                }
                Invocation::Terminated => panic!("unexpected termination"),
            }
        }
        assert!(resumes > 0, "budget of 500 must suspend at least once");
        assert_eq!(world.last_error, ErrorCode::BudgetExhausted);
    }

    #[test]
    fn timer_field_reads_and_assigns_through_handler() {
        let src = "classe m\ninttempo t\nfunc arma\n  t = 30\n  ret t\n";
        let mut world = world_from(src);
        let out = call(&mut world, "m", "arma", &[]);
        assert!(matches!(out, Value::Int(30)));
    }

    #[test]
    fn handler_member_call_through_field() {
        let src = "classe m\ndatahora d\nfunc f\n  d.ano = 2024\n  d.mes = 2\n  d.dia = 28\n  d.maisdia\n  d.maisdia\n  ret d.mes * 100 + d.dia\n";
        let mut world = world_from(src);
        let out = call(&mut world, "m", "f", &[]);
        assert!(matches!(out, Value::Int(301)));
    }

    #[test]
    fn criar_runs_inicializar_and_returns_the_object() {
        let src = "classe filho\nint32 pronto\nfunc inicializar\n  pronto = 7\nclasse m\nfunc f\n  ret criar(\"filho\").pronto\n";
        let mut world = world_from(src);
        let out = call(&mut world, "m", "f", &[]);
        assert!(matches!(out, Value::Int(7)));
    }

    #[test]
    fn escrevaln_appends_to_the_sink() {
        let src = "classe main\nfunc inicializar\n  escrevaln(\"Olá, Mundo!\")\n  ret 1\n";
        let mut world = world_from(src);
        let out = call(&mut world, "main", "inicializar", &[]);
        assert!(matches!(out, Value::Int(1)));
        assert_eq!(world.sink.collected(), Some("Olá, Mundo!\n"));
    }

    #[test]
    fn terminate_statement_ends_the_invocation() {
        let src = "classe m\nfunc f\n  terminar\n";
        let mut world = world_from(src);
        let class_id = world.interns.get_name("m").unwrap();
        let this = world.create_object(class_id).unwrap();
        let f = world.interns.get_name("f").unwrap();
        assert!(matches!(invoke(&mut world, this, f, &[]), Some(Invocation::Terminated)));
        assert!(world.terminate);
    }

    #[test]
    fn dynamic_member_names_resolve_fields() {
        let src = "classe m\nint32 item_1_custo = 5\nfunc f\n  int32 n = 1\n  ret este.item_[n]_custo\n";
        let mut world = world_from(src);
        let out = call(&mut world, "m", "f", &[]);
        assert!(matches!(out, Value::Int(5)));
    }

    #[test]
    fn class_member_reads_constant_in_other_class() {
        let src = "classe precos\nconst espada = 120\nclasse m\nfunc f\n  ret precos:espada\n";
        let mut world = world_from(src);
        let out = call(&mut world, "m", "f", &[]);
        assert!(matches!(out, Value::Int(120)));
    }
}
