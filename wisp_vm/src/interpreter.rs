//! Tree-walking evaluator for the static single assignment control-flow
//! graphs `wisp_ir` produces: one value stack shared across every call
//! (how arguments cross a `Call` boundary), one frame per invocation, and
//! block-to-block dispatch driven directly by each block's own terminator
//! instruction rather than a fixed "next block" pointer.

use std::rc::Rc;

use log::trace;
use wisp_common::{Diagnostic, Diagnostics, Pos};
use wisp_ir::{Instruction, Kind, Literal, Program, ValueType};

use crate::builtins;
use crate::errors::VmError;
use crate::runtime::Frame;
use crate::value::{is_truthy, values_equal, Value};

/// Bounds the evaluator enforces so a runaway program reports a diagnostic
/// instead of exhausting the host stack or heap. Exceeding either is a VM
/// error, not a panic.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_call_depth: usize,
    pub max_stack_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits { max_call_depth: 1024, max_stack_depth: 4096 }
    }
}

pub struct Vm<'p> {
    program: &'p Program,
    value_stack: Vec<Value>,
    limits: Limits,
    diagnostics: Diagnostics,
}

/// Runs `program`'s `_init` procedure to completion under the default
/// [`Limits`], returning its final value together with any diagnostics
/// raised along the way.
pub fn run(program: &Program) -> (Value, Diagnostics) {
    run_with_limits(program, Limits::default())
}

pub fn run_with_limits(program: &Program, limits: Limits) -> (Value, Diagnostics) {
    let mut vm = Vm { program, value_stack: Vec::new(), limits, diagnostics: Diagnostics::new() };
    let init = program.procedure_index("_init").unwrap_or(0);
    let value = vm.call_procedure(init, None, 0);
    (value, vm.diagnostics)
}

impl<'p> Vm<'p> {
    fn error(&mut self, error: VmError) {
        self.diagnostics.push(Diagnostic::vm(error.to_string(), Pos::NONE, Pos::NONE));
    }

    fn call_procedure(&mut self, proc: usize, closure: Option<Rc<Frame>>, depth: usize) -> Value {
        if depth > self.limits.max_call_depth {
            self.error(VmError::CallDepthExceeded { limit: self.limits.max_call_depth });
            return Value::Null;
        }
        let frame = Rc::new(Frame::new(closure));
        self.exec_procedure(proc, frame, depth)
    }

    /// Dispatches block by block: every block's instructions run in order,
    /// then its terminator (`Goto`/`GotoIf`) picks the next block or
    /// (`Ret`/`End`) returns the value that instruction carried.
    fn exec_procedure(&mut self, proc: usize, frame: Rc<Frame>, depth: usize) -> Value {
        let mut block = 0usize;
        let mut last_block = usize::MAX;
        loop {
            trace!("executing proc {proc} block {block}");
            let instructions = self.program.procedure(proc).blocks[block].instructions.clone();
            let mut result = Value::Default;
            for instruction in &instructions {
                result = self.exec_instruction(&frame, instruction, block, last_block, depth);
                frame.set(instruction.index, result.clone());
            }
            match instructions.last() {
                Some(terminator) if terminator.kind == Kind::Goto => match &terminator.literal {
                    Literal::Block(target) => {
                        last_block = block;
                        block = *target;
                    }
                    _ => return result,
                },
                Some(terminator) if terminator.kind == Kind::GotoIf => match &terminator.literal {
                    Literal::Branch { if_true, if_false } => {
                        let cond = frame.get(terminator.left);
                        last_block = block;
                        block = if is_truthy(&cond) { *if_true } else { *if_false };
                    }
                    _ => return result,
                },
                _ => return result,
            }
        }
    }

    fn exec_instruction(
        &mut self,
        frame: &Rc<Frame>,
        instruction: &Instruction,
        block: usize,
        last_block: usize,
        depth: usize,
    ) -> Value {
        let left = || frame.get(instruction.left);
        let right = || frame.get(instruction.right);
        match instruction.kind {
            Kind::I64 => match &instruction.literal {
                Literal::Int(v) => Value::I64(*v),
                _ => Value::Null,
            },
            Kind::F64 => match &instruction.literal {
                Literal::Float(v) => Value::F64(*v),
                _ => Value::Null,
            },
            Kind::Bool => match &instruction.literal {
                Literal::Bool(v) => Value::Bool(*v),
                _ => Value::Null,
            },
            Kind::Str => match &instruction.literal {
                Literal::Str(s) => Value::Str(s.clone()),
                _ => Value::Null,
            },
            Kind::Default => Value::Default,

            Kind::Add => self.numeric(left(), right(), |a, b| a + b, |a, b| a + b),
            Kind::Sub => self.numeric(left(), right(), |a, b| a - b, |a, b| a - b),
            Kind::Mul => self.numeric(left(), right(), |a, b| a * b, |a, b| a * b),
            Kind::Quo => self.divide(left(), right()),
            Kind::Mod => self.modulo(left(), right()),

            Kind::Less => self.compare(left(), right(), std::cmp::Ordering::is_lt),
            Kind::Greater => self.compare(left(), right(), std::cmp::Ordering::is_gt),
            Kind::Equals => Value::Bool(values_equal(&left(), &right())),
            Kind::NotEquals => Value::Bool(!values_equal(&left(), &right())),

            Kind::And => Value::Bool(is_truthy(&left()) && is_truthy(&right())),
            Kind::Or => Value::Bool(is_truthy(&left()) || is_truthy(&right())),
            Kind::Not => Value::Bool(!is_truthy(&left())),

            Kind::Push => {
                self.push(left());
                Value::Default
            }
            Kind::Pop => self.pop(),

            Kind::Move => self.exec_move(instruction, left(), right(), frame),

            Kind::ConstructTuple => self.construct(instruction, frame, left, right),

            Kind::TypeLiteral => instruction.symbol.as_deref().map(builtins::type_literal).unwrap_or(Value::Null),
            Kind::LoadEnv => Value::BuiltinFunction(instruction.symbol.clone().unwrap_or_default()),
            Kind::Env => self.env(left(), instruction.symbol.as_deref()),

            Kind::Index => self.index(left(), right()),

            Kind::Phi => self.phi(instruction, frame, block, last_block),

            Kind::ProcedureDefinition => match &instruction.literal {
                Literal::ProcedureIndex(index) => Value::Procedure { index: *index, closure: Some(frame.clone()) },
                _ => Value::Null,
            },
            Kind::ProcedureType => Value::Default,

            Kind::Call => {
                let count = match &instruction.literal {
                    Literal::Count(n) => *n,
                    _ => 0,
                };
                self.call(left(), count, depth)
            }

            Kind::Ret | Kind::End => left(),
            Kind::Goto | Kind::GotoIf => Value::Default,
        }
    }

    fn numeric(&mut self, l: Value, r: Value, op_i: impl Fn(i64, i64) -> i64, op_f: impl Fn(f64, f64) -> f64) -> Value {
        match (l, r) {
            (Value::I64(a), Value::I64(b)) => Value::I64(op_i(a, b)),
            (Value::F64(a), Value::F64(b)) => Value::F64(op_f(a, b)),
            (Value::I64(a), Value::F64(b)) => Value::F64(op_f(a as f64, b)),
            (Value::F64(a), Value::I64(b)) => Value::F64(op_f(a, b as f64)),
            _ => Value::Null,
        }
    }

    fn divide(&mut self, l: Value, r: Value) -> Value {
        match (l, r) {
            (Value::I64(_), Value::I64(0)) => {
                self.error(VmError::DivisionByZero);
                Value::Null
            }
            (Value::I64(a), Value::I64(b)) => Value::I64(a / b),
            (Value::F64(a), Value::F64(b)) => Value::F64(a / b),
            (Value::I64(a), Value::F64(b)) => Value::F64(a as f64 / b),
            (Value::F64(a), Value::I64(b)) => Value::F64(a / b as f64),
            _ => Value::Null,
        }
    }

    fn modulo(&mut self, l: Value, r: Value) -> Value {
        match (l, r) {
            (Value::I64(_), Value::I64(0)) => {
                self.error(VmError::DivisionByZero);
                Value::Null
            }
            (Value::I64(a), Value::I64(b)) => Value::I64(a % b),
            _ => Value::Null,
        }
    }

    fn compare(&self, l: Value, r: Value, pred: impl Fn(std::cmp::Ordering) -> bool) -> Value {
        let ordering = match (&l, &r) {
            (Value::I64(a), Value::I64(b)) => a.partial_cmp(b),
            (Value::F64(a), Value::F64(b)) => a.partial_cmp(b),
            (Value::I64(a), Value::F64(b)) => (*a as f64).partial_cmp(b),
            (Value::F64(a), Value::I64(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
            _ => None,
        };
        Value::Bool(ordering.is_some_and(pred))
    }

    fn push(&mut self, value: Value) {
        if self.value_stack.len() >= self.limits.max_stack_depth {
            self.error(VmError::StackDepthExceeded { limit: self.limits.max_stack_depth });
            return;
        }
        self.value_stack.push(value);
    }

    fn pop(&mut self) -> Value {
        match self.value_stack.pop() {
            Some(value) => value,
            None => {
                self.error(VmError::StackUnderflow);
                Value::Null
            }
        }
    }

    /// `Literal::Operand(idx_id)` marks an indexed store (`a[i]: v`): the
    /// index is a third operand, looked up by id like `left`/`right`.
    /// Anything else is a field store (`obj.field: v`) — best effort only,
    /// since a `Tuple` isn't shared mutable storage the way `Array` is, so
    /// a later read of the same object under its own assignment id won't
    /// observe this update.
    fn exec_move(&mut self, instruction: &Instruction, target: Value, value: Value, frame: &Rc<Frame>) -> Value {
        match &instruction.literal {
            Literal::Operand(idx_id) => {
                let idx = frame.get(*idx_id);
                self.store_index(target, idx, value.clone());
                value
            }
            _ => value,
        }
    }

    fn store_index(&mut self, target: Value, idx: Value, value: Value) {
        let (Value::Array(items), Value::I64(i)) = (target, idx) else { return };
        let mut items = items.borrow_mut();
        if i < 0 || i as usize >= items.len() {
            self.error(VmError::IndexOutOfBounds { index: i, len: items.len() });
            return;
        }
        items[i as usize] = value;
    }

    fn index(&mut self, target: Value, idx: Value) -> Value {
        match (target, idx) {
            (Value::Array(items), Value::I64(i)) => {
                let items = items.borrow();
                if i < 0 || i as usize >= items.len() {
                    self.error(VmError::IndexOutOfBounds { index: i, len: items.len() });
                    return Value::Null;
                }
                items[i as usize].clone()
            }
            (Value::Factory { name, product }, element) => {
                let element_name = match &element {
                    Value::Type { name, .. } => name.clone(),
                    other => other.type_name().to_string(),
                };
                Value::Type { name: format!("{name}<{element_name}>"), kind: product, element: Some(Box::new(element)) }
            }
            _ => Value::Null,
        }
    }

    fn env(&mut self, target: Value, field: Option<&str>) -> Value {
        let Value::Tuple(fields) = target else { return Value::Null };
        let Some(field) = field else { return Value::Null };
        fields.into_iter().find(|(name, _)| name == field).map(|(_, v)| v).unwrap_or(Value::Null)
    }

    /// A `ConstructTuple` instruction is one of three shapes, told apart by
    /// `ty`/`literal` rather than the operand values themselves: a literal
    /// struct (`Literal::Fields`, each field's value fetched from `frame` by
    /// its own assignment id), a `value as Type` pairing (`ValueType::Tuple`
    /// with plain operands), or a `lo‥hi` range (`ValueType::Range`).
    fn construct(&mut self, instruction: &Instruction, frame: &Rc<Frame>, left: impl Fn() -> Value, right: impl Fn() -> Value) -> Value {
        if let Literal::Fields(fields) = &instruction.literal {
            let tuple = fields.iter().map(|field| (field.name.clone(), frame.get(field.assignment))).collect();
            return Value::Tuple(tuple);
        }
        if instruction.ty == ValueType::Range {
            return match (left(), right()) {
                (Value::I64(lo), Value::I64(hi)) => Value::Range { start: lo, end: hi },
                _ => Value::Null,
            };
        }
        let (ty, value) = (left(), right());
        Value::Tuple(vec![(ty.type_name().to_string(), value)])
    }

    fn phi(&mut self, instruction: &Instruction, frame: &Rc<Frame>, block: usize, last_block: usize) -> Value {
        let Literal::Phi(entries) = &instruction.literal else { return Value::Default };
        match entries.iter().find(|entry| entry.predecessor == last_block) {
            Some(entry) => frame.get(entry.assignment),
            None => {
                self.error(VmError::PhiMissingPredecessor { block, predecessor: last_block });
                Value::Null
            }
        }
    }

    fn call(&mut self, callee: Value, arg_count: u32, depth: usize) -> Value {
        match callee {
            Value::Procedure { index, closure } => self.call_procedure(index, closure, depth + 1),
            Value::BuiltinFunction(name) => {
                let mut args = Vec::with_capacity(arg_count as usize);
                for _ in 0..arg_count {
                    args.push(self.pop());
                }
                args.reverse();
                match builtins::call(&name, args) {
                    Ok(value) => value,
                    Err(err) => {
                        self.error(err);
                        Value::Null
                    }
                }
            }
            other => {
                self.error(VmError::NotCallable { value: other.type_name().to_string() });
                Value::Null
            }
        }
    }
}
