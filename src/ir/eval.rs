//! Reference evaluator for finished IR.
//!
//! The evaluator executes a [`MethodIr`] directly, which is how generated interpreters and
//! compiled methods are checked without a code generator. It is deliberately simple:
//!
//! - Every value is carried as an `i64`. Integers are sign-extended to 64 bits after being
//!   truncated to their type, floating point values are carried as the bits of an `f64`.
//! - Memory is a single little-endian byte array with a bump allocator. Address `0` is never
//!   handed out.
//! - Calls go to host closures registered under the declared function name.
//! - A `Trap` is recorded in the [`Outcome`] and execution continues; generated interpreters
//!   route unknown opcodes through a trap and then leave the loop on their own.
//!
//! Reading a value or slot that was never written, an access outside memory, a division by
//! zero or running out of steps ends evaluation with [`Error::Evaluation`].

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::{
    graph::NodeId,
    ir::{BinaryOp, IrType, MethodIr, Op, Terminator, ValueId},
    Error, Result,
};

/// Host implementation of a declared function.
pub type HostFn = Box<dyn FnMut(&mut Memory, &[i64]) -> Result<Option<i64>>>;

/// Byte-addressed little-endian memory.
#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Default for Memory {
    fn default() -> Self {
        Self { bytes: vec![0; 16] }
    }
}

impl Memory {
    /// Creates an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `size` zeroed bytes aligned to 8 and returns their address.
    pub fn alloc(&mut self, size: usize) -> i64 {
        let start = self.bytes.len().next_multiple_of(8);
        self.bytes.resize(start + size.max(1), 0);
        start as i64
    }

    /// Allocates a copy of `data` and returns its address.
    pub fn alloc_bytes(&mut self, data: &[u8]) -> i64 {
        let addr = self.alloc(data.len());
        let start = addr as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
        addr
    }

    fn range(&self, addr: i64, len: usize) -> Result<std::ops::Range<usize>> {
        usize::try_from(addr)
            .ok()
            .filter(|&start| start != 0)
            .and_then(|start| Some(start..start.checked_add(len)?))
            .filter(|range| range.end <= self.bytes.len())
            .ok_or_else(|| Error::Evaluation(format!("access of {len} bytes at {addr:#x}")))
    }

    /// Copies `data` to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Evaluation`] if the range is not allocated.
    pub fn write_bytes(&mut self, addr: i64, data: &[u8]) -> Result<()> {
        let range = self.range(addr, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Reads a value of type `ty` from `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Evaluation`] if the range is not allocated or `ty` has no size.
    pub fn read(&self, addr: i64, ty: IrType) -> Result<i64> {
        let size = sized(ty)?;
        let range = self.range(addr, size)?;
        let mut buffer = [0u8; 8];
        buffer[..size].copy_from_slice(&self.bytes[range]);
        let raw = i64::from_le_bytes(buffer);
        Ok(match ty {
            IrType::Float => f64::from(f32::from_bits(raw as u32)).to_bits() as i64,
            _ => normalize(ty, raw),
        })
    }

    /// Writes `value` as type `ty` to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Evaluation`] if the range is not allocated or `ty` has no size.
    pub fn write(&mut self, addr: i64, ty: IrType, value: i64) -> Result<()> {
        let size = sized(ty)?;
        let raw = match ty {
            IrType::Float => i64::from((f64::from_bits(value as u64) as f32).to_bits()),
            _ => value,
        };
        let range = self.range(addr, size)?;
        self.bytes[range].copy_from_slice(&raw.to_le_bytes()[..size]);
        Ok(())
    }
}

fn sized(ty: IrType) -> Result<usize> {
    match ty.size() {
        0 => Err(Error::Evaluation(format!("{ty} has no memory representation"))),
        size => Ok(size),
    }
}

/// Truncates `value` to the width of `ty` and sign-extends it back.
fn normalize(ty: IrType, value: i64) -> i64 {
    match ty {
        IrType::Int8 => i64::from(value as i8),
        IrType::Int16 => i64::from(value as i16),
        IrType::Int32 => i64::from(value as i32),
        IrType::Float => f64::from(f64::from_bits(value as u64) as f32).to_bits() as i64,
        _ => value,
    }
}

fn to_f64(ty: IrType, value: i64) -> f64 {
    if ty.is_float() {
        f64::from_bits(value as u64)
    } else {
        value as f64
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    /// Returned value
    pub value: Option<i64>,
    /// Codes of the traps executed, in order
    pub traps: Vec<i64>,
    /// How often each node was entered
    pub visits: FxHashMap<NodeId, usize>,
    /// Operations and terminators executed
    pub steps: usize,
}

impl Outcome {
    /// How often `node` was entered.
    #[must_use]
    pub fn visits_of(&self, node: NodeId) -> usize {
        self.visits.get(&node).copied().unwrap_or(0)
    }
}

/// Executes finished IR.
pub struct Evaluator {
    memory: Memory,
    hosts: FxHashMap<String, HostFn>,
    step_limit: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self {
            memory: Memory::new(),
            hosts: FxHashMap::default(),
            step_limit: 1_000_000,
        }
    }
}

impl Evaluator {
    /// Creates an evaluator with empty memory and no host functions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits the number of executed operations and terminators.
    #[must_use]
    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Registers the host implementation of the function declared as `name`.
    pub fn define_host<F>(&mut self, name: &str, host: F)
    where
        F: FnMut(&mut Memory, &[i64]) -> Result<Option<i64>> + 'static,
    {
        self.hosts.insert(name.to_string(), Box::new(host));
    }

    /// The evaluator's memory.
    #[must_use]
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// The evaluator's memory, e.g. to place an instruction stream before running.
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Runs `ir` with the given parameter values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Evaluation`] if the arguments do not match the parameters or the
    /// execution fails.
    pub fn run<S>(&mut self, ir: &MethodIr<S>, args: &[i64]) -> Result<Outcome> {
        let mut values: Vec<Option<i64>> = vec![None; ir.values().len()];
        for (id, value) in ir.values().iter() {
            if let Some(c) = value.constant() {
                values[id.index()] = Some(c.to_bits());
            }
        }

        let mut slots: Vec<Option<i64>> = vec![None; ir.slots().len()];
        let params = ir.slots().parameters();
        if params.len() != args.len() {
            return Err(Error::Evaluation(format!(
                "{} takes {} arguments, {} given",
                ir.name(),
                params.len(),
                args.len()
            )));
        }
        for (&slot, &arg) in params.iter().zip(args) {
            let ty = ir.slots().get(slot).map_or(IrType::Int64, |s| s.ty);
            slots[slot.index()] = Some(normalize(ty, arg));
        }

        let mut frame = Frame {
            ir,
            values,
            slots,
            outcome: Outcome::default(),
        };

        let mut current = ir.entry();
        loop {
            *frame.outcome.visits.entry(current).or_insert(0) += 1;
            let node = ir
                .node(current)
                .ok_or_else(|| Error::Evaluation(format!("{current} does not exist")))?;

            for op in &node.ops {
                self.tick(&mut frame.outcome)?;
                self.execute(&mut frame, op)?;
            }

            self.tick(&mut frame.outcome)?;
            current = match &node.terminator {
                Terminator::Goto(target) => *target,
                Terminator::IfNotZero {
                    condition,
                    taken,
                    fallthrough,
                } => {
                    if frame.value(*condition)? != 0 {
                        *taken
                    } else {
                        *fallthrough
                    }
                }
                Terminator::Switch {
                    selector,
                    cases,
                    default,
                } => {
                    let selector = frame.value(*selector)?;
                    cases
                        .iter()
                        .find(|c| c.value == selector)
                        .map_or(*default, |c| c.target)
                }
                Terminator::Return(value) => {
                    frame.outcome.value = value.map(|v| frame.value(v)).transpose()?;
                    return Ok(frame.outcome);
                }
                Terminator::Open => {
                    return Err(Error::Evaluation(format!("{current} is not terminated")));
                }
            };
        }
    }

    fn tick(&self, outcome: &mut Outcome) -> Result<()> {
        outcome.steps += 1;
        if outcome.steps > self.step_limit {
            return Err(Error::Evaluation(format!(
                "step limit of {} exceeded",
                self.step_limit
            )));
        }
        Ok(())
    }

    fn execute<S>(&mut self, frame: &mut Frame<'_, S>, op: &Op) -> Result<()> {
        match op {
            Op::Binary {
                op,
                dest,
                left,
                right,
            } => {
                let result = frame.binary(*op, *dest, *left, *right)?;
                frame.set(*dest, result);
            }
            Op::Negate { dest, operand } => {
                let ty = frame.type_of(*dest);
                let value = frame.value(*operand)?;
                let result = if ty.is_float() {
                    (-to_f64(ty, value)).to_bits() as i64
                } else {
                    normalize(ty, value.wrapping_neg())
                };
                frame.set(*dest, result);
            }
            Op::ConvertTo { dest, ty, operand } => {
                let from = frame.type_of(*operand);
                let value = frame.value(*operand)?;
                let result = match (from.is_float(), ty.is_float()) {
                    (false, false) => normalize(*ty, value),
                    (false, true) => normalize(*ty, (value as f64).to_bits() as i64),
                    (true, false) => normalize(*ty, to_f64(from, value) as i64),
                    (true, true) => normalize(*ty, value),
                };
                frame.set(*dest, result);
            }
            Op::Load { dest, slot } => {
                let value = frame
                    .slots
                    .get(slot.index())
                    .copied()
                    .flatten()
                    .ok_or_else(|| Error::Evaluation(format!("slot {slot} read before write")))?;
                frame.set(*dest, value);
            }
            Op::Store { slot, value } => {
                let value = frame.value(*value)?;
                let cell = frame
                    .slots
                    .get_mut(slot.index())
                    .ok_or_else(|| Error::Evaluation(format!("slot {slot} does not exist")))?;
                *cell = Some(value);
            }
            Op::LoadAt { dest, ty, addr } => {
                let addr = frame.value(*addr)?;
                let value = self.memory.read(addr, *ty)?;
                frame.set(*dest, value);
            }
            Op::StoreAt { ty, addr, value } => {
                let addr = frame.value(*addr)?;
                let value = frame.value(*value)?;
                self.memory.write(addr, *ty, value)?;
            }
            Op::IndexAt {
                dest,
                elem,
                base,
                index,
            } => {
                let base = frame.value(*base)?;
                let index = frame.value(*index)?;
                let size = elem.size() as i64;
                frame.set(*dest, base.wrapping_add(index.wrapping_mul(size)));
            }
            Op::Call {
                dest,
                function,
                args,
            } => {
                let name = frame
                    .ir
                    .functions()
                    .get(*function)
                    .map(|f| f.name.clone())
                    .ok_or_else(|| Error::Evaluation(format!("f{} is not declared", function.index())))?;
                let args = args
                    .iter()
                    .map(|&a| frame.value(a))
                    .collect::<Result<Vec<_>>>()?;
                let host = self
                    .hosts
                    .get_mut(&name)
                    .ok_or_else(|| Error::Evaluation(format!("no host function '{name}'")))?;
                let result = host(&mut self.memory, &args)?;
                if let Some(dest) = dest {
                    let value = result.ok_or_else(|| {
                        Error::Evaluation(format!("host function '{name}' returned nothing"))
                    })?;
                    let ty = frame.type_of(*dest);
                    frame.set(*dest, normalize(ty, value));
                }
            }
            Op::Trap { code } => {
                let code = frame.value(*code)?;
                warn!(method = frame.ir.name(), code, "trap executed");
                frame.outcome.traps.push(code);
            }
        }
        Ok(())
    }
}

/// Mutable state of one evaluation.
struct Frame<'a, S> {
    ir: &'a MethodIr<S>,
    values: Vec<Option<i64>>,
    slots: Vec<Option<i64>>,
    outcome: Outcome,
}

impl<S> Frame<'_, S> {
    fn value(&self, id: ValueId) -> Result<i64> {
        self.values
            .get(id.index())
            .copied()
            .flatten()
            .ok_or_else(|| Error::Evaluation(format!("{id} used before definition")))
    }

    fn set(&mut self, id: ValueId, value: i64) {
        if let Some(cell) = self.values.get_mut(id.index()) {
            *cell = Some(value);
        }
    }

    fn type_of(&self, id: ValueId) -> IrType {
        self.ir.values().type_of(id)
    }

    fn binary(&self, op: BinaryOp, dest: ValueId, left: ValueId, right: ValueId) -> Result<i64> {
        let (lty, rty) = (self.type_of(left), self.type_of(right));
        let (l, r) = (self.value(left)?, self.value(right)?);

        if lty.is_float() || rty.is_float() {
            let (l, r) = (to_f64(lty, l), to_f64(rty, r));
            let result = match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => l / r,
                BinaryOp::EqualTo => return Ok(i64::from(l == r)),
                BinaryOp::NotEqualTo => return Ok(i64::from(l != r)),
                BinaryOp::LessThan => return Ok(i64::from(l < r)),
                BinaryOp::GreaterThan => return Ok(i64::from(l > r)),
                _ => {
                    return Err(Error::Evaluation(format!(
                        "{op} is not defined on floating point operands"
                    )))
                }
            };
            return Ok(normalize(self.type_of(dest), result.to_bits() as i64));
        }

        let result = match op {
            BinaryOp::Add => l.wrapping_add(r),
            BinaryOp::Sub => l.wrapping_sub(r),
            BinaryOp::Mul => l.wrapping_mul(r),
            BinaryOp::Div if r == 0 => {
                return Err(Error::Evaluation(format!("{op} by zero in {dest}")));
            }
            BinaryOp::Div => l.wrapping_div(r),
            BinaryOp::And => l & r,
            BinaryOp::Or => l | r,
            BinaryOp::Xor => l ^ r,
            BinaryOp::ShiftL => l.wrapping_shl((r & 63) as u32),
            BinaryOp::ShiftR => l.wrapping_shr((r & 63) as u32),
            BinaryOp::EqualTo => i64::from(l == r),
            BinaryOp::NotEqualTo => i64::from(l != r),
            BinaryOp::LessThan => i64::from(l < r),
            BinaryOp::GreaterThan => i64::from(l > r),
        };
        Ok(normalize(self.type_of(dest), result))
    }
}
