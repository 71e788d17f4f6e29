//! The append-only operation emitter of a single builder node.
//!
//! An [`Emitter`] is handed out by the graph for exactly one open node. It allocates value
//! handles in the shared value table, interns slots and functions, and appends operations to
//! the node. Because it borrows the node's operation list, nothing else can change the node
//! while the emitter is alive.

use tracing::trace;

use crate::{
    graph::NodeId,
    ir::{
        BinaryOp, ConstValue, FunctionId, FunctionTable, IrType, Op, SlotId, SlotTable, Value,
        ValueDef, ValueId, ValueTable,
    },
    Result,
};

/// Emits operations into one open builder node.
pub struct Emitter<'a> {
    node: NodeId,
    values: &'a mut ValueTable,
    slots: &'a mut SlotTable,
    functions: &'a mut FunctionTable,
    ops: &'a mut Vec<Op>,
    trace: bool,
}

impl<'a> Emitter<'a> {
    pub(crate) fn new(
        node: NodeId,
        values: &'a mut ValueTable,
        slots: &'a mut SlotTable,
        functions: &'a mut FunctionTable,
        ops: &'a mut Vec<Op>,
        trace: bool,
    ) -> Self {
        Self {
            node,
            values,
            slots,
            functions,
            ops,
            trace,
        }
    }

    /// The node operations are appended to.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Number of operations in the node so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if the node holds no operation yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Type of `value`.
    #[must_use]
    pub fn type_of(&self, value: ValueId) -> IrType {
        self.values.type_of(value)
    }

    /// Integer constant behind `value`, if it is one.
    #[must_use]
    pub fn constant_of(&self, value: ValueId) -> Option<i64> {
        self.values.constant_i64(value)
    }

    fn check(&self, value: ValueId) -> Result<()> {
        if self.values.get(value).is_none() {
            return Err(contract_violation!(
                "value {} used in {} does not exist",
                value,
                self.node
            ));
        }
        Ok(())
    }

    fn define(&mut self, ty: IrType) -> ValueId {
        self.values.push(Value {
            ty,
            def: ValueDef::Computed { node: self.node },
        })
    }

    fn append(&mut self, op: Op) {
        if self.trace {
            trace!(node = %self.node, "{}", op);
        }
        self.ops.push(op);
    }

    /// Materializes a constant. No operation is emitted.
    pub fn constant(&mut self, value: ConstValue) -> ValueId {
        self.values.push(Value {
            ty: value.ty(),
            def: ValueDef::Const(value),
        })
    }

    /// Materializes an `Int8` constant.
    pub fn const_i8(&mut self, value: i8) -> ValueId {
        self.constant(ConstValue::I8(value))
    }

    /// Materializes an `Int16` constant.
    pub fn const_i16(&mut self, value: i16) -> ValueId {
        self.constant(ConstValue::I16(value))
    }

    /// Materializes an `Int32` constant.
    pub fn const_i32(&mut self, value: i32) -> ValueId {
        self.constant(ConstValue::I32(value))
    }

    /// Materializes an `Int64` constant.
    pub fn const_i64(&mut self, value: i64) -> ValueId {
        self.constant(ConstValue::I64(value))
    }

    /// Materializes a `Double` constant.
    pub fn const_f64(&mut self, value: f64) -> ValueId {
        self.constant(ConstValue::F64(value))
    }

    /// Materializes an `Address` constant.
    pub fn const_address(&mut self, value: i64) -> ValueId {
        self.constant(ConstValue::Address(value))
    }

    /// Emits `left <op> right`.
    ///
    /// Integer arithmetic on two constants folds into a new constant. Comparisons always
    /// produce `Int32`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ContractViolation`] if an operand does not exist.
    pub fn binary(&mut self, op: BinaryOp, left: ValueId, right: ValueId) -> Result<ValueId> {
        self.check(left)?;
        self.check(right)?;

        let lty = self.type_of(left);
        let rty = self.type_of(right);
        let ty = if op.is_comparison() {
            IrType::Int32
        } else {
            lty.widen(rty)
        };

        if let (Some(l), Some(r)) = (self.constant_of(left), self.constant_of(right)) {
            let folded = match op {
                BinaryOp::Add => Some(l.wrapping_add(r)),
                BinaryOp::Sub => Some(l.wrapping_sub(r)),
                BinaryOp::Mul => Some(l.wrapping_mul(r)),
                BinaryOp::And => Some(l & r),
                BinaryOp::Or => Some(l | r),
                BinaryOp::Xor => Some(l ^ r),
                _ => None,
            };
            if let Some(c) = folded.and_then(|v| ConstValue::integer(ty, v)) {
                return Ok(self.constant(c));
            }
        }

        let dest = self.define(ty);
        self.append(Op::Binary {
            op,
            dest,
            left,
            right,
        });
        Ok(dest)
    }

    /// Emits `left + right`.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand does not exist.
    pub fn add(&mut self, left: ValueId, right: ValueId) -> Result<ValueId> {
        self.binary(BinaryOp::Add, left, right)
    }

    /// Emits `left - right`.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand does not exist.
    pub fn sub(&mut self, left: ValueId, right: ValueId) -> Result<ValueId> {
        self.binary(BinaryOp::Sub, left, right)
    }

    /// Emits `left * right`.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand does not exist.
    pub fn mul(&mut self, left: ValueId, right: ValueId) -> Result<ValueId> {
        self.binary(BinaryOp::Mul, left, right)
    }

    /// Emits `left / right`.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand does not exist.
    pub fn div(&mut self, left: ValueId, right: ValueId) -> Result<ValueId> {
        self.binary(BinaryOp::Div, left, right)
    }

    /// Emits `left == right`.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand does not exist.
    pub fn equal_to(&mut self, left: ValueId, right: ValueId) -> Result<ValueId> {
        self.binary(BinaryOp::EqualTo, left, right)
    }

    /// Emits `left != right`.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand does not exist.
    pub fn not_equal_to(&mut self, left: ValueId, right: ValueId) -> Result<ValueId> {
        self.binary(BinaryOp::NotEqualTo, left, right)
    }

    /// Emits `left < right`.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand does not exist.
    pub fn less_than(&mut self, left: ValueId, right: ValueId) -> Result<ValueId> {
        self.binary(BinaryOp::LessThan, left, right)
    }

    /// Emits `left > right`.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand does not exist.
    pub fn greater_than(&mut self, left: ValueId, right: ValueId) -> Result<ValueId> {
        self.binary(BinaryOp::GreaterThan, left, right)
    }

    /// Emits `-operand`.
    ///
    /// # Errors
    ///
    /// Returns an error if the operand does not exist.
    pub fn negate(&mut self, operand: ValueId) -> Result<ValueId> {
        self.check(operand)?;
        if let Some(c) = self
            .constant_of(operand)
            .and_then(|v| ConstValue::integer(self.type_of(operand), v.wrapping_neg()))
        {
            return Ok(self.constant(c));
        }
        let dest = self.define(self.type_of(operand));
        self.append(Op::Negate { dest, operand });
        Ok(dest)
    }

    /// Converts `operand` to `ty`. Converting to the operand's own type returns it unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the operand does not exist or `ty` is `NoType`.
    pub fn convert_to(&mut self, ty: IrType, operand: ValueId) -> Result<ValueId> {
        self.check(operand)?;
        if ty == IrType::NoType {
            return Err(contract_violation!("cannot convert {} to NoType", operand));
        }
        if self.type_of(operand) == ty {
            return Ok(operand);
        }
        if let Some(c) = self
            .constant_of(operand)
            .and_then(|v| ConstValue::integer(ty, v))
        {
            return Ok(self.constant(c));
        }
        let dest = self.define(ty);
        self.append(Op::ConvertTo { dest, ty, operand });
        Ok(dest)
    }

    /// Returns the slot named `name`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot exists with a different type.
    pub fn slot(&mut self, name: &str, ty: IrType) -> Result<SlotId> {
        self.slots.intern(name, ty)
    }

    /// Emits a read of `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot does not exist.
    pub fn load(&mut self, slot: SlotId) -> Result<ValueId> {
        let ty = self
            .slots
            .get(slot)
            .map(|s| s.ty)
            .ok_or_else(|| contract_violation!("slot {} does not exist", slot))?;
        let dest = self.define(ty);
        self.append(Op::Load { dest, slot });
        Ok(dest)
    }

    /// Emits a write of `value` into `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot or the value does not exist.
    pub fn store(&mut self, slot: SlotId, value: ValueId) -> Result<()> {
        self.check(value)?;
        if self.slots.get(slot).is_none() {
            return Err(contract_violation!("slot {} does not exist", slot));
        }
        self.append(Op::Store { slot, value });
        Ok(())
    }

    /// Emits a typed memory read.
    ///
    /// # Errors
    ///
    /// Returns an error if the address does not exist.
    pub fn load_at(&mut self, ty: IrType, addr: ValueId) -> Result<ValueId> {
        self.check(addr)?;
        let dest = self.define(ty);
        self.append(Op::LoadAt { dest, ty, addr });
        Ok(dest)
    }

    /// Emits a typed memory write. The value is converted to `ty` first.
    ///
    /// # Errors
    ///
    /// Returns an error if the address or the value does not exist.
    pub fn store_at(&mut self, ty: IrType, addr: ValueId, value: ValueId) -> Result<()> {
        self.check(addr)?;
        let value = self.convert_to(ty, value)?;
        self.append(Op::StoreAt { ty, addr, value });
        Ok(())
    }

    /// Emits `base + index * sizeof(elem)`.
    ///
    /// A constant zero index returns `base` unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand does not exist.
    pub fn index_at(&mut self, elem: IrType, base: ValueId, index: ValueId) -> Result<ValueId> {
        self.check(base)?;
        self.check(index)?;
        if self.constant_of(index) == Some(0) {
            return Ok(base);
        }
        let dest = self.define(IrType::Address);
        self.append(Op::IndexAt {
            dest,
            elem,
            base,
            index,
        });
        Ok(dest)
    }

    /// Declares (or re-uses) an external function.
    ///
    /// # Errors
    ///
    /// Returns an error on a conflicting redeclaration.
    pub fn declare_function(
        &mut self,
        name: &str,
        returns: IrType,
        params: &[IrType],
    ) -> Result<FunctionId> {
        self.functions.declare(name, returns, params)
    }

    /// Emits a call, returning the result value for non-`NoType` functions.
    ///
    /// # Errors
    ///
    /// Returns an error if the function is unknown, an argument does not exist or the
    /// argument count does not match the declaration.
    pub fn call(&mut self, function: FunctionId, args: &[ValueId]) -> Result<Option<ValueId>> {
        for &arg in args {
            self.check(arg)?;
        }
        let (returns, arity) = {
            let decl = self
                .functions
                .get(function)
                .ok_or_else(|| contract_violation!("function f{} is not declared", function.index()))?;
            (decl.returns, decl.params.len())
        };
        if arity != args.len() {
            return Err(contract_violation!(
                "function f{} takes {} arguments, {} given",
                function.index(),
                arity,
                args.len()
            ));
        }

        let dest = (returns != IrType::NoType).then(|| self.define(returns));
        self.append(Op::Call {
            dest,
            function,
            args: args.to_vec(),
        });
        Ok(dest)
    }

    /// Emits a diagnostic trap carrying `code`.
    ///
    /// # Errors
    ///
    /// Returns an error if the code value does not exist.
    pub fn trap(&mut self, code: ValueId) -> Result<()> {
        self.check(code)?;
        self.append(Op::Trap { code });
        Ok(())
    }
}
