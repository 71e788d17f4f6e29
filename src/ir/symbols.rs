//! Named storage slots and callable functions of a compilation unit.
//!
//! Slots are the symbolic locations that survive across builder nodes: parameters, registers
//! promoted to locals and the merge slots through which simulated machine states reconcile
//! their values at join points. A slot is identified by name, so every state copy that refers
//! to `"stack_2"` refers to the same location regardless of the path that reached it.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::{ir::IrType, Result};

/// Handle to a named slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(usize);

impl SlotId {
    /// Creates a slot handle from a table index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the index into the slot table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// A named slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Unique name within the compilation unit
    pub name: String,
    /// Declared type
    pub ty: IrType,
    /// Position in the parameter list, if this slot is a parameter
    pub parameter: Option<usize>,
}

/// Interning table of slots.
#[derive(Debug, Clone, Default)]
pub struct SlotTable {
    slots: Vec<Slot>,
    by_name: FxHashMap<String, SlotId>,
    parameters: usize,
}

impl SlotTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot named `name`, creating it with type `ty` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ContractViolation`] if the slot exists with a different type.
    pub fn intern(&mut self, name: &str, ty: IrType) -> Result<SlotId> {
        if let Some(&id) = self.by_name.get(name) {
            let existing = self.slots[id.index()].ty;
            if existing != ty {
                return Err(contract_violation!(
                    "slot '{}' declared as {} and used as {}",
                    name,
                    existing,
                    ty
                ));
            }
            return Ok(id);
        }

        let id = SlotId::new(self.slots.len());
        self.slots.push(Slot {
            name: name.to_string(),
            ty,
            parameter: None,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Declares the next parameter slot.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ContractViolation`] if a slot with this name already exists.
    pub fn define_parameter(&mut self, name: &str, ty: IrType) -> Result<SlotId> {
        if self.by_name.contains_key(name) {
            return Err(contract_violation!("parameter '{}' defined twice", name));
        }
        let id = self.intern(name, ty)?;
        self.slots[id.index()].parameter = Some(self.parameters);
        self.parameters += 1;
        Ok(id)
    }

    /// Looks up a slot by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<SlotId> {
        self.by_name.get(name).copied()
    }

    /// Returns the slot behind `id`.
    #[must_use]
    pub fn get(&self, id: SlotId) -> Option<&Slot> {
        self.slots.get(id.index())
    }

    /// Parameter slots in declaration order.
    #[must_use]
    pub fn parameters(&self) -> Vec<SlotId> {
        let mut params: Vec<(usize, SlotId)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.parameter.map(|p| (p, SlotId::new(i))))
            .collect();
        params.sort_unstable();
        params.into_iter().map(|(_, id)| id).collect()
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the table holds no slot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Handle to a declared function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(usize);

impl FunctionId {
    /// Creates a function handle from a table index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the index into the function table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Signature of an external function callable from the IR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDecl {
    /// Name used to bind the function at evaluation or code generation time
    pub name: String,
    /// Return type, `NoType` for procedures
    pub returns: IrType,
    /// Parameter types
    pub params: Vec<IrType>,
}

/// Interning table of callable functions.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    functions: Vec<FunctionDecl>,
    by_name: FxHashMap<String, FunctionId>,
}

impl FunctionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a function, returning the existing handle for an identical redeclaration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ContractViolation`] if `name` is already declared with a
    /// different signature.
    pub fn declare(&mut self, name: &str, returns: IrType, params: &[IrType]) -> Result<FunctionId> {
        if let Some(&id) = self.by_name.get(name) {
            let existing = &self.functions[id.index()];
            if existing.returns != returns || existing.params != params {
                return Err(contract_violation!(
                    "function '{}' redeclared with a different signature",
                    name
                ));
            }
            return Ok(id);
        }

        let id = FunctionId::new(self.functions.len());
        self.functions.push(FunctionDecl {
            name: name.to_string(),
            returns,
            params: params.to_vec(),
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Returns the declaration behind `id`.
    #[must_use]
    pub fn get(&self, id: FunctionId) -> Option<&FunctionDecl> {
        self.functions.get(id.index())
    }

    /// Looks up a function by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<FunctionId> {
        self.by_name.get(name).copied()
    }

    /// Iterates over all declarations.
    pub fn iter(&self) -> impl Iterator<Item = (FunctionId, &FunctionDecl)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionId::new(i), f))
    }
}
