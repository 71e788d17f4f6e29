//! Opcode handler registration.
//!
//! A [`HandlerRegistry`] maps opcode values to the callbacks that translate them. It is an
//! ordinary value owned by whoever configures a builder and shared with it through an
//! [`Arc`], so independent builds can use different registries or share one read-only.

use std::{collections::BTreeMap, fmt, sync::Arc};

use tracing::debug;

use crate::{
    graph::NodeId,
    runtime::{Runtime, Signal},
    state::MachineState,
    Error, Result,
};

/// Type alias for handler callbacks.
///
/// A handler receives the runtime of the builder invoking it and the node to populate.
///
/// # Thread Safety
///
/// Handlers must be `Send + Sync` so that a registry can be shared by concurrent builds.
pub type HandlerFn<S> = Arc<dyn Fn(&mut dyn Runtime<S>, NodeId) -> Result<Signal> + Send + Sync>;

/// A registered opcode handler.
pub struct Handler<S> {
    name: String,
    callback: HandlerFn<S>,
}

impl<S> Clone for Handler<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<S> fmt::Debug for Handler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("name", &self.name).finish()
    }
}

impl<S: MachineState> Handler<S> {
    /// Diagnostic name of the handler.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the handler against `node`.
    ///
    /// # Errors
    ///
    /// Returns whatever error the handler reports.
    pub fn invoke(&self, rt: &mut dyn Runtime<S>, node: NodeId) -> Result<Signal> {
        (self.callback)(rt, node)
    }
}

/// Opcode to handler table.
///
/// Opcodes are kept sorted, which makes the generated dispatch switch deterministic.
///
/// # Examples
///
/// ```rust,ignore
/// let mut registry = HandlerRegistry::<SimulatedStack>::new();
/// registry.register(0x01, "nop", |rt, node| {
///     rt.default_fallthrough(node, 1)?;
///     Ok(Signal::Continue)
/// })?;
/// ```
pub struct HandlerRegistry<S> {
    handlers: BTreeMap<i64, Handler<S>>,
}

impl<S> Default for HandlerRegistry<S> {
    fn default() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }
}

impl<S> fmt::Debug for HandlerRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.handlers.iter().map(|(op, h)| (op, &h.name)))
            .finish()
    }
}

impl<S: MachineState> HandlerRegistry<S> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `opcode`.
    ///
    /// # Arguments
    ///
    /// * `opcode` - Opcode value as decoded from the instruction stream
    /// * `name` - Diagnostic name, also used to name the handler's nodes
    /// * `handler` - Callback emitting the instruction's operations
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateOpcode`] if `opcode` already has a handler.
    pub fn register<F>(&mut self, opcode: i64, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&mut dyn Runtime<S>, NodeId) -> Result<Signal> + Send + Sync + 'static,
    {
        if let Some(existing) = self.handlers.get(&opcode) {
            return Err(Error::DuplicateOpcode {
                opcode,
                existing: existing.name.clone(),
                name: name.to_string(),
            });
        }
        debug!(opcode, name, "registered opcode handler");
        self.handlers.insert(
            opcode,
            Handler {
                name: name.to_string(),
                callback: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Handler registered for `opcode`.
    #[must_use]
    pub fn lookup(&self, opcode: i64) -> Option<&Handler<S>> {
        self.handlers.get(&opcode)
    }

    /// Diagnostic name of the handler for `opcode`.
    #[must_use]
    pub fn name_of(&self, opcode: i64) -> Option<&str> {
        self.handlers.get(&opcode).map(|h| h.name.as_str())
    }

    /// Registered opcodes in ascending order.
    pub fn opcodes(&self) -> impl Iterator<Item = i64> + '_ {
        self.handlers.keys().copied()
    }

    /// Smallest and largest registered opcode.
    #[must_use]
    pub fn range(&self) -> Option<(i64, i64)> {
        let first = *self.handlers.keys().next()?;
        let last = *self.handlers.keys().next_back()?;
        Some((first, last))
    }

    /// Number of registered opcodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
