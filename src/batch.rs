//! Concurrent compilation of independent methods.
//!
//! Methods share nothing but the handler registry, which is immutable once configured. Each
//! method is translated by its own [`GraphConstructor`] on the rayon pool and the finished IR is
//! published into a [`CodeCache`] keyed by the method's index.
//!
//! # Examples
//!
//! ```rust,ignore
//! let registry = Arc::new(toy_registry()?);
//! let cache = CodeCache::new();
//! compile_all(&methods, &registry, BuildConfig::default(), &cache, |_, _| {
//!     Ok(SimulatedStack::new("stack", IrType::Int64))
//! })?;
//! let ir = cache.get(0).expect("compiled");
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use rayon::prelude::*;
use tracing::debug;

use crate::{
    graph::{BuildConfig, GraphConstructor},
    ir::{Emitter, IrType, MethodIr},
    runtime::HandlerRegistry,
    state::MachineState,
    Result,
};

/// One method to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSource<'a> {
    /// Method name
    pub name: String,
    /// Type of the returned value
    pub return_type: IrType,
    /// The instruction stream
    pub bytecodes: &'a [u8],
    /// Parameters in declaration order
    pub parameters: Vec<(String, IrType)>,
}

impl<'a> MethodSource<'a> {
    /// Creates a source without parameters.
    #[must_use]
    pub fn new(name: &str, return_type: IrType, bytecodes: &'a [u8]) -> Self {
        Self {
            name: name.to_string(),
            return_type,
            bytecodes,
            parameters: Vec::new(),
        }
    }

    /// Adds a parameter.
    #[must_use]
    pub fn parameter(mut self, name: &str, ty: IrType) -> Self {
        self.parameters.push((name.to_string(), ty));
        self
    }
}

/// Compiled methods by index.
pub struct CodeCache<S> {
    methods: DashMap<usize, Arc<MethodIr<S>>>,
}

impl<S> Default for CodeCache<S> {
    fn default() -> Self {
        Self {
            methods: DashMap::new(),
        }
    }
}

impl<S> CodeCache<S> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiled IR of method `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Arc<MethodIr<S>>> {
        self.methods.get(&index).map(|entry| Arc::clone(entry.value()))
    }

    /// Publishes the IR of method `index`, returning the one it replaces.
    pub fn insert(&self, index: usize, ir: MethodIr<S>) -> Option<Arc<MethodIr<S>>> {
        self.methods.insert(index, Arc::new(ir))
    }

    /// Drops the IR of method `index`.
    pub fn invalidate(&self, index: usize) -> Option<Arc<MethodIr<S>>> {
        self.methods.remove(&index).map(|(_, ir)| ir)
    }

    /// Returns `true` if method `index` is compiled.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.methods.contains_key(&index)
    }

    /// Number of compiled methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns `true` if nothing is compiled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Compiles one method.
///
/// # Errors
///
/// Returns the first construction failure or contract violation of the method.
pub fn compile<S, F>(
    source: &MethodSource<'_>,
    registry: &Arc<HandlerRegistry<S>>,
    config: BuildConfig,
    prologue: F,
) -> Result<MethodIr<S>>
where
    S: MachineState,
    F: FnOnce(&mut Emitter<'_>) -> Result<S>,
{
    let mut ctor = GraphConstructor::new(
        &source.name,
        source.return_type,
        source.bytecodes,
        Arc::clone(registry),
        config,
    );
    for (name, ty) in &source.parameters {
        ctor.define_parameter(name, *ty)?;
    }
    ctor.build(prologue)
}

/// Compiles `methods` in parallel and publishes them into `cache` under their position.
///
/// `prologue` is called with the method index and creates its initial machine state.
///
/// # Errors
///
/// Returns the error of a failing method. Methods that compiled before the failure was
/// observed stay in the cache.
pub fn compile_all<S, F>(
    methods: &[MethodSource<'_>],
    registry: &Arc<HandlerRegistry<S>>,
    config: BuildConfig,
    cache: &CodeCache<S>,
    prologue: F,
) -> Result<()>
where
    S: MachineState + Send + Sync,
    F: Fn(usize, &mut Emitter<'_>) -> Result<S> + Send + Sync,
{
    methods
        .par_iter()
        .enumerate()
        .try_for_each(|(index, source)| {
            let ir = compile(source, registry, config, |b| prologue(index, b))?;
            debug!(index, method = %source.name, nodes = ir.node_count(), "method compiled");
            cache.insert(index, ir);
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        graph::NodeId,
        ir::eval::Evaluator,
        runtime::{ImmediateWidth, Runtime, Signal},
        state::{SimulatedStack, VmStack},
        Error,
    };

    fn push(rt: &mut dyn Runtime<SimulatedStack>, node: NodeId) -> Result<Signal> {
        let value = rt.fetch_immediate(node, ImmediateWidth::W8, 1)?;
        {
            let (mut b, stack) = rt.graph_mut().parts(node)?;
            stack.push(&mut b, value)?;
        }
        rt.default_fallthrough(node, 2)?;
        Ok(Signal::Continue)
    }

    fn add(rt: &mut dyn Runtime<SimulatedStack>, node: NodeId) -> Result<Signal> {
        {
            let (mut b, stack) = rt.graph_mut().parts(node)?;
            let right = stack.pop(&mut b)?;
            let left = stack.pop(&mut b)?;
            let sum = b.add(left, right)?;
            stack.push(&mut b, sum)?;
        }
        rt.default_fallthrough(node, 1)?;
        Ok(Signal::Continue)
    }

    fn ret(rt: &mut dyn Runtime<SimulatedStack>, node: NodeId) -> Result<Signal> {
        let value = {
            let (mut b, stack) = rt.graph_mut().parts(node)?;
            stack.pop(&mut b)?
        };
        rt.exit(node, Some(value))?;
        Ok(Signal::Returned)
    }

    fn registry() -> Arc<HandlerRegistry<SimulatedStack>> {
        let mut registry = HandlerRegistry::new();
        registry.register(0, "push", push).unwrap();
        registry.register(1, "add", add).unwrap();
        registry.register(2, "ret", ret).unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_compile_all_publishes_by_index() {
        let streams: Vec<Vec<u8>> = (0..8u8).map(|i| vec![0, i, 0, 10, 1, 2]).collect();
        let methods: Vec<_> = streams
            .iter()
            .enumerate()
            .map(|(i, s)| MethodSource::new(&format!("m{i}"), IrType::Int64, s))
            .collect();

        let cache = CodeCache::new();
        compile_all(&methods, &registry(), BuildConfig::default(), &cache, |_, _| {
            Ok(SimulatedStack::new("stack", IrType::Int64))
        })
        .unwrap();

        assert_eq!(cache.len(), methods.len());
        for i in 0..methods.len() {
            let ir = cache.get(i).unwrap();
            assert_eq!(ir.name(), format!("m{i}"));
            let outcome = Evaluator::new().run(&ir, &[]).unwrap();
            assert_eq!(outcome.value, Some(i as i64 + 10));
        }
        assert!(cache.invalidate(0).is_some());
        assert!(!cache.contains(0));
    }

    #[test]
    fn test_failing_method_reports_error() {
        let good = [0, 1, 2];
        let bad = [7];
        let methods = vec![
            MethodSource::new("good", IrType::Int64, &good),
            MethodSource::new("bad", IrType::Int64, &bad),
        ];
        let cache = CodeCache::new();
        let err = compile_all(&methods, &registry(), BuildConfig::default(), &cache, |_, _| {
            Ok(SimulatedStack::new("stack", IrType::Int64))
        })
        .unwrap_err();
        assert!(matches!(err, Error::UnknownOpcode { opcode: 7, offset: 0 }));
        assert!(!cache.contains(1));
    }
}
