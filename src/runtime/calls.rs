//! Calls between interpreted and compiled frames.
//!
//! Interpreted frames keep their operand stack in memory, compiled frames may keep it in IR
//! values. A call therefore has to move the caller's state to wherever the callee expects its
//! arguments and bring the result back into the caller's state afterwards:
//!
//! | Transition | Before the call | Call | After the call |
//! |------------|-----------------|------|----------------|
//! | interpreted → interpreted | commit | callee pops arguments from memory | adjust depth, reload |
//! | interpreted → compiled | pop arguments, commit | arguments passed directly | reload, push result |
//! | compiled → interpreted | commit | callee pops arguments from memory | adjust depth, reload |
//! | compiled → compiled | pop arguments | arguments passed directly | push result |
//!
//! In all four cases the caller's stack ends up holding the result in place of the arguments.

use strum::{Display, EnumIter};
use tracing::debug;

use crate::{
    ir::{Emitter, FunctionId, ValueId},
    runtime::FrameKind,
    state::{MachineState, VmStack},
    Result,
};

/// The four caller and callee combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Transition {
    /// Interpreted caller, interpreted callee
    InterpToInterp,
    /// Interpreted caller, compiled callee
    InterpToCompiled,
    /// Compiled caller, interpreted callee
    CompiledToInterp,
    /// Compiled caller, compiled callee
    CompiledToCompiled,
}

impl Transition {
    /// Classifies a call from `caller` into `callee`.
    #[must_use]
    pub const fn between(caller: FrameKind, callee: FrameKind) -> Self {
        match (caller, callee) {
            (FrameKind::Interpreted, FrameKind::Interpreted) => Transition::InterpToInterp,
            (FrameKind::Interpreted, FrameKind::Compiled) => Transition::InterpToCompiled,
            (FrameKind::Compiled, FrameKind::Interpreted) => Transition::CompiledToInterp,
            (FrameKind::Compiled, FrameKind::Compiled) => Transition::CompiledToCompiled,
        }
    }

    /// Kind of the calling frame.
    #[must_use]
    pub const fn caller(self) -> FrameKind {
        match self {
            Transition::InterpToInterp | Transition::InterpToCompiled => FrameKind::Interpreted,
            Transition::CompiledToInterp | Transition::CompiledToCompiled => FrameKind::Compiled,
        }
    }

    /// Kind of the called frame.
    #[must_use]
    pub const fn callee(self) -> FrameKind {
        match self {
            Transition::InterpToInterp | Transition::CompiledToInterp => FrameKind::Interpreted,
            Transition::InterpToCompiled | Transition::CompiledToCompiled => FrameKind::Compiled,
        }
    }

    /// Returns `true` if arguments are passed through the caller's memory stack.
    #[must_use]
    pub const fn passes_in_memory(self) -> bool {
        matches!(self.callee(), FrameKind::Interpreted)
    }
}

/// Description of one call emitted by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// Kind of frame the callee runs in
    pub callee: FrameKind,
    /// Function implementing the call, or the interpreter entry for interpreted callees
    pub function: FunctionId,
    /// Number of arguments taken from the caller's stack
    pub args: usize,
    /// Whether the callee leaves a result on the caller's stack
    pub returns: bool,
    /// Values passed ahead of the stack arguments, e.g. a frame pointer or method handle
    pub leading: Vec<ValueId>,
}

impl CallSite {
    /// Creates a call site consuming `args` stack values and returning one.
    #[must_use]
    pub fn new(callee: FrameKind, function: FunctionId, args: usize) -> Self {
        Self {
            callee,
            function,
            args,
            returns: true,
            leading: Vec::new(),
        }
    }

    /// Sets whether the callee returns a value.
    #[must_use]
    pub fn returns(mut self, returns: bool) -> Self {
        self.returns = returns;
        self
    }

    /// Sets the values passed ahead of the stack arguments.
    #[must_use]
    pub fn leading(mut self, leading: Vec<ValueId>) -> Self {
        self.leading = leading;
        self
    }
}

/// Emits `site` called from a frame of kind `caller`.
///
/// # Arguments
///
/// * `caller` - Kind of the frame being built
/// * `site` - The call
/// * `state` - The caller's operand stack
/// * `b` - Emitter of the node holding the call
///
/// # Errors
///
/// Returns an error if the stack holds fewer than `site.args` values, if arguments have to be
/// passed through memory but `state` has no memory backing, or if a directly called function
/// declared to return a result yields none.
pub fn emit_call<T>(
    caller: FrameKind,
    site: &CallSite,
    state: &mut T,
    b: &mut Emitter<'_>,
) -> Result<Transition>
where
    T: VmStack + MachineState,
{
    let transition = Transition::between(caller, site.callee);
    debug!(%transition, args = site.args, node = %b.node(), "emitting call");

    if transition.passes_in_memory() {
        if !state.is_memory_backed() {
            return Err(contract_violation!(
                "{} call from {} needs the caller's stack in memory, but it has no backing",
                transition,
                b.node()
            ));
        }
        state.commit(b)?;
        b.call(site.function, &site.leading)?;
        let delta = isize::from(site.returns) - site.args as isize;
        state.adjust_depth(b, delta)?;
        state.reload(b)?;
        return Ok(transition);
    }

    let mut args = Vec::with_capacity(site.leading.len() + site.args);
    args.extend_from_slice(&site.leading);
    let first = args.len();
    for _ in 0..site.args {
        args.push(state.pop(b)?);
    }
    args[first..].reverse();

    let materialize = transition == Transition::InterpToCompiled;
    if materialize {
        state.commit(b)?;
    }
    let result = b.call(site.function, &args)?;
    if materialize {
        state.reload(b)?;
    }

    if site.returns {
        let value = result.ok_or_else(|| {
            contract_violation!(
                "function f{} is called for a result but returns nothing",
                site.function.index()
            )
        })?;
        state.push(b, value)?;
    }
    Ok(transition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ir::IrType, state::SimulatedStack, test::ScratchNode};
    use strum::IntoEnumIterator;

    #[test]
    fn test_transition_round_trips() {
        for transition in Transition::iter() {
            assert_eq!(
                Transition::between(transition.caller(), transition.callee()),
                transition
            );
        }
    }

    #[test]
    fn test_direct_call_passes_arguments_in_order() {
        let mut scratch = ScratchNode::new();
        let mut b = scratch.emitter();
        let f = b
            .declare_function("sub", IrType::Int64, &[IrType::Int64, IrType::Int64])
            .unwrap();
        let mut stack = SimulatedStack::new("stack", IrType::Int64);
        let (x, y) = (b.const_i64(10), b.const_i64(4));
        stack.push(&mut b, x).unwrap();
        stack.push(&mut b, y).unwrap();

        let site = CallSite::new(FrameKind::Compiled, f, 2);
        let t = emit_call(FrameKind::Compiled, &site, &mut stack, &mut b).unwrap();
        assert_eq!(t, Transition::CompiledToCompiled);
        assert_eq!(stack.depth(), Some(1));
        drop(b);
        assert_eq!(scratch.listing(), vec![format!("v2 = call f0 ({x}, {y})")]);
    }

    #[test]
    fn test_memory_call_requires_backing() {
        let mut scratch = ScratchNode::new();
        let mut b = scratch.emitter();
        let f = b
            .declare_function("interp", IrType::NoType, &[])
            .unwrap();
        let mut stack = SimulatedStack::new("stack", IrType::Int64);
        let arg = b.const_i64(41);
        stack.push(&mut b, arg).unwrap();

        for caller in [FrameKind::Compiled, FrameKind::Interpreted] {
            let site = CallSite::new(FrameKind::Interpreted, f, 1);
            let err = emit_call(caller, &site, &mut stack, &mut b).unwrap_err();
            assert!(matches!(err, crate::Error::ContractViolation { .. }));
        }
        assert_eq!(stack.cells(), &[arg]);
    }

    #[test]
    fn test_missing_result_rejected() {
        let mut scratch = ScratchNode::new();
        let mut b = scratch.emitter();
        let f = b.declare_function("sink", IrType::NoType, &[]).unwrap();
        let mut stack = SimulatedStack::new("stack", IrType::Int64);
        let site = CallSite::new(FrameKind::Compiled, f, 0);
        assert!(emit_call(FrameKind::Compiled, &site, &mut stack, &mut b).is_err());
    }
}
