// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # jitweave
//!
//! A framework for turning bytecode handlers into IR. One set of opcode handlers produces
//! both the dispatch loop of an interpreter and the IR of individual compiled methods, with the
//! virtual machine's operand stack, locals and registers tracked as simulated machine state.
//!
//! ## Features
//!
//! - **Write handlers once** - the same handler runs inside the generated interpreter and inside
//!   the compiled-method builder, through the [`runtime::Runtime`] surface
//! - **Simulated machine state** - stack cells and locals live in IR values while compiling and
//!   are committed to memory only where needed, e.g. around calls
//! - **Phi-free merges** - predecessors of a join store into shared slots instead of producing
//!   phi nodes
//! - **Cross-frame calls** - the four interpreted/compiled call transitions keep both sides'
//!   stacks consistent
//! - **Record/replay** - a line protocol for capturing builder sessions
//! - **Reference evaluator** - generated IR can be executed directly for testing
//!
//! ## Quick Start
//!
//! ```rust
//! use jitweave::prelude::*;
//! use std::sync::Arc;
//!
//! let mut registry = HandlerRegistry::<SimulatedStack>::new();
//! registry.register(0x01, "push_constant", |rt, node| {
//!     let value = rt.fetch_immediate(node, ImmediateWidth::W8, 1)?;
//!     {
//!         let (mut b, stack) = rt.graph_mut().parts(node)?;
//!         stack.push(&mut b, value)?;
//!     }
//!     rt.default_fallthrough(node, 2)?;
//!     Ok(Signal::Continue)
//! })?;
//! registry.register(0x02, "return", |rt, node| {
//!     let value = {
//!         let (mut b, stack) = rt.graph_mut().parts(node)?;
//!         stack.pop(&mut b)?
//!     };
//!     rt.exit(node, Some(value))?;
//!     Ok(Signal::Returned)
//! })?;
//! let registry = Arc::new(registry);
//!
//! let bytecodes = [0x01, 42, 0x02];
//! let ctor = GraphConstructor::new("answer", IrType::Int64, &bytecodes, registry, BuildConfig::default());
//! let ir = ctor.build(|_| Ok(SimulatedStack::new("stack", IrType::Int64)))?;
//! assert_eq!(Evaluator::new().run(&ir, &[])?.value, Some(42));
//! println!("{}", ir.to_dot());
//! # Ok::<(), jitweave::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - values, operations, the per-node emitter and the finished method IR
//! - [`state`] - the simulated machine state contract and its variants
//! - [`graph`] - builder nodes, merge reconciliation and the compiled-method constructor
//! - [`runtime`] - handler registry, interpreter generation and the call protocol
//! - [`record`] - record/replay line protocol
//! - [`batch`] - parallel compilation of independent methods
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`]. Misuse of the builder API aborts a build with a
//! contract violation; see [`Error`] for the full taxonomy.

#[macro_use]
pub(crate) mod error;

pub mod batch;
pub mod graph;
pub mod ir;
pub mod prelude;
pub mod record;
pub mod runtime;
pub mod state;

#[cfg(test)]
mod test;

/// `jitweave` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `jitweave` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;
