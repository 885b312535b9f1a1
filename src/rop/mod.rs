//! Register-based intermediate form ("Rop form") and its construction
//!
//! Rop form sits between the decoded stack-machine instructions and SSA: a
//! control-flow graph of [`BasicBlock`]s whose instructions name explicit
//! registers instead of operand stack positions. Registers `0..max_locals`
//! mirror the JVM local variable slots and `max_locals..` mirror operand
//! stack depths, which keeps block labels and register numbers traceable back
//! to the original bytecode.
//!
//! [`build_rop`] builds Rop form by abstract interpretation of each method's
//! frame, following every normal and exceptional edge.

mod block;
mod insn;
mod ropper;

pub use block::*;
pub use insn::*;
pub use ropper::*;
