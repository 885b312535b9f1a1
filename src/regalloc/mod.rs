//! Register allocation: liveness, interference, and coloring
//!
//! Works over SSA registers. Liveness runs one register at a time with an
//! explicit worklist, the interference graph is a bit matrix over SSA
//! registers, and two allocators produce a [`RegisterMapper`]: a naive one
//! that spaces every register two apart, and a first-fit one that packs
//! registers and rotates parameters to the high end of the frame, where the
//! Dalvik calling convention expects them.

mod allocator;
mod interference;
mod liveness;
mod mapper;

pub use allocator::*;
pub use interference::*;
pub use liveness::*;
pub use mapper::*;
