//! Dalvik bytecode emission
//!
//! The translator lays blocks out into a linear trace, lowers each Rop
//! instruction to a Dalvik opcode in the narrowest format that fits its
//! operands, then resolves branch offsets with a widening fixpoint (`goto` /
//! `goto/16` / `goto/32`). Switch payload tables land 4-byte aligned at the
//! end of the method. Anything that cannot fit a format's field widths is a
//! [`crate::Error::CapacityExceeded`]; this stage never spills or rewrites
//! registers.

mod decode;
mod dop;
mod form;
mod translate;

pub use decode::*;
pub use dop::*;
pub use form::*;
pub use translate::*;
