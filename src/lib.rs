//! Compile JVM class files into Dalvik register bytecode
//!
//! ### Pipeline
//!
//! Methods are independent compilation units and flow strictly forward through
//! the stages:
//!
//!   1. [`cf`] parses the class file container and decodes each method body
//!      into stack-machine instructions plus an exception handler table
//!   2. [`rop`] converts the stack-machine form into a register-based CFG
//!      ("Rop form") via abstract interpretation of the operand stack
//!   3. [`ssa`] converts Rop form to SSA, runs the optional optimization
//!      passes, and converts back out of SSA once registers are allocated
//!   4. [`regalloc`] computes liveness, builds the interference graph, and
//!      maps SSA registers onto a compact set of Dalvik registers
//!   5. [`dex`] lowers the allocated method into concrete little-endian
//!      16-bit code units
//!
//! The [`compile`] module ties the stages together per method. Nothing in the
//! pipeline is shared across methods except the parsed constant pool, which is
//! immutable after parsing and passed by reference.
//!
//! ### Simple example
//!
//! ```no_run
//! use class2dex::compile::{compile_class, Options};
//!
//! # fn run() -> Result<(), class2dex::Error> {
//! let bytes = std::fs::read("Example.class")?;
//! let class = compile_class(&bytes, &Options::default())?;
//! for method in &class.methods {
//!     println!("{}: {} registers", method.name, method.registers_size);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cf;
pub mod compile;
pub mod dex;
pub mod regalloc;
pub mod rop;
pub mod ssa;
pub mod util;

mod errors;

pub use errors::*;
