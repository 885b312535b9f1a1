//! Parse JVM class files and decode method bodies
//!
//! ### Structure
//!
//! [`ClassParser`] is a bounds-checked big-endian cursor over the raw input
//! buffer; every structure in the [class file format][0] is read through it so
//! that a truncated or malformed input always surfaces as a
//! [`ParseError`](crate::ParseError) carrying the offset and the structure the
//! parser was expecting.
//!
//! The parsed [`ClassFile`] owns the interned [`ConstantPool`], the field and
//! method lists, and the raw attributes. Method bodies are decoded separately
//! by [`decode_code`] into the stack-machine instruction list consumed by the
//! Ropper; that split mirrors the fact that the container layout and the
//! bytecode stream are two different binary formats.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html

mod bytecode;
mod class_file;
mod constant_pool;
mod parse;

pub use bytecode::*;
pub use class_file::*;
pub use constant_pool::*;
pub use parse::*;
