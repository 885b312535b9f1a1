use std::fmt;

/// Everything that can go wrong when compiling a class
#[derive(Debug)]
pub enum Error {
    /// The input bytes are not a structurally valid class file
    ///
    /// This is always surfaced immediately and aborts the whole class.
    MalformedInput(ParseError),

    /// A method body uses an opcode the compiler does not implement
    ///
    /// Only the offending method fails; other methods in the same class can
    /// still compile.
    UnsupportedBytecode {
        /// Offset of the instruction inside the method's bytecode array
        offset: u32,
        opcode: u8,
    },

    /// An internal consistency check failed somewhere in the pipeline
    ///
    /// Never patched over: masking one of these would mean emitting incorrect
    /// bytecode.
    VerificationInconsistency(Inconsistency),

    /// A register index, branch offset, or literal does not fit the field
    /// width of any available target encoding
    ///
    /// Recoverable at the batch level (skip the method, keep the rest).
    CapacityExceeded {
        what: &'static str,
        value: i64,
    },

    IoError(std::io::Error),
}

/// A structural parse failure, pinned to the offset where it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Byte offset into the input buffer
    pub offset: usize,
    /// What the parser was trying to read
    pub expected: &'static str,
}

/// Internal invariant violations, by pipeline stage
#[derive(Debug)]
pub enum Inconsistency {
    /// Operand stacks or locals disagree at a control-flow merge point
    FrameMerge { at_pc: u32, detail: &'static str },

    /// A local variable slot was read before any definition reaches it
    UndefinedLocal { at_pc: u32, slot: u16 },

    /// Operand stack underflow or overflow during simulation
    StackDepth { at_pc: u32 },

    /// A result-fetch instruction is somewhere other than the unique leading
    /// position of its thrower's primary successor
    MisplacedResultFetch { block: u32 },

    /// An SSA register is used without a dominating definition
    UndominatedUse { reg: u32 },

    /// The register allocator produced overlapping storage for two
    /// interfering registers
    InterferenceViolation { a: u32, b: u32 },

    /// Lowering expected a leading result-fetch instruction and found none
    MissingResultFetch { block: u32 },

    /// A basic block violates a CFG structural rule
    MalformedBlock { block: u32, detail: &'static str },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "expected {} at offset {}", self.expected, self.offset)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::MalformedInput(err) => write!(f, "malformed class file: {}", err),
            Error::UnsupportedBytecode { offset, opcode } => {
                write!(f, "unsupported opcode 0x{:02x} at pc {}", opcode, offset)
            }
            Error::VerificationInconsistency(inc) => {
                write!(f, "internal consistency error: {:?}", inc)
            }
            Error::CapacityExceeded { what, value } => {
                write!(f, "{} {} exceeds target encoding capacity", what, value)
            }
            Error::IoError(err) => write!(f, "i/o error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::MalformedInput(err)
    }
}

impl From<Inconsistency> for Error {
    fn from(inc: Inconsistency) -> Error {
        Error::VerificationInconsistency(inc)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}
