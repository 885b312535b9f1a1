/// Dalvik instruction formats, named as in the bytecode specification
///
/// The digit is the size in 16-bit code units, the letter count is the
/// operand count, and the trailing letter classifies the operands
/// (`x` registers only, `n`/`s`/`i`/`l` literals, `t` branch target,
/// `c` constant pool reference).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Form {
    F10x,
    F12x,
    F22x,
    F32x,
    F11n,
    F11x,
    F21s,
    F21c,
    F22c,
    F31i,
    F51l,
    F21t,
    F22t,
    F10t,
    F20t,
    F30t,
    F23x,
    F35c,
    F31t,
}

impl Form {
    /// Encoded size in 16-bit code units
    pub fn code_units(self) -> usize {
        match self {
            Form::F10x | Form::F12x | Form::F11n | Form::F11x | Form::F10t => 1,
            Form::F22x
            | Form::F21s
            | Form::F21c
            | Form::F22c
            | Form::F21t
            | Form::F22t
            | Form::F20t
            | Form::F23x => 2,
            Form::F32x | Form::F31i | Form::F30t | Form::F35c | Form::F31t => 3,
            Form::F51l => 5,
        }
    }
}
