use crate::cf::ConstantPool;
use std::fmt;

/// Value type of a register, as far as this pipeline cares
///
/// Reference types are collapsed to `Object`: register allocation and Dalvik
/// opcode selection only need the width and the word/wide/object distinction,
/// never the class hierarchy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Int,
    Float,
    Long,
    Double,
    Object,
}

impl TypeTag {
    /// Register units occupied: 1 for 32-bit values, 2 for `long`/`double`
    pub fn category(self) -> u32 {
        match self {
            TypeTag::Long | TypeTag::Double => 2,
            _ => 1,
        }
    }

    pub fn is_wide(self) -> bool {
        self.category() == 2
    }
}

/// A register operand: number plus value type
///
/// Wide values occupy registers `reg` and `reg + 1`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RegisterSpec {
    pub reg: u32,
    pub tag: TypeTag,
}

impl RegisterSpec {
    pub fn new(reg: u32, tag: TypeTag) -> RegisterSpec {
        RegisterSpec { reg, tag }
    }

    /// Do the storage ranges of two specs overlap?
    pub fn overlaps(&self, other: &RegisterSpec) -> bool {
        let a = self.reg..self.reg + self.tag.category();
        let b = other.reg..other.reg + other.tag.category();
        a.start < b.end && b.start < a.end
    }
}

impl fmt::Display for RegisterSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "v{}:{:?}", self.reg, self.tag)
    }
}

/// A constant operand
///
/// Floats and doubles are raw bit patterns; strings and classes are indices
/// into the constant pool the method was compiled against.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConstValue {
    Int(i32),
    Long(i64),
    Float(u32),
    Double(u64),
    Null,
    String(u16),
    Class(u16),
}

impl ConstValue {
    pub fn tag(self) -> TypeTag {
        match self {
            ConstValue::Int(_) => TypeTag::Int,
            ConstValue::Long(_) => TypeTag::Long,
            ConstValue::Float(_) => TypeTag::Float,
            ConstValue::Double(_) => TypeTag::Double,
            ConstValue::Null | ConstValue::String(_) | ConstValue::Class(_) => TypeTag::Object,
        }
    }
}

/// Two-operand arithmetic/bitwise operators
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Binop {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

/// Branch conditions, shared by the two-register and versus-zero forms
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IfCond {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

/// `cmp`-kind fused comparisons
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CmpKind {
    CmpLong,
    CmplFloat,
    CmpgFloat,
    CmplDouble,
    CmpgDouble,
}

/// Storage flavor of a field or array element
///
/// This is what picks between `aget`/`aget-wide`/`aget-object`/`aget-byte`/...
/// and the matching `iget`/`sget` families.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemKind {
    Word,
    Wide,
    Object,
    Boolean,
    Byte,
    Char,
    Short,
}

impl MemKind {
    /// Classify a field descriptor's leading character
    pub fn from_descriptor(descriptor: &str) -> Option<(MemKind, TypeTag)> {
        Some(match descriptor.as_bytes().first()? {
            b'Z' => (MemKind::Boolean, TypeTag::Int),
            b'B' => (MemKind::Byte, TypeTag::Int),
            b'C' => (MemKind::Char, TypeTag::Int),
            b'S' => (MemKind::Short, TypeTag::Int),
            b'I' => (MemKind::Word, TypeTag::Int),
            b'F' => (MemKind::Word, TypeTag::Float),
            b'J' => (MemKind::Wide, TypeTag::Long),
            b'D' => (MemKind::Wide, TypeTag::Double),
            b'L' | b'[' => (MemKind::Object, TypeTag::Object),
            _ => return None,
        })
    }
}

/// Invocation kinds surviving into Dalvik
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,
    Super,
    Direct,
    Static,
    Interface,
}

/// Element type of a `new-array`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArrayElem {
    /// Primitive `newarray` atype code (4 = boolean .. 11 = long)
    Prim(u8),
    /// Object array with the element class at this pool index
    Class(u16),
}

/// Integer truncations (`i2b`/`i2c`/`i2s`)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Trunc {
    Byte,
    Char,
    Short,
}

/// Register-machine opcode, the discriminant half of an [`Insn`]
///
/// One flat sum type instead of an instruction class hierarchy: consumers
/// match exhaustively, and positional invariants (result-fetch placement)
/// become structural checks over variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Rop {
    Nop,
    /// Register-to-register copy
    Move,
    /// Materialize the incoming argument occupying this parameter slot
    MoveParam(u16),
    /// Fetch the pending exception at the head of a handler block
    MoveException,
    /// Fetch the result of the preceding invoke
    MoveResult,
    /// Fetch the result of a preceding non-invoke throwing instruction
    MoveResultPseudo,
    Const(ConstValue),
    Goto,
    /// Two sources compare registers; one source compares against zero/null
    If(IfCond),
    /// Case keys, in emission order; the default edge is the primary successor
    Switch(Vec<i32>),
    Binop(Binop),
    Neg,
    /// Numeric conversion to the result's type
    Conv,
    Truncate(Trunc),
    Cmp(CmpKind),
    /// Zero sources for `void`, one source otherwise
    Return,
    ArrayLength,
    Throw,
    MonitorEnter,
    MonitorExit,
    ArrayGet(MemKind),
    ArrayPut(MemKind),
    NewInstance(u16),
    NewArray(ArrayElem),
    CheckCast(u16),
    InstanceOf(u16),
    GetField { field: u16, kind: MemKind },
    PutField { field: u16, kind: MemKind },
    GetStatic { field: u16, kind: MemKind },
    PutStatic { field: u16, kind: MemKind },
    Invoke { kind: InvokeKind, method: u16, arg_words: u16 },
}

/// How an instruction may leave its block
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Branchingness {
    /// Straight-line: may not end a block
    None,
    Goto,
    If,
    Switch,
    Return,
    Throw,
}

/// One Rop-form instruction
///
/// Throwing instructions that produce a value carry `result: None` here; the
/// value is materialized by a `MoveResult`/`MoveResultPseudo` at the head of
/// the primary successor block.
#[derive(Debug, Clone, PartialEq)]
pub struct Insn {
    pub op: Rop,
    pub result: Option<RegisterSpec>,
    pub sources: Vec<RegisterSpec>,
}

impl Insn {
    pub fn new(op: Rop, result: Option<RegisterSpec>, sources: Vec<RegisterSpec>) -> Insn {
        Insn {
            op,
            result,
            sources,
        }
    }

    pub fn branchingness(&self) -> Branchingness {
        match self.op {
            Rop::Goto => Branchingness::Goto,
            Rop::If(_) => Branchingness::If,
            Rop::Switch(_) => Branchingness::Switch,
            Rop::Return => Branchingness::Return,
            Rop::Throw => Branchingness::Throw,
            _ => Branchingness::None,
        }
    }

    /// Can this instruction transfer control to an exception handler?
    pub fn can_throw(&self) -> bool {
        match &self.op {
            Rop::Throw
            | Rop::MonitorEnter
            | Rop::MonitorExit
            | Rop::ArrayLength
            | Rop::ArrayGet(_)
            | Rop::ArrayPut(_)
            | Rop::NewInstance(_)
            | Rop::NewArray(_)
            | Rop::CheckCast(_)
            | Rop::InstanceOf(_)
            | Rop::GetField { .. }
            | Rop::PutField { .. }
            | Rop::GetStatic { .. }
            | Rop::PutStatic { .. }
            | Rop::Invoke { .. } => true,
            // Integer division and remainder trap on zero
            Rop::Binop(Binop::Div) | Rop::Binop(Binop::Rem) => matches!(
                self.sources.first().map(|s| s.tag),
                Some(TypeTag::Int) | Some(TypeTag::Long)
            ),
            _ => false,
        }
    }

    /// Instructions that must survive dead-code removal even when their
    /// result is unread
    ///
    /// Anything with branch semantics (including every can-throw instruction,
    /// since those end their blocks) stays. Result-slot instructions are a
    /// distinct kind with their own placement invariant and are never deleted
    /// independently of the thrower they belong to; parameter bindings
    /// likewise stay.
    pub fn has_side_effect(&self) -> bool {
        if self.branchingness() != Branchingness::None || self.can_throw() {
            return true;
        }
        matches!(
            self.op,
            Rop::MoveResult | Rop::MoveResultPseudo | Rop::MoveException | Rop::MoveParam(_)
        )
    }

    /// Is this one of the synthetic leading result-fetch instructions?
    pub fn is_result_fetch(&self) -> bool {
        matches!(
            self.op,
            Rop::MoveResult | Rop::MoveResultPseudo | Rop::MoveException
        )
    }

    /// Render for dump output, resolving pool indices to names where easy
    pub fn display<'a>(&'a self, pool: &'a ConstantPool) -> InsnDisplay<'a> {
        InsnDisplay { insn: self, pool }
    }
}

pub struct InsnDisplay<'a> {
    insn: &'a Insn,
    pool: &'a ConstantPool,
}

impl fmt::Display for InsnDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.insn.result {
            Some(result) => write!(f, "{} <- ", result)?,
            None => {}
        }
        match &self.insn.op {
            Rop::Invoke { kind, method, .. } => {
                let name = self
                    .pool
                    .method_ref_at(*method)
                    .map(|(c, n, _)| format!("{}.{}", c, n))
                    .unwrap_or_else(|_| format!("#{}", method));
                write!(f, "invoke-{:?} {}", kind, name)?;
            }
            op => write!(f, "{:?}", op)?,
        }
        for source in &self.insn.sources {
            write!(f, " {}", source)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod insn_tests {
    use super::*;

    fn insn(op: Rop, sources: Vec<RegisterSpec>) -> Insn {
        Insn::new(op, None, sources)
    }

    #[test]
    fn int_division_throws_but_float_does_not() {
        let int_div = insn(
            Rop::Binop(Binop::Div),
            vec![
                RegisterSpec::new(0, TypeTag::Int),
                RegisterSpec::new(1, TypeTag::Int),
            ],
        );
        let float_div = insn(
            Rop::Binop(Binop::Div),
            vec![
                RegisterSpec::new(0, TypeTag::Float),
                RegisterSpec::new(1, TypeTag::Float),
            ],
        );
        assert!(int_div.can_throw());
        assert!(!float_div.can_throw());
    }

    #[test]
    fn wide_registers_overlap_their_pair() {
        let wide = RegisterSpec::new(2, TypeTag::Long);
        assert!(wide.overlaps(&RegisterSpec::new(3, TypeTag::Int)));
        assert!(wide.overlaps(&RegisterSpec::new(1, TypeTag::Double)));
        assert!(!wide.overlaps(&RegisterSpec::new(4, TypeTag::Int)));
    }

    #[test]
    fn branchingness_partitions_ops() {
        assert_eq!(
            insn(Rop::Return, vec![]).branchingness(),
            Branchingness::Return
        );
        assert_eq!(insn(Rop::Move, vec![]).branchingness(), Branchingness::None);
    }
}
