use crate::cf::{ClassParser, CodeAttribute, Constant, ConstantPool};
use crate::rop::{
    ArrayElem, Binop, CmpKind, ConstValue, IfCond, InvokeKind, MemKind, Trunc, TypeTag,
};
use crate::{Error, ParseError};

/// One decoded JVM stack-machine instruction
///
/// Everything needing the constant pool (field/method descriptors, `ldc`
/// payloads) is resolved at decode time, so later stages never touch pool
/// tags again.
#[derive(Debug, Clone, PartialEq)]
pub enum JInsn {
    Nop,
    Const(ConstValue),
    Load { slot: u16, tag: TypeTag },
    Store { slot: u16, tag: TypeTag },
    ArrayLoad { kind: MemKind, tag: TypeTag },
    ArrayStore { kind: MemKind, tag: TypeTag },
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Swap,
    Binop { op: Binop, tag: TypeTag },
    Neg(TypeTag),
    Iinc { slot: u16, amount: i16 },
    Conv { from: TypeTag, to: TypeTag },
    Truncate(Trunc),
    Cmp(CmpKind),
    /// `vs_zero` distinguishes `ifeq` from `if_icmpeq`; `object` marks the
    /// `if_acmp*` / `ifnull` / `ifnonnull` family
    If { cond: IfCond, vs_zero: bool, object: bool, target: u32 },
    Goto { target: u32 },
    TableSwitch { default: u32, low: i32, targets: Vec<u32> },
    LookupSwitch { default: u32, pairs: Vec<(i32, u32)> },
    Return(Option<TypeTag>),
    GetStatic { index: u16, kind: MemKind, tag: TypeTag },
    PutStatic { index: u16, kind: MemKind, tag: TypeTag },
    GetField { index: u16, kind: MemKind, tag: TypeTag },
    PutField { index: u16, kind: MemKind, tag: TypeTag },
    Invoke { kind: InvokeKind, index: u16, arg_words: u16, ret: Option<TypeTag> },
    New { index: u16 },
    NewArray(ArrayElem),
    ArrayLength,
    Throw,
    CheckCast { index: u16 },
    InstanceOf { index: u16 },
    MonitorEnter,
    MonitorExit,
}

/// A decoded method body: instructions keyed by original bytecode address
#[derive(Debug)]
pub struct DecodedMethod {
    pub insns: Vec<(u32, JInsn)>,
    /// Total length of the original bytecode array
    pub byte_len: u32,
}

impl DecodedMethod {
    /// Index of the instruction at a given pc
    pub fn index_of_pc(&self, pc: u32) -> Option<usize> {
        self.insns.binary_search_by_key(&pc, |(at, _)| *at).ok()
    }
}

/// Decode the bytecode array of one `Code` attribute
///
/// Unknown or unimplemented opcodes are a hard failure: downstream stages
/// assume they saw every instruction.
pub fn decode_code(code: &CodeAttribute, pool: &ConstantPool) -> Result<DecodedMethod, Error> {
    let mut decoder = Decoder {
        parser: ClassParser::new(&code.bytecode),
        pool,
    };
    let mut insns = vec![];

    while decoder.parser.remaining() > 0 {
        let pc = decoder.parser.offset() as u32;
        let insn = decoder.decode_one(pc)?;
        insns.push((pc, insn));
    }

    Ok(DecodedMethod {
        insns,
        byte_len: code.bytecode.len() as u32,
    })
}

struct Decoder<'a> {
    parser: ClassParser<'a>,
    pool: &'a ConstantPool,
}

impl Decoder<'_> {
    fn u8(&mut self) -> Result<u8, ParseError> {
        self.parser.u8("instruction operand")
    }

    fn u16(&mut self) -> Result<u16, ParseError> {
        self.parser.u16("instruction operand")
    }

    fn branch16(&mut self, pc: u32) -> Result<u32, ParseError> {
        let offset = self.u16()? as i16;
        Ok(pc.wrapping_add(offset as i32 as u32))
    }

    fn branch32(&mut self, pc: u32) -> Result<u32, ParseError> {
        let offset = self.parser.i32("wide branch offset")?;
        Ok(pc.wrapping_add(offset as u32))
    }

    fn field(&mut self, pc: u32) -> Result<(u16, MemKind, TypeTag), Error> {
        let index = self.u16()?;
        let (_, _, descriptor) = self.pool.field_ref_at(index)?;
        let (kind, tag) = MemKind::from_descriptor(descriptor).ok_or(ParseError {
            offset: pc as usize,
            expected: "field descriptor",
        })?;
        Ok((index, kind, tag))
    }

    fn invoke(&mut self, kind: InvokeKind, pc: u32) -> Result<JInsn, Error> {
        let index = self.u16()?;
        if kind == InvokeKind::Interface {
            // `invokeinterface` carries a redundant count byte and a zero pad
            self.u8()?;
            self.u8()?;
        }
        let (_, _, descriptor) = self.pool.method_ref_at(index)?;
        let (params, ret) = parse_method_descriptor(descriptor).ok_or(ParseError {
            offset: pc as usize,
            expected: "method descriptor",
        })?;
        let receiver = if kind == InvokeKind::Static { 0 } else { 1 };
        let arg_words: u16 =
            receiver + params.iter().map(|tag| tag.category() as u16).sum::<u16>();
        Ok(JInsn::Invoke {
            kind,
            index,
            arg_words,
            ret,
        })
    }

    fn ldc(&mut self, index: u16, pc: u32) -> Result<JInsn, Error> {
        let value = match self.pool.get(index) {
            Some(Constant::Integer(value)) => ConstValue::Int(*value),
            Some(Constant::Float(bits)) => ConstValue::Float(*bits),
            Some(Constant::Long(value)) => ConstValue::Long(*value),
            Some(Constant::Double(bits)) => ConstValue::Double(*bits),
            Some(Constant::String { .. }) => ConstValue::String(index),
            Some(Constant::Class { .. }) => ConstValue::Class(index),
            _ => {
                return Err(Error::MalformedInput(ParseError {
                    offset: pc as usize,
                    expected: "loadable constant",
                }))
            }
        };
        Ok(JInsn::Const(value))
    }

    fn decode_one(&mut self, pc: u32) -> Result<JInsn, Error> {
        use TypeTag::*;

        let opcode = self.parser.u8("opcode")?;
        let unsupported = |opcode| Error::UnsupportedBytecode { offset: pc, opcode };

        let insn = match opcode {
            0x00 => JInsn::Nop,
            0x01 => JInsn::Const(ConstValue::Null),
            0x02..=0x08 => JInsn::Const(ConstValue::Int(opcode as i32 - 0x03)),
            0x09 | 0x0a => JInsn::Const(ConstValue::Long((opcode - 0x09) as i64)),
            0x0b..=0x0d => {
                JInsn::Const(ConstValue::Float(((opcode - 0x0b) as f32).to_bits()))
            }
            0x0e | 0x0f => {
                JInsn::Const(ConstValue::Double(((opcode - 0x0e) as f64).to_bits()))
            }
            0x10 => JInsn::Const(ConstValue::Int(self.u8()? as i8 as i32)),
            0x11 => JInsn::Const(ConstValue::Int(self.u16()? as i16 as i32)),
            0x12 => {
                let index = self.u8()? as u16;
                self.ldc(index, pc)?
            }
            0x13 | 0x14 => {
                let index = self.u16()?;
                self.ldc(index, pc)?
            }

            0x15..=0x19 => {
                let tag = [Int, Long, Float, Double, Object][(opcode - 0x15) as usize];
                JInsn::Load { slot: self.u8()? as u16, tag }
            }
            0x1a..=0x2d => {
                let tag = [Int, Long, Float, Double, Object][((opcode - 0x1a) / 4) as usize];
                JInsn::Load { slot: ((opcode - 0x1a) % 4) as u16, tag }
            }
            0x2e..=0x35 => {
                let (kind, tag) = ARRAY_ACCESS[(opcode - 0x2e) as usize];
                JInsn::ArrayLoad { kind, tag }
            }
            0x36..=0x3a => {
                let tag = [Int, Long, Float, Double, Object][(opcode - 0x36) as usize];
                JInsn::Store { slot: self.u8()? as u16, tag }
            }
            0x3b..=0x4e => {
                let tag = [Int, Long, Float, Double, Object][((opcode - 0x3b) / 4) as usize];
                JInsn::Store { slot: ((opcode - 0x3b) % 4) as u16, tag }
            }
            0x4f..=0x56 => {
                let (kind, tag) = ARRAY_ACCESS[(opcode - 0x4f) as usize];
                JInsn::ArrayStore { kind, tag }
            }

            0x57 => JInsn::Pop,
            0x58 => JInsn::Pop2,
            0x59 => JInsn::Dup,
            0x5a => JInsn::DupX1,
            0x5b => JInsn::DupX2,
            0x5c => JInsn::Dup2,
            0x5f => JInsn::Swap,
            // dup2_x1 / dup2_x2 are vanishingly rare in javac output
            0x5d | 0x5e => return Err(unsupported(opcode)),

            0x60..=0x73 => {
                let op = [Binop::Add, Binop::Sub, Binop::Mul, Binop::Div, Binop::Rem]
                    [((opcode - 0x60) / 4) as usize];
                let tag = [Int, Long, Float, Double][((opcode - 0x60) % 4) as usize];
                JInsn::Binop { op, tag }
            }
            0x74..=0x77 => JInsn::Neg([Int, Long, Float, Double][(opcode - 0x74) as usize]),
            0x78..=0x7d => {
                let op = [Binop::Shl, Binop::Shr, Binop::Ushr][((opcode - 0x78) / 2) as usize];
                let tag = [Int, Long][((opcode - 0x78) % 2) as usize];
                JInsn::Binop { op, tag }
            }
            0x7e..=0x83 => {
                let op = [Binop::And, Binop::Or, Binop::Xor][((opcode - 0x7e) / 2) as usize];
                let tag = [Int, Long][((opcode - 0x7e) % 2) as usize];
                JInsn::Binop { op, tag }
            }
            0x84 => JInsn::Iinc {
                slot: self.u8()? as u16,
                amount: self.u8()? as i8 as i16,
            },

            0x85..=0x90 => {
                let from = [Int, Long, Float, Double][((opcode - 0x85) / 3) as usize];
                let to_choices: [TypeTag; 3] = match from {
                    Int => [Long, Float, Double],
                    Long => [Int, Float, Double],
                    Float => [Int, Long, Double],
                    _ => [Int, Long, Float],
                };
                JInsn::Conv {
                    from,
                    to: to_choices[((opcode - 0x85) % 3) as usize],
                }
            }
            0x91 => JInsn::Truncate(Trunc::Byte),
            0x92 => JInsn::Truncate(Trunc::Char),
            0x93 => JInsn::Truncate(Trunc::Short),

            0x94 => JInsn::Cmp(CmpKind::CmpLong),
            0x95 => JInsn::Cmp(CmpKind::CmplFloat),
            0x96 => JInsn::Cmp(CmpKind::CmpgFloat),
            0x97 => JInsn::Cmp(CmpKind::CmplDouble),
            0x98 => JInsn::Cmp(CmpKind::CmpgDouble),

            0x99..=0x9e => JInsn::If {
                cond: IF_CONDS[(opcode - 0x99) as usize],
                vs_zero: true,
                object: false,
                target: self.branch16(pc)?,
            },
            0x9f..=0xa4 => JInsn::If {
                cond: IF_CONDS[(opcode - 0x9f) as usize],
                vs_zero: false,
                object: false,
                target: self.branch16(pc)?,
            },
            0xa5 | 0xa6 => JInsn::If {
                cond: if opcode == 0xa5 { IfCond::Eq } else { IfCond::Ne },
                vs_zero: false,
                object: true,
                target: self.branch16(pc)?,
            },
            0xa7 => JInsn::Goto {
                target: self.branch16(pc)?,
            },

            0xaa => {
                self.align_switch(pc)?;
                let default = self.branch32(pc)?;
                let low = self.parser.i32("tableswitch low")?;
                let high = self.parser.i32("tableswitch high")?;
                if high < low {
                    return Err(self.parser.error("tableswitch high >= low").into());
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(self.branch32(pc)?);
                }
                JInsn::TableSwitch { default, low, targets }
            }
            0xab => {
                self.align_switch(pc)?;
                let default = self.branch32(pc)?;
                let count = self.parser.i32("lookupswitch npairs")?;
                if count < 0 {
                    return Err(self.parser.error("non-negative npairs").into());
                }
                let mut pairs = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let key = self.parser.i32("lookupswitch key")?;
                    pairs.push((key, self.branch32(pc)?));
                }
                JInsn::LookupSwitch { default, pairs }
            }

            0xac..=0xb0 => {
                JInsn::Return(Some([Int, Long, Float, Double, Object][(opcode - 0xac) as usize]))
            }
            0xb1 => JInsn::Return(None),

            0xb2 => {
                let (index, kind, tag) = self.field(pc)?;
                JInsn::GetStatic { index, kind, tag }
            }
            0xb3 => {
                let (index, kind, tag) = self.field(pc)?;
                JInsn::PutStatic { index, kind, tag }
            }
            0xb4 => {
                let (index, kind, tag) = self.field(pc)?;
                JInsn::GetField { index, kind, tag }
            }
            0xb5 => {
                let (index, kind, tag) = self.field(pc)?;
                JInsn::PutField { index, kind, tag }
            }

            0xb6 => self.invoke(InvokeKind::Virtual, pc)?,
            0xb7 => self.invoke(InvokeKind::Direct, pc)?,
            0xb8 => self.invoke(InvokeKind::Static, pc)?,
            0xb9 => self.invoke(InvokeKind::Interface, pc)?,

            0xbb => JInsn::New { index: self.u16()? },
            0xbc => {
                let atype = self.u8()?;
                if !(4..=11).contains(&atype) {
                    return Err(self.parser.error("newarray atype").into());
                }
                JInsn::NewArray(ArrayElem::Prim(atype))
            }
            0xbd => JInsn::NewArray(ArrayElem::Class(self.u16()?)),
            0xbe => JInsn::ArrayLength,
            0xbf => JInsn::Throw,
            0xc0 => JInsn::CheckCast { index: self.u16()? },
            0xc1 => JInsn::InstanceOf { index: self.u16()? },
            0xc2 => JInsn::MonitorEnter,
            0xc3 => JInsn::MonitorExit,

            // wide prefix folds into its base instruction
            0xc4 => {
                let wide_op = self.u8()?;
                match wide_op {
                    0x15..=0x19 => {
                        let tag = [Int, Long, Float, Double, Object][(wide_op - 0x15) as usize];
                        JInsn::Load { slot: self.u16()?, tag }
                    }
                    0x36..=0x3a => {
                        let tag = [Int, Long, Float, Double, Object][(wide_op - 0x36) as usize];
                        JInsn::Store { slot: self.u16()?, tag }
                    }
                    0x84 => JInsn::Iinc {
                        slot: self.u16()?,
                        amount: self.u16()? as i16,
                    },
                    _ => return Err(unsupported(wide_op)),
                }
            }

            0xc6 | 0xc7 => JInsn::If {
                cond: if opcode == 0xc6 { IfCond::Eq } else { IfCond::Ne },
                vs_zero: true,
                object: true,
                target: self.branch16(pc)?,
            },
            0xc8 => JInsn::Goto {
                target: self.branch32(pc)?,
            },

            // jsr/ret, invokedynamic, multianewarray, and anything newer
            _ => return Err(unsupported(opcode)),
        };
        Ok(insn)
    }

    /// Skip the 0-3 padding bytes that align a switch payload to 4 bytes
    fn align_switch(&mut self, pc: u32) -> Result<(), ParseError> {
        // operands must start at a 4-byte boundary relative to method start
        let pad = (3 - (pc as usize % 4)) % 4;
        self.parser.bytes(pad, "switch padding")?;
        Ok(())
    }
}

const IF_CONDS: [IfCond; 6] = [
    IfCond::Eq,
    IfCond::Ne,
    IfCond::Lt,
    IfCond::Ge,
    IfCond::Gt,
    IfCond::Le,
];

/// Array access flavors in JVM opcode order (i, l, f, d, a, b, c, s)
const ARRAY_ACCESS: [(MemKind, TypeTag); 8] = [
    (MemKind::Word, TypeTag::Int),
    (MemKind::Wide, TypeTag::Long),
    (MemKind::Word, TypeTag::Float),
    (MemKind::Wide, TypeTag::Double),
    (MemKind::Object, TypeTag::Object),
    (MemKind::Byte, TypeTag::Int),
    (MemKind::Char, TypeTag::Int),
    (MemKind::Short, TypeTag::Int),
];

/// Parse a method descriptor into parameter tags and return tag
///
/// Returns `None` for malformed descriptors. `void` return is `Ok(None)`.
pub fn parse_method_descriptor(descriptor: &str) -> Option<(Vec<TypeTag>, Option<TypeTag>)> {
    let bytes = descriptor.as_bytes();
    if bytes.first() != Some(&b'(') {
        return None;
    }
    let mut params = vec![];
    let mut idx = 1;
    while idx < bytes.len() && bytes[idx] != b')' {
        let (tag, next) = parse_field_type(bytes, idx)?;
        params.push(tag);
        idx = next;
    }
    if idx >= bytes.len() {
        return None;
    }
    idx += 1; // consume ')'
    let ret = if bytes.get(idx) == Some(&b'V') {
        if idx + 1 != bytes.len() {
            return None;
        }
        None
    } else {
        let (tag, next) = parse_field_type(bytes, idx)?;
        if next != bytes.len() {
            return None;
        }
        Some(tag)
    };
    Some((params, ret))
}

fn parse_field_type(bytes: &[u8], idx: usize) -> Option<(TypeTag, usize)> {
    match bytes.get(idx)? {
        b'B' | b'C' | b'S' | b'Z' | b'I' => Some((TypeTag::Int, idx + 1)),
        b'F' => Some((TypeTag::Float, idx + 1)),
        b'J' => Some((TypeTag::Long, idx + 1)),
        b'D' => Some((TypeTag::Double, idx + 1)),
        b'L' => {
            let end = bytes[idx..].iter().position(|b| *b == b';')?;
            Some((TypeTag::Object, idx + end + 1))
        }
        b'[' => {
            let (_, next) = parse_field_type(bytes, idx + 1)?;
            Some((TypeTag::Object, next))
        }
        _ => None,
    }
}

/// Total register units occupied by a parameter list (receiver not included)
pub fn param_width(params: &[TypeTag]) -> u16 {
    params.iter().map(|tag| tag.category() as u16).sum()
}

#[cfg(test)]
mod decode_tests {
    use super::*;

    fn code(bytes: &[u8]) -> CodeAttribute {
        CodeAttribute {
            max_stack: 4,
            max_locals: 4,
            bytecode: bytes.to_vec(),
            handlers: vec![],
            attributes: vec![],
        }
    }

    fn empty_pool() -> ConstantPool {
        ConstantPool::parse(&mut ClassParser::new(&[0x00, 0x01])).unwrap()
    }

    #[test]
    fn add_and_return() {
        // iload_0, iload_1, iadd, ireturn
        let decoded = decode_code(&code(&[0x1a, 0x1b, 0x60, 0xac]), &empty_pool()).unwrap();
        assert_eq!(
            decoded.insns,
            vec![
                (0, JInsn::Load { slot: 0, tag: TypeTag::Int }),
                (1, JInsn::Load { slot: 1, tag: TypeTag::Int }),
                (2, JInsn::Binop { op: Binop::Add, tag: TypeTag::Int }),
                (3, JInsn::Return(Some(TypeTag::Int))),
            ]
        );
    }

    #[test]
    fn branch_targets_are_absolute() {
        // pc 0: ifeq +6 (-> 6); pc 3: goto -3 (-> 0); pc 6: return
        let decoded =
            decode_code(&code(&[0x99, 0x00, 0x06, 0xa7, 0xff, 0xfd, 0xb1]), &empty_pool()).unwrap();
        assert_eq!(
            decoded.insns[0].1,
            JInsn::If { cond: IfCond::Eq, vs_zero: true, object: false, target: 6 }
        );
        assert_eq!(decoded.insns[1].1, JInsn::Goto { target: 0 });
    }

    #[test]
    fn tableswitch_alignment() {
        // pc 0: iconst_0; pc 1: tableswitch, padding to 4, default +15,
        // low 0, high 1, offsets +15 +15; pc 16: return
        let bytes = [
            0x03, 0xaa, 0x00, 0x00, // opcode + 2 pad bytes
            0x00, 0x00, 0x00, 0x0f, // default
            0x00, 0x00, 0x00, 0x00, // low
            0x00, 0x00, 0x00, 0x01, // high
            0x00, 0x00, 0x00, 0x0f, // case 0
            0x00, 0x00, 0x00, 0x0f, // case 1
            0xb1,
        ];
        let decoded = decode_code(&code(&bytes), &empty_pool()).unwrap();
        assert_eq!(
            decoded.insns[1].1,
            JInsn::TableSwitch { default: 16, low: 0, targets: vec![16, 16] }
        );
        assert_eq!(decoded.insns[2], (24, JInsn::Return(None)));
    }

    #[test]
    fn unsupported_opcode_is_hard_failure() {
        // jsr
        let err = decode_code(&code(&[0xa8, 0x00, 0x03]), &empty_pool()).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedBytecode { offset: 0, opcode: 0xa8 }
        ));
    }

    #[test]
    fn method_descriptor_parsing() {
        let (params, ret) = parse_method_descriptor("(IJLjava/lang/String;[I)D").unwrap();
        assert_eq!(
            params,
            vec![TypeTag::Int, TypeTag::Long, TypeTag::Object, TypeTag::Object]
        );
        assert_eq!(ret, Some(TypeTag::Double));
        assert_eq!(param_width(&params), 5);

        let (params, ret) = parse_method_descriptor("()V").unwrap();
        assert!(params.is_empty());
        assert_eq!(ret, None);

        assert!(parse_method_descriptor("(X)V").is_none());
    }
}
