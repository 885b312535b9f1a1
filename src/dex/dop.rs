use crate::dex::Form;
use crate::rop::{Binop, CmpKind, IfCond, InvokeKind, MemKind, Trunc, TypeTag};

/// Dalvik opcode values, selected from Rop operations
///
/// Only the opcodes this backend can produce are listed; the packed tables
/// exploit the regular family layout of the instruction set (`aget` through
/// `aget-short` are consecutive, and so on).
pub mod codes {
    pub const NOP: u8 = 0x00;
    pub const MOVE: u8 = 0x01;
    pub const MOVE_WIDE: u8 = 0x04;
    pub const MOVE_OBJECT: u8 = 0x07;
    pub const MOVE_RESULT: u8 = 0x0a;
    pub const MOVE_EXCEPTION: u8 = 0x0d;
    pub const RETURN_VOID: u8 = 0x0e;
    pub const RETURN: u8 = 0x0f;
    pub const CONST_4: u8 = 0x12;
    pub const CONST_16: u8 = 0x13;
    pub const CONST: u8 = 0x14;
    pub const CONST_WIDE_16: u8 = 0x16;
    pub const CONST_WIDE_32: u8 = 0x17;
    pub const CONST_WIDE: u8 = 0x18;
    pub const CONST_STRING: u8 = 0x1a;
    pub const CONST_CLASS: u8 = 0x1c;
    pub const MONITOR_ENTER: u8 = 0x1d;
    pub const MONITOR_EXIT: u8 = 0x1e;
    pub const CHECK_CAST: u8 = 0x1f;
    pub const INSTANCE_OF: u8 = 0x20;
    pub const ARRAY_LENGTH: u8 = 0x21;
    pub const NEW_INSTANCE: u8 = 0x22;
    pub const NEW_ARRAY: u8 = 0x23;
    pub const THROW: u8 = 0x27;
    pub const GOTO: u8 = 0x28;
    pub const GOTO_16: u8 = 0x29;
    pub const GOTO_32: u8 = 0x2a;
    pub const PACKED_SWITCH: u8 = 0x2b;
    pub const SPARSE_SWITCH: u8 = 0x2c;
    pub const CMPL_FLOAT: u8 = 0x2d;
    pub const IF_EQ: u8 = 0x32;
    pub const IF_EQZ: u8 = 0x38;
    pub const AGET: u8 = 0x44;
    pub const APUT: u8 = 0x4b;
    pub const IGET: u8 = 0x52;
    pub const IPUT: u8 = 0x59;
    pub const SGET: u8 = 0x60;
    pub const SPUT: u8 = 0x67;
    pub const INVOKE_VIRTUAL: u8 = 0x6e;
    pub const NEG_INT: u8 = 0x7b;
    pub const NEG_LONG: u8 = 0x7d;
    pub const NEG_FLOAT: u8 = 0x7f;
    pub const NEG_DOUBLE: u8 = 0x80;
    pub const INT_TO_LONG: u8 = 0x81;
    pub const INT_TO_BYTE: u8 = 0x8d;
    pub const INT_TO_CHAR: u8 = 0x8e;
    pub const INT_TO_SHORT: u8 = 0x8f;
    pub const ADD_INT: u8 = 0x90;
    pub const ADD_LONG: u8 = 0x9b;
    pub const ADD_FLOAT: u8 = 0xa6;
    pub const ADD_DOUBLE: u8 = 0xab;

    /// Identifying first unit of a packed-switch payload
    pub const PACKED_SWITCH_PAYLOAD: u16 = 0x0100;
    /// Identifying first unit of a sparse-switch payload
    pub const SPARSE_SWITCH_PAYLOAD: u16 = 0x0200;
}

/// Offset of a move-family opcode for the value type (plain/wide/object)
fn move_kind_offset(tag: TypeTag) -> u8 {
    match tag {
        TypeTag::Int | TypeTag::Float => 0,
        TypeTag::Long | TypeTag::Double => 1,
        TypeTag::Object => 2,
    }
}

/// `move` / `move-wide` / `move-object`, widened by `step` to the
/// `/from16` (+1) or `/16` (+2) variant
pub fn move_code(tag: TypeTag, step: u8) -> u8 {
    codes::MOVE + move_kind_offset(tag) * 3 + step
}

/// `move-result` family, also covering `move-exception`
pub fn move_result_code(tag: TypeTag) -> u8 {
    codes::MOVE_RESULT + move_kind_offset(tag)
}

pub fn return_code(tag: Option<TypeTag>) -> u8 {
    match tag {
        None => codes::RETURN_VOID,
        Some(tag) => codes::RETURN + move_kind_offset(tag),
    }
}

/// Offset of a memory-access opcode within its family
///
/// The `aget`/`aput`/`iget`/`iput`/`sget`/`sput` families all order their
/// members word, wide, object, boolean, byte, char, short.
fn mem_kind_offset(kind: MemKind) -> u8 {
    match kind {
        MemKind::Word => 0,
        MemKind::Wide => 1,
        MemKind::Object => 2,
        MemKind::Boolean => 3,
        MemKind::Byte => 4,
        MemKind::Char => 5,
        MemKind::Short => 6,
    }
}

pub fn aget_code(kind: MemKind) -> u8 {
    codes::AGET + mem_kind_offset(kind)
}

pub fn aput_code(kind: MemKind) -> u8 {
    codes::APUT + mem_kind_offset(kind)
}

pub fn iget_code(kind: MemKind) -> u8 {
    codes::IGET + mem_kind_offset(kind)
}

pub fn iput_code(kind: MemKind) -> u8 {
    codes::IPUT + mem_kind_offset(kind)
}

pub fn sget_code(kind: MemKind) -> u8 {
    codes::SGET + mem_kind_offset(kind)
}

pub fn sput_code(kind: MemKind) -> u8 {
    codes::SPUT + mem_kind_offset(kind)
}

pub fn invoke_code(kind: InvokeKind) -> u8 {
    codes::INVOKE_VIRTUAL
        + match kind {
            InvokeKind::Virtual => 0,
            InvokeKind::Super => 1,
            InvokeKind::Direct => 2,
            InvokeKind::Static => 3,
            InvokeKind::Interface => 4,
        }
}

fn if_cond_offset(cond: IfCond) -> u8 {
    match cond {
        IfCond::Eq => 0,
        IfCond::Ne => 1,
        IfCond::Lt => 2,
        IfCond::Ge => 3,
        IfCond::Gt => 4,
        IfCond::Le => 5,
    }
}

/// `if-test` (two registers) or `if-testz` (against zero)
pub fn if_code(cond: IfCond, vs_zero: bool) -> u8 {
    let base = if vs_zero { codes::IF_EQZ } else { codes::IF_EQ };
    base + if_cond_offset(cond)
}

pub fn cmp_code(kind: CmpKind) -> u8 {
    codes::CMPL_FLOAT
        + match kind {
            CmpKind::CmplFloat => 0,
            CmpKind::CmpgFloat => 1,
            CmpKind::CmplDouble => 2,
            CmpKind::CmpgDouble => 3,
            CmpKind::CmpLong => 4,
        }
}

fn binop_offset(op: Binop) -> u8 {
    match op {
        Binop::Add => 0,
        Binop::Sub => 1,
        Binop::Mul => 2,
        Binop::Div => 3,
        Binop::Rem => 4,
        Binop::And => 5,
        Binop::Or => 6,
        Binop::Xor => 7,
        Binop::Shl => 8,
        Binop::Shr => 9,
        Binop::Ushr => 10,
    }
}

/// Arithmetic in the three-register (`23x`) form
///
/// Float and double only have the five arithmetic members; the shift and
/// bitwise operators never carry those tags.
pub fn binop_code(op: Binop, tag: TypeTag) -> u8 {
    let base = match tag {
        TypeTag::Int => codes::ADD_INT,
        TypeTag::Long => codes::ADD_LONG,
        TypeTag::Float => codes::ADD_FLOAT,
        TypeTag::Double => codes::ADD_DOUBLE,
        TypeTag::Object => unreachable!("no object arithmetic"),
    };
    base + binop_offset(op)
}

pub fn neg_code(tag: TypeTag) -> u8 {
    match tag {
        TypeTag::Int => codes::NEG_INT,
        TypeTag::Long => codes::NEG_LONG,
        TypeTag::Float => codes::NEG_FLOAT,
        TypeTag::Double => codes::NEG_DOUBLE,
        TypeTag::Object => unreachable!("no object negation"),
    }
}

/// Primitive conversions, laid out from-major in the opcode table
pub fn conv_code(from: TypeTag, to: TypeTag) -> u8 {
    let row = |tag: TypeTag| match tag {
        TypeTag::Int => 0u8,
        TypeTag::Long => 1,
        TypeTag::Float => 2,
        TypeTag::Double => 3,
        TypeTag::Object => unreachable!("no object conversions"),
    };
    let (f, t) = (row(from), row(to));
    // each source row has three entries, targets in row order skipping self
    let col = if t < f { t } else { t - 1 };
    codes::INT_TO_LONG + f * 3 + col
}

pub fn trunc_code(trunc: Trunc) -> u8 {
    match trunc {
        Trunc::Byte => codes::INT_TO_BYTE,
        Trunc::Char => codes::INT_TO_CHAR,
        Trunc::Short => codes::INT_TO_SHORT,
    }
}

/// Mnemonic and format of every opcode this backend emits or decodes
pub fn dop_info(code: u8) -> Option<(&'static str, Form)> {
    use Form::*;
    Some(match code {
        0x00 => ("nop", F10x),
        0x01 => ("move", F12x),
        0x02 => ("move/from16", F22x),
        0x03 => ("move/16", F32x),
        0x04 => ("move-wide", F12x),
        0x05 => ("move-wide/from16", F22x),
        0x06 => ("move-wide/16", F32x),
        0x07 => ("move-object", F12x),
        0x08 => ("move-object/from16", F22x),
        0x09 => ("move-object/16", F32x),
        0x0a => ("move-result", F11x),
        0x0b => ("move-result-wide", F11x),
        0x0c => ("move-result-object", F11x),
        0x0d => ("move-exception", F11x),
        0x0e => ("return-void", F10x),
        0x0f => ("return", F11x),
        0x10 => ("return-wide", F11x),
        0x11 => ("return-object", F11x),
        0x12 => ("const/4", F11n),
        0x13 => ("const/16", F21s),
        0x14 => ("const", F31i),
        0x16 => ("const-wide/16", F21s),
        0x17 => ("const-wide/32", F31i),
        0x18 => ("const-wide", F51l),
        0x1a => ("const-string", F21c),
        0x1c => ("const-class", F21c),
        0x1d => ("monitor-enter", F11x),
        0x1e => ("monitor-exit", F11x),
        0x1f => ("check-cast", F21c),
        0x20 => ("instance-of", F22c),
        0x21 => ("array-length", F12x),
        0x22 => ("new-instance", F21c),
        0x23 => ("new-array", F22c),
        0x27 => ("throw", F11x),
        0x28 => ("goto", F10t),
        0x29 => ("goto/16", F20t),
        0x2a => ("goto/32", F30t),
        0x2b => ("packed-switch", F31t),
        0x2c => ("sparse-switch", F31t),
        0x2d => ("cmpl-float", F23x),
        0x2e => ("cmpg-float", F23x),
        0x2f => ("cmpl-double", F23x),
        0x30 => ("cmpg-double", F23x),
        0x31 => ("cmp-long", F23x),
        0x32 => ("if-eq", F22t),
        0x33 => ("if-ne", F22t),
        0x34 => ("if-lt", F22t),
        0x35 => ("if-ge", F22t),
        0x36 => ("if-gt", F22t),
        0x37 => ("if-le", F22t),
        0x38 => ("if-eqz", F21t),
        0x39 => ("if-nez", F21t),
        0x3a => ("if-ltz", F21t),
        0x3b => ("if-gez", F21t),
        0x3c => ("if-gtz", F21t),
        0x3d => ("if-lez", F21t),
        0x44 => ("aget", F23x),
        0x45 => ("aget-wide", F23x),
        0x46 => ("aget-object", F23x),
        0x47 => ("aget-boolean", F23x),
        0x48 => ("aget-byte", F23x),
        0x49 => ("aget-char", F23x),
        0x4a => ("aget-short", F23x),
        0x4b => ("aput", F23x),
        0x4c => ("aput-wide", F23x),
        0x4d => ("aput-object", F23x),
        0x4e => ("aput-boolean", F23x),
        0x4f => ("aput-byte", F23x),
        0x50 => ("aput-char", F23x),
        0x51 => ("aput-short", F23x),
        0x52 => ("iget", F22c),
        0x53 => ("iget-wide", F22c),
        0x54 => ("iget-object", F22c),
        0x55 => ("iget-boolean", F22c),
        0x56 => ("iget-byte", F22c),
        0x57 => ("iget-char", F22c),
        0x58 => ("iget-short", F22c),
        0x59 => ("iput", F22c),
        0x5a => ("iput-wide", F22c),
        0x5b => ("iput-object", F22c),
        0x5c => ("iput-boolean", F22c),
        0x5d => ("iput-byte", F22c),
        0x5e => ("iput-char", F22c),
        0x5f => ("iput-short", F22c),
        0x60 => ("sget", F21c),
        0x61 => ("sget-wide", F21c),
        0x62 => ("sget-object", F21c),
        0x63 => ("sget-boolean", F21c),
        0x64 => ("sget-byte", F21c),
        0x65 => ("sget-char", F21c),
        0x66 => ("sget-short", F21c),
        0x67 => ("sput", F21c),
        0x68 => ("sput-wide", F21c),
        0x69 => ("sput-object", F21c),
        0x6a => ("sput-boolean", F21c),
        0x6b => ("sput-byte", F21c),
        0x6c => ("sput-char", F21c),
        0x6d => ("sput-short", F21c),
        0x6e => ("invoke-virtual", F35c),
        0x6f => ("invoke-super", F35c),
        0x70 => ("invoke-direct", F35c),
        0x71 => ("invoke-static", F35c),
        0x72 => ("invoke-interface", F35c),
        0x7b => ("neg-int", F12x),
        0x7d => ("neg-long", F12x),
        0x7f => ("neg-float", F12x),
        0x80 => ("neg-double", F12x),
        0x81 => ("int-to-long", F12x),
        0x82 => ("int-to-float", F12x),
        0x83 => ("int-to-double", F12x),
        0x84 => ("long-to-int", F12x),
        0x85 => ("long-to-float", F12x),
        0x86 => ("long-to-double", F12x),
        0x87 => ("float-to-int", F12x),
        0x88 => ("float-to-long", F12x),
        0x89 => ("float-to-double", F12x),
        0x8a => ("double-to-int", F12x),
        0x8b => ("double-to-long", F12x),
        0x8c => ("double-to-float", F12x),
        0x8d => ("int-to-byte", F12x),
        0x8e => ("int-to-char", F12x),
        0x8f => ("int-to-short", F12x),
        0x90 => ("add-int", F23x),
        0x91 => ("sub-int", F23x),
        0x92 => ("mul-int", F23x),
        0x93 => ("div-int", F23x),
        0x94 => ("rem-int", F23x),
        0x95 => ("and-int", F23x),
        0x96 => ("or-int", F23x),
        0x97 => ("xor-int", F23x),
        0x98 => ("shl-int", F23x),
        0x99 => ("shr-int", F23x),
        0x9a => ("ushr-int", F23x),
        0x9b => ("add-long", F23x),
        0x9c => ("sub-long", F23x),
        0x9d => ("mul-long", F23x),
        0x9e => ("div-long", F23x),
        0x9f => ("rem-long", F23x),
        0xa0 => ("and-long", F23x),
        0xa1 => ("or-long", F23x),
        0xa2 => ("xor-long", F23x),
        0xa3 => ("shl-long", F23x),
        0xa4 => ("shr-long", F23x),
        0xa5 => ("ushr-long", F23x),
        0xa6 => ("add-float", F23x),
        0xa7 => ("sub-float", F23x),
        0xa8 => ("mul-float", F23x),
        0xa9 => ("div-float", F23x),
        0xaa => ("rem-float", F23x),
        0xab => ("add-double", F23x),
        0xac => ("sub-double", F23x),
        0xad => ("mul-double", F23x),
        0xae => ("div-double", F23x),
        0xaf => ("rem-double", F23x),
        _ => return None,
    })
}

#[cfg(test)]
mod dop_tests {
    use super::*;

    #[test]
    fn family_arithmetic_matches_the_table() {
        assert_eq!(dop_info(binop_code(Binop::Ushr, TypeTag::Long)).unwrap().0, "ushr-long");
        assert_eq!(dop_info(binop_code(Binop::Rem, TypeTag::Float)).unwrap().0, "rem-float");
        assert_eq!(dop_info(aget_code(MemKind::Char)).unwrap().0, "aget-char");
        assert_eq!(dop_info(iput_code(MemKind::Wide)).unwrap().0, "iput-wide");
        assert_eq!(dop_info(move_code(TypeTag::Object, 1)).unwrap().0, "move-object/from16");
        assert_eq!(dop_info(if_code(IfCond::Le, true)).unwrap().0, "if-lez");
    }

    #[test]
    fn conversion_grid_skips_identity() {
        assert_eq!(dop_info(conv_code(TypeTag::Int, TypeTag::Long)).unwrap().0, "int-to-long");
        assert_eq!(dop_info(conv_code(TypeTag::Long, TypeTag::Int)).unwrap().0, "long-to-int");
        assert_eq!(
            dop_info(conv_code(TypeTag::Double, TypeTag::Float)).unwrap().0,
            "double-to-float"
        );
    }
}
