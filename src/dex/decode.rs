use crate::dex::{codes, dop_info, Form};
use crate::{Error, ParseError};
use std::fmt;

/// One decoded Dalvik instruction or payload table
///
/// This decoder exists for dump output and for checking what the translator
/// emitted; it resolves formats and branch targets but leaves constant pool
/// indices as raw numbers.
#[derive(Debug, Clone)]
pub struct DecodedInsn {
    /// Address in code units from the start of the method
    pub addr: usize,
    pub mnemonic: &'static str,
    /// The raw code units of this instruction
    pub units: Vec<u16>,
    /// Absolute address a branch, switch, or payload reference resolves to
    pub branch_target: Option<i64>,
}

impl fmt::Display for DecodedInsn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04x}: {}", self.addr, self.mnemonic)?;
        for unit in &self.units[1..] {
            write!(f, " {:04x}", unit)?;
        }
        if let Some(target) = self.branch_target {
            write!(f, "  -> {:04x}", target)?;
        }
        Ok(())
    }
}

/// Decode a full code unit stream, payload tables included
pub fn decode(units: &[u16]) -> Result<Vec<DecodedInsn>, Error> {
    let mut out = vec![];
    let mut addr = 0usize;
    while addr < units.len() {
        let insn = decode_at(units, addr)?;
        addr += insn.units.len();
        out.push(insn);
    }
    Ok(out)
}

fn truncated(addr: usize) -> Error {
    ParseError {
        offset: addr * 2,
        expected: "complete instruction",
    }
    .into()
}

fn decode_at(units: &[u16], addr: usize) -> Result<DecodedInsn, Error> {
    let first = units[addr];
    if first == codes::PACKED_SWITCH_PAYLOAD || first == codes::SPARSE_SWITCH_PAYLOAD {
        return decode_payload(units, addr);
    }
    let op = (first & 0xff) as u8;
    let (mnemonic, form) = dop_info(op).ok_or(ParseError {
        offset: addr * 2,
        expected: "known opcode",
    })?;
    let len = form.code_units();
    if addr + len > units.len() {
        return Err(truncated(addr));
    }
    let insn_units = units[addr..addr + len].to_vec();
    let branch_target = match form {
        Form::F10t => Some(((first >> 8) as u8 as i8) as i64),
        Form::F20t | Form::F21t | Form::F22t => Some(insn_units[1] as i16 as i64),
        Form::F30t | Form::F31t => {
            Some((insn_units[1] as u32 | (insn_units[2] as u32) << 16) as i32 as i64)
        }
        _ => None,
    }
    .map(|offset| addr as i64 + offset);
    Ok(DecodedInsn {
        addr,
        mnemonic,
        units: insn_units,
        branch_target,
    })
}

fn decode_payload(units: &[u16], addr: usize) -> Result<DecodedInsn, Error> {
    if addr + 2 > units.len() {
        return Err(truncated(addr));
    }
    let size = units[addr + 1] as usize;
    let (mnemonic, len) = if units[addr] == codes::PACKED_SWITCH_PAYLOAD {
        ("packed-switch-payload", 4 + 2 * size)
    } else {
        ("sparse-switch-payload", 2 + 4 * size)
    };
    if addr + len > units.len() {
        return Err(truncated(addr));
    }
    Ok(DecodedInsn {
        addr,
        mnemonic,
        units: units[addr..addr + len].to_vec(),
        branch_target: None,
    })
}
