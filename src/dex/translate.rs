use crate::dex::{codes, Form};
use crate::dex::{
    aget_code, aput_code, binop_code, cmp_code, conv_code, if_code, iget_code, invoke_code,
    iput_code, move_code, move_result_code, neg_code, return_code, sget_code, sput_code,
    trunc_code,
};
use crate::rop::{ArrayElem, BasicBlock, ConstValue, Insn, RegisterSpec, Rop, RopMethod};
use crate::{Error, Inconsistency};
use std::collections::{HashMap, HashSet, VecDeque};

/// A fully encoded method body, ready to wrap in a dex `code_item`
#[derive(Debug, Clone)]
pub struct CompiledBody {
    /// The instruction stream, one 16-bit code unit per element
    pub code_units: Vec<u16>,
    pub registers_size: u16,
    pub ins_size: u16,
    /// Widest argument list among outgoing invokes
    pub outs_size: u16,
}

pub fn translate(method: &RopMethod) -> Result<CompiledBody, Error> {
    if method.reg_count > 0xffff {
        return Err(capacity("register count", method.reg_count as i64));
    }
    let order = layout(method);
    let mut translator = Translator {
        method,
        order,
        items: vec![],
        block_item: HashMap::new(),
        payloads: vec![],
        outs: 0,
    };
    translator.lower_all()?;
    translator.assemble()
}

fn capacity(what: &'static str, value: i64) -> Error {
    Error::CapacityExceeded { what, value }
}

/// One not-yet-addressed unit of output
enum Item {
    /// Fully encoded, fixed-size instruction
    Fixed(Vec<u16>),
    /// A goto whose width the fixpoint decides
    Goto { target: u32 },
    /// An if-test: one fixed leading unit, then a 16-bit offset
    Branch { first: u16, target: u32 },
    /// A switch: 8-bit register, then a 32-bit offset to its payload
    Switch { op: u8, reg: u16, payload: usize },
}

struct Payload {
    packed: bool,
    keys: Vec<i32>,
    targets: Vec<u32>,
    /// Item index of the switch referring here, for relative targets
    switch_item: usize,
}

/// Order blocks into a trace that chains primary successors
///
/// A thrower's primary successor has only that one predecessor whenever it
/// holds a result fetch, so chaining keeps every `move-result` adjacent to
/// its invoke.
fn layout(method: &RopMethod) -> Vec<u32> {
    let mut order = vec![];
    let mut placed = HashSet::new();
    let mut pending = VecDeque::from([method.entry_label]);
    while let Some(start) = pending.pop_front() {
        if placed.contains(&start) {
            continue;
        }
        let mut label = start;
        loop {
            placed.insert(label);
            order.push(label);
            let block = method.block_by_label(label).expect("labels are closed");
            for succ in &block.successors {
                if !placed.contains(succ) {
                    pending.push_back(*succ);
                }
            }
            match block.primary_successor {
                Some(primary) if !placed.contains(&primary) => label = primary,
                _ => break,
            }
        }
    }
    order
}

struct Translator<'a> {
    method: &'a RopMethod,
    order: Vec<u32>,
    items: Vec<Item>,
    /// First item index of each block label
    block_item: HashMap<u32, usize>,
    payloads: Vec<Payload>,
    outs: u16,
}

impl Translator<'_> {
    fn lower_all(&mut self) -> Result<(), Error> {
        let method = self.method;
        for pos in 0..self.order.len() {
            let label = self.order[pos];
            let next = self.order.get(pos + 1).copied();
            self.block_item.insert(label, self.items.len());
            let block = method.block_by_label(label).expect("labels are closed");
            self.lower_block(block, next)?;
        }
        Ok(())
    }

    /// The register a thrower's absorbed result lands in
    fn pseudo_dst(&self, block: &BasicBlock) -> Result<RegisterSpec, Error> {
        let primary = block
            .primary_successor
            .ok_or(Inconsistency::MissingResultFetch { block: block.label })?;
        let succ = self.method.block_by_label(primary).expect("labels are closed");
        match succ.insns.first() {
            Some(insn) if matches!(insn.op, Rop::MoveResultPseudo) => {
                insn.result.ok_or_else(|| {
                    Inconsistency::MissingResultFetch { block: block.label }.into()
                })
            }
            _ => Err(Inconsistency::MissingResultFetch { block: block.label }.into()),
        }
    }

    fn lower_block(&mut self, block: &BasicBlock, next: Option<u32>) -> Result<(), Error> {
        for (idx, insn) in block.insns.iter().enumerate() {
            // an absorbed fetch was already encoded into its thrower
            if idx == 0 && matches!(insn.op, Rop::MoveResultPseudo) {
                continue;
            }
            if matches!(insn.op, Rop::MoveResult) && idx == 0 {
                // the invoke must sit immediately before this unit
                let adjacent = self
                    .order
                    .iter()
                    .position(|l| *l == block.label)
                    .and_then(|pos| pos.checked_sub(1))
                    .map(|prev| self.order[prev])
                    .map_or(false, |prev| {
                        self.method
                            .block_by_label(prev)
                            .and_then(|b| b.primary_successor)
                            == Some(block.label)
                    });
                if !adjacent {
                    return Err(Inconsistency::MisplacedResultFetch {
                        block: block.label,
                    }
                    .into());
                }
            }
            self.lower_insn(block, insn)?;
        }

        // branch fixups depend on which block follows in the trace
        let last = block.last_insn();
        match &last.op {
            Rop::Goto => {
                let target = block.successors[0];
                if next != Some(target) {
                    self.items.push(Item::Goto { target });
                }
            }
            Rop::If(_) => {
                let fall = block.primary_successor.expect("if has a fall-through");
                if next != Some(fall) {
                    self.items.push(Item::Goto { target: fall });
                }
            }
            Rop::Switch(_) => {
                let default = block.primary_successor.expect("switch has a default");
                if next != Some(default) {
                    self.items.push(Item::Goto { target: default });
                }
            }
            Rop::Return | Rop::Throw => {}
            _ => {
                // a throwing straight-line ender falls through to its
                // primary successor
                if let Some(primary) = block.primary_successor {
                    if next != Some(primary) {
                        self.items.push(Item::Goto { target: primary });
                    }
                }
            }
        }
        Ok(())
    }

    fn lower_insn(&mut self, block: &BasicBlock, insn: &Insn) -> Result<(), Error> {
        let units = match &insn.op {
            Rop::Nop => return Ok(()),
            Rop::Move => {
                let dst = result_of(insn)?;
                self.push_move(dst, insn.sources[0])?;
                return Ok(());
            }
            Rop::MoveParam(slot) => {
                let dst = result_of(insn)?;
                let home = RegisterSpec::new(
                    self.method.reg_count - self.method.param_width as u32 + *slot as u32,
                    dst.tag,
                );
                if dst.reg != home.reg {
                    self.push_move(dst, home)?;
                }
                return Ok(());
            }
            Rop::MoveResult => {
                let dst = result_of(insn)?;
                f11x(move_result_code(dst.tag), dst.reg)?
            }
            Rop::MoveException => {
                let dst = result_of(insn)?;
                f11x(codes::MOVE_EXCEPTION, dst.reg)?
            }
            Rop::MoveResultPseudo => {
                // handled at the head of the block
                return Err(Inconsistency::MisplacedResultFetch {
                    block: block.label,
                }
                .into());
            }
            Rop::Const(value) => {
                let dst = result_of(insn)?;
                self.items.push(Item::Fixed(const_units(dst, *value)?));
                return Ok(());
            }
            Rop::Goto | Rop::If(_) | Rop::Switch(_) => {
                return self.lower_branch(block, insn);
            }
            Rop::Binop(op) => {
                let tag = insn.sources[0].tag;
                let dst = match insn.result {
                    Some(dst) => dst,
                    // int/long div and rem deliver through the fetch
                    None => self.pseudo_dst(block)?,
                };
                f23x(binop_code(*op, tag), dst.reg, insn.sources[0].reg, insn.sources[1].reg)?
            }
            Rop::Neg => {
                let dst = result_of(insn)?;
                f12x(neg_code(dst.tag), dst.reg, insn.sources[0].reg)?
            }
            Rop::Conv => {
                let dst = result_of(insn)?;
                f12x(conv_code(insn.sources[0].tag, dst.tag), dst.reg, insn.sources[0].reg)?
            }
            Rop::Truncate(trunc) => {
                let dst = result_of(insn)?;
                f12x(trunc_code(*trunc), dst.reg, insn.sources[0].reg)?
            }
            Rop::Cmp(kind) => {
                let dst = result_of(insn)?;
                f23x(cmp_code(*kind), dst.reg, insn.sources[0].reg, insn.sources[1].reg)?
            }
            Rop::Return => match insn.sources.first() {
                None => vec![codes::RETURN_VOID as u16],
                Some(value) => f11x(return_code(Some(value.tag)), value.reg)?,
            },
            Rop::ArrayLength => {
                let dst = self.pseudo_dst(block)?;
                f12x(codes::ARRAY_LENGTH, dst.reg, insn.sources[0].reg)?
            }
            Rop::Throw => f11x(codes::THROW, insn.sources[0].reg)?,
            Rop::MonitorEnter => f11x(codes::MONITOR_ENTER, insn.sources[0].reg)?,
            Rop::MonitorExit => f11x(codes::MONITOR_EXIT, insn.sources[0].reg)?,
            Rop::ArrayGet(kind) => {
                let dst = self.pseudo_dst(block)?;
                f23x(aget_code(*kind), dst.reg, insn.sources[0].reg, insn.sources[1].reg)?
            }
            Rop::ArrayPut(kind) => {
                // sources are value, array, index
                f23x(aput_code(*kind), insn.sources[0].reg, insn.sources[1].reg, insn.sources[2].reg)?
            }
            Rop::NewInstance(index) => {
                let dst = self.pseudo_dst(block)?;
                f21c(codes::NEW_INSTANCE, dst.reg, *index)?
            }
            Rop::NewArray(elem) => {
                let dst = self.pseudo_dst(block)?;
                let index = match elem {
                    // primitive element types keep their newarray code in
                    // the index field; a dex file builder maps them to
                    // proper type ids
                    ArrayElem::Prim(atype) => *atype as u16,
                    ArrayElem::Class(index) => *index,
                };
                f22c(codes::NEW_ARRAY, dst.reg, insn.sources[0].reg, index)?
            }
            Rop::CheckCast(index) => f21c(codes::CHECK_CAST, insn.sources[0].reg, *index)?,
            Rop::InstanceOf(index) => {
                let dst = self.pseudo_dst(block)?;
                f22c(codes::INSTANCE_OF, dst.reg, insn.sources[0].reg, *index)?
            }
            Rop::GetField { field, kind } => {
                let dst = self.pseudo_dst(block)?;
                f22c(iget_code(*kind), dst.reg, insn.sources[0].reg, *field)?
            }
            Rop::PutField { field, kind } => {
                // sources are value, object
                f22c(iput_code(*kind), insn.sources[0].reg, insn.sources[1].reg, *field)?
            }
            Rop::GetStatic { field, kind } => {
                let dst = self.pseudo_dst(block)?;
                f21c(sget_code(*kind), dst.reg, *field)?
            }
            Rop::PutStatic { field, kind } => {
                f21c(sput_code(*kind), insn.sources[0].reg, *field)?
            }
            Rop::Invoke {
                kind,
                method: target,
                arg_words,
            } => {
                self.outs = self.outs.max(*arg_words);
                let mut regs = vec![];
                for source in &insn.sources {
                    regs.push(source.reg);
                    if source.tag.is_wide() {
                        regs.push(source.reg + 1);
                    }
                }
                f35c(invoke_code(*kind), &regs, *target)?
            }
        };
        self.items.push(Item::Fixed(units));
        Ok(())
    }

    fn lower_branch(&mut self, block: &BasicBlock, insn: &Insn) -> Result<(), Error> {
        match &insn.op {
            // the goto itself is emitted by the block-end fixup
            Rop::Goto => Ok(()),
            Rop::If(cond) => {
                let target = block.successors[0];
                let first = match insn.sources.len() {
                    1 => {
                        // 21t takes a full 8-bit register
                        let reg = u8_check(insn.sources[0].reg)?;
                        (if_code(*cond, true) as u16) | (reg as u16) << 8
                    }
                    _ => {
                        let a = nib_check(insn.sources[0].reg)
                            .ok_or_else(|| capacity("if register", insn.sources[0].reg as i64))?;
                        let b = nib_check(insn.sources[1].reg)
                            .ok_or_else(|| capacity("if register", insn.sources[1].reg as i64))?;
                        (if_code(*cond, false) as u16) | (a as u16) << 8 | (b as u16) << 12
                    }
                };
                self.items.push(Item::Branch { first, target });
                Ok(())
            }
            Rop::Switch(keys) => {
                let reg = u8_check(insn.sources[0].reg)?;
                let targets: Vec<u32> =
                    block.successors[..block.successors.len() - 1].to_vec();
                let packed = keys
                    .iter()
                    .enumerate()
                    .all(|(i, key)| *key as i64 == keys[0] as i64 + i as i64);
                let op = if packed {
                    codes::PACKED_SWITCH
                } else {
                    codes::SPARSE_SWITCH
                };
                self.payloads.push(Payload {
                    packed,
                    keys: keys.clone(),
                    targets,
                    switch_item: self.items.len(),
                });
                self.items.push(Item::Switch {
                    op,
                    reg: reg as u16,
                    payload: self.payloads.len() - 1,
                });
                Ok(())
            }
            _ => unreachable!("only branches are lowered here"),
        }
    }

    fn push_move(&mut self, dst: RegisterSpec, src: RegisterSpec) -> Result<(), Error> {
        let units = if dst.reg <= 0xf && src.reg <= 0xf {
            vec![(move_code(dst.tag, 0) as u16) | (dst.reg as u16) << 8 | (src.reg as u16) << 12]
        } else if dst.reg <= 0xff {
            vec![(move_code(dst.tag, 1) as u16) | (dst.reg as u16) << 8, src.reg as u16]
        } else {
            vec![move_code(dst.tag, 2) as u16, dst.reg as u16, src.reg as u16]
        };
        self.items.push(Item::Fixed(units));
        Ok(())
    }

    /// Resolve addresses with a widening fixpoint, then emit code units
    fn assemble(&mut self) -> Result<CompiledBody, Error> {
        let mut goto_width: HashMap<usize, usize> = HashMap::new();
        let width = |item: &Item, goto_width: &HashMap<usize, usize>, idx: usize| match item {
            Item::Fixed(units) => units.len(),
            Item::Goto { .. } => *goto_width.get(&idx).unwrap_or(&1),
            Item::Branch { .. } => Form::F22t.code_units(),
            Item::Switch { .. } => Form::F31t.code_units(),
        };

        let mut item_addr = vec![0u32; self.items.len()];
        let mut payload_addr = vec![0u32; self.payloads.len()];
        loop {
            let mut addr = 0u32;
            for (idx, item) in self.items.iter().enumerate() {
                item_addr[idx] = addr;
                addr += width(item, &goto_width, idx) as u32;
            }
            for (idx, payload) in self.payloads.iter().enumerate() {
                if addr % 2 != 0 {
                    addr += 1;
                }
                payload_addr[idx] = addr;
                addr += payload.size() as u32;
            }

            let mut widened = false;
            for (idx, item) in self.items.iter().enumerate() {
                if let Item::Goto { target } = item {
                    let offset =
                        self.label_addr(*target, &item_addr) as i64 - item_addr[idx] as i64;
                    let need = if offset == 0 {
                        3
                    } else if i8::try_from(offset).is_ok() {
                        1
                    } else if i16::try_from(offset).is_ok() {
                        2
                    } else {
                        3
                    };
                    let current = goto_width.entry(idx).or_insert(1);
                    if need > *current {
                        *current = need;
                        widened = true;
                    }
                }
            }
            if !widened {
                break;
            }
        }

        let mut units = vec![];
        for (idx, item) in self.items.iter().enumerate() {
            match item {
                Item::Fixed(fixed) => units.extend_from_slice(fixed),
                Item::Goto { target } => {
                    let offset =
                        self.label_addr(*target, &item_addr) as i64 - item_addr[idx] as i64;
                    match goto_width[&idx] {
                        1 => units
                            .push(codes::GOTO as u16 | ((offset as i8 as u8 as u16) << 8)),
                        2 => {
                            units.push(codes::GOTO_16 as u16);
                            units.push(offset as i16 as u16);
                        }
                        _ => {
                            units.push(codes::GOTO_32 as u16);
                            units.push(offset as u16);
                            units.push((offset as u64 >> 16) as u16);
                        }
                    }
                }
                Item::Branch { first, target } => {
                    let offset =
                        self.label_addr(*target, &item_addr) as i64 - item_addr[idx] as i64;
                    let offset =
                        i16::try_from(offset).map_err(|_| capacity("branch offset", offset))?;
                    units.push(*first);
                    units.push(offset as u16);
                }
                Item::Switch { op, reg, payload } => {
                    let offset = payload_addr[*payload] as i64 - item_addr[idx] as i64;
                    units.push(*op as u16 | (*reg << 8));
                    units.push(offset as u16);
                    units.push((offset as u64 >> 16) as u16);
                }
            }
        }
        for (idx, payload) in self.payloads.iter().enumerate() {
            if units.len() % 2 != 0 {
                units.push(codes::NOP as u16);
            }
            debug_assert_eq!(units.len() as u32, payload_addr[idx]);
            let base = item_addr[payload.switch_item] as i64;
            if payload.packed {
                units.push(codes::PACKED_SWITCH_PAYLOAD);
                units.push(payload.targets.len() as u16);
                let first = *payload.keys.first().unwrap_or(&0);
                units.push(first as u16);
                units.push((first as u32 >> 16) as u16);
            } else {
                units.push(codes::SPARSE_SWITCH_PAYLOAD);
                units.push(payload.targets.len() as u16);
                for key in &payload.keys {
                    units.push(*key as u16);
                    units.push((*key as u32 >> 16) as u16);
                }
            }
            for target in &payload.targets {
                let offset = self.label_addr(*target, &item_addr) as i64 - base;
                units.push(offset as u16);
                units.push((offset as u64 >> 16) as u16);
            }
        }

        Ok(CompiledBody {
            code_units: units,
            registers_size: self.method.reg_count as u16,
            ins_size: self.method.param_width,
            outs_size: self.outs,
        })
    }

    fn label_addr(&self, label: u32, item_addr: &[u32]) -> u32 {
        match self.block_item.get(&label) {
            Some(idx) if *idx < item_addr.len() => item_addr[*idx],
            // a trailing block that lowered to nothing
            _ => item_addr.last().copied().unwrap_or(0),
        }
    }
}

impl Payload {
    /// Size in code units, header included
    fn size(&self) -> usize {
        if self.packed {
            4 + 2 * self.targets.len()
        } else {
            2 + 4 * self.targets.len()
        }
    }
}

fn result_of(insn: &Insn) -> Result<RegisterSpec, Error> {
    insn.result.ok_or_else(|| {
        Error::VerificationInconsistency(Inconsistency::MalformedBlock {
            block: 0,
            detail: "instruction is missing its result",
        })
    })
}

fn nib_check(reg: u32) -> Option<u8> {
    if reg <= 0xf {
        Some(reg as u8)
    } else {
        None
    }
}

fn u8_check(reg: u32) -> Result<u8, Error> {
    u8::try_from(reg).map_err(|_| capacity("register", reg as i64))
}

fn f11x(op: u8, reg: u32) -> Result<Vec<u16>, Error> {
    let reg = u8_check(reg)?;
    Ok(vec![op as u16 | (reg as u16) << 8])
}

fn f12x(op: u8, a: u32, b: u32) -> Result<Vec<u16>, Error> {
    let a = nib_check(a).ok_or_else(|| capacity("register", a as i64))?;
    let b = nib_check(b).ok_or_else(|| capacity("register", b as i64))?;
    Ok(vec![op as u16 | (a as u16) << 8 | (b as u16) << 12])
}

fn f21c(op: u8, reg: u32, index: u16) -> Result<Vec<u16>, Error> {
    let reg = u8_check(reg)?;
    Ok(vec![op as u16 | (reg as u16) << 8, index])
}

fn f22c(op: u8, a: u32, b: u32, index: u16) -> Result<Vec<u16>, Error> {
    let a = nib_check(a).ok_or_else(|| capacity("register", a as i64))?;
    let b = nib_check(b).ok_or_else(|| capacity("register", b as i64))?;
    Ok(vec![op as u16 | (a as u16) << 8 | (b as u16) << 12, index])
}

fn f23x(op: u8, a: u32, b: u32, c: u32) -> Result<Vec<u16>, Error> {
    let a = u8_check(a)?;
    let b = u8_check(b)?;
    let c = u8_check(c)?;
    Ok(vec![op as u16 | (a as u16) << 8, b as u16 | (c as u16) << 8])
}

fn f35c(op: u8, regs: &[u32], index: u16) -> Result<Vec<u16>, Error> {
    if regs.len() > 5 {
        return Err(capacity("invoke argument count", regs.len() as i64));
    }
    let mut nibs = [0u8; 5];
    for (slot, reg) in regs.iter().enumerate() {
        nibs[slot] = nib_check(*reg).ok_or_else(|| capacity("invoke register", *reg as i64))?;
    }
    let count = regs.len() as u16;
    Ok(vec![
        op as u16 | (nibs[4] as u16) << 8 | count << 12,
        index,
        nibs[0] as u16 | (nibs[1] as u16) << 4 | (nibs[2] as u16) << 8 | (nibs[3] as u16) << 12,
    ])
}

fn const_units(dst: RegisterSpec, value: ConstValue) -> Result<Vec<u16>, Error> {
    let reg = dst.reg;
    match value {
        ConstValue::Int(v) => const_word(reg, v),
        ConstValue::Float(bits) => const_word(reg, bits as i32),
        ConstValue::Null => const_word(reg, 0),
        ConstValue::Long(v) => const_wide(reg, v),
        ConstValue::Double(bits) => const_wide(reg, bits as i64),
        ConstValue::String(index) => f21c(codes::CONST_STRING, reg, index),
        ConstValue::Class(index) => f21c(codes::CONST_CLASS, reg, index),
    }
}

fn const_word(reg: u32, value: i32) -> Result<Vec<u16>, Error> {
    if reg <= 0xf && (-8..=7).contains(&value) {
        return Ok(vec![
            codes::CONST_4 as u16 | (reg as u16) << 8 | ((value as u8 & 0xf) as u16) << 12,
        ]);
    }
    let reg = u8_check(reg)?;
    if i16::try_from(value).is_ok() {
        Ok(vec![codes::CONST_16 as u16 | (reg as u16) << 8, value as u16])
    } else {
        Ok(vec![
            codes::CONST as u16 | (reg as u16) << 8,
            value as u16,
            (value as u32 >> 16) as u16,
        ])
    }
}

fn const_wide(reg: u32, value: i64) -> Result<Vec<u16>, Error> {
    let reg = u8_check(reg)?;
    if i16::try_from(value).is_ok() {
        Ok(vec![codes::CONST_WIDE_16 as u16 | (reg as u16) << 8, value as u16])
    } else if i32::try_from(value).is_ok() {
        Ok(vec![
            codes::CONST_WIDE_32 as u16 | (reg as u16) << 8,
            value as u16,
            (value as u32 >> 16) as u16,
        ])
    } else {
        let v = value as u64;
        Ok(vec![
            codes::CONST_WIDE as u16 | (reg as u16) << 8,
            v as u16,
            (v >> 16) as u16,
            (v >> 32) as u16,
            (v >> 48) as u16,
        ])
    }
}

#[cfg(test)]
mod translate_tests {
    use super::*;
    use crate::dex::decode;
    use crate::rop::{Binop, IfCond, TypeTag};

    fn int(reg: u32) -> RegisterSpec {
        RegisterSpec::new(reg, TypeTag::Int)
    }

    fn mnemonics(body: &CompiledBody) -> Vec<String> {
        decode(&body.code_units)
            .unwrap()
            .into_iter()
            .map(|insn| insn.mnemonic.to_string())
            .collect()
    }

    #[test]
    fn straight_line_add_method() {
        // params land at the top of a 3-register frame
        let method = RopMethod {
            blocks: vec![
                BasicBlock {
                    label: 9,
                    insns: vec![
                        Insn::new(Rop::MoveParam(0), Some(int(1)), vec![]),
                        Insn::new(Rop::MoveParam(1), Some(int(2)), vec![]),
                        Insn::new(Rop::Goto, None, vec![]),
                    ],
                    successors: vec![0],
                    primary_successor: Some(0),
                },
                BasicBlock {
                    label: 0,
                    insns: vec![
                        Insn::new(Rop::Binop(Binop::Add), Some(int(0)), vec![int(1), int(2)]),
                        Insn::new(Rop::Return, None, vec![int(0)]),
                    ],
                    successors: vec![],
                    primary_successor: None,
                },
            ],
            entry_label: 9,
            param_width: 2,
            reg_count: 3,
        };
        let body = translate(&method).unwrap();
        assert_eq!(body.registers_size, 3);
        assert_eq!(body.ins_size, 2);
        assert_eq!(body.outs_size, 0);
        // both parameters are already home, so no moves survive
        assert_eq!(mnemonics(&body), vec!["add-int", "return"]);
    }

    #[test]
    fn backward_branch_encodes_negative_offset() {
        // 0: loop body, branch back to itself until the flag is zero
        let method = RopMethod {
            blocks: vec![
                BasicBlock {
                    label: 0,
                    insns: vec![
                        Insn::new(Rop::MoveParam(0), Some(int(0)), vec![]),
                        Insn::new(Rop::Goto, None, vec![]),
                    ],
                    successors: vec![1],
                    primary_successor: Some(1),
                },
                BasicBlock {
                    label: 1,
                    insns: vec![
                        Insn::new(Rop::Neg, Some(int(0)), vec![int(0)]),
                        Insn::new(Rop::If(IfCond::Ne), None, vec![int(0)]),
                    ],
                    successors: vec![1, 2],
                    primary_successor: Some(2),
                },
                BasicBlock {
                    label: 2,
                    insns: vec![Insn::new(Rop::Return, None, vec![])],
                    successors: vec![],
                    primary_successor: None,
                },
            ],
            entry_label: 0,
            param_width: 1,
            reg_count: 1,
        };
        let body = translate(&method).unwrap();
        let insns = decode(&body.code_units).unwrap();
        let branch = insns.iter().find(|i| i.mnemonic == "if-nez").unwrap();
        // the entry block lowers to nothing, so the loop head sits at zero
        assert_eq!(branch.addr, 1);
        assert_eq!(branch.branch_target, Some(0));
    }

    #[test]
    fn switch_payload_is_aligned_and_last() {
        let method = RopMethod {
            blocks: vec![
                BasicBlock {
                    label: 0,
                    insns: vec![
                        Insn::new(Rop::MoveParam(0), Some(int(0)), vec![]),
                        Insn::new(Rop::Switch(vec![3, 5]), None, vec![int(0)]),
                    ],
                    successors: vec![1, 2, 3],
                    primary_successor: Some(3),
                },
                BasicBlock {
                    label: 1,
                    insns: vec![Insn::new(Rop::Return, None, vec![])],
                    successors: vec![],
                    primary_successor: None,
                },
                BasicBlock {
                    label: 2,
                    insns: vec![Insn::new(Rop::Return, None, vec![])],
                    successors: vec![],
                    primary_successor: None,
                },
                BasicBlock {
                    label: 3,
                    insns: vec![Insn::new(Rop::Return, None, vec![])],
                    successors: vec![],
                    primary_successor: None,
                },
            ],
            entry_label: 0,
            param_width: 1,
            reg_count: 1,
        };
        let body = translate(&method).unwrap();
        let insns = decode(&body.code_units).unwrap();
        let switch = insns.iter().find(|i| i.mnemonic == "sparse-switch").unwrap();
        let payload_addr = switch.branch_target.unwrap();
        // payloads are 4-byte aligned: even code unit addresses
        assert_eq!(payload_addr % 2, 0);
        assert_eq!(
            body.code_units[payload_addr as usize],
            codes::SPARSE_SWITCH_PAYLOAD
        );
        assert_eq!(body.code_units[payload_addr as usize + 1], 2);
    }

    #[test]
    fn oversized_register_is_a_capacity_error() {
        let method = RopMethod {
            blocks: vec![BasicBlock {
                label: 0,
                insns: vec![
                    Insn::new(Rop::Binop(Binop::Add), Some(int(300)), vec![int(300), int(300)]),
                    Insn::new(Rop::Return, None, vec![]),
                ],
                successors: vec![],
                primary_successor: None,
            }],
            entry_label: 0,
            param_width: 0,
            reg_count: 301,
        };
        assert!(matches!(
            translate(&method),
            Err(Error::CapacityExceeded { what: "register", .. })
        ));
    }
}
