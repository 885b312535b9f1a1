use crate::cf::{CodeAttribute, DecodedMethod, ExceptionTableEntry, JInsn};
use crate::rop::{
    BasicBlock, Binop, ConstValue, Insn, RegisterSpec, Rop, RopMethod, TypeTag,
};
use crate::{Error, Inconsistency, ParseError};
use std::collections::{HashMap, HashSet};

/// Number of scratch registers reserved above the stack mirror for the stack
/// manipulation rewrites (`dup_x*`, `swap`)
const SCRATCH_UNITS: u32 = 4;

/// Convert a decoded method body into Rop form
///
/// `param_tags` lists the parameter types in order, receiver included for
/// instance methods. Registers `0..max_locals` mirror local variable slots,
/// the next `max_stack` registers mirror operand stack positions by depth,
/// and a few scratch registers sit above those.
pub fn build_rop(
    decoded: &DecodedMethod,
    code: &CodeAttribute,
    param_tags: &[TypeTag],
    return_tag: Option<TypeTag>,
) -> Result<RopMethod, Error> {
    let mut ropper = Ropper::new(decoded, code, return_tag)?;
    ropper.scan_boundaries()?;
    ropper.simulate_all(param_tags)?;
    ropper.assemble(param_tags)
}

/// Abstract interpretation state at a block boundary
#[derive(Debug, Clone, PartialEq)]
struct Frame {
    /// `None` marks an undefined slot (or the second half of a wide value)
    locals: Vec<Option<TypeTag>>,
    /// One cell per value; wide values are a single cell
    stack: Vec<TypeTag>,
}

impl Frame {
    fn stack_units(&self) -> u32 {
        self.stack.iter().map(|tag| tag.category()).sum()
    }

    /// Register of the stack cell at `idx`, given the locals base
    fn cell_reg(&self, base: u32, idx: usize) -> u32 {
        base + self.stack[..idx]
            .iter()
            .map(|tag| tag.category())
            .sum::<u32>()
    }

    fn top_spec(&self, base: u32) -> Option<RegisterSpec> {
        let idx = self.stack.len().checked_sub(1)?;
        Some(RegisterSpec::new(
            self.cell_reg(base, idx),
            self.stack[idx],
        ))
    }
}

/// Which result-fetch a block must begin with
#[derive(Debug, Copy, Clone, PartialEq)]
enum FetchKind {
    Invoke(TypeTag),
    Pseudo(TypeTag),
}

struct Ropper<'a> {
    insns: &'a [(u32, JInsn)],
    handlers: &'a [ExceptionTableEntry],
    byte_len: u32,
    base: u32,
    max_stack: u16,
    max_locals: u16,
    return_tag: Option<TypeTag>,

    /// pcs that start a basic block
    block_starts: HashSet<u32>,
    /// pcs reachable through an explicit jump, switch case, or handler edge
    jump_targets: HashSet<u32>,
    handler_starts: HashSet<u32>,
    /// Blocks that must begin with a result fetch, keyed by their start pc
    fetch_at: HashMap<u32, FetchKind>,

    in_frames: HashMap<u32, Frame>,
    built: HashMap<u32, BasicBlock>,
}

impl<'a> Ropper<'a> {
    fn new(
        decoded: &'a DecodedMethod,
        code: &'a CodeAttribute,
        return_tag: Option<TypeTag>,
    ) -> Result<Ropper<'a>, Error> {
        if decoded.insns.is_empty() {
            return Err(Error::MalformedInput(ParseError {
                offset: 0,
                expected: "non-empty bytecode array",
            }));
        }
        Ok(Ropper {
            insns: &decoded.insns,
            handlers: &code.handlers,
            byte_len: decoded.byte_len,
            base: code.max_locals as u32,
            max_stack: code.max_stack,
            max_locals: code.max_locals,
            return_tag,
            block_starts: HashSet::new(),
            jump_targets: HashSet::new(),
            handler_starts: HashSet::new(),
            fetch_at: HashMap::new(),
            in_frames: HashMap::new(),
            built: HashMap::new(),
        })
    }

    fn index_of_pc(&self, pc: u32) -> Result<usize, Error> {
        self.insns
            .binary_search_by_key(&pc, |(at, _)| *at)
            .map_err(|_| {
                Error::MalformedInput(ParseError {
                    offset: pc as usize,
                    expected: "branch target at an instruction boundary",
                })
            })
    }

    /// Does this stack-machine instruction close its basic block?
    fn is_ender(insn: &JInsn) -> bool {
        Self::branch_targets(insn).is_some() || Self::throw_result(insn).is_some() || {
            matches!(
                insn,
                JInsn::ArrayStore { .. }
                    | JInsn::PutField { .. }
                    | JInsn::PutStatic { .. }
                    | JInsn::Invoke { ret: None, .. }
                    | JInsn::CheckCast { .. }
                    | JInsn::MonitorEnter
                    | JInsn::MonitorExit
            )
        }
    }

    /// Jump targets of a branch-like instruction (`None` for straight-line)
    fn branch_targets(insn: &JInsn) -> Option<Vec<u32>> {
        match insn {
            JInsn::If { target, .. } => Some(vec![*target]),
            JInsn::Goto { target } => Some(vec![*target]),
            JInsn::TableSwitch {
                default, targets, ..
            } => {
                let mut out = targets.clone();
                out.push(*default);
                Some(out)
            }
            JInsn::LookupSwitch { default, pairs } => {
                let mut out: Vec<u32> = pairs.iter().map(|(_, t)| *t).collect();
                out.push(*default);
                Some(out)
            }
            JInsn::Return(_) | JInsn::Throw => Some(vec![]),
            _ => None,
        }
    }

    /// The result a throwing instruction delivers through a leading fetch in
    /// its primary successor, if any
    fn throw_result(insn: &JInsn) -> Option<FetchKind> {
        match insn {
            JInsn::Invoke { ret: Some(tag), .. } => Some(FetchKind::Invoke(*tag)),
            JInsn::GetField { tag, .. } | JInsn::GetStatic { tag, .. } => {
                Some(FetchKind::Pseudo(*tag))
            }
            JInsn::ArrayLoad { tag, .. } => Some(FetchKind::Pseudo(*tag)),
            JInsn::ArrayLength | JInsn::InstanceOf { .. } => {
                Some(FetchKind::Pseudo(TypeTag::Int))
            }
            JInsn::New { .. } | JInsn::NewArray(_) => Some(FetchKind::Pseudo(TypeTag::Object)),
            JInsn::Binop {
                op: Binop::Div | Binop::Rem,
                tag,
            } if matches!(tag, TypeTag::Int | TypeTag::Long) => Some(FetchKind::Pseudo(*tag)),
            _ => None,
        }
    }

    /// Handlers covering `pc`, in table order, cut after the first catch-all
    fn handlers_for(&self, pc: u32) -> Vec<&'a ExceptionTableEntry> {
        let mut out = vec![];
        for handler in self.handlers {
            if (handler.start_pc as u32) <= pc && pc < handler.end_pc as u32 {
                out.push(handler);
                if handler.catch_type == 0 {
                    break;
                }
            }
        }
        out
    }

    /// First pass: find block boundaries, jump targets, and fetch sites
    fn scan_boundaries(&mut self) -> Result<(), Error> {
        self.block_starts.insert(self.insns[0].0);

        for handler in self.handlers {
            let pc = handler.handler_pc as u32;
            self.index_of_pc(pc)?;
            self.block_starts.insert(pc);
            self.jump_targets.insert(pc);
            self.handler_starts.insert(pc);
        }

        for (idx, (pc, insn)) in self.insns.iter().enumerate() {
            if let Some(targets) = Self::branch_targets(insn) {
                for target in targets {
                    self.index_of_pc(target)?;
                    self.block_starts.insert(target);
                    self.jump_targets.insert(target);
                }
            }
            if Self::is_ender(insn) {
                let falls_through = matches!(insn, JInsn::If { .. })
                    || Self::branch_targets(insn).is_none();
                if let Some((next_pc, _)) = self.insns.get(idx + 1) {
                    self.block_starts.insert(*next_pc);
                    if let Some(fetch) = Self::throw_result(insn) {
                        self.fetch_at.insert(*next_pc, fetch);
                    }
                } else if falls_through {
                    return Err(Error::MalformedInput(ParseError {
                        offset: *pc as usize,
                        expected: "instruction after fall-through",
                    }));
                }
            }
        }

        // straight-line code at the very end would run off the method
        let (last_pc, last) = self.insns.last().expect("checked non-empty");
        if !Self::is_ender(last) {
            return Err(Error::MalformedInput(ParseError {
                offset: *last_pc as usize,
                expected: "branch or return at end of bytecode",
            }));
        }

        // A jump into a result-fetch site would let control reach the fetch
        // without its thrower
        for pc in self.fetch_at.keys() {
            if self.jump_targets.contains(pc) {
                return Err(Inconsistency::MisplacedResultFetch { block: *pc }.into());
            }
        }
        Ok(())
    }

    /// Second pass: worklist simulation over reachable blocks
    fn simulate_all(&mut self, param_tags: &[TypeTag]) -> Result<(), Error> {
        let first_pc = self.insns[0].0;
        let mut locals = vec![None; self.max_locals as usize];
        let mut slot = 0usize;
        for tag in param_tags {
            if slot + tag.category() as usize > locals.len() {
                return Err(Error::MalformedInput(ParseError {
                    offset: 0,
                    expected: "max_locals covering all parameters",
                }));
            }
            locals[slot] = Some(*tag);
            slot += tag.category() as usize;
        }
        self.in_frames.insert(
            first_pc,
            Frame {
                locals,
                stack: vec![],
            },
        );

        let mut worklist = vec![first_pc];
        while let Some(pc) = worklist.pop() {
            let changed = self.simulate_block(pc)?;
            worklist.extend(changed);
        }
        Ok(())
    }

    /// Merge `frame` into the in-frame of `target`; returns whether `target`
    /// needs (re-)simulation
    fn merge_into(&mut self, target: u32, frame: Frame, at_pc: u32) -> Result<bool, Error> {
        match self.in_frames.get_mut(&target) {
            None => {
                self.in_frames.insert(target, frame);
                Ok(true)
            }
            Some(old) => {
                if old.stack.len() != frame.stack.len() {
                    return Err(Inconsistency::FrameMerge {
                        at_pc,
                        detail: "operand stack depth mismatch",
                    }
                    .into());
                }
                for (a, b) in old.stack.iter().zip(frame.stack.iter()) {
                    if a != b {
                        return Err(Inconsistency::FrameMerge {
                            at_pc,
                            detail: "operand stack type mismatch",
                        }
                        .into());
                    }
                }
                let mut changed = false;
                for (a, b) in old.locals.iter_mut().zip(frame.locals.iter()) {
                    if *a != *b && a.is_some() {
                        *a = None;
                        changed = true;
                    }
                }
                Ok(changed)
            }
        }
    }

    fn simulate_block(&mut self, start_pc: u32) -> Result<Vec<u32>, Error> {
        let base = self.base;
        let mut frame = self.in_frames[&start_pc].clone();
        let mut out: Vec<Insn> = vec![];

        // Leading result fetch or exception fetch
        if let Some(fetch) = self.fetch_at.get(&start_pc).copied() {
            let top = frame.top_spec(base).ok_or(Inconsistency::StackDepth {
                at_pc: start_pc,
            })?;
            let (op, tag) = match fetch {
                FetchKind::Invoke(tag) => (Rop::MoveResult, tag),
                FetchKind::Pseudo(tag) => (Rop::MoveResultPseudo, tag),
            };
            if top.tag != tag {
                return Err(Inconsistency::FrameMerge {
                    at_pc: start_pc,
                    detail: "result type does not match stack top",
                }
                .into());
            }
            out.push(Insn::new(op, Some(top), vec![]));
        } else if self.handler_starts.contains(&start_pc) {
            let top = frame.top_spec(base).ok_or(Inconsistency::StackDepth {
                at_pc: start_pc,
            })?;
            out.push(Insn::new(Rop::MoveException, Some(top), vec![]));
        }

        let mut idx = self.index_of_pc(start_pc)?;
        let mut sim = BlockSim {
            frame: &mut frame,
            base,
            max_stack: self.max_stack,
            out: &mut out,
        };

        let (successors, primary, out_frames) = loop {
            let (pc, insn) = &self.insns[idx];
            let pc = *pc;

            if let Some(ended) = sim.step(pc, insn, self)? {
                break ended;
            }

            idx += 1;
            let (next_pc, _) = &self.insns[idx];
            if self.block_starts.contains(next_pc) {
                // fall into the next block through an explicit goto
                sim.out.push(Insn::new(Rop::Goto, None, vec![]));
                let out_frame = sim.frame.clone();
                break (vec![*next_pc], Some(*next_pc), vec![(*next_pc, out_frame)]);
            }
        };

        self.built.insert(
            start_pc,
            BasicBlock {
                label: start_pc,
                insns: out,
                successors,
                primary_successor: primary,
            },
        );

        let mut requeue = vec![];
        let mut seen = HashSet::new();
        for (target, out_frame) in out_frames {
            if self.merge_into(target, out_frame, start_pc)? && seen.insert(target) {
                requeue.push(target);
            }
        }
        Ok(requeue)
    }

    /// Third pass: gather simulated blocks and prepend the parameter block
    fn assemble(&mut self, param_tags: &[TypeTag]) -> Result<RopMethod, Error> {
        let entry_label = self.byte_len;
        let first_pc = self.insns[0].0;

        let mut entry_insns = vec![];
        let mut slot = 0u16;
        for tag in param_tags {
            entry_insns.push(Insn::new(
                Rop::MoveParam(slot),
                Some(RegisterSpec::new(slot as u32, *tag)),
                vec![],
            ));
            slot += tag.category() as u16;
        }
        entry_insns.push(Insn::new(Rop::Goto, None, vec![]));

        let mut blocks = vec![BasicBlock {
            label: entry_label,
            insns: entry_insns,
            successors: vec![first_pc],
            primary_successor: Some(first_pc),
        }];
        let mut labels: Vec<u32> = self.built.keys().copied().collect();
        labels.sort_unstable();
        for label in labels {
            blocks.push(self.built.remove(&label).expect("label just listed"));
        }

        let method = RopMethod {
            blocks,
            entry_label,
            param_width: slot,
            reg_count: self.base + self.max_stack as u32 + SCRATCH_UNITS,
        };
        method.verify()?;
        Ok(method)
    }
}

/// Per-block simulation helpers: the frame plus the instruction sink
struct BlockSim<'f> {
    frame: &'f mut Frame,
    base: u32,
    max_stack: u16,
    out: &'f mut Vec<Insn>,
}

/// What a block-ending step produces: successor labels, primary successor,
/// and the frames to propagate along each edge
type BlockEnd = (Vec<u32>, Option<u32>, Vec<(u32, Frame)>);

impl BlockSim<'_> {
    fn push(&mut self, tag: TypeTag, at_pc: u32) -> Result<RegisterSpec, Error> {
        if self.frame.stack_units() + tag.category() > self.max_stack as u32 {
            return Err(Inconsistency::StackDepth { at_pc }.into());
        }
        self.frame.stack.push(tag);
        Ok(self
            .frame
            .top_spec(self.base)
            .expect("cell was just pushed"))
    }

    fn pop(&mut self, at_pc: u32) -> Result<RegisterSpec, Error> {
        let spec = self
            .frame
            .top_spec(self.base)
            .ok_or(Inconsistency::StackDepth { at_pc })?;
        self.frame.stack.pop();
        Ok(spec)
    }

    fn local_reg(&self, slot: u16, at_pc: u32) -> Result<RegisterSpec, Error> {
        let tag = self
            .frame
            .locals
            .get(slot as usize)
            .copied()
            .flatten()
            .ok_or(Inconsistency::UndefinedLocal { at_pc, slot })?;
        Ok(RegisterSpec::new(slot as u32, tag))
    }

    /// Replace the top `popped` cells with `pattern` (indices into the popped
    /// cells, deepest first), routing through scratch registers
    fn restack(&mut self, popped: usize, pattern: &[usize], at_pc: u32) -> Result<(), Error> {
        if self.frame.stack.len() < popped {
            return Err(Inconsistency::StackDepth { at_pc }.into());
        }
        let cells: Vec<RegisterSpec> = (0..popped)
            .map(|i| {
                let idx = self.frame.stack.len() - popped + i;
                RegisterSpec::new(self.frame.cell_reg(self.base, idx), self.frame.stack[idx])
            })
            .collect();

        // Cells that keep their exact position need no move at all
        let stable = pattern
            .iter()
            .enumerate()
            .take_while(|(i, p)| *i < popped && **p == *i)
            .count();

        // Save everything else we will read into scratch space
        let scratch_base = self.base + self.max_stack as u32;
        let mut scratch: HashMap<usize, RegisterSpec> = HashMap::new();
        let mut scratch_off = 0;
        for cell_idx in pattern[stable..].iter() {
            if scratch.contains_key(cell_idx) {
                continue;
            }
            let src = cells[*cell_idx];
            let dst = RegisterSpec::new(scratch_base + scratch_off, src.tag);
            scratch_off += src.tag.category();
            self.out.push(Insn::new(Rop::Move, Some(dst), vec![src]));
            scratch.insert(*cell_idx, dst);
        }

        for _ in 0..popped {
            self.frame.stack.pop();
        }
        for (i, cell_idx) in pattern.iter().enumerate() {
            let tag = cells[*cell_idx].tag;
            if self.frame.stack_units() + tag.category() > self.max_stack as u32 {
                return Err(Inconsistency::StackDepth { at_pc }.into());
            }
            self.frame.stack.push(tag);
            if i < stable {
                continue;
            }
            let dst = self
                .frame
                .top_spec(self.base)
                .expect("cell was just pushed");
            self.out
                .push(Insn::new(Rop::Move, Some(dst), vec![scratch[cell_idx]]));
        }
        Ok(())
    }

    /// Simulate one instruction; `Some` means the block ended here
    fn step(&mut self, pc: u32, insn: &JInsn, ctx: &Ropper) -> Result<Option<BlockEnd>, Error> {
        let next_pc = || -> u32 {
            // enders always have a following instruction (checked in scan)
            let idx = ctx.index_of_pc(pc).expect("pc of current instruction");
            ctx.insns.get(idx + 1).map(|(p, _)| *p).unwrap_or(u32::MAX)
        };

        // Straight-line instructions first
        match insn {
            JInsn::Nop => return Ok(None),
            JInsn::Const(value) => {
                let dst = self.push(value.tag(), pc)?;
                self.out
                    .push(Insn::new(Rop::Const(*value), Some(dst), vec![]));
                return Ok(None);
            }
            JInsn::Load { slot, tag } => {
                let src = self.local_reg(*slot, pc)?;
                if src.tag != *tag {
                    return Err(Inconsistency::FrameMerge {
                        at_pc: pc,
                        detail: "local load type mismatch",
                    }
                    .into());
                }
                let dst = self.push(*tag, pc)?;
                self.out.push(Insn::new(Rop::Move, Some(dst), vec![src]));
                return Ok(None);
            }
            JInsn::Store { slot, tag } => {
                let src = self.pop(pc)?;
                if src.tag != *tag {
                    return Err(Inconsistency::FrameMerge {
                        at_pc: pc,
                        detail: "local store type mismatch",
                    }
                    .into());
                }
                if *slot as usize + tag.category() as usize > self.frame.locals.len() {
                    return Err(Inconsistency::UndefinedLocal { at_pc: pc, slot: *slot }.into());
                }
                let dst = RegisterSpec::new(*slot as u32, *tag);
                // a wide store clobbers the following slot; any store kills a
                // previous wide value straddling this slot
                if *slot > 0 {
                    if let Some(prev) = self.frame.locals[*slot as usize - 1] {
                        if prev.is_wide() {
                            self.frame.locals[*slot as usize - 1] = None;
                        }
                    }
                }
                self.frame.locals[*slot as usize] = Some(*tag);
                if tag.is_wide() {
                    self.frame.locals[*slot as usize + 1] = None;
                }
                self.out.push(Insn::new(Rop::Move, Some(dst), vec![src]));
                return Ok(None);
            }
            JInsn::Pop => {
                self.pop(pc)?;
                return Ok(None);
            }
            JInsn::Pop2 => {
                let top = self.pop(pc)?;
                if !top.tag.is_wide() {
                    self.pop(pc)?;
                }
                return Ok(None);
            }
            JInsn::Dup => {
                self.restack(1, &[0, 0], pc)?;
                return Ok(None);
            }
            JInsn::DupX1 => {
                self.restack(2, &[1, 0, 1], pc)?;
                return Ok(None);
            }
            JInsn::DupX2 => {
                // form depends on whether the value under the top is wide
                let n = self.frame.stack.len();
                let under_wide = n >= 2 && self.frame.stack[n - 2].is_wide();
                if under_wide {
                    self.restack(2, &[1, 0, 1], pc)?;
                } else {
                    self.restack(3, &[2, 0, 1, 2], pc)?;
                }
                return Ok(None);
            }
            JInsn::Dup2 => {
                let top_wide = self
                    .frame
                    .stack
                    .last()
                    .map(|tag| tag.is_wide())
                    .unwrap_or(false);
                if top_wide {
                    self.restack(1, &[0, 0], pc)?;
                } else {
                    self.restack(2, &[0, 1, 0, 1], pc)?;
                }
                return Ok(None);
            }
            JInsn::Swap => {
                self.restack(2, &[1, 0], pc)?;
                return Ok(None);
            }
            JInsn::Neg(tag) => {
                let src = self.pop(pc)?;
                let dst = self.push(*tag, pc)?;
                self.out.push(Insn::new(Rop::Neg, Some(dst), vec![src]));
                return Ok(None);
            }
            JInsn::Iinc { slot, amount } => {
                let local = self.local_reg(*slot, pc)?;
                if local.tag != TypeTag::Int {
                    return Err(Inconsistency::FrameMerge {
                        at_pc: pc,
                        detail: "iinc on a non-int local",
                    }
                    .into());
                }
                let tmp = RegisterSpec::new(self.base + self.max_stack as u32, TypeTag::Int);
                self.out.push(Insn::new(
                    Rop::Const(ConstValue::Int(*amount as i32)),
                    Some(tmp),
                    vec![],
                ));
                self.out.push(Insn::new(
                    Rop::Binop(Binop::Add),
                    Some(local),
                    vec![local, tmp],
                ));
                return Ok(None);
            }
            JInsn::Conv { to, .. } => {
                let src = self.pop(pc)?;
                let dst = self.push(*to, pc)?;
                self.out.push(Insn::new(Rop::Conv, Some(dst), vec![src]));
                return Ok(None);
            }
            JInsn::Truncate(trunc) => {
                let src = self.pop(pc)?;
                let dst = self.push(TypeTag::Int, pc)?;
                self.out
                    .push(Insn::new(Rop::Truncate(*trunc), Some(dst), vec![src]));
                return Ok(None);
            }
            JInsn::Cmp(kind) => {
                let b = self.pop(pc)?;
                let a = self.pop(pc)?;
                let dst = self.push(TypeTag::Int, pc)?;
                self.out
                    .push(Insn::new(Rop::Cmp(*kind), Some(dst), vec![a, b]));
                return Ok(None);
            }
            JInsn::Binop { op, tag } => {
                // int/long div and rem fall through to the throwing path
                if Ropper::throw_result(insn).is_none() {
                    let b = self.pop(pc)?;
                    let a = self.pop(pc)?;
                    let dst = self.push(*tag, pc)?;
                    self.out
                        .push(Insn::new(Rop::Binop(*op), Some(dst), vec![a, b]));
                    return Ok(None);
                }
            }
            _ => {}
        }

        // Block enders: build the instruction, its successors, and the
        // frames flowing along each edge
        let handlers = ctx.handlers_for(pc);
        let handler_edge = |frame: &Frame| -> Vec<(u32, Frame)> {
            handlers
                .iter()
                .map(|h| {
                    (
                        h.handler_pc as u32,
                        Frame {
                            locals: frame.locals.clone(),
                            stack: vec![TypeTag::Object],
                        },
                    )
                })
                .collect()
        };

        let ended: BlockEnd = match insn {
            JInsn::If {
                cond,
                vs_zero,
                target,
                ..
            } => {
                let mut sources = vec![self.pop(pc)?];
                if !*vs_zero {
                    sources.insert(0, self.pop(pc)?);
                }
                self.out.push(Insn::new(Rop::If(*cond), None, sources));
                let fall = next_pc();
                let frame = self.frame.clone();
                (
                    vec![*target, fall],
                    Some(fall),
                    vec![(*target, frame.clone()), (fall, frame)],
                )
            }
            JInsn::Goto { target } => {
                self.out.push(Insn::new(Rop::Goto, None, vec![]));
                (vec![*target], Some(*target), vec![(*target, self.frame.clone())])
            }
            JInsn::TableSwitch {
                default,
                low,
                targets,
            } => {
                let key = self.pop(pc)?;
                let keys: Vec<i32> = (0..targets.len() as i32).map(|i| low + i).collect();
                self.out.push(Insn::new(Rop::Switch(keys), None, vec![key]));
                let mut succ = targets.clone();
                succ.push(*default);
                let frame = self.frame.clone();
                let edges = succ.iter().map(|t| (*t, frame.clone())).collect();
                (succ, Some(*default), edges)
            }
            JInsn::LookupSwitch { default, pairs } => {
                let key = self.pop(pc)?;
                let keys: Vec<i32> = pairs.iter().map(|(k, _)| *k).collect();
                self.out.push(Insn::new(Rop::Switch(keys), None, vec![key]));
                let mut succ: Vec<u32> = pairs.iter().map(|(_, t)| *t).collect();
                succ.push(*default);
                let frame = self.frame.clone();
                let edges = succ.iter().map(|t| (*t, frame.clone())).collect();
                (succ, Some(*default), edges)
            }
            JInsn::Return(tag) => {
                let mut sources = vec![];
                if let Some(tag) = tag {
                    let value = self.pop(pc)?;
                    if value.tag != *tag || Some(*tag) != ctx.return_tag {
                        return Err(Inconsistency::FrameMerge {
                            at_pc: pc,
                            detail: "return value type mismatch",
                        }
                        .into());
                    }
                    sources.push(value);
                } else if ctx.return_tag.is_some() {
                    return Err(Inconsistency::FrameMerge {
                        at_pc: pc,
                        detail: "void return from value-returning method",
                    }
                    .into());
                }
                self.out.push(Insn::new(Rop::Return, None, sources));
                (vec![], None, vec![])
            }
            JInsn::Throw => {
                let exception = self.pop(pc)?;
                self.out.push(Insn::new(Rop::Throw, None, vec![exception]));
                let edges = handler_edge(self.frame);
                let succ = edges.iter().map(|(t, _)| *t).collect();
                (succ, None, edges)
            }

            // Throwing straight-line instructions: handler edges plus the
            // primary fall-through edge, which is always last
            _ => {
                let (rop, sources, result_tag) = self.lower_thrower(pc, insn)?;
                self.out.push(Insn::new(rop, None, sources));
                let fall = next_pc();
                let mut edges = handler_edge(self.frame);
                let mut fall_frame = self.frame.clone();
                if let Some(tag) = result_tag {
                    // the fetched result rides the out-frame's stack top
                    fall_frame.stack.push(tag);
                }
                edges.push((fall, fall_frame));
                let succ = edges.iter().map(|(t, _)| *t).collect();
                (succ, Some(fall), edges)
            }
        };
        Ok(Some(ended))
    }

    /// Lower a throwing non-branch instruction: opcode, sources, result tag
    fn lower_thrower(
        &mut self,
        pc: u32,
        insn: &JInsn,
    ) -> Result<(Rop, Vec<RegisterSpec>, Option<TypeTag>), Error> {
        Ok(match insn {
            JInsn::ArrayLoad { kind, tag } => {
                let index = self.pop(pc)?;
                let array = self.pop(pc)?;
                (Rop::ArrayGet(*kind), vec![array, index], Some(*tag))
            }
            JInsn::ArrayStore { kind, .. } => {
                let value = self.pop(pc)?;
                let index = self.pop(pc)?;
                let array = self.pop(pc)?;
                (Rop::ArrayPut(*kind), vec![value, array, index], None)
            }
            JInsn::GetStatic { index, kind, tag } => (
                Rop::GetStatic {
                    field: *index,
                    kind: *kind,
                },
                vec![],
                Some(*tag),
            ),
            JInsn::PutStatic { index, kind, .. } => {
                let value = self.pop(pc)?;
                (
                    Rop::PutStatic {
                        field: *index,
                        kind: *kind,
                    },
                    vec![value],
                    None,
                )
            }
            JInsn::GetField { index, kind, tag } => {
                let object = self.pop(pc)?;
                (
                    Rop::GetField {
                        field: *index,
                        kind: *kind,
                    },
                    vec![object],
                    Some(*tag),
                )
            }
            JInsn::PutField { index, kind, .. } => {
                let value = self.pop(pc)?;
                let object = self.pop(pc)?;
                (
                    Rop::PutField {
                        field: *index,
                        kind: *kind,
                    },
                    vec![value, object],
                    None,
                )
            }
            JInsn::Invoke {
                kind,
                index,
                arg_words,
                ret,
            } => {
                let mut cells = vec![];
                let mut units = 0u16;
                while units < *arg_words {
                    let cell = self.pop(pc)?;
                    units += cell.tag.category() as u16;
                    cells.push(cell);
                }
                if units != *arg_words {
                    return Err(Inconsistency::StackDepth { at_pc: pc }.into());
                }
                cells.reverse();
                (
                    Rop::Invoke {
                        kind: *kind,
                        method: *index,
                        arg_words: *arg_words,
                    },
                    cells,
                    *ret,
                )
            }
            JInsn::New { index } => (Rop::NewInstance(*index), vec![], Some(TypeTag::Object)),
            JInsn::NewArray(elem) => {
                let count = self.pop(pc)?;
                (Rop::NewArray(*elem), vec![count], Some(TypeTag::Object))
            }
            JInsn::ArrayLength => {
                let array = self.pop(pc)?;
                (Rop::ArrayLength, vec![array], Some(TypeTag::Int))
            }
            JInsn::CheckCast { index } => {
                // in-place check; the value stays where it is
                let value = self
                    .frame
                    .top_spec(self.base)
                    .ok_or(Inconsistency::StackDepth { at_pc: pc })?;
                (Rop::CheckCast(*index), vec![value], None)
            }
            JInsn::InstanceOf { index } => {
                let object = self.pop(pc)?;
                (Rop::InstanceOf(*index), vec![object], Some(TypeTag::Int))
            }
            JInsn::MonitorEnter => {
                let object = self.pop(pc)?;
                (Rop::MonitorEnter, vec![object], None)
            }
            JInsn::MonitorExit => {
                let object = self.pop(pc)?;
                (Rop::MonitorExit, vec![object], None)
            }
            JInsn::Binop { op, tag } => {
                let b = self.pop(pc)?;
                let a = self.pop(pc)?;
                (Rop::Binop(*op), vec![a, b], Some(*tag))
            }
            _ => {
                return Err(Inconsistency::FrameMerge {
                    at_pc: pc,
                    detail: "unexpected straight-line instruction",
                }
                .into())
            }
        })
    }
}

#[cfg(test)]
mod ropper_tests {
    use super::*;
    use crate::cf::{decode_code, ClassParser, ConstantPool};
    use crate::rop::IfCond;

    fn rop(
        bytes: &[u8],
        max_locals: u16,
        max_stack: u16,
        handlers: Vec<ExceptionTableEntry>,
        params: &[TypeTag],
        ret: Option<TypeTag>,
    ) -> RopMethod {
        let pool = ConstantPool::parse(&mut ClassParser::new(&[0x00, 0x01])).unwrap();
        let code = CodeAttribute {
            max_stack,
            max_locals,
            bytecode: bytes.to_vec(),
            handlers,
            attributes: vec![],
        };
        let decoded = decode_code(&code, &pool).unwrap();
        build_rop(&decoded, &code, params, ret).unwrap()
    }

    #[test]
    fn straight_line_add() {
        // iload_0, iload_1, iadd, ireturn
        let method = rop(
            &[0x1a, 0x1b, 0x60, 0xac],
            2,
            2,
            vec![],
            &[TypeTag::Int, TypeTag::Int],
            Some(TypeTag::Int),
        );
        assert_eq!(method.blocks.len(), 2);
        assert_eq!(method.param_width, 2);

        let entry = &method.blocks[0];
        assert_eq!(entry.label, method.entry_label);
        // two parameter bindings plus the goto into the body
        assert_eq!(entry.insns.len(), 3);
        assert_eq!(entry.insns[0].op, Rop::MoveParam(0));

        let body = method.block_by_label(0).unwrap();
        let add = &body.insns[2];
        assert_eq!(add.op, Rop::Binop(Binop::Add));
        assert_eq!(add.result, Some(RegisterSpec::new(2, TypeTag::Int)));
        assert_eq!(
            add.sources,
            vec![
                RegisterSpec::new(2, TypeTag::Int),
                RegisterSpec::new(3, TypeTag::Int)
            ]
        );
        assert_eq!(body.last_insn().op, Rop::Return);
        assert_eq!(
            body.last_insn().sources,
            vec![RegisterSpec::new(2, TypeTag::Int)]
        );
    }

    #[test]
    fn branch_fallthrough_is_primary_and_last() {
        // iload_0, ifeq -> 6, iconst_1, ireturn, iconst_2, ireturn
        let method = rop(
            &[0x1a, 0x99, 0x00, 0x05, 0x04, 0xac, 0x05, 0xac],
            1,
            1,
            vec![],
            &[TypeTag::Int],
            Some(TypeTag::Int),
        );
        let b0 = method.block_by_label(0).unwrap();
        assert!(matches!(b0.last_insn().op, Rop::If(IfCond::Eq)));
        assert_eq!(b0.successors, vec![6, 4]);
        assert_eq!(b0.primary_successor, Some(4));
    }

    #[test]
    fn thrower_result_is_fetched_in_primary_successor() {
        // aload_0, arraylength, ireturn
        let method = rop(
            &[0x2a, 0xbe, 0xac],
            1,
            1,
            vec![],
            &[TypeTag::Object],
            Some(TypeTag::Int),
        );
        let b0 = method.block_by_label(0).unwrap();
        assert_eq!(b0.last_insn().op, Rop::ArrayLength);
        assert_eq!(b0.last_insn().result, None);
        assert_eq!(b0.successors, vec![2]);

        let fetch = &method.block_by_label(2).unwrap().insns[0];
        assert_eq!(fetch.op, Rop::MoveResultPseudo);
        assert_eq!(fetch.result, Some(RegisterSpec::new(1, TypeTag::Int)));
    }

    #[test]
    fn handler_edges_precede_the_primary_edge() {
        // aload_0, arraylength, ireturn, athrow; [0, 3) handled at 3
        let handlers = vec![ExceptionTableEntry {
            start_pc: 0,
            end_pc: 3,
            handler_pc: 3,
            catch_type: 0,
        }];
        let method = rop(
            &[0x2a, 0xbe, 0xac, 0xbf],
            1,
            1,
            handlers,
            &[TypeTag::Object],
            Some(TypeTag::Int),
        );
        let b0 = method.block_by_label(0).unwrap();
        assert_eq!(b0.successors, vec![3, 2]);
        assert_eq!(b0.primary_successor, Some(2));

        let handler = method.block_by_label(3).unwrap();
        assert_eq!(handler.insns[0].op, Rop::MoveException);
        assert_eq!(
            handler.insns[0].result,
            Some(RegisterSpec::new(1, TypeTag::Object))
        );
        assert!(matches!(handler.last_insn().op, Rop::Throw));
        assert!(handler.successors.is_empty());
    }

    #[test]
    fn dup_lowers_to_register_moves() {
        // iconst_0, dup, iadd, ireturn
        let method = rop(
            &[0x03, 0x59, 0x60, 0xac],
            0,
            2,
            vec![],
            &[],
            Some(TypeTag::Int),
        );
        let body = method.block_by_label(0).unwrap();
        assert_eq!(
            body.last_insn().sources,
            vec![RegisterSpec::new(0, TypeTag::Int)]
        );
        let add = &body.insns[body.insns.len() - 2];
        assert_eq!(add.op, Rop::Binop(Binop::Add));
        assert_eq!(
            add.sources,
            vec![
                RegisterSpec::new(0, TypeTag::Int),
                RegisterSpec::new(1, TypeTag::Int)
            ]
        );
    }
}
