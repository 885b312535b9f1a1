use crate::rop::{Insn, RegisterSpec, Rop, RopMethod, TypeTag};
use crate::ssa::{DomTree, PhiInsn, SsaBasicBlock, SsaMethod};
use crate::util::BitSet;
use std::collections::HashMap;

/// Convert a Rop method into SSA form
///
/// Critical edges (multi-successor source into multi-predecessor target) are
/// split first so that phi-removal moves later have an edge-private block to
/// land in. Phis are placed at iterated dominance frontiers of each
/// register's definition sites, then a dominator-tree walk renames every
/// definition to a fresh register above [`SsaMethod::border`].
pub fn into_ssa(method: &RopMethod) -> SsaMethod {
    let mut blocks: Vec<SsaBasicBlock> = method
        .blocks
        .iter()
        .map(|block| SsaBasicBlock {
            label: block.label,
            phis: vec![],
            insns: block.insns.clone(),
            successors: block.successors.clone(),
            primary_successor: block.primary_successor,
            predecessors: vec![],
        })
        .collect();

    let mut next_label = blocks.iter().map(|b| b.label).max().unwrap_or(0) + 1;
    split_edges(&mut blocks, &mut next_label);
    link_predecessors(&mut blocks);

    let index_of: HashMap<u32, usize> = blocks
        .iter()
        .enumerate()
        .map(|(idx, block)| (block.label, idx))
        .collect();
    let succs: Vec<Vec<usize>> = blocks
        .iter()
        .map(|block| block.successors.iter().map(|s| index_of[s]).collect())
        .collect();
    let preds: Vec<Vec<usize>> = blocks
        .iter()
        .map(|block| block.predecessors.iter().map(|p| index_of[p]).collect())
        .collect();
    let entry = index_of[&method.entry_label];
    let dom = DomTree::build(&succs, &preds, entry);

    place_phis(&mut blocks, &dom, method.reg_count);
    let reg_count = rename(&mut blocks, &dom, entry, method.reg_count);

    SsaMethod {
        blocks,
        entry_label: method.entry_label,
        param_width: method.param_width,
        border: method.reg_count,
        reg_count,
    }
}

/// Insert a forwarding block on every critical edge
fn split_edges(blocks: &mut Vec<SsaBasicBlock>, next_label: &mut u32) {
    let mut pred_count: HashMap<u32, usize> = HashMap::new();
    for block in blocks.iter() {
        for succ in &block.successors {
            *pred_count.entry(*succ).or_insert(0) += 1;
        }
    }

    let mut forwards = vec![];
    for block in blocks.iter_mut() {
        if block.successors.len() < 2 {
            continue;
        }
        // one forwarding block per distinct (source, target) pair; duplicate
        // switch edges to the same case share it
        let mut split_for: HashMap<u32, u32> = HashMap::new();
        for succ in block.successors.iter_mut() {
            if pred_count[succ] < 2 {
                continue;
            }
            let target = *succ;
            let label = *split_for.entry(target).or_insert_with(|| {
                let label = *next_label;
                *next_label += 1;
                forwards.push(SsaBasicBlock {
                    label,
                    phis: vec![],
                    insns: vec![Insn::new(Rop::Goto, None, vec![])],
                    successors: vec![target],
                    primary_successor: Some(target),
                    predecessors: vec![],
                });
                label
            });
            *succ = label;
        }
        if let Some(primary) = block.primary_successor {
            if let Some(label) = split_for.get(&primary) {
                block.primary_successor = Some(*label);
            }
        }
    }
    blocks.extend(forwards);
}

fn link_predecessors(blocks: &mut [SsaBasicBlock]) {
    let mut preds: HashMap<u32, Vec<u32>> = HashMap::new();
    for block in blocks.iter() {
        for succ in &block.successors {
            preds.entry(*succ).or_default().push(block.label);
        }
    }
    for block in blocks.iter_mut() {
        let mut list = preds.remove(&block.label).unwrap_or_default();
        list.dedup();
        block.predecessors = list;
    }
}

/// Place phis at the iterated dominance frontier of each register's defs
fn place_phis(blocks: &mut [SsaBasicBlock], dom: &DomTree, rop_reg_count: u32) {
    let mut def_sites: Vec<BitSet> = vec![BitSet::new(); rop_reg_count as usize];
    let mut tags: Vec<Option<TypeTag>> = vec![None; rop_reg_count as usize];
    for (idx, block) in blocks.iter().enumerate() {
        for insn in &block.insns {
            if let Some(result) = insn.result {
                def_sites[result.reg as usize].insert(idx);
                tags[result.reg as usize].get_or_insert(result.tag);
            }
        }
    }

    for reg in 0..rop_reg_count {
        let tag = match tags[reg as usize] {
            Some(tag) => tag,
            None => continue,
        };
        let mut worklist = def_sites[reg as usize].clone();
        let mut placed = BitSet::new();
        while let Some(site) = worklist.pop() {
            for frontier in dom.frontiers[site].iter() {
                if !placed.insert(frontier) {
                    continue;
                }
                blocks[frontier].phis.push(PhiInsn {
                    result: RegisterSpec::new(reg, tag),
                    rop_reg: reg,
                    operands: vec![],
                });
                worklist.insert(frontier);
            }
        }
    }
}

/// Rename definitions walking the dominator tree with an explicit stack
///
/// Returns the total SSA register count. Reads with no reaching definition
/// fall back to the identity registers below the border; those only ever
/// feed phis that dead-code removal deletes.
fn rename(
    blocks: &mut [SsaBasicBlock],
    dom: &DomTree,
    entry: usize,
    rop_reg_count: u32,
) -> u32 {
    let index_of: HashMap<u32, usize> = blocks
        .iter()
        .enumerate()
        .map(|(idx, block)| (block.label, idx))
        .collect();

    let mut stacks: Vec<Vec<u32>> = (0..rop_reg_count).map(|reg| vec![reg]).collect();
    let mut next = rop_reg_count;
    let mut fresh = |stacks: &mut Vec<Vec<u32>>, reg: u32| {
        let ssa = next;
        next += 1;
        stacks[reg as usize].push(ssa);
        ssa
    };

    enum Visit {
        Enter(usize),
        Exit(Vec<u32>),
    }
    let mut walk = vec![Visit::Enter(entry)];
    while let Some(visit) = walk.pop() {
        let block_idx = match visit {
            Visit::Enter(idx) => idx,
            Visit::Exit(pushed) => {
                for reg in pushed {
                    stacks[reg as usize].pop();
                }
                continue;
            }
        };

        let mut pushed = vec![];
        {
            let block = &mut blocks[block_idx];
            for phi in block.phis.iter_mut() {
                let ssa = fresh(&mut stacks, phi.rop_reg);
                pushed.push(phi.rop_reg);
                phi.result = RegisterSpec::new(ssa, phi.result.tag);
            }
            for insn in block.insns.iter_mut() {
                for source in insn.sources.iter_mut() {
                    let top = *stacks[source.reg as usize]
                        .last()
                        .expect("identity entry is never popped");
                    *source = RegisterSpec::new(top, source.tag);
                }
                if let Some(result) = insn.result {
                    let ssa = fresh(&mut stacks, result.reg);
                    pushed.push(result.reg);
                    insn.result = Some(RegisterSpec::new(ssa, result.tag));
                }
            }
        }

        // feed phi operands of every CFG successor from this block's state
        let label = blocks[block_idx].label;
        let successors = blocks[block_idx].successors.clone();
        let mut seen = vec![];
        for succ in successors {
            if seen.contains(&succ) {
                continue;
            }
            seen.push(succ);
            let succ_idx = index_of[&succ];
            for phi in blocks[succ_idx].phis.iter_mut() {
                let top = *stacks[phi.rop_reg as usize]
                    .last()
                    .expect("identity entry is never popped");
                phi.operands
                    .push((label, RegisterSpec::new(top, phi.result.tag)));
            }
        }

        walk.push(Visit::Exit(pushed));
        for child in dom.children[block_idx].iter().rev() {
            walk.push(Visit::Enter(*child));
        }
    }

    next
}
