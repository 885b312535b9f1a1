use crate::rop::{RegisterSpec, Rop};
use crate::ssa::SsaMethod;
use std::collections::HashMap;

/// Forward copies to the registers they read
///
/// The result of every `move`, and of every phi whose operands all name one
/// register, is an alias of that register; every use of the alias is
/// rewritten to read the original directly. SSA guarantees the original's
/// definition dominates the copy and therefore every use of it, so the
/// rewrite is always sound. Iterates until no use changes, since collapsing
/// a phi's operands can turn the phi itself into a copy. The copies are left
/// in place; dead-code removal deletes them once nothing reads them.
pub fn propagate_copies(method: &mut SsaMethod) {
    loop {
        let mut alias: HashMap<u32, u32> = HashMap::new();
        for block in &method.blocks {
            for phi in &block.phis {
                if let Some((_, first)) = phi.operands.first() {
                    if first.reg != phi.result.reg
                        && phi.operands.iter().all(|(_, operand)| operand.reg == first.reg)
                    {
                        alias.insert(phi.result.reg, first.reg);
                    }
                }
            }
            for insn in &block.insns {
                if let (Rop::Move, Some(result)) = (&insn.op, insn.result) {
                    if let Some(source) = insn.sources.first() {
                        if source.reg != result.reg {
                            alias.insert(result.reg, source.reg);
                        }
                    }
                }
            }
        }

        // collapse chains of copies down to the original definition; every
        // step moves to a strictly dominating definition, so this terminates
        let resolve = |mut reg: u32| {
            while let Some(next) = alias.get(&reg) {
                reg = *next;
            }
            reg
        };

        let mut changed = false;
        for block in method.blocks.iter_mut() {
            for phi in block.phis.iter_mut() {
                for (_, operand) in phi.operands.iter_mut() {
                    let to = resolve(operand.reg);
                    if to != operand.reg {
                        *operand = RegisterSpec::new(to, operand.tag);
                        changed = true;
                    }
                }
            }
            for insn in block.insns.iter_mut() {
                for source in insn.sources.iter_mut() {
                    let to = resolve(source.reg);
                    if to != source.reg {
                        *source = RegisterSpec::new(to, source.tag);
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            return;
        }
    }
}

#[cfg(test)]
mod copy_prop_tests {
    use super::*;
    use crate::rop::{BasicBlock, Binop, IfCond, Insn, RopMethod, TypeTag};
    use crate::ssa::{into_ssa, remove_dead_code};

    fn int(reg: u32) -> RegisterSpec {
        RegisterSpec::new(reg, TypeTag::Int)
    }

    #[test]
    fn move_chains_collapse_to_the_original_definition() {
        // p copied twice, then the second copy added to itself
        let rop = RopMethod {
            blocks: vec![
                BasicBlock {
                    label: 8,
                    insns: vec![
                        Insn::new(Rop::MoveParam(0), Some(int(0)), vec![]),
                        Insn::new(Rop::Goto, None, vec![]),
                    ],
                    successors: vec![0],
                    primary_successor: Some(0),
                },
                BasicBlock {
                    label: 0,
                    insns: vec![
                        Insn::new(Rop::Move, Some(int(1)), vec![int(0)]),
                        Insn::new(Rop::Move, Some(int(2)), vec![int(1)]),
                        Insn::new(Rop::Binop(Binop::Add), Some(int(3)), vec![int(2), int(2)]),
                        Insn::new(Rop::Return, None, vec![int(3)]),
                    ],
                    successors: vec![],
                    primary_successor: None,
                },
            ],
            entry_label: 8,
            param_width: 1,
            reg_count: 4,
        };
        let mut ssa = into_ssa(&rop);
        propagate_copies(&mut ssa);

        let entry = ssa.block_index(8).unwrap();
        let param = ssa.blocks[entry].insns[0].result.unwrap().reg;
        let body = ssa.block_index(0).unwrap();
        let add = ssa.blocks[body]
            .insns
            .iter()
            .find(|insn| matches!(insn.op, Rop::Binop(_)))
            .unwrap();
        assert!(add.sources.iter().all(|source| source.reg == param));

        // the copies are now unread and removable
        remove_dead_code(&mut ssa);
        let body = ssa.block_index(0).unwrap();
        assert!(ssa.blocks[body]
            .insns
            .iter()
            .all(|insn| !matches!(insn.op, Rop::Move)));
    }

    #[test]
    fn phis_merging_one_value_are_forwarded() {
        // both arms of a diamond copy the same parameter into the merged
        // register; the merge's phi collapses onto the parameter
        let rop = RopMethod {
            blocks: vec![
                BasicBlock {
                    label: 0,
                    insns: vec![
                        Insn::new(Rop::MoveParam(0), Some(int(0)), vec![]),
                        Insn::new(Rop::If(IfCond::Eq), None, vec![int(0)]),
                    ],
                    successors: vec![1, 2],
                    primary_successor: Some(2),
                },
                BasicBlock {
                    label: 1,
                    insns: vec![
                        Insn::new(Rop::Move, Some(int(1)), vec![int(0)]),
                        Insn::new(Rop::Goto, None, vec![]),
                    ],
                    successors: vec![3],
                    primary_successor: Some(3),
                },
                BasicBlock {
                    label: 2,
                    insns: vec![
                        Insn::new(Rop::Move, Some(int(1)), vec![int(0)]),
                        Insn::new(Rop::Goto, None, vec![]),
                    ],
                    successors: vec![3],
                    primary_successor: Some(3),
                },
                BasicBlock {
                    label: 3,
                    insns: vec![Insn::new(Rop::Return, None, vec![int(1)])],
                    successors: vec![],
                    primary_successor: None,
                },
            ],
            entry_label: 0,
            param_width: 1,
            reg_count: 2,
        };
        let mut ssa = into_ssa(&rop);
        propagate_copies(&mut ssa);

        let entry = ssa.block_index(0).unwrap();
        let param = ssa.blocks[entry].insns[0].result.unwrap().reg;
        let merge = ssa.block_index(3).unwrap();
        assert_eq!(ssa.blocks[merge].insns[0].sources[0].reg, param);

        remove_dead_code(&mut ssa);
        let merge = ssa.block_index(3).unwrap();
        assert!(ssa.blocks[merge].phis.is_empty());
    }
}
