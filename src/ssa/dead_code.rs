use crate::rop::Insn;
use crate::ssa::SsaMethod;
use crate::util::BitSet;

/// Delete instructions whose results never reach a side effect
///
/// A register is live when an instruction that must stay reads it, directly
/// or through a chain of value definitions and phis. Instructions that must
/// stay are everything with branch semantics, every can-throw instruction,
/// the result-fetch and parameter-binding pseudo-instructions, and anything
/// with no result; their uses seed a backward mark that walks use to
/// definition. Everything defining only unmarked registers goes, including
/// phi families whose results are consumed by nothing but each other.
pub fn remove_dead_code(method: &mut SsaMethod) {
    let keep = |insn: &Insn| insn.has_side_effect() || insn.result.is_none();

    // sources of each register's (unique) value definition, for the walk
    // from a live register back to the registers feeding it
    let mut feeds: Vec<Vec<u32>> = vec![vec![]; method.reg_count as usize];
    let mut live = BitSet::with_capacity(method.reg_count as usize);
    let mut work: Vec<u32> = vec![];
    for block in &method.blocks {
        for phi in &block.phis {
            feeds[phi.result.reg as usize] = phi
                .operands
                .iter()
                .map(|(_, operand)| operand.reg)
                .collect();
        }
        for insn in &block.insns {
            if keep(insn) {
                for source in &insn.sources {
                    if live.insert(source.reg as usize) {
                        work.push(source.reg);
                    }
                }
            } else if let Some(result) = insn.result {
                feeds[result.reg as usize] = insn.sources.iter().map(|s| s.reg).collect();
            }
        }
    }

    while let Some(reg) = work.pop() {
        for feed in std::mem::take(&mut feeds[reg as usize]) {
            if live.insert(feed as usize) {
                work.push(feed);
            }
        }
    }

    for block in method.blocks.iter_mut() {
        block
            .phis
            .retain(|phi| live.contains(phi.result.reg as usize));
        block.insns.retain(|insn| {
            keep(insn)
                || insn
                    .result
                    .map_or(true, |result| live.contains(result.reg as usize))
        });
    }
}

#[cfg(test)]
mod dead_code_tests {
    use super::*;
    use crate::rop::{BasicBlock, ConstValue, IfCond, Insn, RegisterSpec, Rop, RopMethod, TypeTag};
    use crate::ssa::into_ssa;

    fn int(reg: u32) -> RegisterSpec {
        RegisterSpec::new(reg, TypeTag::Int)
    }

    fn method_with_dead_chain() -> SsaMethod {
        // r0 = 1; r1 = r0 + r0 (dead); return
        let rop = RopMethod {
            blocks: vec![BasicBlock {
                label: 0,
                insns: vec![
                    Insn::new(Rop::Const(ConstValue::Int(1)), Some(int(0)), vec![]),
                    Insn::new(
                        Rop::Binop(crate::rop::Binop::Add),
                        Some(int(1)),
                        vec![int(0), int(0)],
                    ),
                    Insn::new(Rop::Return, None, vec![]),
                ],
                successors: vec![],
                primary_successor: None,
            }],
            entry_label: 0,
            param_width: 0,
            reg_count: 2,
        };
        into_ssa(&rop)
    }

    #[test]
    fn removes_transitively_dead_defs() {
        let mut ssa = method_with_dead_chain();
        remove_dead_code(&mut ssa);
        // only the return survives
        assert_eq!(ssa.blocks[0].insns.len(), 1);
        assert!(matches!(ssa.blocks[0].insns[0].op, Rop::Return));
    }

    #[test]
    fn is_idempotent() {
        let mut ssa = method_with_dead_chain();
        remove_dead_code(&mut ssa);
        let once = ssa.blocks[0].insns.clone();
        remove_dead_code(&mut ssa);
        assert_eq!(ssa.blocks[0].insns, once);
    }

    #[test]
    fn keeps_throwing_defs_with_unread_results() {
        // an array load whose fetched value is never used must still run,
        // since it can throw
        let rop = RopMethod {
            blocks: vec![
                BasicBlock {
                    label: 0,
                    insns: vec![
                        Insn::new(Rop::MoveParam(0), Some(RegisterSpec::new(0, TypeTag::Object)), vec![]),
                        Insn::new(Rop::Goto, None, vec![]),
                    ],
                    successors: vec![1],
                    primary_successor: Some(1),
                },
                BasicBlock {
                    label: 1,
                    insns: vec![Insn::new(
                        Rop::ArrayLength,
                        None,
                        vec![RegisterSpec::new(0, TypeTag::Object)],
                    )],
                    successors: vec![2],
                    primary_successor: Some(2),
                },
                BasicBlock {
                    label: 2,
                    insns: vec![
                        Insn::new(Rop::MoveResultPseudo, Some(int(1)), vec![]),
                        Insn::new(Rop::Return, None, vec![]),
                    ],
                    successors: vec![],
                    primary_successor: None,
                },
            ],
            entry_label: 0,
            param_width: 1,
            reg_count: 2,
        };
        let mut ssa = into_ssa(&rop);
        remove_dead_code(&mut ssa);
        let thrower = &ssa.blocks[ssa.block_index(1).unwrap()];
        assert!(matches!(thrower.insns[0].op, Rop::ArrayLength));
        let fetch = &ssa.blocks[ssa.block_index(2).unwrap()];
        assert!(matches!(fetch.insns[0].op, Rop::MoveResultPseudo));
    }

    #[test]
    fn circular_phi_webs_are_removed() {
        // a loop-carried value that nothing outside its own update ever
        // reads: the header phi and the add feed only each other
        let rop = RopMethod {
            blocks: vec![
                BasicBlock {
                    label: 0,
                    insns: vec![
                        Insn::new(Rop::Const(ConstValue::Int(1)), Some(int(0)), vec![]),
                        Insn::new(Rop::Const(ConstValue::Int(0)), Some(int(1)), vec![]),
                        Insn::new(Rop::Goto, None, vec![]),
                    ],
                    successors: vec![1],
                    primary_successor: Some(1),
                },
                BasicBlock {
                    label: 1,
                    insns: vec![
                        Insn::new(
                            Rop::Binop(crate::rop::Binop::Add),
                            Some(int(0)),
                            vec![int(0), int(0)],
                        ),
                        Insn::new(Rop::If(IfCond::Ne), None, vec![int(1)]),
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
            param_width: 0,
            reg_count: 2,
        };
        let mut ssa = into_ssa(&rop);
        let header = ssa.block_index(1).unwrap();
        assert_eq!(ssa.blocks[header].phis.len(), 1);

        remove_dead_code(&mut ssa);
        let header = ssa.block_index(1).unwrap();
        assert!(ssa.blocks[header].phis.is_empty());
        assert!(ssa
            .blocks
            .iter()
            .all(|block| block.insns.iter().all(|i| !matches!(i.op, Rop::Binop(_)))));
    }
}
