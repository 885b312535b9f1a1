use crate::regalloc::RegisterMapper;
use crate::rop::{BasicBlock, Insn, Rop, RopMethod};
use std::collections::HashMap;

/// Lower an SSA method back to Rop form under a chosen register mapping
///
/// Each phi becomes one move per incoming edge, placed in the predecessor
/// just before its closing branch. Edge splitting during SSA conversion
/// guarantees every phi predecessor has a single successor, so the move runs
/// exactly when the edge is taken. Moves whose source and destination map to
/// the same register are dropped.
pub fn back_to_rop(ssa: &crate::ssa::SsaMethod, mapper: &RegisterMapper) -> RopMethod {
    let mut edge_moves: HashMap<u32, Vec<Insn>> = HashMap::new();
    for block in &ssa.blocks {
        for phi in &block.phis {
            let dst = mapper.map_spec(phi.result);
            for (pred, operand) in &phi.operands {
                let src = mapper.map_spec(*operand);
                if src.reg != dst.reg {
                    edge_moves
                        .entry(*pred)
                        .or_default()
                        .push(Insn::new(Rop::Move, Some(dst), vec![src]));
                }
            }
        }
    }

    let blocks = ssa
        .blocks
        .iter()
        .map(|block| {
            let mut insns: Vec<Insn> = block
                .insns
                .iter()
                .map(|insn| {
                    Insn::new(
                        insn.op.clone(),
                        insn.result.map(|r| mapper.map_spec(r)),
                        insn.sources.iter().map(|s| mapper.map_spec(*s)).collect(),
                    )
                })
                .filter(|insn| {
                    // identity copies vanish under the mapping
                    !(matches!(insn.op, Rop::Move)
                        && insn.result.map(|r| r.reg) == insn.sources.first().map(|s| s.reg))
                })
                .collect();

            if let Some(moves) = edge_moves.remove(&block.label) {
                let branch_at = insns.len() - 1;
                insns.splice(branch_at..branch_at, moves);
            }

            BasicBlock {
                label: block.label,
                insns,
                successors: block.successors.clone(),
                primary_successor: block.primary_successor,
            }
        })
        .collect();

    RopMethod {
        blocks,
        entry_label: ssa.entry_label,
        param_width: ssa.param_width,
        reg_count: mapper.reg_count(),
    }
}

#[cfg(test)]
mod back_tests {
    use super::*;
    use crate::rop::{ConstValue, IfCond, RegisterSpec, TypeTag};
    use crate::ssa::into_ssa;

    fn int(reg: u32) -> RegisterSpec {
        RegisterSpec::new(reg, TypeTag::Int)
    }

    /// A diamond whose merge point needs a phi
    fn diamond() -> RopMethod {
        RopMethod {
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
                        Insn::new(Rop::Const(ConstValue::Int(1)), Some(int(1)), vec![]),
                        Insn::new(Rop::Goto, None, vec![]),
                    ],
                    successors: vec![3],
                    primary_successor: Some(3),
                },
                BasicBlock {
                    label: 2,
                    insns: vec![
                        Insn::new(Rop::Const(ConstValue::Int(2)), Some(int(1)), vec![]),
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
        }
    }

    #[test]
    fn phis_become_edge_moves() {
        let ssa = into_ssa(&diamond());
        // map every ssa register to itself so moves survive verbatim
        let mapper = RegisterMapper::identity(ssa.reg_count);
        let rop = back_to_rop(&ssa, &mapper);

        let merge = rop.block_by_label(3).unwrap();
        assert!(merge
            .insns
            .iter()
            .all(|insn| !matches!(insn.op, Rop::Move)));

        // both arms gained a move feeding the merge's register
        let phi_reg = merge.insns[0].sources[0].reg;
        for arm in [1, 2] {
            let block = rop.block_by_label(arm).unwrap();
            let before_branch = &block.insns[block.insns.len() - 2];
            assert!(matches!(before_branch.op, Rop::Move));
            assert_eq!(before_branch.result.unwrap().reg, phi_reg);
        }
    }

    #[test]
    fn identity_moves_are_dropped() {
        let ssa = into_ssa(&diamond());
        // map both const definitions and the phi to one register
        let merge_idx = ssa.block_index(3).unwrap();
        let phi = &ssa.blocks[merge_idx].phis[0];
        let mut map: Vec<u32> = (0..ssa.reg_count).collect();
        let target = phi.result.reg;
        for (_, operand) in &phi.operands {
            map[operand.reg as usize] = target;
        }
        map[target as usize] = target;
        let mapper = RegisterMapper::new(map, ssa.reg_count);
        let rop = back_to_rop(&ssa, &mapper);
        for arm in [1, 2] {
            let block = rop.block_by_label(arm).unwrap();
            assert!(block.insns.iter().all(|i| !matches!(i.op, Rop::Move)));
        }
    }
}
