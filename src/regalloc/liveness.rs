use crate::regalloc::InterferenceGraph;
use crate::ssa::SsaMethod;
use crate::util::BitSet;
use std::collections::HashMap;

/// Per-block live-in and live-out sets of SSA registers
#[derive(Debug)]
pub struct Liveness {
    pub live_in: Vec<BitSet>,
    pub live_out: Vec<BitSet>,
}

/// Compute liveness one register at a time
///
/// Each use walks backwards to its reaching definition, marking live-in and
/// propagating into predecessors through an explicit worklist instead of
/// recursing. A phi operand counts as a use at the end of the corresponding
/// predecessor, never as a use in the phi's own block.
pub fn analyze(method: &SsaMethod) -> Liveness {
    let n = method.blocks.len();
    let index_of: HashMap<u32, usize> = method
        .blocks
        .iter()
        .enumerate()
        .map(|(idx, block)| (block.label, idx))
        .collect();

    let mut live_in = vec![BitSet::new(); n];
    let mut live_out = vec![BitSet::new(); n];

    // (block, walk backwards from before this instruction index, register)
    let mut work: Vec<(usize, usize, u32)> = vec![];
    for (b, block) in method.blocks.iter().enumerate() {
        for (i, insn) in block.insns.iter().enumerate() {
            for source in &insn.sources {
                work.push((b, i, source.reg));
            }
        }
        for phi in &block.phis {
            for (pred, operand) in &phi.operands {
                let p = index_of[pred];
                if live_out[p].insert(operand.reg as usize) {
                    work.push((p, method.blocks[p].insns.len(), operand.reg));
                }
            }
        }
    }

    while let Some((b, upto, reg)) = work.pop() {
        let block = &method.blocks[b];
        let defined_before = block.insns[..upto]
            .iter()
            .any(|insn| insn.result.map(|r| r.reg) == Some(reg))
            || block.phis.iter().any(|phi| phi.result.reg == reg);
        if defined_before {
            continue;
        }
        if !live_in[b].insert(reg as usize) {
            continue;
        }
        for pred in &block.predecessors {
            let p = index_of[pred];
            if live_out[p].insert(reg as usize) {
                work.push((p, method.blocks[p].insns.len(), reg));
            }
        }
    }

    Liveness { live_in, live_out }
}

/// Build the interference graph from liveness
///
/// A definition interferes with everything live just after it. On top of
/// that, phi results within one block mutually interfere, and each phi's
/// result interferes with the operands of the other phis in its block: the
/// moves that later replace the phis run sequentially, so their sources and
/// destinations must not alias.
pub fn build_interference(method: &SsaMethod, liveness: &Liveness) -> InterferenceGraph {
    let mut graph = InterferenceGraph::new(method.reg_count);

    for (b, block) in method.blocks.iter().enumerate() {
        let mut live = liveness.live_out[b].clone();
        for insn in block.insns.iter().rev() {
            if let Some(result) = insn.result {
                live.remove(result.reg as usize);
                for other in live.iter() {
                    graph.add(result.reg, other as u32);
                }
            }
            for source in &insn.sources {
                live.insert(source.reg as usize);
            }
        }

        for (i, phi) in block.phis.iter().enumerate() {
            for other in live.iter() {
                graph.add(phi.result.reg, other as u32);
            }
            for (j, other) in block.phis.iter().enumerate() {
                if i == j {
                    continue;
                }
                graph.add(phi.result.reg, other.result.reg);
                for (_, operand) in &other.operands {
                    graph.add(phi.result.reg, operand.reg);
                }
            }
        }
    }

    graph
}

#[cfg(test)]
mod liveness_tests {
    use super::*;
    use crate::rop::{
        BasicBlock, ConstValue, IfCond, Insn, RegisterSpec, Rop, RopMethod, TypeTag,
    };
    use crate::ssa::into_ssa;

    fn int(reg: u32) -> RegisterSpec {
        RegisterSpec::new(reg, TypeTag::Int)
    }

    /// r0 defined up top, used after a branch rejoin: live across the middle
    fn crossing_method() -> SsaMethod {
        into_ssa(&RopMethod {
            blocks: vec![
                BasicBlock {
                    label: 0,
                    insns: vec![
                        Insn::new(Rop::MoveParam(0), Some(int(0)), vec![]),
                        Insn::new(Rop::Const(ConstValue::Int(5)), Some(int(1)), vec![]),
                        Insn::new(Rop::If(IfCond::Eq), None, vec![int(1)]),
                    ],
                    successors: vec![2, 1],
                    primary_successor: Some(1),
                },
                BasicBlock {
                    label: 1,
                    insns: vec![
                        Insn::new(Rop::Const(ConstValue::Int(9)), Some(int(1)), vec![]),
                        Insn::new(Rop::Goto, None, vec![]),
                    ],
                    successors: vec![2],
                    primary_successor: Some(2),
                },
                BasicBlock {
                    label: 2,
                    insns: vec![Insn::new(Rop::Return, None, vec![int(0)])],
                    successors: vec![],
                    primary_successor: None,
                },
            ],
            entry_label: 0,
            param_width: 1,
            reg_count: 2,
        })
    }

    #[test]
    fn value_used_after_rejoin_is_live_through_the_middle() {
        let ssa = crossing_method();
        let liveness = analyze(&ssa);
        let param = ssa.blocks[ssa.block_index(0).unwrap()].insns[0]
            .result
            .unwrap()
            .reg;
        let middle = ssa.block_index(1).unwrap();
        assert!(liveness.live_in[middle].contains(param as usize));
        assert!(liveness.live_out[middle].contains(param as usize));
        let last = ssa.block_index(2).unwrap();
        assert!(liveness.live_in[last].contains(param as usize));
        assert!(!liveness.live_out[last].contains(param as usize));
    }

    #[test]
    fn def_interferes_with_values_live_across_it() {
        let ssa = crossing_method();
        let liveness = analyze(&ssa);
        let graph = build_interference(&ssa, &liveness);
        let entry = ssa.block_index(0).unwrap();
        let param = ssa.blocks[entry].insns[0].result.unwrap().reg;
        let first_const = ssa.blocks[entry].insns[1].result.unwrap().reg;
        let middle_const = ssa.blocks[ssa.block_index(1).unwrap()].insns[0]
            .result
            .unwrap()
            .reg;
        assert!(graph.interferes(param, first_const));
        assert!(graph.interferes(param, middle_const));
        assert!(!graph.interferes(first_const, middle_const));
    }

    #[test]
    fn phi_results_in_one_block_mutually_interfere() {
        // two registers merged at the same block produce two phis there
        let ssa = into_ssa(&RopMethod {
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
                        Insn::new(Rop::Const(ConstValue::Int(2)), Some(int(2)), vec![]),
                        Insn::new(Rop::Goto, None, vec![]),
                    ],
                    successors: vec![3],
                    primary_successor: Some(3),
                },
                BasicBlock {
                    label: 2,
                    insns: vec![
                        Insn::new(Rop::Const(ConstValue::Int(3)), Some(int(1)), vec![]),
                        Insn::new(Rop::Const(ConstValue::Int(4)), Some(int(2)), vec![]),
                        Insn::new(Rop::Goto, None, vec![]),
                    ],
                    successors: vec![3],
                    primary_successor: Some(3),
                },
                BasicBlock {
                    label: 3,
                    insns: vec![Insn::new(
                        Rop::Binop(crate::rop::Binop::Add),
                        Some(int(1)),
                        vec![int(1), int(2)],
                    ), Insn::new(Rop::Return, None, vec![int(1)])],
                    successors: vec![],
                    primary_successor: None,
                },
            ],
            entry_label: 0,
            param_width: 1,
            reg_count: 3,
        });
        let merge = ssa.block_index(3).unwrap();
        assert_eq!(ssa.blocks[merge].phis.len(), 2);
        let liveness = analyze(&ssa);
        let graph = build_interference(&ssa, &liveness);
        let a = ssa.blocks[merge].phis[0].result.reg;
        let b = ssa.blocks[merge].phis[1].result.reg;
        assert!(graph.interferes(a, b));
    }
}
