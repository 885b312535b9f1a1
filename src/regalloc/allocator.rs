use crate::regalloc::{InterferenceGraph, RegisterMapper};
use crate::rop::Rop;
use crate::ssa::SsaMethod;
use crate::Inconsistency;

/// Give every value its own register slot
///
/// Needs no interference information: distinct registers never share
/// storage. Slots are handed out in register order, advancing by the value's
/// width, and only to registers the method actually touches, which keeps the
/// frame within reach of the narrow register fields of the common
/// instruction forms. Parameters still arrive at the high end of the frame;
/// the encoder emits the moves that bring them down.
pub fn allocate_naive(method: &SsaMethod) -> RegisterMapper {
    let tags = method.reg_tags();
    let mut appears = vec![false; method.reg_count as usize];
    for block in &method.blocks {
        for phi in &block.phis {
            appears[phi.result.reg as usize] = true;
            for (_, operand) in &phi.operands {
                appears[operand.reg as usize] = true;
            }
        }
        for insn in &block.insns {
            if let Some(result) = insn.result {
                appears[result.reg as usize] = true;
            }
            for source in &insn.sources {
                appears[source.reg as usize] = true;
            }
        }
    }

    let mut map = vec![0u32; method.reg_count as usize];
    let mut next = 0u32;
    for reg in 0..method.reg_count {
        if appears[reg as usize] {
            map[reg as usize] = next;
            next += tags[reg as usize].map(|tag| tag.category()).unwrap_or(1);
        }
    }
    RegisterMapper::new(map, next + method.param_width as u32)
}

/// First-fit coloring with parameters packed at the high end
///
/// Parameter registers are pre-colored to their slot numbers and everything
/// else gets the lowest color above the parameter range that does not overlap
/// an already-colored interference neighbor. A final rotation moves the
/// parameter range from the bottom of the frame to the top, where the Dalvik
/// calling convention delivers arguments.
pub fn allocate_first_fit(method: &SsaMethod, graph: &InterferenceGraph) -> RegisterMapper {
    let tags = method.reg_tags();
    let width = |reg: u32| -> u32 {
        tags[reg as usize].map(|tag| tag.category()).unwrap_or(1)
    };
    let param_width = method.param_width as u32;

    let mut colors: Vec<Option<u32>> = vec![None; method.reg_count as usize];
    for block in &method.blocks {
        for insn in &block.insns {
            if let Rop::MoveParam(slot) = insn.op {
                if let Some(result) = insn.result {
                    colors[result.reg as usize] = Some(slot as u32);
                }
            }
        }
    }

    for reg in 0..method.reg_count {
        if colors[reg as usize].is_some() {
            continue;
        }
        let w = width(reg);
        let mut color = param_width;
        'search: loop {
            for neighbor in graph.neighbors(reg) {
                if let Some(taken) = colors[neighbor as usize] {
                    let nw = width(neighbor);
                    if color < taken + nw && taken < color + w {
                        // skip past the conflicting range and retry
                        color = taken + nw;
                        continue 'search;
                    }
                }
            }
            break;
        }
        colors[reg as usize] = Some(color);
    }

    let frame = colors
        .iter()
        .enumerate()
        .filter_map(|(reg, color)| color.map(|c| c + width(reg as u32)))
        .max()
        .unwrap_or(0)
        .max(param_width);

    let map: Vec<u32> = colors
        .iter()
        .map(|color| {
            let c = color.unwrap_or(param_width);
            if c < param_width {
                c + (frame - param_width)
            } else {
                c - param_width
            }
        })
        .collect();
    RegisterMapper::new(map, frame)
}

/// Check a finished mapping against the interference graph
///
/// Every interfering pair must occupy disjoint register ranges; a violation
/// here means the allocator is broken, not the input.
pub fn audit(
    method: &SsaMethod,
    graph: &InterferenceGraph,
    mapper: &RegisterMapper,
) -> Result<(), Inconsistency> {
    let tags = method.reg_tags();
    let width = |reg: u32| -> u32 {
        tags[reg as usize].map(|tag| tag.category()).unwrap_or(1)
    };
    for a in 0..method.reg_count {
        for b in graph.neighbors(a) {
            if b <= a {
                continue;
            }
            let (ma, mb) = (mapper.map(a), mapper.map(b));
            if ma < mb + width(b) && mb < ma + width(a) {
                return Err(Inconsistency::InterferenceViolation { a, b });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod allocator_tests {
    use super::*;
    use crate::regalloc::{analyze, build_interference};
    use crate::rop::{BasicBlock, Binop, ConstValue, Insn, RegisterSpec, RopMethod, TypeTag};
    use crate::ssa::into_ssa;

    fn int(reg: u32) -> RegisterSpec {
        RegisterSpec::new(reg, TypeTag::Int)
    }

    fn add_method() -> SsaMethod {
        // two int params added and returned
        into_ssa(&RopMethod {
            blocks: vec![
                BasicBlock {
                    label: 9,
                    insns: vec![
                        Insn::new(Rop::MoveParam(0), Some(int(0)), vec![]),
                        Insn::new(Rop::MoveParam(1), Some(int(1)), vec![]),
                        Insn::new(Rop::Goto, None, vec![]),
                    ],
                    successors: vec![0],
                    primary_successor: Some(0),
                },
                BasicBlock {
                    label: 0,
                    insns: vec![
                        Insn::new(Rop::Binop(Binop::Add), Some(int(2)), vec![int(0), int(1)]),
                        Insn::new(Rop::Return, None, vec![int(2)]),
                    ],
                    successors: vec![],
                    primary_successor: None,
                },
            ],
            entry_label: 9,
            param_width: 2,
            reg_count: 3,
        })
    }

    #[test]
    fn naive_gives_each_value_a_distinct_slot() {
        let ssa = add_method();
        let mapper = allocate_naive(&ssa);

        let entry = ssa.block_index(9).unwrap();
        let body = ssa.block_index(0).unwrap();
        let p0 = ssa.blocks[entry].insns[0].result.unwrap().reg;
        let p1 = ssa.blocks[entry].insns[1].result.unwrap().reg;
        let sum = ssa.blocks[body].insns[0].result.unwrap().reg;
        assert_eq!(mapper.map(p0), 0);
        assert_eq!(mapper.map(p1), 1);
        assert_eq!(mapper.map(sum), 2);
        // the frame keeps room for the two incoming parameter words on top
        assert_eq!(mapper.reg_count(), 5);

        let liveness = analyze(&ssa);
        let graph = build_interference(&ssa, &liveness);
        assert!(audit(&ssa, &graph, &mapper).is_ok());
    }

    #[test]
    fn naive_slots_advance_by_value_width() {
        let ssa = into_ssa(&RopMethod {
            blocks: vec![BasicBlock {
                label: 0,
                insns: vec![
                    Insn::new(
                        Rop::Const(ConstValue::Long(1)),
                        Some(RegisterSpec::new(0, TypeTag::Long)),
                        vec![],
                    ),
                    Insn::new(Rop::Const(ConstValue::Int(2)), Some(int(2)), vec![]),
                    Insn::new(Rop::Return, None, vec![RegisterSpec::new(0, TypeTag::Long)]),
                ],
                successors: vec![],
                primary_successor: None,
            }],
            entry_label: 0,
            param_width: 0,
            reg_count: 3,
        });
        let mapper = allocate_naive(&ssa);
        let wide = ssa.blocks[0].insns[0].result.unwrap().reg;
        let word = ssa.blocks[0].insns[1].result.unwrap().reg;
        assert_eq!(mapper.map(wide), 0);
        assert_eq!(mapper.map(word), 2);
        assert_eq!(mapper.reg_count(), 3);
    }

    #[test]
    fn first_fit_rotates_params_to_the_top() {
        let ssa = add_method();
        let liveness = analyze(&ssa);
        let graph = build_interference(&ssa, &liveness);
        let mapper = allocate_first_fit(&ssa, &graph);

        let entry = ssa.block_index(9).unwrap();
        let p0 = ssa.blocks[entry].insns[0].result.unwrap().reg;
        let p1 = ssa.blocks[entry].insns[1].result.unwrap().reg;
        let frame = mapper.reg_count();
        assert_eq!(mapper.map(p0), frame - 2);
        assert_eq!(mapper.map(p1), frame - 1);
        assert!(audit(&ssa, &graph, &mapper).is_ok());
    }

    #[test]
    fn first_fit_packs_and_reuses_registers() {
        // the two constants are live together; the sum can reuse storage of a
        // source that dies at the add
        let ssa = into_ssa(&RopMethod {
            blocks: vec![BasicBlock {
                label: 0,
                insns: vec![
                    Insn::new(Rop::Const(ConstValue::Int(1)), Some(int(0)), vec![]),
                    Insn::new(Rop::Const(ConstValue::Int(2)), Some(int(1)), vec![]),
                    Insn::new(Rop::Binop(Binop::Add), Some(int(2)), vec![int(0), int(1)]),
                    Insn::new(Rop::Return, None, vec![int(2)]),
                ],
                successors: vec![],
                primary_successor: None,
            }],
            entry_label: 0,
            param_width: 0,
            reg_count: 3,
        });
        let liveness = analyze(&ssa);
        let graph = build_interference(&ssa, &liveness);
        let mapper = allocate_first_fit(&ssa, &graph);
        let defs: Vec<u32> = ssa.blocks[0]
            .insns
            .iter()
            .filter_map(|i| i.result.map(|r| r.reg))
            .collect();
        assert_ne!(mapper.map(defs[0]), mapper.map(defs[1]));
        assert_eq!(mapper.map(defs[2]), mapper.map(defs[0]));
        assert!(audit(&ssa, &graph, &mapper).is_ok());
    }

    #[test]
    fn audit_catches_overlap() {
        let ssa = add_method();
        let liveness = analyze(&ssa);
        let graph = build_interference(&ssa, &liveness);
        // collapse everything onto register zero
        let mapper = RegisterMapper::new(vec![0; ssa.reg_count as usize], 1);
        assert!(audit(&ssa, &graph, &mapper).is_err());
    }
}
