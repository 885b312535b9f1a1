use crate::rop::{Binop, ConstValue, Insn, Rop, TypeTag};
use crate::ssa::SsaMethod;
use std::collections::HashMap;

/// Fold integer arithmetic over known constants
///
/// Records every `const` definition, then rewrites pure `int`/`long`
/// arithmetic whose operands are all known into a `const` of the computed
/// value, iterating so folded results feed further folds. Integer division
/// and remainder are never folded: those forms trap on a zero divisor and
/// already end their blocks. Floating point is also left alone so the
/// emitted code keeps the runtime's arithmetic behavior.
pub fn propagate_constants(method: &mut SsaMethod) {
    loop {
        let mut known: HashMap<u32, ConstValue> = HashMap::new();
        for block in &method.blocks {
            for insn in &block.insns {
                if let (Rop::Const(value), Some(result)) = (&insn.op, insn.result) {
                    known.insert(result.reg, *value);
                }
            }
        }

        let mut changed = false;
        for block in method.blocks.iter_mut() {
            for insn in block.insns.iter_mut() {
                if let Some(value) = fold(insn, &known) {
                    insn.op = Rop::Const(value);
                    insn.sources.clear();
                    changed = true;
                }
            }
        }
        if !changed {
            return;
        }
    }
}

fn fold(insn: &Insn, known: &HashMap<u32, ConstValue>) -> Option<ConstValue> {
    let tag = insn.result?.tag;
    let arg = |idx: usize| -> Option<ConstValue> {
        known.get(&insn.sources.get(idx)?.reg).copied()
    };
    match (&insn.op, tag) {
        (Rop::Binop(op), TypeTag::Int) => match (arg(0)?, arg(1)?) {
            (ConstValue::Int(a), ConstValue::Int(b)) => fold_int(*op, a, b).map(ConstValue::Int),
            _ => None,
        },
        // the shift amount of a wide shift is an int register
        (Rop::Binop(op), TypeTag::Long) => match (*op, arg(0)?, arg(1)?) {
            (Binop::Shl, ConstValue::Long(a), ConstValue::Int(b)) => {
                Some(ConstValue::Long(a.wrapping_shl(b as u32 & 63)))
            }
            (Binop::Shr, ConstValue::Long(a), ConstValue::Int(b)) => {
                Some(ConstValue::Long(a.wrapping_shr(b as u32 & 63)))
            }
            (Binop::Ushr, ConstValue::Long(a), ConstValue::Int(b)) => {
                Some(ConstValue::Long((a as u64).wrapping_shr(b as u32 & 63) as i64))
            }
            (_, ConstValue::Long(a), ConstValue::Long(b)) => {
                fold_long(*op, a, b).map(ConstValue::Long)
            }
            _ => None,
        },
        (Rop::Neg, TypeTag::Int) => match arg(0)? {
            ConstValue::Int(a) => Some(ConstValue::Int(a.wrapping_neg())),
            _ => None,
        },
        (Rop::Neg, TypeTag::Long) => match arg(0)? {
            ConstValue::Long(a) => Some(ConstValue::Long(a.wrapping_neg())),
            _ => None,
        },
        _ => None,
    }
}

fn fold_int(op: Binop, a: i32, b: i32) -> Option<i32> {
    Some(match op {
        Binop::Add => a.wrapping_add(b),
        Binop::Sub => a.wrapping_sub(b),
        Binop::Mul => a.wrapping_mul(b),
        Binop::And => a & b,
        Binop::Or => a | b,
        Binop::Xor => a ^ b,
        Binop::Shl => a.wrapping_shl(b as u32 & 31),
        Binop::Shr => a.wrapping_shr(b as u32 & 31),
        Binop::Ushr => (a as u32).wrapping_shr(b as u32 & 31) as i32,
        // the trapping forms carry no inline result and never reach here
        Binop::Div | Binop::Rem => return None,
    })
}

fn fold_long(op: Binop, a: i64, b: i64) -> Option<i64> {
    Some(match op {
        Binop::Add => a.wrapping_add(b),
        Binop::Sub => a.wrapping_sub(b),
        Binop::Mul => a.wrapping_mul(b),
        Binop::And => a & b,
        Binop::Or => a | b,
        Binop::Xor => a ^ b,
        Binop::Shl | Binop::Shr | Binop::Ushr | Binop::Div | Binop::Rem => return None,
    })
}

#[cfg(test)]
mod const_prop_tests {
    use super::*;
    use crate::rop::{BasicBlock, RegisterSpec, RopMethod};
    use crate::ssa::into_ssa;

    fn int(reg: u32) -> RegisterSpec {
        RegisterSpec::new(reg, TypeTag::Int)
    }

    fn wide(reg: u32) -> RegisterSpec {
        RegisterSpec::new(reg, TypeTag::Long)
    }

    fn straight_line(insns: Vec<Insn>, reg_count: u32) -> SsaMethod {
        into_ssa(&RopMethod {
            blocks: vec![BasicBlock {
                label: 0,
                insns,
                successors: vec![],
                primary_successor: None,
            }],
            entry_label: 0,
            param_width: 0,
            reg_count,
        })
    }

    #[test]
    fn folds_chained_integer_arithmetic() {
        // (2 + 3) << 2
        let mut ssa = straight_line(
            vec![
                Insn::new(Rop::Const(ConstValue::Int(2)), Some(int(0)), vec![]),
                Insn::new(Rop::Const(ConstValue::Int(3)), Some(int(1)), vec![]),
                Insn::new(Rop::Binop(Binop::Add), Some(int(2)), vec![int(0), int(1)]),
                Insn::new(Rop::Binop(Binop::Shl), Some(int(3)), vec![int(2), int(0)]),
                Insn::new(Rop::Return, None, vec![int(3)]),
            ],
            4,
        );
        propagate_constants(&mut ssa);
        let insns = &ssa.blocks[0].insns;
        assert!(matches!(insns[2].op, Rop::Const(ConstValue::Int(5))));
        assert!(matches!(insns[3].op, Rop::Const(ConstValue::Int(20))));
        assert!(insns[3].sources.is_empty());
    }

    #[test]
    fn unknown_operands_stop_the_fold() {
        let rop = RopMethod {
            blocks: vec![
                BasicBlock {
                    label: 5,
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
                        Insn::new(Rop::Const(ConstValue::Int(1)), Some(int(1)), vec![]),
                        Insn::new(Rop::Binop(Binop::Add), Some(int(2)), vec![int(0), int(1)]),
                        Insn::new(Rop::Return, None, vec![int(2)]),
                    ],
                    successors: vec![],
                    primary_successor: None,
                },
            ],
            entry_label: 5,
            param_width: 1,
            reg_count: 3,
        };
        let mut ssa = into_ssa(&rop);
        propagate_constants(&mut ssa);
        let body = ssa.block_index(0).unwrap();
        assert!(matches!(ssa.blocks[body].insns[1].op, Rop::Binop(Binop::Add)));
    }

    #[test]
    fn wide_shift_uses_the_int_shift_amount() {
        let mut ssa = straight_line(
            vec![
                Insn::new(Rop::Const(ConstValue::Long(1)), Some(wide(0)), vec![]),
                Insn::new(Rop::Const(ConstValue::Int(40)), Some(int(2)), vec![]),
                Insn::new(Rop::Binop(Binop::Shl), Some(wide(3)), vec![wide(0), int(2)]),
                Insn::new(Rop::Return, None, vec![wide(3)]),
            ],
            5,
        );
        propagate_constants(&mut ssa);
        assert!(matches!(
            ssa.blocks[0].insns[2].op,
            Rop::Const(ConstValue::Long(v)) if v == 1i64 << 40
        ));
    }
}
