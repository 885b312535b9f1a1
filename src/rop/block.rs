use crate::rop::{Branchingness, Insn};
use crate::Inconsistency;
use std::collections::HashMap;

/// One basic block of Rop-form instructions
///
/// Blocks are immutable once built: every edit replaces the block wholesale.
/// Exception successors come first (in handler table order) and the primary
/// (no-exception / fall-through / default) successor is always last in
/// `successors`.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    /// Unique label; derived from the original bytecode address when possible
    pub label: u32,
    pub insns: Vec<Insn>,
    pub successors: Vec<u32>,
    /// Absent only for blocks ending in `throw` whose every successor is an
    /// in-method handler, and for return blocks
    pub primary_successor: Option<u32>,
}

impl BasicBlock {
    /// The branch instruction closing this block
    pub fn last_insn(&self) -> &Insn {
        self.insns.last().expect("blocks are never empty")
    }
}

/// A whole method in Rop form
#[derive(Debug, Clone)]
pub struct RopMethod {
    pub blocks: Vec<BasicBlock>,
    pub entry_label: u32,
    /// Total register units occupied by parameters (receiver included)
    pub param_width: u16,
    /// Number of Rop registers in use
    pub reg_count: u32,
}

impl RopMethod {
    pub fn block_by_label(&self, label: u32) -> Option<&BasicBlock> {
        self.blocks.iter().find(|block| block.label == label)
    }

    /// Predecessor labels of every block, computed on demand
    pub fn predecessors(&self) -> HashMap<u32, Vec<u32>> {
        let mut preds: HashMap<u32, Vec<u32>> = HashMap::new();
        for block in &self.blocks {
            preds.entry(block.label).or_default();
            for succ in &block.successors {
                preds.entry(*succ).or_default().push(block.label);
            }
        }
        preds
    }

    /// Check the CFG structural invariants
    ///
    /// - every non-entry block has at least one predecessor
    /// - every block's final instruction has non-trivial branch semantics,
    ///   and no earlier instruction does
    /// - result-fetch instructions appear only as a block's unique leading
    ///   instruction
    /// - the primary successor, when present, is the last successor
    pub fn verify(&self) -> Result<(), Inconsistency> {
        let preds = self.predecessors();

        for block in &self.blocks {
            if block.insns.is_empty() {
                return Err(Inconsistency::MalformedBlock {
                    block: block.label,
                    detail: "empty block",
                });
            }
            if block.label != self.entry_label
                && preds.get(&block.label).map_or(true, |p| p.is_empty())
            {
                return Err(Inconsistency::MalformedBlock {
                    block: block.label,
                    detail: "unreachable non-entry block",
                });
            }
            for (idx, insn) in block.insns.iter().enumerate() {
                let last = idx + 1 == block.insns.len();
                if last && insn.branchingness() == Branchingness::None && !insn.can_throw() {
                    return Err(Inconsistency::MalformedBlock {
                        block: block.label,
                        detail: "block does not end in a branch",
                    });
                }
                if !last && (insn.branchingness() != Branchingness::None || insn.can_throw()) {
                    return Err(Inconsistency::MalformedBlock {
                        block: block.label,
                        detail: "branch in the middle of a block",
                    });
                }
                if insn.is_result_fetch() && idx != 0 {
                    return Err(Inconsistency::MisplacedResultFetch { block: block.label });
                }
            }
            if let Some(primary) = block.primary_successor {
                if block.successors.last() != Some(&primary) {
                    return Err(Inconsistency::MalformedBlock {
                        block: block.label,
                        detail: "primary successor is not last",
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod rop_method_tests {
    use super::*;
    use crate::rop::{RegisterSpec, Rop, TypeTag};

    fn ret_block(label: u32) -> BasicBlock {
        BasicBlock {
            label,
            insns: vec![Insn::new(Rop::Return, None, vec![])],
            successors: vec![],
            primary_successor: None,
        }
    }

    #[test]
    fn accepts_single_return_block() {
        let method = RopMethod {
            blocks: vec![ret_block(0)],
            entry_label: 0,
            param_width: 0,
            reg_count: 0,
        };
        assert!(method.verify().is_ok());
    }

    #[test]
    fn rejects_unreachable_block() {
        let method = RopMethod {
            blocks: vec![ret_block(0), ret_block(1)],
            entry_label: 0,
            param_width: 0,
            reg_count: 0,
        };
        assert!(matches!(
            method.verify(),
            Err(Inconsistency::MalformedBlock { block: 1, .. })
        ));
    }

    #[test]
    fn rejects_non_leading_result_fetch() {
        let fetch = Insn::new(
            Rop::MoveResultPseudo,
            Some(RegisterSpec::new(0, TypeTag::Int)),
            vec![],
        );
        let method = RopMethod {
            blocks: vec![BasicBlock {
                label: 0,
                insns: vec![
                    Insn::new(Rop::Nop, None, vec![]),
                    fetch,
                    Insn::new(Rop::Return, None, vec![]),
                ],
                successors: vec![],
                primary_successor: None,
            }],
            entry_label: 0,
            param_width: 0,
            reg_count: 1,
        };
        assert!(matches!(
            method.verify(),
            Err(Inconsistency::MisplacedResultFetch { block: 0 })
        ));
    }
}
