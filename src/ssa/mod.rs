//! Static single assignment form over the Rop CFG
//!
//! Conversion renames every definition to a fresh register, placing phi
//! instructions at iterated dominance frontiers. SSA registers below
//! [`SsaMethod::border`] are never-renamed originals that back reads with no
//! reaching definition; real definitions start at the border.
//!
//! The optimization passes run here, and [`back_to_rop`] lowers the method
//! back out of SSA once a register mapping has been chosen.

mod back;
mod const_prop;
mod converter;
mod copy_prop;
mod dead_code;
mod dominators;

pub use back::*;
pub use const_prop::*;
pub use converter::*;
pub use copy_prop::*;
pub use dead_code::*;
pub use dominators::*;

use crate::rop::{Insn, RegisterSpec, TypeTag};
use std::collections::BTreeSet;

/// A phi instruction: one operand per predecessor edge
#[derive(Debug, Clone, PartialEq)]
pub struct PhiInsn {
    pub result: RegisterSpec,
    /// The pre-SSA register this phi merges, kept for operand collection
    pub rop_reg: u32,
    /// `(predecessor label, value)` pairs, one per incoming edge
    pub operands: Vec<(u32, RegisterSpec)>,
}

/// A basic block in SSA form: phis, then ordinary instructions
#[derive(Debug, Clone)]
pub struct SsaBasicBlock {
    pub label: u32,
    pub phis: Vec<PhiInsn>,
    pub insns: Vec<Insn>,
    pub successors: Vec<u32>,
    pub primary_successor: Option<u32>,
    pub predecessors: Vec<u32>,
}

/// A whole method in SSA form
#[derive(Debug, Clone)]
pub struct SsaMethod {
    pub blocks: Vec<SsaBasicBlock>,
    pub entry_label: u32,
    pub param_width: u16,
    /// SSA registers below this are never-renamed originals
    pub border: u32,
    /// Total SSA register count (originals plus renamed definitions)
    pub reg_count: u32,
}

impl SsaMethod {
    pub fn block_index(&self, label: u32) -> Option<usize> {
        self.blocks.iter().position(|block| block.label == label)
    }

    /// Value type of every SSA register, taken from its defining instruction
    ///
    /// Registers with no definition (the never-renamed originals) report
    /// `None`.
    pub fn reg_tags(&self) -> Vec<Option<TypeTag>> {
        let mut tags = vec![None; self.reg_count as usize];
        for block in &self.blocks {
            for phi in &block.phis {
                tags[phi.result.reg as usize] = Some(phi.result.tag);
            }
            for insn in &block.insns {
                if let Some(result) = insn.result {
                    tags[result.reg as usize] = Some(result.tag);
                }
            }
        }
        tags
    }
}

/// Individually selectable optimization steps
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptionalStep {
    ConstantPropagation,
    CopyPropagation,
    DeadCode,
}

impl OptionalStep {
    pub fn all() -> BTreeSet<OptionalStep> {
        [
            OptionalStep::ConstantPropagation,
            OptionalStep::CopyPropagation,
            OptionalStep::DeadCode,
        ]
        .into_iter()
        .collect()
    }
}

/// Run the selected optimization steps, in their fixed order
///
/// Copies are forwarded first so constant folding sees through them; dead
/// code removal runs last and deletes whatever the other passes left unread.
pub fn optimize(method: &mut SsaMethod, steps: &BTreeSet<OptionalStep>) {
    if steps.contains(&OptionalStep::CopyPropagation) {
        propagate_copies(method);
    }
    if steps.contains(&OptionalStep::ConstantPropagation) {
        propagate_constants(method);
    }
    if steps.contains(&OptionalStep::DeadCode) {
        remove_dead_code(method);
    }
}
