use crate::util::BitSet;

/// Symmetric interference relation over SSA registers
#[derive(Debug)]
pub struct InterferenceGraph {
    neighbors: Vec<BitSet>,
}

impl InterferenceGraph {
    pub fn new(reg_count: u32) -> InterferenceGraph {
        InterferenceGraph {
            neighbors: vec![BitSet::new(); reg_count as usize],
        }
    }

    /// Record that `a` and `b` may not share storage
    pub fn add(&mut self, a: u32, b: u32) {
        if a == b {
            return;
        }
        self.neighbors[a as usize].insert(b as usize);
        self.neighbors[b as usize].insert(a as usize);
    }

    pub fn interferes(&self, a: u32, b: u32) -> bool {
        self.neighbors[a as usize].contains(b as usize)
    }

    pub fn neighbors(&self, reg: u32) -> impl Iterator<Item = u32> + '_ {
        self.neighbors[reg as usize].iter().map(|n| n as u32)
    }

    pub fn reg_count(&self) -> u32 {
        self.neighbors.len() as u32
    }
}

#[cfg(test)]
mod interference_tests {
    use super::*;

    #[test]
    fn edges_are_symmetric_and_irreflexive() {
        let mut graph = InterferenceGraph::new(4);
        graph.add(1, 3);
        graph.add(2, 2);
        assert!(graph.interferes(1, 3));
        assert!(graph.interferes(3, 1));
        assert!(!graph.interferes(2, 2));
        assert_eq!(graph.neighbors(3).collect::<Vec<_>>(), vec![1]);
    }
}
