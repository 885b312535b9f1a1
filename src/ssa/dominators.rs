use crate::util::BitSet;

/// Immediate dominators and dominance frontiers of a CFG
///
/// Built with the Cooper-Harvey-Kennedy iterative scheme over the reverse
/// postorder, which converges in a couple of passes on the shallow graphs
/// method bodies produce.
#[derive(Debug)]
pub struct DomTree {
    /// Immediate dominator of each block; the entry dominates itself
    pub idom: Vec<usize>,
    /// Dominator tree children, in block order
    pub children: Vec<Vec<usize>>,
    /// Dominance frontier of each block
    pub frontiers: Vec<BitSet>,
}

impl DomTree {
    /// Build the tree for a graph given as successor/predecessor index lists
    ///
    /// Every block must be reachable from `entry`.
    pub fn build(succs: &[Vec<usize>], preds: &[Vec<usize>], entry: usize) -> DomTree {
        let n = succs.len();

        // reverse postorder, iteratively to keep deep methods off the stack
        let mut order = Vec::with_capacity(n);
        let mut seen = BitSet::with_capacity(n);
        let mut stack = vec![(entry, 0usize)];
        seen.insert(entry);
        while let Some((block, next_child)) = stack.pop() {
            if let Some(succ) = succs[block].get(next_child) {
                stack.push((block, next_child + 1));
                if seen.insert(*succ) {
                    stack.push((*succ, 0));
                }
            } else {
                order.push(block);
            }
        }
        order.reverse();

        let mut rpo_index = vec![usize::MAX; n];
        for (idx, block) in order.iter().enumerate() {
            rpo_index[*block] = idx;
        }

        let mut idom = vec![usize::MAX; n];
        idom[entry] = entry;
        let intersect = |idom: &[usize], rpo_index: &[usize], mut a: usize, mut b: usize| {
            while a != b {
                while rpo_index[a] > rpo_index[b] {
                    a = idom[a];
                }
                while rpo_index[b] > rpo_index[a] {
                    b = idom[b];
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for block in order.iter().copied().filter(|b| *b != entry) {
                let mut new_idom = usize::MAX;
                for pred in preds[block].iter().copied() {
                    if idom[pred] == usize::MAX {
                        continue;
                    }
                    new_idom = if new_idom == usize::MAX {
                        pred
                    } else {
                        intersect(&idom, &rpo_index, new_idom, pred)
                    };
                }
                if new_idom != idom[block] {
                    idom[block] = new_idom;
                    changed = true;
                }
            }
        }

        let mut children = vec![vec![]; n];
        for block in 0..n {
            if block != entry && idom[block] != usize::MAX {
                children[idom[block]].push(block);
            }
        }

        let mut frontiers = vec![BitSet::with_capacity(n); n];
        for block in 0..n {
            if preds[block].len() < 2 {
                continue;
            }
            for pred in preds[block].iter().copied() {
                let mut runner = pred;
                while runner != idom[block] && runner != usize::MAX {
                    frontiers[runner].insert(block);
                    if runner == idom[runner] {
                        break;
                    }
                    runner = idom[runner];
                }
            }
        }

        DomTree {
            idom,
            children,
            frontiers,
        }
    }

    /// Does `a` dominate `b`?
    pub fn dominates(&self, a: usize, b: usize) -> bool {
        let mut runner = b;
        loop {
            if runner == a {
                return true;
            }
            let up = self.idom[runner];
            if up == runner || up == usize::MAX {
                return false;
            }
            runner = up;
        }
    }
}

#[cfg(test)]
mod dom_tests {
    use super::*;

    /// 0 -> 1, 0 -> 2, 1 -> 3, 2 -> 3 (a diamond)
    fn diamond() -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
        let succs = vec![vec![1, 2], vec![3], vec![3], vec![]];
        let preds = vec![vec![], vec![0], vec![0], vec![1, 2]];
        (succs, preds)
    }

    #[test]
    fn diamond_idoms() {
        let (succs, preds) = diamond();
        let dom = DomTree::build(&succs, &preds, 0);
        assert_eq!(dom.idom[1], 0);
        assert_eq!(dom.idom[2], 0);
        assert_eq!(dom.idom[3], 0);
        assert!(dom.dominates(0, 3));
        assert!(!dom.dominates(1, 3));
    }

    #[test]
    fn diamond_frontiers() {
        let (succs, preds) = diamond();
        let dom = DomTree::build(&succs, &preds, 0);
        assert_eq!(dom.frontiers[1].iter().collect::<Vec<_>>(), vec![3]);
        assert_eq!(dom.frontiers[2].iter().collect::<Vec<_>>(), vec![3]);
        assert!(dom.frontiers[0].is_empty());
    }

    #[test]
    fn loop_frontier_contains_header() {
        // 0 -> 1, 1 -> 2, 2 -> 1, 1 -> 3
        let succs = vec![vec![1], vec![2, 3], vec![1], vec![]];
        let preds = vec![vec![], vec![0, 2], vec![1], vec![1]];
        let dom = DomTree::build(&succs, &preds, 0);
        assert_eq!(dom.idom[2], 1);
        // the back edge puts the loop header in its own body's frontier
        assert!(dom.frontiers[2].contains(1));
        assert!(dom.frontiers[1].contains(1));
    }
}
