/// Growable set of small unsigned integers, backed by a bit vector
///
/// Used for register sets (liveness, interference rows, dead-code worklists)
/// where membership tests and iteration both need to be cheap.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub fn new() -> BitSet {
        BitSet { words: vec![] }
    }

    /// Set with room pre-allocated for values below `capacity`
    pub fn with_capacity(capacity: usize) -> BitSet {
        BitSet {
            words: vec![0; (capacity + 63) / 64],
        }
    }

    pub fn contains(&self, value: usize) -> bool {
        match self.words.get(value / 64) {
            Some(word) => word & (1 << (value % 64)) != 0,
            None => false,
        }
    }

    /// Add a value, returning whether it was newly inserted
    pub fn insert(&mut self, value: usize) -> bool {
        let idx = value / 64;
        if idx >= self.words.len() {
            self.words.resize(idx + 1, 0);
        }
        let mask = 1 << (value % 64);
        let newly = self.words[idx] & mask == 0;
        self.words[idx] |= mask;
        newly
    }

    pub fn remove(&mut self, value: usize) {
        if let Some(word) = self.words.get_mut(value / 64) {
            *word &= !(1 << (value % 64));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate over members in increasing order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(idx, word)| {
            (0..64)
                .filter(move |bit| word & (1 << bit) != 0)
                .map(move |bit| idx * 64 + bit)
        })
    }

    /// Remove and return the smallest member
    pub fn pop(&mut self) -> Option<usize> {
        let value = self.iter().next()?;
        self.remove(value);
        Some(value)
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<usize> for BitSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> BitSet {
        let mut set = BitSet::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}

#[cfg(test)]
mod bit_set_tests {
    use super::*;

    #[test]
    fn insert_and_query() {
        let mut set = BitSet::new();
        assert!(set.insert(3));
        assert!(set.insert(64));
        assert!(set.insert(1000));
        assert!(!set.insert(64));
        assert!(set.contains(3));
        assert!(set.contains(64));
        assert!(!set.contains(63));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn iteration_order() {
        let set: BitSet = [100usize, 2, 65].into_iter().collect();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![2, 65, 100]);
    }

    #[test]
    fn pop_drains_in_order() {
        let mut set: BitSet = [5usize, 1].into_iter().collect();
        assert_eq!(set.pop(), Some(1));
        assert_eq!(set.pop(), Some(5));
        assert_eq!(set.pop(), None);
        assert!(set.is_empty());
    }
}
