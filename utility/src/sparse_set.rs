use super::SparseMap;

/// Set of dense indices with insertion-ordered iteration and cheap `clear`.
#[derive(Default, Clone)]
pub struct SparseSet {
    map: SparseMap<()>,
}

impl SparseSet {
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[inline(always)]
    pub fn contains(&self, index: usize) -> bool {
        self.map.contains_key(index)
    }

    /// Returns `true` if `index` was not present before.
    #[inline(always)]
    pub fn insert(&mut self, index: usize) -> bool {
        self.map.insert(index, ()).is_none()
    }

    #[inline(always)]
    pub fn remove(&mut self, index: usize) -> bool {
        self.map.remove(index).is_some()
    }

    #[inline(always)]
    pub fn pop(&mut self) -> Option<usize> {
        self.map.pop().map(|(index, _)| index)
    }

    #[inline(always)]
    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + Clone + '_ {
        self.map.keys()
    }
}

impl Extend<usize> for SparseSet {
    fn extend<I: IntoIterator<Item = usize>>(&mut self, indices: I) {
        for index in indices {
            self.insert(index);
        }
    }
}

impl std::fmt::Debug for SparseSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
