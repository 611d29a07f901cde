/// Map keyed by small dense indices. Lookups go through a position table, the
/// items themselves are packed so that iteration and `clear` only touch the
/// entries that are present.
#[derive(Clone)]
pub struct SparseMap<ValueT> {
    index_to_position: Vec<usize>,
    items: Vec<(usize, ValueT)>,
}

impl<ValueT> Default for SparseMap<ValueT> {
    fn default() -> Self {
        Self {
            index_to_position: Vec::default(),
            items: Vec::default(),
        }
    }
}

impl<ValueT> SparseMap<ValueT> {
    const NULL_POSITION: usize = usize::MAX;

    #[inline(always)]
    fn position(&self, index: usize) -> Option<usize> {
        match self.index_to_position.get(index) {
            Some(&position) if position != Self::NULL_POSITION => Some(position),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline(always)]
    pub fn contains_key(&self, index: usize) -> bool {
        self.position(index).is_some()
    }

    #[inline(always)]
    pub fn get(&self, index: usize) -> Option<&ValueT> {
        self.position(index).map(|position| &self.items[position].1)
    }

    #[inline(always)]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut ValueT> {
        self.position(index)
            .map(|position| &mut self.items[position].1)
    }

    /// Inserts or overwrites, returning the previous value.
    pub fn insert(&mut self, index: usize, value: ValueT) -> Option<ValueT> {
        if let Some(position) = self.position(index) {
            debug_assert!(self.items[position].0 == index);
            return Some(std::mem::replace(&mut self.items[position].1, value));
        }
        if index >= self.index_to_position.len() {
            self.index_to_position
                .resize(index + 1, Self::NULL_POSITION);
        }
        self.index_to_position[index] = self.items.len();
        self.items.push((index, value));
        None
    }

    pub fn get_or_insert_with(&mut self, index: usize, f: impl FnOnce() -> ValueT) -> &mut ValueT {
        if !self.contains_key(index) {
            self.insert(index, f());
        }
        let position = self.index_to_position[index];
        &mut self.items[position].1
    }

    pub fn remove(&mut self, index: usize) -> Option<ValueT> {
        let position = self.position(index)?;
        let (_, value) = self.items.swap_remove(position);
        self.index_to_position[index] = Self::NULL_POSITION;
        if let Some(&(moved_index, _)) = self.items.get(position) {
            self.index_to_position[moved_index] = position;
        }
        Some(value)
    }

    pub fn pop(&mut self) -> Option<(usize, ValueT)> {
        let item = self.items.pop()?;
        self.index_to_position[item.0] = Self::NULL_POSITION;
        Some(item)
    }

    pub fn clear(&mut self) {
        for &(index, _) in self.items.iter() {
            self.index_to_position[index] = Self::NULL_POSITION;
        }
        self.items.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = usize> + Clone + '_ {
        self.items.iter().map(|&(index, _)| index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &ValueT)> + Clone + '_ {
        self.items.iter().map(|(index, value)| (*index, value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut ValueT)> + '_ {
        self.items.iter_mut().map(|(index, value)| (*index, value))
    }
}

impl<ValueT> std::fmt::Debug for SparseMap<ValueT>
where
    ValueT: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::SparseMap;

    #[test]
    fn test_insert_remove() {
        let mut map = SparseMap::default();
        assert_eq!(map.insert(3, "a"), None);
        assert_eq!(map.insert(7, "b"), None);
        assert_eq!(map.insert(3, "c"), Some("a"));
        assert_eq!(map.len(), 2);
        assert_eq!(map.remove(3), Some("c"));
        assert_eq!(map.get(7), Some(&"b"));
        assert!(!map.contains_key(3));
        assert!(!map.contains_key(100));
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.get(7), None);
    }

    #[test]
    fn test_get_or_insert_with() {
        let mut map: SparseMap<u32> = SparseMap::default();
        *map.get_or_insert_with(5, || 1) += 1;
        *map.get_or_insert_with(5, || 100) += 1;
        assert_eq!(map.get(5), Some(&3));
    }
}
