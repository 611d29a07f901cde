use std::cmp::Ordering;

use ordered_float::OrderedFloat;

use super::heap::{sift_down, sift_up};

/// Keeps at most `capacity` items, preferring the highest scores. Once full, a
/// new item displaces the weakest one only if its score is strictly greater.
#[derive(Clone, Debug)]
pub struct BoundedPool<ItemT> {
    capacity: usize,
    // min-heap on score, the weakest item sits at position 0
    heap: Vec<(OrderedFloat<f64>, ItemT)>,
}

fn compare_score<ItemT>(l: &(OrderedFloat<f64>, ItemT), r: &(OrderedFloat<f64>, ItemT)) -> Ordering {
    l.0.cmp(&r.0)
}

impl<ItemT> BoundedPool<ItemT> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            capacity,
            heap: Vec::with_capacity(capacity),
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shrinking drops the weakest items.
    pub fn set_capacity(&mut self, capacity: usize) {
        assert!(capacity > 0);
        self.capacity = capacity;
        while self.heap.len() > capacity {
            self.pop_weakest();
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    pub fn weakest_score(&self) -> Option<f64> {
        self.heap.first().map(|(score, _)| score.0)
    }

    /// Returns `false` if the item was rejected.
    pub fn push(&mut self, score: f64, item: ItemT) -> bool {
        let score = OrderedFloat(score);
        if !self.is_full() {
            self.heap.push((score, item));
            let position = self.heap.len() - 1;
            sift_up(&mut self.heap, position, compare_score);
            return true;
        }
        if score <= self.heap[0].0 {
            return false;
        }
        self.heap[0] = (score, item);
        sift_down(&mut self.heap, 0, compare_score);
        true
    }

    pub fn pop_weakest(&mut self) -> Option<(f64, ItemT)> {
        if self.heap.is_empty() {
            return None;
        }
        let (score, item) = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            sift_down(&mut self.heap, 0, compare_score);
        }
        Some((score.0, item))
    }

    /// Removes the item at `position` (as yielded by `iter`).
    pub fn swap_remove(&mut self, position: usize) -> (f64, ItemT) {
        let (score, item) = self.heap.swap_remove(position);
        if position < self.heap.len() {
            sift_down(&mut self.heap, position, compare_score);
            sift_up(&mut self.heap, position, compare_score);
        }
        (score.0, item)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Items in heap order, not sorted.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &ItemT)> + Clone + '_ {
        self.heap.iter().map(|(score, item)| (score.0, item))
    }
}

#[cfg(test)]
mod test {
    use super::BoundedPool;

    #[test]
    fn test_keeps_best() {
        let mut pool = BoundedPool::new(3);
        assert!(pool.push(1.0, 'a'));
        assert!(pool.push(5.0, 'b'));
        assert!(pool.push(3.0, 'c'));
        assert!(pool.is_full());
        // not strictly better than the weakest
        assert!(!pool.push(1.0, 'd'));
        assert!(pool.push(4.0, 'e'));
        assert_eq!(pool.weakest_score(), Some(3.0));
        let mut items: Vec<char> = pool.iter().map(|(_, &item)| item).collect();
        items.sort();
        assert_eq!(items, vec!['b', 'c', 'e']);
    }

    #[test]
    fn test_swap_remove_keeps_heap() {
        let mut pool = BoundedPool::new(8);
        for (score, item) in [(4.0, 4), (2.0, 2), (6.0, 6), (1.0, 1), (5.0, 5)] {
            pool.push(score, item);
        }
        let position = pool.iter().position(|(_, &item)| item == 2).unwrap();
        assert_eq!(pool.swap_remove(position), (2.0, 2));
        let mut order = Vec::new();
        while let Some((_, item)) = pool.pop_weakest() {
            order.push(item);
        }
        assert_eq!(order, vec![1, 4, 5, 6]);
    }
}
