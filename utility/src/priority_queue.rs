use std::cmp::Ordering;

use super::heap::{sift_down, sift_up};

/// Heap-backed queue popping the element that compares smallest under `compare`.
pub struct PriorityQueue<ValueT, CompareT>
where
    CompareT: Fn(&ValueT, &ValueT) -> Ordering,
{
    compare: CompareT,
    array: Vec<ValueT>,
}

impl<ValueT, CompareT> PriorityQueue<ValueT, CompareT>
where
    CompareT: Fn(&ValueT, &ValueT) -> Ordering,
{
    pub fn new(compare: CompareT) -> Self {
        Self {
            compare,
            array: Vec::default(),
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.array.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    #[inline(always)]
    pub fn peek(&self) -> Option<&ValueT> {
        self.array.first()
    }

    pub fn push(&mut self, value: ValueT) {
        self.array.push(value);
        let position = self.array.len() - 1;
        sift_up(&mut self.array, position, &self.compare);
    }

    pub fn pop(&mut self) -> Option<ValueT> {
        if self.array.is_empty() {
            return None;
        }
        let value = self.array.swap_remove(0);
        if !self.array.is_empty() {
            sift_down(&mut self.array, 0, &self.compare);
        }
        Some(value)
    }

    pub fn clear(&mut self) {
        self.array.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValueT> + Clone + '_ {
        self.array.iter()
    }
}

impl<ValueT, CompareT> std::fmt::Debug for PriorityQueue<ValueT, CompareT>
where
    ValueT: std::fmt::Debug,
    CompareT: Fn(&ValueT, &ValueT) -> Ordering,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.array.iter()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::PriorityQueue;

    #[test]
    fn test_pop_in_order() {
        let mut queue = PriorityQueue::new(|l: &usize, r: &usize| l.cmp(r));
        for index in [4, 2, 8, 2, 0] {
            queue.push(index);
        }
        assert_eq!(queue.peek(), Some(&0));
        let popped: Vec<usize> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(popped, vec![0, 2, 2, 4, 8]);
        assert!(queue.is_empty());
    }
}
