//! Binary heap primitives over a slice ordered by an arbitrary comparator.
//! The element that compares `Less` than every other one sits at position 0.

use std::cmp::Ordering;

#[inline(always)]
fn parent_of(position: usize) -> usize {
    debug_assert!(position != 0);
    (position - 1) / 2
}

#[inline(always)]
fn left_of(position: usize) -> usize {
    2 * position + 1
}

/// Moves the element at `position` towards the root until the heap order holds.
pub fn sift_up<ValueT>(
    array: &mut [ValueT],
    position: usize,
    compare: impl Fn(&ValueT, &ValueT) -> Ordering,
) {
    debug_assert!(position < array.len());
    let mut current = position;
    while current != 0 {
        let parent = parent_of(current);
        if compare(&array[current], &array[parent]) != Ordering::Less {
            break;
        }
        array.swap(parent, current);
        current = parent;
    }
}

/// Moves the element at `position` towards the leaves until the heap order holds.
pub fn sift_down<ValueT>(
    array: &mut [ValueT],
    position: usize,
    compare: impl Fn(&ValueT, &ValueT) -> Ordering,
) {
    debug_assert!(position < array.len());
    let mut current = position;
    loop {
        let left = left_of(current);
        if left >= array.len() {
            break;
        }
        let right = left + 1;
        let child = if right < array.len()
            && compare(&array[right], &array[left]) == Ordering::Less
        {
            right
        } else {
            left
        };
        if compare(&array[child], &array[current]) != Ordering::Less {
            break;
        }
        array.swap(current, child);
        current = child;
    }
}

#[cfg(test)]
mod test {
    use super::{sift_down, sift_up};

    #[test]
    fn test_heap_order() {
        let mut array: Vec<i32> = Vec::new();
        for value in [5, 3, 9, 1, 7, 1, 4] {
            array.push(value);
            let position = array.len() - 1;
            sift_up(&mut array, position, i32::cmp);
        }
        let mut sorted = Vec::new();
        while !array.is_empty() {
            sorted.push(array.swap_remove(0));
            if !array.is_empty() {
                sift_down(&mut array, 0, i32::cmp);
            }
        }
        assert_eq!(sorted, vec![1, 1, 3, 4, 5, 7, 9]);
    }
}
