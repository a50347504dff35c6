//! Merging of independently sorted sequences into one ordered stream.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Merges `sources`, each already sorted by `key`, into one sequence sorted by `key`.
///
/// Equal keys are emitted in source order: an item from `sources[0]` precedes
/// an item with the same key from `sources[1]`. Within one source the
/// original order is kept.
pub fn merge_by_key<T, K, F>(sources: Vec<Vec<T>>, key: F) -> Vec<T>
where
    K: Ord + Copy,
    F: Fn(&T) -> K,
{
    let total = sources.iter().map(Vec::len).sum();
    let mut cursors: Vec<std::vec::IntoIter<T>> =
        sources.into_iter().map(Vec::into_iter).collect();
    let mut heads: Vec<Option<T>> = cursors.iter_mut().map(Iterator::next).collect();

    let mut heap = BinaryHeap::with_capacity(heads.len());
    for (index, head) in heads.iter().enumerate() {
        if let Some(item) = head {
            heap.push(Reverse((key(item), index)));
        }
    }

    let mut out = Vec::with_capacity(total);
    while let Some(Reverse((_, index))) = heap.pop() {
        let Some(item) = heads[index].take() else {
            continue;
        };
        out.push(item);
        if let Some(next) = cursors[index].next() {
            heap.push(Reverse((key(&next), index)));
            heads[index] = Some(next);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_three_cursors() {
        let codeboxes = vec![(2, "c1"), (9, "c2")];
        let grids = vec![(5, "g1")];
        let images = vec![(0, "i1"), (3, "i2"), (12, "i3")];
        let merged = merge_by_key(vec![codeboxes, grids, images], |(off, _)| *off);
        let names: Vec<&str> = merged.iter().map(|(_, n)| *n).collect();
        assert_eq!(names, vec!["i1", "c1", "i2", "g1", "c2", "i3"]);
    }

    #[test]
    fn test_ties_follow_source_order() {
        let merged = merge_by_key(
            vec![vec![(4, 'a')], vec![(4, 'b'), (4, 'c')], vec![(4, 'd')]],
            |(off, _)| *off,
        );
        let names: String = merged.iter().map(|(_, n)| *n).collect();
        assert_eq!(names, "abcd");
    }

    #[test]
    fn test_empty_and_single_sources() {
        let merged: Vec<i64> = merge_by_key(vec![vec![], vec![1, 5], vec![]], |v| *v);
        assert_eq!(merged, vec![1, 5]);
        let merged: Vec<i64> = merge_by_key(Vec::new(), |v| *v);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_four_sources() {
        let sources = vec![vec![1, 8], vec![2, 7], vec![3, 6], vec![4, 5]];
        assert_eq!(merge_by_key(sources, |v| *v), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
