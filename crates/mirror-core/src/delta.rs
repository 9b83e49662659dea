//! Block-level change detection between two renders of one document.
//!
//! Each render is reduced to an ordered list of block signatures. The longest common
//! subsequence of the two lists is the content that survived; every block of the current
//! render outside it was inserted or rewritten and gets flagged. Blocks that exist only in
//! the previous render need no marker.

use std::hash::{DefaultHasher, Hash, Hasher};

/// Opaque signature of one rendered top-level block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockSignature(u64);

impl BlockSignature {
    /// Signature of a block's rendered text.
    pub fn of(text: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        Self(hasher.finish())
    }
}

/// Indices into `current` that are not part of the longest common subsequence.
pub fn changed_blocks<T: PartialEq>(previous: &[T], current: &[T]) -> Vec<usize> {
    let kept = lcs_mask(previous, current);
    kept.iter()
        .enumerate()
        .filter(|(_, kept)| !**kept)
        .map(|(i, _)| i)
        .collect()
}

/// For every element of `current`, whether it belongs to the longest common subsequence.
pub fn lcs_mask<T: PartialEq>(previous: &[T], current: &[T]) -> Vec<bool> {
    let mut mask = vec![false; current.len()];

    // Shared prefix and suffix match trivially and keep the table small.
    let prefix = previous
        .iter()
        .zip(current)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = previous[prefix..]
        .iter()
        .rev()
        .zip(current[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    mask[..prefix].iter_mut().for_each(|m| *m = true);
    let cur_len = current.len();
    mask[cur_len - suffix..].iter_mut().for_each(|m| *m = true);

    let old = &previous[prefix..previous.len() - suffix];
    let new = &current[prefix..cur_len - suffix];
    if old.is_empty() || new.is_empty() {
        return mask;
    }

    // lengths[i][j] = LCS length of old[i..] and new[j..]
    let (n, m) = (old.len(), new.len());
    let mut lengths = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lengths[i][j] = if old[i] == new[j] {
                lengths[i + 1][j + 1] + 1
            } else {
                lengths[i + 1][j].max(lengths[i][j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            mask[prefix + j] = true;
            i += 1;
            j += 1;
        } else if lengths[i + 1][j] >= lengths[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }

    mask
}
