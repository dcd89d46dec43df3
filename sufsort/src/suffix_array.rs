// Copyright 2026 The exediff Authors
//
// SPDX-License-Identifier: Apache-2.0

use std::cmp::Ordering;

/// A suffix array for a byte string.
pub struct SuffixArray<'a> {
    data: &'a [u8],
    inner: Vec<u32>,
}

/// The location and length of a match found by [`SuffixArray::longest_match`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LongestMatch {
    position: usize,
    len: usize,
}

impl LongestMatch {
    /// Returns the offset in the indexed data where the match begins.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns the number of matching bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the match is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<'a> SuffixArray<'a> {
    /// Creates a new `SuffixArray` for `data`.
    ///
    /// The construction is plain prefix doubling, *O*(*n* log²(*n*)).
    ///
    /// # Panics
    ///
    /// Panics if `data.len() > u32::MAX`.
    ///
    /// # Examples
    ///
    /// ```
    /// use sufsort::SuffixArray;
    ///
    /// let data = b"Hello, world!";
    /// let sa = SuffixArray::new(data);
    /// ```
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        assert!(
            u32::try_from(data.len()).is_ok(),
            "data length must fit in a u32"
        );

        let inner = build(data);

        Self { data, inner }
    }

    /// Returns `true` if and only if `pattern` is contained in the associated data.
    ///
    /// This operation is *O*(*m* \* log(*n*)), where `m` is `pattern.len()`.
    #[must_use]
    pub fn contains(&self, pattern: &[u8]) -> bool {
        self.inner
            .binary_search_by(|&suffix| {
                self.data[suffix as usize..]
                    .iter()
                    .take(pattern.len())
                    .cmp(pattern.iter())
            })
            .is_ok()
    }

    /// Finds the position in the indexed data sharing the longest common prefix
    /// with `pattern`.
    ///
    /// Returns `None` when no byte of `pattern` occurs in the data. Ties are
    /// broken arbitrarily.
    ///
    /// This operation is *O*((*m* + log(*n*)) \* *m*) in the worst case, where
    /// `m` is `pattern.len()`.
    #[must_use]
    pub fn longest_match(&self, pattern: &[u8]) -> Option<LongestMatch> {
        if self.inner.is_empty() || pattern.is_empty() {
            return None;
        }

        // The suffix maximizing the common prefix with `pattern` is adjacent to
        // the point where `pattern` would sort into the suffix array.
        let insert = match self
            .inner
            .binary_search_by(|&suffix| match self.data[suffix as usize..].cmp(pattern) {
                Ordering::Equal => Ordering::Greater,
                other => other,
            }) {
            Ok(i) | Err(i) => i,
        };

        let mut best = LongestMatch { position: 0, len: 0 };
        for i in [insert.wrapping_sub(1), insert] {
            let Some(&suffix) = self.inner.get(i) else {
                continue;
            };
            let len = common_prefix(&self.data[suffix as usize..], pattern);
            if len > best.len {
                best = LongestMatch {
                    position: suffix as usize,
                    len,
                };
            }
        }

        (best.len > 0).then_some(best)
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Constructs the suffix array of `data` by prefix doubling (Manber–Myers).
fn build(data: &[u8]) -> Vec<u32> {
    let n = data.len();
    let mut sa: Vec<u32> = (0..n as u32).collect();
    let mut rank: Vec<u32> = data.iter().map(|&b| u32::from(b)).collect();
    let mut next_rank = vec![0u32; n];

    let mut k = 1;
    while k < n {
        // Rank of the suffix starting `k` bytes past `i`; suffixes shorter than
        // `k` sort before everything (`None < Some(_)`).
        let key = |i: u32| {
            (
                rank[i as usize],
                rank.get(i as usize + k).copied(),
            )
        };
        sa.sort_unstable_by_key(|&i| key(i));

        next_rank[sa[0] as usize] = 0;
        for w in 1..n {
            let bump = u32::from(key(sa[w - 1]) != key(sa[w]));
            next_rank[sa[w] as usize] = next_rank[sa[w - 1] as usize] + bump;
        }
        std::mem::swap(&mut rank, &mut next_rank);

        if rank[sa[n - 1] as usize] as usize == n - 1 {
            break;
        }
        k *= 2;
    }

    sa
}
