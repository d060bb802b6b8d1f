//! Exact global bottom-k selection by merge-reduce
//!
//! Ranks candidates across every parameter without materializing one giant
//! concatenated magnitude tensor: each parameter offers its own bottom
//! `min(len, k)` candidates, which merge into a running winner set that is
//! re-truncated to `k`. The running set therefore never exceeds `2k`
//! entries, and the result is exactly the global bottom-k.
//!
//! Ordering is fully deterministic: magnitudes compare via `total_cmp`,
//! ties break on `(uid, index)`. The same weights always produce the same
//! winners.

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One ranked candidate: a magnitude tagged with its owner parameter and
/// flat index within it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopKCandidate {
    pub magnitude: f32,
    pub uid: u32,
    pub index: usize,
}

impl TopKCandidate {
    fn order(a: &Self, b: &Self) -> Ordering {
        a.magnitude
            .total_cmp(&b.magnitude)
            .then(a.uid.cmp(&b.uid))
            .then(a.index.cmp(&b.index))
    }
}

/// Running global bottom-k selector.
#[derive(Debug)]
pub struct GlobalTopK {
    k: usize,
    running: Vec<TopKCandidate>,
}

impl GlobalTopK {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            running: Vec::with_capacity(2 * k),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Offer one parameter's magnitudes, indexed by position.
    ///
    /// Entries at `+inf` (already-pruned units) still participate; they
    /// sort last and are truncated away whenever any finite candidate
    /// exists to displace them.
    pub fn offer(&mut self, uid: u32, magnitudes: &[f32]) {
        if self.k == 0 || magnitudes.is_empty() {
            return;
        }
        let mut local: Vec<TopKCandidate> = magnitudes
            .iter()
            .enumerate()
            .map(|(index, &magnitude)| TopKCandidate {
                magnitude,
                uid,
                index,
            })
            .collect();
        local.sort_unstable_by(TopKCandidate::order);
        local.truncate(self.k);

        self.running.extend(local);
        self.running.sort_unstable_by(TopKCandidate::order);
        self.running.truncate(self.k);
    }

    /// Consume the selector, returning the winners in rank order.
    pub fn finish(self) -> Vec<TopKCandidate> {
        self.running
    }
}

/// Group winners by owning parameter, each group's indices ascending.
pub fn group_by_owner(winners: &[TopKCandidate]) -> BTreeMap<u32, Vec<usize>> {
    let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for w in winners {
        groups.entry(w.uid).or_default().push(w.index);
    }
    for indices in groups.values_mut() {
        indices.sort_unstable();
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn winners(k: usize, params: &[&[f32]]) -> Vec<(u32, usize)> {
        let mut topk = GlobalTopK::new(k);
        for (uid, mags) in params.iter().enumerate() {
            topk.offer(uid as u32, mags);
        }
        topk.finish().iter().map(|c| (c.uid, c.index)).collect()
    }

    #[test]
    fn test_exact_bottom_k_across_params() {
        // Global magnitudes: 5,1,3 / 4,2 — bottom 2 are 1 (uid 0, idx 1)
        // and 2 (uid 1, idx 1).
        let got = winners(2, &[&[5.0, 1.0, 3.0], &[4.0, 2.0]]);
        assert_eq!(got, vec![(0, 1), (1, 1)]);
    }

    #[test]
    fn test_matches_full_sort() {
        let a = [0.7, 0.1, 0.9, 0.3];
        let b = [0.2, 0.8, 0.05];
        let c = [0.6, 0.4];

        let mut flat: Vec<(f32, u32, usize)> = Vec::new();
        for (uid, mags) in [&a[..], &b[..], &c[..]].iter().enumerate() {
            for (i, &m) in mags.iter().enumerate() {
                flat.push((m, uid as u32, i));
            }
        }
        flat.sort_by(|x, y| x.0.total_cmp(&y.0));

        for k in 1..=flat.len() {
            let expected: Vec<(u32, usize)> =
                flat.iter().take(k).map(|&(_, u, i)| (u, i)).collect();
            assert_eq!(winners(k, &[&a, &b, &c]), expected, "k = {k}");
        }
    }

    #[test]
    fn test_running_set_stays_bounded() {
        let k = 3;
        let mut topk = GlobalTopK::new(k);
        for uid in 0..10u32 {
            let mags: Vec<f32> = (0..50).map(|i| (uid as f32) + i as f32 * 0.01).collect();
            topk.offer(uid, &mags);
        }
        let out = topk.finish();
        assert_eq!(out.len(), k);
        // All winners come from the smallest-valued parameter.
        assert!(out.iter().all(|c| c.uid == 0));
    }

    #[test]
    fn test_infinite_magnitudes_lose_to_finite() {
        let got = winners(2, &[&[f32::INFINITY, 9.0], &[7.0, f32::INFINITY]]);
        assert_eq!(got, vec![(1, 0), (0, 1)]);
    }

    #[test]
    fn test_tie_break_is_deterministic() {
        // Equal magnitudes order by (uid, index).
        let got = winners(3, &[&[0.5, 0.5], &[0.5]]);
        assert_eq!(got, vec![(0, 0), (0, 1), (1, 0)]);
    }

    #[test]
    fn test_k_larger_than_population() {
        let got = winners(10, &[&[2.0, 1.0]]);
        assert_eq!(got.len(), 2);
        assert_eq!(got, vec![(0, 1), (0, 0)]);
    }

    #[test]
    fn test_group_by_owner_sorts_indices() {
        let ws = [
            TopKCandidate {
                magnitude: 0.1,
                uid: 1,
                index: 7,
            },
            TopKCandidate {
                magnitude: 0.2,
                uid: 0,
                index: 3,
            },
            TopKCandidate {
                magnitude: 0.3,
                uid: 1,
                index: 2,
            },
        ];
        let groups = group_by_owner(&ws);
        assert_eq!(groups[&0], vec![3]);
        assert_eq!(groups[&1], vec![2, 7]);
    }
}
