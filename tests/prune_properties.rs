//! Property tests for the pruning engines.

use podar::model::GptConfig;
use podar::prune::{L1UnstructuredPruner, L2StructuredPruner, Pruneable};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Each unstructured step removes exactly floor(remaining * rate),
    /// so sparsity compounds geometrically over the run.
    #[test]
    fn unstructured_follows_floored_recurrence(rate in 0.05f32..0.5f32) {
        let mut pruner = L1UnstructuredPruner::new(&GptConfig::tiny());
        let mut remaining = pruner.num_elems();
        for _ in 0..3 {
            let step = pruner.prune(rate).unwrap();
            let k = (remaining as f64 * f64::from(rate)).floor() as usize;
            prop_assert_eq!(step.requested, k);
            prop_assert_eq!(step.pruned, k);
            prop_assert_eq!(step.elems_before, remaining);
            remaining -= k;
            prop_assert_eq!(step.elems_after, remaining);
            prop_assert_eq!(pruner.num_elems(), remaining);
        }
    }

    /// Remaining counts only ever go down, for both engines.
    #[test]
    fn remaining_is_monotone(rate in 0.05f32..0.6f32) {
        let mut l1 = L1UnstructuredPruner::new(&GptConfig::tiny());
        let mut l2 = L2StructuredPruner::new(&GptConfig::tiny());
        let mut prev_elems = l1.num_elems();
        let mut prev_channels = l2.num_channels();
        for _ in 0..4 {
            l1.prune(rate).unwrap();
            prop_assert!(l1.num_elems() <= prev_elems);
            prev_elems = l1.num_elems();

            l2.prune(rate).unwrap();
            prop_assert!(l2.num_channels() <= prev_channels);
            prev_channels = l2.num_channels();
        }
    }

    /// Metadata is consistent with the live counts, and querying it twice
    /// changes nothing.
    #[test]
    fn metadata_matches_counts(rate in 0.05f32..0.5f32, steps in 1usize..4) {
        let mut pruner = L1UnstructuredPruner::new(&GptConfig::tiny());
        let orig = pruner.num_elems();
        for _ in 0..steps {
            pruner.prune(rate).unwrap();
        }
        let (filename, meta) = pruner.pruning_metadata();
        prop_assert_eq!(meta.orig_non_zero, orig);
        prop_assert_eq!(meta.non_zero, pruner.num_elems());
        prop_assert!((meta.pct_orig - meta.non_zero as f64 / orig as f64).abs() < 1e-12);
        prop_assert_eq!(&filename, &format!("{:.3}x_orig_ckpt.pt", meta.pct_orig));

        let (filename2, meta2) = pruner.pruning_metadata();
        prop_assert_eq!(filename, filename2);
        prop_assert_eq!(&meta, &meta2);
        prop_assert_eq!(pruner.num_elems(), meta2.non_zero);
    }

    /// No structured target ever drops below two channels, however hard
    /// the run pushes.
    #[test]
    fn structured_respects_channel_floor(rate in 0.5f32..0.95f32) {
        let config = GptConfig::tiny();
        let mut pruner = L2StructuredPruner::new(&config);
        for _ in 0..5 {
            pruner.prune(rate).unwrap();
        }
        // Four linear weights per block, each keeping at least 2 channels.
        let targets = 4 * config.n_layer;
        prop_assert!(pruner.num_channels() >= 2 * targets);
    }

    /// The fixed-rate contract rejects any differing rate, on either engine.
    #[test]
    fn mismatched_rate_rejected(a in 0.05f32..0.45f32, delta in 0.05f32..0.4f32) {
        let b = a + delta;
        let mut l1 = L1UnstructuredPruner::new(&GptConfig::tiny());
        l1.prune(a).unwrap();
        prop_assert!(l1.prune(b).is_err());
        prop_assert!(l1.prune(a).is_ok());

        let mut l2 = L2StructuredPruner::new(&GptConfig::tiny());
        l2.prune(a).unwrap();
        prop_assert!(l2.prune(b).is_err());
    }

    /// Pruned models still produce finite logits and loss.
    #[test]
    fn pruned_forward_stays_finite(rate in 0.1f32..0.7f32) {
        let config = GptConfig::tiny();
        let mut pruner = L1UnstructuredPruner::new(&config);
        pruner.prune(rate).unwrap();
        let (logits, loss) = pruner.forward(&[1, 2, 3, 4], Some(&[2, 3, 4, 5]));
        prop_assert!(logits.to_vec().iter().all(|v| v.is_finite()));
        prop_assert!(loss.unwrap().is_finite());
    }
}
