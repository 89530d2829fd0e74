//! Signature selection: the 80% dominance rule and per-k-mer statistics.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::{DashMap, DashSet};
use rayon::prelude::*;
use rustc_hash::{FxBuildHasher, FxHashMap};

use crate::common::{FunctionIndex, Kmer, KmerAttributes};
use crate::index::payload::{clamp_u16, StoredKmerData};
use crate::stats;

use super::extract::KmerAttributeMap;

/// Counters accumulated while the selector runs; reported in the builder
/// summary and the `distinct_functions` file.
#[derive(Default)]
pub struct KmerStatistics {
    pub distinct_signatures: AtomicUsize,
    /// function index → number of signature k-mers assigned to it.
    pub distinct_functions: DashMap<FunctionIndex, usize, FxBuildHasher>,
    /// dense sequence ids that contributed at least one signature k-mer.
    pub seqs_with_a_signature: DashSet<u32, FxBuildHasher>,
}

/// Drain the attribute multimap and keep every k-mer dominated by a single
/// function, computing its stored statistics.
///
/// The result is sorted by k-mer so builder output is deterministic and
/// independent of thread count.
pub fn process_kmers(
    attributes: KmerAttributeMap,
    stats_out: &KmerStatistics,
) -> Vec<(Kmer, StoredKmerData)> {
    let groups: Vec<(Kmer, Vec<KmerAttributes>)> = attributes.into_iter().collect();
    let mut kept: Vec<(Kmer, StoredKmerData)> = groups
        .into_par_iter()
        .filter_map(|(kmer, set)| process_kmer_set(&set, stats_out).map(|data| (kmer, data)))
        .collect();
    kept.par_sort_unstable_by(|a, b| a.0.cmp(&b.0));
    kept
}

/// Apply the dominance rule to one k-mer's attribute records.
///
/// Kept iff the most frequent function covers at least 80% of the records
/// (integer-exact: `5 * c1 >= 4 * total`). Length statistics come from the
/// dominant-function subset; `avg_from_end` is the median offset over the
/// full record set.
pub fn process_kmer_set(
    set: &[KmerAttributes],
    stats_out: &KmerStatistics,
) -> Option<StoredKmerData> {
    if set.is_empty() {
        return None;
    }
    let total = set.len();

    let mut func_count: FxHashMap<FunctionIndex, usize> = FxHashMap::default();
    for rec in set {
        *func_count.entry(rec.func_index).or_insert(0) += 1;
    }
    // Ties break toward the smaller function index so output is stable.
    let (&top_func, &c1) = func_count
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))?;
    if 5 * c1 < 4 * total {
        return None;
    }

    let lengths: Vec<f64> = set
        .iter()
        .filter(|r| r.func_index == top_func)
        .map(|r| r.protein_length as f64)
        .collect();
    let offsets: Vec<f64> = set.iter().map(|r| r.offset as f64).collect();

    stats_out.distinct_signatures.fetch_add(1, Ordering::Relaxed);
    *stats_out.distinct_functions.entry(top_func).or_insert(0) += 1;
    for rec in set {
        stats_out.seqs_with_a_signature.insert(rec.seq_id);
    }

    Some(StoredKmerData {
        avg_from_end: clamp_u16(stats::median(&offsets)),
        function_index: top_func,
        mean: clamp_u16(stats::mean(&lengths)),
        median: clamp_u16(stats::median(&lengths)),
        var: clamp_u16(stats::variance(&lengths)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::UNDEFINED_OTU;

    fn rec(func: FunctionIndex, offset: u16, seq_id: u32, len: u32) -> KmerAttributes {
        KmerAttributes {
            func_index: func,
            otu_index: UNDEFINED_OTU,
            offset,
            seq_id,
            protein_length: len,
        }
    }

    #[test]
    fn unanimous_kmer_is_kept_with_exact_statistics() {
        let stats_out = KmerStatistics::default();
        let set: Vec<KmerAttributes> = (0..10).map(|i| rec(3, 200, i, 300)).collect();
        let data = process_kmer_set(&set, &stats_out).unwrap();
        assert_eq!(data.function_index, 3);
        assert_eq!(data.avg_from_end, 200);
        assert_eq!(data.mean, 300);
        assert_eq!(data.median, 300);
        assert_eq!(data.var, 0);
        assert_eq!(stats_out.distinct_signatures.load(Ordering::Relaxed), 1);
        assert_eq!(stats_out.seqs_with_a_signature.len(), 10);
    }

    #[test]
    fn two_thirds_dominance_is_discarded() {
        // 4 of 6 records share a function: 66% < 80%.
        let stats_out = KmerStatistics::default();
        let mut set: Vec<KmerAttributes> = (0..4).map(|i| rec(1, 50, i, 300)).collect();
        set.push(rec(2, 50, 4, 300));
        set.push(rec(2, 50, 5, 300));
        assert!(process_kmer_set(&set, &stats_out).is_none());
        assert_eq!(stats_out.distinct_signatures.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn eighty_percent_boundary_is_inclusive() {
        // Exactly 4 of 5.
        let stats_out = KmerStatistics::default();
        let mut set: Vec<KmerAttributes> = (0..4).map(|i| rec(1, 50, i, 300)).collect();
        set.push(rec(2, 50, 4, 300));
        assert!(process_kmer_set(&set, &stats_out).is_some());
    }

    #[test]
    fn statistics_restricted_to_dominant_function() {
        let stats_out = KmerStatistics::default();
        // 9 records of function 1 at length 100, one stray of function 2 at
        // length 9000 that must not pollute the stored lengths.
        let mut set: Vec<KmerAttributes> = (0..9).map(|i| rec(1, 40, i, 100)).collect();
        set.push(rec(2, 400, 9, 9000));
        let data = process_kmer_set(&set, &stats_out).unwrap();
        assert_eq!(data.function_index, 1);
        assert_eq!(data.mean, 100);
        assert_eq!(data.median, 100);
        assert_eq!(data.var, 0);
        // avg_from_end is over the full record set: median of nine 40s and
        // one 400 is still 40.
        assert_eq!(data.avg_from_end, 40);
    }

    #[test]
    fn dominance_tie_breaks_to_smaller_index() {
        let stats_out = KmerStatistics::default();
        // 1:1 split; neither reaches 80%, so nothing is kept...
        let set = vec![rec(5, 10, 0, 100), rec(2, 10, 1, 100)];
        assert!(process_kmer_set(&set, &stats_out).is_none());
        // ...but with a single record per function the tie-break picks the
        // smaller index when both dominate (single record case).
        let set = vec![rec(7, 10, 0, 100)];
        let data = process_kmer_set(&set, &stats_out).unwrap();
        assert_eq!(data.function_index, 7);
    }

    #[test]
    fn process_kmers_sorts_output() {
        let attributes: KmerAttributeMap = DashMap::default();
        let k1: Kmer = *b"ZZZZZZZZ";
        let k2: Kmer = *b"AAAAAAAA";
        attributes.insert(k1, vec![rec(1, 10, 0, 100)]);
        attributes.insert(k2, vec![rec(1, 10, 1, 100)]);
        let stats_out = KmerStatistics::default();
        let kept = process_kmers(attributes, &stats_out);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].0, k2);
        assert_eq!(kept[1].0, k1);
    }
}
