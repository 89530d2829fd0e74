//! Hit chaining: turns the stream of per-window index hits into candidate
//! call regions.
//!
//! The chainer keeps a current function and an accumulator of hits. A gap
//! larger than `max_gap` flushes the accumulator (kept only when it holds
//! at least `min_hits` hits); two consecutive trailing hits against a
//! different function flush the accumulator early and reseed it with those
//! two hits.

use crate::common::{FunctionIndex, KmerCall, KMER_SIZE, UNDEFINED_FUNCTION};
use crate::index::StoredKmerData;
use crate::stats;

/// Dispersion floor applied when the region's length MAD is zero.
const MIN_LENGTH_MAD: f32 = 30.0;

#[derive(Debug, Clone, Copy)]
pub struct ChainConfig {
    /// Minimum hits for a region flushed by a gap or end of sequence.
    pub min_hits: usize,
    /// Maximum residue distance between consecutive hits of one region.
    pub max_gap: u32,
    /// Drop hits against this function outright (the "hypothetical
    /// protein" index when --ignore-hypo is set).
    pub ignore_function: Option<FunctionIndex>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            min_hits: 5,
            max_gap: 200,
            ignore_function: None,
        }
    }
}

pub struct HitChainer {
    config: ChainConfig,
    query_len: u32,
    current: FunctionIndex,
    hits: Vec<(u32, StoredKmerData)>,
    calls: Vec<KmerCall>,
}

impl HitChainer {
    pub fn new(config: ChainConfig, query_len: u32) -> Self {
        HitChainer {
            config,
            query_len,
            current: UNDEFINED_FUNCTION,
            hits: Vec::new(),
            calls: Vec::new(),
        }
    }

    /// Feed the hit at window offset `pos`. Hits must arrive in ascending
    /// offset order.
    pub fn add_hit(&mut self, pos: u32, data: StoredKmerData) {
        if self.config.ignore_function == Some(data.function_index) {
            return;
        }

        if let Some(&(last_pos, _)) = self.hits.last() {
            if last_pos + self.config.max_gap < pos {
                if self.hits.len() >= self.config.min_hits {
                    let region = std::mem::take(&mut self.hits);
                    self.emit_region(&region);
                } else {
                    self.hits.clear();
                }
            }
        }

        if self.hits.is_empty() {
            self.current = data.function_index;
        }
        self.hits.push((pos, data));

        // Two trailing hits agreeing on a different function end the
        // current region and seed the next one.
        let n = self.hits.len();
        if n >= 2
            && self.hits[n - 1].1.function_index != self.current
            && self.hits[n - 2].1.function_index == self.hits[n - 1].1.function_index
        {
            let mut region = std::mem::take(&mut self.hits);
            let seeds = region.split_off(n - 2);
            self.emit_region(&region);
            self.current = seeds[0].1.function_index;
            self.hits = seeds;
        }
    }

    /// Flush the trailing accumulator and return all emitted calls.
    pub fn finish(mut self) -> Vec<KmerCall> {
        if self.hits.len() >= self.config.min_hits {
            let region = std::mem::take(&mut self.hits);
            self.emit_region(&region);
        }
        self.calls
    }

    /// Score a region against the training length distribution and emit a
    /// KmerCall unless the query length is inconsistent with it.
    fn emit_region(&mut self, region: &[(u32, StoredKmerData)]) {
        let matching: Vec<&(u32, StoredKmerData)> = region
            .iter()
            .filter(|(_, d)| d.function_index == self.current)
            .collect();
        let Some(&&(last_pos, _)) = matching.last() else {
            return;
        };

        let means: Vec<f64> = matching.iter().map(|(_, d)| d.mean as f64).collect();
        let mean = stats::mean(&means);
        let median = stats::median(&means);
        let mut mad = stats::median_absolute_deviation(&means) as f32;
        if mad == 0.0 {
            mad = MIN_LENGTH_MAD;
        }

        let query_len = self.query_len as f64;
        let spread = 2.0 * mad as f64;
        if query_len < mean - spread || query_len > mean + spread {
            log::debug!(
                "rejecting region at {}: query length {} outside [{}, {}]",
                region[0].0,
                query_len,
                mean - spread,
                mean + spread
            );
            return;
        }

        self.calls.push(KmerCall {
            start: region[0].0,
            end: last_pos + KMER_SIZE as u32 - 1,
            count: matching.len() as i32,
            function_index: self.current,
            protein_length_median: median.round() as u32,
            protein_length_med_avg_dev: mad,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(func: FunctionIndex, mean: u16) -> StoredKmerData {
        StoredKmerData {
            avg_from_end: 0,
            function_index: func,
            mean,
            median: mean,
            var: 0,
        }
    }

    fn chain(config: ChainConfig, query_len: u32, hits: &[(u32, StoredKmerData)]) -> Vec<KmerCall> {
        let mut chainer = HitChainer::new(config, query_len);
        for &(pos, data) in hits {
            chainer.add_hit(pos, data);
        }
        chainer.finish()
    }

    #[test]
    fn isolated_run_yields_exactly_one_call() {
        let hits: Vec<(u32, StoredKmerData)> =
            (0..6).map(|i| (i * 10, hit(1, 300))).collect();
        let calls = chain(ChainConfig::default(), 300, &hits);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function_index, 1);
        assert_eq!(calls[0].count, 6);
        assert_eq!(calls[0].start, 0);
        assert_eq!(calls[0].end, 50 + KMER_SIZE as u32 - 1);
        assert_eq!(calls[0].protein_length_median, 300);
        assert_eq!(calls[0].protein_length_med_avg_dev, MIN_LENGTH_MAD);
    }

    #[test]
    fn short_run_is_dropped() {
        let hits: Vec<(u32, StoredKmerData)> =
            (0..4).map(|i| (i * 10, hit(1, 300))).collect();
        assert!(chain(ChainConfig::default(), 300, &hits).is_empty());
    }

    #[test]
    fn gap_breaks_region() {
        // 3 hits, then a gap beyond max_gap, then 5 more: only the second
        // run emits.
        let mut hits: Vec<(u32, StoredKmerData)> =
            vec![(10, hit(1, 300)), (20, hit(1, 300)), (30, hit(1, 300))];
        for i in 0..5 {
            hits.push((300 + i * 10, hit(1, 300)));
        }
        let calls = chain(ChainConfig::default(), 300, &hits);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].count, 5);
        assert_eq!(calls[0].start, 300);
    }

    #[test]
    fn long_run_before_gap_is_kept() {
        let mut hits: Vec<(u32, StoredKmerData)> =
            (0..5).map(|i| (i * 10, hit(1, 300))).collect();
        for i in 0..5 {
            hits.push((500 + i * 10, hit(2, 300)));
        }
        let calls = chain(ChainConfig::default(), 300, &hits);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function_index, 1);
        assert_eq!(calls[1].function_index, 2);
    }

    #[test]
    fn two_trailing_hits_reseed_the_next_region() {
        // 5 hits of function 1, then 4 of function 2 in close succession:
        // the switch happens after the second function-2 hit, which seeds
        // the next region. The function-2 region (4 hits) ends the
        // sequence below min_hits only if fewer than 5 arrive.
        let mut hits: Vec<(u32, StoredKmerData)> =
            (0..5).map(|i| (i * 10, hit(1, 300))).collect();
        for i in 0..5 {
            hits.push((50 + i * 10, hit(2, 300)));
        }
        let calls = chain(ChainConfig::default(), 300, &hits);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function_index, 1);
        assert_eq!(calls[0].count, 5);
        assert_eq!(calls[1].function_index, 2);
        assert_eq!(calls[1].count, 5);
    }

    #[test]
    fn single_dissenting_hit_does_not_break_region() {
        // One stray function-2 hit inside a function-1 run is carried in
        // the region but not counted.
        let mut hits: Vec<(u32, StoredKmerData)> =
            (0..3).map(|i| (i * 10, hit(1, 300))).collect();
        hits.push((30, hit(2, 300)));
        for i in 4..8 {
            hits.push((i * 10, hit(1, 300)));
        }
        let calls = chain(ChainConfig::default(), 300, &hits);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function_index, 1);
        assert_eq!(calls[0].count, 7);
        assert_eq!(calls[0].end, 70 + KMER_SIZE as u32 - 1);
    }

    #[test]
    fn inconsistent_query_length_rejects_region() {
        // Training proteins average 1000 residues; a 300-residue query is
        // far outside mean ± 2·MAD (MAD floored at 30).
        let hits: Vec<(u32, StoredKmerData)> =
            (0..6).map(|i| (i * 10, hit(1, 1000))).collect();
        assert!(chain(ChainConfig::default(), 300, &hits).is_empty());
    }

    #[test]
    fn mad_floor_admits_nearby_lengths() {
        // All stored means 300, MAD floored to 30: query of 350 is inside
        // [240, 360].
        let hits: Vec<(u32, StoredKmerData)> =
            (0..6).map(|i| (i * 10, hit(1, 300))).collect();
        assert_eq!(chain(ChainConfig::default(), 350, &hits).len(), 1);
        assert!(chain(ChainConfig::default(), 365, &hits).is_empty());
    }

    #[test]
    fn ignored_function_hits_are_dropped() {
        let config = ChainConfig {
            ignore_function: Some(9),
            ..Default::default()
        };
        let mut hits: Vec<(u32, StoredKmerData)> =
            (0..6).map(|i| (i * 10, hit(9, 300))).collect();
        assert!(chain(config, 300, &hits).is_empty());
        // And they do not even enter the accumulator.
        hits.extend((6..12).map(|i| (i * 10, hit(1, 300))));
        let calls = chain(config, 300, &hits);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].count, 6);
    }
}
