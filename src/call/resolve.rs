//! Best-call resolution: collapse candidate regions, merge sandwiched
//! noise, detect fusion proteins and apply the score-offset threshold.

use rustc_hash::FxHashMap;

use crate::common::{FunctionIndex, KmerCall, UNDEFINED_FUNCTION};
use crate::funcutil::is_fusion_function;
use crate::stats;

/// Interior count threshold for the sandwich merge: a middle region this
/// small may be noise inside a longer run.
const SANDWICH_INTERIOR_MAX: i32 = 5;
/// Exterior count threshold: the flanking regions together must carry at
/// least this many hits.
const SANDWICH_EXTERIOR_MIN: i32 = 10;
/// Minimum margin between the best and second-best function totals.
const MIN_SCORE_OFFSET: f32 = 5.0;
/// Relative tolerance for the fusion length consistency test.
const FUSION_LENGTH_TOLERANCE: f64 = 0.10;

/// The resolved call for one query sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct BestCall {
    pub function_index: FunctionIndex,
    /// Function string; empty for an undefined call. The tentative
    /// `f1 ?? f2` fallback names two functions but has no index.
    pub function: String,
    pub score: f32,
    pub score_offset: f32,
}

impl BestCall {
    fn undefined(score_offset: f32) -> Self {
        BestCall {
            function_index: UNDEFINED_FUNCTION,
            function: String::new(),
            score: 0.0,
            score_offset,
        }
    }

    pub fn is_undefined(&self) -> bool {
        self.function_index == UNDEFINED_FUNCTION && self.function.is_empty()
    }
}

/// Resolve the call regions of a single query into its best call.
///
/// `function_of` maps a function index to its string; it is consulted for
/// fusion annotations and fallback naming.
pub fn find_best_call<'a, F>(calls: &[KmerCall], function_of: F) -> BestCall
where
    F: Fn(FunctionIndex) -> &'a str,
{
    if calls.is_empty() {
        return BestCall::undefined(0.0);
    }

    let collapsed = collapse_adjacent(calls);
    let merged = sandwich_merge(collapsed);

    if merged.len() > 1 {
        if let Some(call) = detect_fusion(&merged, &function_of) {
            return call;
        }
    }

    aggregate(&merged, &function_of)
}

/// Step A: merge adjacent regions with identical function.
fn collapse_adjacent(calls: &[KmerCall]) -> Vec<KmerCall> {
    let mut out: Vec<KmerCall> = Vec::with_capacity(calls.len());
    for call in calls {
        match out.last_mut() {
            Some(prev) if prev.function_index == call.function_index => {
                prev.count += call.count;
                prev.end = call.end;
            }
            _ => out.push(call.clone()),
        }
    }
    out
}

/// Step B: fuse F1 | F2 | F1 patterns where the interior is small and the
/// flanks are strong. Single left-to-right traversal; after a fuse the
/// scan pointer advances past the fused region, so an immediately adjacent
/// second sandwich sharing the new flank is not re-examined.
fn sandwich_merge(mut calls: Vec<KmerCall>) -> Vec<KmerCall> {
    let mut i = 0;
    while i + 2 < calls.len() {
        let outer_match = calls[i].function_index == calls[i + 2].function_index
            && calls[i + 1].function_index != calls[i].function_index;
        let interior_small = calls[i + 1].count < SANDWICH_INTERIOR_MAX;
        let exterior_strong = calls[i].count + calls[i + 2].count >= SANDWICH_EXTERIOR_MIN;
        if outer_match && interior_small && exterior_strong {
            calls[i].count += calls[i + 2].count;
            calls[i].end = calls[i + 2].end;
            calls.drain(i + 1..i + 3);
            i += 2;
        } else {
            i += 1;
        }
    }
    calls
}

/// Step C: fusion detection over the region expression.
///
/// Regions are encoded one letter each: distinct non-fusion functions get
/// 'A', 'B', … and fusion functions (annotation contains " / ") get 'W',
/// 'X', …. The pattern `W?A[A|W]*W[B|W]*BW?` (two distinct plain parts
/// flanking a fusion) triggers a fusion call when the combined mean
/// length of the parts matches the fusion's mean length within 10%.
fn detect_fusion<'a, F>(calls: &[KmerCall], function_of: &F) -> Option<BestCall>
where
    F: Fn(FunctionIndex) -> &'a str,
{
    let mut letters: FxHashMap<FunctionIndex, u8> = FxHashMap::default();
    let mut next_plain = b'A';
    let mut next_fusion = b'W';
    let mut expr = Vec::with_capacity(calls.len());
    let mut fusion_index = None;

    for call in calls {
        let letter = match letters.get(&call.function_index) {
            Some(&l) => l,
            None => {
                let l = if is_fusion_function(function_of(call.function_index)) {
                    if next_fusion > b'Z' {
                        return None;
                    }
                    let l = next_fusion;
                    next_fusion += 1;
                    l
                } else {
                    // Plain letters must stay clear of the fusion range.
                    if next_plain >= b'W' {
                        return None;
                    }
                    let l = next_plain;
                    next_plain += 1;
                    l
                };
                letters.insert(call.function_index, l);
                l
            }
        };
        if letter == b'W' {
            fusion_index = Some(call.function_index);
        }
        expr.push(letter);
    }

    if !fusion_expression_matches(&expr) {
        return None;
    }
    let fusion_index = fusion_index?;

    let mean_of = |letter: u8| -> f64 {
        let lengths: Vec<f64> = calls
            .iter()
            .zip(expr.iter())
            .filter(|(_, &l)| l == letter)
            .map(|(c, _)| c.protein_length_median as f64)
            .collect();
        stats::mean(&lengths)
    };
    let a_mean = mean_of(b'A');
    let b_mean = mean_of(b'B');
    let w_mean = mean_of(b'W');
    if w_mean <= 0.0 {
        return None;
    }
    if (a_mean + b_mean - w_mean).abs() >= FUSION_LENGTH_TOLERANCE * w_mean {
        return None;
    }

    let score: i32 = calls.iter().map(|c| c.count).sum();
    Some(BestCall {
        function_index: fusion_index,
        function: function_of(fusion_index).to_string(),
        score: score as f32,
        score_offset: score as f32,
    })
}

/// Full match of the region expression against `W?A[A|W]*W[B|W]*BW?`.
fn fusion_expression_matches(expr: &[u8]) -> bool {
    if expr.iter().any(|&c| c != b'A' && c != b'B' && c != b'W') {
        return false;
    }
    let mut s = expr;
    if s.first() == Some(&b'W') {
        s = &s[1..];
    }
    if s.first() != Some(&b'A') {
        return false;
    }
    s = &s[1..];
    if s.last() == Some(&b'W') {
        s = &s[..s.len() - 1];
    }
    if s.last() != Some(&b'B') {
        return false;
    }
    s = &s[..s.len() - 1];

    // Remainder must be (A|W)* W (B|W)*: a W after every A and before
    // every B.
    let last_a = s.iter().rposition(|&c| c == b'A');
    let first_b = s.iter().position(|&c| c == b'B');
    if let (Some(a), Some(b)) = (last_a, first_b) {
        if a > b {
            return false;
        }
    }
    let lo = last_a.map(|i| i + 1).unwrap_or(0);
    let hi = first_b.unwrap_or(s.len());
    s[lo..hi].contains(&b'W')
}

/// Step D: sum counts per function, demand a margin of at least 5 between
/// the top two, and fall back to a tentative `f1 ?? f2` name for close
/// two-way splits.
fn aggregate<'a, F>(calls: &[KmerCall], function_of: &F) -> BestCall
where
    F: Fn(FunctionIndex) -> &'a str,
{
    let mut totals: FxHashMap<FunctionIndex, i32> = FxHashMap::default();
    for call in calls {
        *totals.entry(call.function_index).or_insert(0) += call.count;
    }
    let mut ranked: Vec<(FunctionIndex, i32)> = totals.into_iter().collect();
    ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let (top_func, top) = ranked[0];
    let second = ranked.get(1).map(|&(_, c)| c);
    let score_offset = match second {
        Some(c) => (top - c) as f32,
        None => top as f32,
    };

    if score_offset >= MIN_SCORE_OFFSET {
        return BestCall {
            function_index: top_func,
            function: function_of(top_func).to_string(),
            score: top as f32,
            score_offset,
        };
    }

    // Near-tie between two functions: offer a tentative two-function name
    // when no third candidate muddies the picture.
    if ranked.len() >= 2 {
        let third_clear = match ranked.get(2) {
            None => true,
            Some(&(_, third)) => second.expect("second exists") - third > 2,
        };
        if third_clear {
            let f1 = function_of(ranked[0].0);
            let f2 = function_of(ranked[1].0);
            let (lo, hi) = if f1 <= f2 { (f1, f2) } else { (f2, f1) };
            return BestCall {
                function_index: UNDEFINED_FUNCTION,
                function: format!("{} ?? {}", lo, hi),
                score: top as f32,
                score_offset,
            };
        }
    }

    BestCall::undefined(score_offset)
}
