use std::fmt;

/// Length of every signature k-mer. The on-disk index commits to this size,
/// so it is a crate-wide constant rather than a type parameter.
pub const KMER_SIZE: usize = 8;

/// A signature k-mer: exactly [`KMER_SIZE`] amino-acid bytes.
///
/// Equality is byte-wise and ordering is lexicographic, which the derived
/// impls on a byte array already provide.
pub type Kmer = [u8; KMER_SIZE];

/// Compact identifier for a kept function string.
///
/// Indexes reference entries in the `function.index` file produced at build
/// time.
pub type FunctionIndex = u16;

/// Reserved value representing a missing or undefined function.
pub const UNDEFINED_FUNCTION: FunctionIndex = u16::MAX;

/// Reserved value for the (unused) OTU slot carried by attribute records.
pub const UNDEFINED_OTU: u16 = u16::MAX;

/// Per-occurrence record collected for every valid k-mer of every training
/// sequence. Owned by the attribute collector, consumed by the selector.
#[derive(Debug, Clone, Copy)]
pub struct KmerAttributes {
    pub func_index: FunctionIndex,
    /// Reserved; always [`UNDEFINED_OTU`].
    pub otu_index: u16,
    /// 1-based residue distance from the k-mer start to the protein's end.
    pub offset: u16,
    pub seq_id: u32,
    pub protein_length: u32,
}

/// A candidate call region: a run of hits against one function that
/// survived the chainer's gap and length-consistency rules.
#[derive(Debug, Clone)]
pub struct KmerCall {
    /// Offset of the first hit in the region.
    pub start: u32,
    /// Offset of the last matching hit plus `KMER_SIZE - 1`.
    pub end: u32,
    /// Number of hits in the region matching `function_index`.
    pub count: i32,
    pub function_index: FunctionIndex,
    /// Median of the hits' stored mean source-protein length.
    pub protein_length_median: u32,
    /// Median absolute deviation of the same, floored at 30 when zero.
    pub protein_length_med_avg_dev: f32,
}

impl fmt::Display for KmerCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KmerCall({}-{}: {}, {}, {}, {})",
            self.start,
            self.end,
            self.count,
            self.function_index,
            self.protein_length_median,
            self.protein_length_med_avg_dev
        )
    }
}

/// Render a k-mer for reports and diagnostics.
pub fn kmer_to_string(kmer: &Kmer) -> String {
    String::from_utf8_lossy(kmer).into_owned()
}
