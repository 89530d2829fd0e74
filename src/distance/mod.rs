//! The `distance-matrix` subcommand: all-pairs shared-signature counts.
//!
//! Each sequence is reduced to the set of signature k-mers it contains
//! (filtered for length consistency), an inverted index maps every k-mer
//! to the sequences carrying it, and pair counts accumulate over the
//! inverted lists.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::common::Kmer;
use crate::error::SigmerError;
use crate::fasta::read_fasta;
use crate::index::{IndexManifest, MappedKmerDb, StoredKmerData, INDEX_BASE};
use crate::kmer::KmerWindows;
use crate::output::OutputWriter;
use crate::stats;

/// Above this many sequences the input is partitioned by length before
/// the all-pairs pass.
const PARTITION_THRESHOLD: usize = 500_000;
/// Target sequences per partition bucket.
const BUCKET_TARGET: usize = 200_000;

#[derive(Args, Debug)]
pub struct DistanceArgs {
    /// Kmer data directory produced by build-signatures
    #[arg(long = "data-dir", short = 'd')]
    pub data_dir: PathBuf,
    /// Input fasta file
    #[arg(long = "input-file", short = 'i')]
    pub input_file: PathBuf,
    /// Output file (stdout when omitted)
    #[arg(long = "output-file", short = 'o')]
    pub output_file: Option<PathBuf>,
    /// Minimum shared signature count for a pair to be reported
    #[arg(long = "min-hits", default_value_t = 3)]
    pub min_hits: u32,
    /// Worker threads (0 = all cores)
    #[arg(long = "n-threads", short = 'j', default_value_t = 0)]
    pub n_threads: usize,
}

/// One query's signature profile.
struct SeqProfile {
    id: String,
    length: u32,
    kmers: Vec<Kmer>,
}

pub fn run(args: DistanceArgs) -> Result<()> {
    crate::init_thread_pool(args.n_threads);

    let base = args.data_dir.join(INDEX_BASE);
    if !MappedKmerDb::exists(&base) {
        return Err(SigmerError::Config(format!(
            "database {} does not exist",
            base.display()
        ))
        .into());
    }
    IndexManifest::verify_compatible(&args.data_dir)?;
    let db = MappedKmerDb::open(&base)?;

    let file = File::open(&args.input_file)
        .with_context(|| format!("opening {}", args.input_file.display()))?;
    let records = read_fasta(file)?;
    log::info!("{}: {} sequences", args.input_file.display(), records.len());

    let profiles: Vec<SeqProfile> = records
        .par_iter()
        .filter(|r| !r.id.is_empty() && !r.seq.is_empty())
        .map(|r| signature_profile(&db, &r.id, r.seq.as_bytes()))
        .collect();

    let writer = OutputWriter::create(args.output_file.as_deref())?;

    let buckets = partition_by_length(&profiles);
    if buckets.len() > 1 {
        log::info!(
            "partitioned {} sequences into {} length buckets; cross-bucket pairs are not compared",
            profiles.len(),
            buckets.len()
        );
    }
    for bucket in &buckets {
        compare_bucket(&profiles, bucket, args.min_hits, &writer);
    }

    writer.finish()?;
    log::info!("all to all done");
    Ok(())
}

/// The set of signature k-mers in one sequence, dropping hits whose
/// training length distribution is inconsistent with the query length:
/// outside mean ± 2σ, or mean ± 10% of the query length when the stored
/// variance is zero.
fn signature_profile(db: &MappedKmerDb, id: &str, seq: &[u8]) -> SeqProfile {
    let length = seq.len() as u32;
    let mut kmers: Vec<Kmer> = Vec::new();
    for (kmer, _pos) in KmerWindows::new(seq) {
        if let Some(data) = db.fetch(&kmer) {
            if length_consistent(&data, length) {
                kmers.push(kmer);
            }
        }
    }
    kmers.sort_unstable();
    kmers.dedup();
    SeqProfile {
        id: id.to_string(),
        length,
        kmers,
    }
}

fn length_consistent(data: &StoredKmerData, query_len: u32) -> bool {
    let mean = data.mean as f64;
    let ql = query_len as f64;
    let spread = if data.var > 0 {
        2.0 * (data.var as f64).sqrt()
    } else {
        0.10 * ql
    };
    ql >= mean - spread && ql <= mean + spread
}

/// Bucket profile indices by length. One bucket for ordinary inputs;
/// Jenks natural breaks over the length histogram above the partition
/// threshold.
fn partition_by_length(profiles: &[SeqProfile]) -> Vec<Vec<u32>> {
    if profiles.len() <= PARTITION_THRESHOLD {
        return vec![(0..profiles.len() as u32).collect()];
    }

    let mut hist_map: FxHashMap<u32, u32> = FxHashMap::default();
    for p in profiles {
        *hist_map.entry(p.length).or_insert(0) += 1;
    }
    let histogram: Vec<(u32, u32)> = hist_map.into_iter().collect();
    let n_classes = profiles.len().div_ceil(BUCKET_TARGET);
    let breaks = stats::jenks_breaks(&histogram, n_classes);

    let mut buckets: Vec<Vec<u32>> = vec![Vec::new(); breaks.len()];
    for (i, p) in profiles.iter().enumerate() {
        let b = breaks.partition_point(|&upper| upper < p.length);
        let b = b.min(breaks.len() - 1);
        buckets[b].push(i as u32);
    }
    buckets.retain(|b| !b.is_empty());
    buckets
}

/// All-pairs shared-k-mer counting within one bucket.
fn compare_bucket(profiles: &[SeqProfile], members: &[u32], min_hits: u32, writer: &OutputWriter) {
    // Inverted index: kmer → ascending member positions carrying it.
    let mut inverted: FxHashMap<Kmer, Vec<u32>> = FxHashMap::default();
    for (pos, &idx) in members.iter().enumerate() {
        for kmer in &profiles[idx as usize].kmers {
            inverted.entry(*kmer).or_default().push(pos as u32);
        }
    }

    // Count ordered pairs per k-mer list, merging thread-local maps.
    let pair_counts: FxHashMap<(u32, u32), u32> = inverted
        .par_iter()
        .fold(FxHashMap::default, |mut acc, (_, ids)| {
            for i in 0..ids.len() {
                for j in i + 1..ids.len() {
                    *acc.entry((ids[i], ids[j])).or_insert(0) += 1;
                }
            }
            acc
        })
        .reduce(FxHashMap::default, |mut a, b| {
            for (pair, count) in b {
                *a.entry(pair).or_insert(0) += count;
            }
            a
        });

    let sender = writer.sender();
    pair_counts
        .par_iter()
        .filter(|(_, &count)| count >= min_hits)
        .for_each(|(&(i, j), &count)| {
            let p1 = &profiles[members[i as usize] as usize];
            let p2 = &profiles[members[j as usize] as usize];
            let score = count as f32 / (p1.length + p2.length) as f32;
            let _ = sender.send(format!("{}\t{}\t{}\t{}", p1.id, p2.id, count, score));
        });
}
