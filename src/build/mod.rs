//! The `build-signatures` subcommand: ingest labeled protein sequences,
//! select discriminating k-mers per function and emit the queryable index.

pub mod extract;
pub mod select;

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use rustc_hash::FxHashSet;

use crate::common::{kmer_to_string, KMER_SIZE};
use crate::error::SigmerError;
use crate::function_map::FunctionMap;
use crate::index::{write_index, IndexManifest, INDEX_BASE};
use crate::seq_id_map::SeqIdMap;

use select::KmerStatistics;

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Directories of tab-delimited function definition files
    #[arg(long = "definition-dir", short = 'D')]
    pub definition_dirs: Vec<PathBuf>,
    /// Directories of protein fasta files
    #[arg(long = "fasta-dir", short = 'F')]
    pub fasta_dirs: Vec<PathBuf>,
    /// Directories of protein fasta files whose functions are kept outright
    #[arg(long = "fasta-keep-functions-dir", short = 'K')]
    pub fasta_keep_dirs: Vec<PathBuf>,
    /// Files listing functions to keep regardless of genome count
    #[arg(long = "good-functions")]
    pub good_functions: Vec<PathBuf>,
    /// Files listing roles to keep regardless of genome count
    #[arg(long = "good-roles")]
    pub good_roles: Vec<PathBuf>,
    /// File listing deleted feature ids to exclude
    #[arg(long = "deleted-features-file")]
    pub deleted_features_file: Option<PathBuf>,
    /// Directory receiving the kmer data files
    #[arg(long = "kmer-data-dir")]
    pub kmer_data_dir: PathBuf,
    /// Minimum distinct genomes a function must occur in to be kept
    #[arg(long = "min-reps-required", default_value_t = 3)]
    pub min_reps_required: usize,
    /// Also write a final.kmers dump to this path
    #[arg(long = "final-kmers")]
    pub final_kmers: Option<PathBuf>,
    /// Worker threads (0 = all cores)
    #[arg(long = "n-threads", short = 'j', default_value_t = 0)]
    pub n_threads: usize,
}

pub fn run(args: BuildArgs) -> Result<()> {
    crate::init_thread_pool(args.n_threads);

    if args.fasta_dirs.is_empty() && args.fasta_keep_dirs.is_empty() {
        return Err(SigmerError::Usage("no fasta directories given".to_string()).into());
    }

    let definition_files = files_in_dirs(&args.definition_dirs)?;
    let fasta_files = files_in_dirs(&args.fasta_dirs)?;
    let fasta_keep_files = files_in_dirs(&args.fasta_keep_dirs)?;

    let deleted_fids = match &args.deleted_features_file {
        Some(path) => load_string_set(path)?,
        None => FxHashSet::default(),
    };

    let mut fm = FunctionMap::new();
    for path in &args.good_functions {
        fm.add_good_functions(load_string_list(path)?);
    }
    for path in &args.good_roles {
        fm.add_good_roles(load_string_list(path)?);
    }

    // Single-threaded ingestion; the map is frozen before extraction.
    for path in &definition_files {
        fm.load_id_assignments(path)?;
    }
    log::info!("loaded {} definition files", definition_files.len());
    for path in &fasta_files {
        fm.load_fasta_file(path, false, &deleted_fids)?;
    }
    for path in &fasta_keep_files {
        fm.load_fasta_file(path, true, &deleted_fids)?;
    }

    let n_kept = fm.process_kept_functions(args.min_reps_required)?;
    log::info!("{} kept functions", n_kept);

    std::fs::create_dir_all(&args.kmer_data_dir)
        .with_context(|| format!("creating {}", args.kmer_data_dir.display()))?;
    fm.write_function_index(&args.kmer_data_dir)?;

    // Extraction re-reads every fasta file, one parallel task per file.
    let all_fasta: Vec<PathBuf> = fasta_files
        .iter()
        .chain(fasta_keep_files.iter())
        .cloned()
        .collect();
    let progress = ProgressBar::new(all_fasta.len() as u64).with_style(
        ProgressStyle::with_template("extracting {pos}/{len} files {wide_bar} {elapsed}")
            .expect("static template"),
    );
    let idmap = SeqIdMap::new();
    let attributes = extract::extract_kmers(&all_fasta, &fm, &idmap, &deleted_fids, &progress)?;
    progress.finish_and_clear();
    log::info!(
        "extracted attributes for {} distinct kmers over {} sequences",
        attributes.len(),
        idmap.len()
    );

    let kmer_stats = KmerStatistics::default();
    let kept = select::process_kmers(attributes, &kmer_stats);

    write_distinct_functions(&args.kmer_data_dir, &fm, &kmer_stats)?;
    if let Some(path) = &args.final_kmers {
        write_final_kmers(path, &kept)?;
    }

    let base = args.kmer_data_dir.join(INDEX_BASE);
    let hash_size = write_index(&kept, &base)?;
    IndexManifest {
        kmer_size: KMER_SIZE,
        min_reps_required: args.min_reps_required,
        n_functions: n_kept,
        n_kmers: kept.len(),
        hash_size,
    }
    .dump_json(&args.kmer_data_dir)?;

    log::info!("kept kmers: {}", kept.len());
    log::info!(
        "distinct signatures: {}",
        kmer_stats.distinct_signatures.load(Ordering::Relaxed)
    );
    log::info!(
        "sequences with a signature: {}",
        kmer_stats.seqs_with_a_signature.len()
    );
    log::info!("hash size: {}", hash_size);
    Ok(())
}

/// `index \t function \t kept-kmer-count`, ascending by index.
fn write_distinct_functions(
    dir: &Path,
    fm: &FunctionMap,
    kmer_stats: &KmerStatistics,
) -> Result<()> {
    let path = dir.join("distinct_functions");
    let file = File::create(&path).map_err(|e| SigmerError::io(&path, e))?;
    let mut writer = BufWriter::new(file);
    let mut entries: Vec<(u16, usize)> = kmer_stats
        .distinct_functions
        .iter()
        .map(|e| (*e.key(), *e.value()))
        .collect();
    entries.sort_unstable();
    for (index, count) in entries {
        let function = fm.lookup_function(index).unwrap_or("");
        writeln!(writer, "{}\t{}\t{}", index, function, count)
            .map_err(|e| SigmerError::io(&path, e))?;
    }
    writer.flush().map_err(|e| SigmerError::io(&path, e))?;
    Ok(())
}

fn write_final_kmers(
    path: &Path,
    kept: &[(crate::common::Kmer, crate::index::StoredKmerData)],
) -> Result<()> {
    log::info!("writing kmers to {}", path.display());
    let file = File::create(path).map_err(|e| SigmerError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for (kmer, data) in kept {
        writeln!(
            writer,
            "{}\t{}\t{}",
            kmer_to_string(kmer),
            data.avg_from_end,
            data.function_index
        )
        .map_err(|e| SigmerError::io(path, e))?;
    }
    writer.flush().map_err(|e| SigmerError::io(path, e))?;
    Ok(())
}

/// Every regular file directly inside each listed directory.
pub fn files_in_dirs(dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for dir in dirs {
        let entries =
            std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("reading {}", dir.display()))?;
            let path = entry.path();
            if path.is_file() {
                paths.push(path);
            }
        }
    }
    paths.sort();
    Ok(paths)
}

pub fn load_string_list(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).map_err(|e| SigmerError::io(path, e))?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| SigmerError::io(path, e))?;
        if !line.is_empty() {
            out.push(line);
        }
    }
    Ok(out)
}

pub fn load_string_set(path: &Path) -> Result<FxHashSet<String>> {
    Ok(load_string_list(path)?.into_iter().collect())
}
