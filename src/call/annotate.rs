//! The `annotate-seqs` subcommand: bulk annotation of a directory of
//! fasta files, separating called from uncalled sequences.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use rayon::prelude::*;

use crate::build::files_in_dirs;
use crate::error::SigmerError;
use crate::fasta::read_fasta;
use crate::index::{IndexManifest, MappedKmerDb, INDEX_BASE};
use crate::output::OutputWriter;

use super::chain::ChainConfig;
use super::FunctionCaller;

#[derive(Args, Debug)]
pub struct AnnotateArgs {
    /// Kmer data directory produced by build-signatures
    #[arg(long = "data-dir", short = 'd')]
    pub data_dir: PathBuf,
    /// Directory of fasta files to annotate
    #[arg(long = "sequences-dir")]
    pub sequences_dir: PathBuf,
    /// Output file for resolved calls
    #[arg(long = "calls-file")]
    pub calls_file: PathBuf,
    /// Output file listing ids that received no call
    #[arg(long = "uncalled-ids-file")]
    pub uncalled_ids_file: PathBuf,
    /// Worker threads (0 = all cores)
    #[arg(long = "n-threads", short = 'j', default_value_t = 0)]
    pub n_threads: usize,
}

pub fn run(args: AnnotateArgs) -> Result<()> {
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
    let caller = FunctionCaller::with_config(
        &db,
        &args.data_dir.join("function.index"),
        ChainConfig::default(),
        false,
    )?;

    let input_files = files_in_dirs(std::slice::from_ref(&args.sequences_dir))?;
    log::info!("annotating {} files", input_files.len());

    let writer = OutputWriter::create(Some(&args.calls_file))?;
    let sender = writer.sender();

    // One task per input file; each task buffers its uncalled ids and the
    // buffers are concatenated afterwards.
    let uncalled_ids: Vec<String> = input_files
        .par_iter()
        .map(|path| -> Result<Vec<String>> {
            let file =
                File::open(path).with_context(|| format!("opening {}", path.display()))?;
            let records = read_fasta(file)?;
            let mut uncalled = Vec::new();
            for record in &records {
                if record.id.is_empty() || record.seq.is_empty() {
                    continue;
                }
                let (best, _calls) = caller.call_sequence(record.seq.as_bytes());
                if best.is_undefined() {
                    uncalled.push(record.id.clone());
                } else {
                    let _ = sender.send(format!(
                        "{}\t{}\t{}\t{}",
                        record.id, best.function, best.function_index, best.score
                    ));
                }
            }
            Ok(uncalled)
        })
        .collect::<Result<Vec<Vec<String>>>>()?
        .into_iter()
        .flatten()
        .collect();

    writer.finish()?;

    let file = File::create(&args.uncalled_ids_file)
        .map_err(|e| SigmerError::io(&args.uncalled_ids_file, e))?;
    let mut out = BufWriter::new(file);
    for id in &uncalled_ids {
        writeln!(out, "{}", id).map_err(|e| SigmerError::io(&args.uncalled_ids_file, e))?;
    }
    out.flush()
        .map_err(|e| SigmerError::io(&args.uncalled_ids_file, e))?;
    log::info!("{} uncalled sequences", uncalled_ids.len());
    Ok(())
}
