//! The `call-functions` subcommand and the [`FunctionCaller`] engine it
//! shares with the distance matrix.

pub mod annotate;
pub mod chain;
pub mod resolve;

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use rayon::prelude::*;

use crate::common::{FunctionIndex, Kmer, KmerCall, UNDEFINED_FUNCTION};
use crate::error::SigmerError;
use crate::fasta::read_fasta;
use crate::function_map::{read_function_index, HYPOTHETICAL};
use crate::index::{IndexManifest, MappedKmerDb, StoredKmerData, INDEX_BASE};
use crate::kmer::KmerWindows;
use crate::output::OutputWriter;

use chain::{ChainConfig, HitChainer};
use resolve::{find_best_call, BestCall};

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Kmer data directory produced by build-signatures
    #[arg(long = "data-dir", short = 'd')]
    pub data_dir: PathBuf,
    /// Input fasta files
    #[arg(long = "input-files", short = 'i', num_args = 1.., required = true)]
    pub input_files: Vec<PathBuf>,
    /// Output file (stdout when omitted)
    #[arg(long = "output-file", short = 'o')]
    pub output_file: Option<PathBuf>,
    /// Drop hits against "hypothetical protein"
    #[arg(long = "ignore-hypo", default_value_t = false)]
    pub ignore_hypo: bool,
    /// Also emit one line per index hit
    #[arg(long = "debug-hits", default_value_t = false)]
    pub debug_hits: bool,
    /// Worker threads (0 = all cores)
    #[arg(long = "n-threads", short = 'j', default_value_t = 0)]
    pub n_threads: usize,
}

/// Scans query sequences against a mapped index and resolves best calls.
pub struct FunctionCaller<'db> {
    db: &'db MappedKmerDb,
    functions: Vec<String>,
    config: ChainConfig,
}

impl<'db> FunctionCaller<'db> {
    pub fn new(db: &'db MappedKmerDb, function_index_file: &Path) -> crate::error::Result<Self> {
        Self::with_config(db, function_index_file, ChainConfig::default(), false)
    }

    pub fn with_config(
        db: &'db MappedKmerDb,
        function_index_file: &Path,
        mut config: ChainConfig,
        ignore_hypothetical: bool,
    ) -> crate::error::Result<Self> {
        let functions = read_function_index(function_index_file)?;
        if ignore_hypothetical {
            let hypo = functions.iter().position(|f| f == HYPOTHETICAL).ok_or_else(|| {
                SigmerError::Config(format!(
                    "'{}' missing from {}",
                    HYPOTHETICAL,
                    function_index_file.display()
                ))
            })?;
            config.ignore_function = Some(hypo as FunctionIndex);
        }
        Ok(FunctionCaller {
            db,
            functions,
            config,
        })
    }

    /// Function string for an index; empty for Undefined.
    pub fn function_at(&self, index: FunctionIndex) -> &str {
        if index == UNDEFINED_FUNCTION {
            ""
        } else {
            self.functions
                .get(index as usize)
                .map(String::as_str)
                .unwrap_or("")
        }
    }

    pub fn n_functions(&self) -> usize {
        self.functions.len()
    }

    /// Scan one amino-acid sequence, reporting every index hit to `hit_cb`
    /// and returning the chained call regions.
    pub fn process_aa_seq<F>(&self, seq: &[u8], mut hit_cb: F) -> Vec<KmerCall>
    where
        F: FnMut(&Kmer, usize, &StoredKmerData),
    {
        let mut chainer = HitChainer::new(self.config, seq.len() as u32);
        for (kmer, pos) in KmerWindows::new(seq) {
            if let Some(data) = self.db.fetch(&kmer) {
                hit_cb(&kmer, pos, &data);
                chainer.add_hit(pos as u32, data);
            }
        }
        chainer.finish()
    }

    /// Scan and resolve in one step.
    pub fn call_sequence(&self, seq: &[u8]) -> (BestCall, Vec<KmerCall>) {
        let calls = self.process_aa_seq(seq, |_, _, _| {});
        let best = find_best_call(&calls, |idx| self.function_at(idx));
        (best, calls)
    }
}

pub fn run(args: CallArgs) -> Result<()> {
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
        args.ignore_hypo,
    )?;

    let writer = OutputWriter::create(args.output_file.as_deref())?;
    let sender = writer.sender();

    for input_path in &args.input_files {
        log::info!("calling {}", input_path.display());
        let file = File::open(input_path)
            .with_context(|| format!("opening {}", input_path.display()))?;
        let records = read_fasta(file)?;

        records.par_iter().for_each(|record| {
            if record.id.is_empty() || record.seq.is_empty() {
                return;
            }
            let calls = if args.debug_hits {
                caller.process_aa_seq(record.seq.as_bytes(), |kmer, _pos, data| {
                    let _ = sender.send(format!(
                        "{}\t{}\t{}\t{}\t{}\t{}",
                        crate::common::kmer_to_string(kmer),
                        caller.function_at(data.function_index),
                        data.median,
                        data.mean,
                        data.var,
                        (data.var as f64).sqrt()
                    ));
                })
            } else {
                caller.process_aa_seq(record.seq.as_bytes(), |_, _, _| {})
            };
            let best = find_best_call(&calls, |idx| caller.function_at(idx));
            let line = format!(
                "{}\t{}\t{}\t{}\t{}",
                record.id,
                best.function,
                best.function_index,
                best.score,
                record.seq.len()
            );
            // A send failure means the writer died; its error surfaces in
            // finish().
            let _ = sender.send(line);
        });
    }

    writer.finish()?;
    Ok(())
}
