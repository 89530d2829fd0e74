//! On-disk signature index: a minimal perfect hash over the kept k-mer set
//! (`<base>.mph`) plus a parallel array of fixed-size payload records
//! (`<base>.dat`), memory-mapped for lock-free concurrent reads.

pub mod payload;
pub mod reader;
pub mod writer;

use std::fs::OpenOptions;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SigmerError};

pub use payload::{StoredKmerData, RECORD_SIZE};
pub use reader::MappedKmerDb;
pub use writer::write_index;

/// File stem of the index inside a kmer data directory.
pub const INDEX_BASE: &str = "kmer_data";

/// Build parameters dumped next to the index so readers can verify they
/// agree with how the database was constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub kmer_size: usize,
    pub min_reps_required: usize,
    pub n_functions: usize,
    pub n_kmers: usize,
    pub hash_size: usize,
}

impl IndexManifest {
    pub fn dump_json(&self, dir: &Path) -> Result<()> {
        let path = dir.join("parameters.json");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| SigmerError::io(&path, e))?;
        serde_json::to_writer(BufWriter::new(file), self)
            .map_err(|e| SigmerError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    pub fn reload_json(dir: &Path) -> Result<IndexManifest> {
        let path = dir.join("parameters.json");
        let file = std::fs::File::open(&path).map_err(|e| SigmerError::io(&path, e))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| SigmerError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Reject an index built with a different k-mer size. Missing manifests
    /// (older builds) pass silently.
    pub fn verify_compatible(dir: &Path) -> Result<()> {
        let path = dir.join("parameters.json");
        if !path.is_file() {
            return Ok(());
        }
        let manifest = Self::reload_json(dir)?;
        if manifest.kmer_size != crate::common::KMER_SIZE {
            return Err(SigmerError::Config(format!(
                "index at {} was built with kmer size {}",
                dir.display(),
                manifest.kmer_size
            )));
        }
        Ok(())
    }
}
