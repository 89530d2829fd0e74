//! Builds the on-disk index from the kept k-mer set.
//!
//! `<base>.mph` holds the serialized minimal perfect hash over the k-mer
//! byte strings; `<base>.dat` holds `hash_size` packed payload records,
//! record `i` belonging to the k-mer hashing to `i`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use boomphf::Mphf;

use crate::common::Kmer;
use crate::error::{Result, SigmerError};
use crate::index::payload::{StoredKmerData, RECORD_SIZE};

/// Load factor handed to the MPH construction; the conventional
/// space/speed trade-off for large key sets.
const MPH_GAMMA: f64 = 1.7;

/// Write `<base>.mph` and `<base>.dat` for the kept k-mers.
///
/// Returns the hash size (number of payload slots).
pub fn write_index(kept: &[(Kmer, StoredKmerData)], base: &Path) -> Result<usize> {
    if kept.is_empty() {
        return Err(SigmerError::Config(
            "no signature kmers were kept; refusing to write an empty index".to_string(),
        ));
    }
    let keys: Vec<Kmer> = kept.iter().map(|(k, _)| *k).collect();
    let mphf = Mphf::new(MPH_GAMMA, &keys);
    let hash_size = keys.len();

    let mut data = vec![0u8; hash_size * RECORD_SIZE];
    for (kmer, stored) in kept {
        let idx = mphf.hash(kmer) as usize;
        debug_assert!(idx < hash_size);
        data[idx * RECORD_SIZE..(idx + 1) * RECORD_SIZE].copy_from_slice(&stored.to_bytes());
    }

    let mph_path = path_with_ext(base, "mph");
    let file = File::create(&mph_path).map_err(|e| SigmerError::io(&mph_path, e))?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, &mphf)
        .map_err(|e| SigmerError::IndexCorrupt(format!("cannot serialize hash: {}", e)))?;
    writer.flush().map_err(|e| SigmerError::io(&mph_path, e))?;

    let dat_path = path_with_ext(base, "dat");
    let file = File::create(&dat_path).map_err(|e| SigmerError::io(&dat_path, e))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&data).map_err(|e| SigmerError::io(&dat_path, e))?;
    writer.flush().map_err(|e| SigmerError::io(&dat_path, e))?;

    log::info!(
        "wrote {} payload records to {}",
        hash_size,
        dat_path.display()
    );
    Ok(hash_size)
}

pub(crate) fn path_with_ext(base: &Path, ext: &str) -> PathBuf {
    let mut os = base.as_os_str().to_owned();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}
