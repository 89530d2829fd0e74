//! Memory-mapped reader over a built signature index.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use boomphf::Mphf;
use memmap2::Mmap;

use crate::common::Kmer;
use crate::error::{Result, SigmerError};
use crate::index::payload::{StoredKmerData, RECORD_SIZE};
use crate::index::writer::path_with_ext;

/// Read-only view of `<base>.mph` + `<base>.dat`.
///
/// The hash is held fully in memory; the payload array stays on disk behind
/// a shared read-only mapping, so any number of threads may call
/// [`MappedKmerDb::fetch`] without synchronization.
pub struct MappedKmerDb {
    mphf: Mphf<Kmer>,
    map: Mmap,
    hash_size: usize,
    base: PathBuf,
}

impl MappedKmerDb {
    /// True when both index files exist at `base`.
    pub fn exists(base: &Path) -> bool {
        path_with_ext(base, "mph").is_file() && path_with_ext(base, "dat").is_file()
    }

    pub fn open(base: &Path) -> Result<MappedKmerDb> {
        let mph_path = path_with_ext(base, "mph");
        let file = File::open(&mph_path).map_err(|e| SigmerError::io(&mph_path, e))?;
        let mphf: Mphf<Kmer> = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| SigmerError::IndexCorrupt(format!("{}: {}", mph_path.display(), e)))?;

        let dat_path = path_with_ext(base, "dat");
        let file = File::open(&dat_path).map_err(|e| SigmerError::io(&dat_path, e))?;
        let map = unsafe { Mmap::map(&file) }.map_err(|e| SigmerError::io(&dat_path, e))?;
        if map.len() % RECORD_SIZE != 0 {
            return Err(SigmerError::IndexCorrupt(format!(
                "{}: size {} is not a multiple of the record size",
                dat_path.display(),
                map.len()
            )));
        }
        let hash_size = map.len() / RECORD_SIZE;
        advise_prefetch(&map);

        log::debug!(
            "opened index {} with {} payload slots",
            base.display(),
            hash_size
        );
        Ok(MappedKmerDb {
            mphf,
            map,
            hash_size,
            base: base.to_path_buf(),
        })
    }

    pub fn hash_size(&self) -> usize {
        self.hash_size
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Resolve a k-mer to its payload with a single memory load.
    ///
    /// The perfect hash is defined only over the indexed key set: a foreign
    /// k-mer usually fails to hash, but may collide into a valid slot and
    /// return that slot's payload. Callers absorb such false matches with
    /// their chaining thresholds. All-zero slack slots read as no hit.
    #[inline]
    pub fn fetch(&self, kmer: &Kmer) -> Option<StoredKmerData> {
        let idx = self.mphf.try_hash(kmer)? as usize;
        if idx >= self.hash_size {
            return None;
        }
        let bytes = &self.map[idx * RECORD_SIZE..(idx + 1) * RECORD_SIZE];
        if bytes.iter().all(|&b| b == 0) {
            return None;
        }
        Some(StoredKmerData::from_bytes(bytes))
    }
}

/// Ask the OS to fault the payload mapping in ahead of the first scan.
#[cfg(unix)]
fn advise_prefetch(map: &Mmap) {
    let rc = unsafe {
        libc::madvise(
            map.as_ptr() as *mut libc::c_void,
            map.len(),
            libc::MADV_WILLNEED,
        )
    };
    if rc != 0 {
        log::warn!("madvise failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn advise_prefetch(_map: &Mmap) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::writer::write_index;

    fn kmer(s: &str) -> Kmer {
        s.as_bytes().try_into().unwrap()
    }

    #[test]
    fn open_fails_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("kmer_data");
        assert!(!MappedKmerDb::exists(&base));
        assert!(MappedKmerDb::open(&base).is_err());
    }

    #[test]
    fn truncated_dat_is_reported_as_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("kmer_data");
        let kept = vec![(
            kmer("AAAAAAAA"),
            StoredKmerData {
                avg_from_end: 1,
                function_index: 0,
                mean: 100,
                median: 100,
                var: 0,
            },
        )];
        write_index(&kept, &base).unwrap();

        // Chop a byte off the payload file.
        let dat = dir.path().join("kmer_data.dat");
        let bytes = std::fs::read(&dat).unwrap();
        std::fs::write(&dat, &bytes[..bytes.len() - 1]).unwrap();

        match MappedKmerDb::open(&base) {
            Err(SigmerError::IndexCorrupt(_)) => {}
            other => panic!("expected IndexCorrupt, got {:?}", other.map(|_| ())),
        }
    }
}
