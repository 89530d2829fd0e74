//! Attribute extraction: the parallel pass that turns training fasta files
//! into the k-mer → attribute multimap consumed by the selector.

use std::fs::File;
use std::path::PathBuf;

use dashmap::DashMap;
use indicatif::ProgressBar;
use rayon::prelude::*;
use rustc_hash::{FxBuildHasher, FxHashSet};

use crate::common::{Kmer, KmerAttributes, UNDEFINED_FUNCTION, UNDEFINED_OTU};
use crate::error::{Result, SigmerError};
use crate::fasta::{ErrorAction, FastaParser};
use crate::function_map::FunctionMap;
use crate::kmer::for_each_kmer;
use crate::seq_id_map::SeqIdMap;

/// Multimap from a k-mer to every attribute record collected for it.
/// Insert-only during extraction; drained once by the selector.
pub type KmerAttributeMap = DashMap<Kmer, Vec<KmerAttributes>, FxBuildHasher>;

/// Scan every fasta file (one task per file) and collect one attribute
/// record per valid k-mer of every sequence whose id maps to a kept
/// function.
pub fn extract_kmers(
    files: &[PathBuf],
    fm: &FunctionMap,
    idmap: &SeqIdMap,
    deleted_fids: &FxHashSet<String>,
    progress: &ProgressBar,
) -> Result<KmerAttributeMap> {
    let attributes: KmerAttributeMap = DashMap::default();

    files.par_iter().try_for_each(|path| -> Result<()> {
        let file = File::open(path).map_err(|e| SigmerError::io(path, e))?;
        FastaParser::new().parse(
            file,
            |record| {
                extract_from_sequence(&record.id, record.seq.as_bytes(), fm, idmap, deleted_fids, &attributes);
            },
            |_, _, _| ErrorAction::Continue,
        )?;
        progress.inc(1);
        Ok(())
    })?;

    Ok(attributes)
}

fn extract_from_sequence(
    id: &str,
    seq: &[u8],
    fm: &FunctionMap,
    idmap: &SeqIdMap,
    deleted_fids: &FxHashSet<String>,
    attributes: &KmerAttributeMap,
) {
    if id.is_empty() || deleted_fids.contains(id) {
        return;
    }
    let Some(function) = fm.lookup_function_of_id(id) else {
        return;
    };
    let func_index = fm.lookup_index(function);
    if func_index == UNDEFINED_FUNCTION {
        return;
    }

    let protein_length = seq.len() as u32;
    let seq_id = idmap.lookup_id(id);
    for_each_kmer(seq, |kmer, pos| {
        let offset = (seq.len() - pos).min(u16::MAX as usize) as u16;
        attributes.entry(kmer).or_default().push(KmerAttributes {
            func_index,
            otu_index: UNDEFINED_OTU,
            offset,
            seq_id,
            protein_length,
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::KMER_SIZE;

    fn kmer(s: &str) -> Kmer {
        s.as_bytes().try_into().unwrap()
    }

    fn fixture_map() -> FunctionMap {
        let mut fm = FunctionMap::new();
        let dir = tempfile::tempdir().unwrap();
        let tabs = dir.path().join("defs");
        std::fs::write(&tabs, "p1\tAlpha kinase\np2\tBeta kinase\n").unwrap();
        fm.load_id_assignments(&tabs).unwrap();
        let fasta = dir.path().join("1.1.fa");
        std::fs::write(&fasta, ">p1\nMKVLYT\n>p2\nMKVLYT\n").unwrap();
        fm.load_fasta_file(&fasta, false, &FxHashSet::default()).unwrap();
        fm.process_kept_functions(1).unwrap();
        fm
    }

    #[test]
    fn offsets_measure_distance_from_the_end() {
        let fm = fixture_map();
        let idmap = SeqIdMap::new();
        let attributes: KmerAttributeMap = DashMap::default();
        // 10 residues: windows at 0, 1, 2.
        extract_from_sequence(
            "p1",
            b"ABCDEFGHIJ",
            &fm,
            &idmap,
            &FxHashSet::default(),
            &attributes,
        );
        assert_eq!(attributes.len(), 3);
        let recs = attributes.get(&kmer("ABCDEFGH")).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].offset, 10);
        assert_eq!(recs[0].protein_length, 10);
        drop(recs);

        let last = attributes.get(&kmer("CDEFGHIJ")).unwrap();
        assert_eq!(last[0].offset, 8);
        // offset_from_end = L - p, and p <= L - K.
        assert!(last[0].offset as usize >= KMER_SIZE);
    }

    #[test]
    fn sequences_without_kept_function_are_skipped() {
        let fm = fixture_map();
        let idmap = SeqIdMap::new();
        let attributes: KmerAttributeMap = DashMap::default();
        extract_from_sequence(
            "unknown",
            b"ABCDEFGHIJ",
            &fm,
            &idmap,
            &FxHashSet::default(),
            &attributes,
        );
        assert!(attributes.is_empty());
        assert!(idmap.is_empty());
    }

    #[test]
    fn deleted_ids_are_skipped() {
        let fm = fixture_map();
        let idmap = SeqIdMap::new();
        let attributes: KmerAttributeMap = DashMap::default();
        let mut deleted = FxHashSet::default();
        deleted.insert("p1".to_string());
        extract_from_sequence("p1", b"ABCDEFGHIJ", &fm, &idmap, &deleted, &attributes);
        assert!(attributes.is_empty());
    }
}
