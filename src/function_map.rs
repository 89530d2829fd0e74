//! Function assignment bookkeeping for the signature builder.
//!
//! Tracks id → function assignments from curated tab files and fasta
//! deflines, records which genomes each function occurs in, and after
//! qualification assigns dense [`FunctionIndex`] values to the kept
//! functions.
//!
//! Entries are created during single-threaded ingestion, mutated only
//! during ingestion and qualification, and frozen before extraction
//! begins.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::common::{FunctionIndex, UNDEFINED_FUNCTION};
use crate::error::{Result, SigmerError};
use crate::fasta::{ErrorAction, FastaParser};
use crate::funcutil;

pub const HYPOTHETICAL: &str = "hypothetical protein";

#[derive(Default)]
pub struct FunctionMap {
    /// function → genomes it occurs in; drives qualification.
    function_genome_map: BTreeMap<String, BTreeSet<String>>,
    /// protein id → assigned function (comment-stripped).
    id_function_map: FxHashMap<String, String>,
    function_index_map: FxHashMap<String, FunctionIndex>,
    index_function_map: Vec<String>,

    good_roles: FxHashSet<String>,
    good_functions: FxHashSet<String>,

    /// Raw assignment text per id, kept for downstream recall reporting.
    original_assignment: FxHashMap<String, (String, String)>,
}

impl FunctionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_good_functions<I: IntoIterator<Item = String>>(&mut self, funcs: I) {
        self.good_functions.extend(funcs);
    }

    pub fn add_good_roles<I: IntoIterator<Item = String>>(&mut self, roles: I) {
        self.good_roles.extend(roles);
    }

    /// Load tab-delimited `id <TAB> function` assignments. Any third column
    /// is ignored. An assignment whose `#` comment marks the protein as
    /// truncated is remembered but not applied.
    pub fn load_id_assignments(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path).map_err(|e| SigmerError::io(path, e))?;
        let reader = BufReader::new(file);
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| SigmerError::io(path, e))?;
            let Some((id, rest)) = line.split_once('\t') else {
                log::warn!("bad line {} in file {}", lineno + 1, path.display());
                continue;
            };
            let func = match rest.split_once('\t') {
                Some((f, _)) => f,
                None => rest,
            };

            let (stripped, sep, comment) = funcutil::split_func_comment(func);
            self.original_assignment
                .insert(id.to_string(), (func.to_string(), stripped.clone()));
            if sep == "#" && funcutil::is_truncated_comment(&comment) {
                continue;
            }
            self.id_function_map.insert(id.to_string(), stripped);
        }
        Ok(())
    }

    /// Load assignments and genome occurrence data from a protein fasta
    /// file. A defline may carry a function annotation and a bracketed
    /// `[genome]` trailer; earlier tab-file assignments override fasta
    /// annotations for the same id.
    ///
    /// The file's genome is taken from the first defline trailer, else a
    /// `fig|` id, else the file name.
    pub fn load_fasta_file(
        &mut self,
        path: &Path,
        keep_function_flag: bool,
        deleted_fids: &FxHashSet<String>,
    ) -> Result<()> {
        let file = File::open(path).map_err(|e| SigmerError::io(path, e))?;

        let mut genome = String::new();
        let mut pending: Vec<(String, Option<String>)> = Vec::new();

        FastaParser::new().parse(
            file,
            |record| {
                if record.id.is_empty() || deleted_fids.contains(&record.id) {
                    return;
                }

                let def = record.def.trim();
                let mut func = if def.is_empty() {
                    String::new()
                } else {
                    def.to_string()
                };
                let mut genome_loc = String::new();
                if let Some((head, g)) = funcutil::split_genome_trailer(def) {
                    let (stripped, sep, comment) = funcutil::split_func_comment(head);
                    if sep == "#" && funcutil::is_truncated_comment(&comment) {
                        return;
                    }
                    func = stripped;
                    genome_loc = g.to_string();
                }

                // The genome is settled by the first record that names one.
                if genome.is_empty() {
                    if def.is_empty() {
                        if let Some(g) = funcutil::genome_of_fig_id(&record.id) {
                            genome = g.to_string();
                        }
                    } else if !genome_loc.is_empty() {
                        genome = genome_loc;
                    }
                }
                if genome.is_empty() {
                    genome = path
                        .file_name()
                        .map(|f| f.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    if !funcutil::looks_like_genome_id(&genome) {
                        log::warn!("cannot determine genome from file {}", path.display());
                    }
                }

                pending.push((record.id, if func.is_empty() { None } else { Some(func) }));
            },
            |_, _, _| ErrorAction::Continue,
        )?;

        // Apply assignments after parsing so the borrow of `self` inside
        // the record callback stays read-only.
        for (id, func) in pending {
            let func = match self.id_function_map.get(&id) {
                Some(existing) => existing.clone(),
                None => match func {
                    Some(f) => {
                        self.id_function_map.insert(id.clone(), f.clone());
                        f
                    }
                    None => continue,
                },
            };
            self.function_genome_map
                .entry(func.clone())
                .or_default()
                .insert(genome.clone());
            if keep_function_flag {
                self.good_functions.insert(func);
            }
        }
        Ok(())
    }

    /// Qualify functions and assign dense indices.
    ///
    /// A function is kept iff it occurs in at least `min_reps_required`
    /// distinct genomes, is listed in the good-functions set, or has a role
    /// in the good-roles set. "hypothetical protein" is always kept. Kept
    /// functions are numbered from 0 in ascending string order.
    pub fn process_kept_functions(&mut self, min_reps_required: usize) -> Result<usize> {
        let mut kept: BTreeSet<String> = BTreeSet::new();
        for (function, genomes) in &self.function_genome_map {
            let ok = genomes.len() >= min_reps_required
                || self.good_functions.contains(function)
                || funcutil::roles_of_function(function)
                    .iter()
                    .any(|role| self.good_roles.contains(role));
            if ok {
                kept.insert(function.clone());
            }
        }
        kept.insert(HYPOTHETICAL.to_string());

        if kept.len() > UNDEFINED_FUNCTION as usize {
            return Err(SigmerError::Config(format!(
                "{} kept functions exceed the function index space",
                kept.len()
            )));
        }

        self.function_index_map.clear();
        self.index_function_map.clear();
        for (next, function) in kept.into_iter().enumerate() {
            self.function_index_map
                .insert(function.clone(), next as FunctionIndex);
            self.index_function_map.push(function);
        }
        log::info!("kept {} functions", self.index_function_map.len());
        Ok(self.index_function_map.len())
    }

    pub fn lookup_function_of_id(&self, id: &str) -> Option<&str> {
        self.id_function_map.get(id).map(String::as_str)
    }

    pub fn lookup_index(&self, function: &str) -> FunctionIndex {
        self.function_index_map
            .get(function)
            .copied()
            .unwrap_or(UNDEFINED_FUNCTION)
    }

    pub fn lookup_function(&self, index: FunctionIndex) -> Option<&str> {
        self.index_function_map.get(index as usize).map(String::as_str)
    }

    /// Raw and comment-stripped original assignment for an id, if any.
    pub fn lookup_original_assignment(&self, id: &str) -> Option<(&str, &str)> {
        self.original_assignment
            .get(id)
            .map(|(raw, stripped)| (raw.as_str(), stripped.as_str()))
    }

    pub fn n_kept_functions(&self) -> usize {
        self.index_function_map.len()
    }

    /// Write the `function.index` file: `<index>\t<function>` per line,
    /// ascending and contiguous from 0.
    pub fn write_function_index(&self, dir: &Path) -> Result<()> {
        let path = dir.join("function.index");
        let file = File::create(&path).map_err(|e| SigmerError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        for (index, function) in self.index_function_map.iter().enumerate() {
            writeln!(writer, "{}\t{}", index, function).map_err(|e| SigmerError::io(&path, e))?;
        }
        writer.flush().map_err(|e| SigmerError::io(&path, e))?;
        Ok(())
    }
}

/// Read a `function.index` file back into an index-ordered list, validating
/// that indices are contiguous from 0.
pub fn read_function_index(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).map_err(|e| SigmerError::io(path, e))?;
    let reader = BufReader::new(file);
    let mut functions = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| SigmerError::io(path, e))?;
        if line.is_empty() {
            continue;
        }
        let Some((index, function)) = line.split_once('\t') else {
            return Err(SigmerError::Config(format!(
                "{}: malformed line {}",
                path.display(),
                lineno + 1
            )));
        };
        let index: usize = index.parse().map_err(|_| {
            SigmerError::Config(format!("{}: bad index on line {}", path.display(), lineno + 1))
        })?;
        if index != functions.len() {
            return Err(SigmerError::Config(format!(
                "{}: index {} out of order on line {}",
                path.display(),
                index,
                lineno + 1
            )));
        }
        functions.push(function.to_string());
    }
    Ok(functions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn tab_assignments_strip_comments_and_reject_truncations() {
        let f = write_temp(
            "fig|1.1.peg.1\tAlpha kinase # putative\n\
             fig|1.1.peg.2\tBeta kinase # truncated\n\
             fig|1.1.peg.3\tGamma kinase\textra column\n",
        );
        let mut fm = FunctionMap::new();
        fm.load_id_assignments(f.path()).unwrap();
        assert_eq!(fm.lookup_function_of_id("fig|1.1.peg.1"), Some("Alpha kinase"));
        assert_eq!(fm.lookup_function_of_id("fig|1.1.peg.2"), None);
        assert_eq!(fm.lookup_function_of_id("fig|1.1.peg.3"), Some("Gamma kinase"));
        // Truncated assignment still remembered verbatim.
        let (raw, stripped) = fm.lookup_original_assignment("fig|1.1.peg.2").unwrap();
        assert_eq!(raw, "Beta kinase # truncated");
        assert_eq!(stripped, "Beta kinase");
    }

    #[test]
    fn fasta_defline_assignments_and_genome_from_trailer() {
        let f = write_temp(
            ">p1 Alpha kinase [83333.1]\nMKVLYT\n\
             >p2 Beta kinase [83333.1]\nMKVLYT\n",
        );
        let mut fm = FunctionMap::new();
        fm.load_fasta_file(f.path(), false, &FxHashSet::default()).unwrap();
        assert_eq!(fm.lookup_function_of_id("p1"), Some("Alpha kinase"));
        assert_eq!(
            fm.function_genome_map.get("Alpha kinase").unwrap().len(),
            1
        );
    }

    #[test]
    fn earlier_tab_assignment_overrides_fasta() {
        let tabs = write_temp("p1\tCurated function\n");
        let fasta = write_temp(">p1 Fasta function [83333.1]\nMKVLYT\n");
        let mut fm = FunctionMap::new();
        fm.load_id_assignments(tabs.path()).unwrap();
        fm.load_fasta_file(fasta.path(), false, &FxHashSet::default())
            .unwrap();
        assert_eq!(fm.lookup_function_of_id("p1"), Some("Curated function"));
        // Genome occurrence is charged to the curated function.
        assert!(fm.function_genome_map.contains_key("Curated function"));
    }

    #[test]
    fn genome_falls_back_to_fig_id() {
        let f = write_temp(">fig|99287.12.peg.1\nMKVLYT\n");
        let tabs = write_temp("fig|99287.12.peg.1\tSome function\n");
        let mut fm = FunctionMap::new();
        fm.load_id_assignments(tabs.path()).unwrap();
        fm.load_fasta_file(f.path(), false, &FxHashSet::default()).unwrap();
        let genomes = fm.function_genome_map.get("Some function").unwrap();
        assert!(genomes.contains("99287.12"));
    }

    #[test]
    fn qualification_rules() {
        let mut fm = FunctionMap::new();
        for g in ["1.1", "2.2", "3.3"] {
            fm.function_genome_map
                .entry("Common function".to_string())
                .or_default()
                .insert(g.to_string());
        }
        fm.function_genome_map
            .entry("Rare function".to_string())
            .or_default()
            .insert("1.1".to_string());
        fm.function_genome_map
            .entry("Listed function".to_string())
            .or_default()
            .insert("1.1".to_string());
        fm.function_genome_map
            .entry("Role carrier / Good role".to_string())
            .or_default()
            .insert("1.1".to_string());

        fm.add_good_functions(["Listed function".to_string()]);
        fm.add_good_roles(["Good role".to_string()]);
        fm.process_kept_functions(3).unwrap();

        assert_ne!(fm.lookup_index("Common function"), UNDEFINED_FUNCTION);
        assert_eq!(fm.lookup_index("Rare function"), UNDEFINED_FUNCTION);
        assert_ne!(fm.lookup_index("Listed function"), UNDEFINED_FUNCTION);
        assert_ne!(fm.lookup_index("Role carrier / Good role"), UNDEFINED_FUNCTION);
        assert_ne!(fm.lookup_index(HYPOTHETICAL), UNDEFINED_FUNCTION);
    }

    #[test]
    fn indices_are_dense_and_sorted() {
        let mut fm = FunctionMap::new();
        for f in ["zeta", "alpha", "midline"] {
            fm.function_genome_map
                .entry(f.to_string())
                .or_default()
                .insert("1.1".to_string());
        }
        fm.process_kept_functions(1).unwrap();
        // Sorted: alpha, hypothetical protein, midline, zeta
        assert_eq!(fm.lookup_function(0), Some("alpha"));
        assert_eq!(fm.lookup_function(1), Some(HYPOTHETICAL));
        assert_eq!(fm.lookup_function(2), Some("midline"));
        assert_eq!(fm.lookup_function(3), Some("zeta"));
    }

    #[test]
    fn function_index_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut fm = FunctionMap::new();
        fm.function_genome_map
            .entry("Alpha".to_string())
            .or_default()
            .insert("1.1".to_string());
        fm.process_kept_functions(1).unwrap();
        fm.write_function_index(dir.path()).unwrap();

        let loaded = read_function_index(&dir.path().join("function.index")).unwrap();
        assert_eq!(loaded, vec!["Alpha".to_string(), HYPOTHETICAL.to_string()]);
    }
}
