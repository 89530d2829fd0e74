pub mod build;
pub mod call;
pub mod common;
pub mod distance;
pub mod error;
pub mod fasta;
pub mod funcutil;
pub mod function_map;
pub mod index;
pub mod kmer;
pub mod output;
pub mod seq_id_map;
pub mod stats;

/// Size the global rayon pool once per process; later calls are no-ops.
/// `n_threads == 0` means all cores.
pub fn init_thread_pool(n_threads: usize) {
    let n = if n_threads == 0 {
        num_cpus::get()
    } else {
        n_threads
    };
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(n)
        .build_global()
    {
        log::debug!("thread pool already initialized: {}", e);
    }
}
