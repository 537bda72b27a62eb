//! Concurrent content hashing
//!
//! ## Overview
//!
//! [`HashPool`] runs a fixed number of worker threads that share one input
//! channel of [`FileJob`]s and one output channel of hashed [`Node`]s. Output
//! order is whatever order the workers finish in; file nodes are leaves, so
//! the stream stays valid.
//!
//! A file that cannot be opened or read is logged and dropped. It will be
//! missing from the snapshot, the run goes on.
//!
//! Every byte read is reported to a [`ProgressSink`]. The sink is called on
//! the worker thread, so a slow sink slows hashing down. [`NoProgress`] is
//! always a valid choice.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hashsnap::hasher::{CancelToken, HashPool, NoProgress};
//! use hashsnap::walker::FileJob;
//! use hashsnap::types::Node;
//! use std::path::PathBuf;
//!
//! let (job_tx, job_rx) = crossbeam_channel::bounded(16);
//! let (node_tx, node_rx) = crossbeam_channel::bounded(16);
//!
//! job_tx.send(FileJob {
//!     node: Node::file(2, 1, "a.txt", 3),
//!     path: PathBuf::from("/data/a.txt"),
//! }).unwrap();
//! drop(job_tx);
//!
//! let stats = HashPool::new(4).run(job_rx, node_tx, &NoProgress, &CancelToken::new());
//! let hashed: Vec<Node> = node_rx.iter().collect();
//! assert_eq!(hashed.len() as u64, stats.hashed);
//! ```

use crate::error::Result;
use crate::types::{Digest, Node};
use crate::utils::HASH_BUFFER_SIZE;
use crate::walker::FileJob;
use crossbeam_channel::{Receiver, Sender};
use sha1::{Digest as _, Sha1};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace, warn};

/// Receives the number of bytes read by the hashers
pub trait ProgressSink: Send + Sync {
    /// Called after each chunk read from a file
    fn consumed(&self, bytes: u64);
}

/// Sink that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn consumed(&self, _bytes: u64) {}
}

/// Sink that only counts bytes
#[derive(Debug, Default)]
pub struct CountingProgress {
    bytes: AtomicU64,
}

impl CountingProgress {
    /// Create a counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes seen so far
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl ProgressSink for CountingProgress {
    fn consumed(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }
}

impl ProgressSink for indicatif::ProgressBar {
    fn consumed(&self, bytes: u64) {
        self.inc(bytes);
    }
}

/// Shared cancellation flag
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// SHA-1 of everything `reader` yields, with the number of bytes hashed
///
/// Each chunk is reported to `sink` as it is consumed.
pub fn hash_reader<R: Read>(mut reader: R, sink: &dyn ProgressSink) -> Result<(Digest, u64)> {
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buffer[..bytes_read]);
        total += bytes_read as u64;
        sink.consumed(bytes_read as u64);
    }

    Ok((Digest(hasher.finalize().into()), total))
}

/// SHA-1 of a file's content, with the number of bytes hashed
///
/// The length is what was actually read, which differs from an earlier
/// `lstat` if the file changed in between.
///
/// # Errors
///
/// [`crate::HashsnapError::Io`] if the file cannot be opened or read.
pub fn hash_file(path: &Path, sink: &dyn ProgressSink) -> Result<(Digest, u64)> {
    let file = File::open(path)?;
    hash_reader(file, sink)
}

/// Counters from one [`HashPool::run`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashStats {
    /// Files hashed and forwarded
    pub hashed: u64,
    /// Files dropped because they could not be read
    pub failed: u64,
    /// Sum of the sizes of forwarded files
    pub bytes: u64,
}

impl HashStats {
    fn merge(&mut self, other: HashStats) {
        self.hashed += other.hashed;
        self.failed += other.failed;
        self.bytes = self.bytes.saturating_add(other.bytes);
    }
}

/// Fixed size pool of hashing workers
#[derive(Debug, Clone, Copy)]
pub struct HashPool {
    workers: usize,
}

impl HashPool {
    /// Pool with `workers` threads, at least one
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Pool sized to the number of logical CPUs
    pub fn with_cpu_count() -> Self {
        Self::new(num_cpus::get())
    }

    /// Number of worker threads
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Hash every job from `jobs` and forward the nodes to `out`
    ///
    /// Blocks until `jobs` is closed and drained, `out` is disconnected, or
    /// `cancel` fires. On cancellation workers stop pulling work and results
    /// still in flight are dropped.
    ///
    /// # Arguments
    ///
    /// * `jobs` - Files to hash
    /// * `out` - Destination of hashed nodes
    /// * `sink` - Byte progress observer
    /// * `cancel` - Cooperative cancellation flag
    ///
    /// # Returns
    ///
    /// Aggregated counters of all workers.
    pub fn run(
        &self,
        jobs: Receiver<FileJob>,
        out: Sender<Node>,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> HashStats {
        debug!("Starting {} hash workers", self.workers);

        let mut stats = HashStats::default();
        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.workers)
                .map(|_| {
                    let jobs = &jobs;
                    let out = out.clone();
                    scope.spawn(move || worker_loop(jobs, out, sink, cancel))
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok(worker_stats) => stats.merge(worker_stats),
                    Err(_) => warn!("Hash worker panicked"),
                }
            }
        });

        debug!(
            "Hash workers done: {} hashed, {} failed",
            stats.hashed, stats.failed
        );
        stats
    }
}

fn worker_loop(
    jobs: &Receiver<FileJob>,
    out: Sender<Node>,
    sink: &dyn ProgressSink,
    cancel: &CancelToken,
) -> HashStats {
    let mut stats = HashStats::default();

    while !cancel.is_cancelled() {
        let Ok(FileJob { mut node, path }) = jobs.recv() else {
            break;
        };

        match hash_file(&path, sink) {
            Ok((_, 0)) => {
                warn!("Skipping {:?}: emptied while hashing", path);
                stats.failed += 1;
                continue;
            }
            Ok((digest, len)) => {
                if len != node.size {
                    warn!(
                        "{:?} changed while hashing: {} bytes listed, {} hashed",
                        path, node.size, len
                    );
                }
                node.hash = digest;
                node.size = len;
            }
            Err(e) => {
                warn!("Cannot hash {:?}: {}", path, e);
                stats.failed += 1;
                continue;
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        trace!("Hashed {}", node);
        stats.hashed += 1;
        stats.bytes += node.size;
        if out.send(node).is_err() {
            break;
        }
    }

    stats
}
