//! Bounded worker pool with one exclusive cache home per worker thread.

use crate::ensure_dir;
use crate::error::{Result, SourceCheckError};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::path::{Path, PathBuf};
use tracing::info;

/// Fixed set of worker threads, each owning one cache home for the pool's lifetime.
///
/// Rayon runs at most one task closure per thread at a time, so keying the
/// cache home by thread index gives every concurrently active task a
/// directory no other running task can touch.
pub struct WorkerPool {
    pool: ThreadPool,
    cache_homes: Vec<PathBuf>,
}

impl WorkerPool {
    pub fn new(size: usize, cache_root: &Path) -> Result<Self> {
        let size = size.max(1);
        let mut cache_homes = Vec::with_capacity(size);
        for index in 0..size {
            let home = cache_root.join(format!("worker-{}", index));
            ensure_dir(&home).map_err(|e| SourceCheckError::io(&home, e))?;
            cache_homes.push(home);
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|index| format!("srcfetch-worker-{}", index))
            .build()
            .map_err(|e| {
                SourceCheckError::WorkerPool(format!("failed to build worker pool: {}", e))
            })?;
        info!(workers = size, cache_root = %cache_root.display(), "worker pool ready");
        Ok(Self { pool, cache_homes })
    }

    pub fn size(&self) -> usize {
        self.cache_homes.len()
    }

    pub fn cache_homes(&self) -> &[PathBuf] {
        &self.cache_homes
    }

    /// Apply `job` to every item, returning results in input order.
    ///
    /// Blocks until every item has been processed.
    pub fn run<T, R, F>(&self, items: &[T], job: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T, &Path) -> R + Sync,
    {
        let homes = &self.cache_homes;
        self.pool.install(|| {
            items
                .par_iter()
                .with_max_len(1)
                .map(|item| {
                    let index = rayon::current_thread_index().unwrap_or(0);
                    job(item, &homes[index % homes.len()])
                })
                .collect()
        })
    }
}
