//! Adaptive multi-track batch runner (spec §5, §6): analyzes many files on
//! a worker pool sized to the queue, with a per-file timeout and a
//! progress callback, following the same cooperative-shutdown shape as
//! the original pipeline's signal handler (SPEC_FULL §E).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use log::warn;
use rayon::prelude::*;

use crate::analyzer::Analyzer;
use crate::config::adaptive_batch_workers;
use crate::errors::{AnalysisError, ErrorRecord};
use crate::model::AnalysisResult as Result_;

/// Emitted once per file as it starts, mirroring the original's
/// `{type: progress, current, total, file}` record.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub current: usize,
    pub total: usize,
    pub file: String,
}

pub struct BatchItemResult {
    pub path: PathBuf,
    pub outcome: Result<Result_, ErrorRecord>,
}

pub struct BatchReport {
    pub results: Vec<BatchItemResult>,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Runs `paths` through `analyzer`, cooperatively stoppable via
/// [`BatchRunner::request_interrupt`]. Never panics: a single file's
/// decode/analysis failure becomes one `ErrorRecord`, not an aborted batch.
#[derive(Default)]
pub struct BatchRunner {
    interrupted: AtomicBool,
}

impl BatchRunner {
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a graceful stop; files not yet started return
    /// [`AnalysisError::Interrupted`] instead of running.
    #[inline]
    pub fn request_interrupt(&self) {
        self.interrupted.store(true, Ordering::Relaxed);
    }

    #[must_use]
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn run(
        &self,
        analyzer: &Analyzer,
        paths: &[PathBuf],
        timeout: Duration,
        on_progress: impl Fn(BatchProgress) + Sync,
    ) -> BatchReport {
        let total = paths.len();
        let worker_count = adaptive_batch_workers(total);
        let counter = AtomicUsize::new(0);

        let pool = match rayon::ThreadPoolBuilder::new().num_threads(worker_count).build() {
            Ok(pool) => pool,
            Err(e) => {
                warn!("failed to build batch worker pool, falling back to the global pool: {e}");
                return self.run_sequential(analyzer, paths, timeout, &on_progress);
            }
        };

        let results: Vec<BatchItemResult> = pool.install(|| {
            paths
                .par_iter()
                .map(|path| self.analyze_one(analyzer, path, total, &counter, timeout, &on_progress))
                .collect()
        });

        self.summarize(results)
    }

    fn run_sequential(
        &self,
        analyzer: &Analyzer,
        paths: &[PathBuf],
        timeout: Duration,
        on_progress: &(impl Fn(BatchProgress) + Sync),
    ) -> BatchReport {
        let total = paths.len();
        let counter = AtomicUsize::new(0);
        let results: Vec<BatchItemResult> = paths
            .iter()
            .map(|path| self.analyze_one(analyzer, path, total, &counter, timeout, on_progress))
            .collect();
        self.summarize(results)
    }

    fn analyze_one(
        &self,
        analyzer: &Analyzer,
        path: &Path,
        total: usize,
        counter: &AtomicUsize,
        timeout: Duration,
        on_progress: &(impl Fn(BatchProgress) + Sync),
    ) -> BatchItemResult {
        if self.is_interrupted() {
            return BatchItemResult {
                path: path.to_path_buf(),
                outcome: Err((&AnalysisError::Interrupted(130)).into()),
            };
        }

        let current = counter.fetch_add(1, Ordering::Relaxed) + 1;
        on_progress(BatchProgress {
            current,
            total,
            file: path.display().to_string(),
        });

        let outcome = analyze_with_timeout(analyzer, path, timeout);
        BatchItemResult {
            path: path.to_path_buf(),
            outcome,
        }
    }

    fn summarize(&self, results: Vec<BatchItemResult>) -> BatchReport {
        let total = results.len();
        let successful = results.iter().filter(|r| r.outcome.is_ok()).count();
        let failed = total - successful;
        BatchReport {
            results,
            total,
            successful,
            failed,
        }
    }
}

/// Runs one analysis on a scoped worker thread and races it against
/// `timeout`, matching spec §5's per-file timeout (default 300s, spec §6
/// `batch_timeout_secs`).
fn analyze_with_timeout(analyzer: &Analyzer, path: &Path, timeout: Duration) -> Result<Result_, ErrorRecord> {
    let (tx, rx) = mpsc::channel();
    std::thread::scope(|scope| {
        scope.spawn(|| {
            let outcome = analyzer.analyze(path);
            let _ = tx.send(outcome);
        });
        match rx.recv_timeout(timeout) {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(ErrorRecord::from(&e)),
            Err(mpsc::RecvTimeoutError::Timeout | mpsc::RecvTimeoutError::Disconnected) => {
                Err(ErrorRecord::from(&AnalysisError::AnalysisTimeout(path.display().to_string())))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_short_circuits_unstarted_files() {
        let runner = BatchRunner::new();
        runner.request_interrupt();
        assert!(runner.is_interrupted());
    }

    #[test]
    fn summarize_counts_successes_and_failures() {
        let runner = BatchRunner::new();
        let results = vec![
            BatchItemResult {
                path: PathBuf::from("a.mp3"),
                outcome: Err(ErrorRecord {
                    error: "DECODE_FAILURE",
                    message: "bad file".to_string(),
                }),
            },
        ];
        let report = runner.summarize(results);
        assert_eq!(report.total, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.successful, 0);
    }
}
