//! Runtime configuration, following the same `config`-crate-plus-TOML
//! pattern as the teacher daemon's `DaemonSettings` (`daemon/src/config.rs`),
//! scaled down to what this crate needs: no CLI flags (the CLI is an
//! external collaborator, spec §1), no RPC/library-path fields.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

fn default_stage_pool_size() -> NonZeroUsize {
    NonZeroUsize::new(7).unwrap()
}

fn default_page_cache_mb() -> u32 {
    64
}

fn default_mmap_cap_mb() -> u32 {
    260
}

fn default_batch_timeout_secs() -> u64 {
    300
}

/// Controls the handful of things spec §5/§6 call out as configurable.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    /// Overrides `min(4, max(1, available_parallelism))`. Applied once,
    /// before any DSP primitive runs (spec §5).
    pub dsp_thread_count: Option<NonZeroUsize>,

    /// Bounds the per-analysis detector pool (spec §5, "≤ 7 workers").
    #[serde(default = "default_stage_pool_size")]
    pub stage_pool_size: NonZeroUsize,

    /// Defaults to the platform user-data directory when unset.
    pub cache_path: Option<PathBuf>,

    #[serde(default = "default_page_cache_mb")]
    pub cache_page_cache_mb: u32,

    #[serde(default = "default_mmap_cap_mb")]
    pub cache_mmap_cap_mb: u32,

    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            dsp_thread_count: None,
            stage_pool_size: default_stage_pool_size(),
            cache_path: None,
            cache_page_cache_mb: default_page_cache_mb(),
            cache_mmap_cap_mb: default_mmap_cap_mb(),
            batch_timeout_secs: default_batch_timeout_secs(),
        }
    }
}

impl AnalyzerConfig {
    /// Loads from (in ascending priority) built-in defaults, an optional
    /// `analyzer.toml` at `config_path`, then `ANALYZER_*` environment
    /// variables — the same layering `DaemonSettings::init` uses.
    #[inline]
    pub fn load(config_path: Option<&std::path::Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("stage_pool_size", 7i64)?
            .set_default("cache_page_cache_mb", i64::from(default_page_cache_mb()))?
            .set_default("cache_mmap_cap_mb", i64::from(default_mmap_cap_mb()))?
            .set_default("batch_timeout_secs", default_batch_timeout_secs() as i64)?;
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("ANALYZER"));
        builder.build()?.try_deserialize()
    }

    /// Resolves the effective cache file path: the configured value, or
    /// the platform user-data directory (spec §6: "default location under
    /// the user's home").
    #[must_use]
    #[inline]
    pub fn resolved_cache_path(&self) -> PathBuf {
        if let Some(p) = &self.cache_path {
            return p.clone();
        }
        ProjectDirs::from("", "", "cuecraft")
            .map(|dirs| dirs.data_dir().join("analysis_cache.db"))
            .unwrap_or_else(|| PathBuf::from("analysis_cache.db"))
    }

    #[must_use]
    #[inline]
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    /// `min(4, max(1, available_parallelism))`, or the override.
    #[must_use]
    #[inline]
    pub fn resolved_dsp_thread_count(&self) -> usize {
        self.dsp_thread_count.map_or_else(
            || {
                let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
                cores.max(1).min(4)
            },
            NonZeroUsize::get,
        )
    }
}

/// Adaptive batch worker count (spec §5): 2 for > 20 queued files, 4 for
/// > 5, else `min(n, cores, 4)`.
#[must_use]
#[inline]
pub fn adaptive_batch_workers(queued: usize) -> usize {
    if queued > 20 {
        2
    } else if queued > 5 {
        4
    } else {
        let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        queued.max(1).min(cores).min(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_constants() {
        let cfg = AnalyzerConfig::default();
        assert_eq!(cfg.stage_pool_size.get(), 7);
        assert_eq!(cfg.cache_page_cache_mb, 64);
        assert_eq!(cfg.cache_mmap_cap_mb, 260);
        assert_eq!(cfg.batch_timeout().as_secs(), 300);
    }

    #[test]
    fn adaptive_workers_follow_thresholds() {
        assert_eq!(adaptive_batch_workers(25), 2);
        assert_eq!(adaptive_batch_workers(10), 4);
        assert!(adaptive_batch_workers(1) <= 4);
    }
}
