use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::definition;
use crate::enumerate::{CatalogQuery, DasClient, Enumerator};
use crate::error::Error;
use crate::pool::{FailurePolicy, TaskOutcome, WorkerPool};
use crate::progress::ProgressReporter;
use crate::samples::{samples_flatten, File, Sample, SampleEntry};
use crate::staging::{RemoteCopy, StageReport, Stager, Xrdcp};
use crate::storage::SampleStore;

/// Resolves samples against the store and stages their files.
pub struct SamplesCache {
    config: AppConfig,
    store: SampleStore,
    catalog: Arc<dyn CatalogQuery>,
    copier: Arc<dyn RemoteCopy>,
    pool: WorkerPool,
    refresh: bool,
    remote: bool,
    stage_on_load: bool,
}

#[derive(Debug, Default)]
pub struct RefreshReport {
    pub requested: usize,
    pub cache_hits: usize,
    pub enumerated: usize,
    pub failed: usize,
    pub duration: Duration,
}

impl SamplesCache {
    pub fn new(config: AppConfig) -> Result<Self, Error> {
        let store = SampleStore::open(
            config.samples_cache.store_path(),
            config.samples_cache.lock_options(),
        )?;
        let pool = WorkerPool::new(config.samples_cache.threads)?;
        Ok(Self {
            catalog: Arc::new(DasClient::new(&config.binaries)),
            copier: Arc::new(Xrdcp::new(&config.binaries)),
            stage_on_load: config.site.stage,
            config,
            store,
            pool,
            refresh: false,
            remote: false,
        })
    }

    /// Re-enumerate every sample, ignoring cached file lists.
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Include REMOTE files when staging.
    pub fn with_remote(mut self, remote: bool) -> Self {
        self.remote = remote;
        self
    }

    /// Stage the loaded samples at the end of `load`/`loads`.
    pub fn with_stage(mut self, stage: bool) -> Self {
        self.stage_on_load = stage;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Result<Self, Error> {
        self.pool = WorkerPool::new(threads)?;
        Ok(self)
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogQuery>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_copier(mut self, copier: Arc<dyn RemoteCopy>) -> Self {
        self.copier = copier;
        self
    }

    pub fn with_store(mut self, store: SampleStore) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    /// Parse definitions from `path` and refresh them.
    pub fn load(
        &self,
        path: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<SampleEntry>, Error> {
        let text = fs::read_to_string(path)?;
        self.loads(&text, reporter)
    }

    /// Parse definitions from YAML text and refresh them, staging their files
    /// when staging on load is enabled.
    pub fn loads(
        &self,
        text: &str,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<SampleEntry>, Error> {
        let mut entries = definition::parse_definitions(text)?;
        self.refresh(&mut entries, reporter)?;
        if self.stage_on_load {
            self.stage(&mut entries, reporter)?;
        }
        Ok(entries)
    }

    /// Fill the file lists of all samples in `entries`.
    ///
    /// Cached samples adopt their stored files unless refresh is forced; the
    /// rest are enumerated on the pool and written back. The store lock is held
    /// for the whole call. An enumeration failure is logged and leaves that
    /// sample with the files it already had; it is not written, so the next
    /// call enumerates it again.
    pub fn refresh(
        &self,
        entries: &mut [SampleEntry],
        reporter: &dyn ProgressReporter,
    ) -> Result<RefreshReport, Error> {
        let start = Instant::now();
        let samples = samples_flatten(entries);
        let mut report = RefreshReport {
            requested: samples.len(),
            ..RefreshReport::default()
        };

        let session = self.store.session()?;

        let mut to_enumerate: Vec<&mut Sample> = Vec::new();
        for sample in samples {
            if self.refresh {
                to_enumerate.push(sample);
                continue;
            }
            match session.read_sample(sample.key())? {
                None => to_enumerate.push(sample),
                Some(cached) => {
                    if cached.kind() != sample.kind() {
                        warn!(
                            "Type of sample {} from definition {} and store {} is inconsistent",
                            sample.key(),
                            sample.kind(),
                            cached.kind()
                        );
                    }
                    debug!("Cache hit for {} ({} files)", sample.key(), cached.len());
                    sample.adopt_files(cached);
                    report.cache_hits += 1;
                }
            }
        }
        reporter.on_refresh_start(report.cache_hits, to_enumerate.len());

        let enumerator = Enumerator::new(Arc::clone(&self.catalog), self.config.site.clone());
        let outcomes = self
            .pool
            .run(to_enumerate, FailurePolicy::Continue, |sample| {
                let result = enumerator.enumerate(sample);
                if let Ok(added) = &result {
                    reporter.on_sample_enumerated(&sample.key().to_string(), *added);
                }
                Ok((sample, result))
            });

        for (_, outcome) in outcomes {
            match outcome {
                TaskOutcome::Done((sample, Ok(_))) => {
                    report.enumerated += 1;
                    session.write_sample(sample)?;
                }
                TaskOutcome::Done((sample, Err(err))) => {
                    error!("Enumeration of {} failed: {}", sample.key(), err);
                    report.failed += 1;
                }
                TaskOutcome::Failed(err) => {
                    error!("Enumeration task failed: {}", err);
                    report.failed += 1;
                }
                TaskOutcome::Cancelled => {
                    error!("Enumeration task was cancelled");
                    report.failed += 1;
                }
            }
        }
        drop(session);

        report.duration = start.elapsed();
        reporter.on_refresh_complete(report.requested, report.duration.as_secs_f64());

        info!(
            "#Samples: {}, #Files: {}, Size: {}",
            entries.iter().map(SampleEntry::samples_len).sum::<usize>(),
            entries.iter().map(|entry| entry.len(false)).sum::<usize>(),
            format_size(entries.iter().map(SampleEntry::size).sum())
        );
        Ok(report)
    }

    /// Stage the OK files of `entries` that live in the storage namespace into
    /// the file cache; REMOTE files only when remote access is enabled. Any
    /// failed transfer fails the call.
    pub fn stage(
        &self,
        entries: &mut [SampleEntry],
        reporter: &dyn ProgressReporter,
    ) -> Result<StageReport, Error> {
        let remote = self.remote;
        let files: Vec<&mut File> = samples_flatten(entries)
            .into_iter()
            .flat_map(|sample| sample.files_iter_mut(remote))
            .filter(|file| file.in_storage_namespace())
            .collect();
        debug!("Staging {} files (remote: {})", files.len(), remote);

        let stager = Stager::new(
            Arc::clone(&self.copier),
            self.config.site.clone(),
            self.config.samples_cache.xrdcp_retry,
        );
        stager.stage_all(&self.pool, files, reporter)
    }
}

/// Human-readable byte count; `unknown` when any file had no size.
pub fn format_size(size: Option<u64>) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let bytes = match size {
        Some(bytes) => bytes,
        None => return "unknown".to_string(),
    };
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
