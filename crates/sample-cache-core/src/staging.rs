//! Prefetching files into the local file cache.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::config::{BinariesConfig, SiteConfig};
use crate::error::Error;
use crate::pool::{FailurePolicy, TaskOutcome, WorkerPool};
use crate::progress::ProgressReporter;
use crate::samples::{File, Location, StageStatus};

/// One transfer handed to a [`RemoteCopy`].
#[derive(Debug, Clone)]
pub struct CopyRequest<'a> {
    pub source: &'a str,
    pub destination: &'a Path,
    pub retry: u32,
    /// Adler32 to verify during transfer.
    pub checksum: Option<u32>,
    /// Abort when throughput stays below this many bytes per second.
    pub xrate_threshold: u64,
}

pub trait RemoteCopy: Send + Sync {
    fn copy(&self, request: &CopyRequest<'_>) -> Result<(), Error>;
}

/// Runs `xrdcp`.
pub struct Xrdcp {
    binary: String,
}

impl Xrdcp {
    pub fn new(binaries: &BinariesConfig) -> Self {
        Self {
            binary: binaries.xrdcp.clone(),
        }
    }
}

impl RemoteCopy for Xrdcp {
    fn copy(&self, request: &CopyRequest<'_>) -> Result<(), Error> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--force")
            .arg("--nopbar")
            .arg("--retry")
            .arg(request.retry.to_string());
        if let Some(checksum) = request.checksum {
            cmd.arg("--cksum").arg(format!("adler32:{:08x}", checksum));
        }
        cmd.arg("--xrate-threshold")
            .arg(request.xrate_threshold.to_string())
            .arg(request.source)
            .arg(request.destination);
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        debug!("Running {:?}", cmd);
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(Error::Other(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub transferred: usize,
    pub already_staged: usize,
}

pub struct Stager {
    copier: Arc<dyn RemoteCopy>,
    site: SiteConfig,
    retry: u32,
}

impl Stager {
    pub fn new(copier: Arc<dyn RemoteCopy>, site: SiteConfig, retry: u32) -> Self {
        Self {
            copier,
            site,
            retry,
        }
    }

    /// Stage one file. Returns whether a transfer happened; an existing local
    /// copy counts as staged without one.
    pub fn stage_file(&self, file: &mut File) -> Result<bool, Error> {
        let destination = file.staged_path(&self.site);
        if destination.exists() {
            debug!("{} already staged at {}", file, destination.display());
            file.flags.stage_status = StageStatus::Staged;
            return Ok(false);
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let partial = partial_path(&destination);
        let source = file.access_url(&self.site);
        let xrate_threshold = match file.flags.location {
            Location::Local => self.site.local_xrate_threshold,
            Location::Remote => self.site.remote_xrate_threshold,
        };

        file.flags.stage_status = StageStatus::Staging;
        let result = self
            .copier
            .copy(&CopyRequest {
                source: &source,
                destination: &partial,
                retry: self.retry,
                checksum: file.checksum,
                xrate_threshold,
            })
            .and_then(|()| fs::rename(&partial, &destination).map_err(Error::from));

        match result {
            Ok(()) => {
                debug!("Staged {} to {}", file, destination.display());
                file.flags.stage_status = StageStatus::Staged;
                Ok(true)
            }
            Err(err) => {
                file.flags.stage_status = StageStatus::Unstaged;
                if partial.exists() {
                    if let Err(rm_err) = fs::remove_file(&partial) {
                        error!("Error removing {}: {}", partial.display(), rm_err);
                    }
                }
                Err(Error::Staging(format!("{}: {}", file, err)))
            }
        }
    }

    /// Stage all `files` on the pool. The first failure cancels whatever has
    /// not started yet and fails the whole call once running transfers end.
    ///
    /// Files sharing a destination, e.g. one path listed by two samples, are
    /// transferred once and all take the outcome of that transfer.
    pub fn stage_all(
        &self,
        pool: &WorkerPool,
        files: Vec<&mut File>,
        reporter: &dyn ProgressReporter,
    ) -> Result<StageReport, Error> {
        if self.site.file_cache_path.as_os_str().is_empty() {
            return Err(Error::Staging("no file cache path configured".to_string()));
        }

        let mut seen: HashMap<PathBuf, usize> = HashMap::new();
        let mut unique: Vec<&mut File> = Vec::new();
        let mut duplicates: Vec<(usize, &mut File)> = Vec::new();
        for file in files {
            match seen.entry(file.staged_path(&self.site)) {
                Entry::Occupied(slot) => duplicates.push((*slot.get(), file)),
                Entry::Vacant(slot) => {
                    slot.insert(unique.len());
                    unique.push(file);
                }
            }
        }
        if !duplicates.is_empty() {
            debug!("{} files share a destination with another file", duplicates.len());
        }

        let start = Instant::now();
        let total = unique.len();
        reporter.on_stage_start(total);

        let outcomes = pool.run(unique, FailurePolicy::FailFast, |file: &mut File| {
            let transferred = self.stage_file(file)?;
            reporter.on_file_staged(&file.path(), transferred);
            Ok(transferred)
        });

        let mut settled: Vec<Option<StageStatus>> = vec![None; total];
        for (index, outcome) in &outcomes {
            settled[*index] = match outcome {
                TaskOutcome::Done(_) => Some(StageStatus::Staged),
                TaskOutcome::Failed(_) => Some(StageStatus::Unstaged),
                TaskOutcome::Cancelled => None,
            };
        }
        for (index, file) in duplicates {
            if let Some(status) = settled[index] {
                file.flags.stage_status = status;
            }
        }

        let mut report = StageReport::default();
        let mut failures = Vec::new();
        let mut cancelled = 0usize;
        for (_, outcome) in outcomes {
            match outcome {
                TaskOutcome::Done(true) => report.transferred += 1,
                TaskOutcome::Done(false) => report.already_staged += 1,
                TaskOutcome::Failed(err) => {
                    error!("Staging failed: {}", err);
                    failures.push(err.to_string());
                }
                TaskOutcome::Cancelled => cancelled += 1,
            }
        }

        let duration = start.elapsed();
        reporter.on_stage_complete(
            report.transferred + report.already_staged,
            duration.as_secs_f64(),
        );
        if !failures.is_empty() {
            return Err(Error::Staging(format!(
                "{} of {} files failed, {} not attempted: {}",
                failures.len(),
                total,
                cancelled,
                failures.join("; ")
            )));
        }

        info!(
            "Staged {} files ({} transferred, {} already present) in {:.2}s",
            total,
            report.transferred,
            report.already_staged,
            duration.as_secs_f64()
        );
        Ok(report)
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
