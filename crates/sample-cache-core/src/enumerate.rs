//! Filling samples with files from their source.

use glob::Pattern;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::{BinariesConfig, SiteConfig};
use crate::error::Error;
use crate::samples::{FileAttrs, FileFlags, Location, Sample, SampleSource};

/// One file as listed by the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub size: u64,
    pub nevents: u64,
    pub adler32: u32,
}

/// Remote catalog lookup of the files of a dataset.
pub trait CatalogQuery: Send + Sync {
    fn query_files(&self, dasname: &str, instance: &str) -> Result<Vec<CatalogEntry>, Error>;
}

/// Runs `dasgoclient --json`.
pub struct DasClient {
    binary: String,
}

impl DasClient {
    pub fn new(binaries: &BinariesConfig) -> Self {
        Self {
            binary: binaries.dasgoclient.clone(),
        }
    }
}

impl CatalogQuery for DasClient {
    fn query_files(&self, dasname: &str, instance: &str) -> Result<Vec<CatalogEntry>, Error> {
        let query = format!("--query=file dataset={} instance={}", dasname, instance);
        debug!("Running {} --json \"{}\"", self.binary, query);
        let output = Command::new(&self.binary)
            .arg("--json")
            .arg(&query)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;
        if !output.status.success() {
            return Err(Error::Enumeration {
                sample: dasname.to_string(),
                reason: format!(
                    "{} exited with {}: {}",
                    self.binary,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        parse_das_listing(&output.stdout).map_err(|err| Error::Enumeration {
            sample: dasname.to_string(),
            reason: err.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct DasRecord {
    #[serde(default)]
    file: Vec<DasFile>,
}

#[derive(Deserialize)]
struct DasFile {
    name: String,
    size: u64,
    nevents: u64,
    adler32: String,
}

/// Parse the JSON listing printed by `dasgoclient --json`.
pub fn parse_das_listing(stdout: &[u8]) -> Result<Vec<CatalogEntry>, Error> {
    let records: Vec<DasRecord> = serde_json::from_slice(stdout)
        .map_err(|err| Error::Other(format!("invalid catalog listing: {}", err)))?;
    records
        .into_iter()
        .flat_map(|record| record.file)
        .map(|file| {
            let adler32 = u32::from_str_radix(&file.adler32, 16).map_err(|err| {
                Error::Other(format!(
                    "invalid adler32 '{}' for {}: {}",
                    file.adler32, file.name, err
                ))
            })?;
            Ok(CatalogEntry {
                name: file.name,
                size: file.size,
                nevents: file.nevents,
                adler32,
            })
        })
        .collect()
}

/// Enumerates samples from their source.
pub struct Enumerator {
    catalog: Arc<dyn CatalogQuery>,
    site: SiteConfig,
}

impl Enumerator {
    pub fn new(catalog: Arc<dyn CatalogQuery>, site: SiteConfig) -> Self {
        Self { catalog, site }
    }

    /// Add the files of the sample's source that it does not know yet.
    /// Returns the number of files added. On error the sample is left as it was.
    pub fn enumerate(&self, sample: &mut Sample) -> Result<usize, Error> {
        let found = match sample.source() {
            SampleSource::Plain => Vec::new(),
            SampleSource::Das { dasname, instance } => self.list_das(sample, dasname, instance)?,
            SampleSource::Fs { directory, filter } => self.list_fs(sample, directory, filter)?,
        };
        let added = found.len();
        for (path, attrs) in found {
            sample.put_file(&path, attrs);
        }
        debug!("Enumerated {}: {} new files", sample.key(), added);
        Ok(added)
    }

    fn list_das(
        &self,
        sample: &Sample,
        dasname: &str,
        instance: &str,
    ) -> Result<Vec<(String, FileAttrs)>, Error> {
        let mut found = Vec::new();
        for entry in self.catalog.query_files(dasname, instance)? {
            if sample.contains(&entry.name) {
                continue;
            }
            let location = if self.local_path(&entry.name).exists() {
                Location::Local
            } else {
                Location::Remote
            };
            let attrs = FileAttrs {
                flags: FileFlags {
                    location,
                    ..FileFlags::default()
                },
                size: Some(entry.size),
                entries: Some(entry.nevents),
                checksum: Some(entry.adler32),
            };
            found.push((entry.name, attrs));
        }
        Ok(found)
    }

    fn list_fs(
        &self,
        sample: &Sample,
        directory: &Path,
        filter: &str,
    ) -> Result<Vec<(String, FileAttrs)>, Error> {
        let pattern = Pattern::new(filter).map_err(|err| Error::Enumeration {
            sample: sample.key().to_string(),
            reason: format!("invalid filter '{}': {}", filter, err),
        })?;
        if !directory.is_dir() {
            return Err(Error::Enumeration {
                sample: sample.key().to_string(),
                reason: format!("{} is not a directory", directory.display()),
            });
        }

        let eos = directory.starts_with("/eos");
        let under_store = !self.site.store_path.is_empty()
            && directory.starts_with(Path::new(&self.site.store_path).join("store"));

        let mut found = Vec::new();
        for entry in WalkDir::new(directory).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry under {}: {}", directory.display(), err);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !pattern.matches(&entry.file_name().to_string_lossy())
            {
                continue;
            }

            let size = entry
                .metadata()
                .map_err(|err| Error::Enumeration {
                    sample: sample.key().to_string(),
                    reason: err.to_string(),
                })?
                .len();
            let checksum = if eos {
                Some(read_eos_checksum(entry.path())?)
            } else {
                None
            };

            let path = if under_store {
                strip_store_path(entry.path(), &self.site.store_path)
            } else {
                entry.path().to_string_lossy().into_owned()
            };
            if sample.contains(&path) {
                continue;
            }
            let attrs = FileAttrs {
                size: Some(size),
                checksum,
                ..FileAttrs::default()
            };
            found.push((path, attrs));
        }
        Ok(found)
    }

    fn local_path(&self, name: &str) -> PathBuf {
        Path::new(&self.site.store_path).join(name.trim_start_matches('/'))
    }
}

/// `<store_path>/store/x` → `/store/x`.
fn strip_store_path(path: &Path, store_path: &str) -> String {
    let full = path.to_string_lossy();
    let trimmed = store_path.trim_end_matches('/');
    full.strip_prefix(trimmed)
        .map(str::to_string)
        .unwrap_or_else(|| full.into_owned())
}

#[cfg(unix)]
fn read_eos_checksum(path: &Path) -> Result<u32, Error> {
    let value = xattr::get(path, "eos.checksum")?.ok_or_else(|| {
        Error::Other(format!("no eos.checksum attribute on {}", path.display()))
    })?;
    let text = String::from_utf8_lossy(&value);
    u32::from_str_radix(text.trim(), 16).map_err(|err| {
        Error::Other(format!(
            "invalid eos.checksum '{}' on {}: {}",
            text,
            path.display(),
            err
        ))
    })
}

#[cfg(not(unix))]
fn read_eos_checksum(path: &Path) -> Result<u32, Error> {
    Err(Error::Other(format!(
        "extended attributes unsupported, cannot read checksum of {}",
        path.display()
    )))
}
