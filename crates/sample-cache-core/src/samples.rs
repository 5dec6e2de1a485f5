//! Samples and their files.
//!
//! A [`Sample`] is one dataset made of many files sharing a tree name. Files are
//! kept in a directory → basename map whose directory keys are shared `Arc<str>`
//! values, so a sample with 10⁵ files in a handful of directories stores each
//! directory string once. A [`SampleGroup`] is a flat, named list of samples.
//! [`SampleEntry`] is either of the two and is what definitions produce.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::SiteConfig;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileStatus {
    #[default]
    Ok,
    Bad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Location {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageStatus {
    #[default]
    Unstaged,
    Staging,
    Staged,
}

macro_rules! db_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(Error::Other(format!(
                        "invalid {} value '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

db_enum!(FileStatus { Ok => "OK", Bad => "BAD" });
db_enum!(Location { Local => "LOCAL", Remote => "REMOTE" });
db_enum!(StageStatus { Unstaged => "UNSTAGED", Staging => "STAGING", Staged => "STAGED" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileFlags {
    pub status: FileStatus,
    pub location: Location,
    pub stage_status: StageStatus,
}

impl fmt::Display for FileFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.status, self.location, self.stage_status)
    }
}

/// Attributes supplied when a file is put into a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FileAttrs {
    pub flags: FileFlags,
    pub size: Option<u64>,
    pub entries: Option<u64>,
    pub checksum: Option<u32>,
}

/// A single data file of a sample.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    dirname: Arc<str>,
    name: String,
    pub flags: FileFlags,
    pub size: Option<u64>,
    pub entries: Option<u64>,
    /// Adler32 checksum.
    pub checksum: Option<u32>,
}

impl File {
    pub fn dirname(&self) -> &str {
        &self.dirname
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> String {
        join_path(&self.dirname, &self.name)
    }

    pub fn is_ok(&self) -> bool {
        self.flags.status == FileStatus::Ok
    }

    pub fn is_local(&self) -> bool {
        self.flags.location == Location::Local
    }

    pub(crate) fn shares_dirname(&self, other: &File) -> bool {
        Arc::ptr_eq(&self.dirname, &other.dirname)
    }

    /// Under `/store/` or `/eos/`, the only files that have a staged copy.
    pub fn in_storage_namespace(&self) -> bool {
        let path = self.path();
        path.starts_with("/store/") || path.starts_with("/eos/")
    }

    /// URL used to read the file in place, ignoring any staged copy.
    pub fn access_url(&self, site: &SiteConfig) -> String {
        let path = self.path();
        if !self.in_storage_namespace() {
            return path;
        }
        match self.flags.location {
            Location::Local => format!("{}{}", site.local_prefix, path),
            Location::Remote => format!("{}{}", site.remote_prefix, path),
        }
    }

    /// Location of the staged copy under the local file cache.
    pub fn staged_path(&self, site: &SiteConfig) -> PathBuf {
        site.file_cache_path
            .join(self.dirname.trim_start_matches('/'))
            .join(&self.name)
    }

    /// Best way to open the file: the staged copy when there is one, else its access URL.
    pub fn url_or_path(&self, site: &SiteConfig) -> String {
        if self.in_storage_namespace() && self.flags.stage_status == StageStatus::Staged {
            self.staged_path(site).to_string_lossy().into_owned()
        } else {
            self.access_url(site)
        }
    }
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Path-like identity of a sample: `dirname/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleKey {
    pub dirname: String,
    pub name: String,
}

impl SampleKey {
    pub fn new(dirname: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            dirname: dirname.into(),
            name: name.into(),
        }
    }

    pub fn parse(path: &str) -> Self {
        let (dirname, name) = split_path(path);
        Self::new(dirname, name)
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join_path(&self.dirname, &self.name))
    }
}

/// Split into (directory, basename) the way `dirname`/`basename` do, keeping a
/// lone leading `/` as the directory of top-level entries.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

pub fn join_path(dirname: &str, name: &str) -> String {
    if dirname.is_empty() {
        name.to_string()
    } else if dirname.ends_with('/') {
        format!("{}{}", dirname, name)
    } else {
        format!("{}/{}", dirname, name)
    }
}

/// Persisted discriminator of the sample variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Plain,
    Das,
    Fs,
}

db_enum!(SampleKind { Plain => "sample", Das => "sample_from_das", Fs => "sample_from_fs" });

/// How a sample's files are enumerated.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleSource {
    /// Files are only ever put explicitly.
    Plain,
    /// Remote catalog dataset.
    Das { dasname: String, instance: String },
    /// Recursive walk of a directory, keeping names matching `filter`.
    Fs { directory: PathBuf, filter: String },
}

pub const DEFAULT_FS_FILTER: &str = "*.root";

impl SampleSource {
    pub fn das(dasname: impl Into<String>, instance: Option<&str>) -> Self {
        let dasname = dasname.into();
        let instance = match instance {
            Some(instance) if !instance.is_empty() => instance.to_string(),
            _ if dasname.ends_with("/USER") => "prod/phys03".to_string(),
            _ => "prod/phys01".to_string(),
        };
        SampleSource::Das { dasname, instance }
    }

    pub fn fs(directory: impl Into<PathBuf>, filter: Option<&str>) -> Self {
        let filter = match filter {
            Some(filter) if !filter.is_empty() => filter.to_string(),
            _ => DEFAULT_FS_FILTER.to_string(),
        };
        SampleSource::Fs {
            directory: directory.into(),
            filter,
        }
    }

    pub fn kind(&self) -> SampleKind {
        match self {
            SampleSource::Plain => SampleKind::Plain,
            SampleSource::Das { .. } => SampleKind::Das,
            SampleSource::Fs { .. } => SampleKind::Fs,
        }
    }
}

type FileMap = BTreeMap<Arc<str>, BTreeMap<String, File>>;

/// A leaf sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    key: SampleKey,
    title: String,
    pub tree_name: String,
    pub cross_section: Option<f64>,
    pub data: bool,
    source: SampleSource,
    files: FileMap,
}

impl Sample {
    pub fn new(path: &str, tree_name: impl Into<String>, source: SampleSource) -> Self {
        Self {
            key: SampleKey::parse(path),
            title: String::new(),
            tree_name: tree_name.into(),
            cross_section: None,
            data: false,
            source,
            files: BTreeMap::new(),
        }
    }

    pub fn from_das(path: &str, tree_name: &str, dasname: &str, instance: Option<&str>) -> Self {
        Self::new(path, tree_name, SampleSource::das(dasname, instance))
    }

    pub fn from_fs(
        path: &str,
        tree_name: &str,
        directory: impl Into<PathBuf>,
        filter: Option<&str>,
    ) -> Self {
        Self::new(path, tree_name, SampleSource::fs(directory, filter))
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_cross_section(mut self, cross_section: Option<f64>) -> Self {
        self.cross_section = cross_section;
        self
    }

    pub fn with_data(mut self, data: bool) -> Self {
        self.data = data;
        self
    }

    pub fn key(&self) -> &SampleKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Human title; the name when no title was set.
    pub fn title(&self) -> &str {
        if self.title.is_empty() {
            &self.key.name
        } else {
            &self.title
        }
    }

    /// Title exactly as set, possibly empty.
    pub fn raw_title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn source(&self) -> &SampleSource {
        &self.source
    }

    pub fn kind(&self) -> SampleKind {
        self.source.kind()
    }

    /// Insert or replace the file at `path`.
    pub fn put_file(&mut self, path: &str, attrs: FileAttrs) -> &mut File {
        let (dirname, name) = split_path(path);
        let dirname: Arc<str> = match self.files.get_key_value(dirname) {
            Some((interned, _)) => Arc::clone(interned),
            None => Arc::from(dirname),
        };
        let file = File {
            dirname: Arc::clone(&dirname),
            name: name.to_string(),
            flags: attrs.flags,
            size: attrs.size,
            entries: attrs.entries,
            checksum: attrs.checksum,
        };
        match self.files.entry(dirname).or_default().entry(name.to_string()) {
            Entry::Occupied(mut slot) => {
                slot.insert(file);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(file),
        }
    }

    pub fn get(&self, path: &str) -> Option<&File> {
        let (dirname, name) = split_path(path);
        self.files.get(dirname).and_then(|names| names.get(name))
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut File> {
        let (dirname, name) = split_path(path);
        self.files.get_mut(dirname).and_then(|names| names.get_mut(name))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// All files, including BAD ones.
    pub fn files(&self) -> impl Iterator<Item = &File> + '_ {
        self.files.values().flat_map(|names| names.values())
    }

    pub fn files_mut(&mut self) -> impl Iterator<Item = &mut File> + '_ {
        self.files.values_mut().flat_map(|names| names.values_mut())
    }

    /// Files usable for processing: never BAD, and REMOTE ones only when `remote` is set.
    pub fn files_iter(&self, remote: bool) -> impl Iterator<Item = &File> + '_ {
        self.files()
            .filter(move |file| file.is_ok() && (remote || file.is_local()))
    }

    pub fn files_iter_mut(&mut self, remote: bool) -> impl Iterator<Item = &mut File> + '_ {
        self.files_mut()
            .filter(move |file| file.is_ok() && (remote || file.is_local()))
    }

    pub fn len(&self) -> usize {
        self.files.values().map(|names| names.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len_local(&self) -> usize {
        self.files().filter(|file| file.is_local()).count()
    }

    /// Total bytes, or `None` when any file has no size.
    pub fn size(&self) -> Option<u64> {
        self.files().map(|file| file.size).sum()
    }

    /// Total entries, or `None` when any file has no entry count.
    pub fn entries(&self) -> Option<u64> {
        self.files().map(|file| file.entries).sum()
    }

    /// Replace this sample's files with those of `other`.
    pub fn adopt_files(&mut self, other: Sample) {
        self.files = other.files;
    }
}

/// A flat, named collection of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleGroup {
    key: SampleKey,
    title: String,
    samples: Vec<Sample>,
}

impl SampleGroup {
    /// Fails when any member is itself a group; groups never nest.
    pub fn new(path: &str, members: Vec<SampleEntry>) -> Result<Self, Error> {
        let key = SampleKey::parse(path);
        let mut samples = Vec::with_capacity(members.len());
        for member in members {
            match member {
                SampleEntry::Sample(sample) => samples.push(sample),
                SampleEntry::Group(group) => {
                    return Err(Error::Structure(format!(
                        "group {} cannot contain group {}",
                        key, group.key
                    )))
                }
            }
        }
        Ok(Self {
            key,
            title: String::new(),
            samples,
        })
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn key(&self) -> &SampleKey {
        &self.key
    }

    pub fn title(&self) -> &str {
        if self.title.is_empty() {
            &self.key.name
        } else {
            &self.title
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [Sample] {
        &mut self.samples
    }

    /// First file at `path` found in any member.
    pub fn get(&self, path: &str) -> Option<&File> {
        self.samples.iter().find_map(|sample| sample.get(path))
    }
}

/// Either a leaf sample or a group of them.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleEntry {
    Sample(Sample),
    Group(SampleGroup),
}

impl From<Sample> for SampleEntry {
    fn from(sample: Sample) -> Self {
        SampleEntry::Sample(sample)
    }
}

impl From<SampleGroup> for SampleEntry {
    fn from(group: SampleGroup) -> Self {
        SampleEntry::Group(group)
    }
}

impl SampleEntry {
    pub fn key(&self) -> &SampleKey {
        match self {
            SampleEntry::Sample(sample) => sample.key(),
            SampleEntry::Group(group) => group.key(),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            SampleEntry::Sample(sample) => sample.title(),
            SampleEntry::Group(group) => group.title(),
        }
    }

    pub fn samples(&self) -> &[Sample] {
        match self {
            SampleEntry::Sample(sample) => std::slice::from_ref(sample),
            SampleEntry::Group(group) => group.samples(),
        }
    }

    pub fn samples_mut(&mut self) -> &mut [Sample] {
        match self {
            SampleEntry::Sample(sample) => std::slice::from_mut(sample),
            SampleEntry::Group(group) => group.samples_mut(),
        }
    }

    pub fn samples_len(&self) -> usize {
        self.samples().len()
    }

    pub fn files(&self) -> impl Iterator<Item = &File> + '_ {
        self.samples().iter().flat_map(|sample| sample.files())
    }

    pub fn files_iter(&self, remote: bool) -> impl Iterator<Item = &File> + '_ {
        self.samples()
            .iter()
            .flat_map(move |sample| sample.files_iter(remote))
    }

    /// Number of files, optionally only those with a LOCAL location.
    pub fn len(&self, local_only: bool) -> usize {
        self.samples()
            .iter()
            .map(|sample| {
                if local_only {
                    sample.len_local()
                } else {
                    sample.len()
                }
            })
            .sum()
    }

    pub fn size(&self) -> Option<u64> {
        self.samples().iter().map(Sample::size).sum()
    }

    pub fn entries(&self) -> Option<u64> {
        self.samples().iter().map(Sample::entries).sum()
    }
}

/// Leaf samples of all entries, groups expanded in order.
pub fn samples_flatten(entries: &mut [SampleEntry]) -> Vec<&mut Sample> {
    entries
        .iter_mut()
        .flat_map(|entry| entry.samples_mut().iter_mut())
        .collect()
}
