use crate::samples::{FileStatus, Location, SampleKey, SampleKind, StageStatus};

/// Base row of a persisted sample, with its location resolved.
#[derive(Debug, Clone)]
pub struct SampleRow {
    pub id: i64,
    pub kind: SampleKind,
    pub dirname: String,
    pub name: String,
    pub tree_name: String,
    pub title: Option<String>,
    pub cross_section: Option<f64>,
    pub data: bool,
    pub refreshed_at: Option<String>,
}

/// Extension row of a remote-catalog sample.
#[derive(Debug, Clone)]
pub struct DasRow {
    pub dasname: String,
    pub instance: String,
}

/// Extension row of a filesystem sample.
#[derive(Debug, Clone)]
pub struct FsRow {
    pub directory: String,
    pub filter: String,
}

/// A file row joined with its directory name.
#[derive(Debug, Clone)]
pub struct FileRow {
    pub id: i64,
    pub directory: String,
    pub name: String,
    pub status: FileStatus,
    pub location: Location,
    pub stage_status: StageStatus,
    pub size: Option<i64>,
    pub entries: Option<i64>,
    pub checksum: Option<i64>,
}

/// Per-sample overview for listings.
#[derive(Debug, Clone)]
pub struct SampleSummary {
    pub key: SampleKey,
    pub kind: SampleKind,
    pub file_count: i64,
    pub total_size: i64,
    pub refreshed_at: Option<String>,
}

/// What one diff-write changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}
