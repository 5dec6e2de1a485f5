//! Declarative sample definitions.
//!
//! A definition file is a YAML sequence of records. A record with `samples` is a
//! group; otherwise it is a leaf and must carry either `dasname` (optionally
//! `instance`) or `directory` (optionally `filter`):
//!
//! ```yaml
//! - name: /MC/ttbar
//!   tree_name: Events
//!   dasname: /TTbar/Run3-v1/NANOAODSIM
//!   cross_section: 831.8
//! - name: /Data/all
//!   samples:
//!     - name: /Data/runA
//!       tree_name: Events
//!       directory: /data/runA
//!       data: true
//! ```
//!
//! Malformed records are logged and skipped; the rest of the file still loads.

use serde::Deserialize;
use serde_yaml::Value;
use std::path::PathBuf;
use tracing::{debug, error};

use crate::error::Error;
use crate::samples::{Sample, SampleEntry, SampleGroup};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SampleRecord {
    name: String,
    tree_name: String,
    dasname: Option<String>,
    instance: Option<String>,
    directory: Option<PathBuf>,
    filter: Option<String>,
    #[serde(default)]
    title: String,
    cross_section: Option<f64>,
    #[serde(default)]
    data: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupRecord {
    name: String,
    #[serde(default)]
    title: String,
    samples: Vec<Value>,
}

/// Parse a YAML definition document.
///
/// Only a document that is not YAML, or not a sequence, is an error. Bad records
/// are skipped.
pub fn parse_definitions(text: &str) -> Result<Vec<SampleEntry>, Error> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let document: Value = serde_yaml::from_str(text)
        .map_err(|err| Error::Definition(format!("invalid YAML: {}", err)))?;
    let records = match document {
        Value::Null => Vec::new(),
        Value::Sequence(records) => records,
        _ => {
            return Err(Error::Definition(
                "expected a sequence of sample records".to_string(),
            ))
        }
    };
    Ok(parse_records(records))
}

fn parse_records(records: Vec<Value>) -> Vec<SampleEntry> {
    let mut entries = Vec::with_capacity(records.len());
    for record in records {
        let label = record_label(&record);
        match parse_record(record) {
            Ok(entry) => entries.push(entry),
            Err(err) => error!("Skipping {}: {}", label, err),
        }
    }
    entries
}

fn parse_record(record: Value) -> Result<SampleEntry, Error> {
    if !record.is_mapping() {
        return Err(Error::Definition("record is not a mapping".to_string()));
    }
    if record.get("name").is_none() {
        return Err(Error::Definition("record has no name".to_string()));
    }

    if record.get("samples").is_some() {
        let group: GroupRecord = from_record(record)?;
        debug!("Defining group {} ...", group.name);
        let members = parse_records(group.samples);
        return Ok(SampleGroup::new(&group.name, members)?
            .with_title(group.title)
            .into());
    }

    let leaf: SampleRecord = from_record(record)?;
    let sample = match (leaf.dasname, leaf.directory) {
        (Some(dasname), None) => {
            if leaf.filter.is_some() {
                return Err(Error::Definition(
                    "filter is only valid with directory".to_string(),
                ));
            }
            debug!("Defining DAS sample {} ...", leaf.name);
            Sample::from_das(
                &leaf.name,
                &leaf.tree_name,
                &dasname,
                leaf.instance.as_deref(),
            )
        }
        (None, Some(directory)) => {
            if leaf.instance.is_some() {
                return Err(Error::Definition(
                    "instance is only valid with dasname".to_string(),
                ));
            }
            debug!("Defining filesystem sample {} ...", leaf.name);
            Sample::from_fs(
                &leaf.name,
                &leaf.tree_name,
                directory,
                leaf.filter.as_deref(),
            )
        }
        (Some(_), Some(_)) => {
            return Err(Error::Definition(
                "dasname and directory are mutually exclusive".to_string(),
            ))
        }
        (None, None) => {
            return Err(Error::Definition(
                "unknown type (no dasname, directory or samples attribute)".to_string(),
            ))
        }
    };

    Ok(sample
        .with_title(leaf.title)
        .with_cross_section(leaf.cross_section)
        .with_data(leaf.data)
        .into())
}

fn from_record<T: serde::de::DeserializeOwned>(record: Value) -> Result<T, Error> {
    serde_yaml::from_value(record).map_err(|err| Error::Definition(err.to_string()))
}

fn record_label(record: &Value) -> String {
    match record.get("name").and_then(Value::as_str) {
        Some(name) => name.to_string(),
        None => "record without name".to_string(),
    }
}
