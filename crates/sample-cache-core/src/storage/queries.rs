use super::models::*;
use super::sqlite::Database;
use crate::error::Error;
use crate::samples::{FileAttrs, FileFlags, Sample, SampleKey, SampleKind, SampleSource};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

impl Database {
    // ── Samples ──────────────────────────────────────────────────

    pub fn find_sample_row(&self, key: &SampleKey) -> Result<Option<SampleRow>> {
        self.connection()
            .query_row(
                "SELECT s.id, s.type, sp.name, s.name, s.tree_name, s.title, \
                        s.cross_section, s.data, s.refreshed_at \
                 FROM sample s JOIN samplespath sp ON s.path_id = sp.id \
                 WHERE sp.name = ?1 AND s.name = ?2",
                params![key.dirname, key.name],
                |row| {
                    Ok(SampleRow {
                        id: row.get(0)?,
                        kind: parse_column(row, 1)?,
                        dirname: row.get(2)?,
                        name: row.get(3)?,
                        tree_name: row.get(4)?,
                        title: row.get(5)?,
                        cross_section: row.get(6)?,
                        data: row.get(7)?,
                        refreshed_at: row.get(8)?,
                    })
                },
            )
            .optional()
    }

    /// Rebuild a sample of the persisted variant together with all its files.
    pub fn read_sample(&self, key: &SampleKey) -> Result<Option<Sample>> {
        let row = match self.find_sample_row(key)? {
            Some(row) => row,
            None => return Ok(None),
        };

        let source = match row.kind {
            SampleKind::Plain => SampleSource::Plain,
            SampleKind::Das => {
                let das = self.connection().query_row(
                    "SELECT dasname, instance FROM sample_from_das WHERE id = ?1",
                    params![row.id],
                    |r| {
                        Ok(DasRow {
                            dasname: r.get(0)?,
                            instance: r.get(1)?,
                        })
                    },
                )?;
                SampleSource::Das {
                    dasname: das.dasname,
                    instance: das.instance,
                }
            }
            SampleKind::Fs => {
                let fs = self.connection().query_row(
                    "SELECT directory, filter FROM sample_from_fs WHERE id = ?1",
                    params![row.id],
                    |r| {
                        Ok(FsRow {
                            directory: r.get(0)?,
                            filter: r.get(1)?,
                        })
                    },
                )?;
                SampleSource::Fs {
                    directory: fs.directory.into(),
                    filter: fs.filter,
                }
            }
        };

        let mut sample = Sample::new(&key.to_string(), row.tree_name, source)
            .with_title(row.title.unwrap_or_default())
            .with_cross_section(row.cross_section)
            .with_data(row.data);

        for file in self.get_files_of_sample(row.id)? {
            let path = crate::samples::join_path(&file.directory, &file.name);
            sample.put_file(
                &path,
                FileAttrs {
                    flags: FileFlags {
                        status: file.status,
                        location: file.location,
                        stage_status: file.stage_status,
                    },
                    size: file.size.map(|v| v as u64),
                    entries: file.entries.map(|v| v as u64),
                    checksum: file.checksum.map(|v| v as u32),
                },
            );
        }

        debug!("Read sample {} with {} files", key, sample.len());
        Ok(Some(sample))
    }

    pub fn get_files_of_sample(&self, sample_id: i64) -> Result<Vec<FileRow>> {
        let mut stmt = self.connection().prepare(
            "SELECT f.id, d.name, f.name, f.status, f.location, f.stage_status, \
                    f.size, f.entries, f.checksum \
             FROM file f JOIN directory d ON f.directory_id = d.id \
             WHERE f.sample_id = ?1",
        )?;
        let files = stmt
            .query_map(params![sample_id], |row| {
                Ok(FileRow {
                    id: row.get(0)?,
                    directory: row.get(1)?,
                    name: row.get(2)?,
                    status: parse_column(row, 3)?,
                    location: parse_column(row, 4)?,
                    stage_status: parse_column(row, 5)?,
                    size: row.get(6)?,
                    entries: row.get(7)?,
                    checksum: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(files)
    }

    /// Reconcile the persisted state of `sample` with its in-memory state.
    ///
    /// Scalars are updated in place, files are matched on (directory, basename):
    /// known files are updated, new ones inserted and vanished ones deleted. The
    /// whole diff is one transaction.
    pub fn write_sample(&self, sample: &Sample) -> Result<WriteStats> {
        let tx = self.connection().unchecked_transaction()?;
        let now = chrono::Utc::now().to_rfc3339();
        let key = sample.key();

        let sample_id = match self.find_sample_row(key)? {
            Some(row) => {
                tx.execute(
                    "UPDATE sample SET type = ?1, title = ?2, tree_name = ?3, \
                     cross_section = ?4, data = ?5, refreshed_at = ?6 WHERE id = ?7",
                    params![
                        sample.kind().as_str(),
                        sample.raw_title(),
                        sample.tree_name,
                        sample.cross_section,
                        sample.data,
                        now,
                        row.id
                    ],
                )?;
                row.id
            }
            None => {
                let path_id = intern_name(&tx, "samplespath", &key.dirname)?;
                tx.execute(
                    "INSERT INTO sample (type, name, path_id, tree_name, title, \
                     cross_section, data, refreshed_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        sample.kind().as_str(),
                        key.name,
                        path_id,
                        sample.tree_name,
                        sample.raw_title(),
                        sample.cross_section,
                        sample.data,
                        now
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };
        write_extension(&tx, sample_id, sample.source())?;

        let mut known: HashMap<String, HashMap<String, i64>> = HashMap::new();
        {
            let mut stmt = tx.prepare_cached(
                "SELECT f.id, d.name, f.name FROM file f \
                 JOIN directory d ON f.directory_id = d.id WHERE f.sample_id = ?1",
            )?;
            let mut rows = stmt.query(params![sample_id])?;
            while let Some(row) = rows.next()? {
                let id: i64 = row.get(0)?;
                let directory: String = row.get(1)?;
                let name: String = row.get(2)?;
                known.entry(directory).or_default().insert(name, id);
            }
        }

        let mut stats = WriteStats::default();
        {
            let mut update = tx.prepare_cached(
                "UPDATE file SET status = ?1, location = ?2, stage_status = ?3, \
                 size = ?4, entries = ?5, checksum = ?6 WHERE id = ?7",
            )?;
            let mut insert = tx.prepare_cached(
                "INSERT INTO file (name, directory_id, sample_id, status, location, \
                 stage_status, size, entries, checksum) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            let mut directory_ids: HashMap<&str, i64> = HashMap::new();

            for file in sample.files() {
                let size = file.size.map(|v| v as i64);
                let entries = file.entries.map(|v| v as i64);
                let checksum = file.checksum.map(i64::from);
                let existing = known
                    .get_mut(file.dirname())
                    .and_then(|names| names.remove(file.name()));

                match existing {
                    Some(file_id) => {
                        update.execute(params![
                            file.flags.status.as_str(),
                            file.flags.location.as_str(),
                            file.flags.stage_status.as_str(),
                            size,
                            entries,
                            checksum,
                            file_id
                        ])?;
                        stats.updated += 1;
                    }
                    None => {
                        let directory_id = match directory_ids.get(file.dirname()) {
                            Some(id) => *id,
                            None => {
                                let id = intern_name(&tx, "directory", file.dirname())?;
                                directory_ids.insert(file.dirname(), id);
                                id
                            }
                        };
                        insert.execute(params![
                            file.name(),
                            directory_id,
                            sample_id,
                            file.flags.status.as_str(),
                            file.flags.location.as_str(),
                            file.flags.stage_status.as_str(),
                            size,
                            entries,
                            checksum
                        ])?;
                        stats.inserted += 1;
                    }
                }
            }

            let mut delete = tx.prepare_cached("DELETE FROM file WHERE id = ?1")?;
            for file_id in known.into_values().flat_map(|names| names.into_values()) {
                delete.execute(params![file_id])?;
                stats.deleted += 1;
            }
        }

        tx.commit()?;
        debug!(
            "Wrote sample {}: {} inserted, {} updated, {} deleted",
            key, stats.inserted, stats.updated, stats.deleted
        );
        Ok(stats)
    }

    /// Delete a sample; its files and extension row cascade.
    pub fn delete_sample(&self, key: &SampleKey) -> Result<bool> {
        match self.find_sample_row(key)? {
            Some(row) => {
                self.connection()
                    .execute("DELETE FROM sample WHERE id = ?1", params![row.id])?;
                debug!("Deleted sample {}", key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn list_samples(&self) -> Result<Vec<SampleSummary>> {
        let mut stmt = self.connection().prepare(
            "SELECT sp.name, s.name, s.type, COUNT(f.id), COALESCE(SUM(f.size), 0), \
                    s.refreshed_at \
             FROM sample s \
             JOIN samplespath sp ON s.path_id = sp.id \
             LEFT JOIN file f ON f.sample_id = s.id \
             GROUP BY s.id \
             ORDER BY sp.name, s.name",
        )?;
        let samples = stmt
            .query_map([], |row| {
                Ok(SampleSummary {
                    key: SampleKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                    kind: parse_column(row, 2)?,
                    file_count: row.get(3)?,
                    total_size: row.get(4)?,
                    refreshed_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(samples)
    }
}

/// Id of `name` in one of the interned name tables, inserting it when new.
fn intern_name(conn: &Connection, table: &str, name: &str) -> Result<i64> {
    conn.prepare_cached(&format!("INSERT OR IGNORE INTO {} (name) VALUES (?1)", table))?
        .execute(params![name])?;
    conn.prepare_cached(&format!("SELECT id FROM {} WHERE name = ?1", table))?
        .query_row(params![name], |row| row.get(0))
}

fn write_extension(conn: &Connection, sample_id: i64, source: &SampleSource) -> Result<()> {
    conn.execute("DELETE FROM sample_from_das WHERE id = ?1", params![sample_id])?;
    conn.execute("DELETE FROM sample_from_fs WHERE id = ?1", params![sample_id])?;
    match source {
        SampleSource::Plain => {}
        SampleSource::Das { dasname, instance } => {
            conn.execute(
                "INSERT INTO sample_from_das (id, dasname, instance) VALUES (?1, ?2, ?3)",
                params![sample_id, dasname, instance],
            )?;
        }
        SampleSource::Fs { directory, filter } => {
            conn.execute(
                "INSERT INTO sample_from_fs (id, directory, filter) VALUES (?1, ?2, ?3)",
                params![sample_id, directory.to_string_lossy(), filter],
            )?;
        }
    }
    Ok(())
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> Result<T>
where
    T: FromStr<Err = Error>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}
