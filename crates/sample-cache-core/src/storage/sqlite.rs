use rusqlite::{Connection, Result};
use tracing::debug;

const SCHEMA_VERSION: i64 = 1;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = DELETE;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -64000;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (rollback journal, 64MB cache)");
        Ok(())
    }

    /// Check schema version and migrate if needed.
    /// Older versions are dropped and recreated; the cache is recomputable.
    fn migrate_schema(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version != 0 && version < SCHEMA_VERSION {
            debug!(
                "Schema version {} < {}, dropping all tables and recreating",
                version, SCHEMA_VERSION
            );
            self.drop_all()?;
        }

        self.conn.execute_batch(include_str!("schema.sql"))?;
        debug!("SQLite schema initialized (version {})", SCHEMA_VERSION);
        Ok(())
    }

    fn drop_all(&self) -> Result<()> {
        self.conn.execute_batch(
            "DROP TABLE IF EXISTS file;
             DROP TABLE IF EXISTS sample_from_fs;
             DROP TABLE IF EXISTS sample_from_das;
             DROP TABLE IF EXISTS sample;
             DROP TABLE IF EXISTS directory;
             DROP TABLE IF EXISTS samplespath;",
        )
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn truncate_all(&self) -> Result<()> {
        self.conn.execute_batch(
            "DELETE FROM file;
             DELETE FROM sample_from_fs;
             DELETE FROM sample_from_das;
             DELETE FROM sample;
             DELETE FROM directory;
             DELETE FROM samplespath;",
        )?;
        debug!("All tables truncated");
        Ok(())
    }
}
