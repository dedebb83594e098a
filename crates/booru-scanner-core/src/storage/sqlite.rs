use rusqlite::{Connection, Result};
use tracing::debug;

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
        // journal_mode returns a row, so it cannot go through execute_batch
        let _mode: String = self
            .conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        self.conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, foreign keys, 5s busy timeout)");
        Ok(())
    }

    /// Every table is created with IF NOT EXISTS; existing rows are never dropped.
    /// Version 1 databases gain the scanner lease token column.
    fn migrate_schema(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version == 1 {
            self.conn
                .execute_batch("ALTER TABLE scanner ADD COLUMN lease_token TEXT;")?;
        }
        self.conn.execute_batch(include_str!("schema.sql"))?;
        debug!("SQLite schema initialized (version {} -> 2)", version);
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}
