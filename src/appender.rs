//! The relational sink capability. `SqliteAppender` is this crate's
//! default concrete implementation -- swap in another sink by implementing
//! the trait, no other code needs to change.

use std::path::PathBuf;

use rusqlite::{Connection, ToSql};

use crate::node::RowBatch;

/// Commit batches of at most this many rows per transaction -- keeps a
/// single huge insert from holding one giant uncommitted write open.
const COMMIT_CHUNK_ROWS: usize = 50_000;

pub trait Appender: Send {
    /// Append `batch` to `destination`, creating the table on first write.
    fn append(&mut self, destination: &str, batch: &RowBatch) -> Result<(), String>;
}

/// Opens its sqlite connection lazily on the first `append` and closes it
/// when dropped, so a thread that owns one of these only pays for a
/// connection once it actually has rows to write.
pub struct SqliteAppender {
    db_path: PathBuf,
    connection: Option<Connection>,
}

impl SqliteAppender {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            connection: None,
        }
    }

    fn connection(&mut self) -> Result<&mut Connection, String> {
        if self.connection.is_none() {
            let conn = Connection::open(&self.db_path).map_err(|e| e.to_string())?;
            self.connection = Some(conn);
        }
        Ok(self.connection.as_mut().unwrap())
    }

    fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

impl Appender for SqliteAppender {
    fn append(&mut self, destination: &str, batch: &RowBatch) -> Result<(), String> {
        if batch.columns.is_empty() {
            return Ok(());
        }

        let table = Self::quote_ident(destination);
        let quoted_cols: Vec<String> = batch.columns.iter().map(|c| Self::quote_ident(c)).collect();
        let create_sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table,
            quoted_cols
                .iter()
                .map(|c| format!("{c} TEXT"))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let placeholders: Vec<&str> = quoted_cols.iter().map(|_| "?").collect();
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            quoted_cols.join(", "),
            placeholders.join(", ")
        );

        let conn = self.connection()?;
        conn.execute(&create_sql, []).map_err(|e| e.to_string())?;

        for chunk in batch.rows.chunks(COMMIT_CHUNK_ROWS) {
            let tx = conn.transaction().map_err(|e| e.to_string())?;
            {
                let mut stmt = tx.prepare(&insert_sql).map_err(|e| e.to_string())?;
                for row in chunk {
                    let params: Vec<&dyn ToSql> = row.iter().map(|v| v as &dyn ToSql).collect();
                    stmt.execute(params.as_slice()).map_err(|e| e.to_string())?;
                }
            }
            tx.commit().map_err(|e| e.to_string())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_table_on_first_write_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut appender = SqliteAppender::new(dir.path().join("db.sqlite"));
        let batch = RowBatch {
            columns: vec!["A".into(), "B".into(), "TIMESTAMP".into()],
            rows: vec![
                vec!["1".into(), "x".into(), "2026-01-01 00:00:00".into()],
                vec!["2".into(), "y".into(), "2026-01-01 00:00:01".into()],
            ],
        };
        appender.append("csap_T1", &batch).unwrap();
        appender.append("csap_T1", &batch).unwrap();

        let conn = appender.connection().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM \"csap_T1\"", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 4);
    }
}
