//! ExtractionNode: executes one unit against the ERP, stitches the
//! horizontal slices row-wise, timestamps, and commits to the relational
//! sink. Pure logic here; the HTTP surface is wired up in
//! `bin/csap_node.rs`.

use chrono::Utc;

use crate::appender::Appender;
use crate::capability::ErpConnector;
use crate::error::CsapError;
use crate::meta::FieldCatalog;
use crate::partition::{self, ColumnChunk, SAP_BUFFER_SIZE};
use crate::planner::Unit;
use crate::wire::CnxnDetails;

/// A typed table in memory: the concatenation of emitted column chunks
/// plus a trailing `TIMESTAMP` string column.
#[derive(Debug, Clone, Default)]
pub struct RowBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RowBatch {
    pub fn to_csv(&self) -> Result<String, csv::Error> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Parse the `DATA` field of a `/read` response back into a batch --
    /// the Dispatcher-side counterpart of [`RowBatch::to_csv`], used
    /// when a unit was requested with `keep=true`.
    pub fn from_csv(data: &str) -> Result<RowBatch, csv::Error> {
        let mut rdr = csv::Reader::from_reader(data.as_bytes());
        let columns: Vec<String> = rdr.headers()?.iter().map(|s| s.to_string()).collect();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push(record.iter().map(|f| f.to_string()).collect());
        }
        Ok(RowBatch { columns, rows })
    }
}

pub fn utc_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// The node's three operations: probe, resolve metadata, and read+persist
/// one unit.
pub struct ExtractionNode {
    connector: std::sync::Arc<dyn ErpConnector>,
    appender: Box<dyn Appender>,
}

impl ExtractionNode {
    pub fn new(connector: std::sync::Arc<dyn ErpConnector>, appender: Box<dyn Appender>) -> Self {
        Self { connector, appender }
    }

    /// `GET /info` / `POST /info`: probe backend reachability.
    pub fn info(&self, cnxn_details: &CnxnDetails) -> (String, serde_json::Value) {
        match self
            .connector
            .connect(cnxn_details)
            .and_then(|mut conn| conn.ping())
        {
            Ok(data) => ("OK".to_string(), data),
            Err(e) => ("fail".to_string(), serde_json::json!({ "error": e.to_string() })),
        }
    }

    /// `POST /meta`: resolve the catalog and compute column chunks for a
    /// requested projection. This is the one-shot call a Dispatcher uses
    /// to discover `vchunks` for planning; the per-(table, node)
    /// single-flight gate lives on the Dispatcher side (`MetaResolver`),
    /// not here -- the node itself is stateless across requests.
    pub fn meta(
        &self,
        cnxn_details: &CnxnDetails,
        table_name: &str,
        fields: Option<Vec<String>>,
        sap_buffer_size: Option<u32>,
    ) -> Result<(String, Vec<ColumnChunk>), CsapError> {
        let mut conn = self
            .connector
            .connect(cnxn_details)
            .map_err(|e| CsapError::MetaFailure {
                table: table_name.to_string(),
                node: "self".to_string(),
                reason: e.to_string(),
            })?;

        let mut rows = conn
            .meta_read(table_name)
            .map_err(|e| CsapError::MetaFailure {
                table: table_name.to_string(),
                node: "self".to_string(),
                reason: e.to_string(),
            })?;
        rows.retain(|r| r.fieldname != ".INCLUDE");
        rows.sort_by_key(|r| r.position);

        let catalog = FieldCatalog {
            table: table_name.to_string(),
            node: "self".to_string(),
            fields: rows,
        };
        let projected = catalog.project(fields.as_deref());
        let max_bytes = sap_buffer_size.unwrap_or(SAP_BUFFER_SIZE);
        let chunks = partition::partition(&projected, max_bytes)?;
        let meta_csv = catalog.to_csv().map_err(|e| CsapError::ParseFailure {
            table: table_name.to_string(),
            ri: 0,
            n: 0,
            reason: e.to_string(),
        })?;

        Ok((meta_csv, chunks))
    }

    /// `POST /read`: execute one unit and persist it -- open a connection,
    /// read each column chunk, stitch the slices row-wise, stamp the
    /// result, and append it to the sink.
    pub fn read(&mut self, unit: &Unit) -> Result<(String, u64, Option<RowBatch>), CsapError> {
        let mut conn = self
            .connector
            .connect(&unit.cnxn_details)
            .map_err(|e| CsapError::UnitTransportFailure {
                table: unit.table.clone(),
                ri: unit.ri,
                n: unit.n,
                reason: e.to_string(),
            })?;

        let mut stitched: Option<Vec<Vec<String>>> = None;

        for chunk in &unit.column_chunks {
            let result = conn
                .table_read(&unit.table, '|', &unit.where_clause, chunk, unit.n, unit.ri)
                .map_err(|e| CsapError::UnitTransportFailure {
                    table: unit.table.clone(),
                    ri: unit.ri,
                    n: unit.n,
                    reason: e.to_string(),
                })?;

            let split: Vec<Vec<String>> = result
                .rows
                .iter()
                .map(|packed| packed.split('|').map(|f| f.trim().to_string()).collect())
                .collect();

            match &mut stitched {
                None => stitched = Some(split),
                Some(existing) => {
                    if existing.len() != split.len() {
                        return Err(CsapError::SliceMisalignment {
                            table: unit.table.clone(),
                            ri: unit.ri,
                            n: unit.n,
                            reason: format!(
                                "chunk returned {} rows, expected {}",
                                split.len(),
                                existing.len()
                            ),
                        });
                    }
                    for (acc, next) in existing.iter_mut().zip(split.into_iter()) {
                        acc.extend(next);
                    }
                }
            }
        }

        let rows = stitched.unwrap_or_default();
        let count = rows.len() as u64;
        let timestamp = utc_timestamp();

        let mut columns: Vec<String> = unit.column_chunks.iter().flatten().cloned().collect();
        columns.push("TIMESTAMP".to_string());

        let rows_with_ts: Vec<Vec<String>> = rows
            .into_iter()
            .map(|mut r| {
                r.push(timestamp.clone());
                r
            })
            .collect();

        let batch = RowBatch {
            columns,
            rows: rows_with_ts,
        };

        self.appender
            .append(&unit.destination, &batch)
            .map_err(|reason| CsapError::AppenderFailure {
                table: unit.table.clone(),
                ri: unit.ri,
                n: unit.n,
                reason,
            })?;

        Ok((timestamp, count, if unit.keep { Some(batch) } else { None }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appender::Appender;
    use crate::capability::{DictRow, ErpConnection, TableReadResult};

    struct FixtureConn {
        chunk_rows: Vec<Vec<&'static str>>,
        call: std::cell::Cell<usize>,
    }

    impl ErpConnection for FixtureConn {
        fn table_read(
            &mut self,
            _q: &str,
            _d: char,
            _w: &str,
            _fields: &[String],
            _rc: u64,
            _rs: u64,
        ) -> Result<TableReadResult, CsapError> {
            let idx = self.call.get();
            self.call.set(idx + 1);
            let rows = self.chunk_rows[idx].iter().map(|s| s.to_string()).collect();
            Ok(TableReadResult {
                rows,
                field_order: vec![],
            })
        }
        fn meta_read(&mut self, _table: &str) -> Result<Vec<DictRow>, CsapError> {
            unimplemented!()
        }
        fn ping(&mut self) -> Result<serde_json::Value, CsapError> {
            Ok(serde_json::json!({"status": "up"}))
        }
    }

    struct FixtureConnector {
        chunk_rows: Vec<Vec<&'static str>>,
    }
    impl ErpConnector for FixtureConnector {
        fn connect(&self, _cnxn: &CnxnDetails) -> Result<Box<dyn ErpConnection>, CsapError> {
            Ok(Box::new(FixtureConn {
                chunk_rows: self.chunk_rows.clone(),
                call: std::cell::Cell::new(0),
            }))
        }
    }

    #[derive(Default)]
    struct RecordingAppender {
        last: std::cell::RefCell<Option<(String, RowBatch)>>,
    }
    impl Appender for RecordingAppender {
        fn append(&mut self, destination: &str, batch: &RowBatch) -> Result<(), String> {
            *self.last.borrow_mut() = Some((destination.to_string(), batch.clone()));
            Ok(())
        }
    }

    fn unit(column_chunks: Vec<ColumnChunk>) -> Unit {
        Unit {
            table: "T1".into(),
            ri: 0,
            n: 2,
            column_chunks,
            destination: "csap_T1".into(),
            keep: true,
            where_clause: String::new(),
            tag: String::new(),
            cnxn_details: serde_json::json!({}),
        }
    }

    #[test]
    fn stitches_column_chunks_in_order() {
        // Two chunks, each returning aligned rows.
        let connector = std::sync::Arc::new(FixtureConnector {
            chunk_rows: vec![
                vec!["a1|b1", "a2|b2"],
                vec!["c1", "c2"],
            ],
        });
        let appender = Box::new(RecordingAppender::default());
        let mut node = ExtractionNode::new(connector, appender);
        let u = unit(vec![
            vec!["A".to_string(), "B".to_string()],
            vec!["C".to_string()],
        ]);

        let (_, count, payload) = node.read(&u).unwrap();
        assert_eq!(count, 2);
        let batch = payload.unwrap();
        assert_eq!(batch.columns, vec!["A", "B", "C", "TIMESTAMP"]);
        assert_eq!(batch.rows[0][..3], ["a1".to_string(), "b1".to_string(), "c1".to_string()]);
        assert_eq!(batch.rows[1][..3], ["a2".to_string(), "b2".to_string(), "c2".to_string()]);
    }

    #[test]
    fn misaligned_slices_fail_the_unit() {
        let connector = std::sync::Arc::new(FixtureConnector {
            chunk_rows: vec![vec!["a1", "a2"], vec!["c1"]],
        });
        let appender = Box::new(RecordingAppender::default());
        let mut node = ExtractionNode::new(connector, appender);
        let u = unit(vec![vec!["A".to_string()], vec!["C".to_string()]]);

        let err = node.read(&u).unwrap_err();
        assert!(matches!(err, CsapError::SliceMisalignment { .. }));
    }
}
