//! Fetches and caches the field catalog for a table, with a single-flight
//! gate per (table, node) pair so a burst of workers arriving for the same
//! fresh table triggers exactly one dictionary fetch instead of one per
//! waiting caller.
//!
//! This runs on the Dispatcher side: resolving a table's metadata means
//! going over the wire to an `ExtractionNode`'s `/meta` endpoint, never
//! touching the ERP directly. The node itself resolves the real data
//! dictionary against the ERP -- see `node::ExtractionNode::meta`.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::capability::DictRow;
use crate::error::CsapError;
use crate::partition::ColumnChunk;
use crate::wire::CnxnDetails;

const INCLUDE_ROW: &str = ".INCLUDE";

/// The field catalog for one (table, node): the data dictionary with the
/// synthetic `.INCLUDE` row dropped, ordered by `POSITION`.
#[derive(Debug, Clone)]
pub struct FieldCatalog {
    pub table: String,
    pub node: String,
    pub fields: Vec<DictRow>,
}

impl FieldCatalog {
    /// Resolve a caller's projection against this catalog. `None`
    /// materializes to the full field list in dictionary order;
    /// `Some(fields)` keeps the caller's order -- this is the order that
    /// will later be reassembled by the stitch.
    pub fn project(&self, projection: Option<&[String]>) -> Vec<DictRow> {
        match projection {
            None => self.fields.clone(),
            Some(wanted) => wanted
                .iter()
                .filter_map(|name| {
                    let hit = self.fields.iter().find(|f| &f.fieldname == name).cloned();
                    if hit.is_none() {
                        tracing::warn!(table = %self.table, field = %name, "projected field absent from catalog, skipping");
                    }
                    hit
                })
                .collect(),
        }
    }

    /// Serialize the catalog as CSV with the data-dictionary header, so
    /// that parsing it back reproduces the field catalog that drove the
    /// partition.
    pub fn to_csv(&self) -> Result<String, csv::Error> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.write_record([
            "FIELDNAME",
            "AS4LOCAL",
            "AS4VERS",
            "POSITION",
            "KEYFLAG",
            "ROLLNAME",
            "CHECKTABLE",
            "INTTYPE",
            "INTLEN",
            "LENG",
        ])?;
        for f in &self.fields {
            wtr.write_record([
                f.fieldname.as_str(),
                f.as4local.as_str(),
                f.as4vers.as_str(),
                f.position.to_string().as_str(),
                f.keyflag.as_str(),
                f.rollname.as_str(),
                f.checktable.as_str(),
                f.inttype.as_str(),
                f.intlen.to_string().as_str(),
                f.leng.to_string().as_str(),
            ])?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Parse a `meta_csv` blob back into a field catalog -- the
    /// Dispatcher-side counterpart of [`FieldCatalog::to_csv`].
    pub fn from_csv(table: &str, node: &str, meta_csv: &str) -> Result<FieldCatalog, csv::Error> {
        let mut rdr = csv::Reader::from_reader(meta_csv.as_bytes());
        let mut fields = Vec::new();
        for record in rdr.records() {
            let record = record?;
            fields.push(DictRow {
                fieldname: record.get(0).unwrap_or_default().to_string(),
                as4local: record.get(1).unwrap_or_default().to_string(),
                as4vers: record.get(2).unwrap_or_default().to_string(),
                position: record.get(3).unwrap_or("0").parse().unwrap_or(0),
                keyflag: record.get(4).unwrap_or_default().to_string(),
                rollname: record.get(5).unwrap_or_default().to_string(),
                checktable: record.get(6).unwrap_or_default().to_string(),
                inttype: record.get(7).unwrap_or_default().to_string(),
                intlen: record.get(8).unwrap_or("0").parse().unwrap_or(0),
                leng: record.get(9).unwrap_or("0").parse().unwrap_or(0),
            });
        }
        Ok(FieldCatalog {
            table: table.to_string(),
            node: node.to_string(),
            fields,
        })
    }

    fn drop_include_and_sort(mut rows: Vec<DictRow>) -> Vec<DictRow> {
        rows.retain(|r| r.fieldname != INCLUDE_ROW);
        rows.sort_by_key(|r| r.position);
        rows
    }
}

/// What came back from a table's `/meta` endpoint: the catalog that
/// drove the partition, plus the column chunks the node already
/// computed from it.
#[derive(Debug, Clone)]
pub struct ResolvedMeta {
    pub catalog: FieldCatalog,
    pub column_chunks: Vec<ColumnChunk>,
}

/// A node reachable for metadata resolution -- implemented by
/// `node_client::NodeClient` for the real HTTP path, and by a fixture in
/// tests.
pub trait MetaFetch: Send + Sync {
    fn node_name(&self) -> &str;

    fn fetch(
        &self,
        cnxn_details: &CnxnDetails,
        table_name: &str,
        fields: Option<&[String]>,
        sap_buffer_size: u32,
    ) -> Result<(String, Vec<ColumnChunk>), CsapError>;
}

#[derive(Clone)]
enum GateState {
    Pending,
    Success(Arc<ResolvedMeta>),
}

/// Single-flight (table, node) metadata gate. `MISSING` is represented by
/// the absence of a map entry.
pub struct MetaResolver {
    states: Mutex<HashMap<(String, String), GateState>>,
    condvar: Condvar,
}

impl Default for MetaResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaResolver {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            condvar: Condvar::new(),
        }
    }

    /// Resolve the catalog for `table` via `source`, blocking concurrent
    /// callers on the same key until the in-flight fetch succeeds or
    /// fails.
    pub fn resolve(
        &self,
        source: &dyn MetaFetch,
        cnxn_details: &CnxnDetails,
        table: &str,
        fields: Option<&[String]>,
        sap_buffer_size: u32,
    ) -> Result<Arc<ResolvedMeta>, CsapError> {
        let key = (table.to_string(), source.node_name().to_string());
        let mut guard = self.states.lock().unwrap();
        loop {
            match guard.get(&key).cloned() {
                Some(GateState::Success(resolved)) => return Ok(resolved),
                Some(GateState::Pending) => {
                    guard = self.condvar.wait(guard).unwrap();
                }
                None => {
                    guard.insert(key.clone(), GateState::Pending);
                    drop(guard);

                    let result = Self::fetch(source, cnxn_details, table, fields, sap_buffer_size);

                    let mut guard2 = self.states.lock().unwrap();
                    return match result {
                        Ok(resolved) => {
                            let arc = Arc::new(resolved);
                            guard2.insert(key.clone(), GateState::Success(arc.clone()));
                            self.condvar.notify_all();
                            Ok(arc)
                        }
                        Err(e) => {
                            guard2.remove(&key);
                            self.condvar.notify_all();
                            Err(e)
                        }
                    };
                }
            }
        }
    }

    fn fetch(
        source: &dyn MetaFetch,
        cnxn_details: &CnxnDetails,
        table: &str,
        fields: Option<&[String]>,
        sap_buffer_size: u32,
    ) -> Result<ResolvedMeta, CsapError> {
        let (meta_csv, column_chunks) =
            source.fetch(cnxn_details, table, fields, sap_buffer_size)?;

        let catalog = FieldCatalog::from_csv(table, source.node_name(), &meta_csv).map_err(|e| {
            CsapError::ParseFailure {
                table: table.to_string(),
                ri: 0,
                n: 0,
                reason: e.to_string(),
            }
        })?;
        let catalog = FieldCatalog {
            fields: FieldCatalog::drop_include_and_sort(catalog.fields),
            ..catalog
        };

        Ok(ResolvedMeta {
            catalog,
            column_chunks,
        })
    }
}
