//! TableDescriptor + UnitPlanner: turns one table request into a lazy
//! stream of row-range × column-chunk work units, and tracks per-table
//! completion.

use std::sync::Mutex;

use crate::error::CsapError;
use crate::meta::{MetaFetch, MetaResolver};
use crate::partition::{self, ColumnChunk, SAP_BUFFER_SIZE};
use crate::wire::CnxnDetails;

/// A caller's request for one table's worth of rows.
#[derive(Debug, Clone)]
pub struct TableRequest {
    pub table_name: String,
    pub projection: Option<Vec<String>>,
    pub where_clause: String,
    pub r0: u64,
    pub rmax: u64,
    pub n: u64,
    pub destination: Option<String>,
    pub keep: bool,
    pub tag: String,
    pub cnxn_details: CnxnDetails,
    /// Node used to resolve this table's metadata.
    pub meta_node: String,
}

/// One row-range × all-column-chunks unit.
#[derive(Debug, Clone)]
pub struct Unit {
    pub table: String,
    pub ri: u64,
    pub n: u64,
    pub column_chunks: Vec<ColumnChunk>,
    pub destination: String,
    pub keep: bool,
    pub where_clause: String,
    pub tag: String,
    pub cnxn_details: CnxnDetails,
}

#[derive(Debug, Clone)]
pub enum UnitStatus {
    Ok { count: u64, timestamp: String },
    Fail { reason: String },
}

#[derive(Debug, Clone)]
pub struct UnitRecord {
    pub unit: Unit,
    pub status: UnitStatus,
    pub payload: Option<crate::node::RowBatch>,
}

struct Inner {
    ri_next: u64,
    complete: bool,
    count: u64,
    unit_log: Vec<UnitRecord>,
}

/// Owns `ri_next` and completion state for one table. Column chunks are
/// computed once, at construction (the prerequisite gate), and never
/// change afterwards.
pub struct TableHandle {
    pub request: TableRequest,
    pub column_chunks: Vec<ColumnChunk>,
    inner: Mutex<Inner>,
}

impl TableHandle {
    /// Resolve metadata via `request.meta_node` (over HTTP, through
    /// `source`) and partition the projection into column chunks before
    /// any unit can exist. `MetaFailure`/`FieldTooWide` here pre-empt
    /// planning entirely -- no `TableHandle`, no units.
    pub fn new(
        request: TableRequest,
        resolver: &MetaResolver,
        source: &dyn MetaFetch,
    ) -> Result<Self, CsapError> {
        let resolved = resolver.resolve(
            source,
            &request.cnxn_details,
            &request.table_name,
            request.projection.as_deref(),
            SAP_BUFFER_SIZE,
        )?;
        let column_chunks = if resolved.column_chunks.is_empty() {
            let projected = resolved.catalog.project(request.projection.as_deref());
            partition::partition(&projected, SAP_BUFFER_SIZE)?
        } else {
            resolved.column_chunks.clone()
        };
        let ri_next = request.r0;

        Ok(Self {
            request,
            column_chunks,
            inner: Mutex::new(Inner {
                ri_next,
                complete: false,
                count: 0,
                unit_log: Vec::new(),
            }),
        })
    }

    pub fn destination_name(&self) -> String {
        self.request
            .destination
            .clone()
            .unwrap_or_else(|| format!("csap_{}{}", self.request.table_name, self.request.tag))
    }

    /// Returns a new unit covering `[ri_next, ri_next + n)`, capped at
    /// `rmax`, and advances `ri_next`. Returns `None` once `ri_next >=
    /// rmax` or the table is already complete.
    pub fn next_unit(&self) -> Option<Unit> {
        let mut inner = self.inner.lock().unwrap();
        if inner.complete || inner.ri_next >= self.request.rmax {
            return None;
        }

        let ri = inner.ri_next;
        let n = (self.request.n).min(self.request.rmax - ri);
        inner.ri_next += n;

        Some(Unit {
            table: self.request.table_name.clone(),
            ri,
            n,
            column_chunks: self.column_chunks.clone(),
            destination: self.destination_name(),
            keep: self.request.keep,
            where_clause: self.request.where_clause.clone(),
            tag: self.request.tag.clone(),
            cnxn_details: self.request.cnxn_details.clone(),
        })
    }

    /// Record a terminated unit. Completion is monotonic (false→true
    /// only): a short read or reaching `rmax` sets it; nothing resets it.
    pub fn record_result(&self, unit: Unit, count: u64, timestamp: String, payload: Option<crate::node::RowBatch>) {
        let mut inner = self.inner.lock().unwrap();
        inner.count += count;
        if count < unit.n || unit.ri + count >= self.request.rmax {
            inner.complete = true;
        }
        inner.unit_log.push(UnitRecord {
            unit,
            status: UnitStatus::Ok { count, timestamp },
            payload,
        });
    }

    pub fn record_failure(&self, unit: Unit, reason: String) {
        let mut inner = self.inner.lock().unwrap();
        inner.unit_log.push(UnitRecord {
            unit,
            status: UnitStatus::Fail { reason },
            payload: None,
        });
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lock().unwrap().complete
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().unwrap().count
    }

    pub fn rmax(&self) -> u64 {
        self.request.rmax
    }

    pub fn table_name(&self) -> &str {
        &self.request.table_name
    }

    pub fn unit_log(&self) -> Vec<UnitRecord> {
        self.inner.lock().unwrap().unit_log.clone()
    }

    /// Construct a handle with a pre-set catalog, bypassing metadata
    /// resolution -- for tests in other modules (e.g. `aggregator`) that
    /// only need a populated unit log.
    #[cfg(test)]
    pub(crate) fn new_for_test(request: TableRequest, column_chunks: Vec<ColumnChunk>) -> Self {
        let ri_next = request.r0;
        Self {
            request,
            column_chunks,
            inner: Mutex::new(Inner {
                ri_next,
                complete: false,
                count: 0,
                unit_log: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(r0: u64, rmax: u64, n: u64) -> TableHandle {
        TableHandle {
            request: TableRequest {
                table_name: "T".into(),
                projection: None,
                where_clause: String::new(),
                r0,
                rmax,
                n,
                destination: None,
                keep: false,
                tag: String::new(),
                cnxn_details: serde_json::json!({}),
                meta_node: "nodeA".into(),
            },
            column_chunks: vec![vec!["X".to_string()]],
            inner: Mutex::new(Inner {
                ri_next: r0,
                complete: false,
                count: 0,
                unit_log: Vec::new(),
            }),
        }
    }

    #[test]
    fn windows_are_contiguous_and_non_overlapping() {
        let h = handle(0, 30000, 10000);
        let u1 = h.next_unit().unwrap();
        let u2 = h.next_unit().unwrap();
        let u3 = h.next_unit().unwrap();
        assert_eq!((u1.ri, u1.n), (0, 10000));
        assert_eq!((u2.ri, u2.n), (10000, 10000));
        assert_eq!((u3.ri, u3.n), (20000, 10000));
        assert!(h.next_unit().is_none());
    }

    #[test]
    fn large_narrow_table_scenario() {
        // rmax=30000, n=10000: the last unit returns fewer rows than
        // asked for, which alone should mark the table complete.
        let h = handle(0, 30000, 10000);
        let u1 = h.next_unit().unwrap();
        h.record_result(u1, 10000, "t1".into(), None);
        let u2 = h.next_unit().unwrap();
        h.record_result(u2, 10000, "t2".into(), None);
        let u3 = h.next_unit().unwrap();
        h.record_result(u3, 5000, "t3".into(), None);

        assert!(h.is_complete());
        assert_eq!(h.count(), 25000);
        assert_eq!(h.unit_log().len(), 3);
        assert!(h.next_unit().is_none());
    }

    #[test]
    fn early_short_read_stops_planning() {
        // rmax=100000, n=10000: unit 2 comes back short at 3000 rows, well
        // before rmax, and planning must stop there rather than keep going.
        let h = handle(0, 100_000, 10_000);
        let u1 = h.next_unit().unwrap();
        h.record_result(u1, 10_000, "t1".into(), None);
        let u2 = h.next_unit().unwrap();
        h.record_result(u2, 3_000, "t2".into(), None);

        assert!(h.is_complete());
        assert_eq!(h.count(), 13_000);
        assert!(h.next_unit().is_none());
    }

    #[test]
    fn completion_is_monotonic() {
        let h = handle(0, 10_000, 10_000);
        let u1 = h.next_unit().unwrap();
        assert!(!h.is_complete());
        h.record_result(u1, 10_000, "t1".into(), None);
        assert!(h.is_complete());
        assert!(h.is_complete());
    }

    #[test]
    fn default_destination_name_applies_tag() {
        let mut h = handle(0, 1, 1);
        h.request.tag = "_node5000".into();
        assert_eq!(h.destination_name(), "csap_T_node5000");
    }

    struct StubSource {
        node: String,
    }

    impl MetaFetch for StubSource {
        fn node_name(&self) -> &str {
            &self.node
        }

        fn fetch(
            &self,
            _cnxn: &CnxnDetails,
            _table: &str,
            _fields: Option<&[String]>,
            _sap_buffer_size: u32,
        ) -> Result<(String, Vec<ColumnChunk>), CsapError> {
            Ok((
                "FIELDNAME,AS4LOCAL,AS4VERS,POSITION,KEYFLAG,ROLLNAME,CHECKTABLE,INTTYPE,INTLEN,LENG\nA,X,0000,1,X,,,C,10,10\n".to_string(),
                vec![vec!["A".to_string()]],
            ))
        }
    }

    #[test]
    fn new_resolves_metadata_before_any_unit_exists() {
        // A TableHandle carries its column chunks from construction,
        // never empty once `new` succeeds.
        let resolver = MetaResolver::new();
        let source = StubSource { node: "nodeA".into() };
        let request = TableRequest {
            table_name: "T".into(),
            projection: None,
            where_clause: String::new(),
            r0: 0,
            rmax: 10,
            n: 10,
            destination: None,
            keep: false,
            tag: String::new(),
            cnxn_details: serde_json::json!({}),
            meta_node: "nodeA".into(),
        };
        let handle = TableHandle::new(request, &resolver, &source).unwrap();
        assert_eq!(handle.column_chunks, vec![vec!["A".to_string()]]);
    }
}
