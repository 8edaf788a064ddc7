//! The ERP capabilities this crate treats as injected and external: a
//! table read, a metadata read, and a liveness ping, all bundled behind
//! one scoped connection so a caller can guarantee release on every exit
//! path -- success, error, or panic -- by just letting the box drop.

use crate::error::CsapResult;
use crate::wire::CnxnDetails;

/// One data-dictionary row: a field's name, byte length, and the handful
/// of attributes needed to reconstruct and partition a table's catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct DictRow {
    pub fieldname: String,
    pub as4local: String,
    pub as4vers: String,
    pub position: u32,
    pub keyflag: String,
    pub rollname: String,
    pub checktable: String,
    pub inttype: String,
    pub intlen: u32,
    pub leng: u32,
}

/// Result of a single `READ_TABLE` call: packed rows plus the field
/// order the ERP used to assemble them.
#[derive(Debug, Clone)]
pub struct TableReadResult {
    pub rows: Vec<String>,
    pub field_order: Vec<String>,
}

/// A single, scoped connection to the ERP. Implementations open
/// whatever transport `cnxn_details` describes and must release it when
/// dropped.
pub trait ErpConnection: Send {
    fn table_read(
        &mut self,
        query_table: &str,
        delimiter: char,
        where_clause: &str,
        fields: &[String],
        row_count: u64,
        row_skips: u64,
    ) -> CsapResult<TableReadResult>;

    fn meta_read(&mut self, table_name: &str) -> CsapResult<Vec<DictRow>>;

    fn ping(&mut self) -> CsapResult<serde_json::Value>;
}

/// Opens an [`ErpConnection`] for the duration of one node operation.
pub trait ErpConnector: Send + Sync {
    fn connect(&self, cnxn_details: &CnxnDetails) -> CsapResult<Box<dyn ErpConnection>>;
}
