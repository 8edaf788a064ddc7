use thiserror::Error;

/// Error taxonomy for the extraction core. Unit- and table-scoped
/// failures both flow through this type; only `MetaFailure` and
/// `FieldTooWide` pre-empt unit planning, the rest are local to a unit.
#[derive(Debug, Error, Clone)]
pub enum CsapError {
    #[error("node {node} is unreachable")]
    NodeUnreachable { node: String },

    #[error("metadata fetch failed for table {table} via node {node}: {reason}")]
    MetaFailure {
        table: String,
        node: String,
        reason: String,
    },

    #[error("field {field} ({leng} bytes) exceeds SAP_BUFFER_SIZE ({max_bytes} bytes)")]
    FieldTooWide {
        field: String,
        leng: u32,
        max_bytes: u32,
    },

    #[error("unit ({table}, ri={ri}, n={n}) failed transport: {reason}")]
    UnitTransportFailure {
        table: String,
        ri: u64,
        n: u64,
        reason: String,
    },

    #[error("unit ({table}, ri={ri}, n={n}) has misaligned slices: {reason}")]
    SliceMisalignment {
        table: String,
        ri: u64,
        n: u64,
        reason: String,
    },

    #[error("could not parse response for ({table}, ri={ri}, n={n}): {reason}")]
    ParseFailure {
        table: String,
        ri: u64,
        n: u64,
        reason: String,
    },

    #[error("sink rejected write for ({table}, ri={ri}, n={n}): {reason}")]
    AppenderFailure {
        table: String,
        ri: u64,
        n: u64,
        reason: String,
    },
}

pub type CsapResult<T> = Result<T, CsapError>;
