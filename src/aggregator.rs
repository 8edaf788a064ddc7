//! Reassembles a completed table's kept unit payloads into a single
//! in-memory batch, in the order units were enqueued.

use std::collections::HashSet;

use crate::error::CsapError;
use crate::node::RowBatch;
use crate::planner::{TableHandle, UnitStatus};

/// Concatenate the payloads of the referenced units in unit-enqueue order,
/// optionally dropping duplicate rows on all columns except the appended
/// `TIMESTAMP`. Only meaningful once the table is fully drained and its
/// units were run with `keep=true` -- otherwise there is nothing to
/// concatenate.
pub fn assemble(
    table: &TableHandle,
    indices: Option<&[usize]>,
    drop_duplicates: bool,
) -> Result<RowBatch, CsapError> {
    if !table.request.keep {
        return Err(CsapError::AppenderFailure {
            table: table.table_name().to_string(),
            ri: 0,
            n: 0,
            reason: "assemble requires keep=true".to_string(),
        });
    }
    if !table.is_complete() {
        return Err(CsapError::AppenderFailure {
            table: table.table_name().to_string(),
            ri: 0,
            n: 0,
            reason: "assemble requires the table to be complete".to_string(),
        });
    }

    let log = table.unit_log();
    let selected: Vec<&_> = match indices {
        None => log.iter().collect(),
        Some(idx) => idx.iter().filter_map(|&i| log.get(i)).collect(),
    };

    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();

    for record in selected {
        if !matches!(record.status, UnitStatus::Ok { .. }) {
            continue;
        }
        let Some(payload) = &record.payload else {
            continue;
        };
        if columns.is_empty() {
            columns = payload.columns.clone();
        }
        rows.extend(payload.rows.iter().cloned());
    }

    if drop_duplicates {
        let ts_idx = columns.iter().position(|c| c == "TIMESTAMP");
        let mut seen: HashSet<Vec<String>> = HashSet::new();
        rows.retain(|row| {
            let key: Vec<String> = row
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != ts_idx)
                .map(|(_, v)| v.clone())
                .collect();
            seen.insert(key)
        });
    }

    Ok(RowBatch { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{TableHandle, TableRequest, Unit};

    fn table(keep: bool) -> TableHandle {
        // Bypasses metadata resolution (`TableHandle::new`), since this
        // module only exercises `assemble` over an already-populated
        // unit log.
        let request = TableRequest {
            table_name: "T".into(),
            projection: None,
            where_clause: String::new(),
            r0: 0,
            rmax: 4,
            n: 2,
            destination: None,
            keep,
            tag: String::new(),
            cnxn_details: serde_json::json!({}),
            meta_node: "nodeA".into(),
        };
        TableHandle::new_for_test(request, vec![vec!["A".to_string()]])
    }

    fn unit(ri: u64, n: u64) -> Unit {
        Unit {
            table: "T".into(),
            ri,
            n,
            column_chunks: vec![vec!["A".to_string()]],
            destination: "csap_T".into(),
            keep: true,
            where_clause: String::new(),
            tag: String::new(),
            cnxn_details: serde_json::json!({}),
        }
    }

    fn batch(rows: &[&str]) -> RowBatch {
        RowBatch {
            columns: vec!["A".to_string(), "TIMESTAMP".to_string()],
            rows: rows
                .iter()
                .map(|v| vec![v.to_string(), "2026-01-01 00:00:00".to_string()])
                .collect(),
        }
    }

    #[test]
    fn requires_keep_and_completeness() {
        let t = table(false);
        assert!(assemble(&t, None, true).is_err());

        let t2 = table(true);
        assert!(assemble(&t2, None, true).is_err());
    }

    #[test]
    fn concatenates_in_enqueue_order_and_dedupes() {
        let t = table(true);
        t.record_result(unit(0, 2), 2, "t1".into(), Some(batch(&["1", "1"])));
        t.record_result(unit(2, 2), 2, "t2".into(), Some(batch(&["2"])));

        let assembled = assemble(&t, None, true).unwrap();
        assert_eq!(assembled.columns, vec!["A".to_string(), "TIMESTAMP".to_string()]);
        // Duplicate "1" row within the first payload collapses to one.
        assert_eq!(assembled.rows.len(), 2);
    }
}
