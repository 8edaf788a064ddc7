//! Observes active tables and emits a single-line textual status per
//! poll; blocks the caller until every active table is complete. Pure
//! observer -- mutates nothing.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::planner::TableHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Poll `tables` until every one reports complete, printing
/// `[<table>: <count> / <rmax>]` on each pass and logging the same
/// fields as a `tracing` event, so the same run can be watched from a
/// terminal or consumed by a log aggregator.
pub fn watch(tables: &[Arc<TableHandle>]) {
    loop {
        let mut all_complete = true;
        for table in tables {
            let count = table.count();
            let rmax = table.rmax();
            let complete = table.is_complete();
            all_complete &= complete;

            println!("[{}: {} / {}]", table.table_name(), count, rmax);
            tracing::info!(table = table.table_name(), count, rmax, complete, "progress");
        }

        if all_complete {
            println!("Done.");
            tracing::info!("all active tables complete");
            return;
        }

        thread::sleep(POLL_INTERVAL);
    }
}
