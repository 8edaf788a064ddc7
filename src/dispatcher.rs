//! A bounded queue of ready units plus a worker pool, one worker pinned to
//! each healthy node for the run. Bounding the queue gives real
//! backpressure: seeding a table with more units than the queue can hold
//! blocks the seeding call until a worker frees a slot, instead of letting
//! an eager caller balloon memory with work nothing is ready to execute.
//!
//! The refill rule always re-enqueues the *unit it just computed* rather
//! than stale state left over from a previous branch -- a worker that
//! finishes a unit asks its own table first, then falls back to the next
//! incomplete table in the active list, and whichever of those actually
//! produced a unit is the one that gets sent.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::CsapError;
use crate::meta::MetaResolver;
use crate::node::RowBatch;
use crate::node_client::NodeClient;
use crate::planner::{TableHandle, TableRequest, Unit};
use crate::wire::ReadRequest;

enum WorkItem {
    Unit(Arc<TableHandle>, Unit),
    Shutdown,
}

/// One worker per healthy node, pinned for the run's lifetime; `extract`
/// seeds work, `shutdown` drains workers out.
pub struct Dispatcher {
    resolver: MetaResolver,
    nodes: Vec<Arc<NodeClient>>,
    sender: Sender<WorkItem>,
    receiver: Receiver<WorkItem>,
    active: Mutex<Vec<Arc<TableHandle>>>,
}

impl Dispatcher {
    /// `queue_capacity` bounds how many units may be waiting for a worker
    /// at once; callers should size it to cover the parallelism they plan
    /// to seed per table plus one shutdown sentinel per node, or seeding
    /// will simply block until a worker catches up rather than fail.
    pub fn new(node_urls: &[String], deadline: Duration, queue_capacity: usize) -> Self {
        let nodes = node_urls
            .iter()
            .map(|url| Arc::new(NodeClient::new(url.clone(), deadline)))
            .collect();
        let (sender, receiver) = bounded(queue_capacity.max(1));
        Self {
            resolver: MetaResolver::new(),
            nodes,
            sender,
            receiver,
            active: Mutex::new(Vec::new()),
        }
    }

    /// Resolve metadata via `request.meta_node`, add the table to the
    /// active list, and enqueue up to `parallelism` units.
    pub fn extract(
        &self,
        request: TableRequest,
        parallelism: usize,
    ) -> Result<Arc<TableHandle>, CsapError> {
        let source = self
            .nodes
            .iter()
            .find(|n| n.node_url() == request.meta_node)
            .ok_or_else(|| CsapError::NodeUnreachable {
                node: request.meta_node.clone(),
            })?;

        let handle = Arc::new(TableHandle::new(request, &self.resolver, source.as_ref())?);

        self.active.lock().unwrap().push(handle.clone());

        for _ in 0..parallelism {
            match handle.next_unit() {
                Some(unit) => {
                    let _ = self.sender.send(WorkItem::Unit(handle.clone(), unit));
                }
                None => break,
            }
        }

        Ok(handle)
    }

    /// Snapshot of tables currently under this dispatcher's management,
    /// for the `ProgressMonitor` to poll.
    pub fn active_tables(&self) -> Vec<Arc<TableHandle>> {
        self.active.lock().unwrap().clone()
    }

    /// Refill rule's fallback leg: ask the next incomplete table (in
    /// active-list order) for its next unit. Any worker can serve any
    /// table, since metadata lives per-table rather than per-worker, so
    /// work-stealing across tables falls out of this for free.
    fn refill_from_any_table(&self) -> Option<(Arc<TableHandle>, Unit)> {
        let active = self.active.lock().unwrap();
        for table in active.iter() {
            if let Some(unit) = table.next_unit() {
                return Some((table.clone(), unit));
            }
        }
        None
    }

    /// Spawn one worker thread per pinned node. Each worker takes from
    /// the shared queue, executes against its own node, records the
    /// result, and refills before looping.
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.nodes
            .iter()
            .cloned()
            .map(|node| {
                let dispatcher = self.clone();
                let receiver = self.receiver.clone();
                thread::spawn(move || dispatcher.worker_loop(node, receiver))
            })
            .collect()
    }

    fn worker_loop(&self, node: Arc<NodeClient>, receiver: Receiver<WorkItem>) {
        loop {
            let item = match receiver.recv() {
                Ok(item) => item,
                Err(_) => break,
            };

            let (table, unit) = match item {
                WorkItem::Shutdown => break,
                WorkItem::Unit(table, unit) => (table, unit),
            };

            self.execute(&node, &table, unit.clone());
            self.refill(&table);
        }
    }

    fn execute(&self, node: &NodeClient, table: &TableHandle, unit: Unit) {
        let req = ReadRequest {
            cnxn_details: unit.cnxn_details.clone(),
            table_name: unit.table.clone(),
            ri: unit.ri,
            n: unit.n,
            r#where: unit.where_clause.clone(),
            vchunks: unit.column_chunks.clone(),
            sqlalchemy_cnxnstr: None,
            output_tablename: Some(unit.destination.clone()),
            keep: unit.keep,
            tag: Some(unit.tag.clone()),
        };

        match node.read(&req) {
            Ok(resp) if resp.status == "OK" => {
                let payload = resp
                    .data
                    .as_deref()
                    .map(RowBatch::from_csv)
                    .transpose()
                    .unwrap_or_else(|e| {
                        tracing::warn!(table = %unit.table, ri = unit.ri, error = %e, "could not parse kept payload");
                        None
                    });
                tracing::info!(table = %unit.table, ri = unit.ri, n = unit.n, count = resp.count, "unit complete");
                table.record_result(unit, resp.count, resp.timestamp, payload);
            }
            Ok(resp) => {
                tracing::warn!(table = %unit.table, ri = unit.ri, n = unit.n, "unit reported FAIL");
                table.record_failure(unit, format!("node reported FAIL at {}", resp.timestamp));
            }
            Err(e) => {
                tracing::warn!(table = %unit.table, ri = unit.ri, n = unit.n, error = %e, "unit transport failure");
                table.record_failure(unit, e.to_string());
            }
        }
    }

    fn refill(&self, table: &Arc<TableHandle>) {
        if let Some(next) = table.next_unit() {
            let _ = self.sender.send(WorkItem::Unit(table.clone(), next));
            return;
        }
        if let Some((other, unit)) = self.refill_from_any_table() {
            let _ = self.sender.send(WorkItem::Unit(other, unit));
        }
    }

    /// Enqueue one shutdown sentinel per worker, so each worker's final
    /// `recv` observes an explicit stop rather than relying on process
    /// exit to tear the threads down.
    pub fn shutdown(&self) {
        for _ in 0..self.nodes.len().max(1) {
            let _ = self.sender.send(WorkItem::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_rejects_unknown_meta_node() {
        let dispatcher = Dispatcher::new(&[], Duration::from_secs(1), 4);
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
            meta_node: "http://ghost:9".into(),
        };
        let err = dispatcher.extract(request, 1).unwrap_err();
        assert!(matches!(err, CsapError::NodeUnreachable { .. }));
    }

    #[test]
    fn shutdown_enqueues_one_sentinel_per_node() {
        let dispatcher = Dispatcher::new(
            &["http://a".to_string(), "http://b".to_string()],
            Duration::from_secs(1),
            4,
        );
        dispatcher.shutdown();
        let mut shutdowns = 0;
        while let Ok(item) = dispatcher.receiver.try_recv() {
            if matches!(item, WorkItem::Shutdown) {
                shutdowns += 1;
            }
        }
        assert_eq!(shutdowns, 2);
    }
}
