//! Health-probes extraction nodes and drops unreachable ones before a run
//! starts. This reference design never re-probes mid-run -- a node that
//! goes down after the initial sweep is caught by its units failing
//! transport, not by a background health check.

use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// `GET /` is healthy iff the body is the literal string `UP`. Timeouts,
/// connection errors, and non-`UP` bodies are all treated as down.
pub fn probe(node: &str) -> bool {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(PROBE_TIMEOUT)
        .timeout_read(PROBE_TIMEOUT)
        .build();

    match agent.get(node).call() {
        Ok(resp) => match resp.into_string() {
            Ok(body) => {
                let healthy = body == "UP";
                if healthy {
                    tracing::info!(%node, "node is UP");
                } else {
                    tracing::warn!(%node, body = %body, "node responded but not UP");
                }
                healthy
            }
            Err(e) => {
                tracing::warn!(%node, error = %e, "node probe body unreadable");
                false
            }
        },
        Err(e) => {
            tracing::warn!(%node, error = %e, "node probe failed");
            false
        }
    }
}

/// Probe every candidate node and return only the reachable ones, in
/// the order they were given.
pub fn probe_all(nodes: &[String]) -> Vec<String> {
    nodes.iter().filter(|n| probe(n)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_node_is_excluded() {
        // No server bound on this port in a test sandbox; probe must not panic
        // and must report the node down rather than erroring.
        assert!(!probe("http://127.0.0.1:1"));
    }
}
