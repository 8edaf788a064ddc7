//! `csap-node`: the ExtractionNode HTTP server. A small pool of
//! `tiny_http` handler threads, each owning its own node and its own
//! sqlite appender -- opened lazily per worker per destination and closed
//! at worker exit, which falls naturally out of one `ExtractionNode` per
//! thread rather than one shared behind a lock.

use std::io::Read as _;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tiny_http::{Method, Response, Server};
use tracing_subscriber::EnvFilter;

use csap_extract::appender::SqliteAppender;
use csap_extract::capability::{ErpConnection, ErpConnector};
use csap_extract::config::{NodeArgs, NodeConfig};
use csap_extract::error::{CsapError, CsapResult};
use csap_extract::node::ExtractionNode;
use csap_extract::planner::Unit;
use csap_extract::wire::{ErrorBody, InfoRequest, InfoResponse, MetaRequest, MetaResponse, ReadRequest, ReadResponse};

/// The real ERP RFC client is deliberately out of scope here; this is
/// the injection seam production deployments fill in with their own
/// `ErpConnector`. Every call fails loudly rather than pretending to
/// talk to a backend.
struct UnconfiguredErpConnector;

impl ErpConnector for UnconfiguredErpConnector {
    fn connect(&self, _cnxn_details: &serde_json::Value) -> CsapResult<Box<dyn ErpConnection>> {
        Err(CsapError::NodeUnreachable {
            node: "no ERP backend configured for this csap-node process".to_string(),
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config: NodeConfig = NodeArgs::parse().into();
    let server = Server::http(&config.bind)
        .with_context(|| format!("binding {}", config.bind))?;
    let server = Arc::new(server);
    tracing::info!(bind = %config.bind, threads = config.threads, "csap-node listening");

    let connector: Arc<dyn ErpConnector> = Arc::new(UnconfiguredErpConnector);

    let handles: Vec<_> = (0..config.threads)
        .map(|id| {
            let server = server.clone();
            let connector = connector.clone();
            let db_path = config.db_path.clone();
            thread::spawn(move || {
                let appender = Box::new(SqliteAppender::new(db_path));
                let mut node = ExtractionNode::new(connector, appender);
                loop {
                    match server.recv() {
                        Ok(request) => handle(&mut node, request),
                        Err(e) => {
                            tracing::error!(handler = id, error = %e, "server.recv failed");
                            break;
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

fn handle(node: &mut ExtractionNode, mut request: tiny_http::Request) {
    let method = request.method().clone();
    let url = request.url().to_string();

    let response_result = match (&method, url.as_str()) {
        (Method::Get, "/") => request.respond(Response::from_string("UP")),
        (Method::Get, "/test") => request.respond(Response::empty(200)),
        (Method::Post, "/info") => respond_info(node, &mut request),
        (Method::Post, "/meta") => respond_meta(node, &mut request),
        (Method::Post, "/read") => respond_read(node, &mut request),
        _ => request.respond(Response::empty(404)),
    };

    if let Err(e) = response_result {
        tracing::warn!(url = %url, error = %e, "failed writing HTTP response");
    }
}

fn read_body(request: &mut tiny_http::Request) -> Result<String> {
    let mut body = String::new();
    request.as_reader().read_to_string(&mut body)?;
    Ok(body)
}

fn respond_info(node: &ExtractionNode, request: &mut tiny_http::Request) -> std::io::Result<()> {
    let body = match read_body(request) {
        Ok(b) => b,
        Err(_) => return request.respond(Response::empty(400)),
    };
    let req: InfoRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(_) => return request.respond(Response::empty(400)),
    };

    let (status, data) = node.info(&req.cnxn_details);
    let resp = InfoResponse { status, data };
    request.respond(json_response(200, &resp))
}

fn respond_meta(node: &ExtractionNode, request: &mut tiny_http::Request) -> std::io::Result<()> {
    let body = match read_body(request) {
        Ok(b) => b,
        Err(_) => return request.respond(Response::empty(400)),
    };
    let req: MetaRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(_) => return request.respond(Response::empty(400)),
    };

    match node.meta(&req.cnxn_details, &req.table_name, req.fields, req.sap_buffer_size) {
        Ok((meta_csv, vchunks)) => {
            let resp = MetaResponse { meta_csv, vchunks };
            request.respond(json_response(200, &resp))
        }
        Err(CsapError::FieldTooWide { field, leng, max_bytes }) => {
            let body = ErrorBody {
                message: format!("field {field} ({leng} bytes) exceeds SAP_BUFFER_SIZE ({max_bytes} bytes)"),
                field_too_wide: true,
                field: Some(field),
                leng: Some(leng),
                max_bytes: Some(max_bytes),
            };
            tracing::error!(table = %req.table_name, "field too wide, aborting meta fetch");
            request.respond(json_response(422, &body))
        }
        Err(e) => {
            tracing::error!(table = %req.table_name, error = %e, "meta fetch failed");
            let body = ErrorBody {
                message: e.to_string(),
                field_too_wide: false,
                field: None,
                leng: None,
                max_bytes: None,
            };
            request.respond(json_response(502, &body))
        }
    }
}

fn respond_read(node: &mut ExtractionNode, request: &mut tiny_http::Request) -> std::io::Result<()> {
    let body = match read_body(request) {
        Ok(b) => b,
        Err(_) => return request.respond(Response::empty(400)),
    };
    let req: ReadRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(_) => return request.respond(Response::empty(400)),
    };

    let tag = req.tag.clone().unwrap_or_default();
    let destination = req
        .output_tablename
        .clone()
        .unwrap_or_else(|| format!("csap_{}{}", req.table_name, tag));

    let unit = Unit {
        table: req.table_name.clone(),
        ri: req.ri,
        n: req.n,
        column_chunks: req.vchunks.clone(),
        destination,
        keep: req.keep,
        where_clause: req.r#where.clone(),
        tag,
        cnxn_details: req.cnxn_details.clone(),
    };

    // Unit execution failures return HTTP 200 with STATUS: "FAIL" in the
    // body -- they are not transport errors.
    let resp = match node.read(&unit) {
        Ok((timestamp, count, payload)) => ReadResponse {
            status: "OK".to_string(),
            timestamp,
            count,
            data: payload.and_then(|b| b.to_csv().ok()),
        },
        Err(e) => {
            tracing::warn!(table = %req.table_name, ri = req.ri, n = req.n, error = %e, "unit failed");
            ReadResponse {
                status: "FAIL".to_string(),
                timestamp: csap_extract::node::utc_timestamp(),
                count: 0,
                data: None,
            }
        }
    };

    request.respond(json_response(200, &resp))
}

fn json_response<T: serde::Serialize>(status: u16, body: &T) -> Response<std::io::Cursor<Vec<u8>>> {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    Response::from_data(bytes)
        .with_status_code(status)
        .with_header(tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap())
}
