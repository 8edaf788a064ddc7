//! The Dispatcher-side HTTP client for the wire protocol -- the
//! counterpart to `ExtractionNode`'s server. Synchronous, like the rest of
//! this crate's concurrency model: no async runtime.
//!
//! This is also the Dispatcher's only path to a table's metadata: it
//! implements `meta::MetaFetch` by calling the node's `/meta` endpoint
//! over HTTP rather than touching the ERP directly.

use std::time::Duration;

use crate::error::CsapError;
use crate::meta::MetaFetch;
use crate::partition::ColumnChunk;
use crate::wire::{ErrorBody, InfoResponse, MetaRequest, MetaResponse, ReadRequest, ReadResponse};

pub struct NodeClient {
    base_url: String,
    agent: ureq::Agent,
}

impl NodeClient {
    pub fn new(base_url: impl Into<String>, deadline: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(deadline)
            .timeout_read(deadline)
            .build();
        Self {
            base_url: base_url.into(),
            agent,
        }
    }

    pub fn node_url(&self) -> &str {
        &self.base_url
    }

    pub fn info(&self, cnxn_details: &serde_json::Value) -> Result<InfoResponse, CsapError> {
        let url = format!("{}/info", self.base_url);
        let body = serde_json::json!({ "cnxn_details": cnxn_details });
        let resp = self
            .agent
            .post(&url)
            .send_json(body)
            .map_err(|e| CsapError::UnitTransportFailure {
                table: String::new(),
                ri: 0,
                n: 0,
                reason: e.to_string(),
            })?;
        resp.into_json().map_err(|e| CsapError::ParseFailure {
            table: String::new(),
            ri: 0,
            n: 0,
            reason: e.to_string(),
        })
    }

    /// `POST /meta`, distinguishing `FieldTooWide` from a generic
    /// `MetaFailure` by parsing the `ErrorBody` carried on a non-2xx
    /// response (`ureq::Error::Status` keeps the response around for
    /// exactly this).
    pub fn meta(
        &self,
        table: &str,
        node: &str,
        req: &MetaRequest,
    ) -> Result<MetaResponse, CsapError> {
        let url = format!("{}/meta", self.base_url);
        match self.agent.post(&url).send_json(serde_json::to_value(req).unwrap()) {
            Ok(resp) => resp.into_json().map_err(|e| CsapError::MetaFailure {
                table: table.to_string(),
                node: node.to_string(),
                reason: e.to_string(),
            }),
            Err(ureq::Error::Status(_code, resp)) => {
                let body: ErrorBody = resp.into_json().unwrap_or(ErrorBody {
                    message: "node returned an error with no parseable body".to_string(),
                    field_too_wide: false,
                    field: None,
                    leng: None,
                    max_bytes: None,
                });
                if body.field_too_wide {
                    Err(CsapError::FieldTooWide {
                        field: body.field.unwrap_or_default(),
                        leng: body.leng.unwrap_or(0),
                        max_bytes: body.max_bytes.unwrap_or(0),
                    })
                } else {
                    Err(CsapError::MetaFailure {
                        table: table.to_string(),
                        node: node.to_string(),
                        reason: body.message,
                    })
                }
            }
            Err(e) => Err(CsapError::MetaFailure {
                table: table.to_string(),
                node: node.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// `POST /read`. Failures the node already caught come back as HTTP
    /// 200 with `STATUS: "FAIL"` in the body -- this client doesn't need
    /// to special-case that here, the caller inspects
    /// `ReadResponse::status`.
    pub fn read(&self, req: &ReadRequest) -> Result<ReadResponse, CsapError> {
        let url = format!("{}/read", self.base_url);
        let resp = self
            .agent
            .post(&url)
            .send_json(serde_json::to_value(req).unwrap())
            .map_err(|e| CsapError::UnitTransportFailure {
                table: req.table_name.clone(),
                ri: req.ri,
                n: req.n,
                reason: e.to_string(),
            })?;
        resp.into_json().map_err(|e| CsapError::ParseFailure {
            table: req.table_name.clone(),
            ri: req.ri,
            n: req.n,
            reason: e.to_string(),
        })
    }
}

impl MetaFetch for NodeClient {
    fn node_name(&self) -> &str {
        &self.base_url
    }

    fn fetch(
        &self,
        cnxn_details: &serde_json::Value,
        table_name: &str,
        fields: Option<&[String]>,
        sap_buffer_size: u32,
    ) -> Result<(String, Vec<ColumnChunk>), CsapError> {
        let req = MetaRequest {
            cnxn_details: cnxn_details.clone(),
            table_name: table_name.to_string(),
            fields: fields.map(|f| f.to_vec()),
            sap_buffer_size: Some(sap_buffer_size),
        };
        let resp = self.meta(table_name, &self.base_url, &req)?;
        Ok((resp.meta_csv, resp.vchunks))
    }
}
