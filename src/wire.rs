//! JSON shapes for the ExtractionNode HTTP surface. Field names that
//! travel over the wire in SCREAMING_CASE (`STATUS`, `TIMESTAMP`,
//! `COUNT`, `DATA`) are kept exactly as the ERP side expects them.

use serde::{Deserialize, Serialize};

/// Opaque connection parameters, passed through to the ERP capability
/// without the core ever inspecting their shape.
pub type CnxnDetails = serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoRequest {
    pub cnxn_details: CnxnDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub status: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaRequest {
    pub cnxn_details: CnxnDetails,
    pub table_name: String,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub sap_buffer_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaResponse {
    pub meta_csv: String,
    pub vchunks: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    pub cnxn_details: CnxnDetails,
    pub table_name: String,
    pub ri: u64,
    pub n: u64,
    #[serde(default)]
    pub r#where: String,
    pub vchunks: Vec<Vec<String>>,
    #[serde(default)]
    pub sqlalchemy_cnxnstr: Option<String>,
    #[serde(default)]
    pub output_tablename: Option<String>,
    #[serde(default)]
    pub keep: bool,
    #[serde(default)]
    pub tag: Option<String>,
}

/// Body of a non-2xx `/meta` response: lets a caller tell `FieldTooWide`
/// apart from a generic dictionary-fetch failure without inspecting the
/// HTTP status text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(default)]
    pub field_too_wide: bool,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub leng: Option<u32>,
    #[serde(default)]
    pub max_bytes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResponse {
    #[serde(rename = "STATUS")]
    pub status: String,
    #[serde(rename = "TIMESTAMP")]
    pub timestamp: String,
    #[serde(rename = "COUNT")]
    pub count: u64,
    #[serde(rename = "DATA", skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}
