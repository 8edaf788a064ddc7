//! CLI configuration for the crate's two binaries: `clap::Parser` derives
//! the raw flags, a follow-up `From`/`TryFrom` impl turns them into the
//! typed config the rest of the crate consumes, so validation (JSON
//! parsing, clamping to a minimum) happens once at startup instead of
//! being re-checked on every use.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// `csap-node`: one `ExtractionNode` HTTP server.
#[derive(Parser, Debug)]
#[command(name = "csap-node", about = "Run one ExtractionNode server")]
pub struct NodeArgs {
    /// Address to bind the HTTP server to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Path to the sqlite database file the default Appender writes to.
    #[arg(long, default_value = "csap.sqlite")]
    pub db_path: PathBuf,

    /// Number of handler threads, each with its own sqlite connection.
    #[arg(long, default_value_t = default_threads())]
    pub threads: usize,
}

fn default_threads() -> usize {
    num_cpus::get()
}

#[derive(Clone)]
pub struct NodeConfig {
    pub bind: String,
    pub db_path: PathBuf,
    pub threads: usize,
}

impl From<NodeArgs> for NodeConfig {
    fn from(args: NodeArgs) -> Self {
        Self {
            bind: args.bind,
            db_path: args.db_path,
            threads: args.threads.max(1),
        }
    }
}

/// `csap-extract`: the Dispatcher/CLI front end.
#[derive(Parser, Debug)]
#[command(name = "csap-extract", about = "Extract a table across a pool of ExtractionNodes")]
pub struct ExtractArgs {
    /// Extraction node base URLs (repeatable), e.g. `--node http://h1:8080`.
    #[arg(long = "node", required = true)]
    pub nodes: Vec<String>,

    /// Node to resolve this table's metadata against. Defaults to the
    /// first healthy node.
    #[arg(long)]
    pub meta_node: Option<String>,

    /// Table to extract.
    #[arg(long)]
    pub table: String,

    /// Fields to project; omit to take the whole dictionary.
    #[arg(long = "field")]
    pub fields: Vec<String>,

    /// SAP `WHERE`-style filter clause.
    #[arg(long, default_value = "")]
    pub r#where: String,

    /// First row index.
    #[arg(long, default_value_t = 0)]
    pub r0: u64,

    /// Upper row bound (exclusive).
    #[arg(long)]
    pub rmax: u64,

    /// Rows per unit.
    #[arg(long, default_value_t = 10_000)]
    pub n: u64,

    /// Units in flight per table at a time.
    #[arg(long, default_value_t = 4)]
    pub parallelism: usize,

    /// Destination table name override; defaults to `csap_<table><tag>`.
    #[arg(long)]
    pub destination: Option<String>,

    /// Retain unit payloads in memory for `assemble` after the run.
    #[arg(long, default_value_t = false)]
    pub keep: bool,

    /// Disambiguating suffix for the default destination name.
    #[arg(long, default_value = "")]
    pub tag: String,

    /// Connection parameters passed through to the ERP capability,
    /// as a JSON object.
    #[arg(long, default_value = "{}")]
    pub cnxn_details: String,

    /// Per-request HTTP deadline, in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

#[derive(Clone)]
pub struct ExtractConfig {
    pub nodes: Vec<String>,
    pub meta_node: Option<String>,
    pub table: String,
    pub fields: Option<Vec<String>>,
    pub r#where: String,
    pub r0: u64,
    pub rmax: u64,
    pub n: u64,
    pub parallelism: usize,
    pub destination: Option<String>,
    pub keep: bool,
    pub tag: String,
    pub cnxn_details: serde_json::Value,
    pub timeout: Duration,
}

impl TryFrom<ExtractArgs> for ExtractConfig {
    type Error = serde_json::Error;

    fn try_from(args: ExtractArgs) -> Result<Self, Self::Error> {
        let cnxn_details = serde_json::from_str(&args.cnxn_details)?;
        Ok(Self {
            nodes: args.nodes,
            meta_node: args.meta_node,
            table: args.table,
            fields: if args.fields.is_empty() { None } else { Some(args.fields) },
            r#where: args.r#where,
            r0: args.r0,
            rmax: args.rmax,
            n: args.n,
            parallelism: args.parallelism.max(1),
            destination: args.destination,
            keep: args.keep,
            tag: args.tag,
            cnxn_details,
            timeout: Duration::from_secs(args.timeout_secs),
        })
    }
}
