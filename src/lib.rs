pub mod aggregator;
pub mod appender;
pub mod capability;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod meta;
pub mod node;
pub mod node_client;
pub mod partition;
pub mod planner;
pub mod progress;
pub mod registry;
pub mod wire;

pub use appender::{Appender, SqliteAppender};
pub use capability::{DictRow, ErpConnection, ErpConnector, TableReadResult};
pub use dispatcher::Dispatcher;
pub use error::{CsapError, CsapResult};
pub use meta::{FieldCatalog, MetaFetch, MetaResolver, ResolvedMeta};
pub use node::{ExtractionNode, RowBatch};
pub use node_client::NodeClient;
pub use planner::{TableHandle, TableRequest, Unit, UnitRecord, UnitStatus};
