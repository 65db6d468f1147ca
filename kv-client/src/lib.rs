//! KV session bootstrap/runtime, cluster configuration tracker, retry
//! orchestrator, and command dispatch: the operational core of a Couchbase
//! Key-Value client.

pub mod command;
pub mod observability;
pub mod options;
pub mod retry;
pub mod sasl;
pub mod session;
pub mod tracker;

pub use command::{CommandOptions, CommandRuntime};
pub use observability::Observability;
pub use options::{ClusterOptions, ClusterOptionsBuilder};
pub use session::KvSession;
pub use tracker::{ClusterTracker, Connector, TcpConnector};
