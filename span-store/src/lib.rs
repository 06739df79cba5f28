//! Write path of a span storage backend: spans go to a time partitioned span table
//! and to four secondary index tables (tag, service name, service+operation, duration).
//!
//! [`exporter::TraceExporter`] is the entry point, everything else is reachable from it.

pub mod config;
pub mod dbmodel;
pub mod exporter;
pub mod indexer;
pub mod metrics;
pub mod schema;
pub mod store;
pub mod writer;


pub use span_structs;
