//! Turns GraphQL resolver timings into field-level traces and ships them to a
//! usage reporting collector.

#![warn(unreachable_pub)]

pub mod configuration;
pub mod encoder;
pub mod error;
pub mod execution;
mod exporter;
mod pipeline;
pub mod proto;
pub mod report;
pub mod reporter;
pub mod signature;
pub mod trace_tree;

pub use configuration::Config;
pub use error::Error;
pub use execution::ExecutionResult;
pub use pipeline::TracingPipeline;
