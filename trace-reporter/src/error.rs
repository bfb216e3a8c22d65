//! Trace reporting errors.
//!
//! None of these ever reach the GraphQL client: the pipeline logs them and
//! carries on serving.
use displaydoc::Display;
use thiserror::Error;

/// Errors raised while turning an execution into a report and shipping it.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum Error {
    /// execution of '{operation_name}' carried no resolver timings; is tracing enabled upstream?
    MissingTelemetry {
        /// Name of the operation whose execution had no spans.
        operation_name: String,
    },

    /// resolver path {path} is {depth} levels deep, the limit is {max_depth}
    DepthLimitExceeded {
        /// Rendered response path of the offending span.
        path: String,
        /// Depth of that path.
        depth: usize,
        /// Configured limit.
        max_depth: usize,
    },

    /// query signature must not be empty
    EmptySignature,

    /// could not encode report: {0}
    Encoding(String),

    /// could not decode report: {0}
    Decoding(String),

    /// collector rejected the report with status {status}: {body}
    Rejected {
        /// HTTP status returned by the collector.
        status: u16,
        /// Response body, kept for the logs.
        body: String,
    },

    /// report could not be delivered after {attempts} attempts: {reason}
    TransportFailure {
        /// How many times delivery was attempted.
        attempts: u32,
        /// Last failure seen.
        reason: String,
    },

    /// could not build the collector client: {0}
    Client(#[from] reqwest::Error),

    /// invalid configuration: {0}
    Configuration(String),

    /// I/O error: {0}
    Io(#[from] std::io::Error),
}

impl From<prost::EncodeError> for Error {
    fn from(error: prost::EncodeError) -> Self {
        Error::Encoding(error.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(error: prost::DecodeError) -> Self {
        Error::Decoding(error.to_string())
    }
}

impl From<sys_info::Error> for Error {
    fn from(error: sys_info::Error) -> Self {
        Error::Configuration(error.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Error::Configuration(error.to_string())
    }
}
