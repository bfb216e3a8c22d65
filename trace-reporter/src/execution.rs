//! What the GraphQL engine hands over once an operation has executed.
//!
//! Executions can be built in code or read from a GraphQL response carrying
//! the Apollo tracing extension:
//!
//! ```json
//! {
//!   "operationName": "Foo",
//!   "query": "query Foo { user { email } }",
//!   "extensions": {
//!     "tracing": {
//!       "version": 1,
//!       "startTime": "2018-01-01T00:00:00Z",
//!       "endTime": "2018-01-01T00:00:00.005Z",
//!       "duration": 5000000,
//!       "execution": {
//!         "resolvers": [
//!           {
//!             "path": ["user"],
//!             "parentType": "Query",
//!             "fieldName": "user",
//!             "returnType": "User",
//!             "startOffset": 0,
//!             "duration": 5000000
//!           }
//!         ]
//!       }
//!     }
//!   }
//! }
//! ```
use std::fmt;
use std::time::SystemTime;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;

/// Operation name the GraphQL tooling uses to fetch the schema.
pub const INTROSPECTION_OPERATION_NAME: &str = "IntrospectionQuery";

/// One element of a response path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PathElement {
    Index(u32),
    Key(String),
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Index(index) => write!(f, "{index}"),
            PathElement::Key(key) => write!(f, "{key}"),
        }
    }
}

/// Timing of a single resolved field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverSpan {
    /// Response path of the field, absent when the engine does not track it.
    #[serde(default)]
    pub path: Vec<PathElement>,
    pub parent_type: String,
    pub field_name: String,
    pub return_type: String,
    /// Nanoseconds between the start of execution and the start of this resolver.
    pub start_offset: u64,
    /// Nanoseconds spent in this resolver.
    pub duration: u64,
}

impl ResolverSpan {
    pub fn new(
        parent_type: impl Into<String>,
        field_name: impl Into<String>,
        return_type: impl Into<String>,
        start_offset: u64,
        duration: u64,
    ) -> Self {
        Self {
            path: Vec::new(),
            parent_type: parent_type.into(),
            field_name: field_name.into(),
            return_type: return_type.into(),
            start_offset,
            duration,
        }
    }

    pub fn with_path(mut self, path: impl IntoIterator<Item = PathElement>) -> Self {
        self.path = path.into_iter().collect();
        self
    }

    /// The key the field was written under in the response, which differs
    /// from the field name when aliased.
    pub fn response_name(&self) -> &str {
        match self.path.last() {
            Some(PathElement::Key(key)) => key,
            _ => &self.field_name,
        }
    }
}

/// Timings recorded for one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telemetry {
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    /// Spans in the order the engine reported them.
    pub resolvers: Vec<ResolverSpan>,
    /// Nanoseconds the engine spent validating the document, when it says.
    pub validation_duration: Option<u64>,
}

impl Telemetry {
    pub fn new(
        start_time: SystemTime,
        end_time: SystemTime,
        resolvers: Vec<ResolverSpan>,
    ) -> Self {
        Self {
            start_time,
            end_time,
            resolvers,
            validation_duration: None,
        }
    }

    pub fn with_validation_duration(mut self, duration: u64) -> Self {
        self.validation_duration = Some(duration);
        self
    }

    /// Nanoseconds between start and end, zero if the clock went backwards.
    pub fn duration_nanos(&self) -> u64 {
        self.end_time
            .duration_since(self.start_time)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or_default()
    }
}

/// A finished execution as seen by the reporting pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "TracedResponse")]
pub struct ExecutionResult {
    pub operation_name: String,
    /// The query text exactly as the client sent it.
    pub query: String,
    pub client_name: Option<String>,
    pub client_version: Option<String>,
    /// Absent when tracing was not enabled on the engine.
    pub telemetry: Option<Telemetry>,
}

#[buildstructor::buildstructor]
impl ExecutionResult {
    #[builder]
    pub fn new(
        operation_name: String,
        query: String,
        client_name: Option<String>,
        client_version: Option<String>,
        telemetry: Option<Telemetry>,
    ) -> Self {
        Self {
            operation_name,
            query,
            client_name,
            client_version,
            telemetry,
        }
    }

    /// Parse a GraphQL response carrying the Apollo tracing extension.
    pub fn from_json(content: &str) -> Result<Self, Error> {
        serde_json::from_str(content).map_err(|e| Error::Decoding(e.to_string()))
    }

    pub fn is_introspection(&self) -> bool {
        self.operation_name == INTROSPECTION_OPERATION_NAME
    }

    /// Pull the resolver timings out of the execution.
    ///
    /// Fails with [`Error::MissingTelemetry`] when the engine recorded none.
    pub fn telemetry(&self) -> Result<&Telemetry, Error> {
        self.telemetry
            .as_ref()
            .ok_or_else(|| Error::MissingTelemetry {
                operation_name: self.operation_name.clone(),
            })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TracedResponse {
    #[serde(default)]
    operation_name: Option<String>,
    query: String,
    #[serde(default)]
    client_name: Option<String>,
    #[serde(default)]
    client_version: Option<String>,
    #[serde(default)]
    extensions: Extensions,
}

#[derive(Default, Deserialize)]
struct Extensions {
    #[serde(default)]
    tracing: Option<ApolloTracing>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApolloTracing {
    #[serde(with = "humantime_serde")]
    start_time: SystemTime,
    #[serde(with = "humantime_serde")]
    end_time: SystemTime,
    #[serde(default)]
    validation: Option<ApolloTracingPhase>,
    #[serde(default)]
    execution: ApolloTracingExecution,
}

#[derive(Deserialize)]
struct ApolloTracingPhase {
    duration: u64,
}

#[derive(Default, Deserialize)]
struct ApolloTracingExecution {
    #[serde(default)]
    resolvers: Vec<ResolverSpan>,
}

impl From<TracedResponse> for ExecutionResult {
    fn from(response: TracedResponse) -> Self {
        ExecutionResult {
            operation_name: response.operation_name.unwrap_or_default(),
            query: response.query,
            client_name: response.client_name,
            client_version: response.client_version,
            telemetry: response.extensions.tracing.map(|tracing| Telemetry {
                start_time: tracing.start_time,
                end_time: tracing.end_time,
                resolvers: tracing.execution.resolvers,
                validation_duration: tracing.validation.map(|phase| phase.duration),
            }),
        }
    }
}
