//! Traces grouped by query signature, and the aggregator that batches them.
use std::ops::AddAssign;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::SystemTime;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::Error;
use crate::execution::ExecutionResult;
use crate::proto;
use crate::signature::QuerySignature;
use crate::trace_tree::TraceNode;
use crate::trace_tree::TraceTreeBuilder;

/// Timing record of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub duration_nanos: u64,
    /// Validation time as reported by the engine, zero when unknown.
    pub origin_reported_duration_nanos: u64,
    pub operation_name: String,
    pub client_name: String,
    pub client_version: String,
    pub root: TraceNode,
}

impl Trace {
    /// Extract the resolver timings of `execution` and arrange them into a trace.
    pub fn from_execution(
        execution: &ExecutionResult,
        tree_builder: &TraceTreeBuilder,
    ) -> Result<Self, Error> {
        let telemetry = execution.telemetry()?;
        let root = tree_builder.build(telemetry)?;
        Ok(Trace {
            start_time: telemetry.start_time,
            end_time: telemetry.end_time,
            duration_nanos: telemetry.duration_nanos(),
            origin_reported_duration_nanos: telemetry.validation_duration.unwrap_or_default(),
            operation_name: execution.operation_name.clone(),
            client_name: execution.client_name.clone().unwrap_or_default(),
            client_version: execution.client_version.clone().unwrap_or_default(),
            root,
        })
    }
}

impl From<TraceNode> for proto::trace::Node {
    fn from(node: TraceNode) -> Self {
        let id = match (node.index, node.response_name.is_empty()) {
            (Some(index), _) => Some(proto::trace::node::Id::Index(index)),
            (None, false) => Some(proto::trace::node::Id::ResponseName(node.response_name)),
            (None, true) => None,
        };
        proto::trace::Node {
            id,
            original_field_name: node.original_field_name,
            r#type: node.return_type,
            parent_type: node.parent_type,
            start_time: node.start_time,
            end_time: node.end_time,
            child: node.children.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<Trace> for proto::Trace {
    fn from(trace: Trace) -> Self {
        proto::Trace {
            start_time: Some(trace.start_time.into()),
            end_time: Some(trace.end_time.into()),
            duration_ns: trace.duration_nanos,
            origin_reported_duration_ns: trace.origin_reported_duration_nanos,
            root: Some(trace.root.into()),
            details: Some(proto::trace::Details {
                operation_name: trace.operation_name,
            }),
            client_name: trace.client_name,
            client_version: trace.client_version,
        }
    }
}

/// Identifies the deployment every report comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportHeader {
    pub schema_tag: String,
    pub hostname: String,
    pub agent_version: String,
    pub runtime_version: String,
    pub uname: String,
}

impl ReportHeader {
    pub fn new(schema_tag: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            schema_tag: schema_tag.into(),
            hostname: hostname.into(),
            agent_version: format!(
                "{}@{}",
                std::env!("CARGO_PKG_NAME"),
                std::env!("CARGO_PKG_VERSION")
            ),
            runtime_version: "rust".to_string(),
            uname: String::new(),
        }
    }
}

impl From<ReportHeader> for proto::ReportHeader {
    fn from(header: ReportHeader) -> Self {
        proto::ReportHeader {
            hostname: header.hostname,
            agent_version: header.agent_version,
            runtime_version: header.runtime_version,
            uname: header.uname,
            schema_tag: header.schema_tag,
        }
    }
}

/// A batch of traces, bucketed by query signature in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub header: ReportHeader,
    traces_per_query: IndexMap<QuerySignature, Vec<Trace>>,
}

impl Report {
    /// An empty report for the given deployment.
    pub fn begin(schema_tag: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self::new(ReportHeader::new(schema_tag, hostname))
    }

    pub fn new(header: ReportHeader) -> Self {
        Self {
            header,
            traces_per_query: IndexMap::new(),
        }
    }

    pub fn record_trace(&mut self, signature: QuerySignature, trace: Trace) {
        self.traces_per_query
            .entry(signature)
            .or_default()
            .push(trace);
    }

    pub fn is_empty(&self) -> bool {
        self.traces_per_query.is_empty()
    }

    pub fn trace_count(&self) -> usize {
        self.traces_per_query.values().map(Vec::len).sum()
    }

    pub fn signatures(&self) -> impl Iterator<Item = &QuerySignature> {
        self.traces_per_query.keys()
    }

    /// Traces recorded under `signature`, oldest first.
    pub fn traces(&self, signature: &str) -> &[Trace] {
        self.traces_per_query
            .get(signature)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub(crate) fn into_proto(self, end_time: SystemTime) -> proto::Report {
        proto::Report {
            header: Some(self.header.into()),
            end_time: Some(end_time.into()),
            traces_per_query: self
                .traces_per_query
                .into_iter()
                .map(|(signature, traces)| {
                    (
                        signature.into(),
                        proto::Traces {
                            trace: traces.into_iter().map(Into::into).collect(),
                        },
                    )
                })
                .collect(),
        }
    }
}

impl AddAssign<Report> for Report {
    fn add_assign(&mut self, report: Report) {
        for (signature, mut traces) in report.traces_per_query {
            self.traces_per_query
                .entry(signature)
                .or_default()
                .append(&mut traces);
        }
    }
}

/// Holds the report currently being filled.
///
/// Recording and draining take the same lock, so a drained report never
/// changes afterwards and can be encoded without holding it.
#[derive(Debug)]
pub struct ReportAggregator {
    current: Mutex<Report>,
    pending: AtomicUsize,
}

impl ReportAggregator {
    pub fn new(header: ReportHeader) -> Self {
        Self {
            current: Mutex::new(Report::new(header)),
            pending: AtomicUsize::new(0),
        }
    }

    /// Append `trace` to its signature's bucket.
    ///
    /// Returns how many traces are waiting, this one included.
    pub fn record_trace(&self, signature: QuerySignature, trace: Trace) -> usize {
        let mut current = self.current.lock();
        current.record_trace(signature, trace);
        self.pending.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Swap the current report for an empty one and hand it over.
    pub fn drain(&self) -> Report {
        let mut current = self.current.lock();
        let fresh = Report::new(current.header.clone());
        self.pending.store(0, Ordering::SeqCst);
        std::mem::replace(&mut *current, fresh)
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}
