//! The request-path entry point: turn executions into traces and hand them off.
use crate::configuration::Config;
use crate::error::Error;
use crate::execution::ExecutionResult;
use crate::exporter::ReportExporter;
use crate::report::Trace;
use crate::signature::QuerySignature;
use crate::trace_tree::TraceTreeBuilder;

#[derive(Debug)]
enum Sender {
    Noop,
    Exporter(ReportExporter),
}

/// Records one trace per traced execution.
///
/// Reporting never fails the caller: problems with an execution or with
/// delivery are logged and the trace is dropped.
#[derive(Debug)]
pub struct TracingPipeline {
    tree_builder: TraceTreeBuilder,
    sender: Sender,
}

impl TracingPipeline {
    /// Start reporting according to `config`.
    ///
    /// Reporting is turned off when `enabled` is false or no key is available.
    /// Must be called from within a tokio runtime.
    pub fn new(config: &Config) -> Result<Self, Error> {
        config.validate()?;
        let tree_builder = TraceTreeBuilder::new(config.nesting, config.max_depth);
        let sender = match (config.enabled, config.apollo_key()) {
            (false, _) => {
                tracing::info!("trace reporting is disabled");
                Sender::Noop
            }
            (true, None) => {
                tracing::warn!("no APOLLO_KEY set, trace reporting is disabled");
                Sender::Noop
            }
            (true, Some(key)) => Sender::Exporter(ReportExporter::new(config, key)?),
        };
        Ok(Self {
            tree_builder,
            sender,
        })
    }

    /// A pipeline that discards everything.
    pub fn noop() -> Self {
        Self {
            tree_builder: TraceTreeBuilder::new(Default::default(), 0),
            sender: Sender::Noop,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.sender, Sender::Exporter(_))
    }

    /// Record the trace of a finished execution.
    pub fn report_execution(&self, execution: &ExecutionResult) {
        let Sender::Exporter(exporter) = &self.sender else {
            return;
        };
        if execution.is_introspection() {
            tracing::trace!("not tracing introspection");
            return;
        }
        match self.trace(execution) {
            Ok((signature, trace)) => exporter.record(signature, trace),
            Err(e) => tracing::warn!(
                operation_name = %execution.operation_name,
                "dropping trace: {}",
                e
            ),
        }
    }

    fn trace(&self, execution: &ExecutionResult) -> Result<(QuerySignature, Trace), Error> {
        let trace = Trace::from_execution(execution, &self.tree_builder)?;
        let signature = QuerySignature::new(&execution.operation_name, &execution.query);
        Ok((signature, trace))
    }

    /// Flush pending traces and wait until they are delivered or dropped.
    pub async fn shutdown(self) {
        if let Sender::Exporter(exporter) = self.sender {
            exporter.shutdown().await;
        }
    }
}
