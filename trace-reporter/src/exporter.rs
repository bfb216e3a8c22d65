//! Background flushing and delivery of reports.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::configuration::Config;
use crate::encoder;
use crate::error::Error;
use crate::report::Report;
use crate::report::ReportAggregator;
use crate::report::ReportHeader;
use crate::report::Trace;
use crate::reporter::Reporter;
use crate::signature::QuerySignature;

/// Accumulates traces and ships them to the collector from background tasks.
///
/// Desired behavior:
/// * Traces are batched and flushed on a timer, or sooner when many pile up.
/// * Drained reports wait in a bounded queue; when it is full they are dropped.
/// * Delivery never blocks recording.
/// * When the exporter shuts down the remaining traces are flushed.
#[derive(Debug)]
pub(crate) struct ReportExporter {
    aggregator: Arc<ReportAggregator>,
    trigger: mpsc::Sender<()>,
    batch_trigger: usize,
    flush_task: JoinHandle<()>,
    send_task: JoinHandle<()>,
}

impl ReportExporter {
    /// Must be called from within a tokio runtime.
    pub(crate) fn new(config: &Config, apollo_key: String) -> Result<Self, Error> {
        let mut header = ReportHeader::new(&config.schema_tag, config.hostname()?);
        header.uname = get_uname()?;
        let reporter = Reporter::builder()
            .endpoint(config.endpoint()?)
            .apollo_key(apollo_key)
            .timeout(config.timeout)
            .max_attempts(config.max_attempts)
            .build()?;
        tracing::info!(endpoint = %reporter.endpoint(), "creating trace exporter");

        let aggregator = Arc::new(ReportAggregator::new(header));
        let (trigger, trigger_rx) = mpsc::channel::<()>(1);
        let (queue, queue_rx) = mpsc::channel::<Report>(config.max_queued_reports);

        let flush_task = tokio::spawn(flush_loop(
            aggregator.clone(),
            trigger_rx,
            queue,
            config.batch_interval,
        ));
        let send_task = tokio::spawn(send_loop(reporter, queue_rx));

        Ok(Self {
            aggregator,
            trigger,
            batch_trigger: config.batch_trigger,
            flush_task,
            send_task,
        })
    }

    pub(crate) fn record(&self, signature: QuerySignature, trace: Trace) {
        let pending = self.aggregator.record_trace(signature, trace);
        // A full channel already has a flush on the way.
        if pending >= self.batch_trigger && self.trigger.try_send(()).is_ok() {
            tracing::trace!(pending, "early flush requested");
        }
    }

    /// Flush whatever is left and wait for delivery to finish.
    pub(crate) async fn shutdown(self) {
        let Self {
            trigger,
            flush_task,
            send_task,
            ..
        } = self;
        drop(trigger);
        for (name, task) in [("flush", flush_task), ("send", send_task)] {
            if let Err(e) = task.await {
                tracing::error!("trace exporter {} task failed: {}", name, e);
            }
        }
    }
}

async fn flush_loop(
    aggregator: Arc<ReportAggregator>,
    mut trigger: mpsc::Receiver<()>,
    queue: mpsc::Sender<Report>,
    batch_interval: Duration,
) {
    let mut interval = tokio::time::interval(batch_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await;
    loop {
        tokio::select! {
            biased;
            flush = trigger.recv() => {
                match flush {
                    Some(()) => tracing::debug!("trace exporter triggered"),
                    None => break,
                }
            }
            _ = interval.tick() => tracing::trace!("trace exporter ticked"),
        }
        enqueue(&queue, aggregator.drain());
    }
    tracing::info!("terminating trace exporter");
    enqueue(&queue, aggregator.drain());
}

/// Queue a drained report for delivery, dropping it when the queue is full.
fn enqueue(queue: &mpsc::Sender<Report>, report: Report) -> bool {
    if report.is_empty() {
        return false;
    }
    let traces = report.trace_count();
    match queue.try_send(report) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                traces,
                "could not queue report for delivery, it will be dropped: {}",
                e
            );
            false
        }
    }
}

async fn send_loop(reporter: Reporter, mut queue: mpsc::Receiver<Report>) {
    while let Some(report) = queue.recv().await {
        send_report(&reporter, report).await;
    }
}

async fn send_report(reporter: &Reporter, report: Report) {
    let traces = report.trace_count();
    let body = match encoder::encode(report) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(traces, "report discarded: {}", e);
            return;
        }
    };
    tracing::info!(traces, "submitting report");
    match reporter.submit(body).await {
        Ok(()) => tracing::debug!("report submission succeeded"),
        Err(e) => tracing::error!(traces, "report submission failed: {}", e),
    }
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn get_uname() -> Result<String, std::io::Error> {
    let u = uname::uname()?;
    Ok(format!(
        "{}, {}, {}, {}, {},",
        u.sysname, u.nodename, u.release, u.version, u.machine
    ))
}

#[cfg(target_os = "windows")]
pub(crate) fn get_uname() -> Result<String, std::io::Error> {
    // Best we can do on windows right now
    let sysname = sys_info::os_type().unwrap_or_else(|_| "Windows".to_owned());
    let nodename = sys_info::hostname().unwrap_or_else(|_| "unknown".to_owned());
    let release = sys_info::os_release().unwrap_or_else(|_| "unknown".to_owned());
    let version = "unknown";
    let machine = "unknown";
    Ok(format!(
        "{}, {}, {}, {}, {}",
        sysname, nodename, release, version, machine
    ))
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use test_log::test;
    use wiremock::matchers::method;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    use super::*;
    use crate::trace_tree::TraceNode;

    fn trace() -> Trace {
        Trace {
            start_time: SystemTime::now(),
            end_time: SystemTime::now(),
            duration_nanos: 0,
            origin_reported_duration_nanos: 0,
            operation_name: "Foo".to_string(),
            client_name: String::new(),
            client_version: String::new(),
            root: TraceNode::default(),
        }
    }

    fn report_with(traces: usize) -> Report {
        let mut report = Report::begin("current", "www.example.com");
        for _ in 0..traces {
            report.record_trace(QuerySignature::new("Foo", "{ foo }"), trace());
        }
        report
    }

    #[test]
    fn full_queue_drops_reports() {
        let (queue, mut queue_rx) = mpsc::channel(1);
        assert!(enqueue(&queue, report_with(1)));
        assert!(!enqueue(&queue, report_with(2)));
        assert_eq!(queue_rx.try_recv().unwrap().trace_count(), 1);
        assert!(queue_rx.try_recv().is_err());
    }

    #[test]
    fn empty_reports_are_never_queued() {
        let (queue, mut queue_rx) = mpsc::channel(1);
        assert!(!enqueue(&queue, report_with(0)));
        assert!(queue_rx.try_recv().is_err());
    }

    fn config(mock_server: &MockServer) -> Config {
        Config {
            hostname: Some("www.example.com".to_string()),
            endpoint: Some(
                format!("{}/api/ingress/traces", mock_server.uri())
                    .parse()
                    .unwrap(),
            ),
            batch_interval: Duration::from_secs(3600),
            batch_trigger: 2,
            ..Default::default()
        }
    }

    #[test(tokio::test)]
    async fn batch_trigger_flushes_early() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let exporter = ReportExporter::new(&config(&mock_server), "key".to_string()).unwrap();
        exporter.record(QuerySignature::new("Foo", "{ foo }"), trace());
        exporter.record(QuerySignature::new("Foo", "{ foo }"), trace());

        for _ in 0..50 {
            if !mock_server.received_requests().await.unwrap_or_default().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(exporter.aggregator.pending(), 0);
        exporter.shutdown().await;
        mock_server.verify().await;
    }

    #[test(tokio::test)]
    async fn shutdown_flushes_remaining_traces() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let exporter = ReportExporter::new(&config(&mock_server), "key".to_string()).unwrap();
        exporter.record(QuerySignature::new("Foo", "{ foo }"), trace());
        exporter.shutdown().await;

        mock_server.verify().await;
        let requests = mock_server.received_requests().await.unwrap();
        let report = encoder::decode(&requests[0].body).unwrap();
        assert_eq!(report.traces_per_query["# Foo\n{ foo }"].trace.len(), 1);
    }
}
