//! Protobuf and gzip encoding of drained reports.
use std::io::Read;
use std::io::Write;
use std::time::SystemTime;

use bytes::Bytes;
use bytes::BytesMut;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use prost::Message;

use crate::error::Error;
use crate::proto;
use crate::report::Report;
use crate::trace_tree::TraceNode;

/// Encode `report` as a gzipped protobuf body, stamping it with the current time.
pub fn encode(report: Report) -> Result<Bytes, Error> {
    encode_at(report, SystemTime::now())
}

pub(crate) fn encode_at(report: Report, end_time: SystemTime) -> Result<Bytes, Error> {
    if report.is_empty() {
        return Err(Error::Encoding("report has no traces".to_string()));
    }
    for signature in report.signatures() {
        for trace in report.traces(signature.as_str()) {
            check_node(&trace.root)?;
        }
    }

    let report = report.into_proto(end_time);
    tracing::trace!(signatures = report.traces_per_query.len(), "encoding report");
    // Protobuf encode message
    let mut content = BytesMut::with_capacity(report.encoded_len());
    report.encode(&mut content)?;
    // Create a gzip encoder
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    // Write our content to our encoder
    encoder
        .write_all(&content)
        .map_err(|e| Error::Encoding(e.to_string()))?;
    // Finish encoding and retrieve content
    let compressed_content = encoder
        .finish()
        .map_err(|e| Error::Encoding(e.to_string()))?;
    Ok(Bytes::from(compressed_content))
}

fn check_node(node: &TraceNode) -> Result<(), Error> {
    if node.end_time < node.start_time {
        return Err(Error::Encoding(format!(
            "{}.{} ends before it starts",
            node.parent_type, node.original_field_name
        )));
    }
    node.children.iter().try_for_each(check_node)
}

/// Reverse of [`encode`].
pub fn decode(body: &[u8]) -> Result<proto::Report, Error> {
    let mut gz = GzDecoder::new(body);
    let mut buf = Vec::new();
    gz.read_to_end(&mut buf)
        .map_err(|e| Error::Decoding(e.to_string()))?;
    Ok(proto::Report::decode(buf.as_slice())?)
}
