//! Protobuf messages sent to the collector.
//!
//! Field numbers follow the usage reporting `reports.proto`, restricted to the
//! parts needed for traces.
// prost does not derive `Eq`, see https://github.com/hyperium/tonic/issues/1056
#![allow(clippy::derive_partial_eq_without_eq)]

use std::collections::BTreeMap;

use serde::ser::SerializeStruct;
use serde::Serialize;

pub(crate) fn serialize_timestamp<S>(
    timestamp: &Option<prost_types::Timestamp>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match timestamp {
        Some(ts) => {
            let mut ts_strukt = serializer.serialize_struct("Timestamp", 2)?;
            ts_strukt.serialize_field("seconds", &ts.seconds)?;
            ts_strukt.serialize_field("nanos", &ts.nanos)?;
            ts_strukt.end()
        }
        None => serializer.serialize_none(),
    }
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct ReportHeader {
    #[prost(string, tag = "5")]
    pub hostname: String,
    #[prost(string, tag = "6")]
    pub agent_version: String,
    #[prost(string, tag = "8")]
    pub runtime_version: String,
    #[prost(string, tag = "9")]
    pub uname: String,
    #[prost(string, tag = "10")]
    pub schema_tag: String,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Report {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ReportHeader>,
    /// Stamped when the report is encoded.
    #[prost(message, optional, tag = "2")]
    #[serde(serialize_with = "serialize_timestamp")]
    pub end_time: Option<prost_types::Timestamp>,
    /// Keyed by query signature.
    #[prost(btree_map = "string, message", tag = "5")]
    pub traces_per_query: BTreeMap<String, Traces>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Traces {
    #[prost(message, repeated, tag = "1")]
    pub trace: Vec<Trace>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize)]
pub struct Trace {
    #[prost(message, optional, tag = "4")]
    #[serde(serialize_with = "serialize_timestamp")]
    pub start_time: Option<prost_types::Timestamp>,
    #[prost(message, optional, tag = "3")]
    #[serde(serialize_with = "serialize_timestamp")]
    pub end_time: Option<prost_types::Timestamp>,
    #[prost(uint64, tag = "11")]
    pub duration_ns: u64,
    #[prost(uint64, tag = "17")]
    pub origin_reported_duration_ns: u64,
    #[prost(message, optional, tag = "14")]
    pub root: Option<trace::Node>,
    #[prost(message, optional, tag = "6")]
    pub details: Option<trace::Details>,
    #[prost(string, tag = "7")]
    pub client_name: String,
    #[prost(string, tag = "8")]
    pub client_version: String,
}

pub mod trace {
    use serde::Serialize;

    #[derive(Clone, PartialEq, ::prost::Message, Serialize)]
    pub struct Details {
        #[prost(string, tag = "3")]
        pub operation_name: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message, Serialize)]
    pub struct Node {
        #[prost(oneof = "node::Id", tags = "1, 2")]
        pub id: Option<node::Id>,
        #[prost(string, tag = "14")]
        pub original_field_name: String,
        #[prost(string, tag = "3")]
        pub r#type: String,
        #[prost(string, tag = "13")]
        pub parent_type: String,
        /// Nanoseconds since the start of the trace.
        #[prost(uint64, tag = "8")]
        pub start_time: u64,
        /// Nanoseconds since the start of the trace.
        #[prost(uint64, tag = "9")]
        pub end_time: u64,
        #[prost(message, repeated, tag = "12")]
        pub child: Vec<Node>,
    }

    pub mod node {
        use serde::Serialize;

        #[derive(Clone, PartialEq, ::prost::Oneof, Serialize)]
        pub enum Id {
            #[prost(string, tag = "1")]
            ResponseName(String),
            #[prost(uint32, tag = "2")]
            Index(u32),
        }
    }
}
