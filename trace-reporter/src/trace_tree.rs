//! Turns the flat list of resolver timings into a tree of field nodes.
//!
//! Node times are nanoseconds on the trace's own clock: the root starts at 0,
//! so a resolver that started `offset` nanoseconds into execution spans
//! `offset..offset + duration`. Adding them to the trace start time gives
//! wall-clock times.
use std::collections::HashMap;

use itertools::Itertools;
use serde::Serialize;

use crate::configuration::Nesting;
use crate::error::Error;
use crate::execution::PathElement;
use crate::execution::ResolverSpan;
use crate::execution::Telemetry;

/// Parent type recorded on the synthetic operation node.
pub const ROOT_PARENT_TYPE: &str = "query";

/// A resolved field, or a list element when `index` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TraceNode {
    pub parent_type: String,
    pub original_field_name: String,
    pub response_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(rename = "type")]
    pub return_type: String,
    pub start_time: u64,
    pub end_time: u64,
    pub children: Vec<TraceNode>,
}

impl TraceNode {
    fn root() -> Self {
        TraceNode {
            parent_type: ROOT_PARENT_TYPE.to_string(),
            ..Default::default()
        }
    }

    fn from_span(span: &ResolverSpan) -> Self {
        let mut node = TraceNode::default();
        node.fill(span);
        node
    }

    fn fill(&mut self, span: &ResolverSpan) {
        self.parent_type = span.parent_type.clone();
        self.original_field_name = span.field_name.clone();
        self.response_name = span.response_name().to_string();
        self.return_type = span.return_type.clone();
        self.start_time = span.start_offset;
        self.end_time = span.start_offset.saturating_add(span.duration);
    }

    /// Number of nodes in this subtree, this one included.
    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(TraceNode::node_count)
            .sum::<usize>()
    }
}

/// Builds [`TraceNode`] trees according to the configured [`Nesting`].
#[derive(Debug, Clone, Copy)]
pub struct TraceTreeBuilder {
    nesting: Nesting,
    max_depth: usize,
}

impl TraceTreeBuilder {
    pub fn new(nesting: Nesting, max_depth: usize) -> Self {
        Self { nesting, max_depth }
    }

    /// Build the tree for one execution.
    ///
    /// The root ends at the later of the execution end and the latest resolver end.
    pub fn build(&self, telemetry: &Telemetry) -> Result<TraceNode, Error> {
        let mut root = match self.nesting {
            Nesting::Flat => flat(&telemetry.resolvers),
            Nesting::PathAware => path_aware(&telemetry.resolvers, self.max_depth)?,
        };
        let latest_end = telemetry
            .resolvers
            .iter()
            .map(|span| span.start_offset.saturating_add(span.duration))
            .max()
            .unwrap_or_default();
        root.end_time = telemetry.duration_nanos().max(latest_end);
        Ok(root)
    }
}

fn flat(spans: &[ResolverSpan]) -> TraceNode {
    let mut root = TraceNode::root();
    root.children = spans.iter().map(TraceNode::from_span).collect();
    root
}

struct Slot {
    node: TraceNode,
    children: Vec<usize>,
}

impl Slot {
    fn new(node: TraceNode) -> Self {
        Self {
            node,
            children: Vec::new(),
        }
    }
}

const ROOT_SLOT: usize = 0;

fn path_aware(spans: &[ResolverSpan], max_depth: usize) -> Result<TraceNode, Error> {
    let mut slots = vec![Slot::new(TraceNode::root())];
    let mut by_path: HashMap<&[PathElement], usize> = HashMap::new();

    for span in spans {
        let path = span.path.as_slice();
        if path.is_empty() {
            attach(&mut slots, ROOT_SLOT, TraceNode::from_span(span));
            continue;
        }
        if path.len() > max_depth {
            return Err(Error::DepthLimitExceeded {
                path: path.iter().join("."),
                depth: path.len(),
                max_depth,
            });
        }
        match by_path.get(path) {
            // A descendant arrived first and left a placeholder behind.
            Some(&slot) => slots[slot].node.fill(span),
            None => {
                let parent = ensure_ancestors(&mut slots, &mut by_path, &path[..path.len() - 1]);
                let slot = attach(&mut slots, parent, TraceNode::from_span(span));
                by_path.insert(path, slot);
            }
        }
    }

    // Depth is bounded by `max_depth`, so this recursion is too.
    Ok(into_tree(&mut slots, ROOT_SLOT))
}

fn attach(slots: &mut Vec<Slot>, parent: usize, node: TraceNode) -> usize {
    let slot = slots.len();
    slots.push(Slot::new(node));
    slots[parent].children.push(slot);
    slot
}

fn ensure_ancestors<'a>(
    slots: &mut Vec<Slot>,
    by_path: &mut HashMap<&'a [PathElement], usize>,
    path: &'a [PathElement],
) -> usize {
    let mut parent = ROOT_SLOT;
    for depth in 1..=path.len() {
        let prefix = &path[..depth];
        parent = match by_path.get(prefix) {
            Some(&slot) => slot,
            None => {
                let placeholder = match &prefix[depth - 1] {
                    PathElement::Index(index) => TraceNode {
                        index: Some(*index),
                        ..Default::default()
                    },
                    PathElement::Key(key) => TraceNode {
                        response_name: key.clone(),
                        ..Default::default()
                    },
                };
                let slot = attach(slots, parent, placeholder);
                by_path.insert(prefix, slot);
                slot
            }
        };
    }
    parent
}

fn into_tree(slots: &mut [Slot], slot: usize) -> TraceNode {
    let children = std::mem::take(&mut slots[slot].children);
    let mut node = std::mem::take(&mut slots[slot].node);
    node.children = children
        .into_iter()
        .map(|child| into_tree(slots, child))
        .collect();
    node
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use std::time::SystemTime;

    use super::*;

    fn key(key: &str) -> PathElement {
        PathElement::Key(key.to_string())
    }

    fn telemetry(duration: u64, resolvers: Vec<ResolverSpan>) -> Telemetry {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_514_764_800);
        Telemetry::new(start, start + Duration::from_nanos(duration), resolvers)
    }

    fn check_invariants(node: &TraceNode) -> u64 {
        assert!(node.end_time >= node.start_time);
        node.children
            .iter()
            .map(check_invariants)
            .fold(node.end_time, u64::max)
    }

    #[test]
    fn flat_attaches_every_span_to_the_root() {
        let spans = vec![
            ResolverSpan::new("Query", "hero", "Character", 100, 2_000),
            ResolverSpan::new("Character", "id", "String", 2_500, 10),
            ResolverSpan::new("Character", "name", "String", 2_600, 40),
        ];
        let root = TraceTreeBuilder::new(Nesting::Flat, 8)
            .build(&telemetry(5_000, spans.clone()))
            .unwrap();

        assert_eq!(root.parent_type, ROOT_PARENT_TYPE);
        assert_eq!(root.children.len(), spans.len());
        for (child, span) in root.children.iter().zip(&spans) {
            assert_eq!(child.start_time, span.start_offset);
            assert_eq!(child.end_time, span.start_offset + span.duration);
            assert_eq!(child.parent_type, span.parent_type);
            assert_eq!(child.original_field_name, span.field_name);
            assert_eq!(child.response_name, span.field_name);
            assert_eq!(child.return_type, span.return_type);
            assert!(child.children.is_empty());
        }
        assert_eq!(root.start_time, 0);
        assert_eq!(root.end_time, 5_000);
    }

    #[test]
    fn flat_ignores_paths_and_keeps_input_order_on_ties() {
        let spans = vec![
            ResolverSpan::new("Query", "b", "Int", 0, 1).with_path([key("b")]),
            ResolverSpan::new("Query", "a", "Int", 0, 1).with_path([key("a")]),
            ResolverSpan::new("Query", "c", "Int", 0, 1),
        ];
        let root = TraceTreeBuilder::new(Nesting::Flat, 8)
            .build(&telemetry(10, spans))
            .unwrap();
        let names: Vec<_> = root
            .children
            .iter()
            .map(|c| c.original_field_name.as_str())
            .collect();
        assert_eq!(names, ["b", "a", "c"]);
    }

    #[test]
    fn root_covers_resolvers_outliving_the_recorded_duration() {
        let spans = vec![ResolverSpan::new("Query", "slow", "Int", 900, 500)];
        let root = TraceTreeBuilder::new(Nesting::Flat, 8)
            .build(&telemetry(1_000, spans))
            .unwrap();
        assert_eq!(root.end_time, 1_400);
        assert_eq!(check_invariants(&root), root.end_time);
    }

    #[test]
    fn no_spans_gives_a_bare_root() {
        let root = TraceTreeBuilder::new(Nesting::PathAware, 8)
            .build(&telemetry(42, Vec::new()))
            .unwrap();
        assert!(root.children.is_empty());
        assert_eq!(root.end_time, 42);
        assert_eq!(root.node_count(), 1);
    }

    #[test]
    fn path_aware_nests_fields() {
        let spans = vec![
            ResolverSpan::new("Query", "user", "User", 0, 5_000_000).with_path([key("user")]),
            ResolverSpan::new("User", "email", "String", 1_000_000, 2_000_000)
                .with_path([key("user"), key("email")]),
        ];
        let root = TraceTreeBuilder::new(Nesting::PathAware, 8)
            .build(&telemetry(5_000_000, spans))
            .unwrap();
        insta::assert_json_snapshot!(root, @r###"
        {
          "parent_type": "query",
          "original_field_name": "",
          "response_name": "",
          "type": "",
          "start_time": 0,
          "end_time": 5000000,
          "children": [
            {
              "parent_type": "Query",
              "original_field_name": "user",
              "response_name": "user",
              "type": "User",
              "start_time": 0,
              "end_time": 5000000,
              "children": [
                {
                  "parent_type": "User",
                  "original_field_name": "email",
                  "response_name": "email",
                  "type": "String",
                  "start_time": 1000000,
                  "end_time": 3000000,
                  "children": []
                }
              ]
            }
          ]
        }
        "###);
    }

    #[test]
    fn path_aware_creates_list_index_nodes() {
        let spans = vec![
            ResolverSpan::new("Query", "users", "[User]", 0, 100).with_path([key("users")]),
            ResolverSpan::new("User", "email", "String", 110, 5).with_path([
                key("users"),
                PathElement::Index(0),
                key("email"),
            ]),
            ResolverSpan::new("User", "email", "String", 120, 5).with_path([
                key("users"),
                PathElement::Index(1),
                key("email"),
            ]),
            ResolverSpan::new("User", "name", "String", 130, 5).with_path([
                key("users"),
                PathElement::Index(0),
                key("name"),
            ]),
        ];
        let root = TraceTreeBuilder::new(Nesting::PathAware, 8)
            .build(&telemetry(200, spans))
            .unwrap();

        assert_eq!(root.children.len(), 1);
        let users = &root.children[0];
        assert_eq!(users.response_name, "users");
        assert_eq!(users.children.len(), 2);
        assert_eq!(users.children[0].index, Some(0));
        assert_eq!(users.children[1].index, Some(1));
        let first: Vec<_> = users.children[0]
            .children
            .iter()
            .map(|c| c.response_name.as_str())
            .collect();
        assert_eq!(first, ["email", "name"]);
        assert_eq!(users.children[1].children[0].start_time, 120);
        assert_eq!(root.node_count(), 7);
        check_invariants(&root);
    }

    #[test]
    fn path_aware_fills_placeholders_when_parents_arrive_late() {
        let spans = vec![
            ResolverSpan::new("User", "email", "String", 10, 5)
                .with_path([key("me"), key("email")]),
            ResolverSpan::new("Query", "user", "User", 0, 20).with_path([key("me")]),
        ];
        let root = TraceTreeBuilder::new(Nesting::PathAware, 8)
            .build(&telemetry(20, spans))
            .unwrap();
        assert_eq!(root.children.len(), 1);
        let me = &root.children[0];
        assert_eq!(me.original_field_name, "user");
        assert_eq!(me.response_name, "me");
        assert_eq!(me.end_time, 20);
        assert_eq!(me.children[0].original_field_name, "email");
    }

    #[test]
    fn path_aware_puts_pathless_spans_under_the_root() {
        let spans = vec![
            ResolverSpan::new("Query", "a", "Int", 0, 1),
            ResolverSpan::new("Query", "b", "Int", 0, 1).with_path([key("b")]),
        ];
        let root = TraceTreeBuilder::new(Nesting::PathAware, 8)
            .build(&telemetry(1, spans))
            .unwrap();
        assert_eq!(root.children.len(), 2);
    }

    #[test]
    fn path_aware_enforces_the_depth_limit() {
        let spans = vec![ResolverSpan::new("A", "c", "Int", 0, 1).with_path([
            key("a"),
            key("b"),
            key("c"),
        ])];
        let err = TraceTreeBuilder::new(Nesting::PathAware, 2)
            .build(&telemetry(1, spans))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DepthLimitExceeded { ref path, depth: 3, max_depth: 2 } if path == "a.b.c"
        ));
    }
}
