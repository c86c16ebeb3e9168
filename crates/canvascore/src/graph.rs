use crate::GraphError;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Node identifier, unique within one run. Ids come from the canvas
/// editor (e.g. `"node-3"`), not from the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// One unit of work in a workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// Per-type node configuration, tagged the way the canvas serializes it:
/// `{ "id": ..., "type": "crop-image", "data": { "x": 10, ... } }`.
///
/// Unknown keys inside `data` (labels, editor positions) are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum NodeKind {
    Text {
        #[serde(default)]
        text: String,
    },
    UploadImage {
        #[serde(rename = "imageData", default)]
        image_data: Option<String>,
    },
    UploadVideo {
        #[serde(rename = "videoUrl", default)]
        video_url: Option<String>,
    },
    Llm {
        #[serde(default)]
        prompt: Option<String>,
        #[serde(default)]
        temperature: Option<f64>,
    },
    CropImage(CropRect),
    ExtractFrame {
        #[serde(default)]
        timestamp: Timestamp,
    },
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Text { .. } => "text",
            NodeKind::UploadImage { .. } => "upload-image",
            NodeKind::UploadVideo { .. } => "upload-video",
            NodeKind::Llm { .. } => "llm",
            NodeKind::CropImage(_) => "crop-image",
            NodeKind::ExtractFrame { .. } => "extract-frame",
        }
    }
}

/// Crop rectangle in percentages (0-100) of the source dimensions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default = "full_extent")]
    pub width: f64,
    #[serde(default = "full_extent")]
    pub height: f64,
}

fn full_extent() -> f64 {
    100.0
}

impl Default for CropRect {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
        }
    }
}

/// Frame-extraction offset: absolute seconds, or a percentage of the
/// source duration written as `"50%"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Timestamp {
    Seconds(f64),
    Percent(f64),
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp::Seconds(0.0)
    }
}

impl Timestamp {
    /// Resolve to absolute seconds against the source duration.
    pub fn resolve(&self, duration_secs: f64) -> f64 {
        match self {
            Timestamp::Seconds(s) => *s,
            Timestamp::Percent(p) => duration_secs * (p / 100.0),
        }
    }

    pub fn is_percent(&self) -> bool {
        matches!(self, Timestamp::Percent(_))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Timestamp::Seconds(s) => serializer.serialize_f64(*s),
            Timestamp::Percent(p) => serializer.serialize_str(&format!("{}%", p)),
        }
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Timestamp::Seconds(n)),
            Raw::Text(s) => {
                let s = s.trim();
                if let Some(pct) = s.strip_suffix('%') {
                    pct.trim()
                        .parse()
                        .map(Timestamp::Percent)
                        .map_err(serde::de::Error::custom)
                } else {
                    s.parse()
                        .map(Timestamp::Seconds)
                        .map_err(serde::de::Error::custom)
                }
            }
        }
    }
}

/// Semantic input port on a node. Unrecognized handles are preserved but
/// contribute nothing during input resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum TargetHandle {
    SystemPrompt,
    UserMessage,
    Images,
    ImageUrl,
    VideoUrl,
    Other(Option<String>),
}

impl Default for TargetHandle {
    fn default() -> Self {
        TargetHandle::Other(None)
    }
}

impl From<Option<String>> for TargetHandle {
    fn from(raw: Option<String>) -> Self {
        match raw.as_deref() {
            Some("system_prompt-input") => TargetHandle::SystemPrompt,
            Some("user_message-input") => TargetHandle::UserMessage,
            Some("images-input") => TargetHandle::Images,
            Some("image-url-input") => TargetHandle::ImageUrl,
            Some("video-url-input") => TargetHandle::VideoUrl,
            _ => TargetHandle::Other(raw),
        }
    }
}

impl From<TargetHandle> for Option<String> {
    fn from(handle: TargetHandle) -> Self {
        match handle {
            TargetHandle::SystemPrompt => Some("system_prompt-input".to_string()),
            TargetHandle::UserMessage => Some("user_message-input".to_string()),
            TargetHandle::Images => Some("images-input".to_string()),
            TargetHandle::ImageUrl => Some("image-url-input".to_string()),
            TargetHandle::VideoUrl => Some("video-url-input".to_string()),
            TargetHandle::Other(raw) => raw,
        }
    }
}

/// A typed data dependency between two nodes' named ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub source_handle: Option<String>,
    #[serde(default)]
    pub target_handle: TargetHandle,
}

/// Frozen snapshot of a workflow graph, as submitted for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn find_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Edges feeding the given node.
    pub fn incoming<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| &e.target == id)
    }

    /// Structural checks that can run before scheduling. Cycles and
    /// dangling edge endpoints are deliberately NOT rejected here; the
    /// scheduler surfaces them as a runtime deadlock so partially valid
    /// graphs still make as much progress as they can.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(&node.id) {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
        }
        Ok(())
    }

    /// True if the edge set, restricted to nodes actually present,
    /// contains a dependency cycle. Used by tooling to warn ahead of a
    /// run; the engine itself detects cycles as deadlock.
    pub fn has_cycle(&self) -> bool {
        let mut graph = DiGraph::<&NodeId, ()>::new();
        let mut indices = HashMap::new();
        for node in &self.nodes {
            indices.insert(&node.id, graph.add_node(&node.id));
        }
        for edge in &self.edges {
            if let (Some(&from), Some(&to)) = (indices.get(&edge.source), indices.get(&edge.target))
            {
                graph.add_edge(from, to, ());
            }
        }
        toposort(&graph, None).is_err()
    }
}
