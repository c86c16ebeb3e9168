use canvascore::{Edge, Node, NodeId, NodeOutput, TargetHandle};
use std::collections::HashMap;

/// Aggregated input bindings for one node, assembled from the outputs of
/// its completed upstream producers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs {
    /// Newline-joined `system_prompt-input` contributions, in edge order.
    pub system_prompt: String,
    /// Newline-joined `user_message-input` contributions, in edge order.
    pub user_message: String,
    /// Images aggregated across every `images-input` edge, in edge order.
    pub images: Vec<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
}

impl ResolvedInputs {
    pub fn system(&self) -> Option<&str> {
        non_empty(&self.system_prompt)
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn first_non_empty<'a>(candidates: [Option<&'a String>; 3]) -> Option<&'a str> {
    candidates
        .into_iter()
        .flatten()
        .find_map(|s| non_empty(s))
}

/// True for values the canvas treats as image references when they arrive
/// over a text edge.
fn looks_like_image_ref(text: &str) -> bool {
    text.starts_with("http") || text.starts_with("data:")
}

/// Compute the input bindings for `node` by tracing its incoming edges to
/// upstream outputs. Edges whose source has not completed yet contribute
/// nothing; the scheduler only selects nodes whose dependencies are all
/// complete, so that never happens on the execution path.
///
/// Pure function: no I/O, no side effects.
pub fn resolve_inputs(
    node: &Node,
    edges: &[Edge],
    outputs: &HashMap<NodeId, NodeOutput>,
) -> ResolvedInputs {
    let mut system_prompts = Vec::new();
    let mut user_messages = Vec::new();
    let mut resolved = ResolvedInputs::default();

    for edge in edges.iter().filter(|e| e.target == node.id) {
        let Some(upstream) = outputs.get(&edge.source) else {
            continue;
        };

        match &edge.target_handle {
            TargetHandle::SystemPrompt => {
                system_prompts.push(upstream.text.clone().unwrap_or_default());
            }
            TargetHandle::UserMessage => {
                user_messages.push(upstream.text.clone().unwrap_or_default());
            }
            TargetHandle::Images => {
                if let Some(output) = upstream.output.as_ref().and_then(|s| non_empty(s)) {
                    resolved.images.push(output.to_string());
                } else if let Some(data) = upstream.image_data.as_ref().and_then(|s| non_empty(s)) {
                    resolved.images.push(data.to_string());
                } else if let Some(images) = &upstream.images {
                    resolved.images.extend(images.iter().cloned());
                } else if let Some(text) = upstream.text.as_ref().and_then(|s| non_empty(s)) {
                    if looks_like_image_ref(text) {
                        resolved.images.push(text.to_string());
                    }
                }
            }
            TargetHandle::ImageUrl => {
                if let Some(candidate) = first_non_empty([
                    upstream.output.as_ref(),
                    upstream.image_data.as_ref(),
                    upstream.text.as_ref(),
                ]) {
                    resolved.image_url = Some(candidate.to_string());
                }
            }
            TargetHandle::VideoUrl => {
                if let Some(candidate) = first_non_empty([
                    upstream.output.as_ref(),
                    upstream.video_url.as_ref(),
                    upstream.text.as_ref(),
                ]) {
                    resolved.video_url = Some(candidate.to_string());
                }
            }
            TargetHandle::Other(_) => {}
        }
    }

    resolved.system_prompt = system_prompts.join("\n");
    resolved.user_message = user_messages.join("\n");
    resolved
}
