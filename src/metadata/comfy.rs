//! ComfyUI workflow-graph parser.
//!
//! The embedded `workflow` JSON is a node list plus a link list. Prompts are
//! found by following the sampler's `positive`/`negative` inputs back through
//! the links to the text-encoder nodes feeding them.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

use super::config::ExtractorConfig;

pub type NodeId = i64;
pub type LinkId = i64;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("Workflow is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("No sampler node found")]
    MissingSampler,

    #[error("Sampler node {node} has no linked `{input}` input")]
    UnlinkedInput { node: NodeId, input: &'static str },

    #[error("Could not find sampler's {input} link with id {link}")]
    UnresolvedLink { input: &'static str, link: LinkId },

    #[error("Text encoder nodes not found")]
    MissingEncoder,

    #[error("Sampler's {input} input comes from node {node}, which is not a text encoder")]
    NotAnEncoder { input: &'static str, node: NodeId },

    #[error("Text encoder node {node} has no text in widget slot {slot}")]
    MissingWidget { node: NodeId, slot: usize },
}

/// What a node does in the generation pipeline, decided once per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Sampler,
    Checkpoint,
    TextEncoder,
    Lora,
    Other,
}

/// Substring-based role classification with an exact-match block-list.
#[derive(Debug, Clone)]
pub struct RoleMatcher {
    samplers: Vec<String>,
    checkpoints: Vec<String>,
    encoders: Vec<String>,
    loras: Vec<String>,
    block_list: Vec<String>,
}

impl RoleMatcher {
    pub fn new(config: &ExtractorConfig) -> Self {
        let lower = |names: &[String]| names.iter().map(|n| n.to_lowercase()).collect();
        Self {
            samplers: lower(&config.sampler_types),
            checkpoints: lower(&config.checkpoint_types),
            encoders: lower(&config.encoder_types),
            loras: lower(&config.lora_types),
            block_list: config.block_list.clone(),
        }
    }

    pub fn classify(&self, node_type: &str) -> NodeRole {
        if self.block_list.iter().any(|blocked| blocked == node_type) {
            return NodeRole::Other;
        }
        let lowered = node_type.to_lowercase();
        let matches = |needles: &[String]| needles.iter().any(|n| lowered.contains(n.as_str()));

        // "CLIP" is the loosest needle, so encoders are tried last
        if matches(&self.samplers) {
            NodeRole::Sampler
        } else if matches(&self.checkpoints) {
            NodeRole::Checkpoint
        } else if matches(&self.loras) {
            NodeRole::Lora
        } else if matches(&self.encoders) {
            NodeRole::TextEncoder
        } else {
            NodeRole::Other
        }
    }
}

/// A LoRA reference resolved from a loader node.
#[derive(Debug, Clone, PartialEq)]
pub struct LoraRef {
    pub name: String,
    pub strength: Option<f64>,
}

/// Prompt data resolved from a workflow graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowPrompt {
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub checkpoint: Option<String>,
    pub loras: Vec<LoraRef>,
}

// ---------------------------------------------------------------------------
// Raw JSON shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawWorkflow {
    #[serde(default)]
    nodes: Vec<RawNode>,
    #[serde(default)]
    links: Vec<RawLink>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    id: NodeId,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    mode: i64,
    #[serde(default)]
    inputs: Vec<RawInput>,
    #[serde(default)]
    widgets_values: Value,
    #[serde(default)]
    properties: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawInput {
    name: String,
    #[serde(default)]
    link: Option<LinkId>,
}

/// Links are `[id, origin_id, origin_slot, target_id, target_slot, type]`
/// arrays in most files, objects in newer ones.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLink {
    Array(Vec<Value>),
    Object {
        id: LinkId,
        origin_id: NodeId,
        target_id: NodeId,
    },
}

impl RawLink {
    fn resolve(&self) -> Option<Link> {
        match self {
            RawLink::Array(values) => {
                let int = |i: usize| values.get(i).and_then(Value::as_i64);
                Some(Link {
                    id: int(0)?,
                    source: int(1)?,
                    target: int(3)?,
                })
            }
            RawLink::Object {
                id,
                origin_id,
                target_id,
            } => Some(Link {
                id: *id,
                source: *origin_id,
                target: *target_id,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Classified graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link {
    id: LinkId,
    source: NodeId,
    target: NodeId,
}

#[derive(Debug)]
struct Node {
    id: NodeId,
    role: NodeRole,
    mode: i64,
    inputs: Vec<RawInput>,
    widgets: Vec<Value>,
    properties: Map<String, Value>,
}

impl Node {
    fn widget(&self, slot: usize) -> Option<&Value> {
        self.widgets.get(slot)
    }

    fn input_link(&self, name: &str) -> Option<LinkId> {
        self.inputs
            .iter()
            .find(|input| input.name == name)
            .and_then(|input| input.link)
    }
}

struct Graph {
    nodes: Vec<Node>,
    links: HashMap<LinkId, Link>,
}

impl Graph {
    fn build(raw: RawWorkflow, roles: &RoleMatcher) -> Self {
        let nodes = raw
            .nodes
            .into_iter()
            .map(|node| Node {
                id: node.id,
                role: roles.classify(&node.kind),
                mode: node.mode,
                inputs: node.inputs,
                widgets: match node.widgets_values {
                    Value::Array(values) => values,
                    _ => Vec::new(),
                },
                properties: node.properties,
            })
            .collect();
        let links = raw
            .links
            .iter()
            .filter_map(RawLink::resolve)
            .map(|link| (link.id, link))
            .collect();
        Self { nodes, links }
    }

    fn with_role(&self, role: NodeRole) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |node| node.role == role)
    }
}

/// Widget text: a plain string, or `{"content": "..."}` in some loader variants.
fn widget_text(value: &Value) -> Option<&str> {
    match value {
        Value::String(text) => Some(text),
        Value::Object(map) => map.get("content").and_then(Value::as_str),
        _ => None,
    }
}

fn strip_suffixes(name: &str, suffixes: &[String]) -> String {
    let name = name.trim();
    suffixes
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix.as_str()))
        .unwrap_or(name)
        .to_string()
}

/// Resolve prompts, checkpoint and LoRAs from workflow JSON.
pub fn parse(
    workflow: &str,
    roles: &RoleMatcher,
    config: &ExtractorConfig,
) -> Result<WorkflowPrompt, GraphError> {
    let raw: RawWorkflow =
        serde_json::from_str(workflow).map_err(|e| GraphError::InvalidJson(e.to_string()))?;
    let graph = Graph::build(raw, roles);

    let sampler = graph
        .with_role(NodeRole::Sampler)
        .find(|node| node.mode != config.bypass_mode)
        .or_else(|| graph.with_role(NodeRole::Sampler).next())
        .ok_or(GraphError::MissingSampler)?;

    let encoders: Vec<&Node> = graph.with_role(NodeRole::TextEncoder).collect();
    if encoders.is_empty() {
        return Err(GraphError::MissingEncoder);
    }

    let positive_source = resolve_input(&graph, sampler, "positive")?;
    let negative_source = resolve_input(&graph, sampler, "negative")?;

    let (positive_prompt, negative_prompt) = if let [only] = encoders.as_slice() {
        (encoder_text(only, 0)?, encoder_text(only, 1)?)
    } else {
        let legacy = |node: &Node| {
            node.properties
                .get("Node name for S&R")
                .and_then(Value::as_str)
                == Some(config.legacy_encoder_name.as_str())
        };
        let find = |input: &'static str, source: NodeId| {
            encoders
                .iter()
                .find(|node| node.id == source)
                .copied()
                .ok_or(GraphError::NotAnEncoder { input, node: source })
        };

        // the legacy variant carries an extra leading widget
        let positive = find("positive", positive_source)?;
        let negative = find("negative", negative_source)?;
        (
            encoder_text(positive, if legacy(positive) { 1 } else { 0 })?,
            encoder_text(negative, if legacy(negative) { 2 } else { 0 })?,
        )
    };

    let checkpoint = graph
        .with_role(NodeRole::Checkpoint)
        .find_map(|node| node.widget(0).and_then(widget_text))
        .map(|name| strip_suffixes(name, &config.model_suffixes))
        .filter(|name| !name.is_empty());

    let loras = graph
        .with_role(NodeRole::Lora)
        .filter(|node| node.mode != config.bypass_mode)
        .filter_map(|node| {
            let name = strip_suffixes(node.widget(0).and_then(widget_text)?, &config.model_suffixes);
            (!name.is_empty()).then(|| LoraRef {
                name,
                strength: node.widget(1).and_then(Value::as_f64),
            })
        })
        .collect();

    Ok(WorkflowPrompt {
        positive_prompt,
        negative_prompt,
        checkpoint,
        loras,
    })
}

/// Source node of the link feeding `input` on `node`. A link that points at
/// some other node counts as unresolved.
fn resolve_input(graph: &Graph, node: &Node, input: &'static str) -> Result<NodeId, GraphError> {
    let link = node.input_link(input).ok_or(GraphError::UnlinkedInput {
        node: node.id,
        input,
    })?;
    graph
        .links
        .get(&link)
        .filter(|resolved| resolved.target == node.id)
        .map(|resolved| resolved.source)
        .ok_or(GraphError::UnresolvedLink { input, link })
}

fn encoder_text(node: &Node, slot: usize) -> Result<String, GraphError> {
    node.widget(slot)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(GraphError::MissingWidget { node: node.id, slot })
}
