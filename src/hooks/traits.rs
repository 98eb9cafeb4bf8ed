//! Hook mapping types, action descriptors and the transform extension point.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use url::Url;

use super::presets::Preset;
use super::template::Template;

// ── Errors ──────────────────────────────────────────────────────

/// Configuration-time failures. Any of these aborts the whole config load.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown hook preset `{0}`")]
    UnknownPreset(String),
    #[error("invalid hook mapping `{id}`: {reason}")]
    InvalidMapping { id: String, reason: String },
}

/// Per-request failures, captured into [`HookApplyResult::Matched`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookError {
    #[error("hook mapping requires message")]
    MissingMessage,
    #[error("hook mapping requires text")]
    MissingText,
    #[error("failed to load hook transform `{module}`: {reason}")]
    TransformLoad { module: String, reason: String },
    #[error("hook transform `{module}` failed: {reason}")]
    TransformRuntime { module: String, reason: String },
}

// ── Actions ─────────────────────────────────────────────────────

/// Which action a mapping produces when no transform overrides it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookActionKind {
    #[default]
    Agent,
    Wake,
}

/// When a woken agent should act on the event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WakeMode {
    #[default]
    Now,
    NextHeartbeat,
}

/// Run an agent turn with a rendered message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAction {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default)]
    pub wake_mode: WakeMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliver: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// Wake the main session with a short system-event text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeAction {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub mode: WakeMode,
}

/// The typed outcome handed to the downstream dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HookAction {
    Agent(AgentAction),
    Wake(WakeAction),
}

impl HookAction {
    pub fn kind(&self) -> HookActionKind {
        match self {
            Self::Agent(_) => HookActionKind::Agent,
            Self::Wake(_) => HookActionKind::Wake,
        }
    }

    pub fn as_agent(&self) -> Option<&AgentAction> {
        match self {
            Self::Agent(agent) => Some(agent),
            Self::Wake(_) => None,
        }
    }

    pub fn as_wake(&self) -> Option<&WakeAction> {
        match self {
            Self::Wake(wake) => Some(wake),
            Self::Agent(_) => None,
        }
    }
}

// ── Results ─────────────────────────────────────────────────────

/// What a matched mapping produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDispatch {
    Action(HookAction),
    /// The transform recognised the event and chose to produce nothing.
    Skipped,
}

/// Outcome of resolving one inbound request against a rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookApplyResult {
    Unmatched,
    Matched {
        mapping_id: String,
        result: Result<HookDispatch, HookError>,
    },
}

impl HookApplyResult {
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Matched { result: Ok(_), .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            Self::Matched {
                result: Ok(HookDispatch::Skipped),
                ..
            }
        )
    }

    pub fn mapping_id(&self) -> Option<&str> {
        match self {
            Self::Matched { mapping_id, .. } => Some(mapping_id),
            Self::Unmatched => None,
        }
    }

    pub fn action(&self) -> Option<&HookAction> {
        match self {
            Self::Matched {
                result: Ok(HookDispatch::Action(action)),
                ..
            } => Some(action),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&HookError> {
        match self {
            Self::Matched { result: Err(e), .. } => Some(e),
            _ => None,
        }
    }

    /// JSON shape consumed by the HTTP layer: `None` when unmatched,
    /// `{ok:true, action, skipped?}` or `{ok:false, error}` otherwise.
    pub fn to_wire(&self) -> Option<Value> {
        match self {
            Self::Unmatched => None,
            Self::Matched { result, .. } => Some(match result {
                Ok(HookDispatch::Action(action)) => serde_json::json!({
                    "ok": true,
                    "action": action,
                }),
                Ok(HookDispatch::Skipped) => serde_json::json!({
                    "ok": true,
                    "action": null,
                    "skipped": true,
                }),
                Err(e) => serde_json::json!({
                    "ok": false,
                    "error": e.to_string(),
                }),
            }),
        }
    }
}

// ── Request context ─────────────────────────────────────────────

/// The normalized inbound request a rule set is applied to.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub payload: Value,
    /// Header names are expected lower-case; [`HookContext::header`] also
    /// tolerates mixed-case keys.
    pub headers: HashMap<String, String>,
    pub url: Url,
    pub path: String,
}

impl HookContext {
    pub fn new(path: impl Into<String>, url: Url, payload: Value) -> Self {
        Self {
            payload,
            headers: HashMap::new(),
            url,
            path: path.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.headers
                .insert(name.as_ref().to_ascii_lowercase(), value.into());
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let lower = name.to_ascii_lowercase();
        self.headers
            .get(&lower)
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    pub fn query(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Serialized form handed to transform units.
    pub fn to_json(&self) -> Value {
        let headers: BTreeMap<String, String> = self
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        serde_json::json!({
            "payload": self.payload,
            "headers": headers,
            "url": self.url.as_str(),
            "path": self.path,
        })
    }
}

// ── Resolved mappings ───────────────────────────────────────────

/// Reference to an external transform unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransformRef {
    pub module: String,
}

/// How a mapping derives the session key of the actions it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKeyRule {
    Template { template: Template },
    /// `prefix` + value of a request header; unset when the header is absent.
    DeliveryHeader { header: String, prefix: String },
}

/// One resolved routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookMapping {
    pub id: String,
    pub match_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_source: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub match_headers: BTreeMap<String, String>,
    pub action: HookActionKind,
    pub wake_mode: WakeMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<SessionKeyRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_template: Option<Template>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_template: Option<Template>,
    /// Preset whose built-in logic computes the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composer: Option<Preset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliver: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl HookMapping {
    /// A bare agent mapping for `path` with every optional field unset.
    pub fn new(id: impl Into<String>, match_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            match_path: match_path.into(),
            match_source: None,
            match_headers: BTreeMap::new(),
            action: HookActionKind::Agent,
            wake_mode: WakeMode::Now,
            name: None,
            session_key: None,
            message_template: None,
            text_template: None,
            composer: None,
            transform: None,
            agent_id: None,
            model: None,
            thinking: None,
            timeout_seconds: None,
            deliver: None,
            channel: None,
            to: None,
        }
    }
}

/// Ordered, immutable rule set. Position encodes precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookMappings {
    mappings: Vec<HookMapping>,
    transforms_dir: PathBuf,
}

impl HookMappings {
    pub fn new(mappings: Vec<HookMapping>, transforms_dir: PathBuf) -> Self {
        Self {
            mappings,
            transforms_dir,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HookMapping> {
        self.mappings.iter()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn first(&self) -> Option<&HookMapping> {
        self.mappings.first()
    }

    pub fn transforms_dir(&self) -> &Path {
        &self.transforms_dir
    }
}

impl<'a> IntoIterator for &'a HookMappings {
    type Item = &'a HookMapping;
    type IntoIter = std::slice::Iter<'a, HookMapping>;

    fn into_iter(self) -> Self::IntoIter {
        self.mappings.iter()
    }
}

// ── Transform extension point ───────────────────────────────────

/// Code that turns a hook context into an action, or `None` to skip.
///
/// Implemented by sandboxed WebAssembly units loaded from the transforms
/// directory and by native transforms registered on the invoker.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn transform(&self, context: &HookContext) -> Result<Option<HookAction>>;

    fn name(&self) -> &str;
}
