//! First-match selection and action production.

use chrono::{SecondsFormat, Utc};
use std::sync::Arc;

use super::normalize_hook_path;
use super::template::{lookup_segments, stringify, PathSegment, Template, TemplatePath};
use super::traits::{
    AgentAction, HookAction, HookActionKind, HookApplyResult, HookContext, HookDispatch, HookError,
    HookMapping, HookMappings, SessionKeyRule, Transform, WakeAction,
};
use super::transform::TransformInvoker;

/// Applies resolved rule sets to inbound requests.
///
/// The engine owns the transform cache, so one engine should be shared for
/// the lifetime of the gateway.
pub struct HookEngine {
    transforms: TransformInvoker,
}

impl HookEngine {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self::with_invoker(TransformInvoker::new()?))
    }

    pub fn with_invoker(transforms: TransformInvoker) -> Self {
        Self { transforms }
    }

    pub fn transforms(&self) -> &TransformInvoker {
        &self.transforms
    }

    /// Shorthand for [`TransformInvoker::register`].
    pub fn register_transform(&self, module: impl Into<String>, transform: Arc<dyn Transform>) {
        self.transforms.register(module, transform);
    }

    /// Resolve `ctx` against `mappings`.
    ///
    /// Only the first matching mapping is consulted; later mappings on the
    /// same path are never tried, even when the first one fails.
    pub async fn apply(&self, mappings: &HookMappings, ctx: &HookContext) -> HookApplyResult {
        let path = normalize_hook_path(&ctx.path);
        let Some(mapping) = mappings.iter().find(|m| matches(m, &path, ctx)) else {
            tracing::debug!(path = %path, "No hook mapping matched");
            return HookApplyResult::Unmatched;
        };

        tracing::debug!(mapping_id = %mapping.id, path = %path, "Hook mapping matched");
        let result = self.produce(mappings, mapping, ctx).await;
        match &result {
            Ok(HookDispatch::Action(action)) => {
                tracing::debug!(mapping_id = %mapping.id, kind = ?action.kind(), "Hook action produced");
            }
            Ok(HookDispatch::Skipped) => {
                tracing::debug!(mapping_id = %mapping.id, "Hook transform skipped event");
            }
            Err(e) => {
                tracing::warn!(mapping_id = %mapping.id, path = %path, error = %e, "Hook mapping failed");
            }
        }

        HookApplyResult::Matched {
            mapping_id: mapping.id.clone(),
            result,
        }
    }

    async fn produce(
        &self,
        mappings: &HookMappings,
        mapping: &HookMapping,
        ctx: &HookContext,
    ) -> Result<HookDispatch, HookError> {
        let scope = TemplateScope::new(ctx);

        if let Some(transform) = &mapping.transform {
            let produced = self
                .transforms
                .invoke(transform, mappings.transforms_dir(), ctx)
                .await?;
            return match produced {
                None => Ok(HookDispatch::Skipped),
                Some(action) => {
                    let action = merge_defaults(action, mapping, &scope);
                    validate(&action)?;
                    Ok(HookDispatch::Action(action))
                }
            };
        }

        let action = match mapping.action {
            HookActionKind::Agent => {
                let message = mapping
                    .composer
                    .and_then(|preset| preset.compose_message(ctx))
                    .or_else(|| mapping.message_template.as_ref().map(|t| scope.render(t)))
                    .filter(|m| !m.trim().is_empty())
                    .ok_or(HookError::MissingMessage)?;
                HookAction::Agent(AgentAction {
                    message,
                    name: mapping.name.clone(),
                    agent_id: mapping.agent_id.clone(),
                    model: mapping.model.clone(),
                    session_key: session_key(mapping, &scope),
                    wake_mode: mapping.wake_mode,
                    deliver: mapping.deliver,
                    channel: mapping.channel.clone(),
                    to: mapping.to.clone(),
                    thinking: mapping.thinking.clone(),
                    timeout_seconds: mapping.timeout_seconds,
                })
            }
            HookActionKind::Wake => {
                let text = mapping
                    .text_template
                    .as_ref()
                    .or(mapping.message_template.as_ref())
                    .map(|t| scope.render(t))
                    .filter(|t| !t.trim().is_empty())
                    .ok_or(HookError::MissingText)?;
                HookAction::Wake(WakeAction {
                    text,
                    mode: mapping.wake_mode,
                })
            }
        };
        Ok(HookDispatch::Action(action))
    }
}

fn matches(mapping: &HookMapping, path: &str, ctx: &HookContext) -> bool {
    if mapping.match_path != path {
        return false;
    }
    if let Some(source) = &mapping.match_source {
        if ctx.payload.get("source").and_then(|v| v.as_str()) != Some(source.as_str()) {
            return false;
        }
    }
    mapping
        .match_headers
        .iter()
        .all(|(name, expected)| ctx.header(name) == Some(expected.as_str()))
}

fn session_key(mapping: &HookMapping, scope: &TemplateScope<'_>) -> Option<String> {
    let key = match mapping.session_key.as_ref()? {
        SessionKeyRule::Template { template } => scope.render(template),
        SessionKeyRule::DeliveryHeader { header, prefix } => {
            format!("{prefix}{}", scope.ctx.header(header)?)
        }
    };
    let key = key.trim();
    (!key.is_empty()).then(|| key.to_string())
}

/// Fill fields a transform left unset with the mapping's own values.
fn merge_defaults(action: HookAction, mapping: &HookMapping, scope: &TemplateScope<'_>) -> HookAction {
    match action {
        HookAction::Agent(mut agent) => {
            fill(&mut agent.name, &mapping.name);
            fill(&mut agent.agent_id, &mapping.agent_id);
            fill(&mut agent.model, &mapping.model);
            fill(&mut agent.channel, &mapping.channel);
            fill(&mut agent.to, &mapping.to);
            fill(&mut agent.thinking, &mapping.thinking);
            agent.deliver = agent.deliver.or(mapping.deliver);
            agent.timeout_seconds = agent.timeout_seconds.or(mapping.timeout_seconds);
            if agent.session_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
                agent.session_key = session_key(mapping, scope);
            }
            HookAction::Agent(agent)
        }
        wake @ HookAction::Wake(_) => wake,
    }
}

fn fill(slot: &mut Option<String>, fallback: &Option<String>) {
    if slot.as_deref().is_none_or(|v| v.trim().is_empty()) {
        slot.clone_from(fallback);
    }
}

fn validate(action: &HookAction) -> Result<(), HookError> {
    match action {
        HookAction::Agent(agent) if agent.message.trim().is_empty() => Err(HookError::MissingMessage),
        HookAction::Wake(wake) if wake.text.trim().is_empty() => Err(HookError::MissingText),
        _ => Ok(()),
    }
}

// ── Template scope ──────────────────────────────────────────────

/// Resolves template roots against one request.
///
/// `payload`, `headers`, `query`, `path`, `now` and `url` are reserved roots;
/// anything else is looked up in the payload.
struct TemplateScope<'a> {
    ctx: &'a HookContext,
    now: String,
}

impl<'a> TemplateScope<'a> {
    fn new(ctx: &'a HookContext) -> Self {
        Self {
            ctx,
            now: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    fn render(&self, template: &Template) -> String {
        template.render_with(&self.ctx.payload, |path| self.resolve(path))
    }

    fn resolve(&self, path: &TemplatePath) -> Option<String> {
        let segments = path.segments();
        let tail = &segments[1..];
        match (path.root(), tail) {
            ("payload", _) => lookup_segments(tail, &self.ctx.payload).map(stringify),
            ("headers", [PathSegment::Key(name)]) => self.ctx.header(name).map(str::to_string),
            ("query", [PathSegment::Key(name)]) => self.ctx.query(name),
            ("path", []) => Some(self.ctx.path.clone()),
            ("now", []) => Some(self.now.clone()),
            ("url", []) => Some(self.ctx.url.to_string()),
            ("headers" | "query", _) => None,
            _ => path.lookup(&self.ctx.payload).map(stringify),
        }
    }
}
