//! Merge explicit mappings and presets into one ordered rule set.

use std::collections::BTreeMap;

use super::presets::definitions_for;
use super::template::Template;
use super::traits::{HookMapping, HookMappings, ResolveError, SessionKeyRule};
use crate::config::{default_transforms_dir, HookMappingConfig, HooksConfig};

/// Strip surrounding whitespace and slashes: `/gmail/` → `gmail`.
pub fn normalize_hook_path(path: &str) -> String {
    path.trim().trim_matches('/').trim().to_string()
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Pass-through fields keep their exact value; only blank ones are dropped.
fn verbatim(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

/// Explicit mappings in declaration order, then presets in listed order.
///
/// No de-duplication happens: an explicit mapping on the same path as a
/// preset wins purely by position.
pub fn resolve_hook_mappings(config: &HooksConfig) -> Result<HookMappings, ResolveError> {
    let mut mappings = config
        .mappings
        .iter()
        .enumerate()
        .map(|(index, mapping)| mapping_from_config(index, mapping))
        .collect::<Result<Vec<_>, _>>()?;

    mappings.extend(definitions_for(&config.presets)?);

    let transforms_dir = config
        .transforms_dir
        .clone()
        .unwrap_or_else(default_transforms_dir);

    Ok(HookMappings::new(mappings, transforms_dir))
}

fn mapping_from_config(index: usize, config: &HookMappingConfig) -> Result<HookMapping, ResolveError> {
    let id = non_empty(config.id.as_ref()).unwrap_or_else(|| format!("mapping-{}", index + 1));
    let invalid = |reason: &str| ResolveError::InvalidMapping {
        id: id.clone(),
        reason: reason.to_string(),
    };

    let match_path = config
        .matcher
        .path
        .as_deref()
        .map(normalize_hook_path)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| invalid("match.path is required"))?;

    if let Some(transform) = &config.transform {
        if transform.module.trim().is_empty() {
            return Err(invalid("transform.module must not be empty"));
        }
    }

    let match_headers: BTreeMap<String, String> = config
        .matcher
        .headers
        .iter()
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.clone()))
        .collect();

    Ok(HookMapping {
        match_source: non_empty(config.matcher.source.as_ref()),
        match_headers,
        action: config.action,
        wake_mode: config.wake_mode,
        name: verbatim(config.name.as_ref()),
        session_key: non_empty(config.session_key.as_ref()).map(|key| SessionKeyRule::Template {
            template: Template::parse(&key),
        }),
        message_template: config.message_template.as_deref().map(Template::parse),
        text_template: config.text_template.as_deref().map(Template::parse),
        transform: config.transform.clone(),
        agent_id: verbatim(config.agent_id.as_ref()),
        model: verbatim(config.model.as_ref()),
        thinking: verbatim(config.thinking.as_ref()),
        timeout_seconds: config.timeout_seconds,
        deliver: config.deliver,
        channel: verbatim(config.channel.as_ref()),
        to: verbatim(config.to.as_ref()),
        ..HookMapping::new(id.clone(), match_path)
    })
}
