//! Built-in hook mappings for known integrations.

use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;

use super::template::Template;
use super::traits::{HookContext, HookMapping, ResolveError, SessionKeyRule, WakeMode};

const GMAIL_MESSAGE: &str = "New email from {{messages[0].from}}\nSubject: {{messages[0].subject}}\n{{messages[0].snippet}}\n{{messages[0].body}}";
const GMAIL_SESSION_KEY: &str = "hook:gmail:{{messages[0].id}}";

const GITHUB_EVENT_HEADER: &str = "x-github-event";
const GITHUB_DELIVERY_HEADER: &str = "x-github-delivery";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Gmail,
    Github,
}

impl Preset {
    pub const ALL: [Preset; 2] = [Preset::Gmail, Preset::Github];

    pub fn name(self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Github => "github",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Gmail => "Gmail push notifications (one session per message id)",
            Self::Github => "GitHub webhooks (one session per delivery id)",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }

    /// The mapping this preset contributes to a resolved rule set.
    pub fn definition(self) -> HookMapping {
        match self {
            Self::Gmail => HookMapping {
                name: Some("Gmail".into()),
                wake_mode: WakeMode::Now,
                message_template: Some(Template::parse(GMAIL_MESSAGE)),
                session_key: Some(SessionKeyRule::Template {
                    template: Template::parse(GMAIL_SESSION_KEY),
                }),
                ..HookMapping::new("gmail", "gmail")
            },
            Self::Github => HookMapping {
                name: Some("GitHub".into()),
                wake_mode: WakeMode::Now,
                composer: Some(Self::Github),
                session_key: Some(SessionKeyRule::DeliveryHeader {
                    header: GITHUB_DELIVERY_HEADER.into(),
                    prefix: "hook:github:".into(),
                }),
                ..HookMapping::new("github", "github")
            },
        }
    }

    /// Computed message for presets that build it in code rather than from
    /// a template.
    pub fn compose_message(self, ctx: &HookContext) -> Option<String> {
        match self {
            Self::Gmail => None,
            Self::Github => Some(compose_github(ctx)),
        }
    }
}

impl FromStr for Preset {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| ResolveError::UnknownPreset(s.trim().to_string()))
    }
}

/// Definitions for `names`, in the given order.
pub fn definitions_for<S: AsRef<str>>(names: &[S]) -> Result<Vec<HookMapping>, ResolveError> {
    names
        .iter()
        .map(|name| name.as_ref().parse::<Preset>().map(Preset::definition))
        .collect()
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |current, key| current.get(*key))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text).trim()
}

fn compose_github(ctx: &HookContext) -> String {
    let payload = &ctx.payload;
    let event = ctx.header(GITHUB_EVENT_HEADER).unwrap_or("event");
    let repo = str_at(payload, &["repository", "full_name"]).unwrap_or("unknown repository");
    let sender = str_at(payload, &["sender", "login"]).unwrap_or("unknown sender");

    let mut lines = Vec::new();
    match event {
        "push" => {
            let git_ref = str_at(payload, &["ref"]).unwrap_or("unknown ref");
            lines.push(format!("GitHub push to {repo} ({git_ref}) by {sender}"));
            if let Some(message) = str_at(payload, &["head_commit", "message"]) {
                lines.push(format!("Commit: {}", first_line(message)));
            }
            if let Some(compare) = str_at(payload, &["compare"]) {
                lines.push(format!("Compare: {compare}"));
            }
        }
        "pull_request" | "issues" => {
            let (object_key, label) = if event == "issues" {
                ("issue", "Issue")
            } else {
                ("pull_request", "Pull request")
            };
            let action = str_at(payload, &["action"]).unwrap_or("updated");
            lines.push(format!("GitHub {event} {action} on {repo} by {sender}"));
            if let Some(object) = payload.get(object_key) {
                let number = object
                    .get("number")
                    .and_then(Value::as_u64)
                    .map(|n| format!("#{n} "))
                    .unwrap_or_default();
                let title = str_at(object, &["title"]).unwrap_or("(untitled)");
                lines.push(format!("{label} {number}{title}"));
                if let Some(url) = str_at(object, &["html_url"]) {
                    lines.push(url.to_string());
                }
            }
        }
        other => {
            lines.push(format!("GitHub {other} on {repo} by {sender}"));
            if let Some(action) = str_at(payload, &["action"]) {
                lines.push(format!("Action: {action}"));
            }
        }
    }
    lines.join("\n")
}
