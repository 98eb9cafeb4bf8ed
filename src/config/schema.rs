use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::hooks::{HookActionKind, TransformRef, WakeMode};

const CONFIG_DIR_NAME: &str = ".hookclaw";
const CONFIG_FILE_NAME: &str = "config.toml";

// ── Top-level config ──────────────────────────────────────────────

/// Top-level hookclaw configuration, loaded from `config.toml`.
///
/// Resolution order: `--config` flag → `HOOKCLAW_CONFIG` env → `~/.hookclaw/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Inbound webhook mappings (`[hooks]`).
    #[serde(default)]
    pub hooks: HooksConfig,
}

// ── Hooks ─────────────────────────────────────────────────────────

/// Inbound webhook configuration (`[hooks]` section).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Built-in presets to enable, lowest precedence, in this order (e.g. `["gmail", "github"]`).
    #[serde(default)]
    pub presets: Vec<String>,
    /// Explicit mappings. Checked before any preset, in declaration order.
    #[serde(default)]
    pub mappings: Vec<HookMappingConfig>,
    /// Root for `transform.module` paths. Default: `~/.hookclaw/hooks/transforms`.
    #[serde(default, alias = "transformsDir", skip_serializing_if = "Option::is_none")]
    pub transforms_dir: Option<PathBuf>,
}

/// Match criteria of one mapping (`match = { path = "...", headers = { ... } }`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookMatchConfig {
    /// Hook path after `/hooks/`, slashes trimmed (e.g. `"gmail"`).
    #[serde(default)]
    pub path: Option<String>,
    /// Required value of the payload's top-level `source` field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Request headers that must be present with exactly these values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// One user-defined mapping (`[[hooks.mappings]]`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookMappingConfig {
    /// Stable identifier. Default: `mapping-<position>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "match")]
    pub matcher: HookMatchConfig,
    /// `"agent"` (default) or `"wake"`.
    #[serde(default)]
    pub action: HookActionKind,
    #[serde(default, alias = "wakeMode")]
    pub wake_mode: WakeMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Template for the session key of produced agent actions.
    #[serde(default, alias = "sessionKey", skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, alias = "messageTemplate", skip_serializing_if = "Option::is_none")]
    pub message_template: Option<String>,
    /// Template for wake text. Falls back to `message_template`.
    #[serde(default, alias = "textTemplate", skip_serializing_if = "Option::is_none")]
    pub text_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliver: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, alias = "timeoutSeconds", skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, alias = "agentId", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Transform unit resolved under `transforms_dir`. Wins over templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformRef>,
}

fn home_config_dir() -> Option<PathBuf> {
    UserDirs::new().map(|dirs| dirs.home_dir().join(CONFIG_DIR_NAME))
}

/// Transforms root used when `hooks.transforms_dir` is unset.
pub fn default_transforms_dir() -> PathBuf {
    home_config_dir()
        .unwrap_or_else(|| PathBuf::from(CONFIG_DIR_NAME))
        .join("hooks")
        .join("transforms")
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

impl Config {
    /// Config file location when none is given explicitly.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("HOOKCLAW_CONFIG") {
            if !path.trim().is_empty() {
                return Ok(expand_path(Path::new(path.trim())));
            }
        }
        let dir = home_config_dir().context("Could not find home directory")?;
        Ok(dir.join(CONFIG_FILE_NAME))
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Load, apply env overrides and validate.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_toml(&contents)?;
        config.config_path = path.to_path_buf();
        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            mappings = config.hooks.mappings.len(),
            presets = config.hooks.presets.len(),
            "Config loaded"
        );
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the default config.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => expand_path(p),
            None => Self::default_path()?,
        };
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Self::load(&path).await;
        }

        tracing::info!(path = %path.display(), "No config file found, using defaults");
        let mut config = Config {
            config_path: path,
            ..Config::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overrides from an arbitrary lookup, so tests don't have to mutate the
    /// process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("HOOKCLAW_TRANSFORMS_DIR").filter(|v| !v.trim().is_empty()) {
            self.hooks.transforms_dir = Some(PathBuf::from(dir.trim()));
        }

        if let Some(presets) = lookup("HOOKCLAW_HOOK_PRESETS") {
            self.hooks.presets = presets
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(dir) = self.hooks.transforms_dir.take() {
            self.hooks.transforms_dir = Some(expand_path(&dir));
        }
    }

    /// Validate configuration values that would cause runtime failures.
    ///
    /// Runs the full mapping resolution so an unknown preset or a malformed
    /// mapping fails the load instead of the first request.
    pub fn validate(&self) -> Result<()> {
        crate::hooks::resolve_hook_mappings(&self.hooks)
            .map(|_| ())
            .context("Invalid [hooks] configuration")
    }
}
