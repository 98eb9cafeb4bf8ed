//! End-to-end mapping scenarios: config → resolved rule set → action.

use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use url::Url;

use hookclaw::config::{HookMappingConfig, HookMatchConfig, HooksConfig};
use hookclaw::hooks::{
    AgentAction, FnTransform, HookAction, HookActionKind, TransformRef, WakeMode,
};
use hookclaw::{resolve_hook_mappings, Config, HookContext, HookEngine, HookError};

/// Echoes `payload.name` back as `{"kind":"wake","text":"Ping <name>"}`.
///
/// Scans the input for the first `"name":"` and copies bytes up to the next
/// quote into the output buffer at offset 28, after the fixed prefix.
const PING_UNIT: &str = r##"(module
  (memory (export "memory") 1)
  (data (i32.const 0) "{\"kind\":\"wake\",\"text\":\"Ping ")
  (data (i32.const 256) "\"name\":\"")
  (data (i32.const 512) "null")
  (func (export "alloc") (param i32) (result i32) (i32.const 1024))
  (func $matches (param $at i32) (result i32)
    (local $i i32)
    (loop $next
      (if (i32.ne (i32.load8_u (i32.add (local.get $at) (local.get $i)))
                  (i32.load8_u (i32.add (i32.const 256) (local.get $i))))
        (then (return (i32.const 0))))
      (local.set $i (i32.add (local.get $i) (i32.const 1)))
      (br_if $next (i32.lt_u (local.get $i) (i32.const 8))))
    (i32.const 1))
  (func (export "transform") (param $ptr i32) (param $len i32) (result i64)
    (local $at i32) (local $end i32) (local $out i32) (local $c i32)
    (local.set $at (local.get $ptr))
    (local.set $end (i32.sub (i32.add (local.get $ptr) (local.get $len)) (i32.const 8)))
    (block $found
      (loop $scan
        (if (i32.gt_s (local.get $at) (local.get $end))
          (then (return (i64.const 0x20000000004))))
        (br_if $found (call $matches (local.get $at)))
        (local.set $at (i32.add (local.get $at) (i32.const 1)))
        (br $scan)))
    (local.set $at (i32.add (local.get $at) (i32.const 8)))
    (local.set $out (i32.const 28))
    (block $done
      (loop $copy
        (local.set $c (i32.load8_u (local.get $at)))
        (br_if $done (i32.eq (local.get $c) (i32.const 34)))
        (i32.store8 (local.get $out) (local.get $c))
        (local.set $out (i32.add (local.get $out) (i32.const 1)))
        (local.set $at (i32.add (local.get $at) (i32.const 1)))
        (br $copy)))
    (i32.store8 (local.get $out) (i32.const 34))
    (i32.store8 (i32.add (local.get $out) (i32.const 1)) (i32.const 125))
    (i64.extend_i32_u (i32.add (local.get $out) (i32.const 2)))))"##;

const NULL_UNIT: &str = r#"(module
  (memory (export "memory") 1)
  (data (i32.const 0) "null")
  (func (export "alloc") (param i32) (result i32) (i32.const 1024))
  (func (export "transform") (param i32 i32) (result i64) (i64.const 4)))"#;

fn ctx(path: &str, payload: Value) -> HookContext {
    HookContext::new(
        path,
        Url::parse(&format!("http://127.0.0.1:42617/hooks/{path}")).unwrap(),
        payload,
    )
}

fn gmail_payload() -> Value {
    json!({
        "messages": [{
            "id": "msg-1",
            "from": "Ada <ada@example.com>",
            "subject": "Hello",
            "snippet": "Hi there",
            "body": "Full body"
        }]
    })
}

fn mapping(path: &str) -> HookMappingConfig {
    HookMappingConfig {
        matcher: HookMatchConfig {
            path: Some(path.into()),
            ..HookMatchConfig::default()
        },
        ..HookMappingConfig::default()
    }
}

fn transform_mapping(path: &str, module: &str) -> HookMappingConfig {
    HookMappingConfig {
        transform: Some(TransformRef {
            module: module.into(),
        }),
        ..mapping(path)
    }
}

fn with_transforms(mappings: Vec<HookMappingConfig>, dir: &Path) -> HooksConfig {
    HooksConfig {
        mappings,
        transforms_dir: Some(dir.to_path_buf()),
        ..HooksConfig::default()
    }
}

fn agent(result: &hookclaw::HookApplyResult) -> &AgentAction {
    result
        .action()
        .and_then(HookAction::as_agent)
        .unwrap_or_else(|| panic!("expected agent action, got {result:?}"))
}

#[tokio::test]
async fn gmail_preset_renders_subject() {
    let config = HooksConfig {
        presets: vec!["gmail".into()],
        ..HooksConfig::default()
    };
    let mappings = resolve_hook_mappings(&config).unwrap();
    assert_eq!(mappings.first().unwrap().match_path, "gmail");

    let engine = HookEngine::new().unwrap();
    let result = engine.apply(&mappings, &ctx("gmail", gmail_payload())).await;
    let action = agent(&result);
    assert!(action.message.contains("Subject: Hello"));
    assert!(action.message.starts_with("New email from Ada <ada@example.com>"));
    assert_eq!(action.session_key.as_deref(), Some("hook:gmail:msg-1"));
    assert_eq!(action.name.as_deref(), Some("Gmail"));
}

#[tokio::test]
async fn explicit_template_passes_model_through() {
    let config = HooksConfig {
        mappings: vec![HookMappingConfig {
            message_template: Some("Subject: {{messages[0].subject}}".into()),
            model: Some("openai/gpt-4.1-mini".into()),
            ..mapping("gmail")
        }],
        ..HooksConfig::default()
    };
    let mappings = resolve_hook_mappings(&config).unwrap();
    let engine = HookEngine::new().unwrap();
    let result = engine.apply(&mappings, &ctx("gmail", gmail_payload())).await;
    let action = agent(&result);
    assert_eq!(action.message, "Subject: Hello");
    assert_eq!(action.model.as_deref(), Some("openai/gpt-4.1-mini"));
}

#[tokio::test]
async fn wasm_transform_produces_wake_action() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("ping.wat"), PING_UNIT).unwrap();

    let config = with_transforms(vec![transform_mapping("custom", "ping.wat")], dir.path());
    let mappings = resolve_hook_mappings(&config).unwrap();
    let engine = HookEngine::new().unwrap();

    let result = engine
        .apply(&mappings, &ctx("custom", json!({"name": "Ada"})))
        .await;
    let wake = result.action().and_then(HookAction::as_wake).unwrap();
    assert_eq!(wake.text, "Ping Ada");
    assert_eq!(wake.mode, WakeMode::Now);

    // Same unit, second request: served from the cache.
    let again = engine
        .apply(&mappings, &ctx("custom", json!({"name": "Grace"})))
        .await;
    assert_eq!(again.action().unwrap().as_wake().unwrap().text, "Ping Grace");
    assert_eq!(engine.transforms().load_count(), 1);
}

#[tokio::test]
async fn wasm_transform_without_name_skips() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("ping.wat"), PING_UNIT).unwrap();

    let config = with_transforms(vec![transform_mapping("custom", "ping.wat")], dir.path());
    let mappings = resolve_hook_mappings(&config).unwrap();
    let engine = HookEngine::new().unwrap();

    let result = engine.apply(&mappings, &ctx("custom", json!({"id": 1}))).await;
    assert!(result.is_skipped());
}

#[tokio::test]
async fn null_transform_is_a_skip() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("noop.wat"), NULL_UNIT).unwrap();

    let config = with_transforms(vec![transform_mapping("noop", "noop.wat")], dir.path());
    let mappings = resolve_hook_mappings(&config).unwrap();
    let engine = HookEngine::new().unwrap();

    let result = engine.apply(&mappings, &ctx("noop", json!({}))).await;
    assert!(result.is_ok());
    assert!(result.is_skipped());
    assert_eq!(
        result.to_wire().unwrap(),
        json!({"ok": true, "action": null, "skipped": true})
    );
}

#[tokio::test]
async fn explicit_mapping_overrides_preset() {
    let config = HooksConfig {
        presets: vec!["gmail".into()],
        mappings: vec![HookMappingConfig {
            id: Some("override".into()),
            message_template: Some("Override subject: {{messages[0].subject}}".into()),
            ..mapping("gmail")
        }],
        ..HooksConfig::default()
    };
    let mappings = resolve_hook_mappings(&config).unwrap();
    let engine = HookEngine::new().unwrap();
    let result = engine.apply(&mappings, &ctx("gmail", gmail_payload())).await;
    assert_eq!(result.mapping_id(), Some("override"));
    assert_eq!(agent(&result).message, "Override subject: Hello");
}

#[tokio::test]
async fn agent_id_passes_through() {
    let config = HooksConfig {
        mappings: vec![HookMappingConfig {
            agent_id: Some("hooks".into()),
            message_template: Some("Build event: {{event}}".into()),
            ..mapping("ci")
        }],
        ..HooksConfig::default()
    };
    let mappings = resolve_hook_mappings(&config).unwrap();
    let engine = HookEngine::new().unwrap();
    let result = engine
        .apply(&mappings, &ctx("ci", json!({"event": "build.succeeded"})))
        .await;
    let action = agent(&result);
    assert_eq!(action.message, "Build event: build.succeeded");
    assert_eq!(action.agent_id.as_deref(), Some("hooks"));
}

#[tokio::test]
async fn github_preset_summarizes_push() {
    let config = HooksConfig {
        presets: vec!["github".into()],
        ..HooksConfig::default()
    };
    let mappings = resolve_hook_mappings(&config).unwrap();
    assert_eq!(mappings.first().unwrap().match_path, "github");

    let context = ctx(
        "github",
        json!({
            "ref": "refs/heads/feat/auth",
            "sender": {"login": "bharath"},
            "repository": {"full_name": "org/openclaw"},
            "head_commit": {"message": "fix: login flow"},
            "compare": "https://github.com/org/openclaw/compare/a...b"
        }),
    )
    .with_header("X-GitHub-Event", "push")
    .with_header("X-GitHub-Delivery", "delivery-123");

    let engine = HookEngine::new().unwrap();
    let result = engine.apply(&mappings, &context).await;
    let action = agent(&result);
    for needle in ["push", "refs/heads/feat/auth", "bharath", "org/openclaw", "fix: login flow"] {
        assert!(action.message.contains(needle), "missing {needle:?} in {}", action.message);
    }
    assert_eq!(action.session_key.as_deref(), Some("hook:github:delivery-123"));
}

#[tokio::test]
async fn payload_token_renders_compact_json() {
    let config = HooksConfig {
        mappings: vec![HookMappingConfig {
            message_template: Some("Payload: {{_payload}}".into()),
            ..mapping("raw")
        }],
        ..HooksConfig::default()
    };
    let mappings = resolve_hook_mappings(&config).unwrap();
    let engine = HookEngine::new().unwrap();
    let result = engine
        .apply(&mappings, &ctx("raw", json!({"a": 1, "b": [1, 2]})))
        .await;
    assert_eq!(agent(&result).message, r#"Payload: {"a":1,"b":[1,2]}"#);
}

#[tokio::test]
async fn missing_message_reports_failure() {
    let config = HooksConfig {
        mappings: vec![mapping("bare")],
        ..HooksConfig::default()
    };
    let mappings = resolve_hook_mappings(&config).unwrap();
    let engine = HookEngine::new().unwrap();
    let result = engine.apply(&mappings, &ctx("bare", json!({}))).await;
    assert_eq!(result.error(), Some(&HookError::MissingMessage));
    assert_eq!(
        result.to_wire().unwrap(),
        json!({"ok": false, "error": "hook mapping requires message"})
    );
}

#[tokio::test]
async fn unmatched_request_has_no_wire_form() {
    let config = HooksConfig {
        presets: vec!["gmail".into()],
        ..HooksConfig::default()
    };
    let mappings = resolve_hook_mappings(&config).unwrap();
    let engine = HookEngine::new().unwrap();
    let result = engine.apply(&mappings, &ctx("slack", json!({}))).await;
    assert!(!result.is_matched());
    assert!(result.to_wire().is_none());
}

#[tokio::test]
async fn native_transform_fills_defaults_from_mapping() {
    let config = HooksConfig {
        mappings: vec![HookMappingConfig {
            agent_id: Some("ops".into()),
            session_key: Some("hook:ops:{{id}}".into()),
            ..transform_mapping("ops", "ops-summary")
        }],
        ..HooksConfig::default()
    };
    let mappings = resolve_hook_mappings(&config).unwrap();
    let engine = HookEngine::new().unwrap();
    engine.register_transform(
        "ops-summary",
        Arc::new(FnTransform::new("ops-summary", |ctx: &HookContext| {
            Ok(Some(HookAction::Agent(AgentAction {
                message: format!("Incident {}", ctx.payload["id"]),
                ..AgentAction::default()
            })))
        })),
    );

    let result = engine.apply(&mappings, &ctx("ops", json!({"id": 17}))).await;
    let action = agent(&result);
    assert_eq!(action.message, "Incident 17");
    assert_eq!(action.agent_id.as_deref(), Some("ops"));
    assert_eq!(action.session_key.as_deref(), Some("hook:ops:17"));
}

#[tokio::test]
async fn escaping_transform_path_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let config = with_transforms(
        vec![transform_mapping("evil", "../outside.wat")],
        dir.path(),
    );
    let mappings = resolve_hook_mappings(&config).unwrap();
    let engine = HookEngine::new().unwrap();
    let result = engine.apply(&mappings, &ctx("evil", json!({}))).await;
    assert!(matches!(result.error(), Some(HookError::TransformLoad { .. })));
    assert_eq!(engine.transforms().load_count(), 0);
}

#[tokio::test]
async fn wake_mapping_from_toml() {
    let config = Config::from_toml(
        r#"
[hooks]
[[hooks.mappings]]
id = "ping"
action = "wake"
wake_mode = "next-heartbeat"
text_template = "Ping {{name}}"
match = { path = "/ping/", headers = { "X-Token" = "s3cret" } }
"#,
    )
    .unwrap();
    let mappings = resolve_hook_mappings(&config.hooks).unwrap();
    assert_eq!(mappings.first().unwrap().action, HookActionKind::Wake);

    let engine = HookEngine::new().unwrap();
    let denied = engine.apply(&mappings, &ctx("ping", json!({"name": "Ada"}))).await;
    assert!(!denied.is_matched());

    let allowed = engine
        .apply(
            &mappings,
            &ctx("ping", json!({"name": "Ada"})).with_header("x-token", "s3cret"),
        )
        .await;
    let wake = allowed.action().unwrap().as_wake().unwrap();
    assert_eq!(wake.text, "Ping Ada");
    assert_eq!(wake.mode, WakeMode::NextHeartbeat);
}
