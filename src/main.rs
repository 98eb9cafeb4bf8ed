#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

use hookclaw::hooks::{create_hook_engine, normalize_hook_path, resolve_hook_mappings, Preset};
use hookclaw::{Config, HookContext};

const DEFAULT_GATEWAY_BASE: &str = "http://127.0.0.1:42617/hooks/";

fn parse_header(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{s}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name cannot be empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// `hookclaw` - route inbound webhooks to agent actions.
#[derive(Parser, Debug)]
#[command(name = "hookclaw")]
#[command(author = "theonlyhennygod")]
#[command(version)]
#[command(about = "Inbound webhook mapping for claw agents.", long_about = None)]
struct Cli {
    /// Config file (default: $HOOKCLAW_CONFIG or ~/.hookclaw/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the resolved hook mappings in precedence order
    Mappings,

    /// List built-in hook presets
    Presets,

    /// Resolve one webhook request and print the outcome
    #[command(long_about = "\
Resolve one webhook request and print the outcome.

Runs the configured mappings against a payload exactly as the gateway \
would and prints the wire JSON. Prints `null` when nothing matched.

Examples:
  hookclaw apply --path gmail --payload mail.json
  cat push.json | hookclaw apply --path github --payload - \\
      -H X-GitHub-Event=push -H X-GitHub-Delivery=abc")]
    Apply {
        /// Hook path, e.g. `gmail` for /hooks/gmail
        #[arg(long)]
        path: String,

        /// JSON payload file, `-` for stdin. Default: `{}`
        #[arg(long)]
        payload: Option<PathBuf>,

        /// Request header as NAME=VALUE (repeatable)
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Full request URL. Default: the local gateway URL for --path
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to INFO.
    // Logs go to stderr so stdout stays machine-readable.
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    match cli.command {
        Commands::Presets => {
            for preset in Preset::ALL {
                println!("{:<8} {}", preset.name(), preset.description());
            }
            Ok(())
        }

        Commands::Mappings => {
            let config = Config::load_or_default(cli.config.as_deref()).await?;
            let mappings = resolve_hook_mappings(&config.hooks)?;
            println!("{}", serde_json::to_string_pretty(&mappings)?);
            Ok(())
        }

        Commands::Apply {
            path,
            payload,
            headers,
            url,
        } => {
            let config = Config::load_or_default(cli.config.as_deref()).await?;
            let mappings = resolve_hook_mappings(&config.hooks)?;
            let payload = read_payload(payload.as_deref()).await?;
            let url = request_url(&path, url.as_deref())?;
            let ctx = HookContext::new(path, url, payload).with_headers(headers);

            let engine = create_hook_engine()?;
            let result = engine.apply(&mappings, &ctx).await;
            let wire = result.to_wire().unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&wire)?);
            Ok(())
        }
    }
}

async fn read_payload(source: Option<&Path>) -> Result<Value> {
    let raw = match source {
        None => return Ok(Value::Object(serde_json::Map::new())),
        Some(p) if p == Path::new("-") => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read payload from stdin")?;
            buf
        }
        Some(p) => tokio::fs::read_to_string(p)
            .await
            .with_context(|| format!("Failed to read payload file {}", p.display()))?,
    };
    if raw.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(&raw).context("Payload is not valid JSON")
}

fn request_url(path: &str, explicit: Option<&str>) -> Result<Url> {
    if let Some(raw) = explicit {
        return Url::parse(raw).with_context(|| format!("Invalid --url `{raw}`"));
    }
    let normalized = normalize_hook_path(path);
    if normalized.is_empty() {
        bail!("--path cannot be empty");
    }
    Url::parse(DEFAULT_GATEWAY_BASE)
        .and_then(|base| base.join(&normalized))
        .context("Failed to build request URL")
}
