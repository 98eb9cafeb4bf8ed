//! Transform units: resolution, load-once caching and sandboxed execution.
//!
//! A unit is a WebAssembly module (`.wasm` binary or `.wat` text) under the
//! transforms directory. It must export:
//!
//! - `memory`
//! - `alloc(len: i32) -> i32`: where the host writes the input
//! - `transform(ptr: i32, len: i32) -> i64`: returns `(out_ptr << 32) | out_len`
//!
//! Input is the request context as JSON (`{payload, headers, url, path}`).
//! Output is UTF-8 JSON: `null` to skip, or an action object tagged with
//! `kind` (`"agent"` / `"wake"`). Every call runs in a fresh instance with a
//! fuel budget and a linear-memory cap.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use wasmtime::{Engine, Instance, Module, Store, StoreLimits, StoreLimitsBuilder};

use super::traits::{HookAction, HookContext, HookError, Transform, TransformRef};

/// Instructions a single invocation may execute before it is aborted.
pub const DEFAULT_FUEL: u64 = 10_000_000;

/// Upper bound on a unit's linear memory, in bytes.
pub const DEFAULT_MEMORY_LIMIT: usize = 16 * 1024 * 1024;

type UnitCell = Arc<OnceCell<Arc<dyn Transform>>>;

/// Resolves, loads and runs transform units.
pub struct TransformInvoker {
    engine: Engine,
    fuel: u64,
    memory_limit: usize,
    native: RwLock<HashMap<String, Arc<dyn Transform>>>,
    units: Mutex<HashMap<PathBuf, UnitCell>>,
    loads: AtomicUsize,
}

impl TransformInvoker {
    pub fn new() -> Result<Self> {
        Self::with_fuel(DEFAULT_FUEL)
    }

    pub fn with_fuel(fuel: u64) -> Result<Self> {
        let mut config = wasmtime::Config::new();
        config.consume_fuel(true);
        let engine =
            Engine::new(&config).map_err(|e| anyhow!("Failed to create WASM engine: {e}"))?;
        Ok(Self {
            engine,
            fuel,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            native: RwLock::new(HashMap::new()),
            units: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        })
    }

    /// Cap the linear memory of every unit instance at `bytes`.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Register a native transform. Mappings whose `transform.module` equals
    /// `module` run it instead of loading a file.
    pub fn register(&self, module: impl Into<String>, transform: Arc<dyn Transform>) {
        self.native.write().insert(module.into(), transform);
    }

    /// Number of unit loads attempted so far, failed ones included.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Run the unit behind `transform` against `context`.
    ///
    /// `Ok(None)` means the unit recognised the event and chose to skip it.
    pub async fn invoke(
        &self,
        transform: &TransformRef,
        root: &Path,
        context: &HookContext,
    ) -> Result<Option<HookAction>, HookError> {
        let unit = self.resolve_unit(transform, root).await?;
        tracing::debug!(module = %transform.module, unit = unit.name(), "Running hook transform");
        unit.transform(context)
            .await
            .map_err(|e| HookError::TransformRuntime {
                module: transform.module.clone(),
                reason: format!("{e:#}"),
            })
    }

    async fn resolve_unit(
        &self,
        transform: &TransformRef,
        root: &Path,
    ) -> Result<Arc<dyn Transform>, HookError> {
        let native = self.native.read().get(&transform.module).cloned();
        if let Some(native) = native {
            return Ok(native);
        }

        let path = resolve_module_path(root, &transform.module)?;
        let cell: UnitCell = {
            let mut units = self.units.lock();
            Arc::clone(units.entry(path.clone()).or_default())
        };

        // Failed loads leave the cell empty, so the next request retries.
        let unit = cell
            .get_or_try_init(|| self.load_unit(&path, &transform.module))
            .await?;
        Ok(Arc::clone(unit))
    }

    async fn load_unit(&self, path: &Path, module: &str) -> Result<Arc<dyn Transform>, HookError> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        let load_error = |reason: String| HookError::TransformLoad {
            module: module.to_string(),
            reason,
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| load_error(format!("cannot read {}: {e}", path.display())))?;

        let engine = self.engine.clone();
        let compiled = tokio::task::spawn_blocking(move || {
            Module::new(&engine, &bytes).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| load_error(format!("compilation task failed: {e}")))?
        .map_err(|e| load_error(format!("invalid module: {e}")))?;

        tracing::info!(module, path = %path.display(), "Loaded hook transform unit");

        Ok(Arc::new(WasmTransform {
            name: module.to_string(),
            engine: self.engine.clone(),
            module: compiled,
            fuel: self.fuel,
            memory_limit: self.memory_limit,
        }))
    }
}

/// Join `module` onto `root`, refusing anything that could leave `root`.
pub fn resolve_module_path(root: &Path, module: &str) -> Result<PathBuf, HookError> {
    let trimmed = module.trim();
    let reject = |reason: &str| HookError::TransformLoad {
        module: module.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(reject("module path is empty"));
    }
    let relative = Path::new(trimmed);
    let escapes = relative.is_absolute()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(reject("module path must stay within the transforms directory"));
    }
    Ok(root.join(relative))
}

/// Interpret a unit's JSON output.
pub fn action_from_value(value: Value) -> Result<Option<HookAction>> {
    if value.is_null() {
        return Ok(None);
    }
    if !value.is_object() {
        bail!("expected an action object or null, got {}", json_type(&value));
    }
    match value.get("kind").and_then(Value::as_str) {
        Some("agent" | "wake") => {
            let action = serde_json::from_value(value).context("malformed action object")?;
            Ok(Some(action))
        }
        Some(other) => bail!("unknown action kind `{other}`"),
        None => bail!("action object is missing its `kind` tag"),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A compiled WebAssembly unit. Instantiated fresh for every call.
#[derive(Clone)]
pub struct WasmTransform {
    name: String,
    engine: Engine,
    module: Module,
    fuel: u64,
    memory_limit: usize,
}

impl WasmTransform {
    fn call(&self, input: &[u8]) -> Result<Vec<u8>> {
        let limits = StoreLimitsBuilder::new()
            .memory_size(self.memory_limit)
            .instances(1)
            .trap_on_grow_failure(true)
            .build();
        let mut store: Store<StoreLimits> = Store::new(&self.engine, limits);
        store.limiter(|limits| limits);
        store
            .set_fuel(self.fuel)
            .map_err(|e| anyhow!("failed to set fuel: {e}"))?;

        let instance = Instance::new(&mut store, &self.module, &[])
            .map_err(|e| anyhow!("instantiation failed: {e}"))?;
        let memory = instance
            .get_memory(&mut store, "memory")
            .context("unit does not export `memory`")?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, "alloc")
            .map_err(|e| anyhow!("unit does not export `alloc(i32) -> i32`: {e}"))?;
        let transform = instance
            .get_typed_func::<(i32, i32), i64>(&mut store, "transform")
            .map_err(|e| anyhow!("unit does not export `transform(i32, i32) -> i64`: {e}"))?;

        let len = i32::try_from(input.len()).context("transform input too large")?;
        let ptr = alloc
            .call(&mut store, len)
            .map_err(|e| anyhow!("alloc trapped: {e}"))?;
        let offset = usize::try_from(ptr).context("alloc returned a negative pointer")?;
        memory
            .write(&mut store, offset, input)
            .map_err(|e| anyhow!("input does not fit in unit memory: {e}"))?;

        let packed = transform
            .call(&mut store, (ptr, len))
            .map_err(|e| anyhow!("transform trapped: {e}"))?;
        let out_ptr = usize::try_from((packed >> 32) & 0xFFFF_FFFF)?;
        let out_len = usize::try_from(packed & 0xFFFF_FFFF)?;

        // Bounds-check against the live memory before copying anything out.
        let output = out_ptr
            .checked_add(out_len)
            .and_then(|end| memory.data(&store).get(out_ptr..end))
            .with_context(|| {
                format!(
                    "output range {out_ptr}+{out_len} is outside unit memory ({} bytes)",
                    memory.data_size(&store)
                )
            })?;
        Ok(output.to_vec())
    }
}

#[async_trait]
impl Transform for WasmTransform {
    async fn transform(&self, context: &HookContext) -> Result<Option<HookAction>> {
        let input = serde_json::to_vec(&context.to_json())?;
        let unit = self.clone();
        let output = tokio::task::spawn_blocking(move || unit.call(&input))
            .await
            .context("transform task panicked")??;
        let value: Value =
            serde_json::from_slice(&output).context("transform returned invalid JSON")?;
        action_from_value(value)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Native transform backed by a closure.
pub struct FnTransform<F> {
    name: String,
    func: F,
}

impl<F> FnTransform<F>
where
    F: Fn(&HookContext) -> Result<Option<HookAction>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> Transform for FnTransform<F>
where
    F: Fn(&HookContext) -> Result<Option<HookAction>> + Send + Sync,
{
    async fn transform(&self, context: &HookContext) -> Result<Option<HookAction>> {
        (self.func)(context)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
