pub mod engine;
pub mod presets;
pub mod resolver;
pub mod template;
pub mod traits;
pub mod transform;

pub use engine::HookEngine;
pub use presets::{definitions_for, Preset};
pub use resolver::{normalize_hook_path, resolve_hook_mappings};
pub use template::{render, Template};
pub use traits::{
    AgentAction, HookAction, HookActionKind, HookApplyResult, HookContext, HookDispatch, HookError,
    HookMapping, HookMappings, ResolveError, SessionKeyRule, Transform, TransformRef, WakeAction,
    WakeMode,
};
pub use transform::{FnTransform, TransformInvoker, WasmTransform};

/// Factory: build the engine the gateway shares across requests.
pub fn create_hook_engine() -> anyhow::Result<HookEngine> {
    HookEngine::new()
}
