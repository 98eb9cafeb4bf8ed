pub mod schema;

pub use schema::{default_transforms_dir, Config, HookMappingConfig, HookMatchConfig, HooksConfig};
