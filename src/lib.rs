#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::needless_raw_string_hashes,
    clippy::redundant_closure_for_method_calls,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_wraps
)]

//! Inbound webhook routing: hook mappings, presets, templates and
//! sandboxed transforms that turn HTTP callbacks into agent actions.

pub mod config;
pub mod hooks;

pub use config::Config;
pub use hooks::{
    resolve_hook_mappings, HookAction, HookApplyResult, HookContext, HookEngine, HookError,
    HookMappings,
};
