#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Parsing and resolution must reject bad input without panicking.
        if let Ok(config) = hookclaw::Config::from_toml(s) {
            let _ = hookclaw::resolve_hook_mappings(&config.hooks);
        }
    }
});
