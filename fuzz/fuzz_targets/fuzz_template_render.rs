#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let payload = serde_json::json!({
            "messages": [{"subject": s, "from": "fuzz"}],
            "nested": {"list": [1, "two", null, {"k": s}]},
        });
        let _ = hookclaw::hooks::render(s, &payload);

        // Payload data is inserted verbatim, never re-expanded.
        let echoed = hookclaw::hooks::render("{{messages[0].subject}}", &payload);
        assert_eq!(echoed, s);
    }
});
