#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // TOML parsing and range validation must reject bad input without
    // panicking; both error paths are acceptable outcomes.
    if let Ok(cfg) = mql_config::load_toml(data) {
        let _ = cfg.validate();
    }
});
