#![no_main]

use libfuzzer_sys::fuzz_target;
use overrun::config::MonitorConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Parsing must never panic; accepted configs must be valid
        if let Ok(config) = MonitorConfig::from_toml_str(s) {
            assert!(config.validate().is_ok());
            assert!(config.poll_interval_ms > 0);
        }
    }
});
