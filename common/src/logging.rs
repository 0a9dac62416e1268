// Copyright (c) 2024 The dep2p Authors

//! Logging boundary.
//!
//! All runtime code logs through `tracing`; this module only owns turning
//! the `DEP2P_LOG_*` environment variables into a subscriber:
//!
//! - `DEP2P_LOG_LEVEL` — `module=level,module=level,defaultLevel`
//! - `DEP2P_LOG_FORMAT` — `text` (default) or `json`
//! - `DEP2P_LOG_ADD_SOURCE` — include file/line when truthy

use tracing_subscriber::EnvFilter;

const LEVEL_VAR: &str = "DEP2P_LOG_LEVEL";
const FORMAT_VAR: &str = "DEP2P_LOG_FORMAT";
const ADD_SOURCE_VAR: &str = "DEP2P_LOG_ADD_SOURCE";

const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Turn the `DEP2P_LOG_LEVEL` syntax into filter directives.
///
/// Each `module=level` segment becomes a per-target directive; a bare level
/// segment becomes the default. Malformed segments are skipped. An empty or
/// unset value yields `info`.
pub fn parse_level_spec(spec: &str) -> String {
    let mut directives = Vec::new();
    let mut default_level = None;

    for segment in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match segment.split_once('=') {
            Some((module, level)) => {
                let level = level.trim().to_ascii_lowercase();
                if !module.trim().is_empty() && LEVELS.contains(&level.as_str()) {
                    directives.push(format!("{}={}", module.trim(), level));
                }
            }
            None => {
                let level = segment.to_ascii_lowercase();
                if LEVELS.contains(&level.as_str()) {
                    default_level = Some(level);
                }
            }
        }
    }

    let mut out = vec![default_level.unwrap_or_else(|| "info".to_string())];
    out.extend(directives);
    out.join(",")
}

fn truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Install the global subscriber from the environment.
///
/// Idempotent: a second call (or a subscriber installed by the embedding
/// application) leaves the existing subscriber in place.
pub fn init_from_env() {
    let spec = std::env::var(LEVEL_VAR).unwrap_or_default();
    let filter = EnvFilter::try_new(parse_level_spec(&spec))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let with_source = std::env::var(ADD_SOURCE_VAR)
        .map(|v| truthy(&v))
        .unwrap_or(false);
    let json = std::env::var(FORMAT_VAR)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(with_source)
        .with_line_number(with_source);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    // Err means a subscriber already exists, which is fine.
    let _ = result;
}
