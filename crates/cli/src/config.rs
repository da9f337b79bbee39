//! Engine configuration file for `blueprint sla` and `blueprint run`.
//!
//! ```toml
//! [engine]
//! business_day_start = "08:30"
//! business_day_end = "17:30"
//! utc_offset = "+01:00"
//! tick_interval_secs = 30
//! ```
//!
//! Every key is optional; a missing file argument means all defaults.

use std::path::Path;

use blueprint_engine::EngineConfig;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineConfig,
}

/// Read the engine configuration from `path`, or the defaults when no
/// path is given.
pub(crate) fn read_engine_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
    parse_engine_config(&content).map_err(|e| format!("could not parse '{}': {}", path.display(), e))
}

fn parse_engine_config(content: &str) -> Result<EngineConfig, String> {
    let file: ConfigFile = toml::from_str(content).map_err(|e| e.to_string())?;
    // Surface bad times and offsets at load rather than at first use.
    file.engine.calendar().map_err(|e| e.to_string())?;
    file.engine.tick_interval().map_err(|e| e.to_string())?;
    Ok(file.engine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_defaults() {
        assert_eq!(parse_engine_config("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn engine_table_overrides() {
        let config = parse_engine_config(
            r#"
            [engine]
            business_day_start = "08:30"
            tick_interval_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.business_day_start, "08:30");
        assert_eq!(config.business_day_end, "17:00");
        assert_eq!(config.tick_interval_secs, 5);
    }

    #[test]
    fn unknown_key_rejected() {
        assert!(parse_engine_config("[engine]\nlunch_break = true\n").is_err());
        assert!(parse_engine_config("[scheduler]\n").is_err());
    }

    #[test]
    fn bad_window_rejected() {
        let err = parse_engine_config(
            "[engine]\nbusiness_day_start = \"18:00\"\nbusiness_day_end = \"09:00\"\n",
        )
        .unwrap_err();
        assert!(!err.is_empty());
        assert!(parse_engine_config("[engine]\ntick_interval_secs = 0\n").is_err());
    }

    #[test]
    fn missing_path_means_defaults() {
        assert_eq!(read_engine_config(None).unwrap(), EngineConfig::default());
    }
}
