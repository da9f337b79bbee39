//! Engine configuration.

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Time, UtcOffset};

use crate::error::EngineError;
use crate::sla::BusinessCalendar;

/// Host-level settings. Every field has a default, so an empty TOML table
/// is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Start of the business window, `HH:MM` local time.
    pub business_day_start: String,
    /// End of the business window, `HH:MM` local time.
    pub business_day_end: String,
    /// UTC offset of the business calendar, `+HH:MM`.
    pub utc_offset: String,
    /// Seconds between escalation scheduler ticks.
    pub tick_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            business_day_start: "09:00".to_string(),
            business_day_end: "17:00".to_string(),
            utc_offset: "+00:00".to_string(),
            tick_interval_secs: 60,
        }
    }
}

impl EngineConfig {
    pub fn calendar(&self) -> Result<BusinessCalendar, EngineError> {
        let start = parse_time("business_day_start", &self.business_day_start)?;
        let end = parse_time("business_day_end", &self.business_day_end)?;
        let offset = parse_offset(&self.utc_offset)?;
        BusinessCalendar::new(start, end, offset)
    }

    pub fn tick_interval(&self) -> Result<std::time::Duration, EngineError> {
        if self.tick_interval_secs == 0 {
            return Err(EngineError::validation("tick_interval_secs must be positive"));
        }
        Ok(std::time::Duration::from_secs(self.tick_interval_secs))
    }
}

fn parse_time(key: &str, s: &str) -> Result<Time, EngineError> {
    Time::parse(s.trim(), format_description!("[hour]:[minute]"))
        .map_err(|e| EngineError::validation(format!("{} '{}' is not HH:MM: {}", key, s, e)))
}

fn parse_offset(s: &str) -> Result<UtcOffset, EngineError> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Ok(UtcOffset::UTC);
    }
    UtcOffset::parse(s, format_description!("[offset_hour]:[offset_minute]"))
        .map_err(|e| EngineError::validation(format!("utc_offset '{}' is not +HH:MM: {}", s, e)))
}

/// Parse an RFC 3339 timestamp with a validation error naming `what`.
pub fn parse_timestamp(what: &str, s: &str) -> Result<time::OffsetDateTime, EngineError> {
    time::OffsetDateTime::parse(s.trim(), &Rfc3339)
        .map_err(|e| EngineError::validation(format!("{} '{}' is not RFC 3339: {}", what, s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{offset, time};

    #[test]
    fn defaults_build_nine_to_five_utc() {
        let cal = EngineConfig::default().calendar().unwrap();
        assert_eq!(cal, BusinessCalendar::default());
        assert_eq!(
            EngineConfig::default().tick_interval().unwrap(),
            std::time::Duration::from_secs(60)
        );
    }

    #[test]
    fn custom_window_and_offset() {
        let cfg = EngineConfig {
            business_day_start: "08:30".into(),
            business_day_end: "18:00".into(),
            utc_offset: "-05:00".into(),
            tick_interval_secs: 5,
        };
        let cal = cfg.calendar().unwrap();
        assert_eq!(cal.day_start(), time!(8:30));
        assert_eq!(cal.day_end(), time!(18:00));
        assert_eq!(cal.offset(), offset!(-5));
    }

    #[test]
    fn bad_values_rejected() {
        let cfg = EngineConfig {
            business_day_start: "9am".into(),
            ..Default::default()
        };
        assert!(cfg.calendar().is_err());

        let cfg = EngineConfig {
            utc_offset: "Europe/Paris".into(),
            ..Default::default()
        };
        assert!(cfg.calendar().is_err());

        let cfg = EngineConfig {
            tick_interval_secs: 0,
            ..Default::default()
        };
        assert!(cfg.tick_interval().is_err());
    }

    #[test]
    fn rfc3339_timestamps() {
        assert!(parse_timestamp("now", "2025-01-06T09:00:00Z").is_ok());
        assert!(parse_timestamp("now", "yesterday").is_err());
    }
}
