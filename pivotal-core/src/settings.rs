use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default connection string when nothing is configured.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:pivotal.db";

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Connection string used by [`connect`](crate::connect).
    pub database_url: String,
    /// When set, deleting an entity leaves pivot and child rows to database
    /// cascades (triggers or `ON DELETE CASCADE`) and only removes the owner row.
    pub cascade_in_database: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_owned(),
            cascade_in_database: false,
        }
    }
}

impl Settings {
    /// Reads `DATABASE_URL` and `PIVOTAL_CASCADE_IN_DATABASE`, loading `.env` first.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut settings = Self::default();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                settings.database_url = url;
            }
        }
        if let Ok(flag) = std::env::var("PIVOTAL_CASCADE_IN_DATABASE") {
            settings.cascade_in_database = parse_flag(&flag).ok_or_else(|| {
                Error::Config(format!(
                    "PIVOTAL_CASCADE_IN_DATABASE must be a boolean, got '{}'",
                    flag
                ))
            })?;
        }
        Ok(settings)
    }

    /// Parses settings from JSON; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn with_cascade_in_database(mut self, enabled: bool) -> Self {
        self.cascade_in_database = enabled;
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_fills_missing_keys_with_defaults() {
        let settings = Settings::from_json(r#"{"cascade_in_database": true}"#).unwrap();
        assert!(settings.cascade_in_database);
        assert_eq!(settings.database_url, DEFAULT_DATABASE_URL);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = Settings::from_json("{").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn flags() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" 0 "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn builders() {
        let settings = Settings::default()
            .with_database_url("sqlite::memory:")
            .with_cascade_in_database(true);
        assert_eq!(settings.database_url, "sqlite::memory:");
        assert!(settings.cascade_in_database);
    }
}
