//! The settings document persisted to disk

use crate::constants::{
    DEFAULT_PRICE_UPDATE_INTERVAL_SECS, DEFAULT_SETTINGS_UPDATE_INTERVAL_SECS,
    PRICE_UPDATE_INTERVAL, PROGRAM_URL, SETTINGS_UPDATE_INTERVAL, SETTINGS_VERSION,
};
use crate::types::Symbol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Basket definition: constituent symbol to weight
pub type Basket = BTreeMap<Symbol, f64>;

/// API key and secret for one site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

/// Whole settings blob
///
/// Sections are optional so a hand-edited or patched document can still be
/// represented; [`Settings::normalize`] puts them back after a load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub program_url: String,
    pub version: String,
    /// When the document was last persisted
    pub last_updated: DateTime<Utc>,
    pub options: Option<BTreeMap<String, Value>>,
    pub credentials: Option<BTreeMap<String, Credentials>>,
    pub baskets: Option<BTreeMap<Symbol, Basket>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            program_url: PROGRAM_URL.to_string(),
            version: SETTINGS_VERSION.to_string(),
            last_updated: Utc::now(),
            options: Some(default_options()),
            credentials: Some(BTreeMap::new()),
            baskets: Some(BTreeMap::new()),
        }
    }
}

impl Settings {
    /// Restores the section invariants after loading from disk
    ///
    /// Missing sections are created and default options that are absent are
    /// filled in. Values already present are left alone.
    pub fn normalize(&mut self) {
        let options = self.options.get_or_insert_with(BTreeMap::new);
        for (name, value) in default_options() {
            options.entry(name).or_insert(value);
        }
        self.credentials.get_or_insert_with(BTreeMap::new);
        self.baskets.get_or_insert_with(BTreeMap::new);
    }
}

/// Default runtime options
pub fn default_options() -> BTreeMap<String, Value> {
    let mut options = BTreeMap::new();
    options.insert(
        PRICE_UPDATE_INTERVAL.to_string(),
        Value::from(DEFAULT_PRICE_UPDATE_INTERVAL_SECS),
    );
    // keep the settings file synced every 5 minutes
    options.insert(
        SETTINGS_UPDATE_INTERVAL.to_string(),
        Value::from(DEFAULT_SETTINGS_UPDATE_INTERVAL_SECS),
    );
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"version": "0.0"}"#).unwrap();
        assert_eq!(settings.version, "0.0");
        assert_eq!(settings.program_url, PROGRAM_URL);
        assert!(settings.options.is_some());
    }

    #[test]
    fn test_normalize_backfills_sections_and_options() {
        let mut settings: Settings = serde_json::from_str(
            r#"{"options": {"settings_update_interval": 10}, "credentials": null, "baskets": null}"#,
        )
        .unwrap();
        assert!(settings.credentials.is_none());

        settings.normalize();

        let options = settings.options.as_ref().unwrap();
        assert_eq!(options[SETTINGS_UPDATE_INTERVAL], Value::from(10));
        assert_eq!(
            options[PRICE_UPDATE_INTERVAL],
            Value::from(DEFAULT_PRICE_UPDATE_INTERVAL_SECS)
        );
        assert!(settings.credentials.is_some());
        assert!(settings.baskets.is_some());
    }

    #[test]
    fn test_baskets_round_trip_through_json() {
        let mut settings = Settings::default();
        let mut basket = Basket::new();
        basket.insert(Symbol::new("xbt"), 2.0);
        basket.insert(Symbol::new("eth"), 1.0);
        settings
            .baskets
            .as_mut()
            .unwrap()
            .insert(Symbol::new("mix"), basket.clone());

        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["baskets"]["MIX"]["XBT"], Value::from(2.0));

        let back: Settings = serde_json::from_value(json).unwrap();
        assert_eq!(back.baskets.unwrap()[&Symbol::new("MIX")], basket);
    }
}
