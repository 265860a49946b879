//! Configuration management
//!
//! Editors hand settings over as loose JSON, either as the whole object or nested under
//! the extension's key, and usually only with the sections the user touched. Sections
//! are parsed independently so a malformed one falls back to its defaults without
//! discarding the rest.

use crate::proto::Product;
use crate::scan::errors::{CoordinatorError, CoordinatorResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

pub const SETTINGS_KEY: &str = "scanCoordinator";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub refresh: RefreshConfig,

    pub products: ProductsConfig,

    pub channel: ChannelConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RefreshConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProductsConfig {
    pub code: bool,

    pub open_source: bool,

    pub iac: bool,

    pub secrets: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelConfig {
    /// Queue depth at which a lagging coordinator is logged. Events are never dropped.
    pub backlog_warning: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { interval_ms: 500 }
    }
}

impl Default for ProductsConfig {
    fn default() -> Self {
        Self {
            code: true,
            open_source: true,
            iac: true,
            secrets: true,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            backlog_warning: 256,
        }
    }
}

impl ProductsConfig {
    pub fn is_enabled(&self, product: Product) -> bool {
        match product {
            Product::Code => self.code,
            Product::OpenSource => self.open_source,
            Product::IaC => self.iac,
            Product::Secrets => self.secrets,
        }
    }

    pub fn enabled(&self) -> Vec<Product> {
        Product::ALL
            .into_iter()
            .filter(|product| self.is_enabled(*product))
            .collect()
    }
}

impl CoordinatorConfig {
    pub fn from_lsp_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        if let Some(settings) = value.get(SETTINGS_KEY) {
            if let Ok(config) = serde_json::from_value::<CoordinatorConfig>(settings.clone()) {
                debug!("Deserialized configuration from '{}' key", SETTINGS_KEY);
                return Ok(config);
            }
        } else if let Ok(config) = serde_json::from_value::<CoordinatorConfig>(value.clone()) {
            debug!("Deserialized full configuration directly");
            return Ok(config);
        }

        let mut config = CoordinatorConfig::default();
        config.update_from_lsp_value(value)?;
        Ok(config)
    }

    /// Merges whichever sections parse; the rest keep their current values.
    pub fn update_from_lsp_value(
        &mut self,
        value: serde_json::Value,
    ) -> Result<(), serde_json::Error> {
        let settings = value.get(SETTINGS_KEY).unwrap_or(&value);

        if !settings.is_object() {
            return Err(serde::de::Error::custom(
                "configuration must be a JSON object",
            ));
        }

        if let Some(refresh) = settings.get("refresh") {
            if let Ok(refresh) = serde_json::from_value::<RefreshConfig>(refresh.clone()) {
                self.refresh = refresh;
                debug!("Updated refresh configuration");
            }
        }

        if let Some(products) = settings.get("products") {
            if let Ok(products) = serde_json::from_value::<ProductsConfig>(products.clone()) {
                self.products = products;
                debug!("Updated product configuration");
            }
        }

        if let Some(channel) = settings.get("channel") {
            if let Ok(channel) = serde_json::from_value::<ChannelConfig>(channel.clone()) {
                self.channel = channel;
                debug!("Updated channel configuration");
            }
        }

        info!("Configuration updated successfully");
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh.interval_ms)
    }

    pub fn validate(&self) -> CoordinatorResult<()> {
        if self.refresh.interval_ms == 0 {
            return Err(CoordinatorError::InvalidConfig {
                reason: "refresh.intervalMs must be greater than 0".to_string(),
            });
        }

        if self.channel.backlog_warning == 0 {
            return Err(CoordinatorError::InvalidConfig {
                reason: "channel.backlogWarning must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();

        assert_eq!(config.refresh_interval(), Duration::from_millis(500));
        assert_eq!(config.channel.backlog_warning, 256);
        assert_eq!(config.products.enabled(), Product::ALL.to_vec());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lsp_value_direct() {
        let config = CoordinatorConfig::from_lsp_value(json!({
            "refresh": { "intervalMs": 250 },
            "products": { "secrets": false }
        }))
        .unwrap();

        assert_eq!(config.refresh.interval_ms, 250);
        assert!(!config.products.is_enabled(Product::Secrets));
        assert!(config.products.is_enabled(Product::Code));
        assert_eq!(config.channel.backlog_warning, 256);
    }

    #[test]
    fn test_from_lsp_value_nested_under_settings_key() {
        let config = CoordinatorConfig::from_lsp_value(json!({
            "scanCoordinator": {
                "products": { "code": false, "iac": false }
            }
        }))
        .unwrap();

        assert_eq!(
            config.products.enabled(),
            vec![Product::OpenSource, Product::Secrets]
        );
    }

    #[test]
    fn test_malformed_section_keeps_defaults() {
        let config = CoordinatorConfig::from_lsp_value(json!({
            "refresh": { "intervalMs": "soon" },
            "channel": { "backlogWarning": 8 }
        }))
        .unwrap();

        assert_eq!(config.refresh.interval_ms, 500);
        assert_eq!(config.channel.backlog_warning, 8);
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(CoordinatorConfig::from_lsp_value(json!(42)).is_err());
    }

    #[test]
    fn test_update_merges_partial_settings() {
        let mut config = CoordinatorConfig::default();
        config.channel.backlog_warning = 32;

        config
            .update_from_lsp_value(json!({ "refresh": { "intervalMs": 100 } }))
            .unwrap();

        assert_eq!(config.refresh.interval_ms, 100);
        assert_eq!(config.channel.backlog_warning, 32);
    }

    #[test]
    fn test_validate_config() {
        let mut invalid = CoordinatorConfig::default();
        invalid.refresh.interval_ms = 0;
        assert!(matches!(
            invalid.validate(),
            Err(CoordinatorError::InvalidConfig { .. })
        ));

        let mut invalid = CoordinatorConfig::default();
        invalid.channel.backlog_warning = 0;
        assert!(invalid.validate().is_err());
    }
}
