//! Tracing / logging initialisation.

use std::collections::HashMap;

use serde::Deserialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Subscriber settings: the `[log]` table of the config file, then CLI flags.
///
/// ```toml
/// [log]
/// level = "info"
/// json = false
///
/// [log.components]
/// tileindex-evm = "debug"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Default level for every target.
    #[serde(default = "default_level")]
    pub level: String,
    /// Per-crate level overrides, keyed by crate name.
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// One JSON object per line instead of the pretty formatter.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

#[derive(Deserialize)]
struct LogSection {
    #[serde(default)]
    log: LogConfig,
}

impl LogConfig {
    /// Read the `[log]` table of a config document; defaults when absent.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<LogSection>(text).map(|section| section.log)
    }

    /// `RUST_LOG` wins over the configured directives when set.
    fn filter(&self) -> EnvFilter {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
        EnvFilter::try_new(self.directives()).unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Directive string such as `"info,tileindex_evm=debug"`.
    fn directives(&self) -> String {
        let mut directives = self.level.clone();
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_tracing(config: &LogConfig) {
    let filter = config.filter();
    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_overrides_use_crate_names() {
        let config = LogConfig {
            level: "warn".into(),
            components: HashMap::from([
                ("tileindex-evm".to_string(), "debug".to_string()),
                ("tileindex-core".to_string(), "info".to_string()),
            ]),
            json: false,
        };
        assert_eq!(
            config.directives(),
            "warn,tileindex_core=info,tileindex_evm=debug"
        );
    }

    #[test]
    fn reads_log_table_next_to_indexer_settings() {
        let config = LogConfig::from_toml_str(
            r#"
            rpc_url = "http://localhost:8545"

            [contracts]
            deployer = "0x00000000000000000000000000000000000000d0"

            [log]
            level = "debug"
            json = true

            [log.components]
            tileindex-storage = "trace"
            "#,
        )
        .unwrap();
        assert!(config.json);
        assert_eq!(config.directives(), "debug,tileindex_storage=trace");
    }

    #[test]
    fn missing_log_table_uses_defaults() {
        let config = LogConfig::from_toml_str("start_block = 5\n").unwrap();
        assert_eq!(config.directives(), "info");
        assert!(!config.json);
    }
}
