//! Embedded connector configuration.
//!
//! Configuration arrives as flat string properties (the same map is passed on
//! to the connector). The runtime recognizes:
//!
//! | Property                   | Required | Default |
//! |----------------------------|----------|---------|
//! | `name`                     | yes      |         |
//! | `connector.class`          | yes      |         |
//! | `offset.flush.timeout.ms`  | no       | `5000`  |
//! | `internal.key.converter`   | no       | `string`|
//! | `internal.value.converter` | no       | `json`  |

use crate::connector::Properties;
use crate::converter::ConverterKind;
use crate::error::ConfigError;
use std::env;
use std::time::Duration;
use validator::Validate;

pub const CONNECTOR_NAME: &str = "name";
pub const CONNECTOR_CLASS: &str = "connector.class";
pub const OFFSET_FLUSH_TIMEOUT_MS: &str = "offset.flush.timeout.ms";
pub const INTERNAL_KEY_CONVERTER: &str = "internal.key.converter";
pub const INTERNAL_VALUE_CONVERTER: &str = "internal.value.converter";

/// Default bound on how long a single offset flush may take.
pub const DEFAULT_OFFSET_FLUSH_TIMEOUT_MS: u64 = 5000;

/// Environment variable prefix used by [`EmbeddedConfig::from_env`].
pub const ENV_PREFIX: &str = "EMBEDDED_CONNECTOR_";

#[derive(Debug, Clone, Validate)]
pub struct EmbeddedConfig {
    /// Unique name for this connector instance; also the offset namespace
    #[validate(length(min = 1, message = "'name' is required"))]
    pub name: String,

    /// Registry key of the connector to run
    #[validate(length(min = 1, message = "'connector.class' is required"))]
    pub connector_class: String,

    /// Maximum time to wait for an offset flush before cancelling it
    #[validate(range(min = 1, message = "'offset.flush.timeout.ms' must be positive"))]
    pub offset_flush_timeout_ms: u64,

    pub key_converter: ConverterKind,

    pub value_converter: ConverterKind,

    /// Every property, including the ones above, as handed to the connector
    pub properties: Properties,
}

impl EmbeddedConfig {
    /// Build a configuration from flat properties.
    ///
    /// Values that cannot be parsed are rejected here; missing required fields
    /// are reported by [`Validate::validate`].
    pub fn from_properties(properties: Properties) -> Result<Self, ConfigError> {
        let get = |key: &str| properties.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let offset_flush_timeout_ms = match get(OFFSET_FLUSH_TIMEOUT_MS) {
            Some(raw) => raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                field: OFFSET_FLUSH_TIMEOUT_MS,
                value: raw.to_string(),
            })?,
            None => DEFAULT_OFFSET_FLUSH_TIMEOUT_MS,
        };

        let converter = |field: &'static str, default: ConverterKind| match get(field) {
            Some(raw) => ConverterKind::parse(raw).ok_or_else(|| ConfigError::InvalidValue {
                field,
                value: raw.to_string(),
            }),
            None => Ok(default),
        };
        let key_converter = converter(INTERNAL_KEY_CONVERTER, ConverterKind::String)?;
        let value_converter = converter(INTERNAL_VALUE_CONVERTER, ConverterKind::Json)?;

        Ok(Self {
            name: get(CONNECTOR_NAME).unwrap_or_default().to_string(),
            connector_class: get(CONNECTOR_CLASS).unwrap_or_default().to_string(),
            offset_flush_timeout_ms,
            key_converter,
            value_converter,
            properties,
        })
    }

    /// Build a configuration from `EMBEDDED_CONNECTOR_*` environment variables,
    /// loading `.env` first if present.
    ///
    /// `EMBEDDED_CONNECTOR_CONNECTOR_CLASS=pg` becomes `connector.class=pg`.
    /// Every `_` maps to `.`, so properties whose names contain an underscore
    /// (e.g. `database.server_name`) cannot be set this way; use
    /// [`EmbeddedConfig::from_properties`] for those.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let properties = env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(ENV_PREFIX)
                    .map(|rest| (rest.to_ascii_lowercase().replace('_', "."), value))
            })
            .collect();

        Self::from_properties(properties)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.offset_flush_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = EmbeddedConfig::from_properties(props(&[
            ("name", "inventory"),
            ("connector.class", "postgres"),
            ("database.hostname", "localhost"),
        ]))
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.name, "inventory");
        assert_eq!(config.commit_timeout(), Duration::from_millis(5000));
        assert_eq!(config.key_converter, ConverterKind::String);
        assert_eq!(config.value_converter, ConverterKind::Json);
        assert_eq!(
            config.properties.get("database.hostname").map(String::as_str),
            Some("localhost")
        );
    }

    #[test]
    fn test_missing_required_fields_fail_validation() {
        let config = EmbeddedConfig::from_properties(props(&[("name", "  ")])).unwrap();
        let errors = config.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("connector_class"));
    }

    #[test]
    fn test_zero_timeout_fails_validation() {
        let config = EmbeddedConfig::from_properties(props(&[
            ("name", "a"),
            ("connector.class", "b"),
            ("offset.flush.timeout.ms", "0"),
        ]))
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unparseable_values_are_rejected() {
        let result = EmbeddedConfig::from_properties(props(&[
            ("offset.flush.timeout.ms", "soon"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: OFFSET_FLUSH_TIMEOUT_MS, .. })
        ));

        let result = EmbeddedConfig::from_properties(props(&[
            ("internal.value.converter", "avro"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: INTERNAL_VALUE_CONVERTER, .. })
        ));
    }

    #[test]
    fn test_env_names_map_underscores_to_dots() {
        env::set_var("EMBEDDED_CONNECTOR_DATABASE_SERVER_NAME", "inventory-db");

        let config = EmbeddedConfig::from_env().unwrap();

        assert_eq!(
            config.properties.get("database.server.name").map(String::as_str),
            Some("inventory-db")
        );
        assert!(!config.properties.contains_key("database.server_name"));
        env::remove_var("EMBEDDED_CONNECTOR_DATABASE_SERVER_NAME");
    }

    #[test]
    fn test_converter_selection() {
        let config = EmbeddedConfig::from_properties(props(&[
            ("internal.key.converter", "json"),
            ("internal.value.converter", "string"),
        ]))
        .unwrap();
        assert_eq!(config.key_converter, ConverterKind::Json);
        assert_eq!(config.value_converter, ConverterKind::String);
    }
}
