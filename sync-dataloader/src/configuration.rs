//! Logic for loading configuration in to an object model

use displaydoc::Display;
use schemars::gen::SchemaSettings;
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
}

/// Execution and batching options.
///
/// Can be created through `serde::Deserialize` from various formats, with
/// [`Configuration::from_yaml`], or inline with the builder.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Query parser options.
    #[serde(default)]
    pub parser: Parser,

    /// Batch loader options.
    #[serde(default)]
    pub batching: Batching,
}

/// Query parser options.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Parser {
    /// Maximum nesting depth the parser accepts before rejecting a query.
    /// Defaults to 500
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
}

/// Batch loader options.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Batching {
    /// Maximum number of keys passed to one call of a batch function.
    /// Unbounded by default
    #[serde(default)]
    pub max_batch_size: Option<usize>,
}

fn default_recursion_limit() -> usize {
    500
}

impl Default for Parser {
    fn default() -> Self {
        Self {
            recursion_limit: default_recursion_limit(),
        }
    }
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder]
    pub fn new(recursion_limit: Option<usize>, max_batch_size: Option<usize>) -> Self {
        Self {
            parser: Parser {
                recursion_limit: recursion_limit.unwrap_or_else(default_recursion_limit),
            },
            batching: Batching { max_batch_size },
        }
    }

    /// Parses and validates a YAML configuration. An empty document yields the defaults.
    pub fn from_yaml(raw_yaml: &str) -> Result<Self, ConfigurationError> {
        if raw_yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let configuration: Configuration = serde_yaml::from_str(raw_yaml).map_err(|e| {
            ConfigurationError::InvalidConfiguration {
                message: "failed to parse yaml",
                error: e.to_string(),
            }
        })?;
        configuration.validate()
    }

    fn validate(self) -> Result<Self, ConfigurationError> {
        if self.batching.max_batch_size == Some(0) {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "batching.max_batch_size",
                error: "must be greater than zero".to_string(),
            });
        }
        if self.parser.recursion_limit == 0 {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "parser.recursion_limit",
                error: "must be greater than zero".to_string(),
            });
        }
        Ok(self)
    }
}

/// Generate a JSON schema for the configuration.
pub fn generate_config_schema() -> RootSchema {
    let settings = SchemaSettings::draft07().with(|s| {
        s.option_nullable = true;
        s.option_add_null_type = false;
        s.inline_subschemas = true;
    });
    settings.into_generator().into_root_schema_for::<Configuration>()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        let configuration = Configuration::from_yaml("").unwrap();
        assert_eq!(configuration, Configuration::default());
        assert_eq!(configuration.parser.recursion_limit, 500);
        assert_eq!(configuration.batching.max_batch_size, None);
    }

    #[test]
    fn full_yaml() {
        let configuration = Configuration::from_yaml(
            r#"
parser:
  recursion_limit: 64
batching:
  max_batch_size: 100
"#,
        )
        .unwrap();
        assert_eq!(
            configuration,
            Configuration::builder()
                .recursion_limit(64)
                .max_batch_size(100)
                .build()
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = Configuration::from_yaml(
            r#"
batching:
  max_batch: 100
"#,
        )
        .unwrap_err();
        assert!(error.to_string().starts_with("failed to parse yaml"));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let error = Configuration::from_yaml("batching:\n  max_batch_size: 0\n").unwrap_err();
        assert_eq!(
            error.to_string(),
            "batching.max_batch_size: must be greater than zero"
        );
    }

    #[test]
    fn schema_lists_every_section() {
        let schema = serde_json::to_value(generate_config_schema()).unwrap();
        let properties = schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("parser"));
        assert!(properties.contains_key("batching"));
        assert_eq!(schema["additionalProperties"], serde_json::json!(false));
    }
}
