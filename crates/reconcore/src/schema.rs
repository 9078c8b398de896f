//! Declarative node metadata and configuration validation.

use crate::{NodeCategory, NodeError};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, OnceLock};

pub type ConfigSchemaMap = BTreeMap<String, ConfigField>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Select,
    Multiselect,
    #[serde(rename = "textarea")]
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldValidation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// One configuration field of a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<FieldValidation>,
}

impl ConfigField {
    pub fn new(field_type: FieldType, label: impl Into<String>) -> Self {
        Self {
            field_type,
            label: label.into(),
            description: None,
            required: false,
            default: None,
            options: Vec::new(),
            validation: None,
        }
    }

    pub fn string(label: impl Into<String>) -> Self {
        Self::new(FieldType::String, label)
    }

    pub fn number(label: impl Into<String>) -> Self {
        Self::new(FieldType::Number, label)
    }

    pub fn boolean(label: impl Into<String>) -> Self {
        Self::new(FieldType::Boolean, label)
    }

    pub fn select(label: impl Into<String>) -> Self {
        Self::new(FieldType::Select, label)
    }

    pub fn multiselect(label: impl Into<String>) -> Self {
        Self::new(FieldType::Multiselect, label)
    }

    pub fn text(label: impl Into<String>) -> Self {
        Self::new(FieldType::Text, label)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        let validation = self.validation.get_or_insert_with(FieldValidation::default);
        validation.min = Some(min);
        validation.max = Some(max);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.validation
            .get_or_insert_with(FieldValidation::default)
            .pattern = Some(pattern.into());
        self
    }

    pub fn option(mut self, label: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.push(SelectOption {
            label: label.into(),
            value: value.into(),
        });
        self
    }

    /// Add options whose label and value are the same string.
    pub fn choices(mut self, values: &[&str]) -> Self {
        for value in values {
            self = self.option(*value, *value);
        }
        self
    }

    fn allows(&self, value: &Value) -> bool {
        self.options.iter().any(|o| &o.value == value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub port_type: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PortDefinition {
    pub fn new(name: impl Into<String>, port_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port_type: port_type.into(),
            required: false,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Everything the registry knows about a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    #[serde(rename = "type")]
    pub node_type: String,
    pub category: NodeCategory,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
    pub config_schema: ConfigSchemaMap,
    pub default_config: Map<String, Value>,
}

impl NodeDefinition {
    /// Check a configuration bag against this definition's schema.
    pub fn validate(&self, config: &Map<String, Value>) -> ConfigValidation {
        validate_config(&self.config_schema, config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigViolation {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigValidation {
    pub violations: Vec<ConfigViolation>,
}

impl ConfigValidation {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.message.clone()).collect()
    }

    pub fn into_result(self) -> Result<(), NodeError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(NodeError::InvalidConfig(self.messages()))
        }
    }

    fn push(&mut self, field: &str, message: String) {
        self.violations.push(ConfigViolation {
            field: field.to_string(),
            message,
        });
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

/// Field patterns compiled so far, keyed by source text.
static PATTERNS: OnceLock<Mutex<HashMap<String, Regex>>> = OnceLock::new();

fn compiled_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let cache = PATTERNS.get_or_init(Default::default);
    if let Some(re) = cache.lock().ok().and_then(|p| p.get(pattern).cloned()) {
        return Ok(re);
    }
    let re = Regex::new(pattern)?;
    if let Ok(mut patterns) = cache.lock() {
        patterns.insert(pattern.to_string(), re.clone());
    }
    Ok(re)
}

/// Validate a configuration bag: required fields, types, numeric bounds,
/// patterns and option membership. Keys absent from the schema are ignored.
pub fn validate_config(schema: &ConfigSchemaMap, config: &Map<String, Value>) -> ConfigValidation {
    let mut result = ConfigValidation::default();

    for (key, field) in schema {
        let value = config.get(key);
        if is_blank(value) {
            if field.required {
                result.push(key, format!("Required field '{}' ({}) is missing", key, field.label));
            }
            continue;
        }
        let Some(value) = value else { continue };

        match field.field_type {
            FieldType::Number => match value.as_f64() {
                None => result.push(key, format!("Field '{}' must be a number", key)),
                Some(n) => {
                    if let Some(v) = &field.validation {
                        if let Some(min) = v.min.filter(|min| n < *min) {
                            result.push(key, format!("Field '{}' must be at least {}", key, min));
                        }
                        if let Some(max) = v.max.filter(|max| n > *max) {
                            result.push(key, format!("Field '{}' must be at most {}", key, max));
                        }
                    }
                }
            },
            FieldType::String | FieldType::Text => match value.as_str() {
                None => result.push(key, format!("Field '{}' must be a string", key)),
                Some(s) => {
                    let pattern = field.validation.as_ref().and_then(|v| v.pattern.as_deref());
                    if let Some(pattern) = pattern {
                        match compiled_pattern(pattern) {
                            Ok(re) if re.is_match(s) => {}
                            Ok(_) => result.push(key, format!("Field '{}' format is invalid", key)),
                            Err(e) => result.push(
                                key,
                                format!("Field '{}' has an unusable pattern: {}", key, e),
                            ),
                        }
                    }
                }
            },
            FieldType::Boolean => {
                if !value.is_boolean() {
                    result.push(key, format!("Field '{}' must be a boolean", key));
                }
            }
            FieldType::Select => {
                if !field.options.is_empty() && !field.allows(value) {
                    result.push(key, format!("Field '{}' has an invalid option: {}", key, value));
                }
            }
            FieldType::Multiselect => match value.as_array() {
                None => result.push(key, format!("Field '{}' must be a list", key)),
                Some(items) => {
                    let invalid: Vec<String> = items
                        .iter()
                        .filter(|item| !field.options.is_empty() && !field.allows(item))
                        .map(|item| item.to_string())
                        .collect();
                    if !invalid.is_empty() {
                        result.push(
                            key,
                            format!("Field '{}' has invalid options: {}", key, invalid.join(", ")),
                        );
                    }
                }
            },
        }
    }

    result
}

/// A typed node configuration that knows its own schema.
pub trait ConfigSchema: Serialize + DeserializeOwned + Default {
    fn schema() -> ConfigSchemaMap;

    fn default_config() -> Map<String, Value> {
        match serde_json::to_value(Self::default()) {
            Ok(Value::Object(map)) => map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .collect(),
            _ => Map::new(),
        }
    }

    /// Validate the bag against the schema, then parse it into the typed struct.
    /// Null entries fall back to the struct's defaults.
    fn from_config(config: &Map<String, Value>) -> Result<Self, NodeError> {
        validate_config(&Self::schema(), config).into_result()?;
        let cleaned: Map<String, Value> = config
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(Value::Object(cleaned))
            .map_err(|e| NodeError::Configuration(e.to_string()))
    }
}

/// Declare a typed node configuration.
///
/// Each field is written `name: Type = default => field_spec`. The macro emits
/// the struct (deserialized with `#[serde(default)]`), its `Default` impl and a
/// [`ConfigSchema`] impl whose field defaults come from that `Default`.
#[macro_export]
macro_rules! node_config {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident : $ty:ty = $default:expr => $spec:expr
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, ::serde::Serialize, ::serde::Deserialize)]
        #[serde(default)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $ty,
            )*
        }

        impl ::std::default::Default for $name {
            fn default() -> Self {
                Self {
                    $( $field: $default, )*
                }
            }
        }

        impl $crate::schema::ConfigSchema for $name {
            fn schema() -> $crate::schema::ConfigSchemaMap {
                let defaults = <Self as $crate::schema::ConfigSchema>::default_config();
                let mut schema = $crate::schema::ConfigSchemaMap::new();
                $(
                    let mut field: $crate::schema::ConfigField = $spec;
                    if let Some(value) = defaults.get(stringify!($field)) {
                        field.default = Some(value.clone());
                    }
                    schema.insert(stringify!($field).to_string(), field);
                )*
                schema
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    node_config! {
        struct ScanConfig {
            threads: u32 = 10 => ConfigField::number("Threads").range(1.0, 100.0).required(),
            mode: String = "passive".into() => ConfigField::select("Mode").choices(&["passive", "active"]),
            domain: Option<String> = None => ConfigField::string("Domain").pattern(r"^[a-z0-9.-]+$"),
            sources: Vec<String> = vec!["all".into()] => ConfigField::multiselect("Sources").choices(&["all", "dns"]),
        }
    }

    fn config(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_field_pattern_is_cached_after_first_use() {
        let mut schema = ConfigSchemaMap::new();
        schema.insert("port".into(), ConfigField::string("Port").pattern(r"^[0-9]{1,5}$"));

        let result = validate_config(&schema, &config(json!({"port": "8080"})));
        assert!(result.is_valid());
        let cached = PATTERNS.get().unwrap().lock().unwrap().contains_key(r"^[0-9]{1,5}$");
        assert!(cached);

        let result = validate_config(&schema, &config(json!({"port": "http"})));
        assert_eq!(result.violations.len(), 1);
        assert!(result.violations[0].message.contains("format is invalid"));
    }

    #[test]
    fn test_out_of_range_number_yields_one_violation() {
        let result = validate_config(&ScanConfig::schema(), &config(json!({"threads": 500})));
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].field, "threads");
        assert!(result.violations[0].message.contains("threads"));

        let result = validate_config(&ScanConfig::schema(), &config(json!({"threads": 10})));
        assert!(result.is_valid());
    }

    #[test]
    fn test_required_and_type_checks() {
        let result = validate_config(
            &ScanConfig::schema(),
            &config(json!({"threads": "", "mode": "loud", "sources": ["dns", "nope"], "domain": "Bad Domain"})),
        );
        let fields: Vec<&str> = result.violations.iter().map(|v| v.field.as_str()).collect();
        assert!(fields.contains(&"threads"));
        assert!(fields.contains(&"mode"));
        assert!(fields.contains(&"sources"));
        assert!(fields.contains(&"domain"));
    }

    #[test]
    fn test_schema_defaults_come_from_struct() {
        let schema = ScanConfig::schema();
        assert_eq!(schema["threads"].default, Some(json!(10)));
        assert_eq!(schema["sources"].default, Some(json!(["all"])));
        assert_eq!(schema["domain"].default, None);
    }

    #[test]
    fn test_from_config_fills_defaults() {
        let parsed = ScanConfig::from_config(&config(json!({"threads": 20, "domain": null}))).unwrap();
        assert_eq!(parsed.threads, 20);
        assert_eq!(parsed.mode, "passive");
        assert_eq!(parsed.domain, None);

        let err = ScanConfig::from_config(&config(json!({"threads": 0}))).unwrap_err();
        assert!(matches!(err, NodeError::InvalidConfig(_)));
    }
}
