//! Typed configuration entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Declared type of a configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfigType {
    Integer,
    Float,
    Boolean,
    Text,
    Json,
}

impl ConfigType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigType::Integer => "INTEGER",
            ConfigType::Float => "FLOAT",
            ConfigType::Boolean => "BOOLEAN",
            ConfigType::Text => "TEXT",
            ConfigType::Json => "JSON",
        }
    }

    /// Picks the narrowest type that accepts `value`.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => ConfigType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => ConfigType::Integer,
            Value::Number(_) => ConfigType::Float,
            Value::String(_) => ConfigType::Text,
            _ => ConfigType::Json,
        }
    }

    /// Returns true when `value` is a valid instance of this type.
    ///
    /// Integers are accepted where a float is declared.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ConfigType::Integer => value.as_i64().is_some(),
            ConfigType::Float => value.is_number(),
            ConfigType::Boolean => value.is_boolean(),
            ConfigType::Text => value.is_string(),
            ConfigType::Json => true,
        }
    }

    /// Encodes a value for the TEXT storage column.
    pub fn encode(&self, value: &Value) -> String {
        match (self, value) {
            (ConfigType::Text, Value::String(s)) => s.clone(),
            _ => value.to_string(),
        }
    }

    /// Decodes a stored TEXT column back into a value of this type.
    pub fn decode(&self, raw: &str) -> Result<Value, String> {
        match self {
            ConfigType::Integer => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| format!("'{}' is not an integer: {}", raw, e)),
            ConfigType::Float => {
                let parsed = raw
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| format!("'{}' is not a float: {}", raw, e))?;
                serde_json::Number::from_f64(parsed)
                    .map(Value::Number)
                    .ok_or_else(|| format!("'{}' is not a finite float", raw))
            }
            ConfigType::Boolean => parse_bool(raw)
                .map(Value::Bool)
                .ok_or_else(|| format!("'{}' is not a boolean", raw)),
            ConfigType::Text => Ok(Value::String(raw.to_string())),
            ConfigType::Json => {
                serde_json::from_str(raw).map_err(|e| format!("invalid JSON '{}': {}", raw, e))
            }
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "t" | "y" => Some(true),
        "false" | "no" | "0" | "f" | "n" => Some(false),
        _ => None,
    }
}

/// Short name of a JSON value's kind, for error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "float",
        Value::String(_) => "text",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INTEGER" => Ok(ConfigType::Integer),
            "FLOAT" => Ok(ConfigType::Float),
            "BOOLEAN" => Ok(ConfigType::Boolean),
            "TEXT" => Ok(ConfigType::Text),
            "JSON" => Ok(ConfigType::Json),
            other => Err(format!("unknown config type '{}'", other)),
        }
    }
}

/// A global configuration value with its declared type and default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub config_type: ConfigType,
    pub default_value: Value,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub value: Value,
}

impl ConfigEntry {
    /// Creates an entry whose default is its initial value.
    pub fn new(
        key: impl Into<String>,
        value: Value,
        config_type: ConfigType,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            config_type,
            default_value: value.clone(),
            description,
            updated_at: now,
            value,
        }
    }

    pub fn is_default(&self) -> bool {
        self.value == self.default_value
    }
}
