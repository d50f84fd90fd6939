//! Plugin options advertised in the manifest and delivered with `init`.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::error::EngineError;

/// Wire type of a plugin option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// Free-form string.
    String,
    /// Signed integer.
    Int,
    /// Boolean taking an explicit value.
    Bool,
    /// Boolean that is `true` when present on the host command line.
    Flag,
}

impl OptionKind {
    /// Returns the type name used in the manifest.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Flag => "flag",
        }
    }
}

/// A typed option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// Value of a `string` option.
    String(String),
    /// Value of an `int` option.
    Int(i64),
    /// Value of a `bool` or `flag` option.
    Bool(bool),
}

impl OptionValue {
    fn to_json(&self) -> Value {
        match self {
            Self::String(text) => Value::from(text.as_str()),
            Self::Int(number) => Value::from(*number),
            Self::Bool(flag) => Value::from(*flag),
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(text) => f.write_str(text),
            Self::Int(number) => write!(f, "{number}"),
            Self::Bool(flag) => write!(f, "{flag}"),
        }
    }
}

/// Declaration of one plugin option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginOption {
    name: String,
    kind: OptionKind,
    description: String,
    default: Option<OptionValue>,
    deprecated: bool,
}

impl PluginOption {
    /// Declares an option.
    pub fn new(name: impl Into<String>, kind: OptionKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            default: None,
            deprecated: false,
        }
    }

    /// Sets the value used when the host does not supply one.
    #[must_use]
    pub fn with_default(mut self, value: OptionValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Marks the option as deprecated.
    #[must_use]
    pub const fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Returns the option name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the option type.
    #[must_use]
    pub const fn kind(&self) -> OptionKind {
        self.kind
    }

    /// Returns whether the option is deprecated.
    #[must_use]
    pub const fn is_deprecated(&self) -> bool {
        self.deprecated
    }

    pub(crate) fn manifest_entry(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("name".into(), Value::from(self.name.as_str()));
        entry.insert("type".into(), Value::from(self.kind.as_str()));
        entry.insert("description".into(), Value::from(self.description.as_str()));
        match (&self.default, self.kind) {
            (Some(value), _) => {
                entry.insert("default".into(), value.to_json());
            }
            (None, OptionKind::Flag) => {
                entry.insert("default".into(), Value::Bool(false));
            }
            (None, _) => {}
        }
        entry.insert("deprecated".into(), Value::Bool(self.deprecated));
        Value::Object(entry)
    }

    fn parse(&self, raw: &Value) -> Result<OptionValue, EngineError> {
        let parsed = match (self.kind, raw) {
            (OptionKind::String, Value::String(text)) => Some(OptionValue::String(text.clone())),
            (OptionKind::String, Value::Number(number)) => {
                Some(OptionValue::String(number.to_string()))
            }
            (OptionKind::Int, Value::Number(number)) => number.as_i64().map(OptionValue::Int),
            (OptionKind::Int, Value::String(text)) => text.trim().parse().ok().map(OptionValue::Int),
            (OptionKind::Bool | OptionKind::Flag, Value::Bool(flag)) => Some(OptionValue::Bool(*flag)),
            (OptionKind::Bool | OptionKind::Flag, Value::String(text)) => match text.as_str() {
                "true" => Some(OptionValue::Bool(true)),
                "false" => Some(OptionValue::Bool(false)),
                _ => None,
            },
            _ => None,
        };
        parsed.ok_or_else(|| {
            EngineError::configuration(format!(
                "option '{}' expects a {} value, got {raw}",
                self.name,
                self.kind.as_str()
            ))
        })
    }
}

/// Option values in effect after `init`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionValues {
    values: HashMap<String, OptionValue>,
}

impl OptionValues {
    /// Resolves the declared options against the `options` object of `init`.
    ///
    /// Names the plugin never declared are ignored; declared options the host
    /// left out take their default.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] when a supplied value does not
    /// fit the declared type.
    pub fn resolve(declared: &[PluginOption], supplied: &Value) -> Result<Self, EngineError> {
        let mut values = HashMap::new();
        for option in declared {
            let value = match supplied.get(option.name()) {
                Some(raw) if !raw.is_null() => Some(option.parse(raw)?),
                _ => option.default.clone().or_else(|| {
                    (option.kind == OptionKind::Flag).then_some(OptionValue::Bool(false))
                }),
            };
            if let Some(resolved) = value {
                values.insert(option.name.clone(), resolved);
            }
        }
        Ok(Self { values })
    }

    /// Returns the raw value of an option.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    /// Returns a string option.
    #[must_use]
    pub fn string(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(OptionValue::String(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Returns an integer option.
    #[must_use]
    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(OptionValue::Int(number)) => Some(*number),
            _ => None,
        }
    }

    /// Returns a boolean or flag option, treating absence as `false`.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(OptionValue::Bool(true)))
    }

    /// Returns the values as a JSON object, for diagnostics.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let object: Map<String, Value> = self
            .values
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        Value::Object(object)
    }
}
