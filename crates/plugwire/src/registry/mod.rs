//! Command registration and lookup.
//!
//! The registry is built once from the plugin's static command table and is
//! read-only afterwards. Lookups honour the host's `allow-deprecated-apis`
//! setting: deprecated commands disappear from both the manifest and dispatch
//! when the host disallows them.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Value, json};

use crate::error::EngineError;
use crate::plugin::Handler;

/// Methods the engine answers itself.
pub(crate) const RESERVED_METHODS: [&str; 2] = ["getmanifest", "init"];

/// Static description of one JSON-RPC command.
pub struct CommandSpec<S> {
    name: String,
    category: String,
    description: String,
    long_description: String,
    usage: String,
    handler: Handler<S>,
    deprecated: bool,
}

impl<S> fmt::Debug for CommandSpec<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("deprecated", &self.deprecated)
            .finish_non_exhaustive()
    }
}

impl<S> CommandSpec<S> {
    /// Describes a command served by `handler`, in the `plugin` category.
    pub fn new(name: impl Into<String>, handler: Handler<S>) -> Self {
        Self {
            name: name.into(),
            category: "plugin".into(),
            description: String::new(),
            long_description: String::new(),
            usage: String::new(),
            handler,
            deprecated: false,
        }
    }

    /// Sets the help category.
    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Sets the one-line description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the long description.
    #[must_use]
    pub fn long_description(mut self, long_description: impl Into<String>) -> Self {
        self.long_description = long_description.into();
        self
    }

    /// Sets the parameter synopsis, for example `[name]`.
    #[must_use]
    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    /// Marks the command as deprecated.
    #[must_use]
    pub const fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Returns the method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether the command is deprecated.
    #[must_use]
    pub const fn is_deprecated(&self) -> bool {
        self.deprecated
    }

    fn manifest_entry(&self) -> Value {
        let long_description = if self.long_description.is_empty() {
            &self.description
        } else {
            &self.long_description
        };
        json!({
            "name": self.name,
            "category": self.category,
            "usage": self.usage,
            "description": self.description,
            "long_description": long_description,
            "deprecated": self.deprecated,
        })
    }
}

/// Frozen table of commands keyed by method name.
pub(crate) struct CommandRegistry<S> {
    specs: Vec<CommandSpec<S>>,
    index: HashMap<String, usize>,
}

impl<S> CommandRegistry<S> {
    /// Builds the registry, rejecting blank, reserved and duplicate names.
    pub(crate) fn from_specs(specs: Vec<CommandSpec<S>>) -> Result<Self, EngineError> {
        let mut index = HashMap::with_capacity(specs.len());
        for (position, spec) in specs.iter().enumerate() {
            if spec.name.trim().is_empty() {
                return Err(EngineError::configuration("command names must not be blank"));
            }
            if RESERVED_METHODS.contains(&spec.name.as_str()) {
                return Err(EngineError::configuration(format!(
                    "command '{}' is reserved by the engine",
                    spec.name
                )));
            }
            if index.insert(spec.name.clone(), position).is_some() {
                return Err(EngineError::configuration(format!(
                    "command '{}' is registered more than once",
                    spec.name
                )));
            }
        }
        Ok(Self { specs, index })
    }

    /// Returns the handler for `method`, hiding deprecated commands unless
    /// they are allowed.
    pub(crate) fn lookup(&self, method: &str, allow_deprecated: bool) -> Option<Handler<S>> {
        self.index
            .get(method)
            .and_then(|position| self.specs.get(*position))
            .filter(|spec| allow_deprecated || !spec.deprecated)
            .map(|spec| spec.handler)
    }

    pub(crate) fn contains(&self, method: &str) -> bool {
        self.index.contains_key(method)
    }

    /// Returns the `rpcmethods` manifest entries in registration order.
    pub(crate) fn manifest_entries(&self, allow_deprecated: bool) -> Vec<Value> {
        self.specs
            .iter()
            .filter(|spec| allow_deprecated || !spec.deprecated)
            .map(CommandSpec::manifest_entry)
            .collect()
    }
}
