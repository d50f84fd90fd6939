//! The `getmanifest` reply.

use serde_json::{Map, Value, json};

use super::Plugin;

/// Renders what the plugin offers, honouring the host's deprecation setting.
pub(super) fn render<S>(plugin: &Plugin<S>) -> Value {
    let allow_deprecated = plugin.runtime.allow_deprecated;
    let options: Vec<Value> = plugin
        .options
        .iter()
        .filter(|option| allow_deprecated || !option.is_deprecated())
        .map(|option| option.manifest_entry())
        .collect();

    json!({
        "options": options,
        "rpcmethods": plugin.commands.manifest_entries(allow_deprecated),
        "subscriptions": plugin.notifications.topics(),
        "hooks": plugin.hooks.manifest_entries(),
        "notifications": [],
        "featurebits": Value::Object(Map::new()),
        "dynamic": plugin.dynamic,
        "nonnumericids": true,
    })
}
