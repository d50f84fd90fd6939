//! Hook registration and chain ordering.
//!
//! Several implementations may subscribe to the same hook. Each registration
//! names its owning plugin and may ask to run `before` or `after` other
//! plugins. At build time the constraints of every hook are resolved into a
//! single chain with Kahn's algorithm, ties falling back to registration
//! order. Constraints naming plugins that have no registration for the hook
//! are kept for the manifest (the host resolves them against plugins it
//! knows) but do not affect the local chain.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde_json::{Value, json};
use tracing::debug;

use crate::error::EngineError;
use crate::plugin::Handler;

/// Tracing target for hook resolution and chain execution.
pub(crate) const HOOKS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::hooks");

/// One implementation of a hook.
pub struct HookRegistration<S> {
    hook: String,
    plugin: Option<String>,
    handler: Handler<S>,
    before: Vec<String>,
    after: Vec<String>,
}

impl<S> fmt::Debug for HookRegistration<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistration")
            .field("hook", &self.hook)
            .field("plugin", &self.plugin)
            .field("before", &self.before)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}

impl<S> HookRegistration<S> {
    /// Registers `handler` for `hook`, owned by the plugin being built.
    pub fn new(hook: impl Into<String>, handler: Handler<S>) -> Self {
        Self {
            hook: hook.into(),
            plugin: None,
            handler,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Attributes the registration to another plugin name.
    #[must_use]
    pub fn owned_by(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    /// Asks to run before each of `plugins`.
    #[must_use]
    pub fn before<I, T>(mut self, plugins: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.before.extend(plugins.into_iter().map(Into::into));
        self
    }

    /// Asks to run after each of `plugins`.
    #[must_use]
    pub fn after<I, T>(mut self, plugins: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.after.extend(plugins.into_iter().map(Into::into));
        self
    }

    /// Returns the hook name.
    #[must_use]
    pub fn hook(&self) -> &str {
        &self.hook
    }
}

/// A registration with its owner resolved.
struct ResolvedHook<S> {
    plugin: String,
    handler: Handler<S>,
    before: Vec<String>,
    after: Vec<String>,
}

/// One link of a resolved chain.
pub(crate) struct ChainLink<S> {
    pub(crate) plugin: String,
    pub(crate) handler: Handler<S>,
}

/// Resolved chains for every hook, frozen after build.
pub(crate) struct HookCoordinator<S> {
    chains: HashMap<String, Vec<ChainLink<S>>>,
    manifest: Vec<Value>,
}

impl<S> HookCoordinator<S> {
    /// Resolves every hook's chain; `plugin_name` owns unattributed
    /// registrations.
    pub(crate) fn resolve(
        plugin_name: &str,
        registrations: Vec<HookRegistration<S>>,
    ) -> Result<Self, EngineError> {
        let mut grouped: Vec<(String, Vec<ResolvedHook<S>>)> = Vec::new();
        let mut manifest = Vec::with_capacity(registrations.len());

        for registration in registrations {
            if registration.hook.trim().is_empty() {
                return Err(EngineError::configuration("hook names must not be blank"));
            }
            manifest.push(json!({
                "name": registration.hook,
                "before": registration.before,
                "after": registration.after,
            }));

            let HookRegistration {
                hook,
                plugin,
                handler,
                before,
                after,
            } = registration;
            let owner = plugin.unwrap_or_else(|| plugin_name.to_owned());
            let resolved = ResolvedHook {
                plugin: owner,
                handler,
                before,
                after,
            };
            match grouped.iter_mut().find(|(name, _)| *name == hook) {
                Some((_, members)) => {
                    if members.iter().any(|member| member.plugin == resolved.plugin) {
                        return Err(EngineError::configuration(format!(
                            "plugin '{}' registers hook '{hook}' more than once",
                            resolved.plugin
                        )));
                    }
                    members.push(resolved);
                }
                None => grouped.push((hook, vec![resolved])),
            }
        }

        let mut chains = HashMap::with_capacity(grouped.len());
        for (hook, members) in grouped {
            let chain = order_chain(&hook, members)?;
            debug!(
                target: HOOKS_TARGET,
                hook = hook.as_str(),
                order = ?chain.iter().map(|link| link.plugin.as_str()).collect::<Vec<_>>(),
                "resolved hook chain"
            );
            chains.insert(hook, chain);
        }
        Ok(Self { chains, manifest })
    }

    /// Returns the chain for `hook`, if any plugin implements it.
    pub(crate) fn chain(&self, hook: &str) -> Option<&[ChainLink<S>]> {
        self.chains.get(hook).map(Vec::as_slice)
    }

    /// Returns the handler at `position` of `hook`'s chain.
    pub(crate) fn stage(&self, hook: &str, position: usize) -> Option<Handler<S>> {
        self.chain(hook)
            .and_then(|links| links.get(position))
            .map(|link| link.handler)
    }

    /// Returns the hook names that have a chain.
    pub(crate) fn hook_names(&self) -> impl Iterator<Item = &str> {
        self.chains.keys().map(String::as_str)
    }

    /// Returns the `hooks` manifest entries in registration order.
    pub(crate) fn manifest_entries(&self) -> &[Value] {
        &self.manifest
    }
}

/// Orders one hook's registrations.
fn order_chain<S>(hook: &str, members: Vec<ResolvedHook<S>>) -> Result<Vec<ChainLink<S>>, EngineError> {
    let constraints: Vec<(&str, &[String], &[String])> = members
        .iter()
        .map(|member| {
            (
                member.plugin.as_str(),
                member.before.as_slice(),
                member.after.as_slice(),
            )
        })
        .collect();
    let order = resolve_order(hook, &constraints)?;

    let mut slots: Vec<Option<ResolvedHook<S>>> = members.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|index| slots.get_mut(index).and_then(Option::take))
        .map(|member| ChainLink {
            plugin: member.plugin,
            handler: member.handler,
        })
        .collect())
}

/// Topologically sorts `(plugin, before, after)` constraints.
///
/// Returns registration indices in execution order. Among registrations
/// that are free to run, the earliest registered goes first.
///
/// # Errors
///
/// Returns [`EngineError::HookCycle`] naming, in registration order, every
/// plugin that could not be placed.
pub(crate) fn resolve_order(
    hook: &str,
    constraints: &[(&str, &[String], &[String])],
) -> Result<Vec<usize>, EngineError> {
    let position_of: HashMap<&str, usize> = constraints
        .iter()
        .enumerate()
        .map(|(index, (plugin, _, _))| (*plugin, index))
        .collect();

    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); constraints.len()];
    for (index, (_, before, after)) in constraints.iter().enumerate() {
        let targets = |names: &[String]| -> Vec<usize> {
            names
                .iter()
                .filter_map(|name| position_of.get(name.as_str()).copied())
                .filter(|other| *other != index)
                .collect()
        };
        for later in targets(before) {
            if let Some(edges) = successors.get_mut(index) {
                edges.insert(later);
            }
        }
        for earlier in targets(after) {
            if let Some(edges) = successors.get_mut(earlier) {
                edges.insert(index);
            }
        }
    }

    let mut in_degree = vec![0_usize; constraints.len()];
    for edges in &successors {
        for target in edges {
            if let Some(degree) = in_degree.get_mut(*target) {
                *degree = degree.saturating_add(1);
            }
        }
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(index, _)| index)
        .collect();
    let mut order = Vec::with_capacity(constraints.len());

    while let Some(index) = ready.pop_first() {
        order.push(index);
        for target in successors.get(index).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(*target) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    ready.insert(*target);
                }
            }
        }
    }

    if order.len() == constraints.len() {
        return Ok(order);
    }

    let placed: BTreeSet<usize> = order.into_iter().collect();
    let plugins = constraints
        .iter()
        .enumerate()
        .filter(|(index, _)| !placed.contains(index))
        .map(|(_, (plugin, _, _))| (*plugin).to_owned())
        .collect();
    Err(EngineError::HookCycle {
        hook: hook.to_owned(),
        plugins,
    })
}
