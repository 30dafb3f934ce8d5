// Launch specifications for provider processes
//
// A `LaunchSpec` is what callers send; a `ResolvedLaunch` is what actually gets
// spawned after platform command renaming and environment merging.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::config::RunnerConfig;

/// How to start one provider process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Provider name, used for logging and as the fallback session name
    pub name: String,
    /// Command to execute (e.g., "npx", "python")
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides applied on top of the process-wide defaults
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Stable, order-independent identity of a launch spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl LaunchSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sorted-key JSON encoding of every field.
    ///
    /// Argument order is significant and preserved; environment entries are
    /// keyed and therefore order-free.
    pub fn canonical_key(&self) -> CanonicalKey {
        let value = serde_json::json!({
            "name": self.name,
            "command": self.command,
            "args": self.args,
            "env": self.env,
        });
        CanonicalKey(value.to_string())
    }

    /// Apply platform command renaming and merge the environment defaults.
    pub fn resolve(&self, config: &RunnerConfig) -> ResolvedLaunch {
        let mut env = config.env_defaults();
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        ResolvedLaunch {
            name: self.name.clone(),
            program: config.platform_command(&self.command),
            args: self.args.clone(),
            env,
        }
    }
}

/// A launch spec ready to hand to a connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLaunch {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl ResolvedLaunch {
    /// `program arg1 arg2`, for log lines
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
