//! Environment-derived configuration modules: env vars, options, profile
//!
//! These are constructed first, in this order, because the later modules and
//! the interpreter proper read environment-derived configuration through
//! them.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;

use super::ContextState;
use crate::context::Context;
use crate::error::{ContextError, Result};

/// Environment variables an option override is read from
const OPTION_OVERRIDE_PREFIX: &str = "POLYCTX_OPT_";

const USER_PROFILE_VAR: &str = "POLYCTX_PROFILE";
const SITE_PROFILE_VAR: &str = "POLYCTX_SITE_PROFILE";

/// Snapshot of the external environment taken at module construction.
///
/// Contexts each own a snapshot; mutations stay local to the context and
/// never write back to the process environment.
pub struct EnvVars {
    vars: RwLock<FxHashMap<String, String>>,
}

impl EnvVars {
    pub(crate) fn new_context(ctx: &Context) -> Self {
        let vars = ctx.host().env_snapshot().into_iter().collect();
        Self {
            vars: RwLock::new(vars),
        }
    }

    /// Value of `name` in this context's snapshot
    pub fn get(&self, name: &str) -> Option<String> {
        self.vars.read().get(name).cloned()
    }

    /// Set `name` in this context's snapshot
    pub fn set(&self, name: &str, value: &str) {
        self.vars
            .write()
            .insert(name.to_string(), value.to_string());
    }

    /// Remove `name`; returns the previous value
    pub fn unset(&self, name: &str) -> Option<String> {
        self.vars.write().remove(name)
    }

    /// Names in the snapshot (unordered)
    pub fn names(&self) -> Vec<String> {
        self.vars.read().keys().cloned().collect()
    }

    fn overrides(&self) -> Vec<(String, String)> {
        self.vars
            .read()
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(OPTION_OVERRIDE_PREFIX)
                    .map(|opt| (opt.to_ascii_lowercase(), v.clone()))
            })
            .collect()
    }
}

impl ContextState for EnvVars {
    fn name(&self) -> &'static str {
        "env_vars"
    }
}

/// Interpreter options: typed defaults plus free-form entries, with
/// environment-variable overrides applied at construction.
pub struct Options {
    options: RwLock<FxHashMap<String, Value>>,
}

impl Options {
    pub(crate) fn new_context(env_vars: &EnvVars) -> Result<Self> {
        let mut options = Self::defaults();
        for (name, raw) in env_vars.overrides() {
            let value = match options.get(&name) {
                Some(Value::Bool(_)) => {
                    Value::Bool(raw.parse::<bool>().map_err(|_| invalid_option(&name, &raw))?)
                }
                Some(Value::Number(_)) => {
                    Value::from(raw.parse::<i64>().map_err(|_| invalid_option(&name, &raw))?)
                }
                _ => Value::String(raw),
            };
            options.insert(name, value);
        }
        Ok(Self {
            options: RwLock::new(options),
        })
    }

    fn defaults() -> FxHashMap<String, Value> {
        let mut defaults = FxHashMap::default();
        defaults.insert("echo".to_string(), Value::Bool(true));
        defaults.insert("warn".to_string(), Value::from(0i64));
        defaults.insert("expressions".to_string(), Value::from(5000i64));
        defaults
    }

    /// Current value of option `name`
    pub fn get(&self, name: &str) -> Option<Value> {
        self.options.read().get(name).cloned()
    }

    /// Set option `name`, returning the previous value
    pub fn set(&self, name: &str, value: Value) -> Option<Value> {
        self.options.write().insert(name.to_string(), value)
    }

    /// Boolean convenience accessor; `false` when unset or non-boolean
    pub fn get_bool(&self, name: &str) -> bool {
        matches!(self.get(name), Some(Value::Bool(true)))
    }
}

impl ContextState for Options {
    fn name(&self) -> &'static str {
        "options"
    }
}

fn invalid_option(name: &str, raw: &str) -> ContextError {
    ContextError::StateInitFailed {
        module: "options",
        message: format!("invalid override for option {name:?}: {raw:?}"),
    }
}

/// Startup profile discovery, resolved through the environment snapshot
pub struct Profile {
    user_profile: Option<String>,
    site_profile: Option<String>,
}

impl Profile {
    pub(crate) fn new_context(env_vars: &EnvVars) -> Self {
        Self {
            user_profile: env_vars.get(USER_PROFILE_VAR),
            site_profile: env_vars.get(SITE_PROFILE_VAR),
        }
    }

    /// Path of the user profile, if the environment named one
    pub fn user_profile(&self) -> Option<&str> {
        self.user_profile.as_deref()
    }

    /// Path of the site profile, if the environment named one
    pub fn site_profile(&self) -> Option<&str> {
        self.site_profile.as_deref()
    }
}

impl ContextState for Profile {
    fn name(&self) -> &'static str {
        "profile"
    }
}
