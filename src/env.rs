// src/env.rs

//! Snapshot of the process environment.
//!
//! Every stage runs in its own OS process and the runner only hands state
//! over through environment variables, so the environment is captured once at
//! startup and treated as read-only input from then on. Everything downstream
//! (job context, driver config, mount handoff) is a pure function of this
//! snapshot, which also makes it trivial to build in tests.

use std::collections::BTreeMap;

/// Prefix the CI runner adds to every job-provided variable.
pub const USER_VAR_PREFIX: &str = "CUSTOM_ENV_";

/// Key/value overrides layered on top of an inherited environment.
pub type EnvOverrides = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Capture the current process environment.
    ///
    /// Variables that are not valid UTF-8 are skipped.
    pub fn capture() -> Self {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Like [`get`](Self::get), but treats an empty value as unset.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Job-provided variables with the runner's prefix stripped.
    ///
    /// `CUSTOM_ENV_FOO=bar` yields `("FOO", "bar")`. Keys that are empty once
    /// the prefix is removed are skipped.
    pub fn user_variables(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().filter_map(|(k, v)| {
            let stripped = k.strip_prefix(USER_VAR_PREFIX)?;
            if stripped.is_empty() {
                return None;
            }
            Some((stripped, v.as_str()))
        })
    }

    /// Look up a job-provided variable by its unprefixed name.
    pub fn user_var(&self, name: &str) -> Option<&str> {
        self.get(&format!("{USER_VAR_PREFIX}{name}"))
    }

    /// Copy of this snapshot with extra variables set.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl<K, V> FromIterator<(K, V)> for Environment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
