//! Build flag assembly.
//!
//! A [`FlagSet`] is an ordered list of key=value build parameters with
//! duplicate keys collapsed last-writer-wins: the underlying build tools
//! treat the flags as order-independent, but emitting the same key twice is
//! never correct. [`BuildEnv`] carries the child-process environment the
//! formulas used to build up by mutating the ambient process; here it is
//! explicit data threaded into the invoker.
//!
//! Per-package assembly lives in [`julia`] and [`llvm`].

pub mod julia;
pub mod llvm;

use crate::process::Cmd;

/// Ordered set of key=value build parameters, free of duplicate keys.
#[derive(Debug, Clone, Default)]
pub struct FlagSet {
    entries: Vec<(String, String)>,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a flag. A repeated key overwrites the earlier value in place,
    /// keeping the original position.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render as `KEY=VALUE` make arguments.
    pub fn to_make_args(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }

    /// Render as `-DKEY=VALUE` cmake defines.
    pub fn to_cmake_defines(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(k, v)| format!("-D{}={}", k, v))
            .collect()
    }
}

/// Explicit child-process environment for the build step.
#[derive(Debug, Clone, Default)]
pub struct BuildEnv {
    vars: Vec<(String, String)>,
}

impl BuildEnv {
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.vars.push((key.to_string(), value)),
        }
    }

    /// Append to a space-joined accumulator such as CPPFLAGS or LDFLAGS.
    pub fn append(&mut self, key: &str, value: &str) {
        match self.vars.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => {
                if entry.1.is_empty() {
                    entry.1 = value.to_string();
                } else {
                    entry.1 = format!("{} {}", entry.1, value);
                }
            }
            None => self.vars.push((key.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Apply every variable to a command builder.
    pub fn apply(&self, mut cmd: Cmd) -> Cmd {
        for (key, value) in &self.vars {
            cmd = cmd.env(key, value.clone());
        }
        cmd
    }
}
