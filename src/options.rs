//! Resolved build options.
//!
//! Descriptor defaults overlaid with user toggles from the command line,
//! plus the flags that apply to every package (bottle, verbose, head).

use anyhow::{bail, Result};
use std::collections::BTreeMap;

use crate::descriptor::PackageDescriptor;

/// User-selected build configuration for one run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    toggles: BTreeMap<String, bool>,
    /// Building a redistributable bottle: restrict CPU instruction flags to
    /// a conservative baseline so the artifact runs on older hardware.
    pub bottle: bool,
    pub verbose: bool,
    /// Building from branch head rather than the pinned release tag.
    pub head: bool,
}

impl BuildOptions {
    /// Start from the descriptor's declared defaults.
    pub fn from_descriptor(descriptor: &PackageDescriptor) -> Self {
        Self {
            toggles: descriptor.default_options(),
            bottle: false,
            verbose: false,
            head: false,
        }
    }

    /// Enable or disable a descriptor-declared option.
    pub fn set(&mut self, descriptor: &PackageDescriptor, name: &str, value: bool) -> Result<()> {
        if !descriptor.has_option(name) {
            let known = descriptor
                .options
                .iter()
                .map(|opt| opt.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            bail!(
                "unknown option '{}' for package '{}'; known options: {}",
                name,
                descriptor.name,
                if known.is_empty() { "(none)" } else { known.as_str() }
            );
        }
        self.toggles.insert(name.to_string(), value);
        Ok(())
    }

    pub fn enabled(&self, name: &str) -> bool {
        self.toggles.get(name).copied().unwrap_or(false)
    }

    /// Option settings for the build report.
    pub fn toggles(&self) -> &BTreeMap<String, bool> {
        &self.toggles
    }
}
