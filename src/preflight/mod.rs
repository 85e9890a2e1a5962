//! Preflight checks before a build starts.
//!
//! Validates that required host tools are on PATH and that every declared
//! dependency package is already installed under the dependency prefix.
//! This tool performs no version-constraint solving: dependencies are a flat
//! enumeration installed by the surrounding package manager, and a missing
//! one is fatal up front rather than a cryptic error mid-build.

use anyhow::{bail, Result};

use crate::descriptor::{BuildSystem, DepKind, PackageDescriptor, SourceSpec};
use crate::host::HostFacts;
use crate::layout::DepsRoot;

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Host tools every build needs, as (command, providing package).
pub const BASE_TOOLS: &[(&str, &str)] = &[
    ("curl", "curl"),
    ("tar", "tar"),
    ("make", "make"),
    ("patch", "patch"),
];

/// Tools required to run a specific descriptor's pipeline.
pub fn required_tools(
    descriptor: &PackageDescriptor,
    host: &HostFacts,
) -> Vec<(&'static str, &'static str)> {
    let mut tools: Vec<(&str, &str)> = BASE_TOOLS.to_vec();

    if matches!(descriptor.source, SourceSpec::Git { .. }) {
        tools.push(("git", "git"));
    }
    if descriptor.build_system == BuildSystem::Cmake {
        tools.push(("cmake", "cmake"));
    }
    // rpath editor for the post-install patcher
    if host.is_macos() {
        tools.push(("install_name_tool", "Xcode command line tools"));
    } else {
        tools.push(("patchelf", "patchelf"));
    }

    tools
}

/// Check that specific host tools are available.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let mut missing = Vec::new();

    for (tool, package) in tools {
        if !command_exists(tool) {
            missing.push((*tool, *package));
        }
    }

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(tool, package)| format!("  {} (install: {})", tool, package))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check that every declared dependency is installed under `<deps>/opt/`.
///
/// Build-only and runtime dependencies are both required at build time; the
/// kind distinction matters downstream (the runtime closure reported to a
/// packager must not include build-only tools).
pub fn check_dependencies(descriptor: &PackageDescriptor, deps: &DepsRoot) -> Result<()> {
    let mut missing = Vec::new();

    for dep in &descriptor.dependencies {
        let prefix = deps.opt(&dep.name);
        if !prefix.is_dir() {
            let kind = match dep.kind {
                DepKind::Build => "build",
                DepKind::Runtime => "runtime",
            };
            missing.push(format!(
                "  {} ({} dependency, expected at {})",
                dep.name,
                kind,
                prefix.display()
            ));
        }
    }

    if !missing.is_empty() {
        bail!(
            "Missing dependencies for '{}':\n{}\nInstall them with the system package manager first.",
            descriptor.name,
            missing.join("\n")
        );
    }

    Ok(())
}

/// Run all preflight checks for a descriptor.
pub fn run(descriptor: &PackageDescriptor, host: &HostFacts, deps: &DepsRoot) -> Result<()> {
    check_required_tools(&required_tools(descriptor, host))?;
    check_dependencies(descriptor, deps)?;
    Ok(())
}
