//! Package descriptors.
//!
//! A descriptor is an immutable TOML record naming a package, where its
//! source comes from, which already-installed dependencies it needs, and
//! which user-toggleable options it understands. Descriptors for the two
//! supported packages live under `descriptors/` in this repo.
//!
//! Raw TOML structs are parsed strictly (`deny_unknown_fields`) and then
//! converted into the validated [`PackageDescriptor`] used by the pipeline.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// How a dependency participates in the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepKind {
    /// Needed only while building; excluded from the runtime closure.
    Build,
    /// Needed at runtime; part of the installed artifact's closure.
    Runtime,
}

/// A named external dependency, expected to be installed by the surrounding
/// package manager before this tool runs.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub name: String,
    pub kind: DepKind,
    /// Shared library to symlink into the in-tree `usr/lib` staging
    /// directory before the build (e.g. `libopenblas.dylib`).
    pub staged_lib: Option<String>,
    /// Whether this dependency's lib directory joins the installed
    /// binaries' rpath list.
    pub rpath: bool,
}

/// A user-toggleable boolean build option.
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub name: String,
    pub description: String,
    pub default: bool,
}

/// Where the source tree comes from.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    /// Git checkout at a tag. `shallow = false` means the full history must
    /// be retrieved (downstream patch machinery reads commit metadata).
    Git {
        url: String,
        tag: String,
        shallow: bool,
    },
    /// Release tarball with a pinned digest.
    Archive { url: String, sha256: String },
}

/// A secondary archive unpacked into a subdirectory of the source tree
/// (e.g. libcxx into `projects/libcxx`).
#[derive(Debug, Clone)]
pub struct Resource {
    pub name: String,
    pub url: String,
    pub sha256: String,
    pub dest: String,
    /// Option gating this resource; when the named option is disabled the
    /// resource is not staged at all. `None` stages unconditionally.
    pub option: Option<String>,
}

/// Patch series applied to the source tree after fetch.
#[derive(Debug, Clone)]
pub struct PatchSeries {
    /// URL template containing `{name}`.
    pub base_url: String,
    pub names: Vec<String>,
}

impl PatchSeries {
    pub fn url_for(&self, name: &str) -> String {
        self.base_url.replace("{name}", name)
    }
}

/// External build system driving the compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSystem {
    Make,
    Cmake,
}

/// A directory copied verbatim from the source tree into the install
/// prefix after the build (e.g. the LLVM python bindings).
#[derive(Debug, Clone)]
pub struct CopyTree {
    /// Directory relative to the source tree.
    pub from: String,
    /// Destination relative to the install prefix.
    pub to: String,
}

/// Post-install treatment of installed files.
#[derive(Debug, Clone)]
pub struct InstallSpec {
    /// Executables under `bin/` starting with this prefix get rpath patched.
    pub binary_prefix: String,
    /// Files under `lib/` (relative globs by suffix match) whose permissions
    /// are relaxed to 0644 so user-run tooling can regenerate them.
    pub relax_cache_files: Vec<String>,
    /// Source-tree directories installed verbatim under the prefix.
    pub copy_trees: Vec<CopyTree>,
}

/// Smoke-test description.
#[derive(Debug, Clone)]
pub struct VerifySpec {
    /// Binary under `bin/` to invoke.
    pub binary: String,
    pub args: Vec<String>,
    /// Compare trimmed stdout against the install prefix instead of just
    /// checking the exit status.
    pub expect_prefix: bool,
    /// Subdirectory of pkgshare that must exist for the smoke test to run;
    /// absence is a warning, not a failure.
    pub test_assets: Option<String>,
}

/// Immutable, validated package descriptor.
#[derive(Debug, Clone)]
pub struct PackageDescriptor {
    pub name: String,
    pub homepage: String,
    pub version: String,
    pub source: SourceSpec,
    pub resources: Vec<Resource>,
    pub patches: Option<PatchSeries>,
    pub dependencies: Vec<Dependency>,
    pub options: Vec<OptionSpec>,
    pub build_system: BuildSystem,
    pub make_goals: Vec<String>,
    pub install: InstallSpec,
    pub verify: VerifySpec,
}

impl PackageDescriptor {
    /// Runtime dependencies only, preserving descriptor order.
    ///
    /// Build-only tools must not leak into the runtime closure a downstream
    /// packager would bundle.
    pub fn runtime_closure(&self) -> Vec<&Dependency> {
        self.dependencies
            .iter()
            .filter(|dep| dep.kind == DepKind::Runtime)
            .collect()
    }

    /// Dependencies whose lib directory joins the rpath list.
    pub fn rpath_deps(&self) -> Vec<&Dependency> {
        self.runtime_closure()
            .into_iter()
            .filter(|dep| dep.rpath)
            .collect()
    }

    /// Dependency shared libraries staged into the in-tree `usr/lib`.
    pub fn staged_libs(&self) -> Vec<(&Dependency, &str)> {
        self.dependencies
            .iter()
            .filter_map(|dep| dep.staged_lib.as_deref().map(|lib| (dep, lib)))
            .collect()
    }

    /// Default option settings as declared by the descriptor.
    pub fn default_options(&self) -> BTreeMap<String, bool> {
        self.options
            .iter()
            .map(|opt| (opt.name.clone(), opt.default))
            .collect()
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.options.iter().any(|opt| opt.name == name)
    }
}

// --- raw TOML shapes ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorToml {
    package: PackageToml,
    source: SourceToml,
    #[serde(default)]
    resources: Vec<ResourceToml>,
    patches: Option<PatchesToml>,
    #[serde(default)]
    dependencies: Vec<DependencyToml>,
    #[serde(default)]
    options: Vec<OptionToml>,
    build: BuildToml,
    install: InstallToml,
    verify: VerifyToml,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageToml {
    name: String,
    homepage: String,
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceToml {
    kind: String,
    url: String,
    tag: Option<String>,
    shallow: Option<bool>,
    sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceToml {
    name: String,
    url: String,
    sha256: String,
    dest: String,
    option: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatchesToml {
    base_url: String,
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DependencyToml {
    name: String,
    kind: Option<String>,
    staged_lib: Option<String>,
    rpath: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OptionToml {
    name: String,
    description: String,
    default: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildToml {
    system: String,
    #[serde(default)]
    goals: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InstallToml {
    binary_prefix: String,
    #[serde(default)]
    relax_cache_files: Vec<String>,
    #[serde(default)]
    copy_trees: Vec<CopyTreeToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CopyTreeToml {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VerifyToml {
    binary: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    expect_prefix: bool,
    test_assets: Option<String>,
}

/// Load and validate a descriptor from a TOML file.
pub fn load_descriptor(path: &Path) -> Result<PackageDescriptor> {
    let bytes = fs::read_to_string(path)
        .with_context(|| format!("reading descriptor '{}'", path.display()))?;
    let parsed: DescriptorToml = toml::from_str(&bytes)
        .with_context(|| format!("parsing descriptor '{}'", path.display()))?;
    convert(path, parsed)
}

fn convert(path: &Path, raw: DescriptorToml) -> Result<PackageDescriptor> {
    let source = match raw.source.kind.trim().to_ascii_lowercase().as_str() {
        "git" => {
            let tag = raw.source.tag.ok_or_else(|| {
                anyhow::anyhow!(
                    "invalid descriptor '{}': source.tag is required for kind='git'",
                    path.display()
                )
            })?;
            SourceSpec::Git {
                url: raw.source.url,
                tag,
                shallow: raw.source.shallow.unwrap_or(false),
            }
        }
        "archive" => {
            let sha256 = raw.source.sha256.ok_or_else(|| {
                anyhow::anyhow!(
                    "invalid descriptor '{}': source.sha256 is required for kind='archive'",
                    path.display()
                )
            })?;
            SourceSpec::Archive {
                url: raw.source.url,
                sha256,
            }
        }
        other => bail!(
            "invalid descriptor '{}': unsupported source.kind '{}' (expected 'git' or 'archive')",
            path.display(),
            other
        ),
    };

    let build_system = match raw.build.system.trim().to_ascii_lowercase().as_str() {
        "make" => BuildSystem::Make,
        "cmake" => BuildSystem::Cmake,
        other => bail!(
            "invalid descriptor '{}': unsupported build.system '{}' (expected 'make' or 'cmake')",
            path.display(),
            other
        ),
    };

    let mut dependencies = Vec::new();
    for dep in raw.dependencies {
        let kind = match dep.kind.as_deref().unwrap_or("runtime") {
            "build" => DepKind::Build,
            "runtime" => DepKind::Runtime,
            other => bail!(
                "invalid descriptor '{}': dependency '{}' has unsupported kind '{}'",
                path.display(),
                dep.name,
                other
            ),
        };
        dependencies.push(Dependency {
            name: dep.name,
            kind,
            staged_lib: dep.staged_lib,
            rpath: dep.rpath.unwrap_or(false),
        });
    }

    let options: Vec<OptionSpec> = raw
        .options
        .into_iter()
        .map(|opt| OptionSpec {
            name: opt.name,
            description: opt.description,
            default: opt.default.unwrap_or(false),
        })
        .collect();

    let mut resources = Vec::new();
    for res in raw.resources {
        if let Some(gate) = &res.option {
            if !options.iter().any(|opt| &opt.name == gate) {
                bail!(
                    "invalid descriptor '{}': resource '{}' is gated on undeclared option '{}'",
                    path.display(),
                    res.name,
                    gate
                );
            }
        }
        resources.push(Resource {
            name: res.name,
            url: res.url,
            sha256: res.sha256,
            dest: res.dest,
            option: res.option,
        });
    }

    Ok(PackageDescriptor {
        name: raw.package.name,
        homepage: raw.package.homepage,
        version: raw.package.version,
        source,
        resources,
        patches: raw.patches.map(|patches| PatchSeries {
            base_url: patches.base_url,
            names: patches.names,
        }),
        dependencies,
        options,
        build_system,
        make_goals: raw.build.goals,
        install: InstallSpec {
            binary_prefix: raw.install.binary_prefix,
            relax_cache_files: raw.install.relax_cache_files,
            copy_trees: raw
                .install
                .copy_trees
                .into_iter()
                .map(|tree| CopyTree {
                    from: tree.from,
                    to: tree.to,
                })
                .collect(),
        },
        verify: VerifySpec {
            binary: raw.verify.binary,
            args: raw.verify.args,
            expect_prefix: raw.verify.expect_prefix,
            test_assets: raw.verify.test_assets,
        },
    })
}
