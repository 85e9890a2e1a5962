//! Filesystem layout for a build.
//!
//! Defines WHERE things go, not HOW they get there: the install prefix
//! subtree, the dependency prefix (`<deps>/opt/<name>`), and the transient
//! build tree under the user cache directory.

use std::path::{Path, PathBuf};

/// Destination directory tree under the install prefix.
///
/// Created by the build invoker's install step; read by the post-install
/// patcher and the verifier.
#[derive(Debug, Clone)]
pub struct InstallLayout {
    pub prefix: PathBuf,
    pub bin: PathBuf,
    pub lib: PathBuf,
    pub share: PathBuf,
    /// Package-private share directory (`share/<name>`); docs, examples and
    /// test assets land here.
    pub pkgshare: PathBuf,
}

impl InstallLayout {
    pub fn new(prefix: &Path, package_name: &str) -> Self {
        Self {
            prefix: prefix.to_path_buf(),
            bin: prefix.join("bin"),
            lib: prefix.join("lib"),
            share: prefix.join("share"),
            pkgshare: prefix.join("share").join(package_name),
        }
    }
}

/// Root under which dependency packages are already installed.
///
/// Mirrors the `opt/<name>` convention of the surrounding package manager:
/// each dependency exposes a stable prefix at `<root>/opt/<name>`.
#[derive(Debug, Clone)]
pub struct DepsRoot {
    root: PathBuf,
}

impl DepsRoot {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shared lib directory of the whole dependency root.
    pub fn lib(&self) -> PathBuf {
        self.root.join("lib")
    }

    pub fn opt(&self, name: &str) -> PathBuf {
        self.root.join("opt").join(name)
    }

    pub fn opt_bin(&self, name: &str) -> PathBuf {
        self.opt(name).join("bin")
    }

    pub fn opt_lib(&self, name: &str) -> PathBuf {
        self.opt(name).join("lib")
    }

    pub fn opt_include(&self, name: &str) -> PathBuf {
        self.opt(name).join("include")
    }
}

/// Transient per-package build tree.
#[derive(Debug, Clone)]
pub struct BuildPaths {
    /// Build root for this package.
    pub root: PathBuf,
    /// Downloaded archives and patches.
    pub downloads: PathBuf,
    pub patches: PathBuf,
    /// Populated source working directory.
    pub source: PathBuf,
    /// Out-of-tree cmake build directory.
    pub cmake_build: PathBuf,
    /// Bare git mirrors kept across runs.
    pub git_mirrors: PathBuf,
    /// JSON build report written on success.
    pub report: PathBuf,
    /// Lock file guarding against concurrent builds of the same package.
    pub lock: PathBuf,
}

impl BuildPaths {
    /// Lay out the build tree for `package_name` under `base_dir`.
    pub fn new(base_dir: &Path, package_name: &str) -> Self {
        let root = base_dir.join(package_name);
        Self {
            downloads: root.join("downloads"),
            patches: root.join("downloads/patches"),
            source: root.join("src"),
            cmake_build: root.join("cmake-build"),
            git_mirrors: base_dir.join("git"),
            report: root.join("build-report.json"),
            lock: root.join(".build-lock"),
            root,
        }
    }

    /// Default build base directory (`~/.cache/julia-builder`).
    pub fn default_base_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("julia-builder")
    }
}
