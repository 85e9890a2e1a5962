//! Post-install patching of installed binaries.
//!
//! Installed executables need their library search paths augmented with the
//! lib directory of each rpath-flagged dependency (plus the shared deps lib
//! dir, plus a legacy X11 path on pre-10.8 macOS). The files are installed
//! read-only, so each patch runs under a scoped permission relaxation that
//! restores the original mode even when patching fails.
//!
//! A second, deliberate non-restoring step relaxes the sysimage cache files
//! to 0644 so a user-run sysimage rebuild can rewrite them later.

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::descriptor::PackageDescriptor;
use crate::host::HostFacts;
use crate::layout::{DepsRoot, InstallLayout};
use crate::process::Cmd;

/// Pre-10.8 systems keep X11 libraries outside the default search path.
/// Not added on newer systems, where the X11 stub library gets in the way.
const LEGACY_X11_LIB: &str = "/usr/X11/lib";

/// Scoped permission relaxation with guaranteed restoration.
///
/// Records the file's mode, applies the relaxed mode, and restores the
/// original on drop. `restore()` consumes the guard for the error-checked
/// path; the drop impl covers early exits.
pub struct PermissionGuard {
    path: PathBuf,
    original_mode: u32,
    restored: bool,
}

impl PermissionGuard {
    pub fn relax(path: &Path, mode: u32) -> Result<Self> {
        let metadata = fs::metadata(path)
            .with_context(|| format!("reading permissions of '{}'", path.display()))?;
        let original_mode = metadata.permissions().mode() & 0o7777;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("relaxing permissions of '{}'", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            original_mode,
            restored: false,
        })
    }

    pub fn original_mode(&self) -> u32 {
        self.original_mode
    }

    /// Restore the original mode, surfacing any error.
    pub fn restore(mut self) -> Result<()> {
        self.restored = true;
        fs::set_permissions(&self.path, fs::Permissions::from_mode(self.original_mode))
            .with_context(|| format!("restoring permissions of '{}'", self.path.display()))
    }
}

impl Drop for PermissionGuard {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(e) = fs::set_permissions(
            &self.path,
            fs::Permissions::from_mode(self.original_mode),
        ) {
            eprintln!(
                "  [WARN] failed to restore permissions of '{}': {}",
                self.path.display(),
                e
            );
        }
    }
}

/// Adds one rpath entry to one executable.
///
/// Abstracted so tests can inject a failing editor and assert that the
/// permission guard still restores the original mode.
pub trait RpathEditor {
    fn add_rpath(&self, file: &Path, rpath: &Path) -> Result<()>;
}

/// Editor shelling out to the host's binary patching tool.
pub struct HostRpathEditor {
    macos: bool,
}

impl HostRpathEditor {
    pub fn new(host: &HostFacts) -> Self {
        Self {
            macos: host.is_macos(),
        }
    }
}

impl RpathEditor for HostRpathEditor {
    fn add_rpath(&self, file: &Path, rpath: &Path) -> Result<()> {
        let cmd = if self.macos {
            Cmd::new("install_name_tool")
                .arg("-add_rpath")
                .arg_path(rpath)
                .arg_path(file)
        } else {
            Cmd::new("patchelf")
                .args(["--force-rpath", "--add-rpath"])
                .arg_path(rpath)
                .arg_path(file)
        };
        cmd.error_msg(&format!(
            "adding rpath '{}' to '{}' failed",
            rpath.display(),
            file.display()
        ))
        .run()?;
        Ok(())
    }
}

/// The rpath entries to add to every installed executable.
pub fn rpath_list(
    descriptor: &PackageDescriptor,
    deps: &DepsRoot,
    host: &HostFacts,
) -> Vec<PathBuf> {
    let mut rpaths: Vec<PathBuf> = descriptor
        .rpath_deps()
        .iter()
        .map(|dep| deps.opt_lib(&dep.name))
        .collect();

    // The shared deps lib dir may not be a standard system path.
    rpaths.push(deps.lib());

    if host.macos_before(10, 8) {
        rpaths.push(PathBuf::from(LEGACY_X11_LIB));
    }

    rpaths
}

/// Patch every installed executable matching the descriptor's binary prefix.
pub fn patch_binaries(
    layout: &InstallLayout,
    descriptor: &PackageDescriptor,
    rpaths: &[PathBuf],
    editor: &dyn RpathEditor,
) -> Result<()> {
    let binaries = find_binaries(&layout.bin, &descriptor.install.binary_prefix)?;
    if binaries.is_empty() {
        eprintln!(
            "  [WARN] no executables matching '{}*' under {}",
            descriptor.install.binary_prefix,
            layout.bin.display()
        );
        return Ok(());
    }

    for binary in binaries {
        println!("  Patching rpaths of {}", binary.display());
        let guard = PermissionGuard::relax(&binary, 0o755)?;
        for rpath in rpaths {
            editor
                .add_rpath(&binary, rpath)
                .with_context(|| format!("patching '{}'", binary.display()))?;
        }
        guard.restore()?;
    }

    Ok(())
}

/// Install descriptor-listed source-tree directories under the prefix.
///
/// The build systems do not install these themselves (LLVM's python
/// bindings ship in-tree only); the copy is verbatim and unconditional.
pub fn copy_source_trees(
    source_dir: &Path,
    layout: &InstallLayout,
    descriptor: &PackageDescriptor,
) -> Result<()> {
    for tree in &descriptor.install.copy_trees {
        let from = source_dir.join(&tree.from);
        if !from.is_dir() {
            bail!(
                "source directory '{}' for install copy not found",
                from.display()
            );
        }
        let to = layout.prefix.join(&tree.to);
        println!("  Installing {} to {}", tree.from, to.display());
        copy_tree(&from, &to)?;
    }
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(from) {
        let entry = entry.with_context(|| format!("walking '{}'", from.display()))?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .with_context(|| format!("walking '{}'", from.display()))?;
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)
                .with_context(|| format!("creating '{}'", dest.display()))?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating '{}'", parent.display()))?;
            }
            fs::copy(entry.path(), &dest).with_context(|| {
                format!("copying '{}' to '{}'", entry.path().display(), dest.display())
            })?;
        }
    }
    Ok(())
}

/// Relax the sysimage cache files to 0644 (deliberately not restored).
pub fn relax_cache_files(layout: &InstallLayout, descriptor: &PackageDescriptor) -> Result<()> {
    for pattern in &descriptor.install.relax_cache_files {
        for file in match_lib_files(&layout.lib, pattern)? {
            println!("  Relaxing permissions of {}", file.display());
            fs::set_permissions(&file, fs::Permissions::from_mode(0o644))
                .with_context(|| format!("relaxing '{}'", file.display()))?;
        }
    }
    Ok(())
}

fn find_binaries(bin_dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    if !bin_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut binaries = Vec::new();
    for entry in fs::read_dir(bin_dir)
        .with_context(|| format!("reading bin directory '{}'", bin_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with(prefix) && path.is_file() {
            binaries.push(path);
        }
    }
    binaries.sort();
    Ok(binaries)
}

/// Resolve a `dir/name*ext`-style pattern (single `*`) relative to lib/.
fn match_lib_files(lib_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let (parent, file_pattern) = match pattern.rsplit_once('/') {
        Some((dir, file)) => (lib_dir.join(dir), file),
        None => (lib_dir.to_path_buf(), pattern),
    };
    if !parent.is_dir() {
        return Ok(Vec::new());
    }

    let mut matches = Vec::new();
    for entry in fs::read_dir(&parent)
        .with_context(|| format!("reading '{}'", parent.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.is_file() && matches_simple_glob(name, file_pattern) {
            matches.push(path);
        }
    }
    matches.sort();
    Ok(matches)
}

/// Match a file name against a pattern with at most one `*`.
fn matches_simple_glob(name: &str, pattern: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
        None => name == pattern,
    }
}
