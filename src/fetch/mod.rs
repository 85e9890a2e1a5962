//! Source retrieval: git checkouts, release archives, resources, patches.
//!
//! Git sources keep a bare mirror under the build tree's `git/` directory so
//! reruns do not re-download history; the working tree is cloned from the
//! mirror. Full history is retrieved unless the descriptor asks for a
//! shallow checkout; the Julia build's version machinery reads commit
//! metadata, so its descriptor pins `shallow = false`.
//!
//! Archives are downloaded with curl, digest-checked before extraction, and
//! unpacked with the host tar.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use crate::descriptor::{PackageDescriptor, SourceSpec};
use crate::layout::BuildPaths;
use crate::options::BuildOptions;
use crate::process::Cmd;

/// Populate the source working directory for a descriptor.
pub fn fetch_source(
    descriptor: &PackageDescriptor,
    paths: &BuildPaths,
    options: &BuildOptions,
) -> Result<()> {
    match &descriptor.source {
        SourceSpec::Git { url, tag, shallow } => {
            let checkout = if options.head { None } else { Some(tag.as_str()) };
            fetch_git(&descriptor.name, url, checkout, *shallow, paths)
        }
        SourceSpec::Archive { url, sha256 } => {
            fetch_archive(url, sha256, &paths.downloads, &paths.source)
        }
    }
}

/// Fetch secondary archives into subdirectories of the source tree.
///
/// A resource gated on a disabled option is not staged; an unpacked project
/// directory is enough for LLVM's cmake to build it, so excluding the
/// project means keeping its sources out of the tree entirely.
pub fn fetch_resources(
    descriptor: &PackageDescriptor,
    paths: &BuildPaths,
    options: &BuildOptions,
) -> Result<()> {
    for resource in &descriptor.resources {
        if let Some(gate) = &resource.option {
            if !options.enabled(gate) {
                println!(
                    "  Skipping resource '{}' (built --without-{})",
                    resource.name, gate
                );
                continue;
            }
        }
        let dest = paths.source.join(&resource.dest);
        println!("  Staging resource '{}' into {}", resource.name, resource.dest);
        fetch_archive(&resource.url, &resource.sha256, &paths.downloads, &dest)
            .with_context(|| format!("staging resource '{}'", resource.name))?;
    }
    Ok(())
}

/// Download and apply the descriptor's patch series, in order.
pub fn apply_patches(descriptor: &PackageDescriptor, paths: &BuildPaths) -> Result<()> {
    let Some(series) = &descriptor.patches else {
        return Ok(());
    };

    fs::create_dir_all(&paths.patches).with_context(|| {
        format!("creating patches directory '{}'", paths.patches.display())
    })?;

    for name in &series.names {
        let url = series.url_for(name);
        let patch_file = paths.patches.join(format!("{}.patch", name));
        if !patch_file.is_file() {
            download(&url, &patch_file)
                .with_context(|| format!("downloading patch '{}'", name))?;
        }

        println!("  Applying patch {}", name);
        Cmd::new("patch")
            .args(["-g", "0", "-f", "-p1", "-i"])
            .arg_path(&patch_file)
            .current_dir(&paths.source)
            .error_msg(&format!("patch '{}' failed to apply", name))
            .run()
            .with_context(|| format!("applying patch '{}'", name))?;
    }

    Ok(())
}

/// Clone a git source into the working directory via a bare mirror.
///
/// `checkout = None` stays on the default branch head.
fn fetch_git(
    name: &str,
    url: &str,
    checkout: Option<&str>,
    shallow: bool,
    paths: &BuildPaths,
) -> Result<()> {
    if paths.source.exists() {
        fs::remove_dir_all(&paths.source).with_context(|| {
            format!("removing stale source directory '{}'", paths.source.display())
        })?;
    }

    if shallow {
        let mut cmd = Cmd::new("git").args(["clone", "--depth", "1"]);
        if let Some(reference) = checkout {
            cmd = cmd.args(["--branch", reference]);
        }
        return cmd
            .arg(url)
            .arg_path(&paths.source)
            .error_msg(&format!("shallow clone of '{}' failed", url))
            .run_interactive();
    }

    // Full history: refresh the mirror, then clone the working tree from it.
    let mirror = paths.git_mirrors.join(format!("{}.git", name));
    fs::create_dir_all(&paths.git_mirrors).with_context(|| {
        format!("creating git mirror directory '{}'", paths.git_mirrors.display())
    })?;

    if mirror.is_dir() {
        println!("  Updating mirror {}", mirror.display());
        Cmd::new("git")
            .arg("-C")
            .arg_path(&mirror)
            .args(["remote", "update", "--prune"])
            .error_msg(&format!("updating git mirror for '{}' failed", url))
            .run_interactive()?;
    } else {
        println!("  Mirroring {}", url);
        Cmd::new("git")
            .args(["clone", "--mirror", url])
            .arg_path(&mirror)
            .error_msg(&format!("mirroring '{}' failed", url))
            .run_interactive()?;
    }

    Cmd::new("git")
        .arg("clone")
        .arg_path(&mirror)
        .arg_path(&paths.source)
        .error_msg(&format!("cloning working tree for '{}' failed", name))
        .run_interactive()?;

    if let Some(reference) = checkout {
        Cmd::new("git")
            .arg("-C")
            .arg_path(&paths.source)
            .args(["checkout", "--detach", reference])
            .error_msg(&format!("checking out '{}' failed", reference))
            .run_interactive()?;
    }

    Ok(())
}

/// Download, verify, and extract a release archive into `dest`.
fn fetch_archive(url: &str, sha256: &str, downloads: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(downloads)
        .with_context(|| format!("creating downloads directory '{}'", downloads.display()))?;

    let archive = downloads.join(filename_from_url(url)?);
    if archive.is_file() && sha256_file(&archive)? == sha256 {
        println!("  Using cached {}", archive.display());
    } else {
        download(url, &archive)?;
        verify_sha256(&archive, sha256)?;
    }

    if dest.exists() {
        fs::remove_dir_all(dest)
            .with_context(|| format!("removing stale directory '{}'", dest.display()))?;
    }
    fs::create_dir_all(dest)
        .with_context(|| format!("creating source directory '{}'", dest.display()))?;

    Cmd::new("tar")
        .arg("-xf")
        .arg_path(&archive)
        .arg("-C")
        .arg_path(dest)
        .arg("--strip-components=1")
        .error_msg(&format!("extracting '{}' failed", archive.display()))
        .run_interactive()?;

    Ok(())
}

fn download(url: &str, dest: &Path) -> Result<()> {
    println!("  Downloading {}", url);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    Cmd::new("curl")
        .args(["-fsSL", "-o"])
        .arg_path(dest)
        .arg(url)
        .error_msg(&format!("downloading '{}' failed", url))
        .run_interactive()
}

/// Last path segment of a download URL.
pub fn filename_from_url(url: &str) -> Result<&str> {
    let name = url.rsplit('/').next().unwrap_or("");
    if name.is_empty() {
        bail!("cannot derive a filename from URL '{}'", url);
    }
    Ok(name)
}

/// Hex SHA-256 digest of a file, streamed.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("opening '{}' for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading '{}'", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(path)?;
    if actual != expected {
        bail!(
            "checksum mismatch for '{}':\n  expected: {}\n  actual:   {}",
            path.display(),
            expected,
            actual
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://llvm.org/releases/3.9.1/llvm-3.9.1.src.tar.xz").unwrap(),
            "llvm-3.9.1.src.tar.xz"
        );
        assert!(filename_from_url("https://llvm.org/releases/").is_err());
    }

    #[test]
    fn test_sha256_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("data");
        fs::write(&path, b"abc").unwrap();

        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_sha256_mismatch() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("data");
        fs::write(&path, b"abc").unwrap();

        let err = verify_sha256(&path, "deadbeef").unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_gated_resource_not_staged_when_option_disabled() {
        use crate::descriptor::{
            BuildSystem, InstallSpec, OptionSpec, Resource, VerifySpec,
        };

        let temp = tempfile::TempDir::new().unwrap();
        let paths = BuildPaths::new(&temp.path().join("build"), "llvm-julia");
        fs::create_dir_all(&paths.source).unwrap();
        fs::create_dir_all(&paths.downloads).unwrap();

        // Local tarball standing in for the libcxx release archive; placing
        // it in the downloads cache with a matching digest skips the network.
        let tree = temp.path().join("libcxx-src/include");
        fs::create_dir_all(&tree).unwrap();
        fs::write(tree.join("header.h"), "// cxx\n").unwrap();
        let archive = paths.downloads.join("libcxx.tar");
        Cmd::new("tar")
            .arg("-cf")
            .arg_path(&archive)
            .arg("-C")
            .arg_path(temp.path())
            .arg("libcxx-src")
            .run()
            .unwrap();

        let descriptor = PackageDescriptor {
            name: "llvm-julia".to_string(),
            homepage: String::new(),
            version: "3.9.1".to_string(),
            source: SourceSpec::Archive {
                url: "https://example.invalid/llvm.tar".to_string(),
                sha256: String::new(),
            },
            resources: vec![Resource {
                name: "libcxx".to_string(),
                url: "https://example.invalid/libcxx.tar".to_string(),
                sha256: sha256_file(&archive).unwrap(),
                dest: "projects/libcxx".to_string(),
                option: Some("libcxx".to_string()),
            }],
            patches: None,
            dependencies: Vec::new(),
            options: vec![OptionSpec {
                name: "libcxx".to_string(),
                description: String::new(),
                default: true,
            }],
            build_system: BuildSystem::Cmake,
            make_goals: Vec::new(),
            install: InstallSpec {
                binary_prefix: "llvm".to_string(),
                relax_cache_files: Vec::new(),
                copy_trees: Vec::new(),
            },
            verify: VerifySpec {
                binary: "llvm-config".to_string(),
                args: Vec::new(),
                expect_prefix: true,
                test_assets: None,
            },
        };

        let mut options = BuildOptions::from_descriptor(&descriptor);
        options.set(&descriptor, "libcxx", false).unwrap();
        fetch_resources(&descriptor, &paths, &options).unwrap();
        assert!(!paths.source.join("projects/libcxx").exists());

        options.set(&descriptor, "libcxx", true).unwrap();
        fetch_resources(&descriptor, &paths, &options).unwrap();
        assert!(paths
            .source
            .join("projects/libcxx/include/header.h")
            .is_file());
    }

    #[test]
    fn test_fetch_git_full_history_from_local_origin() {
        let temp = tempfile::TempDir::new().unwrap();
        let origin = temp.path().join("origin");
        fs::create_dir_all(&origin).unwrap();

        let git = |args: &[&str]| {
            Cmd::new("git")
                .arg("-C")
                .arg_path(&origin)
                .args([
                    "-c",
                    "user.name=test",
                    "-c",
                    "user.email=test@example.com",
                ])
                .args(args.iter().copied().map(String::from))
                .run()
                .unwrap()
        };
        git(&["init", "-q"]);
        fs::write(origin.join("README"), "one\n").unwrap();
        git(&["add", "README"]);
        git(&["commit", "-q", "-m", "first"]);
        git(&["tag", "v0.0.1"]);
        fs::write(origin.join("README"), "two\n").unwrap();
        git(&["add", "README"]);
        git(&["commit", "-q", "-m", "second"]);

        let paths = BuildPaths::new(&temp.path().join("build"), "demo");
        fetch_git(
            "demo",
            origin.to_str().unwrap(),
            Some("v0.0.1"),
            false,
            &paths,
        )
        .unwrap();

        assert_eq!(fs::read_to_string(paths.source.join("README")).unwrap(), "one\n");
        // The clone must carry history, not just the tagged snapshot.
        assert!(paths.source.join(".git").exists());
        let count = Cmd::new("git")
            .arg("-C")
            .arg_path(&paths.source)
            .args(["rev-list", "--count", "--all"])
            .run()
            .unwrap();
        assert!(count.stdout.trim().parse::<u32>().unwrap() >= 2);
    }
}
