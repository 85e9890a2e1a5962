//! Build invocation: pre-build library staging, make and cmake drivers.
//!
//! The invoker shells out to the external build system and streams its
//! output verbatim. It never parses or classifies build errors; a non-zero
//! exit aborts the run with the tool's status.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use crate::descriptor::PackageDescriptor;
use crate::flags::{BuildEnv, FlagSet};
use crate::layout::DepsRoot;
use crate::process::Cmd;

/// Symlink dependency shared libraries into `usr/lib` inside the source
/// tree.
///
/// The bootstrap loads dylibs from the in-tree `usr/lib` and system default
/// paths only; installed binaries get proper rpaths after the install step,
/// but the build itself needs these libraries reachable first.
pub fn stage_dep_libs(
    source_dir: &Path,
    descriptor: &PackageDescriptor,
    deps: &DepsRoot,
) -> Result<()> {
    let staged = descriptor.staged_libs();
    if staged.is_empty() {
        return Ok(());
    }

    let usr_lib = source_dir.join("usr/lib");
    fs::create_dir_all(&usr_lib)
        .with_context(|| format!("creating staging directory '{}'", usr_lib.display()))?;

    for (dep, lib) in staged {
        let target = deps.opt_lib(&dep.name).join(lib);
        let link = usr_lib.join(lib);

        if !target.exists() {
            eprintln!(
                "  [WARN] staged library missing: {} (from dependency '{}')",
                target.display(),
                dep.name
            );
        }
        if link.symlink_metadata().is_ok() {
            fs::remove_file(&link)
                .with_context(|| format!("replacing staged symlink '{}'", link.display()))?;
        }
        symlink(&target, &link).with_context(|| {
            format!("symlinking '{}' -> '{}'", link.display(), target.display())
        })?;
    }

    Ok(())
}

/// Run a make-driven build: one invocation for the build goals, one for
/// `install`, both with the identical flag set.
pub fn run_make(
    source_dir: &Path,
    goals: &[String],
    flags: &FlagSet,
    env: &BuildEnv,
) -> Result<()> {
    let make_args = flags.to_make_args();
    let jobs_arg = format!("-j{}", build_jobs());

    println!("  make {}", goals.join(" "));
    env.apply(Cmd::new("make"))
        .current_dir(source_dir)
        .arg(jobs_arg)
        .args(goals.iter().cloned())
        .args(make_args.iter().cloned())
        .error_msg("make build failed")
        .run_interactive()?;

    println!("  make install");
    env.apply(Cmd::new("make"))
        .current_dir(source_dir)
        .arg("install")
        .args(make_args.iter().cloned())
        .error_msg("make install failed")
        .run_interactive()?;

    Ok(())
}

/// Run a cmake-driven build: configure out of tree, build, install, then
/// any extra install goals (the Xcode toolchain target is one).
pub fn run_cmake(
    source_dir: &Path,
    build_dir: &Path,
    defines: &FlagSet,
    env: &BuildEnv,
    extra_install_goals: &[String],
) -> Result<()> {
    fs::create_dir_all(build_dir)
        .with_context(|| format!("creating cmake build directory '{}'", build_dir.display()))?;

    println!("  cmake -G \"Unix Makefiles\" {}", source_dir.display());
    env.apply(Cmd::new("cmake"))
        .current_dir(build_dir)
        .args(["-G", "Unix Makefiles"])
        .arg_path(source_dir)
        .args(defines.to_cmake_defines())
        .error_msg("cmake configure failed")
        .run_interactive()?;

    println!("  make");
    env.apply(Cmd::new("make"))
        .current_dir(build_dir)
        .arg(format!("-j{}", build_jobs()))
        .error_msg("make failed")
        .run_interactive()?;

    println!("  make install");
    env.apply(Cmd::new("make"))
        .current_dir(build_dir)
        .arg("install")
        .error_msg("make install failed")
        .run_interactive()?;

    for goal in extra_install_goals {
        println!("  make {}", goal);
        env.apply(Cmd::new("make"))
            .current_dir(build_dir)
            .arg(goal.clone())
            .error_msg(&format!("make {} failed", goal))
            .run_interactive()?;
    }

    Ok(())
}

fn build_jobs() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) => n.get(),
        Err(e) => {
            eprintln!("  [WARN] Could not detect CPU count ({}), using 4 cores", e);
            4
        }
    }
}
