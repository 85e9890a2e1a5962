//! Fixed-order build pipeline.
//!
//! preflight → fetch → assemble flags → build → post-install patch →
//! verify → report. Strictly sequential, no branching back; the prescribed
//! recovery for any failure is rerunning the whole pipeline from scratch.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, File};
use std::path::PathBuf;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::descriptor::{BuildSystem, DepKind, PackageDescriptor};
use crate::flags::{julia, llvm};
use crate::host::HostFacts;
use crate::layout::{BuildPaths, DepsRoot, InstallLayout};
use crate::options::BuildOptions;
use crate::postinstall::{self, HostRpathEditor};
use crate::process::Cmd;
use crate::verify::{self, VerifyOutcome};
use crate::{build, fetch, preflight};

/// Where a run installs to and builds in.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub prefix: PathBuf,
    pub deps_root: PathBuf,
    pub build_base: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct StageTiming {
    pub stage: String,
    pub seconds: f64,
}

/// JSON build report written under the build tree on success.
#[derive(Debug, Serialize)]
pub struct BuildReport {
    pub package: String,
    pub version: String,
    pub prefix: String,
    pub options: std::collections::BTreeMap<String, bool>,
    pub bottle: bool,
    pub head: bool,
    pub flags: Vec<String>,
    pub runtime_dependencies: Vec<String>,
    pub installed_files: u64,
    pub stages: Vec<StageTiming>,
    pub warnings: Vec<String>,
    pub finished_at_utc: String,
}

/// Run the whole pipeline for one descriptor.
pub fn run(
    descriptor: &PackageDescriptor,
    options: &BuildOptions,
    host: &HostFacts,
    config: &PipelineConfig,
) -> Result<BuildReport> {
    let paths = BuildPaths::new(&config.build_base, &descriptor.name);
    let layout = InstallLayout::new(&config.prefix, &descriptor.name);
    let deps = DepsRoot::new(&config.deps_root);

    fs::create_dir_all(&paths.root)
        .with_context(|| format!("creating build directory '{}'", paths.root.display()))?;
    let _lock = acquire_build_lock(&paths)?;

    let mut stages = Vec::new();
    let mut warnings = Vec::new();
    let tag = format!("[{}:{}]", env!("CARGO_PKG_NAME"), descriptor.name);

    println!("{} preflight", tag);
    let started = Instant::now();
    preflight::run(descriptor, host, &deps)?;
    push_timing(&mut stages, "preflight", started);

    println!("{} fetch", tag);
    let started = Instant::now();
    fetch::fetch_source(descriptor, &paths, options)
        .with_context(|| format!("fetching source for '{}'", descriptor.name))?;
    fetch::fetch_resources(descriptor, &paths, options)?;
    fetch::apply_patches(descriptor, &paths)
        .with_context(|| format!("patching source for '{}'", descriptor.name))?;
    push_timing(&mut stages, "fetch", started);

    println!("{} assemble flags", tag);
    let python_home = if options.enabled("lldb") {
        detect_python_home()
    } else {
        None
    };
    let (flags, env) = match descriptor.build_system {
        BuildSystem::Make => (
            julia::assemble(descriptor, options, host, &layout, &deps),
            julia::build_env(host),
        ),
        BuildSystem::Cmake => (
            llvm::assemble(
                descriptor,
                options,
                host,
                &layout,
                &deps,
                python_home.as_deref(),
            ),
            llvm::build_env(host, options, python_home.as_deref()),
        ),
    };
    let rendered_flags = match descriptor.build_system {
        BuildSystem::Make => flags.to_make_args(),
        BuildSystem::Cmake => flags.to_cmake_defines(),
    };
    for rendered in &rendered_flags {
        println!("  {}", rendered);
    }

    println!("{} build", tag);
    let started = Instant::now();
    build::stage_dep_libs(&paths.source, descriptor, &deps)?;
    match descriptor.build_system {
        BuildSystem::Make => build::run_make(&paths.source, &descriptor.make_goals, &flags, &env)?,
        BuildSystem::Cmake => build::run_cmake(
            &paths.source,
            &paths.cmake_build,
            &flags,
            &env,
            &llvm::extra_install_goals(options),
        )?,
    }
    push_timing(&mut stages, "build", started);
    let installed_files = count_installed_files(&layout);
    println!("  {} files installed under {}", installed_files, layout.prefix.display());

    println!("{} post-install patch", tag);
    let started = Instant::now();
    postinstall::copy_source_trees(&paths.source, &layout, descriptor)?;
    let rpaths = postinstall::rpath_list(descriptor, &deps, host);
    let editor = HostRpathEditor::new(host);
    postinstall::patch_binaries(&layout, descriptor, &rpaths, &editor)?;
    postinstall::relax_cache_files(&layout, descriptor)?;
    push_timing(&mut stages, "postinstall", started);

    println!("{} verify", tag);
    let started = Instant::now();
    match verify::run(descriptor, &layout, options)? {
        VerifyOutcome::Passed => {}
        VerifyOutcome::SkippedMissingAssets { warning } => warnings.push(warning),
    }
    push_timing(&mut stages, "verify", started);

    let report = BuildReport {
        package: descriptor.name.clone(),
        version: descriptor.version.clone(),
        prefix: layout.prefix.display().to_string(),
        options: options.toggles().clone(),
        bottle: options.bottle,
        head: options.head,
        flags: rendered_flags,
        runtime_dependencies: descriptor
            .dependencies
            .iter()
            .filter(|dep| dep.kind == DepKind::Runtime)
            .map(|dep| dep.name.clone())
            .collect(),
        installed_files,
        stages,
        warnings,
        finished_at_utc: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
    };
    write_report(&paths, &report)?;

    println!("{}", caveats(descriptor, &layout, options));

    Ok(report)
}

fn count_installed_files(layout: &InstallLayout) -> u64 {
    let mut count = 0;
    for entry in walkdir::WalkDir::new(&layout.prefix) {
        match entry {
            Ok(entry) if entry.file_type().is_file() => count += 1,
            Ok(_) => {}
            Err(err) => eprintln!("  [WARN] skipping unreadable install entry: {}", err),
        }
    }
    count
}

fn push_timing(stages: &mut Vec<StageTiming>, stage: &str, started: Instant) {
    stages.push(StageTiming {
        stage: stage.to_string(),
        seconds: started.elapsed().as_secs_f64(),
    });
}

/// Take the exclusive build lock for this package's build tree.
///
/// Exactly one installation runs at a time; a held lock means another
/// invocation is mid-build, and clobbering its working directory would
/// corrupt both runs.
pub fn acquire_build_lock(paths: &BuildPaths) -> Result<File> {
    let file = File::create(&paths.lock)
        .with_context(|| format!("creating build lock '{}'", paths.lock.display()))?;
    if file.try_lock_exclusive().is_err() {
        bail!(
            "another build is already running for this package (lock held: {})",
            paths.lock.display()
        );
    }
    Ok(file)
}

fn write_report(paths: &BuildPaths, report: &BuildReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("serializing build report")?;
    fs::write(&paths.report, json)
        .with_context(|| format!("writing build report '{}'", paths.report.display()))?;
    println!("  Report written to {}", paths.report.display());
    Ok(())
}

fn detect_python_home() -> Option<PathBuf> {
    let result = Cmd::new("python-config")
        .arg("--prefix")
        .allow_fail()
        .run()
        .ok()?;
    if !result.success() {
        return None;
    }
    let prefix = result.stdout.trim();
    if prefix.is_empty() {
        None
    } else {
        Some(PathBuf::from(prefix))
    }
}

/// Post-run notes, printed after a successful install.
pub fn caveats(
    descriptor: &PackageDescriptor,
    layout: &InstallLayout,
    options: &BuildOptions,
) -> String {
    match descriptor.name.as_str() {
        "julia" => {
            let head_flag = if options.head { " --head " } else { " " };
            format!(
                "Documentation and examples have been installed into:\n\
                 {pkgshare}\n\
                 \n\
                 Test suite has been installed into:\n\
                 {pkgshare}/test\n\
                 \n\
                 To perform a quick sanity check, run the command:\n\
                 {bin} verify{head}julia\n\
                 \n\
                 To crunch through the full test suite, run the command:\n\
                 {julia} -e \"Base.runtests()\"",
                pkgshare = layout.pkgshare.display(),
                bin = env!("CARGO_PKG_NAME"),
                head = head_flag,
                julia = layout.bin.join("julia").display(),
            )
        }
        "llvm-julia" => {
            let mut s = format!(
                "LLVM executables are installed in {}.\n\
                 Extra tools are installed in {}.",
                layout.bin.display(),
                layout.pkgshare.display(),
            );
            if options.enabled("libcxx") {
                s.push_str(&format!(
                    "\n\nTo use the bundled libc++ please add the following LDFLAGS:\n\
                     LDFLAGS=\"-L{lib} -Wl,-rpath,{lib}\"",
                    lib = layout.lib.display(),
                ));
            }
            s
        }
        _ => format!("{} installed to {}.", descriptor.name, layout.prefix.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{InstallSpec, SourceSpec, VerifySpec};
    use std::path::Path;

    fn descriptor(name: &str) -> PackageDescriptor {
        PackageDescriptor {
            name: name.to_string(),
            homepage: String::new(),
            version: "0.6.3".to_string(),
            source: SourceSpec::Git {
                url: String::new(),
                tag: "v0.6.3".to_string(),
                shallow: false,
            },
            resources: Vec::new(),
            patches: None,
            dependencies: Vec::new(),
            options: Vec::new(),
            build_system: BuildSystem::Make,
            make_goals: Vec::new(),
            install: InstallSpec {
                binary_prefix: name.to_string(),
                relax_cache_files: Vec::new(),
                copy_trees: Vec::new(),
            },
            verify: VerifySpec {
                binary: name.to_string(),
                args: Vec::new(),
                expect_prefix: false,
                test_assets: None,
            },
        }
    }

    #[test]
    fn test_build_lock_is_exclusive() {
        let temp = tempfile::TempDir::new().unwrap();
        let paths = BuildPaths::new(temp.path(), "julia");
        fs::create_dir_all(&paths.root).unwrap();

        let held = acquire_build_lock(&paths).unwrap();
        let err = acquire_build_lock(&paths).unwrap_err();
        assert!(err.to_string().contains("already running"));

        drop(held);
        acquire_build_lock(&paths).unwrap();
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = BuildReport {
            package: "julia".to_string(),
            version: "0.6.3".to_string(),
            prefix: "/usr/local/opt/julia".to_string(),
            options: [("system-libm".to_string(), true)].into_iter().collect(),
            bottle: false,
            head: false,
            flags: vec!["USE_SYSTEM_LLVM=1".to_string()],
            runtime_dependencies: vec!["openblas".to_string()],
            installed_files: 42,
            stages: vec![StageTiming {
                stage: "build".to_string(),
                seconds: 1.5,
            }],
            warnings: Vec::new(),
            finished_at_utc: "2018-06-01T00:00:00Z".to_string(),
        };

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&report).unwrap()).unwrap();
        assert_eq!(json["package"], "julia");
        assert_eq!(json["flags"][0], "USE_SYSTEM_LLVM=1");
        assert_eq!(json["options"]["system-libm"], true);
    }

    #[test]
    fn test_julia_caveats_mention_test_suite() {
        let desc = descriptor("julia");
        let layout = InstallLayout::new(Path::new("/usr/local/opt/julia"), "julia");
        let options = BuildOptions::from_descriptor(&desc);

        let text = caveats(&desc, &layout, &options);
        assert!(text.contains("share/julia/test"));
        assert!(text.contains("Base.runtests()"));
    }

    #[test]
    fn test_llvm_caveats_mention_libcxx_only_when_enabled() {
        let mut desc = descriptor("llvm-julia");
        desc.options.push(crate::descriptor::OptionSpec {
            name: "libcxx".to_string(),
            description: String::new(),
            default: false,
        });
        let layout = InstallLayout::new(Path::new("/usr/local/opt/llvm-julia"), "llvm-julia");

        let options = BuildOptions::from_descriptor(&desc);
        assert!(!caveats(&desc, &layout, &options).contains("libc++"));

        let mut options = BuildOptions::from_descriptor(&desc);
        options.set(&desc, "libcxx", true).unwrap();
        assert!(caveats(&desc, &layout, &options).contains("libc++"));
    }
}
