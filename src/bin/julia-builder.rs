use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use julia_builder::descriptor::load_descriptor;
use julia_builder::layout::{BuildPaths, InstallLayout};
use julia_builder::options::BuildOptions;
use julia_builder::pipeline::{self, PipelineConfig};
use julia_builder::verify::{self, VerifyOutcome};
use julia_builder::HostFacts;

const PACKAGES: &[&str] = &["julia", "llvm-julia"];
const DEFAULT_DEPS_ROOT: &str = "/usr/local";

fn usage() -> &'static str {
    "Usage:\n  \
     julia-builder build <julia|llvm-julia|descriptor.toml> [options]\n  \
     julia-builder verify <julia|llvm-julia|descriptor.toml> [--prefix DIR]\n  \
     julia-builder show <julia|llvm-julia|descriptor.toml>\n\n\
     Options:\n  \
     --prefix DIR         install prefix (default: <deps>/opt/<package>)\n  \
     --deps-prefix DIR    dependency prefix root (default: /usr/local)\n  \
     --build-dir DIR      build tree base (default: ~/.cache/julia-builder)\n  \
     --with-OPTION        enable a descriptor option (e.g. --with-system-libm)\n  \
     --without-OPTION     disable a descriptor option\n  \
     --bottle             build a redistributable binary (conservative CPU baseline)\n  \
     --head               build the development branch head instead of the pinned tag\n  \
     --verbose            verbose build output"
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.split_first() {
        Some((cmd, rest)) if cmd == "build" => build(rest),
        Some((cmd, rest)) if cmd == "verify" => verify_only(rest),
        Some((cmd, rest)) if cmd == "show" => show(rest),
        _ => bail!(usage()),
    }
}

struct ParsedArgs {
    descriptor_path: PathBuf,
    prefix: Option<PathBuf>,
    deps_root: PathBuf,
    build_base: PathBuf,
    toggles: Vec<(String, bool)>,
    bottle: bool,
    head: bool,
    verbose: bool,
}

fn parse_args(args: &[String]) -> Result<ParsedArgs> {
    let Some((package, flags)) = args.split_first() else {
        bail!(usage());
    };

    let mut parsed = ParsedArgs {
        descriptor_path: resolve_descriptor_path(package)?,
        prefix: None,
        deps_root: PathBuf::from(DEFAULT_DEPS_ROOT),
        build_base: BuildPaths::default_base_dir(),
        toggles: Vec::new(),
        bottle: false,
        head: false,
        verbose: false,
    };

    let mut iter = flags.iter();
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--prefix" => {
                let value = iter.next().context("--prefix requires a directory")?;
                parsed.prefix = Some(PathBuf::from(value));
            }
            "--deps-prefix" => {
                let value = iter.next().context("--deps-prefix requires a directory")?;
                parsed.deps_root = PathBuf::from(value);
            }
            "--build-dir" => {
                let value = iter.next().context("--build-dir requires a directory")?;
                parsed.build_base = PathBuf::from(value);
            }
            "--bottle" => parsed.bottle = true,
            "--head" => parsed.head = true,
            "--verbose" => parsed.verbose = true,
            other => {
                if let Some(name) = other.strip_prefix("--with-") {
                    parsed.toggles.push((name.to_string(), true));
                } else if let Some(name) = other.strip_prefix("--without-") {
                    parsed.toggles.push((name.to_string(), false));
                } else {
                    bail!("unknown flag '{}'\n\n{}", other, usage());
                }
            }
        }
    }

    Ok(parsed)
}

/// Resolve a package name or descriptor path to a descriptor file.
///
/// Known package names map to `descriptors/<name>.toml` relative to the
/// current directory; anything else must be a path to a TOML file.
fn resolve_descriptor_path(package: &str) -> Result<PathBuf> {
    let as_path = Path::new(package);
    if as_path.is_file() {
        return Ok(as_path.to_path_buf());
    }

    if PACKAGES.contains(&package) {
        let path = PathBuf::from("descriptors").join(format!("{}.toml", package));
        if path.is_file() {
            return Ok(path);
        }
        bail!(
            "descriptor for '{}' not found at {}\nRun from the repository root, or pass a descriptor path.",
            package,
            path.display()
        );
    }

    bail!(
        "unknown package '{}'; expected one of: {}, or a descriptor path",
        package,
        PACKAGES.join(", ")
    )
}

fn build_options(parsed: &ParsedArgs, descriptor: &julia_builder::PackageDescriptor) -> Result<BuildOptions> {
    let mut options = BuildOptions::from_descriptor(descriptor);
    options.bottle = parsed.bottle;
    options.head = parsed.head;
    options.verbose = parsed.verbose;
    for (name, value) in &parsed.toggles {
        options.set(descriptor, name, *value)?;
    }
    Ok(options)
}

fn effective_prefix(parsed: &ParsedArgs, package_name: &str) -> PathBuf {
    parsed
        .prefix
        .clone()
        .unwrap_or_else(|| parsed.deps_root.join("opt").join(package_name))
}

fn build(args: &[String]) -> Result<()> {
    let parsed = parse_args(args)?;
    let descriptor = load_descriptor(&parsed.descriptor_path)?;
    let options = build_options(&parsed, &descriptor)?;
    let host = HostFacts::detect()?;

    let config = PipelineConfig {
        prefix: effective_prefix(&parsed, &descriptor.name),
        deps_root: parsed.deps_root.clone(),
        build_base: parsed.build_base.clone(),
    };

    let report = pipeline::run(&descriptor, &options, &host, &config)
        .with_context(|| format!("building '{}'", descriptor.name))?;

    println!(
        "[{}:{}] {} {} installed to {}",
        env!("CARGO_PKG_NAME"),
        report.package,
        report.package,
        report.version,
        report.prefix
    );
    Ok(())
}

fn verify_only(args: &[String]) -> Result<()> {
    let parsed = parse_args(args)?;
    let descriptor = load_descriptor(&parsed.descriptor_path)?;
    let options = build_options(&parsed, &descriptor)?;
    let layout = InstallLayout::new(&effective_prefix(&parsed, &descriptor.name), &descriptor.name);

    match verify::run(&descriptor, &layout, &options)? {
        VerifyOutcome::Passed => {
            println!("[{}:{}] verify passed", env!("CARGO_PKG_NAME"), descriptor.name);
        }
        VerifyOutcome::SkippedMissingAssets { .. } => {
            println!(
                "[{}:{}] verify skipped (missing test assets)",
                env!("CARGO_PKG_NAME"),
                descriptor.name
            );
        }
    }
    Ok(())
}

fn show(args: &[String]) -> Result<()> {
    let parsed = parse_args(args)?;
    let descriptor = load_descriptor(&parsed.descriptor_path)?;

    println!("{} {}", descriptor.name, descriptor.version);
    println!("  homepage: {}", descriptor.homepage);
    println!("  dependencies:");
    for dep in &descriptor.dependencies {
        let kind = match dep.kind {
            julia_builder::descriptor::DepKind::Build => " (build)",
            julia_builder::descriptor::DepKind::Runtime => "",
        };
        println!("    {}{}", dep.name, kind);
    }
    if !descriptor.options.is_empty() {
        println!("  options:");
        for opt in &descriptor.options {
            let default = if opt.default { " [default: on]" } else { "" };
            println!("    --with-{}: {}{}", opt.name, opt.description, default);
        }
    }
    Ok(())
}
