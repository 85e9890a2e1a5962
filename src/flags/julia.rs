//! Make flags for the Julia runtime build.

use crate::descriptor::PackageDescriptor;
use crate::flags::{BuildEnv, FlagSet};
use crate::host::{CompilerFamily, HostFacts};
use crate::layout::{DepsRoot, InstallLayout};
use crate::options::BuildOptions;

/// Bundled third-party components replaced by already-installed packages.
pub const SYSTEM_DEPS: &[&str] = &[
    "FFTW",
    "GLPK",
    "GMP",
    "LLVM",
    "PCRE",
    "BLAS",
    "LAPACK",
    "SUITESPARSE",
    "ARPACK",
    "MPFR",
    "LIBGIT2",
];

/// The patched LLVM package this build links against.
pub const LLVM_DEP_NAME: &str = "llvm-julia";
const LLVM_VERSION: &str = "3.9.1";

/// Assemble the make flag set for a Julia build.
///
/// Flags are additive and order-independent to make; the set guarantees no
/// duplicate keys.
pub fn assemble(
    _descriptor: &PackageDescriptor,
    options: &BuildOptions,
    host: &HostFacts,
    layout: &InstallLayout,
    deps: &DepsRoot,
) -> FlagSet {
    let mut flags = FlagSet::new();

    flags.set("prefix", layout.prefix.display().to_string());
    flags.set("USE_BLAS64", "0");
    flags.set("TAGGED_RELEASE_BANNER", "julia-builder release");

    if let Some(fc) = &host.fortran_compiler {
        flags.set("FC", fc.clone());
    }

    // llvm-config is named nonstandardly in the patched LLVM package.
    flags.set(
        "LLVM_CONFIG",
        deps.opt_bin(LLVM_DEP_NAME)
            .join("llvm-config")
            .display()
            .to_string(),
    );
    flags.set("LLVM_VER", LLVM_VERSION);

    // Default software base, mostly for suitesparse.
    flags.set("LOCALBASE", layout.prefix.display().to_string());

    if host.compiler == CompilerFamily::Clang {
        flags.set("USECLANG", "1");
    }
    if options.verbose {
        flags.set("VERBOSE", "1");
    }

    flags.set("LIBBLAS", "-lopenblas");
    flags.set("LIBBLASNAME", "libopenblas");
    flags.set("LIBLAPACK", "-lopenblas");
    flags.set("LIBLAPACKNAME", "libopenblas");

    for dep in SYSTEM_DEPS {
        flags.set(&format!("USE_SYSTEM_{}", dep), "1");
    }

    if options.enabled("system-libm") {
        flags.set("USE_SYSTEM_LIBM", "1");
    }

    // Redistributable bottles must run on older hardware: restrict the
    // instruction set to a conservative baseline.
    if options.bottle {
        flags.set("MARCH", "core2");
    }

    flags
}

/// Build-step environment for a Julia build.
pub fn build_env(host: &HostFacts) -> BuildEnv {
    let mut env = BuildEnv::default();

    if host.is_macos() {
        env.set("PLATFORM", "darwin");
    }
    // Host Python must not leak into the bootstrap.
    env.set("PYTHONPATH", "");

    if !host.cppflags.is_empty() {
        env.set("CPPFLAGS", host.cppflags.clone());
    }
    env.append("CPPFLAGS", "-DUSE_ORCJIT");

    if !host.ldflags.is_empty() {
        env.set("LDFLAGS", host.ldflags.clone());
    }
    if host.is_macos() {
        // Leave headroom in the load commands for post-install rpath edits.
        env.append("LDFLAGS", "-headerpad_max_install_names");
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{BuildSystem, InstallSpec, OptionSpec, SourceSpec, VerifySpec};
    use std::path::Path;

    fn julia_descriptor() -> PackageDescriptor {
        PackageDescriptor {
            name: "julia".to_string(),
            homepage: "https://julialang.org".to_string(),
            version: "0.6.3".to_string(),
            source: SourceSpec::Git {
                url: "https://github.com/JuliaLang/julia.git".to_string(),
                tag: "v0.6.3".to_string(),
                shallow: false,
            },
            resources: Vec::new(),
            patches: None,
            dependencies: Vec::new(),
            options: vec![OptionSpec {
                name: "system-libm".to_string(),
                description: "Use system's libm instead of openlibm".to_string(),
                default: false,
            }],
            build_system: BuildSystem::Make,
            make_goals: vec!["release".to_string(), "debug".to_string()],
            install: InstallSpec {
                binary_prefix: "julia".to_string(),
                relax_cache_files: Vec::new(),
                copy_trees: Vec::new(),
            },
            verify: VerifySpec {
                binary: "julia".to_string(),
                args: Vec::new(),
                expect_prefix: false,
                test_assets: Some("test".to_string()),
            },
        }
    }

    fn host(compiler: CompilerFamily) -> HostFacts {
        HostFacts {
            compiler,
            macos_version: Some((10, 13)),
            fortran_compiler: Some("/usr/local/bin/gfortran".to_string()),
            cppflags: String::new(),
            ldflags: String::new(),
        }
    }

    fn fixtures() -> (InstallLayout, DepsRoot) {
        (
            InstallLayout::new(Path::new("/usr/local/opt/julia"), "julia"),
            DepsRoot::new(Path::new("/usr/local")),
        )
    }

    #[test]
    fn test_default_options_include_system_llvm_and_no_march() {
        let descriptor = julia_descriptor();
        let (layout, deps) = fixtures();
        let options = BuildOptions::from_descriptor(&descriptor);

        let flags = assemble(&descriptor, &options, &host(CompilerFamily::Clang), &layout, &deps);

        assert_eq!(flags.get("USE_SYSTEM_LLVM"), Some("1"));
        assert!(!flags.contains("MARCH"));
        assert!(!flags.contains("USE_SYSTEM_LIBM"));
    }

    #[test]
    fn test_bottle_restricts_march_to_core2() {
        let descriptor = julia_descriptor();
        let (layout, deps) = fixtures();
        let mut options = BuildOptions::from_descriptor(&descriptor);
        options.bottle = true;

        let flags = assemble(&descriptor, &options, &host(CompilerFamily::Clang), &layout, &deps);
        assert_eq!(flags.get("MARCH"), Some("core2"));
    }

    #[test]
    fn test_system_libm_option() {
        let descriptor = julia_descriptor();
        let (layout, deps) = fixtures();
        let mut options = BuildOptions::from_descriptor(&descriptor);
        options.set(&descriptor, "system-libm", true).unwrap();

        let flags = assemble(&descriptor, &options, &host(CompilerFamily::Clang), &layout, &deps);
        assert_eq!(flags.get("USE_SYSTEM_LIBM"), Some("1"));
        // No conflicting bundled-libm flag exists in the set.
        assert!(!flags
            .iter()
            .any(|(key, value)| key == "USE_SYSTEM_LIBM" && value != "1"));
    }

    #[test]
    fn test_no_duplicate_keys_across_option_combinations() {
        let descriptor = julia_descriptor();
        let (layout, deps) = fixtures();

        for bottle in [false, true] {
            for libm in [false, true] {
                for verbose in [false, true] {
                    let mut options = BuildOptions::from_descriptor(&descriptor);
                    options.bottle = bottle;
                    options.verbose = verbose;
                    options.set(&descriptor, "system-libm", libm).unwrap();

                    let flags =
                        assemble(&descriptor, &options, &host(CompilerFamily::Gcc), &layout, &deps);
                    let mut keys: Vec<&str> = flags.iter().map(|(k, _)| k).collect();
                    let total = keys.len();
                    keys.sort_unstable();
                    keys.dedup();
                    assert_eq!(keys.len(), total, "duplicate flag key emitted");
                }
            }
        }
    }

    #[test]
    fn test_clang_and_fortran_flags() {
        let descriptor = julia_descriptor();
        let (layout, deps) = fixtures();
        let options = BuildOptions::from_descriptor(&descriptor);

        let clang = assemble(&descriptor, &options, &host(CompilerFamily::Clang), &layout, &deps);
        assert_eq!(clang.get("USECLANG"), Some("1"));
        assert_eq!(clang.get("FC"), Some("/usr/local/bin/gfortran"));
        assert_eq!(
            clang.get("LLVM_CONFIG"),
            Some("/usr/local/opt/llvm-julia/bin/llvm-config")
        );

        let gcc = assemble(&descriptor, &options, &host(CompilerFamily::Gcc), &layout, &deps);
        assert!(!gcc.contains("USECLANG"));
    }

    #[test]
    fn test_build_env_threads_accumulators() {
        let facts = host(CompilerFamily::Clang);
        let env = build_env(&facts);

        assert_eq!(env.get("PLATFORM"), Some("darwin"));
        assert_eq!(env.get("PYTHONPATH"), Some(""));
        assert_eq!(env.get("CPPFLAGS"), Some("-DUSE_ORCJIT"));
        assert_eq!(env.get("LDFLAGS"), Some("-headerpad_max_install_names"));

        let mut linux = facts.clone();
        linux.macos_version = None;
        linux.ldflags = "-L/opt/lib".to_string();
        let env = build_env(&linux);
        assert_eq!(env.get("PLATFORM"), None);
        assert_eq!(env.get("LDFLAGS"), Some("-L/opt/lib"));
    }
}
