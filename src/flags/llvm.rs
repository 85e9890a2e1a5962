//! CMake defines for the patched LLVM build.

use std::path::Path;

use crate::descriptor::PackageDescriptor;
use crate::flags::{BuildEnv, FlagSet};
use crate::host::HostFacts;
use crate::layout::{DepsRoot, InstallLayout};
use crate::options::BuildOptions;

/// Targets built when the all-targets option is off. Covers the backends
/// Julia's JIT actually emits for.
pub const DEFAULT_TARGETS: &str = "AMDGPU;ARM;NVPTX;X86";

/// Assemble the cmake define set for an LLVM build.
///
/// `python_home` is the detected Python prefix, only consulted when the lldb
/// option is enabled (lldb links against the Python runtime).
pub fn assemble(
    _descriptor: &PackageDescriptor,
    options: &BuildOptions,
    _host: &HostFacts,
    layout: &InstallLayout,
    deps: &DepsRoot,
    python_home: Option<&Path>,
) -> FlagSet {
    let mut defines = FlagSet::new();

    defines.set("CMAKE_INSTALL_PREFIX", layout.prefix.display().to_string());
    defines.set("CMAKE_BUILD_TYPE", "Release");
    defines.set("CMAKE_FIND_FRAMEWORK", "LAST");

    defines.set("LLVM_OPTIMIZED_TABLEGEN", "ON");
    defines.set("LLVM_INCLUDE_DOCS", "OFF");
    defines.set("LLVM_ENABLE_RTTI", "ON");
    defines.set("LLVM_ENABLE_EH", "ON");
    defines.set("LLVM_INSTALL_UTILS", "ON");

    defines.set(
        "LLVM_TARGETS_TO_BUILD",
        if options.enabled("all-targets") {
            "all"
        } else {
            DEFAULT_TARGETS
        },
    );
    defines.set("LIBOMP_ARCH", "x86_64");

    if options.enabled("toolchain") {
        defines.set("LLVM_CREATE_XCODE_TOOLCHAIN", "ON");
    }

    if options.enabled("shared-libs") {
        defines.set("BUILD_SHARED_LIBS", "ON");
        defines.set("LIBOMP_ENABLE_SHARED", "ON");
    } else {
        defines.set("LLVM_BUILD_LLVM_DYLIB", "ON");
    }

    if options.enabled("libcxx") {
        defines.set("LLVM_ENABLE_LIBCXX", "ON");
    }

    if options.enabled("libffi") {
        defines.set("LLVM_ENABLE_FFI", "ON");
        defines.set(
            "FFI_INCLUDE_DIR",
            deps.opt_include("libffi").display().to_string(),
        );
        defines.set(
            "FFI_LIBRARY_DIR",
            deps.opt_lib("libffi").display().to_string(),
        );
    }

    if options.enabled("lldb") {
        defines.set("LLDB_RELOCATABLE_PYTHON", "ON");
        if let Some(pyhome) = python_home {
            defines.set(
                "PYTHON_LIBRARY",
                pyhome.join("lib/libpython2.7.dylib").display().to_string(),
            );
            defines.set(
                "PYTHON_INCLUDE_DIR",
                pyhome.join("include/python2.7").display().to_string(),
            );
        }
    }

    defines
}

/// Extra make goals run after `make install`.
///
/// The Xcode toolchain is a separate install target in LLVM's generated
/// makefiles; it only exists when the toolchain define was configured.
pub fn extra_install_goals(options: &BuildOptions) -> Vec<String> {
    if options.enabled("toolchain") {
        vec!["install-xcode-toolchain".to_string()]
    } else {
        Vec::new()
    }
}

/// Build-step environment for an LLVM build.
pub fn build_env(host: &HostFacts, options: &BuildOptions, python_home: Option<&Path>) -> BuildEnv {
    let mut env = BuildEnv::default();

    if !host.cppflags.is_empty() {
        env.set("CPPFLAGS", host.cppflags.clone());
    }
    if !host.ldflags.is_empty() {
        env.set("LDFLAGS", host.ldflags.clone());
    }

    if options.enabled("lldb") {
        if let Some(pyhome) = python_home {
            env.set("PYTHONHOME", pyhome.display().to_string());
        }
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{
        BuildSystem, InstallSpec, OptionSpec, SourceSpec, VerifySpec,
    };
    use crate::host::CompilerFamily;

    fn llvm_descriptor() -> PackageDescriptor {
        let option = |name: &str, default: bool| OptionSpec {
            name: name.to_string(),
            description: String::new(),
            default,
        };
        PackageDescriptor {
            name: "llvm-julia".to_string(),
            homepage: "https://llvm.org/".to_string(),
            version: "3.9.1".to_string(),
            source: SourceSpec::Archive {
                url: "https://llvm.org/releases/3.9.1/llvm-3.9.1.src.tar.xz".to_string(),
                sha256: "1fd90354b9cf19232e8f168faf2220e79be555df3aa743242700879e8fd329ee"
                    .to_string(),
            },
            resources: Vec::new(),
            patches: None,
            dependencies: Vec::new(),
            options: vec![
                option("all-targets", false),
                option("shared-libs", false),
                option("libcxx", true),
                option("libffi", true),
                option("lldb", false),
                option("toolchain", false),
            ],
            build_system: BuildSystem::Cmake,
            make_goals: Vec::new(),
            install: InstallSpec {
                binary_prefix: "llvm".to_string(),
                relax_cache_files: Vec::new(),
                copy_trees: Vec::new(),
            },
            verify: VerifySpec {
                binary: "llvm-config".to_string(),
                args: vec!["--prefix".to_string()],
                expect_prefix: true,
                test_assets: None,
            },
        }
    }

    fn fixtures() -> (HostFacts, InstallLayout, DepsRoot) {
        (
            HostFacts {
                compiler: CompilerFamily::Clang,
                macos_version: Some((10, 13)),
                fortran_compiler: None,
                cppflags: String::new(),
                ldflags: String::new(),
            },
            InstallLayout::new(Path::new("/usr/local/opt/llvm-julia"), "llvm-julia"),
            DepsRoot::new(Path::new("/usr/local")),
        )
    }

    #[test]
    fn test_default_targets_are_conservative() {
        let descriptor = llvm_descriptor();
        let (host, layout, deps) = fixtures();
        let options = BuildOptions::from_descriptor(&descriptor);

        let defines = assemble(&descriptor, &options, &host, &layout, &deps, None);
        assert_eq!(defines.get("LLVM_TARGETS_TO_BUILD"), Some(DEFAULT_TARGETS));
        assert_eq!(defines.get("LLVM_BUILD_LLVM_DYLIB"), Some("ON"));
        assert!(!defines.contains("BUILD_SHARED_LIBS"));
    }

    #[test]
    fn test_all_targets_option() {
        let descriptor = llvm_descriptor();
        let (host, layout, deps) = fixtures();
        let mut options = BuildOptions::from_descriptor(&descriptor);
        options.set(&descriptor, "all-targets", true).unwrap();

        let defines = assemble(&descriptor, &options, &host, &layout, &deps, None);
        assert_eq!(defines.get("LLVM_TARGETS_TO_BUILD"), Some("all"));
    }

    #[test]
    fn test_shared_libs_excludes_dylib_define() {
        let descriptor = llvm_descriptor();
        let (host, layout, deps) = fixtures();
        let mut options = BuildOptions::from_descriptor(&descriptor);
        options.set(&descriptor, "shared-libs", true).unwrap();

        let defines = assemble(&descriptor, &options, &host, &layout, &deps, None);
        assert_eq!(defines.get("BUILD_SHARED_LIBS"), Some("ON"));
        assert_eq!(defines.get("LIBOMP_ENABLE_SHARED"), Some("ON"));
        assert!(!defines.contains("LLVM_BUILD_LLVM_DYLIB"));
    }

    #[test]
    fn test_libffi_dirs_point_into_deps_prefix() {
        let descriptor = llvm_descriptor();
        let (host, layout, deps) = fixtures();
        let options = BuildOptions::from_descriptor(&descriptor);

        let defines = assemble(&descriptor, &options, &host, &layout, &deps, None);
        assert_eq!(defines.get("LLVM_ENABLE_FFI"), Some("ON"));
        assert_eq!(
            defines.get("FFI_LIBRARY_DIR"),
            Some("/usr/local/opt/libffi/lib")
        );
    }

    #[test]
    fn test_lldb_python_paths() {
        let descriptor = llvm_descriptor();
        let (host, layout, deps) = fixtures();
        let mut options = BuildOptions::from_descriptor(&descriptor);
        options.set(&descriptor, "lldb", true).unwrap();

        let defines = assemble(
            &descriptor,
            &options,
            &host,
            &layout,
            &deps,
            Some(Path::new("/usr/local/opt/python@2")),
        );
        assert_eq!(defines.get("LLDB_RELOCATABLE_PYTHON"), Some("ON"));
        assert_eq!(
            defines.get("PYTHON_INCLUDE_DIR"),
            Some("/usr/local/opt/python@2/include/python2.7")
        );

        let env = build_env(&host, &options, Some(Path::new("/usr/local/opt/python@2")));
        assert_eq!(env.get("PYTHONHOME"), Some("/usr/local/opt/python@2"));
    }

    #[test]
    fn test_toolchain_option_adds_xcode_define_and_install_goal() {
        let descriptor = llvm_descriptor();
        let (host, layout, deps) = fixtures();
        let options = BuildOptions::from_descriptor(&descriptor);

        let defines = assemble(&descriptor, &options, &host, &layout, &deps, None);
        assert!(!defines.contains("LLVM_CREATE_XCODE_TOOLCHAIN"));
        assert!(extra_install_goals(&options).is_empty());

        let mut options = BuildOptions::from_descriptor(&descriptor);
        options.set(&descriptor, "toolchain", true).unwrap();
        let defines = assemble(&descriptor, &options, &host, &layout, &deps, None);
        assert_eq!(defines.get("LLVM_CREATE_XCODE_TOOLCHAIN"), Some("ON"));
        assert_eq!(extra_install_goals(&options), vec!["install-xcode-toolchain"]);
    }

    #[test]
    fn test_no_duplicate_defines_across_option_combinations() {
        let descriptor = llvm_descriptor();
        let (host, layout, deps) = fixtures();

        for all_targets in [false, true] {
            for shared in [false, true] {
                for ffi in [false, true] {
                    let mut options = BuildOptions::from_descriptor(&descriptor);
                    options.set(&descriptor, "all-targets", all_targets).unwrap();
                    options.set(&descriptor, "shared-libs", shared).unwrap();
                    options.set(&descriptor, "libffi", ffi).unwrap();

                    let defines = assemble(&descriptor, &options, &host, &layout, &deps, None);
                    let mut keys: Vec<&str> = defines.iter().map(|(k, _)| k).collect();
                    let total = keys.len();
                    keys.sort_unstable();
                    keys.dedup();
                    assert_eq!(keys.len(), total, "duplicate cmake define emitted");
                }
            }
        }
    }
}
