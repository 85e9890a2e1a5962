//! Host environment detection.
//!
//! Compiler identity, OS version, and inherited flag accumulators are
//! captured once up front and threaded through the pipeline as plain data.
//! Nothing here mutates the process environment.

use anyhow::Result;
use std::env;

use crate::process::Cmd;

/// Detected C compiler family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerFamily {
    Clang,
    Gcc,
    Other,
}

/// Facts about the build host, detected once per run.
#[derive(Debug, Clone)]
pub struct HostFacts {
    pub compiler: CompilerFamily,
    /// macOS product version as (major, minor); `None` off-mac.
    pub macos_version: Option<(u32, u32)>,
    /// Fortran compiler from `$FC`, passed to builds that need one.
    pub fortran_compiler: Option<String>,
    /// Inherited `CPPFLAGS` accumulator seed.
    pub cppflags: String,
    /// Inherited `LDFLAGS` accumulator seed.
    pub ldflags: String,
}

impl HostFacts {
    /// Detect compiler and OS facts from the environment.
    pub fn detect() -> Result<Self> {
        let cc = env::var("CC").unwrap_or_else(|_| "cc".to_string());
        let compiler = detect_compiler_family(&cc);

        let macos_version = if cfg!(target_os = "macos") {
            detect_macos_version()
        } else {
            None
        };

        Ok(Self {
            compiler,
            macos_version,
            fortran_compiler: env::var("FC").ok().filter(|fc| !fc.is_empty()),
            cppflags: env::var("CPPFLAGS").unwrap_or_default(),
            ldflags: env::var("LDFLAGS").unwrap_or_default(),
        })
    }

    pub fn is_macos(&self) -> bool {
        self.macos_version.is_some()
    }

    /// True when the host macOS predates `major.minor`. Always false off-mac.
    pub fn macos_before(&self, major: u32, minor: u32) -> bool {
        match self.macos_version {
            Some(version) => version < (major, minor),
            None => false,
        }
    }
}

fn detect_compiler_family(cc: &str) -> CompilerFamily {
    let output = match Cmd::new(cc).arg("--version").allow_fail().run() {
        Ok(result) if result.success() => result.stdout,
        _ => return CompilerFamily::Other,
    };
    classify_compiler_version(&output)
}

/// Classify a `cc --version` banner.
pub fn classify_compiler_version(banner: &str) -> CompilerFamily {
    let banner = banner.to_ascii_lowercase();
    if banner.contains("clang") {
        CompilerFamily::Clang
    } else if banner.contains("gcc") || banner.contains("free software foundation") {
        CompilerFamily::Gcc
    } else {
        CompilerFamily::Other
    }
}

fn detect_macos_version() -> Option<(u32, u32)> {
    let result = Cmd::new("sw_vers")
        .arg("-productVersion")
        .allow_fail()
        .run()
        .ok()?;
    if !result.success() {
        return None;
    }
    parse_macos_version(result.stdout.trim())
}

/// Parse a `sw_vers -productVersion` string like "10.13.6".
pub fn parse_macos_version(raw: &str) -> Option<(u32, u32)> {
    let mut parts = raw.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor))
}
