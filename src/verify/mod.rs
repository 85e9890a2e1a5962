//! Post-install smoke test.
//!
//! A missing test-asset directory is informational, not a build defect: the
//! development and release variants install test assets to different
//! locations, so the warning tells the user which variant they probably
//! meant to build. Only an actually failing smoke command is an error.

use anyhow::{bail, Context, Result};

use crate::descriptor::PackageDescriptor;
use crate::layout::InstallLayout;
use crate::options::BuildOptions;
use crate::process::{ensure_exists, Cmd};

/// Result of the verification stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Passed,
    /// Smoke test skipped; the run still succeeds. The warning is recorded
    /// in the build report.
    SkippedMissingAssets { warning: String },
}

/// Run the descriptor's smoke test against the install layout.
pub fn run(
    descriptor: &PackageDescriptor,
    layout: &InstallLayout,
    options: &BuildOptions,
) -> Result<VerifyOutcome> {
    if let Some(assets) = &descriptor.verify.test_assets {
        let assets_dir = layout.pkgshare.join(assets);
        if !assets_dir.is_dir() {
            let hint = if options.head {
                "Did you accidentally build the development (--head) variant?"
            } else {
                "Did you mean to build the development (--head) variant?"
            };
            let warning = format!(
                "test assets not found at {}\n{}",
                assets_dir.display(),
                hint
            );
            eprintln!("  [WARN] {}", warning);
            return Ok(VerifyOutcome::SkippedMissingAssets { warning });
        }
    }

    let binary = layout.bin.join(&descriptor.verify.binary);
    ensure_exists(&binary, "smoke test binary")?;

    println!(
        "  Running {} {}",
        binary.display(),
        descriptor.verify.args.join(" ")
    );

    if descriptor.verify.expect_prefix {
        let result = Cmd::new(&binary.to_string_lossy())
            .args(descriptor.verify.args.iter().cloned())
            .error_msg("smoke test failed")
            .run()
            .with_context(|| format!("verifying '{}'", descriptor.name))?;
        let reported = result.stdout.trim();
        let expected = layout.prefix.to_string_lossy();
        if reported != expected {
            bail!(
                "smoke test reported prefix '{}', expected '{}'",
                reported,
                expected
            );
        }
    } else {
        Cmd::new(&binary.to_string_lossy())
            .args(descriptor.verify.args.iter().cloned())
            .error_msg("smoke test failed")
            .run_interactive()
            .with_context(|| format!("verifying '{}'", descriptor.name))?;
    }

    Ok(VerifyOutcome::Passed)
}
