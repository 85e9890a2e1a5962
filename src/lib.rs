//! One-shot source builder for the Julia runtime and its patched LLVM.
//!
//! This crate replaces a pair of package-manager formulas with a small
//! config-driven task runner. Each package is described by an immutable TOML
//! descriptor; a fixed-order driver runs the stages. The engineering
//! complexity lives in the external projects being built; this tool is
//! deliberately glue.
//!
//! # Architecture
//!
//! ```text
//! descriptor (TOML) ──► pipeline driver
//!                           │
//!                           ├── preflight   host tools + installed deps
//!                           ├── fetch       git mirror / archive + patches
//!                           ├── flags       make flags or cmake defines
//!                           ├── build       two-step make, or cmake+make
//!                           ├── postinstall rpath patching under a
//!                           │               permission guard
//!                           └── verify      smoke test (warn on missing
//!                                           test assets)
//! ```
//!
//! Environment the formulas used to mutate globally (compiler overrides,
//! CPPFLAGS/LDFLAGS accumulators, Python paths) is captured once in
//! [`host::HostFacts`] and threaded through as explicit data.

pub mod build;
pub mod descriptor;
pub mod fetch;
pub mod flags;
pub mod host;
pub mod layout;
pub mod options;
pub mod pipeline;
pub mod postinstall;
pub mod preflight;
pub mod process;
pub mod verify;

pub use descriptor::{load_descriptor, PackageDescriptor};
pub use host::HostFacts;
pub use options::BuildOptions;
pub use pipeline::{BuildReport, PipelineConfig};
