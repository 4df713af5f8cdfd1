//! Rego Compile - OPA policy bundle compiler
//!
//! This crate turns Rego policy sources, bundle directories, or bundle archives
//! into compiled wasm policy bundles. Compilation is delegated to one of two
//! interchangeable backends: the `opa` command line tool or a natively compiled
//! copy of the OPA compiler loaded as a shared library.

pub mod backends;
pub mod bundle;
pub mod capabilities;
pub mod compilation;

pub use bundle::{read_bundle, Bundle, BundleEntry, BundleError, BundleManifest, BundleWriter};
pub use capabilities::{merge_capabilities, CapabilitiesError};
pub use compilation::{
    CancelFlag, CompilationError, CompilationParameters, CompiledBundle, CompilerConfig,
    CompilerVersion, RegoCompiler,
};
