//! Compiler backends
//!
//! [`CliBackend`] drives the `opa` executable; [`NativeBackend`] calls into a
//! natively compiled OPA library. Both implement
//! [`crate::compilation::CompilerBackend`].

pub mod cli;
pub mod native;

pub use cli::CliBackend;
pub use native::NativeBackend;
