//! OPA policy bundle archives
//!
//! A bundle is a gzip compressed tar stream whose entries are rooted at `/`.
//! Conventional entries are `/policy.wasm`, `/data.json` and `/.manifest`.

pub mod error;
pub mod manifest;
pub mod reader;
pub mod writer;

pub use error::*;
pub use manifest::*;
pub use reader::*;
pub use writer::*;

/// Path of the compiled policy module inside a bundle.
pub const POLICY_WASM_PATH: &str = "/policy.wasm";

/// Path of the optional data document inside a bundle.
pub const DATA_JSON_PATH: &str = "/data.json";

/// Path of the optional manifest inside a bundle.
pub const MANIFEST_PATH: &str = "/.manifest";
