pub mod artifacts;
pub mod backend;
pub mod cancel;
pub mod compiler;
pub mod config;
pub mod error;
pub mod output;
pub mod params;

pub use artifacts::*;
pub use backend::*;
pub use cancel::*;
pub use compiler::*;
pub use config::*;
pub use error::*;
pub use output::*;
pub use params::*;
