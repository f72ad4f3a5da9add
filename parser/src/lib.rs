pub mod analyzer;
pub mod block;
pub mod chunk;
pub mod config;
mod error;
pub mod path;
mod roflreplay;
pub mod tracker;
pub mod types;

pub use error::*;
pub use roflreplay::*;
pub use strum;
