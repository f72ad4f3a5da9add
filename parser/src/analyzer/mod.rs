#[allow(clippy::module_inception)]
mod analyzer;
pub mod calibration;
pub mod packet_dump;
pub mod positions;
pub mod survey;

pub use analyzer::*;
