//! Shared utilities.

pub mod clock;
pub mod duration;
pub mod telemetry;

pub use clock::*;
pub use telemetry::*;
