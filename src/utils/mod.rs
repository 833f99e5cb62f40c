//! Shared utilities: link delay and bandwidth parsing.

pub mod bandwidth;
pub mod duration;

pub use bandwidth::Bandwidth;
pub use duration::{format_delay, parse_delay};
