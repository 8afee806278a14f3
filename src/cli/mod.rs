//! Command-line surface for headless runs.

pub mod args;

pub use args::{Args, Command};
