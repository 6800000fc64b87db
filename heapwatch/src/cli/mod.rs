//! Command-line interface for heapwatch
//!
//! This module contains CLI argument parsing

pub mod args;

pub use args::{Args, Command};
