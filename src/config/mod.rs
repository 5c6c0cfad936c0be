//! Counter Configuration Module
//!
//! Per-station configuration loaded from TOML files.
//!
//! ## Loading Order
//!
//! 1. `--config` flag, else the `SHEET_COUNTER_CONFIG` environment variable
//! 2. `counter_config.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The loaded [`CounterConfig`] is handed to the session by value; nothing
//! reads configuration through globals.

mod counter_config;
pub mod defaults;
pub mod validation;

pub use counter_config::*;
