//! CLI command handlers.

pub mod config;
pub mod export;
pub mod render;
