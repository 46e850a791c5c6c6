//! Core gptmd library (record model, traversal, canvas replay, rendering, export).

pub mod assets;
pub mod canvas;
pub mod client;
pub mod config;
pub mod conversation;
pub mod export;
pub mod files;
pub mod logging;
pub mod persist;
pub mod render;
pub mod traverse;
pub mod tree;
