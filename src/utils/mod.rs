// Common utilities for Dockru
pub mod constants;
pub mod crypto;
pub mod docker;
pub mod limit_queue;
pub mod terminal;
pub mod types;
pub mod yaml_utils;

// Re-export commonly used items
pub use constants::*;
