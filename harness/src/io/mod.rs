//! Side-effecting components: processes, files, configuration.

pub mod config;
pub mod editor;
pub mod handler;
pub mod memory;
pub mod paths;
pub mod reader;
pub mod session;
