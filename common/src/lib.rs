pub mod config;
pub mod frame;
pub mod signal;
pub mod slot;
