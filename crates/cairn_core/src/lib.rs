pub mod cache;
pub mod config_loader;
pub mod diagnostic;
pub mod hash;
pub mod types;
