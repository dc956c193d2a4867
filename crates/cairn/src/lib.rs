pub use cairn::*;
pub use cairn_filesystem as file_system;
pub use error::*;
pub use options::*;
pub use watch::*;

pub mod cache_store;
pub mod cairn;
pub mod request_tracker;
pub mod requests;

mod error;
mod options;
mod watch;

#[cfg(test)]
mod test_utils;
