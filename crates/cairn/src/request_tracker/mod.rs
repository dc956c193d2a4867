pub use self::request::*;
pub use self::request_graph::*;
pub use self::request_tracker::*;
pub use self::worker::*;
pub(crate) use self::tracked_file_system::*;

mod invalidation;
mod request;
mod request_graph;

#[allow(clippy::module_inception)]
mod request_tracker;
mod tracked_file_system;
mod worker;
