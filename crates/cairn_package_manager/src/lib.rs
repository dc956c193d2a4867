pub use node_package_manager::*;
pub use package_manager::*;

mod node_package_manager;
mod package_manager;
