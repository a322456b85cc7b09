pub mod mapper;
pub mod service;
pub mod specification;

pub use mapper::*;
pub use service::*;
pub use specification::*;
