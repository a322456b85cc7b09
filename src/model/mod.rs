pub mod dto;
pub mod entity;
pub mod filter;

pub use dto::*;
pub use entity::*;
pub use filter::*;
