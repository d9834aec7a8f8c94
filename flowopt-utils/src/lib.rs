pub mod collections;
pub use collections::*;
pub mod mapped_stack;
pub use mapped_stack::*;
