pub mod dominator;
pub use dominator::*;
