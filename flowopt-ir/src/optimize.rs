//! The transform passes.
//!
//! Each pass is a function over a single [`crate::Function`] returning whether it modified the
//! IR, so the pass manager knows when cached analyses must be thrown away.  The usual order is
//! [`ssa`], then [`hdse`], then [`try_cleanup`]; [`unreachable`] is run by the others whenever
//! they change the CFG.

pub mod hdse;
pub use hdse::*;
pub mod ssa;
pub use ssa::*;
pub mod try_cleanup;
pub use try_cleanup::*;
pub mod unreachable;
pub use unreachable::*;
