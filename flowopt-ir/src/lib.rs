// For now it's easiest to just export absolutely everything, we can refine the public API when
// it's closer to finished.

pub mod analysis;
pub use analysis::*;
pub mod block;
pub use block::*;
pub mod config;
pub use config::*;
pub mod context;
pub use context::*;
pub mod error;
pub use error::*;
pub mod function;
pub use function::*;
pub mod optimize;
pub use optimize::*;
pub mod pass_manager;
pub use pass_manager::*;
pub mod phi;
pub use phi::*;
pub mod printer;
pub use printer::*;
pub mod stmt;
pub use stmt::*;
pub mod variable;
pub use variable::*;
pub mod verify;
pub use verify::*;
