pub mod process;
pub mod project;

pub use process::*;
pub use project::*;
