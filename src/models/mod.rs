pub mod catalog;
pub mod event;
pub mod process_info;
pub mod project;
pub mod settings;

pub use catalog::*;
pub use event::*;
pub use process_info::*;
pub use project::*;
pub use settings::*;
