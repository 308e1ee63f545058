pub mod port_checker;
pub mod process_killer;

#[cfg(not(target_os = "windows"))]
pub mod user_path;

pub use port_checker::*;
pub use process_killer::*;

#[cfg(not(target_os = "windows"))]
pub use user_path::*;
