pub mod catalog_store;
pub mod external;
pub mod liveness_prober;
pub mod output_buffer;
pub mod port_manager;
pub mod process_manager;
pub mod project_registry;
pub mod project_scanner;
pub mod settings_service;
pub mod status_reconciler;

pub use catalog_store::*;
pub use external::*;
pub use liveness_prober::*;
pub use output_buffer::*;
pub use port_manager::*;
pub use process_manager::*;
pub use project_registry::*;
pub use project_scanner::*;
pub use settings_service::*;
pub use status_reconciler::*;
