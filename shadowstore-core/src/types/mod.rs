// Module declarations
pub mod path;
pub mod session;
pub mod config;

// Re-export all types from submodules
pub use path::ShadowPath;
pub use session::SessionId;
pub use config::ShadowConfig;
