pub mod backend;
pub mod config;
pub mod error;
pub mod extractors;
pub mod logging;
pub mod models;
pub mod resource;
pub mod startup;
pub mod upload;
pub mod utils;

// Re-export commonly used types for easier access
pub use models::{Account, UploadRow};
pub use upload::{UploadReport, UploadSession};
