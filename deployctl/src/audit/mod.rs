//! Deployment audit log module

pub mod file_store;
pub mod log;
pub mod record;
pub mod store;

pub use log::AuditLog;
