//! deployctl library
//!
//! Deployment orchestration and the deployment audit log.

pub mod audit;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod storage;
pub mod utils;
pub mod workers;
