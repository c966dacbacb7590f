//! Data models

pub mod audit;
pub mod deployment;
