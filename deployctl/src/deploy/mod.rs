//! Deployment module

pub mod fsm;
pub mod orchestrator;
pub mod simulated;
pub mod state;
pub mod target;
