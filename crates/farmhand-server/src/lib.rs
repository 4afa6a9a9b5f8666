//! Farmhand server library - HTTP API over the analysis pipeline and
//! history log.
//!
//! Routes, state and configuration live here so integration tests can
//! build the router without the binary.

pub mod config;
pub mod logging;
pub mod routes;
pub mod state;
