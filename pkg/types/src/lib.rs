//! Shared data model: the operator's cluster spec, the bootstrap config
//! file and the status document read by dashboards.

pub mod cluster;
pub mod config;
pub mod status;
pub mod validate;
