//! Centralized constants for metalboot.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod addons;
pub mod network;
pub mod paths;
pub mod timeouts;
