//! Bootstrap orchestration engine.
//!
//! The [`orchestrator::Orchestrator`] walks the phase state machine, starting
//! PXE services, handing off to the [`health::HealthPoller`] and then to the
//! [`installer::AddonInstaller`], and records every step in the status store.
//! External tools are reached through the collaborator traits in
//! [`cluster`], [`credentials`], [`probe`] and [`render`].

pub mod addons;
pub mod cluster;
pub mod credentials;
pub mod error;
pub mod exec;
pub mod health;
pub mod installer;
pub mod orchestrator;
pub mod probe;
pub mod pxe;
pub mod render;
pub mod settings;

pub use error::BootstrapError;
pub use orchestrator::{Collaborators, Orchestrator};
pub use settings::BootstrapSettings;
