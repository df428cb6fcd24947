pub mod client;

pub use client::{StatusPatch, StatusStore};
