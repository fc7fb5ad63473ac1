//! Workspace placeholder crate.
//!
//! This crate exposes the `desktop-shims` feature flag that maps onto the
//! individual workspace crates (`core-service`, `bridge-desktop`). Host
//! applications can depend on `bucketsync-workspace` and get the scheduler,
//! transfer orchestrator and desktop adapters without wiring each crate
//! individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
