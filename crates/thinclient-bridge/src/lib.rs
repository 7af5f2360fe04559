//! # thinclient-bridge
//!
//! Connects sandboxed mini-app surfaces to the device and the backend.
//!
//! - [`SandboxBridge`]: one per mounted surface; validates origin, classifies
//!   surface traffic, relays it, and pushes device state into the surface
//! - [`LocalStateStore`]: cached track, per-app settings, app catalog,
//!   manifest and wall-clock time, fed by backend envelopes
//! - [`MappingService`]: key and action execution plus icon URLs

#![deny(unsafe_code)]

pub mod bridge;
pub mod errors;
pub mod mapping;
pub mod state;
pub mod surface;

pub use bridge::{BridgeContext, BridgeOptions, SandboxBridge};
pub use errors::BridgeError;
pub use mapping::{MappingService, ServerMapping};
pub use state::{LocalState, LocalStateStore, format_clock};
pub use surface::{BlobSource, Surface, SurfaceData, SurfaceEvent, SurfaceMessage};
