//! # thinclient-input
//!
//! Physical input handling. Unlike envelope dispatch, key dispatch is
//! short-circuiting: handlers are consulted most-recently-registered first
//! and the first one that consumes the event wins. Unconsumed presses fall
//! through to the default mapping (wheel rotation and the dashboard key).

#![deny(unsafe_code)]

pub mod button;
pub mod registry;

pub use button::ButtonTracker;
pub use registry::{Dispatch, KeyHandle, KeyRegistry, Navigator};
