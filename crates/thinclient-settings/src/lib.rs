//! # thinclient-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ThinClientSettings::default()`]
//! 2. **User file**: `~/.thinclient/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `THINCLIENT_*` overrides
//!
//! Command-line flags are applied by the binary on top of the result.
//!
//! At runtime the [`SettingsStore`] owns the mutable pieces the rest of the
//! system reacts to (backend address and client identity) and publishes them
//! through `watch` channels. Consumers only read; nothing downstream writes
//! back into the store.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod store;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use store::{ConnectionConfig, SettingsStore};
pub use types::*;
