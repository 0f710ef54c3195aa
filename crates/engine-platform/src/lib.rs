//! Platform collaborators for the TapVolt engine: persistent device identity
//! and simple key/value settings storage.

/// Stable per-install device identifier resolution.
pub mod identity;
/// Key/value settings persistence.
pub mod settings;

pub use identity::{DeviceIdentity, FileDeviceIdentity, FixedDeviceIdentity, IdentityError};
pub use settings::{
    InMemorySettingsStore, JsonFileSettingsStore, LAST_ENDPOINT_KEY, LAST_PRESET_KEY,
    SettingsError, SettingsStore,
};
