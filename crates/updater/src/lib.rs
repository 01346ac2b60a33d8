pub mod manager;
pub mod manifest;
pub mod settings;
pub mod version;

pub use manager::{UpdateDecision, UpdateGate, UpdateInfo, UpdateManager};
pub use manifest::{Release, ReleaseAsset};
pub use settings::{UpdateSettings, UPDATE_SETTINGS_KEY};
pub use version::{compare_versions, is_newer_version, version_satisfies};
