//! # tether-settings
//!
//! Layered configuration for the tether server and client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **User file**: `~/.tether/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)
//!
//! A [`FlagStore`] of named flags can be folded in afterwards with
//! [`TetherSettings::apply_flags`]. The resulting value is handed to the
//! server and client at construction; nothing reads settings globally.

#![deny(unsafe_code)]

pub mod errors;
pub mod flags;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use flags::{ConfigFlag, ConfigTarget, FlagStore};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = TetherSettings::default();
        let _store = FlagStore::new();
        assert!(settings_path().ends_with(".tether/settings.json"));
    }
}
