//! Development vs deployment failure policy.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Decides how recoverable failures reach the caller.
///
/// `Debug` surfaces every grammar and connect failure as an error.
/// `Release` logs them and degrades to "nothing" instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Development build: failures are errors.
    #[default]
    Debug,
    /// Deployment build: failures are logged and swallowed.
    Release,
}

impl BuildMode {
    /// Mode matching how this binary was compiled.
    pub fn from_build() -> Self {
        if cfg!(debug_assertions) {
            Self::Debug
        } else {
            Self::Release
        }
    }

    /// Whether failures are surfaced to the caller.
    pub fn is_debug(self) -> bool {
        self == Self::Debug
    }

    /// Apply the policy to a result.
    ///
    /// In `Debug` the error is returned unchanged; in `Release` it is logged
    /// and replaced by `Ok(None)`.
    pub fn settle<T, E: fmt::Display>(self, result: Result<T, E>) -> Result<Option<T>, E> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) if self.is_debug() => Err(err),
            Err(err) => {
                warn!(error = %err, "suppressed failure in release mode");
                Ok(None)
            }
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => f.write_str("Debug"),
            Self::Release => f.write_str("Release"),
        }
    }
}
