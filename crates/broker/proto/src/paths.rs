//! Utilities for broker file paths.

use std::path::PathBuf;

/// Returns the default directory of the durable form store.
///
/// # Resolution Order
///
/// 1. `FORM_BROKER_DB` environment variable.
/// 2. User state directory (e.g., `$XDG_STATE_HOME`), under `form-broker/forms`.
/// 3. System temp directory.
#[must_use]
pub fn default_db_path() -> PathBuf {
	if let Ok(p) = std::env::var("FORM_BROKER_DB") {
		return PathBuf::from(p);
	}

	dirs::state_dir()
		.or_else(|| dirs::home_dir().map(|home| home.join(".local/state")))
		.unwrap_or_else(std::env::temp_dir)
		.join("form-broker")
		.join("forms")
}
